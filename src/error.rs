//! Error types for database provisioning and pool management.
//!
//! Errors are classified so that callers can tell configuration mistakes,
//! transient connectivity problems, authentication failures and server-side
//! errors apart. Lower layers wrap driver errors with the operation and the
//! database name via [`PgError::Provision`]; the classification helpers look
//! through that wrapper.

use thiserror::Error;

/// SQLSTATE class for "invalid authorization specification".
pub const SQLSTATE_CLASS_INVALID_AUTHORIZATION: &str = "28";

/// SQLSTATE class for "invalid catalog name" (the database does not exist).
pub const SQLSTATE_CLASS_INVALID_CATALOG: &str = "3D";

/// SQLSTATE raised when `CREATE DATABASE` targets an existing database.
pub const SQLSTATE_DUPLICATE_DATABASE: &str = "42P04";

#[derive(Error, Debug)]
pub enum PgError {
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("DB URL is invalid: {message}")]
    InvalidUrl { message: String },

    /// Network or server availability problem; worth retrying.
    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Postgres authentication error: {message}")]
    Auth {
        message: String,
        sql_state: Option<String>,
    },

    #[error(
        "Database error: {message}{}",
        .sql_state.as_deref().map(|c| format!(" (SQLSTATE {c})")).unwrap_or_default()
    )]
    Database {
        message: String,
        /// e.g. "42P04" for duplicate database
        sql_state: Option<String>,
    },

    #[error(
        "Timeout: {operation}{}",
        .elapsed_ms.map(|ms| format!(" exceeded {ms}ms")).unwrap_or_else(|| " timed out".to_string())
    )]
    Timeout {
        operation: String,
        /// Budget that ran out, when known
        elapsed_ms: Option<u64>,
    },

    #[error("db not initialized")]
    NotInitialized,

    #[error("connection pool is closed")]
    Closed,

    #[error("could not {operation} database {database}: {source}")]
    Provision {
        operation: String,
        database: String,
        #[source]
        source: Box<PgError>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid URL error.
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            message: message.into(),
        }
    }

    /// Create a (transient) connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a server-side database error with an optional SQLSTATE.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: Some(elapsed_ms),
        }
    }

    /// Create a timeout error whose budget is not known here.
    pub fn timed_out(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: None,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap an error with the provisioning operation and database it failed on.
    pub fn provision(
        operation: impl Into<String>,
        database: impl Into<String>,
        source: PgError,
    ) -> Self {
        Self::Provision {
            operation: operation.into(),
            database: database.into(),
            source: Box::new(source),
        }
    }

    /// Turn a server error into an authentication error, keeping its message and code.
    pub fn into_auth(self) -> Self {
        match self {
            Self::Database { message, sql_state } | Self::Auth { message, sql_state } => {
                Self::Auth { message, sql_state }
            }
            other => Self::Auth {
                message: other.to_string(),
                sql_state: None,
            },
        }
    }

    /// The innermost error, skipping provisioning context.
    pub fn root(&self) -> &PgError {
        match self {
            Self::Provision { source, .. } => source.root(),
            other => other,
        }
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self.root() {
            Self::Database { sql_state, .. } | Self::Auth { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is an authentication failure.
    pub fn is_auth(&self) -> bool {
        matches!(self.root(), Self::Auth { .. })
    }

    /// Check if the server reported that the target database is missing or invalid.
    pub fn is_invalid_catalog(&self) -> bool {
        self.sql_state()
            .is_some_and(|code| code.starts_with(SQLSTATE_CLASS_INVALID_CATALOG))
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            Self::Connection { .. } | Self::Timeout { .. }
        )
    }
}

/// Convert sqlx errors to PgError.
impl From<sqlx::Error> for PgError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => PgError::config(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                PgError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => PgError::database("No rows returned", None),
            sqlx::Error::PoolTimedOut => PgError::timed_out("connection pool acquire"),
            sqlx::Error::PoolClosed => PgError::Closed,
            sqlx::Error::Io(io_err) => PgError::connection(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => PgError::connection(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => PgError::connection(format!("Protocol error: {}", msg)),
            sqlx::Error::WorkerCrashed => PgError::connection("Database worker crashed"),
            other => PgError::internal(format!("Unexpected database error: {}", other)),
        }
    }
}

impl From<url::ParseError> for PgError {
    fn from(err: url::ParseError) -> Self {
        PgError::invalid_url(err.to_string())
    }
}

impl From<config::ConfigError> for PgError {
    fn from(err: config::ConfigError) -> Self {
        PgError::config(err.to_string())
    }
}

/// Result type alias for provisioning and pool operations.
pub type PgResult<T> = Result<T, PgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PgError::connection("refused");
        assert!(err.to_string().contains("Connection failed"));
        assert_eq!(PgError::NotInitialized.to_string(), "db not initialized");
    }

    #[test]
    fn test_database_error_includes_sql_state() {
        let err = PgError::database("database \"x\" already exists", Some("42P04".to_string()));
        assert!(err.to_string().contains("SQLSTATE 42P04"));
        assert_eq!(err.sql_state(), Some(SQLSTATE_DUPLICATE_DATABASE));

        let err = PgError::database("oops", None);
        assert_eq!(err.to_string(), "Database error: oops");
    }

    #[test]
    fn test_error_retryable() {
        assert!(PgError::timeout("ping", 1000).is_retryable());
        assert!(PgError::connection("err").is_retryable());
        assert!(!PgError::config("bad").is_retryable());
        assert!(!PgError::database("password authentication failed", Some("28P01".into()))
            .into_auth()
            .is_retryable());
    }

    #[test]
    fn test_into_auth_keeps_sql_state() {
        let err = PgError::database("password authentication failed", Some("28P01".into()))
            .into_auth();
        assert!(err.is_auth());
        assert_eq!(err.sql_state(), Some("28P01"));
        assert!(err.to_string().contains("authentication"));
    }

    #[test]
    fn test_provision_wrapper_is_transparent_for_classification() {
        let auth = PgError::database("no", Some("28000".into())).into_auth();
        let wrapped = PgError::provision("create", "testdb", auth);
        assert!(wrapped.is_auth());
        assert_eq!(wrapped.sql_state(), Some("28000"));
        assert!(wrapped.to_string().contains("could not create database testdb"));

        let missing = PgError::provision(
            "connect to",
            "nope",
            PgError::database("database \"nope\" does not exist", Some("3D000".into())),
        );
        assert!(missing.is_invalid_catalog());
        assert!(!missing.is_auth());
    }

    #[test]
    fn test_sqlx_conversion() {
        assert!(matches!(
            PgError::from(sqlx::Error::PoolClosed),
            PgError::Closed
        ));
        assert!(PgError::from(sqlx::Error::PoolTimedOut).is_retryable());
        assert_eq!(
            PgError::from(sqlx::Error::PoolTimedOut).to_string(),
            "Timeout: connection pool acquire timed out"
        );
        assert_eq!(
            PgError::timeout("database ping", 3000).to_string(),
            "Timeout: database ping exceeded 3000ms"
        );
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(PgError::from(sqlx::Error::Io(io)).is_retryable());
    }

    #[test]
    fn test_url_parse_error_is_invalid_url() {
        let err: PgError = url::Url::parse("::not a url").unwrap_err().into();
        assert!(matches!(err, PgError::InvalidUrl { .. }));
    }
}
