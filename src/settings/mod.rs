//! Layered settings for PostgreSQL databases and their connection pools.
//!
//! Settings are resolved in layers:
//! - package defaults ([`Settings::default`]);
//! - builder steps applied in order, later steps winning
//!   (whole replacement, configuration sources, per-alias settings, default pool);
//! - per-alias lookup with fallback to the `"default"` alias;
//! - pool settings inheritance: an alias without its own `pgconfig` inherits
//!   the global one, an alias with one gets it verbatim (no field merge).
//!
//! The configuration layout consumed from files or the environment is:
//!
//! ```yaml
//! databases:
//!   default:
//!     url: postgresql://localhost:5432/test
//!     user: $PG_USER
//!     password: $PG_PASSWORD
//!     pgconfig:            # pool settings for this database only
//!       maxIdleConns: 25
//!       maxOpenConns: 50
//!       connMaxLifetime: 5m
//!       pingTimeout: 10s
//!       log:
//!         level: warn
//!       trace:
//!         enabled: false
//!       set:
//!         plan_cache_mode: force_custom_plan
//! pgconfig:                # default pool settings
//!   maxIdleConns: 2
//!   maxOpenConns: 0
//! ```

pub mod duration;
pub mod env;

use crate::error::{PgError, PgResult};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub use env::expand_env;

/// Points to a local test database with user postgres.
pub const DEFAULT_URL: &str = "postgresql://postgres@localhost:5432/testdb?sslmode=disable";

/// Default configuration alias, suited for most single-database setups.
pub const DEFAULT_DB_ALIAS: &str = "default";

/// Default log level for the database driver.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Default budget for the availability check.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Ping timeouts below this value are raised to it.
pub const MIN_PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Bootstrap database used for administrative operations.
pub const ADMIN_DATABASE: &str = "postgres";

// Pool defaults
pub const DEFAULT_MAX_IDLE_CONNS: u32 = 2;
pub const DEFAULT_MAX_OPEN_CONNS: u32 = 0;

/// Log settings for the database driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// One of trace, debug, info, warn, error, none
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    pub enabled: bool,
}

/// Connection pool settings (`pgconfig` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Connections kept open while idle
    #[serde(rename = "maxIdleConns", alias = "maxidleconns", alias = "max_idle_conns")]
    pub max_idle_conns: u32,
    /// Upper bound on open connections (0: driver default)
    #[serde(rename = "maxOpenConns", alias = "maxopenconns", alias = "max_open_conns")]
    pub max_open_conns: u32,
    /// Zero means connections are never recycled because of their age
    #[serde(
        rename = "connMaxLifetime",
        alias = "connmaxlifetime",
        alias = "conn_max_lifetime",
        with = "duration"
    )]
    pub conn_max_lifetime: Duration,
    /// Zero means idle connections are never closed because of idleness
    #[serde(
        rename = "connMaxIdleTime",
        alias = "connmaxidletime",
        alias = "conn_max_idle_time",
        with = "duration"
    )]
    pub conn_max_idle_time: Duration,
    #[serde(
        rename = "pingTimeout",
        alias = "pingtimeout",
        alias = "ping_timeout",
        with = "duration"
    )]
    pub ping_timeout: Duration,
    pub log: LogSettings,
    pub trace: TraceSettings,
    /// Session parameters applied with `SET key = value` after each connect,
    /// e.g. `plan_cache_mode: auto|force_custom_plan|force_generic_plan`
    pub set: BTreeMap<String, String>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle_conns: DEFAULT_MAX_IDLE_CONNS,
            max_open_conns: DEFAULT_MAX_OPEN_CONNS,
            conn_max_lifetime: Duration::ZERO,
            conn_max_idle_time: Duration::ZERO,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            log: LogSettings::default(),
            trace: TraceSettings::default(),
            set: BTreeMap::new(),
        }
    }
}

impl PoolSettings {
    pub fn with_max_idle_conns(mut self, n: u32) -> Self {
        self.max_idle_conns = n;
        self
    }

    pub fn with_max_open_conns(mut self, n: u32) -> Self {
        self.max_open_conns = n;
        self
    }

    pub fn with_conn_max_lifetime(mut self, d: Duration) -> Self {
        self.conn_max_lifetime = d;
        self
    }

    pub fn with_conn_max_idle_time(mut self, d: Duration) -> Self {
        self.conn_max_idle_time = d;
        self
    }

    pub fn with_ping_timeout(mut self, d: Duration) -> Self {
        self.ping_timeout = d;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log.level = level.into();
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.trace.enabled = enabled;
        self
    }

    /// Add a session parameter applied after each connect.
    pub fn with_set_clause(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.set.insert(param.into(), value.into());
        self
    }

    /// Ping timeout floored at [`MIN_PING_TIMEOUT`].
    pub fn effective_ping_timeout(&self) -> Duration {
        self.ping_timeout.max(MIN_PING_TIMEOUT)
    }

    /// Driver log level, falling back to the default when the configured one is invalid.
    pub fn log_level(&self) -> LevelFilter {
        parse_log_level(&self.log.level)
            .or_else(|_| parse_log_level(DEFAULT_LOG_LEVEL))
            .unwrap_or(LevelFilter::Warn)
    }

    fn validate(&self) -> PgResult<()> {
        if !self.log.level.is_empty() {
            parse_log_level(&self.log.level).map_err(|e| {
                PgError::config(format!(
                    "invalid log level for the database driver [{:?}]: {}",
                    self.log.level, e
                ))
            })?;
        }
        Ok(())
    }
}

/// Parse a driver log level: trace, debug, info, warn, error or none.
pub fn parse_log_level(level: &str) -> Result<LevelFilter, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(LevelFilter::Trace),
        "debug" => Ok(LevelFilter::Debug),
        "info" => Ok(LevelFilter::Info),
        "warn" => Ok(LevelFilter::Warn),
        "error" => Ok(LevelFilter::Error),
        "none" => Ok(LevelFilter::Off),
        other => Err(format!("unknown log level {other:?}")),
    }
}

/// Settings for one database alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Connection URL, may reference environment variables
    pub url: String,
    /// Overrides the URL user; may reference environment variables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Overrides the URL password; may reference environment variables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Pool settings for this database only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pgconfig: Option<PoolSettings>,
}

impl DatabaseSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_pool_settings(mut self, pool: PoolSettings) -> Self {
        self.pgconfig = Some(pool);
        self
    }

    /// Connection URL with environment references expanded.
    pub fn db_url(&self) -> String {
        expand_env(&self.url)
    }

    /// User override, expanded. Empty overrides count as absent.
    pub fn expanded_user(&self) -> Option<String> {
        self.user
            .as_deref()
            .map(expand_env)
            .filter(|u| !u.is_empty())
    }

    /// Password override, expanded. Empty overrides count as absent.
    pub fn expanded_password(&self) -> Option<String> {
        self.password
            .as_deref()
            .map(expand_env)
            .filter(|p| !p.is_empty())
    }

    /// Parsed connection URL.
    pub fn parsed_url(&self) -> PgResult<Url> {
        let raw = self.db_url();
        if raw.is_empty() {
            return Err(PgError::config("connection string is required"));
        }
        Ok(Url::parse(&raw)?)
    }

    /// Connection URL safe for logs: the password is masked.
    pub fn redacted_url(&self) -> String {
        match self.parsed_url() {
            Ok(url) => redact(url),
            Err(_) => "<invalid url>".to_string(),
        }
    }

    /// Database name carried by the URL path.
    pub fn database_name(&self) -> Option<String> {
        let url = self.parsed_url().ok()?;
        let name = url.path().trim_start_matches('/');
        (!name.is_empty()).then(|| name.to_string())
    }

    /// Point the URL at another database.
    pub fn switch_db(&mut self, db_name: &str) -> PgResult<()> {
        let mut url = self.parsed_url()?;
        url.set_path(&format!("/{}", db_name));
        self.url = url.to_string();
        Ok(())
    }

    /// A copy of these settings pointing at the administrative database.
    pub fn admin(&self) -> PgResult<DatabaseSettings> {
        let mut admin = self.clone();
        admin.switch_db(ADMIN_DATABASE)?;
        Ok(admin)
    }

    /// Pool settings in effect: the override, or package defaults.
    pub fn pool(&self) -> PoolSettings {
        self.pgconfig.clone().unwrap_or_default()
    }

    /// Validate the URL and pool settings.
    ///
    /// The URL must be a PostgreSQL DSN accepted by the driver.
    pub fn validate(&self) -> PgResult<()> {
        let url = self.parsed_url()?;
        match url.scheme() {
            "postgres" | "postgresql" => {}
            other => {
                return Err(PgError::invalid_url(format!(
                    "unsupported scheme {other:?}, expected postgres or postgresql"
                )));
            }
        }

        PgConnectOptions::from_str(url.as_str())
            .map_err(|e| PgError::config(format!("invalid connection string: {}", e)))?;

        if let Some(pool) = &self.pgconfig {
            pool.validate()?;
        }

        Ok(())
    }

    /// Validate, also requiring a target database in the URL path.
    pub fn validate_target(&self) -> PgResult<()> {
        self.validate()?;
        if self.database_name().is_none() {
            return Err(PgError::config(format!(
                "no database name in connection URL {}",
                self.redacted_url()
            )));
        }
        Ok(())
    }
}

fn redact(mut url: Url) -> String {
    if url.password().is_some() {
        let _ = url.set_password(Some("xxxxx"));
    }
    url.to_string()
}

/// Settings for a set of databases plus a default pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default pool settings
    pub pgconfig: PoolSettings,
    /// Database settings by alias
    pub databases: BTreeMap<String, DatabaseSettings>,
    /// Application name, reported to the server as `application_name`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut databases = BTreeMap::new();
        databases.insert(
            DEFAULT_DB_ALIAS.to_string(),
            DatabaseSettings::new(DEFAULT_URL),
        );
        Self {
            pgconfig: PoolSettings::default(),
            databases,
            app: None,
        }
    }
}

impl Settings {
    /// Start a builder from the package defaults.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    /// Resolve the settings for one alias.
    ///
    /// Unknown aliases fall back to the `"default"` alias. When neither exists,
    /// empty settings are returned and validation will reject them.
    pub fn database_settings_for(&self, alias: &str) -> DatabaseSettings {
        let resolved = self
            .databases
            .get(alias)
            .or_else(|| self.databases.get(DEFAULT_DB_ALIAS));

        let Some(db) = resolved else {
            warn!(db_alias = %alias, "no defaults available, returning empty settings");
            return DatabaseSettings::default();
        };

        let mut db = db.clone();
        if db.pgconfig.is_none() {
            db.pgconfig = Some(self.pgconfig.clone());
        }
        db
    }

    /// Effective settings for an alias as a JSON document, credentials masked.
    pub fn describe(&self, alias: &str) -> serde_json::Value {
        let mut db = self.database_settings_for(alias);
        db.url = db.redacted_url();
        if db.password.is_some() {
            db.password = Some("xxxxx".to_string());
        }
        serde_json::json!({
            "alias": alias,
            "app": self.app,
            "database": db,
        })
    }
}

/// Partial settings read from a configuration source, merged over a base.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsSource {
    pgconfig: Option<PoolSettings>,
    databases: BTreeMap<String, DatabaseSettings>,
    app: Option<String>,
}

/// Builder for [`Settings`]. Steps apply in call order; later steps win.
#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Start from the package defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from explicit base settings.
    pub fn from_settings(settings: Settings) -> Self {
        Self { settings }
    }

    /// Replace everything configured so far.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Merge a configuration source: its default pool settings replace the
    /// current ones, its aliases are added or replaced one by one.
    pub fn source(mut self, source: &config::Config) -> PgResult<Self> {
        let loaded: SettingsSource = source.clone().try_deserialize()?;
        if let Some(pool) = loaded.pgconfig {
            self.settings.pgconfig = pool;
        }
        self.settings.databases.extend(loaded.databases);
        if loaded.app.is_some() {
            self.settings.app = loaded.app;
        }
        Ok(self)
    }

    /// Name of the application using the database.
    pub fn app(mut self, app: impl Into<String>) -> Self {
        self.settings.app = Some(app.into());
        self
    }

    /// Set or replace the settings of one alias.
    pub fn database(mut self, alias: impl Into<String>, db: DatabaseSettings) -> Self {
        self.settings.databases.insert(alias.into(), db);
        self
    }

    /// Replace the default pool settings.
    pub fn default_pool(mut self, pool: PoolSettings) -> Self {
        self.settings.pgconfig = pool;
        self
    }

    pub fn build(self) -> Settings {
        self.settings
    }
}
