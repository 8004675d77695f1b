//! Database provisioning: create, drop and ensure databases on a server.
//!
//! Every operation works through an administrative connection to the
//! `postgres` database of the target server. The existence check runs inside
//! a transaction; the DDL itself runs outside of it because PostgreSQL refuses
//! `CREATE DATABASE` and `DROP DATABASE` in a transaction block.

use crate::db::connect::{connect_options, pool_options};
use crate::db::ping::wait_ping;
use crate::db::repository::Repository;
use crate::error::{PgError, PgResult};
use crate::settings::{DEFAULT_DB_ALIAS, DatabaseSettings, Settings};
use sqlx::{Executor, PgConnection, PgPool};
use tracing::{debug, info};

/// Connections held by an administrative pool: one for the check transaction,
/// one for the DDL statement.
const ADMIN_POOL_SIZE: u32 = 2;

const DATABASE_EXISTS_QUERY: &str = "SELECT datname FROM pg_database WHERE datname = $1";
const ADVISORY_LOCK_QUERY: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

/// Connection to the administrative database of a server.
///
/// Release it with [`AdminConnection::close`].
#[derive(Debug)]
pub struct AdminConnection {
    pool: PgPool,
    url: String,
}

impl AdminConnection {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Redacted URL of the administrative database.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Close all connections to the administrative database.
    pub async fn close(self) {
        self.pool.close().await;
        debug!(db_url = %self.url, "admin connection closed");
    }
}

/// Connect to the administrative database of the server `settings` points to.
///
/// The server is pinged with the configured ping timeout before returning.
pub async fn connect_admin(settings: &DatabaseSettings, app: Option<&str>) -> PgResult<AdminConnection> {
    settings.validate()?;
    let admin = settings.admin()?;
    let pool_settings = admin.pool();

    let options = connect_options(&admin, app)?;
    let pool = pool_options(&pool_settings)
        .max_connections(ADMIN_POOL_SIZE)
        .min_connections(0)
        .connect_lazy_with(options.clone());

    let url = admin.redacted_url();
    debug!(db_url = %url, "connecting to admin database");

    if let Err(err) = wait_ping(&options, pool_settings.effective_ping_timeout()).await {
        pool.close().await;
        return Err(err);
    }

    Ok(AdminConnection { pool, url })
}

/// Check whether `db_name` exists in the server catalog.
pub async fn database_exists(conn: &mut PgConnection, db_name: &str) -> PgResult<bool> {
    let found: Option<String> = sqlx::query_scalar(DATABASE_EXISTS_QUERY)
        .bind(db_name)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

/// Quote an identifier for use in DDL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ddl {
    Create,
    Drop,
}

impl Ddl {
    fn verb(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Drop => "drop",
        }
    }

    fn statement(self, db_name: &str) -> String {
        match self {
            Self::Create => format!("CREATE DATABASE {}", quote_ident(db_name)),
            Self::Drop => format!("DROP DATABASE IF EXISTS {}", quote_ident(db_name)),
        }
    }

    /// Whether the DDL has nothing to do given the current catalog state.
    fn satisfied(self, exists: bool) -> bool {
        match self {
            Self::Create => exists,
            Self::Drop => !exists,
        }
    }
}

/// A started repository for a database that exists.
#[derive(Debug)]
pub struct EnsuredDatabase {
    pub repository: Repository,
    /// Whether the database was created by this call
    pub created: bool,
}

impl EnsuredDatabase {
    pub fn pool(&self) -> Option<&PgPool> {
        self.repository.pool()
    }
}

/// Creates and drops databases described by [`Settings`].
#[derive(Debug, Clone)]
pub struct Provisioner {
    settings: Settings,
    advisory_lock: bool,
}

impl Provisioner {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            advisory_lock: false,
        }
    }

    /// Serialize concurrent provisioners on the same server with a
    /// transaction-level advisory lock keyed on the database name.
    pub fn with_advisory_lock(mut self, enabled: bool) -> Self {
        self.advisory_lock = enabled;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Create the database `db_name` unless it already exists.
    ///
    /// Returns whether it was created. For the `"default"` alias the database
    /// name comes from the configured URL.
    pub async fn create_db(&self, db_name: &str) -> PgResult<bool> {
        self.provision(Ddl::Create, db_name).await
    }

    /// Drop the database `db_name` if it exists.
    ///
    /// Returns whether it was dropped.
    pub async fn drop_db(&self, db_name: &str) -> PgResult<bool> {
        self.provision(Ddl::Drop, db_name).await
    }

    /// Create the database if needed and return a started repository for it.
    ///
    /// On failure no `created` flag is returned. A database created by this
    /// call stays in place when opening the pool on it fails afterwards; the
    /// error then reads `could not open database <name>`.
    pub async fn ensure_db(&self, db_name: &str) -> PgResult<EnsuredDatabase> {
        let mut settings = self.settings.database_settings_for(db_name);
        if db_name != DEFAULT_DB_ALIAS {
            settings
                .switch_db(db_name)
                .map_err(|e| PgError::provision("open", db_name, e))?;
        }

        let created = self.create_db(db_name).await?;

        let mut repository = Repository::from_database_settings(db_name, settings, self.settings.app.clone());
        repository
            .start()
            .await
            .map_err(|e| PgError::provision("open", db_name, e))?;

        Ok(EnsuredDatabase { repository, created })
    }

    async fn provision(&self, ddl: Ddl, alias: &str) -> PgResult<bool> {
        let settings = self.settings.database_settings_for(alias);
        if settings.url.is_empty() {
            return Err(PgError::config(format!(
                "no database URL found in configuration, expected \"url\" in section {alias:?}"
            )));
        }

        let db_name = target_name(alias, &settings)?;
        let wrap = |e| PgError::provision(ddl.verb(), &db_name, e);

        let admin = connect_admin(&settings, self.settings.app.as_deref())
            .await
            .map_err(wrap)?;
        let result = self.check_then_apply(&admin, ddl, &db_name).await;
        admin.close().await;

        result.map_err(wrap)
    }

    async fn check_then_apply(&self, admin: &AdminConnection, ddl: Ddl, db_name: &str) -> PgResult<bool> {
        let mut tx = admin.pool().begin().await?;

        if self.advisory_lock {
            sqlx::query(ADVISORY_LOCK_QUERY)
                .bind(db_name)
                .execute(&mut *tx)
                .await?;
        }

        if ddl.satisfied(database_exists(&mut tx, db_name).await?) {
            tx.commit().await?;
            debug!(db_name, operation = ddl.verb(), "nothing to do");
            return Ok(false);
        }

        info!(db_name, operation = ddl.verb(), db_url = %admin.url(), "applying database DDL");
        admin.pool().execute(ddl.statement(db_name).as_str()).await?;
        tx.commit().await?;

        Ok(true)
    }
}

/// Database named by `alias`: the URL's database for the default alias,
/// the alias itself otherwise.
fn target_name(alias: &str, settings: &DatabaseSettings) -> PgResult<String> {
    if alias != DEFAULT_DB_ALIAS {
        return Ok(alias.to_string());
    }
    settings.database_name().ok_or_else(|| {
        PgError::config(format!(
            "no database name in connection URL {}",
            settings.redacted_url()
        ))
    })
}
