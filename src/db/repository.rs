//! Connection pool lifecycle for one configured database.

use crate::db::connect::{connect_options, pool_options};
use crate::db::ping::{Pingable, wait_ping};
use crate::error::{PgError, PgResult};
use crate::settings::{DatabaseSettings, Settings};
use sqlx::PgPool;
use tracing::{debug, info};

#[derive(Debug)]
enum State {
    Uninitialized,
    Started(PgPool),
    Stopped,
}

/// Owns the connection pool of one database alias.
///
/// A repository starts uninitialized, holds a pool once [`start`](Self::start)
/// succeeds and cannot be restarted after [`stop`](Self::stop).
#[derive(Debug)]
pub struct Repository {
    alias: String,
    app: Option<String>,
    settings: DatabaseSettings,
    state: State,
}

impl Repository {
    /// Repository for `alias`, resolved against `settings`.
    pub fn new(alias: impl Into<String>, settings: &Settings) -> Self {
        let alias = alias.into();
        let db = settings.database_settings_for(&alias);
        Self::from_database_settings(alias, db, settings.app.clone())
    }

    pub fn from_database_settings(
        alias: impl Into<String>,
        settings: DatabaseSettings,
        app: Option<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            app,
            settings,
            state: State::Uninitialized,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    /// The pool, once started and until stopped.
    pub fn pool(&self) -> Option<&PgPool> {
        match &self.state {
            State::Started(pool) => Some(pool),
            _ => None,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self.state, State::Started(_))
    }

    /// Open the pool and wait until the database answers.
    ///
    /// Starting a started repository does nothing. A stopped repository
    /// cannot be started again.
    pub async fn start(&mut self) -> PgResult<()> {
        match self.state {
            State::Started(_) => return Ok(()),
            State::Stopped => return Err(PgError::Closed),
            State::Uninitialized => {}
        }

        self.settings.validate_target()?;
        let pool_settings = self.settings.pool();
        let options = connect_options(&self.settings, self.app.as_deref())?;
        let pool = pool_options(&pool_settings).connect_lazy_with(options.clone());

        if pool_settings.trace.enabled {
            info!(db_alias = %self.alias, "statement tracing enabled");
        }

        let max_wait = pool_settings.effective_ping_timeout();
        debug!(
            db_url = %self.settings.redacted_url(),
            max_wait_ms = max_wait.as_millis() as u64,
            "trying to ping the database"
        );
        if let Err(err) = wait_ping(&options, max_wait).await {
            pool.close().await;
            return Err(err);
        }

        info!(
            db_alias = %self.alias,
            db_name = %self.settings.database_name().unwrap_or_default(),
            max_open_conns = pool_settings.max_open_conns,
            max_idle_conns = pool_settings.max_idle_conns,
            "connection pool ok"
        );
        self.state = State::Started(pool);
        Ok(())
    }

    /// Close the pool. Does nothing if the repository was never started or
    /// is already stopped.
    pub async fn stop(&mut self) -> PgResult<()> {
        match std::mem::replace(&mut self.state, State::Stopped) {
            State::Started(pool) => {
                pool.close().await;
                info!(db_alias = %self.alias, "connection pool closed");
            }
            State::Uninitialized => {
                debug!(db_alias = %self.alias, "stop called on a repository that was not started");
                self.state = State::Uninitialized;
            }
            State::Stopped => {}
        }
        Ok(())
    }

    /// Ping the database, bounded by the configured ping timeout.
    pub async fn health_check(&self) -> PgResult<()> {
        let pool = match &self.state {
            State::Started(pool) => pool,
            State::Uninitialized => return Err(PgError::NotInitialized),
            State::Stopped => return Err(PgError::Closed),
        };

        let timeout = self.settings.pool().effective_ping_timeout();
        match tokio::time::timeout(timeout, pool.ping()).await {
            Ok(result) => result,
            Err(_) => Err(PgError::timeout("health check", timeout.as_millis() as u64)),
        }
    }
}
