//! PostgreSQL database provisioning and connection pool lifecycle.
//!
//! Settings are resolved per database alias, databases are created or dropped
//! through an administrative connection, and each alias gets a repository
//! owning its connection pool.

pub mod config;
pub mod db;
pub mod error;
pub mod settings;

pub use config::Config;
pub use db::{EnsuredDatabase, Provisioner, Repository};
pub use error::{PgError, PgResult};
pub use settings::{DatabaseSettings, PoolSettings, Settings, SettingsBuilder};
