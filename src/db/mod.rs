//! Database layer.
//!
//! - Driver and pool configuration built from settings
//! - Availability checks with bounded retries
//! - Database provisioning through an administrative connection
//! - Connection pool lifecycle per configured alias

pub mod connect;
pub mod ping;
pub mod provision;
pub mod repository;

pub use connect::{connect_options, pool_options};
pub use ping::{Pingable, wait_ping};
pub use provision::{AdminConnection, EnsuredDatabase, Provisioner, connect_admin, database_exists};
pub use repository::Repository;
