//! Availability checks with bounded retries.
//!
//! [`wait_ping`] pings a target once, then keeps pinging on a fixed interval
//! until it answers, a fatal error comes back, or the wait budget runs out.
//! When the budget expires one last attempt is made with a fresh budget and
//! its outcome is returned.
//!
//! Retry loops should target [`PgConnectOptions`]: each attempt opens one
//! direct connection, so a refused connect fails at once with its I/O cause. Pinging a [`PgPool`] goes through `acquire`, which retries
//! internally until the pool's acquire timeout.

use crate::error::{PgError, PgResult, SQLSTATE_CLASS_INVALID_AUTHORIZATION, SQLSTATE_CLASS_INVALID_CATALOG};
use crate::settings::MIN_PING_TIMEOUT;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, PgPool};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Delay between two attempts.
pub const PING_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Something that can be asked whether it is reachable.
pub trait Pingable {
    fn ping(&self) -> impl Future<Output = PgResult<()>> + Send;
}

impl Pingable for PgPool {
    async fn ping(&self) -> PgResult<()> {
        let mut conn = self.acquire().await?;
        conn.ping().await?;
        Ok(())
    }
}

impl Pingable for PgConnectOptions {
    async fn ping(&self) -> PgResult<()> {
        let mut conn = self.connect().await?;
        let pinged = conn.ping().await;
        if let Err(e) = conn.close().await {
            debug!(error = %e, "closing ping connection failed");
        }
        Ok(pinged?)
    }
}

/// Outcome class of a failed attempt.
#[derive(Debug)]
pub enum Failure {
    /// Stop retrying and report this error.
    Fatal(PgError),
    /// Keep retrying.
    Transient(PgError),
}

/// Classify a ping error.
///
/// Invalid authorization (SQLSTATE class 28) becomes [`PgError::Auth`] and
/// invalid catalog (class 3D) is returned unchanged; both are fatal. Anything
/// else is transient.
pub fn classify(err: PgError) -> Failure {
    if err.is_auth() {
        return Failure::Fatal(err);
    }
    let class = err.sql_state().map(|code| code.get(..2).unwrap_or(code));
    match class {
        Some(SQLSTATE_CLASS_INVALID_AUTHORIZATION) => Failure::Fatal(err.into_auth()),
        Some(SQLSTATE_CLASS_INVALID_CATALOG) => Failure::Fatal(err),
        _ => Failure::Transient(err),
    }
}

/// Wait for `target` to answer, for at most `max_wait` (floored at one second)
/// plus one final attempt.
pub async fn wait_ping<P>(target: &P, max_wait: Duration) -> PgResult<()>
where
    P: Pingable + ?Sized,
{
    let max_wait = max_wait.max(MIN_PING_TIMEOUT);
    let deadline = Instant::now() + max_wait;

    match attempt(target, deadline, max_wait).await {
        Ok(()) => return Ok(()),
        Err(Failure::Fatal(err)) => return Err(err),
        Err(Failure::Transient(err)) => {
            debug!(error = %err, "database not reachable yet, retrying");
        }
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + PING_RETRY_INTERVAL, PING_RETRY_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let expiry = tokio::time::sleep_until(deadline);
    tokio::pin!(expiry);

    loop {
        tokio::select! {
            biased;

            _ = &mut expiry => {
                debug!(max_wait_ms = max_wait.as_millis() as u64, "ping budget exhausted, last attempt");
                return match attempt(target, Instant::now() + max_wait, max_wait).await {
                    Ok(()) => Ok(()),
                    Err(Failure::Fatal(err)) | Err(Failure::Transient(err)) => Err(err),
                };
            }
            _ = ticker.tick() => {
                match attempt(target, deadline, max_wait).await {
                    Ok(()) => return Ok(()),
                    Err(Failure::Fatal(err)) => return Err(err),
                    Err(Failure::Transient(err)) => {
                        debug!(error = %err, "database not reachable yet, retrying");
                    }
                }
            }
        }
    }
}

async fn attempt<P>(target: &P, deadline: Instant, budget: Duration) -> Result<(), Failure>
where
    P: Pingable + ?Sized,
{
    let result = match tokio::time::timeout_at(deadline, target.ping()).await {
        Ok(result) => result,
        Err(_) => Err(PgError::timeout("database ping", budget.as_millis() as u64)),
    };
    result.map_err(classify)
}
