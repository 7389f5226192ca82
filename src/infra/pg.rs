use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::time::{sleep, Duration, Instant};

/// How long a caller may queue for a session once the pool is saturated.
const SESSION_WAIT: Duration = Duration::from_secs(30);

const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Open the session-capped pool. `max_sessions` bounds concurrent database
/// sessions fleet-wide: once the cap is reached, callers queue for a free
/// session and fail when `SESSION_WAIT` elapses, which keeps fan-out into
/// the store bounded during monitor bursts.
///
/// The database frequently comes up after this process does, so connection
/// is retried inside a startup window (`JIMM_DB_WAIT_SECS`, default 60).
pub async fn pool(dsn: &str, max_sessions: u32) -> anyhow::Result<sqlx::Pool<sqlx::Postgres>> {
    let window = Duration::from_secs(
        std::env::var("JIMM_DB_WAIT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
    );
    let deadline = Instant::now() + window;
    loop {
        let attempt = PgPoolOptions::new()
            .max_connections(max_sessions.max(1))
            .acquire_timeout(SESSION_WAIT)
            .connect(dsn)
            .await;
        match attempt {
            Ok(pool) => return Ok(pool),
            Err(err) if Instant::now() < deadline => {
                tracing::warn!(error = %err, "database not ready yet; will try again");
                sleep(STARTUP_RETRY_DELAY).await;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "database still unreachable {}s after startup",
                        window.as_secs()
                    )
                });
            }
        }
    }
}

/// Apply any pending schema migrations before traffic is served.
pub async fn migrate(pool: &sqlx::Pool<sqlx::Postgres>) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("applying schema migrations")?;
    Ok(())
}
