//! Idle-session sweeper. Sessions are never persisted, so an abandoned browser
//! tab would otherwise keep its transcript in memory until restart.

use std::sync::Arc;

use chrono::Utc;
use study_core::config::SessionConfig;
use tokio::sync::broadcast;

use crate::sessions::SessionStore;

pub async fn run_session_sweeper(
    sessions: Arc<SessionStore>,
    config: SessionConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = tokio::time::Duration::from_secs(config.sweep_interval_seconds.max(1));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let timeout = chrono::Duration::minutes(config.idle_timeout_minutes);

    tracing::info!(
        "Session sweeper started (every {}s, idle timeout {}min)",
        config.sweep_interval_seconds,
        config.idle_timeout_minutes
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = sessions.sweep_idle(Utc::now(), timeout).await;
                if removed > 0 {
                    let remaining = sessions.len().await;
                    tracing::info!(removed, remaining, "Swept idle sessions");
                } else {
                    tracing::debug!("Session sweep: nothing idle");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Session sweeper shutting down");
                break;
            }
        }
    }
}
