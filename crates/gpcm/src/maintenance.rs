//! Periodic connection maintenance: the login-timeout sweep and the
//! keep-alive broadcast.
//!
//! Both passes work on a snapshot of one registry map and fan the
//! per-session work out concurrently. A session that panics or fails is
//! logged and skipped; it never aborts the pass or the maintenance task.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::join_all;
use gpcm_session::{ConnectionId, DisconnectReason, LoginSession};
use gpcm_tick::{TickConfig, TickScheduler};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::registry::ConnectionRegistry;

/// What one sweep of the processing map did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions disconnected with [`DisconnectReason::LoginTimedOut`].
    pub timed_out: usize,
    /// Completed sessions dropped from the processing map.
    pub cleaned_up: usize,
}

/// What one keep-alive broadcast did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// Evicts processing sessions whose handshake has run for `login_timeout`
/// or longer, measured at `now`.
///
/// Completed sessions still found in the map are removed without being
/// disconnected. A session is only disconnected if this call removed it,
/// so a concurrent promotion always wins over the timeout.
pub async fn sweep_processing<S: LoginSession>(
    registry: &ConnectionRegistry<S>,
    login_timeout: Duration,
    now: Instant,
) -> SweepReport {
    let mut report = SweepReport::default();
    let mut expired = Vec::new();

    for session in registry.processing_snapshot() {
        if session.status().is_completed() {
            if registry.remove_processing_entry(&session) {
                report.cleaned_up += 1;
            }
            continue;
        }
        let age = now.saturating_duration_since(session.created_at());
        if age >= login_timeout && registry.remove_processing_entry(&session) {
            debug!(
                connection_id = %session.connection_id(),
                age_ms = age.as_millis() as u64,
                "login timed out"
            );
            expired.push(session);
        }
    }

    report.timed_out = expired.len();
    join_all(expired.into_iter().map(|session| {
        let connection_id = session.connection_id();
        guarded("timeout disconnect", connection_id, async move {
            session.disconnect(DisconnectReason::LoginTimedOut).await;
        })
    }))
    .await;

    report
}

/// Sends one keep-alive to every active session.
pub async fn broadcast_keep_alives<S: LoginSession>(
    registry: &ConnectionRegistry<S>,
) -> BroadcastReport {
    let sends = registry.active_snapshot().into_iter().map(|session| {
        let connection_id = session.connection_id();
        async move {
            let outcome = AssertUnwindSafe(session.send_keep_alive())
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    debug!(%connection_id, error = %e, "keep-alive failed");
                    false
                }
                Err(_) => {
                    error!(%connection_id, "keep-alive panicked");
                    false
                }
            }
        }
    });

    let results = join_all(sends).await;
    let sent = results.iter().filter(|ok| **ok).count();
    BroadcastReport {
        sent,
        failed: results.len() - sent,
    }
}

/// Drives [`sweep_processing`] and [`broadcast_keep_alives`] once per tick
/// until `stop` is cancelled.
pub async fn run_maintenance<S: LoginSession>(
    registry: Arc<ConnectionRegistry<S>>,
    tick: TickConfig,
    login_timeout: Duration,
    stop: CancellationToken,
) {
    let mut scheduler = TickScheduler::new(tick);
    info!(
        period_ms = scheduler.period().as_millis() as u64,
        login_timeout_ms = login_timeout.as_millis() as u64,
        "maintenance task started"
    );

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            info = scheduler.wait_for_tick() => {
                let (sweep, broadcast) = tokio::join!(
                    sweep_processing(&registry, login_timeout, Instant::now()),
                    broadcast_keep_alives(&registry),
                );
                trace!(
                    tick = info.tick,
                    timed_out = sweep.timed_out,
                    cleaned_up = sweep.cleaned_up,
                    keep_alives = broadcast.sent,
                    keep_alive_failures = broadcast.failed,
                    "maintenance tick done"
                );
                scheduler.record_tick_end();
            }
        }
    }

    info!(ticks = scheduler.tick_count(), "maintenance task stopped");
}

/// Runs a per-session future, logging instead of propagating a panic.
pub(crate) async fn guarded<F>(operation: &'static str, connection_id: ConnectionId, fut: F)
where
    F: Future<Output = ()>,
{
    if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
        error!(%connection_id, operation, "session panicked");
    }
}
