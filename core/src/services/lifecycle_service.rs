//! Service status state machine
//!
//! StartPending → Running → StopPending → Stopped. The worker thread owns the
//! interpreter; this side only flips the stop flag, records status and waits
//! a bounded time for the worker once a stop was requested.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, Notify};

use crate::context::ServiceContext;
use crate::error::WorkerError;
use crate::worker::{self, WORKER_THREAD_NAME};

/// Wait hint reported while starting
pub const START_WAIT_HINT_MS: u32 = 5_000;
/// Wait hint reported while stopping
pub const STOP_WAIT_HINT_MS: u32 = 25_250;
/// Exit code reported when the main script ends without being asked to
pub const SCRIPT_EXIT_CODE: u32 = 1;
pub const SCRIPT_EXIT_SPECIFIC_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    StartPending,
    Running,
    StopPending,
    Stopped,
}

impl ServiceState {
    fn is_pending(self) -> bool {
        matches!(self, ServiceState::StartPending | ServiceState::StopPending)
    }
}

/// One status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub exit_code: u32,
    pub service_specific_exit_code: i32,
    /// Progress counter, bumped on every pending report
    pub checkpoint: u32,
    pub wait_hint_ms: u32,
    pub updated_at: DateTime<Utc>,
}

/// Every status reported so far; the last entry is current
#[derive(Debug, Default)]
pub struct StatusBoard {
    reports: Mutex<Vec<ServiceStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, state: ServiceState, exit_code: u32, specific: i32, wait_hint_ms: u32) {
        let mut reports = self.reports.lock().unwrap_or_else(|p| p.into_inner());
        let checkpoint = match reports.last() {
            Some(last) if state.is_pending() && last.state == state => last.checkpoint + 1,
            _ if state.is_pending() => 1,
            _ => 0,
        };
        let status = ServiceStatus {
            state,
            exit_code,
            service_specific_exit_code: specific,
            checkpoint,
            wait_hint_ms,
            updated_at: Utc::now(),
        };
        tracing::info!(
            state = ?status.state,
            exit_code = status.exit_code,
            specific = status.service_specific_exit_code,
            "Service status"
        );
        reports.push(status);
    }

    pub fn current(&self) -> Option<ServiceStatus> {
        self.reports
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .last()
            .cloned()
    }

    pub fn states(&self) -> Vec<ServiceState> {
        self.reports
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|s| s.state)
            .collect()
    }
}

/// Runs the main script on a worker thread and tracks its status
pub struct LifecycleService {
    ctx: Arc<ServiceContext>,
    script: String,
    stop_timeout: Duration,
    status: Arc<StatusBoard>,
    stop_requested: Notify,
}

impl LifecycleService {
    pub fn new(ctx: Arc<ServiceContext>, script: impl Into<String>, stop_timeout: Duration) -> Self {
        Self {
            ctx,
            script: script.into(),
            stop_timeout,
            status: Arc::new(StatusBoard::new()),
            stop_requested: Notify::new(),
        }
    }

    pub fn status(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    /// Ask the running service to stop; returns false if already asked
    pub fn request_stop(&self) -> bool {
        let first = self.ctx.stop_flag().request_stop();
        self.stop_requested.notify_one();
        first
    }

    /// Run until the script ends, `shutdown` resolves or a stop is requested.
    ///
    /// Returns the final status, which is always `Stopped`.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<ServiceStatus> {
        self.status
            .report(ServiceState::StartPending, 0, 0, START_WAIT_HINT_MS);

        let mut done = self.spawn_worker()?;

        tokio::pin!(shutdown);
        tokio::select! {
            finished = &mut done => {
                let outcome = finished.unwrap_or_else(|_| Err(vanished()));
                self.worker_finished(outcome);
            }
            _ = &mut shutdown => self.stop(&mut done).await,
            _ = self.stop_requested.notified() => self.stop(&mut done).await,
        }

        self.status
            .current()
            .context("Service reported no status")
    }

    fn spawn_worker(&self) -> Result<oneshot::Receiver<Result<(), WorkerError>>> {
        let (tx, rx) = oneshot::channel();
        let ctx = self.ctx.clone();
        let script = self.script.clone();
        let status = self.status.clone();

        std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let outcome = worker::run_worker(ctx, &script, || {
                    status.report(ServiceState::Running, 0, 0, 0)
                });
                // The receiver is gone when the stop wait already timed out.
                let _ = tx.send(outcome);
            })
            .context("Failed to spawn worker thread")?;
        Ok(rx)
    }

    fn worker_finished(&self, outcome: Result<(), WorkerError>) {
        if let Err(err) = &outcome {
            tracing::warn!(error = %err, "Worker ended with an error");
        }
        if self.ctx.stopping() {
            self.status.report(ServiceState::Stopped, 0, 0, 0);
        } else {
            tracing::warn!(service = %self.ctx.identity().name, "Main script exited");
            self.status.report(
                ServiceState::Stopped,
                SCRIPT_EXIT_CODE,
                SCRIPT_EXIT_SPECIFIC_CODE,
                0,
            );
        }
    }

    async fn stop(&self, done: &mut oneshot::Receiver<Result<(), WorkerError>>) {
        self.ctx.stop_flag().request_stop();
        self.status
            .report(ServiceState::StopPending, 0, 0, STOP_WAIT_HINT_MS);

        match tokio::time::timeout(self.stop_timeout, done).await {
            Ok(finished) => {
                if let Err(err) = finished.unwrap_or_else(|_| Err(vanished())) {
                    tracing::warn!(error = %err, "Worker ended with an error");
                }
            }
            Err(_) => tracing::warn!(
                timeout = ?self.stop_timeout,
                "Worker did not finish in time, reporting stopped anyway"
            ),
        }
        self.status.report(ServiceState::Stopped, 0, 0, 0);
    }
}

fn vanished() -> WorkerError {
    WorkerError::Fatal {
        message: "worker thread ended without a result".to_string(),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Stop requested");
}
