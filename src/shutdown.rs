//! Start/stop contract shared by the ingestion pipeline and the API server.
//!
//! A service owns a [`Lifecycle`]: background tasks are spawned onto its
//! tracker and watch its cancellation token. `stop` cancels the token (safe
//! to repeat) and then waits for every tracked task, bounded by a deadline.

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("{service} did not stop within {deadline:?}")]
    Timeout {
        service: &'static str,
        deadline: Duration,
    },

    #[error("{} services failed to stop: {}", .0.len(), join_messages(.0))]
    Multiple(Vec<ShutdownError>),
}

fn join_messages(errors: &[ShutdownError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Anything the process has to shut down before exiting
#[async_trait]
pub trait Stoppable: Send + Sync {
    fn name(&self) -> &'static str;

    async fn stop(&self, deadline: Duration) -> Result<(), ShutdownError>;
}

pub struct Lifecycle {
    name: &'static str,
    state: Mutex<LifecycleState>,
    cancel_token: CancellationToken,
    tasks: TaskTracker,
}

impl Lifecycle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(LifecycleState::Idle),
            cancel_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get a clone of the cancellation token for spawned tasks
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Idle -> Running. Returns false if the service was already started or stopped.
    pub fn begin(&self) -> bool {
        let mut state = self.state.lock();
        if *state != LifecycleState::Idle {
            return false;
        }
        *state = LifecycleState::Running;
        true
    }

    /// Spawn a task whose completion `stop` waits for
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Broadcast the close signal and wait for all tasks, at most `deadline`.
    ///
    /// Calling it again after a timeout keeps waiting on the same tasks.
    pub async fn stop(&self, deadline: Duration) -> Result<(), ShutdownError> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Stopped => return Ok(()),
                LifecycleState::Idle => {
                    *state = LifecycleState::Stopped;
                    self.cancel_token.cancel();
                    return Ok(());
                }
                LifecycleState::Running => *state = LifecycleState::Stopping,
                LifecycleState::Stopping => {}
            }
        }

        tracing::info!(service = self.name, "🛑 Stopping");
        self.cancel_token.cancel();
        self.tasks.close();

        match tokio::time::timeout(deadline, self.tasks.wait()).await {
            Ok(()) => {
                *self.state.lock() = LifecycleState::Stopped;
                tracing::info!(service = self.name, "✓ Stopped");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    service = self.name,
                    ?deadline,
                    "⏱️  Shutdown timeout: tasks still running"
                );
                Err(ShutdownError::Timeout {
                    service: self.name,
                    deadline,
                })
            }
        }
    }
}

/// Stop every service concurrently under one shared deadline.
pub async fn terminate_services(
    services: &[Arc<dyn Stoppable>],
    deadline: Duration,
) -> Result<(), ShutdownError> {
    let results = join_all(services.iter().map(|s| s.stop(deadline))).await;

    let mut errors: Vec<ShutdownError> = results.into_iter().filter_map(Result::err).collect();
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ShutdownError::Multiple(errors)),
    }
}

/// Wait for ctrl+c or, on unix, SIGTERM. Returns the signal name.
pub async fn wait_for_termination_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
    }
}
