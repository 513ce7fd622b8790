use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::error::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Running,
    Draining,
    Stopped,
}

impl ServerState {
    pub fn can_transition_to(self, next: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, next),
            (Created, Running) | (Created, Stopped) | (Running, Draining) | (Draining, Stopped)
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Created => "created",
            ServerState::Running => "running",
            ServerState::Draining => "draining",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Result of [`Lifecycle::begin_shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownClaim {
    /// The server never started and is now stopped.
    NeverStarted,
    /// This caller moved the server to draining and owns the drain.
    Drain,
    /// Another caller already owns the shutdown.
    InProgress,
}

/// Shared, checked server state. Every change is a single step on the
/// watch channel, so checks and transitions cannot race.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: Arc<watch::Sender<ServerState>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ServerState::Created);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn current(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Move to `next`, returning the state left behind.
    pub fn transition(&self, next: ServerState) -> Result<ServerState, ServerError> {
        let mut outcome = Ok(next);
        self.state.send_if_modified(|state| {
            let previous = *state;
            if !previous.can_transition_to(next) {
                outcome = Err(ServerError::InvalidStateTransition(format!(
                    "{previous} -> {next}"
                )));
                return false;
            }
            *state = next;
            outcome = Ok(previous);
            true
        });
        if let Ok(previous) = outcome {
            debug!(from = %previous, to = %next, "Server state changed");
        }
        outcome
    }

    /// Claim the shutdown. `Created` goes straight to `Stopped`, `Running`
    /// goes to `Draining`; anything later is already someone else's.
    pub fn begin_shutdown(&self) -> ShutdownClaim {
        let mut claim = ShutdownClaim::InProgress;
        self.state.send_if_modified(|state| {
            let previous = *state;
            let next = match previous {
                ServerState::Created => {
                    claim = ShutdownClaim::NeverStarted;
                    ServerState::Stopped
                }
                ServerState::Running => {
                    claim = ShutdownClaim::Drain;
                    ServerState::Draining
                }
                ServerState::Draining | ServerState::Stopped => return false,
            };
            debug!(from = %previous, to = %next, "Server state changed");
            *state = next;
            true
        });
        claim
    }

    /// Resolves once the state reaches `Stopped`.
    pub async fn stopped(&self) {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = state.wait_for(|s| *s == ServerState::Stopped).await;
    }
}
