// SPDX-License-Identifier: PMPL-1.0-or-later
//! Connection readiness.
//!
//! A [`Connection`] pairs a driver with an explicit state machine:
//!
//! ```text
//! Uninitialized ──connect──▶ Connecting ──ok──▶ Ready ──close──▶ Closed
//!                                │                                  │
//!                                └──err──▶ Error ◀──────────────────┘ (reconnect may fail)
//! ```
//!
//! The current state is readable synchronously and every transition is
//! published on a `tokio::sync::watch` channel, so callers can await
//! readiness instead of polling. A connection is shared (`Arc`) by a
//! database and the child tables created from it.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::driver::Driver;
use crate::error::{DriverError, QuickDocError, Result};

/// Readiness of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Uninitialized,
    Connecting,
    Ready,
    Closed,
    Error,
}

impl ReadyState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ReadyState) -> bool {
        use ReadyState::*;
        matches!(
            (self, next),
            (Uninitialized | Closed | Error, Connecting)
                | (Connecting, Ready | Error)
                | (Ready, Closed | Error)
                | (Uninitialized | Connecting | Error, Closed)
        )
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadyState::Uninitialized => "uninitialized",
            ReadyState::Connecting => "connecting",
            ReadyState::Ready => "ready",
            ReadyState::Closed => "closed",
            ReadyState::Error => "error",
        };
        f.write_str(name)
    }
}

/// A driver plus its readiness state.
pub struct Connection {
    driver: Arc<dyn Driver>,
    state: watch::Sender<ReadyState>,
}

impl Connection {
    /// Wrap `driver` in a connection that has not been opened yet.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        let (state, _) = watch::channel(ReadyState::Uninitialized);
        Self { driver, state }
    }

    /// The driver behind this connection.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Current state.
    pub fn state(&self) -> ReadyState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ReadyState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ReadyState) -> bool {
        let mut moved = false;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                debug!(driver = self.driver.name(), from = %current, to = %next, "connection state change");
                *current = next;
                moved = true;
            }
            moved
        });
        moved
    }

    /// Open the connection. A ready connection is left as is.
    pub async fn connect(&self) -> Result<()> {
        if self.state() == ReadyState::Ready {
            return Ok(());
        }
        if !self.transition(ReadyState::Connecting) {
            // Another caller is mid-connect; wait for its outcome.
            return self.wait_ready().await;
        }

        match self.driver.connect().await {
            Ok(()) => {
                self.transition(ReadyState::Ready);
                info!(driver = self.driver.name(), "connection ready");
                Ok(())
            }
            Err(err) => {
                self.transition(ReadyState::Error);
                warn!(driver = self.driver.name(), error = %err, "connection failed");
                Err(err.into())
            }
        }
    }

    /// Close the connection. Child tables sharing it stop working too.
    pub async fn close(&self, force: bool) -> Result<()> {
        if self.state() == ReadyState::Closed {
            return Ok(());
        }
        let outcome: std::result::Result<(), DriverError> = self.driver.close(force).await;
        self.transition(ReadyState::Closed);
        info!(driver = self.driver.name(), force, "connection closed");
        outcome.map_err(QuickDocError::from)
    }

    /// Fail with [`QuickDocError::NotReady`] unless the state is `Ready`.
    pub fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ReadyState::Ready => Ok(()),
            other => Err(QuickDocError::NotReady(other)),
        }
    }

    /// Wait until the connection settles; errors if it settles anywhere but
    /// `Ready`.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(|state| *state != ReadyState::Connecting)
            .await
            .map(|state| *state)
            .unwrap_or(ReadyState::Closed);
        match settled {
            ReadyState::Ready => Ok(()),
            other => Err(QuickDocError::NotReady(other)),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("driver", &self.driver.name())
            .field("state", &self.state())
            .finish()
    }
}
