//! Registration handshake state

use crate::{Error, Result};
use tokio::sync::watch;
use tracing::debug;

/// Where we are in the relay registration handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Transport not open, or closed again
    Unregistered,
    /// Registration sent, acknowledgment pending
    Registering,
    /// Relay acknowledged; peer signaling may flow
    Registered,
}

/// Shared, observable registration state
pub struct Registration {
    tx: watch::Sender<RegistrationState>,
}

impl Registration {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RegistrationState::Unregistered);
        Self { tx }
    }

    pub fn state(&self) -> RegistrationState {
        *self.tx.borrow()
    }

    pub fn is_registered(&self) -> bool {
        self.state() == RegistrationState::Registered
    }

    pub(crate) fn set(&self, state: RegistrationState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            debug!("Registration state: {:?} -> {:?}", previous, state);
        }
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<RegistrationState> {
        self.tx.subscribe()
    }

    /// Wait until the relay acknowledges our registration
    pub async fn wait_registered(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        rx.wait_for(|state| *state == RegistrationState::Registered)
            .await
            .map(|_| ())
            .map_err(|_| Error::TransportUnavailable("registration watch closed".to_string()))
    }
}

impl Default for Registration {
    fn default() -> Self {
        Self::new()
    }
}
