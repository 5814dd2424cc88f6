//! Provider status tracking
//!
//! Each registered provider owns a [`StatusTracker`], a small state machine
//! over [`ProviderStatus`] driven by initialization outcomes and by the events
//! the provider emits. `Fatal` is terminal: once reached, status-changing
//! events are ignored until the provider is replaced.

use crate::error::{ErrorCode, GuardError};
use crate::event::{EventDetails, ProviderEventType};
use std::fmt;
use tokio::sync::watch;
use tracing::warn;

/// Lifecycle status of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderStatus {
    NotReady,
    Ready,
    Stale,
    Error,
    Fatal,
}

impl ProviderStatus {
    /// Severity used to derive an aggregate status; higher wins
    pub fn severity(&self) -> u8 {
        match self {
            ProviderStatus::Ready => 0,
            ProviderStatus::Stale => 1,
            ProviderStatus::Error => 2,
            ProviderStatus::NotReady => 3,
            ProviderStatus::Fatal => 4,
        }
    }

    /// Whether evaluations and tracking may be routed to the provider
    pub fn is_usable(&self) -> bool {
        !matches!(self, ProviderStatus::NotReady | ProviderStatus::Fatal)
    }

    /// Status after an event, or `None` when the event does not change status
    pub fn after_event(event: ProviderEventType, details: &EventDetails) -> Option<Self> {
        match event {
            ProviderEventType::Ready | ProviderEventType::ContextChanged => {
                Some(ProviderStatus::Ready)
            }
            ProviderEventType::Stale => Some(ProviderStatus::Stale),
            ProviderEventType::Error => {
                if details.error_code == Some(ErrorCode::ProviderFatal) {
                    Some(ProviderStatus::Fatal)
                } else {
                    Some(ProviderStatus::Error)
                }
            }
            ProviderEventType::ConfigurationChanged => None,
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderStatus::NotReady => "NOT_READY",
            ProviderStatus::Ready => "READY",
            ProviderStatus::Stale => "STALE",
            ProviderStatus::Error => "ERROR",
            ProviderStatus::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// Most severe status among members; `NotReady` for an empty group.
///
/// Ranking: `Fatal > NotReady > Error > Stale > Ready`.
pub fn aggregate_status<I>(statuses: I) -> ProviderStatus
where
    I: IntoIterator<Item = ProviderStatus>,
{
    statuses
        .into_iter()
        .max_by_key(|s| s.severity())
        .unwrap_or(ProviderStatus::NotReady)
}

/// Status state machine for one provider registration
#[derive(Debug)]
pub struct StatusTracker {
    name: String,
    status: watch::Sender<ProviderStatus>,
}

impl StatusTracker {
    pub fn new(name: impl Into<String>) -> Self {
        let (status, _) = watch::channel(ProviderStatus::NotReady);
        Self {
            name: name.into(),
            status,
        }
    }

    pub fn status(&self) -> ProviderStatus {
        *self.status.borrow()
    }

    /// Force a status; returns whether it changed.
    ///
    /// Leaving `Fatal` is refused.
    pub fn set(&self, next: ProviderStatus) -> bool {
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if *current == ProviderStatus::Fatal {
                warn!(
                    provider = %self.name,
                    requested = %next,
                    "Ignoring status change for provider in fatal state"
                );
                return false;
            }
            *current = next;
            true
        })
    }

    /// Apply an emitted event; returns the new status if it changed
    pub fn apply(&self, event: ProviderEventType, details: &EventDetails) -> Option<ProviderStatus> {
        let next = ProviderStatus::after_event(event, details)?;
        self.set(next).then_some(next)
    }

    /// Wait until the status leaves `NotReady`
    pub async fn settled(&self) -> Result<ProviderStatus, GuardError> {
        let mut rx = self.status.subscribe();
        let status = rx
            .wait_for(|s| *s != ProviderStatus::NotReady)
            .await
            .map_err(|_| GuardError::Cancelled)?;
        Ok(*status)
    }

    pub fn subscribe(&self) -> watch::Receiver<ProviderStatus> {
        self.status.subscribe()
    }
}
