//! Member status tracking
//!
//! Every member has its own [`StatusTracker`]. Events emitted by a member
//! update its tracker, after which the group status is recomputed by
//! severity. The group emits an event only when its derived status changes;
//! `ConfigurationChanged` from any member is forwarded as is.

use flagwork_core::{
    aggregate_status, ErrorCode, EventDetails, EventEmitter, EventHandler, EventHandlerError,
    FeatureProvider, ProviderEventType, ProviderStatus, SharedEventHandler, StatusTracker,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

/// A registered member of a group
pub(crate) struct Member {
    pub(crate) name: String,
    pub(crate) provider: Arc<dyn FeatureProvider>,
    pub(crate) tracker: StatusTracker,
}

impl Member {
    pub(crate) fn new(name: String, provider: Arc<dyn FeatureProvider>) -> Self {
        let tracker = StatusTracker::new(name.clone());
        Self {
            name,
            provider,
            tracker,
        }
    }
}

/// State shared between a group and the handlers it registers on members
pub(crate) struct GroupState {
    pub(crate) name: String,
    pub(crate) members: Vec<Member>,
    pub(crate) events: EventEmitter,
    status: Mutex<ProviderStatus>,
    forwarders: Mutex<Vec<(usize, ProviderEventType, SharedEventHandler)>>,
}

impl GroupState {
    pub(crate) fn new(name: String, members: Vec<Member>) -> Arc<Self> {
        let state = Arc::new(Self {
            name,
            members,
            events: EventEmitter::new(),
            status: Mutex::new(ProviderStatus::NotReady),
            forwarders: Mutex::new(Vec::new()),
        });
        state.attach();
        state
    }

    pub(crate) fn status(&self) -> ProviderStatus {
        *self.status.lock()
    }

    /// Recompute the group status from member statuses.
    ///
    /// Returns the new status when it changed. With `announce` set, the
    /// change is also emitted, carrying the triggering member's details.
    pub(crate) fn refresh(&self, announce: Option<&EventDetails>) -> Option<ProviderStatus> {
        let next = aggregate_status(self.members.iter().map(|m| m.tracker.status()));
        {
            let mut current = self.status.lock();
            if *current == next {
                return None;
            }
            *current = next;
        }
        debug!(provider = %self.name, status = %next, "Group status changed");

        if let Some(source) = announce
            && let Some(event) = ProviderEventType::for_status(next)
        {
            let mut details = source.clone();
            details.provider_name = self.name.clone();
            if next == ProviderStatus::Fatal {
                details.error_code = Some(ErrorCode::ProviderFatal);
            }
            self.events.emit(event, &details);
        }
        Some(next)
    }

    fn attach(self: &Arc<Self>) {
        let mut forwarders = self.forwarders.lock();
        for (index, member) in self.members.iter().enumerate() {
            let Some(events) = member.provider.events() else {
                continue;
            };
            for event in ProviderEventType::ALL {
                let handler: SharedEventHandler = Arc::new(MemberEventForwarder {
                    state: Arc::downgrade(self),
                    index,
                    event,
                });
                events.add_handler(event, handler.clone());
                forwarders.push((index, event, handler));
            }
        }
    }

    /// Stop listening to member events
    pub(crate) fn detach(&self) {
        let forwarders = std::mem::take(&mut *self.forwarders.lock());
        for (index, event, handler) in forwarders {
            if let Some(events) = self.members[index].provider.events() {
                events.remove_handler(event, &handler);
            }
        }
    }
}

struct MemberEventForwarder {
    state: Weak<GroupState>,
    index: usize,
    event: ProviderEventType,
}

impl EventHandler for MemberEventForwarder {
    fn handle(&self, details: &EventDetails) -> Result<(), EventHandlerError> {
        let Some(state) = self.state.upgrade() else {
            return Ok(());
        };
        let Some(member) = state.members.get(self.index) else {
            return Ok(());
        };

        if self.event == ProviderEventType::ConfigurationChanged {
            let mut forwarded = details.clone();
            forwarded.provider_name = state.name.clone();
            state.events.emit(self.event, &forwarded);
            return Ok(());
        }

        member.tracker.apply(self.event, details);
        state.refresh(Some(details));
        Ok(())
    }
}
