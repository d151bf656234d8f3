//! Event payloads for completed resource mutations.
//!
//! The event bridge itself (subscriber management, delivery ordering) lives
//! outside this core; we only produce payloads. Events are emitted after a
//! mutation has fully applied, never mid-update, and sends are best-effort
//! fire-and-forget.

use crossbeam::channel::Sender;
use uuid::Uuid;

/// Events describing completed changes to the resource pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    /// A file or group entered the pool
    ResourceImported { id: Uuid },

    /// A field-level setter completed
    ResourceUpdated { id: Uuid },

    /// A record was soft-deleted
    ResourceRemoved { id: Uuid },

    /// A file joined a group (and left its previous group, if any)
    FileAddedToGroup { file_id: Uuid, group_id: Uuid },

    /// A file left its group
    FileRemovedFromGroup { file_id: Uuid, group_id: Uuid },

    /// Managed fields were re-derived for every file managed by the source
    ManagedFieldsPropagated { source_id: Uuid, targets: usize },

    /// An episode environment payload was assembled
    EnvironmentResolved { episode_id: Uuid },
}

/// Event sender wrapper for the resource pool.
///
/// The project holds this sender to notify the external bridge when state
/// changes. The bridge's delivery and failure behavior are outside this
/// core's control, so send errors are ignored.
#[derive(Clone, Debug)]
pub struct ResourceEventSender {
    sender: Option<Sender<ResourceEvent>>,
}

impl ResourceEventSender {
    /// Create event sender (connected to channel)
    pub fn new(sender: Sender<ResourceEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Create dummy sender (for tests or when events not needed)
    pub fn dummy() -> Self {
        Self { sender: None }
    }

    /// Emit event (silent if no receiver)
    pub fn emit(&self, event: ResourceEvent) {
        if let Some(ref tx) = self.sender {
            let _ = tx.send(event); // Ignore send errors (receiver might be dropped)
        }
    }
}

impl Default for ResourceEventSender {
    fn default() -> Self {
        Self::dummy()
    }
}
