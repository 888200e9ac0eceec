//! Event handlers for the scheduler.
//!
//! This module contains event handlers that write lifecycle events to the
//! audit log in storage and forward events to other event buses.

use std::sync::Arc;

use crate::events::{Event, EventBus, EventHandler};
use crate::storage::Storage;

/// Event handler that appends an audit entry for every auditable event.
pub(crate) struct AuditTrail<S: Storage> {
    pub(crate) storage: Arc<S>,
}

#[async_trait::async_trait]
impl<S: Storage + 'static> EventHandler for AuditTrail<S> {
    async fn handle(&self, event: &Event) {
        let Some(entry) = event.to_audit() else {
            return;
        };
        if let Err(e) = self.storage.append_audit(entry).await {
            tracing::warn!(job_id = %event.job_id(), error = %e, "Failed to append audit entry");
        }
    }
}

/// Event handler that forwards events to another event bus.
pub(crate) struct EventForwarder {
    pub(crate) target: Arc<EventBus>,
}

#[async_trait::async_trait]
impl EventHandler for EventForwarder {
    async fn handle(&self, event: &Event) {
        self.target.emit(event.clone()).await;
    }
}
