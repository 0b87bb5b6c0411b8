//! Unit of Work
//!
//! Stages every write of one request and flushes them as a single
//! [`Store::transact`] call. Domain events are buffered alongside and
//! published only after the transaction committed.
//!
//! A unit of work that is dropped while still begun rolls itself back, so a
//! `?` early return or an unwinding panic in a handler never leaves staged
//! writes behind.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::events::{DomainEvent, EventPublisher, GraphEvent};
use crate::error::{Error, Result};
use crate::infrastructure::repository::{CategoryRepository, EdgeRepository, NodeRepository};
use crate::storage::store::{Operation, Store};

use super::context::RequestContext;

/// Lifecycle of a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    Created,
    Begun,
    Committed,
    RolledBack,
}

/// Transaction scope of one request
pub struct UnitOfWork {
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
    state: UnitOfWorkState,
    operations: Vec<Operation>,
    events: Vec<GraphEvent>,
}

impl UnitOfWork {
    pub fn new(store: Arc<dyn Store>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            state: UnitOfWorkState::Created,
            operations: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Open the transaction scope
    pub fn begin(&mut self, ctx: &RequestContext) -> Result<()> {
        if self.state == UnitOfWorkState::Begun {
            return Err(Error::internal("unit of work already begun"));
        }
        ctx.check("begin")?;
        self.operations.clear();
        self.events.clear();
        self.state = UnitOfWorkState::Begun;
        Ok(())
    }

    pub fn state(&self) -> UnitOfWorkState {
        self.state
    }

    /// Number of staged store operations
    pub fn staged(&self) -> usize {
        self.operations.len()
    }

    /// Buffered, not yet published events
    pub fn pending_events(&self) -> &[GraphEvent] {
        &self.events
    }

    // ========== Repository handles ==========

    pub fn nodes(&mut self) -> NodeRepository<'_> {
        NodeRepository::new(&*self.store, &mut self.operations)
    }

    pub fn edges(&mut self) -> EdgeRepository<'_> {
        EdgeRepository::new(&*self.store, &mut self.operations)
    }

    pub fn categories(&mut self) -> CategoryRepository<'_> {
        CategoryRepository::new(&*self.store, &mut self.operations)
    }

    // ========== Buffers ==========

    pub fn publish_event(&mut self, event: GraphEvent) {
        self.events.push(event);
    }

    pub fn publish_events(&mut self, events: impl IntoIterator<Item = GraphEvent>) {
        self.events.extend(events);
    }

    /// Add an idempotency record put to the transaction
    pub fn stage_idempotency(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    // ========== Completion ==========

    /// Flush staged operations atomically, then publish buffered events
    ///
    /// Any failure before the transaction succeeds rolls the unit back.
    /// Publish failures after the commit are logged and dropped.
    pub async fn commit(&mut self, ctx: &RequestContext) -> Result<()> {
        if self.state != UnitOfWorkState::Begun {
            return Err(Error::internal(format!(
                "cannot commit a unit of work in state {:?}",
                self.state
            )));
        }
        if let Err(e) = ctx.check("commit") {
            self.rollback();
            return Err(e);
        }

        let operations = std::mem::take(&mut self.operations);
        let staged = operations.len();
        if !operations.is_empty() {
            let store = self.store.clone();
            if let Err(e) = ctx.run("commit", store.transact(operations)).await {
                self.rollback();
                return Err(e);
            }
        }
        self.state = UnitOfWorkState::Committed;
        debug!(request_id = %ctx.request_id(), operations = staged, "Unit of work committed");

        let events = std::mem::take(&mut self.events);
        for event in &events {
            if let Err(e) = self.publisher.publish(event).await {
                warn!(
                    event_type = event.event_type(),
                    aggregate_id = %event.aggregate_id(),
                    error = %e,
                    "Failed to publish event after commit"
                );
            }
        }
        Ok(())
    }

    /// Discard staged operations and events; safe to call repeatedly
    pub fn rollback(&mut self) {
        if self.state == UnitOfWorkState::Begun {
            debug!(
                operations = self.operations.len(),
                events = self.events.len(),
                "Unit of work rolled back"
            );
            self.state = UnitOfWorkState::RolledBack;
        }
        self.operations.clear();
        self.events.clear();
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.state == UnitOfWorkState::Begun {
            self.rollback();
        }
    }
}
