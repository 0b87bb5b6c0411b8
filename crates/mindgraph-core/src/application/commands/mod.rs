//! Write side
//!
//! Each handler method runs one request through the same steps: validate,
//! check idempotency (creates only), begin a unit of work, load, mutate,
//! stage, commit, publish, invalidate the query cache. Errors carry the name
//! of the step that failed.

mod category;
mod edge;
mod node;

pub use category::{CategoryCommandHandler, CreateCategoryCommand, UpdateCategoryCommand};
pub use edge::{BulkConnectResult, EdgeCommandHandler};
pub use node::{
    BulkCreateResult, BulkDeleteResult, BulkItemFailure, CreateNodeCommand, CreateNodeResult,
    DeleteNodeResult, NodeCommandHandler, UpdateNodeCommand,
};

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::info;

use crate::config::{Config, LimitsConfig};
use crate::domain::analysis::ConnectionAnalyzer;
use crate::domain::events::EventPublisher;
use crate::domain::values::UserId;
use crate::error::{Error, Result, ResultExt};
use crate::infrastructure::cache::QueryCache;
use crate::infrastructure::idempotency::{IdempotencyKey, IdempotencyStore, StoreIdempotencyStore};
use crate::storage::store::Store;

use super::retry::RetryPolicy;
use super::unit_of_work::UnitOfWork;

/// Collaborators shared by every command handler
#[derive(Clone)]
pub struct CommandServices {
    pub store: Arc<dyn Store>,
    pub publisher: Arc<dyn EventPublisher>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub cache: Arc<QueryCache>,
    pub analyzer: ConnectionAnalyzer,
    pub retry: RetryPolicy,
    pub limits: LimitsConfig,
}

impl CommandServices {
    /// Wire the write side from configuration
    ///
    /// `cache` should be the same instance the query services read from.
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn EventPublisher>,
        cache: Arc<QueryCache>,
        config: &Config,
    ) -> Self {
        let idempotency = Arc::new(StoreIdempotencyStore::new(store.clone(), &config.idempotency));
        Self {
            store,
            publisher,
            idempotency,
            cache,
            analyzer: ConnectionAnalyzer::new(config.analyzer.clone()),
            retry: RetryPolicy::from_config(&config.retry),
            limits: config.limits.clone(),
        }
    }

    pub fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::new(self.store.clone(), self.publisher.clone())
    }

    /// Drop cached reads of `user_id` after a commit
    pub(crate) fn invalidate(&self, user_id: &UserId) {
        self.cache.invalidate_user(user_id);
    }

    pub(crate) fn check_batch_size(&self, len: usize) -> Result<()> {
        if len > self.limits.max_bulk_items {
            return Err(Error::validation(
                "items",
                format!(
                    "at most {} items per batch, got {}",
                    self.limits.max_bulk_items, len
                ),
            ));
        }
        Ok(())
    }

    /// Stored result of an earlier identical request, if any
    pub(crate) async fn replay<T: DeserializeOwned>(
        &self,
        key: Option<&IdempotencyKey>,
    ) -> Result<Option<T>> {
        let Some(key) = key else {
            return Ok(None);
        };
        let Some(stored) = self.idempotency.get(key).await.context("idempotency check")? else {
            return Ok(None);
        };
        info!(
            user_id = %key.user_id,
            operation = %key.operation,
            "Replaying stored result"
        );
        Ok(Some(serde_json::from_value(stored)?))
    }
}
