mod config;
mod factory;
mod models;
mod postgres;
mod sqlite;

pub use config::{DatabaseConfig, DatabaseType};
pub use factory::create_store;
pub use models::*;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

/// Transactional store of contact records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContactStore: Send + Sync {
    // Initialize database schema
    async fn init(&self) -> crate::Result<()>;

    /// Create the contact keyed by `fields.email`, or update the existing one.
    async fn upsert(&self, fields: ContactFields, workflow_id: Option<String>) -> crate::Result<Contact>;

    async fn find(&self, criteria: &[Criterion]) -> crate::Result<Option<Contact>>;

    /// Merge `patch` into the first contact matching `criteria`.
    async fn update(
        &self,
        criteria: &[Criterion],
        patch: &Map<String, JsonValue>,
    ) -> crate::Result<Option<Contact>>;

    /// Delete every contact owned by a workflow, returning how many went.
    async fn delete_by_workflow(&self, workflow_id: &str) -> crate::Result<u64>;
}
