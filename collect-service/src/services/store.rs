//! Storage contracts for orders, their statuses and the joined transaction view.
//!
//! Two backends implement them: [`MongoStore`](super::MongoStore) for
//! deployments and [`MemoryStore`](super::MemoryStore) for tests and local runs.
//! Both must agree on identifier tolerance: every lookup matches a record
//! whether its id was stored as a structured `ObjectId` or as text.

use crate::error::Result;
use crate::models::{CanonicalId, NewOrder, Order, OrderStatus, StatusUpdate};
use crate::services::query::{TransactionPage, TransactionQuery};
use async_trait::async_trait;

/// Append-only store of orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fails with `Validation` on missing fields and `Duplicate` when the id exists.
    async fn create_order(&self, order: NewOrder) -> Result<Order>;

    async fn find_order(&self, id: &CanonicalId) -> Result<Option<Order>>;

    /// Remove an order whose creation could not be completed.
    async fn discard_order(&self, id: &CanonicalId) -> Result<()>;
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Write the initial PENDING record for a freshly created order.
    async fn seed_pending(&self, collect_id: &CanonicalId, order_amount: f64)
        -> Result<OrderStatus>;

    /// Replace every mutable field of the record for `collect_id`, creating it
    /// when absent. Atomic per record; last writer wins.
    async fn upsert(&self, collect_id: &CanonicalId, update: &StatusUpdate) -> Result<OrderStatus>;

    async fn find_by_collect_id(&self, collect_id: &CanonicalId) -> Result<Option<OrderStatus>>;
}

/// Left join of orders with their status, filtered, sorted and paginated.
#[async_trait]
pub trait TransactionView: Send + Sync {
    async fn query_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage>;
}

/// Everything the HTTP layer needs from a backend.
#[async_trait]
pub trait PaymentStore: OrderStore + StatusStore + TransactionView {
    /// Fails when the backend can not serve requests right now.
    async fn ping(&self) -> Result<()>;
}
