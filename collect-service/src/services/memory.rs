//! Process-local backend. Used by the test suite and by `STORE_BACKEND=memory`.

use crate::error::{PaymentError, Result};
use crate::models::{CanonicalId, NewOrder, Order, OrderStatus, StatusUpdate};
use crate::services::query::{TransactionPage, TransactionQuery};
use crate::services::store::{OrderStore, PaymentStore, StatusStore, TransactionView};
use async_trait::async_trait;
use mongodb::bson::DateTime;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use validator::Validate;

#[derive(Default)]
struct Inner {
    orders: Vec<Order>,
    statuses: HashMap<CanonicalId, OrderStatus>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order(&self, order: NewOrder) -> Result<Order> {
        order
            .validate()
            .map_err(|e| PaymentError::validation(e.to_string()))?;

        let mut inner = self.inner.write().await;
        if inner.orders.iter().any(|o| o.id == order.id) {
            return Err(PaymentError::Duplicate(order.id.to_string()));
        }
        let order = order.into_order(DateTime::now());
        inner.orders.push(order.clone());
        Ok(order)
    }

    async fn find_order(&self, id: &CanonicalId) -> Result<Option<Order>> {
        let inner = self.inner.read().await;
        Ok(inner.orders.iter().find(|o| &o.id == id).cloned())
    }

    async fn discard_order(&self, id: &CanonicalId) -> Result<()> {
        self.inner.write().await.orders.retain(|o| &o.id != id);
        Ok(())
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn seed_pending(&self, collect_id: &CanonicalId, order_amount: f64) -> Result<OrderStatus> {
        let mut inner = self.inner.write().await;
        let status = inner
            .statuses
            .entry(collect_id.clone())
            .or_insert_with(|| {
                OrderStatus::pending_seed(collect_id.clone(), order_amount, DateTime::now())
            });
        Ok(status.clone())
    }

    async fn upsert(&self, collect_id: &CanonicalId, update: &StatusUpdate) -> Result<OrderStatus> {
        let now = DateTime::now();
        let mut inner = self.inner.write().await;
        let status = match inner.statuses.get_mut(collect_id) {
            Some(existing) => {
                update.apply_to(existing, now);
                existing.clone()
            }
            None => {
                let status = OrderStatus::from_update(collect_id.clone(), update, now);
                inner.statuses.insert(collect_id.clone(), status.clone());
                status
            }
        };
        Ok(status)
    }

    async fn find_by_collect_id(&self, collect_id: &CanonicalId) -> Result<Option<OrderStatus>> {
        Ok(self.inner.read().await.statuses.get(collect_id).cloned())
    }
}

#[async_trait]
impl TransactionView for MemoryStore {
    async fn query_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage> {
        let inner = self.inner.read().await;
        let statuses: Vec<OrderStatus> = inner.statuses.values().cloned().collect();
        Ok(query.evaluate(&inner.orders, &statuses))
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
