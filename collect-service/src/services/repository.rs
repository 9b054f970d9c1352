use crate::error::{PaymentError, Result};
use crate::models::{CanonicalId, NewOrder, Order, OrderStatus, StatusUpdate};
use crate::services::query::{TransactionPage, TransactionQuery};
use crate::services::store::{OrderStore, PaymentStore, StatusStore, TransactionView};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, DateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOneAndUpdateOptions, FindOneOptions, IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use validator::Validate;

pub const ORDER_COLLECTION: &str = "orders";
pub const STATUS_COLLECTION: &str = "orderstatuses";

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoStore {
    db: Database,
    orders: Collection<Order>,
    statuses: Collection<OrderStatus>,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            orders: db.collection(ORDER_COLLECTION),
            statuses: db.collection(STATUS_COLLECTION),
        }
    }

    /// Create the indexes the query engine and webhook path rely on.
    pub async fn init_indexes(&self) -> Result<()> {
        // Tenant listing filters on school before the join
        let school_index = IndexModel::builder()
            .keys(doc! { "school_id": 1 })
            .options(IndexOptions::builder().name("school_idx".to_string()).build())
            .build();

        let custom_order_index = IndexModel::builder()
            .keys(doc! { "custom_order_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("custom_order_idx".to_string())
                    .sparse(true)
                    .build(),
            )
            .build();

        self.orders
            .create_indexes([school_index, custom_order_index], None)
            .await?;

        // At most one status per order
        let collect_index = IndexModel::builder()
            .keys(doc! { "collect_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("collect_id_unique_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        let status_index = IndexModel::builder()
            .keys(doc! { "status": 1 })
            .options(IndexOptions::builder().name("status_idx".to_string()).build())
            .build();

        let payment_time_index = IndexModel::builder()
            .keys(doc! { "payment_time": -1 })
            .options(
                IndexOptions::builder()
                    .name("payment_time_idx".to_string())
                    .build(),
            )
            .build();

        self.statuses
            .create_indexes([collect_index, status_index, payment_time_index], None)
            .await?;

        tracing::info!("Collect service indexes initialized");
        Ok(())
    }

    fn id_filter(field: &str, id: &CanonicalId) -> Document {
        let mut filter = Document::new();
        filter.insert(field, doc! { "$in": id.lookup_candidates() });
        filter
    }

    async fn upsert_once(
        &self,
        collect_id: &CanonicalId,
        update: &StatusUpdate,
    ) -> mongodb::error::Result<Option<OrderStatus>> {
        let now = DateTime::now();

        let mut set = doc! {
            "order_amount": update.order_amount,
            "transaction_amount": update.transaction_amount,
            "payment_mode": update.payment_mode.as_str(),
            "payment_details": update.payment_details.as_str(),
            "bank_reference": update.bank_reference.as_str(),
            "payment_message": update.payment_message.as_str(),
            "status": update.status.as_str(),
            "error_message": update.error_message.clone(),
            "updatedAt": now,
        };
        let mut set_on_insert = doc! {
            "collect_id": collect_id.as_str(),
            "createdAt": now,
        };
        match update.payment_time {
            Some(payment_time) => {
                set.insert("payment_time", payment_time);
            }
            None => {
                set_on_insert.insert("payment_time", now);
            }
        }

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .sort(doc! { "updatedAt": -1 })
            .build();

        self.statuses
            .find_one_and_update(
                Self::id_filter("collect_id", collect_id),
                doc! { "$set": set, "$setOnInsert": set_on_insert },
                options,
            )
            .await
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match *err.kind {
        ErrorKind::Write(WriteFailure::WriteError(ref we)) => we.code == DUPLICATE_KEY,
        ErrorKind::Command(ref ce) => ce.code == DUPLICATE_KEY,
        _ => false,
    }
}

#[async_trait]
impl OrderStore for MongoStore {
    async fn create_order(&self, order: NewOrder) -> Result<Order> {
        order
            .validate()
            .map_err(|e| PaymentError::validation(e.to_string()))?;

        let order = order.into_order(DateTime::now());
        match self.orders.insert_one(&order, None).await {
            Ok(_) => Ok(order),
            Err(e) if is_duplicate_key(&e) => Err(PaymentError::Duplicate(order.id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_order(&self, id: &CanonicalId) -> Result<Option<Order>> {
        let order = self
            .orders
            .find_one(Self::id_filter("_id", id), None)
            .await?;
        Ok(order)
    }

    async fn discard_order(&self, id: &CanonicalId) -> Result<()> {
        self.orders
            .delete_one(Self::id_filter("_id", id), None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for MongoStore {
    async fn seed_pending(
        &self,
        collect_id: &CanonicalId,
        order_amount: f64,
    ) -> Result<OrderStatus> {
        let mut seed =
            OrderStatus::pending_seed(collect_id.clone(), order_amount, DateTime::now());
        match self.statuses.insert_one(&seed, None).await {
            Ok(result) => {
                seed.id = result.inserted_id.as_object_id();
                Ok(seed)
            }
            // A notification got here first; keep what it wrote.
            Err(e) if is_duplicate_key(&e) => {
                self.find_by_collect_id(collect_id).await?.ok_or_else(|| {
                    PaymentError::Persistence(format!(
                        "status for {} vanished during seeding",
                        collect_id
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip(self, update), fields(collect_id = %collect_id, status = %update.status))]
    async fn upsert(&self, collect_id: &CanonicalId, update: &StatusUpdate) -> Result<OrderStatus> {
        // Concurrent upserts of a new record race on the unique index; the
        // loser retries once and then matches the winner's record.
        let status = match self.upsert_once(collect_id, update).await {
            Err(e) if is_duplicate_key(&e) => {
                tracing::debug!(collect_id = %collect_id, "Retrying status upsert after duplicate key");
                self.upsert_once(collect_id, update).await?
            }
            result => result?,
        };
        status.ok_or_else(|| {
            PaymentError::Persistence(format!("upsert of status {} returned nothing", collect_id))
        })
    }

    async fn find_by_collect_id(&self, collect_id: &CanonicalId) -> Result<Option<OrderStatus>> {
        let options = FindOneOptions::builder()
            .sort(doc! { "updatedAt": -1 })
            .build();
        let status = self
            .statuses
            .find_one(Self::id_filter("collect_id", collect_id), options)
            .await?;
        Ok(status)
    }
}

#[async_trait]
impl TransactionView for MongoStore {
    #[tracing::instrument(skip_all, fields(page = query.page.page, limit = query.page.limit))]
    async fn query_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage> {
        let cursor = self
            .orders
            .aggregate(query.to_pipeline(STATUS_COLLECTION), None)
            .await?;
        let results: Vec<Document> = cursor.try_collect().await?;
        query.read_page(results.into_iter().next())
    }
}

#[async_trait]
impl PaymentStore for MongoStore {
    async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }
}
