use crate::error::{PaymentError, Result};
use crate::models::{CanonicalId, NewOrder, OrderStatus, StudentInfo};
use crate::services::gateway::{CollectGateway, CollectRequest};
use crate::services::metrics::record_payment_created;
use crate::services::store::PaymentStore;
use std::sync::Arc;

/// Input for a new payment link, already validated at the HTTP boundary.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub trustee_id: CanonicalId,
    pub student_info: StudentInfo,
    pub gateway_name: String,
    pub amount: f64,
    pub callback_url: String,
    pub custom_order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedPayment {
    pub collect_id: CanonicalId,
    pub payment_url: String,
}

/// Creates collect requests with the gateway and records the resulting order.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn CollectGateway>,
    school_id: CanonicalId,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn CollectGateway>,
        school_id: CanonicalId,
    ) -> Self {
        Self {
            store,
            gateway,
            school_id,
        }
    }

    pub fn school_id(&self) -> &CanonicalId {
        &self.school_id
    }

    /// Order and PENDING status are written as a unit: if seeding fails the
    /// order is removed again.
    #[tracing::instrument(skip(self, request), fields(amount = request.amount, gateway = %request.gateway_name))]
    pub async fn create_payment(&self, request: PaymentRequest) -> Result<CreatedPayment> {
        let collect = self
            .gateway
            .create_collect_request(CollectRequest {
                amount: request.amount,
                callback_url: request.callback_url,
            })
            .await
            .inspect_err(|_| record_payment_created("gateway_error"))?;

        let collect_id = CanonicalId::parse(&collect.collect_request_id).map_err(|_| {
            PaymentError::Upstream("gateway returned an empty collect_request_id".to_string())
        })?;

        let order = self
            .store
            .create_order(NewOrder {
                id: collect_id,
                school_id: self.school_id.clone(),
                trustee_id: request.trustee_id,
                student_info: request.student_info,
                gateway_name: request.gateway_name,
                custom_order_id: request.custom_order_id,
            })
            .await?;

        if let Err(e) = self.store.seed_pending(&order.id, request.amount).await {
            tracing::error!(collect_id = %order.id, error = %e, "Failed to seed status, discarding order");
            if let Err(discard) = self.store.discard_order(&order.id).await {
                tracing::error!(collect_id = %order.id, error = %discard, "Failed to discard order");
            }
            return Err(e);
        }

        record_payment_created("created");
        tracing::info!(
            collect_id = %order.id,
            school_id = %order.school_id,
            amount = request.amount,
            "Payment link created"
        );

        Ok(CreatedPayment {
            collect_id: order.id,
            payment_url: collect.payment_url,
        })
    }

    /// Current status of an order; the PENDING seed when no notification arrived yet.
    pub async fn transaction_status(&self, order_id: &CanonicalId) -> Result<OrderStatus> {
        self.store
            .find_by_collect_id(order_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("Transaction not found"))
    }
}
