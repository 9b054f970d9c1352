//! Applies gateway status notifications to the status store.
//!
//! A delivery is validated into a [`StatusUpdate`] and compared with the stored
//! record. Identical replays are acknowledged without a write, so `updatedAt`
//! only moves when something actually changed. Two optional guards are
//! controlled by [`WebhookConfig`]: rejecting ids with no order behind them,
//! and ignoring notifications older than an already terminal status.

use crate::config::WebhookConfig;
use crate::error::{PaymentError, Result};
use crate::models::{CanonicalId, PaymentStatus, StatusUpdate};
use crate::services::metrics::record_webhook;
use crate::services::store::PaymentStore;
use chrono::{NaiveDateTime, TimeZone, Utc};
use mongodb::bson::DateTime;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebhookPayload {
    #[serde(default)]
    pub order_info: Option<OrderInfo>,
}

/// Fields reported by the gateway. Everything is optional on the wire.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct OrderInfo {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order_amount: Option<f64>,
    #[serde(default)]
    pub transaction_amount: Option<f64>,
    #[serde(default)]
    pub payment_mode: Option<String>,
    #[serde(default, alias = "payemnt_details")]
    pub payment_details: Option<String>,
    #[serde(default)]
    pub bank_reference: Option<String>,
    #[serde(default)]
    pub payment_message: Option<String>,
    #[serde(default, rename = "Payment_message")]
    pub payment_message_legacy: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub payment_time: Option<String>,
}

impl WebhookPayload {
    /// Validate the delivery into the target id and the fields to store.
    pub fn into_update(self) -> Result<(CanonicalId, StatusUpdate)> {
        let info = self
            .order_info
            .ok_or_else(|| PaymentError::validation("order_info.order_id missing"))?;

        let order_id = info
            .order_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PaymentError::validation("order_info.order_id missing"))?;
        let collect_id = CanonicalId::parse(order_id)?;

        let status: PaymentStatus = info
            .status
            .as_deref()
            .ok_or_else(|| PaymentError::validation("order_info.status missing"))?
            .parse()?;

        let payment_time = info
            .payment_time
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(parse_payment_time)
            .transpose()?;

        let update = StatusUpdate {
            order_amount: info.order_amount.unwrap_or(0.0),
            transaction_amount: info.transaction_amount.unwrap_or(0.0),
            payment_mode: info.payment_mode.unwrap_or_default(),
            payment_details: info.payment_details.unwrap_or_default(),
            bank_reference: info.bank_reference.unwrap_or_default(),
            payment_message: info
                .payment_message_legacy
                .or(info.payment_message)
                .unwrap_or_default(),
            status,
            error_message: info.error_message,
            payment_time,
        };

        Ok((collect_id, update))
    }
}

fn parse_payment_time(raw: &str) -> Result<DateTime> {
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(DateTime::from_chrono(ts.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|naive| DateTime::from_chrono(Utc.from_utc_datetime(&naive)))
        .map_err(|_| {
            PaymentError::validation(format!(
                "order_info.payment_time '{}' is not a valid timestamp",
                raw
            ))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The stored record was created or replaced.
    Applied,
    /// The stored record already matched; nothing was written.
    Unchanged,
    /// An older notification for a terminal status was dropped.
    IgnoredStale,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::IgnoredStale => "ignored_stale",
        }
    }
}

#[derive(Clone)]
pub struct WebhookReconciler {
    store: Arc<dyn PaymentStore>,
    config: WebhookConfig,
}

impl WebhookReconciler {
    pub fn new(store: Arc<dyn PaymentStore>, config: WebhookConfig) -> Self {
        Self { store, config }
    }

    pub async fn reconcile(&self, payload: WebhookPayload) -> Result<WebhookOutcome> {
        let result = self.apply(payload).await;
        let label = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(PaymentError::Validation(_)) => "invalid",
            Err(PaymentError::NotFound(_)) => "unknown_order",
            Err(_) => "failed",
        };
        record_webhook(label);
        result
    }

    #[tracing::instrument(skip_all)]
    async fn apply(&self, payload: WebhookPayload) -> Result<WebhookOutcome> {
        let (collect_id, update) = payload.into_update()?;

        if self.config.require_known_order && self.store.find_order(&collect_id).await?.is_none() {
            tracing::warn!(collect_id = %collect_id, "Webhook for unknown order rejected");
            return Err(PaymentError::not_found(format!(
                "Order {} not found",
                collect_id
            )));
        }

        if let Some(existing) = self.store.find_by_collect_id(&collect_id).await? {
            if existing.already_reflects(&update) {
                tracing::info!(collect_id = %collect_id, status = %update.status, "Duplicate webhook delivery");
                return Ok(WebhookOutcome::Unchanged);
            }

            let stale = update
                .payment_time
                .is_some_and(|incoming| incoming < existing.payment_time);
            if self.config.reject_stale && existing.status.is_terminal() && stale {
                tracing::warn!(
                    collect_id = %collect_id,
                    stored = %existing.status,
                    incoming = %update.status,
                    "Stale webhook ignored"
                );
                return Ok(WebhookOutcome::IgnoredStale);
            }
        }

        let stored = self.store.upsert(&collect_id, &update).await?;
        tracing::info!(
            collect_id = %collect_id,
            status = %stored.status,
            transaction_amount = stored.transaction_amount,
            "Webhook applied"
        );
        Ok(WebhookOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewOrder, StudentInfo};
    use crate::services::memory::MemoryStore;
    use crate::services::store::{OrderStore, StatusStore};
    use serde_json::json;

    fn payload(value: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(value).unwrap()
    }

    fn success(order_id: &str, payment_time: &str) -> WebhookPayload {
        payload(json!({
            "order_info": {
                "order_id": order_id,
                "order_amount": 2000,
                "transaction_amount": 2200,
                "payment_mode": "upi",
                "payment_details": "success@ybl",
                "bank_reference": "YESBNK222",
                "Payment_message": "payment success",
                "status": "success",
                "error_message": "NA",
                "payment_time": payment_time
            }
        }))
    }

    fn reconciler(store: &MemoryStore, config: WebhookConfig) -> WebhookReconciler {
        WebhookReconciler::new(Arc::new(store.clone()), config)
    }

    #[test]
    fn missing_order_id_is_a_validation_error() {
        for body in [json!({}), json!({ "order_info": {} }), json!({ "order_info": { "order_id": "" } })] {
            let err = payload(body).into_update().unwrap_err();
            assert_eq!(err.to_string(), "order_info.order_id missing");
        }
    }

    #[test]
    fn unknown_status_and_bad_time_are_rejected() {
        let bad_status = payload(json!({ "order_info": { "order_id": "o1", "status": "refunded" } }));
        assert!(matches!(bad_status.into_update(), Err(PaymentError::Validation(_))));

        let no_status = payload(json!({ "order_info": { "order_id": "o1" } }));
        assert!(matches!(no_status.into_update(), Err(PaymentError::Validation(_))));

        let bad_time = success("o1", "yesterday");
        assert!(matches!(bad_time.into_update(), Err(PaymentError::Validation(_))));
    }

    #[test]
    fn capitalised_payment_message_wins_and_defaults_apply() {
        let (_, update) = payload(json!({
            "order_info": {
                "order_id": "o1",
                "status": "FAILED",
                "payment_message": "lower",
                "Payment_message": "upper",
                "payment_time": "2025-04-23 08:14:21"
            }
        }))
        .into_update()
        .unwrap();

        assert_eq!(update.payment_message, "upper");
        assert_eq!(update.transaction_amount, 0.0);
        assert_eq!(update.payment_mode, "");
        assert_eq!(
            update.payment_time.unwrap().to_chrono().to_rfc3339(),
            "2025-04-23T08:14:21+00:00"
        );
    }

    #[test]
    fn gateway_spelling_of_payment_details_is_accepted() {
        let (_, update) = payload(json!({
            "order_info": {
                "order_id": "o1",
                "status": "SUCCESS",
                "payemnt_details": "success@ybl",
            }
        }))
        .into_update()
        .unwrap();

        assert_eq!(update.payment_details, "success@ybl");
        assert!(update.payment_time.is_none());
    }

    #[tokio::test]
    async fn replay_is_acknowledged_without_a_write() {
        let store = MemoryStore::new();
        let reconciler = reconciler(&store, WebhookConfig::default());
        let id = CanonicalId::parse("o1").unwrap();

        let first = reconciler
            .reconcile(success("o1", "2025-04-23T08:14:21Z"))
            .await
            .unwrap();
        let after_first = store.find_by_collect_id(&id).await.unwrap().unwrap();

        let second = reconciler
            .reconcile(success("o1", "2025-04-23T08:14:21Z"))
            .await
            .unwrap();
        let after_second = store.find_by_collect_id(&id).await.unwrap().unwrap();

        assert_eq!(first, WebhookOutcome::Applied);
        assert_eq!(second, WebhookOutcome::Unchanged);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn terminal_status_is_overwritten_by_default() {
        let store = MemoryStore::new();
        let reconciler = reconciler(&store, WebhookConfig::default());

        reconciler
            .reconcile(success("o1", "2025-04-23T08:14:21Z"))
            .await
            .unwrap();
        let mut older = success("o1", "2025-04-22T08:00:00Z");
        if let Some(info) = older.order_info.as_mut() {
            info.status = Some("PENDING".to_string());
        }
        let outcome = reconciler.reconcile(older).await.unwrap();

        assert_eq!(outcome, WebhookOutcome::Applied);
        let stored = store
            .find_by_collect_id(&CanonicalId::parse("o1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn stale_guard_keeps_terminal_status() {
        let store = MemoryStore::new();
        let config = WebhookConfig {
            reject_stale: true,
            ..WebhookConfig::default()
        };
        let reconciler = reconciler(&store, config);

        reconciler
            .reconcile(success("o1", "2025-04-23T08:14:21Z"))
            .await
            .unwrap();
        let mut older = success("o1", "2025-04-22T08:00:00Z");
        if let Some(info) = older.order_info.as_mut() {
            info.status = Some("FAILED".to_string());
        }

        assert_eq!(
            reconciler.reconcile(older).await.unwrap(),
            WebhookOutcome::IgnoredStale
        );
        let stored = store
            .find_by_collect_id(&CanonicalId::parse("o1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
    }

    #[tokio::test]
    async fn unknown_orders_are_accepted_unless_required() {
        let store = MemoryStore::new();

        let lenient = reconciler(&store, WebhookConfig::default());
        assert_eq!(
            lenient
                .reconcile(success("ghost", "2025-04-23T08:14:21Z"))
                .await
                .unwrap(),
            WebhookOutcome::Applied
        );

        let strict = reconciler(
            &store,
            WebhookConfig {
                require_known_order: true,
                ..WebhookConfig::default()
            },
        );
        let err = strict
            .reconcile(success("ghost-2", "2025-04-23T08:14:21Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));

        store
            .create_order(NewOrder {
                id: CanonicalId::parse("known").unwrap(),
                school_id: CanonicalId::parse("school").unwrap(),
                trustee_id: CanonicalId::parse("trustee").unwrap(),
                student_info: StudentInfo {
                    name: "Meera".to_string(),
                    id: "S-3".to_string(),
                    email: "meera@example.com".to_string(),
                },
                gateway_name: "Edviron".to_string(),
                custom_order_id: None,
            })
            .await
            .unwrap();
        assert!(strict
            .reconcile(success("known", "2025-04-23T08:14:21Z"))
            .await
            .is_ok());
    }
}
