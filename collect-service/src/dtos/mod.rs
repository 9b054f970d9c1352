use crate::models::{OrderStatus, StudentInfo};
use crate::services::query::{TransactionPage, TransactionRow};
use chrono::SecondsFormat;
use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use validator::Validate;

fn rfc3339(dt: DateTime) -> String {
    dt.to_chrono().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(length(min = 1, message = "trustee_id is required"))]
    pub trustee_id: String,
    #[validate(nested)]
    pub student_info: StudentInfo,
    #[validate(length(min = 1, message = "gateway_name is required"))]
    pub gateway_name: String,
    #[validate(range(exclusive_min = 0.0, message = "amount must be greater than zero"))]
    pub amount: f64,
    #[validate(url(message = "callback_url must be a valid URL"))]
    pub callback_url: String,
    #[serde(default)]
    pub custom_order_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePaymentResponse {
    pub message: String,
    pub collect_id: String,
    pub payment_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub message: String,
}

impl WebhookAck {
    pub fn processed() -> Self {
        Self {
            message: "Webhook processed".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderStatusResponse {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    pub collect_id: String,
    pub order_amount: f64,
    pub transaction_amount: f64,
    pub payment_mode: String,
    pub payment_details: String,
    pub bank_reference: String,
    pub payment_message: String,
    pub status: String,
    pub error_message: Option<String>,
    pub payment_time: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

impl From<OrderStatus> for OrderStatusResponse {
    fn from(status: OrderStatus) -> Self {
        Self {
            id: status.id.map(|oid| oid.to_hex()),
            collect_id: status.collect_id.to_string(),
            order_amount: status.order_amount,
            transaction_amount: status.transaction_amount,
            payment_mode: status.payment_mode,
            payment_details: status.payment_details,
            bank_reference: status.bank_reference,
            payment_message: status.payment_message,
            status: status.status.to_string(),
            error_message: status.error_message,
            payment_time: rfc3339(status.payment_time),
            created_at: rfc3339(status.created_at),
            updated_at: rfc3339(status.updated_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionRowResponse {
    pub collect_id: String,
    pub school_id: Option<String>,
    pub gateway: Option<String>,
    pub order_amount: Option<f64>,
    pub transaction_amount: Option<f64>,
    pub status: Option<String>,
    pub payment_time: Option<String>,
    pub status_info: Option<OrderStatusResponse>,
}

impl From<TransactionRow> for TransactionRowResponse {
    fn from(row: TransactionRow) -> Self {
        Self {
            collect_id: row.collect_id.to_string(),
            school_id: row.school_id.map(|id| id.to_string()),
            gateway: row.gateway,
            order_amount: row.order_amount,
            transaction_amount: row.transaction_amount,
            status: row.status.map(|s| s.to_string()),
            payment_time: row.payment_time.map(rfc3339),
            status_info: row.status_info.map(OrderStatusResponse::from),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionPageResponse {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    #[serde(rename = "totalPages")]
    pub total_pages: u64,
    pub data: Vec<TransactionRowResponse>,
}

impl From<TransactionPage> for TransactionPageResponse {
    fn from(page: TransactionPage) -> Self {
        Self {
            page: page.page,
            limit: page.limit,
            total: page.total,
            total_pages: page.total_pages,
            data: page.data.into_iter().map(Into::into).collect(),
        }
    }
}
