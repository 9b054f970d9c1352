use super::CanonicalId;
use crate::error::PaymentError;
use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Spellings other writers may have stored for this status.
    pub fn stored_forms(&self) -> [String; 2] {
        [self.as_str().to_string(), self.as_str().to_ascii_lowercase()]
    }

    /// No further transition is defined once a payment succeeded or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(PaymentError::validation(format!(
                "unknown payment status '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Latest known payment state of an order. At most one per `collect_id`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OrderStatus {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none", default)]
    pub id: Option<ObjectId>,
    pub collect_id: CanonicalId,
    pub order_amount: f64,
    pub transaction_amount: f64,
    pub payment_mode: String,
    pub payment_details: String,
    pub bank_reference: String,
    pub payment_message: String,
    pub status: PaymentStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub payment_time: DateTime,
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: DateTime,
    #[serde(rename = "updatedAt", alias = "updated_at")]
    pub updated_at: DateTime,
}

impl OrderStatus {
    /// The record written alongside a new order, before any webhook arrives.
    pub fn pending_seed(collect_id: CanonicalId, order_amount: f64, now: DateTime) -> Self {
        Self {
            id: None,
            collect_id,
            order_amount,
            transaction_amount: 0.0,
            payment_mode: "PENDING".to_string(),
            payment_details: "Payment not completed yet".to_string(),
            bank_reference: "N/A".to_string(),
            payment_message: "Awaiting payment".to_string(),
            status: PaymentStatus::Pending,
            error_message: None,
            payment_time: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a fresh record from an update, for stores creating on upsert.
    pub fn from_update(collect_id: CanonicalId, update: &StatusUpdate, now: DateTime) -> Self {
        let mut status = Self::pending_seed(collect_id, update.order_amount, now);
        update.apply_to(&mut status, now);
        status
    }

    /// Whether writing `update` would leave every mutable field as it is.
    pub fn already_reflects(&self, update: &StatusUpdate) -> bool {
        self.order_amount == update.order_amount
            && self.transaction_amount == update.transaction_amount
            && self.payment_mode == update.payment_mode
            && self.payment_details == update.payment_details
            && self.bank_reference == update.bank_reference
            && self.payment_message == update.payment_message
            && self.status == update.status
            && self.error_message == update.error_message
            && update
                .payment_time
                .is_none_or(|payment_time| payment_time == self.payment_time)
    }
}

/// Full replacement of the mutable fields of an [`OrderStatus`].
///
/// A missing `payment_time` keeps the stored value; a record created by the
/// update gets the write time instead.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub order_amount: f64,
    pub transaction_amount: f64,
    pub payment_mode: String,
    pub payment_details: String,
    pub bank_reference: String,
    pub payment_message: String,
    pub status: PaymentStatus,
    pub error_message: Option<String>,
    pub payment_time: Option<DateTime>,
}

impl StatusUpdate {
    pub fn apply_to(&self, status: &mut OrderStatus, now: DateTime) {
        status.order_amount = self.order_amount;
        status.transaction_amount = self.transaction_amount;
        status.payment_mode = self.payment_mode.clone();
        status.payment_details = self.payment_details.clone();
        status.bank_reference = self.bank_reference.clone();
        status.payment_message = self.payment_message.clone();
        status.status = self.status;
        status.error_message = self.error_message.clone();
        if let Some(payment_time) = self.payment_time {
            status.payment_time = payment_time;
        }
        status.updated_at = now;
    }
}
