use super::CanonicalId;
use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A payment request as created with the gateway. Written once, never updated.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Order {
    /// Collect request id assigned by the gateway.
    #[serde(rename = "_id")]
    pub id: CanonicalId,
    pub school_id: CanonicalId,
    pub trustee_id: CanonicalId,
    pub student_info: StudentInfo,
    pub gateway_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_order_id: Option<String>,
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: DateTime,
    #[serde(rename = "updatedAt", alias = "updated_at")]
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Validate)]
pub struct StudentInfo {
    #[validate(length(min = 1, message = "student_info.name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "student_info.id is required"))]
    pub id: String,
    #[validate(email(message = "student_info.email must be a valid email"))]
    pub email: String,
}

/// Input for `OrderStore::create_order`.
#[derive(Debug, Clone, Validate)]
pub struct NewOrder {
    pub id: CanonicalId,
    pub school_id: CanonicalId,
    pub trustee_id: CanonicalId,
    #[validate(nested)]
    pub student_info: StudentInfo,
    #[validate(length(min = 1, message = "gateway_name is required"))]
    pub gateway_name: String,
    pub custom_order_id: Option<String>,
}

impl NewOrder {
    pub fn into_order(self, now: DateTime) -> Order {
        Order {
            id: self.id,
            school_id: self.school_id,
            trustee_id: self.trustee_id,
            student_info: self.student_info,
            gateway_name: self.gateway_name,
            custom_order_id: self.custom_order_id,
            created_at: now,
            updated_at: now,
        }
    }
}
