use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use validator::Validate;

use crate::{
    dtos::{CreatePaymentRequest, CreatePaymentResponse, OrderStatusResponse, WebhookAck},
    error::PaymentError,
    models::CanonicalId,
    services::{payments::PaymentRequest, reconciler::WebhookPayload},
    startup::AppState,
};

fn bad_body(rejection: JsonRejection) -> AppError {
    AppError::BadRequest(anyhow::anyhow!(rejection.body_text()))
}

/// Create a collect request with the gateway and record the order.
pub async fn create_payment(
    State(state): State<AppState>,
    payload: Result<Json<CreatePaymentRequest>, JsonRejection>,
) -> Result<Json<CreatePaymentResponse>, AppError> {
    let Json(payload) = payload.map_err(bad_body)?;
    payload.validate()?;

    let request = PaymentRequest {
        trustee_id: CanonicalId::parse(&payload.trustee_id)?,
        student_info: payload.student_info,
        gateway_name: payload.gateway_name,
        amount: payload.amount,
        callback_url: payload.callback_url,
        custom_order_id: payload.custom_order_id.filter(|id| !id.is_empty()),
    };

    let created = state.payments.create_payment(request).await?;

    Ok(Json(CreatePaymentResponse {
        message: "Payment link created".to_string(),
        collect_id: created.collect_id.to_string(),
        payment_url: created.payment_url,
    }))
}

/// Gateway status notification.
pub async fn webhook(
    State(state): State<AppState>,
    payload: Result<Json<WebhookPayload>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => return bad_body(rejection).into_response(),
    };

    match state.reconciler.reconcile(payload).await {
        Ok(outcome) => {
            tracing::debug!(outcome = outcome.as_str(), "Webhook acknowledged");
            Json(WebhookAck::processed()).into_response()
        }
        Err(e @ (PaymentError::Validation(_) | PaymentError::NotFound(_))) => {
            AppError::from(e).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Webhook processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Webhook failed" })),
            )
                .into_response()
        }
    }
}

pub async fn transaction_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderStatusResponse>, AppError> {
    let order_id = CanonicalId::parse(&order_id)?;
    let status = state.payments.transaction_status(&order_id).await?;
    Ok(Json(OrderStatusResponse::from(status)))
}
