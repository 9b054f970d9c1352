//! Joined order and status listings.

use axum::{
    extract::{Path, RawQuery, State},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::TransactionPageResponse,
    models::CanonicalId,
    services::query::TransactionQueryParams,
    startup::AppState,
};

pub async fn list_transactions(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<TransactionPageResponse>, AppError> {
    let query = TransactionQueryParams::from_query_string(query.as_deref())?.into_query(None)?;
    let page = state.store.query_transactions(&query).await?;
    Ok(Json(page.into()))
}

/// Same listing restricted to one school.
pub async fn list_school_transactions(
    State(state): State<AppState>,
    Path(school_id): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<TransactionPageResponse>, AppError> {
    let school_id = CanonicalId::parse(&school_id)?;
    tracing::debug!(school_id = %school_id, "Listing school transactions");

    let query = TransactionQueryParams::from_query_string(query.as_deref())?
        .into_query(Some(school_id))?;
    let page = state.store.query_transactions(&query).await?;
    Ok(Json(page.into()))
}
