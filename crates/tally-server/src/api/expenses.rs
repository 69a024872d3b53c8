//! `/api/expenses` handlers.
//!
//! Create and update publish the stored expense to the owner's stream
//! connections after the write succeeds. Delete does not publish.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::{Value, json};
use tally_core::{Expense, ExpenseEvent};
use tracing::{debug, info};

use super::auth::AuthUser;
use super::errors::ApiError;
use crate::server::AppState;

/// `GET /api/expenses`
pub async fn list_expenses(
    AuthUser(owner_id): AuthUser,
    State(state): State<AppState>,
) -> Json<Vec<Expense>> {
    Json(state.store.list(&owner_id))
}

/// `GET /api/expenses/{id}`
pub async fn get_expense(
    AuthUser(owner_id): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Expense>, ApiError> {
    state
        .store
        .get(&owner_id, &id)
        .map(Json)
        .ok_or(ApiError::InvalidExpenseId)
}

/// `POST /api/expenses`
pub async fn create_expense(
    AuthUser(owner_id): AuthUser,
    State(state): State<AppState>,
    body: Result<Json<Expense>, JsonRejection>,
) -> Result<(StatusCode, Json<Expense>), ApiError> {
    let Json(draft) = body.map_err(invalid_payload)?;
    let created = state.store.create(&owner_id, draft);
    info!(owner_id = %owner_id, expense_id = %created.id, "expense created");

    let _ = state.publisher.publish(ExpenseEvent::from(created.clone()));
    Ok((StatusCode::CREATED, Json(created)))
}

/// `PUT /api/expenses`
///
/// The target is named by the `id` field of the body.
pub async fn update_expense(
    AuthUser(owner_id): AuthUser,
    State(state): State<AppState>,
    body: Result<Json<Expense>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(draft) = body.map_err(invalid_payload)?;
    let id = draft.id.clone();
    let updated = state
        .store
        .update(&owner_id, &id, draft)
        .ok_or(ApiError::InvalidExpenseId)?;
    info!(owner_id = %owner_id, expense_id = %updated.id, "expense updated");

    let _ = state.publisher.publish(ExpenseEvent::from(updated));
    Ok(Json(json!({ "result": "success" })))
}

/// `DELETE /api/expenses/{id}`
pub async fn delete_expense(
    AuthUser(owner_id): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.delete(&owner_id, &id) {
        return Err(ApiError::InvalidExpenseId);
    }
    info!(owner_id = %owner_id, expense_id = %id, "expense deleted");
    Ok(Json(json!({ "result": "success" })))
}

fn invalid_payload(rejection: JsonRejection) -> ApiError {
    debug!(error = %rejection.body_text(), "rejected expense payload");
    ApiError::InvalidPayload
}
