//! Administrative routes. Mounted behind `require_auth` and `require_admin`.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    AppState,
    accounts::{AccountUpdate, ProvisionInput},
    error::ApiResult,
    middleware::CurrentUser,
    models::{SupportTicket, TicketFilter, TicketUpdate, UserFilter, UserProfile},
};

pub async fn list_users(
    State(state): State<AppState>,
    Query(filter): Query<UserFilter>,
) -> ApiResult<Json<Vec<UserProfile>>> {
    let users = state.accounts.list(&filter).await?;
    Ok(Json(users.iter().map(|u| u.profile()).collect()))
}

pub async fn provision_user(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(payload): Json<ProvisionInput>,
) -> ApiResult<impl IntoResponse> {
    let user = state.accounts.provision(payload).await?;
    info!("Admin {} provisioned user {}", current.user.id, user.id);

    Ok((StatusCode::CREATED, Json(user.profile())))
}

/// Deleted accounts stay readable here
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<UserProfile>> {
    Ok(Json(state.accounts.find_for_audit(id).await?.profile()))
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AccountUpdate>,
) -> ApiResult<Json<UserProfile>> {
    let user = state.accounts.update(&current.user, id, payload).await?;
    info!("Admin {} updated user {}", current.user.id, id);

    Ok(Json(user.profile()))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Query(filter): Query<TicketFilter>,
) -> ApiResult<Json<Vec<SupportTicket>>> {
    Ok(Json(state.support.list(&filter).await?))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<TicketUpdate>,
) -> ApiResult<Json<SupportTicket>> {
    Ok(Json(state.support.update(id, &update).await?))
}
