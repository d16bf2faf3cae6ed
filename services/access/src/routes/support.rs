//! Support ticket routes for account holders

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::{
    AppState, error::ApiResult, middleware::CurrentUser, models::SupportTicket,
    support::NewTicket,
};

pub async fn open(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(payload): Json<NewTicket>,
) -> ApiResult<impl IntoResponse> {
    let ticket = state.support.open(current.user.id, payload).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_own(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<SupportTicket>>> {
    Ok(Json(state.support.list_for_user(current.user.id).await?))
}
