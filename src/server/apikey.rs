use super::{AppState, JsonBody, QueryParams};
use crate::error::{Error, Result};
use axum::{
	extract::{Query, State},
	http::StatusCode,
	Json,
};
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
	#[serde(default)]
	pub stackauth_user_id: Option<String>,
}

impl UserRequest {
	fn user_id(self) -> Result<String> {
		self.stackauth_user_id
			.filter(|id| !id.is_empty())
			.ok_or_else(|| Error::validation("stackauthUserId is required"))
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
	pub user_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyResponse {
	pub api_key: String,
}

pub async fn create_key(
	State(state): State<AppState>,
	WithRejection(Json(request), _): JsonBody<UserRequest>,
) -> Result<(StatusCode, Json<ApiKeyResponse>)> {
	let user_id = request.user_id()?;
	let api_key = state.api_keys.create(&user_id).await?;
	Ok((StatusCode::CREATED, Json(ApiKeyResponse { api_key })))
}

pub async fn regenerate_key(
	State(state): State<AppState>,
	WithRejection(Json(request), _): JsonBody<UserRequest>,
) -> Result<Json<ApiKeyResponse>> {
	let user_id = request.user_id()?;
	let api_key = state.api_keys.regenerate(&user_id).await?;
	Ok(Json(ApiKeyResponse { api_key }))
}

pub async fn get_key(
	State(state): State<AppState>,
	WithRejection(Query(query), _): QueryParams<UserQuery>,
) -> Result<Json<ApiKeyResponse>> {
	let user_id = query
		.user_id
		.filter(|id| !id.is_empty())
		.ok_or_else(|| Error::validation("userId query param is required"))?;
	let api_key = state.api_keys.get(&user_id).await?;
	Ok(Json(ApiKeyResponse { api_key }))
}

pub async fn revoke_key(
	State(state): State<AppState>,
	WithRejection(Json(request), _): JsonBody<UserRequest>,
) -> Result<Json<serde_json::Value>> {
	let user_id = request.user_id()?;
	state.api_keys.revoke(&user_id).await?;
	Ok(Json(serde_json::json!({ "message": "API key revoked" })))
}
