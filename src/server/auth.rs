use super::AppState;
use crate::auth::bearer_token;
use crate::error::Error;
use axum::{extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};

/// Identity resolved from the request's bearer key.
pub struct Caller(pub String);

impl FromRequestParts<AppState> for Caller {
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
		let header = parts
			.headers
			.get(AUTHORIZATION)
			.and_then(|value| value.to_str().ok());
		let key = bearer_token(header)?;

		match state.api_keys.resolve(key).await? {
			Some(user_id) => Ok(Caller(user_id)),
			None => Err(Error::Unauthorized("Invalid API key".to_string())),
		}
	}
}
