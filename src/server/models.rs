use super::auth::Caller;
use super::{multipart_error, AppState, JsonBody, QueryParams, MAX_IMAGE_BYTES};
use crate::error::{Error, Result};
use crate::inference::InferenceResult;
use crate::model::validation::{is_allowed_image_extension, is_valid_model_id};
use crate::model::{ModelFilter, ModelPatch, ModelRecord, Pagination};
use axum::{
	extract::{Multipart, Path, Query, State},
	Json,
};
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;

#[derive(Deserialize)]
pub struct ListQuery {
	pub search: Option<String>,
	pub page: Option<String>,
	pub limit: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
	pub page: usize,
	pub limit: usize,
	pub total: usize,
	pub total_pages: usize,
}

#[derive(Serialize)]
pub struct ListResponse {
	pub models: Vec<ModelRecord>,
	pub pagination: PaginationInfo,
}

#[derive(Serialize)]
pub struct ModelResponse {
	pub model: ModelRecord,
}

#[derive(Serialize)]
pub struct PredictResponse {
	pub model: String,
	pub result: InferenceResult,
}

#[derive(Deserialize)]
pub struct UpdateRequest {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
}

fn check_id(id: &str) -> Result<()> {
	if is_valid_model_id(id) {
		Ok(())
	} else {
		Err(Error::validation("Invalid model ID format"))
	}
}

pub async fn list_models(
	State(state): State<AppState>,
	WithRejection(Query(query), _): QueryParams<ListQuery>,
) -> Result<Json<ListResponse>> {
	let pagination = Pagination::from_query(query.page.as_deref(), query.limit.as_deref())
		.capped(state.config.api.max_page_limit);
	let filter = ModelFilter {
		search: query.search,
	};

	let page = state.models.list(&filter, pagination).await?;

	Ok(Json(ListResponse {
		models: page.models,
		pagination: PaginationInfo {
			page: page.page,
			limit: page.limit,
			total: page.total,
			total_pages: page.total_pages,
		},
	}))
}

pub async fn get_model(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<ModelResponse>> {
	check_id(&id)?;
	let model = state.models.get_by_id(&id).await?;
	Ok(Json(ModelResponse { model }))
}

pub async fn predict(
	State(state): State<AppState>,
	Caller(caller): Caller,
	Path(id): Path<String>,
	mut multipart: Multipart,
) -> Result<Json<PredictResponse>> {
	check_id(&id)?;
	let model = state.models.get_by_id(&id).await?;

	let mut image = None;
	while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
		if field.name() != Some("image") {
			continue;
		}
		let file_name = field.file_name().unwrap_or_default().to_string();
		// Disallowed image types are dropped, leaving the request without an image.
		if !is_allowed_image_extension(&file_name) {
			tracing::debug!("Ignoring image {:?} with unsupported type", file_name);
			continue;
		}
		let bytes = field.bytes().await.map_err(multipart_error)?;
		if bytes.len() > MAX_IMAGE_BYTES {
			return Err(Error::validation("File too large"));
		}
		image = Some((file_name, bytes));
		break;
	}

	let (file_name, bytes) = image.ok_or_else(|| Error::validation("Image file required"))?;
	let suffix = FsPath::new(&file_name)
		.extension()
		.and_then(|e| e.to_str())
		.map(|e| format!(".{}", e.to_ascii_lowercase()))
		.unwrap_or_default();

	// Removed when this handler returns, whatever the outcome.
	let input = tempfile::Builder::new()
		.prefix("input-")
		.suffix(&suffix)
		.tempfile_in(&state.config.temp_dir)?;
	tokio::fs::write(input.path(), &bytes).await?;

	tracing::debug!("User {} running model {}", caller, id);
	let artifact = state.models.artifact_path(&model);
	let result = state.dispatcher.run(&artifact, input.path()).await?;
	if !result.is_success() {
		tracing::warn!(
			"Model {} reported a failed prediction: {}",
			id,
			result.error().unwrap_or("no error message")
		);
	}

	state.models.increment_call_count(&id).await?;

	Ok(Json(PredictResponse {
		model: model.name,
		result,
	}))
}

pub async fn update_model(
	State(state): State<AppState>,
	Caller(caller): Caller,
	Path(id): Path<String>,
	WithRejection(Json(request), _): JsonBody<UpdateRequest>,
) -> Result<Json<ModelResponse>> {
	check_id(&id)?;
	state
		.models
		.authorize(&id, &caller, state.config.api.unowned_policy, "edit")
		.await?;

	let patch = ModelPatch {
		name: request.name.filter(|name| !name.is_empty()),
		description: request.description,
	};
	let model = state.models.update(&id, patch).await?;

	Ok(Json(ModelResponse { model }))
}

pub async fn delete_model(
	State(state): State<AppState>,
	Caller(caller): Caller,
	Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
	check_id(&id)?;
	state
		.models
		.authorize(&id, &caller, state.config.api.unowned_policy, "delete")
		.await?;

	state.models.delete(&id).await?;

	Ok(Json(serde_json::json!({ "message": "Model deleted" })))
}
