use super::{multipart_error, AppState, MAX_MODEL_BYTES};
use crate::error::{Error, Result};
use crate::model::validation::{is_allowed_model_extension, validate_model_metadata};
use crate::model::{InputType, ModelRecord};
use axum::{
	extract::{multipart::Field, Multipart, State},
	http::StatusCode,
	Json,
};
use serde::Serialize;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

#[derive(Serialize)]
pub struct UploadResponse {
	pub message: String,
	pub model: ModelRecord,
}

#[derive(Default)]
struct UploadForm {
	name: Option<String>,
	description: Option<String>,
	input_type: Option<String>,
	user_id: Option<String>,
}

/// Streams the artifact into a staged file that is discarded unless the record is created.
async fn receive_artifact(
	state: &AppState,
	id: &str,
	mut field: Field<'_>,
) -> Result<(NamedTempFile, String)> {
	let original_name = field.file_name().unwrap_or_default().to_string();
	if !is_allowed_model_extension(&original_name) {
		return Err(Error::validation(
			"Invalid file type. Allowed: .keras, .h5, .pt, .onnx",
		));
	}

	let filename = ModelRecord::artifact_filename(id, &original_name);
	let staged = state.models.stage_artifact()?;
	let mut file = tokio::fs::File::from_std(staged.as_file().try_clone()?);

	let mut written: u64 = 0;
	while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
		written += chunk.len() as u64;
		if written > MAX_MODEL_BYTES {
			return Err(Error::validation("File too large"));
		}
		file.write_all(&chunk).await?;
	}
	file.flush().await?;

	tracing::debug!("Received {} bytes for artifact {}", written, filename);
	Ok((staged, filename))
}

pub async fn upload_model(
	State(state): State<AppState>,
	mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
	let id = uuid::Uuid::new_v4().to_string();
	let mut form = UploadForm::default();
	let mut artifact = None;

	while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
		let Some(name) = field.name().map(str::to_string) else {
			continue;
		};

		match name.as_str() {
			"model" => {
				if artifact.is_some() {
					return Err(Error::validation("Only one model file may be uploaded"));
				}
				artifact = Some(receive_artifact(&state, &id, field).await?);
			}
			"name" => form.name = Some(field.text().await.map_err(multipart_error)?),
			"description" => form.description = Some(field.text().await.map_err(multipart_error)?),
			"inputType" => form.input_type = Some(field.text().await.map_err(multipart_error)?),
			"userId" => form.user_id = Some(field.text().await.map_err(multipart_error)?),
			_ => {}
		}
	}

	let (staged, filename) = artifact.ok_or_else(|| Error::validation("No file uploaded"))?;

	let errors = validate_model_metadata(
		form.name.as_deref(),
		form.description.as_deref(),
		form.input_type.as_deref(),
	);
	if !errors.is_empty() {
		return Err(Error::Validation(errors));
	}

	let input_type = match form.input_type.as_deref().filter(|t| !t.is_empty()) {
		Some(input_type) => input_type.parse()?,
		None => InputType::default(),
	};

	let record = ModelRecord::new(
		id,
		form.name.unwrap_or_default().trim().to_string(),
		form.description.unwrap_or_default().trim().to_string(),
		filename,
		input_type,
		form.user_id.filter(|user| !user.is_empty()),
	);
	let model = state.models.create_with_artifact(record, staged).await?;

	Ok((
		StatusCode::CREATED,
		Json(UploadResponse {
			message: "Model uploaded successfully".to_string(),
			model,
		}),
	))
}
