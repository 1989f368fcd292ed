mod apikey;
mod auth;
mod models;
mod upload;

use crate::auth::ApiKeyStore;
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::inference::InferenceDispatcher;
use crate::model::ModelRecords;
use axum::{
	extract::{
		multipart::MultipartError,
		rejection::{JsonRejection, QueryRejection},
		DefaultBodyLimit, Query,
	},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{delete, get, post},
	Json, Router,
};
use axum_extra::extract::WithRejection;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Largest accepted model artifact.
pub const MAX_MODEL_BYTES: u64 = 1024 * 1024 * 1024;
/// Largest accepted inference image.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

// Room for multipart framing and text fields on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
	config: Arc<Config>,
	models: Arc<ModelRecords>,
	api_keys: Arc<ApiKeyStore>,
	dispatcher: Arc<InferenceDispatcher>,
}

impl AppState {
	pub fn new(config: Config) -> Self {
		let dispatcher = InferenceDispatcher::from_config(&config.inference);
		Self::with_dispatcher(config, dispatcher)
	}

	pub fn with_dispatcher(config: Config, dispatcher: InferenceDispatcher) -> Self {
		Self {
			models: Arc::new(ModelRecords::from_config(&config)),
			api_keys: Arc::new(ApiKeyStore::from_config(&config)),
			dispatcher: Arc::new(dispatcher),
			config: Arc::new(config),
		}
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let status = match self.kind() {
			ErrorKind::NotFound => StatusCode::NOT_FOUND,
			ErrorKind::Validation => StatusCode::BAD_REQUEST,
			ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
			ErrorKind::Forbidden => StatusCode::FORBIDDEN,
			ErrorKind::Conflict => StatusCode::CONFLICT,
			ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
			ErrorKind::ParseFailure => StatusCode::BAD_GATEWAY,
			ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
		};

		let body = match &self {
			Error::Validation(errors) => serde_json::json!({
				"error": self.to_string(),
				"errors": errors,
			}),
			_ if status == StatusCode::INTERNAL_SERVER_ERROR => {
				tracing::error!("Unhandled error: {}", self);
				serde_json::json!({ "error": "Internal server error" })
			}
			_ => serde_json::json!({ "error": self.to_string() }),
		};

		(status, Json(body)).into_response()
	}
}

/// JSON body whose rejections render as the usual `{"error": ...}` body.
type JsonBody<T> = WithRejection<Json<T>, Error>;
type QueryParams<T> = WithRejection<Query<T>, Error>;

impl From<JsonRejection> for Error {
	fn from(rejection: JsonRejection) -> Self {
		Error::validation(rejection.body_text())
	}
}

impl From<QueryRejection> for Error {
	fn from(rejection: QueryRejection) -> Self {
		Error::validation(rejection.body_text())
	}
}

fn multipart_error(err: MultipartError) -> Error {
	Error::validation(err.body_text())
}

async fn status_handler() -> Json<serde_json::Value> {
	Json(serde_json::json!({
		"status": "ok",
		"message": "ModelMarkt API is running",
	}))
}

pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/", get(status_handler))
		.route("/models", get(models::list_models))
		.route(
			"/models/{id}",
			get(models::get_model)
				.post(models::predict)
				.patch(models::update_model)
				.delete(models::delete_model)
				.layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + MULTIPART_OVERHEAD)),
		)
		.route(
			"/upload",
			post(upload::upload_model)
				.layer(DefaultBodyLimit::max(MAX_MODEL_BYTES as usize + MULTIPART_OVERHEAD)),
		)
		.route("/apikey/create", post(apikey::create_key))
		.route("/apikey/regenerate", post(apikey::regenerate_key))
		.route("/apikey/get", get(apikey::get_key))
		.route("/apikey/revoke", delete(apikey::revoke_key))
		.layer(
			TraceLayer::new_for_http()
				.make_span_with(DefaultMakeSpan::new().level(Level::INFO))
				.on_response(DefaultOnResponse::new().level(Level::INFO)),
		)
		.layer(CorsLayer::permissive())
		.with_state(state)
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::warn!("Could not listen for shutdown signal: {}", e);
		std::future::pending::<()>().await;
	}
	tracing::info!("Shutting down");
}

pub async fn serve(host: &str, port: u16, state: AppState) -> Result<()> {
	let app = create_router(state);
	let addr = format!("{}:{}", host, port);

	tracing::info!("Starting server on {}", addr);

	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await
		.map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{InputType, ModelRecord};
	use axum::body::Body;
	use axum::http::{header, Request};
	use serde_json::Value;
	use tempfile::TempDir;
	use tower::ServiceExt;

	const BOUNDARY: &str = "modelmarkt-test-boundary";

	struct Harness {
		_dir: TempDir,
		state: AppState,
	}

	impl Harness {
		fn new(script: &str) -> Self {
			let dir = TempDir::new().unwrap();
			let config = Config::at(dir.path()).unwrap();
			let dispatcher = InferenceDispatcher::new("/bin/sh")
				.with_arg("-c")
				.with_arg(script)
				.with_arg("dispatch")
				.with_timeout(std::time::Duration::from_millis(200));
			let state = AppState::with_dispatcher(config, dispatcher);
			Self { _dir: dir, state }
		}

		async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
			let response = create_router(self.state.clone()).oneshot(request).await.unwrap();
			let status = response.status();
			let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
			let body = if bytes.is_empty() {
				Value::Null
			} else {
				serde_json::from_slice(&bytes).unwrap()
			};
			(status, body)
		}

		async fn seed(&self, id: &str, owner: Option<&str>) -> ModelRecord {
			let record = ModelRecord::new(
				id.to_string(),
				"Cat Classifier".to_string(),
				"finds cats".to_string(),
				format!("{}.keras", id),
				InputType::Image,
				owner.map(str::to_string),
			);
			std::fs::write(self.state.models.artifact_path(&record), b"weights").unwrap();
			self.state.models.create(record).await.unwrap()
		}

		async fn key_for(&self, user: &str) -> String {
			self.state.api_keys.create(user).await.unwrap()
		}

		fn temp_dir_is_empty(&self) -> bool {
			std::fs::read_dir(&self.state.config.temp_dir).unwrap().next().is_none()
		}
	}

	fn json_request(method: &str, uri: &str, key: Option<&str>, body: Value) -> Request<Body> {
		let mut builder = Request::builder()
			.method(method)
			.uri(uri)
			.header(header::CONTENT_TYPE, "application/json");
		if let Some(key) = key {
			builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
		}
		builder.body(Body::from(body.to_string())).unwrap()
	}

	fn get(uri: &str) -> Request<Body> {
		Request::builder().uri(uri).body(Body::empty()).unwrap()
	}

	fn multipart_request(
		uri: &str,
		key: Option<&str>,
		file: Option<(&str, &str, &[u8])>,
		fields: &[(&str, &str)],
	) -> Request<Body> {
		let mut body = Vec::new();
		for (name, value) in fields {
			body.extend_from_slice(
				format!(
					"--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
					BOUNDARY, name, value
				)
				.as_bytes(),
			);
		}
		if let Some((name, filename, contents)) = file {
			body.extend_from_slice(
				format!(
					"--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
					BOUNDARY, name, filename
				)
				.as_bytes(),
			);
			body.extend_from_slice(contents);
			body.extend_from_slice(b"\r\n");
		}
		body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

		let mut builder = Request::builder().method("POST").uri(uri).header(
			header::CONTENT_TYPE,
			format!("multipart/form-data; boundary={}", BOUNDARY),
		);
		if let Some(key) = key {
			builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
		}
		builder.body(Body::from(body)).unwrap()
	}

	#[tokio::test]
	async fn status_and_empty_listing() {
		let harness = Harness::new("exit 0");

		let (status, body) = harness.send(get("/")).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["status"], "ok");

		let (status, body) = harness.send(get("/models")).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["models"], serde_json::json!([]));
		assert_eq!(body["pagination"]["page"], 1);
		assert_eq!(body["pagination"]["limit"], 20);
		assert_eq!(body["pagination"]["total"], 0);
		assert_eq!(body["pagination"]["totalPages"], 0);
	}

	#[tokio::test]
	async fn listing_applies_search_and_caps_limit() {
		let harness = Harness::new("exit 0");
		harness.seed("a", None).await;

		let (status, body) = harness.send(get("/models?search=CAT&page=x&limit=5000")).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["models"][0]["id"], "a");
		assert_eq!(body["pagination"]["page"], 1);
		assert_eq!(body["pagination"]["limit"], 100);
		assert_eq!(body["pagination"]["totalPages"], 1);

		let (_, body) = harness.send(get("/models?search=dog")).await;
		assert_eq!(body["pagination"]["total"], 0);
	}

	#[tokio::test]
	async fn get_model_validates_and_reports_missing() {
		let harness = Harness::new("exit 0");
		harness.seed("a", None).await;

		let (status, body) = harness.send(get("/models/a")).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["model"]["name"], "Cat Classifier");

		let (status, body) = harness.send(get("/models/bad_id")).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["errors"][0], "Invalid model ID format");

		let (status, body) = harness.send(get("/models/missing")).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(body["error"], "Model not found");
	}

	#[tokio::test]
	async fn mutations_require_a_known_bearer_key() {
		let harness = Harness::new("exit 0");
		harness.seed("a", None).await;

		let patch = serde_json::json!({ "name": "x" });
		let (status, body) = harness.send(json_request("PATCH", "/models/a", None, patch.clone())).await;
		assert_eq!(status, StatusCode::UNAUTHORIZED);
		assert_eq!(body["error"], "Missing Authorization header");

		let unknown = "ab".repeat(32);
		let (status, body) = harness
			.send(json_request("PATCH", "/models/a", Some(&unknown), patch))
			.await;
		assert_eq!(status, StatusCode::UNAUTHORIZED);
		assert_eq!(body["error"], "Invalid API key");
	}

	#[tokio::test]
	async fn owner_can_update_and_others_cannot() {
		let harness = Harness::new("exit 0");
		harness.seed("a", Some("alice")).await;
		let alice = harness.key_for("alice").await;
		let bob = harness.key_for("bob").await;

		let patch = serde_json::json!({ "name": "  Dog Classifier  ", "description": " woof " });
		let (status, body) = harness
			.send(json_request("PATCH", "/models/a", Some(&bob), patch.clone()))
			.await;
		assert_eq!(status, StatusCode::FORBIDDEN);
		assert_eq!(body["error"], "You can only edit your own models");

		let (status, body) = harness
			.send(json_request("PATCH", "/models/a", Some(&alice), patch))
			.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["model"]["name"], "Dog Classifier");
		assert_eq!(body["model"]["description"], "woof");
		assert_eq!(body["model"]["ownerId"], "alice");

		// An empty name is ignored rather than rejected.
		let (status, body) = harness
			.send(json_request("PATCH", "/models/a", Some(&alice), serde_json::json!({ "name": "" })))
			.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["model"]["name"], "Dog Classifier");
	}

	#[tokio::test]
	async fn delete_removes_record_and_artifact() {
		let harness = Harness::new("exit 0");
		harness.seed("a", None).await;
		let key = harness.key_for("anyone").await;
		let artifact = harness.state.config.models_dir.join("a.keras");
		assert!(artifact.exists());

		let (status, body) = harness
			.send(json_request("DELETE", "/models/a", Some(&key), Value::Null))
			.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["message"], "Model deleted");
		assert!(!artifact.exists());

		let (status, _) = harness
			.send(json_request("DELETE", "/models/a", Some(&key), Value::Null))
			.await;
		assert_eq!(status, StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn upload_creates_record_and_stores_artifact() {
		let harness = Harness::new("exit 0");

		let request = multipart_request(
			"/upload",
			None,
			Some(("model", "resnet.keras", b"weights")),
			&[("name", "  ResNet  "), ("description", "imagenet"), ("userId", "alice")],
		);
		let (status, body) = harness.send(request).await;
		assert_eq!(status, StatusCode::CREATED);
		assert_eq!(body["message"], "Model uploaded successfully");

		let model = &body["model"];
		let id = model["id"].as_str().unwrap();
		assert_eq!(model["name"], "ResNet");
		assert_eq!(model["inputType"], "image");
		assert_eq!(model["ownerId"], "alice");
		assert_eq!(model["callCount"], 0);
		assert_eq!(model["filename"], format!("{}.keras", id));

		let stored = harness.state.config.models_dir.join(model["filename"].as_str().unwrap());
		assert_eq!(std::fs::read(stored).unwrap(), b"weights");
		assert_eq!(harness.state.models.get_by_id(id).await.unwrap().name, "ResNet");
	}

	#[tokio::test]
	async fn upload_rejects_bad_metadata_without_leaving_files() {
		let harness = Harness::new("exit 0");

		let request = multipart_request(
			"/upload",
			None,
			Some(("model", "resnet.onnx", b"weights")),
			&[("name", " "), ("inputType", "audio")],
		);
		let (status, body) = harness.send(request).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(
			body["errors"],
			serde_json::json!(["Model name is required", "inputType must be one of: image, text, json"])
		);

		let leftovers: Vec<_> = std::fs::read_dir(&harness.state.config.models_dir)
			.unwrap()
			.map(|e| e.unwrap().file_name())
			.collect();
		assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);

		let request = multipart_request(
			"/upload",
			None,
			Some(("model", "archive.zip", b"zip")),
			&[("name", "Zipped")],
		);
		let (status, body) = harness.send(request).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "Invalid file type. Allowed: .keras, .h5, .pt, .onnx");

		let request = multipart_request("/upload", None, None, &[("name", "Nothing")]);
		let (status, body) = harness.send(request).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "No file uploaded");
	}

	#[tokio::test]
	async fn predict_runs_interpreter_and_counts_calls() {
		let harness = Harness::new(
			r#"test -f "$1" && test -f "$2" && printf '{"success":true,"predicted_class":1,"confidence":0.9}'"#,
		);
		harness.seed("a", None).await;
		let key = harness.key_for("alice").await;

		let request = multipart_request("/models/a", Some(&key), Some(("image", "cat.png", b"png")), &[]);
		let (status, body) = harness.send(request).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["model"], "Cat Classifier");
		assert_eq!(body["result"]["success"], true);
		assert_eq!(body["result"]["predicted_class"], 1);

		assert_eq!(harness.state.models.get_by_id("a").await.unwrap().call_count, 1);
		assert!(harness.temp_dir_is_empty());
	}

	#[tokio::test]
	async fn predict_failures_clean_up_and_do_not_count() {
		let harness = Harness::new("exec sleep 30");
		harness.seed("a", None).await;
		let key = harness.key_for("alice").await;

		let request = multipart_request("/models/a", Some(&key), Some(("image", "cat.jpg", b"jpg")), &[]);
		let (status, body) = harness.send(request).await;
		assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
		assert_eq!(body["error"], "Inference timeout after 200ms");
		assert!(harness.temp_dir_is_empty());
		assert_eq!(harness.state.models.get_by_id("a").await.unwrap().call_count, 0);

		let request = multipart_request("/models/a", Some(&key), None, &[]);
		let (status, body) = harness.send(request).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "Image file required");

		let request = multipart_request("/models/missing", Some(&key), Some(("image", "cat.jpg", b"jpg")), &[]);
		let (status, _) = harness.send(request).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn predict_passes_free_form_results_through() {
		let harness = Harness::new(r#"printf '{"predicted_class":"tabby","scores":{"tabby":0.8}}'"#);
		harness.seed("a", None).await;
		let key = harness.key_for("alice").await;

		let request = multipart_request("/models/a", Some(&key), Some(("image", "cat.png", b"png")), &[]);
		let (status, body) = harness.send(request).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(
			body["result"],
			serde_json::json!({ "predicted_class": "tabby", "scores": { "tabby": 0.8 } })
		);
		assert_eq!(harness.state.models.get_by_id("a").await.unwrap().call_count, 1);
	}

	#[tokio::test]
	async fn predict_drops_unsupported_image_types() {
		let harness = Harness::new(r#"printf '{"success":true}'"#);
		harness.seed("a", None).await;
		let key = harness.key_for("alice").await;

		let request = multipart_request("/models/a", Some(&key), Some(("image", "cat.gif", b"gif")), &[]);
		let (status, body) = harness.send(request).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "Image file required");
		assert_eq!(harness.state.models.get_by_id("a").await.unwrap().call_count, 0);
	}

	#[tokio::test]
	async fn malformed_json_bodies_get_error_json() {
		let harness = Harness::new("exit 0");
		harness.seed("a", Some("alice")).await;
		let key = harness.key_for("alice").await;

		let request = Request::builder()
			.method("PATCH")
			.uri("/models/a")
			.header(header::CONTENT_TYPE, "application/json")
			.header(header::AUTHORIZATION, format!("Bearer {}", key))
			.body(Body::from("{\"name\":"))
			.unwrap();
		let (status, body) = harness.send(request).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert!(body["error"].is_string());

		let request = Request::builder()
			.method("POST")
			.uri("/apikey/create")
			.body(Body::from("stackauthUserId=alice"))
			.unwrap();
		let (status, body) = harness.send(request).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert!(body["error"].is_string());
		assert_eq!(harness.state.models.get_by_id("a").await.unwrap().name, "Cat Classifier");
	}

	#[tokio::test]
	async fn predict_surfaces_interpreter_stderr() {
		let harness = Harness::new("printf 'garbage'; printf boom >&2");
		harness.seed("a", None).await;
		let key = harness.key_for("alice").await;

		let request = multipart_request("/models/a", Some(&key), Some(("image", "cat.webp", b"webp")), &[]);
		let (status, body) = harness.send(request).await;
		assert_eq!(status, StatusCode::BAD_GATEWAY);
		assert_eq!(body["error"], "boom");
		assert!(harness.temp_dir_is_empty());
	}

	#[tokio::test]
	async fn api_key_lifecycle() {
		let harness = Harness::new("exit 0");
		let user = serde_json::json!({ "stackauthUserId": "alice" });

		let (status, body) = harness
			.send(json_request("POST", "/apikey/create", None, user.clone()))
			.await;
		assert_eq!(status, StatusCode::CREATED);
		let key = body["apiKey"].as_str().unwrap().to_string();
		assert_eq!(key.len(), 64);

		let (status, body) = harness
			.send(json_request("POST", "/apikey/create", None, user.clone()))
			.await;
		assert_eq!(status, StatusCode::CONFLICT);
		assert_eq!(body["error"], "API key already exists for this user");

		let (status, body) = harness.send(get("/apikey/get?userId=alice")).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["apiKey"], key.as_str());

		let (status, body) = harness
			.send(json_request("POST", "/apikey/regenerate", None, user.clone()))
			.await;
		assert_eq!(status, StatusCode::OK);
		assert_ne!(body["apiKey"], key.as_str());

		let (status, body) = harness
			.send(json_request("DELETE", "/apikey/revoke", None, user.clone()))
			.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["message"], "API key revoked");

		let (status, _) = harness.send(get("/apikey/get?userId=alice")).await;
		assert_eq!(status, StatusCode::NOT_FOUND);

		let (status, body) = harness
			.send(json_request("POST", "/apikey/create", None, serde_json::json!({})))
			.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "stackauthUserId is required");

		let (status, _) = harness.send(get("/apikey/get")).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
	}
}
