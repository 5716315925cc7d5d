//! HTTP surface of the generator.
//!
//! `POST /generate-model` runs the pipeline for one prompt (or one change to
//! previously generated code) and answers with the code and the STL file
//! name. `GET /health` is a liveness probe.

pub mod config;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cad_ai::retrieval::{SEED_CORPUS, parse_corpus};
use cad_ai::{
    CorrectionContext, EmbeddingModel, GenerationOutcome, LanguageModel, OpenAiClient, Pipeline,
    PipelineError, PreviewImage, RetrievalIndex,
};
use cad_mesh::MeshExporter;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;

pub fn app<M, E>(pipeline: Arc<Pipeline<M, E>>) -> Router
where
    M: LanguageModel + 'static,
    E: EmbeddingModel + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/generate-model", post(generate_model::<M, E>))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(pipeline)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Builds the production pipeline described by `config`.
pub fn build_pipeline(
    config: &ServerConfig,
) -> anyhow::Result<Pipeline<OpenAiClient, OpenAiClient>> {
    let client = OpenAiClient::new(config.openai_config()?)?;
    let index = match &config.corpus_path {
        Some(path) => RetrievalIndex::load(path, client.clone())?,
        None => RetrievalIndex::new(parse_corpus(SEED_CORPUS)?, client.clone()),
    };
    info!(
        output_dir = %config.output_dir.display(),
        corpus = ?config.corpus_path,
        model = %client.config().chat_model,
        "pipeline configured"
    );
    Ok(Pipeline::new(
        client,
        index,
        MeshExporter::new(&config.output_dir),
        config.pipeline_config(),
    ))
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    prompt: Option<String>,
    /// Code from an earlier response; `prompt` is then the requested change.
    previous_code: Option<String>,
    preview_png_base64: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateResponse {
    message: String,
    code_snippet: String,
    file_saved: String,
    prompt_used: String,
    corrected: bool,
    bounding_box: [f64; 3],
    fits_bounding_box: bool,
}

impl From<GenerationOutcome> for GenerateResponse {
    fn from(outcome: GenerationOutcome) -> Self {
        let message = if outcome.corrected {
            "Model code generated after one correction & STL exported!"
        } else {
            "Model code generated & STL exported!"
        };
        Self {
            message: message.to_string(),
            code_snippet: outcome.code,
            file_saved: outcome.file_name,
            prompt_used: outcome.prompt,
            corrected: outcome.corrected,
            bounding_box: outcome.bounding_box.as_array(),
            fits_bounding_box: outcome.fits_bounding_box,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Default, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    corrected_code: Option<String>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                error: message.into(),
                kind: Some("invalid_request"),
                ..ErrorResponse::default()
            },
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            PipelineError::RetrievalUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::GenerationFailed { .. } | PipelineError::EmptyGeneration { .. } => {
                StatusCode::BAD_GATEWAY
            }
            PipelineError::ExecutionFailed { .. } | PipelineError::MalformedGeometry { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PipelineError::Export { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorResponse {
                error: err.to_string(),
                kind: Some(err.kind()),
                prompt: err.prompt().map(str::to_string),
                code: err.code().map(str::to_string),
                corrected_code: err.corrected_code().map(str::to_string),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn generate_model<M, E>(
    State(pipeline): State<Arc<Pipeline<M, E>>>,
    body: Bytes,
) -> Result<Json<GenerateResponse>, ApiError>
where
    M: LanguageModel + 'static,
    E: EmbeddingModel + 'static,
{
    let request: GenerateRequest = parse_json(&body)?;
    let Some(prompt) = request.prompt else {
        return Err(ApiError::bad_request("Missing 'prompt' in request body."));
    };

    let preview = request
        .preview_png_base64
        .map(|encoded| {
            BASE64
                .decode(encoded.trim())
                .map(PreviewImage::png)
                .map_err(|err| ApiError::bad_request(format!("invalid preview image: {err}")))
        })
        .transpose()?;
    let context = request
        .previous_code
        .filter(|code| !code.trim().is_empty())
        .map(|code| CorrectionContext::new(code).with_preview(preview));

    match pipeline.generate(&prompt, context).await {
        Ok(outcome) => Ok(Json(outcome.into())),
        Err(err) => {
            warn!(kind = err.kind(), error = %err, "generation request failed");
            Err(err.into())
        }
    }
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("request body is required"));
    }

    serde_json::from_slice(body)
        .map_err(|err| ApiError::bad_request(format!("invalid JSON body: {err}")))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::body::Body;
    use axum::response::Response;
    use cad_ai::{
        CompletionOptions, EmbeddingModel, GenerationRequest, LanguageModel, ModelError,
        Pipeline, PipelineConfig, RequestKind, RetrievalIndex,
    };
    use cad_mesh::MeshExporter;
    use http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, ORIGIN};
    use http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::{GenerateResponse, HealthResponse, app};

    const CUBE: &str = "const mesh = new Mesh(new BoxGeometry(30, 10, 10));";

    #[derive(Clone, Default)]
    struct QueueModel {
        replies: Arc<Mutex<VecDeque<String>>>,
        seen: Arc<Mutex<Vec<GenerationRequest>>>,
    }

    impl QueueModel {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.iter().map(|r| r.to_string()).collect())),
                seen: Arc::default(),
            }
        }
    }

    impl LanguageModel for QueueModel {
        async fn complete(
            &self,
            request: &GenerationRequest,
            _options: &CompletionOptions,
        ) -> Result<String, ModelError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ModelError::Unavailable("out of replies".into()))
        }
    }

    struct ConstantEmbedder;

    impl EmbeddingModel for ConstantEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ModelError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    fn router(model: QueueModel) -> (Router, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            model,
            RetrievalIndex::new(Vec::new(), ConstantEmbedder),
            MeshExporter::new(dir.path()),
            PipelineConfig::default(),
        );
        (app(Arc::new(pipeline)), dir)
    }

    async fn send(router: Router, method: Method, uri: &str, body: Body) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .expect("request should build");
        router.oneshot(request).await.expect("request should complete")
    }

    async fn post_json(router: Router, value: Value) -> Response {
        let body = serde_json::to_vec(&value).expect("json encoding should succeed");
        send(router, Method::POST, "/generate-model", Body::from(body)).await
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("response body should collect")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("response should decode as JSON")
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (router, _dir) = router(QueueModel::default());
        let response = send(router, Method::GET, "/health", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let payload: HealthResponse = json_body(response).await;
        assert_eq!(payload.status, "ok");
    }

    #[tokio::test]
    async fn generate_returns_code_and_file() {
        let (router, dir) = router(QueueModel::new(&[CUBE]));
        let response = post_json(router, json!({"prompt": "a 30mm cube"})).await;
        assert_eq!(response.status(), StatusCode::OK);

        let payload: GenerateResponse = json_body(response).await;
        assert_eq!(payload.code_snippet, CUBE);
        assert_eq!(payload.prompt_used, "a 30mm cube");
        assert_eq!(payload.bounding_box, [30.0, 10.0, 10.0]);
        assert!(payload.fits_bounding_box);
        assert!(!payload.corrected);

        let stl = std::fs::read_to_string(dir.path().join(&payload.file_saved)).unwrap();
        assert!(stl.starts_with("solid"));
    }

    #[tokio::test]
    async fn missing_prompt_is_rejected_without_model_call() {
        let model = QueueModel::new(&[CUBE]);
        let (router, _dir) = router(model.clone());
        let response = post_json(router, json!({"text": "a cube"})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload: Value = json_body(response).await;
        assert_eq!(payload["error"], "Missing 'prompt' in request body.");
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_prompt_and_bad_json_are_bad_requests() {
        let (router, _dir) = router(QueueModel::default());
        let response = post_json(router.clone(), json!({"prompt": "   "})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload: Value = json_body(response).await;
        assert_eq!(payload["kind"], "invalid_request");

        let response = send(router, Method::POST, "/generate-model", Body::from("{")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn model_failure_is_bad_gateway() {
        let (router, _dir) = router(QueueModel::default());
        let response = post_json(router, json!({"prompt": "a cube"})).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let payload: Value = json_body(response).await;
        assert_eq!(payload["kind"], "generation_failed");
        assert_eq!(payload["prompt"], "a cube");
    }

    #[tokio::test]
    async fn failed_correction_reports_both_snippets() {
        let (router, _dir) = router(QueueModel::new(&["const mesh = 1;", "const group = 2;"]));
        let response = post_json(router, json!({"prompt": "a cube"})).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let payload: Value = json_body(response).await;
        assert_eq!(payload["kind"], "execution_failed");
        assert_eq!(payload["code"], "const mesh = 1;");
        assert_eq!(payload["corrected_code"], "const group = 2;");
    }

    #[tokio::test]
    async fn previous_code_requests_a_modification() {
        let model = QueueModel::new(&[CUBE]);
        let (router, _dir) = router(model.clone());
        let response = post_json(
            router,
            json!({
                "prompt": "make it 30mm long",
                "previous_code": "const mesh = new Mesh(new BoxGeometry(10, 10, 10));",
                "preview_png_base64": "iVBORw==",
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, RequestKind::Modification);
        assert_eq!(seen[0].preview.as_ref().map(|p| p.data.len()), Some(4));
    }

    #[tokio::test]
    async fn invalid_preview_is_rejected() {
        let (router, _dir) = router(QueueModel::new(&[CUBE]));
        let response = post_json(
            router,
            json!({"prompt": "x", "previous_code": CUBE, "preview_png_base64": "%%%"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn concurrent_requests_get_distinct_files() {
        let model = QueueModel::new(&[CUBE; 8]);
        let (router, dir) = router(model);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let router = router.clone();
                tokio::spawn(async move {
                    let response =
                        post_json(router, json!({"prompt": format!("cube {i}: 30mm")})).await;
                    assert_eq!(response.status(), StatusCode::OK);
                    json_body::<GenerateResponse>(response).await.file_saved
                })
            })
            .collect();

        let mut files = Vec::new();
        for handle in handles {
            files.push(handle.await.expect("request task should not panic"));
        }
        files.sort();
        files.dedup();
        assert_eq!(files.len(), 8);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 8);
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let (router, _dir) = router(QueueModel::default());
        let request = Request::builder()
            .method(Method::GET)
            .uri("/health")
            .header(ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }
}
