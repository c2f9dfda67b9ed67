use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, Request, State};
use axum::http::{StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, RequestExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::cli::ServeArgs;
use crate::dataset::Dataset;
use crate::error::ImportError;
use crate::import::{ImportReport, ImportRequest, error_report, run_import};
use crate::storage::StoragePaths;
use crate::store::Store;

/// Uploaded fee schedules run to a few hundred MB at worst.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<Store>>,
}

pub async fn run(opts: ServeArgs) -> anyhow::Result<()> {
    let paths = StoragePaths::new(&opts.data_dir);
    paths.ensure_dirs().context("create data directories")?;
    let store = Store::open(&paths.db_path)
        .with_context(|| format!("open store at {}", paths.db_path.display()))?;

    let state = AppState {
        store: Arc::new(Mutex::new(store)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/import", post(api_import))
        .route("/api/datasets", get(api_datasets))
        .route("/api/health", get(api_health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Response envelope the admin UI renders; camelCase to match the report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<ImportReport>,
}

impl ApiResponse {
    fn success(message: impl Into<String>, details: Option<ImportReport>) -> Self {
        ApiResponse {
            ok: true,
            error_code: None,
            message: message.into(),
            details,
        }
    }

    fn failure(code: String, message: String, details: Option<ImportReport>) -> Self {
        ApiResponse {
            ok: false,
            error_code: Some(code),
            message,
            details,
        }
    }
}

/// JSON body arm of the import endpoint; only `self-test` makes sense here
/// since JSON carries no file attachment.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonImportBody {
    data_type: String,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    dry_run: bool,
}

async fn api_import(State(st): State<AppState>, req: Request) -> Response {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = if content_type.starts_with("multipart/form-data") {
        parse_multipart(req).await
    } else {
        parse_json(req).await
    };

    let request = match parsed {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let dataset = request.dataset;
    let mut store = st.store.lock().await;
    match run_import(&mut store, &request) {
        Ok(report) => {
            let message = if dataset == Dataset::SelfTest {
                "store reachable".to_string()
            } else if !report.batch_errors.is_empty() {
                format!(
                    "partial import: {} rows imported, {} batch errors",
                    report.imported,
                    report.batch_errors.len()
                )
            } else if request.dry_run {
                format!("dry run: {} rows valid", report.valid_rows)
            } else {
                format!("imported {} rows", report.imported)
            };
            let partial = !report.batch_errors.is_empty();
            let mut resp = ApiResponse::success(message, Some(report));
            if partial {
                resp.error_code = Some("PARTIAL_IMPORT".to_string());
            }
            (StatusCode::OK, Json(resp)).into_response()
        }
        Err(err) => {
            let status = if err.is_internal() {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::BAD_REQUEST
            };
            tracing::warn!("import failed: dataset={} {err}", dataset.as_str());
            let resp = ApiResponse::failure(
                err.error_code(dataset),
                err.to_string(),
                error_report(&err),
            );
            (status, Json(resp)).into_response()
        }
    }
}

async fn parse_multipart(req: Request) -> Result<ImportRequest, Response> {
    let mut multipart: Multipart = req
        .extract()
        .await
        .map_err(|e| bad_request("INVALID_REQUEST", format!("invalid multipart body: {e}")))?;

    let mut data_type: Option<String> = None;
    let mut year: Option<i32> = None;
    let mut dry_run = false;
    let mut file_name = String::new();
    let mut bytes: Vec<u8> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                return Err(bad_request(
                    "INVALID_REQUEST",
                    format!("could not read multipart field: {e}"),
                ));
            }
        };
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "dataType" | "data_type" => {
                data_type = field.text().await.ok().map(|s| s.trim().to_string());
            }
            "year" => {
                year = field.text().await.ok().and_then(|s| s.trim().parse().ok());
            }
            "dryRun" | "dry_run" => {
                dry_run = field
                    .text()
                    .await
                    .map(|s| matches!(s.trim(), "true" | "1" | "yes"))
                    .unwrap_or(false);
            }
            "file" => {
                file_name = field.file_name().unwrap_or("upload.csv").to_string();
                bytes = field
                    .bytes()
                    .await
                    .map_err(|e| {
                        bad_request("INVALID_REQUEST", format!("could not read file field: {e}"))
                    })?
                    .to_vec();
            }
            _ => {}
        }
    }

    let dataset = resolve_dataset(data_type.as_deref())?;
    Ok(ImportRequest {
        dataset,
        year,
        dry_run,
        file_name,
        bytes,
    })
}

async fn parse_json(req: Request) -> Result<ImportRequest, Response> {
    let Json(body): Json<JsonImportBody> = req
        .extract()
        .await
        .map_err(|e| bad_request("INVALID_REQUEST", format!("invalid JSON body: {e}")))?;
    let dataset = resolve_dataset(Some(&body.data_type))?;
    Ok(ImportRequest {
        dataset,
        year: body.year,
        dry_run: body.dry_run,
        file_name: String::new(),
        bytes: Vec::new(),
    })
}

fn resolve_dataset(tag: Option<&str>) -> Result<Dataset, Response> {
    let tag = tag.unwrap_or("");
    Dataset::parse(tag).ok_or_else(|| {
        bad_request(
            "UNKNOWN_DATASET",
            format!("unknown dataType {tag:?}; expected one of mpfs|gpci|opps|dmepos|dmepen|clfs|zip-crosswalk|self-test"),
        )
    })
}

fn bad_request(code: &str, message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::failure(code.to_string(), message, None)),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetCount {
    data_type: Dataset,
    rows: u64,
}

async fn api_datasets(State(st): State<AppState>) -> Response {
    let store = st.store.lock().await;
    match store.dataset_counts() {
        Ok(counts) => {
            let out: Vec<DatasetCount> = counts
                .into_iter()
                .map(|(data_type, rows)| DatasetCount { data_type, rows })
                .collect();
            Json(out).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::failure(
                "STORE_UNAVAILABLE".to_string(),
                format!("{e:#}"),
                None,
            )),
        )
            .into_response(),
    }
}

async fn api_health() -> Response {
    Json(ApiResponse::success("ok", None)).into_response()
}
