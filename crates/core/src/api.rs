//! HTTP façade over the account contract.
//!
//! Reads are evaluated on a single peer; writes are submitted and only
//! answered once committed. Request and response bodies use the account's
//! ledger field names (`DEALERID`, `MSISDN`, ...).

use std::sync::Arc;

use account_registry::{
    Account, ErrorKind, HistoryRecord, CREATE_ASSET, DELETE_ASSET, GET_ALL_ASSETS,
    GET_ASSET_HISTORY, READ_ASSET, UPDATE_ASSET,
};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::client::transport::TransportError;
use crate::client::{CallError, Contract, GatewayError, TransactionOutcome};

pub type LedgerFuture<'a> = BoxFuture<'a, Result<Vec<u8>, GatewayError>>;

/// The two ledger calls the façade needs.
pub trait AssetLedger: Send + Sync + 'static {
    fn evaluate<'a>(&'a self, function: &'a str, args: Vec<String>) -> LedgerFuture<'a>;
    fn submit<'a>(&'a self, function: &'a str, args: Vec<String>) -> LedgerFuture<'a>;
}

impl AssetLedger for Contract {
    fn evaluate<'a>(&'a self, function: &'a str, args: Vec<String>) -> LedgerFuture<'a> {
        Box::pin(async move { Contract::evaluate(self, function, &args).await })
    }

    fn submit<'a>(&'a self, function: &'a str, args: Vec<String>) -> LedgerFuture<'a> {
        Box::pin(async move { Contract::submit(self, function, &args).await })
    }
}

#[derive(Clone)]
struct AppState {
    ledger: Arc<dyn AssetLedger>,
}

pub fn router(ledger: Arc<dyn AssetLedger>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/assets", get(list_assets).post(create_asset))
        .route(
            "/assets/{msisdn}",
            get(read_asset).put(update_asset).delete(delete_asset),
        )
        .route("/assets/{msisdn}/history", get(asset_history))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { ledger })
}

// =============================================================================
// Request bodies
// =============================================================================

/// Account fields as sent by API clients. Missing fields default to empty
/// or zero.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct AccountRequest {
    #[serde(rename = "DEALERID")]
    dealer_id: String,
    #[serde(rename = "MSISDN")]
    msisdn: String,
    #[serde(rename = "MPIN")]
    mpin: String,
    #[serde(rename = "BALANCE")]
    balance: i64,
    #[serde(rename = "STATUS")]
    status: String,
    #[serde(rename = "TRANSAMOUNT")]
    trans_amount: i64,
    #[serde(rename = "TRANSTYPE")]
    trans_type: String,
    #[serde(rename = "REMARKS")]
    remarks: String,
}

impl From<AccountRequest> for Account {
    fn from(req: AccountRequest) -> Self {
        Account {
            dealer_id: req.dealer_id,
            msisdn: req.msisdn,
            mpin: req.mpin,
            balance: req.balance,
            status: req.status,
            trans_amount: req.trans_amount,
            trans_type: req.trans_type,
            remarks: req.remarks,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Ledger(#[from] GatewayError),
    #[error("invalid ledger response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidAmount | ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::BadRequest(message) => {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
            }
            ApiError::Decode(e) => {
                tracing::error!(error = %e, "Ledger returned an undecodable payload");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": format!("invalid ledger response: {e}") })),
                )
                    .into_response();
            }
            ApiError::Ledger(err) => err,
        };

        if let Some(kind) = err.contract_error_kind() {
            let message = err.contract_message().unwrap_or_default();
            return (status_for_kind(kind), Json(json!({ "error": message }))).into_response();
        }

        if err.outcome() == TransactionOutcome::Unknown {
            tracing::warn!(tx_id = ?err.tx_id(), error = %err, "Transaction outcome unknown");
            return (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({
                    "error": err.to_string(),
                    "outcome": "unknown",
                    "txId": err.tx_id(),
                })),
            )
                .into_response();
        }

        let status = match &err {
            GatewayError::Commit { .. } => StatusCode::CONFLICT,
            _ => match err.cause() {
                Some(CallError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
                Some(CallError::Transport(TransportError::Unavailable(_))) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "Ledger call failed");
        }

        let mut body = json!({ "error": err.to_string() });
        if let Some(tx_id) = err.tx_id() {
            body["txId"] = json!(tx_id);
        }
        (status, Json(body)).into_response()
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ApiError> {
    // Some peers return an empty payload for an empty range
    if payload.is_empty() {
        return Ok(serde_json::from_slice(b"[]")?);
    }
    Ok(serde_json::from_slice(payload)?)
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_assets(State(state): State<AppState>) -> Result<Json<Vec<Account>>, ApiError> {
    let payload = state.ledger.evaluate(GET_ALL_ASSETS, Vec::new()).await?;
    Ok(Json(decode(&payload)?))
}

async fn read_asset(
    State(state): State<AppState>,
    Path(msisdn): Path<String>,
) -> Result<Json<Account>, ApiError> {
    let payload = state.ledger.evaluate(READ_ASSET, vec![msisdn]).await?;
    Ok(Json(serde_json::from_slice(&payload)?))
}

async fn asset_history(
    State(state): State<AppState>,
    Path(msisdn): Path<String>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    let payload = state.ledger.evaluate(GET_ASSET_HISTORY, vec![msisdn]).await?;
    Ok(Json(decode(&payload)?))
}

async fn create_asset(
    State(state): State<AppState>,
    body: Result<Json<AccountRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    let account = Account::from(request);
    if account.msisdn.is_empty() {
        return Err(ApiError::BadRequest("MSISDN is required".into()));
    }

    state.ledger.submit(CREATE_ASSET, account.to_args()).await?;
    tracing::info!(msisdn = %account.msisdn, "Account created");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "created", "msisdn": account.msisdn })),
    ))
}

async fn update_asset(
    State(state): State<AppState>,
    Path(msisdn): Path<String>,
    body: Result<Json<AccountRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    let mut account = Account::from(request);
    if account.msisdn.is_empty() {
        account.msisdn = msisdn.clone();
    } else if account.msisdn != msisdn {
        return Err(ApiError::BadRequest(format!(
            "MSISDN {} in body does not match path {msisdn}",
            account.msisdn
        )));
    }

    state.ledger.submit(UPDATE_ASSET, account.to_args()).await?;
    tracing::info!(%msisdn, "Account updated");
    Ok(Json(json!({ "message": "updated", "msisdn": msisdn })))
}

async fn delete_asset(
    State(state): State<AppState>,
    Path(msisdn): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.ledger.submit(DELETE_ASSET, vec![msisdn.clone()]).await?;
    tracing::info!(%msisdn, "Account deleted");
    Ok(Json(json!({ "message": "deleted", "msisdn": msisdn })))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::client::in_process::{Endpoint, InProcessLedger};
    use crate::client::{Gateway, GatewayOptions};
    use crate::identity::fixtures;

    fn setup() -> (Arc<InProcessLedger>, Router) {
        let ledger = Arc::new(InProcessLedger::new("mychannel", "accounts"));
        let gateway = Gateway::connect(
            fixtures::signing_identity(),
            ledger.clone(),
            GatewayOptions::default(),
        )
        .unwrap();
        let contract = gateway.network("mychannel").contract("accounts");
        (ledger, router(Arc::new(contract)))
    }

    fn sample(msisdn: &str) -> Value {
        json!({
            "DEALERID": "D100",
            "MSISDN": msisdn,
            "MPIN": "4321",
            "BALANCE": 1500,
            "STATUS": "active",
            "TRANSAMOUNT": 0,
            "TRANSTYPE": "opening",
            "REMARKS": "new dealer",
        })
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (_ledger, app) = setup();
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_create_read_list() {
        let (_ledger, app) = setup();

        let (status, body) = call(&app, "GET", "/assets", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, body) = call(&app, "POST", "/assets", Some(sample("254700000001"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({ "message": "created", "msisdn": "254700000001" }));

        let (status, body) = call(&app, "GET", "/assets/254700000001", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, sample("254700000001"));

        call(&app, "POST", "/assets", Some(sample("254700000000"))).await;
        let (_, body) = call(&app, "GET", "/assets", None).await;
        let keys: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["MSISDN"].as_str().unwrap())
            .collect();
        assert_eq!(keys, ["254700000000", "254700000001"]);
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let (_ledger, app) = setup();
        call(&app, "POST", "/assets", Some(sample("1"))).await;
        let (status, body) = call(&app, "POST", "/assets", Some(sample("1"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "the asset 1 already exists");
    }

    #[tokio::test]
    async fn test_missing_asset_not_found() {
        let (_ledger, app) = setup();
        for (method, uri, body) in [
            ("GET", "/assets/9", None),
            ("PUT", "/assets/9", Some(sample("9"))),
            ("DELETE", "/assets/9", None),
        ] {
            let (status, _) = call(&app, method, uri, body).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn test_malformed_body_bad_request() {
        let (ledger, app) = setup();
        let request = Request::builder()
            .method("POST")
            .uri("/assets")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let mut body = sample("1");
        body["BALANCE"] = json!("lots");
        let (status, _) = call(&app, "POST", "/assets", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "POST", "/assets", Some(json!({ "DEALERID": "D1" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(ledger.height(), 0);
    }

    #[tokio::test]
    async fn test_update_takes_path_msisdn() {
        let (_ledger, app) = setup();
        call(&app, "POST", "/assets", Some(sample("1"))).await;

        let mut body = sample("1");
        body.as_object_mut().unwrap().remove("MSISDN");
        body["BALANCE"] = json!(2500);
        let (status, response) = call(&app, "PUT", "/assets/1", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response, json!({ "message": "updated", "msisdn": "1" }));

        let (_, read) = call(&app, "GET", "/assets/1", None).await;
        assert_eq!(read["BALANCE"], 2500);
        assert_eq!(read["MSISDN"], "1");
    }

    #[tokio::test]
    async fn test_update_msisdn_mismatch_rejected() {
        let (ledger, app) = setup();
        call(&app, "POST", "/assets", Some(sample("1"))).await;
        let height = ledger.height();

        let (status, body) = call(&app, "PUT", "/assets/1", Some(sample("2"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("does not match"));
        assert_eq!(ledger.height(), height);
    }

    #[tokio::test]
    async fn test_delete_and_history() {
        let (_ledger, app) = setup();
        call(&app, "POST", "/assets", Some(sample("1"))).await;
        let (status, body) = call(&app, "DELETE", "/assets/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "deleted", "msisdn": "1" }));

        let (status, _) = call(&app, "GET", "/assets/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, history) = call(&app, "GET", "/assets/1/history", None).await;
        assert_eq!(status, StatusCode::OK);
        let history = history.as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["isDelete"], false);
        assert_eq!(history[0]["value"]["DEALERID"], "D100");
        assert_eq!(history[1]["isDelete"], true);
        assert!(history[1].get("value").is_none());
    }

    #[tokio::test]
    async fn test_ledger_unavailable() {
        let (ledger, app) = setup();
        ledger.fail(Endpoint::Evaluate);
        let (status, _) = call(&app, "GET", "/assets", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_timeout_gateway_timeout() {
        let (ledger, app) = setup();
        ledger.delay(Endpoint::Evaluate, Duration::from_secs(60));
        let (status, body) = call(&app, "GET", "/assets/1", None).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert!(body.get("outcome").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_outcome_reported() {
        let (ledger, app) = setup();
        ledger.delay(Endpoint::CommitStatus, Duration::from_secs(60));

        let (status, body) = call(&app, "POST", "/assets", Some(sample("1"))).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["outcome"], "unknown");
        assert_eq!(body["txId"].as_str().map(str::len), Some(64));
    }
}
