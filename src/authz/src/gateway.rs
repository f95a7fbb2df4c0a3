//! HTTP surface of the authorization core
//!
//! ## Endpoints
//!
//! - `POST /v1/classify` - Resource attributes a request acts on
//! - `POST /v1/authorize` - Classify a request and decide on it
//! - `POST /v1/authorize/batch` - Decide on explicit resources
//! - `POST /v1/businesses` - Businesses a user may see
//! - `GET /health` - Liveness, including the policy engine

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use crate::cache::{BusinessScope, BusinessScopeCache};
use crate::client::Authorize;
use crate::error::AuthzError;
use crate::meta::{Decision, ResourceAttribute, UserInfo};
use crate::parser::{Classifier, Metadata, RequestContext};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub classifier: Arc<Classifier>,
    pub authorizer: Arc<dyn Authorize>,
    pub cache: Arc<BusinessScopeCache>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        classifier: Arc<Classifier>,
        authorizer: Arc<dyn Authorize>,
        cache: Arc<BusinessScopeCache>,
    ) -> Self {
        Self {
            classifier,
            authorizer,
            cache,
            start_time: Instant::now(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Application error type
#[derive(Debug)]
pub struct AppError(AuthzError);

impl From<AuthzError> for AppError {
    fn from(err: AuthzError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match &self.0 {
            AuthzError::Classification(_) => (StatusCode::BAD_REQUEST, "classification_error"),
            AuthzError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            AuthzError::Denied(_) => (StatusCode::FORBIDDEN, "permission_denied"),
            AuthzError::Indeterminate(_) => (StatusCode::SERVICE_UNAVAILABLE, "indeterminate"),
            AuthzError::CacheRefresh(_) => (StatusCode::SERVICE_UNAVAILABLE, "cache_refresh_error"),
            AuthzError::Registration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "registration_error"),
            AuthzError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            AuthzError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AuthzError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: self.0.to_string(),
        });

        (status, body).into_response()
    }
}

/// Inbound request to classify
#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl ClassifyRequest {
    fn context(self) -> Result<RequestContext, AuthzError> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| AuthzError::InvalidInput(format!("invalid method {:?}: {e}", self.method)))?;
        let ctx = RequestContext::new(method, &self.uri, self.body.unwrap_or(Value::Null))?;
        Ok(match self.metadata {
            Some(metadata) => ctx.with_metadata(metadata),
            None => ctx,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub resources: Vec<ResourceAttribute>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub user: UserInfo,
    #[serde(flatten)]
    pub request: ClassifyRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub authorized: bool,
    pub reason: String,
    pub resources: Vec<ResourceAttribute>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub user: UserInfo,
    pub resources: Vec<ResourceAttribute>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub decisions: Vec<Decision>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BusinessesResponse {
    /// `None` when enforcement is off and every business is visible
    pub businesses: Option<Vec<i64>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub engine: String,
    pub enforcement: bool,
    pub uptime_seconds: u64,
    pub version: String,
}

/// POST /v1/classify
async fn classify(
    State(state): State<AppState>,
    Json(req): Json<ClassifyRequest>,
) -> Result<Json<ClassifyResponse>, AppError> {
    let ctx = req.context()?;
    let resources = state.classifier.classify(&ctx)?;
    Ok(Json(ClassifyResponse { resources }))
}

/// POST /v1/authorize
async fn authorize(
    State(state): State<AppState>,
    Json(req): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, AppError> {
    let ctx = req.request.context()?;
    let attribute = state.classifier.parse(req.user, &ctx)?;
    let decision = state.authorizer.authorize(&attribute).await?;

    info!(
        user = %attribute.user.user_name,
        tenant = %attribute.user.supplier_account,
        method = %ctx.method,
        uri = %ctx.uri,
        authorized = decision.authorized,
        "authorization decision"
    );

    Ok(Json(AuthorizeResponse {
        authorized: decision.authorized,
        reason: decision.reason,
        resources: attribute.resources,
    }))
}

/// POST /v1/authorize/batch
async fn authorize_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    let decisions = state
        .authorizer
        .authorize_batch(&req.user, &req.resources)
        .await?;
    Ok(Json(BatchResponse { decisions }))
}

/// POST /v1/businesses
async fn businesses(
    State(state): State<AppState>,
    Json(user): Json<UserInfo>,
) -> Result<Json<BusinessesResponse>, AppError> {
    let scope = state
        .cache
        .scoped_query(&user, |scope| async move { Ok::<_, AuthzError>(scope) })
        .await?;

    let businesses = match scope {
        BusinessScope::Unrestricted => None,
        BusinessScope::Only(ids) => Some(ids),
    };
    Ok(Json(BusinessesResponse { businesses }))
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, engine) = match state.authorizer.ping().await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    };

    (
        status,
        Json(HealthResponse {
            status: if status.is_success() { "healthy" } else { "degraded" }.to_string(),
            engine,
            enforcement: state.authorizer.enabled(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
            version: crate::VERSION.to_string(),
        }),
    )
}

/// Create the HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/v1/classify", post(classify))
        .route("/v1/authorize", post(authorize))
        .route("/v1/authorize/batch", post(authorize_batch))
        .route("/v1/businesses", post(businesses))
        .route("/health", get(health_check))
        .layer(ServiceBuilder::new().layer(trace).layer(cors))
        .with_state(state)
}
