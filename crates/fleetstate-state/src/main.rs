//! fleetstated - read-only HTTP view of the lifecycle state.
//!
//! Opens the document store, builds a [`State`](fleetstate_state::State)
//! and serves service summaries. All mutations go through the library API.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fleetstate_state::{RetryPolicy, Service, StateConfig, StateError};
use fleetstate_store::RocksStore;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Daemon configuration, read from the environment.
#[derive(Debug, Clone)]
struct DaemonConfig {
    listen_addr: String,
    data_dir: String,
    max_attempts: Option<u32>,
}

impl DaemonConfig {
    fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let max_attempts = match std::env::var("FLEETSTATE_MAX_ATTEMPTS") {
            Ok(v) => Some(v.parse()?),
            Err(_) => None,
        };
        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data".to_string()),
            max_attempts,
        })
    }

    fn state_config(&self) -> StateConfig {
        let mut retry = RetryPolicy::default();
        if self.max_attempts.is_some() {
            retry.max_attempts = self.max_attempts;
        }
        StateConfig::with_retry(retry)
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    state: Arc<fleetstate_state::State>,
}

/// Error returned by handlers.
struct ApiError(StateError);

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Serialize)]
struct ServiceSummary {
    name: String,
    charm: String,
    life: &'static str,
    unit_count: i64,
    relation_count: i64,
    exposed: bool,
}

impl From<&Service> for ServiceSummary {
    fn from(svc: &Service) -> Self {
        Self {
            name: svc.name().to_string(),
            charm: svc.charm_url().0.to_string(),
            life: svc.life().as_str(),
            unit_count: svc.unit_count(),
            relation_count: svc.relation_count(),
            exposed: svc.is_exposed(),
        }
    }
}

#[derive(Serialize)]
struct UnitSummary {
    name: String,
    life: &'static str,
    status: &'static str,
    machine: Option<String>,
}

#[derive(Serialize)]
struct ServiceDetail {
    #[serde(flatten)]
    service: ServiceSummary,
    units: Vec<UnitSummary>,
    relations: Vec<String>,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "fleetstated",
    })
}

async fn ready_handler(State(app): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    run_blocking(app, |st| st.all_services().map(|_| ())).await?;
    Ok((StatusCode::OK, "ready"))
}

async fn list_services(State(app): State<AppState>) -> Result<Json<Vec<ServiceSummary>>, ApiError> {
    let services = run_blocking(app, |st| st.all_services()).await?;
    Ok(Json(services.iter().map(ServiceSummary::from).collect()))
}

async fn get_service(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceDetail>, ApiError> {
    let detail = run_blocking(app, move |st| {
        let svc = st.service(&name)?;
        let units = svc
            .all_units()?
            .iter()
            .map(|unit| UnitSummary {
                name: unit.name().to_string(),
                life: unit.life().as_str(),
                status: unit.status().0.as_str(),
                machine: unit.assigned_machine_id().map(ToString::to_string),
            })
            .collect();
        let relations = svc
            .relations()?
            .iter()
            .map(|rel| rel.key().to_string())
            .collect();
        Ok(ServiceDetail {
            service: ServiceSummary::from(&svc),
            units,
            relations,
        })
    })
    .await?;
    Ok(Json(detail))
}

/// Run a store-bound closure off the async runtime.
async fn run_blocking<T, F>(app: AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&fleetstate_state::State) -> fleetstate_state::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&app.state))
        .await
        .map_err(|e| {
            ApiError(StateError::InconsistentState(format!("request task failed: {e}")))
        })?
        .map_err(ApiError::from)
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/services", get(list_services))
        .route("/services/:name", get(get_service))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetstate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting fleetstated");

    let config = DaemonConfig::from_env()?;

    let store = Arc::new(RocksStore::open(&config.data_dir)?);
    tracing::info!(data_dir = %config.data_dir, "Initialized RocksDB store");

    let state = fleetstate_state::State::open(store, config.state_config());
    tracing::info!(max_attempts = ?state.runner().policy().max_attempts, "Opened state");

    let app = create_router(AppState {
        state: Arc::new(state),
    });

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
