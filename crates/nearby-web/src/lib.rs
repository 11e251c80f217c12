//! Axum JSON surface over the aggregator.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use nearby_core::{BucketInfo, PlacesQuery, QueryError, TravelTimesRequest};
use nearby_pipeline::Aggregator;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "nearby-web";

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
}

impl AppState {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }
}

/// Query-string form of a places search. Missing numbers fail validation
/// instead of being defaulted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlacesParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_m: Option<u32>,
    /// Comma-separated category tokens.
    #[serde(default)]
    pub categories: Option<String>,
    pub open_now: Option<bool>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub force_refresh: bool,
}

impl PlacesParams {
    pub fn into_query(self) -> PlacesQuery {
        let categories = self
            .categories
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        PlacesQuery {
            open_now: self.open_now,
            limit: self.limit,
            force_refresh: self.force_refresh,
            ..PlacesQuery::new(
                self.lat.unwrap_or(f64::NAN),
                self.lng.unwrap_or(f64::NAN),
                self.radius_m.unwrap_or(0),
                categories,
            )
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshParams {
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

struct ApiError(QueryError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/places", get(places_handler))
        .route("/categories", get(categories_handler))
        .route("/travel-times", post(travel_times_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(bind_addr: &str, aggregator: Arc<Aggregator>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app(AppState::new(aggregator))).await?;
    Ok(())
}

async fn places_handler(State(state): State<Arc<AppState>>, Query(params): Query<PlacesParams>) -> Response {
    match state.aggregator.search(params.into_query()).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

async fn categories_handler(State(state): State<Arc<AppState>>) -> Json<Vec<BucketInfo>> {
    Json(state.aggregator.categories())
}

async fn travel_times_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RefreshParams>,
    Json(request): Json<TravelTimesRequest>,
) -> Response {
    match state.aggregator.travel_times(&request, params.force_refresh).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}
