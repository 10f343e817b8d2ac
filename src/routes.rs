use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use relay_error::{AppError, AppResult};
use relay_types::NewOrder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::kafka::DeliveryProducer;
use crate::kafka::metrics::gather_metrics;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub producer: DeliveryProducer,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/orders", post(create_order))
        .route("/api/orders/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /api/orders
///
/// Fills in the id, date and status when absent, then hands the order to the
/// producer. Responds as soon as the record is queued.
async fn create_order(State(state): State<AppState>, body: Bytes) -> AppResult<impl IntoResponse> {
    let request: NewOrder = serde_json::from_slice(&body)?;
    let order = request
        .into_order(Utc::now().naive_utc())
        .map_err(|e| AppError::validation(format!("{:#}", e)))?;

    info!(order_id = %order.id, "Received order request");
    state.producer.send(&order).await;

    Ok((
        StatusCode::CREATED,
        format!("Order created and sent to Kafka: {}", order.id),
    ))
}

/// GET /api/orders/health
async fn health_check() -> &'static str {
    "Order service is running"
}

/// GET /metrics
async fn metrics_handler() -> Response {
    match gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => AppError::internal(format!("Failed to gather metrics: {:#}", e)).into_response(),
    }
}
