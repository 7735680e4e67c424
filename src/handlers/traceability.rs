use axum::{
    extract::{Json, Path, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::common::{success_response, validate_input};
use crate::errors::ApiError;
use crate::handlers::AppState;
use crate::services::traceability::TraceSubject;

pub const REQUESTED_BY_HEADER: &str = "x-requested-by";

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RecallRequest {
    #[validate(length(min = 1, message = "at least one spool id is required"))]
    pub spool_ids: Vec<Uuid>,
}

/// Routes mounted under `/api/v1/traceability`
pub fn traceability_routes() -> Router<AppState> {
    Router::new()
        .route("/spools/:id/forward", get(trace_spool_forward))
        .route(
            "/serials/:serial_number/backward",
            get(trace_serial_backward),
        )
        .route(
            "/sales-orders/:id/backward",
            get(trace_sales_order_backward),
        )
        .route("/recall", post(analyze_recall))
        .route("/dhr/:kind/:identifier", get(export_dhr))
}

/// Forward trace from a spool to everything its material reached
#[utoipa::path(
    get,
    path = "/api/v1/traceability/spools/{id}/forward",
    params(("id" = String, Path, description = "Spool id")),
    responses(
        (status = 200, description = "Forward trace", body = crate::services::traceability::ForwardTraceResult),
        (status = 400, description = "Malformed spool id", body = crate::errors::ErrorResponse),
        (status = 404, description = "Spool not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Lineage store failure", body = crate::errors::ErrorResponse)
    ),
    tag = "traceability"
)]
pub async fn trace_spool_forward(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let spool_id = match TraceSubject::parse("spool", &id)? {
        TraceSubject::Spool(spool_id) => spool_id,
        other => {
            return Err(ApiError::BadRequest {
                message: format!("Expected a spool, got {}", other),
            })
        }
    };
    let result = state.traceability.trace_forward(spool_id).await?;
    Ok(success_response(result))
}

/// Backward trace from a finished unit to its spools and vendors
#[utoipa::path(
    get,
    path = "/api/v1/traceability/serials/{serial_number}/backward",
    params(("serial_number" = String, Path, description = "Serial number")),
    responses(
        (status = 200, description = "Backward trace", body = crate::services::traceability::BackwardTraceResult),
        (status = 400, description = "Blank serial number", body = crate::errors::ErrorResponse),
        (status = 404, description = "Serial number not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Lineage store failure", body = crate::errors::ErrorResponse)
    ),
    tag = "traceability"
)]
pub async fn trace_serial_backward(
    State(state): State<AppState>,
    Path(serial_number): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .traceability
        .trace_backward_serial(&serial_number)
        .await?;
    Ok(success_response(result))
}

/// Backward trace from a sales order to every spool behind it
#[utoipa::path(
    get,
    path = "/api/v1/traceability/sales-orders/{id}/backward",
    params(("id" = String, Path, description = "Sales order id")),
    responses(
        (status = 200, description = "Backward trace", body = crate::services::traceability::BackwardTraceResult),
        (status = 400, description = "Malformed sales order id", body = crate::errors::ErrorResponse),
        (status = 404, description = "Sales order not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Lineage store failure", body = crate::errors::ErrorResponse)
    ),
    tag = "traceability"
)]
pub async fn trace_sales_order_backward(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sales_order_id = match TraceSubject::parse("sales_order", &id)? {
        TraceSubject::SalesOrder(sales_order_id) => sales_order_id,
        other => {
            return Err(ApiError::BadRequest {
                message: format!("Expected a sales order, got {}", other),
            })
        }
    };
    let result = state
        .traceability
        .trace_backward_sales_order(sales_order_id)
        .await?;
    Ok(success_response(result))
}

/// Recall impact across a set of spools
#[utoipa::path(
    post,
    path = "/api/v1/traceability/recall",
    request_body = RecallRequest,
    responses(
        (status = 200, description = "Recall impact", body = crate::services::traceability::RecallImpact),
        (status = 400, description = "Empty or oversized spool list", body = crate::errors::ErrorResponse),
        (status = 404, description = "A spool was not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Lineage store failure", body = crate::errors::ErrorResponse)
    ),
    tag = "traceability"
)]
pub async fn analyze_recall(
    State(state): State<AppState>,
    Json(payload): Json<RecallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let impact = state
        .traceability
        .analyze_recall(&payload.spool_ids)
        .await?;
    info!(
        spools = payload.spool_ids.len(),
        severity = %impact.severity,
        "recall impact requested"
    );
    Ok(success_response(impact))
}

/// Device History Record for a spool, serial number or sales order, served as a download
#[utoipa::path(
    get,
    path = "/api/v1/traceability/dhr/{kind}/{identifier}",
    params(
        ("kind" = String, Path, description = "spool, serial_number or sales_order"),
        ("identifier" = String, Path, description = "Id or serial number of the subject"),
        ("X-Requested-By" = Option<String>, Header, description = "Recorded as the document's author")
    ),
    responses(
        (status = 200, description = "DHR document", body = crate::services::traceability::DhrDocument),
        (status = 400, description = "Unknown subject kind or malformed identifier", body = crate::errors::ErrorResponse),
        (status = 404, description = "Subject not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Lineage store failure", body = crate::errors::ErrorResponse)
    ),
    tag = "traceability"
)]
pub async fn export_dhr(
    State(state): State<AppState>,
    Path((kind, identifier)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let subject = TraceSubject::parse(&kind, &identifier)?;
    let requested_by = headers
        .get(REQUESTED_BY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(state.config.default_requested_by.as_str())
        .to_string();

    let document = state.traceability.dhr_for(&subject, &requested_by).await?;
    let body = document.to_json()?;
    info!(
        subject = %subject,
        document_id = %document.document_id,
        complete = document.complete,
        "DHR exported"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", document.file_name()),
            ),
        ],
        body,
    ))
}
