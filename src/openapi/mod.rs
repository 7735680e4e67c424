use axum::{response::Json, routing::get, Router};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "StateSet Traceability API",
        version = "1.0.0",
        description = r#"
# Material Lineage Traceability

Walks the chain spool → production order → sales order → customer → serial
number in either direction.

## Features

- **Forward trace**: everything a spool's material reached
- **Backward trace**: every spool and vendor behind a serial number or sales order
- **Recall impact**: deduplicated reach of a set of spools, graded LOW, MEDIUM or HIGH
- **Device History Records**: audit documents for any trace subject

## Error Handling

Errors share one response format:

```json
{
  "error": "Not Found",
  "message": "Spool 7f1c… not found",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

Irregular lineage data never fails a request. It is returned in the
`warnings` array of the result instead.
        "#,
        contact(
            name = "StateSet Support",
            email = "support@stateset.io",
            url = "https://stateset.io"
        ),
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "traceability", description = "Lineage traces, recall impact and DHR export")
    ),
    paths(
        crate::handlers::traceability::trace_spool_forward,
        crate::handlers::traceability::trace_serial_backward,
        crate::handlers::traceability::trace_sales_order_backward,
        crate::handlers::traceability::analyze_recall,
        crate::handlers::traceability::export_dhr,
    ),
    components(
        schemas(
            crate::handlers::traceability::RecallRequest,
            crate::services::traceability::ForwardTraceResult,
            crate::services::traceability::BackwardTraceResult,
            crate::services::traceability::RecallImpact,
            crate::services::traceability::RecallSeverity,
            crate::services::traceability::DhrDocument,
            crate::services::traceability::TraceResult,
            crate::services::traceability::DataWarning,
            crate::services::traceability::WarningKind,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

/// Serves the generated document at `/api-docs/openapi.json`
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}
