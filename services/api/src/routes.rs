use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use permit_sync::permit::{permit_router, RecordStore};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_permit_routes<S>(store: Arc<S>) -> axum::Router
where
    S: RecordStore + 'static,
{
    permit_router(store)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use permit_sync::permit::{
        commit, InMemoryRecordStore, PermitRecord, PermitTimestamp,
    };
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    fn record(permit_number: &str) -> PermitRecord {
        PermitRecord {
            permit_number: permit_number.to_string(),
            plate_number: "ABC123".to_string(),
            valid_from: PermitTimestamp::parse("Nov 7, 2025: 18:00").expect("from"),
            valid_to: PermitTimestamp::parse("Nov 14, 2025: 17:59").expect("to"),
            barcode_value: Some("6151625".to_string()),
            barcode_label: Some("00435".to_string()),
            amount_paid: None,
        }
    }

    fn app(store: Arc<InMemoryRecordStore>, ready: bool) -> axum::Router {
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        with_permit_routes(store).layer(Extension(state))
    }

    async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn seeded_store() -> Arc<InMemoryRecordStore> {
        let store = Arc::new(InMemoryRecordStore::default());
        commit(store.as_ref(), &record("T6146330")).expect("commit older");
        commit(store.as_ref(), &record("T6151625")).expect("commit current");
        store
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = get(app(seeded_store(), true), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn readiness_reflects_flag() {
        let (status, body) = get(app(seeded_store(), false), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "initializing");
    }

    #[tokio::test]
    async fn permit_without_key_returns_current_record() {
        let (status, body) = get(app(seeded_store(), true), "/api/v1/permit").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["permitNumber"], "T6151625");
        assert_eq!(body["validTo"], "Nov 14, 2025: 17:59");
        assert_eq!(body["amountPaid"], serde_json::Value::Null);
        assert_eq!(body["is_current"], true);
    }

    #[tokio::test]
    async fn permit_lookup_marks_historical_records() {
        let (status, body) =
            get(app(seeded_store(), true), "/api/v1/permit?permit=T6146330").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["permitNumber"], "T6146330");
        assert_eq!(body["is_current"], false);
    }

    #[tokio::test]
    async fn unknown_permit_is_not_found() {
        let (status, body) =
            get(app(seeded_store(), true), "/api/v1/permit?permit=T0000000").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not found");
        assert_eq!(body["permit"], "T0000000");
    }

    #[tokio::test]
    async fn empty_store_has_no_current_permit() {
        let store = Arc::new(InMemoryRecordStore::default());
        let (status, _) = get(app(store, true), "/api/v1/permit").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn history_lists_records_in_insertion_order() {
        let (status, body) = get(app(seeded_store(), true), "/api/v1/permit/history").await;
        assert_eq!(status, StatusCode::OK);
        let entries = body.as_array().expect("array");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["permitNumber"], "T6146330");
        assert_eq!(entries[0]["is_current"], false);
        assert_eq!(entries[1]["permitNumber"], "T6151625");
        assert_eq!(entries[1]["is_current"], true);
    }
}
