use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::record::PermitRecord;
use super::status::PermitStatus;
use super::store::{lookup, RecordStore};

/// A stored record as read back by a client, with its standing relative to
/// the current slot and to the clock.
#[derive(Debug, Clone, Serialize)]
pub struct PermitView {
    #[serde(flatten)]
    pub record: PermitRecord,
    pub is_current: bool,
    pub status: PermitStatus,
    pub status_label: &'static str,
    pub days_remaining: i64,
}

impl PermitView {
    pub fn new(record: PermitRecord, current: Option<&PermitRecord>, now: NaiveDateTime) -> Self {
        let is_current =
            current.is_some_and(|current| current.permit_number == record.permit_number);
        let status = record.status_at(now);
        Self {
            is_current,
            status,
            status_label: status.label(),
            days_remaining: record.days_remaining(now.date()),
            record,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PermitQuery {
    #[serde(default)]
    permit: Option<String>,
}

/// Read-only endpoints over the record store.
pub fn permit_router<S>(store: Arc<S>) -> Router
where
    S: RecordStore + 'static,
{
    Router::new()
        .route("/api/v1/permit", get(permit_handler::<S>))
        .route("/api/v1/permit/history", get(history_handler::<S>))
        .with_state(store)
}

pub(crate) async fn permit_handler<S>(
    State(store): State<Arc<S>>,
    Query(query): Query<PermitQuery>,
) -> Response
where
    S: RecordStore + 'static,
{
    let requested = query.permit.as_deref();
    let found = lookup(store.as_ref(), requested).and_then(|record| {
        let current = store.get_current()?;
        Ok(record.map(|record| PermitView::new(record, current.as_ref(), now())))
    });

    match found {
        Ok(Some(view)) => (StatusCode::OK, axum::Json(view)).into_response(),
        Ok(None) => {
            let payload = json!({
                "error": "not found",
                "permit": requested,
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(err) => {
            let payload = json!({
                "error": err.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn history_handler<S>(State(store): State<Arc<S>>) -> Response
where
    S: RecordStore + 'static,
{
    let views = store.history().and_then(|history| {
        let current = store.get_current()?;
        let now = now();
        Ok(history
            .into_iter()
            .map(|record| PermitView::new(record, current.as_ref(), now))
            .collect::<Vec<_>>())
    });

    match views {
        Ok(views) => (StatusCode::OK, axum::Json(views)).into_response(),
        Err(err) => {
            let payload = json!({
                "error": err.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}
