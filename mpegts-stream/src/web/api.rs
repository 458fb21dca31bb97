//! JSON handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::state::WebState;
use crate::catalog::RecordKind;
use crate::config::{PropertyMap, StreamMonitorConfig};
use crate::monitor::MonitorError;

type ApiResponse = (StatusCode, Json<Value>);

fn failure(status: StatusCode, error: impl ToString) -> ApiResponse {
    (
        status,
        Json(json!({
            "success": false,
            "error": error.to_string()
        })),
    )
}

fn monitor_failure(e: MonitorError) -> ApiResponse {
    let status = match &e {
        MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
        MonitorError::AlreadyExists(_) | MonitorError::InvalidState { .. } => StatusCode::CONFLICT,
        MonitorError::Config(_) => StatusCode::BAD_REQUEST,
        MonitorError::Bind { .. } | MonitorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    failure(status, e)
}

// ============================================================================
// Stream endpoints
// ============================================================================

/// List every configured stream.
pub async fn get_streams(State(web_state): State<Arc<WebState>>) -> ApiResponse {
    let streams = web_state.registry.statuses().await;
    let count = streams.len();

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "streams": streams,
            "count": count
        })),
    )
}

pub async fn get_stream(
    State(web_state): State<Arc<WebState>>,
    Path(title): Path<String>,
) -> ApiResponse {
    match web_state.registry.get(&title).await {
        Some(monitor) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "stream": monitor.status()
            })),
        ),
        None => monitor_failure(MonitorError::NotFound(title)),
    }
}

/// Register a stream from a property map, starting it if requested.
pub async fn add_stream(
    State(web_state): State<Arc<WebState>>,
    Json(properties): Json<PropertyMap>,
) -> ApiResponse {
    let config = match StreamMonitorConfig::from_properties(&properties) {
        Ok(config) => config,
        Err(e) => return monitor_failure(e.into()),
    };
    let start = config.start_immediately;

    let monitor = match web_state.registry.add(config).await {
        Ok(monitor) => monitor,
        Err(e) => return monitor_failure(e),
    };
    if start {
        if let Err(e) = monitor.start().await {
            return monitor_failure(e);
        }
    }

    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "stream": monitor.status()
        })),
    )
}

pub async fn remove_stream(
    State(web_state): State<Arc<WebState>>,
    Path(title): Path<String>,
) -> ApiResponse {
    match web_state.registry.remove(&title).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => monitor_failure(e),
    }
}

pub async fn start_stream(
    State(web_state): State<Arc<WebState>>,
    Path(title): Path<String>,
) -> ApiResponse {
    match web_state.registry.start(&title).await {
        Ok(status) => (
            StatusCode::OK,
            Json(json!({ "success": true, "stream": status })),
        ),
        Err(e) => monitor_failure(e),
    }
}

pub async fn stop_stream(
    State(web_state): State<Arc<WebState>>,
    Path(title): Path<String>,
) -> ApiResponse {
    match web_state.registry.stop(&title).await {
        Ok(status) => (
            StatusCode::OK,
            Json(json!({ "success": true, "stream": status })),
        ),
        Err(e) => monitor_failure(e),
    }
}

pub async fn update_stream_config(
    State(web_state): State<Arc<WebState>>,
    Path(title): Path<String>,
    Json(changes): Json<PropertyMap>,
) -> ApiResponse {
    match web_state.registry.update_config(&title, &changes).await {
        Ok(status) => (
            StatusCode::OK,
            Json(json!({ "success": true, "stream": status })),
        ),
        Err(e) => monitor_failure(e),
    }
}

// ============================================================================
// Record endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RecordQuery {
    pub kind: Option<String>,
}

pub async fn get_records(
    State(web_state): State<Arc<WebState>>,
    Query(query): Query<RecordQuery>,
) -> ApiResponse {
    let kind = match query.kind.as_deref() {
        None => None,
        Some(name) => match RecordKind::parse(name) {
            Some(kind) => Some(kind),
            None => {
                return failure(
                    StatusCode::BAD_REQUEST,
                    format!("unknown record kind: {}", name),
                )
            }
        },
    };

    let db = web_state.database.lock().await;
    match db.list_records(kind) {
        Ok(records) => {
            let count = records.len();
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "records": records,
                    "count": count
                })),
            )
        }
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn get_record(
    State(web_state): State<Arc<WebState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    let db = web_state.database.lock().await;

    let record = match db.get_record(&id) {
        Ok(Some(record)) => record,
        Ok(None) => return failure(StatusCode::NOT_FOUND, format!("no record {}", id)),
        Err(e) => return failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    let content = match db.get_content(&id) {
        Ok(content) => content,
        Err(e) => return failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "record": record,
            "content": content
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::catalog::{CatalogHandle, Record};
    use crate::config::{property, PropertyValue};
    use crate::database::Database;
    use crate::monitor::MonitorRegistry;

    fn web_state(dir: &std::path::Path) -> Arc<WebState> {
        let database = Arc::new(tokio::sync::Mutex::new(Database::open_in_memory().unwrap()));
        let catalog: CatalogHandle = Arc::new(MemoryCatalog::new());
        let registry = Arc::new(MonitorRegistry::new(catalog, dir.to_path_buf()));
        Arc::new(WebState::new(database, registry))
    }

    fn properties(title: &str) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert(property::TITLE.into(), PropertyValue::Text(title.into()));
        props.insert(
            property::MONITORED_ADDRESS.into(),
            PropertyValue::Text("udp://127.0.0.1:0".into()),
        );
        props
    }

    #[tokio::test]
    async fn test_stream_lifecycle_over_api() {
        let dir = tempfile::tempdir().unwrap();
        let state = web_state(dir.path());

        let (status, _) = add_stream(State(state.clone()), Json(properties("cam"))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = add_stream(State(state.clone()), Json(properties("cam"))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, Json(body)) = start_stream(State(state.clone()), Path("cam".into())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stream"]["state"], "MONITORING");

        let (status, _) = start_stream(State(state.clone()), Path("cam".into())).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let mut changes = PropertyMap::new();
        changes.insert(property::BYTE_COUNT.into(), PropertyValue::Integer(0));
        let (status, _) =
            update_stream_config(State(state.clone()), Path("cam".into()), Json(changes)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, Json(body)) = stop_stream(State(state.clone()), Path("cam".into())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stream"]["state"], "STOPPED");

        let (_, Json(body)) = get_streams(State(state.clone())).await;
        assert_eq!(body["count"], 1);

        let (status, _) = get_stream(State(state), Path("missing".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_record_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let state = web_state(dir.path());

        let mut record = Record::new(RecordKind::Parent);
        record.id = "abc".into();
        state.database.lock().await.insert_record(&record).unwrap();

        let (status, Json(body)) = get_record(State(state.clone()), Path("abc".into())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["record"]["id"], "abc");
        assert!(body["content"].is_null());

        let (status, _) = get_record(State(state.clone()), Path("nope".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, Json(body)) = get_records(
            State(state.clone()),
            Query(RecordQuery {
                kind: Some("parent".into()),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (status, _) = get_records(
            State(state),
            Query(RecordQuery {
                kind: Some("bogus".into()),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
