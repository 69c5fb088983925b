//! Playlist client tests against an in-process fake of the listing API.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use site_counts::catalog::{scan_matching, DescriptionFilter, PlaylistCatalog};
use site_counts::config::CatalogConfig;
use site_counts::error::PipelineError;
use site_counts::traits::Catalog;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct ApiState {
    /// Query strings received, in order.
    seen: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

fn video(n: usize, description: &str) -> Value {
    json!({
        "snippet": {
            "title": format!("Shiur {}", n),
            "publishedAt": format!("2024-02-{:02}T10:00:00Z", (n % 28) + 1),
            "description": description,
            "resourceId": { "kind": "youtube#video", "videoId": format!("v{}", n) }
        }
    })
}

async fn playlist_items(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.seen.lock().unwrap().push(params.clone());

    if params.get("key").map(String::as_str) != Some("test-key") {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": { "code": 403, "message": "API key not valid" } })),
        )
            .into_response();
    }

    let token = params.get("pageToken").cloned().unwrap_or_default();
    let body = match token.as_str() {
        "" => json!({
            "items": [
                video(1, "Parshas Bo #parsha"),
                video(2, "Tefilah chabura"),
                { "snippet": { "title": "Deleted video", "description": "#parsha" } }
            ],
            "nextPageToken": "CAIQAA"
        }),
        "CAIQAA" => json!({
            "items": [video(3, "#PARSHA Beshalach"), video(4, "")],
            "nextPageToken": ""
        }),
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };
    Json(body).into_response()
}

async fn start_fake_api() -> (String, ApiState) {
    let state = ApiState::default();
    let app = Router::new()
        .route("/youtube/v3/playlistItems", get(playlist_items))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/youtube/v3", addr), state)
}

fn catalog_config(api_base: &str) -> CatalogConfig {
    CatalogConfig {
        api_base: api_base.to_string(),
        page_size: 50,
        ..CatalogConfig::default()
    }
}

#[tokio::test]
async fn test_scan_follows_cursor_and_filters() {
    let (base, state) = start_fake_api().await;
    let client = PlaylistCatalog::new(&catalog_config(&base), "test-key".to_string()).unwrap();
    let filter = DescriptionFilter::new(&["#parsha".to_string()]);

    let scan = scan_matching(&client, "UUzx1pweEHKhsIfPkQZbRH4w", |d| filter.matches(d), 1)
        .await
        .unwrap();

    let ids: Vec<&str> = scan.all.iter().map(|e| e.entry_id.as_str()).collect();
    assert_eq!(ids, vec!["v1", "v3"]);
    assert_eq!(scan.recent.len(), 1);
    assert_eq!(scan.recent[0].entry_id, "v1");
    assert_eq!(scan.all[0].title.as_deref(), Some("Shiur 1"));

    let seen = state.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0]["playlistId"], "UUzx1pweEHKhsIfPkQZbRH4w");
    assert_eq!(seen[0]["maxResults"], "50");
    assert_eq!(seen[0]["part"], "snippet");
    assert_eq!(seen[1]["pageToken"], "CAIQAA");
}

#[tokio::test]
async fn test_rejected_key_is_catalog_status_error() {
    let (base, _state) = start_fake_api().await;
    let client = PlaylistCatalog::new(&catalog_config(&base), "revoked".to_string()).unwrap();

    let err = client
        .fetch_page("UUzx1pweEHKhsIfPkQZbRH4w", None)
        .await
        .unwrap_err();

    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::CatalogStatus { status, body, collection }) => {
            assert_eq!(*status, 403);
            assert_eq!(collection, "UUzx1pweEHKhsIfPkQZbRH4w");
            assert!(body.contains("API key not valid"));
        }
        other => panic!("expected CatalogStatus, got {:?}", other),
    }
}

#[test]
fn test_missing_key_fails_before_any_request() {
    let config = CatalogConfig {
        api_key_env: "SITECOUNTS_TEST_UNSET_KEY".to_string(),
        ..CatalogConfig::default()
    };

    let err = PlaylistCatalog::from_env(&config).err().unwrap();
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::MissingCredential { var }) => {
            assert_eq!(var, "SITECOUNTS_TEST_UNSET_KEY");
        }
        other => panic!("expected MissingCredential, got {:?}", other),
    }
}
