use httpmock::prelude::*;
use serde_json::json;

use bookmark_sync::app::{landing_route, AppOptions, AppSettings, BookmarkApp, Route};
use bookmark_sync::store::{DataStore, NewBookmark, SelectQuery, StoreErrorCode};

fn connect(server: &MockServer) -> BookmarkApp {
    BookmarkApp::connect(
        AppOptions::new(server.base_url(), "anon-key"),
        AppSettings::default(),
    )
    .expect("valid options")
}

fn mock_user(server: &MockServer) {
    server.mock(|when, then| {
        when.method(GET)
            .path("/auth/v1/user")
            .header("authorization", "Bearer user-token");
        then.status(200)
            .json_body(json!({ "id": "user-1", "email": "reader@example.com" }));
    });
}

#[tokio::test(flavor = "current_thread")]
async fn redirect_completion_leads_to_dashboard() {
    let server = MockServer::start_async().await;
    mock_user(&server);
    let app = connect(&server);
    assert_eq!(landing_route(app.session_store()).await, Route::Entry);

    app.rest_auth()
        .expect("hosted app")
        .complete_redirect(
            "http://localhost:3000/dashboard#access_token=user-token&refresh_token=r1&expires_in=3600",
        )
        .await
        .unwrap();

    assert_eq!(landing_route(app.session_store()).await, Route::Dashboard);
    let session = app.session_store().current().unwrap();
    assert_eq!(session.user_id(), "user-1");
    assert_eq!(session.email(), Some("reader@example.com"));
}

#[tokio::test(flavor = "current_thread")]
async fn store_requests_carry_the_user_token() {
    let server = MockServer::start_async().await;
    mock_user(&server);
    let select = server.mock(|when, then| {
        when.method(GET)
            .path("/rest/v1/bookmarks")
            .query_param("user_id", "eq.user-1")
            .query_param("order", "created_at.desc")
            .header("apikey", "anon-key")
            .header("authorization", "Bearer user-token");
        then.status(200).json_body(json!([
            {
                "id": 2,
                "title": "newer",
                "url": "https://example.com/b",
                "user_id": "user-1",
                "created_at": "2024-03-01T10:00:00Z"
            },
            {
                "id": 1,
                "title": "older",
                "url": "https://example.com/a",
                "user_id": "user-1",
                "created_at": "2024-03-01T09:00:00Z"
            }
        ]));
    });
    let app = connect(&server);
    app.rest_auth()
        .unwrap()
        .complete_redirect("http://localhost:3000/dashboard#access_token=user-token")
        .await
        .unwrap();

    let records = app
        .store()
        .select(&SelectQuery::owned_by("bookmarks", "user-1"))
        .await
        .unwrap();

    select.assert();
    let titles: Vec<_> = records.iter().map(|b| b.title.as_str()).collect();
    assert_eq!(titles, vec!["newer", "older"]);
    assert_eq!(records[0].id.as_str(), "2");
}

#[tokio::test(flavor = "current_thread")]
async fn rejected_insert_is_permission_denied() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/rest/v1/bookmarks");
        then.status(403)
            .json_body(json!({ "message": "new row violates row-level security policy" }));
    });
    let app = connect(&server);

    let record = NewBookmark::new("Paper", "https://example.com/paper", "user-2").unwrap();
    let err = app.store().insert("bookmarks", record).await.unwrap_err();

    assert_eq!(err.code, StoreErrorCode::PermissionDenied);
    assert!(err.message().contains("row-level security"));
}

#[tokio::test(flavor = "current_thread")]
async fn logout_revokes_remotely_and_clears_locally() {
    let server = MockServer::start_async().await;
    mock_user(&server);
    let logout = server.mock(|when, then| {
        when.method(POST)
            .path("/auth/v1/logout")
            .header("authorization", "Bearer user-token");
        then.status(204);
    });
    let app = connect(&server);
    app.rest_auth()
        .unwrap()
        .complete_redirect("http://localhost:3000/dashboard#access_token=user-token")
        .await
        .unwrap();
    app.session_store().resolve().await.unwrap();

    app.session_store().logout().await.unwrap();

    logout.assert();
    assert!(app.session_store().current().is_none());
    assert_eq!(landing_route(app.session_store()).await, Route::Entry);
}

#[test]
fn missing_options_are_reported_by_name() {
    let err = BookmarkApp::connect(
        AppOptions {
            project_url: Some("https://project.example.com".into()),
            anon_key: None,
        },
        AppSettings::default(),
    )
    .err()
    .unwrap();
    assert_eq!(err.code_str(), "app/missing-option");
}
