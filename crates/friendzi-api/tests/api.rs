use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use friendzi_api::auth::AppStateInner;
use friendzi_db::Database;

fn app() -> Router {
    let state = Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        jwt_secret: "integration-test-secret".into(),
        token_ttl: chrono::Duration::days(7),
        expose_internal_errors: false,
    });
    friendzi_api::router(state)
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

struct TestUser {
    id: String,
    token: String,
}

async fn register(app: &Router, username: &str) -> TestUser {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": "correct-horse",
            "fullName": username,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    TestUser {
        id: body["user"]["id"].as_str().unwrap().to_string(),
        token: body["token"].as_str().unwrap().to_string(),
    }
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let app = app();

    let (status, body) = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = call(&app, Method::GET, "/api/nothing-here", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "success": false, "message": "Route not found" }));
}

#[tokio::test]
async fn register_login_and_me() {
    let app = app();
    let alice = register(&app, "alice").await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({ "username": "alice", "email": "other@example.com", "password": "password1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({ "username": "bo", "email": "bo@example.com", "password": "password1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": "alice@example.com", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": "ALICE@example.com", "password": "correct-horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], alice.id.as_str());
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = call(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["isOnline"], true);
    assert!(body["user"].get("password").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_sign_ups_yield_one_account_and_conflicts() {
    let app = app();

    let mut handles = Vec::new();
    for i in 0..4 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            call(
                &app,
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "username": format!("racer{}", i),
                    "email": "same@example.com",
                    "password": "correct-horse",
                })),
            )
            .await
        }));
    }

    let mut statuses = Vec::new();
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        if status == StatusCode::CONFLICT {
            assert_eq!(body["success"], false);
        }
        statuses.push(status);
    }
    statuses.sort_by_key(|s| s.as_u16());
    assert_eq!(
        statuses,
        vec![
            StatusCode::CREATED,
            StatusCode::CONFLICT,
            StatusCode::CONFLICT,
            StatusCode::CONFLICT,
        ]
    );
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let app = app();

    let (status, body) = call(&app, Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = call(&app, Method::GET, "/api/posts", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn direct_messaging_flow() {
    let app = app();
    let alice = register(&app, "alice").await;
    let bob = register(&app, "bob").await;
    let carol = register(&app, "carol").await;

    // First contact creates the conversation; the second request finds it.
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/messages/conversations",
        Some(&alice.token),
        Some(json!({ "userId": bob.id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let conversation_id = body["conversation"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["conversation"]["users"].as_array().unwrap().len(), 2);
    assert_eq!(body["conversation"]["unreadCount"], 0);

    let (_, body) = call(
        &app,
        Method::POST,
        "/api/messages/conversations",
        Some(&bob.token),
        Some(json!({ "userId": alice.id })),
    )
    .await;
    assert_eq!(body["conversation"]["id"], conversation_id.as_str());

    let uri = format!("/api/messages/conversations/{}", conversation_id);

    let (status, _) = call(&app, Method::POST, &uri, Some(&alice.token), Some(json!({ "content": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, Method::POST, &uri, Some(&alice.token), Some(json!({ "content": "hi bob" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"]["content"], "hi bob");
    assert_eq!(body["message"]["isRead"], false);
    assert_eq!(body["message"]["sender"]["username"], "alice");

    // Bob sees one unread message; Alice's own count stays at zero.
    let (_, body) = call(&app, Method::GET, "/api/messages/conversations", Some(&bob.token), None).await;
    let listed = &body["conversations"][0];
    assert_eq!(listed["id"], conversation_id.as_str());
    assert_eq!(listed["unreadCount"], 1);
    assert_eq!(listed["lastMessage"]["content"], "hi bob");
    let others = listed["users"].as_array().unwrap();
    assert_eq!(others.len(), 1);
    assert_eq!(others[0]["id"], alice.id.as_str());
    assert_eq!(body["totalCount"], 1);

    let (_, body) = call(&app, Method::GET, "/api/messages/conversations", Some(&alice.token), None).await;
    assert_eq!(body["conversations"][0]["unreadCount"], 0);

    // Reading returns the page as it was, then marks it read.
    let (status, body) = call(&app, Method::GET, &uri, Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"][0]["isRead"], false);
    assert_eq!(body["totalCount"], 1);
    assert_eq!(body["currentPage"], 1);
    assert_eq!(body["totalPages"], 1);

    let (_, body) = call(&app, Method::GET, &uri, Some(&bob.token), None).await;
    assert_eq!(body["messages"][0]["isRead"], true);

    let (_, body) = call(&app, Method::GET, "/api/messages/conversations", Some(&bob.token), None).await;
    assert_eq!(body["conversations"][0]["unreadCount"], 0);

    // Outsiders are refused; unknown conversations are not found.
    let (status, _) = call(&app, Method::GET, &uri, Some(&carol.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, Method::POST, &uri, Some(&carol.token), Some(json!({ "content": "hey" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let missing = format!("/api/messages/conversations/{}", uuid::Uuid::new_v4());
    let (status, _) = call(&app, Method::GET, &missing, Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Explicit mark-read.
    call(&app, Method::POST, &uri, Some(&bob.token), Some(json!({ "content": "hello alice" }))).await;
    let (status, _) = call(&app, Method::PUT, &format!("{}/read", uri), Some(&alice.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&app, Method::GET, "/api/messages/conversations", Some(&alice.token), None).await;
    assert_eq!(body["conversations"][0]["unreadCount"], 0);
    assert_eq!(body["conversations"][0]["lastMessage"]["content"], "hello alice");
}

#[tokio::test]
async fn conversation_request_validation() {
    let app = app();
    let alice = register(&app, "alice").await;

    let (status, _) = call(&app, Method::POST, "/api/messages/conversations", Some(&alice.token), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/messages/conversations",
        Some(&alice.token),
        Some(json!({ "userId": alice.id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/messages/conversations",
        Some(&alice.token),
        Some(json!({ "userId": uuid::Uuid::new_v4().to_string() })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn posts_likes_and_comments() {
    let app = app();
    let alice = register(&app, "alice").await;
    let bob = register(&app, "bob").await;

    let (status, _) = call(&app, Method::POST, "/api/posts", Some(&alice.token), Some(json!({ "content": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/posts",
        Some(&alice.token),
        Some(json!({ "content": "first post" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let post_id = body["post"]["id"].as_str().unwrap().to_string();
    let post_uri = format!("/api/posts/{}", post_id);
    let like_uri = format!("{}/like", post_uri);

    let (status, body) = call(&app, Method::POST, &like_uri, Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["likes"], 1);
    let (status, _) = call(&app, Method::POST, &like_uri, Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = call(&app, Method::GET, &post_uri, Some(&bob.token), None).await;
    assert_eq!(body["post"]["likes"], 1);
    assert_eq!(body["post"]["userLiked"], true);

    let (status, body) = call(&app, Method::DELETE, &like_uri, Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["likes"], 0);
    let (status, _) = call(&app, Method::DELETE, &like_uri, Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let comments_uri = format!("{}/comments", post_uri);
    let (status, body) = call(
        &app,
        Method::POST,
        &comments_uri,
        Some(&bob.token),
        Some(json!({ "content": "nice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let comment_id = body["comment"]["id"].as_str().unwrap().to_string();

    let (_, body) = call(&app, Method::GET, &comments_uri, Some(&alice.token), None).await;
    assert_eq!(body["totalCount"], 1);
    assert_eq!(body["comments"][0]["author"]["username"], "bob");

    let comment_uri = format!("{}/{}", comments_uri, comment_id);
    let (status, _) = call(&app, Method::DELETE, &comment_uri, Some(&alice.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, Method::DELETE, &comment_uri, Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, Method::GET, &post_uri, Some(&alice.token), None).await;
    assert_eq!(body["post"]["commentsCount"], 0);

    // Only the author may edit or delete.
    let (status, _) = call(&app, Method::PUT, &post_uri, Some(&bob.token), Some(json!({ "content": "mine now" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = call(&app, Method::PUT, &post_uri, Some(&alice.token), Some(json!({ "content": "edited" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["post"]["content"], "edited");

    let (_, body) = call(&app, Method::GET, "/api/posts/trending", Some(&bob.token), None).await;
    assert_eq!(body["posts"][0]["id"], post_id.as_str());

    let (status, _) = call(&app, Method::DELETE, &post_uri, Some(&alice.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::GET, &post_uri, Some(&alice.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn follows_shape_the_feed_and_profile() {
    let app = app();
    let alice = register(&app, "alice").await;
    let bob = register(&app, "bob").await;

    call(&app, Method::POST, "/api/posts", Some(&bob.token), Some(json!({ "content": "from bob" }))).await;

    let (_, body) = call(&app, Method::GET, "/api/posts?type=following", Some(&alice.token), None).await;
    assert_eq!(body["totalCount"], 0);

    let follow_uri = format!("/api/users/{}/follow", bob.id);
    let (status, _) = call(&app, Method::POST, &format!("/api/users/{}/follow", alice.id), Some(&alice.token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, Method::POST, &follow_uri, Some(&alice.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::POST, &follow_uri, Some(&alice.token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = call(&app, Method::GET, "/api/posts?type=following", Some(&alice.token), None).await;
    assert_eq!(body["totalCount"], 1);
    assert_eq!(body["posts"][0]["author"]["username"], "bob");

    let (_, body) = call(&app, Method::GET, &format!("/api/users/{}", bob.id), Some(&alice.token), None).await;
    assert_eq!(body["user"]["followersCount"], 1);
    assert_eq!(body["user"]["postsCount"], 1);
    assert_eq!(body["user"]["isFollowing"], true);
    assert!(body["user"].get("password").is_none());

    let (_, body) = call(&app, Method::GET, &format!("/api/users/{}/followers", bob.id), Some(&alice.token), None).await;
    assert_eq!(body["followers"][0]["id"], alice.id.as_str());

    let (_, body) = call(&app, Method::GET, "/api/users/search?q=bo", Some(&alice.token), None).await;
    assert_eq!(body["users"].as_array().unwrap().len(), 1);

    let (status, _) = call(&app, Method::DELETE, &follow_uri, Some(&alice.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::DELETE, &follow_uri, Some(&alice.token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
