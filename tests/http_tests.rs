use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use usta_bot::config::AppConfig;
use usta_bot::models::{ConversationKey, NewCategory, NewService, OrderStatus};
use usta_bot::notifier::{Channel, RecordingNotifier};
use usta_bot::review::DisabledAnalyzer;
use usta_bot::store::{MemoryStore, OrderStore};
use usta_bot::{build_router, AppState};

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    uploads: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let uploads = tempfile::tempdir().expect("temp dir");
    let config = AppConfig {
        upload_dir: uploads.path().to_path_buf(),
        ..AppConfig::default()
    };
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let state = AppState::new(
        config,
        store.clone(),
        notifier.clone(),
        Arc::new(DisabledAnalyzer),
    );
    TestApp {
        router: build_router(state),
        store,
        notifier,
        uploads,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn login(app: &TestApp) -> String {
    let (status, _, body) = send(
        app,
        json_request(
            "POST",
            "/admin/login",
            None,
            json!({"username": "admin", "password": "admin123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

async fn webhook(app: &TestApp, update: Value) -> Value {
    let (status, _, body) = send(app, json_request("POST", "/telegram/user_webhook", None, update)).await;
    assert_eq!(status, StatusCode::OK);
    body
}

fn customer_text(text: &str) -> Value {
    json!({"message": {"chat": {"id": 20}, "from": {"id": 10}, "text": text}})
}

#[tokio::test]
async fn test_health_is_public() {
    let app = test_app();
    let (status, _, body) = send(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "ok");
}

#[tokio::test]
async fn test_admin_routes_require_session() {
    let app = test_app();
    let (status, _, _) = send(&app, get("/admin/orders", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(&app, get("/admin/orders", Some("forged-token"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        &app,
        json_request(
            "POST",
            "/admin/login",
            None,
            json!({"username": "admin", "password": "wrong"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_cookie_and_logout() {
    let app = test_app();
    let (status, headers, body) = send(
        &app,
        json_request(
            "POST",
            "/admin/login",
            None,
            json!({"username": "admin", "password": "admin123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();
    let cookie = headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with(&format!("admin_session={token}")));
    assert!(cookie.contains("HttpOnly"));

    let request = Request::builder()
        .method("GET")
        .uri("/admin/categories")
        .header(header::COOKIE, format!("admin_session={token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, json_request("POST", "/admin/logout", Some(&token), json!({}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = send(&app, get("/admin/categories", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_catalog_crud() {
    let app = test_app();
    let token = login(&app).await;

    let (status, _, category) = send(
        &app,
        json_request(
            "POST",
            "/admin/categories",
            Some(&token),
            json!({"name": "Santexnika", "icon": "🔧"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let category_id = category["id"].as_i64().unwrap();

    let (status, _, _) = send(
        &app,
        json_request("POST", "/admin/categories", Some(&token), json!({"name": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, service) = send(
        &app,
        json_request(
            "POST",
            "/admin/services",
            Some(&token),
            json!({"name": "Kran", "price": 80000, "category_id": category_id}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(service["price"], 80000.0);

    let (status, _, _) = send(
        &app,
        json_request(
            "POST",
            "/admin/services",
            Some(&token),
            json!({"name": "Kran", "category_id": 999}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, _, services) = send(
        &app,
        get(&format!("/admin/services?category_id={category_id}"), Some(&token)),
    )
    .await;
    assert_eq!(services.as_array().unwrap().len(), 1);

    let delete = |uri: String| {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    };
    let (status, _, _) = send(&app, delete(format!("/admin/categories/{category_id}"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _, _) = send(&app, delete(format!("/admin/services/{}", service["id"]))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&app, delete(format!("/admin/categories/{category_id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&app, delete(format!("/admin/categories/{category_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_always_acknowledges() {
    let app = test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/telegram/user_webhook")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));

    assert_eq!(webhook(&app, json!({"update_id": 5})).await, json!({"ok": true}));

    app.store.set_unavailable(true);
    assert_eq!(webhook(&app, customer_text("/start")).await, json!({"ok": true}));
    assert!(app.notifier.sent().is_empty());
    app.store.set_unavailable(false);

    let (status, _, body) = send(
        &app,
        json_request("POST", "/telegram/master_webhook", None, json!({"callback_query": {"data": "st_1_done", "from": {"id": 3}}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));
}

#[tokio::test]
async fn test_order_flow_through_webhook_and_admin() -> Result<()> {
    let app = test_app();
    let category = app
        .store
        .create_category(&NewCategory {
            name: "Santexnika".to_string(),
            icon: None,
        })
        .await?;
    app.store
        .create_service(&NewService {
            name: "Kran".to_string(),
            price: Some(80000.0),
            description: None,
            category_id: category.id,
        })
        .await?;

    webhook(&app, customer_text("/start")).await;
    webhook(
        &app,
        json!({"callback_query": {"data": "cat_1", "message": {"chat": {"id": 20}}, "from": {"id": 10}}}),
    )
    .await;
    webhook(
        &app,
        json!({"callback_query": {"data": "srv_1", "message": {"chat": {"id": 20}}, "from": {"id": 10}}}),
    )
    .await;
    webhook(
        &app,
        json!({"message": {"chat": {"id": 20}, "from": {"id": 10}, "contact": {"phone_number": "+998901234567"}}}),
    )
    .await;
    webhook(&app, customer_text("Yunusobod 4")).await;
    webhook(&app, customer_text("Domofon ishlamaydi")).await;
    webhook(
        &app,
        json!({"callback_query": {"data": "pay_QR", "message": {"chat": {"id": 20}}, "from": {"id": 10}}}),
    )
    .await;

    let order = app
        .store
        .find_active_order(ConversationKey::new(10, 20))
        .await?
        .expect("order");
    assert_eq!(order.status, OrderStatus::InProgress);
    assert_eq!(app.notifier.sent_to(|c| *c == Channel::Admin).len(), 1);

    let token = login(&app).await;
    let (status, _, orders) = send(&app, get("/admin/orders?status=in_progress", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders.as_array().unwrap().len(), 1);

    let (status, _, _) = send(&app, get("/admin/orders?status=ARCHIVED", Some(&token))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.notifier.clear();
    let (status, _, message) = send(
        &app,
        json_request(
            "POST",
            &format!("/admin/orders/{}/messages", order.id),
            Some(&token),
            json!({"text": "Usta yo'lda"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["from_admin"], true);
    assert_eq!(app.notifier.sent_to(|c| *c == Channel::Customer(20)).len(), 1);

    let (status, _, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/admin/orders/{}/status", order.id),
            Some(&token),
            json!({"status": "DONE"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previous"], "IN_PROGRESS");
    assert_eq!(body["order"]["status"], "DONE");

    let (status, _, detail) = send(&app, get(&format!("/admin/orders/{}", order.id), Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["messages"].as_array().unwrap().len(), 1);
    assert_eq!(detail["order"]["payment_method"], "QR");

    let (status, _, analytics) = send(&app, get("/admin/analytics", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(analytics["total_orders"], 1);
    assert_eq!(analytics["revenue"], 80000.0);
    assert_eq!(analytics["master_cost"], 24000.0);
    assert_eq!(analytics["profit"], 56000.0);
    assert_eq!(analytics["top_services"][0]["name"], "Kran");

    let (status, _, _) = send(
        &app,
        json_request("POST", "/admin/orders/999/status", Some(&token), json!({"status": "DONE"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_audio_upload_without_analysis_is_skipped() -> Result<()> {
    let app = test_app();
    let order = app.store.create_order(ConversationKey::new(1, 1)).await?;
    let token = login(&app).await;

    let boundary = "usta-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"audio\"; filename=\"voice.ogg\"\r\n\
         Content-Type: audio/ogg\r\n\r\n\
         OggS-fake-audio\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::builder()
        .method("POST")
        .uri(format!("/admin/orders/{}/audio/master", order.id))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "skipped");
    assert!(app.store.list_reviews(order.id).await?.is_empty());

    let saved: Vec<_> = std::fs::read_dir(app.uploads.path())?.collect();
    assert_eq!(saved.len(), 1);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/admin/orders/{}/audio/boss", order.id))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=x")
        .body(Body::from("--x--\r\n"))
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}
