//! End-to-end request handling through `Dispatcher::handle`, without a socket.

use std::sync::Arc;

use glosa::{
    AppConfig, Context, Dispatcher, Error, Fault, FileStore, HttpError, Method, Params, Registry, Request,
    Response, Router,
};
use http::header::{AUTHORIZATION, COOKIE};
use http::{HeaderValue, StatusCode};
use serde_json::{Value, json};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn app(config: AppConfig) -> Dispatcher {
    glosa::app(config, Arc::new(FileStore::in_memory().unwrap())).unwrap()
}

fn request(method: http::Method, path: &str) -> Request {
    Request::new(method, path)
}

fn body(res: &Response) -> Value {
    serde_json::from_slice(res.body()).unwrap()
}

fn with_cookie(req: Request, id: i64, token: &str) -> Request {
    req.with_header(COOKIE, HeaderValue::from_str(&format!("glosa-{id}={token}")).unwrap())
}

async fn post(app: &Dispatcher, thread: &str, comment: Value) -> Response {
    let req = request(http::Method::POST, &format!("/comment/{thread}/new")).with_body(comment.to_string());
    app.handle(req).await
}

/// Creates a comment and returns `(id, token)`.
async fn create(app: &Dispatcher, thread: &str, comment: Value) -> (i64, String) {
    let res = post(app, thread, comment).await;
    assert!(res.status_code().is_success(), "create failed: {:?}", res.status_code());
    let token = res.header("x-glosa-token").unwrap().to_owned();
    (body(&res)["id"].as_i64().unwrap(), token)
}

fn now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap()
}

// ── Comment API ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_read() {
    let app = app(AppConfig::development());

    let res = post(&app, "blog/hello", json!({
        "text": "Hello <world>",
        "author": "ann",
        "email": "ann@example.org",
        "website": "https://ann.example.org",
    }))
    .await;
    assert_eq!(res.status_code(), StatusCode::CREATED);
    assert_eq!(res.header("location"), Some("http://localhost:8000/comment/blog/hello/1"));

    let cookie = res.header("set-cookie").unwrap();
    let token = res.header("x-glosa-token").unwrap();
    assert!(cookie.starts_with(&format!("glosa-1={token};")), "{cookie}");
    assert!(cookie.contains("Max-Age=900"));
    assert!(cookie.contains("HttpOnly"));

    let created = body(&res);
    assert_eq!(created["id"], 1);
    assert_eq!(created["text"], "<p>Hello &lt;world&gt;</p>\n");
    assert_eq!(created["mode"], 1);
    assert!(created.get("email").is_none());

    let res = app.handle(request(http::Method::GET, "/comment/blog/hello/")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.header("content-type"), Some("application/json"));
    let listed = body(&res);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["author"], "ann");

    let res = app.handle(request(http::Method::GET, "/comment/blog/hello/1")).await;
    assert_eq!(body(&res)["website"], "https://ann.example.org");
}

#[tokio::test]
async fn missing_threads_and_comments_are_not_found() {
    let app = app(AppConfig::development());
    assert_eq!(app.handle(request(http::Method::GET, "/comment/nothing/")).await.status_code(), StatusCode::NOT_FOUND);

    create(&app, "blog", json!({ "text": "first" })).await;
    let res = app.handle(request(http::Method::GET, "/comment/blog/99")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    let res = app.handle(request(http::Method::GET, "/comment/other/1")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_comments_are_rejected() {
    let app = app(AppConfig::development());
    for bad in [
        json!({ "text": "   " }),
        json!({ "author": "no text" }),
        json!({ "text": "hi", "website": "ftp://example.org" }),
        json!({ "text": "hi", "author": "x".repeat(256) }),
        json!({ "text": "orphan", "parent": 41 }),
    ] {
        let res = post(&app, "blog", bad.clone()).await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST, "{bad}");
    }

    let res = app
        .handle(request(http::Method::POST, "/comment/blog/new").with_body("not json"))
        .await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn replies_keep_their_parent() {
    let app = app(AppConfig::development());
    let (parent, _) = create(&app, "blog", json!({ "text": "question" })).await;
    let (_, _) = create(&app, "blog", json!({ "text": "answer", "parent": parent })).await;

    let listed = body(&app.handle(request(http::Method::GET, "/comment/blog/")).await);
    assert_eq!(listed[1]["parent"], parent);
}

// ── Token-protected edits ─────────────────────────────────────────────────────

#[tokio::test]
async fn edit_with_cookie_or_header() {
    let app = app(AppConfig::development());
    let (id, token) = create(&app, "blog", json!({ "text": "typo" })).await;

    let req = with_cookie(request(http::Method::PUT, "/comment/blog/1"), id, &token)
        .with_body(json!({ "text": "fixed" }).to_string());
    let res = app.handle(req).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    let edited = body(&res);
    assert_eq!(edited["text"], "<p>fixed</p>\n");
    assert!(edited["modified"].is_number());

    let req = request(http::Method::PUT, "/comment/blog/1")
        .with_header(http::HeaderName::from_static("x-glosa-token"), HeaderValue::from_str(&token).unwrap())
        .with_body(json!({ "author": "ann" }).to_string());
    let res = app.handle(req).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(body(&res)["author"], "ann");
    assert_eq!(body(&res)["text"], "<p>fixed</p>\n");
}

#[tokio::test]
async fn bad_tokens_are_forbidden() {
    let app = app(AppConfig::development());
    let (first, first_token) = create(&app, "blog", json!({ "text": "mine" })).await;
    let (_, second_token) = create(&app, "blog", json!({ "text": "yours" })).await;
    let edit = || request(http::Method::PUT, "/comment/blog/1").with_body(json!({ "text": "pwned" }).to_string());

    let mut forged = first_token.clone();
    let last = forged.pop().unwrap();
    forged.push(if last == 'A' { 'B' } else { 'A' });

    let other_thread = app.context().sign(&("elsewhere", first)).unwrap();
    let expired = app
        .context()
        .signer()
        .sign_at(&("blog", first), now() - 901)
        .unwrap();

    let rejected = [
        ("no token", edit()),
        ("forged", with_cookie(edit(), first, &forged)),
        ("other comment", with_cookie(edit(), first, &second_token)),
        ("other thread", with_cookie(edit(), first, &other_thread)),
        ("expired", with_cookie(edit(), first, &expired)),
        ("garbage", with_cookie(edit(), first, "not-a-token")),
    ];
    for (case, req) in rejected {
        let res = app.handle(req).await;
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN, "{case}");
        assert_eq!(res.body(), b"Forbidden", "{case}");
    }

    let unchanged = body(&app.handle(request(http::Method::GET, "/comment/blog/1")).await);
    assert_eq!(unchanged["text"], "<p>mine</p>\n");
}

#[tokio::test]
async fn tokens_within_max_age_still_work() {
    let app = app(AppConfig::development());
    let (id, _) = create(&app, "blog", json!({ "text": "old" })).await;
    let aged = app.context().signer().sign_at(&("blog", id), now() - 890).unwrap();

    let req = with_cookie(request(http::Method::DELETE, "/comment/blog/1"), id, &aged);
    assert_eq!(app.handle(req).await.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn delete_removes_leaves_and_stubs_parents() {
    let app = app(AppConfig::development());
    let (parent, parent_token) = create(&app, "blog", json!({ "text": "question", "author": "ann" })).await;
    let (reply, reply_token) = create(&app, "blog", json!({ "text": "answer", "parent": parent })).await;

    let res = app
        .handle(with_cookie(request(http::Method::DELETE, "/comment/blog/1"), parent, &parent_token))
        .await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert!(res.header("set-cookie").unwrap().contains("Max-Age=0"));
    let stub = body(&res);
    assert_eq!(stub["mode"], 4);
    assert_eq!(stub["author"], Value::Null);

    let listed = body(&app.handle(request(http::Method::GET, "/comment/blog/")).await);
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let res = app
        .handle(with_cookie(request(http::Method::DELETE, "/comment/blog/2"), reply, &reply_token))
        .await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(body(&res), Value::Null);

    // The stub had no replies left and went with it.
    let res = app.handle(request(http::Method::GET, "/comment/blog/")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

// ── Routing outcomes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_paths_and_methods() {
    let app = app(AppConfig::development());

    let res = app.handle(request(http::Method::GET, "/nope")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);

    let res = app.handle(request(http::Method::PATCH, "/comment/blog/1")).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.header("allow"), Some("GET, HEAD, PUT, DELETE"));

    let res = app.handle(request(http::Method::DELETE, "/comment/blog/")).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.header("allow"), Some("GET, HEAD"));
}

// ── Moderation ────────────────────────────────────────────────────────────────

fn moderated() -> AppConfig {
    AppConfig {
        moderation: true,
        admin_password: Some("hunter2".into()),
        ..AppConfig::development()
    }
}

fn admin(method: http::Method, password: &str) -> Request {
    request(method, "/").with_header(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {password}")).unwrap())
}

#[tokio::test]
async fn pending_comments_wait_for_activation() {
    let app = app(moderated());

    let res = post(&app, "blog", json!({ "text": "let me in" })).await;
    assert_eq!(res.status_code(), StatusCode::ACCEPTED);
    assert_eq!(body(&res)["mode"], 2);

    assert_eq!(app.handle(request(http::Method::GET, "/comment/blog/")).await.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(app.handle(request(http::Method::GET, "/comment/blog/1")).await.status_code(), StatusCode::NOT_FOUND);

    assert_eq!(app.handle(request(http::Method::GET, "/")).await.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(app.handle(admin(http::Method::GET, "hunter3")).await.status_code(), StatusCode::FORBIDDEN);

    let queue = body(&app.handle(admin(http::Method::GET, "hunter2")).await);
    assert_eq!(queue, json!([{ "path": "blog", "comment": queue[0]["comment"].clone() }]));
    assert_eq!(queue[0]["comment"]["id"], 1);

    let res = app
        .handle(admin(http::Method::POST, "hunter2").with_body(json!({ "action": "activate", "path": "blog", "id": 1 }).to_string()))
        .await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(body(&res)["mode"], 1);

    let listed = body(&app.handle(request(http::Method::GET, "/comment/blog/")).await);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(body(&app.handle(admin(http::Method::GET, "hunter2")).await), json!([]));
}

#[tokio::test]
async fn admin_limit_and_delete() {
    let app = app(moderated());
    for text in ["one", "two", "three"] {
        create(&app, "blog", json!({ "text": text })).await;
    }

    let queue = body(&app.handle(admin(http::Method::GET, "hunter2").with_query("limit=2")).await);
    assert_eq!(queue.as_array().unwrap().len(), 2);
    assert_eq!(queue[0]["comment"]["id"], 3);

    let res = app.handle(admin(http::Method::GET, "hunter2").with_query("limit=lots")).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);

    let res = app
        .handle(admin(http::Method::POST, "hunter2").with_body(json!({ "action": "delete", "path": "blog", "id": 3 }).to_string()))
        .await;
    assert_eq!(body(&res), Value::Null);
    let queue = body(&app.handle(admin(http::Method::GET, "hunter2")).await);
    assert_eq!(queue.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn admin_is_off_without_a_password() {
    let app = app(AppConfig::development());
    let res = app.handle(admin(http::Method::GET, "anything")).await;
    assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
}

// ── Fault mapping ─────────────────────────────────────────────────────────────

async fn fails(_: Arc<Context>, _: Params, _: Request) -> Result<Response, Fault> {
    Err(Fault::internal(std::io::Error::other("disk on fire")))
}

async fn panics(_: Arc<Context>, _: Params, _: Request) -> Result<Response, Fault> {
    panic!("handler bug")
}

async fn teapot(_: Arc<Context>, _: Params, _: Request) -> Result<Response, Fault> {
    Err(HttpError::new(StatusCode::IM_A_TEAPOT, "short and stout").into())
}

fn faulty(config: AppConfig) -> Dispatcher {
    let router = Router::new()
        .route("/fails", &[Method::Get], "test.fails").unwrap()
        .route("/panics", &[Method::Get], "test.panics").unwrap()
        .route("/teapot", &[Method::Get], "test.teapot").unwrap();
    let registry = Registry::new()
        .register("test.fails", fails)
        .register("test.panics", panics)
        .register("test.teapot", teapot);
    Dispatcher::new(Context::new(config, Arc::new(FileStore::in_memory().unwrap())), router, registry).unwrap()
}

#[tokio::test]
async fn internal_faults_hide_detail_in_production() {
    let app = faulty(AppConfig { production: true, ..AppConfig::development() });
    for path in ["/fails", "/panics"] {
        let res = app.handle(request(http::Method::GET, path)).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR, "{path}");
        assert_eq!(res.body(), b"Internal Server Error", "{path}");
    }
}

#[tokio::test]
async fn internal_faults_show_detail_in_test_mode() {
    let app = faulty(AppConfig::development());
    let res = app.handle(request(http::Method::GET, "/fails")).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(res.body()).contains("disk on fire"));

    let res = app.handle(request(http::Method::GET, "/panics")).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(res.body()).contains("panicked"));
}

#[tokio::test]
async fn http_faults_pass_through() {
    let app = faulty(AppConfig { production: true, ..AppConfig::development() });
    let res = app.handle(request(http::Method::GET, "/teapot")).await;
    assert_eq!(res.status_code(), StatusCode::IM_A_TEAPOT);
    assert_eq!(res.body(), b"short and stout");
}

#[test]
fn startup_fails_on_unregistered_endpoints() {
    let ctx = Context::new(AppConfig::development(), Arc::new(FileStore::in_memory().unwrap()));
    let result = Dispatcher::new(ctx, glosa::url_map().unwrap(), Registry::new());
    assert!(matches!(result, Err(Error::UnknownEndpoint(_))));
}
