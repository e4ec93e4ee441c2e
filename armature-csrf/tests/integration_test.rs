//! Integration tests for armature-csrf

use armature_csrf::*;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode, header};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const SECRET: &str = "integration secret";

fn cookie_protection(policy: impl Policy + 'static) -> CsrfProtection {
    CsrfProtection::builder()
        .policy(policy)
        .storage(
            CookieStorage::builder("csrf_token")
                .secret_phrase(SECRET)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
}

fn get(uri: &str) -> RequestContext {
    RequestContext::new(Request::builder().uri(uri).body(Bytes::new()).unwrap())
}

fn post_form(cookie: Option<&str>, body: &str) -> RequestContext {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    RequestContext::new(builder.body(Bytes::from(body.to_string())).unwrap())
}

/// Extract the value of `name` from the response's Set-Cookie headers
fn set_cookie_value(response: &HttpResponse, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| cookie::Cookie::parse_encoded(value.to_string()).ok())
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

fn form_handler() -> Handler {
    Handler::new(|ctx: RequestContext| async move {
        let token = generate_token(&ctx).await?;
        Ok(Response::new(Bytes::from(token.into_inner())))
    })
}

fn greeting_handler(called: Arc<AtomicBool>) -> Handler {
    Handler::new(move |ctx: RequestContext| {
        let called = called.clone();
        async move {
            called.store(true, Ordering::SeqCst);
            let name = ctx.form_field("name").unwrap_or_default();
            Ok(Response::new(Bytes::from(format!("Hello, {name}"))))
        }
    })
}

#[tokio::test]
async fn test_form_round_trip() {
    let middleware = CsrfMiddleware::new(cookie_protection(FormPolicy::new("_csrf_token")));

    let response = middleware.handle(get("/"), form_handler()).await.unwrap();
    let t1 = std::str::from_utf8(response.body()).unwrap().to_string();
    assert_eq!(set_cookie_value(&response, "csrf_token"), Some(t1.clone()));

    let called = Arc::new(AtomicBool::new(false));
    let ctx = post_form(
        Some(&format!("csrf_token={t1}")),
        &format!("name=Alice&_csrf_token={t1}"),
    );
    let response = middleware
        .handle(ctx, greeting_handler(called.clone()))
        .await
        .unwrap();

    assert!(called.load(Ordering::SeqCst));
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"Hello, Alice");
}

#[tokio::test]
async fn test_wrong_token_is_forbidden() {
    let middleware = CsrfMiddleware::new(cookie_protection(FormPolicy::new("_csrf_token")));

    let response = middleware.handle(get("/"), form_handler()).await.unwrap();
    let t1 = set_cookie_value(&response, "csrf_token").unwrap();

    let called = Arc::new(AtomicBool::new(false));
    let ctx = post_form(
        Some(&format!("csrf_token={t1}")),
        "name=Alice&_csrf_token=not-the-token",
    );
    let err = middleware
        .handle(ctx, greeting_handler(called.clone()))
        .await
        .unwrap_err();

    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(err.rejection(), Some(Rejection::Mismatch));
    assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_missing_cookie_is_forbidden() {
    let middleware = CsrfMiddleware::new(cookie_protection(FormPolicy::new("_csrf_token")));
    let token = HashedTokenGenerator::new(SECRET).unwrap().generate();

    let called = Arc::new(AtomicBool::new(false));
    let ctx = post_form(None, &format!("_csrf_token={token}"));
    let err = middleware
        .handle(ctx, greeting_handler(called.clone()))
        .await
        .unwrap_err();

    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(err.rejection(), Some(Rejection::MissingCanonical));
}

#[tokio::test]
async fn test_custom_responder() {
    let protection = cookie_protection(FormPolicy::new("_csrf_token"));
    let renderer = ErrorRenderer::respond(|ctx: RequestContext| async move {
        let mut response = Response::new(Bytes::from(format!("CSRF check failed for {}", ctx.path())));
        *response.status_mut() = StatusCode::FORBIDDEN;
        Ok(response)
    });

    let called = Arc::new(AtomicBool::new(false));
    let handler = csrf_protect_with(greeting_handler(called.clone()), renderer).unwrap();

    let ctx = post_form(None, "name=Alice");
    ctx.install(&protection).unwrap();
    let response = handler.call(ctx).await.unwrap();

    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.body().as_ref(), b"CSRF check failed for /");
}

#[tokio::test]
async fn test_protection_wide_raiser_status() {
    let protection = CsrfProtection::builder()
        .policy(HeaderPolicy::new("X-CSRF-Token"))
        .storage(
            CookieStorage::builder("csrf_token")
                .secret_phrase(SECRET)
                .build()
                .unwrap(),
        )
        .error_renderer(ErrorRenderer::raise(StatusCode::BAD_REQUEST).unwrap())
        .build()
        .unwrap();

    let called = Arc::new(AtomicBool::new(false));
    let err = CsrfMiddleware::new(protection)
        .handle(post_form(None, ""), greeting_handler(called.clone()))
        .await
        .unwrap_err();

    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_exempt_handler_bypasses_verification() {
    let middleware = CsrfMiddleware::new(cookie_protection(FormPolicy::new("_csrf_token")));

    let called = Arc::new(AtomicBool::new(false));
    let handler = csrf_exempt(greeting_handler(called.clone()));
    let response = middleware
        .handle(post_form(None, "name=Bob"), handler)
        .await
        .unwrap();

    assert!(called.load(Ordering::SeqCst));
    assert_eq!(response.body().as_ref(), b"Hello, Bob");
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_header_precedence() {
    let middleware = CsrfMiddleware::new(cookie_protection(FormAndHeaderPolicy::new(
        "X-CSRF-Token",
        "_csrf_token",
    )));
    let response = middleware.handle(get("/"), form_handler()).await.unwrap();
    let token = set_cookie_value(&response, "csrf_token").unwrap();

    // Header carries the right token, form a wrong one: header wins
    let ctx = RequestContext::new(
        Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::COOKIE, format!("csrf_token={token}"))
            .header("X-CSRF-Token", token.as_str())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Bytes::from("name=Carol&_csrf_token=wrong"))
            .unwrap(),
    );
    let response = middleware
        .handle(ctx, greeting_handler(Arc::new(AtomicBool::new(false))))
        .await
        .unwrap();
    assert_eq!(response.body().as_ref(), b"Hello, Carol");

    // Header carries a wrong token, form the right one: still rejected
    let ctx = RequestContext::new(
        Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::COOKIE, format!("csrf_token={token}"))
            .header("X-CSRF-Token", "wrong")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Bytes::from(format!("name=Carol&_csrf_token={token}")))
            .unwrap(),
    );
    let err = middleware
        .handle(ctx, greeting_handler(Arc::new(AtomicBool::new(false))))
        .await
        .unwrap_err();
    assert_eq!(err.rejection(), Some(Rejection::Mismatch));
}

#[tokio::test]
async fn test_json_body_token() {
    let middleware = CsrfMiddleware::new(cookie_protection(FormPolicy::new("_csrf_token")));
    let response = middleware.handle(get("/"), form_handler()).await.unwrap();
    let token = set_cookie_value(&response, "csrf_token").unwrap();

    let ctx = RequestContext::new(
        Request::builder()
            .method(Method::PUT)
            .uri("/api/items/1")
            .header(header::COOKIE, format!("csrf_token={token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Bytes::from(format!(r#"{{"_csrf_token": "{token}"}}"#)))
            .unwrap(),
    );
    let handler = Handler::new(|_ctx| async { Ok(Response::new(Bytes::from("updated"))) });
    let response = middleware.handle(ctx, handler).await.unwrap();

    assert_eq!(response.body().as_ref(), b"updated");
}

#[tokio::test]
async fn test_token_rotates_per_request() {
    let middleware = CsrfMiddleware::new(cookie_protection(FormPolicy::new("_csrf_token")));

    let first = middleware.handle(get("/"), form_handler()).await.unwrap();
    let first = set_cookie_value(&first, "csrf_token").unwrap();

    let ctx = RequestContext::new(
        Request::builder()
            .uri("/")
            .header(header::COOKIE, format!("csrf_token={first}"))
            .body(Bytes::new())
            .unwrap(),
    );
    let second = middleware.handle(ctx, form_handler()).await.unwrap();
    let second = set_cookie_value(&second, "csrf_token").unwrap();

    assert_ne!(first, second);
}

#[tokio::test]
async fn test_plain_get_without_issue_keeps_existing_token() {
    let middleware = CsrfMiddleware::new(cookie_protection(FormPolicy::new("_csrf_token")));
    let token = HashedTokenGenerator::new(SECRET).unwrap().generate();

    let ctx = RequestContext::new(
        Request::builder()
            .uri("/about")
            .header(header::COOKIE, format!("csrf_token={token}"))
            .body(Bytes::new())
            .unwrap(),
    );
    let handler = Handler::new(|_ctx| async { Ok(Response::new(Bytes::from("about"))) });
    let response = middleware.handle(ctx, handler).await.unwrap();

    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_handler_http_error_carries_token_cookie() {
    let middleware = CsrfMiddleware::new(cookie_protection(FormPolicy::new("_csrf_token")));
    let handler = Handler::new(|ctx: RequestContext| async move {
        let token = generate_token(&ctx).await?;
        Err(CsrfError::http(StatusCode::NOT_FOUND, token.into_inner()))
    });

    let err = middleware.handle(get("/missing"), handler).await.unwrap_err();
    let CsrfError::Http { message: issued, .. } = &err else {
        panic!("expected an HTTP error, got {err:?}");
    };
    let issued = issued.clone();

    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(set_cookie_value(&response, "csrf_token"), Some(issued));
}

#[tokio::test]
async fn test_rotation_after_verification() {
    let middleware = CsrfMiddleware::new(cookie_protection(FormPolicy::new("_csrf_token")));
    let response = middleware.handle(get("/"), form_handler()).await.unwrap();
    let t1 = set_cookie_value(&response, "csrf_token").unwrap();

    let handler = Handler::new(|ctx: RequestContext| async move {
        let before = get_token(&ctx).await?;
        let rotated = generate_token(&ctx).await?;
        assert_ne!(before.as_ref(), Some(&rotated));
        assert_eq!(get_token(&ctx).await?, Some(rotated.clone()));
        Ok(Response::new(Bytes::from(rotated.into_inner())))
    });

    let ctx = post_form(
        Some(&format!("csrf_token={t1}")),
        &format!("name=Alice&_csrf_token={t1}"),
    );
    let response = middleware.handle(ctx, handler).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let t2 = std::str::from_utf8(response.body()).unwrap().to_string();
    assert_ne!(t2, t1);
    assert_eq!(set_cookie_value(&response, "csrf_token"), Some(t2));
}

/// Session backend counting writes
#[derive(Default)]
struct CountingSession {
    data: parking_lot::Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
}

#[async_trait]
impl Session for CountingSession {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// Session backend whose writes suspend before completing
#[derive(Default)]
struct SlowSession {
    data: parking_lot::Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
}

#[async_trait]
impl Session for SlowSession {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        tokio::task::yield_now().await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }
}

fn session_protection() -> CsrfProtection {
    CsrfProtection::from_config(
        &CsrfConfig::new(SECRET)
            .with_storage(StorageKind::Session)
            .with_policy(PolicyKind::Header),
    )
    .unwrap()
}

#[tokio::test]
async fn test_issuance_is_idempotent_within_request() {
    let session = Arc::new(CountingSession::default());
    let middleware = CsrfMiddleware::new(session_protection());

    let handler = Handler::new(|ctx: RequestContext| async move {
        let first = generate_token(&ctx).await?;
        let second = generate_token(&ctx).await?;
        assert_eq!(first, second);
        Ok(Response::new(Bytes::from(first.into_inner())))
    });

    let ctx = RequestContext::with_session(
        Request::builder().uri("/").body(Bytes::new()).unwrap(),
        session.clone(),
    );
    let response = middleware.handle(ctx, handler).await.unwrap();

    assert_eq!(session.writes.load(Ordering::SeqCst), 1);
    assert_eq!(
        session.data.lock().get("csrf_token").map(String::as_bytes),
        Some(response.body().as_ref())
    );
}

#[tokio::test]
async fn test_concurrent_issuance_shares_one_token() {
    let session = Arc::new(SlowSession::default());
    let ctx = RequestContext::with_session(
        Request::builder().uri("/").body(Bytes::new()).unwrap(),
        session.clone(),
    );
    ctx.install(&session_protection()).unwrap();

    let (a, b) = tokio::join!(generate_token(&ctx), generate_token(&ctx));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a, b);
    assert_eq!(session.writes.load(Ordering::SeqCst), 1);
    assert_eq!(
        session.data.lock().get("csrf_token").cloned(),
        Some(a.into_inner())
    );
}

#[tokio::test]
async fn test_session_storage_flow() {
    let session = Arc::new(MemorySession::new());
    let middleware = CsrfMiddleware::new(session_protection());

    let ctx = RequestContext::with_session(
        Request::builder().uri("/").body(Bytes::new()).unwrap(),
        session.clone(),
    );
    let response = middleware.handle(ctx, form_handler()).await.unwrap();
    let token = std::str::from_utf8(response.body()).unwrap().to_string();
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    let ctx = RequestContext::with_session(
        Request::builder()
            .method(Method::DELETE)
            .uri("/items/7")
            .header("X-CSRF-Token", token.as_str())
            .body(Bytes::new())
            .unwrap(),
        session.clone(),
    );
    let handler = Handler::new(|_ctx| async { Ok(Response::new(Bytes::from("deleted"))) });
    let response = middleware.handle(ctx, handler).await.unwrap();
    assert_eq!(response.body().as_ref(), b"deleted");

    let ctx = RequestContext::new(
        Request::builder()
            .method(Method::DELETE)
            .uri("/items/7")
            .header("X-CSRF-Token", token.as_str())
            .body(Bytes::new())
            .unwrap(),
    );
    let handler = Handler::new(|_ctx| async { Ok(Response::new(Bytes::new())) });
    let err = middleware.handle(ctx, handler).await.unwrap_err();
    assert!(matches!(err, CsrfError::SessionUnavailable));
}

#[test]
fn test_from_config_requires_secret() {
    let err = CsrfProtection::from_config(&CsrfConfig::default()).unwrap_err();
    assert!(matches!(err, CsrfError::Configuration(_)));
}

#[test]
fn test_independent_protections() {
    let first = cookie_protection(FormPolicy::new("_csrf_token"));
    let second = CsrfProtection::from_config(
        &CsrfConfig::new("another secret").with_exclude_paths(vec!["/hooks".to_string()]),
    )
    .unwrap();

    assert!(first.exclude_paths().is_empty());
    assert_eq!(second.exclude_paths(), ["/hooks".to_string()]);
}

#[tokio::test]
async fn test_protected_handler_without_middleware() {
    let handler = csrf_protect(greeting_handler(Arc::new(AtomicBool::new(false))));
    let err = handler.call(get("/")).await.unwrap_err();
    assert!(matches!(err, CsrfError::NotInstalled));
}
