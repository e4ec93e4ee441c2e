//! # Armature CSRF Protection
//!
//! Cross-Site Request Forgery (CSRF) protection for Armature applications.
//!
//! ## Features
//!
//! - ✅ **Synchronizer Tokens** - Canonical token in a cookie or session
//! - ✅ **Keyed Hash Tokens** - Salted BLAKE3 (or HMAC-SHA256) tokens bound to a secret
//! - ✅ **Pluggable Policies** - Form field, header, or both with configurable precedence
//! - ✅ **Per-handler Control** - `csrf_protect`, `csrf_protect_with`, `csrf_exempt`
//! - ✅ **Custom Error Rendering** - Respond with your own page or raise a status
//! - ✅ **Middleware Integration** - One middleware for every handler
//! - ✅ **Path Exclusion** - Exclude specific paths from protection
//!
//! ## Quick Start
//!
//! ```rust
//! use armature_csrf::{CookieStorage, CsrfProtection, FormPolicy};
//!
//! let protection = CsrfProtection::builder()
//!     .policy(FormPolicy::new("_csrf_token"))
//!     .storage(
//!         CookieStorage::builder("csrf_token")
//!             .secret_phrase("change me")
//!             .build()
//!             .unwrap(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! // Or from configuration
//! let config = armature_csrf::CsrfConfig::new("change me");
//! let protection = CsrfProtection::from_config(&config).unwrap();
//! ```
//!
//! ## Protecting Handlers
//!
//! ```rust
//! use armature_csrf::{
//!     CsrfConfig, CsrfMiddleware, CsrfProtection, Handler, Middleware, RequestContext,
//!     csrf_exempt, generate_token,
//! };
//! use bytes::Bytes;
//! use http::{Method, Request, Response};
//!
//! # tokio_test::block_on(async {
//! let protection = CsrfProtection::from_config(&CsrfConfig::new("change me")).unwrap();
//! let middleware = CsrfMiddleware::new(protection);
//!
//! // Render a form carrying a fresh token
//! let form = Handler::new(|ctx: RequestContext| async move {
//!     let token = generate_token(&ctx).await?;
//!     Ok(Response::new(Bytes::from(format!(
//!         r#"<input type="hidden" name="_csrf_token" value="{token}">"#
//!     ))))
//! });
//!
//! let ctx = RequestContext::new(Request::builder().uri("/").body(Bytes::new()).unwrap());
//! let response = middleware.handle(ctx, form).await.unwrap();
//! assert!(response.headers().contains_key(http::header::SET_COOKIE));
//!
//! // Unsafe requests without a token are rejected
//! let submit = Handler::new(|_ctx| async { Ok(Response::new(Bytes::from("saved"))) });
//! let ctx = RequestContext::new(
//!     Request::builder().method(Method::POST).uri("/").body(Bytes::new()).unwrap(),
//! );
//! let err = middleware.handle(ctx, submit.clone()).await.unwrap_err();
//! assert_eq!(err.status_code(), http::StatusCode::FORBIDDEN);
//!
//! // Exempt handlers are called as they are
//! let ctx = RequestContext::new(
//!     Request::builder().method(Method::POST).uri("/").body(Bytes::new()).unwrap(),
//! );
//! let response = middleware.handle(ctx, csrf_exempt(submit)).await.unwrap();
//! assert_eq!(response.body().as_ref(), b"saved");
//! # });
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod protection;
pub mod renderer;
pub mod session;
pub mod storage;
pub mod token;

/// Response type produced by handlers and error renderers
pub type HttpResponse = http::Response<bytes::Bytes>;

pub use config::{CsrfConfig, PolicyKind, SameSite, StorageKind};
pub use context::RequestContext;
pub use error::{CsrfError, Rejection, Result};
pub use middleware::{CsrfMiddleware, Middleware};
pub use policy::{FormAndHeaderPolicy, FormPolicy, HeaderPolicy, Policy, Precedence};
pub use protection::{
    CsrfProtection, CsrfProtectionBuilder, Handler, Verification, csrf_exempt, csrf_protect,
    csrf_protect_with, generate_token, get_token, save_token,
};
pub use renderer::ErrorRenderer;
pub use session::{MemorySession, Session};
pub use storage::{CookieAttributes, CookieStorage, SessionStorage, Storage};
pub use token::{
    CsrfToken, HashAlgorithm, HashedTokenGenerator, SimpleTokenGenerator, TokenGenerator,
};
