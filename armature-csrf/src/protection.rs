//! The protection engine.
//!
//! [`CsrfProtection`] bundles one policy, one storage and one error renderer
//! for an application. It is installed on each [`RequestContext`] (by
//! [`CsrfMiddleware`](crate::middleware::CsrfMiddleware) or by hand) and then
//! drives three procedures:
//!
//! - **verify**: compare the canonical token from storage with the token the
//!   policy extracts from the request. Never writes.
//! - **issue**: draw a new token, persist it and cache it for the rest of the
//!   request.
//! - **commit**: after a successful handler call, make sure the client holds
//!   a token and flush pending cookies onto the response.

use crate::HttpResponse;
use crate::config::{CsrfConfig, PolicyKind, StorageKind};
use crate::context::RequestContext;
use crate::error::{CsrfError, Rejection, Result};
use crate::policy::{FormAndHeaderPolicy, FormPolicy, HeaderPolicy, Policy};
use crate::renderer::ErrorRenderer;
use crate::storage::{CookieStorage, SessionStorage, Storage};
use crate::token::{CsrfToken, HashedTokenGenerator};
use futures::FutureExt;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderValue, Method, header};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, trace, warn};

/// Methods that never need verification by default
pub const DEFAULT_SAFE_METHODS: [Method; 4] =
    [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE];

/// Outcome of a verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Accepted,
    Rejected(Rejection),
}

impl Verification {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verification::Accepted)
    }
}

/// CSRF protection for one application.
///
/// Cloning is cheap and clones share configuration.
#[derive(Clone)]
pub struct CsrfProtection {
    inner: Arc<ProtectionInner>,
}

struct ProtectionInner {
    policy: Arc<dyn Policy>,
    storage: Arc<dyn Storage>,
    error_renderer: ErrorRenderer,
    safe_methods: Vec<Method>,
    exclude_paths: Vec<String>,
}

impl CsrfProtection {
    pub fn builder() -> CsrfProtectionBuilder {
        CsrfProtectionBuilder::default()
    }

    /// Assemble protection from declarative configuration
    pub fn from_config(config: &CsrfConfig) -> Result<Self> {
        config.validate()?;

        let secret = config.secret_phrase.as_deref().ok_or_else(|| {
            CsrfError::config("secret_phrase is required for the hashed token generator")
        })?;
        let generator = HashedTokenGenerator::with_algorithm(secret, config.hash_algorithm)?;

        let mut builder = Self::builder()
            .safe_methods(config.safe_methods.iter().cloned())
            .exclude_paths(config.exclude_paths.iter().cloned());

        builder = match config.policy {
            PolicyKind::Form => builder.policy(FormPolicy::new(&config.field_name)),
            PolicyKind::Header => builder.policy(HeaderPolicy::new(&config.header_name)),
            PolicyKind::FormAndHeader => builder.policy(
                FormAndHeaderPolicy::new(&config.header_name, &config.field_name)
                    .with_precedence(config.precedence),
            ),
        };

        builder = match config.storage {
            StorageKind::Cookie => builder.storage(
                CookieStorage::builder(&config.cookie_name)
                    .generator(generator)
                    .attributes(config.cookie_attributes())
                    .build()?,
            ),
            StorageKind::Session => builder.storage(
                SessionStorage::builder(&config.session_key)
                    .generator(generator)
                    .build()?,
            ),
        };

        builder.build()
    }

    pub fn policy(&self) -> &dyn Policy {
        self.inner.policy.as_ref()
    }

    pub fn storage(&self) -> &dyn Storage {
        self.inner.storage.as_ref()
    }

    pub fn error_renderer(&self) -> &ErrorRenderer {
        &self.inner.error_renderer
    }

    pub fn safe_methods(&self) -> &[Method] {
        &self.inner.safe_methods
    }

    pub fn exclude_paths(&self) -> &[String] {
        &self.inner.exclude_paths
    }

    /// Check whether both handles share one configuration
    pub fn same_as(&self, other: &CsrfProtection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Check whether a request must pass verification.
    ///
    /// Safe methods and excluded paths are skipped. An excluded entry covers
    /// the path itself and everything below it; `/hooks` excludes
    /// `/hooks/github` but not `/hooksevil`.
    pub fn requires_verification(&self, ctx: &RequestContext) -> bool {
        if self.inner.safe_methods.contains(ctx.method()) {
            trace!(method = %ctx.method(), "Safe method, skipping CSRF verification");
            return false;
        }

        let path = ctx.path();
        if self
            .inner
            .exclude_paths
            .iter()
            .any(|excluded| path_is_under(path, excluded))
        {
            trace!(path = %path, "Excluded path, skipping CSRF verification");
            return false;
        }

        true
    }

    /// Compare the canonical token with the presented one.
    ///
    /// Storage backend failures are errors; a missing or mismatched token is
    /// a [`Verification::Rejected`] outcome.
    pub async fn verify(&self, ctx: &RequestContext) -> Result<Verification> {
        let Some(expected) = self.inner.storage.get(ctx).await? else {
            return Ok(Verification::Rejected(Rejection::MissingCanonical));
        };

        let Some(presented) = self.inner.policy.get_request_token(ctx).await else {
            return Ok(Verification::Rejected(Rejection::MissingPresented));
        };

        if expected.matches(&presented) {
            Ok(Verification::Accepted)
        } else {
            Ok(Verification::Rejected(Rejection::Mismatch))
        }
    }

    /// Read the canonical token without issuing one
    pub async fn get_token(&self, ctx: &RequestContext) -> Result<Option<CsrfToken>> {
        self.inner.storage.get(ctx).await
    }

    /// Issue a token for this request (idempotent within the request)
    pub async fn generate_token(&self, ctx: &RequestContext) -> Result<CsrfToken> {
        self.inner.storage.generate_new_token(ctx).await
    }

    /// Commit token state onto a response.
    ///
    /// Issues a token when the client has none and none was issued during
    /// this request, then writes pending cookies as `Set-Cookie` headers.
    pub async fn save_token(&self, ctx: &RequestContext, response: &mut HttpResponse) -> Result<()> {
        self.commit(ctx, response.headers_mut()).await
    }

    async fn commit(&self, ctx: &RequestContext, headers: &mut HeaderMap) -> Result<()> {
        if ctx.issued_token().is_none() && self.inner.storage.get(ctx).await?.is_none() {
            self.inner.storage.generate_new_token(ctx).await?;
        }

        apply_cookies(ctx, headers)
    }

    /// Render a failed verification with `renderer`, or the default one
    pub async fn render_error(
        &self,
        ctx: &RequestContext,
        rejection: Rejection,
        renderer: Option<&ErrorRenderer>,
    ) -> Result<HttpResponse> {
        warn!(
            method = %ctx.method(),
            path = %ctx.path(),
            reason = %rejection,
            "CSRF verification failed"
        );

        renderer
            .unwrap_or(&self.inner.error_renderer)
            .render(ctx, rejection)
            .await
    }

    /// Verify, run the handler, commit.
    pub(crate) async fn run_protected(
        &self,
        ctx: RequestContext,
        handler: &Handler,
        renderer: Option<&ErrorRenderer>,
    ) -> Result<HttpResponse> {
        if self.requires_verification(&ctx)
            && let Verification::Rejected(rejection) = self.verify(&ctx).await?
        {
            return self.render_error(&ctx, rejection, renderer).await;
        }

        match handler.call(ctx.clone()).await {
            Ok(mut response) => {
                self.save_token(&ctx, &mut response).await?;
                Ok(response)
            }
            Err(CsrfError::Http {
                status,
                message,
                mut headers,
            }) => {
                self.commit(&ctx, &mut headers).await?;
                Err(CsrfError::Http {
                    status,
                    message,
                    headers,
                })
            }
            Err(err) => Err(err),
        }
    }
}

impl fmt::Debug for CsrfProtection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfProtection")
            .field("error_renderer", &self.inner.error_renderer)
            .field("safe_methods", &self.inner.safe_methods)
            .field("exclude_paths", &self.inner.exclude_paths)
            .finish_non_exhaustive()
    }
}

/// Write cookies queued on the context as `Set-Cookie` headers
pub(crate) fn apply_cookies(ctx: &RequestContext, headers: &mut HeaderMap) -> Result<()> {
    for cookie in ctx.take_cookies() {
        let value = HeaderValue::from_str(&cookie.encoded().to_string())?;
        headers.append(header::SET_COOKIE, value);
    }
    Ok(())
}

fn path_is_under(path: &str, excluded: &str) -> bool {
    if excluded.ends_with('/') {
        return path.starts_with(excluded);
    }
    match path.strip_prefix(excluded) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Builder for [`CsrfProtection`]
pub struct CsrfProtectionBuilder {
    policy: Option<Arc<dyn Policy>>,
    storage: Option<Arc<dyn Storage>>,
    error_renderer: ErrorRenderer,
    safe_methods: Vec<Method>,
    exclude_paths: Vec<String>,
}

impl Default for CsrfProtectionBuilder {
    fn default() -> Self {
        Self {
            policy: None,
            storage: None,
            error_renderer: ErrorRenderer::default(),
            safe_methods: DEFAULT_SAFE_METHODS.to_vec(),
            exclude_paths: Vec::new(),
        }
    }
}

impl CsrfProtectionBuilder {
    pub fn policy(mut self, policy: impl Policy + 'static) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    pub fn storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    pub fn error_renderer(mut self, renderer: ErrorRenderer) -> Self {
        self.error_renderer = renderer;
        self
    }

    /// Replace the set of methods that skip verification
    pub fn safe_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.safe_methods = methods.into_iter().collect();
        self
    }

    /// Path prefixes that skip verification
    pub fn exclude_paths<S: Into<String>>(mut self, paths: impl IntoIterator<Item = S>) -> Self {
        self.exclude_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Result<CsrfProtection> {
        let policy = self
            .policy
            .ok_or_else(|| CsrfError::config("A token policy must be provided"))?;
        let storage = self
            .storage
            .ok_or_else(|| CsrfError::config("A token storage must be provided"))?;
        policy.validate()?;
        self.error_renderer.validate()?;

        info!(
            error_renderer = ?self.error_renderer,
            safe_methods = ?self.safe_methods,
            excluded_paths = self.exclude_paths.len(),
            "CSRF protection configured"
        );

        Ok(CsrfProtection {
            inner: Arc::new(ProtectionInner {
                policy,
                storage,
                error_renderer: self.error_renderer,
                safe_methods: self.safe_methods,
                exclude_paths: self.exclude_paths,
            }),
        })
    }
}

type HandlerFn = dyn Fn(RequestContext) -> BoxFuture<'static, Result<HttpResponse>> + Send + Sync;

/// An async request handler.
///
/// Handlers marked to skip middleware are called by
/// [`CsrfMiddleware`](crate::middleware::CsrfMiddleware) without
/// verification. Both [`csrf_protect`] and [`csrf_exempt`] set the mark.
#[derive(Clone)]
pub struct Handler {
    handler: Arc<HandlerFn>,
    skip_middleware: bool,
}

impl Handler {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |ctx| handler(ctx).boxed()),
            skip_middleware: false,
        }
    }

    pub fn call(&self, ctx: RequestContext) -> BoxFuture<'static, Result<HttpResponse>> {
        (self.handler)(ctx)
    }

    pub fn skips_middleware(&self) -> bool {
        self.skip_middleware
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("skip_middleware", &self.skip_middleware)
            .finish_non_exhaustive()
    }
}

/// Protect a handler with the installed protection's default renderer.
///
/// After a successful call the token is committed onto the response. When
/// the handler fails with [`CsrfError::Http`], the token cookies are carried
/// in the error's headers instead; other errors skip the commit.
pub fn csrf_protect(handler: Handler) -> Handler {
    protect(handler, None)
}

/// Protect a handler, rendering failures with `renderer`.
///
/// Fails at wrap time if the renderer is invalid.
pub fn csrf_protect_with(handler: Handler, renderer: ErrorRenderer) -> Result<Handler> {
    renderer.validate()?;
    Ok(protect(handler, Some(renderer)))
}

/// Mark a handler so the middleware leaves it alone
pub fn csrf_exempt(handler: Handler) -> Handler {
    Handler {
        skip_middleware: true,
        ..handler
    }
}

fn protect(handler: Handler, renderer: Option<ErrorRenderer>) -> Handler {
    let wrapped: Arc<HandlerFn> = Arc::new(move |ctx: RequestContext| {
        let handler = handler.clone();
        let renderer = renderer.clone();
        async move {
            let protection = installed(&ctx)?.clone();
            protection
                .run_protected(ctx, &handler, renderer.as_ref())
                .await
        }
        .boxed()
    });

    Handler {
        handler: wrapped,
        skip_middleware: true,
    }
}

fn installed(ctx: &RequestContext) -> Result<&CsrfProtection> {
    ctx.protection().ok_or(CsrfError::NotInstalled)
}

/// Issue a token for the current request.
///
/// Typically called by a handler rendering a form.
pub async fn generate_token(ctx: &RequestContext) -> Result<CsrfToken> {
    installed(ctx)?.generate_token(ctx).await
}

/// Read the canonical token for the current request
pub async fn get_token(ctx: &RequestContext) -> Result<Option<CsrfToken>> {
    installed(ctx)?.get_token(ctx).await
}

/// Commit token state onto `response`
pub async fn save_token(ctx: &RequestContext, response: &mut HttpResponse) -> Result<()> {
    installed(ctx)?.save_token(ctx, response).await
}
