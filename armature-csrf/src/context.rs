//! Per-request context.
//!
//! A [`RequestContext`] wraps one inbound request for its whole
//! request/response cycle. Besides read access to the request it holds the
//! only request-local mutable state the engine needs: the token issued
//! during this request and the cookies to set on the response.
//!
//! Cloning is cheap; all clones share the same state.

use crate::error::{CsrfError, Result};
use crate::protection::CsrfProtection;
use crate::session::Session;
use crate::token::CsrfToken;
use bytes::Bytes;
use cookie::Cookie;
use http::{HeaderMap, Method, Request, Uri, header};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;

#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    request: Request<Bytes>,
    session: Option<Arc<dyn Session>>,
    protection: OnceLock<CsrfProtection>,
    issued: OnceCell<CsrfToken>,
    cookies: Mutex<Vec<Cookie<'static>>>,
}

impl RequestContext {
    pub fn new(request: Request<Bytes>) -> Self {
        Self::build(request, None)
    }

    /// Create a context with the client's session attached
    pub fn with_session(request: Request<Bytes>, session: Arc<dyn Session>) -> Self {
        Self::build(request, Some(session))
    }

    fn build(request: Request<Bytes>, session: Option<Arc<dyn Session>>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request,
                session,
                protection: OnceLock::new(),
                issued: OnceCell::new(),
                cookies: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Attach the application's protection to this request.
    ///
    /// Installing the same protection again is a no-op. A context carries at
    /// most one protection: installing a different one fails with
    /// [`CsrfError::ProtectionConflict`].
    pub fn install(&self, protection: &CsrfProtection) -> Result<()> {
        let installed = self.inner.protection.get_or_init(|| protection.clone());
        if installed.same_as(protection) {
            Ok(())
        } else {
            Err(CsrfError::ProtectionConflict)
        }
    }

    pub fn protection(&self) -> Option<&CsrfProtection> {
        self.inner.protection.get()
    }

    pub fn request(&self) -> &Request<Bytes> {
        &self.inner.request
    }

    pub fn method(&self) -> &Method {
        self.inner.request.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.request.uri()
    }

    pub fn path(&self) -> &str {
        self.inner.request.uri().path()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.request.headers()
    }

    pub fn body(&self) -> &Bytes {
        self.inner.request.body()
    }

    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        self.inner.session.as_ref()
    }

    /// Get a header value by name, case-insensitively.
    ///
    /// Values that are not visible ASCII are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name)?.to_str().ok()
    }

    /// Get a request cookie by name
    pub fn cookie(&self, name: &str) -> Option<String> {
        for value in self.headers().get_all(header::COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };

            for cookie in Cookie::split_parse_encoded(value) {
                let Ok(cookie) = cookie else {
                    continue;
                };

                if cookie.name() == name {
                    return Some(cookie.value_trimmed().to_string());
                }
            }
        }

        None
    }

    /// Get a query string parameter by name
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri().query()?;
        lookup_urlencoded(query.as_bytes(), name)
    }

    /// Get a field from the request body.
    ///
    /// URL-encoded forms and JSON objects are understood. A body without a
    /// content type is read as a URL-encoded form.
    pub fn form_field(&self, name: &str) -> Option<String> {
        let body = self.body();
        if body.is_empty() {
            return None;
        }

        let content_type = self
            .header(header::CONTENT_TYPE.as_str())
            .map(|value| {
                value
                    .split(';')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_lowercase()
            });

        match content_type.as_deref() {
            None | Some("application/x-www-form-urlencoded") => lookup_urlencoded(body, name),
            Some(mime) if mime == "application/json" || mime.ends_with("+json") => {
                let json = serde_json::from_slice::<serde_json::Value>(body).ok()?;
                json.get(name)?.as_str().map(ToString::to_string)
            }
            _ => None,
        }
    }

    pub(crate) fn issued_token(&self) -> Option<CsrfToken> {
        self.inner.issued.get().cloned()
    }

    /// Run `issue` unless a token was already issued for this request.
    ///
    /// Concurrent callers wait for the one in-flight issuance and share its
    /// token. A failed issuance leaves the slot empty.
    pub(crate) async fn issue_token<F, Fut>(&self, issue: F) -> Result<CsrfToken>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CsrfToken>>,
    {
        self.inner.issued.get_or_try_init(issue).await.cloned()
    }

    /// Queue a cookie for the response, replacing one with the same name
    pub(crate) fn queue_cookie(&self, cookie: Cookie<'static>) {
        let mut cookies = self.inner.cookies.lock();
        cookies.retain(|queued| queued.name() != cookie.name());
        cookies.push(cookie);
    }

    pub(crate) fn take_cookies(&self) -> Vec<Cookie<'static>> {
        std::mem::take(&mut *self.inner.cookies.lock())
    }
}

fn lookup_urlencoded(input: &[u8], name: &str) -> Option<String> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(input)
        .ok()?
        .into_iter()
        .find_map(|(key, value)| (key == name).then_some(value))
}
