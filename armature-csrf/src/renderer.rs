//! Error dispatch for failed verifications.

use crate::HttpResponse;
use crate::context::RequestContext;
use crate::error::{CsrfError, Rejection, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use http::StatusCode;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type ResponderFn = dyn Fn(RequestContext) -> BoxFuture<'static, Result<HttpResponse>> + Send + Sync;

/// What to do when a request fails verification.
///
/// - [`ErrorRenderer::Responder`] produces the response sent in place of the
///   protected handler's.
/// - [`ErrorRenderer::Raiser`] returns [`CsrfError::Rejected`] with the given
///   status, leaving rendering to outer error handling.
#[derive(Clone)]
pub enum ErrorRenderer {
    Responder(Arc<ResponderFn>),
    Raiser(StatusCode),
}

impl ErrorRenderer {
    /// Raise 403 Forbidden (the default)
    pub fn forbidden() -> Self {
        Self::Raiser(StatusCode::FORBIDDEN)
    }

    /// Raise a failure with `status`.
    ///
    /// Only 4xx and 5xx statuses are accepted.
    pub fn raise(status: StatusCode) -> Result<Self> {
        let renderer = Self::Raiser(status);
        renderer.validate()?;
        Ok(renderer)
    }

    /// Respond with the result of an async function
    pub fn respond<F, Fut>(responder: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
    {
        Self::Responder(Arc::new(move |ctx| responder(ctx).boxed()))
    }

    /// Respond with the result of a plain function
    pub fn respond_with<F>(responder: F) -> Self
    where
        F: Fn(&RequestContext) -> HttpResponse + Send + Sync + 'static,
    {
        Self::Responder(Arc::new(move |ctx| {
            let response = responder(&ctx);
            futures::future::ready(Ok(response)).boxed()
        }))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Self::Raiser(status) if !status.is_client_error() && !status.is_server_error() => {
                Err(CsrfError::config(format!(
                    "Error renderer must raise a 4xx or 5xx status, got {status}"
                )))
            }
            _ => Ok(()),
        }
    }

    pub(crate) async fn render(
        &self,
        ctx: &RequestContext,
        rejection: Rejection,
    ) -> Result<HttpResponse> {
        match self {
            Self::Responder(responder) => responder(ctx.clone()).await,
            Self::Raiser(status) => Err(CsrfError::Rejected {
                status: *status,
                rejection,
            }),
        }
    }
}

impl Default for ErrorRenderer {
    fn default() -> Self {
        Self::forbidden()
    }
}

impl fmt::Debug for ErrorRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Responder(_) => f.write_str("Responder(..)"),
            Self::Raiser(status) => f.debug_tuple("Raiser").field(status).finish(),
        }
    }
}
