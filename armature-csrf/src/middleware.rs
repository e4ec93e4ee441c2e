use crate::HttpResponse;
use crate::context::RequestContext;
use crate::error::Result;
use crate::protection::{CsrfProtection, Handler, apply_cookies};
use async_trait::async_trait;
use tracing::trace;

/// Middleware trait for processing requests before they reach the handler
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: RequestContext, handler: Handler) -> Result<HttpResponse>;
}

/// Applies CSRF protection to every handler it wraps.
///
/// Installs the protection on each request context, then runs the same
/// verify/handle/commit procedure as [`csrf_protect`](crate::csrf_protect).
/// A context that already carries a different protection is refused with
/// [`CsrfError::ProtectionConflict`](crate::CsrfError::ProtectionConflict).
/// Handlers marked to skip middleware (exempt, or already protected) are
/// called as they are.
#[derive(Debug, Clone)]
pub struct CsrfMiddleware {
    protection: CsrfProtection,
}

impl CsrfMiddleware {
    pub fn new(protection: CsrfProtection) -> Self {
        Self { protection }
    }

    pub fn protection(&self) -> &CsrfProtection {
        &self.protection
    }
}

#[async_trait]
impl Middleware for CsrfMiddleware {
    async fn handle(&self, ctx: RequestContext, handler: Handler) -> Result<HttpResponse> {
        ctx.install(&self.protection)?;

        if handler.skips_middleware() {
            trace!(path = %ctx.path(), "Handler skips CSRF middleware");
            let mut response = handler.call(ctx.clone()).await?;
            // Exempt handlers may still issue tokens; those cookies must reach the client.
            apply_cookies(&ctx, response.headers_mut())?;
            return Ok(response);
        }

        self.protection.run_protected(ctx, &handler, None).await
    }
}
