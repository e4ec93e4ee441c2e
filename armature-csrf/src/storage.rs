//! Canonical token storage.
//!
//! A [`Storage`] keeps the server-trusted copy of the token. Implementors
//! provide raw access to their backing store (`load` / `save`) and a token
//! generator; structural validation on read and idempotent issuance come
//! from the provided methods.

use crate::context::RequestContext;
use crate::error::{CsrfError, Result};
use crate::token::{CsrfToken, HashedTokenGenerator, TokenGenerator};
use async_trait::async_trait;
use cookie::{Cookie, SameSite};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Storage for the canonical token of a request.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Generator used to issue and validate tokens
    fn generator(&self) -> &dyn TokenGenerator;

    /// Read the raw stored value, if any
    async fn load(&self, ctx: &RequestContext) -> Result<Option<String>>;

    /// Persist `token` as the canonical token
    async fn save(&self, ctx: &RequestContext, token: &CsrfToken) -> Result<()>;

    /// Get the canonical token.
    ///
    /// A token issued earlier in this request takes the place of the stored
    /// one. A stored value that fails structural validation is treated as
    /// absent.
    async fn get(&self, ctx: &RequestContext) -> Result<Option<CsrfToken>> {
        if let Some(token) = ctx.issued_token() {
            trace!("Using CSRF token issued earlier in this request");
            return Ok(Some(token));
        }

        let Some(raw) = self.load(ctx).await? else {
            return Ok(None);
        };

        if !self.generator().validate(&raw) {
            debug!(path = %ctx.path(), "Stored CSRF token is malformed, treating as absent");
            return Ok(None);
        }

        Ok(Some(CsrfToken::from(raw)))
    }

    /// Issue a new token for this request and persist it.
    ///
    /// Within one request context only the first call draws and saves a
    /// token; later and concurrent calls return the same value without
    /// writing again.
    async fn generate_new_token(&self, ctx: &RequestContext) -> Result<CsrfToken> {
        if let Some(token) = ctx.issued_token() {
            trace!("Reusing CSRF token issued earlier in this request");
            return Ok(token);
        }

        ctx.issue_token(|| async {
            let token = self.generator().generate();
            self.save(ctx, &token).await?;

            debug!(path = %ctx.path(), "Issued new CSRF token");
            Ok(token)
        })
        .await
    }
}

/// Pick the generator for a storage: an explicit one, else the hashed
/// generator keyed by `secret_phrase`.
fn resolve_generator(
    generator: Option<Arc<dyn TokenGenerator>>,
    secret_phrase: Option<String>,
) -> Result<Arc<dyn TokenGenerator>> {
    match (generator, secret_phrase) {
        (Some(generator), _) => Ok(generator),
        (None, Some(secret)) => Ok(Arc::new(HashedTokenGenerator::new(secret)?)),
        (None, None) => Err(CsrfError::config(
            "secret_phrase is required for the default hashed token generator",
        )),
    }
}

fn require_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CsrfError::config(format!("{kind} must not be empty")));
    }
    Ok(())
}

/// Attributes applied to the token cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieAttributes {
    pub max_age: Option<Duration>,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl Default for CookieAttributes {
    fn default() -> Self {
        Self {
            max_age: None,
            domain: None,
            path: "/".to_string(),
            secure: true,
            http_only: true,
            same_site: SameSite::Strict,
        }
    }
}

/// Keeps the canonical token in a cookie.
///
/// The token travels unmodified: the cookie value is the token string.
pub struct CookieStorage {
    cookie_name: String,
    attributes: CookieAttributes,
    generator: Arc<dyn TokenGenerator>,
}

impl CookieStorage {
    pub fn builder(cookie_name: impl Into<String>) -> CookieStorageBuilder {
        CookieStorageBuilder {
            cookie_name: cookie_name.into(),
            attributes: CookieAttributes::default(),
            generator: None,
            secret_phrase: None,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn attributes(&self) -> &CookieAttributes {
        &self.attributes
    }

    fn build_cookie(&self, token: &CsrfToken) -> Cookie<'static> {
        let attributes = &self.attributes;
        let mut builder = Cookie::build((self.cookie_name.clone(), token.as_str().to_string()))
            .path(attributes.path.clone())
            .secure(attributes.secure)
            .http_only(attributes.http_only)
            .same_site(attributes.same_site);

        if let Some(ref domain) = attributes.domain {
            builder = builder.domain(domain.clone());
        }

        if let Some(max_age) = attributes.max_age {
            let seconds = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
            builder = builder.max_age(cookie::time::Duration::seconds(seconds));
        }

        builder.build()
    }
}

impl fmt::Debug for CookieStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieStorage")
            .field("cookie_name", &self.cookie_name)
            .field("attributes", &self.attributes)
            .field("generator", &self.generator)
            .finish()
    }
}

#[async_trait]
impl Storage for CookieStorage {
    fn generator(&self) -> &dyn TokenGenerator {
        self.generator.as_ref()
    }

    async fn load(&self, ctx: &RequestContext) -> Result<Option<String>> {
        Ok(ctx.cookie(&self.cookie_name))
    }

    async fn save(&self, ctx: &RequestContext, token: &CsrfToken) -> Result<()> {
        ctx.queue_cookie(self.build_cookie(token));
        Ok(())
    }
}

/// Builder for [`CookieStorage`]
pub struct CookieStorageBuilder {
    cookie_name: String,
    attributes: CookieAttributes,
    generator: Option<Arc<dyn TokenGenerator>>,
    secret_phrase: Option<String>,
}

impl CookieStorageBuilder {
    /// Use a specific token generator
    pub fn generator(mut self, generator: impl TokenGenerator + 'static) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    /// Secret phrase for the default hashed generator
    pub fn secret_phrase(mut self, secret: impl Into<String>) -> Self {
        self.secret_phrase = Some(secret.into());
        self
    }

    pub fn attributes(mut self, attributes: CookieAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.attributes.max_age = Some(max_age);
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.attributes.domain = Some(domain.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.attributes.path = path.into();
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.attributes.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.attributes.http_only = http_only;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.attributes.same_site = same_site;
        self
    }

    pub fn build(self) -> Result<CookieStorage> {
        require_name("Cookie name", &self.cookie_name)?;

        Ok(CookieStorage {
            generator: resolve_generator(self.generator, self.secret_phrase)?,
            cookie_name: self.cookie_name,
            attributes: self.attributes,
        })
    }
}

/// Keeps the canonical token in the client's server-side session.
pub struct SessionStorage {
    session_key: String,
    generator: Arc<dyn TokenGenerator>,
}

impl SessionStorage {
    pub fn builder(session_key: impl Into<String>) -> SessionStorageBuilder {
        SessionStorageBuilder {
            session_key: session_key.into(),
            generator: None,
            secret_phrase: None,
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }
}

impl fmt::Debug for SessionStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStorage")
            .field("session_key", &self.session_key)
            .field("generator", &self.generator)
            .finish()
    }
}

#[async_trait]
impl Storage for SessionStorage {
    fn generator(&self) -> &dyn TokenGenerator {
        self.generator.as_ref()
    }

    async fn load(&self, ctx: &RequestContext) -> Result<Option<String>> {
        let session = ctx.session().ok_or(CsrfError::SessionUnavailable)?;
        session.get(&self.session_key).await
    }

    async fn save(&self, ctx: &RequestContext, token: &CsrfToken) -> Result<()> {
        let session = ctx.session().ok_or(CsrfError::SessionUnavailable)?;
        session
            .set(&self.session_key, token.as_str().to_string())
            .await
    }
}

/// Builder for [`SessionStorage`]
pub struct SessionStorageBuilder {
    session_key: String,
    generator: Option<Arc<dyn TokenGenerator>>,
    secret_phrase: Option<String>,
}

impl SessionStorageBuilder {
    /// Use a specific token generator
    pub fn generator(mut self, generator: impl TokenGenerator + 'static) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    /// Secret phrase for the default hashed generator
    pub fn secret_phrase(mut self, secret: impl Into<String>) -> Self {
        self.secret_phrase = Some(secret.into());
        self
    }

    pub fn build(self) -> Result<SessionStorage> {
        require_name("Session key", &self.session_key)?;

        Ok(SessionStorage {
            generator: resolve_generator(self.generator, self.secret_phrase)?,
            session_key: self.session_key,
        })
    }
}
