use crate::error::{CsrfError, Result};
use crate::policy::Precedence;
use crate::protection::DEFAULT_SAFE_METHODS;
use crate::storage::CookieAttributes;
use crate::token::HashAlgorithm;
use http::Method;
use std::env;
use std::time::Duration;

/// CSRF protection configuration
#[derive(Clone)]
pub struct CsrfConfig {
    /// Secret phrase keying the hashed token generator
    pub secret_phrase: Option<String>,

    /// Cookie name for cookie storage
    pub cookie_name: String,

    /// Form field name for the presented token
    pub field_name: String,

    /// Header name for the presented token
    pub header_name: String,

    /// Session key for session storage
    pub session_key: String,

    /// Where the canonical token is kept
    pub storage: StorageKind,

    /// Where the presented token is read from
    pub policy: PolicyKind,

    /// Source order for [`PolicyKind::FormAndHeader`]
    pub precedence: Precedence,

    /// Keyed hash used by the token generator
    pub hash_algorithm: HashAlgorithm,

    /// Cookie Max-Age
    pub cookie_max_age: Option<Duration>,

    /// Cookie domain
    pub cookie_domain: Option<String>,

    /// Cookie path
    pub cookie_path: String,

    /// Cookie secure flag (HTTPS only)
    pub cookie_secure: bool,

    /// Cookie HttpOnly flag
    pub cookie_http_only: bool,

    /// Cookie SameSite policy
    pub cookie_same_site: SameSite,

    /// Safe HTTP methods (not checked for CSRF)
    pub safe_methods: Vec<Method>,

    /// Paths to exclude from CSRF protection
    pub exclude_paths: Vec<String>,
}

/// Canonical token storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageKind {
    #[default]
    Cookie,
    Session,
}

impl StorageKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cookie" => Some(StorageKind::Cookie),
            "session" => Some(StorageKind::Session),
            _ => None,
        }
    }
}

/// Presented token source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PolicyKind {
    #[default]
    Form,
    Header,
    FormAndHeader,
}

impl PolicyKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "form" => Some(PolicyKind::Form),
            "header" => Some(PolicyKind::Header),
            "form_and_header" | "form-and-header" | "both" => Some(PolicyKind::FormAndHeader),
            _ => None,
        }
    }
}

/// Cookie SameSite attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Some(SameSite::Strict),
            "lax" => Some(SameSite::Lax),
            "none" => Some(SameSite::None),
            _ => None,
        }
    }
}

impl From<SameSite> for cookie::SameSite {
    fn from(same_site: SameSite) -> Self {
        match same_site {
            SameSite::Strict => cookie::SameSite::Strict,
            SameSite::Lax => cookie::SameSite::Lax,
            SameSite::None => cookie::SameSite::None,
        }
    }
}

impl CsrfConfig {
    /// Create a configuration keyed by `secret_phrase`
    pub fn new(secret_phrase: impl Into<String>) -> Self {
        Self {
            secret_phrase: Some(secret_phrase.into()),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Uses the following environment variables:
    /// - `ARMATURE_CSRF_SECRET`: Secret phrase
    /// - `ARMATURE_CSRF_COOKIE_NAME`, `ARMATURE_CSRF_FIELD_NAME`,
    ///   `ARMATURE_CSRF_HEADER_NAME`, `ARMATURE_CSRF_SESSION_KEY`: Names
    /// - `ARMATURE_CSRF_STORAGE`: `cookie` or `session`
    /// - `ARMATURE_CSRF_POLICY`: `form`, `header` or `form_and_header`
    /// - `ARMATURE_CSRF_PRECEDENCE`: `header` or `form`
    /// - `ARMATURE_CSRF_HASH_ALGORITHM`: `blake3` or `hmac-sha256`
    /// - `ARMATURE_CSRF_COOKIE_MAX_AGE`: Max-Age in seconds
    /// - `ARMATURE_CSRF_COOKIE_DOMAIN`, `ARMATURE_CSRF_COOKIE_PATH`
    /// - `ARMATURE_CSRF_COOKIE_SECURE`, `ARMATURE_CSRF_COOKIE_HTTP_ONLY`: `1`/`true`
    /// - `ARMATURE_CSRF_COOKIE_SAME_SITE`: `strict`, `lax` or `none`
    /// - `ARMATURE_CSRF_SAFE_METHODS`, `ARMATURE_CSRF_EXCLUDE_PATHS`: Comma-separated
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(secret) = lookup("ARMATURE_CSRF_SECRET") {
            config.secret_phrase = Some(secret);
        }
        if let Some(name) = lookup("ARMATURE_CSRF_COOKIE_NAME") {
            config.cookie_name = name;
        }
        if let Some(name) = lookup("ARMATURE_CSRF_FIELD_NAME") {
            config.field_name = name;
        }
        if let Some(name) = lookup("ARMATURE_CSRF_HEADER_NAME") {
            config.header_name = name;
        }
        if let Some(key) = lookup("ARMATURE_CSRF_SESSION_KEY") {
            config.session_key = key;
        }

        if let Some(value) = lookup("ARMATURE_CSRF_STORAGE") {
            config.storage = StorageKind::parse(&value)
                .ok_or_else(|| invalid("ARMATURE_CSRF_STORAGE", &value))?;
        }
        if let Some(value) = lookup("ARMATURE_CSRF_POLICY") {
            config.policy = PolicyKind::parse(&value)
                .ok_or_else(|| invalid("ARMATURE_CSRF_POLICY", &value))?;
        }
        if let Some(value) = lookup("ARMATURE_CSRF_PRECEDENCE") {
            config.precedence = Precedence::parse(&value)
                .ok_or_else(|| invalid("ARMATURE_CSRF_PRECEDENCE", &value))?;
        }
        if let Some(value) = lookup("ARMATURE_CSRF_HASH_ALGORITHM") {
            config.hash_algorithm = HashAlgorithm::parse(&value)
                .ok_or_else(|| invalid("ARMATURE_CSRF_HASH_ALGORITHM", &value))?;
        }

        if let Some(value) = lookup("ARMATURE_CSRF_COOKIE_MAX_AGE") {
            let seconds = value
                .trim()
                .parse()
                .map_err(|_| invalid("ARMATURE_CSRF_COOKIE_MAX_AGE", &value))?;
            config.cookie_max_age = Some(Duration::from_secs(seconds));
        }
        if let Some(domain) = lookup("ARMATURE_CSRF_COOKIE_DOMAIN") {
            config.cookie_domain = Some(domain);
        }
        if let Some(path) = lookup("ARMATURE_CSRF_COOKIE_PATH") {
            config.cookie_path = path;
        }
        if let Some(value) = lookup("ARMATURE_CSRF_COOKIE_SECURE") {
            config.cookie_secure = parse_flag("ARMATURE_CSRF_COOKIE_SECURE", &value)?;
        }
        if let Some(value) = lookup("ARMATURE_CSRF_COOKIE_HTTP_ONLY") {
            config.cookie_http_only = parse_flag("ARMATURE_CSRF_COOKIE_HTTP_ONLY", &value)?;
        }
        if let Some(value) = lookup("ARMATURE_CSRF_COOKIE_SAME_SITE") {
            config.cookie_same_site = SameSite::parse(&value)
                .ok_or_else(|| invalid("ARMATURE_CSRF_COOKIE_SAME_SITE", &value))?;
        }

        if let Some(value) = lookup("ARMATURE_CSRF_SAFE_METHODS") {
            config.safe_methods = split_list(&value)
                .map(|method| {
                    Method::from_bytes(method.to_uppercase().as_bytes())
                        .map_err(|_| invalid("ARMATURE_CSRF_SAFE_METHODS", method))
                })
                .collect::<Result<_>>()?;
        }
        if let Some(value) = lookup("ARMATURE_CSRF_EXCLUDE_PATHS") {
            config.exclude_paths = split_list(&value).map(ToString::to_string).collect();
        }

        Ok(config)
    }

    /// Check the configuration for setup errors
    pub fn validate(&self) -> Result<()> {
        match self.secret_phrase.as_deref() {
            None => return Err(CsrfError::config("secret_phrase is required")),
            Some(secret) if secret.is_empty() => {
                return Err(CsrfError::config("secret_phrase must not be empty"));
            }
            Some(_) => {}
        }

        let names = [
            ("cookie_name", &self.cookie_name),
            ("field_name", &self.field_name),
            ("header_name", &self.header_name),
            ("session_key", &self.session_key),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(CsrfError::config(format!("{field} must not be empty")));
            }
        }

        if http::HeaderName::from_bytes(self.header_name.as_bytes()).is_err() {
            return Err(CsrfError::config(format!(
                "header_name is not a valid header name: {}",
                self.header_name
            )));
        }

        if self.cookie_same_site == SameSite::None && !self.cookie_secure {
            return Err(CsrfError::config(
                "SameSite=None cookies must also be Secure",
            ));
        }

        Ok(())
    }

    /// Cookie attributes for [`CookieStorage`](crate::storage::CookieStorage)
    pub fn cookie_attributes(&self) -> CookieAttributes {
        CookieAttributes {
            max_age: self.cookie_max_age,
            domain: self.cookie_domain.clone(),
            path: self.cookie_path.clone(),
            secure: self.cookie_secure,
            http_only: self.cookie_http_only,
            same_site: self.cookie_same_site.into(),
        }
    }

    /// Set secret phrase
    pub fn with_secret_phrase(mut self, secret: impl Into<String>) -> Self {
        self.secret_phrase = Some(secret.into());
        self
    }

    /// Set cookie name
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Set field name
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Set header name
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Set session key
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    pub fn with_storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Set cookie Max-Age
    pub fn with_cookie_max_age(mut self, max_age: Duration) -> Self {
        self.cookie_max_age = Some(max_age);
        self
    }

    /// Set cookie domain
    pub fn with_cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.cookie_domain = Some(domain.into());
        self
    }

    /// Set cookie path
    pub fn with_cookie_path(mut self, path: impl Into<String>) -> Self {
        self.cookie_path = path.into();
        self
    }

    /// Set cookie secure flag
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    /// Set cookie HttpOnly flag
    pub fn with_cookie_http_only(mut self, http_only: bool) -> Self {
        self.cookie_http_only = http_only;
        self
    }

    /// Set cookie SameSite policy
    pub fn with_cookie_same_site(mut self, same_site: SameSite) -> Self {
        self.cookie_same_site = same_site;
        self
    }

    /// Replace safe methods
    pub fn with_safe_methods(mut self, methods: Vec<Method>) -> Self {
        self.safe_methods = methods;
        self
    }

    /// Replace excluded paths
    pub fn with_exclude_paths(mut self, paths: Vec<String>) -> Self {
        self.exclude_paths = paths;
        self
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            secret_phrase: None,
            cookie_name: "csrf_token".to_string(),
            field_name: "_csrf_token".to_string(),
            header_name: "X-CSRF-Token".to_string(),
            session_key: "csrf_token".to_string(),
            storage: StorageKind::default(),
            policy: PolicyKind::default(),
            precedence: Precedence::default(),
            hash_algorithm: HashAlgorithm::default(),
            cookie_max_age: None,
            cookie_domain: None,
            cookie_path: "/".to_string(),
            cookie_secure: true,
            cookie_http_only: true,
            cookie_same_site: SameSite::Strict,
            safe_methods: DEFAULT_SAFE_METHODS.to_vec(),
            exclude_paths: Vec::new(),
        }
    }
}

impl std::fmt::Debug for CsrfConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfConfig")
            .field("secret_phrase", &self.secret_phrase.as_ref().map(|_| "***"))
            .field("cookie_name", &self.cookie_name)
            .field("field_name", &self.field_name)
            .field("header_name", &self.header_name)
            .field("session_key", &self.session_key)
            .field("storage", &self.storage)
            .field("policy", &self.policy)
            .field("precedence", &self.precedence)
            .field("hash_algorithm", &self.hash_algorithm)
            .field("cookie_max_age", &self.cookie_max_age)
            .field("cookie_domain", &self.cookie_domain)
            .field("cookie_path", &self.cookie_path)
            .field("cookie_secure", &self.cookie_secure)
            .field("cookie_http_only", &self.cookie_http_only)
            .field("cookie_same_site", &self.cookie_same_site)
            .field("safe_methods", &self.safe_methods)
            .field("exclude_paths", &self.exclude_paths)
            .finish()
    }
}

fn invalid(var: &str, value: &str) -> CsrfError {
    CsrfError::config(format!("Invalid {var}: {value}"))
}

fn parse_flag(var: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, value)),
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}
