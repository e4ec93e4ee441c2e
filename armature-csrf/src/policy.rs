//! Extraction of the token presented by the client.
//!
//! A missing field or header is a normal outcome (`None`), never an error.

use crate::context::RequestContext;
use crate::error::{CsrfError, Result};
use async_trait::async_trait;

/// Strategy for reading the presented token from a request.
#[async_trait]
pub trait Policy: Send + Sync {
    async fn get_request_token(&self, ctx: &RequestContext) -> Option<String>;

    /// Check the policy's setup. Called once when protection is built.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

fn validate_field_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CsrfError::config("Form field name must not be empty"));
    }
    Ok(())
}

fn validate_header_name(name: &str) -> Result<()> {
    http::HeaderName::from_bytes(name.as_bytes())
        .map(|_| ())
        .map_err(|_| CsrfError::config(format!("Invalid header name: {name:?}")))
}

/// Reads the token from a body field, falling back to the query string.
#[derive(Debug, Clone)]
pub struct FormPolicy {
    field_name: String,
}

impl FormPolicy {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    fn extract(&self, ctx: &RequestContext) -> Option<String> {
        ctx.form_field(&self.field_name)
            .or_else(|| ctx.query_param(&self.field_name))
    }
}

#[async_trait]
impl Policy for FormPolicy {
    async fn get_request_token(&self, ctx: &RequestContext) -> Option<String> {
        self.extract(ctx)
    }

    fn validate(&self) -> Result<()> {
        validate_field_name(&self.field_name)
    }
}

/// Reads the token from a request header.
#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    header_name: String,
}

impl HeaderPolicy {
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    fn extract(&self, ctx: &RequestContext) -> Option<String> {
        ctx.header(&self.header_name).map(ToString::to_string)
    }
}

#[async_trait]
impl Policy for HeaderPolicy {
    async fn get_request_token(&self, ctx: &RequestContext) -> Option<String> {
        self.extract(ctx)
    }

    fn validate(&self) -> Result<()> {
        validate_header_name(&self.header_name)
    }
}

/// Which source [`FormAndHeaderPolicy`] consults first.
///
/// The first source that carries a token decides; the other is not read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precedence {
    #[default]
    HeaderFirst,
    FormFirst,
}

impl Precedence {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "header" | "header-first" | "header_first" => Some(Precedence::HeaderFirst),
            "form" | "form-first" | "form_first" => Some(Precedence::FormFirst),
            _ => None,
        }
    }
}

/// Reads the token from a header or a body field.
#[derive(Debug, Clone)]
pub struct FormAndHeaderPolicy {
    header: HeaderPolicy,
    form: FormPolicy,
    precedence: Precedence,
}

impl FormAndHeaderPolicy {
    pub fn new(header_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            header: HeaderPolicy::new(header_name),
            form: FormPolicy::new(field_name),
            precedence: Precedence::default(),
        }
    }

    pub fn with_precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn precedence(&self) -> Precedence {
        self.precedence
    }
}

#[async_trait]
impl Policy for FormAndHeaderPolicy {
    async fn get_request_token(&self, ctx: &RequestContext) -> Option<String> {
        match self.precedence {
            Precedence::HeaderFirst => self.header.extract(ctx).or_else(|| self.form.extract(ctx)),
            Precedence::FormFirst => self.form.extract(ctx).or_else(|| self.header.extract(ctx)),
        }
    }

    fn validate(&self) -> Result<()> {
        self.header.validate()?;
        self.form.validate()
    }
}
