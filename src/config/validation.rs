//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buffer sizes > 0)
//! - Check the provider endpoint parses as an http(s) URL
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SessionConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use url::Url;

use crate::config::schema::{ProviderKind, SessionConfig};

/// One semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &SessionConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.provider.kind == ProviderKind::JsonRpc {
        match Url::parse(&config.provider.rpc_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError::new(
                "provider.rpc_url",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(
                "provider.rpc_url",
                format!("invalid URL '{}': {}", config.provider.rpc_url, e),
            )),
        }
    }

    if config.provider.request_timeout_secs == Some(0) {
        errors.push(ValidationError::new(
            "provider.request_timeout_secs",
            "must be greater than 0",
        ));
    }

    if config.provider.kind == ProviderKind::Local {
        if config.wallet.accounts == 0 {
            errors.push(ValidationError::new("wallet.accounts", "must be at least 1"));
        }
        if config.wallet.chain_id.trim().is_empty() {
            errors.push(ValidationError::new("wallet.chain_id", "must not be empty"));
        }
        if config.wallet.network_id.trim().is_empty() {
            errors.push(ValidationError::new("wallet.network_id", "must not be empty"));
        }
    }

    if config.session.command_buffer == 0 {
        errors.push(ValidationError::new(
            "session.command_buffer",
            "must be greater than 0",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
