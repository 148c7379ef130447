//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that rule patterns, addresses and regexes compile
//! - Validate value ranges (timeouts > 0, limits > 0)
//! - Check that actions only reference configured filters
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use regex::Regex;

use crate::config::schema::ProxyConfig;
use crate::routing::actions::ActionRule;
use crate::routing::forward::ForwardRule;

/// A single semantic problem, tagged with where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a deserialized configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_client_connections == 0 {
        errors.push(ValidationError::new("listener.max_client_connections", "must be > 0"));
    }

    let timeouts = [
        ("timeouts.socket_timeout_secs", config.timeouts.socket_timeout_secs),
        ("timeouts.keep_alive_timeout_secs", config.timeouts.keep_alive_timeout_secs),
        ("timeouts.connect_timeout_secs", config.timeouts.connect_timeout_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }

    if config.limits.buffer_limit == 0 {
        errors.push(ValidationError::new("limits.buffer_limit", "must be > 0"));
    }
    if config.limits.pool_capacity == 0 {
        errors.push(ValidationError::new("limits.pool_capacity", "must be > 0"));
    }

    for (i, rule) in config.forward.iter().enumerate() {
        if let Err(e) = ForwardRule::new(
            &rule.pattern,
            rule.forward_type,
            rule.gateway.as_deref(),
            rule.forward.as_deref(),
        ) {
            errors.push(ValidationError::new(format!("forward[{i}]"), e.to_string()));
        }
    }

    let mut filter_names = HashSet::new();
    for (i, filter) in config.filters.iter().enumerate() {
        if filter.name.is_empty() {
            errors.push(ValidationError::new(format!("filters[{i}].name"), "must not be empty"));
        } else if !filter_names.insert(filter.name.as_str()) {
            errors.push(ValidationError::new(
                format!("filters[{i}].name"),
                format!("duplicate filter '{}'", filter.name),
            ));
        }
        if let Err(e) = Regex::new(&filter.pattern) {
            errors.push(ValidationError::new(format!("filters[{i}].pattern"), e.to_string()));
        }
    }

    for (i, rule) in config.actions.iter().enumerate() {
        if let Err(e) = ActionRule::new(&rule.pattern, rule.settings.clone()) {
            errors.push(ValidationError::new(format!("actions[{i}]"), e.to_string()));
        }
        for name in &rule.settings.filter {
            if !filter_names.contains(name.as_str()) {
                errors.push(ValidationError::new(
                    format!("actions[{i}].filter"),
                    format!("unknown filter '{name}'"),
                ));
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
