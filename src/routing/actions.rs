//! Per-request action resolution.
//!
//! Action rules pair a URL pattern with behaviour settings. Every rule
//! matching a request is merged in configuration order, later rules
//! overriding earlier ones, into the [`CurrentAction`] the rewrite
//! pipeline consults.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, ProxyResult};
use crate::http::request::HttpRequest;
use crate::routing::matcher::{Matcher, UrlPattern};

/// Behaviour toggles and their parameters as written in configuration.
///
/// `None` leaves whatever an earlier rule set; list fields accumulate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ActionSettings {
    /// `block`, `forge`, `conditional-block`, `conditional-forge` or a literal URL.
    pub hide_referrer: Option<String>,
    /// Replacement User-Agent.
    pub hide_user_agent: Option<String>,
    /// `block` or a replacement From address.
    pub hide_from: Option<String>,
    /// `block` or a replacement language list.
    pub hide_accept_language: Option<String>,
    /// `block` or a replacement disposition.
    pub hide_content_disposition: Option<String>,
    /// `block` or a range in minutes to randomise by.
    pub hide_if_modified_since: Option<String>,
    /// `block`, `reset-to-request-time` or `randomize`.
    pub overwrite_last_modified: Option<String>,
    /// `block` or `add`.
    pub change_x_forwarded_for: Option<String>,
    /// Replacement Content-Type for filterable responses.
    pub content_type_overwrite: Option<String>,
    /// Delete client headers matching this regex.
    pub crunch_client_header: Option<String>,
    /// Delete server headers matching this regex.
    pub crunch_server_header: Option<String>,
    /// Drop outgoing Cookie headers.
    pub crunch_outgoing_cookies: Option<bool>,
    /// Drop incoming Set-Cookie headers.
    pub crunch_incoming_cookies: Option<bool>,
    /// Strip expiry dates from cookies that are still valid.
    pub session_cookies_only: Option<bool>,
    /// Remove Accept-Encoding and TE so bodies arrive uncompressed.
    pub prevent_compression: Option<bool>,
    pub crunch_if_none_match: Option<bool>,
    /// Rewrite `HTTP/1.1` status lines to `HTTP/1.0`.
    pub downgrade_http_version: Option<bool>,
    /// Treat every response as text for filtering purposes.
    pub force_text_mode: Option<bool>,
    /// Names of text filters to apply to the body.
    pub filter: Vec<String>,
    /// Extra client headers to send.
    pub add_header: Vec<String>,
}

impl ActionSettings {
    fn merge_from(&mut self, other: &ActionSettings) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field.clone(); })*
            };
        }
        take!(
            hide_referrer,
            hide_user_agent,
            hide_from,
            hide_accept_language,
            hide_content_disposition,
            hide_if_modified_since,
            overwrite_last_modified,
            change_x_forwarded_for,
            content_type_overwrite,
            crunch_client_header,
            crunch_server_header,
            crunch_outgoing_cookies,
            crunch_incoming_cookies,
            session_cookies_only,
            prevent_compression,
            crunch_if_none_match,
            downgrade_http_version,
            force_text_mode
        );
        for name in &other.filter {
            if !self.filter.contains(name) {
                self.filter.push(name.clone());
            }
        }
        self.add_header.extend(other.add_header.iter().cloned());
    }

    /// Check parameters that only accept fixed keywords.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(xff) = &self.change_x_forwarded_for {
            if !xff.eq_ignore_ascii_case("block") && !xff.eq_ignore_ascii_case("add") {
                return Err(format!("invalid change-x-forwarded-for parameter '{xff}'"));
            }
        }
        if let Some(lm) = &self.overwrite_last_modified {
            let known = ["block", "reset-to-request-time", "randomize"];
            if !known.iter().any(|k| lm.eq_ignore_ascii_case(k)) {
                return Err(format!("invalid overwrite-last-modified parameter '{lm}'"));
            }
        }
        Ok(())
    }
}

fn compile_crunch(pattern: &Option<String>) -> ProxyResult<Option<Regex>> {
    pattern
        .as_deref()
        .map(|p| Regex::new(p).map_err(|e| ProxyError::parse(format!("invalid crunch pattern {p}: {e}"))))
        .transpose()
}

/// Resolved actions for one request.
#[derive(Debug, Clone, Default)]
pub struct CurrentAction {
    settings: ActionSettings,
    crunch_client: Option<Regex>,
    crunch_server: Option<Regex>,
}

impl CurrentAction {
    /// Actions from a single settings block.
    pub fn from_settings(settings: ActionSettings) -> ProxyResult<Self> {
        Ok(Self {
            crunch_client: compile_crunch(&settings.crunch_client_header)?,
            crunch_server: compile_crunch(&settings.crunch_server_header)?,
            settings,
        })
    }

    fn apply(&mut self, rule: &ActionRule) {
        self.settings.merge_from(&rule.settings);
        if rule.crunch_client.is_some() {
            self.crunch_client = rule.crunch_client.clone();
        }
        if rule.crunch_server.is_some() {
            self.crunch_server = rule.crunch_server.clone();
        }
    }

    pub fn settings(&self) -> &ActionSettings {
        &self.settings
    }

    pub fn hide_referrer(&self) -> Option<&str> {
        self.settings.hide_referrer.as_deref()
    }

    pub fn hide_user_agent(&self) -> Option<&str> {
        self.settings.hide_user_agent.as_deref()
    }

    pub fn hide_from(&self) -> Option<&str> {
        self.settings.hide_from.as_deref()
    }

    pub fn hide_accept_language(&self) -> Option<&str> {
        self.settings.hide_accept_language.as_deref()
    }

    pub fn hide_content_disposition(&self) -> Option<&str> {
        self.settings.hide_content_disposition.as_deref()
    }

    pub fn hide_if_modified_since(&self) -> Option<&str> {
        self.settings.hide_if_modified_since.as_deref()
    }

    pub fn overwrite_last_modified(&self) -> Option<&str> {
        self.settings.overwrite_last_modified.as_deref()
    }

    pub fn change_x_forwarded_for(&self) -> Option<&str> {
        self.settings.change_x_forwarded_for.as_deref()
    }

    pub fn content_type_overwrite(&self) -> Option<&str> {
        self.settings.content_type_overwrite.as_deref()
    }

    pub fn crunch_client_header(&self) -> Option<&Regex> {
        self.crunch_client.as_ref()
    }

    pub fn crunch_server_header(&self) -> Option<&Regex> {
        self.crunch_server.as_ref()
    }

    pub fn crunch_outgoing_cookies(&self) -> bool {
        self.settings.crunch_outgoing_cookies.unwrap_or(false)
    }

    pub fn crunch_incoming_cookies(&self) -> bool {
        self.settings.crunch_incoming_cookies.unwrap_or(false)
    }

    pub fn session_cookies_only(&self) -> bool {
        self.settings.session_cookies_only.unwrap_or(false)
    }

    pub fn prevent_compression(&self) -> bool {
        self.settings.prevent_compression.unwrap_or(false)
    }

    pub fn crunch_if_none_match(&self) -> bool {
        self.settings.crunch_if_none_match.unwrap_or(false)
    }

    pub fn downgrade_http_version(&self) -> bool {
        self.settings.downgrade_http_version.unwrap_or(false)
    }

    pub fn force_text_mode(&self) -> bool {
        self.settings.force_text_mode.unwrap_or(false)
    }

    pub fn filters(&self) -> &[String] {
        &self.settings.filter
    }

    pub fn add_headers(&self) -> &[String] {
        &self.settings.add_header
    }
}

/// A pattern with the settings it contributes.
#[derive(Debug)]
pub struct ActionRule {
    pattern: UrlPattern,
    settings: ActionSettings,
    crunch_client: Option<Regex>,
    crunch_server: Option<Regex>,
}

impl ActionRule {
    pub fn new(pattern: &str, settings: ActionSettings) -> ProxyResult<Self> {
        settings.validate().map_err(ProxyError::Parse)?;
        Ok(Self {
            pattern: UrlPattern::parse(pattern)?,
            crunch_client: compile_crunch(&settings.crunch_client_header)?,
            crunch_server: compile_crunch(&settings.crunch_server_header)?,
            settings,
        })
    }
}

/// Ordered action rules.
#[derive(Debug, Default)]
pub struct ActionTable {
    rules: Vec<ActionRule>,
}

impl ActionTable {
    pub fn new(rules: Vec<ActionRule>) -> Self {
        Self { rules }
    }

    /// Merge every rule matching `http`, in order.
    pub fn resolve(&self, http: &HttpRequest) -> CurrentAction {
        let mut action = CurrentAction::default();
        for rule in self.rules.iter().filter(|r| r.pattern.matches(http)) {
            tracing::trace!(pattern = %rule.pattern.spec(), "Action rule matched");
            action.apply(rule);
        }
        action
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
