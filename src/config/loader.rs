//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::plugins::text_filter::TextFilter;
use crate::routing::actions::{ActionRule, ActionTable};
use crate::routing::forward::{ForwardRule, ForwardTable};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = toml::from_str(content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// A validated configuration together with its compiled rule tables.
///
/// One snapshot is taken per client connection, so a reload never changes
/// the rules halfway through an exchange.
#[derive(Debug)]
pub struct ActiveConfig {
    pub config: ProxyConfig,
    pub forward: ForwardTable,
    pub actions: ActionTable,
    pub filters: Vec<TextFilter>,
}

impl ActiveConfig {
    pub fn compile(config: ProxyConfig) -> Result<Self, ConfigError> {
        let invalid = |field: String, e: crate::error::ProxyError| {
            ConfigError::Validation(vec![ValidationError {
                field,
                message: e.to_string(),
            }])
        };

        let forward = config
            .forward
            .iter()
            .enumerate()
            .map(|(i, rule)| {
                ForwardRule::new(
                    &rule.pattern,
                    rule.forward_type,
                    rule.gateway.as_deref(),
                    rule.forward.as_deref(),
                )
                .map_err(|e| invalid(format!("forward[{i}]"), e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let actions = config
            .actions
            .iter()
            .enumerate()
            .map(|(i, rule)| {
                ActionRule::new(&rule.pattern, rule.settings.clone())
                    .map_err(|e| invalid(format!("actions[{i}]"), e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let filters = config
            .filters
            .iter()
            .enumerate()
            .map(|(i, f)| {
                TextFilter::new(&f.name, &f.pattern, &f.replacement)
                    .map_err(|e| invalid(format!("filters[{i}]"), e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            forward: ForwardTable::new(forward),
            actions: ActionTable::new(actions),
            filters,
            config,
        })
    }
}
