//! Configuration validation for the relay.
//!
//! Checks that budgets are positive and ranges make sense before the
//! context manager is built from a `Config`.

use thiserror::Error;

use crate::config::{Config, ContextConfig, LlmConfig, ObservabilityConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

/// Characters the JSON form of a history adds around one user/assistant
/// exchange: `[{"role":"user","content":""},{"role":"assistant","content":""}]`.
pub const EXCHANGE_JSON_OVERHEAD: usize = 63;

/// Valid log levels.
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid log formats.
const LOG_FORMATS: &[&str] = &["json", "pretty"];

fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    if errors.len() > 1 {
        return Err(ValidationError::Multiple(errors));
    }
    match errors.pop() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn positive(field: &str, value: usize, errors: &mut Vec<ValidationError>) {
    if value == 0 {
        errors.push(ValidationError::InvalidValue {
            field: field.into(),
            reason: "must be greater than 0".into(),
        });
    }
}

impl Validate for LlmConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.model.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "llm.model".into(),
            });
        }
        if self.base_url.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "llm.base_url".into(),
            });
        }
        if self.max_tokens <= 0 {
            errors.push(ValidationError::InvalidValue {
                field: "llm.max_tokens".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "llm.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        collect(errors)
    }
}

impl Validate for ContextConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.max_history_entries < 2 {
            errors.push(ValidationError::InvalidValue {
                field: "context.max_history_entries".into(),
                reason: "must hold at least one exchange (2 entries)".into(),
            });
        }
        positive("context.max_history_size", self.max_history_size, &mut errors);
        positive("context.condensed_budget", self.condensed_budget, &mut errors);
        positive("context.turn_memory_budget", self.turn_memory_budget, &mut errors);
        positive("context.max_query_chars", self.max_query_chars, &mut errors);

        for (field, t) in [
            ("context.default_temperature", self.default_temperature),
            ("context.summary_temperature", self.summary_temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                errors.push(ValidationError::InvalidValue {
                    field: field.into(),
                    reason: format!("{t} is outside 0..=2"),
                });
            }
        }

        if self.condensed_budget > self.max_history_size {
            errors.push(ValidationError::Conflict {
                reason: format!(
                    "context.condensed_budget ({}) exceeds context.max_history_size ({})",
                    self.condensed_budget, self.max_history_size
                ),
            });
        }

        let exchange = self
            .turn_memory_budget
            .saturating_mul(2)
            .saturating_add(EXCHANGE_JSON_OVERHEAD);
        if exchange > self.max_history_size {
            errors.push(ValidationError::Conflict {
                reason: format!(
                    "two turns of context.turn_memory_budget ({}) need {} characters, more than context.max_history_size ({})",
                    self.turn_memory_budget, exchange, self.max_history_size
                ),
            });
        }

        collect(errors)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            errors.push(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of {LOG_LEVELS:?}"),
            });
        }
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            errors.push(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of {LOG_FORMATS:?}"),
            });
        }

        collect(errors)
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for result in [
            self.llm.validate(),
            self.context.validate(),
            self.observability.validate(),
        ] {
            match result {
                Ok(()) => {}
                Err(ValidationError::Multiple(inner)) => errors.extend(inner),
                Err(e) => errors.push(e),
            }
        }

        if self.storage.path.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "storage.path".into(),
            });
        }

        collect(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_budget_rejected() {
        let mut config = Config::default();
        config.context.turn_memory_budget = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("context.turn_memory_budget"));
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let mut ctx = ContextConfig::default();
        ctx.default_temperature = 2.5;
        assert!(matches!(
            ctx.validate(),
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "context.default_temperature"
        ));
    }

    #[test]
    fn condensed_budget_larger_than_window_conflicts() {
        let mut ctx = ContextConfig::default();
        ctx.condensed_budget = ctx.max_history_size + 1;
        assert!(matches!(ctx.validate(), Err(ValidationError::Conflict { .. })));
    }

    #[test]
    fn exchange_larger_than_window_conflicts() {
        let mut ctx = ContextConfig::default();
        ctx.turn_memory_budget = 2500;
        match ctx.validate() {
            Err(ValidationError::Conflict { reason }) => {
                assert!(reason.contains("context.turn_memory_budget"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        ctx.turn_memory_budget = (ctx.max_history_size - EXCHANGE_JSON_OVERHEAD) / 2;
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn single_entry_window_rejected() {
        let mut ctx = ContextConfig::default();
        ctx.max_history_entries = 1;
        assert!(matches!(
            ctx.validate(),
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "context.max_history_entries"
        ));
    }

    #[test]
    fn multiple_errors_are_flattened() {
        let mut config = Config::default();
        config.llm.model = String::new();
        config.observability.log_level = "loud".into();
        config.context.max_history_entries = 0;

        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }
}
