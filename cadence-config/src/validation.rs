// Configuration validation

use crate::{ConfigError, Result};

/// Implemented by configuration sections that can check their own values.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable validation rules. Each rule names the offending field in its error.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Reject empty or whitespace-only strings
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(field, "cannot be empty"));
        }
        Ok(())
    }

    /// Require `min <= value <= max`
    pub fn in_range<T>(value: T, min: T, max: T, field: &str) -> Result<()>
    where
        T: PartialOrd + std::fmt::Display,
    {
        if value < min || value > max {
            return Err(ConfigError::invalid(
                field,
                format!("{} is outside {}..={}", value, min, max),
            ));
        }
        Ok(())
    }

    /// Require a strictly positive value
    pub fn positive<T>(value: T, field: &str) -> Result<()>
    where
        T: PartialOrd + Default + std::fmt::Display,
    {
        if value <= T::default() {
            return Err(ConfigError::invalid(
                field,
                format!("{} must be greater than zero", value),
            ));
        }
        Ok(())
    }

    /// Require an absolute http(s) URL
    pub fn is_url(value: &str, field: &str) -> Result<()> {
        let rest = value
            .strip_prefix("https://")
            .or_else(|| value.strip_prefix("http://"));
        match rest {
            Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
            _ => Err(ConfigError::invalid(field, "must be an absolute http(s) URL")),
        }
    }

    /// Basic `local@domain.tld` shape check
    pub fn is_email(value: &str, field: &str) -> Result<()> {
        let valid = match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
            }
            None => false,
        };
        if !valid {
            return Err(ConfigError::invalid(field, "must be a valid email address"));
        }
        Ok(())
    }
}
