use crate::utils::error::{RegistryError, Result};
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_url(field_name: &str, url_str: &str, allowed_schemes: &[&str]) -> Result<()> {
    if url_str.is_empty() {
        return Err(RegistryError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => {
            if allowed_schemes.contains(&url.scheme()) {
                Ok(())
            } else {
                Err(RegistryError::InvalidConfigValueError {
                    field: field_name.to_string(),
                    value: url_str.to_string(),
                    reason: format!(
                        "Unsupported URL scheme: {}. Allowed schemes: {}",
                        url.scheme(),
                        allowed_schemes.join(", ")
                    ),
                })
            }
        }
        Err(e) => Err(RegistryError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(RegistryError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| RegistryError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RegistryError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(RegistryError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        let schemes = ["postgres", "postgresql"];
        assert!(validate_url("database.url", "postgres://localhost/school", &schemes).is_ok());
        assert!(validate_url("database.url", "postgresql://u:p@db:5432/school", &schemes).is_ok());
        assert!(validate_url("database.url", "", &schemes).is_err());
        assert!(validate_url("database.url", "invalid-url", &schemes).is_err());
        assert!(validate_url("database.url", "http://example.com", &schemes).is_err());
    }

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("database.max_connections", 5, 1).is_ok());
        assert!(validate_positive_number("database.max_connections", 0, 1).is_err());
    }

    #[test]
    fn test_validate_required_and_non_empty() {
        let missing: Option<String> = None;
        assert!(matches!(
            validate_required_field("database.url", &missing),
            Err(RegistryError::MissingConfigError { .. })
        ));
        assert!(validate_non_empty_string("service.name", "  ").is_err());
        assert!(validate_range("timeout", 0u64, 1, 300).is_err());
    }
}
