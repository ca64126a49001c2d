use serde::Serialize;

/// Identity of one database engine integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    /// Canonical registry key, always lower-cased
    pub name: String,
    pub display_name: String,
    /// Suffix of the dump artifact, without the leading dot
    pub extension: String,
}

impl ProviderDescriptor {
    pub fn new(name: &str, display_name: &str, extension: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            display_name: display_name.to_string(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }
}

/// Result of a provider's synchronous pre-flight check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn ok() -> Self {
        Self::from_errors(Vec::new())
    }
}
