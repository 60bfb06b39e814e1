use thiserror::Error;

/// Core error types for FhirGate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid FHIR resource type: {0}")]
    InvalidResourceType(String),

    #[error("Unknown FHIR resource type: {0}")]
    UnknownResourceType(String),
}

impl CoreError {
    /// Create a new InvalidResourceType error
    pub fn invalid_resource_type(resource_type: impl Into<String>) -> Self {
        Self::InvalidResourceType(resource_type.into())
    }

    /// Create a new UnknownResourceType error
    pub fn unknown_resource_type(resource_type: impl Into<String>) -> Self {
        Self::UnknownResourceType(resource_type.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CoreError::invalid_resource_type("patient").to_string(),
            "Invalid FHIR resource type: patient"
        );
        assert_eq!(
            CoreError::unknown_resource_type("Widget").to_string(),
            "Unknown FHIR resource type: Widget"
        );
    }
}
