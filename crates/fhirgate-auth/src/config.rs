//! Authorization configuration.
//!
//! Every section is `#[serde(default)]`, so an empty file (or none at all)
//! yields a working configuration that enforces scopes against the full R4
//! resource catalog.
//!
//! # Example (TOML)
//!
//! ```toml
//! enabled = true
//! base_path = "/fhir"
//! supported_resource_types = ["Patient", "Observation"]
//!
//! [claims]
//! patient_claim = "patient"
//! principal_claims = ["user_name", "sub"]
//!
//! [cache]
//! max_ttl = "5m"
//! ```

use std::sync::Arc;
use std::time::Duration;

use fhirgate_core::{ResourceTypeCatalog, StaticCatalog, is_valid_resource_type_name};
use serde::{Deserialize, Serialize};

/// Deny-all rule description used when none is configured.
pub const DEFAULT_DENY_ALL_DESCRIPTION: &str =
    "DENY ALL patient, resource or operation access if not explicitly granted in authorized scope";

/// Root authorization configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthzConfig {
    /// Enable/disable scope enforcement.
    /// When disabled, every request passes through unchecked.
    pub enabled: bool,

    /// Mount prefix of the FHIR API, stripped before request classification.
    pub base_path: String,

    /// Absolute base URL of this server; absolute references under it are
    /// treated as local when resolving compartment membership.
    pub base_url: Option<String>,

    /// Where identity and scopes are found in verified token claims.
    pub claims: ClaimsConfig,

    /// Resource types served by the deployment. Empty means all of R4.
    pub supported_resource_types: Vec<String>,

    /// Description attached to the terminal deny-all rule.
    pub deny_all_description: String,

    /// Per-token rule list cache.
    pub cache: CacheConfig,

    /// Upper bound for buffered request and response bodies.
    pub max_body_bytes: usize,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_path: String::new(),
            base_url: None,
            claims: ClaimsConfig::default(),
            supported_resource_types: Vec::new(),
            deny_all_description: DEFAULT_DENY_ALL_DESCRIPTION.to_string(),
            cache: CacheConfig::default(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Claim names read by the claims adapter.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClaimsConfig {
    /// Launch-context patient id claim.
    pub patient_claim: String,

    /// Candidate user id claims; the first present one wins.
    pub principal_claims: Vec<String>,

    /// Granted authorities claim.
    pub authorities_claim: String,

    /// Granted scopes claim (space-separated string or array).
    pub scope_claim: String,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            patient_claim: "patient".to_string(),
            principal_claims: vec!["user_name".to_string(), "sub".to_string()],
            authorities_claim: "authorities".to_string(),
            scope_claim: "scope".to_string(),
        }
    }
}

/// Rule list cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache rule lists per token.
    pub enabled: bool,

    /// Upper bound on entry lifetime; entries never outlive their token.
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_ttl: Duration::from_secs(300),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthzConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - `base_path` is non-empty and does not start with `/`
    /// - `base_url` is set but not an absolute URL
    /// - a supported resource type is not a valid R4 resource type
    /// - the cache is enabled with a zero `max_ttl`
    /// - `max_body_bytes` is zero
    ///
    /// Returns `ConfigError::Missing` if a claim name is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_path.is_empty() && !self.base_path.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "base_path must start with '/': '{}'",
                self.base_path
            )));
        }

        if let Some(base_url) = &self.base_url
            && url::Url::parse(base_url).is_err()
        {
            return Err(ConfigError::InvalidValue(format!(
                "base_url must be an absolute URL: '{base_url}'"
            )));
        }

        if self.claims.patient_claim.is_empty() {
            return Err(ConfigError::Missing("claims.patient_claim".to_string()));
        }
        if self.claims.scope_claim.is_empty() {
            return Err(ConfigError::Missing("claims.scope_claim".to_string()));
        }
        if self.claims.principal_claims.iter().all(String::is_empty) {
            return Err(ConfigError::Missing("claims.principal_claims".to_string()));
        }

        for name in &self.supported_resource_types {
            if !is_valid_resource_type_name(name) {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid resource type in supported_resource_types: '{name}'"
                )));
            }
        }
        self.catalog()
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        if self.cache.enabled && self.cache.max_ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "cache.max_ttl must be > 0 when the cache is enabled".to_string(),
            ));
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "max_body_bytes must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The resource-type catalog this configuration selects.
    ///
    /// # Errors
    ///
    /// Fails if a configured name is not an R4 resource type.
    pub fn catalog(&self) -> fhirgate_core::Result<Arc<dyn ResourceTypeCatalog>> {
        let catalog = if self.supported_resource_types.is_empty() {
            StaticCatalog::r4()
        } else {
            StaticCatalog::restricted(&self.supported_resource_types)?
        };
        Ok(Arc::new(catalog))
    }
}

pub mod loader {
    use super::AuthzConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "fhirgate.toml";

    /// Load, merge and validate configuration.
    ///
    /// Sources in increasing precedence: built-in defaults, the TOML file at
    /// `path` (or `fhirgate.toml`) when it exists, then environment variables
    /// such as `FHIRGATE__CACHE__MAX_TTL=1m`.
    pub fn load_config(path: Option<&str>) -> Result<AuthzConfig, String> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        builder = builder.add_source(
            Environment::with_prefix("FHIRGATE")
                .try_parsing(true)
                .separator("__"),
        );

        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AuthzConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate().map_err(|e| e.to_string())?;
        Ok(merged)
    }
}
