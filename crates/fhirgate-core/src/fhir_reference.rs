//! FHIR Reference parsing.
//!
//! Compartment checks compare references such as `Patient/123` found in
//! resource content and search parameters. Only references that point at this
//! server can be compared; contained, URN and foreign references cannot.
//!
//! ```
//! use fhirgate_core::fhir_reference::{parse_reference, UnresolvableReference};
//!
//! let r = parse_reference("Patient/123/_history/2", None).unwrap();
//! assert_eq!(r.resource_type, "Patient");
//! assert_eq!(r.id, "123");
//! assert_eq!(r.version.as_deref(), Some("2"));
//!
//! let err = parse_reference("#contained", None).unwrap_err();
//! assert!(matches!(err, UnresolvableReference::Contained(_)));
//! ```

use std::fmt;

use url::Url;

use crate::fhir::is_valid_resource_type_name;

/// A reference to a resource on this server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FhirReference {
    pub resource_type: String,
    pub id: String,
    /// Version from a `/_history/{vid}` suffix.
    pub version: Option<String>,
}

impl FhirReference {
    #[must_use]
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version: None,
        }
    }

    #[must_use]
    pub fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type == resource_type
    }
}

impl fmt::Display for FhirReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)?;
        if let Some(version) = &self.version {
            write!(f, "/_history/{version}")?;
        }
        Ok(())
    }
}

/// Why a reference does not identify a resource on this server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnresolvableReference {
    #[error("contained reference #{0}")]
    Contained(String),

    #[error("URN reference {0}")]
    Urn(String),

    /// An absolute URL outside the configured base URL.
    #[error("external reference {0}")]
    External(String),

    #[error("malformed reference '{0}'")]
    Malformed(String),
}

/// Parse a literal FHIR reference.
///
/// Relative references (`Type/id`, `Type/id/_history/vid`) always resolve.
/// Absolute URLs resolve only when they live under `base_url`: same scheme,
/// host and port, and a path below the base path.
///
/// # Errors
///
/// Returns the reason the reference cannot be resolved locally.
pub fn parse_reference(
    reference: &str,
    base_url: Option<&str>,
) -> Result<FhirReference, UnresolvableReference> {
    let reference = reference.trim();

    if let Some(id) = reference.strip_prefix('#') {
        return Err(UnresolvableReference::Contained(id.to_string()));
    }
    if reference.starts_with("urn:") {
        return Err(UnresolvableReference::Urn(reference.to_string()));
    }

    let relative = if reference.contains("://") {
        local_path(reference, base_url)
            .ok_or_else(|| UnresolvableReference::External(reference.to_string()))?
    } else {
        reference.to_string()
    };

    let segments: Vec<&str> = relative.split('/').collect();
    let (resource_type, id, version) = match segments.as_slice() {
        [ty, id] => (*ty, *id, None),
        [ty, id, "_history", vid] if !vid.is_empty() => (*ty, *id, Some(*vid)),
        _ => return Err(UnresolvableReference::Malformed(reference.to_string())),
    };

    if !is_valid_resource_type_name(resource_type) || id.is_empty() {
        return Err(UnresolvableReference::Malformed(reference.to_string()));
    }

    Ok(FhirReference {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
        version: version.map(str::to_string),
    })
}

/// Path of `reference` relative to `base_url`, if it lives under it.
fn local_path(reference: &str, base_url: Option<&str>) -> Option<String> {
    let base = Url::parse(base_url?).ok()?;
    let target = Url::parse(reference).ok()?;

    if target.scheme() != base.scheme()
        || target.host_str() != base.host_str()
        || target.port_or_known_default() != base.port_or_known_default()
    {
        return None;
    }

    let base_path = base.path().trim_end_matches('/');
    let rest = target.path().strip_prefix(base_path)?.strip_prefix('/')?;
    Some(rest.to_string())
}
