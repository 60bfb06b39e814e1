//! # fhirgate-auth
//!
//! SMART on FHIR scope enforcement for FHIR servers.
//!
//! This crate provides:
//! - Parsing of SMART `context/Resource.operation` scopes
//! - Translation of granted scopes into an ordered, first-match-wins rule list
//! - Evaluation of FHIR RESTful requests against that list, including
//!   patient compartment checks on returned resources
//! - A per-token rule list cache
//! - Axum middleware that applies all of the above to a FHIR endpoint
//!
//! ## Modules
//!
//! - [`config`] - Authorization configuration and loading
//! - [`context`] - Per-request access context built from token claims
//! - [`smart`] - SMART scope parsing and operation keywords
//! - [`policy`] - Rule building, evaluation and caching
//! - [`middleware`] - HTTP middleware and error responses
//!
//! ## Example
//!
//! ```ignore
//! use fhirgate_auth::prelude::*;
//!
//! let builder = RuleBuilder::from_config(&AuthzConfig::default())?;
//! let ctx = AccessContext::new(["patient/*.read"]).with_patient("123");
//! let rules = builder.build_rule_list(Some(&ctx))?;
//!
//! // Compartment reads are decided on the returned resources.
//! let request = RequestDescriptor::new(RequestAction::Read).on_instance("Patient", "123");
//! assert!(rules.evaluate(&request).is_deferred());
//!
//! let patient = serde_json::json!({"resourceType": "Patient", "id": "123"});
//! assert!(rules.permits_resource(&RequestAction::Read, &patient));
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod smart;

pub use config::{AuthzConfig, CacheConfig, ClaimsConfig, ConfigError};
pub use context::{AccessContext, TokenIdentity};
pub use error::{AuthError, ErrorCategory};
pub use middleware::{ScopeEnforcer, enforce_scopes};
pub use policy::{
    AccessDecision, Compartment, CompartmentChecker, DenyReason, Effect, RequestAction,
    RequestDescriptor, Rule, RuleBuilder, RuleList, RuleListCache, RuleListCacheStats,
    RuleMatcher, RuleTarget, resolve_patient_compartment,
};
pub use smart::{AccessKind, ResourceTarget, Scope, ScopeContext, ScopeGrant, SmartScopes, classify};

/// Type alias for authorization results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use fhirgate_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::config::{AuthzConfig, ConfigError};
    pub use crate::context::AccessContext;
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::middleware::{ScopeEnforcer, enforce_scopes};
    pub use crate::policy::{
        AccessDecision, DenyReason, RequestAction, RequestDescriptor, RuleBuilder, RuleList,
        RuleListCache,
    };
    pub use crate::smart::{AccessKind, Scope, SmartScopes};
}
