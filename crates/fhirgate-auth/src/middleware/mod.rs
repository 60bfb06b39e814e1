//! HTTP middleware for scope enforcement.
//!
//! - [`enforce`] - the axum middleware applying a caller's rule list
//! - [`error`] - FHIR OperationOutcome rendering of [`crate::AuthError`]
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware::from_fn_with_state, routing::any};
//! use fhirgate_auth::middleware::{ScopeEnforcer, enforce_scopes};
//!
//! let enforcer = ScopeEnforcer::from_config(config)?;
//! let app = Router::new()
//!     .route("/fhir/{*path}", any(fhir_handler))
//!     .layer(from_fn_with_state(enforcer, enforce_scopes));
//! ```

pub mod enforce;
pub mod error;

pub use enforce::{ScopeEnforcer, enforce_scopes};
pub use error::{FHIR_JSON, operation_outcome_json};
