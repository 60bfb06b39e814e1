//! SMART on FHIR scope handling.
//!
//! - [`scopes`] - parsing of `context/Resource.operation` scope strings
//! - [`operations`] - expansion of operation keywords into access kinds

pub mod operations;
pub mod scopes;

pub use operations::{AccessKind, classify};
pub use scopes::{ResourceTarget, Scope, ScopeContext, ScopeGrant, SmartScopes};
