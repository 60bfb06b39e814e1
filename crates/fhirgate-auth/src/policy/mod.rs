//! Scope-derived access policy.
//!
//! - [`builder`] - turns granted scopes into an ordered rule list
//! - [`rule`] - rules and rule lists
//! - [`compartment`] - patient compartment constraint and membership
//! - [`request`] - classification of FHIR RESTful requests
//! - [`evaluator`] - first-match-wins evaluation and response filtering
//! - [`cache`] - per-token rule list cache

pub mod builder;
pub mod cache;
pub mod compartment;
pub mod evaluator;
pub mod request;
pub mod rule;

pub use builder::RuleBuilder;
pub use cache::{RuleListCache, RuleListCacheStats};
pub use compartment::{Compartment, CompartmentChecker, resolve_patient_compartment};
pub use evaluator::{AccessDecision, DenyReason};
pub use request::{RequestAction, RequestDescriptor};
pub use rule::{Effect, Rule, RuleList, RuleMatcher, RuleTarget};
