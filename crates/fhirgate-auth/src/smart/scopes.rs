//! SMART on FHIR v1 scope parsing.
//!
//! Resource scopes follow the format `context/ResourceType.operation`:
//!
//! - **Context**: `patient` (launch-context patient) or `user` (authenticated user)
//! - **ResourceType**: a FHIR resource type (e.g. `Observation`) or `*`
//! - **Operation**: `read`, `write` or `*`
//!
//! Parsing is total. Any other prefix (`launch/patient`, `openid`,
//! `system/*.read`, ...) yields [`Scope::Unrecognized`], which grants no
//! structured access. Resource names and operation keywords are not validated
//! here; the rule builder rejects them with the full grant at hand.
//!
//! # Examples
//!
//! ```
//! use fhirgate_auth::smart::scopes::{Scope, ScopeContext, ResourceTarget};
//!
//! let scope = Scope::parse("patient/Observation.read");
//! assert_eq!(scope.context(), ScopeContext::Patient);
//! let grant = scope.grant().unwrap();
//! assert_eq!(grant.resource, ResourceTarget::Specific("Observation".into()));
//! assert_eq!(grant.operation, "read");
//!
//! assert_eq!(Scope::parse("launch/patient").context(), ScopeContext::Unrecognized);
//! ```

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

const PATIENT_CONTEXT: &str = "patient";
const USER_CONTEXT: &str = "user";

// ============================================================================
// Scope Context
// ============================================================================

/// The context in which a scope applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeContext {
    /// `patient/…`: limited to the launch-context patient's compartment.
    Patient,
    /// `user/…`: anything the authenticated user may access.
    User,
    /// Any other scope string.
    Unrecognized,
}

impl ScopeContext {
    /// Returns the string representation of the context.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => PATIENT_CONTEXT,
            Self::User => USER_CONTEXT,
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Resource Target
// ============================================================================

/// The FHIR resource type targeted by a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceTarget {
    /// A specific resource type name, exactly as written in the scope.
    Specific(String),
    /// Wildcard (`*`) matching all resource types.
    Wildcard,
}

impl ResourceTarget {
    fn from_segment(segment: &str) -> Self {
        if segment == "*" {
            Self::Wildcard
        } else {
            Self::Specific(segment.to_string())
        }
    }
}

impl fmt::Display for ResourceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Specific(s) => f.write_str(s),
            Self::Wildcard => f.write_str("*"),
        }
    }
}

// ============================================================================
// Scope
// ============================================================================

/// Resource and operation carried by a recognized scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeGrant {
    /// Target resource type or wildcard.
    pub resource: ResourceTarget,
    /// Operation keyword, unvalidated (`read`, `write`, `*` or anything else).
    pub operation: String,
}

/// A single parsed scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// `patient/<resource>.<operation>`
    Patient(ScopeGrant),
    /// `user/<resource>.<operation>`
    User(ScopeGrant),
    /// Anything else; holds the raw string for diagnostics only.
    Unrecognized(String),
}

impl Scope {
    /// Parse a raw scope string.
    ///
    /// The grammar is `context "/" rest`, then `rest` split on its first `.`
    /// into resource and operation. A recognized context with no `.` yields an
    /// empty operation, which the rule builder reports as unsupported.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let Some((context, rest)) = raw.split_once('/') else {
            return Self::Unrecognized(raw.to_string());
        };

        let (resource, operation) = rest.split_once('.').unwrap_or((rest, ""));
        let grant = ScopeGrant {
            resource: ResourceTarget::from_segment(resource),
            operation: operation.to_string(),
        };

        match context {
            PATIENT_CONTEXT => Self::Patient(grant),
            USER_CONTEXT => Self::User(grant),
            _ => Self::Unrecognized(raw.to_string()),
        }
    }

    /// The context this scope applies in.
    #[must_use]
    pub fn context(&self) -> ScopeContext {
        match self {
            Self::Patient(_) => ScopeContext::Patient,
            Self::User(_) => ScopeContext::User,
            Self::Unrecognized(_) => ScopeContext::Unrecognized,
        }
    }

    /// The structured grant, absent for unrecognized scopes.
    #[must_use]
    pub fn grant(&self) -> Option<&ScopeGrant> {
        match self {
            Self::Patient(grant) | Self::User(grant) => Some(grant),
            Self::Unrecognized(_) => None,
        }
    }

    /// Returns `true` for patient and user scopes, which limit access.
    #[must_use]
    pub fn is_access_limiting(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl FromStr for Scope {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patient(grant) | Self::User(grant) => write!(
                f,
                "{}/{}.{}",
                self.context(),
                grant.resource,
                grant.operation
            ),
            Self::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

// ============================================================================
// Smart Scopes Collection
// ============================================================================

/// The parsed scopes granted to one token, in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmartScopes {
    scopes: Vec<Scope>,
}

impl SmartScopes {
    /// Parse every raw scope string.
    pub fn from_raw<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            scopes: raw.into_iter().map(|s| Scope::parse(s.as_ref())).collect(),
        }
    }

    /// Parse a space-separated scope string (the OAuth2 `scope` format).
    #[must_use]
    pub fn parse(scope_string: &str) -> Self {
        Self::from_raw(scope_string.split_whitespace())
    }

    /// Returns `true` if at least one scope is a patient or user scope.
    #[must_use]
    pub fn has_access_limiting(&self) -> bool {
        self.scopes.iter().any(Scope::is_access_limiting)
    }

    /// Grants of all `patient/…` scopes, in order.
    pub fn patient_grants(&self) -> impl Iterator<Item = &ScopeGrant> {
        self.scopes.iter().filter_map(|s| match s {
            Scope::Patient(grant) => Some(grant),
            _ => None,
        })
    }

    /// Returns `true` if any `patient/…` scope is present.
    #[must_use]
    pub fn has_patient_scopes(&self) -> bool {
        self.patient_grants().next().is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

impl fmt::Display for SmartScopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.scopes {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{scope}")?;
            first = false;
        }
        Ok(())
    }
}
