//! Operation keyword classification.
//!
//! A scope's operation keyword expands into the concrete access kinds a rule
//! can grant. `write` includes delete and the conditional variants so that a
//! write grant covers upsert-by-search-criteria. Only `*` grants
//! [`AccessKind::OperationAny`]: the side effects of a named `$operation`
//! cannot be classified as read or write up front.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::AuthError;

/// A concrete category of operation a rule allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessKind {
    /// read, vread, history and search.
    Read,
    /// create, update and patch.
    Write,
    /// delete by id.
    Delete,
    /// create guarded by `If-None-Exist`.
    CreateConditional,
    /// update addressed by search criteria.
    UpdateConditional,
    /// delete addressed by search criteria.
    DeleteConditional,
    /// Invocation of any named `$operation`.
    OperationAny,
}

impl AccessKind {
    /// Conditional variants, which are addressed by search criteria.
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            Self::CreateConditional | Self::UpdateConditional | Self::DeleteConditional
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::CreateConditional => "create-conditional",
            Self::UpdateConditional => "update-conditional",
            Self::DeleteConditional => "delete-conditional",
            Self::OperationAny => "operation-any",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ALL: &[AccessKind] = &[
    AccessKind::Read,
    AccessKind::Write,
    AccessKind::Delete,
    AccessKind::CreateConditional,
    AccessKind::UpdateConditional,
    AccessKind::DeleteConditional,
    AccessKind::OperationAny,
];

const READ: &[AccessKind] = &[AccessKind::Read];

const WRITE: &[AccessKind] = &[
    AccessKind::Write,
    AccessKind::Delete,
    AccessKind::CreateConditional,
    AccessKind::UpdateConditional,
    AccessKind::DeleteConditional,
];

/// Expand an operation keyword into the access kinds it grants.
///
/// The returned order is the order rules are emitted in.
///
/// # Errors
///
/// Returns `AuthError::OperationNotSupported` for anything other than
/// `read`, `write` or `*`. Keywords are case-sensitive.
pub fn classify(operation: &str) -> AuthResult<&'static [AccessKind]> {
    match operation {
        "*" => Ok(ALL),
        "read" => Ok(READ),
        "write" => Ok(WRITE),
        other => Err(AuthError::operation_not_supported(other)),
    }
}
