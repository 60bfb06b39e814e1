//! Per-request access context.
//!
//! An [`AccessContext`] carries what the rule builder needs from a verified
//! token: granted scopes, launch-context patient, user id and authorities.
//! Token verification happens upstream; [`AccessContext::from_claims`] only
//! reads claims that were already verified.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::config::ClaimsConfig;
use crate::error::AuthError;
use crate::smart::SmartScopes;

/// Identity of the token a context was built from, used as cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenIdentity {
    /// Token id (`jti`).
    pub id: String,
    /// Token expiry (`exp`).
    #[serde(with = "time::serde::timestamp::option")]
    pub expires_at: Option<OffsetDateTime>,
}

/// Verified identity and grants of the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    /// Raw granted scope strings.
    pub scopes: BTreeSet<String>,
    /// Launch-context patient id.
    pub patient_id: Option<String>,
    /// Authenticated user id.
    pub user_id: Option<String>,
    /// Granted authorities, in token order.
    pub authorities: Vec<String>,
    /// Token identity, when the token carries one.
    pub token: Option<TokenIdentity>,
}

impl AccessContext {
    /// A context granting `scopes`.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_authorities<I, S>(mut self, authorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authorities = authorities.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_token(mut self, id: impl Into<String>, expires_at: Option<OffsetDateTime>) -> Self {
        self.token = Some(TokenIdentity {
            id: id.into(),
            expires_at,
        });
        self
    }

    /// Parse the granted scopes, in sorted order.
    #[must_use]
    pub fn smart_scopes(&self) -> SmartScopes {
        SmartScopes::from_raw(&self.scopes)
    }

    /// Build a context from verified token claims.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` if the claims are not a JSON object
    /// or a configured claim has the wrong shape.
    pub fn from_claims(claims: &Value, cfg: &ClaimsConfig) -> AuthResult<Self> {
        let Some(claims) = claims.as_object() else {
            return Err(AuthError::invalid_token("claims must be a JSON object"));
        };

        let scopes = match claims.get(&cfg.scope_claim) {
            None | Some(Value::Null) => BTreeSet::new(),
            Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
            Some(Value::Array(items)) => string_array(items, &cfg.scope_claim)?
                .into_iter()
                .collect(),
            Some(_) => {
                return Err(AuthError::invalid_token(format!(
                    "claim '{}' must be a string or an array of strings",
                    cfg.scope_claim
                )));
            }
        };

        let patient_id = match claims.get(&cfg.patient_claim) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(AuthError::invalid_token(format!(
                    "claim '{}' must be a string",
                    cfg.patient_claim
                )));
            }
        };

        let user_id = cfg
            .principal_claims
            .iter()
            .find_map(|name| claims.get(name).and_then(Value::as_str))
            .map(str::to_string);

        let authorities = match claims.get(&cfg.authorities_claim) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => string_array(items, &cfg.authorities_claim)?,
            Some(_) => {
                return Err(AuthError::invalid_token(format!(
                    "claim '{}' must be an array of strings",
                    cfg.authorities_claim
                )));
            }
        };

        let expires_at = claims
            .get("exp")
            .and_then(Value::as_i64)
            .and_then(|exp| OffsetDateTime::from_unix_timestamp(exp).ok());
        let token = claims
            .get("jti")
            .and_then(Value::as_str)
            .map(|id| TokenIdentity {
                id: id.to_string(),
                expires_at,
            });

        Ok(Self {
            scopes,
            patient_id,
            user_id,
            authorities,
            token,
        })
    }
}

fn string_array(items: &[Value], claim: &str) -> AuthResult<Vec<String>> {
    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                AuthError::invalid_token(format!("claim '{claim}' must contain only strings"))
            })
        })
        .collect()
}
