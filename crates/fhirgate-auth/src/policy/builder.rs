//! Scope-to-policy rule builder.
//!
//! [`RuleBuilder::build_rule_list`] turns the scopes of one token into an
//! ordered [`RuleList`]:
//!
//! 1. unauthenticated callers, and tokens without any `patient/` or `user/`
//!    scope, get a single Allow-All rule;
//! 2. every `user/` scope contributes unrestricted allow rules;
//! 3. every `patient/` scope contributes allow rules limited to the launch
//!    patient's compartment;
//! 4. the capability statement is always allowed;
//! 5. everything else is denied.
//!
//! Building is a pure function of its input and the resource catalog. Any
//! unusable grant fails the whole build; no partial list is returned.

use std::fmt;
use std::sync::Arc;

use fhirgate_core::ResourceTypeCatalog;

use super::compartment::{Compartment, PATIENT, resolve_patient_compartment};
use super::rule::{Rule, RuleList, RuleTarget};
use crate::AuthResult;
use crate::config::{AuthzConfig, DEFAULT_DENY_ALL_DESCRIPTION};
use crate::context::AccessContext;
use crate::error::AuthError;
use crate::smart::{AccessKind, ResourceTarget, Scope, ScopeGrant, classify};

/// Description of the capability statement rule.
pub const METADATA_DESCRIPTION: &str = "Allow capability statement";

/// Builds rule lists from granted scopes.
#[derive(Clone)]
pub struct RuleBuilder {
    catalog: Arc<dyn ResourceTypeCatalog>,
    deny_all_description: String,
}

impl fmt::Debug for RuleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleBuilder")
            .field("catalog_len", &self.catalog.len())
            .field("deny_all_description", &self.deny_all_description)
            .finish()
    }
}

impl RuleBuilder {
    /// Create a builder validating resource types against `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<dyn ResourceTypeCatalog>) -> Self {
        Self {
            catalog,
            deny_all_description: DEFAULT_DENY_ALL_DESCRIPTION.to_string(),
        }
    }

    /// Create a builder from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the configured resource types do
    /// not form a valid catalog.
    pub fn from_config(config: &AuthzConfig) -> AuthResult<Self> {
        let catalog = config
            .catalog()
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        Ok(Self::new(catalog).with_deny_all_description(config.deny_all_description.clone()))
    }

    #[must_use]
    pub fn with_deny_all_description(mut self, description: impl Into<String>) -> Self {
        self.deny_all_description = description.into();
        self
    }

    /// Build the rule list for a caller; `None` means unauthenticated.
    ///
    /// # Errors
    ///
    /// - `AuthError::OperationNotSupported` if a scope's operation is not
    ///   `read`, `write` or `*`
    /// - `AuthError::ResourceNotSupported` if a scope names a resource type
    ///   the catalog does not contain
    /// - `AuthError::Security` if a patient scope is granted without a
    ///   launch-context patient
    pub fn build_rule_list(&self, ctx: Option<&AccessContext>) -> AuthResult<RuleList> {
        let Some(ctx) = ctx else {
            tracing::debug!("No authenticated caller, allowing all");
            return Ok(RuleList::allow_all());
        };

        let scopes = ctx.smart_scopes();
        if !scopes.has_access_limiting() {
            tracing::debug!(
                scope_count = scopes.len(),
                "No patient or user scope granted, allowing all"
            );
            return Ok(RuleList::allow_all());
        }

        let mut rules = Vec::new();

        for scope in scopes.iter() {
            if let Scope::User(grant) = scope {
                self.user_rules(scope, grant, &mut rules)
                    .inspect_err(|e| tracing::warn!(scope = %scope, error = %e, "Unusable user scope"))?;
            }
        }

        if scopes.has_patient_scopes() {
            let compartment = resolve_patient_compartment(ctx.patient_id.as_deref())
                .inspect_err(|e| {
                    tracing::warn!(
                        user_id = ctx.user_id.as_deref().unwrap_or("-"),
                        error = %e,
                        "Patient scope granted without launch patient"
                    );
                })?;

            for scope in scopes.iter() {
                if let Scope::Patient(grant) = scope {
                    self.patient_rules(scope, grant, &compartment, &mut rules)
                        .inspect_err(|e| {
                            tracing::warn!(scope = %scope, error = %e, "Unusable patient scope");
                        })?;
                }
            }
        }

        rules.push(Rule::allow_metadata().with_description(METADATA_DESCRIPTION));
        rules.push(Rule::deny_all().with_description(self.deny_all_description.clone()));

        tracing::debug!(
            scope_count = scopes.len(),
            rule_count = rules.len(),
            patient_context = ctx.patient_id.is_some(),
            "Built scope rule list"
        );

        Ok(RuleList::from_rules(rules))
    }

    fn user_rules(&self, scope: &Scope, grant: &ScopeGrant, rules: &mut Vec<Rule>) -> AuthResult<()> {
        let kinds = classify(&grant.operation)?;
        let target = self.target(&grant.resource)?;

        rules.extend(kinds.iter().map(|kind| {
            Rule::allow(target.clone(), *kind, Compartment::Unrestricted)
                .with_description(scope.to_string())
        }));
        Ok(())
    }

    fn patient_rules(
        &self,
        scope: &Scope,
        grant: &ScopeGrant,
        compartment: &Compartment,
        rules: &mut Vec<Rule>,
    ) -> AuthResult<()> {
        let kinds = classify(&grant.operation)?;
        let target = self.target(&grant.resource)?;

        for kind in kinds {
            match kind {
                // Membership cannot be established from search criteria.
                k if k.is_conditional() => {}
                // Named operations are only reachable on the patient itself.
                AccessKind::OperationAny => {
                    if target == RuleTarget::Type(PATIENT.to_string()) {
                        rules.push(
                            Rule::allow(target.clone(), *kind, compartment.clone())
                                .with_description(scope.to_string()),
                        );
                    }
                }
                _ => rules.push(
                    Rule::allow(target.clone(), *kind, compartment.clone())
                        .with_description(scope.to_string()),
                ),
            }
        }
        Ok(())
    }

    fn target(&self, resource: &ResourceTarget) -> AuthResult<RuleTarget> {
        match resource {
            ResourceTarget::Wildcard => Ok(RuleTarget::Any),
            ResourceTarget::Specific(name) if self.catalog.contains(name) => {
                Ok(RuleTarget::Type(name.clone()))
            }
            ResourceTarget::Specific(name) => Err(AuthError::resource_not_supported(name.as_str())),
        }
    }
}
