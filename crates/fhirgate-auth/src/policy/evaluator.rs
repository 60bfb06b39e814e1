//! First-match-wins evaluation of a [`RuleList`].
//!
//! The evaluator walks the rules in order; the first rule that definitely
//! matches the request decides. Reads that a patient-compartment rule covers
//! or may cover are never decided up front: the decision is
//! [`AccessDecision::Deferred`] and the host checks every returned resource
//! with [`RuleList::permits_resource`]. That holds for reads whose owner is
//! unknown (an instance read of an `Observation`, a `Patient` search by
//! identifier) and for searches pinned to the launch patient, whose results
//! can still carry included resources of other patients.

use serde::Serialize;
use serde_json::Value;

use super::compartment::{Compartment, CompartmentChecker, PATIENT};
use super::request::{RequestAction, RequestDescriptor};
use super::rule::{Effect, Rule, RuleList, RuleMatcher, RuleTarget};
use crate::error::AuthError;
use crate::smart::AccessKind;

// =============================================================================
// Access Decision
// =============================================================================

/// Result of evaluating a request against a rule list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Access is granted.
    Allow,
    /// Access is denied with a reason.
    Deny(DenyReason),
    /// Allowed only for returned resources inside the granted compartment.
    Deferred,
}

impl AccessDecision {
    /// Returns `true` if access was granted.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Returns `true` if access was denied.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }

    /// Returns `true` if the response must be filtered.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred)
    }

    /// Get the deny reason if access was denied.
    #[must_use]
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Deny(reason) => Some(reason),
            _ => None,
        }
    }
}

// =============================================================================
// Deny Reason
// =============================================================================

/// Reason for access denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenyReason {
    /// Error code for programmatic handling.
    pub code: String,

    /// Human-readable error message.
    pub message: String,

    /// Description of the rule that denied access.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl DenyReason {
    /// Create a denial reason from a matching deny rule.
    #[must_use]
    pub fn denied_by_rule(rule: &Rule) -> Self {
        Self {
            code: "rule-denied".to_string(),
            message: "Access denied by rule".to_string(),
            rule: Some(
                rule.description
                    .clone()
                    .unwrap_or_else(|| rule.to_string()),
            ),
        }
    }

    /// Create a denial reason for a list with no matching rule.
    #[must_use]
    pub fn no_matching_rule() -> Self {
        Self {
            code: "no-matching-rule".to_string(),
            message: "No rule granted access to this request".to_string(),
            rule: None,
        }
    }

    /// Create a denial reason for a returned resource outside the compartment.
    #[must_use]
    pub fn outside_compartment(resource: impl Into<String>) -> Self {
        Self {
            code: "outside-compartment".to_string(),
            message: format!(
                "Access denied to {} outside the authorized compartment",
                resource.into()
            ),
            rule: None,
        }
    }
}

impl From<DenyReason> for AuthError {
    fn from(reason: DenyReason) -> Self {
        match reason.rule {
            Some(rule) => AuthError::forbidden(format!("{} ({rule})", reason.message)),
            None => AuthError::forbidden(reason.message),
        }
    }
}

// =============================================================================
// Matching
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleMatch {
    Definite,
    /// Would match a read if the owner turned out to be the rule's patient.
    PendingOwner,
    No,
}

impl Rule {
    fn match_request(&self, request: &RequestDescriptor) -> RuleMatch {
        let (target, access, compartment) = match &self.matcher {
            RuleMatcher::Everything => return RuleMatch::Definite,
            RuleMatcher::Metadata => {
                return if request.action == RequestAction::Capabilities {
                    RuleMatch::Definite
                } else {
                    RuleMatch::No
                };
            }
            RuleMatcher::Access {
                target,
                access,
                compartment,
            } => (target, *access, compartment),
        };

        if request.action.access_kind() != Some(access) {
            return RuleMatch::No;
        }

        let covered = match request.resource_type.as_deref() {
            Some(ty) => target.covers(ty),
            None => *target == RuleTarget::Any,
        };
        if !covered {
            return RuleMatch::No;
        }

        match compartment {
            Compartment::Unrestricted => RuleMatch::Definite,
            // Compartment operations only reach the patient instance itself.
            Compartment::Patient(patient) if access == AccessKind::OperationAny => {
                let on_patient = request.resource_type.as_deref() == Some(PATIENT)
                    && request.instance_id.as_deref() == Some(patient.as_str());
                if on_patient {
                    RuleMatch::Definite
                } else {
                    RuleMatch::No
                }
            }
            Compartment::Patient(patient) => match request.owner_patient_id.as_deref() {
                Some(owner) if owner == patient => RuleMatch::Definite,
                Some(_) => RuleMatch::No,
                None if access == AccessKind::Read => RuleMatch::PendingOwner,
                None => RuleMatch::No,
            },
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

impl RuleList {
    /// Evaluate a request; the first definitely matching rule decides.
    ///
    /// A read granted through a patient compartment is `Deferred` even when
    /// the owner is known: searches can pull in other resources through
    /// `_include`, `_revinclude` or `_has`. A list without any matching rule
    /// denies.
    #[must_use]
    pub fn evaluate(&self, request: &RequestDescriptor) -> AccessDecision {
        let (matched, pending) = self.first_match(request);

        match matched {
            Some(rule) if rule.effect == Effect::Allow => {
                let compartment_read = request.action == RequestAction::Read
                    && rule.compartment().is_some_and(|c| c.patient_id().is_some());
                if compartment_read {
                    AccessDecision::Deferred
                } else {
                    AccessDecision::Allow
                }
            }
            Some(_) if pending => AccessDecision::Deferred,
            Some(rule) => {
                tracing::debug!(
                    action = %request.action,
                    resource_type = request.resource_type.as_deref().unwrap_or("-"),
                    rule = %rule,
                    "Request denied by rule list"
                );
                AccessDecision::Deny(DenyReason::denied_by_rule(rule))
            }
            None if pending => AccessDecision::Deferred,
            None => AccessDecision::Deny(DenyReason::no_matching_rule()),
        }
    }

    /// The first definitely matching rule, and whether an allow rule before
    /// it was waiting on the owner.
    fn first_match(&self, request: &RequestDescriptor) -> (Option<&Rule>, bool) {
        let mut pending = false;
        for rule in self {
            match rule.match_request(request) {
                RuleMatch::Definite => return (Some(rule), pending),
                RuleMatch::PendingOwner if rule.effect == Effect::Allow => pending = true,
                RuleMatch::PendingOwner | RuleMatch::No => {}
            }
        }
        (None, pending)
    }

    /// Returns `true` if a rule definitely allows `request`.
    fn definitely_allows(&self, request: &RequestDescriptor) -> bool {
        matches!(self.first_match(request).0, Some(rule) if rule.effect == Effect::Allow)
    }

    /// Check one returned resource of a deferred request.
    ///
    /// Bundles are checked entry by entry; search `outcome` entries are
    /// skipped. A resource is permitted if the list allows `action` on it for
    /// at least one of its owning patients, or without an owner.
    #[must_use]
    pub fn permits_resource(&self, action: &RequestAction, resource: &Value) -> bool {
        self.permits_resource_with(&CompartmentChecker::new(), action, resource)
    }

    /// [`permits_resource`](Self::permits_resource) with an explicit checker.
    #[must_use]
    pub fn permits_resource_with(
        &self,
        checker: &CompartmentChecker,
        action: &RequestAction,
        resource: &Value,
    ) -> bool {
        let resource_type = resource["resourceType"].as_str().unwrap_or_default();

        if resource_type == "Bundle" {
            let Some(entries) = resource["entry"].as_array() else {
                return true;
            };
            return entries
                .iter()
                .filter(|entry| entry["search"]["mode"].as_str() != Some("outcome"))
                .filter_map(|entry| entry.get("resource"))
                .all(|entry| self.permits_resource_with(checker, action, entry));
        }

        let mut request = RequestDescriptor::new(action.clone()).on_type(resource_type);
        if let Some(id) = resource["id"].as_str() {
            request = request.on_instance(resource_type, id);
        }

        let owners = checker.owner_patients(resource);
        if owners.is_empty() {
            return self.definitely_allows(&request);
        }
        owners
            .into_iter()
            .any(|owner| self.definitely_allows(&request.clone().owned_by(owner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient_rule(target: RuleTarget, access: AccessKind) -> Rule {
        Rule::allow(target, access, Compartment::Patient("12345".into()))
    }

    fn list(mut rules: Vec<Rule>) -> RuleList {
        rules.push(Rule::allow_metadata());
        rules.push(Rule::deny_all().with_description("deny all"));
        RuleList::from_rules(rules)
    }

    fn read(ty: &str) -> RequestDescriptor {
        RequestDescriptor::new(RequestAction::Read).on_type(ty)
    }

    #[test]
    fn test_first_match_wins() {
        let rules = RuleList::from_rules(vec![
            Rule::deny_all().with_description("closed"),
            Rule::allow_all(),
        ]);
        let decision = rules.evaluate(&read("Patient"));
        assert_eq!(decision.deny_reason().unwrap().rule.as_deref(), Some("closed"));
    }

    #[test]
    fn test_empty_list_denies() {
        let rules = RuleList::from_rules(Vec::new());
        let decision = rules.evaluate(&read("Patient"));
        assert_eq!(decision, AccessDecision::Deny(DenyReason::no_matching_rule()));
    }

    #[test]
    fn test_metadata_rule_only_matches_capabilities() {
        let rules = list(Vec::new());
        let capabilities = RequestDescriptor::new(RequestAction::Capabilities);
        assert!(rules.evaluate(&capabilities).is_allowed());
        assert!(rules.evaluate(&read("Patient")).is_denied());
    }

    #[test]
    fn test_access_kind_must_match() {
        let rules = list(vec![Rule::allow(
            RuleTarget::Type("Patient".into()),
            AccessKind::Write,
            Compartment::Unrestricted,
        )]);
        let write = RequestDescriptor::new(RequestAction::Write).on_instance("Patient", "2345");
        assert!(rules.evaluate(&write).is_allowed());
        assert!(rules.evaluate(&read("Patient")).is_denied());
    }

    #[test]
    fn test_compartment_owner_match_and_mismatch() {
        let rules = list(vec![patient_rule(RuleTarget::Any, AccessKind::Read)]);

        let own = RequestDescriptor::new(RequestAction::Read).on_instance("Patient", "12345");
        assert_eq!(rules.evaluate(&own), AccessDecision::Deferred);

        let other = RequestDescriptor::new(RequestAction::Read).on_instance("Patient", "2345");
        assert!(rules.evaluate(&other).is_denied());
    }

    #[test]
    fn test_pinned_compartment_search_is_deferred() {
        let rules = list(vec![patient_rule(RuleTarget::Any, AccessKind::Read)]);
        let search = read("Observation").owned_by("12345");
        assert_eq!(rules.evaluate(&search), AccessDecision::Deferred);

        // An included resource of another patient is rejected on the way out.
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": [
                {"resource": {"resourceType": "Observation", "id": "o1",
                    "subject": {"reference": "Patient/12345"}},
                 "search": {"mode": "match"}},
                {"resource": {"resourceType": "Observation", "id": "o2",
                    "subject": {"reference": "Patient/2345"}},
                 "search": {"mode": "include"}}
            ]
        });
        assert!(!rules.permits_resource(&RequestAction::Read, &bundle));
    }

    #[test]
    fn test_unrestricted_read_is_allowed_outright() {
        let rules = list(vec![Rule::allow(
            RuleTarget::Type("Observation".into()),
            AccessKind::Read,
            Compartment::Unrestricted,
        )]);
        assert!(rules.evaluate(&read("Observation")).is_allowed());
    }

    #[test]
    fn test_unknown_owner_read_is_deferred() {
        let rules = list(vec![patient_rule(RuleTarget::Any, AccessKind::Read)]);
        assert_eq!(rules.evaluate(&read("Patient")), AccessDecision::Deferred);
    }

    #[test]
    fn test_unknown_owner_write_is_denied() {
        let rules = list(vec![patient_rule(RuleTarget::Any, AccessKind::Write)]);
        let write = RequestDescriptor::new(RequestAction::Write).on_type("Observation");
        assert!(rules.evaluate(&write).is_denied());

        let write = write.owned_by("12345");
        assert!(rules.evaluate(&write).is_allowed());
    }

    #[test]
    fn test_definite_allow_after_pending_allows() {
        let rules = list(vec![
            patient_rule(RuleTarget::Any, AccessKind::Read),
            Rule::allow(
                RuleTarget::Type("Patient".into()),
                AccessKind::Read,
                Compartment::Unrestricted,
            ),
        ]);
        assert!(rules.evaluate(&read("Patient")).is_allowed());
    }

    #[test]
    fn test_compartment_operation_only_on_patient_instance() {
        let rules = list(vec![patient_rule(
            RuleTarget::Type("Patient".into()),
            AccessKind::OperationAny,
        )]);
        let op = RequestAction::Operation {
            name: "$everything".into(),
        };

        let own = RequestDescriptor::new(op.clone()).on_instance("Patient", "12345");
        assert!(rules.evaluate(&own).is_allowed());

        let other = RequestDescriptor::new(op.clone()).on_instance("Patient", "2345");
        assert!(rules.evaluate(&other).is_denied());

        let type_level = RequestDescriptor::new(op).on_type("Patient");
        assert!(rules.evaluate(&type_level).is_denied());
    }

    #[test]
    fn test_typed_rule_never_matches_server_level() {
        let rules = list(vec![Rule::allow(
            RuleTarget::Type("Patient".into()),
            AccessKind::OperationAny,
            Compartment::Unrestricted,
        )]);
        let server = RequestDescriptor::new(RequestAction::Operation {
            name: "$export".into(),
        });
        assert!(rules.evaluate(&server).is_denied());
    }

    #[test]
    fn test_permits_resource_in_compartment() {
        let rules = list(vec![patient_rule(RuleTarget::Any, AccessKind::Read)]);

        let own = json!({"resourceType": "Patient", "id": "12345"});
        let other = json!({"resourceType": "Patient", "id": "2345"});
        let medication = json!({"resourceType": "Medication", "id": "m1"});

        assert!(rules.permits_resource(&RequestAction::Read, &own));
        assert!(!rules.permits_resource(&RequestAction::Read, &other));
        assert!(!rules.permits_resource(&RequestAction::Read, &medication));
    }

    #[test]
    fn test_permits_bundle_checks_every_entry() {
        let rules = list(vec![patient_rule(RuleTarget::Any, AccessKind::Read)]);

        let mixed = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "12345"}},
                {"resource": {"resourceType": "Patient", "id": "2345"}}
            ]
        });
        assert!(!rules.permits_resource(&RequestAction::Read, &mixed));

        let own = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": [
                {"resource": {
                    "resourceType": "Observation",
                    "id": "o1",
                    "subject": {"reference": "Patient/12345"}
                }},
                {
                    "resource": {"resourceType": "OperationOutcome"},
                    "search": {"mode": "outcome"}
                }
            ]
        });
        assert!(rules.permits_resource(&RequestAction::Read, &own));

        let empty = json!({"resourceType": "Bundle", "type": "searchset", "total": 0});
        assert!(rules.permits_resource(&RequestAction::Read, &empty));
    }

    #[test]
    fn test_deny_reason_converts_to_forbidden() {
        let rule = Rule::deny_all().with_description("DENY ALL");
        let err = AuthError::from(DenyReason::denied_by_rule(&rule));
        assert_eq!(err, AuthError::forbidden("Access denied by rule (DENY ALL)"));

        let err = AuthError::from(DenyReason::no_matching_rule());
        assert!(matches!(err, AuthError::Forbidden { .. }));
    }
}
