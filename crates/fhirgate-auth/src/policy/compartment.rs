//! Patient compartment constraints and membership.
//!
//! Two concerns live here:
//!
//! - [`resolve_patient_compartment`] turns the launch-context patient id into
//!   the [`Compartment`] constraint attached to patient-scope rules.
//! - [`CompartmentChecker`] decides which patients a concrete resource belongs
//!   to, using the linking fields of the FHIR R4 Patient
//!   CompartmentDefinition.
//!
//! # Usage
//!
//! ```
//! use fhirgate_auth::policy::compartment::CompartmentChecker;
//!
//! let checker = CompartmentChecker::new();
//!
//! let observation = serde_json::json!({
//!     "resourceType": "Observation",
//!     "subject": {"reference": "Patient/123"}
//! });
//!
//! assert!(checker.is_in_compartment("123", &observation));
//! assert_eq!(checker.owner_patients(&observation), vec!["123".to_string()]);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use fhirgate_core::{FhirReference, parse_reference};
use serde::Serialize;
use serde_json::Value;

use crate::AuthResult;
use crate::error::AuthError;

/// The resource type that owns the patient compartment.
pub const PATIENT: &str = "Patient";

// =============================================================================
// Compartment Constraint
// =============================================================================

/// Compartment restriction carried by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Compartment {
    /// No restriction.
    Unrestricted,
    /// Only resources in the compartment of this patient.
    Patient(String),
}

impl Compartment {
    /// The patient id of a patient compartment.
    #[must_use]
    pub fn patient_id(&self) -> Option<&str> {
        match self {
            Self::Unrestricted => None,
            Self::Patient(id) => Some(id),
        }
    }
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrestricted => f.write_str("any compartment"),
            Self::Patient(id) => write!(f, "{PATIENT}/{id}"),
        }
    }
}

/// Resolve the compartment for patient-context grants.
///
/// # Errors
///
/// Returns `AuthError::Security` if the patient id is absent or blank: a
/// patient grant without a patient must never widen into broader access.
pub fn resolve_patient_compartment(patient_id: Option<&str>) -> AuthResult<Compartment> {
    match patient_id.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(Compartment::Patient(id.to_string())),
        _ => Err(AuthError::security(
            "patient-context scope granted without a launch patient",
        )),
    }
}

// =============================================================================
// Compartment Definition
// =============================================================================

/// How a resource type links into the patient compartment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompartmentInclusion {
    /// Search parameter that links to the compartment.
    pub param: &'static str,
    /// Dotted element path holding the reference in resource content.
    pub path: &'static str,
}

const fn inc(param: &'static str, path: &'static str) -> CompartmentInclusion {
    CompartmentInclusion { param, path }
}

/// Patient CompartmentDefinition (R4), restricted to commonly served types.
///
/// Based on: <https://hl7.org/fhir/R4/compartmentdefinition-patient.html>
const PATIENT_COMPARTMENT: &[(&str, &[CompartmentInclusion])] = &[
    ("Account", &[inc("subject", "subject")]),
    ("AdverseEvent", &[inc("subject", "subject")]),
    (
        "AllergyIntolerance",
        &[
            inc("patient", "patient"),
            inc("recorder", "recorder"),
            inc("asserter", "asserter"),
        ],
    ),
    ("Appointment", &[inc("actor", "participant.actor")]),
    ("AppointmentResponse", &[inc("actor", "actor")]),
    ("Basic", &[inc("patient", "subject"), inc("author", "author")]),
    ("BodyStructure", &[inc("patient", "patient")]),
    (
        "CarePlan",
        &[inc("patient", "subject"), inc("performer", "activity.detail.performer")],
    ),
    (
        "CareTeam",
        &[inc("patient", "subject"), inc("participant", "participant.member")],
    ),
    ("ChargeItem", &[inc("subject", "subject")]),
    ("Claim", &[inc("patient", "patient"), inc("payee", "payee.party")]),
    ("ClaimResponse", &[inc("patient", "patient")]),
    ("ClinicalImpression", &[inc("subject", "subject")]),
    (
        "Communication",
        &[
            inc("subject", "subject"),
            inc("sender", "sender"),
            inc("recipient", "recipient"),
        ],
    ),
    (
        "CommunicationRequest",
        &[
            inc("subject", "subject"),
            inc("sender", "sender"),
            inc("recipient", "recipient"),
            inc("requester", "requester"),
        ],
    ),
    (
        "Composition",
        &[inc("subject", "subject"), inc("author", "author")],
    ),
    (
        "Condition",
        &[inc("patient", "subject"), inc("asserter", "asserter")],
    ),
    ("Consent", &[inc("patient", "patient")]),
    (
        "Coverage",
        &[
            inc("policy-holder", "policyHolder"),
            inc("subscriber", "subscriber"),
            inc("beneficiary", "beneficiary"),
            inc("payor", "payor"),
        ],
    ),
    ("CoverageEligibilityRequest", &[inc("patient", "patient")]),
    ("CoverageEligibilityResponse", &[inc("patient", "patient")]),
    ("DetectedIssue", &[inc("patient", "patient")]),
    (
        "DeviceRequest",
        &[inc("subject", "subject"), inc("performer", "performer")],
    ),
    ("DeviceUseStatement", &[inc("subject", "subject")]),
    ("DiagnosticReport", &[inc("subject", "subject")]),
    (
        "DocumentReference",
        &[inc("subject", "subject"), inc("author", "author")],
    ),
    ("Encounter", &[inc("patient", "subject")]),
    ("EnrollmentRequest", &[inc("subject", "candidate")]),
    ("EpisodeOfCare", &[inc("patient", "patient")]),
    ("ExplanationOfBenefit", &[inc("patient", "patient")]),
    ("FamilyMemberHistory", &[inc("patient", "patient")]),
    ("Flag", &[inc("patient", "subject")]),
    ("Goal", &[inc("patient", "subject")]),
    ("ImagingStudy", &[inc("patient", "subject")]),
    ("Immunization", &[inc("patient", "patient")]),
    ("ImmunizationEvaluation", &[inc("patient", "patient")]),
    ("ImmunizationRecommendation", &[inc("patient", "patient")]),
    ("List", &[inc("subject", "subject"), inc("source", "source")]),
    ("Media", &[inc("subject", "subject")]),
    (
        "MedicationAdministration",
        &[
            inc("patient", "subject"),
            inc("performer", "performer.actor"),
        ],
    ),
    (
        "MedicationDispense",
        &[inc("subject", "subject"), inc("receiver", "receiver")],
    ),
    ("MedicationRequest", &[inc("subject", "subject")]),
    ("MedicationStatement", &[inc("subject", "subject")]),
    ("NutritionOrder", &[inc("patient", "patient")]),
    (
        "Observation",
        &[inc("subject", "subject"), inc("performer", "performer")],
    ),
    (
        "Procedure",
        &[inc("patient", "subject"), inc("performer", "performer.actor")],
    ),
    (
        "QuestionnaireResponse",
        &[inc("subject", "subject"), inc("author", "author")],
    ),
    ("RelatedPerson", &[inc("patient", "patient")]),
    ("RiskAssessment", &[inc("subject", "subject")]),
    ("Schedule", &[inc("actor", "actor")]),
    (
        "ServiceRequest",
        &[inc("subject", "subject"), inc("performer", "performer")],
    ),
    ("Specimen", &[inc("subject", "subject")]),
    ("SupplyRequest", &[inc("subject", "deliverTo")]),
    ("VisionPrescription", &[inc("patient", "patient")]),
];

static DEFINITION: LazyLock<HashMap<&'static str, &'static [CompartmentInclusion]>> =
    LazyLock::new(|| PATIENT_COMPARTMENT.iter().copied().collect());

// =============================================================================
// Compartment Checker
// =============================================================================

/// Patient compartment membership checks on resource content.
#[derive(Debug, Clone, Default)]
pub struct CompartmentChecker {
    base_url: Option<String>,
}

impl CompartmentChecker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept absolute references that point under `base_url`.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Returns `true` if `resource_type` can belong to a patient compartment.
    #[must_use]
    pub fn includes_resource_type(&self, resource_type: &str) -> bool {
        resource_type == PATIENT || DEFINITION.contains_key(resource_type)
    }

    /// Compartment search parameters of a resource type.
    ///
    /// `Patient` itself is addressed by `_id`.
    #[must_use]
    pub fn search_params(&self, resource_type: &str) -> Vec<&'static str> {
        if resource_type == PATIENT {
            return vec!["_id"];
        }
        DEFINITION
            .get(resource_type)
            .map(|inclusions| inclusions.iter().map(|i| i.param).collect())
            .unwrap_or_default()
    }

    /// Ids of the patients whose compartment contains `resource`.
    ///
    /// A `Patient` belongs to its own compartment. Order follows the
    /// compartment definition; duplicates are removed.
    #[must_use]
    pub fn owner_patients(&self, resource: &Value) -> Vec<String> {
        let resource_type = resource["resourceType"].as_str().unwrap_or("");

        if resource_type == PATIENT {
            return resource["id"]
                .as_str()
                .filter(|id| !id.is_empty())
                .map(|id| vec![id.to_string()])
                .unwrap_or_default();
        }

        let Some(inclusions) = DEFINITION.get(resource_type) else {
            return Vec::new();
        };

        let mut owners: Vec<String> = Vec::new();
        for inclusion in *inclusions {
            let mut refs = Vec::new();
            collect_at_path(resource, inclusion.path, &mut refs);
            for reference in refs {
                if let Some(id) = self.patient_id_of(reference)
                    && !owners.contains(&id)
                {
                    owners.push(id);
                }
            }
        }
        owners
    }

    /// Check if `resource` is in the compartment of `patient_id`.
    #[must_use]
    pub fn is_in_compartment(&self, patient_id: &str, resource: &Value) -> bool {
        self.owner_patients(resource).iter().any(|p| p == patient_id)
    }

    /// The patient id referenced by `reference`, if it points at a Patient.
    #[must_use]
    pub fn patient_id_of(&self, reference: &str) -> Option<String> {
        parse_reference(reference, self.base_url.as_deref())
            .ok()
            .filter(|r: &FhirReference| r.is_type(PATIENT))
            .map(|r| r.id)
    }
}

/// Walk a dotted element path, collecting reference strings.
///
/// Arrays are flattened at every step, so `participant.actor` visits the
/// actor of every participant.
fn collect_at_path<'a>(value: &'a Value, path: &str, refs: &mut Vec<&'a str>) {
    if let Some(items) = value.as_array() {
        for item in items {
            collect_at_path(item, path, refs);
        }
        return;
    }

    match path.split_once('.') {
        Some((head, rest)) => {
            if let Some(child) = value.get(head) {
                collect_at_path(child, rest, refs);
            }
        }
        None => {
            if let Some(child) = value.get(path) {
                collect_references(child, refs);
            }
        }
    }
}

/// Collect reference strings from a Reference value or an array of them.
fn collect_references<'a>(value: &'a Value, refs: &mut Vec<&'a str>) {
    if let Some(items) = value.as_array() {
        for item in items {
            collect_references(item, refs);
        }
        return;
    }

    if let Some(s) = value.get("reference").and_then(Value::as_str) {
        refs.push(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_patient_compartment() {
        assert_eq!(
            resolve_patient_compartment(Some("123")).unwrap(),
            Compartment::Patient("123".to_string())
        );
    }

    #[test]
    fn test_resolve_without_patient_is_security_error() {
        for missing in [None, Some(""), Some("   ")] {
            let err = resolve_patient_compartment(missing).unwrap_err();
            assert!(matches!(err, AuthError::Security { .. }));
        }
    }

    #[test]
    fn test_patient_self_in_compartment() {
        let checker = CompartmentChecker::new();
        let patient = json!({"resourceType": "Patient", "id": "123"});

        assert!(checker.is_in_compartment("123", &patient));
        assert!(!checker.is_in_compartment("456", &patient));
    }

    #[test]
    fn test_observation_not_in_compartment() {
        let checker = CompartmentChecker::new();
        let observation = json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/789"}
        });

        assert!(!checker.is_in_compartment("123", &observation));
    }

    #[test]
    fn test_resource_not_in_any_compartment() {
        let checker = CompartmentChecker::new();
        let medication = json!({"resourceType": "Medication", "id": "m1"});

        assert!(checker.owner_patients(&medication).is_empty());
        assert!(!checker.includes_resource_type("Medication"));
    }

    #[test]
    fn test_condition_links_through_subject() {
        let checker = CompartmentChecker::new();
        let condition = json!({
            "resourceType": "Condition",
            "subject": {"reference": "Patient/123"},
            "asserter": {"reference": "Practitioner/9"}
        });

        assert_eq!(checker.owner_patients(&condition), vec!["123".to_string()]);
    }

    #[test]
    fn test_nested_array_path() {
        let checker = CompartmentChecker::new();
        let appointment = json!({
            "resourceType": "Appointment",
            "participant": [
                {"actor": {"reference": "Practitioner/1"}},
                {"actor": {"reference": "Patient/123"}},
                {"actor": {"reference": "Patient/456"}}
            ]
        });

        assert_eq!(
            checker.owner_patients(&appointment),
            vec!["123".to_string(), "456".to_string()]
        );
    }

    #[test]
    fn test_array_performer_with_duplicates() {
        let checker = CompartmentChecker::new();
        let observation = json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/123"},
            "performer": [
                {"reference": "Patient/123"},
                {"reference": "Organization/o1"}
            ]
        });

        assert_eq!(checker.owner_patients(&observation), vec!["123".to_string()]);
    }

    #[test]
    fn test_absolute_references_need_base_url() {
        let observation = json!({
            "resourceType": "Observation",
            "subject": {"reference": "http://localhost/fhir/Patient/123"}
        });

        assert!(!CompartmentChecker::new().is_in_compartment("123", &observation));
        assert!(
            CompartmentChecker::new()
                .with_base_url("http://localhost/fhir")
                .is_in_compartment("123", &observation)
        );
    }

    #[test]
    fn test_compartment_search_params() {
        let checker = CompartmentChecker::new();
        assert_eq!(checker.search_params("Observation"), vec!["subject", "performer"]);
        assert_eq!(checker.search_params("Patient"), vec!["_id"]);
        assert!(checker.search_params("Medication").is_empty());
    }

    #[test]
    fn test_compartment_display() {
        assert_eq!(Compartment::Patient("1".into()).to_string(), "Patient/1");
        assert_eq!(Compartment::Patient("1".into()).patient_id(), Some("1"));
        assert_eq!(Compartment::Unrestricted.patient_id(), None);
    }
}
