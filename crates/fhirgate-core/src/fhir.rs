//! FHIR resource-type catalog.
//!
//! The authorization engine never models resources structurally; it only needs
//! to know whether a resource-type name is served by the deployment. That
//! question is answered by a [`ResourceTypeCatalog`], injected into the engine
//! so it can be exercised without the full resource model.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::error::CoreError;

/// All resource types defined by FHIR R4 (4.0.1).
pub const R4_RESOURCE_TYPES: &[&str] = &[
    "Account",
    "ActivityDefinition",
    "AdverseEvent",
    "AllergyIntolerance",
    "Appointment",
    "AppointmentResponse",
    "AuditEvent",
    "Basic",
    "Binary",
    "BiologicallyDerivedProduct",
    "BodyStructure",
    "Bundle",
    "CapabilityStatement",
    "CarePlan",
    "CareTeam",
    "CatalogEntry",
    "ChargeItem",
    "ChargeItemDefinition",
    "Claim",
    "ClaimResponse",
    "ClinicalImpression",
    "CodeSystem",
    "Communication",
    "CommunicationRequest",
    "CompartmentDefinition",
    "Composition",
    "ConceptMap",
    "Condition",
    "Consent",
    "Contract",
    "Coverage",
    "CoverageEligibilityRequest",
    "CoverageEligibilityResponse",
    "DetectedIssue",
    "Device",
    "DeviceDefinition",
    "DeviceMetric",
    "DeviceRequest",
    "DeviceUseStatement",
    "DiagnosticReport",
    "DocumentManifest",
    "DocumentReference",
    "EffectEvidenceSynthesis",
    "Encounter",
    "Endpoint",
    "EnrollmentRequest",
    "EnrollmentResponse",
    "EpisodeOfCare",
    "EventDefinition",
    "Evidence",
    "EvidenceVariable",
    "ExampleScenario",
    "ExplanationOfBenefit",
    "FamilyMemberHistory",
    "Flag",
    "Goal",
    "GraphDefinition",
    "Group",
    "GuidanceResponse",
    "HealthcareService",
    "ImagingStudy",
    "Immunization",
    "ImmunizationEvaluation",
    "ImmunizationRecommendation",
    "ImplementationGuide",
    "InsurancePlan",
    "Invoice",
    "Library",
    "Linkage",
    "List",
    "Location",
    "Measure",
    "MeasureReport",
    "Media",
    "Medication",
    "MedicationAdministration",
    "MedicationDispense",
    "MedicationKnowledge",
    "MedicationRequest",
    "MedicationStatement",
    "MedicinalProduct",
    "MedicinalProductAuthorization",
    "MedicinalProductContraindication",
    "MedicinalProductIndication",
    "MedicinalProductIngredient",
    "MedicinalProductInteraction",
    "MedicinalProductManufactured",
    "MedicinalProductPackaged",
    "MedicinalProductPharmaceutical",
    "MedicinalProductUndesirableEffect",
    "MessageDefinition",
    "MessageHeader",
    "MolecularSequence",
    "NamingSystem",
    "NutritionOrder",
    "Observation",
    "ObservationDefinition",
    "OperationDefinition",
    "OperationOutcome",
    "Organization",
    "OrganizationAffiliation",
    "Parameters",
    "Patient",
    "PaymentNotice",
    "PaymentReconciliation",
    "Person",
    "PlanDefinition",
    "Practitioner",
    "PractitionerRole",
    "Procedure",
    "Provenance",
    "Questionnaire",
    "QuestionnaireResponse",
    "RelatedPerson",
    "RequestGroup",
    "ResearchDefinition",
    "ResearchElementDefinition",
    "ResearchStudy",
    "ResearchSubject",
    "RiskAssessment",
    "RiskEvidenceSynthesis",
    "Schedule",
    "SearchParameter",
    "ServiceRequest",
    "Slot",
    "Specimen",
    "SpecimenDefinition",
    "StructureDefinition",
    "StructureMap",
    "Subscription",
    "Substance",
    "SubstanceNucleicAcid",
    "SubstancePolymer",
    "SubstanceProtein",
    "SubstanceReferenceInformation",
    "SubstanceSourceMaterial",
    "SubstanceSpecification",
    "SupplyDelivery",
    "SupplyRequest",
    "Task",
    "TerminologyCapabilities",
    "TestReport",
    "TestScript",
    "ValueSet",
    "VerificationResult",
    "VisionPrescription",
];

static R4_CATALOG: LazyLock<Arc<HashSet<&'static str>>> =
    LazyLock::new(|| Arc::new(R4_RESOURCE_TYPES.iter().copied().collect()));

/// Answers whether a resource-type name is served by this deployment.
///
/// Implementations must be safe for concurrent reads; the engine consults the
/// catalog on every rule-list construction.
pub trait ResourceTypeCatalog: Send + Sync {
    /// Returns `true` if `name` is a supported resource type.
    ///
    /// Lookup is case-sensitive.
    fn contains(&self, name: &str) -> bool;

    /// Number of supported resource types.
    fn len(&self) -> usize;

    /// Returns `true` if the catalog supports no resource type at all.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only catalog backed by a set of static resource-type names.
///
/// Cloning is cheap; the underlying set is shared.
#[derive(Clone)]
pub struct StaticCatalog {
    types: Arc<HashSet<&'static str>>,
}

impl StaticCatalog {
    /// The full FHIR R4 resource-type catalog.
    #[must_use]
    pub fn r4() -> Self {
        Self {
            types: Arc::clone(&R4_CATALOG),
        }
    }

    /// A catalog restricted to the given resource types.
    ///
    /// Every name must be a valid FHIR R4 resource type.
    pub fn restricted<I, S>(names: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut types = HashSet::new();
        for name in names {
            let name = name.as_ref();
            if !is_valid_resource_type_name(name) {
                return Err(CoreError::invalid_resource_type(name));
            }
            let known = R4_CATALOG
                .get(name)
                .ok_or_else(|| CoreError::unknown_resource_type(name))?;
            types.insert(*known);
        }
        Ok(Self {
            types: Arc::new(types),
        })
    }

    /// Iterates the supported resource-type names in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.iter().copied()
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::r4()
    }
}

impl fmt::Debug for StaticCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCatalog")
            .field("len", &self.types.len())
            .finish()
    }
}

impl ResourceTypeCatalog for StaticCatalog {
    fn contains(&self, name: &str) -> bool {
        self.types.contains(name)
    }

    fn len(&self) -> usize {
        self.types.len()
    }
}

/// Validate if a string is a syntactically valid FHIR resource type name
pub fn is_valid_resource_type_name(name: &str) -> bool {
    // FHIR resource type names must start with uppercase letter and contain only letters
    !name.is_empty()
        && name
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false)
        && name.chars().all(|c| c.is_ascii_alphabetic())
}
