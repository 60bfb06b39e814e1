//! # fhirgate-core
//!
//! FHIR vocabulary shared by the FhirGate authorization layer: the catalog of
//! resource types a deployment serves and FHIR reference parsing.

pub mod error;
pub mod fhir;
pub mod fhir_reference;

pub use error::{CoreError, Result};
pub use fhir::{R4_RESOURCE_TYPES, ResourceTypeCatalog, StaticCatalog, is_valid_resource_type_name};
pub use fhir_reference::{FhirReference, UnresolvableReference, parse_reference};
