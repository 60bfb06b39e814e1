//! Classification of FHIR RESTful requests.
//!
//! The evaluator never sees HTTP. It sees a [`RequestDescriptor`]: the action,
//! the resource type and instance addressed, and the patient whose compartment
//! the request touches when that can be told from the request alone.

use std::fmt;

use axum::http::{HeaderMap, Method};
use serde_json::Value;
use url::form_urlencoded;

use super::compartment::{CompartmentChecker, PATIENT};
use crate::smart::AccessKind;

/// Header that turns a create into a conditional create.
pub const IF_NONE_EXIST: &str = "if-none-exist";

// =============================================================================
// Request Action
// =============================================================================

/// What a request does, in access-kind terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestAction {
    /// read, vread, history and search.
    Read,
    /// create, update and patch.
    Write,
    Delete,
    CreateConditional,
    UpdateConditional,
    DeleteConditional,
    /// A named `$operation` at server, type or instance level.
    Operation {
        /// Operation name including the leading `$`.
        name: String,
    },
    /// The capability statement (`GET /metadata`).
    Capabilities,
}

impl RequestAction {
    /// The access kind a rule must grant for this action.
    #[must_use]
    pub fn access_kind(&self) -> Option<AccessKind> {
        match self {
            Self::Read => Some(AccessKind::Read),
            Self::Write => Some(AccessKind::Write),
            Self::Delete => Some(AccessKind::Delete),
            Self::CreateConditional => Some(AccessKind::CreateConditional),
            Self::UpdateConditional => Some(AccessKind::UpdateConditional),
            Self::DeleteConditional => Some(AccessKind::DeleteConditional),
            Self::Operation { .. } => Some(AccessKind::OperationAny),
            Self::Capabilities => None,
        }
    }

    /// Returns `true` for actions that carry a resource body.
    #[must_use]
    pub fn carries_resource(&self) -> bool {
        matches!(
            self,
            Self::Write | Self::CreateConditional | Self::UpdateConditional
        )
    }

    fn operation(name: &str) -> Self {
        Self::Operation {
            name: name.to_string(),
        }
    }
}

impl fmt::Display for RequestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation { name } => f.write_str(name),
            Self::Capabilities => f.write_str("capabilities"),
            other => match other.access_kind() {
                Some(kind) => write!(f, "{kind}"),
                None => Ok(()),
            },
        }
    }
}

// =============================================================================
// Request Descriptor
// =============================================================================

/// A concrete request, as the rule evaluator sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub action: RequestAction,
    /// Resource type addressed; absent at server level.
    pub resource_type: Option<String>,
    /// Instance id addressed; absent at type and server level.
    pub instance_id: Option<String>,
    /// Patient whose compartment the request touches, when known up front.
    pub owner_patient_id: Option<String>,
}

impl RequestDescriptor {
    /// A server-level request.
    #[must_use]
    pub fn new(action: RequestAction) -> Self {
        Self {
            action,
            resource_type: None,
            instance_id: None,
            owner_patient_id: None,
        }
    }

    #[must_use]
    pub fn on_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Address one instance. A `Patient` instance owns its own compartment.
    #[must_use]
    pub fn on_instance(mut self, resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        let id = id.into();
        if resource_type == PATIENT && self.owner_patient_id.is_none() {
            self.owner_patient_id = Some(id.clone());
        }
        self.resource_type = Some(resource_type);
        self.instance_id = Some(id);
        self
    }

    #[must_use]
    pub fn owned_by(mut self, patient_id: impl Into<String>) -> Self {
        self.owner_patient_id = Some(patient_id.into());
        self
    }

    /// Classify a FHIR RESTful request, accepting relative references only.
    ///
    /// `path` is relative to the FHIR base; `query` excludes the `?`.
    #[must_use]
    pub fn from_http(
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> Self {
        Self::from_http_with(&CompartmentChecker::new(), method, path, query, headers)
    }

    /// Classify a FHIR RESTful request, resolving search references with
    /// `checker`.
    #[must_use]
    pub fn from_http_with(
        checker: &CompartmentChecker,
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let query = query.filter(|q| !q.is_empty());
        let method = method.as_str();
        let is_read = matches!(method, "GET" | "HEAD");

        let mut descriptor = match segments.as_slice() {
            [] if is_read => Self::new(RequestAction::Read),
            [] => Self::new(generic_action(method)),
            ["metadata"] if is_read => Self::new(RequestAction::Capabilities),
            [op] if is_operation(op) => Self::new(RequestAction::operation(op)),
            ["_history"] if is_read => Self::new(RequestAction::Read),
            ["_search"] => Self::new(RequestAction::Read),
            [ty] => Self::new(type_level_action(method, headers)).on_type(*ty),
            [ty, op] if is_operation(op) => Self::new(RequestAction::operation(op)).on_type(*ty),
            [ty, "_history"] if is_read => Self::new(RequestAction::Read).on_type(*ty),
            [ty, "_search"] => Self::new(RequestAction::Read).on_type(*ty),
            [ty, id] => Self::new(generic_action(method)).on_instance(*ty, *id),
            [ty, id, op] if is_operation(op) => {
                Self::new(RequestAction::operation(op)).on_instance(*ty, *id)
            }
            [ty, id, "_history", ..] if is_read => {
                Self::new(RequestAction::Read).on_instance(*ty, *id)
            }
            [compartment, id, ty] if is_read => compartment_search(compartment, id, ty),
            [compartment, id, ty, "_search"] if is_read || method == "POST" => {
                compartment_search(compartment, id, ty)
            }
            [ty, ..] => Self::new(generic_action(method)).on_type(*ty),
        };

        if descriptor.action == RequestAction::Read
            && descriptor.instance_id.is_none()
            && descriptor.owner_patient_id.is_none()
            && let (Some(resource_type), Some(query)) = (descriptor.resource_type.as_deref(), query)
        {
            descriptor.owner_patient_id = owner_from_query(checker, resource_type, query);
        }
        descriptor
    }

    /// Resolve the owner of a create or update from its payload.
    #[must_use]
    pub fn with_body(self, body: &Value) -> Self {
        self.with_body_using(&CompartmentChecker::new(), body)
    }

    /// Like [`with_body`](Self::with_body), resolving references with `checker`.
    #[must_use]
    pub fn with_body_using(mut self, checker: &CompartmentChecker, body: &Value) -> Self {
        if self.owner_patient_id.is_none() && self.action.carries_resource() {
            self.owner_patient_id = checker.owner_patients(body).into_iter().next();
        }
        self
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action)?;
        match (&self.resource_type, &self.instance_id) {
            (Some(ty), Some(id)) => write!(f, " {ty}/{id}"),
            (Some(ty), None) => write!(f, " {ty}"),
            _ => Ok(()),
        }
    }
}

/// A search inside a compartment: `GET /{Compartment}/{id}/{type}`.
fn compartment_search(compartment: &str, id: &str, resource_type: &str) -> RequestDescriptor {
    let descriptor = RequestDescriptor::new(RequestAction::Read).on_type(resource_type);
    if compartment == PATIENT {
        descriptor.owned_by(id)
    } else {
        descriptor
    }
}

fn is_operation(segment: &str) -> bool {
    segment.len() > 1 && segment.starts_with('$')
}

fn generic_action(method: &str) -> RequestAction {
    match method {
        "GET" | "HEAD" => RequestAction::Read,
        "DELETE" => RequestAction::Delete,
        _ => RequestAction::Write,
    }
}

fn type_level_action(method: &str, headers: &HeaderMap) -> RequestAction {
    match method {
        "GET" | "HEAD" => RequestAction::Read,
        "POST" if headers.contains_key(IF_NONE_EXIST) => RequestAction::CreateConditional,
        "PUT" | "PATCH" => RequestAction::UpdateConditional,
        "DELETE" => RequestAction::DeleteConditional,
        _ => RequestAction::Write,
    }
}

/// Find a search parameter pinning the results to one patient.
///
/// Accepted: compartment parameters of the type referencing `Patient/{id}`,
/// a bare id for `patient` on types in the patient compartment, a bare id for
/// a compartment parameter with the `:Patient` modifier, and `_id` on
/// `Patient` searches. Types outside the compartment are never pinned.
/// Comma-separated values are alternatives and pin nothing.
fn owner_from_query(
    checker: &CompartmentChecker,
    resource_type: &str,
    query: &str,
) -> Option<String> {
    if !checker.includes_resource_type(resource_type) {
        return None;
    }
    let compartment_params = checker.search_params(resource_type);

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let (name, modifier) = match key.split_once(':') {
            Some((name, modifier)) => (name, Some(modifier)),
            None => (key.as_ref(), None),
        };

        let is_patient_param = name == "patient" && resource_type != PATIENT;
        if !is_patient_param && !compartment_params.contains(&name) {
            continue;
        }
        if modifier.is_some_and(|m| m != PATIENT) || value.is_empty() || value.contains(',') {
            continue;
        }

        let bare_id_allowed = name == "_id" || is_patient_param || modifier == Some(PATIENT);
        let owner = if bare_id_allowed && !value.contains('/') {
            Some(value.to_string())
        } else {
            checker.patient_id_of(&value)
        };
        if owner.is_some() {
            return owner;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn classify(method: Method, path: &str, query: Option<&str>) -> RequestDescriptor {
        RequestDescriptor::from_http(&method, path, query, &HeaderMap::new())
    }

    #[test]
    fn test_capabilities() {
        let d = classify(Method::GET, "/metadata", None);
        assert_eq!(d.action, RequestAction::Capabilities);
        assert_eq!(d.resource_type, None);
    }

    #[test]
    fn test_instance_read_of_patient_owns_itself() {
        let d = classify(Method::GET, "/Patient/12345", None);
        assert_eq!(d.action, RequestAction::Read);
        assert_eq!(d.resource_type.as_deref(), Some("Patient"));
        assert_eq!(d.instance_id.as_deref(), Some("12345"));
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));
    }

    #[test]
    fn test_instance_read_of_other_type_has_unknown_owner() {
        let d = classify(Method::GET, "/Observation/o1", None);
        assert_eq!(d.action, RequestAction::Read);
        assert_eq!(d.owner_patient_id, None);
    }

    #[test]
    fn test_vread_and_history() {
        let d = classify(Method::GET, "/Patient/1/_history/2", None);
        assert_eq!(d.action, RequestAction::Read);
        assert_eq!(d.instance_id.as_deref(), Some("1"));

        let d = classify(Method::GET, "/Observation/_history", None);
        assert_eq!(d.action, RequestAction::Read);
        assert_eq!(d.instance_id, None);

        let d = classify(Method::GET, "/_history", None);
        assert_eq!(d.action, RequestAction::Read);
        assert_eq!(d.resource_type, None);
    }

    #[test]
    fn test_search_owner_from_reference_param() {
        let d = classify(Method::GET, "/Observation", Some("patient=Patient/12345"));
        assert_eq!(d.action, RequestAction::Read);
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));

        let d = classify(Method::GET, "/Observation", Some("subject=Patient%2F12345&code=x"));
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));
    }

    #[test]
    fn test_search_owner_from_bare_patient_id() {
        let d = classify(Method::GET, "/Condition", Some("patient=12345"));
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));

        let d = classify(Method::GET, "/Observation", Some("subject:Patient=12345"));
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));
    }

    #[test]
    fn test_search_owner_requires_patient_reference() {
        let d = classify(Method::GET, "/Observation", Some("subject=Group/1"));
        assert_eq!(d.owner_patient_id, None);

        let d = classify(Method::GET, "/Observation", Some("subject=12345"));
        assert_eq!(d.owner_patient_id, None);

        let d = classify(Method::GET, "/Observation", Some("patient=1,2"));
        assert_eq!(d.owner_patient_id, None);

        let d = classify(Method::GET, "/Observation", Some("code=1234-5"));
        assert_eq!(d.owner_patient_id, None);
    }

    #[test]
    fn test_patient_param_ignored_outside_compartment() {
        for path in ["/Group", "/Practitioner", "/Medication"] {
            let d = classify(Method::GET, path, Some("patient=12345"));
            assert_eq!(d.owner_patient_id, None, "{path}");

            let d = classify(Method::GET, path, Some("patient=Patient/12345"));
            assert_eq!(d.owner_patient_id, None, "{path}");

            let d = classify(Method::GET, path, Some("subject:Patient=12345"));
            assert_eq!(d.owner_patient_id, None, "{path}");
        }

        // The modifier only pins compartment parameters of the type.
        let d = classify(Method::GET, "/Observation", Some("focus:Patient=12345"));
        assert_eq!(d.owner_patient_id, None);
    }

    #[test]
    fn test_include_params_do_not_change_owner() {
        let d = classify(
            Method::GET,
            "/Observation",
            Some("patient=Patient/12345&_include=Observation:performer"),
        );
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));

        let d = classify(
            Method::GET,
            "/Patient",
            Some("_revinclude=Observation:subject&_id=12345"),
        );
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));
    }

    #[test]
    fn test_absolute_search_reference_needs_base_url() {
        let query = Some("subject=http://localhost/fhir/Patient/12345");
        let d = classify(Method::GET, "/Observation", query);
        assert_eq!(d.owner_patient_id, None);

        let checker = CompartmentChecker::new().with_base_url("http://localhost/fhir");
        let d = RequestDescriptor::from_http_with(
            &checker,
            &Method::GET,
            "/Observation",
            query,
            &HeaderMap::new(),
        );
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));
    }

    #[test]
    fn test_patient_search_by_id_and_identifier() {
        let d = classify(Method::GET, "/Patient", Some("_id=12345"));
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));

        let d = classify(Method::GET, "/Patient", Some("identifier=http://acme|1"));
        assert_eq!(d.action, RequestAction::Read);
        assert_eq!(d.owner_patient_id, None);
    }

    #[test]
    fn test_compartment_search() {
        let d = classify(Method::GET, "/Patient/12345/Observation", None);
        assert_eq!(d.action, RequestAction::Read);
        assert_eq!(d.resource_type.as_deref(), Some("Observation"));
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));

        let d = classify(Method::GET, "/Encounter/e1/Observation", None);
        assert_eq!(d.owner_patient_id, None);

        let d = classify(Method::POST, "/Patient/12345/Observation/_search", None);
        assert_eq!(d.action, RequestAction::Read);
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));
    }

    #[test]
    fn test_post_to_compartment_path_is_not_a_search() {
        let d = classify(Method::POST, "/Patient/12345/Observation", None);
        assert_eq!(d.action, RequestAction::Write);
        assert_eq!(d.owner_patient_id, None);

        let d = classify(Method::DELETE, "/Patient/12345/Observation", None);
        assert_eq!(d.action, RequestAction::Delete);
    }

    #[test]
    fn test_post_search_is_read() {
        let d = classify(Method::POST, "/Observation/_search", None);
        assert_eq!(d.action, RequestAction::Read);
        assert_eq!(d.resource_type.as_deref(), Some("Observation"));
    }

    #[test]
    fn test_writes() {
        assert_eq!(classify(Method::POST, "/Observation", None).action, RequestAction::Write);
        assert_eq!(classify(Method::PUT, "/Patient/2345", None).action, RequestAction::Write);
        assert_eq!(classify(Method::PATCH, "/Patient/2345", None).action, RequestAction::Write);
        assert_eq!(
            classify(Method::DELETE, "/Patient/2345", None).action,
            RequestAction::Delete
        );
    }

    #[test]
    fn test_conditional_writes() {
        let mut headers = HeaderMap::new();
        headers.insert("if-none-exist", HeaderValue::from_static("identifier=1"));
        let d = RequestDescriptor::from_http(&Method::POST, "/Patient", None, &headers);
        assert_eq!(d.action, RequestAction::CreateConditional);

        let d = classify(Method::PUT, "/Patient", Some("identifier=1"));
        assert_eq!(d.action, RequestAction::UpdateConditional);

        let d = classify(Method::DELETE, "/Observation", Some("patient=Patient/1"));
        assert_eq!(d.action, RequestAction::DeleteConditional);
        assert_eq!(d.owner_patient_id, None);
    }

    #[test]
    fn test_operations_at_each_level() {
        let d = classify(Method::POST, "/$export", None);
        assert!(matches!(d.action, RequestAction::Operation { ref name } if name == "$export"));
        assert_eq!(d.resource_type, None);

        let d = classify(Method::GET, "/Patient/$match", None);
        assert!(matches!(d.action, RequestAction::Operation { .. }));
        assert_eq!(d.resource_type.as_deref(), Some("Patient"));
        assert_eq!(d.instance_id, None);

        let d = classify(Method::GET, "/Patient/12345/$everything", None);
        assert!(matches!(d.action, RequestAction::Operation { .. }));
        assert_eq!(d.instance_id.as_deref(), Some("12345"));
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));
    }

    #[test]
    fn test_with_body_resolves_owner_for_writes_only() {
        let body = json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/12345"}
        });

        let d = classify(Method::POST, "/Observation", None).with_body(&body);
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));

        let d = classify(Method::DELETE, "/Observation/o1", None).with_body(&body);
        assert_eq!(d.owner_patient_id, None);
    }

    #[test]
    fn test_with_body_using_base_url() {
        let body = json!({
            "resourceType": "Observation",
            "subject": {"reference": "http://localhost/fhir/Patient/12345"}
        });

        let d = classify(Method::POST, "/Observation", None).with_body(&body);
        assert_eq!(d.owner_patient_id, None);

        let checker = CompartmentChecker::new().with_base_url("http://localhost/fhir");
        let d = classify(Method::POST, "/Observation", None).with_body_using(&checker, &body);
        assert_eq!(d.owner_patient_id.as_deref(), Some("12345"));
    }

    #[test]
    fn test_with_body_keeps_path_owner() {
        let body = json!({"resourceType": "Patient", "id": "999"});
        let d = classify(Method::PUT, "/Patient/2345", None).with_body(&body);
        assert_eq!(d.owner_patient_id.as_deref(), Some("2345"));
    }

    #[test]
    fn test_descriptor_display() {
        assert_eq!(classify(Method::GET, "/Patient/1", None).to_string(), "read Patient/1");
        assert_eq!(classify(Method::GET, "/metadata", None).to_string(), "capabilities");
    }
}
