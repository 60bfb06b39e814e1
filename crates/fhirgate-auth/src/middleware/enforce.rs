//! Scope enforcement middleware.
//!
//! Wire it with [`axum::middleware::from_fn_with_state`]:
//!
//! ```ignore
//! let enforcer = ScopeEnforcer::from_config(config)?;
//! let app = Router::new()
//!     .route("/fhir/{*path}", any(fhir_handler))
//!     .layer(from_fn_with_state(enforcer, enforce_scopes))
//!     .layer(token_introspection_layer); // inserts AccessContext
//! ```
//!
//! The token introspection layer in front of it owns authentication. A
//! request without an [`AccessContext`] extension is unauthenticated and
//! passes unrestricted.

use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use uuid::Uuid;

use super::error::{FHIR_JSON, operation_outcome_json};
use crate::AuthResult;
use crate::config::AuthzConfig;
use crate::context::AccessContext;
use crate::error::AuthError;
use crate::policy::{
    AccessDecision, CompartmentChecker, DenyReason, RequestAction, RequestDescriptor, RuleBuilder,
    RuleList, RuleListCache,
};

/// Shared state of the enforcement middleware.
#[derive(Debug, Clone)]
pub struct ScopeEnforcer {
    builder: Arc<RuleBuilder>,
    cache: Option<Arc<RuleListCache>>,
    config: Arc<AuthzConfig>,
    checker: CompartmentChecker,
}

impl ScopeEnforcer {
    /// Create an enforcer around an existing builder.
    ///
    /// A cache is created when `config.cache.enabled` is set.
    #[must_use]
    pub fn new(builder: RuleBuilder, config: AuthzConfig) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(RuleListCache::from_config(&config.cache)));
        let checker = match &config.base_url {
            Some(base_url) => CompartmentChecker::new().with_base_url(base_url.clone()),
            None => CompartmentChecker::new(),
        };
        Self {
            builder: Arc::new(builder),
            cache,
            config: Arc::new(config),
            checker,
        }
    }

    /// Validate `config` and create an enforcer from it.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the configuration is invalid.
    pub fn from_config(config: AuthzConfig) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        let builder = RuleBuilder::from_config(&config)?;
        Ok(Self::new(builder, config))
    }

    /// Share a cache, e.g. with a token revocation hook.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<RuleListCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn cache(&self) -> Option<&Arc<RuleListCache>> {
        self.cache.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    /// The rule list for a caller, served from the cache when possible.
    ///
    /// # Errors
    ///
    /// Propagates rule builder errors.
    pub fn rule_list(&self, ctx: Option<&AccessContext>) -> AuthResult<Arc<RuleList>> {
        match (ctx, &self.cache) {
            (Some(ctx), Some(cache)) => {
                cache.get_or_build(ctx, || self.builder.build_rule_list(Some(ctx)))
            }
            _ => self.builder.build_rule_list(ctx).map(Arc::new),
        }
    }

    /// Path relative to the FHIR base, or `None` outside of it.
    #[must_use]
    pub fn fhir_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        let base = self.config.base_path.trim_end_matches('/');
        if base.is_empty() {
            return Some(path);
        }
        path.strip_prefix(base)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// Enforce scope-derived rules on one request.
pub async fn enforce_scopes(
    State(enforcer): State<ScopeEnforcer>,
    req: Request,
    next: Next,
) -> Response {
    if !enforcer.config.enabled {
        return next.run(req).await;
    }

    let Some(path) = enforcer.fhir_path(req.uri().path()).map(str::to_string) else {
        return next.run(req).await;
    };

    let ctx = req.extensions().get::<AccessContext>().cloned();
    let rules = match enforcer.rule_list(ctx.as_ref()) {
        Ok(rules) => rules,
        Err(e) => return e.into_response(),
    };
    if rules.is_allow_all() {
        return next.run(req).await;
    }

    let mut descriptor = RequestDescriptor::from_http_with(
        &enforcer.checker,
        req.method(),
        &path,
        req.uri().query(),
        req.headers(),
    );

    let req = if descriptor.action.carries_resource() && descriptor.owner_patient_id.is_none() {
        let (parts, body) = req.into_parts();
        let bytes = match to_bytes(body, enforcer.config.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(error = %e, "Request body exceeds buffering limit");
                return payload_too_large(enforcer.config.max_body_bytes);
            }
        };
        if let Ok(resource) = serde_json::from_slice::<Value>(&bytes) {
            descriptor = descriptor.with_body_using(&enforcer.checker, &resource);
        }
        Request::from_parts(parts, Body::from(bytes))
    } else {
        req
    };

    match rules.evaluate(&descriptor) {
        AccessDecision::Allow => next.run(req).await,
        AccessDecision::Deny(reason) => {
            tracing::info!(
                request = %descriptor,
                user = ctx.as_ref().and_then(|c| c.user_id.as_deref()).unwrap_or("-"),
                code = %reason.code,
                "Access denied"
            );
            AuthError::from(reason).into_response()
        }
        AccessDecision::Deferred => {
            tracing::debug!(request = %descriptor, "Filtering response by compartment");
            let response = next.run(req).await;
            filter_response(&enforcer, &rules, &descriptor.action, response).await
        }
    }
}

/// Reject a successful response that exposes resources outside the compartment.
async fn filter_response(
    enforcer: &ScopeEnforcer,
    rules: &RuleList,
    action: &RequestAction,
    response: Response,
) -> Response {
    if !response.status().is_success() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, enforcer.config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Response body could not be buffered for filtering");
            return AuthError::forbidden("response could not be checked against the compartment")
                .into_response();
        }
    };

    let Ok(resource) = serde_json::from_slice::<Value>(&bytes) else {
        return AuthError::forbidden("response could not be checked against the compartment")
            .into_response();
    };

    if rules.permits_resource_with(&enforcer.checker, action, &resource) {
        return Response::from_parts(parts, Body::from(bytes));
    }

    let label = match (resource["resourceType"].as_str(), resource["id"].as_str()) {
        (Some(ty), Some(id)) => format!("{ty}/{id}"),
        (Some(ty), None) => ty.to_string(),
        _ => "resource".to_string(),
    };
    AuthError::from(DenyReason::outside_compartment(label)).into_response()
}

fn payload_too_large(limit: usize) -> Response {
    let body = operation_outcome_json(
        &Uuid::new_v4().to_string(),
        "too-costly",
        "invalid_request",
        &format!("Request body exceeds {limit} bytes"),
    );
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
    (StatusCode::PAYLOAD_TOO_LARGE, headers, axum::Json(body)).into_response()
}
