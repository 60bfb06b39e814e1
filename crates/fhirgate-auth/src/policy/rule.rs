//! Access rules and ordered rule lists.
//!
//! A [`RuleList`] is the product of the rule builder: an ordered,
//! first-match-wins sequence of allow/deny entries that ends in a catch-all.
//! Rules are plain values; evaluation lives in [`super::evaluator`].

use std::fmt;

use serde::Serialize;

use super::compartment::Compartment;
use crate::smart::AccessKind;

// =============================================================================
// Rule
// =============================================================================

/// Effect of a matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// Resource types a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleTarget {
    /// Every resource type.
    Any,
    /// One concrete resource type.
    Type(String),
}

impl RuleTarget {
    /// Returns `true` if the target covers `resource_type`.
    #[must_use]
    pub fn covers(&self, resource_type: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Type(t) => t == resource_type,
        }
    }
}

impl fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Type(t) => f.write_str(t),
        }
    }
}

/// What a rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RuleMatcher {
    /// Requests of one access kind on a target, optionally within a compartment.
    Access {
        target: RuleTarget,
        access: AccessKind,
        compartment: Compartment,
    },
    /// The capability statement endpoint.
    Metadata,
    /// Every request.
    Everything,
}

/// One evaluable access-control entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Rule {
    pub effect: Effect,
    pub matcher: RuleMatcher,
    /// Human-readable label, reported when the rule denies a request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Rule {
    /// Allow one access kind on a target within a compartment.
    #[must_use]
    pub fn allow(target: RuleTarget, access: AccessKind, compartment: Compartment) -> Self {
        Self {
            effect: Effect::Allow,
            matcher: RuleMatcher::Access {
                target,
                access,
                compartment,
            },
            description: None,
        }
    }

    /// Allow the capability statement.
    #[must_use]
    pub fn allow_metadata() -> Self {
        Self {
            effect: Effect::Allow,
            matcher: RuleMatcher::Metadata,
            description: None,
        }
    }

    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            effect: Effect::Allow,
            matcher: RuleMatcher::Everything,
            description: None,
        }
    }

    #[must_use]
    pub fn deny_all() -> Self {
        Self {
            effect: Effect::Deny,
            matcher: RuleMatcher::Everything,
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns `true` if the rule is not limited to one resource type.
    #[must_use]
    pub fn applies_to_all_resources(&self) -> bool {
        match &self.matcher {
            RuleMatcher::Access { target, .. } => *target == RuleTarget::Any,
            RuleMatcher::Everything => true,
            RuleMatcher::Metadata => false,
        }
    }

    /// The access kind of an access rule.
    #[must_use]
    pub fn access_kind(&self) -> Option<AccessKind> {
        match &self.matcher {
            RuleMatcher::Access { access, .. } => Some(*access),
            _ => None,
        }
    }

    /// The compartment constraint of an access rule.
    #[must_use]
    pub fn compartment(&self) -> Option<&Compartment> {
        match &self.matcher {
            RuleMatcher::Access { compartment, .. } => Some(compartment),
            _ => None,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let effect = match self.effect {
            Effect::Allow => "ALLOW",
            Effect::Deny => "DENY",
        };
        match &self.matcher {
            RuleMatcher::Access {
                target,
                access,
                compartment,
            } => write!(f, "{effect} {access} {target} in {compartment}"),
            RuleMatcher::Metadata => write!(f, "{effect} metadata"),
            RuleMatcher::Everything => write!(f, "{effect} all"),
        }
    }
}

// =============================================================================
// Rule List
// =============================================================================

/// Ordered, first-match-wins rule sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleList {
    rules: Vec<Rule>,
}

impl RuleList {
    /// A list holding a single Allow-All entry.
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            rules: vec![Rule::allow_all()],
        }
    }

    pub(crate) fn from_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Returns `true` if the list places no restriction at all.
    #[must_use]
    pub fn is_allow_all(&self) -> bool {
        matches!(
            self.rules.as_slice(),
            [Rule {
                effect: Effect::Allow,
                matcher: RuleMatcher::Everything,
                ..
            }]
        )
    }

    /// The terminal entry, if any.
    #[must_use]
    pub fn terminal(&self) -> Option<&Rule> {
        self.rules.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleList {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}
