use crate::{
    fields::{Field, FieldRules},
    labels::LabelRules,
    scope::Scope,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Matches any value of an existing key or field.
pub const WILDCARD: &str = "*";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Operator {
    In,
    NotIn,

    /// Any operator we don't recognize, including a missing one. Expressions using it are inert.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Selects namespaces (or workspaces) by their labels and by their fields.
///
/// Each selector is a disjunction of rule groups, and each rule group is a conjunction of
/// expressions. The label and field selectors are evaluated independently and must both pass. An
/// empty selector places no restriction on its target.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_selector: Vec<LabelRules>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_selector: Vec<FieldRules>,
}

// === impl Operator ===

impl Operator {
    /// Tests an expression's value set against the actual value of its key or field.
    ///
    /// An absent key, an empty value set, or an unknown operator never vetoes the enclosing rule
    /// group.
    pub fn admits(&self, values: &BTreeSet<String>, actual: Option<&str>) -> bool {
        let actual = match actual {
            Some(actual) if !values.is_empty() => actual,
            _ => return true,
        };

        let wildcard = values.contains(WILDCARD);
        match self {
            Self::In => wildcard || values.contains(actual),
            Self::NotIn => !wildcard && !values.contains(actual),
            Self::Unknown => true,
        }
    }
}

// === impl ScopeSelector ===

impl ScopeSelector {
    pub fn matches(&self, scope: &Scope) -> bool {
        let fields = scope.fields();
        any_group(&self.field_selector, |rules| rules.matches(&fields))
            && any_group(&self.label_selector, |rules| rules.matches(&scope.labels))
    }

    /// Describes every expression that can never affect a decision because its operator or field
    /// is not recognized.
    pub fn inert_expressions(&self) -> Vec<String> {
        let mut inert = Vec::new();

        for (g, rules) in self.label_selector.iter().enumerate() {
            for (e, expr) in rules.match_expressions.iter().enumerate() {
                if expr.operator == Operator::Unknown {
                    inert.push(format!(
                        "labelSelector[{g}].matchExpressions[{e}]: unknown operator"
                    ));
                }
            }
        }

        for (g, rules) in self.field_selector.iter().enumerate() {
            for (e, expr) in rules.field_expressions.iter().enumerate() {
                if expr.field == Field::Unknown {
                    inert.push(format!(
                        "fieldSelector[{g}].fieldExpressions[{e}]: unknown field"
                    ));
                }
                if expr.operator == Operator::Unknown {
                    inert.push(format!(
                        "fieldSelector[{g}].fieldExpressions[{e}]: unknown operator"
                    ));
                }
            }
        }

        inert
    }
}

/// Succeeds if there are no groups or if any group is satisfied.
fn any_group<G>(groups: &[G], satisfied: impl FnMut(&G) -> bool) -> bool {
    groups.is_empty() || groups.iter().any(satisfied)
}
