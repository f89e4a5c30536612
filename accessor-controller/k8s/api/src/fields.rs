use crate::selector::Operator;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An object field that may be selected on.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Field {
    #[serde(rename = "name", alias = "Name")]
    Name,

    /// The object's phase, e.g. `Active` or `Terminating`.
    #[serde(rename = "status", alias = "Status")]
    Status,

    #[default]
    #[serde(other)]
    Unknown,
}

/// A conjunction of field expressions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldRules {
    #[serde(default)]
    pub field_expressions: Vec<FieldExpression>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct FieldExpression {
    #[serde(default)]
    pub field: Field,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default)]
    pub values: BTreeSet<String>,
}

/// The selectable fields of a namespace or workspace.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fields<'a> {
    pub name: &'a str,
    pub status: Option<&'a str>,
}

// === impl Fields ===

impl<'a> Fields<'a> {
    pub fn get(&self, field: Field) -> Option<&'a str> {
        match field {
            Field::Name => Some(self.name),
            Field::Status => self.status,
            Field::Unknown => None,
        }
    }
}

// === impl FieldRules ===

impl FieldRules {
    pub fn matches(&self, fields: &Fields<'_>) -> bool {
        self.field_expressions
            .iter()
            .all(|expr| expr.operator.admits(&expr.values, fields.get(expr.field)))
    }
}

impl std::iter::FromIterator<FieldExpression> for FieldRules {
    fn from_iter<T: IntoIterator<Item = FieldExpression>>(iter: T) -> Self {
        Self {
            field_expressions: iter.into_iter().collect(),
        }
    }
}
