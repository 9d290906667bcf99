//! Filter condition types and construction-time validation.

use crate::error::FilterError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator of a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Equals,
    EqualsCi,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    ContainsCi,
    StartsWith,
    StartsWithCi,
    EndsWith,
    EndsWithCi,
    In,
}

impl Operation {
    /// Ordering-family operators require a numeric comparison value.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operation::Gt | Operation::Gte | Operation::Lt | Operation::Lte
        )
    }

    /// String-shaped operators require a string comparison value.
    pub fn is_string_shaped(&self) -> bool {
        matches!(
            self,
            Operation::EqualsCi
                | Operation::Contains
                | Operation::ContainsCi
                | Operation::StartsWith
                | Operation::StartsWithCi
                | Operation::EndsWith
                | Operation::EndsWithCi
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Equals => "equals",
            Operation::EqualsCi => "equals_ci",
            Operation::Gt => "gt",
            Operation::Gte => "gte",
            Operation::Lt => "lt",
            Operation::Lte => "lte",
            Operation::Contains => "contains",
            Operation::ContainsCi => "contains_ci",
            Operation::StartsWith => "starts_with",
            Operation::StartsWithCi => "starts_with_ci",
            Operation::EndsWith => "ends_with",
            Operation::EndsWithCi => "ends_with_ci",
            Operation::In => "in",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One typed boolean condition over a document field.
///
/// A `meta.`-prefixed field name resolves into the document's metadata bag;
/// any other name resolves to a direct document attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operation: Operation,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub negate: bool,
}

impl Condition {
    /// Build a validated condition.
    pub fn new(
        field: impl Into<String>,
        operation: Operation,
        value: Value,
    ) -> Result<Self, FilterError> {
        let condition = Self {
            field: field.into(),
            operation,
            value,
            negate: false,
        };
        condition.validate()?;
        Ok(condition)
    }

    /// Invert the condition's outcome.
    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    /// Enforce the operator/value-shape invariants.
    ///
    /// Ordering operators require a numeric value, `in` requires an array,
    /// string-shaped operators require a string. `equals` accepts anything,
    /// null included.
    pub fn validate(&self) -> Result<(), FilterError> {
        let ok = match self.operation {
            Operation::Equals => true,
            Operation::In => self.value.is_array(),
            op if op.is_ordering() => self.value.is_number(),
            _ => self.value.is_string(),
        };

        if ok {
            Ok(())
        } else {
            Err(FilterError::Validation {
                field: self.field.clone(),
                operation: self.operation.to_string(),
                value: self.value.clone(),
            })
        }
    }
}

/// How a filter's conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combination {
    #[default]
    And,
    Or,
}

/// A flat predicate tree: conditions joined by a single combinator.
///
/// Wire format:
/// `{"conditions": [{"field","operation","value","negate"}], "combination": "AND"|"OR"}`.
/// Unknown combinators are rejected during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Filter {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub combination: Combination,
}

impl Filter {
    pub fn all(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            combination: Combination::And,
        }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            combination: Combination::Or,
        }
    }

    /// Validate every condition in the filter.
    pub fn validate(&self) -> Result<(), FilterError> {
        for condition in &self.conditions {
            condition.validate()?;
        }
        Ok(())
    }

    /// Parse and validate a filter from its wire representation.
    pub fn from_wire(value: Value) -> crate::error::Result<Self> {
        let filter: Filter = serde_json::from_value(value)
            .map_err(|e| crate::error::Error::configuration(format!("invalid filter: {e}")))?;
        filter.validate()?;
        Ok(filter)
    }
}
