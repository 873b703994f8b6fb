use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::context::{coerce_f64, coerce_str, values_equal, Context};
use crate::error::Error;

/// A targeting clause attached to one flag. A rule fires when all of its
/// inline conditions and all conditions of every referenced segment match,
/// and the entity falls inside the rollout percentage.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Rule {
    pub id: i64,
    pub flag_key: String,
    #[serde(default)]
    pub description: String,
    pub value: Value,
    /// Lower number = higher priority; ties break by id ascending.
    pub priority: i32,
    #[serde(default)]
    pub rollout_percentage: i32,
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segment_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single predicate over one context attribute.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Condition {
    /// Dot-separated path into the evaluation context, e.g. `user.plan`.
    pub attribute: String,
    pub operator: Op,
    pub value: Value,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Equals,
    NotEquals,
    In,
    NotIn,
    Contains,
    StartsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    Exists,
    Regex,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Equals => "equals",
            Op::NotEquals => "not_equals",
            Op::In => "in",
            Op::NotIn => "not_in",
            Op::Contains => "contains",
            Op::StartsWith => "starts_with",
            Op::Gt => "gt",
            Op::Gte => "gte",
            Op::Lt => "lt",
            Op::Lte => "lte",
            Op::Exists => "exists",
            Op::Regex => "regex",
        }
    }
}

impl std::str::FromStr for Op {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "equals" => Ok(Op::Equals),
            "not_equals" => Ok(Op::NotEquals),
            "in" => Ok(Op::In),
            "not_in" => Ok(Op::NotIn),
            "contains" => Ok(Op::Contains),
            "starts_with" => Ok(Op::StartsWith),
            "gt" => Ok(Op::Gt),
            "gte" => Ok(Op::Gte),
            "lt" => Ok(Op::Lt),
            "lte" => Ok(Op::Lte),
            "exists" => Ok(Op::Exists),
            "regex" => Ok(Op::Regex),
            other => Err(Error::Validation(format!("invalid operator: {other:?}"))),
        }
    }
}

/// A condition value that cannot be interpreted for its operator. The
/// evaluator converts this into the `error` reason with the default value;
/// it is never fatal.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("in operator requires an array value")]
    ExpectedArray,
    #[error("exists operator requires a boolean value")]
    ExpectedBool,
    #[error("regex operator requires a string pattern")]
    ExpectedPattern,
    #[error("invalid regex: {0}")]
    BadRegex(String),
}

impl Condition {
    /// Evaluate this condition against a context.
    ///
    /// A missing attribute is a silent non-match for every operator except
    /// `exists`, which tests presence itself.
    pub fn matches(&self, ctx: &Context) -> Result<bool, ConditionError> {
        let attr = ctx.resolve(&self.attribute);

        if let Op::Exists = self.operator {
            let expected = self.value.as_bool().ok_or(ConditionError::ExpectedBool)?;
            return Ok(attr.is_some() == expected);
        }

        let attr = match attr {
            Some(v) => v,
            None => return Ok(false),
        };

        match self.operator {
            Op::Equals => Ok(values_equal(attr, &self.value)),
            Op::NotEquals => Ok(!values_equal(attr, &self.value)),
            Op::In => self.in_list(attr),
            Op::NotIn => self.in_list(attr).map(|hit| !hit),
            Op::Contains => Ok(string_op(attr, &self.value, |a, c| a.contains(c))),
            Op::StartsWith => Ok(string_op(attr, &self.value, |a, c| a.starts_with(c))),
            Op::Gt => Ok(numeric_op(attr, &self.value, |a, c| a > c)),
            Op::Gte => Ok(numeric_op(attr, &self.value, |a, c| a >= c)),
            Op::Lt => Ok(numeric_op(attr, &self.value, |a, c| a < c)),
            Op::Lte => Ok(numeric_op(attr, &self.value, |a, c| a <= c)),
            Op::Regex => self.regex_match(attr),
            Op::Exists => Ok(false), // handled before the match
        }
    }

    fn in_list(&self, attr: &Value) -> Result<bool, ConditionError> {
        let list = self.value.as_array().ok_or(ConditionError::ExpectedArray)?;
        Ok(list.iter().any(|item| values_equal(attr, item)))
    }

    fn regex_match(&self, attr: &Value) -> Result<bool, ConditionError> {
        // Non-string attributes silently fail to match, even against an
        // invalid pattern.
        let attr = match coerce_str(attr) {
            Some(s) => s,
            None => return Ok(false),
        };
        let pattern = self.value.as_str().ok_or(ConditionError::ExpectedPattern)?;
        let re = Regex::new(pattern).map_err(|e| ConditionError::BadRegex(e.to_string()))?;
        Ok(re.is_match(&attr))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.attribute.is_empty() {
            return Err(Error::Validation("attribute is required".into()));
        }
        Ok(())
    }
}

fn string_op<F: Fn(&str, &str) -> bool>(attr: &Value, cond: &Value, f: F) -> bool {
    match (coerce_str(attr), coerce_str(cond)) {
        (Some(a), Some(c)) => f(&a, &c),
        _ => false,
    }
}

fn numeric_op<F: Fn(f64, f64) -> bool>(attr: &Value, cond: &Value, f: F) -> bool {
    match (coerce_f64(attr), coerce_f64(cond)) {
        (Some(a), Some(c)) => f(a, c),
        _ => false,
    }
}

/// Request body for creating a rule and for replacing one wholesale: an
/// update swaps the rule's conditions and segment links atomically.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RuleInput {
    #[serde(default)]
    pub description: String,
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segment_keys: Vec<String>,
    pub value: Value,
    pub priority: i32,
    #[serde(default)]
    pub rollout_percentage: i32,
}

impl RuleInput {
    pub fn validate(&self) -> Result<(), Error> {
        if self.conditions.is_empty() {
            return Err(Error::Validation(
                "rule must have at least one condition".into(),
            ));
        }
        for (i, c) in self.conditions.iter().enumerate() {
            c.validate()
                .map_err(|e| Error::Validation(format!("condition[{i}]: {e}")))?;
        }
        if !(0..=100).contains(&self.rollout_percentage) {
            return Err(Error::Validation(
                "rollout_percentage must be between 0 and 100".into(),
            ));
        }
        Ok(())
    }
}
