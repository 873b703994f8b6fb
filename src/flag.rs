use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::rule::Rule;
use crate::segment::Segment;

lazy_static! {
    static ref KEY_REGEX: Regex = Regex::new("^[a-z][a-z0-9_]{1,62}[a-z0-9]$").unwrap();
}

/// The declared shape of every value a flag may ever return: its default
/// value and each rule value must satisfy it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    Boolean,
    String,
    Number,
    Json,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::Boolean => "boolean",
            FlagType::String => "string",
            FlagType::Number => "number",
            FlagType::Json => "json",
        }
    }
}

impl std::str::FromStr for FlagType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "boolean" => Ok(FlagType::Boolean),
            "string" => Ok(FlagType::String),
            "number" => Ok(FlagType::Number),
            "json" => Ok(FlagType::Json),
            other => Err(Error::Validation(format!("invalid flag type: {other:?}"))),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Flag {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: FlagType,
    #[serde(default)]
    pub description: String,
    /// Master kill-switch. A disabled flag always returns its default value.
    pub enabled: bool,
    pub default_value: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
    /// Every segment referenced by any rule, materialized at load time.
    /// A rule whose reference is missing from this map fails closed.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub segments: HashMap<String, Segment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flag {
    pub fn validate(&self) -> Result<(), Error> {
        validate_key(&self.key)?;
        validate_value_for_type(self.kind, &self.default_value)
            .map_err(|e| Error::Validation(format!("default_value: {e}")))
    }
}

/// Flag and segment keys share the same shape: lowercase alphanumeric with
/// underscores, 3 to 64 characters, starting with a letter.
pub fn validate_key(key: &str) -> Result<(), Error> {
    if !KEY_REGEX.is_match(key) {
        return Err(Error::Validation(format!(
            "key must match {}",
            KEY_REGEX.as_str()
        )));
    }
    Ok(())
}

/// Check that a decoded JSON value satisfies a flag type. For `json` flags
/// any valid JSON is fine.
pub fn validate_value_for_type(kind: FlagType, value: &Value) -> Result<(), Error> {
    let ok = match kind {
        FlagType::Boolean => value.is_boolean(),
        FlagType::String => value.is_string(),
        FlagType::Number => value.is_number(),
        FlagType::Json => true,
    };
    if !ok {
        return Err(Error::Validation(format!("expected {} value", kind.as_str())));
    }
    Ok(())
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateFlagRequest {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: FlagType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    pub default_value: Value,
}

impl CreateFlagRequest {
    pub fn validate(&self) -> Result<(), Error> {
        validate_key(&self.key)?;
        validate_value_for_type(self.kind, &self.default_value)
            .map_err(|e| Error::Validation(format!("default_value: {e}")))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UpdateFlagRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test_case("checkout_v2", true)]
    #[test_case("a1b", true)]
    #[test_case("dark_mode_2", true)]
    #[test_case("ab", false; "too short")]
    #[test_case("1flag", false; "leading digit")]
    #[test_case("Flag", false; "uppercase")]
    #[test_case("flag-name", false; "hyphen")]
    #[test_case("flag_", false; "trailing underscore")]
    #[test_case("", false; "empty")]
    fn key_validation(key: &str, valid: bool) {
        assert_eq!(validate_key(key).is_ok(), valid);
    }

    #[test]
    fn key_length_bounds() {
        let max = format!("a{}", "b".repeat(63));
        assert_that!(validate_key(&max)).is_ok();
        let too_long = format!("a{}", "b".repeat(64));
        assert_that!(validate_key(&too_long)).is_err();
    }

    #[test_case(FlagType::Boolean, json!(true), true)]
    #[test_case(FlagType::Boolean, json!("true"), false)]
    #[test_case(FlagType::String, json!("v1"), true)]
    #[test_case(FlagType::String, json!(1), false)]
    #[test_case(FlagType::Number, json!(3.5), true)]
    #[test_case(FlagType::Number, json!(10), true; "integers are numbers")]
    #[test_case(FlagType::Number, json!(null), false)]
    #[test_case(FlagType::Json, json!({"theme": "dark"}), true)]
    #[test_case(FlagType::Json, json!(null), true; "json accepts null")]
    fn value_type_check(kind: FlagType, value: Value, valid: bool) {
        assert_eq!(validate_value_for_type(kind, &value).is_ok(), valid);
    }

    #[test]
    fn flag_round_trips_through_json() {
        let json = json!({
            "key": "checkout_v2",
            "type": "boolean",
            "description": "new checkout",
            "enabled": true,
            "default_value": false,
            "created_at": "2024-03-01T12:00:00Z",
            "updated_at": "2024-03-01T12:00:00Z"
        });
        let flag: Flag = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(flag.kind, FlagType::Boolean);
        assert_that!(flag.rules).has_length(0);
        assert_eq!(serde_json::to_value(&flag).unwrap(), json);
    }
}
