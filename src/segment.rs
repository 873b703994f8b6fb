use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::flag::validate_key;
use crate::rule::Condition;

/// A named, reusable set of conditions. A rule that references a segment
/// ANDs the segment's conditions with its own. Segments cannot be deleted
/// while any rule references them.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Segment {
    pub key: String,
    #[serde(default)]
    pub description: String,
    pub conditions: Vec<Condition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateSegmentRequest {
    pub key: String,
    #[serde(default)]
    pub description: String,
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UpdateSegmentRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

impl CreateSegmentRequest {
    pub fn validate(&self) -> Result<(), Error> {
        validate_key(&self.key)?;
        validate_conditions(&self.conditions)
    }
}

pub fn validate_conditions(conditions: &[Condition]) -> Result<(), Error> {
    if conditions.is_empty() {
        return Err(Error::Validation(
            "segment must have at least one condition".into(),
        ));
    }
    for (i, c) in conditions.iter().enumerate() {
        c.validate()
            .map_err(|e| Error::Validation(format!("condition[{i}]: {e}")))?;
    }
    Ok(())
}
