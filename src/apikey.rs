use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Live,
    Test,
    Staging,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Live => "live",
            Environment::Test => "test",
            Environment::Staging => "staging",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "live" => Ok(Environment::Live),
            "test" => Ok(Environment::Test),
            "staging" => Ok(Environment::Staging),
            other => Err(Error::Validation(format!(
                "invalid environment: {other:?} (must be live, test, or staging)"
            ))),
        }
    }
}

/// A client credential for the evaluate and stream endpoints. Only the
/// SHA-256 digest of the raw key is ever persisted; the key itself is shown
/// once, at creation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    pub environment: Environment,
    /// First characters of the raw key, kept for listing.
    pub prefix: String,
    #[serde(default)]
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Returned only at creation time; `key` is the one-time display of the raw
/// credential.
#[derive(Clone, Debug, Serialize)]
pub struct ApiKeyWithRaw {
    #[serde(flatten)]
    pub api_key: ApiKey,
    pub key: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub environment: Environment,
}

/// Generate a fresh API key. Returns the key with its one-time raw value and
/// the digest to persist.
pub fn generate(name: &str, environment: Environment) -> (ApiKeyWithRaw, String) {
    let mut suffix = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut suffix);
    let suffix_hex = hex::encode(suffix);

    let raw_key = format!("flw_{}_{}", environment.as_str(), suffix_hex);
    let prefix = format!("flw_{}_{}", environment.as_str(), &suffix_hex[..4]);
    let id = format!("key_{}", &suffix_hex[..16]);

    let key = ApiKeyWithRaw {
        api_key: ApiKey {
            id,
            name: name.to_string(),
            environment,
            prefix,
            revoked: false,
            created_at: Utc::now(),
            last_used_at: None,
        },
        key: raw_key.clone(),
    };

    (key, hash_key(&raw_key))
}

/// SHA-256 hex digest of a raw API key: the only form that touches storage.
pub fn hash_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}
