use async_trait::async_trait;

use crate::apikey::ApiKey;
use crate::error::Result;
use crate::flag::{CreateFlagRequest, Flag, UpdateFlagRequest};
use crate::rule::{Rule, RuleInput};
use crate::segment::{CreateSegmentRequest, Segment, UpdateSegmentRequest};

/// The persistence capability consumed by the HTTP layer. Implementations
/// must be thread-safe; handlers hold the store as `Arc<dyn Store>`.
///
/// Reads of absent entities return `Ok(None)`; only real storage failures
/// are errors.
#[async_trait]
pub trait Store: Send + Sync {
    // Flags
    async fn create_flag(&self, req: CreateFlagRequest) -> Result<Flag>;
    async fn get_flag(&self, key: &str) -> Result<Option<Flag>>;
    async fn list_flags(&self) -> Result<Vec<Flag>>;
    async fn update_flag(&self, key: &str, req: UpdateFlagRequest) -> Result<Option<Flag>>;
    async fn delete_flag(&self, key: &str) -> Result<()>;
    async fn toggle_flag(&self, key: &str) -> Result<Option<Flag>>;

    // Rules. An update replaces the rule's conditions and segment links
    // atomically; there is no partial rule.
    async fn create_rule(&self, flag_key: &str, input: RuleInput) -> Result<Rule>;
    async fn update_rule(&self, flag_key: &str, rule_id: i64, input: RuleInput) -> Result<Rule>;
    async fn delete_rule(&self, flag_key: &str, rule_id: i64) -> Result<()>;

    // Segments
    async fn create_segment(&self, req: CreateSegmentRequest) -> Result<Segment>;
    async fn get_segment(&self, key: &str) -> Result<Option<Segment>>;
    async fn list_segments(&self) -> Result<Vec<Segment>>;
    async fn update_segment(&self, key: &str, req: UpdateSegmentRequest)
        -> Result<Option<Segment>>;
    async fn delete_segment(&self, key: &str) -> Result<()>;

    /// The flag with rules, conditions, and every referenced segment
    /// materialized, ready for evaluation.
    async fn get_flag_for_evaluation(&self, key: &str) -> Result<Option<Flag>>;

    // API keys
    async fn create_api_key(&self, key: &ApiKey, hashed_key: &str) -> Result<()>;
    async fn list_api_keys(&self) -> Result<Vec<ApiKey>>;
    async fn validate_api_key(&self, hashed_key: &str) -> Result<Option<ApiKey>>;
    async fn revoke_api_key(&self, id: &str) -> Result<()>;
}
