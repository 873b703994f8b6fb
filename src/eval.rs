use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::flag::Flag;
use crate::rollout::in_rollout;
use crate::rule::{ConditionError, Rule};
use crate::segment::Segment;

/// Why an evaluation produced its value.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// The flag's kill-switch is off; the default value was returned.
    Disabled,
    /// No rule fired; the default value was returned.
    Default,
    /// A rule fired; its value was returned.
    RuleMatch,
    /// A condition value could not be interpreted; the default value was
    /// returned. Surfaced to callers so broken rule data is debuggable.
    Error,
    /// Used by the batch endpoint for flags that do not exist.
    NotFound,
}

/// The result of evaluating one flag against one context.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Evaluation {
    pub flag_key: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    #[serde(rename = "match")]
    pub matched: bool,
    pub reason: Reason,
}

impl Evaluation {
    pub fn not_found(flag_key: impl Into<String>) -> Self {
        Evaluation {
            flag_key: flag_key.into(),
            value: Value::Null,
            matched: false,
            reason: Reason::NotFound,
        }
    }
}

/// Evaluate a flag for the given context.
///
/// The algorithm: a disabled flag short-circuits to its default value; rules
/// are tried in (priority, id) order and the first one whose conditions and
/// segments all match, with the rollout admitting the entity, supplies the
/// value. A condition error is terminal and falls back to the default value.
/// The flag snapshot and context are never mutated; repeated calls with the
/// same inputs return identical results.
pub fn evaluate(flag: &Flag, ctx: &Context) -> Evaluation {
    let mut result = Evaluation {
        flag_key: flag.key.clone(),
        value: flag.default_value.clone(),
        matched: false,
        reason: Reason::Default,
    };

    if !flag.enabled {
        result.reason = Reason::Disabled;
        return result;
    }

    if flag.rules.is_empty() {
        return result;
    }

    let mut rules: Vec<&Rule> = flag.rules.iter().collect();
    rules.sort_by_key(|r| (r.priority, r.id));

    let entity_id = ctx.entity_id().unwrap_or_default();

    for rule in rules {
        match rule_matches(rule, ctx, &flag.segments) {
            Err(e) => {
                warn!("flag {}: rule {} failed to evaluate: {e}", flag.key, rule.id);
                result.reason = Reason::Error;
                return result;
            }
            Ok(false) => continue,
            Ok(true) => {
                // The rollout layers after targeting so the percentage
                // applies to the matched audience. 0 and 100 bypass the
                // bucketing entirely.
                if rule.rollout_percentage > 0 && rule.rollout_percentage < 100 {
                    if entity_id.is_empty()
                        || !in_rollout(&flag.key, &entity_id, rule.rollout_percentage)
                    {
                        continue;
                    }
                }
                result.value = rule.value.clone();
                result.matched = true;
                result.reason = Reason::RuleMatch;
                return result;
            }
        }
    }

    result
}

/// A rule matches when all inline conditions and all conditions of every
/// referenced segment match. A reference to a segment missing from the
/// loaded snapshot fails closed: the rule does not match.
fn rule_matches(
    rule: &Rule,
    ctx: &Context,
    segments: &HashMap<String, Segment>,
) -> Result<bool, ConditionError> {
    for condition in &rule.conditions {
        if !condition.matches(ctx)? {
            return Ok(false);
        }
    }

    for segment_key in &rule.segment_keys {
        let segment = match segments.get(segment_key) {
            Some(s) => s,
            None => return Ok(false),
        };
        for condition in &segment.conditions {
            if !condition.matches(ctx)? {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::FlagType;
    use crate::rule::{Condition, Op};
    use chrono::Utc;
    use maplit::hashmap;
    use serde_json::json;
    use spectral::prelude::*;

    fn make_flag(enabled: bool, kind: FlagType, default_value: Value, rules: Vec<Rule>) -> Flag {
        let now = Utc::now();
        Flag {
            key: "test_flag".into(),
            kind,
            description: String::new(),
            enabled,
            default_value,
            rules,
            segments: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn make_rule(priority: i32, value: Value, conditions: Vec<Condition>) -> Rule {
        let now = Utc::now();
        Rule {
            id: priority as i64,
            flag_key: "test_flag".into(),
            description: String::new(),
            value,
            priority,
            rollout_percentage: 0,
            conditions,
            segment_keys: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn make_cond(attr: &str, operator: Op, value: Value) -> Condition {
        Condition {
            attribute: attr.into(),
            operator,
            value,
        }
    }

    fn make_segment(key: &str, conditions: Vec<Condition>) -> Segment {
        let now = Utc::now();
        Segment {
            key: key.into(),
            description: String::new(),
            conditions,
            created_at: now,
            updated_at: now,
        }
    }

    fn ctx(value: Value) -> Context {
        Context::from(value)
    }

    #[test]
    fn disabled_flag_returns_default_even_when_a_rule_would_match() {
        let flag = make_flag(
            false,
            FlagType::Boolean,
            json!(false),
            vec![make_rule(
                1,
                json!(true),
                vec![make_cond("plan", Op::Equals, json!("pro"))],
            )],
        );

        let result = evaluate(&flag, &ctx(json!({"plan": "pro"})));
        assert_eq!(result.flag_key, "test_flag");
        assert_eq!(result.value, json!(false));
        assert!(!result.matched);
        assert_eq!(result.reason, Reason::Disabled);
    }

    #[test]
    fn no_rules_returns_default() {
        let flag = make_flag(true, FlagType::String, json!("default_val"), vec![]);

        let result = evaluate(&flag, &ctx(json!({})));
        assert_eq!(result.value, json!("default_val"));
        assert!(!result.matched);
        assert_eq!(result.reason, Reason::Default);
    }

    #[test]
    fn single_condition_match() {
        let flag = make_flag(
            true,
            FlagType::Boolean,
            json!(false),
            vec![make_rule(
                1,
                json!(true),
                vec![make_cond("plan", Op::Equals, json!("pro"))],
            )],
        );

        let result = evaluate(&flag, &ctx(json!({"plan": "pro"})));
        assert_eq!(result.value, json!(true));
        assert!(result.matched);
        assert_eq!(result.reason, Reason::RuleMatch);

        let result = evaluate(&flag, &ctx(json!({"plan": "free"})));
        assert_eq!(result.value, json!(false));
        assert!(!result.matched);
        assert_eq!(result.reason, Reason::Default);
    }

    #[test]
    fn all_conditions_must_match() {
        let flag = make_flag(
            true,
            FlagType::String,
            json!("basic"),
            vec![make_rule(
                1,
                json!("premium"),
                vec![
                    make_cond("plan", Op::Equals, json!("pro")),
                    make_cond("age", Op::Gte, json!(18)),
                ],
            )],
        );

        let result = evaluate(&flag, &ctx(json!({"plan": "pro", "age": 25})));
        assert_eq!(result.value, json!("premium"));
        assert!(result.matched);

        let result = evaluate(&flag, &ctx(json!({"plan": "pro", "age": 15})));
        assert_eq!(result.value, json!("basic"));
        assert!(!result.matched);
        assert_eq!(result.reason, Reason::Default);
    }

    #[test]
    fn rules_fire_in_priority_order() {
        let active = || vec![make_cond("active", Op::Equals, json!(true))];
        let flag = make_flag(
            true,
            FlagType::String,
            json!("none"),
            vec![
                make_rule(10, json!("low"), active()),
                make_rule(1, json!("high"), active()),
                make_rule(5, json!("mid"), active()),
            ],
        );

        let result = evaluate(&flag, &ctx(json!({"active": true})));
        assert_eq!(result.value, json!("high"));
        assert!(result.matched);
        assert_eq!(result.reason, Reason::RuleMatch);
    }

    #[test]
    fn equal_priorities_break_by_id() {
        let active = || vec![make_cond("active", Op::Equals, json!(true))];
        let now = Utc::now();
        let rule = |id: i64, value: Value| Rule {
            id,
            flag_key: "test_flag".into(),
            description: String::new(),
            value,
            priority: 1,
            rollout_percentage: 0,
            conditions: active(),
            segment_keys: vec![],
            created_at: now,
            updated_at: now,
        };
        let flag = make_flag(
            true,
            FlagType::String,
            json!("none"),
            vec![rule(7, json!("second")), rule(3, json!("first"))],
        );

        let result = evaluate(&flag, &ctx(json!({"active": true})));
        assert_eq!(result.value, json!("first"));
    }

    #[test]
    fn later_rule_matches_when_earlier_does_not() {
        let flag = make_flag(
            true,
            FlagType::Number,
            json!(0),
            vec![
                make_rule(
                    1,
                    json!(100),
                    vec![make_cond("plan", Op::Equals, json!("enterprise"))],
                ),
                make_rule(
                    2,
                    json!(50),
                    vec![make_cond("plan", Op::Equals, json!("pro"))],
                ),
            ],
        );

        let result = evaluate(&flag, &ctx(json!({"plan": "pro"})));
        assert_eq!(result.value, json!(50));
        assert!(result.matched);
    }

    #[test]
    fn nested_attribute_targeting() {
        let flag = make_flag(
            true,
            FlagType::Boolean,
            json!(false),
            vec![make_rule(
                1,
                json!(true),
                vec![make_cond("user.meta.role", Op::Equals, json!("admin"))],
            )],
        );

        let result = evaluate(&flag, &ctx(json!({"user": {"meta": {"role": "admin"}}})));
        assert!(result.matched);
        assert_eq!(result.value, json!(true));
    }

    #[test]
    fn json_flag_returns_rule_payload() {
        let flag = make_flag(
            true,
            FlagType::Json,
            json!({"theme": "light", "limit": 10}),
            vec![make_rule(
                1,
                json!({"theme": "dark", "limit": 100}),
                vec![make_cond("plan", Op::Equals, json!("pro"))],
            )],
        );

        let result = evaluate(&flag, &ctx(json!({"plan": "pro"})));
        assert!(result.matched);
        assert_eq!(result.value["theme"], json!("dark"));
        assert_eq!(result.value["limit"], json!(100));
    }

    #[test]
    fn condition_error_is_terminal_and_returns_default() {
        let flag = make_flag(
            true,
            FlagType::String,
            json!("fallback"),
            vec![
                // `in` with a non-array value errors out the whole evaluation.
                make_rule(
                    1,
                    json!("broken"),
                    vec![make_cond("plan", Op::In, json!("pro"))],
                ),
                // This rule would match, but it must never be reached.
                make_rule(
                    2,
                    json!("reachable"),
                    vec![make_cond("plan", Op::Equals, json!("pro"))],
                ),
            ],
        );

        let result = evaluate(&flag, &ctx(json!({"plan": "pro"})));
        assert_eq!(result.value, json!("fallback"));
        assert!(!result.matched);
        assert_eq!(result.reason, Reason::Error);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let flag = make_flag(
            true,
            FlagType::Json,
            json!({"a": [1, 2, 3]}),
            vec![make_rule(
                1,
                json!({"b": {"c": true}}),
                vec![make_cond("plan", Op::Equals, json!("pro"))],
            )],
        );
        let context = ctx(json!({"plan": "pro", "entity_id": "user_1"}));

        let first = evaluate(&flag, &context);
        for _ in 0..10 {
            assert_eq!(evaluate(&flag, &context), first);
        }
    }

    // ── Segments ────────────────────────────────────────────────────────────

    fn segment_rule(priority: i32, value: Value, segment_keys: Vec<&str>) -> Rule {
        let mut rule = make_rule(priority, value, vec![]);
        rule.segment_keys = segment_keys.into_iter().map(String::from).collect();
        rule
    }

    #[test]
    fn segment_only_rule() {
        let mut flag = make_flag(
            true,
            FlagType::Boolean,
            json!(false),
            vec![segment_rule(1, json!(true), vec!["pro_users"])],
        );
        flag.segments = hashmap! {
            "pro_users".to_string() => make_segment(
                "pro_users",
                vec![make_cond("user.plan", Op::Equals, json!("pro"))],
            ),
        };

        let result = evaluate(&flag, &ctx(json!({"user": {"plan": "pro"}})));
        assert!(result.matched);
        assert_eq!(result.reason, Reason::RuleMatch);

        let result = evaluate(&flag, &ctx(json!({"user": {"plan": "free"}})));
        assert!(!result.matched);
        assert_eq!(result.reason, Reason::Default);
    }

    #[test]
    fn segment_conditions_and_with_inline_conditions() {
        let mut rule = segment_rule(1, json!("premium"), vec!["pro_users"]);
        rule.conditions = vec![make_cond("country", Op::In, json!(["FR", "DE"]))];
        let mut flag = make_flag(true, FlagType::String, json!("basic"), vec![rule]);
        flag.segments = hashmap! {
            "pro_users".to_string() => make_segment(
                "pro_users",
                vec![make_cond("user.plan", Op::Equals, json!("pro"))],
            ),
        };

        let both = ctx(json!({"user": {"plan": "pro"}, "country": "FR"}));
        assert_that!(evaluate(&flag, &both).matched).is_true();

        let only_segment = ctx(json!({"user": {"plan": "pro"}, "country": "US"}));
        assert_that!(evaluate(&flag, &only_segment).matched).is_false();

        let only_inline = ctx(json!({"user": {"plan": "free"}, "country": "FR"}));
        assert_that!(evaluate(&flag, &only_inline).matched).is_false();
    }

    #[test]
    fn missing_segment_fails_closed() {
        let flag = make_flag(
            true,
            FlagType::Boolean,
            json!(false),
            vec![segment_rule(1, json!(true), vec!["nonexistent"])],
        );

        let result = evaluate(&flag, &ctx(json!({"anything": "value"})));
        assert!(!result.matched);
        assert_eq!(result.reason, Reason::Default);
    }

    #[test]
    fn all_referenced_segments_must_match() {
        let mut flag = make_flag(
            true,
            FlagType::Boolean,
            json!(false),
            vec![segment_rule(1, json!(true), vec!["pro_users", "beta_testers"])],
        );
        flag.segments = hashmap! {
            "pro_users".to_string() => make_segment(
                "pro_users",
                vec![make_cond("user.plan", Op::Equals, json!("pro"))],
            ),
            "beta_testers".to_string() => make_segment(
                "beta_testers",
                vec![make_cond("user.beta", Op::Equals, json!(true))],
            ),
        };

        let both = ctx(json!({"user": {"plan": "pro", "beta": true}}));
        assert_that!(evaluate(&flag, &both).matched).is_true();

        let one = ctx(json!({"user": {"plan": "pro", "beta": false}}));
        assert_that!(evaluate(&flag, &one).matched).is_false();
    }

    // ── Rollouts ────────────────────────────────────────────────────────────

    fn rollout_rule(priority: i32, value: Value, pct: i32) -> Rule {
        let mut rule = make_rule(
            priority,
            value,
            vec![make_cond("plan", Op::Equals, json!("pro"))],
        );
        rule.rollout_percentage = pct;
        rule
    }

    #[test]
    fn fifty_percent_rollout_matches_about_half() {
        let mut flag = make_flag(
            true,
            FlagType::Boolean,
            json!(false),
            vec![rollout_rule(1, json!(true), 50)],
        );
        flag.key = "rollout_flag".into();

        let total = 1000;
        let matched = (0..total)
            .filter(|i| {
                let context = ctx(json!({"plan": "pro", "entity_id": format!("user_{i}")}));
                evaluate(&flag, &context).matched
            })
            .count();

        // 500 give or take statistical variance.
        assert!(
            (440..=560).contains(&matched),
            "expected ~500 matches, got {matched}"
        );
    }

    #[test]
    fn zero_percent_rollout_disables_the_check() {
        let flag = make_flag(
            true,
            FlagType::Boolean,
            json!(false),
            vec![rollout_rule(1, json!(true), 0)],
        );

        let result = evaluate(&flag, &ctx(json!({"plan": "pro", "entity_id": "user_1"})));
        assert!(result.matched);
    }

    #[test]
    fn hundred_percent_rollout_bypasses_bucketing() {
        let flag = make_flag(
            true,
            FlagType::Boolean,
            json!(false),
            vec![rollout_rule(1, json!(true), 100)],
        );

        // No entity id needed at 100%.
        let result = evaluate(&flag, &ctx(json!({"plan": "pro"})));
        assert!(result.matched);
    }

    #[test]
    fn partial_rollout_without_entity_id_skips_the_rule() {
        let flag = make_flag(
            true,
            FlagType::Boolean,
            json!(false),
            vec![rollout_rule(1, json!(true), 50)],
        );

        let result = evaluate(&flag, &ctx(json!({"plan": "pro"})));
        assert!(!result.matched);
        assert_eq!(result.reason, Reason::Default);
    }

    #[test]
    fn entity_outside_rollout_falls_through_to_next_rule() {
        let active = || vec![make_cond("active", Op::Equals, json!(true))];
        let mut canary = make_rule(1, json!("canary"), active());
        canary.rollout_percentage = 10;
        let stable = make_rule(2, json!("stable"), active());

        let mut flag = make_flag(
            true,
            FlagType::String,
            json!("default"),
            vec![canary, stable],
        );
        flag.key = "fallthrough_flag".into();

        let outside = (0..100)
            .map(|i| format!("user_{i}"))
            .find(|id| !crate::rollout::in_rollout("fallthrough_flag", id, 10))
            .expect("some user must fall outside a 10% rollout");

        let context = ctx(json!({"active": true, "entity_id": outside}));
        let result = evaluate(&flag, &context);
        assert_eq!(result.value, json!("stable"));
        assert!(result.matched);
    }

    #[test]
    fn batch_not_found_shape() {
        let entry = Evaluation::not_found("ghost_flag");
        let wire = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            wire,
            json!({"flag_key": "ghost_flag", "match": false, "reason": "not_found"})
        );
    }

    #[test]
    fn reason_wire_names() {
        assert_eq!(serde_json::to_value(Reason::Disabled).unwrap(), json!("disabled"));
        assert_eq!(serde_json::to_value(Reason::Default).unwrap(), json!("default"));
        assert_eq!(
            serde_json::to_value(Reason::RuleMatch).unwrap(),
            json!("rule_match")
        );
        assert_eq!(serde_json::to_value(Reason::Error).unwrap(), json!("error"));
        assert_eq!(
            serde_json::to_value(Reason::NotFound).unwrap(),
            json!("not_found")
        );
    }
}
