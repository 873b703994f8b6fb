use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::apikey::ApiKey;
use crate::error::{Error, Result};
use crate::flag::{CreateFlagRequest, Flag, UpdateFlagRequest};
use crate::flag::{validate_value_for_type, FlagType};
use crate::rule::{Condition, Op, Rule, RuleInput};
use crate::segment::{CreateSegmentRequest, Segment, UpdateSegmentRequest};
use crate::store::Store;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS flags (
    key           TEXT PRIMARY KEY,
    type          TEXT NOT NULL,
    description   TEXT NOT NULL DEFAULT '',
    enabled       INTEGER NOT NULL DEFAULT 0,
    default_value TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rules (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    flag_key           TEXT NOT NULL REFERENCES flags(key) ON DELETE CASCADE,
    description        TEXT NOT NULL DEFAULT '',
    value              TEXT NOT NULL,
    priority           INTEGER NOT NULL,
    rollout_percentage INTEGER NOT NULL DEFAULT 0,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conditions (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id   INTEGER NOT NULL REFERENCES rules(id) ON DELETE CASCADE,
    attribute TEXT NOT NULL,
    operator  TEXT NOT NULL,
    value     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS segments (
    key         TEXT PRIMARY KEY,
    description TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS segment_conditions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    segment_key TEXT NOT NULL REFERENCES segments(key) ON DELETE CASCADE,
    attribute   TEXT NOT NULL,
    operator    TEXT NOT NULL,
    value       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rule_segments (
    rule_id     INTEGER NOT NULL REFERENCES rules(id) ON DELETE CASCADE,
    segment_key TEXT NOT NULL REFERENCES segments(key),
    PRIMARY KEY (rule_id, segment_key)
);

CREATE TABLE IF NOT EXISTS api_keys (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    environment  TEXT NOT NULL,
    prefix       TEXT NOT NULL,
    hashed_key   TEXT NOT NULL UNIQUE,
    revoked      INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    last_used_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_rules_flag_key ON rules(flag_key);
CREATE INDEX IF NOT EXISTS idx_conditions_rule_id ON conditions(rule_id);
CREATE INDEX IF NOT EXISTS idx_segment_conditions_key ON segment_conditions(segment_key);
";

/// SQLite-backed [`Store`]. Cloning is cheap; the inner connection handle is
/// reference-counted and serializes access on a dedicated thread.
#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    /// Open (or create) a database at `path`, apply pragmas, and ensure the
    /// schema exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = SqliteStore { conn };
        store.init().await?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = SqliteStore { conn };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "PRAGMA journal_mode=WAL;
                     PRAGMA foreign_keys=ON;
                     PRAGMA busy_timeout=5000;",
                )?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    // ── Flags ───────────────────────────────────────────────────────────────

    async fn create_flag(&self, req: CreateFlagRequest) -> Result<Flag> {
        let now = Utc::now();
        let flag = Flag {
            key: req.key,
            kind: req.kind,
            description: req.description,
            enabled: req.enabled,
            default_value: req.default_value,
            rules: Vec::new(),
            segments: HashMap::new(),
            created_at: now,
            updated_at: now,
        };

        let stored = flag.clone();
        let outcome = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO flags (key, type, description, enabled, default_value, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        stored.key,
                        stored.kind.as_str(),
                        stored.description,
                        stored.enabled,
                        stored.default_value.to_string(),
                        stored.created_at,
                        stored.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await;

        match outcome {
            Ok(()) => Ok(flag),
            Err(tokio_rusqlite::Error::Rusqlite(e)) if is_constraint_violation(&e) => Err(
                Error::Conflict(format!("flag {:?} already exists", flag.key)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_flag(&self, key: &str) -> Result<Option<Flag>> {
        let key = key.to_string();
        Ok(self
            .conn
            .call(move |conn| Ok(get_flag_sync(conn, &key)?))
            .await?)
    }

    async fn list_flags(&self) -> Result<Vec<Flag>> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, type, description, enabled, default_value, created_at, updated_at
                     FROM flags ORDER BY key",
                )?;
                let flags = stmt
                    .query_map([], flag_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(flags)
            })
            .await?)
    }

    async fn update_flag(&self, key: &str, req: UpdateFlagRequest) -> Result<Option<Flag>> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                let mut flag = match get_flag_sync(conn, &key)? {
                    Some(f) => f,
                    None => return Ok(Ok(None)),
                };

                if let Some(description) = req.description {
                    flag.description = description;
                }
                if let Some(enabled) = req.enabled {
                    flag.enabled = enabled;
                }
                if let Some(default_value) = req.default_value {
                    if let Err(e) = validate_value_for_type(flag.kind, &default_value) {
                        return Ok(Err(Error::Validation(format!("default_value: {e}"))));
                    }
                    flag.default_value = default_value;
                }
                flag.updated_at = Utc::now();

                conn.execute(
                    "UPDATE flags SET description = ?1, enabled = ?2, default_value = ?3, updated_at = ?4
                     WHERE key = ?5",
                    params![
                        flag.description,
                        flag.enabled,
                        flag.default_value.to_string(),
                        flag.updated_at,
                        key,
                    ],
                )?;
                Ok(Ok(Some(flag)))
            })
            .await?
    }

    async fn delete_flag(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM flags WHERE key = ?1", [&key])?;
                if n == 0 {
                    return Ok(Err(Error::NotFound("flag")));
                }
                Ok(Ok(()))
            })
            .await?
    }

    async fn toggle_flag(&self, key: &str) -> Result<Option<Flag>> {
        let key = key.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE flags SET enabled = NOT enabled, updated_at = ?1 WHERE key = ?2",
                    params![Utc::now(), key],
                )?;
                Ok(get_flag_sync(conn, &key)?)
            })
            .await?)
    }

    // ── Rules ───────────────────────────────────────────────────────────────

    async fn create_rule(&self, flag_key: &str, input: RuleInput) -> Result<Rule> {
        let flag_key = flag_key.to_string();
        let now = Utc::now();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                if let Some(missing) = find_missing_segment(&tx, &input.segment_keys)? {
                    return Ok(Err(Error::Validation(format!(
                        "segment {missing:?} not found"
                    ))));
                }

                tx.execute(
                    "INSERT INTO rules (flag_key, description, value, priority, rollout_percentage, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        flag_key,
                        input.description,
                        input.value.to_string(),
                        input.priority,
                        input.rollout_percentage,
                        now,
                        now,
                    ],
                )?;
                let rule_id = tx.last_insert_rowid();

                insert_rule_conditions(&tx, rule_id, &input.conditions)?;
                for segment_key in &input.segment_keys {
                    tx.execute(
                        "INSERT INTO rule_segments (rule_id, segment_key) VALUES (?1, ?2)",
                        params![rule_id, segment_key],
                    )?;
                }
                tx.commit()?;

                Ok(Ok(Rule {
                    id: rule_id,
                    flag_key,
                    description: input.description,
                    value: input.value,
                    priority: input.priority,
                    rollout_percentage: input.rollout_percentage,
                    conditions: input.conditions,
                    segment_keys: input.segment_keys,
                    created_at: now,
                    updated_at: now,
                }))
            })
            .await?
    }

    async fn update_rule(&self, flag_key: &str, rule_id: i64, input: RuleInput) -> Result<Rule> {
        let flag_key = flag_key.to_string();
        let now = Utc::now();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                if let Some(missing) = find_missing_segment(&tx, &input.segment_keys)? {
                    return Ok(Err(Error::Validation(format!(
                        "segment {missing:?} not found"
                    ))));
                }

                let created_at: Option<chrono::DateTime<Utc>> = tx
                    .query_row(
                        "SELECT created_at FROM rules WHERE id = ?1 AND flag_key = ?2",
                        params![rule_id, flag_key],
                        |row| row.get(0),
                    )
                    .optional()?;
                let created_at = match created_at {
                    Some(t) => t,
                    None => return Ok(Err(Error::NotFound("rule"))),
                };

                tx.execute(
                    "UPDATE rules SET description = ?1, value = ?2, priority = ?3, rollout_percentage = ?4, updated_at = ?5
                     WHERE id = ?6 AND flag_key = ?7",
                    params![
                        input.description,
                        input.value.to_string(),
                        input.priority,
                        input.rollout_percentage,
                        now,
                        rule_id,
                        flag_key,
                    ],
                )?;

                // Replace conditions and segment links wholesale; a rule is
                // never left half-updated.
                tx.execute("DELETE FROM conditions WHERE rule_id = ?1", [rule_id])?;
                tx.execute("DELETE FROM rule_segments WHERE rule_id = ?1", [rule_id])?;
                insert_rule_conditions(&tx, rule_id, &input.conditions)?;
                for segment_key in &input.segment_keys {
                    tx.execute(
                        "INSERT INTO rule_segments (rule_id, segment_key) VALUES (?1, ?2)",
                        params![rule_id, segment_key],
                    )?;
                }
                tx.commit()?;

                Ok(Ok(Rule {
                    id: rule_id,
                    flag_key,
                    description: input.description,
                    value: input.value,
                    priority: input.priority,
                    rollout_percentage: input.rollout_percentage,
                    conditions: input.conditions,
                    segment_keys: input.segment_keys,
                    created_at,
                    updated_at: now,
                }))
            })
            .await?
    }

    async fn delete_rule(&self, flag_key: &str, rule_id: i64) -> Result<()> {
        let flag_key = flag_key.to_string();
        self.conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM rules WHERE id = ?1 AND flag_key = ?2",
                    params![rule_id, flag_key],
                )?;
                if n == 0 {
                    return Ok(Err(Error::NotFound("rule")));
                }
                Ok(Ok(()))
            })
            .await?
    }

    // ── Segments ────────────────────────────────────────────────────────────

    async fn create_segment(&self, req: CreateSegmentRequest) -> Result<Segment> {
        let now = Utc::now();
        let segment = Segment {
            key: req.key,
            description: req.description,
            conditions: req.conditions,
            created_at: now,
            updated_at: now,
        };

        let stored = segment.clone();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO segments (key, description, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![stored.key, stored.description, stored.created_at, stored.updated_at],
                )?;
                insert_segment_conditions(&tx, &stored.key, &stored.conditions)?;
                tx.commit()?;
                Ok(())
            })
            .await;

        match outcome {
            Ok(()) => Ok(segment),
            Err(tokio_rusqlite::Error::Rusqlite(e)) if is_constraint_violation(&e) => Err(
                Error::Conflict(format!("segment {:?} already exists", segment.key)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_segment(&self, key: &str) -> Result<Option<Segment>> {
        let key = key.to_string();
        Ok(self
            .conn
            .call(move |conn| Ok(get_segment_sync(conn, &key)?))
            .await?)
    }

    async fn list_segments(&self) -> Result<Vec<Segment>> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, description, created_at, updated_at FROM segments ORDER BY key",
                )?;
                let mut segments = stmt
                    .query_map([], segment_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                for segment in &mut segments {
                    segment.conditions = load_segment_conditions(conn, &segment.key)?;
                }
                Ok(segments)
            })
            .await?)
    }

    async fn update_segment(
        &self,
        key: &str,
        req: UpdateSegmentRequest,
    ) -> Result<Option<Segment>> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                let mut segment = match get_segment_sync(conn, &key)? {
                    Some(s) => s,
                    None => return Ok(Ok(None)),
                };

                if let Some(description) = req.description {
                    segment.description = description;
                }
                segment.updated_at = Utc::now();

                let tx = conn.transaction()?;
                tx.execute(
                    "UPDATE segments SET description = ?1, updated_at = ?2 WHERE key = ?3",
                    params![segment.description, segment.updated_at, key],
                )?;
                if let Some(conditions) = req.conditions {
                    tx.execute(
                        "DELETE FROM segment_conditions WHERE segment_key = ?1",
                        [&key],
                    )?;
                    insert_segment_conditions(&tx, &key, &conditions)?;
                    segment.conditions = conditions;
                }
                tx.commit()?;
                Ok(Ok(Some(segment)))
            })
            .await?
    }

    async fn delete_segment(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                let references: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM rule_segments WHERE segment_key = ?1",
                    [&key],
                    |row| row.get(0),
                )?;
                if references > 0 {
                    return Ok(Err(Error::SegmentInUse(key)));
                }

                let n = conn.execute("DELETE FROM segments WHERE key = ?1", [&key])?;
                if n == 0 {
                    return Ok(Err(Error::NotFound("segment")));
                }
                Ok(Ok(()))
            })
            .await?
    }

    // ── Evaluation ──────────────────────────────────────────────────────────

    async fn get_flag_for_evaluation(&self, key: &str) -> Result<Option<Flag>> {
        let key = key.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                let mut flag = match get_flag_sync(conn, &key)? {
                    Some(f) => f,
                    None => return Ok(None),
                };

                let referenced: HashSet<String> = flag
                    .rules
                    .iter()
                    .flat_map(|r| r.segment_keys.iter().cloned())
                    .collect();
                for segment_key in referenced {
                    // A dangling reference stays out of the map; the
                    // evaluator fails the rule closed.
                    if let Some(segment) = get_segment_sync(conn, &segment_key)? {
                        flag.segments.insert(segment_key, segment);
                    }
                }
                Ok(Some(flag))
            })
            .await?)
    }

    // ── API keys ────────────────────────────────────────────────────────────

    async fn create_api_key(&self, key: &ApiKey, hashed_key: &str) -> Result<()> {
        let key = key.clone();
        let hashed_key = hashed_key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO api_keys (id, name, environment, prefix, hashed_key, revoked, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        key.id,
                        key.name,
                        key.environment.as_str(),
                        key.prefix,
                        hashed_key,
                        key.revoked,
                        key.created_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, environment, prefix, revoked, created_at, last_used_at
                     FROM api_keys ORDER BY created_at DESC",
                )?;
                let keys = stmt
                    .query_map([], api_key_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(keys)
            })
            .await?)
    }

    async fn validate_api_key(&self, hashed_key: &str) -> Result<Option<ApiKey>> {
        let hashed_key = hashed_key.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                let key = conn
                    .query_row(
                        "SELECT id, name, environment, prefix, revoked, created_at, last_used_at
                         FROM api_keys WHERE hashed_key = ?1 AND revoked = 0",
                        [&hashed_key],
                        api_key_from_row,
                    )
                    .optional()?;

                if let Some(key) = &key {
                    conn.execute(
                        "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
                        params![Utc::now(), key.id],
                    )?;
                }
                Ok(key)
            })
            .await?)
    }

    async fn revoke_api_key(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let n = conn.execute("UPDATE api_keys SET revoked = 1 WHERE id = ?1", [&id])?;
                if n == 0 {
                    return Ok(Err(Error::NotFound("api key")));
                }
                Ok(Ok(()))
            })
            .await?
    }
}

// ── Row mapping ─────────────────────────────────────────────────────────────

fn conversion_err(
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_json(text: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(text).map_err(conversion_err)
}

fn flag_from_row(row: &rusqlite::Row) -> rusqlite::Result<Flag> {
    let kind: String = row.get(1)?;
    let default_value: String = row.get(4)?;
    Ok(Flag {
        key: row.get(0)?,
        kind: kind.parse::<FlagType>().map_err(conversion_err)?,
        description: row.get(2)?,
        enabled: row.get(3)?,
        default_value: parse_json(&default_value)?,
        rules: Vec::new(),
        segments: HashMap::new(),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn segment_from_row(row: &rusqlite::Row) -> rusqlite::Result<Segment> {
    Ok(Segment {
        key: row.get(0)?,
        description: row.get(1)?,
        conditions: Vec::new(),
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn api_key_from_row(row: &rusqlite::Row) -> rusqlite::Result<ApiKey> {
    let environment: String = row.get(2)?;
    Ok(ApiKey {
        id: row.get(0)?,
        name: row.get(1)?,
        environment: environment.parse().map_err(conversion_err)?,
        prefix: row.get(3)?,
        revoked: row.get(4)?,
        created_at: row.get(5)?,
        last_used_at: row.get(6)?,
    })
}

fn condition_from_row(row: &rusqlite::Row) -> rusqlite::Result<Condition> {
    let operator: String = row.get(1)?;
    let value: String = row.get(2)?;
    Ok(Condition {
        attribute: row.get(0)?,
        operator: operator.parse::<Op>().map_err(conversion_err)?,
        value: parse_json(&value)?,
    })
}

// ── Sync helpers (run inside connection closures) ───────────────────────────

fn get_flag_sync(conn: &rusqlite::Connection, key: &str) -> rusqlite::Result<Option<Flag>> {
    let flag = conn
        .query_row(
            "SELECT key, type, description, enabled, default_value, created_at, updated_at
             FROM flags WHERE key = ?1",
            [key],
            flag_from_row,
        )
        .optional()?;

    match flag {
        Some(mut flag) => {
            flag.rules = load_rules(conn, key)?;
            Ok(Some(flag))
        }
        None => Ok(None),
    }
}

fn load_rules(conn: &rusqlite::Connection, flag_key: &str) -> rusqlite::Result<Vec<Rule>> {
    let mut stmt = conn.prepare(
        "SELECT id, flag_key, description, value, priority, rollout_percentage, created_at, updated_at
         FROM rules WHERE flag_key = ?1 ORDER BY priority, id",
    )?;
    let mut rules = stmt
        .query_map([flag_key], |row| {
            let value: String = row.get(3)?;
            Ok(Rule {
                id: row.get(0)?,
                flag_key: row.get(1)?,
                description: row.get(2)?,
                value: parse_json(&value)?,
                priority: row.get(4)?,
                rollout_percentage: row.get(5)?,
                conditions: Vec::new(),
                segment_keys: Vec::new(),
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for rule in &mut rules {
        rule.conditions = load_rule_conditions(conn, rule.id)?;

        let mut stmt = conn.prepare(
            "SELECT segment_key FROM rule_segments WHERE rule_id = ?1 ORDER BY segment_key",
        )?;
        rule.segment_keys = stmt
            .query_map([rule.id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
    }
    Ok(rules)
}

fn load_rule_conditions(
    conn: &rusqlite::Connection,
    rule_id: i64,
) -> rusqlite::Result<Vec<Condition>> {
    let mut stmt = conn.prepare(
        "SELECT attribute, operator, value FROM conditions WHERE rule_id = ?1 ORDER BY id",
    )?;
    let result = stmt
        .query_map([rule_id], condition_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>();
    result
}

fn get_segment_sync(conn: &rusqlite::Connection, key: &str) -> rusqlite::Result<Option<Segment>> {
    let segment = conn
        .query_row(
            "SELECT key, description, created_at, updated_at FROM segments WHERE key = ?1",
            [key],
            segment_from_row,
        )
        .optional()?;

    match segment {
        Some(mut segment) => {
            segment.conditions = load_segment_conditions(conn, key)?;
            Ok(Some(segment))
        }
        None => Ok(None),
    }
}

fn load_segment_conditions(
    conn: &rusqlite::Connection,
    segment_key: &str,
) -> rusqlite::Result<Vec<Condition>> {
    let mut stmt = conn.prepare(
        "SELECT attribute, operator, value FROM segment_conditions WHERE segment_key = ?1 ORDER BY id",
    )?;
    let result = stmt
        .query_map([segment_key], condition_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>();
    result
}

fn insert_rule_conditions(
    conn: &rusqlite::Connection,
    rule_id: i64,
    conditions: &[Condition],
) -> rusqlite::Result<()> {
    for c in conditions {
        conn.execute(
            "INSERT INTO conditions (rule_id, attribute, operator, value) VALUES (?1, ?2, ?3, ?4)",
            params![rule_id, c.attribute, c.operator.as_str(), c.value.to_string()],
        )?;
    }
    Ok(())
}

fn insert_segment_conditions(
    conn: &rusqlite::Connection,
    segment_key: &str,
    conditions: &[Condition],
) -> rusqlite::Result<()> {
    for c in conditions {
        conn.execute(
            "INSERT INTO segment_conditions (segment_key, attribute, operator, value)
             VALUES (?1, ?2, ?3, ?4)",
            params![segment_key, c.attribute, c.operator.as_str(), c.value.to_string()],
        )?;
    }
    Ok(())
}

fn find_missing_segment(
    conn: &rusqlite::Connection,
    keys: &[String],
) -> rusqlite::Result<Option<String>> {
    for key in keys {
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM segments WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Ok(Some(key.clone()));
        }
    }
    Ok(None)
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
