use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The caller-supplied evaluation context: an arbitrary JSON object describing
/// the current user or request. There is no schema; conditions address into it
/// with dot-separated attribute paths such as `user.meta.role`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Context(Map<String, Value>);

impl Context {
    pub fn new() -> Self {
        Context(Map::new())
    }

    /// Resolve a dot-separated attribute path against the context.
    ///
    /// Returns None if any intermediate hop is not an object or any key is
    /// missing. A missing attribute is not an error; operators treat it as a
    /// silent non-match (except `exists`).
    pub fn resolve(&self, attribute: &str) -> Option<&Value> {
        let mut parts = attribute.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// The stable identifier used for rollout bucketing, probed in order from
    /// top-level `entity_id`, top-level `user_id`, then nested `user.id`.
    /// A candidate that does not coerce to a string is skipped.
    pub fn entity_id(&self) -> Option<String> {
        for key in ["entity_id", "user_id"] {
            if let Some(id) = self.0.get(key).and_then(coerce_str) {
                return Some(id);
            }
        }
        self.resolve("user.id").and_then(coerce_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Builds a context from any JSON value; anything other than an object yields
/// an empty context.
impl From<Value> for Context {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Context(map),
            _ => Context::default(),
        }
    }
}

/// Coerce a JSON value to a string: strings pass through, numbers render in
/// shortest round-trip form, booleans render `true`/`false`. Arrays, objects
/// and null fail the coercion.
pub(crate) fn coerce_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| f.to_string())
            }
        }
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Coerce a JSON value to a double. Only numbers pass.
pub(crate) fn coerce_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Type-aware equality: numeric comparison first, then string, then
/// bool-vs-bool, otherwise unequal. Integer-vs-float equality follows from
/// the IEEE-754 compare (`42 == 42.0`).
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (coerce_f64(a), coerce_f64(b)) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (coerce_str(a), coerce_str(b)) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_bool(), b.as_bool()) {
        return x == y;
    }
    false
}
