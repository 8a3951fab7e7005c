use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted key/value state scoped to a job instance or to one of its
/// steps.
///
/// The chunk executor publishes a snapshot of the owning step's context at
/// every chunk commit, which is what allows a restarted execution to resume
/// from the last committed chunk instead of from the beginning. Values are
/// arbitrary JSON so components can stash whatever serializable state they
/// need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &str, value: impl Into<Value>) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key)
            .and_then(Value::as_u64)
            .map(|value| value as usize)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let mut context = ExecutionContext::new();
        context.put("count", 3);
        context.put("label", "resume");
        context.put("done", true);

        assert_eq!(context.get_usize("count"), Some(3));
        assert_eq!(context.get_i64("count"), Some(3));
        assert_eq!(context.get_str("label"), Some("resume"));
        assert_eq!(context.get_bool("done"), Some(true));
        assert_eq!(context.get_str("count"), None);
        assert!(context.contains_key("label"));
        assert_eq!(context.len(), 3);
    }

    #[test]
    fn survives_a_serde_round_trip() {
        let mut context = ExecutionContext::new();
        context.put("position", 128);
        context.put("source", "lines.txt");

        let serialized = serde_json::to_string(&context).expect("serialize");
        let restored: ExecutionContext = serde_json::from_str(&serialized).expect("deserialize");

        assert_eq!(restored, context);
    }
}
