use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use drover_core::error::{DroverError, Result};

/// Shared state threaded through one graph run.
///
/// Keys are field names; values are JSON. List-valued fields accumulate:
/// once a field holds an array, merged arrays extend it and merged scalars
/// are pushed onto it. Non-list fields overwrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    data: HashMap<String, Value>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state from initial data.
    pub fn from_map(data: HashMap<String, Value>) -> Self {
        Self { data }
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Get a value as a bool, if it's a bool.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }

    /// Items of a list field; empty when the field is absent or not a list.
    pub fn get_list(&self, key: &str) -> &[Value] {
        self.data
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// String field that a previous step must have written.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| DroverError::MissingField(key.to_string()))
    }

    /// Bool field that a previous step must have written.
    pub fn require_bool(&self, key: &str) -> Result<bool> {
        self.get_bool(key)
            .ok_or_else(|| DroverError::MissingField(key.to_string()))
    }

    /// Deserialize a field into a concrete type.
    pub fn require_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .data
            .get(key)
            .ok_or_else(|| DroverError::MissingField(key.to_string()))?;
        serde_json::from_value(value.clone())
            .map_err(|e| DroverError::MissingField(format!("{}: {}", key, e)))
    }

    /// List field deserialized item by item; absent lists are empty.
    pub fn list_as<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        if !self.data.contains_key(key) {
            return Ok(Vec::new());
        }
        self.require_as(key)
    }

    /// String items of a list field, skipping non-strings.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.get_list(key)
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    }

    /// Set a value, replacing any existing one.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Set a string value.
    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), Value::String(value.into()));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Merge a step's update. An existing list is never replaced: arrays
    /// extend it and single values are pushed onto it.
    pub fn merge(&mut self, update: StateUpdate) {
        for (key, value) in update.data {
            match value {
                Value::Array(items) => match self.data.get_mut(&key) {
                    Some(Value::Array(existing)) => existing.extend(items),
                    _ => {
                        self.data.insert(key, Value::Array(items));
                    }
                },
                value => match self.data.get_mut(&key) {
                    Some(Value::Array(existing)) => existing.push(value),
                    _ => {
                        self.data.insert(key, value);
                    }
                },
            }
        }
    }

    /// Get the underlying data map.
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }
}

/// Partial state produced by one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    data: HashMap<String, Value>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a field (overwrites on merge unless the field already holds a list).
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Queue one item for appending to a list field.
    pub fn append(mut self, key: impl Into<String>, item: impl Into<Value>) -> Self {
        let entry = self
            .data
            .entry(key.into())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => items.push(item.into()),
            other => *other = Value::Array(vec![item.into()]),
        }
        self
    }

    /// Queue a serializable item (e.g. a history entry) for appending.
    pub fn append_ser<T: Serialize>(self, key: impl Into<String>, item: &T) -> Result<Self> {
        Ok(self.append(key, serde_json::to_value(item)?))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_operations() {
        let mut state = PipelineState::new();
        state.set_str("user_query", "where is my coupon");
        state.set("is_passed", json!(true));

        assert_eq!(state.get_str("user_query"), Some("where is my coupon"));
        assert_eq!(state.get_bool("is_passed"), Some(true));
        assert_eq!(state.get("missing"), None);
        assert!(state.get_list("missing").is_empty());
    }

    #[test]
    fn test_merge_overwrites_scalars() {
        let mut state = PipelineState::new();
        state.set_str("reason", "first");
        state.merge(StateUpdate::new().set("reason", "second").set("is_passed", false));

        assert_eq!(state.get_str("reason"), Some("second"));
        assert_eq!(state.get_bool("is_passed"), Some(false));
    }

    #[test]
    fn test_merge_appends_lists() {
        let mut state = PipelineState::new();
        state.merge(StateUpdate::new().append("thought", "look up coupons"));
        state.merge(
            StateUpdate::new()
                .append("thought", "answer the user")
                .append("thought", "done"),
        );

        assert_eq!(
            state.string_list("thought"),
            vec!["look up coupons", "answer the user", "done"]
        );
    }

    #[test]
    fn test_scalar_write_appends_to_list() {
        let mut state = PipelineState::new();
        state.merge(StateUpdate::new().append("observation", "first tool result"));
        state.merge(StateUpdate::new().set("observation", "second tool result"));

        assert_eq!(
            state.string_list("observation"),
            vec!["first tool result", "second tool result"]
        );
    }

    #[test]
    fn test_list_replaces_non_list() {
        let mut state = PipelineState::new();
        state.set_str("observation", "scalar");
        state.merge(StateUpdate::new().append("observation", "first"));
        assert_eq!(state.string_list("observation"), vec!["first"]);
    }

    #[test]
    fn test_require_missing_field() {
        let state = PipelineState::new();
        assert!(matches!(
            state.require_str("cleaned_dialog"),
            Err(DroverError::MissingField(f)) if f == "cleaned_dialog"
        ));
        assert!(state.require_bool("is_end").is_err());
        assert!(state.list_as::<String>("history").unwrap().is_empty());
    }

    #[test]
    fn test_typed_lists() {
        use drover_core::types::HistoryEntry;

        let update = StateUpdate::new()
            .append_ser("history", &HistoryEntry::user("prompt"))
            .unwrap()
            .append_ser("history", &HistoryEntry::assistant("reply"))
            .unwrap();
        let mut state = PipelineState::new();
        state.merge(update);

        let history: Vec<HistoryEntry> = state.list_as("history").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1], HistoryEntry::assistant("reply"));
    }

    #[test]
    fn test_from_map() {
        let mut map = HashMap::new();
        map.insert("intent".into(), json!("coupon inquiry"));
        let state = PipelineState::from_map(map);
        assert_eq!(state.get_str("intent"), Some("coupon inquiry"));
        assert!(state.contains("intent"));
    }
}
