//! Quest Data Bag
//!
//! Each quest definition declares a schema: the named fields its stages may
//! read and write, with a typed default per field. A quest instance carries
//! one data bag shaped by that schema, plus a reserved per-stage scratch
//! mapping for stages that need to remember intermediate progress (e.g. the
//! time they last checked an external service).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{QuestError, QuestLoadError};

/// Declared shape of a quest's data bag: field name -> typed default.
#[derive(Debug, Clone, Default)]
pub struct DataSchema {
    defaults: BTreeMap<String, Value>,
}

impl DataSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field with its default value; the default's JSON type is
    /// the field's type.
    pub fn field(mut self, name: &str, default: Value) -> Self {
        self.defaults.insert(name.to_string(), default);
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.defaults.contains_key(name)
    }

    /// A fresh data bag with every field at its default.
    pub fn instantiate(&self) -> QuestData {
        QuestData {
            values: self.defaults.clone(),
            stage_data: BTreeMap::new(),
            last_run: None,
        }
    }

    /// Parse a serialized data body against this schema. Unknown fields and
    /// type mismatches are load errors; missing fields take their defaults.
    pub fn parse(&self, raw: &str) -> Result<QuestData, QuestLoadError> {
        let parsed: RawQuestData = serde_json::from_str(raw)
            .map_err(|e| QuestLoadError::MalformedData(e.to_string()))?;

        let mut values = self.defaults.clone();
        for (name, value) in parsed.values {
            let Some(default) = self.defaults.get(&name) else {
                return Err(QuestLoadError::MalformedData(format!(
                    "unknown field '{}'",
                    name
                )));
            };
            if json_kind(default) != json_kind(&value) {
                return Err(QuestLoadError::MalformedData(format!(
                    "field '{}' expected {}, got {}",
                    name,
                    json_kind(default),
                    json_kind(&value)
                )));
            }
            values.insert(name, value);
        }

        Ok(QuestData {
            values,
            stage_data: parsed.stage_data,
            last_run: parsed.last_run,
        })
    }
}

/// Serialized form of the data bag. Kept lenient on missing sections so a
/// record written before a stage ever ran still parses, but strict on
/// unknown sections.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawQuestData {
    values: BTreeMap<String, Value>,
    stage_data: BTreeMap<String, Value>,
    last_run: Option<DateTime<Utc>>,
}

/// The mutable state a quest's stages may read and write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestData {
    values: BTreeMap<String, Value>,
    /// Opaque per-stage scratch, keyed by stage name
    stage_data: BTreeMap<String, Value>,
    /// Stamped every time a stage executes
    pub last_run: Option<DateTime<Utc>>,
}

impl QuestData {
    /// Read a declared field.
    pub fn get(&self, field: &str) -> Result<&Value, QuestError> {
        self.values
            .get(field)
            .ok_or_else(|| QuestError::Data(format!("no field '{}'", field)))
    }

    /// Write a declared field. Fields cannot be invented at runtime; the
    /// schema is fixed at definition time.
    pub fn set(&mut self, field: &str, value: Value) -> Result<(), QuestError> {
        if !self.values.contains_key(field) {
            return Err(QuestError::Data(format!("no field '{}'", field)));
        }
        self.values.insert(field.to_string(), value);
        Ok(())
    }

    pub fn stage_data(&self, stage: &str) -> Option<&Value> {
        self.stage_data.get(stage)
    }

    pub fn set_stage_data(&mut self, stage: &str, value: Value) {
        self.stage_data.insert(stage.to_string(), value);
    }

    /// Serialize for storage.
    pub fn to_json(&self) -> Result<String, QuestError> {
        serde_json::to_string(self).map_err(|e| QuestError::Data(e.to_string()))
    }
}

/// JSON type name, used for schema checks and error messages.
fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
