use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::store::{Document, StoredDocument};

/// Known racer fields. Anything outside this set is never sent to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RacerField {
    Id,
    Number,
    FirstName,
    LastName,
    Gender,
    Group,
    Secs,
}

impl RacerField {
    pub const ALL: [RacerField; 7] = [
        Self::Id,
        Self::Number,
        Self::FirstName,
        Self::LastName,
        Self::Gender,
        Self::Group,
        Self::Secs,
    ];

    /// Fields held in the document body; also the set `update` accepts.
    pub const STORED: [RacerField; 6] = [
        Self::Number,
        Self::FirstName,
        Self::LastName,
        Self::Gender,
        Self::Group,
        Self::Secs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Number => "number",
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Gender => "gender",
            Self::Group => "group",
            Self::Secs => "secs",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Number | Self::Secs)
    }

    /// Normalise a raw value into the shape stored for this field.
    pub fn coerce(&self, value: &Value) -> Result<Value> {
        if self.is_integer() {
            Ok(integer_value(*self, value)?.map_or(Value::Null, Value::from))
        } else {
            Ok(text_value(*self, value)?.map_or(Value::Null, Value::String))
        }
    }
}

impl FromStr for RacerField {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| StorageError::invalid_argument(format!("unknown field '{}'", s)))
    }
}

impl fmt::Display for RacerField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A race participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Racer {
    pub id: Option<String>,
    pub number: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub group: Option<String>,
    pub secs: Option<i64>,
}

impl Racer {
    /// Hydrate from a stored document. Missing or unreadable fields stay empty.
    pub fn from_document(document: &StoredDocument) -> Self {
        let mut racer = Self {
            id: Some(document.id.to_string()),
            ..Self::default()
        };

        for field in RacerField::STORED {
            if let Some(value) = document.body.get(field.as_str()) {
                // Foreign writers may have stored anything; ignore what doesn't fit.
                if let Ok(value) = field.coerce(value) {
                    racer.set(field, &value);
                }
            }
        }

        racer
    }

    /// Build from a plain field mapping such as decoded form or JSON input.
    ///
    /// An `id` entry is carried over so a previously persisted record can be
    /// re-hydrated. Unknown keys are ignored.
    pub fn from_input(input: &Document) -> Result<Self> {
        let mut racer = Self {
            id: input
                .get(RacerField::Id.as_str())
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from),
            ..Self::default()
        };

        for field in RacerField::STORED {
            if let Some(value) = input.get(field.as_str()) {
                let value = field.coerce(value)?;
                racer.set(field, &value);
            }
        }

        Ok(racer)
    }

    /// Body written to the store. All stored fields are present; empty ones are null.
    pub fn to_document(&self) -> Document {
        RacerField::STORED
            .into_iter()
            .map(|field| (field.as_str().to_string(), self.get(field)))
            .collect()
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn get(&self, field: RacerField) -> Value {
        match field {
            RacerField::Id => self.id.clone().map_or(Value::Null, Value::String),
            RacerField::Number => self.number.map_or(Value::Null, Value::from),
            RacerField::FirstName => self.first_name.clone().map_or(Value::Null, Value::String),
            RacerField::LastName => self.last_name.clone().map_or(Value::Null, Value::String),
            RacerField::Gender => self.gender.clone().map_or(Value::Null, Value::String),
            RacerField::Group => self.group.clone().map_or(Value::Null, Value::String),
            RacerField::Secs => self.secs.map_or(Value::Null, Value::from),
        }
    }

    /// Copy already-coerced changes onto this record.
    pub(crate) fn apply(&mut self, changes: &Document) {
        for field in RacerField::STORED {
            if let Some(value) = changes.get(field.as_str()) {
                self.set(field, value);
            }
        }
    }

    fn set(&mut self, field: RacerField, value: &Value) {
        let text = || value.as_str().map(String::from);
        match field {
            RacerField::Id => self.id = text(),
            RacerField::Number => self.number = value.as_i64(),
            RacerField::FirstName => self.first_name = text(),
            RacerField::LastName => self.last_name = text(),
            RacerField::Gender => self.gender = text(),
            RacerField::Group => self.group = text(),
            RacerField::Secs => self.secs = value.as_i64(),
        }
    }

    pub fn full_name(&self) -> Option<String> {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(name), None) | (None, Some(name)) => Some(name.to_string()),
            (None, None) => None,
        }
    }

    pub fn finish_time(&self) -> Option<TimeDelta> {
        self.secs
            .filter(|secs| *secs >= 0)
            .and_then(TimeDelta::try_seconds)
    }

    /// Finish time as `H:MM:SS`.
    pub fn formatted_time(&self) -> Option<String> {
        self.finish_time().map(|time| {
            let total = time.num_seconds();
            format!(
                "{}:{:02}:{:02}",
                total / 3600,
                (total % 3600) / 60,
                total % 60
            )
        })
    }
}

fn integer_value(field: RacerField, value: &Value) -> Result<Option<i64>> {
    let invalid = || {
        StorageError::invalid_argument(format!("{} must be an integer, got {}", field, value))
    };

    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Some(i)),
            None => n
                .as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| Some(f.trunc() as i64))
                .ok_or_else(invalid),
        },
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse::<i64>().map(Some).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn text_value(field: RacerField, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        _ => Err(StorageError::invalid_argument(format!(
            "{} must be a string, got {}",
            field, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentId;
    use serde_json::json;

    fn input(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_input_coerces_numbers() {
        let racer = Racer::from_input(&input(json!({
            "number": "42",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "gender": "F",
            "group": 40,
            "secs": 3725.9,
            "shoe_size": 38
        })))
        .unwrap();

        assert_eq!(racer.id, None);
        assert_eq!(racer.number, Some(42));
        assert_eq!(racer.group.as_deref(), Some("40"));
        assert_eq!(racer.secs, Some(3725));
        assert_eq!(racer.full_name().as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn test_from_input_keeps_identifier() {
        let id = DocumentId::generate().to_string();
        let racer = Racer::from_input(&input(json!({ "id": id, "number": 1 }))).unwrap();

        assert_eq!(racer.id, Some(id));
        assert!(racer.is_persisted());
    }

    #[test]
    fn test_from_input_leaves_missing_fields_empty() {
        let racer = Racer::from_input(&input(json!({ "number": "", "first_name": null }))).unwrap();

        assert_eq!(racer, Racer::default());
    }

    #[test]
    fn test_from_input_rejects_non_numeric_number() {
        let result = Racer::from_input(&input(json!({ "number": "twelve" })));
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));

        let result = Racer::from_input(&input(json!({ "last_name": ["a", "b"] })));
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
    }

    #[test]
    fn test_from_document_fills_all_fields() {
        let document = StoredDocument {
            id: DocumentId::generate(),
            body: input(json!({ "number": 7, "last_name": "Smith", "secs": "bogus" })),
        };

        let racer = Racer::from_document(&document);

        assert_eq!(racer.id, Some(document.id.to_string()));
        assert_eq!(racer.number, Some(7));
        assert_eq!(racer.last_name.as_deref(), Some("Smith"));
        assert_eq!(racer.first_name, None);
        assert_eq!(racer.secs, None);
    }

    #[test]
    fn test_to_document_writes_nulls() {
        let racer = Racer {
            number: Some(3),
            ..Racer::default()
        };

        let document = racer.to_document();

        assert_eq!(document.len(), 6);
        assert_eq!(document.get("number"), Some(&json!(3)));
        assert_eq!(document.get("gender"), Some(&Value::Null));
        assert!(!document.contains_key("id"));
    }

    #[test]
    fn test_formatted_time() {
        let racer = Racer {
            secs: Some(3725),
            ..Racer::default()
        };
        assert_eq!(racer.formatted_time().as_deref(), Some("1:02:05"));

        let racer = Racer {
            secs: Some(59),
            ..Racer::default()
        };
        assert_eq!(racer.formatted_time().as_deref(), Some("0:00:59"));

        assert_eq!(Racer::default().formatted_time(), None);
    }

    #[test]
    fn test_field_parsing() {
        assert_eq!("first_name".parse::<RacerField>().unwrap(), RacerField::FirstName);
        assert!("city".parse::<RacerField>().is_err());
    }
}
