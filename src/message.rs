//! Nested protocol messages as seen by the field extractor
//!
//! The ads platform client hands back dynamically shaped messages. The
//! extractor only needs to list the fields that are present on a message,
//! so that is all [`FieldListable`] asks for. [`Message`] is an owned,
//! in-memory implementation that can be built by hand or from plain JSON.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Symbolic names declared by an enum type
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnumDescriptor {
    pub name: String,
    pub values: BTreeMap<i64, String>,
}

impl EnumDescriptor {
    pub fn new<'a>(name: impl Into<String>, values: impl IntoIterator<Item = (i64, &'a str)>) -> Self {
        EnumDescriptor {
            name: name.into(),
            values: values
                .into_iter()
                .map(|(code, symbol)| (code, symbol.to_string()))
                .collect(),
        }
    }

    /// Symbolic name for an integer code
    pub fn name_of(&self, code: i64) -> Option<&str> {
        self.values.get(&code).map(String::as_str)
    }

    /// Replace enum codes with their names, element-wise over arrays.
    ///
    /// Null is returned untouched and never looked up. Values that are already
    /// a declared name pass through, so substituting twice is harmless. Codes
    /// the enum does not declare degrade to null.
    pub fn substitute(&self, value: &Value) -> Value {
        match value {
            Value::Null => Value::Null,
            Value::Array(items) => Value::Array(items.iter().map(|v| self.substitute(v)).collect()),
            Value::String(s) if self.values.values().any(|name| name == s) => value.clone(),
            other => match other.as_i64().and_then(|code| self.name_of(code)) {
                Some(name) => Value::String(name.to_string()),
                None => {
                    warn!(enum_type = %self.name, value = %other, "Unknown enum value");
                    Value::Null
                }
            },
        }
    }
}

/// Static metadata for one field of a message
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    /// The field holds nested messages rather than scalars
    pub message: bool,
    pub repeated: bool,
    pub enum_type: Option<Arc<EnumDescriptor>>,
}

impl FieldDescriptor {
    pub fn scalar(name: impl Into<String>) -> Self {
        FieldDescriptor {
            name: name.into(),
            message: false,
            repeated: false,
            enum_type: None,
        }
    }

    pub fn message(name: impl Into<String>) -> Self {
        FieldDescriptor {
            message: true,
            ..Self::scalar(name)
        }
    }

    pub fn enumeration(name: impl Into<String>, enum_type: Arc<EnumDescriptor>) -> Self {
        FieldDescriptor {
            enum_type: Some(enum_type),
            ..Self::scalar(name)
        }
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }
}

/// The value of a present field, borrowed from its message
#[derive(Clone)]
pub enum FieldValue<'a> {
    Scalar(&'a Value),
    Scalars(&'a [Value]),
    Message(&'a dyn FieldListable),
    Messages(Vec<&'a dyn FieldListable>),
}

impl std::fmt::Debug for FieldValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            FieldValue::Scalars(vs) => f.debug_tuple("Scalars").field(vs).finish(),
            FieldValue::Message(_) => f.write_str("Message(..)"),
            FieldValue::Messages(ms) => write!(f, "Messages(len={})", ms.len()),
        }
    }
}

/// One present field: its descriptor and its value
#[derive(Debug, Clone)]
pub struct Field<'a> {
    pub descriptor: &'a FieldDescriptor,
    pub value: FieldValue<'a>,
}

impl<'a> Field<'a> {
    pub fn name(&self) -> &'a str {
        &self.descriptor.name
    }
}

/// A nested message that can list its present fields in declaration order
pub trait FieldListable {
    fn list_fields(&self) -> Vec<Field<'_>>;
}

/// Stored value of a [`Message`] field
#[derive(Debug, Clone, PartialEq)]
pub enum MessageValue {
    Scalar(Value),
    Scalars(Vec<Value>),
    Message(Message),
    Messages(Vec<Message>),
}

/// Owned dynamic message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    fields: Vec<StoredField>,
}

#[derive(Debug, Clone, PartialEq)]
struct StoredField {
    descriptor: FieldDescriptor,
    value: MessageValue,
}

impl Message {
    pub fn new() -> Self {
        Message::default()
    }

    /// Append a field; builder style
    pub fn with_field(mut self, descriptor: FieldDescriptor, value: MessageValue) -> Self {
        self.push(descriptor, value);
        self
    }

    pub fn push(&mut self, descriptor: FieldDescriptor, value: MessageValue) {
        self.fields.push(StoredField { descriptor, value });
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a message from a JSON object.
    ///
    /// Objects become nested messages, non-empty arrays of objects become
    /// repeated messages and other non-empty arrays become repeated scalars.
    /// Null and empty arrays count as fields that are not set. Scalars whose
    /// dotted path has an enum binding are typed as that enum.
    ///
    /// Returns `None` when `value` is not an object.
    pub fn from_json(value: &Value, enums: &EnumBindings) -> Option<Message> {
        match value {
            Value::Object(obj) => Some(Self::from_object(obj, enums, &mut Vec::new())),
            _ => None,
        }
    }

    fn from_object(obj: &Map<String, Value>, enums: &EnumBindings, path: &mut Vec<String>) -> Message {
        let mut message = Message::new();

        for (key, value) in obj {
            path.push(key.clone());
            match value {
                Value::Null => {}
                Value::Object(child) => {
                    let child = Self::from_object(child, enums, path);
                    message.push(FieldDescriptor::message(key.as_str()), MessageValue::Message(child));
                }
                Value::Array(items) if items.is_empty() => {}
                Value::Array(items) if items.iter().all(Value::is_object) => {
                    let children = items
                        .iter()
                        .filter_map(Value::as_object)
                        .map(|child| Self::from_object(child, enums, path))
                        .collect();
                    message.push(
                        FieldDescriptor::message(key.as_str()).repeated(),
                        MessageValue::Messages(children),
                    );
                }
                Value::Array(items) => {
                    let descriptor = Self::scalar_descriptor(key, enums, path).repeated();
                    message.push(descriptor, MessageValue::Scalars(items.clone()));
                }
                scalar => {
                    let descriptor = Self::scalar_descriptor(key, enums, path);
                    message.push(descriptor, MessageValue::Scalar(scalar.clone()));
                }
            }
            path.pop();
        }

        message
    }

    fn scalar_descriptor(key: &str, enums: &EnumBindings, path: &[String]) -> FieldDescriptor {
        match enums.get(&path.join(".")) {
            Some(enum_type) => FieldDescriptor::enumeration(key, enum_type),
            None => FieldDescriptor::scalar(key),
        }
    }
}

impl FieldListable for Message {
    fn list_fields(&self) -> Vec<Field<'_>> {
        self.fields
            .iter()
            .map(|stored| Field {
                descriptor: &stored.descriptor,
                value: match &stored.value {
                    MessageValue::Scalar(v) => FieldValue::Scalar(v),
                    MessageValue::Scalars(vs) => FieldValue::Scalars(vs),
                    MessageValue::Message(m) => FieldValue::Message(m),
                    MessageValue::Messages(ms) => {
                        FieldValue::Messages(ms.iter().map(|m| m as &dyn FieldListable).collect())
                    }
                },
            })
            .collect()
    }
}

/// Enum types keyed by dotted field path, e.g. `campaign.status`
#[derive(Debug, Clone, Default)]
pub struct EnumBindings {
    by_path: HashMap<String, Arc<EnumDescriptor>>,
}

impl EnumBindings {
    pub fn new() -> Self {
        EnumBindings::default()
    }

    pub fn bind(mut self, path: impl Into<String>, enum_type: Arc<EnumDescriptor>) -> Self {
        self.by_path.insert(path.into(), enum_type);
        self
    }

    pub fn get(&self, path: &str) -> Option<Arc<EnumDescriptor>> {
        self.by_path.get(path).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

impl From<HashMap<String, EnumDescriptor>> for EnumBindings {
    fn from(map: HashMap<String, EnumDescriptor>) -> Self {
        EnumBindings {
            by_path: map.into_iter().map(|(path, e)| (path, Arc::new(e))).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status_enum() -> Arc<EnumDescriptor> {
        Arc::new(EnumDescriptor::new(
            "CampaignStatus",
            [(0, "UNSPECIFIED"), (2, "ENABLED"), (3, "PAUSED")],
        ))
    }

    #[test]
    fn test_substitute_enum_values() {
        let status = status_enum();

        assert_eq!(status.substitute(&json!(2)), json!("ENABLED"));
        assert_eq!(status.substitute(&json!([2, 3])), json!(["ENABLED", "PAUSED"]));
        assert_eq!(status.substitute(&Value::Null), Value::Null);
        assert_eq!(status.substitute(&json!("PAUSED")), json!("PAUSED"));
        assert_eq!(status.substitute(&json!(42)), Value::Null);
    }

    #[test]
    fn test_from_json_shapes() {
        let input = json!({
            "campaign": {"id": 1, "status": 2},
            "labels": ["a", "b"],
            "assets": [{"id": 10}, {"id": 11}],
            "empty": [],
            "missing": null
        });
        let enums = EnumBindings::new().bind("campaign.status", status_enum());

        let message = Message::from_json(&input, &enums).unwrap();
        let fields = message.list_fields();
        let names: Vec<&str> = fields.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["campaign", "labels", "assets"]);

        assert!(fields[0].descriptor.message);
        assert!(!fields[0].descriptor.repeated);
        assert!(!fields[1].descriptor.message);
        assert!(fields[1].descriptor.repeated);
        assert!(fields[2].descriptor.message);
        assert!(fields[2].descriptor.repeated);

        let FieldValue::Message(campaign) = &fields[0].value else {
            panic!("Expected nested campaign message");
        };
        let campaign_fields = campaign.list_fields();
        assert!(campaign_fields[0].descriptor.enum_type.is_none());
        assert_eq!(
            campaign_fields[1].descriptor.enum_type.as_deref().map(|e| e.name.as_str()),
            Some("CampaignStatus")
        );
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        assert!(Message::from_json(&json!([1, 2]), &EnumBindings::new()).is_none());
    }

    #[test]
    fn test_enum_bindings_from_json() {
        let map: HashMap<String, EnumDescriptor> = serde_json::from_value(json!({
            "segments.device": {"name": "Device", "values": {"2": "MOBILE", "4": "DESKTOP"}}
        }))
        .unwrap();
        let bindings = EnumBindings::from(map);

        let device = bindings.get("segments.device").unwrap();
        assert_eq!(device.name_of(4), Some("DESKTOP"));
        assert!(bindings.get("segments.date").is_none());
    }
}
