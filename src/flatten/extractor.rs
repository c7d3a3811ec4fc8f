use crate::flatten::types::NestedRecord;
use crate::message::{Field, FieldListable, FieldValue};
use anyhow::Result;
use serde_json::{Map, Value};

/// Everything a [`ValueExtractor`] may look at when deciding about a field
pub struct FieldContext<'a> {
    /// The response row extraction started from
    pub root: &'a dyn FieldListable,

    /// Field names traversed from the root to `message`
    pub path: &'a [String],

    /// The message that owns `field`
    pub message: &'a dyn FieldListable,

    pub field: &'a Field<'a>,

    pub substitute_enum_names: bool,
}

impl<'a> FieldContext<'a> {
    pub fn name(&self) -> &'a str {
        self.field.name()
    }

    pub fn value(&self) -> &'a FieldValue<'a> {
        &self.field.value
    }

    pub fn is_message(&self) -> bool {
        self.field.descriptor.message
    }

    pub fn is_repeated(&self) -> bool {
        self.field.descriptor.repeated
    }
}

/// Override point consulted before a field gets default handling
///
/// Returning `Some(record)` merges `record` into the extracted record in
/// place of the field. Errors are propagated to the caller of
/// [`FieldExtractor::extract`] unchanged.
pub trait ValueExtractor {
    fn extract(&self, context: &FieldContext<'_>) -> Result<Option<NestedRecord>>;
}

impl<F> ValueExtractor for F
where
    F: Fn(&FieldContext<'_>) -> Result<Option<NestedRecord>>,
{
    fn extract(&self, context: &FieldContext<'_>) -> Result<Option<NestedRecord>> {
        self(context)
    }
}

/// Converts one nested message into one [`NestedRecord`]
#[derive(Clone, Copy, Default)]
pub struct FieldExtractor<'e> {
    substitute_enum_names: bool,
    value_extractor: Option<&'e dyn ValueExtractor>,
}

impl<'e> FieldExtractor<'e> {
    pub fn new(substitute_enum_names: bool) -> Self {
        FieldExtractor {
            substitute_enum_names,
            value_extractor: None,
        }
    }

    pub fn with_value_extractor(mut self, value_extractor: &'e dyn ValueExtractor) -> Self {
        self.value_extractor = Some(value_extractor);
        self
    }

    /// Extract every present field of `row`, recursing into nested messages
    pub fn extract(&self, row: &dyn FieldListable) -> Result<NestedRecord> {
        let mut path = Vec::new();
        self.extract_message(row, row, &mut path)
    }

    fn extract_message<'a>(
        &self,
        root: &'a dyn FieldListable,
        message: &'a dyn FieldListable,
        path: &mut Vec<String>,
    ) -> Result<NestedRecord> {
        let mut record = Map::new();

        for field in message.list_fields() {
            if let Some(value_extractor) = self.value_extractor {
                let context = FieldContext {
                    root,
                    path: path.as_slice(),
                    message,
                    field: &field,
                    substitute_enum_names: self.substitute_enum_names,
                };
                if let Some(extracted) = value_extractor.extract(&context)? {
                    record.extend(extracted);
                    continue;
                }
            }

            let name = field.name();
            let value = match &field.value {
                FieldValue::Scalar(value) => (*value).clone(),
                FieldValue::Scalars(values) => Value::Array(values.to_vec()),
                FieldValue::Message(child) => {
                    path.push(name.to_string());
                    let child = self.extract_message(root, *child, path);
                    path.pop();
                    Value::Object(child?)
                }
                FieldValue::Messages(children) => {
                    path.push(name.to_string());
                    let children: Result<Vec<Value>> = children
                        .iter()
                        .map(|child| self.extract_message(root, *child, path).map(Value::Object))
                        .collect();
                    path.pop();
                    Value::Array(children?)
                }
            };

            let value = match &field.descriptor.enum_type {
                Some(enum_type) if self.substitute_enum_names => enum_type.substitute(&value),
                _ => value,
            };

            record.insert(name.to_string(), value);
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EnumBindings, EnumDescriptor, FieldDescriptor, Message, MessageValue};
    use serde_json::json;
    use std::cell::RefCell;
    use std::sync::Arc;

    fn campaign_row() -> Message {
        let status = Arc::new(EnumDescriptor::new("CampaignStatus", [(2, "ENABLED"), (3, "PAUSED")]));
        let input = json!({
            "campaign": {
                "id": {"value": 7},
                "status": 3,
                "labels": ["a", "b"]
            },
            "metrics": {"clicks": {"value": 0}}
        });
        let enums = EnumBindings::new().bind("campaign.status", status);
        Message::from_json(&input, &enums).unwrap()
    }

    #[test]
    fn test_extract_nested_record() {
        let row = campaign_row();
        let record = FieldExtractor::new(false).extract(&row).unwrap();

        assert_eq!(
            Value::Object(record),
            json!({
                "campaign": {"id": {"value": 7}, "status": 3, "labels": ["a", "b"]},
                "metrics": {"clicks": {"value": 0}}
            })
        );
    }

    #[test]
    fn test_extract_substitutes_enum_names() {
        let row = campaign_row();
        let record = FieldExtractor::new(true).extract(&row).unwrap();
        assert_eq!(record["campaign"]["status"], json!("PAUSED"));
    }

    #[test]
    fn test_repeated_enum_and_null_scalar() {
        let device = Arc::new(EnumDescriptor::new("Device", [(2, "MOBILE"), (4, "DESKTOP")]));
        let row = Message::new()
            .with_field(
                FieldDescriptor::enumeration("devices", device.clone()).repeated(),
                MessageValue::Scalars(vec![json!(4), json!(2)]),
            )
            .with_field(
                FieldDescriptor::enumeration("device", device),
                MessageValue::Scalar(Value::Null),
            );

        let record = FieldExtractor::new(true).extract(&row).unwrap();
        assert_eq!(record["devices"], json!(["DESKTOP", "MOBILE"]));
        assert_eq!(record["device"], Value::Null);
    }

    #[test]
    fn test_repeated_messages() {
        let row = Message::new().with_field(
            FieldDescriptor::message("assets").repeated(),
            MessageValue::Messages(vec![
                Message::new().with_field(FieldDescriptor::scalar("x"), MessageValue::Scalar(json!(1))),
                Message::new().with_field(FieldDescriptor::scalar("x"), MessageValue::Scalar(json!(2))),
            ]),
        );

        let record = FieldExtractor::new(false).extract(&row).unwrap();
        assert_eq!(record["assets"], json!([{"x": 1}, {"x": 2}]));
    }

    struct ZeroClicks {
        seen: RefCell<Vec<(String, String)>>,
    }

    impl ValueExtractor for ZeroClicks {
        fn extract(&self, context: &FieldContext<'_>) -> Result<Option<NestedRecord>> {
            self.seen
                .borrow_mut()
                .push((context.path.join("."), context.name().to_string()));
            if context.path == ["metrics"] && context.name() == "clicks" {
                let mut record = Map::new();
                record.insert("clicks".to_string(), json!(0));
                record.insert("clicks_present".to_string(), json!(true));
                return Ok(Some(record));
            }
            Ok(None)
        }
    }

    fn fail_on_status(context: &FieldContext<'_>) -> Result<Option<NestedRecord>> {
        if context.name() == "status" {
            anyhow::bail!("cannot handle {}", context.name());
        }
        Ok(None)
    }

    #[test]
    fn test_value_extractor_overrides_field() {
        let zero_clicks = ZeroClicks {
            seen: RefCell::new(Vec::new()),
        };

        let row = campaign_row();
        let record = FieldExtractor::new(false)
            .with_value_extractor(&zero_clicks)
            .extract(&row)
            .unwrap();

        assert_eq!(record["metrics"], json!({"clicks": 0, "clicks_present": true}));
        assert_eq!(record["campaign"]["id"], json!({"value": 7}));
        assert!(zero_clicks
            .seen
            .borrow()
            .contains(&("campaign.id".to_string(), "value".to_string())));
    }

    #[test]
    fn test_value_extractor_errors_propagate() {
        let row = campaign_row();
        let err = FieldExtractor::new(true)
            .with_value_extractor(&fail_on_status)
            .extract(&row)
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot handle status");
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let row = campaign_row();
        let extractor = FieldExtractor::new(true);
        assert_eq!(extractor.extract(&row).unwrap(), extractor.extract(&row).unwrap());
    }
}
