use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Attribute injected into every post with the filter term that matched it.
pub(crate) const KEYWORD_FIELD: &str = "keyword";

/// One post as delivered by the upstream, tagged with the keyword it matched. Everything but the
/// keyword attribute is passed through as received.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Parses a raw payload and tags it with the keyword. The payload has to be a JSON object;
    /// an existing `keyword` attribute is overwritten.
    pub fn tagged(raw: &[u8], keyword: &str) -> Result<Self> {
        let value: Value = serde_json::from_slice(raw)?;
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(Error::Parse(format!(
                    "expected a JSON object, got {}",
                    json_type(&other)
                )));
            }
        };

        fields.insert(
            KEYWORD_FIELD.to_string(),
            Value::String(keyword.to_string()),
        );
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn keyword(&self) -> Option<&str> {
        self.fields.get(KEYWORD_FIELD).and_then(Value::as_str)
    }

    /// Serializes the record as a single line of JSON, newline included.
    pub(crate) fn to_json_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(&self.fields)
            .map_err(|e| Error::Staging(format!("Failed to serialize record: {e}")))?;
        line.push(b'\n');
        Ok(line)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_tag_adds_exactly_one_field() {
        let raw = json!({
            "data": {"id": "1790", "text": "fearless concurrency"},
            "matching_rules": [{"id": "42", "tag": "rust"}],
        });
        let untagged = raw.as_object().unwrap().clone();

        let record = Record::tagged(raw.to_string().as_bytes(), "rust").unwrap();

        assert_eq!(record.fields().len(), untagged.len() + 1);
        for (key, value) in &untagged {
            assert_eq!(record.fields().get(key), Some(value));
        }
        assert_eq!(record.keyword(), Some("rust"));
    }

    #[test]
    fn test_tag_overwrites_existing_keyword() {
        let record = Record::tagged(br#"{"keyword":"go","text":"hi"}"#, "rust").unwrap();
        assert_eq!(record.keyword(), Some("rust"));
        assert_eq!(record.fields().len(), 2);
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            Record::tagged(b"{not json", "rust"),
            Err(Error::Parse(_))
        ));

        match Record::tagged(b"[1, 2]", "rust") {
            Err(Error::Parse(msg)) => assert!(msg.contains("an array")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_json_line() {
        let record = Record::tagged(br#"{"text":"hello\nworld"}"#, "rust").unwrap();
        let line = record.to_json_line().unwrap();

        assert_eq!(line.last(), Some(&b'\n'));
        // embedded newlines stay escaped, one record is one line
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);

        let parsed: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(parsed, json!({"text": "hello\nworld", "keyword": "rust"}));
    }
}
