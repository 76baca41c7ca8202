use crate::infrastructure::document_store::{Document, Fields};
use crate::infrastructure::error::InfraError;
use chrono::DateTime;
use serde_json::{Value, json};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct FirestoreDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: serde_json::Map<String, Value>,
    #[serde(rename = "createTime", skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(rename = "updateTime", skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(flag) => json!({ "booleanValue": flag }),
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                json!({ "integerValue": integer.to_string() })
            } else if let Some(integer) = number.as_u64() {
                json!({ "integerValue": integer.to_string() })
            } else {
                json!({ "doubleValue": number.as_f64().unwrap_or_default() })
            }
        }
        Value::String(text) => json!({ "stringValue": text }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn encode_fields(fields: &Fields) -> serde_json::Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect()
}

/// Server-assigned `timestampValue`s decode to epoch milliseconds so every
/// stored timestamp reaches the domain in a single representation.
pub fn decode_value(value: &Value) -> Result<Value, InfraError> {
    let Some(object) = value.as_object() else {
        return Err(InfraError::Store(format!("invalid firestore value: {value}")));
    };
    let Some((kind, inner)) = object.iter().next() else {
        return Ok(Value::Null);
    };

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" => Ok(Value::Bool(inner.as_bool().unwrap_or(false))),
        "integerValue" => {
            let parsed = match inner {
                Value::String(raw) => raw.parse::<i64>().map_err(|error| {
                    InfraError::Store(format!("invalid integerValue '{raw}': {error}"))
                })?,
                Value::Number(number) => number.as_i64().ok_or_else(|| {
                    InfraError::Store(format!("invalid integerValue {number}"))
                })?,
                other => {
                    return Err(InfraError::Store(format!("invalid integerValue {other}")));
                }
            };
            Ok(Value::from(parsed))
        }
        "doubleValue" => Ok(inner.clone()),
        "stringValue" | "referenceValue" | "bytesValue" => Ok(inner.clone()),
        "timestampValue" => {
            let raw = inner.as_str().unwrap_or_default();
            let parsed = DateTime::parse_from_rfc3339(raw).map_err(|error| {
                InfraError::Store(format!("invalid timestampValue '{raw}': {error}"))
            })?;
            Ok(Value::from(parsed.timestamp_millis()))
        }
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect::<Result<Vec<_>, _>>())
                .transpose()?
                .unwrap_or_default();
            Ok(Value::Array(values))
        }
        "mapValue" => {
            let fields = inner
                .get("fields")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            Ok(Value::Object(decode_fields(&fields)?))
        }
        "geoPointValue" => Ok(inner.clone()),
        other => Err(InfraError::Store(format!("unsupported firestore value type '{other}'"))),
    }
}

pub fn decode_fields(fields: &serde_json::Map<String, Value>) -> Result<Fields, InfraError> {
    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), decode_value(value)?)))
        .collect()
}

pub fn document_id_from_name(name: &str) -> Option<&str> {
    name.rsplit('/').next().map(str::trim).filter(|id| !id.is_empty())
}

pub fn decode_document(document: &FirestoreDocument) -> Result<Document, InfraError> {
    let id = document
        .name
        .as_deref()
        .and_then(document_id_from_name)
        .ok_or_else(|| InfraError::Store("firestore document did not include a name".to_string()))?;
    Ok(Document::new(id, decode_fields(&document.fields)?))
}
