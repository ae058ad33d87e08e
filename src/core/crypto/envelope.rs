//! Wire format of the encrypted payload.
//!
//! The remote service answers with either a list of items or a single item.
//! Each item is a `{iv, encrypted}` record, optionally wrapped as
//! `{"json": {iv, encrypted}}`. Both base64 fields are decoded only when the
//! envelope is handed to the decrypt engine.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use super::{DecryptError, EncryptedItem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    pub iv: String,
    #[serde(alias = "ciphertext")]
    pub encrypted: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireItem {
    Wrapped { json: WireRecord },
    Bare(WireRecord),
}

impl From<WireItem> for WireRecord {
    fn from(item: WireItem) -> Self {
        match item {
            WireItem::Wrapped { json } => json,
            WireItem::Bare(record) => record,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("response contains no data")]
    Empty,

    #[error("unexpected response shape: {0}")]
    WrongShape(String),
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_item(index: usize, value: Value) -> Result<WireRecord, EnvelopeError> {
    let kind = json_type(&value);
    serde_json::from_value::<WireItem>(value)
        .map(WireRecord::from)
        .map_err(|_| {
            EnvelopeError::WrongShape(format!(
                "item {} is a {} without `iv` and `encrypted` fields",
                index, kind
            ))
        })
}

/// Normalize a JSON response into an ordered list of wire records.
/// A bare object becomes a one-element list.
pub fn parse_envelope(value: Value) -> Result<Vec<WireRecord>, EnvelopeError> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(EnvelopeError::Empty);
            }
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| parse_item(i + 1, item))
                .collect()
        }
        Value::Object(_) => Ok(vec![parse_item(1, value)?]),
        other => Err(EnvelopeError::WrongShape(format!(
            "expected a JSON array or object, got {}",
            json_type(&other)
        ))),
    }
}

/// Decode the base64 fields of every record.
pub fn decode_records(records: &[WireRecord]) -> Result<Vec<EncryptedItem>, DecryptError> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let item = i + 1;
            let iv = STANDARD
                .decode(record.iv.trim())
                .map_err(|_| DecryptError::InvalidBase64 { item, field: "iv" })?;
            let ciphertext = STANDARD
                .decode(record.encrypted.trim())
                .map_err(|_| DecryptError::InvalidBase64 { item, field: "encrypted" })?;
            Ok(EncryptedItem::new(iv, ciphertext))
        })
        .collect()
}

/// Render items in wire form, optionally in the `{"json": ...}` wrapper.
pub fn envelope_json(items: &[EncryptedItem], wrapped: bool) -> Value {
    let records: Vec<Value> = items
        .iter()
        .map(|item| {
            let record = json!({
                "iv": STANDARD.encode(&item.iv),
                "encrypted": STANDARD.encode(&item.ciphertext),
            });
            if wrapped {
                json!({ "json": record })
            } else {
                record
            }
        })
        .collect();
    Value::Array(records)
}
