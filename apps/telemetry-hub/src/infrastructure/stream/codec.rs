//! Frame Codec
//!
//! Decodes telemetry frames into account updates.
//!
//! # Wire Format
//!
//! Each frame is a UTF-8 JSON object keyed by stringified account id:
//!
//! ```json
//! {"42": {"balance": 1050.25, "sequence": 17, "equity": 1100.0},
//!  "43": {"balance": "99.10"}}
//! ```
//!
//! `balance` is required (number or numeric string). `sequence` (alias
//! `seq`) is optional; records without one take the frame ordinal supplied
//! by the caller. Every other field is kept untouched.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::domain::account::{AccountId, AccountMap, AccountSnapshot, Sequence};

/// Frame decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Frame text is not valid JSON.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Top-level value is not an object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// Key is not a stringified account id.
    #[error("invalid account id: {0:?}")]
    InvalidAccountId(String),

    /// Record for an account is not an object.
    #[error("record for account {0} is not an object")]
    InvalidRecord(AccountId),

    /// Record lacks a usable `balance`.
    #[error("record for account {0} has a missing or non-numeric balance")]
    InvalidBalance(AccountId),

    /// Record carries a sequence that is not an unsigned integer.
    #[error("record for account {0} has an invalid sequence")]
    InvalidSequence(AccountId),
}

impl CodecError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Utf8(_) => "utf8",
            Self::Json(_) => "json",
            Self::NotAnObject(_) => "not_object",
            Self::InvalidAccountId(_) => "account_id",
            Self::InvalidRecord(_) => "record",
            Self::InvalidBalance(_) => "balance",
            Self::InvalidSequence(_) => "sequence",
        }
    }
}

/// JSON codec for account telemetry frames.
#[derive(Debug, Default, Clone)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new frame codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode raw frame bytes.
    ///
    /// A frame is all-or-nothing: one bad record rejects the whole frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not UTF-8 or the text is not a
    /// valid telemetry object.
    pub fn decode(&self, bytes: &[u8], ordinal: Sequence) -> Result<AccountMap, CodecError> {
        let text = std::str::from_utf8(bytes)?;
        self.decode_text(text, ordinal)
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid telemetry object.
    pub fn decode_text(&self, text: &str, ordinal: Sequence) -> Result<AccountMap, CodecError> {
        let value: Value = serde_json::from_str(text.trim())?;
        let entries = match value {
            Value::Object(entries) => entries,
            other => return Err(CodecError::NotAnObject(json_kind(&other))),
        };

        let received_at = Utc::now();
        let mut update = AccountMap::with_capacity(entries.len());

        for (key, record) in entries {
            let account_id = key
                .trim()
                .parse::<AccountId>()
                .map_err(|_| CodecError::InvalidAccountId(key.clone()))?;

            let Value::Object(fields) = record else {
                return Err(CodecError::InvalidRecord(account_id));
            };

            let mut snapshot = decode_record(account_id, fields, ordinal)?;
            snapshot.received_at = received_at;
            update.insert(account_id, Arc::new(snapshot));
        }

        Ok(update)
    }
}

fn decode_record(
    account_id: AccountId,
    mut fields: Map<String, Value>,
    ordinal: Sequence,
) -> Result<AccountSnapshot, CodecError> {
    let balance = fields
        .remove("balance")
        .as_ref()
        .and_then(decimal_value)
        .ok_or(CodecError::InvalidBalance(account_id))?;

    let raw_sequence = fields.remove("sequence").or_else(|| fields.remove("seq"));
    let sequence = match raw_sequence {
        None | Some(Value::Null) => ordinal,
        Some(value) => sequence_value(&value).ok_or(CodecError::InvalidSequence(account_id))?,
    };

    Ok(AccountSnapshot::new(account_id, balance, sequence).with_fields(fields))
}

fn decimal_value(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn sequence_value(value: &Value) -> Option<Sequence> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Tests
// =============================================================================
