//! # Operation Wire Model
//!
//! The serde model of one operation observed on an account's activity
//! stream, plus the fixed-point amount representation used for exact
//! product matching. Chain amounts arrive as strings like `"3.000 HBD"`;
//! they are normalized to an integer number of thousandths plus an
//! upper-cased symbol so equality checks never touch floating point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operation kind for a regular transfer.
pub const KIND_TRANSFER: &str = "transfer";
/// Operation kind for a recurring-transfer fulfillment.
pub const KIND_RECURRENT: &str = "fill_recurrent_transfer";

/// One discrete operation observed on the monitored account's stream, as
/// delivered by the node (stream frame or account-history item).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOperation {
    /// Operation discriminator, e.g. `"transfer"`.
    pub kind: String,
    /// Sending account name.
    pub from: String,
    /// Receiving account name.
    pub to: String,
    /// Amount string in `"<decimal> <SYMBOL>"` form.
    pub amount: String,
    /// Free-form memo attached by the sender.
    #[serde(default)]
    pub memo: String,
    /// Time the operation was included on chain.
    pub timestamp: DateTime<Utc>,
}

impl RawOperation {
    /// Whether this operation can carry a payment at all. Most operations
    /// on a busy account stream are not transfer-shaped and are dropped
    /// before any further inspection.
    pub fn is_transfer_shaped(&self) -> bool {
        self.kind == KIND_TRANSFER || self.kind == KIND_RECURRENT
    }

    /// Extracts an operation from one streamed text frame.
    ///
    /// The node wraps operation notifications as
    /// `{"method": "notify.operation", "params": { ...operation... }}`;
    /// anything else (subscribe acks, keepalives) yields `None`.
    pub fn from_frame(text: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        if value.get("method")?.as_str()? != "notify.operation" {
            return None;
        }
        serde_json::from_value(value.get("params")?.clone()).ok()
    }
}

/// Raised when an amount string does not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    /// Not in `"<decimal> <SYMBOL>"` form, or the numeric part is invalid.
    #[error("malformed amount '{0}'")]
    Malformed(String),
    /// More fractional digits than the chain's 3-decimal precision.
    #[error("too many decimal places in '{0}'")]
    Precision(String),
}

/// A chain amount as a fixed-point integer: `value` thousandths of a unit
/// plus an upper-cased currency symbol. Product matching is exact equality
/// on both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Amount {
    /// Number of thousandths (e.g. `"3.000 HBD"` -> 3000).
    pub value: i64,
    /// Upper-cased currency symbol (e.g. `"HBD"`).
    pub symbol: String,
}

impl Amount {
    /// Parses `"3.000 HBD"`-style strings. Negative amounts and more than
    /// three fractional digits are rejected.
    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let malformed = || AmountError::Malformed(input.to_string());

        let mut parts = input.split_whitespace();
        let (number, symbol) = match (parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(s), None) => (n, s),
            _ => return Err(malformed()),
        };
        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(malformed());
        }
        if number.starts_with('-') || number.starts_with('+') {
            return Err(malformed());
        }

        let (whole, frac) = match number.split_once('.') {
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(malformed());
        }
        if frac.len() > 3 {
            return Err(AmountError::Precision(input.to_string()));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| malformed())?
        };
        let frac_value: i64 = if frac.is_empty() {
            0
        } else {
            let parsed: i64 = frac.parse().map_err(|_| malformed())?;
            parsed * 10i64.pow(3 - frac.len() as u32)
        };

        // Frames come from an untrusted stream; an oversized amount must be
        // a parse error, never an overflow.
        let value = whole
            .checked_mul(1000)
            .and_then(|v| v.checked_add(frac_value))
            .ok_or_else(malformed)?;

        Ok(Self {
            value,
            symbol: symbol.to_ascii_uppercase(),
        })
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:03} {}", self.value / 1000, self.value % 1000, self.symbol)
    }
}

/// A transfer-shaped operation normalized for classification. Transient;
/// exists only for the duration of one classification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    /// Paying account.
    pub sender: String,
    /// Receiving account.
    pub recipient: String,
    /// Parsed, fixed-point amount.
    pub amount: Amount,
    /// Sender-supplied memo.
    pub memo: String,
    /// On-chain inclusion time.
    pub timestamp: DateTime<Utc>,
}

impl TransferEvent {
    /// Normalizes a raw operation. Returns `None` for non-transfer kinds
    /// or unparseable amounts; neither is an error on a public stream.
    pub fn from_operation(op: &RawOperation) -> Option<Self> {
        if !op.is_transfer_shaped() {
            return None;
        }
        let amount = match Amount::parse(&op.amount) {
            Ok(a) => a,
            Err(e) => {
                tracing::debug!(from = %op.from, error = %e, "skipping transfer with unparseable amount");
                return None;
            }
        };
        Some(Self {
            sender: op.from.clone(),
            recipient: op.to.clone(),
            amount,
            memo: op.memo.clone(),
            timestamp: op.timestamp,
        })
    }
}
