use super::account::AccountId;
use super::money::{Currency, MAX_AMOUNT};
use crate::error::{FieldError, Result, SimulationError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Transfer,
    Refund,
    Stream,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionType::Transfer => "transfer",
            ActionType::Refund => "refund",
            ActionType::Stream => "stream",
        })
    }
}

/// The request body as received, before the action type is resolved.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RawActionRequest {
    pub action_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TransferRequest {
    pub source_account: AccountId,
    pub destination_account: AccountId,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_currency: Option<Currency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corridor: Option<String>,
}

impl TransferRequest {
    pub fn destination_currency(&self) -> &Currency {
        self.destination_currency.as_ref().unwrap_or(&self.currency)
    }

    pub fn corridor(&self) -> String {
        self.corridor.clone().unwrap_or_else(|| {
            format!("{}-{}", self.currency, self.destination_currency())
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RefundRequest {
    pub transfer_id: String,
    /// Omitted means the full remaining refundable amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StreamRequest {
    pub source_account: AccountId,
    pub destination_account: AccountId,
    pub rate_per_second: Decimal,
    pub currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

/// Longest stream that can be previewed: one hundred years.
pub const MAX_STREAM_SECONDS: u64 = 100 * 365 * 86_400;

/// A validated operation request. Immutable once stored on a simulation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "action_type", content = "payload", rename_all = "lowercase")]
pub enum ActionRequest {
    Transfer(TransferRequest),
    Refund(RefundRequest),
    Stream(StreamRequest),
}

impl ActionRequest {
    /// Resolves the action type and checks the payload shape.
    ///
    /// Every field problem is reported at once rather than the first one only.
    pub fn parse(raw: RawActionRequest) -> Result<Self> {
        let request = match raw.action_type.as_str() {
            "transfer" => Self::Transfer(decode(raw.payload)?),
            "refund" => Self::Refund(decode(raw.payload)?),
            "stream" => Self::Stream(decode(raw.payload)?),
            other => {
                return Err(SimulationError::validation(
                    "action_type",
                    format!("unsupported action type '{other}'"),
                ));
            }
        };
        let fields = request.field_errors();
        if fields.is_empty() {
            Ok(request)
        } else {
            Err(SimulationError::Validation(fields))
        }
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            Self::Transfer(_) => ActionType::Transfer,
            Self::Refund(_) => ActionType::Refund,
            Self::Stream(_) => ActionType::Stream,
        }
    }

    fn field_errors(&self) -> Vec<FieldError> {
        let mut fields = Vec::new();
        match self {
            Self::Transfer(t) => {
                require_id(&mut fields, "source_account", &t.source_account);
                require_id(&mut fields, "destination_account", &t.destination_account);
                if t.source_account == t.destination_account && !t.source_account.is_empty() {
                    fields.push(FieldError::new(
                        "destination_account",
                        "must differ from source_account",
                    ));
                }
                require_positive(&mut fields, "amount", t.amount);
                require_currency(&mut fields, "currency", &t.currency);
                if let Some(dest) = &t.destination_currency {
                    require_currency(&mut fields, "destination_currency", dest);
                }
                if let Some(corridor) = &t.corridor
                    && corridor.trim().is_empty()
                {
                    fields.push(FieldError::new("corridor", "must not be blank"));
                }
            }
            Self::Refund(r) => {
                require_id(&mut fields, "transfer_id", &r.transfer_id);
                if let Some(amount) = r.amount {
                    require_positive(&mut fields, "amount", amount);
                }
                if r.reason.trim().is_empty() {
                    fields.push(FieldError::new("reason", "must not be blank"));
                }
            }
            Self::Stream(s) => {
                require_id(&mut fields, "source_account", &s.source_account);
                require_id(&mut fields, "destination_account", &s.destination_account);
                require_positive(&mut fields, "rate_per_second", s.rate_per_second);
                require_currency(&mut fields, "currency", &s.currency);
                match s.duration_seconds {
                    Some(0) => fields.push(FieldError::new("duration_seconds", "must be positive")),
                    Some(d) if d > MAX_STREAM_SECONDS => fields.push(FieldError::new(
                        "duration_seconds",
                        format!("must not exceed {MAX_STREAM_SECONDS}"),
                    )),
                    _ => {}
                }
            }
        }
        fields
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: serde_json::Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| SimulationError::validation("payload", e.to_string()))
}

fn require_id(fields: &mut Vec<FieldError>, name: &str, value: &str) {
    if value.trim().is_empty() {
        fields.push(FieldError::new(name, "must not be blank"));
    }
}

fn require_positive(fields: &mut Vec<FieldError>, name: &str, value: Decimal) {
    if value <= Decimal::ZERO {
        fields.push(FieldError::new(name, format!("must be positive, got {value}")));
    } else if value > MAX_AMOUNT {
        fields.push(FieldError::new(name, format!("must not exceed {MAX_AMOUNT}, got {value}")));
    }
}

fn require_currency(fields: &mut Vec<FieldError>, name: &str, value: &Currency) {
    if !value.is_valid() {
        fields.push(FieldError::new(
            name,
            format!("'{value}' is not a currency code"),
        ));
    }
}
