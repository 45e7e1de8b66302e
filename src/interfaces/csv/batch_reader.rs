use crate::domain::request::RawActionRequest;
use crate::error::{Result, SimulationError};
use serde::Deserialize;
use serde_json::json;
use std::io::Read;

/// One transfer row: `source,destination,amount,currency,destination_currency,corridor`.
/// The last two columns may be empty. The amount is kept as written and
/// validated with the rest of the request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransferRow {
    pub source: String,
    pub destination: String,
    pub amount: String,
    pub currency: String,
    #[serde(default)]
    pub destination_currency: Option<String>,
    #[serde(default)]
    pub corridor: Option<String>,
}

impl TransferRow {
    pub fn into_request(self) -> RawActionRequest {
        let mut payload = json!({
            "source_account": self.source,
            "destination_account": self.destination,
            "amount": self.amount,
            "currency": self.currency,
        });
        if let Some(destination_currency) = self.destination_currency.filter(|c| !c.is_empty()) {
            payload["destination_currency"] = json!(destination_currency);
        }
        if let Some(corridor) = self.corridor.filter(|c| !c.is_empty()) {
            payload["corridor"] = json!(corridor);
        }
        RawActionRequest {
            action_type: "transfer".to_string(),
            payload,
        }
    }
}

/// Reads transfer rows from a CSV source, trimming whitespace and accepting
/// rows that omit the optional trailing columns.
pub struct TransferRowReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> TransferRowReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows; a malformed row yields an error and the
    /// iterator moves on.
    pub fn rows(self) -> impl Iterator<Item = Result<TransferRow>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(SimulationError::from))
    }
}
