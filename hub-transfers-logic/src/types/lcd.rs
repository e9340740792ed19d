//! Wire model of the Cosmos SDK transaction query endpoints
//! (`/cosmos/tx/v1beta1/txs`), kept lenient on purpose: a transaction
//! with an unexpected shape degrades to fewer fields instead of failing
//! the whole batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::de;

/// Response of `GET /cosmos/tx/v1beta1/txs`.
///
/// Entries are kept as raw JSON and decoded one by one in
/// [`TxsResponse::transactions`], so a single malformed entry is skipped
/// without affecting its neighbours.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxsResponse {
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub txs: Vec<Value>,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub tx_responses: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<Value>,
}

impl TxsResponse {
    pub fn is_empty(&self) -> bool {
        self.tx_responses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tx_responses.len()
    }

    /// Decodes every transaction of the batch, pairing each `tx_responses[i]`
    /// with its embedded `tx` or, when absent, with `txs[i]`.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.tx_responses
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| {
                let response = match serde_json::from_value::<TxResponse>(raw.clone()) {
                    Ok(response) => response,
                    Err(err) => {
                        tracing::debug!(index = i, err = ?err, "skipping undecodable tx response");
                        return None;
                    }
                };
                let body = response.tx.clone().or_else(|| {
                    self.txs
                        .get(i)
                        .and_then(|tx| serde_json::from_value::<Tx>(tx.clone()).ok())
                });
                Some(Transaction::new(response, body))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxResponse {
    #[serde(default)]
    pub txhash: String,
    #[serde(default, deserialize_with = "de::u64_from_string_or_number")]
    pub height: u64,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub code: u32,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub raw_log: String,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub logs: Vec<TxLog>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub tx: Option<Tx>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    #[serde(default)]
    pub body: TxBody,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub signatures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxBody {
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub messages: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxLog {
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub log: String,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub events: Vec<Event>,
}

impl TxLog {
    /// First event whose type equals `kind`, ignoring case.
    pub fn event(&self, kind: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.kind.eq_ignore_ascii_case(kind))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub attributes: Vec<Attribute>,
}

impl Event {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key.as_deref() == Some(key))
            .and_then(|a| a.value.as_deref())
    }

    /// Last dot-separated segment of the event type, e.g.
    /// `axelar.axelarnet.v1beta1.IBCTransferCompleted` -> `IBCTransferCompleted`.
    pub fn short_kind(&self) -> &str {
        self.kind.rsplit('.').next().unwrap_or_default()
    }

    /// Single-level `key -> value` view of the attributes. Attributes with an
    /// empty key or value are dropped; on duplicate keys the last one wins.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        self.attributes
            .iter()
            .filter_map(|a| match (a.key.as_deref(), a.value.as_deref()) {
                (Some(k), Some(v)) if !k.is_empty() && !v.is_empty() => {
                    Some((k.to_string(), v.to_string()))
                }
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: Some(value.into()),
        }
    }
}

/// One finalized transaction as the extractor sees it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub txhash: String,
    pub height: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub code: u32,
    pub raw_log: String,
    pub logs: Vec<TxLog>,
    pub messages: Vec<Value>,
    pub signatures: Vec<String>,
}

impl Transaction {
    fn new(response: TxResponse, body: Option<Tx>) -> Self {
        let timestamp = response
            .timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));
        let (messages, signatures) = body
            .map(|tx| (tx.body.messages, tx.signatures))
            .unwrap_or_default();

        Self {
            txhash: response.txhash,
            height: response.height,
            timestamp,
            code: response.code,
            raw_log: response.raw_log,
            logs: response.logs,
            messages,
            signatures,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp.map(|ts| ts.timestamp_millis())
    }

    /// True when the raw log or any per-message log contains `needle`.
    pub fn log_contains(&self, needle: &str) -> bool {
        self.raw_log.contains(needle) || self.logs.iter().any(|l| l.log.contains(needle))
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.logs.iter().flat_map(|l| l.events.iter())
    }
}

/// `@type` of a decoded message.
pub fn type_url(message: &Value) -> Option<&str> {
    message.get("@type").and_then(Value::as_str)
}

/// The wrapped message of a `RefundMsgRequest`-style envelope.
pub fn inner_message(message: &Value) -> Option<&Value> {
    message.get("inner_message").filter(|m| m.is_object())
}

/// Last dot-separated segment of a type url,
/// e.g. `/axelar.evm.v1beta1.VoteConfirmDepositRequest` -> `VoteConfirmDepositRequest`.
pub fn short_type(type_url: &str) -> &str {
    type_url.rsplit('.').next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn malformed_entry_does_not_drop_batch() {
        let response: TxsResponse = serde_json::from_value(json!({
            "tx_responses": [
                { "txhash": "AA", "height": "10", "code": 0, "timestamp": "2023-03-01T10:00:00Z" },
                { "txhash": "BB", "height": "11", "logs": "not-a-list" },
                { "txhash": "CC", "height": 12, "logs": null }
            ],
            "txs": [
                { "body": { "messages": [{ "@type": "/a.b.Msg" }] }, "signatures": ["sig"] }
            ]
        }))
        .unwrap();

        let txs = response.transactions();
        let hashes: Vec<_> = txs.iter().map(|t| t.txhash.as_str()).collect();
        assert_eq!(hashes, vec!["AA", "CC"]);
        assert_eq!(txs[0].height, 10);
        assert_eq!(txs[0].messages.len(), 1);
        assert_eq!(txs[0].signatures, vec!["sig".to_string()]);
        assert_eq!(txs[0].timestamp_ms(), Some(1677664800000));
        assert_eq!(txs[1].height, 12);
        assert!(txs[1].messages.is_empty());
    }

    #[test]
    fn flatten_drops_empty_attributes() {
        let event = Event {
            kind: "acknowledge_packet".to_string(),
            attributes: vec![
                Attribute::new("packet_sequence", "42"),
                Attribute::new("", "orphan"),
                Attribute::new("packet_connection", ""),
                Attribute {
                    key: Some("packet_src_channel".to_string()),
                    value: None,
                },
            ],
        };

        let flat = event.flatten();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat.get("packet_sequence").map(String::as_str), Some("42"));
    }

    #[test]
    fn short_type_takes_last_segment() {
        assert_eq!(
            short_type("/axelar.evm.v1beta1.VoteConfirmDepositRequest"),
            "VoteConfirmDepositRequest"
        );
        assert_eq!(short_type("Plain"), "Plain");
    }
}
