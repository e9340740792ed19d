//! Records produced by the extractor and the documents persisted in the
//! store collections.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::de;
use crate::granularity::Granularity;

/// Validator liveness signal, keyed by `{sender}_{period_height}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub txhash: String,
    pub height: u64,
    pub period_height: u64,
    pub timestamp: i64,
    pub sender: String,
    pub key_ids: Vec<String>,
    pub signatures: Vec<String>,
}

impl Heartbeat {
    pub fn key(&self) -> String {
        format!("{}_{}", self.sender, self.period_height)
    }
}

/// Result of a deposit-address link request.
///
/// Fields of the link message that are not promoted to a named field are
/// kept as-is in `message` and stored alongside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepositAddress {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub txhash: String,
    pub height: u64,
    pub created_at: Granularity,
    #[serde(default)]
    pub sender_chain: Option<String>,
    #[serde(default)]
    pub original_sender_chain: Option<String>,
    #[serde(default)]
    pub sender_address: Option<String>,
    #[serde(default)]
    pub recipient_chain: Option<String>,
    #[serde(default)]
    pub original_recipient_chain: Option<String>,
    #[serde(default)]
    pub recipient_address: Option<String>,
    #[serde(default)]
    pub deposit_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(flatten)]
    pub message: Map<String, Value>,
}

impl DepositAddress {
    pub const NAMED_FIELDS: &'static [&'static str] = &[
        "id",
        "type",
        "txhash",
        "height",
        "created_at",
        "sender_chain",
        "original_sender_chain",
        "sender_address",
        "recipient_chain",
        "original_recipient_chain",
        "recipient_address",
        "deposit_address",
        "price",
    ];

    /// Asset denomination named by the link request, if any.
    pub fn denom(&self) -> Option<&str> {
        ["asset", "denom"]
            .iter()
            .find_map(|k| self.message.get(*k).and_then(Value::as_str))
            .filter(|d| !d.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteKind {
    VoteConfirmDeposit,
    Vote,
}

impl VoteKind {
    pub fn from_short_type(short_type: &str) -> Option<Self> {
        match short_type.strip_suffix("Request").unwrap_or(short_type) {
            "VoteConfirmDeposit" => Some(Self::VoteConfirmDeposit),
            "Vote" => Some(Self::Vote),
            _ => None,
        }
    }
}

/// One validator's vote on a poll, with classification flags already
/// derived from the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub txhash: String,
    #[serde(rename = "type")]
    pub kind: Option<VoteKind>,
    pub status_code: u32,
    pub height: u64,
    pub created_at: Granularity,
    pub poll_id: String,
    pub voter: String,
    pub sender_chain: Option<String>,
    pub recipient_chain: Option<String>,
    pub transaction_id: Option<String>,
    pub deposit_address: Option<String>,
    pub transfer_id: Option<u64>,
    pub participants: Option<Value>,
    pub vote: bool,
    pub confirmation: bool,
    pub late: bool,
    pub unconfirmed: bool,
}

impl VoteRecord {
    pub fn status(&self) -> &'static str {
        if self.status_code == 0 {
            "success"
        } else {
            "failed"
        }
    }
}

/// Document stored in the votes collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteDocument {
    pub txhash: String,
    pub status: String,
    pub height: u64,
    pub created_at: Granularity,
    pub sender_chain: Option<String>,
    pub recipient_chain: Option<String>,
    pub poll_id: String,
    pub transaction_id: Option<String>,
    pub deposit_address: Option<String>,
    pub transfer_id: Option<u64>,
    pub voter: String,
    pub vote: bool,
    pub confirmation: bool,
    pub late: bool,
    pub unconfirmed: bool,
}

impl From<&VoteRecord> for VoteDocument {
    fn from(record: &VoteRecord) -> Self {
        Self {
            txhash: record.txhash.clone(),
            status: record.status().to_string(),
            height: record.height,
            created_at: record.created_at,
            sender_chain: record.sender_chain.clone(),
            recipient_chain: record.recipient_chain.clone(),
            poll_id: record.poll_id.clone(),
            transaction_id: record.transaction_id.clone(),
            deposit_address: record.deposit_address.clone(),
            transfer_id: record.transfer_id,
            voter: record.voter.clone(),
            vote: record.vote,
            confirmation: record.confirmation,
            late: record.late,
            unconfirmed: record.unconfirmed,
        }
    }
}

/// Patch merged into the polls collection. `confirmation` and
/// `unconfirmed` are only ever written as `true`, so a confirmed poll can
/// not be flipped back by a later unconfirmed outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPatch {
    pub id: String,
    pub height: u64,
    pub created_at: Granularity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_chain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unconfirmed: Option<bool>,
}

/// Packet metadata of an IBC acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckRecord {
    pub txhash: String,
    /// Height the packet was received at on the counterparty chain.
    pub height: Option<u64>,
    pub transfer_id: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl AckRecord {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn packet_sequence(&self) -> Option<&str> {
        self.attribute("packet_sequence")
    }

    pub fn packet_data_hex(&self) -> Option<&str> {
        self.attribute("packet_data_hex")
    }
}

/// Read view of a transfer document. Every field is optional: the
/// document is assembled by several independent writers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Transfer {
    #[serde(default)]
    pub source: Option<TransferSource>,
    #[serde(default)]
    pub link: Option<TransferLink>,
    #[serde(default)]
    pub confirm_deposit: Option<ConfirmDeposit>,
    #[serde(default)]
    pub vote: Option<StageStamp>,
    #[serde(default)]
    pub ibc_send: Option<IbcSend>,
}

impl Transfer {
    /// Document key: `{source.id}_{source.recipient_address}`, lowercased.
    pub fn key(&self) -> Option<String> {
        let source = self.source.as_ref()?;
        let id = source.id.as_deref().filter(|s| !s.is_empty())?;
        let recipient = source.recipient_address.as_deref().filter(|s| !s.is_empty())?;
        Some(format!("{id}_{recipient}").to_lowercase())
    }

    pub fn recipient_chain(&self) -> Option<&str> {
        self.source
            .as_ref()
            .and_then(|s| s.recipient_chain.as_deref())
            .or_else(|| self.link.as_ref().and_then(|l| l.recipient_chain.as_deref()))
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransferSource {
    #[serde(default, deserialize_with = "de::opt_string_from_scalar")]
    pub id: Option<String>,
    #[serde(default)]
    pub recipient_address: Option<String>,
    #[serde(default)]
    pub recipient_chain: Option<String>,
    #[serde(default)]
    pub sender_chain: Option<String>,
    #[serde(default)]
    pub created_at: Option<Granularity>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransferLink {
    #[serde(default)]
    pub recipient_chain: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfirmDeposit {
    #[serde(default)]
    pub poll_id: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string_from_scalar")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub deposit_address: Option<String>,
    #[serde(default)]
    pub participants: Option<Value>,
    #[serde(default)]
    pub created_at: Option<Granularity>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StageStamp {
    #[serde(default)]
    pub created_at: Option<Granularity>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IbcSend {
    #[serde(default, deserialize_with = "de::opt_string_from_scalar")]
    pub packet_sequence: Option<String>,
    #[serde(default)]
    pub packet_src_channel: Option<String>,
    #[serde(default)]
    pub packet_dst_channel: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string_from_scalar")]
    pub packet_timeout_height: Option<String>,
    #[serde(default)]
    pub packet_data_hex: Option<String>,
    #[serde(default)]
    pub ack_txhash: Option<String>,
    #[serde(default)]
    pub recv_txhash: Option<String>,
    #[serde(default)]
    pub failed_txhash: Option<String>,
    #[serde(default)]
    pub created_at: Option<Granularity>,
    #[serde(default)]
    pub received_at: Option<Granularity>,
}
