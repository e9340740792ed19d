//! Deposit-confirmation votes: payload normalization, poll state
//! classification and the aggregator that persists polls and votes.

use serde_json::Value;
use std::{sync::Arc, time::Duration};

use crate::{
    correlator::{Correlator, VoteBackfill},
    types::{de::scalar_to_string, PollPatch, VoteDocument, VoteKind, VoteRecord},
    writer::ReconciliationWriter,
};

const STATUS_COMPLETED: &str = "STATUS_COMPLETED";
const STATUS_UNSPECIFIED: &str = "STATUS_UNSPECIFIED";

/// The two vote message shapes seen on the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum VotePayload {
    /// `VoteConfirmDepositRequest`: a plain confirm/deny ballot.
    ConfirmDeposit {
        chain: Option<String>,
        confirmed: bool,
    },
    /// `VoteRequest`: a ballot carrying the observed events, each with an
    /// optional status code.
    Vote {
        chain: Option<String>,
        events: VoteEvents,
        first_tx_id: Option<String>,
        first_recipient: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoteEvents {
    Missing,
    List(Vec<Value>),
    Object(serde_json::Map<String, Value>),
}

impl VoteEvents {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Array(items)) => Self::List(items.clone()),
            Some(Value::Object(fields)) => Self::Object(fields.clone()),
            _ => Self::Missing,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Missing => true,
            Self::List(items) => items.is_empty(),
            Self::Object(fields) => fields.is_empty(),
        }
    }

    fn statuses(&self) -> Vec<&str> {
        match self {
            Self::List(items) => items
                .iter()
                .filter_map(|e| e.get("status").and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .collect(),
            _ => vec![],
        }
    }
}

/// What the surrounding transaction log says about a vote message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteContext {
    /// A `depositConfirmation` event was emitted for the message.
    pub confirmation_event: bool,
    /// Its `action` attribute is `confirm`.
    pub confirm_action: bool,
    /// An in-progress `vote` event was emitted for the message.
    pub vote_event: bool,
}

/// Normalized flags of a single ballot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteOutcome {
    pub vote: bool,
    pub confirmation: bool,
    pub late: bool,
}

impl VotePayload {
    pub fn parse(kind: VoteKind, message: &Value) -> Self {
        let text = |v: Option<&Value>| v.and_then(scalar_to_string);
        match kind {
            VoteKind::VoteConfirmDeposit => Self::ConfirmDeposit {
                chain: text(message.get("chain")),
                confirmed: message
                    .get("confirmed")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            VoteKind::Vote => {
                let vote = message.get("vote").unwrap_or(&Value::Null);
                let results = vote.get("results");
                let result = vote.get("result");
                let chain = text(vote.get("chain"))
                    .or_else(|| text(results.and_then(|r| r.get(0)).and_then(|r| r.get("chain"))))
                    .or_else(|| text(result.and_then(|r| r.get("chain"))));
                let events = VoteEvents::from_value(
                    vote.get("events")
                        .or(results)
                        .or_else(|| result.and_then(|r| r.get("events"))),
                );
                let first = vote.get("events").and_then(|e| e.get(0));
                Self::Vote {
                    chain,
                    events,
                    first_tx_id: text(first.and_then(|e| e.get("tx_id"))),
                    first_recipient: text(
                        first
                            .and_then(|e| e.get("transfer"))
                            .and_then(|t| t.get("to")),
                    ),
                }
            }
        }
    }

    pub fn chain(&self) -> Option<&str> {
        match self {
            Self::ConfirmDeposit { chain, .. } | Self::Vote { chain, .. } => chain.as_deref(),
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Self::Vote { first_tx_id, .. } => first_tx_id.as_deref(),
            Self::ConfirmDeposit { .. } => None,
        }
    }

    pub fn deposit_address(&self) -> Option<&str> {
        match self {
            Self::Vote {
                first_recipient, ..
            } => first_recipient.as_deref(),
            Self::ConfirmDeposit { .. } => None,
        }
    }

    pub fn outcome(&self, ctx: VoteContext) -> VoteOutcome {
        match self {
            Self::ConfirmDeposit { confirmed, .. } => VoteOutcome {
                vote: *confirmed,
                confirmation: ctx.confirm_action,
                late: false,
            },
            Self::Vote { events, .. } => {
                let statuses = events.statuses();
                let has_status = !statuses.is_empty();
                let vote = !events.is_empty();
                let completed = statuses.contains(&STATUS_COMPLETED);
                let concluded = statuses
                    .iter()
                    .any(|s| *s == STATUS_COMPLETED || *s == STATUS_UNSPECIFIED);

                VoteOutcome {
                    vote,
                    confirmation: ctx.confirmation_event || (ctx.vote_event && has_status && completed),
                    late: !ctx.vote_event
                        && ((!vote && matches!(events, VoteEvents::List(_)))
                            || (has_status && concluded)),
                }
            }
        }
    }
}

/// Pieces of a composite `{chain}_{transaction_id}_{deposit_address}` poll id.
pub fn parse_poll_id(poll_id: &str, sender_chain: Option<&str>) -> (Option<String>, Option<String>) {
    let rest = sender_chain
        .and_then(|chain| {
            let prefix = format!("{chain}_");
            poll_id
                .get(..prefix.len())
                .filter(|head| head.eq_ignore_ascii_case(&prefix))
                .and_then(|_| poll_id.get(prefix.len()..))
        })
        .unwrap_or(poll_id);
    let mut parts = rest.split('_');
    let transaction_id = parts
        .next()
        .filter(|p| !p.is_empty() && *p != poll_id)
        .map(String::from);
    let deposit_address = parts.next().filter(|p| !p.is_empty()).map(String::from);
    (transaction_id, deposit_address)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Unconfirmed,
    Late,
    Confirmed,
}

impl PollState {
    pub fn classify(record: &VoteRecord) -> Self {
        if record.confirmation {
            Self::Confirmed
        } else if record.unconfirmed {
            Self::Unconfirmed
        } else if record.late {
            Self::Late
        } else {
            Self::Pending
        }
    }

    /// Only converged outcomes are kept on the poll.
    pub fn updates_poll(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Unconfirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Unconfirmed => "unconfirmed",
            Self::Late => "late",
            Self::Confirmed => "confirmed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteSummary {
    pub votes_written: usize,
    pub polls_written: usize,
    pub failures: usize,
}

pub struct VoteAggregator {
    correlator: Arc<Correlator>,
    writer: Arc<ReconciliationWriter>,
    write_delay: Duration,
}

impl VoteAggregator {
    pub fn new(
        correlator: Arc<Correlator>,
        writer: Arc<ReconciliationWriter>,
        write_delay: Duration,
    ) -> Self {
        Self {
            correlator,
            writer,
            write_delay,
        }
    }

    /// Fills missing identifiers from earlier documents of the same poll.
    pub async fn backfill(&self, record: &mut VoteRecord) {
        let mut known = VoteBackfill {
            transaction_id: record.transaction_id.take(),
            deposit_address: record.deposit_address.take(),
            participants: record.participants.take(),
            sender_chain: record.sender_chain.take(),
        };
        self.correlator.backfill_vote(&record.poll_id, &mut known).await;
        record.transaction_id = known.transaction_id;
        record.deposit_address = known.deposit_address;
        record.participants = known.participants;
        record.sender_chain = known.sender_chain;
    }

    #[tracing::instrument(skip_all, fields(votes = records.len()))]
    pub async fn process(&self, mut records: Vec<VoteRecord>) -> VoteSummary {
        let mut summary = VoteSummary::default();
        if records.is_empty() {
            return summary;
        }
        for record in records.iter_mut() {
            self.backfill(record).await;
        }

        tokio::time::sleep(self.write_delay).await;

        for record in &records {
            let state = PollState::classify(record);
            tracing::debug!(
                poll_id = %record.poll_id,
                voter = %record.voter,
                state = state.as_str(),
                "classified vote"
            );
            if state.updates_poll() {
                match self.writer.write_poll(&poll_patch(record, state)).await {
                    Ok(()) => summary.polls_written += 1,
                    Err(_) => summary.failures += 1,
                }
            }
            match self.writer.write_vote(&VoteDocument::from(record)).await {
                Ok(()) => summary.votes_written += 1,
                Err(_) => summary.failures += 1,
            }
        }
        summary
    }
}

fn poll_patch(record: &VoteRecord, state: PollState) -> PollPatch {
    PollPatch {
        id: record.poll_id.clone(),
        height: record.height,
        created_at: record.created_at,
        sender_chain: record.sender_chain.clone(),
        transaction_id: record.transaction_id.clone(),
        participants: record.participants.clone(),
        confirmation: (state == PollState::Confirmed).then_some(true),
        unconfirmed: (state == PollState::Unconfirmed).then_some(true),
    }
}
