//! Canonical transaction lifecycle
//!
//! ```text
//! NEW -> HANDLED -> CREATED -> {PENDING, EXCHANGE, WITHDRAW} -> DONE
//! ```
//!
//! Any non-terminal state may move to ERROR, EXPIRED or EMERGENCY. EXPIRED
//! may also close as DONE when the provider refunds an overdue order, but
//! never re-enters the progression. EMERGENCY rejoins the normal progression
//! once the provider acts on the recorded choice.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Provider-agnostic transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    New,
    Handled,
    Created,
    Pending,
    Exchange,
    Withdraw,
    Done,
    Error,
    Expired,
    Emergency,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 10] = [
        TransactionStatus::New,
        TransactionStatus::Handled,
        TransactionStatus::Created,
        TransactionStatus::Pending,
        TransactionStatus::Exchange,
        TransactionStatus::Withdraw,
        TransactionStatus::Done,
        TransactionStatus::Error,
        TransactionStatus::Expired,
        TransactionStatus::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::New => "new",
            TransactionStatus::Handled => "handled",
            TransactionStatus::Created => "created",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Exchange => "exchange",
            TransactionStatus::Withdraw => "withdraw",
            TransactionStatus::Done => "done",
            TransactionStatus::Error => "error",
            TransactionStatus::Expired => "expired",
            TransactionStatus::Emergency => "emergency",
        }
    }

    /// No transition ever leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Done | TransactionStatus::Error)
    }

    /// Position in the forward progression; side states have none
    fn rank(&self) -> Option<u8> {
        match self {
            TransactionStatus::New => Some(0),
            TransactionStatus::Handled => Some(1),
            TransactionStatus::Created => Some(2),
            TransactionStatus::Pending => Some(3),
            TransactionStatus::Exchange => Some(4),
            TransactionStatus::Withdraw => Some(5),
            TransactionStatus::Done => Some(6),
            TransactionStatus::Error
            | TransactionStatus::Expired
            | TransactionStatus::Emergency => None,
        }
    }

    /// Whether `self -> next` is a legal forward move. Staying put is not a
    /// transition.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;

        if *self == next || self.is_terminal() {
            return false;
        }

        match (*self, next) {
            (Expired, to) => matches!(to, Error | Done | Emergency),
            (_, Error) | (_, Expired) | (_, Emergency) => true,
            // Emergency resolves back into the progression after creation
            (Emergency, to) => matches!(to, Pending | Exchange | Withdraw | Done),
            (from, to) => match (from.rank(), to.rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown transaction status: {}", s))
    }
}
