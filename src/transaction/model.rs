//! Transaction record and the partial updates the engine writes to it

use super::TransactionStatus;
use crate::providers::ProviderKind;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Fine-grained reason shown to the user next to the canonical status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    UndefinedCoin,
    InvalidAddressCode,
    OutOfLimitsCode,
    PartnerInternalCode,
    UndefinedErrorCode,
    RateNotFound,
    EmergencyInvalidAddress,
    EmergencyFailed,
}

impl StatusCode {
    const ALL: [StatusCode; 8] = [
        StatusCode::UndefinedCoin,
        StatusCode::InvalidAddressCode,
        StatusCode::OutOfLimitsCode,
        StatusCode::PartnerInternalCode,
        StatusCode::UndefinedErrorCode,
        StatusCode::RateNotFound,
        StatusCode::EmergencyInvalidAddress,
        StatusCode::EmergencyFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::UndefinedCoin => "UNDEFINED_COIN",
            StatusCode::InvalidAddressCode => "INVALID_ADDRESS_CODE",
            StatusCode::OutOfLimitsCode => "OUT_OF_LIMITS_CODE",
            StatusCode::PartnerInternalCode => "PARTNER_INTERNAL_CODE",
            StatusCode::UndefinedErrorCode => "UNDEFINED_ERROR_CODE",
            StatusCode::RateNotFound => "RATE_NOT_FOUND",
            StatusCode::EmergencyInvalidAddress => "EMERGENCY_INVALID_ADDRESS",
            StatusCode::EmergencyFailed => "EMERGENCY_FAILED",
        }
    }

    /// Message safe to show the end user; never carries provider detail
    pub fn user_message(&self) -> &'static str {
        match self {
            StatusCode::UndefinedCoin => "This currency is not available for exchange right now",
            StatusCode::InvalidAddressCode => "The destination address was rejected",
            StatusCode::OutOfLimitsCode => "The amount is outside the allowed limits",
            StatusCode::PartnerInternalCode => "The exchange partner is temporarily unavailable",
            StatusCode::UndefinedErrorCode => "The exchange could not be created",
            StatusCode::RateNotFound => "No exchange rate is available for this pair",
            StatusCode::EmergencyInvalidAddress => {
                "The address for your choice was rejected, please choose again"
            }
            StatusCode::EmergencyFailed => "Your choice could not be applied, support will contact you",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusCode::ALL
            .iter()
            .find(|code| code.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown status code: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateType {
    Fixed,
    Float,
}

impl RateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateType::Fixed => "fixed",
            RateType::Float => "float",
        }
    }
}

impl FromStr for RateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(RateType::Fixed),
            "float" => Ok(RateType::Float),
            other => Err(format!("unknown rate type: {}", other)),
        }
    }
}

/// Which side of the pair `amount` is denominated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    From,
    To,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::From => "from",
            Direction::To => "to",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "from" => Ok(Direction::From),
            "to" => Ok(Direction::To),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyChoice {
    None,
    Exchange,
    Refund,
}

impl EmergencyChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyChoice::None => "none",
            EmergencyChoice::Exchange => "exchange",
            EmergencyChoice::Refund => "refund",
        }
    }
}

impl FromStr for EmergencyChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(EmergencyChoice::None),
            "exchange" => Ok(EmergencyChoice::Exchange),
            "refund" => Ok(EmergencyChoice::Refund),
            other => Err(format!("unknown emergency choice: {}", other)),
        }
    }
}

/// One leg of an order as the provider registered it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub currency: Option<String>,
    pub network: Option<String>,
    pub amount: Option<Decimal>,
    pub address: Option<String>,
    pub tag: Option<String>,
}

/// Funds observed by the provider on one leg
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Received {
    pub id: Option<String>,
    pub amount: Option<Decimal>,
    pub confirmations: Option<i32>,
}

impl Received {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.amount.is_none() && self.confirmations.is_none()
    }
}

/// Exchange transaction row, owned by the external store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub status: TransactionStatus,
    pub status_code: Option<StatusCode>,
    pub status_message: Option<String>,
    pub provider: Option<ProviderKind>,

    // Request
    pub rate_type: RateType,
    pub direction: Direction,
    pub from_currency: String,
    pub from_network: String,
    pub to_currency: String,
    pub to_network: String,
    pub amount: Decimal,
    pub to_address: String,
    pub to_tag: Option<String>,
    pub refund_address: Option<String>,
    pub refund_tag: Option<String>,

    // Echoed by the provider
    pub final_from: Leg,
    pub final_to: Leg,
    pub final_back: Leg,
    pub transaction_id: Option<String>,
    pub transaction_token: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,

    // Reconciliation only
    pub received_from: Received,
    pub received_to: Received,
    pub received_back: Received,

    // Written by the moderator surface; the engine reads these
    pub emergency_choice: EmergencyChoice,
    pub emergency_address: Option<String>,
    pub emergency_tag: Option<String>,
    pub is_emergency_handled: bool,
    pub made_emergency_action: bool,

    pub is_status_shown: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Whether an emergency choice is waiting for the provider
    pub fn emergency_pending(&self) -> bool {
        self.status == TransactionStatus::Emergency
            && self.emergency_choice != EmergencyChoice::None
            && !self.made_emergency_action
            && !self.is_emergency_handled
    }

    #[cfg(test)]
    pub fn apply(&mut self, update: &TransactionUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(code) = update.status_code {
            self.status_code = Some(code);
        }
        if let Some(ref message) = update.status_message {
            self.status_message = Some(message.clone());
        }
        if let Some(provider) = update.provider {
            self.provider = Some(provider);
        }
        if let Some(ref leg) = update.final_from {
            self.final_from = leg.clone();
        }
        if let Some(ref leg) = update.final_to {
            self.final_to = leg.clone();
        }
        if let Some(ref leg) = update.final_back {
            self.final_back = leg.clone();
        }
        if let Some(ref id) = update.transaction_id {
            self.transaction_id = Some(id.clone());
        }
        if let Some(ref token) = update.transaction_token {
            self.transaction_token = Some(token.clone());
        }
        if let Some(at) = update.registered_at {
            self.registered_at = Some(at);
        }
        if let Some(at) = update.expires_at {
            self.expires_at = Some(at);
        }
        if let Some(ref received) = update.received_from {
            self.received_from = received.clone();
        }
        if let Some(ref received) = update.received_to {
            self.received_to = received.clone();
        }
        if let Some(ref received) = update.received_back {
            self.received_back = received.clone();
        }
        if let Some(choice) = update.emergency_choice {
            self.emergency_choice = choice;
        }
        if let Some(flag) = update.made_emergency_action {
            self.made_emergency_action = flag;
        }
        if let Some(flag) = update.is_emergency_handled {
            self.is_emergency_handled = flag;
        }
        if let Some(flag) = update.is_status_shown {
            self.is_status_shown = flag;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update; `None` leaves the stored column untouched so fields
/// written concurrently by other components survive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionUpdate {
    pub status: Option<TransactionStatus>,
    pub status_code: Option<StatusCode>,
    pub status_message: Option<String>,
    pub provider: Option<ProviderKind>,
    pub final_from: Option<Leg>,
    pub final_to: Option<Leg>,
    pub final_back: Option<Leg>,
    pub transaction_id: Option<String>,
    pub transaction_token: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub received_from: Option<Received>,
    pub received_to: Option<Received>,
    pub received_back: Option<Received>,
    pub emergency_choice: Option<EmergencyChoice>,
    pub made_emergency_action: Option<bool>,
    pub is_emergency_handled: Option<bool>,
    pub is_status_shown: Option<bool>,
}

impl TransactionUpdate {
    pub fn is_empty(&self) -> bool {
        *self == TransactionUpdate::default()
    }

    /// Status change that also re-arms the notification flag
    pub fn status(status: TransactionStatus) -> Self {
        Self {
            status: Some(status),
            is_status_shown: Some(false),
            ..Default::default()
        }
    }

    /// Terminal failure with a user-facing code
    pub fn failed(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(code),
            status_message: Some(message.into()),
            ..Self::status(TransactionStatus::Error)
        }
    }
}
