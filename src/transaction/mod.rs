//! Exchange transaction data model
//!
//! Handles:
//! - The transaction record and its provider-echoed fields
//! - The canonical status graph every provider maps into
//! - Partial updates written during processing

mod model;
mod status;

pub use model::{
    Direction, EmergencyChoice, Leg, RateType, Received, StatusCode, Transaction,
    TransactionUpdate,
};
pub use status::TransactionStatus;
