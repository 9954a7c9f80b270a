//! GTFS-realtime trip updates: parsed store and double-buffered gateway.

pub mod gateway;
pub mod store;

use thiserror::Error;

pub use gateway::{ActiveSide, RealtimeGateway};
pub use store::{MatchMode, RealtimeStore, RtStopTime, TimeBasis};

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Network error: {0}")]
    NetworkMessage(String),
    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("empty realtime payload")]
    EmptyPayload,
}

/// How a trip update's start_date is matched against a candidate trip.
///
/// Agencies disagree on whether an after-midnight trip carries the service
/// date (the previous civil day) or the day the vehicle actually rolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateMatch {
    ServiceDate,
    ActualDate,
    NoMatching,
}

impl DateMatch {
    pub fn from_config(level: u32) -> Self {
        match level {
            1 => Self::ActualDate,
            2 => Self::NoMatching,
            _ => Self::ServiceDate,
        }
    }
}
