//! Event priority classification for webhook processing.
//!
//! Every inbound webhook event is classified into one of three priority
//! tiers before it is enqueued. Workers serve higher tiers first, so call
//! control events (which mutate call state) are never stuck behind a
//! backlog of bookkeeping events.
//!
//! ## Priority Tiers
//!
//! - **High (10)**: call control events — `call.initiated`, `call.answered`,
//!   `call.hangup`, `call.bridged`, `call.recording.saved`
//! - **Medium (5)**: interaction events — `call.dtmf.received`,
//!   `call.playback.started`, `call.playback.ended`
//! - **Low (1)**: everything else (default)
//!
//! Classification is total: unknown event types are accepted and classified
//! as [`EventPriority::Low`], never rejected.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event priority tiers that determine queue service order.
///
/// Higher-priority jobs are dequeued before lower-priority jobs; jobs within
/// the same tier are served oldest-first. The numeric weights are stored in
/// the database and used directly in the claim query's `ORDER BY`.
///
/// # Examples
///
/// ```rust
/// use trunkline::EventPriority;
/// use std::str::FromStr;
///
/// let priority = EventPriority::from_str("high").unwrap();
/// assert_eq!(priority, EventPriority::High);
///
/// // Numeric weight for database storage
/// assert_eq!(priority.as_i32(), 10);
///
/// assert!(EventPriority::High > EventPriority::Medium);
/// assert!(EventPriority::Medium > EventPriority::Low);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum EventPriority {
    /// Low priority events - the default tier for anything unrecognized.
    #[default]
    Low = 1,

    /// Medium priority events - in-call interaction (DTMF, playback).
    Medium = 5,

    /// High priority events - call control transitions that mutate call state.
    High = 10,
}

/// Event types served at high priority.
const HIGH_PRIORITY_EVENTS: &[&str] = &[
    "call.initiated",
    "call.answered",
    "call.hangup",
    "call.bridged",
    "call.recording.saved",
];

/// Event types served at medium priority.
const MEDIUM_PRIORITY_EVENTS: &[&str] = &[
    "call.dtmf.received",
    "call.playback.started",
    "call.playback.ended",
];

/// Classifies a webhook event type into its priority tier.
///
/// This function is total and deterministic: any string is accepted, and
/// anything outside the known call-control and interaction sets classifies
/// as [`EventPriority::Low`].
///
/// # Examples
///
/// ```rust
/// use trunkline::{EventPriority, classify};
///
/// assert_eq!(classify("call.initiated"), EventPriority::High);
/// assert_eq!(classify("call.dtmf.received"), EventPriority::Medium);
/// assert_eq!(classify("unknown.custom"), EventPriority::Low);
/// ```
pub fn classify(event_type: &str) -> EventPriority {
    if HIGH_PRIORITY_EVENTS.contains(&event_type) {
        EventPriority::High
    } else if MEDIUM_PRIORITY_EVENTS.contains(&event_type) {
        EventPriority::Medium
    } else {
        EventPriority::Low
    }
}

impl EventPriority {
    /// Gets the numeric weight of the priority for database storage.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Creates an EventPriority from a stored numeric weight.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trunkline::EventPriority;
    ///
    /// assert_eq!(EventPriority::from_i32(10).unwrap(), EventPriority::High);
    /// assert_eq!(EventPriority::from_i32(1).unwrap(), EventPriority::Low);
    /// assert!(EventPriority::from_i32(7).is_err());
    /// ```
    pub fn from_i32(value: i32) -> Result<Self, PriorityError> {
        match value {
            1 => Ok(EventPriority::Low),
            5 => Ok(EventPriority::Medium),
            10 => Ok(EventPriority::High),
            _ => Err(PriorityError::InvalidPriorityValue(value)),
        }
    }

    /// Gets all priority tiers in order from lowest to highest.
    pub fn all_priorities() -> Vec<EventPriority> {
        vec![
            EventPriority::Low,
            EventPriority::Medium,
            EventPriority::High,
        ]
    }
}

impl std::fmt::Display for EventPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventPriority::Low => write!(f, "low"),
            EventPriority::Medium => write!(f, "medium"),
            EventPriority::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for EventPriority {
    type Err = PriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" | "l" | "default" => Ok(EventPriority::Low),
            "medium" | "m" => Ok(EventPriority::Medium),
            "high" | "h" => Ok(EventPriority::High),
            _ => Err(PriorityError::InvalidPriorityString(s.to_string())),
        }
    }
}

/// Errors related to priority handling
#[derive(Error, Debug)]
pub enum PriorityError {
    #[error("Invalid priority value: {0}. Must be one of 1, 5, 10")]
    InvalidPriorityValue(i32),

    #[error("Invalid priority string: '{0}'. Valid values are: low, medium, high")]
    InvalidPriorityString(String),
}
