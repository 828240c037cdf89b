// Package lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::workflows::transitions::StatusTransitionTable;

/// Lifecycle status shared by packages and consolidated groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    /// Registered on a manifest, nothing done yet
    Pending,
    Processing,
    Shipped,
    /// Held at customs clearance
    Customs,
    /// Cleared and ready for pickup or delivery
    Ready,
    Delivered,
    Delayed,
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown package status: {0}")]
pub struct ParseStatusError(pub String);

impl PackageStatus {
    pub const ALL: [PackageStatus; 8] = [
        PackageStatus::Pending,
        PackageStatus::Processing,
        PackageStatus::Shipped,
        PackageStatus::Customs,
        PackageStatus::Ready,
        PackageStatus::Delivered,
        PackageStatus::Delayed,
        PackageStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageStatus::Pending => "pending",
            PackageStatus::Processing => "processing",
            PackageStatus::Shipped => "shipped",
            PackageStatus::Customs => "customs",
            PackageStatus::Ready => "ready",
            PackageStatus::Delivered => "delivered",
            PackageStatus::Delayed => "delayed",
            PackageStatus::Cancelled => "cancelled",
        }
    }

    /// States reachable from this one in a single transition
    pub fn allowed_next_states(&self) -> &'static [PackageStatus] {
        StatusTransitionTable::allowed_next_states(*self)
    }

    pub fn can_transition_to(&self, target: PackageStatus) -> bool {
        StatusTransitionTable::allows(*self, target)
    }

    /// A status with no legal successor
    pub fn is_terminal(&self) -> bool {
        self.allowed_next_states().is_empty()
    }

    /// Position along the happy path. Used to pick the status a new group
    /// mirrors when its members disagree: the least advanced one wins.
    pub fn lifecycle_rank(&self) -> u8 {
        match self {
            PackageStatus::Pending => 0,
            PackageStatus::Delayed => 1,
            PackageStatus::Processing => 2,
            PackageStatus::Shipped => 3,
            PackageStatus::Customs => 4,
            PackageStatus::Ready => 5,
            PackageStatus::Delivered => 6,
            PackageStatus::Cancelled => 7,
        }
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        PackageStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}
