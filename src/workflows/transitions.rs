// Legal status edges. Every transition check in the crate goes through here.

use crate::models::PackageStatus;

use PackageStatus::*;

/// Static lookup of allowed status changes
pub struct StatusTransitionTable;

impl StatusTransitionTable {
    pub fn allowed_next_states(current: PackageStatus) -> &'static [PackageStatus] {
        match current {
            Pending => &[Processing, Delayed, Cancelled],
            Processing => &[Shipped, Customs, Ready, Delayed, Cancelled],
            Shipped => &[Customs, Ready, Delayed, Cancelled],
            Customs => &[Ready, Delayed],
            Ready => &[Delivered, Delayed],
            Delayed => &[Processing, Shipped, Customs, Ready, Cancelled],
            Delivered | Cancelled => &[],
        }
    }

    pub fn allows(from: PackageStatus, to: PackageStatus) -> bool {
        Self::allowed_next_states(from).contains(&to)
    }
}
