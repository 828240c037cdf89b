// Surrogate keys for the relational store

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

surrogate_id!(
    /// Identifier of a single physical package
    PackageId
);
surrogate_id!(
    /// Identifier of a consolidated package group
    ConsolidatedId
);
surrogate_id!(
    /// Owning customer of packages and groups
    CustomerId
);
surrogate_id!(
    /// Operator performing a mutation
    ActorId
);
surrogate_id!(HistoryId);
