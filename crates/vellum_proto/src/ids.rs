//! Canonical identifier newtypes shared across the system.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("id must be positive: {0}")]
    NotPositive(i32),
    #[error("invalid id: {0}")]
    Parse(String),
}

macro_rules! positive_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
        )]
        #[serde(transparent)]
        pub struct $name(i32);

        impl $name {
            pub const fn new(value: i32) -> Self {
                Self(value)
            }

            pub const fn as_i32(self) -> i32 {
                self.0
            }

            pub fn checked(value: i32) -> Result<Self, IdError> {
                if value < 1 {
                    return Err(IdError::NotPositive(value));
                }
                Ok(Self(value))
            }

            /// The id that follows this one.
            pub fn next(self) -> Self {
                Self(self.0.wrapping_add(1).max(1))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| IdError::Parse(s.to_string()))?;
                Self::checked(value)
            }
        }
    };
}

positive_id!(
    /// Canonical job identifier, monotonically increasing per server lifetime.
    JobId
);
positive_id!(
    /// Stable destination (printer or class) identifier.
    DestId
);
positive_id!(
    /// Subscription identifier, unique per server.
    SubscriptionId
);
