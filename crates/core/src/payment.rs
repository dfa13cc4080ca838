//! Payment methods accepted at a register.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// How money moved: physical cash, card terminal, or a digital wallet transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Digital,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 3] = [PaymentMethod::Cash, PaymentMethod::Card, PaymentMethod::Digital];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Digital => "digital",
        }
    }

    pub fn is_cash(self) -> bool {
        matches!(self, PaymentMethod::Cash)
    }
}

impl core::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            // Wallet brands all settle into the digital bucket.
            "digital" | "wallet" | "yape" | "plin" => Ok(PaymentMethod::Digital),
            other => Err(DomainError::validation(format!(
                "payment method must be one of: cash, card, digital (got '{other}')"
            ))),
        }
    }
}
