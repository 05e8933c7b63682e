use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::money::Money;
use super::normalize::{normalize, NormalizedDescription};

/// Which way money moved, as recorded by the out/in columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Out,
    In,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => write!(f, "out"),
            Direction::In => write!(f, "in"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Description is empty")]
    EmptyDescription,
    #[error("Transaction has both out and in amounts")]
    BothAmounts,
    #[error("Transaction has neither an out nor an in amount")]
    NoAmount,
    #[error("Amount {0} is negative")]
    NegativeAmount(Money),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub date: NaiveDate,
    pub description: String,
    pub out_amount: Option<Money>,
    pub in_amount: Option<Money>,
}

/// A raw transaction that passed input checks, with its description
/// normalized once.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTransaction {
    pub normalized: NormalizedDescription,
    pub direction: Direction,
    pub amount: Money,
}

impl RawTransaction {
    pub fn outgoing(date: NaiveDate, description: &str, amount: Money) -> Self {
        RawTransaction {
            date,
            description: description.to_string(),
            out_amount: Some(amount),
            in_amount: None,
        }
    }

    pub fn incoming(date: NaiveDate, description: &str, amount: Money) -> Self {
        RawTransaction {
            date,
            description: description.to_string(),
            out_amount: None,
            in_amount: Some(amount),
        }
    }

    pub fn normalized(&self) -> NormalizedDescription {
        normalize(&self.description)
    }

    pub fn validate(&self) -> Result<ValidatedTransaction, InputError> {
        let normalized = self.normalized();
        if normalized.is_empty() {
            return Err(InputError::EmptyDescription);
        }

        let (direction, amount) = match (self.out_amount, self.in_amount) {
            (Some(_), Some(_)) => return Err(InputError::BothAmounts),
            (None, None) => return Err(InputError::NoAmount),
            (Some(out), None) => (Direction::Out, out),
            (None, Some(inc)) => (Direction::In, inc),
        };
        if amount.is_negative() {
            return Err(InputError::NegativeAmount(amount));
        }

        Ok(ValidatedTransaction {
            normalized,
            direction,
            amount,
        })
    }
}
