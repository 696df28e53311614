//! Coin records and their lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::OutPoint;

/// The transaction spending a coin, and the height it confirmed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendInfo {
    pub txid: String,
    /// `None` while the spend is only known from the mempool.
    pub height: Option<u32>,
}

/// A tracked output paying one of the watched addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub address: String,
    /// Value in satoshis.
    pub amount: u64,
    /// Height of the block confirming the deposit, `None` if unconfirmed.
    pub block_height: Option<u32>,
    pub spend_info: Option<SpendInfo>,
}

/// Lifecycle state derived from `block_height` and `spend_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoinStatus {
    Unconfirmed,
    Confirmed,
    Spending,
    Spent,
}

impl fmt::Display for CoinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfirmed => write!(f, "unconfirmed"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Spending => write!(f, "spending"),
            Self::Spent => write!(f, "spent"),
        }
    }
}

impl Coin {
    /// A new, unconfirmed and unspent coin.
    pub fn new(outpoint: OutPoint, address: impl Into<String>, amount: u64) -> Self {
        Self {
            outpoint,
            address: address.into(),
            amount,
            block_height: None,
            spend_info: None,
        }
    }

    /// The transaction that created this coin.
    pub fn deposit_txid(&self) -> &str {
        &self.outpoint.txid
    }

    pub fn status(&self) -> CoinStatus {
        match (&self.spend_info, self.block_height) {
            (Some(SpendInfo { height: Some(_), .. }), _) => CoinStatus::Spent,
            (Some(SpendInfo { height: None, .. }), _) => CoinStatus::Spending,
            (None, Some(_)) => CoinStatus::Confirmed,
            (None, None) => CoinStatus::Unconfirmed,
        }
    }

    /// Check the ordering invariants between deposit and spend confirmation.
    pub fn check(&self) -> Result<(), SyncError> {
        let Some(spend_height) = self.spend_info.as_ref().and_then(|s| s.height) else {
            return Ok(());
        };
        match self.block_height {
            None => Err(self.inconsistent(format!(
                "spend confirmed at {spend_height} but deposit is unconfirmed"
            ))),
            Some(deposit) if spend_height < deposit => Err(self.inconsistent(format!(
                "spend confirmed at {spend_height} below deposit height {deposit}"
            ))),
            Some(_) => Ok(()),
        }
    }

    fn inconsistent(&self, reason: String) -> SyncError {
        SyncError::Inconsistent {
            outpoint: self.outpoint.to_string(),
            reason,
        }
    }
}
