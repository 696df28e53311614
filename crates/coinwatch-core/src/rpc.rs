//! Read contracts served from the last committed ledger snapshot.

use serde::{Deserialize, Serialize};

use crate::coin::Coin;
use crate::ledger::{LedgerReader, LedgerSnapshot};

/// Response of `getinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetInfoResult {
    /// Height of the chain cursor's tip, 0 before the first scan.
    pub blockheight: u32,
}

/// Response of `listcoins`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCoinsResult {
    /// Every known coin, ordered by outpoint.
    pub coins: Vec<Coin>,
}

impl From<&LedgerSnapshot> for GetInfoResult {
    fn from(snapshot: &LedgerSnapshot) -> Self {
        Self {
            blockheight: snapshot.height().unwrap_or(0),
        }
    }
}

impl From<&LedgerSnapshot> for ListCoinsResult {
    fn from(snapshot: &LedgerSnapshot) -> Self {
        Self {
            coins: snapshot.coins.clone(),
        }
    }
}

impl LedgerReader {
    pub fn get_info(&self) -> GetInfoResult {
        GetInfoResult::from(&*self.snapshot())
    }

    pub fn list_coins(&self) -> ListCoinsResult {
        ListCoinsResult::from(&*self.snapshot())
    }
}
