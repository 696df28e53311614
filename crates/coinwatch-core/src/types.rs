//! Shared chain types: block references, transactions and the watch list.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ─── BlockRef ─────────────────────────────────────────────────────────────────

/// A block identity at a given height: one entry of the chain cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block height.
    pub height: u32,
    /// Block hash (hex).
    pub hash: String,
}

impl BlockRef {
    pub fn new(height: u32, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.hash, self.height)
    }
}

// ─── OutPoint ─────────────────────────────────────────────────────────────────

/// A transaction output reference, rendered as `"<txid>:<vout>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OutPoint {
    pub txid: String,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl FromStr for OutPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid outpoint '{s}': missing ':'"))?;
        if txid.is_empty() {
            return Err(format!("invalid outpoint '{s}': empty txid"));
        }
        let vout = vout
            .parse::<u32>()
            .map_err(|e| format!("invalid outpoint '{s}': {e}"))?;
        Ok(Self::new(txid, vout))
    }
}

impl TryFrom<String> for OutPoint {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<OutPoint> for String {
    fn from(op: OutPoint) -> Self {
        op.to_string()
    }
}

// ─── Transactions & blocks ────────────────────────────────────────────────────

/// A transaction output. `address` is `None` for non-standard scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub address: Option<String>,
    /// Value in satoshis.
    pub amount: u64,
}

/// The parts of a transaction the ledger cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    /// Previous outputs spent by this transaction (empty for coinbase).
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    /// Iterate `(outpoint, output)` pairs created by this transaction.
    pub fn created(&self) -> impl Iterator<Item = (OutPoint, &TxOut)> + '_ {
        self.outputs
            .iter()
            .enumerate()
            .map(move |(vout, out)| (OutPoint::new(self.txid.clone(), vout as u32), out))
    }
}

/// A full block as returned by the chain source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u32,
    pub hash: String,
    /// Hash of the parent block (empty for genesis).
    pub prev_hash: String,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockRef) -> bool {
        self.height == parent.height + 1 && self.prev_hash == parent.hash
    }

    pub fn block_ref(&self) -> BlockRef {
        BlockRef::new(self.height, self.hash.clone())
    }
}

// ─── WatchList ────────────────────────────────────────────────────────────────

/// The set of addresses whose outputs are tracked as coins.
///
/// Matching is exact: base58 addresses are case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchList {
    addresses: BTreeSet<String>,
}

impl WatchList {
    pub fn new<I, A>(addresses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }

    /// Start watching `address`. Returns `false` if it was already watched.
    pub fn insert(&mut self, address: impl Into<String>) -> bool {
        self.addresses.insert(address.into())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    /// Returns the watched address paid by `out`, if any.
    pub fn matches<'a>(&self, out: &'a TxOut) -> Option<&'a str> {
        out.address.as_deref().filter(|a| self.contains(a))
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outpoint_display_and_parse() {
        let op = OutPoint::new("ab12", 3);
        assert_eq!(op.to_string(), "ab12:3");
        assert_eq!("ab12:3".parse::<OutPoint>().unwrap(), op);
        assert!("ab12".parse::<OutPoint>().is_err());
        assert!(":1".parse::<OutPoint>().is_err());
        assert!("ab12:x".parse::<OutPoint>().is_err());
    }

    #[test]
    fn outpoint_serializes_as_string() {
        let op = OutPoint::new("ff00", 1);
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(json, "\"ff00:1\"");
        let back: OutPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn block_extends_parent() {
        let parent = BlockRef::new(100, "aaa");
        let child = Block {
            height: 101,
            hash: "bbb".into(),
            prev_hash: "aaa".into(),
            transactions: vec![],
        };
        assert!(child.extends(&parent));
        assert!(!child.extends(&BlockRef::new(100, "zzz")));
        assert!(!child.extends(&BlockRef::new(99, "aaa")));
    }

    #[test]
    fn created_outpoints_are_indexed() {
        let tx = Transaction {
            txid: "t1".into(),
            inputs: vec![],
            outputs: vec![
                TxOut { address: Some("a".into()), amount: 5 },
                TxOut { address: None, amount: 7 },
            ],
        };
        let created: Vec<_> = tx.created().map(|(op, out)| (op.to_string(), out.amount)).collect();
        assert_eq!(created, vec![("t1:0".to_string(), 5), ("t1:1".to_string(), 7)]);
    }

    #[test]
    fn watch_list_matches_exact_address() {
        let watch = WatchList::new(["bcrt1qwatched"]);
        let hit = TxOut { address: Some("bcrt1qwatched".into()), amount: 1 };
        let miss = TxOut { address: Some("bcrt1qother".into()), amount: 1 };
        let bare = TxOut { address: None, amount: 1 };
        assert_eq!(watch.matches(&hit), Some("bcrt1qwatched"));
        assert_eq!(watch.matches(&miss), None);
        assert_eq!(watch.matches(&bare), None);
    }
}
