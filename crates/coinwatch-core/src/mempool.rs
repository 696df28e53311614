//! Mempool layer: unconfirmed deposits and pending spends.
//!
//! The layer is rebuilt from scratch on every mempool sync and is never
//! persisted. Readers see it merged on top of the persisted coins.

use std::collections::{BTreeMap, HashMap};

use crate::coin::{Coin, SpendInfo};
use crate::types::{OutPoint, Transaction, WatchList};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MempoolLayer {
    txs: HashMap<String, Transaction>,
    deposits: BTreeMap<OutPoint, Coin>,
    spends: BTreeMap<OutPoint, String>,
}

impl MempoolLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the layer from the current mempool contents.
    ///
    /// `is_persisted` reports whether an outpoint is already a persisted coin.
    /// Deposits to those are not duplicated; spends of them are recorded.
    pub fn build<F>(txs: Vec<Transaction>, watch: &WatchList, is_persisted: F) -> Self
    where
        F: Fn(&OutPoint) -> bool,
    {
        let mut deposits = BTreeMap::new();
        for tx in &txs {
            for (outpoint, out) in tx.created() {
                let Some(address) = watch.matches(out) else {
                    continue;
                };
                if !is_persisted(&outpoint) {
                    deposits.insert(outpoint.clone(), Coin::new(outpoint, address, out.amount));
                }
            }
        }

        // Second pass so chained unconfirmed spends of mempool deposits are seen.
        let mut spends = BTreeMap::new();
        for tx in &txs {
            for input in &tx.inputs {
                if is_persisted(input) || deposits.contains_key(input) {
                    spends.insert(input.clone(), tx.txid.clone());
                }
            }
        }

        Self {
            txs: txs.into_iter().map(|tx| (tx.txid.clone(), tx)).collect(),
            deposits,
            spends,
        }
    }

    /// Whether `txid` was in the mempool at the last sync.
    pub fn contains_tx(&self, txid: &str) -> bool {
        self.txs.contains_key(txid)
    }

    /// A transaction fetched during the last sync, reused to avoid refetching.
    pub fn cached(&self, txid: &str) -> Option<&Transaction> {
        self.txs.get(txid)
    }

    /// The unconfirmed transaction spending `outpoint`, if any.
    pub fn spend_of(&self, outpoint: &OutPoint) -> Option<&str> {
        self.spends.get(outpoint).map(String::as_str)
    }

    pub fn deposits(&self) -> impl Iterator<Item = &Coin> {
        self.deposits.values()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Overlay the layer on persisted coins, ordered by outpoint.
    ///
    /// A persisted coin picks up a pending spend only when it has no spend
    /// recorded; persisted state always wins over the mempool.
    pub fn overlay(&self, persisted: &BTreeMap<OutPoint, Coin>) -> Vec<Coin> {
        let mut merged: BTreeMap<&OutPoint, Coin> = persisted
            .iter()
            .map(|(op, coin)| (op, coin.clone()))
            .collect();
        for (op, coin) in &self.deposits {
            merged.entry(op).or_insert_with(|| coin.clone());
        }
        for (op, coin) in merged.iter_mut() {
            if coin.spend_info.is_none() {
                if let Some(txid) = self.spends.get(*op) {
                    coin.spend_info = Some(SpendInfo {
                        txid: txid.clone(),
                        height: None,
                    });
                }
            }
        }
        merged.into_values().collect()
    }
}
