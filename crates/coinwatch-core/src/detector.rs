//! Change detection: classifies the delta between the chain cursor and the
//! chain source's tip.

use crate::cursor::ChainCursor;
use crate::error::SyncError;
use crate::source::ChainSource;
use crate::types::BlockRef;

/// What happened to the chain since the last pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainChange {
    /// The source tip is the recorded tip.
    Unchanged,
    /// New blocks on top of the recorded tip; scan `[from, to]`.
    Extended { from: u32, to: u32 },
    /// The recorded tip is no longer on the best chain.
    Reorganized {
        previous_tip: BlockRef,
        new_tip: BlockRef,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    birth_height: u32,
}

impl ChangeDetector {
    pub fn new(birth_height: u32) -> Self {
        Self { birth_height }
    }

    pub fn birth_height(&self) -> u32 {
        self.birth_height
    }

    /// Compare `cursor` with the source's current `tip`.
    ///
    /// An empty cursor means nothing was scanned yet: everything from the
    /// birth height up is an extension.
    pub async fn classify<S: ChainSource + ?Sized>(
        &self,
        source: &S,
        cursor: &ChainCursor,
        tip: &BlockRef,
    ) -> Result<ChainChange, SyncError> {
        let Some(local) = cursor.tip() else {
            return Ok(if tip.height >= self.birth_height {
                ChainChange::Extended {
                    from: self.birth_height,
                    to: tip.height,
                }
            } else {
                ChainChange::Unchanged
            });
        };

        if local == tip {
            return Ok(ChainChange::Unchanged);
        }

        if tip.height > local.height {
            let remote = source.block_hash(local.height).await?;
            if remote == local.hash {
                return Ok(ChainChange::Extended {
                    from: local.height + 1,
                    to: tip.height,
                });
            }
        }

        Ok(ChainChange::Reorganized {
            previous_tip: local.clone(),
            new_tip: tip.clone(),
        })
    }
}
