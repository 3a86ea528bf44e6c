//! Confirmation-depth policies
//!
//! A receipt only finalizes an attempt once it is deep enough. Depth is
//! either a plain block count behind the head, or inclusion at or below a
//! named tag the node tracks (safe / finalized), which survives reorgs the
//! way a fixed count does not.

use super::ChainClient;
use crate::error::SenderResult;

use serde::Deserialize;

/// Named block tags a node resolves to concrete heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockTag {
    Latest,
    Safe,
    Finalized,
}

/// When does a receipt count as confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ConfirmationPolicy {
    /// At least this many blocks between the receipt and the head.
    Blocks(u64),
    /// Included at or below the block the tag currently points at.
    Tag(BlockTag),
}

impl ConfirmationPolicy {
    /// Decide whether a receipt mined at `receipt_block` is deep enough,
    /// given the head observed at the start of the check pass.
    pub async fn is_deep_enough(
        &self,
        chain: &dyn ChainClient,
        receipt_block: u64,
        current_block: u64,
    ) -> SenderResult<bool> {
        match self {
            ConfirmationPolicy::Blocks(depth) => {
                Ok(current_block >= receipt_block.saturating_add(*depth))
            }
            ConfirmationPolicy::Tag(tag) => {
                let tagged = chain.tag_block_number(*tag).await?;
                Ok(receipt_block <= tagged)
            }
        }
    }
}
