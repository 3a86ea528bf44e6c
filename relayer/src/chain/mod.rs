//! Chain access module
//!
//! This module provides:
//! - The narrow `ChainClient` capability the sender drives the node through
//! - An `ethers` HTTP implementation of that capability
//! - Confirmation-depth policies (block count or named tag)

pub mod confirm;
pub mod rpc;

pub use confirm::{BlockTag, ConfirmationPolicy};
pub use rpc::RpcClient;

use crate::error::SenderResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip2930::AccessListWithGasUsed;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// The capability surface the sender needs from an EVM node.
///
/// Kept deliberately narrow: this trait is the only seam the test suite
/// substitutes with a fake node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> SenderResult<u64>;

    async fn block_number(&self) -> SenderResult<u64>;

    /// Base fee of the latest block; `None` on pre-1559 chains.
    async fn base_fee(&self) -> SenderResult<Option<U256>>;

    async fn suggest_gas_tip(&self) -> SenderResult<U256>;

    async fn pending_nonce(&self, addr: Address) -> SenderResult<u64>;

    /// Read-only execution, used by the gas estimator.
    async fn call(&self, tx: &TypedTransaction) -> SenderResult<Bytes>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> SenderResult<U256>;

    /// The returned gas includes the access-list reimbursement.
    async fn create_access_list(
        &self,
        tx: &TypedTransaction,
    ) -> SenderResult<AccessListWithGasUsed>;

    async fn send_raw(&self, raw: Bytes) -> SenderResult<H256>;

    async fn get_receipt(&self, hash: H256) -> SenderResult<Option<TransactionReceipt>>;

    /// Block number currently behind a named tag ("latest", "safe", "finalized").
    async fn tag_block_number(&self, tag: BlockTag) -> SenderResult<u64>;
}
