//! HTTP JSON-RPC implementation of the chain facade

use super::{BlockTag, ChainClient};
use crate::error::{SenderError, SenderResult};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip2930::AccessListWithGasUsed;
use ethers::types::{Address, BlockId, BlockNumber, Bytes, TransactionReceipt, H256, U256};
use std::time::Duration;
use tracing::debug;

impl From<BlockTag> for BlockNumber {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Latest => BlockNumber::Latest,
            BlockTag::Safe => BlockNumber::Safe,
            BlockTag::Finalized => BlockNumber::Finalized,
        }
    }
}

/// `ethers` provider wrapper addressing one endpoint
pub struct RpcClient {
    provider: Provider<Http>,
    endpoint: String,
}

impl RpcClient {
    pub fn new(endpoint: &str) -> SenderResult<Self> {
        let provider = Provider::<Http>::try_from(endpoint)
            .map_err(|e| SenderError::Config(format!("invalid endpoint {}: {}", endpoint, e)))?
            .interval(Duration::from_millis(100));

        debug!(endpoint, "chain client initialized");
        Ok(Self {
            provider,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn io<E: std::fmt::Display>(err: E) -> SenderError {
        SenderError::ChainIo(err.to_string())
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn chain_id(&self) -> SenderResult<u64> {
        let id = self.provider.get_chainid().await.map_err(Self::io)?;
        Ok(id.as_u64())
    }

    async fn block_number(&self) -> SenderResult<u64> {
        let number = self.provider.get_block_number().await.map_err(Self::io)?;
        Ok(number.as_u64())
    }

    async fn base_fee(&self) -> SenderResult<Option<U256>> {
        let block = self
            .provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(Self::io)?
            .ok_or_else(|| SenderError::ChainIo("no latest block".to_string()))?;
        Ok(block.base_fee_per_gas)
    }

    async fn suggest_gas_tip(&self) -> SenderResult<U256> {
        self.provider
            .request("eth_maxPriorityFeePerGas", ())
            .await
            .map_err(Self::io)
    }

    async fn pending_nonce(&self, addr: Address) -> SenderResult<u64> {
        let nonce = self
            .provider
            .get_transaction_count(addr, Some(BlockId::Number(BlockNumber::Pending)))
            .await
            .map_err(Self::io)?;
        Ok(nonce.as_u64())
    }

    async fn call(&self, tx: &TypedTransaction) -> SenderResult<Bytes> {
        self.provider.call(tx, None).await.map_err(Self::io)
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> SenderResult<U256> {
        self.provider
            .estimate_gas(tx, None)
            .await
            .map_err(|e| SenderError::Estimation(e.to_string()))
    }

    async fn create_access_list(
        &self,
        tx: &TypedTransaction,
    ) -> SenderResult<AccessListWithGasUsed> {
        self.provider
            .create_access_list(tx, None)
            .await
            .map_err(|e| SenderError::Estimation(e.to_string()))
    }

    async fn send_raw(&self, raw: Bytes) -> SenderResult<H256> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(SenderError::from_broadcast)?;
        Ok(pending.tx_hash())
    }

    async fn get_receipt(&self, hash: H256) -> SenderResult<Option<TransactionReceipt>> {
        self.provider
            .get_transaction_receipt(hash)
            .await
            .map_err(Self::io)
    }

    async fn tag_block_number(&self, tag: BlockTag) -> SenderResult<u64> {
        let block = self
            .provider
            .get_block(BlockNumber::from(tag))
            .await
            .map_err(Self::io)?
            .ok_or_else(|| SenderError::ChainIo(format!("no block behind tag {:?}", tag)))?;
        block
            .number
            .map(|n| n.as_u64())
            .ok_or_else(|| SenderError::ChainIo("tagged block has no number".to_string()))
    }
}
