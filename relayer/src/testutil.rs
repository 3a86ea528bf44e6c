//! Test doubles shared by the unit tests
//!
//! `FakeChain` stands in for the RPC node. It accepts raw broadcasts,
//! enforces geth's 10% replacement-pricing rule per nonce, and lets a test
//! plug in an arbitrary async receipt handler (which may consult the store,
//! mirroring how a replaced attempt is discovered as the mined one).

use crate::chain::{BlockTag, ChainClient};
use crate::config::SenderConfig;
use crate::error::{SenderError, SenderResult};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip2930::{AccessList, AccessListItem, AccessListWithGasUsed};
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use ethers::utils::keccak256;
use ethers::utils::rlp::Rlp;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;

pub const TEST_KEY: &str = "1212121212121212121212121212121212121212121212121212121212121212";

/// Percentage a replacement must out-bid the previous same-nonce attempt by,
/// matching geth's default `pricebump`.
const PRICE_BUMP_PERCENT: u64 = 10;

pub type ReceiptFn =
    Box<dyn Fn(H256) -> BoxFuture<'static, SenderResult<Option<TransactionReceipt>>> + Send + Sync>;

struct FakeState {
    block_number: u64,
    base_fee: Option<U256>,
    gas_tip: U256,
    nonces: HashMap<Address, u64>,
    /// Best accepted transaction per nonce, for the replacement rule.
    best_by_nonce: HashMap<u64, TypedTransaction>,
    sent: Vec<(H256, TypedTransaction)>,
    fail_estimation: bool,
    fail_broadcast: bool,
}

pub struct FakeChain {
    state: Mutex<FakeState>,
    receipt_fn: Mutex<Option<ReceiptFn>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                block_number: 100,
                base_fee: Some(U256::from(1_000_000_000u64)),
                gas_tip: U256::from(1_000_000_000u64),
                nonces: HashMap::new(),
                best_by_nonce: HashMap::new(),
                sent: Vec::new(),
                fail_estimation: false,
                fail_broadcast: false,
            }),
            receipt_fn: Mutex::new(None),
        }
    }

    pub fn set_block_number(&self, n: u64) {
        self.state.lock().unwrap().block_number = n;
    }

    pub fn set_pending_nonce(&self, addr: Address, nonce: u64) {
        self.state.lock().unwrap().nonces.insert(addr, nonce);
    }

    pub fn fail_estimation(&self, fail: bool) {
        self.state.lock().unwrap().fail_estimation = fail;
    }

    pub fn fail_broadcast(&self, fail: bool) {
        self.state.lock().unwrap().fail_broadcast = fail;
    }

    pub fn set_receipt_handler<F>(&self, f: F)
    where
        F: Fn(H256) -> BoxFuture<'static, SenderResult<Option<TransactionReceipt>>>
            + Send
            + Sync
            + 'static,
    {
        *self.receipt_fn.lock().unwrap() = Some(Box::new(f));
    }

    /// Last transaction accepted by `send_raw`, decoded.
    pub fn last_sent(&self) -> Option<TypedTransaction> {
        self.state.lock().unwrap().sent.last().map(|(_, tx)| tx.clone())
    }
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

fn meets_bump(new: U256, old: U256) -> bool {
    new * U256::from(100u64) >= old * U256::from(100 + PRICE_BUMP_PERCENT)
}

/// Apply geth's replacement rule between two same-nonce transactions.
fn replacement_allowed(old: &TypedTransaction, new: &TypedTransaction) -> bool {
    match (old, new) {
        (TypedTransaction::Eip1559(old), TypedTransaction::Eip1559(new)) => {
            let old_tip = old.max_priority_fee_per_gas.unwrap_or_default();
            let new_tip = new.max_priority_fee_per_gas.unwrap_or_default();
            let old_cap = old.max_fee_per_gas.unwrap_or_default();
            let new_cap = new.max_fee_per_gas.unwrap_or_default();
            meets_bump(new_tip, old_tip) && meets_bump(new_cap, old_cap)
        }
        _ => {
            let old_price = old.gas_price().unwrap_or_default();
            let new_price = new.gas_price().unwrap_or_default();
            meets_bump(new_price, old_price)
        }
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn chain_id(&self) -> SenderResult<u64> {
        Ok(1337)
    }

    async fn block_number(&self) -> SenderResult<u64> {
        Ok(self.state.lock().unwrap().block_number)
    }

    async fn base_fee(&self) -> SenderResult<Option<U256>> {
        Ok(self.state.lock().unwrap().base_fee)
    }

    async fn suggest_gas_tip(&self) -> SenderResult<U256> {
        Ok(self.state.lock().unwrap().gas_tip)
    }

    async fn pending_nonce(&self, addr: Address) -> SenderResult<u64> {
        Ok(*self.state.lock().unwrap().nonces.get(&addr).unwrap_or(&0))
    }

    async fn call(&self, _tx: &TypedTransaction) -> SenderResult<Bytes> {
        Ok(Bytes::default())
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> SenderResult<U256> {
        let state = self.state.lock().unwrap();
        if state.fail_estimation {
            return Err(SenderError::Estimation("estimation disabled".into()));
        }
        Ok(U256::from(43_949u64))
    }

    async fn create_access_list(
        &self,
        tx: &TypedTransaction,
    ) -> SenderResult<AccessListWithGasUsed> {
        let state = self.state.lock().unwrap();
        if state.fail_estimation {
            return Err(SenderError::Estimation("estimation disabled".into()));
        }
        let address = match tx.to() {
            Some(ethers::types::NameOrAddress::Address(addr)) => *addr,
            _ => Address::zero(),
        };
        Ok(AccessListWithGasUsed {
            access_list: AccessList(vec![AccessListItem {
                address,
                storage_keys: vec![H256::zero()],
            }]),
            gas_used: U256::from(43_472u64),
        })
    }

    async fn send_raw(&self, raw: Bytes) -> SenderResult<H256> {
        let mut state = self.state.lock().unwrap();
        if state.fail_broadcast {
            return Err(SenderError::ChainIo("broadcast disabled".into()));
        }

        let (tx, _sig) = TypedTransaction::decode_signed(&Rlp::new(raw.as_ref()))
            .map_err(|e| SenderError::ChainIo(format!("undecodable transaction: {}", e)))?;
        let nonce = tx.nonce().copied().unwrap_or_default().as_u64();

        if let Some(previous) = state.best_by_nonce.get(&nonce) {
            if !replacement_allowed(previous, &tx) {
                return Err(SenderError::Underpriced);
            }
        }

        let hash = H256::from(keccak256(raw.as_ref()));
        state.best_by_nonce.insert(nonce, tx.clone());
        state.sent.push((hash, tx));
        Ok(hash)
    }

    async fn get_receipt(&self, hash: H256) -> SenderResult<Option<TransactionReceipt>> {
        let fut = {
            let guard = self.receipt_fn.lock().unwrap();
            match guard.as_ref() {
                Some(f) => f(hash),
                None => return Ok(None),
            }
        };
        fut.await
    }

    async fn tag_block_number(&self, _tag: BlockTag) -> SenderResult<u64> {
        Ok(self.state.lock().unwrap().block_number)
    }
}

/// A successful receipt mined at block 0, the shape the scenario tests mock.
pub fn success_receipt(hash: H256) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: hash,
        block_number: Some(U64::zero()),
        status: Some(U64::one()),
        ..Default::default()
    }
}

/// Sender configuration the scenario tests start from: +10% escalation, no
/// confirmation depth, a quiet one-hour ticker so tests drive passes by hand.
pub fn test_config(tx_type: crate::tx::TxType) -> SenderConfig {
    SenderConfig {
        endpoint: "http://localhost:8545".into(),
        tx_type,
        confirmations: crate::chain::ConfirmationPolicy::Blocks(0),
        escalate_blocks: 0,
        escalate_multiple_num: 110,
        escalate_multiple_den: 100,
        min_gas_tip: 0,
        min_gas_price: 0,
        max_gas_price: 10_000_000_000_000,
        check_period_ms: 3_600_000,
        max_check_retries: 100,
        check_batch_size: 100,
    }
}
