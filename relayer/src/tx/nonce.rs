//! Nonce tracking for reliable transaction submission
//!
//! The counter is advanced only after a successful broadcast, under a
//! single-writer lock. Initialisation reconciles the chain's pending nonce
//! with the store: a crash between broadcast and insert leaves the chain
//! ahead of the table, a crash between reserve and broadcast leaves the
//! table ahead of nothing, so the next usable nonce is
//! `max(chain_pending, highest_persisted + 1)`.

use crate::chain::ChainClient;
use crate::error::SenderResult;
use crate::state::{PendingStore, SenderIdentity};

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

pub struct NonceTracker {
    next: Mutex<u64>,
}

impl NonceTracker {
    /// Initialise from chain and store state.
    pub async fn init(
        chain: &dyn ChainClient,
        store: &PendingStore,
        identity: &SenderIdentity,
    ) -> SenderResult<Self> {
        let chain_pending = chain.pending_nonce(identity.address).await?;
        let persisted = store.max_nonce(identity).await?;

        let next = match persisted {
            Some(max) => chain_pending.max(max + 1),
            None => chain_pending,
        };

        debug!(chain_pending, ?persisted, next, "nonce tracker initialised");
        Ok(Self { next: Mutex::new(next) })
    }

    /// Take the single-writer lock on the counter. The guard dereferences to
    /// the next nonce to use; the caller increments it only after the
    /// broadcast succeeded.
    pub async fn acquire(&self) -> MutexGuard<'_, u64> {
        self.next.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{SenderType, TxAttempt, TxStatus};
    use crate::testutil::FakeChain;
    use crate::tx::TxType;
    use chrono::Utc;
    use ethers::types::{Address, Bytes, H256, U256};

    fn identity() -> SenderIdentity {
        SenderIdentity {
            sender_type: SenderType::Unknown,
            service: "test".into(),
            name: "test".into(),
            address: Address::repeat_byte(0x11),
        }
    }

    async fn store_with_nonce(nonce: u64) -> PendingStore {
        let store = PendingStore::connect("sqlite::memory:").await.unwrap();
        store.run_migrations().await.unwrap();
        let now = Utc::now();
        store
            .insert(&TxAttempt {
                hash: H256::repeat_byte(1),
                context_id: "ctx".into(),
                identity: identity(),
                tx_type: TxType::Legacy,
                nonce,
                gas_price: U256::one(),
                gas_tip_cap: U256::zero(),
                gas_fee_cap: U256::zero(),
                gas_limit: 21_000,
                submit_block_number: 0,
                status: TxStatus::Pending,
                raw_tx: Bytes::default(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn starts_from_chain_pending_nonce_on_empty_store() {
        let chain = FakeChain::new();
        chain.set_pending_nonce(identity().address, 5);
        let store = PendingStore::connect("sqlite::memory:").await.unwrap();
        store.run_migrations().await.unwrap();

        let tracker = NonceTracker::init(&chain, &store, &identity()).await.unwrap();
        assert_eq!(*tracker.acquire().await, 5);
    }

    #[tokio::test]
    async fn persisted_nonce_wins_when_chain_lags() {
        let chain = FakeChain::new();
        chain.set_pending_nonce(identity().address, 3);
        let store = store_with_nonce(9).await;

        let tracker = NonceTracker::init(&chain, &store, &identity()).await.unwrap();
        assert_eq!(*tracker.acquire().await, 10);
    }

    #[tokio::test]
    async fn chain_nonce_wins_when_store_lags() {
        let chain = FakeChain::new();
        chain.set_pending_nonce(identity().address, 20);
        let store = store_with_nonce(9).await;

        let tracker = NonceTracker::init(&chain, &store, &identity()).await.unwrap();
        assert_eq!(*tracker.acquire().await, 20);
    }
}
