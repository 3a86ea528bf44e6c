//! Transaction sender with receipt tracking and fee escalation
//!
//! One sender owns one signing key against one endpoint. `send` broadcasts a
//! new attempt and records it; a background task periodically re-inspects
//! every outstanding attempt, resubmits with escalated fees when inclusion
//! stalls, and finalizes the whole context once any attempt at its nonce is
//! mined deep enough.

use super::fee::{self, EscalationPolicy, FeeData};
use super::gas::GasEstimator;
use super::nonce::NonceTracker;
use super::signer::TxSigner;
use super::TxType;
use crate::chain::ChainClient;
use crate::config::SenderConfig;
use crate::error::{SenderError, SenderResult};
use crate::metrics;
use crate::state::{PendingStore, SenderIdentity, SenderType, TxAttempt, TxStatus};

use chrono::Utc;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip2930::AccessList;
use ethers::types::{Address, Bytes, NameOrAddress, H256, U256, U64};
use ethers::utils::rlp::Rlp;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The sending orchestrator
pub struct Sender {
    inner: Arc<SenderInner>,
    cancel: CancellationToken,
    check_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

struct SenderInner {
    chain: Arc<dyn ChainClient>,
    store: Arc<PendingStore>,
    signer: TxSigner,
    estimator: GasEstimator,
    nonce: NonceTracker,
    identity: SenderIdentity,
    policy: EscalationPolicy,
    config: SenderConfig,
}

impl Sender {
    /// Build a sender and start its background check loop.
    ///
    /// Fails when the chain id cannot be resolved, the key is malformed, or
    /// the initial nonce cannot be reconciled.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        config: SenderConfig,
        chain: Arc<dyn ChainClient>,
        private_key: &str,
        service: &str,
        name: &str,
        sender_type: SenderType,
        store: Arc<PendingStore>,
        cancel: CancellationToken,
    ) -> SenderResult<Self> {
        config.validate().map_err(SenderError::Config)?;

        let chain_id = chain
            .chain_id()
            .await
            .map_err(|e| SenderError::Config(format!("cannot resolve chain id: {}", e)))?;
        let signer = TxSigner::new(private_key, chain_id)?;

        let identity = SenderIdentity {
            sender_type,
            service: service.to_string(),
            name: name.to_string(),
            address: signer.address(),
        };

        let nonce = NonceTracker::init(chain.as_ref(), &store, &identity)
            .await
            .map_err(|e| SenderError::Config(format!("cannot fetch initial nonce: {}", e)))?;

        let policy = config.escalation_policy();
        let inner = Arc::new(SenderInner {
            chain,
            store,
            signer,
            estimator: GasEstimator::new(),
            nonce,
            identity,
            policy,
            config,
        });

        let handle = tokio::spawn(check_loop(inner.clone(), cancel.clone()));

        info!(
            service,
            name,
            address = %inner.identity.address,
            chain_id,
            tx_type = inner.config.tx_type.name(),
            "transaction sender started"
        );

        Ok(Self {
            inner,
            cancel,
            check_handle: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    /// Submit a new send request. Returns the hash of the first attempt.
    pub async fn send(
        &self,
        context_id: &str,
        to: Option<Address>,
        value: U256,
        data: Option<Bytes>,
        fallback_gas_limit: u64,
    ) -> SenderResult<H256> {
        self.inner
            .send(context_id, to, value, data, fallback_gas_limit)
            .await
    }

    /// One pass over all outstanding attempts. Runs on the background ticker;
    /// exposed so drivers and tests can force a pass.
    pub async fn check_pending(&self) -> SenderResult<()> {
        self.inner.check_pending().await
    }

    pub fn address(&self) -> Address {
        self.inner.identity.address
    }

    pub fn identity(&self) -> &SenderIdentity {
        &self.inner.identity
    }

    /// Cancel the background loop and wait for it to quiesce. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.check_handle.lock().await.take() {
            let _ = handle.await;
        }
        info!(service = %self.inner.identity.service, "transaction sender stopped");
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn check_loop(inner: Arc<SenderInner>, cancel: CancellationToken) {
    let period = Duration::from_millis(inner.config.check_period_ms);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = inner.check_pending().await {
                    warn!(error = %e, "check pass failed; retrying next tick");
                }
            }
        }
    }

    debug!("check loop stopped");
}

impl SenderInner {
    async fn send(
        &self,
        context_id: &str,
        to: Option<Address>,
        value: U256,
        data: Option<Bytes>,
        fallback_gas_limit: u64,
    ) -> SenderResult<H256> {
        let mut fee = self.fee_data().await?;

        let want_access_list = self.config.tx_type == TxType::AccessList;
        let (gas_limit, access_list) = match self
            .estimator
            .estimate(
                self.chain.as_ref(),
                self.identity.address,
                to,
                data.clone(),
                &fee,
                value,
                want_access_list,
            )
            .await
        {
            Ok(estimated) => estimated,
            Err(err) if fallback_gas_limit > 0 => {
                warn!(
                    context_id,
                    error = %err,
                    fallback_gas_limit,
                    "gas estimation failed; using fallback gas limit"
                );
                (fallback_gas_limit, None)
            }
            Err(err) => return Err(err),
        };
        fee.gas_limit = gas_limit;

        let mut nonce = self.nonce.acquire().await;
        let attempt = self
            .sign_and_broadcast(
                context_id,
                *nonce,
                to,
                value,
                data,
                &fee,
                access_list.unwrap_or_default(),
            )
            .await?;
        self.store.insert(&attempt).await?;
        *nonce += 1;

        metrics::record_tx_sent(&self.identity.service);
        info!(
            context_id,
            hash = %attempt.hash,
            nonce = attempt.nonce,
            gas_limit,
            "transaction sent"
        );
        Ok(attempt.hash)
    }

    /// Replace a stalled attempt with an escalated one. The old row moves to
    /// Replaced and the new attempt becomes the context's Pending row, in one
    /// store transaction. An underpriced rejection from the node aborts the
    /// whole operation and leaves the old row Pending.
    async fn resubmit(&self, old: &TxAttempt, current_base_fee: U256) -> SenderResult<H256> {
        let prev = FeeData {
            gas_price: old.gas_price,
            gas_tip_cap: old.gas_tip_cap,
            gas_fee_cap: old.gas_fee_cap,
            gas_limit: old.gas_limit,
        };
        let next = fee::escalate(&prev, current_base_fee, &self.policy)?;

        let (to, value, data, access_list) = decode_payload(&old.raw_tx)?;
        let attempt = self
            .sign_and_broadcast(&old.context_id, old.nonce, to, value, data, &next, access_list)
            .await?;
        self.store.replace(old.hash, &attempt).await?;

        metrics::record_tx_resubmitted(&self.identity.service);
        info!(
            context_id = %old.context_id,
            old_hash = %old.hash,
            new_hash = %attempt.hash,
            nonce = old.nonce,
            gas_fee_cap = %next.gas_fee_cap,
            gas_price = %next.gas_price,
            "stalled transaction resubmitted"
        );
        Ok(attempt.hash)
    }

    async fn check_pending(&self) -> SenderResult<()> {
        let current_block = self.chain.block_number().await?;
        let base_fee = self.chain.base_fee().await?.unwrap_or_default();

        let attempts = self
            .store
            .list_pending_or_replaced(&self.identity, self.config.check_batch_size)
            .await?;
        metrics::record_pending_attempts(&self.identity.service, attempts.len());

        // Nonces whose context was finalized earlier in this pass.
        let mut settled: HashSet<u64> = HashSet::new();

        for attempt in &attempts {
            if settled.contains(&attempt.nonce) {
                continue;
            }

            match attempt.status {
                // A replaced attempt may still be the one that landed on
                // chain; its receipt terminates the whole context.
                TxStatus::Replaced => match self.chain.get_receipt(attempt.hash).await {
                    Ok(Some(receipt)) => {
                        if self.try_finalize(attempt, &receipt, current_block).await? {
                            settled.insert(attempt.nonce);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        debug!(hash = %attempt.hash, error = %err, "receipt lookup failed for replaced attempt");
                    }
                },
                TxStatus::Pending => match self.chain.get_receipt(attempt.hash).await {
                    Ok(Some(receipt)) => {
                        if self.try_finalize(attempt, &receipt, current_block).await? {
                            settled.insert(attempt.nonce);
                        }
                        // Mined but still shallow: leave it for a later pass.
                    }
                    Ok(None) | Err(_) => {
                        self.maybe_escalate(attempt, base_fee, current_block).await;
                    }
                },
                _ => {}
            }
        }

        Ok(())
    }

    /// Finalize the attempt's context if its receipt is deep enough.
    async fn try_finalize(
        &self,
        attempt: &TxAttempt,
        receipt: &ethers::types::TransactionReceipt,
        current_block: u64,
    ) -> SenderResult<bool> {
        let receipt_block = match receipt.block_number {
            Some(n) => n.as_u64(),
            None => return Ok(false),
        };

        if !self
            .config
            .confirmations
            .is_deep_enough(self.chain.as_ref(), receipt_block, current_block)
            .await?
        {
            return Ok(false);
        }

        let success = receipt.status == Some(U64::one());
        let status = if success {
            TxStatus::ConfirmedSuccess
        } else {
            TxStatus::ConfirmedFailed
        };

        self.store
            .finalize_nonce(&self.identity, attempt.nonce, attempt.hash, status)
            .await?;

        metrics::record_tx_confirmed(&self.identity.service, success);
        info!(
            context_id = %attempt.context_id,
            hash = %attempt.hash,
            nonce = attempt.nonce,
            receipt_block,
            status = status.name(),
            "transaction confirmed"
        );
        Ok(true)
    }

    async fn maybe_escalate(&self, attempt: &TxAttempt, base_fee: U256, current_block: u64) {
        if current_block.saturating_sub(attempt.submit_block_number) < self.config.escalate_blocks {
            return;
        }

        match self.store.count_by_context(&attempt.context_id).await {
            // attempts = 1 original + N resubmissions
            Ok(n) if n > self.config.max_check_retries => {
                warn!(
                    context_id = %attempt.context_id,
                    attempts = n,
                    max_check_retries = self.config.max_check_retries,
                    "resubmission budget exhausted; leaving attempt pending for operator intervention"
                );
                metrics::record_retries_exhausted(&self.identity.service);
                return;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(context_id = %attempt.context_id, error = %err, "cannot count attempts; skipping escalation");
                return;
            }
        }

        match self.resubmit(attempt, base_fee).await {
            Ok(_) => {}
            Err(SenderError::CannotBump { component }) => {
                warn!(
                    context_id = %attempt.context_id,
                    component,
                    "fees cannot be bumped further; will retry when the base fee moves"
                );
                metrics::record_escalation_stalled(&self.identity.service, "cannot_bump");
            }
            Err(SenderError::Underpriced) => {
                warn!(
                    context_id = %attempt.context_id,
                    hash = %attempt.hash,
                    "node rejected replacement as underpriced; check the escalation factor"
                );
                metrics::record_escalation_stalled(&self.identity.service, "underpriced");
            }
            Err(err) => {
                warn!(context_id = %attempt.context_id, error = %err, "resubmission failed");
            }
        }
    }

    /// Sign the envelope, broadcast it, and materialise the attempt row.
    /// No store mutation happens here; a broadcast failure leaves no trace.
    async fn sign_and_broadcast(
        &self,
        context_id: &str,
        nonce: u64,
        to: Option<Address>,
        value: U256,
        data: Option<Bytes>,
        fee: &FeeData,
        access_list: AccessList,
    ) -> SenderResult<TxAttempt> {
        let envelope = self.signer.build_envelope(
            self.config.tx_type,
            nonce,
            to,
            value,
            data,
            fee,
            access_list,
        );
        let (_, raw) = self.signer.sign(&envelope).await?;

        let submit_block_number = self.chain.block_number().await?;
        let hash = self.chain.send_raw(raw.clone()).await?;

        let now = Utc::now();
        Ok(TxAttempt {
            hash,
            context_id: context_id.to_string(),
            identity: self.identity.clone(),
            tx_type: self.config.tx_type,
            nonce,
            gas_price: fee.gas_price,
            gas_tip_cap: fee.gas_tip_cap,
            gas_fee_cap: fee.gas_fee_cap,
            gas_limit: fee.gas_limit,
            submit_block_number,
            status: TxStatus::Pending,
            raw_tx: raw,
            created_at: now,
            updated_at: now,
        })
    }

    /// Current fee bundle for a fresh submission, before gas estimation.
    async fn fee_data(&self) -> SenderResult<FeeData> {
        let mut tip = self.chain.suggest_gas_tip().await?;
        if tip < self.policy.min_gas_tip {
            tip = self.policy.min_gas_tip;
        }
        let base = self.chain.base_fee().await?.unwrap_or_default();

        let mut fee = FeeData::default();
        match self.config.tx_type {
            TxType::Legacy | TxType::AccessList => {
                let mut price = base + tip;
                if price < self.policy.min_gas_price {
                    price = self.policy.min_gas_price;
                }
                if price > self.policy.max_gas_price {
                    price = self.policy.max_gas_price;
                }
                fee.gas_price = price;
            }
            TxType::DynamicFee => {
                // Double the base fee so the cap survives several full blocks.
                let mut cap = base * 2 + tip;
                if cap > self.policy.max_gas_price {
                    cap = self.policy.max_gas_price;
                }
                fee.gas_tip_cap = tip;
                fee.gas_fee_cap = cap;
            }
        }
        Ok(fee)
    }
}

/// Recover the payload of a persisted attempt from its signed encoding.
fn decode_payload(
    raw: &Bytes,
) -> SenderResult<(Option<Address>, U256, Option<Bytes>, AccessList)> {
    let (tx, _signature) = TypedTransaction::decode_signed(&Rlp::new(raw.as_ref()))
        .map_err(|e| SenderError::Signing(format!("cannot decode persisted transaction: {}", e)))?;

    let to = match tx.to() {
        Some(NameOrAddress::Address(addr)) => Some(*addr),
        _ => None,
    };
    let value = tx.value().copied().unwrap_or_default();
    let data = tx.data().cloned();
    let access_list = match &tx {
        TypedTransaction::Eip2930(req) => req.access_list.clone(),
        TypedTransaction::Eip1559(req) => req.access_list.clone(),
        TypedTransaction::Legacy(_) => AccessList::default(),
    };

    Ok((to, value, data, access_list))
}
