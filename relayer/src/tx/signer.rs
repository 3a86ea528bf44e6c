//! Transaction envelope construction and signing

use super::fee::FeeData;
use super::TxType;
use crate::error::{SenderError, SenderResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip2930::{AccessList, Eip2930TransactionRequest};
use ethers::types::{
    Address, Bytes, Eip1559TransactionRequest, TransactionRequest, H256, U256,
};
use ethers::utils::keccak256;

/// Deterministically builds and signs one of the three supported envelope
/// shapes. Holds no mutable state.
///
/// Shape constraints are structural: only the shapes that admit an access
/// list consume one, so an invalid combination cannot be expressed.
pub struct TxSigner {
    wallet: LocalWallet,
    chain_id: u64,
}

impl TxSigner {
    pub fn new(private_key: &str, chain_id: u64) -> SenderResult<Self> {
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| SenderError::Config(format!("invalid private key: {}", e)))?
            .with_chain_id(chain_id);

        Ok(Self { wallet, chain_id })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Build the unsigned envelope for the configured shape.
    pub fn build_envelope(
        &self,
        tx_type: TxType,
        nonce: u64,
        to: Option<Address>,
        value: U256,
        data: Option<Bytes>,
        fee: &FeeData,
        access_list: AccessList,
    ) -> TypedTransaction {
        let mut tx = match tx_type {
            TxType::Legacy => {
                let mut req = TransactionRequest::new()
                    .from(self.wallet.address())
                    .nonce(nonce)
                    .value(value)
                    .gas(fee.gas_limit)
                    .gas_price(fee.gas_price);
                if let Some(to) = to {
                    req = req.to(to);
                }
                if let Some(data) = data {
                    req = req.data(data);
                }
                TypedTransaction::Legacy(req)
            }
            TxType::AccessList => {
                let mut req = TransactionRequest::new()
                    .from(self.wallet.address())
                    .nonce(nonce)
                    .value(value)
                    .gas(fee.gas_limit)
                    .gas_price(fee.gas_price);
                if let Some(to) = to {
                    req = req.to(to);
                }
                if let Some(data) = data {
                    req = req.data(data);
                }
                TypedTransaction::Eip2930(Eip2930TransactionRequest {
                    tx: req,
                    access_list,
                })
            }
            TxType::DynamicFee => {
                let mut req = Eip1559TransactionRequest::new()
                    .from(self.wallet.address())
                    .nonce(nonce)
                    .value(value)
                    .gas(fee.gas_limit)
                    .max_priority_fee_per_gas(fee.gas_tip_cap)
                    .max_fee_per_gas(fee.gas_fee_cap)
                    .access_list(access_list);
                if let Some(to) = to {
                    req = req.to(to);
                }
                if let Some(data) = data {
                    req = req.data(data);
                }
                TypedTransaction::Eip1559(req)
            }
        };

        tx.set_chain_id(self.chain_id);
        tx
    }

    /// Sign and produce the canonical RLP plus the transaction hash.
    pub async fn sign(&self, tx: &TypedTransaction) -> SenderResult<(H256, Bytes)> {
        let signature = self
            .wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| SenderError::Signing(e.to_string()))?;

        let raw = tx.rlp_signed(&signature);
        let hash = H256::from(keccak256(raw.as_ref()));
        Ok((hash, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const TEST_KEY: &str = "1212121212121212121212121212121212121212121212121212121212121212";

    fn fee() -> FeeData {
        FeeData {
            gas_price: U256::from(1_000_000_000u64),
            gas_tip_cap: U256::from(100u64),
            gas_fee_cap: U256::from(2_000_000_000u64),
            gas_limit: 53_000,
        }
    }

    #[test]
    fn derives_expected_address_from_test_key() {
        let signer = TxSigner::new(TEST_KEY, 1337).unwrap();
        assert_eq!(
            signer.address(),
            Address::from_str("0x1C5A77d9FA7eF466951B2F01F724BCa3A5820b63").unwrap()
        );
    }

    #[test]
    fn rejects_malformed_key() {
        assert!(TxSigner::new("not-a-key", 1337).is_err());
    }

    #[test]
    fn builds_the_configured_envelope_shape() {
        let signer = TxSigner::new(TEST_KEY, 1337).unwrap();
        let to = Some(Address::zero());

        let legacy = signer.build_envelope(
            TxType::Legacy,
            7,
            to,
            U256::zero(),
            None,
            &fee(),
            AccessList::default(),
        );
        assert!(matches!(legacy, TypedTransaction::Legacy(_)));
        assert_eq!(legacy.gas(), Some(&U256::from(53_000u64)));
        assert_eq!(legacy.nonce(), Some(&U256::from(7u64)));

        let acl = signer.build_envelope(
            TxType::AccessList,
            7,
            to,
            U256::zero(),
            None,
            &fee(),
            AccessList::default(),
        );
        assert!(matches!(acl, TypedTransaction::Eip2930(_)));
        assert_eq!(acl.chain_id(), Some(ethers::types::U64::from(1337u64)));

        let dynamic = signer.build_envelope(
            TxType::DynamicFee,
            7,
            to,
            U256::zero(),
            None,
            &fee(),
            AccessList::default(),
        );
        match &dynamic {
            TypedTransaction::Eip1559(req) => {
                assert_eq!(req.max_priority_fee_per_gas, Some(U256::from(100u64)));
                assert_eq!(req.max_fee_per_gas, Some(U256::from(2_000_000_000u64)));
            }
            other => panic!("expected dynamic-fee envelope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn signing_is_deterministic_and_hash_matches_payload() {
        let signer = TxSigner::new(TEST_KEY, 1337).unwrap();
        let tx = signer.build_envelope(
            TxType::DynamicFee,
            0,
            Some(Address::zero()),
            U256::zero(),
            None,
            &fee(),
            AccessList::default(),
        );

        let (hash_a, raw_a) = signer.sign(&tx).await.unwrap();
        let (hash_b, raw_b) = signer.sign(&tx).await.unwrap();
        assert_eq!(hash_a, hash_b);
        assert_eq!(raw_a, raw_b);
        assert_eq!(hash_a, H256::from(keccak256(raw_a.as_ref())));
        // Typed payloads carry their envelope marker byte.
        assert_eq!(raw_a.as_ref()[0], 0x02);
    }
}
