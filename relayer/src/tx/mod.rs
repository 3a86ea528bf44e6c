//! Transaction pipeline: fees, estimation, signing, nonce tracking and the
//! sending orchestrator.

pub mod fee;
pub mod gas;
pub mod nonce;
pub mod sender;
pub mod signer;

pub use fee::{escalate, EscalationPolicy, FeeData};
pub use gas::GasEstimator;
pub use nonce::NonceTracker;
pub use sender::Sender;
pub use signer::TxSigner;

use serde::Deserialize;

/// The transaction shape a sender is configured to emit.
///
/// The integer values are the EIP-2718 envelope types and are persisted
/// as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Legacy,
    AccessList,
    DynamicFee,
}

impl TxType {
    pub fn as_u8(self) -> u8 {
        match self {
            TxType::Legacy => 0,
            TxType::AccessList => 1,
            TxType::DynamicFee => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(TxType::Legacy),
            1 => Some(TxType::AccessList),
            2 => Some(TxType::DynamicFee),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TxType::Legacy => "legacy",
            TxType::AccessList => "access_list",
            TxType::DynamicFee => "dynamic_fee",
        }
    }
}
