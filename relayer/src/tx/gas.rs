//! Gas-limit estimation, with or without an access list

use super::fee::FeeData;
use crate::chain::ChainClient;
use crate::error::SenderResult;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip2930::AccessList;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, TransactionRequest, U256};
use tracing::debug;

/// Estimates the gas limit for a payload, optionally deriving an access list.
///
/// An access-list transaction pre-pays for the storage slots it touches, so
/// the node's `gas_used` for the list path differs from the plain estimate of
/// the same call; both paths return the node's own figure untouched.
pub struct GasEstimator;

impl GasEstimator {
    pub fn new() -> Self {
        Self
    }

    pub async fn estimate(
        &self,
        chain: &dyn ChainClient,
        from: Address,
        to: Option<Address>,
        data: Option<Bytes>,
        fee: &FeeData,
        value: U256,
        want_access_list: bool,
    ) -> SenderResult<(u64, Option<AccessList>)> {
        let probe = build_probe(from, to, data, fee, value);

        if want_access_list {
            let with_list = chain.create_access_list(&probe).await?;
            debug!(gas = with_list.gas_used.as_u64(), "estimated with access list");
            return Ok((with_list.gas_used.as_u64(), Some(with_list.access_list)));
        }

        let gas = chain.estimate_gas(&probe).await?;
        debug!(gas = gas.as_u64(), "estimated without access list");
        Ok((gas.as_u64(), None))
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn build_probe(
    from: Address,
    to: Option<Address>,
    data: Option<Bytes>,
    fee: &FeeData,
    value: U256,
) -> TypedTransaction {
    if fee.gas_fee_cap.is_zero() {
        let mut req = TransactionRequest::new()
            .from(from)
            .value(value)
            .gas_price(fee.gas_price);
        if let Some(to) = to {
            req = req.to(to);
        }
        if let Some(data) = data {
            req = req.data(data);
        }
        TypedTransaction::Legacy(req)
    } else {
        let mut req = Eip1559TransactionRequest::new()
            .from(from)
            .value(value)
            .max_priority_fee_per_gas(fee.gas_tip_cap)
            .max_fee_per_gas(fee.gas_fee_cap);
        if let Some(to) = to {
            req = req.to(to);
        }
        if let Some(data) = data {
            req = req.data(data);
        }
        TypedTransaction::Eip1559(req)
    }
}
