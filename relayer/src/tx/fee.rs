//! Fee bundles and the escalation policy
//!
//! Escalation is a pure function from the previous attempt's fees and the
//! current base fee to the next attempt's fees. The node only accepts a
//! same-nonce replacement whose fees grow past its price-bump threshold, so
//! every component must move strictly upward or the resubmission is pointless.

use crate::error::{SenderError, SenderResult};

use ethers::types::U256;

/// Gas parameters for one attempt.
///
/// Legacy consumes `gas_price`; DynamicFee consumes `gas_tip_cap` and
/// `gas_fee_cap`; AccessList consumes `gas_price` plus its list payload.
/// All components are carried for every attempt so escalation and
/// persistence stay shape-independent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeeData {
    pub gas_price: U256,
    pub gas_tip_cap: U256,
    pub gas_fee_cap: U256,
    pub gas_limit: u64,
}

/// Bounds and factor for fee escalation.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    /// Rational growth factor num/den, e.g. 110/100.
    pub num: u64,
    pub den: u64,
    /// Ceiling for fee cap and gas price; components clamp here and stop.
    pub max_gas_price: U256,
    pub min_gas_tip: U256,
    pub min_gas_price: U256,
}

impl EscalationPolicy {
    fn factor(&self, value: U256) -> U256 {
        value * U256::from(self.num) / U256::from(self.den)
    }
}

/// Next attempt's fees from the previous attempt's fees.
///
/// The base-fee candidate for the fee cap is computed from the escalated tip
/// before the one-wei guard is applied; the guard then ensures each component
/// moves even when the previous value was zero. `gas_limit` is carried over
/// unchanged: re-estimation is a separate decision.
pub fn escalate(
    prev: &FeeData,
    current_base_fee: U256,
    policy: &EscalationPolicy,
) -> SenderResult<FeeData> {
    let mut tip = policy.factor(prev.gas_tip_cap);
    let mut cap = policy.factor(prev.gas_fee_cap);

    if !current_base_fee.is_zero() {
        let adj_base_fee = policy.factor(current_base_fee);
        let candidate = tip + adj_base_fee;
        if candidate > cap {
            cap = candidate;
        }
    }

    if tip <= prev.gas_tip_cap {
        tip = prev.gas_tip_cap + 1;
    }
    if tip < policy.min_gas_tip {
        tip = policy.min_gas_tip;
    }
    if cap <= prev.gas_fee_cap {
        cap = prev.gas_fee_cap + 1;
    }

    let mut price = policy.factor(prev.gas_price);
    if price <= prev.gas_price {
        price = prev.gas_price + 1;
    }
    if price < policy.min_gas_price {
        price = policy.min_gas_price;
    }

    if cap > policy.max_gas_price {
        cap = policy.max_gas_price;
    }
    if price > policy.max_gas_price {
        price = policy.max_gas_price;
    }
    if tip > cap {
        tip = cap;
    }

    if tip <= prev.gas_tip_cap {
        return Err(SenderError::CannotBump {
            component: "gas_tip_cap",
        });
    }
    if cap <= prev.gas_fee_cap {
        return Err(SenderError::CannotBump {
            component: "gas_fee_cap",
        });
    }
    if price <= prev.gas_price {
        return Err(SenderError::CannotBump {
            component: "gas_price",
        });
    }

    Ok(FeeData {
        gas_price: price,
        gas_tip_cap: tip,
        gas_fee_cap: cap,
        gas_limit: prev.gas_limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(num: u64, den: u64) -> EscalationPolicy {
        EscalationPolicy {
            num,
            den,
            max_gas_price: U256::from(10_000_000_000_000u64),
            min_gas_tip: U256::zero(),
            min_gas_price: U256::zero(),
        }
    }

    fn fees(price: u64, tip: u64, cap: u64) -> FeeData {
        FeeData {
            gas_price: U256::from(price),
            gas_tip_cap: U256::from(tip),
            gas_fee_cap: U256::from(cap),
            gas_limit: 50_000,
        }
    }

    #[test]
    fn zero_fees_bump_by_at_least_one_wei() {
        let next = escalate(&fees(0, 0, 0), U256::zero(), &policy(110, 100)).unwrap();
        assert_eq!(next.gas_price, U256::one());
        assert_eq!(next.gas_tip_cap, U256::one());
        assert_eq!(next.gas_fee_cap, U256::one());
        assert_eq!(next.gas_limit, 50_000);
    }

    #[test]
    fn ten_percent_growth_on_every_component() {
        let next = escalate(&fees(100_000, 100_000, 100_000), U256::zero(), &policy(110, 100))
            .unwrap();
        assert_eq!(next.gas_price, U256::from(110_000u64));
        assert_eq!(next.gas_tip_cap, U256::from(110_000u64));
        assert_eq!(next.gas_fee_cap, U256::from(110_000u64));
    }

    #[test]
    fn equal_factor_still_advances_by_one_wei() {
        let next =
            escalate(&fees(100_000, 100_000, 100_000), U256::zero(), &policy(100, 100)).unwrap();
        assert_eq!(next.gas_price, U256::from(100_001u64));
        assert_eq!(next.gas_tip_cap, U256::from(100_001u64));
        assert_eq!(next.gas_fee_cap, U256::from(100_001u64));
    }

    #[test]
    fn rising_base_fee_lifts_fee_cap() {
        // A 10x base-fee jump: the cap follows tip + adjusted base fee, where
        // the tip contribution is the pre-guard escalated value.
        let next = escalate(&fees(0, 0, 0), U256::from(10_000u64), &policy(110, 100)).unwrap();
        assert_eq!(next.gas_fee_cap, U256::from(11_000u64));
        assert_eq!(next.gas_tip_cap, U256::one());
    }

    #[test]
    fn fee_cap_clamps_to_max_gas_price() {
        let mut p = policy(110, 100);
        p.max_gas_price = U256::from(11_000u64);
        let next = escalate(&fees(0, 0, 0), U256::from(100_000u64), &p).unwrap();
        assert_eq!(next.gas_fee_cap, U256::from(11_000u64));
    }

    #[test]
    fn cannot_bump_once_ceiling_reached() {
        let mut p = policy(110, 100);
        p.max_gas_price = U256::from(100_000u64);
        let err = escalate(&fees(100_000, 10, 100_000), U256::zero(), &p).unwrap_err();
        assert!(matches!(err, SenderError::CannotBump { component: "gas_fee_cap" }));

        let err = escalate(&fees(100_000, 10, 10), U256::zero(), &p).unwrap_err();
        assert!(matches!(err, SenderError::CannotBump { component: "gas_price" }));
    }

    #[test]
    fn floors_apply_to_tip_and_price() {
        let mut p = policy(110, 100);
        p.min_gas_tip = U256::from(5_000u64);
        p.min_gas_price = U256::from(7_000u64);
        let next = escalate(&fees(100, 100, 1_000_000), U256::zero(), &p).unwrap();
        assert_eq!(next.gas_tip_cap, U256::from(5_000u64));
        assert_eq!(next.gas_price, U256::from(7_000u64));
    }

    #[test]
    fn tip_never_exceeds_cap() {
        let mut p = policy(110, 100);
        p.min_gas_tip = U256::from(50_000u64);
        p.max_gas_price = U256::from(20_000u64);
        let next = escalate(&fees(0, 0, 10_000), U256::zero(), &p).unwrap();
        assert!(next.gas_tip_cap <= next.gas_fee_cap);
    }
}
