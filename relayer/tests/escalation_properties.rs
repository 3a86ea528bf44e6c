//! Property-based tests for fee escalation.
//!
//! These tests verify the escalator's universal invariants: with a growing
//! factor and no clamping every fee component moves strictly upward, an
//! equal factor still advances by the one-wei guard, the configured ceiling
//! is never exceeded, and the gas limit is never touched.

use ethers::types::U256;
use proptest::{prelude::*, test_runner::Config};
use steward_relayer::tx::{escalate, EscalationPolicy, FeeData};

fn unbounded_policy(num: u64, den: u64) -> EscalationPolicy {
    EscalationPolicy {
        num,
        den,
        max_gas_price: U256::MAX,
        min_gas_tip: U256::zero(),
        min_gas_price: U256::zero(),
    }
}

/// Well-formed fee data never carries a tip above its cap; generate the cap
/// as tip + headroom so the inputs stay in the reachable shape.
fn fees(price: u64, tip: u64, cap_headroom: u64, gas_limit: u64) -> FeeData {
    FeeData {
        gas_price: U256::from(price),
        gas_tip_cap: U256::from(tip),
        gas_fee_cap: U256::from(tip) + U256::from(cap_headroom),
        gas_limit,
    }
}

proptest! {
  #![proptest_config(Config {
    cases: 1000, ..Config::default()
  })]

  /// With num > den and no clamping, every component strictly grows and the
  /// gas limit is preserved.
  #[test]
  fn prop_growth_is_strict_without_clamping(
    price in 0u64..1_000_000_000_000,
    tip in 0u64..1_000_000_000_000,
    cap_headroom in 0u64..1_000_000_000_000,
    base_fee in 0u64..1_000_000_000_000,
    num in 101u64..1_000,
    gas_limit in 21_000u64..30_000_000,
  ) {
      let prev = fees(price, tip, cap_headroom, gas_limit);
      let policy = unbounded_policy(num, 100);
      let next = escalate(&prev, U256::from(base_fee), &policy).unwrap();

      prop_assert!(next.gas_price > prev.gas_price);
      prop_assert!(next.gas_tip_cap > prev.gas_tip_cap);
      prop_assert!(next.gas_fee_cap > prev.gas_fee_cap);
      prop_assert!(next.gas_tip_cap <= next.gas_fee_cap);
      prop_assert_eq!(next.gas_limit, prev.gas_limit);
  }

  /// num == den degenerates to the one-wei guard on every component.
  #[test]
  fn prop_equal_factor_advances_by_one_wei(
    price in 0u64..1_000_000_000_000,
    tip in 0u64..1_000_000_000_000,
    cap_headroom in 0u64..1_000_000_000_000,
  ) {
      let prev = fees(price, tip, cap_headroom, 21_000);
      let policy = unbounded_policy(100, 100);
      let next = escalate(&prev, U256::zero(), &policy).unwrap();

      prop_assert_eq!(next.gas_price, prev.gas_price + 1);
      prop_assert!(next.gas_fee_cap >= prev.gas_fee_cap + 1);
      prop_assert!(next.gas_tip_cap >= prev.gas_tip_cap + 1);
  }

  /// The ceiling binds: whatever the inputs, a successful escalation never
  /// produces a component above max_gas_price.
  #[test]
  fn prop_ceiling_is_never_exceeded(
    price in 0u64..2_000_000,
    tip in 0u64..2_000_000,
    cap_headroom in 0u64..2_000_000,
    base_fee in 0u64..2_000_000,
    max in 1u64..4_000_000,
  ) {
      let prev = fees(price, tip, cap_headroom, 21_000);
      let mut policy = unbounded_policy(150, 100);
      policy.max_gas_price = U256::from(max);

      match escalate(&prev, U256::from(base_fee), &policy) {
          Ok(next) => {
              prop_assert!(next.gas_price <= policy.max_gas_price);
              prop_assert!(next.gas_fee_cap <= policy.max_gas_price);
              prop_assert!(next.gas_tip_cap <= next.gas_fee_cap);
          }
          // Clamped into immobility: legitimate only when a component
          // already sits at or above where the ceiling allows it to go.
          Err(_) => {
              prop_assert!(
                  prev.gas_fee_cap >= policy.max_gas_price
                      || prev.gas_price >= policy.max_gas_price
                      || prev.gas_tip_cap >= policy.max_gas_price
              );
          }
      }
  }
}
