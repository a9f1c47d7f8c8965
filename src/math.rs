//! Checked 256-bit arithmetic for reward accounting
//!
//! All monetary quantities are `U256`. Products of two amounts can exceed
//! 256 bits, so multiply-then-divide goes through a 512-bit intermediate
//! which is never stored. Division truncates toward zero; rewards are
//! deliberately under-paid by truncation so distributed sums never exceed
//! their pool.

use primitive_types::{U256, U512};

/// Fee denominator: fees are expressed in basis points out of 10,000.
pub const FEE_DENOMINATOR: u64 = 10_000;

/// Computes `a * b / denom` with a 512-bit intermediate.
///
/// Returns `None` if `denom` is zero or the quotient does not fit in 256
/// bits.
pub fn mul_div(a: U256, b: U256, denom: U256) -> Option<U256> {
    if denom.is_zero() {
        return None;
    }
    let wide: U512 = a.full_mul(b);
    let q = wide / U512::from(denom);
    U256::try_from(q).ok()
}

/// Basis-point share of `amount` (`amount * bps / 10_000`), truncating.
pub fn bps_of(amount: U256, bps: u64) -> Option<U256> {
    mul_div(amount, U256::from(bps), U256::from(FEE_DENOMINATOR))
}

/// Checked addition surfaced as `Option` for uniform `?`-style handling.
pub fn add(a: U256, b: U256) -> Option<U256> {
    a.checked_add(b)
}

/// Checked subtraction; `None` on underflow.
pub fn sub(a: U256, b: U256) -> Option<U256> {
    a.checked_sub(b)
}
