//! Compact target encoding and the ASERT difficulty retarget.
//!
//! ASERT (absolutely scheduled exponentially rising targets) computes the next
//! target from a fixed anchor block instead of a sliding window: every
//! `half_life` seconds the chain falls behind schedule, the target doubles, and
//! every `half_life` seconds it runs ahead, the target halves.
//!
//! Everything here is integer arithmetic on arbitrary-precision values so the
//! result is bit-identical on every platform.

use borsh::{BorshDeserialize, BorshSerialize};
use crypto_bigint::{Encoding, U256};
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::constants::ASERT_RADIX_BITS;

// 2^x for x in [0, 1) as 16.48 fixed point cubic polynomial.
const POLY_COEFF_1: u64 = 195_766_423_245_049; // ceil(0.695502049712533 * 2^48)
const POLY_COEFF_2: u64 = 971_821_376; // ceil(0.2262697964 * 2^32)
const POLY_COEFF_3: u64 = 5_127; // ceil(0.0782318 * 2^16)

/// Decodes a compact ("bits") target into a signed big integer.
///
/// The top byte is the base-256 exponent, the low 23 bits the mantissa and bit
/// 23 the sign.
pub fn compact_to_big(compact: u32) -> BigInt {
    let mut mantissa = compact & 0x007f_ffff;
    let is_negative = compact & 0x0080_0000 != 0;
    let exponent = compact >> 24;

    let magnitude = if exponent <= 3 {
        mantissa >>= 8 * (3 - exponent);
        BigInt::from(mantissa)
    } else {
        BigInt::from(mantissa) << (8 * (exponent - 3))
    };

    if is_negative {
        -magnitude
    } else {
        magnitude
    }
}

/// Encodes a big integer into the compact ("bits") representation.
pub fn big_to_compact(n: &BigInt) -> u32 {
    if n.is_zero() {
        return 0;
    }

    let magnitude = n.magnitude();
    let mut exponent = magnitude.to_bytes_be().len() as u32;
    let mut mantissa = if exponent <= 3 {
        let low = magnitude.to_u32().unwrap_or_default();
        low << (8 * (3 - exponent))
    } else {
        let shifted: BigUint = magnitude >> (8 * (exponent - 3));
        shifted.to_u32().unwrap_or_default()
    };

    // The sign bit is reserved, so a mantissa using it moves up one exponent.
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }

    let mut compact = (exponent << 24) | mantissa;
    if n.sign() == Sign::Minus {
        compact |= 0x0080_0000;
    }
    compact
}

/// Converts a 256-bit target into an unsigned big integer.
pub fn u256_to_big(value: &U256) -> BigUint {
    BigUint::from_bytes_be(&value.to_be_bytes())
}

/// Converts an unsigned big integer into a 256-bit target, saturating at
/// `U256::MAX`.
pub fn big_to_u256(value: &BigUint) -> U256 {
    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        return U256::MAX;
    }
    let mut buf = [0u8; 32];
    buf[32 - bytes.len()..].copy_from_slice(&bytes);
    U256::from_be_bytes(buf)
}

/// Computes the ASERT target for a block.
///
/// * `start_bits` - compact target of the anchor block
/// * `pow_limit` - easiest allowed target
/// * `target_secs_per_block` - ideal block spacing
/// * `time_delta` - seconds between the anchor's parent and the previous block
/// * `height_delta` - blocks between the anchor and the previous block
/// * `half_life` - seconds of schedule drift that double (or halve) the target
///
/// The result is always within `[1, pow_limit]`. `half_life` must be positive;
/// non-positive values are treated as one second.
pub fn calc_asert_target(
    start_bits: u32,
    pow_limit: &BigUint,
    target_secs_per_block: i64,
    time_delta: i64,
    height_delta: i64,
    half_life: i64,
) -> BigUint {
    let start = compact_to_big(start_bits);
    if !start.is_positive() {
        return BigUint::one();
    }
    let radix_mask: i64 = (1 << ASERT_RADIX_BITS) - 1;

    //   exponent = ((time_delta - ideal_time_delta) << 16) / half_life
    //
    // in 64.16 fixed point, truncated toward zero.
    let ideal_time_delta = BigInt::from(target_secs_per_block) * (BigInt::from(height_delta) + 1);
    let exponent: BigInt =
        ((BigInt::from(time_delta) - ideal_time_delta) << ASERT_RADIX_BITS) / BigInt::from(half_life.max(1));

    // Integer part with floor semantics, fractional part always non-negative.
    let shifts_big: BigInt = &exponent >> ASERT_RADIX_BITS;
    let frac = (&exponent - (&shifts_big << ASERT_RADIX_BITS))
        .to_i64()
        .unwrap_or_default()
        & radix_mask;
    let frac = frac as u64;

    let shifts = match shifts_big.to_i64() {
        Some(shifts) => shifts,
        // Drifted so far that the result is pinned to one of the bounds.
        None if shifts_big.is_negative() => return BigUint::one(),
        None => return pow_limit.clone(),
    };

    // 2^16 * 2^frac, at most 17 bits.
    let frac_factor: u64 = (1 << ASERT_RADIX_BITS)
        + ((POLY_COEFF_1 * frac
            + POLY_COEFF_2 * frac * frac
            + POLY_COEFF_3 * frac * frac * frac
            + (1 << 47))
            >> 48);

    //   next = (start * 2^exponent) >> 16
    let mut next = start * BigInt::from(frac_factor);
    let Some(shifts) = shifts.checked_sub(i64::from(ASERT_RADIX_BITS)) else {
        return BigUint::one();
    };
    if shifts >= 0 {
        match usize::try_from(shifts) {
            Ok(s) if s <= 1024 => next <<= s,
            _ => return pow_limit.clone(),
        }
    } else {
        match usize::try_from(shifts.unsigned_abs()) {
            Ok(s) => next >>= s,
            Err(_) => return BigUint::one(),
        }
    }

    // Hardest valid target is 1, easiest is the proof-of-work limit.
    match next.to_biguint() {
        Some(n) if n.is_zero() => BigUint::one(),
        Some(n) if &n > pow_limit => pow_limit.clone(),
        Some(n) => n,
        None => BigUint::one(),
    }
}

/// [`calc_asert_target`] returning the compact representation.
pub fn calc_asert_diff(
    start_bits: u32,
    pow_limit: &BigUint,
    target_secs_per_block: i64,
    time_delta: i64,
    height_delta: i64,
    half_life: i64,
) -> u32 {
    let target = calc_asert_target(
        start_bits,
        pow_limit,
        target_secs_per_block,
        time_delta,
        height_delta,
        half_life,
    );
    big_to_compact(&BigInt::from(target))
}

/// Which block anchors the ASERT schedule.
///
/// Networks that ran ASERT from the start anchor on block 1 (the genesis
/// timestamp is not meaningful); networks that switched over anchor on the
/// block right before the activation height.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AsertAnchor {
    ForcedActive,
    ActivationHeight(u64),
}

/// ASERT settings of a network.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize,
)]
pub struct AsertParams {
    pub target_secs_per_block: i64,
    pub half_life_secs: i64,
    pub anchor: AsertAnchor,
}

/// The anchor block as seen by the retarget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnchorBlock {
    pub height: u64,
    pub bits: u32,
    /// Timestamp of the anchor's parent block.
    pub parent_timestamp: i64,
}

/// The block the next target is computed on top of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainTip {
    pub height: u64,
    pub timestamp: i64,
}

impl AsertParams {
    pub fn is_valid(&self) -> bool {
        self.target_secs_per_block > 0 && self.half_life_secs > 0
    }

    /// Height of the block the schedule is anchored on.
    pub fn anchor_height(&self) -> u64 {
        match self.anchor {
            AsertAnchor::ForcedActive => 1,
            AsertAnchor::ActivationHeight(height) => height.saturating_sub(1),
        }
    }

    /// Whether blocks at `height` are retargeted with ASERT.
    pub fn is_active_at(&self, height: u64) -> bool {
        height > self.anchor_height()
    }

    /// Compact target required for the block following `prev`.
    ///
    /// Returns `None` when `prev` is below the anchor, where this schedule does
    /// not apply.
    pub fn next_required_bits(
        &self,
        pow_limit: &BigUint,
        anchor: &AnchorBlock,
        prev: &ChainTip,
    ) -> Option<u32> {
        if prev.height < anchor.height {
            return None;
        }
        let height_delta = i64::try_from(prev.height - anchor.height).ok()?;
        let time_delta = prev.timestamp - anchor.parent_timestamp;
        tracing::trace!(height_delta, time_delta, "asert retarget");
        Some(calc_asert_diff(
            anchor.bits,
            pow_limit,
            self.target_secs_per_block,
            time_delta,
            height_delta,
            self.half_life_secs,
        ))
    }
}
