//! 64.64 fixed-point binary logarithm used by the kQuai controller.
//!
//! Operands are arbitrary-precision because miner difficulties routinely
//! exceed 64 bits. The computation uses integer shifts, subtraction,
//! multiplication and division only, so results are bit-identical to the
//! node's own arithmetic.

use num_bigint::BigUint;
use num_traits::{One, Zero};

/// Number of fractional bits in the fixed-point representation.
pub const FIXED_POINT_BITS: u64 = 64;

/// `2^64`, the fixed-point unit.
pub fn fixed_one() -> BigUint {
    BigUint::one() << FIXED_POINT_BITS
}

/// Compute `log2(x) * 2^64`.
///
/// With `c = bits(x) - 1` (so `2^c <= x < 2^(c+1)`), the result is
/// `c * 2^64 + floor((x - 2^c) * 2^64 / 2^c)`. The fractional part is the
/// linear interpolation between `2^c` and `2^(c+1)` the protocol specifies,
/// not the true mantissa logarithm.
///
/// Returns 0 for `x == 0`; callers are expected to reject that input first.
pub fn log2_fixed(x: &BigUint) -> BigUint {
    if x.is_zero() {
        return BigUint::zero();
    }

    let c = x.bits() - 1;
    let floor_pow = BigUint::one() << c;
    let remainder = x - &floor_pow;
    let mantissa = (remainder << FIXED_POINT_BITS) >> c;

    (BigUint::from(c) << FIXED_POINT_BITS) + mantissa
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use num_bigint::BigInt;

    fn split(value: &BigUint) -> (BigUint, BigUint) {
        let one = fixed_one();
        (value / &one, value % &one)
    }

    #[test]
    fn test_zero_is_degenerate() {
        assert_eq!(log2_fixed(&BigUint::zero()), BigUint::zero());
    }

    #[test]
    fn test_exact_powers_of_two() {
        for exponent in [0u64, 1, 7, 63, 64, 65, 200] {
            let x = BigUint::one() << exponent;
            let (int_part, frac) = split(&log2_fixed(&x));
            assert_eq!(int_part, BigUint::from(exponent));
            assert!(frac.is_zero());
        }
    }

    #[test]
    fn test_hundred() {
        // 100 = 64 + 36, c = 6, m = 36 * 2^64 / 64 = 0.5625 * 2^64
        let (int_part, frac) = split(&log2_fixed(&BigUint::from(100u32)));
        assert_eq!(int_part, BigUint::from(6u32));
        assert_eq!(frac, (fixed_one() * 9u32) >> 4u32);
    }

    #[test]
    fn test_mantissa_bounded_and_reconstructs() {
        let values = [
            BigUint::from(3u32),
            BigUint::from(100u32),
            BigUint::from(u64::MAX),
            BigUint::parse_bytes(b"1f3a9c0d5e7b2a4c6e8f0a1b3c5d7e9f1a2b3c4d5e6f7a8b9c", 16).unwrap(),
            (BigUint::one() << 300u32) - 1u32,
        ];

        for x in values {
            let result = log2_fixed(&x);
            let (c, m) = split(&result);
            assert_eq!(c, BigUint::from(x.bits() - 1));
            assert!(m < fixed_one());

            // 2^c * (1 + m / 2^64) undershoots x by less than 2^c / 2^64
            let c = x.bits() - 1;
            let pow = BigUint::one() << c;
            let reconstructed = (&pow << FIXED_POINT_BITS) + &m * &pow;
            let target = &x << FIXED_POINT_BITS;
            assert!(reconstructed <= target);
            assert!(&target - &reconstructed < pow);

            // Relative error stays far below one unit at 40 significant digits
            let diff = BigDecimal::from(BigInt::from(target - reconstructed));
            let scale = BigDecimal::from(BigInt::from(&x << FIXED_POINT_BITS));
            let tolerance = BigDecimal::new(BigInt::from(1), 39);
            assert!(diff / scale < tolerance);
        }
    }

    #[test]
    fn test_monotonic() {
        let mut previous = log2_fixed(&BigUint::one());
        for n in 2u32..2048 {
            let current = log2_fixed(&BigUint::from(n));
            assert!(current > previous, "log2_fixed not increasing at {}", n);
            previous = current;
        }
    }
}
