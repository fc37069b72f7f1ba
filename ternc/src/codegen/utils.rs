//! Shared lowering arithmetic.

/// Compute the magic number and shift for signed division by the constant
/// `divisor`, following H. S. Warren's "Hacker's Delight" (chapter 10) and
/// Granlund & Montgomery's "Division by invariant integers using
/// multiplication" (PLDI 1994).
///
/// The returned pair `(magic, shift)` satisfies, for every representable
/// dividend `n`:
///
/// ```text
/// n / divisor == sign_fix(((n * magic) >> width) + correction) >> shift
/// ```
///
/// where `correction` adds the dividend when `divisor > 0 && magic < 0`,
/// subtracts it when `divisor < 0 && magic > 0`, and the final sign fix adds
/// one when the intermediate is negative. The derivation chooses the smallest
/// shift `p` such that `2^p > nc * (|divisor| - 2^p mod |divisor|)`, where
/// `nc` is the most positive (most negative for negative divisors) dividend
/// for which the approximation must still be exact.
///
/// `is_long` selects a 64-bit derivation; for 32-bit the result is truncated
/// to `i32` range. Never call this with `divisor` 0, 1 or -1: those have no
/// magic number (and much cheaper lowerings).
pub fn magic_and_shift_for_div_rem(divisor: i64, is_long: bool) -> (i64, u32) {
    debug_assert!(divisor != 0 && divisor != 1 && divisor != -1);
    let mut p: i64 = if is_long { 63 } else { 31 };
    let exp: u64 = if is_long { 1 << 63 } else { 1 << 31 };

    let abs_d: u64 = divisor.unsigned_abs();
    let tmp: u64 = exp
        + if is_long {
            (divisor as u64) >> 63
        } else {
            u64::from((divisor as u32) >> 31)
        };
    let abs_nc: u64 = tmp.wrapping_sub(1).wrapping_sub(tmp % abs_d);
    let mut quotient1: u64 = exp / abs_nc;
    let mut remainder1: u64 = exp % abs_nc;
    let mut quotient2: u64 = exp / abs_d;
    let mut remainder2: u64 = exp % abs_d;

    loop {
        p += 1;
        quotient1 = quotient1.wrapping_mul(2);
        remainder1 = remainder1.wrapping_mul(2);
        if remainder1 >= abs_nc {
            quotient1 = quotient1.wrapping_add(1);
            remainder1 -= abs_nc;
        }
        quotient2 = quotient2.wrapping_mul(2);
        remainder2 = remainder2.wrapping_mul(2);
        if remainder2 >= abs_d {
            quotient2 = quotient2.wrapping_add(1);
            remainder2 -= abs_d;
        }
        let delta = abs_d - remainder2;
        if !(quotient1 < delta || (quotient1 == delta && remainder1 == 0)) {
            break;
        }
    }

    let mut magic: i64 = if divisor > 0 {
        quotient2.wrapping_add(1) as i64
    } else {
        (quotient2.wrapping_add(1) as i64).wrapping_neg()
    };
    if !is_long {
        magic = i64::from(magic as i32);
    }

    let shift = if is_long { p - 64 } else { p - 32 };
    (magic, u32::try_from(shift).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Evaluate the machine sequence the emitter produces for a 32-bit
    /// division by `divisor`: a 32x32->64 signed multiply-high, the
    /// conditional dividend correction, the arithmetic shift, and the final
    /// sign fix.
    fn emulate_div(dividend: i32, divisor: i32) -> i32 {
        let (magic, shift) = magic_and_shift_for_div_rem(i64::from(divisor), false);
        let magic = magic as i32;
        let mut t = ((i64::from(dividend) * i64::from(magic)) >> 32) as i32;
        if divisor > 0 && magic < 0 {
            t = t.wrapping_add(dividend);
        } else if divisor < 0 && magic > 0 {
            t = t.wrapping_sub(dividend);
        }
        if shift != 0 {
            t >>= shift;
        }
        t.wrapping_sub(t >> 31)
    }

    fn emulate_rem(dividend: i32, divisor: i32) -> i32 {
        // rem = dividend - quotient * divisor, as the emitted mls computes.
        dividend.wrapping_sub(emulate_div(dividend, divisor).wrapping_mul(divisor))
    }

    #[test]
    fn div_by_constant_matches_hardware_division() {
        let divisors = [3, -3, 5, 7, -7, 10, 100, -100, 12345, i32::MAX, -i32::MAX];
        let dividends = [
            i32::MIN,
            i32::MIN + 1,
            -1000001,
            -14,
            -7,
            -1,
            0,
            1,
            6,
            7,
            8,
            999999,
            i32::MAX - 1,
            i32::MAX,
        ];
        for &d in &divisors {
            for &n in &dividends {
                assert_eq!(emulate_div(n, d), n.wrapping_div(d), "{n} / {d}");
                assert_eq!(emulate_rem(n, d), n.wrapping_rem(d), "{n} % {d}");
            }
        }
    }

    #[test]
    fn div_by_constant_dense_range() {
        for d in [3, 7, -7, 100] {
            for n in -1000..=1000 {
                assert_eq!(emulate_div(n, d), n / d, "{n} / {d}");
            }
        }
    }

    /// Evaluate the branch-free shift sequence emitted for power-of-two
    /// divisors: a sign-derived rounding correction, an add, and an
    /// arithmetic shift (with a final negate for negative divisors).
    fn emulate_div_pow2(dividend: i32, divisor: i32) -> i32 {
        let abs = divisor.unsigned_abs();
        assert!(abs.is_power_of_two() && abs > 1);
        let ctz = abs.trailing_zeros();
        let temp = if ctz == 1 {
            ((dividend as u32) >> (32 - ctz)) as i32
        } else {
            (((dividend >> 31) as u32) >> (32 - ctz)) as i32
        };
        let out = temp.wrapping_add(dividend) >> ctz;
        if divisor < 0 {
            out.wrapping_neg()
        } else {
            out
        }
    }

    fn emulate_rem_pow2(dividend: i32, divisor: i32) -> i32 {
        let abs = divisor.unsigned_abs();
        let ctz = abs.trailing_zeros();
        let temp = if ctz == 1 {
            ((dividend as u32) >> (32 - ctz)) as i32
        } else {
            (((dividend >> 31) as u32) >> (32 - ctz)) as i32
        };
        let sum = temp.wrapping_add(dividend);
        // ubfx keeps the low ctz bits zero-extended.
        let low = (sum as u32 & ((1u32 << ctz) - 1)) as i32;
        low.wrapping_sub(temp)
    }

    #[test]
    fn div_by_power_of_two_matches_hardware_division() {
        let divisors = [2, -2, 4, 8, -8, 1 << 30, i32::MIN];
        let dividends = [
            i32::MIN,
            i32::MIN + 1,
            -100,
            -14,
            -2,
            -1,
            0,
            1,
            2,
            7,
            8,
            100,
            i32::MAX,
        ];
        for &d in &divisors {
            for &n in &dividends {
                assert_eq!(emulate_div_pow2(n, d), n.wrapping_div(d), "{n} / {d}");
                assert_eq!(emulate_rem_pow2(n, d), n.wrapping_rem(d), "{n} % {d}");
            }
        }
    }

    #[test]
    fn div_by_one_and_minus_one() {
        // These lower to a plain move or negate; the only subtlety is that
        // INT_MIN / -1 must wrap rather than trap.
        for n in [i32::MIN, -1, 0, 1, i32::MAX] {
            assert_eq!(n.wrapping_neg(), n.wrapping_div(-1));
            assert_eq!(n, n.wrapping_div(1));
            assert_eq!(0, n.wrapping_rem(1));
            assert_eq!(0, n.wrapping_rem(-1));
        }
    }

    #[test]
    fn known_magic_values() {
        // The classic published constants for 32-bit division.
        assert_eq!(magic_and_shift_for_div_rem(3, false), (0x55555556, 0));
        assert_eq!(magic_and_shift_for_div_rem(5, false), (0x66666667, 1));
        assert_eq!(magic_and_shift_for_div_rem(7, false), (-0x6DB6DB6D, 2));
        assert_eq!(magic_and_shift_for_div_rem(-5, false), (-0x66666667, 1));
    }

    #[test]
    fn long_derivation() {
        // 64-bit magic for 3 and 7, as published.
        assert_eq!(
            magic_and_shift_for_div_rem(3, true),
            (0x5555555555555556, 0)
        );
        assert_eq!(
            magic_and_shift_for_div_rem(7, true),
            (0x2492492492492493, 1)
        );
        // Spot-check the 64-bit sequence semantics via 128-bit arithmetic.
        for &(n, d) in &[
            (i64::MIN, 7),
            (i64::MAX, 7),
            (-1_000_000_000_000, 3),
            (999, -7),
        ] {
            let (magic, shift) = magic_and_shift_for_div_rem(d, true);
            let mut t = ((i128::from(n) * i128::from(magic)) >> 64) as i64;
            if d > 0 && magic < 0 {
                t = t.wrapping_add(n);
            } else if d < 0 && magic > 0 {
                t = t.wrapping_sub(n);
            }
            if shift != 0 {
                t >>= shift;
            }
            let q = t.wrapping_sub(t >> 63);
            assert_eq!(q, n.wrapping_div(d), "{n} / {d}");
        }
    }
}
