//! Integer divisor selection
//!
//! Every rate-programmed peripheral (UART baud, SPI clock, I2C bus clock,
//! bus prescalers) derives its rate by integer division of a source clock.
//! This module holds the one divisor search they all share.
//!
//! Policy: the chosen divisor minimizes the relative error of the resulting
//! rate; when two divisors are exactly as close, the larger one wins, i.e.
//! the tie breaks toward the *lower* resulting rate. Requests whose best
//! achievable rate is outside the caller's tolerance are reported as errors,
//! never silently rounded.

/// A chosen divisor and the relative error of the rate it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Divisor {
    pub div: u32,
    /// `|source / div - target| / target`, in permille, rounded down.
    pub error_permille: u32,
}

/// Divisor search failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DividerError {
    /// The best divisor in range misses the target by more than the
    /// caller's tolerance.
    OutOfTolerance {
        closest: Divisor,
        tolerance_permille: u32,
    },
}

// |source - target * div|, the numerator of the relative error scaled by
// target * div. Comparing err(a) < err(b) as num(a) * b < num(b) * a keeps
// the comparison exact.
const fn error_num(source: u64, target: u64, div: u64) -> u64 {
    let scaled = target * div;
    if source > scaled {
        source - scaled
    } else {
        scaled - source
    }
}

const fn clamp(div: u32, min_div: u32, max_div: u32) -> u32 {
    if div < min_div {
        min_div
    } else if div > max_div {
        max_div
    } else {
        div
    }
}

/// Picks the divisor in `min_div..=max_div` whose rate `source / div` is
/// closest to `target`.
pub const fn closest_in_range(source: u32, target: u32, min_div: u32, max_div: u32) -> Divisor {
    assert!(source > 0 && target > 0, "rates must be non-zero");
    assert!(min_div >= 1 && min_div <= max_div, "empty divisor range");

    let s = source as u64;
    let t = target as u64;

    let floor = clamp(if source / target == 0 { 1 } else { source / target }, min_div, max_div);
    let ceil = clamp(floor.saturating_add(1), min_div, max_div);

    let floor_num = error_num(s, t, floor as u64);
    let ceil_num = error_num(s, t, ceil as u64);

    // err(floor) < err(ceil) iff floor_num * ceil < ceil_num * floor; on a
    // tie the larger divisor (lower rate) is kept.
    let div = if floor_num * (ceil as u64) < ceil_num * floor as u64 {
        floor
    } else {
        ceil
    };

    let num = error_num(s, t, div as u64);
    Divisor {
        div,
        error_permille: (num * 1000 / (t * div as u64)) as u32,
    }
}

/// [`closest_in_range`] over the full 32-bit divisor range.
pub const fn closest(source: u32, target: u32) -> Divisor {
    closest_in_range(source, target, 1, u32::MAX)
}

/// Divisor search with a tolerance bound on the resulting rate error.
pub const fn checked(
    source: u32,
    target: u32,
    min_div: u32,
    max_div: u32,
    tolerance_permille: u32,
) -> Result<Divisor, DividerError> {
    let best = closest_in_range(source, target, min_div, max_div);
    if best.error_permille > tolerance_permille {
        Err(DividerError::OutOfTolerance {
            closest: best,
            tolerance_permille,
        })
    } else {
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exact_division_has_zero_error() {
        let d = closest(48_000_000, 1_000_000);
        assert_eq!(d.div, 48);
        assert_eq!(d.error_permille, 0);
    }

    #[test]
    fn classic_uart_divisor() {
        // 48 MHz clock, 16x oversampling, 9600 Bd: 312.5 is unreachable and
        // 313 is the marginally closer neighbour (9584.66 Bd vs 9615.38 Bd).
        let d = closest(48_000_000 / 16, 9600);
        assert_eq!(d.div, 313);
        assert!(d.error_permille <= 2);
    }

    #[test]
    fn exact_tie_prefers_the_lower_rate() {
        // 24 / 2 = 12 and 24 / 3 = 8 are both 20% away from 10.
        let d = closest(24, 10);
        assert_eq!(d.div, 3);
        assert_eq!(d.error_permille, 200);
    }

    #[test]
    fn range_clamping() {
        // Unclamped best would be 48; the range forces 32.
        let d = closest_in_range(48_000_000, 1_000_000, 1, 32);
        assert_eq!(d.div, 32);
        assert_eq!(d.error_permille, 500);
    }

    #[test]
    fn target_above_source_pins_to_one() {
        let d = closest(1_000, 8_000);
        assert_eq!(d.div, 1);
        assert_eq!(d.error_permille, 875);
    }

    #[test]
    fn tolerance_violations_are_reported() {
        let r = checked(48_000_000, 1_000_000, 1, 32, 25);
        assert_eq!(
            r,
            Err(DividerError::OutOfTolerance {
                closest: Divisor {
                    div: 32,
                    error_permille: 500
                },
                tolerance_permille: 25,
            })
        );
        assert!(checked(48_000_000 / 16, 9600, 1, 0xffff, 25).is_ok());
    }

    #[test]
    fn search_is_deterministic() {
        let a = closest(26_000_000, 115_200);
        let b = closest(26_000_000, 115_200);
        assert_eq!(a, b);
    }

    // err(div) as an exact rational numerator over the common denominator
    // target * div, for cross-multiplied comparisons.
    fn err_le(source: u64, target: u64, a: u64, b: u64) -> bool {
        error_num(source, target, a) * b <= error_num(source, target, b) * a
    }

    proptest! {
        #[test]
        fn chosen_divisor_beats_both_neighbours(
            source in 1u32..=200_000_000,
            target in 1u32..=2_000_000,
        ) {
            let d = closest(source, target).div;
            let (s, t) = (source as u64, target as u64);
            if d > 1 {
                prop_assert!(err_le(s, t, d as u64, (d - 1) as u64));
            }
            prop_assert!(err_le(s, t, d as u64, (d + 1) as u64));
        }
    }
}
