use std::convert::TryInto;
use std::fmt;
use std::ops::Add;
use std::time::Duration;

/// A number of microseconds from an unspecified origin.
///
/// All limiter bookkeeping in this crate happens in microseconds: every
/// [`Clock`][crate::clock::Clock] reports the time as a `Micros` measured
/// from that clock's own origin, and reservations are stored as `Micros`
/// timestamps. Can not represent durations longer than ~584k years, which
/// should not come up in practice.
#[derive(PartialEq, Eq, Default, Clone, Copy, PartialOrd, Ord, Hash)]
pub struct Micros(u64);

impl Micros {
    /// The zero point of any clock origin.
    pub const ZERO: Micros = Micros(0);

    /// Returns the raw microsecond count.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Subtracts `rhs`, returning [`Micros::ZERO`] instead of underflowing.
    pub fn saturating_sub(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_sub(rhs.0))
    }

    /// Adds a cost computed in fractional microseconds, saturating at the
    /// representable maximum. Negative and NaN costs count as zero.
    pub(crate) fn saturating_add_f64(self, cost: f64) -> Micros {
        // `as` conversion from f64 saturates and maps NaN to 0.
        Micros(self.0.saturating_add(cost as u64))
    }
}

impl From<u64> for Micros {
    fn from(u: u64) -> Micros {
        Micros(u)
    }
}

impl From<Duration> for Micros {
    fn from(d: Duration) -> Micros {
        Micros(
            d.as_micros()
                .try_into()
                .expect("Duration is longer than 584 thousand years"),
        )
    }
}

impl From<Micros> for Duration {
    fn from(micros: Micros) -> Duration {
        Duration::from_micros(micros.0)
    }
}

impl Add<Micros> for Micros {
    type Output = Micros;

    fn add(self, rhs: Micros) -> Micros {
        Micros(self.0 + rhs.0)
    }
}

impl fmt::Debug for Micros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = Duration::from_micros(self.0);
        write!(f, "Micros({:?})", d)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn duration_roundtrip() {
        let d = Duration::from_millis(2500);
        let micros = Micros::from(d);
        assert_eq!(micros.as_u64(), 2_500_000);
        assert_eq!(Duration::from(micros), d);
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        let earlier = Micros::from(10u64);
        let later = Micros::from(20u64);
        assert_eq!(later.saturating_sub(earlier), Micros::from(10u64));
        assert_eq!(earlier.saturating_sub(later), Micros::ZERO);
    }

    #[test]
    fn fractional_costs_round_down_and_never_go_negative() {
        let t = Micros::from(100u64);
        assert_eq!(t.saturating_add_f64(99.7), Micros::from(199u64));
        assert_eq!(t.saturating_add_f64(-5.0), t);
        assert_eq!(t.saturating_add_f64(f64::NAN), t);
        assert_eq!(t.saturating_add_f64(f64::INFINITY), Micros::from(u64::MAX));
    }
}
