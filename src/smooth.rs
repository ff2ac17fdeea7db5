//! The smooth token-bucket engine shared by both pacing policies.
//!
//! A [`Smooth`] tracks, in microseconds, the earliest moment the next
//! reserved permit becomes usable, plus a bank of stored permits that
//! accumulates while the limiter sits idle. The two [`Pacing`] policies
//! differ only in what a stored permit is worth: under [`Pacing::Bursty`]
//! stored permits are free (they absorb bursts), under
//! [`Pacing::WarmingUp`] they are expensive (a full bank means a cold
//! resource, and draining it costs up to `cold_factor` times the stable
//! interval per permit, decreasing linearly along the ramp).
//!
//! Reservation follows a pay-it-forward rule: a call is charged the debt
//! accumulated by its predecessors and defers its own cost to whoever
//! reserves next. This is what lets the first request through a cold
//! limiter immediately.

use crate::micros::Micros;

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// How stored permits are priced. A closed set: policies are chosen at
/// construction and never change over a limiter's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Pacing {
    /// Idle capacity is banked for free, up to `max_burst_seconds` worth
    /// of the stable rate.
    Bursty { max_burst_seconds: f64 },
    /// Permit cost ramps from `cold_factor * stable_interval` down to
    /// `stable_interval` over the warm-up period. `threshold_permits` and
    /// `slope` are derived from the rate and cached by `set_rate`.
    WarmingUp {
        warmup_period_micros: f64,
        cold_factor: f64,
        threshold_permits: f64,
        slope: f64,
    },
}

impl Pacing {
    pub(crate) fn bursty(max_burst_seconds: f64) -> Pacing {
        Pacing::Bursty { max_burst_seconds }
    }

    pub(crate) fn warming_up(warmup_period_micros: f64, cold_factor: f64) -> Pacing {
        Pacing::WarmingUp {
            warmup_period_micros,
            cold_factor,
            threshold_permits: 0.0,
            slope: 0.0,
        }
    }
}

/// Reservation state for one limiter. Guarded by the owning limiter's
/// mutex; nothing here synchronizes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Smooth {
    pacing: Pacing,
    /// Banked permits, in [0, max_permits].
    stored_permits: f64,
    max_permits: f64,
    /// The nominal cost of one permit at the stable rate, in microseconds.
    stable_interval_micros: f64,
    /// The earliest time the next reserved permit becomes usable.
    /// Monotonically non-decreasing.
    next_free_ticket: Micros,
}

impl Smooth {
    pub(crate) fn new(pacing: Pacing, permits_per_second: f64, now: Micros) -> Smooth {
        let mut smooth = Smooth {
            pacing,
            stored_permits: 0.0,
            max_permits: 0.0,
            stable_interval_micros: 0.0,
            next_free_ticket: Micros::ZERO,
        };
        smooth.set_rate(permits_per_second, now);
        smooth
    }

    /// Installs a new stable rate. Cost already committed to
    /// `next_free_ticket` is not repriced; only subsequent reservations
    /// observe the new rate. The stored-permit bank is rescaled so that
    /// its fill fraction is preserved.
    pub(crate) fn set_rate(&mut self, permits_per_second: f64, now: Micros) {
        self.resync(now);
        let stable_interval = MICROS_PER_SECOND / permits_per_second;
        self.stable_interval_micros = stable_interval;

        let old_max_permits = self.max_permits;
        match &mut self.pacing {
            Pacing::Bursty { max_burst_seconds } => {
                self.max_permits = *max_burst_seconds * permits_per_second;
                self.stored_permits = if old_max_permits == f64::INFINITY {
                    self.max_permits
                } else if old_max_permits == 0.0 {
                    0.0
                } else {
                    self.stored_permits * self.max_permits / old_max_permits
                };
            }
            Pacing::WarmingUp {
                warmup_period_micros,
                cold_factor,
                threshold_permits,
                slope,
            } => {
                let cold_interval = stable_interval * *cold_factor;
                // The warm-up ramp is a trapezoid over stored permits:
                // flat at stable_interval up to the threshold, rising
                // linearly to cold_interval at max_permits. The threshold
                // is placed so the flat part holds half the warm-up
                // period's worth of time.
                *threshold_permits = 0.5 * *warmup_period_micros / stable_interval;
                self.max_permits = *threshold_permits
                    + 2.0 * *warmup_period_micros / (stable_interval + cold_interval);
                *slope = (cold_interval - stable_interval) / (self.max_permits - *threshold_permits);
                self.stored_permits = if old_max_permits == f64::INFINITY {
                    0.0
                } else if old_max_permits == 0.0 {
                    // Initial state is cold: the full ramp must be paid off.
                    self.max_permits
                } else {
                    self.stored_permits * self.max_permits / old_max_permits
                };
            }
        }
    }

    pub(crate) fn rate(&self) -> f64 {
        MICROS_PER_SECOND / self.stable_interval_micros
    }

    /// The earliest time permits are available. Read-only: used by the
    /// timeout feasibility check, which must not commit anything.
    pub(crate) fn earliest_available(&self) -> Micros {
        self.next_free_ticket
    }

    /// Reserves `permits` and returns the moment the caller's predecessor
    /// debt is paid off, i.e. the timestamp the caller must wait for.
    /// Never earlier than `now` has ever been observed; the newly
    /// reserved permits' own cost moves `next_free_ticket` further out
    /// for the next caller.
    pub(crate) fn reserve_earliest_available(&mut self, permits: u32, now: Micros) -> Micros {
        self.resync(now);
        let ticket = self.next_free_ticket;

        let requested = f64::from(permits);
        let stored_to_spend = requested.min(self.stored_permits);
        let fresh = requested - stored_to_spend;
        let wait_micros = self.stored_permits_to_wait_time(self.stored_permits, stored_to_spend)
            + fresh * self.stable_interval_micros;

        self.next_free_ticket = self.next_free_ticket.saturating_add_f64(wait_micros);
        self.stored_permits -= stored_to_spend;
        ticket
    }

    /// Brings the bank up to date with the passage of time: idle time
    /// since `next_free_ticket` grows the stored bank (bounded by
    /// `max_permits`) and pulls the ticket up to `now`. The bank only
    /// ever grows lazily here; there is no background replenishment.
    fn resync(&mut self, now: Micros) {
        if now > self.next_free_ticket {
            let elapsed = now.saturating_sub(self.next_free_ticket).as_u64() as f64;
            let accrued = elapsed / self.cool_down_interval_micros();
            self.stored_permits = self.max_permits.min(self.stored_permits + accrued);
            self.next_free_ticket = now;
        }
    }

    /// The time it takes one stored permit to accrue while idle.
    fn cool_down_interval_micros(&self) -> f64 {
        match &self.pacing {
            Pacing::Bursty { .. } => self.stable_interval_micros,
            Pacing::WarmingUp {
                warmup_period_micros,
                ..
            } => *warmup_period_micros / self.max_permits,
        }
    }

    /// The cost of taking `take` permits out of a bank currently holding
    /// `stored` permits, in microseconds beyond "free".
    fn stored_permits_to_wait_time(&self, stored: f64, mut take: f64) -> f64 {
        match &self.pacing {
            // Stored permits exist to absorb bursts; spending them costs
            // nothing.
            Pacing::Bursty { .. } => 0.0,
            Pacing::WarmingUp {
                threshold_permits,
                slope,
                ..
            } => {
                // Integrate the ramp over the interval of permits being
                // taken; both ends of the trapezoid are priced by their
                // distance above the threshold.
                let interval_at = |permits_above_threshold: f64| {
                    self.stable_interval_micros + permits_above_threshold * slope
                };
                let available_above = stored - threshold_permits;
                let mut micros = 0.0;
                if available_above > 0.0 {
                    let above_to_take = available_above.min(take);
                    let length =
                        interval_at(available_above) + interval_at(available_above - above_to_take);
                    micros = above_to_take * length / 2.0;
                    take -= above_to_take;
                }
                micros + self.stable_interval_micros * take
            }
        }
    }
}
