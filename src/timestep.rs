// Fixed-timestep accumulator
//
// Drives input/update at a bounded, wall-clock-independent rate while the
// render loop submits as fast as presentation allows. Replaces sleep-based
// pacing: no behavior depends on sleep granularity.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FixedTimestep {
    step: Duration,
    accumulator: Duration,
    max_ticks_per_advance: u32,
}

impl FixedTimestep {
    /// `step` is the simulation tick length; `max_ticks_per_advance` bounds
    /// catch-up after a long stall so one slow frame cannot snowball.
    pub fn new(step: Duration, max_ticks_per_advance: u32) -> Self {
        assert!(!step.is_zero(), "timestep must be non-zero");
        Self {
            step,
            accumulator: Duration::ZERO,
            max_ticks_per_advance,
        }
    }

    /// 60 Hz updates, at most 4 catch-up ticks per frame.
    pub fn sixty_hz() -> Self {
        Self::new(Duration::from_micros(16_667), 4)
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Feed elapsed wall time, get back how many fixed update ticks to run.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        self.accumulator = self.accumulator.saturating_add(elapsed);

        let mut ticks = 0;
        while self.accumulator >= self.step && ticks < self.max_ticks_per_advance {
            self.accumulator -= self.step;
            ticks += 1;
        }

        // Drop whatever we could not catch up on; carrying it over would
        // demand even more ticks next frame
        if ticks == self.max_ticks_per_advance && self.accumulator >= self.step {
            self.accumulator = Duration::ZERO;
        }

        ticks
    }

    /// Fraction of a step accumulated, in [0, 1). Useful for render-side
    /// interpolation between update states.
    pub fn alpha(&self) -> f32 {
        self.accumulator.as_secs_f32() / self.step.as_secs_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_until_a_full_step() {
        let mut ts = FixedTimestep::new(Duration::from_millis(10), 8);
        assert_eq!(ts.advance(Duration::from_millis(4)), 0);
        assert_eq!(ts.advance(Duration::from_millis(4)), 0);
        // 12ms total: one tick, 2ms remainder
        assert_eq!(ts.advance(Duration::from_millis(4)), 1);
        assert!(ts.alpha() > 0.0 && ts.alpha() < 1.0);
    }

    #[test]
    fn yields_multiple_ticks_after_a_stall() {
        let mut ts = FixedTimestep::new(Duration::from_millis(10), 8);
        assert_eq!(ts.advance(Duration::from_millis(35)), 3);
    }

    #[test]
    fn catch_up_is_bounded() {
        let mut ts = FixedTimestep::new(Duration::from_millis(10), 4);
        // A 10-second stall must not demand 1000 ticks
        assert_eq!(ts.advance(Duration::from_secs(10)), 4);
        // Leftover debt was dropped, not carried
        assert_eq!(ts.advance(Duration::ZERO), 0);
    }

    #[test]
    fn update_rate_is_independent_of_call_granularity() {
        // Same wall time, different slicing: same total tick count
        let mut coarse = FixedTimestep::new(Duration::from_millis(10), 8);
        let mut fine = FixedTimestep::new(Duration::from_millis(10), 8);

        let coarse_ticks = coarse.advance(Duration::from_millis(50));
        let fine_ticks: u32 = (0..50).map(|_| fine.advance(Duration::from_millis(1))).sum();

        assert_eq!(coarse_ticks, 5);
        assert_eq!(fine_ticks, 5);
    }
}
