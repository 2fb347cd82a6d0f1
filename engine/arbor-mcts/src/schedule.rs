//! Root softmax temperature schedule.
//!
//! Parsed from a short text formula, `"start->end:rate"`: the temperature
//! decays half-life-style from `start` toward `end`, halving its remaining
//! distance every `rate` state changes. `rate` may be a constant, `sqrt(b)`,
//! or `c*sqrt(b)` with `b` bound to the game's branching factor. A bare
//! number is a flat schedule.

use crate::options::ConfigError;

#[derive(Debug, Clone)]
pub struct TemperatureSchedule {
    start: f32,
    end: f32,
    half_life: f32,
    steps: u32,
}

impl TemperatureSchedule {
    /// Parse a schedule, binding `b` to `branching_factor`.
    pub fn parse(spec: &str, branching_factor: f32) -> Result<Self, ConfigError> {
        let bad = || ConfigError::InvalidTemperature(spec.to_string());
        let spec_trimmed = spec.trim();

        let Some((start_str, rest)) = spec_trimmed.split_once("->") else {
            // Flat schedule.
            let value: f32 = spec_trimmed.parse().map_err(|_| bad())?;
            if !(value.is_finite() && value > 0.0) {
                return Err(bad());
            }
            return Ok(Self {
                start: value,
                end: value,
                half_life: 1.0,
                steps: 0,
            });
        };

        let (end_str, rate_str) = rest.split_once(':').ok_or_else(bad)?;
        let start: f32 = start_str.trim().parse().map_err(|_| bad())?;
        let end: f32 = end_str.trim().parse().map_err(|_| bad())?;
        let half_life = parse_rate(rate_str.trim(), branching_factor).ok_or_else(bad)?;

        if !(start.is_finite() && end.is_finite() && start > 0.0 && end > 0.0 && half_life > 0.0)
        {
            return Err(bad());
        }
        Ok(Self {
            start,
            end,
            half_life,
            steps: 0,
        })
    }

    /// Current temperature.
    pub fn value(&self) -> f32 {
        self.end + (self.start - self.end) * 0.5f32.powf(self.steps as f32 / self.half_life)
    }

    /// Advance one state change.
    pub fn step(&mut self) {
        self.steps = self.steps.saturating_add(1);
    }

    /// Back to the start of the game.
    pub fn reset(&mut self) {
        self.steps = 0;
    }
}

/// `rate` grammar: `c`, `sqrt(b)`, or `c*sqrt(b)`.
fn parse_rate(s: &str, b: f32) -> Option<f32> {
    if let Some(factor) = s.strip_suffix("*sqrt(b)") {
        let c: f32 = factor.trim().parse().ok()?;
        return Some(c * b.sqrt());
    }
    if s == "sqrt(b)" {
        return Some(b.sqrt());
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_schedule() {
        let mut t = TemperatureSchedule::parse("1", 7.0).unwrap();
        assert_eq!(t.value(), 1.0);
        t.step();
        t.step();
        assert_eq!(t.value(), 1.0);
    }

    #[test]
    fn test_decay_moves_from_start_to_end() {
        let mut t = TemperatureSchedule::parse("1.4->1.1:2*sqrt(b)", 7.0).unwrap();
        assert!((t.value() - 1.4).abs() < 1e-6);
        for _ in 0..200 {
            t.step();
        }
        assert!((t.value() - 1.1).abs() < 1e-3);
    }

    #[test]
    fn test_decay_is_monotonic() {
        let mut t = TemperatureSchedule::parse("1.4->1.1:4", 7.0).unwrap();
        let mut prev = t.value();
        for _ in 0..20 {
            t.step();
            let cur = t.value();
            assert!(cur < prev);
            prev = cur;
        }
    }

    #[test]
    fn test_half_life_semantics() {
        let mut t = TemperatureSchedule::parse("2.0->1.0:4", 9.0).unwrap();
        for _ in 0..4 {
            t.step();
        }
        // Remaining distance halves after `rate` steps.
        assert!((t.value() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_reset() {
        let mut t = TemperatureSchedule::parse("1.4->1.1:sqrt(b)", 9.0).unwrap();
        t.step();
        t.step();
        t.reset();
        assert!((t.value() - 1.4).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(TemperatureSchedule::parse("", 7.0).is_err());
        assert!(TemperatureSchedule::parse("x->y:z", 7.0).is_err());
        assert!(TemperatureSchedule::parse("1.4->1.1", 7.0).is_err());
        assert!(TemperatureSchedule::parse("0", 7.0).is_err());
        assert!(TemperatureSchedule::parse("1.4->1.1:0", 7.0).is_err());
    }
}
