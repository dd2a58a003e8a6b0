//! Mass-driven pump interlock.
//!
//! The scale-coupled brew evaluates an interlock on every mass reading. The
//! hysteresis rule switches the pump on above a high threshold and only switches
//! it off once the trailing mean has fallen under a lower one, so one noisy
//! reading cannot make the pump chatter.

use super::run::MassSample;
use crate::config::InterlockConfig;
use std::collections::VecDeque;

/// What the pump should do after a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpAction {
    /// Command the pump on
    On,
    /// Command the pump off
    Off,
    /// Leave the pump alone
    Hold,
}

/// Strategy consulted once per mass reading
pub trait PumpInterlock: Send {
    /// Decide the pump action for a fresh reading. `pump_on` is the last commanded state.
    fn on_tick(&mut self, sample: &MassSample, pump_on: bool) -> PumpAction;

    /// Forget history before a new brew
    fn reset(&mut self);
}

/// On above `on_threshold`; off once the trailing mean drops under `off_threshold`.
#[derive(Debug, Clone)]
pub struct HysteresisInterlock {
    on_threshold: f64,
    off_threshold: f64,
    window: usize,
    recent: VecDeque<f64>,
}

impl HysteresisInterlock {
    /// Build from explicit thresholds
    pub fn new(on_threshold: f64, off_threshold: f64, window: usize) -> Self {
        Self {
            on_threshold,
            off_threshold,
            window: window.max(1),
            recent: VecDeque::with_capacity(window.max(1)),
        }
    }

    /// Build from configuration
    pub fn from_config(config: &InterlockConfig) -> Self {
        Self::new(config.on_threshold, config.off_threshold, config.window)
    }

    /// Mean of the readings currently in the window
    pub fn trailing_mean(&self) -> Option<f64> {
        if self.recent.is_empty() {
            return None;
        }
        Some(self.recent.iter().sum::<f64>() / self.recent.len() as f64)
    }
}

impl PumpInterlock for HysteresisInterlock {
    fn on_tick(&mut self, sample: &MassSample, pump_on: bool) -> PumpAction {
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(sample.mass);

        if sample.mass > self.on_threshold {
            return PumpAction::On;
        }

        match self.trailing_mean() {
            Some(mean) if pump_on && mean < self.off_threshold => PumpAction::Off,
            _ => PumpAction::Hold,
        }
    }

    fn reset(&mut self) {
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(mass: f64) -> MassSample {
        MassSample {
            timestamp: 0.0,
            mass,
            unstable: false,
        }
    }

    /// Feed masses through the interlock, tracking the pump like the session does.
    fn drive(interlock: &mut HysteresisInterlock, masses: &[f64]) -> Vec<(usize, PumpAction)> {
        let mut pump_on = false;
        let mut transitions = Vec::new();
        for (i, &mass) in masses.iter().enumerate() {
            match interlock.on_tick(&sample(mass), pump_on) {
                PumpAction::On => {
                    if !pump_on {
                        transitions.push((i, PumpAction::On));
                    }
                    pump_on = true;
                }
                PumpAction::Off => {
                    transitions.push((i, PumpAction::Off));
                    pump_on = false;
                }
                PumpAction::Hold => {}
            }
        }
        transitions
    }

    #[test]
    fn test_on_then_off_once() {
        let mut interlock = HysteresisInterlock::from_config(&InterlockConfig::default());
        let mut masses = vec![50.0, 150.0, 380.0];
        masses.extend(std::iter::repeat(100.0).take(12));

        let transitions = drive(&mut interlock, &masses);
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0], (2, PumpAction::On));
        assert_eq!(transitions[1].1, PumpAction::Off);
    }

    #[test]
    fn test_off_waits_for_trailing_mean() {
        let mut interlock = HysteresisInterlock::new(370.0, 200.0, 10);
        let mut masses = vec![400.0; 9];
        masses.extend([100.0; 7]);

        let transitions = drive(&mut interlock, &masses);
        // index 14 window: 400 x4, 100 x6 -> 220; index 15: 400 x3, 100 x7 -> 190
        assert_eq!(transitions, vec![(0, PumpAction::On), (15, PumpAction::Off)]);
        assert_eq!(interlock.trailing_mean(), Some(190.0));
    }

    #[test]
    fn test_short_history_uses_all_readings() {
        let mut interlock = HysteresisInterlock::new(370.0, 200.0, 10);
        assert_eq!(interlock.on_tick(&sample(380.0), false), PumpAction::On);
        // mean(380, 100) = 240
        assert_eq!(interlock.on_tick(&sample(100.0), true), PumpAction::Hold);
        // mean(380, 100, 95) = 191.7
        assert_eq!(interlock.on_tick(&sample(95.0), true), PumpAction::Off);
    }

    #[test]
    fn test_pump_off_holds_below_threshold() {
        let mut interlock = HysteresisInterlock::new(370.0, 200.0, 10);
        assert_eq!(interlock.on_tick(&sample(10.0), false), PumpAction::Hold);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut interlock = HysteresisInterlock::new(370.0, 200.0, 3);
        interlock.on_tick(&sample(390.0), false);
        interlock.reset();
        assert_eq!(interlock.trailing_mean(), None);
    }
}
