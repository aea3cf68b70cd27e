//! Turns wheel, touch and key input into single-item index steps.
//!
//! Every channel funnels into [`Navigator::emit`], which moves the index by
//! at most one and then locks further steps for `cooldown`. Time is passed in
//! by the caller, so nothing here reads a clock.

use std::time::{Duration, Instant};

use crate::config::NavigationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Back,
}

/// Where an input event started. Events from controls layered over the
/// viewport (buttons, menus) never navigate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOrigin {
    Viewport,
    Control,
}

/// What one input event did to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Moved(usize),
    /// A step fired but the index was already at that end of the list.
    Boundary(Direction),
    /// Below threshold, locked out or from a control.
    Ignored,
}

impl Step {
    pub fn moved(self) -> Option<usize> {
        match self {
            Step::Moved(index) => Some(index),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureState {
    Idle,
    Accumulating { total: f64, last_input: Instant },
    Cooldown { until: Instant },
}

#[derive(Debug, Clone)]
pub struct Navigator {
    wheel_threshold: f64,
    wheel_idle: Duration,
    touch_threshold: f64,
    cooldown: Duration,
    state: GestureState,
    index: usize,
    touch_start: Option<f64>,
}

impl Navigator {
    pub fn new(config: &NavigationConfig) -> Self {
        Self {
            wheel_threshold: config.wheel_threshold.abs(),
            wheel_idle: config.wheel_idle,
            touch_threshold: config.touch_threshold.abs(),
            cooldown: config.cooldown,
            state: GestureState::Idle,
            index: 0,
            touch_start: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn is_locked(&self, now: Instant) -> bool {
        matches!(self.state, GestureState::Cooldown { until } if now < until)
    }

    /// Applies timer expiry: ends a finished cooldown and drops a wheel
    /// accumulator that has been idle for too long.
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            GestureState::Cooldown { until } if now >= until => {
                self.state = GestureState::Idle;
            }
            GestureState::Accumulating { last_input, .. }
                if now.saturating_duration_since(last_input) >= self.wheel_idle =>
            {
                self.state = GestureState::Idle;
            }
            _ => {}
        }
    }

    /// Feeds one wheel event. Positive deltas move forward.
    pub fn wheel(
        &mut self,
        delta: f64,
        origin: InputOrigin,
        now: Instant,
        len: usize,
    ) -> Step {
        if origin == InputOrigin::Control || !delta.is_finite() {
            return Step::Ignored;
        }
        self.tick(now);
        let total = match self.state {
            GestureState::Cooldown { .. } => return Step::Ignored,
            GestureState::Idle => delta,
            GestureState::Accumulating { total, .. } => total + delta,
        };

        if total.abs() < self.wheel_threshold {
            self.state = GestureState::Accumulating {
                total,
                last_input: now,
            };
            return Step::Ignored;
        }

        let direction = if total > 0.0 {
            Direction::Forward
        } else {
            Direction::Back
        };
        self.emit(direction, now, len)
    }

    pub fn touch_start(&mut self, y: f64, origin: InputOrigin) {
        self.touch_start = match origin {
            InputOrigin::Viewport => Some(y),
            InputOrigin::Control => None,
        };
    }

    /// Ends a touch gesture. Swiping up (start below end) moves forward.
    pub fn touch_end(
        &mut self,
        y: f64,
        origin: InputOrigin,
        now: Instant,
        len: usize,
    ) -> Step {
        let Some(start) = self.touch_start.take() else {
            return Step::Ignored;
        };
        if origin == InputOrigin::Control {
            return Step::Ignored;
        }
        self.tick(now);
        if self.is_locked(now) {
            return Step::Ignored;
        }
        let displacement = start - y;
        if displacement.abs() < self.touch_threshold {
            return Step::Ignored;
        }
        let direction = if displacement > 0.0 {
            Direction::Forward
        } else {
            Direction::Back
        };
        self.emit(direction, now, len)
    }

    pub fn key(&mut self, direction: Direction, now: Instant, len: usize) -> Step {
        self.tick(now);
        if self.is_locked(now) {
            return Step::Ignored;
        }
        self.emit(direction, now, len)
    }

    /// Back to the first item with no gesture in progress.
    pub fn reset(&mut self) {
        self.index = 0;
        self.state = GestureState::Idle;
        self.touch_start = None;
    }

    /// Keeps the index valid after the list changed. Returns `true` when the
    /// index moved.
    pub fn clamp(&mut self, len: usize) -> bool {
        let clamped = self.index.min(len.saturating_sub(1));
        let moved = clamped != self.index;
        self.index = clamped;
        moved
    }

    fn emit(&mut self, direction: Direction, now: Instant, len: usize) -> Step {
        self.state = GestureState::Cooldown {
            until: now + self.cooldown,
        };
        let target = match direction {
            Direction::Forward if self.index + 1 < len => self.index + 1,
            Direction::Back if self.index > 0 && len > 0 => self.index - 1,
            _ => {
                tracing::debug!(?direction, index = self.index, len, "step suppressed at boundary");
                return Step::Boundary(direction);
            }
        };
        tracing::debug!(?direction, from = self.index, to = target, "step");
        self.index = target;
        Step::Moved(target)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn index_stays_in_bounds(
            len in 0usize..20,
            events in prop::collection::vec((0u8..4, -300.0f64..300.0, 0u64..700), 0..80)
        ) {
            let mut nav = Navigator::new(&NavigationConfig::default());
            let mut now = Instant::now();
            for (kind, value, gap) in events {
                now += Duration::from_millis(gap);
                match kind {
                    0 => { nav.wheel(value, InputOrigin::Viewport, now, len); }
                    1 => nav.touch_start(value, InputOrigin::Viewport),
                    2 => { nav.touch_end(value, InputOrigin::Viewport, now, len); }
                    _ => {
                        let dir = if value >= 0.0 { Direction::Forward } else { Direction::Back };
                        nav.key(dir, now, len);
                    }
                }
                prop_assert!(nav.index() < len.max(1));
            }
        }

        #[test]
        fn spaced_forward_steps_reach_min_of_n_and_last(len in 1usize..15, n in 0usize..30) {
            let mut nav = Navigator::new(&NavigationConfig::default());
            let start = Instant::now();
            for i in 0..n {
                nav.key(Direction::Forward, start + Duration::from_millis(i as u64 * 401), len);
            }
            prop_assert_eq!(nav.index(), n.min(len - 1));
        }
    }
}
