// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Animation timing.

/// Easing curve applied to the normalized animation time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Easing {
    /// Constant speed.
    Linear,
    /// Fast start, slow end.
    #[default]
    CubicOut,
    /// Slow start and end.
    CubicInOut,
}

impl Easing {
    /// Maps `t` in `[0, 1]` to eased progress.
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::CubicOut => {
                let u = t - 1.0;
                u * u * u + 1.0
            }
            Self::CubicInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    let u = 2.0 * t - 2.0;
                    0.5 * u * u * u + 1.0
                }
            }
        }
    }
}

/// How an animated change is played.
///
/// Durations and delays are in seconds of [`Scene::advance`](crate::Scene::advance) time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationConfig {
    /// Whether changes animate at all; disabled changes apply immediately.
    pub enabled: bool,
    /// Duration of the animation.
    pub duration: f64,
    /// Delay before the animation starts.
    pub delay: f64,
    /// Easing curve.
    pub easing: Easing,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration: 0.5,
            delay: 0.0,
            easing: Easing::CubicOut,
        }
    }
}

impl AnimationConfig {
    /// A config that applies every change immediately.
    pub const DISABLED: Self = Self {
        enabled: false,
        duration: 0.0,
        delay: 0.0,
        easing: Easing::Linear,
    };

    /// Sets the duration.
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration.max(0.0);
        self
    }

    /// Sets the delay.
    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay.max(0.0);
        self
    }

    /// Sets the easing curve.
    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// Returns whether changes played with this config take time.
    pub fn is_animated(&self) -> bool {
        self.enabled && (self.duration > 0.0 || self.delay > 0.0)
    }

    /// Returns the eased progress after `elapsed` seconds, or `None` while delayed.
    pub(crate) fn progress(&self, elapsed: f64) -> Option<f64> {
        if elapsed < self.delay {
            return None;
        }
        let local = if self.duration > 0.0 {
            (elapsed - self.delay) / self.duration
        } else {
            1.0
        };
        Some(self.easing.apply(local))
    }

    /// Returns whether the animation is over after `elapsed` seconds.
    pub(crate) fn is_done(&self, elapsed: f64) -> bool {
        elapsed >= self.delay + self.duration
    }
}
