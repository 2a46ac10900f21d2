// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scheduler and per-series configuration.

use alloc::borrow::Cow;

/// Chunk size used when a series enables progressive rendering without a step of its own.
pub const DEFAULT_PROGRESSIVE_STEP: usize = 700;

/// Scheduler-wide options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Step used for pipelines whose series has no explicit `progressive` value.
    pub default_step: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_step: DEFAULT_PROGRESSIVE_STEP,
        }
    }
}

impl SchedulerConfig {
    /// Sets the default progressive step.
    pub fn with_default_step(mut self, step: usize) -> Self {
        self.default_step = step.max(1);
        self
    }
}

/// How progressive chunks are assigned to data indices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChunkMode {
    /// Chunks cover contiguous index ranges.
    #[default]
    Sequential,
    /// Chunks interleave across the whole dataset (`index % mod_by`), so every frame paints
    /// a sparse but evenly spread subset of the items.
    Mod,
}

/// Scheduling-related series options.
///
/// Defaults follow the usual chart conventions: progressive rendering is off, and once
/// enabled kicks in at 3000 items.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesOptions {
    /// Items processed per progressive step. `None` or `Some(0)` disables progressive mode.
    pub progressive: Option<usize>,
    /// Item count from which progressive rendering activates.
    pub progressive_threshold: usize,
    /// Chunk assignment strategy.
    pub progressive_chunk_mode: ChunkMode,
    /// Whether large mode (one batched element for all items) may be used.
    pub large: bool,
    /// Item count from which large mode activates.
    pub large_threshold: usize,
    /// Stack group; series sharing a stack accumulate their values.
    pub stack: Option<Cow<'static, str>>,
    /// Whether update animations run for this series.
    pub animation: bool,
    /// Whether this series takes part in cross-series morphing on updates.
    pub universal_transition: bool,
}

impl Default for SeriesOptions {
    fn default() -> Self {
        Self {
            progressive: None,
            progressive_threshold: 3000,
            progressive_chunk_mode: ChunkMode::Sequential,
            large: false,
            large_threshold: 2000,
            stack: None,
            animation: true,
            universal_transition: false,
        }
    }
}

impl SeriesOptions {
    /// Enables progressive rendering with the given step.
    pub fn with_progressive(mut self, step: usize) -> Self {
        self.progressive = Some(step);
        self
    }

    /// Sets the progressive threshold.
    pub fn with_progressive_threshold(mut self, threshold: usize) -> Self {
        self.progressive_threshold = threshold;
        self
    }

    /// Sets the chunk mode.
    pub fn with_chunk_mode(mut self, mode: ChunkMode) -> Self {
        self.progressive_chunk_mode = mode;
        self
    }

    /// Enables large mode from `threshold` items on.
    pub fn with_large(mut self, threshold: usize) -> Self {
        self.large = true;
        self.large_threshold = threshold;
        self
    }

    /// Sets the stack group.
    pub fn with_stack(mut self, stack: impl Into<Cow<'static, str>>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Enables or disables animation.
    pub fn with_animation(mut self, animation: bool) -> Self {
        self.animation = animation;
        self
    }

    /// Enables or disables universal transitions.
    pub fn with_universal_transition(mut self, enabled: bool) -> Self {
        self.universal_transition = enabled;
        self
    }

    /// Returns the effective progressive threshold.
    ///
    /// Progressive rendering never activates below the large threshold.
    pub fn effective_progressive_threshold(&self) -> usize {
        self.progressive_threshold.max(self.large_threshold)
    }

    /// Returns whether the series asks for progressive rendering at all.
    pub fn is_progressive(&self) -> bool {
        self.progressive.is_some_and(|step| step > 0)
    }
}
