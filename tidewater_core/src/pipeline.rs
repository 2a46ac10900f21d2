// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-series task chains.

use crate::model::SeriesId;
use crate::task::{PerformArgs, TaskId};

/// Stream flags computed for one series and one tick.
///
/// Published to the series model so layouts and views can switch between per-item elements and
/// batched rendering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineContext {
    /// The view renders this series in progressive chunks.
    pub progressive_render: bool,
    /// The series is drawn in large (batched) mode.
    pub large: bool,
    /// Item count for mod chunking, when enabled.
    pub mod_data_count: Option<usize>,
}

/// The ordered chain of tasks of one series, from data ingestion to rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pipeline {
    /// Series id.
    pub id: SeriesId,
    /// First task (the data task).
    pub head: Option<TaskId>,
    /// Last piped task.
    pub tail: Option<TaskId>,
    /// Item count from which progressive rendering activates.
    pub threshold: usize,
    /// The series opted into progressive rendering and did not prevent it.
    pub progressive_enabled: bool,
    /// Position of the last blocking task, if any.
    pub block_index: Option<usize>,
    /// Items per progressive step.
    pub step: usize,
    /// Number of tasks piped so far.
    pub count: usize,
    /// Flags for the current tick, set by `update_stream_modes`.
    pub context: Option<PipelineContext>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new(id: SeriesId, step: usize, threshold: usize, progressive_enabled: bool) -> Self {
        Self {
            id,
            head: None,
            tail: None,
            threshold,
            progressive_enabled,
            block_index: None,
            step: step.max(1),
            count: 0,
            context: None,
        }
    }

    /// Computes the perform arguments of the task at `idx`.
    ///
    /// A task is stepped only when the pipeline renders progressively in this tick and the
    /// task sits after the blocking boundary. `is_block` forces completion.
    pub fn perform_args(&self, idx: usize, is_block: bool) -> PerformArgs {
        let ctx = self.context;
        let incremental = !is_block
            && self.progressive_enabled
            && ctx.is_none_or(|ctx| ctx.progressive_render)
            && self.block_index.is_none_or(|block| idx > block);
        let step = incremental.then_some(self.step);
        let mod_data_count = ctx.and_then(|ctx| ctx.mod_data_count);
        let mod_by = step.and_then(|step| mod_data_count.map(|count| count.div_ceil(step)));
        PerformArgs {
            step,
            mod_by,
            mod_data_count,
            skip: false,
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    fn pipeline() -> Pipeline {
        let mut p = Pipeline::new(SeriesId(1), 700, 3000, true);
        p.context = Some(PipelineContext {
            progressive_render: true,
            large: false,
            mod_data_count: None,
        });
        p
    }

    #[test]
    fn tasks_after_the_block_are_stepped() {
        let mut p = pipeline();
        p.block_index = Some(2);
        assert_eq!(p.perform_args(1, false).step, None);
        assert_eq!(p.perform_args(2, false).step, None);
        assert_eq!(p.perform_args(3, false).step, Some(700));
        assert_eq!(p.perform_args(3, true).step, None);
    }

    #[test]
    fn no_step_without_progressive_render() {
        let mut p = pipeline();
        p.context = Some(PipelineContext::default());
        assert_eq!(p.perform_args(0, false), PerformArgs::BLOCKING);

        let mut p = pipeline();
        p.progressive_enabled = false;
        assert_eq!(p.perform_args(0, false).step, None);
    }

    #[test]
    fn mod_chunking_divides_by_step() {
        let mut p = pipeline();
        p.context = Some(PipelineContext {
            progressive_render: true,
            large: false,
            mod_data_count: Some(10050),
        });
        let args = p.perform_args(0, false);
        assert_eq!(args.mod_by, Some(15));
        assert_eq!(args.mod_data_count, Some(10050));
    }
}
