// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The resumable task primitive.
//!
//! A [`Task`] wraps a [`TaskRoutine`] and tracks how far it has progressed through the items
//! it is responsible for. Each [`Task::perform`] call may:
//! 1. ask the routine to `plan` (unless skipped),
//! 2. `reset` it when the task is dirty, when the plan asks for it, or when the chunking
//!    arithmetic changed,
//! 3. run `progress` over the next bounded range of items.
//!
//! Tasks never reference each other directly. Links (`upstream`, `downstream`, `agent`) are
//! ids into the owning [`TaskGraph`](crate::TaskGraph), and routines request side effects on
//! neighbours through [`TaskCx`]; the graph applies them after the call returns.

use alloc::boxed::Box;
use core::fmt;

use crate::error::SchedulerError;
use crate::model::{Payload, SeriesId};

/// Sentinel for an unbounded item range.
pub(crate) const UNBOUNDED: usize = usize::MAX;

/// Generational handle of a task in a [`TaskGraph`](crate::TaskGraph).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Arguments of one [`Task::perform`] call, computed by the scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerformArgs {
    /// Maximum number of items to progress; `None` runs to completion.
    pub step: Option<usize>,
    /// Chunk stride for mod chunking.
    pub mod_by: Option<usize>,
    /// Item count for mod chunking.
    pub mod_data_count: Option<usize>,
    /// Skips plan, reset and progress callbacks while still advancing bookkeeping.
    pub skip: bool,
}

impl PerformArgs {
    /// Arguments that run a task to completion.
    pub const BLOCKING: Self = Self {
        step: None,
        mod_by: None,
        mod_data_count: None,
        skip: false,
    };

    /// Arguments bounded to `step` items.
    pub fn step(step: usize) -> Self {
        Self {
            step: Some(step),
            ..Self::BLOCKING
        }
    }
}

/// Result of [`TaskRoutine::plan`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlanHint {
    /// Continue where the task left off.
    #[default]
    Keep,
    /// Discard progress and reset before progressing.
    Reset,
}

/// Result of [`TaskRoutine::reset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetOutcome {
    /// No per-item work until the next reset.
    Idle,
    /// Progress callbacks follow.
    Progress {
        /// Number of progress lanes; each range is handed to every lane in order.
        lanes: usize,
        /// Calls progress once even when the range is empty.
        force_first_progress: bool,
    },
}

impl ResetOutcome {
    /// One progress lane.
    pub const SINGLE: Self = Self::Progress {
        lanes: 1,
        force_first_progress: false,
    };

    /// `lanes` progress lanes; zero lanes is [`ResetOutcome::Idle`].
    pub fn lanes(lanes: usize) -> Self {
        if lanes == 0 {
            Self::Idle
        } else {
            Self::Progress {
                lanes,
                force_first_progress: false,
            }
        }
    }
}

/// The item range of one progress call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressParams {
    /// First index (inclusive).
    pub start: usize,
    /// Last index (exclusive).
    pub end: usize,
    /// `end - start`.
    pub count: usize,
    mod_by: usize,
    mod_data_count: usize,
}

impl ProgressParams {
    /// Creates sequential params for `[start, end)`.
    pub fn new(start: usize, end: usize) -> Self {
        Self::with_mod(start, end, None, None)
    }

    pub(crate) fn with_mod(
        start: usize,
        end: usize,
        mod_by: Option<usize>,
        mod_data_count: Option<usize>,
    ) -> Self {
        let end = end.max(start);
        Self {
            start,
            end,
            count: end - start,
            mod_by: mod_by.unwrap_or(1).max(1),
            mod_data_count: mod_data_count.unwrap_or(0),
        }
    }

    /// Returns whether indices are spread across the dataset.
    pub fn is_mod(&self) -> bool {
        self.mod_by > 1 && self.mod_data_count > 0
    }

    /// Iterates over the data indices covered by this call.
    ///
    /// Sequentially this is `start..end`. With mod chunking, position `i` maps to
    /// `(i % w) * mod_by + ceil(i / w)` with `w = ceil(mod_data_count / mod_by)`, so
    /// consecutive chunks interleave over the whole dataset. Positions that map past the data
    /// fall back to `i`.
    pub fn indices(&self) -> ProgressIndices {
        let window = if self.is_mod() {
            self.mod_data_count.div_ceil(self.mod_by)
        } else {
            0
        };
        ProgressIndices {
            current: self.start,
            end: self.end,
            mod_by: self.mod_by,
            mod_data_count: self.mod_data_count,
            window,
        }
    }
}

/// Iterator returned by [`ProgressParams::indices`].
#[derive(Clone, Debug)]
pub struct ProgressIndices {
    current: usize,
    end: usize,
    mod_by: usize,
    mod_data_count: usize,
    window: usize,
}

impl Iterator for ProgressIndices {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.current >= self.end {
            return None;
        }
        let i = self.current;
        self.current += 1;
        if self.window == 0 {
            return Some(i);
        }
        let index = (i % self.window) * self.mod_by + i.div_ceil(self.window);
        Some(if index < self.mod_data_count { index } else { i })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.end.saturating_sub(self.current);
        (n, Some(n))
    }
}

impl ExactSizeIterator for ProgressIndices {}

/// Side effects requested by a routine during one callback.
#[derive(Debug, Default)]
pub(crate) struct Signals {
    pub(crate) agent_dirty: bool,
    pub(crate) downstream_dirty: bool,
    pub(crate) output_end: Option<usize>,
}

/// What a routine sees while running.
#[derive(Debug)]
pub struct TaskCx<'a, E> {
    /// The embedder environment.
    pub env: &'a mut E,
    payload: Option<&'a Payload>,
    signals: &'a mut Signals,
}

impl<'a, E> TaskCx<'a, E> {
    pub(crate) fn new(
        env: &'a mut E,
        payload: Option<&'a Payload>,
        signals: &'a mut Signals,
    ) -> Self {
        Self {
            env,
            payload,
            signals,
        }
    }

    /// Returns the payload of the current tick.
    pub fn payload(&self) -> Option<&'a Payload> {
        self.payload
    }

    /// Marks the agent (overall task) of this task dirty.
    pub fn mark_agent_dirty(&mut self) {
        self.signals.agent_dirty = true;
    }

    /// Marks the downstream task dirty.
    pub fn mark_downstream_dirty(&mut self) {
        self.signals.downstream_dirty = true;
    }

    /// Pins how far downstream tasks may progress, independently of this task's own range.
    pub fn set_output_end(&mut self, end: usize) {
        self.signals.output_end = Some(end);
    }
}

/// Behaviour of a task.
pub trait TaskRoutine<E> {
    /// Pre-check run before reset/progress on every perform.
    fn plan(&mut self, cx: &mut TaskCx<'_, E>) -> PlanHint {
        let _ = cx;
        PlanHint::Keep
    }

    /// Starts a new generation of work.
    fn reset(&mut self, cx: &mut TaskCx<'_, E>) -> Result<ResetOutcome, SchedulerError>;

    /// Processes `params` on progress lane `lane`.
    fn progress(
        &mut self,
        lane: usize,
        params: ProgressParams,
        cx: &mut TaskCx<'_, E>,
    ) -> Result<(), SchedulerError> {
        let _ = (lane, params, cx);
        Ok(())
    }

    /// Number of items for head tasks; `None` is unbounded. Ignored when there is an upstream.
    fn count(&self, env: &E) -> Option<usize> {
        let _ = env;
        None
    }
}

/// Outcome of one [`Task::perform`] for the graph to act on.
#[derive(Debug, Default)]
pub(crate) struct PerformReport {
    pub(crate) unfinished: bool,
    pub(crate) reset: bool,
    pub(crate) agent_dirty: bool,
    pub(crate) downstream_dirty: bool,
}

/// A resumable unit of work.
pub struct Task<E> {
    routine: Box<dyn TaskRoutine<E>>,
    lanes: usize,
    dirty: bool,
    mod_by: usize,
    mod_data_count: usize,
    due_index: usize,
    due_end: usize,
    output_due_end: usize,
    explicit_output_end: Option<usize>,
    pub(crate) upstream: Option<TaskId>,
    pub(crate) downstream: Option<TaskId>,
    pub(crate) agent: Option<TaskId>,
    pub(crate) pipeline: Option<SeriesId>,
    pub(crate) idx_in_pipeline: usize,
    pub(crate) block: bool,
    pub(crate) payload: Option<Payload>,
}

impl<E> fmt::Debug for Task<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("dirty", &self.dirty)
            .field("due_index", &self.due_index)
            .field("due_end", &self.due_end)
            .field("output_due_end", &self.output_due_end)
            .field("upstream", &self.upstream)
            .field("downstream", &self.downstream)
            .field("agent", &self.agent)
            .field("pipeline", &self.pipeline)
            .field("idx_in_pipeline", &self.idx_in_pipeline)
            .field("block", &self.block)
            .finish_non_exhaustive()
    }
}

impl<E> Task<E> {
    /// Creates a dirty task around `routine`.
    pub fn new(routine: impl TaskRoutine<E> + 'static) -> Self {
        Self::from_box(Box::new(routine))
    }

    /// Creates a dirty task around a boxed routine.
    pub fn from_box(routine: Box<dyn TaskRoutine<E>>) -> Self {
        Self {
            routine,
            lanes: 0,
            dirty: true,
            mod_by: 1,
            mod_data_count: 0,
            due_index: 0,
            due_end: 0,
            output_due_end: 0,
            explicit_output_end: None,
            upstream: None,
            downstream: None,
            agent: None,
            pipeline: None,
            idx_in_pipeline: 0,
            block: false,
            payload: None,
        }
    }

    /// Replaces the routine, keeping identity and progress state.
    pub fn set_routine(&mut self, routine: Box<dyn TaskRoutine<E>>) {
        self.routine = routine;
    }

    /// Returns whether a reset is pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns whether the task has progress lanes with items left to process.
    pub fn unfinished(&self) -> bool {
        self.lanes > 0 && self.due_index < self.due_end
    }

    /// Returns the next index to process.
    pub fn due_index(&self) -> usize {
        self.due_index
    }

    /// Returns the end of the current range, `None` when unbounded.
    pub fn due_end(&self) -> Option<usize> {
        (self.due_end != UNBOUNDED).then_some(self.due_end)
    }

    /// Returns how far downstream tasks may progress, `None` when unbounded.
    pub fn output_due_end(&self) -> Option<usize> {
        (self.output_due_end != UNBOUNDED).then_some(self.output_due_end)
    }

    pub(crate) fn raw_output_due_end(&self) -> usize {
        self.output_due_end
    }

    /// Returns the upstream task.
    pub fn upstream(&self) -> Option<TaskId> {
        self.upstream
    }

    /// Returns the downstream task.
    pub fn downstream(&self) -> Option<TaskId> {
        self.downstream
    }

    /// Returns the overall task this stub reports to.
    pub fn agent(&self) -> Option<TaskId> {
        self.agent
    }

    /// Returns the pipeline this task is piped into.
    pub fn pipeline(&self) -> Option<SeriesId> {
        self.pipeline
    }

    /// Returns the position of this task in its pipeline.
    pub fn idx_in_pipeline(&self) -> usize {
        self.idx_in_pipeline
    }

    /// Returns whether this task cannot be stepped progressively.
    pub fn is_block(&self) -> bool {
        self.block
    }

    /// Returns the payload handed to the routine.
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Runs plan, reset and progress as needed.
    ///
    /// `upstream_end` is the upstream's raw output end, when there is an upstream.
    pub(crate) fn perform(
        &mut self,
        args: &PerformArgs,
        upstream_end: Option<usize>,
        env: &mut E,
    ) -> Result<PerformReport, SchedulerError> {
        let mut signals = Signals::default();
        let mut report = PerformReport::default();
        let skip = args.skip;

        let mut plan = PlanHint::Keep;
        if !skip {
            let mut cx = TaskCx::new(env, self.payload.as_ref(), &mut signals);
            plan = self.routine.plan(&mut cx);
        }

        let mod_by = args.mod_by.unwrap_or(1).max(1);
        let mod_data_count = args.mod_data_count.unwrap_or(0);
        if mod_by != self.mod_by || mod_data_count != self.mod_data_count {
            plan = PlanHint::Reset;
        }

        let mut force_first_progress = false;
        if self.dirty || plan == PlanHint::Reset {
            self.dirty = false;
            self.due_index = 0;
            self.due_end = 0;
            self.output_due_end = 0;
            self.explicit_output_end = None;
            self.lanes = 0;
            if !skip {
                let mut cx = TaskCx::new(env, self.payload.as_ref(), &mut signals);
                match self.routine.reset(&mut cx) {
                    Ok(ResetOutcome::Idle) => {}
                    Ok(ResetOutcome::Progress {
                        lanes,
                        force_first_progress: force,
                    }) => {
                        self.lanes = lanes;
                        force_first_progress = force;
                    }
                    Err(err) => {
                        self.dirty = true;
                        return Err(err);
                    }
                }
                if let Some(end) = signals.output_end.take() {
                    self.explicit_output_end = Some(end);
                }
            }
            report.reset = true;
        }
        self.mod_by = mod_by;
        self.mod_data_count = mod_data_count;

        self.due_end = match upstream_end {
            Some(end) => end,
            None => self.routine.count(env).unwrap_or(UNBOUNDED),
        };

        if self.lanes > 0 {
            let start = self.due_index;
            let end = match args.step {
                Some(step) => start.saturating_add(step).min(self.due_end),
                None => self.due_end,
            };
            if !skip && (force_first_progress || start < end) {
                let params = ProgressParams::with_mod(
                    start,
                    end,
                    Some(mod_by),
                    Some(mod_data_count),
                );
                for lane in 0..self.lanes {
                    let mut cx = TaskCx::new(env, self.payload.as_ref(), &mut signals);
                    self.routine.progress(lane, params, &mut cx)?;
                }
                if let Some(end) = signals.output_end.take() {
                    self.explicit_output_end = Some(end);
                }
            }
            self.due_index = end.max(start);
            self.output_due_end = self.explicit_output_end.unwrap_or(self.due_index);
        } else {
            let end = self.explicit_output_end.unwrap_or(self.due_end);
            self.due_index = end;
            self.output_due_end = end;
        }

        report.unfinished = self.unfinished();
        report.agent_dirty = signals.agent_dirty;
        report.downstream_dirty = signals.downstream_dirty;
        Ok(report)
    }
}
