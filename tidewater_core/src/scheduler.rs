// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The progressive scheduler.
//!
//! A [`Scheduler`] owns one [`Pipeline`] per series and every task piped into them. A typical
//! update runs these phases in order:
//!
//! 1. [`restore_pipelines`](Scheduler::restore_pipelines) rebuilds the pipeline map, seeding
//!    each pipeline with the data task of its series.
//! 2. [`prepare_stage_tasks`](Scheduler::prepare_stage_tasks) materializes (or reuses) a task
//!    per handler and series, or an overall task plus stubs, and pipes them.
//! 3. Views pipe their render task with [`prepare_view`](Scheduler::prepare_view), then
//!    [`plan`](Scheduler::plan) records each pipeline's blocking boundary.
//! 4. Each tick: [`perform_series_tasks`](Scheduler::perform_series_tasks),
//!    [`perform_data_processor_tasks`](Scheduler::perform_data_processor_tasks),
//!    [`update_stream_modes`](Scheduler::update_stream_modes) per series,
//!    [`perform_visual_tasks`](Scheduler::perform_visual_tasks), then the render tasks via
//!    [`perform_task`](Scheduler::perform_task).
//!
//! Work left over by bounded steps is reported through [`Scheduler::unfinished`]; the embedder
//! calls the tick phases again on the next frame while it is set.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::{HashMap, HashSet};
use tracing::{debug, trace, warn};

use crate::config::{ChunkMode, SchedulerConfig};
use crate::error::{SchedulerError, StageError};
use crate::graph::TaskGraph;
use crate::handler::{
    HandlerId, ItemStage, SeriesScope, SeriesTarget, StageBody, StageHandler, VisualKind,
};
use crate::model::{GlobalModel, Payload, SeriesId, SeriesModel};
use crate::pipeline::{Pipeline, PipelineContext};
use crate::task::{PerformArgs, PlanHint, ProgressParams, ResetOutcome, TaskCx, TaskId, TaskRoutine};

/// Access to the global model from a scheduler environment.
pub trait StageEnv {
    /// Returns the model.
    fn model(&self) -> &GlobalModel;
    /// Returns the model mutably.
    fn model_mut(&mut self) -> &mut GlobalModel;
}

impl StageEnv for GlobalModel {
    fn model(&self) -> &GlobalModel {
        self
    }

    fn model_mut(&mut self) -> &mut GlobalModel {
        self
    }
}

/// Options of [`Scheduler::perform_visual_tasks`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisualTaskOptions {
    /// Only run handlers of this kind.
    pub visual_type: Option<VisualKind>,
    /// Mark tasks dirty before performing them.
    pub set_dirty: bool,
    /// Restricts `set_dirty` to these series.
    pub dirty_series: Option<HashSet<SeriesId>>,
    /// Run everything to completion.
    pub block: bool,
}

impl VisualTaskOptions {
    /// Only runs handlers of `kind`.
    pub fn with_visual_type(mut self, kind: VisualKind) -> Self {
        self.visual_type = Some(kind);
        self
    }

    /// Dirties the tasks of every series before performing.
    pub fn with_dirty(mut self) -> Self {
        self.set_dirty = true;
        self
    }

    /// Dirties the tasks of `series` before performing.
    pub fn with_dirty_series(mut self, series: impl IntoIterator<Item = SeriesId>) -> Self {
        self.set_dirty = true;
        self.dirty_series = Some(series.into_iter().collect());
        self
    }

    /// Runs everything to completion.
    pub fn with_block(mut self) -> Self {
        self.block = true;
        self
    }

    fn needs_dirty(&self, series: SeriesId) -> bool {
        self.set_dirty && self.dirty_series.as_ref().is_none_or(|s| s.contains(&series))
    }
}

#[derive(Debug)]
struct OverallRecord {
    task: TaskId,
    stubs: Vec<(SeriesId, TaskId)>,
}

#[derive(Debug, Default)]
struct HandlerRecord {
    series_tasks: Vec<(SeriesId, TaskId)>,
    overall: Option<OverallRecord>,
}

struct HandlerEntry<E> {
    id: HandlerId,
    priority: i32,
    kind: Option<VisualKind>,
    handler: Rc<StageHandler<E>>,
    record: HandlerRecord,
}

impl<E> fmt::Debug for HandlerEntry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("id", &self.id)
            .field("name", self.handler.name())
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .field("record", &self.record)
            .finish()
    }
}

/// Drives stage handlers over per-series pipelines.
pub struct Scheduler<E> {
    config: SchedulerConfig,
    graph: TaskGraph<E>,
    pipelines: Vec<Pipeline>,
    data_processors: Vec<HandlerEntry<E>>,
    visuals: Vec<HandlerEntry<E>>,
    data_tasks: HashMap<SeriesId, TaskId>,
    next_handler: u32,
    unfinished: bool,
}

impl<E> fmt::Debug for Scheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("tasks", &self.graph.len())
            .field("pipelines", &self.pipelines)
            .field("data_processors", &self.data_processors)
            .field("visuals", &self.visuals)
            .field("unfinished", &self.unfinished)
            .finish_non_exhaustive()
    }
}

impl<E: StageEnv + 'static> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl<E: StageEnv + 'static> Scheduler<E> {
    /// Creates a scheduler.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            graph: TaskGraph::new(),
            pipelines: Vec::new(),
            data_processors: Vec::new(),
            visuals: Vec::new(),
            data_tasks: HashMap::new(),
            next_handler: 0,
            unfinished: false,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Registers a data processor. Lower priorities run first; ties keep registration order.
    pub fn register_data_processor(
        &mut self,
        priority: i32,
        handler: StageHandler<E>,
    ) -> Result<HandlerId, SchedulerError> {
        let entry = self.entry(priority, None, handler)?;
        Ok(insert_by_priority(&mut self.data_processors, entry))
    }

    /// Registers a layout or visual handler. Lower priorities run first; ties keep
    /// registration order.
    pub fn register_visual(
        &mut self,
        kind: VisualKind,
        priority: i32,
        handler: StageHandler<E>,
    ) -> Result<HandlerId, SchedulerError> {
        let entry = self.entry(priority, Some(kind), handler)?;
        Ok(insert_by_priority(&mut self.visuals, entry))
    }

    fn entry(
        &mut self,
        priority: i32,
        kind: Option<VisualKind>,
        handler: StageHandler<E>,
    ) -> Result<HandlerEntry<E>, SchedulerError> {
        if handler.is_overall() && matches!(handler.target(), Some(SeriesTarget::AllSeries)) {
            return Err(SchedulerError::OverallOnAllSeries(handler.name().clone()));
        }
        let id = HandlerId(self.next_handler);
        self.next_handler += 1;
        Ok(HandlerEntry {
            id,
            priority,
            kind,
            handler: Rc::new(handler),
            record: HandlerRecord::default(),
        })
    }

    /// Restores the model data for a new update.
    ///
    /// Every data task is dirtied so the pipelines rebuild their output from the raw data, and
    /// every overall task is dirtied so shared stages run again.
    pub fn restore_data(&mut self, env: &mut E) -> Result<(), SchedulerError> {
        env.model_mut().restore_data();
        for task in self.data_tasks.values() {
            self.graph.dirty(*task)?;
        }
        for entry in self.data_processors.iter().chain(self.visuals.iter()) {
            if let Some(overall) = &entry.record.overall {
                self.graph.dirty(overall.task)?;
            }
        }
        Ok(())
    }

    /// Rebuilds the pipeline of every series, each seeded with a dirty data task.
    ///
    /// Data tasks of series that left the model are disposed.
    pub fn restore_pipelines(&mut self, env: &E) -> Result<(), SchedulerError> {
        let model = env.model();
        let live: HashSet<SeriesId> = model.raw_series_ids().into_iter().collect();
        let graph = &mut self.graph;
        self.data_tasks.retain(|series, task| {
            let keep = live.contains(series);
            if !keep {
                graph.dispose(*task);
            }
            keep
        });

        self.pipelines.clear();
        for series in model.raw_series() {
            let progressive = series.progressive();
            let enabled = progressive.is_some() && !series.prevent_incremental;
            self.pipelines.push(Pipeline::new(
                series.id,
                progressive.unwrap_or(self.config.default_step),
                series.progressive_threshold(),
                enabled,
            ));

            let id = series.id;
            let task = *self
                .data_tasks
                .entry(id)
                .or_insert_with(|| self.graph.spawn(DataTaskRoutine { series: id }));
            self.graph.dirty(task)?;
            self.pipe(id, task)?;
        }
        debug!(
            pipelines = self.pipelines.len(),
            generation = model.generation(),
            "restored pipelines"
        );
        Ok(())
    }

    /// Creates or reuses the tasks of every registered handler and pipes them.
    pub fn prepare_stage_tasks(&mut self, env: &E) -> Result<(), SchedulerError> {
        let model = env.model();
        let Self {
            graph,
            pipelines,
            data_processors,
            visuals,
            ..
        } = self;
        for entry in data_processors.iter_mut().chain(visuals.iter_mut()) {
            match entry.handler.body() {
                StageBody::Series(_) => create_series_stage_tasks(entry, graph, pipelines, model)?,
                StageBody::Overall(_) => create_overall_stage_task(entry, graph, pipelines, model)?,
            }
        }
        Ok(())
    }

    /// Pipes the render task of a view into the pipeline of `series`.
    ///
    /// Views without incremental rendering make their render task blocking.
    pub fn prepare_view(
        &mut self,
        render_task: TaskId,
        series: SeriesId,
        supports_incremental: bool,
    ) -> Result<(), SchedulerError> {
        self.graph.set_block(render_task, !supports_incremental)?;
        self.pipe(series, render_task)
    }

    /// Records the blocking boundary of every pipeline.
    pub fn plan(&mut self) {
        for pipeline in &mut self.pipelines {
            pipeline.block_index = None;
            let mut cursor = pipeline.tail;
            while let Some(id) = cursor {
                let Some(task) = self.graph.get(id) else {
                    break;
                };
                if task.is_block() {
                    pipeline.block_index = Some(task.idx_in_pipeline());
                    break;
                }
                cursor = task.upstream();
            }
            trace!(series = %pipeline.id, block_index = ?pipeline.block_index, "planned pipeline");
        }
    }

    /// Computes the stream flags of a series for this tick and publishes them to the pipeline
    /// and the series model.
    pub fn update_stream_modes(
        &mut self,
        env: &mut E,
        series: SeriesId,
        view_supports_incremental: bool,
    ) -> Result<PipelineContext, SchedulerError> {
        let pipeline = self
            .pipelines
            .iter_mut()
            .find(|p| p.id == series)
            .ok_or(SchedulerError::MissingPipeline(series))?;
        let model = env
            .model_mut()
            .series_mut(series)
            .ok_or(SchedulerError::Stage(StageError::MissingSeries(series)))?;
        let len = model.data.count();
        let context = PipelineContext {
            progressive_render: pipeline.progressive_enabled
                && view_supports_incremental
                && len >= pipeline.threshold,
            large: model.options.large && len >= model.options.large_threshold,
            mod_data_count: (model.options.progressive_chunk_mode == ChunkMode::Mod).then_some(len),
        };
        if pipeline.context != Some(context) {
            debug!(%series, len, ?context, "stream mode changed");
        }
        pipeline.context = Some(context);
        model.pipeline_context = context;
        Ok(context)
    }

    /// Drains the data task of every unfiltered series.
    pub fn perform_series_tasks(&mut self, env: &mut E) -> Result<(), SchedulerError> {
        let mut unfinished = false;
        for series in env.model().series_ids() {
            let Some(&task) = self.data_tasks.get(&series) else {
                continue;
            };
            match self.graph.perform(task, &PerformArgs::BLOCKING, env) {
                Ok(more) => unfinished |= more,
                Err(err) => return Err(self.fail(err)),
            }
        }
        self.unfinished |= unfinished;
        Ok(())
    }

    /// Runs every data processor task to completion.
    pub fn perform_data_processor_tasks(
        &mut self,
        env: &mut E,
        payload: Option<&Payload>,
    ) -> Result<(), SchedulerError> {
        let opts = VisualTaskOptions::default().with_block();
        let result = perform_stage_tasks(
            &self.data_processors,
            &mut self.graph,
            &self.pipelines,
            env,
            payload,
            &opts,
        );
        self.absorb(result)
    }

    /// Runs layout and visual tasks, stepped where the pipeline allows it.
    pub fn perform_visual_tasks(
        &mut self,
        env: &mut E,
        payload: Option<&Payload>,
        opts: &VisualTaskOptions,
    ) -> Result<(), SchedulerError> {
        let result = perform_stage_tasks(
            &self.visuals,
            &mut self.graph,
            &self.pipelines,
            env,
            payload,
            opts,
        );
        self.absorb(result)
    }

    /// Performs one piped task (typically a render task) with its pipeline's arguments.
    pub fn perform_task(
        &mut self,
        task: TaskId,
        env: &mut E,
        payload: Option<&Payload>,
    ) -> Result<bool, SchedulerError> {
        let args = self.perform_args(task, false);
        self.graph.set_payload(task, payload.cloned())?;
        match self.graph.perform(task, &args, env) {
            Ok(more) => {
                self.unfinished |= more;
                Ok(more)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Returns the perform arguments of a piped task; tasks outside pipelines run blocking.
    pub fn perform_args(&self, task: TaskId, is_block: bool) -> PerformArgs {
        task_args(&self.graph, &self.pipelines, task, is_block)
    }

    /// Returns the pipeline of a series.
    pub fn pipeline(&self, series: SeriesId) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.id == series)
    }

    /// Returns all pipelines in series order.
    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    /// Returns the task graph.
    pub fn graph(&self) -> &TaskGraph<E> {
        &self.graph
    }

    /// Returns the task graph mutably.
    pub fn graph_mut(&mut self) -> &mut TaskGraph<E> {
        &mut self.graph
    }

    /// Returns the data task of a series.
    pub fn data_task(&self, series: SeriesId) -> Option<TaskId> {
        self.data_tasks.get(&series).copied()
    }

    /// Returns the task of a per-series handler for `series`.
    pub fn series_task(&self, handler: HandlerId, series: SeriesId) -> Option<TaskId> {
        let entry = self.find_entry(handler)?;
        lookup(&entry.record.series_tasks, series)
    }

    /// Returns the overall task of a shared handler.
    pub fn overall_task(&self, handler: HandlerId) -> Option<TaskId> {
        Some(self.find_entry(handler)?.record.overall.as_ref()?.task)
    }

    /// Returns the stub of a shared handler in the pipeline of `series`.
    pub fn stub_task(&self, handler: HandlerId, series: SeriesId) -> Option<TaskId> {
        let overall = self.find_entry(handler)?.record.overall.as_ref()?;
        lookup(&overall.stubs, series)
    }

    /// Returns whether any task reported remaining work since the flag was last cleared.
    pub fn unfinished(&self) -> bool {
        self.unfinished
    }

    /// Raises the unfinished flag, e.g. after raw data was appended.
    pub fn set_unfinished(&mut self) {
        self.unfinished = true;
    }

    /// Clears the unfinished flag at the start of a frame.
    pub fn clear_unfinished(&mut self) {
        self.unfinished = false;
    }

    fn find_entry(&self, handler: HandlerId) -> Option<&HandlerEntry<E>> {
        self.data_processors
            .iter()
            .chain(self.visuals.iter())
            .find(|e| e.id == handler)
    }

    fn pipe(&mut self, series: SeriesId, task: TaskId) -> Result<(), SchedulerError> {
        pipe_into(&mut self.pipelines, &mut self.graph, series, task)
    }

    fn absorb(&mut self, result: Result<bool, SchedulerError>) -> Result<(), SchedulerError> {
        match result {
            Ok(more) => {
                self.unfinished |= more;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Failed ticks leave the unfinished flag raised so the next frame retries.
    fn fail(&mut self, err: SchedulerError) -> SchedulerError {
        warn!(%err, "stage execution failed");
        self.unfinished = true;
        err
    }
}

fn insert_by_priority<E>(entries: &mut Vec<HandlerEntry<E>>, entry: HandlerEntry<E>) -> HandlerId {
    let id = entry.id;
    let at = entries.partition_point(|e| e.priority <= entry.priority);
    entries.insert(at, entry);
    id
}

fn lookup(tasks: &[(SeriesId, TaskId)], series: SeriesId) -> Option<TaskId> {
    tasks.iter().find(|(s, _)| *s == series).map(|(_, t)| *t)
}

fn pipe_into<E>(
    pipelines: &mut [Pipeline],
    graph: &mut TaskGraph<E>,
    series: SeriesId,
    task: TaskId,
) -> Result<(), SchedulerError> {
    let pipeline = pipelines
        .iter_mut()
        .find(|p| p.id == series)
        .ok_or(SchedulerError::MissingPipeline(series))?;
    if pipeline.head.is_none() {
        pipeline.head = Some(task);
    }
    if let Some(tail) = pipeline.tail {
        graph.pipe(tail, task)?;
    }
    pipeline.tail = Some(task);
    graph.set_pipeline_position(task, series, pipeline.count)?;
    pipeline.count += 1;
    Ok(())
}

fn task_args<E>(
    graph: &TaskGraph<E>,
    pipelines: &[Pipeline],
    task: TaskId,
    is_block: bool,
) -> PerformArgs {
    let Some(task) = graph.get(task) else {
        return PerformArgs::BLOCKING;
    };
    task.pipeline()
        .and_then(|series| pipelines.iter().find(|p| p.id == series))
        .map_or(PerformArgs::BLOCKING, |p| {
            p.perform_args(task.idx_in_pipeline(), is_block)
        })
}

fn target_series<E>(handler: &StageHandler<E>, model: &GlobalModel) -> Vec<SeriesId> {
    match handler.target() {
        Some(SeriesTarget::Type(ty)) => model.raw_series_ids_by_type(ty),
        Some(SeriesTarget::AllSeries) => model.raw_series_ids(),
        Some(SeriesTarget::Custom(f)) => f(model),
        None => Vec::new(),
    }
}

fn create_series_stage_tasks<E: StageEnv + 'static>(
    entry: &mut HandlerEntry<E>,
    graph: &mut TaskGraph<E>,
    pipelines: &mut [Pipeline],
    model: &GlobalModel,
) -> Result<(), SchedulerError> {
    let mut old: HashMap<SeriesId, TaskId> = entry.record.series_tasks.drain(..).collect();
    let clear_visual = entry.kind == Some(VisualKind::Visual);

    for series in target_series(&entry.handler, model) {
        if !pipelines.iter().any(|p| p.id == series) {
            warn!(handler = %entry.handler.name(), %series, "target series has no pipeline");
            continue;
        }
        let routine = SeriesTaskRoutine {
            handler: Rc::clone(&entry.handler),
            series,
            clear_visual,
            items: Vec::new(),
        };
        let task = match old.remove(&series) {
            Some(task) => {
                graph.set_routine(task, Box::new(routine))?;
                task
            }
            None => graph.spawn(routine),
        };
        pipe_into(pipelines, graph, series, task)?;
        entry.record.series_tasks.push((series, task));
    }

    for (series, task) in old {
        trace!(handler = %entry.handler.name(), %series, "disposing series task");
        graph.dispose(task);
    }
    Ok(())
}

fn create_overall_stage_task<E: StageEnv + 'static>(
    entry: &mut HandlerEntry<E>,
    graph: &mut TaskGraph<E>,
    pipelines: &mut [Pipeline],
    model: &GlobalModel,
) -> Result<(), SchedulerError> {
    let (targets, overall_progress) = match entry.handler.target() {
        Some(SeriesTarget::AllSeries) => {
            return Err(SchedulerError::OverallOnAllSeries(
                entry.handler.name().clone(),
            ));
        }
        Some(_) => (target_series(&entry.handler, model), true),
        None => (model.series_ids(), false),
    };

    let routine = OverallTaskRoutine {
        handler: Rc::clone(&entry.handler),
    };
    let (overall, mut old) = match entry.record.overall.take() {
        Some(record) => {
            graph.set_routine(record.task, Box::new(routine))?;
            let old: HashMap<SeriesId, TaskId> = record.stubs.into_iter().collect();
            (record.task, old)
        }
        None => (graph.spawn(routine), HashMap::new()),
    };

    let mut should_dirty = false;
    let mut stubs = Vec::with_capacity(targets.len());
    for series in targets {
        if !pipelines.iter().any(|p| p.id == series) {
            warn!(handler = %entry.handler.name(), %series, "target series has no pipeline");
            continue;
        }
        let stub = match old.remove(&series) {
            Some(stub) => {
                graph.set_routine(stub, Box::new(StubRoutine { overall_progress }))?;
                stub
            }
            None => {
                should_dirty = true;
                graph.spawn(StubRoutine { overall_progress })
            }
        };
        graph.set_agent(stub, Some(overall))?;
        graph.set_block(stub, overall_progress)?;
        pipe_into(pipelines, graph, series, stub)?;
        stubs.push((series, stub));
    }
    for (_, stub) in old {
        graph.dispose(stub);
    }
    if should_dirty {
        graph.dirty(overall)?;
    }
    entry.record.overall = Some(OverallRecord {
        task: overall,
        stubs,
    });
    Ok(())
}

fn perform_stage_tasks<E: StageEnv>(
    entries: &[HandlerEntry<E>],
    graph: &mut TaskGraph<E>,
    pipelines: &[Pipeline],
    env: &mut E,
    payload: Option<&Payload>,
    opts: &VisualTaskOptions,
) -> Result<bool, SchedulerError> {
    let mut unfinished = false;
    for entry in entries {
        if opts.visual_type.is_some() && opts.visual_type != entry.kind {
            continue;
        }
        let name = entry.handler.name();
        if let Some(overall) = &entry.record.overall {
            let mut overall_dirty = false;
            for &(series, stub) in &overall.stubs {
                if opts.needs_dirty(series) {
                    graph.dirty(stub)?;
                    overall_dirty = true;
                }
            }
            if overall_dirty {
                graph.dirty(overall.task)?;
            }
            graph.set_payload(overall.task, payload.cloned())?;
            let args = task_args(graph, pipelines, overall.task, opts.block);
            for &(_, stub) in &overall.stubs {
                graph
                    .perform(stub, &args, env)
                    .map_err(|e| e.in_handler(name))?;
            }
            unfinished |= graph
                .perform(overall.task, &args, env)
                .map_err(|e| e.in_handler(name))?;
        } else {
            for &(series, task) in &entry.record.series_tasks {
                if opts.needs_dirty(series) {
                    graph.dirty(task)?;
                }
                let mut args = task_args(graph, pipelines, task, opts.block);
                args.skip =
                    !entry.handler.runs_on_raw_series() && env.model().is_series_filtered(series);
                graph.set_payload(task, payload.cloned())?;
                unfinished |= graph
                    .perform(task, &args, env)
                    .map_err(|e| e.in_handler(name))?;
            }
        }
    }
    Ok(unfinished)
}

/// Head task of every pipeline: rebuilds the output data from the raw data.
struct DataTaskRoutine {
    series: SeriesId,
}

impl<E: StageEnv> TaskRoutine<E> for DataTaskRoutine {
    fn reset(&mut self, cx: &mut TaskCx<'_, E>) -> Result<ResetOutcome, SchedulerError> {
        let series = series_mut(cx.env, self.series)?;
        series.data = series.raw.clone_shallow();
        Ok(ResetOutcome::SINGLE)
    }

    fn progress(
        &mut self,
        _lane: usize,
        params: ProgressParams,
        cx: &mut TaskCx<'_, E>,
    ) -> Result<(), SchedulerError> {
        let SeriesModel { raw, data, .. } = series_mut(cx.env, self.series)?;
        if params.end > data.count() {
            data.sync_items(raw);
        }
        Ok(())
    }

    fn count(&self, env: &E) -> Option<usize> {
        env.model().series(self.series).map(|s| s.raw.count())
    }
}

/// Task of a per-series handler.
struct SeriesTaskRoutine<E> {
    handler: Rc<StageHandler<E>>,
    series: SeriesId,
    clear_visual: bool,
    items: Vec<ItemStage>,
}

impl<E: StageEnv> SeriesTaskRoutine<E> {
    fn stage_error(&self, err: StageError) -> SchedulerError {
        SchedulerError::Stage(err).in_handler(self.handler.name())
    }
}

impl<E: StageEnv> TaskRoutine<E> for SeriesTaskRoutine<E> {
    fn plan(&mut self, cx: &mut TaskCx<'_, E>) -> PlanHint {
        let StageBody::Series(stage) = self.handler.body() else {
            return PlanHint::Keep;
        };
        let env: &E = cx.env;
        let model = env.model();
        let Some(series) = model.series(self.series) else {
            return PlanHint::Keep;
        };
        stage.plan(&SeriesScope {
            env,
            model,
            series,
            payload: cx.payload(),
        })
    }

    fn reset(&mut self, cx: &mut TaskCx<'_, E>) -> Result<ResetOutcome, SchedulerError> {
        let StageBody::Series(stage) = self.handler.body() else {
            return Ok(ResetOutcome::Idle);
        };
        if self.clear_visual {
            series_mut(cx.env, self.series)?.data.clear_all_visual();
        }
        let env: &E = cx.env;
        let model = env.model();
        let series = model
            .series(self.series)
            .ok_or(StageError::MissingSeries(self.series))
            .map_err(|e| self.stage_error(e))?;
        let scope = SeriesScope {
            env,
            model,
            series,
            payload: cx.payload(),
        };
        self.items = stage.reset(&scope).map_err(|e| self.stage_error(e))?;
        Ok(ResetOutcome::lanes(self.items.len().max(1)))
    }

    fn progress(
        &mut self,
        lane: usize,
        params: ProgressParams,
        cx: &mut TaskCx<'_, E>,
    ) -> Result<(), SchedulerError> {
        let Some(item) = self.items.get_mut(lane) else {
            return Ok(());
        };
        let series = self.series;
        let data = &mut series_mut(cx.env, series)?.data;
        item.run(&params, data)
            .map_err(|e| SchedulerError::Stage(e).in_handler(self.handler.name()))
    }

    fn count(&self, env: &E) -> Option<usize> {
        env.model().series(self.series).map(|s| s.data.count())
    }
}

/// Shared task of an overall handler.
struct OverallTaskRoutine<E> {
    handler: Rc<StageHandler<E>>,
}

impl<E> TaskRoutine<E> for OverallTaskRoutine<E> {
    fn reset(&mut self, cx: &mut TaskCx<'_, E>) -> Result<ResetOutcome, SchedulerError> {
        if let StageBody::Overall(stage) = self.handler.body() {
            debug!(handler = %self.handler.name(), "overall reset");
            let payload = cx.payload();
            stage
                .overall_reset(cx.env, payload)
                .map_err(|e| SchedulerError::Stage(e).in_handler(self.handler.name()))?;
        }
        Ok(ResetOutcome::Idle)
    }
}

/// Per-series proxy of an overall task.
///
/// When `overall_progress` is set the stub blocks its pipeline and, whenever it progresses,
/// dirties its agent and its downstream, so downstream tasks rerun after the shared
/// computation.
struct StubRoutine {
    overall_progress: bool,
}

impl<E> TaskRoutine<E> for StubRoutine {
    fn reset(&mut self, _cx: &mut TaskCx<'_, E>) -> Result<ResetOutcome, SchedulerError> {
        Ok(if self.overall_progress {
            ResetOutcome::SINGLE
        } else {
            ResetOutcome::Idle
        })
    }

    fn progress(
        &mut self,
        _lane: usize,
        _params: ProgressParams,
        cx: &mut TaskCx<'_, E>,
    ) -> Result<(), SchedulerError> {
        cx.mark_agent_dirty();
        cx.mark_downstream_dirty();
        Ok(())
    }
}

fn series_mut<E: StageEnv>(env: &mut E, series: SeriesId) -> Result<&mut SeriesModel, StageError> {
    env.model_mut()
        .series_mut(series)
        .ok_or(StageError::MissingSeries(series))
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::vec;
    use core::cell::Cell;

    use super::*;
    use crate::config::SeriesOptions;
    use crate::data::{ItemVisual, SeriesData};

    fn series(id: u64, ty: &'static str, len: usize) -> SeriesModel {
        SeriesModel::new(
            SeriesId(id),
            ty,
            SeriesData::from_values((0..len).map(|i| i as f64)),
        )
    }

    fn model(series: Vec<SeriesModel>) -> GlobalModel {
        let mut model = GlobalModel::new();
        model.set_series(series);
        model
    }

    fn prepare(scheduler: &mut Scheduler<GlobalModel>, env: &mut GlobalModel) {
        scheduler.restore_pipelines(env).unwrap();
        scheduler.prepare_stage_tasks(env).unwrap();
        scheduler.plan();
        scheduler.restore_data(env).unwrap();
    }

    /// Records the ranges seen by a stepped visual handler.
    fn range_recorder(ranges: Rc<core::cell::RefCell<Vec<(usize, usize)>>>) -> StageHandler<GlobalModel> {
        StageHandler::series_fn("ranges", move |_scope| {
            let ranges = Rc::clone(&ranges);
            Ok(vec![ItemStage::progress(move |params, _data| {
                ranges.borrow_mut().push((params.start, params.end));
                Ok(())
            })])
        })
        .with_series_type("scatter")
    }

    #[test]
    fn progressive_visual_task_runs_in_steps() {
        let ranges = Rc::new(core::cell::RefCell::new(Vec::new()));
        let mut env = model(vec![
            series(1, "scatter", 10050).with_options(
                SeriesOptions::default()
                    .with_progressive(700)
                    .with_progressive_threshold(3000),
            ),
        ]);
        let mut scheduler = Scheduler::default();
        scheduler
            .register_visual(VisualKind::Layout, 0, range_recorder(Rc::clone(&ranges)))
            .unwrap();
        prepare(&mut scheduler, &mut env);

        let mut frames = 0;
        loop {
            scheduler.clear_unfinished();
            scheduler.perform_series_tasks(&mut env).unwrap();
            scheduler.perform_data_processor_tasks(&mut env, None).unwrap();
            let ctx = scheduler
                .update_stream_modes(&mut env, SeriesId(1), true)
                .unwrap();
            assert!(ctx.progressive_render);
            scheduler
                .perform_visual_tasks(&mut env, None, &VisualTaskOptions::default())
                .unwrap();
            frames += 1;
            if !scheduler.unfinished() {
                break;
            }
            assert!(frames < 100);
        }
        let ranges = ranges.borrow();
        assert_eq!(ranges.len(), 15);
        assert_eq!(ranges[0], (0, 700));
        assert_eq!(ranges[14], (9800, 10050));
        assert!(ranges.windows(2).all(|w| w[1].0 > w[0].0));
    }

    #[test]
    fn block_index_stops_stepping() {
        let ranges = Rc::new(core::cell::RefCell::new(Vec::new()));
        let mut env = model(vec![
            series(1, "scatter", 5000)
                .with_options(SeriesOptions::default().with_progressive(1000)),
        ]);
        let mut scheduler = Scheduler::default();
        let handler = scheduler
            .register_visual(VisualKind::Layout, 0, range_recorder(Rc::clone(&ranges)))
            .unwrap();
        scheduler.restore_pipelines(&env).unwrap();
        scheduler.prepare_stage_tasks(&env).unwrap();
        let render = scheduler.graph_mut().spawn(StubRoutine {
            overall_progress: false,
        });
        scheduler.prepare_view(render, SeriesId(1), false).unwrap();
        scheduler.plan();

        let pipeline = scheduler.pipeline(SeriesId(1)).unwrap();
        assert_eq!(pipeline.count, 3);
        assert_eq!(pipeline.block_index, Some(2));

        scheduler.restore_data(&mut env).unwrap();
        scheduler.perform_series_tasks(&mut env).unwrap();
        scheduler
            .update_stream_modes(&mut env, SeriesId(1), true)
            .unwrap();
        let task = scheduler.series_task(handler, SeriesId(1)).unwrap();
        assert_eq!(scheduler.perform_args(task, false).step, None);
        assert_eq!(scheduler.perform_args(render, false).step, None);
        scheduler
            .perform_visual_tasks(&mut env, None, &VisualTaskOptions::default())
            .unwrap();
        assert_eq!(*ranges.borrow(), vec![(0, 5000)]);
    }

    #[test]
    fn overall_runs_once_per_tick() {
        let resets = Rc::new(Cell::new(0));
        let counter = Rc::clone(&resets);
        let mut env = model(vec![
            series(1, "bar", 3),
            series(2, "bar", 3),
            series(3, "bar", 3),
        ]);
        let mut scheduler = Scheduler::default();
        let handler = scheduler
            .register_data_processor(
                0,
                StageHandler::overall_fn("stack", move |_env: &mut GlobalModel, _payload| {
                    counter.set(counter.get() + 1);
                    Ok(())
                })
                .with_series_type("bar"),
            )
            .unwrap();
        prepare(&mut scheduler, &mut env);
        scheduler.perform_series_tasks(&mut env).unwrap();
        scheduler
            .perform_data_processor_tasks(&mut env, None)
            .unwrap();
        assert_eq!(resets.get(), 1);

        // Nothing changed: the shared computation is not redone.
        scheduler
            .perform_data_processor_tasks(&mut env, None)
            .unwrap();
        assert_eq!(resets.get(), 1);

        // Two stubs dirtied in the same tick still yield a single recomputation.
        let stub1 = scheduler.stub_task(handler, SeriesId(1)).unwrap();
        let stub2 = scheduler.stub_task(handler, SeriesId(2)).unwrap();
        scheduler.graph_mut().dirty(stub1).unwrap();
        scheduler.graph_mut().dirty(stub2).unwrap();
        let agent = scheduler.overall_task(handler).unwrap();
        assert!(scheduler.graph().get(agent).unwrap().is_dirty());
        scheduler
            .perform_data_processor_tasks(&mut env, None)
            .unwrap();
        assert_eq!(resets.get(), 2);
    }

    #[test]
    fn stub_dirties_downstream_after_overall() {
        let mut env = model(vec![series(1, "bar", 4)]);
        let mut scheduler = Scheduler::default();
        let stack = scheduler
            .register_data_processor(
                0,
                StageHandler::overall_fn("stack", |_env: &mut GlobalModel, _payload| Ok(()))
                    .with_series_type("bar"),
            )
            .unwrap();
        let layout = scheduler
            .register_visual(
                VisualKind::Layout,
                0,
                StageHandler::series_fn("layout", |_scope| Ok(Vec::new())).with_series_type("bar"),
            )
            .unwrap();
        prepare(&mut scheduler, &mut env);
        scheduler.perform_series_tasks(&mut env).unwrap();
        scheduler
            .perform_data_processor_tasks(&mut env, None)
            .unwrap();
        let stub = scheduler.stub_task(stack, SeriesId(1)).unwrap();
        let layout_task = scheduler.series_task(layout, SeriesId(1)).unwrap();
        assert!(scheduler.graph().get(stub).unwrap().is_block());
        assert_eq!(scheduler.graph().downstream(stub), Some(layout_task));
        assert!(scheduler.graph().get(layout_task).unwrap().is_dirty());
    }

    #[test]
    fn tasks_are_reused_and_stale_ones_disposed() {
        let mut env = model(vec![series(1, "bar", 2), series(2, "bar", 2)]);
        let mut scheduler = Scheduler::default();
        let handler = scheduler
            .register_visual(
                VisualKind::Layout,
                0,
                StageHandler::series_fn("layout", |_scope| Ok(Vec::new())).with_series_type("bar"),
            )
            .unwrap();
        prepare(&mut scheduler, &mut env);
        let first = scheduler.series_task(handler, SeriesId(1)).unwrap();
        let second = scheduler.series_task(handler, SeriesId(2)).unwrap();
        let data2 = scheduler.data_task(SeriesId(2)).unwrap();

        env.set_series(vec![series(1, "bar", 3)]);
        prepare(&mut scheduler, &mut env);
        assert_eq!(scheduler.series_task(handler, SeriesId(1)), Some(first));
        assert_eq!(scheduler.series_task(handler, SeriesId(2)), None);
        assert!(!scheduler.graph().contains(second));
        assert!(!scheduler.graph().contains(data2));
        assert!(scheduler.pipeline(SeriesId(2)).is_none());
    }

    #[test]
    fn filtered_series_are_skipped_unless_raw() {
        let calls = Rc::new(Cell::new(0));
        let raw_calls = Rc::new(Cell::new(0));
        let (c, r) = (Rc::clone(&calls), Rc::clone(&raw_calls));
        let mut env = model(vec![series(1, "bar", 2)]);
        let mut scheduler = Scheduler::default();
        scheduler
            .register_visual(
                VisualKind::Visual,
                0,
                StageHandler::series_fn("normal", move |_scope| {
                    c.set(c.get() + 1);
                    Ok(Vec::new())
                })
                .with_series_type("bar"),
            )
            .unwrap();
        scheduler
            .register_visual(
                VisualKind::Visual,
                1,
                StageHandler::series_fn("raw", move |_scope| {
                    r.set(r.get() + 1);
                    Ok(Vec::new())
                })
                .with_series_type("bar")
                .perform_raw_series(),
            )
            .unwrap();
        env.set_series_hidden(SeriesId(1), true);
        prepare(&mut scheduler, &mut env);
        scheduler
            .perform_visual_tasks(&mut env, None, &VisualTaskOptions::default())
            .unwrap();
        assert_eq!(calls.get(), 0);
        assert_eq!(raw_calls.get(), 1);
    }

    #[test]
    fn visual_reset_clears_item_visuals() {
        let mut env = model(vec![series(1, "bar", 2)]);
        let mut scheduler = Scheduler::default();
        scheduler
            .register_visual(
                VisualKind::Visual,
                0,
                StageHandler::series_fn("noop", |_scope| Ok(Vec::new())).with_series_type("bar"),
            )
            .unwrap();
        prepare(&mut scheduler, &mut env);
        scheduler.perform_series_tasks(&mut env).unwrap();
        env.series_mut(SeriesId(1))
            .unwrap()
            .data
            .set_visual(0, ItemVisual::default());
        scheduler
            .perform_visual_tasks(&mut env, None, &VisualTaskOptions::default())
            .unwrap();
        assert!(env.series(SeriesId(1)).unwrap().data.visual(0).is_none());
    }

    #[test]
    fn handler_errors_fail_fast_and_keep_the_flag() {
        let mut env = model(vec![series(1, "bar", 2), series(2, "bar", 2)]);
        let mut scheduler = Scheduler::default();
        scheduler
            .register_visual(
                VisualKind::Layout,
                0,
                StageHandler::series_fn("broken", |scope| {
                    Err(StageError::InvalidData {
                        series: scope.series.id,
                        message: "negative width".into(),
                    })
                })
                .with_series_type("bar"),
            )
            .unwrap();
        prepare(&mut scheduler, &mut env);
        let err = scheduler
            .perform_visual_tasks(&mut env, None, &VisualTaskOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            SchedulerError::Handler {
                name: "broken".into(),
                source: StageError::InvalidData {
                    series: SeriesId(1),
                    message: "negative width".into(),
                },
            }
        );
        assert!(scheduler.unfinished());
    }

    #[test]
    fn overall_on_all_series_is_rejected() {
        let mut scheduler: Scheduler<GlobalModel> = Scheduler::default();
        let err = scheduler
            .register_data_processor(
                0,
                StageHandler::overall_fn("global", |_env: &mut GlobalModel, _payload| Ok(()))
                    .on_all_series(),
            )
            .unwrap_err();
        assert_eq!(err, SchedulerError::OverallOnAllSeries("global".into()));
    }

    #[test]
    fn priorities_order_handlers() {
        let order = Rc::new(core::cell::RefCell::new(Vec::new()));
        let mut env = model(vec![series(1, "bar", 1)]);
        let mut scheduler = Scheduler::default();
        for (name, priority) in [("late", 10), ("early", -5), ("mid", 0), ("mid2", 0)] {
            let order = Rc::clone(&order);
            scheduler
                .register_data_processor(
                    priority,
                    StageHandler::series_fn(name, move |_scope| {
                        order.borrow_mut().push(name);
                        Ok(Vec::new())
                    })
                    .with_series_type("bar"),
                )
                .unwrap();
        }
        prepare(&mut scheduler, &mut env);
        scheduler
            .perform_data_processor_tasks(&mut env, None)
            .unwrap();
        assert_eq!(*order.borrow(), ["early", "mid", "mid2", "late"]);
    }

    #[test]
    fn appended_data_is_synced_by_the_data_task() {
        let mut env = model(vec![series(1, "bar", 2)]);
        let mut scheduler = Scheduler::default();
        prepare(&mut scheduler, &mut env);
        scheduler.perform_series_tasks(&mut env).unwrap();
        assert_eq!(env.series(SeriesId(1)).unwrap().data.count(), 2);

        env.append_data(SeriesId(1), [crate::data::DataItem::value(5.0)]);
        scheduler.perform_series_tasks(&mut env).unwrap();
        assert_eq!(env.series(SeriesId(1)).unwrap().data.count(), 3);
    }

    #[test]
    fn restore_data_rebuilds_output_data() {
        let mut env = model(vec![series(1, "bar", 2)]);
        let mut scheduler = Scheduler::default();
        prepare(&mut scheduler, &mut env);
        scheduler.perform_series_tasks(&mut env).unwrap();
        let data = scheduler.data_task(SeriesId(1)).unwrap();
        assert!(!scheduler.graph().get(data).unwrap().is_dirty());
        env.series_mut(SeriesId(1))
            .unwrap()
            .data
            .set_stack_base(0, 4.0);

        scheduler.restore_data(&mut env).unwrap();
        assert!(scheduler.graph().get(data).unwrap().is_dirty());
        scheduler.perform_series_tasks(&mut env).unwrap();
        assert_eq!(env.series(SeriesId(1)).unwrap().data.stack_base(0), 0.0);
    }

    #[test]
    fn mod_chunk_mode_publishes_data_count() {
        let mut env = model(vec![
            series(1, "bar", 10).with_options(SeriesOptions::default().with_chunk_mode(ChunkMode::Mod)),
        ]);
        let mut scheduler = Scheduler::default();
        prepare(&mut scheduler, &mut env);
        scheduler.perform_series_tasks(&mut env).unwrap();
        let ctx = scheduler
            .update_stream_modes(&mut env, SeriesId(1), true)
            .unwrap();
        assert_eq!(ctx.mod_data_count, Some(10));
        assert!(!ctx.progressive_render);
        assert_eq!(env.series(SeriesId(1)).unwrap().pipeline_context, ctx);
    }
}
