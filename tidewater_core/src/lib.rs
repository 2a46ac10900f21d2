// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Progressive scheduling core for Tidewater charts.
//!
//! This crate owns the machinery that turns a chart option update into work:
//! - **Tasks** are resumable units with `plan`/`reset`/`progress` phases, living in a
//!   [`TaskGraph`] arena and linked into per-series chains.
//! - **Pipelines** are those chains, one per series, from data ingestion to rendering.
//! - The **[`Scheduler`]** materializes tasks for every registered [`StageHandler`], decides
//!   which tasks may run in bounded steps, drives them and reports unfinished work so the
//!   embedding frame loop can continue on the next frame.
//! - **[`DataDiffer`]** reconciles old and new keyed item sequences into an edit script used by
//!   chart views to reuse graphical elements.
//!
//! Painting, layout geometry and animation live in `tidewater_charts`; this crate only knows
//! about element handles ([`ElementId`]) bound to data items.

#![no_std]

extern crate alloc;

mod config;
mod data;
mod differ;
mod error;
mod graph;
mod handler;
mod legacy;
mod model;
mod pipeline;
mod scheduler;
mod task;

pub use config::{ChunkMode, DEFAULT_PROGRESSIVE_STEP, SchedulerConfig, SeriesOptions};
pub use data::{DataItem, ElementId, ItemLayout, ItemVisual, SectorLayout, SeriesData};
pub use differ::{DataDiffer, DiffMode, DiffOp, DiffVisitor, resolve_many_to_many};
pub use error::{SchedulerError, StageError};
pub use graph::TaskGraph;
pub use handler::{
    HandlerId, ItemStage, OverallStage, SeriesScope, SeriesStage, SeriesTarget, StageBody,
    StageHandler, VisualKind,
};
pub use legacy::{ModelQuery, RecordingModel, detect_series_type, wrap_legacy};
pub use model::{GlobalModel, Payload, SeriesId, SeriesModel};
pub use pipeline::{Pipeline, PipelineContext};
pub use scheduler::{Scheduler, StageEnv, VisualTaskOptions};
pub use task::{
    PerformArgs, PlanHint, ProgressIndices, ProgressParams, ResetOutcome, Task, TaskCx, TaskId,
    TaskRoutine,
};
