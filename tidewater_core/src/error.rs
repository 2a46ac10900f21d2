// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.

use alloc::borrow::Cow;
use alloc::string::String;

use thiserror::Error;

use crate::model::SeriesId;
use crate::task::TaskId;

/// A fault raised by a stage handler or task routine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The routine refers to a series that is no longer in the model.
    #[error("series {0} is not in the model")]
    MissingSeries(SeriesId),
    /// A handler rejected the data of a series.
    #[error("series {series}: {message}")]
    InvalidData {
        /// Offending series.
        series: SeriesId,
        /// Human readable reason.
        message: String,
    },
    /// Any other handler fault.
    #[error("{0}")]
    Other(String),
}

impl StageError {
    /// Creates a free-form stage error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Errors returned by the [`Scheduler`](crate::Scheduler) and [`TaskGraph`](crate::TaskGraph).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The task id is stale (disposed) or was never issued by this graph.
    #[error("unknown task {0:?}")]
    UnknownTask(TaskId),
    /// No pipeline exists for the series; `restore_pipelines` has not seen it.
    #[error("no pipeline for series {0}")]
    MissingPipeline(SeriesId),
    /// Overall handlers cannot be created on every series; that would block all streams.
    #[error("stage handler `{0}` combines an overall body with an all-series target")]
    OverallOnAllSeries(Cow<'static, str>),
    /// A task routine failed outside of any registered handler (data or render tasks).
    #[error(transparent)]
    Stage(#[from] StageError),
    /// A registered handler failed.
    #[error("stage handler `{name}` failed: {source}")]
    Handler {
        /// Handler name.
        name: Cow<'static, str>,
        /// Underlying fault.
        #[source]
        source: StageError,
    },
}

impl SchedulerError {
    /// Attributes a bare stage fault to the named handler.
    pub(crate) fn in_handler(self, name: &Cow<'static, str>) -> Self {
        match self {
            Self::Stage(source) => Self::Handler {
                name: name.clone(),
                source,
            },
            other => other,
        }
    }
}
