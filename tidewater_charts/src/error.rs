// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.

use thiserror::Error;
use tidewater_core::{SchedulerError, SeriesId};

/// Errors returned by [`Chart`](crate::Chart).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChartError {
    /// Scheduling or a stage handler failed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The series is not part of the current option.
    #[error("series {0} is not in the chart")]
    UnknownSeries(SeriesId),
}
