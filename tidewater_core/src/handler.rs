// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stage handlers: registered units of data processing, layout or visual encoding.

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::data::SeriesData;
use crate::error::StageError;
use crate::model::{GlobalModel, Payload, SeriesId, SeriesModel};
use crate::task::{PlanHint, ProgressParams};

/// Identity of a registered handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(pub(crate) u32);

/// Sub-phase of a visual handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VisualKind {
    /// Computes item geometry.
    Layout,
    /// Computes item visuals (colors, opacity). Item visuals are cleared on reset.
    Visual,
}

/// Which series a handler creates tasks for.
pub enum SeriesTarget {
    /// Series of one type.
    Type(Cow<'static, str>),
    /// Every series, including filtered ones.
    AllSeries,
    /// Series chosen by a function of the model.
    Custom(Box<dyn Fn(&GlobalModel) -> Vec<SeriesId>>),
}

impl fmt::Debug for SeriesTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(ty) => f.debug_tuple("Type").field(ty).finish(),
            Self::AllSeries => f.write_str("AllSeries"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// What a series stage sees when planning or resetting.
#[derive(Debug)]
pub struct SeriesScope<'a, E> {
    /// The environment.
    pub env: &'a E,
    /// The global model.
    pub model: &'a GlobalModel,
    /// The series the task belongs to.
    pub series: &'a SeriesModel,
    /// The payload of the current tick.
    pub payload: Option<&'a Payload>,
}

/// Per-item work returned by [`SeriesStage::reset`].
pub enum ItemStage {
    /// Called once per data index of each progressed range, following mod chunking.
    DataEach(Box<dyn FnMut(&mut SeriesData, usize)>),
    /// Called once per progressed range.
    Progress(Box<dyn FnMut(&ProgressParams, &mut SeriesData) -> Result<(), StageError>>),
}

impl ItemStage {
    /// Wraps a per-index function.
    pub fn data_each(f: impl FnMut(&mut SeriesData, usize) + 'static) -> Self {
        Self::DataEach(Box::new(f))
    }

    /// Wraps a per-range function.
    pub fn progress(
        f: impl FnMut(&ProgressParams, &mut SeriesData) -> Result<(), StageError> + 'static,
    ) -> Self {
        Self::Progress(Box::new(f))
    }

    pub(crate) fn run(
        &mut self,
        params: &ProgressParams,
        data: &mut SeriesData,
    ) -> Result<(), StageError> {
        match self {
            Self::DataEach(f) => {
                for i in params.indices() {
                    f(data, i);
                }
                Ok(())
            }
            Self::Progress(f) => f(params, data),
        }
    }
}

impl fmt::Debug for ItemStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataEach(_) => f.write_str("DataEach(..)"),
            Self::Progress(_) => f.write_str("Progress(..)"),
        }
    }
}

/// A stage that runs once per series.
pub trait SeriesStage<E> {
    /// Decides whether the series task must reset in this tick.
    fn plan(&self, scope: &SeriesScope<'_, E>) -> PlanHint {
        let _ = scope;
        PlanHint::Keep
    }

    /// Prepares the per-item work for a new generation.
    fn reset(&self, scope: &SeriesScope<'_, E>) -> Result<Vec<ItemStage>, StageError>;
}

/// A stage computed once across all its series.
pub trait OverallStage<E> {
    /// Runs the shared computation.
    fn overall_reset(&self, env: &mut E, payload: Option<&Payload>) -> Result<(), StageError>;
}

struct SeriesFn<F>(F);

impl<E, F> SeriesStage<E> for SeriesFn<F>
where
    F: Fn(&SeriesScope<'_, E>) -> Result<Vec<ItemStage>, StageError>,
{
    fn reset(&self, scope: &SeriesScope<'_, E>) -> Result<Vec<ItemStage>, StageError> {
        (self.0)(scope)
    }
}

struct OverallFn<F>(F);

impl<E, F> OverallStage<E> for OverallFn<F>
where
    F: Fn(&mut E, Option<&Payload>) -> Result<(), StageError>,
{
    fn overall_reset(&self, env: &mut E, payload: Option<&Payload>) -> Result<(), StageError> {
        (self.0)(env, payload)
    }
}

/// The work of a handler: per series, or shared.
pub enum StageBody<E> {
    /// One task per target series.
    Series(Box<dyn SeriesStage<E>>),
    /// One shared task plus a stub in each target series pipeline.
    Overall(Box<dyn OverallStage<E>>),
}

impl<E> fmt::Debug for StageBody<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Series(_) => f.write_str("Series(..)"),
            Self::Overall(_) => f.write_str("Overall(..)"),
        }
    }
}

/// A registered unit of data processing or visual computation.
///
/// ```
/// use tidewater_core::{ItemStage, StageHandler};
/// # struct Env;
///
/// let handler: StageHandler<Env> = StageHandler::series_fn("double", |_scope| {
///     Ok(vec![ItemStage::data_each(|data, i| {
///         let _ = data.value(i).map(|v| v * 2.0);
///     })])
/// })
/// .with_series_type("bar");
/// assert!(!handler.is_overall());
/// ```
#[derive(Debug)]
pub struct StageHandler<E> {
    name: Cow<'static, str>,
    target: Option<SeriesTarget>,
    perform_raw_series: bool,
    body: StageBody<E>,
}

impl<E: 'static> StageHandler<E> {
    /// Creates a per-series handler.
    pub fn series(name: impl Into<Cow<'static, str>>, stage: impl SeriesStage<E> + 'static) -> Self {
        Self::with_body(name, StageBody::Series(Box::new(stage)))
    }

    /// Creates a shared handler.
    pub fn overall(
        name: impl Into<Cow<'static, str>>,
        stage: impl OverallStage<E> + 'static,
    ) -> Self {
        Self::with_body(name, StageBody::Overall(Box::new(stage)))
    }

    /// Creates a per-series handler from its reset function.
    pub fn series_fn(
        name: impl Into<Cow<'static, str>>,
        reset: impl Fn(&SeriesScope<'_, E>) -> Result<Vec<ItemStage>, StageError> + 'static,
    ) -> Self {
        Self::series(name, SeriesFn(reset))
    }

    /// Creates a shared handler from its reset function.
    pub fn overall_fn(
        name: impl Into<Cow<'static, str>>,
        reset: impl Fn(&mut E, Option<&Payload>) -> Result<(), StageError> + 'static,
    ) -> Self {
        Self::overall(name, OverallFn(reset))
    }

    fn with_body(name: impl Into<Cow<'static, str>>, body: StageBody<E>) -> Self {
        Self {
            name: name.into(),
            target: None,
            perform_raw_series: false,
            body,
        }
    }
}

impl<E> StageHandler<E> {
    /// Targets series of one type.
    pub fn with_series_type(mut self, series_type: impl Into<Cow<'static, str>>) -> Self {
        self.target = Some(SeriesTarget::Type(series_type.into()));
        self
    }

    /// Targets every series.
    pub fn on_all_series(mut self) -> Self {
        self.target = Some(SeriesTarget::AllSeries);
        self
    }

    /// Targets series chosen by `f`.
    pub fn with_target_series(mut self, f: impl Fn(&GlobalModel) -> Vec<SeriesId> + 'static) -> Self {
        self.target = Some(SeriesTarget::Custom(Box::new(f)));
        self
    }

    /// Keeps running the handler for filtered series.
    pub fn perform_raw_series(mut self) -> Self {
        self.perform_raw_series = true;
        self
    }

    /// Returns the handler name.
    pub fn name(&self) -> &Cow<'static, str> {
        &self.name
    }

    /// Returns the target.
    pub fn target(&self) -> Option<&SeriesTarget> {
        self.target.as_ref()
    }

    /// Returns the body.
    pub fn body(&self) -> &StageBody<E> {
        &self.body
    }

    /// Returns whether the handler is shared across series.
    pub fn is_overall(&self) -> bool {
        matches!(self.body, StageBody::Overall(_))
    }

    /// Returns whether the handler runs for filtered series.
    pub fn runs_on_raw_series(&self) -> bool {
        self.perform_raw_series
    }
}
