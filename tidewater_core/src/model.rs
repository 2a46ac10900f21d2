// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Series and global model.

use alloc::borrow::Cow;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashSet;

use crate::config::SeriesOptions;
use crate::data::{DataItem, SeriesData};
use crate::pipeline::PipelineContext;

/// Stable identity of a series across option updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesId(pub u64);

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "series#{}", self.0)
    }
}

/// The cause of an update, handed unchanged to every task of a tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    /// Action name (`"setOption"`, `"resize"`, `"appendData"`, ...).
    pub action: Cow<'static, str>,
    /// Series the action targets, if any.
    pub series: Option<SeriesId>,
}

impl Payload {
    /// Creates a payload for an action.
    pub fn new(action: impl Into<Cow<'static, str>>) -> Self {
        Self {
            action: action.into(),
            series: None,
        }
    }

    /// Targets a series.
    pub fn with_series(mut self, series: SeriesId) -> Self {
        self.series = Some(series);
        self
    }
}

/// One series: raw input, processed output and scheduling state.
#[derive(Clone, Debug)]
pub struct SeriesModel {
    /// Identity.
    pub id: SeriesId,
    /// Chart type name, matched by stage handlers (`"bar"`, `"boxplot"`, ...).
    pub series_type: Cow<'static, str>,
    /// Display name.
    pub name: Option<Cow<'static, str>>,
    /// Input data as supplied by the option.
    pub raw: SeriesData,
    /// Output data, rebuilt by the data task and decorated by the stages.
    pub data: SeriesData,
    /// Scheduling options.
    pub options: SeriesOptions,
    /// Stream flags published by the scheduler for the current tick.
    pub pipeline_context: PipelineContext,
    /// Disables progressive rendering regardless of the options.
    pub prevent_incremental: bool,
}

impl SeriesModel {
    /// Creates a series.
    pub fn new(id: SeriesId, series_type: impl Into<Cow<'static, str>>, raw: SeriesData) -> Self {
        let data = raw.clone_shallow();
        Self {
            id,
            series_type: series_type.into(),
            name: None,
            raw,
            data,
            options: SeriesOptions::default(),
            pipeline_context: PipelineContext::default(),
            prevent_incremental: false,
        }
    }

    /// Sets the options.
    pub fn with_options(mut self, options: SeriesOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the processed data.
    pub fn get_data(&self) -> &SeriesData {
        &self.data
    }

    /// Returns the progressive step, if any.
    pub fn progressive(&self) -> Option<usize> {
        self.options.progressive.filter(|step| *step > 0)
    }

    /// Returns the threshold from which progressive rendering applies.
    pub fn progressive_threshold(&self) -> usize {
        self.options.effective_progressive_threshold()
    }
}

/// All series of a chart in option order, plus visibility state.
#[derive(Clone, Debug, Default)]
pub struct GlobalModel {
    series: Vec<SeriesModel>,
    hidden: HashSet<SeriesId>,
    filtered: HashSet<SeriesId>,
    generation: u64,
}

impl GlobalModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the series list, bumping the option generation.
    ///
    /// Series keep their id; their previous processed data is discarded.
    pub fn set_series(&mut self, series: Vec<SeriesModel>) {
        self.series = series;
        let ids: HashSet<SeriesId> = self.series.iter().map(|s| s.id).collect();
        self.hidden.retain(|id| ids.contains(id));
        self.generation += 1;
    }

    /// Returns the option generation (incremented on every `set_series`).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Recomputes the filtered set from visibility.
    pub fn restore_data(&mut self) {
        self.filtered = self.hidden.clone();
    }

    /// Hides or shows a series. Takes effect on the next `restore_data`.
    pub fn set_series_hidden(&mut self, id: SeriesId, hidden: bool) {
        if hidden {
            self.hidden.insert(id);
        } else {
            self.hidden.remove(&id);
        }
    }

    /// Returns whether the series is excluded from processing in this tick.
    pub fn is_series_filtered(&self, id: SeriesId) -> bool {
        self.filtered.contains(&id)
    }

    /// Returns a series by id.
    pub fn series(&self, id: SeriesId) -> Option<&SeriesModel> {
        self.series.iter().find(|s| s.id == id)
    }

    /// Returns a series by id, mutably.
    pub fn series_mut(&mut self, id: SeriesId) -> Option<&mut SeriesModel> {
        self.series.iter_mut().find(|s| s.id == id)
    }

    /// Returns all series, including filtered ones.
    pub fn raw_series(&self) -> &[SeriesModel] {
        &self.series
    }

    /// Returns all series, including filtered ones, mutably.
    pub fn raw_series_mut(&mut self) -> &mut [SeriesModel] {
        &mut self.series
    }

    /// Returns the ids of all series in option order.
    pub fn raw_series_ids(&self) -> Vec<SeriesId> {
        self.series.iter().map(|s| s.id).collect()
    }

    /// Returns the ids of series that are not filtered.
    pub fn series_ids(&self) -> Vec<SeriesId> {
        self.series
            .iter()
            .filter(|s| !self.filtered.contains(&s.id))
            .map(|s| s.id)
            .collect()
    }

    /// Returns the ids of all series of a type, including filtered ones.
    pub fn raw_series_ids_by_type(&self, series_type: &str) -> Vec<SeriesId> {
        self.series
            .iter()
            .filter(|s| s.series_type == series_type)
            .map(|s| s.id)
            .collect()
    }

    /// Visits unfiltered series.
    pub fn each_series(&self, f: impl FnMut(&SeriesModel)) {
        self.series
            .iter()
            .filter(|s| !self.filtered.contains(&s.id))
            .for_each(f);
    }

    /// Visits unfiltered series of a type.
    pub fn each_series_by_type(&self, series_type: &str, f: impl FnMut(&SeriesModel)) {
        self.series
            .iter()
            .filter(|s| s.series_type == series_type && !self.filtered.contains(&s.id))
            .for_each(f);
    }

    /// Appends items to the raw data of a series. Returns `false` for an unknown series.
    pub fn append_data(&mut self, id: SeriesId, items: impl IntoIterator<Item = DataItem>) -> bool {
        match self.series_mut(id) {
            Some(series) => {
                series.raw.append(items);
                true
            }
            None => false,
        }
    }
}
