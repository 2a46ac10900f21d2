// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compatibility shim for bare-function stage handlers.
//!
//! Handlers should declare their target series explicitly. Older handlers are plain functions
//! over the model that filter series themselves; [`wrap_legacy`] turns such a function into an
//! overall [`StageHandler`], using a single dry run against a [`RecordingModel`] to find out
//! which series type it iterates.

use alloc::borrow::Cow;
use alloc::string::String;

use crate::handler::StageHandler;
use crate::model::{GlobalModel, SeriesModel};
use crate::scheduler::StageEnv;

/// The model surface visible to legacy handlers.
pub trait ModelQuery {
    /// Visits unfiltered series of a type.
    fn each_series_by_type(&mut self, series_type: &str, f: &mut dyn FnMut(&mut SeriesModel));

    /// Visits components of `main_type` (and `sub_type`, when given).
    ///
    /// Series are the only component kind the model holds.
    fn each_component(
        &mut self,
        main_type: &str,
        sub_type: Option<&str>,
        f: &mut dyn FnMut(&mut SeriesModel),
    );

    /// Visits unfiltered series.
    fn each_series(&mut self, f: &mut dyn FnMut(&mut SeriesModel));
}

impl ModelQuery for GlobalModel {
    fn each_series_by_type(&mut self, series_type: &str, f: &mut dyn FnMut(&mut SeriesModel)) {
        let ids = self.series_ids();
        self.raw_series_mut()
            .iter_mut()
            .filter(|s| s.series_type == series_type && ids.contains(&s.id))
            .for_each(f);
    }

    fn each_component(
        &mut self,
        main_type: &str,
        sub_type: Option<&str>,
        f: &mut dyn FnMut(&mut SeriesModel),
    ) {
        if main_type != "series" {
            return;
        }
        match sub_type {
            Some(ty) => self.each_series_by_type(ty, f),
            None => self.each_series(f),
        }
    }

    fn each_series(&mut self, f: &mut dyn FnMut(&mut SeriesModel)) {
        let ids = self.series_ids();
        self.raw_series_mut()
            .iter_mut()
            .filter(|s| ids.contains(&s.id))
            .for_each(f);
    }
}

/// A [`ModelQuery`] that visits nothing and remembers the series type asked for.
#[derive(Clone, Debug, Default)]
pub struct RecordingModel {
    series_type: Option<String>,
}

impl RecordingModel {
    /// Returns the last series type a handler asked for.
    pub fn series_type(&self) -> Option<&str> {
        self.series_type.as_deref()
    }
}

impl ModelQuery for RecordingModel {
    fn each_series_by_type(&mut self, series_type: &str, _f: &mut dyn FnMut(&mut SeriesModel)) {
        self.series_type = Some(series_type.into());
    }

    fn each_component(
        &mut self,
        main_type: &str,
        sub_type: Option<&str>,
        _f: &mut dyn FnMut(&mut SeriesModel),
    ) {
        if let ("series", Some(ty)) = (main_type, sub_type) {
            self.series_type = Some(ty.into());
        }
    }

    fn each_series(&mut self, _f: &mut dyn FnMut(&mut SeriesModel)) {}
}

/// Runs `f` once against a [`RecordingModel`] and returns the series type it iterates.
pub fn detect_series_type(f: &dyn Fn(&mut dyn ModelQuery)) -> Option<String> {
    let mut recorder = RecordingModel::default();
    f(&mut recorder);
    recorder.series_type
}

/// Wraps a legacy function as an overall handler targeting the detected series type.
///
/// When no type is detected the handler gets stubs on every unfiltered series.
pub fn wrap_legacy<E: StageEnv + 'static>(
    name: impl Into<Cow<'static, str>>,
    f: impl Fn(&mut dyn ModelQuery) + 'static,
) -> StageHandler<E> {
    let series_type = detect_series_type(&f);
    let handler = StageHandler::overall_fn(name, move |env: &mut E, _payload| {
        f(env.model_mut());
        Ok(())
    });
    match series_type {
        Some(ty) => handler.with_series_type(ty),
        None => handler,
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;
    use crate::data::SeriesData;
    use crate::handler::SeriesTarget;
    use crate::model::SeriesId;

    fn visited_ids(query: &mut dyn ModelQuery, series_type: &str) -> Vec<SeriesId> {
        let mut ids = Vec::new();
        query.each_series_by_type(series_type, &mut |s| ids.push(s.id));
        ids
    }

    fn legacy_scale(query: &mut dyn ModelQuery) {
        query.each_series_by_type("line", &mut |series| {
            series.prevent_incremental = true;
        });
    }

    #[test]
    fn detects_by_type_iteration() {
        assert_eq!(detect_series_type(&legacy_scale).as_deref(), Some("line"));
    }

    #[test]
    fn detects_component_iteration() {
        let f = |q: &mut dyn ModelQuery| q.each_component("series", Some("pie"), &mut |_| {});
        assert_eq!(detect_series_type(&f).as_deref(), Some("pie"));
        let f = |q: &mut dyn ModelQuery| q.each_component("legend", Some("scroll"), &mut |_| {});
        assert_eq!(detect_series_type(&f), None);
    }

    #[test]
    fn wrapped_handler_targets_detected_type_and_runs() {
        let handler: StageHandler<GlobalModel> = wrap_legacy("scale", legacy_scale);
        assert!(handler.is_overall());
        assert!(matches!(handler.target(), Some(SeriesTarget::Type(ty)) if ty == "line"));

        let mut model = GlobalModel::new();
        model.set_series(vec![
            SeriesModel::new(SeriesId(1), "line", SeriesData::default()),
            SeriesModel::new(SeriesId(2), "bar", SeriesData::default()),
        ]);
        assert_eq!(visited_ids(&mut model, "line"), vec![SeriesId(1)]);
        let crate::handler::StageBody::Overall(stage) = handler.body() else {
            panic!("legacy handlers are overall handlers");
        };
        stage.overall_reset(&mut model, None).unwrap();
        assert!(model.series(SeriesId(1)).unwrap().prevent_incremental);
        assert!(!model.series(SeriesId(2)).unwrap().prevent_incremental);
    }
}
