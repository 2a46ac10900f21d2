// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The chart driver.
//!
//! A [`Chart`] ties the scheduler to the views. [`Chart::set_option`] replaces the series,
//! rebuilds the pipelines and creates or disposes views; [`Chart::update`] runs one full tick;
//! [`Chart::frame`] continues unfinished progressive work and advances animations. The embedder
//! calls `frame` once per display frame while it returns `true`.

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::format;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;
use kurbo::Rect;
use tidewater_core::{
    GlobalModel, Payload, PlanHint, ProgressParams, ResetOutcome, Scheduler, SchedulerConfig,
    SchedulerError, SeriesId, SeriesModel, StageEnv, StageError, TaskCx, TaskId, TaskRoutine,
    VisualTaskOptions,
};
use tracing::{debug, warn};

use crate::animation::AnimationConfig;
use crate::bar_view::BarView;
use crate::boxplot_view::BoxplotView;
use crate::error::ChartError;
use crate::morph::DivideShape;
use crate::pictorial_view::PictorialBarView;
use crate::scene::Scene;
use crate::stages::register_builtin_stages;
use crate::sunburst_view::SunburstView;
use crate::transition::{TransitionItem, apply_transition, collect_items};
use crate::view::{ChartView, ViewCx, ViewFactory, series_animation};

/// A live view and its render task.
#[derive(Debug)]
struct ViewSlot {
    view: Box<dyn ChartView>,
    render_task: TaskId,
    series_type: Cow<'static, str>,
    hidden: bool,
}

/// Everything tasks of a chart can reach: the model, the views and the scene.
#[derive(Debug)]
pub struct ChartEnv {
    model: GlobalModel,
    scene: Scene,
    viewport: Rect,
    animation: AnimationConfig,
    views: HashMap<SeriesId, ViewSlot>,
}

impl ChartEnv {
    fn new(viewport: Rect) -> Self {
        Self {
            model: GlobalModel::new(),
            scene: Scene::new(),
            viewport,
            animation: AnimationConfig::default(),
            views: HashMap::new(),
        }
    }

    /// Returns the area series are laid out in.
    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    /// Returns the scene.
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Returns the default update animation.
    pub fn animation(&self) -> &AnimationConfig {
        &self.animation
    }

    fn with_view(
        &mut self,
        id: SeriesId,
        payload: Option<&Payload>,
        f: impl FnOnce(&mut dyn ChartView, &mut ViewCx<'_>),
    ) -> Result<(), SchedulerError> {
        let Self {
            model,
            scene,
            animation,
            views,
            ..
        } = self;
        let slot = views
            .get_mut(&id)
            .ok_or_else(|| StageError::other(format!("series {id} has no view")))?;
        let series = model
            .series_mut(id)
            .ok_or(StageError::MissingSeries(id))?;
        let animation = series_animation(series, animation);
        let mut cx = ViewCx {
            series,
            scene,
            payload,
            animation,
        };
        f(slot.view.as_mut(), &mut cx);
        Ok(())
    }
}

impl StageEnv for ChartEnv {
    fn model(&self) -> &GlobalModel {
        &self.model
    }

    fn model_mut(&mut self) -> &mut GlobalModel {
        &mut self.model
    }
}

/// Render task of one view.
///
/// Resets whenever the series switches between large or progressive rendering and per-item
/// rendering. A progressive reset prepares the view and renders chunk by chunk; otherwise the
/// whole series is rendered once per reset.
#[derive(Debug)]
struct RenderRoutine {
    series: SeriesId,
    large: bool,
    progressive: bool,
}

impl TaskRoutine<ChartEnv> for RenderRoutine {
    fn plan(&mut self, cx: &mut TaskCx<'_, ChartEnv>) -> PlanHint {
        let Some(series) = cx.env.model.series(self.series) else {
            return PlanHint::Keep;
        };
        let ctx = series.pipeline_context;
        let changed = ctx.large != self.large || ctx.progressive_render != self.progressive;
        self.large = ctx.large;
        self.progressive = ctx.progressive_render;
        if changed {
            debug!(series = %self.series, large = self.large, progressive = self.progressive, "render mode changed");
            PlanHint::Reset
        } else {
            PlanHint::Keep
        }
    }

    fn reset(&mut self, cx: &mut TaskCx<'_, ChartEnv>) -> Result<ResetOutcome, SchedulerError> {
        if !self.progressive {
            return Ok(ResetOutcome::Progress {
                lanes: 1,
                force_first_progress: true,
            });
        }
        let payload = cx.payload();
        cx.env
            .with_view(self.series, payload, |view, vcx| view.incremental_prepare_render(vcx))?;
        Ok(ResetOutcome::SINGLE)
    }

    fn progress(
        &mut self,
        _lane: usize,
        params: ProgressParams,
        cx: &mut TaskCx<'_, ChartEnv>,
    ) -> Result<(), SchedulerError> {
        let payload = cx.payload();
        let progressive = self.progressive;
        cx.env.with_view(self.series, payload, |view, vcx| {
            if progressive {
                view.incremental_render(&params, vcx);
            } else {
                view.render(vcx);
            }
        })
    }
}

/// A chart: series model, scheduler, views and scene.
///
/// ```
/// use kurbo::Rect;
/// use tidewater_charts::Chart;
/// use tidewater_core::{SeriesData, SeriesId, SeriesModel};
///
/// let mut chart = Chart::new(Rect::new(0.0, 0.0, 400.0, 300.0)).unwrap();
/// chart
///     .set_option(vec![SeriesModel::new(
///         SeriesId(1),
///         "bar",
///         SeriesData::from_values([3.0, 1.0, 2.0]),
///     )])
///     .unwrap();
/// while chart.frame(1.0 / 60.0).unwrap() {}
/// assert_eq!(chart.scene().draw_list().len(), 3);
/// ```
pub struct Chart {
    env: ChartEnv,
    scheduler: Scheduler<ChartEnv>,
    factories: HashMap<Cow<'static, str>, ViewFactory>,
    divide_shape: DivideShape,
    pending_transition: Option<Vec<TransitionItem>>,
}

impl fmt::Debug for Chart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chart")
            .field("env", &self.env)
            .field("scheduler", &self.scheduler)
            .field("view_types", &self.factories.keys().collect::<Vec<_>>())
            .field("divide_shape", &self.divide_shape)
            .finish_non_exhaustive()
    }
}

impl Chart {
    /// Creates a chart with the built-in views and stage handlers.
    pub fn new(viewport: Rect) -> Result<Self, ChartError> {
        Self::with_config(viewport, SchedulerConfig::default())
    }

    /// Creates a chart with a scheduler configuration.
    pub fn with_config(viewport: Rect, config: SchedulerConfig) -> Result<Self, ChartError> {
        let mut chart = Self {
            env: ChartEnv::new(viewport),
            scheduler: Scheduler::new(config),
            factories: HashMap::new(),
            divide_shape: DivideShape::default(),
            pending_transition: None,
        };
        chart.register_view("bar", BarView::factory);
        chart.register_view("pictorialBar", PictorialBarView::factory);
        chart.register_view("boxplot", BoxplotView::factory);
        chart.register_view("sunburst", SunburstView::factory);
        register_builtin_stages(&mut chart.scheduler)?;
        Ok(chart)
    }

    /// Sets the default update animation.
    pub fn with_animation(mut self, animation: AnimationConfig) -> Self {
        self.env.animation = animation;
        self
    }

    /// Sets how shapes are divided in many-to-one and one-to-many transitions.
    pub fn with_divide_shape(mut self, divide: DivideShape) -> Self {
        self.divide_shape = divide;
        self
    }

    /// Registers (or replaces) the view used for a series type.
    pub fn register_view(&mut self, series_type: impl Into<Cow<'static, str>>, factory: ViewFactory) {
        self.factories.insert(series_type.into(), factory);
    }

    /// Returns the scheduler, e.g. to register more stage handlers.
    pub fn scheduler_mut(&mut self) -> &mut Scheduler<ChartEnv> {
        &mut self.scheduler
    }

    /// Returns the scheduler.
    pub fn scheduler(&self) -> &Scheduler<ChartEnv> {
        &self.scheduler
    }

    /// Returns the model.
    pub fn model(&self) -> &GlobalModel {
        &self.env.model
    }

    /// Returns the scene.
    pub fn scene(&self) -> &Scene {
        &self.env.scene
    }

    /// Returns the environment tasks run against.
    pub fn env(&self) -> &ChartEnv {
        &self.env
    }

    /// Returns the view of a series.
    pub fn view(&self, series: SeriesId) -> Option<&dyn ChartView> {
        self.env.views.get(&series).map(|slot| slot.view.as_ref())
    }

    /// Returns the render task of a series.
    pub fn render_task(&self, series: SeriesId) -> Option<TaskId> {
        self.env.views.get(&series).map(|slot| slot.render_task)
    }

    /// Replaces the series and runs a full update.
    pub fn set_option(&mut self, series: Vec<SeriesModel>) -> Result<(), ChartError> {
        let old_items = self.transition_items();
        self.env.model.set_series(series);
        self.scheduler.restore_pipelines(&self.env)?;
        self.scheduler.prepare_stage_tasks(&self.env)?;
        self.prepare_views()?;
        self.scheduler.plan();
        if !old_items.is_empty() {
            self.pending_transition = Some(old_items);
        }
        self.update(None)
    }

    /// Runs one full update: every task is restored and rerun, every view renders.
    pub fn update(&mut self, payload: Option<&Payload>) -> Result<(), ChartError> {
        self.scheduler.clear_unfinished();
        self.scheduler.restore_data(&mut self.env)?;
        self.hide_filtered_views();
        self.perform_tick(payload, true)?;
        if let Some(old_items) = self.pending_transition.take() {
            let new_items = self.transition_items();
            let ChartEnv {
                scene, animation, ..
            } = &mut self.env;
            apply_transition(scene, &old_items, &new_items, self.divide_shape, animation);
        }
        Ok(())
    }

    /// Continues unfinished work and advances animations by `dt` seconds.
    ///
    /// Returns whether another frame is needed.
    pub fn frame(&mut self, dt: f64) -> Result<bool, ChartError> {
        if self.scheduler.unfinished() {
            self.scheduler.clear_unfinished();
            self.perform_tick(None, false)?;
        }
        let animating = self.env.scene.advance(dt);
        Ok(self.scheduler.unfinished() || animating)
    }

    /// Appends items to a series; they are processed on the next frames.
    pub fn append_data(
        &mut self,
        series: SeriesId,
        items: impl IntoIterator<Item = tidewater_core::DataItem>,
    ) -> Result<(), ChartError> {
        if !self.env.model.append_data(series, items) {
            return Err(ChartError::UnknownSeries(series));
        }
        self.scheduler.set_unfinished();
        Ok(())
    }

    /// Changes the layout area and relayouts every series.
    pub fn resize(&mut self, viewport: Rect) -> Result<(), ChartError> {
        self.env.viewport = viewport;
        self.update(Some(&Payload::new("resize")))
    }

    /// Hides or shows a series and updates.
    pub fn set_series_hidden(&mut self, series: SeriesId, hidden: bool) -> Result<(), ChartError> {
        if self.env.model.series(series).is_none() {
            return Err(ChartError::UnknownSeries(series));
        }
        self.env.model.set_series_hidden(series, hidden);
        self.update(Some(&Payload::new("toggleSeries").with_series(series)))
    }

    /// Creates views for new series and disposes views of series that left or changed type.
    fn prepare_views(&mut self) -> Result<(), ChartError> {
        let ChartEnv {
            model,
            scene,
            animation,
            views,
            ..
        } = &mut self.env;
        let stale: Vec<SeriesId> = views
            .iter()
            .filter(|(id, slot)| {
                model
                    .series(**id)
                    .is_none_or(|s| s.series_type != slot.series_type)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(mut slot) = views.remove(&id) {
                debug!(series = %id, "disposing view");
                slot.view.dispose(scene, animation);
                self.scheduler.graph_mut().dispose(slot.render_task);
            }
        }
        for series in model.raw_series() {
            if !views.contains_key(&series.id) {
                let Some(factory) = self.factories.get(&series.series_type) else {
                    warn!(series = %series.id, series_type = %series.series_type, "no view for series type");
                    continue;
                };
                let view = factory(scene);
                let render_task = self.scheduler.graph_mut().spawn(RenderRoutine {
                    series: series.id,
                    large: false,
                    progressive: false,
                });
                views.insert(
                    series.id,
                    ViewSlot {
                        view,
                        render_task,
                        series_type: series.series_type.clone(),
                        hidden: false,
                    },
                );
            }
            let Some(slot) = views.get(&series.id) else {
                continue;
            };
            self.scheduler
                .prepare_view(slot.render_task, series.id, slot.view.supports_incremental())?;
        }
        Ok(())
    }

    /// Clears the views of filtered series once, and re-arms them when they come back.
    fn hide_filtered_views(&mut self) {
        let ChartEnv {
            model,
            scene,
            animation,
            views,
            ..
        } = &mut self.env;
        for (id, slot) in views.iter_mut() {
            let filtered = model.is_series_filtered(*id);
            if filtered && !slot.hidden {
                debug!(series = %id, "hiding series");
                slot.view.remove(scene, animation);
            }
            slot.hidden = filtered;
        }
    }

    fn perform_tick(&mut self, payload: Option<&Payload>, dirty_render: bool) -> Result<(), ChartError> {
        let env = &mut self.env;
        let scheduler = &mut self.scheduler;
        scheduler.perform_series_tasks(env)?;
        scheduler.perform_data_processor_tasks(env, payload)?;
        let series_ids = env.model.series_ids();
        for id in &series_ids {
            let incremental = env
                .views
                .get(id)
                .is_some_and(|slot| slot.view.supports_incremental());
            scheduler.update_stream_modes(env, *id, incremental)?;
        }
        scheduler.perform_visual_tasks(env, payload, &VisualTaskOptions::default())?;
        for id in &series_ids {
            let Some(task) = env.views.get(id).map(|slot| slot.render_task) else {
                continue;
            };
            if dirty_render {
                scheduler.graph_mut().dirty(task)?;
            }
            scheduler.perform_task(task, env, payload)?;
        }
        Ok(())
    }

    /// Records the elements of every series that takes part in universal transitions.
    fn transition_items(&self) -> Vec<TransitionItem> {
        let mut items = Vec::new();
        for series in self.env.model.raw_series() {
            if !series.options.universal_transition {
                continue;
            }
            let Some(data) = self.env.views.get(&series.id).and_then(|slot| slot.view.old_data()) else {
                continue;
            };
            items.extend(collect_items(series.id, data, &self.env.scene));
        }
        items
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::vec;

    use tidewater_core::{DataItem, ElementId, ItemLayout, SeriesData, SeriesOptions};

    use super::*;
    use crate::shape::Shape;

    const VIEWPORT: Rect = Rect::new(0.0, 0.0, 400.0, 300.0);

    fn still_chart() -> Chart {
        Chart::new(VIEWPORT)
            .unwrap()
            .with_animation(AnimationConfig::DISABLED)
    }

    fn bars(id: u64, items: &[(&str, f64)]) -> SeriesModel {
        let data = SeriesData::new(
            items
                .iter()
                .map(|(key, v)| DataItem::value(*v).with_id(*key).with_group_id("g"))
                .collect(),
        );
        SeriesModel::new(SeriesId(id), "bar", data)
    }

    fn settle(chart: &mut Chart) -> usize {
        let mut frames = 0;
        while chart.frame(1.0 / 60.0).unwrap() {
            frames += 1;
            assert!(frames < 10_000, "chart never settled");
        }
        frames
    }

    fn element(chart: &Chart, series: u64, index: usize) -> Option<ElementId> {
        chart
            .model()
            .series(SeriesId(series))
            .and_then(|s| s.data.item_graphic_el(index))
    }

    fn group_len(chart: &Chart, series: u64) -> usize {
        let group = chart.view(SeriesId(series)).unwrap().group();
        chart.scene().children(group).len()
    }

    #[test]
    fn bar_update_reuses_elements_by_id() {
        let mut chart = still_chart();
        chart
            .set_option(vec![bars(1, &[("a", 1.0), ("b", 2.0), ("c", 3.0)])])
            .unwrap();
        assert_eq!(group_len(&chart, 1), 3);
        let b = element(&chart, 1, 1).unwrap();
        let c = element(&chart, 1, 2).unwrap();

        chart
            .set_option(vec![bars(1, &[("b", 5.0), ("c", 1.0), ("d", 2.0)])])
            .unwrap();
        settle(&mut chart);
        assert_eq!(element(&chart, 1, 0), Some(b));
        assert_eq!(element(&chart, 1, 1), Some(c));
        assert_eq!(group_len(&chart, 1), 3);
        let Some(ItemLayout::Rect(rect)) = chart
            .model()
            .series(SeriesId(1))
            .and_then(|s| s.data.layout(0).cloned())
        else {
            panic!("bar without rect layout");
        };
        assert_eq!(chart.scene().get(b).unwrap().shape, Shape::Rect(rect));
    }

    #[test]
    fn progressive_series_render_over_frames() {
        let mut chart = still_chart();
        let series = SeriesModel::new(
            SeriesId(1),
            "bar",
            SeriesData::from_values((0..5000).map(|i| (i % 7) as f64 + 1.0)),
        )
        .with_options(SeriesOptions::default().with_progressive(1000));
        chart.set_option(vec![series]).unwrap();
        assert!(chart.scheduler().unfinished());
        assert!(chart.model().series(SeriesId(1)).unwrap().pipeline_context.progressive_render);
        assert_eq!(group_len(&chart, 1), 1);

        let frames = settle(&mut chart);
        assert_eq!(frames, 3);
        assert!(!chart.scheduler().unfinished());
        assert_eq!(group_len(&chart, 1), 5);
    }

    #[test]
    fn progressive_series_shrinking_back_renders_per_item() {
        let mut chart = still_chart();
        let series = SeriesModel::new(
            SeriesId(1),
            "bar",
            SeriesData::from_values((0..5000).map(|i| (i % 7) as f64 + 1.0)),
        )
        .with_options(SeriesOptions::default().with_progressive(1000));
        chart.set_option(vec![series]).unwrap();
        settle(&mut chart);
        assert_eq!(group_len(&chart, 1), 5);

        chart
            .set_option(vec![bars(1, &[("a", 1.0), ("b", 2.0), ("c", 3.0)])])
            .unwrap();
        settle(&mut chart);
        assert!(!chart.model().series(SeriesId(1)).unwrap().pipeline_context.progressive_render);
        assert_eq!(group_len(&chart, 1), 3);
        let group = chart.view(SeriesId(1)).unwrap().group();
        assert!(
            chart
                .scene()
                .children(group)
                .iter()
                .all(|el| matches!(chart.scene().get(*el).unwrap().shape, Shape::Rect(_)))
        );
    }

    #[test]
    fn appended_data_is_rendered_on_following_frames() {
        let mut chart = still_chart();
        chart.set_option(vec![bars(1, &[("a", 1.0)])]).unwrap();
        chart
            .append_data(SeriesId(1), [DataItem::value(2.0).with_id("b")])
            .unwrap();
        assert!(chart.scheduler().unfinished());
        settle(&mut chart);
        assert_eq!(group_len(&chart, 1), 2);
        assert!(matches!(
            chart.append_data(SeriesId(9), [DataItem::value(1.0)]),
            Err(ChartError::UnknownSeries(SeriesId(9)))
        ));
    }

    #[test]
    fn hidden_series_are_cleared_and_restored() {
        let mut chart = still_chart();
        chart
            .set_option(vec![bars(1, &[("a", 1.0)]), bars(2, &[("a", 1.0)])])
            .unwrap();
        let width = |chart: &Chart| match chart
            .model()
            .series(SeriesId(1))
            .and_then(|s| s.data.layout(0).cloned())
        {
            Some(ItemLayout::Rect(rect)) => rect.width(),
            other => panic!("unexpected layout {other:?}"),
        };
        let shared = width(&chart);

        chart.set_series_hidden(SeriesId(2), true).unwrap();
        settle(&mut chart);
        assert_eq!(group_len(&chart, 2), 0);
        assert!((width(&chart) - 2.0 * shared).abs() < 1e-9);

        chart.set_series_hidden(SeriesId(2), false).unwrap();
        settle(&mut chart);
        assert_eq!(group_len(&chart, 2), 1);
        assert!((width(&chart) - shared).abs() < 1e-9);
    }

    #[test]
    fn removed_series_dispose_their_view() {
        let mut chart = still_chart();
        chart
            .set_option(vec![bars(1, &[("a", 1.0)]), bars(2, &[("a", 1.0)])])
            .unwrap();
        let task = chart.render_task(SeriesId(2)).unwrap();
        let group = chart.view(SeriesId(2)).unwrap().group();

        chart.set_option(vec![bars(1, &[("a", 1.0)])]).unwrap();
        settle(&mut chart);
        assert!(chart.view(SeriesId(2)).is_none());
        assert!(!chart.scheduler().graph().contains(task));
        assert!(!chart.scene().contains(group));
    }

    #[test]
    fn resize_relayouts_every_series() {
        let mut chart = still_chart();
        chart.set_option(vec![bars(1, &[("a", 2.0)])]).unwrap();
        chart.resize(Rect::new(0.0, 0.0, 400.0, 150.0)).unwrap();
        let el = element(&chart, 1, 0).unwrap();
        let bounds = chart.scene().get(el).unwrap().shape.bounds().unwrap();
        assert_eq!((bounds.y0, bounds.y1), (0.0, 150.0));
    }

    #[test]
    fn series_without_a_view_still_process() {
        let mut chart = still_chart();
        chart
            .set_option(vec![SeriesModel::new(
                SeriesId(1),
                "heatmap",
                SeriesData::from_values([1.0]),
            )])
            .unwrap();
        assert!(chart.view(SeriesId(1)).is_none());
        assert!(
            chart
                .model()
                .series(SeriesId(1))
                .unwrap()
                .data
                .visual(0)
                .is_some()
        );
    }

    #[test]
    fn bars_combine_into_a_sunburst_sector() {
        let mut chart = Chart::new(VIEWPORT).unwrap();
        let morphing = SeriesOptions::default().with_universal_transition(true);
        chart
            .set_option(vec![
                bars(1, &[("a", 1.0), ("b", 2.0)]).with_options(morphing.clone()),
            ])
            .unwrap();
        settle(&mut chart);
        let a = element(&chart, 1, 0).unwrap();
        let b = element(&chart, 1, 1).unwrap();

        let sunburst = SeriesData::new(vec![DataItem::value(3.0).with_id("g")]);
        chart
            .set_option(vec![
                SeriesModel::new(SeriesId(2), "sunburst", sunburst).with_options(morphing),
            ])
            .unwrap();
        let sector = element(&chart, 2, 0).unwrap();
        // The bars are rescued from the disposed view and stand in for the sector.
        assert!(chart.scene().get(sector).unwrap().ignore);
        assert_eq!(chart.scene().get(a).unwrap().parent(), Some(chart.scene().root()));
        assert!(chart.scene().contains(b));

        settle(&mut chart);
        assert!(!chart.scene().contains(a) && !chart.scene().contains(b));
        assert!(!chart.scene().get(sector).unwrap().ignore);
    }
}
