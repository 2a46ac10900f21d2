// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bar series view.

use alloc::boxed::Box;

use kurbo::{BezPath, Rect, Shape as _};
use tidewater_core::{DiffOp, ElementId, ItemLayout, ProgressParams, SeriesData};
use tracing::{debug, trace};

use crate::animation::AnimationConfig;
use crate::scene::{ElementState, OnDone, Scene};
use crate::shape::{Shape, Style, TOLERANCE};
use crate::view::{ChartView, ViewCx, fade_out_children};

/// Renders one rect per item, or batched paths in large and progressive mode.
///
/// Rect layouts run from the baseline (`y0`) to the value end (`y1`). New bars grow out of the
/// baseline; removed bars shrink back into it while fading.
#[derive(Debug)]
pub struct BarView {
    group: ElementId,
    old: Option<SeriesData>,
    /// The group holds batched paths rather than one rect per item.
    batched: bool,
}

impl BarView {
    /// Creates the view with its group under the scene root.
    pub fn new(scene: &mut Scene) -> Self {
        let group = scene.create_in(scene.root(), Shape::Group, Style::default());
        Self {
            group,
            old: None,
            batched: false,
        }
    }

    /// A [`ViewFactory`](crate::ViewFactory) for bar series.
    pub fn factory(scene: &mut Scene) -> Box<dyn ChartView> {
        Box::new(Self::new(scene))
    }

    fn render_normal(&mut self, cx: &mut ViewCx<'_>) {
        let ViewCx {
            series,
            scene,
            animation,
            ..
        } = cx;
        let data = &mut series.data;
        let old = self.old.take().unwrap_or_default();
        for op in data.diff(&old) {
            match op {
                DiffOp::Add(new) => self.add(scene, data, new, animation),
                DiffOp::Update { new, old: old_idx } => {
                    let el = old
                        .item_graphic_el(old_idx)
                        .filter(|el| scene.contains(*el));
                    if !data.has_value(new) {
                        if let Some(el) = el {
                            remove_bar(scene, el, animation);
                        }
                        continue;
                    }
                    match el {
                        Some(el) => update_bar(scene, data, new, el, animation),
                        None => self.add(scene, data, new, animation),
                    }
                }
                DiffOp::Remove(old_idx) => {
                    if let Some(el) = old.item_graphic_el(old_idx) {
                        remove_bar(scene, el, animation);
                    }
                }
                // Grouped ops only come from the multiple mode.
                _ => {}
            }
        }
        self.old = Some(data.clone());
    }

    fn add(
        &self,
        scene: &mut Scene,
        data: &mut SeriesData,
        index: usize,
        animation: &AnimationConfig,
    ) {
        if !data.has_value(index) {
            return;
        }
        let Some(ItemLayout::Rect(rect)) = data.layout(index) else {
            trace!(index, "bar without rect layout");
            return;
        };
        let rect = *rect;
        let from = Rect::new(rect.x0, rect.y0, rect.x1, rect.y0);
        let el = scene.create_in(self.group, Shape::Rect(from), item_style(data, index));
        if let Some(element) = scene.get_mut(el) {
            element.data_index = Some(index);
            element.label = data.item(index).and_then(|it| it.name.clone());
        }
        scene.animate_to(el, ElementState::shape(Shape::Rect(rect)), animation, OnDone::Keep);
        data.set_item_graphic_el(index, Some(el));
    }

    /// Drops every element at once and switches the draw mode.
    fn clear(&mut self, scene: &mut Scene, batched: bool) {
        scene.remove_children_now(self.group);
        self.old = None;
        self.batched = batched;
    }

    fn render_batched(&mut self, cx: &mut ViewCx<'_>, params: &ProgressParams) {
        let data = &cx.series.data;
        let mut path = BezPath::new();
        for index in params.indices() {
            if !data.has_value(index) {
                continue;
            }
            if let Some(ItemLayout::Rect(rect)) = data.layout(index) {
                path.extend(rect.abs().path_elements(TOLERANCE));
            }
        }
        if path.elements().is_empty() {
            return;
        }
        let style = item_style(data, params.start);
        cx.scene.create_in(self.group, Shape::Path(path), style);
    }
}

fn item_style(data: &SeriesData, index: usize) -> Style {
    data.visual(index).map(Style::from).unwrap_or_default()
}

fn update_bar(
    scene: &mut Scene,
    data: &mut SeriesData,
    index: usize,
    el: ElementId,
    animation: &AnimationConfig,
) {
    let Some(ItemLayout::Rect(rect)) = data.layout(index) else {
        remove_bar(scene, el, animation);
        return;
    };
    let rect = *rect;
    let style = item_style(data, index);
    let opacity = style.opacity;
    if let Some(element) = scene.get_mut(el) {
        element.style = Style {
            opacity: element.style.opacity,
            ..style
        };
        element.data_index = Some(index);
        element.label = data.item(index).and_then(|it| it.name.clone());
    }
    scene.animate_to(
        el,
        ElementState::shape(Shape::Rect(rect)).with_opacity(opacity),
        animation,
        OnDone::Keep,
    );
    data.set_item_graphic_el(index, Some(el));
}

/// Shrinks a bar into its baseline while fading, then removes it. The label goes at once.
fn remove_bar(scene: &mut Scene, el: ElementId, animation: &AnimationConfig) {
    let Some(element) = scene.get_mut(el) else {
        return;
    };
    element.label = None;
    let target = match element.shape {
        Shape::Rect(r) => ElementState::shape(Shape::Rect(Rect::new(r.x0, r.y0, r.x1, r.y0))),
        _ => ElementState::default(),
    };
    scene.animate_to(el, target.with_opacity(0.0), animation, OnDone::Remove);
}

impl ChartView for BarView {
    fn group(&self) -> ElementId {
        self.group
    }

    fn render(&mut self, cx: &mut ViewCx<'_>) {
        let large = cx.series.pipeline_context.large;
        if large || self.batched {
            debug!(series = %cx.series.id, large, count = cx.data().count(), "clearing batched bars");
            self.clear(cx.scene, large);
        }
        if large {
            let params = ProgressParams::new(0, cx.data().count());
            self.render_batched(cx, &params);
            return;
        }
        self.render_normal(cx);
    }

    fn incremental_prepare_render(&mut self, cx: &mut ViewCx<'_>) {
        self.clear(cx.scene, true);
    }

    fn incremental_render(&mut self, params: &ProgressParams, cx: &mut ViewCx<'_>) {
        trace!(start = params.start, end = params.end, "incremental bar chunk");
        self.render_batched(cx, params);
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn remove(&mut self, scene: &mut Scene, animation: &AnimationConfig) {
        fade_out_children(scene, self.group, animation);
        self.old = None;
    }

    fn old_data(&self) -> Option<&SeriesData> {
        self.old.as_ref()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::vec::Vec;

    use tidewater_core::{DataItem, SeriesId, SeriesModel};

    use super::*;
    use crate::animation::Easing;

    fn bars(items: &[(&str, f64)]) -> SeriesModel {
        let data = SeriesData::new(
            items
                .iter()
                .map(|(id, v)| DataItem::value(*v).with_id(*id))
                .collect(),
        );
        let mut series = SeriesModel::new(SeriesId(1), "bar", data.clone());
        series.data = data;
        for (i, (_, v)) in items.iter().enumerate() {
            let x = 10.0 * i as f64;
            series
                .data
                .set_layout(i, ItemLayout::Rect(Rect::new(x, 100.0, x + 8.0, 100.0 - v * 10.0)));
        }
        series
    }

    fn render(view: &mut BarView, scene: &mut Scene, series: &mut SeriesModel, anim: AnimationConfig) {
        let mut cx = ViewCx {
            series,
            scene,
            payload: None,
            animation: anim,
        };
        view.render(&mut cx);
    }

    fn linear() -> AnimationConfig {
        AnimationConfig::default()
            .with_duration(1.0)
            .with_easing(Easing::Linear)
    }

    #[test]
    fn update_reuses_elements_by_id() {
        let mut scene = Scene::new();
        let mut view = BarView::new(&mut scene);
        let mut first = bars(&[("A", 1.0), ("B", 2.0), ("C", 3.0)]);
        render(&mut view, &mut scene, &mut first, linear());
        scene.advance(1.0);
        let before: Vec<ElementId> = (0..3)
            .map(|i| first.data.item_graphic_el(i).unwrap())
            .collect();

        let mut second = bars(&[("B", 2.0), ("C", 3.0), ("D", 4.0)]);
        render(&mut view, &mut scene, &mut second, linear());
        assert_eq!(second.data.item_graphic_el(0), Some(before[1]));
        assert_eq!(second.data.item_graphic_el(1), Some(before[2]));
        let d = second.data.item_graphic_el(2).unwrap();
        assert!(!before.contains(&d));

        // A is fading out and has lost its label.
        let a = scene.get(before[0]).unwrap();
        assert!(a.is_removing());
        assert_eq!(a.label, None);
        scene.advance(0.5);
        assert!(scene.contains(before[0]));
        scene.advance(0.5);
        assert!(!scene.contains(before[0]));
        assert_eq!(scene.children(view.group()).len(), 3);
    }

    #[test]
    fn new_bars_grow_from_the_baseline() {
        let mut scene = Scene::new();
        let mut view = BarView::new(&mut scene);
        let mut series = bars(&[("A", 5.0)]);
        render(&mut view, &mut scene, &mut series, linear());
        let el = series.data.item_graphic_el(0).unwrap();
        assert_eq!(
            scene.get(el).unwrap().shape,
            Shape::Rect(Rect::new(0.0, 100.0, 8.0, 100.0))
        );
        scene.advance(0.5);
        assert_eq!(
            scene.get(el).unwrap().shape,
            Shape::Rect(Rect::new(0.0, 100.0, 8.0, 75.0))
        );
    }

    #[test]
    fn empty_values_are_skipped_and_removed() {
        let mut scene = Scene::new();
        let mut view = BarView::new(&mut scene);
        let mut series = bars(&[("A", 1.0), ("B", f64::NAN)]);
        render(&mut view, &mut scene, &mut series, AnimationConfig::DISABLED);
        assert!(series.data.item_graphic_el(1).is_none());
        let a = series.data.item_graphic_el(0).unwrap();

        let mut series = bars(&[("A", f64::NAN)]);
        render(&mut view, &mut scene, &mut series, AnimationConfig::DISABLED);
        assert!(!scene.contains(a));
        assert!(scene.children(view.group()).is_empty());
    }

    #[test]
    fn large_mode_batches_into_one_path() {
        let mut scene = Scene::new();
        let mut view = BarView::new(&mut scene);
        let mut series = bars(&[("A", 1.0), ("B", 2.0), ("C", 3.0)]);
        render(&mut view, &mut scene, &mut series, AnimationConfig::DISABLED);
        assert_eq!(scene.children(view.group()).len(), 3);

        series.pipeline_context.large = true;
        render(&mut view, &mut scene, &mut series, AnimationConfig::DISABLED);
        let children = scene.children(view.group());
        assert_eq!(children.len(), 1);
        assert!(matches!(scene.get(children[0]).unwrap().shape, Shape::Path(_)));
        assert!(view.old_data().is_none());
    }

    #[test]
    fn incremental_chunks_append_paths() {
        let mut scene = Scene::new();
        let mut view = BarView::new(&mut scene);
        let mut series = bars(&[("A", 1.0), ("B", 2.0), ("C", 3.0), ("D", 1.0)]);
        let mut cx = ViewCx {
            series: &mut series,
            scene: &mut scene,
            payload: None,
            animation: AnimationConfig::DISABLED,
        };
        view.incremental_prepare_render(&mut cx);
        view.incremental_render(&ProgressParams::new(0, 2), &mut cx);
        view.incremental_render(&ProgressParams::new(2, 4), &mut cx);
        assert_eq!(scene.children(view.group()).len(), 2);
    }

    #[test]
    fn leaving_large_mode_drops_the_batched_path() {
        let mut scene = Scene::new();
        let mut view = BarView::new(&mut scene);
        let mut series = bars(&[("A", 1.0), ("B", 2.0), ("C", 3.0)]);
        series.pipeline_context.large = true;
        render(&mut view, &mut scene, &mut series, AnimationConfig::DISABLED);
        assert_eq!(scene.children(view.group()).len(), 1);

        series.pipeline_context.large = false;
        render(&mut view, &mut scene, &mut series, AnimationConfig::DISABLED);
        let children = scene.children(view.group());
        assert_eq!(children.len(), 3);
        assert!(
            children
                .iter()
                .all(|el| matches!(scene.get(*el).unwrap().shape, Shape::Rect(_)))
        );
    }

    #[test]
    fn full_render_after_incremental_chunks_replaces_them() {
        let mut scene = Scene::new();
        let mut view = BarView::new(&mut scene);
        let mut series = bars(&[("A", 1.0), ("B", 2.0), ("C", 3.0), ("D", 1.0)]);
        {
            let mut cx = ViewCx {
                series: &mut series,
                scene: &mut scene,
                payload: None,
                animation: AnimationConfig::DISABLED,
            };
            view.incremental_prepare_render(&mut cx);
            view.incremental_render(&ProgressParams::new(0, 2), &mut cx);
            view.incremental_render(&ProgressParams::new(2, 4), &mut cx);
        }
        assert_eq!(scene.children(view.group()).len(), 2);

        render(&mut view, &mut scene, &mut series, AnimationConfig::DISABLED);
        assert_eq!(scene.children(view.group()).len(), 4);
        assert!(view.old_data().is_some());

        // Staying in normal mode keeps reconciling by id.
        let a = series.data.item_graphic_el(0).unwrap();
        let mut next = bars(&[("A", 2.0), ("B", 2.0), ("C", 3.0), ("D", 1.0)]);
        render(&mut view, &mut scene, &mut next, AnimationConfig::DISABLED);
        assert_eq!(next.data.item_graphic_el(0), Some(a));
        assert_eq!(scene.children(view.group()).len(), 4);
    }
}
