// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Boxplot series view.

use alloc::boxed::Box;

use kurbo::{BezPath, Point};
use peniko::Brush;
use tidewater_core::{DiffOp, ElementId, ItemLayout, SeriesData};
use tracing::trace;

use crate::animation::AnimationConfig;
use crate::scene::{ElementState, OnDone, Scene};
use crate::shape::{Shape, Style};
use crate::view::{ChartView, ViewCx, fade_out_children};

/// Number of layout points of one box.
///
/// In order: the box corners (upper left, upper right, lower right, lower left), the median
/// line ends, the upper whisker cap ends and the lower whisker cap ends.
pub const BOX_POINTS: usize = 10;

/// Renders one box-and-whisker path per item.
///
/// New boxes start flattened onto their median line and open up; removed boxes flatten back
/// while fading.
#[derive(Debug)]
pub struct BoxplotView {
    group: ElementId,
    old: Option<SeriesData>,
}

impl BoxplotView {
    /// Creates the view with its group under the scene root.
    pub fn new(scene: &mut Scene) -> Self {
        let group = scene.create_in(scene.root(), Shape::Group, Style::default());
        Self { group, old: None }
    }

    /// A [`ViewFactory`](crate::ViewFactory) for boxplot series.
    pub fn factory(scene: &mut Scene) -> Box<dyn ChartView> {
        Box::new(Self::new(scene))
    }

    fn add(&self, scene: &mut Scene, data: &mut SeriesData, index: usize, animation: &AnimationConfig) {
        if !data.has_value(index) {
            return;
        }
        let Some(points) = box_points(data, index) else {
            trace!(index, "box without point layout");
            return;
        };
        let median = points[4].y;
        let from = box_path(&points.map(|p| Point::new(p.x, median)));
        let el = scene.create_in(self.group, Shape::Path(from), item_style(data, index));
        if let Some(element) = scene.get_mut(el) {
            element.data_index = Some(index);
            element.label = data.item(index).and_then(|it| it.name.clone());
        }
        scene.animate_to(
            el,
            ElementState::shape(Shape::Path(box_path(&points))),
            animation,
            OnDone::Keep,
        );
        data.set_item_graphic_el(index, Some(el));
    }
}

fn box_points(data: &SeriesData, index: usize) -> Option<[Point; BOX_POINTS]> {
    match data.layout(index)? {
        ItemLayout::Points(points) if points.len() >= BOX_POINTS => {
            let mut out = [Point::ZERO; BOX_POINTS];
            out.copy_from_slice(&points[..BOX_POINTS]);
            Some(out)
        }
        _ => None,
    }
}

/// Builds the outline of a box from its layout points.
pub fn box_path(points: &[Point; BOX_POINTS]) -> BezPath {
    let mut path = BezPath::new();
    path.move_to(points[0]);
    path.line_to(points[1]);
    path.line_to(points[2]);
    path.line_to(points[3]);
    path.close_path();
    for (a, b) in [(points[4], points[5]), (points[6], points[7]), (points[8], points[9])] {
        path.move_to(a);
        path.line_to(b);
    }
    path.move_to(points[0].midpoint(points[1]));
    path.line_to(points[6].midpoint(points[7]));
    path.move_to(points[3].midpoint(points[2]));
    path.line_to(points[8].midpoint(points[9]));
    path
}

fn item_style(data: &SeriesData, index: usize) -> Style {
    let (stroke, opacity) = data
        .visual(index)
        .map_or((Brush::default(), 1.0), |v| (v.fill.clone(), v.opacity));
    Style::stroke(stroke, 1.0).with_opacity(opacity)
}

fn update_box(
    scene: &mut Scene,
    data: &mut SeriesData,
    index: usize,
    el: ElementId,
    animation: &AnimationConfig,
) {
    let Some(points) = box_points(data, index) else {
        remove_box(scene, el, animation);
        return;
    };
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
        ElementState::shape(Shape::Path(box_path(&points))).with_opacity(opacity),
        animation,
        OnDone::Keep,
    );
    data.set_item_graphic_el(index, Some(el));
}

fn remove_box(scene: &mut Scene, el: ElementId, animation: &AnimationConfig) {
    let Some(element) = scene.get_mut(el) else {
        return;
    };
    element.label = None;
    let target = element
        .shape
        .bounds()
        .map(|b| {
            let mid = b.center().y;
            let mut flat = BezPath::new();
            flat.move_to((b.x0, mid));
            flat.line_to((b.x1, mid));
            ElementState::shape(Shape::Path(flat))
        })
        .unwrap_or_default();
    scene.animate_to(el, target.with_opacity(0.0), animation, OnDone::Remove);
}

impl ChartView for BoxplotView {
    fn group(&self) -> ElementId {
        self.group
    }

    fn render(&mut self, cx: &mut ViewCx<'_>) {
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
                    match old.item_graphic_el(old_idx).filter(|el| scene.contains(*el)) {
                        Some(el) if !data.has_value(new) => remove_box(scene, el, animation),
                        Some(el) => update_box(scene, data, new, el, animation),
                        None => self.add(scene, data, new, animation),
                    }
                }
                DiffOp::Remove(old_idx) => {
                    if let Some(el) = old.item_graphic_el(old_idx) {
                        remove_box(scene, el, animation);
                    }
                }
                _ => {}
            }
        }
        self.old = Some(data.clone());
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

    use kurbo::{Rect, Shape as _};
    use smallvec::SmallVec;
    use tidewater_core::{DataItem, SeriesId, SeriesModel};

    use super::*;
    use crate::animation::Easing;

    fn layout(x: f64, [min, q1, median, q3, max]: [f64; 5]) -> ItemLayout {
        let (l, r) = (x - 5.0, x + 5.0);
        let points: SmallVec<[Point; 10]> = [
            (l, q3),
            (r, q3),
            (r, q1),
            (l, q1),
            (l, median),
            (r, median),
            (l, max),
            (r, max),
            (l, min),
            (r, min),
        ]
        .into_iter()
        .map(Point::from)
        .collect();
        ItemLayout::Points(points)
    }

    fn boxes(items: &[(&str, [f64; 5])]) -> SeriesModel {
        let data = SeriesData::new(
            items
                .iter()
                .map(|(id, v)| DataItem::values(v.iter().copied()).with_id(*id))
                .collect(),
        );
        let mut series = SeriesModel::new(SeriesId(3), "boxplot", data.clone());
        series.data = data;
        for (i, (_, v)) in items.iter().enumerate() {
            // Screen y grows downwards.
            let ys = v.map(|value| 100.0 - value);
            series.data.set_layout(i, layout(20.0 * i as f64 + 10.0, ys));
        }
        series
    }

    #[test]
    fn path_spans_whiskers() {
        let ItemLayout::Points(points) = layout(10.0, [90.0, 70.0, 60.0, 50.0, 30.0]) else {
            unreachable!();
        };
        let mut fixed = [Point::ZERO; BOX_POINTS];
        fixed.copy_from_slice(&points);
        let bounds = box_path(&fixed).bounding_box();
        assert_eq!(bounds, Rect::new(5.0, 30.0, 15.0, 90.0));
    }

    #[test]
    fn new_boxes_open_from_the_median() {
        let mut scene = Scene::new();
        let mut view = BoxplotView::new(&mut scene);
        let mut series = boxes(&[("a", [10.0, 20.0, 30.0, 40.0, 50.0])]);
        let mut cx = ViewCx {
            series: &mut series,
            scene: &mut scene,
            payload: None,
            animation: AnimationConfig::default()
                .with_duration(1.0)
                .with_easing(Easing::Linear),
        };
        view.render(&mut cx);
        let el = series.data.item_graphic_el(0).unwrap();
        let start = scene.get(el).unwrap().shape.bounds().unwrap();
        assert_eq!(start.height(), 0.0);
        assert_eq!(start.y0, 70.0);
        scene.advance(1.0);
        let end = scene.get(el).unwrap().shape.bounds().unwrap();
        assert_eq!(end, Rect::new(5.0, 50.0, 15.0, 90.0));
    }

    fn render(view: &mut BoxplotView, scene: &mut Scene, series: &mut SeriesModel) {
        let mut cx = ViewCx {
            series,
            scene,
            payload: None,
            animation: AnimationConfig::DISABLED,
        };
        view.render(&mut cx);
    }

    #[test]
    fn updates_keep_the_element() {
        let mut scene = Scene::new();
        let mut view = BoxplotView::new(&mut scene);
        let mut first = boxes(&[("a", [1.0, 2.0, 3.0, 4.0, 5.0]), ("b", [1.0, 2.0, 3.0, 4.0, 5.0])]);
        render(&mut view, &mut scene, &mut first);
        let a = first.data.item_graphic_el(0).unwrap();

        let mut second = boxes(&[("a", [2.0, 3.0, 4.0, 5.0, 6.0])]);
        render(&mut view, &mut scene, &mut second);
        assert_eq!(second.data.item_graphic_el(0), Some(a));
        assert_eq!(scene.children(view.group()), &[a]);
    }
}
