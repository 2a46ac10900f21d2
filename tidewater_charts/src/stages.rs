// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Built-in stage handlers: stacking, layouts and the palette.
//!
//! Every built-in chart type gets its geometry from a layout handler and its colors from the
//! palette handler. [`register_builtin_stages`] registers them on a scheduler; [`Chart::new`]
//! does so automatically.
//!
//! [`Chart::new`]: crate::Chart::new

use alloc::borrow::Cow;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::f64::consts::{FRAC_PI_2, TAU};

use hashbrown::HashMap;
use kurbo::{Point, Rect};
use peniko::{Brush, Color};
use smallvec::SmallVec;
use tidewater_core::{
    GlobalModel, ItemLayout, ItemStage, ItemVisual, PlanHint, Scheduler, SchedulerError,
    SectorLayout, SeriesData, SeriesId, SeriesModel, SeriesScope, SeriesStage, StageEnv, StageError,
    StageHandler, VisualKind,
};
use tracing::{trace, warn};

use crate::chart::ChartEnv;
use crate::scale::{ScaleBand, ScaleLinear, stacked_value_domain};

/// Priority of layout handlers.
pub const PRIORITY_LAYOUT: i32 = 1000;
/// Priority of global visual handlers such as the palette.
pub const PRIORITY_VISUAL_GLOBAL: i32 = 2000;
/// Priority of statistic data processors such as stacking.
pub const PRIORITY_PROCESSOR_STATISTIC: i32 = 5000;

/// Default series colors.
pub const PALETTE: [Color; 9] = [
    Color::from_rgba8(0x54, 0x70, 0xc6, 0xff),
    Color::from_rgba8(0x91, 0xcc, 0x75, 0xff),
    Color::from_rgba8(0xfa, 0xc8, 0x58, 0xff),
    Color::from_rgba8(0xee, 0x66, 0x66, 0xff),
    Color::from_rgba8(0x73, 0xc0, 0xde, 0xff),
    Color::from_rgba8(0x3b, 0xa2, 0x72, 0xff),
    Color::from_rgba8(0xfc, 0x84, 0x52, 0xff),
    Color::from_rgba8(0x9a, 0x60, 0xb4, 0xff),
    Color::from_rgba8(0xea, 0x7c, 0xcc, 0xff),
];

const BAR_TYPES: [&str; 2] = ["bar", "pictorialBar"];

/// Registers stacking, the bar, boxplot and sunburst layouts, and the palette.
pub fn register_builtin_stages(scheduler: &mut Scheduler<ChartEnv>) -> Result<(), SchedulerError> {
    scheduler.register_data_processor(PRIORITY_PROCESSOR_STATISTIC, stack())?;
    scheduler.register_visual(VisualKind::Layout, PRIORITY_LAYOUT, bar_layout())?;
    scheduler.register_visual(VisualKind::Layout, PRIORITY_LAYOUT, boxplot_layout())?;
    scheduler.register_visual(VisualKind::Layout, PRIORITY_LAYOUT, sunburst_layout())?;
    scheduler.register_visual(VisualKind::Visual, PRIORITY_VISUAL_GLOBAL, palette())?;
    Ok(())
}

/// Accumulates the stack base of every bar item.
///
/// Series sharing a stack key are stacked in option order, positive and negative values
/// separately per data index.
pub fn stack() -> StageHandler<ChartEnv> {
    StageHandler::overall_fn("stack", |env: &mut ChartEnv, _payload| {
        let model = env.model_mut();
        let filtered: Vec<bool> = model
            .raw_series()
            .iter()
            .map(|s| model.is_series_filtered(s.id))
            .collect();
        let mut bases: HashMap<(Cow<'static, str>, usize), (f64, f64)> = HashMap::new();
        for (series, filtered) in model.raw_series_mut().iter_mut().zip(filtered) {
            if filtered || series.series_type != "bar" {
                continue;
            }
            let Some(key) = series.options.stack.clone() else {
                continue;
            };
            let data = &mut series.data;
            for i in 0..data.count() {
                let Some(v) = data.value(i).filter(|v| v.is_finite()) else {
                    continue;
                };
                let (positive, negative) = bases.entry((key.clone(), i)).or_insert((0.0, 0.0));
                let base = if v >= 0.0 { positive } else { negative };
                data.set_stack_base(i, *base);
                *base += v;
            }
        }
        Ok(())
    })
    .with_series_type("bar")
}

/// Lays bar-like series out as rects in category bands over the viewport.
pub fn bar_layout() -> StageHandler<ChartEnv> {
    StageHandler::series("barLayout", BarLayout::default()).with_target_series(|model| {
        model
            .raw_series()
            .iter()
            .filter(|s| BAR_TYPES.contains(&&*s.series_type))
            .map(|s| s.id)
            .collect()
    })
}

/// Grouping of bar series within a category band.
#[derive(Clone, Debug, PartialEq, Eq)]
enum StackGroup {
    Named(Cow<'static, str>),
    Single(SeriesId),
}

/// Everything a bar layout depends on besides the series' own values.
#[derive(Clone, Copy, Debug, PartialEq)]
struct BarFrame {
    categories: usize,
    domain: (f64, f64),
    viewport: Rect,
    /// Position of the series' stack group in the band.
    slot: usize,
    groups: usize,
}

#[derive(Debug, Default)]
struct BarLayout {
    frames: RefCell<HashMap<SeriesId, BarFrame>>,
}

fn bar_series(model: &GlobalModel) -> impl Iterator<Item = &SeriesModel> {
    model
        .raw_series()
        .iter()
        .filter(move |s| BAR_TYPES.contains(&&*s.series_type) && !model.is_series_filtered(s.id))
}

fn stack_group(series: &SeriesModel) -> StackGroup {
    match &series.options.stack {
        Some(key) => StackGroup::Named(key.clone()),
        None => StackGroup::Single(series.id),
    }
}

fn bar_frame(model: &GlobalModel, viewport: Rect, series: SeriesId) -> BarFrame {
    let mut groups: Vec<StackGroup> = Vec::new();
    let mut slot = 0;
    for s in bar_series(model) {
        let group = stack_group(s);
        let index = match groups.iter().position(|g| *g == group) {
            Some(index) => index,
            None => {
                groups.push(group);
                groups.len() - 1
            }
        };
        if s.id == series {
            slot = index;
        }
    }
    BarFrame {
        categories: bar_series(model).map(|s| s.data.count()).max().unwrap_or(0),
        domain: stacked_value_domain(bar_series(model).map(|s| &s.data)),
        viewport,
        slot,
        groups: groups.len().max(1),
    }
}

impl SeriesStage<ChartEnv> for BarLayout {
    fn plan(&self, scope: &SeriesScope<'_, ChartEnv>) -> PlanHint {
        let frame = bar_frame(scope.model, scope.env.viewport(), scope.series.id);
        let previous = self.frames.borrow_mut().insert(scope.series.id, frame);
        if previous == Some(frame) {
            PlanHint::Keep
        } else {
            trace!(series = %scope.series.id, ?frame, "bar frame changed");
            PlanHint::Reset
        }
    }

    fn reset(&self, scope: &SeriesScope<'_, ChartEnv>) -> Result<Vec<ItemStage>, StageError> {
        let viewport = scope.env.viewport();
        if viewport.width() <= 0.0 || viewport.height() <= 0.0 {
            warn!(series = %scope.series.id, ?viewport, "empty viewport, bars are not laid out");
            return Ok(Vec::new());
        }
        let frame = bar_frame(scope.model, viewport, scope.series.id);
        self.frames.borrow_mut().insert(scope.series.id, frame);

        let band = ScaleBand::new((viewport.x0, viewport.x1), frame.categories);
        let sub = band.band_width() / frame.groups as f64;
        let offset = sub * frame.slot as f64;
        let y = ScaleLinear::new(frame.domain, (viewport.y1, viewport.y0));
        Ok(vec![ItemStage::data_each(move |data: &mut SeriesData, i| {
            let Some(v) = data.value(i).filter(|v| v.is_finite()) else {
                return;
            };
            let base = data.stack_base(i);
            let x0 = band.x(i) + offset;
            data.set_layout(
                i,
                ItemLayout::Rect(Rect::new(x0, y.map(base), x0 + sub, y.map(base + v))),
            );
        })])
    }
}

/// Number of values of a boxplot item: min, Q1, median, Q3 and max.
const BOX_VALUES: usize = 5;

fn box_values(data: &SeriesData, index: usize) -> Option<[f64; BOX_VALUES]> {
    let mut out = [0.0; BOX_VALUES];
    for (dim, v) in out.iter_mut().enumerate() {
        *v = data.value_at(index, dim).filter(|v| v.is_finite())?;
    }
    Some(out)
}

/// Lays boxplot items out as ten points each.
///
/// See [`BOX_POINTS`](crate::boxplot_view::BOX_POINTS) for the point order.
pub fn boxplot_layout() -> StageHandler<ChartEnv> {
    StageHandler::series_fn("boxplotLayout", |scope: &SeriesScope<'_, ChartEnv>| {
        let viewport = scope.env.viewport();
        let data = &scope.series.data;
        if viewport.width() <= 0.0 || viewport.height() <= 0.0 || data.is_empty() {
            warn!(series = %scope.series.id, ?viewport, "nothing to lay out");
            return Ok(Vec::new());
        }
        let mut domain = (f64::INFINITY, f64::NEG_INFINITY);
        for values in (0..data.count()).filter_map(|i| box_values(data, i)) {
            for v in values {
                domain = (domain.0.min(v), domain.1.max(v));
            }
        }
        if domain.0 > domain.1 {
            return Ok(Vec::new());
        }
        let band = ScaleBand::new((viewport.x0, viewport.x1), data.count());
        let half = band.band_width() * 0.5;
        let y = ScaleLinear::new(domain, (viewport.y1, viewport.y0));
        Ok(vec![ItemStage::data_each(move |data: &mut SeriesData, i| {
            let Some([min, q1, median, q3, max]) = box_values(data, i) else {
                return;
            };
            let (l, r) = (band.x(i), band.x(i) + 2.0 * half);
            let points: SmallVec<[Point; 10]> = [
                (l, q3),
                (r, q3),
                (r, q1),
                (l, q1),
                (l, median),
                (r, median),
                (l + half * 0.5, max),
                (r - half * 0.5, max),
                (l + half * 0.5, min),
                (r - half * 0.5, min),
            ]
            .into_iter()
            .map(|(x, v)| Point::new(x, y.map(v)))
            .collect();
            data.set_layout(i, ItemLayout::Points(points));
        })])
    })
    .with_series_type("boxplot")
}

/// Parent to children index of hierarchical series data.
///
/// Nodes whose parent is out of range or themselves belong to no tree.
pub(crate) struct Tree {
    pub(crate) roots: Vec<usize>,
    pub(crate) children: Vec<Vec<usize>>,
}

impl Tree {
    pub(crate) fn new(data: &SeriesData) -> Self {
        let mut roots = Vec::new();
        let mut children = vec![Vec::new(); data.count()];
        for i in 0..data.count() {
            match data.parent_of(i) {
                Some(p) if p < data.count() && p != i => children[p].push(i),
                Some(_) => {}
                None => roots.push(i),
            }
        }
        Self { roots, children }
    }

    /// Children of `node`, or the roots for `None`.
    pub(crate) fn children_of(&self, node: Option<usize>) -> &[usize] {
        match node {
            Some(n) => self.children.get(n).map_or(&[], Vec::as_slice),
            None => &self.roots,
        }
    }

    fn depth(&self, node: usize) -> usize {
        self.children[node]
            .iter()
            .map(|&c| self.depth(c) + 1)
            .max()
            .unwrap_or(0)
    }
}

fn node_value(data: &SeriesData, index: usize) -> Option<f64> {
    data.value(index).filter(|v| v.is_finite() && *v > 0.0)
}

struct SunburstGeometry {
    center: Point,
    ring: f64,
    unit: f64,
}

impl SunburstGeometry {
    fn place(
        &self,
        data: &SeriesData,
        tree: &Tree,
        nodes: &[usize],
        start: f64,
        depth: usize,
        out: &mut [Option<SectorLayout>],
    ) {
        let mut cursor = start;
        for &node in nodes {
            let Some(value) = node_value(data, node) else {
                continue;
            };
            let end = cursor + value * self.unit;
            let r0 = self.ring * depth as f64;
            out[node] = Some(SectorLayout {
                center: self.center,
                r0,
                r: r0 + self.ring,
                start_angle: cursor,
                end_angle: end,
            });
            self.place(data, tree, &tree.children[node], cursor, depth + 1, out);
            cursor = end;
        }
    }
}

/// Lays hierarchical data out as rings of sectors.
///
/// Roots share the full circle in proportion to their values, starting at twelve o'clock.
/// Children start at their parent's start angle and use the same angle per value unit. Nodes
/// without a positive value get no layout, and neither do their subtrees.
pub fn sunburst_layout() -> StageHandler<ChartEnv> {
    StageHandler::series_fn("sunburstLayout", |scope: &SeriesScope<'_, ChartEnv>| {
        let viewport = scope.env.viewport();
        let data = &scope.series.data;
        let tree = Tree::new(data);
        let total: f64 = tree.roots.iter().filter_map(|&r| node_value(data, r)).sum();
        let radius = viewport.width().min(viewport.height()) * 0.5;
        if total <= 0.0 || radius <= 0.0 {
            warn!(series = %scope.series.id, total, radius, "nothing to lay out");
            return Ok(Vec::new());
        }
        let depth = tree.roots.iter().map(|&r| tree.depth(r)).max().unwrap_or(0);
        let geometry = SunburstGeometry {
            center: viewport.center(),
            ring: radius / (depth + 1) as f64,
            unit: TAU / total,
        };
        let mut layouts = vec![None; data.count()];
        geometry.place(data, &tree, &tree.roots, -FRAC_PI_2, 0, &mut layouts);
        Ok(vec![ItemStage::data_each(move |data: &mut SeriesData, i| {
            if let Some(Some(sector)) = layouts.get(i) {
                data.set_layout(i, ItemLayout::Sector(*sector));
            }
        })])
    })
    .with_series_type("sunburst")
}

fn palette_color(index: usize) -> Brush {
    Brush::Solid(PALETTE[index % PALETTE.len()])
}

fn top_ancestor(data: &SeriesData, mut index: usize) -> usize {
    for _ in 0..data.count() {
        match data.parent_of(index) {
            Some(parent) if parent < data.count() => index = parent,
            _ => break,
        }
    }
    index
}

/// Colors every item from [`PALETTE`].
///
/// Series are colored by their position in the option. Sunburst nodes are colored by the
/// position of their top-level ancestor among the roots.
pub fn palette() -> StageHandler<ChartEnv> {
    StageHandler::series_fn("palette", |scope: &SeriesScope<'_, ChartEnv>| {
        let series = scope.series;
        let position = scope
            .model
            .raw_series()
            .iter()
            .position(|s| s.id == series.id)
            .unwrap_or(0);
        if series.series_type == "sunburst" {
            let roots: HashMap<usize, usize> = Tree::new(&series.data)
                .roots
                .into_iter()
                .enumerate()
                .map(|(ordinal, root)| (root, ordinal))
                .collect();
            return Ok(vec![ItemStage::data_each(move |data: &mut SeriesData, i| {
                let ordinal = roots.get(&top_ancestor(data, i)).copied().unwrap_or(0);
                data.set_visual(
                    i,
                    ItemVisual {
                        fill: palette_color(ordinal),
                        opacity: 1.0,
                    },
                );
            })]);
        }
        let fill = palette_color(position);
        Ok(vec![ItemStage::data_each(move |data: &mut SeriesData, i| {
            data.set_visual(
                i,
                ItemVisual {
                    fill: fill.clone(),
                    opacity: 1.0,
                },
            );
        })])
    })
    .on_all_series()
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::vec;

    use tidewater_core::{DataItem, SeriesOptions};

    use super::*;
    use crate::animation::AnimationConfig;
    use crate::chart::Chart;

    fn chart(viewport: Rect, series: Vec<SeriesModel>) -> Chart {
        let mut chart = Chart::new(viewport)
            .unwrap()
            .with_animation(AnimationConfig::DISABLED);
        chart.set_option(series).unwrap();
        chart
    }

    fn layout(chart: &Chart, series: u64, index: usize) -> Option<ItemLayout> {
        chart
            .model()
            .series(SeriesId(series))
            .and_then(|s| s.data.layout(index).cloned())
    }

    fn bar(id: u64, values: &[f64]) -> SeriesModel {
        SeriesModel::new(
            SeriesId(id),
            "bar",
            SeriesData::from_values(values.iter().copied()),
        )
    }

    #[test]
    fn bars_run_from_the_zero_baseline() {
        let chart = chart(Rect::new(0.0, 0.0, 400.0, 300.0), vec![bar(1, &[3.0, 1.0, 2.0])]);
        let band = ScaleBand::new((0.0, 400.0), 3);
        let Some(ItemLayout::Rect(rect)) = layout(&chart, 1, 0) else {
            panic!("bar without rect layout");
        };
        assert_eq!(rect.x0, band.x(0));
        assert_eq!(rect.y0, 300.0);
        assert_eq!(rect.y1, 0.0);
        assert!((rect.width() - band.band_width()).abs() < 1e-9);
    }

    #[test]
    fn unstacked_series_share_the_band() {
        let chart = chart(
            Rect::new(0.0, 0.0, 400.0, 300.0),
            vec![bar(1, &[1.0, 2.0]), bar(2, &[2.0, 1.0])],
        );
        let (Some(ItemLayout::Rect(a)), Some(ItemLayout::Rect(b))) =
            (layout(&chart, 1, 0), layout(&chart, 2, 0))
        else {
            panic!("bars without rect layouts");
        };
        assert!((a.x1 - b.x0).abs() < 1e-9);
        assert!((a.width() - b.width()).abs() < 1e-9);
    }

    #[test]
    fn stacked_series_accumulate_by_sign() {
        let stacked = SeriesOptions::default().with_stack("total");
        let chart = chart(
            Rect::new(0.0, 0.0, 100.0, 100.0),
            vec![
                bar(1, &[1.0, -2.0]).with_options(stacked.clone()),
                bar(2, &[3.0, -1.0]).with_options(stacked),
            ],
        );
        let data = &chart.model().series(SeriesId(2)).unwrap().data;
        assert_eq!(data.stack_base(0), 1.0);
        assert_eq!(data.stack_base(1), -2.0);

        // Domain is (-3, 4) mapped onto (100, 0).
        let y = ScaleLinear::new((-3.0, 4.0), (100.0, 0.0));
        let Some(ItemLayout::Rect(rect)) = layout(&chart, 2, 0) else {
            panic!("bar without rect layout");
        };
        assert!((rect.y0 - y.map(1.0)).abs() < 1e-9);
        assert!((rect.y1 - y.map(4.0)).abs() < 1e-9);
        let Some(ItemLayout::Rect(first)) = layout(&chart, 1, 0) else {
            panic!("bar without rect layout");
        };
        assert!((first.x0 - rect.x0).abs() < 1e-9);
    }

    #[test]
    fn boxplot_points_follow_the_values() {
        let series = SeriesModel::new(
            SeriesId(1),
            "boxplot",
            SeriesData::new(vec![DataItem::values([1.0, 2.0, 3.0, 4.0, 5.0])]),
        );
        let chart = chart(Rect::new(0.0, 0.0, 100.0, 100.0), vec![series]);
        let Some(ItemLayout::Points(points)) = layout(&chart, 1, 0) else {
            panic!("box without point layout");
        };
        assert_eq!(points.len(), 10);
        assert_eq!(points[0].y, 25.0);
        assert_eq!(points[3].y, 75.0);
        assert_eq!(points[4].y, 50.0);
        assert_eq!(points[6].y, 0.0);
        assert_eq!(points[8].y, 100.0);
    }

    #[test]
    fn sunburst_rings_split_angles_by_value() {
        let data = SeriesData::new(vec![
            DataItem::value(2.0).with_id("a"),
            DataItem::value(1.0).with_id("a1").with_parent(0),
            DataItem::value(1.0).with_id("a2").with_parent(0),
            DataItem::value(2.0).with_id("b"),
        ]);
        let chart = chart(
            Rect::new(0.0, 0.0, 200.0, 200.0),
            vec![SeriesModel::new(SeriesId(1), "sunburst", data)],
        );
        let sector = |i| match layout(&chart, 1, i) {
            Some(ItemLayout::Sector(s)) => s,
            other => panic!("unexpected layout {other:?}"),
        };
        let a = sector(0);
        assert_eq!(a.center, Point::new(100.0, 100.0));
        assert_eq!((a.r0, a.r), (0.0, 50.0));
        assert!((a.start_angle + FRAC_PI_2).abs() < 1e-9);
        assert!((a.end_angle - FRAC_PI_2).abs() < 1e-9);
        let a2 = sector(2);
        assert_eq!((a2.r0, a2.r), (50.0, 100.0));
        assert!(a2.start_angle.abs() < 1e-9);
        assert!((a2.end_angle - FRAC_PI_2).abs() < 1e-9);
        let b = sector(3);
        assert!((b.end_angle - 3.0 * FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn zero_sunburst_nodes_have_no_layout() {
        let data = SeriesData::new(vec![
            DataItem::value(0.0).with_id("a"),
            DataItem::value(1.0).with_id("a1").with_parent(0),
            DataItem::value(1.0).with_id("b"),
        ]);
        let chart = chart(
            Rect::new(0.0, 0.0, 200.0, 200.0),
            vec![SeriesModel::new(SeriesId(1), "sunburst", data)],
        );
        assert_eq!(layout(&chart, 1, 0), None);
        assert_eq!(layout(&chart, 1, 1), None);
        assert!(matches!(layout(&chart, 1, 2), Some(ItemLayout::Sector(_))));
    }

    #[test]
    fn palette_colors_by_series_and_root() {
        let data = SeriesData::new(vec![
            DataItem::value(1.0).with_id("a"),
            DataItem::value(1.0).with_id("b"),
            DataItem::value(1.0).with_id("b1").with_parent(1),
        ]);
        let chart = chart(
            Rect::new(0.0, 0.0, 200.0, 200.0),
            vec![
                bar(1, &[1.0]),
                SeriesModel::new(SeriesId(2), "sunburst", data),
            ],
        );
        let fill = |series, i| {
            chart
                .model()
                .series(SeriesId(series))
                .and_then(|s| s.data.visual(i))
                .map(|v| v.fill.clone())
        };
        assert_eq!(fill(1, 0), Some(Brush::Solid(PALETTE[0])));
        assert_eq!(fill(2, 0), Some(Brush::Solid(PALETTE[0])));
        assert_eq!(fill(2, 1), Some(Brush::Solid(PALETTE[1])));
        assert_eq!(fill(2, 2), Some(Brush::Solid(PALETTE[1])));
    }
}
