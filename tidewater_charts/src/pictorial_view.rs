// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pictorial bar series view.

use alloc::boxed::Box;
use alloc::vec::Vec;

use hashbrown::HashMap;
use kurbo::{Point, Rect};
use tidewater_core::{DiffOp, ElementId, ItemLayout, SeriesData};
use tracing::trace;

use crate::animation::AnimationConfig;
#[cfg(not(feature = "std"))]
use crate::float::FloatExt;
use crate::scene::{ElementState, OnDone, Scene};
use crate::shape::{Shape, Style};
use crate::symbol::Symbol;
use crate::view::{ChartView, ViewCx, fade_out_children};

#[derive(Debug)]
struct PictorialBar {
    symbol: Symbol,
    symbols: Vec<ElementId>,
}

/// Renders each bar as a column of repeated symbols.
///
/// A bar is a group element whose children are the symbols. Symbols are square, as wide as
/// the bar, and stacked from the baseline until they cover the bar's height. Changing an
/// item's symbol replaces its whole bar; changing its height adds or removes symbols at the
/// far end.
#[derive(Debug)]
pub struct PictorialBarView {
    group: ElementId,
    old: Option<SeriesData>,
    bars: HashMap<ElementId, PictorialBar>,
}

impl PictorialBarView {
    /// Creates the view with its group under the scene root.
    pub fn new(scene: &mut Scene) -> Self {
        let group = scene.create_in(scene.root(), Shape::Group, Style::default());
        Self {
            group,
            old: None,
            bars: HashMap::new(),
        }
    }

    /// A [`ViewFactory`](crate::ViewFactory) for pictorial bar series.
    pub fn factory(scene: &mut Scene) -> Box<dyn ChartView> {
        Box::new(Self::new(scene))
    }

    fn add(
        &mut self,
        scene: &mut Scene,
        data: &mut SeriesData,
        index: usize,
        animation: &AnimationConfig,
    ) {
        if !data.has_value(index) {
            return;
        }
        let Some(ItemLayout::Rect(rect)) = data.layout(index).cloned() else {
            trace!(index, "pictorial bar without rect layout");
            return;
        };
        let el = scene.create_in(self.group, Shape::Group, Style::default());
        if let Some(element) = scene.get_mut(el) {
            element.data_index = Some(index);
            element.label = data.item(index).and_then(|it| it.name.clone());
        }
        let mut bar = PictorialBar {
            symbol: symbol_of(data, index),
            symbols: Vec::new(),
        };
        reconcile_symbols(scene, el, &mut bar, rect, &item_style(data, index), animation);
        self.bars.insert(el, bar);
        data.set_item_graphic_el(index, Some(el));
    }

    fn update(
        &mut self,
        scene: &mut Scene,
        data: &mut SeriesData,
        index: usize,
        el: ElementId,
        animation: &AnimationConfig,
    ) {
        let symbol = symbol_of(data, index);
        let rect = match data.layout(index) {
            Some(ItemLayout::Rect(rect)) => Some(*rect),
            _ => None,
        };
        let keep = rect.is_some() && self.bars.get(&el).is_some_and(|bar| bar.symbol == symbol);
        if !keep {
            trace!(index, ?symbol, "recreating pictorial bar");
            self.remove_bar(scene, el, animation);
            self.add(scene, data, index, animation);
            return;
        }
        let (Some(rect), Some(bar)) = (rect, self.bars.get_mut(&el)) else {
            return;
        };
        reconcile_symbols(scene, el, bar, rect, &item_style(data, index), animation);
        if let Some(element) = scene.get_mut(el) {
            element.data_index = Some(index);
            element.label = data.item(index).and_then(|it| it.name.clone());
        }
        data.set_item_graphic_el(index, Some(el));
    }

    fn remove_bar(&mut self, scene: &mut Scene, el: ElementId, animation: &AnimationConfig) {
        let Some(bar) = self.bars.remove(&el) else {
            scene.remove_now(el);
            return;
        };
        if let Some(element) = scene.get_mut(el) {
            element.label = None;
        }
        for symbol in bar.symbols {
            shrink_symbol(scene, symbol, bar.symbol, animation, OnDone::Keep);
        }
        scene.animate_to(el, ElementState::opacity(0.0), animation, OnDone::Remove);
    }
}

fn symbol_of(data: &SeriesData, index: usize) -> Symbol {
    data.item(index)
        .and_then(|it| it.symbol.as_deref())
        .and_then(Symbol::from_name)
        .unwrap_or_default()
}

fn item_style(data: &SeriesData, index: usize) -> Style {
    data.visual(index).map(Style::from).unwrap_or_default()
}

/// Smallest symbol edge, in pixels. Narrower bars still draw symbols of this size.
const MIN_SYMBOL_SIZE: f64 = 1.0;
/// Upper bound on symbols per bar. Taller bars stay partly uncovered.
const MAX_SYMBOL_REPEAT: usize = 256;

/// Returns the symbol size and the symbol centers covering `rect` from its baseline.
fn symbol_layout(rect: Rect) -> (f64, Vec<Point>) {
    let width = rect.width().abs();
    let height = rect.y1 - rect.y0;
    if width <= 0.0 || !width.is_finite() || !height.is_finite() {
        return (width, Vec::new());
    }
    let size = width.max(MIN_SYMBOL_SIZE);
    let count = ((height.abs() / size).ceil() as usize).min(MAX_SYMBOL_REPEAT);
    let dir = if height < 0.0 { -1.0 } else { 1.0 };
    let cx = (rect.x0 + rect.x1) * 0.5;
    let centers = (0..count)
        .map(|k| Point::new(cx, rect.y0 + dir * size * (k as f64 + 0.5)))
        .collect();
    (size, centers)
}

fn reconcile_symbols(
    scene: &mut Scene,
    bar_el: ElementId,
    bar: &mut PictorialBar,
    rect: Rect,
    style: &Style,
    animation: &AnimationConfig,
) {
    let (size, centers) = symbol_layout(rect);
    for (k, center) in centers.iter().enumerate() {
        let target = Shape::Path(bar.symbol.path(*center, size));
        let el = match bar.symbols.get(k) {
            Some(el) => *el,
            None => {
                let from = Shape::Path(bar.symbol.path(*center, 0.0));
                let el = scene.create_in(bar_el, from, style.clone());
                bar.symbols.push(el);
                el
            }
        };
        if let Some(element) = scene.get_mut(el) {
            element.style = Style {
                opacity: element.style.opacity,
                ..style.clone()
            };
        }
        scene.animate_to(
            el,
            ElementState::shape(target).with_opacity(style.opacity),
            animation,
            OnDone::Keep,
        );
    }
    if bar.symbols.len() > centers.len() {
        for el in bar.symbols.split_off(centers.len()) {
            shrink_symbol(scene, el, bar.symbol, animation, OnDone::Remove);
        }
    }
}

fn shrink_symbol(
    scene: &mut Scene,
    el: ElementId,
    symbol: Symbol,
    animation: &AnimationConfig,
    on_done: OnDone,
) {
    let Some(center) = scene
        .get(el)
        .and_then(|e| e.shape.bounds())
        .map(|b| b.center())
    else {
        return;
    };
    scene.animate_to(
        el,
        ElementState::shape(Shape::Path(symbol.path(center, 0.0))).with_opacity(0.0),
        animation,
        on_done,
    );
}

impl ChartView for PictorialBarView {
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
        self.bars.retain(|el, _| scene.contains(*el));
        let data = &mut series.data;
        let old = self.old.take().unwrap_or_default();
        for op in data.diff(&old) {
            match op {
                DiffOp::Add(new) => self.add(scene, data, new, animation),
                DiffOp::Update { new, old: old_idx } => {
                    let el = old
                        .item_graphic_el(old_idx)
                        .filter(|el| scene.contains(*el));
                    match el {
                        Some(el) if !data.has_value(new) => self.remove_bar(scene, el, animation),
                        Some(el) => self.update(scene, data, new, el, animation),
                        None => self.add(scene, data, new, animation),
                    }
                }
                DiffOp::Remove(old_idx) => {
                    if let Some(el) = old.item_graphic_el(old_idx) {
                        self.remove_bar(scene, el, animation);
                    }
                }
                _ => {}
            }
        }
        self.old = Some(data.clone());
    }

    fn remove(&mut self, scene: &mut Scene, animation: &AnimationConfig) {
        fade_out_children(scene, self.group, animation);
        self.bars.clear();
        self.old = None;
    }

    fn old_data(&self) -> Option<&SeriesData> {
        self.old.as_ref()
    }
}
