// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Series data storage.
//!
//! A [`SeriesData`] pairs shared, immutable item storage with per-item state computed by the
//! pipeline: layouts, visuals, stack bases and the graphical element bound to each item.
//! Shallow clones share the items and start with fresh per-item state, which is how the data
//! task hands a clean output to the rest of the pipeline on every reset.

use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;
use kurbo::{Point, Rect};
use peniko::Brush;
use smallvec::SmallVec;

use crate::differ::{DataDiffer, DiffOp};

/// Handle of a graphical element owned by a scene.
///
/// The scene that issues these lives outside this crate; the core only stores them as
/// non-owning bindings from data items to elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "el#{}", self.0)
    }
}

/// One input item.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataItem {
    /// Stable identity across updates.
    pub id: Option<String>,
    /// Display name; doubles as identity when `id` is missing.
    pub name: Option<String>,
    /// Group identity used to match items across series in transitions.
    pub group_id: Option<String>,
    /// Parent item index for hierarchical data.
    pub parent: Option<usize>,
    /// Symbol name for symbol-based series.
    pub symbol: Option<String>,
    /// Numeric values (dimensions).
    pub values: SmallVec<[f64; 4]>,
}

impl DataItem {
    /// Creates an item with a single value.
    pub fn value(value: f64) -> Self {
        Self {
            values: smallvec::smallvec![value],
            ..Self::default()
        }
    }

    /// Creates an item with several values.
    pub fn values(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            values: values.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Sets the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the group id.
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Sets the parent index.
    pub fn with_parent(mut self, parent: usize) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the symbol name.
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

/// Sector geometry for radial layouts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SectorLayout {
    /// Center point.
    pub center: Point,
    /// Inner radius.
    pub r0: f64,
    /// Outer radius.
    pub r: f64,
    /// Start angle in radians.
    pub start_angle: f64,
    /// End angle in radians.
    pub end_angle: f64,
}

/// Per-item layout produced by layout stages.
#[derive(Clone, Debug, PartialEq)]
pub enum ItemLayout {
    /// An axis-aligned rectangle.
    Rect(Rect),
    /// A ring sector.
    Sector(SectorLayout),
    /// A list of points whose meaning is defined by the producing layout.
    Points(SmallVec<[Point; 10]>),
}

/// Per-item visual produced by visual stages.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemVisual {
    /// Fill paint.
    pub fill: Brush,
    /// Opacity in `[0, 1]`.
    pub opacity: f64,
}

impl Default for ItemVisual {
    fn default() -> Self {
        Self {
            fill: Brush::default(),
            opacity: 1.0,
        }
    }
}

/// Items of one series plus the state computed for them.
#[derive(Clone, Debug, Default)]
pub struct SeriesData {
    items: Rc<Vec<DataItem>>,
    layouts: Vec<Option<ItemLayout>>,
    visuals: Vec<Option<ItemVisual>>,
    stack_bases: Vec<f64>,
    graphic_els: Vec<Option<ElementId>>,
    bound: HashMap<ElementId, usize>,
}

impl SeriesData {
    /// Creates data from items.
    pub fn new(items: Vec<DataItem>) -> Self {
        let mut data = Self {
            items: Rc::new(items),
            ..Self::default()
        };
        data.grow_state();
        data
    }

    /// Creates single-valued data.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        Self::new(values.into_iter().map(DataItem::value).collect())
    }

    /// Returns the number of items.
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Returns whether there are no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the item at `index`.
    pub fn item(&self, index: usize) -> Option<&DataItem> {
        self.items.get(index)
    }

    /// Returns the first value of an item.
    pub fn value(&self, index: usize) -> Option<f64> {
        self.value_at(index, 0)
    }

    /// Returns value `dim` of an item.
    pub fn value_at(&self, index: usize, dim: usize) -> Option<f64> {
        self.items.get(index)?.values.get(dim).copied()
    }

    /// Returns whether the item has a usable value: at least one value and all finite.
    ///
    /// Items without a value are kept in the data (they still occupy an index) but are not
    /// rendered.
    pub fn has_value(&self, index: usize) -> bool {
        self.items
            .get(index)
            .is_some_and(|it| !it.values.is_empty() && it.values.iter().all(|v| v.is_finite()))
    }

    /// Returns the item identity: its id, else its name, else a synthetic index key.
    pub fn id_of(&self, index: usize) -> String {
        match self.items.get(index) {
            Some(DataItem { id: Some(id), .. }) => id.clone(),
            Some(DataItem { name: Some(name), .. }) => name.clone(),
            _ => format!("\u{0}{index}"),
        }
    }

    /// Returns the key used for cross-series transitions: the group id, else the identity.
    pub fn group_key_of(&self, index: usize) -> String {
        match self.items.get(index) {
            Some(DataItem {
                group_id: Some(group),
                ..
            }) => group.clone(),
            _ => self.id_of(index),
        }
    }

    /// Returns the parent index for hierarchical data.
    pub fn parent_of(&self, index: usize) -> Option<usize> {
        self.items.get(index)?.parent
    }

    /// Returns the layout of an item.
    pub fn layout(&self, index: usize) -> Option<&ItemLayout> {
        self.layouts.get(index)?.as_ref()
    }

    /// Sets the layout of an item.
    pub fn set_layout(&mut self, index: usize, layout: ItemLayout) {
        if let Some(slot) = self.layouts.get_mut(index) {
            *slot = Some(layout);
        }
    }

    /// Returns the visual of an item.
    pub fn visual(&self, index: usize) -> Option<&ItemVisual> {
        self.visuals.get(index)?.as_ref()
    }

    /// Sets the visual of an item.
    pub fn set_visual(&mut self, index: usize, visual: ItemVisual) {
        if let Some(slot) = self.visuals.get_mut(index) {
            *slot = Some(visual);
        }
    }

    /// Drops every item visual.
    pub fn clear_all_visual(&mut self) {
        self.visuals.iter_mut().for_each(|v| *v = None);
    }

    /// Returns the stack base of an item (`0.0` when not stacked).
    pub fn stack_base(&self, index: usize) -> f64 {
        self.stack_bases.get(index).copied().unwrap_or(0.0)
    }

    /// Sets the stack base of an item.
    pub fn set_stack_base(&mut self, index: usize, base: f64) {
        if let Some(slot) = self.stack_bases.get_mut(index) {
            *slot = base;
        }
    }

    /// Returns the element bound to an item.
    pub fn item_graphic_el(&self, index: usize) -> Option<ElementId> {
        self.graphic_els.get(index).copied().flatten()
    }

    /// Binds (or unbinds, with `None`) the element of an item.
    ///
    /// An element is bound to at most one item: binding it again moves the binding.
    pub fn set_item_graphic_el(&mut self, index: usize, el: Option<ElementId>) {
        if index >= self.graphic_els.len() {
            return;
        }
        if let Some(prev) = self.graphic_els[index].take() {
            self.bound.remove(&prev);
        }
        if let Some(el) = el {
            if let Some(other) = self.bound.insert(el, index) {
                self.graphic_els[other] = None;
            }
            self.graphic_els[index] = Some(el);
        }
    }

    /// Returns the item index an element is bound to.
    pub fn index_of_el(&self, el: ElementId) -> Option<usize> {
        self.bound.get(&el).copied()
    }

    /// Iterates over `(index, element)` bindings in index order.
    pub fn graphic_els(&self) -> impl Iterator<Item = (usize, ElementId)> + '_ {
        self.graphic_els
            .iter()
            .enumerate()
            .filter_map(|(i, el)| el.map(|el| (i, el)))
    }

    /// Returns a copy sharing the items, with fresh per-item state.
    pub fn clone_shallow(&self) -> Self {
        let mut data = Self {
            items: Rc::clone(&self.items),
            ..Self::default()
        };
        data.grow_state();
        data
    }

    /// Adopts the items of `source`, keeping the per-item state of indices already present.
    ///
    /// Used when raw data grows through appends while a pipeline is mid-flight.
    pub fn sync_items(&mut self, source: &Self) {
        self.items = Rc::clone(&source.items);
        let n = self.items.len();
        self.layouts.truncate(n);
        self.visuals.truncate(n);
        self.stack_bases.truncate(n);
        for el in self.graphic_els.drain(n.min(self.graphic_els.len())..).flatten() {
            self.bound.remove(&el);
        }
        self.grow_state();
    }

    /// Appends items.
    pub fn append(&mut self, items: impl IntoIterator<Item = DataItem>) {
        Rc::make_mut(&mut self.items).extend(items);
        self.grow_state();
    }

    /// Diffs `old` against `self` by item identity.
    pub fn diff(&self, old: &Self) -> Vec<DiffOp> {
        let old_indices: Vec<usize> = (0..old.count()).collect();
        let new_indices: Vec<usize> = (0..self.count()).collect();
        DataDiffer::new(
            &old_indices,
            &new_indices,
            |&i: &usize, _| old.id_of(i),
            |&i: &usize, _| self.id_of(i),
        )
        .ops()
    }

    fn grow_state(&mut self) {
        let n = self.items.len();
        self.layouts.resize(n, None);
        self.visuals.resize(n, None);
        self.stack_bases.resize(n, 0.0);
        self.graphic_els.resize(n, None);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::vec;

    use super::*;

    #[test]
    fn identity_falls_back_from_id_to_name_to_index() {
        let data = SeriesData::new(vec![
            DataItem::value(1.0).with_id("a").with_name("x"),
            DataItem::value(2.0).with_name("y"),
            DataItem::value(3.0),
        ]);
        assert_eq!(data.id_of(0), "a");
        assert_eq!(data.id_of(1), "y");
        assert_ne!(data.id_of(2), data.id_of(1));
        assert_eq!(data.group_key_of(0), "a");
    }

    #[test]
    fn rebinding_an_element_moves_it() {
        let mut data = SeriesData::from_values([1.0, 2.0, 3.0]);
        let el = ElementId(7);
        data.set_item_graphic_el(0, Some(el));
        data.set_item_graphic_el(2, Some(el));
        assert_eq!(data.item_graphic_el(0), None);
        assert_eq!(data.item_graphic_el(2), Some(el));
        assert_eq!(data.index_of_el(el), Some(2));

        data.set_item_graphic_el(2, None);
        assert_eq!(data.index_of_el(el), None);
    }

    #[test]
    fn shallow_clone_shares_items_but_not_state() {
        let mut data = SeriesData::from_values([1.0, 2.0]);
        data.set_layout(0, ItemLayout::Rect(Rect::new(0.0, 0.0, 1.0, 1.0)));
        data.set_item_graphic_el(1, Some(ElementId(1)));

        let copy = data.clone_shallow();
        assert_eq!(copy.count(), 2);
        assert!(copy.layout(0).is_none());
        assert!(copy.item_graphic_el(1).is_none());
        assert_eq!(copy.value(1), Some(2.0));
    }

    #[test]
    fn sync_keeps_state_of_existing_items() {
        let mut raw = SeriesData::from_values([1.0, 2.0]);
        let mut out = raw.clone_shallow();
        out.set_layout(1, ItemLayout::Rect(Rect::new(0.0, 0.0, 2.0, 2.0)));

        raw.append([DataItem::value(3.0)]);
        out.sync_items(&raw);
        assert_eq!(out.count(), 3);
        assert!(out.layout(1).is_some());
        assert!(out.layout(2).is_none());
    }

    #[test]
    fn missing_or_nan_values_are_not_rendered() {
        let data = SeriesData::new(vec![
            DataItem::value(1.0),
            DataItem::value(f64::NAN),
            DataItem::default(),
        ]);
        assert!(data.has_value(0));
        assert!(!data.has_value(1));
        assert!(!data.has_value(2));
    }
}
