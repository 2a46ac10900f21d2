// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Sunburst series view.

use alloc::boxed::Box;

use tidewater_core::{DataDiffer, DiffOp, ElementId, ItemLayout, SectorLayout, SeriesData};
use tracing::trace;

use crate::animation::AnimationConfig;
use crate::scene::{ElementState, OnDone, Scene};
use crate::shape::{Shape, Style};
use crate::stages::Tree;
use crate::view::{ChartView, ViewCx, fade_out_children};

/// Renders hierarchical data as ring sectors, one per node.
///
/// Old and new trees are walked together level by level; siblings are matched by item
/// identity, so a node keeps its piece wherever it moves among its siblings. Nodes with a
/// zero value are not drawn and their subtrees are dropped.
#[derive(Debug)]
pub struct SunburstView {
    group: ElementId,
    old: Option<SeriesData>,
}

impl SunburstView {
    /// Creates the view with its group under the scene root.
    pub fn new(scene: &mut Scene) -> Self {
        let group = scene.create_in(scene.root(), Shape::Group, Style::default());
        Self { group, old: None }
    }

    /// A [`ViewFactory`](crate::ViewFactory) for sunburst series.
    pub fn factory(scene: &mut Scene) -> Box<dyn ChartView> {
        Box::new(Self::new(scene))
    }
}

struct Reconcile<'a> {
    group: ElementId,
    scene: &'a mut Scene,
    data: &'a mut SeriesData,
    old: &'a SeriesData,
    new_tree: &'a Tree,
    old_tree: &'a Tree,
    animation: &'a AnimationConfig,
}

impl Reconcile<'_> {
    fn dual_travel(&mut self, new_children: &[usize], old_children: &[usize]) {
        let (data, old) = (&*self.data, self.old);
        let ops = DataDiffer::new(
            old_children,
            new_children,
            |&i, _| old.id_of(i),
            |&i, _| data.id_of(i),
        )
        .ops();
        for op in ops {
            match op {
                DiffOp::Add(n) => self.process(Some(new_children[n]), None),
                DiffOp::Update { new, old } => {
                    self.process(Some(new_children[new]), Some(old_children[old]));
                }
                DiffOp::Remove(o) => self.process(None, Some(old_children[o])),
                _ => {}
            }
        }
    }

    fn process(&mut self, new: Option<usize>, old: Option<usize>) {
        let new = new.filter(|&i| self.data.value(i).is_some_and(|v| v != 0.0 && v.is_finite()));
        let el = old
            .and_then(|o| self.old.item_graphic_el(o))
            .filter(|el| self.scene.contains(*el));
        match (new, el) {
            (Some(index), Some(el)) => self.update_piece(index, el),
            (Some(index), None) => self.add_piece(index),
            (None, Some(el)) => remove_piece(self.scene, el, self.animation),
            (None, None) => {}
        }
        let (new_tree, old_tree) = (self.new_tree, self.old_tree);
        let new_children = new.map_or(&[][..], |i| new_tree.children_of(Some(i)));
        let old_children = old.map_or(&[][..], |o| old_tree.children_of(Some(o)));
        if !new_children.is_empty() || !old_children.is_empty() {
            self.dual_travel(new_children, old_children);
        }
    }

    fn add_piece(&mut self, index: usize) {
        let Some(ItemLayout::Sector(sector)) = self.data.layout(index) else {
            trace!(index, "sunburst node without sector layout");
            return;
        };
        let sector = *sector;
        let from = SectorLayout {
            end_angle: sector.start_angle,
            ..sector
        };
        let el = self
            .scene
            .create_in(self.group, Shape::Sector(from), item_style(self.data, index));
        if let Some(element) = self.scene.get_mut(el) {
            element.data_index = Some(index);
            element.label = self.data.item(index).and_then(|it| it.name.clone());
        }
        self.scene.animate_to(
            el,
            ElementState::shape(Shape::Sector(sector)),
            self.animation,
            OnDone::Keep,
        );
        self.data.set_item_graphic_el(index, Some(el));
    }

    fn update_piece(&mut self, index: usize, el: ElementId) {
        let Some(ItemLayout::Sector(sector)) = self.data.layout(index) else {
            remove_piece(self.scene, el, self.animation);
            return;
        };
        let sector = *sector;
        let style = item_style(self.data, index);
        let opacity = style.opacity;
        if let Some(element) = self.scene.get_mut(el) {
            element.style = Style {
                opacity: element.style.opacity,
                ..style
            };
            element.data_index = Some(index);
            element.label = self.data.item(index).and_then(|it| it.name.clone());
        }
        self.scene.animate_to(
            el,
            ElementState::shape(Shape::Sector(sector)).with_opacity(opacity),
            self.animation,
            OnDone::Keep,
        );
        self.data.set_item_graphic_el(index, Some(el));
    }
}

fn item_style(data: &SeriesData, index: usize) -> Style {
    data.visual(index).map(Style::from).unwrap_or_default()
}

fn remove_piece(scene: &mut Scene, el: ElementId, animation: &AnimationConfig) {
    let Some(element) = scene.get_mut(el) else {
        return;
    };
    element.label = None;
    let target = match element.shape {
        Shape::Sector(s) => ElementState::shape(Shape::Sector(SectorLayout {
            end_angle: s.start_angle,
            ..s
        })),
        _ => ElementState::default(),
    };
    scene.animate_to(el, target.with_opacity(0.0), animation, OnDone::Remove);
}

impl ChartView for SunburstView {
    fn group(&self) -> ElementId {
        self.group
    }

    fn render(&mut self, cx: &mut ViewCx<'_>) {
        let old = self.old.take().unwrap_or_default();
        let data = &mut cx.series.data;
        let new_tree = Tree::new(data);
        let old_tree = Tree::new(&old);
        let mut reconcile = Reconcile {
            group: self.group,
            scene: cx.scene,
            data,
            old: &old,
            new_tree: &new_tree,
            old_tree: &old_tree,
            animation: &cx.animation,
        };
        reconcile.dual_travel(&new_tree.roots, &old_tree.roots);
        self.old = Some(cx.series.data.clone());
    }

    fn remove(&mut self, scene: &mut Scene, animation: &AnimationConfig) {
        fade_out_children(scene, self.group, animation);
        self.old = None;
    }

    fn old_data(&self) -> Option<&SeriesData> {
        self.old.as_ref()
    }
}
