// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A retained scene of animated elements.
//!
//! Elements live in an arena keyed by [`ElementId`] and form a tree under [`Scene::root`].
//! Views create elements, bind them to data items, and change them through
//! [`Scene::animate_to`]; the embedder drives time with [`Scene::advance`] and paints the
//! result of [`Scene::draw_list`].
//!
//! Every element runs at most one animation. Starting a new one freezes the running one at its
//! current interpolated values, so retargeting never snaps.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};
use kurbo::{Affine, BezPath, Rect};
use tidewater_core::{ElementId, SectorLayout};
use tracing::trace;

use crate::animation::AnimationConfig;
use crate::morph::MorphPath;
use crate::shape::{Shape, Style, lerp, lerp_rect, lerp_sector};

/// One node of the scene tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    /// Geometry in local coordinates.
    pub shape: Shape,
    /// Paint.
    pub style: Style,
    /// Local transform, applied after the parent's.
    pub transform: Affine,
    /// Optional label text.
    pub label: Option<String>,
    /// Index of the data item this element currently stands for.
    pub data_index: Option<usize>,
    /// Hidden elements (and their subtrees) are not drawn.
    pub ignore: bool,
    /// Paint order among siblings; ties keep insertion order.
    pub z: i32,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    removing: bool,
}

impl Element {
    fn new(shape: Shape, style: Style) -> Self {
        Self {
            shape,
            style,
            transform: Affine::IDENTITY,
            label: None,
            data_index: None,
            ignore: false,
            z: 0,
            parent: None,
            children: Vec::new(),
            removing: false,
        }
    }

    /// Returns the parent element.
    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    /// Returns the children in insertion order.
    pub fn children(&self) -> &[ElementId] {
        &self.children
    }

    /// Returns whether the element plays an animation that ends with its removal.
    pub fn is_removing(&self) -> bool {
        self.removing
    }
}

/// Animatable properties; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ElementState {
    /// Target geometry.
    pub shape: Option<Shape>,
    /// Target opacity.
    pub opacity: Option<f64>,
    /// Target local transform.
    pub transform: Option<Affine>,
}

impl ElementState {
    /// Targets a shape.
    pub fn shape(shape: Shape) -> Self {
        Self {
            shape: Some(shape),
            ..Self::default()
        }
    }

    /// Targets an opacity.
    pub fn opacity(opacity: f64) -> Self {
        Self::default().with_opacity(opacity)
    }

    /// Every animatable property of `el`.
    pub fn of(el: &Element) -> Self {
        Self {
            shape: Some(el.shape.clone()),
            opacity: Some(el.style.opacity),
            transform: Some(el.transform),
        }
    }

    /// Sets the target opacity.
    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = Some(opacity);
        self
    }

    /// Sets the target transform.
    pub fn with_transform(mut self, transform: Affine) -> Self {
        self.transform = Some(transform);
        self
    }

    fn apply(self, el: &mut Element) {
        if let Some(shape) = self.shape {
            el.shape = shape;
        }
        if let Some(opacity) = self.opacity {
            el.style.opacity = opacity;
        }
        if let Some(transform) = self.transform {
            el.transform = transform;
        }
    }
}

/// What happens when an animation completes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OnDone {
    /// The element stays.
    #[default]
    Keep,
    /// The element and its subtree are removed.
    Remove,
    /// The element is removed and the given element is shown.
    Reveal(ElementId),
}

#[derive(Debug)]
enum ShapeTween {
    Rect(Rect, Rect),
    Sector(SectorLayout, SectorLayout),
    Morph(MorphPath, Shape),
    Snap(Shape),
}

impl ShapeTween {
    fn new(from: &Shape, to: Shape) -> Self {
        match (from, &to) {
            (Shape::Rect(a), Shape::Rect(b)) => Self::Rect(*a, *b),
            (Shape::Sector(a), Shape::Sector(b)) => Self::Sector(*a, *b),
            _ => match (from.to_path(), to.to_path()) {
                (Some(a), Some(b)) => Self::Morph(MorphPath::new(&a, &b), to),
                _ => Self::Snap(to),
            },
        }
    }

    fn at(&self, t: f64) -> Option<Shape> {
        match self {
            Self::Rect(a, b) => Some(Shape::Rect(lerp_rect(*a, *b, t))),
            Self::Sector(a, b) => Some(Shape::Sector(lerp_sector(a, b, t))),
            Self::Morph(_, target) if t >= 1.0 => Some(target.clone()),
            Self::Morph(morph, _) => Some(Shape::Path(morph.at(t))),
            Self::Snap(target) => (t >= 1.0).then(|| target.clone()),
        }
    }
}

#[derive(Debug)]
struct Animator {
    el: ElementId,
    shape: Option<ShapeTween>,
    opacity: Option<(f64, f64)>,
    transform: Option<(Affine, Affine)>,
    config: AnimationConfig,
    elapsed: f64,
    on_done: OnDone,
}

impl Animator {
    fn apply(&self, el: &mut Element, t: f64) {
        if let Some(shape) = self.shape.as_ref().and_then(|s| s.at(t)) {
            el.shape = shape;
        }
        if let Some((a, b)) = self.opacity {
            el.style.opacity = lerp(a, b, t);
        }
        if let Some((a, b)) = self.transform {
            el.transform = lerp_affine(a, b, t);
        }
    }
}

fn lerp_affine(a: Affine, b: Affine, t: f64) -> Affine {
    let (a, b) = (a.as_coeffs(), b.as_coeffs());
    let mut out = [0.0; 6];
    for (i, c) in out.iter_mut().enumerate() {
        *c = lerp(a[i], b[i], t);
    }
    Affine::new(out)
}

/// A drawable element in scene coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawItem {
    /// The element.
    pub id: ElementId,
    /// Outline with the computed transform applied.
    pub path: BezPath,
    /// Paint, with the opacity of every ancestor multiplied in.
    pub style: Style,
    /// Label text.
    pub label: Option<String>,
}

/// Arena of elements plus their running animations.
#[derive(Debug)]
pub struct Scene {
    elements: HashMap<ElementId, Element>,
    root: ElementId,
    next_id: u64,
    animators: Vec<Animator>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    /// Creates a scene holding only its root group.
    pub fn new() -> Self {
        let root = ElementId(0);
        let mut elements = HashMap::new();
        elements.insert(root, Element::new(Shape::Group, Style::default()));
        Self {
            elements,
            root,
            next_id: 1,
            animators: Vec::new(),
        }
    }

    /// Returns the root group.
    pub fn root(&self) -> ElementId {
        self.root
    }

    /// Returns the number of elements, root included.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns whether the scene holds only its root.
    pub fn is_empty(&self) -> bool {
        self.elements.len() <= 1
    }

    /// Returns whether `id` is alive.
    pub fn contains(&self, id: ElementId) -> bool {
        self.elements.contains_key(&id)
    }

    /// Returns an element.
    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    /// Returns an element mutably.
    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.elements.get_mut(&id)
    }

    /// Returns the children of an element.
    pub fn children(&self, id: ElementId) -> &[ElementId] {
        self.elements.get(&id).map_or(&[], |el| el.children())
    }

    /// Creates a detached element.
    pub fn create(&mut self, shape: Shape, style: Style) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        self.elements.insert(id, Element::new(shape, style));
        id
    }

    /// Creates an element as the last child of `parent`.
    pub fn create_in(&mut self, parent: ElementId, shape: Shape, style: Style) -> ElementId {
        let id = self.create(shape, style);
        self.add_child(parent, id);
        id
    }

    /// Moves `child` under `parent`, after its existing children.
    ///
    /// Moves that would create a cycle are ignored.
    pub fn add_child(&mut self, parent: ElementId, child: ElementId) {
        if !self.contains(parent) || !self.contains(child) || self.is_ancestor(child, parent) {
            return;
        }
        self.detach(child);
        if let Some(p) = self.elements.get_mut(&parent) {
            p.children.push(child);
        }
        if let Some(c) = self.elements.get_mut(&child) {
            c.parent = Some(parent);
        }
    }

    /// Returns whether `ancestor` is `id` or one of its ancestors.
    fn is_ancestor(&self, ancestor: ElementId, id: ElementId) -> bool {
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            if cur == ancestor {
                return true;
            }
            cursor = self.elements.get(&cur).and_then(|el| el.parent);
        }
        false
    }

    /// Detaches an element from its parent; it stays alive but is no longer drawn.
    pub fn detach(&mut self, id: ElementId) {
        let Some(parent) = self.elements.get_mut(&id).and_then(|el| el.parent.take()) else {
            return;
        };
        if let Some(p) = self.elements.get_mut(&parent) {
            p.children.retain(|c| *c != id);
        }
    }

    /// Removes an element and its subtree immediately, dropping their animations.
    ///
    /// Removing the root only removes its children.
    pub fn remove_now(&mut self, id: ElementId) {
        if id == self.root {
            self.remove_children_now(id);
            return;
        }
        if !self.contains(id) {
            return;
        }
        self.detach(id);
        let mut removed = HashSet::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(el) = self.elements.remove(&cur) {
                stack.extend(el.children);
                removed.insert(cur);
            }
        }
        trace!(%id, count = removed.len(), "removed elements");
        self.animators.retain(|a| !removed.contains(&a.el));
    }

    /// Removes every child of an element immediately.
    pub fn remove_children_now(&mut self, id: ElementId) {
        let children = self.children(id).to_vec();
        for child in children {
            self.remove_now(child);
        }
    }

    /// Animates an element towards `target`, running `on_done` when it completes.
    ///
    /// A running animation on the same element is frozen at its current values first. With a
    /// config that takes no time the target applies immediately and `on_done` runs at once.
    pub fn animate_to(
        &mut self,
        id: ElementId,
        target: ElementState,
        config: &AnimationConfig,
        on_done: OnDone,
    ) {
        self.cancel_animation(id);
        let Some(el) = self.elements.get_mut(&id) else {
            return;
        };
        if !config.is_animated() {
            target.apply(el);
            self.complete(id, on_done);
            return;
        }
        el.removing = on_done != OnDone::Keep;
        let animator = Animator {
            el: id,
            shape: target.shape.map(|to| ShapeTween::new(&el.shape, to)),
            opacity: target.opacity.map(|to| (el.style.opacity, to)),
            transform: target.transform.map(|to| (el.transform, to)),
            config: *config,
            elapsed: 0.0,
            on_done,
        };
        self.animators.push(animator);
    }

    /// Jumps the animation of an element to its end state without running its completion.
    pub fn stop_animation(&mut self, id: ElementId) {
        self.drop_animations(id, true);
    }

    /// Freezes the animation of an element at its current values without running its
    /// completion.
    pub fn cancel_animation(&mut self, id: ElementId) {
        self.drop_animations(id, false);
    }

    fn drop_animations(&mut self, id: ElementId, jump_to_end: bool) {
        let Self {
            elements,
            animators,
            ..
        } = self;
        let mut revealed = Vec::new();
        animators.retain(|a| {
            if a.el != id {
                return true;
            }
            if let Some(el) = elements.get_mut(&id) {
                if jump_to_end {
                    a.apply(el, 1.0);
                }
                el.removing = false;
            }
            if let OnDone::Reveal(other) = a.on_done {
                revealed.push(other);
            }
            false
        });
        for other in revealed {
            if let Some(el) = elements.get_mut(&other) {
                el.ignore = false;
            }
        }
    }

    /// Returns whether an element is animating.
    pub fn is_animating(&self, id: ElementId) -> bool {
        self.animators.iter().any(|a| a.el == id)
    }

    /// Returns whether any element is animating.
    pub fn has_animations(&self) -> bool {
        !self.animators.is_empty()
    }

    /// Advances every animation by `dt` seconds and runs completions.
    ///
    /// Returns whether animations remain.
    pub fn advance(&mut self, dt: f64) -> bool {
        let mut finished = Vec::new();
        let Self {
            elements,
            animators,
            ..
        } = self;
        animators.retain_mut(|a| {
            a.elapsed += dt;
            let Some(el) = elements.get_mut(&a.el) else {
                return false;
            };
            if a.config.is_done(a.elapsed) {
                a.apply(el, 1.0);
                finished.push((a.el, a.on_done));
                return false;
            }
            if let Some(t) = a.config.progress(a.elapsed) {
                a.apply(el, t);
            }
            true
        });
        for (id, on_done) in finished {
            self.complete(id, on_done);
        }
        self.has_animations()
    }

    fn complete(&mut self, id: ElementId, on_done: OnDone) {
        match on_done {
            OnDone::Keep => {
                if let Some(el) = self.elements.get_mut(&id) {
                    el.removing = false;
                }
            }
            OnDone::Remove => self.remove_now(id),
            OnDone::Reveal(other) => {
                self.remove_now(id);
                if let Some(el) = self.elements.get_mut(&other) {
                    el.ignore = false;
                }
            }
        }
    }

    /// Returns the transform from an element's local coordinates to scene coordinates.
    pub fn computed_transform(&self, id: ElementId) -> Affine {
        let mut transform = Affine::IDENTITY;
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            let Some(el) = self.elements.get(&cur) else {
                break;
            };
            transform = el.transform * transform;
            cursor = el.parent;
        }
        transform
    }

    /// Folds the ancestors' transforms into the local transform and detaches the element, so
    /// it can be re-parented under the root without moving.
    pub fn bake_transform(&mut self, id: ElementId) {
        let transform = self.computed_transform(id);
        self.detach(id);
        if let Some(el) = self.elements.get_mut(&id) {
            el.transform = transform;
        }
    }

    /// Returns every visible element with geometry, in paint order.
    pub fn draw_list(&self) -> Vec<DrawItem> {
        let mut out = Vec::new();
        self.collect(self.root, Affine::IDENTITY, 1.0, &mut out);
        out
    }

    fn collect(&self, id: ElementId, parent: Affine, opacity: f64, out: &mut Vec<DrawItem>) {
        let Some(el) = self.elements.get(&id) else {
            return;
        };
        if el.ignore {
            return;
        }
        let transform = parent * el.transform;
        let opacity = opacity * el.style.opacity;
        if let Some(mut path) = el.shape.to_path() {
            path.apply_affine(transform);
            out.push(DrawItem {
                id,
                path,
                style: Style {
                    opacity,
                    ..el.style.clone()
                },
                label: el.label.clone(),
            });
        }
        let mut children: Vec<&ElementId> = el.children.iter().collect();
        children.sort_by_key(|c| self.elements.get(*c).map_or(0, |el| el.z));
        for child in children {
            self.collect(*child, transform, opacity, out);
        }
    }
}
