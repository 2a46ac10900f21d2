// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Universal transitions: morphing elements across series on option updates.
//!
//! Before an update, the elements of every series that opts in are recorded with their group
//! key (the item's group id, else its identity). After the views rendered the new option, the
//! recorded items are diffed against the new ones in [`DiffMode::Multiple`]:
//! - one-to-one pairs morph the new element out of the old one;
//! - many-to-one groups combine the old elements into the new one;
//! - one-to-many groups split the old element into the new ones;
//! - many-to-many groups are paired by item identity.
//!
//! Only old elements the views are already removing take part; an element a view kept is
//! animated by that view. Taking part means the removal is frozen where it is and the element
//! is baked under the scene root, so the morph starts from what is on screen.

use alloc::string::String;
use alloc::vec::Vec;

use tidewater_core::{DataDiffer, DiffMode, DiffOp, ElementId, SeriesData, SeriesId, resolve_many_to_many};
use tracing::debug;

use crate::animation::AnimationConfig;
use crate::morph::{DivideShape, combine_morph, separate_morph};
use crate::scene::Scene;

/// An element recorded for a universal transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionItem {
    /// Series the item belongs to.
    pub series: SeriesId,
    /// Group key: the group id, else the item identity.
    pub group_key: String,
    /// Item identity.
    pub id: String,
    /// The element bound to the item.
    pub el: ElementId,
}

/// Records the elements bound to the items of `data`.
///
/// Items without an element, and elements that only group other elements, are skipped.
pub fn collect_items(series: SeriesId, data: &SeriesData, scene: &Scene) -> Vec<TransitionItem> {
    data.graphic_els()
        .filter(|(_, el)| scene.get(*el).is_some_and(|e| !e.shape.is_group()))
        .map(|(index, el)| TransitionItem {
            series,
            group_key: data.group_key_of(index),
            id: data.id_of(index),
            el,
        })
        .collect()
}

/// Morphs leaving `old` elements into the `new` ones. Returns the number of morphs started.
pub fn apply_transition(
    scene: &mut Scene,
    old: &[TransitionItem],
    new: &[TransitionItem],
    divide: DivideShape,
    animation: &AnimationConfig,
) -> usize {
    let ops = DataDiffer::new(
        old,
        new,
        |it, _| it.group_key.clone(),
        |it, _| it.group_key.clone(),
    )
    .with_mode(DiffMode::Multiple)
    .ops();
    let mut morphs = 0;
    for op in ops {
        match op {
            DiffOp::Update { new: n, old: o } => {
                morphs += usize::from(one_to_one(scene, &old[o], &new[n], animation));
            }
            DiffOp::ManyToOne { new: n, old: os } => {
                let from: Vec<ElementId> = os
                    .iter()
                    .map(|&o| old[o].el)
                    .filter(|el| *el != new[n].el && is_leaving(scene, *el))
                    .collect();
                if from.is_empty() {
                    continue;
                }
                for el in &from {
                    rescue(scene, *el);
                }
                combine_morph(scene, &from, new[n].el, divide, animation);
                morphs += 1;
            }
            DiffOp::OneToMany { new: ns, old: o } => {
                let from = old[o].el;
                let to: Vec<ElementId> = ns.iter().map(|&n| new[n].el).filter(|el| *el != from).collect();
                if to.is_empty() || !is_leaving(scene, from) {
                    continue;
                }
                rescue(scene, from);
                separate_morph(scene, from, &to, divide, animation);
                morphs += 1;
            }
            DiffOp::ManyToMany { new: ns, old: os } => {
                let pairs = resolve_many_to_many(&ns, &os, |n| new[n].id.clone(), |o| old[o].id.clone());
                for pair in pairs {
                    if let DiffOp::Update { new: n, old: o } = pair {
                        morphs += usize::from(one_to_one(scene, &old[o], &new[n], animation));
                    }
                }
            }
            DiffOp::Add(_) | DiffOp::Remove(_) => {}
        }
    }
    if morphs > 0 {
        debug!(morphs, "universal transition");
    }
    morphs
}

fn one_to_one(
    scene: &mut Scene,
    old: &TransitionItem,
    new: &TransitionItem,
    animation: &AnimationConfig,
) -> bool {
    if old.el == new.el || !is_leaving(scene, old.el) {
        return false;
    }
    rescue(scene, old.el);
    separate_morph(scene, old.el, &[new.el], DivideShape::Clone, animation);
    true
}

/// Returns whether an element, or one of its ancestors, is animating out.
fn is_leaving(scene: &Scene, el: ElementId) -> bool {
    let mut cursor = Some(el);
    while let Some(cur) = cursor {
        let Some(element) = scene.get(cur) else {
            return false;
        };
        if element.is_removing() {
            return true;
        }
        cursor = element.parent();
    }
    false
}

/// Freezes a leaving element where it is and moves it under the root without moving it on
/// screen.
fn rescue(scene: &mut Scene, el: ElementId) {
    scene.cancel_animation(el);
    scene.bake_transform(el);
    scene.add_child(scene.root(), el);
}
