// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The view contract.
//!
//! A view owns a group element in the [`Scene`] and reconciles it against the processed data
//! of one series whenever its render task runs. Views keep the data they rendered last so the
//! next render can diff against it and reuse elements by item identity.

use alloc::boxed::Box;
use core::fmt;

use tidewater_core::{ElementId, Payload, ProgressParams, SeriesData, SeriesModel};

use crate::animation::AnimationConfig;
use crate::scene::{ElementState, OnDone, Scene};

/// Item count above which update animations are skipped.
pub const ANIMATION_THRESHOLD: usize = 2000;

/// What a view sees while rendering.
#[derive(Debug)]
pub struct ViewCx<'a> {
    /// The series being rendered.
    pub series: &'a mut SeriesModel,
    /// The scene holding the view's group.
    pub scene: &'a mut Scene,
    /// The payload of the current update.
    pub payload: Option<&'a Payload>,
    /// Animation for this render, already disabled where the series asks for it.
    pub animation: AnimationConfig,
}

impl ViewCx<'_> {
    /// Returns the processed data of the series.
    pub fn data(&self) -> &SeriesData {
        &self.series.data
    }
}

/// Returns the animation to use for a series.
///
/// Series that turn animation off, or that are too large to animate, update immediately.
pub fn series_animation(series: &SeriesModel, base: &AnimationConfig) -> AnimationConfig {
    if !series.options.animation || series.data.count() > ANIMATION_THRESHOLD {
        AnimationConfig::DISABLED
    } else {
        *base
    }
}

/// A chart view: renders one series into a group of scene elements.
pub trait ChartView: fmt::Debug {
    /// Returns the group element holding everything the view draws.
    fn group(&self) -> ElementId;

    /// Renders the whole series, reusing elements of the previous render.
    fn render(&mut self, cx: &mut ViewCx<'_>);

    /// Prepares for a progressive render; the following `incremental_render` calls cover the
    /// data in chunks.
    fn incremental_prepare_render(&mut self, cx: &mut ViewCx<'_>) {
        let _ = cx;
    }

    /// Renders one chunk of a progressive render.
    fn incremental_render(&mut self, params: &ProgressParams, cx: &mut ViewCx<'_>) {
        let _ = (params, cx);
    }

    /// Returns whether the view implements progressive rendering.
    fn supports_incremental(&self) -> bool {
        false
    }

    /// Removes everything the view drew and forgets its previous data.
    fn remove(&mut self, scene: &mut Scene, animation: &AnimationConfig);

    /// Returns the data of the last render.
    fn old_data(&self) -> Option<&SeriesData>;

    /// Fades the view's group out and removes it. The view is unusable afterwards.
    fn dispose(&mut self, scene: &mut Scene, animation: &AnimationConfig) {
        scene.animate_to(
            self.group(),
            ElementState::opacity(0.0),
            animation,
            OnDone::Remove,
        );
    }
}

/// Creates a view whose group lives under the scene root.
pub type ViewFactory = fn(&mut Scene) -> Box<dyn ChartView>;

/// Fades out every child of `group` and forgets them.
pub(crate) fn fade_out_children(scene: &mut Scene, group: ElementId, animation: &AnimationConfig) {
    for child in scene.children(group).to_vec() {
        if let Some(el) = scene.get_mut(child) {
            el.label = None;
        }
        scene.animate_to(child, ElementState::opacity(0.0), animation, OnDone::Remove);
    }
}
