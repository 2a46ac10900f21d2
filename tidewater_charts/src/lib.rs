// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chart views and the frame loop for `tidewater_core`.
//!
//! This crate turns processed series data into an animated, retained scene:
//! - The **[`Scene`]** is an arena of shapes with transforms, opacity and running animations.
//! - **Views** ([`ChartView`]) reconcile a series against the elements they drew last time,
//!   reusing elements by item identity: [`BarView`], [`PictorialBarView`], [`BoxplotView`] and
//!   [`SunburstView`].
//! - **Stage handlers** ([`register_builtin_stages`]) stack, lay out and color series.
//! - **Universal transitions** morph elements from one series into another across option
//!   updates ([`apply_transition`], [`MorphPath`]).
//! - **[`Chart`]** drives all of it: call [`Chart::set_option`] to replace the series, then
//!   [`Chart::frame`] once per display frame while it returns `true`.
//!
//! Painting is out of scope; [`Scene::draw_list`] returns flattened paths with their paint for
//! any renderer to consume.

#![no_std]

extern crate alloc;

mod animation;
mod bar_view;
mod boxplot_view;
mod chart;
mod error;
#[cfg(not(feature = "std"))]
mod float;
mod morph;
mod pictorial_view;
mod scale;
mod scene;
mod shape;
mod stages;
mod sunburst_view;
mod symbol;
mod transition;
mod view;

pub use animation::{AnimationConfig, Easing};
pub use bar_view::BarView;
pub use boxplot_view::{BOX_POINTS, BoxplotView, box_path};
pub use chart::{Chart, ChartEnv};
pub use error::ChartError;
pub use morph::{DivideShape, MorphPath, combine_morph, divide_shape, separate_morph};
pub use pictorial_view::PictorialBarView;
pub use scale::{ScaleBand, ScaleLinear, stacked_value_domain};
pub use scene::{DrawItem, Element, ElementState, OnDone, Scene};
pub use shape::{Shape, Style};
pub use stages::{
    PALETTE, PRIORITY_LAYOUT, PRIORITY_PROCESSOR_STATISTIC, PRIORITY_VISUAL_GLOBAL, bar_layout,
    boxplot_layout, palette, register_builtin_stages, stack, sunburst_layout,
};
pub use sunburst_view::SunburstView;
pub use symbol::Symbol;
pub use transition::{TransitionItem, apply_transition, collect_items};
pub use view::{ANIMATION_THRESHOLD, ChartView, ViewCx, ViewFactory, series_animation};
