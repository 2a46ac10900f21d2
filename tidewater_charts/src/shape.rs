// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Element geometry and paint.

use kurbo::{BezPath, Circle, Rect, Shape as _};
use peniko::Brush;
use tidewater_core::{ItemVisual, SectorLayout};

/// Curve flattening tolerance used when converting shapes to paths.
pub(crate) const TOLERANCE: f64 = 0.1;

/// Geometry of a scene element.
///
/// Rects are not normalized: bar layouts run from the baseline (`y0`) to the value end
/// (`y1`), which lets growth animations start from a collapsed rect on the baseline.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    /// No geometry; the element only groups its children.
    Group,
    /// An axis-aligned rectangle.
    Rect(Rect),
    /// A ring sector.
    Sector(SectorLayout),
    /// An arbitrary path.
    Path(BezPath),
}

impl Shape {
    /// Returns the outline of this shape, `None` for groups.
    pub fn to_path(&self) -> Option<BezPath> {
        match self {
            Self::Group => None,
            Self::Rect(r) => Some(rect_path(*r)),
            Self::Sector(s) => Some(sector_path(s)),
            Self::Path(p) => Some(p.clone()),
        }
    }

    /// Returns the bounding box of the geometry.
    pub fn bounds(&self) -> Option<Rect> {
        match self {
            Self::Group => None,
            Self::Rect(r) => Some(r.abs()),
            Self::Sector(s) => Some(sector_path(s).bounding_box()),
            Self::Path(p) => Some(p.bounding_box()),
        }
    }

    /// Returns whether this is a group.
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group)
    }
}

fn rect_path(r: Rect) -> BezPath {
    let mut p = BezPath::new();
    p.move_to((r.x0, r.y0));
    p.line_to((r.x1, r.y0));
    p.line_to((r.x1, r.y1));
    p.line_to((r.x0, r.y1));
    p.close_path();
    p
}

fn sector_path(s: &SectorLayout) -> BezPath {
    let circle = Circle::new(s.center, s.r);
    let sweep = s.end_angle - s.start_angle;
    circle
        .segment(s.r0, s.start_angle, sweep)
        .path_elements(TOLERANCE)
        .collect()
}

pub(crate) fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

pub(crate) fn lerp_rect(a: Rect, b: Rect, t: f64) -> Rect {
    Rect::new(
        lerp(a.x0, b.x0, t),
        lerp(a.y0, b.y0, t),
        lerp(a.x1, b.x1, t),
        lerp(a.y1, b.y1, t),
    )
}

pub(crate) fn lerp_sector(a: &SectorLayout, b: &SectorLayout, t: f64) -> SectorLayout {
    SectorLayout {
        center: a.center.lerp(b.center, t),
        r0: lerp(a.r0, b.r0, t),
        r: lerp(a.r, b.r, t),
        start_angle: lerp(a.start_angle, b.start_angle, t),
        end_angle: lerp(a.end_angle, b.end_angle, t),
    }
}

/// Paint of a scene element.
#[derive(Clone, Debug, PartialEq)]
pub struct Style {
    /// Fill paint; `None` leaves the interior empty.
    pub fill: Option<Brush>,
    /// Outline paint.
    pub stroke: Option<Brush>,
    /// Outline width.
    pub stroke_width: f64,
    /// Opacity in `[0, 1]`, multiplied down the tree.
    pub opacity: f64,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            fill: Some(Brush::default()),
            stroke: None,
            stroke_width: 0.0,
            opacity: 1.0,
        }
    }
}

impl Style {
    /// A filled style.
    pub fn fill(fill: impl Into<Brush>) -> Self {
        Self {
            fill: Some(fill.into()),
            ..Self::default()
        }
    }

    /// An outline-only style.
    pub fn stroke(stroke: impl Into<Brush>, width: f64) -> Self {
        Self {
            fill: None,
            stroke: Some(stroke.into()),
            stroke_width: width,
            opacity: 1.0,
        }
    }

    /// Sets the opacity.
    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }
}

impl From<&ItemVisual> for Style {
    fn from(visual: &ItemVisual) -> Self {
        Self::fill(visual.fill.clone()).with_opacity(visual.opacity)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use core::f64::consts::FRAC_PI_2;

    use kurbo::Point;

    use super::*;

    #[test]
    fn unnormalized_rects_have_normalized_bounds() {
        let shape = Shape::Rect(Rect::new(0.0, 10.0, 4.0, 2.0));
        assert_eq!(shape.bounds(), Some(Rect::new(0.0, 2.0, 4.0, 10.0)));
        assert!(shape.to_path().is_some());
        assert_eq!(Shape::Group.to_path(), None);
    }

    #[test]
    fn sector_bounds_cover_the_quarter() {
        let sector = SectorLayout {
            center: Point::new(0.0, 0.0),
            r0: 5.0,
            r: 10.0,
            start_angle: 0.0,
            end_angle: FRAC_PI_2,
        };
        let b = Shape::Sector(sector).bounds().unwrap();
        assert!(b.x1 > 9.9 && b.y1 > 9.9);
        assert!(b.x0 > -0.1 && b.y0 > -0.1);
    }

    #[test]
    fn rect_interpolation_is_linear() {
        let a = Rect::new(0.0, 0.0, 0.0, 0.0);
        let b = Rect::new(2.0, 4.0, 6.0, 8.0);
        assert_eq!(lerp_rect(a, b, 0.5), Rect::new(1.0, 2.0, 3.0, 4.0));
    }
}
