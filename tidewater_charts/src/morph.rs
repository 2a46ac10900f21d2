// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Path morphing.
//!
//! Two outlines are morphed by converting both to cubic subpaths, making them structurally
//! equal, then interpolating control points:
//! 1. The side with fewer subpaths is padded with subpaths collapsed at its bounding-box
//!    centre.
//! 2. Paired subpaths get the same segment count by repeatedly halving their longest segment.
//! 3. Paired closed subpaths are rotated so their anchors line up.
//!
//! [`combine_morph`] and [`separate_morph`] build on this to morph several elements into one
//! and back.

use alloc::vec;
use alloc::vec::Vec;

use kurbo::{BezPath, CubicBez, ParamCurve, PathEl, Point, QuadBez, Rect, Shape as _};
use tidewater_core::{ElementId, SectorLayout};

use crate::animation::AnimationConfig;
use crate::scene::{ElementState, OnDone, Scene};
use crate::shape::Shape;

/// A subpath as `[start, (c1, c2, end)*]`.
#[derive(Clone, Debug, PartialEq)]
struct Subpath {
    points: Vec<Point>,
    closed: bool,
}

impl Subpath {
    fn starting_at(p: Point) -> Self {
        Self {
            points: vec![p],
            closed: false,
        }
    }

    fn collapsed(p: Point, closed: bool) -> Self {
        Self {
            points: vec![p; 4],
            closed,
        }
    }

    fn segments(&self) -> usize {
        (self.points.len() - 1) / 3
    }

    fn push_line(&mut self, from: Point, to: Point) {
        self.points
            .extend([from.lerp(to, 1.0 / 3.0), from.lerp(to, 2.0 / 3.0), to]);
    }

    fn segment(&self, i: usize) -> CubicBez {
        let p = &self.points[3 * i..3 * i + 4];
        CubicBez::new(p[0], p[1], p[2], p[3])
    }

    /// Halves the longest segment until there are `target` segments.
    fn split_to(&mut self, target: usize) {
        while self.segments() < target {
            let Some(longest) = (0..self.segments()).max_by(|&a, &b| {
                let len = |i: usize| {
                    let c = self.segment(i);
                    (c.p3 - c.p0).hypot2()
                };
                len(a).total_cmp(&len(b))
            }) else {
                return;
            };
            let (left, right) = self.segment(longest).subdivide();
            let at = 3 * longest + 1;
            self.points.splice(
                at..at + 3,
                [left.p1, left.p2, left.p3, right.p1, right.p2, right.p3],
            );
        }
    }

    /// Rotates the segments of a closed subpath so its anchors best match `other`'s.
    fn align_to(&mut self, other: &Self) {
        let n = self.segments();
        if !self.closed || !other.closed || n < 2 || other.segments() != n {
            return;
        }
        let cost = |k: usize| -> f64 {
            (0..n)
                .map(|i| (self.points[3 * ((i + k) % n)] - other.points[3 * i]).hypot2())
                .sum()
        };
        let Some(best) = (0..n).min_by(|&a, &b| cost(a).total_cmp(&cost(b))) else {
            return;
        };
        if best == 0 {
            return;
        }
        let segments: Vec<[Point; 3]> = self.points[1..]
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        let mut points = Vec::with_capacity(self.points.len());
        points.push(self.points[3 * best]);
        for seg in segments[best..].iter().chain(&segments[..best]) {
            points.extend_from_slice(seg);
        }
        self.points = points;
    }
}

fn to_cubic_subpaths(path: &BezPath) -> Vec<Subpath> {
    let mut out = Vec::new();
    let mut current: Option<Subpath> = None;
    let mut start = Point::ZERO;
    let mut last = Point::ZERO;
    for el in path.elements() {
        match *el {
            PathEl::MoveTo(p) => {
                out.extend(current.take());
                current = Some(Subpath::starting_at(p));
                start = p;
                last = p;
            }
            PathEl::LineTo(p) => {
                current
                    .get_or_insert_with(|| Subpath::starting_at(last))
                    .push_line(last, p);
                last = p;
            }
            PathEl::QuadTo(q, p) => {
                let c = QuadBez::new(last, q, p).raise();
                current
                    .get_or_insert_with(|| Subpath::starting_at(last))
                    .points
                    .extend([c.p1, c.p2, c.p3]);
                last = p;
            }
            PathEl::CurveTo(c1, c2, p) => {
                current
                    .get_or_insert_with(|| Subpath::starting_at(last))
                    .points
                    .extend([c1, c2, p]);
                last = p;
            }
            PathEl::ClosePath => {
                if let Some(mut sub) = current.take() {
                    if last != start {
                        sub.push_line(last, start);
                    }
                    sub.closed = true;
                    out.push(sub);
                }
                last = start;
            }
        }
    }
    out.extend(current);
    for sub in &mut out {
        if sub.points.len() == 1 {
            let p = sub.points[0];
            sub.points.extend([p, p, p]);
        }
    }
    out
}

fn center_of(path: &BezPath) -> Point {
    if path.elements().is_empty() {
        return Point::ZERO;
    }
    path.bounding_box().center()
}

/// Two outlines made structurally equal for interpolation.
#[derive(Clone, Debug, PartialEq)]
pub struct MorphPath {
    from: Vec<Subpath>,
    to: Vec<Subpath>,
}

impl MorphPath {
    /// Prepares a morph from `from` to `to`.
    pub fn new(from: &BezPath, to: &BezPath) -> Self {
        let mut a = to_cubic_subpaths(from);
        let mut b = to_cubic_subpaths(to);
        let n = a.len().max(b.len()).max(1);
        let (ca, cb) = (center_of(from), center_of(to));
        while a.len() < n {
            let closed = b.get(a.len()).is_some_and(|s| s.closed);
            a.push(Subpath::collapsed(ca, closed));
        }
        while b.len() < n {
            let closed = a.get(b.len()).is_some_and(|s| s.closed);
            b.push(Subpath::collapsed(cb, closed));
        }
        for (sa, sb) in a.iter_mut().zip(b.iter_mut()) {
            let segments = sa.segments().max(sb.segments());
            sa.split_to(segments);
            sb.split_to(segments);
            sa.align_to(sb);
        }
        Self { from: a, to: b }
    }

    /// Returns the number of subpaths after normalization.
    pub fn subpath_count(&self) -> usize {
        self.from.len()
    }

    /// Returns the outline at `t` in `[0, 1]`.
    pub fn at(&self, t: f64) -> BezPath {
        let mut path = BezPath::new();
        for (a, b) in self.from.iter().zip(&self.to) {
            let p = |i: usize| a.points[i].lerp(b.points[i], t);
            path.move_to(p(0));
            for s in 0..a.segments() {
                path.curve_to(p(3 * s + 1), p(3 * s + 2), p(3 * s + 3));
            }
            if a.closed || b.closed {
                path.close_path();
            }
        }
        path
    }
}

/// How a shape is divided among several counterparts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DivideShape {
    /// Every counterpart gets the whole shape.
    #[default]
    Clone,
    /// Rects and sectors are cut into equal pieces; other shapes are cloned.
    Split,
}

/// Divides `shape` into `count` pieces.
pub fn divide_shape(shape: &Shape, count: usize, mode: DivideShape) -> Vec<Shape> {
    match (mode, shape) {
        (DivideShape::Split, Shape::Rect(r)) => split_rect(*r, count),
        (DivideShape::Split, Shape::Sector(s)) => split_sector(s, count),
        _ => vec![shape.clone(); count],
    }
}

fn split_rect(r: Rect, count: usize) -> Vec<Shape> {
    let n = count as f64;
    let horizontal = r.width().abs() >= r.height().abs();
    (0..count)
        .map(|i| {
            let (t0, t1) = (i as f64 / n, (i + 1) as f64 / n);
            let piece = if horizontal {
                let w = r.x1 - r.x0;
                Rect::new(r.x0 + w * t0, r.y0, r.x0 + w * t1, r.y1)
            } else {
                let h = r.y1 - r.y0;
                Rect::new(r.x0, r.y0 + h * t0, r.x1, r.y0 + h * t1)
            };
            Shape::Rect(piece)
        })
        .collect()
}

fn split_sector(s: &SectorLayout, count: usize) -> Vec<Shape> {
    let n = count as f64;
    let sweep = s.end_angle - s.start_angle;
    (0..count)
        .map(|i| {
            Shape::Sector(SectorLayout {
                start_angle: s.start_angle + sweep * i as f64 / n,
                end_angle: s.start_angle + sweep * (i + 1) as f64 / n,
                ..*s
            })
        })
        .collect()
}

/// Morphs several elements into one.
///
/// `to` is jumped to its final state and hidden; each element of `from` morphs into a piece of
/// it and is removed when done, after which `to` is shown. The `from` elements should already
/// be baked under the root.
pub fn combine_morph(
    scene: &mut Scene,
    from: &[ElementId],
    to: ElementId,
    divide: DivideShape,
    config: &AnimationConfig,
) {
    scene.stop_animation(to);
    let Some(target) = scene.get(to).map(ElementState::of) else {
        return;
    };
    let Some(shape) = target.shape.as_ref() else {
        return;
    };
    let live: Vec<ElementId> = from.iter().copied().filter(|el| scene.contains(*el)).collect();
    if live.is_empty() {
        return;
    }
    let pieces = divide_shape(shape, live.len(), divide);
    let transform = scene.computed_transform(to);
    if let Some(el) = scene.get_mut(to) {
        el.ignore = true;
    }
    for (i, (el, piece)) in live.iter().zip(pieces).enumerate() {
        scene.stop_animation(*el);
        let state = ElementState::shape(piece)
            .with_transform(transform)
            .with_opacity(target.opacity.unwrap_or(1.0));
        let on_done = if i == 0 {
            OnDone::Reveal(to)
        } else {
            OnDone::Remove
        };
        scene.animate_to(*el, state, config, on_done);
    }
}

/// Morphs one element into several.
///
/// Each element of `to` starts as a piece of `from` at `from`'s scene position and morphs to
/// its own final state; `from` is removed at once.
pub fn separate_morph(
    scene: &mut Scene,
    from: ElementId,
    to: &[ElementId],
    divide: DivideShape,
    config: &AnimationConfig,
) {
    scene.stop_animation(from);
    let Some(source) = scene.get(from) else {
        return;
    };
    let opacity = source.style.opacity;
    let pieces = divide_shape(&source.shape, to.len(), divide);
    let from_transform = scene.computed_transform(from);
    for (el, piece) in to.iter().zip(pieces) {
        scene.stop_animation(*el);
        let parent = scene.get(*el).and_then(|e| e.parent());
        let parent_transform = parent.map_or(kurbo::Affine::IDENTITY, |p| scene.computed_transform(p));
        let Some(element) = scene.get_mut(*el) else {
            continue;
        };
        let target = ElementState::of(element);
        element.shape = piece;
        element.transform = parent_transform.inverse() * from_transform;
        element.style.opacity = opacity;
        scene.animate_to(*el, target, config, OnDone::Keep);
    }
    scene.remove_now(from);
}

#[cfg(test)]
mod tests {
    extern crate std;

    use kurbo::{Circle, Shape as _};

    use super::*;
    use crate::animation::Easing;
    use crate::shape::Style;

    fn square(x: f64) -> BezPath {
        Rect::new(x, 0.0, x + 10.0, 10.0).to_path(0.1)
    }

    #[test]
    fn endpoints_reproduce_inputs() {
        let a = square(0.0);
        let b = Circle::new((5.0, 5.0), 5.0).to_path(0.1);
        let morph = MorphPath::new(&a, &b);
        let start = morph.at(0.0).bounding_box();
        let end = morph.at(1.0).bounding_box();
        assert!((start.x1 - 10.0).abs() < 1e-9);
        assert!((end.width() - 10.0).abs() < 0.05);
    }

    #[test]
    fn subpath_counts_are_padded() {
        let mut two = square(0.0);
        two.extend(square(20.0).elements().iter().copied());
        let morph = MorphPath::new(&square(0.0), &two);
        assert_eq!(morph.subpath_count(), 2);
        // The padded subpath grows out of the source centre.
        let first = morph.at(0.0);
        assert_eq!(first.bounding_box(), Rect::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn segments_are_split_to_match() {
        let mut tri = BezPath::new();
        tri.move_to((0.0, 0.0));
        tri.line_to((10.0, 0.0));
        tri.line_to((5.0, 10.0));
        tri.close_path();
        let morph = MorphPath::new(&tri, &square(0.0));
        assert_eq!(morph.from[0].segments(), morph.to[0].segments());
        assert_eq!(morph.from[0].segments(), 4);
    }

    #[test]
    fn split_divides_rects_and_sectors() {
        let pieces = divide_shape(&Shape::Rect(Rect::new(0.0, 0.0, 30.0, 10.0)), 3, DivideShape::Split);
        assert_eq!(pieces[1], Shape::Rect(Rect::new(10.0, 0.0, 20.0, 10.0)));
        let sector = SectorLayout {
            center: Point::ZERO,
            r0: 0.0,
            r: 1.0,
            start_angle: 0.0,
            end_angle: 2.0,
        };
        let pieces = divide_shape(&Shape::Sector(sector), 2, DivideShape::Split);
        let Shape::Sector(second) = &pieces[1] else {
            panic!("expected a sector");
        };
        assert_eq!((second.start_angle, second.end_angle), (1.0, 2.0));
        assert_eq!(divide_shape(&Shape::Group, 2, DivideShape::Split).len(), 2);
    }

    #[test]
    fn combine_reveals_target_after_pieces_finish() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.create_in(root, Shape::Rect(Rect::new(0.0, 0.0, 5.0, 5.0)), Style::default());
        let b = scene.create_in(root, Shape::Rect(Rect::new(10.0, 0.0, 15.0, 5.0)), Style::default());
        let to = scene.create_in(root, Shape::Rect(Rect::new(0.0, 0.0, 20.0, 10.0)), Style::default());
        let config = AnimationConfig::default()
            .with_duration(1.0)
            .with_easing(Easing::Linear);
        combine_morph(&mut scene, &[a, b], to, DivideShape::Split, &config);
        assert!(scene.get(to).unwrap().ignore);
        scene.advance(1.0);
        assert!(!scene.contains(a) && !scene.contains(b));
        assert!(!scene.get(to).unwrap().ignore);
    }

    #[test]
    fn separate_starts_pieces_from_source() {
        let mut scene = Scene::new();
        let root = scene.root();
        let from = scene.create_in(root, Shape::Rect(Rect::new(0.0, 0.0, 20.0, 10.0)), Style::default());
        let x = scene.create_in(root, Shape::Rect(Rect::new(0.0, 50.0, 5.0, 60.0)), Style::default());
        let y = scene.create_in(root, Shape::Rect(Rect::new(10.0, 50.0, 15.0, 60.0)), Style::default());
        let config = AnimationConfig::default().with_duration(1.0);
        separate_morph(&mut scene, from, &[x, y], DivideShape::Split, &config);
        assert!(!scene.contains(from));
        assert_eq!(scene.get(y).unwrap().shape, Shape::Rect(Rect::new(10.0, 0.0, 20.0, 10.0)));
        scene.advance(1.0);
        assert_eq!(scene.get(y).unwrap().shape, Shape::Rect(Rect::new(10.0, 50.0, 15.0, 60.0)));
    }
}
