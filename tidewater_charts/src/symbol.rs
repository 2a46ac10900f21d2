// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Symbol shapes for pictorial bars.

use kurbo::{BezPath, Circle, Point, Shape};

/// A small set of symbol shapes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// A square (axis-aligned).
    #[default]
    Rect,
    /// A circle.
    Circle,
    /// An upward triangle.
    Triangle,
    /// A diamond.
    Diamond,
}

impl Symbol {
    /// Parses a symbol name; unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rect" | "square" => Some(Self::Rect),
            "circle" => Some(Self::Circle),
            "triangle" => Some(Self::Triangle),
            "diamond" => Some(Self::Diamond),
            _ => None,
        }
    }

    /// Returns a path for this symbol centered at `center`, using `size` as the diameter/side.
    pub fn path(self, center: Point, size: f64) -> BezPath {
        let half = size * 0.5;
        let Point { x: cx, y: cy } = center;
        match self {
            Self::Rect => polygon(&[
                (cx - half, cy - half),
                (cx + half, cy - half),
                (cx + half, cy + half),
                (cx - half, cy + half),
            ]),
            Self::Triangle => polygon(&[(cx, cy - half), (cx + half, cy + half), (cx - half, cy + half)]),
            Self::Diamond => polygon(&[(cx, cy - half), (cx + half, cy), (cx, cy + half), (cx - half, cy)]),
            Self::Circle => {
                // Tolerance in scene units; symbols are small.
                Circle::new(center, half).path_elements(0.1).collect()
            }
        }
    }
}

fn polygon(points: &[(f64, f64)]) -> BezPath {
    let mut p = BezPath::new();
    let mut iter = points.iter().copied();
    if let Some(first) = iter.next() {
        p.move_to(first);
        for pt in iter {
            p.line_to(pt);
        }
        p.close_path();
    }
    p
}

#[cfg(test)]
mod tests {
    extern crate std;

    use kurbo::Rect;

    use super::*;

    #[test]
    fn symbols_fit_their_size() {
        for symbol in [Symbol::Rect, Symbol::Circle, Symbol::Triangle, Symbol::Diamond] {
            let bounds = symbol.path(Point::new(10.0, 10.0), 4.0).bounding_box();
            let expected = Rect::new(8.0, 8.0, 12.0, 12.0);
            assert!((bounds.x0 - expected.x0).abs() < 0.2, "{symbol:?}");
            assert!((bounds.y1 - expected.y1).abs() < 0.2, "{symbol:?}");
        }
    }

    #[test]
    fn names_parse() {
        assert_eq!(Symbol::from_name("square"), Some(Symbol::Rect));
        assert_eq!(Symbol::from_name("pin"), None);
    }
}
