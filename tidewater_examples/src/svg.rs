// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Minimal SVG dump of a scene's draw list.

use kurbo::{Rect, Shape as _};
use peniko::Brush;
use tidewater_charts::DrawItem;

const LABEL_FONT_SIZE: f64 = 10.0;

/// Renders `items` in paint order. The view box is the viewport grown to fit every item.
pub(crate) fn to_svg_string(items: &[DrawItem], viewport: Rect) -> String {
    let view_box = items
        .iter()
        .map(|item| item.path.bounding_box())
        .fold(viewport, |acc, b| acc.union(b))
        .inflate(10.0, 10.0);
    let mut out = String::new();
    out.push_str(r#"<svg xmlns="http://www.w3.org/2000/svg" "#);
    out.push_str(&format!(
        r#"viewBox="{} {} {} {}" width="{}" height="{}" preserveAspectRatio="xMinYMin meet">"#,
        view_box.x0,
        view_box.y0,
        view_box.width(),
        view_box.height(),
        view_box.width(),
        view_box.height()
    ));
    out.push('\n');

    for item in items {
        if item.style.opacity <= 0.0 {
            continue;
        }
        out.push_str(&format!(r#"<path d="{}""#, item.path.to_svg()));
        match &item.style.fill {
            Some(fill) => write_paint_attr(&mut out, "fill", fill),
            None => out.push_str(r#" fill="none""#),
        }
        if let Some(stroke) = &item.style.stroke {
            write_paint_attr(&mut out, "stroke", stroke);
            out.push_str(&format!(r#" stroke-width="{}""#, item.style.stroke_width));
        }
        if item.style.opacity < 1.0 {
            out.push_str(&format!(r#" opacity="{}""#, item.style.opacity));
        }
        out.push_str("/>\n");

        if let Some(label) = &item.label {
            let anchor = item.path.bounding_box().center();
            out.push_str(&format!(
                r#"<text x="{}" y="{}" font-size="{LABEL_FONT_SIZE}" text-anchor="middle" dominant-baseline="middle">"#,
                anchor.x, anchor.y
            ));
            out.push_str(&escape_xml(label));
            out.push_str("</text>\n");
        }
    }

    out.push_str("</svg>\n");
    out
}

fn svg_paint(brush: &Brush) -> (String, Option<f64>) {
    match brush {
        Brush::Solid(color) => {
            let rgba = color.to_rgba8();
            let fill = format!("#{:02x}{:02x}{:02x}", rgba.r, rgba.g, rgba.b);
            let fill_opacity = if rgba.a == 255 {
                None
            } else {
                Some(f64::from(rgba.a) / 255.0)
            };
            (fill, fill_opacity)
        }
        _ => ("none".to_string(), None),
    }
}

fn write_paint_attr(out: &mut String, name: &str, brush: &Brush) {
    let (value, opacity) = svg_paint(brush);
    out.push_str(&format!(r#" {name}="{value}""#));
    if let Some(o) = opacity {
        out.push_str(&format!(r#" {name}-opacity="{o}""#));
    }
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
