// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Drives a Tidewater chart through option updates, progressive frames, appends and a
//! universal transition, dumping an SVG after each step.
//!
//! Usage: `tidewater_examples [OUTPUT_DIR]` (defaults to `target/tidewater_examples`).
//! Set `RUST_LOG=tidewater_core=debug` to watch the scheduler.

mod svg;

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use kurbo::Rect;
use tidewater_charts::{Chart, DivideShape};
use tidewater_core::{DataItem, SeriesData, SeriesId, SeriesModel, SeriesOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

const FRAME: f64 = 1.0 / 60.0;
const VIEWPORT: Rect = Rect::new(0.0, 0.0, 640.0, 400.0);

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let out_dir = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("target/tidewater_examples"), PathBuf::from);
    fs::create_dir_all(&out_dir)?;

    let mut chart = Chart::new(VIEWPORT)?.with_divide_shape(DivideShape::Split);

    // Two stacked bar series.
    let stacked = SeriesOptions::default()
        .with_stack("total")
        .with_universal_transition(true);
    chart.set_option(vec![
        quarters(1, "north", [120.0, 200.0, 150.0, 80.0]).with_options(stacked.clone()),
        quarters(2, "south", [60.0, 40.0, 90.0, 110.0]).with_options(stacked.clone()),
    ])?;
    let frames = settle(&mut chart)?;
    info!(frames, "stacked bars settled");
    dump(&chart, &out_dir, "01_stacked_bars.svg")?;

    // Same ids with new values: every bar keeps its element and animates.
    chart.set_option(vec![
        quarters(1, "north", [90.0, 210.0, 170.0, 60.0]).with_options(stacked.clone()),
        quarters(2, "south", [80.0, 20.0, 95.0, 130.0]).with_options(stacked.clone()),
    ])?;
    let frames = settle(&mut chart)?;
    info!(frames, "bar update settled");
    dump(&chart, &out_dir, "02_bar_update.svg")?;

    // Hide one series; the other relayouts around it.
    chart.set_series_hidden(SeriesId(2), true)?;
    settle(&mut chart)?;
    dump(&chart, &out_dir, "03_hidden_series.svg")?;
    chart.set_series_hidden(SeriesId(2), false)?;
    settle(&mut chart)?;

    // Bars morph into a sunburst: the quarters of a region combine into its root sector.
    let sunburst = SeriesData::new(vec![
        DataItem::value(360.0).with_id("north").with_name("north"),
        DataItem::value(280.0).with_id("north/h1").with_parent(0),
        DataItem::value(80.0).with_id("north/h2").with_parent(0),
        DataItem::value(325.0).with_id("south").with_name("south"),
        DataItem::value(100.0).with_id("south/h1").with_parent(3),
        DataItem::value(225.0).with_id("south/h2").with_parent(3),
    ]);
    chart.set_option(vec![
        SeriesModel::new(SeriesId(3), "sunburst", sunburst)
            .with_name("regions")
            .with_options(SeriesOptions::default().with_universal_transition(true)),
    ])?;
    let frames = settle(&mut chart)?;
    info!(frames, "bar to sunburst transition settled");
    dump(&chart, &out_dir, "04_sunburst.svg")?;

    // A large series rendered progressively, then grown by appends.
    let progressive = SeriesOptions::default()
        .with_progressive(500)
        .with_large(2000)
        .with_animation(false);
    chart.set_option(vec![
        SeriesModel::new(SeriesId(4), "bar", SeriesData::from_values(wave(0, 6000)))
            .with_name("wave")
            .with_options(progressive),
    ])?;
    let frames = settle(&mut chart)?;
    info!(frames, "progressive render finished");
    chart.append_data(SeriesId(4), wave(6000, 2000).map(DataItem::value))?;
    let frames = settle(&mut chart)?;
    info!(frames, "appended data rendered");
    dump(&chart, &out_dir, "05_progressive.svg")?;

    // Boxplots and a pictorial bar side by side.
    chart.set_option(vec![
        SeriesModel::new(
            SeriesId(5),
            "boxplot",
            SeriesData::new(vec![
                DataItem::values([850.0, 940.0, 980.0, 1050.0, 1070.0]).with_id("a"),
                DataItem::values([740.0, 880.0, 900.0, 920.0, 980.0]).with_id("b"),
                DataItem::values([800.0, 850.0, 880.0, 960.0, 1010.0]).with_id("c"),
            ]),
        ),
        SeriesModel::new(
            SeriesId(6),
            "pictorialBar",
            SeriesData::new(
                [("x", 30.0), ("y", 55.0), ("z", 20.0)]
                    .into_iter()
                    .map(|(id, v)| DataItem::value(v).with_id(id).with_symbol("diamond"))
                    .collect(),
            ),
        ),
    ])?;
    settle(&mut chart)?;
    dump(&chart, &out_dir, "06_boxplot_pictorial.svg")?;

    info!(dir = %out_dir.display(), "done");
    Ok(())
}

fn quarters(id: u64, name: &'static str, values: [f64; 4]) -> SeriesModel {
    let items = values
        .into_iter()
        .enumerate()
        .map(|(q, v)| {
            DataItem::value(v)
                .with_id(format!("{name}/q{}", q + 1))
                .with_group_id(name)
                .with_name(format!("Q{}", q + 1))
        })
        .collect();
    SeriesModel::new(SeriesId(id), "bar", SeriesData::new(items)).with_name(name)
}

fn wave(start: usize, count: usize) -> impl Iterator<Item = f64> {
    (start..start + count).map(|i| 50.0 + 40.0 * (i as f64 * 0.01).sin())
}

/// Runs frames until the chart is idle. Returns the number of frames.
fn settle(chart: &mut Chart) -> Result<usize, Box<dyn Error>> {
    let mut frames = 0;
    while chart.frame(FRAME)? {
        frames += 1;
    }
    Ok(frames)
}

fn dump(chart: &Chart, dir: &Path, name: &str) -> Result<(), Box<dyn Error>> {
    let svg = svg::to_svg_string(&chart.scene().draw_list(), VIEWPORT);
    let path = dir.join(name);
    fs::write(&path, svg)?;
    info!(path = %path.display(), "wrote");
    Ok(())
}
