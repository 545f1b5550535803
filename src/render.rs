//! Figures: heatmaps, faceted heatmap grids and line plots.

pub mod canvas;
pub mod colormap;
pub mod png;

use crate::coords::Coordinate;
use crate::data_array::DataArray;
use crate::error::ExplorerError;
use crate::metrics::FIGURES_RENDERED;

use canvas::Canvas;
use colormap::{ColorScale, Colormap, GREY, TAB10};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

const MARGIN: usize = 10;
const FACET_GAP: usize = 6;
const COLORBAR_GAP: usize = 10;
const COLORBAR_WIDTH: usize = 16;
/// Largest side of a single heatmap panel, in pixels
const PANEL_SIZE: usize = 480;
/// Largest side of a facet panel, in pixels
const FACET_SIZE: usize = 160;
const MAX_CELL: usize = 24;

const LINE_WIDTH: usize = 640;
const LINE_HEIGHT: usize = 400;
const LINE_LEFT: usize = 50;
const LINE_BOTTOM: usize = 40;

/// Options shared by all plots.
#[derive(Clone, Debug, Default)]
pub struct PlotOptions {
    /// Figure title; defaults to a description of the array
    pub title: Option<String>,
    /// Scale colours to the 2nd and 98th percentiles rather than the full range
    pub robust: bool,
    /// Colour map; chosen from the data range when unset
    pub colormap: Option<Colormap>,
    /// Maximum number of facet columns before wrapping
    pub col_wrap: Option<usize>,
}

impl PlotOptions {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn robust(mut self) -> Self {
        self.robust = true;
        self
    }

    pub fn col_wrap(mut self, col_wrap: usize) -> Self {
        self.col_wrap = Some(col_wrap);
        self
    }
}

/// A rendered figure.
#[derive(Clone, Debug)]
pub struct Figure {
    pub title: String,
    /// Kind of plot, e.g. `heatmap`
    pub kind: &'static str,
    pub width: usize,
    pub height: usize,
    /// PNG encoded image
    pub png: Vec<u8>,
}

impl Figure {
    fn new(
        kind: &'static str,
        title: String,
        canvas: &Canvas,
        mut text: Vec<(&str, String)>,
    ) -> Result<Self, ExplorerError> {
        text.insert(0, ("Title", title.clone()));
        text.push(("Software", env!("CARGO_PKG_NAME").to_string()));
        let png = canvas.to_png(&text)?;
        FIGURES_RENDERED.with_label_values(&[kind]).inc();
        tracing::debug!("Rendered {} {} ({} bytes)", kind, title, png.len());
        Ok(Self {
            title,
            kind,
            width: canvas.width(),
            height: canvas.height(),
            png,
        })
    }
}

/// Somewhere figures are shown.
pub trait Surface: Send + Sync {
    fn display(&self, figure: &Figure) -> Result<(), ExplorerError>;
}

/// A [Surface] writing numbered PNG files into a directory.
#[derive(Debug)]
pub struct DirectorySurface {
    dir: PathBuf,
    count: AtomicUsize,
}

impl DirectorySurface {
    /// Returns a surface writing into `dir`, creating it if needed.
    pub fn new(dir: &Path) -> Result<Self, ExplorerError> {
        std::fs::create_dir_all(dir).map_err(|source| ExplorerError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            count: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Surface for DirectorySurface {
    #[tracing::instrument(level = "debug", skip(self, figure), fields(title = %figure.title))]
    fn display(&self, figure: &Figure) -> Result<(), ExplorerError> {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(format!("{:02}-{}.png", n, slug(&figure.title)));
        std::fs::write(&path, &figure.png).map_err(|source| ExplorerError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!("Wrote {}", path.display());
        Ok(())
    }
}

/// Returns a file name fragment for a title.
fn slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "figure".to_string()
    } else {
        slug.to_string()
    }
}

fn title(array: &DataArray, options: &PlotOptions) -> String {
    options.title.clone().unwrap_or_else(|| array.to_string())
}

fn dimensions(array: &DataArray) -> String {
    array
        .dims
        .iter()
        .map(|dim| format!("{}: {}", dim.name, dim.len()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_error(plot: &'static str, reason: impl Into<String>) -> ExplorerError {
    ExplorerError::Render {
        plot,
        reason: reason.into(),
    }
}

/// Returns the side of one grid cell so that a panel fits within `size` pixels.
fn cell_size(rows: usize, columns: usize, size: usize) -> usize {
    (size / rows.max(columns).max(1)).clamp(1, MAX_CELL)
}

/// Draws a 2-D array with one coloured cell per value.
///
/// The first dimension runs vertically. When its coordinate ascends, as latitude usually does,
/// the first row is drawn at the bottom so that north is up.
fn draw_panel(
    canvas: &mut Canvas,
    panel: &DataArray,
    x: usize,
    y: usize,
    cell: usize,
    scale: &ColorScale,
) {
    let (rows, columns) = (panel.shape()[0], panel.shape()[1]);
    let north_up = matches!(panel.dims[0].coord, Coordinate::Numeric(_))
        && panel.dims[0].coord.is_ascending();
    for row in 0..rows {
        let screen_row = if north_up { rows - 1 - row } else { row };
        for column in 0..columns {
            canvas.fill_rect(
                x + column * cell,
                y + screen_row * cell,
                cell,
                cell,
                scale.color(panel.values[[row, column]]),
            );
        }
    }
}

/// Draws a vertical colour bar with the maximum at the top.
fn draw_colorbar(canvas: &mut Canvas, x: usize, y: usize, height: usize, scale: &ColorScale) {
    for row in 0..height {
        let t = if height > 1 {
            1.0 - row as f64 / (height - 1) as f64
        } else {
            0.5
        };
        canvas.fill_rect(x, y + row, COLORBAR_WIDTH, 1, scale.colormap.color(t));
    }
    canvas.stroke_rect(x, y, COLORBAR_WIDTH, height, GREY);
}

/// Renders a 2-D array as a heatmap with a colour bar.
#[tracing::instrument(level = "debug", skip_all, fields(array = %array))]
pub fn heatmap(array: &DataArray, options: &PlotOptions) -> Result<Figure, ExplorerError> {
    if array.ndim() != 2 {
        return Err(render_error(
            "heatmap",
            format!("expected 2 dimensions, got {}", array.ndim()),
        ));
    }
    let (rows, columns) = (array.shape()[0], array.shape()[1]);
    if rows == 0 || columns == 0 {
        return Err(render_error("heatmap", "array is empty"));
    }
    let scale = ColorScale::fit(&array.values, options.robust, options.colormap)?;
    let cell = cell_size(rows, columns, PANEL_SIZE);
    let (panel_width, panel_height) = (columns * cell, rows * cell);
    let mut canvas = Canvas::new(
        MARGIN + panel_width + COLORBAR_GAP + COLORBAR_WIDTH + MARGIN,
        MARGIN + panel_height + MARGIN,
    );
    draw_panel(&mut canvas, array, MARGIN, MARGIN, cell, &scale);
    draw_colorbar(
        &mut canvas,
        MARGIN + panel_width + COLORBAR_GAP,
        MARGIN,
        panel_height,
        &scale,
    );
    Figure::new(
        "heatmap",
        title(array, options),
        &canvas,
        vec![
            ("Dimensions", dimensions(array)),
            ("Colour scale", scale.to_string()),
        ],
    )
}

/// Renders a grid of heatmaps sharing one colour scale.
///
/// A 3-D array is split along `col` into panels laid out in rows of at most
/// [PlotOptions::col_wrap] panels. A 4-D array is split along `row` and `col`. The remaining two
/// dimensions are drawn as in [heatmap].
#[tracing::instrument(level = "debug", skip_all, fields(array = %array))]
pub fn facet_grid(
    array: &DataArray,
    col: &str,
    row: Option<&str>,
    options: &PlotOptions,
) -> Result<Figure, ExplorerError> {
    let expected = if row.is_some() { 4 } else { 3 };
    if array.ndim() != expected {
        return Err(render_error(
            "facet grid",
            format!("expected {} dimensions, got {}", expected, array.ndim()),
        ));
    }
    if array.values.is_empty() {
        return Err(render_error("facet grid", "array is empty"));
    }
    let scale = ColorScale::fit(&array.values, options.robust, options.colormap)?;

    // Panels with their grid positions.
    let mut panels: Vec<(usize, usize, DataArray)> = vec![];
    let col_axis = array.axis(col)?;
    let col_coord = array.dims[col_axis].coord.clone();
    let mut row_coord = None;
    let columns = match row {
        None => {
            let n = col_coord.len();
            let wrap = options.col_wrap.unwrap_or(n).clamp(1, n);
            for i in 0..n {
                panels.push((i / wrap, i % wrap, array.index_axis(col_axis, i)));
            }
            wrap
        }
        Some(row) => {
            let row_axis = array.axis(row)?;
            row_coord = Some((row, array.dims[row_axis].coord.clone()));
            for r in 0..array.shape()[row_axis] {
                let row_panel = array.index_axis(row_axis, r);
                let col_axis = row_panel.axis(col)?;
                for c in 0..col_coord.len() {
                    panels.push((r, c, row_panel.index_axis(col_axis, c)));
                }
            }
            col_coord.len()
        }
    };
    let grid_rows = panels.iter().map(|(r, _, _)| r + 1).max().unwrap_or(1);

    let (rows, cols) = (panels[0].2.shape()[0], panels[0].2.shape()[1]);
    let cell = cell_size(rows, cols, FACET_SIZE);
    let (panel_width, panel_height) = (cols * cell, rows * cell);
    let grid_width = columns * panel_width + (columns - 1) * FACET_GAP;
    let grid_height = grid_rows * panel_height + (grid_rows - 1) * FACET_GAP;
    let mut canvas = Canvas::new(
        MARGIN + grid_width + COLORBAR_GAP + COLORBAR_WIDTH + MARGIN,
        MARGIN + grid_height + MARGIN,
    );
    for (r, c, panel) in &panels {
        let x = MARGIN + c * (panel_width + FACET_GAP);
        let y = MARGIN + r * (panel_height + FACET_GAP);
        draw_panel(&mut canvas, panel, x, y, cell, &scale);
        canvas.stroke_rect(x, y, panel_width, panel_height, GREY);
    }
    draw_colorbar(
        &mut canvas,
        MARGIN + grid_width + COLORBAR_GAP,
        MARGIN,
        grid_height,
        &scale,
    );

    let labels = |dim: &str, coord: &Coordinate| {
        (0..coord.len())
            .map(|i| format!("{}={}", dim, coord.label(i)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut text = vec![
        ("Dimensions", dimensions(array)),
        ("Colour scale", scale.to_string()),
        ("Columns", labels(col, &col_coord)),
    ];
    if let Some((row, coord)) = &row_coord {
        text.push(("Rows", labels(row, coord)));
    }
    Figure::new("facet_grid", title(array, options), &canvas, text)
}

/// Returns positions along the x axis for a coordinate.
fn x_positions(coord: &Coordinate) -> Vec<f64> {
    match coord {
        Coordinate::Numeric(values) => values.clone(),
        Coordinate::Time(values) => match values.first() {
            Some(first) => values
                .iter()
                .map(|value| value.signed_duration_since(*first).num_seconds() as f64)
                .collect(),
            None => vec![],
        },
        Coordinate::Label(values) => (0..values.len()).map(|i| i as f64).collect(),
    }
}

/// Returns `(min, max)` of finite values, widened when they are equal.
fn extent(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|value| value.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), value| {
            (lo.min(value), hi.max(value))
        });
    if lo > hi {
        None
    } else if lo == hi {
        Some((lo - 1.0, hi + 1.0))
    } else {
        Some((lo, hi))
    }
}

/// Renders a 1-D array as a line, or a 2-D array as one line per entry of `hue`.
#[tracing::instrument(level = "debug", skip_all, fields(array = %array))]
pub fn line_plot(
    array: &DataArray,
    hue: Option<&str>,
    options: &PlotOptions,
) -> Result<Figure, ExplorerError> {
    let (x_dim, series, hue_coord) = match (array.ndim(), hue) {
        (1, None) => (0, vec![array.values.iter().copied().collect::<Vec<f64>>()], None),
        (2, Some(hue)) => {
            let hue_axis = array.axis(hue)?;
            let series = (0..array.shape()[hue_axis])
                .map(|i| array.index_axis(hue_axis, i).values.iter().copied().collect())
                .collect();
            (1 - hue_axis, series, Some((hue, &array.dims[hue_axis].coord)))
        }
        (ndim, _) => {
            return Err(render_error(
                "line plot",
                format!(
                    "expected 1 dimension, or 2 with a hue dimension, got {}",
                    ndim
                ),
            ))
        }
    };
    let xs = x_positions(&array.dims[x_dim].coord);
    let x_extent = extent(xs.iter().copied())
        .ok_or_else(|| render_error("line plot", "no x coordinate values"))?;
    let y_extent = extent(series.iter().flatten().copied())
        .ok_or_else(|| render_error("line plot", "no valid values"))?;

    let mut canvas = Canvas::new(LINE_WIDTH, LINE_HEIGHT);
    let (left, top) = (LINE_LEFT, MARGIN * 2);
    let (width, height) = (
        LINE_WIDTH - LINE_LEFT - MARGIN * 2,
        LINE_HEIGHT - LINE_BOTTOM - MARGIN * 2,
    );
    canvas.stroke_rect(left, top, width, height, GREY);
    let to_screen = |x: f64, y: f64| -> (i64, i64) {
        let sx = (x - x_extent.0) / (x_extent.1 - x_extent.0);
        let sy = (y - y_extent.0) / (y_extent.1 - y_extent.0);
        (
            (left as f64 + sx * (width - 1) as f64).round() as i64,
            (top as f64 + (1.0 - sy) * (height - 1) as f64).round() as i64,
        )
    };
    if y_extent.0 < 0.0 && y_extent.1 > 0.0 {
        let (_, zero) = to_screen(x_extent.0, 0.0);
        canvas.line(left as i64, zero, (left + width - 1) as i64, zero, GREY);
    }
    for (i, values) in series.iter().enumerate() {
        let color = TAB10[i % TAB10.len()];
        let mut previous = None;
        for (x, y) in xs.iter().zip(values) {
            if !y.is_finite() {
                // Missing values break the line.
                previous = None;
                continue;
            }
            let (px, py) = to_screen(*x, *y);
            if let Some((qx, qy)) = previous {
                canvas.line(qx, qy, px, py, color);
            }
            for dx in -1..=1 {
                for dy in -1..=1 {
                    canvas.set(px + dx, py + dy, color);
                }
            }
            previous = Some((px, py));
        }
    }

    let mut text = vec![
        ("Dimensions", dimensions(array)),
        ("X", array.dims[x_dim].name.clone()),
        ("Y range", format!("[{}, {}]", y_extent.0, y_extent.1)),
    ];
    if let Some((hue, coord)) = hue_coord {
        let legend = (0..coord.len())
            .map(|i| format!("{}={}", hue, coord.label(i)))
            .collect::<Vec<_>>()
            .join(", ");
        text.push(("Legend", legend));
    }
    Figure::new("line_plot", title(array, options), &canvas, text)
}
