//! Raster drawing surface.

use crate::error::ExplorerError;
use crate::render::colormap::{Rgb, WHITE};
use crate::render::png;

/// An RGB raster, initially white.
#[derive(Clone, Debug)]
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(width: usize, height: usize) -> Self {
        let pixels = WHITE.repeat(width * height);
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Sets a pixel. Pixels outside the canvas are ignored.
    pub fn set(&mut self, x: i64, y: i64, color: Rgb) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        let i = (y as usize * self.width + x as usize) * 3;
        self.pixels[i..i + 3].copy_from_slice(&color);
    }

    pub fn fill_rect(&mut self, x: usize, y: usize, width: usize, height: usize, color: Rgb) {
        for row in y..(y + height).min(self.height) {
            for column in x..(x + width).min(self.width) {
                self.set(column as i64, row as i64, color);
            }
        }
    }

    /// Draws the outline of a rectangle.
    pub fn stroke_rect(&mut self, x: usize, y: usize, width: usize, height: usize, color: Rgb) {
        if width == 0 || height == 0 {
            return;
        }
        let (x0, y0) = (x as i64, y as i64);
        let (x1, y1) = ((x + width - 1) as i64, (y + height - 1) as i64);
        self.line(x0, y0, x1, y0, color);
        self.line(x0, y1, x1, y1, color);
        self.line(x0, y0, x0, y1, color);
        self.line(x1, y0, x1, y1, color);
    }

    /// Draws a line with Bresenham's algorithm.
    pub fn line(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb) {
        let (dx, dy) = ((x1 - x0).abs(), -(y1 - y0).abs());
        let (sx, sy) = (if x0 < x1 { 1 } else { -1 }, if y0 < y1 { 1 } else { -1 });
        let (mut x, mut y, mut err) = (x0, y0, dx + dy);
        loop {
            self.set(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Encodes the canvas as a PNG image with text metadata.
    pub fn to_png(&self, text: &[(&str, String)]) -> Result<Vec<u8>, ExplorerError> {
        png::encode(self.width, self.height, &self.pixels, text)
    }
}
