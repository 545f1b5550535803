//! Colour maps and colour scales.

use crate::error::ExplorerError;
use crate::operations::percentile;

use ndarray::ArrayD;
use ndarray_stats::QuantileExt;
use strum_macros::Display;

/// An RGB colour.
pub type Rgb = [u8; 3];

pub const WHITE: Rgb = [255, 255, 255];
pub const GREY: Rgb = [128, 128, 128];

const VIRIDIS: [Rgb; 9] = [
    [68, 1, 84],
    [71, 44, 122],
    [59, 81, 139],
    [44, 113, 142],
    [33, 144, 141],
    [39, 173, 129],
    [92, 200, 99],
    [170, 220, 50],
    [253, 231, 37],
];

const RDBU_R: [Rgb; 11] = [
    [5, 48, 97],
    [33, 102, 172],
    [67, 147, 195],
    [146, 197, 222],
    [209, 229, 240],
    [247, 247, 247],
    [253, 219, 199],
    [244, 165, 130],
    [214, 96, 77],
    [178, 24, 43],
    [103, 0, 31],
];

/// Qualitative colours for line series.
pub const TAB10: [Rgb; 10] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [127, 127, 127],
    [188, 189, 34],
    [23, 190, 207],
];

/// Continuous colour maps.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Colormap {
    /// Sequential, dark purple to yellow
    #[strum(serialize = "viridis")]
    Viridis,
    /// Diverging, blue through white to red
    #[strum(serialize = "RdBu_r")]
    RdBuR,
}

impl Colormap {
    /// Returns the colour at position `t` in `[0, 1]`. Positions outside are clamped.
    pub fn color(&self, t: f64) -> Rgb {
        let stops: &[Rgb] = match self {
            Colormap::Viridis => &VIRIDIS,
            Colormap::RdBuR => &RDBU_R,
        };
        let t = if t.is_nan() { 0.5 } else { t.clamp(0.0, 1.0) };
        let position = t * (stops.len() - 1) as f64;
        let lower = (position.floor() as usize).min(stops.len() - 2);
        let fraction = position - lower as f64;
        let (a, b) = (stops[lower], stops[lower + 1]);
        let mut rgb = [0; 3];
        for i in 0..3 {
            rgb[i] = (a[i] as f64 + (b[i] as f64 - a[i] as f64) * fraction).round() as u8;
        }
        rgb
    }
}

/// Maps values onto a colour map.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorScale {
    pub vmin: f64,
    pub vmax: f64,
    pub colormap: Colormap,
}

impl ColorScale {
    /// Fits a colour scale to the valid values of an array.
    ///
    /// The full range is used unless `robust` is set, in which case the 2nd and 98th percentiles
    /// are used. A range spanning zero selects the diverging map, made symmetric about zero,
    /// unless a colour map is given.
    pub fn fit(
        values: &ArrayD<f64>,
        robust: bool,
        colormap: Option<Colormap>,
    ) -> Result<Self, ExplorerError> {
        if values.iter().all(|value| value.is_nan()) {
            return Err(ExplorerError::Render {
                plot: "colour scale",
                reason: "no valid values".to_string(),
            });
        }
        let (vmin, vmax) = if robust {
            let valid = values.iter().filter(|value| !value.is_nan());
            let vmin = percentile(valid.clone(), 2.0);
            let vmax = percentile(valid, 98.0);
            (vmin.unwrap_or(f64::NAN), vmax.unwrap_or(f64::NAN))
        } else {
            (*values.min_skipnan(), *values.max_skipnan())
        };
        let diverging = vmin < 0.0 && vmax > 0.0;
        let colormap = colormap.unwrap_or(if diverging {
            Colormap::RdBuR
        } else {
            Colormap::Viridis
        });
        if diverging && colormap == Colormap::RdBuR {
            let extent = vmin.abs().max(vmax.abs());
            return Ok(Self {
                vmin: -extent,
                vmax: extent,
                colormap,
            });
        }
        Ok(Self {
            vmin,
            vmax,
            colormap,
        })
    }

    /// Returns the colour of a value; `NaN` is white.
    pub fn color(&self, value: f64) -> Rgb {
        if value.is_nan() {
            return WHITE;
        }
        let t = if self.vmax > self.vmin {
            (value - self.vmin) / (self.vmax - self.vmin)
        } else {
            0.5
        };
        self.colormap.color(t)
    }
}

impl std::fmt::Display for ColorScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}, {}]", self.colormap, self.vmin, self.vmax)
    }
}
