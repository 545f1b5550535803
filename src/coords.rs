//! Dimension coordinates, CF time decoding and coordinate selectors.

use crate::error::ExplorerError;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fmt::Display;

/// Relative tolerance used when matching numeric coordinate values exactly.
const VALUE_TOLERANCE: f64 = 1e-9;

/// The labels of one dimension.
#[derive(Clone, Debug, PartialEq)]
pub enum Coordinate {
    /// Numeric labels, e.g. latitude
    Numeric(Vec<f64>),
    /// Calendar labels decoded from CF time units
    Time(Vec<NaiveDateTime>),
    /// String labels, e.g. season names
    Label(Vec<String>),
}

impl Coordinate {
    /// Returns an index coordinate `0..len`.
    pub fn index(len: usize) -> Self {
        Coordinate::Numeric((0..len).map(|i| i as f64).collect())
    }

    pub fn len(&self) -> usize {
        match self {
            Coordinate::Numeric(values) => values.len(),
            Coordinate::Time(values) => values.len(),
            Coordinate::Label(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the coordinate restricted to `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> Self {
        match self {
            Coordinate::Numeric(values) => {
                Coordinate::Numeric(indices.iter().map(|&i| values[i]).collect())
            }
            Coordinate::Time(values) => {
                Coordinate::Time(indices.iter().map(|&i| values[i]).collect())
            }
            Coordinate::Label(values) => {
                Coordinate::Label(indices.iter().map(|&i| values[i].clone()).collect())
            }
        }
    }

    pub fn as_time(&self) -> Option<&[NaiveDateTime]> {
        match self {
            Coordinate::Time(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            Coordinate::Numeric(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_labels(&self) -> Option<&[String]> {
        match self {
            Coordinate::Label(values) => Some(values),
            _ => None,
        }
    }

    /// Returns a printable label for entry `i`, used in figure titles.
    pub fn label(&self, i: usize) -> String {
        match self {
            Coordinate::Numeric(values) => format_number(values[i]),
            Coordinate::Time(values) => {
                let value = values[i];
                if value.time() == chrono::NaiveTime::MIN {
                    value.date().to_string()
                } else {
                    value.to_string()
                }
            }
            Coordinate::Label(values) => values[i].clone(),
        }
    }

    /// Returns whether the numeric values increase along the dimension.
    pub fn is_ascending(&self) -> bool {
        match self {
            Coordinate::Numeric(values) => values.windows(2).all(|w| w[0] <= w[1]),
            Coordinate::Time(values) => values.windows(2).all(|w| w[0] <= w[1]),
            Coordinate::Label(_) => true,
        }
    }

    /// Resolves a selector to the indices it matches along this dimension.
    ///
    /// # Arguments
    ///
    /// * `dimension`: Name of the dimension, for error reporting
    /// * `selector`: Selector to resolve
    pub fn resolve(
        &self,
        dimension: &str,
        selector: &Selector,
    ) -> Result<Selection, ExplorerError> {
        let (indices, drop) = match (selector, self) {
            (Selector::Value(value), Coordinate::Numeric(values)) => {
                let tolerance = VALUE_TOLERANCE * value.abs().max(1.0);
                let found = values
                    .iter()
                    .position(|v| (v - value).abs() <= tolerance);
                (found.into_iter().collect(), true)
            }
            (Selector::Nearest(value), Coordinate::Numeric(values)) => {
                let nearest = values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| !v.is_nan())
                    .min_by(|(_, a), (_, b)| {
                        (*a - value).abs().total_cmp(&(*b - value).abs())
                    })
                    .map(|(i, _)| i);
                (nearest.into_iter().collect(), true)
            }
            (Selector::Range(a, b), Coordinate::Numeric(values)) => {
                let (lo, hi) = if a <= b { (*a, *b) } else { (*b, *a) };
                let found = values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| lo <= **v && **v <= hi)
                    .map(|(i, _)| i)
                    .collect();
                (found, false)
            }
            (Selector::Date(date), Coordinate::Time(values)) => {
                let found: Vec<usize> = values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.date() == *date)
                    .map(|(i, _)| i)
                    .collect();
                // A date that matches a single step behaves as a point selection.
                let drop = found.len() == 1;
                (found, drop)
            }
            (Selector::DateRange(a, b), Coordinate::Time(values)) => {
                let (lo, hi) = if a <= b { (*a, *b) } else { (*b, *a) };
                let found = values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| lo <= v.date() && v.date() <= hi)
                    .map(|(i, _)| i)
                    .collect();
                (found, false)
            }
            (Selector::Label(label), Coordinate::Label(values)) => {
                let found = values.iter().position(|v| v == label);
                (found.into_iter().collect(), true)
            }
            (Selector::Index(index), coordinate) => {
                let found = (*index < coordinate.len()).then_some(*index);
                (found.into_iter().collect(), true)
            }
            (Selector::IndexRange(start, end), coordinate) => {
                let end = (*end).min(coordinate.len());
                ((*start..end).collect(), false)
            }
            // The selector does not apply to this kind of coordinate, so nothing can match.
            _ => (vec![], false),
        };
        if indices.is_empty() {
            return Err(ExplorerError::EmptySelection {
                dimension: dimension.to_string(),
                selector: selector.to_string(),
            });
        }
        Ok(Selection { indices, drop })
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// A dimension name together with its coordinate.
#[derive(Clone, Debug, PartialEq)]
pub struct Dimension {
    pub name: String,
    pub coord: Coordinate,
}

impl Dimension {
    pub fn new(name: impl Into<String>, coord: Coordinate) -> Self {
        Self {
            name: name.into(),
            coord,
        }
    }

    pub fn len(&self) -> usize {
        self.coord.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coord.is_empty()
    }
}

/// A query against the coordinate of one dimension.
#[derive(Clone, Debug, PartialEq)]
pub enum Selector {
    /// The entry equal to a value; removes the dimension
    Value(f64),
    /// The entry nearest to a value; removes the dimension
    Nearest(f64),
    /// Entries within an inclusive range, in either order
    Range(f64, f64),
    /// Time steps on a calendar date
    Date(NaiveDate),
    /// Time steps within an inclusive range of dates
    DateRange(NaiveDate, NaiveDate),
    /// The entry with a string label; removes the dimension
    Label(String),
    /// The entry at an index; removes the dimension
    Index(usize),
    /// Entries in a half-open index range
    IndexRange(usize, usize),
}

impl Selector {
    /// Returns the inclusive box `center - buffer ..= center + buffer`.
    pub fn around(center: f64, buffer: f64) -> Self {
        Selector::Range(center - buffer, center + buffer)
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Value(value) => write!(f, "value({})", value),
            Selector::Nearest(value) => write!(f, "nearest({})", value),
            Selector::Range(a, b) => write!(f, "range({}, {})", a, b),
            Selector::Date(date) => write!(f, "date({})", date),
            Selector::DateRange(a, b) => write!(f, "dates({}, {})", a, b),
            Selector::Label(label) => write!(f, "label({})", label),
            Selector::Index(index) => write!(f, "index({})", index),
            Selector::IndexRange(start, end) => write!(f, "indices({}..{})", start, end),
        }
    }
}

/// The result of resolving a [Selector].
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    /// Matched indices, never empty
    pub indices: Vec<usize>,
    /// Whether the dimension is removed from the result
    pub drop: bool,
}

impl Selection {
    /// Returns the matched indices as a range if they are contiguous and ascending.
    pub fn as_range(&self) -> Option<std::ops::Range<usize>> {
        let first = *self.indices.first()?;
        let contiguous = self
            .indices
            .iter()
            .enumerate()
            .all(|(offset, index)| *index == first + offset);
        contiguous.then(|| first..first + self.indices.len())
    }
}

/// Decodes CF time values such as `days since 1980-01-01` into calendar datetimes.
///
/// Only calendars equivalent to the proleptic Gregorian calendar are supported.
///
/// # Arguments
///
/// * `values`: Offsets from the reference time
/// * `units`: CF `units` attribute
/// * `calendar`: Optional CF `calendar` attribute
pub fn decode_cf_time(
    values: &[f64],
    units: &str,
    calendar: Option<&str>,
) -> Result<Vec<NaiveDateTime>, ExplorerError> {
    let calendar = calendar.unwrap_or("standard");
    if !matches!(
        calendar.to_ascii_lowercase().as_str(),
        "standard" | "gregorian" | "proleptic_gregorian"
    ) {
        return Err(ExplorerError::UnsupportedCalendar {
            calendar: calendar.to_string(),
        });
    }
    let invalid = || ExplorerError::InvalidTimeUnits {
        units: units.to_string(),
    };
    let (unit, reference) = units.split_once(" since ").ok_or_else(invalid)?;
    let unit_millis: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "days" | "day" | "d" => 86_400_000.0,
        "hours" | "hour" | "h" => 3_600_000.0,
        "minutes" | "minute" | "min" => 60_000.0,
        "seconds" | "second" | "s" => 1_000.0,
        _ => return Err(invalid()),
    };
    let reference = parse_reference(reference.trim()).ok_or_else(invalid)?;
    values
        .iter()
        .map(|value| {
            if !value.is_finite() {
                return Err(invalid());
            }
            let offset = Duration::milliseconds((value * unit_millis).round() as i64);
            reference.checked_add_signed(offset).ok_or_else(invalid)
        })
        .collect()
}

fn parse_reference(reference: &str) -> Option<NaiveDateTime> {
    // Drop an explicit UTC designator; other offsets are not supported.
    let reference = reference
        .trim_end_matches(" UTC")
        .trim_end_matches('Z')
        .trim_end_matches("+00:00");
    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(reference, format) {
            return Some(datetime);
        }
    }
    NaiveDate::parse_from_str(reference, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}
