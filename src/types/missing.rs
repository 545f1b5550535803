//! Missing data descriptors
//!
//! Arrays can contain missing data which must be masked out before computation. CF conventions
//! describe missing data in several ways, and a variable may use more than one of them at once:
//!
//! * A single missing value (`_FillValue` or `missing_value`)
//! * Multiple missing values (`missing_value` as a list)
//! * A valid minimum value (`valid_min`)
//! * A valid maximum value (`valid_max`)
//! * A valid range of values (`valid_range`)
//!
//! Values that are missing are replaced by `NaN` when a chunk is decoded.

/// Missing data
#[derive(Clone, Debug, PartialEq)]
pub enum Missing<T> {
    /// A single missing value
    MissingValue(T),
    /// Multple missing values
    MissingValues(Vec<T>),
    /// Valid minimum
    ValidMin(T),
    /// Valid maxiumum
    ValidMax(T),
    /// Valid range
    ValidRange(T, T),
}

impl<T: PartialOrd> Missing<T> {
    /// Filter function to check whether the provided value is a 'missing' value
    pub fn is_missing(&self, x: &T) -> bool {
        match self {
            Missing::MissingValue(value) => x == value,
            Missing::MissingValues(values) => values.contains(x),
            Missing::ValidMin(min) => x < min,
            Missing::ValidMax(max) => x > max,
            Missing::ValidRange(min, max) => x < min || x > max,
        }
    }
}

impl Missing<f64> {
    /// Returns a descriptor from a CF `valid_range` pair, or `None` if the range is empty.
    pub fn valid_range(min: f64, max: f64) -> Option<Self> {
        (min < max).then_some(Missing::ValidRange(min, max))
    }
}

/// Replaces missing values in `values` with `NaN`.
///
/// `NaN` is never matched by a descriptor, so values that are already `NaN` stay as they are.
pub fn mask_missing(values: &mut [f64], missing: &[Missing<f64>]) {
    if missing.is_empty() {
        return;
    }
    for value in values.iter_mut() {
        if missing.iter().any(|m| m.is_missing(value)) {
            *value = f64::NAN;
        }
    }
}
