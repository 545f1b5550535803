//! Numerical kernels applied by the executor.
//!
//! Every kernel works on `f64` arrays in which `NaN` marks missing data. Reductions skip missing
//! values, following xarray's `skipna=True` semantics.

use crate::error::ExplorerError;

use ndarray::{Array1, ArrayD, ArrayViewD, Axis, Zip};
use ndarray_stats::interpolate::Linear;
use ndarray_stats::QuantileExt;
use noisy_float::types::n64;
use rayon::prelude::*;
use strum_macros::Display;

/// Reduction applied along one or more dimensions.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum Reducer {
    /// Sum of valid values, 0 if there are none
    Sum,
    /// Mean of valid values
    Mean,
    /// Population standard deviation (`ddof = 0`) of valid values
    Std,
    /// Minimum valid value
    Min,
    /// Maximum valid value
    Max,
    /// Number of valid values
    Count,
}

/// Running statistics of the valid values seen so far.
///
/// Accumulators for disjoint parts of an array can be merged, which lets a reduction over several
/// axes fold one axis at a time.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Accumulator {
    count: usize,
    sum: f64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    const EMPTY: Accumulator = Accumulator {
        count: 0,
        sum: 0.0,
        mean: 0.0,
        m2: 0.0,
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
    };

    fn push(&self, value: f64) -> Self {
        if value.is_nan() {
            return *self;
        }
        // Welford's update of the mean and sum of squared deviations.
        let count = self.count + 1;
        let delta = value - self.mean;
        let mean = self.mean + delta / count as f64;
        Accumulator {
            count,
            sum: self.sum + value,
            mean,
            m2: self.m2 + delta * (value - mean),
            min: self.min.min(value),
            max: self.max.max(value),
        }
    }

    fn merge(&self, other: &Accumulator) -> Self {
        if other.count == 0 {
            return *self;
        }
        if self.count == 0 {
            return *other;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let weight = (self.count * other.count) as f64 / count as f64;
        Accumulator {
            count,
            sum: self.sum + other.sum,
            mean: self.mean + delta * other.count as f64 / count as f64,
            m2: self.m2 + other.m2 + delta * delta * weight,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    fn finish(&self, reducer: Reducer) -> f64 {
        match reducer {
            Reducer::Sum => self.sum,
            Reducer::Count => self.count as f64,
            _ if self.count == 0 => f64::NAN,
            Reducer::Mean => self.sum / self.count as f64,
            Reducer::Std => (self.m2 / self.count as f64).max(0.0).sqrt(),
            Reducer::Min => self.min,
            Reducer::Max => self.max,
        }
    }
}

/// Reduces an array along one or more axes, skipping `NaN`.
///
/// # Arguments
///
/// * `values`: Array to reduce
/// * `axes`: Axes to reduce over. An empty list reduces each element on its own.
/// * `reducer`: Reduction to apply
pub fn reduce(values: ArrayViewD<f64>, axes: &[usize], reducer: Reducer) -> ArrayD<f64> {
    let mut axes = axes.to_vec();
    axes.sort_unstable();
    axes.dedup();
    let Some((first, remaining)) = axes.split_first() else {
        return values.map(|value| Accumulator::EMPTY.push(*value).finish(reducer));
    };
    let mut result = values.fold_axis(Axis(*first), Accumulator::EMPTY, |acc, value| {
        acc.push(*value)
    });
    // Each fold removes an axis, shifting the later ones down by one.
    for (n, axis) in remaining.iter().enumerate() {
        result = result.fold_axis(Axis(axis - n - 1), Accumulator::EMPTY, |acc, partial| {
            acc.merge(partial)
        });
    }
    result.map(|acc| acc.finish(reducer))
}

/// Reduces groups of positions along one axis, stacking the group results along that axis in the
/// order of `buckets`. Groups are reduced in parallel on the rayon pool.
///
/// # Arguments
///
/// * `values`: Array to reduce
/// * `axis`: Axis along which positions are grouped
/// * `buckets`: Positions of each group; every group must be non-empty
/// * `reducer`: Reduction to apply within each group
pub fn bucket_reduce(
    values: ArrayViewD<f64>,
    axis: usize,
    buckets: &[Vec<usize>],
    reducer: Reducer,
) -> Result<ArrayD<f64>, ExplorerError> {
    if buckets.is_empty() {
        return Err(ExplorerError::EmptyArray {
            operation: "grouped reduction",
        });
    }
    let groups: Vec<ArrayD<f64>> = buckets
        .par_iter()
        .map(|bucket| reduce(values.select(Axis(axis), bucket).view(), &[axis], reducer))
        .collect();
    let views: Vec<ArrayViewD<f64>> = groups.iter().map(|group| group.view()).collect();
    Ok(ndarray::stack(Axis(axis), &views)?)
}

/// Selects positions along an axis, removing the axis if `drop` is set.
pub fn take(values: ArrayViewD<f64>, axis: usize, indices: &[usize], drop: bool) -> ArrayD<f64> {
    match indices {
        [index] if drop => values.index_axis(Axis(axis), *index).to_owned(),
        _ => values.select(Axis(axis), indices),
    }
}

/// Element-wise operation between two operands.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Keeps the left value where the right value is non-zero, `NaN` elsewhere
    Mask,
}

impl BinaryOp {
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Mask => {
                if b != 0.0 && !b.is_nan() {
                    a
                } else {
                    f64::NAN
                }
            }
        }
    }
}

/// Comparison against a scalar, producing a 1/0 mask.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    /// Compares two values. `NaN` never compares true.
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        let result = match self {
            Comparison::Lt => a < b,
            Comparison::Le => a <= b,
            Comparison::Gt => a > b,
            Comparison::Ge => a >= b,
        };
        if result {
            1.0
        } else {
            0.0
        }
    }
}

/// Element-wise operation on a single operand.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UnaryOp {
    /// `x op scalar`
    Scalar(BinaryOp, f64),
    /// `x cmp scalar`
    Compare(Comparison, f64),
    /// 1 where the value is present, 0 where it is missing
    NotNull,
}

impl UnaryOp {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            UnaryOp::Scalar(op, scalar) => op.apply(value, *scalar),
            UnaryOp::Compare(comparison, scalar) => comparison.apply(value, *scalar),
            UnaryOp::NotNull => {
                if value.is_nan() {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Scalar(op, scalar) => write!(f, "{}({})", op, scalar),
            UnaryOp::Compare(comparison, scalar) => write!(f, "{}({})", comparison, scalar),
            UnaryOp::NotNull => write!(f, "notnull"),
        }
    }
}

/// Rearranges the axes of a view to follow `target`, inserting length-one axes for the target
/// dimensions it lacks. Every dimension of `dims` must appear in `target`.
pub fn align<'a>(
    values: ArrayViewD<'a, f64>,
    dims: &[String],
    target: &[String],
) -> ArrayViewD<'a, f64> {
    let order: Vec<usize> = target
        .iter()
        .filter_map(|dim| dims.iter().position(|d| d == dim))
        .collect();
    let mut view = values.permuted_axes(order);
    for (i, dim) in target.iter().enumerate() {
        if !dims.contains(dim) {
            view = view.insert_axis(Axis(i));
        }
    }
    view
}

/// Applies a binary operation with broadcasting by dimension name.
///
/// # Arguments
///
/// * `lhs`, `lhs_dims`: Left operand and its dimension names
/// * `rhs`, `rhs_dims`: Right operand and its dimension names
/// * `dims`, `shape`: Dimension names and shape of the result, a superset of both operands'
/// * `op`: Operation to apply
pub fn binary(
    lhs: ArrayViewD<f64>,
    lhs_dims: &[String],
    rhs: ArrayViewD<f64>,
    rhs_dims: &[String],
    dims: &[String],
    shape: &[usize],
    op: BinaryOp,
) -> Result<ArrayD<f64>, ExplorerError> {
    let lhs = align(lhs, lhs_dims, dims);
    let rhs = align(rhs, rhs_dims, dims);
    let shape_error = || {
        ExplorerError::ShapeInvalid(ndarray::ShapeError::from_kind(
            ndarray::ErrorKind::IncompatibleShape,
        ))
    };
    let lhs = lhs.broadcast(shape).ok_or_else(shape_error)?;
    let rhs = rhs.broadcast(shape).ok_or_else(shape_error)?;
    Ok(Zip::from(&lhs)
        .and(&rhs)
        .map_collect(|a, b| op.apply(*a, *b)))
}

/// Returns the value at percentile `q` (0 to 100) of the valid values, using linear interpolation
/// between closest ranks, or `None` if there are no valid values.
pub fn percentile<'a>(values: impl IntoIterator<Item = &'a f64>, q: f64) -> Option<f64> {
    let mut values: Array1<f64> = values.into_iter().copied().collect();
    if values.is_empty() {
        return None;
    }
    let q = n64((q / 100.0).clamp(0.0, 1.0));
    values
        .quantile_axis_skipnan_mut(Axis(0), q, &Linear)
        .ok()?
        .first()
        .copied()
        .filter(|value| !value.is_nan())
}
