//! Lazy computation graphs over dataset variables.
//!
//! A [LazyArray] records an operation and its inputs without reading any data. Every method
//! returns a new array, so graphs are immutable and may be shared freely between threads and
//! analyses. Requests that can be rejected from metadata alone, such as unknown dimensions or
//! empty selections, fail when the graph is composed. Data is only read when an
//! [Executor](crate::executor::Executor) materialises the graph.

use crate::coords::{Coordinate, Dimension, Selector};
use crate::dataset::Variable;
use crate::error::ExplorerError;
use crate::operations::{BinaryOp, Comparison, Reducer, UnaryOp};
use crate::resample::{Frequency, GroupKey, SEASON_ORDER};

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

/// Name of the dimension used by resampling and grouping.
pub const TIME_DIMENSION: &str = "time";

/// The pending operation of a graph node.
#[derive(Clone, Debug)]
pub(crate) enum Op {
    /// A hyper-rectangular region of a stored variable. `keep` marks the variable's axes that
    /// remain in the output; dropped axes have a region of length one.
    Source {
        variable: Arc<Variable>,
        region: Vec<Range<usize>>,
        keep: Vec<bool>,
    },
    /// Positions along one axis of the input
    Take {
        input: LazyArray,
        axis: usize,
        indices: Vec<usize>,
        drop: bool,
    },
    /// Reduction over axes of the input
    Reduce {
        input: LazyArray,
        axes: Vec<usize>,
        reducer: Reducer,
    },
    /// Reduction within groups of positions along one axis
    Bucket {
        input: LazyArray,
        axis: usize,
        buckets: Vec<Vec<usize>>,
        reducer: Reducer,
    },
    /// Element-wise operation broadcast by dimension name
    Binary {
        lhs: LazyArray,
        rhs: LazyArray,
        op: BinaryOp,
    },
    /// Element-wise operation on one input
    Unary { input: LazyArray, op: UnaryOp },
    /// The input with renamed dimensions
    Rename { input: LazyArray },
}

impl Op {
    /// Returns the inputs of the operation.
    pub(crate) fn inputs(&self) -> Vec<&LazyArray> {
        match self {
            Op::Source { .. } => vec![],
            Op::Take { input, .. }
            | Op::Reduce { input, .. }
            | Op::Bucket { input, .. }
            | Op::Unary { input, .. }
            | Op::Rename { input } => vec![input],
            Op::Binary { lhs, rhs, .. } => vec![lhs, rhs],
        }
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) name: Option<String>,
    pub(crate) dims: Vec<Dimension>,
    pub(crate) op: Op,
}

/// A node of a lazy computation graph.
///
/// Cloning is cheap; clones refer to the same node.
#[derive(Clone, Debug)]
pub struct LazyArray {
    node: Arc<Node>,
}

impl LazyArray {
    fn new(name: Option<String>, dims: Vec<Dimension>, op: Op) -> Self {
        Self {
            node: Arc::new(Node { name, dims, op }),
        }
    }

    /// Returns a lazy array over a whole variable.
    pub(crate) fn source(variable: Arc<Variable>, dims: Vec<Dimension>) -> Self {
        let region = variable.shape.iter().map(|size| 0..*size).collect();
        let keep = vec![true; variable.shape.len()];
        let name = Some(variable.name.clone());
        Self::new(
            name,
            dims,
            Op::Source {
                variable,
                region,
                keep,
            },
        )
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    /// Returns an identifier of the node, shared by all clones of this array.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.node) as usize
    }

    pub fn name(&self) -> Option<&str> {
        self.node.name.as_deref()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.node.dims
    }

    pub fn dim_names(&self) -> Vec<&str> {
        self.node.dims.iter().map(|dim| dim.name.as_str()).collect()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.node.dims.iter().map(Dimension::len).collect()
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the axis of a dimension.
    pub fn axis(&self, dim: &str) -> Result<usize, ExplorerError> {
        self.node
            .dims
            .iter()
            .position(|d| d.name == dim)
            .ok_or_else(|| ExplorerError::UnknownDimension {
                dimension: dim.to_string(),
                available: self.node.dims.iter().map(|d| d.name.clone()).collect(),
            })
    }

    pub fn coord(&self, dim: &str) -> Result<&Coordinate, ExplorerError> {
        Ok(&self.node.dims[self.axis(dim)?].coord)
    }

    /// Returns every node of the graph exactly once, inputs before the nodes that use them.
    pub fn post_order(&self) -> Vec<LazyArray> {
        let mut visited = HashSet::new();
        let mut order = vec![];
        // Iterative depth-first search; `true` marks a node whose inputs have been pushed.
        let mut stack = vec![(self.clone(), false)];
        while let Some((array, expanded)) = stack.pop() {
            if expanded {
                order.push(array);
                continue;
            }
            if !visited.insert(array.id()) {
                continue;
            }
            stack.push((array.clone(), true));
            for input in array.node.op.inputs().into_iter().rev() {
                if !visited.contains(&input.id()) {
                    stack.push((input.clone(), false));
                }
            }
        }
        order
    }

    /// Returns the array under a new name.
    pub fn with_name(&self, name: &str) -> LazyArray {
        LazyArray::new(
            Some(name.to_string()),
            self.node.dims.clone(),
            self.node.op.clone(),
        )
    }

    /// Renames a dimension.
    pub fn rename(&self, dim: &str, new_name: &str) -> Result<LazyArray, ExplorerError> {
        let axis = self.axis(dim)?;
        let mut dims = self.node.dims.clone();
        dims[axis].name = new_name.to_string();
        Ok(LazyArray::new(
            self.node.name.clone(),
            dims,
            Op::Rename {
                input: self.clone(),
            },
        ))
    }

    /// Selects along a dimension by coordinate.
    ///
    /// Point selections remove the dimension; range selections keep it. Selections that match
    /// nothing fail with [ExplorerError::EmptySelection]. Contiguous selections of a stored
    /// variable narrow the region that is read.
    pub fn sel(&self, dim: &str, selector: &Selector) -> Result<LazyArray, ExplorerError> {
        let axis = self.axis(dim)?;
        let selection = self.node.dims[axis].coord.resolve(dim, selector)?;
        let mut dims = self.node.dims.clone();
        if selection.drop {
            dims.remove(axis);
        } else {
            dims[axis].coord = dims[axis].coord.take(&selection.indices);
        }

        if let (
            Op::Source {
                variable,
                region,
                keep,
            },
            Some(range),
        ) = (&self.node.op, selection.as_range())
        {
            if let Some(variable_axis) = variable_axis(keep, axis) {
                let mut region = region.clone();
                let start = region[variable_axis].start;
                region[variable_axis] = start + range.start..start + range.end;
                let mut keep = keep.clone();
                keep[variable_axis] = !selection.drop;
                return Ok(LazyArray::new(
                    self.node.name.clone(),
                    dims,
                    Op::Source {
                        variable: variable.clone(),
                        region,
                        keep,
                    },
                ));
            }
        }

        Ok(LazyArray::new(
            self.node.name.clone(),
            dims,
            Op::Take {
                input: self.clone(),
                axis,
                indices: selection.indices,
                drop: selection.drop,
            },
        ))
    }

    /// Selects the entry at an index, removing the dimension.
    pub fn isel(&self, dim: &str, index: usize) -> Result<LazyArray, ExplorerError> {
        self.sel(dim, &Selector::Index(index))
    }

    /// Selects a half-open range of indices, keeping the dimension.
    pub fn isel_range(
        &self,
        dim: &str,
        start: usize,
        end: usize,
    ) -> Result<LazyArray, ExplorerError> {
        self.sel(dim, &Selector::IndexRange(start, end))
    }

    /// Reduces over dimensions, removing them. An empty list reduces over every dimension.
    pub fn reduce(&self, dims: &[&str], reducer: Reducer) -> Result<LazyArray, ExplorerError> {
        let axes: Vec<usize> = if dims.is_empty() {
            (0..self.node.dims.len()).collect()
        } else {
            dims.iter()
                .map(|dim| self.axis(dim))
                .collect::<Result<_, _>>()?
        };
        let out_dims = self
            .node
            .dims
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, dim)| dim.clone())
            .collect();
        Ok(LazyArray::new(
            self.node.name.clone(),
            out_dims,
            Op::Reduce {
                input: self.clone(),
                axes,
                reducer,
            },
        ))
    }

    pub fn sum(&self, dims: &[&str]) -> Result<LazyArray, ExplorerError> {
        self.reduce(dims, Reducer::Sum)
    }

    pub fn mean(&self, dims: &[&str]) -> Result<LazyArray, ExplorerError> {
        self.reduce(dims, Reducer::Mean)
    }

    pub fn std(&self, dims: &[&str]) -> Result<LazyArray, ExplorerError> {
        self.reduce(dims, Reducer::Std)
    }

    pub fn min(&self, dims: &[&str]) -> Result<LazyArray, ExplorerError> {
        self.reduce(dims, Reducer::Min)
    }

    pub fn max(&self, dims: &[&str]) -> Result<LazyArray, ExplorerError> {
        self.reduce(dims, Reducer::Max)
    }

    pub fn count(&self, dims: &[&str]) -> Result<LazyArray, ExplorerError> {
        self.reduce(dims, Reducer::Count)
    }

    /// Combines two arrays element-wise, broadcasting by dimension name.
    ///
    /// The result has this array's dimensions followed by those only `other` has. Shared
    /// dimensions must have identical coordinates.
    pub fn binary(&self, other: &LazyArray, op: BinaryOp) -> Result<LazyArray, ExplorerError> {
        let mut dims = self.node.dims.clone();
        for dim in &other.node.dims {
            match dims.iter().find(|d| d.name == dim.name) {
                Some(existing) if existing.coord != dim.coord => {
                    return Err(ExplorerError::CoordinateMismatch {
                        dimension: dim.name.clone(),
                    });
                }
                Some(_) => (),
                None => dims.push(dim.clone()),
            }
        }
        Ok(LazyArray::new(
            self.node.name.clone(),
            dims,
            Op::Binary {
                lhs: self.clone(),
                rhs: other.clone(),
                op,
            },
        ))
    }

    pub fn add(&self, other: &LazyArray) -> Result<LazyArray, ExplorerError> {
        self.binary(other, BinaryOp::Add)
    }

    pub fn sub(&self, other: &LazyArray) -> Result<LazyArray, ExplorerError> {
        self.binary(other, BinaryOp::Sub)
    }

    pub fn mul(&self, other: &LazyArray) -> Result<LazyArray, ExplorerError> {
        self.binary(other, BinaryOp::Mul)
    }

    pub fn div(&self, other: &LazyArray) -> Result<LazyArray, ExplorerError> {
        self.binary(other, BinaryOp::Div)
    }

    /// Keeps values where `cond` is non-zero, `NaN` elsewhere.
    pub fn where_(&self, cond: &LazyArray) -> Result<LazyArray, ExplorerError> {
        self.binary(cond, BinaryOp::Mask)
    }

    fn unary(&self, op: UnaryOp) -> LazyArray {
        LazyArray::new(
            self.node.name.clone(),
            self.node.dims.clone(),
            Op::Unary {
                input: self.clone(),
                op,
            },
        )
    }

    /// Applies an operation with a scalar right operand.
    pub fn scalar(&self, op: BinaryOp, value: f64) -> LazyArray {
        self.unary(UnaryOp::Scalar(op, value))
    }

    pub fn lt(&self, value: f64) -> LazyArray {
        self.unary(UnaryOp::Compare(Comparison::Lt, value))
    }

    pub fn le(&self, value: f64) -> LazyArray {
        self.unary(UnaryOp::Compare(Comparison::Le, value))
    }

    pub fn gt(&self, value: f64) -> LazyArray {
        self.unary(UnaryOp::Compare(Comparison::Gt, value))
    }

    pub fn ge(&self, value: f64) -> LazyArray {
        self.unary(UnaryOp::Compare(Comparison::Ge, value))
    }

    /// Returns 1 where a value is present and 0 where it is missing.
    pub fn notnull(&self) -> LazyArray {
        self.unary(UnaryOp::NotNull)
    }

    fn time_axis(&self) -> Result<(usize, &[chrono::NaiveDateTime]), ExplorerError> {
        let axis = self.axis(TIME_DIMENSION)?;
        let times = self.node.dims[axis].coord.as_time().ok_or_else(|| {
            ExplorerError::NotATimeDimension {
                dimension: TIME_DIMENSION.to_string(),
            }
        })?;
        Ok((axis, times))
    }

    /// Resamples the time dimension to a lower frequency.
    ///
    /// The new time coordinate holds the start of each period; periods without time steps are
    /// omitted.
    pub fn resample(
        &self,
        frequency: Frequency,
        reducer: Reducer,
    ) -> Result<LazyArray, ExplorerError> {
        let (axis, times) = self.time_axis()?;
        let (starts, buckets): (Vec<_>, Vec<_>) = frequency.buckets(times).into_iter().unzip();
        let mut dims = self.node.dims.clone();
        dims[axis].coord = Coordinate::Time(
            starts
                .into_iter()
                .map(|start: chrono::NaiveDate| start.and_time(chrono::NaiveTime::MIN))
                .collect(),
        );
        Ok(LazyArray::new(
            self.node.name.clone(),
            dims,
            Op::Bucket {
                input: self.clone(),
                axis,
                buckets,
                reducer,
            },
        ))
    }

    /// Groups time steps by a calendar key and reduces each group.
    ///
    /// The time dimension is replaced by one named after the key, with groups in sorted label
    /// order.
    pub fn groupby(&self, key: GroupKey, reducer: Reducer) -> Result<LazyArray, ExplorerError> {
        let (axis, times) = self.time_axis()?;
        let (labels, buckets): (Vec<_>, Vec<_>) = key.groups(times).into_iter().unzip();
        let mut dims = self.node.dims.clone();
        dims[axis] = Dimension::new(key.dimension(), Coordinate::Label(labels));
        Ok(LazyArray::new(
            self.node.name.clone(),
            dims,
            Op::Bucket {
                input: self.clone(),
                axis,
                buckets,
                reducer,
            },
        ))
    }

    /// Groups by season, ordered DJF, MAM, JJA, SON.
    pub fn groupby_season(&self, reducer: Reducer) -> Result<LazyArray, ExplorerError> {
        let grouped = self.groupby(GroupKey::Season, reducer)?;
        let order: Vec<String> = SEASON_ORDER.iter().map(|season| season.to_string()).collect();
        let order: Vec<&str> = order.iter().map(String::as_str).collect();
        grouped.reindex(&GroupKey::Season.dimension(), &order)
    }

    /// Reorders a labelled dimension.
    ///
    /// Requested labels missing from the data are skipped. Every label of the data must be
    /// requested.
    pub fn reindex(&self, dim: &str, labels: &[&str]) -> Result<LazyArray, ExplorerError> {
        let axis = self.axis(dim)?;
        let existing = self.node.dims[axis].coord.as_labels().ok_or_else(|| {
            ExplorerError::NotALabelDimension {
                dimension: dim.to_string(),
            }
        })?;
        if let Some(unknown) = existing.iter().find(|label| !labels.contains(&label.as_str())) {
            return Err(ExplorerError::UnknownLabel {
                dimension: dim.to_string(),
                label: unknown.clone(),
            });
        }
        let indices: Vec<usize> = labels
            .iter()
            .filter_map(|label| existing.iter().position(|e| e == label))
            .collect();
        let mut dims = self.node.dims.clone();
        dims[axis].coord = dims[axis].coord.take(&indices);
        Ok(LazyArray::new(
            self.node.name.clone(),
            dims,
            Op::Take {
                input: self.clone(),
                axis,
                indices,
                drop: false,
            },
        ))
    }
}

/// Returns the axis of a stored variable behind an axis of a source node: the n-th axis of the
/// variable that is kept.
pub(crate) fn variable_axis(keep: &[bool], axis: usize) -> Option<usize> {
    keep.iter()
        .enumerate()
        .filter(|(_, kept)| **kept)
        .nth(axis)
        .map(|(variable_axis, _)| variable_axis)
}

impl std::fmt::Display for LazyArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dims: Vec<String> = self
            .node
            .dims
            .iter()
            .map(|dim| format!("{}: {}", dim.name, dim.len()))
            .collect();
        write!(
            f,
            "{} ({})",
            self.name().unwrap_or("<unnamed>"),
            dims.join(", ")
        )
    }
}

macro_rules! impl_binary_ops {
    ($($trait:ident, $method:ident, $op:expr);*) => {
        $(
            impl std::ops::$trait<&LazyArray> for &LazyArray {
                type Output = Result<LazyArray, ExplorerError>;

                fn $method(self, rhs: &LazyArray) -> Self::Output {
                    self.binary(rhs, $op)
                }
            }

            impl std::ops::$trait<f64> for &LazyArray {
                type Output = LazyArray;

                fn $method(self, rhs: f64) -> Self::Output {
                    self.scalar($op, rhs)
                }
            }
        )*
    };
}

impl_binary_ops!(
    Add, add, BinaryOp::Add;
    Sub, sub, BinaryOp::Sub;
    Mul, mul, BinaryOp::Mul;
    Div, div, BinaryOp::Div
);
