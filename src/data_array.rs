//! Materialised arrays.

use crate::coords::{Coordinate, Dimension, Selector};
use crate::error::ExplorerError;

use ndarray::{ArrayD, Axis};

/// The values of a computation together with their dimensions and coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct DataArray {
    /// Optional name used in figure titles
    pub name: Option<String>,
    /// Dimensions, one per axis of `values`
    pub dims: Vec<Dimension>,
    /// Values, `NaN` where missing
    pub values: ArrayD<f64>,
}

impl DataArray {
    /// Returns a new DataArray, checking that the values match the dimensions.
    pub fn new(
        name: Option<String>,
        dims: Vec<Dimension>,
        values: ArrayD<f64>,
    ) -> Result<Self, ExplorerError> {
        let shape: Vec<usize> = dims.iter().map(Dimension::len).collect();
        if shape != values.shape() {
            return Err(ExplorerError::ShapeInvalid(ndarray::ShapeError::from_kind(
                ndarray::ErrorKind::IncompatibleShape,
            )));
        }
        Ok(Self { name, dims, values })
    }

    pub fn dim_names(&self) -> Vec<&str> {
        self.dims.iter().map(|dim| dim.name.as_str()).collect()
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Returns the axis of a dimension.
    pub fn axis(&self, dim: &str) -> Result<usize, ExplorerError> {
        self.dims
            .iter()
            .position(|d| d.name == dim)
            .ok_or_else(|| ExplorerError::UnknownDimension {
                dimension: dim.to_string(),
                available: self.dims.iter().map(|d| d.name.clone()).collect(),
            })
    }

    pub fn coord(&self, dim: &str) -> Result<&Coordinate, ExplorerError> {
        Ok(&self.dims[self.axis(dim)?].coord)
    }

    /// Returns the entry at `index` along an axis, without that axis.
    pub fn index_axis(&self, axis: usize, index: usize) -> DataArray {
        let mut dims = self.dims.clone();
        dims.remove(axis);
        DataArray {
            name: self.name.clone(),
            dims,
            values: self.values.index_axis(Axis(axis), index).to_owned(),
        }
    }

    /// Selects along a dimension of the materialised values.
    pub fn sel(&self, dim: &str, selector: &Selector) -> Result<DataArray, ExplorerError> {
        let axis = self.axis(dim)?;
        let selection = self.dims[axis].coord.resolve(dim, selector)?;
        if selection.drop {
            return Ok(self.index_axis(axis, selection.indices[0]));
        }
        let mut dims = self.dims.clone();
        dims[axis].coord = dims[axis].coord.take(&selection.indices);
        Ok(DataArray {
            name: self.name.clone(),
            dims,
            values: self.values.select(Axis(axis), &selection.indices),
        })
    }

    /// Returns the valid values, skipping `NaN`.
    pub fn valid_values(&self) -> impl Iterator<Item = &f64> {
        self.values.iter().filter(|value| !value.is_nan())
    }
}

impl std::fmt::Display for DataArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dims: Vec<String> = self
            .dims
            .iter()
            .map(|dim| format!("{}: {}", dim.name, dim.len()))
            .collect();
        write!(
            f,
            "{} ({})",
            self.name.as_deref().unwrap_or("<unnamed>"),
            dims.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::array;

    fn grid() -> DataArray {
        DataArray::new(
            Some("elevation".to_string()),
            vec![
                Dimension::new("lat", Coordinate::Numeric(vec![30.0, 30.5])),
                Dimension::new("lon", Coordinate::Numeric(vec![-98.0, -97.5, -97.0])),
            ],
            array![[1.0, 2.0, 3.0], [4.0, f64::NAN, 6.0]].into_dyn(),
        )
        .unwrap()
    }

    #[test]
    fn new_checks_shape() {
        let err = DataArray::new(
            None,
            vec![Dimension::new("x", Coordinate::index(3))],
            array![1.0, 2.0].into_dyn(),
        )
        .unwrap_err();
        assert!(matches!(err, ExplorerError::ShapeInvalid(_)));
    }

    #[test]
    fn sel_point_drops_dimension() {
        let row = grid().sel("lat", &Selector::Value(30.5)).unwrap();
        assert_eq!(vec!["lon"], row.dim_names());
        assert_eq!(&[3], row.shape());
        assert_eq!(4.0, row.values[[0]]);
    }

    #[test]
    fn sel_range_keeps_dimension() {
        let columns = grid().sel("lon", &Selector::Range(-97.0, -97.5)).unwrap();
        assert_eq!(vec!["lat", "lon"], columns.dim_names());
        assert_eq!(
            &Coordinate::Numeric(vec![-97.5, -97.0]),
            columns.coord("lon").unwrap()
        );
        assert_eq!(array![[2.0, 3.0], [f64::NAN, 6.0]].into_dyn().shape(), columns.shape());
    }

    #[test]
    fn unknown_dimension() {
        match grid().axis("time").unwrap_err() {
            ExplorerError::UnknownDimension {
                dimension,
                available,
            } => {
                assert_eq!("time", dimension);
                assert_eq!(vec!["lat", "lon"], available);
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn valid_values_and_display() {
        let grid = grid();
        assert_eq!(5, grid.valid_values().count());
        assert_eq!("elevation (lat: 2, lon: 3)", grid.to_string());
    }
}
