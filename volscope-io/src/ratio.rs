//! Normalized 2D preview grids from one dataset or a numerator/denominator pair.

use crate::h5::open_dataset;
use crate::{Error, Result};
use hdf5::File;
use ndarray::Array2;
use volscope_core::{
    check_element_count, normalize_min_max, ratio_with_floor, sanitize, InfPolicy,
};

/// Builds preview grids with values in `[0, 1]`.
pub struct RatioEngine {
    file: File,
}

impl RatioEngine {
    #[must_use]
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Normalized grid of a single dataset.
    ///
    /// NaN and both infinities become 0.0 before scaling. A constant input
    /// yields an all-zero grid.
    ///
    /// # Errors
    /// Returns `DatasetNotFound`, or `ShapeMismatch` if the element count
    /// differs from `map_shape`.
    pub fn compute_single(&self, path: &str, map_shape: (usize, usize)) -> Result<Array2<f64>> {
        let mut values = self.load_flat(path, map_shape)?;
        sanitize(&mut values, InfPolicy::Zero);
        normalize_min_max(&mut values);
        into_grid(values, map_shape)
    }

    /// Normalized grid of `numerator / denominator`.
    ///
    /// Exact zeros in the denominator are replaced by `1e-10`; afterwards NaN
    /// and `-inf` become 0.0 and `+inf` becomes 1.0.
    ///
    /// # Errors
    /// Returns `DatasetNotFound`, or `ShapeMismatch` if either operand's
    /// element count differs from `map_shape`.
    pub fn compute_ratio(
        &self,
        numerator_path: &str,
        denominator_path: &str,
        map_shape: (usize, usize),
    ) -> Result<Array2<f64>> {
        let numerator = self.load_flat(numerator_path, map_shape)?;
        let denominator = self.load_flat(denominator_path, map_shape)?;

        let mut values = ratio_with_floor(&numerator, &denominator)?;
        sanitize(&mut values, InfPolicy::One);
        normalize_min_max(&mut values);
        into_grid(values, map_shape)
    }

    fn load_flat(&self, path: &str, (rows, cols): (usize, usize)) -> Result<Vec<f64>> {
        let values = open_dataset(&self.file, path)?.read_raw::<f64>()?;
        check_element_count(values.len(), &[rows, cols])?;
        Ok(values)
    }
}

fn into_grid(values: Vec<f64>, shape: (usize, usize)) -> Result<Array2<f64>> {
    Array2::from_shape_vec(shape, values).map_err(|_| {
        Error::CoreError(volscope_core::Error::ShapeMismatch {
            shape: vec![shape.0, shape.1],
            len: shape.0 * shape.1,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};
    use tempfile::NamedTempFile;
    use volscope_core::ratio_with_floor;

    fn engine() -> (NamedTempFile, RatioEngine) {
        let tmp = NamedTempFile::new().unwrap();
        {
            let file = File::create(tmp.path()).unwrap();
            let maps = file.create_group("maps").unwrap();

            let counts = maps.new_dataset::<f64>().shape((2, 3)).create("counts").unwrap();
            counts
                .write(&arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 9.0]]))
                .unwrap();

            let dirty = maps.new_dataset::<f64>().shape((2, 2)).create("dirty").unwrap();
            dirty
                .write(&arr2(&[[f64::NAN, 2.0], [f64::INFINITY, 4.0]]))
                .unwrap();

            let den = maps.new_dataset::<f64>().shape((2, 3)).create("den").unwrap();
            den.write(&arr2(&[[0.0, 1.0, 2.0], [0.0, 5.0, 3.0]])).unwrap();

            let huge = maps.new_dataset::<f64>().shape((2, 3)).create("huge").unwrap();
            huge.write(&arr2(&[[1.5e298, 1.0, 2.0], [-1.5e298, 5.0, 3.0]]))
                .unwrap();

            let flat = maps.new_dataset::<f32>().shape((6,)).create("flat").unwrap();
            flat.write(&arr1(&[3.0_f32, 3.0, 3.0, 3.0, 3.0, 3.0])).unwrap();

            let wrong = maps.new_dataset::<f64>().shape((5,)).create("wrong").unwrap();
            wrong.write(&arr1(&[1.0, 2.0, 3.0, 4.0, 5.0])).unwrap();
        }
        let file = File::open(tmp.path()).unwrap();
        (tmp, RatioEngine::new(file))
    }

    #[test]
    fn test_single_normalizes() {
        let (_tmp, engine) = engine();
        let grid = engine.compute_single("maps/counts", (2, 3)).unwrap();
        assert_abs_diff_eq!(grid[[0, 0]], 0.0);
        assert_abs_diff_eq!(grid[[1, 2]], 1.0);
        assert_abs_diff_eq!(grid[[0, 2]], 0.25);

        // reshaped from a different layout
        let wide = engine.compute_single("maps/counts", (3, 2)).unwrap();
        assert_eq!(wide.dim(), (3, 2));
    }

    #[test]
    fn test_single_removes_non_finite() {
        let (_tmp, engine) = engine();
        let grid = engine.compute_single("maps/dirty", (2, 2)).unwrap();
        assert!(grid.iter().all(|v| v.is_finite()));
        assert_abs_diff_eq!(grid[[0, 0]], 0.0);
        assert_abs_diff_eq!(grid[[1, 0]], 0.0);
        assert_abs_diff_eq!(grid[[0, 1]], 0.5);
        assert_abs_diff_eq!(grid[[1, 1]], 1.0);
    }

    #[test]
    fn test_constant_single_is_zero() {
        let (_tmp, engine) = engine();
        let grid = engine.compute_single("maps/flat", (2, 3)).unwrap();
        assert!(grid.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_ratio_with_zero_denominator() {
        let (_tmp, engine) = engine();
        let grid = engine.compute_ratio("maps/counts", "maps/den", (2, 3)).unwrap();
        assert!(grid.iter().all(|v| v.is_finite()));
        assert!(grid.iter().all(|&v| (0.0..=1.0).contains(&v)));
        // 4 / 1e-10 is the maximum
        assert_abs_diff_eq!(grid[[1, 0]], 1.0);
    }

    #[test]
    fn test_ratio_with_huge_numerators_over_zero() {
        let (_tmp, engine) = engine();
        let grid = engine.compute_ratio("maps/huge", "maps/den", (2, 3)).unwrap();
        assert!(grid.iter().all(|v| v.is_finite()));
        assert_abs_diff_eq!(grid[[0, 0]], 1.0);
        assert_abs_diff_eq!(grid[[1, 0]], 0.0);
        assert_abs_diff_eq!(grid[[1, 1]], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_ratio_of_identical_operands() {
        let (_tmp, engine) = engine();
        let numerator = engine.load_flat("maps/counts", (2, 3)).unwrap();
        let raw = ratio_with_floor(&numerator, &numerator).unwrap();
        assert!(raw.iter().all(|&v| v == 1.0));

        let grid = engine.compute_ratio("maps/counts", "maps/counts", (2, 3)).unwrap();
        assert_eq!(grid.dim(), (2, 3));
        assert!(grid.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_shape_mismatch() {
        let (_tmp, engine) = engine();
        assert!(matches!(
            engine.compute_single("maps/wrong", (2, 3)),
            Err(Error::CoreError(volscope_core::Error::ShapeMismatch { .. }))
        ));
        assert!(matches!(
            engine.compute_ratio("maps/counts", "maps/wrong", (2, 3)),
            Err(Error::CoreError(volscope_core::Error::ShapeMismatch { .. }))
        ));
        assert!(matches!(
            engine.compute_ratio("maps/counts", "maps/missing", (2, 3)),
            Err(Error::DatasetNotFound(_))
        ));
    }
}
