//! Coordinate lookup.

use crate::{Error, Result};

/// Returns the index whose coordinate is closest to `value`.
///
/// Ties resolve to the lowest index. NaN coordinates never win.
///
/// # Errors
/// Returns `EmptyCoordinates` if `coords` is empty.
pub fn nearest_index(coords: &[f64], value: f64) -> Result<usize> {
    if coords.is_empty() {
        return Err(Error::EmptyCoordinates);
    }

    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &c) in coords.iter().enumerate() {
        let dist = (c - value).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    Ok(best)
}

/// Checks that a coordinate array can label a data axis.
///
/// # Errors
/// Returns `CoordinateLength` if the lengths differ.
pub fn check_axis(coords: &[f64], axis: usize, expected: usize) -> Result<()> {
    if coords.len() == expected {
        Ok(())
    } else {
        Err(Error::CoordinateLength {
            axis,
            expected,
            actual: coords.len(),
        })
    }
}
