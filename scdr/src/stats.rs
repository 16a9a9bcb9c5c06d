//! Statistics functions

use ndarray::prelude::*;
use ndarray::{Data, DataMut};
use ndarray_stats::errors::QuantileError;
use noisy_float::prelude::{n64, N64};
use num_traits::FromPrimitive;
use std::ops::{Add, Div};

/// Return the median. Sorts its argument in place.
// ndarray-stats' quantile_mut can overflow the stack on large inputs
// (https://github.com/rust-ndarray/ndarray-stats/issues/86), so sort instead.
pub fn median_mut<S, T>(xs: &mut ArrayBase<S, Ix1>) -> Result<T, QuantileError>
where
    S: DataMut<Elem = T>,
    T: Copy + Ord + FromPrimitive + Add<Output = T> + Div<Output = T>,
{
    if xs.is_empty() {
        return Err(QuantileError::EmptyInput);
    }
    if let Some(slice) = xs.as_slice_mut() {
        slice.sort_unstable();
        return Ok(middle(slice));
    }
    let mut values = xs.to_vec();
    values.sort_unstable();
    Ok(middle(&values))
}

fn middle<T>(sorted: &[T]) -> T
where
    T: Copy + FromPrimitive + Add<Output = T> + Div<Output = T>,
{
    let len = sorted.len();
    if len % 2 == 0 {
        (sorted[len / 2] + sorted[len / 2 - 1]) / T::from_u64(2).unwrap()
    } else {
        sorted[len / 2]
    }
}

/// Median of floating point values. NaN values are rejected.
pub fn median_f64(xs: &[f64]) -> Result<f64, QuantileError> {
    if xs.iter().any(|x| x.is_nan()) {
        return Err(QuantileError::InvalidQuantile(n64(0.5)));
    }
    let mut arr: Array1<N64> = xs.iter().map(|&x| n64(x)).collect();
    median_mut(&mut arr).map(f64::from)
}

/// Mean and population standard deviation (`ddof = 0`).
pub fn mean_sd<S>(xs: &ArrayBase<S, Ix1>) -> (f64, f64)
where
    S: Data<Elem = f64>,
{
    if xs.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let mean = xs.mean().unwrap_or(f64::NAN);
    (mean, xs.std(0.0))
}

/// Center and scale every row of `x` to mean 0 and unit (population) variance, computed
/// over the columns. Rows with zero variance are centered only.
pub fn standardize_rows(x: ArrayView2<f64>) -> Array2<f64> {
    let mut out = x.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let (mean, sd) = mean_sd(&row);
        let scale = if sd > 0.0 { sd } else { 1.0 };
        row.mapv_inplace(|v| (v - mean) / scale);
    }
    out
}
