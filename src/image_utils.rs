use image::{DynamicImage, GenericImageView, GrayImage};
use ndarray::Array2;

use crate::error::{ForensicsError, Result};

pub fn gray_to_array(image: &GrayImage) -> Array2<f64> {
    let (width, height) = image.dimensions();
    let mut arr = Array2::zeros((height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        arr[[y as usize, x as usize]] = pixel[0] as f64;
    }

    arr
}

/// Fails with `EmptyRegion` when either dimension is zero.
pub fn ensure_non_empty(image: &DynamicImage, role: &str) -> Result<()> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ForensicsError::EmptyRegion(format!(
            "{role} region is {width}x{height}"
        )));
    }
    Ok(())
}

/// Sample mean and population standard deviation of an array.
pub fn mean_and_std(arr: &Array2<f64>) -> (f64, f64) {
    let mean = arr.mean().unwrap_or(0.0);
    let variance = arr.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0);
    (mean, variance.sqrt())
}

/// Zero-mean normalized cross-correlation of two equally shaped arrays, in
/// [-1, 1]. Returns `None` when either input has no variance.
pub fn zero_mean_correlation(a: &Array2<f64>, b: &Array2<f64>) -> Option<f64> {
    debug_assert_eq!(a.dim(), b.dim());

    let mean_a = a.mean()?;
    let mean_b = b.mean()?;
    let da = a.mapv(|v| v - mean_a);
    let db = b.mapv(|v| v - mean_b);

    let energy_a = da.mapv(|v| v * v).sum();
    let energy_b = db.mapv(|v| v * v).sum();
    let denominator = (energy_a * energy_b).sqrt();

    if denominator < 1e-9 {
        return None;
    }

    Some(((&da * &db).sum() / denominator).clamp(-1.0, 1.0))
}

pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
