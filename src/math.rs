use num_traits::Float;
use std::f32::consts::PI;

/// Wraps an angle difference into `[-pi, pi]`.
#[inline]
pub fn wrap_angle(mut a: f32) -> f32 {
    while a > PI {
        a -= 2.0 * PI;
    }
    while a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Zeroes values whose magnitude is under `threshold`.
#[inline]
pub fn dead_zone<T: Float>(v: T, threshold: T) -> T {
    if v.abs() < threshold {
        T::zero()
    } else {
        v
    }
}

#[inline]
pub fn lerp<T: Float>(from: T, to: T, alpha: T) -> T {
    from + (to - from) * alpha
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn median<T: Float>(values: &[T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / T::from(2.0)?)
    }
}

/// `[Q1 - k*IQR, Q3 + k*IQR]` using nearest-rank quartiles.
pub fn iqr_bounds<T: Float>(values: &[T], k: T) -> Option<(T, T)> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let q1 = sorted[sorted.len() / 4];
    let q3 = sorted[(3 * sorted.len()) / 4];
    let iqr = (q3 - q1).max(T::from(1e-6)?);

    Some((q1 - k * iqr, q3 + k * iqr))
}

/// Keeps the `(dx, dy)` pairs whose both components sit inside their axis'
/// IQR fence. Fewer than four pairs are returned unchanged.
pub fn filter_iqr_pairs<T: Float>(pairs: &[(T, T)], k: T) -> Vec<(T, T)> {
    if pairs.len() < 4 {
        return pairs.to_vec();
    }

    let xs: Vec<T> = pairs.iter().map(|p| p.0).collect();
    let ys: Vec<T> = pairs.iter().map(|p| p.1).collect();

    let (bounds_x, bounds_y) = match (iqr_bounds(&xs, k), iqr_bounds(&ys, k)) {
        (Some(bx), Some(by)) => (bx, by),
        _ => return pairs.to_vec(),
    };

    pairs
        .iter()
        .copied()
        .filter(|(x, y)| {
            *x >= bounds_x.0 && *x <= bounds_x.1 && *y >= bounds_y.0 && *y <= bounds_y.1
        })
        .collect()
}
