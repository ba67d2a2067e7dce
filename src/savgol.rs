//! Savitzky-Golay smoothing.
//!
//! Interior points use the usual convolution weights of a least-squares
//! polynomial fit over a centered window. The first and last half-windows are
//! filled by evaluating the polynomial fitted to the first (last) full window,
//! which keeps the filter from shrinking towards the series edges.

/// Smooths `data` with a centered window of `window` samples (odd) and a
/// polynomial of degree `order`. Returns `data` unchanged when the window does
/// not fit.
pub fn savitzky_golay_smooth(data: &[f64], window: usize, order: usize) -> Vec<f64> {
    let n = data.len();
    if window % 2 == 0 || window <= order || window > n {
        return data.to_vec();
    }

    let half = window / 2;
    let weights = convolution_weights(window, order);
    let mut result = vec![0.0; n];

    for i in half..n - half {
        result[i] = data[i - half..=i + half]
            .iter()
            .zip(&weights)
            .map(|(v, w)| v * w)
            .sum();
    }

    // Edges: evaluate the fit of the outermost full windows.
    // Positions are centered on the window for a better conditioned fit.
    let xs = centered_positions(window);
    if let Some(head) = polyfit(&xs, &data[..window], order) {
        for (i, slot) in result.iter_mut().enumerate().take(half) {
            *slot = polyval(&head, xs[i]);
        }
    }
    if let Some(tail) = polyfit(&xs, &data[n - window..], order) {
        for i in n - half..n {
            result[i] = polyval(&tail, xs[i - (n - window)]);
        }
    }

    result
}

/// Weights that produce the fitted value at the window center.
fn convolution_weights(window: usize, order: usize) -> Vec<f64> {
    let xs = centered_positions(window);
    // Fitting a unit impulse at each position gives that position's weight.
    (0..window)
        .map(|j| {
            let mut impulse = vec![0.0; window];
            impulse[j] = 1.0;
            polyfit(&xs, &impulse, order)
                .map(|c| c[0])
                .unwrap_or(1.0 / window as f64)
        })
        .collect()
}

fn centered_positions(window: usize) -> Vec<f64> {
    let half = (window / 2) as f64;
    (0..window).map(|i| i as f64 - half).collect()
}

/// Least-squares polynomial coefficients, lowest degree first.
fn polyfit(xs: &[f64], ys: &[f64], order: usize) -> Option<Vec<f64>> {
    let m = order + 1;
    let mut ata = vec![vec![0.0; m]; m];
    let mut aty = vec![0.0; m];

    for (&x, &y) in xs.iter().zip(ys) {
        let powers: Vec<f64> = (0..m).map(|k| x.powi(k as i32)).collect();
        for r in 0..m {
            aty[r] += powers[r] * y;
            for c in 0..m {
                ata[r][c] += powers[r] * powers[c];
            }
        }
    }

    solve(ata, aty)
}

fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}
