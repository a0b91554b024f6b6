//! Dense row reduction for linear systems over `f64`.
//!
//! Linear relations between free parameters are collected into an augmented
//! `nalgebra::DMatrix<f64>`: one row per relation, one column per variable and a final
//! column for the constant term. [`to_row_echelon_form`] brings such a matrix into row
//! echelon form with unit pivots, which is what substitution merging reads back.

use nalgebra::DMatrix;

/// Relative tolerance: an entry counts as zero when its magnitude is at most `EPSILON`
/// times the magnitude of the largest entry its row has carried.
pub const EPSILON: f64 = 1e-10;

/// Reduces `matrix` in place to row echelon form with unit pivots.
///
/// Only the first `pivot_columns` columns are eligible as pivots; the remaining columns
/// (the augmented constant) are carried along. Within each column the row with the
/// largest magnitude is chosen as pivot. Pivots are set to exactly `1.0`, entries below a
/// pivot to exactly `0.0`, and entries that are negligible relative to their row are
/// flushed to zero afterwards. A system whose coefficients are all small is therefore
/// reduced the same way as its rescaled counterpart.
///
/// # Returns
/// The pivot column of each nonzero row, in row order
///
/// # Example
/// ```
/// use nalgebra::DMatrix;
/// use peach::linalg::to_row_echelon_form;
///
/// // x + y = 3, x - y = 1 written as [x y | -constant]
/// let mut m = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, -3.0, 1.0, -1.0, -1.0]);
/// let pivots = to_row_echelon_form(&mut m, 2);
/// assert_eq!(pivots, vec![0, 1]);
/// assert_eq!(m[(1, 1)], 1.0);
/// assert_eq!(m[(1, 0)], 0.0);
/// ```
pub fn to_row_echelon_form(matrix: &mut DMatrix<f64>, pivot_columns: usize) -> Vec<usize> {
    let (rows, cols) = matrix.shape();
    let pivot_columns = pivot_columns.min(cols);
    let mut pivots = Vec::with_capacity(rows.min(pivot_columns));
    // Largest magnitude each row has carried, the reference for its tolerance
    let mut scale: Vec<f64> = (0..rows).map(|r| matrix.row(r).amax()).collect();
    let mut row = 0;

    for col in 0..pivot_columns {
        if row == rows {
            break;
        }

        let best = (row..rows)
            .map(|r| (r, matrix[(r, col)].abs()))
            .filter(|&(r, magnitude)| magnitude > EPSILON * scale[r])
            .fold(None, |acc: Option<(usize, f64)>, candidate| match acc {
                Some(current) if current.1 >= candidate.1 => Some(current),
                _ => Some(candidate),
            });
        let Some((best, _)) = best else {
            continue;
        };
        if best != row {
            matrix.swap_rows(row, best);
            scale.swap(row, best);
        }

        let pivot = matrix[(row, col)];
        for c in col..cols {
            matrix[(row, c)] /= pivot;
        }
        matrix[(row, col)] = 1.0;
        scale[row] /= pivot.abs();

        for r in row + 1..rows {
            let factor = matrix[(r, col)];
            if factor != 0.0 {
                for c in col..cols {
                    let delta = factor * matrix[(row, c)];
                    matrix[(r, c)] -= delta;
                }
                scale[r] = scale[r].max(factor.abs() * scale[row]);
            }
            matrix[(r, col)] = 0.0;
        }

        pivots.push(col);
        row += 1;
    }

    for (r, reference) in scale.iter().enumerate() {
        for c in 0..cols {
            if matrix[(r, c)].abs() <= EPSILON * reference {
                matrix[(r, c)] = 0.0;
            }
        }
    }
    pivots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_solution() {
        // 2x + 4y = 10, 3x + y = 5 (constants moved to the left)
        let mut m = DMatrix::from_row_slice(2, 3, &[2.0, 4.0, -10.0, 3.0, 1.0, -5.0]);
        let pivots = to_row_echelon_form(&mut m, 2);
        assert_eq!(pivots, vec![0, 1]);

        // Pivot row for x was the larger entry (3x + y = 5)
        assert_eq!(m[(0, 0)], 1.0);
        assert_eq!(m[(1, 0)], 0.0);
        assert_eq!(m[(1, 1)], 1.0);

        // Back substitution: y = 2, x = 1
        let y = -m[(1, 2)];
        let x = -m[(0, 2)] - m[(0, 1)] * y;
        assert!((y - 2.0).abs() < 1e-12);
        assert!((x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_dependent_rows_vanish() {
        // x + y = 0 and 2x + 2y = 0
        let mut m = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 0.0, 2.0, 2.0, 0.0]);
        let pivots = to_row_echelon_form(&mut m, 2);
        assert_eq!(pivots, vec![0]);
        assert!(m.row(1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_constant_column_is_not_a_pivot() {
        // x = 1 and x = 2
        let mut m = DMatrix::from_row_slice(2, 2, &[1.0, -1.0, 1.0, -2.0]);
        let pivots = to_row_echelon_form(&mut m, 1);
        assert_eq!(pivots, vec![0]);
        assert_eq!(m[(1, 0)], 0.0);
        assert_eq!(m[(1, 1)], -1.0);
    }

    #[test]
    fn test_small_coefficients_are_kept() {
        // 1e-12 x + 2e-12 y = 3e-12, 1e-12 x - 1e-12 y = 0
        let mut m = DMatrix::from_row_slice(
            2,
            3,
            &[1e-12, 2e-12, -3e-12, 1e-12, -1e-12, 0.0],
        );
        let pivots = to_row_echelon_form(&mut m, 2);
        assert_eq!(pivots, vec![0, 1]);
        let y = -m[(1, 2)];
        let x = -m[(0, 2)] - m[(0, 1)] * y;
        assert!((y - 1.0).abs() < 1e-9);
        assert!((x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancellation_is_relative() {
        // Second row is the first scaled by 1e6 up to rounding noise
        let mut m = DMatrix::from_row_slice(
            2,
            3,
            &[0.1, 0.2, 0.3, 1e5, 2e5, 3e5 + 1e-7],
        );
        let pivots = to_row_echelon_form(&mut m, 2);
        assert_eq!(pivots, vec![0]);
        assert!(m.row(1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_skips_empty_columns() {
        // Column 0 is all zero, pivot moves to column 1
        let mut m = DMatrix::from_row_slice(2, 3, &[0.0, 2.0, 4.0, 0.0, 1.0, 1.0]);
        let pivots = to_row_echelon_form(&mut m, 2);
        assert_eq!(pivots, vec![1]);
        assert_eq!(m[(0, 1)], 1.0);
        assert_eq!(m[(0, 2)], 2.0);
        assert_eq!(m[(1, 2)], -1.0);
    }
}
