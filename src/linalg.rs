//! Symmetric eigen-decomposition.
//!
//! Cyclic Jacobi rotations in `f64`. Slower than a tridiagonal QR for large
//! matrices but short, dependency-free, and exactly reproducible: the rotation
//! order is fixed, so the same matrix always yields the same bits.

/// Eigenpairs of a symmetric matrix.
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    /// Eigenvalues, largest first.
    pub values: Vec<f64>,
    /// `vectors[k]` is the unit eigenvector for `values[k]`.
    pub vectors: Vec<Vec<f64>>,
}

const MAX_SWEEPS: usize = 100;

/// Decompose the `dim x dim` symmetric matrix stored row-major in `matrix`.
///
/// Ordering and sign are canonical:
/// - eigenpairs are sorted by descending eigenvalue, ties by ascending position
///   in the Jacobi output;
/// - each eigenvector is flipped so that its largest-magnitude component is
///   positive (the lowest index wins a magnitude tie).
pub fn symmetric_eigen(matrix: &[f64], dim: usize) -> SymmetricEigen {
    debug_assert_eq!(matrix.len(), dim * dim);
    let mut a = matrix.to_vec();
    // v holds eigenvectors as columns.
    let mut v = vec![0.0f64; dim * dim];
    for i in 0..dim {
        v[i * dim + i] = 1.0;
    }

    let scale: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt().max(f64::MIN_POSITIVE);
    for _ in 0..MAX_SWEEPS {
        let off: f64 = (0..dim)
            .flat_map(|p| ((p + 1)..dim).map(move |q| (p, q)))
            .map(|(p, q)| a[p * dim + q] * a[p * dim + q])
            .sum::<f64>()
            .sqrt();
        if off <= 1e-14 * scale {
            break;
        }

        for p in 0..dim {
            for q in (p + 1)..dim {
                let apq = a[p * dim + q];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let app = a[p * dim + p];
                let aqq = a[q * dim + q];
                let theta = (aqq - app) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..dim {
                    let akp = a[k * dim + p];
                    let akq = a[k * dim + q];
                    a[k * dim + p] = c * akp - s * akq;
                    a[k * dim + q] = s * akp + c * akq;
                }
                for k in 0..dim {
                    let apk = a[p * dim + k];
                    let aqk = a[q * dim + k];
                    a[p * dim + k] = c * apk - s * aqk;
                    a[q * dim + k] = s * apk + c * aqk;
                }
                for k in 0..dim {
                    let vkp = v[k * dim + p];
                    let vkq = v[k * dim + q];
                    v[k * dim + p] = c * vkp - s * vkq;
                    v[k * dim + q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..dim).collect();
    order.sort_by(|&i, &j| a[j * dim + j].total_cmp(&a[i * dim + i]).then(i.cmp(&j)));

    let mut values = Vec::with_capacity(dim);
    let mut vectors = Vec::with_capacity(dim);
    for col in order {
        values.push(a[col * dim + col]);
        let mut vec: Vec<f64> = (0..dim).map(|row| v[row * dim + col]).collect();
        canonicalize_sign(&mut vec);
        vectors.push(vec);
    }
    SymmetricEigen { values, vectors }
}

/// Flip `v` so its largest-magnitude component is positive.
pub fn canonicalize_sign(v: &mut [f64]) {
    let mut pivot = 0usize;
    for (i, x) in v.iter().enumerate() {
        if x.abs() > v[pivot].abs() {
            pivot = i;
        }
    }
    if v.get(pivot).is_some_and(|&x| x < 0.0) {
        for x in v.iter_mut() {
            *x = -*x;
        }
    }
}
