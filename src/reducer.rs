//! Fit-once PCA feature reducer.
//!
//! Landmark vectors are high-dimensional (hundreds of coordinates) while the
//! regression target is 2D; the reducer projects samples onto the top
//! principal components of the first sufficient dataset and is then frozen.
//! The decomposition uses power iteration with deflation and deterministic
//! start vectors, so fitting the same data twice yields bit-identical
//! artifacts.
//!
//! The fitted reducer is persisted as a JSON artifact
//! `{mean, components, n_components}` written atomically (temp file then
//! rename). On startup an existing artifact is always loaded verbatim, never
//! refit, so reduced coordinates stay consistent with previously trained
//! model weights.

use std::path::Path;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{GazeError, Result};

const MAX_ITER: usize = 100;
const TOLERANCE: f32 = 1e-6;

/// Frozen mean-centering + projection onto principal components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureReducer {
    /// Mean of the fitting data
    mean: Vec<f32>,
    /// Principal components, row-major, `n_components` rows of `input_dim`
    components: Vec<Vec<f32>>,
    n_components: usize,
}

impl FeatureReducer {
    /// Fit a reducer on `data` (n_samples x input_dim).
    ///
    /// Deterministic: no RNG is involved, power iteration starts from fixed
    /// pseudo-random vectors.
    ///
    /// # Errors
    ///
    /// Returns a reducer error if `data` is empty, rows disagree in width,
    /// any value is non-finite, or `n_components` exceeds
    /// `min(n_samples, input_dim)`.
    pub fn fit(data: &[Vec<f32>], n_components: usize) -> Result<Self> {
        if data.is_empty() {
            return Err(GazeError::Reducer("cannot fit on an empty dataset".into()));
        }
        let n_samples = data.len();
        let input_dim = data[0].len();
        for (i, row) in data.iter().enumerate() {
            if row.len() != input_dim {
                return Err(GazeError::validation(
                    format!("{input_dim} features"),
                    format!("{} features in sample {i}", row.len()),
                ));
            }
            for &val in row {
                if !val.is_finite() {
                    return Err(GazeError::Reducer(format!(
                        "non-finite value in sample {i}"
                    )));
                }
            }
        }
        if n_components == 0 || n_components > n_samples.min(input_dim) {
            return Err(GazeError::Reducer(format!(
                "{n_components} components not supported for {n_samples} samples of width {input_dim}"
            )));
        }

        let mean = compute_mean(data);
        let centered: Vec<Vec<f32>> = data
            .iter()
            .map(|row| row.iter().zip(&mean).map(|(x, m)| x - m).collect())
            .collect();

        let cov = covariance(&centered, input_dim);
        let components = power_iteration(&cov, n_components);

        Ok(Self {
            mean,
            components,
            n_components,
        })
    }

    /// Load an artifact, or fit from `data` and persist when none exists.
    ///
    /// An existing artifact is loaded verbatim and never refit, keeping the
    /// reduced coordinate system stable across restarts.
    ///
    /// # Errors
    ///
    /// An unreadable or invalid artifact is fatal (Reducer error), as is an
    /// insufficient dataset when fitting is required.
    pub fn load_or_fit(
        path: impl AsRef<Path>,
        data: &[Vec<f32>],
        n_components: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let reducer = Self::load(path)?;
            tracing::info!(
                "loaded reducer {}: {} components over {} features",
                path.display(),
                reducer.n_components,
                reducer.input_dim()
            );
            return Ok(reducer);
        }
        let reducer = Self::fit(data, n_components)?;
        reducer.save(path)?;
        tracing::info!(
            "fitted reducer on {} samples, persisted to {}",
            data.len(),
            path.display()
        );
        Ok(reducer)
    }

    /// Deserialize a persisted artifact, validating its internal shape.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let reducer: Self = serde_json::from_str(&text)?;
        if reducer.components.len() != reducer.n_components {
            return Err(GazeError::Reducer(format!(
                "artifact declares {} components but holds {}",
                reducer.n_components,
                reducer.components.len()
            )));
        }
        let input_dim = reducer.mean.len();
        for row in &reducer.components {
            if row.len() != input_dim {
                return Err(GazeError::Reducer(format!(
                    "component width {} disagrees with mean width {input_dim}",
                    row.len()
                )));
            }
        }
        Ok(reducer)
    }

    /// Persist the artifact atomically: write a temp file in the same
    /// directory, then rename over the destination.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        let text = serde_json::to_string(self)?;
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Number of retained components (output width).
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Expected input width.
    pub fn input_dim(&self) -> usize {
        self.mean.len()
    }

    /// Project rows onto the principal components: `(x − mean) · Pᵀ`.
    ///
    /// # Errors
    ///
    /// Returns a validation error on input width mismatch.
    pub fn transform(&self, data: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let input_dim = self.input_dim();
        let mut out = Vec::with_capacity(data.len());
        for row in data {
            if row.len() != input_dim {
                return Err(GazeError::validation(
                    format!("{input_dim} features"),
                    format!("{} features", row.len()),
                ));
            }
            let centered: Vec<f32> = row.iter().zip(&self.mean).map(|(x, m)| x - m).collect();
            let projected: Vec<f32> = self
                .components
                .iter()
                .map(|pc| dot(&centered, pc))
                .collect();
            out.push(projected);
        }
        Ok(out)
    }

    /// Tensor form of [`transform`](Self::transform) for a batch
    /// `(batch, input_dim)` on any device.
    pub fn project(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, width) = xs.dims2()?;
        if width != self.input_dim() {
            return Err(GazeError::validation(
                format!("{} features", self.input_dim()),
                format!("{width} features"),
            ));
        }
        let device = xs.device();
        let mean = Tensor::from_slice(&self.mean, (1, self.input_dim()), device)?;
        let flat: Vec<f32> = self.components.iter().flatten().copied().collect();
        let proj = Tensor::from_slice(&flat, (self.n_components, self.input_dim()), device)?;
        let centered = xs.broadcast_sub(&mean)?;
        Ok(centered.matmul(&proj.t()?)?)
    }
}

fn compute_mean(data: &[Vec<f32>]) -> Vec<f32> {
    let n = data.len() as f32;
    let width = data[0].len();
    let mut mean = vec![0.0f32; width];
    for row in data {
        for (m, x) in mean.iter_mut().zip(row) {
            *m += x;
        }
    }
    for m in &mut mean {
        *m /= n;
    }
    mean
}

fn covariance(centered: &[Vec<f32>], width: usize) -> Vec<Vec<f32>> {
    let mut cov = vec![vec![0.0f32; width]; width];
    let scale = 1.0 / (centered.len() as f32 - 1.0).max(1.0);
    for i in 0..width {
        for j in i..width {
            let mut sum = 0.0f32;
            for row in centered {
                sum += row[i] * row[j];
            }
            let val = sum * scale;
            cov[i][j] = val;
            cov[j][i] = val;
        }
    }
    cov
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(v: &mut [f32]) {
    let norm = dot(v, v).sqrt();
    if norm > 1e-12 {
        for x in v {
            *x /= norm;
        }
    }
}

/// Extract the top eigenvectors of a symmetric matrix by power iteration
/// with deflation. Start vectors are fixed, so the result is deterministic.
fn power_iteration(matrix: &[Vec<f32>], n_components: usize) -> Vec<Vec<f32>> {
    let n = matrix.len();
    let mut mat: Vec<Vec<f32>> = matrix.to_vec();
    let mut components = Vec::with_capacity(n_components);

    for _ in 0..n_components {
        let mut v: Vec<f32> = (0..n)
            .map(|i| ((i * 7 + 13) % 100) as f32 / 100.0)
            .collect();
        normalize(&mut v);

        let mut eigenvalue = 0.0f32;
        for _ in 0..MAX_ITER {
            let mut v_new = vec![0.0f32; n];
            for i in 0..n {
                for j in 0..n {
                    v_new[i] += mat[i][j] * v[j];
                }
            }
            let new_eigenvalue = dot(&v_new, &v);
            normalize(&mut v_new);
            let diff: f32 = v.iter().zip(&v_new).map(|(a, b)| (a - b).abs()).sum();
            v = v_new;
            eigenvalue = new_eigenvalue;
            if diff < TOLERANCE {
                break;
            }
        }

        // Deflate: A = A - λ v vᵀ
        for i in 0..n {
            for j in 0..n {
                mat[i][j] -= eigenvalue * v[i] * v[j];
            }
        }
        components.push(v);
    }

    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn line_data(n: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                let t = i as f32;
                vec![t, 2.0 * t, -t, 0.5 * t]
            })
            .collect()
    }

    #[test]
    fn test_fit_is_deterministic() {
        let data = line_data(20);
        let a = FeatureReducer::fit(&data, 2).unwrap();
        let b = FeatureReducer::fit(&data, 2).unwrap();
        assert_eq!(a.mean, b.mean);
        assert_eq!(a.components, b.components);
    }

    #[test]
    fn test_dominant_direction_captured() {
        // Data varies along a single line; the first component alone should
        // reconstruct nearly all the spread.
        let data = line_data(20);
        let reducer = FeatureReducer::fit(&data, 1).unwrap();
        let reduced = reducer.transform(&data).unwrap();
        assert_eq!(reduced[0].len(), 1);
        // Projected coordinates must keep the ordering of the line.
        let monotone = reduced.windows(2).all(|w| w[0][0] < w[1][0])
            || reduced.windows(2).all(|w| w[0][0] > w[1][0]);
        assert!(monotone);
    }

    #[test]
    fn test_fit_rejects_empty_and_oversized() {
        assert!(FeatureReducer::fit(&[], 2).is_err());
        let data = line_data(3);
        assert!(FeatureReducer::fit(&data, 4).is_err());
    }

    #[test]
    fn test_fit_rejects_non_finite() {
        let mut data = line_data(5);
        data[2][1] = f32::NAN;
        assert!(FeatureReducer::fit(&data, 2).is_err());
    }

    #[test]
    fn test_transform_width_mismatch() {
        let reducer = FeatureReducer::fit(&line_data(10), 2).unwrap();
        let err = reducer.transform(&[vec![1.0, 2.0]]).unwrap_err();
        assert!(matches!(err, GazeError::Validation { .. }));
    }

    #[test]
    fn test_load_or_fit_never_refits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reducer.json");
        let first = FeatureReducer::load_or_fit(&path, &line_data(10), 2).unwrap();
        assert!(path.exists());

        // Different data; the existing artifact must win.
        let other: Vec<Vec<f32>> = (0..10).map(|i| vec![0.0, 0.0, 0.0, i as f32]).collect();
        let second = FeatureReducer::load_or_fit(&path, &other, 2).unwrap();
        assert_eq!(first.mean, second.mean);
        assert_eq!(first.components, second.components);
    }

    #[test]
    fn test_load_rejects_inconsistent_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reducer.json");
        std::fs::write(
            &path,
            r#"{"mean":[0.0,0.0],"components":[[1.0,0.0]],"n_components":2}"#,
        )
        .unwrap();
        assert!(FeatureReducer::load(&path).is_err());
    }

    #[test]
    fn test_project_matches_transform() {
        let data = line_data(12);
        let reducer = FeatureReducer::fit(&data, 2).unwrap();
        let expected = reducer.transform(&data).unwrap();

        let flat: Vec<f32> = data.iter().flatten().copied().collect();
        let xs = Tensor::from_slice(&flat, (12, 4), &Device::Cpu).unwrap();
        let projected = reducer.project(&xs).unwrap();
        let got = projected.to_vec2::<f32>().unwrap();
        for (row_e, row_g) in expected.iter().zip(&got) {
            for (e, g) in row_e.iter().zip(row_g) {
                assert!((e - g).abs() < 1e-4);
            }
        }
    }
}
