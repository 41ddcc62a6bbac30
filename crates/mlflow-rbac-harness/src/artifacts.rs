//! Local payloads the artifact scenarios upload and read back
//!
//! The trained model is a least-squares line serialized as JSON, so a loaded
//! model can be checked by prediction without any ML runtime.

use serde::{Deserialize, Serialize};

use mlflow_rbac_common::kube_utils::random_suffix;
use mlflow_rbac_common::{Error, Result};

/// Content of the sample artifact
pub const SAMPLE_ARTIFACT_CONTENT: &str = "test artifact content";

/// File name of a serialized model inside its artifact root
pub const MODEL_FILE: &str = "model.json";

/// Name given to logged models
pub const MODEL_ARTIFACT_PATH: &str = "model";

/// A named blob to upload as a run artifact
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactFile {
    /// File name; also the artifact path below the run root
    pub name: String,
    /// Raw bytes
    pub content: Vec<u8>,
}

impl ArtifactFile {
    /// Artifact with explicit name and content
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Text artifact with a unique name
    pub fn sample() -> Self {
        Self::new(
            format!("artifact-{}.txt", random_suffix(8)),
            SAMPLE_ARTIFACT_CONTENT,
        )
    }
}

/// `y = slope * x + intercept`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    /// Slope
    pub slope: f64,
    /// Intercept
    pub intercept: f64,
}

impl LinearModel {
    /// Ordinary least-squares fit.
    ///
    /// Needs at least two points with distinct `x`.
    pub fn fit(xs: &[f64], ys: &[f64]) -> Result<Self> {
        if xs.len() != ys.len() {
            return Err(Error::validation(format!(
                "cannot fit {} inputs to {} targets",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < 2 {
            return Err(Error::validation("need at least two points to fit a line"));
        }

        let n = xs.len() as f64;
        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = ys.iter().sum::<f64>() / n;
        let (mut cov, mut var) = (0.0, 0.0);
        for (x, y) in xs.iter().zip(ys) {
            cov += (x - mean_x) * (y - mean_y);
            var += (x - mean_x) * (x - mean_x);
        }
        if var == 0.0 {
            return Err(Error::validation("inputs have no variance"));
        }

        let slope = cov / var;
        Ok(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    /// The model the scenarios train: fit to `y = 2x + 1` on x = 1, 2, 3
    pub fn reference() -> Result<Self> {
        Self::fit(&[1.0, 2.0, 3.0], &[3.0, 5.0, 7.0])
    }

    /// Predicted `y` for `x`
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Serialized form stored as [`MODEL_FILE`]
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::internal_with_context("model", format!("serialize: {}", e)))
    }

    /// Parse a stored [`MODEL_FILE`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::validation(format!("stored model is not readable: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_model_recovers_the_line() {
        let model = LinearModel::reference().unwrap();
        assert!((model.slope - 2.0).abs() < 1e-9);
        assert!((model.intercept - 1.0).abs() < 1e-9);
        assert!((model.predict(4.0) - 9.0).abs() < 1e-9);
    }

    #[test]
    fn fit_rejects_degenerate_inputs() {
        assert!(LinearModel::fit(&[1.0], &[1.0]).is_err());
        assert!(LinearModel::fit(&[1.0, 2.0], &[1.0]).is_err());
        assert!(LinearModel::fit(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn stored_model_reads_back() {
        let model = LinearModel::reference().unwrap();
        let loaded = LinearModel::from_bytes(&model.to_bytes().unwrap()).unwrap();
        assert_eq!(loaded, model);
        assert!(LinearModel::from_bytes(b"not json").is_err());
    }

    #[test]
    fn sample_artifacts_get_unique_names() {
        let (a, b) = (ArtifactFile::sample(), ArtifactFile::sample());
        assert_ne!(a.name, b.name);
        assert!(a.name.ends_with(".txt"));
        assert_eq!(a.content, SAMPLE_ARTIFACT_CONTENT.as_bytes());
    }
}
