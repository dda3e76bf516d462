//! Camera calibration profile (intrinsics + lens distortion).
//!
//! The profile is read once at startup from a YAML document with a
//! `cameraMatrix` (3x3) and a `distCoeffs` vector. Files written by OpenCV's
//! `FileStorage` are accepted as-is: the `%YAML:1.0` directive and the
//! `!!opencv-matrix` tags are stripped before parsing.
//!
//! ```yaml
//! cameraMatrix: !!opencv-matrix
//!    rows: 3
//!    cols: 3
//!    dt: d
//!    data: [ 1050.2, 0., 640.5, 0., 1049.8, 360.1, 0., 0., 1. ]
//! distCoeffs: !!opencv-matrix
//!    rows: 1
//!    cols: 5
//!    dt: d
//!    data: [ -0.31, 0.12, 0.0004, -0.0002, -0.02 ]
//! ```

use crate::error::{CaptureError, CaptureResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Intrinsic matrix and distortion coefficients for one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationProfile {
    /// Row-major 3x3 intrinsic matrix.
    pub camera_matrix: [[f64; 3]; 3],
    /// Distortion coefficients in OpenCV order (k1, k2, p1, p2, k3, ...).
    pub dist_coeffs: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct CalibrationDocument {
    #[serde(rename = "cameraMatrix")]
    camera_matrix: MatrixNode,
    #[serde(rename = "distCoeffs")]
    dist_coeffs: MatrixNode,
}

#[derive(Debug, Deserialize)]
struct MatrixNode {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl MatrixNode {
    fn check(&self, name: &str) -> CaptureResult<()> {
        if self.rows * self.cols != self.data.len() {
            return Err(CaptureError::Calibration(format!(
                "{name}: {}x{} matrix has {} values",
                self.rows,
                self.cols,
                self.data.len()
            )));
        }
        Ok(())
    }
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self::identity()
    }
}

impl CalibrationProfile {
    /// Identity intrinsics, no distortion.
    pub fn identity() -> Self {
        Self {
            camera_matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            dist_coeffs: vec![0.0; 5],
        }
    }

    /// Whether applying this profile changes an image at all.
    pub fn has_distortion(&self) -> bool {
        self.dist_coeffs.iter().any(|c| *c != 0.0)
    }

    /// The five Brown-Conrady terms (k1, k2, p1, p2, k3); missing terms are zero.
    pub fn brown_conrady(&self) -> [f64; 5] {
        let mut terms = [0.0; 5];
        for (slot, value) in terms.iter_mut().zip(&self.dist_coeffs) {
            *slot = *value;
        }
        terms
    }

    /// Parse a calibration document.
    pub fn from_yaml_str(text: &str) -> CaptureResult<Self> {
        let cleaned: String = text
            .lines()
            .filter(|line| !line.trim_start().starts_with("%YAML"))
            .map(|line| line.replace("!!opencv-matrix", ""))
            .collect::<Vec<_>>()
            .join("\n");

        let doc: CalibrationDocument = serde_yaml::from_str(&cleaned)
            .map_err(|e| CaptureError::Calibration(e.to_string()))?;

        doc.camera_matrix.check("cameraMatrix")?;
        doc.dist_coeffs.check("distCoeffs")?;
        if doc.camera_matrix.rows != 3 || doc.camera_matrix.cols != 3 {
            return Err(CaptureError::Calibration(format!(
                "cameraMatrix must be 3x3, got {}x{}",
                doc.camera_matrix.rows, doc.camera_matrix.cols
            )));
        }

        let m = &doc.camera_matrix.data;
        let camera_matrix = [[m[0], m[1], m[2]], [m[3], m[4], m[5]], [m[6], m[7], m[8]]];
        if camera_matrix[0][0] == 0.0 || camera_matrix[1][1] == 0.0 {
            return Err(CaptureError::Calibration(
                "cameraMatrix has a zero focal length".into(),
            ));
        }
        if doc.dist_coeffs.data.len() > 5 && doc.dist_coeffs.data[5..].iter().any(|c| *c != 0.0) {
            tracing::warn!(
                coefficients = doc.dist_coeffs.data.len(),
                "Only k1, k2, p1, p2, k3 are applied; higher-order distortion terms ignored"
            );
        }

        Ok(Self {
            camera_matrix,
            dist_coeffs: doc.dist_coeffs.data,
        })
    }

    /// Read and parse a calibration file.
    pub fn from_file(path: &Path) -> CaptureResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Load from the first existing path in `search_paths`, or fall back to identity.
    ///
    /// A missing file is normal (uncalibrated camera) and only logged at debug
    /// level; a file that exists but cannot be parsed is logged as a warning.
    pub fn load_or_identity(search_paths: &[PathBuf]) -> Self {
        let Some(path) = search_paths.iter().find(|p| p.exists()) else {
            tracing::debug!(?search_paths, "No calibration file found; using identity");
            return Self::identity();
        };

        match Self::from_file(path) {
            Ok(profile) => {
                tracing::info!(path = %path.display(), "Loaded camera calibration");
                profile
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unusable calibration file; using identity");
                Self::identity()
            }
        }
    }
}
