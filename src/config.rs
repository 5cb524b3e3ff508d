//! TOML configuration for the detection/refinement pipeline.
//!
//! ```toml
//! [resources]
//! face_detector = "models/seeta_fd_frontal_v1.0.bin"
//! face_regressors = ["models/face_coarse.bin", "models/face_fine.bin.bz2"]
//! eye_regressor = "models/eye.bin"
//!
//! [hints]
//! eyelid_stages = 8
//! iris_stages = 2
//! iris_repetition_factor = 3
//! do_nms = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::eye::EyeLayout;

/// Paths to the trained artifacts the pipeline loads at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub face_detector: PathBuf,
    /// Face-shape regressors applied in order.
    pub face_regressors: Vec<PathBuf>,
    pub eye_regressor: PathBuf,
}

/// Tunable pipeline hints. Stage counts of `None` mean "all stages".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hints {
    /// Stages of the first face regressor.
    pub face_stages: Option<usize>,
    /// Stages of each later face regressor.
    pub face2_stages: Option<usize>,
    /// Leading eye-regressor stages for the eyelid pass.
    pub eyelid_stages: Option<usize>,
    /// Trailing eye-regressor stages rerun for the iris pass; none by default.
    pub iris_stages: Option<usize>,
    /// How many times the iris pass is run.
    pub iris_repetition_factor: usize,
    pub do_eye_refinement: bool,
    pub do_iris_refinement: bool,
    /// Number of jittered initializations averaged per face.
    pub inits: usize,
    pub do_nms: bool,
    /// IoU above which the weaker of two detections is suppressed.
    pub nms_threshold: f32,
    pub min_face_size: u32,
}

impl Default for Hints {
    fn default() -> Self {
        Self {
            face_stages: None,
            face2_stages: None,
            eyelid_stages: None,
            iris_stages: None,
            iris_repetition_factor: 1,
            do_eye_refinement: true,
            do_iris_refinement: true,
            inits: 1,
            do_nms: true,
            nms_threshold: 0.3,
            min_face_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub resources: Resources,
    #[serde(default)]
    pub hints: Hints,
    #[serde(default)]
    pub eye_layout: EyeLayout,
}

impl Config {
    pub fn new(resources: Resources) -> Self {
        Self {
            resources,
            hints: Hints::default(),
            eye_layout: EyeLayout::default(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [resources]
        face_detector = "det.bin"
        face_regressors = ["coarse.bin", "fine.bin.bz2"]
        eye_regressor = "eye.bin"

        [hints]
        eyelid_stages = 8
        iris_stages = 2
        iris_repetition_factor = 3
        do_nms = false
    "#;

    #[test]
    fn parses_resources_and_partial_hints() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.resources.face_regressors.len(), 2);
        assert_eq!(config.resources.eye_regressor, PathBuf::from("eye.bin"));
        assert_eq!(config.hints.eyelid_stages, Some(8));
        assert_eq!(config.hints.iris_repetition_factor, 3);
        assert!(!config.hints.do_nms);
        assert_eq!(config.hints.inits, 1);
        assert!(config.hints.do_eye_refinement);
        assert_eq!(config.eye_layout, EyeLayout::default());
    }

    #[test]
    fn eye_layout_can_be_overridden() {
        let text = format!("{SAMPLE}\n[eye_layout]\ncrease = 0\niris = false\n");
        let config = Config::from_toml_str(&text).unwrap();
        assert_eq!(config.eye_layout.crease, 0);
        assert_eq!(config.eye_layout.eyelids, 8);
        assert_eq!(config.eye_layout.num_landmarks(), 8);
    }

    #[test]
    fn missing_resources_is_an_error() {
        assert!(Config::from_toml_str("[hints]\ninits = 2\n").is_err());
    }
}
