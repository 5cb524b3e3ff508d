//! Cascaded shape regression with ensembles of regression trees.
//!
//! Implements the regressor from "One Millisecond Face Alignment with an
//! Ensemble of Regression Trees" (Kazemi & Sullivan, 2014). The same model
//! type serves face-shape regression and eye/iris regression; the
//! orchestrator decides which stage ranges to run for each.
//!
//! 1. Start from the mean shape placed in the target box (or a caller-supplied
//!    shape when tracking).
//! 2. For each cascade stage, sample pixel-difference features anchored on the
//!    current shape, walk every tree to a leaf and sum the leaf deltas.
//! 3. Scale the summed delta into image space and add it to the shape.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::Path;

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::{sample_bilinear, ImageAccess};
use crate::types::{BoundingBox, Point, Shape};

/// A pixel-difference feature: two sample points, each an offset from an
/// anchor landmark of the current shape.
///
/// Offsets are in box-normalized units and follow the rotation and scale of
/// the current shape relative to the mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitFeature {
    pub anchors: [u16; 2],
    pub offsets: [Point; 2],
}

impl SplitFeature {
    pub fn new(anchor_a: u16, offset_a: Point, anchor_b: u16, offset_b: Point) -> Self {
        Self {
            anchors: [anchor_a, anchor_b],
            offsets: [offset_a, offset_b],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Go to `left` if the feature exceeds `threshold`, else to `right`.
    Split {
        feature: SplitFeature,
        threshold: f32,
        left: u32,
        right: u32,
    },
    Leaf { delta: Shape },
}

/// A single regression tree; node 0 is the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Walk from the root to a leaf.
    ///
    /// Returns `None` only for a malformed tree; [`ShapeRegressor::new`]
    /// rejects those.
    pub fn leaf<F>(&self, feature_value: F) -> Option<&Shape>
    where
        F: Fn(&SplitFeature) -> f32,
    {
        let mut idx = 0usize;
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(idx)? {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if feature_value(feature) > *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
                TreeNode::Leaf { delta } => return Some(delta),
            }
        }
        None
    }

    fn validate(&self, num_landmarks: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidModel("empty regression tree".into()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    // Children strictly after the parent keeps the walk acyclic.
                    for child in [*left as usize, *right as usize] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(Error::InvalidModel(format!(
                                "node {i} has invalid child {child}"
                            )));
                        }
                    }
                    if feature.anchors.iter().any(|a| *a as usize >= num_landmarks) {
                        return Err(Error::InvalidModel(format!(
                            "node {i} anchors {:?} exceed {num_landmarks} landmarks",
                            feature.anchors
                        )));
                    }
                }
                TreeNode::Leaf { delta } => {
                    if delta.num_landmarks() != num_landmarks {
                        return Err(Error::InvalidModel(format!(
                            "leaf {i} has {} points, expected {num_landmarks}",
                            delta.num_landmarks()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// One cascade stage: the trees' leaf deltas are summed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    trees: Vec<RegressionTree>,
    num_landmarks: usize,
}

impl TreeEnsemble {
    pub fn new(trees: Vec<RegressionTree>, num_landmarks: usize) -> Self {
        Self {
            trees,
            num_landmarks,
        }
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict<F>(&self, feature_value: F) -> Shape
    where
        F: Fn(&SplitFeature) -> f32,
    {
        let mut delta = Shape::zeros(self.num_landmarks);
        for leaf in self.trees.iter().filter_map(|t| t.leaf(&feature_value)) {
            delta.add_delta(leaf);
        }
        delta
    }
}

/// A cascade of tree ensembles plus the mean shape it starts from.
///
/// The mean shape is stored in box-normalized [0,1] coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeRegressor {
    mean_shape: Shape,
    cascade: Vec<TreeEnsemble>,
}

impl ShapeRegressor {
    /// Validates that every stage agrees with the mean shape's landmark count
    /// and that every tree is well-formed.
    pub fn new(mean_shape: Shape, cascade: Vec<TreeEnsemble>) -> Result<Self> {
        let n = mean_shape.num_landmarks();
        if n == 0 {
            return Err(Error::InvalidModel("mean shape has no landmarks".into()));
        }
        for (s, stage) in cascade.iter().enumerate() {
            if stage.num_landmarks != n {
                return Err(Error::InvalidModel(format!(
                    "stage {s} predicts {} landmarks, mean shape has {n}",
                    stage.num_landmarks
                )));
            }
            for tree in &stage.trees {
                tree.validate(n)?;
            }
        }
        Ok(Self {
            mean_shape,
            cascade,
        })
    }

    /// Load a bincode model, bzip2-compressed when the path ends in `.bz2`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut bytes = Vec::new();
        if is_bz2(path) {
            BzDecoder::new(reader).read_to_end(&mut bytes)?;
        } else {
            let mut reader = reader;
            reader.read_to_end(&mut bytes)?;
        }
        let raw: Self = bincode::deserialize(&bytes)?;
        Self::new(raw.mean_shape, raw.cascade)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = bincode::serialize(self)?;
        let writer = BufWriter::new(File::create(path)?);
        if is_bz2(path) {
            let mut encoder = BzEncoder::new(writer, Compression::best());
            encoder.write_all(&bytes)?;
            encoder.finish()?.flush()?;
        } else {
            let mut writer = writer;
            writer.write_all(&bytes)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn num_landmarks(&self) -> usize {
        self.mean_shape.num_landmarks()
    }

    pub fn num_stages(&self) -> usize {
        self.cascade.len()
    }

    /// Mean shape in box-normalized coordinates.
    pub fn mean_shape(&self) -> &Shape {
        &self.mean_shape
    }

    /// The mean shape placed in `rect`.
    pub fn initial_shape(&self, rect: &BoundingBox) -> Shape {
        Shape::new(
            self.mean_shape
                .points
                .iter()
                .map(|p| rect.denormalize_point(*p))
                .collect(),
        )
    }

    /// Run the full cascade from the mean shape.
    pub fn predict<I: ImageAccess>(&self, image: &I, rect: &BoundingBox) -> Shape {
        self.predict_stages(image, rect, self.initial_shape(rect), 0..self.num_stages())
    }

    /// Run the stages in `stages` (clamped to the cascade) starting from `shape`.
    pub fn predict_stages<I: ImageAccess>(
        &self,
        image: &I,
        rect: &BoundingBox,
        mut shape: Shape,
        stages: Range<usize>,
    ) -> Shape {
        if shape.num_landmarks() != self.num_landmarks() {
            shape = self.initial_shape(rect);
        }
        let end = stages.end.min(self.cascade.len());
        let start = stages.start.min(end);
        let reference = self.initial_shape(rect);

        for stage in &self.cascade[start..end] {
            let warp = similarity(&reference, &shape);
            let delta = stage.predict(|f| feature_value(f, &shape, rect, &warp, image));
            for (p, d) in shape.points.iter_mut().zip(&delta.points) {
                let step = warp * Vector2::new(d.x * rect.width, d.y * rect.height);
                p.x += step.x;
                p.y += step.y;
            }
        }
        shape
    }
}

fn is_bz2(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "bz2")
}

fn feature_value<I: ImageAccess>(
    feature: &SplitFeature,
    shape: &Shape,
    rect: &BoundingBox,
    warp: &Matrix2<f32>,
    image: &I,
) -> f32 {
    let sample = |k: usize| {
        let anchor = shape[feature.anchors[k] as usize];
        let o = feature.offsets[k];
        let v = warp * Vector2::new(o.x * rect.width, o.y * rect.height);
        sample_bilinear(image, anchor.x + v.x, anchor.y + v.y)
    };
    sample(0) - sample(1)
}

/// Least-squares rotation+scale taking centered `from` onto centered `to`.
fn similarity(from: &Shape, to: &Shape) -> Matrix2<f32> {
    let (Some(cf), Some(ct)) = (
        from.centroid(0..from.num_landmarks()),
        to.centroid(0..to.num_landmarks()),
    ) else {
        return Matrix2::identity();
    };
    let (mut a, mut b, mut norm) = (0.0f32, 0.0f32, 0.0f32);
    for (f, t) in from.points.iter().zip(&to.points) {
        let (s, d) = (*f - cf, *t - ct);
        a += s.x * d.x + s.y * d.y;
        b += s.x * d.y - s.y * d.x;
        norm += s.x * s.x + s.y * s.y;
    }
    if norm <= f32::EPSILON {
        return Matrix2::identity();
    }
    Matrix2::new(a / norm, -b / norm, b / norm, a / norm)
}

/// Builder for assembling a [`ShapeRegressor`] in code.
#[derive(Default)]
pub struct ShapeRegressorBuilder {
    mean_shape: Option<Shape>,
    cascade: Vec<TreeEnsemble>,
}

impl ShapeRegressorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mean_shape(mut self, shape: Shape) -> Self {
        self.mean_shape = Some(shape);
        self
    }

    pub fn add_stage(mut self, ensemble: TreeEnsemble) -> Self {
        self.cascade.push(ensemble);
        self
    }

    pub fn build(self) -> Result<ShapeRegressor> {
        let mean_shape = self
            .mean_shape
            .ok_or_else(|| Error::InvalidModel("missing mean shape".into()))?;
        if self.cascade.is_empty() {
            return Err(Error::InvalidModel(
                "cascade must have at least one stage".into(),
            ));
        }
        ShapeRegressor::new(mean_shape, self.cascade)
    }
}

/// A single-leaf stage that shifts every landmark by `delta` (box-normalized).
pub fn constant_stage(num_landmarks: usize, delta: Point) -> TreeEnsemble {
    let tree = RegressionTree::new(vec![TreeNode::Leaf {
        delta: Shape::new(vec![delta; num_landmarks]),
    }]);
    TreeEnsemble::new(vec![tree], num_landmarks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GrayImage;

    fn five_points() -> Shape {
        Shape::new(vec![
            Point::new(0.30, 0.30),
            Point::new(0.70, 0.30),
            Point::new(0.50, 0.55),
            Point::new(0.35, 0.75),
            Point::new(0.65, 0.75),
        ])
    }

    fn split_tree(threshold: f32) -> RegressionTree {
        RegressionTree::new(vec![
            TreeNode::Split {
                feature: SplitFeature::new(0, Point::zero(), 1, Point::zero()),
                threshold,
                left: 1,
                right: 2,
            },
            TreeNode::Leaf {
                delta: Shape::new(vec![Point::new(-0.1, -0.1); 2]),
            },
            TreeNode::Leaf {
                delta: Shape::new(vec![Point::new(0.1, 0.1); 2]),
            },
        ])
    }

    #[test]
    fn tree_goes_left_above_threshold() {
        let tree = split_tree(50.0);
        assert_eq!(tree.leaf(|_| 100.0).unwrap()[0].x, -0.1);
        assert_eq!(tree.leaf(|_| 30.0).unwrap()[0].x, 0.1);
    }

    #[test]
    fn ensemble_sums_predictions() {
        let ensemble = TreeEnsemble::new(
            vec![
                constant_stage(1, Point::new(0.1, 0.2)).trees.remove(0),
                constant_stage(1, Point::new(0.3, 0.4)).trees.remove(0),
            ],
            1,
        );
        let delta = ensemble.predict(|_| 0.0);
        assert!((delta[0].x - 0.4).abs() < 1e-6);
        assert!((delta[0].y - 0.6).abs() < 1e-6);
    }

    #[test]
    fn constant_stages_shift_in_box_units() {
        let model = ShapeRegressorBuilder::new()
            .mean_shape(five_points())
            .add_stage(constant_stage(5, Point::new(0.1, 0.0)))
            .add_stage(constant_stage(5, Point::new(0.0, -0.05)))
            .build()
            .unwrap();
        let image = GrayImage::filled(100, 100, 128);
        let rect = BoundingBox::new(10.0, 10.0, 80.0, 80.0);

        let full = model.predict(&image, &rect);
        let expected = rect.denormalize_point(Point::new(0.30, 0.30)) + Point::new(8.0, -4.0);
        assert!((full[0].x - expected.x).abs() < 1e-3);
        assert!((full[0].y - expected.y).abs() < 1e-3);

        let first_only = model.predict_stages(&image, &rect, model.initial_shape(&rect), 0..1);
        assert!((first_only[0].y - 34.0).abs() < 1e-3);

        let clamped = model.predict_stages(&image, &rect, model.initial_shape(&rect), 1..10);
        assert!((clamped[0].x - 34.0).abs() < 1e-3);
    }

    #[test]
    fn malformed_models_are_rejected() {
        let bad_child = RegressionTree::new(vec![TreeNode::Split {
            feature: SplitFeature::new(0, Point::zero(), 1, Point::zero()),
            threshold: 0.0,
            left: 0,
            right: 5,
        }]);
        let err = ShapeRegressor::new(five_points(), vec![TreeEnsemble::new(vec![bad_child], 5)]);
        assert!(matches!(err, Err(Error::InvalidModel(_))));

        let wrong_count =
            ShapeRegressor::new(five_points(), vec![constant_stage(3, Point::zero())]);
        assert!(wrong_count.is_err());

        assert!(ShapeRegressorBuilder::new().mean_shape(five_points()).build().is_err());
    }

    #[test]
    fn anchors_beyond_shape_are_rejected() {
        let tree = split_tree(0.0);
        let err = ShapeRegressor::new(
            Shape::new(vec![Point::zero()]),
            vec![TreeEnsemble::new(vec![tree], 1)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let model =
            ShapeRegressor::new(five_points(), vec![constant_stage(5, Point::zero())]).unwrap();

        for name in ["face_cascade_regressor.bin", "face_cascade_regressor.bin.bz2"] {
            let path = std::env::temp_dir().join(name);
            model.save(&path).unwrap();
            let loaded = ShapeRegressor::load(&path).unwrap();
            assert_eq!(loaded.num_landmarks(), 5);
            assert_eq!(loaded.num_stages(), 1);
            assert_eq!(loaded.mean_shape(), model.mean_shape());
            std::fs::remove_file(path).ok();
        }
    }

    #[test]
    fn similarity_recovers_rotation_and_scale() {
        let from = five_points();
        let to = Shape::new(
            from.points
                .iter()
                .map(|p| Point::new(-2.0 * p.y, 2.0 * p.x))
                .collect(),
        );
        let m = similarity(&from, &to);
        assert!(m[(0, 0)].abs() < 1e-4);
        assert!((m[(1, 0)] - 2.0).abs() < 1e-4);
    }
}
