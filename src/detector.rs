//! Face detection and cascaded landmark refinement.
//!
//! [`FaceDetector`] owns the trained artifacts and runs the pipeline:
//!
//! 1. [`FaceDetector::detect`] finds coarse face boxes at the detector's
//!    working resolution.
//! 2. [`FaceDetector::refine`] regresses the face shape for each candidate at
//!    that same resolution (sampling the padded image through the caller's
//!    homography), maps the face into the padded image's frame, then crops
//!    both eyes and regresses eyelids and iris in each crop.
//!
//! Coordinate frames are reconciled only through [`Homography`] and the
//! [`Warp`] impls. A candidate that cannot be mapped, or that lies
//! entirely outside the padded image, is dropped and reported in the
//! [`RefineReport`]; the rest of the batch is unaffected.
//!
//! An instance is single-threaded: `detect`, `refine` and the setters take
//! `&mut self`, and callbacks run synchronously on the calling thread.

use std::borrow::Cow;
use std::f32::consts::TAU;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{Config, Hints, Resources};
use crate::error::{Error, Result};
use crate::eye::{EyeLayout, EyeModel};
use crate::face::{FaceModel, LandmarkFormat};
use crate::raster::{GrayImage, ImageAccess, PaddedImage, WarpedView};
use crate::regressor::ShapeRegressor;
use crate::transform::{infallible, Affine, Homography, PointTransform, Warp};
use crate::types::{BoundingBox, Point, Shape};

/// A face box reported by an [`ObjectDetector`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub roi: BoundingBox,
    pub score: f32,
}

/// A trained object detector, opaque to the pipeline.
pub trait ObjectDetector {
    fn detect(&mut self, image: &GrayImage) -> Vec<Detection>;

    fn set_min_face_size(&mut self, _size: u32) {}
}

/// Turns artifact paths into loaded models.
pub trait ArtifactLoader {
    fn load_detector(&self, path: &Path) -> Result<Box<dyn ObjectDetector>>;

    fn load_regressor(&self, path: &Path) -> Result<ShapeRegressor> {
        ShapeRegressor::load(path)
    }
}

/// Loads SeetaFace detector models via `rustface` and bincode regressors.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLoader;

impl ArtifactLoader for DefaultLoader {
    fn load_detector(&self, path: &Path) -> Result<Box<dyn ObjectDetector>> {
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::resource(path, "path is not valid UTF-8"))?;
        let mut detector =
            rustface::create_detector(path_str).map_err(|e| Error::resource(path, e))?;
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);
        Ok(Box::new(SeetaDetector(detector)))
    }
}

struct SeetaDetector(Box<dyn rustface::Detector>);

impl ObjectDetector for SeetaDetector {
    fn detect(&mut self, image: &GrayImage) -> Vec<Detection> {
        let data = rustface::ImageData::new(image.as_raw(), image.width(), image.height());
        self.0
            .detect(&data)
            .into_iter()
            .map(|face| {
                let b = face.bbox();
                Detection {
                    roi: BoundingBox::new(
                        b.x() as f32,
                        b.y() as f32,
                        b.width() as f32,
                        b.height() as f32,
                    ),
                    score: face.score() as f32,
                }
            })
            .collect()
    }

    fn set_min_face_size(&mut self, size: u32) {
        self.0.set_min_face_size(size);
    }
}

/// An eye crop and the transform from crop pixels to padded-image pixels.
#[derive(Debug, Clone)]
pub struct EyeCrop {
    pub image: GrayImage,
    pub to_parent: Homography,
}

impl EyeCrop {
    /// A crop with no pixels; refinement skips it.
    pub fn empty() -> Self {
        Self {
            image: GrayImage::new(Vec::new(), 0, 0),
            to_parent: Homography::identity(),
        }
    }
}

/// Produces `[left, right]` eye crops from the two eye centers.
pub type EyeCropper = Box<dyn FnMut(Point, Point) -> [EyeCrop; 2]>;
/// Receives elapsed seconds.
pub type TimeLogger = Box<dyn FnMut(f64)>;
/// Receives an intermediate raster and a tag; the return value is advisory.
pub type MatLogger = Box<dyn FnMut(&GrayImage, &str) -> i32>;

/// Why a candidate was dropped or only partially processed.
#[derive(Debug, Clone, PartialEq)]
pub enum RefineWarning {
    /// Region entirely outside the padded image; candidate dropped.
    OutOfBounds { index: usize, roi: BoundingBox },
    /// Region partially outside the padded image; candidate kept with a
    /// clipped region.
    Clipped { index: usize, roi: BoundingBox },
    /// A coordinate transform failed; candidate dropped.
    Transform { index: usize, reason: String },
    /// Neither a region nor landmarks; candidate dropped.
    MissingRegion { index: usize },
    /// The eye crop was empty; that eye was not refined.
    EyeSkipped { index: usize, right: bool },
}

/// Outcome of one [`FaceDetector::refine`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefineReport {
    /// Candidates remaining in the output collection.
    pub refined: usize,
    pub warnings: Vec<RefineWarning>,
}

impl RefineReport {
    pub fn out_of_bounds(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, RefineWarning::OutOfBounds { .. }))
            .count()
    }

    pub fn clipped(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, RefineWarning::Clipped { .. }))
            .count()
    }

    fn transform_failed(&mut self, index: usize, err: Error) {
        warn!(index, error = %err, "candidate dropped");
        self.warnings.push(RefineWarning::Transform {
            index,
            reason: err.to_string(),
        });
    }
}

#[derive(Default)]
struct Timing {
    regression: Duration,
    eye_regression: Duration,
    eyes: usize,
}

/// The detection/refinement pipeline.
pub struct FaceDetector {
    resources: Resources,
    detector: Box<dyn ObjectDetector>,
    face_regressors: Vec<ShapeRegressor>,
    eye_regressor: ShapeRegressor,
    eye_layout: EyeLayout,
    format: LandmarkFormat,
    hints: Hints,
    face_mean: FaceModel,
    hrd: Homography,
    hrd_inverse: Homography,
    eye_cropper: Option<EyeCropper>,
    detection_logger: Option<TimeLogger>,
    regression_logger: Option<TimeLogger>,
    eye_regression_logger: Option<TimeLogger>,
    mat_logger: Option<MatLogger>,
}

fn as_resource_error(path: &Path) -> impl FnOnce(Error) -> Error + '_ {
    move |err| match err {
        e @ Error::ResourceLoad { .. } => e,
        other => Error::resource(path, other),
    }
}

impl FaceDetector {
    /// Load every artifact with the [`DefaultLoader`].
    pub fn new(resources: &Resources) -> Result<Self> {
        Self::with_loader(resources, &DefaultLoader, EyeLayout::default())
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_config_with_loader(config, &DefaultLoader)
    }

    pub fn from_config_with_loader<L: ArtifactLoader + ?Sized>(
        config: &Config,
        loader: &L,
    ) -> Result<Self> {
        let mut detector = Self::with_loader(&config.resources, loader, config.eye_layout)?;
        detector.set_hints(config.hints.clone());
        Ok(detector)
    }

    /// Load every artifact through `loader`.
    ///
    /// Fails with [`Error::ResourceLoad`] if any artifact is missing or
    /// malformed, if the last face regressor's landmark count is not a known
    /// [`LandmarkFormat`], or if the eye regressor does not match `eye_layout`.
    pub fn with_loader<L: ArtifactLoader + ?Sized>(
        resources: &Resources,
        loader: &L,
        eye_layout: EyeLayout,
    ) -> Result<Self> {
        if resources.face_regressors.is_empty() {
            return Err(Error::resource(
                PathBuf::new(),
                "at least one face regressor is required",
            ));
        }

        let path = &resources.face_detector;
        let mut detector = loader
            .load_detector(path)
            .map_err(as_resource_error(path))?;
        info!("Loaded face detector from {:?}", path);

        let mut face_regressors = Vec::with_capacity(resources.face_regressors.len());
        for path in &resources.face_regressors {
            let regressor = loader
                .load_regressor(path)
                .map_err(as_resource_error(path))?;
            info!(
                "Loaded face regressor from {:?}: {} landmarks, {} stages",
                path,
                regressor.num_landmarks(),
                regressor.num_stages()
            );
            face_regressors.push(regressor);
        }

        let last_path = &resources.face_regressors[resources.face_regressors.len() - 1];
        let last = &face_regressors[face_regressors.len() - 1];
        let format = LandmarkFormat::from_count(last.num_landmarks()).ok_or_else(|| {
            Error::resource(
                last_path,
                format!("unsupported face landmark count {}", last.num_landmarks()),
            )
        })?;
        let face_mean = mean_face(last, format);

        let path = &resources.eye_regressor;
        let eye_regressor = loader
            .load_regressor(path)
            .map_err(as_resource_error(path))?;
        if eye_regressor.num_landmarks() != eye_layout.num_landmarks() {
            return Err(Error::resource(
                path,
                format!(
                    "eye regressor predicts {} landmarks, layout expects {}",
                    eye_regressor.num_landmarks(),
                    eye_layout.num_landmarks()
                ),
            ));
        }
        info!(
            "Loaded eye regressor from {:?}: {} stages",
            path,
            eye_regressor.num_stages()
        );

        let hints = Hints::default();
        detector.set_min_face_size(hints.min_face_size);

        Ok(Self {
            resources: resources.clone(),
            detector,
            face_regressors,
            eye_regressor,
            eye_layout,
            format,
            hints,
            face_mean,
            hrd: Homography::identity(),
            hrd_inverse: Homography::identity(),
            eye_cropper: None,
            detection_logger: None,
            regression_logger: None,
            eye_regression_logger: None,
            mat_logger: None,
        })
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn landmark_format(&self) -> LandmarkFormat {
        self.format
    }

    /// Choose how regressed face landmarks are read (eye and nose indices).
    ///
    /// The format must describe as many landmarks as the last face regressor
    /// produces.
    pub fn set_landmark_format(&mut self, format: LandmarkFormat) -> Result<()> {
        let n = self.face_regressors[self.face_regressors.len() - 1].num_landmarks();
        if format.num_landmarks() != n {
            return Err(Error::InvalidModel(format!(
                "{:?} expects {} landmarks, face regressor produces {}",
                format,
                format.num_landmarks(),
                n
            )));
        }
        self.format = format;
        Ok(())
    }

    pub fn hints(&self) -> &Hints {
        &self.hints
    }

    pub fn set_hints(&mut self, hints: Hints) {
        self.detector.set_min_face_size(hints.min_face_size);
        self.hints = hints;
    }

    pub fn set_face_stages_hint(&mut self, stages: usize) {
        self.hints.face_stages = Some(stages);
    }

    pub fn set_face2_stages_hint(&mut self, stages: usize) {
        self.hints.face2_stages = Some(stages);
    }

    pub fn set_eyelid_stages_hint(&mut self, stages: usize) {
        self.hints.eyelid_stages = Some(stages);
    }

    pub fn set_iris_stages_hint(&mut self, stages: usize) {
        self.hints.iris_stages = Some(stages);
    }

    pub fn set_iris_stages_repetition_factor(&mut self, factor: usize) {
        self.hints.iris_repetition_factor = factor;
    }

    pub fn set_do_eye_refinement(&mut self, flag: bool) {
        self.hints.do_eye_refinement = flag;
    }

    pub fn set_do_iris_refinement(&mut self, flag: bool) {
        self.hints.do_iris_refinement = flag;
    }

    pub fn set_inits(&mut self, inits: usize) {
        self.hints.inits = inits;
    }

    pub fn set_do_nms(&mut self, flag: bool) {
        self.hints.do_nms = flag;
    }

    pub fn set_min_face_size(&mut self, size: u32) {
        self.hints.min_face_size = size;
        self.detector.set_min_face_size(size);
    }

    /// Override the mean face; its landmarks are expected in unit-box
    /// coordinates.
    pub fn set_face_detector_mean(&mut self, mean: FaceModel) {
        self.face_mean = mean;
    }

    pub fn face_detector_mean(&self) -> &FaceModel {
        &self.face_mean
    }

    /// Set the homography from the regressor's face box to the detector's,
    /// in box-normalized coordinates.
    pub fn set_hrd(&mut self, hrd: Homography) -> Result<()> {
        self.hrd_inverse = hrd.inverse()?;
        self.hrd = hrd;
        Ok(())
    }

    pub fn hrd(&self) -> &Homography {
        &self.hrd
    }

    pub fn set_eye_cropper<F>(&mut self, cropper: F)
    where
        F: FnMut(Point, Point) -> [EyeCrop; 2] + 'static,
    {
        self.eye_cropper = Some(Box::new(cropper));
    }

    pub fn set_detection_time_logger<F: FnMut(f64) + 'static>(&mut self, logger: F) {
        self.detection_logger = Some(Box::new(logger));
    }

    pub fn set_regression_time_logger<F: FnMut(f64) + 'static>(&mut self, logger: F) {
        self.regression_logger = Some(Box::new(logger));
    }

    pub fn set_eye_regression_time_logger<F: FnMut(f64) + 'static>(&mut self, logger: F) {
        self.eye_regression_logger = Some(Box::new(logger));
    }

    pub fn set_logger<F>(&mut self, logger: F)
    where
        F: FnMut(&GrayImage, &str) -> i32 + 'static,
    {
        self.mat_logger = Some(Box::new(logger));
    }

    /// The mean face fitted to `rect`.
    pub fn mean_shape(&self, rect: &BoundingBox) -> FaceModel {
        infallible(self.face_mean.warp(&Affine::from_unit_box(rect)))
    }

    /// The mean face fitted to a `width` x `height` box at the origin.
    pub fn mean_shape_for_size(&self, width: f32, height: f32) -> FaceModel {
        self.mean_shape(&BoundingBox::new(0.0, 0.0, width, height))
    }

    /// Find face candidates in `image`, in its own coordinates.
    pub fn detect(&mut self, image: &GrayImage) -> Vec<FaceModel> {
        let start = Instant::now();
        let mut detections = if image.is_empty() {
            Vec::new()
        } else {
            self.detector.detect(image)
        };
        let raw = detections.len();
        if self.hints.do_nms {
            detections = non_max_suppression(detections, self.hints.nms_threshold);
        }
        debug!(raw, kept = detections.len(), "face detection");

        if let Some(log) = self.detection_logger.as_mut() {
            log(start.elapsed().as_secs_f64());
        }

        detections
            .into_iter()
            .map(|d| {
                let mut face = FaceModel::from_roi(d.roi);
                face.score.set(d.score);
                face
            })
            .collect()
    }

    /// Refine `faces` in place.
    ///
    /// Candidates arrive in detection coordinates; `h` maps detection
    /// coordinates to `padded`. When `is_detection` is false the candidates'
    /// existing landmarks (from a previous frame) seed the regression instead
    /// of the mean shape. Surviving faces leave in padded-image coordinates.
    pub fn refine(
        &mut self,
        padded: &PaddedImage,
        faces: &mut Vec<FaceModel>,
        h: &Homography,
        is_detection: bool,
    ) -> RefineReport {
        let mut report = RefineReport::default();
        if faces.is_empty() {
            return report;
        }

        let mut timing = Timing::default();
        let candidates = std::mem::take(faces);
        for (index, face) in candidates.into_iter().enumerate() {
            let refined =
                self.refine_face(padded, face, h, is_detection, index, &mut report, &mut timing);
            faces.extend(refined);
        }
        report.refined = faces.len();

        if let Some(log) = self.regression_logger.as_mut() {
            log(timing.regression.as_secs_f64());
        }
        if timing.eyes > 0 {
            if let Some(log) = self.eye_regression_logger.as_mut() {
                log(timing.eye_regression.as_secs_f64());
            }
        }
        debug!(
            refined = report.refined,
            warnings = report.warnings.len(),
            "face refinement"
        );
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn refine_face(
        &mut self,
        padded: &PaddedImage,
        mut face: FaceModel,
        h: &Homography,
        is_detection: bool,
        index: usize,
        report: &mut RefineReport,
        timing: &mut Timing,
    ) -> Option<FaceModel> {
        let Some(roi) = face.region() else {
            warn!(index, "candidate has no region, dropped");
            report.warnings.push(RefineWarning::MissingRegion { index });
            return None;
        };

        let padded_roi = match roi.warp(h) {
            Ok(r) => r,
            Err(e) => {
                report.transform_failed(index, e);
                return None;
            }
        };
        let Some(clipped) = padded.image.bounds().intersect(&padded_roi) else {
            warn!(index, roi = ?padded_roi, "candidate outside padded image, dropped");
            report.warnings.push(RefineWarning::OutOfBounds {
                index,
                roi: padded_roi,
            });
            return None;
        };
        if clipped != padded_roi {
            debug!(index, roi = ?padded_roi, "candidate clipped to padded image");
            report.warnings.push(RefineWarning::Clipped {
                index,
                roi: padded_roi,
            });
        }

        let start = Instant::now();
        let shape = self.regress_face(padded, &face, &roi, h, is_detection);
        timing.regression += start.elapsed();
        let shape = match shape {
            Ok(s) => s,
            Err(e) => {
                report.transform_failed(index, e);
                return None;
            }
        };

        face.roi.set(roi);
        face.set_landmarks(shape, self.format);
        let mut face = match face.transform(h) {
            Ok(f) => f,
            Err(e) => {
                report.transform_failed(index, e);
                return None;
            }
        };
        face.roi.set(clipped);

        if self.hints.do_eye_refinement {
            let start = Instant::now();
            self.refine_eyes(padded, &mut face, index, report);
            timing.eye_regression += start.elapsed();
            timing.eyes += 1;
        }
        Some(face)
    }

    /// Face-shape regression in detection coordinates.
    fn regress_face(
        &self,
        padded: &PaddedImage,
        face: &FaceModel,
        roi: &BoundingBox,
        h: &Homography,
        is_detection: bool,
    ) -> Result<Shape> {
        // Detection-resolution view of the padded image. Reads are bounded by
        // the padded raster, not the view, so candidates at negative
        // detection coordinates still see the border.
        let view = WarpedView::new(
            &padded.image,
            *h,
            roi.right().ceil().max(1.0) as u32,
            roi.bottom().ceil().max(1.0) as u32,
        );
        let rect = self.regression_box(roi)?;

        let (first, rest) = (&self.face_regressors[0], &self.face_regressors[1..]);
        let first_stages = 0..self.hints.face_stages.unwrap_or(usize::MAX);
        let later_stages = 0..self.hints.face2_stages.unwrap_or(usize::MAX);
        let carry = !is_detection && face.points.num_landmarks() == self.format.num_landmarks();

        let mut shape = match (carry, rest.is_empty()) {
            // Tracking with a fine stage available: skip the coarse pass.
            (true, false) => face.points.clone(),
            (true, true) => first.predict_stages(&view, &rect, face.points.clone(), first_stages),
            (false, _) => self.averaged_inits(first, &view, &rect, first_stages),
        };
        for regressor in rest {
            shape = regressor.predict_stages(&view, &rect, shape, later_stages.clone());
        }
        Ok(shape)
    }

    /// Run `regressor` from `hints.inits` jittered starts and average.
    fn averaged_inits<I: ImageAccess>(
        &self,
        regressor: &ShapeRegressor,
        image: &I,
        rect: &BoundingBox,
        stages: std::ops::Range<usize>,
    ) -> Shape {
        let n = self.hints.inits.max(1);
        let mut sum = Shape::zeros(regressor.num_landmarks());
        for k in 0..n {
            let offset = init_offset(k, n, rect);
            let mut start = regressor.initial_shape(rect);
            for p in start.points.iter_mut() {
                *p += offset;
            }
            sum.add_delta(&regressor.predict_stages(image, rect, start, stages.clone()));
        }
        for p in sum.points.iter_mut() {
            *p = *p * (1.0 / n as f32);
        }
        sum
    }

    /// The regressor's face box for a detector box, via `hrd`.
    fn regression_box(&self, roi: &BoundingBox) -> Result<BoundingBox> {
        let unit = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let mut corners = [Point::zero(); 4];
        for (dst, src) in corners.iter_mut().zip(unit.corners()) {
            *dst = roi.denormalize_point(self.hrd_inverse.map_point(src)?);
        }
        Ok(BoundingBox::enclosing(&corners).unwrap_or(*roi))
    }

    fn refine_eyes(
        &mut self,
        padded: &PaddedImage,
        face: &mut FaceModel,
        index: usize,
        report: &mut RefineReport,
    ) {
        let (Some(left), Some(right)) = (
            face.eye_left_center.get().copied(),
            face.eye_right_center.get().copied(),
        ) else {
            return;
        };
        let crops = match self.eye_cropper.as_mut() {
            Some(cropper) => cropper(left, right),
            None => default_eye_crops(&padded.image, left, right),
        };

        for (k, crop) in crops.into_iter().enumerate() {
            let is_right = k == 1;
            if crop.image.is_empty() {
                report.warnings.push(RefineWarning::EyeSkipped {
                    index,
                    right: is_right,
                });
                continue;
            }
            if let Some(log) = self.mat_logger.as_mut() {
                log(&crop.image, if is_right { "eye-right" } else { "eye-left" });
            }
            let Some(eye) = self.regress_eye(&crop.image, is_right) else {
                continue;
            };
            match eye.transform(&crop.to_parent) {
                Ok(eye) if is_right => face.eye_right.set(eye),
                Ok(eye) => face.eye_left.set(eye),
                Err(e) => {
                    warn!(index, error = %e, "eye dropped");
                    report.warnings.push(RefineWarning::Transform {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Eyelid and iris regression in crop coordinates.
    ///
    /// The eye regressor is trained on left eyes, so right-eye crops are
    /// mirrored before regression and the result mirrored back.
    fn regress_eye(&self, crop: &GrayImage, mirrored: bool) -> Option<EyeModel> {
        let source: Cow<'_, GrayImage> = if mirrored {
            Cow::Owned(crop.flopped())
        } else {
            Cow::Borrowed(crop)
        };
        let image: &GrayImage = &source;
        let rect = image.bounds();
        let regressor = &self.eye_regressor;
        let n = regressor.num_stages();

        let eyelid_end = self.hints.eyelid_stages.unwrap_or(n).min(n);
        let mut shape =
            regressor.predict_stages(image, &rect, regressor.initial_shape(&rect), 0..eyelid_end);

        let with_iris = self.hints.do_iris_refinement;
        let iris_count = self.hints.iris_stages.unwrap_or(0).min(n);
        if with_iris && iris_count > 0 {
            for _ in 0..self.hints.iris_repetition_factor {
                shape = regressor.predict_stages(image, &rect, shape, n - iris_count..n);
            }
        }

        let mut eye = EyeModel::from_shape(&shape, &self.eye_layout, with_iris)?;
        if mirrored {
            eye.flop(rect.width - 1.0);
        }
        Some(eye)
    }
}

fn mean_face(regressor: &ShapeRegressor, format: LandmarkFormat) -> FaceModel {
    let mut face = FaceModel::from_roi(BoundingBox::new(0.0, 0.0, 1.0, 1.0));
    face.set_landmarks(regressor.mean_shape().clone(), format);
    face
}

/// Start offset for initialization `k` of `n`: none for the first, then a
/// ring of radius 5% of the box width.
fn init_offset(k: usize, n: usize, rect: &BoundingBox) -> Point {
    if k == 0 || n < 2 {
        return Point::zero();
    }
    let theta = TAU * (k - 1) as f32 / (n - 1) as f32;
    let r = 0.05 * rect.width;
    Point::new(r * theta.cos(), r * theta.sin())
}

/// Square crops centered on each eye, side 0.8 x the inter-ocular distance,
/// clipped to the image.
pub fn default_eye_crops(image: &GrayImage, left: Point, right: Point) -> [EyeCrop; 2] {
    let side = (0.8 * left.distance(&right)).max(1.0);
    [left, right].map(|c| {
        let roi = BoundingBox::new(c.x - 0.5 * side, c.y - 0.5 * side, side, side);
        match image.crop(&roi) {
            Some((pixels, placed)) => EyeCrop {
                image: pixels,
                to_parent: Homography::translation(placed.x, placed.y),
            },
            None => EyeCrop::empty(),
        }
    })
}

/// Greedy suppression: keep the highest-scoring box, drop any overlapping it
/// by more than `threshold` IoU, repeat.
pub fn non_max_suppression(mut detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for d in detections {
        if kept.iter().all(|k| k.roi.iou(&d.roi) <= threshold) {
            kept.push(d);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, score: f32) -> Detection {
        Detection {
            roi: BoundingBox::new(x, 0.0, 10.0, 10.0),
            score,
        }
    }

    #[test]
    fn nms_keeps_strongest_of_overlaps() {
        let kept = non_max_suppression(vec![det(0.0, 1.0), det(1.0, 3.0), det(50.0, 0.5)], 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 3.0);
        assert_eq!(kept[1].score, 0.5);
    }

    #[test]
    fn init_offsets_form_a_ring() {
        let rect = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert_eq!(init_offset(0, 5, &rect), Point::zero());
        let p = init_offset(1, 5, &rect);
        assert!((p.x - 5.0).abs() < 1e-5 && p.y.abs() < 1e-5);
        assert!((init_offset(3, 5, &rect).norm() - 5.0).abs() < 1e-4);
    }

    #[test]
    fn default_crops_are_placed_in_parent() {
        let image = GrayImage::from_fn(100, 60, |x, y| (x + y) as u8);
        let [left, right] =
            default_eye_crops(&image, Point::new(30.0, 30.0), Point::new(70.0, 30.0));
        assert_eq!((left.image.width(), left.image.height()), (32, 32));
        let origin = left.to_parent.map_point(Point::zero()).unwrap();
        assert_eq!(origin, Point::new(14.0, 14.0));
        assert_eq!(right.image.get_pixel(0, 0), image.get_pixel(54, 14));
    }

    #[test]
    fn crops_outside_image_are_empty() {
        let image = GrayImage::filled(10, 10, 0);
        let [left, _] =
            default_eye_crops(&image, Point::new(-50.0, -50.0), Point::new(-20.0, -50.0));
        assert!(left.image.is_empty());
    }

    #[test]
    fn report_counts_warnings() {
        let mut report = RefineReport::default();
        report.warnings.push(RefineWarning::OutOfBounds {
            index: 0,
            roi: BoundingBox::default(),
        });
        report.warnings.push(RefineWarning::Clipped {
            index: 1,
            roi: BoundingBox::default(),
        });
        report.transform_failed(2, Error::SingularTransform);
        assert_eq!(report.out_of_bounds(), 1);
        assert_eq!(report.clipped(), 1);
        assert_eq!(report.warnings.len(), 3);
    }
}
