//! # face-cascade
//!
//! Face detection with cascaded eye and iris landmark refinement.
//!
//! This crate provides:
//! - **Landmark model**: [`FaceModel`] and [`EyeModel`] with optional
//!   attributes ([`Field`]), mapped between coordinate frames by one
//!   transform algebra ([`Homography`], [`Affine`], [`Warp`])
//! - **Shape regression**: ERT cascades ([`ShapeRegressor`]) that can be run
//!   stage-range by stage-range
//! - **Pipeline**: [`FaceDetector`] finds faces, regresses their landmarks,
//!   then refines eyelids and iris inside per-eye crops
//! - **Archives**: versioned JSON and binary records of eye and face models
//!
//! Shape regression implements "One Millisecond Face Alignment with an
//! Ensemble of Regression Trees" (Kazemi & Sullivan, 2014).
//!
//! ## Quick Start
//!
//! ```rust
//! use face_cascade::{EyeModel, Homography, Point};
//!
//! let mut eye = EyeModel::new();
//! eye.eyelids = vec![
//!     Point::new(0.0, 5.0), Point::new(3.0, 3.0), Point::new(5.0, 2.0),
//!     Point::new(7.0, 3.0), Point::new(10.0, 5.0), Point::new(7.0, 7.0),
//!     Point::new(5.0, 8.0), Point::new(3.0, 7.0),
//! ];
//!
//! // Crop coordinates to image coordinates: crop placed at (120, 80), half size.
//! let to_image = Homography::translation(120.0, 80.0) * Homography::scaling(2.0);
//! let placed = eye.transform(&to_image).unwrap();
//! assert_eq!(*placed.inner_eyelid_corner(), Point::new(140.0, 90.0));
//! ```
//!
//! ## Reading Pixels From Other Sources
//!
//! Regressors read pixels through [`ImageAccess`]. A window into a larger
//! frame, for instance, can be regressed without copying it out:
//!
//! ```rust
//! use face_cascade::{sample_bilinear, GrayImage, ImageAccess};
//!
//! /// A `width` x `height` window of `frame` with its origin at `(left, top)`.
//! struct Window<'a> {
//!     frame: &'a GrayImage,
//!     left: i32,
//!     top: i32,
//!     width: u32,
//!     height: u32,
//! }
//!
//! impl ImageAccess for Window<'_> {
//!     fn get_pixel(&self, x: i32, y: i32) -> u8 {
//!         let (w, h) = (self.width as i32, self.height as i32);
//!         if (0..w).contains(&x) && (0..h).contains(&y) {
//!             self.frame.get_pixel(self.left + x, self.top + y)
//!         } else {
//!             0
//!         }
//!     }
//!     fn width(&self) -> u32 { self.width }
//!     fn height(&self) -> u32 { self.height }
//! }
//!
//! let frame = GrayImage::from_fn(64, 48, |x, y| (x + 2 * y) as u8);
//! let window = Window { frame: &frame, left: 10, top: 20, width: 16, height: 16 };
//! assert_eq!(window.get_pixel(0, 0), frame.get_pixel(10, 20));
//! assert_eq!(window.get_pixel(16, 0), 0);
//! assert_eq!(sample_bilinear(&window, 0.5, 0.0), 50.5);
//! ```

pub mod archive;
mod config;
mod detector;
mod error;
mod eye;
mod face;
mod field;
mod raster;
mod regressor;
mod transform;
mod types;

pub use config::{Config, Hints, Resources};
pub use detector::{
    default_eye_crops, non_max_suppression, ArtifactLoader, DefaultLoader, Detection, EyeCrop,
    EyeCropper, FaceDetector, MatLogger, ObjectDetector, RefineReport, RefineWarning, TimeLogger,
};
pub use error::{Error, Result};
pub use eye::{EyeLayout, EyeModel, DEFAULT_CORNER_INDICES};
pub use face::{split_contour, FaceModel, LandmarkFormat};
pub use field::Field;
pub use raster::{sample_bilinear, GrayImage, ImageAccess, PaddedImage, WarpedView};
pub use regressor::{
    constant_stage, RegressionTree, ShapeRegressor, ShapeRegressorBuilder, SplitFeature,
    TreeEnsemble, TreeNode,
};
pub use transform::{wrap_angle, Affine, Homography, PointTransform, Warp};
pub use types::{polygon_area, BoundingBox, Circle, Ellipse, Point, Shape};
