//! Versioned persistence for eye and face models.
//!
//! Every record is written as an envelope `{ version, data }`. Readers decode
//! the version alone first and then pick the decode routine registered for
//! it, so older records can be upgraded and unknown ones are rejected with
//! [`Error::Version`] instead of being misread.
//!
//! | Record | Versions read | Version written |
//! |---|---|---|
//! | eye | 0 (no crease, no 3-point iris), 1 | 1 |
//! | face | 1 | 1 |
//!
//! The byte codec is pluggable through [`Archive`]; JSON and bincode are
//! provided.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::eye::{EyeModel, DEFAULT_CORNER_INDICES};
use crate::face::FaceModel;
use crate::field::Field;
use crate::types::{BoundingBox, Circle, Ellipse, Point, Shape};

pub const EYE_RECORD_VERSION: u32 = 1;
pub const FACE_RECORD_VERSION: u32 = 1;

const EYE_VERSIONS: [u32; 2] = [0, 1];
const FACE_VERSIONS: [u32; 1] = [1];

/// A byte codec for serde types.
pub trait Archive {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Human-readable JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArchive;

impl Archive for JsonArchive {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact bincode.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryArchive;

impl Archive for BinaryArchive {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct Versioned<T> {
    #[allow(dead_code)]
    version: u32,
    data: T,
}

// Reads only the leading version; the payload is ignored (JSON) or left as
// trailing bytes (bincode).
#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EyeRecordV0 {
    roi: Option<BoundingBox>,
    eyelids: Vec<Point>,
    iris: Ellipse,
    pupil: Ellipse,
    inner: Option<Point>,
    outer: Option<Point>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EyeRecordV1 {
    roi: Option<BoundingBox>,
    eyelids: Vec<Point>,
    crease: Vec<Point>,
    iris: Ellipse,
    pupil: Ellipse,
    inner: Option<Point>,
    outer: Option<Point>,
    iris_center: Option<Point>,
    iris_inner: Option<Point>,
    iris_outer: Option<Point>,
    // Additive fields; older JSON writers omitted them.
    #[serde(default)]
    angle: Option<f32>,
    #[serde(default)]
    iris_circle: Circle,
    #[serde(default)]
    pupil_circle: Circle,
    #[serde(default = "default_corners")]
    corner_indices: [usize; 2],
    #[serde(default)]
    eyelids_spline: Vec<Point>,
    #[serde(default)]
    crease_spline: Vec<Point>,
}

fn default_corners() -> [usize; 2] {
    DEFAULT_CORNER_INDICES
}

impl From<&EyeModel> for EyeRecordV1 {
    fn from(eye: &EyeModel) -> Self {
        Self {
            roi: eye.roi.into(),
            eyelids: eye.eyelids.clone(),
            crease: eye.crease.clone(),
            iris: eye.iris_ellipse,
            pupil: eye.pupil_ellipse,
            inner: eye.inner_corner.into(),
            outer: eye.outer_corner.into(),
            iris_center: eye.iris_center.into(),
            iris_inner: eye.iris_inner.into(),
            iris_outer: eye.iris_outer.into(),
            angle: eye.angle.into(),
            iris_circle: eye.iris,
            pupil_circle: eye.pupil,
            corner_indices: eye.corner_indices,
            eyelids_spline: eye.eyelids_spline.clone(),
            crease_spline: eye.crease_spline.clone(),
        }
    }
}

impl From<EyeRecordV1> for EyeModel {
    fn from(r: EyeRecordV1) -> Self {
        EyeModel {
            angle: r.angle.into(),
            roi: r.roi.into(),
            pupil: r.pupil_circle,
            iris: r.iris_circle,
            iris_ellipse: r.iris,
            pupil_ellipse: r.pupil,
            corner_indices: r.corner_indices,
            eyelids: r.eyelids,
            eyelids_spline: r.eyelids_spline,
            inner_corner: r.inner.into(),
            outer_corner: r.outer.into(),
            crease: r.crease,
            crease_spline: r.crease_spline,
            iris_center: r.iris_center.into(),
            iris_inner: r.iris_inner.into(),
            iris_outer: r.iris_outer.into(),
        }
    }
}

impl From<EyeRecordV0> for EyeModel {
    fn from(r: EyeRecordV0) -> Self {
        EyeModel {
            roi: r.roi.into(),
            eyelids: r.eyelids,
            iris_ellipse: r.iris,
            pupil_ellipse: r.pupil,
            inner_corner: r.inner.into(),
            outer_corner: r.outer.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FaceRecordV1 {
    roi: Option<BoundingBox>,
    score: Option<f32>,
    points: Vec<Point>,
    eye_left_center: Option<Point>,
    eye_right_center: Option<Point>,
    nose_tip: Option<Point>,
    eye_left: Option<EyeRecordV1>,
    eye_right: Option<EyeRecordV1>,
}

impl From<&FaceModel> for FaceRecordV1 {
    fn from(face: &FaceModel) -> Self {
        Self {
            roi: face.roi.into(),
            score: face.score.into(),
            points: face.points.points.clone(),
            eye_left_center: face.eye_left_center.into(),
            eye_right_center: face.eye_right_center.into(),
            nose_tip: face.nose_tip.into(),
            eye_left: face.eye_left.get().map(EyeRecordV1::from),
            eye_right: face.eye_right.get().map(EyeRecordV1::from),
        }
    }
}

impl From<FaceRecordV1> for FaceModel {
    fn from(r: FaceRecordV1) -> Self {
        FaceModel {
            roi: r.roi.into(),
            score: r.score.into(),
            points: Shape::new(r.points),
            eye_left_center: r.eye_left_center.into(),
            eye_right_center: r.eye_right_center.into(),
            nose_tip: r.nose_tip.into(),
            eye_left: Field::from(r.eye_left.map(EyeModel::from)),
            eye_right: Field::from(r.eye_right.map(EyeModel::from)),
        }
    }
}

fn read_version<A: Archive>(archive: &A, bytes: &[u8]) -> Result<u32> {
    Ok(archive.decode::<VersionHeader>(bytes)?.version)
}

fn unsupported(found: u32, supported: &[u32]) -> Error {
    Error::Version {
        found,
        supported: supported.to_vec(),
    }
}

pub fn write_eye<A: Archive>(archive: &A, eye: &EyeModel) -> Result<Vec<u8>> {
    archive.encode(&Envelope {
        version: EYE_RECORD_VERSION,
        data: &EyeRecordV1::from(eye),
    })
}

pub fn read_eye<A: Archive>(archive: &A, bytes: &[u8]) -> Result<EyeModel> {
    match read_version(archive, bytes)? {
        0 => Ok(archive.decode::<Versioned<EyeRecordV0>>(bytes)?.data.into()),
        1 => Ok(archive.decode::<Versioned<EyeRecordV1>>(bytes)?.data.into()),
        v => Err(unsupported(v, &EYE_VERSIONS)),
    }
}

pub fn write_faces<A: Archive>(archive: &A, faces: &[FaceModel]) -> Result<Vec<u8>> {
    let records: Vec<FaceRecordV1> = faces.iter().map(FaceRecordV1::from).collect();
    archive.encode(&Envelope {
        version: FACE_RECORD_VERSION,
        data: &records,
    })
}

pub fn read_faces<A: Archive>(archive: &A, bytes: &[u8]) -> Result<Vec<FaceModel>> {
    match read_version(archive, bytes)? {
        1 => Ok(archive
            .decode::<Versioned<Vec<FaceRecordV1>>>(bytes)?
            .data
            .into_iter()
            .map(FaceModel::from)
            .collect()),
        v => Err(unsupported(v, &FACE_VERSIONS)),
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

/// Save an eye model; `.json` files are written as JSON, anything else as bincode.
pub fn save_eye<P: AsRef<Path>>(path: P, eye: &EyeModel) -> Result<()> {
    let path = path.as_ref();
    let bytes = if is_json(path) {
        write_eye(&JsonArchive, eye)?
    } else {
        write_eye(&BinaryArchive, eye)?
    };
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_eye<P: AsRef<Path>>(path: P) -> Result<EyeModel> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    if is_json(path) {
        read_eye(&JsonArchive, &bytes)
    } else {
        read_eye(&BinaryArchive, &bytes)
    }
}

pub fn save_faces<P: AsRef<Path>>(path: P, faces: &[FaceModel]) -> Result<()> {
    let path = path.as_ref();
    let bytes = if is_json(path) {
        write_faces(&JsonArchive, faces)?
    } else {
        write_faces(&BinaryArchive, faces)?
    };
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_faces<P: AsRef<Path>>(path: P) -> Result<Vec<FaceModel>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    if is_json(path) {
        read_faces(&JsonArchive, &bytes)
    } else {
        read_faces(&BinaryArchive, &bytes)
    }
}
