use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::eye::EyeModel;
use crate::field::Field;
use crate::transform::{Homography, PointTransform, Warp};
use crate::types::{BoundingBox, Point, Shape};

/// Landmark numbering schemes understood by the face model.
///
/// "Left" and "right" refer to image sides: the left eye has the smaller x
/// coordinate in an upright, unmirrored face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkFormat {
    /// Left eye, right eye, nose tip, left mouth corner, right mouth corner.
    Five,
    /// iBUG 300-W 68-point annotation.
    Ibug68,
}

impl LandmarkFormat {
    pub fn from_count(n: usize) -> Option<Self> {
        match n {
            5 => Some(Self::Five),
            68 => Some(Self::Ibug68),
            _ => None,
        }
    }

    pub fn num_landmarks(&self) -> usize {
        match self {
            Self::Five => 5,
            Self::Ibug68 => 68,
        }
    }

    fn left_eye(&self) -> std::ops::Range<usize> {
        match self {
            Self::Five => 0..1,
            Self::Ibug68 => 36..42,
        }
    }

    fn right_eye(&self) -> std::ops::Range<usize> {
        match self {
            Self::Five => 1..2,
            Self::Ibug68 => 42..48,
        }
    }

    fn nose_tip(&self) -> usize {
        match self {
            Self::Five => 2,
            Self::Ibug68 => 30,
        }
    }

    /// Start index of every contour (jaw, brows, nose, eyes, lips).
    fn contour_starts(&self) -> &'static [usize] {
        match self {
            Self::Five => &[0, 1, 2, 3],
            Self::Ibug68 => &[0, 17, 22, 27, 31, 36, 42, 48, 60],
        }
    }
}

/// Split a flat landmark list into the contours of `format`.
///
/// Points beyond the format's landmark count are ignored.
pub fn split_contour(points: &[Point], format: LandmarkFormat) -> Vec<Vec<Point>> {
    let end = format.num_landmarks().min(points.len());
    let starts = format.contour_starts();
    starts
        .iter()
        .enumerate()
        .filter_map(|(i, &s)| {
            let e = starts.get(i + 1).copied().unwrap_or(end).min(end);
            (s < e).then(|| points[s..e].to_vec())
        })
        .collect()
}

/// A face candidate and everything refined for it so far.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceModel {
    pub roi: Field<BoundingBox>,
    /// Detector confidence, when the face came from a detection.
    pub score: Field<f32>,
    pub points: Shape,
    pub eye_left_center: Field<Point>,
    pub eye_right_center: Field<Point>,
    pub nose_tip: Field<Point>,
    pub eye_left: Field<EyeModel>,
    pub eye_right: Field<EyeModel>,
}

impl FaceModel {
    pub fn from_roi(roi: BoundingBox) -> Self {
        Self {
            roi: Field::new(roi),
            ..Default::default()
        }
    }

    /// Store regressed landmarks and derive eye centers and nose tip.
    pub fn set_landmarks(&mut self, shape: Shape, format: LandmarkFormat) {
        self.eye_left_center = shape.centroid(format.left_eye()).into();
        self.eye_right_center = shape.centroid(format.right_eye()).into();
        self.nose_tip = shape.points.get(format.nose_tip()).copied().into();
        self.points = shape;
    }

    /// Region of the face: the explicit roi, else the landmark extent.
    pub fn region(&self) -> Option<BoundingBox> {
        self.roi
            .get()
            .copied()
            .or_else(|| BoundingBox::enclosing(&self.points.points))
    }

    pub fn inter_ocular_distance(&self) -> Option<f32> {
        let l = self.eye_left_center.get()?;
        let r = self.eye_right_center.get()?;
        Some(l.distance(r))
    }

    /// Map the face, including both eye models, through `h`.
    pub fn transform(&self, h: &Homography) -> Result<Self> {
        self.warp(h)
    }
}

impl Warp for FaceModel {
    fn warp<T: PointTransform>(&self, t: &T) -> std::result::Result<Self, T::Error> {
        Ok(FaceModel {
            roi: self.roi.warp(t)?,
            score: self.score,
            points: self.points.warp(t)?,
            eye_left_center: self.eye_left_center.warp(t)?,
            eye_right_center: self.eye_right_center.warp(t)?,
            nose_tip: self.nose_tip.warp(t)?,
            eye_left: self.eye_left.warp(t)?,
            eye_right: self.eye_right.warp(t)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{infallible, Affine};

    fn five() -> Shape {
        Shape::new(vec![
            Point::new(30.0, 30.0),
            Point::new(70.0, 30.0),
            Point::new(50.0, 55.0),
            Point::new(35.0, 75.0),
            Point::new(65.0, 75.0),
        ])
    }

    #[test]
    fn landmarks_fill_derived_points() {
        let mut face = FaceModel::from_roi(BoundingBox::new(0.0, 0.0, 100.0, 100.0));
        face.set_landmarks(five(), LandmarkFormat::Five);
        assert_eq!(face.eye_left_center.get(), Some(&Point::new(30.0, 30.0)));
        assert_eq!(face.eye_right_center.get(), Some(&Point::new(70.0, 30.0)));
        assert_eq!(face.nose_tip.get(), Some(&Point::new(50.0, 55.0)));
        assert_eq!(face.inter_ocular_distance(), Some(40.0));
    }

    #[test]
    fn ibug_eye_centers_average_contours() {
        let points: Vec<Point> = (0..68).map(|i| Point::new(i as f32, 0.0)).collect();
        let mut face = FaceModel::default();
        face.set_landmarks(Shape::new(points), LandmarkFormat::Ibug68);
        assert_eq!(face.eye_left_center.get().unwrap().x, 38.5);
        assert_eq!(face.eye_right_center.get().unwrap().x, 44.5);
        assert_eq!(face.nose_tip.get().unwrap().x, 30.0);
    }

    #[test]
    fn transform_reaches_eyes() {
        let mut face = FaceModel::from_roi(BoundingBox::new(10.0, 10.0, 20.0, 20.0));
        face.set_landmarks(five(), LandmarkFormat::Five);
        let mut eye = EyeModel::default();
        eye.eyelids = vec![Point::new(1.0, 1.0); 8];
        face.eye_left.set(eye);

        let out = face.transform(&Homography::scaling(2.0)).unwrap();
        assert_eq!(out.roi.get(), Some(&BoundingBox::new(20.0, 20.0, 40.0, 40.0)));
        assert_eq!(out.points[0], Point::new(60.0, 60.0));
        assert_eq!(out.eye_left.get().unwrap().eyelids[3], Point::new(2.0, 2.0));
        assert!(!out.eye_right.has());

        let back = infallible(out.warp(&Affine::scaling(0.5)));
        assert_eq!(back, face);
    }

    #[test]
    fn region_falls_back_to_landmarks() {
        let mut face = FaceModel::default();
        assert_eq!(face.region(), None);
        face.set_landmarks(five(), LandmarkFormat::Five);
        assert_eq!(face.region(), Some(BoundingBox::new(30.0, 30.0, 40.0, 45.0)));
    }

    #[test]
    fn contours_split_by_format() {
        let points: Vec<Point> = (0..68).map(|i| Point::new(i as f32, 0.0)).collect();
        let contours = split_contour(&points, LandmarkFormat::Ibug68);
        assert_eq!(contours.len(), 9);
        assert_eq!(contours[0].len(), 17);
        assert_eq!(contours[8].len(), 8);

        let partial = split_contour(&points[..20], LandmarkFormat::Ibug68);
        assert_eq!(partial.len(), 2);
        assert_eq!(partial[1].len(), 3);
    }

    #[test]
    fn format_from_count() {
        assert_eq!(LandmarkFormat::from_count(68), Some(LandmarkFormat::Ibug68));
        assert_eq!(LandmarkFormat::from_count(5), Some(LandmarkFormat::Five));
        assert_eq!(LandmarkFormat::from_count(12), None);
    }
}
