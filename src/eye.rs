//! Geometric model of a single eye.
//!
//! An [`EyeModel`] lives in one coordinate frame at a time. Regression stages
//! fill it in at their own working resolution, then move it to the next
//! frame with [`EyeModel::transform`] (or the infallible scale/translate
//! operators). Quantities that have not been computed are either absent
//! [`Field`]s or degenerate circles/ellipses, and transforms leave both kinds
//! untouched.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::field::Field;
use crate::transform::{infallible, Affine, Homography, PointTransform, Warp};
use crate::types::{polygon_area, BoundingBox, Circle, Ellipse, Point, Shape};

/// Corner positions in an 8-point eyelid contour: outer, inner.
pub const DEFAULT_CORNER_INDICES: [usize; 2] = [0, 4];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeModel {
    /// Eye-opening axis in radians.
    pub angle: Field<f32>,
    pub roi: Field<BoundingBox>,

    pub pupil: Circle,
    pub iris: Circle,
    pub iris_ellipse: Ellipse,
    pub pupil_ellipse: Ellipse,

    /// Indices of the outer and inner corner within `eyelids`.
    pub corner_indices: [usize; 2],
    pub eyelids: Vec<Point>,
    pub eyelids_spline: Vec<Point>,

    /// Explicit corner overrides, independent of `corner_indices`.
    pub inner_corner: Field<Point>,
    pub outer_corner: Field<Point>,

    pub crease: Vec<Point>,
    pub crease_spline: Vec<Point>,

    // 3-point iris estimate
    pub iris_center: Field<Point>,
    pub iris_inner: Field<Point>,
    pub iris_outer: Field<Point>,
}

impl Default for EyeModel {
    fn default() -> Self {
        Self {
            angle: Field::absent(),
            roi: Field::absent(),
            pupil: Circle::default(),
            iris: Circle::default(),
            iris_ellipse: Ellipse::default(),
            pupil_ellipse: Ellipse::default(),
            corner_indices: DEFAULT_CORNER_INDICES,
            eyelids: Vec::new(),
            eyelids_spline: Vec::new(),
            inner_corner: Field::absent(),
            outer_corner: Field::absent(),
            crease: Vec::new(),
            crease_spline: Vec::new(),
            iris_center: Field::absent(),
            iris_inner: Field::absent(),
            iris_outer: Field::absent(),
        }
    }
}

impl EyeModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the empty model.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// The eyelid point at `corner_indices[0]`.
    ///
    /// # Panics
    ///
    /// If `eyelids` is shorter than the corner index.
    pub fn outer_eyelid_corner(&self) -> &Point {
        &self.eyelids[self.corner_indices[0]]
    }

    /// The eyelid point at `corner_indices[1]`.
    ///
    /// # Panics
    ///
    /// If `eyelids` is shorter than the corner index.
    pub fn inner_eyelid_corner(&self) -> &Point {
        &self.eyelids[self.corner_indices[1]]
    }

    pub fn outer_eyelid_corner_mut(&mut self) -> &mut Point {
        &mut self.eyelids[self.corner_indices[0]]
    }

    pub fn inner_eyelid_corner_mut(&mut self) -> &mut Point {
        &mut self.eyelids[self.corner_indices[1]]
    }

    fn corners(&self) -> Option<(Point, Point)> {
        let outer = self.eyelids.get(self.corner_indices[0])?;
        let inner = self.eyelids.get(self.corner_indices[1])?;
        Some((*outer, *inner))
    }

    /// Center of the pupil circle; meaningful only when its radius is non-zero.
    pub fn pupil_center(&self) -> Point {
        self.pupil.center
    }

    /// Contour points from the outer corner to the inner corner, inclusive.
    pub fn upper_eyelid(&self) -> Vec<Point> {
        self.arc(self.corner_indices[0], self.corner_indices[1])
    }

    /// Contour points from the inner corner back to the outer corner, inclusive.
    pub fn lower_eyelid(&self) -> Vec<Point> {
        self.arc(self.corner_indices[1], self.corner_indices[0])
    }

    /// Walk the closed contour forward from `from` to `to`, inclusive.
    fn arc(&self, from: usize, to: usize) -> Vec<Point> {
        let n = self.eyelids.len();
        if n == 0 {
            return Vec::new();
        }
        let steps = (to + n - from % n) % n;
        (0..=steps).map(|k| self.eyelids[(from + k) % n]).collect()
    }

    /// Eyelid aperture: contour area over squared corner distance.
    ///
    /// Zero for a closed eye (upper and lower lids coincide) and for a
    /// contour without usable corners.
    pub fn openness(&self) -> f32 {
        let Some((outer, inner)) = self.corners() else {
            return 0.0;
        };
        let width2 = {
            let d = inner - outer;
            d.x * d.x + d.y * d.y
        };
        if width2 <= f32::EPSILON {
            return 0.0;
        }
        polygon_area(&self.eyelids) / width2
    }

    /// Best available iris/pupil center: iris ellipse, iris circle, pupil
    /// circle, then the 3-point estimate.
    fn iris_location(&self) -> Option<Point> {
        if !self.iris_ellipse.is_degenerate() {
            Some(self.iris_ellipse.center)
        } else if !self.iris.is_degenerate() {
            Some(self.iris.center)
        } else if !self.pupil.is_degenerate() {
            Some(self.pupil.center)
        } else {
            self.iris_center.get().copied()
        }
    }

    /// Iris offset from the corner midpoint in units of eye width.
    ///
    /// The x component is negated for a left eye so that both eyes report
    /// gaze in the same direction. `None` without corners or an iris.
    pub fn estimate_gaze(&self, is_right: bool) -> Option<Point> {
        let (outer, inner) = self.corners()?;
        let iris = self.iris_location()?;
        let width = outer.distance(&inner);
        if width <= f32::EPSILON {
            return None;
        }
        let mut gaze = (iris - outer.midpoint(&inner)) * (1.0 / width);
        if !is_right {
            gaze.x = -gaze.x;
        }
        Some(gaze)
    }

    /// Iris center plus the iris boundary points along the corner axis,
    /// returned as `(center, inner, outer)`.
    pub fn estimate_iris_landmarks(&self) -> Option<(Point, Point, Point)> {
        if self.iris_ellipse.is_degenerate() {
            return None;
        }
        let (outer, inner) = self.corners()?;
        let axis = inner - outer;
        let len = axis.norm();
        if len <= f32::EPSILON {
            return None;
        }
        let u = axis * (1.0 / len);
        let e = &self.iris_ellipse;
        let (a, b) = (0.5 * e.width, 0.5 * e.height);
        let phi = u.y.atan2(u.x) - e.angle;
        let r = a * b / ((b * phi.cos()).powi(2) + (a * phi.sin()).powi(2)).sqrt();
        Some((e.center, e.center + u * r, e.center - u * r))
    }

    /// Populate the 3-point iris estimate from the iris ellipse, if possible.
    pub fn fill_iris_landmarks(&mut self) -> bool {
        match self.estimate_iris_landmarks() {
            Some((center, inner, outer)) => {
                self.iris_center.set(center);
                self.iris_inner.set(inner);
                self.iris_outer.set(outer);
                true
            }
            None => false,
        }
    }

    /// Canonical form: `width >= height`, angle in `[0, pi)`. A circle gets
    /// angle 0.
    pub fn normalize_ellipse(e: &mut Ellipse) {
        if (e.width - e.height).abs() <= 1e-5 * e.width.abs().max(e.height.abs()) {
            e.angle = 0.0;
            return;
        }
        if e.width < e.height {
            std::mem::swap(&mut e.width, &mut e.height);
            e.angle += 0.5 * PI;
        }
        e.angle = e.angle.rem_euclid(PI);
        if e.angle >= PI {
            e.angle = 0.0;
        }
    }

    pub fn normalize(&mut self) {
        Self::normalize_ellipse(&mut self.iris_ellipse);
        Self::normalize_ellipse(&mut self.pupil_ellipse);
    }

    /// Mirror a coordinate about `width`.
    pub fn flop_coordinate(x: &mut f32, width: f32) {
        *x = width - *x;
    }

    /// Mirror every point-bearing field horizontally: `x' = width - x`.
    ///
    /// Corner indices are kept, so the outer corner stays the outer corner
    /// and contour winding reverses. Applying it twice restores the model.
    pub fn flop(&mut self, width: f32) {
        let angle = self.angle.take();
        *self = infallible(self.warp(&Affine::mirror_x(width)));
        if let Some(a) = angle {
            self.angle.set(PI - a);
        }
    }

    pub fn flopped(&self, width: f32) -> Self {
        let mut out = self.clone();
        out.flop(width);
        out
    }

    /// Map the model through a projective transform.
    ///
    /// Fails with [`crate::Error::DomainTransform`] if any present point maps
    /// to infinity. The angle is not remapped.
    pub fn transform(&self, h: &Homography) -> Result<Self> {
        self.warp(h)
    }

    /// Uniform scale about the origin.
    pub fn scaled(&self, s: f32) -> Self {
        infallible(self.warp(&Affine::scaling(s)))
    }

    pub fn translated(&self, offset: Point) -> Self {
        infallible(self.warp(&Affine::translation(offset.x, offset.y)))
    }

    /// Resample the eyelid contour (closed) and crease (open) with
    /// Catmull-Rom splines into the spline fields.
    pub fn refine_splines(&mut self, eyelid_points: usize, crease_points: usize) {
        self.eyelids_spline = catmull_rom(&self.eyelids, true, eyelid_points);
        self.crease_spline = catmull_rom(&self.crease, false, crease_points);
    }

    /// Spline fields with `factor` samples per control point span.
    pub fn upsample(&mut self, eyelid_factor: usize, crease_factor: usize) {
        let eyelid_points = self.eyelids.len() * eyelid_factor.max(1);
        let crease_points = match self.crease.len() {
            0 => 0,
            n => (n - 1) * crease_factor.max(1) + 1,
        };
        self.refine_splines(eyelid_points, crease_points);
    }

    /// Polylines for external rendering: closed eyelids, crease, iris and
    /// pupil outlines. Splines are preferred over raw contours when present.
    pub fn contours(&self) -> Vec<Vec<Point>> {
        let mut out = Vec::new();
        let lids = if self.eyelids_spline.is_empty() {
            &self.eyelids
        } else {
            &self.eyelids_spline
        };
        if let Some(first) = lids.first() {
            let mut closed = lids.clone();
            closed.push(*first);
            out.push(closed);
        }
        let crease = if self.crease_spline.is_empty() {
            &self.crease
        } else {
            &self.crease_spline
        };
        if !crease.is_empty() {
            out.push(crease.clone());
        }
        for e in [&self.iris_ellipse, &self.pupil_ellipse] {
            if !e.is_degenerate() {
                let mut poly = e.to_polygon(32);
                poly.push(poly[0]);
                out.push(poly);
            }
        }
        if self.pupil_ellipse.is_degenerate() && !self.pupil.is_degenerate() {
            let d = 2.0 * self.pupil.radius;
            let mut poly = Ellipse::new(self.pupil.center, d, d, 0.0).to_polygon(32);
            poly.push(poly[0]);
            out.push(poly);
        }
        out
    }

    /// Build a model from a regressed eye shape laid out per `layout`.
    ///
    /// Returns `None` if the shape has the wrong number of points.
    pub fn from_shape(shape: &Shape, layout: &EyeLayout, with_iris: bool) -> Option<Self> {
        if shape.num_landmarks() != layout.num_landmarks() {
            return None;
        }
        let pts = &shape.points;
        let mut eye = EyeModel {
            corner_indices: layout.corner_indices,
            eyelids: pts[..layout.eyelids].to_vec(),
            crease: pts[layout.eyelids..layout.eyelids + layout.crease].to_vec(),
            ..Default::default()
        };
        if let Some((outer, inner)) = eye.corners() {
            let d = inner - outer;
            eye.angle.set(d.y.atan2(d.x));
        }
        eye.roi = BoundingBox::enclosing(&eye.eyelids).into();

        if layout.iris && with_iris {
            let base = layout.eyelids + layout.crease;
            let (center, inner, outer) = (pts[base], pts[base + 1], pts[base + 2]);
            let radius = 0.5 * inner.distance(&outer);
            let d = inner - outer;
            eye.iris_center.set(center);
            eye.iris_inner.set(inner);
            eye.iris_outer.set(outer);
            eye.iris = Circle::new(center, radius);
            eye.iris_ellipse = Ellipse::new(center, 2.0 * radius, 2.0 * radius, d.y.atan2(d.x));
        }
        Some(eye)
    }
}

impl Warp for EyeModel {
    fn warp<T: PointTransform>(&self, t: &T) -> std::result::Result<Self, T::Error> {
        // TODO: compose `angle` with the local rotation of the transform.
        Ok(EyeModel {
            angle: self.angle,
            roi: self.roi.warp(t)?,
            pupil: self.pupil.warp(t)?,
            iris: self.iris.warp(t)?,
            iris_ellipse: self.iris_ellipse.warp(t)?,
            pupil_ellipse: self.pupil_ellipse.warp(t)?,
            corner_indices: self.corner_indices,
            eyelids: self.eyelids.warp(t)?,
            eyelids_spline: self.eyelids_spline.warp(t)?,
            inner_corner: self.inner_corner.warp(t)?,
            outer_corner: self.outer_corner.warp(t)?,
            crease: self.crease.warp(t)?,
            crease_spline: self.crease_spline.warp(t)?,
            iris_center: self.iris_center.warp(t)?,
            iris_inner: self.iris_inner.warp(t)?,
            iris_outer: self.iris_outer.warp(t)?,
        })
    }
}

impl std::ops::Mul<f32> for &EyeModel {
    type Output = EyeModel;

    fn mul(self, s: f32) -> EyeModel {
        self.scaled(s)
    }
}

impl std::ops::Mul<f32> for EyeModel {
    type Output = EyeModel;

    fn mul(self, s: f32) -> EyeModel {
        self.scaled(s)
    }
}

impl std::ops::MulAssign<f32> for EyeModel {
    fn mul_assign(&mut self, s: f32) {
        *self = self.scaled(s);
    }
}

impl std::ops::Add<Point> for &EyeModel {
    type Output = EyeModel;

    fn add(self, offset: Point) -> EyeModel {
        self.translated(offset)
    }
}

impl std::ops::Add<Point> for EyeModel {
    type Output = EyeModel;

    fn add(self, offset: Point) -> EyeModel {
        self.translated(offset)
    }
}

impl std::ops::AddAssign<Point> for EyeModel {
    fn add_assign(&mut self, offset: Point) {
        *self = self.translated(offset);
    }
}

impl std::ops::Sub<Point> for &EyeModel {
    type Output = EyeModel;

    fn sub(self, offset: Point) -> EyeModel {
        self.translated(-offset)
    }
}

impl std::ops::Sub<Point> for EyeModel {
    type Output = EyeModel;

    fn sub(self, offset: Point) -> EyeModel {
        self.translated(-offset)
    }
}

impl std::ops::SubAssign<Point> for EyeModel {
    fn sub_assign(&mut self, offset: Point) {
        *self = self.translated(-offset);
    }
}

/// How an eye regressor's output points map onto an [`EyeModel`]:
/// `eyelids` contour points, then `crease` points, then optionally three
/// iris points (center, inner, outer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeLayout {
    pub eyelids: usize,
    pub crease: usize,
    pub iris: bool,
    pub corner_indices: [usize; 2],
}

impl EyeLayout {
    pub fn num_landmarks(&self) -> usize {
        self.eyelids + self.crease + if self.iris { 3 } else { 0 }
    }

    /// A plausible left-eye mean shape in crop-normalized coordinates,
    /// matching this layout.
    pub fn mean_shape(&self) -> Shape {
        let eyelids = (0..self.eyelids).map(|i| {
            let t = std::f32::consts::TAU * i as f32 / self.eyelids.max(1) as f32;
            Point::new(0.5 - 0.35 * t.cos(), 0.5 - 0.15 * t.sin())
        });
        let crease = (0..self.crease).map(|i| {
            let t = PI * (i as f32 + 0.5) / self.crease as f32;
            Point::new(0.5 - 0.35 * t.cos(), 0.3 - 0.1 * t.sin())
        });
        let iris = [
            Point::new(0.5, 0.5),
            Point::new(0.62, 0.5),
            Point::new(0.38, 0.5),
        ];
        let mut points: Vec<Point> = eyelids.chain(crease).collect();
        if self.iris {
            points.extend(iris);
        }
        Shape::new(points)
    }
}

impl Default for EyeLayout {
    fn default() -> Self {
        Self {
            eyelids: 8,
            crease: 5,
            iris: true,
            corner_indices: DEFAULT_CORNER_INDICES,
        }
    }
}

/// Uniform Catmull-Rom resampling through `points`.
fn catmull_rom(points: &[Point], closed: bool, samples: usize) -> Vec<Point> {
    let m = points.len();
    if m < 2 || samples == 0 {
        return points.to_vec();
    }
    let at = |i: isize| -> Point {
        if closed {
            points[i.rem_euclid(m as isize) as usize]
        } else {
            points[i.clamp(0, m as isize - 1) as usize]
        }
    };
    let (span, denom) = if closed {
        (m as f32, samples as f32)
    } else {
        ((m - 1) as f32, (samples.max(2) - 1) as f32)
    };

    (0..samples)
        .map(|k| {
            let s = span * k as f32 / denom;
            let seg = (s.floor() as isize).min(span as isize - 1);
            let t = s - seg as f32;
            let (p0, p1, p2, p3) = (at(seg - 1), at(seg), at(seg + 1), at(seg + 2));
            let (t2, t3) = (t * t, t * t * t);
            let f = |a: f32, b: f32, c: f32, d: f32| {
                0.5 * (2.0 * b
                    + (c - a) * t
                    + (2.0 * a - 5.0 * b + 4.0 * c - d) * t2
                    + (3.0 * b - a - 3.0 * c + d) * t3)
            };
            Point::new(f(p0.x, p1.x, p2.x, p3.x), f(p0.y, p1.y, p2.y, p3.y))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const TOL: f32 = 1e-3;

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < TOL && (a.y - b.y).abs() < TOL
    }

    fn eyelids() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(5.0, -4.0),
            Point::new(10.0, -5.0),
            Point::new(15.0, -4.0),
            Point::new(20.0, 0.0),
            Point::new(15.0, 3.0),
            Point::new(10.0, 4.0),
            Point::new(5.0, 3.0),
        ]
    }

    fn populated() -> EyeModel {
        EyeModel {
            angle: Field::new(0.1),
            roi: Field::new(BoundingBox::new(-2.0, -6.0, 24.0, 12.0)),
            pupil: Circle::new(Point::new(11.0, 0.0), 1.5),
            iris: Circle::new(Point::new(11.0, 0.0), 4.0),
            iris_ellipse: Ellipse::new(Point::new(11.0, 0.0), 8.0, 7.0, 0.2),
            pupil_ellipse: Ellipse::new(Point::new(11.0, 0.0), 3.0, 2.5, -0.3),
            eyelids: eyelids(),
            crease: vec![Point::new(2.0, -7.0), Point::new(10.0, -9.0), Point::new(18.0, -7.0)],
            inner_corner: Field::new(Point::new(20.0, 0.5)),
            iris_center: Field::new(Point::new(11.0, 0.0)),
            iris_inner: Field::new(Point::new(15.0, 0.0)),
            iris_outer: Field::new(Point::new(7.0, 0.0)),
            ..Default::default()
        }
    }

    #[test]
    fn corners_follow_indices() {
        let eye = populated();
        assert_eq!(*eye.outer_eyelid_corner(), eye.eyelids[0]);
        assert_eq!(*eye.inner_eyelid_corner(), eye.eyelids[4]);

        let mut eye = eye;
        eye.inner_eyelid_corner_mut().x = 21.0;
        assert_eq!(eye.eyelids[4].x, 21.0);
    }

    #[test]
    fn eyelid_partition() {
        let eye = populated();
        assert_eq!(eye.upper_eyelid(), eyelids()[0..=4].to_vec());
        let lower = eye.lower_eyelid();
        assert_eq!(lower.len(), 5);
        assert_eq!(lower[0], eyelids()[4]);
        assert_eq!(lower[4], eyelids()[0]);
        assert!(EyeModel::default().upper_eyelid().is_empty());
    }

    #[test]
    fn openness_is_zero_when_closed() {
        let eye = populated();
        assert!(eye.openness() > 0.0);

        let mut closed = eye.clone();
        for p in closed.eyelids.iter_mut() {
            p.y = 0.0;
        }
        assert_eq!(closed.openness(), 0.0);
        assert_eq!(EyeModel::default().openness(), 0.0);
    }

    #[test]
    fn gaze_is_mirrored_for_left_eye() {
        let eye = populated();
        let right = eye.estimate_gaze(true).unwrap();
        let left = eye.estimate_gaze(false).unwrap();
        assert!((right.x - 0.05).abs() < 1e-5);
        assert_eq!(left.x, -right.x);
        assert_eq!(left.y, right.y);
        assert!(EyeModel::default().estimate_gaze(true).is_none());
    }

    #[test]
    fn iris_landmarks_lie_on_corner_axis() {
        let mut eye = populated();
        eye.iris_ellipse = Ellipse::new(Point::new(11.0, 0.0), 8.0, 8.0, 0.0);
        let (c, inner, outer) = eye.estimate_iris_landmarks().unwrap();
        assert!(close(c, Point::new(11.0, 0.0)));
        assert!(close(inner, Point::new(15.0, 0.0)));
        assert!(close(outer, Point::new(7.0, 0.0)));

        let mut empty = EyeModel::default();
        assert!(!empty.fill_iris_landmarks());
        assert!(!empty.iris_center.has());
    }

    #[test]
    fn ellipse_normalization() {
        let mut e = Ellipse::new(Point::zero(), 2.0, 6.0, -0.25);
        EyeModel::normalize_ellipse(&mut e);
        assert_eq!((e.width, e.height), (6.0, 2.0));
        assert!((e.angle - (0.5 * PI - 0.25)).abs() < 1e-5);

        let mut a = Ellipse::new(Point::zero(), 6.0, 2.0, 0.3 + PI);
        let mut b = Ellipse::new(Point::zero(), 6.0, 2.0, 0.3);
        EyeModel::normalize_ellipse(&mut a);
        EyeModel::normalize_ellipse(&mut b);
        assert!((a.angle - b.angle).abs() < 1e-5);
    }

    #[test]
    fn circles_normalize_to_one_form() {
        let mut a = Ellipse::new(Point::new(3.0, 4.0), 5.0, 5.0, 1.2);
        let mut b = Ellipse::new(Point::new(3.0, 4.0), 5.0, 5.0, -2.0);
        EyeModel::normalize_ellipse(&mut a);
        EyeModel::normalize_ellipse(&mut b);
        assert_eq!(a, b);
        assert_eq!(a.angle, 0.0);

        let mut eye = EyeModel::new();
        eye.iris_ellipse = Ellipse::new(Point::zero(), 4.0, 4.0, PI);
        eye.normalize();
        assert_eq!(eye.iris_ellipse.angle, 0.0);
        assert_eq!(eye.pupil_ellipse.angle, 0.0);
    }

    #[test]
    fn flop_is_an_involution() {
        let eye = populated();
        let once = eye.flopped(64.0);
        assert!(close(once.eyelids[0], Point::new(64.0, 0.0)));
        assert_eq!(once.roi.get().unwrap().x, 64.0 - 22.0);
        assert!((once.angle.get().unwrap() - (PI - 0.1)).abs() < 1e-6);

        let twice = once.flopped(64.0);
        for (a, b) in twice.eyelids.iter().zip(&eye.eyelids) {
            assert!(close(*a, *b));
        }
        assert!(close(twice.iris_ellipse.center, eye.iris_ellipse.center));
        assert!((twice.iris_ellipse.width - eye.iris_ellipse.width).abs() < TOL);
        assert!((twice.iris_ellipse.angle - eye.iris_ellipse.angle).abs() < TOL);
        assert!((twice.angle.get().unwrap() - 0.1).abs() < 1e-6);
        assert!(!twice.outer_corner.has());

        let mut x = 3.0;
        EyeModel::flop_coordinate(&mut x, 10.0);
        assert_eq!(x, 7.0);
    }

    #[test]
    fn identity_transform_preserves_fields() {
        let eye = populated();
        let out = eye.transform(&Homography::identity()).unwrap();
        assert_eq!(out.eyelids, eye.eyelids);
        assert_eq!(out.roi, eye.roi);
        assert_eq!(out.pupil, eye.pupil);
        assert!((out.iris_ellipse.width - 8.0).abs() < TOL);
        assert!((out.iris_ellipse.height - 7.0).abs() < TOL);
        assert!((out.iris_ellipse.angle - 0.2).abs() < TOL);
        assert!((out.pupil_ellipse.angle + 0.3).abs() < TOL);
        assert_eq!(out.angle, eye.angle);
    }

    #[test]
    fn degenerate_and_absent_fields_survive_transform() {
        let mut eye = populated();
        eye.pupil.radius = 0.0;
        eye.pupil_ellipse = Ellipse::default();
        eye.iris_center.clear();
        eye.roi.clear();

        let h = Homography::from_rows([[1.2, 0.1, 4.0], [0.0, 0.9, -3.0], [0.001, 0.0, 1.0]]);
        let out = eye.transform(&h).unwrap();
        assert_eq!(out.pupil.radius, 0.0);
        assert!(!out.pupil.radius.is_nan());
        assert_eq!(out.pupil_ellipse, Ellipse::default());
        assert!(!out.iris_center.has());
        assert!(!out.roi.has());
        assert!(!out.outer_corner.has());
        assert!(out.inner_corner.has());
    }

    #[test]
    fn point_at_infinity_fails() {
        let eye = populated();
        // w = 5 - x / 4 vanishes at the inner corner (20, 0).
        let h = Homography::from_rows([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [-0.25, 0.0, 5.0]]);
        assert!(matches!(eye.transform(&h), Err(Error::DomainTransform { .. })));
    }

    #[test]
    fn operators_match_matrices() {
        let eye = populated();
        let offset = Point::new(3.0, -2.0);
        let via_ops = &(&eye + offset) * 2.0;
        let h = Homography::scaling(2.0) * Homography::translation(offset.x, offset.y);
        let via_matrix = eye.transform(&h).unwrap();
        for (a, b) in via_ops.eyelids.iter().zip(&via_matrix.eyelids) {
            assert!(close(*a, *b));
        }
        assert!((via_ops.iris.radius - 8.0).abs() < TOL);

        let back = (via_ops * 0.5) - offset;
        assert!(close(back.eyelids[2], eye.eyelids[2]));

        let mut m = eye.clone();
        m += offset;
        m -= offset;
        m *= 1.0;
        assert!(close(m.crease[1], eye.crease[1]));
        assert!(eye.roi.has());
    }

    #[test]
    fn splines_pass_through_control_points() {
        let mut eye = populated();
        eye.refine_splines(16, 5);
        assert_eq!(eye.eyelids_spline.len(), 16);
        assert!(close(eye.eyelids_spline[0], eye.eyelids[0]));
        assert!(close(eye.eyelids_spline[8], eye.eyelids[4]));
        assert_eq!(eye.crease_spline.len(), 5);
        assert!(close(eye.crease_spline[0], eye.crease[0]));
        assert!(close(eye.crease_spline[4], eye.crease[2]));
        assert!(close(eye.crease_spline[2], eye.crease[1]));

        eye.upsample(3, 2);
        assert_eq!(eye.eyelids_spline.len(), 24);
        assert_eq!(eye.crease_spline.len(), 5);
    }

    #[test]
    fn contours_cover_present_parts() {
        let eye = populated();
        let contours = eye.contours();
        assert_eq!(contours.len(), 4);
        assert_eq!(contours[0].first(), contours[0].last());
        assert!(EyeModel::default().contours().is_empty());
    }

    #[test]
    fn clear_resets_everything() {
        let mut eye = populated();
        eye.corner_indices = [1, 5];
        eye.clear();
        assert_eq!(eye, EyeModel::default());
        assert_eq!(eye.corner_indices, DEFAULT_CORNER_INDICES);
    }

    #[test]
    fn from_shape_uses_layout() {
        let layout = EyeLayout::default();
        let shape = layout.mean_shape();
        assert_eq!(shape.num_landmarks(), 16);

        let eye = EyeModel::from_shape(&shape, &layout, true).unwrap();
        assert_eq!(eye.eyelids.len(), 8);
        assert_eq!(eye.crease.len(), 5);
        assert!(eye.iris_center.has());
        assert!(!eye.iris.is_degenerate());
        assert!(eye.angle.has());
        assert!(eye.outer_eyelid_corner().x < eye.inner_eyelid_corner().x);

        let no_iris = EyeModel::from_shape(&shape, &layout, false).unwrap();
        assert!(!no_iris.iris_center.has());
        assert!(no_iris.iris.is_degenerate());

        assert!(EyeModel::from_shape(&Shape::zeros(3), &layout, true).is_none());
    }
}
