//! Projective transform algebra over landmark primitives.
//!
//! Two transform types are provided:
//!
//! - [`Homography`]: a general 3x3 projective matrix. Mapping a point can fail
//!   when the homogeneous coordinate vanishes (the point maps to infinity),
//!   which is reported as [`Error::DomainTransform`].
//! - [`Affine`]: a 2x3 affine matrix. Mapping never fails, so scale/translate
//!   helpers built on it are infallible.
//!
//! Every geometric primitive implements [`Warp`], which maps it through any
//! [`PointTransform`]. Rules per primitive:
//!
//! | Primitive | Rule |
//! |---|---|
//! | [`Point`] | homogeneous multiply then divide |
//! | `Vec<Point>` / [`Shape`] | every point |
//! | [`BoundingBox`] | bounding box of the four mapped corners |
//! | [`Ellipse`] | center mapped exactly, axes via the local Jacobian |
//! | [`Circle`] | center mapped exactly, radius scaled by `sqrt(|det J|)` |
//! | [`Field<T>`] | mapped if present, absent stays absent |
//!
//! Degenerate circles and ellipses (zero radius or area) are left untouched.
//!
//! For affine transforms the ellipse rule is exact. Under a general
//! homography ellipses and circles are first-order approximations around
//! their centers, and bounding boxes are approximated whenever the transform
//! rotates or shears.

use std::convert::Infallible;
use std::f32::consts::{FRAC_PI_2, PI, TAU};

use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

use crate::error::{Error, Result};
use crate::field::Field;
use crate::types::{BoundingBox, Circle, Ellipse, Point, Shape};

/// A mapping of the plane that primitives can be warped through.
pub trait PointTransform {
    type Error;

    fn map_point(&self, p: Point) -> std::result::Result<Point, Self::Error>;

    /// Local linearization of the mapping at `p`.
    fn jacobian(&self, p: Point) -> std::result::Result<Matrix2<f32>, Self::Error>;
}

/// A 3x3 projective transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(Matrix3<f32>);

impl Homography {
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    pub fn from_matrix(m: Matrix3<f32>) -> Self {
        Self(m)
    }

    /// Build from row-major entries.
    pub fn from_rows(rows: [[f32; 3]; 3]) -> Self {
        Self(Matrix3::new(
            rows[0][0], rows[0][1], rows[0][2], //
            rows[1][0], rows[1][1], rows[1][2], //
            rows[2][0], rows[2][1], rows[2][2],
        ))
    }

    /// `diag(s, s, 1)`.
    pub fn scaling(s: f32) -> Self {
        Affine::scaling(s).into()
    }

    pub fn translation(dx: f32, dy: f32) -> Self {
        Affine::translation(dx, dy).into()
    }

    pub fn matrix(&self) -> &Matrix3<f32> {
        &self.0
    }

    /// True when the last row is `(0, 0, 1)`.
    pub fn is_affine(&self) -> bool {
        self.0[(2, 0)] == 0.0 && self.0[(2, 1)] == 0.0 && self.0[(2, 2)] == 1.0
    }

    pub fn inverse(&self) -> Result<Self> {
        self.0.try_inverse().map(Self).ok_or(Error::SingularTransform)
    }

    fn homogeneous(&self, p: Point) -> Vector3<f32> {
        self.0 * Vector3::new(p.x, p.y, 1.0)
    }
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

/// `a * b` applies `b` first, then `a`.
impl std::ops::Mul for Homography {
    type Output = Homography;

    fn mul(self, rhs: Homography) -> Homography {
        Homography(self.0 * rhs.0)
    }
}

impl PointTransform for Homography {
    type Error = Error;

    fn map_point(&self, p: Point) -> Result<Point> {
        let q = self.homogeneous(p);
        if q.z == 0.0 {
            return Err(Error::DomainTransform { x: p.x, y: p.y });
        }
        let out = Point::new(q.x / q.z, q.y / q.z);
        if !out.is_finite() {
            return Err(Error::DomainTransform { x: p.x, y: p.y });
        }
        Ok(out)
    }

    fn jacobian(&self, p: Point) -> Result<Matrix2<f32>> {
        let q = self.homogeneous(p);
        if q.z == 0.0 {
            return Err(Error::DomainTransform { x: p.x, y: p.y });
        }
        let h = &self.0;
        let (u, v) = (q.x / q.z, q.y / q.z);
        Ok(Matrix2::new(
            (h[(0, 0)] - u * h[(2, 0)]) / q.z,
            (h[(0, 1)] - u * h[(2, 1)]) / q.z,
            (h[(1, 0)] - v * h[(2, 0)]) / q.z,
            (h[(1, 1)] - v * h[(2, 1)]) / q.z,
        ))
    }
}

/// A 2x3 affine transform `p' = A p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    linear: Matrix2<f32>,
    translation: Vector2<f32>,
}

impl Affine {
    pub fn new(linear: Matrix2<f32>, translation: Vector2<f32>) -> Self {
        Self {
            linear,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Matrix2::identity(), Vector2::zeros())
    }

    pub fn scaling(s: f32) -> Self {
        Self::new(Matrix2::new(s, 0.0, 0.0, s), Vector2::zeros())
    }

    pub fn translation(dx: f32, dy: f32) -> Self {
        Self::new(Matrix2::identity(), Vector2::new(dx, dy))
    }

    /// Horizontal mirror `x' = width - x`.
    pub fn mirror_x(width: f32) -> Self {
        Self::new(Matrix2::new(-1.0, 0.0, 0.0, 1.0), Vector2::new(width, 0.0))
    }

    /// Maps the unit square onto `rect` (anisotropic).
    pub fn from_unit_box(rect: &BoundingBox) -> Self {
        Self::new(
            Matrix2::new(rect.width, 0.0, 0.0, rect.height),
            Vector2::new(rect.x, rect.y),
        )
    }

    pub fn linear(&self) -> &Matrix2<f32> {
        &self.linear
    }

    pub fn apply(&self, p: Point) -> Point {
        let v = self.linear * Vector2::new(p.x, p.y) + self.translation;
        Point::new(v.x, v.y)
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Affine {
    type Output = Affine;

    fn mul(self, rhs: Affine) -> Affine {
        Affine::new(
            self.linear * rhs.linear,
            self.linear * rhs.translation + self.translation,
        )
    }
}

impl From<Affine> for Homography {
    fn from(a: Affine) -> Self {
        let (l, t) = (a.linear, a.translation);
        Homography::from_rows([
            [l[(0, 0)], l[(0, 1)], t.x],
            [l[(1, 0)], l[(1, 1)], t.y],
            [0.0, 0.0, 1.0],
        ])
    }
}

impl PointTransform for Affine {
    type Error = Infallible;

    fn map_point(&self, p: Point) -> std::result::Result<Point, Infallible> {
        Ok(self.apply(p))
    }

    fn jacobian(&self, _p: Point) -> std::result::Result<Matrix2<f32>, Infallible> {
        Ok(self.linear)
    }
}

/// Unwrap a result whose error type is uninhabited.
pub(crate) fn infallible<T>(r: std::result::Result<T, Infallible>) -> T {
    match r {
        Ok(v) => v,
        Err(never) => match never {},
    }
}

/// Geometry that can be mapped through a [`PointTransform`].
pub trait Warp: Sized {
    fn warp<T: PointTransform>(&self, t: &T) -> std::result::Result<Self, T::Error>;
}

impl Warp for Point {
    fn warp<T: PointTransform>(&self, t: &T) -> std::result::Result<Self, T::Error> {
        t.map_point(*self)
    }
}

impl Warp for Vec<Point> {
    fn warp<T: PointTransform>(&self, t: &T) -> std::result::Result<Self, T::Error> {
        self.iter().map(|p| t.map_point(*p)).collect()
    }
}

impl Warp for Shape {
    fn warp<T: PointTransform>(&self, t: &T) -> std::result::Result<Self, T::Error> {
        Ok(Shape::new(self.points.warp(t)?))
    }
}

impl Warp for BoundingBox {
    fn warp<T: PointTransform>(&self, t: &T) -> std::result::Result<Self, T::Error> {
        let mut corners = [Point::zero(); 4];
        for (dst, src) in corners.iter_mut().zip(self.corners()) {
            *dst = t.map_point(src)?;
        }
        Ok(BoundingBox::enclosing(&corners).unwrap_or(*self))
    }
}

impl Warp for Circle {
    fn warp<T: PointTransform>(&self, t: &T) -> std::result::Result<Self, T::Error> {
        if self.is_degenerate() {
            return Ok(*self);
        }
        let j = t.jacobian(self.center)?;
        let scale = j.determinant().abs().sqrt();
        Ok(Circle::new(t.map_point(self.center)?, self.radius * scale))
    }
}

impl Warp for Ellipse {
    fn warp<T: PointTransform>(&self, t: &T) -> std::result::Result<Self, T::Error> {
        if self.is_degenerate() {
            return Ok(*self);
        }
        let center = t.map_point(self.center)?;
        let j = t.jacobian(self.center)?;
        Ok(warp_ellipse_axes(self, center, &j))
    }
}

impl<W: Warp> Warp for Field<W> {
    fn warp<T: PointTransform>(&self, t: &T) -> std::result::Result<Self, T::Error> {
        match self.get() {
            Some(v) => Ok(Field::new(v.warp(t)?)),
            None => Ok(Field::absent()),
        }
    }
}

/// Push the ellipse's parametric matrix `A = R(angle) diag(w/2, h/2)` through
/// the linear map `j` and read the axes back from `A' A'^T`.
///
/// The output keeps the labeling of the input: `width` is the axis closest to
/// the image of the input `width` axis, and `angle` is the direction of that
/// image, reported in `(-pi, pi]`.
fn warp_ellipse_axes(e: &Ellipse, center: Point, j: &Matrix2<f32>) -> Ellipse {
    let (s, c) = e.angle.sin_cos();
    let a = Matrix2::new(c, -s, s, c) * Matrix2::new(0.5 * e.width, 0.0, 0.0, 0.5 * e.height);
    let mapped = j * a;
    let m = mapped * mapped.transpose();

    let (p, q, r) = (m[(0, 0)], m[(0, 1)], m[(1, 1)]);
    let mean = 0.5 * (p + r);
    let spread = (0.25 * (p - r) * (p - r) + q * q).sqrt();
    let major = (mean + spread).max(0.0).sqrt();
    let minor = (mean - spread).max(0.0).sqrt();

    // Image of the input width axis.
    let d = Vector2::new(mapped[(0, 0)], mapped[(1, 0)]);
    let d_angle = d.y.atan2(d.x);

    // Circular within rounding: the axes are arbitrary, so follow `d`.
    let (width, height, axis_angle) = if spread <= 1e-5 * mean.abs() {
        (2.0 * major, 2.0 * minor, d_angle)
    } else {
        let theta = 0.5 * (2.0 * q).atan2(p - r);
        let (ts, tc) = theta.sin_cos();
        let along_major = (d.x * tc + d.y * ts).abs();
        let along_minor = (-d.x * ts + d.y * tc).abs();
        if along_major >= along_minor {
            (2.0 * major, 2.0 * minor, nearest_axis(theta, d_angle))
        } else {
            (2.0 * minor, 2.0 * major, nearest_axis(theta + FRAC_PI_2, d_angle))
        }
    };

    Ellipse::new(center, width, height, direction(axis_angle))
}

/// [`wrap_angle`], with values rounding onto `-pi` folded to `pi` so that a
/// half-turn always reads the same.
fn direction(a: f32) -> f32 {
    let w = wrap_angle(a);
    if w <= -PI + 1e-5 {
        PI
    } else {
        w
    }
}

/// The direction of the undirected axis `axis` that lies closest to `reference`.
fn nearest_axis(axis: f32, reference: f32) -> f32 {
    if wrap_angle(axis - reference).abs() <= FRAC_PI_2 {
        axis
    } else {
        axis + PI
    }
}

/// Wrap an angle into `(-pi, pi]`.
pub fn wrap_angle(a: f32) -> f32 {
    let mut w = a.rem_euclid(TAU);
    if w > PI {
        w -= TAU;
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3
    }

    fn projective() -> Homography {
        Homography::from_rows([[1.1, 0.05, 3.0], [-0.02, 0.95, -2.0], [0.0005, -0.0003, 1.0]])
    }

    #[test]
    fn point_homogeneous_division() {
        let h = Homography::from_rows([[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]]);
        let p = h.map_point(Point::new(3.0, 4.0)).unwrap();
        assert!(close(p, Point::new(3.0, 4.0)));
    }

    #[test]
    fn point_at_infinity_is_an_error() {
        let h = Homography::from_rows([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, -1.0]]);
        let err = h.map_point(Point::new(1.0, 5.0)).unwrap_err();
        assert!(matches!(err, Error::DomainTransform { .. }));
    }

    #[test]
    fn affine_matches_homography() {
        let a = Affine::translation(5.0, -1.0) * Affine::scaling(2.0);
        let h: Homography = a.into();
        let p = Point::new(1.5, 2.5);
        assert!(close(infallible(a.map_point(p)), h.map_point(p).unwrap()));
        assert!(close(a.apply(p), Point::new(8.0, 4.0)));
        assert!(h.is_affine());
        assert!(!projective().is_affine());
    }

    #[test]
    fn jacobian_matches_finite_difference() {
        let h = projective();
        let p = Point::new(40.0, 25.0);
        let j = h.jacobian(p).unwrap();
        let eps = 0.01;
        let px = h.map_point(Point::new(p.x + eps, p.y)).unwrap();
        let p0 = h.map_point(p).unwrap();
        assert!(((px.x - p0.x) / eps - j[(0, 0)]).abs() < 1e-2);
        assert!(((px.y - p0.y) / eps - j[(1, 0)]).abs() < 1e-2);
    }

    #[test]
    fn ellipse_identity_preserves_labeling() {
        let e = Ellipse::new(Point::new(10.0, 20.0), 4.0, 8.0, 2.5);
        let out = e.warp(&Homography::identity()).unwrap();
        assert!((out.width - 4.0).abs() < 1e-4);
        assert!((out.height - 8.0).abs() < 1e-4);
        assert!((out.angle - 2.5).abs() < 1e-4);
    }

    #[test]
    fn ellipse_under_rotation_and_scale() {
        let angle = 0.4_f32;
        let (s, c) = angle.sin_cos();
        let rot = Affine::new(Matrix2::new(2.0 * c, -2.0 * s, 2.0 * s, 2.0 * c), Vector2::zeros());
        let e = Ellipse::new(Point::new(1.0, 0.0), 6.0, 2.0, 0.1);
        let out = infallible(e.warp(&rot));
        assert!((out.width - 12.0).abs() < 1e-3);
        assert!((out.height - 4.0).abs() < 1e-3);
        assert!((out.angle - 0.5).abs() < 1e-4);
        assert!(close(out.center, Point::new(2.0 * c, 2.0 * s)));
    }

    #[test]
    fn degenerate_primitives_are_skipped() {
        let circle = Circle::new(Point::new(1.0, 1.0), 0.0);
        let ellipse = Ellipse::default();
        let h = Homography::scaling(3.0);
        assert_eq!(circle.warp(&h).unwrap(), circle);
        assert_eq!(ellipse.warp(&h).unwrap(), ellipse);
    }

    #[test]
    fn circle_radius_follows_scale() {
        let c = Circle::new(Point::new(2.0, 3.0), 1.5);
        let out = c.warp(&Homography::scaling(2.0)).unwrap();
        assert!((out.radius - 3.0).abs() < 1e-5);
        assert!(close(out.center, Point::new(4.0, 6.0)));
    }

    #[test]
    fn box_is_enclosed_after_mapping() {
        let b = BoundingBox::new(0.0, 0.0, 2.0, 1.0);
        let out = infallible(b.warp(&Affine::mirror_x(10.0)));
        assert_eq!(out, BoundingBox::new(8.0, 0.0, 2.0, 1.0));
    }

    #[test]
    fn absent_field_stays_absent() {
        let f: Field<Point> = Field::absent();
        assert!(!f.warp(&projective()).unwrap().has());
    }

    #[test]
    fn mirrored_ellipse_angle_stays_in_range() {
        let mirror = Affine::mirror_x(20.0);
        for angle in [0.0, FRAC_PI_2, -FRAC_PI_2, PI, 3.0 * PI] {
            for (w, h) in [(6.0, 4.0), (5.0, 5.0)] {
                let e = Ellipse::new(Point::new(8.0, 3.0), w, h, angle);
                let once = infallible(e.warp(&mirror));
                let twice = infallible(once.warp(&mirror));
                for out in [once.angle, twice.angle] {
                    assert!(out > -PI && out <= PI, "{angle} -> {out}");
                }
                assert!(
                    (twice.angle - direction(angle)).abs() < 1e-4,
                    "{angle} -> {}",
                    twice.angle
                );
            }
        }
    }

    #[test]
    fn angle_wrapping() {
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-5);
        assert!((wrap_angle(-0.5) + 0.5).abs() < 1e-6);
    }
}
