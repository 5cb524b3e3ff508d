use crate::transform::{Homography, PointTransform};
use crate::types::{BoundingBox, Point};

/// Trait for accessing pixel intensities from an image.
pub trait ImageAccess {
    /// Get the grayscale intensity at (x, y). Returns 0 for out-of-bounds pixels.
    fn get_pixel(&self, x: i32, y: i32) -> u8;

    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Full image extent as a box.
    fn bounds(&self) -> BoundingBox {
        BoundingBox::new(0.0, 0.0, self.width() as f32, self.height() as f32)
    }
}

/// An owned 8-bit grayscale raster.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl GrayImage {
    /// Wrap row-major pixel data. `data` must hold `width * height` bytes.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        GrayImage { data, width, height }
    }

    /// A constant-valued image.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self::new(vec![value; (width * height) as usize], width, height)
    }

    /// Build an image by evaluating `f(x, y)` in row-major order.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Self {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        GrayImage { data, width, height }
    }

    /// Offset of pixel (x, y) in the raw buffer, if it lies inside the image.
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        let x = u32::try_from(x).ok().filter(|&x| x < self.width)?;
        let y = u32::try_from(y).ok().filter(|&y| y < self.height)?;
        Some(y as usize * self.width as usize + x as usize)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Copy the integer pixel region covered by `roi`, clipped to the image.
    /// Returns `None` if nothing of `roi` lies inside.
    pub fn crop(&self, roi: &BoundingBox) -> Option<(GrayImage, BoundingBox)> {
        let clipped = self.bounds().intersect(roi)?;
        let x0 = clipped.x.floor() as u32;
        let y0 = clipped.y.floor() as u32;
        let x1 = (clipped.right().ceil() as u32).min(self.width);
        let y1 = (clipped.bottom().ceil() as u32).min(self.height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        let crop = GrayImage::from_fn(x1 - x0, y1 - y0, |x, y| {
            self.data[((y0 + y) * self.width + x0 + x) as usize]
        });
        let placed = BoundingBox::new(x0 as f32, y0 as f32, (x1 - x0) as f32, (y1 - y0) as f32);
        Some((crop, placed))
    }

    /// Horizontally mirrored copy.
    pub fn flopped(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            self.data[(y * self.width + (self.width - 1 - x)) as usize]
        })
    }
}

impl ImageAccess for GrayImage {
    fn get_pixel(&self, x: i32, y: i32) -> u8 {
        self.index(x, y).map_or(0, |i| self.data[i])
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

/// A full-resolution raster with a border, plus the region of it that holds
/// real image content.
#[derive(Debug, Clone)]
pub struct PaddedImage {
    pub image: GrayImage,
    pub roi: BoundingBox,
}

impl PaddedImage {
    pub fn new(image: GrayImage, roi: BoundingBox) -> Self {
        Self { image, roi }
    }

    /// Wrap an image that carries no padding.
    pub fn unpadded(image: GrayImage) -> Self {
        let roi = image.bounds();
        Self { image, roi }
    }
}

/// Samples a source image through a homography, so that a stage can read the
/// source as if it were at its own working resolution.
///
/// `to_source` maps view coordinates to source coordinates. `width` and
/// `height` are the nominal extent reported through [`ImageAccess`]; reads are
/// not clipped to it. Any view coordinate, negative ones included, reads
/// whatever the source holds at its image, and only reads that land outside
/// the source come back as 0.
pub struct WarpedView<'a, I: ImageAccess> {
    source: &'a I,
    to_source: Homography,
    width: u32,
    height: u32,
}

impl<'a, I: ImageAccess> WarpedView<'a, I> {
    pub fn new(source: &'a I, to_source: Homography, width: u32, height: u32) -> Self {
        Self {
            source,
            to_source,
            width,
            height,
        }
    }
}

impl<I: ImageAccess> ImageAccess for WarpedView<'_, I> {
    fn get_pixel(&self, x: i32, y: i32) -> u8 {
        match self.to_source.map_point(Point::new(x as f32, y as f32)) {
            Ok(p) => sample_bilinear(self.source, p.x, p.y).round() as u8,
            Err(_) => 0,
        }
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

/// Sample a pixel with bilinear interpolation for sub-pixel accuracy.
#[inline]
pub fn sample_bilinear<I: ImageAccess + ?Sized>(image: &I, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = image.get_pixel(x0, y0) as f32;
    let p10 = image.get_pixel(x0 + 1, y0) as f32;
    let p01 = image.get_pixel(x0, y0 + 1) as f32;
    let p11 = image.get_pixel(x0 + 1, y0 + 1) as f32;

    let top = p00 * (1.0 - fx) + p10 * fx;
    let bottom = p01 * (1.0 - fx) + p11 * fx;
    top * (1.0 - fy) + bottom * fy
}
