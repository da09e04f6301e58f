use crate::error::{SimError, SimResult};
use crate::grid::GridView;
use std::path::Path;

/// Packed `0xAARRGGBB` pixel; BGRA byte order on little-endian hosts.
pub type Color = u32;

pub const OPAQUE_BLACK: Color = 0xff00_0000;

pub fn rgb(r: u8, g: u8, b: u8) -> Color {
    OPAQUE_BLACK | (r as u32) << 16 | (g as u32) << 8 | b as u32
}

pub fn alpha(color: Color) -> u8 {
    (color >> 24) as u8
}

fn channel(color: Color, shift: u32) -> u32 {
    (color >> shift) & 0xff
}

/// Source-over blend of `source` onto `target`.
pub fn blend_color(target: Color, source: Color) -> Color {
    let a = channel(source, 24);
    let inv = 255 - a;
    let mix = |shift: u32| (channel(source, shift) * a + channel(target, shift) * inv) / 255;
    let out_alpha = a + channel(target, 24) * inv / 255;
    out_alpha << 24 | mix(16) << 16 | mix(8) << 8 | mix(0)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    stride: usize,
    pixels: Vec<Color>,
}

impl Image {
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0, "width must be > 0");
        assert!(height > 0, "height must be > 0");
        Self {
            width,
            height,
            stride: width,
            pixels: vec![0; width * height],
        }
    }

    pub fn from_pixels(width: usize, height: usize, pixels: Vec<Color>) -> Self {
        assert_eq!(pixels.len(), width * height, "image pixel count mismatch");
        Self {
            width,
            height,
            stride: width,
            pixels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> Color {
        debug_assert!(x < self.width && y < self.height);
        self.pixels[x + y * self.stride]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, color: Color) {
        debug_assert!(x < self.width && y < self.height);
        self.pixels[x + y * self.stride] = color;
    }

    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    /// Pixel buffer in native byte order.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    pub fn clear(&mut self, color: Color) {
        self.pixels.fill(color);
    }
}

/// Reads a raw BGRA dump of exactly `width * height` pixels.
pub fn load_bgra(path: impl AsRef<Path>, width: usize, height: usize) -> SimResult<Image> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let expected = width * height * 4;
    if bytes.len() != expected {
        return Err(SimError::ImageSize {
            path: path.to_path_buf(),
            expected,
            actual: bytes.len(),
        });
    }
    let pixels = bytemuck::allocation::pod_collect_to_vec::<u8, u32>(&bytes);
    log::debug!("loaded {}x{} image from {}", width, height, path.display());
    Ok(Image::from_pixels(width, height, pixels))
}

/// Grayscale render of a scalar field; values map from [0, 1] to 0..=255.
pub fn draw_density(image: &mut Image, density: GridView<'_>) -> SimResult<()> {
    if density.width() > image.width() || density.height() > image.height() {
        return Err(SimError::DimensionMismatch {
            what: "density render target",
            expected: (density.width(), density.height()),
            actual: image.shape(),
        });
    }
    for y in 0..density.height() {
        for x in 0..density.width() {
            let intensity = (255.0 * density.get(x, y)).clamp(0.0, 255.0) as u8;
            image.set_pixel(x, y, rgb(intensity, intensity, intensity));
        }
    }
    Ok(())
}

/// Nearest-neighbour resample of `source` onto the whole of `target`.
pub fn scale(target: &mut Image, source: &Image) {
    for ty in 0..target.height() {
        let sy = ty * source.height() / target.height();
        for tx in 0..target.width() {
            let sx = tx * source.width() / target.width();
            target.set_pixel(tx, ty, source.pixel(sx, sy));
        }
    }
}

/// Alpha-blends `source` onto `target` at `position`, clipped to the target.
pub fn blit(target: &mut Image, source: &Image, position: (usize, usize)) {
    let (px, py) = position;
    let rows = source.height().min(target.height().saturating_sub(py));
    let cols = source.width().min(target.width().saturating_sub(px));
    for sy in 0..rows {
        for sx in 0..cols {
            let tc = target.pixel(sx + px, sy + py);
            let sc = source.pixel(sx, sy);
            target.set_pixel(sx + px, sy + py, blend_color(tc, sc));
        }
    }
}

pub fn center(outer: (usize, usize), inner: (usize, usize)) -> (usize, usize) {
    (
        outer.0.saturating_sub(inner.0) / 2,
        outer.1.saturating_sub(inner.1) / 2,
    )
}
