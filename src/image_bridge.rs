//! Glue between the carver and the `image` crate's buffer types.

use image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};

use crate::carver::Carver;
use crate::error::{Error, Result};
use crate::pixels::ColDepth;

impl Carver {
    /// Builds a carver from a decoded image, keeping its colour depth and
    /// channel count. Exotic variants are converted to 8-bit RGBA first.
    pub fn from_dynamic(img: &DynamicImage) -> Result<Carver> {
        let w = img.width() as usize;
        let h = img.height() as usize;
        match img {
            DynamicImage::ImageLuma8(b) => Carver::new_u8(b.as_raw().clone(), w, h, 1),
            DynamicImage::ImageLumaA8(b) => Carver::new_u8(b.as_raw().clone(), w, h, 2),
            DynamicImage::ImageRgb8(b) => Carver::new_u8(b.as_raw().clone(), w, h, 3),
            DynamicImage::ImageRgba8(b) => Carver::new_u8(b.as_raw().clone(), w, h, 4),
            DynamicImage::ImageLuma16(b) => Carver::new_u16(b.as_raw().clone(), w, h, 1),
            DynamicImage::ImageLumaA16(b) => Carver::new_u16(b.as_raw().clone(), w, h, 2),
            DynamicImage::ImageRgb16(b) => Carver::new_u16(b.as_raw().clone(), w, h, 3),
            DynamicImage::ImageRgba16(b) => Carver::new_u16(b.as_raw().clone(), w, h, 4),
            DynamicImage::ImageRgb32F(b) => Carver::new_f32(b.as_raw().clone(), w, h, 3),
            DynamicImage::ImageRgba32F(b) => Carver::new_f32(b.as_raw().clone(), w, h, 4),
            other => Carver::new_u8(other.to_rgba8().into_raw(), w, h, 4),
        }
    }

    /// Reads the current logical image out into an owned image buffer.
    pub fn to_dynamic(&mut self) -> Result<DynamicImage> {
        let w = self.width() as u32;
        let h = self.height() as u32;
        let ch = self.channels();
        self.scan_reset();
        let img = match (self.col_depth(), ch) {
            (ColDepth::U8, 1) => {
                let mut out = ImageBuffer::new(w, h);
                while let Some((x, y, now)) = self.scan_index() {
                    let buf = self.pixel_data().as_u8().unwrap();
                    out.put_pixel(x as u32, y as u32, Luma([buf[now]]));
                }
                DynamicImage::ImageLuma8(out)
            }
            (ColDepth::U8, 2) => {
                let mut out = ImageBuffer::new(w, h);
                while let Some((x, y, now)) = self.scan_index() {
                    let buf = self.pixel_data().as_u8().unwrap();
                    out.put_pixel(x as u32, y as u32, LumaA([buf[now * 2], buf[now * 2 + 1]]));
                }
                DynamicImage::ImageLumaA8(out)
            }
            (ColDepth::U8, 3) => {
                let mut out = ImageBuffer::new(w, h);
                while let Some((x, y, now)) = self.scan_index() {
                    let buf = self.pixel_data().as_u8().unwrap();
                    let p = now * 3;
                    out.put_pixel(x as u32, y as u32, Rgb([buf[p], buf[p + 1], buf[p + 2]]));
                }
                DynamicImage::ImageRgb8(out)
            }
            (ColDepth::U8, 4) => {
                let mut out = ImageBuffer::new(w, h);
                while let Some((x, y, now)) = self.scan_index() {
                    let buf = self.pixel_data().as_u8().unwrap();
                    let p = now * 4;
                    out.put_pixel(
                        x as u32,
                        y as u32,
                        Rgba([buf[p], buf[p + 1], buf[p + 2], buf[p + 3]]),
                    );
                }
                DynamicImage::ImageRgba8(out)
            }
            (ColDepth::U16, 1) => {
                let mut out = ImageBuffer::new(w, h);
                while let Some((x, y, now)) = self.scan_index() {
                    let buf = self.pixel_data().as_u16().unwrap();
                    out.put_pixel(x as u32, y as u32, Luma([buf[now]]));
                }
                DynamicImage::ImageLuma16(out)
            }
            (ColDepth::U16, 2) => {
                let mut out = ImageBuffer::new(w, h);
                while let Some((x, y, now)) = self.scan_index() {
                    let buf = self.pixel_data().as_u16().unwrap();
                    out.put_pixel(x as u32, y as u32, LumaA([buf[now * 2], buf[now * 2 + 1]]));
                }
                DynamicImage::ImageLumaA16(out)
            }
            (ColDepth::U16, 3) => {
                let mut out = ImageBuffer::new(w, h);
                while let Some((x, y, now)) = self.scan_index() {
                    let buf = self.pixel_data().as_u16().unwrap();
                    let p = now * 3;
                    out.put_pixel(x as u32, y as u32, Rgb([buf[p], buf[p + 1], buf[p + 2]]));
                }
                DynamicImage::ImageRgb16(out)
            }
            (ColDepth::U16, 4) => {
                let mut out = ImageBuffer::new(w, h);
                while let Some((x, y, now)) = self.scan_index() {
                    let buf = self.pixel_data().as_u16().unwrap();
                    let p = now * 4;
                    out.put_pixel(
                        x as u32,
                        y as u32,
                        Rgba([buf[p], buf[p + 1], buf[p + 2], buf[p + 3]]),
                    );
                }
                DynamicImage::ImageRgba16(out)
            }
            (ColDepth::F32, 3) => {
                let mut out = ImageBuffer::new(w, h);
                while let Some((x, y, now)) = self.scan_index() {
                    let buf = self.pixel_data().as_f32().unwrap();
                    let p = now * 3;
                    out.put_pixel(x as u32, y as u32, Rgb([buf[p], buf[p + 1], buf[p + 2]]));
                }
                DynamicImage::ImageRgb32F(out)
            }
            (ColDepth::F32, 4) => {
                let mut out = ImageBuffer::new(w, h);
                while let Some((x, y, now)) = self.scan_index() {
                    let buf = self.pixel_data().as_f32().unwrap();
                    let p = now * 4;
                    out.put_pixel(
                        x as u32,
                        y as u32,
                        Rgba([buf[p], buf[p + 1], buf[p + 2], buf[p + 3]]),
                    );
                }
                DynamicImage::ImageRgba32F(out)
            }
            (depth, ch) => {
                return Err(Error::invalid(format!(
                    "no image container for {:?} with {} channels",
                    depth, ch
                )))
            }
        };
        Ok(img)
    }
}

/// Resizes an image to the given dimensions with seam carving, preserving
/// its visually important content.
///
/// This is the one-call surface over [`Carver`]: it builds a carver with
/// the default energy (|∂brightness/∂x|), step 1 and no rigidity, resizes,
/// and reads the result back out.
///
/// ```no_run
/// let img = image::open("./my_image.jpg").unwrap();
/// let resized = multicarve::resize(&img, 100, 100).unwrap();
/// resized.save("./resized.jpg").unwrap();
/// ```
pub fn resize(img: &DynamicImage, width: u32, height: u32) -> Result<DynamicImage> {
    let mut carver = Carver::from_dynamic(img)?;
    carver.init(1, 0.0)?;
    carver.resize(width as usize, height as usize)?;
    carver.to_dynamic()
}
