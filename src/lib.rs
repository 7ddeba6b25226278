//! ## Content-aware multisize image resizing
//!
//! This crate implements seam carving with a twist: instead of producing a
//! single resized image, a [`Carver`] computes a per-pixel *visibility map*
//! recording the order in which low-energy seams would be removed (or,
//! after enlargement, inserted). Once built, the map makes any width in the
//! scheduled range reachable in constant time, can be serialised with
//! [`VMap`] and reloaded later, and can drive auxiliary image layers
//! attached to the primary through the exact same seam schedule.
//!
//! The one-call entry point is [`resize`]:
//!
//! ```no_run
//! let img = image::open("./my_image.jpg").unwrap();
//! let resized = multicarve::resize(&img, 100, 100).unwrap(); // 100x100 version
//! resized.save("./resized.jpg").unwrap();
//! ```
//!
//! The full surface is on [`Carver`]: per-depth constructors, bias masks
//! that steer seams toward or away from regions, a rigidity cost that
//! penalises zig-zagging seams, progress callbacks and cooperative
//! cancellation.

pub use crate::carver::{Carver, ResizeOrder};
pub use crate::energy::{EnergyFn, GradKind, ReadKind, ReaderWindow};
pub use crate::error::{Error, Result};
pub use crate::image_bridge::resize;
pub use crate::pixels::{ColDepth, ImageType, PixelData};
pub use crate::progress::Progress;
pub use crate::vmap::VMap;

mod carver;
mod cursor;
mod energy;
mod error;
mod image_bridge;
mod matrix;
mod pixels;
mod progress;
mod seam_finder;
mod vmap;

#[cfg(test)]
mod tests {
    use image::GrayImage;

    use crate::resize;

    #[test]
    fn shrinking_removes_the_flat_region() {
        // the three zero columns are the cheapest; shrinking by one must
        // leave the contrasted pixels untouched
        let img = GrayImage::from_raw(
            5,
            2,
            vec![
                9, 0, 0, 0, 9, //
                7, 0, 0, 0, 7,
            ],
        )
        .unwrap();
        let resized = resize(&image::DynamicImage::ImageLuma8(img), 4, 2).unwrap();
        let raw = resized.into_luma8().into_raw();
        assert_eq!(raw.len(), 8);
        assert_eq!(raw[0], 9);
        assert_eq!(raw[3], 9);
        assert_eq!(raw[4], 7);
        assert_eq!(raw[7], 7);
    }
}
