//! Interleaved pixel storage at one of four channel depths, and the
//! normalised brightness/luma reads the energy computation is built on.

use num_traits::{Bounded, ToPrimitive};

use crate::error::{try_vec, Error, Result};

/// Colour depth of a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColDepth {
    U8,
    U16,
    F32,
    F64,
}

/// How the channels of a buffer are to be interpreted when reading
/// brightness. Subtractive types (CMY, CMYK) are complemented; types with an
/// alpha channel premultiply the read by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageType {
    Grey,
    GreyA,
    Rgb,
    Rgba,
    Cmy,
    Cmyk,
    Cmyka,
    /// A caller-described layout: any number of colour channels plus an
    /// optional alpha and an optional black (key) channel.
    Custom {
        alpha_channel: Option<usize>,
        black_channel: Option<usize>,
    },
}

impl ImageType {
    /// The conventional interpretation for a channel count, as used by the
    /// plain constructors: 1 grey, 2 grey+alpha, 3 RGB, 4 RGBA, 5 CMYKA;
    /// wider layouts start as all-colour custom profiles.
    pub fn default_for(channels: usize) -> Result<ImageType> {
        match channels {
            0 => Err(Error::invalid("a pixel needs at least one channel")),
            1 => Ok(ImageType::Grey),
            2 => Ok(ImageType::GreyA),
            3 => Ok(ImageType::Rgb),
            4 => Ok(ImageType::Rgba),
            5 => Ok(ImageType::Cmyka),
            _ => Ok(ImageType::Custom {
                alpha_channel: None,
                black_channel: None,
            }),
        }
    }

    /// Index of the alpha channel, if the type declares one.
    pub fn alpha_channel(&self) -> Option<usize> {
        match self {
            ImageType::GreyA => Some(1),
            ImageType::Rgba => Some(3),
            ImageType::Cmyka => Some(4),
            ImageType::Custom { alpha_channel, .. } => *alpha_channel,
            _ => None,
        }
    }

    fn black_channel(&self) -> Option<usize> {
        match self {
            ImageType::Cmyk | ImageType::Cmyka => Some(3),
            ImageType::Custom { black_channel, .. } => *black_channel,
            _ => None,
        }
    }

    /// Checks that the declared layout fits in `channels` interleaved values.
    /// Layouts the engine cannot read are rejected here rather than guessed
    /// at later.
    pub fn validate(&self, channels: usize) -> Result<()> {
        let required = match self {
            ImageType::Grey => 1,
            ImageType::GreyA => 2,
            ImageType::Rgb | ImageType::Cmy => 3,
            ImageType::Rgba | ImageType::Cmyk => 4,
            ImageType::Cmyka => 5,
            ImageType::Custom {
                alpha_channel,
                black_channel,
            } => {
                if let (Some(a), Some(b)) = (alpha_channel, black_channel) {
                    if a == b {
                        return Err(Error::invalid(
                            "custom image type: alpha and black channel coincide",
                        ));
                    }
                }
                let extra = alpha_channel.is_some() as usize + black_channel.is_some() as usize;
                if channels <= extra {
                    return Err(Error::invalid(
                        "custom image type leaves no colour channels",
                    ));
                }
                if let Some(a) = alpha_channel {
                    if *a >= channels {
                        return Err(Error::invalid("custom alpha channel out of range"));
                    }
                }
                if let Some(b) = black_channel {
                    if *b >= channels {
                        return Err(Error::invalid("custom black channel out of range"));
                    }
                }
                return Ok(());
            }
        };
        if channels < required {
            return Err(Error::invalid(format!(
                "image type {:?} needs {} channels, buffer has {}",
                self, required, channels
            )));
        }
        Ok(())
    }
}

/// The interleaved pixel array, one variant per colour depth.
#[derive(Debug, Clone)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

#[inline]
fn norm_int<T: ToPrimitive + Bounded>(v: T) -> f32 {
    v.to_f32().unwrap_or(0.0) / T::max_value().to_f32().unwrap_or(1.0)
}

impl PixelData {
    pub fn depth(&self) -> ColDepth {
        match self {
            PixelData::U8(_) => ColDepth::U8,
            PixelData::U16(_) => ColDepth::U16,
            PixelData::F32(_) => ColDepth::F32,
            PixelData::F64(_) => ColDepth::F64,
        }
    }

    /// Total number of interleaved subpixel values.
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::U16(v) => v.len(),
            PixelData::F32(v) => v.len(),
            PixelData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A zeroed buffer of the same depth with room for `len` subpixels.
    pub(crate) fn alloc_like(&self, len: usize) -> Result<PixelData> {
        Ok(match self {
            PixelData::U8(_) => PixelData::U8(try_vec(len)?),
            PixelData::U16(_) => PixelData::U16(try_vec(len)?),
            PixelData::F32(_) => PixelData::F32(try_vec(len)?),
            PixelData::F64(_) => PixelData::F64(try_vec(len)?),
        })
    }

    /// Normalised read of a single subpixel: integer depths map onto [0,1],
    /// float depths pass through.
    #[inline]
    pub(crate) fn get_norm(&self, i: usize) -> f32 {
        match self {
            PixelData::U8(v) => norm_int(v[i]),
            PixelData::U16(v) => norm_int(v[i]),
            PixelData::F32(v) => v[i],
            PixelData::F64(v) => v[i] as f32,
        }
    }

    /// Copies one subpixel into a buffer of the same depth.
    #[inline]
    pub(crate) fn copy_subpixel(&self, src: usize, dest: &mut PixelData, dst: usize) {
        match (self, dest) {
            (PixelData::U8(s), PixelData::U8(d)) => d[dst] = s[src],
            (PixelData::U16(s), PixelData::U16(d)) => d[dst] = s[src],
            (PixelData::F32(s), PixelData::F32(d)) => d[dst] = s[src],
            (PixelData::F64(s), PixelData::F64(d)) => d[dst] = s[src],
            _ => unreachable!("pixel depth mismatch"),
        }
    }

    /// Writes the average of two subpixels; integer depths average in
    /// widened arithmetic.
    #[inline]
    pub(crate) fn avg_subpixel(&self, a: usize, b: usize, dest: &mut PixelData, dst: usize) {
        match (self, dest) {
            (PixelData::U8(s), PixelData::U8(d)) => {
                d[dst] = ((s[a] as u32 + s[b] as u32) / 2) as u8
            }
            (PixelData::U16(s), PixelData::U16(d)) => {
                d[dst] = ((s[a] as u32 + s[b] as u32) / 2) as u16
            }
            (PixelData::F32(s), PixelData::F32(d)) => d[dst] = (s[a] + s[b]) / 2.0,
            (PixelData::F64(s), PixelData::F64(d)) => d[dst] = (s[a] + s[b]) / 2.0,
            _ => unreachable!("pixel depth mismatch"),
        }
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            PixelData::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<&[u16]> {
        match self {
            PixelData::U16(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            PixelData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            PixelData::F64(v) => Some(v),
            _ => None,
        }
    }
}

/// Normalised read of colour channel `channel` of the pixel starting at
/// subpixel `ind`, complemented for subtractive types and black-folded for
/// CMYK variants.
#[inline]
fn get_rgbcol(data: &PixelData, ind: usize, ty: &ImageType, channel: usize) -> f32 {
    match ty {
        ImageType::Rgb | ImageType::Rgba => data.get_norm(ind + channel),
        ImageType::Cmy => 1.0 - data.get_norm(ind + channel),
        ImageType::Cmyk | ImageType::Cmyka => {
            let black_fact = 1.0 - data.get_norm(ind + 3);
            black_fact * (1.0 - data.get_norm(ind + channel))
        }
        _ => unreachable!("not a colour image type"),
    }
}

fn read_custom(data: &PixelData, channels: usize, ty: &ImageType, now: usize) -> f32 {
    let alpha = ty.alpha_channel();
    let black = ty.black_channel();
    let col_channels = channels - alpha.is_some() as usize - black.is_some() as usize;

    let black_fact = match black {
        Some(b) => data.get_norm(now * channels + b),
        None => 0.0,
    };

    let mut sum = 0.0;
    for k in 0..channels {
        if Some(k) == alpha || Some(k) == black {
            continue;
        }
        let col = data.get_norm(now * channels + k);
        sum += 1.0 - (1.0 - col) * (1.0 - black_fact);
    }
    sum /= col_channels as f32;

    if black.is_some() {
        sum = 1.0 - sum;
    }
    sum
}

/// Mean-of-channels brightness of the pixel at physical index `now`,
/// premultiplied by alpha when the type declares one. Result in [0,1].
pub(crate) fn read_brightness(
    data: &PixelData,
    channels: usize,
    ty: &ImageType,
    now: usize,
) -> f32 {
    let ind = now * channels;
    let bright = match ty {
        ImageType::Grey | ImageType::GreyA => data.get_norm(ind),
        ImageType::Rgb | ImageType::Rgba | ImageType::Cmy | ImageType::Cmyk | ImageType::Cmyka => {
            (get_rgbcol(data, ind, ty, 0)
                + get_rgbcol(data, ind, ty, 1)
                + get_rgbcol(data, ind, ty, 2))
                / 3.0
        }
        ImageType::Custom { .. } => read_custom(data, channels, ty, now),
    };
    match ty.alpha_channel() {
        Some(a) => bright * data.get_norm(ind + a),
        None => bright,
    }
}

/// Rec. 709 luma of the pixel at physical index `now`; greyscale and custom
/// layouts fall back to the brightness read.
pub(crate) fn read_luma(data: &PixelData, channels: usize, ty: &ImageType, now: usize) -> f32 {
    let ind = now * channels;
    let bright = match ty {
        ImageType::Grey | ImageType::GreyA => data.get_norm(ind),
        ImageType::Rgb | ImageType::Rgba | ImageType::Cmy | ImageType::Cmyk | ImageType::Cmyka => {
            0.2126 * get_rgbcol(data, ind, ty, 0)
                + 0.7152 * get_rgbcol(data, ind, ty, 1)
                + 0.0722 * get_rgbcol(data, ind, ty, 2)
        }
        ImageType::Custom { .. } => read_custom(data, channels, ty, now),
    };
    match ty.alpha_channel() {
        Some(a) => bright * data.get_norm(ind + a),
        None => bright,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norm_reads_per_depth() {
        assert_eq!(PixelData::U8(vec![0, 255, 51]).get_norm(1), 1.0);
        assert!((PixelData::U8(vec![51]).get_norm(0) - 0.2).abs() < 1e-6);
        assert_eq!(PixelData::U16(vec![0xFFFF]).get_norm(0), 1.0);
        assert_eq!(PixelData::F32(vec![0.25]).get_norm(0), 0.25);
        assert_eq!(PixelData::F64(vec![0.5]).get_norm(0), 0.5);
    }

    #[test]
    fn grey_brightness_is_the_channel() {
        let data = PixelData::U8(vec![128]);
        let b = read_brightness(&data, 1, &ImageType::Grey, 0);
        assert!((b - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn rgba_brightness_premultiplies_alpha() {
        let data = PixelData::U8(vec![255, 255, 255, 127]);
        let b = read_brightness(&data, 4, &ImageType::Rgba, 0);
        assert!((b - 127.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn cmy_is_complemented() {
        let data = PixelData::U8(vec![0, 0, 0]);
        let b = read_brightness(&data, 3, &ImageType::Cmy, 0);
        assert!((b - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cmyk_black_folds_in() {
        // full black key drives brightness to zero whatever the colours say
        let data = PixelData::U8(vec![0, 0, 0, 255]);
        let b = read_brightness(&data, 4, &ImageType::Cmyk, 0);
        assert!(b.abs() < 1e-6);
    }

    #[test]
    fn luma_weights_green_highest() {
        let g = PixelData::U8(vec![0, 255, 0]);
        let r = PixelData::U8(vec![255, 0, 0]);
        let lg = read_luma(&g, 3, &ImageType::Rgb, 0);
        let lr = read_luma(&r, 3, &ImageType::Rgb, 0);
        assert!(lg > lr);
        assert!((lg - 0.7152).abs() < 1e-4);
    }

    #[test]
    fn custom_type_validation() {
        let ty = ImageType::Custom {
            alpha_channel: Some(4),
            black_channel: Some(3),
        };
        assert!(ty.validate(5).is_ok());
        assert!(ty.validate(4).is_err());
        let clash = ImageType::Custom {
            alpha_channel: Some(1),
            black_channel: Some(1),
        };
        assert!(clash.validate(3).is_err());
    }

    #[test]
    fn integer_average_widens() {
        let src = PixelData::U8(vec![255, 255]);
        let mut dst = PixelData::U8(vec![0]);
        src.avg_subpixel(0, 1, &mut dst, 0);
        assert_eq!(dst.as_u8().unwrap()[0], 255);
    }
}
