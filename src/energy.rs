//! Energy functions: built-in finite-difference gradients and the
//! user-supplied variant reading through a small square window.

use smallvec::SmallVec;

/// Aggregator turning the two partial derivatives into a scalar energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradKind {
    /// √(gx² + gy²)
    Norm,
    /// |gx| + |gy|
    SumAbs,
    /// |gx| — the default, and usually the best seam guide.
    XAbs,
    /// Constant zero; seams are then driven by bias and rigidity alone.
    Null,
}

impl GradKind {
    #[inline]
    pub(crate) fn apply(self, gx: f32, gy: f32) -> f32 {
        match self {
            GradKind::Norm => (gx * gx + gy * gy).sqrt(),
            GradKind::SumAbs => gx.abs() + gy.abs(),
            GradKind::XAbs => gx.abs(),
            GradKind::Null => 0.0,
        }
    }
}

/// Which per-pixel scalar the energy function reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    /// Mean of the colour channels (alpha-premultiplied).
    Brightness,
    /// Rec. 709 luma.
    Luma,
}

/// A `(2·radius+1)²` block of normalised reads centred on the pixel a custom
/// energy function is being evaluated for. Cells outside the live image
/// read as 0.
pub struct ReaderWindow {
    radius: usize,
    side: usize,
    buf: SmallVec<[f32; 9]>,
}

impl ReaderWindow {
    pub(crate) fn new(radius: usize) -> ReaderWindow {
        let side = 2 * radius + 1;
        ReaderWindow {
            radius,
            side,
            buf: smallvec::smallvec![0.0; side * side],
        }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Read at offset (dx, dy) from the centre; |dx|, |dy| ≤ radius.
    #[inline]
    pub fn read(&self, dx: isize, dy: isize) -> f32 {
        let r = self.radius as isize;
        debug_assert!(dx.abs() <= r && dy.abs() <= r);
        self.buf[((dy + r) as usize) * self.side + (dx + r) as usize]
    }

    /// Refills the window around logical (x, y) of a w×h image.
    pub(crate) fn fill<R>(&mut self, x: usize, y: usize, w: usize, h: usize, read: R)
    where
        R: Fn(usize, usize) -> f32,
    {
        let r = self.radius as isize;
        for dy in -r..=r {
            for dx in -r..=r {
                let xx = x as isize + dx;
                let yy = y as isize + dy;
                let v = if xx < 0 || xx >= w as isize || yy < 0 || yy >= h as isize {
                    0.0
                } else {
                    read(xx as usize, yy as usize)
                };
                self.buf[((dy + r) as usize) * self.side + (dx + r) as usize] = v;
            }
        }
    }
}

/// Signature of a user-supplied energy function: logical coordinates, live
/// image extent, and the filled reading window.
pub type CustomEnergyFn = dyn Fn(usize, usize, usize, usize, &ReaderWindow) -> f32;

/// The carver's per-pixel energy, selectable at runtime.
pub enum EnergyFn {
    /// Finite-difference gradient fed to an aggregator.
    Gradient { grad: GradKind, reader: ReadKind },
    /// User callback with a radius-R reading window.
    Custom {
        func: Box<CustomEnergyFn>,
        radius: usize,
        reader: ReadKind,
    },
}

impl Default for EnergyFn {
    fn default() -> EnergyFn {
        EnergyFn::Gradient {
            grad: GradKind::XAbs,
            reader: ReadKind::Brightness,
        }
    }
}

impl EnergyFn {
    pub fn custom<F>(func: F, radius: usize, reader: ReadKind) -> EnergyFn
    where
        F: Fn(usize, usize, usize, usize, &ReaderWindow) -> f32 + 'static,
    {
        EnergyFn::Custom {
            func: Box::new(func),
            radius,
            reader,
        }
    }

    pub(crate) fn reader(&self) -> ReadKind {
        match self {
            EnergyFn::Gradient { reader, .. } => *reader,
            EnergyFn::Custom { reader, .. } => *reader,
        }
    }
}

/// Discrete derivatives at logical (x, y): centred differences divided by 2
/// in the interior, one-sided at the edges.
pub(crate) fn finite_diff<R>(x: usize, y: usize, w: usize, h: usize, read: R) -> (f32, f32)
where
    R: Fn(usize, usize) -> f32,
{
    let gy = if y == 0 {
        read(x, y + 1) - read(x, y)
    } else if y < h - 1 {
        (read(x, y + 1) - read(x, y - 1)) / 2.0
    } else {
        read(x, y) - read(x, y - 1)
    };

    let gx = if x == 0 {
        read(x + 1, y) - read(x, y)
    } else if x < w - 1 {
        (read(x + 1, y) - read(x - 1, y)) / 2.0
    } else {
        read(x, y) - read(x - 1, y)
    };

    (gx, gy)
}
