//! The carver: one multisize representation of one image.
//!
//! A carver owns its pixel buffer plus every derived map. Carving never
//! touches the pixels; it reorders the raw index map and stamps the
//! visibility map, so that any width in the scheduled range can be produced
//! in O(1) by moving the logical width. Inflation extends the same
//! visibility map with seam-insertion ranks, flattening bakes the current
//! logical image into a new baseline, and transposition reuses the whole
//! vertical-seam machinery for height changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use smallvec::SmallVec;

use crate::cursor::Cursor;
use crate::energy::{finite_diff, EnergyFn, ReadKind, ReaderWindow};
use crate::error::{try_vec, Error, Result};
use crate::matrix::RawMap;
use crate::pixels::{read_brightness, read_luma, ColDepth, ImageType, PixelData};
use crate::progress::Progress;
use crate::seam_finder::{MinpathCtx, SeamFinder};
use crate::vmap::VMap;

#[inline]
fn read_at(rgb: &PixelData, channels: usize, ty: &ImageType, kind: ReadKind, now: usize) -> f32 {
    match kind {
        ReadKind::Brightness => read_brightness(rgb, channels, ty, now),
        ReadKind::Luma => read_luma(rgb, channels, ty, now),
    }
}

/// Which axis a two-dimensional resize carves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOrder {
    HorizontalFirst,
    VerticalFirst,
}

pub struct Carver {
    // three width/height pairs: buffer extent, extent at the time the
    // current visibility map was built, and the logical extent
    w0: usize,
    h0: usize,
    w_start: usize,
    h_start: usize,
    w: usize,
    h: usize,

    /// `w0 - w + 1`; pixels with a rank below this are invisible.
    level: usize,
    /// Depth of the schedule computed so far.
    max_level: usize,

    channels: usize,
    transposed: bool,
    /// Set by `init`; only an active carver can build maps.
    active: bool,

    rgb: PixelData,
    image_type: ImageType,

    /// Per-pixel removal/insertion ranks. Only the root of an attached
    /// family owns a non-empty buffer; auxiliaries are driven with the
    /// root's.
    vs: Vec<i32>,

    en: Vec<f64>,
    bias: Vec<f64>,
    rigidity_mask: Option<Vec<f64>>,
    raw: Option<RawMap>,
    finder: Option<SeamFinder>,

    delta_x: usize,
    rigidity: f64,
    /// `rigidity · |dx|^1.5 / h`, indexed by `dx + delta_x`.
    rigidity_map: SmallVec<[f64; 8]>,
    energy: EnergyFn,
    resize_order: ResizeOrder,
    lr_switch_frequency: usize,
    dump_vmaps: bool,

    cursor: Cursor,
    /// Line readout buffer, `w0 · channels` subpixels.
    ro_buffer: PixelData,
    progress: Progress,
    cancel: Arc<AtomicBool>,

    attached: Vec<Carver>,
    flushed: Vec<VMap>,
}

impl Carver {
    fn new_common(
        rgb: PixelData,
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Carver> {
        if width == 0 || height == 0 || channels == 0 {
            return Err(Error::invalid("carver dimensions must be positive"));
        }
        if rgb.len() != width * height * channels {
            return Err(Error::invalid(format!(
                "buffer holds {} values, expected {}x{}x{}",
                rgb.len(),
                width,
                height,
                channels
            )));
        }
        let image_type = ImageType::default_for(channels)?;
        let vs = try_vec(width * height)?;
        let ro_buffer = rgb.alloc_like(width * channels)?;
        Ok(Carver {
            w0: width,
            h0: height,
            w_start: width,
            h_start: height,
            w: width,
            h: height,
            level: 1,
            max_level: 1,
            channels,
            transposed: false,
            active: false,
            rgb,
            image_type,
            vs,
            en: Vec::new(),
            bias: Vec::new(),
            rigidity_mask: None,
            raw: None,
            finder: None,
            delta_x: 1,
            rigidity: 0.0,
            rigidity_map: SmallVec::new(),
            energy: EnergyFn::default(),
            resize_order: ResizeOrder::HorizontalFirst,
            lr_switch_frequency: 0,
            dump_vmaps: false,
            cursor: Cursor::default(),
            ro_buffer,
            progress: Progress::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            attached: Vec::new(),
            flushed: Vec::new(),
        })
    }

    /// Adopts an interleaved 8-bit buffer.
    pub fn new_u8(buffer: Vec<u8>, width: usize, height: usize, channels: usize) -> Result<Carver> {
        Carver::new_common(PixelData::U8(buffer), width, height, channels)
    }

    /// Adopts an interleaved 16-bit buffer.
    pub fn new_u16(
        buffer: Vec<u16>,
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Carver> {
        Carver::new_common(PixelData::U16(buffer), width, height, channels)
    }

    /// Adopts an interleaved buffer of 32-bit floats in [0, 1].
    pub fn new_f32(
        buffer: Vec<f32>,
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Carver> {
        Carver::new_common(PixelData::F32(buffer), width, height, channels)
    }

    /// Adopts an interleaved buffer of 64-bit floats in [0, 1].
    pub fn new_f64(
        buffer: Vec<f64>,
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Carver> {
        Carver::new_common(PixelData::F64(buffer), width, height, channels)
    }

    /// Overrides the channel interpretation inferred from the channel count.
    pub fn set_image_type(&mut self, image_type: ImageType) -> Result<()> {
        image_type.validate(self.channels)?;
        self.image_type = image_type;
        Ok(())
    }

    /// Allocates the derived maps and the rigidity lookup. Must be the first
    /// lifecycle event after construction; `rigidity` must be non-negative.
    pub fn init(&mut self, delta_x: usize, rigidity: f64) -> Result<()> {
        if self.active {
            return Err(Error::invalid("carver is already initialised"));
        }
        if self.max_level > 1 {
            return Err(Error::invalid("init must precede any loaded schedule"));
        }
        if !(rigidity >= 0.0) {
            return Err(Error::invalid("rigidity must be non-negative"));
        }

        self.en = try_vec(self.w * self.h)?;
        self.bias = try_vec(self.w * self.h)?;
        self.finder = Some(SeamFinder::new(self.w * self.h, self.h)?);
        self.raw = Some(RawMap::identity(self.w_start, self.h_start)?);

        self.delta_x = delta_x;
        self.rigidity = rigidity;
        self.rigidity_map = Self::make_rigidity_map(delta_x, rigidity, self.h);

        self.active = true;
        Ok(())
    }

    fn make_rigidity_map(delta_x: usize, rigidity: f64, h: usize) -> SmallVec<[f64; 8]> {
        let mut map = SmallVec::with_capacity(2 * delta_x + 1);
        for dx in -(delta_x as isize)..=delta_x as isize {
            map.push(rigidity * (dx.abs() as f64).powf(1.5) / h as f64);
        }
        map
    }

    /// Binds an auxiliary carver of identical buffer dimensions to this one:
    /// from now on it follows this carver's seam schedule. The auxiliary
    /// must not be initialised, and attachment must happen before any maps
    /// are built.
    pub fn attach(&mut self, mut aux: Carver) -> Result<()> {
        if aux.w0 != self.w0 || aux.h0 != self.h0 {
            return Err(Error::invalid(format!(
                "attach size mismatch: {}x{} vs {}x{}",
                aux.w0, aux.h0, self.w0, self.h0
            )));
        }
        if aux.active || !aux.attached.is_empty() {
            return Err(Error::invalid(
                "auxiliary carver must be fresh (not initialised, nothing attached)",
            ));
        }
        if self.max_level > 1 {
            return Err(Error::invalid("attach must precede map building"));
        }
        // the root's schedule is authoritative from here on
        aux.vs = Vec::new();
        aux.transposed = self.transposed;
        self.attached.push(aux);
        Ok(())
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    /* geometry */

    /// Current logical width, in the caller's orientation.
    pub fn width(&self) -> usize {
        if self.transposed {
            self.h
        } else {
            self.w
        }
    }

    /// Current logical height, in the caller's orientation.
    pub fn height(&self) -> usize {
        if self.transposed {
            self.w
        } else {
            self.h
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn col_depth(&self) -> ColDepth {
        self.rgb.depth()
    }

    pub fn image_type(&self) -> &ImageType {
        &self.image_type
    }

    fn set_width_internal(&mut self, w1: usize) {
        debug_assert!(w1 <= self.w0);
        debug_assert!(w1 + self.max_level >= self.w_start + 1);
        self.w = w1;
        self.level = self.w0 - w1 + 1;
    }

    /* attribute setters */

    /// Selects the energy function driving seam extraction.
    pub fn set_energy_fn(&mut self, energy: EnergyFn) {
        self.energy = energy;
    }

    pub fn set_resize_order(&mut self, order: ResizeOrder) {
        self.resize_order = order;
    }

    /// With `f > 0`, the seam tie-break side is toggled `f` times over a
    /// build, rebuilding the minpath map at each toggle. Spreads the
    /// removal bias evenly over both sides on large shrinks.
    pub fn set_side_switch_frequency(&mut self, f: usize) {
        self.lr_switch_frequency = f;
    }

    /// Makes every axis of a `resize` push a visibility-map snapshot,
    /// retrievable through [`dumped_vmaps`](Carver::dumped_vmaps).
    pub fn set_dump_vmaps(&mut self) {
        self.dump_vmaps = true;
    }

    pub fn set_progress(&mut self, progress: Progress) {
        self.progress = progress;
    }

    pub fn progress_mut(&mut self) -> &mut Progress {
        &mut self.progress
    }

    /// The cooperative cancellation token. Storing `true` makes the running
    /// operation return [`Error::Cancelled`] at its next poll; the carver
    /// stays consistent and may be resized again after the flag is cleared.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn cancel_point(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn dumped_vmaps(&self) -> &[VMap] {
        &self.flushed
    }

    pub fn take_dumped_vmaps(&mut self) -> Vec<VMap> {
        std::mem::take(&mut self.flushed)
    }

    /* energy map */

    fn compute_e(&mut self, x: usize, y: usize) {
        let raw = self.raw.as_ref().expect("carver is active");
        let rgb = &self.rgb;
        let ty = &self.image_type;
        let ch = self.channels;
        let data = raw[(y, x)];

        let e = match &self.energy {
            EnergyFn::Gradient { grad, reader } => {
                let kind = *reader;
                let (gx, gy) = finite_diff(x, y, self.w, self.h, |xx, yy| {
                    read_at(rgb, ch, ty, kind, raw[(yy, xx)])
                });
                grad.apply(gx, gy) as f64
            }
            EnergyFn::Custom {
                func,
                radius,
                reader,
            } => {
                let kind = *reader;
                let mut window = ReaderWindow::new(*radius);
                window.fill(x, y, self.w, self.h, |xx, yy| {
                    read_at(rgb, ch, ty, kind, raw[(yy, xx)])
                });
                func(x, y, self.w, self.h, &window) as f64
            }
        };

        self.en[data] = e + self.bias[data] / self.w_start as f64;
    }

    fn build_emap(&mut self) -> Result<()> {
        for y in 0..self.h {
            self.cancel_point()?;
            for x in 0..self.w {
                self.compute_e(x, y);
            }
        }
        Ok(())
    }

    /// After a carve only the cells whose finite-difference neighbours
    /// changed need recomputing: the ±δx band around the seam column of
    /// each row.
    fn update_emap(&mut self) -> Result<()> {
        self.cancel_point()?;
        let seam_x: Vec<usize> = self.finder.as_ref().expect("active").vpath_x.clone();
        for y in 0..self.h {
            let x = seam_x[y];
            let x_min = x.saturating_sub(self.delta_x);
            let x_max = ((x + self.delta_x) as isize - 1).min(self.w as isize - 1);
            let mut x1 = x_min as isize;
            while x1 <= x_max {
                self.compute_e(x1 as usize, y);
                x1 += 1;
            }
        }
        Ok(())
    }

    /* minpath map */

    fn build_mmap(&mut self) -> Result<()> {
        self.cancel_point()?;
        let raw = self.raw.as_ref().expect("active");
        debug_assert_eq!(raw.live_width(), self.w);
        let ctx = MinpathCtx {
            delta_x: self.delta_x,
            rigidity: self.rigidity,
            rigidity_map: &self.rigidity_map,
            rigidity_mask: self.rigidity_mask.as_deref(),
        };
        let finder = self.finder.as_mut().expect("active");
        finder.build_mmap(&ctx, raw, &self.en, self.h);
        Ok(())
    }

    fn update_mmap(&mut self) -> Result<()> {
        self.cancel_point()?;
        let raw = self.raw.as_ref().expect("active");
        let ctx = MinpathCtx {
            delta_x: self.delta_x,
            rigidity: self.rigidity,
            rigidity_map: &self.rigidity_map,
            rigidity_mask: self.rigidity_mask.as_deref(),
        };
        let finder = self.finder.as_mut().expect("active");
        finder.update_mmap(&ctx, raw, &self.en, self.h);
        Ok(())
    }

    /* visibility map */

    /// Builds the seam schedule up to `depth` levels. Progressive: levels
    /// already computed are never recomputed.
    fn build_maps(&mut self, depth: usize) -> Result<()> {
        debug_assert!(depth >= 1);
        if depth > self.w_start {
            return Err(Error::invalid(
                "resize step too large: flatten between enlargements beyond twice the width",
            ));
        }
        if depth <= self.max_level {
            return Ok(());
        }
        if !self.active {
            return Err(Error::invalid("carver must be initialised first"));
        }

        // resume from the narrowest width reached so far
        self.set_width_internal(self.w_start - self.max_level + 1);

        self.build_emap()?;
        self.build_mmap()?;
        self.build_vsmap(depth)
    }

    fn build_vsmap(&mut self, depth: usize) -> Result<()> {
        debug!("building visibility map to depth {}", depth);
        let max_level = self.max_level;
        let span = depth - max_level;
        let update_step = ((span as f64 * self.progress.update_step) as usize).max(1);
        let lr_switch_interval = if self.lr_switch_frequency > 0 {
            (depth - max_level - 1) / self.lr_switch_frequency + 1
        } else {
            0
        };

        for l in max_level..depth {
            self.cancel_point()?;
            if (l - max_level) % update_step == 0 {
                self.progress
                    .fire_update((l - max_level) as f64 / span as f64);
            }

            // extract the cheapest vertical seam and stamp it
            {
                let raw = self.raw.as_ref().expect("active");
                let finder = self.finder.as_mut().expect("active");
                finder.build_vpath(self.delta_x, raw, self.h);
                let rank = (l + max_level - 1) as i32;
                for y in 0..self.h {
                    debug_assert_eq!(self.vs[finder.vpath[y]], 0);
                    self.vs[finder.vpath[y]] = rank;
                }
            }

            // make the seam invisible
            self.level += 1;
            self.w -= 1;
            {
                let finder = self.finder.as_ref().expect("active");
                self.raw.as_mut().expect("active").carve(&finder.vpath_x);
            }

            if self.w > 1 {
                self.update_emap()?;
                if lr_switch_interval > 0
                    && (l - max_level + lr_switch_interval / 2) % lr_switch_interval == 0
                {
                    // the tie-break change invalidates the no-difference
                    // shortcut, so the map is rebuilt from scratch
                    self.finder.as_mut().expect("active").leftright ^= true;
                    self.build_mmap()?;
                } else {
                    self.update_mmap()?;
                }
            } else {
                self.finish_vsmap();
            }
        }

        self.inflate(depth - 1)?;

        self.set_width_internal(self.w_start);
        for aux in &mut self.attached {
            aux.set_width_internal(aux.w_start);
        }
        Ok(())
    }

    /// Stamps the single remaining column with rank `w0` so the schedule
    /// covers every pixel.
    fn finish_vsmap(&mut self) {
        debug_assert_eq!(self.w, 1);
        let rank = self.w0 as i32;
        self.cursor.reset(&self.vs, self.level);
        for _ in 0..self.h {
            debug_assert_eq!(self.vs[self.cursor.now], 0);
            self.vs[self.cursor.now] = rank;
            self.cursor.next(self.w, self.h, &self.vs, self.level);
        }
        self.cursor.reset(&self.vs, self.level);
    }

    /* inflation */

    /// Embeds enlargement information for the `l` seams scheduled by this
    /// build: every such seam pixel is split into itself plus an averaged
    /// duplicate, and all ranks are renumbered so removal and insertion
    /// coexist in one map.
    fn inflate(&mut self, l: usize) -> Result<()> {
        debug!("inflating to level {}", l + 1);
        {
            let vs = &self.vs;
            for aux in &mut self.attached {
                aux.inflate_inner(l, Some(vs))?;
            }
        }
        self.inflate_inner(l, None)
    }

    fn inflate_inner(&mut self, l: usize, shared_vs: Option<&[i32]>) -> Result<()> {
        debug_assert!(l + 1 > self.max_level);
        let max_level = self.max_level;
        let is_root = shared_vs.is_none();

        // include every scheduled pixel in the walk
        self.set_width_internal(self.w0);

        let w1 = self.w0 + l - max_level + 1;
        let ch = self.channels;
        let mut new_rgb = self.rgb.alloc_like(w1 * self.h0 * ch)?;
        let mut new_vs: Vec<i32> = if is_root { try_vec(w1 * self.h0)? } else { Vec::new() };
        let mut new_bias: Vec<f64> = if self.active {
            try_vec(w1 * self.h0)?
        } else {
            Vec::new()
        };
        let mut new_rigmask: Option<Vec<f64>> = match (&self.rigidity_mask, self.active) {
            (Some(_), true) => Some(try_vec(w1 * self.h0)?),
            _ => None,
        };

        {
            let vs_src: &[i32] = match shared_vs {
                Some(v) => v,
                None => &self.vs,
            };
            self.cursor.reset(vs_src, self.level);
            let mut z0 = 0;
            let mut x = 0;
            let mut y = 0;
            for _ in 0..self.w0 * self.h0 {
                let now = self.cursor.now;
                let vs_val = vs_src[now];
                let rank = vs_val as usize;
                if vs_val != 0 && rank <= l + max_level - 1 && rank + 1 >= 2 * max_level {
                    // a seam scheduled by this build and not yet inserted:
                    // split it, writing the average of the left neighbour
                    // and the pixel itself
                    let c_left = if self.cursor.x > 0 {
                        self.cursor.left(vs_src, self.level)
                    } else {
                        now
                    };
                    for k in 0..ch {
                        self.rgb
                            .avg_subpixel(c_left * ch + k, now * ch + k, &mut new_rgb, z0 * ch + k);
                    }
                    if self.active {
                        new_bias[z0] = (self.bias[c_left] + self.bias[now]) / 2.0;
                        if let (Some(mask), Some(new_mask)) =
                            (&self.rigidity_mask, new_rigmask.as_mut())
                        {
                            new_mask[z0] = (mask[c_left] + mask[now]) / 2.0;
                        }
                    }
                    if is_root {
                        // insertion ranks take the high range, shifted so
                        // the map's minimum visibility becomes 1 again
                        new_vs[z0] = (l + max_level - rank) as i32;
                    }
                    z0 += 1;
                }

                for k in 0..ch {
                    self.rgb.copy_subpixel(now * ch + k, &mut new_rgb, z0 * ch + k);
                }
                if self.active {
                    new_bias[z0] = self.bias[now];
                    if let (Some(mask), Some(new_mask)) =
                        (&self.rigidity_mask, new_rigmask.as_mut())
                    {
                        new_mask[z0] = mask[now];
                    }
                }
                if vs_val != 0 {
                    if is_root {
                        new_vs[z0] = vs_val + (l - max_level + 1) as i32;
                    }
                } else if let Some(raw) = self.raw.as_mut() {
                    // keep the raw map valid over the grown buffer
                    raw[(y, x)] = z0;
                    x += 1;
                    if x >= self.w_start - l {
                        x = 0;
                        y += 1;
                    }
                }
                z0 += 1;
                self.cursor.next(self.w, self.h, vs_src, self.level);
            }
            debug_assert_eq!(z0, w1 * self.h0);
        }

        self.rgb = new_rgb;
        if is_root {
            self.vs = new_vs;
        }
        if self.active {
            self.bias = new_bias;
            self.rigidity_mask = new_rigmask;
            self.en = try_vec(w1 * self.h0)?;
            self.finder
                .as_mut()
                .expect("active")
                .reallocate(w1 * self.h0, self.h0)?;
        }

        self.level = l + 1;
        self.max_level = l + 1;
        self.w0 = w1;
        self.w = self.w_start;
        self.ro_buffer = self.rgb.alloc_like(self.w0 * ch)?;
        Ok(())
    }

    /* flatten & transpose */

    /// Bakes the current logical image into a new baseline: scheduling
    /// state is dropped and the invisible pixels are gone for good.
    /// Idempotent once no seams are pending.
    pub fn flatten(&mut self) -> Result<()> {
        debug!("flattening at {}x{}", self.w, self.h);
        {
            let vs = &self.vs;
            for aux in &mut self.attached {
                aux.flatten_inner(Some(vs))?;
            }
        }
        self.flatten_inner(None)?;
        self.reset_cursors();
        Ok(())
    }

    fn flatten_inner(&mut self, shared_vs: Option<&[i32]>) -> Result<()> {
        let is_root = shared_vs.is_none();
        let ch = self.channels;
        let mut new_rgb = self.rgb.alloc_like(self.w * self.h * ch)?;
        let mut new_bias: Vec<f64> = if self.active {
            try_vec(self.w * self.h)?
        } else {
            Vec::new()
        };
        let mut new_rigmask: Option<Vec<f64>> = match (&self.rigidity_mask, self.active) {
            (Some(_), true) => Some(try_vec(self.w * self.h)?),
            _ => None,
        };

        {
            let vs_src: &[i32] = match shared_vs {
                Some(v) => v,
                None => &self.vs,
            };
            self.cursor.reset(vs_src, self.level);
            for y in 0..self.h {
                for x in 0..self.w {
                    let z0 = y * self.w + x;
                    let now = self.cursor.now;
                    for k in 0..ch {
                        self.rgb.copy_subpixel(now * ch + k, &mut new_rgb, z0 * ch + k);
                    }
                    if self.active {
                        new_bias[z0] = self.bias[now];
                        if let (Some(mask), Some(new_mask)) =
                            (&self.rigidity_mask, new_rigmask.as_mut())
                        {
                            new_mask[z0] = mask[now];
                        }
                    }
                    self.cursor.next(self.w, self.h, vs_src, self.level);
                }
            }
        }

        self.rgb = new_rgb;
        if is_root {
            self.vs = try_vec(self.w * self.h)?;
        }
        if self.active {
            self.bias = new_bias;
            self.rigidity_mask = new_rigmask;
            self.raw = Some(RawMap::identity(self.w, self.h)?);
            self.en = try_vec(self.w * self.h)?;
            self.finder
                .as_mut()
                .expect("active")
                .reallocate(self.w * self.h, self.h)?;
        }

        self.w0 = self.w;
        self.h0 = self.h;
        self.w_start = self.w;
        self.h_start = self.h;
        self.level = 1;
        self.max_level = 1;
        self.ro_buffer = self.rgb.alloc_like(self.w0 * ch)?;
        Ok(())
    }

    /// Rotates the stored image a quarter turn so the vertical-seam
    /// machinery can carve the other axis. Flattens first when seams are
    /// pending; the visibility map is invalidated.
    pub fn transpose(&mut self) -> Result<()> {
        if self.level > 1 {
            self.flatten()?;
        }
        debug!("transposing {}x{}", self.w, self.h);
        for aux in &mut self.attached {
            aux.transpose_inner()?;
        }
        self.transpose_inner()?;
        self.reset_cursors();
        Ok(())
    }

    fn transpose_inner(&mut self) -> Result<()> {
        debug_assert_eq!(self.level, 1);
        let ch = self.channels;
        let mut new_rgb = self.rgb.alloc_like(self.w0 * self.h0 * ch)?;
        let mut new_bias: Vec<f64> = if self.active {
            try_vec(self.w0 * self.h0)?
        } else {
            Vec::new()
        };
        let mut new_rigmask: Option<Vec<f64>> = match (&self.rigidity_mask, self.active) {
            (Some(_), true) => Some(try_vec(self.w0 * self.h0)?),
            _ => None,
        };

        for x in 0..self.w {
            for y in 0..self.h {
                let z0 = y * self.w0 + x;
                let z1 = x * self.h0 + y;
                for k in 0..ch {
                    self.rgb.copy_subpixel(z0 * ch + k, &mut new_rgb, z1 * ch + k);
                }
                if self.active {
                    new_bias[z1] = self.bias[z0];
                    if let (Some(mask), Some(new_mask)) =
                        (&self.rigidity_mask, new_rigmask.as_mut())
                    {
                        new_mask[z1] = mask[z0];
                    }
                }
            }
        }

        self.rgb = new_rgb;
        if !self.vs.is_empty() {
            self.vs = try_vec(self.w0 * self.h0)?;
        }
        if self.active {
            self.bias = new_bias;
            self.rigidity_mask = new_rigmask;
            self.raw = Some(RawMap::identity(self.h0, self.w0)?);
            self.en = try_vec(self.w0 * self.h0)?;
            self.finder
                .as_mut()
                .expect("active")
                .reallocate(self.w0 * self.h0, self.w0)?;
        }

        std::mem::swap(&mut self.w0, &mut self.h0);
        self.w = self.w0;
        self.h = self.h0;
        self.w_start = self.w0;
        self.h_start = self.h0;
        self.level = 1;
        self.max_level = 1;
        self.ro_buffer = self.rgb.alloc_like(self.w0 * ch)?;

        if self.active {
            let scale = self.w0 as f64 / self.h0 as f64;
            for entry in self.rigidity_map.iter_mut() {
                *entry *= scale;
            }
        }

        self.transposed = !self.transposed;
        Ok(())
    }

    /* resizing */

    /// Content-aware resize to `w1`×`h1` (in the caller's orientation).
    /// Axes are carved in the configured order; each axis builds the seam
    /// schedule it needs, lazily and progressively.
    pub fn resize(&mut self, w1: usize, h1: usize) -> Result<()> {
        match self.resize_order {
            ResizeOrder::HorizontalFirst => {
                self.resize_width(w1)?;
                self.resize_height(h1)?;
            }
            ResizeOrder::VerticalFirst => {
                self.resize_height(h1)?;
                self.resize_width(w1)?;
            }
        }
        self.reset_cursors();
        Ok(())
    }

    fn resize_width(&mut self, w1: usize) -> Result<()> {
        if w1 < 1 {
            return Err(Error::invalid("target width must be at least 1"));
        }
        let (start, current) = if self.transposed {
            (self.h_start, self.h)
        } else {
            (self.w_start, self.w)
        };
        let delta = if w1 > start { w1 - start } else { start - w1 };
        if w1 == current {
            return Ok(());
        }
        if self.transposed {
            self.transpose()?;
        }
        let msg = self.progress.init_width_message.clone();
        self.progress.fire_init(&msg);

        self.build_maps(delta + 1)?;
        self.set_width_internal(w1);
        for aux in &mut self.attached {
            aux.set_width_internal(w1);
        }
        if self.dump_vmaps {
            let snapshot = self.vmap_dump()?;
            self.flushed.push(snapshot);
        }

        let msg = self.progress.end_width_message.clone();
        self.progress.fire_end(&msg);
        Ok(())
    }

    fn resize_height(&mut self, h1: usize) -> Result<()> {
        if h1 < 1 {
            return Err(Error::invalid("target height must be at least 1"));
        }
        let (start, current) = if self.transposed {
            (self.w_start, self.w)
        } else {
            (self.h_start, self.h)
        };
        let delta = if h1 > start { h1 - start } else { start - h1 };
        if h1 == current {
            return Ok(());
        }
        if !self.transposed {
            self.transpose()?;
        }
        let msg = self.progress.init_height_message.clone();
        self.progress.fire_init(&msg);

        self.build_maps(delta + 1)?;
        self.set_width_internal(h1);
        for aux in &mut self.attached {
            aux.set_width_internal(h1);
        }
        if self.dump_vmaps {
            let snapshot = self.vmap_dump()?;
            self.flushed.push(snapshot);
        }

        let msg = self.progress.end_height_message.clone();
        self.progress.fire_end(&msg);
        Ok(())
    }

    /* readout */

    fn reset_cursors(&mut self) {
        self.cursor.reset(&self.vs, self.level);
        let vs = &self.vs;
        for aux in &mut self.attached {
            aux.cursor.reset(vs, aux.level);
        }
    }

    /// Rewinds the readout to the first pixel.
    pub fn scan_reset(&mut self) {
        self.cursor.reset(&self.vs, self.level);
    }

    /// True when `scan_line` emits rows of the caller's orientation.
    pub fn scan_by_row(&self) -> bool {
        !self.transposed
    }

    fn scan_step(
        cursor: &mut Cursor,
        w: usize,
        h: usize,
        level: usize,
        transposed: bool,
        vs: &[i32],
    ) -> Option<(usize, usize, usize)> {
        if cursor.eoc {
            cursor.reset(vs, level);
            return None;
        }
        let (x, y) = if transposed {
            (cursor.y, cursor.x)
        } else {
            (cursor.x, cursor.y)
        };
        let now = cursor.now;
        cursor.next(w, h, vs, level);
        Some((x, y, now))
    }

    /// Emits the next pixel of an 8-bit carver as `(x, y, channels)`.
    /// Returns `None` (and rewinds) past the last pixel, or immediately on
    /// a carver of a different depth.
    pub fn scan(&mut self) -> Option<(usize, usize, &[u8])> {
        if self.rgb.depth() != ColDepth::U8 {
            return None;
        }
        let (x, y, now) =
            Self::scan_step(&mut self.cursor, self.w, self.h, self.level, self.transposed, &self.vs)?;
        let ch = self.channels;
        Some((x, y, &self.rgb.as_u8().unwrap()[now * ch..(now + 1) * ch]))
    }

    /// 16-bit variant of [`scan`](Carver::scan).
    pub fn scan_16(&mut self) -> Option<(usize, usize, &[u16])> {
        if self.rgb.depth() != ColDepth::U16 {
            return None;
        }
        let (x, y, now) =
            Self::scan_step(&mut self.cursor, self.w, self.h, self.level, self.transposed, &self.vs)?;
        let ch = self.channels;
        Some((x, y, &self.rgb.as_u16().unwrap()[now * ch..(now + 1) * ch]))
    }

    /// Copies the rest of the current row into the readout buffer; returns
    /// the row index. `None` (after rewinding) at the end of the image.
    fn scan_line_step(&mut self) -> Option<usize> {
        if self.cursor.eoc {
            self.cursor.reset(&self.vs, self.level);
            return None;
        }
        while self.cursor.x > 0 {
            self.cursor.prev(self.w, &self.vs, self.level);
        }
        let row = self.cursor.y;
        let ch = self.channels;
        let Carver {
            cursor,
            rgb,
            ro_buffer,
            vs,
            w,
            h,
            level,
            ..
        } = self;
        for x in 0..*w {
            for k in 0..ch {
                rgb.copy_subpixel(cursor.now * ch + k, ro_buffer, x * ch + k);
            }
            cursor.next(*w, *h, vs, *level);
        }
        Some(row)
    }

    /// Emits the next row of an 8-bit carver as `(row, w·channels)`.
    pub fn scan_line(&mut self) -> Option<(usize, &[u8])> {
        if self.rgb.depth() != ColDepth::U8 {
            return None;
        }
        let row = self.scan_line_step()?;
        Some((row, &self.ro_buffer.as_u8().unwrap()[..self.w * self.channels]))
    }

    /// 16-bit variant of [`scan_line`](Carver::scan_line).
    pub fn scan_line_16(&mut self) -> Option<(usize, &[u16])> {
        if self.rgb.depth() != ColDepth::U16 {
            return None;
        }
        let row = self.scan_line_step()?;
        Some((row, &self.ro_buffer.as_u16().unwrap()[..self.w * self.channels]))
    }

    /// 32-bit-float variant of [`scan_line`](Carver::scan_line).
    pub fn scan_line_f32(&mut self) -> Option<(usize, &[f32])> {
        if self.rgb.depth() != ColDepth::F32 {
            return None;
        }
        let row = self.scan_line_step()?;
        Some((row, &self.ro_buffer.as_f32().unwrap()[..self.w * self.channels]))
    }

    /// 64-bit-float variant of [`scan_line`](Carver::scan_line).
    pub fn scan_line_f64(&mut self) -> Option<(usize, &[f64])> {
        if self.rgb.depth() != ColDepth::F64 {
            return None;
        }
        let row = self.scan_line_step()?;
        Some((row, &self.ro_buffer.as_f64().unwrap()[..self.w * self.channels]))
    }

    /// Depth-agnostic readout step: `(x, y, physical pixel index)` into
    /// [`pixel_data`](Carver::pixel_data).
    pub fn scan_index(&mut self) -> Option<(usize, usize, usize)> {
        Self::scan_step(&mut self.cursor, self.w, self.h, self.level, self.transposed, &self.vs)
    }

    /// The underlying interleaved pixel buffer.
    pub fn pixel_data(&self) -> &PixelData {
        &self.rgb
    }

    /// Rewinds the readout of an attached carver.
    pub fn scan_attached_reset(&mut self, index: usize) {
        let vs = &self.vs;
        if let Some(aux) = self.attached.get_mut(index) {
            aux.cursor.reset(vs, aux.level);
        }
    }

    /// Emits the next pixel of the 8-bit attached carver `index`,
    /// synchronised with the primary's seam schedule.
    pub fn scan_attached(&mut self, index: usize) -> Option<(usize, usize, &[u8])> {
        let vs = &self.vs;
        let aux = self.attached.get_mut(index)?;
        if aux.rgb.depth() != ColDepth::U8 {
            return None;
        }
        let (x, y, now) =
            Self::scan_step(&mut aux.cursor, aux.w, aux.h, aux.level, aux.transposed, vs)?;
        let ch = aux.channels;
        Some((x, y, &aux.rgb.as_u8().unwrap()[now * ch..(now + 1) * ch]))
    }

    /* bias and rigidity masks */

    fn require_bias_ready(&self) -> Result<()> {
        if !self.active {
            return Err(Error::invalid("bias requires an initialised carver"));
        }
        if self.transposed {
            return Err(Error::invalid("bias must be loaded in the original orientation"));
        }
        Ok(())
    }

    /// Accumulates a prescaled bias buffer over a sub-rectangle, clipped
    /// against the carver bounds. Positive factors preserve, negative ones
    /// discard.
    pub fn bias_add_area(
        &mut self,
        buffer: &[f64],
        factor: f64,
        width: usize,
        height: usize,
        x_off: isize,
        y_off: isize,
    ) -> Result<()> {
        if factor == 0.0 {
            return Ok(());
        }
        self.require_bias_ready()?;
        if buffer.len() < width * height {
            return Err(Error::invalid("bias buffer shorter than its declared area"));
        }

        let x1 = x_off.max(0) as usize;
        let y1 = y_off.max(0) as usize;
        let x2 = ((width as isize + x_off).min(self.w as isize)).max(0) as usize;
        let y2 = ((height as isize + y_off).min(self.h as isize)).max(0) as usize;

        for y in 0..y2.saturating_sub(y1) {
            for x in 0..x2.saturating_sub(x1) {
                let src_x = (x1 + x) as isize - x_off;
                let src_y = (y1 + y) as isize - y_off;
                let bias = factor * buffer[src_y as usize * width + src_x as usize] / 2.0;
                self.bias[(y + y1) * self.w0 + (x + x1)] += bias;
            }
        }
        Ok(())
    }

    /// Whole-image variant of [`bias_add_area`](Carver::bias_add_area).
    pub fn bias_add(&mut self, buffer: &[f64], factor: f64) -> Result<()> {
        self.bias_add_area(buffer, factor, self.w0, self.h0, 0, 0)
    }

    /// Folds an interleaved 8-bit mask into the bias over a sub-rectangle:
    /// per pixel, `factor · mean(colour)/2`, premultiplied by alpha when
    /// `bpp` declares one (2, or 4 and up).
    pub fn bias_add_rgb_area(
        &mut self,
        rgb: &[u8],
        factor: f64,
        bpp: usize,
        width: usize,
        height: usize,
        x_off: isize,
        y_off: isize,
    ) -> Result<()> {
        if factor == 0.0 {
            return Ok(());
        }
        self.require_bias_ready()?;
        if bpp == 0 || rgb.len() < width * height * bpp {
            return Err(Error::invalid("bias mask shorter than its declared area"));
        }

        let has_alpha = bpp == 2 || bpp >= 4;
        let c_bpp = bpp - has_alpha as usize;

        let x1 = x_off.max(0) as usize;
        let y1 = y_off.max(0) as usize;
        let x2 = ((width as isize + x_off).min(self.w as isize)).max(0) as usize;
        let y2 = ((height as isize + y_off).min(self.h as isize)).max(0) as usize;

        for y in 0..y2.saturating_sub(y1) {
            for x in 0..x2.saturating_sub(x1) {
                let src_x = ((x1 + x) as isize - x_off) as usize;
                let src_y = ((y1 + y) as isize - y_off) as usize;
                let px = (src_y * width + src_x) * bpp;
                let sum: u32 = rgb[px..px + c_bpp].iter().map(|&v| v as u32).sum();
                let mut bias = factor * sum as f64 / (2.0 * 255.0 * c_bpp as f64);
                if has_alpha {
                    bias *= rgb[px + bpp - 1] as f64 / 255.0;
                }
                self.bias[(y + y1) * self.w0 + (x + x1)] += bias;
            }
        }
        Ok(())
    }

    /// Whole-image variant of [`bias_add_rgb_area`](Carver::bias_add_rgb_area).
    pub fn bias_add_rgb(&mut self, rgb: &[u8], factor: f64, bpp: usize) -> Result<()> {
        self.bias_add_rgb_area(rgb, factor, bpp, self.w0, self.h0, 0, 0)
    }

    fn rigidity_mask_slot(&mut self) -> Result<&mut Vec<f64>> {
        if self.rigidity_mask.is_none() {
            self.rigidity_mask = Some(try_vec(self.w0 * self.h0)?);
        }
        Ok(self.rigidity_mask.as_mut().unwrap())
    }

    /// Replaces the rigidity-mask entries over a sub-rectangle with a
    /// prescaled buffer. A no-op when the carver has no rigidity.
    pub fn rigmask_add_area(
        &mut self,
        buffer: &[f64],
        width: usize,
        height: usize,
        x_off: isize,
        y_off: isize,
    ) -> Result<()> {
        if !self.active {
            return Err(Error::invalid("rigidity mask requires an initialised carver"));
        }
        if self.rigidity == 0.0 {
            return Ok(());
        }
        if buffer.len() < width * height {
            return Err(Error::invalid("rigidity mask shorter than its declared area"));
        }
        if self.transposed {
            self.transpose()?;
        }

        let x1 = x_off.max(0) as usize;
        let y1 = y_off.max(0) as usize;
        let x2 = ((width as isize + x_off).min(self.w as isize)).max(0) as usize;
        let y2 = ((height as isize + y_off).min(self.h as isize)).max(0) as usize;
        let w0 = self.w0;

        let mask = self.rigidity_mask_slot()?;
        for y in 0..y2.saturating_sub(y1) {
            for x in 0..x2.saturating_sub(x1) {
                let src_x = ((x1 + x) as isize - x_off) as usize;
                let src_y = ((y1 + y) as isize - y_off) as usize;
                mask[(y + y1) * w0 + (x + x1)] = buffer[src_y * width + src_x];
            }
        }
        Ok(())
    }

    /// Whole-image variant of [`rigmask_add_area`](Carver::rigmask_add_area).
    pub fn rigmask_add(&mut self, buffer: &[f64]) -> Result<()> {
        self.rigmask_add_area(buffer, self.w0, self.h0, 0, 0)
    }

    /// Replaces the rigidity mask over a sub-rectangle from an interleaved
    /// 8-bit buffer (mean of colour channels, alpha-premultiplied). The
    /// carver is flattened first and its orientation restored afterwards.
    pub fn rigmask_add_rgb_area(
        &mut self,
        rgb: &[u8],
        bpp: usize,
        width: usize,
        height: usize,
        x_off: isize,
        y_off: isize,
    ) -> Result<()> {
        if !self.active {
            return Err(Error::invalid("rigidity mask requires an initialised carver"));
        }
        if self.rigidity == 0.0 {
            return Ok(());
        }
        if bpp == 0 || rgb.len() < width * height * bpp {
            return Err(Error::invalid("rigidity mask shorter than its declared area"));
        }

        self.flatten()?;
        let was_transposed = self.transposed;
        if was_transposed {
            self.transpose()?;
        }

        let has_alpha = bpp == 2 || bpp >= 4;
        let c_bpp = bpp - has_alpha as usize;

        let x1 = x_off.max(0) as usize;
        let y1 = y_off.max(0) as usize;
        let x2 = ((width as isize + x_off).min(self.w0 as isize)).max(0) as usize;
        let y2 = ((height as isize + y_off).min(self.h0 as isize)).max(0) as usize;
        let w0 = self.w0;

        let mask = self.rigidity_mask_slot()?;
        for y in 0..y2.saturating_sub(y1) {
            for x in 0..x2.saturating_sub(x1) {
                let src_x = ((x1 + x) as isize - x_off) as usize;
                let src_y = ((y1 + y) as isize - y_off) as usize;
                let px = (src_y * width + src_x) * bpp;
                let sum: u32 = rgb[px..px + c_bpp].iter().map(|&v| v as u32).sum();
                let mut value = sum as f64 / (255.0 * c_bpp as f64);
                if has_alpha {
                    value *= rgb[px + bpp - 1] as f64 / 255.0;
                }
                mask[(y + y1) * w0 + (x + x1)] = value;
            }
        }

        if was_transposed {
            self.transpose()?;
        }
        Ok(())
    }

    /// Whole-image variant of
    /// [`rigmask_add_rgb_area`](Carver::rigmask_add_rgb_area).
    pub fn rigmask_add_rgb(&mut self, rgb: &[u8], bpp: usize) -> Result<()> {
        self.rigmask_add_rgb_area(rgb, bpp, self.w0, self.h0, 0, 0)
    }

    /* visibility-map persistence */

    /// Snapshots the current seam schedule over the start geometry, in the
    /// carver's orientation. Ranks are rebased so that reloading them with
    /// [`vmap_load`](Carver::vmap_load) reproduces the schedule exactly.
    pub fn vmap_dump(&mut self) -> Result<VMap> {
        let w_save = self.w;
        self.set_width_internal(self.w_start);

        let out_w = self.width();
        let out_h = self.height();
        let depth = self.w0 - self.w_start;

        let mut buffer: Vec<i32> = try_vec(out_w * out_h)?;
        self.cursor.reset(&self.vs, self.level);
        for y in 0..self.h {
            for x in 0..self.w {
                let vs_val = self.vs[self.cursor.now];
                let z0 = if self.transposed {
                    x * self.h + y
                } else {
                    y * self.w + x
                };
                buffer[z0] = if vs_val == 0 { 0 } else { vs_val - depth as i32 };
                self.cursor.next(self.w, self.h, &self.vs, self.level);
            }
        }

        self.set_width_internal(w_save);
        self.cursor.reset(&self.vs, self.level);
        VMap::new(buffer, out_w, out_h, depth, self.transposed)
    }

    /// Loads a previously dumped schedule onto a fresh (uninitialised)
    /// carver whose start geometry matches the map's, transposing to align
    /// orientation if necessary. Afterwards the carver can be set to any
    /// width the schedule covers without recomputing anything.
    pub fn vmap_load(&mut self, vmap: &VMap) -> Result<()> {
        if self.active {
            return Err(Error::invalid(
                "visibility maps can only be loaded onto an uninitialised carver",
            ));
        }
        let (w, h) = (vmap.width(), vmap.height());
        let matches = if self.transposed {
            self.w_start == h && self.h_start == w
        } else {
            self.w_start == w && self.h_start == h
        };
        if !matches {
            return Err(Error::invalid(format!(
                "vmap is {}x{}, carver is {}x{}",
                w,
                h,
                self.width(),
                self.height()
            )));
        }

        self.flatten()?;
        if vmap.orientation() != self.transposed {
            self.transpose()?;
        }

        let ranks = vmap.ranks();
        for y in 0..self.h {
            for x in 0..self.w {
                let z0 = if self.transposed {
                    x * self.h + y
                } else {
                    y * self.w + x
                };
                self.vs[y * self.w + x] = ranks[z0];
            }
        }

        let depth = vmap.depth();
        if depth > 0 {
            self.validate_loaded_schedule(depth)?;
            self.inflate(depth)?;
        }
        self.reset_cursors();
        Ok(())
    }

    /// A loadable schedule must cross every row exactly once per seam rank;
    /// anything else would corrupt the inflation walk.
    fn validate_loaded_schedule(&self, depth: usize) -> Result<()> {
        if depth >= self.w {
            return Err(Error::invalid("vmap depth exceeds its carving extent"));
        }
        let mut seen = vec![0u32; depth];
        for y in 0..self.h {
            for s in seen.iter_mut() {
                *s = 0;
            }
            for x in 0..self.w {
                let rank = self.vs[y * self.w + x];
                if rank < 0 || rank as usize > self.w {
                    return Err(Error::invalid("vmap rank out of range"));
                }
                if rank > 0 && (rank as usize) <= depth {
                    seen[rank as usize - 1] += 1;
                }
            }
            if seen.iter().any(|&count| count != 1) {
                return Err(Error::invalid("vmap ranks do not form a seam schedule"));
            }
        }
        Ok(())
    }
}
