//! The cumulative-minimum-cost map and the seam extractor.
//!
//! The minpath map is defined as
//!   y = 0 : m(x,y) = e(x,y)
//!   y > 0 : m(x,y) = min_{dx=-δ..δ} ( m(x+dx, y-1) + r_fact·rig(dx) ) + e(x,y)
//! over the live window of the raw map, with a back-pointer array tracking
//! the chosen predecessor of every cell.

use crate::error::{try_vec, Result};
use crate::matrix::RawMap;

/// Everything the dynamic program needs besides the energy itself.
pub(crate) struct MinpathCtx<'a> {
    pub delta_x: usize,
    pub rigidity: f64,
    /// `2·delta_x+1` entries, indexed by `dx + delta_x`.
    pub rigidity_map: &'a [f64],
    /// Per-pixel multiplier of the rigidity cost; `None` means 1 everywhere.
    pub rigidity_mask: Option<&'a [f64]>,
}

impl<'a> MinpathCtx<'a> {
    #[inline]
    fn step_cost(&self, data: usize, dx: isize) -> f64 {
        if self.rigidity == 0.0 {
            return 0.0;
        }
        let r_fact = match self.rigidity_mask {
            Some(mask) => mask[data],
            None => 1.0,
        };
        r_fact * self.rigidity_map[(dx + self.delta_x as isize) as usize]
    }
}

pub(crate) struct SeamFinder {
    /// Cumulative minimum cost, indexed by physical pixel index.
    m: Vec<f64>,
    /// Chosen predecessor (physical index) of every cell.
    least: Vec<usize>,
    /// Physical indices of the last extracted seam, one per row.
    pub vpath: Vec<usize>,
    /// Logical columns of the last extracted seam, one per row.
    pub vpath_x: Vec<usize>,
    /// Tie-break side: when set, equal costs prefer the later-seen (right)
    /// candidate.
    pub leftright: bool,
}

impl SeamFinder {
    pub fn new(buf_len: usize, height: usize) -> Result<SeamFinder> {
        Ok(SeamFinder {
            m: try_vec(buf_len)?,
            least: try_vec(buf_len)?,
            vpath: try_vec(height)?,
            vpath_x: try_vec(height)?,
            leftright: false,
        })
    }

    /// Reallocates after the physical buffer changed shape (inflate,
    /// flatten, transpose).
    pub fn reallocate(&mut self, buf_len: usize, height: usize) -> Result<()> {
        self.m = try_vec(buf_len)?;
        self.least = try_vec(buf_len)?;
        self.vpath = try_vec(height)?;
        self.vpath_x = try_vec(height)?;
        Ok(())
    }

    /// Finds the cheapest predecessor of logical (x, y); returns
    /// (physical index, cost without the energy term).
    #[inline]
    fn best_step(
        &self,
        ctx: &MinpathCtx,
        raw: &RawMap,
        data: usize,
        x: usize,
        y: usize,
        w: usize,
    ) -> (usize, f64) {
        let dx_min = -((x).min(ctx.delta_x) as isize);
        let dx_max = (w - 1 - x).min(ctx.delta_x) as isize;

        let mut least = raw[(y - 1, (x as isize + dx_min) as usize)];
        let mut m = self.m[least] + ctx.step_cost(data, dx_min);
        for dx in dx_min + 1..=dx_max {
            let data_down = raw[(y - 1, (x as isize + dx) as usize)];
            let m1 = self.m[data_down] + ctx.step_cost(data, dx);
            if m1 < m || (m1 == m && self.leftright) {
                m = m1;
                least = data_down;
            }
        }
        (least, m)
    }

    /// Fills the whole minpath map for the current live window.
    pub fn build_mmap(&mut self, ctx: &MinpathCtx, raw: &RawMap, en: &[f64], h: usize) {
        let w = raw.live_width();

        for &data in &raw.row(0)[..w] {
            self.m[data] = en[data];
        }

        for y in 1..h {
            for x in 0..w {
                let data = raw[(y, x)];
                let (least, m) = self.best_step(ctx, raw, data, x, y, w);
                self.least[data] = least;
                self.m[data] = en[data] + m;
            }
        }
    }

    /// Rebuilds only the cells that can see a changed neighbour of the seam
    /// carved last. The affected band starts around the seam's first row and
    /// widens by δx per row; two shortcut rules shrink it again wherever the
    /// recomputed value turns out unchanged.
    pub fn update_mmap(&mut self, ctx: &MinpathCtx, raw: &RawMap, en: &[f64], h: usize) {
        let w = raw.live_width();

        let mut x_min = self.vpath_x[0].saturating_sub(ctx.delta_x);
        let mut x_max = (self.vpath_x[0] + ctx.delta_x).min(w - 1);

        for &data in &raw.row(0)[x_min..=x_max] {
            self.m[data] = en[data];
        }

        for y in 1..h {
            // make sure to include the seam
            x_min = x_min.min(self.vpath_x[y]);
            x_max = x_max.max(self.vpath_x[y]);

            // expand the affected region by delta_x
            x_min = x_min.saturating_sub(ctx.delta_x);
            x_max = (x_max + ctx.delta_x).min(w - 1);

            let mut x = x_min;
            while x <= x_max {
                let data = raw[(y, x)];
                let (least, m) = self.best_step(ctx, raw, data, x, y, w);

                // reduce the range where nothing differs from the old map
                let mut stop = false;
                if self.least[data] == least && self.m[data] == en[data] + m {
                    if x == x_min && x < self.vpath_x[y] {
                        x_min += 1;
                    }
                    if x >= self.vpath_x[y] {
                        stop = true;
                        x_max = x;
                    }
                }

                self.m[data] = en[data] + m;
                self.least[data] = least;

                if stop {
                    break;
                }
                x += 1;
            }
        }
    }

    /// Recovers the minimal seam from the minpath map into
    /// `vpath`/`vpath_x`: argmin over the last row, then an upward walk
    /// along the back-pointers.
    pub fn build_vpath(&mut self, delta_x: usize, raw: &RawMap, h: usize) {
        let w = raw.live_width();

        let mut m = f64::INFINITY;
        let mut last = 0;
        let mut last_x = 0;
        for x in 0..w {
            let m1 = self.m[raw[(h - 1, x)]];
            if m1 < m || (m1 == m && self.leftright) {
                last = raw[(h - 1, x)];
                last_x = x;
                m = m1;
            }
        }

        for y in (0..h).rev() {
            debug_assert!(last_x < w);
            self.vpath[y] = last;
            self.vpath_x[y] = last_x;
            if y > 0 {
                last = self.least[raw[(y, last_x)]];
                // retrieve the logical column of the predecessor
                let x_min = last_x.saturating_sub(delta_x);
                let x_max = (last_x + delta_x).min(w - 1);
                for x in x_min..=x_max {
                    if raw[(y - 1, x)] == last {
                        last_x = x;
                        break;
                    }
                }
            }
        }
    }

    /// The cumulative cost of the last extracted seam.
    #[cfg(test)]
    pub fn seam_cost(&self, h: usize) -> f64 {
        self.m[self.vpath[h - 1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::RawMap;

    fn ctx(delta_x: usize, rigidity: f64, map: &[f64]) -> MinpathCtx {
        MinpathCtx {
            delta_x,
            rigidity,
            rigidity_map: map,
            rigidity_mask: None,
        }
    }

    #[test]
    fn follows_a_cheap_stripe() {
        // column 2 of a 5x3 grid costs ε, everything else 1
        let eps = 1e-3;
        let mut en = vec![1.0; 15];
        for y in 0..3 {
            en[y * 5 + 2] = eps;
        }
        let raw = RawMap::identity(5, 3).unwrap();
        let rig = [0.0; 3];
        let mut finder = SeamFinder::new(15, 3).unwrap();
        finder.build_mmap(&ctx(1, 0.0, &rig), &raw, &en, 3);
        finder.build_vpath(1, &raw, 3);
        assert_eq!(finder.vpath_x, vec![2, 2, 2]);
        assert_eq!(finder.vpath, vec![2, 7, 12]);
        assert!((finder.seam_cost(3) - 3.0 * eps).abs() < 1e-9);
    }

    #[test]
    fn diagonal_seam_within_delta() {
        // cheap cells wander one column per row
        let mut en = vec![1.0; 9];
        en[0] = 0.0; // (0,0)
        en[4] = 0.0; // (1,1)
        en[8] = 0.0; // (2,2)
        let raw = RawMap::identity(3, 3).unwrap();
        let rig = [0.0; 3];
        let mut finder = SeamFinder::new(9, 3).unwrap();
        finder.build_mmap(&ctx(1, 0.0, &rig), &raw, &en, 3);
        finder.build_vpath(1, &raw, 3);
        assert_eq!(finder.vpath_x, vec![0, 1, 2]);
    }

    #[test]
    fn tie_break_prefers_left_by_default() {
        let en = vec![1.0; 6];
        let raw = RawMap::identity(3, 2).unwrap();
        let rig = [0.0; 3];
        let mut finder = SeamFinder::new(6, 2).unwrap();
        finder.build_mmap(&ctx(1, 0.0, &rig), &raw, &en, 2);
        finder.build_vpath(1, &raw, 2);
        assert_eq!(finder.vpath_x, vec![0, 0]);
    }

    #[test]
    fn tie_break_flips_with_leftright() {
        let en = vec![1.0; 6];
        let raw = RawMap::identity(3, 2).unwrap();
        let rig = [0.0; 3];
        let mut finder = SeamFinder::new(6, 2).unwrap();
        finder.leftright = true;
        finder.build_mmap(&ctx(1, 0.0, &rig), &raw, &en, 2);
        finder.build_vpath(1, &raw, 2);
        assert_eq!(finder.vpath_x, vec![2, 2]);
    }

    #[test]
    fn rigidity_straightens_the_seam() {
        // a zig-zag of zero-energy cells; with rigidity on, a straight
        // column beats the swerving path despite its higher energy
        let mut en = vec![1.0; 9];
        en[0] = 0.0; // (0, 0)
        en[4] = 0.0; // (1, 1)
        en[6] = 0.0; // (0, 2)
        let raw = RawMap::identity(3, 3).unwrap();
        let rig = [4.0, 0.0, 4.0];
        let mut finder = SeamFinder::new(9, 3).unwrap();
        finder.build_mmap(&ctx(1, 1.0, &rig), &raw, &en, 3);
        finder.build_vpath(1, &raw, 3);
        let dx_max = finder
            .vpath_x
            .windows(2)
            .map(|w| (w[0] as isize - w[1] as isize).abs())
            .max()
            .unwrap();
        assert_eq!(dx_max, 0, "seam should be straight: {:?}", finder.vpath_x);
    }

    #[test]
    fn update_matches_full_rebuild() {
        // carve one seam, update locally, compare against a from-scratch map
        let en_of = |z: usize| ((z * 7919) % 13) as f64;
        let mut en = vec![0.0; 42];
        for (z, e) in en.iter_mut().enumerate() {
            *e = en_of(z);
        }
        let mut raw = RawMap::identity(7, 6).unwrap();
        let rig = [0.5, 0.0, 0.5];
        let c = ctx(1, 1.0, &rig);

        let mut finder = SeamFinder::new(42, 6).unwrap();
        finder.build_mmap(&c, &raw, &en, 6);
        finder.build_vpath(1, &raw, 6);
        raw.carve(&finder.vpath_x.clone());
        finder.update_mmap(&c, &raw, &en, 6);

        let mut fresh = SeamFinder::new(42, 6).unwrap();
        fresh.build_mmap(&c, &raw, &en, 6);

        for y in 0..6 {
            for x in 0..raw.live_width() {
                let z = raw[(y, x)];
                assert!(
                    (finder.m[z] - fresh.m[z]).abs() < 1e-12,
                    "m differs at ({}, {})",
                    x,
                    y
                );
                if y > 0 {
                    assert_eq!(finder.least[z], fresh.least[z], "least differs at ({}, {})", x, y);
                }
            }
        }
    }
}
