//! Locality-preserving patch indexing along a Hilbert curve.
//!
//! Patches live on a square `2^order x 2^order` grid. The Hilbert curve
//! visits every cell exactly once while keeping consecutive indices
//! spatially adjacent, so a contiguous hindex range always maps to a
//! spatially compact, communication-cheap set of patches. Both
//! directions are total over the grid and mutual inverses.

/// The global patch grid: a `2^order x 2^order` square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PatchGrid {
    order: u32,
}

impl PatchGrid {
    /// Maximum supported curve order (keeps `side * side` within `u64`).
    pub const MAX_ORDER: u32 = 31;

    /// Create a grid of `2^order` patches per side.
    ///
    /// # Panics
    /// Panics if `order` exceeds [`PatchGrid::MAX_ORDER`].
    pub fn new(order: u32) -> Self {
        assert!(
            order <= Self::MAX_ORDER,
            "patch grid order {} exceeds maximum {}",
            order,
            Self::MAX_ORDER
        );
        Self { order }
    }

    /// Curve order of this grid.
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Number of patches along one side.
    pub fn side(&self) -> u64 {
        1u64 << self.order
    }

    /// Total number of patches in the grid.
    pub fn total_patches(&self) -> u64 {
        self.side() * self.side()
    }

    /// Map patch coordinates to their Hilbert index.
    ///
    /// Coordinates must lie inside the grid; this is a caller bug
    /// otherwise (asserted in debug builds, masked in release).
    pub fn coordinates_to_hindex(&self, x: u64, y: u64) -> u64 {
        let side = self.side();
        debug_assert!(x < side && y < side, "coordinates ({x}, {y}) outside grid");
        let mask = side - 1;
        let (mut x, mut y) = (x & mask, y & mask);
        let mut d = 0u64;
        let mut s = side / 2;
        while s > 0 {
            let rx = u64::from(x & s > 0);
            let ry = u64::from(y & s > 0);
            d += s * s * ((3 * rx) ^ ry);
            // This direction flips against the full side: x and y still
            // carry bits above s here.
            rotate_quadrant(side, &mut x, &mut y, rx, ry);
            s /= 2;
        }
        d
    }

    /// Map a Hilbert index back to patch coordinates.
    ///
    /// The index must lie in `[0, total_patches)`; this is a caller bug
    /// otherwise (asserted in debug builds, masked in release).
    pub fn hindex_to_coordinates(&self, hindex: u64) -> (u64, u64) {
        let side = self.side();
        debug_assert!(
            hindex < self.total_patches(),
            "hindex {hindex} outside grid of {} patches",
            self.total_patches()
        );
        let mut t = hindex % self.total_patches();
        let (mut x, mut y) = (0u64, 0u64);
        let mut s = 1u64;
        while s < side {
            let rx = 1 & (t / 2);
            let ry = 1 & (t ^ rx);
            rotate_quadrant(s, &mut x, &mut y, rx, ry);
            x += s * rx;
            y += s * ry;
            t /= 4;
            s *= 2;
        }
        (x, y)
    }
}

/// Rotate/flip a quadrant so the curve orientation matches the parent
/// cell. `extent` must bound the coordinates being flipped: the full
/// side when mapping coordinates to index, the current sub-square when
/// mapping an index back.
fn rotate_quadrant(extent: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
    if ry == 0 {
        if rx == 1 {
            *x = extent - 1 - *x;
            *y = extent - 1 - *y;
        }
        std::mem::swap(x, y);
    }
}
