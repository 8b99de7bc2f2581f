//! Adaptive recursive tile planning.
//!
//! A raster rarely divides evenly into legal tile sizes (side `2^N + 1`), so
//! coverage is planned recursively: each region is covered by the largest
//! grid of equal legal tiles that fits, and the L-shaped leftover along the
//! right and bottom edges is split into two rectangles that become child
//! regions with their own (smaller) tile size. The leftover is always
//! strictly narrower than the region's tile size, so recursion terminates.
//!
//! The plan is pure geometry, built once by [`TilePlan::build`] and then
//! replayed identically for the height pass and the color pass. A
//! [`RegionLedger`] cross-checks the two passes: every region id recorded by
//! the height pass must be recorded exactly once by the color pass, and none
//! may remain afterwards.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::raster::Rect;

/// Error type for tile planning and pass bookkeeping.
#[derive(Debug)]
pub enum TilingError {
    /// The height pass visited a region id twice
    DuplicateRegionId(usize),
    /// The color pass visited a region id the height pass never recorded
    UnpairedRegionId(usize),
    /// Region ids remained outstanding after both passes
    UnbalancedPasses(usize),
    /// The requested top-level tile size is illegal or does not fit
    BadTileSize { tile: usize, width: usize, height: usize },
}

impl std::fmt::Display for TilingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateRegionId(id) => {
                write!(f, "Region {id} visited twice by the height pass")
            }
            Self::UnpairedRegionId(id) => {
                write!(f, "Region {id} visited by the color pass but not the height pass")
            }
            Self::UnbalancedPasses(n) => {
                write!(f, "{n} regions left unpaired after both tile passes")
            }
            Self::BadTileSize { tile, width, height } => write!(
                f,
                "Top-level tile size {tile} is not legal for a {width}x{height} raster"
            ),
        }
    }
}

impl std::error::Error for TilingError {}

/// Largest legal tile size (side minus one a power of two) not exceeding `d`.
///
/// Returns `None` for `d < 2`. Note the subtraction before the logarithm:
/// `legal_tile_size_le(512)` is 257, never 513.
#[must_use]
pub fn legal_tile_size_le(d: usize) -> Option<usize> {
    if d < 2 {
        return None;
    }
    // floor(log2(d - 1)) via leading zeros
    let exp = usize::BITS - 1 - (d - 1).leading_zeros();
    Some((1usize << exp) + 1)
}

/// One region of the plan: a rectangle covered by a uniform tile grid, plus
/// the leftover geometry recorded for its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanRegion {
    /// Stable id, identical across both passes
    pub id: usize,
    /// Region bounds in source height-raster pixels
    pub rect: Rect,
    /// Tile side length used inside this region
    pub tile_size: usize,
    /// Recursion depth, 0 for the top-level region
    pub depth: usize,
    /// Grid columns and rows of full tiles inside the region
    pub grid_cols: usize,
    pub grid_rows: usize,
    /// Region too small for the minimum tile size; no tiles are emitted
    pub gap: bool,
}

impl PlanRegion {
    /// Number of tiles this region emits per pass.
    #[inline]
    #[must_use]
    pub const fn tile_count(&self) -> usize {
        if self.gap {
            0
        } else {
            self.grid_cols * self.grid_rows
        }
    }
}

/// One tile emission during a replay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileEmit {
    pub region_id: usize,
    /// Column of the tile within its region grid
    pub grid_col: usize,
    /// Row of the tile within its region grid
    pub grid_row: usize,
    /// Tile bounds in source height-raster pixels
    pub rect: Rect,
}

/// Which conversion pass is replaying the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilePass {
    Height,
    Color,
}

/// Cross-checks that the two passes visit identical region id sets.
#[derive(Debug, Default)]
pub struct RegionLedger {
    outstanding: HashSet<usize>,
}

impl RegionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a region visit for the given pass.
    ///
    /// # Errors
    /// The height pass fails on a repeated id; the color pass fails on an id
    /// the height pass never recorded.
    pub fn record(&mut self, pass: TilePass, region_id: usize) -> Result<(), TilingError> {
        match pass {
            TilePass::Height => {
                if !self.outstanding.insert(region_id) {
                    return Err(TilingError::DuplicateRegionId(region_id));
                }
            }
            TilePass::Color => {
                if !self.outstanding.remove(&region_id) {
                    return Err(TilingError::UnpairedRegionId(region_id));
                }
            }
        }
        Ok(())
    }

    /// Assert both passes balanced out.
    ///
    /// # Errors
    /// Fails if any region id remains outstanding.
    pub fn finish(self) -> Result<(), TilingError> {
        if self.outstanding.is_empty() {
            Ok(())
        } else {
            Err(TilingError::UnbalancedPasses(self.outstanding.len()))
        }
    }
}

/// The complete tiling plan for one raster.
#[derive(Debug, Clone)]
pub struct TilePlan {
    width: usize,
    height: usize,
    regions: Vec<PlanRegion>,
}

impl TilePlan {
    /// Build the plan for a `width` x `height` raster.
    ///
    /// `top_tile` is the tile size of the top-level region; children compute
    /// their own sizes from their leftover rectangles, which are always
    /// strictly smaller. Child regions whose short side drops below
    /// `min_tile` become gap regions: they stay in the plan (and the ledger)
    /// but emit no tiles.
    ///
    /// # Errors
    /// Fails if `top_tile` is illegal, below `min_tile`, above `max_tile` or
    /// larger than the raster's short side.
    pub fn build(
        width: usize,
        height: usize,
        top_tile: usize,
        min_tile: usize,
        max_tile: usize,
    ) -> Result<Self, TilingError> {
        let legal = top_tile >= 2 && (top_tile - 1).is_power_of_two();
        if !legal
            || top_tile < min_tile
            || top_tile > max_tile
            || top_tile > width
            || top_tile > height
        {
            return Err(TilingError::BadTileSize { tile: top_tile, width, height });
        }

        let mut plan = Self { width, height, regions: Vec::new() };
        plan.subdivide(Rect::new(0, 0, width, height), top_tile, min_tile, 0);
        debug!(
            width,
            height,
            regions = plan.regions.len(),
            tiles = plan.tile_count(),
            "Built tile plan"
        );
        Ok(plan)
    }

    #[inline]
    #[must_use]
    pub fn regions(&self) -> &[PlanRegion] {
        &self.regions
    }

    /// Total tiles emitted per pass.
    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.regions.iter().map(PlanRegion::tile_count).sum()
    }

    /// Number of gap regions (uncovered raster pixels).
    #[must_use]
    pub fn gap_count(&self) -> usize {
        self.regions.iter().filter(|r| r.gap).count()
    }

    fn subdivide(&mut self, rect: Rect, tile: usize, min_tile: usize, depth: usize) {
        let id = self.regions.len();

        if tile < min_tile || tile > rect.w || tile > rect.h {
            warn!(
                region = id,
                rect = %rect,
                tile,
                "Leftover region below minimum tile size; its pixels are dropped"
            );
            self.regions.push(PlanRegion {
                id,
                rect,
                tile_size: tile,
                depth,
                grid_cols: 0,
                grid_rows: 0,
                gap: true,
            });
            return;
        }

        let cols = rect.w / tile;
        let rows = rect.h / tile;
        let covered_w = cols * tile;
        let covered_h = rows * tile;
        let leftover_w = rect.w - covered_w;
        let leftover_h = rect.h - covered_h;

        self.regions.push(PlanRegion {
            id,
            rect,
            tile_size: tile,
            depth,
            grid_cols: cols,
            grid_rows: rows,
            gap: false,
        });

        // The L-shaped leftover splits into a right strip and a bottom strip;
        // the corner block joins whichever strip has the larger extent, with
        // ties going right.
        let (right, bottom) = if leftover_w >= leftover_h {
            (
                Rect::new(rect.x + covered_w, rect.y, leftover_w, rect.h),
                Rect::new(rect.x, rect.y + covered_h, covered_w, leftover_h),
            )
        } else {
            (
                Rect::new(rect.x + covered_w, rect.y, leftover_w, covered_h),
                Rect::new(rect.x, rect.y + covered_h, rect.w, leftover_h),
            )
        };

        for child in [right, bottom] {
            if child.w == 0 || child.h == 0 {
                continue;
            }
            // Leftovers are < tile on their short side, so the child tile
            // size strictly decreases and recursion terminates.
            let child_tile = legal_tile_size_le(child.w.min(child.h)).unwrap_or(0);
            self.subdivide(child, child_tile, min_tile, depth + 1);
        }
    }

    /// Replay the plan for one pass, invoking `emit` for every tile of every
    /// non-gap region in a deterministic order.
    ///
    /// Every region (gaps included) is recorded in the ledger, so a height
    /// pass and a color pass over the same plan balance exactly.
    ///
    /// # Errors
    /// Fails on a ledger violation or on the first error `emit` returns.
    pub fn replay<E, F>(
        &self,
        pass: TilePass,
        ledger: &mut RegionLedger,
        mut emit: F,
    ) -> Result<(), E>
    where
        E: From<TilingError>,
        F: FnMut(&PlanRegion, TileEmit) -> Result<(), E>,
    {
        for region in &self.regions {
            ledger.record(pass, region.id)?;
            if region.gap {
                continue;
            }
            for grid_row in 0..region.grid_rows {
                for grid_col in 0..region.grid_cols {
                    let rect = Rect::new(
                        region.rect.x + grid_col * region.tile_size,
                        region.rect.y + grid_row * region.tile_size,
                        region.tile_size,
                        region.tile_size,
                    );
                    emit(
                        region,
                        TileEmit { region_id: region.id, grid_col, grid_row, rect },
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_tiles(plan: &TilePlan) -> Vec<TileEmit> {
        let mut ledger = RegionLedger::new();
        let mut tiles = Vec::new();
        plan.replay::<TilingError, _>(TilePass::Height, &mut ledger, |_, t| {
            tiles.push(t);
            Ok(())
        })
        .unwrap();
        tiles
    }

    #[test]
    fn test_legal_tile_size_le() {
        assert_eq!(legal_tile_size_le(0), None);
        assert_eq!(legal_tile_size_le(1), None);
        assert_eq!(legal_tile_size_le(2), Some(2));
        assert_eq!(legal_tile_size_le(3), Some(3));
        assert_eq!(legal_tile_size_le(65), Some(65));
        assert_eq!(legal_tile_size_le(100), Some(65));
        assert_eq!(legal_tile_size_le(513), Some(513));
        assert_eq!(legal_tile_size_le(1000), Some(513));
        assert_eq!(legal_tile_size_le(4097), Some(4097));
    }

    #[test]
    fn test_legal_tile_size_never_exceeds_input() {
        // 512 must give 257, not 513
        assert_eq!(legal_tile_size_le(512), Some(257));
        for d in 2..2000 {
            let s = legal_tile_size_le(d).unwrap();
            assert!(s <= d, "legal size {s} exceeds {d}");
            assert!((s - 1).is_power_of_two());
        }
    }

    #[test]
    fn test_exact_grid_has_single_region() {
        let plan = TilePlan::build(1026, 513, 513, 65, 4097).unwrap();
        assert_eq!(plan.regions().len(), 1);
        assert_eq!(plan.tile_count(), 2);
        assert_eq!(plan.gap_count(), 0);
        let tiles = collect_tiles(&plan);
        assert_eq!(tiles[0].rect, Rect::new(0, 0, 513, 513));
        assert_eq!(tiles[1].rect, Rect::new(513, 0, 513, 513));
    }

    #[test]
    fn test_rejects_illegal_top_tile() {
        assert!(matches!(
            TilePlan::build(1000, 1000, 512, 65, 4097),
            Err(TilingError::BadTileSize { .. })
        ));
        assert!(matches!(
            TilePlan::build(100, 100, 513, 65, 4097),
            Err(TilingError::BadTileSize { .. })
        ));
        assert!(matches!(
            TilePlan::build(1000, 1000, 33, 65, 4097),
            Err(TilingError::BadTileSize { .. })
        ));
    }

    #[test]
    fn test_coverage_is_disjoint_and_accounted() {
        // 1000x1000 with a 513 top tile leaves a 487-wide L to recurse into
        let plan = TilePlan::build(1000, 1000, 513, 65, 4097).unwrap();
        let tiles = collect_tiles(&plan);
        assert!(!tiles.is_empty());

        let mut covered = vec![false; 1000 * 1000];
        let mut tile_area = 0usize;
        for t in &tiles {
            assert!((t.rect.w - 1).is_power_of_two());
            assert_eq!(t.rect.w, t.rect.h);
            assert!(t.rect.fits_within(1000, 1000));
            tile_area += t.rect.area();
            for y in t.rect.y..t.rect.y + t.rect.h {
                for x in t.rect.x..t.rect.x + t.rect.w {
                    assert!(!covered[y * 1000 + x], "pixel {x},{y} covered twice");
                    covered[y * 1000 + x] = true;
                }
            }
        }

        let gap_area: usize =
            plan.regions().iter().filter(|r| r.gap).map(|r| r.rect.area()).sum();
        assert_eq!(tile_area + gap_area, 1000 * 1000);
    }

    #[test]
    fn test_corner_tie_goes_right() {
        // 1000x1000: leftovers are 487x487, the tie sends the corner right,
        // so the right child spans the full raster height
        let plan = TilePlan::build(1000, 1000, 513, 65, 4097).unwrap();
        let right = &plan.regions()[1];
        assert_eq!(right.rect, Rect::new(513, 0, 487, 1000));
        assert_eq!(right.depth, 1);
    }

    #[test]
    fn test_small_leftovers_become_gaps() {
        // 530x530: 513 grid leaves a 17-pixel L, below the 65 minimum
        let plan = TilePlan::build(530, 530, 513, 65, 4097).unwrap();
        assert!(plan.gap_count() > 0);
        let tiles = collect_tiles(&plan);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].rect, Rect::new(0, 0, 513, 513));
    }

    #[test]
    fn test_region_ids_are_stable_across_passes() {
        let plan = TilePlan::build(1000, 700, 513, 65, 4097).unwrap();
        let mut ledger = RegionLedger::new();

        let mut height_ids = Vec::new();
        plan.replay::<TilingError, _>(TilePass::Height, &mut ledger, |r, _| {
            height_ids.push(r.id);
            Ok(())
        })
        .unwrap();

        let mut color_ids = Vec::new();
        plan.replay::<TilingError, _>(TilePass::Color, &mut ledger, |r, _| {
            color_ids.push(r.id);
            Ok(())
        })
        .unwrap();

        assert_eq!(height_ids, color_ids);
        ledger.finish().unwrap();
    }

    #[test]
    fn test_ledger_detects_duplicate_height_pass() {
        let plan = TilePlan::build(513, 513, 513, 65, 4097).unwrap();
        let mut ledger = RegionLedger::new();
        plan.replay::<TilingError, _>(TilePass::Height, &mut ledger, |_, _| Ok(()))
            .unwrap();
        let err = plan
            .replay::<TilingError, _>(TilePass::Height, &mut ledger, |_, _| Ok(()))
            .unwrap_err();
        assert!(matches!(err, TilingError::DuplicateRegionId(0)));
    }

    #[test]
    fn test_ledger_detects_missing_color_pass() {
        let plan = TilePlan::build(513, 513, 513, 65, 4097).unwrap();
        let mut ledger = RegionLedger::new();
        plan.replay::<TilingError, _>(TilePass::Height, &mut ledger, |_, _| Ok(()))
            .unwrap();
        assert!(matches!(ledger.finish(), Err(TilingError::UnbalancedPasses(1))));
    }

    #[test]
    fn test_ledger_rejects_unknown_color_region() {
        let mut ledger = RegionLedger::new();
        assert!(matches!(
            ledger.record(TilePass::Color, 7),
            Err(TilingError::UnpairedRegionId(7))
        ));
    }

    #[test]
    fn test_replay_propagates_emit_error() {
        let plan = TilePlan::build(513, 513, 513, 65, 4097).unwrap();
        let mut ledger = RegionLedger::new();
        let err = plan
            .replay::<TilingError, _>(TilePass::Height, &mut ledger, |_, _| {
                Err(TilingError::UnbalancedPasses(99))
            })
            .unwrap_err();
        assert!(matches!(err, TilingError::UnbalancedPasses(99)));
    }

    #[test]
    fn test_depth_increases_monotonically() {
        let plan = TilePlan::build(2000, 1500, 1025, 65, 4097).unwrap();
        assert_eq!(plan.regions()[0].depth, 0);
        for r in plan.regions().iter().skip(1) {
            assert!(r.depth >= 1);
            assert!(r.tile_size < 1025 || r.gap);
        }
    }
}
