//! Overlapping tile geometry for the multi-scale object pass.

/// One tile placement in source-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Compute tile placements of `tile x tile` with `stride`, covering every
/// pixel. Edge tiles are pushed inward (or clipped, for images smaller than
/// the tile) so the union is always the full frame.
pub fn tile_grid(width: u32, height: u32, tile: u32, stride: u32) -> Vec<Tile> {
    if width == 0 || height == 0 || tile == 0 || stride == 0 {
        return Vec::new();
    }

    let xs = axis_offsets(width, tile, stride);
    let ys = axis_offsets(height, tile, stride);

    let mut tiles = Vec::with_capacity(xs.len() * ys.len());
    for &y in &ys {
        for &x in &xs {
            tiles.push(Tile {
                x,
                y,
                w: tile.min(width - x),
                h: tile.min(height - y),
            });
        }
    }
    tiles
}

/// Tile offsets along one axis. Degenerates to `[0]` when the axis fits in
/// one tile.
fn axis_offsets(extent: u32, tile: u32, stride: u32) -> Vec<u32> {
    if extent <= tile {
        return vec![0];
    }
    let mut offsets = Vec::new();
    let mut pos = 0u32;
    loop {
        if pos + tile >= extent {
            offsets.push(extent - tile);
            break;
        }
        offsets.push(pos);
        pos += stride;
    }
    offsets
}

/// Fraction of pixels covered by the union of tiles, as a percentage.
/// With any grid produced by [`tile_grid`] this is exactly 100.
pub fn coverage_pct(tiles: &[Tile], width: u32, height: u32) -> f64 {
    if width == 0 || height == 0 {
        return 0.0;
    }
    // Union area via a row sweep; tile counts are small.
    let mut covered = 0u64;
    for y in 0..height {
        let mut intervals: Vec<(u32, u32)> = tiles
            .iter()
            .filter(|t| t.y <= y && y < t.y + t.h)
            .map(|t| (t.x, t.x + t.w))
            .collect();
        intervals.sort_unstable();
        let mut last_end = 0u32;
        for (start, end) in intervals {
            let start = start.max(last_end);
            if end > start {
                covered += (end - start) as u64;
                last_end = end;
            }
        }
    }
    100.0 * covered as f64 / (width as u64 * height as u64) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grid_covers_everything() {
        let tiles = tile_grid(1920, 1080, 512, 256);
        assert!((coverage_pct(&tiles, 1920, 1080) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn odd_dimensions_still_cover() {
        let tiles = tile_grid(1000, 700, 512, 256);
        assert!((coverage_pct(&tiles, 1000, 700) - 100.0).abs() < 1e-9);
        // Edge tiles stay in bounds.
        for t in &tiles {
            assert!(t.x + t.w <= 1000);
            assert!(t.y + t.h <= 700);
        }
    }

    #[test]
    fn tiny_image_degenerates_to_one_tile() {
        let tiles = tile_grid(320, 240, 512, 256);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0], Tile { x: 0, y: 0, w: 320, h: 240 });
        assert!((coverage_pct(&tiles, 320, 240) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn stride_produces_overlap() {
        let tiles = tile_grid(768, 512, 512, 256);
        // Two offsets horizontally (0, 256), one vertically.
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].x, 0);
        assert_eq!(tiles[1].x, 256);
    }
}
