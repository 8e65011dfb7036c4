//! Contrast limited adaptive histogram equalization of 8-bit planes.

use image::GrayImage;
use rayon::prelude::*;

/// Tiles per image axis.
pub const CLAHE_GRID: usize = 8;

const BINS: usize = 256;

/// Equalize one 8-bit plane with an 8x8 tile grid.
///
/// `clip_limit` is relative to a uniform tile histogram: a bin may hold at
/// most `clip_limit * tile_area / 256` counts (at least one), the excess is
/// spread evenly over all bins. Pixel values are interpolated bilinearly
/// between the mappings of the four nearest tile centers.
pub fn equalize_clahe(plane: &GrayImage, clip_limit: f32) -> GrayImage {
    let width = plane.width() as usize;
    let height = plane.height() as usize;
    if width == 0 || height == 0 {
        return plane.clone();
    }

    let tile_w = width.div_ceil(CLAHE_GRID);
    let tile_h = height.div_ceil(CLAHE_GRID);
    let cols = width.div_ceil(tile_w);
    let rows = height.div_ceil(tile_h);
    let pixels = plane.as_raw();

    let luts: Vec<[u8; BINS]> = (0..rows * cols)
        .into_par_iter()
        .map(|tile| {
            let (ty, tx) = (tile / cols, tile % cols);
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; BINS];
            for y in y0..y1 {
                for &v in &pixels[y * width + x0..y * width + x1] {
                    hist[v as usize] += 1;
                }
            }

            let area = (x1 - x0) * (y1 - y0);
            clip_histogram(&mut hist, area, clip_limit);
            tile_lut(&hist, area)
        })
        .collect();

    let center = |index: usize, size: usize| (index as f32 + 0.5) * size as f32;

    let mut out = vec![0u8; width * height];
    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let fy = y as f32 / tile_h as f32 - 0.5;
        let ty0 = (fy.floor().max(0.0) as usize).min(rows - 1);
        let ty1 = (ty0 + 1).min(rows - 1);
        let ay = if ty0 == ty1 {
            0.0
        } else {
            ((y as f32 - center(ty0, tile_h)) / tile_h as f32).clamp(0.0, 1.0)
        };

        for (x, dst) in row.iter_mut().enumerate() {
            let fx = x as f32 / tile_w as f32 - 0.5;
            let tx0 = (fx.floor().max(0.0) as usize).min(cols - 1);
            let tx1 = (tx0 + 1).min(cols - 1);
            let ax = if tx0 == tx1 {
                0.0
            } else {
                ((x as f32 - center(tx0, tile_w)) / tile_w as f32).clamp(0.0, 1.0)
            };

            let v = pixels[y * width + x] as usize;
            let v00 = f32::from(luts[ty0 * cols + tx0][v]);
            let v10 = f32::from(luts[ty0 * cols + tx1][v]);
            let v01 = f32::from(luts[ty1 * cols + tx0][v]);
            let v11 = f32::from(luts[ty1 * cols + tx1][v]);

            let top = v00 * (1.0 - ax) + v10 * ax;
            let bottom = v01 * (1.0 - ax) + v11 * ax;
            *dst = (top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8;
        }
    });

    GrayImage::from_raw(width as u32, height as u32, out).unwrap_or_else(|| plane.clone())
}

fn clip_histogram(hist: &mut [u32; BINS], area: usize, clip_limit: f32) {
    let limit = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let per_bin = excess / BINS as u32;
    let residual = (excess % BINS as u32) as usize;
    for bin in hist.iter_mut() {
        *bin += per_bin;
    }
    if residual > 0 {
        let step = (BINS / residual).max(1);
        for bin in hist.iter_mut().step_by(step).take(residual) {
            *bin += 1;
        }
    }
}

fn tile_lut(hist: &[u32; BINS], area: usize) -> [u8; BINS] {
    let scale = 255.0 / area.max(1) as f32;
    let mut lut = [0u8; BINS];
    let mut sum = 0u32;
    for (entry, &count) in lut.iter_mut().zip(hist.iter()) {
        sum += count;
        *entry = (sum as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}
