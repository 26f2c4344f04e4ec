//! Local raster operators backing the geospatial data service contract:
//! band algebra, masking, focal mode, quality mosaic and point reduction.

use ndarray::{Array2, Zip};
use num_traits::Float;
use std::collections::HashMap;

use crate::types::{AnnotError, AnnotResult, Band, GeoPoint, GeoTransform, Mask, Observation, Raster};

/// Approximate meters per degree of latitude
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Offsets of a circular structuring element of the given radius
pub fn circular_kernel(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    let mut offsets = Vec::new();
    for di in -r..=r {
        for dj in -r..=r {
            if di * di + dj * dj <= r * r {
                offsets.push((di, dj));
            }
        }
    }
    offsets
}

/// Majority filter over a binary image.
///
/// Each pixel takes the most frequent value among its in-bounds kernel
/// neighbours; ties go to 0.
pub fn focal_mode(image: &Array2<u8>, radius: usize, iterations: usize) -> Array2<u8> {
    let kernel = circular_kernel(radius);
    let (height, width) = image.dim();
    let mut result = image.clone();

    for _ in 0..iterations {
        let source = result.clone();
        for i in 0..height {
            for j in 0..width {
                let mut ones = 0usize;
                let mut total = 0usize;
                for &(di, dj) in &kernel {
                    let ii = i as isize + di;
                    let jj = j as isize + dj;
                    if ii >= 0 && ii < height as isize && jj >= 0 && jj < width as isize {
                        total += 1;
                        if source[[ii as usize, jj as usize]] != 0 {
                            ones += 1;
                        }
                    }
                }
                result[[i, j]] = u8::from(2 * ones > total);
            }
        }
    }

    result
}

/// `(a - b) / (a + b)`, masked where either input is masked or the sum is zero
pub fn normalized_difference(a: &Raster, b: &Raster, mask: &Mask) -> AnnotResult<(Raster, Mask)> {
    if a.dim() != b.dim() || a.dim() != mask.dim() {
        return Err(AnnotError::InvalidRaster(format!(
            "Normalized difference shape mismatch: {:?} vs {:?} (mask {:?})",
            a.dim(),
            b.dim(),
            mask.dim()
        )));
    }

    let mut index = Raster::zeros(a.dim());
    let mut valid = Mask::from_elem(a.dim(), false);

    Zip::from(&mut index)
        .and(&mut valid)
        .and(a)
        .and(b)
        .and(mask)
        .for_each(|out, ok, &x, &y, &m| {
            let sum = x + y;
            if m && sum != 0.0 && sum.is_finite() {
                *out = (x - y) / sum;
                *ok = true;
            }
        });

    Ok((index, valid))
}

/// Validity mask from a bit-flag band: valid where `bit` is clear
pub fn bit_clear_mask(flags: &Raster, bit: u32) -> Mask {
    let flag = 1u32 << bit;
    flags.mapv(|v| v.is_finite() && (v.max(0.0) as u32) & flag == 0)
}

/// Validity mask valid only where no flag at all is raised
pub fn all_clear_mask(flags: &Raster) -> Mask {
    flags.mapv(|v| v < 1.0)
}

/// Logical AND of two masks
pub fn combine_masks(a: &Mask, b: &Mask) -> AnnotResult<Mask> {
    if a.dim() != b.dim() {
        return Err(AnnotError::InvalidRaster(format!(
            "Cannot combine masks {:?} and {:?}",
            a.dim(),
            b.dim()
        )));
    }
    Ok(Zip::from(a).and(b).map_collect(|&x, &y| x && y))
}

/// Median of a slice, averaging the two middle values for even lengths
pub fn median<T: Float>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        let two = T::one() + T::one();
        Some((values[mid - 1] + values[mid]) / two)
    } else {
        Some(values[mid])
    }
}

/// Valid values of `raster` inside a square footprint of `scale_m` meters
/// centred on `point`. The pixel containing the point is always included.
pub fn footprint_values(
    raster: &Raster,
    mask: &Mask,
    transform: &GeoTransform,
    point: &GeoPoint,
    scale_m: f64,
) -> Vec<f32> {
    let dim = raster.dim();
    let half_lat = scale_m / 2.0 / METERS_PER_DEGREE;
    let cos_lat = point.lat.to_radians().cos().abs().max(1e-6);
    let half_lon = half_lat / cos_lat;

    let containing = transform.pixel_within(point, dim);
    let mut values = Vec::new();

    // Pixel window that can hold footprint centres
    let corner_a = transform.pixel_of(&GeoPoint::new(point.lon - half_lon, point.lat + half_lat));
    let corner_b = transform.pixel_of(&GeoPoint::new(point.lon + half_lon, point.lat - half_lat));
    let row_lo = corner_a.0.min(corner_b.0).max(0);
    let row_hi = corner_a.0.max(corner_b.0).min(dim.0 as isize - 1);
    let col_lo = corner_a.1.min(corner_b.1).max(0);
    let col_hi = corner_a.1.max(corner_b.1).min(dim.1 as isize - 1);

    for i in row_lo..=row_hi {
        for j in col_lo..=col_hi {
            let (i, j) = (i as usize, j as usize);
            let centre = transform.pixel_center(i, j);
            let inside = (centre.lon - point.lon).abs() <= half_lon
                && (centre.lat - point.lat).abs() <= half_lat;
            if (inside || containing == Some((i, j))) && mask[[i, j]] {
                let v = raster[[i, j]];
                if v.is_finite() {
                    values.push(v);
                }
            }
        }
    }

    // The containing pixel may sit outside the row/col window on coarse grids
    if let Some((i, j)) = containing {
        let in_window = (i as isize) >= row_lo
            && (i as isize) <= row_hi
            && (j as isize) >= col_lo
            && (j as isize) <= col_hi;
        if !in_window && mask[[i, j]] && raster[[i, j]].is_finite() {
            values.push(raster[[i, j]]);
        }
    }

    values
}

/// One observation resampled onto a target grid
#[derive(Debug, Clone)]
pub struct MosaicLayer {
    pub quality: Raster,
    pub bands: HashMap<Band, Raster>,
    pub mask: Mask,
}

/// Nearest-neighbour resample of `bands` and a quality band of `observation`
/// onto the grid `(transform, dim)`. Pixels outside the observation or
/// masked in `valid` are invalid.
pub fn resample_nearest(
    observation: &Observation,
    valid: &Mask,
    bands: &[Band],
    quality: &Raster,
    transform: &GeoTransform,
    dim: (usize, usize),
) -> AnnotResult<MosaicLayer> {
    let source_dim = observation.dim();
    let mut sources = Vec::with_capacity(bands.len());
    for &band in bands {
        sources.push((band, observation.band(band)?));
    }

    let mut out_quality = Raster::zeros(dim);
    let mut out_bands: HashMap<Band, Raster> =
        bands.iter().map(|&b| (b, Raster::zeros(dim))).collect();
    let mut out_mask = Mask::from_elem(dim, false);

    for i in 0..dim.0 {
        for j in 0..dim.1 {
            let centre = transform.pixel_center(i, j);
            let Some((si, sj)) = observation.transform.pixel_within(&centre, source_dim) else {
                continue;
            };
            if !valid[[si, sj]] {
                continue;
            }
            out_quality[[i, j]] = quality[[si, sj]];
            for (band, source) in &sources {
                if let Some(target) = out_bands.get_mut(band) {
                    target[[i, j]] = source[[si, sj]];
                }
            }
            out_mask[[i, j]] = true;
        }
    }

    Ok(MosaicLayer {
        quality: out_quality,
        bands: out_bands,
        mask: out_mask,
    })
}

/// Per-pixel arg-max over `layers` by quality.
///
/// Returns the selected band values, the union mask and, per pixel, the
/// index of the winning layer. Ties keep the earlier layer.
pub fn quality_mosaic(
    layers: &[MosaicLayer],
    bands: &[Band],
    dim: (usize, usize),
) -> (HashMap<Band, Raster>, Mask, Array2<Option<usize>>) {
    let mut winners: Array2<Option<usize>> = Array2::from_elem(dim, None);

    let pick = |i: usize, j: usize| -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (k, layer) in layers.iter().enumerate() {
            if !layer.mask[[i, j]] {
                continue;
            }
            let q = layer.quality[[i, j]];
            if !q.is_finite() {
                continue;
            }
            match best {
                Some((_, best_q)) if q <= best_q => {}
                _ => best = Some((k, q)),
            }
        }
        best.map(|(k, _)| k)
    };

    #[cfg(feature = "parallel")]
    {
        use ndarray::Axis;
        use rayon::prelude::*;

        winners
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut row)| {
                for (j, cell) in row.iter_mut().enumerate() {
                    *cell = pick(i, j);
                }
            });
    }

    #[cfg(not(feature = "parallel"))]
    {
        for ((i, j), cell) in winners.indexed_iter_mut() {
            *cell = pick(i, j);
        }
    }

    let mut out: HashMap<Band, Raster> = bands.iter().map(|&b| (b, Raster::zeros(dim))).collect();
    for (&band, target) in out.iter_mut() {
        for ((i, j), winner) in winners.indexed_iter() {
            if let Some(k) = *winner {
                if let Some(source) = layers[k].bands.get(&band) {
                    target[[i, j]] = source[[i, j]];
                }
            }
        }
    }
    let mask = winners.mapv(|w| w.is_some());

    (out, mask, winners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_circular_kernel_unit_radius_is_cross() {
        let kernel = circular_kernel(1);
        assert_eq!(kernel.len(), 5);
        assert!(kernel.contains(&(0, 0)));
        assert!(kernel.contains(&(-1, 0)));
        assert!(!kernel.contains(&(1, 1)));
    }

    #[test]
    fn test_focal_mode_removes_isolated_pixel() {
        let mut image = Array2::<u8>::zeros((5, 5));
        image[[2, 2]] = 1;
        let smoothed = focal_mode(&image, 1, 1);
        assert_eq!(smoothed[[2, 2]], 0);
        assert!(smoothed.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_focal_mode_fills_isolated_hole() {
        let mut image = Array2::<u8>::ones((5, 5));
        image[[2, 2]] = 0;
        let smoothed = focal_mode(&image, 1, 1);
        assert!(smoothed.iter().all(|&v| v == 1));
    }

    #[test]
    fn test_focal_mode_border_uses_in_bounds_neighbours() {
        let image = array![[1u8, 1, 0], [0, 0, 0], [0, 0, 0]];
        let smoothed = focal_mode(&image, 1, 1);
        // Corner sees itself and two neighbours: 2 of 3 valid
        assert_eq!(smoothed[[0, 0]], 1);
        // Edge sees four pixels: 2 of 4 is a tie and goes to invalid
        assert_eq!(smoothed[[0, 1]], 0);

        let full = Array2::<u8>::ones((3, 3));
        assert!(focal_mode(&full, 1, 1).iter().all(|&v| v == 1));
    }

    #[test]
    fn test_normalized_difference() {
        let nir = array![[3000.0f32, 1000.0], [0.0, 500.0]];
        let red = array![[1000.0f32, 1000.0], [0.0, 1500.0]];
        let mask = Mask::from_elem((2, 2), true);

        let (ndvi, valid) = normalized_difference(&nir, &red, &mask).unwrap();
        assert_relative_eq!(ndvi[[0, 0]], 0.5);
        assert_relative_eq!(ndvi[[0, 1]], 0.0);
        assert!(!valid[[1, 0]], "zero denominator must be masked");
        assert_relative_eq!(ndvi[[1, 1]], -0.5);
    }

    #[test]
    fn test_bit_clear_mask() {
        let qa = array![[0.0f32, 1.0], [1024.0, 1025.0]];
        let mask = bit_clear_mask(&qa, 0);
        assert_eq!(mask, array![[true, false], [true, false]]);
        assert_eq!(all_clear_mask(&qa), array![[true, false], [false, false]]);
    }

    #[test]
    fn test_median() {
        assert_eq!(median::<f32>(&mut []), None);
        assert_eq!(median(&mut [3.0f32, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0f64, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn test_footprint_values_contains_point_pixel() {
        // 0.001 degree pixels are far coarser than a 10 m footprint
        let transform = GeoTransform::new(30.0, 50.0, 0.001, -0.001);
        let raster = Raster::from_shape_fn((4, 4), |(i, j)| (i * 4 + j) as f32);
        let mask = Mask::from_elem((4, 4), true);
        let point = GeoPoint::new(30.0015, 49.9975);

        let values = footprint_values(&raster, &mask, &transform, &point, 10.0);
        assert_eq!(values, vec![9.0]);

        let masked = Mask::from_elem((4, 4), false);
        assert!(footprint_values(&raster, &masked, &transform, &point, 10.0).is_empty());
    }

    #[test]
    fn test_quality_mosaic_picks_highest_quality() {
        let dim = (1, 2);
        let layer = |q: [f32; 2], v: f32| MosaicLayer {
            quality: Raster::from_shape_vec(dim, q.to_vec()).unwrap(),
            bands: [(Band::B2, Raster::from_elem(dim, v))].into_iter().collect(),
            mask: Mask::from_elem(dim, true),
        };
        let layers = vec![layer([5.0, 1.0], 10.0), layer([3.0, 7.0], 20.0)];

        let (bands, mask, winners) = quality_mosaic(&layers, &[Band::B2], dim);
        assert_eq!(bands[&Band::B2], array![[10.0f32, 20.0]]);
        assert!(mask.iter().all(|&v| v));
        assert_eq!(winners[[0, 0]], Some(0));
        assert_eq!(winners[[0, 1]], Some(1));
    }

    #[test]
    fn test_quality_mosaic_ties_keep_first_layer() {
        let dim = (1, 1);
        let layer = |v: f32| MosaicLayer {
            quality: Raster::from_elem(dim, 9700.0),
            bands: [(Band::B2, Raster::from_elem(dim, v))].into_iter().collect(),
            mask: Mask::from_elem(dim, true),
        };

        let (bands, _, winners) = quality_mosaic(&[layer(10.0), layer(20.0)], &[Band::B2], dim);
        assert_eq!(winners[[0, 0]], Some(0));
        assert_eq!(bands[&Band::B2][[0, 0]], 10.0);

        let (bands, _, _) = quality_mosaic(&[layer(20.0), layer(10.0)], &[Band::B2], dim);
        assert_eq!(bands[&Band::B2][[0, 0]], 20.0);
    }
}
