// THEORY:
// The `region` module is the stateless spatial-grouping layer of the
// detector. It takes a raw foreground mask (which is inevitably noisy at
// the pixel level) and turns it into a short list of coherent regions with
// the aggregate properties the decision logic actually needs: area,
// bounding box and center.
//
// Key architectural principles:
// 1.  **Noise First, Structure Second**: Masks are cleaned before any
//     grouping happens: a morphological opening removes speckle and a
//     closing fills small holes, using a structuring element equivalent to
//     a 5x5 ellipse (L2 norm, radius 2).
// 2.  **Area as Significance**: A region's pixel count is its significance.
//     Anything below the caller's minimum area is camera noise by
//     definition and never reaches the verdict.
// 3.  **Stateless Utility**: Both functions map one frame's mask to one
//     frame's regions. All temporal reasoning lives elsewhere.

use image::{GrayImage, Luma};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::rect::Rect;
use imageproc::region_labelling::{connected_components, Connectivity};

/// Radius of the structuring element used for opening and closing.
/// An L2 ball of radius 2 matches the classic 5x5 elliptical kernel.
const KERNEL_RADIUS: u8 = 2;

/// A connected foreground region extracted from a cleaned mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Region size in pixels.
    pub area: u32,
    /// Tight bounding box around the region.
    pub bounding_box: Rect,
    /// Pixel-centroid of the region.
    pub center: (u32, u32),
}

/// Binarizes a mask and applies morphological opening then closing to
/// remove speckle noise and close small holes. Shadow pixels must already
/// be zeroed by the caller; every non-zero pixel is treated as foreground.
pub fn clean_mask(mask: &GrayImage) -> GrayImage {
    let binary = threshold(mask, 0, ThresholdType::Binary);
    let opened = open(&binary, Norm::L2, KERNEL_RADIUS);
    close(&opened, Norm::L2, KERNEL_RADIUS)
}

/// Extracts all connected regions (8-connectivity) with at least `min_area`
/// pixels from a cleaned binary mask, sorted largest first.
pub fn find_regions(mask: &GrayImage, min_area: u32) -> Vec<Region> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    // Label 0 is background; component labels are dense from 1.
    let max_label = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
    if max_label == 0 {
        return Vec::new();
    }

    struct Accumulator {
        area: u32,
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
        sum_x: u64,
        sum_y: u64,
    }
    let mut accumulators: Vec<Option<Accumulator>> = (0..max_label).map(|_| None).collect();

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        let acc = accumulators[(label - 1) as usize].get_or_insert_with(|| Accumulator {
            area: 0,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            sum_x: 0,
            sum_y: 0,
        });
        acc.area += 1;
        acc.min_x = acc.min_x.min(x);
        acc.min_y = acc.min_y.min(y);
        acc.max_x = acc.max_x.max(x);
        acc.max_y = acc.max_y.max(y);
        acc.sum_x += x as u64;
        acc.sum_y += y as u64;
    }

    let mut regions: Vec<Region> = accumulators
        .into_iter()
        .flatten()
        .filter(|acc| acc.area >= min_area)
        .map(|acc| Region {
            area: acc.area,
            bounding_box: Rect::at(acc.min_x as i32, acc.min_y as i32).of_size(
                acc.max_x - acc.min_x + 1,
                acc.max_y - acc.min_y + 1,
            ),
            center: (
                (acc.sum_x / acc.area as u64) as u32,
                (acc.sum_y / acc.area as u64) as u32,
            ),
        })
        .collect();

    regions.sort_by(|a, b| b.area.cmp(&a.area));
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with_block(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> GrayImage {
        let mut mask = GrayImage::new(w, h);
        for y in y0..y1 {
            for x in x0..x1 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask
    }

    #[test]
    fn cleaning_removes_single_pixel_speckle() {
        let mut mask = GrayImage::new(16, 16);
        mask.put_pixel(8, 8, Luma([255]));
        let cleaned = clean_mask(&mask);
        assert!(cleaned.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn cleaning_preserves_a_solid_block() {
        let mask = mask_with_block(20, 20, 4, 4, 12, 12);
        let cleaned = clean_mask(&mask);
        assert_eq!(cleaned.get_pixel(8, 8)[0], 255);
    }

    #[test]
    fn regions_report_area_and_bounding_box() {
        let mask = mask_with_block(20, 20, 3, 5, 8, 9);
        let regions = find_regions(&mask, 1);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 5 * 4);
        assert_eq!(regions[0].bounding_box, Rect::at(3, 5).of_size(5, 4));
        assert_eq!(regions[0].center, (5, 6));
    }

    #[test]
    fn regions_below_min_area_are_dropped() {
        let mut mask = mask_with_block(30, 30, 2, 2, 10, 10);
        // Second, smaller blob.
        for y in 20..23 {
            for x in 20..23 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let all = find_regions(&mask, 1);
        assert_eq!(all.len(), 2);
        // Sorted largest first.
        assert!(all[0].area > all[1].area);

        let large_only = find_regions(&mask, 10);
        assert_eq!(large_only.len(), 1);
        assert_eq!(large_only[0].area, 64);
    }
}
