use crate::coverage::morphology::Mask;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Outer shape of one connected foreground region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Pixels enclosed by the outer boundary, holes included.
    pub area: usize,
    pub bbox: BoundingBox,
}

/// Outermost blobs of a mask.
///
/// Foreground is 8-connected. Holes (background not 4-reachable from the image
/// border) are counted as part of the enclosing blob, and shapes nested inside
/// a hole are absorbed by it.
pub fn external_blobs(mask: &Mask) -> Vec<Blob> {
    let filled = fill_holes(mask);
    let (width, height) = (filled.width(), filled.height());
    let mut seen = vec![false; width * height];
    let mut blobs = Vec::new();
    let mut queue = VecDeque::new();

    for start_y in 0..height {
        for start_x in 0..width {
            let start = start_y * width + start_x;
            if seen[start] || !filled.get(start_x, start_y) {
                continue;
            }
            seen[start] = true;
            queue.push_back((start_x, start_y));
            let mut area = 0usize;
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (start_x, start_y, start_x, start_y);

            while let Some((x, y)) = queue.pop_front() {
                area += 1;
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);
                for (nx, ny) in neighbors(x, y, width, height, true) {
                    let index = ny * width + nx;
                    if !seen[index] && filled.get(nx, ny) {
                        seen[index] = true;
                        queue.push_back((nx, ny));
                    }
                }
            }

            blobs.push(Blob {
                area,
                bbox: BoundingBox {
                    x: min_x as u32,
                    y: min_y as u32,
                    width: (max_x - min_x + 1) as u32,
                    height: (max_y - min_y + 1) as u32,
                },
            });
        }
    }
    blobs
}

fn fill_holes(mask: &Mask) -> Mask {
    let (width, height) = (mask.width(), mask.height());
    let mut outside = vec![false; width * height];
    let mut queue = VecDeque::new();

    for y in 0..height {
        for x in 0..width {
            let on_border = x == 0 || y == 0 || x + 1 == width || y + 1 == height;
            if on_border && !mask.get(x, y) {
                outside[y * width + x] = true;
                queue.push_back((x, y));
            }
        }
    }
    while let Some((x, y)) = queue.pop_front() {
        for (nx, ny) in neighbors(x, y, width, height, false) {
            let index = ny * width + nx;
            if !outside[index] && !mask.get(nx, ny) {
                outside[index] = true;
                queue.push_back((nx, ny));
            }
        }
    }

    Mask::from_fn(width, height, |x, y| !outside[y * width + x])
}

fn neighbors(
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    diagonal: bool,
) -> impl Iterator<Item = (usize, usize)> {
    const OFFSETS: [(isize, isize); 8] = [
        (-1, 0),
        (1, 0),
        (0, -1),
        (0, 1),
        (-1, -1),
        (1, -1),
        (-1, 1),
        (1, 1),
    ];
    let take = if diagonal { 8 } else { 4 };
    OFFSETS.into_iter().take(take).filter_map(move |(dx, dy)| {
        let nx = x.checked_add_signed(dx)?;
        let ny = y.checked_add_signed(dy)?;
        (nx < width && ny < height).then_some((nx, ny))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separate_regions_become_separate_blobs() {
        let mask = Mask::from_fn(20, 20, |x, y| (x < 3 && y < 3) || (x >= 10 && y >= 12));
        let blobs = external_blobs(&mask);

        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].area, 9);
        assert_eq!(
            blobs[1].bbox,
            BoundingBox {
                x: 10,
                y: 12,
                width: 10,
                height: 8
            }
        );
    }

    #[test]
    fn diagonal_pixels_are_connected() {
        let mask = Mask::from_fn(5, 5, |x, y| x == y);
        let blobs = external_blobs(&mask);

        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].area, 5);
    }

    #[test]
    fn ring_counts_its_hole_and_absorbs_inner_shape() {
        // 10x10 ring, 1 px thick, with a single pixel in the middle of the hole.
        let mask = Mask::from_fn(16, 16, |x, y| {
            let inside = (3..13).contains(&x) && (3..13).contains(&y);
            let hole = (4..12).contains(&x) && (4..12).contains(&y);
            (inside && !hole) || (x == 8 && y == 8)
        });
        let blobs = external_blobs(&mask);

        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].area, 100);
    }

    #[test]
    fn empty_mask_has_no_blobs() {
        assert!(external_blobs(&Mask::new(8, 8)).is_empty());
    }
}
