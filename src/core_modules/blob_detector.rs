// THEORY:
// The `BlobDetector` is the engine of the spatial grouping step. It turns the binary
// foreground mask of one frame into a list of `StreamBlob`s and then picks the single
// blob most likely to be the espresso stream.
//
// Algorithm steps:
// 1.  **Component labeling**: 8-connected foreground components are grown with a
//     breadth-first search, discovered in raster order of their first pixel. This order is
//     the tie-break order for candidate selection, so it is deterministic.
// 2.  **External only**: background reachable from outside the image (4-connected, since
//     foreground is 8-connected) is flood-filled. A component counts only if it touches that
//     exterior background or the image edge; components sitting inside another
//     component's hole are ignored.
// 3.  **Outer contour**: the outer border of each component is traced through pixel
//     centers and its polygon area computed with the shoelace formula. A single pixel or a
//     one-pixel-wide line encloses no area.
// 4.  **Shape filter & ranking**: blobs that are too short, too narrow, too small or not
//     tall-and-thin enough are discarded. Survivors are ranked by area, penalized by their
//     horizontal distance from the region center (reflections and rim highlights sit off
//     center). Only a strictly higher score replaces the current best.
//
// The detector is a stateless utility with no memory of previous frames.

use crate::config::Thresholds;
use crate::core_modules::mask::MASK_OFF;
use crate::core_modules::stream_blob::StreamBlob;
use image::GrayImage;
use std::collections::VecDeque;

/// Weight of the off-center penalty in the candidate score.
const CENTER_PENALTY: f64 = 0.7;

/// 8-neighborhood in clockwise screen order (y grows downward), starting east.
const DIRECTIONS: [(i64, i64); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];
const WEST: usize = 4;

const UNLABELED: usize = usize::MAX;

/// Finds every external connected component of `mask`.
pub fn find_blobs(mask: &GrayImage) -> Vec<StreamBlob> {
    let (w, h) = (mask.width() as usize, mask.height() as usize);
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let foreground: Vec<bool> = mask.as_raw().iter().map(|&v| v != MASK_OFF).collect();
    let exterior = exterior_background(&foreground, w, h);

    let mut labels = vec![UNLABELED; w * h];
    let mut blobs = Vec::new();
    let mut next_label = 0;

    for start in 0..w * h {
        if !foreground[start] || labels[start] != UNLABELED {
            continue;
        }
        let label = next_label;
        next_label += 1;

        // --- Region growing ---
        let mut queue = VecDeque::from([start]);
        labels[start] = label;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (usize::MAX, usize::MAX, 0, 0);
        let mut pixel_count = 0;
        let mut is_external = false;

        while let Some(index) = queue.pop_front() {
            let (x, y) = (index % w, index / w);
            pixel_count += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                is_external = true;
            }

            for (dx, dy) in DIRECTIONS {
                let Some(neighbor) = offset(x, y, dx, dy, w, h) else {
                    continue;
                };
                if foreground[neighbor] {
                    if labels[neighbor] == UNLABELED {
                        labels[neighbor] = label;
                        queue.push_back(neighbor);
                    }
                } else if (dx == 0 || dy == 0) && exterior[neighbor] {
                    is_external = true;
                }
            }
        }

        if !is_external {
            continue;
        }

        let contour = trace_outer_contour(&labels, label, (start % w, start / w), w, h);
        blobs.push(StreamBlob {
            id: label,
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
            area: polygon_area(&contour),
            pixel_count,
        });
    }

    blobs
}

/// Picks the blob most likely to be the stream, or `None` when nothing passes the filter.
pub fn best_candidate(blobs: &[StreamBlob], region_width: u32, thresholds: &Thresholds) -> Option<StreamBlob> {
    let mut best: Option<&StreamBlob> = None;
    let mut best_score = 0.0;

    for blob in blobs.iter().filter(|b| passes_shape_filter(b, thresholds)) {
        let score = candidate_score(blob.center_x(), region_width, blob.area.trunc());
        if score > best_score {
            best_score = score;
            best = Some(blob);
        }
    }

    best.cloned()
}

/// Height, width, area and aspect checks.
pub fn passes_shape_filter(blob: &StreamBlob, thresholds: &Thresholds) -> bool {
    if blob.height < thresholds.min_height || blob.width < 2 {
        return false;
    }
    if blob.area.trunc() < thresholds.min_area as f64 {
        return false;
    }
    blob.aspect() >= thresholds.min_aspect
}

/// `area * (1 - 0.7 * d)`, where `d` is the horizontal offset of the blob center from the
/// region midline, normalized by half the region width.
pub fn candidate_score(center_x: f64, region_width: u32, area: f64) -> f64 {
    let half_width = region_width as f64 / 2.0;
    let distance = (center_x - half_width).abs() / half_width.max(1.0);
    area * (1.0 - CENTER_PENALTY * distance)
}

#[inline]
fn offset(x: usize, y: usize, dx: i64, dy: i64, w: usize, h: usize) -> Option<usize> {
    let nx = x as i64 + dx;
    let ny = y as i64 + dy;
    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
        return None;
    }
    Some(ny as usize * w + nx as usize)
}

/// Background pixels 4-connected to the image edge.
fn exterior_background(foreground: &[bool], w: usize, h: usize) -> Vec<bool> {
    let mut exterior = vec![false; w * h];
    let mut queue = VecDeque::new();
    let edge = (0..w).flat_map(|x| [x, (h - 1) * w + x]).chain((0..h).flat_map(|y| [y * w, y * w + w - 1]));
    for index in edge {
        if !foreground[index] && !exterior[index] {
            exterior[index] = true;
            queue.push_back(index);
        }
    }
    while let Some(index) = queue.pop_front() {
        let (x, y) = (index % w, index / w);
        for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            if let Some(neighbor) = offset(x, y, dx, dy, w, h) {
                if !foreground[neighbor] && !exterior[neighbor] {
                    exterior[neighbor] = true;
                    queue.push_back(neighbor);
                }
            }
        }
    }
    exterior
}

/// Traces the outer border of component `label`, starting from its first raster pixel.
/// Returns the border pixels in walking order; a lone pixel yields just itself.
fn trace_outer_contour(labels: &[usize], label: usize, start: (usize, usize), w: usize, h: usize) -> Vec<(i64, i64)> {
    let member = |(x, y): (i64, i64)| -> bool {
        x >= 0 && y >= 0 && (x as usize) < w && (y as usize) < h && labels[y as usize * w + x as usize] == label
    };
    let step = |(x, y): (i64, i64), d: usize| (x + DIRECTIONS[d].0, y + DIRECTIONS[d].1);
    let direction_to = |from: (i64, i64), to: (i64, i64)| -> usize {
        let delta = (to.0 - from.0, to.1 - from.1);
        DIRECTIONS.iter().position(|&d| d == delta).unwrap_or(WEST)
    };

    let start = (start.0 as i64, start.1 as i64);

    // The west neighbor of the first raster pixel is never part of the component; sweep
    // clockwise from there for the first border neighbor.
    let Some(first) = (0..8)
        .map(|i| step(start, (WEST + i) % 8))
        .find(|&p| member(p))
    else {
        return vec![start];
    };

    let mut contour = Vec::new();
    let mut previous = first;
    let mut current = start;
    loop {
        let back = direction_to(current, previous);
        let next = (1..=8)
            .map(|i| step(current, (back + 8 - i) % 8))
            .find(|&p| member(p))
            .unwrap_or(previous);
        contour.push(current);
        if next == start && current == first {
            break;
        }
        previous = current;
        current = next;
    }
    contour
}

/// Shoelace area of a closed polygon.
fn polygon_area(points: &[(i64, i64)]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.0 * b.1 - b.0 * a.1)
        .sum();
    twice.abs() as f64 / 2.0
}
