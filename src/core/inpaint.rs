//! Fast-marching inpainting after Telea.
//!
//! Masked pixels are filled in order of increasing distance from the mask
//! boundary. Each pixel is estimated from the already-known pixels inside
//! `radius`, weighted by direction against the marching front, geometric
//! distance, and front-level proximity.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::Tile;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Known,
    Band,
    Inside,
}

/// Min-heap entry ordered by front distance.
struct FrontPixel {
    dist: f32,
    y: usize,
    x: usize,
}

impl PartialEq for FrontPixel {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist
    }
}

impl Eq for FrontPixel {}

impl PartialOrd for FrontPixel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontPixel {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap pops the smallest distance first.
        other.dist.total_cmp(&self.dist)
    }
}

const FOUR_NEIGHBOURS: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Solve the quadrant eikonal update from two optional known neighbours.
fn eikonal(a: Option<f32>, b: Option<f32>) -> f32 {
    match (a, b) {
        (Some(a), Some(b)) => {
            let delta = a - b;
            if delta.abs() < 1.0 {
                let s = 2.0 - delta * delta;
                0.5 * (a + b + s.sqrt())
            } else {
                a.min(b) + 1.0
            }
        }
        (Some(a), None) | (None, Some(a)) => a + 1.0,
        (None, None) => f32::MAX,
    }
}

/// Inpaint `img` where `mask` is non-zero, returning the filled image.
/// `radius` bounds the neighbourhood contributing to each estimate.
pub fn inpaint_telea(img: &Tile<f32>, mask: &Tile<u8>, radius: f64) -> Tile<f32> {
    let (rows, cols) = img.dim();
    assert_eq!(mask.dim(), (rows, cols), "mask must match image shape");
    let radius = radius.max(1.0) as f32;

    let mut out = img.clone();
    let mut state = Tile::from_elem((rows, cols), State::Known);
    let mut dist = Tile::from_elem((rows, cols), 0f32);
    let mut heap = BinaryHeap::new();

    for ((y, x), &m) in mask.indexed_iter() {
        if m != 0 {
            state[[y, x]] = State::Inside;
            dist[[y, x]] = f32::MAX;
        }
    }

    // Seed the narrow band with masked pixels touching known territory.
    for ((y, x), &m) in mask.indexed_iter() {
        if m == 0 {
            continue;
        }
        let touches_known = FOUR_NEIGHBOURS.iter().any(|&(dy, dx)| {
            let ny = y as isize + dy;
            let nx = x as isize + dx;
            ny >= 0
                && nx >= 0
                && (ny as usize) < rows
                && (nx as usize) < cols
                && state[[ny as usize, nx as usize]] == State::Known
        });
        if touches_known {
            state[[y, x]] = State::Band;
            dist[[y, x]] = 0.0;
            heap.push(FrontPixel { dist: 0.0, y, x });
        }
    }

    while let Some(FrontPixel { y, x, .. }) = heap.pop() {
        if state[[y, x]] == State::Known {
            continue;
        }
        state[[y, x]] = State::Known;
        let value = estimate(&out, &dist, &state, y, x, radius);
        out[[y, x]] = value;

        for &(dy, dx) in &FOUR_NEIGHBOURS {
            let ny = y as isize + dy;
            let nx = x as isize + dx;
            if ny < 0 || nx < 0 || ny as usize >= rows || nx as usize >= cols {
                continue;
            }
            let (ny, nx) = (ny as usize, nx as usize);
            if state[[ny, nx]] == State::Known {
                continue;
            }
            let horizontal = eikonal(
                known_dist(&dist, &state, ny, nx.wrapping_sub(1)),
                known_dist(&dist, &state, ny, nx + 1),
            );
            let vertical = eikonal(
                known_dist(&dist, &state, ny.wrapping_sub(1), nx),
                known_dist(&dist, &state, ny + 1, nx),
            );
            let solved = horizontal.min(vertical);
            if solved < dist[[ny, nx]] {
                dist[[ny, nx]] = solved;
                state[[ny, nx]] = State::Band;
                heap.push(FrontPixel {
                    dist: solved,
                    y: ny,
                    x: nx,
                });
            }
        }
    }
    out
}

fn known_dist(dist: &Tile<f32>, state: &Tile<State>, y: usize, x: usize) -> Option<f32> {
    // wrapping_sub(1) at the edge lands far above the bound, so one check
    // covers both underflow and overflow.
    if y >= dist.nrows() || x >= dist.ncols() {
        return None;
    }
    if state[[y, x]] == State::Known {
        Some(dist[[y, x]])
    } else {
        None
    }
}

/// Telea estimate: weighted average of known pixels in the radius, with
/// direction, distance, and level weights against the front normal.
fn estimate(
    out: &Tile<f32>,
    dist: &Tile<f32>,
    state: &Tile<State>,
    y: usize,
    x: usize,
    radius: f32,
) -> f32 {
    let (rows, cols) = out.dim();
    let reach = radius.ceil() as isize;
    let t_here = dist[[y, x]];

    // Front normal from the distance field, central differences where
    // possible.
    let grad = |field: &Tile<f32>, y: usize, x: usize| -> (f32, f32) {
        let gy = if y > 0 && y + 1 < rows {
            (field[[y + 1, x]] - field[[y - 1, x]]) * 0.5
        } else {
            0.0
        };
        let gx = if x > 0 && x + 1 < cols {
            (field[[y, x + 1]] - field[[y, x - 1]]) * 0.5
        } else {
            0.0
        };
        (gy, gx)
    };
    let (ny_grad, nx_grad) = grad(dist, y, x);

    // Image gradient at a known pixel, central differences restricted to
    // known neighbours; flat when either side is unknown.
    let image_grad = |qy: usize, qx: usize| -> (f32, f32) {
        let known = |yy: usize, xx: usize| {
            yy < rows && xx < cols && state[[yy, xx]] == State::Known
        };
        let gy = if qy > 0 && known(qy - 1, qx) && known(qy + 1, qx) {
            (out[[qy + 1, qx]] - out[[qy - 1, qx]]) * 0.5
        } else {
            0.0
        };
        let gx = if qx > 0 && known(qy, qx - 1) && known(qy, qx + 1) {
            (out[[qy, qx + 1]] - out[[qy, qx - 1]]) * 0.5
        } else {
            0.0
        };
        (gy, gx)
    };

    let mut weight_sum = 0f64;
    let mut value_sum = 0f64;
    for dy in -reach..=reach {
        for dx in -reach..=reach {
            if dy == 0 && dx == 0 {
                continue;
            }
            let qy = y as isize + dy;
            let qx = x as isize + dx;
            if qy < 0 || qx < 0 || qy as usize >= rows || qx as usize >= cols {
                continue;
            }
            let (qy, qx) = (qy as usize, qx as usize);
            if state[[qy, qx]] != State::Known {
                continue;
            }
            let r2 = (dy * dy + dx * dx) as f32;
            if r2.sqrt() > radius {
                continue;
            }

            let dir = ((dy as f32 * ny_grad + dx as f32 * nx_grad) / r2.sqrt())
                .abs()
                .max(1e-6);
            let dst = 1.0 / r2;
            let lev = 1.0 / (1.0 + (t_here - dist[[qy, qx]]).abs());
            let w = (dir * dst * lev) as f64;

            // First-order extrapolation from q towards p (r = p - q).
            let (gy, gx) = image_grad(qy, qx);
            let value = out[[qy, qx]] - gy * dy as f32 - gx * dx as f32;

            weight_sum += w;
            value_sum += w * value as f64;
        }
    }

    if weight_sum > 0.0 {
        (value_sum / weight_sum) as f32
    } else {
        out[[y, x]]
    }
}
