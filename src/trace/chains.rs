//! Linking of thin pixel masks into polylines.

use super::{Point, RasterOrder};

const NEIGHBORS: [(isize, isize); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Per-pixel unit direction used to steer linking along a flow field.
pub type Guide<'a> = Option<&'a [(f32, f32)]>;

/// Link set pixels of `mask` into chains. Seeds are visited in `order`; each
/// pixel belongs to at most one chain. With a guide, linking prefers the
/// neighbor best aligned with the local flow direction, otherwise with the
/// current heading.
pub fn trace_chains(
    mask: &[bool],
    width: usize,
    height: usize,
    order: RasterOrder,
    guide: Guide<'_>,
) -> Vec<Vec<Point>> {
    let mut visited = vec![false; mask.len()];
    let mut chains = Vec::new();

    for (x, y) in order.coordinates(width as u32, height as u32) {
        let seed = y as usize * width + x as usize;
        if !mask[seed] || visited[seed] {
            continue;
        }
        visited[seed] = true;

        let forward = follow(mask, &mut visited, width, height, seed, None, guide);
        let heading = forward
            .first()
            .map(|&next| direction(seed, next, width))
            .map(|(dx, dy)| (-dx, -dy));
        let backward = follow(mask, &mut visited, width, height, seed, heading, guide);

        let mut chain: Vec<Point> = backward.iter().rev().map(|&i| to_point(i, width)).collect();
        chain.push(to_point(seed, width));
        chain.extend(forward.iter().map(|&i| to_point(i, width)));
        chains.push(chain);
    }
    chains
}

fn to_point(index: usize, width: usize) -> Point {
    Point::new((index % width) as f32, (index / width) as f32)
}

fn direction(from: usize, to: usize, width: usize) -> (f32, f32) {
    let (fx, fy) = ((from % width) as f32, (from / width) as f32);
    let (tx, ty) = ((to % width) as f32, (to / width) as f32);
    let (dx, dy) = (tx - fx, ty - fy);
    let len = (dx * dx + dy * dy).sqrt().max(f32::EPSILON);
    (dx / len, dy / len)
}

fn follow(
    mask: &[bool],
    visited: &mut [bool],
    width: usize,
    height: usize,
    start: usize,
    initial_heading: Option<(f32, f32)>,
    guide: Guide<'_>,
) -> Vec<usize> {
    let mut path = Vec::new();
    let mut current = start;
    let mut heading = initial_heading;

    loop {
        let (cx, cy) = ((current % width) as isize, (current / width) as isize);
        let preferred = match (guide, heading) {
            (Some(field), Some((hx, hy))) => {
                let (gx, gy) = field[current];
                // Flow directions are unsigned; align with the heading.
                if gx * hx + gy * hy < 0.0 {
                    Some((-gx, -gy))
                } else {
                    Some((gx, gy))
                }
            }
            (Some(field), None) => Some(field[current]),
            (None, h) => h,
        };

        let mut best: Option<(usize, f32)> = None;
        for (dx, dy) in NEIGHBORS {
            let (nx, ny) = (cx + dx, cy + dy);
            if nx < 0 || ny < 0 || nx >= width as isize || ny >= height as isize {
                continue;
            }
            let n = ny as usize * width + nx as usize;
            if !mask[n] || visited[n] {
                continue;
            }
            let len = ((dx * dx + dy * dy) as f32).sqrt();
            let score = match preferred {
                Some((px, py)) => (dx as f32 * px + dy as f32 * py) / len,
                // 4-connected steps first.
                None => 1.0 / len,
            };
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((n, score));
            }
        }

        match best {
            Some((next, _)) => {
                visited[next] = true;
                heading = Some(direction(current, next, width));
                path.push(next);
                current = next;
            }
            None => break,
        }
    }
    path
}
