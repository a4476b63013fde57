//! Polygon rasterization onto a raster grid.
//!
//! Scanline fill at cell centers (even-odd rule per polygon, so holes are
//! honored), optionally followed by burning every cell that a ring edge passes
//! through. The second pass gives "all touched" semantics: any cell the
//! geometry touches is part of the mask.

use crate::raster::GeoTransform;
use geo_types::{LineString, MultiPolygon, Polygon};
use ndarray::Array2;

/// Boolean mask of the cells of a `rows` x `cols` grid covered by `geometry`.
///
/// Geometry coordinates must be in the same CRS as `transform`.
pub fn rasterize_mask(
    geometry: &MultiPolygon<f64>,
    transform: &GeoTransform,
    rows: usize,
    cols: usize,
    all_touched: bool,
) -> Array2<bool> {
    let mut mask = Array2::from_elem((rows, cols), false);
    if rows == 0 || cols == 0 {
        return mask;
    }

    for polygon in &geometry.0 {
        let rings = pixel_rings(polygon, transform);
        fill_polygon(&rings, &mut mask);
        if all_touched {
            for ring in &rings {
                for edge in ring.windows(2) {
                    burn_segment(edge[0], edge[1], &mut mask);
                }
            }
        }
    }

    mask
}

type Px = (f64, f64);

/// Rings of one polygon converted to fractional (col, row) pixel space.
fn pixel_rings(polygon: &Polygon<f64>, transform: &GeoTransform) -> Vec<Vec<Px>> {
    let convert = |ring: &LineString<f64>| -> Vec<Px> {
        let mut pts: Vec<Px> = ring
            .0
            .iter()
            .map(|c| transform.geo_to_pixel(c.x, c.y))
            .collect();
        if pts.len() > 1 && pts.first() != pts.last() {
            pts.push(pts[0]);
        }
        pts
    };

    std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .map(convert)
        .collect()
}

struct Edge {
    y_min: f64,
    y_max: f64,
    x_at_y_min: f64,
    dx_dy: f64,
}

/// Even-odd scanline fill sampling each cell at its center.
fn fill_polygon(rings: &[Vec<Px>], mask: &mut Array2<bool>) {
    let (rows, cols) = mask.dim();

    let mut edges: Vec<Edge> = rings
        .iter()
        .flat_map(|ring| ring.windows(2))
        .filter_map(|w| {
            let (p, q) = (w[0], w[1]);
            if p.1 == q.1 || !p.1.is_finite() || !q.1.is_finite() {
                return None;
            }
            let (lo, hi) = if p.1 < q.1 { (p, q) } else { (q, p) };
            Some(Edge {
                y_min: lo.1,
                y_max: hi.1,
                x_at_y_min: lo.0,
                dx_dy: (hi.0 - lo.0) / (hi.1 - lo.1),
            })
        })
        .collect();

    if edges.is_empty() {
        return;
    }
    edges.sort_by(|a, b| a.y_min.total_cmp(&b.y_min));

    let first_row = edges[0].y_min.floor().max(0.0) as usize;
    let last_row = edges
        .iter()
        .map(|e| e.y_max)
        .fold(f64::NEG_INFINITY, f64::max)
        .ceil()
        .clamp(0.0, rows as f64) as usize;

    let mut next_edge = 0;
    let mut active: Vec<usize> = Vec::new();
    let mut crossings: Vec<f64> = Vec::new();

    for row in first_row..last_row {
        let yc = row as f64 + 0.5;

        while next_edge < edges.len() && edges[next_edge].y_min <= yc {
            active.push(next_edge);
            next_edge += 1;
        }
        active.retain(|&i| edges[i].y_max > yc);

        crossings.clear();
        crossings.extend(
            active
                .iter()
                .map(|&i| &edges[i])
                .filter(|e| e.y_min <= yc)
                .map(|e| e.x_at_y_min + (yc - e.y_min) * e.dx_dy),
        );
        crossings.sort_by(f64::total_cmp);

        for pair in crossings.chunks_exact(2) {
            // Cells whose center x lies in [x0, x1).
            let start = (pair[0] - 0.5).ceil().max(0.0);
            let end = (pair[1] - 0.5).ceil().min(cols as f64);
            if start >= end {
                continue;
            }
            for col in start as usize..end as usize {
                mask[(row, col)] = true;
            }
        }
    }
}

/// Mark every cell crossed by the segment p-q (grid traversal).
fn burn_segment(p: Px, q: Px, mask: &mut Array2<bool>) {
    let (rows, cols) = mask.dim();
    let Some((p, q)) = clip_segment(p, q, cols as f64, rows as f64) else {
        return;
    };

    let dx = q.0 - p.0;
    let dy = q.1 - p.1;

    let mut cx = p.0.floor() as i64;
    let mut cy = p.1.floor() as i64;
    let end_x = q.0.floor() as i64;
    let end_y = q.1.floor() as i64;

    let step_x = if dx > 0.0 { 1 } else { -1 };
    let step_y = if dy > 0.0 { 1 } else { -1 };

    let t_delta_x = if dx != 0.0 { 1.0 / dx.abs() } else { f64::INFINITY };
    let t_delta_y = if dy != 0.0 { 1.0 / dy.abs() } else { f64::INFINITY };

    let mut t_max_x = if dx > 0.0 {
        ((cx + 1) as f64 - p.0) / dx
    } else if dx < 0.0 {
        (p.0 - cx as f64) / -dx
    } else {
        f64::INFINITY
    };
    let mut t_max_y = if dy > 0.0 {
        ((cy + 1) as f64 - p.1) / dy
    } else if dy < 0.0 {
        (p.1 - cy as f64) / -dy
    } else {
        f64::INFINITY
    };

    let steps = (end_x - cx).abs() + (end_y - cy).abs();
    let mut mark = |x: i64, y: i64| {
        if x >= 0 && y >= 0 && (x as usize) < cols && (y as usize) < rows {
            mask[(y as usize, x as usize)] = true;
        }
    };

    mark(cx, cy);
    for _ in 0..steps {
        if t_max_x < t_max_y {
            cx += step_x;
            t_max_x += t_delta_x;
        } else {
            cy += step_y;
            t_max_y += t_delta_y;
        }
        mark(cx, cy);
    }
}

/// Liang-Barsky clip of p-q against `[0, width] x [0, height]`.
fn clip_segment(p: Px, q: Px, width: f64, height: f64) -> Option<(Px, Px)> {
    if !(p.0.is_finite() && p.1.is_finite() && q.0.is_finite() && q.1.is_finite()) {
        return None;
    }

    let dx = q.0 - p.0;
    let dy = q.1 - p.1;
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;

    for (denom, num) in [(-dx, p.0), (dx, width - p.0), (-dy, p.1), (dy, height - p.1)] {
        if denom == 0.0 {
            if num < 0.0 {
                return None;
            }
            continue;
        }
        let t = num / denom;
        if denom < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }

    Some((
        (p.0 + t0 * dx, p.1 + t0 * dy),
        (p.0 + t1 * dx, p.1 + t1 * dy),
    ))
}
