// ============================================================================
// STROKE GEOMETRY — variable-width outline, ear-clip mesh, boundary edges
// ============================================================================

use bytemuck::{Pod, Zeroable};

use crate::log_warn;

/// Fixed minimum bounds padding, canvas units.
pub const MIN_MARGIN: f32 = 4.0;
/// Proportional bounds padding: margin = max(MIN_MARGIN, diagonal * factor).
pub const MARGIN_FACTOR: f32 = 0.05;
/// Floor for the pressure-thinned width factor, so heavy thinning never
/// collapses the outline to zero width.
const MIN_WIDTH_FRACTION: f32 = 0.05;
/// Points per semicircular end cap.
const CAP_SEGMENTS: usize = 8;
/// Points merged during outlining when closer than this.
const MERGE_EPSILON: f32 = 0.01;

// ============================================================================
// INPUT TYPES
// ============================================================================

/// One normalized pointer sample as delivered by the input layer.
#[derive(Clone, Copy, Debug)]
pub struct Sample {
    pub x: f32,
    pub y: f32,
    /// Normalized 0..1.
    pub pressure: f32,
    pub tilt_x: f32,
    pub tilt_y: f32,
    pub twist: f32,
    /// Milliseconds, host clock.
    pub timestamp: f64,
}

impl Sample {
    pub fn at(x: f32, y: f32, pressure: f32) -> Self {
        Self {
            x,
            y,
            pressure,
            tilt_x: 0.0,
            tilt_y: 0.0,
            twist: 0.0,
            timestamp: 0.0,
        }
    }
}

/// A resolved local-space point with pressure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokePoint {
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
}

// ============================================================================
// BOUNDS
// ============================================================================

/// Axis-aligned bounding box, padded before any GPU work is issued.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Bounds {
    pub fn empty() -> Self {
        Self {
            min_x: f32::INFINITY,
            min_y: f32::INFINITY,
            max_x: f32::NEG_INFINITY,
            max_y: f32::NEG_INFINITY,
        }
    }

    pub fn include(&mut self, x: f32, y: f32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn diagonal(&self) -> f32 {
        self.width().hypot(self.height())
    }

    pub fn is_positive(&self) -> bool {
        self.width() > 0.0 && self.height() > 0.0
    }

    pub fn expanded(&self, margin: f32) -> Self {
        let m = margin.max(0.0);
        Self {
            min_x: self.min_x - m,
            min_y: self.min_y - m,
            max_x: self.max_x + m,
            max_y: self.max_y + m,
        }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Field-grid dimensions at the given oversample factor.  `None` for
    /// empty bounds — a dimension that would clamp to 1 texel means there is
    /// nothing to render, so no GPU resources should be created for it.
    pub fn grid_size(&self, oversample: u32) -> Option<(u32, u32)> {
        if !self.is_positive() {
            return None;
        }
        let os = oversample.max(1);
        let w = ((self.width().ceil() as u32).max(1)) * os;
        let h = ((self.height().ceil() as u32).max(1)) * os;
        Some((w.max(1), h.max(1)))
    }
}

// ============================================================================
// OUTPUT TYPES
// ============================================================================

/// One outline segment with its outward unit normal.  Layout matches the
/// `Edge` struct in the WGSL shaders (three vec2s, 24 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BoundaryEdge {
    pub a: [f32; 2],
    pub b: [f32; 2],
    pub normal: [f32; 2],
}

/// Triangulated render mesh (positions + triangle indices).
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn area(&self) -> f32 {
        let mut sum = 0.0;
        for tri in self.indices.chunks_exact(3) {
            let a = self.vertices[tri[0] as usize];
            let b = self.vertices[tri[1] as usize];
            let c = self.vertices[tri[2] as usize];
            sum += ((b[0] - a[0]) * (c[1] - a[1]) - (c[0] - a[0]) * (b[1] - a[1])).abs() * 0.5;
        }
        sum
    }
}

/// Everything the GPU stages need for one finalized stroke.
#[derive(Clone, Debug)]
pub struct StrokeGeometry {
    pub outline: Vec<[f32; 2]>,
    pub mesh: Mesh,
    pub edges: Vec<BoundaryEdge>,
    pub bounds: Bounds,
}

// ============================================================================
// WIDTH & FILTERING
// ============================================================================

/// Local half-width of the stroke at one point.  At `thinning == 0` the
/// width is constant; as thinning rises, low pressure pulls the width down
/// harder.  The factor is floored so the outline never collapses.
pub fn half_width(size: f32, thinning: f32, pressure: f32) -> f32 {
    let t = thinning.clamp(0.0, 1.0);
    let p = pressure.clamp(0.0, 1.0);
    let factor = (1.0 - 2.0 * t * (1.0 - p)).clamp(MIN_WIDTH_FRACTION, 1.0);
    size * 0.5 * factor
}

/// Streamline pass: each point is pulled toward the previous filtered point;
/// then `smoothing` neighbor-averaging passes.  Both leave endpoints pinned.
fn filter_points(points: &[StrokePoint], smoothing: f32, streamline: f32) -> Vec<StrokePoint> {
    if points.len() < 2 {
        return points.to_vec();
    }
    let pull = streamline.clamp(0.0, 1.0) * 0.85;
    let mut out = Vec::with_capacity(points.len());
    let mut prev = points[0];
    out.push(prev);
    for p in &points[1..] {
        prev = StrokePoint {
            x: prev.x + (p.x - prev.x) * (1.0 - pull),
            y: prev.y + (p.y - prev.y) * (1.0 - pull),
            pressure: prev.pressure + (p.pressure - prev.pressure) * (1.0 - pull),
        };
        out.push(prev);
    }
    let passes = (smoothing.clamp(0.0, 1.0) * 2.0).round() as usize;
    for _ in 0..passes {
        let snapshot = out.clone();
        for i in 1..snapshot.len() - 1 {
            let (a, b, c) = (snapshot[i - 1], snapshot[i], snapshot[i + 1]);
            out[i] = StrokePoint {
                x: a.x * 0.25 + b.x * 0.5 + c.x * 0.25,
                y: a.y * 0.25 + b.y * 0.5 + c.y * 0.25,
                pressure: a.pressure * 0.25 + b.pressure * 0.5 + c.pressure * 0.25,
            };
        }
    }
    out
}

/// Drop points closer together than `MERGE_EPSILON` (keeps the higher
/// pressure of a merged pair).
fn dedupe(points: &[StrokePoint]) -> Vec<StrokePoint> {
    let mut out: Vec<StrokePoint> = Vec::with_capacity(points.len());
    for p in points {
        match out.last_mut() {
            Some(last) if (p.x - last.x).hypot(p.y - last.y) < MERGE_EPSILON => {
                last.pressure = last.pressure.max(p.pressure);
            }
            _ => out.push(*p),
        }
    }
    out
}

// ============================================================================
// OUTLINE
// ============================================================================

fn unit_dir(from: StrokePoint, to: StrokePoint) -> (f32, f32) {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let len = dx.hypot(dy);
    if len > 0.0 { (dx / len, dy / len) } else { (1.0, 0.0) }
}

/// Closed variable-width outline polygon around the filtered spine.
/// Semicircular caps at both ends; per-point half-width from pressure.
fn build_outline(points: &[StrokePoint], size: f32, thinning: f32) -> Vec<[f32; 2]> {
    let n = points.len();
    debug_assert!(n >= 2);
    let mut left = Vec::with_capacity(n);
    let mut right = Vec::with_capacity(n);
    let mut normals = Vec::with_capacity(n);
    for i in 0..n {
        let dir = if i == 0 {
            unit_dir(points[0], points[1])
        } else if i == n - 1 {
            unit_dir(points[n - 2], points[n - 1])
        } else {
            unit_dir(points[i - 1], points[i + 1])
        };
        let normal = (-dir.1, dir.0);
        let hw = half_width(size, thinning, points[i].pressure);
        left.push([points[i].x + normal.0 * hw, points[i].y + normal.1 * hw]);
        right.push([points[i].x - normal.0 * hw, points[i].y - normal.1 * hw]);
        normals.push((normal, dir, hw));
    }

    let mut outline = Vec::with_capacity(2 * n + 2 * CAP_SEGMENTS);
    outline.extend_from_slice(&left);

    // End cap: sweep from +normal to -normal through the forward direction.
    let (en, ed, ehw) = normals[n - 1];
    let ep = points[n - 1];
    for k in 1..CAP_SEGMENTS {
        let phi = std::f32::consts::PI * k as f32 / CAP_SEGMENTS as f32;
        let (s, c) = phi.sin_cos();
        outline.push([ep.x + ehw * (c * en.0 + s * ed.0), ep.y + ehw * (c * en.1 + s * ed.1)]);
    }

    for p in right.iter().rev() {
        outline.push(*p);
    }

    // Start cap: sweep from -normal back to +normal through the backward direction.
    let (sn, sd, shw) = normals[0];
    let sp = points[0];
    for k in 1..CAP_SEGMENTS {
        let phi = std::f32::consts::PI * k as f32 / CAP_SEGMENTS as f32;
        let (s, c) = phi.sin_cos();
        outline.push([
            sp.x + shw * (c * -sn.0 + s * -sd.0),
            sp.y + shw * (c * -sn.1 + s * -sd.1),
        ]);
    }

    ensure_ccw(outline)
}

/// Circle outline for a deliberate single-dot stroke.
fn dot_outline(p: StrokePoint, size: f32, thinning: f32) -> Vec<[f32; 2]> {
    let r = half_width(size, thinning, p.pressure);
    let segments = 16;
    let mut outline = Vec::with_capacity(segments);
    for k in 0..segments {
        let phi = std::f32::consts::TAU * k as f32 / segments as f32;
        outline.push([p.x + r * phi.cos(), p.y + r * phi.sin()]);
    }
    ensure_ccw(outline)
}

pub fn signed_area(outline: &[[f32; 2]]) -> f32 {
    let n = outline.len();
    let mut sum = 0.0;
    for i in 0..n {
        let a = outline[i];
        let b = outline[(i + 1) % n];
        sum += a[0] * b[1] - b[0] * a[1];
    }
    sum * 0.5
}

fn ensure_ccw(mut outline: Vec<[f32; 2]>) -> Vec<[f32; 2]> {
    if signed_area(&outline) < 0.0 {
        outline.reverse();
    }
    outline
}

// ============================================================================
// TRIANGULATION (ear clipping)
// ============================================================================

fn cross(o: [f32; 2], a: [f32; 2], b: [f32; 2]) -> f32 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

fn point_in_triangle(p: [f32; 2], a: [f32; 2], b: [f32; 2], c: [f32; 2]) -> bool {
    let d1 = cross(a, b, p);
    let d2 = cross(b, c, p);
    let d3 = cross(c, a, p);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Ear-clip the (CCW) outline into a triangle mesh.  Outlines that defeat
/// ear clipping (self-intersections from sharp pressure spikes) fall back to
/// a fan so a mesh is always produced.
pub fn triangulate(outline: &[[f32; 2]]) -> Mesh {
    let n = outline.len();
    let mut mesh = Mesh {
        vertices: outline.to_vec(),
        indices: Vec::with_capacity(n.saturating_sub(2) * 3),
    };
    if n < 3 {
        return mesh;
    }
    let mut remaining: Vec<u32> = (0..n as u32).collect();
    while remaining.len() > 3 {
        let m = remaining.len();
        let mut clipped = false;
        for i in 0..m {
            let ip = remaining[(i + m - 1) % m] as usize;
            let ic = remaining[i] as usize;
            let inx = remaining[(i + 1) % m] as usize;
            let (a, b, c) = (outline[ip], outline[ic], outline[inx]);
            if cross(a, b, c) <= 0.0 {
                continue; // reflex corner
            }
            let blocked = remaining.iter().any(|&j| {
                let j = j as usize;
                j != ip && j != ic && j != inx && point_in_triangle(outline[j], a, b, c)
            });
            if blocked {
                continue;
            }
            mesh.indices
                .extend_from_slice(&[ip as u32, ic as u32, inx as u32]);
            remaining.remove(i);
            clipped = true;
            break;
        }
        if !clipped {
            log_warn!(
                "ear clipping stalled at {} vertices; falling back to fan",
                remaining.len()
            );
            for w in 1..remaining.len() - 1 {
                mesh.indices
                    .extend_from_slice(&[remaining[0], remaining[w], remaining[w + 1]]);
            }
            return mesh;
        }
    }
    mesh.indices
        .extend_from_slice(&[remaining[0], remaining[1], remaining[2]]);
    mesh
}

// ============================================================================
// EDGES & BOUNDS
// ============================================================================

/// Ordered boundary edges (consecutive outline vertex pairs) with outward
/// unit normals.  These are the seed primitives for the distance field.
pub fn extract_edges(outline: &[[f32; 2]]) -> Vec<BoundaryEdge> {
    let n = outline.len();
    let mut edges = Vec::with_capacity(n);
    for i in 0..n {
        let a = outline[i];
        let b = outline[(i + 1) % n];
        let dx = b[0] - a[0];
        let dy = b[1] - a[1];
        let len = dx.hypot(dy);
        if len < MERGE_EPSILON {
            continue;
        }
        // For a CCW polygon, (dy, -dx) points out of the shape.
        edges.push(BoundaryEdge {
            a,
            b,
            normal: [dy / len, -dx / len],
        });
    }
    edges
}

pub fn compute_bounds(outline: &[[f32; 2]]) -> Bounds {
    let mut bounds = Bounds::empty();
    for p in outline {
        bounds.include(p[0], p[1]);
    }
    let margin = MIN_MARGIN.max(bounds.diagonal() * MARGIN_FACTOR);
    bounds.expanded(margin)
}

// ============================================================================
// BUILDER
// ============================================================================

/// Accumulates resolved local points for one stroke and produces the full
/// geometry on finalize.
pub struct StrokeGeometryBuilder {
    points: Vec<StrokePoint>,
    /// Set at start; a stroke that never receives a second distinct point is
    /// a deliberate dot rather than degenerate input.
    dot_candidate: bool,
}

impl StrokeGeometryBuilder {
    pub fn start(point: StrokePoint) -> Self {
        Self {
            points: vec![point],
            dot_candidate: true,
        }
    }

    pub fn add_point(&mut self, point: StrokePoint) {
        if let Some(last) = self.points.last()
            && (point.x - last.x).hypot(point.y - last.y) >= MERGE_EPSILON
        {
            self.dot_candidate = false;
        }
        self.points.push(point);
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[StrokePoint] {
        &self.points
    }

    /// Cheap outline for live preview: decimated spine, no smoothing passes,
    /// no triangulation.
    pub fn preview_outline(&self, size: f32, thinning: f32) -> Vec<[f32; 2]> {
        let spine = dedupe(&self.points);
        if spine.len() < 2 {
            return spine
                .first()
                .map(|p| dot_outline(*p, size, thinning))
                .unwrap_or_default();
        }
        let stride = (spine.len() / 64).max(1);
        let mut decimated: Vec<StrokePoint> = spine.iter().copied().step_by(stride).collect();
        if let Some(&tail) = spine.last()
            && decimated.last() != Some(&tail)
        {
            decimated.push(tail);
        }
        build_outline(&decimated, size, thinning)
    }

    /// Full geometry build.  Returns `None` for degenerate input: fewer than
    /// two distinct points without being a deliberate dot, or empty bounds.
    /// The caller must not reach the GPU stages on `None`.
    pub fn finalize(
        &self,
        size: f32,
        params: &crate::settings::SmoothingParams,
    ) -> Option<StrokeGeometry> {
        let spine = dedupe(&filter_points(
            &self.points,
            params.smoothing,
            params.streamline,
        ));
        let outline = if spine.len() >= 2 {
            build_outline(&spine, size, params.thinning)
        } else if self.dot_candidate && spine.len() == 1 {
            dot_outline(spine[0], size, params.thinning)
        } else {
            return None;
        };
        if outline.len() < 3 {
            return None;
        }
        let bounds = compute_bounds(&outline);
        if !bounds.is_positive() {
            return None;
        }
        let edges = extract_edges(&outline);
        if edges.is_empty() {
            return None;
        }
        let mesh = triangulate(&outline);
        Some(StrokeGeometry {
            outline,
            mesh,
            edges,
            bounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SmoothingParams;

    fn raw_params(thinning: f32) -> SmoothingParams {
        SmoothingParams {
            thinning,
            smoothing: 0.0,
            streamline: 0.0,
        }
    }

    fn builder_from(points: &[(f32, f32, f32)]) -> StrokeGeometryBuilder {
        let mut it = points.iter();
        let (x, y, p) = *it.next().expect("need at least one point");
        let mut b = StrokeGeometryBuilder::start(StrokePoint { x, y, pressure: p });
        for &(x, y, p) in it {
            b.add_point(StrokePoint { x, y, pressure: p });
        }
        b
    }

    #[test]
    fn half_width_tracks_pressure_at_half_thinning() {
        assert!((half_width(10.0, 0.5, 0.5) - 2.5).abs() < 1e-5);
        assert!((half_width(10.0, 0.5, 0.8) - 4.0).abs() < 1e-5);
        assert!((half_width(10.0, 0.5, 0.3) - 1.5).abs() < 1e-5);
    }

    #[test]
    fn half_width_constant_without_thinning() {
        for p in [0.0, 0.3, 1.0] {
            assert!((half_width(10.0, 0.0, p) - 5.0).abs() < 1e-5);
        }
    }

    #[test]
    fn half_width_never_collapses() {
        assert!(half_width(10.0, 1.0, 0.0) > 0.0);
    }

    #[test]
    fn pressure_scenario_outline_and_bounds() {
        let b = builder_from(&[(0.0, 0.0, 0.5), (10.0, 0.0, 0.8), (20.0, 0.0, 0.3)]);
        let geo = b.finalize(10.0, &raw_params(0.5)).expect("valid stroke");
        // Bounds must cover the whole spine plus at most the configured margin.
        let margin = MIN_MARGIN.max(geo.bounds.diagonal() * MARGIN_FACTOR) + 4.01 /* max half width */;
        assert!(geo.bounds.contains(0.0, 0.0));
        assert!(geo.bounds.contains(20.0, 0.0));
        assert!(geo.bounds.min_x >= -margin && geo.bounds.max_x <= 20.0 + margin);
        assert!(geo.bounds.min_y >= -margin && geo.bounds.max_y <= margin);
        // Outline half-width at the middle of the stroke tracks pressure:
        // the widest span sits near x=10 where pressure is 0.8.
        let near_mid: Vec<_> = geo
            .outline
            .iter()
            .filter(|p| (p[0] - 10.0).abs() < 2.0)
            .collect();
        assert!(!near_mid.is_empty());
        let max_mid = near_mid.iter().map(|p| p[1].abs()).fold(0.0, f32::max);
        assert!((max_mid - 4.0).abs() < 0.5, "mid half-width = {}", max_mid);
    }

    #[test]
    fn outline_bbox_contains_all_input_points() {
        let pts = [
            (0.0, 0.0, 0.5),
            (5.0, 8.0, 0.6),
            (-3.0, 12.0, 0.7),
            (9.0, 20.0, 0.4),
        ];
        let b = builder_from(&pts);
        let geo = b.finalize(6.0, &raw_params(0.3)).expect("valid stroke");
        for (x, y, _) in pts {
            assert!(geo.bounds.contains(x, y), "({}, {}) outside bounds", x, y);
        }
    }

    #[test]
    fn degenerate_input_returns_none() {
        // Two coincident points is not a deliberate dot once add_point is
        // called with a distinct-then-merged position history; but a true
        // empty stroke is simply the builder with filtered-out spine.
        let mut b = builder_from(&[(1.0, 1.0, 0.5)]);
        b.add_point(StrokePoint {
            x: 50.0,
            y: 50.0,
            pressure: 0.0,
        });
        // Distinct second point: not a dot, two points — valid.
        assert!(b.finalize(4.0, &raw_params(0.0)).is_some());

        // A single repeated point with dot_candidate cleared is degenerate.
        let mut c = builder_from(&[(1.0, 1.0, 0.5)]);
        c.dot_candidate = false;
        assert!(c.finalize(4.0, &raw_params(0.0)).is_none());
    }

    #[test]
    fn single_dot_yields_circle() {
        let b = builder_from(&[(3.0, 4.0, 1.0)]);
        let geo = b.finalize(10.0, &raw_params(0.0)).expect("dot stroke");
        for p in &geo.outline {
            let r = (p[0] - 3.0).hypot(p[1] - 4.0);
            assert!((r - 5.0).abs() < 1e-3);
        }
    }

    #[test]
    fn mesh_area_matches_outline_area() {
        let b = builder_from(&[(0.0, 0.0, 0.5), (15.0, 3.0, 0.8), (30.0, -2.0, 0.6)]);
        let geo = b.finalize(8.0, &raw_params(0.4)).expect("valid stroke");
        let outline_area = signed_area(&geo.outline).abs();
        assert!(outline_area > 0.0);
        let ratio = geo.mesh.area() / outline_area;
        assert!((ratio - 1.0).abs() < 0.05, "area ratio = {}", ratio);
    }

    #[test]
    fn edges_are_ordered_and_outward() {
        let b = builder_from(&[(0.0, 0.0, 0.6), (20.0, 0.0, 0.6)]);
        let geo = b.finalize(6.0, &raw_params(0.0)).expect("valid stroke");
        assert!(geo.edges.len() >= geo.outline.len() - 1);
        let cx = 10.0;
        let cy = 0.0;
        for e in &geo.edges {
            let mx = (e.a[0] + e.b[0]) * 0.5 - cx;
            let my = (e.a[1] + e.b[1]) * 0.5 - cy;
            // Outward: the normal agrees with the centroid→edge direction.
            assert!(
                mx * e.normal[0] + my * e.normal[1] > 0.0,
                "inward normal on edge {:?}",
                e
            );
            let len = (e.normal[0].hypot(e.normal[1]) - 1.0).abs();
            assert!(len < 1e-4);
        }
    }

    #[test]
    fn streamline_pulls_points_toward_previous() {
        let pts = vec![
            StrokePoint { x: 0.0, y: 0.0, pressure: 0.5 },
            StrokePoint { x: 10.0, y: 0.0, pressure: 0.5 },
        ];
        let heavy = filter_points(&pts, 0.0, 1.0);
        let light = filter_points(&pts, 0.0, 0.0);
        assert!(heavy[1].x < light[1].x);
        assert_eq!(light[1].x, 10.0);
    }

    #[test]
    fn preview_outline_is_cheap_but_closed() {
        let mut b = builder_from(&[(0.0, 0.0, 0.5)]);
        for i in 1..500 {
            b.add_point(StrokePoint {
                x: i as f32 * 0.5,
                y: (i as f32 * 0.1).sin() * 3.0,
                pressure: 0.5,
            });
        }
        let outline = b.preview_outline(6.0, 0.5);
        assert!(outline.len() >= 3);
        // Decimation keeps the preview outline an order of magnitude
        // smaller than the raw sample count.
        assert!(outline.len() < 300);
    }
}
