// ============================================================================
// WGSL SHADERS — distance-field compute passes + stroke compositing
// ============================================================================
//
// All distance math runs in canvas units.  The field grid is an oversampled
// raster over the stroke's padded bounds; `origin` is the canvas position of
// the grid's top-left corner and `texel_size` is canvas units per texel.
//
// Seeds are edge INDICES, not positions: every texel remembers which
// boundary edge is nearest so far, and distances are always recomputed
// exactly against the edge segment.  `0xffffffff` marks "no seed yet".

/// Seed initialization: each invocation walks one boundary edge through the
/// grid and claims the texels it touches.
pub const SEED_INIT_SHADER: &str = r#"
struct FieldParams {
    grid_w: u32,
    grid_h: u32,
    edge_count: u32,
    step: u32,
    origin: vec2<f32>,
    texel_size: f32,
    _pad: f32,
}

struct Edge {
    a: vec2<f32>,
    b: vec2<f32>,
    n: vec2<f32>,
}

@group(0) @binding(0) var<uniform> params: FieldParams;
@group(0) @binding(1) var<storage, read> edges: array<Edge>;
@group(0) @binding(2) var<storage, read_write> seeds: array<atomic<u32>>;

@compute @workgroup_size(64)
fn cs_seed_init(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= params.edge_count) {
        return;
    }
    let e = edges[i];
    // Walk the segment in grid space, one sample per texel of travel.
    let a = (e.a - params.origin) / params.texel_size;
    let b = (e.b - params.origin) / params.texel_size;
    let span = max(abs(b.x - a.x), abs(b.y - a.y));
    let steps = max(1u, u32(ceil(span)));
    for (var s = 0u; s <= steps; s = s + 1u) {
        let t = f32(s) / f32(steps);
        let p = mix(a, b, t);
        let x = i32(round(p.x));
        let y = i32(round(p.y));
        if (x < 0 || y < 0 || x >= i32(params.grid_w) || y >= i32(params.grid_h)) {
            continue;
        }
        let idx = u32(y) * params.grid_w + u32(x);
        // Ties between edges on the same texel resolve to the lowest index;
        // any touching edge is a correct seed, later passes refine it.
        atomicMin(&seeds[idx], i);
    }
}
"#;

/// One jump-flood propagation pass at the step width in `params.step`.
/// Reads `src`, writes `dst`; the driver ping-pongs the two buffers.
pub const JUMP_FLOOD_SHADER: &str = r#"
struct FieldParams {
    grid_w: u32,
    grid_h: u32,
    edge_count: u32,
    step: u32,
    origin: vec2<f32>,
    texel_size: f32,
    _pad: f32,
}

struct Edge {
    a: vec2<f32>,
    b: vec2<f32>,
    n: vec2<f32>,
}

const SEED_EMPTY: u32 = 0xffffffffu;

@group(0) @binding(0) var<uniform> params: FieldParams;
@group(0) @binding(1) var<storage, read> edges: array<Edge>;
@group(0) @binding(2) var<storage, read> src: array<u32>;
@group(0) @binding(3) var<storage, read_write> dst: array<u32>;

fn texel_center(x: i32, y: i32) -> vec2<f32> {
    return params.origin + (vec2<f32>(f32(x), f32(y)) + vec2<f32>(0.5, 0.5)) * params.texel_size;
}

fn edge_distance(p: vec2<f32>, i: u32) -> f32 {
    let e = edges[i];
    let ab = e.b - e.a;
    let t = clamp(dot(p - e.a, ab) / max(dot(ab, ab), 1e-12), 0.0, 1.0);
    return length(p - (e.a + ab * t));
}

@compute @workgroup_size(16, 16)
fn cs_jump_flood(@builtin(global_invocation_id) gid: vec3<u32>) {
    let x = i32(gid.x);
    let y = i32(gid.y);
    if (gid.x >= params.grid_w || gid.y >= params.grid_h) {
        return;
    }
    let idx = gid.y * params.grid_w + gid.x;
    let p = texel_center(x, y);

    var best = src[idx];
    var best_d = 3.4e38;
    if (best != SEED_EMPTY) {
        best_d = edge_distance(p, best);
    }

    let jump = i32(params.step);
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            if (dx == 0 && dy == 0) {
                continue;
            }
            let nx = x + dx * jump;
            let ny = y + dy * jump;
            if (nx < 0 || ny < 0 || nx >= i32(params.grid_w) || ny >= i32(params.grid_h)) {
                continue;
            }
            let cand = src[u32(ny) * params.grid_w + u32(nx)];
            if (cand == SEED_EMPTY) {
                continue;
            }
            let d = edge_distance(p, cand);
            if (d < best_d) {
                best_d = d;
                best = cand;
            }
        }
    }

    dst[idx] = best;
}
"#;

/// Final encode: resolve each texel's nearest edge into a signed distance
/// (negative inside the stroke) and store it in the R32Float field texture.
pub const FIELD_ENCODE_SHADER: &str = r#"
struct FieldParams {
    grid_w: u32,
    grid_h: u32,
    edge_count: u32,
    step: u32,
    origin: vec2<f32>,
    texel_size: f32,
    _pad: f32,
}

struct Edge {
    a: vec2<f32>,
    b: vec2<f32>,
    n: vec2<f32>,
}

const SEED_EMPTY: u32 = 0xffffffffu;
const FAR_OUTSIDE: f32 = 1e6;

@group(0) @binding(0) var<uniform> params: FieldParams;
@group(0) @binding(1) var<storage, read> edges: array<Edge>;
@group(0) @binding(2) var<storage, read> seeds: array<u32>;
@group(0) @binding(3) var out_field: texture_storage_2d<r32float, write>;

@compute @workgroup_size(16, 16)
fn cs_encode(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.grid_w || gid.y >= params.grid_h) {
        return;
    }
    let p = params.origin
        + (vec2<f32>(f32(gid.x), f32(gid.y)) + vec2<f32>(0.5, 0.5)) * params.texel_size;

    let seed = seeds[gid.y * params.grid_w + gid.x];
    var d = FAR_OUTSIDE;
    if (seed != SEED_EMPTY) {
        let e = edges[seed];
        let ab = e.b - e.a;
        let t = clamp(dot(p - e.a, ab) / max(dot(ab, ab), 1e-12), 0.0, 1.0);
        let dist = length(p - (e.a + ab * t));
        // Side test against the outward normal: behind the edge is inside.
        let side = dot(p - e.a, e.n);
        d = select(dist, -dist, side < 0.0);
    }

    textureStore(out_field, vec2<i32>(i32(gid.x), i32(gid.y)), vec4<f32>(d, 0.0, 0.0, 0.0));
}
"#;

/// Full-surface stroke composite: maps the signed distance field to an
/// anti-aliased coverage ramp and tints it.  Pen output is premultiplied
/// RGBA; eraser output carries coverage in alpha only.
pub const STROKE_COMPOSITE_SHADER: &str = r#"
struct CompositeParams {
    color: vec4<f32>,
    grid_size: vec2<f32>,
    threshold: f32,
    softness: f32,
    opacity: f32,
    mode: u32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<uniform> params: CompositeParams;
@group(0) @binding(1) var field_tex: texture_2d<f32>;

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_stroke(@builtin(vertex_index) vi: u32) -> VsOut {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 0.0), vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0), vec2<f32>(1.0, 0.0), vec2<f32>(1.0, 1.0),
    );
    let c = corners[vi];
    var out: VsOut;
    out.pos = vec4<f32>(c.x * 2.0 - 1.0, 1.0 - c.y * 2.0, 0.0, 1.0);
    out.uv = c;
    return out;
}

// R32Float is non-filterable, so bilinear interpolation is done by hand.
fn sample_distance(uv: vec2<f32>) -> f32 {
    let g = uv * params.grid_size - vec2<f32>(0.5, 0.5);
    let base = floor(g);
    let f = g - base;
    let max_x = i32(params.grid_size.x) - 1;
    let max_y = i32(params.grid_size.y) - 1;
    let x0 = clamp(i32(base.x), 0, max_x);
    let y0 = clamp(i32(base.y), 0, max_y);
    let x1 = clamp(x0 + 1, 0, max_x);
    let y1 = clamp(y0 + 1, 0, max_y);
    let d00 = textureLoad(field_tex, vec2<i32>(x0, y0), 0).r;
    let d10 = textureLoad(field_tex, vec2<i32>(x1, y0), 0).r;
    let d01 = textureLoad(field_tex, vec2<i32>(x0, y1), 0).r;
    let d11 = textureLoad(field_tex, vec2<i32>(x1, y1), 0).r;
    return mix(mix(d00, d10, f.x), mix(d01, d11, f.x), f.y);
}

@fragment
fn fs_stroke(in: VsOut) -> @location(0) vec4<f32> {
    let d = sample_distance(in.uv);
    let coverage = 1.0 - smoothstep(
        params.threshold - params.softness,
        params.threshold + params.softness,
        d,
    );
    let a = coverage * params.color.a * params.opacity;
    if (params.mode == 1u) {
        // Eraser drawable: alpha-only coverage, the host subtracts it.
        return vec4<f32>(0.0, 0.0, 0.0, a);
    }
    return vec4<f32>(params.color.rgb * a, a);
}
"#;

/// Mask subtraction: rasterizes the stroke's triangle mesh over a layer's
/// R8 coverage mask; hardware reverse-subtract blending carves the stroke
/// out.  Coverage comes from the same distance field as the composite path.
pub const MASK_SUBTRACT_SHADER: &str = r#"
struct MaskParams {
    mask_size: vec2<f32>,
    field_origin: vec2<f32>,
    texel_size: f32,
    threshold: f32,
    softness: f32,
    strength: f32,
}

@group(0) @binding(0) var<uniform> params: MaskParams;
@group(0) @binding(1) var field_tex: texture_2d<f32>;

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) canvas: vec2<f32>,
}

@vertex
fn vs_mask(@location(0) position: vec2<f32>) -> VsOut {
    var out: VsOut;
    out.pos = vec4<f32>(
        position.x / params.mask_size.x * 2.0 - 1.0,
        1.0 - position.y / params.mask_size.y * 2.0,
        0.0,
        1.0,
    );
    out.canvas = position;
    return out;
}

fn field_coverage(canvas: vec2<f32>) -> f32 {
    let dims = textureDimensions(field_tex);
    let g = (canvas - params.field_origin) / params.texel_size - vec2<f32>(0.5, 0.5);
    let base = floor(g);
    let f = g - base;
    let max_x = i32(dims.x) - 1;
    let max_y = i32(dims.y) - 1;
    let x0 = clamp(i32(base.x), 0, max_x);
    let y0 = clamp(i32(base.y), 0, max_y);
    let x1 = clamp(x0 + 1, 0, max_x);
    let y1 = clamp(y0 + 1, 0, max_y);
    let d00 = textureLoad(field_tex, vec2<i32>(x0, y0), 0).r;
    let d10 = textureLoad(field_tex, vec2<i32>(x1, y0), 0).r;
    let d01 = textureLoad(field_tex, vec2<i32>(x0, y1), 0).r;
    let d11 = textureLoad(field_tex, vec2<i32>(x1, y1), 0).r;
    let d = mix(mix(d00, d10, f.x), mix(d01, d11, f.x), f.y);
    return 1.0 - smoothstep(
        params.threshold - params.softness,
        params.threshold + params.softness,
        d,
    );
}

@fragment
fn fs_mask(in: VsOut) -> @location(0) vec4<f32> {
    let coverage = field_coverage(in.canvas);
    return vec4<f32>(coverage * params.strength, 0.0, 0.0, 1.0);
}
"#;
