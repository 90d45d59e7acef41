/// WGSL shader sources
///
/// The ray-march library is shared between the compute kernel and the
/// fragment-shader reference renderer, so both paths run identical code
/// per ray. Workgroup sizes are fixed at shader-compile time in WGSL; the
/// compute kernel is therefore a template whose `WORKGROUP_WIDTH` and
/// `WORKGROUP_HEIGHT` placeholders are substituted per dispatch geometry.

use super::dispatch::ThreadgroupDispatchConfiguration;

/// Entry point of the ray-march compute kernel
pub const RAY_MARCH_ENTRY: &str = "ray_march_kernel";

/// Side length of the square histogram workgroup
pub const HISTOGRAM_WORKGROUP_SIDE: u32 = 16;

/// Uniforms, bindings and per-ray functions shared by both render paths.
///
/// Bindings:
/// - 0: `RayMarchUniforms`
/// - 1: volume, `texture_3d<i32>` (R16Sint)
/// - 2-5: transfer-function lookups, `texture_2d<f32>` (512x2 RGBA32F)
const RAY_MARCH_LIBRARY: &str = r#"
struct RayMarchUniforms {
    inverse_model: mat4x4<f32>,
    inverse_view_projection: mat4x4<f32>,
    camera_local: vec4<f32>,
    channel_weights: vec4<f32>,
    // min_hu, max_hu, rescale slope, rescale intercept
    window: vec4<f32>,
    // width, height, steps, method
    output: vec4<u32>,
    // x: early termination alpha
    options: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: RayMarchUniforms;
@group(0) @binding(1) var volume: texture_3d<i32>;
@group(0) @binding(2) var transfer0: texture_2d<f32>;
@group(0) @binding(3) var transfer1: texture_2d<f32>;
@group(0) @binding(4) var transfer2: texture_2d<f32>;
@group(0) @binding(5) var transfer3: texture_2d<f32>;

const METHOD_DVR: u32 = 0u;
const METHOD_MIP: u32 = 1u;
const METHOD_MINIP: u32 = 2u;
const METHOD_AIP: u32 = 3u;

const RAY_EPSILON: f32 = 1e-6;
const DIRECTION_EPSILON: f32 = 1e-8;
const WINDOW_EPSILON: f32 = 1e-5;
const FAR: f32 = 1e30;
const LOOKUP_WIDTH: i32 = 512;
const UNPROJECT_DEPTH: f32 = 0.5;

fn compute_ray_direction(start: vec3<f32>, end: vec3<f32>) -> vec3<f32> {
    let delta = end - start;
    let len = length(delta);
    if (len <= DIRECTION_EPSILON) {
        return vec3<f32>(0.0);
    }
    return delta / len;
}

fn intersect_box(origin: vec3<f32>, dir: vec3<f32>) -> vec2<f32> {
    var t_near = -FAR;
    var t_exit = FAR;
    for (var axis = 0; axis < 3; axis = axis + 1) {
        let o = origin[axis];
        let d = dir[axis];
        if (abs(d) < RAY_EPSILON) {
            if (o < 0.0 || o > 1.0) {
                return vec2<f32>(1.0, 0.0);
            }
            continue;
        }
        let inv = 1.0 / d;
        let t0 = (0.0 - o) * inv;
        let t1 = (1.0 - o) * inv;
        t_near = max(t_near, min(t0, t1));
        t_exit = min(t_exit, max(t0, t1));
    }
    return vec2<f32>(t_near, t_exit);
}

fn load_voxel(base: vec3<i32>, offset: vec3<i32>, hi: vec3<i32>) -> f32 {
    let p = clamp(base + offset, vec3<i32>(0), hi);
    return f32(textureLoad(volume, p, 0).x);
}

fn sample_volume(local: vec3<f32>) -> f32 {
    let dims = vec3<i32>(textureDimensions(volume));
    let pos = local * vec3<f32>(dims) - vec3<f32>(0.5);
    let floor_pos = floor(pos);
    let f = pos - floor_pos;
    let base = vec3<i32>(floor_pos);
    let hi = dims - vec3<i32>(1);

    let c00 = mix(load_voxel(base, vec3<i32>(0, 0, 0), hi), load_voxel(base, vec3<i32>(1, 0, 0), hi), f.x);
    let c10 = mix(load_voxel(base, vec3<i32>(0, 1, 0), hi), load_voxel(base, vec3<i32>(1, 1, 0), hi), f.x);
    let c01 = mix(load_voxel(base, vec3<i32>(0, 0, 1), hi), load_voxel(base, vec3<i32>(1, 0, 1), hi), f.x);
    let c11 = mix(load_voxel(base, vec3<i32>(0, 1, 1), hi), load_voxel(base, vec3<i32>(1, 1, 1), hi), f.x);
    let c0 = mix(c00, c10, f.y);
    let c1 = mix(c01, c11, f.y);
    return mix(c0, c1, f.z);
}

fn normalize_window(hu: f32) -> f32 {
    let width = max(params.window.y - params.window.x, WINDOW_EPSILON);
    return clamp((hu - params.window.x) / width, 0.0, 1.0);
}

fn transfer_lookup(lut: texture_2d<f32>, normalized: f32) -> vec4<f32> {
    let position = clamp(normalized, 0.0, 1.0) * f32(LOOKUP_WIDTH - 1);
    let lower = min(i32(floor(position)), LOOKUP_WIDTH - 1);
    let upper = min(lower + 1, LOOKUP_WIDTH - 1);
    let fraction = position - f32(lower);
    let a = textureLoad(lut, vec2<i32>(lower, 0), 0);
    let b = textureLoad(lut, vec2<i32>(upper, 0), 0);
    return mix(a, b, vec4<f32>(fraction));
}

fn classify(normalized: f32) -> vec4<f32> {
    let w = params.channel_weights;
    var colour = vec4<f32>(0.0);
    colour = colour + transfer_lookup(transfer0, normalized) * w.x;
    colour = colour + transfer_lookup(transfer1, normalized) * w.y;
    colour = colour + transfer_lookup(transfer2, normalized) * w.z;
    colour = colour + transfer_lookup(transfer3, normalized) * w.w;
    return clamp(colour, vec4<f32>(0.0), vec4<f32>(1.0));
}

fn pixel_local(pixel: vec2<f32>) -> vec3<f32> {
    let size = vec2<f32>(f32(params.output.x), f32(params.output.y));
    let ndc = vec2<f32>(pixel.x / size.x * 2.0 - 1.0, 1.0 - pixel.y / size.y * 2.0);
    var world = params.inverse_view_projection * vec4<f32>(ndc, UNPROJECT_DEPTH, 1.0);
    world = world / world.w;
    let local = params.inverse_model * world;
    return local.xyz / local.w;
}

fn march_ray(pixel: vec2<f32>) -> vec4<f32> {
    let origin = params.camera_local.xyz;
    let dir = compute_ray_direction(origin, pixel_local(pixel));
    if (dot(dir, dir) == 0.0) {
        return vec4<f32>(0.0);
    }

    let hit = intersect_box(origin, dir);
    let t_near = max(hit.x, 0.0);
    let t_exit = hit.y;
    if (t_near >= t_exit) {
        return vec4<f32>(0.0);
    }

    let steps = max(params.output.z, 1u);
    let dt = (t_exit - t_near) / f32(steps);
    let method = params.output.w;

    var acc = vec4<f32>(0.0);
    var extreme = select(0.0, 1.0, method == METHOD_MINIP);
    var total = 0.0;

    for (var i = 0u; i < steps; i = i + 1u) {
        let t = t_near + (f32(i) + 0.5) * dt;
        let p = origin + dir * t;
        let hu = sample_volume(p) * params.window.z + params.window.w;
        let n = normalize_window(hu);

        if (method == METHOD_DVR) {
            let s = classify(n);
            let transparency = 1.0 - acc.a;
            acc = vec4<f32>(acc.rgb + transparency * (s.rgb * s.a), acc.a + transparency * s.a);
            if (acc.a >= params.options.x) {
                break;
            }
        } else if (method == METHOD_MIP) {
            extreme = max(extreme, n);
        } else if (method == METHOD_MINIP) {
            extreme = min(extreme, n);
        } else {
            total = total + n;
        }
    }

    if (method == METHOD_DVR) {
        return acc;
    }
    var v = extreme;
    if (method == METHOD_AIP) {
        v = total / f32(steps);
    }
    return vec4<f32>(v, v, v, 1.0);
}
"#;

/// Compute entry point; binding 6 is the output image
const RAY_MARCH_COMPUTE_ENTRY: &str = r#"
@group(0) @binding(6) var output_image: texture_storage_2d<rgba8unorm, write>;

@compute @workgroup_size(WORKGROUP_WIDTH, WORKGROUP_HEIGHT, 1)
fn ray_march_kernel(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.output.x || gid.y >= params.output.y) {
        return;
    }
    let colour = march_ray(vec2<f32>(f32(gid.x) + 0.5, f32(gid.y) + 0.5));
    textureStore(output_image, vec2<i32>(gid.xy), colour);
}
"#;

/// Full-screen triangle plus a per-fragment call into the same library
const RAY_MARCH_FRAGMENT_ENTRY: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(vertex_index & 1u) * 4 - 1);
    let y = f32(i32(vertex_index >> 1u) * 4 - 1);
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) frag_coord: vec4<f32>) -> @location(0) vec4<f32> {
    return march_ray(frag_coord.xy);
}
"#;

/// Histogram bindings and binning, shared by both strategies
const HISTOGRAM_LIBRARY: &str = r#"
struct HistogramUniforms {
    size: vec2<u32>,
    bins: u32,
    channel_count: u32,
};

@group(0) @binding(0) var<uniform> hist: HistogramUniforms;
@group(0) @binding(1) var frame: texture_2d<f32>;
@group(0) @binding(2) var<storage, read_write> counters: array<atomic<u32>>;

fn bin_of(value: f32) -> u32 {
    return min(u32(clamp(value, 0.0, 1.0) * f32(hist.bins)), hist.bins - 1u);
}

fn in_frame(gid: vec3<u32>) -> bool {
    return gid.x < hist.size.x && gid.y < hist.size.y;
}
"#;

/// Per-workgroup counters in shared memory, flushed once per workgroup
const HISTOGRAM_THREADGROUP_ENTRY: &str = r#"
const TOTAL_COUNTERS: u32 = TOTAL_COUNTERS_VALUEu;
const WORKGROUP_INVOCATIONS: u32 = 256u;

var<workgroup> local_counters: array<atomic<u32>, TOTAL_COUNTERS>;

@compute @workgroup_size(16, 16, 1)
fn computeHistogramThreadgroup(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(local_invocation_index) lid: u32,
) {
    for (var i = lid; i < TOTAL_COUNTERS; i = i + WORKGROUP_INVOCATIONS) {
        atomicStore(&local_counters[i], 0u);
    }
    workgroupBarrier();

    if (in_frame(gid)) {
        let texel = textureLoad(frame, vec2<i32>(gid.xy), 0);
        for (var c = 0u; c < hist.channel_count; c = c + 1u) {
            atomicAdd(&local_counters[c * hist.bins + bin_of(texel[c])], 1u);
        }
    }
    workgroupBarrier();

    for (var i = lid; i < TOTAL_COUNTERS; i = i + WORKGROUP_INVOCATIONS) {
        let count = atomicLoad(&local_counters[i]);
        if (count > 0u) {
            atomicAdd(&counters[i], count);
        }
    }
}
"#;

/// Global atomics only
const HISTOGRAM_LEGACY_ENTRY: &str = r#"
@compute @workgroup_size(16, 16, 1)
fn computeHistogramLegacy(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (!in_frame(gid)) {
        return;
    }
    let texel = textureLoad(frame, vec2<i32>(gid.xy), 0);
    for (var c = 0u; c < hist.channel_count; c = c + 1u) {
        atomicAdd(&counters[c * hist.bins + bin_of(texel[c])], 1u);
    }
}
"#;

/// Compute kernel source specialised for one dispatch geometry
pub fn ray_march_compute_source(geometry: ThreadgroupDispatchConfiguration) -> String {
    let entry = RAY_MARCH_COMPUTE_ENTRY
        .replace("WORKGROUP_WIDTH", &geometry.width.to_string())
        .replace("WORKGROUP_HEIGHT", &geometry.height.to_string());
    format!("{}{}", RAY_MARCH_LIBRARY, entry)
}

/// Fragment reference source
pub fn ray_march_fragment_source() -> String {
    format!("{}{}", RAY_MARCH_LIBRARY, RAY_MARCH_FRAGMENT_ENTRY)
}

/// Shared-memory histogram source sized for `total_counters` bins
pub fn histogram_threadgroup_source(total_counters: u32) -> String {
    let entry = HISTOGRAM_THREADGROUP_ENTRY.replace("TOTAL_COUNTERS_VALUE", &total_counters.to_string());
    format!("{}{}", HISTOGRAM_LIBRARY, entry)
}

pub fn histogram_legacy_source() -> String {
    format!("{}{}", HISTOGRAM_LIBRARY, HISTOGRAM_LEGACY_ENTRY)
}
