// GPU rendition of the compositor; array sizes match the packer's capacities
pub const VERTEX_SHADER: &str = r#"
#version 330 core
layout(location = 0) in vec2 a_pos;
layout(location = 1) in vec2 a_uv;

out vec2 v_uv;

void main() {
    v_uv = a_uv;
    gl_Position = vec4(a_pos, 0.0, 1.0);
}
"#;

pub const FRAGMENT_SHADER: &str = r#"
#version 330 core
#define MAX_CHIPS 10
#define MAX_CHROMA_KEYS 4
#define MAX_CORRECTIONS 4
#define FALLOFF_BAND 0.5

in vec2 v_uv;
out vec4 FragColor;

uniform sampler2D u_texture;
uniform sampler2D u_lut;
uniform bool u_lut_enabled;
uniform float u_lut_size;
uniform vec2 u_lut_tiles;

uniform int u_active_count;
uniform vec3 u_target_colors[MAX_CHIPS];
uniform vec3 u_target_hsv[MAX_CHIPS];
uniform vec3 u_display_colors[MAX_CHIPS];
uniform float u_tolerance_hue[MAX_CHIPS];
uniform float u_tolerance_sat[MAX_CHIPS];
uniform float u_tolerance_val[MAX_CHIPS];
uniform float u_tolerance_overall[MAX_CHIPS];
uniform float u_modes[MAX_CHIPS];

uniform int u_chroma_key_count;
uniform vec3 u_key_colors[MAX_CHROMA_KEYS];
uniform vec3 u_key_params[MAX_CHROMA_KEYS];

uniform int u_correction_count;
uniform float u_corrections[MAX_CORRECTIONS * 6];

uniform vec4 u_adjustments;
uniform vec2 u_treatment;

// Hue in degrees
vec3 rgb2hsv(vec3 c) {
    vec4 K = vec4(0.0, -1.0 / 3.0, 2.0 / 3.0, -1.0);
    vec4 p = mix(vec4(c.bg, K.wz), vec4(c.gb, K.xy), step(c.b, c.g));
    vec4 q = mix(vec4(p.xyw, c.r), vec4(c.r, p.yzx), step(p.x, c.r));

    float d = q.x - min(q.w, q.y);
    float e = 1.0e-10;
    return vec3(360.0 * abs(q.z + (q.w - q.y) / (6.0 * d + e)), d / (q.x + e), q.x);
}

vec3 hsv2rgb(vec3 c) {
    vec4 K = vec4(1.0, 2.0 / 3.0, 1.0 / 3.0, 3.0);
    vec3 p = abs(fract(c.xxx / 360.0 + K.xyz) * 6.0 - K.www);
    return c.z * mix(K.xxx, clamp(p - K.xxx, 0.0, 1.0), c.y);
}

float hue_distance(float a, float b) {
    float d = mod(abs(a - b), 360.0);
    return min(d, 360.0 - d);
}

float falloff(float d, float t) {
    if (t <= 0.0) {
        return d <= 0.0 ? 1.0 : 0.0;
    }
    return 1.0 - smoothstep(t * (1.0 - FALLOFF_BAND), t, d);
}

float luma(vec3 c) {
    return dot(c, vec3(0.299, 0.587, 0.114));
}

vec2 chroma(vec3 c) {
    return vec2(
        -0.168736 * c.r - 0.331264 * c.g + 0.5 * c.b,
        0.5 * c.r - 0.418688 * c.g - 0.081312 * c.b
    );
}

vec3 unselected(vec3 c) {
    if (u_treatment.x < 0.5) return c;
    if (u_treatment.x < 1.5) return vec3(luma(c));
    return c * clamp(u_treatment.y, 0.0, 1.0);
}

vec3 apply_correction(vec3 c, int i) {
    float gamma = u_corrections[i * 6 + 0];
    float contrast = u_corrections[i * 6 + 1];
    float saturation = u_corrections[i * 6 + 2];
    float brightness = u_corrections[i * 6 + 3];
    float hue_shift = u_corrections[i * 6 + 4];
    float tint = u_corrections[i * 6 + 5];

    if (gamma != 0.0) {
        float e = gamma < 0.0 ? 1.0 - gamma : 1.0 / (1.0 + gamma);
        c = pow(max(c, vec3(0.0)), vec3(e));
    }
    c = (c - 0.5) * (1.0 + contrast) + 0.5;
    c += vec3(brightness);
    c = mix(vec3(luma(c)), c, saturation);
    if (hue_shift != 0.0) {
        vec3 hsv = rgb2hsv(clamp(c, 0.0, 1.0));
        hsv.x = mod(hsv.x + hue_shift, 360.0);
        c = hsv2rgb(hsv);
    }
    c += vec3(0.05, -0.1, 0.05) * tint;
    return clamp(c, 0.0, 1.0);
}

vec3 sample_lut(vec3 c) {
    c = clamp(c, 0.0, 1.0) * (u_lut_size - 1.0);
    float b0 = floor(c.b);
    float b1 = min(b0 + 1.0, u_lut_size - 1.0);
    vec2 texel = 1.0 / (u_lut_tiles * u_lut_size);

    vec2 inner = (c.rg + 0.5) * texel;
    vec2 tile0 = vec2(mod(b0, u_lut_tiles.x), floor(b0 / u_lut_tiles.x)) / u_lut_tiles;
    vec2 tile1 = vec2(mod(b1, u_lut_tiles.x), floor(b1 / u_lut_tiles.x)) / u_lut_tiles;

    vec3 s0 = texture(u_lut, tile0 + inner).rgb;
    vec3 s1 = texture(u_lut, tile1 + inner).rgb;
    return mix(s0, s1, c.b - b0);
}

void main() {
    vec4 source = texture(u_texture, v_uv);
    vec3 hsv = rgb2hsv(source.rgb);

    float include_w = 0.0;
    float exclude_w = 0.0;
    bool any_include = false;
    int winner = -1;

    int count = min(u_active_count, MAX_CHIPS);
    for (int i = 0; i < MAX_CHIPS; i++) {
        if (i >= count) break;
        vec3 t = u_target_hsv[i];

        if (u_modes[i] >= 0.5) {
            vec3 d = vec3(hue_distance(hsv.x, t.x) / 360.0, hsv.y - t.y, hsv.z - t.z);
            exclude_w = max(exclude_w, falloff(length(d), u_tolerance_overall[i]));
        } else {
            any_include = true;
            float wh = t.y < 1.0e-4 ? 1.0 : falloff(hue_distance(hsv.x, t.x), u_tolerance_hue[i]);
            float w = wh
                * falloff(abs(hsv.y - t.y), u_tolerance_sat[i])
                * falloff(abs(hsv.z - t.z), u_tolerance_val[i]);
            if (w > include_w) {
                include_w = w;
                winner = i;
            }
        }
    }
    if (!any_include) include_w = 1.0;

    float selected = include_w * (1.0 - exclude_w);
    vec3 recolored = source.rgb;
    if (winner >= 0) {
        recolored = clamp(u_display_colors[winner], 0.0, 1.0);
    }
    vec3 color = mix(unselected(source.rgb), recolored, selected);

    float alpha = source.a;
    vec2 src_chroma = chroma(source.rgb);
    for (int k = 0; k < MAX_CHROMA_KEYS; k++) {
        if (k >= u_chroma_key_count) break;
        vec3 p = u_key_params[k];
        float base = distance(src_chroma, chroma(u_key_colors[k])) - p.x;
        float mask = p.y <= 0.0 ? 1.0 - step(base, 0.0) : pow(clamp(base / p.y, 0.0, 1.0), 1.5);
        alpha *= mask;
        if (p.z > 0.0) {
            color = mix(vec3(luma(color)), color, pow(clamp(base / p.z, 0.0, 1.0), 1.5));
        }
    }

    for (int i = 0; i < MAX_CORRECTIONS; i++) {
        if (i >= u_correction_count) break;
        color = apply_correction(color, i);
    }

    color *= u_adjustments.x;
    color = (color - 0.5) * u_adjustments.y + 0.5;
    color += vec3(0.1, 0.0, -0.1) * u_adjustments.z;
    color = pow(clamp(color, 0.0, 1.0), vec3(1.0 / u_adjustments.w));

    if (u_lut_enabled) {
        color = sample_lut(color);
    }

    FragColor = vec4(color, alpha);
}
"#;

/// Uniform names in the order [`crate::packer::PackedUniformBlock::to_bytes`]
/// writes their data.
pub const UNIFORM_LAYOUT: &[&str] = &[
    "u_target_colors",
    "u_target_hsv",
    "u_display_colors",
    "u_tolerance_hue",
    "u_tolerance_sat",
    "u_tolerance_val",
    "u_tolerance_overall",
    "u_modes",
    "u_key_colors",
    "u_key_params",
    "u_corrections",
    "u_adjustments",
    "u_treatment",
    "u_active_count",
    "u_chroma_key_count",
    "u_correction_count",
    "u_lut_enabled",
];
