//! Transition blending between two RGBA frames.
//!
//! Each [`TransitionKind`] maps to a fragment function evaluated for every
//! output pixel in normalized texture coordinates (origin bottom-left, as in
//! GL transition shaders). The functions run as WGSL on a [`GpuContext`] when
//! one is available; the CPU versions below mirror them line for line and
//! take over on hosts without an adapter. Creating a [`Transitioner`]
//! resolves the effect's uniforms once and allocates the output surface, so
//! the renderer builds one per clip boundary and reuses it for every blended
//! frame of that boundary.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};

use highlighter_common::error::{HighlighterError, HighlighterResult};
use highlighter_project_model::{ExportOptions, TransitionKind, TransitionSpec, TransitionType};

use crate::gpu::{GpuContext, GpuSurface};

const SQRT_2: f32 = std::f32::consts::SQRT_2;
const PI: f32 = std::f32::consts::PI;

/// Pick the concrete effect for one boundary. `None` means a hard cut.
pub fn resolve_kind<R: Rng + ?Sized>(kind: TransitionType, rng: &mut R) -> Option<TransitionKind> {
    match kind {
        TransitionType::None => None,
        TransitionType::Kind(kind) => Some(kind),
        TransitionType::Random => TransitionKind::ALL.choose(rng).copied(),
    }
}

/// Uniform values for one effect, resolved from its parameter map.
#[derive(Debug, Clone, PartialEq)]
pub enum Uniforms {
    Fade,
    FadeColor { color: [f32; 3], color_phase: f32 },
    Directional { direction: [f32; 2] },
    Wipe { direction: [f32; 2], smoothness: f32 },
    CircleOpen { smoothness: f32, opening: bool },
    Radial { smoothness: f32 },
    Pixelize { squares_min: [f32; 2], steps: u32 },
}

impl Uniforms {
    /// Resolve uniforms for `kind` from user parameters merged over the
    /// kind's defaults. Keys the effect does not declare are ignored.
    pub fn resolve(kind: TransitionKind, overrides: &Map<String, Value>) -> Self {
        let params = kind.merged_params(overrides);
        let declared = kind.default_params();
        for key in overrides.keys().filter(|key| !declared.contains_key(*key)) {
            tracing::warn!(transition = %kind, param = %key, "Ignoring unknown transition parameter");
        }

        match kind {
            TransitionKind::Fade => Uniforms::Fade,
            TransitionKind::FadeColor => Uniforms::FadeColor {
                color: vec3(&params, "color", [0.0, 0.0, 0.0]),
                color_phase: float(&params, "colorPhase", 0.4),
            },
            TransitionKind::Directional => Uniforms::Directional {
                direction: vec2(&params, "direction", [0.0, 1.0]),
            },
            TransitionKind::Wipe => Uniforms::Wipe {
                direction: vec2(&params, "direction", [1.0, 0.0]),
                smoothness: float(&params, "smoothness", 0.1),
            },
            TransitionKind::CircleOpen => Uniforms::CircleOpen {
                smoothness: float(&params, "smoothness", 0.3),
                opening: params
                    .get("opening")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            },
            TransitionKind::Radial => Uniforms::Radial {
                smoothness: float(&params, "smoothness", 1.0),
            },
            TransitionKind::Pixelize => {
                let [w, h] = vec2(&params, "squaresMin", [20.0, 20.0]);
                Uniforms::Pixelize {
                    squares_min: [w.max(1.0), h.max(1.0)],
                    steps: params
                        .get("steps")
                        .and_then(Value::as_u64)
                        .unwrap_or(50) as u32,
                }
            }
        }
    }
}

fn float(params: &Map<String, Value>, key: &str, default: f32) -> f32 {
    params
        .get(key)
        .and_then(Value::as_f64)
        .map(|v| v as f32)
        .unwrap_or(default)
}

fn components<const N: usize>(params: &Map<String, Value>, key: &str, default: [f32; N]) -> [f32; N] {
    let Some(values) = params.get(key).and_then(Value::as_array) else {
        return default;
    };
    if values.len() != N {
        return default;
    }
    let mut out = default;
    for (slot, value) in out.iter_mut().zip(values) {
        match value.as_f64() {
            Some(v) => *slot = v as f32,
            None => return default,
        }
    }
    out
}

fn vec2(params: &Map<String, Value>, key: &str, default: [f32; 2]) -> [f32; 2] {
    components(params, key, default)
}

fn vec3(params: &Map<String, Value>, key: &str, default: [f32; 3]) -> [f32; 3] {
    components(params, key, default)
}

type Rgba = [f32; 4];

fn mix(a: Rgba, b: Rgba, t: f32) -> Rgba {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge0 == edge1 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn step(edge: f32, x: f32) -> f32 {
    if x < edge {
        0.0
    } else {
        1.0
    }
}

/// A bound pair of frames sampled in normalized coordinates.
struct Textures<'a> {
    from: &'a [u8],
    to: &'a [u8],
    width: usize,
    height: usize,
}

impl Textures<'_> {
    fn texel(&self, buf: &[u8], uv: [f32; 2]) -> Rgba {
        let x = ((uv[0] * self.width as f32) as isize).clamp(0, self.width as isize - 1) as usize;
        let y = (((1.0 - uv[1]) * self.height as f32) as isize).clamp(0, self.height as isize - 1)
            as usize;
        let offset = (y * self.width + x) * 4;
        [
            buf[offset] as f32 / 255.0,
            buf[offset + 1] as f32 / 255.0,
            buf[offset + 2] as f32 / 255.0,
            buf[offset + 3] as f32 / 255.0,
        ]
    }

    fn from_color(&self, uv: [f32; 2]) -> Rgba {
        self.texel(self.from, uv)
    }

    fn to_color(&self, uv: [f32; 2]) -> Rgba {
        self.texel(self.to, uv)
    }
}

fn fragment(uniforms: &Uniforms, tex: &Textures<'_>, uv: [f32; 2], progress: f32) -> Rgba {
    match uniforms {
        Uniforms::Fade => mix(tex.from_color(uv), tex.to_color(uv), progress),
        Uniforms::FadeColor { color, color_phase } => {
            let solid = [color[0], color[1], color[2], 1.0];
            let out = mix(
                solid,
                tex.from_color(uv),
                smoothstep(1.0 - color_phase, 0.0, progress),
            );
            let inn = mix(solid, tex.to_color(uv), smoothstep(*color_phase, 1.0, progress));
            mix(out, inn, progress)
        }
        Uniforms::Directional { direction } => {
            let p = [
                uv[0] + progress * direction[0].signum() * (direction[0] != 0.0) as u8 as f32,
                uv[1] + progress * direction[1].signum() * (direction[1] != 0.0) as u8 as f32,
            ];
            let f = [p[0].rem_euclid(1.0), p[1].rem_euclid(1.0)];
            let inside = step(0.0, p[1]) * step(p[1], 1.0) * step(0.0, p[0]) * step(p[0], 1.0);
            mix(tex.to_color(f), tex.from_color(f), inside)
        }
        Uniforms::Wipe {
            direction,
            smoothness,
        } => {
            let len = (direction[0] * direction[0] + direction[1] * direction[1]).sqrt();
            let mut v = if len > 0.0 {
                [direction[0] / len, direction[1] / len]
            } else {
                [1.0, 0.0]
            };
            let manhattan = v[0].abs() + v[1].abs();
            v = [v[0] / manhattan, v[1] / manhattan];
            let d = v[0] * 0.5 + v[1] * 0.5;
            let edge = v[0] * uv[0] + v[1] * uv[1] - (d - 0.5 + progress * (1.0 + smoothness));
            let m = (1.0 - step(progress, 0.0)) * (1.0 - smoothstep(-smoothness, 0.0, edge));
            mix(tex.from_color(uv), tex.to_color(uv), m)
        }
        Uniforms::CircleOpen {
            smoothness,
            opening,
        } => {
            let x = if *opening { progress } else { 1.0 - progress };
            let dist = ((uv[0] - 0.5).powi(2) + (uv[1] - 0.5).powi(2)).sqrt();
            let m = smoothstep(-smoothness, 0.0, SQRT_2 * dist - x * (1.0 + smoothness));
            mix(
                tex.from_color(uv),
                tex.to_color(uv),
                if *opening { 1.0 - m } else { m },
            )
        }
        Uniforms::Radial { smoothness } => {
            let rp = [uv[0] * 2.0 - 1.0, uv[1] * 2.0 - 1.0];
            let angle = rp[1].atan2(rp[0]);
            mix(
                tex.to_color(uv),
                tex.from_color(uv),
                smoothstep(0.0, *smoothness, angle - (progress - 0.5) * PI * 2.5),
            )
        }
        Uniforms::Pixelize { squares_min, steps } => {
            let d = progress.min(1.0 - progress);
            let dist = if *steps > 0 {
                (d * *steps as f32).ceil() / *steps as f32
            } else {
                d
            };
            let p = if dist > 0.0 {
                let size = [2.0 * dist / squares_min[0], 2.0 * dist / squares_min[1]];
                [
                    ((uv[0] / size[0]).floor() + 0.5) * size[0],
                    ((uv[1] / size[1]).floor() + 0.5) * size[1],
                ]
            } else {
                uv
            };
            mix(tex.from_color(p), tex.to_color(p), progress)
        }
    }
}

enum Backend {
    Gpu(Box<GpuSurface>),
    Cpu(Vec<u8>),
}

/// Blends frame pairs for one clip boundary.
pub struct Transitioner {
    kind: TransitionKind,
    uniforms: Uniforms,
    width: usize,
    height: usize,
    backend: Backend,
}

impl Transitioner {
    /// Set up `kind` at the export resolution, on `gpu` when given.
    pub fn new(
        kind: TransitionKind,
        params: &Map<String, Value>,
        options: &ExportOptions,
        gpu: Option<&Arc<GpuContext>>,
    ) -> Self {
        let uniforms = Uniforms::resolve(kind, params);
        let backend = match gpu {
            Some(context) if context.supports(options.width, options.height) => Backend::Gpu(
                Box::new(GpuSurface::new(context.clone(), options.width, options.height)),
            ),
            Some(_) => {
                tracing::warn!(
                    width = options.width,
                    height = options.height,
                    "Resolution exceeds GPU limits, blending on the CPU"
                );
                Backend::Cpu(vec![0; options.frame_bytes()])
            }
            None => Backend::Cpu(vec![0; options.frame_bytes()]),
        };
        tracing::debug!(transition = %kind, ?uniforms, gpu = matches!(backend, Backend::Gpu(_)), "Transition prepared");
        Self {
            kind,
            uniforms,
            width: options.width as usize,
            height: options.height as usize,
            backend,
        }
    }

    /// Set up the transition for one boundary of `spec`, drawing a random
    /// kind when requested. Returns `None` for hard cuts.
    pub fn for_boundary<R: Rng + ?Sized>(
        spec: &TransitionSpec,
        options: &ExportOptions,
        gpu: Option<&Arc<GpuContext>>,
        rng: &mut R,
    ) -> Option<Self> {
        resolve_kind(spec.kind, rng).map(|kind| Self::new(kind, &spec.params, options, gpu))
    }

    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    pub fn uniforms(&self) -> &Uniforms {
        &self.uniforms
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self.backend, Backend::Gpu(_))
    }

    /// Blend `from` into `to` at `progress` in `[0, 1]`. The returned frame
    /// is valid until the next call.
    pub fn render(&mut self, from: &[u8], to: &[u8], progress: f32) -> HighlighterResult<&[u8]> {
        let expected = self.width * self.height * 4;
        if from.len() != expected || to.len() != expected {
            return Err(HighlighterError::frame_write(format!(
                "Transition frame size mismatch: expected {expected} bytes, got {} and {}",
                from.len(),
                to.len()
            )));
        }

        let progress = progress.clamp(0.0, 1.0);
        match &mut self.backend {
            Backend::Gpu(surface) => surface.render(&self.uniforms, from, to, progress),
            Backend::Cpu(output) => {
                let tex = Textures {
                    from,
                    to,
                    width: self.width,
                    height: self.height,
                };
                blend_cpu(&self.uniforms, &tex, output, self.width, self.height, progress);
                Ok(output.as_slice())
            }
        }
    }
}

fn blend_cpu(
    uniforms: &Uniforms,
    tex: &Textures<'_>,
    output: &mut [u8],
    width: usize,
    height: usize,
    progress: f32,
) {
    let (w, h) = (width as f32, height as f32);
    for (index, pixel) in output.chunks_exact_mut(4).enumerate() {
        let x = index % width;
        let y = index / width;
        let uv = [(x as f32 + 0.5) / w, 1.0 - (y as f32 + 0.5) / h];
        let color = fragment(uniforms, tex, uv, progress);
        for (channel, value) in pixel.iter_mut().zip(color) {
            *channel = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn options(width: u32, height: u32) -> ExportOptions {
        ExportOptions {
            fps: 30,
            width,
            height,
            ..ExportOptions::default()
        }
    }

    fn solid(width: u32, height: u32, value: u8) -> Vec<u8> {
        vec![value; (width * height * 4) as usize]
    }

    #[test]
    fn test_fade_midpoint_averages() {
        let mut t = Transitioner::new(TransitionKind::Fade, &Map::new(), &options(4, 4), None);
        let out = t.render(&solid(4, 4, 0), &solid(4, 4, 200), 0.5).unwrap();
        assert!(out.iter().all(|&v| v == 100));
    }

    #[test]
    fn test_every_kind_hits_endpoints() {
        let from = solid(8, 8, 10);
        let to = solid(8, 8, 240);
        for kind in TransitionKind::ALL {
            let mut t = Transitioner::new(kind, &Map::new(), &options(8, 8), None);
            let start = t.render(&from, &to, 0.0).unwrap().to_vec();
            let end = t.render(&from, &to, 1.0).unwrap().to_vec();
            // Fade-through-color and the radial sweep are not pure at zero.
            if !matches!(kind, TransitionKind::FadeColor | TransitionKind::Radial) {
                assert!(start.iter().all(|&v| v == 10), "{kind} start");
            }
            assert!(end.iter().all(|&v| v == 240), "{kind} end");
        }
    }

    #[test]
    fn test_fadecolor_passes_through_color() {
        let params = json!({ "color": [1.0, 1.0, 1.0], "colorPhase": 0.4 });
        let params = params.as_object().cloned().unwrap();
        let mut t = Transitioner::new(TransitionKind::FadeColor, &params, &options(2, 2), None);
        let mid = t.render(&solid(2, 2, 0), &solid(2, 2, 0), 0.5).unwrap();
        assert!(mid.iter().all(|&v| v > 200));
    }

    #[test]
    fn test_uniform_overrides_and_unknown_keys() {
        let params = json!({ "smoothness": 0.5, "bogus": 1 });
        let uniforms = Uniforms::resolve(TransitionKind::Wipe, params.as_object().unwrap());
        assert_eq!(
            uniforms,
            Uniforms::Wipe {
                direction: [1.0, 0.0],
                smoothness: 0.5
            }
        );
    }

    #[test]
    fn test_malformed_vector_falls_back_to_default() {
        let params = json!({ "direction": [1.0] });
        let uniforms = Uniforms::resolve(TransitionKind::Directional, params.as_object().unwrap());
        assert_eq!(uniforms, Uniforms::Directional { direction: [0.0, 1.0] });
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let mut t = Transitioner::new(TransitionKind::Fade, &Map::new(), &options(2, 2), None);
        assert!(t.render(&[0; 4], &solid(2, 2, 0), 0.5).is_err());
    }

    #[test]
    fn test_resolve_kind_variants() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(resolve_kind(TransitionType::None, &mut rng), None);
        assert_eq!(
            resolve_kind(TransitionType::Kind(TransitionKind::Radial), &mut rng),
            Some(TransitionKind::Radial)
        );
        for _ in 0..20 {
            assert!(resolve_kind(TransitionType::Random, &mut rng).is_some());
        }
    }

    #[test]
    fn test_for_boundary_skips_hard_cuts() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(Transitioner::for_boundary(&TransitionSpec::none(), &options(2, 2), None, &mut rng).is_none());
        let t = Transitioner::for_boundary(&TransitionSpec::default(), &options(2, 2), None, &mut rng)
            .unwrap();
        assert_eq!(t.kind(), TransitionKind::Fade);
    }

    fn gradient(width: u32, height: u32, seed: u32) -> Vec<u8> {
        let mut frame = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                frame.extend_from_slice(&[
                    (x * 255 / width) as u8,
                    (y * 255 / height) as u8,
                    ((x + y + seed * 97) % 256) as u8,
                    255,
                ]);
            }
        }
        frame
    }

    #[tokio::test]
    async fn test_gpu_blend_matches_cpu() {
        let Some(gpu) = GpuContext::acquire().await else {
            return;
        };
        let (w, h) = (64, 36);
        let from = gradient(w, h, 0);
        let to = gradient(w, h, 1);
        for kind in TransitionKind::ALL {
            let mut cpu = Transitioner::new(kind, &Map::new(), &options(w, h), None);
            let mut on_gpu = Transitioner::new(kind, &Map::new(), &options(w, h), Some(&gpu));
            assert!(on_gpu.is_gpu());
            assert!(!cpu.is_gpu());
            for progress in [0.0, 0.3, 0.5, 0.8, 1.0] {
                let expected = cpu.render(&from, &to, progress).unwrap().to_vec();
                let actual = on_gpu.render(&from, &to, progress).unwrap();
                // Edge pixels of hard-edged effects may land on either side.
                let differing = expected
                    .chunks_exact(4)
                    .zip(actual.chunks_exact(4))
                    .filter(|(a, b)| a.iter().zip(b.iter()).any(|(x, y)| x.abs_diff(*y) > 3))
                    .count();
                assert!(
                    differing * 50 <= (w * h) as usize,
                    "{kind} at {progress}: {differing} pixels differ"
                );
            }
        }
    }
}
