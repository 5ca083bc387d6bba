use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::distribution::Distribution;
use crate::render_sink::{Blending, SpriteSheet, TextureHandle};

/// Either a single value or a list of keyframes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Keyframes<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> Keyframes<T> {
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            Keyframes::One(v) => vec![v.clone()],
            Keyframes::Many(vs) => vs.clone(),
        }
    }
}

impl<T> From<T> for Keyframes<T> {
    fn from(value: T) -> Self {
        Keyframes::One(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionOptions {
    pub randomize: bool,
    pub radius: f32,
    pub distribution: Option<Distribution>,
    pub value: [f32; 3],
    pub spread: [f32; 3],
    pub spread_clamp: [f32; 3],
    pub radius_scale: [f32; 3],
}

impl Default for PositionOptions {
    fn default() -> Self {
        PositionOptions {
            randomize: false,
            radius: 10.0,
            distribution: None,
            value: [0.0; 3],
            spread: [0.0; 3],
            spread_clamp: [0.0; 3],
            radius_scale: [1.0; 3],
        }
    }
}

/// Velocity and acceleration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceOptions {
    pub randomize: bool,
    pub distribution: Option<Distribution>,
    pub value: [f32; 3],
    pub spread: [f32; 3],
}

/// Drag, wiggle and max age.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalarOptions {
    pub value: f32,
    pub spread: f32,
    pub randomize: bool,
}

impl ScalarOptions {
    pub fn new(value: f32, spread: f32) -> Self {
        ScalarOptions {
            value,
            spread,
            randomize: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationOptions {
    pub axis_spread: f32,
    pub angle: f32,
    pub angle_spread: f32,
    #[serde(rename = "static")]
    pub is_static: bool,
    pub randomize: bool,
    pub axis: [f32; 3],
    /// Defaults to the emitter position.
    pub center: Option<[f32; 3]>,
}

impl Default for RotationOptions {
    fn default() -> Self {
        RotationOptions {
            axis_spread: 0.0,
            angle: 0.0,
            angle_spread: 0.0,
            is_static: false,
            randomize: false,
            axis: [0.0, 1.0, 0.0],
            center: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorOptions {
    pub randomize: bool,
    pub spread: Keyframes<[f32; 3]>,
    pub value: Keyframes<Color>,
}

impl Default for ColorOptions {
    fn default() -> Self {
        ColorOptions {
            randomize: false,
            spread: Keyframes::One([0.0; 3]),
            value: Keyframes::One(Color::WHITE),
        }
    }
}

/// Opacity, size and angle over lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveOptions {
    pub randomize: bool,
    pub value: Keyframes<f32>,
    pub spread: Keyframes<f32>,
}

impl CurveOptions {
    pub fn constant(value: f32) -> Self {
        CurveOptions {
            randomize: false,
            value: Keyframes::One(value),
            spread: Keyframes::One(0.0),
        }
    }
}

impl Default for CurveOptions {
    fn default() -> Self {
        CurveOptions::constant(0.0)
    }
}

fn default_one_curve() -> CurveOptions {
    CurveOptions::constant(1.0)
}

fn default_max_age() -> ScalarOptions {
    ScalarOptions::new(2.0, 0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterOptions {
    /// Default distribution for position, velocity and acceleration.
    pub distribution: Distribution,
    pub particle_count: usize,
    /// Seconds after which the emitter goes dormant. None runs forever.
    pub duration: Option<f32>,
    pub is_static: bool,
    pub active_multiplier: f32,
    /// 1 ages particles forward, -1 runs them backwards.
    pub direction: i32,
    pub alive: bool,

    pub position: PositionOptions,
    pub velocity: ForceOptions,
    pub acceleration: ForceOptions,
    pub drag: ScalarOptions,
    pub wiggle: ScalarOptions,
    pub rotation: RotationOptions,
    #[serde(default = "default_max_age")]
    pub max_age: ScalarOptions,
    pub color: ColorOptions,
    #[serde(default = "default_one_curve")]
    pub opacity: CurveOptions,
    #[serde(default = "default_one_curve")]
    pub size: CurveOptions,
    pub angle: CurveOptions,
}

impl Default for EmitterOptions {
    fn default() -> Self {
        EmitterOptions {
            distribution: Distribution::Box,
            particle_count: 100,
            duration: None,
            is_static: false,
            active_multiplier: 1.0,
            direction: 1,
            alive: true,
            position: PositionOptions::default(),
            velocity: ForceOptions::default(),
            acceleration: ForceOptions::default(),
            drag: ScalarOptions::default(),
            wiggle: ScalarOptions::default(),
            rotation: RotationOptions::default(),
            max_age: default_max_age(),
            color: ColorOptions::default(),
            opacity: default_one_curve(),
            size: default_one_curve(),
            angle: CurveOptions::default(),
        }
    }
}

/// `value` if finite, otherwise `default` with a warning naming `what`.
pub(crate) fn finite_or(value: f32, default: f32, what: impl fmt::Display) -> f32 {
    if value.is_finite() {
        value
    } else {
        warn!("{} is not finite ({}), using {}", what, value, default);
        default
    }
}

pub(crate) fn finite_vec_or(
    value: [f32; 3],
    default: [f32; 3],
    what: impl fmt::Display,
) -> [f32; 3] {
    if value.iter().all(|v| v.is_finite()) {
        value
    } else {
        warn!("{} has non-finite components ({:?}), using {:?}", what, value, default);
        default
    }
}

fn sanitize_scalar(options: &mut ScalarOptions, default_value: f32, what: &str) {
    options.value = finite_or(options.value, default_value, what);
    options.spread = finite_or(options.spread, 0.0, what);
}

fn sanitize_curve(options: &mut CurveOptions, default_value: f32, what: &str) {
    let fix = |v: &mut f32| *v = finite_or(*v, default_value, what);
    match &mut options.value {
        Keyframes::One(v) => fix(v),
        Keyframes::Many(vs) => vs.iter_mut().for_each(fix),
    }
    let fix_spread = |v: &mut f32| *v = finite_or(*v, 0.0, what);
    match &mut options.spread {
        Keyframes::One(v) => fix_spread(v),
        Keyframes::Many(vs) => vs.iter_mut().for_each(fix_spread),
    }
}

impl EmitterOptions {
    /// Replaces malformed values with their defaults. Never fails.
    pub fn sanitize(&mut self) {
        if self.direction != 1 && self.direction != -1 {
            warn!("direction must be 1 or -1, got {}", self.direction);
            self.direction = 1;
        }
        self.active_multiplier = finite_or(self.active_multiplier, 1.0, "active_multiplier");
        if self.active_multiplier < 0.0 {
            warn!("active_multiplier is negative, using 1");
            self.active_multiplier = 1.0;
        }
        if let Some(duration) = self.duration {
            if !duration.is_finite() || duration < 0.0 {
                warn!("duration {} is invalid, emitting forever", duration);
                self.duration = None;
            }
        }
        if self.particle_count == 0 {
            warn!("emitter has no particles");
        }

        let p = &mut self.position;
        p.value = finite_vec_or(p.value, [0.0; 3], "position.value");
        p.spread = finite_vec_or(p.spread, [0.0; 3], "position.spread");
        p.spread_clamp = finite_vec_or(p.spread_clamp, [0.0; 3], "position.spread_clamp");
        p.radius_scale = finite_vec_or(p.radius_scale, [1.0; 3], "position.radius_scale");
        p.radius = finite_or(p.radius, 10.0, "position.radius");

        for (force, what) in [
            (&mut self.velocity, "velocity"),
            (&mut self.acceleration, "acceleration"),
        ] {
            force.value = finite_vec_or(force.value, [0.0; 3], what);
            force.spread = finite_vec_or(force.spread, [0.0; 3], what);
        }

        sanitize_scalar(&mut self.drag, 0.0, "drag");
        sanitize_scalar(&mut self.wiggle, 0.0, "wiggle");
        sanitize_scalar(&mut self.max_age, 2.0, "max_age");

        let r = &mut self.rotation;
        r.axis = finite_vec_or(r.axis, [0.0, 1.0, 0.0], "rotation.axis");
        r.axis_spread = finite_or(r.axis_spread, 0.0, "rotation.axis_spread");
        r.angle = finite_or(r.angle, 0.0, "rotation.angle");
        r.angle_spread = finite_or(r.angle_spread, 0.0, "rotation.angle_spread");
        if let Some(center) = r.center {
            r.center = Some(finite_vec_or(center, self.position.value, "rotation.center"));
        }

        let c = &mut self.color;
        let fix_color = |v: &mut Color| {
            let rgb = finite_vec_or([v.r, v.g, v.b], [1.0; 3], "color.value");
            *v = Color::new(rgb[0], rgb[1], rgb[2]);
        };
        match &mut c.value {
            Keyframes::One(v) => fix_color(v),
            Keyframes::Many(vs) => vs.iter_mut().for_each(fix_color),
        }
        let fix_spread = |v: &mut [f32; 3]| *v = finite_vec_or(*v, [0.0; 3], "color.spread");
        match &mut c.spread {
            Keyframes::One(v) => fix_spread(v),
            Keyframes::Many(vs) => vs.iter_mut().for_each(fix_spread),
        }

        sanitize_curve(&mut self.opacity, 1.0, "opacity");
        sanitize_curve(&mut self.size, 1.0, "size");
        sanitize_curve(&mut self.angle, 0.0, "angle");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureOptions {
    pub handle: Option<TextureHandle>,
    /// Sprite-sheet grid as [columns, rows].
    pub frames: [u32; 2],
    /// Defaults to columns * rows.
    pub frame_count: Option<u32>,
    pub loop_count: f32,
}

impl Default for TextureOptions {
    fn default() -> Self {
        TextureOptions {
            handle: None,
            frames: [1, 1],
            frame_count: None,
            loop_count: 1.0,
        }
    }
}

impl TextureOptions {
    pub fn sprite_sheet(&self) -> SpriteSheet {
        let columns = self.frames[0].max(1);
        let rows = self.frames[1].max(1);
        SpriteSheet {
            columns,
            rows,
            frame_count: self.frame_count.unwrap_or(columns * rows).max(1),
            loop_count: if self.loop_count.is_finite() {
                self.loop_count
            } else {
                1.0
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupOptions {
    /// Declared particle capacity. Exceeding it warns but still grows.
    pub max_particle_count: Option<usize>,
    pub fixed_time_step: f32,
    pub has_perspective: bool,
    pub colorize: bool,
    pub blending: Blending,
    pub transparent: bool,
    pub alpha_test: f32,
    pub depth_write: bool,
    pub depth_test: bool,
    pub fog: bool,
    /// Pixel-ratio scale factor for perspective sizing.
    pub scale: f32,
    /// Fixes the random sequence, for reproducible runs.
    pub seed: Option<u64>,
    pub texture: TextureOptions,
}

impl Default for GroupOptions {
    fn default() -> Self {
        GroupOptions {
            max_particle_count: None,
            fixed_time_step: 0.016,
            has_perspective: true,
            colorize: true,
            blending: Blending::Additive,
            transparent: true,
            alpha_test: 0.0,
            depth_write: false,
            depth_test: true,
            fog: true,
            scale: 300.0,
            seed: None,
            texture: TextureOptions::default(),
        }
    }
}

impl GroupOptions {
    pub fn sanitize(&mut self) {
        if !self.fixed_time_step.is_finite() || self.fixed_time_step <= 0.0 {
            warn!(
                "fixed_time_step {} is invalid, using 0.016",
                self.fixed_time_step
            );
            self.fixed_time_step = 0.016;
        }
        self.scale = finite_or(self.scale, 300.0, "scale");
        self.alpha_test = finite_or(self.alpha_test, 0.0, "alpha_test");
    }
}

/// A pool of emitters parked for triggering. `per_index`, when non-empty,
/// gives emitter `i` the options at `i % per_index.len()` instead of `emitter`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    pub count: usize,
    pub allow_grow: bool,
    pub per_index: Vec<EmitterOptions>,
    pub emitter: EmitterOptions,
}

impl PoolOptions {
    pub fn creation_options(&self) -> Vec<EmitterOptions> {
        if self.per_index.is_empty() {
            vec![self.emitter.clone()]
        } else {
            self.per_index.clone()
        }
    }
}

/// A complete particle scene, as loaded by the headless driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub group: GroupOptions,
    pub emitters: Vec<EmitterOptions>,
    pub pools: Vec<PoolOptions>,
}

impl std::str::FromStr for SceneConfig {
    type Err = toml::de::Error;
    fn from_str(serialized: &str) -> Result<Self, Self::Err> {
        let config = toml::from_str(serialized)?;
        Ok(config)
    }
}

impl SceneConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = std::fs::read_to_string(path)?.parse()?;
        Ok(config)
    }
}
