//! The boundary between the simulation core and whatever draws it.
//!
//! The core never talks to a graphics API directly. Each tick it hands the
//! sink the attribute data that changed, the current shader defines, and a
//! handful of per-frame uniforms. `NullSink` discards everything and
//! `RecordingSink` keeps a log that tests and the headless driver inspect.

use serde::{Deserialize, Serialize};

use crate::attribute::AttributeKind;
use crate::lifetime_curve::VALUE_OVER_LIFETIME_LENGTH;

/// Which part of an attribute buffer needs uploading, in element (float) units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRange {
    Partial { offset: usize, count: usize },
    /// The buffer identity changed; the sink should rebind the whole thing.
    Full,
}

/// GPU usage hint for an attribute buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Dynamic,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blending {
    None,
    Normal,
    Additive,
    Subtractive,
    Multiply,
}

impl Default for Blending {
    fn default() -> Self {
        Blending::Additive
    }
}

/// Opaque reference to a texture owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureHandle(pub u64);

/// Sprite-sheet layout of the particle texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteSheet {
    pub columns: u32,
    pub rows: u32,
    pub frame_count: u32,
    pub loop_count: f32,
}

impl Default for SpriteSheet {
    fn default() -> Self {
        SpriteSheet {
            columns: 1,
            rows: 1,
            frame_count: 1,
            loop_count: 1.0,
        }
    }
}

impl SpriteSheet {
    pub fn is_animated(&self) -> bool {
        self.frame_count > 1
    }

    /// `[columns, rows, frame_count, loops]` as the vertex shader expects it.
    pub fn animation_uniform(&self) -> [f32; 4] {
        [
            self.columns as f32,
            self.rows as f32,
            self.frame_count as f32,
            self.loop_count.abs().max(1.0),
        ]
    }

    /// Frame shown by a particle of the given age.
    pub fn frame_index(&self, age: f32, max_age: f32) -> u32 {
        if self.frame_count <= 1 || max_age <= 0.0 {
            return 0;
        }
        let loops = self.loop_count.abs().max(1.0);
        let progress = (age / max_age * loops).fract();
        let frame = (progress * self.frame_count as f32).floor() as u32;
        frame.min(self.frame_count - 1)
    }
}

/// Compile-time switches for the particle shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderDefines {
    pub has_perspective: bool,
    pub colorize: bool,
    pub value_over_lifetime_length: usize,
    pub should_rotate_texture: bool,
    pub should_rotate_particles: bool,
    pub should_wiggle_particles: bool,
    pub should_calculate_sprite: bool,
}

impl Default for ShaderDefines {
    fn default() -> Self {
        ShaderDefines {
            has_perspective: true,
            colorize: true,
            value_over_lifetime_length: VALUE_OVER_LIFETIME_LENGTH,
            should_rotate_texture: false,
            should_rotate_particles: false,
            should_wiggle_particles: false,
            should_calculate_sprite: false,
        }
    }
}

impl ShaderDefines {
    /// `#define` pairs for the enabled switches.
    pub fn to_define_list(&self) -> Vec<(&'static str, String)> {
        let mut defines = vec![(
            "VALUE_OVER_LIFETIME_LENGTH",
            self.value_over_lifetime_length.to_string(),
        )];
        let switches = [
            ("HAS_PERSPECTIVE", self.has_perspective),
            ("COLORIZE", self.colorize),
            ("SHOULD_ROTATE_TEXTURE", self.should_rotate_texture),
            ("SHOULD_ROTATE_PARTICLES", self.should_rotate_particles),
            ("SHOULD_WIGGLE_PARTICLES", self.should_wiggle_particles),
            ("SHOULD_CALCULATE_SPRITE", self.should_calculate_sprite),
        ];
        for (name, enabled) in switches.iter() {
            if *enabled {
                defines.push((*name, String::from("1")));
            }
        }
        defines
    }
}

/// Per-frame uniforms.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GroupUniforms {
    pub run_time: f32,
    pub delta_time: f32,
    pub scale: f32,
    pub texture_animation: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialSettings {
    pub blending: Blending,
    pub transparent: bool,
    pub alpha_test: f32,
    pub depth_write: bool,
    pub depth_test: bool,
    pub fog: bool,
    pub texture: Option<TextureHandle>,
    pub sprite_sheet: SpriteSheet,
}

pub trait RenderSink {
    /// Called once when the owning system is created.
    fn set_material(&mut self, _material: &MaterialSettings) {}

    /// Upload `data` (the whole backing array) for one attribute. Only `range`
    /// changed since the previous upload.
    fn upload(
        &mut self,
        kind: AttributeKind,
        data: &[f32],
        component_count: usize,
        range: UploadRange,
        usage: BufferUsage,
    );

    fn set_defines(&mut self, defines: &ShaderDefines);

    fn set_uniforms(&mut self, _uniforms: &GroupUniforms) {}

    /// Only the first `count` particle slots should be drawn.
    fn set_draw_range(&mut self, count: usize);

    fn dispose(&mut self) {}
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn upload(&mut self, _: AttributeKind, _: &[f32], _: usize, _: UploadRange, _: BufferUsage) {}
    fn set_defines(&mut self, _: &ShaderDefines) {}
    fn set_draw_range(&mut self, _: usize) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    pub kind: AttributeKind,
    pub range: UploadRange,
    pub usage: BufferUsage,
    pub buffer_len: usize,
}

/// Remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub uploads: Vec<UploadRecord>,
    pub defines: Option<ShaderDefines>,
    pub define_updates: usize,
    pub uniforms: GroupUniforms,
    pub draw_range: usize,
    pub material: Option<MaterialSettings>,
    pub disposed: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        RecordingSink::default()
    }

    pub fn clear_uploads(&mut self) {
        self.uploads.clear();
    }

    pub fn uploads_for(&self, kind: AttributeKind) -> Vec<&UploadRecord> {
        self.uploads.iter().filter(|u| u.kind == kind).collect()
    }

    /// Total number of floats uploaded by partial updates.
    pub fn partial_elements(&self) -> usize {
        self.uploads
            .iter()
            .map(|u| match u.range {
                UploadRange::Partial { count, .. } => count,
                UploadRange::Full => 0,
            })
            .sum()
    }
}

impl RenderSink for RecordingSink {
    fn set_material(&mut self, material: &MaterialSettings) {
        self.material = Some(*material);
    }

    fn upload(
        &mut self,
        kind: AttributeKind,
        data: &[f32],
        _component_count: usize,
        range: UploadRange,
        usage: BufferUsage,
    ) {
        self.uploads.push(UploadRecord {
            kind,
            range,
            usage,
            buffer_len: data.len(),
        });
    }

    fn set_defines(&mut self, defines: &ShaderDefines) {
        self.defines = Some(*defines);
        self.define_updates += 1;
    }

    fn set_uniforms(&mut self, uniforms: &GroupUniforms) {
        self.uniforms = *uniforms;
    }

    fn set_draw_range(&mut self, count: usize) {
        self.draw_range = count;
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }
}
