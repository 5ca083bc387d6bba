//! A `RenderSink` that keeps one wgpu vertex buffer per attribute.
//!
//! Pipeline creation is left to the host. It reads `defines()` to build the
//! shader, binds `buffer(kind)` per attribute and draws `draw_range()`
//! instances.

use std::sync::Arc;

use log::{debug, trace};

use crate::attribute::{AttributeKind, ATTRIBUTE_COUNT};
use crate::render_sink::{
    BufferUsage, GroupUniforms, MaterialSettings, RenderSink, ShaderDefines, UploadRange,
};

pub struct SizedBuffer {
    pub buffer: wgpu::Buffer,
    pub size: wgpu::BufferAddress,
}

fn make_vertex_buffer(device: &wgpu::Device, len: usize, label: &str) -> SizedBuffer {
    let size = (std::mem::size_of::<f32>() * len) as wgpu::BufferAddress;
    SizedBuffer {
        buffer: device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }),
        size,
    }
}

pub struct GpuSink {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    buffers: Vec<Option<SizedBuffer>>,
    defines: ShaderDefines,
    uniforms: GroupUniforms,
    material: Option<MaterialSettings>,
    draw_range: usize,
}

impl GpuSink {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        GpuSink {
            device,
            queue,
            buffers: (0..ATTRIBUTE_COUNT).map(|_| None).collect(),
            defines: ShaderDefines::default(),
            uniforms: GroupUniforms::default(),
            material: None,
            draw_range: 0,
        }
    }

    pub fn buffer(&self, kind: AttributeKind) -> Option<&wgpu::Buffer> {
        self.buffers[kind.index()].as_ref().map(|b| &b.buffer)
    }

    pub fn defines(&self) -> &ShaderDefines {
        &self.defines
    }

    pub fn uniforms(&self) -> &GroupUniforms {
        &self.uniforms
    }

    pub fn material(&self) -> Option<&MaterialSettings> {
        self.material.as_ref()
    }

    pub fn draw_range(&self) -> usize {
        self.draw_range
    }
}

impl RenderSink for GpuSink {
    fn set_material(&mut self, material: &MaterialSettings) {
        self.material = Some(*material);
    }

    fn upload(
        &mut self,
        kind: AttributeKind,
        data: &[f32],
        _component_count: usize,
        range: UploadRange,
        _usage: BufferUsage,
    ) {
        if data.is_empty() {
            return;
        }
        let bytes = (std::mem::size_of::<f32>() * data.len()) as wgpu::BufferAddress;
        let slot = &mut self.buffers[kind.index()];
        let stale = slot.as_ref().map_or(true, |b| b.size != bytes);
        match range {
            UploadRange::Full => {
                if stale {
                    debug!("Creating {} buffer of {} bytes", kind.name(), bytes);
                    *slot = Some(make_vertex_buffer(&self.device, data.len(), kind.name()));
                }
                if let Some(b) = slot.as_ref() {
                    self.queue.write_buffer(&b.buffer, 0, bytemuck::cast_slice(data));
                }
            }
            UploadRange::Partial { offset, count } => {
                // Resized since the last full upload; rewrite all of it.
                if stale {
                    *slot = Some(make_vertex_buffer(&self.device, data.len(), kind.name()));
                    if let Some(b) = slot.as_ref() {
                        self.queue.write_buffer(&b.buffer, 0, bytemuck::cast_slice(data));
                    }
                    return;
                }
                let end = (offset + count).min(data.len());
                if offset >= end {
                    return;
                }
                trace!("{} partial upload {}..{}", kind.name(), offset, end);
                if let Some(b) = slot.as_ref() {
                    self.queue.write_buffer(
                        &b.buffer,
                        (offset * std::mem::size_of::<f32>()) as wgpu::BufferAddress,
                        bytemuck::cast_slice(&data[offset..end]),
                    );
                }
            }
        }
    }

    fn set_defines(&mut self, defines: &ShaderDefines) {
        self.defines = *defines;
    }

    fn set_uniforms(&mut self, uniforms: &GroupUniforms) {
        self.uniforms = *uniforms;
    }

    fn set_draw_range(&mut self, count: usize) {
        self.draw_range = count;
    }

    fn dispose(&mut self) {
        for slot in self.buffers.iter_mut() {
            if let Some(b) = slot.take() {
                b.buffer.destroy();
            }
        }
    }
}
