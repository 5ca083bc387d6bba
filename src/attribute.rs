//! Per-particle attribute channels and their dirty-range bookkeeping.

use log::trace;

use crate::packed_buffer::PackedBuffer;
use crate::render_sink::{BufferUsage, RenderSink, UploadRange};

/// The named per-particle attributes uploaded to the vertex shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Position,
    Acceleration,
    Velocity,
    Rotation,
    RotationCenter,
    Params,
    Size,
    Angle,
    Color,
    Opacity,
}

pub const ATTRIBUTE_COUNT: usize = 10;

impl AttributeKind {
    pub const ALL: [AttributeKind; ATTRIBUTE_COUNT] = [
        AttributeKind::Position,
        AttributeKind::Acceleration,
        AttributeKind::Velocity,
        AttributeKind::Rotation,
        AttributeKind::RotationCenter,
        AttributeKind::Params,
        AttributeKind::Size,
        AttributeKind::Angle,
        AttributeKind::Color,
        AttributeKind::Opacity,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn component_count(self) -> usize {
        match self {
            AttributeKind::Position
            | AttributeKind::Velocity
            | AttributeKind::Rotation
            | AttributeKind::RotationCenter => 3,
            AttributeKind::Acceleration
            | AttributeKind::Params
            | AttributeKind::Size
            | AttributeKind::Angle
            | AttributeKind::Color
            | AttributeKind::Opacity => 4,
        }
    }

    /// Attribute name in the shader source.
    pub fn name(self) -> &'static str {
        match self {
            AttributeKind::Position => "position",
            AttributeKind::Acceleration => "acceleration",
            AttributeKind::Velocity => "velocity",
            AttributeKind::Rotation => "rotation",
            AttributeKind::RotationCenter => "rotationCenter",
            AttributeKind::Params => "params",
            AttributeKind::Size => "size",
            AttributeKind::Angle => "angle",
            AttributeKind::Color => "color",
            AttributeKind::Opacity => "opacity",
        }
    }
}

/// Inclusive range of touched slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyRange {
    Empty,
    Span { min: usize, max: usize },
}

impl Default for DirtyRange {
    fn default() -> Self {
        DirtyRange::Empty
    }
}

impl DirtyRange {
    pub fn is_empty(&self) -> bool {
        *self == DirtyRange::Empty
    }

    pub fn include(&mut self, index: usize) {
        self.include_range(index, index);
    }

    pub fn include_range(&mut self, min: usize, max: usize) {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        *self = match *self {
            DirtyRange::Empty => DirtyRange::Span { min, max },
            DirtyRange::Span { min: a, max: b } => DirtyRange::Span {
                min: a.min(min),
                max: b.max(max),
            },
        };
    }

    pub fn merge(&mut self, other: DirtyRange) {
        if let DirtyRange::Span { min, max } = other {
            self.include_range(min, max);
        }
    }

    pub fn bounds(&self) -> Option<(usize, usize)> {
        match *self {
            DirtyRange::Empty => None,
            DirtyRange::Span { min, max } => Some((min, max)),
        }
    }
}

/// One attribute's backing storage plus upload state.
#[derive(Debug, Clone)]
pub struct AttributeChannel {
    kind: AttributeKind,
    buffer: PackedBuffer,
    dynamic: bool,
    usage: BufferUsage,
    dirty: DirtyRange,
    needs_full_refresh: bool,
}

impl AttributeChannel {
    pub fn new(kind: AttributeKind, dynamic: bool) -> Self {
        AttributeChannel {
            kind,
            buffer: PackedBuffer::new(0, kind.component_count()),
            dynamic,
            usage: usage_hint(dynamic),
            dirty: DirtyRange::Empty,
            needs_full_refresh: false,
        }
    }

    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    pub fn component_count(&self) -> usize {
        self.buffer.component_count()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn buffer(&self) -> &PackedBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut PackedBuffer {
        &mut self.buffer
    }

    pub fn ensure_capacity(&mut self, size: usize) {
        if self.buffer.len() == size {
            return;
        }
        trace!(
            "Resizing {} from {} to {}",
            self.kind.name(),
            self.buffer.len(),
            size
        );
        self.buffer.set_size(size);
    }

    pub fn splice(&mut self, start: usize, end: usize) {
        self.buffer.splice(start, end);
    }

    pub fn mark_dirty(&mut self, min: usize, max: usize) {
        self.dirty.include_range(min, max);
    }

    pub fn merge_dirty(&mut self, range: DirtyRange) {
        self.dirty.merge(range);
    }

    pub fn dirty_range(&self) -> DirtyRange {
        self.dirty
    }

    pub fn reset_dirty(&mut self) {
        self.dirty = DirtyRange::Empty;
    }

    pub fn needs_full_refresh(&self) -> bool {
        self.needs_full_refresh
    }

    /// The whole buffer is re-uploaded and rebound on the next commit.
    pub fn force_full_refresh(&mut self) {
        self.needs_full_refresh = true;
        self.usage = BufferUsage::Static;
        if !self.buffer.is_empty() {
            self.dirty = DirtyRange::Span {
                min: 0,
                max: self.buffer.len() - 1,
            };
        }
    }

    /// Restores the configured usage hint after a full refresh.
    pub fn reset_dynamic(&mut self) {
        self.usage = usage_hint(self.dynamic);
    }

    /// Hands the pending changes to the sink. Returns whether anything was sent.
    pub fn commit<S: RenderSink + ?Sized>(&mut self, sink: &mut S) -> bool {
        let component_count = self.buffer.component_count();
        let data = self.buffer.as_slice();
        if self.needs_full_refresh {
            sink.upload(
                self.kind,
                data,
                component_count,
                UploadRange::Full,
                self.usage,
            );
            self.needs_full_refresh = false;
            self.dirty = DirtyRange::Empty;
            return true;
        }
        let (min, max) = match self.dirty.bounds() {
            Some(bounds) => bounds,
            None => return false,
        };
        self.dirty = DirtyRange::Empty;
        let offset = min * component_count;
        if offset >= data.len() {
            return false;
        }
        let count = ((max - min + 1) * component_count).min(data.len() - offset);
        sink.upload(
            self.kind,
            data,
            component_count,
            UploadRange::Partial { offset, count },
            self.usage,
        );
        true
    }
}

fn usage_hint(dynamic: bool) -> BufferUsage {
    if dynamic {
        BufferUsage::Dynamic
    } else {
        BufferUsage::Static
    }
}

/// Every channel of a particle system, indexed by `AttributeKind`.
#[derive(Debug, Clone)]
pub struct AttributeSet {
    channels: Vec<AttributeChannel>,
}

impl AttributeSet {
    pub fn new() -> Self {
        AttributeSet {
            channels: AttributeKind::ALL
                .iter()
                .map(|&kind| AttributeChannel::new(kind, true))
                .collect(),
        }
    }

    pub fn get(&self, kind: AttributeKind) -> &AttributeChannel {
        &self.channels[kind.index()]
    }

    pub fn get_mut(&mut self, kind: AttributeKind) -> &mut AttributeChannel {
        &mut self.channels[kind.index()]
    }

    pub fn buffer(&self, kind: AttributeKind) -> &PackedBuffer {
        self.get(kind).buffer()
    }

    pub fn buffer_mut(&mut self, kind: AttributeKind) -> &mut PackedBuffer {
        self.get_mut(kind).buffer_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeChannel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AttributeChannel> {
        self.channels.iter_mut()
    }

    pub fn capacity(&self) -> usize {
        self.channels.first().map_or(0, |c| c.capacity())
    }

    pub fn ensure_capacity(&mut self, size: usize) {
        for channel in self.channels.iter_mut() {
            channel.ensure_capacity(size);
        }
    }

    pub fn splice(&mut self, start: usize, end: usize) {
        for channel in self.channels.iter_mut() {
            channel.splice(start, end);
        }
    }

    pub fn reset_dirty(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.reset_dirty();
        }
    }
}

impl Default for AttributeSet {
    fn default() -> Self {
        AttributeSet::new()
    }
}
