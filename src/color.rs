use cgmath::{InnerSpace, Vector3};
use serde::{Deserialize, Serialize};

/// Linear RGB color with channels nominally in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

impl Color {
    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Color { r, g, b }
    }

    pub fn from_hex(hex: u32) -> Self {
        Color {
            r: ((hex >> 16) & 0xff) as f32 / 255.0,
            g: ((hex >> 8) & 0xff) as f32 / 255.0,
            b: (hex & 0xff) as f32 / 255.0,
        }
    }

    pub fn clamped(self) -> Self {
        Color {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
        }
    }

    /// 0xRRGGBB of the clamped color.
    pub fn to_hex(self) -> u32 {
        let c = self.clamped();
        ((c.r * 255.0) as u32) << 16 | ((c.g * 255.0) as u32) << 8 | (c.b * 255.0) as u32
    }

    /// The hex value as a float, which is how colors are stored in attribute
    /// buffers. 24 bits fit exactly in an f32 mantissa.
    pub fn to_packed(self) -> f32 {
        self.to_hex() as f32
    }
}

/// Packs a unit axis into one float: remap each component from [-1, 1] to
/// [0, 1] and encode the result like a color.
pub fn pack_axis(axis: Vector3<f32>) -> f32 {
    let axis = if axis.magnitude2() > 0.0 {
        axis.normalize()
    } else {
        axis
    };
    let remapped = (axis + Vector3::new(1.0, 1.0, 1.0)) * 0.5;
    Color::new(remapped.x, remapped.y, remapped.z).to_packed()
}

/// Inverse of `pack_axis`, up to 8-bit quantization.
pub fn unpack_axis(packed: f32) -> Vector3<f32> {
    let c = Color::from_hex(packed as u32);
    Vector3::new(c.r * 2.0 - 1.0, c.g * 2.0 - 1.0, c.b * 2.0 - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_packing() {
        assert_eq!(Color::WHITE.to_hex(), 0xffffff);
        assert_eq!(Color::new(1.0, 0.0, 0.0).to_hex(), 0xff0000);
        assert_eq!(Color::new(2.0, -1.0, 0.0).to_hex(), 0xff0000);
        assert_eq!(Color::from_hex(0x00ff00), Color::new(0.0, 1.0, 0.0));
        assert_eq!(Color::new(0.0, 0.0, 1.0).to_packed(), 255.0);
    }

    #[test]
    fn axis_round_trip_is_close() {
        let axis = Vector3::new(0.0, 1.0, 0.0);
        let unpacked = unpack_axis(pack_axis(axis));
        assert!((unpacked - axis).magnitude() < 0.02);

        let diagonal = Vector3::new(1.0, -1.0, 1.0).normalize();
        let unpacked = unpack_axis(pack_axis(diagonal));
        assert!((unpacked - diagonal).magnitude() < 0.02);
    }
}
