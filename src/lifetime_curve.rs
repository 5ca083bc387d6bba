use cgmath::Vector3;

use crate::color::Color;

/// Keyframes per value-over-lifetime property. The vertex shader is compiled
/// with the same number.
pub const VALUE_OVER_LIFETIME_LENGTH: usize = 4;

/// Linear interpolation between two values of the same type.
pub trait Lerp: Copy {
    fn lerp(self, other: Self, t: f32) -> Self;
}

impl Lerp for f32 {
    fn lerp(self, other: Self, t: f32) -> Self {
        self + (other - self) * t
    }
}

impl Lerp for Vector3<f32> {
    fn lerp(self, other: Self, t: f32) -> Self {
        self + (other - self) * t
    }
}

impl Lerp for Color {
    fn lerp(self, other: Self, t: f32) -> Self {
        Color {
            r: self.r.lerp(other.r, t),
            g: self.g.lerp(other.g, t),
            b: self.b.lerp(other.b, t),
        }
    }
}

/// Resamples `src` to `new_length` entries by linear interpolation over the
/// keyframe index. First and last entries are preserved exactly.
pub fn interpolate_array<T: Lerp>(src: &[T], new_length: usize) -> Vec<T> {
    if src.is_empty() || new_length == 0 {
        return Vec::new();
    }
    let first = src[0];
    let last = src[src.len() - 1];
    if new_length == 1 {
        return vec![first];
    }
    let factor = (src.len() - 1) as f32 / (new_length - 1) as f32;
    let mut out = Vec::with_capacity(new_length);
    out.push(first);
    for i in 1..new_length - 1 {
        let f = i as f32 * factor;
        let before = f.floor() as usize;
        let after = (f.ceil() as usize).min(src.len() - 1);
        out.push(src[before].lerp(src[after], f - before as f32));
    }
    out.push(last);
    out
}

/// A property sampled at `VALUE_OVER_LIFETIME_LENGTH` evenly spaced points of
/// a particle's life. The length is fixed by the type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifetimeCurve<T> {
    keyframes: [T; VALUE_OVER_LIFETIME_LENGTH],
}

impl<T: Lerp> LifetimeCurve<T> {
    pub fn constant(value: T) -> Self {
        LifetimeCurve {
            keyframes: [value; VALUE_OVER_LIFETIME_LENGTH],
        }
    }

    /// Normalizes any non-empty keyframe list to the fixed length.
    pub fn from_keyframes(keyframes: &[T]) -> Option<Self> {
        let resampled = interpolate_array(keyframes, VALUE_OVER_LIFETIME_LENGTH);
        if resampled.len() != VALUE_OVER_LIFETIME_LENGTH {
            return None;
        }
        let mut curve = LifetimeCurve::constant(resampled[0]);
        curve.keyframes.copy_from_slice(&resampled);
        Some(curve)
    }

    pub fn from_keyframes_or(keyframes: &[T], fallback: T) -> Self {
        LifetimeCurve::from_keyframes(keyframes).unwrap_or_else(|| LifetimeCurve::constant(fallback))
    }

    pub fn keyframes(&self) -> &[T; VALUE_OVER_LIFETIME_LENGTH] {
        &self.keyframes
    }

    pub fn get(&self, index: usize) -> T {
        self.keyframes[index]
    }

    pub fn first(&self) -> T {
        self.keyframes[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.keyframes.iter()
    }
}

impl<T: Lerp + PartialEq> LifetimeCurve<T> {
    /// True when every keyframe holds the same value.
    pub fn is_uniform(&self) -> bool {
        self.keyframes.windows(2).all(|w| w[0] == w[1])
    }
}

impl<T: Lerp + Default> Default for LifetimeCurve<T> {
    fn default() -> Self {
        LifetimeCurve::constant(T::default())
    }
}
