//! Random sampling shapes used to place and launch particles.

use cgmath::{InnerSpace, Vector3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::color::{self, Color};

// Same constant as the particle shaders use.
const TWO_PI: f32 = 6.2832;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    Box,
    Sphere,
    Disc,
    Line,
}

impl Default for Distribution {
    fn default() -> Self {
        Distribution::Box
    }
}

/// `base` jittered uniformly by up to `spread / 2` either way.
pub fn random_float<R: Rng + ?Sized>(rng: &mut R, base: f32, spread: f32) -> f32 {
    base + spread * (rng.gen::<f32>() - 0.5)
}

/// Snaps `x` to a grid of `clamp` units. A zero clamp leaves `x` alone.
pub fn snap_to_multiple(x: f32, clamp: f32) -> f32 {
    if clamp == 0.0 {
        return x;
    }
    (x / clamp).round() * clamp - clamp * 0.5
}

pub fn random_vector3<R: Rng + ?Sized>(
    rng: &mut R,
    base: Vector3<f32>,
    spread: Vector3<f32>,
    spread_clamp: Vector3<f32>,
) -> Vector3<f32> {
    Vector3::new(
        snap_to_multiple(random_float(rng, base.x, spread.x), spread_clamp.x),
        snap_to_multiple(random_float(rng, base.y, spread.y), spread_clamp.y),
        snap_to_multiple(random_float(rng, base.z, spread.z), spread_clamp.z),
    )
}

fn random_radius<R: Rng + ?Sized>(
    rng: &mut R,
    radius: f32,
    radius_spread: f32,
    radius_spread_clamp: f32,
) -> f32 {
    let r = random_float(rng, radius, radius_spread);
    if radius_spread_clamp != 0.0 {
        (r / radius_spread_clamp).round() * radius_spread_clamp
    } else {
        r
    }
}

/// Uniform direction on the unit sphere, scaled by a jittered radius, then
/// per-axis by `radius_scale`, then moved to `base`.
pub fn random_vector3_on_sphere<R: Rng + ?Sized>(
    rng: &mut R,
    base: Vector3<f32>,
    radius: f32,
    radius_spread: f32,
    radius_scale: Vector3<f32>,
    radius_spread_clamp: f32,
) -> Vector3<f32> {
    let depth = 2.0 * rng.gen::<f32>() - 1.0;
    let t = TWO_PI * rng.gen::<f32>();
    let r = (1.0 - depth * depth).max(0.0).sqrt();
    let rand = random_radius(rng, radius, radius_spread, radius_spread_clamp);
    Vector3::new(
        r * t.cos() * rand * radius_scale.x,
        r * t.sin() * rand * radius_scale.y,
        depth * rand * radius_scale.z,
    ) + base
}

/// Like the sphere but confined to the XY plane through `base`.
pub fn random_vector3_on_disc<R: Rng + ?Sized>(
    rng: &mut R,
    base: Vector3<f32>,
    radius: f32,
    radius_spread: f32,
    radius_scale: Vector3<f32>,
    radius_spread_clamp: f32,
) -> Vector3<f32> {
    let t = TWO_PI * rng.gen::<f32>();
    let rand = random_radius(rng, radius, radius_spread, radius_spread_clamp).abs();
    Vector3::new(
        t.cos() * rand * radius_scale.x,
        t.sin() * rand * radius_scale.y,
        0.0,
    ) + base
}

/// A uniformly random point on the segment `start..end`.
pub fn random_vector3_on_line<R: Rng + ?Sized>(
    rng: &mut R,
    start: Vector3<f32>,
    end: Vector3<f32>,
) -> Vector3<f32> {
    start + (end - start) * rng.gen::<f32>()
}

/// Velocity pointing from `origin` out through `position` with a jittered
/// speed. A particle sitting on the origin gets no direction.
pub fn random_direction_from<R: Rng + ?Sized>(
    rng: &mut R,
    position: Vector3<f32>,
    origin: Vector3<f32>,
    speed: f32,
    speed_spread: f32,
) -> Vector3<f32> {
    let toward_origin = origin - position;
    let speed = random_float(rng, speed, speed_spread);
    if toward_origin.magnitude2() == 0.0 {
        return Vector3::new(0.0, 0.0, 0.0);
    }
    toward_origin.normalize() * -speed
}

/// `base` jittered per channel by up to `spread / 2`, clamped to [0, 1].
pub fn random_color<R: Rng + ?Sized>(rng: &mut R, base: Color, spread: Vector3<f32>) -> Color {
    Color::new(
        random_float(rng, base.r, spread.x),
        random_float(rng, base.g, spread.y),
        random_float(rng, base.b, spread.z),
    )
    .clamped()
}

/// Jitters each axis component by up to `axis_spread / 2`, renormalizes and
/// packs the result into one float.
pub fn random_packed_axis<R: Rng + ?Sized>(
    rng: &mut R,
    axis: Vector3<f32>,
    axis_spread: f32,
) -> f32 {
    let axis = if axis.magnitude2() > 0.0 {
        axis.normalize()
    } else {
        axis
    };
    let jittered = Vector3::new(
        random_float(rng, axis.x, axis_spread),
        random_float(rng, axis.y, axis_spread),
        random_float(rng, axis.z, axis_spread),
    );
    color::pack_axis(jittered)
}
