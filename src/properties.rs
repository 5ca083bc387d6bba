//! Emitter property groups and the bookkeeping that turns a property change
//! into attribute rewrites.
//!
//! Properties are read through plain references. Writes go through a
//! `PropertyMut` guard so that every change is recorded in the owning
//! emitter's `ChangeTracker`.

use std::ops::Deref;

use cgmath::Vector3;
use log::warn;

use crate::attribute::{AttributeKind, ATTRIBUTE_COUNT};
use crate::color::Color;
use crate::config::{
    finite_or, finite_vec_or, ColorOptions, CurveOptions, ForceOptions, PositionOptions,
    RotationOptions, ScalarOptions,
};
use crate::distribution::Distribution;
use crate::lifetime_curve::LifetimeCurve;

/// The named property groups of an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Position,
    Velocity,
    Acceleration,
    Drag,
    Wiggle,
    Rotation,
    MaxAge,
    Color,
    Opacity,
    Size,
    Angle,
}

const PROPERTY_COUNT: usize = 11;

impl PropertyKey {
    pub const ALL: [PropertyKey; PROPERTY_COUNT] = [
        PropertyKey::Position,
        PropertyKey::Velocity,
        PropertyKey::Acceleration,
        PropertyKey::Drag,
        PropertyKey::Wiggle,
        PropertyKey::Rotation,
        PropertyKey::MaxAge,
        PropertyKey::Color,
        PropertyKey::Opacity,
        PropertyKey::Size,
        PropertyKey::Angle,
    ];

    /// Attribute channels whose values are derived from this property.
    pub fn channels(self) -> &'static [AttributeKind] {
        match self {
            PropertyKey::Position => &[AttributeKind::Position],
            PropertyKey::Velocity => &[AttributeKind::Velocity],
            PropertyKey::Acceleration | PropertyKey::Drag => &[AttributeKind::Acceleration],
            PropertyKey::Wiggle | PropertyKey::MaxAge => &[AttributeKind::Params],
            PropertyKey::Rotation => &[AttributeKind::Rotation, AttributeKind::RotationCenter],
            PropertyKey::Color => &[AttributeKind::Color],
            PropertyKey::Opacity => &[AttributeKind::Opacity],
            PropertyKey::Size => &[AttributeKind::Size],
            PropertyKey::Angle => &[AttributeKind::Angle],
        }
    }

    /// Value a setter falls back to when given a non-finite number.
    pub fn default_value(self) -> f32 {
        match self {
            PropertyKey::MaxAge => 2.0,
            PropertyKey::Opacity | PropertyKey::Size => 1.0,
            _ => 0.0,
        }
    }
}

/// Per-emitter record of which channels must be rewritten.
///
/// A property change raises the channel's update flag with a zero count. Each
/// activated particle bumps the count, and once a full population has been
/// rewritten the flag drops again. Randomize flags are separate: they decide
/// whether a channel is re-rolled on every respawn.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    update_flags: [bool; ATTRIBUTE_COUNT],
    update_counts: [usize; ATTRIBUTE_COUNT],
    randomize: [bool; PROPERTY_COUNT],
    defines_dirty: bool,
}

impl ChangeTracker {
    pub fn request_rewrite(&mut self, key: PropertyKey) {
        for kind in key.channels() {
            self.update_flags[kind.index()] = true;
            self.update_counts[kind.index()] = 0;
        }
        self.defines_dirty = true;
    }

    /// Drops pending rewrites, after every slot has been freshly assigned.
    pub fn clear_rewrites(&mut self) {
        self.update_flags = [false; ATTRIBUTE_COUNT];
        self.update_counts = [0; ATTRIBUTE_COUNT];
    }

    pub fn set_randomize(&mut self, key: PropertyKey, randomize: bool) {
        self.randomize[key as usize] = randomize;
    }

    pub fn needs_rewrite(&self, kind: AttributeKind) -> bool {
        self.update_flags[kind.index()]
    }

    pub fn rewrite_count(&self, kind: AttributeKind) -> usize {
        self.update_counts[kind.index()]
    }

    /// True if any property feeding `kind` is re-rolled on respawn.
    pub fn resets_on_respawn(&self, kind: AttributeKind) -> bool {
        PropertyKey::ALL
            .iter()
            .any(|&key| self.randomize[key as usize] && key.channels().contains(&kind))
    }

    /// Records one rewritten particle of `kind`.
    pub fn note_rewrite(&mut self, kind: AttributeKind, particle_count: usize) {
        let i = kind.index();
        if !self.update_flags[i] {
            return;
        }
        if self.update_counts[i] >= particle_count {
            self.update_flags[i] = false;
            self.update_counts[i] = 0;
        } else {
            self.update_counts[i] += 1;
        }
    }

    pub fn defines_dirty(&self) -> bool {
        self.defines_dirty
    }

    pub fn clear_defines_dirty(&mut self) {
        self.defines_dirty = false;
    }
}

/// Write access to one property. Reads go through `Deref`.
pub struct PropertyMut<'a, P> {
    property: &'a mut P,
    tracker: &'a mut ChangeTracker,
    key: PropertyKey,
}

impl<'a, P> PropertyMut<'a, P> {
    pub(crate) fn new(property: &'a mut P, tracker: &'a mut ChangeTracker, key: PropertyKey) -> Self {
        PropertyMut {
            property,
            tracker,
            key,
        }
    }

    fn changed(&mut self) {
        self.tracker.request_rewrite(self.key);
    }

    fn randomize_changed(&mut self, randomize: bool) {
        self.tracker.set_randomize(self.key, randomize);
    }

    fn finite(&self, value: f32, default: f32, field: &str) -> f32 {
        finite_or(value, default, format_args!("{:?}.{}", self.key, field))
    }

    fn finite_vec3(&self, value: Vector3<f32>, default: [f32; 3], field: &str) -> Vector3<f32> {
        finite_vec3_or(value, default, format_args!("{:?}.{}", self.key, field))
    }
}

impl<P> Deref for PropertyMut<'_, P> {
    type Target = P;
    fn deref(&self) -> &P {
        self.property
    }
}

fn vec3(v: [f32; 3]) -> Vector3<f32> {
    Vector3::new(v[0], v[1], v[2])
}

fn finite_vec3_or(
    value: Vector3<f32>,
    default: [f32; 3],
    what: impl std::fmt::Display,
) -> Vector3<f32> {
    vec3(finite_vec_or([value.x, value.y, value.z], default, what))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionProperty {
    pub value: Vector3<f32>,
    pub spread: Vector3<f32>,
    pub spread_clamp: Vector3<f32>,
    pub radius: f32,
    pub radius_scale: Vector3<f32>,
    pub distribution: Distribution,
    pub randomize: bool,
}

impl PositionProperty {
    pub fn from_options(options: &PositionOptions, default_distribution: Distribution) -> Self {
        PositionProperty {
            value: vec3(options.value),
            spread: vec3(options.spread),
            spread_clamp: vec3(options.spread_clamp),
            radius: options.radius,
            radius_scale: vec3(options.radius_scale),
            distribution: options.distribution.unwrap_or(default_distribution),
            randomize: options.randomize,
        }
    }
}

impl PropertyMut<'_, PositionProperty> {
    pub fn set_value(&mut self, value: Vector3<f32>) {
        self.property.value = self.finite_vec3(value, [0.0; 3], "value");
        self.changed();
    }

    pub fn set_spread(&mut self, spread: Vector3<f32>) {
        self.property.spread = self.finite_vec3(spread, [0.0; 3], "spread");
        self.changed();
    }

    pub fn set_spread_clamp(&mut self, spread_clamp: Vector3<f32>) {
        self.property.spread_clamp = self.finite_vec3(spread_clamp, [0.0; 3], "spread_clamp");
        self.changed();
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.property.radius = self.finite(radius, 10.0, "radius");
        self.changed();
    }

    pub fn set_radius_scale(&mut self, radius_scale: Vector3<f32>) {
        self.property.radius_scale = self.finite_vec3(radius_scale, [1.0; 3], "radius_scale");
        self.changed();
    }

    pub fn set_distribution(&mut self, distribution: Distribution) {
        self.property.distribution = distribution;
        self.changed();
    }

    pub fn set_randomize(&mut self, randomize: bool) {
        self.property.randomize = randomize;
        self.randomize_changed(randomize);
    }
}

/// Velocity or acceleration.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceProperty {
    pub value: Vector3<f32>,
    pub spread: Vector3<f32>,
    pub distribution: Distribution,
    pub randomize: bool,
}

impl ForceProperty {
    pub fn from_options(options: &ForceOptions, default_distribution: Distribution) -> Self {
        ForceProperty {
            value: vec3(options.value),
            spread: vec3(options.spread),
            distribution: options.distribution.unwrap_or(default_distribution),
            randomize: options.randomize,
        }
    }
}

impl PropertyMut<'_, ForceProperty> {
    pub fn set_value(&mut self, value: Vector3<f32>) {
        self.property.value = self.finite_vec3(value, [0.0; 3], "value");
        self.changed();
    }

    pub fn set_spread(&mut self, spread: Vector3<f32>) {
        self.property.spread = self.finite_vec3(spread, [0.0; 3], "spread");
        self.changed();
    }

    pub fn set_distribution(&mut self, distribution: Distribution) {
        self.property.distribution = distribution;
        self.changed();
    }

    pub fn set_randomize(&mut self, randomize: bool) {
        self.property.randomize = randomize;
        self.randomize_changed(randomize);
    }
}

/// Drag, wiggle and max age.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarProperty {
    pub value: f32,
    pub spread: f32,
    pub randomize: bool,
}

impl ScalarProperty {
    pub fn from_options(options: &ScalarOptions) -> Self {
        ScalarProperty {
            value: options.value,
            spread: options.spread,
            randomize: options.randomize,
        }
    }

    /// Largest value a sample can take.
    pub fn upper_bound(&self) -> f32 {
        self.value + self.spread
    }
}

impl PropertyMut<'_, ScalarProperty> {
    pub fn set_value(&mut self, value: f32) {
        self.property.value = self.finite(value, self.key.default_value(), "value");
        self.changed();
    }

    pub fn set_spread(&mut self, spread: f32) {
        self.property.spread = self.finite(spread, 0.0, "spread");
        self.changed();
    }

    pub fn set_randomize(&mut self, randomize: bool) {
        self.property.randomize = randomize;
        self.randomize_changed(randomize);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RotationProperty {
    pub axis: Vector3<f32>,
    pub axis_spread: f32,
    pub angle: f32,
    pub angle_spread: f32,
    pub is_static: bool,
    pub center: Vector3<f32>,
    pub randomize: bool,
}

impl RotationProperty {
    pub fn from_options(options: &RotationOptions, position: Vector3<f32>) -> Self {
        RotationProperty {
            axis: vec3(options.axis),
            axis_spread: options.axis_spread,
            angle: options.angle,
            angle_spread: options.angle_spread,
            is_static: options.is_static,
            center: options.center.map_or(position, vec3),
            randomize: options.randomize,
        }
    }
}

impl PropertyMut<'_, RotationProperty> {
    pub fn set_axis(&mut self, axis: Vector3<f32>) {
        self.property.axis = self.finite_vec3(axis, [0.0, 1.0, 0.0], "axis");
        self.changed();
    }

    pub fn set_axis_spread(&mut self, axis_spread: f32) {
        self.property.axis_spread = self.finite(axis_spread, 0.0, "axis_spread");
        self.changed();
    }

    pub fn set_angle(&mut self, angle: f32) {
        self.property.angle = self.finite(angle, 0.0, "angle");
        self.changed();
    }

    pub fn set_angle_spread(&mut self, angle_spread: f32) {
        self.property.angle_spread = self.finite(angle_spread, 0.0, "angle_spread");
        self.changed();
    }

    pub fn set_static(&mut self, is_static: bool) {
        self.property.is_static = is_static;
        self.changed();
    }

    /// A non-finite center keeps the current one.
    pub fn set_center(&mut self, center: Vector3<f32>) {
        let current = self.property.center;
        self.property.center =
            self.finite_vec3(center, [current.x, current.y, current.z], "center");
        self.changed();
    }

    pub fn set_randomize(&mut self, randomize: bool) {
        self.property.randomize = randomize;
        self.randomize_changed(randomize);
    }
}

/// Color over lifetime. Spread is per RGB channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorProperty {
    pub value: LifetimeCurve<Color>,
    pub spread: LifetimeCurve<Vector3<f32>>,
    pub randomize: bool,
}

impl ColorProperty {
    pub fn from_options(options: &ColorOptions) -> Self {
        let spread: Vec<Vector3<f32>> = options.spread.to_vec().into_iter().map(vec3).collect();
        ColorProperty {
            value: LifetimeCurve::from_keyframes_or(&options.value.to_vec(), Color::WHITE),
            spread: LifetimeCurve::from_keyframes_or(&spread, Vector3::new(0.0, 0.0, 0.0)),
            randomize: options.randomize,
        }
    }

    /// Both curves hold a single repeated keyframe.
    pub fn is_uniform(&self) -> bool {
        self.value.is_uniform() && self.spread.is_uniform()
    }
}

impl PropertyMut<'_, ColorProperty> {
    /// Empty input is ignored.
    pub fn set_value(&mut self, keyframes: &[Color]) {
        let keyframes: Vec<Color> = keyframes
            .iter()
            .map(|c| {
                let rgb = finite_vec_or([c.r, c.g, c.b], [1.0; 3], "Color.value");
                Color::new(rgb[0], rgb[1], rgb[2])
            })
            .collect();
        match LifetimeCurve::from_keyframes(&keyframes) {
            Some(curve) => {
                self.property.value = curve;
                self.changed();
            }
            None => warn!("Ignoring empty color keyframes"),
        }
    }

    pub fn set_spread(&mut self, keyframes: &[Vector3<f32>]) {
        let keyframes: Vec<Vector3<f32>> = keyframes
            .iter()
            .map(|v| finite_vec3_or(*v, [0.0; 3], "Color.spread"))
            .collect();
        match LifetimeCurve::from_keyframes(&keyframes) {
            Some(curve) => {
                self.property.spread = curve;
                self.changed();
            }
            None => warn!("Ignoring empty color spread keyframes"),
        }
    }

    pub fn set_randomize(&mut self, randomize: bool) {
        self.property.randomize = randomize;
        self.randomize_changed(randomize);
    }
}

/// Opacity, size or angle over lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveProperty {
    pub value: LifetimeCurve<f32>,
    pub spread: LifetimeCurve<f32>,
    pub randomize: bool,
}

impl CurveProperty {
    pub fn from_options(options: &CurveOptions, fallback: f32) -> Self {
        CurveProperty {
            value: LifetimeCurve::from_keyframes_or(&options.value.to_vec(), fallback),
            spread: LifetimeCurve::from_keyframes_or(&options.spread.to_vec(), 0.0),
            randomize: options.randomize,
        }
    }

    pub fn is_uniform(&self) -> bool {
        self.value.is_uniform() && self.spread.is_uniform()
    }

    /// Largest magnitude among all value and spread keyframes.
    pub fn max_magnitude(&self) -> f32 {
        self.value
            .iter()
            .chain(self.spread.iter())
            .fold(0.0f32, |acc, v| acc.max(v.abs()))
    }
}

impl PropertyMut<'_, CurveProperty> {
    pub fn set_value(&mut self, keyframes: &[f32]) {
        let default = self.key.default_value();
        let keyframes: Vec<f32> = keyframes
            .iter()
            .map(|v| self.finite(*v, default, "value"))
            .collect();
        match LifetimeCurve::from_keyframes(&keyframes) {
            Some(curve) => {
                self.property.value = curve;
                self.changed();
            }
            None => warn!("Ignoring empty keyframes"),
        }
    }

    pub fn set_spread(&mut self, keyframes: &[f32]) {
        let keyframes: Vec<f32> = keyframes
            .iter()
            .map(|v| self.finite(*v, 0.0, "spread"))
            .collect();
        match LifetimeCurve::from_keyframes(&keyframes) {
            Some(curve) => {
                self.property.spread = curve;
                self.changed();
            }
            None => warn!("Ignoring empty spread keyframes"),
        }
    }

    pub fn set_randomize(&mut self, randomize: bool) {
        self.property.randomize = randomize;
        self.randomize_changed(randomize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Keyframes;
    use crate::lifetime_curve::VALUE_OVER_LIFETIME_LENGTH;

    #[test]
    fn setter_requests_rewrite_of_its_channel() {
        let mut tracker = ChangeTracker::default();
        let mut drag = ScalarProperty::from_options(&ScalarOptions::default());
        PropertyMut::new(&mut drag, &mut tracker, PropertyKey::Drag).set_value(0.5);
        assert_eq!(drag.value, 0.5);
        assert!(tracker.needs_rewrite(AttributeKind::Acceleration));
        assert!(!tracker.needs_rewrite(AttributeKind::Position));
        assert!(tracker.defines_dirty());
    }

    #[test]
    fn randomize_only_sets_reset_flag() {
        let mut tracker = ChangeTracker::default();
        let mut size = CurveProperty::from_options(&CurveOptions::constant(1.0), 1.0);
        PropertyMut::new(&mut size, &mut tracker, PropertyKey::Size).set_randomize(true);
        assert!(size.randomize);
        assert!(!tracker.needs_rewrite(AttributeKind::Size));
        assert!(tracker.resets_on_respawn(AttributeKind::Size));
        assert!(!tracker.defines_dirty());
    }

    #[test]
    fn shared_channel_resets_while_any_property_randomizes() {
        let mut tracker = ChangeTracker::default();
        tracker.set_randomize(PropertyKey::MaxAge, true);
        tracker.set_randomize(PropertyKey::Wiggle, true);
        tracker.set_randomize(PropertyKey::MaxAge, false);
        assert!(tracker.resets_on_respawn(AttributeKind::Params));
        tracker.set_randomize(PropertyKey::Wiggle, false);
        assert!(!tracker.resets_on_respawn(AttributeKind::Params));
    }

    #[test]
    fn rewrite_flag_clears_after_full_population() {
        let mut tracker = ChangeTracker::default();
        tracker.request_rewrite(PropertyKey::Color);
        for _ in 0..3 {
            tracker.note_rewrite(AttributeKind::Color, 3);
            assert!(tracker.needs_rewrite(AttributeKind::Color));
        }
        assert_eq!(tracker.rewrite_count(AttributeKind::Color), 3);
        tracker.note_rewrite(AttributeKind::Color, 3);
        assert!(!tracker.needs_rewrite(AttributeKind::Color));
        assert_eq!(tracker.rewrite_count(AttributeKind::Color), 0);
    }

    #[test]
    fn rotation_touches_both_channels() {
        let mut tracker = ChangeTracker::default();
        let mut rotation =
            RotationProperty::from_options(&RotationOptions::default(), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(rotation.center, Vector3::new(1.0, 2.0, 3.0));
        PropertyMut::new(&mut rotation, &mut tracker, PropertyKey::Rotation).set_angle(1.0);
        assert!(tracker.needs_rewrite(AttributeKind::Rotation));
        assert!(tracker.needs_rewrite(AttributeKind::RotationCenter));
    }

    #[test]
    fn curve_setter_normalizes_length() {
        let mut tracker = ChangeTracker::default();
        let mut opacity = CurveProperty::from_options(&CurveOptions::constant(1.0), 1.0);
        {
            let mut guard = PropertyMut::new(&mut opacity, &mut tracker, PropertyKey::Opacity);
            guard.set_value(&[0.25]);
            guard.set_value(&[]);
            assert_eq!(guard.value.first(), 0.25);
        }
        assert_eq!(opacity.value.keyframes(), &[0.25; VALUE_OVER_LIFETIME_LENGTH]);
        assert!(opacity.is_uniform());
    }

    #[test]
    fn options_fill_defaults() {
        let position =
            PositionProperty::from_options(&PositionOptions::default(), Distribution::Sphere);
        assert_eq!(position.distribution, Distribution::Sphere);
        assert_eq!(position.radius, 10.0);

        let color = ColorProperty::from_options(&ColorOptions {
            value: Keyframes::Many(vec![Color::BLACK, Color::WHITE]),
            ..ColorOptions::default()
        });
        assert!(!color.is_uniform());
        assert_eq!(color.value.get(3), Color::WHITE);
    }

    #[test]
    fn non_finite_setters_fall_back_to_defaults() {
        let mut tracker = ChangeTracker::default();

        let mut max_age = ScalarProperty::from_options(&ScalarOptions::new(1.0, 0.5));
        {
            let mut guard = PropertyMut::new(&mut max_age, &mut tracker, PropertyKey::MaxAge);
            guard.set_value(f32::NAN);
            guard.set_spread(f32::INFINITY);
        }
        assert_eq!(max_age.value, 2.0);
        assert_eq!(max_age.spread, 0.0);

        let mut drag = ScalarProperty::from_options(&ScalarOptions::new(0.5, 0.0));
        PropertyMut::new(&mut drag, &mut tracker, PropertyKey::Drag).set_value(f32::NAN);
        assert_eq!(drag.value, 0.0);

        let mut position =
            PositionProperty::from_options(&PositionOptions::default(), Distribution::Box);
        {
            let mut guard = PropertyMut::new(&mut position, &mut tracker, PropertyKey::Position);
            guard.set_value(Vector3::new(f32::NAN, 1.0, 1.0));
            guard.set_radius(f32::NEG_INFINITY);
            guard.set_radius_scale(Vector3::new(2.0, f32::NAN, 2.0));
        }
        assert_eq!(position.value, Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(position.radius, 10.0);
        assert_eq!(position.radius_scale, Vector3::new(1.0, 1.0, 1.0));

        let mut velocity =
            ForceProperty::from_options(&ForceOptions::default(), Distribution::Box);
        PropertyMut::new(&mut velocity, &mut tracker, PropertyKey::Velocity)
            .set_spread(Vector3::new(1.0, f32::INFINITY, 1.0));
        assert_eq!(velocity.spread, Vector3::new(0.0, 0.0, 0.0));

        let mut rotation =
            RotationProperty::from_options(&RotationOptions::default(), Vector3::new(1.0, 2.0, 3.0));
        {
            let mut guard = PropertyMut::new(&mut rotation, &mut tracker, PropertyKey::Rotation);
            guard.set_axis(Vector3::new(f32::NAN, 0.0, 0.0));
            guard.set_angle(f32::INFINITY);
            guard.set_center(Vector3::new(f32::NAN, 0.0, 0.0));
        }
        assert_eq!(rotation.axis, Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(rotation.angle, 0.0);
        assert_eq!(rotation.center, Vector3::new(1.0, 2.0, 3.0));

        let mut size = CurveProperty::from_options(&CurveOptions::constant(0.5), 1.0);
        PropertyMut::new(&mut size, &mut tracker, PropertyKey::Size).set_value(&[0.5, f32::NAN]);
        assert_eq!(size.value.first(), 0.5);
        assert_eq!(size.value.get(VALUE_OVER_LIFETIME_LENGTH - 1), 1.0);
        assert!(size.value.iter().all(|v| v.is_finite()));

        let mut color = ColorProperty::from_options(&ColorOptions::default());
        {
            let mut guard = PropertyMut::new(&mut color, &mut tracker, PropertyKey::Color);
            guard.set_value(&[Color::new(f32::NAN, 0.0, 0.0)]);
            guard.set_spread(&[Vector3::new(0.1, f32::NAN, 0.1)]);
        }
        assert_eq!(color.value.first(), Color::WHITE);
        assert_eq!(color.spread.first(), Vector3::new(0.0, 0.0, 0.0));
    }
}
