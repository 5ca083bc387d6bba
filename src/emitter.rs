//! A single emitter: its configuration and the state machine that ages,
//! kills and reactivates the particle slots it owns.

use std::ops::Range;

use cgmath::Vector3;
use log::{debug, trace, warn};
use rand::Rng;

use crate::attribute::{AttributeKind, AttributeSet, DirtyRange, ATTRIBUTE_COUNT};
use crate::config::EmitterOptions;
use crate::distribution::{self, Distribution};
use crate::lifetime_curve::VALUE_OVER_LIFETIME_LENGTH;
use crate::particle_system::{EmitterId, SystemId};
use crate::properties::{
    ChangeTracker, ColorProperty, CurveProperty, ForceProperty, PositionProperty, PropertyKey,
    PropertyMut, RotationProperty, ScalarProperty,
};

// Components of the params attribute.
const PARAM_ALIVE: usize = 0;
const PARAM_AGE: usize = 1;
const PARAM_MAX_AGE: usize = 2;

// Position goes first: sphere and disc forces point away from it.
const ASSIGNMENT_ORDER: [AttributeKind; ATTRIBUTE_COUNT] = [
    AttributeKind::Position,
    AttributeKind::Velocity,
    AttributeKind::Acceleration,
    AttributeKind::Opacity,
    AttributeKind::Size,
    AttributeKind::Angle,
    AttributeKind::Rotation,
    AttributeKind::RotationCenter,
    AttributeKind::Params,
    AttributeKind::Color,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// 1 and -1 map to themselves; anything else is treated as forward.
    pub fn from_sign(sign: i32) -> Self {
        if sign < 0 {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    pub fn sign(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    /// Not part of any system.
    Unattached,
    /// Attached and activating particles.
    Alive,
    /// Attached, but disabled or past its duration. Slots keep their values.
    Dormant,
}

/// Where an attached emitter lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Attachment {
    pub id: EmitterId,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct Emitter {
    particle_count: usize,
    duration: Option<f32>,
    is_static: bool,
    active_multiplier: f32,
    direction: Direction,

    position: PositionProperty,
    velocity: ForceProperty,
    acceleration: ForceProperty,
    drag: ScalarProperty,
    wiggle: ScalarProperty,
    rotation: RotationProperty,
    max_age: ScalarProperty,
    color: ColorProperty,
    opacity: CurveProperty,
    size: CurveProperty,
    angle: CurveProperty,
    tracker: ChangeTracker,

    // State
    alive: bool,
    age: f32,
    emission_rate: f32,
    // Fractional slot index relative to the start of the range.
    activation_cursor: f32,
    active_particle_count: usize,
    attachment: Option<Attachment>,
    dirty: [DirtyRange; ATTRIBUTE_COUNT],
}

impl Default for Emitter {
    fn default() -> Self {
        Emitter::new(&EmitterOptions::default())
    }
}

impl Emitter {
    pub fn new(options: &EmitterOptions) -> Self {
        let mut options = options.clone();
        options.sanitize();
        let position = PositionProperty::from_options(&options.position, options.distribution);
        let rotation = RotationProperty::from_options(&options.rotation, position.value);
        let mut emitter = Emitter {
            particle_count: options.particle_count,
            duration: options.duration,
            is_static: options.is_static,
            active_multiplier: options.active_multiplier,
            direction: Direction::from_sign(options.direction),
            position,
            velocity: ForceProperty::from_options(&options.velocity, options.distribution),
            acceleration: ForceProperty::from_options(&options.acceleration, options.distribution),
            drag: ScalarProperty::from_options(&options.drag),
            wiggle: ScalarProperty::from_options(&options.wiggle),
            rotation,
            max_age: ScalarProperty::from_options(&options.max_age),
            color: ColorProperty::from_options(&options.color),
            opacity: CurveProperty::from_options(&options.opacity, 1.0),
            size: CurveProperty::from_options(&options.size, 1.0),
            angle: CurveProperty::from_options(&options.angle, 0.0),
            tracker: ChangeTracker::default(),
            alive: options.alive,
            age: 0.0,
            emission_rate: 0.0,
            activation_cursor: 0.0,
            active_particle_count: 0,
            attachment: None,
            dirty: [DirtyRange::Empty; ATTRIBUTE_COUNT],
        };
        let randomized = [
            (PropertyKey::Position, emitter.position.randomize),
            (PropertyKey::Velocity, emitter.velocity.randomize),
            (PropertyKey::Acceleration, emitter.acceleration.randomize),
            (PropertyKey::Drag, emitter.drag.randomize),
            (PropertyKey::Wiggle, emitter.wiggle.randomize),
            (PropertyKey::Rotation, emitter.rotation.randomize),
            (PropertyKey::MaxAge, emitter.max_age.randomize),
            (PropertyKey::Color, emitter.color.randomize),
            (PropertyKey::Opacity, emitter.opacity.randomize),
            (PropertyKey::Size, emitter.size.randomize),
            (PropertyKey::Angle, emitter.angle.randomize),
        ];
        for (key, randomize) in randomized {
            emitter.tracker.set_randomize(key, randomize);
        }
        emitter
    }

    pub fn particle_count(&self) -> usize {
        self.particle_count
    }

    pub fn duration(&self) -> Option<f32> {
        self.duration
    }

    /// An invalid duration means emitting forever.
    pub fn set_duration(&mut self, duration: Option<f32>) {
        self.duration = match duration {
            Some(d) if !d.is_finite() || d < 0.0 => {
                warn!("duration {} is invalid, emitting forever", d);
                None
            }
            other => other,
        };
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn active_multiplier(&self) -> f32 {
        self.active_multiplier
    }

    /// Scales the emission rate. Values above 1 emit in bursts.
    pub fn set_active_multiplier(&mut self, active_multiplier: f32) {
        self.active_multiplier = active_multiplier.max(0.0);
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Seconds since the emitter was last enabled.
    pub fn age(&self) -> f32 {
        self.age
    }

    /// Particles per second, set when the emitter is attached.
    pub fn emission_rate(&self) -> f32 {
        self.emission_rate
    }

    pub fn activation_cursor(&self) -> f32 {
        self.activation_cursor
    }

    /// Particles activated by `tick` and not yet dead. A static emitter
    /// marks all of its slots alive when they are written but never counts
    /// them here, so it always reports 0.
    pub fn active_particle_count(&self) -> usize {
        self.active_particle_count
    }

    pub fn id(&self) -> Option<EmitterId> {
        self.attachment.map(|a| a.id)
    }

    pub fn system(&self) -> Option<SystemId> {
        self.attachment.map(|a| a.id.system())
    }

    /// First slot owned by this emitter.
    pub fn offset(&self) -> Option<usize> {
        self.attachment.map(|a| a.offset)
    }

    pub fn slot_range(&self) -> Option<Range<usize>> {
        self.attachment
            .map(|a| a.offset..a.offset + self.particle_count)
    }

    pub fn state(&self) -> EmitterState {
        match (self.attachment, self.alive) {
            (None, _) => EmitterState::Unattached,
            (Some(_), true) => EmitterState::Alive,
            (Some(_), false) => EmitterState::Dormant,
        }
    }

    pub fn enable(&mut self) {
        self.alive = true;
    }

    pub fn disable(&mut self) {
        self.alive = false;
    }

    /// Soft reset: dormant with zero age. Slots are left as they are.
    pub fn reset(&mut self) {
        self.age = 0.0;
        self.alive = false;
    }

    /// Lifetime used for the emission rate: the longest sampled max age,
    /// capped by the duration when there is one.
    pub fn effective_max_age(&self) -> f32 {
        let longest = self.max_age.upper_bound();
        match self.duration {
            Some(duration) => longest.min(duration),
            None => longest,
        }
    }

    /// How long a triggered emitter stays out of the pool.
    pub fn lifetime(&self) -> f32 {
        self.duration
            .unwrap_or(0.0)
            .max(self.max_age.value + self.max_age.spread)
    }

    pub fn position(&self) -> &PositionProperty {
        &self.position
    }

    pub fn velocity(&self) -> &ForceProperty {
        &self.velocity
    }

    pub fn acceleration(&self) -> &ForceProperty {
        &self.acceleration
    }

    pub fn drag(&self) -> &ScalarProperty {
        &self.drag
    }

    pub fn wiggle(&self) -> &ScalarProperty {
        &self.wiggle
    }

    pub fn rotation(&self) -> &RotationProperty {
        &self.rotation
    }

    pub fn max_age(&self) -> &ScalarProperty {
        &self.max_age
    }

    pub fn color(&self) -> &ColorProperty {
        &self.color
    }

    pub fn opacity(&self) -> &CurveProperty {
        &self.opacity
    }

    pub fn size(&self) -> &CurveProperty {
        &self.size
    }

    pub fn angle(&self) -> &CurveProperty {
        &self.angle
    }

    pub fn position_mut(&mut self) -> PropertyMut<'_, PositionProperty> {
        PropertyMut::new(&mut self.position, &mut self.tracker, PropertyKey::Position)
    }

    pub fn velocity_mut(&mut self) -> PropertyMut<'_, ForceProperty> {
        PropertyMut::new(&mut self.velocity, &mut self.tracker, PropertyKey::Velocity)
    }

    pub fn acceleration_mut(&mut self) -> PropertyMut<'_, ForceProperty> {
        PropertyMut::new(
            &mut self.acceleration,
            &mut self.tracker,
            PropertyKey::Acceleration,
        )
    }

    pub fn drag_mut(&mut self) -> PropertyMut<'_, ScalarProperty> {
        PropertyMut::new(&mut self.drag, &mut self.tracker, PropertyKey::Drag)
    }

    pub fn wiggle_mut(&mut self) -> PropertyMut<'_, ScalarProperty> {
        PropertyMut::new(&mut self.wiggle, &mut self.tracker, PropertyKey::Wiggle)
    }

    pub fn rotation_mut(&mut self) -> PropertyMut<'_, RotationProperty> {
        PropertyMut::new(&mut self.rotation, &mut self.tracker, PropertyKey::Rotation)
    }

    pub fn max_age_mut(&mut self) -> PropertyMut<'_, ScalarProperty> {
        PropertyMut::new(&mut self.max_age, &mut self.tracker, PropertyKey::MaxAge)
    }

    pub fn color_mut(&mut self) -> PropertyMut<'_, ColorProperty> {
        PropertyMut::new(&mut self.color, &mut self.tracker, PropertyKey::Color)
    }

    pub fn opacity_mut(&mut self) -> PropertyMut<'_, CurveProperty> {
        PropertyMut::new(&mut self.opacity, &mut self.tracker, PropertyKey::Opacity)
    }

    pub fn size_mut(&mut self) -> PropertyMut<'_, CurveProperty> {
        PropertyMut::new(&mut self.size, &mut self.tracker, PropertyKey::Size)
    }

    pub fn angle_mut(&mut self) -> PropertyMut<'_, CurveProperty> {
        PropertyMut::new(&mut self.angle, &mut self.tracker, PropertyKey::Angle)
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub(crate) fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    pub(crate) fn attachment(&self) -> Option<Attachment> {
        self.attachment
    }

    pub(crate) fn attach(&mut self, attachment: Attachment) {
        let lifetime = self.effective_max_age();
        self.emission_rate = if lifetime > 0.0 {
            self.particle_count as f32 / lifetime
        } else {
            0.0
        };
        self.attachment = Some(attachment);
        self.activation_cursor = 0.0;
        debug!(
            "Emitter {} attached at offset {}, {} particles/s",
            attachment.id, attachment.offset, self.emission_rate
        );
    }

    /// Back to the unattached state.
    pub(crate) fn detach(&mut self) {
        self.emission_rate = 0.0;
        self.activation_cursor = 0.0;
        self.active_particle_count = 0;
        self.attachment = None;
        self.age = 0.0;
        self.dirty = [DirtyRange::Empty; ATTRIBUTE_COUNT];
    }

    pub(crate) fn set_offset(&mut self, offset: usize) {
        if let Some(attachment) = self.attachment.as_mut() {
            attachment.offset = offset;
        }
    }

    /// Slot ranges touched since the last call, per attribute.
    pub(crate) fn take_dirty_ranges(&mut self) -> [DirtyRange; ATTRIBUTE_COUNT] {
        std::mem::replace(&mut self.dirty, [DirtyRange::Empty; ATTRIBUTE_COUNT])
    }

    fn touch(&mut self, kind: AttributeKind, slot: usize) {
        self.dirty[kind.index()].include(slot);
    }

    /// Writes every attribute of `slot`, as done when the emitter is added.
    pub(crate) fn assign_all<R: Rng + ?Sized>(
        &mut self,
        slot: usize,
        attributes: &mut AttributeSet,
        rng: &mut R,
    ) {
        for kind in ASSIGNMENT_ORDER.iter() {
            self.assign(*kind, slot, attributes, rng);
        }
    }

    /// Zeroes alive and age for every slot and forgets active particles.
    pub(crate) fn clear_slots(&mut self, attributes: &mut AttributeSet) {
        let range = match self.slot_range() {
            Some(range) => range,
            None => return,
        };
        if range.is_empty() {
            return;
        }
        let params = attributes.buffer_mut(AttributeKind::Params);
        for slot in range.clone() {
            params.set_component(slot, PARAM_ALIVE, 0.0);
            params.set_component(slot, PARAM_AGE, 0.0);
        }
        self.dirty[AttributeKind::Params.index()].include_range(range.start, range.end - 1);
        self.active_particle_count = 0;
    }

    pub(crate) fn tick<R: Rng + ?Sized>(
        &mut self,
        dt: f32,
        attributes: &mut AttributeSet,
        rng: &mut R,
    ) {
        if self.is_static {
            return;
        }
        let start = match self.attachment {
            Some(attachment) => attachment.offset,
            None => return,
        };
        let count = self.particle_count;
        if count == 0 {
            return;
        }

        self.age_particles(start, count, dt, attributes);

        if !self.alive {
            self.age = 0.0;
            return;
        }
        if let Some(duration) = self.duration {
            if self.age > duration {
                debug!("Emitter {:?} finished after {}s", self.id(), self.age);
                self.alive = false;
                self.age = 0.0;
                return;
            }
        }

        let pps_dt = self.emission_rate * self.active_multiplier * dt;
        let activation_start = self.activation_cursor.floor();
        let activation_end = (activation_start + pps_dt).min(count as f32);
        let activation_count = (activation_end - self.activation_cursor).trunc();
        let dt_per_particle = if activation_count > 0.0 {
            dt / activation_count
        } else {
            0.0
        };

        let mut i = activation_start as usize;
        let mut activated = 0;
        while (i as f32) < activation_end && i < count {
            let slot = start + i;
            let slot_alive =
                attributes.buffer(AttributeKind::Params).get_component(slot, PARAM_ALIVE) == 1.0;
            if !slot_alive || count == 1 {
                let stagger = dt_per_particle * (i as f32 - activation_start);
                self.activate(slot, stagger, attributes, rng);
                activated += 1;
            }
            i += 1;
        }
        if activated > 0 {
            trace!("Activated {} particles from slot {}", activated, start);
        }

        self.activation_cursor += pps_dt;
        if self.activation_cursor > count as f32 {
            self.activation_cursor = 0.0;
        }
        self.age += dt;
    }

    fn age_particles(&mut self, start: usize, count: usize, dt: f32, attributes: &mut AttributeSet) {
        let params = attributes.buffer_mut(AttributeKind::Params);
        let mut touched = DirtyRange::Empty;
        for slot in (start..start + count).rev() {
            if params.get_component(slot, PARAM_ALIVE) != 1.0 {
                continue;
            }
            let max_age = params.get_component(slot, PARAM_MAX_AGE);
            let mut age = params.get_component(slot, PARAM_AGE);
            let died = match self.direction {
                Direction::Forward => {
                    age += dt;
                    if age >= max_age {
                        age = 0.0;
                        true
                    } else {
                        false
                    }
                }
                Direction::Backward => {
                    age -= dt;
                    if age <= 0.0 {
                        age = max_age;
                        true
                    } else {
                        false
                    }
                }
            };
            if died {
                params.set_component(slot, PARAM_ALIVE, 0.0);
                self.active_particle_count = self.active_particle_count.saturating_sub(1);
            }
            params.set_component(slot, PARAM_AGE, age);
            touched.include(slot);
        }
        self.dirty[AttributeKind::Params.index()].merge(touched);
    }

    fn activate<R: Rng + ?Sized>(
        &mut self,
        slot: usize,
        stagger: f32,
        attributes: &mut AttributeSet,
        rng: &mut R,
    ) {
        self.active_particle_count = (self.active_particle_count + 1).min(self.particle_count);
        self.reset_particle(slot, attributes, rng);

        let params = attributes.buffer_mut(AttributeKind::Params);
        params.set_component(slot, PARAM_ALIVE, 1.0);
        let age = match self.direction {
            Direction::Forward => stagger,
            Direction::Backward => params.get_component(slot, PARAM_MAX_AGE) - stagger,
        };
        params.set_component(slot, PARAM_AGE, age);
        self.touch(AttributeKind::Params, slot);
    }

    // Rewrites the channels that are randomized on respawn or still have a
    // pending property change to sweep through the population.
    fn reset_particle<R: Rng + ?Sized>(
        &mut self,
        slot: usize,
        attributes: &mut AttributeSet,
        rng: &mut R,
    ) {
        for kind in ASSIGNMENT_ORDER.iter().copied() {
            let rewrite = self.tracker.needs_rewrite(kind);
            if rewrite || self.tracker.resets_on_respawn(kind) {
                self.assign(kind, slot, attributes, rng);
                self.tracker.note_rewrite(kind, self.particle_count);
            }
        }
    }

    fn assign<R: Rng + ?Sized>(
        &mut self,
        kind: AttributeKind,
        slot: usize,
        attributes: &mut AttributeSet,
        rng: &mut R,
    ) {
        match kind {
            AttributeKind::Position => {
                let p = self.sample_position(rng);
                attributes.buffer_mut(kind).set_vec3(slot, p);
            }
            AttributeKind::Velocity => {
                let v = self.sample_force(&self.velocity, slot, attributes, rng);
                attributes.buffer_mut(kind).set_vec3(slot, v);
            }
            AttributeKind::Acceleration => {
                let a = self.sample_force(&self.acceleration, slot, attributes, rng);
                let drag = distribution::random_float(rng, self.drag.value, self.drag.spread)
                    .clamp(0.0, 1.0);
                attributes
                    .buffer_mut(kind)
                    .set_vec4_components(slot, a.x, a.y, a.z, drag);
            }
            AttributeKind::Size => {
                let values = sample_curve(&self.size, true, rng);
                attributes.buffer_mut(kind).set_vec4(slot, values);
            }
            AttributeKind::Opacity => {
                let values = sample_curve(&self.opacity, true, rng);
                attributes.buffer_mut(kind).set_vec4(slot, values);
            }
            AttributeKind::Angle => {
                let values = sample_curve(&self.angle, false, rng);
                attributes.buffer_mut(kind).set_vec4(slot, values);
            }
            AttributeKind::Color => {
                let values = sample_color(&self.color, rng);
                attributes.buffer_mut(kind).set_vec4(slot, values);
            }
            AttributeKind::Rotation => {
                let r = &self.rotation;
                let axis = distribution::random_packed_axis(rng, r.axis, r.axis_spread);
                let angle = distribution::random_float(rng, r.angle, r.angle_spread);
                let animated = if r.is_static { 0.0 } else { 1.0 };
                attributes
                    .buffer_mut(kind)
                    .set_vec3_components(slot, axis, angle, animated);
            }
            AttributeKind::RotationCenter => {
                attributes.buffer_mut(kind).set_vec3(slot, self.rotation.center);
            }
            AttributeKind::Params => {
                let max_age =
                    distribution::random_float(rng, self.max_age.value, self.max_age.spread).abs();
                let wiggle = distribution::random_float(rng, self.wiggle.value, self.wiggle.spread);
                let alive = if self.is_static { 1.0 } else { 0.0 };
                attributes
                    .buffer_mut(kind)
                    .set_vec4_components(slot, alive, 0.0, max_age, wiggle);
            }
        }
        self.touch(kind, slot);
    }

    fn sample_position<R: Rng + ?Sized>(&self, rng: &mut R) -> Vector3<f32> {
        let p = &self.position;
        match p.distribution {
            Distribution::Box => distribution::random_vector3(rng, p.value, p.spread, p.spread_clamp),
            Distribution::Sphere => distribution::random_vector3_on_sphere(
                rng,
                p.value,
                p.radius,
                p.spread.x,
                p.radius_scale,
                p.spread_clamp.x,
            ),
            Distribution::Disc => distribution::random_vector3_on_disc(
                rng,
                p.value,
                p.radius,
                p.spread.x,
                p.radius_scale,
                p.spread_clamp.x,
            ),
            Distribution::Line => distribution::random_vector3_on_line(rng, p.value, p.spread),
        }
    }

    fn sample_force<R: Rng + ?Sized>(
        &self,
        force: &ForceProperty,
        slot: usize,
        attributes: &AttributeSet,
        rng: &mut R,
    ) -> Vector3<f32> {
        match force.distribution {
            Distribution::Box => distribution::random_vector3(
                rng,
                force.value,
                force.spread,
                Vector3::new(0.0, 0.0, 0.0),
            ),
            Distribution::Sphere | Distribution::Disc => {
                let p = attributes.buffer(AttributeKind::Position).get(slot);
                distribution::random_direction_from(
                    rng,
                    Vector3::new(p[0], p[1], p[2]),
                    self.position.value,
                    force.value.x,
                    force.spread.x,
                )
            }
            Distribution::Line => {
                distribution::random_vector3_on_line(rng, force.value, force.spread)
            }
        }
    }
}

fn sample_curve<R: Rng + ?Sized>(
    curve: &CurveProperty,
    non_negative: bool,
    rng: &mut R,
) -> [f32; VALUE_OVER_LIFETIME_LENGTH] {
    let sample = |rng: &mut R, k: usize| {
        let v = distribution::random_float(rng, curve.value.get(k), curve.spread.get(k));
        if non_negative {
            v.abs()
        } else {
            v
        }
    };
    if curve.is_uniform() {
        return [sample(rng, 0); VALUE_OVER_LIFETIME_LENGTH];
    }
    let mut out = [0.0; VALUE_OVER_LIFETIME_LENGTH];
    for (k, v) in out.iter_mut().enumerate() {
        *v = sample(rng, k);
    }
    out
}

fn sample_color<R: Rng + ?Sized>(
    color: &ColorProperty,
    rng: &mut R,
) -> [f32; VALUE_OVER_LIFETIME_LENGTH] {
    if color.is_uniform() {
        let c = distribution::random_color(rng, color.value.first(), color.spread.first());
        return [c.to_packed(); VALUE_OVER_LIFETIME_LENGTH];
    }
    let mut out = [0.0; VALUE_OVER_LIFETIME_LENGTH];
    for (k, v) in out.iter_mut().enumerate() {
        *v = distribution::random_color(rng, color.value.get(k), color.spread.get(k)).to_packed();
    }
    out
}
