//! A group of emitters sharing one set of attribute buffers.
//!
//! Each attached emitter owns a contiguous slot range. Ranges are handed out
//! from a bump allocator and compacted when an emitter is removed, which
//! shifts every later emitter down. Never hold on to absolute slot indices
//! across a removal; ask the emitter for its `slot_range` instead.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

use cgmath::Vector3;
use log::{debug, error, info, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::attribute::{AttributeKind, AttributeSet};
use crate::config::{EmitterOptions, GroupOptions};
use crate::deferred::{DeferredQueue, DeferredTask, TaskSender};
use crate::emitter::{Attachment, Emitter};
use crate::error::ParticleError;
use crate::render_sink::{
    GroupUniforms, MaterialSettings, NullSink, RenderSink, ShaderDefines, SpriteSheet,
};

static NEXT_SYSTEM_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub(crate) u32);

impl SystemId {
    pub(crate) fn new() -> Self {
        SystemId(NEXT_SYSTEM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to an emitter attached to a system. Stays valid until the emitter
/// is removed; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmitterId {
    system: SystemId,
    serial: u32,
}

impl EmitterId {
    pub(crate) fn new(system: SystemId, serial: u32) -> Self {
        EmitterId { system, serial }
    }

    pub fn system(&self) -> SystemId {
        self.system
    }
}

impl fmt::Display for EmitterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.system, self.serial)
    }
}

pub struct ParticleSystem<S: RenderSink = NullSink> {
    id: SystemId,
    options: GroupOptions,
    sink: S,
    attributes: AttributeSet,
    // Attached emitters in slot order.
    emitters: Vec<Emitter>,
    next_serial: u32,
    particle_count: usize,

    pool: Vec<EmitterId>,
    pool_creation: Vec<EmitterOptions>,
    pool_allow_grow: bool,

    run_time: f32,
    delta_time: f32,
    sprite_sheet: SpriteSheet,
    defines: ShaderDefines,
    needs_refresh: bool,
    needs_dynamic_reset: bool,

    deferred: DeferredQueue,
    rng: StdRng,
}

impl ParticleSystem<NullSink> {
    pub fn new(options: GroupOptions) -> Self {
        ParticleSystem::with_sink(options, NullSink)
    }
}

impl<S: RenderSink> ParticleSystem<S> {
    pub fn with_sink(options: GroupOptions, sink: S) -> Self {
        let mut options = options;
        options.sanitize();
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let sprite_sheet = options.texture.sprite_sheet();
        let defines = ShaderDefines {
            has_perspective: options.has_perspective,
            colorize: options.colorize,
            should_calculate_sprite: sprite_sheet.is_animated(),
            ..ShaderDefines::default()
        };
        let mut attributes = AttributeSet::new();
        if let Some(max) = options.max_particle_count {
            attributes.ensure_capacity(max);
        }

        let mut system = ParticleSystem {
            id: SystemId::new(),
            options,
            sink,
            attributes,
            emitters: Vec::new(),
            next_serial: 0,
            particle_count: 0,
            pool: Vec::new(),
            pool_creation: Vec::new(),
            pool_allow_grow: false,
            run_time: 0.0,
            delta_time: 0.0,
            sprite_sheet,
            defines,
            needs_refresh: false,
            needs_dynamic_reset: false,
            deferred: DeferredQueue::new(),
            rng,
        };
        let material = system.material();
        system.sink.set_material(&material);
        system.sink.set_defines(&system.defines);
        debug!("Created particle system {}", system.id);
        system
    }

    pub fn id(&self) -> SystemId {
        self.id
    }

    pub fn options(&self) -> &GroupOptions {
        &self.options
    }

    pub fn material(&self) -> MaterialSettings {
        MaterialSettings {
            blending: self.options.blending,
            transparent: self.options.transparent,
            alpha_test: self.options.alpha_test,
            depth_write: self.options.depth_write,
            depth_test: self.options.depth_test,
            fog: self.options.fog,
            texture: self.options.texture.handle,
            sprite_sheet: self.sprite_sheet,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    /// Slots in use by attached emitters.
    pub fn particle_count(&self) -> usize {
        self.particle_count
    }

    pub fn active_particle_count(&self) -> usize {
        self.emitters.iter().map(|e| e.active_particle_count()).sum()
    }

    pub fn run_time(&self) -> f32 {
        self.run_time
    }

    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    pub fn defines(&self) -> &ShaderDefines {
        &self.defines
    }

    pub fn emitter_count(&self) -> usize {
        self.emitters.len()
    }

    pub fn emitters(&self) -> impl Iterator<Item = &Emitter> {
        self.emitters.iter()
    }

    /// Ids in slot order.
    pub fn emitter_ids(&self) -> Vec<EmitterId> {
        self.emitters.iter().filter_map(|e| e.id()).collect()
    }

    pub fn contains(&self, id: EmitterId) -> bool {
        self.position_of(id).is_some()
    }

    pub fn emitter(&self, id: EmitterId) -> Option<&Emitter> {
        self.position_of(id).map(|index| &self.emitters[index])
    }

    pub fn emitter_mut(&mut self, id: EmitterId) -> Option<EmitterMut<'_, S>> {
        let index = self.position_of(id)?;
        Some(EmitterMut {
            system: self,
            index,
            id,
        })
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_pooled(&self, id: EmitterId) -> bool {
        self.pool.contains(&id)
    }

    pub fn task_sender(&self) -> TaskSender {
        self.deferred.sender()
    }

    pub fn pending_tasks(&self) -> usize {
        self.deferred.len()
    }

    fn position_of(&self, id: EmitterId) -> Option<usize> {
        if id.system != self.id {
            return None;
        }
        self.emitters.iter().position(|e| e.id() == Some(id))
    }

    fn not_a_member(&self, id: EmitterId) -> ParticleError {
        error!("Emitter {} is not a member of particle system {}", id, self.id);
        ParticleError::NotAMember {
            emitter: id,
            system: self.id,
        }
    }

    /// Attaches `emitter` behind every existing one and initializes its slots.
    pub fn add_emitter(&mut self, mut emitter: Emitter) -> Result<EmitterId, ParticleError> {
        if let Some(attachment) = emitter.attachment() {
            error!(
                "Emitter {} already belongs to particle system {}",
                attachment.id,
                attachment.id.system()
            );
            return Err(ParticleError::AlreadyAttached {
                system: attachment.id.system(),
            });
        }

        let start = self.particle_count;
        let count = emitter.particle_count();
        self.particle_count += count;
        if let Some(max) = self.options.max_particle_count {
            if self.particle_count > max {
                warn!(
                    "Particle system {} holds {} particles, more than its capacity of {}",
                    self.id, self.particle_count, max
                );
            }
        }

        let id = EmitterId::new(self.id, self.next_serial);
        self.next_serial += 1;
        emitter.attach(Attachment { id, offset: start });

        let capacity = self
            .attributes
            .capacity()
            .max(self.particle_count)
            .max(self.options.max_particle_count.unwrap_or(0));
        self.attributes.ensure_capacity(capacity);
        for slot in start..start + count {
            emitter.assign_all(slot, &mut self.attributes, &mut self.rng);
        }
        emitter.tracker_mut().clear_rewrites();
        // The full refresh below uploads everything anyway.
        emitter.take_dirty_ranges();

        self.emitters.push(emitter);
        self.update_defines();
        self.needs_refresh = true;
        debug!(
            "Added emitter {} with {} particles at slot {}",
            id, count, start
        );
        Ok(id)
    }

    /// Detaches an emitter and closes the gap it leaves. Every emitter after
    /// it moves down by its particle count.
    pub fn remove_emitter(&mut self, id: EmitterId) -> Result<Emitter, ParticleError> {
        let index = match self.position_of(id) {
            Some(index) => index,
            None => return Err(self.not_a_member(id)),
        };
        let mut emitter = self.emitters.remove(index);
        let count = emitter.particle_count();
        if let Some(range) = emitter.slot_range() {
            let params = self.attributes.buffer_mut(AttributeKind::Params);
            for slot in range.clone() {
                params.set_component(slot, 0, 0.0);
                params.set_component(slot, 1, 0.0);
            }
            self.attributes.splice(range.start, range.end);
        }
        for later in self.emitters[index..].iter_mut() {
            if let Some(offset) = later.offset() {
                later.set_offset(offset - count);
            }
        }
        self.particle_count -= count;
        self.pool.retain(|pooled| *pooled != id);
        emitter.detach();
        self.needs_refresh = true;
        debug!("Removed emitter {} and {} particles", id, count);
        Ok(emitter)
    }

    /// Creates `count` emitters, attaches them and parks them in the pool.
    /// Emitter `i` uses `options[i % options.len()]`. When `allow_grow` is
    /// set, an empty pool makes a new emitter from `options[0]`.
    pub fn add_pool(
        &mut self,
        count: usize,
        options: &[EmitterOptions],
        allow_grow: bool,
    ) -> Result<Vec<EmitterId>, ParticleError> {
        let creation = if options.is_empty() {
            warn!("Pool created without emitter options, using defaults");
            vec![EmitterOptions::default()]
        } else {
            options.to_vec()
        };
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let emitter = Emitter::new(&creation[i % creation.len()]);
            let id = self.add_emitter(emitter)?;
            self.release_into_pool(id)?;
            ids.push(id);
        }
        self.pool_creation = creation;
        self.pool_allow_grow = allow_grow;
        debug!("Added pool of {} emitters", count);
        Ok(ids)
    }

    /// Resets the emitter to dormant and pushes it onto the pool.
    pub fn release_into_pool(&mut self, id: EmitterId) -> Result<(), ParticleError> {
        let index = match self.position_of(id) {
            Some(index) => index,
            None => return Err(self.not_a_member(id)),
        };
        self.emitters[index].reset();
        if !self.pool.contains(&id) {
            self.pool.push(id);
        }
        Ok(())
    }

    /// Most recently released emitter, or a fresh one if the pool may grow.
    pub fn get_from_pool(&mut self) -> Option<EmitterId> {
        if let Some(id) = self.pool.pop() {
            return Some(id);
        }
        if !self.pool_allow_grow {
            return None;
        }
        let options = self.pool_creation.first().cloned().unwrap_or_default();
        let mut emitter = Emitter::new(&options);
        emitter.reset();
        match self.add_emitter(emitter) {
            Ok(id) => {
                debug!("Pool was empty, created emitter {}", id);
                Some(id)
            }
            Err(_) => None,
        }
    }

    /// Takes up to `count` emitters out of the pool, optionally moves them to
    /// `position`, and enables them. Each goes back to the pool once its
    /// lifetime has elapsed. Returns how many were triggered.
    pub fn trigger_pool_emitter(&mut self, count: usize, position: Option<Vector3<f32>>) -> usize {
        let mut triggered = 0;
        for _ in 0..count {
            let id = match self.get_from_pool() {
                Some(id) => id,
                None => {
                    info!("Particle system {} pool ran out", self.id);
                    break;
                }
            };
            let run_time = self.run_time;
            let due = match self.emitter_mut(id) {
                Some(mut emitter) => {
                    if let Some(position) = position {
                        emitter.position_mut().set_value(position);
                    }
                    emitter.enable();
                    run_time + emitter.lifetime()
                }
                None => continue,
            };
            self.deferred.schedule(due, DeferredTask::ReturnToPool(id));
            triggered += 1;
        }
        triggered
    }

    /// Runs every deferred task that is due at the current run time.
    pub fn run_deferred(&mut self) {
        for task in self.deferred.take_due(self.run_time) {
            match task {
                DeferredTask::ReturnToPool(id) => match self.emitter_mut(id) {
                    Some(mut emitter) => {
                        emitter.disable();
                        if let Err(e) = self.release_into_pool(id) {
                            debug!("Emitter {} could not return to the pool: {}", id, e);
                        }
                    }
                    None => debug!("Emitter {} was removed before returning to the pool", id),
                },
            }
        }
    }

    fn update_defines(&mut self) {
        let mut defines = self.defines;
        for emitter in self.emitters.iter_mut() {
            if !defines.should_calculate_sprite {
                defines.should_rotate_texture |= emitter.angle().max_magnitude() != 0.0;
            }
            let rotation = emitter.rotation();
            defines.should_rotate_particles |=
                rotation.angle.abs().max(rotation.angle_spread.abs()) != 0.0;
            let wiggle = emitter.wiggle();
            defines.should_wiggle_particles |= wiggle.value.abs().max(wiggle.spread.abs()) != 0.0;
            emitter.tracker_mut().clear_defines_dirty();
        }
        if defines != self.defines {
            debug!("Shader defines changed: {:?}", defines.to_define_list());
            self.defines = defines;
            self.sink.set_defines(&self.defines);
        }
    }

    /// Advances the simulation by `dt` seconds, or the fixed time step.
    pub fn tick(&mut self, dt: Option<f32>) {
        let dt = dt.unwrap_or(self.options.fixed_time_step);
        self.run_time += dt;
        self.delta_time = dt;
        self.sink.set_uniforms(&GroupUniforms {
            run_time: self.run_time,
            delta_time: self.delta_time,
            scale: self.options.scale,
            texture_animation: self.sprite_sheet.animation_uniform(),
        });

        self.run_deferred();
        self.attributes.reset_dirty();

        if self.emitters.iter().any(|e| e.tracker().defines_dirty()) {
            self.update_defines();
        }

        if self.emitters.is_empty() && !self.needs_refresh && !self.needs_dynamic_reset {
            return;
        }

        for emitter in self.emitters.iter_mut() {
            emitter.tick(dt, &mut self.attributes, &mut self.rng);
            let dirty = emitter.take_dirty_ranges();
            for (channel, range) in self.attributes.iter_mut().zip(dirty.iter()) {
                channel.merge_dirty(*range);
            }
        }

        if self.needs_dynamic_reset {
            for channel in self.attributes.iter_mut() {
                channel.reset_dynamic();
            }
            self.needs_dynamic_reset = false;
        }

        if self.needs_refresh {
            for channel in self.attributes.iter_mut() {
                channel.force_full_refresh();
            }
            self.needs_refresh = false;
            self.needs_dynamic_reset = true;
            self.sink.set_draw_range(self.particle_count);
        }

        let mut committed = 0;
        for channel in self.attributes.iter_mut() {
            if channel.commit(&mut self.sink) {
                committed += 1;
            }
        }
        trace!("Tick {} committed {} channels", self.run_time, committed);
    }

    /// Drops every emitter and pending task and releases the sink's resources.
    pub fn dispose(&mut self) {
        for mut emitter in self.emitters.drain(..) {
            emitter.detach();
        }
        self.pool.clear();
        self.deferred.clear();
        self.particle_count = 0;
        self.attributes.ensure_capacity(0);
        self.sink.dispose();
        debug!("Disposed particle system {}", self.id);
    }
}

/// Mutable access to an attached emitter. Property setters are reached
/// through `DerefMut`.
pub struct EmitterMut<'a, S: RenderSink> {
    system: &'a mut ParticleSystem<S>,
    index: usize,
    id: EmitterId,
}

impl<S: RenderSink> EmitterMut<'_, S> {
    pub fn id(&self) -> EmitterId {
        self.id
    }

    /// Soft reset leaves slots alone. A forced reset also kills every
    /// particle the emitter owns.
    pub fn reset(&mut self, force: bool) {
        let system = &mut *self.system;
        let emitter = &mut system.emitters[self.index];
        emitter.reset();
        if force {
            emitter.clear_slots(&mut system.attributes);
        }
    }

    /// Detaches the emitter from its system.
    pub fn remove(self) -> Result<Emitter, ParticleError> {
        self.system.remove_emitter(self.id)
    }
}

impl<S: RenderSink> Deref for EmitterMut<'_, S> {
    type Target = Emitter;
    fn deref(&self) -> &Emitter {
        &self.system.emitters[self.index]
    }
}

impl<S: RenderSink> DerefMut for EmitterMut<'_, S> {
    fn deref_mut(&mut self) -> &mut Emitter {
        &mut self.system.emitters[self.index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::DirtyRange;
    use crate::config::{RotationOptions, ScalarOptions};
    use crate::emitter::EmitterState;
    use crate::render_sink::{BufferUsage, RecordingSink, UploadRange};

    const DT: f32 = 1.0 / 60.0;

    fn recording_system() -> ParticleSystem<RecordingSink> {
        ParticleSystem::with_sink(
            GroupOptions {
                seed: Some(42),
                ..GroupOptions::default()
            },
            RecordingSink::new(),
        )
    }

    fn emitter(particle_count: usize) -> Emitter {
        Emitter::new(&EmitterOptions {
            particle_count,
            ..EmitterOptions::default()
        })
    }

    fn assert_disjoint(system: &ParticleSystem<RecordingSink>) {
        let ranges: Vec<_> = system.emitters().filter_map(|e| e.slot_range()).collect();
        for (i, a) in ranges.iter().enumerate() {
            for b in ranges[i + 1..].iter() {
                assert!(a.end <= b.start || b.end <= a.start, "{:?} overlaps {:?}", a, b);
            }
        }
        let total: usize = ranges.iter().map(|r| r.len()).sum();
        assert_eq!(total, system.particle_count());
    }

    #[test]
    fn slots_never_overlap() {
        let mut system = recording_system();
        let a = system.add_emitter(emitter(10)).unwrap();
        let b = system.add_emitter(emitter(20)).unwrap();
        let c = system.add_emitter(emitter(5)).unwrap();
        assert_disjoint(&system);
        assert_eq!(system.emitter(c).unwrap().slot_range(), Some(30..35));

        system.remove_emitter(b).unwrap();
        assert_disjoint(&system);
        let d = system.add_emitter(emitter(7)).unwrap();
        assert_disjoint(&system);
        assert_eq!(system.emitter(d).unwrap().slot_range(), Some(15..22));
        system.remove_emitter(a).unwrap();
        assert_disjoint(&system);
        assert_eq!(system.emitter_ids(), vec![c, d]);
    }

    #[test]
    fn removal_reindexes_later_emitters() {
        let mut system = recording_system();
        let a = system.add_emitter(emitter(10)).unwrap();
        let b = system.add_emitter(emitter(6)).unwrap();
        for _ in 0..30 {
            system.tick(Some(DT));
        }
        let range = system.emitter(b).unwrap().slot_range().unwrap();
        assert_eq!(range, 10..16);
        let snapshot: Vec<Vec<Vec<f32>>> = AttributeKind::ALL
            .iter()
            .map(|&kind| {
                range
                    .clone()
                    .map(|slot| system.attributes().buffer(kind).get(slot).to_vec())
                    .collect()
            })
            .collect();

        let removed = system.remove_emitter(a).unwrap();
        assert_eq!(removed.state(), EmitterState::Unattached);
        let moved = system.emitter(b).unwrap().slot_range().unwrap();
        assert_eq!(moved, 0..6);
        for (k, &kind) in AttributeKind::ALL.iter().enumerate() {
            for (i, slot) in moved.clone().enumerate() {
                assert_eq!(
                    system.attributes().buffer(kind).get(slot),
                    snapshot[k][i].as_slice(),
                    "{:?} slot {}",
                    kind,
                    slot
                );
            }
        }
        assert_eq!(system.particle_count(), 6);
    }

    #[test]
    fn membership_errors_are_no_ops() {
        let mut system = recording_system();
        let mut other = recording_system();
        let id = system.add_emitter(emitter(4)).unwrap();

        let copy = system.emitter(id).unwrap().clone();
        assert_eq!(
            other.add_emitter(copy.clone()),
            Err(ParticleError::AlreadyAttached { system: system.id() })
        );
        assert_eq!(
            system.add_emitter(copy),
            Err(ParticleError::AlreadyAttached { system: system.id() })
        );
        assert_eq!(other.particle_count(), 0);
        assert_eq!(system.particle_count(), 4);

        assert!(matches!(
            other.remove_emitter(id),
            Err(ParticleError::NotAMember { .. })
        ));
        let removed = system.remove_emitter(id).unwrap();
        assert!(system.remove_emitter(id).is_err());

        // A removed emitter is unattached and can join another system.
        let new_id = other.add_emitter(removed).unwrap();
        assert_eq!(other.emitter(new_id).unwrap().offset(), Some(0));
    }

    #[test]
    fn fountain_converges_to_particle_count() {
        let mut system = ParticleSystem::with_sink(
            GroupOptions {
                max_particle_count: Some(2000),
                seed: Some(1),
                ..GroupOptions::default()
            },
            RecordingSink::new(),
        );
        let id = system
            .add_emitter(Emitter::new(&EmitterOptions {
                particle_count: 2000,
                max_age: ScalarOptions::new(2.0, 0.0),
                direction: 1,
                ..EmitterOptions::default()
            }))
            .unwrap();
        assert_eq!(system.emitter(id).unwrap().emission_rate(), 1000.0);

        let mut ticks = 0;
        while system.run_time() < 2.0 {
            system.tick(Some(DT));
            ticks += 1;
            let active = system.active_particle_count();
            assert!(active <= 2000);
        }
        assert!(ticks >= 119);
        let active = system.active_particle_count();
        assert!(active >= 1800, "active = {}", active);

        for _ in 0..600 {
            system.tick(Some(DT));
            assert!(system.active_particle_count() <= 2000);
        }
        assert!(system.active_particle_count() >= 1800);
    }

    #[test]
    fn pool_trigger_round_trip() {
        let mut system = recording_system();
        let pool_options = EmitterOptions {
            particle_count: 20,
            duration: Some(0.05),
            max_age: ScalarOptions::new(0.5, 0.0),
            ..EmitterOptions::default()
        };
        let ids = system.add_pool(10, &[pool_options], false).unwrap();
        assert_eq!(system.pool_len(), 10);
        for id in ids.iter() {
            assert_eq!(system.emitter(*id).unwrap().state(), EmitterState::Dormant);
        }

        let target = Vector3::new(5.0, 0.0, 0.0);
        assert_eq!(system.trigger_pool_emitter(1, Some(target)), 1);
        assert_eq!(system.pool_len(), 9);
        // Last released comes out first.
        let triggered = ids[9];
        assert!(!system.is_pooled(triggered));
        let emitter = system.emitter(triggered).unwrap();
        assert_eq!(emitter.state(), EmitterState::Alive);
        assert_eq!(emitter.position().value, target);
        assert_eq!(system.pending_tasks(), 1);

        system.tick(Some(DT));
        let range = system.emitter(triggered).unwrap().slot_range().unwrap();
        let position = system.attributes().buffer(AttributeKind::Position);
        assert_eq!(position.get(range.start), &[5.0, 0.0, 0.0]);

        while system.run_time() < 0.5 + DT {
            system.tick(Some(DT));
        }
        assert!(system.is_pooled(triggered));
        assert_eq!(system.pool_len(), 10);
        assert_eq!(
            system.emitter(triggered).unwrap().state(),
            EmitterState::Dormant
        );
        assert_eq!(system.trigger_pool_emitter(1, None), 1);
        assert!(!system.is_pooled(triggered));
    }

    #[test]
    fn empty_pool_drops_or_grows() {
        let mut system = recording_system();
        system.add_pool(2, &[emitter_options(5)], false).unwrap();
        assert_eq!(system.trigger_pool_emitter(3, None), 2);
        assert_eq!(system.trigger_pool_emitter(1, None), 0);
        assert_eq!(system.emitter_count(), 2);

        let mut growing = recording_system();
        growing.add_pool(1, &[emitter_options(5)], true).unwrap();
        assert_eq!(growing.trigger_pool_emitter(3, None), 3);
        assert_eq!(growing.emitter_count(), 3);
        assert_eq!(growing.particle_count(), 15);
    }

    fn emitter_options(particle_count: usize) -> EmitterOptions {
        EmitterOptions {
            particle_count,
            ..EmitterOptions::default()
        }
    }

    #[test]
    fn deferred_tasks_from_a_sender() {
        let mut system = recording_system();
        let ids = system.add_pool(1, &[emitter_options(5)], false).unwrap();
        let id = system.get_from_pool().unwrap();
        assert_eq!(id, ids[0]);
        system.emitter_mut(id).unwrap().enable();

        let sender = system.task_sender();
        sender.post(0.1, DeferredTask::ReturnToPool(id));
        system.run_deferred();
        assert!(!system.is_pooled(id));
        system.tick(Some(0.1));
        assert!(system.is_pooled(id));
        assert!(!system.emitter(id).unwrap().is_alive());
    }

    #[test]
    fn steady_state_uploads_are_partial() {
        let mut system = recording_system();
        system.add_emitter(emitter(100)).unwrap();

        system.tick(Some(DT));
        let first = &system.sink().uploads;
        assert_eq!(first.len(), AttributeKind::ALL.len());
        assert!(first.iter().all(|u| u.range == UploadRange::Full));
        assert!(first.iter().all(|u| u.usage == BufferUsage::Static));
        assert_eq!(system.sink().draw_range, 100);
        system.sink_mut().clear_uploads();

        system.tick(Some(DT));
        let uploads = &system.sink().uploads;
        assert!(!uploads.is_empty());
        for upload in uploads.iter() {
            assert!(matches!(upload.range, UploadRange::Partial { .. }));
            assert_eq!(upload.usage, BufferUsage::Dynamic);
        }
        // Only params change while values are not randomized.
        assert!(uploads.iter().all(|u| u.kind == AttributeKind::Params));
    }

    #[test]
    fn dirty_range_covers_only_touched_slots() {
        let mut system = recording_system();
        let id = system.add_emitter(emitter(20)).unwrap();
        system.tick(Some(DT));
        {
            let mut emitter = system.emitter_mut(id).unwrap();
            emitter.disable();
            emitter.reset(true);
        }
        system.tick(Some(DT));
        system.sink_mut().clear_uploads();

        // Nothing alive, nothing changes.
        system.tick(Some(DT));
        assert!(system.sink().uploads.is_empty());
        for channel in system.attributes().iter() {
            assert_eq!(channel.dirty_range(), DirtyRange::Empty);
        }
    }

    #[test]
    fn forced_reset_kills_particles() {
        let mut system = recording_system();
        let id = system.add_emitter(emitter(50)).unwrap();
        for _ in 0..30 {
            system.tick(Some(DT));
        }
        assert!(system.active_particle_count() > 0);
        system.emitter_mut(id).unwrap().reset(true);
        system.sink_mut().clear_uploads();
        system.tick(Some(DT));

        let params = system.sink().uploads_for(AttributeKind::Params);
        assert_eq!(params.len(), 1);
        assert_eq!(
            params[0].range,
            UploadRange::Partial {
                offset: 0,
                count: 200
            }
        );
        assert_eq!(system.active_particle_count(), 0);
        let buffer = system.attributes().buffer(AttributeKind::Params);
        assert!((0..50).all(|slot| buffer.get_component(slot, 0) == 0.0));
    }

    #[test]
    fn idle_system_does_no_work() {
        let mut system = recording_system();
        system.tick(None);
        system.tick(None);
        assert!(system.sink().uploads.is_empty());
        assert_eq!(system.delta_time(), 0.016);
        assert!((system.run_time() - 0.032).abs() < 1e-6);
        assert_eq!(system.sink().uniforms.scale, 300.0);

        let id = system.add_emitter(emitter(3)).unwrap();
        system.remove_emitter(id).unwrap();
        system.tick(None);
        // The removal still has to be uploaded once.
        assert!(!system.sink().uploads.is_empty());
        system.sink_mut().clear_uploads();
        system.tick(None);
        system.tick(None);
        assert!(system.sink().uploads.is_empty());
    }

    #[test]
    fn defines_accumulate_and_stay_set() {
        let mut system = recording_system();
        assert!(!system.defines().should_rotate_particles);
        let spinning = Emitter::new(&EmitterOptions {
            particle_count: 4,
            rotation: RotationOptions {
                angle: 1.0,
                ..RotationOptions::default()
            },
            ..EmitterOptions::default()
        });
        let id = system.add_emitter(spinning).unwrap();
        assert!(system.defines().should_rotate_particles);
        assert!(!system.defines().should_wiggle_particles);

        // Flags are never cleared, even after the only user leaves.
        system.remove_emitter(id).unwrap();
        system.tick(Some(DT));
        assert!(system.defines().should_rotate_particles);

        let plain = system.add_emitter(emitter(4)).unwrap();
        system
            .emitter_mut(plain)
            .unwrap()
            .wiggle_mut()
            .set_value(2.0);
        system.tick(Some(DT));
        assert!(system.defines().should_wiggle_particles);
        assert_eq!(system.sink().define_updates, 3);
    }

    #[test]
    fn capacity_overrun_still_grows() {
        let mut system = ParticleSystem::with_sink(
            GroupOptions {
                max_particle_count: Some(10),
                seed: Some(9),
                ..GroupOptions::default()
            },
            RecordingSink::new(),
        );
        assert_eq!(system.attributes().capacity(), 10);
        system.add_emitter(emitter(8)).unwrap();
        let id = system.add_emitter(emitter(8)).unwrap();
        assert_eq!(system.particle_count(), 16);
        assert_eq!(system.attributes().capacity(), 16);
        assert_eq!(system.emitter(id).unwrap().slot_range(), Some(8..16));
        system.tick(Some(DT));
        assert_eq!(system.sink().draw_range, 16);
    }

    #[test]
    fn dispose_releases_everything() {
        let mut system = recording_system();
        system.add_pool(3, &[emitter_options(5)], false).unwrap();
        system.trigger_pool_emitter(1, None);
        system.dispose();
        assert_eq!(system.emitter_count(), 0);
        assert_eq!(system.pool_len(), 0);
        assert_eq!(system.pending_tasks(), 0);
        assert_eq!(system.attributes().capacity(), 0);
        assert!(system.sink().disposed);
    }

    #[test]
    fn non_finite_max_age_still_lets_particles_die() {
        let mut system = recording_system();
        let id = system.add_emitter(emitter(50)).unwrap();
        system
            .emitter_mut(id)
            .unwrap()
            .max_age_mut()
            .set_value(f32::NAN);
        assert_eq!(system.emitter(id).unwrap().max_age().value, 2.0);

        for _ in 0..600 {
            system.tick(Some(DT));
        }
        let range = system.emitter(id).unwrap().slot_range().unwrap();
        let params = system.attributes().buffer(AttributeKind::Params);
        for slot in range {
            let age = params.get_component(slot, 1);
            let max_age = params.get_component(slot, 2);
            assert!(max_age.is_finite(), "slot {} max age {}", slot, max_age);
            assert!(age <= max_age, "slot {} age {} max age {}", slot, age, max_age);
        }
        assert!(system.active_particle_count() <= 50);
    }

    #[test]
    fn removed_emitter_is_not_returned_to_the_pool() {
        let mut system = recording_system();
        let pool_options = EmitterOptions {
            particle_count: 5,
            duration: Some(0.05),
            max_age: ScalarOptions::new(0.2, 0.0),
            ..EmitterOptions::default()
        };
        let ids = system.add_pool(3, &[pool_options], false).unwrap();
        assert_eq!(system.trigger_pool_emitter(1, None), 1);
        system.remove_emitter(ids[2]).unwrap();
        assert_eq!(system.pending_tasks(), 1);

        while system.run_time() < 0.5 {
            system.tick(Some(DT));
        }
        assert_eq!(system.pending_tasks(), 0);
        assert_eq!(system.pool_len(), 2);
        assert!(!system.is_pooled(ids[2]));
        assert!(!system.contains(ids[2]));
    }
}
