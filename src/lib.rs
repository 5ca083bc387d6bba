pub mod attribute;
pub mod color;
pub mod config;
pub mod deferred;
pub mod distribution;
pub mod emitter;
pub mod error;
#[cfg(feature = "gpu")]
pub mod gpu_sink;
pub mod lifetime_curve;
pub mod packed_buffer;
pub mod particle_system;
pub mod properties;
pub mod render_sink;

pub use config::{EmitterOptions, GroupOptions, SceneConfig};
pub use emitter::Emitter;
pub use error::ParticleError;
pub use particle_system::{EmitterId, ParticleSystem, SystemId};
pub use render_sink::{NullSink, RecordingSink, RenderSink};
