use thiserror::Error;

use crate::particle_system::{EmitterId, SystemId};

/// Misuse of emitter membership. The system is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParticleError {
    /// The emitter is already attached to this or another system
    #[error("emitter is already attached to system {system}")]
    AlreadyAttached { system: SystemId },
    /// The id is unknown, stale, or belongs to another system
    #[error("emitter {emitter} is not a member of system {system}")]
    NotAMember { emitter: EmitterId, system: SystemId },
}
