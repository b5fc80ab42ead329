//! # Task Model
//!
//! Plain DTOs shared by the pool, the sampler, the state machine, the
//! aggregator and the stores.
//!
//! Nothing here touches a file or a screen.

pub mod stimulus;
pub mod selection;
pub mod participant;

pub use stimulus::{CategoryId, Stimulus};
pub use selection::SelectionEvent;
pub use participant::{ParticipantId, SessionStamp, PARTICIPANT_ID_MIN, PARTICIPANT_ID_MAX};
