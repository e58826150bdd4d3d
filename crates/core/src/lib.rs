//! # Qalam Core
//!
//! Domain types, traits, and error definitions for the Qalam letter-editing
//! assistant. This crate defines the model that the store crates implement
//! against: sessions and their messages, instruction records, the
//! persistence and extraction seams, and the time source.

pub mod clock;
pub mod error;
pub mod event;
pub mod instruction;
pub mod message;
pub mod session;

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use instruction::{
    Category, ExtractedInstruction, InstructionBackend, InstructionExtractor, InstructionRecord,
    InstructionSnapshot,
};
pub use message::{Message, Role, SessionId};
pub use session::{Revision, Session, SessionLimits, SessionSummary};
