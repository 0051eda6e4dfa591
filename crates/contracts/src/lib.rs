//! # Contracts
//!
//! Frozen interface contracts shared by every crate: the event model, the
//! destination configuration and the `Output` trait.
//! Business crates depend on this crate only, never on each other in reverse.
//!
//! ## Time Model
//! - Event times are UTC wall-clock (`chrono::DateTime<Utc>`)
//! - Time-parametric addressing (index suffixes) uses the dispatch time, not the event time

mod config;
mod error;
mod event;
mod output;

pub use config::*;
pub use error::*;
pub use event::*;
pub use output::*;
