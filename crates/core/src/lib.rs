//! Estima Core Library
//!
//! Domain models, round and issue state machines, vote aggregation, the
//! session state store, and local storage for Estima.

pub mod error;
pub mod invariants;
pub mod issues;
pub mod models;
pub mod round;
pub mod storage;
pub mod store;
pub mod tally;

pub use error::{Error, Result};
pub use issues::{IssueChange, IssueQueue, UpdateOutcome};
pub use models::*;
pub use round::{RoundMachine, RoundPhase};
pub use storage::{Database, PreferencesStore, SessionCache, UserPreferences, UserRole};
pub use store::{ErrorSeverity, SessionStore, SessionUpdate};
pub use tally::{Consensus, Tally};
