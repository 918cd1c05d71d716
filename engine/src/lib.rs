//! Session engine for orchat: run/message state, the reducer that owns it,
//! the selectors that read it, and the drivers that feed it.
//!
//! ```text
//! bytes -> SseDecoder -> map_chunk -> reduce -> RootState -> selectors -> view models
//! ```
//!
//! The state is passed explicitly; nothing in this crate is global, so any
//! number of runs (or whole sessions) can coexist.

pub mod abort;
pub mod config;
pub mod driver;
pub mod reducer;
pub mod selectors;
pub mod state;

pub use abort::{AbortHandle, AbortSignal, abort_pair};
pub use config::{ConfigError, OrchatConfig};
pub use driver::{
    DEFAULT_IDLE_TIMEOUT, DriveOptions, ReplayOptions, StreamDriver, StreamOutcome,
    lookup_generation,
};
pub use reducer::{reduce, toggle_reasoning_panel};
pub use selectors::{
    MessageVM, RunVM, compute_reasoning_visibility, select_message, select_run, select_runs,
    select_transcript, select_usage_session_total_derived, select_usage_this_turn,
};
pub use state::{MessageState, RootState, RunState, StreamingFlags};

pub use orchat_providers;
pub use orchat_types;

/// An empty session.
#[must_use]
pub fn create_initial_state() -> RootState {
    RootState::new()
}
