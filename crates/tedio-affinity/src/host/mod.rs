//! Reference implementations of the host services.
//!
//! A real host (a web framework, a UI toolkit) brings its own session
//! registry and observable state. These are small enough to run the
//! executor end to end in tests and examples.

pub mod state;
pub mod threaded;

pub use state::StateTable;
pub use threaded::ThreadedHost;
