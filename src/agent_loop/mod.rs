//! Turn engine: controller, runner, transport and events.

pub mod controller;
pub mod events;
pub mod hooks;
pub mod runner;
pub mod transport;
pub mod types;

pub use controller::*;
pub use events::*;
pub use hooks::*;
pub use runner::*;
pub use transport::*;
pub use types::*;
