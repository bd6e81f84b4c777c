//! Core types shared by the extractor, the gate and the turn controller.

pub mod finish;
pub mod part;
pub mod stream;
pub mod usage;

pub use finish::*;
pub use part::*;
pub use stream::*;
pub use usage::*;
