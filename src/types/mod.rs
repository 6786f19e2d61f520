//! Core types shared by the coordinator components.

pub mod stream;
pub mod task;
pub mod usage;

pub use stream::*;
pub use task::*;
pub use usage::*;
