//! Request handlers.

pub mod health;
pub mod jobs;
pub mod operations;

pub use health::*;
pub use jobs::*;
pub use operations::*;
