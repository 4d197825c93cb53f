pub mod actions;
pub mod attributes;
pub mod blueprint;
pub mod config;
pub mod error;
pub mod registry;
pub mod runtime;

pub use blueprint::Blueprint;
pub use registry::{ActionLoader, ActionRegistry};
pub use runtime::{Engine, Scene};
