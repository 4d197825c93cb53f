pub mod engine;
pub mod events;
pub mod scene;

pub use engine::{BuildMode, BuildSummary, CancelToken, Engine, RunState};
pub use events::{BuildEvent, BuildObserver, ChannelObserver, Progress};
pub use scene::{Scene, SceneNode};
