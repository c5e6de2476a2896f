mod controller;
mod loop_worker;
mod source;

pub use controller::PipelineController;
pub use loop_worker::{duty_loop, stats_persist_loop};
pub use source::{FrameSource, SyntheticFrameSource};
