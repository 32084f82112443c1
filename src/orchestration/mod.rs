pub mod frame_pipeline;

pub use frame_pipeline::FramePipeline;
