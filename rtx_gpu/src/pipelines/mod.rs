mod pipeline_layout;
mod ray_tracing_pipeline;

pub use pipeline_layout::PipelineLayout;
pub use ray_tracing_pipeline::RayTracingPipeline;
