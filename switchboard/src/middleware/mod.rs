mod tracing;

pub use tracing::{TracingLayer, TracingService};
