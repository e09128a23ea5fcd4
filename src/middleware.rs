pub mod canary;
pub mod rpc_metrics;
pub use canary::{Canary, CanaryContext, canary_tag};
pub use rpc_metrics::rpc_metrics;
