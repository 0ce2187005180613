#![forbid(unsafe_code)]

//! CI/CD activity metrics: workflow counts and trends, DORA delivery
//! metrics fed by the Lens microservice, and pipeline-usage insights.

pub mod dora;
pub mod insights;
pub mod lens;
pub mod workflow;

pub use self::dora::DoraEngine;
pub use self::insights::InsightsService;
pub use self::lens::{LensClient, LensConfig, MetricsProvider};
pub use self::workflow::WorkflowMetricsService;
