#![forbid(unsafe_code)]

//! Image-vulnerability posture: security aggregations, the CVE policy
//! engine, and the verify-image scan orchestrator.

pub mod overview;
pub mod policy;
pub mod scan;

pub use self::overview::SecurityOverviewService;
pub use self::policy::PolicyEngine;
pub use self::scan::{HttpScannerClient, ScanOrchestrator, ScannerClient};
