//! Aggregator for the workspace crates; the demos under `demos/` build against it.

pub use avc1394;
pub use fcp;
pub use tl_1394;
