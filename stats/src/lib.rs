//! stats
//!
//! Classifier evaluation and rank statistics.
#![deny(missing_docs)]

mod mann_whitney;
mod roc;
mod threshold;
pub use mann_whitney::{mann_whitney_u, MannWhitney};
pub use roc::{
    accuracy_at_thresholds, average_precision_score, roc_auc_score, roc_curve, trapezoid_area,
    RocCurve,
};
pub use threshold::partition_threshold;
