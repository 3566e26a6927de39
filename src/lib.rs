//! Churn prediction service
//!
//! Serves a pre-trained churn classifier over a static customer dataset:
//! point lookups, single predictions, and churn probability rolled up by
//! age, gender, subscription type and region.

pub mod aggregate;
pub mod api;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod error;
pub mod models;
pub mod normalize;
pub mod report;
