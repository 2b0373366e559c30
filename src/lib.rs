//! Outreach: crash-resumable orchestration of multi-stage outreach workloads.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod pipeline;
pub mod store;
pub mod worker;
