//! Planning module for reconciliation passes.
//!
//! This module orders tasks by dependency, computes field-level deltas
//! between desired and actual state, and describes dry-run plans.

pub mod delta;
mod graph;
mod plan;

pub use delta::FieldSet;
pub use graph::TaskGraph;
pub use plan::{PassPlan, PlanAction, PlannedChange};
