// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stratus Reconcile
//!
//! A dependency-ordered reconciliation engine for declared cloud compute
//! groups and the shared resources they reference.
//!
//! ## Overview
//!
//! Stratus materializes a declared cluster topology by comparing desired
//! state against live provider state and applying the minimal change:
//!
//! - Declare compute groups and shared resources in a YAML file
//! - Order tasks so every task runs after everything it references
//! - Converge through direct provider calls, with bounded retry
//! - Or emit a deterministic declarative document for a separate apply stage
//!
//! ## Architecture
//!
//! A pass walks the task graph once, in order:
//!
//! 1. **Discover**: find the live counterpart of each task
//! 2. **Delta**: compute the sparse set of changed fields
//! 3. **Render**: hand the change to the selected target
//!
//! Identifiers assigned during the pass are registered so later tasks can
//! reference them.
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`tasks`]: Task types, lifecycles and the identifier registry
//! - [`planner`]: Dependency graph, deltas and dry-run plans
//! - [`provider`]: Provider adapters (HTTP, in-memory)
//! - [`target`]: Direct-apply and declarative-emission targets
//! - [`reconciler`]: The pass executor
//! - [`output`]: Document sinks (local, S3) and the pass lock
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! cluster:
//!   name: prod
//!   region: us-east-1
//!
//! shared:
//!   - kind: subnet
//!     name: private-a
//!     lifecycle: warn-if-changed
//!     id: subnet-0a1b
//!
//! groups:
//!   - name: nodes
//!     min_size: 2
//!     max_size: 10
//!     image: base-image
//!     subnets: [private-a]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod output;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod target;
pub mod tasks;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ClusterConfig, ConfigHasher, ConfigParser, ConfigValidator};
pub use error::{Result, StratusError};
pub use output::{DocumentSink, LocalDocumentSink, PassLock, S3DocumentSink};
pub use planner::{PassPlan, TaskGraph};
pub use provider::{HttpProvider, InMemoryProvider, ProviderAdapter};
pub use reconciler::{PassReport, Reconciler};
pub use target::{DirectApply, EmissionTarget, Target, TargetKind};
pub use tasks::{ComputeGroup, SharedResource, Task, TaskSet};
