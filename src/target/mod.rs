//! Rendering targets.
//!
//! A target turns a per-task change (desired, actual, delta) into effects.
//! The direct target calls the provider; the declarative target accumulates
//! an infrastructure document that another tool applies.

mod direct;
mod emission;
mod layout;
mod retry;

pub use direct::{CAPACITY_UNIT, DirectApply};
pub use emission::{EmissionTarget, EmittedDocument};
pub use layout::{LaunchLayout, derive_layout, ephemeral_devices, root_device};
pub use retry::{
    DEFAULT_ATTEMPTS, DEFAULT_DELAY_SECS, DEFAULT_TRANSIENT_PATTERN, ErrorClass, RetryPolicy,
};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::planner::FieldSet;
use crate::provider::ProviderAdapter;
use crate::tasks::{ComputeGroup, IdRegistry, SharedResource};

/// Which target a pass renders to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Apply changes with provider calls.
    #[default]
    Direct,
    /// Emit a declarative document.
    Declarative,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Declarative => write!(f, "declarative"),
        }
    }
}

/// The change handed to a target for one task.
///
/// `actual` is absent when the resource does not exist yet. `delta` is the
/// sparse difference and is present whenever `actual` is.
#[derive(Debug)]
pub struct Change<'t, T> {
    /// Discovered state.
    pub actual: Option<&'t T>,
    /// Declared state.
    pub desired: &'t T,
    /// Fields of `desired` that differ from `actual`.
    pub delta: Option<&'t T>,
}

// Manual impls: a derive would require `T: Clone`.
impl<T> Clone for Change<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Change<'_, T> {}

/// A change of any task type.
#[derive(Debug, Clone, Copy)]
pub enum AnyChange<'t> {
    /// A compute group change.
    Group(Change<'t, ComputeGroup>),
    /// A shared resource change.
    Shared(Change<'t, SharedResource>),
}

impl<'t> From<Change<'t, ComputeGroup>> for AnyChange<'t> {
    fn from(change: Change<'t, ComputeGroup>) -> Self {
        Self::Group(change)
    }
}

impl<'t> From<Change<'t, SharedResource>> for AnyChange<'t> {
    fn from(change: Change<'t, SharedResource>) -> Self {
        Self::Shared(change)
    }
}

/// Result of rendering one change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOutcome {
    /// Delta fields the target carried.
    pub handled: FieldSet,
    /// Live identifier after rendering, when known.
    pub live_id: Option<String>,
    /// Whether the provider was called.
    pub mutated: bool,
}

/// A rendering target for one pass.
#[derive(Debug)]
pub enum Target<'p, P: ProviderAdapter + ?Sized> {
    /// Provider calls.
    Direct(DirectApply<'p, P>),
    /// Declarative document.
    Declarative(EmissionTarget<'p, P>),
}

impl<P: ProviderAdapter + ?Sized> Target<'_, P> {
    /// Kind of this target.
    #[must_use]
    pub const fn kind(&self) -> TargetKind {
        match self {
            Self::Direct(_) => TargetKind::Direct,
            Self::Declarative(_) => TargetKind::Declarative,
        }
    }

    /// Whether unchanged tasks are still rendered.
    ///
    /// A declarative document must describe every synced resource, changed
    /// or not.
    #[must_use]
    pub const fn renders_unchanged(&self) -> bool {
        matches!(self, Self::Declarative(_))
    }

    /// Finishes the pass, returning the emitted document for a declarative
    /// target.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialized.
    pub fn into_document(self) -> Result<Option<EmittedDocument>> {
        match self {
            Self::Direct(_) => Ok(None),
            Self::Declarative(target) => target.finish().map(Some),
        }
    }

    /// Renders a change.
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot render the change.
    pub async fn render(&mut self, registry: &IdRegistry, change: AnyChange<'_>) -> Result<RenderOutcome> {
        match (self, change) {
            (Self::Direct(target), AnyChange::Group(change)) => target.render_group(registry, change).await,
            (Self::Direct(target), AnyChange::Shared(change)) => target.render_shared(change).await,
            (Self::Declarative(target), AnyChange::Group(change)) => {
                target.render_group(registry, change).await
            }
            (Self::Declarative(target), AnyChange::Shared(change)) => {
                target.render_shared(registry, change)
            }
        }
    }
}
