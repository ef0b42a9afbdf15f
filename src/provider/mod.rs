//! Provider adapter layer.
//!
//! The engine talks to the provider control plane only through the
//! [`ProviderAdapter`] trait. Two adapters ship with the crate: an HTTP
//! client for a live control plane and an in-memory provider seeded from a
//! fixture file.

mod http;
mod memory;
mod types;

pub use http::HttpProvider;
pub use memory::{FixtureLoadBalancer, InMemoryProvider, ProviderFixture};
pub use types::{
    AutoScale, BlockDeviceMapping, Capacity, Compute, EbsVolume, EphemeralDevice, GroupResource,
    Headroom, InstanceTypes, Integration, LaunchSpecification, LoadBalancerAttachment,
    LoadBalancerClass, LoadBalancerInfo, MachineImage, MachineTypeInfo, NetworkInterface,
    ProviderResource, ResourceLimits, ScaleDown, SharedRecord, Strategy, Tag,
};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ProviderResult, RenderError, Result};
use crate::tasks::TaskKind;

/// Interface to the provider control plane.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Lists live resources of a kind.
    async fn list(&self, kind: TaskKind) -> ProviderResult<Vec<ProviderResource>>;

    /// Creates a resource and returns its live identifier.
    async fn create(&self, resource: &ProviderResource) -> ProviderResult<String>;

    /// Applies a sparse update to an existing resource.
    ///
    /// The resource must carry its live identifier.
    async fn update(&self, resource: &ProviderResource) -> ProviderResult<()>;

    /// Resolves a machine image by name or identifier.
    async fn resolve_image(&self, name: &str) -> ProviderResult<Option<MachineImage>>;

    /// Looks up hardware facts for a machine type.
    async fn machine_type(&self, name: &str) -> ProviderResult<Option<MachineTypeInfo>>;

    /// Finds a load balancer of the given kind by its name tag.
    async fn find_load_balancer(
        &self,
        class: LoadBalancerClass,
        name_tag: &str,
    ) -> ProviderResult<Option<LoadBalancerInfo>>;

    /// Gets the adapter name.
    fn provider_name(&self) -> &'static str;
}

#[async_trait]
impl ProviderAdapter for Box<dyn ProviderAdapter> {
    async fn list(&self, kind: TaskKind) -> ProviderResult<Vec<ProviderResource>> {
        (**self).list(kind).await
    }

    async fn create(&self, resource: &ProviderResource) -> ProviderResult<String> {
        (**self).create(resource).await
    }

    async fn update(&self, resource: &ProviderResource) -> ProviderResult<()> {
        (**self).update(resource).await
    }

    async fn resolve_image(&self, name: &str) -> ProviderResult<Option<MachineImage>> {
        (**self).resolve_image(name).await
    }

    async fn machine_type(&self, name: &str) -> ProviderResult<Option<MachineTypeInfo>> {
        (**self).machine_type(name).await
    }

    async fn find_load_balancer(
        &self,
        class: LoadBalancerClass,
        name_tag: &str,
    ) -> ProviderResult<Option<LoadBalancerInfo>> {
        (**self).find_load_balancer(class, name_tag).await
    }

    fn provider_name(&self) -> &'static str {
        (**self).provider_name()
    }
}

/// Resolves a machine image, failing if it does not exist.
///
/// # Errors
///
/// Returns [`RenderError::ImageNotFound`] or the provider error.
pub async fn resolve_image<P: ProviderAdapter + ?Sized>(
    provider: &P,
    name: &str,
) -> Result<MachineImage> {
    provider
        .resolve_image(name)
        .await?
        .ok_or_else(|| {
            RenderError::ImageNotFound {
                name: name.to_string(),
            }
            .into()
        })
}

/// Resolves a load balancer name tag under both provider kinds.
///
/// Returns `None` when neither kind knows the name.
///
/// # Errors
///
/// Returns [`RenderError::AmbiguousLoadBalancer`] if both kinds resolve.
pub async fn resolve_load_balancer<P: ProviderAdapter + ?Sized>(
    provider: &P,
    name_tag: &str,
) -> Result<Option<LoadBalancerInfo>> {
    let classic = provider
        .find_load_balancer(LoadBalancerClass::Classic, name_tag)
        .await?;
    let network = provider
        .find_load_balancer(LoadBalancerClass::Network, name_tag)
        .await?;

    match (classic, network) {
        (Some(classic), Some(network)) => Err(RenderError::AmbiguousLoadBalancer {
            name: name_tag.to_string(),
            classic: classic.name,
            network: network.name,
        }
        .into()),
        (Some(found), None) | (None, Some(found)) => {
            debug!("Resolved load balancer {name_tag} as {} ({})", found.name, found.class.as_str());
            Ok(Some(found))
        }
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn lb(name: &str, class: LoadBalancerClass) -> LoadBalancerInfo {
        LoadBalancerInfo {
            name: name.to_string(),
            class,
        }
    }

    #[tokio::test]
    async fn test_load_balancer_in_both_kinds_is_ambiguous() {
        let mut provider = MockProviderAdapter::new();
        provider
            .expect_find_load_balancer()
            .returning(|class, _| Ok(Some(lb("api", class))));

        let err = resolve_load_balancer(&provider, "api").await.unwrap_err();
        assert!(err.to_string().contains("resolves to both classic"));
    }

    #[tokio::test]
    async fn test_load_balancer_single_kind() {
        let mut provider = MockProviderAdapter::new();
        provider
            .expect_find_load_balancer()
            .with(eq(LoadBalancerClass::Classic), eq("api"))
            .returning(|_, _| Ok(None));
        provider
            .expect_find_load_balancer()
            .with(eq(LoadBalancerClass::Network), eq("api"))
            .returning(|class, _| Ok(Some(lb("api-tg", class))));

        let found = resolve_load_balancer(&provider, "api").await.unwrap().unwrap();
        assert_eq!(found.name, "api-tg");
        assert_eq!(found.class, LoadBalancerClass::Network);
    }

    #[tokio::test]
    async fn test_missing_image_is_an_error() {
        let mut provider = MockProviderAdapter::new();
        provider.expect_resolve_image().returning(|_| Ok(None));

        let err = resolve_image(&provider, "base-image").await.unwrap_err();
        assert!(err.to_string().contains("Unable to resolve image"));
    }
}
