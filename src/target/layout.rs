//! Launch layout derivation shared by both targets.
//!
//! The machine image, root device and instance-local devices of a group are
//! derived here once, so the direct and declarative targets produce the same
//! values for the same desired state.

use tracing::debug;

use crate::error::{ConfigError, RenderError, Result};
use crate::provider::{
    BlockDeviceMapping, EbsVolume, MachineImage, MachineTypeInfo, ProviderAdapter, resolve_image,
};
use crate::tasks::{ComputeGroup, Reconcilable, RootVolumeOpts};

/// Derived launch layout of a compute group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchLayout {
    /// Resolved machine image.
    pub image: MachineImage,
    /// Root block device.
    pub root_device: BlockDeviceMapping,
    /// Instance-local devices of the on-demand machine type.
    pub ephemeral_devices: Vec<BlockDeviceMapping>,
}

/// Builds the root device for an image. IOPS is omitted for `gp2` and
/// throughput for anything but `gp3`.
#[must_use]
pub fn root_device(image: &MachineImage, opts: &RootVolumeOpts) -> BlockDeviceMapping {
    let opts = opts.effective();
    BlockDeviceMapping {
        device_name: image.root_device_name.clone(),
        virtual_name: None,
        ebs: Some(EbsVolume {
            volume_type: opts.volume_type,
            volume_size: opts.size,
            iops: opts.iops,
            throughput: opts.throughput,
            delete_on_termination: Some(true),
            snapshot_id: None,
        }),
    }
}

/// Maps the instance-local devices of a machine type to block devices.
#[must_use]
pub fn ephemeral_devices(info: &MachineTypeInfo) -> Vec<BlockDeviceMapping> {
    info.ephemeral_devices
        .iter()
        .map(|d| BlockDeviceMapping {
            device_name: d.device_name.clone(),
            virtual_name: Some(d.virtual_name.clone()),
            ebs: None,
        })
        .collect()
}

/// Derives the launch layout of a group from provider facts.
///
/// # Errors
///
/// Returns an error if the group declares no image, if the image or the
/// on-demand machine type cannot be resolved, or if a provider call fails.
pub async fn derive_layout<P: ProviderAdapter + ?Sized>(
    provider: &P,
    group: &ComputeGroup,
) -> Result<LaunchLayout> {
    let Some(image_name) = group.image.as_deref() else {
        return Err(ConfigError::RequiredField {
            task: group.task_ref(),
            field: String::from("image"),
        }
        .into());
    };
    let image = resolve_image(provider, image_name).await?;

    let ephemeral = match group.on_demand_instance_type.as_deref() {
        Some(machine_type) => {
            let info = provider
                .machine_type(machine_type)
                .await?
                .ok_or_else(|| RenderError::MachineTypeNotFound {
                    name: machine_type.to_string(),
                })?;
            ephemeral_devices(&info)
        }
        None => Vec::new(),
    };

    let root = root_device(&image, &group.root_volume.clone().unwrap_or_default());
    debug!(
        "Derived layout for {}: image {} root {} with {} local devices",
        group.name,
        image.id,
        root.device_name,
        ephemeral.len()
    );

    Ok(LaunchLayout {
        image,
        root_device: root,
        ephemeral_devices: ephemeral,
    })
}

impl LaunchLayout {
    /// All block devices, root first.
    #[must_use]
    pub fn block_devices(&self) -> Vec<BlockDeviceMapping> {
        std::iter::once(self.root_device.clone())
            .chain(self.ephemeral_devices.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{EphemeralDevice, InMemoryProvider};

    fn image() -> MachineImage {
        MachineImage {
            id: String::from("img-123"),
            name: String::from("base-image"),
            root_device_name: String::from("/dev/xvda"),
        }
    }

    #[test]
    fn test_gp2_root_device_omits_iops() {
        let opts = RootVolumeOpts {
            volume_type: Some(String::from("gp2")),
            size: Some(64),
            iops: Some(3000),
            throughput: Some(125),
            optimization: None,
        };
        let ebs = root_device(&image(), &opts).ebs.unwrap();
        assert_eq!(ebs.iops, None);
        assert_eq!(ebs.throughput, None);
        assert_eq!(ebs.volume_size, Some(64));
        assert_eq!(ebs.delete_on_termination, Some(true));
    }

    #[test]
    fn test_gp3_root_device_keeps_throughput() {
        let opts = RootVolumeOpts {
            volume_type: Some(String::from("gp3")),
            iops: Some(3000),
            throughput: Some(125),
            ..RootVolumeOpts::default()
        };
        let ebs = root_device(&image(), &opts).ebs.unwrap();
        assert_eq!(ebs.iops, Some(3000));
        assert_eq!(ebs.throughput, Some(125));
    }

    #[tokio::test]
    async fn test_layout_includes_ephemeral_devices() {
        let provider = InMemoryProvider::new()
            .with_image(image())
            .with_machine_type(MachineTypeInfo {
                name: String::from("m5d.large"),
                ephemeral_devices: vec![EphemeralDevice {
                    device_name: String::from("/dev/sdc"),
                    virtual_name: String::from("ephemeral0"),
                }],
            });
        let group = ComputeGroup {
            image: Some(String::from("base-image")),
            on_demand_instance_type: Some(String::from("m5d.large")),
            ..ComputeGroup::new("nodes")
        };

        let layout = derive_layout(&provider, &group).await.unwrap();
        let devices = layout.block_devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_name, "/dev/xvda");
        assert_eq!(devices[1].virtual_name.as_deref(), Some("ephemeral0"));
    }

    #[tokio::test]
    async fn test_unknown_machine_type_fails() {
        let provider = InMemoryProvider::new().with_image(image());
        let group = ComputeGroup {
            image: Some(String::from("base-image")),
            on_demand_instance_type: Some(String::from("x9.mega")),
            ..ComputeGroup::new("nodes")
        };
        let err = derive_layout(&provider, &group).await.unwrap_err();
        assert!(err.to_string().contains("Unknown machine type"));
    }
}
