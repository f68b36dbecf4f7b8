use serde_yaml::Value;

use crate::error::HerdError;
use crate::util::ByteSize;
use crate::workflow::{ImageQuery, Minimum, Resource, WorkflowDefinition};

/// Description of a VM about to be created.
///
/// Zero sizes and a `Null` cloud-init document mean the caller has not asked
/// for anything specific.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmProvisioningRequest {
    pub num_cores: u32,
    pub mem_size: ByteSize,
    pub disk_space: ByteSize,
    pub cloud_init: Value,
}

/// Merge a workflow into `request` and return the image to boot.
///
/// Unset resources take the workflow minimum, explicit values below it are
/// rejected, and anything else is left alone. On error the request is not
/// modified.
pub fn apply(
    workflow: &WorkflowDefinition,
    request: &mut VmProvisioningRequest,
) -> Result<ImageQuery, HerdError> {
    let num_cores = merge(request.num_cores, workflow.minimum_cores.as_ref(), Resource::Cores)?;
    let mem_size = merge(request.mem_size, workflow.minimum_memory.as_ref(), Resource::Memory)?;
    let disk_space = merge(request.disk_space, workflow.minimum_disk.as_ref(), Resource::Disk)?;

    request.num_cores = num_cores;
    request.mem_size = mem_size;
    request.disk_space = disk_space;

    if request.cloud_init.is_null()
        && let Some(cloud_init) = &workflow.cloud_init
    {
        request.cloud_init = cloud_init.clone();
    }

    Ok(workflow.image.clone())
}

fn merge<T>(current: T, minimum: Option<&Minimum<T>>, resource: Resource) -> Result<T, HerdError>
where
    T: Copy + Default + PartialOrd,
{
    let Some(minimum) = minimum else {
        return Ok(current);
    };
    if current == T::default() {
        Ok(minimum.value)
    } else if current < minimum.value {
        Err(HerdError::WorkflowMinimum {
            resource: resource.label(),
            required: minimum.text.clone(),
        })
    } else {
        Ok(current)
    }
}
