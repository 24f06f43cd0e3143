//! Image layout transitions.
//!
//! The access and stage masks for a transition are derived from an explicit
//! table of supported (old, new) layout pairs. A pair outside the table is a
//! hard error rather than a silent zero access mask.

use crate::error::{GpuError, Result};
use ash::vk;

/// Masks for one layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Look up the barrier masks for an (old, new) layout pair.
///
/// Only the pairs this renderer actually performs are listed; anything else
/// returns [`GpuError::UnsupportedLayoutTransition`].
pub fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<TransitionMasks> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let masks = match (old, new) {
        // Fresh image becoming a copy destination
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_access: A::empty(),
            dst_access: A::TRANSFER_WRITE,
            src_stage: S::TOP_OF_PIPE,
            dst_stage: S::TRANSFER,
        },
        // Upload finished, image becomes sampleable
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_access: A::TRANSFER_WRITE,
            dst_access: A::SHADER_READ,
            src_stage: S::TRANSFER,
            dst_stage: S::FRAGMENT_SHADER,
        },
        // Fresh image used as a color attachment
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => TransitionMasks {
            src_access: A::empty(),
            dst_access: A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            src_stage: S::TOP_OF_PIPE,
            dst_stage: S::COLOR_ATTACHMENT_OUTPUT,
        },
        // Fresh image used as a depth attachment
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => TransitionMasks {
            src_access: A::empty(),
            dst_access: A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: S::TOP_OF_PIPE,
            dst_stage: S::EARLY_FRAGMENT_TESTS,
        },
        // Host-written image becoming a copy destination
        (L::PREINITIALIZED, L::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_access: A::HOST_WRITE,
            dst_access: A::TRANSFER_WRITE,
            src_stage: S::HOST,
            dst_stage: S::TRANSFER,
        },
        // Readback source becoming sampleable again
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_access: A::TRANSFER_READ,
            dst_access: A::SHADER_READ,
            src_stage: S::TRANSFER,
            dst_stage: S::FRAGMENT_SHADER,
        },
        // Rendered attachment becoming a readback source
        (L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => TransitionMasks {
            src_access: A::COLOR_ATTACHMENT_WRITE,
            dst_access: A::TRANSFER_READ,
            src_stage: S::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: S::TRANSFER,
        },
        (old, new) => return Err(GpuError::UnsupportedLayoutTransition { old, new }),
    };

    Ok(masks)
}

/// Record a pipeline barrier transitioning an image between layouts.
///
/// # Safety
/// The device and command buffer must be valid, and the command buffer must
/// be in the recording state.
pub unsafe fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    subresource_range: vk::ImageSubresourceRange,
) -> Result<()> {
    let masks = transition_masks(old, new)?;

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range)
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    device.cmd_pipeline_barrier(
        cmd,
        masks.src_stage,
        masks.dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );

    Ok(())
}

/// Subresource range covering a single-mip, single-layer color image.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    #[test]
    fn upload_transitions_are_covered() {
        let to_dst = transition_masks(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(to_dst.src_access, A::empty());
        assert_eq!(to_dst.dst_access, A::TRANSFER_WRITE);
        assert_eq!(to_dst.dst_stage, S::TRANSFER);

        let to_shader =
            transition_masks(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(to_shader.src_access, A::TRANSFER_WRITE);
        assert_eq!(to_shader.dst_access, A::SHADER_READ);
        assert_eq!(to_shader.src_stage, S::TRANSFER);
        assert_eq!(to_shader.dst_stage, S::FRAGMENT_SHADER);
    }

    #[test]
    fn unknown_pair_fails_loudly() {
        let result = transition_masks(L::SHADER_READ_ONLY_OPTIMAL, L::GENERAL);
        assert!(matches!(
            result,
            Err(GpuError::UnsupportedLayoutTransition {
                old: L::SHADER_READ_ONLY_OPTIMAL,
                new: L::GENERAL,
            })
        ));
    }

    #[test]
    fn reversed_pair_is_not_implied() {
        // The table is directional: dst->src of a covered pair is still unknown
        assert!(transition_masks(L::TRANSFER_DST_OPTIMAL, L::UNDEFINED).is_err());
        assert!(transition_masks(L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL).is_err());
    }
}
