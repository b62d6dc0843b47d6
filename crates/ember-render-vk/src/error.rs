// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_render::{RenderError, RenderResult};

/// Maps a failed Vulkan call onto the renderer's error taxonomy.
pub fn vk_error(call: &'static str, result: vk::Result) -> RenderError {
    let reason = format!("{result:?}");
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY
        | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        | vk::Result::ERROR_OUT_OF_POOL_MEMORY
        | vk::Result::ERROR_FRAGMENTED_POOL
        | vk::Result::ERROR_TOO_MANY_OBJECTS => RenderError::Exhausted { call, reason },
        vk::Result::ERROR_EXTENSION_NOT_PRESENT
        | vk::Result::ERROR_FEATURE_NOT_PRESENT
        | vk::Result::ERROR_LAYER_NOT_PRESENT
        | vk::Result::ERROR_INCOMPATIBLE_DRIVER
        | vk::Result::ERROR_FORMAT_NOT_SUPPORTED => {
            RenderError::Capability(format!("{call}: {reason}"))
        }
        _ => RenderError::Platform { call, reason },
    }
}

/// `.context("vkCall")?` for raw `VkResult`s.
pub trait VkContext<T> {
    fn context(self, call: &'static str) -> RenderResult<T>;
}

impl<T> VkContext<T> for Result<T, vk::Result> {
    #[inline]
    fn context(self, call: &'static str) -> RenderResult<T> {
        self.map_err(|e| vk_error(call, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_errors_are_exhaustion() {
        for r in [
            vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            vk::Result::ERROR_OUT_OF_POOL_MEMORY,
        ] {
            assert!(matches!(
                vk_error("allocate", r),
                RenderError::Exhausted { call: "allocate", .. }
            ));
        }
    }

    #[test]
    fn missing_features_are_capability_errors() {
        let e = vk_error("create_device", vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        assert!(matches!(e, RenderError::Capability(ref m) if m.contains("create_device")));
    }

    #[test]
    fn device_lost_is_a_platform_error() {
        let r: Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        let e = r.context("queue_submit").unwrap_err();
        assert!(matches!(e, RenderError::Platform { call: "queue_submit", .. }));
        assert!(e.to_string().contains("ERROR_DEVICE_LOST"));
    }
}
