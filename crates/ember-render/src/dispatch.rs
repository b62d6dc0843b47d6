// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};

use crate::RenderSize;

/// Local size of the compute shader along x and y.
pub const WORKGROUP_SIZE: u32 = 16;

/// Workgroup counts covering every pixel of `extent`. The shader discards
/// invocations outside the image.
pub fn dispatch_groups(extent: RenderSize) -> [u32; 3] {
    [
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
        1,
    ]
}

/// Push-constant block; layout matches the shader's `Constants`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DispatchConstants {
    pub samples: u32,
    pub width: u32,
    pub height: u32,
    pub time: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_cover_every_pixel() {
        let sizes = (1..=97u32).chain([255, 256, 257, 1920, 1080, 3841]);
        for w in sizes.clone() {
            for h in [1u32, 15, 16, 17, 720] {
                let [gx, gy, gz] = dispatch_groups(RenderSize::new(w, h));
                assert_eq!(gz, 1);
                assert!(gx * WORKGROUP_SIZE >= w, "{w}x{h}");
                assert!(gy * WORKGROUP_SIZE >= h, "{w}x{h}");
                assert!((gx - 1) * WORKGROUP_SIZE < w, "{w}x{h}");
                assert!((gy - 1) * WORKGROUP_SIZE < h, "{w}x{h}");
            }
        }
    }

    #[test]
    fn exact_multiples_add_no_extra_group() {
        assert_eq!(dispatch_groups(RenderSize::new(32, 16)), [2, 1, 1]);
        assert_eq!(dispatch_groups(RenderSize::new(33, 17)), [3, 2, 1]);
    }

    #[test]
    fn constants_are_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<DispatchConstants>(), 16);
        let c = DispatchConstants {
            samples: 3,
            width: 4,
            height: 5,
            time: 1.5,
        };
        let bytes = bytemuck::bytes_of(&c);
        assert_eq!(&bytes[0..4], &3u32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &1.5f32.to_ne_bytes());
    }
}
