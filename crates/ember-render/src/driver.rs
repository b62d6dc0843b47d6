// SPDX-License-Identifier: CEPL-1.0
//! One iteration of the render loop, expressed over [`FrameBackend`].
use crate::accumulate::SampleCounter;
use crate::dispatch::DispatchConstants;
use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameIndex, FrameStatus, ImageIndex};
use crate::payload::{Scene, UniformPayload};
use crate::swap::{SwapPlatform, SwapRing};
use crate::RenderSize;

/// Values an overlay may display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Samples accumulated including this frame's dispatch.
    pub samples: u32,
    pub frames_presented: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Size-dependent state was rebuilt; nothing reached the screen.
    Recreated,
    /// Nothing to draw into, e.g. the window is minimised.
    Skipped,
}

/// Device side of a frame. Per-image calls are only made for an image whose
/// previous readers have completed.
pub trait FrameBackend: SwapPlatform {
    fn image_count(&self) -> usize;
    fn surface_extent(&self) -> RenderSize;
    /// Extent of the compute target, which may differ from the surface.
    fn target_extent(&self) -> RenderSize;

    /// Drains the device and rebuilds the swapchain and everything sized by it.
    fn recreate(&mut self, hint: RenderSize) -> RenderResult<()>;

    fn rebind_descriptors(&mut self, image: ImageIndex) -> RenderResult<()>;
    fn update_uniforms(&mut self, image: ImageIndex, payload: &UniformPayload) -> RenderResult<()>;
    /// Begins the image's command buffer and records dispatch plus copy.
    fn record_dispatch(&mut self, image: ImageIndex, constants: &DispatchConstants) -> RenderResult<()>;
    fn record_overlay(&mut self, image: ImageIndex, stats: &FrameStats) -> RenderResult<()>;
    /// Finishes the command buffer and submits it: waits image-available,
    /// signals render-finished and the slot fence.
    fn submit(&mut self, image: ImageIndex, slot: &Self::Slot) -> RenderResult<()>;
}

pub struct FrameDriver<B: FrameBackend> {
    backend: B,
    ring: SwapRing<B::Slot>,
    samples: SampleCounter,
    /// Images whose descriptor sets must be rewritten before next use.
    stale: Vec<bool>,
    hint: RenderSize,
    pending_resize: bool,
    frames_presented: u64,
}

impl<B: FrameBackend> FrameDriver<B> {
    /// `hint` must have area; a window minimised from the start has no
    /// swapchain to build.
    pub fn new(mut backend: B, frames_in_flight: usize, hint: RenderSize) -> RenderResult<Self> {
        if hint.is_empty() {
            return Err(RenderError::Config(format!(
                "initial render size {}x{} has no area",
                hint.width, hint.height
            )));
        }
        let image_count = backend.image_count();
        let ring = SwapRing::new(&mut backend, frames_in_flight, image_count)?;
        Ok(Self {
            backend,
            ring,
            samples: SampleCounter::new(),
            stale: vec![true; image_count],
            hint,
            pending_resize: false,
            frames_presented: 0,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn sample_count(&self) -> u32 {
        self.samples.count()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.ring.frames_in_flight()
    }

    pub fn current_frame(&self) -> FrameIndex {
        self.ring.current_frame()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Window size changed; recreation happens at the start of the next frame.
    /// While `size` has no area frames are skipped and recreation waits for
    /// the next non-empty size.
    pub fn resize(&mut self, size: RenderSize) {
        self.hint = size;
        self.pending_resize = true;
    }

    /// Accumulation is no longer valid: restart samples and rebind lazily.
    pub fn invalidate(&mut self) {
        self.stale.iter_mut().for_each(|s| *s = true);
        self.samples.reset();
    }

    pub fn is_paused(&self) -> bool {
        self.hint.is_empty()
    }

    pub fn run_frame(&mut self, scene: &Scene) -> RenderResult<FrameOutcome> {
        if self.is_paused() {
            return Ok(FrameOutcome::Skipped);
        }
        if self.pending_resize {
            self.pending_resize = false;
            self.recreate()?;
        }

        let acquired = match self.ring.acquire_next(&mut self.backend)? {
            FrameStatus::Ready(acquired) => acquired,
            FrameStatus::NeedsRecreate => {
                self.recreate()?;
                return Ok(FrameOutcome::Recreated);
            }
        };
        let image = acquired.image;

        if self.stale[image.as_usize()] {
            self.backend.rebind_descriptors(image)?;
            self.stale[image.as_usize()] = false;
        }

        let target = self.backend.target_extent();
        let payload = UniformPayload::from_scene(scene, target);
        self.backend.update_uniforms(image, &payload)?;

        let constants = DispatchConstants {
            samples: self.samples.advance(),
            width: target.width,
            height: target.height,
            time: scene.time,
        };
        self.backend.record_dispatch(image, &constants)?;

        let stats = FrameStats {
            samples: self.samples.count(),
            frames_presented: self.frames_presented,
        };
        self.backend.record_overlay(image, &stats)?;

        self.backend.submit(image, self.ring.slot(acquired.frame))?;
        self.ring.mark_submitted(acquired)?;

        match self.ring.present(&mut self.backend, acquired)? {
            FrameStatus::Ready(()) => {
                self.frames_presented += 1;
                Ok(FrameOutcome::Presented)
            }
            FrameStatus::NeedsRecreate => {
                self.recreate()?;
                Ok(FrameOutcome::Recreated)
            }
        }
    }

    fn recreate(&mut self) -> RenderResult<()> {
        self.backend.recreate(self.hint)?;
        let image_count = self.backend.image_count();
        self.ring.rebuild(&mut self.backend, image_count)?;
        self.stale = vec![true; image_count];
        self.samples.reset();
        let extent = self.backend.surface_extent();
        tracing::info!(
            width = extent.width,
            height = extent.height,
            image_count,
            "swapchain recreated"
        );
        Ok(())
    }
}
