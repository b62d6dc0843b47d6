// SPDX-License-Identifier: CEPL-1.0
//! Frames-in-flight ring over a swapchain.
//!
//! The ring owns K slots (image-available semaphore, render-finished
//! semaphore, completion fence) and walks them in order. Before a slot is
//! reused its fence is waited, which keeps the CPU at most K frames ahead.
//! Images are tracked separately: when the swapchain hands back an image
//! that a different slot last rendered to, that slot's fence is waited as
//! well, so per-image resources are never touched while the GPU reads them.
use crate::error::{RenderError, RenderResult};
use crate::frame::{AcquiredFrame, FrameIndex, FrameRing, FrameStatus, ImageIndex};

/// Platform operations the ring is built on. The Vulkan backend implements
/// it over `VK_KHR_swapchain`; tests implement it over a simulated GPU.
pub trait SwapPlatform {
    type Slot;

    fn create_slot(&mut self) -> RenderResult<Self::Slot>;

    /// Blocks until the last submission signalling this slot's fence is done.
    fn wait_slot(&mut self, slot: &Self::Slot) -> RenderResult<()>;

    /// Acquires the next presentable image, signalling the slot's
    /// image-available semaphore.
    fn acquire_image(&mut self, slot: &Self::Slot) -> RenderResult<FrameStatus<ImageIndex>>;

    /// Queues `image` for display after the slot's render-finished semaphore.
    fn present_image(&mut self, image: ImageIndex, slot: &Self::Slot)
        -> RenderResult<FrameStatus<()>>;

    /// Blocks until the present queue is idle.
    fn wait_present_idle(&mut self) -> RenderResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RingState {
    Ready,
    Acquired(AcquiredFrame),
    Submitted(AcquiredFrame),
}

impl RingState {
    fn name(&self) -> &'static str {
        match self {
            RingState::Ready => "ready",
            RingState::Acquired(_) => "acquired",
            RingState::Submitted(_) => "submitted",
        }
    }
}

pub struct SwapRing<S> {
    slots: Vec<S>,
    ring: FrameRing,
    state: RingState,
    /// Slot that last rendered to each image.
    image_owners: Vec<Option<FrameIndex>>,
}

impl<S> SwapRing<S> {
    pub fn new<P>(platform: &mut P, frames_in_flight: usize, image_count: usize) -> RenderResult<Self>
    where
        P: SwapPlatform<Slot = S>,
    {
        let ring = FrameRing::new(frames_in_flight)?;
        let slots = create_slots(platform, frames_in_flight)?;
        tracing::debug!(frames_in_flight, image_count, "swap ring created");
        Ok(Self {
            slots,
            ring,
            state: RingState::Ready,
            image_owners: vec![None; image_count],
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.ring.len()
    }

    pub fn current_frame(&self) -> FrameIndex {
        self.ring.current()
    }

    pub fn slot(&self, frame: FrameIndex) -> &S {
        &self.slots[frame.0]
    }

    pub fn slots(&self) -> &[S] {
        &self.slots
    }

    /// Waits the current slot, then acquires an image for it.
    pub fn acquire_next<P>(&mut self, platform: &mut P) -> RenderResult<FrameStatus<AcquiredFrame>>
    where
        P: SwapPlatform<Slot = S>,
    {
        if self.state != RingState::Ready {
            return Err(RenderError::OutOfOrder {
                expected: "ready",
                found: self.state.name(),
            });
        }

        let frame = self.ring.current();
        platform.wait_slot(&self.slots[frame.0])?;

        let image = match platform.acquire_image(&self.slots[frame.0])? {
            FrameStatus::Ready(image) => image,
            FrameStatus::NeedsRecreate => {
                tracing::debug!(frame = frame.0, "acquire reported stale surface");
                return Ok(FrameStatus::NeedsRecreate);
            }
        };

        let owner = self
            .image_owners
            .get_mut(image.as_usize())
            .ok_or_else(|| {
                RenderError::platform(
                    "acquire_next_image",
                    format!("image {} outside swapchain", image.0),
                )
            })?;
        if let Some(prev) = owner.replace(frame) {
            if prev != frame {
                tracing::trace!(image = image.0, prev = prev.0, "image still owned by older slot");
                platform.wait_slot(&self.slots[prev.0])?;
            }
        }

        let acquired = AcquiredFrame { image, frame };
        self.state = RingState::Acquired(acquired);
        Ok(FrameStatus::Ready(acquired))
    }

    /// Records that work for `acquired` was submitted with the slot's sync objects.
    pub fn mark_submitted(&mut self, acquired: AcquiredFrame) -> RenderResult<()> {
        match self.state {
            RingState::Acquired(current) if current == acquired => {
                self.state = RingState::Submitted(acquired);
                Ok(())
            }
            other => Err(RenderError::OutOfOrder {
                expected: "acquired",
                found: other.name(),
            }),
        }
    }

    /// Presents the submitted image. A stale surface waits for the present
    /// queue to drain and asks for recreation; otherwise the ring advances.
    pub fn present<P>(&mut self, platform: &mut P, acquired: AcquiredFrame) -> RenderResult<FrameStatus<()>>
    where
        P: SwapPlatform<Slot = S>,
    {
        match self.state {
            RingState::Submitted(current) if current == acquired => {}
            other => {
                return Err(RenderError::OutOfOrder {
                    expected: "submitted",
                    found: other.name(),
                })
            }
        }

        let status = platform.present_image(acquired.image, &self.slots[acquired.frame.0])?;
        self.state = RingState::Ready;
        match status {
            FrameStatus::Ready(()) => {
                self.ring.advance();
                Ok(FrameStatus::Ready(()))
            }
            FrameStatus::NeedsRecreate => {
                platform.wait_present_idle()?;
                Ok(FrameStatus::NeedsRecreate)
            }
        }
    }

    /// Replaces every slot and forgets image ownership. The caller must have
    /// drained the GPU; a suboptimal acquire can leave a semaphore signalled.
    pub fn rebuild<P>(&mut self, platform: &mut P, image_count: usize) -> RenderResult<()>
    where
        P: SwapPlatform<Slot = S>,
    {
        self.slots = create_slots(platform, self.ring.len())?;
        self.image_owners = vec![None; image_count];
        self.ring.reset();
        self.state = RingState::Ready;
        Ok(())
    }
}

fn create_slots<P: SwapPlatform>(platform: &mut P, count: usize) -> RenderResult<Vec<P::Slot>> {
    (0..count).map(|_| platform.create_slot()).collect()
}
