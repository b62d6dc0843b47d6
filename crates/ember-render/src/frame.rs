// SPDX-License-Identifier: CEPL-1.0
use crate::error::{RenderError, RenderResult};

/// Presentable image slot handed out by the swapchain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageIndex(pub u32);

impl ImageIndex {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Ring position of a frame-in-flight slot; unrelated to [`ImageIndex`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameIndex(pub usize);

/// Result of an acquire or present against a possibly stale surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum FrameStatus<T> {
    Ready(T),
    /// Surface is suboptimal or out of date; rebuild size-dependent state.
    NeedsRecreate,
}

impl<T> FrameStatus<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            FrameStatus::Ready(v) => Some(v),
            FrameStatus::NeedsRecreate => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FrameStatus<U> {
        match self {
            FrameStatus::Ready(v) => FrameStatus::Ready(f(v)),
            FrameStatus::NeedsRecreate => FrameStatus::NeedsRecreate,
        }
    }
}

/// An image acquired for the current iteration, paired with the slot whose
/// sync objects guard it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredFrame {
    pub image: ImageIndex,
    pub frame: FrameIndex,
}

/// Cyclic `FrameIndex` counter: `(i + 1) mod len`.
#[derive(Clone, Copy, Debug)]
pub struct FrameRing {
    current: usize,
    len: usize,
}

impl FrameRing {
    pub fn new(len: usize) -> RenderResult<Self> {
        if len == 0 {
            return Err(RenderError::Config(
                "frames in flight must be at least 1".into(),
            ));
        }
        Ok(Self { current: 0, len })
    }

    pub fn current(&self) -> FrameIndex {
        FrameIndex(self.current)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn advance(&mut self) -> FrameIndex {
        self.current = (self.current + 1) % self.len;
        FrameIndex(self.current)
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_ring_is_rejected() {
        assert!(matches!(FrameRing::new(0), Err(RenderError::Config(_))));
    }

    #[test]
    fn ring_position_is_cycles_mod_len() {
        for len in 1..=4 {
            let mut ring = FrameRing::new(len).unwrap();
            for cycle in 0..25 {
                assert_eq!(ring.current(), FrameIndex(cycle % len));
                ring.advance();
            }
        }
    }

    #[test]
    fn reset_returns_to_zero() {
        let mut ring = FrameRing::new(3).unwrap();
        ring.advance();
        ring.advance();
        ring.reset();
        assert_eq!(ring.current(), FrameIndex(0));
    }

    #[test]
    fn status_map_keeps_recreate() {
        let s: FrameStatus<u32> = FrameStatus::NeedsRecreate;
        assert_eq!(s.map(|v| v + 1), FrameStatus::NeedsRecreate);
        assert_eq!(FrameStatus::Ready(1).map(|v| v + 1).ready(), Some(2));
    }
}
