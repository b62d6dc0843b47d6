// SPDX-License-Identifier: CEPL-1.0

/// Progressive sample counter fed to the compute shader.
///
/// Each dispatch consumes the current count and bumps it; anything that
/// invalidates the accumulated image resets it to zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleCounter {
    count: u32,
}

impl SampleCounter {
    pub const fn new() -> Self {
        Self { count: 0 }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Returns the value to push for this dispatch.
    pub fn advance(&mut self) -> u32 {
        let current = self.count;
        self.count = self.count.saturating_add(1);
        current
    }

    pub fn reset(&mut self) {
        if self.count != 0 {
            tracing::debug!(samples = self.count, "accumulation reset");
        }
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_one_per_dispatch() {
        let mut c = SampleCounter::new();
        for expected in 0..10 {
            assert_eq!(c.advance(), expected);
            assert_eq!(c.count(), expected + 1);
        }
    }

    #[test]
    fn reset_is_exactly_zero() {
        let mut c = SampleCounter::new();
        c.advance();
        c.advance();
        c.reset();
        assert_eq!(c.count(), 0);
        assert_eq!(c.advance(), 0);
    }
}
