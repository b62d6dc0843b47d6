// SPDX-License-Identifier: CEPL-1.0
//! Frame protocol against a simulated GPU.
//!
//! Submissions stay pending until their fence is waited. Any CPU write to an
//! image's resources while a submission reading them is pending panics, as
//! does resetting a fence nobody waited on.
use std::collections::VecDeque;

use ember_render::{
    AcquiredFrame, DispatchConstants, FrameBackend, FrameDriver, FrameIndex, FrameOutcome,
    FrameStats, FrameStatus, ImageIndex, RenderError, RenderResult, RenderSize, Scene,
    SwapPlatform, SwapRing, UniformPayload,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Event {
    WaitSlot(usize),
    Acquire(u32, usize),
    Rebind(u32),
    Update(u32),
    Dispatch(u32, u32),
    Overlay(u32, u32),
    Submit(u32, usize),
    Present(u32, usize),
    PresentIdle,
    Recreate(RenderSize),
}

#[derive(Debug)]
struct SimSlot {
    id: usize,
}

struct SimFence {
    signaled: bool,
    reads: Option<u32>,
}

struct SimGpu {
    window: RenderSize,
    extent: RenderSize,
    image_count: usize,
    fences: Vec<SimFence>,
    /// Slot id whose pending submission reads each image.
    readers: Vec<Option<usize>>,
    acquire_order: VecDeque<u32>,
    next_image: u32,
    out_of_date_acquires: usize,
    suboptimal_presents: usize,
    /// Acquire/present report a lost device instead of a result.
    fail_acquire: bool,
    fail_present: bool,
    recording: Option<u32>,
    events: Vec<Event>,
}

impl SimGpu {
    fn new(window: RenderSize, image_count: usize) -> Self {
        Self {
            window,
            extent: window,
            image_count,
            fences: Vec::new(),
            readers: vec![None; image_count],
            acquire_order: VecDeque::new(),
            next_image: 0,
            out_of_date_acquires: 0,
            suboptimal_presents: 0,
            fail_acquire: false,
            fail_present: false,
            recording: None,
            events: Vec::new(),
        }
    }

    fn assert_idle(&self, image: ImageIndex, what: &str) {
        if let Some(slot) = self.readers[image.as_usize()] {
            panic!("{what} on image {} while slot {slot} still reads it", image.0);
        }
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|&e| pred(e)).count()
    }
}

impl SwapPlatform for SimGpu {
    type Slot = SimSlot;

    fn create_slot(&mut self) -> RenderResult<SimSlot> {
        self.fences.push(SimFence {
            signaled: true,
            reads: None,
        });
        Ok(SimSlot {
            id: self.fences.len() - 1,
        })
    }

    fn wait_slot(&mut self, slot: &SimSlot) -> RenderResult<()> {
        let fence = &mut self.fences[slot.id];
        fence.signaled = true;
        if let Some(image) = fence.reads.take() {
            if self.readers[image as usize] == Some(slot.id) {
                self.readers[image as usize] = None;
            }
        }
        self.events.push(Event::WaitSlot(slot.id));
        Ok(())
    }

    fn acquire_image(&mut self, slot: &SimSlot) -> RenderResult<FrameStatus<ImageIndex>> {
        if self.fail_acquire {
            return Err(RenderError::platform("acquire_next_image", "device lost"));
        }
        if self.out_of_date_acquires > 0 {
            self.out_of_date_acquires -= 1;
            return Ok(FrameStatus::NeedsRecreate);
        }
        let image = self.acquire_order.pop_front().unwrap_or_else(|| {
            let i = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count as u32;
            i
        });
        self.events.push(Event::Acquire(image, slot.id));
        Ok(FrameStatus::Ready(ImageIndex(image)))
    }

    fn present_image(&mut self, image: ImageIndex, slot: &SimSlot) -> RenderResult<FrameStatus<()>> {
        if self.fail_present {
            return Err(RenderError::platform("queue_present", "device lost"));
        }
        self.events.push(Event::Present(image.0, slot.id));
        if self.suboptimal_presents > 0 {
            self.suboptimal_presents -= 1;
            return Ok(FrameStatus::NeedsRecreate);
        }
        Ok(FrameStatus::Ready(()))
    }

    fn wait_present_idle(&mut self) -> RenderResult<()> {
        self.events.push(Event::PresentIdle);
        Ok(())
    }
}

impl FrameBackend for SimGpu {
    fn image_count(&self) -> usize {
        self.image_count
    }

    fn surface_extent(&self) -> RenderSize {
        self.extent
    }

    fn target_extent(&self) -> RenderSize {
        self.extent
    }

    fn recreate(&mut self, _hint: RenderSize) -> RenderResult<()> {
        for fence in &mut self.fences {
            fence.signaled = true;
            fence.reads = None;
        }
        self.readers = vec![None; self.image_count];
        self.extent = self.window;
        self.next_image = 0;
        self.events.push(Event::Recreate(self.extent));
        Ok(())
    }

    fn rebind_descriptors(&mut self, image: ImageIndex) -> RenderResult<()> {
        self.assert_idle(image, "descriptor rebind");
        self.events.push(Event::Rebind(image.0));
        Ok(())
    }

    fn update_uniforms(&mut self, image: ImageIndex, _payload: &UniformPayload) -> RenderResult<()> {
        self.assert_idle(image, "uniform write");
        self.events.push(Event::Update(image.0));
        Ok(())
    }

    fn record_dispatch(&mut self, image: ImageIndex, c: &DispatchConstants) -> RenderResult<()> {
        self.assert_idle(image, "command recording");
        assert_eq!((c.width, c.height), (self.extent.width, self.extent.height));
        self.recording = Some(image.0);
        self.events.push(Event::Dispatch(image.0, c.samples));
        Ok(())
    }

    fn record_overlay(&mut self, image: ImageIndex, stats: &FrameStats) -> RenderResult<()> {
        assert_eq!(self.recording, Some(image.0));
        self.events.push(Event::Overlay(image.0, stats.samples));
        Ok(())
    }

    fn submit(&mut self, image: ImageIndex, slot: &SimSlot) -> RenderResult<()> {
        assert_eq!(self.recording.take(), Some(image.0));
        let fence = &mut self.fences[slot.id];
        assert!(fence.signaled, "slot {} reused before its fence was waited", slot.id);
        fence.signaled = false;
        fence.reads = Some(image.0);
        self.readers[image.as_usize()] = Some(slot.id);
        self.events.push(Event::Submit(image.0, slot.id));
        Ok(())
    }
}

const WINDOW: RenderSize = RenderSize::new(640, 480);

fn driver(frames_in_flight: usize, image_count: usize) -> FrameDriver<SimGpu> {
    FrameDriver::new(SimGpu::new(WINDOW, image_count), frames_in_flight, WINDOW).unwrap()
}

fn submits(gpu: &SimGpu) -> Vec<(u32, usize)> {
    gpu.events
        .iter()
        .filter_map(|e| match *e {
            Event::Submit(image, slot) => Some((image, slot)),
            _ => None,
        })
        .collect()
}

#[test]
fn ring_position_follows_cycles_mod_k() {
    for k in [1usize, 2, 3] {
        let mut d = driver(k, 3);
        let scene = Scene::default();
        for cycle in 0..10 {
            assert_eq!(d.current_frame(), FrameIndex(cycle % k), "k={k}");
            assert_eq!(d.run_frame(&scene).unwrap(), FrameOutcome::Presented);
        }
        let slots: Vec<usize> = submits(d.backend()).iter().map(|s| s.1).collect();
        let expected: Vec<usize> = (0..10).map(|c| c % k).collect();
        assert_eq!(slots, expected, "k={k}");
    }
}

#[test]
fn slot_fence_is_waited_before_reuse() {
    for k in [1usize, 2] {
        let mut d = driver(k, 3);
        for _ in 0..8 {
            d.run_frame(&Scene::default()).unwrap();
        }
        let events = &d.backend().events;
        for (i, e) in events.iter().enumerate() {
            if let Event::Submit(_, slot) = *e {
                let last_wait = events[..i]
                    .iter()
                    .rposition(|e| *e == Event::WaitSlot(slot))
                    .expect("slot waited at least once");
                let last_submit = events[..i]
                    .iter()
                    .rposition(|e| matches!(e, Event::Submit(_, s) if *s == slot));
                if let Some(prev) = last_submit {
                    assert!(last_wait > prev, "k={k}: slot {slot} reused without a wait");
                }
            }
        }
    }
}

#[test]
fn image_returned_out_of_order_waits_for_its_previous_slot() {
    let mut d = driver(2, 3);
    d.backend_mut().acquire_order = VecDeque::from([0, 1, 0, 0, 1, 2, 2]);
    for _ in 0..7 {
        // SimGpu panics if a write lands on an image still being read.
        d.run_frame(&Scene::default()).unwrap();
    }
    assert_eq!(
        submits(d.backend()),
        vec![(0, 0), (1, 1), (0, 0), (0, 1), (1, 0), (2, 1), (2, 0)]
    );
    let events = &d.backend().events;
    let fourth = events
        .iter()
        .position(|e| *e == Event::Acquire(0, 1))
        .unwrap();
    assert_eq!(events[fourth + 1], Event::WaitSlot(0));
}

#[test]
fn single_frame_in_flight_serialises_everything() {
    let mut d = driver(1, 2);
    d.backend_mut().acquire_order = VecDeque::from([1, 1, 0, 1]);
    for _ in 0..4 {
        d.run_frame(&Scene::default()).unwrap();
    }
    assert!(submits(d.backend()).iter().all(|&(_, slot)| slot == 0));
}

#[test]
fn frame_sequence_is_acquire_update_record_submit_present() {
    let mut d = driver(2, 3);
    d.run_frame(&Scene::default()).unwrap();
    assert_eq!(
        d.backend().events,
        vec![
            Event::WaitSlot(0),
            Event::Acquire(0, 0),
            Event::Rebind(0),
            Event::Update(0),
            Event::Dispatch(0, 0),
            Event::Overlay(0, 1),
            Event::Submit(0, 0),
            Event::Present(0, 0),
        ]
    );
}

#[test]
fn descriptors_are_rebound_once_per_image_until_invalidated() {
    let mut d = driver(2, 2);
    for _ in 0..6 {
        d.run_frame(&Scene::default()).unwrap();
    }
    assert_eq!(d.backend().count(|e| matches!(e, Event::Rebind(_))), 2);

    d.invalidate();
    for _ in 0..2 {
        d.run_frame(&Scene::default()).unwrap();
    }
    assert_eq!(d.backend().count(|e| matches!(e, Event::Rebind(_))), 4);
}

#[test]
fn sample_counter_increments_per_dispatch_and_resets() {
    let mut d = driver(2, 3);
    for expected in 0..5u32 {
        d.run_frame(&Scene::default()).unwrap();
        assert_eq!(d.sample_count(), expected + 1);
    }
    d.invalidate();
    assert_eq!(d.sample_count(), 0);
    d.run_frame(&Scene::default()).unwrap();

    let pushed: Vec<u32> = d
        .backend()
        .events
        .iter()
        .filter_map(|e| match *e {
            Event::Dispatch(_, samples) => Some(samples),
            _ => None,
        })
        .collect();
    assert_eq!(pushed, vec![0, 1, 2, 3, 4, 0]);
}

#[test]
fn out_of_date_acquire_recreates_with_fresh_extent() {
    let mut d = driver(2, 3);
    d.run_frame(&Scene::default()).unwrap();
    d.run_frame(&Scene::default()).unwrap();

    let resized = RenderSize::new(1024, 768);
    d.backend_mut().window = resized;
    d.backend_mut().out_of_date_acquires = 1;

    assert_eq!(d.run_frame(&Scene::default()).unwrap(), FrameOutcome::Recreated);
    assert_eq!(d.backend().surface_extent(), resized);
    assert_eq!(d.current_frame(), FrameIndex(0));
    assert_eq!(d.sample_count(), 0);

    let before = d.backend().events.len();
    assert_eq!(d.run_frame(&Scene::default()).unwrap(), FrameOutcome::Presented);
    // Fresh images need their descriptors written again.
    assert!(d.backend().events[before..].contains(&Event::Rebind(0)));
}

#[test]
fn suboptimal_present_waits_idle_then_recreates() {
    let mut d = driver(2, 3);
    d.backend_mut().suboptimal_presents = 1;

    assert_eq!(d.run_frame(&Scene::default()).unwrap(), FrameOutcome::Recreated);
    let events = &d.backend().events;
    let present = events
        .iter()
        .position(|e| matches!(e, Event::Present(..)))
        .unwrap();
    assert_eq!(events[present + 1], Event::PresentIdle);
    assert!(matches!(events[present + 2], Event::Recreate(_)));
    assert_eq!(d.frames_presented(), 0);

    assert_eq!(d.run_frame(&Scene::default()).unwrap(), FrameOutcome::Presented);
    assert_eq!(d.frames_presented(), 1);
}

#[test]
fn explicit_resize_recreates_before_acquire() {
    let mut d = driver(2, 3);
    let resized = RenderSize::new(320, 200);
    d.backend_mut().window = resized;
    d.resize(resized);

    assert_eq!(d.run_frame(&Scene::default()).unwrap(), FrameOutcome::Presented);
    let events = &d.backend().events;
    assert_eq!(events[0], Event::Recreate(resized));
    assert!(matches!(events[1], Event::WaitSlot(_)));
}

#[test]
fn ring_rejects_out_of_order_calls() {
    let mut gpu = SimGpu::new(WINDOW, 2);
    let mut ring = SwapRing::new(&mut gpu, 2, 2).unwrap();

    let bogus = AcquiredFrame {
        image: ImageIndex(0),
        frame: FrameIndex(0),
    };
    assert!(matches!(
        ring.present(&mut gpu, bogus),
        Err(RenderError::OutOfOrder { .. })
    ));

    let acquired = ring.acquire_next(&mut gpu).unwrap().ready().unwrap();
    assert!(matches!(
        ring.acquire_next(&mut gpu),
        Err(RenderError::OutOfOrder { .. })
    ));
    assert!(matches!(
        ring.present(&mut gpu, acquired),
        Err(RenderError::OutOfOrder { .. })
    ));
    ring.mark_submitted(acquired).unwrap();
    assert_eq!(ring.present(&mut gpu, acquired).unwrap(), FrameStatus::Ready(()));
    assert_eq!(ring.current_frame(), FrameIndex(1));
}

#[test]
fn zero_frames_in_flight_is_a_config_error() {
    let gpu = SimGpu::new(WINDOW, 2);
    assert!(matches!(
        FrameDriver::new(gpu, 0, WINDOW),
        Err(RenderError::Config(_))
    ));
}

#[test]
fn device_loss_on_present_is_fatal_not_a_recreate() {
    let mut d = driver(2, 3);
    d.run_frame(&Scene::default()).unwrap();
    d.backend_mut().fail_present = true;

    let err = d.run_frame(&Scene::default()).unwrap_err();
    assert!(matches!(err, RenderError::Platform { call: "queue_present", .. }));
    let gpu = d.backend();
    assert_eq!(gpu.count(|e| *e == Event::PresentIdle), 0);
    assert_eq!(gpu.count(|e| matches!(e, Event::Recreate(_))), 0);
    assert_eq!(d.frames_presented(), 1);
}

#[test]
fn device_loss_on_acquire_is_fatal_not_a_recreate() {
    let mut d = driver(2, 3);
    d.backend_mut().fail_acquire = true;

    let err = d.run_frame(&Scene::default()).unwrap_err();
    assert!(matches!(err, RenderError::Platform { call: "acquire_next_image", .. }));
    assert_eq!(d.backend().events, vec![Event::WaitSlot(0)]);
}

#[test]
fn empty_initial_size_is_a_config_error() {
    let gpu = SimGpu::new(WINDOW, 2);
    assert!(matches!(
        FrameDriver::new(gpu, 2, RenderSize::new(0, 480)),
        Err(RenderError::Config(_))
    ));
}

#[test]
fn minimised_window_skips_frames_until_restored() {
    let mut d = driver(2, 3);
    d.run_frame(&Scene::default()).unwrap();
    let before = d.backend().events.len();

    d.resize(RenderSize::new(0, 0));
    assert!(d.is_paused());
    for _ in 0..3 {
        assert_eq!(d.run_frame(&Scene::default()).unwrap(), FrameOutcome::Skipped);
    }
    assert_eq!(d.backend().events.len(), before);

    d.resize(WINDOW);
    assert!(!d.is_paused());
    assert_eq!(d.run_frame(&Scene::default()).unwrap(), FrameOutcome::Presented);
    assert_eq!(d.backend().events[before], Event::Recreate(WINDOW));
    assert_eq!(d.frames_presented(), 2);
}
