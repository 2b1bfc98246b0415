// Frame loop - per-frame render/present protocol
//
// Each call to `FrameLoop::step` is one loop iteration:
//
//   Idle -> Acquiring -> Submitting -> Presenting -> Idle
//     \________\______________________________\-> Recreating -> Idle
//
// `Recreating` is entered on a resize signal, when acquisition reports an
// out-of-date surface (the frame is skipped), or after a present that
// reported suboptimal/out-of-date (the frame has already been shown).

use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};
use crate::error::Result;
use ash::vk;

/// GPU side of the loop.
pub trait FrameBackend {
    /// Next presentable image, signaling the image-available semaphore.
    fn acquire(&mut self) -> Result<AcquireOutcome>;
    /// Submit the command buffer recorded for `image_index`.
    fn submit(&mut self, image_index: u32) -> Result<()>;
    fn present(&mut self, image_index: u32) -> Result<PresentOutcome>;
    /// Drain the GPU and rebuild every swapchain-dependent object.
    fn recreate(&mut self, extent: vk::Extent2D) -> Result<RecreateOutcome>;
    fn wait_idle(&mut self) -> Result<()>;
}

/// Windowing side of the loop.
pub trait WindowSignals {
    fn should_close(&self) -> bool;
    /// Edge-triggered: returns true once per resize.
    fn take_resized(&mut self) -> bool;
    fn framebuffer_extent(&self) -> vk::Extent2D;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateOutcome {
    Rebuilt,
    /// The surface has no area right now; try again later.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Submitting,
    Presenting,
    Recreating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Presented { image_index: u32, recreated: bool },
    Recreated,
    Deferred,
    Closed,
}

pub fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

#[derive(Debug)]
pub struct FrameLoop {
    state: FrameState,
    pending_recreate: bool,
    closed: bool,
    frames_presented: u64,
    trace: Vec<FrameState>,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            state: FrameState::Idle,
            pending_recreate: false,
            closed: false,
            frames_presented: 0,
            trace: Vec::with_capacity(5),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// States visited during the last step, starting from `Idle`.
    #[cfg(test)]
    pub fn trace(&self) -> &[FrameState] {
        &self.trace
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn enter(&mut self, state: FrameState) {
        self.state = state;
        self.trace.push(state);
    }

    /// Run one loop iteration.
    ///
    /// The close request is checked first; once seen the GPU is drained and
    /// every later call returns `Closed` without touching the backend.
    pub fn step<B, W>(&mut self, backend: &mut B, window: &mut W) -> Result<StepOutcome>
    where
        B: FrameBackend,
        W: WindowSignals,
    {
        self.trace.clear();
        self.trace.push(self.state);

        if self.closed {
            return Ok(StepOutcome::Closed);
        }

        if window.should_close() {
            log::info!("Close requested, waiting for the GPU to go idle");
            backend.wait_idle()?;
            self.closed = true;
            return Ok(StepOutcome::Closed);
        }

        if window.take_resized() {
            self.pending_recreate = true;
        }

        if self.pending_recreate {
            return self.recreate(backend, window);
        }

        self.enter(FrameState::Acquiring);
        let image_index = match backend.acquire() {
            Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }) => {
                if suboptimal {
                    log::warn!("Acquired image from a suboptimal swapchain");
                    self.pending_recreate = true;
                }
                image_index
            }
            Ok(AcquireOutcome::OutOfDate) => {
                log::debug!("Swapchain out of date on acquire, skipping frame");
                self.pending_recreate = true;
                return self.recreate(backend, window);
            }
            Err(e) => {
                self.enter(FrameState::Idle);
                return Err(e);
            }
        };

        self.enter(FrameState::Submitting);
        if let Err(e) = backend.submit(image_index) {
            self.enter(FrameState::Idle);
            return Err(e);
        }

        self.enter(FrameState::Presenting);
        let presented = match backend.present(image_index) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.enter(FrameState::Idle);
                return Err(e);
            }
        };
        self.frames_presented += 1;

        if presented.needs_recreate() {
            log::warn!("Present reported {:?}", presented);
            self.pending_recreate = true;
        }

        let mut recreated = false;
        if self.pending_recreate {
            recreated = self.recreate(backend, window)? == StepOutcome::Recreated;
        } else {
            self.enter(FrameState::Idle);
        }

        Ok(StepOutcome::Presented {
            image_index,
            recreated,
        })
    }

    fn recreate<B, W>(&mut self, backend: &mut B, window: &W) -> Result<StepOutcome>
    where
        B: FrameBackend,
        W: WindowSignals,
    {
        self.enter(FrameState::Recreating);

        let extent = window.framebuffer_extent();
        let outcome = if is_zero_extent(extent) {
            RecreateOutcome::Deferred
        } else {
            match backend.recreate(extent) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.enter(FrameState::Idle);
                    return Err(e);
                }
            }
        };

        self.enter(FrameState::Idle);
        match outcome {
            RecreateOutcome::Rebuilt => {
                self.pending_recreate = false;
                Ok(StepOutcome::Recreated)
            }
            RecreateOutcome::Deferred => {
                log::debug!(
                    "Recreation deferred at {}x{}",
                    extent.width,
                    extent.height
                );
                Ok(StepOutcome::Deferred)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::pipeline::PipelineDesc;
    use crate::backend::probe::{QueueFamilies, SwapchainSupport};
    use crate::backend::swapchain::SwapchainConfig;
    use crate::error::RenderError;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Acquire,
        Submit { image_index: u32, generation: u32 },
        Present(u32),
        Recreate(vk::Extent2D),
        WaitIdle,
    }

    /// Backend that derives swapchain/pipeline state the same way the real
    /// renderer does, and counts command buffer recordings.
    struct MockBackend {
        support: SwapchainSupport,
        families: QueueFamilies,
        swapchain: SwapchainConfig,
        pipeline: PipelineDesc,
        generation: u32,
        next_image: u32,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        fail_submit: bool,
        /// Images without a recorded command buffer.
        unrecorded: Vec<u32>,
        calls: Vec<Call>,
    }

    impl MockBackend {
        fn new(extent: vk::Extent2D) -> Self {
            let support = SwapchainSupport {
                capabilities: vk::SurfaceCapabilitiesKHR {
                    min_image_count: 2,
                    current_extent: vk::Extent2D {
                        width: u32::MAX,
                        height: u32::MAX,
                    },
                    min_image_extent: vk::Extent2D { width: 1, height: 1 },
                    max_image_extent: vk::Extent2D {
                        width: 4096,
                        height: 4096,
                    },
                    ..Default::default()
                },
                formats: vec![vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }],
                present_modes: vec![vk::PresentModeKHR::FIFO],
            };
            let families = QueueFamilies {
                graphics: 0,
                present: 0,
            };
            let swapchain = SwapchainConfig::derive(&support, extent, &families);
            let pipeline = PipelineDesc::from_swapchain(&swapchain);

            Self {
                support,
                families,
                swapchain,
                pipeline,
                generation: 1,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fail_submit: false,
                unrecorded: Vec::new(),
                calls: Vec::new(),
            }
        }
    }

    impl FrameBackend for MockBackend {
        fn acquire(&mut self) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire);
            if let Some(outcome) = self.acquire_script.pop_front() {
                return Ok(outcome);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.swapchain.image_count;
            Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal: false,
            })
        }

        fn submit(&mut self, image_index: u32) -> Result<()> {
            if self.fail_submit {
                return Err(RenderError::vulkan("queue submit")(
                    vk::Result::ERROR_DEVICE_LOST,
                ));
            }
            if self.unrecorded.contains(&image_index) {
                return Err(RenderError::MissingCommandBuffer { image_index });
            }
            self.calls.push(Call::Submit {
                image_index,
                generation: self.generation,
            });
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Optimal))
        }

        fn recreate(&mut self, extent: vk::Extent2D) -> Result<RecreateOutcome> {
            self.calls.push(Call::Recreate(extent));
            self.swapchain = SwapchainConfig::derive(&self.support, extent, &self.families);
            self.pipeline = PipelineDesc::from_swapchain(&self.swapchain);
            self.generation += 1;
            self.next_image = 0;
            Ok(RecreateOutcome::Rebuilt)
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }
    }

    struct MockWindow {
        close: bool,
        resized: bool,
        extent: vk::Extent2D,
    }

    impl MockWindow {
        fn new(width: u32, height: u32) -> Self {
            Self {
                close: false,
                resized: false,
                extent: vk::Extent2D { width, height },
            }
        }

        fn resize(&mut self, width: u32, height: u32) {
            self.resized = true;
            self.extent = vk::Extent2D { width, height };
        }
    }

    impl WindowSignals for MockWindow {
        fn should_close(&self) -> bool {
            self.close
        }

        fn take_resized(&mut self) -> bool {
            std::mem::take(&mut self.resized)
        }

        fn framebuffer_extent(&self) -> vk::Extent2D {
            self.extent
        }
    }

    fn setup() -> (FrameLoop, MockBackend, MockWindow) {
        let window = MockWindow::new(800, 600);
        let backend = MockBackend::new(window.extent);
        (FrameLoop::new(), backend, window)
    }

    #[test]
    fn frame_runs_acquire_submit_present_in_order() {
        let (mut frames, mut backend, mut window) = setup();

        let outcome = frames.step(&mut backend, &mut window).unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Presented {
                image_index: 0,
                recreated: false
            }
        );
        assert_eq!(
            backend.calls,
            vec![
                Call::Acquire,
                Call::Submit {
                    image_index: 0,
                    generation: 1
                },
                Call::Present(0),
            ]
        );
        assert_eq!(
            frames.trace(),
            &[
                FrameState::Idle,
                FrameState::Acquiring,
                FrameState::Submitting,
                FrameState::Presenting,
                FrameState::Idle,
            ]
        );
        assert_eq!(frames.state(), FrameState::Idle);
        assert_eq!(frames.frames_presented(), 1);
    }

    #[test]
    fn resize_while_idle_recreates_and_keeps_format() {
        let (mut frames, mut backend, mut window) = setup();
        frames.step(&mut backend, &mut window).unwrap();
        let before = backend.pipeline;

        window.resize(1280, 720);
        let outcome = frames.step(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, StepOutcome::Recreated);
        assert_eq!(
            frames.trace(),
            &[FrameState::Idle, FrameState::Recreating, FrameState::Idle]
        );
        assert_eq!(backend.pipeline.color_format, before.color_format);
        assert_eq!(
            backend.pipeline.extent,
            vk::Extent2D {
                width: 1280,
                height: 720
            }
        );
        assert_ne!(backend.pipeline.viewport().width, before.viewport().width);
        // Only the recreate was added by the second step; nothing was drawn
        assert_eq!(backend.calls.len(), 4);
        assert_eq!(
            backend.calls.last(),
            Some(&Call::Recreate(vk::Extent2D {
                width: 1280,
                height: 720
            }))
        );
    }

    #[test]
    fn out_of_date_acquire_skips_submission() {
        let (mut frames, mut backend, mut window) = setup();
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);

        let outcome = frames.step(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, StepOutcome::Recreated);
        assert_eq!(
            backend.calls,
            vec![
                Call::Acquire,
                Call::Recreate(vk::Extent2D {
                    width: 800,
                    height: 600
                })
            ]
        );
        assert_eq!(
            frames.trace(),
            &[
                FrameState::Idle,
                FrameState::Acquiring,
                FrameState::Recreating,
                FrameState::Idle,
            ]
        );
    }

    #[test]
    fn suboptimal_present_recreates_after_the_frame_is_shown() {
        let (mut frames, mut backend, mut window) = setup();
        backend.present_script.push_back(PresentOutcome::Suboptimal);

        let outcome = frames.step(&mut backend, &mut window).unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Presented {
                image_index: 0,
                recreated: true
            }
        );
        assert!(matches!(
            backend.calls.as_slice(),
            [
                Call::Acquire,
                Call::Submit { .. },
                Call::Present(0),
                Call::Recreate(_)
            ]
        ));
    }

    #[test]
    fn suboptimal_acquire_still_renders_then_recreates() {
        let (mut frames, mut backend, mut window) = setup();
        backend.acquire_script.push_back(AcquireOutcome::Ready {
            image_index: 1,
            suboptimal: true,
        });

        let outcome = frames.step(&mut backend, &mut window).unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Presented {
                image_index: 1,
                recreated: true
            }
        );
        assert!(matches!(backend.calls.last(), Some(Call::Recreate(_))));
    }

    #[test]
    fn minimized_window_defers_until_it_has_area() {
        let (mut frames, mut backend, mut window) = setup();
        window.resize(0, 0);

        for _ in 0..3 {
            assert_eq!(
                frames.step(&mut backend, &mut window).unwrap(),
                StepOutcome::Deferred
            );
        }
        assert!(backend.calls.is_empty());

        window.extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        assert_eq!(
            frames.step(&mut backend, &mut window).unwrap(),
            StepOutcome::Recreated
        );
        assert!(matches!(
            frames.step(&mut backend, &mut window).unwrap(),
            StepOutcome::Presented { .. }
        ));
    }

    #[test]
    fn close_drains_the_gpu_and_stops() {
        let (mut frames, mut backend, mut window) = setup();
        frames.step(&mut backend, &mut window).unwrap();
        window.close = true;

        assert_eq!(
            frames.step(&mut backend, &mut window).unwrap(),
            StepOutcome::Closed
        );
        assert_eq!(backend.calls.last(), Some(&Call::WaitIdle));
        assert!(frames.is_closed());

        let calls = backend.calls.len();
        assert_eq!(
            frames.step(&mut backend, &mut window).unwrap(),
            StepOutcome::Closed
        );
        assert_eq!(backend.calls.len(), calls);
    }

    #[test]
    fn recorded_commands_are_reused_until_recreation() {
        let (mut frames, mut backend, mut window) = setup();
        for _ in 0..6 {
            frames.step(&mut backend, &mut window).unwrap();
        }
        window.resize(1024, 768);
        frames.step(&mut backend, &mut window).unwrap();
        for _ in 0..3 {
            frames.step(&mut backend, &mut window).unwrap();
        }

        let generations: Vec<u32> = backend
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Submit { generation, .. } => Some(*generation),
                _ => None,
            })
            .collect();
        assert_eq!(generations, vec![1, 1, 1, 1, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn repeated_resizes_to_one_extent_match_a_single_resize() {
        let (mut frames, mut backend, mut window) = setup();
        for _ in 0..4 {
            window.resize(1024, 768);
            frames.step(&mut backend, &mut window).unwrap();
        }

        let (mut single_frames, mut single, mut single_window) = setup();
        single_window.resize(1024, 768);
        single_frames.step(&mut single, &mut single_window).unwrap();

        assert_eq!(backend.swapchain, single.swapchain);
        assert_eq!(backend.pipeline, single.pipeline);
    }

    #[test]
    fn backend_errors_propagate_and_leave_the_loop_idle() {
        let (mut frames, mut backend, mut window) = setup();
        backend.fail_submit = true;

        let err = frames.step(&mut backend, &mut window).unwrap_err();

        assert!(err.to_string().contains("queue submit"));
        assert_eq!(frames.state(), FrameState::Idle);
        assert!(!backend.calls.iter().any(|c| matches!(c, Call::Present(_))));
    }

    #[test]
    fn unrecorded_image_aborts_the_frame_before_present() {
        let (mut frames, mut backend, mut window) = setup();
        backend.unrecorded.push(0);

        let err = frames.step(&mut backend, &mut window).unwrap_err();

        assert!(matches!(
            err,
            RenderError::MissingCommandBuffer { image_index: 0 }
        ));
        assert_eq!(err.kind(), crate::error::ErrorKind::Runtime);
        assert_eq!(backend.calls, vec![Call::Acquire]);
        assert_eq!(frames.frames_presented(), 0);
    }
}
