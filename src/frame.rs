use std::fmt;

use crate::accum::{AccumulationController, AccumulationFrame};
use crate::camera::CameraParams;
use crate::config::{SceneConfig, COARSE_FACTOR};
use crate::error::Result;
use crate::grid::UniformGrid;
use crate::scene::{generate_spheres, SpawnArea, Sphere};

/// Completion token for one frame slot's GPU work. Waiting on it is the
/// only way the control thread learns that work has retired.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FenceToken<F> {
    fence: F,
    slot: usize,
}

impl<F: Copy> FenceToken<F> {
    pub fn new(fence: F, slot: usize) -> Self {
        Self { fence, slot }
    }

    pub fn fence(&self) -> F {
        self.fence
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AcquireOutcome {
    Acquired { image: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FramePhase {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presented,
    Recreating,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TickOutcome {
    Presented { slot: usize, image: u32 },
    /// The surface went stale; the swapchain is rebuilt on the next tick.
    Stale,
    Recreated { width: u32, height: u32 },
    /// Zero-area framebuffer or surface; nothing was torn down.
    Deferred,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RecreateOutcome {
    Recreated,
    /// The surface reports a zero-area extent (minimized); the old swapchain
    /// is left alone.
    SurfaceUnavailable,
}

/// Everything one frame's command recording reads.
pub struct FrameInputs<'a> {
    pub frame: u32,
    pub camera: &'a CameraParams,
    pub accumulation: AccumulationFrame,
    pub show_grid: bool,
    pub scene: &'a SceneData,
    /// The scene changed since the last frame and must be uploaded first.
    pub upload_scene: bool,
}

/// GPU-side operations the pipeline sequences. Implemented over Vulkan by
/// `vk::VulkanBackend`; tests drive a fake.
pub trait FrameBackend {
    type Fence: Copy + Eq + fmt::Debug;

    fn frames_in_flight(&self) -> usize;
    fn image_count(&self) -> usize;
    fn slot_fence(&self, slot: usize) -> FenceToken<Self::Fence>;

    /// Blocks until the token's work has retired. Resources parked on the
    /// token's slot may be released afterwards.
    fn wait_fence(&mut self, token: FenceToken<Self::Fence>) -> Result<()>;
    fn reset_fence(&mut self, token: FenceToken<Self::Fence>) -> Result<()>;

    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome>;
    fn record(&mut self, slot: usize, image: u32, inputs: &FrameInputs<'_>) -> Result<()>;
    fn submit(&mut self, slot: usize, image: u32) -> Result<FenceToken<Self::Fence>>;
    fn present(&mut self, slot: usize, image: u32) -> Result<PresentOutcome>;

    fn wait_idle(&mut self) -> Result<()>;
    /// Tears down and rebuilds every swapchain-sized resource, unless the
    /// surface itself has no area yet.
    fn recreate(&mut self, width: u32, height: u32) -> Result<RecreateOutcome>;
}

/// One generation of placed spheres and the grid over them.
#[derive(Clone, Debug)]
pub struct SceneData {
    pub area: SpawnArea,
    pub spheres: Vec<Sphere>,
    pub grid: UniformGrid,
    pub requested: u32,
}

impl SceneData {
    pub fn generate(cfg: &SceneConfig, area: SpawnArea) -> Self {
        let placement = generate_spheres(cfg, &area);
        let grid = UniformGrid::build(&placement.spheres, &area, COARSE_FACTOR);
        log::info!(
            "Scene: {}/{} spheres in {} attempts, grid {}x{}x{} ({} refs, coarse {}x{}x{})",
            placement.spheres.len(),
            placement.requested,
            placement.attempts,
            grid.dims.x,
            grid.dims.y,
            grid.dims.z,
            grid.reference_count(),
            grid.coarse_dims.x,
            grid.coarse_dims.y,
            grid.coarse_dims.z,
        );
        SceneData {
            area,
            spheres: placement.spheres,
            grid,
            requested: placement.requested,
        }
    }

    pub fn sphere_count(&self) -> u32 {
        self.spheres.len() as u32
    }
}

/// CPU-side renderer state, owned by the pipeline and lent to each stage.
pub struct RendererState {
    pub scene_config: SceneConfig,
    pub area: SpawnArea,
    pub show_grid: bool,
    pub scene: Option<SceneData>,
    pub accumulation: AccumulationController,
    pub extent: (u32, u32),
    pub frame: u32,
    scene_pending: bool,
}

impl RendererState {
    pub fn new(scene_config: SceneConfig, show_grid: bool, extent: (u32, u32)) -> Self {
        RendererState {
            scene_config,
            area: SpawnArea::compute(&scene_config),
            show_grid,
            scene: None,
            accumulation: AccumulationController::new(),
            extent,
            frame: 0,
            scene_pending: true,
        }
    }

    pub fn scene_pending(&self) -> bool {
        self.scene_pending
    }
}

/// Drives one tick at a time over N frame slots. Recording for frame
/// `k + N` never starts before frame `k`'s fence has signalled.
pub struct FramePipeline<B: FrameBackend> {
    backend: B,
    state: RendererState,
    phase: FramePhase,
    frame_index: u64,
    images_in_flight: Vec<Option<FenceToken<B::Fence>>>,
    resize_pending: bool,
}

impl<B: FrameBackend> FramePipeline<B> {
    pub fn new(backend: B, state: RendererState) -> Self {
        let images_in_flight = vec![None; backend.image_count()];
        FramePipeline {
            backend,
            state,
            phase: FramePhase::Idle,
            frame_index: 0,
            images_in_flight,
            resize_pending: false,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn state(&self) -> &RendererState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RendererState {
        &mut self.state
    }

    #[cfg(test)]
    fn backend(&self) -> &B {
        &self.backend
    }

    #[cfg(test)]
    fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
    }

    /// Recomputes the spawn area and schedules a regeneration for the next
    /// recorded frame.
    pub fn request_scene_generation(&mut self, cfg: SceneConfig) {
        self.state.scene_config = cfg;
        self.state.area = SpawnArea::compute(&cfg);
        self.state.scene_pending = true;
        self.state.accumulation.request_reset();
    }

    pub fn tick(&mut self, framebuffer: (u32, u32), camera: &CameraParams) -> Result<TickOutcome> {
        if framebuffer != self.state.extent {
            self.resize_pending = true;
        }
        if self.resize_pending || self.phase == FramePhase::Recreating {
            return self.recreate(framebuffer);
        }

        self.phase = FramePhase::Idle;
        let slot = (self.frame_index % self.backend.frames_in_flight() as u64) as usize;
        let slot_fence = self.backend.slot_fence(slot);
        self.backend.wait_fence(slot_fence)?;

        self.phase = FramePhase::Acquiring;
        let (image, acquire_suboptimal) = match self.backend.acquire(slot)? {
            AcquireOutcome::Acquired { image, suboptimal } => (image, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::info!("Swapchain out of date on acquire");
                self.phase = FramePhase::Recreating;
                return Ok(TickOutcome::Stale);
            }
        };
        assert!(
            (image as usize) < self.images_in_flight.len(),
            "swapchain image {image} out of range"
        );

        if let Some(previous) = self.images_in_flight[image as usize] {
            if previous != slot_fence {
                self.backend.wait_fence(previous)?;
            }
        }
        self.backend.reset_fence(slot_fence)?;

        self.phase = FramePhase::Recording;
        let upload_scene =
            std::mem::take(&mut self.state.scene_pending) || self.state.scene.is_none();
        if upload_scene {
            self.state.scene = None;
        }
        let (scene_config, area) = (self.state.scene_config, self.state.area);
        let scene = self
            .state
            .scene
            .get_or_insert_with(|| SceneData::generate(&scene_config, area));
        let accumulation = self.state.accumulation.begin_frame();
        let inputs = FrameInputs {
            frame: self.state.frame,
            camera,
            accumulation,
            show_grid: self.state.show_grid,
            scene,
            upload_scene,
        };
        self.backend.record(slot, image, &inputs)?;

        let token = self.backend.submit(slot, image)?;
        self.images_in_flight[image as usize] = Some(token);
        self.phase = FramePhase::Submitted;

        let presented = self.backend.present(slot, image)?;
        self.phase = FramePhase::Presented;
        self.frame_index += 1;
        self.state.frame = self.state.frame.wrapping_add(1);

        if acquire_suboptimal || presented != PresentOutcome::Presented {
            log::info!("Swapchain stale after present ({presented:?})");
            self.phase = FramePhase::Recreating;
            return Ok(TickOutcome::Stale);
        }
        Ok(TickOutcome::Presented { slot, image })
    }

    fn recreate(&mut self, framebuffer: (u32, u32)) -> Result<TickOutcome> {
        self.phase = FramePhase::Recreating;
        let (width, height) = framebuffer;
        if width == 0 || height == 0 {
            return Ok(TickOutcome::Deferred);
        }

        self.backend.wait_idle()?;
        if self.backend.recreate(width, height)? == RecreateOutcome::SurfaceUnavailable {
            log::debug!("Surface has no area yet, deferring swapchain recreation");
            return Ok(TickOutcome::Deferred);
        }
        self.images_in_flight = vec![None; self.backend.image_count()];
        self.state.extent = framebuffer;
        self.state.accumulation.request_reset();
        self.resize_pending = false;
        self.phase = FramePhase::Idle;
        log::info!("Swapchain recreated at {width}x{height}");
        Ok(TickOutcome::Recreated { width, height })
    }

    /// Lets in-flight work drain; call before tearing the backend down.
    pub fn shutdown(mut self) -> Result<B> {
        self.backend.wait_idle()?;
        Ok(self.backend)
    }
}
