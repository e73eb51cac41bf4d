//! prism demo - main entry point.
//!
//! Opens a window and drives the renderer every frame, or runs the headless
//! backend for a fixed number of frames.

mod scene;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use prism_core::{RenderApi, RendererConfig, Timer};
use prism_platform::Window;
use prism_renderer::{FrameBegin, PipelineCache, Renderer};
use prism_rhi::headless::{Headless, HeadlessConfig};
use prism_rhi::pipeline::ShaderProgram;
use prism_rhi::vulkan::Vulkan;
use prism_rhi::{Backend, DrawStatistics, GraphicsContext};

use crate::scene::{DemoScene, TRIANGLE_FRAG, TRIANGLE_VERT};

/// Number of triangles in the demo scene.
const SCENE_OBJECTS: u32 = 8;

#[derive(Parser, Debug)]
#[command(name = "prism", version, about = "Frame protocol demo for the prism renderer")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Render API (vulkan, opengl, headless); overrides the configuration
    #[arg(short, long)]
    backend: Option<RenderApi>,

    /// Disable vsync
    #[arg(long)]
    no_vsync: bool,

    /// Frames to render with the headless backend
    #[arg(long, default_value_t = 300)]
    frames: u64,

    /// Directory holding triangle.vert.spv and triangle.frag.spv
    #[arg(long, default_value = "shaders/spirv")]
    shaders: PathBuf,
}

impl Args {
    fn renderer_config(&self) -> Result<RendererConfig> {
        let mut config = match &self.config {
            Some(path) => RendererConfig::load(path)?,
            None => RendererConfig::default(),
        };
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if self.no_vsync {
            config.vsync = false;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Logs frame rate and draw calls once per second.
struct FrameReporter {
    statistics: Arc<DrawStatistics>,
    timer: Timer,
    frames_at_report: u64,
    draws_since_report: u64,
}

impl FrameReporter {
    fn new(statistics: Arc<DrawStatistics>) -> Self {
        Self {
            statistics,
            timer: Timer::new(),
            frames_at_report: 0,
            draws_since_report: 0,
        }
    }

    /// Called at every frame boundary.
    fn end_frame(&mut self) {
        self.draws_since_report += self.statistics.reset_draw_calls();

        if let Some(elapsed) = self.timer.report_due(Duration::from_secs(1)) {
            let frames = self.statistics.frames();
            let interval_frames = frames - self.frames_at_report;
            let fps = interval_frames as f64 / elapsed.as_secs_f64();
            let draws_per_frame = self.draws_since_report.checked_div(interval_frames).unwrap_or(0);
            info!("{:.1} fps, {} draw calls per frame", fps, draws_per_frame);
            self.frames_at_report = frames;
            self.draws_since_report = 0;
        }
    }
}

/// Renders one frame of the scene, if the renderer starts one.
fn render_frame<B: Backend>(
    renderer: &mut Renderer<B>,
    scene: Option<&DemoScene<B>>,
    device: &B::Device,
    time: f32,
) -> prism_rhi::RhiResult<()> {
    if let FrameBegin::Recording { .. } = renderer.begin()? {
        if let Some(scene) = scene {
            scene.record(device, renderer, time)?;
        }
        renderer.present()?;
    }
    Ok(())
}

fn load_spirv(dir: &Path) -> Result<ShaderProgram> {
    let vertex_path = dir.join("triangle.vert.spv");
    let fragment_path = dir.join("triangle.frag.spv");
    let vertex = std::fs::read(&vertex_path)
        .with_context(|| format!("Failed to read {}", vertex_path.display()))?;
    let fragment = std::fs::read(&fragment_path)
        .with_context(|| format!("Failed to read {}", fragment_path.display()))?;
    ShaderProgram::spirv_bytes("triangles", &vertex, &fragment)
        .context("SPIR-V size is not a multiple of four bytes")
}

fn run_headless(config: &RendererConfig, frames: u64) -> Result<()> {
    let context = GraphicsContext::<Headless>::new(HeadlessConfig::default())?;
    let mut renderer = Renderer::from_context(&context, config)?;
    let mut cache = PipelineCache::new();
    let target = renderer
        .render_target_layout()
        .context("Renderer has no image chain")?;
    let scene = DemoScene::new(
        context.device().as_ref(),
        &mut cache,
        target,
        ShaderProgram::glsl("triangles", TRIANGLE_VERT, TRIANGLE_FRAG),
        SCENE_OBJECTS,
        config.frames_in_flight,
    )?;

    let mut reporter = FrameReporter::new(Arc::clone(context.statistics()));
    let timer = Timer::new();
    for frame in 0..frames {
        let time = frame as f32 / 60.0;
        render_frame(&mut renderer, Some(&scene), context.device().as_ref(), time)?;
        reporter.end_frame();
    }

    info!(
        "Rendered {} frames in {:.2?} ({} image chain rebuilds)",
        context.statistics().frames(),
        timer.elapsed(),
        renderer.swapchain().rebuild_count()
    );
    Ok(())
}

/// Everything that lives as long as the window.
struct Session {
    // Fields drop in order: GPU objects before the renderer and context.
    scene: Option<DemoScene<Vulkan>>,
    cache: PipelineCache<Vulkan>,
    renderer: Renderer<Vulkan>,
    context: GraphicsContext<Vulkan>,
    reporter: FrameReporter,
    window: Window,
}

impl Session {
    fn new(event_loop: &ActiveEventLoop, config: &RendererConfig, shaders: &Path) -> Result<Self> {
        let window = Window::new(event_loop, config.width, config.height, "prism")?;
        let (display, raw_window) = window.raw_handles()?;
        let context = GraphicsContext::<Vulkan>::new(config.validation, display, raw_window)?;

        let (width, height) = window.framebuffer_size();
        let config = RendererConfig {
            width,
            height,
            ..config.clone()
        };
        let renderer = Renderer::from_context(&context, &config)?;

        let mut session = Self {
            scene: None,
            cache: PipelineCache::new(),
            reporter: FrameReporter::new(Arc::clone(context.statistics())),
            renderer,
            context,
            window,
        };
        match load_spirv(shaders) {
            Ok(shader) => session.build_scene(shader)?,
            Err(e) => warn!("Running without a scene: {:#}", e),
        }
        Ok(session)
    }

    fn build_scene(&mut self, shader: ShaderProgram) -> Result<()> {
        let target = self
            .renderer
            .render_target_layout()
            .context("Renderer has no image chain")?;
        self.scene = Some(DemoScene::new(
            self.context.device().as_ref(),
            &mut self.cache,
            target,
            shader,
            SCENE_OBJECTS,
            self.renderer.swapchain().frames_in_flight(),
        )?);
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        let time = self.reporter.timer.elapsed().as_secs_f32();
        render_frame(
            &mut self.renderer,
            self.scene.as_ref(),
            self.context.device().as_ref(),
            time,
        )?;
        self.reporter.end_frame();

        // A rebuild may have picked a different surface format.
        if let Some(target) = self.renderer.render_target_layout()
            && let Some(scene) = &self.scene
            && scene.target() != &target
        {
            info!("Render target changed; rebuilding scene pipeline");
            self.renderer.swapchain().wait_idle()?;
            let shader = scene.shader().clone();
            self.scene = None;
            self.cache.invalidate_target(&target);
            self.build_scene(shader)?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.renderer.swapchain().wait_idle() {
            error!("Failed to wait for device idle during shutdown: {}", e);
        }
    }
}

struct App {
    config: RendererConfig,
    shaders: PathBuf,
    session: Option<Session>,
    error: Option<anyhow::Error>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        self.error = Some(err);
        self.session = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() {
            return;
        }
        match Session::new(event_loop, &self.config, &self.shaders) {
            Ok(session) => {
                info!("Initialization complete, entering main loop");
                self.session = Some(session);
            }
            Err(e) => self.fail(event_loop, e.context("Failed to initialize")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let result = match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.session = None;
                event_loop.exit();
                return;
            }
            WindowEvent::Resized(size) => session
                .renderer
                .on_resize(size.width, size.height)
                .map_err(anyhow::Error::from),
            WindowEvent::RedrawRequested => session.frame(),
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.fail(event_loop, e);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(session) = &self.session {
            session.window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    prism_core::init_logging();

    let args = Args::parse();
    let config = args.renderer_config()?;
    info!("Starting prism ({} backend)", config.backend);

    match config.backend {
        RenderApi::Headless => run_headless(&config, args.frames),
        RenderApi::Vulkan => {
            let event_loop = EventLoop::new()?;
            event_loop.set_control_flow(ControlFlow::Poll);

            let mut app = App {
                config,
                shaders: args.shaders,
                session: None,
                error: None,
            };
            event_loop.run_app(&mut app)?;
            match app.error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
        RenderApi::OpenGl => bail!(
            "the OpenGL backend renders into a GL context owned by the host application; \
             this demo does not create one"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from(["prism", "--backend", "headless", "--no-vsync"]);
        let config = args.renderer_config().unwrap();
        assert_eq!(config.backend, RenderApi::Headless);
        assert!(!config.vsync);
        assert_eq!(args.frames, 300);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Args::try_parse_from(["prism", "--backend", "metal"]).is_err());
    }

    #[test]
    fn test_headless_run() {
        let config = RendererConfig {
            backend: RenderApi::Headless,
            width: 200,
            height: 100,
            ..RendererConfig::default()
        };
        run_headless(&config, 10).unwrap();
    }
}
