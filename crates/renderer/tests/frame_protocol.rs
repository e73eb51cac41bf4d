//! Integration tests for the frame protocol on the headless backend.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use prism_core::{RendererConfig, SubOptimalPolicy};
use prism_renderer::{FrameBegin, Renderer, SwapchainState};
use prism_rhi::buffer::{BufferDesc, BufferUsage};
use prism_rhi::descriptor::DescriptorWrite;
use prism_rhi::headless::{
    Completion, Headless, HeadlessConfig, HeadlessDevice, Injected, RecordedCommand,
};
use prism_rhi::pipeline::{
    DescriptorBinding, DescriptorKind, DescriptorSetLayoutDesc, PipelineDesc, ShaderProgram,
    ShaderVisibility,
};
use prism_rhi::types::{Extent2D, IndexType, PrimitiveType};
use prism_rhi::{DrawStatistics, GraphicsContext, GraphicsDevice, RhiError};

fn config() -> RendererConfig {
    RendererConfig {
        backend: prism_core::RenderApi::Headless,
        width: 800,
        height: 600,
        frames_in_flight: 2,
        acquire_timeout_ms: 100,
        fence_timeout_ms: Some(2000),
        ..RendererConfig::default()
    }
}

fn renderer_with(
    headless: HeadlessConfig,
    config: &RendererConfig,
) -> (Renderer<Headless>, Arc<HeadlessDevice>) {
    let device = Arc::new(HeadlessDevice::new(headless));
    let renderer = Renderer::new(Arc::clone(&device), Arc::new(DrawStatistics::new()), config)
        .expect("Failed to create renderer");
    (renderer, device)
}

fn renderer() -> (Renderer<Headless>, Arc<HeadlessDevice>) {
    renderer_with(HeadlessConfig::default(), &config())
}

fn render_empty_frame(renderer: &mut Renderer<Headless>) {
    let begin = renderer.begin().expect("begin failed");
    assert!(begin.is_recording(), "frame skipped: {:?}", begin);
    renderer.present().expect("present failed");
}

#[test]
fn test_context_driven_frames() {
    let context = GraphicsContext::<Headless>::new(HeadlessConfig::default())
        .expect("Failed to create headless context");
    let mut renderer =
        Renderer::from_context(&context, &config()).expect("Failed to create renderer");

    for _ in 0..5 {
        render_empty_frame(&mut renderer);
    }

    assert_eq!(context.statistics().frames(), 5);
    assert_eq!(context.device().controller().presents().len(), 5);
    assert_eq!(renderer.swapchain().frame_number(), 5);
}

#[test]
fn test_empty_frame_leaves_swapchain_ready() {
    let (mut renderer, device) = renderer();
    render_empty_frame(&mut renderer);

    assert_eq!(renderer.swapchain().state(), SwapchainState::Ready);
    assert_eq!(renderer.statistics().draw_calls(), 0);

    let submissions = device.controller().submissions();
    assert_eq!(submissions.len(), 1);
    assert!(submissions[0].waited_on_semaphore);
    assert!(submissions[0].signaled_semaphore);
    assert!(matches!(
        submissions[0].commands.first(),
        Some(RecordedCommand::BeginRenderTarget { .. })
    ));
    assert!(matches!(
        submissions[0].commands.last(),
        Some(RecordedCommand::TransitionToPresent { .. })
    ));
}

#[test]
fn test_viewport_covers_image() {
    let (mut renderer, device) = renderer();
    render_empty_frame(&mut renderer);

    let commands = device.controller().submitted_commands();
    assert!(commands.contains(&RecordedCommand::SetViewport(Extent2D::new(800, 600))));
    assert!(commands.contains(&RecordedCommand::SetScissor(Extent2D::new(800, 600))));
}

#[test]
fn test_cpu_blocks_when_ring_is_full() {
    let device = Arc::new(HeadlessDevice::new(
        HeadlessConfig::default().with_completion(Completion::Manual),
    ));
    let controller = device.controller();
    let config = RendererConfig {
        fence_timeout_ms: None,
        ..config()
    };

    let (tx, rx) = mpsc::channel();
    let worker_device = Arc::clone(&device);
    let worker = thread::spawn(move || {
        let mut renderer = Renderer::<Headless>::new(
            worker_device,
            Arc::new(DrawStatistics::new()),
            &config,
        )
        .expect("Failed to create renderer");
        for frame in 0..3 {
            render_empty_frame(&mut renderer);
            tx.send(frame).expect("receiver dropped");
        }
    });

    // Two slots: the first two frames go through without GPU progress.
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(0));
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(1));

    // The third frame reuses slot 0 and must wait for its fence.
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(controller.pending_submissions(), 2);

    assert!(controller.complete_next());
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(2));

    worker.join().expect("render thread panicked");
}

#[test]
fn test_fence_timeout_is_fatal() {
    let config = RendererConfig {
        fence_timeout_ms: Some(20),
        ..config()
    };
    let (mut renderer, device) = renderer_with(
        HeadlessConfig::default().with_completion(Completion::Manual),
        &config,
    );

    render_empty_frame(&mut renderer);
    render_empty_frame(&mut renderer);

    let err = renderer.begin().unwrap_err();
    assert!(matches!(err, RhiError::Timeout("frame fence")));
    assert!(err.is_fatal());
    assert!(!renderer.is_recording());

    device.controller().complete_all();
    render_empty_frame(&mut renderer);
}

#[test]
fn test_resize_is_clamped_to_surface() {
    let headless = HeadlessConfig::default()
        .with_extent_range(Extent2D::new(64, 64), Extent2D::new(4096, 2160));
    let (mut renderer, device) = renderer_with(headless, &config());
    let controller = device.controller();

    renderer.on_resize(0, 1080).unwrap();
    assert_eq!(controller.chain_creations().len(), 1);

    renderer.on_resize(10000, 10000).unwrap();
    assert_eq!(
        renderer.swapchain().extent(),
        Some(Extent2D::new(4096, 2160))
    );

    renderer.on_resize(800, 600).unwrap();
    assert_eq!(renderer.swapchain().extent(), Some(Extent2D::new(800, 600)));

    renderer.on_resize(16, 16).unwrap();
    assert_eq!(renderer.swapchain().extent(), Some(Extent2D::new(64, 64)));

    render_empty_frame(&mut renderer);
    assert_eq!(
        controller.presents().last().map(|p| p.extent),
        Some(Extent2D::new(64, 64))
    );
}

#[test]
fn test_zero_size_resize_is_idempotent() {
    let (mut renderer, device) = renderer();
    let controller = device.controller();

    for _ in 0..3 {
        renderer.on_resize(0, 0).unwrap();
        renderer.on_resize(1024, 0).unwrap();
    }

    assert_eq!(renderer.swapchain().state(), SwapchainState::Ready);
    assert_eq!(renderer.swapchain().rebuild_count(), 0);
    assert_eq!(controller.chain_creations().len(), 1);
    assert_eq!(controller.wait_idle_calls(), 0);
    render_empty_frame(&mut renderer);
}

#[test]
fn test_resize_rebuilds_once_per_extent() {
    let (mut renderer, device) = renderer();

    renderer.on_resize(1280, 720).unwrap();
    renderer.on_resize(1280, 720).unwrap();
    assert_eq!(renderer.swapchain().rebuild_count(), 1);
    assert_eq!(
        device.controller().chain_creations(),
        vec![Extent2D::new(800, 600), Extent2D::new(1280, 720)]
    );
}

#[test]
fn test_resize_while_recording_abandons_frame() {
    let (mut renderer, device) = renderer();
    assert!(renderer.begin().unwrap().is_recording());

    renderer.on_resize(1024, 768).unwrap();
    assert!(!renderer.is_recording());
    assert_eq!(renderer.swapchain().acquired_image(), None);
    assert!(device.controller().submissions().is_empty());

    render_empty_frame(&mut renderer);
    assert_eq!(
        device.controller().presents()[0].extent,
        Extent2D::new(1024, 768)
    );
}

#[test]
fn test_out_of_date_acquire_recovers() {
    let (mut renderer, device) = renderer();
    device.controller().inject_acquire(Injected::OutOfDate);

    let begin = renderer.begin().unwrap();
    assert!(begin.is_recording());
    assert_eq!(renderer.swapchain().rebuild_count(), 1);
    renderer.present().unwrap();
}

#[test]
fn test_persistently_stale_chain_skips_frame() {
    let (mut renderer, device) = renderer();
    let controller = device.controller();
    controller.inject_acquire(Injected::OutOfDate);
    controller.inject_acquire(Injected::OutOfDate);

    assert_eq!(renderer.begin().unwrap(), FrameBegin::Skipped);
    assert!(!renderer.is_recording());
    assert_eq!(renderer.swapchain().state(), SwapchainState::Invalid);

    render_empty_frame(&mut renderer);
    assert_eq!(renderer.swapchain().state(), SwapchainState::Ready);
}

#[test]
fn test_surface_change_is_picked_up() {
    let (mut renderer, device) = renderer();
    render_empty_frame(&mut renderer);

    let controller = device.controller();
    let mut capabilities = device.surface_support().unwrap().capabilities;
    capabilities.current_extent = Some(Extent2D::new(1920, 1080));
    controller.set_surface_capabilities(capabilities);

    render_empty_frame(&mut renderer);
    assert_eq!(
        renderer.swapchain().extent(),
        Some(Extent2D::new(1920, 1080))
    );
    assert_eq!(
        controller.presents().last().map(|p| p.extent),
        Some(Extent2D::new(1920, 1080))
    );
}

#[test]
fn test_minimized_surface_skips_frames() {
    let (mut renderer, device) = renderer();
    let controller = device.controller();
    let mut capabilities = device.surface_support().unwrap().capabilities;
    capabilities.current_extent = Some(Extent2D::new(0, 0));
    controller.set_surface_capabilities(capabilities);

    for _ in 0..3 {
        assert_eq!(renderer.begin().unwrap(), FrameBegin::Skipped);
    }
    assert!(controller.submissions().is_empty());

    capabilities.current_extent = Some(Extent2D::new(640, 480));
    controller.set_surface_capabilities(capabilities);
    render_empty_frame(&mut renderer);
    assert_eq!(renderer.swapchain().extent(), Some(Extent2D::new(640, 480)));
}

#[test]
fn test_stale_present_rebuilds() {
    for injected in [Injected::OutOfDate, Injected::SubOptimal] {
        let (mut renderer, device) = renderer();
        device.controller().inject_present(injected);

        render_empty_frame(&mut renderer);
        assert_eq!(renderer.swapchain().state(), SwapchainState::Ready);
        assert_eq!(renderer.swapchain().rebuild_count(), 1, "{:?}", injected);

        render_empty_frame(&mut renderer);
    }
}

#[test]
fn test_suboptimal_policies() {
    let immediately = RendererConfig {
        suboptimal_policy: SubOptimalPolicy::RebuildImmediately,
        ..config()
    };
    let (mut eager, device) = renderer_with(HeadlessConfig::default(), &immediately);
    device.controller().inject_acquire(Injected::SubOptimal);
    render_empty_frame(&mut eager);
    assert_eq!(eager.swapchain().rebuild_count(), 1);
    assert_eq!(device.controller().acquisitions(), 2);

    let (mut deferred, device) = renderer();
    device.controller().inject_acquire(Injected::SubOptimal);
    render_empty_frame(&mut deferred);
    assert_eq!(deferred.swapchain().rebuild_count(), 1);
    assert_eq!(device.controller().acquisitions(), 1);
}

#[test]
fn test_device_lost_is_reported() {
    let (mut renderer, device) = renderer();
    render_empty_frame(&mut renderer);

    device.controller().lose_device();
    let err = renderer.begin().unwrap_err();
    assert!(matches!(err, RhiError::DeviceLost));
    assert!(err.is_fatal());
    assert!(!renderer.is_recording());
}

#[test]
fn test_device_lost_during_acquire() {
    let (mut renderer, device) = renderer();
    device.controller().inject_acquire(Injected::DeviceLost);
    assert!(matches!(renderer.begin(), Err(RhiError::DeviceLost)));
}

#[test]
fn test_acquire_timeout_is_reported() {
    let (mut renderer, device) = renderer();
    device.controller().inject_acquire(Injected::Timeout);
    let err = renderer.begin().unwrap_err();
    assert!(matches!(err, RhiError::Timeout(_)));
    assert!(!renderer.is_recording());

    render_empty_frame(&mut renderer);
}

#[test]
fn test_device_lost_during_present() {
    let (mut renderer, device) = renderer();
    assert!(renderer.begin().unwrap().is_recording());
    device.controller().inject_present(Injected::DeviceLost);

    assert!(matches!(renderer.present(), Err(RhiError::DeviceLost)));
    assert!(!renderer.is_recording());
}

#[test]
fn test_draw_counter() {
    let (mut renderer, device) = renderer();
    let index_buffer = device
        .create_buffer(&BufferDesc::new(BufferUsage::Index, 64))
        .unwrap();

    for _ in 0..3 {
        assert!(renderer.begin().unwrap().is_recording());
        renderer.draw(PrimitiveType::Triangles, 3, 0);
        renderer.draw(PrimitiveType::Lines, 2, 3);
        renderer.bind_index_buffer(&index_buffer, 0, IndexType::U16);
        renderer.draw_indexed(PrimitiveType::Triangles, 6, 0);
        renderer.present().unwrap();
    }

    let statistics = renderer.statistics();
    assert_eq!(statistics.draw_calls(), 9);
    assert_eq!(statistics.frames(), 3);
    assert_eq!(statistics.reset_draw_calls(), 9);
    assert_eq!(statistics.draw_calls(), 0);

    let draws = device
        .controller()
        .submitted_commands()
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }
            )
        })
        .count();
    assert_eq!(draws, 9);
}

#[test]
fn test_bind_descriptor_sets_is_one_call() {
    let (mut renderer, device) = renderer();
    let layout = |kind| {
        DescriptorSetLayoutDesc::new(vec![DescriptorBinding::new(
            0,
            kind,
            ShaderVisibility::Vertex,
        )])
    };
    let desc = PipelineDesc::new(
        "sets",
        ShaderProgram::glsl("sets", "vs", "fs"),
        renderer.render_target_layout().unwrap(),
    )
    .with_descriptor_layout(layout(DescriptorKind::DynamicUniformBuffer))
    .with_descriptor_layout(layout(DescriptorKind::UniformBuffer))
    .with_descriptor_layout(layout(DescriptorKind::DynamicUniformBuffer));
    let pipeline = device.create_pipeline(&desc).unwrap();

    let uniforms = device
        .create_buffer(&BufferDesc::new(BufferUsage::Uniform, 1024))
        .unwrap();
    let sets: Vec<_> = (0..3)
        .map(|index| {
            device
                .create_descriptor_set(
                    &pipeline,
                    index,
                    &[DescriptorWrite::Buffer {
                        binding: 0,
                        buffer: &uniforms,
                        offset: 0,
                        range: 256,
                    }],
                )
                .unwrap()
        })
        .collect();
    let set_refs: Vec<_> = sets.iter().collect();

    assert!(renderer.begin().unwrap().is_recording());
    renderer.set_pipeline(&pipeline);
    let summary = renderer.bind_descriptor_sets(&pipeline, 512, &set_refs);
    renderer.draw(PrimitiveType::Triangles, 3, 0);
    renderer.present().unwrap();

    assert_eq!(summary.sets, 3);
    assert_eq!(summary.dynamic_sets, 2);

    let binds: Vec<_> = device
        .controller()
        .submitted_commands()
        .into_iter()
        .filter_map(|c| match c {
            RecordedCommand::BindDescriptorSets {
                first_set,
                sets,
                dynamic_offsets,
            } => Some((first_set, sets, dynamic_offsets)),
            _ => None,
        })
        .collect();
    assert_eq!(binds.len(), 1);
    let (first_set, raw_sets, offsets) = &binds[0];
    assert_eq!(*first_set, 0);
    assert_eq!(raw_sets.len(), 3);
    assert_eq!(offsets, &vec![512, 512]);
}
