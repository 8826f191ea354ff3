// Device-free checks of the frame pipeline's decision logic: swapchain
// parameter selection, slot-ring arithmetic, pool budgeting, error routing.

use ash::vk;
use std::time::Duration;
use vkframe::descriptor::PoolBudget;
use vkframe::swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
};
use vkframe::sync::FrameCounter;
use vkframe::{Config, FixedTimestep, FrameError};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn triple_buffering_scenario() {
    init_logging();

    // A surface reporting minImageCount=2, maxImageCount=0 (unbounded)
    // yields a request for 3 swapchain images.
    assert_eq!(choose_image_count(2, 0), 3);

    // With 3 frame slots the ring is 0,1,2,0,... regardless of how many
    // images the chain actually has.
    let mut counter = FrameCounter::new(3);
    assert_eq!(counter.current(), 0);
    counter.advance();
    // Second iteration uses slot 1 - its own (pre-signaled) fence, not
    // slot 0's still-pending one.
    assert_eq!(counter.current(), 1);
}

#[test]
fn image_count_respects_surface_maximum() {
    assert_eq!(choose_image_count(2, 2), 2);
    assert_eq!(choose_image_count(3, 0), 4);
    assert_eq!(choose_image_count(1, 8), 2);
}

#[test]
fn fixed_extent_is_used_verbatim() {
    let caps = vk::SurfaceCapabilitiesKHR {
        current_extent: vk::Extent2D {
            width: 1920,
            height: 1080,
        },
        ..Default::default()
    };
    assert_eq!(choose_extent(&caps, 640, 480), caps.current_extent);
    // Idempotent: asking again changes nothing
    assert_eq!(choose_extent(&caps, 640, 480), choose_extent(&caps, 640, 480));
}

#[test]
fn adaptive_extent_clamps_to_surface_limits() {
    let caps = vk::SurfaceCapabilitiesKHR {
        current_extent: vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        },
        min_image_extent: vk::Extent2D {
            width: 320,
            height: 240,
        },
        max_image_extent: vk::Extent2D {
            width: 1920,
            height: 1080,
        },
        ..Default::default()
    };
    let chosen = choose_extent(&caps, 4000, 100);
    assert_eq!(chosen.width, 1920);
    assert_eq!(chosen.height, 240);
}

#[test]
fn format_selection_never_fails_on_non_empty_input() {
    let desired = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    let lists: Vec<Vec<vk::SurfaceFormatKHR>> = vec![
        vec![desired],
        vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }],
        vec![vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }],
    ];
    for list in &lists {
        let chosen = choose_surface_format(list, desired);
        assert!(list.contains(&chosen));
    }
}

#[test]
fn present_mode_always_resolves() {
    // FIFO is guaranteed by the API; anything unsupported degrades to it
    let only_fifo = [vk::PresentModeKHR::FIFO];
    assert_eq!(
        choose_present_mode(&only_fifo, vk::PresentModeKHR::IMMEDIATE),
        vk::PresentModeKHR::FIFO
    );
    let with_mailbox = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
    assert_eq!(
        choose_present_mode(&with_mailbox, vk::PresentModeKHR::MAILBOX),
        vk::PresentModeKHR::MAILBOX
    );
}

#[test]
fn slot_ring_matches_iteration_index() {
    for n in 1..=4usize {
        let mut counter = FrameCounter::new(n);
        for i in 0..50 {
            assert_eq!(counter.current(), i % n, "n={}, i={}", n, i);
            counter.advance();
        }
    }
}

#[test]
fn pool_budget_exhaustion_is_distinct_and_non_corrupting() {
    let mut budget = PoolBudget::new(8);
    budget.try_reserve(8).unwrap();

    let err = budget.try_reserve(1).unwrap_err();
    assert!(matches!(err, FrameError::PoolExhausted));
    // Earlier reservations survive a failed one
    assert_eq!(budget.remaining(), 0);
}

#[test]
fn driver_staleness_codes_route_to_recreation() {
    assert!(FrameError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).is_swapchain_stale());
    assert!(FrameError::from(vk::Result::SUBOPTIMAL_KHR).is_swapchain_stale());
    assert!(!FrameError::from(vk::Result::ERROR_DEVICE_LOST).is_swapchain_stale());
}

#[test]
fn config_round_trip_from_toml() {
    init_logging();
    let config: Config = toml::from_str(
        r#"
        [graphics]
        present_mode = "fifo_relaxed"
        clear_color = [0.0, 0.0, 0.0, 1.0]
        max_frames_in_flight = 3

        [upload]
        timeout_ms = 250
        "#,
    )
    .unwrap();

    assert_eq!(config.graphics.max_frames_in_flight, 3);
    assert_eq!(
        config.desired_present_mode(),
        vk::PresentModeKHR::FIFO_RELAXED
    );
    assert_eq!(config.upload_timeout_ns(), 250_000_000);
}

#[test]
fn timestep_decouples_updates_from_render_rate() {
    let mut ts = FixedTimestep::new(Duration::from_millis(20), 4);
    // Fast renderer: many frames, few ticks
    let total: u32 = (0..10).map(|_| ts.advance(Duration::from_millis(5))).sum();
    assert_eq!(total, 2);
    // Slow renderer: one frame, several ticks
    let mut slow = FixedTimestep::new(Duration::from_millis(20), 4);
    assert_eq!(slow.advance(Duration::from_millis(65)), 3);
}
