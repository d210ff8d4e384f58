//! Work Schedule and Settings Tests
//!
//! Tests for:
//! - Time-sliced fairness over arbitrary windows
//! - Instant mode yielding the whole cycle
//! - Reconfiguration restarting the cycle
//! - Settings JSON loading and validation

use stratus::renderer::schedule::{UnitOrder, WorkSchedule};
use stratus::{ReprojectionQuality, ScheduleMode, SkyError, SkySettings};

fn run(schedule: &mut WorkSchedule, ticks: usize) -> Vec<u32> {
    (0..ticks)
        .map(|_| {
            let unit = schedule.current_unit();
            schedule.advance();
            unit
        })
        .collect()
}

// ============================================================================
// Fairness
// ============================================================================

#[test]
fn windows_select_each_unit_within_bounds() {
    for factor in [1u32, 2, 4, 8] {
        let units = factor * factor;
        let mut schedule = WorkSchedule::new(
            units,
            ScheduleMode::TimeSliced,
            UnitOrder::Shuffled { seed: 0x5EED },
        );
        let sequence = run(&mut schedule, units as usize * 5 + 3);

        for len in [units as usize, units as usize + 1, units as usize * 2 + 3] {
            let ceiling = len.div_ceil(units as usize);
            for window in sequence.windows(len) {
                let mut counts = vec![0usize; units as usize];
                for &unit in window {
                    counts[unit as usize] += 1;
                }
                assert!(
                    counts.iter().all(|&n| n >= 1 && n <= ceiling),
                    "F={factor} len={len}: {counts:?}"
                );
            }
        }
    }
}

#[test]
fn sequential_cycles_faces_in_layer_order() {
    let mut schedule = WorkSchedule::new(6, ScheduleMode::TimeSliced, UnitOrder::Sequential);
    assert_eq!(run(&mut schedule, 8), [0, 1, 2, 3, 4, 5, 0, 1]);
    assert_eq!(schedule.cycle_position(), 2);
}

#[test]
fn restart_returns_to_first_unit() {
    let mut schedule =
        WorkSchedule::new(16, ScheduleMode::TimeSliced, UnitOrder::Shuffled { seed: 7 });
    let first = schedule.current_unit();
    run(&mut schedule, 5);
    schedule.restart();
    assert_eq!(schedule.tick(), 0);
    assert_eq!(schedule.current_unit(), first);
}

#[test]
fn reconfigure_changes_unit_count_and_restarts() {
    let mut schedule = WorkSchedule::new(4, ScheduleMode::TimeSliced, UnitOrder::Sequential);
    run(&mut schedule, 3);
    schedule.configure(64, ScheduleMode::TimeSliced, UnitOrder::Shuffled { seed: 1 });
    assert_eq!(schedule.unit_count(), 64);
    assert_eq!(schedule.tick(), 0);
    assert_eq!(schedule.current_unit(), schedule.order()[0]);
}

#[test]
fn different_seeds_give_different_orders() {
    let a = WorkSchedule::new(64, ScheduleMode::TimeSliced, UnitOrder::Shuffled { seed: 1 });
    let b = WorkSchedule::new(64, ScheduleMode::TimeSliced, UnitOrder::Shuffled { seed: 2 });
    assert_ne!(a.order(), b.order());
}

#[test]
fn instant_mode_ignores_tick() {
    let mut schedule = WorkSchedule::new(6, ScheduleMode::TimeSliced, UnitOrder::Sequential);
    assert_eq!(schedule.next_units(3).as_slice(), &[3]);
    schedule.set_mode(ScheduleMode::Instant);
    assert_eq!(schedule.next_units(3).len(), 6);
    assert_eq!(schedule.next_units(0), schedule.next_units(99));
}

// ============================================================================
// Settings
// ============================================================================

#[test]
fn default_settings_are_valid() {
    let settings = SkySettings::default();
    assert!(settings.validate().is_ok());
    assert_eq!(settings.reprojection, ReprojectionQuality::Medium);
    assert_eq!(settings.reprojection.factor(), 4);
    assert_eq!(settings.probe_format(), wgpu::TextureFormat::Rgba16Float);
}

#[test]
fn settings_round_trip_through_json() {
    let settings = SkySettings {
        refresh_mode: ScheduleMode::Instant,
        reprojection: ReprojectionQuality::Off,
        reflection_resolution: 64,
        hdr: false,
        ..Default::default()
    };
    let json = serde_json::to_string(&settings).unwrap();
    let loaded = SkySettings::from_json(&json).unwrap();
    assert_eq!(loaded, settings);
    assert_eq!(loaded.probe_format(), wgpu::TextureFormat::Rgba8Unorm);
}

#[test]
fn malformed_json_is_reported() {
    let err = SkySettings::from_json("{ reprojection: ").unwrap_err();
    assert!(matches!(err, SkyError::Json(_)));
    assert!(!err.is_fatal());
}

#[test]
fn zero_resolution_is_rejected() {
    let err = SkySettings::from_json(r#"{ "reflection_resolution": 0 }"#).unwrap_err();
    assert!(matches!(err, SkyError::InvalidSettings(_)));
}
