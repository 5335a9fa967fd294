mod common;

use approx::assert_abs_diff_eq;
use common::*;
use locktrack::config::MotionConfig;
use locktrack::{BBox, TrackEvent, TrackPhase, TrackerConfig};

const COLA: [f32; 5] = [100.0, 100.0, 200.0, 200.0, 0.9];

fn lock_events(events: &[TrackEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, TrackEvent::Locked { .. }))
        .count()
}

fn lost_events(events: &[TrackEvent]) -> usize {
    events.iter().filter(|e| **e == TrackEvent::Lost).count()
}

#[test]
fn locks_on_second_overlapping_frame() {
    let mut t = tracker(TrackerConfig::default());
    // IoU between the two boxes is about 0.8
    let mut det = ScriptedDetector::new(vec![vec![COLA], vec![[111.0, 100.0, 211.0, 200.0, 0.9]]]);
    t.set_target(Some("cola"));

    let first = t.process_frame(&frame(0), &mut det, &[]);
    assert_eq!(lock_events(&first.events), 0);
    assert_eq!(first.phase, TrackPhase::PendingLock);
    assert!(first.tracked.is_none());

    let second = t.process_frame(&frame(33), &mut det, &[]);
    assert_eq!(lock_events(&second.events), 1);
    assert_eq!(second.phase, TrackPhase::Locked);
    assert_eq!(second.tracked.unwrap().bbox, BBox::ltrb(111.0, 100.0, 211.0, 200.0));
}

#[test]
fn one_off_detection_never_locks() {
    let mut t = tracker(TrackerConfig::default());
    let mut det = ScriptedDetector::new(vec![vec![COLA], vec![[400.0, 300.0, 500.0, 400.0, 0.9]], vec![]]);
    t.set_target(Some("cola"));

    let mut events = Vec::new();
    for i in 0..3 {
        events.extend(t.process_frame(&frame(i * 33), &mut det, &[]).events);
    }

    assert_eq!(lock_events(&events), 0);
    assert_eq!(t.state().phase(), TrackPhase::Searching);
}

#[test]
fn pan_right_moves_box_left() {
    let config = TrackerConfig {
        motion: MotionConfig {
            // 500 px per radian across a 640 px frame
            horizontal_fov_deg: (640.0f32 / 500.0).to_degrees(),
            ..MotionConfig::default()
        },
        ..TrackerConfig::default()
    };
    let mut t = tracker(config);
    let mut det = ScriptedDetector::new(vec![vec![COLA]]);
    t.set_target(Some("cola"));
    t.process_frame(&frame(0), &mut det, &[]);
    t.process_frame(&frame(33), &mut det, &[]);

    t.on_sensor(yaw(0.0, 40));
    t.on_sensor(yaw(0.0, 600));
    for i in 0..80 {
        t.on_sensor(yaw(0.3, 620 + i * 20));
    }

    let bbox = t.tracked_box().unwrap().bbox;
    // -0.3 rad * 500 px/rad * 0.8
    assert_abs_diff_eq!(bbox.left(), -20.0, epsilon = 0.05);
    assert_abs_diff_eq!(bbox.top(), 100.0, epsilon = 1e-3);
    assert_abs_diff_eq!(bbox.width(), 100.0, epsilon = 1e-3);
}

#[test]
fn off_screen_run_of_fifteen_samples_loses_lock() {
    let config = TrackerConfig {
        motion: MotionConfig {
            position_alpha: 1.0,
            ..MotionConfig::default()
        },
        ..TrackerConfig::default()
    };
    let mut t = tracker(config);
    let mut det = ScriptedDetector::new(vec![vec![COLA]]);
    t.set_target(Some("cola"));
    t.process_frame(&frame(0), &mut det, &[]);
    t.process_frame(&frame(33), &mut det, &[]);

    t.on_sensor(yaw(0.0, 40));
    t.on_sensor(yaw(0.0, 600));

    let mut events = Vec::new();
    for i in 0..14 {
        events.extend(t.on_sensor(yaw(1.2, 620 + i * 20)));
    }
    assert_eq!(lost_events(&events), 0);
    assert!(t.tracked_box().unwrap().bbox.right() < -150.0);

    let last = t.on_sensor(yaw(1.2, 1_000));
    assert_eq!(lost_events(&last), 1);
    assert_eq!(t.state().phase(), TrackPhase::Searching);
    assert!(t.tracked_box().is_none());
}

#[test]
fn three_failed_validations_lose_lock() {
    let mut t = tracker(TrackerConfig::default());
    let mut det = ScriptedDetector::new(vec![vec![COLA], vec![COLA], vec![]]);
    t.set_target(Some("cola"));

    let mut events = Vec::new();
    for i in 0..11 {
        let out = t.process_frame(&frame(i * 33), &mut det, &[]);
        events.extend(out.events);

        // locked on frame 1, validated on frames 4, 7 and 10
        if (2..10).contains(&i) {
            assert_eq!(out.phase, TrackPhase::Locked, "frame {}", i);
        }
    }

    assert_eq!(lost_events(&events), 1);
    assert_eq!(t.state().phase(), TrackPhase::Searching);
}

#[test]
fn faint_target_detections_keep_the_lock() {
    let mut t = tracker(TrackerConfig::default());
    // above the validation floor, below the decoder's generic 0.45
    let mut det = ScriptedDetector::new(vec![vec![COLA], vec![COLA], vec![[100.0, 100.0, 200.0, 200.0, 0.3]]]);
    t.set_target(Some("cola"));

    let mut events = Vec::new();
    for i in 0..14 {
        events.extend(t.process_frame(&frame(i * 33), &mut det, &[]).events);
    }

    assert_eq!(det.calls, 6);
    assert_eq!(lost_events(&events), 0);
    assert_eq!(t.state().phase(), TrackPhase::Locked);
    assert_abs_diff_eq!(t.tracked_box().unwrap().confidence, 0.3, epsilon = 1e-5);
}

#[test]
fn detections_below_the_validation_floor_still_lose_the_lock() {
    let mut t = tracker(TrackerConfig::default());
    let mut det = ScriptedDetector::new(vec![vec![COLA], vec![COLA], vec![[100.0, 100.0, 200.0, 200.0, 0.2]]]);
    t.set_target(Some("cola"));

    let mut events = Vec::new();
    for i in 0..11 {
        events.extend(t.process_frame(&frame(i * 33), &mut det, &[]).events);
    }

    assert_eq!(lost_events(&events), 1);
    assert_eq!(t.state().phase(), TrackPhase::Searching);
}

#[test]
fn device_roll_counter_rotates_tracked_box() {
    let mut t = tracker(TrackerConfig::default());
    let mut det = ScriptedDetector::new(vec![vec![COLA]]);
    t.set_target(Some("cola"));
    t.process_frame(&frame(0), &mut det, &[]);
    t.process_frame(&frame(33), &mut det, &[]);

    t.on_sensor(roll(0.0, 40));
    t.on_sensor(roll(0.0, 600));
    t.on_sensor(roll(0.2, 620));

    let tracked = t.tracked_box().unwrap();
    assert_abs_diff_eq!(tracked.rotation_deg, -(0.25f32 * 0.2).to_degrees(), epsilon = 1e-3);
    assert_abs_diff_eq!(tracked.bbox.left(), 100.0, epsilon = 1e-3);
}

#[test]
fn silent_sensors_keep_locked_box_in_place() {
    let mut t = tracker(TrackerConfig::default());
    let mut det = ScriptedDetector::new(vec![vec![COLA]]);
    t.set_target(Some("cola"));

    for i in 0..40 {
        t.process_frame(&frame(i * 33), &mut det, &[]);
    }

    let tracked = t.tracked_box().unwrap();
    for (got, want) in tracked.bbox.as_slice().iter().zip([100.0f32, 100.0, 200.0, 200.0]) {
        assert_abs_diff_eq!(*got, want, epsilon = 1e-3);
    }
    assert_eq!(tracked.rotation_deg, 0.0);
}

#[test]
fn occlusion_skips_detector_until_reacquisition() {
    let mut t = tracker(TrackerConfig::default());
    let mut det = ScriptedDetector::new(vec![vec![COLA]]);
    t.set_target(Some("cola"));
    t.process_frame(&frame(0), &mut det, &[]);
    t.process_frame(&frame(33), &mut det, &[]);
    let at_lock = det.calls;

    // covers the box at 100..200 px
    let hands = [hand(0.14, 0.19, 0.34, 0.44, (0.24, 0.3))];

    let mut ts = 33;
    while ts + 33 < 2_033 {
        ts += 33;
        t.process_frame(&frame(ts), &mut det, &hands);
    }
    assert!(t.snapshot().occluded);
    assert_eq!(det.calls, at_lock);

    t.process_frame(&frame(2_100), &mut det, &hands);
    assert_eq!(det.calls, at_lock + 1);
    assert_eq!(t.state().phase(), TrackPhase::Locked);

    // hand gone: back to periodic validation
    t.process_frame(&frame(2_133), &mut det, &[]);
    assert!(!t.snapshot().occluded);
}

#[test]
fn pinch_over_target_reports_touch_once() {
    let mut t = tracker(TrackerConfig::default());
    let mut det = ScriptedDetector::new(vec![vec![COLA]]);
    t.set_target(Some("cola"));
    t.process_frame(&frame(0), &mut det, &[]);
    t.process_frame(&frame(33), &mut det, &[]);

    // pinch at (150, 150) px, hand well inside the frame
    let grab = [hand(0.2, 0.25, 0.3, 0.4, (150.0 / 640.0, 150.0 / 480.0))];

    let mut events = Vec::new();
    for i in 0..6 {
        events.extend(t.process_frame(&frame(66 + i * 33), &mut det, &grab).events);
    }

    assert_eq!(events, vec![TrackEvent::Touching(true)]);
    assert!(t.snapshot().touching);
}
