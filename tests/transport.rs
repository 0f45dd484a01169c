use std::sync::{Arc, Mutex};

use approx::assert_abs_diff_eq;
use remix_core::{
    core::transport::Scheduler, LoopRegion, ManualClock, PlaybackState, Segment,
    TransportController,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Schedule(Segment),
    Halt,
}

#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Recorder {
    fn last_schedule(&self) -> Option<Segment> {
        self.calls.lock().unwrap().iter().rev().find_map(|c| match c {
            Call::Schedule(s) => Some(*s),
            Call::Halt => None,
        })
    }

    fn last(&self) -> Option<Call> {
        self.calls.lock().unwrap().last().cloned()
    }
}

impl Scheduler for Recorder {
    fn schedule(&self, segment: Segment) {
        self.calls.lock().unwrap().push(Call::Schedule(segment));
    }

    fn halt(&self) {
        self.calls.lock().unwrap().push(Call::Halt);
    }
}

fn transport(duration: f64) -> (TransportController, ManualClock, Recorder) {
    let clock = ManualClock::new(100.0);
    let recorder = Recorder::default();
    let mut t = TransportController::new(Arc::new(clock.clone()), Box::new(recorder.clone()));
    t.reset(duration);
    (t, clock, recorder)
}

#[test]
fn play_outside_region_snaps_to_region_start() {
    let (mut t, _clock, rec) = transport(60.0);
    t.seek(40.0);
    t.set_region(Some(LoopRegion::new(10.0, 15.0)));
    t.play();

    assert_eq!(t.state(), PlaybackState::Playing);
    assert_abs_diff_eq!(t.position(), 10.0, epsilon = 1e-9);
    assert_eq!(
        rec.last_schedule(),
        Some(Segment {
            start: 10.0,
            end: 15.0,
            loop_from: Some(10.0),
        })
    );
}

#[test]
fn play_inside_region_keeps_playhead() {
    let (mut t, _clock, rec) = transport(60.0);
    t.set_region(Some(LoopRegion::new(10.0, 15.0)));
    t.seek(12.5);
    t.play();
    assert_abs_diff_eq!(t.position(), 12.5, epsilon = 1e-9);
    assert_eq!(rec.last_schedule().unwrap().start, 12.5);
}

#[test]
fn region_playback_never_leaves_region() {
    let (mut t, clock, _rec) = transport(60.0);
    t.set_region(Some(LoopRegion::new(10.0, 15.0)));
    t.play();
    for _ in 0..500 {
        clock.advance(0.137);
        let snap = t.tick();
        assert!(snap.is_playing());
        assert!(
            snap.position >= 10.0 && snap.position < 15.0,
            "position {}",
            snap.position
        );
    }
}

#[test]
fn region_loops_even_with_global_loop_off() {
    let (mut t, clock, _rec) = transport(60.0);
    t.set_loop_enabled(false);
    t.set_region(Some(LoopRegion::new(10.0, 15.0)));
    t.play();
    clock.advance(7.0);
    let snap = t.tick();
    assert_eq!(snap.state, PlaybackState::Playing);
    assert_abs_diff_eq!(snap.position, 12.0, epsilon = 1e-9);
}

#[test]
fn end_of_file_without_loop_stops() {
    let (mut t, clock, rec) = transport(30.0);
    t.seek(25.0);
    t.play();
    clock.advance(6.0);
    let snap = t.tick();
    assert_eq!(snap.state, PlaybackState::Stopped);
    assert_eq!(snap.position, 0.0);
    assert_eq!(rec.last(), Some(Call::Halt));
}

#[test]
fn end_of_file_with_global_loop_restarts_at_zero() {
    let (mut t, clock, rec) = transport(30.0);
    t.set_loop_enabled(true);
    t.seek(25.0);
    t.play();
    assert_eq!(rec.last_schedule().unwrap().loop_from, Some(0.0));
    clock.advance(7.0);
    let snap = t.tick();
    assert!(snap.is_playing());
    assert_abs_diff_eq!(snap.position, 2.0, epsilon = 1e-9);
}

#[test]
fn pause_freezes_and_play_resumes() {
    let (mut t, clock, _rec) = transport(60.0);
    t.play();
    clock.advance(3.0);
    t.pause();
    assert_eq!(t.state(), PlaybackState::Paused);
    clock.advance(10.0);
    assert_abs_diff_eq!(t.position(), 3.0, epsilon = 1e-9);

    t.play();
    clock.advance(1.5);
    assert_abs_diff_eq!(t.tick().position, 4.5, epsilon = 1e-9);
}

#[test]
fn stop_returns_to_region_start_or_zero() {
    let (mut t, clock, _rec) = transport(60.0);
    t.play();
    clock.advance(5.0);
    t.stop();
    assert_eq!(t.state(), PlaybackState::Stopped);
    assert_eq!(t.position(), 0.0);

    t.set_region(Some(LoopRegion::new(20.0, 30.0)));
    t.play();
    clock.advance(2.0);
    t.stop();
    assert_eq!(t.position(), 20.0);
}

#[test]
fn seek_clamps_and_keeps_state() {
    let (mut t, _clock, _rec) = transport(60.0);
    t.seek(-4.0);
    assert_eq!(t.position(), 0.0);
    t.seek(99.0);
    assert_eq!(t.position(), 60.0);
    assert_eq!(t.state(), PlaybackState::Stopped);

    t.play();
    t.seek(30.0);
    assert_eq!(t.state(), PlaybackState::Playing);
    assert_abs_diff_eq!(t.position(), 30.0, epsilon = 1e-9);
}

#[test]
fn play_at_end_restarts_from_zero() {
    let (mut t, _clock, rec) = transport(60.0);
    t.seek(60.0);
    t.play();
    assert_eq!(t.position(), 0.0);
    assert_eq!(rec.last_schedule().unwrap().start, 0.0);
}

#[test]
fn inactive_region_clears_it() {
    let (mut t, _clock, _rec) = transport(60.0);
    t.set_region(Some(LoopRegion::new(10.0, 15.0)));
    assert!(t.region().is_some());
    t.set_region(Some(LoopRegion::new(0.0, 0.0)));
    assert!(t.region().is_none());
    t.set_region(Some(LoopRegion::new(50.0, 90.0)));
    assert_eq!(t.region(), Some(LoopRegion::new(50.0, 60.0)));
}

#[test]
fn empty_transport_does_not_play() {
    let (mut t, _clock, rec) = transport(0.0);
    t.play();
    assert_eq!(t.state(), PlaybackState::Stopped);
    assert_eq!(rec.last_schedule(), None);
}
