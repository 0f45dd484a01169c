#![cfg(unix)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use remix_core::{
    io::settings::PROCESSING_RATE_KEY, EngineCommand, ManualClock, MemoryStore, PersistentStore,
    PlaybackState, RemixConfig, RemixError, Session, SessionEvent, SessionState,
    SymphoniaConverter,
};
use tempfile::{tempdir, TempDir};

const RATE: u32 = 8000;

const ENGINE: &str = r#"in="$1"
out="$2"
printf '1/2\n' >&2
for s in drums bass vocals; do cp "$in" "$out/$s.wav"; done
printf '2/2\n' >&2
printf '{"stems":{"drums":"%s/drums.wav","bass":"%s/bass.wav","vocals":"%s/vocals.wav"}}\n' "$out" "$out" "$out"
"#;

const GARBAGE_ENGINE: &str = r#"out="$2"
echo garbage > "$out/drums.wav"
printf '{"stems":{"drums":"%s/drums.wav"}}\n' "$out"
"#;

const SLOW_ENGINE: &str = "while true; do sleep 0.05; done\n";
const FAILING_ENGINE: &str = "echo 'CUDA out of memory' >&2\nexit 1\n";

struct Fixture {
    dir: TempDir,
    input: PathBuf,
    store: Arc<MemoryStore>,
    clock: ManualClock,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let input = dir.path().join("song.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: RATE,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut w = hound::WavWriter::create(&input, spec).unwrap();
        for i in 0..(RATE as usize / 2) {
            let s = (i as f32 * 0.03).sin() * 0.6;
            w.write_sample(s).unwrap();
            w.write_sample(s).unwrap();
        }
        w.finalize().unwrap();
        Self {
            dir,
            input,
            store: Arc::new(MemoryStore::new()),
            clock: ManualClock::new(0.0),
        }
    }

    fn session(&self, script: &str) -> Session {
        let path = self.dir.path().join("engine.sh");
        fs::write(&path, script).unwrap();
        let engine = EngineCommand::new(
            "sh",
            vec![
                path.to_string_lossy().into_owned(),
                "{input}".into(),
                "{output}".into(),
            ],
        );
        let config = RemixConfig::rooted_at(self.dir.path(), engine);
        Session::new(
            config,
            self.store.clone(),
            Arc::new(SymphoniaConverter),
            RATE,
            Arc::new(self.clock.clone()),
        )
    }
}

/// Poll until an event matching `done` arrives, collecting everything seen.
fn wait_for(session: &mut Session, done: impl Fn(&SessionEvent) -> bool) -> Vec<SessionEvent> {
    let deadline = Instant::now() + Duration::from_secs(20);
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        let events = session.poll_events();
        let finished = events.iter().any(&done);
        seen.extend(events);
        if finished {
            return seen;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("timed out, events so far: {seen:?}");
}

fn analysis_ended(e: &SessionEvent) -> bool {
    matches!(
        e,
        SessionEvent::AnalysisFinished { .. }
            | SessionEvent::AnalysisFailed { .. }
            | SessionEvent::AnalysisCancelled
    )
}

#[test]
fn miss_then_analyze_then_hit() {
    let fx = Fixture::new();
    let mut session = fx.session(ENGINE);
    assert_eq!(session.state(), SessionState::Empty);

    assert!(!session.open(&fx.input).unwrap());
    assert_eq!(session.state(), SessionState::Loaded);
    assert_eq!(
        session.last_directory().map(PathBuf::from),
        fs::canonicalize(fx.dir.path()).ok()
    );

    session.analyze().unwrap();
    assert_eq!(session.state(), SessionState::Analyzing);
    let events = wait_for(&mut session, analysis_ended);

    assert!(events.contains(&SessionEvent::AnalysisFinished {
        from_cache: false,
        stems: 3
    }));
    let fractions: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Progress { fraction, .. } => Some(*fraction),
            _ => None,
        })
        .collect();
    assert_eq!(fractions.last(), Some(&1.0));
    assert!(fractions[..fractions.len() - 1].iter().all(|f| *f <= 0.95));

    assert_eq!(session.state(), SessionState::Ready { from_cache: false });
    assert_eq!(session.stem_kinds().len(), 3);
    let key = session.cache_key().cloned().unwrap();
    assert!(session.cache().has_valid_cache(&key));

    // The finished run was learned exactly once.
    let learned = fx.store.get_f64(PROCESSING_RATE_KEY).unwrap();
    assert_ne!(learned, 1.0);

    let mut again = fx.session(ENGINE);
    assert!(again.open(&fx.input).unwrap());
    assert_eq!(again.state(), SessionState::Ready { from_cache: true });
    assert_eq!(again.stem_kinds().len(), 3);
    assert_eq!(fx.store.get_f64(PROCESSING_RATE_KEY), Some(learned));
}

#[test]
fn failed_analysis_returns_to_loaded() {
    let fx = Fixture::new();
    let mut session = fx.session(FAILING_ENGINE);
    session.open(&fx.input).unwrap();
    session.analyze().unwrap();
    let events = wait_for(&mut session, analysis_ended);

    let failure = events.iter().find_map(|e| match e {
        SessionEvent::AnalysisFailed { message, detail } => Some((message, detail)),
        _ => None,
    });
    let (message, detail) = failure.unwrap();
    assert!(message.contains("exit code 1"));
    assert!(detail.as_deref().unwrap().contains("CUDA out of memory"));

    assert_eq!(session.state(), SessionState::Loaded);
    assert!(fx.store.get(PROCESSING_RATE_KEY).is_none());
    let key = session.cache_key().cloned().unwrap();
    assert!(!session.cache().has_valid_cache(&key));
}

#[test]
fn undecodable_stems_fail_without_learning() {
    let fx = Fixture::new();
    let mut session = fx.session(GARBAGE_ENGINE);
    session.open(&fx.input).unwrap();
    session.analyze().unwrap();
    let events = wait_for(&mut session, analysis_ended);

    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::AnalysisFailed { .. })));
    assert_eq!(session.state(), SessionState::Loaded);
    assert!(fx.store.get(PROCESSING_RATE_KEY).is_none());
    let key = session.cache_key().cloned().unwrap();
    assert!(!session.cache().has_valid_cache(&key));
}

#[test]
fn cancel_after_engine_exit_undoes_everything() {
    let fx = Fixture::new();
    let mut session = fx.session(ENGINE);
    session.open(&fx.input).unwrap();
    let key = session.cache_key().cloned().unwrap();
    session.analyze().unwrap();

    // Let the worker run to completion without applying its result.
    let deadline = Instant::now() + Duration::from_secs(20);
    while !session.cache().has_valid_cache(&key) {
        assert!(Instant::now() < deadline, "worker never committed");
        thread::sleep(Duration::from_millis(10));
    }
    thread::sleep(Duration::from_millis(100));

    session.cancel_analysis();
    let events = wait_for(&mut session, analysis_ended);
    assert!(events.contains(&SessionEvent::AnalysisCancelled));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::AnalysisFinished { .. })));

    assert_eq!(session.state(), SessionState::Loaded);
    assert!(session.stem_kinds().is_empty());
    assert!(fx.store.get(PROCESSING_RATE_KEY).is_none());
    assert!(!session.cache().has_valid_cache(&key));
}

#[test]
fn progress_status_follows_worker_phase() {
    let fx = Fixture::new();
    let mut session = fx.session(SLOW_ENGINE);
    session.open(&fx.input).unwrap();
    session.analyze().unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let status = session.poll_events().into_iter().find_map(|e| match e {
            SessionEvent::Progress { status, .. } => Some(status),
            _ => None,
        });
        if status.as_deref() == Some("Separating stems") {
            break;
        }
        assert!(Instant::now() < deadline, "last status {status:?}");
        thread::sleep(Duration::from_millis(20));
    }
    session.cancel_analysis();
}

#[test]
fn cancel_leaves_rate_and_cache_alone() {
    let fx = Fixture::new();
    let mut session = fx.session(SLOW_ENGINE);
    session.open(&fx.input).unwrap();
    session.analyze().unwrap();
    thread::sleep(Duration::from_millis(200));

    session.cancel_analysis();
    assert_eq!(session.state(), SessionState::Loaded);
    let events = wait_for(&mut session, analysis_ended);
    assert!(events.contains(&SessionEvent::AnalysisCancelled));

    assert!(fx.store.get(PROCESSING_RATE_KEY).is_none());
    let key = session.cache_key().cloned().unwrap();
    assert!(!session.cache().has_valid_cache(&key));
    let work = fx.dir.path().join("work");
    let leftovers = fs::read_dir(&work).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn analyze_requires_open_file() {
    let fx = Fixture::new();
    let mut session = fx.session(ENGINE);
    assert!(matches!(session.analyze(), Err(RemixError::NoSession)));
    assert!(matches!(
        session.export_mixdown(fx.dir.path().join("mix.wav")),
        Err(RemixError::NoSession)
    ));
}

fn ready_session(fx: &Fixture) -> Session {
    let mut session = fx.session(ENGINE);
    session.open(&fx.input).unwrap();
    session.analyze().unwrap();
    wait_for(&mut session, analysis_ended);
    assert!(matches!(session.state(), SessionState::Ready { .. }));
    session
}

#[test]
fn mixdown_runs_in_background() {
    let fx = Fixture::new();
    let mut session = ready_session(&fx);
    session.set_mute(0, true);
    let dest = fx.dir.path().join("mix.wav");
    session.export_mixdown(&dest).unwrap();

    let events = wait_for(&mut session, |e| {
        matches!(
            e,
            SessionEvent::MixdownFinished { .. } | SessionEvent::MixdownFailed { .. }
        )
    });
    match events.last() {
        Some(SessionEvent::MixdownFinished { path, peak }) => {
            assert_eq!(path, &dest);
            assert!(*peak <= 1.0);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(Path::new(&dest).is_file());
    // The live mixer is untouched by the export.
    assert!(session.mixer().channel(0).unwrap().mute);
}

#[test]
fn transport_sampling_and_meter_decay_are_independent() {
    let fx = Fixture::new();
    let mut session = ready_session(&fx);
    let duration = session.transport().duration();
    assert!(duration > 0.4);

    session.play();
    session.set_transport_sampling(false);
    fx.clock.advance(duration + 1.0);
    assert_eq!(session.tick().state, PlaybackState::Playing);

    session.set_transport_sampling(true);
    assert_eq!(session.tick().state, PlaybackState::Stopped);

    // Meters keep ticking after stop and with sampling off.
    session.set_transport_sampling(false);
    session.tick();
    assert!(session.meter_levels().iter().all(|l| *l == 0.0));
}

#[test]
fn reopening_resets_mixer_and_transport() {
    let fx = Fixture::new();
    let mut session = ready_session(&fx);
    session.set_gain(1, 0.2);
    session.set_region(Some(remix_core::LoopRegion::new(0.1, 0.2)));

    assert!(session.open(&fx.input).unwrap());
    assert_eq!(session.mixer().effective_gains(), vec![1.0; 3]);
    assert!(session.transport().region().is_none());
    assert_eq!(session.transport().state(), PlaybackState::Stopped);
}
