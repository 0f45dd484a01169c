#![cfg(unix)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use remix_core::{
    io::convert::ConvertedAudio, EngineCommand, FormatConverter, JobStatus, RemixError,
    SeparationJobRunner, StemKind, SymphoniaConverter,
};
use tempfile::{tempdir, TempDir};

/// Six-stem fake engine: copies its input once per stem, reports progress on
/// stderr and prints a manifest with an extra unknown stem on stdout.
const SIX_STEM_ENGINE: &str = r#"#!/bin/sh
in="$1"
out="$2"
printf 'loading model\n1/4\r2/4\r' >&2
for s in drums bass guitar piano vocals other kazoo; do
  cp "$in" "$out/$s.wav"
done
printf '3/4\n4/4\n' >&2
echo "some log noise"
printf '{"model":"fake","input":"%s","stems":{' "$in"
printf '"drums":"%s/drums.wav","bass":"%s/bass.wav","guitar":"%s/guitar.wav",' "$out" "$out" "$out"
printf '"piano":"%s/piano.wav","vocals":"%s/vocals.wav","other":"%s/other.wav",' "$out" "$out" "$out"
printf '"kazoo":"%s/kazoo.wav"}}\n' "$out"
"#;

fn write_wav(path: &Path) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..800 {
        w.write_sample(((i % 50) * 200) as i16).unwrap();
    }
    w.finalize().unwrap();
}

struct Fixture {
    dir: TempDir,
    input: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let input = dir.path().join("song.wav");
        write_wav(&input);
        Self { dir, input }
    }

    fn runner(&self, script: &str) -> SeparationJobRunner {
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
        SeparationJobRunner::new(engine, self.dir.path().join("work"))
    }
}

#[test]
fn six_stems_load_and_unknown_key_is_ignored() {
    let fx = Fixture::new();
    let runner = fx.runner(SIX_STEM_ENGINE);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let mut job = runner
        .start(
            &fx.input,
            &SymphoniaConverter,
            Some(Arc::new(move |f: f64| sink.lock().unwrap().push(f))),
        )
        .unwrap();
    assert_eq!(job.status(), JobStatus::Running);
    let separated = job.join().unwrap();
    assert_eq!(job.status(), JobStatus::Succeeded);

    let kinds: Vec<_> = separated.stems.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, StemKind::ALL.to_vec());
    for s in &separated.stems {
        assert!(s.path.starts_with(separated.workspace.path()));
    }

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, vec![0.25, 0.5, 0.75, 1.0]);

    let workspace = separated.workspace.path().to_path_buf();
    drop(separated);
    assert!(!workspace.exists());
}

#[test]
fn every_job_gets_its_own_workspace() {
    let fx = Fixture::new();
    let runner = fx.runner(SIX_STEM_ENGINE);
    let mut a = runner.start(&fx.input, &SymphoniaConverter, None).unwrap();
    let mut b = runner.start(&fx.input, &SymphoniaConverter, None).unwrap();
    assert_ne!(a.workspace().unwrap(), b.workspace().unwrap());
    let a = a.join().unwrap();
    let b = b.join().unwrap();
    assert_ne!(a.workspace.path(), b.workspace.path());
}

#[test]
fn non_zero_exit_carries_both_outputs() {
    let fx = Fixture::new();
    let runner = fx.runner("echo partial result\necho 'model exploded' >&2\nexit 3\n");
    let mut job = runner.start(&fx.input, &SymphoniaConverter, None).unwrap();
    let workspace = job.workspace().unwrap().to_path_buf();

    match job.join() {
        Err(RemixError::SeparationFailed {
            status,
            stdout,
            stderr,
        }) => {
            assert_eq!(status, "exit code 3");
            assert_eq!(stdout, "partial result\n");
            assert_eq!(stderr, "model exploded\n");
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(!workspace.exists());
}

#[test]
fn missing_manifest_keeps_raw_output() {
    let fx = Fixture::new();
    let runner = fx.runner("echo 'all done, no json'\n");
    let mut job = runner.start(&fx.input, &SymphoniaConverter, None).unwrap();
    let err = job.join().unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.diagnostic().as_deref(), Some("all done, no json\n"));
    assert!(matches!(err, RemixError::ManifestParse { .. }));
}

#[test]
fn manifest_without_files_means_no_stems() {
    let fx = Fixture::new();
    let runner = fx.runner(r#"echo '{"stems":{"drums":"/nowhere/drums.wav"}}'"#);
    let mut job = runner.start(&fx.input, &SymphoniaConverter, None).unwrap();
    assert!(matches!(job.join(), Err(RemixError::NoStemsProduced)));
}

#[test]
fn cancel_kills_engine_and_removes_workspace() {
    let fx = Fixture::new();
    let runner = fx.runner("while true; do echo '1/10' >&2; sleep 0.05; done\n");
    let calls = Arc::new(Mutex::new(0usize));
    let counter = calls.clone();
    let mut job = runner
        .start(
            &fx.input,
            &SymphoniaConverter,
            Some(Arc::new(move |_: f64| *counter.lock().unwrap() += 1)),
        )
        .unwrap();
    let workspace = job.workspace().unwrap().to_path_buf();
    assert!(workspace.exists());

    let token = job.cancel_token();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        token.store(true, std::sync::atomic::Ordering::Relaxed);
    });

    assert!(matches!(job.join(), Err(RemixError::Cancelled)));
    assert_eq!(job.status(), JobStatus::Cancelled);
    assert!(!workspace.exists());

    let after_cancel = *calls.lock().unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(*calls.lock().unwrap(), after_cancel);
}

#[test]
fn cancelled_token_never_starts() {
    let fx = Fixture::new();
    let runner = fx.runner(SIX_STEM_ENGINE);
    let token = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let res = runner.start_with_token(&fx.input, &SymphoniaConverter, None, token);
    assert!(matches!(res, Err(RemixError::Cancelled)));
}

struct FailingConverter;

impl FormatConverter for FailingConverter {
    fn convert(&self, _data: &[u8]) -> Result<ConvertedAudio, String> {
        Err("unsupported codec".into())
    }
}

#[test]
fn conversion_failure_blocks_job() {
    let fx = Fixture::new();
    let odd = fx.dir.path().join("song.m4a");
    fs::write(&odd, b"....ftypM4A garbage").unwrap();
    let runner = fx.runner(SIX_STEM_ENGINE);
    match runner.start(&odd, &FailingConverter, None) {
        Err(RemixError::Conversion(msg)) => assert_eq!(msg, "unsupported codec"),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("job should not start"),
    }
}

/// Hands back a fixed WAV regardless of input.
struct FixedConverter(Vec<u8>);

impl FormatConverter for FixedConverter {
    fn convert(&self, _data: &[u8]) -> Result<ConvertedAudio, String> {
        Ok(ConvertedAudio {
            wav: self.0.clone(),
            sample_rate: 8000,
        })
    }
}

#[test]
fn non_wav_input_is_converted_before_separation() {
    let fx = Fixture::new();
    let mp3 = fx.dir.path().join("song.mp3");
    fs::write(&mp3, b"ID3\x04\x00\x00 not a real mp3").unwrap();
    let wav = fs::read(&fx.input).unwrap();

    let script = format!(
        "case \"$1\" in *input.wav) ;; *) echo \"got $1\" >&2; exit 9;; esac\n{}",
        SIX_STEM_ENGINE.trim_start_matches("#!/bin/sh\n")
    );
    let runner = fx.runner(&script);
    let mut job = runner.start(&mp3, &FixedConverter(wav), None).unwrap();
    let separated = job.join().unwrap();
    assert_eq!(separated.stems.len(), 6);
}
