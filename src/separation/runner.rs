use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    process::{Child, ExitStatus, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tempfile::TempDir;

use super::manifest::{collect_stems, parse_manifest};
use crate::{
    config::EngineCommand,
    error::{RemixError, Result},
    io::{
        convert::{detect_file_container, AudioContainer, FormatConverter},
        progress::{parse_progress_line, LineBuffer, ProgressCallback},
    },
    types::StemFile,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONVERTED_INPUT: &str = "input.wav";
const OUTPUT_SUBDIR: &str = "stems";

/// Shared flag a control surface sets to stop a job.
pub type CancelToken = Arc<AtomicBool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Stems of a finished job, still living in the job's temp directory.
#[derive(Debug)]
pub struct SeparatedStems {
    pub stems: Vec<StemFile>,
    pub workspace: TempDir,
}

pub struct SeparationJobRunner {
    engine: EngineCommand,
    work_dir: PathBuf,
}

impl SeparationJobRunner {
    pub fn new(engine: EngineCommand, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            work_dir: work_dir.into(),
        }
    }

    pub fn engine(&self) -> &EngineCommand {
        &self.engine
    }

    /// Launch the engine on `input`.
    ///
    /// Non-WAV input is converted into the job's temp directory first.
    /// Progress fractions reach `progress` from a reader thread.
    pub fn start(
        &self,
        input: &Path,
        converter: &dyn FormatConverter,
        progress: Option<ProgressCallback>,
    ) -> Result<JobHandle> {
        self.start_with_token(input, converter, progress, CancelToken::default())
    }

    /// Like [`start`](Self::start), observing a cancel flag the caller
    /// already holds.
    pub fn start_with_token(
        &self,
        input: &Path,
        converter: &dyn FormatConverter,
        progress: Option<ProgressCallback>,
        cancel: CancelToken,
    ) -> Result<JobHandle> {
        if cancel.load(Ordering::Relaxed) {
            return Err(RemixError::Cancelled);
        }
        fs::create_dir_all(&self.work_dir).map_err(|e| RemixError::io_at(&self.work_dir, e))?;
        let workspace = tempfile::Builder::new()
            .prefix("remix-job-")
            .tempdir_in(&self.work_dir)
            .map_err(|e| RemixError::io_at(&self.work_dir, e))?;

        let engine_input = match detect_file_container(input) {
            AudioContainer::Wav => input.to_path_buf(),
            container => {
                log::info!("converting {:?} ({container:?}) to WAV", input);
                let bytes = fs::read(input).map_err(|e| RemixError::io_at(input, e))?;
                let converted = converter.convert(&bytes).map_err(RemixError::Conversion)?;
                let dest = workspace.path().join(CONVERTED_INPUT);
                fs::write(&dest, &converted.wav).map_err(|e| RemixError::io_at(&dest, e))?;
                dest
            }
        };

        let out_dir = workspace.path().join(OUTPUT_SUBDIR);
        fs::create_dir_all(&out_dir).map_err(|e| RemixError::io_at(&out_dir, e))?;

        let mut child = self
            .engine
            .command(&engine_input, &out_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RemixError::io_at(&self.engine.program, e))?;

        log::info!(
            "separation started: {} on {:?} (pid {})",
            self.engine.program,
            engine_input,
            child.id()
        );

        let stdout_reader = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });
        let stderr_reader = child.stderr.take().map(|err| {
            let cancel = cancel.clone();
            thread::spawn(move || read_progress(err, &cancel, progress))
        });

        Ok(JobHandle {
            child: Some(child),
            cancel,
            stdout_reader,
            stderr_reader,
            workspace: Some(workspace),
            status: JobStatus::Running,
        })
    }
}

fn read_progress(
    mut stream: impl Read,
    cancel: &AtomicBool,
    progress: Option<ProgressCallback>,
) -> String {
    let mut chunk = [0u8; 4096];
    let mut lines = LineBuffer::new();
    let mut captured = Vec::new();
    let report = |line: &str| {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        if let (Some(cb), Some(fraction)) = (progress.as_ref(), parse_progress_line(line)) {
            cb(fraction);
        }
    };
    loop {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                captured.extend_from_slice(&chunk[..n]);
                for line in lines.feed(&chunk[..n]) {
                    report(&line);
                }
            }
        }
    }
    if let Some(line) = lines.finish() {
        report(&line);
    }
    String::from_utf8_lossy(&captured).into_owned()
}

/// A running engine process. Dropping an unfinished handle kills the process.
pub struct JobHandle {
    child: Option<Child>,
    cancel: CancelToken,
    stdout_reader: Option<JoinHandle<String>>,
    stderr_reader: Option<JoinHandle<String>>,
    workspace: Option<TempDir>,
    status: JobStatus,
}

impl JobHandle {
    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.workspace.as_ref().map(|w| w.path())
    }

    /// Block until the engine exits or the job is cancelled.
    pub fn join(&mut self) -> Result<SeparatedStems> {
        let result = self.wait_and_collect();
        self.status = match &result {
            Ok(_) => JobStatus::Succeeded,
            Err(RemixError::Cancelled) => JobStatus::Cancelled,
            Err(_) => JobStatus::Failed,
        };
        // Anything not handed to the caller is discarded with its directory.
        self.workspace = None;
        result
    }

    fn wait_and_collect(&mut self) -> Result<SeparatedStems> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| anyhow::anyhow!("separation job already joined"))?;

        let exit = loop {
            if self.cancel.load(Ordering::Relaxed) {
                kill(&mut child);
                self.detach_readers();
                log::info!("separation cancelled");
                return Err(RemixError::Cancelled);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    kill(&mut child);
                    self.detach_readers();
                    return Err(RemixError::Io(e));
                }
            }
        };

        let (stdout, stderr) = self.drain_readers();
        if self.cancel.load(Ordering::Relaxed) {
            return Err(RemixError::Cancelled);
        }
        if !exit.success() {
            log::warn!("separation engine exited with {}", describe(exit));
            return Err(RemixError::SeparationFailed {
                status: describe(exit),
                stdout,
                stderr,
            });
        }

        let manifest = parse_manifest(&stdout)?;
        let stems = collect_stems(&manifest)?;
        let workspace = self
            .workspace
            .take()
            .ok_or_else(|| anyhow::anyhow!("job workspace already released"))?;
        log::info!("separation produced {} stems", stems.len());
        Ok(SeparatedStems { stems, workspace })
    }

    // Grandchildren may still hold the pipes; the readers end on their own.
    fn detach_readers(&mut self) {
        self.stdout_reader = None;
        self.stderr_reader = None;
    }

    fn drain_readers(&mut self) -> (String, String) {
        let out = self
            .stdout_reader
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let err = self
            .stderr_reader
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        (out, err)
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            self.cancel.store(true, Ordering::Relaxed);
            kill(&mut child);
        }
    }
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("kill engine process: {e}");
    }
    let _ = child.wait();
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}
