use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::Ordering,
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc,
    },
    thread,
    time::Instant,
};

use serde_json::json;

use crate::{
    cache::CacheStore,
    config::RemixConfig,
    core::{
        audio::probe_duration,
        graph::{GraphRenderer, PlaybackGraph},
        mixdown::MixdownExporter,
        mixer::{AtomicF32, MixerState},
        transport::{Clock, SystemClock, TransportController, TransportState},
    },
    error::{RemixError, Result},
    io::{
        convert::{FormatConverter, SymphoniaConverter},
        progress::ProgressCallback,
        settings::{JsonFileStore, PersistentStore, LAST_DIRECTORY_KEY},
    },
    separation::{
        estimator::PROGRESS_CAP, CancelToken, ProcessingJob, SeparationJobRunner, TimeEstimator,
    },
    stem::{StemKind, StemSet},
    types::{CacheKey, InputFile, LoopRegion},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Loaded,
    Analyzing,
    Ready { from_cache: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Progress {
        fraction: f64,
        remaining_secs: f64,
        status: String,
    },
    AnalysisFinished {
        from_cache: bool,
        stems: usize,
    },
    AnalysisFailed {
        message: String,
        detail: Option<String>,
    },
    AnalysisCancelled,
    MixdownFinished {
        path: PathBuf,
        peak: f32,
    },
    MixdownFailed {
        message: String,
    },
}

enum WorkerMessage {
    Status {
        generation: u64,
        status: &'static str,
    },
    StemsReady {
        generation: u64,
        key: CacheKey,
        stems: StemSet,
        cached: bool,
        elapsed: f64,
    },
    AnalysisFailed {
        generation: u64,
        error: RemixError,
    },
    AnalysisCancelled {
        generation: u64,
    },
    Mixdown(std::result::Result<(PathBuf, f32), RemixError>),
}

struct ActiveAnalysis {
    generation: u64,
    job: ProcessingJob,
    engine_fraction: Arc<AtomicF32>,
    /// State to return to if the analysis does not produce stems.
    resume: SessionState,
}

pub struct Session {
    config: RemixConfig,
    store: Arc<dyn PersistentStore>,
    converter: Arc<dyn FormatConverter>,
    cache: Arc<CacheStore>,
    estimator: TimeEstimator,
    graph: PlaybackGraph,
    renderer: Option<GraphRenderer>,
    transport: TransportController,
    state: SessionState,
    input: Option<InputFile>,
    key: Option<CacheKey>,
    audio_duration: f64,
    stems: Option<Arc<StemSet>>,
    generation: u64,
    analysis: Option<ActiveAnalysis>,
    tx: Sender<WorkerMessage>,
    rx: Receiver<WorkerMessage>,
    transport_sampling: bool,
    meter_decay: bool,
}

impl Session {
    pub fn new(
        config: RemixConfig,
        store: Arc<dyn PersistentStore>,
        converter: Arc<dyn FormatConverter>,
        output_rate: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (graph, renderer) = PlaybackGraph::new(output_rate);
        let transport = TransportController::new(clock, Box::new(graph.scheduler()));
        let (tx, rx) = mpsc::channel();
        Self {
            cache: Arc::new(CacheStore::new(config.cache_root.clone())),
            estimator: TimeEstimator::new(store.clone()),
            config,
            store,
            converter,
            graph,
            renderer: Some(renderer),
            transport,
            state: SessionState::Empty,
            input: None,
            key: None,
            audio_duration: 0.0,
            stems: None,
            generation: 0,
            analysis: None,
            tx,
            rx,
            transport_sampling: true,
            meter_decay: true,
        }
    }

    /// Session with a JSON settings file, the symphonia converter and the
    /// system clock.
    pub fn with_defaults(config: RemixConfig, output_rate: u32) -> Self {
        let store = Arc::new(JsonFileStore::open(&config.settings_path));
        Self::new(
            config,
            store,
            Arc::new(SymphoniaConverter),
            output_rate,
            Arc::new(SystemClock::new()),
        )
    }

    /// Hand the audio-thread half of the graph to an output device (or a test).
    pub fn take_renderer(&mut self) -> Option<GraphRenderer> {
        self.renderer.take()
    }

    /// Load `path`. A valid cache entry is decoded and installed right away;
    /// returns whether that happened.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<bool> {
        let input = InputFile::from_path(path)?;
        self.cancel_analysis();
        self.generation += 1;

        if let Some(dir) = input.path.parent() {
            let dir = dir.to_string_lossy().into_owned();
            if let Err(e) = self.store.set(LAST_DIRECTORY_KEY, json!(dir)) {
                log::warn!("failed to remember last directory: {e}");
            }
        }

        let key = self.cache.key(&input);
        self.audio_duration = probe_duration(&input.path).unwrap_or_else(|e| {
            log::warn!("could not read duration of {:?}: {e}", input.path);
            0.0
        });
        log::info!(
            "opened {} ({:.1}s, key {key})",
            input.file_name(),
            self.audio_duration
        );

        self.uninstall();
        self.input = Some(input);
        self.key = Some(key.clone());
        self.state = SessionState::Loaded;

        match self.load_cached(&key) {
            Some(stems) => {
                self.install(stems, true)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn load_cached(&self, key: &CacheKey) -> Option<StemSet> {
        if !self.cache.has_valid_cache(key) {
            return None;
        }
        let files = self.cache.load_stem_paths(key)?;
        match StemSet::load(&files) {
            Ok(stems) if !stems.is_empty() => Some(stems),
            Ok(_) => None,
            Err(e) => {
                log::warn!("cache entry {key} unreadable ({e}), clearing it");
                self.cache.clear(key);
                None
            }
        }
    }

    /// Start separating the loaded file on a worker thread. Progress arrives
    /// through [`poll_events`](Self::poll_events).
    pub fn analyze(&mut self) -> Result<()> {
        let input = self.input.clone().ok_or(RemixError::NoSession)?;
        let key = self.key.clone().ok_or(RemixError::NoSession)?;
        if self.analysis.is_some() {
            log::debug!("analysis already running");
            return Ok(());
        }

        self.generation += 1;
        let generation = self.generation;
        let estimated_total = self.estimator.estimate_total(self.audio_duration);
        let job = ProcessingJob::new(estimated_total);
        let cancel = job.cancel_token();
        let engine_fraction = Arc::new(AtomicF32::new(0.0));
        self.analysis = Some(ActiveAnalysis {
            generation,
            job,
            engine_fraction: engine_fraction.clone(),
            resume: self.state,
        });
        self.state = SessionState::Analyzing;
        log::info!(
            "analysis started for {} (estimated {:.0}s)",
            input.file_name(),
            estimated_total
        );

        let worker = AnalysisWorker {
            runner: SeparationJobRunner::new(
                self.config.engine.clone(),
                self.config.work_dir.clone(),
            ),
            converter: self.converter.clone(),
            cache: self.cache.clone(),
            input,
            key,
            cancel,
            engine_fraction,
            generation,
            tx: self.tx.clone(),
        };
        let tx = self.tx.clone();
        thread::spawn(move || {
            let msg = match worker.run() {
                Ok(finished) => finished,
                Err(RemixError::Cancelled) => WorkerMessage::AnalysisCancelled { generation },
                Err(error) => WorkerMessage::AnalysisFailed { generation, error },
            };
            let _ = tx.send(msg);
        });
        Ok(())
    }

    /// Stop a running analysis. The file stays loaded; nothing is cached and
    /// the learned rate is untouched.
    pub fn cancel_analysis(&mut self) {
        if let Some(active) = self.analysis.take() {
            active.job.cancel();
            self.state = active.resume;
            log::info!("analysis cancelled");
        }
    }

    /// Render the current mix to `dest` on a worker thread.
    pub fn export_mixdown<P: AsRef<Path>>(&self, dest: P) -> Result<()> {
        let stems = self.stems.clone().ok_or(RemixError::NoSession)?;
        let mixer = self.graph.mixer().clone();
        let region = self.transport.region();
        let dest = dest.as_ref().to_path_buf();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let res = MixdownExporter::export(&stems, &mixer, region, &dest)
                .map(|buffer| (dest, buffer.peak()));
            let _ = tx.send(WorkerMessage::Mixdown(res));
        });
        Ok(())
    }

    /// Apply finished worker results and report what happened since the last
    /// call. While analyzing, a fresh progress event is always included.
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(msg) => self.apply(msg, &mut events),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if let Some(active) = &self.analysis {
            let engine = active.engine_fraction.load() as f64;
            let fraction = active
                .job
                .progress()
                .max(engine)
                .min(PROGRESS_CAP);
            events.push(SessionEvent::Progress {
                fraction,
                remaining_secs: active.job.estimated_remaining(),
                status: active.job.status.clone(),
            });
        }
        events
    }

    fn apply(&mut self, msg: WorkerMessage, events: &mut Vec<SessionEvent>) {
        match msg {
            WorkerMessage::Status { generation, status } => {
                if let Some(active) = self.analysis.as_mut() {
                    if active.generation == generation {
                        active.job.status = status.to_string();
                    }
                }
            }
            WorkerMessage::StemsReady {
                generation,
                key,
                stems,
                cached,
                elapsed,
            } => {
                if !self.is_current(generation) {
                    // Completed after a cancel; undo its cache commit.
                    if generation == self.generation {
                        if cached {
                            self.cache.clear(&key);
                        }
                        events.push(SessionEvent::AnalysisCancelled);
                    }
                    return;
                }
                let resume = self
                    .analysis
                    .take()
                    .map(|a| a.resume)
                    .unwrap_or(SessionState::Loaded);
                let count = stems.len();
                match self.install(stems, false) {
                    Ok(()) => {
                        self.estimator.observe(elapsed, self.audio_duration);
                        if !cached {
                            log::warn!("stems ready but not cached");
                        }
                        events.push(SessionEvent::Progress {
                            fraction: 1.0,
                            remaining_secs: 0.0,
                            status: "Done".into(),
                        });
                        events.push(SessionEvent::AnalysisFinished {
                            from_cache: false,
                            stems: count,
                        });
                    }
                    Err(e) => {
                        self.state = resume;
                        events.push(failure(&e));
                    }
                }
            }
            WorkerMessage::AnalysisFailed { generation, error } => {
                if !self.is_current(generation) {
                    return;
                }
                log::warn!("analysis failed: {error}");
                self.state = self
                    .analysis
                    .take()
                    .map(|a| a.resume)
                    .unwrap_or(SessionState::Loaded);
                events.push(failure(&error));
            }
            WorkerMessage::AnalysisCancelled { generation } => {
                if generation == self.generation {
                    events.push(SessionEvent::AnalysisCancelled);
                }
            }
            WorkerMessage::Mixdown(Ok((path, peak))) => {
                events.push(SessionEvent::MixdownFinished { path, peak });
            }
            WorkerMessage::Mixdown(Err(e)) => {
                log::warn!("mixdown failed: {e}");
                events.push(SessionEvent::MixdownFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.analysis
            .as_ref()
            .is_some_and(|a| a.generation == generation)
    }

    fn install(&mut self, stems: StemSet, from_cache: bool) -> Result<()> {
        self.graph.load(&stems)?;
        self.transport.reset(self.graph.duration());
        self.stems = Some(Arc::new(stems));
        self.state = SessionState::Ready { from_cache };
        Ok(())
    }

    fn uninstall(&mut self) {
        self.transport.reset(0.0);
        self.stems = None;
        if let Err(e) = self.graph.load(&StemSet::default()) {
            log::warn!("failed to clear playback graph: {e}");
        }
    }

    /// One control tick. Transport sampling and meter decay are independent
    /// processes; each can be switched off on its own.
    pub fn tick(&mut self) -> TransportState {
        let snapshot = if self.transport_sampling {
            self.transport.tick()
        } else {
            self.transport.snapshot()
        };
        if self.meter_decay {
            self.graph.tick_meters();
        }
        snapshot
    }

    pub fn set_transport_sampling(&mut self, enabled: bool) {
        self.transport_sampling = enabled;
    }

    pub fn set_meter_decay(&mut self, enabled: bool) {
        self.meter_decay = enabled;
    }

    pub fn play(&mut self) {
        self.transport.play();
    }

    pub fn pause(&mut self) {
        self.transport.pause();
    }

    pub fn stop(&mut self) {
        self.transport.stop();
    }

    pub fn seek(&mut self, t: f64) {
        self.transport.seek(t);
    }

    pub fn set_region(&mut self, region: Option<LoopRegion>) {
        self.transport.set_region(region);
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        self.transport.set_loop_enabled(enabled);
    }

    pub fn set_gain(&mut self, i: usize, value: f32) {
        self.graph.set_gain(i, value);
    }

    pub fn set_pan(&mut self, i: usize, value: f32) {
        self.graph.set_pan(i, value);
    }

    pub fn set_solo(&mut self, i: usize, solo: bool) {
        self.graph.set_solo(i, solo);
    }

    pub fn set_mute(&mut self, i: usize, mute: bool) {
        self.graph.set_mute(i, mute);
    }

    pub fn reset_mixer(&mut self) {
        self.graph.reset_all();
    }

    pub fn mixer(&self) -> &MixerState {
        self.graph.mixer()
    }

    pub fn meter_levels(&self) -> Vec<f32> {
        self.graph.meter_levels()
    }

    pub fn stem_kinds(&self) -> &[StemKind] {
        self.graph.kinds()
    }

    pub fn stems(&self) -> Option<&StemSet> {
        self.stems.as_deref()
    }

    pub fn transport(&self) -> &TransportController {
        &self.transport
    }

    pub fn graph(&self) -> &PlaybackGraph {
        &self.graph
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn input(&self) -> Option<&InputFile> {
        self.input.as_ref()
    }

    pub fn cache_key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn estimator(&self) -> &TimeEstimator {
        &self.estimator
    }

    pub fn last_directory(&self) -> Option<String> {
        self.store.get_string(LAST_DIRECTORY_KEY)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_analysis();
    }
}

fn failure(e: &RemixError) -> SessionEvent {
    SessionEvent::AnalysisFailed {
        message: e.to_string(),
        detail: e.diagnostic(),
    }
}

struct AnalysisWorker {
    runner: SeparationJobRunner,
    converter: Arc<dyn FormatConverter>,
    cache: Arc<CacheStore>,
    input: InputFile,
    key: CacheKey,
    cancel: CancelToken,
    engine_fraction: Arc<AtomicF32>,
    generation: u64,
    tx: Sender<WorkerMessage>,
}

impl AnalysisWorker {
    /// Separate, decode, then commit to the cache. The learned rate is left
    /// to the control thread, which only observes runs it accepts.
    fn run(self) -> Result<WorkerMessage> {
        let started = Instant::now();
        let fraction = self.engine_fraction.clone();
        let progress: ProgressCallback = Arc::new(move |f: f64| fraction.store(f as f32));

        self.report("Preparing input");
        let mut job = self.runner.start_with_token(
            &self.input.path,
            self.converter.as_ref(),
            Some(progress),
            self.cancel.clone(),
        )?;
        self.report("Separating stems");
        let separated = job.join()?;
        self.check_cancel()?;

        self.report("Decoding stems");
        let stems = StemSet::load(&separated.stems)?;
        self.check_cancel()?;

        self.report("Saving stems to cache");
        let cached = self.cache.save(
            &self.key,
            &self.input,
            &separated.stems,
            stems.sample_rate(),
            stems.duration(),
        );
        if self.cancelled() {
            if cached {
                self.cache.clear(&self.key);
            }
            return Err(RemixError::Cancelled);
        }

        Ok(WorkerMessage::StemsReady {
            generation: self.generation,
            key: self.key,
            stems,
            cached,
            elapsed: started.elapsed().as_secs_f64(),
        })
    }

    fn report(&self, status: &'static str) {
        let _ = self.tx.send(WorkerMessage::Status {
            generation: self.generation,
            status,
        });
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancelled() {
            return Err(RemixError::Cancelled);
        }
        Ok(())
    }
}
