use crate::error::{FilterError, FilterResult};
use crate::render::{RenderContext, SnapshotCell};
use crate::session::{FilterCommand, FilterSession};
use crate::{log_error, log_info, log_warn};
use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbaImage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_TARGET_FPS: f32 = 30.0;
pub const MAX_TARGET_FPS: f32 = 1000.0;
const SOURCE_RETRY_DELAY: Duration = Duration::from_millis(10);
const LOW_FPS_THRESHOLD: f32 = 25.0;
const LOW_FPS_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Accept a pacing target in `(0, MAX_TARGET_FPS]`.
pub fn validate_target_fps(fps: f32) -> FilterResult<f32> {
    if fps > 0.0 && fps <= MAX_TARGET_FPS {
        Ok(fps)
    } else {
        Err(FilterError::InvalidRange {
            field: "target_fps",
            value: fps,
            min: 0.0,
            max: MAX_TARGET_FPS,
        })
    }
}

/// Frame budget for a pacing target. `None` means unpaced, including for
/// targets that don't yield a representable duration.
pub fn frame_duration(target_fps: Option<f32>) -> Option<Duration> {
    let fps = validate_target_fps(target_fps?).ok()?;
    Duration::try_from_secs_f32(1.0 / fps).ok()
}

/// Producer of source frames. `Ok(None)` ends the stream.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>>;
}

/// Consumer of composited frames.
pub trait FrameSink: Send {
    fn present(&mut self, index: u64, frame: &RgbaImage) -> Result<()>;
}

/// One image repeated, optionally a fixed number of times.
pub struct StillImageSource {
    frame: RgbaImage,
    remaining: Option<u64>,
}

impl StillImageSource {
    pub fn new(frame: RgbaImage, repeat: Option<u64>) -> Self {
        Self {
            frame,
            remaining: repeat,
        }
    }

    pub fn open<P: AsRef<Path>>(path: P, repeat: Option<u64>) -> Result<Self> {
        let frame = image::open(path.as_ref())
            .with_context(|| format!("Failed to open {}", path.as_ref().display()))?
            .to_rgba8();
        Ok(Self::new(frame, repeat))
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        match &mut self.remaining {
            Some(0) => Ok(None),
            Some(n) => {
                *n -= 1;
                Ok(Some(self.frame.clone()))
            }
            None => Ok(Some(self.frame.clone())),
        }
    }
}

/// Every image in a directory, in file name order.
pub struct DirectorySource {
    paths: VecDeque<PathBuf>,
}

impl DirectorySource {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir.as_ref())
            .with_context(|| format!("Failed to read {}", dir.as_ref().display()))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            anyhow::bail!("No images found in {}", dir.as_ref().display());
        }
        Ok(Self { paths: paths.into() })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let frame = image::open(&path)
            .with_context(|| format!("Failed to decode {}", path.display()))?
            .to_rgba8();
        Ok(Some(frame))
    }
}

/// Writes `frame_000000.png`, `frame_000001.png`, ... into a directory.
pub struct PngDirectorySink {
    dir: PathBuf,
}

impl PngDirectorySink {
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref()).context("Failed to create output directory")?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }
}

impl FrameSink for PngDirectorySink {
    fn present(&mut self, index: u64, frame: &RgbaImage) -> Result<()> {
        let path = self.dir.join(format!("frame_{:06}.png", index));
        frame
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Drops every frame.
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _index: u64, _frame: &RgbaImage) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// `None` runs unpaced
    pub target_fps: Option<f32>,
    pub max_frames: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_fps: Some(DEFAULT_TARGET_FPS),
            max_frames: None,
        }
    }
}

/// Counters for one stream, available after it ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineReport {
    pub frames_presented: u64,
    pub frames_skipped: u64,
    pub errors: u64,
    pub commands_applied: u64,
}

/// Drives a frame source through the compositor on its own thread.
///
/// Edits arrive as [`FilterCommand`]s and are applied between frames; at most
/// one repack is published per frame tick.
pub struct FilterEngine {
    session: Arc<Mutex<FilterSession>>,
    snapshot: Arc<SnapshotCell>,
    command_sender: Sender<FilterCommand>,
    command_receiver: Receiver<FilterCommand>,
    running: Arc<Mutex<bool>>,
    engine_thread: Mutex<Option<thread::JoinHandle<EngineReport>>>,
    frame_stats: Arc<Mutex<Option<(f32, f32)>>>, // (fps, frame_time_ms)
    last_report: Mutex<Option<EngineReport>>,
}

impl FilterEngine {
    pub fn new(mut session: FilterSession) -> Self {
        let snapshot = Arc::new(SnapshotCell::new(session.build_state()));
        let (command_sender, command_receiver) = unbounded();

        Self {
            session: Arc::new(Mutex::new(session)),
            snapshot,
            command_sender,
            command_receiver,
            running: Arc::new(Mutex::new(false)),
            engine_thread: Mutex::new(None),
            frame_stats: Arc::new(Mutex::new(None)),
            last_report: Mutex::new(None),
        }
    }

    pub fn commands(&self) -> Sender<FilterCommand> {
        self.command_sender.clone()
    }

    pub fn send(&self, command: FilterCommand) {
        let _ = self.command_sender.send(command);
    }

    pub fn snapshot(&self) -> Arc<SnapshotCell> {
        Arc::clone(&self.snapshot)
    }

    /// Run `f` against the session. Held briefly; the frame thread takes the
    /// same lock once per tick.
    pub fn with_session<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut FilterSession) -> R,
    {
        f(&mut self.session.lock())
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    pub fn get_frame_stats(&self) -> Option<(f32, f32)> {
        *self.frame_stats.lock()
    }

    pub fn last_report(&self) -> Option<EngineReport> {
        *self.last_report.lock()
    }

    pub fn start<S, K>(&self, source: S, sink: K, config: EngineConfig)
    where
        S: FrameSource + 'static,
        K: FrameSink + 'static,
    {
        if self.is_running() {
            return;
        }

        // A previous stream that ended on its own still needs joining
        if let Some(handle) = self.engine_thread.lock().take() {
            if let Ok(report) = handle.join() {
                *self.last_report.lock() = Some(report);
            }
        }

        let mut running = self.running.lock();
        if *running {
            return;
        }

        let stream = StreamLoop {
            session: Arc::clone(&self.session),
            snapshot: Arc::clone(&self.snapshot),
            commands: self.command_receiver.clone(),
            running: Arc::clone(&self.running),
            frame_stats: Arc::clone(&self.frame_stats),
            config,
        };
        *running = true;

        let handle = thread::spawn(move || {
            log_info!("Engine thread started");
            let report = stream.run(source, sink);
            *stream.running.lock() = false;
            log_info!(
                "Engine thread ended ({} presented, {} skipped, {} errors)",
                report.frames_presented,
                report.frames_skipped,
                report.errors
            );
            report
        });

        *self.engine_thread.lock() = Some(handle);
        log_info!(
            "Engine started (target fps: {})",
            config.target_fps.map_or("unpaced".to_string(), |f| f.to_string())
        );
    }

    /// Block until the current stream ends by itself.
    pub fn wait(&self) -> Option<EngineReport> {
        let handle = self.engine_thread.lock().take()?;
        match handle.join() {
            Ok(report) => {
                *self.last_report.lock() = Some(report);
                *self.frame_stats.lock() = None;
                Some(report)
            }
            Err(_) => {
                log_error!("Engine thread panicked");
                *self.running.lock() = false;
                None
            }
        }
    }

    pub fn stop(&self) {
        let mut running = self.running.lock();
        if !*running {
            drop(running);
            self.wait();
            return;
        }

        *running = false;
        drop(running);

        self.wait();
        log_info!("Engine stopped");
    }
}

impl Drop for FilterEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct StreamLoop {
    session: Arc<Mutex<FilterSession>>,
    snapshot: Arc<SnapshotCell>,
    commands: Receiver<FilterCommand>,
    running: Arc<Mutex<bool>>,
    frame_stats: Arc<Mutex<Option<(f32, f32)>>>,
    config: EngineConfig,
}

impl StreamLoop {
    /// Apply every queued command, then publish once if anything changed.
    fn drain_commands(&self, last_frame: Option<&RgbaImage>, report: &mut EngineReport) {
        let mut session = self.session.lock();

        for command in self.commands.try_iter() {
            match session.apply(command.clone(), last_frame) {
                Ok(()) => report.commands_applied += 1,
                Err(e) => log_warn!("Command {:?} rejected: {}", command, e),
            }
        }

        if session.is_dirty() {
            self.snapshot.publish(session.build_state());
        }
    }

    fn run<S: FrameSource, K: FrameSink>(&self, mut source: S, mut sink: K) -> EngineReport {
        // Created on stream start, dropped on stream end
        let mut ctx = RenderContext::new(Arc::clone(&self.snapshot));
        let mut report = EngineReport::default();
        let mut last_frame: Option<RgbaImage> = None;

        let mut last_error_log = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        let mut frame_times: Vec<(f32, f32)> = Vec::with_capacity(60);
        let mut last_stats_update = Instant::now();
        let mut last_low_fps_warning: Option<Instant> = None;
        let mut last_frame_time = Instant::now();

        let target_frame_duration = frame_duration(self.config.target_fps);
        if let (Some(fps), None) = (self.config.target_fps, target_frame_duration) {
            log_warn!("Target fps {} unusable, running unpaced", fps);
        }

        loop {
            if !*self.running.lock() {
                log_info!("Engine stop requested");
                break;
            }
            if self.config.max_frames.is_some_and(|max| report.frames_presented >= max) {
                break;
            }

            self.drain_commands(last_frame.as_ref(), &mut report);

            let frame_start = Instant::now();

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log_info!("Frame source exhausted");
                    break;
                }
                Err(e) => {
                    report.errors += 1;
                    if last_error_log.elapsed().as_secs() >= 1 {
                        log_error!("Source error (count: {}): {:#}", report.errors, e);
                        last_error_log = Instant::now();
                    }
                    spin_sleep::sleep(target_frame_duration.unwrap_or(SOURCE_RETRY_DELAY));
                    last_frame_time = Instant::now();
                    continue;
                }
            };

            match ctx.render(&frame) {
                Ok(out) => {
                    if let Err(e) = sink.present(report.frames_presented, &out) {
                        report.errors += 1;
                        if last_error_log.elapsed().as_secs() >= 1 {
                            log_error!("Present error (count: {}): {:#}", report.errors, e);
                            last_error_log = Instant::now();
                        }
                    } else {
                        report.frames_presented += 1;
                    }
                }
                Err(FilterError::EmptyFrame) => {
                    report.frames_skipped += 1;
                    log_warn!("Skipped empty frame");
                }
                Err(e) => {
                    report.errors += 1;
                    if last_error_log.elapsed().as_secs() >= 1 {
                        log_error!("Render error (count: {}): {}", report.errors, e);
                        last_error_log = Instant::now();
                    }
                }
            }
            last_frame = Some(frame);

            let render_time_ms = frame_start.elapsed().as_secs_f32() * 1000.0;

            if let Some(target_frame_duration) = target_frame_duration {
                let elapsed_since_last = last_frame_time.elapsed();
                if elapsed_since_last < target_frame_duration {
                    spin_sleep::sleep(target_frame_duration - elapsed_since_last);
                }
            }

            let now = Instant::now();
            let total_frame_time_ms = now.duration_since(last_frame_time).as_secs_f32() * 1000.0;
            last_frame_time = now;
            frame_times.push((render_time_ms, total_frame_time_ms));

            if last_stats_update.elapsed().as_millis() >= 100 && !frame_times.is_empty() {
                let (sum_render, sum_total): (f32, f32) = frame_times
                    .iter()
                    .fold((0.0, 0.0), |(r, t), &(render, total)| (r + render, t + total));
                let avg_render_time = sum_render / frame_times.len() as f32;
                let avg_total_time = sum_total / frame_times.len() as f32;

                let fps = if avg_total_time > 0.0 {
                    1000.0 / avg_total_time
                } else {
                    0.0
                };

                *self.frame_stats.lock() = Some((fps, avg_render_time));

                // Only meaningful once the rolling window is full
                if fps < LOW_FPS_THRESHOLD && frame_times.len() >= 60 {
                    let due = last_low_fps_warning.map_or(true, |t| t.elapsed() >= LOW_FPS_WARN_INTERVAL);
                    if due {
                        log_warn!("Frame rate {:.1} fps below {} (render {:.2} ms)", fps, LOW_FPS_THRESHOLD, avg_render_time);
                        last_low_fps_warning = Some(Instant::now());
                    }
                }

                if frame_times.len() > 60 {
                    frame_times.drain(0..frame_times.len() - 60);
                }

                last_stats_update = Instant::now();
            }
        }

        // Edits queued after the last frame still land in the session
        self.drain_commands(last_frame.as_ref(), &mut report);

        if report.errors > 0 {
            log_warn!("Exiting with {} errors encountered", report.errors);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::ChipMode;
    use crate::color::Rgb;
    use image::Rgba;

    struct VecSink(Arc<Mutex<Vec<RgbaImage>>>);

    impl FrameSink for VecSink {
        fn present(&mut self, _index: u64, frame: &RgbaImage) -> Result<()> {
            self.0.lock().push(frame.clone());
            Ok(())
        }
    }

    struct ScriptedSource(VecDeque<RgbaImage>);

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
            Ok(self.0.pop_front())
        }
    }

    /// Fails a fixed number of times, then ends.
    struct FailingSource(u32);

    impl FrameSource for FailingSource {
        fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
            if self.0 == 0 {
                return Ok(None);
            }
            self.0 -= 1;
            anyhow::bail!("capture lost")
        }
    }

    fn unpaced(max_frames: Option<u64>) -> EngineConfig {
        EngineConfig {
            target_fps: None,
            max_frames,
        }
    }

    #[test]
    fn test_still_source_repeats() {
        let mut source = StillImageSource::new(RgbaImage::new(1, 1), Some(2));
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_engine_runs_to_completion() {
        let engine = FilterEngine::new(FilterSession::default());
        let frames = Arc::new(Mutex::new(Vec::new()));
        let source = StillImageSource::new(RgbaImage::from_pixel(2, 2, Rgba([9, 8, 7, 255])), Some(5));

        engine.start(source, VecSink(Arc::clone(&frames)), unpaced(None));
        let report = engine.wait().unwrap();

        assert_eq!(report.frames_presented, 5);
        assert_eq!(frames.lock().len(), 5);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_empty_frames_are_skipped() {
        let engine = FilterEngine::new(FilterSession::default());
        let source = ScriptedSource(VecDeque::from(vec![
            RgbaImage::new(1, 1),
            RgbaImage::new(0, 0),
            RgbaImage::new(1, 1),
        ]));

        engine.start(source, NullSink, unpaced(None));
        let report = engine.wait().unwrap();
        assert_eq!(report.frames_presented, 2);
        assert_eq!(report.frames_skipped, 1);
    }

    #[test]
    fn test_commands_are_applied_and_published() {
        let engine = FilterEngine::new(FilterSession::default());
        let initial = engine.snapshot().version();

        engine.send(FilterCommand::AddChip {
            color: Rgb::new(1.0, 0.0, 0.0),
            mode: ChipMode::Include,
        });
        engine.send(FilterCommand::SelectPreset("does-not-exist".to_string()));
        engine.send(FilterCommand::SetTreatment(crate::packer::UnselectedTreatment::Passthrough));

        let frames = Arc::new(Mutex::new(Vec::new()));
        let source = StillImageSource::new(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 255, 255])), Some(1));
        engine.start(source, VecSink(Arc::clone(&frames)), unpaced(None));
        let report = engine.wait().unwrap();

        assert_eq!(report.commands_applied, 2);
        // Three commands, one repack
        assert_eq!(engine.snapshot().version(), initial + 1);
        assert_eq!(engine.snapshot().load().block.active_count, 1);
        // Blue is outside the red window and passes through untouched
        assert_eq!(frames.lock()[0].get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_max_frames_limits_endless_source() {
        let engine = FilterEngine::new(FilterSession::default());
        let source = StillImageSource::new(RgbaImage::new(1, 1), None);
        engine.start(source, NullSink, unpaced(Some(3)));
        assert_eq!(engine.wait().map(|r| r.frames_presented), Some(3));
    }

    #[test]
    fn test_stop_ends_endless_stream() {
        let engine = FilterEngine::new(FilterSession::default());
        let source = StillImageSource::new(RgbaImage::new(1, 1), None);
        engine.start(source, NullSink, EngineConfig::default());
        std::thread::sleep(Duration::from_millis(400));
        assert!(engine.is_running());
        assert!(engine.get_frame_stats().is_some());

        engine.stop();
        assert!(!engine.is_running());
        assert!(engine.last_report().is_some_and(|r| r.frames_presented > 0));
    }

    #[test]
    fn test_target_fps_range() {
        assert_eq!(validate_target_fps(30.0), Ok(30.0));
        assert_eq!(validate_target_fps(MAX_TARGET_FPS), Ok(MAX_TARGET_FPS));
        for bad in [0.0, -5.0, 1e-39, MAX_TARGET_FPS + 1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                validate_target_fps(bad),
                Err(FilterError::InvalidRange { field: "target_fps", .. })
            ));
        }
    }

    #[test]
    fn test_frame_duration_falls_back_to_unpaced() {
        assert_eq!(frame_duration(None), None);
        assert_eq!(frame_duration(Some(1e-39)), None);
        assert_eq!(frame_duration(Some(0.0)), None);
        let d = frame_duration(Some(50.0)).unwrap();
        assert!((d.as_secs_f32() - 0.02).abs() < 1e-4);
    }

    #[test]
    fn test_tiny_fps_does_not_kill_frame_thread() {
        let engine = FilterEngine::new(FilterSession::default());
        let source = StillImageSource::new(RgbaImage::new(1, 1), Some(2));
        engine.start(
            source,
            NullSink,
            EngineConfig {
                target_fps: Some(1e-39),
                max_frames: None,
            },
        );
        assert_eq!(engine.wait().map(|r| r.frames_presented), Some(2));
    }

    #[test]
    fn test_failing_source_is_paced() {
        let engine = FilterEngine::new(FilterSession::default());
        let started = Instant::now();
        engine.start(
            FailingSource(3),
            NullSink,
            EngineConfig {
                target_fps: Some(50.0),
                max_frames: None,
            },
        );
        let report = engine.wait().unwrap();

        assert_eq!(report.errors, 3);
        assert_eq!(report.frames_presented, 0);
        assert!(started.elapsed() >= Duration::from_millis(55));
    }
}
