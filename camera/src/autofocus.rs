//! Autofocus engine
//!
//! Sweeps the focuser through a range of positions, scores a thumbnail from
//! each position with the Vollath F4 metric and moves to the sharpest one.
//! An optional coarse pass runs first; the fine pass waits for it and then
//! fits a Lorentzian around the best sample for sub-step precision.
//!
//! Both passes run as tokio tasks. Completion is published on a
//! [`tokio::sync::watch`] channel that is written exactly once, so callers
//! may block on the result or poll it later.

use crate::error::{CameraError, CameraResult};
use crate::fit::{fit_peak, PeakFit};
use crate::image::{ImageFrame, SharpnessAxis};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use observatory_indi::IndiFocuser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// A focuser the engine can drive
#[async_trait]
pub trait FocuserDevice: Send + Sync {
    fn name(&self) -> &str;
    async fn is_connected(&self) -> bool;
    async fn position(&self) -> CameraResult<i32>;
    fn min_position(&self) -> i32;
    fn max_position(&self) -> i32;
    /// Move and return the position actually reached
    async fn move_to(&self, position: i32) -> CameraResult<i32>;
    /// Sweep widths as (fine, coarse)
    fn autofocus_range(&self) -> Option<(i32, i32)>;
    /// Sweep steps as (fine, coarse)
    fn autofocus_step(&self) -> Option<(i32, i32)>;
    fn autofocus_seconds(&self) -> Option<f64>;
}

/// A camera that can take an exposure to a file
#[async_trait]
pub trait Camera: Send + Sync {
    fn name(&self) -> &str;
    async fn uid(&self) -> String;
    async fn is_connected(&self) -> bool;
    fn file_extension(&self) -> &str;
    /// Expose for `seconds`, returning once the file is written
    async fn take_exposure(&self, seconds: f64, path: &Path) -> CameraResult<()>;
}

/// Loads exposures written by a [`Camera`]
#[async_trait]
pub trait FrameStore: Send + Sync {
    /// Read the frame at `path` and delete the file
    async fn read_and_remove(&self, path: &Path) -> CameraResult<ImageFrame>;
}

/// Persists the diagnostic record of a focus pass
#[async_trait]
pub trait FocusPlotWriter: Send + Sync {
    async fn write(&self, plot: &FocusPlot) -> CameraResult<()>;
}

#[async_trait]
impl FocuserDevice for IndiFocuser {
    fn name(&self) -> &str {
        self.device_name()
    }

    async fn is_connected(&self) -> bool {
        IndiFocuser::is_connected(self).await
    }

    async fn position(&self) -> CameraResult<i32> {
        Ok(IndiFocuser::position(self).await?)
    }

    fn min_position(&self) -> i32 {
        self.config().min_position
    }

    fn max_position(&self) -> i32 {
        self.config().max_position
    }

    async fn move_to(&self, position: i32) -> CameraResult<i32> {
        Ok(IndiFocuser::move_to(self, position).await?)
    }

    fn autofocus_range(&self) -> Option<(i32, i32)> {
        self.config().autofocus_range
    }

    fn autofocus_step(&self) -> Option<(i32, i32)> {
        self.config().autofocus_step
    }

    fn autofocus_seconds(&self) -> Option<f64> {
        self.config().autofocus_seconds
    }
}

/// One measured position of a sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FocusSample {
    pub position: i32,
    pub metric: f64,
}

/// Outcome of a focus pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FocusRunResult {
    pub initial_position: Option<i32>,
    pub final_position: Option<i32>,
    pub succeeded: bool,
    /// The sweep did not bracket the peak; the boundary sample was used
    pub degraded: bool,
    pub reason: Option<String>,
}

impl FocusRunResult {
    pub fn failed(initial_position: Option<i32>, reason: impl Into<String>) -> Self {
        Self {
            initial_position,
            final_position: None,
            succeeded: false,
            degraded: false,
            reason: Some(reason.into()),
        }
    }
}

/// Everything needed to draw the diagnostic plot of a pass
#[derive(Debug, Clone)]
pub struct FocusPlot {
    pub camera: String,
    pub coarse: bool,
    pub started_at: DateTime<Utc>,
    pub initial_position: i32,
    pub samples: Vec<FocusSample>,
    /// Fitted model and the position range it was fitted over
    pub fit: Option<(PeakFit, (i32, i32))>,
    pub best_focus: f64,
    pub final_position: i32,
    pub initial_thumbnail: Option<ImageFrame>,
    pub final_thumbnail: ImageFrame,
    pub path: PathBuf,
}

/// Parameters of an autofocus run
#[derive(Debug, Clone)]
pub struct AutofocusRequest {
    /// Run a coarse pass before the fine pass
    pub coarse: bool,
    /// Return only after the fine pass has finished
    pub blocking: bool,
    /// Exposure time, defaults to the focuser's
    pub seconds: Option<f64>,
    /// Sweep widths as (fine, coarse), defaults to the focuser's
    pub focus_range: Option<(i32, i32)>,
    /// Sweep steps as (fine, coarse), defaults to the focuser's
    pub focus_step: Option<(i32, i32)>,
    pub thumbnail_size: usize,
    pub write_plots: bool,
}

impl Default for AutofocusRequest {
    fn default() -> Self {
        Self {
            coarse: false,
            blocking: false,
            seconds: None,
            focus_range: None,
            focus_step: None,
            thumbnail_size: 750,
            write_plots: true,
        }
    }
}

/// Progress notifications, in the order they happen within a pass
#[derive(Debug, Clone, PartialEq)]
pub enum AutofocusEvent {
    PassStarted { coarse: bool },
    Moved { coarse: bool, position: i32 },
    PassFinished { coarse: bool, result: FocusRunResult },
}

pub type EventSink = Arc<dyn Fn(AutofocusEvent) + Send + Sync>;

/// Completion signal of the fine pass
#[derive(Clone)]
pub struct AutofocusHandle {
    rx: watch::Receiver<Option<FocusRunResult>>,
}

impl AutofocusHandle {
    /// Wait for the run to finish
    pub async fn wait(&mut self) -> FocusRunResult {
        let result = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map(|value| (*value).clone());
        match result {
            Ok(Some(result)) => result,
            _ => FocusRunResult::failed(None, "autofocus task ended without a result"),
        }
    }

    pub fn try_result(&self) -> Option<FocusRunResult> {
        self.rx.borrow().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

/// Best-focus choice for a sweep
#[derive(Debug, Clone, PartialEq)]
pub struct FocusSelection {
    pub best_focus: f64,
    pub imax: usize,
    pub degraded: bool,
    pub fit: Option<(PeakFit, (i32, i32))>,
}

/// Positions of a sweep centred on `initial`, clipped to the travel limits
pub fn sweep_positions(initial: i32, range: i32, step: i32, min: i32, max: i32) -> Vec<i32> {
    if step <= 0 {
        return Vec::new();
    }
    let start = (initial - range / 2).max(min);
    let end = (initial + range / 2).min(max);
    (start..=end).step_by(step as usize).collect()
}

/// Pick the best focus from a sweep
///
/// A maximum at either end of the sweep means the peak was not bracketed:
/// the boundary position is returned and the selection is marked degraded.
/// Non-finite metrics (frames full of bad pixels) never win.
pub fn select_best_focus(samples: &[FocusSample], coarse: bool) -> Option<FocusSelection> {
    let (imax, _) = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.metric.is_finite())
        .fold(None, |best: Option<(usize, f64)>, (i, s)| match best {
            Some((_, m)) if s.metric <= m => best,
            _ => Some((i, s.metric)),
        })?;

    let at_sample = |degraded| FocusSelection {
        best_focus: samples[imax].position as f64,
        imax,
        degraded,
        fit: None,
    };

    if imax == 0 || imax == samples.len() - 1 {
        return Some(at_sample(true));
    }
    if coarse {
        return Some(at_sample(false));
    }

    let lo = imax.saturating_sub(2);
    let hi = (imax + 2).min(samples.len() - 1);
    let window = &samples[lo..=hi];
    if window.iter().any(|s| !s.metric.is_finite()) {
        return Some(at_sample(false));
    }
    let xs: Vec<f64> = window.iter().map(|s| s.position as f64).collect();
    let ys: Vec<f64> = window.iter().map(|s| s.metric).collect();
    let estimate = fit_peak(&xs, &ys, imax - lo);

    Some(FocusSelection {
        best_focus: estimate.center,
        imax,
        degraded: false,
        fit: estimate
            .model
            .map(|model| (model, (samples[lo].position, samples[hi].position))),
    })
}

/// Autofocus engine for one camera and its focuser
#[derive(Clone)]
pub struct Autofocus {
    camera: Arc<dyn Camera>,
    focuser: Option<Arc<dyn FocuserDevice>>,
    frames: Arc<dyn FrameStore>,
    plots: Option<Arc<dyn FocusPlotWriter>>,
    image_dir: PathBuf,
    events: Option<EventSink>,
}

impl Autofocus {
    pub fn new(
        camera: Arc<dyn Camera>,
        focuser: Option<Arc<dyn FocuserDevice>>,
        frames: Arc<dyn FrameStore>,
        image_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            camera,
            focuser,
            frames,
            plots: None,
            image_dir: image_dir.into(),
            events: None,
        }
    }

    pub fn with_plot_writer(mut self, plots: Arc<dyn FocusPlotWriter>) -> Self {
        self.plots = Some(plots);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    pub fn camera(&self) -> &Arc<dyn Camera> {
        &self.camera
    }

    fn emit(&self, event: AutofocusEvent) {
        if let Some(events) = &self.events {
            events(event);
        }
    }

    /// Start an autofocus run
    ///
    /// The camera must be connected. A missing or disconnected focuser is
    /// reported through the returned handle, not as an error.
    pub async fn run_autofocus(&self, request: AutofocusRequest) -> CameraResult<AutofocusHandle> {
        if !self.camera.is_connected().await {
            return Err(CameraError::InvalidState(format!(
                "Camera {} must be connected for autofocus",
                self.camera.name()
            )));
        }

        let gate = if request.coarse {
            let (coarse_tx, coarse_rx) = watch::channel(None);
            let engine = self.clone();
            let coarse_request = request.clone();
            tokio::spawn(async move {
                let result = engine.run_pass(&coarse_request, true).await;
                engine.emit(AutofocusEvent::PassFinished {
                    coarse: true,
                    result: result.clone(),
                });
                let _ = coarse_tx.send(Some(result));
            });
            Some(coarse_rx)
        } else {
            None
        };

        let (fine_tx, fine_rx) = watch::channel(None);
        let engine = self.clone();
        let fine_request = request.clone();
        tokio::spawn(async move {
            if let Some(mut gate) = gate {
                let opened = gate.wait_for(Option::is_some).await.is_ok();
                if !opened {
                    tracing::warn!("Coarse focus ended without a result, continuing with fine focus");
                }
            }
            let result = engine.run_pass(&fine_request, false).await;
            engine.emit(AutofocusEvent::PassFinished {
                coarse: false,
                result: result.clone(),
            });
            let _ = fine_tx.send(Some(result));
        });

        let mut handle = AutofocusHandle { rx: fine_rx };
        if request.blocking {
            handle.wait().await;
        }
        Ok(handle)
    }

    async fn run_pass(&self, request: &AutofocusRequest, coarse: bool) -> FocusRunResult {
        self.emit(AutofocusEvent::PassStarted { coarse });
        let mut initial = None;
        match self.try_pass(request, coarse, &mut initial).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Autofocus of {} failed: {}", self.camera.name(), e);
                FocusRunResult::failed(initial, e.to_string())
            }
        }
    }

    async fn try_pass(
        &self,
        request: &AutofocusRequest,
        coarse: bool,
        initial: &mut Option<i32>,
    ) -> CameraResult<FocusRunResult> {
        let camera = self.camera.name();
        let Some(focuser) = self.focuser.clone() else {
            tracing::error!("Attempted to autofocus but camera {} has no focuser", camera);
            return Ok(FocusRunResult::failed(None, "no focuser"));
        };
        if !focuser.is_connected().await {
            tracing::error!("Attempted to autofocus but the focuser of {} is not connected", camera);
            return Ok(FocusRunResult::failed(None, "focuser not connected"));
        }

        let Some(ranges) = request.focus_range.or_else(|| focuser.autofocus_range()) else {
            tracing::error!("No focus range specified, aborting autofocus of {}", camera);
            return Ok(FocusRunResult::failed(None, "no focus range"));
        };
        let Some(steps) = request.focus_step.or_else(|| focuser.autofocus_step()) else {
            tracing::error!("No focus step specified, aborting autofocus of {}", camera);
            return Ok(FocusRunResult::failed(None, "no focus step"));
        };
        let Some(seconds) = request.seconds.or_else(|| focuser.autofocus_seconds()) else {
            tracing::error!("No focus exposure time specified, aborting autofocus of {}", camera);
            return Ok(FocusRunResult::failed(None, "no focus exposure time"));
        };
        let (range, step) = if coarse {
            (ranges.1, steps.1)
        } else {
            (ranges.0, steps.0)
        };
        let kind = if coarse { "coarse" } else { "fine" };

        let initial_position = focuser.position().await?;
        *initial = Some(initial_position);
        tracing::debug!(
            "Beginning {} autofocus of {} - initial focus position: {}",
            kind,
            camera,
            initial_position
        );

        let started_at = Utc::now();
        let file_path = self
            .image_dir
            .join("focus")
            .join(self.camera.uid().await)
            .join(format!(
                "{}.{}",
                started_at.format("%Y%m%dT%H%M%S"),
                self.camera.file_extension()
            ));

        let initial_thumbnail = if request.write_plots {
            Some(self.thumbnail(seconds, &file_path, request.thumbnail_size).await?)
        } else {
            None
        };

        let positions = sweep_positions(
            initial_position,
            range,
            step,
            focuser.min_position(),
            focuser.max_position(),
        );
        let mut samples = Vec::with_capacity(positions.len());
        for position in positions {
            let actual = focuser.move_to(position).await?;
            self.emit(AutofocusEvent::Moved { coarse, position: actual });

            let thumbnail = self.thumbnail(seconds, &file_path, request.thumbnail_size).await?;
            let metric = thumbnail.vollath_f4(SharpnessAxis::Y);
            tracing::debug!("F4 at position {}: {}", actual, metric);
            samples.push(FocusSample { position: actual, metric });
        }

        let selection = select_best_focus(&samples, coarse).ok_or_else(|| {
            CameraError::InvalidState(format!(
                "Empty {} focus sweep around {} (range {}, step {})",
                kind, initial_position, range, step
            ))
        })?;
        if selection.degraded {
            tracing::warn!("Best focus outside sweep range, aborting autofocus on {}", camera);
        }

        let final_position = focuser.move_to(selection.best_focus.round() as i32).await?;
        self.emit(AutofocusEvent::Moved {
            coarse,
            position: final_position,
        });
        let final_thumbnail = self.thumbnail(seconds, &file_path, request.thumbnail_size).await?;

        if request.write_plots {
            if let Some(writer) = &self.plots {
                let plot = FocusPlot {
                    camera: camera.to_string(),
                    coarse,
                    started_at,
                    initial_position,
                    samples,
                    fit: selection.fit,
                    best_focus: selection.best_focus,
                    final_position,
                    initial_thumbnail,
                    final_thumbnail,
                    path: file_path.with_extension("png"),
                };
                match writer.write(&plot).await {
                    Ok(()) => tracing::info!(
                        "{} focus plot for camera {} written to {}",
                        if coarse { "Coarse" } else { "Fine" },
                        camera,
                        plot.path.display()
                    ),
                    Err(e) => tracing::warn!("Could not write focus plot for {}: {}", camera, e),
                }
            }
        }

        tracing::debug!(
            "Autofocus of {} complete - final focus position: {}",
            camera,
            final_position
        );
        Ok(FocusRunResult {
            initial_position: Some(initial_position),
            final_position: Some(final_position),
            succeeded: true,
            degraded: selection.degraded,
            reason: selection
                .degraded
                .then(|| "best focus at edge of sweep range".to_string()),
        })
    }

    async fn thumbnail(&self, seconds: f64, path: &Path, size: usize) -> CameraResult<ImageFrame> {
        self.camera.take_exposure(seconds, path).await?;
        let frame = self.frames.read_and_remove(path).await?;
        Ok(frame.crop_centered(size))
    }
}
