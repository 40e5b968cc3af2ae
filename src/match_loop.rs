//! Periodic matching and preview controllers
//!
//! Two independent periodic tasks share read access to the template store:
//! the match loop (frame acquisition + detection + matching per tick) and
//! the preview loop (frame acquisition only, on a longer period). Ticks run
//! to completion and never overlap; a missed tick is delayed, not stacked.
//! Transient capture failures skip the tick and never stop the loop.

use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, RgbImage};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::feature_match::{
    FeatureDetector, FeatureError, MatchResult, MatchTuning, TemplateStore, rank_matches,
};
use crate::window::{FrameSource, WindowHandle};

const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopCommand {
    Start,
    Stop,
    SetPeriod(Duration),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopState {
    Idle,
    Running,
}

/// Periodic controller that matches every stored template against the
/// latest frame of the connected window.
pub struct MatchLoop<F: FrameSource> {
    store: Arc<RwLock<TemplateStore>>,
    frames: Arc<F>,
    hwnd: WindowHandle,
    detector: FeatureDetector,
    tuning: MatchTuning,
    period: Duration,
    state: LoopState,
    command_rx: mpsc::Receiver<LoopCommand>,
    results_tx: watch::Sender<Vec<MatchResult>>,
}

impl<F: FrameSource> MatchLoop<F> {
    pub fn new(
        store: Arc<RwLock<TemplateStore>>,
        frames: Arc<F>,
        hwnd: WindowHandle,
        detector: FeatureDetector,
        tuning: MatchTuning,
        period: Duration,
    ) -> (
        Self,
        mpsc::Sender<LoopCommand>,
        watch::Receiver<Vec<MatchResult>>,
    ) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (results_tx, results_rx) = watch::channel(Vec::new());
        (
            Self {
                store,
                frames,
                hwnd,
                detector,
                tuning,
                period,
                state: LoopState::Idle,
                command_rx,
                results_tx,
            },
            command_tx,
            results_rx,
        )
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Drive the loop until `Shutdown` or all command senders drop.
    pub async fn run(mut self) {
        loop {
            match self.state {
                LoopState::Idle => match self.command_rx.recv().await {
                    Some(cmd) => {
                        if self.handle_command(cmd) {
                            return;
                        }
                    }
                    None => return,
                },
                LoopState::Running => {
                    let mut ticker = tokio::time::interval(self.period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    // First tick of a fresh interval fires immediately
                    ticker.tick().await;

                    while self.state == LoopState::Running {
                        tokio::select! {
                            // Commands win over a due tick, so Stop takes
                            // effect before the next tick fires
                            biased;
                            cmd = self.command_rx.recv() => match cmd {
                                Some(cmd) => {
                                    if self.handle_command(cmd) {
                                        return;
                                    }
                                    // Period changes need a fresh interval
                                    if matches!(cmd, LoopCommand::SetPeriod(_)) {
                                        break;
                                    }
                                }
                                None => return,
                            },
                            _ = ticker.tick() => self.tick().await,
                        }
                    }
                }
            }
        }
    }

    /// Returns true when the loop should shut down.
    fn handle_command(&mut self, cmd: LoopCommand) -> bool {
        match cmd {
            LoopCommand::Start => {
                if self.state == LoopState::Idle {
                    log::info!("match loop started, period {:?}", self.period);
                    self.state = LoopState::Running;
                }
                false
            }
            LoopCommand::Stop => {
                if self.state == LoopState::Running {
                    log::info!("match loop stopped");
                    self.state = LoopState::Idle;
                }
                false
            }
            LoopCommand::SetPeriod(period) => {
                self.period = period;
                false
            }
            LoopCommand::Shutdown => true,
        }
    }

    /// One synchronous-to-completion match cycle.
    async fn tick(&self) {
        let frame = match self.frames.capture(self.hwnd) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                // Window minimized, occluded, or closing; expected
                log::debug!(
                    "skipping tick: {}",
                    FeatureError::FrameUnavailable { hwnd: self.hwnd }
                );
                return;
            }
            Err(e) => {
                log::warn!("frame capture failed for {:#x}: {e}", self.hwnd);
                return;
            }
        };

        let gray = DynamicImage::ImageRgb8(frame).to_luma8();

        // Detection is deterministic, so one full-frame pass serves every
        // template this tick with identical observable results
        let (frame_keypoints, frame_descriptors) = match self.detector.detect(&gray, None) {
            Ok(detection) => detection,
            Err(e) => {
                log::warn!("frame detection failed: {e}");
                return;
            }
        };

        let templates = self.store.read().await.snapshot();
        let results = rank_matches(
            &templates,
            &frame_keypoints,
            frame_descriptors.as_ref(),
            &self.tuning,
        );

        if !results.is_empty() {
            log::debug!(
                "tick matched {} of {} templates",
                results.len(),
                templates.len()
            );
        }
        self.results_tx.send_replace(results);
    }
}

/// Periodic frame refresh for live preview; no matching, just the latest
/// frame published for the UI to render.
pub struct PreviewLoop<F: FrameSource> {
    frames: Arc<F>,
    hwnd: WindowHandle,
    period: Duration,
    state: LoopState,
    command_rx: mpsc::Receiver<LoopCommand>,
    frame_tx: watch::Sender<Option<RgbImage>>,
}

impl<F: FrameSource> PreviewLoop<F> {
    pub fn new(
        frames: Arc<F>,
        hwnd: WindowHandle,
        period: Duration,
    ) -> (
        Self,
        mpsc::Sender<LoopCommand>,
        watch::Receiver<Option<RgbImage>>,
    ) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (frame_tx, frame_rx) = watch::channel(None);
        (
            Self {
                frames,
                hwnd,
                period,
                state: LoopState::Idle,
                command_rx,
                frame_tx,
            },
            command_tx,
            frame_rx,
        )
    }

    pub async fn run(mut self) {
        loop {
            match self.state {
                LoopState::Idle => match self.command_rx.recv().await {
                    Some(LoopCommand::Start) => self.state = LoopState::Running,
                    Some(LoopCommand::SetPeriod(period)) => self.period = period,
                    Some(LoopCommand::Stop) => {}
                    Some(LoopCommand::Shutdown) | None => return,
                },
                LoopState::Running => {
                    let mut ticker = tokio::time::interval(self.period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker.tick().await;

                    while self.state == LoopState::Running {
                        tokio::select! {
                            biased;
                            cmd = self.command_rx.recv() => match cmd {
                                Some(LoopCommand::Stop) => self.state = LoopState::Idle,
                                Some(LoopCommand::Start) => {}
                                Some(LoopCommand::SetPeriod(period)) => {
                                    self.period = period;
                                    break;
                                }
                                Some(LoopCommand::Shutdown) | None => return,
                            },
                            _ = ticker.tick() => {
                                match self.frames.capture(self.hwnd) {
                                    Ok(frame @ Some(_)) => {
                                        self.frame_tx.send_replace(frame);
                                    }
                                    Ok(None) => {}
                                    Err(e) => log::debug!("preview capture failed: {e}"),
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
