//! Segment playback state machine.
//!
//! Drives one segment at a time through play, optional pause, optional
//! dialogue and choices, then advances along the story graph. Every wait is
//! a named [`PlaybackState`] that the frame loop re-evaluates on each
//! [`StoryPlayer::tick`]; nothing blocks. Entering a new segment replaces the
//! state wholesale, so at most one segment's waits are ever live.

use crate::error::Error;
use crate::progress::{Flags, Progress, ProgressStore};
use crate::scheduler::{DualBufferScheduler, StartWait};
use crate::storage::KeyValueStore;
use crate::story::{Choice, Dialogue, PauseSpec, Segment, SegmentGraph};
use crate::video::VideoPlayer;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Upper bound on state transitions evaluated within one tick.
const MAX_TRANSITIONS_PER_TICK: usize = 32;

/// Discrete UI actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// Continue button or click.
    Continue,
    /// Button `n` of whichever button set is shown (pause or choice).
    Select(usize),
    /// Skip the rest of the current segment.
    Skip,
}

/// Where the state machine is suspended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackState {
    /// Not started, or stopped by a progress reset.
    Idle,
    /// Video starting or running; waits for the pause offset if the segment has one.
    Playing { played: Duration },
    /// Video paused, pause buttons shown.
    Paused,
    /// Auto-continue segment waiting for its video to finish.
    AwaitingEnd,
    AwaitingDialogue,
    AwaitingChoice,
    AwaitingClick,
    /// Looping auto-continue segment; only a skip moves on.
    Holding,
    /// No next segment.
    Terminal,
    /// The segment could not be played.
    Failed,
}

impl PlaybackState {
    /// States a skip can interrupt.
    pub fn is_live(&self) -> bool {
        !matches!(
            self,
            PlaybackState::Idle | PlaybackState::Terminal | PlaybackState::Failed
        )
    }
}

/// Signals for collaborators, drained with [`StoryPlayer::drain_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    SegmentStarted { index: usize, name: String },
    VideoFinished { index: usize },
    Paused { index: usize },
    Resumed { index: usize },
    ChoiceMade { index: usize, choice: usize, target: usize },
    FlagSet(String),
    ProgressSaved { index: usize },
    Skipped { from: usize },
    Terminal { index: usize },
    SegmentFailed { index: usize, reason: String },
}

/// What the UI should currently show.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prompt<'a> {
    Dialogue(&'a Dialogue),
    Choices(&'a [Choice]),
    Pause(&'a PauseSpec),
    Continue,
}

pub struct StoryPlayer<P, S> {
    graph: SegmentGraph,
    scheduler: DualBufferScheduler<P>,
    store: ProgressStore<S>,
    progress: Progress,
    state: PlaybackState,
    /// The current segment's video reached its end (non-looping only).
    video_ended: bool,
    /// The next segment start waits for full preparation.
    first_start: bool,
    inputs: VecDeque<Input>,
    events: VecDeque<PlayerEvent>,
}

impl<P: VideoPlayer, S: KeyValueStore> StoryPlayer<P, S> {
    /// Build a player and restore saved progress.
    pub fn new(graph: SegmentGraph, scheduler: DualBufferScheduler<P>, store: ProgressStore<S>) -> Self {
        let progress = store.load();
        Self {
            graph,
            scheduler,
            store,
            progress,
            state: PlaybackState::Idle,
            video_ended: false,
            first_start: false,
            inputs: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn flags(&self) -> &Flags {
        &self.progress.flags
    }

    pub fn current_index(&self) -> usize {
        self.progress.current_segment_index
    }

    pub fn current_segment(&self) -> Option<&Segment> {
        self.graph.get(self.progress.current_segment_index).ok()
    }

    pub fn graph(&self) -> &SegmentGraph {
        &self.graph
    }

    pub fn scheduler(&self) -> &DualBufferScheduler<P> {
        &self.scheduler
    }

    pub fn progress_store(&self) -> &ProgressStore<S> {
        &self.store
    }

    /// UI the current state is waiting on, if any.
    pub fn prompt(&self) -> Option<Prompt<'_>> {
        let segment = self.current_segment()?;
        match self.state {
            PlaybackState::Paused => segment.pause.as_ref().map(Prompt::Pause),
            PlaybackState::AwaitingDialogue => segment.dialogue.as_ref().map(Prompt::Dialogue),
            PlaybackState::AwaitingChoice => Some(Prompt::Choices(&segment.choices)),
            PlaybackState::AwaitingClick => Some(Prompt::Continue),
            _ => None,
        }
    }

    /// Queue a UI action for the next tick.
    pub fn push_input(&mut self, input: Input) {
        self.inputs.push_back(input);
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = PlayerEvent> + '_ {
        self.events.drain(..)
    }

    /// Begin playback from the restored segment once external loading is done.
    pub fn start_level_after_loading(&mut self) {
        if self.graph.is_empty() {
            self.fail(0, "story has no segments".to_string());
            return;
        }

        let mut index = self.progress.current_segment_index;
        if index >= self.graph.len() {
            warn!("Invalid saved segment index: {}, resetting to 0", index);
            index = 0;
        }

        info!("Starting level after loading from segment {}", index);
        self.first_start = true;
        self.enter_segment(index);
        self.settle();
    }

    /// Advance one frame: update video, consume signals and queued inputs,
    /// and resume whichever wait has its condition met.
    pub fn tick(&mut self, dt: Duration) {
        // Playback time only counts frames the clip was already running for.
        let was_playing = !self.scheduler.is_starting() && self.scheduler.active_is_playing();

        if let Err(e) = self.scheduler.update(dt) {
            let index = self.current_index();
            self.fail(index, e.to_string());
        }

        if self.scheduler.take_active_finished() && self.state.is_live() {
            let index = self.current_index();
            debug!("Video finished for segment {}", index);
            if !self.current_segment().is_some_and(|s| s.is_looping) {
                self.video_ended = true;
            }
            self.events.push_back(PlayerEvent::VideoFinished { index });
        }

        if let PlaybackState::Playing { played } = &mut self.state {
            if was_playing {
                *played += dt;
            }
        }

        self.settle();

        while let Some(input) = self.inputs.pop_front() {
            self.apply_input(input);
            self.settle();
        }
    }

    /// Abandon the current segment and move to its successor.
    ///
    /// Any pending dialogue, choice or pause of the current segment is
    /// dropped. With no successor the story becomes terminal.
    pub fn skip_current_segment(&mut self) {
        if !self.state.is_live() {
            info!("Nothing to skip in state {:?}", self.state);
            return;
        }

        let index = self.current_index();
        self.scheduler.stop_active();
        self.events.push_back(PlayerEvent::Skipped { from: index });

        match self.resolve_next() {
            Some(next) => {
                info!("Skipping to segment: {}", next);
                self.advance_to(next);
            }
            None => {
                warn!("No next segment available after skip");
                self.terminate();
            }
        }
        self.settle();
    }

    /// Persist the current index and flags.
    pub fn save_progress(&mut self) {
        self.store.save(&self.progress);
        self.events.push_back(PlayerEvent::ProgressSaved {
            index: self.progress.current_segment_index,
        });
    }

    /// Clear saved progress and stop playback.
    pub fn reset_progress(&mut self) {
        self.progress = self.store.reset();
        self.scheduler.stop_active();
        self.inputs.clear();
        self.video_ended = false;
        self.state = PlaybackState::Idle;
    }

    /// Reset progress and play the story from the beginning.
    pub fn restart(&mut self) {
        info!("Restarting story");
        self.reset_progress();
        self.start_level_after_loading();
    }

    /// Save and release all video resources.
    pub fn shutdown(&mut self) {
        self.save_progress();
        self.scheduler.shutdown();
        self.state = PlaybackState::Idle;
    }

    fn enter_segment(&mut self, index: usize) {
        let (name, video, looping, next) = match self.graph.get(index) {
            Ok(segment) => (
                segment.name.clone(),
                segment.video.clone(),
                segment.is_looping,
                self.graph.resolve_next(segment, index, &self.progress.flags),
            ),
            Err(e) => {
                self.fail(index, e.to_string());
                return;
            }
        };

        info!("=== Starting segment: {} (index {}) ===", name, index);
        self.progress.current_segment_index = index;
        self.video_ended = false;
        self.events.push_back(PlayerEvent::SegmentStarted {
            index,
            name: name.clone(),
        });
        self.save_progress();

        let Some(video) = video else {
            self.fail(index, Error::MissingVideo(name).to_string());
            return;
        };

        // Issued before the foreground start so preparation overlaps playback.
        if let Some(next) = next {
            self.prepare_successor(next);
        }

        let wait = if std::mem::take(&mut self.first_start) {
            StartWait::UntilPrepared
        } else {
            StartWait::Bounded
        };
        match self.scheduler.play_immediately(&video, looping, wait) {
            Ok(outcome) => {
                debug!("Start of {}: {:?}", video, outcome);
                self.state = PlaybackState::Playing {
                    played: Duration::ZERO,
                };
            }
            Err(e) => self.fail(index, e.to_string()),
        }
    }

    fn prepare_successor(&mut self, next: usize) {
        let Ok(segment) = self.graph.get(next) else {
            debug!("Successor {} is not in the story, nothing to prepare", next);
            return;
        };
        let Some(video) = segment.video.clone() else {
            return;
        };
        let looping = segment.is_looping;
        let standby = self.scheduler.standby_id();
        if let Err(e) = self.scheduler.prepare_in_background(&video, looping, standby) {
            warn!("Failed to prepare {} in background: {}", video, e);
        }
    }

    fn resolve_next(&self) -> Option<usize> {
        let index = self.current_index();
        let segment = self.graph.get(index).ok()?;
        self.graph.resolve_next(segment, index, &self.progress.flags)
    }

    fn advance_to(&mut self, target: usize) {
        if let Err(e) = self.graph.get(target) {
            self.fail(target, e.to_string());
            return;
        }
        self.scheduler.swap();
        self.enter_segment(target);
    }

    fn settle(&mut self) {
        for _ in 0..MAX_TRANSITIONS_PER_TICK {
            if !self.step() {
                return;
            }
        }
        debug!("Transition limit reached, continuing next tick");
    }

    /// Resume the current wait if its condition holds. Returns whether the state changed.
    fn step(&mut self) -> bool {
        match self.state {
            PlaybackState::Playing { played } => {
                if self.scheduler.is_starting() {
                    return false;
                }
                let pause_at = self
                    .current_segment()
                    .and_then(|s| s.pause.as_ref())
                    .map(|p| p.at);
                match pause_at {
                    Some(at) => {
                        let reached = played.as_secs_f32() >= at
                            || self.video_ended
                            || !self.scheduler.active_is_playing();
                        if reached {
                            self.enter_pause();
                        }
                        reached
                    }
                    None => {
                        self.after_pause();
                        true
                    }
                }
            }
            PlaybackState::AwaitingEnd => {
                if self.video_ended || !self.scheduler.active_is_playing() {
                    self.finish_auto_continue();
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    fn enter_pause(&mut self) {
        let index = self.current_index();
        info!("Pausing video for pause event");
        if let Err(e) = self.scheduler.pause_active() {
            warn!("Failed to pause video: {}", e);
        }
        self.state = PlaybackState::Paused;
        self.events.push_back(PlayerEvent::Paused { index });
    }

    fn resume_after_pause(&mut self) {
        let index = self.current_index();
        if !self.video_ended {
            if let Err(e) = self.scheduler.resume_active() {
                warn!("Failed to resume video: {}", e);
            }
        }
        info!("Resuming video after pause");
        self.events.push_back(PlayerEvent::Resumed { index });
        self.after_pause();
    }

    fn after_pause(&mut self) {
        let Some((auto_continue, looping)) = self
            .current_segment()
            .map(|s| (s.auto_continue, s.is_looping))
        else {
            return;
        };

        // Auto-continue takes priority over any dialogue or choices.
        if auto_continue && !looping {
            debug!("Waiting for video to finish (autoContinue)");
            self.state = PlaybackState::AwaitingEnd;
        } else {
            self.present_dialogue();
        }
    }

    fn finish_auto_continue(&mut self) {
        match self.resolve_next() {
            Some(next) => {
                info!("Auto-advancing to segment: {}", next);
                self.advance_to(next);
            }
            None => self.present_dialogue(),
        }
    }

    fn present_dialogue(&mut self) {
        if self.current_segment().is_some_and(Segment::shows_dialogue) {
            debug!("Showing dialogue");
            self.state = PlaybackState::AwaitingDialogue;
        } else {
            self.after_dialogue();
        }
    }

    fn after_dialogue(&mut self) {
        let Some(segment) = self.current_segment() else {
            return;
        };
        let (auto_continue, looping) = (segment.auto_continue, segment.is_looping);

        if segment.shows_choices() {
            let clips: Vec<String> = segment
                .choices
                .iter()
                .filter_map(|c| self.graph.get(c.target).ok()?.video.clone())
                .collect();
            debug!("Showing {} choices", segment.choices.len());
            for clip in &clips {
                self.scheduler.warm(clip);
            }
            self.state = PlaybackState::AwaitingChoice;
        } else if !auto_continue {
            debug!("Waiting for click to continue");
            self.state = PlaybackState::AwaitingClick;
        } else if looping {
            debug!("Holding on looping segment until skipped");
            self.state = PlaybackState::Holding;
        } else {
            self.terminate();
        }
    }

    fn terminate(&mut self) {
        let index = self.current_index();
        info!("Story halted at segment {}: no next segment", index);
        if let Err(e) = self.scheduler.pause_active() {
            warn!("Failed to pause video: {}", e);
        }
        self.state = PlaybackState::Terminal;
        self.events.push_back(PlayerEvent::Terminal { index });
    }

    fn fail(&mut self, index: usize, reason: String) {
        error!("Segment {} failed: {}", index, reason);
        self.scheduler.stop_active();
        self.state = PlaybackState::Failed;
        self.events.push_back(PlayerEvent::SegmentFailed { index, reason });
    }

    fn set_flag(&mut self, flag: &str) {
        if flag.is_empty() {
            return;
        }
        if self.progress.flags.set(flag) {
            info!("Flag set: {}", flag);
        }
        self.events.push_back(PlayerEvent::FlagSet(flag.to_string()));
        self.save_progress();
    }

    fn apply_input(&mut self, input: Input) {
        match (self.state, input) {
            (_, Input::Skip) => self.skip_current_segment(),
            (PlaybackState::Paused, Input::Select(button)) => self.press_pause_button(button),
            (PlaybackState::Paused, Input::Continue) => {
                let has_buttons = self
                    .current_segment()
                    .and_then(|s| s.pause.as_ref())
                    .is_some_and(|p| !p.buttons.is_empty());
                if has_buttons {
                    debug!("Pause needs a button choice, ignoring continue");
                } else {
                    self.resume_after_pause();
                }
            }
            (PlaybackState::AwaitingDialogue, Input::Continue) => {
                debug!("Dialogue continued");
                self.after_dialogue();
            }
            (PlaybackState::AwaitingChoice, Input::Select(choice)) => self.select_choice(choice),
            (PlaybackState::AwaitingClick, Input::Continue) => match self.resolve_next() {
                Some(next) => {
                    info!("Advancing to segment: {}", next);
                    self.advance_to(next);
                }
                None => self.terminate(),
            },
            (state, input) => debug!("Ignoring {:?} in state {:?}", input, state),
        }
    }

    fn press_pause_button(&mut self, button: usize) {
        let flag = match self
            .current_segment()
            .and_then(|s| s.pause.as_ref())
            .and_then(|p| p.buttons.get(button))
        {
            Some(b) => b.set_flag.clone(),
            None => {
                warn!("Pause button {} out of range, ignoring", button);
                return;
            }
        };

        debug!("Pause button {} pressed", button);
        self.set_flag(&flag);
        self.resume_after_pause();
    }

    fn select_choice(&mut self, choice: usize) {
        let index = self.current_index();
        let Some((flag, target)) = self
            .current_segment()
            .and_then(|s| s.choices.get(choice))
            .map(|c| (c.set_flag.clone(), c.target))
        else {
            warn!("Choice {} out of range, ignoring", choice);
            return;
        };

        info!("Choice selected: {} -> segment {}", choice, target);
        self.events.push_back(PlayerEvent::ChoiceMade {
            index,
            choice,
            target,
        });
        self.set_flag(&flag);
        self.advance_to(target);
    }
}
