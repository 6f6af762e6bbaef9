//! Headless video backend.
//!
//! Simulates decode latency, clip length, looping and the end-of-clip edge
//! on the frame tick, without decoding anything. Used by the console
//! frontend and by tests.

use crate::story::SegmentGraph;
use crate::video::{PlayerState, VideoBackend, VideoPlayer};
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Clip length used when nothing better is known.
pub const DEFAULT_CLIP_DURATION: Duration = Duration::from_secs(5);

/// Clip length from a duration hint in seconds, or `fallback` when the hint
/// is negative, not finite or too large to represent.
pub fn duration_from_secs(secs: f32, fallback: Duration) -> Duration {
    match Duration::try_from_secs_f32(secs) {
        Ok(duration) => duration,
        Err(e) => {
            tracing::warn!("Ignoring clip duration {}: {}, using {:?}", secs, e, fallback);
            fallback
        }
    }
}

/// Timing of one simulated clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimClip {
    pub duration: Duration,
    pub prepare_latency: Duration,
    /// Preparation fails with a decode error once the latency has elapsed.
    pub broken: bool,
}

/// Known clips plus the timing used for everything else.
#[derive(Debug, Clone)]
pub struct SimCatalog {
    clips: HashMap<String, SimClip>,
    fallback: SimClip,
}

impl SimCatalog {
    pub fn new(default_duration: Duration, prepare_latency: Duration) -> Self {
        Self {
            clips: HashMap::new(),
            fallback: SimClip {
                duration: default_duration,
                prepare_latency,
                broken: false,
            },
        }
    }

    /// Catalog with each segment's duration hint.
    pub fn from_story(graph: &SegmentGraph, default_duration: Duration, prepare_latency: Duration) -> Self {
        let mut catalog = Self::new(default_duration, prepare_latency);
        for segment in graph.segments() {
            if let (Some(video), Some(secs)) = (&segment.video, segment.duration) {
                let duration = duration_from_secs(secs, default_duration);
                catalog = catalog.with_clip(video, duration, prepare_latency);
            }
        }
        catalog
    }

    pub fn with_clip(mut self, name: &str, duration: Duration, prepare_latency: Duration) -> Self {
        self.clips.insert(
            name.to_string(),
            SimClip {
                duration,
                prepare_latency,
                broken: false,
            },
        );
        self
    }

    /// Register a clip that never finishes preparing.
    pub fn with_broken_clip(mut self, name: &str, prepare_latency: Duration) -> Self {
        self.clips.insert(
            name.to_string(),
            SimClip {
                duration: self.fallback.duration,
                prepare_latency,
                broken: true,
            },
        );
        self
    }

    pub fn clip(&self, name: &str) -> SimClip {
        self.clips.get(name).copied().unwrap_or(self.fallback)
    }
}

#[derive(Debug, Clone)]
pub struct SimBackend {
    catalog: Arc<SimCatalog>,
}

impl SimBackend {
    pub fn new(catalog: SimCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }
}

impl VideoBackend for SimBackend {
    type Player = SimPlayer;

    fn create_player(&mut self, label: &str) -> Result<SimPlayer> {
        Ok(SimPlayer::new(label, Arc::clone(&self.catalog)))
    }
}

/// Simulated player; time only moves through [`VideoPlayer::update`].
#[derive(Debug)]
pub struct SimPlayer {
    label: String,
    catalog: Arc<SimCatalog>,
    clip: Option<String>,
    timing: Option<SimClip>,
    looping: bool,
    /// Remaining decode time; `None` when no preparation is in flight.
    preparing: Option<Duration>,
    prepared: bool,
    state: PlayerState,
    position: Duration,
    finished: bool,
    error: Option<anyhow::Error>,
    prepare_calls: usize,
}

impl SimPlayer {
    pub fn new(label: &str, catalog: Arc<SimCatalog>) -> Self {
        Self {
            label: label.to_string(),
            catalog,
            clip: None,
            timing: None,
            looping: false,
            preparing: None,
            prepared: false,
            state: PlayerState::Stopped,
            position: Duration::ZERO,
            finished: false,
            error: None,
            prepare_calls: 0,
        }
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Number of `prepare` calls since creation.
    pub fn prepare_calls(&self) -> usize {
        self.prepare_calls
    }

    fn advance_playback(&mut self, dt: Duration) {
        let Some(duration) = self.timing.map(|t| t.duration) else {
            return;
        };

        self.position += dt;
        if self.position < duration {
            return;
        }

        self.finished = true;
        if self.looping && !duration.is_zero() {
            while self.position >= duration {
                self.position -= duration;
            }
        } else {
            self.position = duration;
            self.state = PlayerState::EndOfStream;
        }
    }
}

impl VideoPlayer for SimPlayer {
    fn load(&mut self, clip: &str, looping: bool) -> Result<()> {
        if clip.is_empty() {
            bail!("{}: empty clip reference", self.label);
        }
        self.stop()?;
        self.timing = Some(self.catalog.clip(clip));
        self.clip = Some(clip.to_string());
        self.looping = looping;
        self.finished = false;
        Ok(())
    }

    fn clip(&self) -> Option<&str> {
        self.clip.as_deref()
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    fn prepare(&mut self) -> Result<()> {
        let Some(timing) = self.timing else {
            bail!("{}: prepare without a clip", self.label);
        };
        self.prepare_calls += 1;
        if self.prepared || self.preparing.is_some() {
            return Ok(());
        }
        if timing.prepare_latency.is_zero() && !timing.broken {
            self.prepared = true;
        } else {
            self.preparing = Some(timing.prepare_latency);
        }
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.prepared
    }

    fn play(&mut self) -> Result<()> {
        if self.clip.is_none() {
            bail!("{}: play without a clip", self.label);
        }
        if self.state == PlayerState::EndOfStream {
            self.position = Duration::ZERO;
        }
        if !self.prepared {
            self.prepare()?;
        }
        self.state = PlayerState::Playing;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if self.state == PlayerState::Playing {
            self.state = PlayerState::Paused;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.state = PlayerState::Stopped;
        self.position = Duration::ZERO;
        self.prepared = false;
        self.preparing = None;
        self.finished = false;
        self.error = None;
        Ok(())
    }

    fn state(&self) -> PlayerState {
        self.state
    }

    fn position(&self) -> Option<f32> {
        self.clip.as_ref().map(|_| self.position.as_secs_f32())
    }

    fn update(&mut self, dt: Duration) {
        let mut dt = dt;

        if let Some(remaining) = self.preparing {
            if dt < remaining {
                self.preparing = Some(remaining - dt);
                return;
            }
            self.preparing = None;
            if self.timing.is_some_and(|t| t.broken) {
                let clip = self.clip.as_deref().unwrap_or_default();
                self.error = Some(anyhow!("{}: cannot decode {}", self.label, clip));
                self.state = PlayerState::Stopped;
                return;
            }
            self.prepared = true;
            // Frames decoded after readiness still count toward playback.
            dt -= remaining;
        }

        if self.state == PlayerState::Playing && self.prepared {
            self.advance_playback(dt);
        }
    }

    fn take_finished(&mut self) -> bool {
        std::mem::take(&mut self.finished)
    }

    fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }
}
