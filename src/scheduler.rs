//! Dual-buffer video scheduler.
//!
//! Two interchangeable playback slots: the active one is shown, the standby
//! one prepares the next clip. At a segment boundary [`swap`] repoints the
//! display to the standby slot so the next clip starts without a visible
//! stall, provided it finished preparing in time.
//!
//! [`swap`]: DualBufferScheduler::swap

use crate::cache::PreloadCache;
use crate::error::{Error, Result};
use crate::video::{VideoBackend, VideoPlayer};
use std::fmt;
use std::time::Duration;

/// Default bound on how long a segment start waits for its clip.
pub const DEFAULT_PREPARE_TIMEOUT: Duration = Duration::from_millis(500);

/// Which slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotId {
    Primary,
    Secondary,
}

impl SlotId {
    /// Get the other slot
    pub fn other(self) -> Self {
        match self {
            SlotId::Primary => SlotId::Secondary,
            SlotId::Secondary => SlotId::Primary,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotId::Primary => f.write_str("primary"),
            SlotId::Secondary => f.write_str("secondary"),
        }
    }
}

/// One playback buffer and its player.
pub struct PlaybackSlot<P> {
    id: SlotId,
    player: P,
    /// A prepare was issued for the current clip and not undone by a stop.
    prepare_requested: bool,
}

impl<P: VideoPlayer> PlaybackSlot<P> {
    fn new(id: SlotId, player: P) -> Self {
        Self {
            id,
            player,
            prepare_requested: false,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn clip(&self) -> Option<&str> {
        self.player.clip()
    }

    pub fn is_prepared(&self) -> bool {
        self.player.is_prepared()
    }

    pub fn is_playing(&self) -> bool {
        self.player.is_playing()
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    fn holds(&self, clip: &str) -> bool {
        self.player.clip() == Some(clip)
    }

    /// Prepared, or on its way there.
    fn is_preparing_or_prepared(&self) -> bool {
        self.prepare_requested || self.player.is_prepared()
    }

    fn load(&mut self, clip: &str, looping: bool) -> Result<()> {
        self.stop();
        self.player.load(clip, looping)?;
        self.player.prepare()?;
        self.prepare_requested = true;
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        // Drop any end-of-clip edge left over from an earlier run.
        self.player.take_finished();
        self.player.play()?;
        Ok(())
    }

    fn stop(&mut self) {
        if let Err(e) = self.player.stop() {
            tracing::warn!("Failed to stop {} slot: {:#}", self.id, e);
        }
        self.prepare_requested = false;
    }
}

/// How long a start may wait for its clip to prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartWait {
    /// Up to the scheduler's prepare timeout, then play regardless.
    Bounded,
    /// Until the clip is prepared.
    UntilPrepared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Playback started during the call.
    Playing,
    /// Waiting for preparation; playback starts from a later `update`.
    Preparing,
}

#[derive(Debug, Clone, Copy)]
struct PendingStart {
    waited: Duration,
    deadline: Option<Duration>,
}

/// Owns both playback slots and the preload cache.
pub struct DualBufferScheduler<P> {
    primary: PlaybackSlot<P>,
    secondary: PlaybackSlot<P>,
    active: SlotId,
    cache: PreloadCache<P>,
    prepare_timeout: Duration,
    pending_start: Option<PendingStart>,
}

impl<P: VideoPlayer> DualBufferScheduler<P> {
    /// Create both slots and `workers` preload workers from `backend`.
    pub fn new<B>(backend: &mut B, prepare_timeout: Duration, workers: usize) -> Result<Self>
    where
        B: VideoBackend<Player = P>,
    {
        let primary = backend.create_player("primary")?;
        let secondary = backend.create_player("secondary")?;
        let pool = (0..workers)
            .map(|i| backend.create_player(&format!("preload-{}", i)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        tracing::info!("Initializing dual-buffer scheduler");
        Ok(Self::from_parts(primary, secondary, PreloadCache::new(pool), prepare_timeout))
    }

    pub fn from_parts(primary: P, secondary: P, cache: PreloadCache<P>, prepare_timeout: Duration) -> Self {
        Self {
            primary: PlaybackSlot::new(SlotId::Primary, primary),
            secondary: PlaybackSlot::new(SlotId::Secondary, secondary),
            active: SlotId::Primary,
            cache,
            prepare_timeout,
            pending_start: None,
        }
    }

    pub fn active_id(&self) -> SlotId {
        self.active
    }

    pub fn standby_id(&self) -> SlotId {
        self.active.other()
    }

    pub fn slot(&self, id: SlotId) -> &PlaybackSlot<P> {
        match id {
            SlotId::Primary => &self.primary,
            SlotId::Secondary => &self.secondary,
        }
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut PlaybackSlot<P> {
        match id {
            SlotId::Primary => &mut self.primary,
            SlotId::Secondary => &mut self.secondary,
        }
    }

    pub fn active(&self) -> &PlaybackSlot<P> {
        self.slot(self.active)
    }

    pub fn standby(&self) -> &PlaybackSlot<P> {
        self.slot(self.standby_id())
    }

    pub fn cache(&self) -> &PreloadCache<P> {
        &self.cache
    }

    /// A start is waiting for its clip to prepare.
    pub fn is_starting(&self) -> bool {
        self.pending_start.is_some()
    }

    pub fn active_is_playing(&self) -> bool {
        self.active().is_playing()
    }

    /// Consume the active slot's end-of-clip edge.
    pub fn take_active_finished(&mut self) -> bool {
        let active = self.active;
        self.slot_mut(active).player.take_finished()
    }

    /// Start `clip` on the active slot as soon as possible.
    ///
    /// Starts at once if the slot already holds the clip prepared (the normal
    /// case after a swap) or the preload cache has it ready. Otherwise the clip
    /// is loaded and prepared and playback begins from [`update`] once it is
    /// ready or the wait allowed by `wait` runs out.
    ///
    /// [`update`]: DualBufferScheduler::update
    pub fn play_immediately(&mut self, clip: &str, looping: bool, wait: StartWait) -> Result<StartOutcome> {
        self.pending_start = None;
        let active = self.active;

        if self.slot(active).holds(clip) && self.slot(active).is_prepared() {
            tracing::info!("Video {} already prepared, starting immediately", clip);
            return self.start_active(looping);
        }

        if self.adopt_preloaded(active, clip) {
            tracing::info!("Video {} taken from preload cache, starting immediately", clip);
            return self.start_active(looping);
        }

        let slot = self.slot_mut(active);
        if slot.holds(clip) && slot.is_preparing_or_prepared() {
            tracing::debug!("Video {} still preparing on {} slot", clip, active);
            slot.player.set_looping(looping);
        } else {
            slot.load(clip, looping)?;
        }

        let deadline = match wait {
            StartWait::Bounded => Some(self.prepare_timeout),
            StartWait::UntilPrepared => None,
        };
        if self.slot(active).is_prepared() || deadline == Some(Duration::ZERO) {
            return self.start_active(looping);
        }

        tracing::debug!("Waiting for {} to prepare (deadline {:?})", clip, deadline);
        self.pending_start = Some(PendingStart {
            waited: Duration::ZERO,
            deadline,
        });
        Ok(StartOutcome::Preparing)
    }

    fn start_active(&mut self, looping: bool) -> Result<StartOutcome> {
        self.pending_start = None;
        let active = self.active;
        let slot = self.slot_mut(active);
        slot.player.set_looping(looping);
        slot.play()?;
        Ok(StartOutcome::Playing)
    }

    /// Prepare `clip` on `target` without blocking the active slot.
    ///
    /// No-op when the slot already holds the clip prepared or preparing.
    pub fn prepare_in_background(&mut self, clip: &str, looping: bool, target: SlotId) -> Result<()> {
        if target == self.active {
            return Err(Error::InvalidState(format!(
                "cannot prepare {} into the active {} slot",
                clip, target
            )));
        }

        let slot = self.slot_mut(target);
        if slot.holds(clip) && slot.is_preparing_or_prepared() {
            tracing::debug!("Next video {} already prepared in background", clip);
            slot.player.set_looping(looping);
            return Ok(());
        }

        if self.adopt_preloaded(target, clip) {
            tracing::debug!("Next video {} taken from preload cache", clip);
            self.slot_mut(target).player.set_looping(looping);
            return Ok(());
        }

        tracing::debug!("Preparing next video in background: {}", clip);
        self.slot_mut(target).load(clip, looping)
    }

    /// Move a ready cached player for `clip` into slot `id`.
    fn adopt_preloaded(&mut self, id: SlotId, clip: &str) -> bool {
        let Some(player) = self.cache.take(clip) else {
            return false;
        };
        let slot = self.slot_mut(id);
        let previous = std::mem::replace(&mut slot.player, player);
        slot.prepare_requested = true;
        self.cache.give_back(previous);
        true
    }

    /// Ask the preload cache to get `clip` ready unless a slot already has it.
    pub fn warm(&mut self, clip: &str) {
        let in_slot = [SlotId::Primary, SlotId::Secondary]
            .into_iter()
            .any(|id| self.slot(id).holds(clip) && self.slot(id).is_preparing_or_prepared());
        if !in_slot {
            self.cache.request(clip);
        }
    }

    /// Make the standby slot active and point the display at it.
    ///
    /// The outgoing slot is stopped so it stays silent. Only call this at a
    /// segment boundary.
    pub fn swap(&mut self) {
        self.pending_start = None;
        let outgoing = self.active;
        self.slot_mut(outgoing).stop();
        self.active = outgoing.other();
        tracing::info!("Switched to {} video slot", self.active);
    }

    /// Halt the active slot and cancel any pending start.
    pub fn stop_active(&mut self) {
        self.pending_start = None;
        let active = self.active;
        self.slot_mut(active).stop();
    }

    pub fn pause_active(&mut self) -> Result<()> {
        let active = self.active;
        self.slot_mut(active).player.pause()?;
        Ok(())
    }

    pub fn resume_active(&mut self) -> Result<()> {
        let active = self.active;
        self.slot_mut(active).player.play()?;
        Ok(())
    }

    /// Advance both slots and the cache by one tick, starting a pending
    /// playback once its clip is ready or its wait has run out.
    ///
    /// A decode failure on the active slot cancels any pending start, stops
    /// the slot and is returned. One on the standby slot only stops it, so
    /// the next `prepare_in_background` or `play_immediately` loads afresh.
    pub fn update(&mut self, dt: Duration) -> Result<()> {
        self.primary.player.update(dt);
        self.secondary.player.update(dt);
        self.cache.update(dt);

        let standby = self.standby_id();
        if let Some(e) = self.slot_mut(standby).player.take_error() {
            tracing::warn!("Background preparation on {} slot failed: {:#}", standby, e);
            self.slot_mut(standby).stop();
        }

        let active = self.active;
        if let Some(e) = self.slot_mut(active).player.take_error() {
            self.pending_start = None;
            self.slot_mut(active).stop();
            return Err(Error::Video(e));
        }

        let Some(pending) = self.pending_start.as_mut() else {
            return Ok(());
        };
        pending.waited += dt;
        let waited = pending.waited;
        let timed_out = pending.deadline.is_some_and(|d| waited >= d);

        if self.slot(active).is_prepared() {
            tracing::info!("Video prepared after {:?}, starting playback", waited);
        } else if timed_out {
            tracing::warn!("Starting playback without full preparation after {:?}", waited);
        } else {
            return Ok(());
        }

        self.pending_start = None;
        self.slot_mut(active).play()
    }

    /// Stop both slots and release every preload.
    pub fn shutdown(&mut self) {
        self.pending_start = None;
        self.primary.stop();
        self.secondary.stop();
        self.cache.clear();
    }
}
