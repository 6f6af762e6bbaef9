//! Video decode surface consumed by the scheduler.
//!
//! Decoding and rendering live behind [`VideoPlayer`]; the crate ships a
//! GStreamer implementation (feature `gstreamer`) and a headless one in
//! [`crate::sim`].

use anyhow::Result;
use std::time::Duration;

/// State of a video player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stopped,
    Playing,
    Paused,
    EndOfStream,
}

/// One decode/playback instance.
///
/// Every call is non-blocking. Preparation completes in the background and is
/// observed through [`is_prepared`](VideoPlayer::is_prepared); end of playback
/// is observed through [`take_finished`](VideoPlayer::take_finished) and decode
/// failures through [`take_error`](VideoPlayer::take_error).
pub trait VideoPlayer {
    /// Assign a clip. Any previous clip is stopped and released.
    fn load(&mut self, clip: &str, looping: bool) -> Result<()>;

    /// Clip currently assigned, if any.
    fn clip(&self) -> Option<&str>;

    fn set_looping(&mut self, looping: bool);

    /// Start decoding up to the first frame.
    fn prepare(&mut self) -> Result<()>;

    fn is_prepared(&self) -> bool;

    /// Start or resume. Calling this before preparation finished starts
    /// playback as soon as frames are available; after end of stream it
    /// restarts from the beginning.
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Halt, rewind and release decode resources. The clip stays assigned.
    fn stop(&mut self) -> Result<()>;

    fn state(&self) -> PlayerState;

    fn is_playing(&self) -> bool {
        self.state() == PlayerState::Playing
    }

    /// Playback position in seconds.
    fn position(&self) -> Option<f32>;

    /// Advance by one frame tick. Backends with their own clock may ignore `dt`.
    fn update(&mut self, _dt: Duration) {}

    /// Edge-triggered end-of-clip signal: true once per finished clip or loop
    /// pass, then false until the next one.
    fn take_finished(&mut self) -> bool;

    /// Edge-triggered decode failure. A player that reports an error stays
    /// unprepared until it is loaded again.
    fn take_error(&mut self) -> Option<anyhow::Error>;
}

/// Factory for players sharing one decode backend.
pub trait VideoBackend {
    type Player: VideoPlayer;

    fn create_player(&mut self, label: &str) -> Result<Self::Player>;
}
