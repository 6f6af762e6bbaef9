//! Branching video-narrative player.
//!
//! A story is a graph of video segments. [`playback::StoryPlayer`] walks it
//! one segment at a time on a cooperative frame tick, using two alternating
//! decode slots ([`scheduler`]) and a pool of preload workers ([`cache`]) so
//! the next clip is usually ready before it is needed. Progress is persisted
//! through a small key-value store ([`progress`], [`storage`]).

pub mod cache;
pub mod config;
pub mod console;
pub mod error;
pub mod playback;
pub mod progress;
pub mod scheduler;
pub mod sim;
pub mod storage;
pub mod story;
pub mod video;

#[cfg(feature = "gstreamer")]
pub mod gst_video;

#[cfg(feature = "desktop")]
pub mod renderer;

pub use error::{Error, Result};
pub use playback::{Input, PlaybackState, PlayerEvent, Prompt, StoryPlayer};
