//! Story definition and segment routing.
//!
//! A story is an ordered list of segments. Segment indices are the graph's
//! node ids; edges come from explicit `nextSegment` jumps, choice targets and
//! the implicit fall-through to `index + 1`. Cycles are allowed.

use crate::error::{Error, Result};
use crate::progress::Flags;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Dialogue shown after the segment's video starts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dialogue {
    pub text: String,
    #[serde(default = "default_continue_label")]
    pub continue_label: String,
}

fn default_continue_label() -> String {
    "Continue".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub label: String,
    pub target: usize,
    #[serde(default)]
    pub set_flag: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseButton {
    pub label: String,
    #[serde(default)]
    pub set_flag: String,
}

/// Mid-video stop with its own button set.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseSpec {
    /// Seconds of playback before pausing.
    pub at: f32,
    #[serde(default)]
    pub buttons: Vec<PauseButton>,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub name: String,
    #[serde(default)]
    pub video: Option<String>,
    #[serde(default)]
    pub audio: Option<String>,
    /// Clip length hint in seconds.
    #[serde(default)]
    pub duration: Option<f32>,
    #[serde(default = "default_true")]
    pub auto_continue: bool,
    #[serde(default)]
    pub is_looping: bool,
    #[serde(default)]
    pub dialogue: Option<Dialogue>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub pause: Option<PauseSpec>,
    /// Explicit successor; `None` falls through to the following index.
    #[serde(default, deserialize_with = "deserialize_next_segment")]
    pub next_segment: Option<usize>,
    /// Flag that must be set for this segment to lead anywhere.
    #[serde(default)]
    pub required_flag: String,
}

fn default_true() -> bool {
    true
}

/// Accepts the authoring convention of `-1` for "no explicit next segment".
fn deserialize_next_segment<'de, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.and_then(|n| usize::try_from(n).ok()))
}

impl Segment {
    /// Auto-continuing segment with no extras.
    pub fn new(name: impl Into<String>, video: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            video: Some(video.into()),
            audio: None,
            duration: None,
            auto_continue: true,
            is_looping: false,
            dialogue: None,
            choices: Vec::new(),
            pause: None,
            next_segment: None,
            required_flag: String::new(),
        }
    }

    pub fn shows_dialogue(&self) -> bool {
        self.dialogue.is_some()
    }

    pub fn shows_choices(&self) -> bool {
        !self.choices.is_empty()
    }

    pub fn required_flag(&self) -> Option<&str> {
        Some(self.required_flag.as_str()).filter(|f| !f.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoryFile {
    #[serde(default)]
    pub title: Option<String>,
    pub segments: Vec<Segment>,
}

/// The story's segments and the routing rule between them.
#[derive(Debug, Clone, Default)]
pub struct SegmentGraph {
    segments: Vec<Segment>,
}

impl SegmentGraph {
    pub fn new(segments: Vec<Segment>) -> Self {
        let graph = Self { segments };
        for issue in graph.validate() {
            tracing::warn!("Story: {}", issue);
        }
        graph
    }

    /// Load a JSON story file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let story: StoryFile = serde_json::from_str(&json)?;
        tracing::info!(
            "Loaded story {:?} with {} segments",
            story.title.as_deref().unwrap_or("untitled"),
            story.segments.len()
        );
        Ok(Self::new(story.segments))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Segment> {
        self.segments.get(index).ok_or(Error::OutOfRange {
            index,
            count: self.segments.len(),
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Pick the segment that follows `segment` (found at `current_index`).
    ///
    /// The required-flag gate is checked first and vetoes even an explicit
    /// `next_segment`. The explicit target is returned as declared, without a
    /// bounds check; callers fail on it when they try to play it.
    pub fn resolve_next(&self, segment: &Segment, current_index: usize, flags: &Flags) -> Option<usize> {
        if let Some(flag) = segment.required_flag() {
            if !flags.is_set(flag) {
                tracing::debug!("Segment '{}' blocked on flag '{}'", segment.name, flag);
                return None;
            }
        }

        if let Some(next) = segment.next_segment {
            return Some(next);
        }

        let next = current_index + 1;
        (next < self.segments.len()).then_some(next)
    }

    /// Every distinct video reference, in story order.
    pub fn unique_videos(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.segments
            .iter()
            .filter_map(|s| s.video.as_deref())
            .filter(|v| seen.insert(*v))
            .collect()
    }

    /// Problems that will make playback halt if reached.
    pub fn validate(&self) -> Vec<String> {
        let count = self.segments.len();
        let mut issues = Vec::new();

        for (index, segment) in self.segments.iter().enumerate() {
            if segment.video.is_none() {
                issues.push(format!("segment {} '{}' has no video", index, segment.name));
            }
            if let Some(next) = segment.next_segment.filter(|n| *n >= count) {
                issues.push(format!(
                    "segment {} '{}' jumps to missing segment {}",
                    index, segment.name, next
                ));
            }
            for choice in segment.choices.iter().filter(|c| c.target >= count) {
                issues.push(format!(
                    "segment {} '{}' choice '{}' targets missing segment {}",
                    index, segment.name, choice.label, choice.target
                ));
            }
        }

        issues
    }
}
