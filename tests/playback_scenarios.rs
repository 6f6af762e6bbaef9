use proptest::prelude::*;
use std::time::Duration;
use story_reel::progress::{Flags, Progress, ProgressStore, CURRENT_SEGMENT_KEY};
use story_reel::scheduler::DualBufferScheduler;
use story_reel::sim::{SimBackend, SimCatalog, SimPlayer};
use story_reel::storage::{JsonFileStore, KeyValueStore, MemoryStore};
use story_reel::story::{Choice, Dialogue, PauseButton, PauseSpec, Segment, SegmentGraph};
use story_reel::video::{PlayerState, VideoPlayer};
use story_reel::{Input, PlaybackState, PlayerEvent, Prompt, StoryPlayer};

const FRAME: Duration = Duration::from_millis(100);
const LATENCY: Duration = Duration::from_millis(100);
const TIMEOUT: Duration = Duration::from_millis(500);

fn clip(index: usize) -> String {
    format!("s{}.mp4", index)
}

fn linear_story(count: usize) -> Vec<Segment> {
    (0..count)
        .map(|i| Segment::new(format!("seg{}", i), clip(i)))
        .collect()
}

fn catalog() -> SimCatalog {
    SimCatalog::new(Duration::from_secs(2), LATENCY)
}

fn build<S: KeyValueStore>(
    segments: Vec<Segment>,
    store: ProgressStore<S>,
    catalog: SimCatalog,
) -> StoryPlayer<SimPlayer, S> {
    let mut backend = SimBackend::new(catalog);
    let scheduler = DualBufferScheduler::new(&mut backend, TIMEOUT, 2).unwrap();
    StoryPlayer::new(SegmentGraph::new(segments), scheduler, store)
}

fn player(segments: Vec<Segment>) -> StoryPlayer<SimPlayer, MemoryStore> {
    build(segments, ProgressStore::new(MemoryStore::new()), catalog())
}

fn restored_at(segments: Vec<Segment>, index: usize, flags: Flags) -> StoryPlayer<SimPlayer, MemoryStore> {
    let mut store = ProgressStore::new(MemoryStore::new());
    store.save(&Progress {
        current_segment_index: index,
        flags,
    });
    build(segments, store, catalog())
}

/// Tick until `done` holds, at most `max_ticks` times.
fn run_until<S: KeyValueStore>(
    player: &mut StoryPlayer<SimPlayer, S>,
    max_ticks: usize,
    done: impl Fn(&StoryPlayer<SimPlayer, S>) -> bool,
) -> bool {
    for _ in 0..max_ticks {
        if done(player) {
            return true;
        }
        player.tick(FRAME);
    }
    done(player)
}

fn choice(label: &str, target: usize, flag: &str) -> Choice {
    Choice {
        label: label.to_string(),
        target,
        set_flag: flag.to_string(),
    }
}

#[test]
fn auto_continue_advances_at_video_end_and_persists() {
    let mut segments = linear_story(3);
    segments[0].next_segment = None;
    let catalog = catalog().with_clip("s0.mp4", Duration::from_secs(3), LATENCY);
    let mut p = build(segments, ProgressStore::new(MemoryStore::new()), catalog);

    p.start_level_after_loading();
    assert_eq!(p.current_index(), 0);

    // Not before the 3s clip has played out.
    assert!(!run_until(&mut p, 25, |p| p.current_index() == 1));
    assert!(run_until(&mut p, 15, |p| p.current_index() == 1));

    let events: Vec<PlayerEvent> = p.drain_events().collect();
    assert!(events.contains(&PlayerEvent::VideoFinished { index: 0 }));
    assert_eq!(p.progress_store().load().current_segment_index, 1);
    assert_eq!(p.progress_store().store().get_int(CURRENT_SEGMENT_KEY), Some(1));

    // The successor was prepared in the standby slot, so it starts without waiting.
    assert_eq!(p.scheduler().active().clip(), Some("s1.mp4"));
    assert!(!p.scheduler().is_starting());
    assert!(p.scheduler().active_is_playing());
}

#[test]
fn choice_sets_flag_persists_and_jumps_to_target() {
    let mut segments = linear_story(6);
    segments[2].auto_continue = false;
    segments[2].choices = vec![choice("Open door", 5, "doorOpened"), choice("Leave", 3, "")];
    let mut p = restored_at(segments, 2, Flags::defaults());

    p.start_level_after_loading();
    assert!(run_until(&mut p, 5, |p| p.state() == PlaybackState::AwaitingChoice));
    assert!(matches!(p.prompt(), Some(Prompt::Choices(c)) if c.len() == 2));

    // Choice targets are warmed while the choice is on screen.
    let cache = p.scheduler().cache();
    assert!(cache.is_pending("s5.mp4") || cache.peek("s5.mp4"));

    p.push_input(Input::Select(0));
    p.tick(FRAME);

    assert_eq!(p.current_index(), 5);
    assert!(p.flags().is_set("doorOpened"));
    let saved = p.progress_store().load();
    assert_eq!(saved.current_segment_index, 5);
    assert!(saved.flags.is_set("doorOpened"));

    let events: Vec<PlayerEvent> = p.drain_events().collect();
    assert!(events.contains(&PlayerEvent::ChoiceMade {
        index: 2,
        choice: 0,
        target: 5
    }));
    assert!(events.contains(&PlayerEvent::FlagSet("doorOpened".to_string())));

    // The warmed player was adopted from the cache.
    assert_eq!(p.scheduler().active().clip(), Some("s5.mp4"));
    assert!(!p.scheduler().is_starting());
    assert!(p.scheduler().active_is_playing());
}

#[test]
fn choice_without_flag_leaves_flags_alone() {
    let mut segments = linear_story(6);
    segments[2].auto_continue = false;
    segments[2].choices = vec![choice("Open door", 5, "doorOpened"), choice("Leave", 3, "")];
    let mut p = restored_at(segments, 2, Flags::defaults());

    p.start_level_after_loading();
    assert!(run_until(&mut p, 5, |p| p.state() == PlaybackState::AwaitingChoice));
    p.push_input(Input::Select(1));
    p.tick(FRAME);

    assert_eq!(p.current_index(), 3);
    assert_eq!(p.flags(), &Flags::defaults());
}

#[test]
fn out_of_range_choice_is_ignored() {
    let mut segments = linear_story(3);
    segments[0].auto_continue = false;
    segments[0].choices = vec![choice("Only", 2, "")];
    let mut p = player(segments);

    p.start_level_after_loading();
    assert!(run_until(&mut p, 5, |p| p.state() == PlaybackState::AwaitingChoice));
    p.push_input(Input::Select(4));
    p.tick(FRAME);
    assert_eq!(p.state(), PlaybackState::AwaitingChoice);
    assert_eq!(p.current_index(), 0);
}

#[test]
fn required_flag_gates_the_chain() {
    let mut segments = linear_story(6);
    segments[3].next_segment = Some(4);
    segments[4].required_flag = "doorOpened".to_string();

    let graph = SegmentGraph::new(segments.clone());
    let mut flags = Flags::defaults();
    assert_eq!(graph.resolve_next(&segments[3], 3, &flags), Some(4));
    assert_eq!(graph.resolve_next(&segments[4], 4, &flags), None);
    flags.set("doorOpened");
    assert_eq!(graph.resolve_next(&segments[4], 4, &flags), Some(5));

    let mut p = restored_at(segments.clone(), 3, Flags::defaults());
    p.start_level_after_loading();
    assert!(run_until(&mut p, 30, |p| p.current_index() == 4));
    assert!(run_until(&mut p, 30, |p| p.state() == PlaybackState::Terminal));
    assert_eq!(p.current_index(), 4);

    let mut flags = Flags::defaults();
    flags.set("doorOpened");
    let mut p = restored_at(segments, 4, flags);
    p.start_level_after_loading();
    assert!(run_until(&mut p, 30, |p| p.current_index() == 5));
}

#[test]
fn out_of_range_saved_index_restarts_from_zero() {
    let mut p = restored_at(linear_story(10), 99, Flags::defaults());
    assert_eq!(p.progress().current_segment_index, 99);

    p.start_level_after_loading();
    assert_eq!(p.current_index(), 0);
    assert_eq!(p.scheduler().active().clip(), Some("s0.mp4"));
    assert_eq!(p.progress_store().load().current_segment_index, 0);
}

#[test]
fn skip_mid_segment_starts_the_next_one() {
    let mut p = player(linear_story(3));
    p.start_level_after_loading();
    run_until(&mut p, 3, |_| false);
    assert_eq!(p.state(), PlaybackState::AwaitingEnd);

    p.push_input(Input::Skip);
    p.tick(FRAME);

    assert_eq!(p.current_index(), 1);
    assert!(p.state().is_live());
    assert_eq!(p.scheduler().active().clip(), Some("s1.mp4"));
    assert!(!p.scheduler().standby().is_playing());
    let events: Vec<PlayerEvent> = p.drain_events().collect();
    assert!(events.contains(&PlayerEvent::Skipped { from: 0 }));
}

#[test]
fn skip_on_last_segment_is_terminal() {
    let mut p = player(linear_story(1));
    p.start_level_after_loading();
    p.tick(FRAME);

    p.skip_current_segment();
    assert_eq!(p.state(), PlaybackState::Terminal);
    assert!(!p.scheduler().active_is_playing());

    // Nothing left to skip.
    p.skip_current_segment();
    assert_eq!(p.state(), PlaybackState::Terminal);
}

#[test]
fn skip_drops_pending_choice() {
    let mut segments = linear_story(4);
    segments[0].auto_continue = false;
    segments[0].choices = vec![choice("Far", 3, "far")];
    let mut p = player(segments);

    p.start_level_after_loading();
    assert!(run_until(&mut p, 5, |p| p.state() == PlaybackState::AwaitingChoice));
    p.skip_current_segment();

    assert_eq!(p.current_index(), 1);
    assert!(!p.flags().is_set("far"));
}

#[test]
fn skip_cancels_a_pending_first_start() {
    let catalog = SimCatalog::new(Duration::from_secs(2), Duration::from_secs(3));
    let mut p = build(linear_story(2), ProgressStore::new(MemoryStore::new()), catalog);

    p.start_level_after_loading();
    p.tick(FRAME);
    assert!(p.scheduler().is_starting());

    p.skip_current_segment();
    assert_eq!(p.current_index(), 1);
    assert!(p.state().is_live());

    // Later segments only wait for the bounded timeout.
    assert!(run_until(&mut p, 6, |p| !p.scheduler().is_starting()));
    assert!(p.scheduler().active_is_playing());
}

#[test]
fn pause_button_sets_flag_and_resumes() {
    let mut segments = linear_story(2);
    segments[0].pause = Some(PauseSpec {
        at: 1.0,
        buttons: vec![PauseButton {
            label: "Knock".to_string(),
            set_flag: "knocked".to_string(),
        }],
        text: "Someone is there".to_string(),
    });
    let catalog = catalog().with_clip("s0.mp4", Duration::from_secs(3), LATENCY);
    let mut p = build(segments, ProgressStore::new(MemoryStore::new()), catalog);

    p.start_level_after_loading();
    assert!(run_until(&mut p, 20, |p| p.state() == PlaybackState::Paused));
    assert_eq!(p.scheduler().active().player().state(), PlayerState::Paused);
    assert!(p.scheduler().active().player().position().unwrap() >= 1.0);
    assert!(matches!(p.prompt(), Some(Prompt::Pause(spec)) if spec.buttons.len() == 1));

    // Continue and unknown buttons do not dismiss a pause with buttons.
    p.push_input(Input::Continue);
    p.push_input(Input::Select(3));
    p.tick(FRAME);
    assert_eq!(p.state(), PlaybackState::Paused);

    p.push_input(Input::Select(0));
    p.tick(FRAME);
    assert_eq!(p.state(), PlaybackState::AwaitingEnd);
    assert!(p.scheduler().active_is_playing());
    assert!(p.flags().is_set("knocked"));
    assert!(p.progress_store().load().flags.is_set("knocked"));

    assert!(run_until(&mut p, 30, |p| p.current_index() == 1));
}

#[test]
fn pause_past_clip_end_fires_when_video_ends() {
    let mut segments = linear_story(2);
    segments[0].pause = Some(PauseSpec {
        at: 10.0,
        buttons: Vec::new(),
        text: String::new(),
    });
    let mut p = player(segments);

    p.start_level_after_loading();
    assert!(run_until(&mut p, 30, |p| p.state() == PlaybackState::Paused));
    assert_eq!(p.current_index(), 0);

    p.push_input(Input::Continue);
    p.tick(FRAME);
    assert_eq!(p.current_index(), 1);
}

#[test]
fn auto_continue_takes_precedence_over_dialogue_and_choices() {
    let mut segments = linear_story(3);
    segments[0].dialogue = Some(Dialogue {
        text: "Hello".to_string(),
        continue_label: "Next".to_string(),
    });
    segments[0].choices = vec![choice("Jump", 2, "jumped")];
    let mut p = player(segments);

    p.start_level_after_loading();
    let mut seen = Vec::new();
    for _ in 0..30 {
        seen.push(p.state());
        if p.current_index() == 1 {
            break;
        }
        p.tick(FRAME);
    }

    assert_eq!(p.current_index(), 1);
    assert!(!seen.contains(&PlaybackState::AwaitingDialogue));
    assert!(!seen.contains(&PlaybackState::AwaitingChoice));
    assert!(!p.flags().is_set("jumped"));
}

#[test]
fn auto_continue_without_next_shows_dialogue() {
    let mut segments = linear_story(1);
    segments[0].dialogue = Some(Dialogue {
        text: "The end?".to_string(),
        continue_label: "Continue".to_string(),
    });
    let mut p = player(segments);

    p.start_level_after_loading();
    assert!(run_until(&mut p, 30, |p| p.state() == PlaybackState::AwaitingDialogue));
    assert!(matches!(p.prompt(), Some(Prompt::Dialogue(d)) if d.text == "The end?"));

    p.push_input(Input::Continue);
    p.tick(FRAME);
    assert_eq!(p.state(), PlaybackState::Terminal);
}

#[test]
fn looping_segment_with_choices_waits_while_looping() {
    let mut segments = linear_story(3);
    segments[0].is_looping = true;
    segments[0].choices = vec![choice("Go", 2, "")];
    let mut p = player(segments);

    p.start_level_after_loading();
    run_until(&mut p, 50, |_| false);
    assert_eq!(p.state(), PlaybackState::AwaitingChoice);
    assert!(p.scheduler().active_is_playing());

    p.push_input(Input::Select(0));
    p.tick(FRAME);
    assert_eq!(p.current_index(), 2);
}

#[test]
fn dialogue_then_click_advances() {
    let mut segments = linear_story(2);
    segments[0].auto_continue = false;
    segments[0].dialogue = Some(Dialogue {
        text: "Hi".to_string(),
        continue_label: "Continue".to_string(),
    });
    let mut p = player(segments);

    p.start_level_after_loading();
    assert!(run_until(&mut p, 5, |p| p.state() == PlaybackState::AwaitingDialogue));

    p.push_input(Input::Continue);
    p.tick(FRAME);
    assert_eq!(p.state(), PlaybackState::AwaitingClick);
    assert_eq!(p.prompt(), Some(Prompt::Continue));

    p.push_input(Input::Continue);
    p.tick(FRAME);
    assert_eq!(p.current_index(), 1);
}

#[test]
fn missing_video_halts_at_segment() {
    let mut segments = linear_story(3);
    segments[1].video = None;
    let mut p = player(segments);

    p.start_level_after_loading();
    assert!(run_until(&mut p, 30, |p| p.state() == PlaybackState::Failed));
    assert_eq!(p.current_index(), 1);
    let events: Vec<PlayerEvent> = p.drain_events().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, PlayerEvent::SegmentFailed { index: 1, .. })));

    // No automatic recovery.
    run_until(&mut p, 30, |_| false);
    assert_eq!(p.state(), PlaybackState::Failed);
    assert_eq!(p.current_index(), 1);
}

#[test]
fn invalid_choice_target_fails_the_transition() {
    let mut segments = linear_story(2);
    segments[0].auto_continue = false;
    segments[0].choices = vec![choice("Nowhere", 9, "")];
    let mut p = player(segments);

    p.start_level_after_loading();
    assert!(run_until(&mut p, 5, |p| p.state() == PlaybackState::AwaitingChoice));
    p.push_input(Input::Select(0));
    p.tick(FRAME);

    assert_eq!(p.state(), PlaybackState::Failed);
    assert_eq!(p.current_index(), 0);
}

#[test]
fn first_clip_decode_failure_fails_the_segment() {
    let catalog = catalog().with_broken_clip("s0.mp4", LATENCY);
    let mut p = build(linear_story(3), ProgressStore::new(MemoryStore::new()), catalog);

    p.start_level_after_loading();
    assert!(p.scheduler().is_starting());
    assert!(run_until(&mut p, 5, |p| p.state() == PlaybackState::Failed));
    assert_eq!(p.current_index(), 0);
    assert!(!p.scheduler().is_starting());
    let events: Vec<PlayerEvent> = p.drain_events().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, PlayerEvent::SegmentFailed { index: 0, .. })));

    run_until(&mut p, 10, |_| false);
    assert_eq!(p.state(), PlaybackState::Failed);
}

#[test]
fn later_clip_decode_failure_fails_that_segment() {
    let catalog = catalog().with_broken_clip("s1.mp4", LATENCY);
    let mut p = build(linear_story(3), ProgressStore::new(MemoryStore::new()), catalog);

    p.start_level_after_loading();
    assert!(run_until(&mut p, 40, |p| p.state() == PlaybackState::Failed));
    assert_eq!(p.current_index(), 1);
    assert_eq!(p.progress_store().load().current_segment_index, 1);
}

#[test]
fn choice_can_replay_its_own_segment() {
    let mut segments = linear_story(3);
    segments[1].auto_continue = false;
    segments[1].choices = vec![choice("Again", 1, ""), choice("On", 2, "")];
    let mut p = restored_at(segments, 1, Flags::defaults());

    p.start_level_after_loading();
    assert!(run_until(&mut p, 5, |p| p.state() == PlaybackState::AwaitingChoice));

    for _ in 0..3 {
        p.push_input(Input::Select(0));
        p.tick(FRAME);
        assert!(run_until(&mut p, 10, |p| {
            p.state() == PlaybackState::AwaitingChoice
                && !p.scheduler().is_starting()
                && p.scheduler().active_is_playing()
        }));

        assert_eq!(p.current_index(), 1);
        assert_eq!(p.scheduler().active().clip(), Some("s1.mp4"));
        assert_eq!(p.scheduler().standby().clip(), Some("s2.mp4"));
    }

    let events: Vec<PlayerEvent> = p.drain_events().collect();
    let replays = events
        .iter()
        .filter(|e| matches!(e, PlayerEvent::ChoiceMade { index: 1, target: 1, .. }))
        .count();
    assert_eq!(replays, 3);
    assert_eq!(p.flags(), &Flags::defaults());

    // The story still moves on afterwards.
    p.push_input(Input::Select(1));
    p.tick(FRAME);
    assert_eq!(p.current_index(), 2);
}

#[test]
fn shutdown_saves_progress_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");

    let store = ProgressStore::new(JsonFileStore::open(&path));
    let mut p = build(linear_story(3), store, catalog());
    p.start_level_after_loading();
    assert!(run_until(&mut p, 30, |p| p.current_index() == 1));
    p.shutdown();

    let reopened = ProgressStore::new(JsonFileStore::open(&path));
    assert_eq!(reopened.load().current_segment_index, 1);
}

#[test]
fn restart_clears_progress_and_replays() {
    let mut flags = Flags::defaults();
    flags.set("knocked");
    let mut p = restored_at(linear_story(3), 2, flags);

    p.start_level_after_loading();
    assert_eq!(p.current_index(), 2);

    p.restart();
    assert_eq!(p.current_index(), 0);
    assert!(!p.flags().is_set("knocked"));
    assert_eq!(p.progress_store().load(), Progress::default());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn skip_never_leaves_a_stuck_wait(count in 1usize..6, start in 0usize..6, ticks in 0usize..40) {
        let mut p = restored_at(linear_story(count), start, Flags::defaults());
        p.start_level_after_loading();
        for _ in 0..ticks {
            p.tick(FRAME);
        }

        let before = p.current_index();
        let was_live = p.state().is_live();
        p.skip_current_segment();

        if p.state() != PlaybackState::Terminal {
            prop_assert!(was_live);
            prop_assert!(p.state().is_live());
            prop_assert_eq!(p.current_index(), before + 1);
        }
    }
}
