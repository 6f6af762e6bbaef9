use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use story_reel::config::Settings;
use story_reel::console::{self, Command};
use story_reel::progress::ProgressStore;
use story_reel::scheduler::DualBufferScheduler;
use story_reel::sim::{SimBackend, SimCatalog};
use story_reel::storage::{JsonFileStore, KeyValueStore};
use story_reel::story::SegmentGraph;
use story_reel::video::VideoPlayer;
use story_reel::{PlayerEvent, StoryPlayer};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "story-reel", version, about = "Branching video-narrative player")]
struct Cli {
    /// Settings file (TOML).
    #[arg(long, env = "STORY_REEL_CONFIG")]
    config: Option<PathBuf>,

    /// Story definition, overrides the setting.
    #[arg(long)]
    story: Option<PathBuf>,

    /// Progress file, overrides the setting.
    #[arg(long)]
    progress: Option<PathBuf>,

    /// Clear saved progress before starting.
    #[arg(long)]
    reset: bool,

    /// Open a window and decode with GStreamer.
    #[cfg(feature = "desktop")]
    #[arg(long)]
    desktop: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(story) = cli.story.clone() {
        settings.story_path = story;
    }
    if let Some(progress) = cli.progress.clone() {
        settings.progress_path = progress;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();
    tracing::debug!("Loaded settings: {:?}", settings);

    let graph = SegmentGraph::load(&settings.story_path)
        .with_context(|| format!("Failed to load story {}", settings.story_path.display()))?;
    tracing::info!(
        "Loaded {} segments ({} videos) from {}",
        graph.len(),
        graph.unique_videos().len(),
        settings.story_path.display()
    );
    let store = ProgressStore::new(JsonFileStore::open(settings.progress_path.clone()));

    #[cfg(feature = "desktop")]
    {
        if cli.desktop {
            return run_desktop(&settings, graph, store, cli.reset);
        }
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    runtime.block_on(run_headless(settings, graph, store, cli.reset))
}

async fn run_headless(
    settings: Settings,
    graph: SegmentGraph,
    store: ProgressStore<JsonFileStore>,
    reset: bool,
) -> Result<()> {
    let catalog = SimCatalog::from_story(
        &graph,
        settings.sim_default_duration(),
        settings.sim_prepare_latency(),
    );
    let mut backend = SimBackend::new(catalog);
    let scheduler =
        DualBufferScheduler::new(&mut backend, settings.prepare_timeout(), settings.preload_workers)?;
    let mut player = StoryPlayer::new(graph, scheduler, store);

    if reset {
        player.reset_progress();
    }
    println!("{}", console::HELP);
    player.start_level_after_loading();

    let mut commands = console::spawn_stdin_reader();
    let mut interval = tokio::time::interval(settings.tick_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last = tokio::time::Instant::now();
    let mut shown = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = tokio::time::Instant::now();
                player.tick(now - last);
                last = now;
                report(&mut player, &mut shown);
            }
            Some(command) = commands.recv() => {
                if !apply_command(&mut player, command) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    player.shutdown();
    Ok(())
}

#[cfg(feature = "desktop")]
fn run_desktop(
    settings: &Settings,
    graph: SegmentGraph,
    store: ProgressStore<JsonFileStore>,
    reset: bool,
) -> Result<()> {
    use story_reel::gst_video::GstBackend;
    use story_reel::renderer::Renderer;

    let mut backend = GstBackend::init(settings.media_dir.clone())?;
    let scheduler =
        DualBufferScheduler::new(&mut backend, settings.prepare_timeout(), settings.preload_workers)?;
    let mut player = StoryPlayer::new(graph, scheduler, store);
    let mut renderer = Renderer::new("Story Reel")?;

    if reset {
        player.reset_progress();
    }
    player.start_level_after_loading();

    let mut last = std::time::Instant::now();
    let mut shown = None;
    'running: loop {
        for command in renderer.process_events() {
            if !apply_command(&mut player, command) {
                break 'running;
            }
        }

        let now = std::time::Instant::now();
        player.tick(now - last);
        last = now;
        report(&mut player, &mut shown);

        let frame = player.scheduler().active().player().current_frame();
        renderer.render(frame.as_ref())?;
    }

    player.shutdown();
    Ok(())
}

/// Apply a frontend command. Returns false when the session should end.
fn apply_command<P: VideoPlayer, S: KeyValueStore>(
    player: &mut StoryPlayer<P, S>,
    command: Command,
) -> bool {
    match command {
        Command::Input(input) => player.push_input(input),
        Command::Save => player.save_progress(),
        Command::Reset => {
            player.reset_progress();
            println!("Progress reset. Type 'restart' to play from the beginning.");
        }
        Command::Restart => player.restart(),
        Command::Status => println!(
            "segment {} state {:?} flags {:?}",
            player.current_index(),
            player.state(),
            player.flags()
        ),
        Command::Help => println!("{}", console::HELP),
        Command::Quit => return false,
    }
    true
}

/// Print story events and the current prompt when it changes.
fn report<P: VideoPlayer, S: KeyValueStore>(player: &mut StoryPlayer<P, S>, shown: &mut Option<String>) {
    let events: Vec<PlayerEvent> = player.drain_events().collect();
    for event in events {
        match event {
            PlayerEvent::SegmentStarted { index, name } => println!("> [{}] {}", index, name),
            PlayerEvent::Terminal { .. } => println!("The end."),
            PlayerEvent::SegmentFailed { index, reason } => {
                println!("Segment {} cannot play: {}", index, reason)
            }
            other => tracing::debug!("{:?}", other),
        }
    }

    let prompt = player.prompt().map(|p| console::describe_prompt(&p));
    if prompt != *shown {
        if let Some(text) = &prompt {
            println!("{}", text);
        }
        *shown = prompt;
    }
}
