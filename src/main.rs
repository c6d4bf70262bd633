use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storyhub::cache::{CacheSource, CacheStorage, NoopStorage, PersistentCache, SqliteStorage};
use storyhub::config::Config;
use storyhub::event::{emit, Event, EventHandler};
use storyhub::list::{ListError, MockProvider, ProviderRegistry, RestListClient, RuntimeMode};
use storyhub::poller::poll;
use storyhub::stories::{ListErrorReporter, MutationOutcome, Story, StoryApi};

#[derive(Parser, Debug)]
#[command(name = "storyhub")]
#[command(about = "Read and follow a list-backed story feed")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./storyhub.yaml, then $XDG_CONFIG_HOME/storyhub/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Serve fixture data instead of calling the site
  #[arg(long)]
  mock: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List published stories, newest first
  List,
  /// Show one story with its reactions and comments
  Show { id: i64 },
  /// React to a story as the signed-in user
  React { id: i64, reaction: String },
  /// Print stories as they are published
  Watch,
  /// Delete this site's cached entries
  ClearCache,
}

/// Log to a file in the data directory so stdout only carries command output.
fn init_logging() -> Result<WorkerGuard> {
  let dir = dirs::data_dir()
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("storyhub");
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, "storyhub.log"));
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("storyhub=info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging()?;

  let config = Config::load(args.config.as_deref(), args.mock)?;
  let explicit = if args.mock {
    Some(true)
  } else {
    Config::mock_from_env().or(config.mock)
  };
  let mode = RuntimeMode::detect(&config.site.host(), explicit);

  if config.cache.enabled {
    run(args.command, config, mode, SqliteStorage::open()?).await
  } else {
    info!("Persistent cache disabled");
    run(args.command, config, mode, NoopStorage).await
  }
}

async fn run<S: CacheStorage + 'static>(
  command: Command,
  config: Config,
  mode: RuntimeMode,
  storage: S,
) -> Result<()> {
  let mut cache = PersistentCache::new(storage);
  if let Some(max_entries) = config.cache.max_entries {
    cache = cache.with_max_entries(max_entries);
  }
  cache.initialize(config.site.cache_namespace());

  let registry = ProviderRegistry::new();
  registry.register_providers(
    Arc::new(MockProvider::new(&config.lists)),
    Arc::new(RestListClient::new(&config)?),
  );
  let provider = registry.data_provider(mode.use_mock)?;

  let mut events = EventHandler::new();
  let api = StoryApi::new(
    Arc::clone(&provider),
    cache,
    config.lists.clone(),
    &config.cache,
  )
  .with_events(events.sender());
  let reporter = ListErrorReporter::new(provider, &config.lists.errors, "storyhub-cli");

  let result = match command {
    Command::List => list(&api).await,
    Command::Show { id } => show(&api, id).await,
    Command::React { id, reaction } => react(&api, id, &reaction).await,
    Command::Watch => watch(&api, &config, mode, &mut events).await,
    Command::ClearCache => {
      let removed = api.cache().clear()?;
      println!("Removed {} cached entries", removed);
      Ok(())
    }
  };

  if let Err(e) = &result {
    error!(error = %e, "Command failed");
    if let Err(report_error) = reporter.report(&e.to_string()).await {
      warn!(error = %report_error, "Failed to report error");
    }
  }
  result
}

fn print_story_line(story: &Story) {
  println!(
    "{:>5}  {}  {}",
    story.id,
    story.created.format("%Y-%m-%d"),
    story.title
  );
}

async fn list<S: CacheStorage + 'static>(api: &StoryApi<S>) -> Result<()> {
  let stories = api.get_stories().await?;
  let note = match stories.source {
    CacheSource::Network => "",
    CacheSource::CacheFresh => " (cached)",
    CacheSource::CacheStale => " (cached, refreshing)",
  };

  println!("{} stories{}", stories.data.len(), note);
  for story in &stories.data {
    print_story_line(story);
  }
  Ok(())
}

async fn show<S: CacheStorage + 'static>(api: &StoryApi<S>, id: i64) -> Result<()> {
  let (story, reactions, comments) = tokio::try_join!(
    api.get_story(id, None),
    api.get_reactions(id),
    api.get_comments(id)
  )?;

  println!("{}", story.title);
  println!("Published {}", story.created.format("%Y-%m-%d %H:%M"));
  if let Some(summary) = &story.summary {
    println!("\n{}", summary);
  }
  if let Some(cover) = &story.cover_image_url {
    println!("Cover: {}", cover);
  }

  println!("\nReactions: {}", reactions.len());
  for reaction in &reactions {
    println!("  user {}: {}", reaction.user_id, reaction.reaction);
  }

  println!("\nComments: {}", comments.len());
  for comment in &comments {
    println!("  user {}: {}", comment.author_id, comment.body);
  }
  Ok(())
}

async fn react<S: CacheStorage + 'static>(api: &StoryApi<S>, id: i64, reaction: &str) -> Result<()> {
  let user = api.current_user().await?;
  let current = api.get_reactions(id).await?;

  let change = api
    .engagement()
    .add_reaction(&current, id, user.id, reaction);
  println!("{} reactions (saving...)", change.state().len());

  match change.commit().await {
    MutationOutcome::Committed(state) => {
      println!("Saved. {} reactions", state.len());
      Ok(())
    }
    MutationOutcome::Reverted { error, .. } => Err(eyre!("Reaction not saved: {}", error)),
  }
}

async fn watch<S: CacheStorage + 'static>(
  api: &StoryApi<S>,
  config: &Config,
  mode: RuntimeMode,
  events: &mut EventHandler,
) -> Result<()> {
  let latest = api
    .get_stories()
    .await?
    .data
    .iter()
    .map(|s| s.created)
    .max()
    .unwrap_or_else(Utc::now);
  let since = Arc::new(Mutex::new(latest));
  let interval = config.poll.interval(mode.use_mock);

  let fetch_api = api.clone();
  let cursor = Arc::clone(&since);
  let found = events.sender();
  let failed = events.sender();

  let handle = poll(
    move || {
      let api = fetch_api.clone();
      let since = *cursor.lock().unwrap_or_else(PoisonError::into_inner);
      async move { api.fetch_stories_since(since).await }
    },
    interval,
    move |stories: Vec<Story>| {
      if let Some(newest) = stories.iter().map(|s| s.created).max() {
        *since.lock().unwrap_or_else(PoisonError::into_inner) = newest;
        emit(Some(&found), Event::NewStories(stories));
      }
    },
    move |e: ListError| emit(Some(&failed), Event::Error(e.to_string())),
  );

  println!(
    "Watching for new stories every {}s (Ctrl-C to stop)",
    interval.as_secs_f32()
  );

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      event = events.next() => match event {
        Some(Event::NewStories(stories)) => stories.iter().for_each(print_story_line),
        Some(Event::Notice(message)) => println!("{}", message),
        Some(Event::Error(message)) => eprintln!("Polling failed: {}", message),
        Some(Event::StoriesUpdated(_)) => {}
        None => break,
      }
    }
  }

  handle.stop();
  Ok(())
}
