// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use indicatif::{ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, debug, error, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use transbatch::app_config::{self, Config, TranslationProvider};
use transbatch::database::{DatabaseConnection, Repository};
use transbatch::task::models::{short_id, Item, ItemStatus, NewItem, StopOutcome, TaskInfo, TaskStatus};
use transbatch::task::{ControllerOptions, ItemStore, MemoryStore, TaskController, TaskCreateParams};
use transbatch::{CachingClient, HttpTranslationClient, MockClient, TranslationCache, TranslationClient};

/// CLI Wrapper for TranslationProvider to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliTranslationProvider {
    OpenAI,
    Google,
    Anthropic,
}

impl From<CliTranslationProvider> for TranslationProvider {
    fn from(cli_provider: CliTranslationProvider) -> Self {
        match cli_provider {
            CliTranslationProvider::OpenAI => TranslationProvider::OpenAI,
            CliTranslationProvider::Google => TranslationProvider::Google,
            CliTranslationProvider::Anthropic => TranslationProvider::Anthropic,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a JSON file of localization strings for a subject
    Import {
        /// JSON file; nested objects are flattened into dotted keys
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Subject the strings belong to
        #[arg(short, long)]
        subject: String,
    },

    /// Start a background translation task for a subject
    Translate(TranslateArgs),

    /// Resume a paused or interrupted task and follow its progress
    Resume {
        /// Task ID
        task_id: String,
    },

    /// Re-attach interrupted tasks that no live process drives and follow them
    Recover,

    /// Pause a task, including one driven by another transbatch process
    Pause {
        /// Task ID
        task_id: String,
    },

    /// Stop a task, including one driven by another transbatch process
    Stop {
        /// Task ID
        task_id: String,

        /// Record the task as failed instead of completed
        #[arg(long)]
        failed: bool,
    },

    /// Show one task
    Status {
        /// Task ID
        task_id: String,
    },

    /// List tasks
    List {
        /// Only show tasks of this subject
        #[arg(short, long)]
        subject: Option<String>,
    },

    /// Delete a finished task
    Delete {
        /// Task ID
        task_id: String,
    },

    /// Show the items of a subject
    Items {
        /// Subject to show
        #[arg(short, long)]
        subject: String,
    },

    /// Show database statistics
    Stats,

    /// Generate shell completions for transbatch
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct TranslateArgs {
    /// Subject whose untranslated items are sent
    #[arg(short, long)]
    subject: String,

    /// Translation provider to use
    #[arg(short, long, value_enum)]
    provider: Option<CliTranslationProvider>,

    /// Model name to use for translation
    #[arg(short, long)]
    model: Option<String>,

    /// Items per batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Run the whole pipeline in memory with a mock provider
    #[arg(long)]
    dry_run: bool,
}

/// transbatch - background batch translation for localization strings
#[derive(Parser, Debug)]
#[command(name = "transbatch")]
#[command(version)]
#[command(about = "Resumable background batch translation with AI providers")]
#[command(long_about = "transbatch translates large sets of localization strings in the background,
in batches, with pause, resume and stop support. Progress is stored in SQLite.

EXAMPLES:
    transbatch import strings.json -s app-web          # Load strings for a subject
    transbatch translate -s app-web                    # Translate with the configured provider
    transbatch translate -s app-web -p google -b 25    # Use Gemini, 25 items per batch
    transbatch translate -s app-web --dry-run          # Exercise the pipeline with a mock provider
    transbatch list                                    # Show every task
    transbatch resume 3f2a...                          # Continue a paused task
    transbatch recover                                 # Pick up tasks left by a crashed run
    transbatch completions bash > transbatch.bash      # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically.

Press Ctrl-C while a task runs to pause it; resume it later with `transbatch resume`.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json", global = true)]
    config_path: String,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // ANSI color and marker per level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("1;31", "❌"),
            Level::Warn => ("1;33", "🚧"),
            Level::Info => ("1;32", "·"),
            Level::Debug => ("1;36", "🔍"),
            Level::Trace => ("1;35", "📋"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let (color, marker) = Self::style_for_level(record.level());
            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "\x1B[{}m{} {} {}\x1B[0m", color, now, marker, record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn level_filter(level: &app_config::LogLevel) -> LevelFilter {
    match level {
        app_config::LogLevel::Error => LevelFilter::Error,
        app_config::LogLevel::Warn => LevelFilter::Warn,
        app_config::LogLevel::Info => LevelFilter::Info,
        app_config::LogLevel::Debug => LevelFilter::Debug,
        app_config::LogLevel::Trace => LevelFilter::Trace,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Trace is the ceiling; the effective level is narrowed once the config is read
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(shell, &mut cmd, "transbatch", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config_path, cli.log_level.clone())?;
    log::set_max_level(level_filter(&config.log_level));

    let result = match cli.command {
        Commands::Import { file, subject } => run_import(&config, &file, &subject).await,
        Commands::Translate(args) => run_translate(config, args).await,
        Commands::Resume { task_id } => run_resume(&config, &task_id).await,
        Commands::Recover => run_recover(&config).await,
        Commands::Pause { task_id } => {
            let controller = offline_controller(&config)?;
            controller.pause(&task_id).await?;
            print_task(&controller.status(&task_id).await?);
            Ok(())
        }
        Commands::Stop { task_id, failed } => {
            let controller = offline_controller(&config)?;
            let outcome = if failed {
                StopOutcome::Failed
            } else {
                config.engine.stop_outcome
            };
            controller.stop_with(&task_id, outcome).await?;
            print_task(&controller.status(&task_id).await?);
            Ok(())
        }
        Commands::Status { task_id } => {
            let controller = offline_controller(&config)?;
            print_task(&controller.status(&task_id).await?);
            Ok(())
        }
        Commands::List { subject } => {
            let controller = offline_controller(&config)?;
            let tasks = controller.list(subject.as_deref()).await?;
            if tasks.is_empty() {
                info!("No tasks found");
            }
            for task in &tasks {
                println!("{}", task);
            }
            Ok(())
        }
        Commands::Delete { task_id } => {
            let controller = offline_controller(&config)?;
            controller.delete(&task_id).await?;
            Ok(())
        }
        Commands::Items { subject } => run_items(&config, &subject).await,
        Commands::Stats => {
            let repository = open_repository(&config)?;
            println!("{}", repository.stats()?);
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

/// Load the configuration file, creating a default one when missing
fn load_config(config_path: &str, log_level: Option<CliLogLevel>) -> Result<Config> {
    let mut config = if Path::new(config_path).exists() {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load config file: {}", config_path))?
    } else {
        warn!("Config file not found at '{}', creating default config.", config_path);
        let config = Config::default();
        config
            .save(config_path)
            .with_context(|| format!("Failed to write default config to file: {}", config_path))?;
        config
    };

    if let Some(level) = log_level {
        config.log_level = level.into();
    }
    Ok(config)
}

fn open_repository(config: &Config) -> Result<Repository> {
    match &config.engine.database_path {
        Some(path) => {
            let db = DatabaseConnection::new(path)
                .with_context(|| format!("Failed to open database: {}", path.display()))?;
            Ok(Repository::new(db))
        }
        None => Repository::new_default(),
    }
}

/// Provider client, behind the translation cache when enabled
fn translation_client(config: &Config) -> Result<(Arc<dyn TranslationClient>, Option<TranslationCache>)> {
    let http: Arc<dyn TranslationClient> = Arc::new(HttpTranslationClient::from_config(config));
    if !config.translation.common.cache_enabled {
        return Ok((http, None));
    }

    let cache = match &config.engine.cache_path {
        Some(path) => TranslationCache::load(path)?,
        None => TranslationCache::new(),
    };
    let client = CachingClient::new(
        http,
        cache.clone(),
        config.source_language.clone(),
        config.target_language.clone(),
    );
    Ok((Arc::new(client), Some(cache)))
}

/// Persist the cache file and report the counters
fn save_cache(config: &Config, cache: Option<&TranslationCache>) -> Result<()> {
    let Some(cache) = cache else {
        return Ok(());
    };
    info!("Translation cache: {}", cache.stats());
    if let Some(path) = &config.engine.cache_path {
        cache.save(path)?;
    }
    Ok(())
}

/// Controller for commands that drive tasks with the configured providers
fn live_controller(config: &Config) -> Result<(TaskController, Option<TranslationCache>)> {
    config.validate().context("Configuration validation failed")?;
    let repository = Arc::new(open_repository(config)?);
    let (client, cache) = translation_client(config)?;
    let controller = TaskController::new(
        repository.clone(),
        repository,
        client,
        ControllerOptions::from_config(&config.engine),
    );
    Ok((controller, cache))
}

/// Controller for commands that only read or write persisted state
fn offline_controller(config: &Config) -> Result<TaskController> {
    let repository = Arc::new(open_repository(config)?);
    let client: Arc<dyn TranslationClient> = Arc::new(HttpTranslationClient::from_config(config));
    Ok(TaskController::new(
        repository.clone(),
        repository,
        client,
        ControllerOptions::from_config(&config.engine),
    ))
}

// ============================================================================
// Commands
// ============================================================================

async fn run_import(config: &Config, file: &Path, subject: &str) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read input file: {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse input file: {}", file.display()))?;

    let mut entries = Vec::new();
    flatten_strings("", &value, &mut entries)?;

    let repository = open_repository(config)?;
    let existing: std::collections::HashSet<String> = repository
        .list_items(subject)
        .await?
        .into_iter()
        .map(|item| item.key)
        .collect();

    let total = entries.len();
    let new_items: Vec<NewItem> = entries
        .into_iter()
        .filter(|(key, _)| !existing.contains(key))
        .map(|(key, text)| NewItem::new(key, text))
        .collect();
    let skipped = total - new_items.len();

    let inserted = repository.insert_items(subject, new_items).await?;
    info!(
        "Imported {} item(s) into '{}' ({} already present)",
        inserted.len(),
        subject,
        skipped
    );
    Ok(())
}

/// Collect string leaves of a JSON document as (dotted key, text) pairs
fn flatten_strings(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_strings(&path, child, out)?;
            }
            Ok(())
        }
        serde_json::Value::String(text) if !prefix.is_empty() => {
            out.push((prefix.to_string(), text.clone()));
            Ok(())
        }
        _ if prefix.is_empty() => Err(anyhow!("Input file must contain a JSON object")),
        other => {
            debug!("Skipping non-string value at '{}': {}", prefix, other);
            Ok(())
        }
    }
}

async fn run_translate(config: Config, args: TranslateArgs) -> Result<()> {
    let mut config = config;
    if let Some(provider) = args.provider {
        config.translation.provider = provider.into();
    }
    if let Some(model) = &args.model {
        let provider_str = config.translation.provider.to_lowercase_string();
        if let Some(provider_config) = config
            .translation
            .available_providers
            .iter_mut()
            .find(|p| p.provider_type == provider_str)
        {
            provider_config.model = model.clone();
        }
    }
    if let Some(batch_size) = args.batch_size {
        config.engine.default_batch_size = batch_size;
    }

    let repository = open_repository(&config)?;
    let items = repository.list_items(&args.subject).await?;
    if items.is_empty() {
        return Err(anyhow!("No items found for subject '{}'; run `import` first", args.subject));
    }

    if args.dry_run {
        return run_dry(&config, &args.subject, &items).await;
    }

    let (controller, cache) = live_controller(&config)?;

    let task_id = match controller.active_for_subject(&args.subject).await? {
        Some(active) => {
            info!(
                "Subject '{}' already has task {} ({}), continuing it",
                args.subject,
                short_id(&active.id),
                active.status
            );
            controller.resume(&active.id).await?;
            active.id
        }
        None => {
            let pending = items
                .iter()
                .filter(|item| item.status.needs_translation())
                .map(|item| item.id)
                .collect::<Vec<_>>();
            if pending.is_empty() {
                info!("Every item of '{}' is already translated", args.subject);
                return Ok(());
            }
            let params = TaskCreateParams::new(
                args.subject.clone(),
                pending,
                config.translation.provider.to_lowercase_string(),
                config.translation.get_model(),
                config.engine.default_batch_size,
            );
            controller.start(params).await?
        }
    };

    for task in controller.recoverable().await? {
        if task.id != task_id {
            warn!(
                "Task {} of '{}' was interrupted; continue it with `transbatch resume {}`",
                short_id(&task.id),
                task.subject_id,
                task.id
            );
        }
    }

    if !controller.is_live(&task_id) {
        info!("Task {} is driven by another transbatch process", short_id(&task_id));
        print_task(&controller.status(&task_id).await?);
        return Ok(());
    }

    info!(
        "Translating '{}' with {} ({})",
        args.subject,
        config.translation.provider.display_name(),
        config.translation.get_model()
    );
    let info = follow(&controller, &task_id).await?;
    save_cache(&config, cache.as_ref())?;
    print_task(&info);
    Ok(())
}

/// Translate copies of the pending items in memory with the mock provider
async fn run_dry(config: &Config, subject: &str, items: &[Item]) -> Result<()> {
    let copies: Vec<NewItem> = items
        .iter()
        .filter(|item| item.status.needs_translation())
        .map(|item| NewItem::new(item.key.clone(), item.original_text.clone()))
        .collect();
    if copies.is_empty() {
        info!("Every item of '{}' is already translated", subject);
        return Ok(());
    }
    info!("Dry run: translating {} item(s) in memory with a mock provider", copies.len());

    let store = MemoryStore::new();
    let copied = store.insert_items(subject, copies).await?;
    let store = Arc::new(store);
    let controller = TaskController::new(
        store.clone(),
        store,
        Arc::new(MockClient::working()),
        ControllerOptions::from_config(&config.engine),
    );

    let params = TaskCreateParams::new(
        subject,
        copied.into_iter().map(|item| item.id).collect(),
        config.translation.provider.to_lowercase_string(),
        config.translation.get_model(),
        config.engine.default_batch_size,
    );
    let task_id = controller.start(params).await?;
    let info = follow(&controller, &task_id).await?;
    print_task(&info);
    Ok(())
}

async fn run_resume(config: &Config, task_id: &str) -> Result<()> {
    let (controller, cache) = live_controller(config)?;

    controller.resume(task_id).await?;
    if !controller.is_live(task_id) {
        info!("Task {} is driven by another transbatch process", short_id(task_id));
        print_task(&controller.status(task_id).await?);
        return Ok(());
    }
    let info = follow(&controller, task_id).await?;
    save_cache(config, cache.as_ref())?;
    print_task(&info);
    Ok(())
}

async fn run_recover(config: &Config) -> Result<()> {
    let (controller, cache) = live_controller(config)?;

    let recovered = controller.recover().await?;
    if recovered.is_empty() {
        info!("No interrupted tasks to recover");
        return Ok(());
    }
    info!("Recovered {} interrupted task(s)", recovered.len());

    for task_id in &recovered {
        let info = follow(&controller, task_id).await?;
        print_task(&info);
    }
    save_cache(config, cache.as_ref())?;
    Ok(())
}

async fn run_items(config: &Config, subject: &str) -> Result<()> {
    let repository = open_repository(config)?;
    let items = repository.list_items(subject).await?;
    if items.is_empty() {
        info!("No items found for subject '{}'", subject);
        return Ok(());
    }

    for item in &items {
        let marker = match item.status {
            ItemStatus::Translated => "✓",
            ItemStatus::NeedsTranslation => " ",
            ItemStatus::Error => "!",
        };
        println!(
            "[{}] {:>6} {} = {:?} -> {:?}",
            marker,
            item.id,
            item.key,
            item.original_text,
            item.translated_text.as_deref().unwrap_or("")
        );
    }
    let translated = items.iter().filter(|i| i.status == ItemStatus::Translated).count();
    info!("{}/{} item(s) translated", translated, items.len());
    Ok(())
}

// ============================================================================
// Progress display
// ============================================================================

/// Render task progress until the scheduler exits; Ctrl-C pauses the task
async fn follow(controller: &TaskController, task_id: &str) -> Result<TaskInfo> {
    let mut progress = controller.subscribe(task_id).await?;
    let total = progress.borrow().total_items;

    let progress_bar = ProgressBar::new(total);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} items ({percent}%) {msg} {eta}")
            .or_else(|_| ProgressStyle::default_bar().template("{bar:40} {pos}/{len}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut pause_requested = false;

    let last = loop {
        let task = progress.borrow_and_update().clone();
        progress_bar.set_position(task.processed_items);
        progress_bar.set_message(format!("batch {}/{}", task.current_batch_index, task.total_batches));

        if task.status.is_terminal() || (pause_requested && task.status == TaskStatus::Paused) {
            break task;
        }

        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() {
                    break progress.borrow().clone();
                }
            }
            _ = &mut ctrl_c, if !pause_requested => {
                progress_bar.println("Interrupted, pausing after the current batch...");
                controller.pause(task_id).await?;
                pause_requested = true;
            }
        }
    };

    match last.status {
        TaskStatus::Completed => progress_bar.finish_with_message("done"),
        TaskStatus::Paused => progress_bar.abandon_with_message("paused"),
        _ => progress_bar.abandon_with_message(last.status.to_string()),
    }
    Ok(TaskInfo::from_task(&last))
}

fn print_task(info: &TaskInfo) {
    println!("{}", info);
    println!("  id:        {}", info.id);
    println!("  provider:  {} ({})", info.provider, info.model);
    println!("  created:   {}", info.created_at);
    if let Some(paused_at) = &info.paused_at {
        println!("  paused:    {}", paused_at);
    }
    if let Some(completed_at) = &info.completed_at {
        println!("  completed: {}", completed_at);
    }
    if let Some(message) = &info.error_message {
        println!("  last error: {}", message);
    }
    if info.is_resumable() {
        println!("  resume with: transbatch resume {}", info.id);
    }
}
