//! Storylet Pilot CLI
//!
//! Validates rule files, prints settings, and runs the automation loop
//! against a scripted in-memory page without needing a browser.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use storylet_pilot::automation::ActionRecord;
use storylet_pilot::config::{
    load_config_file, ConfigError, FailurePolicy, JsonFileStore, LoadedConfig, PreferenceStore,
    PrefsError, Settings,
};
use storylet_pilot::dom::{Dom, ElementBuilder, Selector, SelectorError};
use storylet_pilot::locate::TargetDescriptor;
use storylet_pilot::page::MemoryPage;
use storylet_pilot::Session;

/// Storylet Pilot CLI
#[derive(Parser)]
#[command(name = "pilot")]
#[command(about = "Click automation for storylet-style browser games")]
#[command(version)]
struct Cli {
    /// Settings file (JSON); defaults are used when omitted
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Preference file; defaults to the user config directory
    #[arg(long, global = true)]
    prefs: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a card rule file or a recording
    Check {
        /// Rule file to load
        file: PathBuf,
    },

    /// Print the effective settings as JSON
    Settings {
        /// Start from a named preset (default, fast, cautious)
        #[arg(long)]
        preset: Option<String>,
    },

    /// Show or change the stored failure policy
    Policy {
        /// New policy: stop or retry
        value: Option<String>,
    },

    /// Replay a short recording against a scripted page
    Demo {
        /// How many times to visit the market
        #[arg(long, default_value_t = 2)]
        visits: usize,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Selector(#[from] SelectorError),
    #[error(transparent)]
    Session(#[from] storylet_pilot::SessionError),
    #[error(transparent)]
    Prefs(#[from] PrefsError),
    #[error("Failed to encode settings: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to start runtime: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unknown preset '{0}'")]
    UnknownPreset(String),
    #[error("No config directory; pass --prefs")]
    NoPrefsPath,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Check { file } => check(&file),
        Commands::Settings { preset } => {
            let settings = match preset {
                Some(name) => Settings::preset(&name).ok_or(CliError::UnknownPreset(name))?,
                None => load_settings(cli.settings.as_deref())?,
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Policy { value } => {
            let store = open_prefs(cli.prefs)?;
            if let Some(value) = value {
                value.parse::<FailurePolicy>()?.save(&store)?;
            }
            println!("{}: {}", store.path().display(), FailurePolicy::load(&store));
            Ok(())
        }
        Commands::Demo { visits } => {
            let settings = load_settings(cli.settings.as_deref())?;
            let store = open_prefs(cli.prefs)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()?;
            runtime.block_on(demo(settings, Arc::new(store), visits))
        }
    }
}

fn open_prefs(path: Option<PathBuf>) -> Result<JsonFileStore, CliError> {
    let path = path
        .or_else(JsonFileStore::default_path)
        .ok_or(CliError::NoPrefsPath)?;
    Ok(JsonFileStore::open(path)?)
}

fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    match path {
        Some(path) => Settings::load(path),
        None => Ok(Settings::default()),
    }
}

fn check(file: &Path) -> Result<(), CliError> {
    let config = load_config_file(file)?;
    println!("{}: {}", file.display(), config);

    match &config {
        LoadedConfig::Cycle(rules) => {
            for (event_id, rule) in rules.iter() {
                println!("  {event_id}: {} ({})", rule.action, rule.description);
            }
        }
        LoadedConfig::Recording(records) => {
            for (index, record) in records.iter().enumerate() {
                println!("  {}. {}", index + 1, record.target);
            }
        }
    }
    if config.is_empty() {
        println!("  (nothing to run)");
    }
    Ok(())
}

/// The market storylet with its single choice
fn market(dom: &mut Dom) {
    clear(dom);
    let root = dom.root();
    dom.append(
        root,
        ElementBuilder::new("div")
            .class("storylet")
            .child(ElementBuilder::new("h2").class("storylet__heading").text("Go to market"))
            .child(
                ElementBuilder::new("div").class("storylet__buttons").child(
                    ElementBuilder::new("button")
                        .id("go")
                        .child(ElementBuilder::new("span").text("Go")),
                ),
            ),
    );
}

/// The result screen shown after the choice
fn market_result(dom: &mut Dom) {
    clear(dom);
    let root = dom.root();
    dom.append(
        root,
        ElementBuilder::new("div")
            .class("media--root")
            .child(
                ElementBuilder::new("h1")
                    .class("storylet-root__heading")
                    .text("A bustling market"),
            )
            .child(
                ElementBuilder::new("div")
                    .class("quality-updates")
                    .text("You now have 2 x Rostygold"),
            )
            .child(
                ElementBuilder::new("div")
                    .class("buttons--storylet-exit-options")
                    .child(ElementBuilder::new("button").id("onwards").text("Onwards")),
            ),
    );
}

fn clear(dom: &mut Dom) {
    let root = dom.root();
    for child in dom.children(root).to_vec() {
        dom.detach(child);
    }
}

async fn demo(
    mut settings: Settings,
    prefs: Arc<dyn PreferenceStore>,
    visits: usize,
) -> Result<(), CliError> {
    settings.timings.transition_delay_ms = 300;
    settings.timings.transition_jitter_ms = 200;

    let page = MemoryPage::default();
    page.update(market);
    page.on_click(Selector::parse("#go")?, Duration::from_millis(250), market_result);
    page.on_click(Selector::parse("#onwards")?, Duration::from_millis(250), market);

    let records: Vec<ActionRecord> = (0..visits)
        .map(|_| {
            ActionRecord::click(TargetDescriptor::titled("Go to market", "Go")).with_exit("Onwards")
        })
        .collect();

    let mut session = Session::new(Arc::new(page.clone()), settings).with_preferences(prefs);
    println!("Failure policy: {}", session.failure_policy());
    session.on_status(|update| println!("[{}] {}", update.state, update.message));
    session.load(LoadedConfig::Recording(records));
    session.start()?;

    while session.is_running() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("Dispatched {} click(s)", page.clicks().len());
    Ok(())
}
