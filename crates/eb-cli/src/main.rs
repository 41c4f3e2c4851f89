//! ExactBlocker CLI
//!
//! Edits the rule store and inspects what the content blocker and the page
//! script would see.

mod check;

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};

use eb_compiler::filter_list::parse_filter_list;
use eb_core::types::ElementRule;
use eb_sync::channel::handle_message;
use eb_sync::config::SyncConfig;
use eb_sync::propagate::{load_filter_list, ConfiguredReloader, Propagator, ReloadStatus};
use eb_sync::storage::DirStore;
use eb_sync::store::{RuleStore, StoreError};

type Store = RuleStore<DirStore, DirStore, ConfiguredReloader>;

#[derive(Parser)]
#[command(name = "eb-cli")]
#[command(about = "ExactBlocker rule store and filter list tools")]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Private rule storage directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory shared with the content blocker and the page script
    #[arg(long, global = true)]
    group_dir: Option<PathBuf>,

    /// Identifier passed to the reload command
    #[arg(long, global = true)]
    engine_id: Option<String>,

    /// Command that reloads the engine, e.g. "blockerctl reload"
    #[arg(long, global = true)]
    reload_command: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage blocked websites
    Host {
        #[command(subcommand)]
        action: HostAction,
    },

    /// Manage element hiding rules
    Rule {
        #[command(subcommand)]
        action: RuleAction,
    },

    /// Import element rules from a text file, one `domain##selector` per line
    Import {
        file: PathBuf,
    },

    /// Export element rules as text
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the compiled filter list for the stored rules
    Compile {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rewrite both shared sinks from the stored rules
    Sync,

    /// Answer one page script request read from stdin
    Respond,

    /// Print the filter list the engine would load
    EngineLoad,

    /// Show how a URL is treated by the current rules
    Check {
        url: String,
    },
}

#[derive(Subcommand)]
enum HostAction {
    Add { hostname: String },
    Remove { hostname: String },
    List,
}

#[derive(Subcommand)]
enum RuleAction {
    Add { domain: String, selector: String },
    Remove { domain: String, selector: String },
    List,
    Clear,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match load_config(&cli) {
        Ok(config) => run(cli.command, &config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<SyncConfig, String> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path).map_err(|e| e.to_string())?,
        None => SyncConfig::default(),
    };

    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.group_dir {
        config.group_dir = dir.clone();
    }
    if let Some(id) = &cli.engine_id {
        config.engine_id = id.clone();
    }
    if let Some(command) = &cli.reload_command {
        config.reload_command = Some(command.split_whitespace().map(str::to_string).collect());
    }

    log::debug!("Using config {:?}", config);
    Ok(config)
}

async fn run(command: Commands, config: &SyncConfig) -> Result<(), String> {
    match command {
        Commands::Host { action } => cmd_host(action, config).await,
        Commands::Rule { action } => cmd_rule(action, config).await,
        Commands::Import { file } => cmd_import(&file, config).await,
        Commands::Export { output } => cmd_export(output.as_deref(), config),
        Commands::Compile { output } => cmd_compile(output.as_deref(), config),
        Commands::Sync => cmd_sync(config).await,
        Commands::Respond => cmd_respond(config),
        Commands::EngineLoad => cmd_engine_load(config),
        Commands::Check { url } => cmd_check(&url, config),
    }
}

fn open_store(config: &SyncConfig) -> Result<Store, String> {
    let propagator = Propagator::new(
        config,
        DirStore::new(&config.group_dir),
        ConfiguredReloader::from_config(config),
    );
    RuleStore::open(config, DirStore::new(&config.data_dir), propagator).map_err(|e| e.to_string())
}

/// A propagation failure still means the change was saved.
fn finish(store: &Store, result: Result<(), StoreError>) -> Result<(), String> {
    match result {
        Ok(()) => {}
        Err(StoreError::Propagation(report)) => {
            eprintln!("Warning: rules saved, but not all sinks were updated: {report}");
        }
        Err(e) => return Err(e.to_string()),
    }

    match store.last_reload() {
        Some(ReloadStatus::Failed(e)) => eprintln!("Warning: engine reload failed: {e}"),
        Some(ReloadStatus::NotConfigured) => log::info!("No reload command set; the engine loads the list on its next start"),
        _ => {}
    }
    println!("{}", store.summary());
    Ok(())
}

fn write_output(output: Option<&Path>, text: &str) -> Result<(), String> {
    match output {
        Some(path) => {
            fs::write(path, text).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))?;
            eprintln!("Wrote {} bytes to '{}'", text.len(), path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

async fn cmd_host(action: HostAction, config: &SyncConfig) -> Result<(), String> {
    let mut store = open_store(config)?;

    let result = match action {
        HostAction::Add { hostname } => store.add_host(&hostname).await.map(|added| {
            if !added {
                println!("'{}' is already blocked", hostname.trim());
            }
        }),
        HostAction::Remove { hostname } => store.remove_host(&hostname).await.map(|removed| {
            if removed == 0 {
                println!("No rule for '{}'", hostname.trim());
            }
        }),
        HostAction::List => {
            for host in store.rules().hosts() {
                println!("{host}");
            }
            return Ok(());
        }
    };

    finish(&store, result)
}

async fn cmd_rule(action: RuleAction, config: &SyncConfig) -> Result<(), String> {
    let mut store = open_store(config)?;

    let result = match action {
        RuleAction::Add { domain, selector } => {
            let rule = ElementRule::new(&domain, &selector).map_err(|e| e.to_string())?;
            store.add_element_rule(rule).await.map(|added| {
                if !added {
                    println!("Rule already exists");
                }
            })
        }
        RuleAction::Remove { domain, selector } => {
            let rule = ElementRule::new(&domain, &selector).map_err(|e| e.to_string())?;
            store.remove_element_rule(&rule).await.map(|removed| {
                if removed == 0 {
                    println!("No rule '{rule}'");
                }
            })
        }
        RuleAction::List => {
            for rule in store.rules().element_rules() {
                println!("{rule}");
            }
            return Ok(());
        }
        RuleAction::Clear => store
            .clear_element_rules()
            .await
            .map(|removed| println!("Removed {removed} element rules")),
    };

    finish(&store, result)
}

async fn cmd_import(file: &Path, config: &SyncConfig) -> Result<(), String> {
    let mut store = open_store(config)?;
    let start = Instant::now();

    let result = store
        .import_element_rules_from(file)
        .await
        .map(|added| println!("Imported {} new rules from '{}'", added, file.display()));

    log::info!("Import took {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);
    finish(&store, result)
}

fn cmd_export(output: Option<&Path>, config: &SyncConfig) -> Result<(), String> {
    let store = open_store(config)?;
    write_output(output, &store.export_element_rules())
}

fn cmd_compile(output: Option<&Path>, config: &SyncConfig) -> Result<(), String> {
    let store = open_store(config)?;
    let start = Instant::now();

    let list = eb_compiler::build_filter_list(store.rules()).map_err(|e| e.to_string())?;

    log::info!(
        "Compiled {} in {:.1}ms",
        store.summary(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    write_output(output, &format!("{list}\n"))
}

async fn cmd_sync(config: &SyncConfig) -> Result<(), String> {
    let mut store = open_store(config)?;
    let result = store.sync().await;
    finish(&store, result)
}

fn cmd_respond(config: &SyncConfig) -> Result<(), String> {
    let mut request = String::new();
    io::stdin()
        .read_to_string(&mut request)
        .map_err(|e| format!("Failed to read request: {}", e))?;

    let page_store = DirStore::new(&config.group_dir);
    match handle_message(&request, &page_store) {
        Some(response) => {
            let json = serde_json::to_string(&response).map_err(|e| format!("Failed to encode response: {}", e))?;
            println!("{json}");
        }
        None => log::info!("Ignoring unrecognized request"),
    }
    Ok(())
}

fn cmd_engine_load(config: &SyncConfig) -> Result<(), String> {
    let path = config.filter_list_path();
    let text = load_filter_list(&path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    let rules = parse_filter_list(&text).map_err(|e| e.to_string())?;

    eprintln!("Engine list '{}': {} rules", path.display(), rules.len());
    println!("{text}");
    Ok(())
}

fn cmd_check(url: &str, config: &SyncConfig) -> Result<(), String> {
    let store = open_store(config)?;
    let path = config.filter_list_path();
    let text = load_filter_list(&path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    let filter_list = parse_filter_list(&text).map_err(|e| e.to_string())?;

    let report = check::check_url(&filter_list, store.rules().element_rules(), url)
        .map_err(|e| format!("Invalid url-filter in '{}': {}", path.display(), e))?;

    println!("URL:      {}", url);
    println!("Host:     {}", report.host.as_deref().unwrap_or("(none)"));
    if report.is_blocked() {
        println!("Blocked:  yes ({})", report.blocked_by.join(", "));
    } else {
        println!("Blocked:  no");
    }
    println!("Hidden by engine:      {}", report.hidden_selectors.len());
    for selector in &report.hidden_selectors {
        println!("  {selector}");
    }
    println!("Hidden by page script: {}", report.page_rules.len());
    for rule in &report.page_rules {
        println!("  {rule}");
    }

    Ok(())
}
