//! Infoscava - file inspection with hot-loadable analysis plugins.
//!
//! Command-line host for the plugin runtime: manages the plugin directory,
//! runs analysis plugins against files and packs Python sources into
//! plugin manifests.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use infoscava::core::HistoryLog;
use infoscava::plugin::{ManifestStore, MANIFEST_EXTENSION};
use infoscava::{
    ClassifiedResult, Config, EventBus, PluginEvent, PluginManager, PluginManifest, PluginType,
    PythonBackend, APP_NAME,
};

/// File inspection with hot-loadable analysis plugins
#[derive(Parser)]
#[command(name = "infoscava")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: $INFOSCAVA_CONFIG or ~/.infoscava/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Plugin directory, overriding the config file
    #[arg(long, global = true, env = "INFOSCAVA_PLUGIN_DIR", value_name = "DIR")]
    plugin_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List active plugins
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Copy a plugin manifest into the plugin directory and load it
    Load {
        /// Manifest file (.infoscava)
        file: PathBuf,

        /// Replace an existing plugin with the same name
        #[arg(short, long)]
        force: bool,
    },

    /// Delete a plugin and its files
    Delete {
        /// Plugin name
        name: String,
    },

    /// Reload one plugin, or every plugin when no name is given
    Reload {
        /// Plugin name
        name: Option<String>,
    },

    /// Run every analysis plugin against a file
    Analyze {
        /// File to analyze
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show the plugin history
    History {
        /// Show only the newest N entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Clear the persisted history
        #[arg(long)]
        clear: bool,
    },

    /// Pack a Python source file into a plugin manifest
    Pack {
        /// Python source file
        source: PathBuf,

        /// Entry point function name
        #[arg(short = 'F', long)]
        function: String,

        /// Plugin type (analysis_plugin, static_html_plugin)
        #[arg(short = 't', long = "type", default_value = "analysis_plugin")]
        plugin_type: PluginType,

        /// Plugin description
        #[arg(short, long)]
        description: Option<String>,

        /// Display label
        #[arg(long)]
        tab_title: Option<String>,

        /// Output manifest path (default: <source stem>.infoscava next to the source)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the HTML page of a static plugin
    Render {
        /// Plugin name
        name: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("warn") };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    match &cli.command {
        Commands::List { format } => cmd_list(&cli, *format),
        Commands::Load { file, force } => cmd_load(&cli, file, *force),
        Commands::Delete { name } => cmd_delete(&cli, name),
        Commands::Reload { name } => cmd_reload(&cli, name.as_deref()),
        Commands::Analyze { file, format } => cmd_analyze(&cli, file, *format),
        Commands::History { limit, clear } => cmd_history(&cli, *limit, *clear),
        Commands::Pack { source, function, plugin_type, description, tab_title, output } => {
            cmd_pack(
                source,
                function,
                *plugin_type,
                description.as_deref(),
                tab_title.as_deref(),
                output.as_deref(),
            )
        }
        Commands::Render { name } => cmd_render(&cli, name),
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        }
    }
}

/// Resolve settings from the config file and command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let config = Config::load(cli.config.as_deref())?;
    Ok(match &cli.plugin_dir {
        Some(dir) => config.with_plugin_dir(dir),
        None => config,
    })
}

/// Open the plugin directory, reporting plugins that fail to load.
fn open_manager(cli: &Cli) -> Result<PluginManager> {
    let config = load_config(cli)?;

    let events = Arc::new(EventBus::new());
    events.subscribe(|event| {
        if let PluginEvent::Failed { name, reason } = event {
            eprintln!("✗ Plugin '{name}' failed to load: {reason}");
        }
    });

    let backend = PythonBackend::new(config.plugin.python.clone(), config.plugin.call_timeout());
    if !backend.is_available() {
        tracing::warn!(interpreter = backend.interpreter(), "Python interpreter not available");
    }

    let manager = PluginManager::open(config, Arc::new(backend), events)
        .context("Failed to open plugin directory")?;
    Ok(manager)
}

/// List active plugins.
fn cmd_list(cli: &Cli, format: Format) -> Result<()> {
    let manager = open_manager(cli)?;
    let plugins = manager.list_active_plugins();

    match format {
        Format::Json => {
            let json = serde_json::to_string_pretty(&plugins)?;
            println!("{json}");
        }
        Format::Text => {
            if plugins.is_empty() {
                println!("No plugins loaded.");
                println!("\nLoad a plugin with:");
                println!("  {APP_NAME} load <FILE>.{MANIFEST_EXTENSION}");
                println!("\nPlugin directory: {}", manager.store().dir().display());
                return Ok(());
            }

            println!("Active plugins:\n");
            for plugin in &plugins {
                println!("  {} [{}]", plugin.name, plugin.plugin_type.display_name());
                println!("      {}", plugin.description);
            }
            println!("\nTotal: {} plugin(s)", plugins.len());
        }
    }

    Ok(())
}

/// Load a new plugin manifest.
fn cmd_load(cli: &Cli, file: &Path, force: bool) -> Result<()> {
    let mut manager = open_manager(cli)?;

    let name = file
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid plugin file name: {}", file.display()))?;

    if manager.store().contains(name) && !same_path(file, &manager.store().manifest_path(name)) && !force {
        anyhow::bail!("A plugin named '{name}' already exists. Use --force to replace it.");
    }

    if !manager.load_new_manifest(file) {
        anyhow::bail!("Failed to load plugin '{name}'. See `{APP_NAME} history` for details.");
    }

    println!("✓ Plugin '{name}' loaded.");
    if let Some(ClassifiedResult::Error(message)) = manager.static_output(name) {
        eprintln!("  Static page failed to render: {message}");
    }
    Ok(())
}

/// Delete a plugin.
fn cmd_delete(cli: &Cli, name: &str) -> Result<()> {
    let mut manager = open_manager(cli)?;

    if !manager.delete_plugin(name) {
        anyhow::bail!("Plugin '{name}' is not loaded");
    }

    println!("✓ Plugin '{name}' deleted.");
    Ok(())
}

/// Reload one plugin or all of them.
fn cmd_reload(cli: &Cli, name: Option<&str>) -> Result<()> {
    let mut manager = open_manager(cli)?;

    match name {
        Some(name) => {
            if manager.record(name).is_none() {
                anyhow::bail!("Plugin '{name}' is not loaded");
            }
            if !manager.reload_plugin(name) {
                anyhow::bail!("Failed to reload plugin '{name}'. It has been deactivated.");
            }
            println!("✓ Plugin '{name}' reloaded.");
        }
        None => {
            manager.reload_all();
            println!("✓ Reloaded {} plugin(s).", manager.list_active_plugins().len());
        }
    }

    Ok(())
}

/// Analyze a file with every analysis plugin.
fn cmd_analyze(cli: &Cli, file: &Path, format: Format) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let manager = open_manager(cli)?;
    let results = manager.run_analysis_plugins(file, &data);

    match format {
        Format::Json => {
            let json = serde_json::to_string_pretty(&results)?;
            println!("{json}");
        }
        Format::Text => {
            if results.is_empty() {
                println!("No analysis plugins loaded.");
                return Ok(());
            }

            for (name, result) in &results {
                let title = manager.record(name).map_or_else(|| name.clone(), |r| r.tab_title.clone());
                println!("== {title} ({}) ==", result.kind());
                println!("{}\n", result.render_text());
            }
        }
    }

    Ok(())
}

/// Show or clear the persisted plugin history.
fn cmd_history(cli: &Cli, limit: Option<usize>, clear: bool) -> Result<()> {
    let config = load_config(cli)?;
    let store = ManifestStore::open(config.plugin.plugin_dir())?;

    if clear {
        store.write_history(&[])?;
        println!("History cleared.");
        return Ok(());
    }

    let history = HistoryLog::new(config.plugin.history_capacity());
    history.restore(&store)?;

    let lines = history.lines();
    if lines.is_empty() {
        println!("No plugin history.");
        return Ok(());
    }

    let skip = limit.map_or(0, |n| lines.len().saturating_sub(n));
    for line in &lines[skip..] {
        println!("{line}");
    }

    Ok(())
}

/// Pack a Python source file into a manifest.
fn cmd_pack(
    source: &Path,
    function: &str,
    plugin_type: PluginType,
    description: Option<&str>,
    tab_title: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let code = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;

    let name = source
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid source file name: {}", source.display()))?;

    let mut manifest = PluginManifest::new(name, function).with_type(plugin_type).with_source(&code);
    if let Some(description) = description {
        manifest = manifest.with_description(description);
    }
    if let Some(tab_title) = tab_title {
        manifest = manifest.with_tab_title(tab_title);
    }
    manifest.validate()?;

    let output = output.map_or_else(|| source.with_extension(MANIFEST_EXTENSION), Path::to_path_buf);
    std::fs::write(&output, manifest.to_json()?)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("✓ Packed '{name}' into {}", output.display());
    Ok(())
}

/// Print the page a static plugin rendered.
fn cmd_render(cli: &Cli, name: &str) -> Result<()> {
    let manager = open_manager(cli)?;

    let record = manager.record(name).ok_or_else(|| anyhow::anyhow!("Plugin '{name}' is not loaded"))?;
    if record.plugin_type != PluginType::StaticHtmlPlugin {
        anyhow::bail!("Plugin '{name}' is not a static HTML plugin");
    }

    match manager.static_output(name) {
        Some(ClassifiedResult::Html(html)) => {
            println!("{html}");
            Ok(())
        }
        Some(ClassifiedResult::Error(message)) => anyhow::bail!("{message}"),
        _ => anyhow::bail!("Plugin '{name}' has no rendered page"),
    }
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
