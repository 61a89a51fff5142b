mod cli;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{debug, info};

use conduit_core::plugin_system::security::SecurityPolicy;
use conduit_core::plugin_system::validator;
use conduit_core::plugin_system::version::HostVersions;
use conduit_core::{Application, HostConfig, KernelComponent, PluginManager, PluginManifest};

use cli::ConsoleNotificationSink;

/// Conduit: plugin host for extension contributions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Host configuration file (JSON, YAML or TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the JSON Schema for plugin manifests
    Schema,
    /// Validate a manifest file or a plugin directory
    Validate {
        path: PathBuf,
    },
    /// Scan a plugin source file for restricted constructs
    Scan {
        file: PathBuf,
    },
    /// Discover and inspect plugins
    Plugins {
        #[command(subcommand)]
        command: PluginCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PluginCommand {
    /// List discovered plugins and their state
    List {
        #[command(flatten)]
        discovery: DiscoveryArgs,
    },
    /// Print registry statistics as JSON
    Stats {
        #[command(flatten)]
        discovery: DiscoveryArgs,
    },
}

#[derive(clap::Args, Debug)]
struct DiscoveryArgs {
    /// Extra discovery root; may be repeated
    #[arg(long = "plugins-dir")]
    plugins_dirs: Vec<PathBuf>,

    /// Fire the startup event after discovery
    #[arg(long)]
    activate: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = match &args.config {
        Some(path) => match HostConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => HostConfig::default(),
    };
    debug!("Effective configuration: {:?}", config);

    match args.command {
        Commands::Schema => print_schema(),
        Commands::Validate { path } => validate_manifest(&config, &path),
        Commands::Scan { file } => scan_source(&config, &file),
        Commands::Plugins { command } => match command {
            PluginCommand::List { discovery } => run_plugins(config, discovery, PluginOutput::List).await,
            PluginCommand::Stats { discovery } => run_plugins(config, discovery, PluginOutput::Stats).await,
        },
    }
}

fn print_schema() -> ExitCode {
    match serde_json::to_string_pretty(&validator::manifest_schema()) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to render schema: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn validate_manifest(config: &HostConfig, path: &Path) -> ExitCode {
    let manifest_path = if path.is_dir() {
        path.join(&config.manifest_file_name)
    } else {
        path.to_path_buf()
    };

    let text = match fs::read_to_string(&manifest_path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Cannot read {}: {}", manifest_path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let value: serde_json::Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("{} is not valid JSON: {}", manifest_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(errors) = validator::validate(&value) {
        eprintln!("{} is invalid:", manifest_path.display());
        for message in &errors.messages {
            eprintln!("  - {}", message);
        }
        return ExitCode::FAILURE;
    }

    let manifest = match PluginManifest::from_value(value, &manifest_path) {
        Ok(manifest) => manifest,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let compatibility = HostVersions::parse(&config.host_engine_version, &config.framework_version)
        .map_err(|e| e.to_string())
        .and_then(|versions| versions.check(&manifest).map_err(|e| e.to_string()));
    if let Err(message) = compatibility {
        eprintln!("{}", message);
        return ExitCode::FAILURE;
    }

    println!(
        "{} is valid: {} ({} contributions)",
        manifest_path.display(),
        manifest.identity(),
        manifest.contributes.len()
    );
    ExitCode::SUCCESS
}

fn scan_source(config: &HostConfig, file: &Path) -> ExitCode {
    let source = match fs::read_to_string(file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Cannot read {}: {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let findings = SecurityPolicy::from_settings(&config.security).scan_for_violations(&source);
    if findings.is_empty() {
        println!("{}: no findings", file.display());
        return ExitCode::SUCCESS;
    }
    println!("{}: {} finding(s)", file.display(), findings.len());
    for line in cli::render_findings(&findings) {
        println!("  {}", line);
    }
    ExitCode::FAILURE
}

enum PluginOutput {
    List,
    Stats,
}

async fn run_plugins(mut config: HostConfig, discovery: DiscoveryArgs, output: PluginOutput) -> ExitCode {
    config.plugin_dirs.extend(discovery.plugins_dirs);
    config.auto_activate = discovery.activate;

    let app = match Application::builder()
        .config(config)
        .notifier(Arc::new(ConsoleNotificationSink))
        .build()
    {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to initialize application: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = app.run().await {
        eprintln!("Failed to start application: {}", e);
        return ExitCode::FAILURE;
    }

    let manager = app.plugin_manager();
    info!("{} plugin(s) loaded", manager.loaded_plugins().len());
    let code = match output {
        PluginOutput::List => {
            let lines = cli::render_plugin_list(&manager);
            if lines.is_empty() {
                println!("No plugins found");
            }
            for line in lines {
                println!("{}", line);
            }
            ExitCode::SUCCESS
        }
        PluginOutput::Stats => match serde_json::to_string_pretty(&manager.statistics()) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to render statistics: {}", e);
                ExitCode::FAILURE
            }
        },
    };

    if let Err(e) = app.stop().await {
        eprintln!("Error during shutdown: {}", e);
        return ExitCode::FAILURE;
    }
    code
}
