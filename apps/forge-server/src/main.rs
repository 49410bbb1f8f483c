use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

use forgekit::App;
use forgekit_bootstrap::{AppConfig, CliArgs};

mod transport;
mod routes;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// Ensure the shipped modules are linked so their inventory entry points
// are registered.
#[allow(dead_code)]
fn _ensure_modules_linked() {
    let _ = std::any::type_name::<forge_module_blog::BlogModule>();
    let _ = std::any::type_name::<forge_module_pages::PagesModule>();
}

/// Forge CMS server - a modular content platform
#[derive(Parser)]
#[command(name = "forge-server")]
#[command(about = "Forge CMS server - a modular content platform")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and installed bundles, then exit
    Check,
    /// Inspect or change the active module set
    Modules {
        #[command(subcommand)]
        command: ModulesCommand,
    },
    /// Inspect installed themes or switch the active one
    Themes {
        #[command(subcommand)]
        command: ThemesCommand,
    },
}

#[derive(Subcommand)]
enum ModulesCommand {
    /// List installed modules and their activation state
    List,
    /// Activate a module (persists across restarts)
    Activate { name: String },
    /// Deactivate a module
    Deactivate { name: String },
}

#[derive(Subcommand)]
enum ThemesCommand {
    /// List installed themes
    List,
    /// Make a theme the active one
    Activate { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    _ensure_modules_linked();

    let cli = Cli::parse();
    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (FORGE__*) -> 4) CLI overrides
    // Also normalizes + creates server.home_dir.
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let logging = config.logging.clone().unwrap_or_default();
    forgekit_bootstrap::logging::init_logging(&logging, Path::new(&config.server.home_dir));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(config).await,
        Commands::Check => cmd_check(config).await,
        Commands::Modules { command } => cmd_modules(config, command).await,
        Commands::Themes { command } => cmd_themes(config, command).await,
    }
}

async fn cmd_run(config: AppConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let themes_dir = config.themes_dir();
    let timeout_sec = config.server.timeout_sec;

    let app = App::new(config)?;
    app.boot(routes::core_routes).await?;

    transport::serve(app, themes_dir, addr, timeout_sec).await
}

/// Validate what `Run` would use, without binding a socket.
async fn cmd_check(config: AppConfig) -> Result<()> {
    println!("Configuration OK");
    println!("  site:   {} ({})", config.site.name, config.site.env);
    println!("  listen: {}:{}", config.server.host, config.server.port);

    let app = App::new(config)?;
    let modules = app.modules().discover()?;
    app.modules().load_active()?;
    let themes = app.themes().discover()?;
    println!("  modules: {modules} installed, {} active", app.modules().active().len());
    println!("  themes:  {themes} installed");
    Ok(())
}

async fn cmd_modules(config: AppConfig, command: ModulesCommand) -> Result<()> {
    let app = App::new(config)?;
    app.modules().discover()?;
    app.modules().load_active()?;

    match command {
        ModulesCommand::List => {
            for manifest in app.modules().manifests() {
                let state = if app.modules().is_active(&manifest.id) {
                    "active"
                } else {
                    "inactive"
                };
                println!("{:<20} {:<10} {}", manifest.id, manifest.version, state);
            }
        }
        ModulesCommand::Activate { name } => {
            app.activate_module(&name).await?;
            println!("module '{name}' activated");
        }
        ModulesCommand::Deactivate { name } => {
            app.deactivate_module(&name)?;
            println!("module '{name}' deactivated");
        }
    }
    Ok(())
}

async fn cmd_themes(config: AppConfig, command: ThemesCommand) -> Result<()> {
    let active_theme = config.site.active_theme.clone();
    let app = App::new(config)?;
    app.themes().discover()?;
    let configured = app
        .config()
        .get_str("site.active_theme")
        .unwrap_or(active_theme);
    app.themes().select_active(&configured);

    match command {
        ThemesCommand::List => {
            let active = app.themes().active();
            for manifest in app.themes().manifests() {
                let marker = if active.as_deref() == Some(manifest.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {:<20} {:<10} {}", manifest.id, manifest.version, manifest.name);
            }
        }
        ThemesCommand::Activate { name } => {
            app.activate_theme(&name).await?;
            println!("theme '{name}' activated");
        }
    }
    Ok(())
}
