//! Pluma - the plugin manager of the Pluma CLI.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use commands::{OutputFormat, Session};
use miette::Result;
use pluma_types::Target;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "pluma")]
#[command(version, about = "Discover, install and manage Pluma CLI plugins", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct GlobalOptions {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Path to config.toml
    #[arg(long, global = true, env = "PLUMA_CONFIG")]
    config: Option<PathBuf>,

    /// Use only this context instead of the current ones
    #[arg(long, global = true)]
    context: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage plugins
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Print shell completions
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum PluginAction {
    /// List available plugins
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
        /// List the plugins of a local plugin tree instead
        #[arg(long)]
        local: Option<PathBuf>,
    },

    /// Install a plugin
    Install {
        /// Plugin name, or `all` together with --local
        name: String,
        /// Version to install (defaults to the recommended one)
        #[arg(long)]
        version: Option<String>,
        /// Target of the plugin (k8s, tmc)
        #[arg(short, long)]
        target: Option<Target>,
        /// Install from a local plugin tree
        #[arg(long)]
        local: Option<PathBuf>,
    },

    /// Upgrade a plugin to its newest version
    Upgrade {
        /// Plugin name
        name: String,
        /// Target of the plugin (k8s, tmc)
        #[arg(short, long)]
        target: Option<Target>,
    },

    /// Delete an installed plugin
    Delete {
        /// Plugin name
        name: String,
        /// Target of the plugin (k8s, tmc)
        #[arg(short, long)]
        target: Option<Target>,
        /// Delete without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Describe an installed plugin
    Describe {
        /// Plugin name
        name: String,
        /// Target of the plugin (k8s, tmc)
        #[arg(short, long)]
        target: Option<Target>,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
        output: OutputFormat,
        /// Also ask the discovery sources for a newer version
        #[arg(long)]
        check_update: bool,
    },

    /// Remove every installed plugin
    Clean,

    /// Install every plugin that is missing or outdated
    Sync {
        /// Install the configured bootstrap set instead
        #[arg(long)]
        bootstrap: bool,
        /// Maximum concurrent installs during bootstrap
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Manage discovery sources
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },
}

#[derive(Subcommand)]
enum SourceAction {
    /// List discovery sources
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Add a standalone discovery source
    Add {
        /// Source name
        name: String,
        /// Source type (local, oci, rest)
        #[arg(short = 't', long = "type")]
        source_type: String,
        /// Directory, image or endpoint of the source
        #[arg(short, long)]
        uri: String,
    },
    /// Replace a standalone discovery source
    Update {
        /// Source name
        name: String,
        /// Source type (local, oci, rest)
        #[arg(short = 't', long = "type")]
        source_type: String,
        /// Directory, image or endpoint of the source
        #[arg(short, long)]
        uri: String,
    },
    /// Delete a standalone discovery source
    Delete {
        /// Source name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup error handling
    pluma_diagnostics::setup();

    let cli = Cli::parse();

    if cli.global.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging
    let log_level = match cli.global.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    if !cli.global.quiet {
        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let action = match cli.command {
        Commands::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "pluma", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Plugin { action } => action,
    };

    let context = cli.global.context;
    let session = Session::open(cli.global.config, context.clone())?;

    match action {
        PluginAction::List { output, local } => {
            commands::list(&session, output, local.as_deref()).await?;
        }
        PluginAction::Install {
            name,
            version,
            target,
            local,
        } => {
            commands::install(&session, &name, version.as_deref(), target, local.as_deref()).await?;
        }
        PluginAction::Upgrade { name, target } => {
            commands::upgrade(&session, &name, target).await?;
        }
        PluginAction::Delete { name, target, yes } => {
            commands::delete(&session, &name, target, yes)?;
        }
        PluginAction::Describe {
            name,
            target,
            output,
            check_update,
        } => {
            commands::describe(&session, &name, target, output, check_update).await?;
        }
        PluginAction::Clean => {
            commands::clean(&session)?;
        }
        PluginAction::Sync { bootstrap, jobs } => {
            commands::sync(&session, bootstrap, jobs).await?;
        }
        PluginAction::Source { action } => match action {
            SourceAction::List { output } => {
                commands::list_sources(&session, context.as_deref(), output)?
            }
            SourceAction::Add {
                name,
                source_type,
                uri,
            } => commands::add_source(&session, &name, &source_type, &uri)?,
            SourceAction::Update {
                name,
                source_type,
                uri,
            } => commands::update_source(&session, &name, &source_type, &uri)?,
            SourceAction::Delete { name } => commands::delete_source(&session, &name)?,
        },
    }

    Ok(())
}
