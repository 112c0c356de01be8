mod daemon;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{LogLevel, Verbosity};
use colored::Colorize;
use fleetd::{config, helpers};
use macros_rs::{crashln, str};

#[derive(Copy, Clone, Debug, Default)]
struct InfoLevel;
impl LogLevel for InfoLevel {
    fn default() -> Option<log::Level> { Some(log::Level::Info) }
}

#[derive(Parser)]
#[command(version = str!(get_version()))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[clap(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent server in the foreground
    #[command(visible_alias = "serve")]
    Start {
        /// Address to listen on
        #[arg(short, long)]
        address: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the resolved configuration
    #[command(visible_alias = "cfg")]
    Config,
}

fn get_version() -> String {
    match env!("GIT_HASH") {
        "" => format!("{} ({}) [{}]", env!("CARGO_PKG_VERSION"), env!("BUILD_DATE"), env!("PROFILE")),
        hash => format!("{} ({} {hash}) [{}]", env!("CARGO_PKG_VERSION"), env!("BUILD_DATE"), env!("PROFILE")),
    }
}

fn main() {
    let cli = Cli::parse();
    let mut env = env_logger::Builder::new();
    env.filter_level(cli.verbose.log_level_filter()).init();

    let config = match config::read() {
        Ok(config) => config,
        Err(err) => crashln!("{} Cannot load config.\n{}", *helpers::FAIL, format!("{err:#}").white()),
    };

    match cli.command {
        Commands::Start { address, port } => daemon::start(config.override_address(address, port)),
        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(contents) => print!("{contents}"),
            Err(err) => crashln!("{} Cannot serialize config.\n{}", *helpers::FAIL, err.to_string().white()),
        },
    }
}
