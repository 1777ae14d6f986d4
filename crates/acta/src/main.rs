use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use acta::daemon::{self, DaemonConfig};
use acta::db::Db;
use acta::types::ProjectPolicy;

#[derive(Parser)]
#[command(name = "acta", about = "Project issue tracker over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve /api/issues/{project}
    Serve {
        #[arg(long, env = "ACTA_PORT", default_value_t = 3000)]
        port: u16,
        #[arg(long, env = "ACTA_DATA_DIR")]
        data_dir: Option<PathBuf>,
        /// How duplicate project names are handled
        #[arg(long, env = "ACTA_PROJECT_NAMES", value_enum, default_value_t = ProjectPolicy::FirstMatch)]
        project_names: ProjectPolicy,
    },
    /// Print the store location
    Where {
        #[arg(long, env = "ACTA_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
}

fn resolve_data_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            data_dir,
            project_names,
        } => {
            let config = DaemonConfig {
                port,
                data_dir: resolve_data_dir(data_dir),
                project_policy: project_names,
            };
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("error: failed to create tokio runtime: {e}");
                    process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(daemon::start(config)) {
                eprintln!("error: {e}");
                process::exit(1);
            }
        }

        Commands::Where { data_dir } => {
            let dir = resolve_data_dir(data_dir);
            println!("{}", Db::store_path(&dir).display());
        }
    }
}
