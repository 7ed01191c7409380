use clap::{Parser, Subcommand};

pub mod config;
pub mod init;
pub mod password;
pub mod run;
pub mod version;

#[derive(Parser)]
#[command(name = "ethmatrix")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Matrix chat bridge with Ethereum-signed identities", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bridge service
    Run {
        /// Path to config file (default: ~/.local/share/ethmatrix/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Ethereum account to sign with (overrides [eth] account)
        #[arg(long)]
        account: Option<String>,

        /// Path to file containing the account unlock password
        #[arg(long)]
        password_file: Option<String>,
    },

    /// List the accounts of the configured Ethereum node
    Accounts {
        /// Path to config file
        #[arg(long)]
        config: Option<String>,
    },

    /// Write a default config file
    Init {
        /// Path to config file
        #[arg(long)]
        config: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run {
            config,
            account,
            password_file,
        } => run::execute(config, account, password_file).await,
        Commands::Accounts { config } => run::list_accounts(config).await,
        Commands::Init { config, force } => init::execute(config, force),
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}
