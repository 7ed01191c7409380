use super::config::{default_config_path, BridgeConfig, ConfigFile, LoggingConfig};
use super::password::{determine_password_source, read_password, PasswordSource};
use ethmatrix::api::{self, AppState};
use ethmatrix::bridge::Bridge;
use ethmatrix::chain::{Address, JsonRpcWallet, Wallet};
use ethmatrix::matrix::HttpMatrixClient;
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Run the bridge service
///
/// ## Startup
///
/// 1. Load the config (a commented default is written when missing)
/// 2. Pick the Ethereum account: `--account`, `[eth] account`, or a prompt
/// 3. Unlock it if a password is available; otherwise the node asks for
///    approval on every signature
/// 4. Bind the Matrix identity, join rooms, start listening
/// 5. Serve `POST /send` and `GET /block` until Ctrl-C
///
/// Any failure before serving is fatal.
pub async fn execute(
    config_path: Option<String>,
    account: Option<String>,
    password_file: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        BridgeConfig::create_default(&config_path)?;
        println!("📝 No config file found. Created default configuration:");
        println!("   {}", config_path.display());
        println!("Set [matrix] server and rooms, then run again.");
        return Ok(());
    }

    let mut store = ConfigFile::load(&config_path)?;
    let config = store.config().clone();
    init_logging(&config.logging)?;
    info!(config = %config_path.display(), "starting ethmatrix");

    let wallet = JsonRpcWallet::new(config.eth.endpoint.as_str(), config.request_timeout())?;
    let accounts = wallet.accounts().await?;
    let configured = account.or_else(|| config.eth.account.clone());
    let account = {
        let stdin = io::stdin();
        select_account(
            &accounts,
            configured.as_deref(),
            &mut stdin.lock(),
            &mut io::stdout(),
        )?
    };
    info!(account = %account, "using account");

    let source = determine_password_source(password_file.map(PathBuf::from), &config.eth);
    unlock(&wallet, &account, &source, &config).await?;

    let client = HttpMatrixClient::new(&config.matrix.server)?;
    let bridge = Bridge::start(
        wallet.clone(),
        client,
        account,
        &mut store,
        config.settings(),
    )
    .await?;

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", addr, e))?;
    let cancel = bridge.cancellation_token();
    let server = tokio::spawn(api::serve(
        listener,
        AppState::shared(bridge.sender(), wallet),
        cancel.clone(),
    ));
    println!("Listening on http://{}", addr);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupt received, shutting down");
        }
        _ = bridge.stopped() => warn!("bridge stopped, shutting down"),
    }

    cancel.cancel();
    server.await??;
    bridge.shutdown().await?;
    Ok(())
}

/// List the node's accounts with their selection indices
pub async fn list_accounts(config_path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let config = BridgeConfig::load(&config_path)?;

    let wallet = JsonRpcWallet::new(config.eth.endpoint.as_str(), config.request_timeout())?;
    let accounts = wallet.accounts().await?;
    if accounts.is_empty() {
        println!("No accounts found in eth node at {}", wallet.endpoint());
    }
    for (i, account) in accounts.iter().enumerate() {
        println!("  [{}] {}", i, account);
    }
    Ok(())
}

/// Choose the signing account
///
/// A configured account must be one of the node's; otherwise the operator
/// picks one by index.
pub fn select_account(
    accounts: &[Address],
    configured: Option<&str>,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<Address, Box<dyn std::error::Error>> {
    if accounts.is_empty() {
        return Err("No accounts found in eth node".into());
    }

    if let Some(configured) = configured {
        let wanted = Address::parse(configured)
            .map_err(|_| format!("Configured account not found: {}", configured))?;
        return accounts
            .iter()
            .find(|a| **a == wanted)
            .cloned()
            .ok_or_else(|| format!("Configured account not found: {}", configured).into());
    }

    writeln!(output, "Please, type account index to be used:")?;
    for (i, account) in accounts.iter().enumerate() {
        writeln!(output, "  [{}] {}", i, account)?;
    }
    write!(output, "ETH Account: ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let index: usize = line.trim().parse().map_err(|_| "Invalid index")?;
    accounts
        .get(index)
        .cloned()
        .ok_or_else(|| "Invalid index".into())
}

/// Unlock `account`; failure only downgrades to per-request approval
async fn unlock<W: Wallet>(
    wallet: &W,
    account: &Address,
    source: &PasswordSource,
    config: &BridgeConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(password) = read_password(source, &config.eth)? else {
        info!("no unlock password configured, per-request approval will be used");
        return Ok(());
    };

    match wallet.unlock(account, &password).await {
        Ok(true) => info!(account = %account, "unlocked"),
        Ok(false) => warn!("failed to unlock account, per-request approval will be used"),
        Err(e) => {
            warn!(error = %e, "failed to unlock account, per-request approval will be used")
        }
    }
    Ok(())
}

/// Install the tracing subscriber
///
/// `RUST_LOG` overrides `[logging] level`.
fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| format!("Invalid log level '{}': {}", config.level, e))?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("Failed to open log file '{}': {}", path.display(), e))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(io::stderr).try_init(),
    };
    result.map_err(|e| format!("Failed to initialise logging: {}", e).into())
}
