//! Ethereum account unlock password sources

use super::config::EthConfig;
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Environment variable holding the unlock password
pub const PASSWORD_ENV: &str = "ETHMATRIX_ETH_PASSWORD";

/// Where the unlock password comes from, checked in order
#[derive(Debug, PartialEq, Eq)]
pub enum PasswordSource {
    /// From --password-file or `[eth] password_file`
    File(PathBuf),
    /// From ETHMATRIX_ETH_PASSWORD
    EnvVar,
    /// From `[eth] password`
    Config,
    /// Masked terminal prompt
    Prompt,
    /// No unlock; the node asks for approval per request
    None,
}

/// Determine password source from CLI arguments and config
///
/// 1. `--password-file`
/// 2. `[eth] password_file`
/// 3. `ETHMATRIX_ETH_PASSWORD`
/// 4. `[eth] password`
/// 5. Prompt, if `[eth] prompt_password = true`
pub fn determine_password_source(cli_file: Option<PathBuf>, eth: &EthConfig) -> PasswordSource {
    if let Some(file) = cli_file.or_else(|| eth.password_file.clone()) {
        PasswordSource::File(file)
    } else if std::env::var_os(PASSWORD_ENV).is_some() {
        PasswordSource::EnvVar
    } else if eth.password.is_some() {
        PasswordSource::Config
    } else if eth.prompt_password {
        PasswordSource::Prompt
    } else {
        PasswordSource::None
    }
}

/// Read the password from `source`
pub fn read_password(
    source: &PasswordSource,
    eth: &EthConfig,
) -> Result<Option<Zeroizing<String>>, Box<dyn std::error::Error>> {
    match source {
        PasswordSource::File(path) => read_password_file(path).map(Some),
        PasswordSource::EnvVar => {
            let password = std::env::var(PASSWORD_ENV)
                .map_err(|_| format!("{} env var not set", PASSWORD_ENV))?;
            Ok(Some(Zeroizing::new(password)))
        }
        PasswordSource::Config => Ok(eth.password.clone().map(Zeroizing::new)),
        PasswordSource::Prompt => {
            let password = rpassword::prompt_password("ETH Key Password: ")
                .map_err(|e| format!("Failed to read password from terminal: {}", e))?;
            Ok(Some(Zeroizing::new(password)))
        }
        PasswordSource::None => Ok(None),
    }
}

fn read_password_file(path: &Path) -> Result<Zeroizing<String>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("Password file not found: {}", path.display()).into());
    }

    let raw = Zeroizing::new(
        fs::read_to_string(path).map_err(|e| format!("Failed to read password file: {}", e))?,
    );
    // Only the line ending is stripped; spaces may be part of the password
    let password = raw.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err("Password file is empty".into());
    }

    Ok(Zeroizing::new(password.to_string()))
}
