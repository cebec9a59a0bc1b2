mod cli;
mod config;
mod storage;
mod values;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use color_eyre::Result;
use prefs_core::{keys::KeyFacility, storage::PreferenceStore};
use prefs_helper::{FnAdapter, PreferencesHelper, Structured, SyncMode};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        Command::Version => print_version(),
        Command::Health => run_health_check(&config)?,
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Get { key, kind } => {
            let prefs = storage::helper_from_config(&config)?;
            println!("{}", values::read(&prefs, &key, kind)?);
        }
        Command::Set {
            key,
            value,
            kind,
            sync,
        } => {
            let prefs = storage::helper_from_config(&config)?;
            let mode = if sync {
                SyncMode::Commit
            } else {
                SyncMode::Apply
            };
            values::write(&prefs, &key, &value, kind, mode)?;
        }
        Command::Contains { key } => {
            let prefs = storage::helper_from_config(&config)?;
            println!("{}", prefs.contains(&key)?);
        }
        Command::EncryptSet { key, value } => {
            let prefs = storage::helper_from_config(&config)?;
            prefs.set_and_encrypt(&key, &value)?;
        }
        Command::EncryptGet { key } => {
            let prefs = storage::helper_from_config(&config)?;
            println!("{}", prefs.get_encrypted(&key)?);
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("prefs {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(&config.resolved()?)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

/// Runs every value kind through a scratch store, so the real file and
/// keychain are never touched.
fn run_health_check(config: &config::Config) -> Result<()> {
    let dir = tempfile::tempdir()?;
    let prefs = storage::scratch_helper(dir.path(), config.alias())?;
    run_prefs_health(&prefs)?;
    println!("Preferences: ok");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProbeRecord {
    name: String,
    age: i32,
}

impl Structured for ProbeRecord {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProbeCode {
    prefix: String,
    digit: u8,
}

impl Structured for ProbeCode {}

fn run_prefs_health<S, F>(prefs: &PreferencesHelper<S, F>) -> Result<()>
where
    S: PreferenceStore,
    F: KeyFacility,
{
    prefs.set_sync("health/long", &6942069i64)?;
    prefs.set_sync("health/int", &451i32)?;
    prefs.set_sync("health/bool", &true)?;
    prefs.set_sync("health/string", &"ok".to_string())?;
    ensure(prefs.get::<i64>("health/long", None)? == 6942069, "long")?;
    ensure(prefs.get::<i32>("health/int", None)? == 451, "int")?;
    ensure(prefs.get::<bool>("health/bool", None)?, "bool")?;
    ensure(prefs.get::<String>("health/string", None)? == "ok", "string")?;

    let record = ProbeRecord {
        name: "Bilbo".into(),
        age: 111,
    };
    let fallback = ProbeRecord {
        name: "Frodo".into(),
        age: 35,
    };
    prefs.set_sync("health/record", &record)?;
    ensure(prefs.get("health/record", Some(fallback))? == record, "structured")?;

    prefs.add_adapter(FnAdapter::new(
        |code: &ProbeCode| Ok(format!("{}{}", code.prefix, code.digit)),
        |input: &str| {
            if input.is_empty() || !input.is_ascii() {
                return Err("expected an ascii code".into());
            }
            let (prefix, digit) = input.split_at(input.len().saturating_sub(1));
            Ok(ProbeCode {
                prefix: prefix.to_string(),
                digit: digit.parse()?,
            })
        },
    ));
    let code = ProbeCode {
        prefix: "AA".into(),
        digit: 2,
    };
    let code_fallback = ProbeCode {
        prefix: "ZZ".into(),
        digit: 9,
    };
    prefs.set_sync("health/adapter", &code)?;
    ensure(
        prefs.store().get_string("health/adapter", "")? == "AA2",
        "adapter encoding",
    )?;
    ensure(prefs.get("health/adapter", Some(code_fallback))? == code, "adapter")?;

    prefs.set_and_encrypt("health/secret", "secret")?;
    ensure(
        prefs.store().get_string("health/secret", "")? != "secret",
        "ciphertext",
    )?;
    ensure(prefs.get_encrypted("health/secret")? == "secret", "encryption")?;

    info!("health check passed");
    Ok(())
}

fn ensure(ok: bool, what: &str) -> Result<()> {
    if !ok {
        color_eyre::eyre::bail!("{what} round-trip failed");
    }
    Ok(())
}
