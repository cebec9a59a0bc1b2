use clap::{Parser, Subcommand, ValueEnum};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "prefs",
    about = "Typed, optionally encrypted, local preferences",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Exercise every value kind and the encryption path against a scratch store.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the value stored under a key.
    Get {
        key: String,
        #[arg(long, value_enum, default_value_t = ValueKind::String)]
        kind: ValueKind,
    },
    /// Store a value under a key.
    Set {
        key: String,
        value: String,
        #[arg(long, value_enum, default_value_t = ValueKind::String)]
        kind: ValueKind,
        /// Wait until the value is on disk before returning.
        #[arg(long)]
        sync: bool,
    },
    /// Report whether a key holds a value.
    Contains { key: String },
    /// Encrypt a string and store the ciphertext.
    EncryptSet { key: String, value: String },
    /// Decrypt and print a string stored with `encrypt-set`.
    EncryptGet { key: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

/// How a command-line value maps onto a stored preference.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Long,
    Int,
    Bool,
    String,
    /// Arbitrary JSON, stored through the structured codec.
    Json,
}
