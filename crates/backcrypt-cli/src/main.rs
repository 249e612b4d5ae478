//! backcrypt: encrypted backup object CLI
//!
//! Local files:
//!   encrypt <input> <output>   - encrypt a file under the current key generation
//!   decrypt <input> <output>   - decrypt a file (headed or legacy headerless)
//!   inspect <input>            - show the object header
//!
//! Bucket:
//!   upload <local>             - encrypt and upload a file
//!   download <object> <local>  - download and decrypt an object
//!   list [<prefix>]            - list stored objects
//!   delete <object>            - delete an object
//!   status                     - check that the bucket is reachable
//!
//!   config show                - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use backcrypt_core::BackcryptConfig;
use backcrypt_crypto::{CipherSuite, MasterSecret, ObjectCipher};
use backcrypt_storage::{EncryptedStore, S3Credentials};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "backcrypt",
    version,
    about = "Encrypted backup object client",
    long_about = "backcrypt: encrypt, decrypt, and manage backup objects in S3-compatible storage"
)]
struct Cli {
    /// Path to backcrypt.toml configuration file
    #[arg(long, short = 'c', env = "BACKCRYPT_CONFIG", default_value = "/etc/backcrypt/config.toml")]
    config: PathBuf,

    /// File holding the master secret (overrides crypto.master_secret_file)
    #[arg(long, global = true)]
    secret_file: Option<PathBuf>,

    /// Cipher suite for new objects (overrides crypto.cipher_suite)
    #[arg(long, global = true, value_parser = parse_cipher)]
    cipher: Option<CipherSuite>,

    /// Log level (overrides log.level; RUST_LOG takes precedence)
    #[arg(long, global = true)]
    log: Option<String>,

    /// Log format (overrides log.format)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a local file
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        /// Object identifier the key is bound to (default: input file name)
        #[arg(long, short = 'o')]
        object: Option<String>,
    },

    /// Decrypt a local file
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        /// Object identifier the key is bound to
        /// (default: input file name without a trailing `.enc`)
        #[arg(long, short = 'o')]
        object: Option<String>,
    },

    /// Show the header of a local encrypted file
    Inspect { input: PathBuf },

    /// Encrypt and upload a local file
    ///
    /// Credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY
    /// environment variables (or storage.credentials_file).
    Upload {
        local: PathBuf,
        /// Object key in the bucket (default: local file name)
        #[arg(long, short = 'o')]
        object: Option<String>,
    },

    /// Download and decrypt an object
    Download { object: String, local: PathBuf },

    /// List objects under a prefix
    List {
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Delete an object
    Delete { object: String },

    /// Check that the bucket is reachable
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

fn parse_cipher(s: &str) -> Result<CipherSuite, String> {
    s.parse()
}

// ── Entry point ────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BackcryptConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = match cli.log_format {
        Some(format) => format,
        None => LogFormat::from_str(&config.log.format, true)
            .map_err(|e| anyhow::anyhow!("invalid log.format: {e}"))?,
    };
    init_logging(level, format);

    if !cli.config.exists() {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
    }

    match &cli.command {
        Commands::Encrypt { input, output, object } => {
            let cipher = object_cipher(&config, &cli)?;
            let object = object_id(object.as_deref(), input)?;
            cmd_encrypt(&cipher, &object, input, output)
        }
        Commands::Decrypt { input, output, object } => {
            let cipher = object_cipher(&config, &cli)?;
            let object = decrypt_object_id(object.as_deref(), input)?;
            cmd_decrypt(&cipher, &object, input, output)
        }
        Commands::Inspect { input } => cmd_inspect(input),
        Commands::Upload { local, object } => {
            let store = encrypted_store(&config, &cli)?;
            let object = object_id(object.as_deref(), local)?;
            let size = store.put_file(&object, local).await?;
            println!("uploaded {} -> {object} ({size} bytes)", local.display());
            Ok(())
        }
        Commands::Download { object, local } => {
            let store = encrypted_store(&config, &cli)?;
            let size = store.get_to_file(object, local).await?;
            println!("downloaded {object} -> {} ({size} bytes)", local.display());
            Ok(())
        }
        Commands::List { prefix } => {
            let store = encrypted_store(&config, &cli)?;
            for info in store.list(prefix).await? {
                println!("{:>12}  {}", info.size, info.path);
            }
            Ok(())
        }
        Commands::Delete { object } => {
            let store = encrypted_store(&config, &cli)?;
            store.delete(object).await?;
            println!("deleted {object}");
            Ok(())
        }
        Commands::Status => cmd_status(&config).await,
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Key material and storage ───────────────────────────────────────────────────

fn object_cipher(config: &BackcryptConfig, cli: &Cli) -> Result<ObjectCipher> {
    let mut crypto = config.crypto.clone();
    if let Some(path) = &cli.secret_file {
        crypto.master_secret_file = Some(path.clone());
    }
    let secret = crypto
        .resolve_master_secret()
        .context("resolving master secret")?;

    let suite = match cli.cipher {
        Some(suite) => suite,
        None => crypto
            .cipher_suite
            .parse::<CipherSuite>()
            .map_err(|e| anyhow::anyhow!("invalid crypto.cipher_suite: {e}"))?,
    };
    Ok(ObjectCipher::new(MasterSecret::new(secret), suite))
}

fn encrypted_store(config: &BackcryptConfig, cli: &Cli) -> Result<EncryptedStore> {
    let cipher = object_cipher(config, cli)?;
    let credentials = S3Credentials::resolve(&config.storage)?;
    let op = backcrypt_storage::build_from_core_config(&config.storage, &credentials)
        .context("building storage operator")?;
    Ok(EncryptedStore::new(op, cipher))
}

/// Explicit object id, or the file name of `path`.
fn object_id(explicit: Option<&str>, path: &Path) -> Result<String> {
    if let Some(object) = explicit {
        return Ok(object.to_string());
    }
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| {
            format!(
                "cannot derive an object id from {}; pass --object",
                path.display()
            )
        })
}

/// Object id for a local ciphertext: `app.tar.gz.enc` was encrypted as `app.tar.gz`.
fn decrypt_object_id(explicit: Option<&str>, input: &Path) -> Result<String> {
    let id = object_id(explicit, input)?;
    if explicit.is_some() {
        return Ok(id);
    }
    match id.strip_suffix(".enc") {
        Some(stem) if !stem.is_empty() => Ok(stem.to_string()),
        _ => Ok(id),
    }
}

// ── Local file commands ────────────────────────────────────────────────────────

fn cmd_encrypt(cipher: &ObjectCipher, object: &str, input: &Path, output: &Path) -> Result<()> {
    let mut reader = BufReader::new(
        File::open(input).with_context(|| format!("opening {}", input.display()))?,
    );
    let writer = BufWriter::new(
        File::create(output).with_context(|| format!("creating {}", output.display()))?,
    );
    let mut writer = cipher
        .encrypt(object, &mut reader, writer)
        .with_context(|| format!("encrypting {}", input.display()))?;
    writer
        .flush()
        .with_context(|| format!("writing {}", output.display()))?;

    tracing::info!(object, input = %input.display(), output = %output.display(), "encrypted");
    Ok(())
}

fn cmd_decrypt(cipher: &ObjectCipher, object: &str, input: &Path, output: &Path) -> Result<()> {
    let source = BufReader::new(
        File::open(input).with_context(|| format!("opening {}", input.display()))?,
    );
    let mut writer = BufWriter::new(
        File::create(output).with_context(|| format!("creating {}", output.display()))?,
    );

    let result = cipher
        .decrypt(object, source, &mut writer)
        .map_err(anyhow::Error::from)
        .and_then(|n| writer.flush().map(|()| n).map_err(anyhow::Error::from));

    match result {
        Ok(bytes) => {
            tracing::info!(object, bytes, output = %output.display(), "decrypted");
            Ok(())
        }
        Err(e) => {
            drop(writer);
            if let Err(rm) = std::fs::remove_file(output) {
                tracing::debug!(error = %rm, "could not remove partial output");
            }
            Err(e.context(format!("decrypting {}", input.display())))
        }
    }
}

fn cmd_inspect(input: &Path) -> Result<()> {
    let mut file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    match backcrypt_crypto::inspect(&mut file)? {
        Some(scheme) => {
            println!("{}", input.display());
            println!("  header:  present");
            println!("  cipher:  {}", scheme.cipher);
            println!("  kdf:     {}", scheme.kdf);
        }
        None => {
            println!("{}", input.display());
            println!("  header:  none (legacy object, key generation found by probing)");
        }
    }
    Ok(())
}

// ── Bucket commands ────────────────────────────────────────────────────────────

async fn cmd_status(config: &BackcryptConfig) -> Result<()> {
    println!("endpoint: {}", config.storage.endpoint);
    println!("bucket:   {}", config.storage.bucket);

    let credentials = S3Credentials::resolve(&config.storage)?;
    let op = backcrypt_storage::build_from_core_config(&config.storage, &credentials)
        .context("building storage operator")?;
    match backcrypt_storage::check_health(&op).await {
        Ok(status) => {
            println!("storage:  reachable ({})", status.scheme);
            Ok(())
        }
        Err(e) => {
            println!("storage:  unreachable");
            Err(e)
        }
    }
}

fn cmd_config_show(config: &BackcryptConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
