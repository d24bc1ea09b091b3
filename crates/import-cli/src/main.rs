//! Command line driver for external key material import
//!
//! # Usage
//!
//! ```bash
//! # Run the full import against the in-process service
//! kms-import import [--config import.json] [--algorithm RSAES_OAEP_SHA_256] [--key-spec RSA_3072]
//!
//! # Wrap material under a wrapping key exported by a KMS
//! kms-import wrap --public-key wrapping_key.pem [--material-b64 <base64>]
//! ```
//!
//! Without `--config`, settings come from `KMS_IMPORT_*` environment
//! variables. Log verbosity follows `RUST_LOG` (default `info`); logs go to
//! stderr and results to stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kms_import::{
    ConfigError, ImportConfig, ImportWorkflow, InMemoryKms, KeyMaterial, KeyMaterialWrapper,
    KeyWrap, KmsImportError, MaterialError, ServiceError, WrapError, WrappingAlgorithm,
    WrappingKeySpec, WrappingPublicKey,
};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "kms-import")]
#[command(about = "Import externally generated key material into a key management service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an external key and import material into it
    Import {
        /// JSON configuration file; environment variables are used when absent
        #[arg(long)]
        config: Option<PathBuf>,
        /// Wrapping algorithm override
        #[arg(long)]
        algorithm: Option<WrappingAlgorithm>,
        /// Wrapping key size override
        #[arg(long)]
        key_spec: Option<WrappingKeySpec>,
        /// Import the ten-byte demonstration payload instead of configured material
        #[arg(long)]
        sample: bool,
    },
    /// Wrap key material under a wrapping public key and print it as base64
    Wrap {
        /// Wrapping public key, PEM or DER SubjectPublicKeyInfo
        #[arg(long)]
        public_key: PathBuf,
        /// Wrapping algorithm
        #[arg(long, default_value = "RSAES_OAEP_SHA_1")]
        algorithm: WrappingAlgorithm,
        /// Base64 key material; 32 random bytes when absent
        #[arg(long)]
        material_b64: Option<String>,
    },
}

#[derive(Debug)]
enum CliError {
    Import(KmsImportError),
    Io(PathBuf, std::io::Error),
    Output(serde_json::Error),
}

impl From<KmsImportError> for CliError {
    fn from(e: KmsImportError) -> Self {
        CliError::Import(e)
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Import(e.into())
    }
}

impl From<MaterialError> for CliError {
    fn from(e: MaterialError) -> Self {
        CliError::Import(e.into())
    }
}

impl From<WrapError> for CliError {
    fn from(e: WrapError) -> Self {
        CliError::Import(e.into())
    }
}

fn load_config(
    path: Option<PathBuf>,
    algorithm: Option<WrappingAlgorithm>,
    key_spec: Option<WrappingKeySpec>,
) -> Result<ImportConfig, CliError> {
    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ImportConfig::from_json_file(path)?
        }
        None => ImportConfig::from_env()?,
    };
    if let Some(algorithm) = algorithm {
        config.wrapping_algorithm = algorithm;
    }
    if let Some(key_spec) = key_spec {
        config.wrapping_key_spec = key_spec;
    }
    Ok(config)
}

async fn run_import(
    config_path: Option<PathBuf>,
    algorithm: Option<WrappingAlgorithm>,
    key_spec: Option<WrappingKeySpec>,
    sample: bool,
) -> Result<(), CliError> {
    let config = load_config(config_path, algorithm, key_spec)?;
    let material = if sample {
        warn!("Using the demonstration payload; symmetric imports require 32 bytes");
        KeyMaterial::sample()
    } else {
        config.key_material()?
    };

    info!(
        region = %config.region,
        algorithm = %config.wrapping_algorithm,
        key_spec = config.wrapping_key_spec.as_str(),
        material_len = material.len(),
        "Starting key material import"
    );

    let client = InMemoryKms::new();
    let outcome = ImportWorkflow::new(&client, &config).run(&material).await?;

    let json = serde_json::to_string_pretty(&outcome).map_err(CliError::Output)?;
    println!("{}", json);
    Ok(())
}

fn run_wrap(
    public_key: PathBuf,
    algorithm: WrappingAlgorithm,
    material_b64: Option<String>,
) -> Result<(), CliError> {
    let bytes = std::fs::read(&public_key).map_err(|e| CliError::Io(public_key.clone(), e))?;
    let wrapping_key = match std::str::from_utf8(&bytes) {
        Ok(text) if text.trim_start().starts_with("-----BEGIN") => {
            WrappingPublicKey::from_pem(text)?
        }
        _ => WrappingPublicKey::from_der(bytes.as_slice()),
    };

    let material = match material_b64 {
        Some(encoded) => KeyMaterial::from_base64(&encoded)?,
        None => KeyMaterial::generate(KeyMaterial::SYMMETRIC_LEN)?,
    };

    let ciphertext = KeyMaterialWrapper::new(algorithm)
        .wrap(material.as_slice(), wrapping_key.as_der())?;
    info!(%algorithm, ciphertext_len = ciphertext.len(), "Wrapped key material");

    println!("{}", kms_import::EncryptedMaterial::new(ciphertext).to_base64());
    Ok(())
}

fn report(err: &CliError) {
    match err {
        CliError::Import(KmsImportError::Service(ServiceError::ServiceRejected {
            status_code,
            error_code,
            request_id,
            message,
        })) => {
            error!(
                status_code,
                error_code = %error_code,
                request_id = %request_id,
                "Request reached the service but was rejected: {}",
                message
            );
        }
        CliError::Import(KmsImportError::Service(ServiceError::TransportFailure { message })) => {
            error!("Could not communicate with the service: {}", message);
        }
        CliError::Import(e) => error!("Import failed: {}", e),
        CliError::Io(path, e) => error!("Failed to read {}: {}", path.display(), e),
        CliError::Output(e) => error!("Failed to serialize result: {}", e),
    }

    if let CliError::Import(e) = err {
        if let Some(hint) = e.suggestion() {
            info!("hint: {}", hint);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Import {
            config,
            algorithm,
            key_spec,
            sample,
        } => run_import(config, algorithm, key_spec, sample).await,
        Commands::Wrap {
            public_key,
            algorithm,
            material_b64,
        } => run_wrap(public_key, algorithm, material_b64),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}
