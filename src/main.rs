use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tracker_core::{
    DispersalConfig, DispersalEngine, KeyDeriver, KeyDigest, NonceBase, SealedPartition,
    SymmetricKey, TrackerConfig, KEYSPACE_SIZE,
};

//==================== CLI ====================//

#[derive(Parser)]
#[command(name = "tracker", version, about = "Disperse files into sealed threshold partitions")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the ring key of each input string.
    Key {
        #[arg(required = true)]
        inputs: Vec<String>,
        #[arg(long, default_value_t = KEYSPACE_SIZE)]
        keyspace: u32,
        #[arg(long, default_value = "sha1")]
        digest: String,
    },
    /// Print a config with a fresh random key and IV.
    Keygen,
    /// Split a file into sealed partitions plus a manifest.
    Disperse(DisperseArgs),
    /// Rebuild a file from whichever partitions are present.
    Reassemble(ReassembleArgs),
}

#[derive(Args)]
struct KeyArgs {
    /// JSON tracker config (key, IV, shape).
    #[arg(long, conflicts_with_all = ["key_hex", "iv_hex"])]
    config: Option<PathBuf>,
    /// 32-byte key in hex.
    #[arg(long)]
    key_hex: Option<String>,
    /// 24-byte IV in hex.
    #[arg(long)]
    iv_hex: Option<String>,
}

impl KeyArgs {
    fn resolve(&self) -> Result<TrackerConfig> {
        if let Some(path) = &self.config {
            return TrackerConfig::from_path(path)
                .with_context(|| format!("loading config {}", path.display()));
        }
        match (&self.key_hex, &self.iv_hex) {
            (Some(key), Some(iv)) => Ok(TrackerConfig::new(key.as_str(), iv.as_str())),
            _ => bail!("either --config or both --key-hex and --iv-hex are required"),
        }
    }
}

#[derive(Args)]
struct DisperseArgs {
    input: PathBuf,
    out_dir: PathBuf,
    #[command(flatten)]
    keys: KeyArgs,
    /// Resource identifier used for the ring key (defaults to the file name).
    #[arg(long)]
    id: Option<String>,
    /// Number of partitions to produce.
    #[arg(long)]
    max: Option<usize>,
    /// Partitions required to reassemble.
    #[arg(long)]
    min: Option<usize>,
    #[arg(long)]
    padding: Option<usize>,
}

#[derive(Args)]
struct ReassembleArgs {
    in_dir: PathBuf,
    output: PathBuf,
    #[command(flatten)]
    keys: KeyArgs,
}

//==================== Manifest / resource ====================//

const MANIFEST: &str = "manifest.json";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u8,
    resource_id: String,
    resource_key: u32,
    key_digest: KeyDigest,
    file_name: String,
    max_partitions: usize,
    min_partitions: usize,
    padding: usize,
    partitions: Vec<u8>,
}

/// What actually gets dispersed: the file bytes and its name.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct FileResource {
    file_name: String,
    #[serde(with = "base64_bytes")]
    bytes: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

fn partition_path(dir: &Path, index: u8) -> PathBuf {
    dir.join(format!("partition_{:03}.bin", index))
}

//==================== Commands ====================//

fn key_cmd(inputs: &[String], keyspace: u32, digest: &str) -> Result<()> {
    let deriver = KeyDeriver::new(digest.parse()?, keyspace)?;
    for input in inputs {
        println!("{}\t{}", deriver.derive(input), input);
    }
    Ok(())
}

fn keygen_cmd() -> Result<()> {
    let key = SymmetricKey::generate();
    let iv = NonceBase::random();
    let config = TrackerConfig::new(hex::encode(key.as_bytes()), hex::encode(iv.as_bytes()));
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn disperse_cmd(args: &DisperseArgs) -> Result<()> {
    let mut config = args.keys.resolve()?;
    if let Some(max) = args.max {
        config.max_partitions = max;
    }
    if let Some(min) = args.min {
        config.min_partitions = min;
    }
    if let Some(padding) = args.padding {
        config.padding = padding;
    }
    let engine = config.engine()?;
    let deriver = config.key_deriver()?;

    let bytes = fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let file_name = args
        .input
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("input.bin")
        .to_string();
    let resource_id = args.id.clone().unwrap_or_else(|| file_name.clone());
    let resource_key = deriver.derive(&resource_id);

    let sealed = engine.disperse(&FileResource {
        file_name: file_name.clone(),
        bytes,
    })?;

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;
    for partition in &sealed {
        let path = partition_path(&args.out_dir, partition.index);
        fs::write(&path, partition.to_wire())
            .with_context(|| format!("writing {}", path.display()))?;
    }

    let shape = engine.config();
    let manifest = Manifest {
        version: 1,
        resource_id,
        resource_key,
        key_digest: deriver.digest(),
        file_name,
        max_partitions: shape.max_partitions(),
        min_partitions: shape.min_partitions(),
        padding: shape.padding(),
        partitions: sealed.iter().map(|p| p.index).collect(),
    };
    fs::write(
        args.out_dir.join(MANIFEST),
        serde_json::to_vec_pretty(&manifest)?,
    )?;

    info!(
        resource = %manifest.resource_id,
        key = manifest.resource_key,
        partitions = sealed.len(),
        threshold = manifest.min_partitions,
        "dispersed → {}",
        args.out_dir.display()
    );
    Ok(())
}

fn reassemble_cmd(args: &ReassembleArgs) -> Result<()> {
    let config = args.keys.resolve()?;
    let manifest_path = args.in_dir.join(MANIFEST);
    let manifest: Manifest = serde_json::from_slice(
        &fs::read(&manifest_path)
            .with_context(|| format!("reading {}", manifest_path.display()))?,
    )
    .context("parsing manifest")?;

    // The manifest fixes the shape; the config only supplies key material.
    let shape = DispersalConfig::new(
        manifest.max_partitions,
        manifest.min_partitions,
        manifest.padding,
    )?;
    let engine = DispersalEngine::new(shape, config.sealer()?)?;

    let mut sealed = Vec::with_capacity(manifest.partitions.len());
    for &index in &manifest.partitions {
        let path = partition_path(&args.in_dir, index);
        if !path.exists() {
            warn!(index, "partition file missing");
            continue;
        }
        let frame = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        match SealedPartition::from_wire(&frame) {
            Ok(partition) => sealed.push(partition),
            Err(err) => warn!(index, error = %err, "skipping unreadable partition"),
        }
    }

    let report = engine.reassemble_with_report::<FileResource>(&sealed)?;
    if !report.rejected.is_empty() {
        warn!(rejected = report.rejected.len(), "reassembled despite rejected partitions");
    }
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(&args.output, &report.resource.bytes)
        .with_context(|| format!("writing {}", args.output.display()))?;

    info!(
        file = %report.resource.file_name,
        used = sealed.len() - report.rejected.len(),
        "reassembled → {}",
        args.output.display()
    );
    Ok(())
}

//==================== main ====================//

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Key {
            inputs,
            keyspace,
            digest,
        } => key_cmd(inputs, *keyspace, digest),
        Command::Keygen => keygen_cmd(),
        Command::Disperse(args) => disperse_cmd(args),
        Command::Reassemble(args) => reassemble_cmd(args),
    }
}
