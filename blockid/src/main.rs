mod logger;

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand, ValueEnum};
use libblockid::{
    BlockidError, Chain, Probe, default_chain,
    filesystems::{ext::ext_chain, vfat::vfat_chain},
    wipe_signature_with,
};

use crate::logger::init_logger;

#[derive(Parser)]
#[command(name = "blockid")]
#[command(version, about = "Identify and erase block device signatures", long_about = None)]
struct Cli {
    /// Log every probe step to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the filesystem found on a device
    Describe {
        /// Device or image path
        device: PathBuf,
        /// Byte offset of the region to probe
        #[arg(short, long, default_value_t = 0)]
        offset: u64,
        /// Families to try
        #[arg(short, long, value_enum, default_value_t = ChainKind::All)]
        chain: ChainKind,
    },
    /// Erase the signature of the filesystem found on a device
    Wipe {
        /// Device or image path
        device: PathBuf,
        /// Byte offset of the region to probe
        #[arg(short, long, default_value_t = 0)]
        offset: u64,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum ChainKind {
    All,
    Ext,
    Vfat,
}

impl ChainKind {
    fn chain(self) -> Chain {
        match self {
            Self::All => default_chain(),
            Self::Ext => ext_chain(),
            Self::Vfat => vfat_chain(),
        }
    }
}

/// Render the probe result as `KEY="value"` pairs, or `None` if nothing
/// matched.
fn describe_line(probe: &Probe) -> Option<String> {
    let fs = probe.as_filesystem()?;
    let mut fields = Vec::new();

    if let Some(label) = fs.label() {
        fields.push(format!("LABEL=\"{label}\""));
    }
    if let Some(uuid) = fs.uuid() {
        fields.push(format!("UUID=\"{uuid}\""));
    }
    if let Some(journal) = fs.ext_journal() {
        fields.push(format!("EXT_JOURNAL=\"{journal}\""));
    }
    if let Some(sec_type) = fs.sec_type() {
        fields.push(format!("SEC_TYPE=\"{sec_type}\""));
    }
    if let Some(version) = fs.version() {
        fields.push(format!("VERSION=\"{version}\""));
    }
    if let Some(btype) = fs.block_type() {
        fields.push(format!("TYPE=\"{btype}\""));
    }
    if let Some(usage) = fs.usage() {
        fields.push(format!("USAGE=\"{usage}\""));
    }

    Some(format!("{}: {}", probe.path().display(), fields.join(" ")))
}

fn describe(device: &Path, offset: u64, chain: ChainKind) -> Result<ExitCode, BlockidError> {
    let mut probe = Probe::from_filename(device, offset)?;
    chain.chain().probe(&mut probe)?;

    match describe_line(&probe) {
        Some(line) => {
            println!("{line}");
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(ExitCode::from(2)),
    }
}

fn wipe(device: &Path, offset: u64) -> Result<ExitCode, BlockidError> {
    let wiped = wipe_signature_with(device, offset, &default_chain())?;

    println!(
        "{}: {} bytes were erased at offset {:#x} ({})",
        device.display(),
        wiped.len,
        wiped.offset,
        wiped.btype
    );

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let result = match cli.command {
        Commands::Describe {
            device,
            offset,
            chain,
        } => describe(&device, offset, chain),
        Commands::Wipe { device, offset } => wipe(&device, offset),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("blockid: {e}");
            ExitCode::FAILURE
        }
    }
}
