//! Signature erasure.
//!
//! Wiping zeroes only the magic bytes the detecting family keys on, so the
//! rest of the superblock stays intact and a later probe simply no longer
//! recognises the device.

use std::{fs::OpenOptions, io::Error as IoError, path::Path};

use rustix::{fd::AsFd, fs::fsync, io::pwrite};
use thiserror::Error;

use crate::{
    BlockidError, default_chain,
    chain::Chain,
    probe::{BlockType, BlockidMagic, Probe},
};

#[derive(Debug, Error)]
pub enum WipeError {
    #[error("wiping {0} signatures is not implemented")]
    NotImplemented(BlockType),
    #[error("unknown filesystem on {0}")]
    UnknownFilesystem(String),
    #[error("short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: usize, written: usize },
    #[error("I/O operation failed: {0}")]
    IoError(#[from] IoError),
}

/// What a successful wipe erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WipedSignature {
    pub btype: BlockType,
    /// Absolute byte offset in the file or device.
    pub offset: u64,
    pub len: usize,
}

/// Probe `path` with every known family and erase the signature found.
pub fn wipe_signature(path: &Path) -> Result<WipedSignature, BlockidError> {
    wipe_signature_with(path, 0, &default_chain())
}

/// Probe the region at `offset` of `path` with `chain` and erase the
/// signature found.
pub fn wipe_signature_with(
    path: &Path,
    offset: u64,
    chain: &Chain,
) -> Result<WipedSignature, BlockidError> {
    let (btype, region_offset) = {
        let mut probe = Probe::from_filename(path, offset)?;
        chain.probe(&mut probe)?;
        (probe.block_type(), probe.offset())
    };

    let Some(btype) = btype else {
        return Err(WipeError::UnknownFilesystem(path.display().to_string()).into());
    };

    match btype {
        BlockType::Jbd
        | BlockType::Ext2
        | BlockType::Ext3
        | BlockType::Ext4
        | BlockType::Ext4Dev => {
            let magic = chain
                .find(btype)
                .and_then(|prober| prober.magics.first())
                .ok_or_else(|| WipeError::UnknownFilesystem(btype.to_string()))?;

            zero_magic(path, btype, region_offset, magic)
        }
        BlockType::Vfat => Err(WipeError::NotImplemented(btype).into()),
    }
}

fn zero_magic(
    path: &Path,
    btype: BlockType,
    region_offset: u64,
    magic: &BlockidMagic,
) -> Result<WipedSignature, BlockidError> {
    let offset = region_offset + magic.offset();
    let zeroes = vec![0u8; magic.len()];

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(WipeError::from)?;

    let written = pwrite(file.as_fd(), &zeroes, offset)?;
    if written != zeroes.len() {
        return Err(WipeError::ShortWrite {
            expected: zeroes.len(),
            written,
        }
        .into());
    }

    fsync(file.as_fd())?;

    log::info!(
        "{}: erased {} signature, {} bytes at {offset:#x}",
        path.display(),
        btype,
        zeroes.len()
    );

    Ok(WipedSignature {
        btype,
        offset,
        len: zeroes.len(),
    })
}
