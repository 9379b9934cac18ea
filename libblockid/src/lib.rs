//! Block device filesystem identification.
//!
//! A [`Probe`] wraps an open device or image, a [`Chain`] of [`Prober`]s is
//! run against it and the first prober that recognises the on-disk
//! superblock fills the probe's [`FilesystemResult`]. The [`wipe`] module
//! erases the signature of whatever the chain recognised.

pub mod chain;
pub mod filesystems;
pub mod probe;
pub mod util;
pub mod wipe;

#[cfg(target_os = "linux")]
mod ioctl;

#[cfg(test)]
mod tests;

use std::io::Error as IoError;

use thiserror::Error;

use crate::filesystems::{FsError, ext::ext_chain, vfat::vfat_chain};

pub use crate::{
    chain::{Chain, ProbeFn, Prober},
    probe::{
        BlockType, BlockidMagic, BlockidUUID, BlockidVersion, FilesystemResult,
        FilesystemResultView, Probe, SecType, UsageType,
    },
    wipe::{WipeError, WipedSignature, wipe_signature, wipe_signature_with},
};

#[derive(Debug, Error)]
pub enum BlockidError {
    #[error("I/O operation failed: {0}")]
    IoError(#[from] IoError),
    #[error("*NIX error code: {0}")]
    NixError(#[from] rustix::io::Errno),
    #[error("Filesystem error: {0}")]
    FsError(#[from] FsError),
    #[error("Wipe error: {0}")]
    WipeError(#[from] WipeError),
}

/// Every family this library knows, ext family first and vfat last.
pub fn default_chain() -> Chain {
    ext_chain().then(vfat_chain())
}
