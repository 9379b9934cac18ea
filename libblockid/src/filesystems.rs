pub mod ext;
pub mod vfat;
pub mod volume_id;

use thiserror::Error;

use crate::filesystems::{ext::ExtError, vfat::FatError};

#[derive(Debug, Error)]
pub enum FsError {
    #[error("EXT filesystem error: {0}")]
    ExtError(#[from] ExtError),
    #[error("VFAT filesystem error: {0}")]
    Vfat(#[from] FatError),
}
