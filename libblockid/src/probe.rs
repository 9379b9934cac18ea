use std::{
    fmt,
    fs::File,
    io::{Error as IoError, ErrorKind as IoErrorKind, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

#[cfg(not(target_os = "linux"))]
use std::io::Result as IoResult;

use rustix::{
    fd::AsFd,
    fs::{Dev, FileType, Mode, fstat, major, minor},
};
use uuid::Uuid;

#[cfg(target_os = "linux")]
use crate::ioctl::{device_size_bytes, logical_block_size};

use crate::{BlockidError, filesystems::volume_id::VolumeId32};

/// Represents a probe session on a file or block device.
///
/// A [`Probe`] owns the open device handle for the duration of one probing
/// attempt and stores the result written by whichever prober claims the
/// device. Every offset handed to the read helpers is relative to the start
/// of the probed region, which begins `offset` bytes into the file.
///
/// # Fields
/// - `file`: The open [`File`] or block device being probed.
/// - `path`: Path to the file or device.
/// - `offset`: Starting offset in bytes of the probed region.
/// - `size`: Size in bytes of the probed region (device size minus `offset`).
/// - `devno`: Device number of the file (`st_rdev`).
/// - `disk_devno`: Device number of the disk containing the file (`st_dev`).
/// - `sector_size`: Logical block size in bytes.
/// - `mode`: File mode bits (`Mode`) used to determine file type.
/// - `value`: The detected [`FilesystemResult`] once a chain has matched.
#[derive(Debug)]
pub struct Probe {
    file: File,
    path: PathBuf,
    offset: u64,
    size: u64,

    devno: Dev,
    disk_devno: Dev,
    sector_size: u64,
    mode: Mode,

    value: Option<FilesystemResult>,
}

#[cfg(target_os = "linux")]
fn block_device_geometry(file: &File) -> Result<(u64, u64), rustix::io::Errno> {
    Ok((
        u64::from(logical_block_size(file.as_fd())?),
        device_size_bytes(file.as_fd())?,
    ))
}

#[cfg(not(target_os = "linux"))]
fn block_device_geometry(mut file: &File) -> IoResult<(u64, u64)> {
    let size = file.seek(SeekFrom::End(0))?;
    Ok((512, size))
}

impl Probe {
    /// Create a probe from an open [`File`].
    ///
    /// - Reads file metadata via [`fstat`](rustix::fs::fstat).
    /// - If the file is a block device the logical block size and total size
    ///   come from kernel ioctls.
    /// - Otherwise the logical block size defaults to `512` bytes and the
    ///   size is the file size reported by `fstat`.
    ///
    /// `offset` marks the start of the region to probe, e.g. a partition
    /// inside a whole-disk image.
    pub fn new(file: File, path: &Path, offset: u64) -> Result<Probe, BlockidError> {
        let stat = fstat(file.as_fd())?;

        let (sector_size, total) = if FileType::from_raw_mode(stat.st_mode).is_block_device() {
            block_device_geometry(&file)?
        } else {
            (512, stat.st_size as u64)
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
            offset,
            size: total.saturating_sub(offset),
            devno: stat.st_rdev,
            disk_devno: stat.st_dev,
            sector_size,
            mode: Mode::from(stat.st_mode),
            value: None,
        })
    }

    /// Create a read-only probe from a file path.
    pub fn from_filename(filename: &Path, offset: u64) -> Result<Probe, BlockidError> {
        let file = File::open(filename)?;

        return Probe::new(file, filename, offset);
    }

    fn absolute(&self, offset: u64) -> Result<u64, IoError> {
        self.offset
            .checked_add(offset)
            .ok_or_else(|| IoError::new(IoErrorKind::InvalidInput, "probe offset overflows"))
    }

    /// Whether `len` bytes starting at region offset `offset` lie inside the
    /// probed region.
    pub(crate) fn fits(&self, offset: u64, len: u64) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.size)
    }

    pub(crate) fn read_exact_at<const S: usize>(
        &mut self,
        offset: u64,
    ) -> Result<[u8; S], IoError> {
        let mut buffer = [0u8; S];
        let pos = self.absolute(offset)?;
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(&mut buffer)?;

        return Ok(buffer);
    }

    pub(crate) fn read_vec_at(&mut self, offset: u64, buf_size: usize) -> Result<Vec<u8>, IoError> {
        let mut buffer = vec![0u8; buf_size];
        let pos = self.absolute(offset)?;
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(&mut buffer)?;

        return Ok(buffer);
    }

    /// Compare the bytes at a candidate magic location against the expected
    /// pattern.
    ///
    /// A location that does not fit inside the probed region never matches.
    pub(crate) fn has_magic(&mut self, magic: &BlockidMagic) -> Result<bool, IoError> {
        let offset = magic.offset();

        if !self.fits(offset, magic.len() as u64) {
            log::debug!(
                "has_magic - magic at {offset:#x} lies past the end of a {} byte region",
                self.size
            );
            return Ok(false);
        }

        let found = self.read_vec_at(offset, magic.len())?;

        return Ok(found.as_slice() == magic.magic);
    }

    pub(crate) fn push_result(&mut self, result: FilesystemResult) {
        if self.value.is_some() {
            log::error!(
                "Probe already has a result, first: {:?}, second: {result:?}",
                self.value
            );
        }
        self.value = Some(result)
    }

    pub(crate) fn result_mut(&mut self) -> Option<&mut FilesystemResult> {
        self.value.as_mut()
    }

    /// Returns the result of the probe, if any prober matched.
    pub fn result(&self) -> Option<&FilesystemResult> {
        self.value.as_ref()
    }

    /// Returns a [`FilesystemResultView`] if the probe detected a filesystem.
    pub fn as_filesystem(&self) -> Option<FilesystemResultView<'_>> {
        self.result().map(|inner| FilesystemResultView { inner })
    }

    /// Returns the matched family, if any.
    pub fn block_type(&self) -> Option<BlockType> {
        self.result().and_then(|r| r.btype)
    }

    /// Returns the path of the probed file or device as a [`Path`].
    #[inline]
    pub fn path(&self) -> &Path {
        return self.path.as_path();
    }

    /// Returns the size in bytes of the probed region.
    #[inline]
    pub fn size(&self) -> u64 {
        return self.size;
    }

    /// Returns the starting offset in bytes used for this probe.
    #[inline]
    pub fn offset(&self) -> u64 {
        return self.offset;
    }

    /// Returns the logical sector size in bytes of the device.
    #[inline]
    pub fn ssz(&self) -> u64 {
        return self.sector_size;
    }

    /// Returns the device number of the probed file.
    #[inline]
    pub fn devno(&self) -> Dev {
        return self.devno;
    }

    #[inline]
    pub fn devno_maj(&self) -> u32 {
        return major(self.devno);
    }

    #[inline]
    pub fn devno_min(&self) -> u32 {
        return minor(self.devno);
    }

    /// Returns the device number of the disk containing the probed file.
    #[inline]
    pub fn disk_devno(&self) -> Dev {
        return self.disk_devno;
    }

    #[inline]
    pub fn disk_devno_maj(&self) -> u32 {
        return major(self.disk_devno);
    }

    #[inline]
    pub fn disk_devno_min(&self) -> u32 {
        return minor(self.disk_devno);
    }

    /// Returns the raw file mode of the probed file.
    #[inline]
    pub fn mode(&self) -> Mode {
        return self.mode;
    }

    /// Returns if the probed file is a block device.
    #[inline]
    pub fn is_block_device(&self) -> bool {
        return FileType::from_raw_mode(self.mode.as_raw_mode()).is_block_device();
    }

    /// Returns if the probed file is a regular file.
    #[inline]
    pub fn is_regular_file(&self) -> bool {
        return FileType::from_raw_mode(self.mode.as_raw_mode()).is_file();
    }
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct FilesystemResult {
    pub btype: Option<BlockType>,
    pub sec_type: Option<SecType>,
    pub uuid: Option<BlockidUUID>,
    pub ext_journal: Option<BlockidUUID>,
    pub label: Option<String>,
    pub creator: Option<String>,
    pub usage: Option<UsageType>,
    pub size: Option<u64>,
    pub fs_last_block: Option<u64>,
    pub fs_block_size: Option<u64>,
    pub block_size: Option<u64>,
    pub version: Option<BlockidVersion>,
    pub sbmagic: Option<&'static [u8]>,
    pub sbmagic_offset: Option<u64>,
}

/// Filesystem results returned by [`Probe::as_filesystem`].
#[derive(Debug)]
pub struct FilesystemResultView<'a> {
    inner: &'a FilesystemResult,
}

impl<'a> FilesystemResultView<'a> {
    /// Returns the matched family.
    pub fn block_type(&self) -> Option<BlockType> {
        self.inner.btype
    }
    /// Returns the secondary type.
    pub fn sec_type(&self) -> Option<SecType> {
        self.inner.sec_type
    }
    /// Returns the UUID of the filesystem.
    pub fn uuid(&self) -> Option<BlockidUUID> {
        self.inner.uuid
    }
    /// Returns the external journal UUID of the filesystem.
    pub fn ext_journal(&self) -> Option<BlockidUUID> {
        self.inner.ext_journal
    }
    /// Returns the label of the filesystem.
    pub fn label(&self) -> Option<&'a str> {
        self.inner.label.as_deref()
    }
    /// Returns the creator identifier.
    pub fn creator(&self) -> Option<&'a str> {
        self.inner.creator.as_deref()
    }
    /// Returns the usage type of the filesystem.
    pub fn usage(&self) -> Option<UsageType> {
        self.inner.usage
    }
    /// Returns size in bytes of filesystem.
    pub fn size(&self) -> Option<u64> {
        self.inner.size
    }
    /// Returns last block of filesystem.
    pub fn last_block(&self) -> Option<u64> {
        self.inner.fs_last_block
    }
    /// Returns filesystem block size.
    pub fn fs_block_size(&self) -> Option<u64> {
        self.inner.fs_block_size
    }
    /// Returns device block size in bytes.
    pub fn block_size(&self) -> Option<u64> {
        self.inner.block_size
    }
    /// Returns the version of the filesystem, if known.
    pub fn version(&self) -> Option<BlockidVersion> {
        self.inner.version
    }
    /// Returns the detected superblock magic bytes.
    pub fn sbmagic(&self) -> Option<&'static [u8]> {
        self.inner.sbmagic
    }
    /// Returns the offset of the superblock magic.
    pub fn sbmagic_offset(&self) -> Option<u64> {
        self.inner.sbmagic_offset
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum BlockType {
    Jbd,
    Ext2,
    Ext3,
    Ext4,
    Ext4Dev,
    Vfat,
}

impl BlockType {
    /// Name of the family as reported in probe output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Jbd => "jbd",
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Ext4Dev => "ext4dev",
            Self::Vfat => "vfat",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SecType {
    Ext2,
    Msdos,
}

impl fmt::Display for SecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ext2 => write!(f, "ext2"),
            Self::Msdos => write!(f, "msdos"),
        }
    }
}

/// Unique identifier for a block.
///
/// # Variants
/// - `Uuid(Uuid)` - Uses a standard [`Uuid`] as the identifier.
/// - `VolumeId32(VolumeId32)` - Uses a 32-bit volume serial as the identifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum BlockidUUID {
    Uuid(Uuid),
    VolumeId32(VolumeId32),
}

impl From<Uuid> for BlockidUUID {
    fn from(value: Uuid) -> Self {
        BlockidUUID::Uuid(value)
    }
}

impl From<VolumeId32> for BlockidUUID {
    fn from(value: VolumeId32) -> Self {
        BlockidUUID::VolumeId32(value)
    }
}

impl fmt::Display for BlockidUUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(t) => write!(f, "{t}"),
            Self::VolumeId32(t) => write!(f, "{t}"),
        }
    }
}

/// What kind of thing a prober recognises. Informational only.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum UsageType {
    Filesystem,
    Raid,
    Crypto,
    Other(&'static str),
}

impl fmt::Display for UsageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filesystem => write!(f, "filesystem"),
            Self::Raid => write!(f, "raid"),
            Self::Crypto => write!(f, "crypto"),
            Self::Other(t) => write!(f, "{t}"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum BlockidVersion {
    /// ext superblock `s_rev_level` and `s_minor_rev_level`.
    Revision { major: u32, minor: u16 },
    Fat12,
    Fat16,
    Fat32,
}

impl fmt::Display for BlockidVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Revision { major, minor } => write!(f, "{major}.{minor}"),
            Self::Fat12 => write!(f, "FAT12"),
            Self::Fat16 => write!(f, "FAT16"),
            Self::Fat32 => write!(f, "FAT32"),
        }
    }
}

/// One candidate location for a superblock signature.
///
/// The absolute position within the probed region is
/// `(kboff << 10) + b_offset`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockidMagic {
    /// The magic value as a byte slice.
    pub magic: &'static [u8],
    /// Offset of the superblock in KiB.
    pub kboff: u64,
    /// Offset of the magic within the superblock.
    pub b_offset: u64,
}

impl BlockidMagic {
    #[inline]
    pub fn len(&self) -> usize {
        self.magic.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.magic.is_empty()
    }

    /// Byte offset of the magic from the start of the probed region.
    #[inline]
    pub fn offset(&self) -> u64 {
        (self.kboff << 10) + self.b_offset
    }
}
