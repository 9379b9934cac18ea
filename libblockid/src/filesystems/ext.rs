use std::io::{Cursor, Error as IoError};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    BlockidError,
    chain::{Chain, Prober},
    filesystems::FsError,
    probe::{
        BlockType, BlockidMagic, BlockidUUID, BlockidVersion, FilesystemResult, Probe, SecType,
        UsageType,
    },
    util::{decode_utf8_nul_terminated, read_array, skip},
};

/*
https://www.kernel.org/doc/html/latest/filesystems/ext4/globals.html
*/

#[derive(Debug, Error)]
pub enum ExtError {
    #[error("I/O operation failed: {0}")]
    IoError(#[from] IoError),
}

/// Byte offset of the superblock from the start of the region.
pub const EXT_SB_OFFSET: u64 = 0x400;
const EXT_SB_SIZE: usize = 1024;
/* 64 MiB blocks, far beyond anything mke2fs produces */
const EXT_MAX_LOG_BLOCK_SIZE: u32 = 16;

pub const EXT_MAGICS: &[BlockidMagic] = &[BlockidMagic {
    magic: &[0x53, 0xEF],
    kboff: EXT_SB_OFFSET >> 10,
    b_offset: 0x38,
}];

const EXT_MINSZ: Option<u64> = Some(EXT_SB_OFFSET + EXT_SB_SIZE as u64);

pub const JBD_PROBER: Prober = Prober {
    name: "jbd",
    btype: BlockType::Jbd,
    usage: UsageType::Other("jbd"),
    minsz: EXT_MINSZ,
    probe_fn: |probe, magic| {
        probe_jbd(probe, magic)
            .map_err(FsError::from)
            .map_err(BlockidError::from)
    },
    magics: EXT_MAGICS,
};

pub const EXT2_PROBER: Prober = Prober {
    name: "ext2",
    btype: BlockType::Ext2,
    usage: UsageType::Filesystem,
    minsz: EXT_MINSZ,
    probe_fn: |probe, magic| {
        probe_ext2(probe, magic)
            .map_err(FsError::from)
            .map_err(BlockidError::from)
    },
    magics: EXT_MAGICS,
};

pub const EXT3_PROBER: Prober = Prober {
    name: "ext3",
    btype: BlockType::Ext3,
    usage: UsageType::Filesystem,
    minsz: EXT_MINSZ,
    probe_fn: |probe, magic| {
        probe_ext3(probe, magic)
            .map_err(FsError::from)
            .map_err(BlockidError::from)
    },
    magics: EXT_MAGICS,
};

pub const EXT4_PROBER: Prober = Prober {
    name: "ext4",
    btype: BlockType::Ext4,
    usage: UsageType::Filesystem,
    minsz: EXT_MINSZ,
    probe_fn: |probe, magic| {
        probe_ext4(probe, magic)
            .map_err(FsError::from)
            .map_err(BlockidError::from)
    },
    magics: EXT_MAGICS,
};

pub const EXT4DEV_PROBER: Prober = Prober {
    name: "ext4dev",
    btype: BlockType::Ext4Dev,
    usage: UsageType::Filesystem,
    minsz: EXT_MINSZ,
    probe_fn: |probe, magic| {
        probe_ext4dev(probe, magic)
            .map_err(FsError::from)
            .map_err(BlockidError::from)
    },
    magics: EXT_MAGICS,
};

/// The ext family in the order its predicates depend on.
pub fn ext_chain() -> Chain {
    Chain::new(vec![
        JBD_PROBER,
        EXT2_PROBER,
        EXT3_PROBER,
        EXT4_PROBER,
        EXT4DEV_PROBER,
    ])
}

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct ExtFlags: u32 {
        const EXT2_FLAGS_TEST_FILESYS = 0x0004;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct FeatureCompat: u32 {
        const EXT3_FEATURE_COMPAT_HAS_JOURNAL = 0x0004;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct FeatureIncompat: u32 {
        const EXT2_FEATURE_INCOMPAT_FILETYPE         = 0x0002;
        const EXT3_FEATURE_INCOMPAT_RECOVER          = 0x0004;
        const EXT3_FEATURE_INCOMPAT_JOURNAL_DEV      = 0x0008;
        const EXT2_FEATURE_INCOMPAT_META_BG          = 0x0010;
        const EXT4_FEATURE_INCOMPAT_EXTENTS          = 0x0040;
        const EXT4_FEATURE_INCOMPAT_64BIT            = 0x0080;
        const EXT4_FEATURE_INCOMPAT_MMP              = 0x0100;
        const EXT4_FEATURE_INCOMPAT_FLEX_BG          = 0x0200;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct FeatureRoCompat: u32 {
        const EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER     = 0x0001;
        const EXT2_FEATURE_RO_COMPAT_LARGE_FILE       = 0x0002;
        const EXT2_FEATURE_RO_COMPAT_BTREE_DIR        = 0x0004;
        const EXT4_FEATURE_RO_COMPAT_HUGE_FILE        = 0x0008;
        const EXT4_FEATURE_RO_COMPAT_GDT_CSUM         = 0x0010;
        const EXT4_FEATURE_RO_COMPAT_DIR_NLINK        = 0x0020;
        const EXT4_FEATURE_RO_COMPAT_EXTRA_ISIZE      = 0x0040;
        const EXT4_FEATURE_RO_COMPAT_METADATA_CSUM    = 0x0400;
    }
}

pub const EXT2_FEATURE_RO_COMPAT_SUPP: FeatureRoCompat = FeatureRoCompat::EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER
    .union(FeatureRoCompat::EXT2_FEATURE_RO_COMPAT_LARGE_FILE)
    .union(FeatureRoCompat::EXT2_FEATURE_RO_COMPAT_BTREE_DIR);
pub const EXT2_FEATURE_INCOMPAT_SUPP: FeatureIncompat = FeatureIncompat::EXT2_FEATURE_INCOMPAT_FILETYPE
    .union(FeatureIncompat::EXT2_FEATURE_INCOMPAT_META_BG);
pub const EXT2_FEATURE_RO_COMPAT_UNSUPPORTED: FeatureRoCompat =
    FeatureRoCompat::from_bits_retain(!EXT2_FEATURE_RO_COMPAT_SUPP.bits());
pub const EXT2_FEATURE_INCOMPAT_UNSUPPORTED: FeatureIncompat =
    FeatureIncompat::from_bits_retain(!EXT2_FEATURE_INCOMPAT_SUPP.bits());

pub const EXT3_FEATURE_RO_COMPAT_SUPP: FeatureRoCompat = FeatureRoCompat::EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER
    .union(FeatureRoCompat::EXT2_FEATURE_RO_COMPAT_LARGE_FILE)
    .union(FeatureRoCompat::EXT2_FEATURE_RO_COMPAT_BTREE_DIR);
pub const EXT3_FEATURE_INCOMPAT_SUPP: FeatureIncompat = FeatureIncompat::EXT2_FEATURE_INCOMPAT_FILETYPE
    .union(FeatureIncompat::EXT3_FEATURE_INCOMPAT_RECOVER)
    .union(FeatureIncompat::EXT2_FEATURE_INCOMPAT_META_BG);
pub const EXT3_FEATURE_RO_COMPAT_UNSUPPORTED: FeatureRoCompat =
    FeatureRoCompat::from_bits_retain(!EXT3_FEATURE_RO_COMPAT_SUPP.bits());
pub const EXT3_FEATURE_INCOMPAT_UNSUPPORTED: FeatureIncompat =
    FeatureIncompat::from_bits_retain(!EXT3_FEATURE_INCOMPAT_SUPP.bits());

/// The parts of the ext2/3/4 superblock the probers look at.
///
/// Field offsets follow the on-disk layout; skipped regions are noted with
/// their offsets.
#[derive(Debug, Clone, Copy)]
pub struct Ext2SuperBlock {
    pub s_inodes_count: u32,
    pub s_blocks_count: u32,
    pub s_r_blocks_count: u32,
    pub s_free_blocks_count: u32,
    pub s_free_inodes_count: u32,
    pub s_first_data_block: u32,
    pub s_log_block_size: u32,
    pub s_magic: [u8; 2],
    pub s_state: u16,
    pub s_errors: u16,
    pub s_minor_rev_level: u16,
    pub s_lastcheck: u32,
    pub s_checkinterval: u32,
    pub s_creator_os: u32,
    pub s_rev_level: u32,
    pub s_def_resuid: u16,
    pub s_def_resgid: u16,
    pub s_first_ino: u32,
    pub s_inode_size: u16,
    pub s_block_group_nr: u16,
    pub s_feature_compat: FeatureCompat,
    pub s_feature_incompat: FeatureIncompat,
    pub s_feature_ro_compat: FeatureRoCompat,
    pub s_uuid: [u8; 16],
    pub s_volume_name: [u8; 16],
    pub s_journal_uuid: [u8; 16],
    pub s_journal_inum: u32,
    pub s_journal_dev: u32,
    pub s_last_orphan: u32,
    pub s_blocks_count_hi: u32,
    pub s_flags: ExtFlags,
}

impl Ext2SuperBlock {
    pub fn parse(raw: &[u8]) -> Result<Self, IoError> {
        let mut cur = Cursor::new(raw);

        let s_inodes_count = cur.read_u32::<LittleEndian>()?;
        let s_blocks_count = cur.read_u32::<LittleEndian>()?;
        let s_r_blocks_count = cur.read_u32::<LittleEndian>()?;
        let s_free_blocks_count = cur.read_u32::<LittleEndian>()?;
        let s_free_inodes_count = cur.read_u32::<LittleEndian>()?;
        let s_first_data_block = cur.read_u32::<LittleEndian>()?;
        let s_log_block_size = cur.read_u32::<LittleEndian>()?;
        // 0x1c: cluster size, group sizes, mount times and counts
        skip(&mut cur, 7 * 4)?;
        let s_magic = read_array::<2>(&mut cur)?;
        let s_state = cur.read_u16::<LittleEndian>()?;
        let s_errors = cur.read_u16::<LittleEndian>()?;
        let s_minor_rev_level = cur.read_u16::<LittleEndian>()?;
        let s_lastcheck = cur.read_u32::<LittleEndian>()?;
        let s_checkinterval = cur.read_u32::<LittleEndian>()?;
        let s_creator_os = cur.read_u32::<LittleEndian>()?;
        let s_rev_level = cur.read_u32::<LittleEndian>()?;
        let s_def_resuid = cur.read_u16::<LittleEndian>()?;
        let s_def_resgid = cur.read_u16::<LittleEndian>()?;
        let s_first_ino = cur.read_u32::<LittleEndian>()?;
        let s_inode_size = cur.read_u16::<LittleEndian>()?;
        let s_block_group_nr = cur.read_u16::<LittleEndian>()?;
        let s_feature_compat = FeatureCompat::from_bits_retain(cur.read_u32::<LittleEndian>()?);
        let s_feature_incompat =
            FeatureIncompat::from_bits_retain(cur.read_u32::<LittleEndian>()?);
        let s_feature_ro_compat =
            FeatureRoCompat::from_bits_retain(cur.read_u32::<LittleEndian>()?);
        let s_uuid = read_array::<16>(&mut cur)?;
        let s_volume_name = read_array::<16>(&mut cur)?;
        // 0x88: last mounted path, algorithm bitmap, preallocation, reserved gdt
        skip(&mut cur, 64 + 4 + 1 + 1 + 2)?;
        let s_journal_uuid = read_array::<16>(&mut cur)?;
        let s_journal_inum = cur.read_u32::<LittleEndian>()?;
        let s_journal_dev = cur.read_u32::<LittleEndian>()?;
        let s_last_orphan = cur.read_u32::<LittleEndian>()?;
        // 0xec: hash seed, hash version, journal backup, descriptor size,
        // mount options, first meta bg, mkfs time, journal block backup
        skip(&mut cur, 16 + 1 + 1 + 2 + 4 + 4 + 4 + 17 * 4)?;
        let s_blocks_count_hi = cur.read_u32::<LittleEndian>()?;
        // 0x154: reserved and free block counts (hi), extra isize
        skip(&mut cur, 4 + 4 + 2 + 2)?;
        let s_flags = ExtFlags::from_bits_retain(cur.read_u32::<LittleEndian>()?);

        Ok(Self {
            s_inodes_count,
            s_blocks_count,
            s_r_blocks_count,
            s_free_blocks_count,
            s_free_inodes_count,
            s_first_data_block,
            s_log_block_size,
            s_magic,
            s_state,
            s_errors,
            s_minor_rev_level,
            s_lastcheck,
            s_checkinterval,
            s_creator_os,
            s_rev_level,
            s_def_resuid,
            s_def_resgid,
            s_first_ino,
            s_inode_size,
            s_block_group_nr,
            s_feature_compat,
            s_feature_incompat,
            s_feature_ro_compat,
            s_uuid,
            s_volume_name,
            s_journal_uuid,
            s_journal_inum,
            s_journal_dev,
            s_last_orphan,
            s_blocks_count_hi,
            s_flags,
        })
    }

    fn has_journal(&self) -> bool {
        self.s_feature_compat
            .contains(FeatureCompat::EXT3_FEATURE_COMPAT_HAS_JOURNAL)
    }

    fn is_journal_dev(&self) -> bool {
        self.s_feature_incompat
            .contains(FeatureIncompat::EXT3_FEATURE_INCOMPAT_JOURNAL_DEV)
    }

    fn is_test_fs(&self) -> bool {
        self.s_flags.contains(ExtFlags::EXT2_FLAGS_TEST_FILESYS)
    }

    fn ext2_unsupported(&self) -> bool {
        self.s_feature_ro_compat
            .intersects(EXT2_FEATURE_RO_COMPAT_UNSUPPORTED)
            || self
                .s_feature_incompat
                .intersects(EXT2_FEATURE_INCOMPAT_UNSUPPORTED)
    }

    fn ext3_unsupported(&self) -> bool {
        self.s_feature_ro_compat
            .intersects(EXT3_FEATURE_RO_COMPAT_UNSUPPORTED)
            || self
                .s_feature_incompat
                .intersects(EXT3_FEATURE_INCOMPAT_UNSUPPORTED)
    }
}

fn ext_get_super(probe: &mut Probe) -> Result<Ext2SuperBlock, ExtError> {
    let raw: [u8; EXT_SB_SIZE] = probe.read_exact_at(EXT_SB_OFFSET)?;

    return Ok(Ext2SuperBlock::parse(&raw)?);
}

fn ext_get_info(probe: &mut Probe, ver: u8, es: &Ext2SuperBlock, magic: BlockidMagic) {
    let label = decode_utf8_nul_terminated(&es.s_volume_name);

    let ext_journal = if es.has_journal() {
        Some(BlockidUUID::Uuid(Uuid::from_bytes(es.s_journal_uuid)))
    } else {
        None
    };

    // compat word against the incompat mask, kept for output compatibility
    let sec_type = if ver != 2
        && es.s_feature_compat.bits() & EXT2_FEATURE_INCOMPAT_UNSUPPORTED.bits() != 0
    {
        Some(SecType::Ext2)
    } else {
        None
    };

    let blocks = u64::from(es.s_blocks_count)
        | if es
            .s_feature_incompat
            .contains(FeatureIncompat::EXT4_FEATURE_INCOMPAT_64BIT)
        {
            u64::from(es.s_blocks_count_hi) << 32
        } else {
            0
        };

    let fs_block_size = if es.s_log_block_size <= EXT_MAX_LOG_BLOCK_SIZE {
        Some(1024u64 << es.s_log_block_size)
    } else {
        None
    };

    probe.push_result(FilesystemResult {
        sec_type,
        uuid: Some(BlockidUUID::Uuid(Uuid::from_bytes(es.s_uuid))),
        ext_journal,
        label: if label.is_empty() { None } else { Some(label) },
        size: fs_block_size.and_then(|bs| bs.checked_mul(blocks)),
        fs_last_block: Some(blocks),
        fs_block_size,
        block_size: Some(probe.ssz()),
        version: Some(BlockidVersion::Revision {
            major: es.s_rev_level,
            minor: es.s_minor_rev_level,
        }),
        sbmagic: Some(magic.magic),
        sbmagic_offset: Some(magic.offset()),
        ..Default::default()
    });
}

/// External journal device.
pub fn probe_jbd(probe: &mut Probe, magic: BlockidMagic) -> Result<bool, ExtError> {
    let es = ext_get_super(probe)?;

    if !es.is_journal_dev() {
        return Ok(false);
    }

    ext_get_info(probe, 2, &es, magic);

    return Ok(true);
}

pub fn probe_ext2(probe: &mut Probe, magic: BlockidMagic) -> Result<bool, ExtError> {
    let es = ext_get_super(probe)?;

    /* do not claim ext3 and features ext2 doesn't understand */
    if es.has_journal() || es.ext2_unsupported() {
        return Ok(false);
    }

    ext_get_info(probe, 2, &es, magic);

    return Ok(true);
}

pub fn probe_ext3(probe: &mut Probe, magic: BlockidMagic) -> Result<bool, ExtError> {
    let es = ext_get_super(probe)?;

    if !es.has_journal() {
        return Ok(false);
    }

    /* features ext3 doesn't understand */
    if es.ext3_unsupported() {
        return Ok(false);
    }

    ext_get_info(probe, 3, &es, magic);

    return Ok(true);
}

pub fn probe_ext4(probe: &mut Probe, magic: BlockidMagic) -> Result<bool, ExtError> {
    let es = ext_get_super(probe)?;

    /* distinguish from jbd */
    if es.is_journal_dev() {
        return Ok(false);
    }

    /* nothing ext3 doesn't understand, so not ext4 */
    if !es.ext3_unsupported() {
        return Ok(false);
    }

    /* marked for in-development code, leave it to ext4dev */
    if es.is_test_fs() {
        return Ok(false);
    }

    ext_get_info(probe, 4, &es, magic);

    return Ok(true);
}

pub fn probe_ext4dev(probe: &mut Probe, magic: BlockidMagic) -> Result<bool, ExtError> {
    let es = ext_get_super(probe)?;

    if !es.has_journal() {
        return Ok(false);
    }

    if !es.is_test_fs() {
        return Ok(false);
    }

    ext_get_info(probe, 4, &es, magic);

    return Ok(true);
}
