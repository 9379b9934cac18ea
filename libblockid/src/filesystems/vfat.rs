use std::io::{Cursor, Error as IoError};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::{
    BlockidError,
    chain::{Chain, Prober},
    filesystems::{FsError, volume_id::VolumeId32},
    probe::{
        BlockType, BlockidMagic, BlockidUUID, BlockidVersion, FilesystemResult, Probe, SecType,
        UsageType,
    },
    util::{decode_padded_name, is_power_2, read_array, skip},
};

#[derive(Debug, Error)]
pub enum FatError {
    #[error("I/O operation failed: {0}")]
    IoError(#[from] IoError),
}

pub const VFAT_PROBER: Prober = Prober {
    name: "vfat",
    btype: BlockType::Vfat,
    usage: UsageType::Filesystem,
    minsz: Some(FAT_SECTOR_SIZE as u64),
    probe_fn: |probe, magic| {
        probe_vfat(probe, magic)
            .map_err(FsError::from)
            .map_err(BlockidError::from)
    },
    magics: &[
        BlockidMagic {
            magic: b"MSWIN",
            kboff: 0,
            b_offset: 0x52,
        },
        BlockidMagic {
            magic: b"FAT32   ",
            kboff: 0,
            b_offset: 0x52,
        },
        BlockidMagic {
            magic: b"MSDOS",
            kboff: 0,
            b_offset: 0x36,
        },
        BlockidMagic {
            magic: b"FAT16   ",
            kboff: 0,
            b_offset: 0x36,
        },
        BlockidMagic {
            magic: b"FAT12   ",
            kboff: 0,
            b_offset: 0x36,
        },
        BlockidMagic {
            magic: b"FAT     ",
            kboff: 0,
            b_offset: 0x36,
        },
        /* x86 short and near jump opcodes */
        BlockidMagic {
            magic: &[0xEB],
            kboff: 0,
            b_offset: 0,
        },
        BlockidMagic {
            magic: &[0xE9],
            kboff: 0,
            b_offset: 0,
        },
        BlockidMagic {
            magic: &[0x55, 0xAA],
            kboff: 0,
            b_offset: 0x1fe,
        },
    ],
};

pub fn vfat_chain() -> Chain {
    Chain::new(vec![VFAT_PROBER])
}

const FAT_SECTOR_SIZE: usize = 512;
const FAT_DIR_ENTRY_SIZE: u64 = 32;

const FAT12_MAX: u64 = 0xFF4;
const FAT16_MAX: u64 = 0xFFF4;
const FAT32_MAX: u64 = 0x0FFFFFF6;

/* bad cluster marker and end of chain */
const FAT32_CHAIN_END: u32 = 0x0FFFFFF7;
const FAT32_ENTRY_MASK: u32 = 0x0FFFFFFF;
const FAT32_MAX_HOPS: u32 = 100;

const FAT_ENTRY_FREE: u8 = 0xE5;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct FatAttr: u8 {
        const FAT_ATTR_READ_ONLY = 0x01;
        const FAT_ATTR_HIDDEN = 0x02;
        const FAT_ATTR_SYSTEM = 0x04;
        const FAT_ATTR_VOLUME_ID = 0x08;
        const FAT_ATTR_DIR = 0x10;
        const FAT_ATTR_ARCHIVE = 0x20;
    }
}

const FAT_ATTR_LONG_NAME: FatAttr = FatAttr::FAT_ATTR_READ_ONLY
    .union(FatAttr::FAT_ATTR_HIDDEN)
    .union(FatAttr::FAT_ATTR_SYSTEM)
    .union(FatAttr::FAT_ATTR_VOLUME_ID);
const FAT_ATTR_MASK: FatAttr = FatAttr::all();

/// BIOS parameter block fields shared by every FAT width (0x00..0x24).
#[derive(Debug, Clone, Copy)]
pub struct FatBpb {
    pub ignored: [u8; 3],
    pub sysid: [u8; 8],
    pub sector_size: u16,
    pub cluster_size: u8,
    pub reserved: u16,
    pub fats: u8,
    pub dir_entries: u16,
    /* 0 for volumes that need total_sect */
    pub sectors: u16,
    pub media: u8,
    /* sectors per FAT, 0 on FAT32 */
    pub fat_length: u16,
    pub secs_track: u16,
    pub heads: u16,
    pub hidden: u32,
    pub total_sect: u32,
}

/// FAT12/16 view of the boot sector.
#[derive(Debug, Clone, Copy)]
pub struct MsDosSuperBlock {
    pub bpb: FatBpb,
    pub drive_number: u8,
    pub boot_flags: u8,
    pub ext_boot_sign: u8,
    pub serno: [u8; 4],
    pub label: [u8; 11],
    pub magic: [u8; 8],
    pub pmagic: [u8; 2],
}

/// FAT32 view of the boot sector.
#[derive(Debug, Clone, Copy)]
pub struct VFatSuperBlock {
    pub bpb: FatBpb,
    pub fat32_length: u32,
    pub flags: u16,
    pub version: u16,
    pub root_cluster: u32,
    pub fsinfo_sector: u16,
    pub backup_boot: u16,
    pub drive_number: u8,
    pub boot_flags: u8,
    /* 0x28 without label and magic, 0x29 with */
    pub ext_boot_sign: u8,
    pub serno: [u8; 4],
    pub label: [u8; 11],
    pub magic: [u8; 8],
    pub pmagic: [u8; 2],
}

#[derive(Debug, Clone, Copy)]
pub struct VfatDirEntry {
    pub name: [u8; 11],
    pub attr: FatAttr,
    pub time_creat: u16,
    pub date_creat: u16,
    pub time_acc: u16,
    pub date_acc: u16,
    pub cluster_high: u16,
    pub time_write: u16,
    pub date_write: u16,
    pub cluster_low: u16,
    pub size: u32,
}

impl FatBpb {
    fn parse(cur: &mut Cursor<&[u8]>) -> Result<Self, IoError> {
        Ok(Self {
            ignored: read_array::<3>(cur)?,
            sysid: read_array::<8>(cur)?,
            sector_size: cur.read_u16::<LittleEndian>()?,
            cluster_size: cur.read_u8()?,
            reserved: cur.read_u16::<LittleEndian>()?,
            fats: cur.read_u8()?,
            dir_entries: cur.read_u16::<LittleEndian>()?,
            sectors: cur.read_u16::<LittleEndian>()?,
            media: cur.read_u8()?,
            fat_length: cur.read_u16::<LittleEndian>()?,
            secs_track: cur.read_u16::<LittleEndian>()?,
            heads: cur.read_u16::<LittleEndian>()?,
            hidden: cur.read_u32::<LittleEndian>()?,
            total_sect: cur.read_u32::<LittleEndian>()?,
        })
    }

    fn sect_count(&self) -> u64 {
        if self.sectors == 0 {
            u64::from(self.total_sect)
        } else {
            u64::from(self.sectors)
        }
    }
}

impl MsDosSuperBlock {
    fn parse(raw: &[u8], bpb: FatBpb) -> Result<Self, IoError> {
        let mut cur = Cursor::new(raw);
        skip(&mut cur, 0x24)?;

        let drive_number = cur.read_u8()?;
        let boot_flags = cur.read_u8()?;
        let ext_boot_sign = cur.read_u8()?;
        let serno = read_array::<4>(&mut cur)?;
        let label = read_array::<11>(&mut cur)?;
        let magic = read_array::<8>(&mut cur)?;
        skip(&mut cur, 0x1fe - 0x3e)?;
        let pmagic = read_array::<2>(&mut cur)?;

        Ok(Self {
            bpb,
            drive_number,
            boot_flags,
            ext_boot_sign,
            serno,
            label,
            magic,
            pmagic,
        })
    }
}

impl VFatSuperBlock {
    fn parse(raw: &[u8], bpb: FatBpb) -> Result<Self, IoError> {
        let mut cur = Cursor::new(raw);
        skip(&mut cur, 0x24)?;

        let fat32_length = cur.read_u32::<LittleEndian>()?;
        let flags = cur.read_u16::<LittleEndian>()?;
        let version = cur.read_u16::<LittleEndian>()?;
        let root_cluster = cur.read_u32::<LittleEndian>()?;
        let fsinfo_sector = cur.read_u16::<LittleEndian>()?;
        let backup_boot = cur.read_u16::<LittleEndian>()?;
        // 0x34: reserved
        skip(&mut cur, 12)?;
        let drive_number = cur.read_u8()?;
        let boot_flags = cur.read_u8()?;
        let ext_boot_sign = cur.read_u8()?;
        let serno = read_array::<4>(&mut cur)?;
        let label = read_array::<11>(&mut cur)?;
        let magic = read_array::<8>(&mut cur)?;
        skip(&mut cur, 0x1fe - 0x5a)?;
        let pmagic = read_array::<2>(&mut cur)?;

        Ok(Self {
            bpb,
            fat32_length,
            flags,
            version,
            root_cluster,
            fsinfo_sector,
            backup_boot,
            drive_number,
            boot_flags,
            ext_boot_sign,
            serno,
            label,
            magic,
            pmagic,
        })
    }
}

impl VfatDirEntry {
    fn parse(raw: &[u8]) -> Result<Self, IoError> {
        let mut cur = Cursor::new(raw);

        Ok(Self {
            name: read_array::<11>(&mut cur)?,
            attr: FatAttr::from_bits_retain(cur.read_u8()?),
            time_creat: cur.read_u16::<LittleEndian>()?,
            date_creat: cur.read_u16::<LittleEndian>()?,
            time_acc: cur.read_u16::<LittleEndian>()?,
            date_acc: cur.read_u16::<LittleEndian>()?,
            cluster_high: cur.read_u16::<LittleEndian>()?,
            time_write: cur.read_u16::<LittleEndian>()?,
            date_write: cur.read_u16::<LittleEndian>()?,
            cluster_low: cur.read_u16::<LittleEndian>()?,
            size: cur.read_u32::<LittleEndian>()?,
        })
    }

    fn is_volume_label(&self) -> bool {
        self.attr.contains(FatAttr::FAT_ATTR_VOLUME_ID) && !self.attr.contains(FatAttr::FAT_ATTR_DIR)
    }
}

/// Parse both views of the boot sector from the same 512 bytes.
pub fn read_fat_superblocks(raw: &[u8]) -> Result<(MsDosSuperBlock, VFatSuperBlock), IoError> {
    let bpb = FatBpb::parse(&mut Cursor::new(raw))?;

    Ok((
        MsDosSuperBlock::parse(raw, bpb)?,
        VFatSuperBlock::parse(raw, bpb)?,
    ))
}

/// Sectors taken by all FAT copies.
pub fn get_fat_size(ms: &MsDosSuperBlock, vs: &VFatSuperBlock) -> u64 {
    let fat_length = if ms.bpb.fat_length == 0 {
        u64::from(vs.fat32_length)
    } else {
        u64::from(ms.bpb.fat_length)
    };

    return fat_length * u64::from(ms.bpb.fats);
}

/// Data clusters described by the BPB, `None` when the geometry does not add
/// up.
pub fn get_cluster_count(ms: &MsDosSuperBlock, vs: &VFatSuperBlock) -> Option<u64> {
    let sector_size = u64::from(ms.bpb.sector_size);
    let cluster_size = u64::from(ms.bpb.cluster_size);
    if sector_size == 0 || cluster_size == 0 {
        return None;
    }

    let dir_size = (u64::from(ms.bpb.dir_entries) * FAT_DIR_ENTRY_SIZE + (sector_size - 1)) / sector_size;
    let overhead = u64::from(ms.bpb.reserved) + get_fat_size(ms, vs) + dir_size;

    return ms
        .bpb
        .sect_count()
        .checked_sub(overhead)
        .map(|data| data / cluster_size);
}

pub fn valid_fat(ms: &MsDosSuperBlock, vs: &VFatSuperBlock, mag: &BlockidMagic) -> bool {
    if mag.len() <= 2 {
        /* Old floppies have a valid MBR signature */
        if ms.pmagic != [0x55, 0xAA] {
            log::debug!("valid_fat - no boot signature behind a short magic");
            return false;
        }

        /* OS/2 and DFSee write FAT-like pseudo headers on JFS and HPFS */
        if &ms.magic == b"JFS     " || &ms.magic == b"HPFS    " {
            log::debug!("valid_fat - JFS/HPFS pseudo superblock");
            return false;
        }
    }

    /* Linux kernel expects at least 1 FAT table */
    if ms.bpb.fats == 0 {
        log::debug!("valid_fat - no FAT tables");
        return false;
    }
    if ms.bpb.reserved == 0 {
        log::debug!("valid_fat - no reserved sectors");
        return false;
    }

    if !(0xF8 <= ms.bpb.media || ms.bpb.media == 0xF0) {
        log::debug!("valid_fat - media descriptor {:#x}", ms.bpb.media);
        return false;
    }

    if !is_power_2(ms.bpb.cluster_size.into()) {
        log::debug!("valid_fat - cluster size {} is not ^2", ms.bpb.cluster_size);
        return false;
    }

    let sector_size = ms.bpb.sector_size;
    if !is_power_2(sector_size.into()) || !(512..=4096).contains(&sector_size) {
        log::debug!("valid_fat - sector size {sector_size}");
        return false;
    }

    let Some(cluster_count) = get_cluster_count(ms, vs) else {
        log::debug!("valid_fat - metadata larger than the volume");
        return false;
    };

    let max_count = if ms.bpb.fat_length == 0 && vs.fat32_length != 0 {
        FAT32_MAX
    } else if cluster_count > FAT12_MAX {
        FAT16_MAX
    } else {
        FAT12_MAX
    };

    if cluster_count > max_count {
        log::debug!("valid_fat - {cluster_count} clusters, max {max_count}");
        return false;
    }

    return true;
}

/// Scan `entries` directory entries starting at `start` for the volume label.
pub fn search_fat_label(
    probe: &mut Probe,
    start: u64,
    entries: u64,
) -> Result<Option<String>, FatError> {
    for i in 0..entries {
        let offset = start + i * FAT_DIR_ENTRY_SIZE;

        if !probe.fits(offset, FAT_DIR_ENTRY_SIZE) {
            log::debug!("search_fat_label - directory runs past the end of the region");
            break;
        }

        let raw: [u8; FAT_DIR_ENTRY_SIZE as usize] = probe.read_exact_at(offset)?;
        let entry = VfatDirEntry::parse(&raw)?;

        if entry.name[0] == 0x00 {
            break;
        }

        if entry.name[0] == FAT_ENTRY_FREE
            || entry.cluster_high != 0
            || entry.cluster_low != 0
            || entry.attr.intersection(FAT_ATTR_MASK) == FAT_ATTR_LONG_NAME
        {
            continue;
        }

        if entry.is_volume_label() {
            let mut name = entry.name;
            /* 0x05 stands in for a leading 0xE5 */
            if name[0] == 0x05 {
                name[0] = FAT_ENTRY_FREE;
            }
            return Ok(Some(decode_padded_name(&name)));
        }
    }

    return Ok(None);
}

fn fat32_search_label(
    probe: &mut Probe,
    ms: &MsDosSuperBlock,
    vs: &VFatSuperBlock,
    fat_size: u64,
) -> Result<Option<String>, FatError> {
    let sector_size = u64::from(ms.bpb.sector_size);
    let cluster_size = u64::from(vs.bpb.cluster_size);
    let reserved = u64::from(ms.bpb.reserved);

    let start_data_sect = reserved + fat_size;
    let entries = u64::from(vs.fat32_length) * sector_size / 4;
    let count = cluster_size * sector_size / FAT_DIR_ENTRY_SIZE;

    let mut next = vs.root_cluster;
    let mut maxloop = FAT32_MAX_HOPS;

    while next >= 2 && next < FAT32_CHAIN_END && u64::from(next) < entries {
        if maxloop == 0 {
            log::warn!("fat32_search_label - cluster chain longer than {FAT32_MAX_HOPS} hops");
            break;
        }
        maxloop -= 1;

        let next_sect_off = (u64::from(next) - 2) * cluster_size;
        let next_off = (start_data_sect + next_sect_off) * sector_size;

        log::debug!("fat32_search_label - cluster {next} at {next_off:#x}");

        if let Some(label) = search_fat_label(probe, next_off, count)? {
            return Ok(Some(label));
        }

        let fat_entry_off = reserved * sector_size + u64::from(next) * 4;
        if !probe.fits(fat_entry_off, 4) {
            break;
        }

        let buf: [u8; 4] = probe.read_exact_at(fat_entry_off)?;
        next = u32::from_le_bytes(buf) & FAT32_ENTRY_MASK;
    }

    return Ok(None);
}

pub fn probe_vfat(probe: &mut Probe, mag: BlockidMagic) -> Result<bool, FatError> {
    let raw: [u8; FAT_SECTOR_SIZE] = probe.read_exact_at(0)?;
    let (ms, vs) = read_fat_superblocks(&raw)?;

    if !valid_fat(&ms, &vs, &mag) {
        return Ok(false);
    }

    let Some(cluster_count) = get_cluster_count(&ms, &vs) else {
        return Ok(false);
    };
    let fat_size = get_fat_size(&ms, &vs);
    let sector_size = u64::from(ms.bpb.sector_size);

    let (label, uuid, version, sec_type) = if ms.bpb.fat_length != 0 {
        let root_start = (u64::from(ms.bpb.reserved) + fat_size) * sector_size;
        let label = search_fat_label(probe, root_start, ms.bpb.dir_entries.into())?;

        let version = if cluster_count < FAT12_MAX {
            BlockidVersion::Fat12
        } else {
            BlockidVersion::Fat16
        };

        /* DOS 3.x boot sectors end before the serial number */
        let uuid = if ms.ext_boot_sign == 0x28 || ms.ext_boot_sign == 0x29 {
            Some(VolumeId32::new(ms.serno))
        } else {
            None
        };

        (label, uuid, version, Some(SecType::Msdos))
    } else if vs.fat32_length != 0 {
        let label = fat32_search_label(probe, &ms, &vs, fat_size)?;

        (
            label,
            Some(VolumeId32::new(vs.serno)),
            BlockidVersion::Fat32,
            None,
        )
    } else {
        return Ok(false);
    };

    let creator = decode_padded_name(&ms.bpb.sysid);

    probe.push_result(FilesystemResult {
        sec_type,
        uuid: uuid.map(BlockidUUID::VolumeId32),
        label,
        creator: if creator.is_empty() { None } else { Some(creator) },
        size: Some(sector_size * ms.bpb.sect_count()),
        fs_block_size: Some(u64::from(ms.bpb.cluster_size) * sector_size),
        block_size: Some(sector_size),
        version: Some(version),
        sbmagic: Some(mag.magic),
        sbmagic_offset: Some(mag.offset()),
        ..Default::default()
    });

    return Ok(true);
}
