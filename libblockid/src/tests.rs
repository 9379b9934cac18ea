use std::{fs, os::unix::fs::FileExt};

use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::{
    BlockType, BlockidError, BlockidUUID, BlockidVersion, Probe, SecType, UsageType, WipeError,
    default_chain,
    filesystems::{ext::ext_chain, vfat::vfat_chain, volume_id::VolumeId32},
    wipe_signature, wipe_signature_with,
};

const EXT_UUID: [u8; 16] = [
    0x3e, 0x6b, 0xe9, 0x77, 0x29, 0xa4, 0x4e, 0x05, 0x9b, 0x8a, 0x11, 0x5c, 0x0d, 0x22, 0x7f, 0x31,
];

/// Sparse image of `len` bytes with `chunks` written at their offsets.
fn image(len: u64, chunks: &[(u64, &[u8])]) -> NamedTempFile {
    let tmp = NamedTempFile::new().unwrap();
    tmp.as_file().set_len(len).unwrap();
    for (offset, data) in chunks {
        tmp.as_file().write_all_at(data, *offset).unwrap();
    }
    tmp
}

fn ext_superblock(compat: u32, incompat: u32, ro_compat: u32, flags: u32, label: &[u8]) -> Vec<u8> {
    let mut sb = vec![0u8; 1024];
    sb[0x04..0x08].copy_from_slice(&8u32.to_le_bytes());
    sb[0x38..0x3a].copy_from_slice(&[0x53, 0xEF]);
    sb[0x4c..0x50].copy_from_slice(&1u32.to_le_bytes());
    sb[0x5c..0x60].copy_from_slice(&compat.to_le_bytes());
    sb[0x60..0x64].copy_from_slice(&incompat.to_le_bytes());
    sb[0x64..0x68].copy_from_slice(&ro_compat.to_le_bytes());
    sb[0x68..0x78].copy_from_slice(&EXT_UUID);
    sb[0x78..0x78 + label.len()].copy_from_slice(label);
    sb[0xd0..0xe0].copy_from_slice(&[0x11; 16]);
    sb[0x160..0x164].copy_from_slice(&flags.to_le_bytes());
    sb
}

fn ext_image(compat: u32, incompat: u32, ro_compat: u32, flags: u32) -> NamedTempFile {
    let sb = ext_superblock(compat, incompat, ro_compat, flags, b"rootfs");
    image(8192, &[(0x400, &sb[..])])
}

fn probe_type(tmp: &NamedTempFile) -> Option<BlockType> {
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();
    default_chain().probe(&mut probe).unwrap();
    probe.block_type()
}

const FAT16_SECTORS: u16 = 20000;
/* reserved sector plus two 16 sector FATs */
const FAT16_ROOT_DIR: u64 = (1 + 2 * 16) * 512;

fn fat16_boot_sector(cluster_size: u8) -> Vec<u8> {
    let mut bs = vec![0u8; 512];
    bs[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    bs[3..11].copy_from_slice(b"mkfs.fat");
    bs[0x0b..0x0d].copy_from_slice(&512u16.to_le_bytes());
    bs[0x0d] = cluster_size;
    bs[0x0e..0x10].copy_from_slice(&1u16.to_le_bytes());
    bs[0x10] = 2;
    bs[0x11..0x13].copy_from_slice(&512u16.to_le_bytes());
    bs[0x13..0x15].copy_from_slice(&FAT16_SECTORS.to_le_bytes());
    bs[0x15] = 0xF8;
    bs[0x16..0x18].copy_from_slice(&16u16.to_le_bytes());
    bs[0x26] = 0x29;
    bs[0x27..0x2b].copy_from_slice(&[0x78, 0x56, 0x34, 0x12]);
    bs[0x2b..0x36].copy_from_slice(b"NO NAME    ");
    bs[0x36..0x3e].copy_from_slice(b"FAT16   ");
    bs[0x1fe..0x200].copy_from_slice(&[0x55, 0xAA]);
    bs
}

fn dir_entry(name: &[u8; 11], attr: u8) -> [u8; 32] {
    let mut entry = [0u8; 32];
    entry[..11].copy_from_slice(name);
    entry[11] = attr;
    entry
}

const FAT32_RESERVED: u64 = 32;
const FAT32_LENGTH: u32 = 600;
const FAT32_DATA: u64 = (FAT32_RESERVED + 2 * FAT32_LENGTH as u64) * 512;

fn fat32_boot_sector() -> Vec<u8> {
    let mut bs = vec![0u8; 512];
    bs[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
    bs[3..11].copy_from_slice(b"MSWIN4.1");
    bs[0x0b..0x0d].copy_from_slice(&512u16.to_le_bytes());
    bs[0x0d] = 1;
    bs[0x0e..0x10].copy_from_slice(&(FAT32_RESERVED as u16).to_le_bytes());
    bs[0x10] = 2;
    bs[0x15] = 0xF8;
    bs[0x20..0x24].copy_from_slice(&70000u32.to_le_bytes());
    bs[0x24..0x28].copy_from_slice(&FAT32_LENGTH.to_le_bytes());
    bs[0x2c..0x30].copy_from_slice(&2u32.to_le_bytes());
    bs[0x42] = 0x29;
    bs[0x43..0x47].copy_from_slice(&[0xEF, 0xBE, 0xAD, 0xDE]);
    bs[0x47..0x52].copy_from_slice(b"NO NAME    ");
    bs[0x52..0x5a].copy_from_slice(b"FAT32   ");
    bs[0x1fe..0x200].copy_from_slice(&[0x55, 0xAA]);
    bs
}

/// FAT entry for `cluster` pointing at `next`.
fn fat32_link(cluster: u64, next: u32) -> (u64, [u8; 4]) {
    (FAT32_RESERVED * 512 + cluster * 4, next.to_le_bytes())
}

#[test]
fn ext4_with_journal_and_extents() {
    let tmp = ext_image(0x4, 0x2 | 0x40, 0x1, 0);
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(default_chain().probe(&mut probe).unwrap());

    let fs = probe.as_filesystem().unwrap();
    assert_eq!(fs.block_type(), Some(BlockType::Ext4));
    assert_eq!(fs.usage(), Some(UsageType::Filesystem));
    assert_eq!(fs.label(), Some("rootfs"));
    assert_eq!(fs.sec_type(), Some(SecType::Ext2));
    assert_eq!(
        fs.uuid(),
        Some(BlockidUUID::Uuid(Uuid::from_bytes(EXT_UUID)))
    );
    assert_eq!(
        fs.ext_journal(),
        Some(BlockidUUID::Uuid(Uuid::from_bytes([0x11; 16])))
    );
    assert_eq!(fs.version().map(|v| v.to_string()), Some("1.0".to_string()));
    assert_eq!(fs.fs_block_size(), Some(1024));
    assert_eq!(fs.size(), Some(8 * 1024));
    assert_eq!(fs.sbmagic(), Some(&[0x53u8, 0xEF][..]));
    assert_eq!(fs.sbmagic_offset(), Some(0x438));
}

#[test]
fn journal_device_is_jbd() {
    let tmp = ext_image(0, 0x8, 0, 0);
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(default_chain().probe(&mut probe).unwrap());
    assert_eq!(probe.block_type(), Some(BlockType::Jbd));
    assert_eq!(
        probe.result().and_then(|r| r.usage),
        Some(UsageType::Other("jbd"))
    );
}

#[test]
fn journal_device_bit_overrides_ext4_features() {
    let tmp = ext_image(0x4, 0x2 | 0x40 | 0x8, 0x1, 0);
    assert_eq!(probe_type(&tmp), Some(BlockType::Jbd));

    let tmp = ext_image(0x4, 0x2 | 0x40 | 0x8, 0x1, 0x4);
    assert_eq!(probe_type(&tmp), Some(BlockType::Jbd));
}

#[test]
fn recover_without_journal_matches_nothing() {
    // ext2 rejects RECOVER, ext3 and ext4dev need a journal, and ext4 needs a
    // feature ext3 does not understand
    let tmp = ext_image(0, 0x2 | 0x4, 0x1, 0);
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(!default_chain().probe(&mut probe).unwrap());
    assert!(probe.result().is_none());
}

#[test]
fn plain_ext2() {
    let tmp = ext_image(0, 0x2, 0x1 | 0x2, 0);
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(ext_chain().probe(&mut probe).unwrap());
    let fs = probe.as_filesystem().unwrap();
    assert_eq!(fs.block_type(), Some(BlockType::Ext2));
    assert_eq!(fs.ext_journal(), None);
    assert_eq!(fs.sec_type(), None);
}

#[test]
fn ext3_needs_journal_only() {
    let tmp = ext_image(0x4, 0x2, 0x1, 0);
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(default_chain().probe(&mut probe).unwrap());
    let fs = probe.as_filesystem().unwrap();
    assert_eq!(fs.block_type(), Some(BlockType::Ext3));
    // HAS_JOURNAL lies outside the ext2 incompat set
    assert_eq!(fs.sec_type(), Some(SecType::Ext2));
}

#[test]
fn test_filesystem_flag_is_ext4dev() {
    let tmp = ext_image(0x4, 0x2 | 0x40, 0x1, 0x4);
    assert_eq!(probe_type(&tmp), Some(BlockType::Ext4Dev));
}

#[test]
fn empty_label_is_unset() {
    let sb = ext_superblock(0, 0x2, 0, 0, b"");
    let tmp = image(8192, &[(0x400, &sb[..])]);
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(default_chain().probe(&mut probe).unwrap());
    assert_eq!(probe.as_filesystem().unwrap().label(), None);
}

#[test]
fn blank_image_matches_nothing() {
    let tmp = image(64 * 1024, &[]);
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(!default_chain().probe(&mut probe).unwrap());
    assert!(probe.result().is_none());
    assert!(probe.as_filesystem().is_none());
}

#[test]
fn tiny_image_matches_nothing() {
    let tmp = image(100, &[]);
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert_eq!(probe.size(), 100);
    assert!(probe.is_regular_file());
    assert!(!default_chain().probe(&mut probe).unwrap());
}

#[test]
fn probes_inside_region() {
    let region = 1024 * 1024;
    let sb = ext_superblock(0x4, 0x2, 0x1, 0, b"inner");
    let tmp = image(region + 8192, &[(region + 0x400, &sb[..])]);

    let mut whole = Probe::from_filename(tmp.path(), 0).unwrap();
    assert!(!default_chain().probe(&mut whole).unwrap());

    let mut part = Probe::from_filename(tmp.path(), region).unwrap();
    assert_eq!(part.offset(), region);
    assert_eq!(part.size(), 8192);
    assert!(default_chain().probe(&mut part).unwrap());
    assert_eq!(part.block_type(), Some(BlockType::Ext3));
    assert_eq!(part.as_filesystem().unwrap().label(), Some("inner"));
}

#[test]
fn fat16_root_directory_label() {
    let bs = fat16_boot_sector(4);
    let deleted = dir_entry(b"\xE5LDLABEL   ", 0x08);
    let lfn = dir_entry(b"ALONGNAME  ", 0x0f);
    let label = dir_entry(b"MYDISK     ", 0x08);
    let tmp = image(
        u64::from(FAT16_SECTORS) * 512,
        &[
            (0, &bs[..]),
            (FAT16_ROOT_DIR, &deleted[..]),
            (FAT16_ROOT_DIR + 32, &lfn[..]),
            (FAT16_ROOT_DIR + 64, &label[..]),
        ],
    );
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(default_chain().probe(&mut probe).unwrap());

    let fs = probe.as_filesystem().unwrap();
    assert_eq!(fs.block_type(), Some(BlockType::Vfat));
    assert_eq!(fs.label(), Some("MYDISK"));
    assert_eq!(fs.version(), Some(BlockidVersion::Fat16));
    assert_eq!(fs.sec_type(), Some(SecType::Msdos));
    assert_eq!(
        fs.uuid(),
        Some(BlockidUUID::VolumeId32(VolumeId32::new([0x78, 0x56, 0x34, 0x12])))
    );
    assert_eq!(fs.uuid().unwrap().to_string(), "1234-5678");
    assert_eq!(fs.creator(), Some("mkfs.fat"));
    assert_eq!(fs.size(), Some(u64::from(FAT16_SECTORS) * 512));
}

#[test]
fn fat16_label_scan_stops_at_end_marker() {
    let bs = fat16_boot_sector(4);
    let label = dir_entry(b"HIDDEN     ", 0x08);
    let tmp = image(
        u64::from(FAT16_SECTORS) * 512,
        &[(0, &bs[..]), (FAT16_ROOT_DIR + 32, &label[..])],
    );
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(vfat_chain().probe(&mut probe).unwrap());
    assert_eq!(probe.as_filesystem().unwrap().label(), None);
}

#[test]
fn fat16_serial_needs_extended_boot_signature() {
    let mut bs = fat16_boot_sector(4);
    bs[0x26] = 0;
    let tmp = image(u64::from(FAT16_SECTORS) * 512, &[(0, &bs[..])]);
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(default_chain().probe(&mut probe).unwrap());
    let fs = probe.as_filesystem().unwrap();
    assert_eq!(fs.block_type(), Some(BlockType::Vfat));
    assert_eq!(fs.uuid(), None);

    bs[0x26] = 0x28;
    let tmp = image(u64::from(FAT16_SECTORS) * 512, &[(0, &bs[..])]);
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(default_chain().probe(&mut probe).unwrap());
    assert_eq!(
        probe.as_filesystem().unwrap().uuid().map(|u| u.to_string()),
        Some("1234-5678".to_string())
    );
}

#[test]
fn fat_label_leading_0x05_reads_as_0xe5() {
    let bs = fat16_boot_sector(4);
    let label = dir_entry(b"\x05BC        ", 0x08);
    let tmp = image(
        u64::from(FAT16_SECTORS) * 512,
        &[(0, &bs[..]), (FAT16_ROOT_DIR, &label[..])],
    );
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(default_chain().probe(&mut probe).unwrap());
    // 0xE5 alone is not UTF-8
    assert_eq!(probe.as_filesystem().unwrap().label(), Some("\u{FFFD}BC"));
}

#[test]
fn wipe_with_ext_chain_only() {
    let tmp = ext_image(0x4, 0x2 | 0x40, 0x1, 0);

    let wiped = wipe_signature_with(tmp.path(), 0, &ext_chain()).unwrap();
    assert_eq!(wiped.btype, BlockType::Ext4);
    assert_eq!(wiped.offset, 0x438);
    assert_eq!(&fs::read(tmp.path()).unwrap()[0x438..0x43a], &[0, 0]);
}

#[test]
fn fat_cluster_size_must_be_power_of_two() {
    let bs = fat16_boot_sector(3);
    let tmp = image(u64::from(FAT16_SECTORS) * 512, &[(0, &bs[..])]);

    assert_eq!(probe_type(&tmp), None);
}

#[test]
fn fat32_label_follows_cluster_chain() {
    let bs = fat32_boot_sector();
    let (link_off, link) = fat32_link(2, 3);
    let label = dir_entry(b"DATA32     ", 0x08);
    let tmp = image(
        70000 * 512,
        &[(0, &bs[..]), (link_off, &link[..]), (FAT32_DATA + 512, &label[..])],
    );
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(default_chain().probe(&mut probe).unwrap());

    let fs = probe.as_filesystem().unwrap();
    assert_eq!(fs.block_type(), Some(BlockType::Vfat));
    assert_eq!(fs.version(), Some(BlockidVersion::Fat32));
    assert_eq!(fs.label(), Some("DATA32"));
    assert_eq!(fs.sec_type(), None);
    assert_eq!(fs.uuid().unwrap().to_string(), "DEAD-BEEF");
    assert_eq!(fs.sbmagic(), Some(&b"FAT32   "[..]));
}

#[test]
fn fat32_cyclic_chain_terminates() {
    let bs = fat32_boot_sector();
    let (link_off, link) = fat32_link(2, 2);
    let tmp = image(70000 * 512, &[(0, &bs[..]), (link_off, &link[..])]);
    let mut probe = Probe::from_filename(tmp.path(), 0).unwrap();

    assert!(default_chain().probe(&mut probe).unwrap());

    let fs = probe.as_filesystem().unwrap();
    assert_eq!(fs.version(), Some(BlockidVersion::Fat32));
    assert_eq!(fs.label(), None);
}

#[test]
fn wipe_ext3_zeroes_only_the_magic() {
    let tmp = ext_image(0x4, 0x2, 0x1, 0);
    let before = fs::read(tmp.path()).unwrap();

    let wiped = wipe_signature(tmp.path()).unwrap();
    assert_eq!(wiped.btype, BlockType::Ext3);
    assert_eq!(wiped.offset, 0x438);
    assert_eq!(wiped.len, 2);

    let after = fs::read(tmp.path()).unwrap();
    assert_eq!(before.len(), after.len());
    assert_eq!(&after[0x438..0x43a], &[0, 0]);
    for (i, (b, a)) in before.iter().zip(after.iter()).enumerate() {
        if !(0x438..0x43a).contains(&i) {
            assert_eq!(b, a, "byte {i:#x} changed");
        }
    }

    assert_eq!(probe_type(&tmp), None);
}

#[test]
fn wipe_inside_region() {
    let region = 64 * 1024;
    let sb = ext_superblock(0, 0x8, 0, 0, b"");
    let tmp = image(region + 8192, &[(region + 0x400, &sb[..])]);

    let wiped = wipe_signature_with(tmp.path(), region, &default_chain()).unwrap();
    assert_eq!(wiped.btype, BlockType::Jbd);
    assert_eq!(wiped.offset, region + 0x438);

    let after = fs::read(tmp.path()).unwrap();
    let magic = (region + 0x438) as usize;
    assert_eq!(&after[magic..magic + 2], &[0, 0]);
}

#[test]
fn wipe_fat_is_not_implemented() {
    let bs = fat16_boot_sector(4);
    let tmp = image(u64::from(FAT16_SECTORS) * 512, &[(0, &bs[..])]);
    let before = fs::read(tmp.path()).unwrap();

    let err = wipe_signature(tmp.path()).unwrap_err();
    assert!(matches!(
        err,
        BlockidError::WipeError(WipeError::NotImplemented(BlockType::Vfat))
    ));
    assert_eq!(fs::read(tmp.path()).unwrap(), before);
}

#[test]
fn wipe_unknown_names_the_device() {
    let tmp = image(8192, &[]);

    let err = wipe_signature(tmp.path()).unwrap_err();
    match err {
        BlockidError::WipeError(WipeError::UnknownFilesystem(name)) => {
            assert_eq!(name, tmp.path().display().to_string());
        }
        other => panic!("unexpected error: {other}"),
    }
}
