use std::os::fd::AsFd;

use rustix::{
    io,
    ioctl::{Getter, Opcode, ioctl},
};

/* _IO(0x12, 104) */
const BLKSSZGET: Opcode = 0x1268;
/* _IOR(0x12, 114, size_t) */
#[cfg(target_pointer_width = "64")]
const BLKGETSIZE64: Opcode = 0x8008_1272;
#[cfg(target_pointer_width = "32")]
const BLKGETSIZE64: Opcode = 0x8004_1272;

/// Logical sector size of a block device.
#[inline]
pub fn logical_block_size<Fd: AsFd>(fd: Fd) -> io::Result<u32> {
    unsafe {
        let ctl = Getter::<{ BLKSSZGET }, u32>::new();
        ioctl(fd, ctl)
    }
}

/// Size in bytes of a block device.
#[inline]
pub fn device_size_bytes<Fd: AsFd>(fd: Fd) -> io::Result<u64> {
    unsafe {
        let ctl = Getter::<{ BLKGETSIZE64 }, u64>::new();
        ioctl(fd, ctl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /* asm-generic _IOC layout: dir << 30 | size << 16 | type << 8 | nr */
    fn ioc(dir: u64, size: usize, nr: u64) -> u64 {
        (dir << 30) | ((size as u64) << 16) | (0x12 << 8) | nr
    }

    #[test]
    fn opcodes_match_size_t() {
        assert_eq!(BLKSSZGET as u64, ioc(0, 0, 104));
        assert_eq!(BLKGETSIZE64 as u64, ioc(2, size_of::<usize>(), 114));
    }
}
