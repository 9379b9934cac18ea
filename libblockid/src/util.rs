use std::io::{Cursor, Error as IoError, ErrorKind, Read, Seek, SeekFrom};

pub fn is_power_2(num: u64) -> bool {
    return num != 0 && ((num & (num - 1)) == 0);
}

/// Decode bytes up to the first NUL as lossy UTF-8.
pub fn decode_utf8_nul_terminated(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());

    return String::from_utf8_lossy(&bytes[..end]).to_string();
}

/// Decode a space padded on-disk name, dropping trailing space, tab and
/// newline.
pub fn decode_padded_name(bytes: &[u8]) -> String {
    return String::from_utf8_lossy(bytes)
        .trim_end_matches([' ', '\t', '\n'])
        .to_string();
}

/// Read a fixed size byte array from a superblock cursor.
pub(crate) fn read_array<const S: usize>(cur: &mut Cursor<&[u8]>) -> Result<[u8; S], IoError> {
    let mut buffer = [0u8; S];
    cur.read_exact(&mut buffer)?;

    return Ok(buffer);
}

/// Skip `len` bytes of a superblock cursor, failing if that runs past the
/// end of the buffer.
pub(crate) fn skip(cur: &mut Cursor<&[u8]>, len: u64) -> Result<(), IoError> {
    let end = cur.position() + len;
    if end > cur.get_ref().len() as u64 {
        return Err(ErrorKind::UnexpectedEof.into());
    }
    cur.seek(SeekFrom::Start(end))?;

    return Ok(());
}
