use std::io::{self, Cursor, Read};

pub fn read_u16_le(cursor: &mut Cursor<&[u8]>) -> io::Result<u16> {
    if cursor.position() + 1 >= cursor.get_ref().len() as u64 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "End of buffer reached or not enough bytes for u16",
        ));
    }

    let mut buf = [0u8; 2];
    cursor.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32_le(cursor: &mut Cursor<&[u8]>) -> io::Result<u32> {
    if cursor.position() + 3 >= cursor.get_ref().len() as u64 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "End of buffer reached or not enough bytes for u32",
        ));
    }

    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read `count` consecutive little-endian halfwords.
pub fn read_u16_array(data: &[u8], count: usize) -> io::Result<Vec<u16>> {
    let mut cursor = Cursor::new(data);
    (0..count).map(|_| read_u16_le(&mut cursor)).collect()
}

pub fn push_u16_le(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn push_u32_le(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}
