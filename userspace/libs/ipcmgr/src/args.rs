//! Argument block codec
//!
//! Every ioctl argument block starts with a 32-bit `apiStatus` word followed by
//! module-specific fields. Helpers here read and write little-endian
//! primitives at byte offsets; message headers reuse them for their wire form.

/// Offset of the `apiStatus` word in every argument block
pub const API_STATUS_OFFSET: usize = 0;

/// Read a u16 at `offset` in little-endian format
pub fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

/// Read a u32 at `offset` in little-endian format
pub fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Read an i32 at `offset` in little-endian format
pub fn read_i32(bytes: &[u8], offset: usize) -> Option<i32> {
    read_u32(bytes, offset).map(|v| v as i32)
}

/// Write a u16 at `offset` in little-endian format
pub fn write_u16(bytes: &mut [u8], offset: usize, value: u16) -> bool {
    match offset.checked_add(2).and_then(|end| bytes.get_mut(offset..end)) {
        Some(slot) => {
            slot.copy_from_slice(&value.to_le_bytes());
            true
        }
        None => false,
    }
}

/// Write a u32 at `offset` in little-endian format
pub fn write_u32(bytes: &mut [u8], offset: usize, value: u32) -> bool {
    match offset.checked_add(4).and_then(|end| bytes.get_mut(offset..end)) {
        Some(slot) => {
            slot.copy_from_slice(&value.to_le_bytes());
            true
        }
        None => false,
    }
}

/// Write an i32 at `offset` in little-endian format
pub fn write_i32(bytes: &mut [u8], offset: usize, value: i32) -> bool {
    write_u32(bytes, offset, value as u32)
}

/// Read the `apiStatus` word of an argument block
pub fn api_status(args: &[u8]) -> Option<i32> {
    read_i32(args, API_STATUS_OFFSET)
}

/// Overwrite the `apiStatus` word of an argument block
pub fn set_api_status(args: &mut [u8], status: i32) -> bool {
    write_i32(args, API_STATUS_OFFSET, status)
}
