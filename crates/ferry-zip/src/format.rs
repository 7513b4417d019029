//! Record signatures, fixed header sizes, and little-endian field helpers.

/// Sentinel stored in 32-bit size and offset fields when the ZIP64 extra holds the value.
pub const ZIP64_MAGIC: u64 = 0xFFFF_FFFF;

pub(crate) const LOCSIG: u32 = 0x0403_4b50;
pub(crate) const EXTSIG: u32 = 0x0807_4b50;
pub(crate) const CENSIG: u32 = 0x0201_4b50;
pub(crate) const ENDSIG: u32 = 0x0605_4b50;
pub(crate) const ZIP64_ENDSIG: u32 = 0x0606_4b50;
pub(crate) const ZIP64_LOCSIG: u32 = 0x0706_4b50;

pub(crate) const LOCHDR: usize = 30;
pub(crate) const EXTHDR: usize = 16;
pub(crate) const ZIP64_EXTHDR: usize = 24;
pub(crate) const ZIP64_ENDHDR: u64 = 56;

pub(crate) const ZIP64_EXTID: u16 = 0x0001;
pub(crate) const ZIP64_MAGICCOUNT: usize = 0xFFFF;

pub(crate) const FLAG_ENCRYPTED: u16 = 0x0001;
pub(crate) const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub(crate) const FLAG_UTF8: u16 = 0x0800;

pub(crate) const VERSION_STORED: u16 = 10;
pub(crate) const VERSION_DEFLATED: u16 = 20;
pub(crate) const VERSION_ZIP64: u16 = 45;

// Local header field offsets.
pub(crate) const LOCFLG: usize = 6;
pub(crate) const LOCHOW: usize = 8;
pub(crate) const LOCTIM: usize = 10;
pub(crate) const LOCCRC: usize = 14;
pub(crate) const LOCSIZ: usize = 18;
pub(crate) const LOCLEN: usize = 22;
pub(crate) const LOCNAM: usize = 26;
pub(crate) const LOCEXT: usize = 28;

pub(crate) fn get16(bytes: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([bytes[off], bytes[off + 1]])
}

pub(crate) fn get32(bytes: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

pub(crate) fn get64(bytes: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[off..off + 8]);
    u64::from_le_bytes(raw)
}

/// Saturate a 64-bit value into a 32-bit header field; saturation yields the ZIP64 sentinel.
pub(crate) fn clamp32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

pub(crate) fn clamp16(value: usize) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

/// Little-endian appenders for header assembly.
pub(crate) trait PutLe {
    fn put16(&mut self, value: u16);
    fn put32(&mut self, value: u32);
    fn put64(&mut self, value: u64);
}

impl PutLe for Vec<u8> {
    fn put16(&mut self, value: u16) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put32(&mut self, value: u32) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put64(&mut self, value: u64) {
        self.extend_from_slice(&value.to_le_bytes());
    }
}

/// Locate the ZIP64 extended-information block and return `(size, compressed_size)`.
///
/// Undersized or truncated blocks yield `None` so callers keep the 32-bit values.
pub(crate) fn zip64_sizes(extra: &[u8]) -> Option<(u64, u64)> {
    let mut off = 0;
    while off + 4 < extra.len() {
        let id = get16(extra, off);
        let size = usize::from(get16(extra, off + 2));
        off += 4;
        if id == ZIP64_EXTID {
            if size < 16 || off + size > extra.len() {
                return None;
            }
            return Some((get64(extra, off), get64(extra, off + 8)));
        }
        off += size;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip64_block_is_found_after_other_blocks() {
        let mut extra = Vec::new();
        extra.put16(0x5455);
        extra.put16(5);
        extra.extend_from_slice(&[1, 2, 3, 4, 5]);
        extra.put16(ZIP64_EXTID);
        extra.put16(16);
        extra.put64(5 << 30);
        extra.put64(7);
        assert_eq!(zip64_sizes(&extra), Some((5 << 30, 7)));
    }

    #[test]
    fn undersized_zip64_block_is_ignored() {
        let mut extra = Vec::new();
        extra.put16(ZIP64_EXTID);
        extra.put16(8);
        extra.put64(42);
        assert_eq!(zip64_sizes(&extra), None);
    }

    #[test]
    fn overrunning_zip64_block_is_ignored() {
        let mut extra = Vec::new();
        extra.put16(ZIP64_EXTID);
        extra.put16(16);
        extra.put64(42);
        assert_eq!(zip64_sizes(&extra), None);
    }

    #[test]
    fn clamp_saturates_to_sentinel() {
        assert_eq!(u64::from(clamp32(ZIP64_MAGIC + 10)), ZIP64_MAGIC);
        assert_eq!(clamp32(12), 12);
    }
}
