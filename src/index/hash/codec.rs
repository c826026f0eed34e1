use byteorder::{ByteOrder, LittleEndian};

/// Fixed-width on-page encoding for hash table keys and values.
///
/// Slots are packed back to back in bucket pages, so the encoded width must be
/// a compile-time constant per type. All integers are little-endian.
pub trait SlotValue: Sized + Clone + PartialEq {
    const ENCODED_SIZE: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

impl SlotValue for i32 {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl SlotValue for u32 {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl SlotValue for i64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl SlotValue for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}
