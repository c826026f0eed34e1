use std::marker::PhantomData;
use log::debug;

use crate::common::types::PAGE_SIZE;
use crate::index::hash::codec::SlotValue;

/// Number of slots a bucket page can hold for the given key/value widths.
///
/// The page is carved into an occupied bitmap, a readable bitmap, and the
/// slot array; solving `n*slot + 2*ceil(n/8) <= PAGE_SIZE` for `n` gives the
/// formula below.
pub fn bucket_array_size<K: SlotValue, V: SlotValue>() -> usize {
    (8 * PAGE_SIZE) / (8 * (K::ENCODED_SIZE + V::ENCODED_SIZE) + 2)
}

fn bitmap_bytes(capacity: usize) -> usize {
    (capacity + 7) / 8
}

fn bit_is_set(bitmap: &[u8], idx: usize) -> bool {
    bitmap[idx / 8] & (1 << (idx % 8)) != 0
}

fn set_bit(bitmap: &mut [u8], idx: usize, value: bool) {
    let mask = 1u8 << (idx % 8);
    if value {
        bitmap[idx / 8] |= mask;
    } else {
        bitmap[idx / 8] &= !mask;
    }
}

/// Read-only view of a bucket page over a frame's byte array.
///
/// Layout: occupied bitmap, readable bitmap, then packed `(key, value)` slots.
/// `readable` marks currently-present slots; `occupied` marks ever-used ones
/// and is only cleared wholesale by `clear`.
pub struct BucketView<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: SlotValue, V: SlotValue> BucketView<'a, K, V> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn capacity() -> usize {
        bucket_array_size::<K, V>()
    }

    fn slot_size() -> usize {
        K::ENCODED_SIZE + V::ENCODED_SIZE
    }

    fn readable_offset() -> usize {
        bitmap_bytes(Self::capacity())
    }

    fn slots_offset() -> usize {
        2 * bitmap_bytes(Self::capacity())
    }

    pub fn is_occupied(&self, slot_idx: usize) -> bool {
        bit_is_set(&self.data[..Self::readable_offset()], slot_idx)
    }

    pub fn is_readable(&self, slot_idx: usize) -> bool {
        bit_is_set(&self.data[Self::readable_offset()..Self::slots_offset()], slot_idx)
    }

    pub fn key_at(&self, slot_idx: usize) -> K {
        let offset = Self::slots_offset() + slot_idx * Self::slot_size();
        K::decode(&self.data[offset..])
    }

    pub fn value_at(&self, slot_idx: usize) -> V {
        let offset = Self::slots_offset() + slot_idx * Self::slot_size() + K::ENCODED_SIZE;
        V::decode(&self.data[offset..])
    }

    /// Collect every value stored under the given key.
    pub fn get_value(&self, key: &K) -> Vec<V> {
        let mut values = Vec::new();
        for i in 0..Self::capacity() {
            if self.is_readable(i) && self.key_at(i) == *key {
                values.push(self.value_at(i));
            }
        }
        values
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == Self::capacity()
    }

    pub fn is_empty(&self) -> bool {
        let readable = &self.data[Self::readable_offset()..Self::slots_offset()];
        readable.iter().all(|&b| b == 0)
    }

    pub fn num_readable(&self) -> usize {
        let readable = &self.data[Self::readable_offset()..Self::slots_offset()];
        readable.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Snapshot of all present slots, used when a split redistributes them.
    pub fn entries(&self) -> Vec<(K, V)> {
        let mut entries = Vec::with_capacity(self.num_readable());
        for i in 0..Self::capacity() {
            if self.is_readable(i) {
                entries.push((self.key_at(i), self.value_at(i)));
            }
        }
        entries
    }
}

/// Mutable view of a bucket page over a frame's byte array.
pub struct BucketViewMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: SlotValue, V: SlotValue> BucketViewMut<'a, K, V> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn view(&self) -> BucketView<'_, K, V> {
        BucketView::new(self.data)
    }

    fn set_occupied(&mut self, slot_idx: usize, value: bool) {
        let end = BucketView::<K, V>::readable_offset();
        set_bit(&mut self.data[..end], slot_idx, value);
    }

    fn set_readable(&mut self, slot_idx: usize, value: bool) {
        let start = BucketView::<K, V>::readable_offset();
        let end = BucketView::<K, V>::slots_offset();
        set_bit(&mut self.data[start..end], slot_idx, value);
    }

    /// Insert a pair into the first free slot.
    ///
    /// Returns false when the exact pair is already present or the bucket is
    /// full. Duplicate keys with distinct values are allowed.
    pub fn insert(&mut self, key: &K, value: &V) -> bool {
        let mut free_slot = None;
        {
            let view = self.view();
            for i in 0..BucketView::<K, V>::capacity() {
                if view.is_readable(i) {
                    if view.key_at(i) == *key && view.value_at(i) == *value {
                        return false;
                    }
                } else if free_slot.is_none() {
                    free_slot = Some(i);
                }
            }
        }

        let slot_idx = match free_slot {
            Some(i) => i,
            None => {
                debug!("bucket is full");
                return false;
            }
        };

        self.set_occupied(slot_idx, true);
        self.set_readable(slot_idx, true);
        let offset = BucketView::<K, V>::slots_offset()
            + slot_idx * (K::ENCODED_SIZE + V::ENCODED_SIZE);
        key.encode(&mut self.data[offset..]);
        value.encode(&mut self.data[offset + K::ENCODED_SIZE..]);
        true
    }

    /// Remove the slot holding the exact pair, leaving a tombstone (the
    /// occupied bit stays set).
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        let mut found = None;
        {
            let view = self.view();
            for i in 0..BucketView::<K, V>::capacity() {
                if view.is_readable(i) && view.key_at(i) == *key && view.value_at(i) == *value {
                    found = Some(i);
                    break;
                }
            }
        }
        match found {
            Some(i) => {
                self.remove_at(i);
                true
            }
            None => false,
        }
    }

    pub fn remove_at(&mut self, slot_idx: usize) {
        self.set_readable(slot_idx, false);
    }

    /// Wipe both bitmaps. Slot bytes are left behind; they are unreachable
    /// once unreadable.
    pub fn clear(&mut self) {
        let end = BucketView::<K, V>::slots_offset();
        self.data[..end].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::PAGE_SIZE;

    fn bucket_buf() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn test_layout_fits_in_page() {
        let n = bucket_array_size::<i32, i32>();
        assert!(2 * bitmap_bytes(n) + n * 8 <= PAGE_SIZE);
        let n = bucket_array_size::<u64, u64>();
        assert!(2 * bitmap_bytes(n) + n * 16 <= PAGE_SIZE);
    }

    #[test]
    fn test_insert_and_get() {
        let mut buf = bucket_buf();
        let mut bucket = BucketViewMut::<i32, i32>::new(&mut buf);

        assert!(bucket.insert(&1, &10));
        assert!(bucket.insert(&1, &11));
        assert!(bucket.insert(&2, &20));

        let view = bucket.view();
        let mut values = view.get_value(&1);
        values.sort_unstable();
        assert_eq!(values, vec![10, 11]);
        assert_eq!(view.get_value(&2), vec![20]);
        assert_eq!(view.get_value(&3), Vec::<i32>::new());
        assert_eq!(view.num_readable(), 3);
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let mut buf = bucket_buf();
        let mut bucket = BucketViewMut::<i32, i32>::new(&mut buf);

        assert!(bucket.insert(&5, &50));
        assert!(!bucket.insert(&5, &50));
        assert_eq!(bucket.view().num_readable(), 1);
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let mut buf = bucket_buf();
        let mut bucket = BucketViewMut::<i32, i32>::new(&mut buf);

        assert!(bucket.insert(&7, &70));
        assert!(bucket.remove(&7, &70));
        assert!(!bucket.remove(&7, &70));

        let view = bucket.view();
        assert!(view.is_empty());
        assert!(view.is_occupied(0));
        assert!(!view.is_readable(0));
    }

    #[test]
    fn test_fill_to_capacity() {
        let mut buf = bucket_buf();
        let mut bucket = BucketViewMut::<i32, i32>::new(&mut buf);
        let capacity = BucketView::<i32, i32>::capacity();

        for i in 0..capacity {
            assert!(bucket.insert(&(i as i32), &0));
        }
        assert!(bucket.view().is_full());
        assert!(!bucket.insert(&-1, &0));

        // Freeing one slot makes room again.
        assert!(bucket.remove(&0, &0));
        assert!(!bucket.view().is_full());
        assert!(bucket.insert(&-1, &0));
    }

    #[test]
    fn test_clear_resets_bitmaps() {
        let mut buf = bucket_buf();
        let mut bucket = BucketViewMut::<i32, i32>::new(&mut buf);

        bucket.insert(&1, &2);
        bucket.insert(&3, &4);
        bucket.clear();

        let view = bucket.view();
        assert!(view.is_empty());
        assert!(!view.is_occupied(0));
        assert_eq!(view.entries(), Vec::<(i32, i32)>::new());
    }
}
