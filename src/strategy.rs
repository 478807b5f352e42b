use std::sync::Arc;

use crate::error::Result;
use crate::page::NULL_PAGE;
use crate::tree::Tree;

/// What "insert this value into slot s" means is pluggable, so a single
/// `Tree` implementation serves PLAIN, NULL, and HOST indexes alike
/// (`spec.md` §4.3). There is no teacher analogue for nested trees; the
/// shape (small trait stored by the owner, akin to `Box<dyn Disk>` in the
/// teacher's page cache) follows the teacher's general preference for
/// trait objects at pluggable seams.
pub trait Strategy: Send + Sync {
    /// Write `value` into `slot` (`dataSize` bytes, already known to
    /// exist at the target index). Returns whether the slot's bytes
    /// changed and must be persisted.
    fn write_value(&self, slot: &mut [u8], value: &[u8], update: bool) -> Result<bool>;

    /// Initialize a freshly allocated leaf's value area, called once per
    /// new leaf before any slot is written.
    fn init_children(&self, values: &mut [Vec<u8>]);

    /// Bytes a brand-new slot gets before its first `write_value`, when a
    /// key is inserted into an already-allocated leaf. All-zero unless a
    /// zero value would be mistaken for something meaningful (a HOST
    /// slot's all-zero bytes name page 0, a legitimate page id, so
    /// `EmbeddedStrategy` must override this with `NULL_PAGE`).
    fn empty_slot(&self, data_size: usize) -> Vec<u8> {
        vec![0u8; data_size]
    }
}

/// Primary-data index: the value is inline fixed-width bytes.
pub struct PlainStrategy;

impl Strategy for PlainStrategy {
    fn write_value(&self, slot: &mut [u8], value: &[u8], _update: bool) -> Result<bool> {
        slot.copy_from_slice(value);
        Ok(true)
    }

    fn init_children(&self, _values: &mut [Vec<u8>]) {}
}

/// Keyset index: no value is stored per key.
pub struct NullStrategy;

impl Strategy for NullStrategy {
    fn write_value(&self, _slot: &mut [u8], _value: &[u8], _update: bool) -> Result<bool> {
        Ok(false)
    }

    fn init_children(&self, _values: &mut [Vec<u8>]) {}
}

/// HOST index: the slot holds a 4-byte page id naming the root of an inner
/// subtree. `value` passed in is the concatenated `(innerKey, innerValue)`
/// bytes to insert into that subtree; a fresh root is created on demand
/// when the slot is still `NULL_PAGE`.
///
/// `inner` is shared (`Arc`) rather than owned outright: the embedded
/// index that this strategy drives is also kept alive in its own right by
/// the outer `Index` (for `close`/`embedded_tree` access), and `Tree`
/// can't be cheaply cloned since it owns its pagers.
pub struct EmbeddedStrategy {
    pub inner: Arc<Tree>,
    pub inner_key_size: usize,
}

impl Strategy for EmbeddedStrategy {
    fn write_value(&self, slot: &mut [u8], value: &[u8], update: bool) -> Result<bool> {
        let root = u32::from_le_bytes(slot.try_into().expect("root slot must be 4 bytes"));
        let (inner_key, inner_value) = value.split_at(self.inner_key_size);

        let new_root = self.inner.insert_or_upsert(root, inner_key, inner_value, update)?;
        if new_root != root {
            slot.copy_from_slice(&new_root.to_le_bytes());
            return Ok(true);
        }
        Ok(false)
    }

    fn init_children(&self, values: &mut [Vec<u8>]) {
        for v in values {
            v.copy_from_slice(&NULL_PAGE.to_le_bytes());
        }
    }

    fn empty_slot(&self, _data_size: usize) -> Vec<u8> {
        NULL_PAGE.to_le_bytes().to_vec()
    }
}
