use crate::error::{Error, Result};
use crate::index::Index;
use crate::page::PageId;

/// Flags for [`State::get`], plain `u32` bit constants in the teacher's
/// no-extra-crate style (nothing in the pack reaches for a
/// `bitflags`-style dependency for a handful of flags).
pub const RELEASE: u32 = 1 << 0;
pub const ROOT: u32 = 1 << 1;
pub const SUBTREE: u32 = 1 << 2;

/// A reusable token for chained `get`/`get2`/`doesExist` calls, so a
/// caller doesn't have to thread the outer root through every subtree
/// lookup by hand (`spec.md` §4.5).
///
/// Every `Tree` lookup in this implementation already materializes the
/// leaf it visits into an owned `Leaf` before returning (see
/// `crate::node::Leaf::decode`), the same way the teacher's `Node`
/// deserializes a full page rather than handing back a borrowed view
/// (`btree/node.rs`'s `DiskObject::deserialise`). `State` therefore has no
/// pin to hold onto between calls; its only job is remembering the root
/// stashed by the last `ROOT` call for a subsequent `SUBTREE` lookup.
#[derive(Default)]
pub struct State {
    stashed_root: Option<PageId>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the state (used after a `RELEASE`-flagged call, or to start
    /// a fresh `get2` chain).
    pub fn reinit(&mut self) {
        self.stashed_root = None;
    }

    /// Locate `key` in `index`'s tree (or, if `SUBTREE` is set, in the
    /// subtree rooted at the value most recently stashed by `ROOT`),
    /// returning the value bytes.
    pub fn get(&mut self, index: &Index, flags: u32, key: &[u8]) -> Result<Vec<u8>> {
        let subtree = flags & SUBTREE != 0;

        let value = if subtree {
            let root = self.stashed_root.ok_or(Error::BadState)?;
            index.embedded_tree()?.get(root, key)?
        } else {
            index.tree().get(index.root(), key)?
        };

        if flags & ROOT != 0 {
            self.stashed_root = Some(u32::from_le_bytes(value.as_slice().try_into().unwrap()));
        }

        if flags & RELEASE != 0 {
            self.reinit();
        }

        Ok(value)
    }

    /// `get(ROOT, key1)` followed by `get(SUBTREE | flags, key2)`.
    pub fn get2(&mut self, index: &Index, flags: u32, key1: &[u8], key2: &[u8]) -> Result<Vec<u8>> {
        self.get(index, ROOT, key1)?;
        self.get(index, SUBTREE | flags, key2)
    }

    pub fn does_exist(&mut self, index: &Index, flags: u32, key: &[u8]) -> Result<()> {
        self.get(index, flags, key).map(|_| ())
    }

    pub fn release(&mut self) {
        self.reinit();
    }
}
