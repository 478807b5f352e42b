use crate::error::{Error, Result};
use crate::node::lower_bound;
use crate::page::{PageId, NULL_PAGE};
use crate::tree::Tree;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(PartialEq, Eq)]
enum Level {
    Outer,
    Inner,
}

/// A restartable cursor over a bounded range of one tree, with an
/// optional nested cursor descending into an inner subtree referenced by
/// the current outer slot (`spec.md` §4.6, §9 "model iterators as
/// restartable cursors; do not model them as generators/coroutines").
pub struct Cursor<'t> {
    tree: &'t Tree,
    root: PageId,
    from: Option<Vec<u8>>,
    to: Option<Vec<u8>>,
    dir: Direction,
    one_way: bool,

    started: bool,
    leaf: PageId,
    slot: usize,

    inner: Option<Box<Cursor<'t>>>,
    inner_factory: Option<Box<dyn Fn(PageId) -> Cursor<'t> + 't>>,
    level: Level,
}

impl<'t> Cursor<'t> {
    pub fn new(
        tree: &'t Tree,
        root: PageId,
        from: Option<Vec<u8>>,
        to: Option<Vec<u8>>,
        dir: Direction,
    ) -> Self {
        Self {
            tree,
            root,
            from,
            to,
            dir,
            one_way: true,
            started: false,
            leaf: NULL_PAGE,
            slot: 0,
            inner: None,
            inner_factory: None,
            level: Level::Outer,
        }
    }

    /// Enable `enter`/`leave` on a HOST cursor by supplying a factory that
    /// builds an inner cursor given the outer slot's stashed root page id.
    pub fn with_subtree(mut self, factory: impl Fn(PageId) -> Cursor<'t> + 't) -> Self {
        self.one_way = false;
        self.inner_factory = Some(Box::new(factory));
        self
    }

    pub fn reset(&mut self) {
        self.started = false;
        self.leaf = NULL_PAGE;
        self.slot = 0;
        self.inner = None;
        self.level = Level::Outer;
    }

    fn position_start(&mut self) -> Result<()> {
        if self.root == NULL_PAGE {
            return Err(Error::Eof);
        }

        let (leaf, slot) = match (&self.from, self.dir) {
            (Some(from), Direction::Asc) => {
                let leaf = self.tree.descend_read_pub(self.root, from)?;
                let node = self.tree.leaf_at(leaf)?;
                let slot = lower_bound(&node.keys, node.size, from, self.tree.comparator());
                (leaf, slot)
            }
            (Some(from), Direction::Desc) => {
                let leaf = self.tree.descend_read_pub(self.root, from)?;
                let node = self.tree.leaf_at(leaf)?;
                let mut slot = lower_bound(&node.keys, node.size, from, self.tree.comparator());
                if slot == node.size {
                    slot = node.size.saturating_sub(1);
                }
                (leaf, slot)
            }
            (None, Direction::Asc) => (self.tree.leftmost(self.root)?, 0),
            (None, Direction::Desc) => {
                let leaf = self.tree.rightmost(self.root)?;
                let node = self.tree.leaf_at(leaf)?;
                (leaf, node.size.saturating_sub(1))
            }
        };

        self.leaf = leaf;
        self.slot = slot;
        Ok(())
    }

    /// Advance and return the next visible `(key, value)` pair, skipping
    /// hidden slots transparently.
    pub fn next(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        if self.level == Level::Inner {
            if let Some(inner) = self.inner.as_mut() {
                return inner.next();
            }
        }

        if !self.started {
            self.started = true;
            self.position_start()?;
        }

        loop {
            if self.leaf == NULL_PAGE {
                return Err(Error::Eof);
            }

            let node = self.tree.leaf_at(self.leaf)?;

            let out_of_bounds = |key: &[u8]| match (&self.to, self.dir) {
                (Some(to), Direction::Asc) => (self.tree.comparator())(key, to) == std::cmp::Ordering::Greater,
                (Some(to), Direction::Desc) => (self.tree.comparator())(key, to) == std::cmp::Ordering::Less,
                (None, _) => false,
            };

            let in_range = match self.dir {
                Direction::Asc => self.slot < node.size,
                Direction::Desc => node.size > 0 && self.slot < node.size,
            };

            if in_range {
                let key = node.keys[self.slot].clone();
                let hidden = node.is_hidden(self.slot);

                if out_of_bounds(&key) {
                    self.leaf = NULL_PAGE;
                    return Err(Error::Eof);
                }

                let value = node.values[self.slot].clone();
                self.advance_slot(node.size);

                if hidden {
                    continue;
                }
                return Ok((key, value));
            }

            self.cross_leaf_boundary()?;
        }
    }

    fn advance_slot(&mut self, size: usize) {
        match self.dir {
            Direction::Asc => self.slot += 1,
            Direction::Desc => {
                if self.slot == 0 {
                    self.slot = size; // sentinel meaning "exhausted this leaf"
                } else {
                    self.slot -= 1;
                }
            }
        }
    }

    fn cross_leaf_boundary(&mut self) -> Result<()> {
        let next = match self.dir {
            Direction::Asc => self.tree.next_leaf(self.leaf),
            Direction::Desc => self.tree.prev_leaf(self.leaf),
        };

        match next {
            Ok(next_leaf) => {
                self.leaf = next_leaf;
                self.slot = match self.dir {
                    Direction::Asc => 0,
                    Direction::Desc => {
                        let node = self.tree.leaf_at(next_leaf)?;
                        node.size.saturating_sub(1)
                    }
                };
                Ok(())
            }
            Err(Error::Eof) => {
                self.leaf = NULL_PAGE;
                Err(Error::Eof)
            }
            Err(e) => Err(e),
        }
    }

    /// Descend into the inner subtree referenced by the current outer
    /// slot. Only valid on the outer level of a two-way HOST cursor that
    /// has already produced at least one pair.
    pub fn enter(&mut self) -> Result<()> {
        if self.one_way {
            return Err(Error::OneWay);
        }
        if self.level == Level::Inner {
            return Err(Error::BadState);
        }
        if !self.started || self.leaf == NULL_PAGE {
            return Err(Error::BadState);
        }

        let node = self.tree.leaf_at(self.leaf)?;
        let current_slot = match self.dir {
            Direction::Asc => self.slot.checked_sub(1).ok_or(Error::BadState)?,
            Direction::Desc => {
                if self.slot == node.size {
                    0
                } else {
                    self.slot + 1
                }
            }
        };

        let root_bytes = &node.values[current_slot];
        let root = u32::from_le_bytes(root_bytes.as_slice().try_into().unwrap());

        let factory = self.inner_factory.as_ref().ok_or(Error::NoSub)?;
        self.inner = Some(Box::new(factory(root)));
        self.level = Level::Inner;
        Ok(())
    }

    pub fn leave(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
        self.level = Level::Outer;
    }
}
