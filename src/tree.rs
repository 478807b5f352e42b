use log::{debug, trace};

use crate::error::{Error, Result};
use crate::node::{lower_bound, Internal, Layout};
use crate::node::Leaf;
use crate::pager::{Pager, ReadPin, WritePin};
use crate::page::{is_leaf_tagged, tag_leaf, untag, PageId, NULL_PAGE};
use crate::strategy::Strategy;

pub type Comparator = Box<dyn Fn(&[u8], &[u8]) -> std::cmp::Ordering + Send + Sync>;

/// A B+tree over two pagers (leaf file, internal file), a key comparator
/// and a value-insertion strategy. Grounded on the teacher's
/// `btree/{mod.rs,node.rs,slot.rs}`, generalized from `Schema`/tuple keys
/// to raw fixed-width byte keys compared via an external function.
///
/// `Tree` is deliberately "rootless": every operation takes the current
/// root page id as a parameter and, for mutations, returns the (possibly
/// unchanged) new root. A standalone index persists that id in its `roof`
/// file; a HOST index's [`crate::strategy::EmbeddedStrategy`] persists it
/// directly in the outer leaf's value slot. This lets one `Tree` type
/// serve both roles without an internal "current root" needing its own
/// synchronization.
pub struct Tree {
    leaf_pager: Pager,
    int_pager: Pager,
    layout: Layout,
    cmp: Comparator,
    strategy: Box<dyn Strategy>,
}

fn retry_on_no_resource<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    loop {
        match f() {
            Err(Error::NoResource) => {
                trace!("tree: retrying after NO_RESOURCE");
                std::thread::yield_now();
                continue;
            }
            other => return other,
        }
    }
}

impl Tree {
    pub fn new(
        leaf_pager: Pager,
        int_pager: Pager,
        layout: Layout,
        cmp: Comparator,
        strategy: Box<dyn Strategy>,
    ) -> Self {
        Self { leaf_pager, int_pager, layout, cmp, strategy }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn fetch_tagged_read(&self, id: PageId) -> Result<ReadPin<'_>> {
        if is_leaf_tagged(id) {
            self.leaf_pager.fetch_read(untag(id))
        } else {
            self.int_pager.fetch_read(id)
        }
    }

    fn fetch_tagged_write(&self, id: PageId) -> Result<WritePin<'_>> {
        if is_leaf_tagged(id) {
            self.leaf_pager.fetch_write(untag(id))
        } else {
            self.int_pager.fetch_write(id)
        }
    }

    fn is_safe_leaf(&self, size: usize) -> bool {
        size + 1 < self.layout.leaf_cap
    }

    fn is_safe_internal(&self, size: usize) -> bool {
        size + 1 < self.layout.int_cap
    }

    /// Allocate a brand-new, empty leaf, asking the strategy to
    /// initialize its value area (`spec.md` §9's `initChildren`), and
    /// write it out while still holding the page write-locked from
    /// allocation.
    fn new_leaf(&self) -> Result<(PageId, WritePin<'_>)> {
        let mut pin = self.leaf_pager.allocate()?;
        let mut leaf = Leaf::empty(&self.layout);
        self.strategy.init_children(&mut leaf.values);
        leaf.encode(&mut pin.data, &self.layout);
        Ok((tag_leaf(pin.id), pin))
    }

    /// Allocate and store a fresh empty leaf, returning its LEAF-tagged id.
    /// Used to seed a standalone index's `roof` on first open
    /// (`spec.md` §4.4).
    pub fn empty_root(&self) -> Result<PageId> {
        let (id, _pin) = self.new_leaf()?;
        Ok(id)
    }

    /// Crabbing descent from `root` down to the leaf that would hold
    /// `key`, holding each node's write lock across the decision of
    /// whether to fetch its child, and releasing every ancestor lock held
    /// so far as soon as a "safe" node (one that can't propagate a split
    /// upward) is reached (`spec.md` §4.3 step 4). The returned vector's
    /// last entry is always the leaf; locks on every entry are held by
    /// the caller until it drops them.
    fn descend_write(&self, root: PageId, key: &[u8]) -> Result<Vec<WritePin<'_>>> {
        let mut path: Vec<WritePin<'_>> = Vec::new();
        let mut cur_id = root;
        let mut cur = self.fetch_tagged_write(cur_id)?;

        loop {
            if is_leaf_tagged(cur_id) {
                path.push(cur);
                return Ok(path);
            }

            let node = Internal::decode(&cur.data, &self.layout);
            let child_id = node.children[node.child_index(key, &self.cmp)];
            let child = self.fetch_tagged_write(child_id)?;

            let safe = if is_leaf_tagged(child_id) {
                self.is_safe_leaf(Leaf::decode(&child.data, &self.layout).size)
            } else {
                self.is_safe_internal(Internal::decode(&child.data, &self.layout).size)
            };

            path.push(cur);
            if safe {
                path.clear();
            }

            cur_id = child_id;
            cur = child;
        }
    }

    // ---- insert / upsert --------------------------------------------

    pub fn insert_or_upsert(
        &self,
        root: PageId,
        key: &[u8],
        value: &[u8],
        update: bool,
    ) -> Result<PageId> {
        retry_on_no_resource(|| self.try_insert_or_upsert(root, key, value, update))
    }

    fn try_insert_or_upsert(
        &self,
        root: PageId,
        key: &[u8],
        value: &[u8],
        update: bool,
    ) -> Result<PageId> {
        let (root, mut path): (PageId, Vec<WritePin<'_>>) = if root == NULL_PAGE {
            let (id, pin) = self.new_leaf()?;
            (id, vec![pin])
        } else {
            (root, self.descend_write(root, key)?)
        };

        // `path`'s last entry is always the leaf we just reached; its
        // lock is held from here until the insert (and any propagated
        // split) is fully written.
        let mut leaf_pin = path.pop().expect("descent always reaches a leaf");

        let mut leaf = Leaf::decode(&leaf_pin.data, &self.layout);
        let at = lower_bound(&leaf.keys, leaf.size, key, &self.cmp);
        let exists = at < leaf.size && (self.cmp)(&leaf.keys[at], key) == std::cmp::Ordering::Equal;

        if exists {
            if !update {
                return Err(Error::KeyExists);
            }
            let wrote = self.strategy.write_value(&mut leaf.values[at], value, true)?;
            if wrote {
                leaf.encode(&mut leaf_pin.data, &self.layout);
            }
            return Ok(root);
        }

        leaf.insert_at(at, key.to_vec(), self.strategy.empty_slot(self.layout.data_size));
        self.strategy.write_value(&mut leaf.values[at], value, false)?;

        if leaf.size < self.layout.leaf_cap {
            leaf.encode(&mut leaf_pin.data, &self.layout);
            return Ok(root);
        }

        // Overfull: split and propagate.
        let mut new_leaf = leaf.split(&self.layout);
        let mut new_pin = self.leaf_pager.allocate()?;
        let new_id = tag_leaf(new_pin.id);

        new_leaf.next = leaf.next;
        new_leaf.prev = tag_leaf(leaf_pin.id);
        leaf.next = new_id;

        if is_leaf_tagged(new_leaf.next) && untag(new_leaf.next) != NULL_PAGE {
            // fix the old successor's `prev` pointer
            if let Ok(mut succ_pin) = self.leaf_pager.fetch_write(untag(new_leaf.next)) {
                let mut succ = Leaf::decode(&succ_pin.data, &self.layout);
                succ.prev = new_id;
                succ.encode(&mut succ_pin.data, &self.layout);
            }
        }

        leaf.encode(&mut leaf_pin.data, &self.layout);
        new_leaf.encode(&mut new_pin.data, &self.layout);

        let separator = new_leaf.keys[0].clone();
        let left = tag_leaf(leaf_pin.id);
        // The leaf (and its new sibling) are fully written; nothing
        // further in this operation touches them, so release their locks
        // before walking ancestors.
        drop(leaf_pin);
        drop(new_pin);

        self.propagate_split(root, path, separator, left, new_id)
    }

    /// Insert `(separator, right_child)` into the parent at the top of
    /// `path`, splitting further up as needed. Returns the possibly new
    /// root id. Each ancestor's write lock (already held since
    /// `descend_write`) is released as soon as that ancestor's own
    /// mutation is written, whether or not the split propagates further.
    fn propagate_split(
        &self,
        root: PageId,
        mut path: Vec<WritePin<'_>>,
        mut separator: Vec<u8>,
        mut left: PageId,
        mut right: PageId,
    ) -> Result<PageId> {
        loop {
            let Some(mut parent_pin) = path.pop() else {
                // No ancestor left: the old root just split. Allocate a
                // new internal root.
                let mut pin = self.int_pager.allocate()?;
                let mut new_root = Internal::empty(&self.layout);
                new_root.insert_at(0, separator, left, right);
                new_root.encode(&mut pin.data, &self.layout);
                return Ok(pin.id);
            };

            let mut parent = Internal::decode(&parent_pin.data, &self.layout);
            let at = lower_bound(&parent.keys, parent.size, &separator, &self.cmp);
            parent.insert_at(at, separator.clone(), left, right);

            if parent.size < self.layout.int_cap {
                parent.encode(&mut parent_pin.data, &self.layout);
                return Ok(root);
            }

            let (new_separator, new_node) = parent.split(&self.layout);
            let mut new_pin = self.int_pager.allocate()?;
            parent.encode(&mut parent_pin.data, &self.layout);
            new_node.encode(&mut new_pin.data, &self.layout);

            debug!("tree: internal split promoting separator to ancestor");
            separator = new_separator;
            left = parent_pin.id;
            right = new_pin.id;
        }
    }

    // ---- hide / unhide ------------------------------------------------

    pub fn set_hidden(&self, root: PageId, key: &[u8], hide: bool) -> Result<()> {
        retry_on_no_resource(|| self.try_set_hidden(root, key, hide))
    }

    fn try_set_hidden(&self, root: PageId, key: &[u8], hide: bool) -> Result<()> {
        if root == NULL_PAGE {
            return Err(Error::KeyNotFound);
        }

        let mut path = self.descend_write(root, key)?;
        let mut leaf_pin = path.pop().expect("descent always reaches a leaf");
        let mut leaf = Leaf::decode(&leaf_pin.data, &self.layout);

        let at = lower_bound(&leaf.keys, leaf.size, key, &self.cmp);
        if at >= leaf.size || (self.cmp)(&leaf.keys[at], key) != std::cmp::Ordering::Equal {
            return Err(Error::KeyNotFound);
        }

        if hide {
            if leaf.is_hidden(at) {
                return Err(Error::KeyNotFound);
            }
            leaf.set_hidden(at, true);
        } else {
            if !leaf.is_hidden(at) {
                return Err(Error::KeyNotHidden);
            }
            leaf.set_hidden(at, false);
        }

        leaf.encode(&mut leaf_pin.data, &self.layout);
        Ok(())
    }

    // ---- lookup ---------------------------------------------------------

    /// Crabbing read descent from `root` down to the leaf that would hold
    /// `key`: each node's read lock is held only long enough to pick the
    /// next child and is released the instant the child's own lock is
    /// acquired, so no partial update of a node is ever visible mid-walk.
    fn descend_read(&self, root: PageId, key: &[u8]) -> Result<(PageId, ReadPin<'_>)> {
        let mut cur_id = root;
        let mut cur = self.fetch_tagged_read(cur_id)?;
        loop {
            if is_leaf_tagged(cur_id) {
                return Ok((cur_id, cur));
            }
            let node = Internal::decode(&cur.data, &self.layout);
            cur_id = node.children[node.child_index(key, &self.cmp)];
            // Reassignment drops the old guard only once the new one is
            // held, preserving lock-coupling through the descent.
            cur = self.fetch_tagged_read(cur_id)?;
        }
    }

    pub fn get(&self, root: PageId, key: &[u8]) -> Result<Vec<u8>> {
        if root == NULL_PAGE {
            return Err(Error::KeyNotFound);
        }

        let (_, pin) = self.descend_read(root, key)?;
        let leaf = Leaf::decode(&pin.data, &self.layout);

        let at = lower_bound(&leaf.keys, leaf.size, key, &self.cmp);
        if at >= leaf.size
            || (self.cmp)(&leaf.keys[at], key) != std::cmp::Ordering::Equal
            || leaf.is_hidden(at)
        {
            return Err(Error::KeyNotFound);
        }

        Ok(leaf.values[at].clone())
    }

    pub fn does_exist(&self, root: PageId, key: &[u8]) -> Result<()> {
        self.get(root, key).map(|_| ())
    }

    // ---- leftmost / rightmost / next / prev ----------------------------

    pub fn leftmost(&self, root: PageId) -> Result<PageId> {
        let mut cur_id = root;
        let mut cur = self.fetch_tagged_read(cur_id)?;
        loop {
            if is_leaf_tagged(cur_id) {
                return Ok(cur_id);
            }
            let node = Internal::decode(&cur.data, &self.layout);
            cur_id = node.children[0];
            cur = self.fetch_tagged_read(cur_id)?;
        }
    }

    pub fn rightmost(&self, root: PageId) -> Result<PageId> {
        let mut cur_id = root;
        let mut cur = self.fetch_tagged_read(cur_id)?;
        loop {
            if is_leaf_tagged(cur_id) {
                return Ok(cur_id);
            }
            let node = Internal::decode(&cur.data, &self.layout);
            cur_id = node.children[node.size];
            cur = self.fetch_tagged_read(cur_id)?;
        }
    }

    pub fn next_leaf(&self, leaf_id: PageId) -> Result<PageId> {
        let pin = self.fetch_tagged_read(leaf_id)?;
        let leaf = Leaf::decode(&pin.data, &self.layout);
        if leaf.next == NULL_PAGE {
            return Err(Error::Eof);
        }
        Ok(leaf.next)
    }

    pub fn prev_leaf(&self, leaf_id: PageId) -> Result<PageId> {
        let pin = self.fetch_tagged_read(leaf_id)?;
        let leaf = Leaf::decode(&pin.data, &self.layout);
        if leaf.prev == NULL_PAGE {
            return Err(Error::Eof);
        }
        Ok(leaf.prev)
    }

    pub fn height(&self, root: PageId) -> Result<usize> {
        let mut cur_id = root;
        let mut cur = self.fetch_tagged_read(cur_id)?;
        let mut height = 1;
        loop {
            if is_leaf_tagged(cur_id) {
                return Ok(height);
            }
            let node = Internal::decode(&cur.data, &self.layout);
            cur_id = node.children[0];
            cur = self.fetch_tagged_read(cur_id)?;
            height += 1;
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.leaf_pager.flush_all()?;
        self.int_pager.flush_all()?;
        Ok(())
    }

    pub(crate) fn leaf_at(&self, leaf_id: PageId) -> Result<Leaf> {
        let pin = self.fetch_tagged_read(leaf_id)?;
        Ok(Leaf::decode(&pin.data, &self.layout))
    }

    /// Descend to the leaf that would hold `key`, for cursor positioning.
    pub(crate) fn descend_read_pub(&self, root: PageId, key: &[u8]) -> Result<PageId> {
        let (leaf_id, _pin) = self.descend_read(root, key)?;
        Ok(leaf_id)
    }

    pub(crate) fn comparator(&self) -> &Comparator {
        &self.cmp
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disk::Memory;
    use crate::strategy::PlainStrategy;
    use rand::{seq::SliceRandom, thread_rng};

    fn u32_cmp() -> Comparator {
        Box::new(|a: &[u8], b: &[u8]| {
            u32::from_le_bytes(a.try_into().unwrap()).cmp(&u32::from_le_bytes(b.try_into().unwrap()))
        })
    }

    fn tree(leaf_cap: usize, int_cap: usize) -> Tree {
        let layout = Layout { key_size: 4, data_size: 4, leaf_cap, int_cap };
        let leaf_pager = Pager::new(Box::new(Memory::new()), layout.leaf_page_len(), 64);
        let int_pager = Pager::new(Box::new(Memory::new()), layout.int_page_len(), 64);
        Tree::new(leaf_pager, int_pager, layout, u32_cmp(), Box::new(PlainStrategy))
    }

    fn b(n: u32) -> Vec<u8> {
        n.to_le_bytes().to_vec()
    }

    #[test]
    fn test_insert_and_get_shuffled() -> Result<()> {
        let t = tree(8, 8);
        let mut keys: Vec<u32> = (0..200).collect();
        keys.shuffle(&mut thread_rng());

        let mut root = NULL_PAGE;
        for &k in &keys {
            root = t.insert_or_upsert(root, &b(k), &b(k + 1000), false)?;
        }

        for &k in &keys {
            let v = t.get(root, &b(k))?;
            assert_eq!(v, b(k + 1000));
        }

        assert!(t.does_exist(root, &b(200)).is_err());
        Ok(())
    }

    #[test]
    fn test_insert_duplicate_rejected_upsert_overwrites() -> Result<()> {
        let t = tree(8, 8);
        let mut root = t.insert_or_upsert(NULL_PAGE, &b(1), &b(10), false)?;

        assert!(matches!(t.insert_or_upsert(root, &b(1), &b(20), false), Err(Error::KeyExists)));

        root = t.insert_or_upsert(root, &b(1), &b(20), true)?;
        assert_eq!(t.get(root, &b(1))?, b(20));
        Ok(())
    }

    #[test]
    fn test_hide_unhide() -> Result<()> {
        let t = tree(8, 8);
        let mut root = NULL_PAGE;
        for k in 0..30u32 {
            root = t.insert_or_upsert(root, &b(k), &b(k), false)?;
        }

        t.set_hidden(root, &b(7), true)?;
        assert!(matches!(t.get(root, &b(7)), Err(Error::KeyNotFound)));
        assert!(matches!(t.set_hidden(root, &b(7), true), Err(Error::KeyNotFound)));

        t.set_hidden(root, &b(7), false)?;
        assert_eq!(t.get(root, &b(7))?, b(7));
        assert!(matches!(t.set_hidden(root, &b(7), false), Err(Error::KeyNotHidden)));

        Ok(())
    }

    #[test]
    fn test_linked_leaves_ascending() -> Result<()> {
        let t = tree(6, 6);
        let mut root = NULL_PAGE;
        let mut keys: Vec<u32> = (0..97).collect();
        keys.shuffle(&mut thread_rng());
        for &k in &keys {
            root = t.insert_or_upsert(root, &b(k), &b(k), false)?;
        }

        let mut cur = t.leftmost(root)?;
        let mut seen = Vec::new();
        loop {
            let leaf = t.leaf_at(cur)?;
            for i in 0..leaf.size {
                seen.push(u32::from_le_bytes(leaf.keys[i].clone().try_into().unwrap()));
            }
            match t.next_leaf(cur) {
                Ok(next) => cur = next,
                Err(Error::Eof) => break,
                Err(e) => return Err(e),
            }
        }

        assert_eq!(seen, (0..97).collect::<Vec<u32>>());
        Ok(())
    }

    #[test]
    fn test_height_grows_with_inserts() -> Result<()> {
        let t = tree(4, 4);
        let mut root = NULL_PAGE;
        for k in 0..4u32 {
            root = t.insert_or_upsert(root, &b(k), &b(k), false)?;
        }
        assert_eq!(t.height(root)?, 1);

        for k in 4..60u32 {
            root = t.insert_or_upsert(root, &b(k), &b(k), false)?;
        }
        assert!(t.height(root)? >= 2);
        Ok(())
    }
}
