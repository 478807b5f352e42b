use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use log::info;

use crate::config::{Config, IndexType};
use crate::disk::FileSystem;
use crate::error::{Error, Result};
use crate::iterator::{Cursor, Direction};
use crate::node::Layout;
use crate::page::{is_leaf_tagged, PageId};
use crate::pager::Pager;
use crate::strategy::{EmbeddedStrategy, NullStrategy, PlainStrategy, Strategy};
use crate::tree::{Comparator, Tree};

const ROOF_LEN: usize = 4;

fn default_cache_size(configured: i32, cap: usize) -> usize {
    match configured {
        0 => usize::MAX,
        -1 => cap.max(16) * 4,
        n if n > 0 => n as usize,
        _ => cap.max(16) * 4,
    }
}

/// The user-supplied parts of `spec.md` §4.4's open/create contract that
/// dynamic-symbol loading would otherwise resolve: a comparator and,
/// recursively, the embedded index's own comparator if this index is
/// HOST. Passed by value instead of loaded by name (`spec.md` §9).
pub struct OpenConfig {
    pub compare: Comparator,
    pub embedded: Option<Box<OpenConfig>>,
}

/// Directory-backed B+tree index: `config`/`leaf`/`nonleaf`/`roof` files,
/// a `Tree`, and (for HOST indexes) a recursively opened embedded `Index`
/// wired in as the outer tree's [`EmbeddedStrategy`] (`spec.md` §4.4).
pub struct Index {
    dir: PathBuf,
    config: Config,
    tree: Arc<Tree>,
    root: RwLock<PageId>,
    roof: Option<Mutex<std::fs::File>>,
    embedded: Option<Box<Index>>,
}

impl Index {
    fn config_path(dir: &Path) -> PathBuf {
        dir.join("config")
    }
    fn leaf_path(dir: &Path) -> PathBuf {
        dir.join("leaf")
    }
    fn nonleaf_path(dir: &Path) -> PathBuf {
        dir.join("nonleaf")
    }
    fn roof_path(dir: &Path) -> PathBuf {
        dir.join("roof")
    }

    /// Make the directory (idempotent), write `config`, create the three
    /// backing files empty, and for a standalone index seed `roof` once
    /// the first leaf exists (`spec.md` §4.4 "Create").
    pub fn create(dir: impl AsRef<Path>, config: Config, open: OpenConfig) -> Result<Index> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let config_bytes = config.encode();
        fs::write(Self::config_path(&dir), config_bytes)?;

        fs::OpenOptions::new().read(true).write(true).create(true).truncate(true).open(Self::leaf_path(&dir))?;
        fs::OpenOptions::new().read(true).write(true).create(true).truncate(true).open(Self::nonleaf_path(&dir))?;

        info!("index: created at {}", dir.display());
        Self::open(&dir, open)
    }

    /// Read `config`, open the three files, instantiate the pagers,
    /// recursively open the embedded index if HOST, and (if the leaf file
    /// is still empty) allocate the first leaf and seed `roof`
    /// (`spec.md` §4.4 "Open").
    pub fn open(dir: impl AsRef<Path>, open: OpenConfig) -> Result<Index> {
        let dir = dir.as_ref().to_path_buf();
        let config_bytes = fs::read(Self::config_path(&dir))?;
        let config = Config::decode(&config_bytes)?;

        let layout = Layout {
            key_size: config.key_size as usize,
            data_size: config.data_size as usize,
            leaf_cap: config.leaf_node_size as usize,
            int_cap: config.int_node_size as usize,
        };

        let leaf_disk = FileSystem::new(Self::leaf_path(&dir))?;
        let int_disk = FileSystem::new(Self::nonleaf_path(&dir))?;

        let leaf_cache = default_cache_size(config.leaf_cache_size, layout.leaf_cap);
        let int_cache = default_cache_size(config.int_cache_size, layout.int_cap);

        let leaf_pager = Pager::new(Box::new(leaf_disk), layout.leaf_page_len(), leaf_cache);
        let int_pager = Pager::new(Box::new(int_disk), layout.int_page_len(), int_cache);

        let (strategy, embedded): (Box<dyn Strategy>, Option<Box<Index>>) = match config.index_type {
            IndexType::Null => (Box::new(NullStrategy), None),
            IndexType::Plain => (Box::new(PlainStrategy), None),
            IndexType::Host => {
                let sub_path = config
                    .sub_path
                    .as_ref()
                    .ok_or(Error::BadConfig("HOST index missing subPath"))?;
                let sub_dir = dir.join(sub_path);
                let sub_open = *open
                    .embedded
                    .ok_or(Error::BadConfig("HOST index missing embedded OpenConfig"))?;

                let sub_index = if Self::config_path(&sub_dir).exists() {
                    Index::open(&sub_dir, sub_open)?
                } else {
                    let sub_config = Config {
                        index_type: IndexType::Plain,
                        leaf_page_size: config.leaf_page_size,
                        int_page_size: config.int_page_size,
                        leaf_node_size: config.leaf_node_size,
                        int_node_size: config.int_node_size,
                        key_size: config.key_size,
                        data_size: config.data_size,
                        leaf_cache_size: config.leaf_cache_size,
                        int_cache_size: config.int_cache_size,
                        sub_path: None,
                        compare_name: config.compare_name.clone(),
                        rsc_init_name: None,
                        rsc_dest_name: None,
                    };
                    Index::create(&sub_dir, sub_config, sub_open)?
                };

                let inner_key_size = sub_index.config.key_size as usize;
                let embedded_tree_handle = sub_index.tree.clone();

                let strategy: Box<dyn Strategy> =
                    Box::new(EmbeddedStrategy { inner: embedded_tree_handle, inner_key_size });
                (strategy, Some(Box::new(sub_index)))
            }
        };

        let tree = Arc::new(Tree::new(leaf_pager, int_pager, layout, open.compare, strategy));

        let roof_path = Self::roof_path(&dir);
        let mut roof_file =
            fs::OpenOptions::new().read(true).write(true).create(true).open(&roof_path)?;

        let root = Self::read_or_seed_root(&mut roof_file, &tree)?;

        info!("index: opened {} (type {:?}, root {root})", dir.display(), config.index_type);

        Ok(Index {
            dir,
            config,
            tree,
            root: RwLock::new(root),
            roof: Some(Mutex::new(roof_file)),
            embedded,
        })
    }

    fn read_or_seed_root(roof_file: &mut std::fs::File, tree: &Tree) -> Result<PageId> {
        use std::io::{Read, Seek, SeekFrom, Write};

        let len = roof_file.metadata()?.len();
        if len as usize >= ROOF_LEN {
            let mut buf = [0u8; ROOF_LEN];
            roof_file.seek(SeekFrom::Start(0))?;
            roof_file.read_exact(&mut buf)?;
            return Ok(PageId::from_le_bytes(buf));
        }

        let root = tree.empty_root()?;
        roof_file.seek(SeekFrom::Start(0))?;
        roof_file.write_all(&root.to_le_bytes())?;
        roof_file.flush()?;
        Ok(root)
    }

    fn persist_root(&self, new_root: PageId) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        *self.root.write().expect("root lock poisoned") = new_root;

        if let Some(roof) = self.roof.as_ref() {
            let mut roof = roof.lock().expect("roof lock poisoned");
            roof.seek(SeekFrom::Start(0))?;
            roof.write_all(&new_root.to_le_bytes())?;
            roof.flush()?;
        }
        Ok(())
    }

    pub fn root(&self) -> PageId {
        *self.root.read().expect("root lock poisoned")
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn embedded_tree(&self) -> Result<&Tree> {
        self.embedded.as_ref().map(|e| e.tree()).ok_or(Error::NoSub)
    }

    pub fn height(&self) -> Result<usize> {
        self.tree.height(self.root())
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let new_root = self.tree.insert_or_upsert(self.root(), key, value, false)?;
        self.persist_root(new_root)
    }

    pub fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let new_root = self.tree.insert_or_upsert(self.root(), key, value, true)?;
        self.persist_root(new_root)
    }

    pub fn hide(&self, key: &[u8]) -> Result<()> {
        self.tree.set_hidden(self.root(), key, true)
    }

    pub fn unhide(&self, key: &[u8]) -> Result<()> {
        self.tree.set_hidden(self.root(), key, false)
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.tree.get(self.root(), key)
    }

    pub fn does_exist(&self, key: &[u8]) -> Result<()> {
        self.tree.does_exist(self.root(), key)
    }

    pub fn range(&self, from: Option<Vec<u8>>, to: Option<Vec<u8>>, dir: Direction) -> Cursor<'_> {
        Cursor::new(&self.tree, self.root(), from, to, dir)
    }

    /// A HOST index's range cursor, wired so `enter()` descends into each
    /// outer slot's embedded subtree.
    pub fn range_with_subtree(
        &self,
        from: Option<Vec<u8>>,
        to: Option<Vec<u8>>,
        dir: Direction,
    ) -> Result<Cursor<'_>> {
        let embedded = self.embedded.as_ref().ok_or(Error::NoSub)?;
        let cursor = Cursor::new(&self.tree, self.root(), from, to, dir).with_subtree(move |root| {
            Cursor::new(embedded.tree(), root, None, None, Direction::Asc)
        });
        Ok(cursor)
    }

    /// Close the embedded index first, then this one; both tear down
    /// their pagers (flush-through, no further I/O after return)
    /// (`spec.md` §4.4 "Close").
    pub fn close(mut self) -> Result<()> {
        if let Some(embedded) = self.embedded.take() {
            embedded.close()?;
        }
        self.tree.flush()?;
        Ok(())
    }

    /// Remove `leaf`, `nonleaf`, `config`, `roof`; does not recurse into
    /// `subPath` (`spec.md` §4.4 "Drop").
    pub fn drop_storage(dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        for name in ["leaf", "nonleaf", "config", "roof"] {
            let path = dir.join(name);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        if dir.read_dir().map(|mut it| it.next().is_none()).unwrap_or(false) {
            let _ = fs::remove_dir(dir);
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True if `root` is currently LEAF-tagged (an empty or single-leaf
    /// tree); used by `count nodes` in the CLI.
    pub fn root_is_leaf(&self) -> bool {
        is_leaf_tagged(self.root())
    }
}
