use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;

use beet::config::{Config, IndexType, CACHE_DEFAULT};
use beet::error::Error;
use beet::index::{Index, OpenConfig};
use beet::iterator::Direction;

enum CleanupKind {
    Dir,
}

/// Removes its target directory on drop, mirroring the cleanup guard the
/// crate's own unit tests use for on-disk fixtures.
struct CleanUp(&'static str, CleanupKind);

impl CleanUp {
    fn dir(path: &'static str) -> Self {
        Self(path, CleanupKind::Dir)
    }
}

impl Drop for CleanUp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(self.0);
    }
}

fn u32_cmp(a: &[u8], b: &[u8]) -> Ordering {
    u32::from_le_bytes(a.try_into().unwrap()).cmp(&u32::from_le_bytes(b.try_into().unwrap()))
}

fn b(n: u32) -> Vec<u8> {
    n.to_le_bytes().to_vec()
}

fn plain_config(leaf: u32, internal: u32, cache: i32) -> Config {
    Config {
        index_type: IndexType::Plain,
        leaf_page_size: 4096,
        int_page_size: 4096,
        leaf_node_size: leaf,
        int_node_size: internal,
        key_size: 4,
        data_size: 4,
        leaf_cache_size: cache,
        int_cache_size: cache,
        sub_path: None,
        compare_name: Some("u32_cmp".to_string()),
        rsc_init_name: None,
        rsc_dest_name: None,
    }
}

fn open_config() -> OpenConfig {
    OpenConfig { compare: Box::new(u32_cmp), embedded: None }
}

#[test]
fn ascending_insert_grows_height() {
    let _cleanup = CleanUp::dir("tests/tmp/ascending");
    let index = Index::create("tests/tmp/ascending", plain_config(8, 8, CACHE_DEFAULT), open_config()).unwrap();

    for k in 0..500u32 {
        index.insert(&b(k), &b(k)).unwrap();
    }

    assert!(index.height().unwrap() >= 2);
    for k in 0..500u32 {
        assert_eq!(index.get(&b(k)).unwrap(), b(k));
    }
    index.close().unwrap();
}

#[test]
fn random_insert_hide_unhide_scan() {
    use rand::{seq::SliceRandom, thread_rng};

    let _cleanup = CleanUp::dir("tests/tmp/random_scan");
    let index = Index::create("tests/tmp/random_scan", plain_config(6, 6, CACHE_DEFAULT), open_config()).unwrap();

    let mut keys: Vec<u32> = (0..300).collect();
    keys.shuffle(&mut thread_rng());
    for &k in &keys {
        index.insert(&b(k), &b(k)).unwrap();
    }

    for k in (0..300u32).step_by(3) {
        index.hide(&b(k)).unwrap();
    }

    let mut cursor = index.range(None, None, Direction::Asc);
    let mut seen = Vec::new();
    loop {
        match cursor.next() {
            Ok((key, _)) => seen.push(u32::from_le_bytes(key.as_slice().try_into().unwrap())),
            Err(Error::Eof) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let expected: Vec<u32> = (0..300u32).filter(|k| k % 3 != 0).collect();
    assert_eq!(seen, expected);

    for k in (0..300u32).step_by(3) {
        index.unhide(&b(k)).unwrap();
    }
    for k in 0..300u32 {
        assert_eq!(index.get(&b(k)).unwrap(), b(k));
    }

    index.close().unwrap();
}

#[test]
fn host_index_nests_nothing_then_one_entry() {
    let _cleanup = CleanUp::dir("tests/tmp/host");
    let host_config = Config {
        index_type: IndexType::Host,
        leaf_page_size: 4096,
        int_page_size: 4096,
        leaf_node_size: 8,
        int_node_size: 8,
        key_size: 4,
        data_size: 4,
        leaf_cache_size: CACHE_DEFAULT,
        int_cache_size: CACHE_DEFAULT,
        sub_path: Some("sub".to_string()),
        compare_name: Some("u32_cmp".to_string()),
        rsc_init_name: None,
        rsc_dest_name: None,
    };
    let open = OpenConfig { compare: Box::new(u32_cmp), embedded: Some(Box::new(open_config())) };

    let index = Index::create("tests/tmp/host", host_config, open).unwrap();

    let mut outer_and_inner = b(1);
    outer_and_inner.extend_from_slice(&b(100));
    index.insert(&b(1), &outer_and_inner).unwrap();

    let mut cursor = index.range_with_subtree(None, None, Direction::Asc).unwrap();
    let (outer_key, _root_bytes) = cursor.next().unwrap();
    assert_eq!(outer_key, b(1));

    cursor.enter().unwrap();
    let (inner_key, inner_value) = cursor.next().unwrap();
    assert_eq!(inner_key, b(1));
    assert_eq!(inner_value, b(100));
    assert!(matches!(cursor.next(), Err(Error::Eof)));

    index.close().unwrap();
}

/// `Direction::Desc` nested-subtree walk: after the last (smallest-key)
/// outer entry is returned, the cursor's internal slot sits on the
/// sentinel value, and `enter()` must still resolve to that entry's own
/// subtree rather than the first one visited.
#[test]
fn host_index_nests_desc_direction() {
    let _cleanup = CleanUp::dir("tests/tmp/host_desc");
    let host_config = Config {
        index_type: IndexType::Host,
        leaf_page_size: 4096,
        int_page_size: 4096,
        leaf_node_size: 8,
        int_node_size: 8,
        key_size: 4,
        data_size: 4,
        leaf_cache_size: CACHE_DEFAULT,
        int_cache_size: CACHE_DEFAULT,
        sub_path: Some("sub".to_string()),
        compare_name: Some("u32_cmp".to_string()),
        rsc_init_name: None,
        rsc_dest_name: None,
    };
    let open = OpenConfig { compare: Box::new(u32_cmp), embedded: Some(Box::new(open_config())) };
    let index = Index::create("tests/tmp/host_desc", host_config, open).unwrap();

    for k in 1..=5u32 {
        let mut value = b(k);
        value.extend_from_slice(&b(k * 100));
        index.insert(&b(k), &value).unwrap();
    }

    let mut cursor = index.range_with_subtree(None, None, Direction::Desc).unwrap();
    for expected in (1..=5u32).rev() {
        let (outer_key, _root_bytes) = cursor.next().unwrap();
        assert_eq!(outer_key, b(expected));

        cursor.enter().unwrap();
        let (inner_key, inner_value) = cursor.next().unwrap();
        assert_eq!(inner_key, b(expected));
        assert_eq!(inner_value, b(expected * 100));
        assert!(matches!(cursor.next(), Err(Error::Eof)));
        cursor.leave();
    }
    assert!(matches!(cursor.next(), Err(Error::Eof)));

    index.close().unwrap();
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// `spec.md` §8 scenario 3: a HOST index over outer keys `1..99`, each
/// nesting the subtree `{k : gcd(n, k) = 1}` for `k` in a small range.
#[test]
fn host_index_scenario3_gcd_coprime_nesting() {
    let _cleanup = CleanUp::dir("tests/tmp/host_gcd");
    let host_config = Config {
        index_type: IndexType::Host,
        leaf_page_size: 4096,
        int_page_size: 4096,
        leaf_node_size: 8,
        int_node_size: 8,
        key_size: 4,
        data_size: 4,
        leaf_cache_size: CACHE_DEFAULT,
        int_cache_size: CACHE_DEFAULT,
        sub_path: Some("sub".to_string()),
        compare_name: Some("u32_cmp".to_string()),
        rsc_init_name: None,
        rsc_dest_name: None,
    };
    let open = OpenConfig { compare: Box::new(u32_cmp), embedded: Some(Box::new(open_config())) };
    let index = Index::create("tests/tmp/host_gcd", host_config, open).unwrap();

    for n in 1..99u32 {
        let coprime: Vec<u32> = (1..20u32).filter(|&k| gcd(n, k) == 1).collect();
        for (i, &k) in coprime.iter().enumerate() {
            let mut value = b(k);
            value.extend_from_slice(&b(k));
            if i == 0 {
                index.insert(&b(n), &value).unwrap();
            } else {
                index.upsert(&b(n), &value).unwrap();
            }
        }
    }

    let mut cursor = index.range_with_subtree(None, None, Direction::Asc).unwrap();
    for n in 1..99u32 {
        let (outer_key, _root_bytes) = cursor.next().unwrap();
        assert_eq!(outer_key, b(n));

        let expected: Vec<u32> = (1..20u32).filter(|&k| gcd(n, k) == 1).collect();

        cursor.enter().unwrap();
        let mut seen = Vec::new();
        loop {
            match cursor.next() {
                Ok((k, v)) => {
                    let k = u32::from_le_bytes(k.as_slice().try_into().unwrap());
                    assert_eq!(v, b(k));
                    seen.push(k);
                }
                Err(Error::Eof) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        cursor.leave();
        assert_eq!(seen, expected);
    }
    assert!(matches!(cursor.next(), Err(Error::Eof)));

    index.close().unwrap();
}

#[test]
fn close_and_reopen_preserves_data_and_links() {
    let _cleanup = CleanUp::dir("tests/tmp/reopen");
    {
        let index = Index::create("tests/tmp/reopen", plain_config(6, 6, CACHE_DEFAULT), open_config()).unwrap();
        for k in 0..50u32 {
            index.insert(&b(k), &b(k + 1)).unwrap();
        }
        index.close().unwrap();
    }

    let index = Index::open("tests/tmp/reopen", open_config()).unwrap();
    for k in 0..50u32 {
        assert_eq!(index.get(&b(k)).unwrap(), b(k + 1));
    }

    let mut cursor = index.range(None, None, Direction::Asc);
    let mut count = 0;
    loop {
        match cursor.next() {
            Ok(_) => count += 1,
            Err(Error::Eof) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(count, 50);
    index.close().unwrap();
}

#[test]
fn ten_concurrent_writers_all_keys_present() {
    let _cleanup = CleanUp::dir("tests/tmp/concurrent");
    let index = Arc::new(Index::create("tests/tmp/concurrent", plain_config(8, 8, CACHE_DEFAULT), open_config()).unwrap());

    let handles: Vec<_> = (0..10u32)
        .map(|t| {
            let index = index.clone();
            thread::spawn(move || {
                for i in 0..100u32 {
                    let k = t * 100 + i;
                    index.insert(&b(k), &b(k)).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for k in 0..1000u32 {
        assert_eq!(index.get(&b(k)).unwrap(), b(k));
    }

    Arc::try_unwrap(index).ok().unwrap().close().unwrap();
}

#[test]
fn pager_pressure_forces_no_resource_retries() {
    let _cleanup = CleanUp::dir("tests/tmp/pressure");
    // leafCacheSize/intCacheSize = 4: every random read must still
    // succeed, relying on the tree layer's internal NO_RESOURCE retry.
    let index = Index::create("tests/tmp/pressure", plain_config(8, 8, 4), open_config()).unwrap();

    for k in 0..2000u32 {
        index.insert(&b(k), &b(k)).unwrap();
    }

    use rand::{seq::SliceRandom, thread_rng};
    let mut reads: Vec<u32> = (0..2000u32).collect();
    reads.shuffle(&mut thread_rng());
    for _ in 0..5 {
        for &k in &reads {
            assert_eq!(index.get(&b(k)).unwrap(), b(k));
        }
    }

    index.close().unwrap();
}
