use std::cmp::Ordering;
use std::env;
use std::process::ExitCode;

use beet::config::{Config, IndexType, CACHE_DEFAULT};
use beet::error::{Error, Result};
use beet::index::{Index, OpenConfig};
use beet::iterator::Direction;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("beet: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<()> {
    match args.first().map(String::as_str) {
        None | Some("help") => {
            print_help();
            Ok(())
        }
        Some("version") => {
            println!("beet {VERSION}");
            Ok(())
        }
        Some("create") => cmd_create(&args[1..]),
        Some("config") => cmd_config(&args[1..]),
        Some("height") => cmd_height(&args[1..]),
        Some("count") => cmd_count(&args[1..]),
        Some(other) => {
            eprintln!("beet: unknown command '{other}'");
            Err(Error::InvalidArgument("command"))
        }
    }
}

fn print_help() {
    println!(
        "usage: beet <command> [args]\n\n\
         commands:\n\
         \x20 help\n\
         \x20 version\n\
         \x20 create <path> -leaf N -internal N -key N [-data N] -compare SYM \
         [-init SYM] [-destroy SYM] [-type {{1|2|3}}] [-subpath P] [-cache N] [-standalone BOOL]\n\
         \x20 config <path>\n\
         \x20 height <path>\n\
         \x20 count {{leaves|internals|nodes|keys}} <path>"
    );
}

/// Minimal positional + `-flag value` scanner, in the teacher's style of
/// hand-rolling argument handling rather than reaching for an arg-parsing
/// crate (`src/bin/cli.rs` never parses flags at all; this adds only what
/// the CLI surface actually needs).
struct Args<'a> {
    positional: Vec<&'a str>,
    flags: std::collections::HashMap<&'a str, &'a str>,
}

fn scan_args(args: &[String]) -> Args<'_> {
    let mut positional = Vec::new();
    let mut flags = std::collections::HashMap::new();

    let mut i = 0;
    while i < args.len() {
        let a = args[i].as_str();
        if let Some(name) = a.strip_prefix('-') {
            if i + 1 < args.len() {
                flags.insert(name, args[i + 1].as_str());
                i += 2;
                continue;
            }
        }
        positional.push(a);
        i += 1;
    }

    Args { positional, flags }
}

fn parse_u32(args: &Args, flag: &'static str) -> Result<u32> {
    args.flags
        .get(flag)
        .ok_or(Error::InvalidArgument(flag))?
        .parse()
        .map_err(|_| Error::InvalidArgument(flag))
}

fn lexicographic(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

fn open_config() -> OpenConfig {
    OpenConfig { compare: Box::new(lexicographic), embedded: None }
}

fn cmd_create(rest: &[String]) -> Result<()> {
    let args = scan_args(rest);
    let path = *args.positional.first().ok_or(Error::InvalidArgument("path"))?;

    let leaf_node_size = parse_u32(&args, "leaf")?;
    let int_node_size = parse_u32(&args, "internal")?;
    let key_size = parse_u32(&args, "key")?;
    let data_size = args.flags.get("data").and_then(|s| s.parse().ok()).unwrap_or(0);
    let index_type = match args.flags.get("type").copied().unwrap_or("2") {
        "1" => IndexType::Null,
        "2" => IndexType::Plain,
        "3" => IndexType::Host,
        _ => return Err(Error::InvalidArgument("type")),
    };
    let cache = args.flags.get("cache").and_then(|s| s.parse().ok()).unwrap_or(CACHE_DEFAULT);
    let sub_path = args.flags.get("subpath").map(|s| s.to_string());
    let compare_name = args.flags.get("compare").map(|s| s.to_string());
    let rsc_init_name = args.flags.get("init").map(|s| s.to_string());
    let rsc_dest_name = args.flags.get("destroy").map(|s| s.to_string());

    // A 4096-byte page is the library's default leaf/internal page size;
    // the CLI does not expose page-size tuning independently of node
    // capacity.
    let leaf_page_size = 4096;
    let int_page_size = 4096;

    let config = Config {
        index_type,
        leaf_page_size,
        int_page_size,
        leaf_node_size,
        int_node_size,
        key_size,
        data_size,
        leaf_cache_size: cache,
        int_cache_size: cache,
        sub_path,
        compare_name,
        rsc_init_name,
        rsc_dest_name,
    };

    let open = match index_type {
        IndexType::Host => OpenConfig { compare: Box::new(lexicographic), embedded: Some(Box::new(open_config())) },
        _ => open_config(),
    };

    let index = Index::create(path, config, open)?;
    index.close()?;
    println!("created {path}");
    Ok(())
}

fn cmd_config(rest: &[String]) -> Result<()> {
    let path = rest.first().ok_or(Error::InvalidArgument("path"))?;
    let index = Index::open(path, open_config())?;
    let c = index.config();
    println!("indexType:      {:?}", c.index_type);
    println!("leafPageSize:   {}", c.leaf_page_size);
    println!("intPageSize:    {}", c.int_page_size);
    println!("leafNodeSize:   {}", c.leaf_node_size);
    println!("intNodeSize:    {}", c.int_node_size);
    println!("keySize:        {}", c.key_size);
    println!("dataSize:       {}", c.data_size);
    println!("leafCacheSize:  {}", c.leaf_cache_size);
    println!("intCacheSize:   {}", c.int_cache_size);
    println!("subPath:        {}", c.sub_path.as_deref().unwrap_or("(none)"));
    println!("compareName:    {}", c.compare_name.as_deref().unwrap_or("(none)"));
    index.close()
}

fn cmd_height(rest: &[String]) -> Result<()> {
    let path = rest.first().ok_or(Error::InvalidArgument("path"))?;
    let index = Index::open(path, open_config())?;
    println!("{}", index.height()?);
    index.close()
}

fn cmd_count(rest: &[String]) -> Result<()> {
    let what = rest.first().map(String::as_str).ok_or(Error::InvalidArgument("what"))?;
    let path = rest.get(1).ok_or(Error::InvalidArgument("path"))?;
    let index = Index::open(path, open_config())?;

    let count = match what {
        "leaves" => file_page_count(path, "leaf", index.config().leaf_page_size)?,
        "internals" => file_page_count(path, "nonleaf", index.config().int_page_size)?,
        "nodes" => {
            file_page_count(path, "leaf", index.config().leaf_page_size)?
                + file_page_count(path, "nonleaf", index.config().int_page_size)?
        }
        "keys" => {
            let mut cursor = index.range(None, None, Direction::Asc);
            let mut n = 0u64;
            loop {
                match cursor.next() {
                    Ok(_) => n += 1,
                    Err(Error::Eof) => break,
                    Err(e) => return Err(e),
                }
            }
            n
        }
        other => {
            eprintln!("beet: unknown count target '{other}'");
            return Err(Error::InvalidArgument("what"));
        }
    };

    println!("{count}");
    index.close()
}

fn file_page_count(dir: &str, name: &str, page_size: u32) -> Result<u64> {
    let path = std::path::Path::new(dir).join(name);
    let len = std::fs::metadata(path)?.len();
    Ok(len / page_size as u64)
}
