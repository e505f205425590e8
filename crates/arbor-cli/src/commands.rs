use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use arbor_store::{BackingStore, CachedStore, FsBackingStore};
use arbor_tree::{Accessor, PersistentTree};
use arbor_types::ContentId;
use colored::Colorize;
use serde_json::json;
use tracing::debug;

use crate::cli::*;
use crate::config::{ArborToml, CONFIG_FILE};

/// File inside the store directory holding the latest committed root.
const HEAD_FILE: &str = "HEAD";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        command,
        store,
        root,
        format,
        ..
    } = cli;
    let root = root.as_deref();
    match command {
        Command::Init(args) => cmd_init(&store, &args),
        Command::Put(args) => cmd_put(&Session::open(&store, root)?, args, format),
        Command::Get(args) => cmd_get(&Session::open(&store, root)?, args, format),
        Command::Delete(args) => cmd_delete(&Session::open(&store, root)?, args, format),
        Command::Scan(args) => cmd_scan(&Session::open(&store, root)?, args, format),
        Command::Dump(_) => cmd_dump(&Session::open(&store, root)?),
        Command::Stats(_) => cmd_stats(&Session::open(&store, root)?, format),
        Command::Verify(_) => cmd_verify(&Session::open(&store, root)?),
    }
}

/// An opened store plus the tree version selected on the command line.
struct Session {
    dir: PathBuf,
    config: ArborToml,
    store: CachedStore<FsBackingStore>,
    root: Option<ContentId>,
}

impl Session {
    /// Open an initialized store at the version named by `root`, else HEAD.
    fn open(dir: &Path, root: Option<&str>) -> anyhow::Result<Self> {
        if !dir.join("objects").is_dir() {
            bail!("no store at {} (run `arbor init` first)", dir.display());
        }
        let root = match root {
            Some(hex) => Some(ContentId::from_hex(hex).context("invalid --root")?),
            None => read_head(dir)?,
        };
        Self::load(dir, root)
    }

    fn load(dir: &Path, root: Option<ContentId>) -> anyhow::Result<Self> {
        let config = ArborToml::load(dir)?;
        let inner = FsBackingStore::open(config.store.clone())?;
        let store = CachedStore::new(inner, config.store.cache_capacity);
        debug!(store = %dir.display(), root = ?root, "opened session");
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            store,
            root,
        })
    }

    fn accessor(&self) -> Accessor<'_> {
        Accessor::new(&self.store)
    }

    fn tree(&self) -> anyhow::Result<PersistentTree> {
        let config = self.config.tree.clone();
        Ok(match self.root {
            Some(root) => PersistentTree::open_with_config(root, config)?,
            None => PersistentTree::with_config(config)?,
        })
    }

    /// Commit `tree`, record it as HEAD and return its root id.
    fn commit(&self, acc: &mut Accessor<'_>, tree: &mut PersistentTree) -> anyhow::Result<ContentId> {
        let root = acc.commit(tree)?;
        write_head(&self.dir, root)?;
        Ok(root)
    }
}

fn read_head(dir: &Path) -> anyhow::Result<Option<ContentId>> {
    let path = dir.join(HEAD_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let id = ContentId::from_hex(text.trim()).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(id))
}

fn write_head(dir: &Path, root: ContentId) -> anyhow::Result<()> {
    let path = dir.join(HEAD_FILE);
    fs::write(&path, format!("{}\n", root.to_hex()))
        .with_context(|| format!("writing {}", path.display()))
}

fn show(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn cmd_init(dir: &Path, args: &InitArgs) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let config_path = dir.join(CONFIG_FILE);
    if args.force || !config_path.exists() {
        fs::write(&config_path, ArborToml::default().to_toml()?)
            .with_context(|| format!("writing {}", config_path.display()))?;
    }
    let session = Session::load(dir, None)?;
    let mut acc = session.accessor();
    let mut tree = session.tree()?;
    let root = session.commit(&mut acc, &mut tree)?;
    println!("{} Initialized Arbor store in {}", "✓".green().bold(), dir.display().to_string().bold());
    println!("  Root: {}", root.to_hex().yellow());
    Ok(())
}

fn print_root(root: ContentId, changed: bool, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", json!({ "root": root.to_hex(), "changed": changed })),
        OutputFormat::Text if changed => println!("{} Root: {}", "✓".green().bold(), root.to_hex().yellow()),
        OutputFormat::Text => println!("{} Root: {}", "=".dimmed(), root.to_hex().yellow()),
    }
}

fn cmd_put(session: &Session, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut acc = session.accessor();
    let mut tree = session.tree()?;
    tree.put(&mut acc, args.key.as_bytes(), args.value.as_bytes())?;
    let changed = !acc.arena().is_empty() || session.root.is_none();
    let root = session.commit(&mut acc, &mut tree)?;
    print_root(root, changed, format);
    Ok(())
}

fn cmd_get(session: &Session, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let acc = session.accessor();
    let tree = session.tree()?;
    let value = tree.get(&acc, args.key.as_bytes())?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "key": args.key, "value": value.as_deref().map(show) })
        ),
        OutputFormat::Text => match value {
            Some(v) => println!("{}", show(&v)),
            None => bail!("key {:?} not found", args.key),
        },
    }
    Ok(())
}

fn cmd_delete(session: &Session, args: DeleteArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut acc = session.accessor();
    let mut tree = session.tree()?;
    if !tree.delete(&mut acc, args.key.as_bytes())? {
        if format == OutputFormat::Text {
            println!("{} key {:?} not present", "!".yellow().bold(), args.key);
        }
        if let Some(root) = session.root {
            print_root(root, false, format);
        }
        return Ok(());
    }
    let root = session.commit(&mut acc, &mut tree)?;
    print_root(root, true, format);
    Ok(())
}

fn cmd_scan(session: &Session, args: ScanArgs, format: OutputFormat) -> anyhow::Result<()> {
    let acc = session.accessor();
    let tree = session.tree()?;
    let limit = args.limit.unwrap_or(usize::MAX);
    let mut rows = Vec::new();
    if limit > 0 {
        let mut visit = |k: &[u8], v: &[u8]| {
            rows.push((show(k), show(v)));
            rows.len() < limit
        };
        match (args.from.as_deref(), args.bulk) {
            (Some(_), Some(_)) => bail!("--from and --bulk cannot be combined"),
            (Some(from), None) => tree.for_each_from(&acc, from.as_bytes(), &mut visit)?,
            (None, Some(chunk)) => tree.for_each_bulk(&acc, chunk, &mut visit)?,
            (None, None) => tree.for_each(&acc, &mut visit)?,
        };
    }
    match format {
        OutputFormat::Json => {
            let entries: Vec<_> = rows
                .iter()
                .map(|(k, v)| json!({ "key": k, "value": v }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            for (k, v) in &rows {
                println!("{} = {}", k.bold(), v);
            }
            println!("{}", format!("({} entries)", rows.len()).dimmed());
        }
    }
    Ok(())
}

fn cmd_dump(session: &Session) -> anyhow::Result<()> {
    let acc = session.accessor();
    let tree = session.tree()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    tree.dump(&acc, &mut out, |v| format!("{:?}", show(v)))?;
    out.flush()?;
    Ok(())
}

fn cmd_stats(session: &Session, format: OutputFormat) -> anyhow::Result<()> {
    let acc = session.accessor();
    let tree = session.tree()?;
    let stats = tree.stats(&acc)?;
    let store = session.store.inner().stats()?;
    let cache = session.store.stats();
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "root": session.root.map(|r| r.to_hex()),
                "tree": stats,
                "store": { "objects": store.objects, "bytes": store.bytes },
                "cache": { "hits": cache.hits, "misses": cache.misses },
            }))?
        ),
        OutputFormat::Text => {
            let root = session
                .root
                .map(|r| r.to_hex())
                .unwrap_or_else(|| "(empty)".into());
            println!("Root: {}", root.yellow());
            println!("  Entries: {}", stats.entries.to_string().bold());
            println!("  Height: {}", stats.height);
            println!(
                "  Pages: {} leaf, {} internal, {} value blobs",
                stats.leaf_pages, stats.internal_pages, stats.value_blobs
            );
            println!(
                "Store: {} objects, {} bytes",
                store.objects.to_string().bold(),
                store.bytes
            );
            println!("Cache: {} hits, {} misses", cache.hits, cache.misses);
        }
    }
    Ok(())
}

fn cmd_verify(session: &Session) -> anyhow::Result<()> {
    let acc = session.accessor();
    let tree = session.tree()?;
    tree.verify(&acc)?;
    if let Some(root) = session.root {
        if !session.store.contains(&root)? {
            bail!("root {} is not in the store", root.short_hex());
        }
    }
    let stats = tree.stats(&acc)?;
    println!("{} Tree structure verified", "✓".green().bold());
    println!("  Ordering: {}", "strict".green());
    println!("  Fan-out: {}", "within bounds".green());
    println!("  Leaves: {} at depth {}", stats.leaf_pages, stats.height);
    Ok(())
}
