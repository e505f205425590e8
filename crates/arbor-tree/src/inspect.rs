//! Read-only structural tools: debug dump, statistics, invariant checks.

use std::io;

use arbor_types::PageRef;
use serde::{Deserialize, Serialize};

use crate::accessor::Accessor;
use crate::error::{TreeError, TreeResult};
use crate::page::{LeafValue, Page};
use crate::tree::PersistentTree;

/// Shape summary of one tree version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    /// Levels from root to leaves; 0 for the empty tree.
    pub height: usize,
    pub leaf_pages: usize,
    pub internal_pages: usize,
    pub entries: usize,
    /// Pages still living in the write arena.
    pub local_pages: usize,
    /// Pages already in the backing store.
    pub committed_pages: usize,
    /// Out-of-line value blobs.
    pub value_blobs: usize,
}

impl PersistentTree {
    /// Write an indented outline of every page to `sink`.
    ///
    /// Keys are printed with ASCII escapes; values go through `fmt_value`.
    pub fn dump<W, V>(&self, acc: &Accessor<'_>, sink: &mut W, fmt_value: V) -> TreeResult<()>
    where
        W: io::Write,
        V: Fn(&[u8]) -> String,
    {
        match self.root() {
            None => writeln!(sink, "(empty)")?,
            Some(root) => dump_page(acc, root, 0, sink, &fmt_value)?,
        }
        Ok(())
    }

    /// Walk the whole tree and count its pages and entries.
    pub fn stats(&self, acc: &Accessor<'_>) -> TreeResult<TreeStats> {
        let mut stats = TreeStats::default();
        if let Some(root) = self.root() {
            collect_stats(acc, root, 1, &mut stats)?;
        }
        Ok(stats)
    }

    /// Check ordering, separator bounds, fan-out bounds and uniform leaf
    /// depth. The root is exempt from the minimum fan-out.
    pub fn verify(&self, acc: &Accessor<'_>) -> TreeResult<()> {
        let Some(root) = self.root() else {
            return Ok(());
        };
        let mut leaf_depth = None;
        let checker = Checker {
            acc,
            min: self.config().min_fanout,
            max: self.config().max_fanout,
        };
        checker.check(root, true, None, None, 1, &mut leaf_depth)
    }
}

fn dump_page<W, V>(
    acc: &Accessor<'_>,
    at: PageRef,
    depth: usize,
    sink: &mut W,
    fmt_value: &V,
) -> TreeResult<()>
where
    W: io::Write,
    V: Fn(&[u8]) -> String,
{
    let pad = "  ".repeat(depth);
    match acc.load(at)? {
        Page::Leaf(leaf) => {
            writeln!(sink, "{pad}leaf {at} ({} entries)", leaf.len())?;
            for (key, value) in leaf.keys.iter().zip(&leaf.values) {
                let shown = fmt_value(&acc.load_value(value)?);
                match value {
                    LeafValue::Inline(_) => {
                        writeln!(sink, "{pad}  {} = {shown}", key.escape_ascii())?
                    }
                    LeafValue::Blob { target, len } => writeln!(
                        sink,
                        "{pad}  {} = {shown} [blob {target}, {len} bytes]",
                        key.escape_ascii()
                    )?,
                }
            }
        }
        Page::Internal(node) => {
            writeln!(sink, "{pad}internal {at} ({} children)", node.len())?;
            for (i, child) in node.children.iter().enumerate() {
                if i > 0 {
                    writeln!(sink, "{pad}  >= {}", node.keys[i - 1].escape_ascii())?;
                }
                dump_page(acc, *child, depth + 1, sink, fmt_value)?;
            }
        }
    }
    Ok(())
}

fn collect_stats(
    acc: &Accessor<'_>,
    at: PageRef,
    depth: usize,
    stats: &mut TreeStats,
) -> TreeResult<()> {
    stats.height = stats.height.max(depth);
    if at.is_local() {
        stats.local_pages += 1;
    } else {
        stats.committed_pages += 1;
    }
    match acc.load(at)? {
        Page::Leaf(leaf) => {
            stats.leaf_pages += 1;
            stats.entries += leaf.len();
            stats.value_blobs += leaf
                .values
                .iter()
                .filter(|v| matches!(v, LeafValue::Blob { .. }))
                .count();
        }
        Page::Internal(node) => {
            stats.internal_pages += 1;
            for child in &node.children {
                collect_stats(acc, *child, depth + 1, stats)?;
            }
        }
    }
    Ok(())
}

struct Checker<'a, 's> {
    acc: &'a Accessor<'s>,
    min: usize,
    max: usize,
}

impl Checker<'_, '_> {
    /// Check the subtree at `at`, whose keys must lie in `[lower, upper)`.
    fn check(
        &self,
        at: PageRef,
        is_root: bool,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> TreeResult<()> {
        let page = self.acc.load(at)?;
        let fail = |what: String| Err(TreeError::InvariantViolation(format!("page {at}: {what}")));

        let len = page.len();
        if len > self.max {
            return fail(format!("{len} slots exceeds max fan-out {}", self.max));
        }
        if !is_root && len < self.min {
            return fail(format!("{len} slots below min fan-out {}", self.min));
        }

        let keys = match &page {
            Page::Leaf(leaf) => &leaf.keys,
            Page::Internal(node) => &node.keys,
        };
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return fail("keys not strictly ascending".into());
        }
        if let (Some(lower), Some(first)) = (lower, keys.first()) {
            if first.as_slice() < lower {
                return fail(format!("key {} below separator", first.escape_ascii()));
            }
        }
        if let (Some(upper), Some(last)) = (upper, keys.last()) {
            if last.as_slice() >= upper {
                return fail(format!("key {} at or above separator", last.escape_ascii()));
            }
        }

        match page {
            Page::Leaf(_) => match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return fail(format!("leaf at depth {depth}, expected {expected}"));
                }
                Some(_) => {}
            },
            Page::Internal(node) => {
                if is_root && node.len() < 2 {
                    return fail("internal root with a single child".into());
                }
                for (i, child) in node.children.iter().enumerate() {
                    let lo = if i == 0 { lower } else { Some(node.keys[i - 1].as_slice()) };
                    let hi = node.keys.get(i).map(Vec::as_slice).or(upper);
                    self.check(*child, false, lo, hi, depth + 1, leaf_depth)?;
                }
            }
        }
        Ok(())
    }
}
