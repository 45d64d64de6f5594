//! Human-readable dump of a model, for debugging. Not meant to be read back.

use std::io::{self, Write};

use ngram_trie::Tree;
use serde::{Deserialize, Serialize};
use symbol_core::SymbolId;
use symbol_dict::Dictionary;

/// Sections to include in a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpFlags {
    pub forward: bool,
    pub backward: bool,
    pub dictionary: bool,
}

impl Default for DumpFlags {
    fn default() -> Self {
        DumpFlags {
            forward: true,
            backward: true,
            dictionary: true,
        }
    }
}

struct Line {
    depth: usize,
    symbol: SymbolId,
    value: u32,
    child_sum: u64,
    stamp: u32,
}

fn write_tree<W: Write>(out: &mut W, name: &str, tree: &Tree, dict: &Dictionary) -> io::Result<()> {
    writeln!(out, "# {name} tree ({} nodes)", tree.len())?;
    let mut lines = Vec::with_capacity(tree.len());
    tree.walk(|depth, _, node| {
        lines.push(Line {
            depth,
            symbol: node.symbol,
            value: node.value,
            child_sum: node.child_sum,
            stamp: node.stamp,
        })
    });
    for line in lines {
        let word = dict.get(line.symbol).unwrap_or(&b"?"[..]);
        writeln!(
            out,
            "{:indent$}{} {:?} value={} child_sum={} stamp={}",
            "",
            line.symbol.as_u32(),
            String::from_utf8_lossy(word),
            line.value,
            line.child_sum,
            line.stamp,
            indent = line.depth * 2,
        )?;
    }
    Ok(())
}

fn write_dictionary<W: Write>(out: &mut W, dict: &Dictionary) -> io::Result<()> {
    let totals = dict.totals();
    writeln!(
        out,
        "# dictionary ({} words, {} nodes, {} observations)",
        dict.len(),
        totals.node_count,
        totals.value_sum
    )?;
    for (id, word) in dict.iter() {
        let stats = dict.stats(id);
        writeln!(
            out,
            "{}\t{:?}\tnodes={}\tvalue={}",
            id.as_u32(),
            String::from_utf8_lossy(word),
            stats.node_count,
            stats.value_sum
        )?;
    }
    Ok(())
}

pub(crate) fn write_dump<W: Write>(
    out: &mut W,
    flags: DumpFlags,
    order: u8,
    forward: &Tree,
    backward: &Tree,
    dict: &Dictionary,
) -> io::Result<()> {
    writeln!(out, "# order {order}")?;
    if flags.forward {
        write_tree(out, "forward", forward, dict)?;
    }
    if flags.backward {
        write_tree(out, "backward", backward, dict)?;
    }
    if flags.dictionary {
        write_dictionary(out, dict)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_lines_are_indented_by_depth() {
        let mut dict = Dictionary::new();
        let a = dict.intern(b"CAT");
        let mut tree = Tree::new();
        let n = tree.add_observation(tree.root(), a, 4).node;
        tree.add_observation(n, symbol_core::FIN_ID, 4);

        let mut out = Vec::new();
        write_tree(&mut out, "forward", &tree, &dict).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# forward tree (3 nodes)");
        assert!(lines[1].starts_with("0 \"<ERROR>\""));
        assert_eq!(lines[2], "  2 \"CAT\" value=1 child_sum=1 stamp=4");
        assert_eq!(lines[3], "    1 \"<FIN>\" value=1 child_sum=0 stamp=4");
    }

    #[test]
    fn flags_select_sections() {
        let dict = Dictionary::new();
        let tree = Tree::new();
        let flags = DumpFlags {
            forward: false,
            backward: false,
            dictionary: true,
        };
        let mut out = Vec::new();
        write_dump(&mut out, flags, 5, &tree, &tree, &dict).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("forward tree"));
        assert!(text.contains("# dictionary (2 words"));
        assert!(text.contains("1\t\"<FIN>\"\tnodes=0\tvalue=0"));
    }

    #[test]
    fn flags_serde_round_trip() {
        let json = serde_json::to_string(&DumpFlags::default()).unwrap();
        let back: DumpFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DumpFlags::default());
    }
}
