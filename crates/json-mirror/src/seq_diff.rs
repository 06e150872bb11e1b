//! Positional diff of two sequences.
//!
//! Produces an edit script over the *original* indices of both sequences.
//! Adjacent deletions and insertions of composites of the same kind are
//! paired into [`SeqEdit::Mix`], marking an item that should be patched in
//! place rather than replaced.

use json_mirror_doc::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqEdit {
    /// Items are equal.
    Eql { src: usize, dst: usize },
    /// The source item is removed.
    Del { src: usize },
    /// The destination item is inserted.
    Ins { dst: usize },
    /// Both items are composites of the same kind but differ.
    Mix { src: usize, dst: usize },
}

pub fn diff(src: &[Value], dst: &[Value]) -> Vec<SeqEdit> {
    let prefix = src
        .iter()
        .zip(dst)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = src[prefix..]
        .iter()
        .rev()
        .zip(dst[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let mut edits = Vec::with_capacity(src.len().max(dst.len()));
    edits.extend((0..prefix).map(|i| SeqEdit::Eql { src: i, dst: i }));

    let raw = lcs_edits(
        &src[prefix..src.len() - suffix],
        &dst[prefix..dst.len() - suffix],
        prefix,
    );
    pair_runs(src, dst, &raw, &mut edits);

    let src_tail = src.len() - suffix;
    let dst_tail = dst.len() - suffix;
    edits.extend((0..suffix).map(|i| SeqEdit::Eql {
        src: src_tail + i,
        dst: dst_tail + i,
    }));
    edits
}

/// Largest LCS table, in cells, built for the differing middle of two
/// sequences. Larger middles are diffed as "delete all, insert all", which
/// pairing then turns into in-place patches position by position.
const LCS_CELL_LIMIT: usize = 1 << 20;

/// Longest-common-subsequence edit script. Deletions are preferred over
/// insertions on ties, so a replaced item yields `Del` then `Ins`.
///
/// Costs `(n + 1) * (m + 1)` `u32` cells, capped by [`LCS_CELL_LIMIT`].
fn lcs_edits(src: &[Value], dst: &[Value], base: usize) -> Vec<SeqEdit> {
    let (n, m) = (src.len(), dst.len());
    if (n + 1).saturating_mul(m + 1) > LCS_CELL_LIMIT {
        let mut edits = Vec::with_capacity(n + m);
        edits.extend((0..n).map(|i| SeqEdit::Del { src: base + i }));
        edits.extend((0..m).map(|j| SeqEdit::Ins { dst: base + j }));
        return edits;
    }
    // table[i][j] = LCS length of src[i..] and dst[j..]
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if src[i] == dst[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut edits = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if src[i] == dst[j] {
            edits.push(SeqEdit::Eql { src: base + i, dst: base + j });
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            edits.push(SeqEdit::Del { src: base + i });
            i += 1;
        } else {
            edits.push(SeqEdit::Ins { dst: base + j });
            j += 1;
        }
    }
    edits.extend((i..n).map(|i| SeqEdit::Del { src: base + i }));
    edits.extend((j..m).map(|j| SeqEdit::Ins { dst: base + j }));
    edits
}

fn pair_runs(src: &[Value], dst: &[Value], raw: &[SeqEdit], out: &mut Vec<SeqEdit>) {
    let mut dels: Vec<usize> = Vec::new();
    let mut inss: Vec<usize> = Vec::new();
    for edit in raw {
        match *edit {
            SeqEdit::Del { src } => dels.push(src),
            SeqEdit::Ins { dst } => inss.push(dst),
            eql => {
                flush_run(src, dst, &mut dels, &mut inss, out);
                out.push(eql);
            }
        }
    }
    flush_run(src, dst, &mut dels, &mut inss, out);
}

fn flush_run(
    src: &[Value],
    dst: &[Value],
    dels: &mut Vec<usize>,
    inss: &mut Vec<usize>,
    out: &mut Vec<SeqEdit>,
) {
    for k in 0..dels.len().max(inss.len()) {
        match (dels.get(k).copied(), inss.get(k).copied()) {
            (Some(s), Some(d)) if src[s].same_composite_kind(&dst[d]) => {
                out.push(SeqEdit::Mix { src: s, dst: d });
            }
            (Some(s), Some(d)) => {
                out.push(SeqEdit::Del { src: s });
                out.push(SeqEdit::Ins { dst: d });
            }
            (Some(s), None) => out.push(SeqEdit::Del { src: s }),
            (None, Some(d)) => out.push(SeqEdit::Ins { dst: d }),
            (None, None) => {}
        }
    }
    dels.clear();
    inss.clear();
}
