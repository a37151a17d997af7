/*!
Suffix index over the source data.

Suffixes of the source are sorted once by `suffix_array` and queried here by
binary search. Each probe starts comparing after the prefix already known to
be shared with both search bounds, so a query costs about
`O(log n + match length)` byte comparisons in typical inputs.

Among all source offsets yielding the longest match the smallest one is
reported, which is resolved by a range minimum query over the suffix ranks
sharing the matched prefix.
*/

use super::error::{Error, Result};
use std::cmp::Ordering;
use suffix_array::SuffixArray;


/// Max length of the source data.
pub use suffix_array::MAX_LENGTH;

/// Number of ranks summarized by one entry of the range minimum table.
const BLOCK: usize = 64;

/// The longest match found for a target position.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Match {
    /// Start of the match in the source (0 if nothing matched).
    pub offset: usize,

    /// Count of matched bytes.
    pub len: usize,
}

impl Match {
    const NONE: Match = Match { offset: 0, len: 0 };
}

/// Sorted suffixes of the source data.
pub struct SuffixIndex<'s> {
    s: &'s [u8],
    sa: Vec<u32>,
    rmq: RangeMin,
}

impl<'s> SuffixIndex<'s> {
    /// Sort all suffixes of the source.
    ///
    /// Returns error if the source is too large to be indexed.
    pub fn new(s: &'s [u8]) -> Result<Self> {
        if s.len() > MAX_LENGTH {
            return Err(Error::ResourceExhausted(format!(
                "source of {} bytes exceeds the indexable maximum of {} bytes",
                s.len(),
                MAX_LENGTH
            )));
        }

        let sa = if s.is_empty() {
            Vec::new()
        } else {
            let (_, mut sa) = SuffixArray::new(s).into_parts();
            // The empty suffix is useless for matching.
            sa.retain(|&i| (i as usize) < s.len());
            sa
        };
        let rmq = RangeMin::new(&sa[..]);
        log::trace!("indexed {} source suffixes", sa.len());

        Ok(SuffixIndex { s, sa, rmq })
    }

    /// The indexed source.
    pub fn source(&self) -> &'s [u8] {
        self.s
    }

    /// Count of indexed suffixes.
    pub fn len(&self) -> usize {
        self.sa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sa.is_empty()
    }

    /// Source offsets in lexicographic order of their suffixes.
    pub fn offsets(&self) -> &[u32] {
        &self.sa[..]
    }

    /// Longest match of `target[cursor..]` in the source.
    pub fn longest_match(&self, target: &[u8], cursor: usize) -> Match {
        match target.get(cursor..) {
            Some(pat) => self.search(pat),
            None => Match::NONE,
        }
    }

    /// Longest match of a pattern in the source, preferring the smallest
    /// offset among equally long matches.
    pub fn search(&self, pat: &[u8]) -> Match {
        if self.sa.is_empty() || pat.is_empty() {
            return Match::NONE;
        }

        // The longest common prefix is shared with a neighbour of the
        // insertion point.
        let rank = self.bound(pat, false);
        let mut len = 0;
        if rank > 0 {
            len = lcp(pat, self.suffix(rank - 1));
        }
        if rank < self.sa.len() {
            len = Ord::max(len, lcp(pat, self.suffix(rank)));
        }
        if len == 0 {
            return Match::NONE;
        }

        let prefix = &pat[..len];
        let lo = self.bound(prefix, false);
        let hi = self.bound(prefix, true);
        debug_assert!(lo < hi);
        Match {
            offset: self.rmq.min(&self.sa[..], lo, hi) as usize,
            len,
        }
    }

    #[inline]
    fn suffix(&self, rank: usize) -> &'s [u8] {
        &self.s[self.sa[rank] as usize..]
    }

    /// Finds the first rank whose suffix, truncated to the pattern length,
    /// is not less than the pattern (`upper == false`) or greater than the
    /// pattern (`upper == true`).
    fn bound(&self, pat: &[u8], upper: bool) -> usize {
        let mut lo = 0;
        let mut hi = self.sa.len();
        let mut lo_lcp = 0;
        let mut hi_lcp = 0;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let suf = self.suffix(mid);

            // Every suffix ranked between the bounds shares this prefix.
            let skip = Ord::min(Ord::min(lo_lcp, hi_lcp), suf.len());
            let k = skip + lcp(&pat[skip..], &suf[skip..]);

            let ord = if k == pat.len() {
                if upper {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            } else if k == suf.len() {
                Ordering::Less
            } else {
                suf[k].cmp(&pat[k])
            };

            if ord == Ordering::Less {
                lo = mid + 1;
                lo_lcp = k;
            } else {
                hi = mid;
                hi_lcp = k;
            }
        }
        lo
    }
}

/// Count the longest common prefix of two strings.
#[inline]
pub fn lcp(xs: &[u8], ys: &[u8]) -> usize {
    Iterator::zip(xs.iter(), ys.iter())
        .take_while(|(&x, &y)| x == y)
        .count()
}

/// Range minimum table over suffix offsets.
///
/// The ranks are split into blocks of `BLOCK` entries, and a sparse table
/// keeps the minima of `2^k` consecutive blocks. A query scans at most two
/// partial blocks and looks up the whole blocks in between.
struct RangeMin {
    levels: Vec<Vec<u32>>,
}

impl RangeMin {
    fn new(sa: &[u32]) -> Self {
        let base: Vec<u32> = sa
            .chunks(BLOCK)
            .map(|chunk| chunk.iter().copied().min().unwrap_or(u32::MAX))
            .collect();

        let mut levels = vec![base];
        let mut width = 1;
        while width * 2 <= levels[0].len() {
            let prev = &levels[levels.len() - 1];
            let next: Vec<u32> = (0..prev.len() - width)
                .map(|i| Ord::min(prev[i], prev[i + width]))
                .collect();
            levels.push(next);
            width *= 2;
        }

        RangeMin { levels }
    }

    /// Minimum of `sa[lo..hi]` (`lo < hi`).
    fn min(&self, sa: &[u32], lo: usize, hi: usize) -> u32 {
        let first = lo / BLOCK;
        let last = (hi - 1) / BLOCK;
        if first == last {
            return scan_min(&sa[lo..hi]);
        }

        let head = scan_min(&sa[lo..(first + 1) * BLOCK]);
        let tail = scan_min(&sa[last * BLOCK..hi]);
        let mut m = Ord::min(head, tail);
        if first + 1 < last {
            m = Ord::min(m, self.blocks_min(first + 1, last));
        }
        m
    }

    /// Minimum over whole blocks `lo..hi` (`lo < hi`).
    fn blocks_min(&self, lo: usize, hi: usize) -> u32 {
        let n = hi - lo;
        let k = (usize::BITS - 1 - n.leading_zeros()) as usize;
        let level = &self.levels[k];
        Ord::min(level[lo], level[hi - (1 << k)])
    }
}

#[inline]
fn scan_min(xs: &[u32]) -> u32 {
    xs.iter().copied().min().unwrap_or(u32::MAX)
}
