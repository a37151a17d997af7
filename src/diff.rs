#![forbid(unsafe_code)]
use super::codec;
use super::error::{try_reserve, Result};
use super::search::{Match, SuffixIndex};
use super::Instruction;
use rayon::prelude::*;
use std::io::Write;

/// Compression level of the bzip2 compressor.
pub use bzip2::Compression;

/// Default threshold to determine small exact match.
pub const SMALL_MATCH: usize = 12;

/// Default threshold to determine dismatch.
pub const DISMATCH_COUNT: usize = 8;

/// Default threshold to enable binary search on suffixing similar bytes.
const LONG_SUFFIX: usize = 256;

/// Default minimum run of identical bytes emitted as a copy inside a
/// similar region.
pub const COPY_RUN: usize = 16;

/// Default compression level.
pub const LEVEL: Compression = Compression::Default;

/// Min chunk size of each parallel job.
const MIN_CHUNK: usize = 256 * 1024;

/// Parallel searching scheme of the differ.
///
/// The produced patch depends on the scheme (chunk boundaries), never on the
/// number of threads actually running.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParallelScheme {
    /// Never search in parallel.
    Never,

    /// Each parallel job works on a chunk no larger than given size.
    ///
    /// The chunk size should be greater than 256 KiB, or it would choose a
    /// larger chunk size to avoid bad quality of patch.
    ChunkSize(usize),

    /// Split the target into `N` chunks (each still at least 256 KiB).
    NumJobs(usize),
}

/// Delta generator between a source and a target buffer.
///
/// Generates a patch using the best compression level:
/// ```
/// use secure_patch::{Compression, Differ};
///
/// fn diff(source: &[u8], target: &[u8]) -> secure_patch::Result<Vec<u8>> {
///     Differ::new(source, target)
///         .compression_level(Compression::Best)
///         .generate()
/// }
/// ```
pub struct Differ<'s, 't> {
    s: &'s [u8],
    t: &'t [u8],
    scheme: ParallelScheme,
    small: usize,
    dismat: usize,
    longsuf: usize,
    copy_run: usize,
    level: Compression,
}

impl<'s, 't> Differ<'s, 't> {
    /// Create new configuration for delta generation.
    pub fn new(source: &'s [u8], target: &'t [u8]) -> Self {
        Differ {
            s: source,
            t: target,
            scheme: ParallelScheme::Never,
            small: SMALL_MATCH,
            dismat: DISMATCH_COUNT,
            longsuf: LONG_SUFFIX,
            copy_run: COPY_RUN,
            level: LEVEL,
        }
    }

    /// Set parallel searching scheme (default is `ParallelScheme::Never`).
    /// A zero chunk size or job count means `Never`.
    pub fn parallel_scheme(mut self, mut scheme: ParallelScheme) -> Self {
        use ParallelScheme::*;
        if scheme == ChunkSize(0) || scheme == NumJobs(0) {
            scheme = Never;
        }
        self.scheme = scheme;
        self
    }

    /// Set the threshold to determine small match (default is `SMALL_MATCH`).
    /// If set to zero, no matches would be skipped.
    pub fn small_match(mut self, sm: usize) -> Self {
        self.small = sm;
        self
    }

    /// Set the threshold to determine dismatch (`dis > 0`, default is `DISMATCH_COUNT`).
    pub fn dismatch_count(mut self, mut dis: usize) -> Self {
        if dis < 1 {
            dis = 1;
        }
        self.dismat = dis;
        self
    }

    /// Set the minimum run of identical bytes split out of a similar region
    /// as a copy (`run > 0`, default is `COPY_RUN`).
    pub fn copy_run(mut self, mut run: usize) -> Self {
        if run < 1 {
            run = 1;
        }
        self.copy_run = run;
        self
    }

    /// Set the compression level of bzip2 (default is `LEVEL`).
    pub fn compression_level(mut self, lv: Compression) -> Self {
        self.level = lv;
        self
    }

    /// Compute the instruction sequence rebuilding the target from the
    /// source.
    pub fn instructions(&self) -> Result<Vec<Instruction>> {
        let index = SuffixIndex::new(self.s)?;

        use ParallelScheme::*;
        let chunk = match self.scheme {
            Never => self.t.len(),
            ChunkSize(chunk) => Ord::max(chunk, MIN_CHUNK),
            NumJobs(n) => Ord::max(div_ceil(self.t.len(), n), MIN_CHUNK),
        };

        let mut emitter = Emitter::new(self.copy_run);
        if chunk >= self.t.len() {
            for span in Scanner::new(&index, self.t, self.small, self.dismat, self.longsuf) {
                emitter.span(self.s, self.t, span);
            }
        } else {
            let jobs: Vec<Vec<Instruction>> = self
                .t
                .par_chunks(chunk)
                .map(|ti| {
                    let mut job = Emitter::new(self.copy_run);
                    for span in Scanner::new(&index, ti, self.small, self.dismat, self.longsuf) {
                        job.span(self.s, ti, span);
                    }
                    job.finish()
                })
                .collect();
            try_reserve(&mut emitter.out, jobs.iter().map(Vec::len).sum())?;
            for ins in jobs.into_iter().flatten() {
                emitter.push(ins);
            }
        }

        let out = emitter.finish();
        log::debug!(
            "diffed {} source bytes against {} target bytes into {} instructions",
            self.s.len(),
            self.t.len(),
            out.len()
        );
        Ok(out)
    }

    /// Compute the instructions and pack them into a patch.
    pub fn generate(&self) -> Result<Vec<u8>> {
        let ins = self.instructions()?;
        codec::encode(self.s, self.t, &ins[..], self.level)
    }

    /// Compute the instructions and write the patch.
    ///
    /// The size of the patch would be returned if no error occurs.
    pub fn generate_to<W: Write>(&self, mut patch: W) -> Result<u64> {
        let bytes = self.generate()?;
        patch.write_all(&bytes[..])?;
        patch.flush()?;
        Ok(bytes.len() as u64)
    }
}

/// Calculate `ceil(x/y)`.
#[inline]
fn div_ceil(x: usize, y: usize) -> usize {
    if x % y == 0 {
        x / y
    } else {
        x / y + 1
    }
}

/// A similar region followed by a region without correspondence.
///
/// ```text
/// source: ...(   similar   )...
///            ^ offset
/// target: ...(   similar   ;   insert   )...
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Span {
    offset: usize,
    similar: usize,
    insert: usize,
}

/// The exact match the scanner last accepted.
///
/// `s[source..source + len] == t[target..target + len]`, and the `lead`
/// bytes before it were claimed as similar bytes of this match.
#[derive(Debug, Copy, Clone, Default)]
struct Anchor {
    source: usize,
    target: usize,
    len: usize,
    lead: usize,
}

impl Anchor {
    /// First source byte after the exact match.
    #[inline]
    fn source_end(&self) -> usize {
        self.source + self.len
    }

    /// First target byte after the exact match.
    #[inline]
    fn target_end(&self) -> usize {
        self.target + self.len
    }
}

/// Greedy match scanner over the target (a variant of bsdiff 4.x).
struct Scanner<'i, 's, 't> {
    s: &'s [u8],
    t: &'t [u8],
    index: &'i SuffixIndex<'s>,

    small: usize,
    dismat: usize,
    longsuf: usize,

    last: Anchor,
}

impl<'i, 's, 't> Scanner<'i, 's, 't> {
    /// Creates new search context.
    fn new(index: &'i SuffixIndex<'s>, t: &'t [u8], small: usize, dismat: usize, longsuf: usize) -> Self {
        Scanner {
            s: index.source(),
            t,
            index,
            small,
            dismat,
            longsuf,
            last: Anchor::default(),
        }
    }

    /// Tests if `t[k]` is explained by the last anchor's alignment.
    #[inline]
    fn aligned(&self, k: usize) -> bool {
        let i = self.last.source.saturating_add(k - self.last.target);
        i < self.s.len() && self.s[i] == self.t[k]
    }

    /// Searches for the next exact match worth anchoring on, as
    /// `(source, target, len)`.
    fn search_next(&mut self) -> Option<(usize, usize, usize)> {
        // The end of the target is already anchored.
        if self.last.target == self.t.len() && self.last.lead == 0 {
            return None;
        }

        // `m` counts the aligned bytes of t[j..k].
        let mut j = self.last.target_end();
        let mut k = j;
        let mut m = 0;
        while j < self.t.len().saturating_sub(self.small) {
            // Finds out a possible exact match.
            let Match { offset: i, len: n } = self.index.longest_match(self.t, j);

            // Counts the matched bytes, and determine whether these bytes
            // should be treated as possible similar bytes, or simply as the
            // next exact match.
            while k < j + n {
                if self.aligned(k) {
                    m += 1;
                }
                k += 1;
            }

            if n == 0 {
                // Match nothing.
                j += 1;
                k = j;
                m = 0;
            } else if m == n || n <= self.small {
                // Skip small matches and matches already explained by the
                // previous alignment.
                j += n;
                k = j;
                m = 0;
            } else if n <= m + self.dismat {
                // Too few bytes disagree with the last alignment, so this
                // match likely continues the similar region behind the last
                // anchor. Step over it: one byte at a time for short matches,
                // by bisecting on where its suffixes stop lining up for long
                // ones.
                let next = if n <= self.longsuf {
                    j + 1
                } else {
                    let mut x = 0;
                    let mut y = n;
                    while x < y {
                        let z = x + (y - x) / 2;
                        let Match { offset: iz, len: nz } = self.index.longest_match(self.t, j + z);
                        if i + n == iz + nz && j + n == j + z + nz {
                            x = z + 1;
                        } else {
                            y = z;
                        }
                    }
                    j + Ord::max(x, 1)
                };
                while j < next {
                    if self.aligned(j) {
                        m -= 1;
                    }
                    j += 1;
                }
            } else {
                // The count of dismatches is sufficient.
                return Some((i, j, n));
            }
        }

        // The end of both buffers anchors the final span.
        Some((self.s.len(), self.t.len(), 0))
    }

    /// Splits the target gap between the last anchor and the next match at
    /// `(i, j)` into `(trail, lead)`: bytes similar to what follows the last
    /// anchor, and bytes similar to what precedes the next one. Whatever is
    /// left in between is inserted.
    fn bridge_gap(&self, i: usize, j: usize) -> (usize, usize) {
        let gap = &self.t[self.last.target_end()..j];
        let after = &self.s[self.last.source_end()..];
        let before = &self.s[..i];

        let mut trail = similar_len(gap.iter(), after.iter());
        let mut lead = similar_len(gap.iter().rev(), before.iter().rev());

        // Both sides claim the middle of the gap.
        if trail + lead > gap.len() {
            let shared = trail + lead - gap.len();
            let lo = gap.len() - lead;
            let cut = overlap_cut(
                gap[lo..trail].iter(),
                after[lo..trail].iter(),
                before[before.len() - lead..before.len() - lead + shared].iter(),
            );
            trail = lo + cut;
            lead = gap.len() - trail;
        }

        (trail, lead)
    }
}

impl<'i, 's, 't> Iterator for Scanner<'i, 's, 't> {
    type Item = Span;

    fn next(&mut self) -> Option<Self::Item> {
        let (i, j, n) = self.search_next()?;
        let (trail, lead) = self.bridge_gap(i, j);
        let last = self.last;

        // source: ...( last.lead , last.len , trail )...( lead ,...
        //            ^ offset    ^ last.source             ^ i
        // target: ...( last.lead , last.len , trail ; insert )( lead ,...
        //                        ^ last.target                  ^ j
        let span = Span {
            offset: last.source - last.lead,
            similar: last.lead + last.len + trail,
            insert: (j - lead) - (last.target_end() + trail),
        };

        self.last = Anchor {
            source: i,
            target: j,
            len: n,
            lead,
        };
        Some(span)
    }
}

/// Length of the prefix of `xs` that is most worth treating as similar to
/// `ys`: the point where equal bytes lead unequal ones by the widest margin.
/// Zero if no prefix has more equal bytes than unequal ones.
#[inline]
fn similar_len<T: Eq, I: Iterator<Item = T>>(xs: I, ys: I) -> usize {
    let mut best = (0, 0isize);
    let mut margin = 0isize;
    for (k, (x, y)) in xs.zip(ys).enumerate() {
        margin += if x == y { 1 } else { -1 };
        if margin > best.1 {
            best = (k + 1, margin);
        }
    }
    best.0
}

/// Where to cut a stretch that two alignments both claim. `xs` is the
/// target stretch, `ys` what the earlier alignment reads there, and `zs`
/// what the later one reads. Bytes before the cut go to the earlier
/// alignment. The cut is where the earlier alignment's lead over the later
/// one peaks.
#[inline]
fn overlap_cut<T: Eq, I: Iterator<Item = T>>(xs: I, ys: I, zs: I) -> usize {
    let mut best = (0, 0isize);
    let mut lead = 0isize;
    for (k, ((x, y), z)) in xs.zip(ys).zip(zs).enumerate() {
        lead += (x == y) as isize - (x == z) as isize;
        if lead > best.1 {
            best = (k + 1, lead);
        }
    }
    best.0
}

/// Turns spans into instructions, merging contiguous instructions of the
/// same kind.
struct Emitter {
    copy_run: usize,
    tpos: usize,
    out: Vec<Instruction>,
}

impl Emitter {
    fn new(copy_run: usize) -> Self {
        Emitter {
            copy_run,
            tpos: 0,
            out: Vec::new(),
        }
    }

    /// Emits one span of target `t` (relative to the target piece being
    /// scanned).
    fn span(&mut self, s: &[u8], t: &[u8], span: Span) {
        let Span { offset, similar, insert } = span;
        if similar > 0 {
            let ss = &s[offset..offset + similar];
            let ts = &t[self.tpos..self.tpos + similar];
            self.similar(offset, ss, ts);
            self.tpos += similar;
        }
        if insert > 0 {
            let literal = t[self.tpos..self.tpos + insert].to_vec();
            self.push(Instruction::Insert { literal });
            self.tpos += insert;
        }
    }

    /// Splits a similar region into copies of long identical runs and diffs
    /// of everything else.
    fn similar(&mut self, offset: usize, ss: &[u8], ts: &[u8]) {
        let n = ss.len();
        let mut pending = 0;
        let mut k = 0;
        while k < n {
            if ss[k] != ts[k] {
                k += 1;
                continue;
            }
            let z = k;
            while k < n && ss[k] == ts[k] {
                k += 1;
            }
            if k - z >= self.copy_run || (z == 0 && k == n) {
                if pending < z {
                    self.diff(offset + pending, &ss[pending..z], &ts[pending..z]);
                }
                self.push(Instruction::Copy {
                    offset: (offset + z) as u64,
                    len: (k - z) as u64,
                });
                pending = k;
            }
        }
        if pending < n {
            self.diff(offset + pending, &ss[pending..], &ts[pending..]);
        }
    }

    fn diff(&mut self, offset: usize, ss: &[u8], ts: &[u8]) {
        let deltas = Iterator::zip(ss.iter(), ts.iter())
            .map(|(x, y)| y.wrapping_sub(*x))
            .collect();
        self.push(Instruction::Diff {
            offset: offset as u64,
            deltas,
        });
    }

    /// Appends an instruction, merging it into the last one when both are
    /// of the same kind and contiguous.
    fn push(&mut self, ins: Instruction) {
        let rest = match self.out.last_mut() {
            Some(last) => merge(last, ins),
            None => Some(ins),
        };
        if let Some(ins) = rest {
            self.out.push(ins);
        }
    }

    fn finish(self) -> Vec<Instruction> {
        self.out
    }
}

/// Merges `ins` into `last`, or gives it back if they cannot be merged.
fn merge(last: &mut Instruction, ins: Instruction) -> Option<Instruction> {
    use Instruction::*;
    match (last, ins) {
        (Copy { offset, len }, Copy { offset: o, len: n }) if *offset + *len == o => {
            *len += n;
            None
        }
        (Diff { offset, deltas }, Diff { offset: o, deltas: d }) if *offset + deltas.len() as u64 == o => {
            deltas.extend_from_slice(&d[..]);
            None
        }
        (Insert { literal }, Insert { literal: l }) => {
            literal.extend_from_slice(&l[..]);
            None
        }
        (_, ins) => Some(ins),
    }
}
