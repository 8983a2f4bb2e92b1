//! Sparse bitfield.
//!
//! An arbitrarily large bit-vector optimized for long runs of uniform bits.
//!
//! ## Layout
//!
//! ```text
//! SparseBitfield
//!   └─ BTreeMap<segment index, Segment>      2,097,152 bits per segment
//!        └─ [Option<Box<Page>>; 64]          32,768 bits per page
//!             └─ [u32; 1024]                 bit i at word i / 32, bit i % 32
//! ```
//!
//! Pages are allocated the first time a bit inside them is set to 1. A page
//! that was never allocated reads as all zeros, so memory is proportional to
//! the ranges actually used rather than to the highest index.
//!
//! ## Skip Index
//!
//! Searches never scan uniform data. Every page keeps two word-level masks
//! (word is non-zero, word is all ones) and every segment keeps the same two
//! masks at page granularity. `find_first`/`find_last` use these masks to hop
//! straight to the next page and word that can contain a match.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::BitfieldError;

/// Number of bits in one page.
pub const BITS_PER_PAGE: u64 = 32_768;

/// Number of 32-bit words in one page.
pub const WORDS_PER_PAGE: usize = 1024;

/// Number of pages in one segment.
pub const PAGES_PER_SEGMENT: usize = 64;

/// Number of bits in one segment.
pub const BITS_PER_SEGMENT: u64 = BITS_PER_PAGE * PAGES_PER_SEGMENT as u64;

const WORDS_PER_SEGMENT: u64 = (WORDS_PER_PAGE * PAGES_PER_SEGMENT) as u64;
const MASK_LEN: usize = WORDS_PER_PAGE / 64;
const LAST_BIT_IN_PAGE: usize = BITS_PER_PAGE as usize - 1;

/// Read access to a bitfield, word by word.
///
/// Sync state reads a local log's bitfield through this trait so the log can
/// keep owning its own storage.
pub trait BitfieldView {
    /// Get the bit at `index`.
    fn get(&self, index: u64) -> bool;

    /// Get the 32-bit word holding bits `word_index * 32 .. word_index * 32 + 32`.
    fn get_word(&self, word_index: u64) -> u32;
}

/// Mask with bits `lo..=hi` set.
fn range_mask(lo: usize, hi: usize) -> u32 {
    (u32::MAX >> (31 - hi)) & (u32::MAX << lo)
}

/// First index `>= from` whose bit is set in `mask` (or clear, when `invert`).
fn next_marked(mask: &[u64; MASK_LEN], from: usize, invert: bool) -> Option<usize> {
    let mut i = from / 64;
    if i >= MASK_LEN {
        return None;
    }
    let load = |m: u64| if invert { !m } else { m };
    let mut m = load(mask[i]) & (u64::MAX << (from % 64));
    loop {
        if m != 0 {
            return Some(i * 64 + m.trailing_zeros() as usize);
        }
        i += 1;
        if i == MASK_LEN {
            return None;
        }
        m = load(mask[i]);
    }
}

/// Last index `<= from` whose bit is set in `mask` (or clear, when `invert`).
fn prev_marked(mask: &[u64; MASK_LEN], from: usize, invert: bool) -> Option<usize> {
    let mut i = from / 64;
    let load = |m: u64| if invert { !m } else { m };
    let mut m = load(mask[i]) & (u64::MAX >> (63 - from % 64));
    loop {
        if m != 0 {
            return Some(i * 64 + 63 - m.leading_zeros() as usize);
        }
        if i == 0 {
            return None;
        }
        i -= 1;
        m = load(mask[i]);
    }
}

fn next_in(mask: u64, from: usize) -> Option<usize> {
    if from >= 64 {
        return None;
    }
    let m = mask & (u64::MAX << from);
    (m != 0).then(|| m.trailing_zeros() as usize)
}

fn prev_in(mask: u64, from: usize) -> Option<usize> {
    let m = mask & (u64::MAX >> (63 - from));
    (m != 0).then(|| 63 - m.leading_zeros() as usize)
}

/// Split a bit index into (segment, page within segment, bit within page).
fn locate(index: u64) -> (u64, usize, usize) {
    let in_segment = index % BITS_PER_SEGMENT;
    (
        index / BITS_PER_SEGMENT,
        (in_segment / BITS_PER_PAGE) as usize,
        (in_segment % BITS_PER_PAGE) as usize,
    )
}

/// Split a word index into (segment, page within segment, word within page).
fn locate_word(word_index: u64) -> (u64, usize, usize) {
    let in_segment = word_index % WORDS_PER_SEGMENT;
    (
        word_index / WORDS_PER_SEGMENT,
        (in_segment / WORDS_PER_PAGE as u64) as usize,
        (in_segment % WORDS_PER_PAGE as u64) as usize,
    )
}

fn page_base(segment: u64, page: usize) -> u64 {
    segment * BITS_PER_SEGMENT + page as u64 * BITS_PER_PAGE
}

#[derive(Clone)]
struct Page {
    words: [u32; WORDS_PER_PAGE],
    /// Bit `w` set when `words[w] != 0`.
    nonzero: [u64; MASK_LEN],
    /// Bit `w` set when `words[w] == u32::MAX`.
    full: [u64; MASK_LEN],
}

impl Page {
    fn new() -> Self {
        Self {
            words: [0; WORDS_PER_PAGE],
            nonzero: [0; MASK_LEN],
            full: [0; MASK_LEN],
        }
    }

    fn index_word(&mut self, w: usize) {
        let bit = 1u64 << (w % 64);
        let word = self.words[w];
        if word != 0 {
            self.nonzero[w / 64] |= bit;
        } else {
            self.nonzero[w / 64] &= !bit;
        }
        if word == u32::MAX {
            self.full[w / 64] |= bit;
        } else {
            self.full[w / 64] &= !bit;
        }
    }

    fn rebuild_index(&mut self) {
        for w in 0..WORDS_PER_PAGE {
            self.index_word(w);
        }
    }

    fn is_empty(&self) -> bool {
        self.nonzero.iter().all(|m| *m == 0)
    }

    fn is_full(&self) -> bool {
        self.full.iter().all(|m| *m == u64::MAX)
    }

    fn get(&self, bit: usize) -> bool {
        self.words[bit / 32] & (1 << (bit % 32)) != 0
    }

    fn set(&mut self, bit: usize, value: bool) -> bool {
        let w = bit / 32;
        let before = self.words[w];
        if value {
            self.words[w] |= 1 << (bit % 32);
        } else {
            self.words[w] &= !(1 << (bit % 32));
        }
        self.index_word(w);
        before != self.words[w]
    }

    /// Set bits `from..to` (page-local, `to` exclusive).
    fn fill(&mut self, from: usize, to: usize, value: bool) {
        if from >= to {
            return;
        }
        let first = from / 32;
        let last = (to - 1) / 32;
        for w in first..=last {
            let lo = if w == first { from % 32 } else { 0 };
            let hi = if w == last { (to - 1) % 32 } else { 31 };
            let mask = range_mask(lo, hi);
            if value {
                self.words[w] |= mask;
            } else {
                self.words[w] &= !mask;
            }
            self.index_word(w);
        }
    }

    /// Count set bits in `from..to` (page-local, `to` exclusive).
    fn count(&self, from: usize, to: usize) -> u64 {
        if from >= to {
            return 0;
        }
        let first = from / 32;
        let last = (to - 1) / 32;
        (first..=last)
            .map(|w| {
                let lo = if w == first { from % 32 } else { 0 };
                let hi = if w == last { (to - 1) % 32 } else { 31 };
                (self.words[w] & range_mask(lo, hi)).count_ones() as u64
            })
            .sum()
    }

    fn load(&self, w: usize, value: bool) -> u32 {
        if value {
            self.words[w]
        } else {
            !self.words[w]
        }
    }

    fn find_forward(&self, value: bool, from: usize) -> Option<usize> {
        let w = from / 32;
        let first = self.load(w, value) & (u32::MAX << (from % 32));
        if first != 0 {
            return Some(w * 32 + first.trailing_zeros() as usize);
        }
        let next = if value {
            next_marked(&self.nonzero, w + 1, false)?
        } else {
            next_marked(&self.full, w + 1, true)?
        };
        Some(next * 32 + self.load(next, value).trailing_zeros() as usize)
    }

    fn find_backward(&self, value: bool, from: usize) -> Option<usize> {
        let w = from / 32;
        let first = self.load(w, value) & (u32::MAX >> (31 - from % 32));
        if first != 0 {
            return Some(w * 32 + 31 - first.leading_zeros() as usize);
        }
        if w == 0 {
            return None;
        }
        let prev = if value {
            prev_marked(&self.nonzero, w - 1, false)?
        } else {
            prev_marked(&self.full, w - 1, true)?
        };
        Some(prev * 32 + 31 - self.load(prev, value).leading_zeros() as usize)
    }
}

#[derive(Clone)]
struct Segment {
    pages: [Option<Box<Page>>; PAGES_PER_SEGMENT],
    /// Page `p` has at least one set bit.
    nonzero: u64,
    /// Page `p` is all ones.
    full: u64,
}

impl Segment {
    fn new() -> Self {
        Self {
            pages: std::array::from_fn(|_| None),
            nonzero: 0,
            full: 0,
        }
    }

    fn page(&self, p: usize) -> Option<&Page> {
        self.pages[p].as_deref()
    }

    fn page_mut(&mut self, p: usize) -> &mut Page {
        self.pages[p].get_or_insert_with(|| Box::new(Page::new()))
    }

    /// Recompute the skip-index entry for page `p`.
    fn refresh(&mut self, p: usize) {
        let bit = 1u64 << p;
        let (nonzero, full) = match self.page(p) {
            Some(page) => (!page.is_empty(), page.is_full()),
            None => (false, false),
        };
        if nonzero {
            self.nonzero |= bit;
        } else {
            self.nonzero &= !bit;
        }
        if full {
            self.full |= bit;
        } else {
            self.full &= !bit;
        }
    }

    fn allocated(&self) -> usize {
        self.pages.iter().filter(|p| p.is_some()).count()
    }
}

/// A lazily allocated bit-vector indexed by `u64`.
///
/// See the [module documentation](self) for the layout.
#[derive(Clone, Default)]
pub struct SparseBitfield {
    segments: BTreeMap<u64, Segment>,
}

impl SparseBitfield {
    /// Create an empty bitfield. Allocates nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the bit at `index`. Unallocated bits read as `false`.
    pub fn get(&self, index: u64) -> bool {
        let (s, p, b) = locate(index);
        self.segments
            .get(&s)
            .and_then(|seg| seg.page(p))
            .map_or(false, |page| page.get(b))
    }

    /// Set the bit at `index`.
    ///
    /// Returns whether the bit changed. Clearing a bit in an unallocated page
    /// does not allocate it.
    pub fn set(&mut self, index: u64, value: bool) -> bool {
        let (s, p, b) = locate(index);
        if value {
            let seg = self.segments.entry(s).or_insert_with(Segment::new);
            let changed = seg.page_mut(p).set(b, true);
            seg.refresh(p);
            return changed;
        }

        let Some(seg) = self.segments.get_mut(&s) else {
            return false;
        };
        let changed = match seg.pages[p].as_mut() {
            Some(page) => page.set(b, false),
            None => return false,
        };
        seg.refresh(p);
        changed
    }

    /// Set `length` bits starting at `start` to `value`.
    ///
    /// Works a page at a time and a word at a time within each page.
    pub fn set_range(&mut self, start: u64, length: u64, value: bool) {
        let end = start.saturating_add(length);
        let mut pos = start;

        while pos < end {
            let (s, p, b) = locate(pos);
            let chunk_end = end.min((pos - b as u64).saturating_add(BITS_PER_PAGE));
            let to = b + (chunk_end - pos) as usize;

            if value {
                let seg = self.segments.entry(s).or_insert_with(Segment::new);
                seg.page_mut(p).fill(b, to, true);
                seg.refresh(p);
            } else if let Some(seg) = self.segments.get_mut(&s) {
                if let Some(page) = seg.pages[p].as_mut() {
                    page.fill(b, to, false);
                    seg.refresh(p);
                }
            } else {
                // Nothing to clear in an absent segment.
                pos = end.min((s + 1).saturating_mul(BITS_PER_SEGMENT));
                continue;
            }

            pos = chunk_end;
        }
    }

    /// Get the 32-bit word at `word_index`.
    pub fn get_word(&self, word_index: u64) -> u32 {
        let (s, p, w) = locate_word(word_index);
        self.segments
            .get(&s)
            .and_then(|seg| seg.page(p))
            .map_or(0, |page| page.words[w])
    }

    /// Copy `count` words starting at `start_word`.
    pub fn words(&self, start_word: u64, count: usize) -> Vec<u32> {
        (0..count as u64)
            .map(|i| start_word.checked_add(i).map_or(0, |w| self.get_word(w)))
            .collect()
    }

    /// Install contiguous words starting at bit `start`.
    ///
    /// `start` must be a multiple of 32. Words overwrite whatever was there
    /// before. The skip index of every touched page is rebuilt once, after
    /// all words are written. On error nothing is modified.
    pub fn insert(&mut self, start: u64, words: &[u32]) -> Result<(), BitfieldError> {
        if start % 32 != 0 {
            return Err(BitfieldError::UnalignedInsert { start });
        }
        if words.is_empty() {
            return Ok(());
        }
        let first_word = start / 32;
        (words.len() as u64 - 1)
            .checked_add(first_word)
            .filter(|last| *last <= u64::MAX / 32)
            .ok_or(BitfieldError::Overflow {
                start,
                words: words.len(),
            })?;

        let mut touched: Vec<(u64, usize)> = Vec::new();
        for (i, &word) in words.iter().enumerate() {
            let (s, p, w) = locate_word(first_word + i as u64);
            let seg = if word != 0 {
                self.segments.entry(s).or_insert_with(Segment::new)
            } else {
                match self.segments.get_mut(&s) {
                    Some(seg) => seg,
                    None => continue,
                }
            };
            let page = if word != 0 {
                seg.page_mut(p)
            } else {
                match seg.pages[p].as_deref_mut() {
                    Some(page) => page,
                    None => continue,
                }
            };
            page.words[w] = word;
            if touched.last() != Some(&(s, p)) {
                touched.push((s, p));
            }
        }

        for (s, p) in touched {
            if let Some(seg) = self.segments.get_mut(&s) {
                if let Some(page) = seg.pages[p].as_mut() {
                    page.rebuild_index();
                }
                seg.refresh(p);
            }
        }
        Ok(())
    }

    /// Set every bit that is set in `other`.
    pub fn union_with(&mut self, other: &SparseBitfield) {
        for (&s, theirs) in &other.segments {
            let mut p = 0;
            while let Some(np) = next_in(theirs.nonzero, p) {
                if let Some(source) = theirs.page(np) {
                    let seg = self.segments.entry(s).or_insert_with(Segment::new);
                    let page = seg.page_mut(np);
                    for (dst, src) in page.words.iter_mut().zip(source.words.iter()) {
                        *dst |= *src;
                    }
                    page.rebuild_index();
                    seg.refresh(np);
                }
                p = np + 1;
            }
        }
    }

    /// Find the first bit equal to `value` at or after `from`.
    ///
    /// Unallocated regions read as zeros, so searching for `false` only
    /// returns `None` when every bit from `from` to the end of the index space
    /// is set.
    pub fn find_first(&self, value: bool, from: u64) -> Option<u64> {
        if value {
            self.find_first_set(from)
        } else {
            self.find_first_clear(from)
        }
    }

    /// Find the last bit equal to `value` at or before `from`.
    pub fn find_last(&self, value: bool, from: u64) -> Option<u64> {
        if value {
            self.find_last_set(from)
        } else {
            self.find_last_clear(from)
        }
    }

    fn find_first_set(&self, from: u64) -> Option<u64> {
        let (s0, p0, b0) = locate(from);
        for (&s, seg) in self.segments.range(s0..) {
            let (mut p, mut b) = if s == s0 { (p0, b0) } else { (0, 0) };
            while let Some(np) = next_in(seg.nonzero, p) {
                if np != p {
                    b = 0;
                }
                if let Some(bit) = seg.page(np).and_then(|page| page.find_forward(true, b)) {
                    return Some(page_base(s, np) + bit as u64);
                }
                p = np + 1;
                b = 0;
            }
        }
        None
    }

    fn find_first_clear(&self, from: u64) -> Option<u64> {
        let mut pos = from;
        loop {
            let (s, p0, b0) = locate(pos);
            let Some(seg) = self.segments.get(&s) else {
                return Some(pos);
            };
            let (mut p, mut b) = (p0, b0);
            while let Some(np) = next_in(!seg.full, p) {
                if np != p {
                    b = 0;
                }
                match seg.page(np) {
                    None => return Some(page_base(s, np) + b as u64),
                    Some(page) => {
                        if let Some(bit) = page.find_forward(false, b) {
                            return Some(page_base(s, np) + bit as u64);
                        }
                    }
                }
                p = np + 1;
                b = 0;
            }
            pos = (s + 1).checked_mul(BITS_PER_SEGMENT)?;
        }
    }

    fn find_last_set(&self, from: u64) -> Option<u64> {
        let (s0, p0, b0) = locate(from);
        for (&s, seg) in self.segments.range(..=s0).rev() {
            let (mut p, mut b) = if s == s0 {
                (p0, b0)
            } else {
                (PAGES_PER_SEGMENT - 1, LAST_BIT_IN_PAGE)
            };
            while let Some(np) = prev_in(seg.nonzero, p) {
                if np != p {
                    b = LAST_BIT_IN_PAGE;
                }
                if let Some(bit) = seg.page(np).and_then(|page| page.find_backward(true, b)) {
                    return Some(page_base(s, np) + bit as u64);
                }
                if np == 0 {
                    break;
                }
                p = np - 1;
                b = LAST_BIT_IN_PAGE;
            }
        }
        None
    }

    fn find_last_clear(&self, from: u64) -> Option<u64> {
        let mut pos = from;
        loop {
            let (s, p0, b0) = locate(pos);
            let Some(seg) = self.segments.get(&s) else {
                return Some(pos);
            };
            let (mut p, mut b) = (p0, b0);
            while let Some(np) = prev_in(!seg.full, p) {
                if np != p {
                    b = LAST_BIT_IN_PAGE;
                }
                match seg.page(np) {
                    None => return Some(page_base(s, np) + b as u64),
                    Some(page) => {
                        if let Some(bit) = page.find_backward(false, b) {
                            return Some(page_base(s, np) + bit as u64);
                        }
                    }
                }
                if np == 0 {
                    break;
                }
                p = np - 1;
                b = LAST_BIT_IN_PAGE;
            }
            if s == 0 {
                return None;
            }
            pos = s * BITS_PER_SEGMENT - 1;
        }
    }

    /// Index of the highest set bit, if any.
    pub fn last_set(&self) -> Option<u64> {
        self.find_last_set(u64::MAX)
    }

    /// Count set bits in `start..end`.
    pub fn count_ones(&self, start: u64, end: u64) -> u64 {
        if start >= end {
            return 0;
        }
        let first_segment = start / BITS_PER_SEGMENT;
        let last_segment = (end - 1) / BITS_PER_SEGMENT;
        let mut total = 0;

        for (&s, seg) in self.segments.range(first_segment..=last_segment) {
            let mut p = 0;
            while let Some(np) = next_in(seg.nonzero, p) {
                let base = page_base(s, np);
                // the last page of the index space ends past u64::MAX
                let page_end = base.checked_add(BITS_PER_PAGE);
                let lo = start.max(base);
                let hi = page_end.map_or(end, |pe| end.min(pe));
                if lo < hi {
                    if let Some(page) = seg.page(np) {
                        total += if lo == base && Some(hi) == page_end && page.is_full() {
                            BITS_PER_PAGE
                        } else {
                            page.count((lo - base) as usize, (hi - base) as usize)
                        };
                    }
                }
                p = np + 1;
            }
        }
        total
    }

    /// Whether no bit is set.
    pub fn is_empty(&self) -> bool {
        self.segments.values().all(|seg| seg.nonzero == 0)
    }

    /// Drop all pages.
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// Number of allocated pages.
    pub fn page_count(&self) -> usize {
        self.segments.values().map(Segment::allocated).sum()
    }
}

impl BitfieldView for SparseBitfield {
    fn get(&self, index: u64) -> bool {
        SparseBitfield::get(self, index)
    }

    fn get_word(&self, word_index: u64) -> u32 {
        SparseBitfield::get_word(self, word_index)
    }
}

impl fmt::Debug for SparseBitfield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseBitfield")
            .field("segments", &self.segments.len())
            .field("pages", &self.page_count())
            .field("last_set", &self.last_set())
            .finish()
    }
}
