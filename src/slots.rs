use super::*;

/// An inclusive range of heights `[from, to]` covered by one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
  pub from: u64,
  pub to: u64,
}

impl ChunkRange {
  pub fn new(from: u64, to: u64) -> Self {
    assert!(from <= to, "invalid chunk range [{from}, {to}]");
    Self { from, to }
  }

  /// Number of heights the range covers; never zero.
  pub fn len(&self) -> u64 {
    self.to - self.from + 1
  }
}

impl Display for ChunkRange {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(f, "[{}, {}]", self.from, self.to)
  }
}

/// A reserved chunk range, holding its fetched chunk once a worker reports.
#[derive(Debug)]
pub struct Slot {
  pub range: ChunkRange,
  pub chunk: Option<Chunk>,
}

/// The set of in-flight chunk reservations, ordered by `from` and pairwise
/// disjoint. Backed by an insertion-sorted vec; at the expected size
/// (`max_slots` <= ~128) that beats anything tree-shaped.
#[derive(Debug, Default)]
pub struct SlotSet {
  slots: Vec<Slot>,
}

impl SlotSet {
  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  /// Every maximal subrange of `[start, end]` not covered by a slot, split
  /// into pieces of at most `max_size` heights, ascending by `from`.
  pub fn find_gaps(&self, start: u64, end: u64, max_size: u64) -> Vec<ChunkRange> {
    assert!(max_size > 0);

    let mut gaps = Vec::new();
    let mut cursor = start;

    for slot in &self.slots {
      if cursor > end {
        break;
      }

      if slot.range.to < cursor {
        continue;
      }

      if slot.range.from > cursor {
        Self::split(&mut gaps, cursor, slot.range.from.min(end + 1) - 1, max_size);
      }

      cursor = slot.range.to + 1;
    }

    if cursor <= end {
      Self::split(&mut gaps, cursor, end, max_size);
    }

    gaps
  }

  /// Reserve up to `capacity - len()` gap pieces inside `[start, end]` as
  /// empty slots and return them. Calling again with the same arguments and
  /// no intervening completions returns nothing.
  pub fn reserve(
    &mut self,
    start: u64,
    end: u64,
    max_size: u64,
    capacity: usize,
  ) -> Vec<ChunkRange> {
    let free = capacity.saturating_sub(self.slots.len());

    let mut gaps = self.find_gaps(start, end, max_size);
    gaps.truncate(free);

    for range in &gaps {
      self.insert(*range);
    }

    gaps
  }

  /// Attach a fetched chunk to the slot at `index`.
  pub fn set_chunk(&mut self, index: usize, chunk: Chunk) {
    self.slots[index].chunk = Some(chunk);
  }

  /// Position of the slot covering exactly `range`, if still present.
  pub fn index_of(&self, range: ChunkRange) -> Option<usize> {
    self.slots.iter().position(|slot| slot.range == range)
  }

  pub fn peek_front(&self) -> Option<&Slot> {
    self.slots.first()
  }

  /// Whether the lowest-range slot holds a completed chunk.
  pub fn front_ready(&self) -> bool {
    self
      .peek_front()
      .is_some_and(|slot| slot.chunk.is_some())
  }

  pub fn pop_front(&mut self) -> Option<Slot> {
    if self.slots.is_empty() {
      None
    } else {
      Some(self.slots.remove(0))
    }
  }

  pub fn clear(&mut self) {
    self.slots.clear();
  }

  fn insert(&mut self, range: ChunkRange) {
    let position = self
      .slots
      .iter()
      .position(|slot| slot.range.from > range.from)
      .unwrap_or(self.slots.len());

    if let Some(previous) = position.checked_sub(1).map(|i| &self.slots[i]) {
      assert!(previous.range.to < range.from, "overlapping reservation");
    }

    if let Some(next) = self.slots.get(position) {
      assert!(range.to < next.range.from, "overlapping reservation");
    }

    self.slots.insert(position, Slot { range, chunk: None });
  }

  fn split(gaps: &mut Vec<ChunkRange>, from: u64, to: u64, max_size: u64) {
    let mut cursor = from;
    while cursor <= to {
      let piece_to = to.min(cursor + max_size - 1);
      gaps.push(ChunkRange::new(cursor, piece_to));
      cursor = piece_to + 1;
    }
  }
}
