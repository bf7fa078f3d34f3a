/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Sets of small naturals that are either finite or co-finite.
//!
//! A `NatSet` stores a dense bit vector plus a `complemented` flag.  When the
//! flag is clear the bits are the members; when it is set the bits are the
//! naturals that are *not* members, and the set is conceptually infinite.
//!
//! The three binary operations (`+=`, `*=`, `-=`) are all performed by one
//! word-wise merge pass.  What that pass does with bits found only in the left
//! operand, only in the right operand, or in both, depends on the finiteness
//! of the two operands and is read from a small action table.

use std::fmt;
use std::ops::{AddAssign, MulAssign, SubAssign};

const BLOCK_SIZE: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Action {
  Leave,
  Insert,
  Remove,
}

use Action::{Insert, Leave, Remove};

#[derive(Clone, Copy, Debug)]
struct ActionRow {
  // Flip the left operand's flag before merging.
  complement_left: bool,
  only_left: Action,
  only_right: Action,
  both: Action,
}

const fn row(
  complement_left: bool, only_left: Action, only_right: Action, both: Action,
) -> ActionRow {
  ActionRow { complement_left, only_left, only_right, both }
}

// Tables are indexed by [left is co-finite][right is co-finite].

static UNION: [[ActionRow; 2]; 2] = [
  [row(false, Leave, Insert, Leave), row(true, Remove, Insert, Remove)],
  [row(false, Leave, Leave, Remove), row(false, Remove, Leave, Leave)],
];

static INTERSECTION: [[ActionRow; 2]; 2] = [
  [row(false, Remove, Leave, Leave), row(false, Leave, Leave, Remove)],
  [row(true, Remove, Insert, Remove), row(false, Leave, Insert, Leave)],
];

static DIFFERENCE: [[ActionRow; 2]; 2] = [
  [row(false, Leave, Leave, Remove), row(false, Remove, Leave, Leave)],
  [row(false, Leave, Insert, Leave), row(true, Remove, Insert, Remove)],
];

#[derive(Clone, Default)]
pub struct NatSet {
  complemented: bool,
  bits: Vec<u64>,
}

impl NatSet {
  pub const EMPTY: NatSet = NatSet { complemented: false, bits: Vec::new() };

  /// The empty (finite) set.
  pub fn empty() -> Self {
    Self { complemented: false, bits: Vec::new() }
  }

  /// The set of all naturals.
  pub fn universe() -> Self {
    Self { complemented: true, bits: Vec::new() }
  }

  pub fn unit(n: usize) -> Self {
    let mut s = Self::empty();
    s.insert(n);
    s
  }

  /// The finite set `0..n`.
  pub fn range(n: usize) -> Self {
    let mut s = Self::empty();
    s.bits.resize((n + BLOCK_SIZE - 1) / BLOCK_SIZE, !0);
    if n % BLOCK_SIZE != 0 {
      if let Some(last) = s.bits.last_mut() {
        *last = (1u64 << (n % BLOCK_SIZE)) - 1;
      }
    }
    s
  }

  #[inline(always)]
  pub fn is_finite(&self) -> bool {
    !self.complemented
  }

  pub fn is_empty(&self) -> bool {
    !self.complemented && self.bits.iter().all(|w| *w == 0)
  }

  /// Number of members, or `None` for a co-finite set.
  pub fn card(&self) -> Option<usize> {
    if self.complemented {
      None
    } else {
      Some(self.bits.iter().map(|w| w.count_ones() as usize).sum())
    }
  }

  #[inline(always)]
  fn stored(&self, n: usize) -> bool {
    let word = n / BLOCK_SIZE;
    word < self.bits.len() && (self.bits[word] >> (n % BLOCK_SIZE)) & 1 != 0
  }

  fn set_stored(&mut self, n: usize, value: bool) {
    let word = n / BLOCK_SIZE;
    if word >= self.bits.len() {
      if !value {
        return;
      }
      self.bits.resize(word + 1, 0);
    }
    let mask = 1u64 << (n % BLOCK_SIZE);
    if value {
      self.bits[word] |= mask;
    } else {
      self.bits[word] &= !mask;
    }
  }

  #[inline(always)]
  pub fn contains(&self, n: usize) -> bool {
    self.stored(n) != self.complemented
  }

  pub fn insert(&mut self, n: usize) {
    let stored = !self.complemented;
    self.set_stored(n, stored);
  }

  pub fn remove(&mut self, n: usize) {
    let stored = self.complemented;
    self.set_stored(n, stored);
  }

  pub fn clear(&mut self) {
    self.complemented = false;
    self.bits.clear();
  }

  /// Replace the set by its complement.
  pub fn complement(&mut self) {
    self.complemented = !self.complemented;
  }

  pub fn complemented(&self) -> Self {
    let mut res = self.clone();
    res.complement();
    res
  }

  fn merge(&mut self, other: &NatSet, table: &[[ActionRow; 2]; 2]) {
    let row = table[self.complemented as usize][other.complemented as usize];
    if row.complement_left {
      self.complemented = !self.complemented;
    }
    if self.bits.len() < other.bits.len() {
      self.bits.resize(other.bits.len(), 0);
    }
    for (i, lw) in self.bits.iter_mut().enumerate() {
      let l = *lw;
      let r = if i < other.bits.len() { other.bits[i] } else { 0 };
      let mut new = 0;
      if row.only_left != Remove {
        new |= l & !r;
      }
      if row.only_right == Insert {
        new |= !l & r;
      }
      if row.both != Remove {
        new |= l & r;
      }
      *lw = new;
    }
  }

  /// Ascending iteration over the members.  For a co-finite set the
  /// iterator never ends.
  pub fn iter(&self) -> NatSetIter {
    NatSetIter {
      stored: StoredIter { bits: &self.bits, word: 0, pending: 0 },
      complemented: self.complemented,
      next_stored: None,
      started: false,
      next: 0,
    }
  }

  /// The members below `n`, in ascending order.
  pub fn iter_below(&self, n: usize) -> impl Iterator<Item = usize> + '_ {
    self.iter().take_while(move |x| *x < n)
  }

  /// The members as a vector.  Co-finite sets are bounded by `n`.
  pub fn to_vec_below(&self, n: usize) -> Vec<usize> {
    self.iter_below(n).collect()
  }

  fn significant_words(&self) -> &[u64] {
    let mut len = self.bits.len();
    while len > 0 && self.bits[len - 1] == 0 {
      len -= 1;
    }
    &self.bits[..len]
  }
}

impl<'a> AddAssign<&'a NatSet> for NatSet {
  fn add_assign(&mut self, other: &'a NatSet) {
    self.merge(other, &UNION);
  }
}

impl<'a> MulAssign<&'a NatSet> for NatSet {
  fn mul_assign(&mut self, other: &'a NatSet) {
    self.merge(other, &INTERSECTION);
  }
}

impl<'a> SubAssign<&'a NatSet> for NatSet {
  fn sub_assign(&mut self, other: &'a NatSet) {
    self.merge(other, &DIFFERENCE);
  }
}

impl PartialEq for NatSet {
  fn eq(&self, other: &NatSet) -> bool {
    self.complemented == other.complemented
      && self.significant_words() == other.significant_words()
  }
}
impl Eq for NatSet {}

impl std::iter::FromIterator<usize> for NatSet {
  fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
    let mut s = NatSet::empty();
    for n in iter {
      s.insert(n);
    }
    s
  }
}

impl fmt::Debug for NatSet {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    let stored: Vec<usize> = StoredIter { bits: &self.bits, word: 0, pending: 0 }.collect();
    if self.complemented {
      write!(fmt, "~{:?}", stored)
    } else {
      write!(fmt, "{:?}", stored)
    }
  }
}

// Ascending iteration over the stored bits.
struct StoredIter<'a> {
  bits: &'a [u64],
  word: usize,
  pending: u64,
}

impl<'a> Iterator for StoredIter<'a> {
  type Item = usize;
  fn next(&mut self) -> Option<usize> {
    while self.pending == 0 {
      if self.word >= self.bits.len() {
        return None;
      }
      self.pending = self.bits[self.word];
      self.word += 1;
    }
    let bit = self.pending.trailing_zeros() as usize;
    self.pending &= self.pending - 1;
    Some((self.word - 1) * BLOCK_SIZE + bit)
  }
}

pub struct NatSetIter<'a> {
  stored: StoredIter<'a>,
  complemented: bool,
  // Co-finite only: the next excluded natural, and the next candidate.
  next_stored: Option<usize>,
  started: bool,
  next: usize,
}

impl<'a> Iterator for NatSetIter<'a> {
  type Item = usize;
  fn next(&mut self) -> Option<usize> {
    if !self.complemented {
      return self.stored.next();
    }
    if !self.started {
      self.next_stored = self.stored.next();
      self.started = true;
    }
    loop {
      let n = self.next;
      self.next += 1;
      if self.next_stored == Some(n) {
        self.next_stored = self.stored.next();
        continue;
      }
      return Some(n);
    }
  }
}

#[cfg(test)]
fn set_of(elems: &[usize], complemented: bool) -> NatSet {
  let mut s: NatSet = elems.iter().cloned().collect();
  if complemented {
    s.complement();
  }
  s
}

// Compares a binary operation against a bounded brute force model.
#[cfg(test)]
fn check_op(
  op: &dyn Fn(&mut NatSet, &NatSet), model: &dyn Fn(bool, bool) -> bool,
) {
  let a = [1, 2, 5, 64, 70, 130];
  let b = [2, 3, 64, 71, 129, 130, 200];
  for &ca in &[false, true] {
    for &cb in &[false, true] {
      let left = set_of(&a, ca);
      let right = set_of(&b, cb);
      let mut res = left.clone();
      op(&mut res, &right);
      for n in 0..260 {
        assert_eq!(
          res.contains(n),
          model(left.contains(n), right.contains(n)),
          "element {} with complemented = ({}, {})",
          n,
          ca,
          cb
        );
      }
      // Co-finite results must still contain something far beyond
      // everything stored.
      if !res.is_finite() {
        assert!(res.contains(100_000));
      } else {
        assert!(!res.contains(100_000));
      }
    }
  }
}

#[test]
fn union_all_combinations() {
  check_op(&|l, r| *l += r, &|x, y| x || y);
}

#[test]
fn intersection_all_combinations() {
  check_op(&|l, r| *l *= r, &|x, y| x && y);
}

#[test]
fn difference_all_combinations() {
  check_op(&|l, r| *l -= r, &|x, y| x && !y);
}

#[test]
fn union_then_difference_covers_difference() {
  let a = set_of(&[0, 4, 9, 65], false);
  let b = set_of(&[4, 10, 65], false);
  let mut lhs = a.clone();
  lhs += &b;
  lhs -= &b;
  let mut rhs = a.clone();
  rhs -= &b;
  let mut check = rhs.clone();
  check -= &lhs;
  assert!(check.is_empty());
}

#[test]
fn complement_is_self_inverse() {
  let a = set_of(&[3, 7, 300], false);
  let mut b = a.clone();
  b.complement();
  assert!(!b.is_finite());
  assert!(b.contains(0));
  assert!(!b.contains(7));
  assert!(b != a);
  b.complement();
  assert!(b == a);
}

#[test]
fn insert_and_remove_on_cofinite() {
  let mut s = NatSet::universe();
  assert!(s.contains(12345));
  s.remove(5);
  assert!(!s.contains(5));
  assert_eq!(s.card(), None);
  s.insert(5);
  assert!(s.contains(5));
  assert!(s == NatSet::universe());
}

#[test]
fn equality_ignores_trailing_words() {
  let mut a = NatSet::unit(200);
  a.remove(200);
  assert!(a == NatSet::empty());
  assert!(a.is_empty());
  assert_eq!(a.card(), Some(0));
}

#[test]
fn iteration_hides_finiteness() {
  let fin = set_of(&[1, 3, 64], false);
  assert_eq!(fin.iter().collect::<Vec<_>>(), vec![1, 3, 64]);

  let cofin = set_of(&[1, 3, 64], true);
  let first: Vec<usize> = cofin.iter().take(5).collect();
  assert_eq!(first, vec![0, 2, 4, 5, 6]);
  assert_eq!(cofin.iter_below(66).count(), 63);
  assert_eq!(cofin.to_vec_below(4), vec![0, 2]);
}

#[test]
fn range_is_dense_prefix() {
  let r = NatSet::range(70);
  assert_eq!(r.card(), Some(70));
  assert!(r.contains(69));
  assert!(!r.contains(70));
  assert_eq!(NatSet::range(64).card(), Some(64));
  assert!(NatSet::range(0).is_empty());
}

#[test]
fn clones_evolve_identically() {
  let mut a = set_of(&[2, 8], true);
  let mut b = a.clone();
  let other = set_of(&[8, 9], false);
  a += &other;
  b += &other;
  a *= &set_of(&[1, 2, 3, 9], false);
  b *= &set_of(&[1, 2, 3, 9], false);
  assert!(a == b);
  assert_eq!(a.card(), Some(3));
}
