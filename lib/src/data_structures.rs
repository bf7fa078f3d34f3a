/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Data structures for the whole crate.

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::Index;
use std::ops::IndexMut;
use std::slice::{Iter, IterMut};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

//=============================================================================
// Queues

pub type Queue<T> = VecDeque<T>;

//=============================================================================
// Maps

pub type Map<K, V> = FxHashMap<K, V>;

//=============================================================================
// Sets of things

pub struct Set<T> {
  set: FxHashSet<T>,
}

impl<T: Eq + Ord + Hash + Copy + fmt::Debug> Set<T> {
  #[inline(never)]
  pub fn empty() -> Self {
    Self { set: FxHashSet::<T>::default() }
  }

  #[inline(never)]
  pub fn two(item1: T, item2: T) -> Self {
    let mut s = Self::empty();
    s.insert(item1);
    s.insert(item2);
    s
  }

  #[inline(never)]
  pub fn card(&self) -> usize {
    self.set.len()
  }

  #[inline(never)]
  pub fn insert(&mut self, item: T) {
    self.set.insert(item);
  }

  #[inline(never)]
  pub fn is_empty(&self) -> bool {
    self.set.is_empty()
  }

  #[inline(never)]
  pub fn contains(&self, item: T) -> bool {
    self.set.contains(&item)
  }

  #[inline(never)]
  pub fn union(&mut self, other: &Self) {
    for item in other.set.iter() {
      self.set.insert(*item);
    }
  }

  #[inline(never)]
  pub fn remove(&mut self, other: &Self) {
    for item in other.set.iter() {
      self.set.remove(item);
    }
  }

  #[inline(never)]
  pub fn intersects(&self, other: &Self) -> bool {
    !self.set.is_disjoint(&other.set)
  }

  #[inline(never)]
  pub fn is_subset_of(&self, other: &Self) -> bool {
    self.set.is_subset(&other.set)
  }

  // Sorted, so that callers which iterate over the result behave
  // deterministically.
  #[inline(never)]
  pub fn to_vec(&self) -> Vec<T> {
    let mut res = Vec::<T>::new();
    for item in self.set.iter() {
      res.push(*item)
    }
    res.sort_unstable();
    res
  }
}

impl<T: Eq + Ord + Hash + Copy + fmt::Debug> fmt::Debug for Set<T> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    // Print the elements in some way which depends only on what is
    // present in the set, and not on any other factor.
    write!(fmt, "{:?}", self.to_vec())
  }
}

impl<T: Eq + Ord + Hash + Copy + Clone + fmt::Debug> Clone for Set<T> {
  #[inline(never)]
  fn clone(&self) -> Self {
    let mut res = Set::<T>::empty();
    for item in self.set.iter() {
      res.set.insert(item.clone());
    }
    res
  }
}

pub struct SetIter<'a, T> {
  set_iter: std::collections::hash_set::Iter<'a, T>,
}
impl<T> Set<T> {
  pub fn iter(&self) -> SetIter<T> {
    SetIter { set_iter: self.set.iter() }
  }
}
impl<'a, T> Iterator for SetIter<'a, T> {
  type Item = &'a T;
  fn next(&mut self) -> Option<Self::Item> {
    self.set_iter.next()
  }
}

//=============================================================================
// Iteration boilerplate for entities.  The only purpose of this is to support
// constructions of the form
//
//   for ent in startEnt .dotdot( endPlus1Ent ) {
//   }
//
// until such time as |trait Step| is available in stable Rust.  At that point
// |fn dotdot| and all of the following can be removed, and the loops
// rewritten using the standard syntax:
//
//   for ent in startEnt .. endPlus1Ent {
//   }

pub trait PlusN {
  fn zero() -> Self;
  fn plus_n(&self, n: usize) -> Self;
}

#[derive(Clone, Copy)]
pub struct MyRange<T> {
  first: T,
  lastPlus1: T,
  len: usize,
}
impl<T: Copy + PartialOrd + PlusN> IntoIterator for MyRange<T> {
  type Item = T;
  type IntoIter = MyIterator<T>;
  fn into_iter(self) -> Self::IntoIter {
    MyIterator { range: self, next: self.first }
  }
}

impl<T: Copy + Eq + Ord + PlusN> MyRange<T> {
  /// Create a new range object.
  pub fn new(from: T, len: usize) -> MyRange<T> {
    MyRange { first: from, lastPlus1: from.plus_n(len), len }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn contains(&self, t: T) -> bool {
    t >= self.first && t < self.lastPlus1
  }
}

pub struct MyIterator<T> {
  range: MyRange<T>,
  next: T,
}
impl<T: Copy + PartialOrd + PlusN> Iterator for MyIterator<T> {
  type Item = T;
  fn next(&mut self) -> Option<Self::Item> {
    if self.next >= self.range.lastPlus1 {
      None
    } else {
      let res = Some(self.next);
      self.next = self.next.plus_n(1);
      res
    }
  }
}

//=============================================================================
// Vectors where both the index and element types can be specified (and at
// most 2^32-1 elems can be stored.  What if this overflows?)

pub struct TypedIxVec<TyIx, Ty> {
  vek: Vec<Ty>,
  ty_ix: PhantomData<TyIx>,
}

impl<TyIx, Ty> TypedIxVec<TyIx, Ty>
where
  Ty: Clone,
  TyIx: Copy + Eq + Ord + PlusN + Into<u32>,
{
  pub fn new() -> Self {
    Self { vek: Vec::new(), ty_ix: PhantomData::<TyIx> }
  }
  pub fn iter(&self) -> Iter<Ty> {
    self.vek.iter()
  }
  pub fn iter_mut(&mut self) -> IterMut<Ty> {
    self.vek.iter_mut()
  }
  pub fn range(&self) -> MyRange<TyIx> {
    MyRange::new(TyIx::zero(), self.len() as usize)
  }
  pub fn len(&self) -> u32 {
    // FIXME what if this overflows?
    self.vek.len() as u32
  }
  pub fn push(&mut self, item: Ty) {
    // FIXME what if this overflows?
    self.vek.push(item);
  }
  pub fn resize(&mut self, new_len: u32, value: Ty) {
    self.vek.resize(new_len as usize, value);
  }
  pub fn into_vec(self) -> Vec<Ty> {
    self.vek
  }
}

impl<TyIx, Ty> Index<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  type Output = Ty;
  fn index(&self, ix: TyIx) -> &Ty {
    &self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> IndexMut<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  fn index_mut(&mut self, ix: TyIx) -> &mut Ty {
    &mut self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> Clone for TypedIxVec<TyIx, Ty>
where
  Ty: Clone,
{
  fn clone(&self) -> Self {
    Self { vek: self.vek.clone(), ty_ix: PhantomData::<TyIx> }
  }
}

impl<TyIx, Ty: fmt::Debug> fmt::Debug for TypedIxVec<TyIx, Ty> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{:?}", self.vek)
  }
}

//=============================================================================

macro_rules! generate_boilerplate {
  ($TypeIx:ident, $Type:ident, $PrintingPrefix:expr) => {
    #[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
    #[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
    // Firstly, the indexing type (TypeIx)
    pub enum $TypeIx {
      $TypeIx(u32),
    }
    impl $TypeIx {
      #[allow(dead_code)]
      pub fn new(n: u32) -> Self {
        Self::$TypeIx(n)
      }
      #[allow(dead_code)]
      pub fn max_value() -> Self {
        Self::$TypeIx(u32::max_value())
      }
      #[allow(dead_code)]
      pub fn min_value() -> Self {
        Self::$TypeIx(u32::min_value())
      }
      #[allow(dead_code)]
      pub fn get(self) -> u32 {
        match self {
          $TypeIx::$TypeIx(n) => n,
        }
      }
      #[allow(dead_code)]
      pub fn get_usize(self) -> usize {
        self.get() as usize
      }
      #[allow(dead_code)]
      pub fn plus(self, delta: u32) -> $TypeIx {
        $TypeIx::$TypeIx(self.get() + delta)
      }
      #[allow(dead_code)]
      pub fn minus(self, delta: u32) -> $TypeIx {
        $TypeIx::$TypeIx(self.get() - delta)
      }
      #[allow(dead_code)]
      pub fn dotdot(&self, lastPlus1: $TypeIx) -> MyRange<$TypeIx> {
        let len = (lastPlus1.get() - self.get()) as usize;
        MyRange::new(*self, len)
      }
    }
    impl fmt::Debug for $TypeIx {
      fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}{}", $PrintingPrefix, &self.get())
      }
    }
    impl PlusN for $TypeIx {
      #[inline(always)]
      fn zero() -> Self {
        Self::new(0)
      }
      #[inline(always)]
      fn plus_n(&self, n: usize) -> Self {
        self.plus(n as u32)
      }
    }
    impl Into<u32> for $TypeIx {
      #[inline(always)]
      fn into(self) -> u32 {
        self.get()
      }
    }
    impl From<u32> for $TypeIx {
      #[inline(always)]
      fn from(n: u32) -> $TypeIx {
        $TypeIx::$TypeIx(n)
      }
    }
  };
}

generate_boilerplate!(InstIx, Inst, "i");

generate_boilerplate!(BlockIx, Block, "b");

generate_boilerplate!(NodeIx, Node, "n");

generate_boilerplate!(MoveIx, Move, "m");

impl PlusN for usize {
  #[inline(always)]
  fn zero() -> Self {
    0
  }
  #[inline(always)]
  fn plus_n(&self, n: usize) -> Self {
    self + n
  }
}

//=============================================================================
// Definitions of register classes, registers and stack slots, and printing
// thereof.

#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum RegClass {
  I32 = 0,
  F32 = 1,
  F64 = 2,
}
pub const NUM_REG_CLASSES: usize = 3;

impl RegClass {
  #[inline(always)]
  pub fn rc_to_u32(self) -> u32 {
    self as u32
  }
  #[inline(always)]
  pub fn rc_to_usize(self) -> usize {
    self as usize
  }
  #[inline(always)]
  pub fn rc_from_u32(rc: u32) -> RegClass {
    match rc {
      0 => RegClass::I32,
      1 => RegClass::F32,
      2 => RegClass::F64,
      _ => panic!("RegClass::rc_from_u32"),
    }
  }

  pub fn short_name(self) -> &'static str {
    match self {
      RegClass::I32 => "I",
      RegClass::F32 => "F",
      RegClass::F64 => "D",
    }
  }

  pub fn all() -> [RegClass; NUM_REG_CLASSES] {
    [RegClass::I32, RegClass::F32, RegClass::F64]
  }
}

// Reg represents both real and virtual registers.  For compactness and speed,
// these fields are packed into a single u32.  The format is:
//
// Virtual Reg:   1  rc:3                index:28
// Real Reg:      0  rc:3  uu:12  enc:8  index:8
//
// |rc| is the register class.  |uu| means "unused".  |enc| is the hardware
// encoding for the reg.  |index| is a zero based index which has the
// following meanings:
//
// * for a Virtual Reg, |index| is just the virtual register number.
// * for a Real Reg, |index| is the entry number in the associated
//   |RealRegUniverse|.
//
// Real registers may overlap each other (an F64 register made of two F32
// halves, say).  The packed form knows nothing about that; overlap is
// described by |RealRegUniverse::aliases|.

#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Reg {
  do_not_access_this_directly: u32,
}

static INVALID_REG: u32 = 0xffffffff;

impl Reg {
  #[inline(always)]
  pub fn is_virtual(self) -> bool {
    self.is_valid() && (self.do_not_access_this_directly & 0x8000_0000) != 0
  }
  #[inline(always)]
  pub fn is_real(self) -> bool {
    self.is_valid() && (self.do_not_access_this_directly & 0x8000_0000) == 0
  }
  pub fn new_real(rc: RegClass, enc: u8, index: u8) -> Self {
    let n = (0 << 31)
      | (rc.rc_to_u32() << 28)
      | ((enc as u32) << 8)
      | ((index as u32) << 0);
    Reg { do_not_access_this_directly: n }
  }
  pub fn new_virtual(rc: RegClass, index: u32) -> Self {
    if index >= (1 << 28) {
      panic!("new_virtual(): index too large");
    }
    let n = (1 << 31) | (rc.rc_to_u32() << 28) | (index << 0);
    Reg { do_not_access_this_directly: n }
  }
  pub fn invalid() -> Reg {
    Reg { do_not_access_this_directly: INVALID_REG }
  }
  #[inline(always)]
  pub fn is_valid(self) -> bool {
    self.do_not_access_this_directly != INVALID_REG
  }
  pub fn get_class(self) -> RegClass {
    debug_assert!(self.is_valid());
    RegClass::rc_from_u32((self.do_not_access_this_directly >> 28) & 0x7)
  }
  #[inline(always)]
  pub fn get_index(self) -> usize {
    debug_assert!(self.is_valid());
    // Return type is usize because typically we will want to use the
    // result for indexing into a Vec
    if self.is_virtual() {
      (self.do_not_access_this_directly & ((1 << 28) - 1)) as usize
    } else {
      (self.do_not_access_this_directly & ((1 << 8) - 1)) as usize
    }
  }
  pub fn get_hw_encoding(self) -> u8 {
    debug_assert!(self.is_valid());
    if self.is_virtual() {
      panic!("Reg::get_hw_encoding on virtual register")
    } else {
      ((self.do_not_access_this_directly >> 8) & ((1 << 8) - 1)) as u8
    }
  }
  pub fn as_virtual_reg(self) -> Option<VirtualReg> {
    if self.is_virtual() {
      Some(VirtualReg { reg: self })
    } else {
      None
    }
  }
  pub fn as_real_reg(self) -> Option<RealReg> {
    if self.is_virtual() {
      None
    } else {
      Some(RealReg { reg: self })
    }
  }
}

impl fmt::Debug for Reg {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    if self.is_valid() {
      write!(
        fmt,
        "{}{}{}",
        if self.is_virtual() { "v" } else { "R" },
        self.get_class().short_name(),
        self.get_index()
      )
    } else {
      write!(fmt, "rINVALID")
    }
  }
}

// RealReg and VirtualReg are merely wrappers around Reg, which try to
// dynamically ensure that they are really wrapping the correct flavour of
// register.

#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct RealReg {
  reg: Reg,
}
impl Reg /* !!not RealReg!! */ {
  pub fn to_real_reg(self) -> RealReg {
    if self.is_virtual() {
      panic!("Reg::to_real_reg: this is a virtual register")
    } else {
      RealReg { reg: self }
    }
  }
}
impl RealReg {
  pub fn get_class(self) -> RegClass {
    self.reg.get_class()
  }
  #[inline(always)]
  pub fn get_index(self) -> usize {
    self.reg.get_index()
  }
  pub fn get_hw_encoding(self) -> usize {
    self.reg.get_hw_encoding() as usize
  }
  #[inline(always)]
  pub fn to_reg(self) -> Reg {
    self.reg
  }
}
impl fmt::Debug for RealReg {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{:?}", self.reg)
  }
}

#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct VirtualReg {
  reg: Reg,
}
impl Reg /* !!not VirtualReg!! */ {
  #[inline(always)]
  pub fn to_virtual_reg(self) -> VirtualReg {
    if self.is_virtual() {
      VirtualReg { reg: self }
    } else {
      panic!("Reg::to_virtual_reg: this is a real register")
    }
  }
}
impl VirtualReg {
  pub fn get_class(self) -> RegClass {
    self.reg.get_class()
  }
  #[inline(always)]
  pub fn get_index(self) -> usize {
    self.reg.get_index()
  }
  #[inline(always)]
  pub fn to_reg(self) -> Reg {
    self.reg
  }
}
impl fmt::Debug for VirtualReg {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{:?}", self.reg)
  }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct SpillSlot(u32);

impl SpillSlot {
  #[inline(always)]
  pub fn new(n: u32) -> Self {
    Self(n)
  }
  #[inline(always)]
  pub fn get(self) -> u32 {
    self.0
  }
  #[inline(always)]
  pub fn get_usize(self) -> usize {
    self.get() as usize
  }
  pub fn round_up(self, num_slots: u32) -> SpillSlot {
    assert!(num_slots > 0);
    SpillSlot::new((self.get() + num_slots - 1) / num_slots * num_slots)
  }
  pub fn inc(self, num_slots: u32) -> SpillSlot {
    SpillSlot::new(self.get() + num_slots)
  }
}
impl fmt::Debug for SpillSlot {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "S{}", self.get())
  }
}

//=============================================================================
// Definitions of the "real register universe".

// A "Real Register Universe" is a read-only structure that contains all
// information about real registers on a given host.  It serves several
// purposes:
//
// * defines the mapping from real register indices to the registers
//   themselves
//
// * defines the size of the initial section of that mapping that is available
// to the register allocator for use, so that it can treat the registers under
// its control as a zero based, contiguous array.  This is important for its
// efficiency.
//
// * records which registers overlap, so that the allocator can tell how many
// registers of one class a value of another class can take away.

#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct RegClassInfo {
  // Both |first| and |last| are in-range indices into
  // |RealRegUniverse::regs|.
  pub first: usize,
  pub last: usize,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct RealRegUniverse {
  // The registers themselves.  All must be real registers, and all must
  // have their index number (.get_index()) equal to the array index here,
  // since this is the only place where we map index numbers to actual
  // registers.
  pub regs: Vec<(RealReg, String)>,

  // This is the size of the initial section of |regs| that is available to
  // the allocator.  It must be <= |regs|.len().
  pub allocable: usize,

  // Ranges for groups of allocable registers.  Indexes into
  // |allocable_by_class| are RegClass values, such as RegClass::F32.  If the
  // resulting entry is |None| then there are no registers in that class.
  // Otherwise the value is |Some(RegClassInfo { first, last })|, which
  // specifies the range of entries in |regs| corresponding to that class.
  // The range includes both |first| and |last|, and must lie within the
  // allocable prefix of |regs|.
  pub allocable_by_class: [Option<RegClassInfo>; NUM_REG_CLASSES],

  // For each entry in |regs|, the indices of the other registers that share
  // storage with it.  Most targets have none, in which case every entry is
  // empty.  The relation must be symmetric.
  pub aliases: Vec<SmallVec<[u8; 4]>>,
}

impl RealRegUniverse {
  /// Build a universe in which no registers overlap.
  pub fn new_without_aliases(
    regs: Vec<(RealReg, String)>, allocable: usize,
    allocable_by_class: [Option<RegClassInfo>; NUM_REG_CLASSES],
  ) -> Self {
    let aliases = vec![SmallVec::new(); regs.len()];
    let univ = RealRegUniverse { regs, allocable, allocable_by_class, aliases };
    univ.check_is_sane();
    univ
  }

  /// Do the registers with universe indices |a| and |b| share any storage?
  /// A register always overlaps itself.
  #[inline(always)]
  pub fn overlaps(&self, a: usize, b: usize) -> bool {
    a == b || self.aliases[a].iter().any(|ix| *ix as usize == b)
  }

  /// The allocable registers of class |rc|, lowest index first.
  pub fn allocable_regs(&self, rc: RegClass) -> Vec<RealReg> {
    match self.allocable_by_class[rc.rc_to_usize()] {
      None => vec![],
      Some(info) => (info.first..info.last + 1).map(|i| self.regs[i].0).collect(),
    }
  }

  /// How many registers can hold a value of class |rc|?
  pub fn num_allocable(&self, rc: RegClass) -> u32 {
    match self.allocable_by_class[rc.rc_to_usize()] {
      None => 0,
      Some(info) => (info.last - info.first + 1) as u32,
    }
  }

  pub fn is_allocable(&self, rreg: RealReg) -> bool {
    rreg.get_index() < self.allocable
  }

  /// Is |rreg| one of the registers this universe describes?
  pub fn contains(&self, rreg: RealReg) -> bool {
    let ix = rreg.get_index();
    ix < self.regs.len() && self.regs[ix].0 == rreg
  }

  pub fn name_of(&self, rreg: RealReg) -> &str {
    &self.regs[rreg.get_index()].1
  }

  // Check that the given universe satisfies various invariants, and panic
  // if not.  All the invariants are important.
  pub fn check_is_sane(&self) {
    let regs_len = self.regs.len();
    let regs_allocable = self.allocable;
    // The universe must contain at most 256 registers.  That's because
    // |Reg| only has an 8-bit index value field, so if the universe
    // contained more than 256 registers, we'd never be able to index into
    // entries 256 and above.
    let mut ok = regs_len <= 256;
    if ok {
      ok = regs_allocable <= regs_len;
    }
    if ok {
      ok = self.aliases.len() == regs_len;
    }
    // All registers must have an index value which points back at the
    // |regs| slot they are in.  Also they really must be real regs.
    if ok {
      for i in 0..regs_len {
        let (reg, _name) = &self.regs[i];
        if ok && (reg.to_reg().is_virtual() || reg.get_index() != i) {
          ok = false;
        }
      }
    }
    // Aliasing must be symmetric, in range, and never list a register as
    // aliasing itself.
    if ok {
      for i in 0..regs_len {
        for j in self.aliases[i].iter() {
          let j = *j as usize;
          if j >= regs_len
            || j == i
            || !self.aliases[j].iter().any(|k| *k as usize == i)
          {
            ok = false;
          }
        }
      }
    }
    // The allocatable regclass groupings must be contiguous, must lie
    // within the allocable prefix, and must cover it exactly once.
    if ok {
      let mut regclass_used = [false; NUM_REG_CLASSES];
      for i in 0..regs_allocable {
        let (reg, _name) = &self.regs[i];
        regclass_used[reg.get_class().rc_to_usize()] = true;
      }
      let mut regs_visited = 0;
      for rc in 0..NUM_REG_CLASSES {
        match &self.allocable_by_class[rc] {
          &None => {
            if regclass_used[rc] {
              ok = false;
            }
          }
          &Some(RegClassInfo { first, last }) => {
            if !regclass_used[rc] || first > last || last >= regs_allocable {
              ok = false;
            }
            if ok {
              for i in first..last + 1 {
                let (reg, _name) = &self.regs[i];
                if ok && RegClass::rc_from_u32(rc as u32) != reg.get_class() {
                  ok = false;
                }
                regs_visited += 1;
              }
            }
          }
        }
      }
      if ok && regs_visited != regs_allocable {
        ok = false;
      }
    }
    // So finally ..
    if !ok {
      panic!("RealRegUniverse::check_is_sane: invalid RealRegUniverse");
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use smallvec::smallvec;

  #[test]
  fn reg_packing() {
    let v = Reg::new_virtual(RegClass::F32, 1234);
    assert!(v.is_virtual());
    assert!(!v.is_real());
    assert_eq!(v.get_class(), RegClass::F32);
    assert_eq!(v.get_index(), 1234);

    let r = Reg::new_real(RegClass::F64, 7, 19);
    assert!(r.is_real());
    assert_eq!(r.get_class(), RegClass::F64);
    assert_eq!(r.get_index(), 19);
    assert_eq!(r.get_hw_encoding(), 7);
    assert_eq!(format!("{:?}", r), "RD19");
    assert!(r.as_virtual_reg().is_none());
  }

  #[test]
  fn overlapping_universe() {
    // s0..s3 are single-precision halves of d0 and d1.
    let s = |i: u8| Reg::new_real(RegClass::F32, i, i).to_real_reg();
    let d = |i: u8, ix: u8| Reg::new_real(RegClass::F64, i, ix).to_real_reg();
    let regs = vec![
      (s(0), "s0".to_string()),
      (s(1), "s1".to_string()),
      (s(2), "s2".to_string()),
      (s(3), "s3".to_string()),
      (d(0, 4), "d0".to_string()),
      (d(1, 5), "d1".to_string()),
    ];
    let mut allocable_by_class = [None; NUM_REG_CLASSES];
    allocable_by_class[RegClass::F32.rc_to_usize()] =
      Some(RegClassInfo { first: 0, last: 3 });
    allocable_by_class[RegClass::F64.rc_to_usize()] =
      Some(RegClassInfo { first: 4, last: 5 });
    let aliases = vec![
      smallvec![4],
      smallvec![4],
      smallvec![5],
      smallvec![5],
      smallvec![0, 1],
      smallvec![2, 3],
    ];
    let univ =
      RealRegUniverse { regs, allocable: 6, allocable_by_class, aliases };
    univ.check_is_sane();

    assert!(univ.overlaps(0, 4));
    assert!(univ.overlaps(5, 3));
    assert!(!univ.overlaps(0, 5));
    assert!(univ.overlaps(2, 2));
    assert_eq!(univ.num_allocable(RegClass::F64), 2);
    assert_eq!(univ.num_allocable(RegClass::I32), 0);
    assert_eq!(univ.allocable_regs(RegClass::F32).len(), 4);
  }

  #[test]
  #[should_panic]
  fn asymmetric_aliases_are_rejected() {
    let r0 = Reg::new_real(RegClass::I32, 0, 0).to_real_reg();
    let r1 = Reg::new_real(RegClass::I32, 1, 1).to_real_reg();
    let mut allocable_by_class = [None; NUM_REG_CLASSES];
    allocable_by_class[RegClass::I32.rc_to_usize()] =
      Some(RegClassInfo { first: 0, last: 1 });
    let univ = RealRegUniverse {
      regs: vec![(r0, "r0".to_string()), (r1, "r1".to_string())],
      allocable: 2,
      allocable_by_class,
      aliases: vec![smallvec![1], smallvec![]],
    };
    univ.check_is_sane();
  }

  #[test]
  fn typed_vectors_range_from_zero() {
    let mut v = TypedIxVec::<BlockIx, u32>::new();
    v.push(7);
    v.push(8);
    v.push(9);
    let ixs: Vec<BlockIx> = v.range().into_iter().collect();
    assert_eq!(ixs, vec![BlockIx::new(0), BlockIx::new(1), BlockIx::new(2)]);
    assert_eq!(v[BlockIx::new(2)], 9);
    assert_eq!(TypedIxVec::<InstIx, u32>::new().range().len(), 0);
  }

  #[test]
  fn set_of_two() {
    let s = Set::two(BlockIx::new(3), BlockIx::new(1));
    assert_eq!(s.card(), 2);
    assert_eq!(s.to_vec(), vec![BlockIx::new(1), BlockIx::new(3)]);
    assert_eq!(Set::two(4u32, 4u32).card(), 1);
  }
}
