/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Edits of the instruction stream: spill code insertion, and the final
//! mapping of virtual registers to their colours.

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

use log::{debug, trace};

use crate::data_structures::{
  Map, RealReg, RealRegUniverse, Reg, RegClass, Set, SpillSlot, VirtualReg,
};
use crate::interface::{Function, RegUsageMapper};

//=============================================================================
// Edit list items

#[derive(Clone, Debug)]
pub(crate) enum InstToInsert {
  Spill { to_slot: SpillSlot, from_reg: Reg, for_vreg: VirtualReg },
  Reload { to_reg: Reg, from_slot: SpillSlot, for_vreg: VirtualReg },
}

impl InstToInsert {
  pub(crate) fn construct<F: Function>(&self, f: &F) -> F::Inst {
    match self {
      &InstToInsert::Spill { to_slot, from_reg, for_vreg } => {
        f.gen_spill(to_slot, from_reg, for_vreg)
      }
      &InstToInsert::Reload { to_reg, from_slot, for_vreg } => {
        f.gen_reload(to_reg, from_slot, for_vreg)
      }
    }
  }
}

//=============================================================================
// Register maps

/// The same replacement for uses, defs and mods.
pub(crate) struct VRegMap<'a>(pub(crate) &'a Map<VirtualReg, Reg>);

impl<'a> RegUsageMapper for VRegMap<'a> {
  fn get_use(&self, vreg: VirtualReg) -> Option<Reg> {
    self.0.get(&vreg).cloned()
  }
  fn get_def(&self, vreg: VirtualReg) -> Option<Reg> {
    self.0.get(&vreg).cloned()
  }
  fn get_mod(&self, vreg: VirtualReg) -> Option<Reg> {
    self.0.get(&vreg).cloned()
  }
}

//=============================================================================
// Spilling

/// Rewrites spilled virtual registers into memory, across rounds of
/// allocation.  Each spilled register (or coalesced group of them) gets one
/// slot for the rest of the function's life.
///
/// Every instruction mentioning a spilled register gets a fresh temporary
/// for it: reloaded before the instruction if it is read, spilled after it if
/// it is written.  Control transfers must not write virtual registers, since
/// a spill can't be placed after them.
pub(crate) struct Spiller {
  next_vreg_index: u32,
  next_slot: SpillSlot,
  slot_of: Map<VirtualReg, SpillSlot>,
  temps: Set<VirtualReg>,
  pub(crate) spill_loads: u32,
  pub(crate) spill_stores: u32,
}

impl Spiller {
  pub(crate) fn new<F: Function>(func: &F) -> Self {
    let mut max_index = None;
    for b in func.blocks() {
      for insn in func.block_insns(b) {
        let iru = func.get_regs(insn);
        for reg in iru
          .used
          .iter()
          .chain(iru.defined.iter())
          .chain(iru.modified.iter())
        {
          if reg.is_virtual() {
            let ix = reg.get_index() as u32;
            max_index = Some(max_index.map_or(ix, |m: u32| m.max(ix)));
          }
        }
      }
    }
    Self {
      next_vreg_index: max_index.map_or(0, |m| m + 1),
      next_slot: SpillSlot::new(0),
      slot_of: Map::default(),
      temps: Set::empty(),
      spill_loads: 0,
      spill_stores: 0,
    }
  }

  pub(crate) fn num_spill_slots(&self) -> u32 {
    self.next_slot.get()
  }

  /// Is |vreg| a temporary made by spilling?
  pub(crate) fn is_temp(&self, vreg: VirtualReg) -> bool {
    self.temps.contains(vreg)
  }

  fn slot_for<F: Function>(&mut self, func: &F, owner: VirtualReg) -> SpillSlot {
    if let Some(slot) = self.slot_of.get(&owner) {
      return *slot;
    }
    let size = func.get_spillslot_size(owner.get_class(), owner);
    let slot = self.next_slot.round_up(size);
    self.next_slot = slot.inc(size);
    self.slot_of.insert(owner, slot);
    debug!("spill: {:?} lives in {:?}", owner, slot);
    slot
  }

  fn new_temp(&mut self, rc: RegClass) -> VirtualReg {
    let vreg = Reg::new_virtual(rc, self.next_vreg_index).to_virtual_reg();
    self.next_vreg_index += 1;
    self.temps.insert(vreg);
    vreg
  }

  /// Rewrite every mention of a key of |owners| to go through memory.  The
  /// value for each key names the register whose slot it shares; members of
  /// a coalesced group all map to the same owner, and one instruction
  /// mentioning several members gets a single temporary.
  #[inline(never)]
  pub(crate) fn spill<F: Function>(
    &mut self, func: &mut F, owners: &Map<VirtualReg, VirtualReg>,
  ) {
    if owners.is_empty() {
      return;
    }
    let loads_before = self.spill_loads;
    let stores_before = self.spill_stores;

    for b in func.blocks() {
      let old = std::mem::take(func.block_insns_mut(b));
      let mut new = Vec::with_capacity(old.len());
      for mut insn in old {
        let iru = func.get_regs(&insn);

        // Owners read and written by this instruction, sorted, for a
        // deterministic insertion order.
        let mut reads = Set::<VirtualReg>::empty();
        let mut writes = Set::<VirtualReg>::empty();
        for reg in iru.used.iter().chain(iru.modified.iter()) {
          if let Some(owner) = reg.as_virtual_reg().and_then(|v| owners.get(&v))
          {
            reads.insert(*owner);
          }
        }
        for reg in iru.defined.iter().chain(iru.modified.iter()) {
          if let Some(owner) = reg.as_virtual_reg().and_then(|v| owners.get(&v))
          {
            writes.insert(*owner);
          }
        }
        if reads.is_empty() && writes.is_empty() {
          new.push(insn);
          continue;
        }

        let mut involved = reads.clone();
        involved.union(&writes);
        let mut temp_of = Map::<VirtualReg, Reg>::default();
        for owner in involved.to_vec() {
          let temp = self.new_temp(owner.get_class());
          temp_of.insert(owner, temp.to_reg());
        }

        for owner in reads.to_vec() {
          let ins = InstToInsert::Reload {
            to_reg: temp_of[&owner],
            from_slot: self.slot_for(&*func, owner),
            for_vreg: owner,
          };
          trace!("spill: {:?}", ins);
          new.push(ins.construct(&*func));
          self.spill_loads += 1;
        }

        let mut renames = Map::<VirtualReg, Reg>::default();
        for reg in iru
          .used
          .iter()
          .chain(iru.defined.iter())
          .chain(iru.modified.iter())
        {
          if let Some(vreg) = reg.as_virtual_reg() {
            if let Some(owner) = owners.get(&vreg) {
              renames.insert(vreg, temp_of[owner]);
            }
          }
        }
        F::map_regs(&mut insn, &VRegMap(&renames));
        new.push(insn);

        for owner in writes.to_vec() {
          let ins = InstToInsert::Spill {
            to_slot: self.slot_for(&*func, owner),
            from_reg: temp_of[&owner],
            for_vreg: owner,
          };
          trace!("spill: {:?}", ins);
          new.push(ins.construct(&*func));
          self.spill_stores += 1;
        }
      }
      *func.block_insns_mut(b) = new;
    }

    debug!(
      "spill: {} registers, {} reloads and {} spills inserted",
      owners.len(),
      self.spill_loads - loads_before,
      self.spill_stores - stores_before
    );
  }

  /// Send every volatile virtual register to memory.
  pub(crate) fn spill_volatile<F: Function>(&mut self, func: &mut F) {
    let mut owners = Map::<VirtualReg, VirtualReg>::default();
    for b in func.blocks() {
      for insn in func.block_insns(b) {
        let iru = func.get_regs(insn);
        for reg in iru
          .used
          .iter()
          .chain(iru.defined.iter())
          .chain(iru.modified.iter())
        {
          if let Some(vreg) = reg.as_virtual_reg() {
            if func.is_volatile(vreg) {
              owners.insert(vreg, vreg);
            }
          }
        }
      }
    }
    debug!("spill: {} volatile registers", owners.len());
    self.spill(func, &owners);
  }
}

//=============================================================================
// Final rewrite

/// Replace every virtual register by its colour, delete moves that have
/// become `r := r`, and collect the real registers written.  Returns the
/// number of moves deleted along with the clobbered set.
#[inline(never)]
pub(crate) fn apply_colors<F: Function>(
  func: &mut F, colors: &Map<VirtualReg, RealReg>,
  reg_universe: &RealRegUniverse,
) -> (u32, Set<RealReg>) {
  let mut map = Map::<VirtualReg, Reg>::default();
  for (vreg, rreg) in colors.iter() {
    map.insert(*vreg, rreg.to_reg());
  }
  let mapper = VRegMap(&map);

  let mut num_deleted = 0;
  let mut clobbered = Set::<RealReg>::empty();
  for b in func.blocks() {
    let old = std::mem::take(func.block_insns_mut(b));
    let mut new = Vec::with_capacity(old.len());
    for mut insn in old {
      F::map_regs(&mut insn, &mapper);
      if let Some((dst, src)) = func.is_move(&insn) {
        if dst == src {
          trace!("apply_colors: deleting {:?}", insn);
          num_deleted += 1;
          continue;
        }
      }
      let iru = func.get_regs(&insn);
      for reg in iru.defined.iter().chain(iru.modified.iter()) {
        debug_assert!(reg.is_real());
        if reg.is_real() && reg_universe.contains(reg.to_real_reg()) {
          clobbered.insert(reg.to_real_reg());
        }
      }
      new.push(insn);
    }
    *func.block_insns_mut(b) = new;
  }
  (num_deleted, clobbered)
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::mock::{universe, v, MockFunc, MockInst::*};

  #[test]
  fn one_temporary_per_spilled_group_per_instruction() {
    // v0 and v1 share a slot; v2 stays put.
    let mut func = MockFunc::new(vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Op { dst: v(1), srcs: vec![v(0), v(0), v(2)] },
      Move { dst: v(1), src: v(0) },
      Bump { reg: v(1) },
      Ret,
    ]]);
    let mut owners = Map::default();
    owners.insert(v(0).to_virtual_reg(), v(0).to_virtual_reg());
    owners.insert(v(1).to_virtual_reg(), v(0).to_virtual_reg());
    let mut spiller = Spiller::new(&func);
    spiller.spill(&mut func, &owners);

    let s0 = SpillSlot::new(0);
    let t = |n| Reg::new_virtual(RegClass::I32, n);
    assert_eq!(
      func.blocks[0],
      vec![
        Op { dst: t(3), srcs: vec![] },
        Spill { slot: s0, src: t(3) },
        Reload { dst: t(4), slot: s0 },
        Op { dst: t(4), srcs: vec![t(4), t(4), v(2)] },
        Spill { slot: s0, src: t(4) },
        Reload { dst: t(5), slot: s0 },
        Move { dst: t(5), src: t(5) },
        Spill { slot: s0, src: t(5) },
        Reload { dst: t(6), slot: s0 },
        Bump { reg: t(6) },
        Spill { slot: s0, src: t(6) },
        Ret,
      ]
    );
    assert_eq!(spiller.spill_loads, 3);
    assert_eq!(spiller.spill_stores, 4);
    assert_eq!(spiller.num_spill_slots(), 1);
    assert!(spiller.is_temp(t(5).to_virtual_reg()));
    assert!(!spiller.is_temp(v(2).to_virtual_reg()));
  }

  #[test]
  fn volatile_registers_go_to_memory() {
    let mut func = MockFunc::new(vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Op { dst: v(1), srcs: vec![v(0)] },
      Out { srcs: vec![v(1)] },
      Ret,
    ]]);
    func.volatile.push(v(1).to_virtual_reg());
    let mut spiller = Spiller::new(&func);
    spiller.spill_volatile(&mut func);
    assert_eq!(spiller.spill_loads, 1);
    assert_eq!(spiller.spill_stores, 1);
    assert!(func.all_insts().iter().all(|i| match i {
      Op { dst, .. } => *dst != v(1),
      Out { srcs } => !srcs.contains(&v(1)),
      _ => true,
    }));
  }

  #[test]
  fn coloring_deletes_identity_moves() {
    let univ = universe(2);
    let r0 = univ.regs[0].0;
    let r1 = univ.regs[1].0;
    let mut func = MockFunc::new(vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Move { dst: v(1), src: v(0) },
      Move { dst: v(2), src: v(1) },
      Out { srcs: vec![v(1), v(2)] },
      Ret,
    ]]);
    let mut colors = Map::default();
    colors.insert(v(0).to_virtual_reg(), r0);
    colors.insert(v(1).to_virtual_reg(), r0);
    colors.insert(v(2).to_virtual_reg(), r1);
    let (deleted, clobbered) = apply_colors(&mut func, &colors, &univ);
    assert_eq!(deleted, 1);
    assert_eq!(clobbered.to_vec(), vec![r0, r1]);
    assert_eq!(
      func.blocks[0],
      vec![
        Op { dst: r0.to_reg(), srcs: vec![] },
        Move { dst: r1.to_reg(), src: r0.to_reg() },
        Out { srcs: vec![r0.to_reg(), r1.to_reg()] },
        Ret,
      ]
    );
  }
}
