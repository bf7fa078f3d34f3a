/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Performs dataflow and liveness analysis, including live range
//! construction.

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

use log::{debug, info, log_enabled, Level};

use crate::analysis_control_flow::{
  AnalysisError, CfgInfo, InstLayout, Orientation,
};
use crate::data_structures::{
  BlockIx, InstIx, Map, Queue, RealRegUniverse, Reg, TypedIxVec,
};
use crate::interface::Function;
use crate::nat_set::NatSet;

//=============================================================================
// The operand catalog

/// A bijection between the registers of a function and dense slot numbers.
/// The registers of the universe are enrolled first, in order, so that a real
/// register's slot is its universe index.
#[derive(Clone, Debug)]
pub struct OperandCatalog {
  slot_of: Map<Reg, usize>,
  regs: Vec<Reg>,
  num_real: usize,
}

impl OperandCatalog {
  pub fn new(reg_universe: &RealRegUniverse) -> Self {
    let mut catalog = Self {
      slot_of: Map::default(),
      regs: Vec::with_capacity(reg_universe.regs.len()),
      num_real: 0,
    };
    for (rreg, _name) in reg_universe.regs.iter() {
      catalog.enroll(rreg.to_reg());
    }
    catalog.num_real = catalog.regs.len();
    catalog
  }

  /// Catalog every register mentioned by |func|.  Real registers the
  /// universe doesn't know about are an error.
  #[inline(never)]
  pub fn for_function<F: Function>(
    func: &F, reg_universe: &RealRegUniverse,
  ) -> Result<Self, AnalysisError> {
    let mut catalog = Self::new(reg_universe);
    for b in func.blocks() {
      for insn in func.block_insns(b) {
        let iru = func.get_regs(insn);
        let mut regs = iru.used.to_vec();
        regs.extend(iru.defined.to_vec());
        regs.extend(iru.modified.to_vec());
        for reg in regs {
          if reg.is_real() && catalog.lookup(reg).is_none() {
            return Err(AnalysisError::NonExistingRealReg(reg.to_real_reg()));
          }
          catalog.enroll(reg);
        }
      }
    }
    Ok(catalog)
  }

  /// Enrolling a register twice returns the same slot.
  pub fn enroll(&mut self, reg: Reg) -> usize {
    if let Some(slot) = self.slot_of.get(&reg) {
      return *slot;
    }
    let slot = self.regs.len();
    self.regs.push(reg);
    self.slot_of.insert(reg, slot);
    slot
  }

  pub fn lookup(&self, reg: Reg) -> Option<usize> {
    self.slot_of.get(&reg).cloned()
  }

  pub fn reg_of(&self, slot: usize) -> Reg {
    self.regs[slot]
  }

  pub fn len(&self) -> usize {
    self.regs.len()
  }

  /// The number of leading slots holding real registers.
  pub fn num_real(&self) -> usize {
    self.num_real
  }
}

//=============================================================================
// Per-instruction def/use extraction

#[derive(Clone, Debug, Default)]
pub struct DefUse {
  pub defs: NatSet,
  pub uses: NatSet,
}

/// Produces the catalog slots an instruction defines and uses.
pub trait DefUseAnalyzer<F: Function> {
  fn def_use(&self, func: &F, insn: &F::Inst) -> DefUse;
}

/// The usual analyzer: slots come from `Function::get_regs`.  A modified
/// register is both defined and used.
pub struct RegDefUse<'a> {
  catalog: &'a OperandCatalog,
}

impl<'a> RegDefUse<'a> {
  pub fn new(catalog: &'a OperandCatalog) -> Self {
    Self { catalog }
  }
}

impl<'a, F: Function> DefUseAnalyzer<F> for RegDefUse<'a> {
  fn def_use(&self, func: &F, insn: &F::Inst) -> DefUse {
    let iru = func.get_regs(insn);
    let mut du = DefUse::default();
    for reg in iru.defined.iter() {
      if let Some(slot) = self.catalog.lookup(*reg) {
        du.defs.insert(slot);
      }
    }
    for reg in iru.used.iter() {
      if let Some(slot) = self.catalog.lookup(*reg) {
        du.uses.insert(slot);
      }
    }
    for reg in iru.modified.iter() {
      if let Some(slot) = self.catalog.lookup(*reg) {
        du.defs.insert(slot);
        du.uses.insert(slot);
      }
    }
    du
  }
}

//=============================================================================
// Liveness

/// Live-in and live-out slot sets for every block.
pub struct Liveness {
  live_in: TypedIxVec<BlockIx, NatSet>,
  live_out: TypedIxVec<BlockIx, NatSet>,
}

// Returned TypedIxVecs contain one element per block: the slots defined in
// the block, and the slots read before any write in the block.
#[inline(never)]
fn calc_def_and_use<F: Function, A: DefUseAnalyzer<F>>(
  func: &F, analyzer: &A,
) -> (TypedIxVec<BlockIx, NatSet>, TypedIxVec<BlockIx, NatSet>) {
  let mut def_sets = TypedIxVec::new();
  let mut use_sets = TypedIxVec::new();
  for b in func.blocks() {
    let mut def = NatSet::empty();
    let mut uce = NatSet::empty();
    for insn in func.block_insns(b) {
      let du = analyzer.def_use(func, insn);
      let mut exposed = du.uses.clone();
      exposed -= &def;
      uce += &exposed;
      def += &du.defs;
    }
    def_sets.push(def);
    use_sets.push(uce);
  }
  (def_sets, use_sets)
}

impl Liveness {
  #[inline(never)]
  pub fn compute<F: Function, A: DefUseAnalyzer<F>>(
    func: &F, cfg: &CfgInfo, analyzer: &A,
  ) -> Self {
    debug!("liveness: begin");
    let nBlocks = cfg.num_blocks();
    let (def_sets, use_sets) = calc_def_and_use(func, analyzer);

    let mut live_in = TypedIxVec::<BlockIx, NatSet>::new();
    let mut live_out = TypedIxVec::<BlockIx, NatSet>::new();
    live_in.resize(nBlocks, NatSet::empty());
    live_out.resize(nBlocks, NatSet::empty());

    // Seed the work queue so that blocks nearer the exit are evaluated
    // first, after which blocks are re-evaluated on demand.
    let mut workQ = Queue::<BlockIx>::new();
    let mut in_queue = TypedIxVec::<BlockIx, bool>::new();
    in_queue.resize(nBlocks, true);
    for bix in cfg.reverse_postorder_all(Orientation::Reverse) {
      workQ.push_back(bix);
    }

    let mut nEvals = 0;
    while let Some(bixI) = workQ.pop_front() {
      in_queue[bixI] = false;
      nEvals += 1;

      let mut out = NatSet::empty();
      for bixJ in cfg.succ_map[bixI].iter() {
        out += &live_in[*bixJ];
      }
      let mut inn = out.clone();
      inn -= &def_sets[bixI];
      inn += &use_sets[bixI];
      live_out[bixI] = out;

      if inn != live_in[bixI] {
        live_in[bixI] = inn;
        for bixP in cfg.pred_map[bixI].iter() {
          if !in_queue[*bixP] {
            in_queue[*bixP] = true;
            workQ.push_back(*bixP);
          }
        }
      }
    }

    debug!("liveness: end, {} evaluations for {} blocks", nEvals, nBlocks);
    if log_enabled!(Level::Debug) {
      for bix in live_in.range() {
        debug!(
          "  {:?}  in {:?}  out {:?}",
          bix, live_in[bix], live_out[bix]
        );
      }
    }
    Self { live_in, live_out }
  }

  pub fn in_set(&self, bix: BlockIx) -> &NatSet {
    &self.live_in[bix]
  }

  pub fn out_set(&self, bix: BlockIx) -> &NatSet {
    &self.live_out[bix]
  }
}

//=============================================================================
// Reaching definitions

/// Maps dense definition points to the instruction making the definition and
/// the slot it defines.
#[derive(Clone, Debug)]
pub struct DefPointMap {
  insts: Vec<InstIx>,
  slots: Vec<usize>,
}

impl DefPointMap {
  /// The instruction that creates |point|.
  pub fn lookup(&self, point: usize) -> InstIx {
    self.insts[point]
  }

  /// The slot that |point| defines.
  pub fn slot_of(&self, point: usize) -> usize {
    self.slots[point]
  }

  pub fn len(&self) -> usize {
    self.insts.len()
  }
}

pub struct ReachingDefs {
  map: DefPointMap,
  // For each slot, all of its definition points.
  by_slot: Vec<NatSet>,
  // For each instruction, its first definition point; its points run up to
  // the next instruction's first point.
  first_point: TypedIxVec<InstIx, u32>,
  reach_in: TypedIxVec<BlockIx, NatSet>,
  reach_out: TypedIxVec<BlockIx, NatSet>,
}

impl ReachingDefs {
  #[inline(never)]
  pub fn compute<F: Function, A: DefUseAnalyzer<F>>(
    func: &F, cfg: &CfgInfo, layout: &InstLayout, analyzer: &A,
  ) -> Self {
    info!("reaching_defs: begin");
    let nBlocks = cfg.num_blocks();

    // === BEGIN number the definition points ===
    //
    let mut insts = Vec::<InstIx>::new();
    let mut slots = Vec::<usize>::new();
    let mut by_slot = Vec::<NatSet>::new();
    let mut first_point = TypedIxVec::<InstIx, u32>::new();
    for b in func.blocks() {
      for (iix, insn) in layout.range(b).into_iter().zip(func.block_insns(b))
      {
        first_point.push(insts.len() as u32);
        let du = analyzer.def_use(func, insn);
        for slot in du.defs.iter() {
          if by_slot.len() <= slot {
            by_slot.resize(slot + 1, NatSet::empty());
          }
          by_slot[slot].insert(insts.len());
          insts.push(iix);
          slots.push(slot);
        }
      }
    }
    first_point.push(insts.len() as u32);
    //
    // === END number the definition points ===

    let mut res = Self {
      map: DefPointMap { insts, slots },
      by_slot,
      first_point,
      reach_in: TypedIxVec::new(),
      reach_out: TypedIxVec::new(),
    };

    // Per block gen and kill sets, by running the block's instructions over
    // the empty set.
    let mut gen = TypedIxVec::<BlockIx, NatSet>::new();
    let mut kill = TypedIxVec::<BlockIx, NatSet>::new();
    for b in func.blocks() {
      let mut g = NatSet::empty();
      let mut k = NatSet::empty();
      for iix in layout.range(b) {
        for point in res.points_of(iix) {
          k += res.def_points_for(res.map.slot_of(point));
        }
        res.apply_inst(iix, &mut g);
      }
      gen.push(g);
      kill.push(k);
    }

    let mut reach_in = TypedIxVec::<BlockIx, NatSet>::new();
    let mut reach_out = TypedIxVec::<BlockIx, NatSet>::new();
    reach_in.resize(nBlocks, NatSet::empty());
    reach_out.resize(nBlocks, NatSet::empty());

    let rpo = cfg.reverse_postorder_all(Orientation::Forward);
    let mut nnn = 0;
    loop {
      nnn += 1;
      let mut change = false;
      for bix in rpo.iter() {
        let mut inn = NatSet::empty();
        for pred in cfg.pred_map[*bix].iter() {
          inn += &reach_out[*pred];
        }
        let mut out = inn.clone();
        out -= &kill[*bix];
        out += &gen[*bix];
        reach_in[*bix] = inn;
        if out != reach_out[*bix] {
          reach_out[*bix] = out;
          change = true;
        }
      }
      if !change {
        break;
      }
    }

    res.reach_in = reach_in;
    res.reach_out = reach_out;
    info!(
      "reaching_defs: end, {} def points, {} passes",
      res.map.len(),
      nnn
    );
    res
  }

  pub fn in_set(&self, bix: BlockIx) -> &NatSet {
    &self.reach_in[bix]
  }

  pub fn out_set(&self, bix: BlockIx) -> &NatSet {
    &self.reach_out[bix]
  }

  /// Every definition point of |slot|.  Intersected with a reaching set,
  /// gives the definitions of |slot| that may reach that point.
  pub fn def_points_for(&self, slot: usize) -> &NatSet {
    static EMPTY: NatSet = NatSet::EMPTY;
    self.by_slot.get(slot).unwrap_or(&EMPTY)
  }

  pub fn map(&self) -> &DefPointMap {
    &self.map
  }

  /// The definition points made by |iix|.
  pub fn points_of(&self, iix: InstIx) -> std::ops::Range<usize> {
    let first = self.first_point[iix] as usize;
    let last = self.first_point[iix.plus(1)] as usize;
    first..last
  }

  /// Step a reaching set forwards over |iix|.
  pub fn apply_inst(&self, iix: InstIx, reaching: &mut NatSet) {
    for point in self.points_of(iix) {
      *reaching -= self.def_points_for(self.map.slot_of(point));
    }
    for point in self.points_of(iix) {
      reaching.insert(point);
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::mock::{b, universe, v, MockFunc, MockInst::*};

  // 0: v0 := ..; br v0 -> {1, 2}
  // 1: v1 := ..; br 3
  // 2: out v2; br 3
  // 3: out v0; ret
  fn diamond() -> MockFunc {
    MockFunc::new(vec![
      vec![
        Op { dst: v(0), srcs: vec![] },
        Br { cond: Some(v(0)), targets: vec![b(1), b(2)] },
      ],
      vec![Op { dst: v(1), srcs: vec![] }, Br { cond: None, targets: vec![b(3)] }],
      vec![Out { srcs: vec![v(2)] }, Br { cond: None, targets: vec![b(3)] }],
      vec![Out { srcs: vec![v(0)] }, Ret],
    ])
  }

  #[test]
  fn catalog_puts_real_registers_first() {
    let univ = universe(2);
    let func = diamond();
    let cat = OperandCatalog::for_function(&func, &univ).unwrap();
    assert_eq!(cat.num_real(), 3);
    assert_eq!(cat.len(), 6);
    assert_eq!(cat.lookup(univ.regs[1].0.to_reg()), Some(1));
    let slot = cat.lookup(v(2)).unwrap();
    assert!(slot >= cat.num_real());
    assert_eq!(cat.reg_of(slot), v(2));

    let mut cat2 = cat.clone();
    assert_eq!(cat2.enroll(v(2)), slot);
  }

  #[test]
  fn unknown_real_register_is_rejected() {
    let univ = universe(2);
    let stranger = crate::data_structures::Reg::new_real(
      crate::data_structures::RegClass::I32,
      9,
      9,
    );
    let func = MockFunc::new(vec![vec![Out { srcs: vec![stranger] }, Ret]]);
    match OperandCatalog::for_function(&func, &univ) {
      Err(AnalysisError::NonExistingRealReg(r)) => {
        assert_eq!(r.to_reg(), stranger)
      }
      other => panic!("unexpected {:?}", other.map(|c| c.len())),
    }
  }

  #[test]
  fn liveness_on_diamond() {
    let univ = universe(2);
    let func = diamond();
    let cfg = CfgInfo::create(&func).unwrap();
    let cat = OperandCatalog::for_function(&func, &univ).unwrap();
    let rdu = RegDefUse::new(&cat);
    let live = Liveness::compute(&func, &cfg, &rdu);
    let s = |n| cat.lookup(v(n)).unwrap();

    assert!(live.in_set(b(0)).contains(s(2)));
    assert!(!live.in_set(b(0)).contains(s(0)));
    assert!(live.out_set(b(0)).contains(s(0)));
    assert!(live.in_set(b(2)).contains(s(0)));
    assert!(live.in_set(b(2)).contains(s(2)));
    // Defined and never used: dead everywhere.
    assert!(!live.out_set(b(1)).contains(s(1)));
    assert!(!live.in_set(b(3)).contains(s(1)));
    assert!(live.out_set(b(3)).is_empty());
  }

  #[test]
  fn modified_register_is_live_before_the_modification() {
    let univ = universe(2);
    let func = MockFunc::new(vec![vec![Bump { reg: v(0) }, Out { srcs: vec![v(0)] }, Ret]]);
    let cfg = CfgInfo::create(&func).unwrap();
    let cat = OperandCatalog::for_function(&func, &univ).unwrap();
    let live = Liveness::compute(&func, &cfg, &RegDefUse::new(&cat));
    assert!(live.in_set(b(0)).contains(cat.lookup(v(0)).unwrap()));
  }

  // 0: v0 := ..; v1 := ..; br 1
  // 1: v2 := v0, v1; v0 += ..; br v2 -> {2, 3}
  // 2: out v1; v1 := v2; br 1
  // 3: out v0; br v0 -> {1, 4}
  // 4: out v3; ret
  fn two_loops() -> MockFunc {
    MockFunc::new(vec![
      vec![
        Op { dst: v(0), srcs: vec![] },
        Op { dst: v(1), srcs: vec![] },
        Br { cond: None, targets: vec![b(1)] },
      ],
      vec![
        Op { dst: v(2), srcs: vec![v(0), v(1)] },
        Bump { reg: v(0) },
        Br { cond: Some(v(2)), targets: vec![b(2), b(3)] },
      ],
      vec![
        Out { srcs: vec![v(1)] },
        Op { dst: v(1), srcs: vec![v(2)] },
        Br { cond: None, targets: vec![b(1)] },
      ],
      vec![
        Out { srcs: vec![v(0)] },
        Br { cond: Some(v(0)), targets: vec![b(1), b(4)] },
      ],
      vec![Out { srcs: vec![v(3)] }, Ret],
    ])
  }

  #[test]
  fn liveness_is_a_fixed_point_with_back_edges() {
    let univ = universe(2);
    let func = two_loops();
    let cfg = CfgInfo::create(&func).unwrap();
    let cat = OperandCatalog::for_function(&func, &univ).unwrap();
    let rdu = RegDefUse::new(&cat);
    let live = Liveness::compute(&func, &cfg, &rdu);
    let (def_sets, use_sets) = calc_def_and_use(&func, &rdu);

    for bix in func.blocks() {
      let mut out = NatSet::empty();
      for succ in cfg.succ_map[bix].iter() {
        out += live.in_set(*succ);
      }
      assert_eq!(
        live.out_set(bix).to_vec_below(cat.len()),
        out.to_vec_below(cat.len()),
        "live-out of {:?}",
        bix
      );

      let mut inn = out;
      inn -= &def_sets[bix];
      inn += &use_sets[bix];
      assert_eq!(
        live.in_set(bix).to_vec_below(cat.len()),
        inn.to_vec_below(cat.len()),
        "live-in of {:?}",
        bix
      );
    }

    let s = |n| cat.lookup(v(n)).unwrap();
    // Never defined, so live all the way up from its use.
    assert!(live.in_set(b(0)).contains(s(3)));
    assert!(live.in_set(b(1)).contains(s(3)));
    // v1 is read in 1 after coming round from 2.
    assert!(live.out_set(b(2)).contains(s(1)));
    assert!(live.in_set(b(2)).contains(s(1)));
    // v2 is dead once the loop head's branch has read it, apart from 2.
    assert!(!live.in_set(b(1)).contains(s(2)));
    assert!(live.in_set(b(2)).contains(s(2)));
    assert!(!live.in_set(b(3)).contains(s(2)));
    assert!(live.out_set(b(4)).is_empty());
  }

  #[test]
  fn reaching_definitions_are_a_fixed_point_with_back_edges() {
    let univ = universe(2);
    let func = two_loops();
    let cfg = CfgInfo::create(&func).unwrap();
    let layout = InstLayout::new(&func);
    let cat = OperandCatalog::for_function(&func, &univ).unwrap();
    let rd = ReachingDefs::compute(&func, &cfg, &layout, &RegDefUse::new(&cat));
    let n = rd.map().len();

    for bix in func.blocks() {
      let mut inn = NatSet::empty();
      for pred in cfg.pred_map[bix].iter() {
        inn += rd.out_set(*pred);
      }
      assert_eq!(
        rd.in_set(bix).to_vec_below(n),
        inn.to_vec_below(n),
        "in set of {:?}",
        bix
      );

      let mut reaching = inn;
      for iix in layout.range(bix) {
        rd.apply_inst(iix, &mut reaching);
      }
      assert_eq!(
        rd.out_set(bix).to_vec_below(n),
        reaching.to_vec_below(n),
        "out set of {:?}",
        bix
      );
    }

    // Both definitions of v0 reach the use in 3 through the back edges.
    let slot = cat.lookup(v(0)).unwrap();
    let mut v0_at_3 = rd.in_set(b(3)).clone();
    v0_at_3 *= rd.def_points_for(slot);
    assert_eq!(v0_at_3.to_vec_below(n).len(), 1);
    let mut v0_at_1 = rd.in_set(b(1)).clone();
    v0_at_1 *= rd.def_points_for(slot);
    assert_eq!(v0_at_1.to_vec_below(n).len(), 2);
  }

  #[test]
  fn reaching_definitions_through_a_loop() {
    // 0: v0 := ..; br 1
    // 1: v0 := v0; br v0 -> {1, 2}
    // 2: out v0; ret
    let univ = universe(2);
    let func = MockFunc::new(vec![
      vec![Op { dst: v(0), srcs: vec![] }, Br { cond: None, targets: vec![b(1)] }],
      vec![
        Op { dst: v(0), srcs: vec![v(0)] },
        Br { cond: Some(v(0)), targets: vec![b(1), b(2)] },
      ],
      vec![Out { srcs: vec![v(0)] }, Ret],
    ]);
    let cfg = CfgInfo::create(&func).unwrap();
    let layout = InstLayout::new(&func);
    let cat = OperandCatalog::for_function(&func, &univ).unwrap();
    let rd = ReachingDefs::compute(&func, &cfg, &layout, &RegDefUse::new(&cat));

    assert_eq!(rd.map().len(), 2);
    assert_eq!(rd.map().lookup(0), InstIx::new(0));
    assert_eq!(rd.map().lookup(1), InstIx::new(2));
    let slot = cat.lookup(v(0)).unwrap();
    assert_eq!(rd.def_points_for(slot).to_vec_below(8), vec![0, 1]);

    // Both definitions reach the loop head; only the loop's own reaches the
    // exit.
    assert_eq!(rd.in_set(b(1)).to_vec_below(8), vec![0, 1]);
    assert_eq!(rd.out_set(b(1)).to_vec_below(8), vec![1]);
    assert_eq!(rd.in_set(b(2)).to_vec_below(8), vec![1]);

    let mut reaching = rd.in_set(b(1)).clone();
    rd.apply_inst(InstIx::new(2), &mut reaching);
    assert_eq!(reaching.to_vec_below(8), vec![1]);
    assert_eq!(rd.points_of(InstIx::new(3)), 2..2);
  }
}
