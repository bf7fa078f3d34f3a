/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Core implementation of the graph colouring register allocator, after
//! George and Appel, "Iterated Register Coalescing" (TOPLAS 1996).
//!
//! Node degrees are replaced by "squeeze": the number of a node's possible
//! colours its neighbours could take away, which lets classes overlap (a
//! double-precision register covering two single-precision ones, say).

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

use std::collections::BTreeSet;

use log::{debug, info, log_enabled, trace, Level};

use crate::analysis_control_flow::CfgInfo;
use crate::analysis_data_flow::{
  DefUseAnalyzer, Liveness, OperandCatalog, RegDefUse,
};
use crate::analysis_dominance::DominanceInfo;
use crate::checker;
use crate::data_structures::{
  BlockIx, Map, MoveIx, NodeIx, RealReg, RealRegUniverse, Reg, RegClass, Set,
  TypedIxVec, VirtualReg, NUM_REG_CLASSES,
};
use crate::inst_stream::{apply_colors, Spiller};
use crate::interface::{
  Function, Options, RegAllocError, RegAllocResult,
};

//=============================================================================
// Squeeze tables

/// How much each node can be squeezed by each neighbour.  For a node of
/// class C:
///
/// * a virtual neighbour of class D can take at most `worst[C][D]` colours:
///   the most allocable registers of C that any one allocable register of D
///   overlaps.
///
/// * a precolored neighbour with universe index r takes exactly
///   `fixed[r][C]` colours.
pub(crate) struct SqueezeTables {
  pub(crate) worst: [[u32; NUM_REG_CLASSES]; NUM_REG_CLASSES],
  pub(crate) fixed: Vec<[u32; NUM_REG_CLASSES]>,
}

impl SqueezeTables {
  pub(crate) fn new(reg_universe: &RealRegUniverse) -> Self {
    let mut fixed = vec![[0; NUM_REG_CLASSES]; reg_universe.regs.len()];
    for (r, counts) in fixed.iter_mut().enumerate() {
      for rc in RegClass::all().iter() {
        counts[rc.rc_to_usize()] = reg_universe
          .allocable_regs(*rc)
          .iter()
          .filter(|c| reg_universe.overlaps(c.get_index(), r))
          .count() as u32;
      }
    }

    let mut worst = [[0; NUM_REG_CLASSES]; NUM_REG_CLASSES];
    for rcD in RegClass::all().iter() {
      for rreg in reg_universe.allocable_regs(*rcD) {
        for rcC in RegClass::all().iter() {
          let entry = &mut worst[rcC.rc_to_usize()][rcD.rc_to_usize()];
          *entry = (*entry).max(fixed[rreg.get_index()][rcC.rc_to_usize()]);
        }
      }
    }
    Self { worst, fixed }
  }
}

//=============================================================================
// Interference graph nodes and moves

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum NodeState {
  Initial,
  Precolored,
  SimplifyWork,
  FreezeWork,
  SpillWork,
  Selected,
  Coalesced,
  Colored,
  Spilled,
}

#[derive(Clone, Debug)]
struct Node {
  reg: Reg,
  rc: RegClass,
  state: NodeState,
  adj: Vec<NodeIx>,
  squeeze: u32,
  moves: Vec<MoveIx>,
  // Union-find parent, once coalesced.
  alias: Option<NodeIx>,
  // A universe index.
  color: Option<usize>,
  // Occurrences weighted by 10^loop depth.
  freq: u64,
  // Made only of spill temporaries.
  is_temp: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum MoveState {
  Worklist,
  Active,
  Coalesced,
  Constrained,
  Frozen,
}

#[derive(Clone, Debug)]
struct MoveInfo {
  dst: NodeIx,
  src: NodeIx,
  state: MoveState,
}

// How a round ended.
enum Outcome {
  // Every virtual register coloured.
  Colored(Map<VirtualReg, RealReg>),
  // These registers must go to memory: each maps to the owner of the slot
  // it will share.
  Spill(Map<VirtualReg, VirtualReg>),
}

struct Graph<'a> {
  reg_universe: &'a RealRegUniverse,
  tables: &'a SqueezeTables,
  biased: bool,
  k: [u32; NUM_REG_CLASSES],

  nodes: TypedIxVec<NodeIx, Node>,
  moves: TypedIxVec<MoveIx, MoveInfo>,
  adj_set: Set<(NodeIx, NodeIx)>,

  simplify_wl: BTreeSet<NodeIx>,
  freeze_wl: BTreeSet<NodeIx>,
  spill_wl: BTreeSet<NodeIx>,
  move_wl: BTreeSet<MoveIx>,
  active_moves: BTreeSet<MoveIx>,
  select_stack: Vec<NodeIx>,
}

impl<'a> Graph<'a> {
  fn new(
    catalog: &OperandCatalog, reg_universe: &'a RealRegUniverse,
    tables: &'a SqueezeTables, spiller: &Spiller, opts: &Options,
  ) -> Self {
    let mut k = [0; NUM_REG_CLASSES];
    for rc in RegClass::all().iter() {
      k[rc.rc_to_usize()] = reg_universe.num_allocable(*rc);
    }

    let mut nodes = TypedIxVec::<NodeIx, Node>::new();
    for slot in 0..catalog.len() {
      let reg = catalog.reg_of(slot);
      let precolored = slot < catalog.num_real();
      nodes.push(Node {
        reg,
        rc: reg.get_class(),
        state: if precolored { NodeState::Precolored } else { NodeState::Initial },
        adj: vec![],
        squeeze: 0,
        moves: vec![],
        alias: None,
        color: if precolored { Some(slot) } else { None },
        freq: 0,
        is_temp: reg
          .as_virtual_reg()
          .map_or(false, |vreg| spiller.is_temp(vreg)),
      });
    }

    Self {
      reg_universe,
      tables,
      biased: opts.biased_coloring,
      k,
      nodes,
      moves: TypedIxVec::new(),
      adj_set: Set::empty(),
      simplify_wl: BTreeSet::new(),
      freeze_wl: BTreeSet::new(),
      spill_wl: BTreeSet::new(),
      move_wl: BTreeSet::new(),
      active_moves: BTreeSet::new(),
      select_stack: vec![],
    }
  }

  fn is_precolored(&self, n: NodeIx) -> bool {
    self.nodes[n].state == NodeState::Precolored
  }

  fn k_of(&self, n: NodeIx) -> u32 {
    self.k[self.nodes[n].rc.rc_to_usize()]
  }

  // How many colours of |n| neighbour |m| can take away.
  fn weight(&self, n: NodeIx, m: NodeIx) -> u32 {
    let rcN = self.nodes[n].rc.rc_to_usize();
    match self.nodes[m].state {
      NodeState::Precolored => match self.nodes[m].color {
        Some(r) => self.tables.fixed[r][rcN],
        None => 0,
      },
      _ => self.tables.worst[rcN][self.nodes[m].rc.rc_to_usize()],
    }
  }

  fn add_edge(&mut self, u: NodeIx, v: NodeIx) {
    if u == v || self.adj_set.contains((u, v)) {
      return;
    }
    let uPre = self.is_precolored(u);
    let vPre = self.is_precolored(v);
    if uPre && vPre {
      return;
    }
    let wU = self.weight(u, v);
    let wV = self.weight(v, u);
    // Registers that can never overlap don't interfere.
    if (!uPre && wU == 0) || (!vPre && wV == 0) {
      return;
    }
    self.adj_set.insert((u, v));
    self.adj_set.insert((v, u));
    if !uPre {
      self.nodes[u].adj.push(v);
      self.nodes[u].squeeze += wU;
    }
    if !vPre {
      self.nodes[v].adj.push(u);
      self.nodes[v].squeeze += wV;
    }
  }

  fn adjacent(&self, n: NodeIx) -> Vec<NodeIx> {
    self.nodes[n]
      .adj
      .iter()
      .cloned()
      .filter(|m| {
        let st = self.nodes[*m].state;
        st != NodeState::Selected && st != NodeState::Coalesced
      })
      .collect()
  }

  fn node_moves(&self, n: NodeIx) -> Vec<MoveIx> {
    self.nodes[n]
      .moves
      .iter()
      .cloned()
      .filter(|m| {
        let st = self.moves[*m].state;
        st == MoveState::Active || st == MoveState::Worklist
      })
      .collect()
  }

  fn move_related(&self, n: NodeIx) -> bool {
    !self.node_moves(n).is_empty()
  }

  fn get_alias(&self, mut n: NodeIx) -> NodeIx {
    while self.nodes[n].state == NodeState::Coalesced {
      match self.nodes[n].alias {
        Some(a) => n = a,
        None => break,
      }
    }
    n
  }

  fn set_state(&mut self, n: NodeIx, state: NodeState) {
    trace!("  {:?}: {:?} -> {:?}", n, self.nodes[n].state, state);
    self.nodes[n].state = state;
  }

  // === BEGIN worklist transitions ===

  fn make_worklists(&mut self, coalescing: bool) {
    if !coalescing {
      for m in self.moves.range() {
        self.moves[m].state = MoveState::Frozen;
      }
      self.move_wl.clear();
    }
    for n in self.nodes.range() {
      if self.nodes[n].state != NodeState::Initial {
        continue;
      }
      if self.nodes[n].squeeze >= self.k_of(n) {
        self.set_state(n, NodeState::SpillWork);
        self.spill_wl.insert(n);
      } else if self.move_related(n) {
        self.set_state(n, NodeState::FreezeWork);
        self.freeze_wl.insert(n);
      } else {
        self.set_state(n, NodeState::SimplifyWork);
        self.simplify_wl.insert(n);
      }
    }
  }

  fn simplify(&mut self, n: NodeIx) {
    self.simplify_wl.remove(&n);
    self.set_state(n, NodeState::Selected);
    self.select_stack.push(n);
    for m in self.adjacent(n) {
      let w = self.weight(m, n);
      self.decrement_squeeze(m, w);
    }
  }

  fn decrement_squeeze(&mut self, m: NodeIx, w: u32) {
    if self.is_precolored(m) {
      return;
    }
    let k = self.k_of(m);
    let old = self.nodes[m].squeeze;
    self.nodes[m].squeeze = old.saturating_sub(w);
    if old >= k && self.nodes[m].squeeze < k {
      let mut nodes = self.adjacent(m);
      nodes.push(m);
      self.enable_moves(&nodes);
      if self.nodes[m].state == NodeState::SpillWork {
        self.spill_wl.remove(&m);
        if self.move_related(m) {
          self.set_state(m, NodeState::FreezeWork);
          self.freeze_wl.insert(m);
        } else {
          self.set_state(m, NodeState::SimplifyWork);
          self.simplify_wl.insert(m);
        }
      }
    }
  }

  fn enable_moves(&mut self, nodes: &[NodeIx]) {
    for n in nodes {
      for m in self.node_moves(*n) {
        if self.moves[m].state == MoveState::Active {
          self.active_moves.remove(&m);
          self.moves[m].state = MoveState::Worklist;
          self.move_wl.insert(m);
        }
      }
    }
  }

  fn add_work_list(&mut self, u: NodeIx) {
    if self.nodes[u].state == NodeState::FreezeWork
      && !self.move_related(u)
      && self.nodes[u].squeeze < self.k_of(u)
    {
      self.freeze_wl.remove(&u);
      self.set_state(u, NodeState::SimplifyWork);
      self.simplify_wl.insert(u);
    }
  }

  // George: merging a node into precolored |r| is safe if each neighbour
  // |t| either can't collide with |r| or is harmless anyway.
  fn ok(&self, t: NodeIx, r: NodeIx) -> bool {
    match (self.nodes[t].color, self.nodes[r].color) {
      (Some(tc), Some(rc)) if self.is_precolored(t) => {
        !self.reg_universe.overlaps(tc, rc)
      }
      _ => {
        self.nodes[t].squeeze < self.k_of(t) || self.adj_set.contains((t, r))
      }
    }
  }

  // Briggs: the merged node has fewer than k colours' worth of significant
  // neighbours.
  fn conservative(&self, u: NodeIx, nodes: &[NodeIx]) -> bool {
    let mut total = 0;
    for n in nodes {
      if self.is_precolored(*n) || self.nodes[*n].squeeze >= self.k_of(*n) {
        total += self.weight(u, *n);
      }
    }
    total < self.k_of(u)
  }

  fn coalesce(&mut self, m: MoveIx) {
    self.move_wl.remove(&m);
    let x = self.get_alias(self.moves[m].dst);
    let y = self.get_alias(self.moves[m].src);
    let (u, v) = if self.is_precolored(y) { (y, x) } else { (x, y) };

    if u == v {
      self.moves[m].state = MoveState::Coalesced;
      self.add_work_list(u);
    } else if self.is_precolored(v) || self.adj_set.contains((u, v)) {
      self.moves[m].state = MoveState::Constrained;
      self.add_work_list(u);
      self.add_work_list(v);
    } else {
      let can = if self.is_precolored(u) {
        self.adjacent(v).iter().all(|t| self.ok(*t, u))
      } else {
        let mut nodes = self.adjacent(u);
        for t in self.adjacent(v) {
          if !nodes.contains(&t) {
            nodes.push(t);
          }
        }
        self.conservative(u, &nodes)
      };
      if can {
        trace!("  coalescing {:?} into {:?}", v, u);
        self.moves[m].state = MoveState::Coalesced;
        self.combine(u, v);
        self.add_work_list(u);
      } else {
        self.moves[m].state = MoveState::Active;
        self.active_moves.insert(m);
      }
    }
  }

  fn combine(&mut self, u: NodeIx, v: NodeIx) {
    if self.nodes[v].state == NodeState::FreezeWork {
      self.freeze_wl.remove(&v);
    } else {
      self.spill_wl.remove(&v);
    }
    self.set_state(v, NodeState::Coalesced);
    self.nodes[v].alias = Some(u);

    let vMoves = self.nodes[v].moves.clone();
    for mv in vMoves {
      if !self.nodes[u].moves.contains(&mv) {
        self.nodes[u].moves.push(mv);
      }
    }
    if !self.is_precolored(u) {
      self.nodes[u].freq = self.nodes[u].freq.saturating_add(self.nodes[v].freq);
      self.nodes[u].is_temp &= self.nodes[v].is_temp;
    }
    self.enable_moves(&[v]);

    for t in self.adjacent(v) {
      self.add_edge(t, u);
      let w = self.weight(t, v);
      self.decrement_squeeze(t, w);
    }
    if self.nodes[u].state == NodeState::FreezeWork
      && self.nodes[u].squeeze >= self.k_of(u)
    {
      self.freeze_wl.remove(&u);
      self.set_state(u, NodeState::SpillWork);
      self.spill_wl.insert(u);
    }
  }

  fn freeze(&mut self, u: NodeIx) {
    self.freeze_wl.remove(&u);
    self.set_state(u, NodeState::SimplifyWork);
    self.simplify_wl.insert(u);
    self.freeze_moves(u);
  }

  fn freeze_moves(&mut self, u: NodeIx) {
    for m in self.node_moves(u) {
      let x = self.get_alias(self.moves[m].dst);
      let y = self.get_alias(self.moves[m].src);
      let v = if y == self.get_alias(u) { x } else { y };
      self.active_moves.remove(&m);
      self.move_wl.remove(&m);
      self.moves[m].state = MoveState::Frozen;
      if self.nodes[v].state == NodeState::FreezeWork
        && !self.move_related(v)
        && self.nodes[v].squeeze < self.k_of(v)
      {
        self.freeze_wl.remove(&v);
        self.set_state(v, NodeState::SimplifyWork);
        self.simplify_wl.insert(v);
      }
    }
  }

  // Cheapest first: weighted occurrences per unit of squeeze, with nodes
  // made only of spill temporaries last of all.
  fn select_spill(&mut self) {
    let mut best: Option<(bool, f64, NodeIx)> = None;
    for n in self.spill_wl.iter() {
      let node = &self.nodes[*n];
      let cost = node.freq as f64 / node.squeeze.max(1) as f64;
      let better = match best {
        None => true,
        Some((bTemp, bCost, _)) => {
          (node.is_temp, cost) < (bTemp, bCost)
        }
      };
      if better {
        best = Some((node.is_temp, cost, *n));
      }
    }
    if let Some((_, cost, m)) = best {
      debug!("  potential spill {:?} ({:?}), cost {}", m, self.nodes[m].reg, cost);
      self.spill_wl.remove(&m);
      self.set_state(m, NodeState::SimplifyWork);
      self.simplify_wl.insert(m);
      self.freeze_moves(m);
    }
  }

  // === END worklist transitions ===

  fn run_worklists(&mut self) {
    loop {
      if let Some(n) = self.simplify_wl.iter().next().cloned() {
        self.simplify(n);
      } else if let Some(m) = self.move_wl.iter().next().cloned() {
        self.coalesce(m);
      } else if let Some(n) = self.freeze_wl.iter().next().cloned() {
        self.freeze(n);
      } else if !self.spill_wl.is_empty() {
        self.select_spill();
      } else {
        break;
      }
    }
  }

  // Returns the nodes that could not be coloured.
  fn assign_colors(&mut self) -> Vec<NodeIx> {
    let mut spilled = vec![];
    while let Some(n) = self.select_stack.pop() {
      let rc = self.nodes[n].rc;
      let mut ok_colors: Vec<usize> = self
        .reg_universe
        .allocable_regs(rc)
        .iter()
        .map(|r| r.get_index())
        .collect();
      for w in self.nodes[n].adj.iter() {
        let a = self.get_alias(*w);
        let st = self.nodes[a].state;
        if st == NodeState::Colored || st == NodeState::Precolored {
          if let Some(c) = self.nodes[a].color {
            ok_colors.retain(|ok| !self.reg_universe.overlaps(*ok, c));
          }
        }
      }

      if ok_colors.is_empty() {
        trace!("  {:?} spilled", n);
        self.set_state(n, NodeState::Spilled);
        spilled.push(n);
        continue;
      }

      let mut pick = ok_colors[0];
      if self.biased {
        for m in self.nodes[n].moves.iter() {
          let x = self.get_alias(self.moves[*m].dst);
          let y = self.get_alias(self.moves[*m].src);
          let partner = if x == n { y } else { x };
          let st = self.nodes[partner].state;
          if st == NodeState::Colored || st == NodeState::Precolored {
            if let Some(c) = self.nodes[partner].color {
              if ok_colors.contains(&c) {
                pick = c;
                break;
              }
            }
          }
        }
      }
      trace!("  {:?} gets {:?}", n, self.reg_universe.regs[pick].0);
      self.set_state(n, NodeState::Colored);
      self.nodes[n].color = Some(pick);
    }

    for n in self.nodes.range() {
      if self.nodes[n].state == NodeState::Coalesced {
        let a = self.get_alias(n);
        self.nodes[n].color = self.nodes[a].color;
      }
    }
    spilled
  }

  // Every virtual node whose alias root is |root|.
  fn members(&self, root: NodeIx) -> Vec<NodeIx> {
    self
      .nodes
      .range()
      .into_iter()
      .filter(|n| !self.is_precolored(*n) && self.get_alias(*n) == root)
      .collect()
  }

  fn add_group(&self, root: NodeIx, owners: &mut Map<VirtualReg, VirtualReg>) {
    let owner = self.nodes[root].reg.to_virtual_reg();
    for m in self.members(root) {
      owners.insert(self.nodes[m].reg.to_virtual_reg(), owner);
    }
  }

  fn decide_spills(
    &self, spilled: &[NodeIx],
  ) -> Result<Map<VirtualReg, VirtualReg>, RegAllocError> {
    let mut owners = Map::<VirtualReg, VirtualReg>::default();
    let mut stuck = None;
    for s in spilled {
      if !self.nodes[*s].is_temp {
        self.add_group(*s, &mut owners);
        continue;
      }
      // Spilling temporaries gains nothing.  Make room by spilling the
      // cheapest coloured neighbour that isn't one.
      let mut best: Option<NodeIx> = None;
      for w in self.nodes[*s].adj.iter() {
        let a = self.get_alias(*w);
        let node = &self.nodes[a];
        if node.state == NodeState::Colored && !node.is_temp {
          if best.map_or(true, |b| node.freq < self.nodes[b].freq) {
            best = Some(a);
          }
        }
      }
      match best {
        Some(victim) => {
          debug!("  {:?} is all temporaries; spilling {:?}", s, victim);
          self.add_group(victim, &mut owners);
        }
        None => stuck = Some(self.nodes[*s].rc),
      }
    }

    match stuck {
      Some(rc) if owners.is_empty() => Err(RegAllocError::OutOfRegisters(rc)),
      _ => Ok(owners),
    }
  }
}

//=============================================================================
// One round: build, colour, and decide

fn loop_weights<F: Function>(
  func: &F, cfg: &CfgInfo,
) -> TypedIxVec<BlockIx, u64> {
  let mut weights = TypedIxVec::<BlockIx, u64>::new();
  match DominanceInfo::new(cfg) {
    Ok(mut dom) => {
      dom.find_dominators();
      for depth in dom.loop_depths().iter() {
        weights.push(10u64.saturating_pow(*depth));
      }
    }
    Err(err) => {
      debug!("alloc_main: no loop depths ({}), assuming none", err);
      weights.resize(func.blocks().len() as u32, 1);
    }
  }
  weights
}

#[inline(never)]
fn color_round<F: Function>(
  func: &F, reg_universe: &RealRegUniverse, tables: &SqueezeTables,
  spiller: &Spiller, opts: &Options,
) -> Result<Outcome, RegAllocError> {
  let cfg = CfgInfo::create(func)?;
  let weights = loop_weights(func, &cfg);
  let catalog = OperandCatalog::for_function(func, reg_universe)?;
  let analyzer = RegDefUse::new(&catalog);
  let liveness = Liveness::compute(func, &cfg, &analyzer);

  let mut g = Graph::new(&catalog, reg_universe, tables, spiller, opts);

  for n in g.nodes.range() {
    let node = &g.nodes[n];
    if node.state == NodeState::Initial && g.k_of(n) == 0 {
      return Err(RegAllocError::UnsatisfiableClass(node.rc));
    }
  }

  // === BEGIN build the interference graph ===
  //
  for bix in func.blocks() {
    let mut live = liveness.out_set(bix).clone();
    for insn in func.block_insns(bix).iter().rev() {
      let du = analyzer.def_use(func, insn);

      if let Some((dst, src)) = func.is_move(insn) {
        let candidate = match (catalog.lookup(dst), catalog.lookup(src)) {
          (Some(d), Some(s)) => {
            let d = NodeIx::new(d as u32);
            let s = NodeIx::new(s as u32);
            let fits = |n: NodeIx| {
              !g.is_precolored(n)
                || g.nodes[n].reg.as_real_reg().map_or(false, |r| {
                  reg_universe.is_allocable(r)
                })
            };
            if d != s
              && dst.get_class() == src.get_class()
              && !(g.is_precolored(d) && g.is_precolored(s))
              && fits(d)
              && fits(s)
            {
              Some((d, s))
            } else {
              None
            }
          }
          _ => None,
        };
        if let Some((d, s)) = candidate {
          live -= &du.uses;
          let m = MoveIx::new(g.moves.len());
          g.moves.push(MoveInfo { dst: d, src: s, state: MoveState::Worklist });
          g.nodes[d].moves.push(m);
          g.nodes[s].moves.push(m);
          g.move_wl.insert(m);
        }
      }

      live += &du.defs;
      for d in du.defs.iter() {
        for l in live.iter() {
          g.add_edge(NodeIx::new(l as u32), NodeIx::new(d as u32));
        }
      }
      live -= &du.defs;
      live += &du.uses;

      let w = weights[bix];
      for slot in du.defs.iter().chain(du.uses.iter()) {
        let node = &mut g.nodes[NodeIx::new(slot as u32)];
        node.freq = node.freq.saturating_add(w);
      }
    }
  }
  //
  // === END build the interference graph ===

  debug!(
    "alloc_main:   {} nodes, {} edges, {} moves",
    g.nodes.len(),
    g.adj_set.card() / 2,
    g.moves.len()
  );
  if log_enabled!(Level::Trace) {
    for n in g.nodes.range() {
      let node = &g.nodes[n];
      if node.state != NodeState::Precolored {
        trace!(
          "  {:?} {:?} squeeze {} freq {} adj {:?}",
          n,
          node.reg,
          node.squeeze,
          node.freq,
          node.adj
        );
      }
    }
  }

  g.make_worklists(opts.coalescing);
  g.run_worklists();
  let spilled = g.assign_colors();

  if !spilled.is_empty() {
    return Ok(Outcome::Spill(g.decide_spills(&spilled)?));
  }

  let mut colors = Map::<VirtualReg, RealReg>::default();
  for n in g.nodes.range() {
    let node = &g.nodes[n];
    if let (Some(vreg), Some(c)) = (node.reg.as_virtual_reg(), node.color) {
      colors.insert(vreg, reg_universe.regs[c].0);
    }
  }
  Ok(Outcome::Colored(colors))
}

//=============================================================================
// Top level

#[inline(never)]
pub fn alloc_main<F: Function>(
  func: &mut F, reg_universe: &RealRegUniverse, opts: &Options,
) -> Result<RegAllocResult, RegAllocError> {
  info!("alloc_main: begin");
  info!(
    "alloc_main:   in: {} insns in {} blocks",
    func.blocks().into_iter().map(|b| func.block_insns(b).len()).sum::<usize>(),
    func.blocks().len()
  );
  let tables = SqueezeTables::new(reg_universe);

  let mut spiller = Spiller::new(&*func);
  spiller.spill_volatile(func);

  let mut rounds = 0;
  let colors = loop {
    rounds += 1;
    debug!("alloc_main: round {}", rounds);
    match color_round(&*func, reg_universe, &tables, &spiller, opts)? {
      Outcome::Colored(colors) => break colors,
      Outcome::Spill(owners) => spiller.spill(func, &owners),
    }
  };

  if opts.run_checker {
    checker::check(&*func, &colors, reg_universe)
      .map_err(RegAllocError::RegChecker)?;
  }

  let (coalesced_moves, clobbered_registers) =
    apply_colors(func, &colors, reg_universe);

  let res = RegAllocResult {
    num_spill_slots: spiller.num_spill_slots(),
    spill_loads: spiller.spill_loads,
    spill_stores: spiller.spill_stores,
    coalesced_moves,
    rounds,
    clobbered_registers,
  };
  info!(
    "alloc_main: end, {} rounds, {} spill slots, {} reloads, {} spills, {} moves removed",
    res.rounds,
    res.num_spill_slots,
    res.spill_loads,
    res.spill_stores,
    res.coalesced_moves
  );
  Ok(res)
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::data_structures::RegClassInfo;
  use crate::interface::allocate_registers;
  use crate::mock::{b, universe, v, MockFunc, MockInst, MockInst::*};
  use smallvec::smallvec;

  fn no_vregs_left(func: &MockFunc) -> bool {
    func.all_insts().iter().all(|insn| {
      let iru = func.get_regs(insn);
      iru.used.iter().chain(iru.defined.iter()).chain(iru.modified.iter()).all(|r| r.is_real())
    })
  }

  // Four singles S0..S3 and two doubles D0 = S0:S1, D1 = S2:S3.
  fn vfp_universe() -> RealRegUniverse {
    let mut regs = vec![];
    for i in 0..4u8 {
      let rreg = Reg::new_real(RegClass::F32, i, i).to_real_reg();
      regs.push((rreg, format!("s{}", i)));
    }
    for j in 0..2u8 {
      let rreg = Reg::new_real(RegClass::F64, j, 4 + j).to_real_reg();
      regs.push((rreg, format!("d{}", j)));
    }
    RealRegUniverse {
      regs,
      allocable: 6,
      allocable_by_class: [
        None,
        Some(RegClassInfo { first: 0, last: 3 }),
        Some(RegClassInfo { first: 4, last: 5 }),
      ],
      aliases: vec![
        smallvec![4],
        smallvec![4],
        smallvec![5],
        smallvec![5],
        smallvec![0, 1],
        smallvec![2, 3],
      ],
    }
  }

  #[test]
  fn squeeze_tables_for_overlapping_classes() {
    let univ = vfp_universe();
    univ.check_is_sane();
    let t = SqueezeTables::new(&univ);
    let (i, f, d) = (0, 1, 2);
    assert_eq!(t.worst[f][d], 2);
    assert_eq!(t.worst[d][f], 1);
    assert_eq!(t.worst[f][f], 1);
    assert_eq!(t.worst[d][d], 1);
    assert_eq!(t.worst[i][f], 0);
    // S1 takes D0 from a double; D1 takes S2 and S3 from a single.
    assert_eq!(t.fixed[1][d], 1);
    assert_eq!(t.fixed[5][f], 2);
  }

  #[test]
  fn three_live_values_over_two_registers_spill() {
    let univ = universe(2);
    let mut func = MockFunc::new(vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Op { dst: v(1), srcs: vec![] },
      Op { dst: v(2), srcs: vec![] },
      Out { srcs: vec![v(0)] },
      Out { srcs: vec![v(1)] },
      Out { srcs: vec![v(2)] },
      Ret,
    ]]);
    let opts = Options { run_checker: true, ..Options::default() };
    let res = allocate_registers(&mut func, &univ, &opts).unwrap();
    assert!(res.spill_stores >= 1);
    assert!(res.spill_loads >= 1);
    assert!(res.num_spill_slots >= 1);
    assert!(res.rounds >= 2);
    assert!(no_vregs_left(&func));
    // The reserved register is never handed out.
    let r2 = univ.regs[2].0;
    assert!(!res.clobbered_registers.contains(r2));
  }

  #[test]
  fn interfering_values_get_different_registers() {
    let univ = universe(2);
    let mut func = MockFunc::new(vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Op { dst: v(1), srcs: vec![] },
      Out { srcs: vec![v(0), v(1)] },
      Ret,
    ]]);
    let res =
      allocate_registers(&mut func, &univ, &Options::default()).unwrap();
    assert_eq!(res.spill_stores, 0);
    assert_eq!(res.rounds, 1);
    match &func.blocks[0][2] {
      Out { srcs } => {
        assert!(srcs[0].is_real() && srcs[1].is_real());
        assert_ne!(srcs[0], srcs[1]);
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn moves_are_coalesced_away() {
    let univ = universe(2);
    let body = vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Move { dst: v(1), src: v(0) },
      Bump { reg: v(1) },
      Out { srcs: vec![v(1)] },
      Ret,
    ]];
    let mut func = MockFunc::new(body.clone());
    let res =
      allocate_registers(&mut func, &univ, &Options::default()).unwrap();
    assert_eq!(res.coalesced_moves, 1);
    assert_eq!(func.blocks[0].len(), 4);

    let mut func = MockFunc::new(body);
    let opts = Options {
      coalescing: false,
      biased_coloring: false,
      ..Options::default()
    };
    let res = allocate_registers(&mut func, &univ, &opts).unwrap();
    assert!(no_vregs_left(&func));
    assert!(res.coalesced_moves <= 1);
  }

  #[test]
  fn values_live_across_a_call_avoid_clobbered_registers() {
    // The call writes r0, so v0 must sit in r1.
    let univ = universe(2);
    let r0 = univ.regs[0].0.to_reg();
    let mut func = MockFunc::new(vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Op { dst: r0, srcs: vec![] },
      Out { srcs: vec![r0, v(0)] },
      Ret,
    ]]);
    let opts = Options { run_checker: true, ..Options::default() };
    allocate_registers(&mut func, &univ, &opts).unwrap();
    assert_eq!(func.blocks[0][0], Op { dst: univ.regs[1].0.to_reg(), srcs: vec![] });
  }

  #[test]
  fn loops_spill_the_value_used_outside_them() {
    // v0 is used once after the loop; v1 and v2 are busy inside it.
    let univ = universe(2);
    let mut func = MockFunc::new(vec![
      vec![
        Op { dst: v(0), srcs: vec![] },
        Op { dst: v(1), srcs: vec![] },
        Br { cond: None, targets: vec![b(1)] },
      ],
      vec![
        Op { dst: v(2), srcs: vec![v(1)] },
        Op { dst: v(1), srcs: vec![v(2), v(1)] },
        Br { cond: Some(v(1)), targets: vec![b(1), b(2)] },
      ],
      vec![Out { srcs: vec![v(0)] }, Ret],
    ]);
    let opts = Options { run_checker: true, ..Options::default() };
    let res = allocate_registers(&mut func, &univ, &opts).unwrap();
    assert_eq!(res.spill_stores, 1);
    assert_eq!(res.spill_loads, 1);
    assert!(func.blocks[1].iter().all(|i| match i {
      MockInst::Spill { .. } | MockInst::Reload { .. } => false,
      _ => true,
    }));
  }

  #[test]
  fn volatile_registers_are_never_candidates() {
    let univ = universe(2);
    let mut func = MockFunc::new(vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Out { srcs: vec![v(0)] },
      Ret,
    ]]);
    func.volatile.push(v(0).to_virtual_reg());
    let res =
      allocate_registers(&mut func, &univ, &Options::default()).unwrap();
    assert_eq!((res.spill_loads, res.spill_stores), (1, 1));
    assert!(no_vregs_left(&func));
  }

  #[test]
  fn doubles_and_singles_share_the_register_file() {
    let univ = vfp_universe();
    let s = |n| Reg::new_virtual(RegClass::F32, n);
    let d = |n| Reg::new_virtual(RegClass::F64, n);
    // Two live doubles fill the file, so the single must wait in memory.
    let mut func = MockFunc::new(vec![vec![
      Op { dst: d(0), srcs: vec![] },
      Op { dst: d(1), srcs: vec![] },
      Op { dst: s(2), srcs: vec![] },
      Out { srcs: vec![d(0), d(1)] },
      Out { srcs: vec![s(2)] },
      Ret,
    ]]);
    let opts = Options { run_checker: true, ..Options::default() };
    let res = allocate_registers(&mut func, &univ, &opts).unwrap();
    assert!(res.spill_stores >= 1);
    assert!(no_vregs_left(&func));
  }

  #[test]
  fn class_without_registers_is_unsatisfiable() {
    let univ = universe(2);
    let mut func = MockFunc::new(vec![vec![
      Op { dst: Reg::new_virtual(RegClass::F32, 0), srcs: vec![] },
      Ret,
    ]]);
    match allocate_registers(&mut func, &univ, &Options::default()) {
      Err(RegAllocError::UnsatisfiableClass(RegClass::F32)) => {}
      other => panic!("unexpected {:?}", other),
    }
  }
}
