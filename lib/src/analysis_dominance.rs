/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Dominators, postdominators and their frontiers.
//!
//! Dominator sets are found by the classic iterative dataflow method (Fig 7.14
//! of Muchnick 1997), immediate dominators are read off the sets, and
//! frontiers are computed by the Cytron et al. walk over the dominator tree.
//! Every computation is parameterized by an `Orientation`; running it on the
//! reverse graph yields the postdominance counterparts.
//!
//! Results are only meaningful for the `CfgInfo` they were computed from.
//! Asking for a result before computing it is a caller bug and panics.

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

use log::debug;

use crate::analysis_control_flow::{
  AnalysisError, CfgInfo, FlowGraph, Orientation,
};
use crate::data_structures::{BlockIx, Set, TypedIxVec};
use crate::nat_set::NatSet;

pub struct DominanceInfo<'a> {
  cfg: &'a CfgInfo,
  doms: Option<TypedIxVec<BlockIx, NatSet>>,
  idom: Option<TypedIxVec<BlockIx, Option<BlockIx>>>,
  pdoms: Option<TypedIxVec<BlockIx, NatSet>>,
  ipdom: Option<TypedIxVec<BlockIx, Option<BlockIx>>>,
  df: Option<TypedIxVec<BlockIx, NatSet>>,
  rdf: Option<TypedIxVec<BlockIx, NatSet>>,
}

// Calculate the dominance relationship over |graph|.  The resulting vector
// maps each block to the set of block numbers that dominate it.  Every
// block is assumed reachable from the root.
#[inline(never)]
fn calc_dominators(
  graph: &FlowGraph, rpo: &[BlockIx],
) -> TypedIxVec<BlockIx, NatSet> {
  debug!("calc_dominators: begin");
  let nBlocks = graph.num_blocks();
  let root = graph.root;
  let mut dom_map = TypedIxVec::<BlockIx, NatSet>::new();
  dom_map.resize(nBlocks, NatSet::universe());
  dom_map[root] = NatSet::unit(root.get_usize());

  let mut nnn = 0;
  loop {
    nnn += 1;
    debug!("calc_dominators:   outer loop {}", nnn);
    let mut change = false;
    for bixN in rpo.iter() {
      if *bixN == root {
        continue;
      }
      let mut new_set = NatSet::universe();
      for bixP in graph.preds[*bixN].iter() {
        new_set *= &dom_map[*bixP];
      }
      new_set.insert(bixN.get_usize());
      if new_set != dom_map[*bixN] {
        change = true;
        dom_map[*bixN] = new_set;
      }
    }
    if !change {
      break;
    }
  }

  // Sets start out as "all nodes"; bound them so that everything
  // downstream sees finite sets.
  let all = NatSet::range(nBlocks as usize);
  for set in dom_map.iter_mut() {
    *set *= &all;
  }
  debug!("calc_dominators: end");
  dom_map
}

// The immediate dominator of n is the unique member of doms[n] - {n} whose
// own dominator set is doms[n] - {n}.
#[inline(never)]
fn calc_immediate(
  doms: &TypedIxVec<BlockIx, NatSet>, root: BlockIx, what: &str,
) -> TypedIxVec<BlockIx, Option<BlockIx>> {
  let mut idom = TypedIxVec::<BlockIx, Option<BlockIx>>::new();
  for bixN in doms.range() {
    if bixN == root {
      idom.push(None);
      continue;
    }
    let mut strict = doms[bixN].clone();
    strict.remove(bixN.get_usize());
    let found = strict
      .iter()
      .map(|n| BlockIx::new(n as u32))
      .find(|cand| doms[*cand] == strict);
    match found {
      Some(cand) => idom.push(Some(cand)),
      None => panic!(
        "calc_immediate: no immediate {} found for block {:?}; the {} sets are inconsistent",
        what, bixN, what
      ),
    }
  }
  idom
}

// Cytron et al: walk the dominator tree in postorder.  DF(x) gets every
// successor s of x with idom(s) != x, and every y in DF(c), for each child c
// of x, with idom(y) != x.
#[inline(never)]
fn calc_frontiers(
  graph: &FlowGraph, idom: &TypedIxVec<BlockIx, Option<BlockIx>>,
) -> TypedIxVec<BlockIx, NatSet> {
  let nBlocks = graph.num_blocks();

  // Children in the dominator tree, found by a scan of |idom|.
  let mut children = TypedIxVec::<BlockIx, Vec<BlockIx>>::new();
  children.resize(nBlocks, Vec::new());
  for bix in idom.range() {
    if let Some(parent) = idom[bix] {
      children[parent].push(bix);
    }
  }

  let mut post_ord = Vec::<BlockIx>::new();
  let mut stack = vec![(graph.root, 0usize)];
  while let Some((bix, next)) = stack.pop() {
    if next < children[bix].len() {
      stack.push((bix, next + 1));
      stack.push((children[bix][next], 0));
    } else {
      post_ord.push(bix);
    }
  }

  let mut df = TypedIxVec::<BlockIx, NatSet>::new();
  df.resize(nBlocks, NatSet::empty());
  for x in post_ord {
    let mut set = NatSet::empty();
    // local
    for s in graph.succs[x].iter() {
      if idom[*s] != Some(x) {
        set.insert(s.get_usize());
      }
    }
    // up
    for c in children[x].iter() {
      for y in df[*c].iter() {
        if idom[BlockIx::new(y as u32)] != Some(x) {
          set.insert(y);
        }
      }
    }
    df[x] = set;
  }
  df
}

fn to_blocks(set: &NatSet) -> Vec<BlockIx> {
  set.iter().map(|n| BlockIx::new(n as u32)).collect()
}

impl<'a> DominanceInfo<'a> {
  /// Fails if any block is unreachable from the entry, since dominator sets
  /// are meaningless for such blocks.
  pub fn new(cfg: &'a CfgInfo) -> Result<Self, AnalysisError> {
    if cfg.reverse_postorder(Orientation::Forward).len()
      != cfg.num_blocks() as usize
    {
      return Err(AnalysisError::UnreachableBlocks);
    }
    Ok(Self {
      cfg,
      doms: None,
      idom: None,
      pdoms: None,
      ipdom: None,
      df: None,
      rdf: None,
    })
  }

  pub fn cfg(&self) -> &'a CfgInfo {
    self.cfg
  }

  pub fn find_dominators(&mut self) {
    let graph = self.cfg.graph(Orientation::Forward);
    let rpo = self.cfg.reverse_postorder(Orientation::Forward);
    let doms = calc_dominators(graph, &rpo);
    self.idom = Some(calc_immediate(&doms, graph.root, "dominator"));
    self.doms = Some(doms);
  }

  pub fn find_postdominators(&mut self) {
    let graph = self.cfg.graph(Orientation::Reverse);
    let rpo = self.cfg.reverse_postorder(Orientation::Reverse);
    let pdoms = calc_dominators(graph, &rpo);
    self.ipdom = Some(calc_immediate(&pdoms, graph.root, "postdominator"));
    self.pdoms = Some(pdoms);
  }

  pub fn find_dom_frontier(&mut self) {
    let idom = match &self.idom {
      Some(idom) => idom,
      None => panic!(
        "find_dom_frontier: dominators not computed; call find_dominators first"
      ),
    };
    self.df = Some(calc_frontiers(self.cfg.graph(Orientation::Forward), idom));
  }

  pub fn find_reverse_dom_frontier(&mut self) {
    let ipdom = match &self.ipdom {
      Some(ipdom) => ipdom,
      None => panic!(
        "find_reverse_dom_frontier: postdominators not computed; call find_postdominators first"
      ),
    };
    self.rdf = Some(calc_frontiers(self.cfg.graph(Orientation::Reverse), ipdom));
  }

  /// Does |a| dominate |b|?  Every block dominates itself.
  pub fn dominates(&self, a: BlockIx, b: BlockIx) -> bool {
    match &self.doms {
      Some(doms) => doms[b].contains(a.get_usize()),
      None => panic!(
        "dominates: dominators not computed (find_dominators) when asking about block {:?}",
        b
      ),
    }
  }

  /// Does |a| postdominate |b|?
  pub fn postdominates(&self, a: BlockIx, b: BlockIx) -> bool {
    match &self.pdoms {
      Some(pdoms) => pdoms[b].contains(a.get_usize()),
      None => panic!(
        "postdominates: postdominators not computed (find_postdominators) when asking about block {:?}",
        b
      ),
    }
  }

  /// The entry block has no immediate dominator.
  pub fn immediate_dominator(&self, b: BlockIx) -> Option<BlockIx> {
    match &self.idom {
      Some(idom) => idom[b],
      None => panic!(
        "immediate_dominator: dominators not computed (find_dominators) when asking about block {:?}",
        b
      ),
    }
  }

  /// The exit block has no immediate postdominator.
  pub fn immediate_postdominator(&self, b: BlockIx) -> Option<BlockIx> {
    match &self.ipdom {
      Some(ipdom) => ipdom[b],
      None => panic!(
        "immediate_postdominator: postdominators not computed (find_postdominators) when asking about block {:?}",
        b
      ),
    }
  }

  pub fn dominators_of(&self, b: BlockIx) -> Vec<BlockIx> {
    match &self.doms {
      Some(doms) => to_blocks(&doms[b]),
      None => panic!(
        "dominators_of: dominators not computed (find_dominators) when asking about block {:?}",
        b
      ),
    }
  }

  pub fn dominance_frontier(&self, b: BlockIx) -> Vec<BlockIx> {
    match &self.df {
      Some(df) => to_blocks(&df[b]),
      None => panic!(
        "dominance_frontier: frontier not computed (find_dom_frontier) when asking about block {:?}",
        b
      ),
    }
  }

  pub fn reverse_dominance_frontier(&self, b: BlockIx) -> Vec<BlockIx> {
    match &self.rdf {
      Some(rdf) => to_blocks(&rdf[b]),
      None => panic!(
        "reverse_dominance_frontier: frontier not computed (find_reverse_dom_frontier) when asking about block {:?}",
        b
      ),
    }
  }

  /// The loop nesting depth of every block: 0 outside all loops.
  ///
  /// A "back edge" m->n is an edge where n dominates m; n is the loop
  /// header.  The natural loop of a back edge is collected per Fig 7.21 of
  /// Muchnick 1997.
  #[inline(never)]
  pub fn loop_depths(&self) -> TypedIxVec<BlockIx, u32> {
    if self.doms.is_none() {
      panic!("loop_depths: dominators not computed; call find_dominators first");
    }
    let nBlocks = self.cfg.num_blocks();
    let succ_map = &self.cfg.succ_map;
    let pred_map = &self.cfg.pred_map;

    // |back_edges| is a set rather than a vector so that the same loop is
    // never enumerated twice.
    let mut back_edges = Set::<(BlockIx, BlockIx)>::empty();
    for bixM in succ_map.range() {
      for bixN in succ_map[bixM].iter() {
        if self.dominates(*bixN, bixM) {
          back_edges.insert((bixM, *bixN));
        }
      }
    }

    let mut natural_loops = Vec::<Set<BlockIx>>::new();
    for (bixM, bixN) in back_edges.to_vec() {
      let mut Loop = Set::<BlockIx>::two(bixM, bixN);
      let mut Stack = Vec::<BlockIx>::new();
      if bixM != bixN {
        // The next line is missing in the Muchnick description.
        // Without it the algorithm doesn't make any sense, though.
        Stack.push(bixM);
        while let Some(bixP) = Stack.pop() {
          for bixQ in pred_map[bixP].iter() {
            if !Loop.contains(*bixQ) {
              Loop.insert(*bixQ);
              Stack.push(*bixQ);
            }
          }
        }
      }
      natural_loops.push(Loop);
    }

    // Order loops by increasing size.  A loop's depth is the length of the
    // chain of strictly larger loops enclosing it, found by scanning
    // forwards.  This relies on loops being either disjoint or nested.
    natural_loops.sort_by_key(|blocks| blocks.card());

    let nLoops = natural_loops.len();
    let mut depth_of_loop = vec![0u32; nLoops];
    for i in 0..nLoops {
      let mut curr = i;
      let mut depth = 1;
      for j in i + 1..nLoops {
        if natural_loops[curr].is_subset_of(&natural_loops[j]) {
          depth += 1;
          curr = j;
        }
      }
      depth_of_loop[i] = depth;
    }

    let mut depth_map = TypedIxVec::<BlockIx, u32>::new();
    depth_map.resize(nBlocks, 0);
    for (blocks, depth) in natural_loops.iter().zip(depth_of_loop) {
      for bix in blocks.iter() {
        if depth_map[*bix] < depth {
          depth_map[*bix] = depth;
        }
      }
    }
    depth_map
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn b(n: u32) -> BlockIx {
    BlockIx::new(n)
  }

  fn cfg(succs: &[&[u32]], exit: u32) -> CfgInfo {
    let succs =
      succs.iter().map(|s| s.iter().map(|n| b(*n)).collect()).collect();
    CfgInfo::from_succs(b(0), b(exit), succs).unwrap()
  }

  fn full(info: &CfgInfo) -> DominanceInfo {
    let mut dom = DominanceInfo::new(info).unwrap();
    dom.find_dominators();
    dom.find_postdominators();
    dom.find_dom_frontier();
    dom.find_reverse_dom_frontier();
    dom
  }

  #[test]
  fn diamond() {
    // entry(0) -> {1, 2} -> merge(3) -> exit(4)
    let info = cfg(&[&[1, 2], &[3], &[3], &[4], &[]], 4);
    let dom = full(&info);

    assert!(dom.dominance_frontier(b(0)).is_empty());
    assert_eq!(dom.dominance_frontier(b(1)), vec![b(3)]);
    assert_eq!(dom.dominance_frontier(b(2)), vec![b(3)]);
    assert!(dom.dominance_frontier(b(3)).is_empty());

    assert_eq!(dom.immediate_dominator(b(0)), None);
    assert_eq!(dom.immediate_dominator(b(3)), Some(b(0)));
    assert_eq!(dom.immediate_dominator(b(1)), Some(b(0)));
    assert_eq!(dom.immediate_postdominator(b(0)), Some(b(3)));
    assert_eq!(dom.immediate_postdominator(b(4)), None);

    // Both arms are control dependent on the entry's branch.
    assert_eq!(dom.reverse_dominance_frontier(b(1)), vec![b(0)]);
    assert_eq!(dom.reverse_dominance_frontier(b(2)), vec![b(0)]);
    assert!(dom.reverse_dominance_frontier(b(3)).is_empty());

    assert!(dom.postdominates(b(3), b(1)));
    assert!(!dom.postdominates(b(1), b(0)));
  }

  #[test]
  fn dominance_laws_on_a_loop_nest() {
    // 0 -> 1; 1 -> {2, 5}; 2 -> {3, 4}; 3 -> 2; 4 -> 1; 5 exit
    let info = cfg(&[&[1], &[2, 5], &[3, 4], &[2], &[1], &[]], 5);
    let dom = full(&info);
    let n = info.num_blocks();

    for x in 0..n {
      assert!(dom.dominates(b(0), b(x)), "entry dominates everything");
      assert!(dom.dominates(b(x), b(x)), "dominance is reflexive");
      if let Some(id) = dom.immediate_dominator(b(x)) {
        for d in dom.dominators_of(b(x)) {
          if d != b(x) {
            assert!(dom.dominates(d, id), "idom is dominated by all others");
          }
        }
      }
      for y in 0..n {
        for z in 0..n {
          if dom.dominates(b(x), b(y)) && dom.dominates(b(y), b(z)) {
            assert!(dom.dominates(b(x), b(z)), "dominance is transitive");
          }
        }
      }
      // x can only be in its own frontier through a loop back to itself.
      for y in dom.dominance_frontier(b(x)) {
        assert!(y == b(x) || !dom.dominates(b(x), y));
      }
    }

    let depths = dom.loop_depths();
    assert_eq!(depths[b(0)], 0);
    assert_eq!(depths[b(1)], 1);
    assert_eq!(depths[b(4)], 1);
    assert_eq!(depths[b(2)], 2);
    assert_eq!(depths[b(3)], 2);
    assert_eq!(depths[b(5)], 0);
  }

  #[test]
  fn infinite_loop_has_postdominators() {
    // 0 -> {1, 3}; 1 -> 2; 2 -> 1; exit 3
    let info = cfg(&[&[1, 3], &[2], &[1], &[]], 3);
    let dom = full(&info);
    assert_eq!(dom.immediate_postdominator(b(2)), Some(b(3)));
    assert_eq!(dom.immediate_postdominator(b(1)), Some(b(2)));
    assert_eq!(dom.immediate_postdominator(b(0)), Some(b(3)));
  }

  #[test]
  fn self_loop_off_the_entry() {
    // 0 -> {1, 2}; 1 -> 1; 2 -> 3; exit 3
    let info = cfg(&[&[1, 2], &[1], &[3], &[]], 3);
    assert_eq!(info.synthetic_exit_edges, vec![b(1)]);
    let dom = full(&info);

    assert_eq!(dom.immediate_postdominator(b(3)), None);
    assert_eq!(dom.immediate_postdominator(b(2)), Some(b(3)));
    assert_eq!(dom.immediate_postdominator(b(1)), Some(b(3)));
    assert_eq!(dom.immediate_postdominator(b(0)), Some(b(3)));
    assert!(!dom.postdominates(b(2), b(0)));
    assert!(!dom.postdominates(b(1), b(0)));

    // The loop decides whether it runs again, so it is control dependent on
    // itself as well as on the entry's branch.
    assert!(dom.reverse_dominance_frontier(b(0)).is_empty());
    assert_eq!(dom.reverse_dominance_frontier(b(1)), vec![b(0), b(1)]);
    assert_eq!(dom.reverse_dominance_frontier(b(2)), vec![b(0)]);
    assert!(dom.reverse_dominance_frontier(b(3)).is_empty());
  }

  #[test]
  fn unreachable_blocks_are_rejected() {
    let info = cfg(&[&[2], &[2], &[]], 2);
    assert!(matches!(
      DominanceInfo::new(&info),
      Err(AnalysisError::UnreachableBlocks)
    ));
  }

  #[test]
  #[should_panic(expected = "find_dominators")]
  fn frontier_before_dominators_panics() {
    let info = cfg(&[&[1], &[]], 1);
    let mut dom = DominanceInfo::new(&info).unwrap();
    dom.find_dom_frontier();
  }

  #[test]
  #[should_panic(expected = "b1")]
  fn query_names_the_block() {
    let info = cfg(&[&[1], &[]], 1);
    let dom = DominanceInfo::new(&info).unwrap();
    dom.immediate_postdominator(b(1));
  }
}
