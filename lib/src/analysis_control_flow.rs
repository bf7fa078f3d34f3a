/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Control-flow facts computed from a `Function`: successor and predecessor
//! maps, the forward and reverse flow graphs, depth-first orders over them,
//! and a dense numbering of instructions.

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

use log::debug;
use std::fmt;

use crate::data_structures::{BlockIx, InstIx, MyRange, RealReg, TypedIxVec};
use crate::interface::Function;

#[derive(Clone, Debug)]
pub enum AnalysisError {
  /// At least one block can't be reached from the entry block.
  UnreachableBlocks,

  /// A non-existing real register has been seen in the code.
  NonExistingRealReg(RealReg),

  /// The exit block is out of range, or has successors.
  MissingExit,
}

impl fmt::Display for AnalysisError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      AnalysisError::UnreachableBlocks => {
        write!(fmt, "at least one block is unreachable")
      }
      AnalysisError::NonExistingRealReg(reg) => write!(
        fmt,
        "instructions mention real register {:?}, which isn't defined in the register universe",
        reg
      ),
      AnalysisError::MissingExit => {
        write!(fmt, "the exit block is out of range or has successors")
      }
    }
  }
}

//=============================================================================
// Flow graphs

/// Which way edges are followed.  `Reverse` swaps every edge and roots the
/// graph at the exit block; it is the graph that postdominance is computed
/// on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Orientation {
  Forward,
  Reverse,
}

#[derive(Clone, Debug)]
pub struct FlowGraph {
  pub root: BlockIx,
  pub succs: TypedIxVec<BlockIx, Vec<BlockIx>>,
  pub preds: TypedIxVec<BlockIx, Vec<BlockIx>>,
}

impl FlowGraph {
  pub fn num_blocks(&self) -> u32 {
    self.succs.len()
  }

  // Iterative depth first search from the root, visiting successors in
  // their listed order.  Returns the blocks in postorder; blocks not
  // reachable from the root are absent.
  fn postorder(&self) -> Vec<BlockIx> {
    let mut visited = TypedIxVec::<BlockIx, bool>::new();
    visited.resize(self.num_blocks(), false);
    let mut post_ord = Vec::<BlockIx>::new();
    // Each entry is a block and the index of the next successor to visit.
    let mut stack = Vec::<(BlockIx, usize)>::new();

    visited[self.root] = true;
    stack.push((self.root, 0));
    while let Some((bix, next)) = stack.pop() {
      if next < self.succs[bix].len() {
        stack.push((bix, next + 1));
        let succ = self.succs[bix][next];
        if !visited[succ] {
          visited[succ] = true;
          stack.push((succ, 0));
        }
      } else {
        post_ord.push(bix);
      }
    }
    post_ord
  }
}

fn invert(
  succs: &TypedIxVec<BlockIx, Vec<BlockIx>>,
) -> TypedIxVec<BlockIx, Vec<BlockIx>> {
  let mut preds = TypedIxVec::<BlockIx, Vec<BlockIx>>::new();
  preds.resize(succs.len(), Vec::new());
  for src in succs.range() {
    for dst in succs[src].iter() {
      preds[*dst].push(src);
    }
  }
  preds
}

//=============================================================================
// Control-flow analysis results for a Function

// CfgInfo contains CFG-related info computed from a Function.
#[derive(Clone, Debug)]
pub struct CfgInfo {
  // All these TypedIxVecs contain one element per block in the Function.

  // Predecessor and successor maps, as the client describes them.  Duplicate
  // edges are removed; otherwise successors keep the client's order.
  pub succ_map: TypedIxVec<BlockIx, Vec<BlockIx>>,
  pub pred_map: TypedIxVec<BlockIx, Vec<BlockIx>>,

  pub entry: BlockIx,
  pub exit: BlockIx,

  forward: FlowGraph,
  reverse: FlowGraph,

  // Blocks that were given an extra edge to the exit in the reverse graph,
  // because they could not otherwise reach it.
  pub synthetic_exit_edges: Vec<BlockIx>,
}

impl CfgInfo {
  #[inline(never)]
  pub fn create<F: Function>(func: &F) -> Result<Self, AnalysisError> {
    let mut succs = Vec::<Vec<BlockIx>>::new();
    for b in func.blocks() {
      succs.push(func.block_succs(b));
    }
    Self::from_succs(func.entry_block(), func.exit_block(), succs)
  }

  /// Build from explicit successor lists, indexed by block number.
  pub fn from_succs(
    entry: BlockIx, exit: BlockIx, succs: Vec<Vec<BlockIx>>,
  ) -> Result<Self, AnalysisError> {
    let nBlocks = succs.len() as u32;
    if exit.get() >= nBlocks || entry.get() >= nBlocks {
      return Err(AnalysisError::MissingExit);
    }

    // === BEGIN compute successor and predecessor maps ===
    //
    let mut succ_map = TypedIxVec::<BlockIx, Vec<BlockIx>>::new();
    for list in succs {
      let mut deduped = Vec::<BlockIx>::with_capacity(list.len());
      for bix in list {
        if !deduped.contains(&bix) {
          deduped.push(bix);
        }
      }
      succ_map.push(deduped);
    }
    if !succ_map[exit].is_empty() {
      return Err(AnalysisError::MissingExit);
    }
    let pred_map = invert(&succ_map);
    //
    // === END compute successor and predecessor maps ===

    let forward =
      FlowGraph { root: entry, succs: succ_map.clone(), preds: pred_map.clone() };

    // === BEGIN give every block a way to reach the exit ===
    //
    // Blocks inside infinite loops can't reach the exit, and so would be
    // missing from the reverse graph.  Walk the forward postorder, plus
    // any blocks unreachable from the entry, and for each block that still
    // can't reach the exit add an edge from it to the exit.  That edge lets
    // every block that reaches it reach the exit too.
    let mut reaches_exit = TypedIxVec::<BlockIx, bool>::new();
    reaches_exit.resize(nBlocks, false);
    mark_backwards(&pred_map, exit, &mut reaches_exit);

    let mut order = forward.postorder();
    {
      let mut seen = TypedIxVec::<BlockIx, bool>::new();
      seen.resize(nBlocks, false);
      for bix in order.iter() {
        seen[*bix] = true;
      }
      for bix in succ_map.range() {
        if !seen[bix] {
          order.push(bix);
        }
      }
    }

    let mut synthetic_exit_edges = Vec::<BlockIx>::new();
    for bix in order {
      if !reaches_exit[bix] {
        debug!("CfgInfo: synthetic edge {:?} -> exit {:?}", bix, exit);
        synthetic_exit_edges.push(bix);
        mark_backwards(&pred_map, bix, &mut reaches_exit);
      }
    }
    //
    // === END give every block a way to reach the exit ===

    // The reverse graph swaps every edge.  A synthetic edge b -> exit shows
    // up as exit -> b.
    let mut rev_succs = pred_map.clone();
    for bix in synthetic_exit_edges.iter() {
      rev_succs[exit].push(*bix);
    }
    let rev_preds = invert(&rev_succs);
    let reverse = FlowGraph { root: exit, succs: rev_succs, preds: rev_preds };

    Ok(CfgInfo {
      succ_map,
      pred_map,
      entry,
      exit,
      forward,
      reverse,
      synthetic_exit_edges,
    })
  }

  pub fn num_blocks(&self) -> u32 {
    self.succ_map.len()
  }

  pub fn graph(&self, orientation: Orientation) -> &FlowGraph {
    match orientation {
      Orientation::Forward => &self.forward,
      Orientation::Reverse => &self.reverse,
    }
  }

  /// Postorder over the blocks reachable from the root of the given
  /// orientation.
  pub fn postorder(&self, orientation: Orientation) -> Vec<BlockIx> {
    self.graph(orientation).postorder()
  }

  /// Reverse postorder over the blocks reachable from the root of the given
  /// orientation.  Deterministic: successors are explored in the order the
  /// client lists them.
  pub fn reverse_postorder(&self, orientation: Orientation) -> Vec<BlockIx> {
    let mut ord = self.postorder(orientation);
    ord.reverse();
    ord
  }

  /// `reverse_postorder`, followed by any blocks it doesn't reach, in
  /// increasing index order.
  pub fn reverse_postorder_all(
    &self, orientation: Orientation,
  ) -> Vec<BlockIx> {
    let mut ord = self.reverse_postorder(orientation);
    let mut seen = TypedIxVec::<BlockIx, bool>::new();
    seen.resize(self.num_blocks(), false);
    for bix in ord.iter() {
      seen[*bix] = true;
    }
    for bix in self.succ_map.range() {
      if !seen[bix] {
        ord.push(bix);
      }
    }
    ord
  }
}

// Mark every block from which |from| can be reached.
fn mark_backwards(
  pred_map: &TypedIxVec<BlockIx, Vec<BlockIx>>, from: BlockIx,
  marked: &mut TypedIxVec<BlockIx, bool>,
) {
  let mut stack = vec![from];
  marked[from] = true;
  while let Some(bix) = stack.pop() {
    for pred in pred_map[bix].iter() {
      if !marked[*pred] {
        marked[*pred] = true;
        stack.push(*pred);
      }
    }
  }
}

//=============================================================================
// Dense instruction numbering

/// Numbers every instruction of a Function densely, block by block.  Only
/// valid until the Function's blocks are next changed.
#[derive(Clone, Debug)]
pub struct InstLayout {
  starts: TypedIxVec<BlockIx, InstIx>,
  lens: TypedIxVec<BlockIx, u32>,
  block_of: TypedIxVec<InstIx, BlockIx>,
}

impl InstLayout {
  pub fn new<F: Function>(func: &F) -> Self {
    let mut starts = TypedIxVec::new();
    let mut lens = TypedIxVec::new();
    let mut block_of = TypedIxVec::new();
    for b in func.blocks() {
      let len = func.block_insns(b).len() as u32;
      starts.push(InstIx::new(block_of.len()));
      lens.push(len);
      for _ in 0..len {
        block_of.push(b);
      }
    }
    Self { starts, lens, block_of }
  }

  pub fn num_insts(&self) -> u32 {
    self.block_of.len()
  }

  pub fn range(&self, bix: BlockIx) -> MyRange<InstIx> {
    MyRange::new(self.starts[bix], self.lens[bix] as usize)
  }

  pub fn first(&self, bix: BlockIx) -> InstIx {
    self.starts[bix]
  }

  pub fn block_of(&self, iix: InstIx) -> BlockIx {
    self.block_of[iix]
  }

  /// The block holding |iix|, and its position within that block.
  pub fn locate(&self, iix: InstIx) -> (BlockIx, usize) {
    let bix = self.block_of[iix];
    (bix, (iix.get() - self.starts[bix].get()) as usize)
  }

  /// The last instruction of |bix|, if it has any.
  pub fn last(&self, bix: BlockIx) -> Option<InstIx> {
    if self.lens[bix] == 0 {
      None
    } else {
      Some(self.starts[bix].plus(self.lens[bix] - 1))
    }
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

  #[test]
  fn diamond_orders() {
    // 0 -> {1, 2} -> 3
    let info = cfg(&[&[1, 2], &[3], &[3], &[]], 3);
    assert_eq!(
      info.reverse_postorder(Orientation::Forward),
      vec![b(0), b(2), b(1), b(3)]
    );
    assert_eq!(
      info.reverse_postorder(Orientation::Reverse),
      vec![b(3), b(2), b(1), b(0)]
    );
    assert!(info.synthetic_exit_edges.is_empty());
    assert_eq!(info.pred_map[b(3)], vec![b(1), b(2)]);
  }

  #[test]
  fn duplicate_successors_collapse() {
    let info = cfg(&[&[1, 1], &[]], 1);
    assert_eq!(info.succ_map[b(0)], vec![b(1)]);
    assert_eq!(info.pred_map[b(1)], vec![b(0)]);
  }

  #[test]
  fn infinite_loop_gets_synthetic_exit_edge() {
    // 0 -> {1, 3}, 1 -> 2, 2 -> 1 (never leaves), 3 is the exit.
    let info = cfg(&[&[1, 3], &[2], &[1], &[]], 3);
    assert_eq!(info.synthetic_exit_edges, vec![b(2)]);
    let rpo = info.reverse_postorder(Orientation::Reverse);
    assert_eq!(rpo.len(), 4);
    assert_eq!(rpo[0], b(3));
    // The client's view is untouched.
    assert_eq!(info.succ_map[b(2)], vec![b(1)]);
  }

  #[test]
  fn exit_with_successors_is_rejected() {
    let res = CfgInfo::from_succs(b(0), b(1), vec![vec![b(1)], vec![b(0)]]);
    assert!(matches!(res, Err(AnalysisError::MissingExit)));
  }

  #[test]
  fn unreachable_block_is_ordered_last() {
    let info = cfg(&[&[2], &[2], &[]], 2);
    assert_eq!(info.reverse_postorder(Orientation::Forward), vec![b(0), b(2)]);
    assert_eq!(
      info.reverse_postorder_all(Orientation::Forward),
      vec![b(0), b(2), b(1)]
    );
  }
}
