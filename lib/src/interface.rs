/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! This is the top level interface for the flowcolor library.

use std::fmt;

// Stuff that is defined by the library

// Sets and maps of things.  We can refine these later; but for now the
// interface needs some way to speak about them, so let's use the
// library-provided versions.

pub use crate::data_structures::Map;
pub use crate::data_structures::Set;

// Register classes

pub use crate::data_structures::RegClass;
pub use crate::data_structures::NUM_REG_CLASSES;

// Registers, both real and virtual, and ways to create them

pub use crate::data_structures::Reg;

pub use crate::data_structures::RealReg;
pub use crate::data_structures::VirtualReg;

// Spill slots

pub use crate::data_structures::SpillSlot;

// The real reg universe

pub use crate::data_structures::RealRegUniverse;
pub use crate::data_structures::RegClassInfo;

// TypedIxVector, so that the interface can speak about vectors of blocks and
// instructions.

pub use crate::data_structures::TypedIxVec;
pub use crate::data_structures::{BlockIx, InstIx, MyRange};

// The analyses, for clients that want them on their own.

pub use crate::analysis_control_flow::{
  AnalysisError, CfgInfo, InstLayout, Orientation,
};
pub use crate::analysis_data_flow::{
  DefUse, DefUseAnalyzer, Liveness, OperandCatalog, ReachingDefs, RegDefUse,
};
pub use crate::analysis_dominance::DominanceInfo;
pub use crate::checker::{CheckerError, CheckerErrors, CheckerValue};
pub use crate::dead_code::DceResult;
pub use crate::nat_set::NatSet;

/// What sort of thing an instruction is, as far as dead code elimination is
/// concerned.  Every instruction that isn't a plain computation is
/// considered to have an effect that must be kept.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InstKind {
  /// A computation whose only effect is on the registers it defines.
  Plain,
  /// A write to memory.
  Store,
  Call,
  Return,
  /// A control transfer ending a block, other than a return.
  Branch,
  /// A target-defined instruction with effects the library can't see.
  Builtin,
  /// A marker (label, line or header/trailer note).  Never deleted.
  Marker,
}

/// Register uses for a given instruction.
pub struct InstRegUses {
  /// Registers that are read.
  pub used: Set<Reg>,
  /// Registers that are written.
  pub defined: Set<Reg>,
  /// Registers that are read and then written in place.  This is distinct
  /// from being in both `used` and `defined`: a modified virtual register
  /// must live in the same real register before and after the instruction.
  pub modified: Set<Reg>,
}

/// A map from virtual registers to their replacements, as seen from one
/// instruction.  Uses take effect just before the instruction, defs just
/// after; a modified register must map the same way under both.
pub trait RegUsageMapper {
  /// The register to read instead of |vreg|, if any.
  fn get_use(&self, vreg: VirtualReg) -> Option<Reg>;

  /// The register to write instead of |vreg|, if any.
  fn get_def(&self, vreg: VirtualReg) -> Option<Reg>;

  /// The register to modify instead of |vreg|, if any.
  fn get_mod(&self, vreg: VirtualReg) -> Option<Reg>;
}

/// A trait defined by the client to provide access to its instruction / CFG
/// representation.
pub trait Function {
  /// The library is parameterized on F: Function and so can use the
  /// projected type F::Inst.
  type Inst: Clone + fmt::Debug;

  // -------------
  // CFG traversal
  // -------------

  /// Allow iteration over basic blocks, numbered densely from zero.
  fn blocks(&self) -> MyRange<BlockIx>;

  /// Get the index of the entry block.
  fn entry_block(&self) -> BlockIx;

  /// Get the index of the single exit block.  It has no successors.
  fn exit_block(&self) -> BlockIx;

  /// The instructions of a block, in order.
  fn block_insns(&self, block: BlockIx) -> &[Self::Inst];

  /// The instructions of a block, for rewriting.  Control flow must be left
  /// intact: the last instruction stays a block's only control transfer.
  fn block_insns_mut(&mut self, block: BlockIx) -> &mut Vec<Self::Inst>;

  /// Get CFG successors for a given block.
  fn block_succs(&self, block: BlockIx) -> Vec<BlockIx>;

  // --------------------------
  // CFG editing
  // --------------------------

  /// Replace the control transfer ending |block| by an unconditional jump
  /// to |to|.
  fn redirect_branch(&mut self, block: BlockIx, to: BlockIx);

  /// Jump threading, straight-line merging and unreachable block removal,
  /// to a fixed point.  Blocks may be renumbered; the exit block is kept.
  fn simplify_cfg(&mut self);

  // --------------------------
  // Instruction classification
  // --------------------------

  fn inst_kind(&self, insn: &Self::Inst) -> InstKind;

  /// Allow the library to query whether this is a move.  Returns (dst, src).
  fn is_move(&self, insn: &Self::Inst) -> Option<(Reg, Reg)>;

  /// Provide the defined, used, and modified registers for an instruction.
  fn get_regs(&self, insn: &Self::Inst) -> InstRegUses;

  /// Does |vreg| name storage that must live in memory (say, a variable
  /// whose address is taken)?  Such registers are never allocated.
  fn is_volatile(&self, vreg: VirtualReg) -> bool;

  // ------------
  // Rewriting
  // ------------

  /// Map each register slot through |maps|.  Virtual registers for which
  /// the mapper has no answer are left alone.
  fn map_regs<RUM: RegUsageMapper>(insn: &mut Self::Inst, maps: &RUM);

  /// How many logical spill slots does the given regclass require?  E.g., on
  /// a 64-bit machine, spill slots may nominally be 64-bit words, but a
  /// 128-bit vector value will require two slots.  The allocator will always
  /// align on this size.
  fn get_spillslot_size(&self, regclass: RegClass, for_vreg: VirtualReg)
    -> u32;

  /// Generate a spill instruction for insertion into the instruction
  /// sequence.  |from_reg| may still be virtual.
  fn gen_spill(
    &self, to_slot: SpillSlot, from_reg: Reg, for_vreg: VirtualReg,
  ) -> Self::Inst;

  /// Generate a reload instruction for insertion into the instruction
  /// sequence.  |to_reg| may still be virtual.
  fn gen_reload(
    &self, to_reg: Reg, from_slot: SpillSlot, for_vreg: VirtualReg,
  ) -> Self::Inst;
}

/// Knobs for the allocator.
#[derive(Clone, Debug)]
pub struct Options {
  /// Verify the final assignment symbolically, and fail with
  /// `RegAllocError::RegChecker` if it is wrong.
  pub run_checker: bool,

  /// Try to coalesce moves.
  pub coalescing: bool,

  /// When choosing a colour, prefer the colour of a move partner.
  pub biased_coloring: bool,
}

impl Default for Options {
  fn default() -> Self {
    Self { run_checker: false, coalescing: true, biased_coloring: true }
  }
}

/// The result of register allocation.  The function itself has been
/// rewritten in place.
#[derive(Debug)]
pub struct RegAllocResult {
  /// How many spill slots were used?
  pub num_spill_slots: u32,

  /// Number of reload instructions inserted.
  pub spill_loads: u32,

  /// Number of spill instructions inserted.
  pub spill_stores: u32,

  /// Number of moves deleted because both sides got the same register.
  pub coalesced_moves: u32,

  /// Number of build/colour rounds that were needed.
  pub rounds: u32,

  /// Which real registers were overwritten?  This will contain all real regs
  /// that appear as defs or modifies in register slots of the output
  /// instructions.
  pub clobbered_registers: Set<RealReg>,
}

#[derive(Clone, Debug)]
pub enum RegAllocError {
  /// The function's CFG or registers couldn't be analysed.
  Analysis(AnalysisError),

  /// A value made only of spill temporaries couldn't be given a register of
  /// this class.  Some instruction needs more registers at once than the
  /// class has.
  OutOfRegisters(RegClass),

  /// A virtual register has a class with no allocable registers.
  UnsatisfiableClass(RegClass),

  /// The checker found the final assignment to be wrong.
  RegChecker(CheckerErrors),
}

impl fmt::Display for RegAllocError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      RegAllocError::Analysis(err) => write!(fmt, "analysis error: {}", err),
      RegAllocError::OutOfRegisters(rc) => {
        write!(fmt, "ran out of {:?} registers for spill temporaries", rc)
      }
      RegAllocError::UnsatisfiableClass(rc) => {
        write!(fmt, "no allocable registers in class {:?}", rc)
      }
      RegAllocError::RegChecker(errs) => {
        write!(fmt, "checker found {} error(s)", errs.errors.len())
      }
    }
  }
}

impl From<AnalysisError> for RegAllocError {
  fn from(err: AnalysisError) -> Self {
    RegAllocError::Analysis(err)
  }
}

/// Allocate registers for a function's code, given a universe of real
/// registers that we are allowed to use.  On success the function has been
/// rewritten to mention only real registers, and spill code inserted.
pub fn allocate_registers<F: Function>(
  func: &mut F, rreg_universe: &RealRegUniverse, opts: &Options,
) -> Result<RegAllocResult, RegAllocError> {
  crate::graph_coloring::alloc_main(func, rreg_universe, opts)
}

/// Delete instructions that can't affect the function's observable
/// behaviour, then simplify the CFG.  Definitions of real registers that the
/// universe doesn't make allocable are treated as observable.
pub fn eliminate_dead_code<F: Function>(
  func: &mut F, rreg_universe: &RealRegUniverse,
) -> Result<DceResult, AnalysisError> {
  crate::dead_code::run(func, rreg_universe)
}
