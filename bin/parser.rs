/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A reader for the textual form of test functions.
//!
//! ```text
//! ; comment
//! x = i32             ; a virtual register
//! s = volatile i32    ; one that must live in memory
//! d = f64
//! r0 = real i32 0     ; real register number 0
//! start:
//!   imm x, 10
//!   if_then_else x, body, end
//! body:
//!   subm x, 1
//!   goto start
//! end:
//!   finish x
//! ```
//!
//! The first block declared is the entry.  Operand classes are not checked
//! here; that is the validator's job.

#![allow(non_snake_case)]

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::iter::Peekable;
use std::path::PathBuf;
use std::str::CharIndices;

use flowcolor::{Reg, RegClass};

use crate::test_framework::*;

#[derive(Debug)]
pub enum ParseError {
  IoError(io::Error),
  Parse(String),
}

impl From<io::Error> for ParseError {
  fn from(err: io::Error) -> ParseError {
    ParseError::IoError(err)
  }
}

impl fmt::Display for ParseError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      ParseError::IoError(err) => write!(fmt, "i/o error: {}", err),
      ParseError::Parse(msg) => write!(fmt, "parse error: {}", msg),
    }
  }
}

pub type ParseResult<T> = Result<T, ParseError>;

pub fn parse_file(path: PathBuf) -> ParseResult<Func> {
  let basename = match path.file_stem().and_then(|stem| stem.to_str()) {
    Some(stem) => stem.to_string(),
    None => {
      return Err(ParseError::Parse(format!("bad file name {:?}", path)))
    }
  };
  let mut file = File::open(path)?;
  let mut content = String::new();
  file.read_to_string(&mut content)?;
  parse_content(&basename, &content)
}

struct Parser<'f, 'str> {
  func: &'f mut Func,
  vars: HashMap<String, Reg>,

  source: &'str str,
  iter: Peekable<CharIndices<'str>>,
  line: usize,
  start: usize,
  current: usize,
}

impl<'f, 'str> Parser<'f, 'str> {
  fn new(func: &'f mut Func, source: &'str str) -> Self {
    let iter = source.char_indices().peekable();
    Self {
      func,
      start: 0,
      current: 0,
      line: 1,
      vars: HashMap::new(),
      iter,
      source,
    }
  }

  // Environment.
  fn define_var(&mut self, name: &str, reg: Reg) -> ParseResult<()> {
    if self.vars.insert(name.into(), reg).is_some() {
      self.error("duplicate variable declaration")
    } else {
      Ok(())
    }
  }

  fn var(&self, name: &str) -> ParseResult<Reg> {
    match self.vars.get(name) {
      Some(reg) => Ok(*reg),
      None => self.error(&format!("unknown variable '{}'", name)),
    }
  }

  fn define_block(&mut self, block_name: String, insts: Vec<Inst>) {
    self.func.block(&block_name, insts);
  }

  // Parsing.
  fn peek(&mut self) -> Option<char> {
    self.iter.peek().map(|(_, c)| *c)
  }

  fn peek_next(&self) -> Option<char> {
    let mut clone = self.iter.clone();
    clone.next();
    clone.peek().map(|(_, c)| *c)
  }

  fn advance(&mut self) -> Option<char> {
    let (i, ch) = self.iter.next()?;
    self.current = i;
    Some(ch)
  }

  // Higher level parsing.
  fn skip_whitespace_and_comments(&mut self) {
    while let Some(c) = self.peek() {
      if c == ' ' || c == '\t' || c == '\r' || c == '\n' {
        self.advance();
        if c == '\n' {
          self.line += 1;
        }
      } else if c == ';' {
        // It's a comment! skip until the end of line.
        while let Some(c) = self.advance() {
          if c == '\n' {
            self.line += 1;
            break;
          }
        }
      } else {
        break;
      }
    }
  }

  fn read_char(&mut self) -> ParseResult<char> {
    self.skip_whitespace_and_comments();
    match self.advance() {
      Some(c) => Ok(c),
      None => self.error("expected char"),
    }
  }

  fn try_read_char(&mut self, expected: char) -> bool {
    self.skip_whitespace_and_comments();
    if self.peek() == Some(expected) {
      self.advance();
      true
    } else {
      false
    }
  }

  fn slice(&self, from: usize, to: usize) -> ParseResult<&'str str> {
    match self.source.get(from..to) {
      Some(s) => Ok(s),
      None => self.error("malformed token"),
    }
  }

  fn try_read_ident_sameline(&mut self) -> ParseResult<Option<String>> {
    // Only ignore simple spaces.
    while let Some(' ') = self.peek() {
      self.advance();
    }

    match self.peek() {
      Some(c) if is_alpha(c) => {
        self.advance();
      }
      _ => return Ok(None),
    }

    self.start = self.current;
    while let Some(c) = self.peek() {
      if !is_alpha_numeric(c) {
        break;
      }
      self.advance();
    }

    Ok(Some(self.slice(self.start, self.current + 1)?.to_string()))
  }

  fn try_read_ident(&mut self) -> ParseResult<Option<String>> {
    self.skip_whitespace_and_comments();
    self.try_read_ident_sameline()
  }

  fn read_ident(&mut self) -> ParseResult<String> {
    match self.try_read_ident()? {
      Some(string) => Ok(string),
      None => self.error("expected identifier or keyword"),
    }
  }

  fn read_block(&mut self) -> ParseResult<String> {
    let block_name = self.read_ident()?;
    if let Some(':') = self.peek() {
      self.advance();
      // Ignore the block's name.
      self.read_ident()?;
    }
    Ok(block_name)
  }

  fn read_string(&mut self) -> ParseResult<&'str str> {
    self.skip_whitespace_and_comments();
    if let Some('"') = self.advance() {
      // All good!
    } else {
      return self.error("expected opening \"");
    }
    self.start = self.current;
    while let Some(c) = self.advance() {
      if c == '\n' {
        self.line += 1;
      }
      if c == '"' {
        return self.slice(self.start + 1, self.current);
      }
    }
    self.error("unterminated string")
  }

  fn try_read_number(&mut self) -> ParseResult<Option<f64>> {
    self.skip_whitespace_and_comments();

    let mut is_negative = false;
    if let Some('-') = self.peek() {
      // Consume the minus sign.
      self.advance();
      is_negative = true;
    }

    let first_digit = match self.peek() {
      Some(c) if is_digit(c) => {
        self.advance();
        c
      }
      Some('i') => {
        // This must be inf.
        self.advance();
        self.expect_char('n')?;
        self.expect_char('f')?;
        let result = std::f64::INFINITY;
        return Ok(Some(if is_negative { -result } else { result }));
      }
      Some('N') => {
        // This must be NaN.
        self.advance();
        self.expect_char('a')?;
        self.expect_char('N')?;
        return Ok(Some(std::f64::NAN));
      }
      _ if is_negative => {
        // We saw a minus sign, we should have had something after it.
        return self.error("expected a valid number after minus sign");
      }
      _ => return Ok(None),
    };

    let mut number = digit_value(first_digit);
    let mut fractional_power_of_ten: Option<f64> = None;
    while let Some(c) = self.peek() {
      if is_digit(c) {
        self.advance();
        let c_num = digit_value(c);
        if let Some(decimal) = fractional_power_of_ten.as_mut() {
          number += c_num * *decimal;
          *decimal /= 10.0;
        } else {
          number *= 10.0;
          number += c_num;
        }
      } else if c == '.' {
        match self.peek_next() {
          Some(d) if is_digit(d) => {
            self.advance();
            if fractional_power_of_ten.is_some() {
              return self.error("unexpected dot in number");
            }
            fractional_power_of_ten = Some(0.1);
          }
          _ => break,
        }
      } else {
        break;
      }
    }

    Ok(Some(if is_negative { -number } else { number }))
  }

  fn read_number(&mut self) -> ParseResult<f64> {
    match self.try_read_number()? {
      Some(number) => Ok(number),
      None => self.error("expected number"),
    }
  }

  fn try_read_int(&mut self) -> ParseResult<Option<u32>> {
    match self.try_read_number()? {
      Some(value) => {
        let as_int = value as u32;
        if as_int as f64 != value {
          self.error("expected a u32, got something else")
        } else {
          Ok(Some(as_int))
        }
      }
      None => Ok(None),
    }
  }

  fn read_int(&mut self) -> ParseResult<u32> {
    match self.try_read_int()? {
      Some(int) => Ok(int),
      None => self.error("expected integer"),
    }
  }

  fn try_read_var(&mut self) -> ParseResult<Option<Reg>> {
    match self.try_read_ident()? {
      Some(ident) => Ok(Some(self.var(&ident)?)),
      None => Ok(None),
    }
  }

  fn read_var(&mut self) -> ParseResult<Reg> {
    match self.try_read_var()? {
      Some(reg) => Ok(reg),
      None => self.error("expected variable"),
    }
  }

  fn to_reg_class(&self, ident: &str) -> ParseResult<RegClass> {
    match ident {
      "i32" | "I32" => Ok(RegClass::I32),
      "f32" | "F32" => Ok(RegClass::F32),
      "f64" | "F64" => Ok(RegClass::F64),
      _ => self.error("unknown register class"),
    }
  }

  fn read_ri(&mut self) -> ParseResult<RI> {
    match self.try_read_var()? {
      Some(reg) => Ok(RI::Reg { reg }),
      None => Ok(RI::Imm { imm: self.read_int()? }),
    }
  }

  fn read_am(&mut self) -> ParseResult<AM> {
    // Either RR or RI. As a shortcut, allow R, meaning RI with 0 offset.
    self.expect_char('[')?;
    let base = self.read_var()?;
    let am = if self.try_read_char(',') {
      match self.try_read_var()? {
        Some(offset) => AM::RR { base, offset },
        None => AM::RI { base, offset: self.read_int()? },
      }
    } else {
      AM::RI { base, offset: 0 }
    };
    self.expect_char(']')?;
    Ok(am)
  }

  // "dst, src" for the two-register forms.
  fn read_var_pair(&mut self) -> ParseResult<(Reg, Reg)> {
    let dst = self.read_var()?;
    self.expect_char(',')?;
    let src = self.read_var()?;
    Ok((dst, src))
  }

  fn expect_char(&mut self, expected: char) -> ParseResult<()> {
    let c = self.read_char()?;
    if c != expected {
      self.error(&format!("expected char '{}'", expected))
    } else {
      Ok(())
    }
  }

  fn is_done(&mut self) -> bool {
    self.skip_whitespace_and_comments();
    self.peek().is_none()
  }

  fn error<T>(&self, msg: &str) -> ParseResult<T> {
    Err(ParseError::Parse(format!("error at line {}: {}", self.line, msg)))
  }

  // Read the operands of the instruction named |name|.  Returns None if
  // |name| is not an instruction, in which case it starts the next block.
  fn read_inst(&mut self, name: &str) -> ParseResult<Option<Inst>> {
    if let Some(op) = BinOp::from_name(name) {
      let (dst, srcL) = self.read_var_pair()?;
      self.expect_char(',')?;
      let srcR = self.read_ri()?;
      return Ok(Some(Inst::BinOp { op, dst, srcL, srcR }));
    }
    if let Some(op) = name.strip_suffix('m').and_then(BinOp::from_name) {
      let dst = self.read_var()?;
      self.expect_char(',')?;
      let srcR = self.read_ri()?;
      return Ok(Some(Inst::BinOpM { op, dst, srcR }));
    }

    let insn = match name {
      "copy" | "copyf" => {
        let (dst, src) = self.read_var_pair()?;
        Inst::Copy { dst, src }
      }

      "fadd" | "fsub" | "fmul" | "fdiv" => {
        let op = match name {
          "fadd" => BinOpF::FAdd,
          "fsub" => BinOpF::FSub,
          "fmul" => BinOpF::FMul,
          _ => BinOpF::FDiv,
        };
        let (dst, srcL) = self.read_var_pair()?;
        self.expect_char(',')?;
        let srcR = self.read_var()?;
        Inst::BinOpF { op, dst, srcL, srcR }
      }

      "finish" => {
        let reg = match self.try_read_ident_sameline()? {
          Some(var_name) => Some(self.var(&var_name)?),
          None => None,
        };
        Inst::Finish { reg }
      }

      "goto" => {
        let target = self.read_block()?;
        Inst::Goto { target: Label::newUnresolved(target) }
      }

      "if_then_else" => {
        let cond = self.read_var()?;
        self.expect_char(',')?;
        let then_block = self.read_block()?;
        self.expect_char(',')?;
        let else_block = self.read_block()?;
        Inst::GotoCTF {
          cond,
          targetT: Label::newUnresolved(then_block),
          targetF: Label::newUnresolved(else_block),
        }
      }

      "imm" => {
        let dst = self.read_var()?;
        self.expect_char(',')?;
        let imm = self.read_int()?;
        Inst::Imm { dst, imm }
      }

      "immf" => {
        let dst = self.read_var()?;
        self.expect_char(',')?;
        let imm = self.read_number()?;
        Inst::ImmF { dst, imm }
      }

      "load" | "loadf" => {
        let dst = self.read_var()?;
        self.expect_char(',')?;
        let addr = self.read_am()?;
        if name == "load" {
          Inst::Load { dst, addr }
        } else {
          Inst::LoadF { dst, addr }
        }
      }

      "store" | "storef" => {
        let addr = self.read_am()?;
        self.expect_char(',')?;
        let src = self.read_var()?;
        if name == "store" {
          Inst::Store { addr, src }
        } else {
          Inst::StoreF { addr, src }
        }
      }

      "printi" => Inst::PrintI { reg: self.read_var()? },
      "printf" => Inst::PrintF { reg: self.read_var()? },
      "prints" => Inst::PrintS { str: self.read_string()?.to_string() },
      "println" => {
        Inst::PrintS { str: format!("{}\n", self.read_string()?) }
      }

      "call" => Inst::Call { callee: self.read_ident()? },
      "mark" => Inst::Mark { text: self.read_string()?.to_string() },

      _ => return Ok(None),
    };
    Ok(Some(insn))
  }
}

pub fn parse_content(func_name: &str, content: &str) -> ParseResult<Func> {
  let mut func = Func::new(func_name);

  let mut parser = Parser::new(&mut func, content);

  // Look for variable declarations.
  let mut name;
  loop {
    name = parser.read_ident()?;
    let c = parser.read_char()?;
    if c == '=' {
      // variable declaration.
      let kind = parser.read_ident()?;
      let reg = match kind.as_str() {
        "real" => {
          let class = parser.read_ident()?;
          let reg_class = parser.to_reg_class(&class)?;
          let index = parser.read_int()?;
          if index > 255 {
            return parser.error("expected u8");
          }
          Reg::new_real(reg_class, 0x0, index as u8)
        }
        "volatile" => {
          let class = parser.read_ident()?;
          let reg_class = parser.to_reg_class(&class)?;
          parser.func.new_volatile_reg(reg_class)
        }
        _ => {
          let reg_class = parser.to_reg_class(&kind)?;
          parser.func.new_virtual_reg(reg_class)
        }
      };
      parser.define_var(&name, reg)?;
    } else if c == ':' {
      // first block declaration!
      break;
    } else {
      return parser.error("expected = or :");
    }
  }

  parser.func.set_entry(&name);
  let mut next_block_name = Some(name);

  // Look for blocks (name already contains the name of the first block).
  loop {
    let mut insts = Vec::new();
    let block_name = next_block_name;

    // Look for instructions.
    loop {
      // Either:
      // - nothing (empty block, no more blocks thereafter).
      // - instruction (name, maybe operands).
      // - next block.
      if parser.is_done() {
        next_block_name = None;
        break;
      }

      let inst_or_block_name = parser.read_ident()?;
      match parser.read_inst(&inst_or_block_name)? {
        Some(insn) => insts.push(insn),
        None => {
          next_block_name = Some(inst_or_block_name);
          break;
        }
      }
    }

    if let Some(block_name) = block_name {
      parser.define_block(block_name, insts);
    }

    if parser.is_done() {
      break;
    }

    if parser.read_char()? != ':' {
      return parser.error(
        "expected : after possible block name, or unexpected instruction name",
      );
    }
  }

  func.try_finish().map_err(ParseError::Parse)?;
  Ok(func)
}

fn is_digit(c: char) -> bool {
  c >= '0' && c <= '9'
}

fn digit_value(c: char) -> f64 {
  (c as u32 - '0' as u32) as f64
}

fn is_alpha(c: char) -> bool {
  c >= 'a' && c <= 'z' || c >= 'A' && c <= 'Z' || c == '_' || c == '-'
}

fn is_alpha_numeric(c: char) -> bool {
  is_digit(c) || is_alpha(c)
}

#[cfg(test)]
mod test {
  use super::*;
  use flowcolor::BlockIx;

  const COUNTDOWN: &str = r#"
    ; Counts down from three, printing along the way.
    n = i32
    acc = volatile i32
    half = f64
    start:
      imm n, 3
      imm acc, 0
      immf half, 0.5
      goto loop
    loop:
      if_then_else n, body, done
    body:
      printi n
      prints " "
      addm acc, n
      subm n, 1
      call tick
      goto loop
    done:
      mark "end"
      printf half
      finish acc
  "#;

  #[test]
  fn parses_and_runs_a_loop() {
    let func = parse_content("countdown", COUNTDOWN).unwrap();
    assert_eq!(func.blocks.len(), 4);
    assert_eq!(func.nVirtualRegs, 3);
    let acc = Reg::new_virtual(RegClass::I32, 1).to_virtual_reg();
    assert!(func.volatile.contains(acc));
    assert_eq!(func.exit_bix(), Some(BlockIx::new(3)));

    let univ = make_universe(2, 2);
    let res = run_func(
      &func,
      "countdown",
      &univ,
      RunStage::BeforeRegalloc,
      DEFAULT_STEP_LIMIT,
    )
    .unwrap();
    assert_eq!(res.stdout, "3 2 1 0.5");
    assert!(res.ret_value == Some(Value::U32(6)));
  }

  #[test]
  fn unknown_variables_are_reported_with_a_line() {
    let err = parse_content("bad", "x = i32\nb0:\n  imm y, 1\n  finish\n")
      .unwrap_err();
    match err {
      ParseError::Parse(msg) => {
        assert!(msg.contains("line 3"), "{}", msg);
        assert!(msg.contains("'y'"), "{}", msg);
      }
      ParseError::IoError(_) => panic!("unexpected i/o error"),
    }
  }

  #[test]
  fn unresolved_labels_are_errors() {
    assert!(parse_content("bad", "b0:\n  goto nowhere\n").is_err());
  }
}
