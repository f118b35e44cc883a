//! Virtual machine that runs the bytecode

use log::{debug, trace, warn};
use std::{fmt, io::Write};
use thiserror::Error;

use crate::{
    bytecode::{Bytecode, Instruction, LinkError, Operand, ParseFailure, Parser, NUM_REGISTERS},
    labels::is_halt_label,
    memory::{Memory, MemoryError},
    token::{Condition, Op},
};

/// Longest string `print s` reads before it gives up on finding the terminating zero.
pub const MAX_PRINT_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("jump to unresolved label '{0}'")]
    UnresolvedLabel(String),
    #[error("invalid width {0}, expected 1, 2, 4 or 8")]
    InvalidWidth(i64),
    #[error("invalid address {0}")]
    InvalidAddress(i64),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("unknown print base '{0}'")]
    UnknownBase(String),
    #[error("malformed instruction '{0}'")]
    Malformed(String),
    #[error("program has already halted")]
    Halted,
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Why the machine stopped
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Halt {
    Finished,
    Error,
}

/// Result of the last `cmp`/`cmp_u`
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct Flags {
    pub greater: bool,
    pub less: bool,
    pub equal: bool,
}

impl Flags {
    pub fn holds(&self, cond: Condition) -> bool {
        match cond {
            Condition::Always => true,
            Condition::Equal => self.equal,
            Condition::NotEqual => !self.equal,
            Condition::Greater => self.greater,
            Condition::Less => self.less,
            Condition::GreaterEqual => self.greater || self.equal,
            Condition::LessEqual => self.less || self.equal,
        }
    }
}

/// Created by `call` and consumed by `ret`. `x0` is not saved, it carries the return value.
#[derive(Debug)]
struct StackFrame {
    saved: [i64; NUM_REGISTERS - 1], // x1 to x31
    ret_addr: usize,                 // instruction to run next
}

/// Virtual machine representation
pub struct Vm<'m> {
    bytecode: Bytecode,
    memory: &'m mut Memory,
    ip: usize, // instruction pointer

    registers: [i64; NUM_REGISTERS],
    flags: Flags,
    frame_stack: Vec<StackFrame>,
    pub halt: Option<Halt>,
}

impl<'m> Vm<'m> {
    pub fn new(bytecode: Bytecode, memory: &'m mut Memory) -> Self {
        Vm {
            bytecode,
            memory,
            ip: 0,
            registers: [0; NUM_REGISTERS],
            flags: Flags::default(),
            frame_stack: Vec::new(),
            halt: None,
        }
    }

    pub fn load(program: &str, memory: &'m mut Memory) -> Result<Self, ParseFailure> {
        let bytecode = Parser::new(program).parse()?;
        Ok(Self::new(bytecode, memory))
    }

    /// Run until the program ends or fails. `print` writes to `out`.
    ///
    /// Labels are linked first, so a program that jumps to a label that was never defined
    /// fails before running any instruction.
    pub fn run<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<(), RuntimeError> {
        if self.halt.is_some() {
            return Err(RuntimeError::Halted);
        }

        if let Err(err) = self.bytecode.link() {
            warn!("{}", err);
            return Err(self.fail(err.into()));
        }

        while self.halt.is_none() {
            if let Err(err) = self.next_instruction(out) {
                return Err(self.fail(err));
            }
        }
        Ok(())
    }

    /// Execute a single instruction. Running past the last instruction halts the machine.
    pub fn next_instruction<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<(), RuntimeError> {
        let instruction = match self.bytecode.instructions.get(self.ip) {
            Some(instruction) => instruction.clone(),
            None => {
                debug!("reached the end of the program");
                self.finish();
                return Ok(());
            }
        };
        trace!("{:>4}: {}", self.ip, instruction);

        match instruction.op {
            Op::Add => self.ins_alu(&instruction, i64::wrapping_add)?,
            Op::Sub => self.ins_alu(&instruction, i64::wrapping_sub)?,
            Op::And => self.ins_alu(&instruction, |lhs, rhs| lhs & rhs)?,
            Op::Eor => self.ins_alu(&instruction, |lhs, rhs| lhs ^ rhs)?,
            Op::Orr => self.ins_alu(&instruction, |lhs, rhs| lhs | rhs)?,
            Op::Lsl => self.ins_alu(&instruction, shift_left)?,
            Op::Lsr => self.ins_alu(&instruction, logical_shift_right)?,
            Op::Asr => self.ins_alu(&instruction, arithmetic_shift_right)?,
            Op::Mov => self.ins_mov(&instruction)?,
            Op::Cmp => self.ins_cmp(&instruction, false)?,
            Op::CmpU => self.ins_cmp(&instruction, true)?,
            Op::Load => self.ins_load(&instruction)?,
            Op::Store => self.ins_store(&instruction)?,
            Op::Put => self.ins_put(&instruction)?,
            Op::Print => self.ins_print(&instruction, out)?,
            // Control flow sets the instruction pointer itself
            Op::Branch(cond) => return self.ins_branch(cond, &instruction),
            Op::Call => return self.ins_call(&instruction),
            Op::Ret => {
                self.ins_ret();
                return Ok(());
            }
        }

        self.ip += 1;
        Ok(())
    }

    pub fn registers(&self) -> &[i64; NUM_REGISTERS] {
        &self.registers
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn memory(&self) -> &Memory {
        &*self.memory
    }

    pub fn call_depth(&self) -> usize {
        self.frame_stack.len()
    }

    pub fn had_error(&self) -> bool {
        self.halt == Some(Halt::Error)
    }

    fn finish(&mut self) {
        self.halt = Some(Halt::Finished);
        self.frame_stack.clear();
    }

    fn fail(&mut self, err: RuntimeError) -> RuntimeError {
        debug!("halting at instruction {}: {}", self.ip, err);
        self.halt = Some(Halt::Error);
        self.frame_stack.clear();
        err
    }

    /// Value of an immediate, or the content of a register
    fn value(&self, instruction: &Instruction, operand: &Operand) -> Result<i64, RuntimeError> {
        match operand {
            Operand::Imm(value) => Ok(*value),
            Operand::Reg(_) => Ok(self.registers[self.register(instruction, operand)?]),
            _ => Err(RuntimeError::Malformed(instruction.to_string())),
        }
    }

    fn register(&self, instruction: &Instruction, operand: &Operand) -> Result<usize, RuntimeError> {
        match operand {
            Operand::Reg(index) if usize::from(*index) < NUM_REGISTERS => Ok(usize::from(*index)),
            _ => Err(RuntimeError::Malformed(instruction.to_string())),
        }
    }

    fn address(&self, instruction: &Instruction, operand: &Operand) -> Result<usize, RuntimeError> {
        let address = self.value(instruction, operand)?;
        usize::try_from(address).map_err(|_| RuntimeError::InvalidAddress(address))
    }

    /// Width of a memory access. It is always an immediate.
    fn width(&self, instruction: &Instruction, operand: &Operand) -> Result<usize, RuntimeError> {
        match operand {
            Operand::Imm(width @ (1 | 2 | 4 | 8)) => Ok(*width as usize),
            Operand::Imm(width) => Err(RuntimeError::InvalidWidth(*width)),
            _ => Err(RuntimeError::Malformed(instruction.to_string())),
        }
    }

    fn text<'i>(&self, instruction: &'i Instruction) -> Result<&'i str, RuntimeError> {
        match &instruction.a {
            Operand::Str(s) => Ok(s.as_str()),
            _ => Err(RuntimeError::Malformed(instruction.to_string())),
        }
    }

    /// Arithmetic and bitwise instructions: `dest = f(a, b)`
    fn ins_alu(
        &mut self,
        instruction: &Instruction,
        f: impl Fn(i64, i64) -> i64,
    ) -> Result<(), RuntimeError> {
        let dest = self.register(instruction, &instruction.dest)?;
        let lhs = self.value(instruction, &instruction.a)?;
        let rhs = self.value(instruction, &instruction.b)?;
        self.registers[dest] = f(lhs, rhs);
        Ok(())
    }

    fn ins_mov(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let dest = self.register(instruction, &instruction.dest)?;
        self.registers[dest] = self.value(instruction, &instruction.a)?;
        Ok(())
    }

    /// Compare two numbers, signed or unsigned
    fn ins_cmp(&mut self, instruction: &Instruction, unsigned: bool) -> Result<(), RuntimeError> {
        let lhs = self.value(instruction, &instruction.a)?;
        let rhs = self.value(instruction, &instruction.b)?;

        let ordering = if unsigned {
            (lhs as u64).cmp(&(rhs as u64))
        } else {
            lhs.cmp(&rhs)
        };

        self.flags = Flags {
            greater: ordering.is_gt(),
            less: ordering.is_lt(),
            equal: ordering.is_eq(),
        };
        Ok(())
    }

    fn ins_load(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let dest = self.register(instruction, &instruction.dest)?;
        let width = self.width(instruction, &instruction.a)?;
        let address = self.address(instruction, &instruction.b)?;

        self.registers[dest] = self.memory.load(address, width)? as i64;
        Ok(())
    }

    fn ins_store(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let width = self.width(instruction, &instruction.dest)?;
        let value = self.value(instruction, &instruction.a)?;
        let address = self.address(instruction, &instruction.b)?;

        self.memory.store(address, width, value as u64)?;
        Ok(())
    }

    /// Copy a string and its terminating zero into memory, one byte at a time. Nothing is
    /// written unless every byte fits.
    fn ins_put(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let text = self.text(instruction)?;
        let address = self.address(instruction, &instruction.b)?;

        let last = address
            .checked_add(text.len())
            .ok_or(RuntimeError::InvalidAddress(i64::MAX))?;
        // The terminating zero lands on `last`
        self.memory.load_byte(last)?;

        for (offset, byte) in (address..).zip(text.bytes().chain(std::iter::once(0))) {
            self.memory.store_byte(offset, byte)?;
        }
        Ok(())
    }

    fn ins_print<W: Write + ?Sized>(&mut self, instruction: &Instruction, out: &mut W) -> Result<(), RuntimeError> {
        let base = self.text(instruction)?;
        let value = self.value(instruction, &instruction.b)?;

        match base {
            "d" => writeln!(out, "{}", value)?,
            "x" => writeln!(out, "0x{:x}", value as u64)?,
            "b" => writeln!(out, "0b{:b}", value as u64)?,
            "s" => {
                let address = self.address(instruction, &instruction.b)?;
                out.write_all(&self.read_str(address)?)?;
                writeln!(out)?
            }
            base => return Err(RuntimeError::UnknownBase(base.to_string())),
        }
        Ok(())
    }

    /// Read bytes up to the first zero, or `MAX_PRINT_LEN` bytes. They are printed as is.
    fn read_str(&self, address: usize) -> Result<Vec<u8>, RuntimeError> {
        let mut bytes = Vec::new();
        for i in 0..MAX_PRINT_LEN {
            let offset = address.checked_add(i).ok_or(RuntimeError::InvalidAddress(i64::MAX))?;
            match self.memory.load_byte(offset)? {
                0 => break,
                byte => bytes.push(byte),
            }
        }
        Ok(bytes)
    }

    /// Jump if the condition holds. Reaching a halt label that was never defined ends the
    /// program.
    fn ins_branch(&mut self, cond: Condition, instruction: &Instruction) -> Result<(), RuntimeError> {
        if !self.flags.holds(cond) {
            self.ip += 1;
            return Ok(());
        }

        if let Some(target) = instruction.target {
            self.ip = target;
            return Ok(());
        }

        let name = instruction.label().unwrap_or_default();
        if is_halt_label(name) {
            debug!("reached halt label '{}'", name);
            self.finish();
            Ok(())
        } else {
            Err(RuntimeError::UnresolvedLabel(name.to_string()))
        }
    }

    /// Save x1 to x31 and the return address, then jump
    fn ins_call(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let target = match instruction.target {
            Some(target) => target,
            None => {
                let name = instruction.label().unwrap_or_default();
                return Err(RuntimeError::UnresolvedLabel(name.to_string()));
            }
        };

        let mut saved = [0; NUM_REGISTERS - 1];
        saved.copy_from_slice(&self.registers[1..]);

        // ip + 1: not to call a function forever
        self.frame_stack.push(StackFrame {
            saved,
            ret_addr: self.ip + 1,
        });
        self.ip = target;
        Ok(())
    }

    /// Restore x1 to x31 and return. Returning with no caller ends the program.
    fn ins_ret(&mut self) {
        match self.frame_stack.pop() {
            Some(stack_frame) => {
                self.registers[1..].copy_from_slice(&stack_frame.saved);
                self.ip = stack_frame.ret_addr;
            }
            None => {
                debug!("returned from the top level");
                self.finish();
            }
        }
    }
}

/// Shifts by 64 or more, or by a negative amount, move every bit out.
fn shift_amount(rhs: i64) -> Option<u32> {
    u32::try_from(rhs).ok().filter(|&amount| amount < 64)
}

fn shift_left(lhs: i64, rhs: i64) -> i64 {
    shift_amount(rhs).map_or(0, |amount| lhs << amount)
}

fn logical_shift_right(lhs: i64, rhs: i64) -> i64 {
    shift_amount(rhs).map_or(0, |amount| ((lhs as u64) >> amount) as i64)
}

fn arithmetic_shift_right(lhs: i64, rhs: i64) -> i64 {
    lhs >> shift_amount(rhs).unwrap_or(63)
}

/// Final machine state: error flag, compare flags and every register.
impl fmt::Display for Vm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.had_error() as u8)?;
        writeln!(f, "Flags:")?;
        writeln!(f, "Is greater: {}", self.flags.greater as u8)?;
        writeln!(f, "Is equal: {}", self.flags.equal as u8)?;
        writeln!(f, "Is less: {}", self.flags.less as u8)?;
        writeln!(f)?;

        writeln!(f, "Variable values:")?;
        for (i, value) in self.registers.iter().enumerate() {
            write!(f, "x{}: {}", i, value)?;
            if i < NUM_REGISTERS - 1 {
                write!(f, ", ")?;
            }
            if (i + 1) % 8 == 0 {
                writeln!(f)?;
            }
        }
        writeln!(f)
    }
}
