//! `ci` is an interpreter for a small register-machine assembly language.
//!
//! A program is lexed, parsed into an array of instructions and then executed by a machine
//! with 32 signed 64-bit registers, compare flags, a call stack and a flat byte-addressable
//! memory.
//!
//! # Example
//!
//! ```text
//! // Sum 5 + 4 + 3 + 2 + 1
//! mov x0 0
//! mov x1 5
//! loop:
//!     add x0 x0 x1
//!     sub x1 x1 1
//!     cmp x1 0
//!     b.gt loop
//!
//! put "sum:" 0x10
//! print 0x10 s
//! print x0 d
//! ```
//!
//! # Syntax
//!
//! - A statement ends with a newline or `;`.
//! - Commas, spaces and tabs separate operands. `//` starts a comment.
//! - `name:` defines a label pointing to the next instruction. Several labels can point to the
//!   same instruction.
//! - Numbers are decimal, `0x` hex or `0b` binary. Values that do not fit saturate to
//!   `i64::MAX`.
//! - String literals run until the next `"` and have no escapes.
//!
//! # Instructions
//!
//! `xD`, `xA` and `xB` are registers. `B` is a register or an immediate.
//!
//! | Instruction | Usage                   | Brief   |
//! |-------------|-------------------------|---------|
//! | Add         | `add xD xA B`           | `xD = xA + B`, wraps on overflow. |
//! | Sub         | `sub xD xA B`           | `xD = xA - B`, wraps on overflow. |
//! | And         | `and xD xA xB`          | Bitwise and. |
//! | Eor         | `eor xD xA xB`          | Bitwise exclusive or. |
//! | Orr         | `orr xD xA xB`          | Bitwise or. |
//! | Lsl         | `lsl xD xA B`           | Shift left. |
//! | Lsr         | `lsr xD xA B`           | Shift right, filling with zeros. |
//! | Asr         | `asr xD xA B`           | Shift right, filling with the sign bit. |
//! | Mov         | `mov xD imm`            | Load an immediate. |
//! | Cmp         | `cmp xA B`              | Signed compare. Sets the greater, less and equal flags. |
//! | CmpU        | `cmp_u xA B`            | Unsigned compare. |
//! | Load        | `load xD width addr`    | Read `width` (1, 2, 4 or 8) bytes at `addr`, zero-extended. |
//! | Store       | `store value addr width`| Write the low `width` bytes of `value` at `addr`. |
//! | Put         | `put "text" addr`       | Write `text` followed by a zero byte at `addr`. |
//! | Print       | `print value base`      | Print `value` as `d`ecimal, he`x`, `b`inary, or the `s`tring at address `value`. |
//! | Branch      | `b label`, `b.eq label` | Jump if the condition holds: `eq`, `ne`, `gt`, `lt`, `ge`, `le` or always. |
//! | Call        | `call label`            | Save `x1` to `x31` and the return address, then jump. |
//! | Ret         | `ret`                   | Restore `x1` to `x31` and return. `x0` holds the return value. |
//!
//! # Important notes
//!
//! - Memory is little-endian and 1024 bytes unless configured otherwise.
//! - A branch to a label starting with `.` that has no instruction after it ends the program.
//! - `ret` with no caller ends the program, as does running past the last instruction.
//! - Every branch and call target must be defined. Missing labels are reported together before
//!   the program starts.

pub mod bytecode;
pub mod labels;
pub mod lexer;
pub mod memory;
pub mod token;
pub mod vm;
