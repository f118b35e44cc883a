//! Bytecode representation

use log::debug;
use std::{collections::HashMap, fmt};
use thiserror::Error;

use crate::{
    labels::{is_halt_label, LabelTable, Target},
    lexer::Lexer,
    token::{Op, Token, TokenKind},
};

pub const NUM_REGISTERS: usize = 32;

static NO_OPERAND: Operand = Operand::None;

/// Representation of bytecode
#[derive(Debug, Default)]
pub struct Bytecode {
    /// Array of instructions in program order. The instruction after `i` is `i + 1`.
    pub instructions: Vec<Instruction>,
    /// Maps label names to instruction indices
    pub labels: LabelTable,
}

/// A single operand slot of an instruction
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Operand {
    None,
    /// Literal number
    Imm(i64),
    /// Register index, `x0` to `x31`
    Reg(u8),
    /// String for `put`, base for `print` and label for `b*`/`call`
    Str(String),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub dest: Operand,
    pub a: Operand,
    pub b: Operand,
    /// Index of the branch/call target once linked
    pub target: Option<usize>,
}

impl Instruction {
    pub fn new(op: Op, dest: Operand, a: Operand, b: Operand) -> Self {
        Instruction {
            op,
            dest,
            a,
            b,
            target: None,
        }
    }

    /// Name of the label a branch or call jumps to
    pub fn label(&self) -> Option<&str> {
        match (self.op, &self.a) {
            (Op::Branch(_) | Op::Call, Operand::Str(name)) => Some(name.as_str()),
            _ => None,
        }
    }
}

/// Labels that are still unresolved after linking.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("unresolved label(s): {}", .0.join(", "))]
pub struct LinkError(pub Vec<String>);

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the target of every branch and call.
    ///
    /// Every label that stays unresolved is reported at once, except for branches to labels
    /// starting with [`crate::labels::HALT_LABEL_PREFIX`]: those halt the program.
    pub fn link(&mut self) -> Result<(), LinkError> {
        let mut unresolved: Vec<String> = Vec::new();

        for instruction in self.instructions.iter_mut() {
            let (target, missing) = match instruction.label() {
                Some(name) => {
                    let target = match self.labels.get(name) {
                        Some(Target::Resolved(index)) => Some(index),
                        _ => None,
                    };
                    let halts = matches!(instruction.op, Op::Branch(_)) && is_halt_label(name);
                    (target, (target.is_none() && !halts).then(|| name.to_string()))
                }
                None => continue,
            };

            instruction.target = target;
            if let Some(name) = missing {
                if !unresolved.contains(&name) {
                    unresolved.push(name);
                }
            }
        }

        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(LinkError(unresolved))
        }
    }
}

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ParseErrorKind {
    #[error("{0}")]
    Lex(&'static str),
    #[error("expected an instruction or a label")]
    ExpectedInstruction,
    #[error("expected a register x0 to x31")]
    ExpectedRegister,
    #[error("expected an immediate")]
    ExpectedImmediate,
    #[error("expected a register or an immediate")]
    ExpectedOperand,
    #[error("expected a string literal")]
    ExpectedString,
    #[error("expected a label")]
    ExpectedLabel,
    #[error("expected a print base: d, x, b or s")]
    ExpectedBase,
    #[error("malformed number")]
    InvalidNumber,
    #[error("expected end of statement")]
    ExpectedEndOfStatement,
}

/// A parse error and the token it was found at
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("line {line}, column {column} at '{lexeme}': {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: u32,
    pub column: u32,
    pub lexeme: String,
}

/// Parsing stopped at the first error. `partial` holds whatever was built before it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ParseFailure {
    pub error: ParseError,
    pub partial: Bytecode,
}

macro_rules! impl_parse_fn {
    // Operands are read in source order: destination, then a, then b.
    ($fn_name:ident; $dest:ident, $a:ident, $b:ident) => {
        fn $fn_name(&mut self, op: Op) -> ParseRes {
            let dest = self.$dest()?;
            let a = self.$a()?;
            let b = self.$b()?;
            Ok(Instruction::new(op, dest, a, b))
        }
    };
}

type ParseRes = Result<Instruction, ParseErrorKind>;
type OperandRes = Result<Operand, ParseErrorKind>;
type ParseFn<'a> = fn(&mut Parser<'a>, Op) -> ParseRes;

/// Parser to generate bytecode from text
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token<'a>,
    next: Token<'a>,
    parse_fns: HashMap<Op, ParseFn<'a>>,
    bytecode: Bytecode,
    /// Labels waiting for the next instruction
    pending_labels: Vec<&'a str>,
}

impl<'a> Parser<'a> {
    /// Initialize the parser and prepare the parser functions
    ///
    /// * `program` program to parse
    pub fn new(program: &'a str) -> Self {
        let mut parse_fns: HashMap<Op, ParseFn> = HashMap::new();
        for op in [Op::Add, Op::Sub, Op::Asr, Op::Lsl, Op::Lsr] {
            parse_fns.insert(op, Self::parse_arith);
        }
        for op in [Op::And, Op::Eor, Op::Orr] {
            parse_fns.insert(op, Self::parse_bitwise);
        }
        for op in [Op::Cmp, Op::CmpU] {
            parse_fns.insert(op, Self::parse_cmp);
        }
        parse_fns.insert(Op::Mov, Self::parse_mov);
        parse_fns.insert(Op::Load, Self::parse_load);
        parse_fns.insert(Op::Store, Self::parse_store);
        parse_fns.insert(Op::Put, Self::parse_put);
        parse_fns.insert(Op::Print, Self::parse_print);
        parse_fns.insert(Op::Call, Self::parse_jump);
        parse_fns.insert(Op::Ret, Self::parse_ret);

        let mut lexer = Lexer::new(program);
        let current = lexer.next_token();
        let next = lexer.next_token();

        Parser {
            lexer,
            current,
            next,
            parse_fns,
            bytecode: Bytecode::new(),
            pending_labels: Vec::new(),
        }
    }

    /// Parse `program` and generate a `Bytecode`. Branch and call targets are linked where
    /// possible; unresolved labels are left for the interpreter to report.
    pub fn parse(mut self) -> Result<Bytecode, ParseFailure> {
        loop {
            while self.current.kind == TokenKind::Newline {
                self.advance();
            }

            let kind = self.current.kind;
            match kind {
                TokenKind::Eof => break,
                TokenKind::Ident if self.next.kind == TokenKind::Colon => {
                    // Eg. "loop:"
                    let name = self.advance().lexeme;
                    self.advance();
                    self.pending_labels.push(name);
                }
                TokenKind::Instruction(op) => {
                    self.advance();
                    let parse_fn = self.parse_fn(op);
                    let instruction = match parse_fn(&mut self, op) {
                        Ok(instruction) => instruction,
                        Err(kind) => return Err(self.fail(kind)),
                    };

                    // This instruction is finished so we expect the end of the statement
                    if !self.current.is_end_of_statement() {
                        return Err(self.fail(ParseErrorKind::ExpectedEndOfStatement));
                    }
                    self.advance();

                    self.push(instruction);
                }
                TokenKind::Error(msg) => return Err(self.fail(ParseErrorKind::Lex(msg))),
                _ => return Err(self.fail(ParseErrorKind::ExpectedInstruction)),
            }
        }

        // Labels at the very end of the input have nothing to point to
        for name in self.pending_labels.drain(..) {
            debug!("label '{}' has no instruction after it", name);
            self.bytecode.labels.put(name, Target::Unresolved);
        }

        if let Err(err) = self.bytecode.link() {
            debug!("after parsing: {}", err);
        }

        Ok(self.bytecode)
    }

    fn parse_fn(&self, op: Op) -> ParseFn<'a> {
        match op {
            Op::Branch(_) => Self::parse_jump,
            op => self.parse_fns[&op],
        }
    }

    fn push(&mut self, instruction: Instruction) {
        let index = self.bytecode.instructions.len();
        for name in self.pending_labels.drain(..) {
            debug!("label '{}' bound to instruction {}", name, index);
            self.bytecode.labels.put(name, Target::Resolved(index));
        }
        self.bytecode.instructions.push(instruction);
    }

    fn fail(self, kind: ParseErrorKind) -> ParseFailure {
        let token = self.current;
        ParseFailure {
            error: ParseError {
                kind,
                line: token.line,
                column: token.column,
                lexeme: token.lexeme.to_string(),
            },
            partial: self.bytecode,
        }
    }

    fn advance(&mut self) -> Token<'a> {
        let token = self.current;
        if token.kind != TokenKind::Eof {
            self.current = self.next;
            self.next = self.lexer.next_token();
        }
        token
    }

    /// A lexer error takes precedence over the shape we were hoping for.
    fn expected(&self, kind: ParseErrorKind) -> ParseErrorKind {
        match self.current.kind {
            TokenKind::Error(msg) => ParseErrorKind::Lex(msg),
            _ => kind,
        }
    }

    fn register(&mut self) -> OperandRes {
        if self.current.kind != TokenKind::Ident {
            return Err(self.expected(ParseErrorKind::ExpectedRegister));
        }
        let index = parse_register(self.current.lexeme).ok_or(ParseErrorKind::ExpectedRegister)?;
        self.advance();
        Ok(Operand::Reg(index))
    }

    fn immediate(&mut self) -> OperandRes {
        if self.current.kind != TokenKind::Number {
            return Err(self.expected(ParseErrorKind::ExpectedImmediate));
        }
        let value = parse_number(self.current.lexeme).ok_or(ParseErrorKind::InvalidNumber)?;
        self.advance();
        Ok(Operand::Imm(value))
    }

    fn reg_or_imm(&mut self) -> OperandRes {
        match self.current.kind {
            TokenKind::Ident => self.register(),
            TokenKind::Number => self.immediate(),
            _ => Err(self.expected(ParseErrorKind::ExpectedOperand)),
        }
    }

    fn string(&mut self) -> OperandRes {
        if self.current.kind != TokenKind::StringLiteral {
            return Err(self.expected(ParseErrorKind::ExpectedString));
        }
        Ok(Operand::Str(self.advance().lexeme.to_string()))
    }

    /// Label reference of a branch or call. Unknown labels get a placeholder so that they can
    /// be defined later in the program.
    fn label(&mut self) -> OperandRes {
        if self.current.kind != TokenKind::Ident {
            return Err(self.expected(ParseErrorKind::ExpectedLabel));
        }
        let name = self.advance().lexeme;
        if self.bytecode.labels.get(name).is_none() {
            self.bytecode.labels.put(name, Target::Unresolved);
        }
        Ok(Operand::Str(name.to_string()))
    }

    /// `b` is lexed as the branch mnemonic, so the lexeme decides here and not the kind.
    fn base(&mut self) -> OperandRes {
        let is_word = matches!(
            self.current.kind,
            TokenKind::Ident | TokenKind::Instruction(_)
        );
        if !is_word || !matches!(self.current.lexeme, "d" | "x" | "b" | "s") {
            return Err(self.expected(ParseErrorKind::ExpectedBase));
        }
        Ok(Operand::Str(self.advance().lexeme.to_string()))
    }

    fn none(&mut self) -> OperandRes {
        Ok(Operand::None)
    }

    // For instructions whose operands appear in destination, a, b order, the generated
    // function reads each operand with the given shape and fails on the first mismatch.
    impl_parse_fn! {parse_arith; register, register, reg_or_imm}
    impl_parse_fn! {parse_bitwise; register, register, register}
    impl_parse_fn! {parse_mov; register, immediate, none}
    impl_parse_fn! {parse_cmp; none, register, reg_or_imm}
    impl_parse_fn! {parse_load; register, immediate, reg_or_imm}
    impl_parse_fn! {parse_put; none, string, reg_or_imm}
    impl_parse_fn! {parse_jump; none, label, none}
    impl_parse_fn! {parse_ret; none, none, none}

    /// `store value address width`
    fn parse_store(&mut self, op: Op) -> ParseRes {
        let value = self.reg_or_imm()?;
        let address = self.reg_or_imm()?;
        let width = self.immediate()?;
        Ok(Instruction::new(op, width, value, address))
    }

    /// `print value base`
    fn parse_print(&mut self, op: Op) -> ParseRes {
        let value = self.reg_or_imm()?;
        let base = self.base()?;
        Ok(Instruction::new(op, Operand::None, base, value))
    }
}

/// Parse `x0` to `x31`
pub fn parse_register(lexeme: &str) -> Option<u8> {
    let digits = lexeme.strip_prefix('x')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: u8 = digits.parse().ok()?;
    (usize::from(index) < NUM_REGISTERS).then(|| index)
}

/// Parse a decimal, `0x` hex or `0b` binary literal. Values that do not fit saturate to
/// `i64::MAX`.
pub fn parse_number(lexeme: &str) -> Option<i64> {
    let (digits, radix) = match lexeme.get(..2) {
        Some("0x") => (&lexeme[2..], 16),
        Some("0b") => (&lexeme[2..], 2),
        _ => (lexeme, 10),
    };
    if digits.is_empty() {
        return None;
    }

    digits.chars().try_fold(0i64, |acc, ch| {
        let digit = ch.to_digit(radix)?;
        Some(
            acc.checked_mul(radix as i64)
                .and_then(|acc| acc.checked_add(digit as i64))
                .unwrap_or(i64::MAX),
        )
    })
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Imm(value) => write!(f, "{}", value),
            Operand::Reg(index) => write!(f, "x{}", index),
            Operand::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Renders the instruction the way it is written in source.
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.mnemonic())?;

        let operands = match self.op {
            Op::Store => [&self.a, &self.b, &self.dest],
            Op::Print => [&self.b, &self.a, &NO_OPERAND],
            _ => [&self.dest, &self.a, &self.b],
        };
        for operand in operands {
            match operand {
                Operand::None => {}
                Operand::Str(s) if self.op == Op::Put => write!(f, " \"{}\"", s)?,
                operand => write!(f, " {}", operand)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instructions.is_empty() {
            writeln!(f, "No commands found.")?;
        }
        for (index, instruction) in self.instructions.iter().enumerate() {
            write!(f, "{:>4}: {}", index, instruction)?;
            if let Some(target) = instruction.target {
                write!(f, " -> {}", target)?;
            }
            writeln!(f)?;
        }

        if !self.labels.is_empty() {
            writeln!(f, "Labels:")?;
            for (name, target) in self.labels.iter() {
                match target {
                    Target::Resolved(index) => writeln!(f, "    {}: {}", name, index)?,
                    Target::Unresolved => writeln!(f, "    {}: unresolved", name)?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Condition;

    fn parse(program: &str) -> Bytecode {
        Parser::new(program).parse().unwrap()
    }

    fn parse_err(program: &str) -> ParseFailure {
        Parser::new(program).parse().unwrap_err()
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number("0"), Some(0));
        assert_eq!(parse_number("12345"), Some(12345));
        assert_eq!(parse_number("0xdeadBEEF"), Some(0xdead_beef));
        assert_eq!(parse_number("0b1011"), Some(0b1011));
        assert_eq!(parse_number("9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_number("0x"), None);
        assert_eq!(parse_number("12a"), None);
    }

    #[test]
    fn numbers_saturate() {
        assert_eq!(parse_number("9223372036854775808"), Some(i64::MAX));
        assert_eq!(parse_number("99999999999999999999999"), Some(i64::MAX));
        assert_eq!(parse_number("0xffffffffffffffff"), Some(i64::MAX));
        assert_eq!(parse_number(&format!("0b{}", "1".repeat(70))), Some(i64::MAX));
    }

    #[test]
    fn registers() {
        assert_eq!(parse_register("x0"), Some(0));
        assert_eq!(parse_register("x31"), Some(31));
        assert_eq!(parse_register("x32"), None);
        assert_eq!(parse_register("x"), None);
        assert_eq!(parse_register("x1a"), None);
        assert_eq!(parse_register("y1"), None);
        assert_eq!(parse_register("x999"), None);
    }

    #[test]
    fn arithmetic_shapes() {
        let bytecode = parse("add x2 x0 x1\nsub x3, x3, 0x10\nlsr x1 x2 3");
        assert_eq!(
            bytecode.instructions,
            vec![
                Instruction::new(Op::Add, Operand::Reg(2), Operand::Reg(0), Operand::Reg(1)),
                Instruction::new(Op::Sub, Operand::Reg(3), Operand::Reg(3), Operand::Imm(16)),
                Instruction::new(Op::Lsr, Operand::Reg(1), Operand::Reg(2), Operand::Imm(3)),
            ]
        );
    }

    #[test]
    fn bitwise_rejects_immediates() {
        let failure = parse_err("and x0 x1 5");
        assert_eq!(failure.error.kind, ParseErrorKind::ExpectedRegister);
        assert_eq!(failure.error.lexeme, "5");
        assert!(failure.partial.instructions.is_empty());
    }

    #[test]
    fn store_and_print_operand_order() {
        let bytecode = parse("store x1 100 4\nprint x2 b\nload x0 8 x1");
        let store = &bytecode.instructions[0];
        assert_eq!(store.dest, Operand::Imm(4));
        assert_eq!(store.a, Operand::Reg(1));
        assert_eq!(store.b, Operand::Imm(100));

        let print = &bytecode.instructions[1];
        assert_eq!(print.a, Operand::Str("b".to_string()));
        assert_eq!(print.b, Operand::Reg(2));

        assert_eq!(bytecode.instructions[2].a, Operand::Imm(8));
    }

    #[test]
    fn store_width_must_be_immediate() {
        let failure = parse_err("store x1 100 x2");
        assert_eq!(failure.error.kind, ParseErrorKind::ExpectedImmediate);
    }

    #[test]
    fn print_base_is_checked() {
        let failure = parse_err("print x0 q");
        assert_eq!(failure.error.kind, ParseErrorKind::ExpectedBase);
        assert_eq!(failure.error.line, 1);
        assert_eq!(failure.error.column, 10);
    }

    #[test]
    fn put_takes_a_string() {
        let bytecode = parse("put \"hello\" x4");
        assert_eq!(bytecode.instructions[0].a, Operand::Str("hello".to_string()));
        assert_eq!(bytecode.instructions[0].b, Operand::Reg(4));
        assert_eq!(parse_err("put 5 x4").error.kind, ParseErrorKind::ExpectedString);
    }

    #[test]
    fn error_keeps_partial_bytecode() {
        let failure = parse_err("mov x0 1\nmov x1 2\nmov x2 x3\nmov x4 5");
        assert_eq!(failure.partial.instructions.len(), 2);
        assert_eq!(failure.error.kind, ParseErrorKind::ExpectedImmediate);
        assert_eq!(failure.error.line, 3);
        assert_eq!(failure.error.lexeme, "x3");
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let failure = parse_err("ret x0");
        assert_eq!(failure.error.kind, ParseErrorKind::ExpectedEndOfStatement);
    }

    #[test]
    fn lexer_errors_abort() {
        assert_eq!(
            parse_err("mov x0 0x").error.kind,
            ParseErrorKind::Lex("Either no or invalid digit in the specified base")
        );
        assert_eq!(
            parse_err("ret\n@").error.kind,
            ParseErrorKind::Lex("Unexpected character")
        );
    }

    #[test]
    fn labels_bind_to_next_instruction() {
        let bytecode = parse("start:\n\nmov x0 1\nloop: first: sub x0 x0 1; b.ne loop\n");
        assert_eq!(bytecode.labels.get("start"), Some(Target::Resolved(0)));
        assert_eq!(bytecode.labels.get("loop"), Some(Target::Resolved(1)));
        assert_eq!(bytecode.labels.get("first"), Some(Target::Resolved(1)));
        assert_eq!(
            bytecode.instructions[2].op,
            Op::Branch(Condition::NotEqual)
        );
        assert_eq!(bytecode.instructions[2].target, Some(1));
    }

    #[test]
    fn forward_references_are_resolved() {
        let bytecode = parse("call func\nret\nfunc: mov x0 1\nret");
        assert_eq!(bytecode.labels.get("func"), Some(Target::Resolved(2)));
        assert_eq!(bytecode.instructions[0].target, Some(2));
    }

    #[test]
    fn label_at_end_of_input() {
        let mut bytecode = parse("cmp x0 x0\nb.eq .end\nprint x0 d\n.end:\n");
        assert_eq!(bytecode.labels.get(".end"), Some(Target::Unresolved));
        assert_eq!(bytecode.instructions[1].target, None);
        assert!(bytecode.link().is_ok());

        let bytecode = parse("only:");
        assert!(bytecode.instructions.is_empty());
        assert_eq!(bytecode.labels.get("only"), Some(Target::Unresolved));
    }

    #[test]
    fn link_reports_every_unresolved_label() {
        let mut bytecode = parse("b.eq missing\ncall .gone\nb other\nb missing\nb .fine");
        assert_eq!(
            bytecode.link(),
            Err(LinkError(vec![
                "missing".to_string(),
                ".gone".to_string(),
                "other".to_string(),
            ]))
        );
    }

    #[test]
    fn display_round_trips_source() {
        let program = "add x2 x0 x1\ncmp_u x1 7\nstore x1 100 4\nput \"hi\" 0\nprint x2 x\nb.le top\nret";
        let bytecode = parse(program);
        let rendered: Vec<_> = bytecode.instructions.iter().map(|i| i.to_string()).collect();
        assert_eq!(rendered.join("\n"), program);
    }
}
