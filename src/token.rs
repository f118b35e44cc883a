use std::fmt;

/// Condition checked by a branch against the flags of the last compare.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Condition {
    Always,
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
}

impl Condition {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Condition::Always => "b",
            Condition::Equal => "b.eq",
            Condition::NotEqual => "b.ne",
            Condition::Greater => "b.gt",
            Condition::Less => "b.lt",
            Condition::GreaterEqual => "b.ge",
            Condition::LessEqual => "b.le",
        }
    }
}

/// Reserved mnemonics of the language
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Op {
    Add,
    Sub,
    And,
    Eor,
    Orr,
    Asr,
    Lsl,
    Lsr,
    Mov,
    Cmp,
    CmpU,
    Load,
    Store,
    Put,
    Print,
    Branch(Condition),
    Call,
    Ret,
}

impl Op {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::And => "and",
            Op::Eor => "eor",
            Op::Orr => "orr",
            Op::Asr => "asr",
            Op::Lsl => "lsl",
            Op::Lsr => "lsr",
            Op::Mov => "mov",
            Op::Cmp => "cmp",
            Op::CmpU => "cmp_u",
            Op::Load => "load",
            Op::Store => "store",
            Op::Put => "put",
            Op::Print => "print",
            Op::Branch(cond) => cond.mnemonic(),
            Op::Call => "call",
            Op::Ret => "ret",
        }
    }

    /// Looks a word up in the keyword table.
    pub fn from_keyword(word: &str) -> Option<Self> {
        let op = match word {
            "add" => Op::Add,
            "and" => Op::And,
            "asr" => Op::Asr,
            "b" => Op::Branch(Condition::Always),
            "b.eq" => Op::Branch(Condition::Equal),
            "b.ge" => Op::Branch(Condition::GreaterEqual),
            "b.gt" => Op::Branch(Condition::Greater),
            "b.le" => Op::Branch(Condition::LessEqual),
            "b.lt" => Op::Branch(Condition::Less),
            "b.ne" => Op::Branch(Condition::NotEqual),
            "call" => Op::Call,
            "cmp" => Op::Cmp,
            "cmp_u" => Op::CmpU,
            "eor" => Op::Eor,
            "load" => Op::Load,
            "lsl" => Op::Lsl,
            "lsr" => Op::Lsr,
            "mov" => Op::Mov,
            "orr" => Op::Orr,
            "print" => Op::Print,
            "put" => Op::Put,
            "ret" => Op::Ret,
            "store" => Op::Store,
            "sub" => Op::Sub,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TokenKind {
    Instruction(Op),

    /// End of a statement, either `\n` or `;`
    Newline,
    Colon,

    /// Register names and labels
    Ident,
    Number,
    /// String literal without its quotes
    StringLiteral,

    Eof,
    Error(&'static str),
}

/// A token and where it was found in the source.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub line: u32,
    pub column: u32,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind, lexeme: &'a str, line: u32, column: u32) -> Self {
        Token {
            kind,
            lexeme,
            line,
            column,
        }
    }

    /// Classify a scanned word as a keyword or a plain identifier.
    pub fn word(lexeme: &'a str, line: u32, column: u32) -> Self {
        let kind = match Op::from_keyword(lexeme) {
            Some(op) => TokenKind::Instruction(op),
            None => TokenKind::Ident,
        };
        Token::new(kind, lexeme, line, column)
    }

    pub fn is_end_of_statement(&self) -> bool {
        matches!(self.kind, TokenKind::Newline | TokenKind::Eof)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Instruction(op) => write!(f, "Instruction({})", op.mnemonic()),
            TokenKind::Newline => write!(f, "Newline"),
            TokenKind::Colon => write!(f, "Colon"),
            TokenKind::Ident => write!(f, "Ident"),
            TokenKind::Number => write!(f, "Number"),
            TokenKind::StringLiteral => write!(f, "String"),
            TokenKind::Eof => write!(f, "Eof"),
            TokenKind::Error(msg) => write!(f, "Error({})", msg),
        }
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lexeme = match self.kind {
            TokenKind::Newline => "\\n",
            _ => self.lexeme,
        };
        write!(f, "[{}:{}] {} '{}'", self.line, self.column, self.kind, lexeme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords() {
        assert_eq!(Op::from_keyword("cmp_u"), Some(Op::CmpU));
        assert_eq!(
            Op::from_keyword("b.ne"),
            Some(Op::Branch(Condition::NotEqual))
        );
        assert_eq!(Op::from_keyword("b.neq"), None);
        assert_eq!(Op::from_keyword("ADD"), None);
    }

    #[test]
    fn mnemonic_round_trip() {
        let ops = [
            Op::Add,
            Op::Asr,
            Op::CmpU,
            Op::Branch(Condition::LessEqual),
            Op::Ret,
        ];
        for op in ops {
            assert_eq!(Op::from_keyword(op.mnemonic()), Some(op));
        }
    }

    #[test]
    fn display() {
        let token = Token::word("x12", 3, 5);
        assert_eq!(token.to_string(), "[3:5] Ident 'x12'");
        let token = Token::new(TokenKind::Newline, "\n", 1, 9);
        assert_eq!(token.to_string(), "[1:9] Newline '\\n'");
    }
}
