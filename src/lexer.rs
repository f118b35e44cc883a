use super::token::{Token, TokenKind};

const BAD_BASE_MSG: &str = "Either no or invalid digit in the specified base";
const UNEXPECTED_CHAR_MSG: &str = "Unexpected character";

/// Pull-based tokenizer. Once `Eof` is reached every further call returns `Eof` again.
pub struct Lexer<'a> {
    program: &'a str,
    cursor: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(program: &'a str) -> Self {
        Lexer {
            program,
            cursor: 0,
            line: 1,
            column: 1,
        }
    }

    /// Get the next token. This consumes the tokens.
    pub fn next_token(&mut self) -> Token<'a> {
        self.trim();

        let start = self.cursor;
        let (line, column) = (self.line, self.column);

        let ch = match self.next_char(false) {
            Some(ch) => ch,
            None => return Token::new(TokenKind::Eof, "", line, column),
        };

        match ch {
            b'\n' => {
                let token = self.make(TokenKind::Newline, start, line, column);
                self.line += 1;
                self.column = 1;
                token
            }
            b';' => self.make(TokenKind::Newline, start, line, column),
            b':' => self.make(TokenKind::Colon, start, line, column),
            b'"' => self.read_str_literal(line, column),
            ch if ch.is_ascii_digit() => self.read_number(ch, start, line, column),
            ch if is_ident_start(ch) => self.read_token(start, line, column),
            _ => {
                // Step over the whole character so the next slice stays on a char boundary
                let extra = self.program[start..]
                    .chars()
                    .next()
                    .map_or(1, char::len_utf8)
                    - 1;
                self.cursor += extra;
                self.make(TokenKind::Error(UNEXPECTED_CHAR_MSG), start, line, column)
            }
        }
    }

    /// Trim spaces, tabs, commas, carriage returns and `//` comments
    fn trim(&mut self) {
        while let Some(ch) = self.next_char(true) {
            match ch {
                b' ' | b'\t' | b',' | b'\r' => {
                    self.next_char(false);
                }
                b'/' if self.program.as_bytes().get(self.cursor + 1) == Some(&b'/') => {
                    self.eat_while(|ch| ch != b'\n');
                }
                _ => break,
            }
        }
    }

    /// Read a decimal, `0x` hex or `0b` binary number
    fn read_number(&mut self, first: u8, start: usize, line: u32, column: u32) -> Token<'a> {
        if first == b'0' {
            match self.next_char(true) {
                Some(b'x') => return self.read_prefixed(start, line, column, |ch| ch.is_ascii_hexdigit()),
                Some(b'b') => return self.read_prefixed(start, line, column, |ch| ch == b'0' || ch == b'1'),
                _ => {}
            }
        }

        self.eat_while(|ch| ch.is_ascii_digit());
        self.make(TokenKind::Number, start, line, column)
    }

    fn read_prefixed(
        &mut self,
        start: usize,
        line: u32,
        column: u32,
        is_digit: fn(u8) -> bool,
    ) -> Token<'a> {
        // The base letter
        self.next_char(false);

        if !self.next_char(true).map_or(false, is_digit) {
            return self.make(TokenKind::Error(BAD_BASE_MSG), start, line, column);
        }

        self.eat_while(is_digit);
        self.make(TokenKind::Number, start, line, column)
    }

    /// Read a string literal that starts with '"'. It runs until the next '"' or the end of
    /// input and keeps no escapes.
    fn read_str_literal(&mut self, line: u32, column: u32) -> Token<'a> {
        let content_start = self.cursor;
        while let Some(ch) = self.next_char(true) {
            if ch == b'"' {
                break;
            }
            self.next_char(false);
            if ch == b'\n' {
                self.line += 1;
                self.column = 1;
            }
        }

        let literal = &self.program[content_start..self.cursor];
        // Closing quote, if there is one
        self.next_char(false);

        Token::new(TokenKind::StringLiteral, literal, line, column)
    }

    /// Read an identifier or a keyword
    fn read_token(&mut self, start: usize, line: u32, column: u32) -> Token<'a> {
        self.eat_while(|ch| is_ident_start(ch) || ch.is_ascii_digit());
        Token::word(&self.program[start..self.cursor], line, column)
    }

    fn eat_while(&mut self, pred: impl Fn(u8) -> bool) {
        while let Some(ch) = self.next_char(true) {
            if !pred(ch) {
                break;
            }
            self.next_char(false);
        }
    }

    fn make(&self, kind: TokenKind, start: usize, line: u32, column: u32) -> Token<'a> {
        Token::new(kind, &self.program[start..self.cursor], line, column)
    }

    /// Get the next char and increase the cursor if `peek` is false
    fn next_char(&mut self, peek: bool) -> Option<u8> {
        let ch = *self.program.as_bytes().get(self.cursor)?;
        if !peek {
            self.cursor += 1;
            self.column += 1;
        }
        Some(ch)
    }
}

/// Yields every token up to, but not including, `Eof`.
impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.next_token();
        match token.kind {
            TokenKind::Eof => None,
            _ => Some(token),
        }
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_' || ch == b'.'
}
