//! DBC tokenizer
//!
//! Splits raw DBC text into logical lines of typed tokens. A logical line is
//! usually one physical line, but it keeps going while a quoted string is
//! open (multi-line `CM_` comments) or when the physical line ends in a `\`
//! continuation marker.

use crate::types::MalformedTokenError;
use std::fmt;

/// A single lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Keyword or C-style identifier (`BO_`, `EngineSpeed`, `m3M`)
    Identifier(String),
    /// Integer literal, optionally signed
    Integer(i64),
    /// Floating point literal (decimal point, exponent, or too large for i64)
    Float(f64),
    /// Quoted string with escapes resolved
    Str(String),
    /// Any other single character (`:`, `|`, `@`, `;`, ...)
    Symbol(char),
}

impl Token {
    pub fn is_symbol(&self, symbol: char) -> bool {
        matches!(self, Token::Symbol(c) if *c == symbol)
    }

    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Token::Identifier(ident) => Some(ident),
            _ => None,
        }
    }

    /// Integer value, also accepting floats without a fractional part (`20.0`)
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Token::Integer(v) => Some(*v),
            Token::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Token::Integer(v) => Some(*v as f64),
            Token::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(ident) => write!(f, "{}", ident),
            Token::Integer(v) => write!(f, "{}", v),
            Token::Float(v) => write!(f, "{}", v),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Symbol(c) => write!(f, "{}", c),
        }
    }
}

/// One logical line of DBC text
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalLine {
    /// Physical line (1-based) on which the logical line starts
    pub line: usize,
    /// True if the line starts with whitespace
    pub indented: bool,
    /// Leading identifier, stripped from `tokens`
    pub keyword: Option<String>,
    /// Remaining tokens
    pub tokens: Vec<Token>,
}

impl LogicalLine {
    /// True if the last token is `symbol`
    pub fn ends_with(&self, symbol: char) -> bool {
        self.tokens.last().map_or(false, |t| t.is_symbol(symbol))
    }
}

/// Lazy tokenizer over DBC text
pub struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    prev: Option<char>,
    failed: bool,
}

impl<'a> Tokenizer<'a> {
    /// Constructs a new `Tokenizer`
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            prev: None,
            failed: false,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        self.prev = Some(c);
        Some(c)
    }

    /// A `\` followed only by blanks up to the newline joins two physical lines
    fn at_continuation(&self) -> bool {
        self.src[self.pos + 1..]
            .chars()
            .find(|c| !matches!(c, ' ' | '\t' | '\r'))
            .map_or(true, |c| c == '\n')
    }

    fn skip_to_newline(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn starts_number(&self, c: char) -> bool {
        if c.is_ascii_digit() {
            return true;
        }
        let next = self.peek_nth(1);
        let after = self.peek_nth(2);
        let prev_is_operand = self
            .prev
            .map_or(false, |p| p.is_ascii_alphanumeric() || p == '_' || p == '.');
        match c {
            '.' => next.map_or(false, |n| n.is_ascii_digit()),
            // A sign glued to a preceding operand is an operator (`@1+`, `0-3`)
            '+' | '-' if !prev_is_operand => match next {
                Some(n) if n.is_ascii_digit() => true,
                Some('.') => after.map_or(false, |a| a.is_ascii_digit()),
                _ => false,
            },
            _ => false,
        }
    }

    fn lex_number(&mut self) -> Token {
        let start = self.pos;
        let mut is_float = false;

        if matches!(self.peek(), Some('+') | Some('-')) {
            self.bump();
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let exponent = match self.peek_nth(1) {
                Some(c) if c.is_ascii_digit() => true,
                Some('+') | Some('-') => matches!(self.peek_nth(2), Some(c) if c.is_ascii_digit()),
                _ => false,
            };
            if exponent {
                is_float = true;
                self.bump();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.bump();
                }
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }

        let text = &self.src[start..self.pos];
        if !is_float {
            if let Ok(v) = text.parse::<i64>() {
                return Token::Integer(v);
            }
        }
        match text.parse::<f64>() {
            Ok(v) => Token::Float(v),
            Err(_) => Token::Identifier(text.to_string()),
        }
    }

    fn lex_identifier(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        Token::Identifier(self.src[start..self.pos].to_string())
    }

    fn lex_string(&mut self) -> Result<Token, MalformedTokenError> {
        let opened_on = self.line;
        self.bump();
        let mut value = String::new();

        loop {
            match self.bump() {
                None => return Err(MalformedTokenError { line: opened_on }),
                Some('"') => return Ok(Token::Str(value)),
                Some('\\') => match self.bump() {
                    None => return Err(MalformedTokenError { line: opened_on }),
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                },
                Some('\r') => {}
                Some(c) => value.push(c),
            }
        }
    }

    fn next_line(&mut self) -> Result<Option<LogicalLine>, MalformedTokenError> {
        let mut line = self.line;
        let mut indented = false;
        let mut tokens: Vec<Token> = Vec::new();

        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    self.bump();
                    if !tokens.is_empty() {
                        break;
                    }
                    // blank or comment-only line
                    line = self.line;
                    indented = false;
                }
                ' ' | '\t' | '\r' | '\u{feff}' => {
                    self.bump();
                    if tokens.is_empty() && matches!(c, ' ' | '\t') {
                        indented = true;
                    }
                }
                '\\' if self.at_continuation() => {
                    self.skip_to_newline();
                    self.bump();
                }
                '/' if self.peek_nth(1) == Some('/') => self.skip_to_newline(),
                '"' => tokens.push(self.lex_string()?),
                c if self.starts_number(c) => tokens.push(self.lex_number()),
                c if c.is_ascii_alphabetic() || c == '_' => tokens.push(self.lex_identifier()),
                c => {
                    self.bump();
                    tokens.push(Token::Symbol(c));
                }
            }
        }

        if tokens.is_empty() {
            return Ok(None);
        }

        let keyword = match tokens.first() {
            Some(Token::Identifier(_)) => match tokens.remove(0) {
                Token::Identifier(ident) => Some(ident),
                _ => None,
            },
            _ => None,
        };

        Ok(Some(LogicalLine {
            line,
            indented,
            keyword,
            tokens,
        }))
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<LogicalLine, MalformedTokenError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_line() {
            Ok(Some(line)) => Some(Ok(line)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &str) -> Vec<LogicalLine> {
        Tokenizer::new(src).collect::<Result<Vec<_>, _>>().unwrap()
    }

    #[test]
    fn test_signal_line_tokens() {
        let lines = lines(r#" SG_ EngineTemp : 16|8@1+ (1,-40) [-40|215] "C" ECU2"#);
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(line.indented);
        assert_eq!(line.keyword.as_deref(), Some("SG_"));
        assert_eq!(
            line.tokens,
            vec![
                Token::Identifier("EngineTemp".into()),
                Token::Symbol(':'),
                Token::Integer(16),
                Token::Symbol('|'),
                Token::Integer(8),
                Token::Symbol('@'),
                Token::Integer(1),
                Token::Symbol('+'),
                Token::Symbol('('),
                Token::Integer(1),
                Token::Symbol(','),
                Token::Integer(-40),
                Token::Symbol(')'),
                Token::Symbol('['),
                Token::Integer(-40),
                Token::Symbol('|'),
                Token::Integer(215),
                Token::Symbol(']'),
                Token::Str("C".into()),
                Token::Identifier("ECU2".into()),
            ]
        );
    }

    #[test]
    fn test_floats_and_exponents() {
        let lines = lines("X 0.1 1E-005 -3.4E+038 .5 18446744073709551615");
        assert_eq!(
            lines[0].tokens,
            vec![
                Token::Float(0.1),
                Token::Float(1e-5),
                Token::Float(-3.4e38),
                Token::Float(0.5),
                Token::Float(18446744073709551615.0),
            ]
        );
    }

    #[test]
    fn test_ranges_keep_minus_as_symbol() {
        let lines = lines("SG_MUL_VAL_ 100 Sig Mux 0-3, 5-5;");
        assert_eq!(
            &lines[0].tokens[3..],
            &[
                Token::Integer(0),
                Token::Symbol('-'),
                Token::Integer(3),
                Token::Symbol(','),
                Token::Integer(5),
                Token::Symbol('-'),
                Token::Integer(5),
                Token::Symbol(';'),
            ]
        );
    }

    #[test]
    fn test_multiline_string_and_escapes() {
        let src = "CM_ BO_ 100 \"first line\nsay \\\"hi\\\"\";\nBU_: A";
        let lines = lines(src);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line, 1);
        assert_eq!(
            lines[0].tokens[2],
            Token::Str("first line\nsay \"hi\"".to_string())
        );
        assert_eq!(lines[1].line, 3);
        assert_eq!(lines[1].keyword.as_deref(), Some("BU_"));
    }

    #[test]
    fn test_backslash_continuation() {
        let lines = lines("BU_: A B \\\n  C D\nBO_ 1 M: 8 A");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].tokens.len(), 5);
        assert_eq!(lines[1].line, 3);
    }

    #[test]
    fn test_blank_lines_and_comments_are_skipped() {
        let lines = lines("\n\n// generated file\nVERSION \"1.0\" // trailing\n\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line, 4);
        assert_eq!(lines[0].tokens, vec![Token::Str("1.0".into())]);
    }

    #[test]
    fn test_unterminated_string_fails() {
        let mut tokenizer = Tokenizer::new("BU_: A\nCM_ \"never closed\n\n");
        assert!(tokenizer.next().unwrap().is_ok());
        let err = tokenizer.next().unwrap().unwrap_err();
        assert_eq!(err, MalformedTokenError { line: 2 });
        assert!(tokenizer.next().is_none());
    }

    #[test]
    fn test_line_starting_with_number_has_no_keyword() {
        let lines = lines("  1 \"On\" 0 \"Off\";");
        assert_eq!(lines[0].keyword, None);
        assert_eq!(lines[0].tokens.len(), 5);
    }
}
