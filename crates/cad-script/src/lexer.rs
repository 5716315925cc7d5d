use crate::error::ExecutionError;

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
    /// A line break separates this token from the previous one.
    pub newline_before: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TemplateChunk {
    Text(String),
    /// Raw source of a `${...}` substitution and the line it starts on.
    Code(String, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    Template(Vec<TemplateChunk>),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Ellipsis,
    Question,
    QuestionDot,
    Nullish,
    Arrow,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    ShlAssign,
    ShrAssign,
    UShrAssign,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Increment,
    Decrement,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    UShr,
    Eof,
}

/// Multi-character punctuators, longest first so that greedy matching works.
const PUNCTUATORS: &[(&str, TokenKind)] = &[
    (">>>=", TokenKind::UShrAssign),
    (">>>", TokenKind::UShr),
    ("<<=", TokenKind::ShlAssign),
    (">>=", TokenKind::ShrAssign),
    ("===", TokenKind::EqEqEq),
    ("!==", TokenKind::NotEqEq),
    ("...", TokenKind::Ellipsis),
    ("**", TokenKind::StarStar),
    ("=>", TokenKind::Arrow),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::NotEq),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("&&", TokenKind::AndAnd),
    ("||", TokenKind::OrOr),
    ("??", TokenKind::Nullish),
    ("++", TokenKind::Increment),
    ("--", TokenKind::Decrement),
    ("+=", TokenKind::PlusAssign),
    ("-=", TokenKind::MinusAssign),
    ("*=", TokenKind::StarAssign),
    ("/=", TokenKind::SlashAssign),
    ("%=", TokenKind::PercentAssign),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    (",", TokenKind::Comma),
    (";", TokenKind::Semicolon),
    (":", TokenKind::Colon),
    (".", TokenKind::Dot),
    ("?", TokenKind::Question),
    ("=", TokenKind::Assign),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("!", TokenKind::Bang),
    ("&", TokenKind::Amp),
    ("|", TokenKind::Pipe),
    ("^", TokenKind::Caret),
    ("~", TokenKind::Tilde),
];

#[derive(Debug)]
pub(crate) struct Lexer<'a> {
    source: &'a str,
    index: usize,
    line: usize,
    column: usize,
    saw_newline: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::starting_at(source, 1)
    }

    /// Lexer for a fragment embedded in a larger source, e.g. a template
    /// substitution, so reported lines stay absolute.
    pub fn starting_at(source: &'a str, line: usize) -> Self {
        Self {
            source,
            index: 0,
            line,
            column: 1,
            saw_newline: false,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ExecutionError> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                if ch == '\n' {
                    self.saw_newline = true;
                }
                self.advance_char();
                continue;
            }

            if self.starts_with("//") {
                self.skip_line_comment();
                continue;
            }

            if self.starts_with("/*") {
                self.skip_block_comment()?;
                continue;
            }

            let line = self.line;
            let column = self.column;

            let kind = match ch {
                '"' | '\'' => self.lex_string(ch)?,
                '`' => self.lex_template()?,
                c if is_ident_start(c) => self.lex_identifier(),
                c if c.is_ascii_digit()
                    || (c == '.'
                        && self
                            .peek_second_char()
                            .map(|next| next.is_ascii_digit())
                            .unwrap_or(false)) =>
                {
                    self.lex_number()?
                }
                '?' if self.starts_with("?.")
                    && !self
                        .source
                        .get(self.index + 2..)
                        .and_then(|rest| rest.chars().next())
                        .is_some_and(|next| next.is_ascii_digit()) =>
                {
                    self.advance_char();
                    self.advance_char();
                    TokenKind::QuestionDot
                }
                _ => self.lex_punctuator()?,
            };

            tokens.push(Token {
                kind,
                line,
                column,
                newline_before: std::mem::take(&mut self.saw_newline),
            });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            line: self.line,
            column: self.column,
            newline_before: true,
        });

        Ok(tokens)
    }

    fn lex_punctuator(&mut self) -> Result<TokenKind, ExecutionError> {
        for (text, kind) in PUNCTUATORS {
            if self.starts_with(text) {
                for _ in 0..text.len() {
                    self.advance_char();
                }
                return Ok(kind.clone());
            }
        }
        let ch = self.peek_char().unwrap_or('\0');
        Err(ExecutionError::at(
            format!("SyntaxError: unexpected character '{ch}' at column {}", self.column),
            self.line,
        ))
    }

    fn lex_identifier(&mut self) -> TokenKind {
        let start = self.index;
        self.advance_char();
        while self.peek_char().map(is_ident_continue).unwrap_or(false) {
            self.advance_char();
        }
        TokenKind::Ident(self.source[start..self.index].to_string())
    }

    fn lex_number(&mut self) -> Result<TokenKind, ExecutionError> {
        let line = self.line;
        let start = self.index;

        if self.peek_char() == Some('0')
            && let Some(prefix) = self.peek_second_char()
        {
            let radix = match prefix {
                'x' | 'X' => Some(16),
                'b' | 'B' => Some(2),
                'o' | 'O' => Some(8),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance_char();
                self.advance_char();
                let digits_start = self.index;
                while self
                    .peek_char()
                    .map(|ch| ch.is_digit(radix) || ch == '_')
                    .unwrap_or(false)
                {
                    self.advance_char();
                }
                let digits: String = self.source[digits_start..self.index]
                    .chars()
                    .filter(|ch| *ch != '_')
                    .collect();
                let value = u64::from_str_radix(&digits, radix).map_err(|_| {
                    ExecutionError::at("SyntaxError: invalid number literal", line)
                })?;
                return Ok(TokenKind::Number(value as f64));
            }
        }

        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() || ch == '_' {
                self.advance_char();
            } else if ch == '.' && !seen_dot && !seen_exp {
                seen_dot = true;
                self.advance_char();
            } else if (ch == 'e' || ch == 'E') && !seen_exp {
                seen_exp = true;
                self.advance_char();
                if let Some(sign) = self.peek_char()
                    && (sign == '+' || sign == '-')
                {
                    self.advance_char();
                }
                if !self.peek_char().is_some_and(|ch| ch.is_ascii_digit()) {
                    return Err(ExecutionError::at(
                        "SyntaxError: invalid exponent in number",
                        line,
                    ));
                }
            } else {
                break;
            }
        }

        if self.peek_char().is_some_and(is_ident_start) {
            return Err(ExecutionError::at(
                "SyntaxError: identifier starts immediately after numeric literal",
                line,
            ));
        }

        let text: String = self.source[start..self.index]
            .chars()
            .filter(|ch| *ch != '_')
            .collect();
        let value = text
            .parse::<f64>()
            .map_err(|err| ExecutionError::at(format!("SyntaxError: invalid number literal: {err}"), line))?;
        Ok(TokenKind::Number(value))
    }

    fn lex_string(&mut self, quote: char) -> Result<TokenKind, ExecutionError> {
        let line = self.line;
        self.advance_char();
        let mut out = String::new();

        loop {
            match self.advance_char() {
                None | Some('\n') => {
                    return Err(ExecutionError::at("SyntaxError: unterminated string literal", line));
                }
                Some(ch) if ch == quote => break,
                Some('\\') => self.lex_escape(&mut out, line)?,
                Some(ch) => out.push(ch),
            }
        }

        Ok(TokenKind::Str(out))
    }

    fn lex_template(&mut self) -> Result<TokenKind, ExecutionError> {
        let line = self.line;
        self.advance_char();
        let mut chunks = Vec::new();
        let mut text = String::new();

        loop {
            if self.starts_with("${") {
                self.advance_char();
                self.advance_char();
                if !text.is_empty() {
                    chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                }
                let code_line = self.line;
                let start = self.index;
                let mut depth = 0usize;
                loop {
                    match self.peek_char() {
                        None => {
                            return Err(ExecutionError::at(
                                "SyntaxError: unterminated template substitution",
                                line,
                            ));
                        }
                        Some('{') => depth += 1,
                        Some('}') if depth == 0 => break,
                        Some('}') => depth -= 1,
                        _ => {}
                    }
                    self.advance_char();
                }
                chunks.push(TemplateChunk::Code(
                    self.source[start..self.index].to_string(),
                    code_line,
                ));
                self.advance_char();
                continue;
            }

            match self.advance_char() {
                None => {
                    return Err(ExecutionError::at("SyntaxError: unterminated template literal", line));
                }
                Some('`') => break,
                Some('\\') => self.lex_escape(&mut text, line)?,
                Some(ch) => text.push(ch),
            }
        }

        if !text.is_empty() || chunks.is_empty() {
            chunks.push(TemplateChunk::Text(text));
        }
        Ok(TokenKind::Template(chunks))
    }

    fn lex_escape(&mut self, out: &mut String, line: usize) -> Result<(), ExecutionError> {
        let escaped = self
            .advance_char()
            .ok_or_else(|| ExecutionError::at("SyntaxError: unterminated escape sequence", line))?;
        match escaped {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            '\n' => {}
            'x' => {
                let code = self.read_hex_digits(2, line)?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'u' => {
                let code = if self.peek_char() == Some('{') {
                    self.advance_char();
                    let start = self.index;
                    while self.peek_char().is_some_and(|ch| ch.is_ascii_hexdigit()) {
                        self.advance_char();
                    }
                    let digits = &self.source[start..self.index];
                    if self.advance_char() != Some('}') {
                        return Err(ExecutionError::at("SyntaxError: invalid unicode escape", line));
                    }
                    u32::from_str_radix(digits, 16)
                        .map_err(|_| ExecutionError::at("SyntaxError: invalid unicode escape", line))?
                } else {
                    self.read_hex_digits(4, line)?
                };
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn read_hex_digits(&mut self, count: usize, line: usize) -> Result<u32, ExecutionError> {
        let start = self.index;
        for _ in 0..count {
            if !self.peek_char().is_some_and(|ch| ch.is_ascii_hexdigit()) {
                return Err(ExecutionError::at("SyntaxError: invalid hexadecimal escape", line));
            }
            self.advance_char();
        }
        u32::from_str_radix(&self.source[start..self.index], 16)
            .map_err(|_| ExecutionError::at("SyntaxError: invalid hexadecimal escape", line))
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.advance_char();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), ExecutionError> {
        let start_line = self.line;
        self.advance_char();
        self.advance_char();

        while self.index < self.source.len() {
            if self.starts_with("*/") {
                self.advance_char();
                self.advance_char();
                return Ok(());
            }
            if self.advance_char() == Some('\n') {
                self.saw_newline = true;
            }
        }

        Err(ExecutionError::at(
            "SyntaxError: unterminated block comment",
            start_line,
        ))
    }

    fn starts_with(&self, text: &str) -> bool {
        self.source[self.index..].starts_with(text)
    }

    fn peek_char(&self) -> Option<char> {
        self.source[self.index..].chars().next()
    }

    fn peek_second_char(&self) -> Option<char> {
        let mut chars = self.source[self.index..].chars();
        chars.next()?;
        chars.next()
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.index += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }
}

fn is_ident_start(ch: char) -> bool {
    ch == '_' || ch == '$' || ch.is_alphabetic()
}

fn is_ident_continue(ch: char) -> bool {
    ch == '_' || ch == '$' || ch.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::{Lexer, TemplateChunk, TokenKind};

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .expect("tokenize")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn greedy_punctuators() {
        assert_eq!(
            kinds("a === b !== c => ...d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::EqEqEq,
                TokenKind::Ident("b".into()),
                TokenKind::NotEqEq,
                TokenKind::Ident("c".into()),
                TokenKind::Arrow,
                TokenKind::Ellipsis,
                TokenKind::Ident("d".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn shift_assignments_are_single_tokens() {
        assert_eq!(
            kinds("a <<= 1; b >>= 2; c >>>= 3; d >> e >= f"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::ShlAssign,
                TokenKind::Number(1.0),
                TokenKind::Semicolon,
                TokenKind::Ident("b".into()),
                TokenKind::ShrAssign,
                TokenKind::Number(2.0),
                TokenKind::Semicolon,
                TokenKind::Ident("c".into()),
                TokenKind::UShrAssign,
                TokenKind::Number(3.0),
                TokenKind::Semicolon,
                TokenKind::Ident("d".into()),
                TokenKind::Shr,
                TokenKind::Ident("e".into()),
                TokenKind::Ge,
                TokenKind::Ident("f".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers_in_every_base() {
        assert_eq!(
            kinds("0xff 1.5e2 .5 0b101"),
            vec![
                TokenKind::Number(255.0),
                TokenKind::Number(150.0),
                TokenKind::Number(0.5),
                TokenKind::Number(5.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes_are_decoded() {
        assert_eq!(
            kinds(r#"'a\'b' "c\nA""#),
            vec![
                TokenKind::Str("a'b".into()),
                TokenKind::Str("c\nA".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn template_substitutions_keep_source() {
        let tokens = kinds("`w=${ size * 2 }mm`");
        assert_eq!(
            tokens[0],
            TokenKind::Template(vec![
                TemplateChunk::Text("w=".into()),
                TemplateChunk::Code(" size * 2 ".into(), 1),
                TemplateChunk::Text("mm".into()),
            ])
        );
    }

    #[test]
    fn comments_mark_line_breaks() {
        let tokens = Lexer::new("a /* x\n y */ b // tail\nc").tokenize().expect("tokenize");
        assert!(!tokens[0].newline_before);
        assert!(tokens[1].newline_before);
        assert_eq!(tokens[1].line, 2);
        assert!(tokens[2].newline_before);
        assert_eq!(tokens[2].line, 3);
    }

    #[test]
    fn optional_chaining_is_not_a_conditional_decimal() {
        assert_eq!(kinds("a?.b")[1], TokenKind::QuestionDot);
        assert_eq!(kinds("a?.5:1")[1], TokenKind::Question);
    }

    #[test]
    fn unterminated_string_reports_line() {
        let err = Lexer::new("\n'abc").tokenize().expect_err("must fail");
        assert_eq!(err.line, Some(2));
    }
}
