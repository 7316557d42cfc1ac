use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Number(f64),
    Str(String),
    /// Raw template literal: text chunks interleaved with `${}` hole sources.
    /// `holes[i]` sits between `chunks[i]` and `chunks[i + 1]`.
    Template {
        chunks: Vec<String>,
        holes: Vec<(String, usize)>,
    },
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub offset: usize,
    pub end: usize,
    pub newline_before: bool,
}

// Longest first so that maximal munch works with a linear scan.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "??=", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--",
    "+=", "-=", "*=", "/=", "%=", "(", ")", "{", "}", "[", "]", ";", ",", ".", "?", ":", "=", "!",
    "<", ">", "+", "-", "*", "/", "%",
];

pub(crate) fn tokenize(source: &str, base: usize) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        source,
        bytes: source.as_bytes(),
        pos: 0,
        base,
    };
    let mut tokens = Vec::new();
    loop {
        let newline_before = lexer.skip_trivia()?;
        let offset = lexer.pos;
        let Some(kind) = lexer.next_kind()? else {
            tokens.push(Token {
                kind: TokenKind::Eof,
                offset: base + offset,
                end: base + offset,
                newline_before: true,
            });
            return Ok(tokens);
        };
        tokens.push(Token {
            kind,
            offset: base + offset,
            end: base + lexer.pos,
            newline_before,
        });
    }
}

struct Lexer<'s> {
    source: &'s str,
    bytes: &'s [u8],
    pos: usize,
    base: usize,
}

impl<'s> Lexer<'s> {
    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.base + self.pos)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    /// Skips whitespace and comments, reporting whether a line break was seen.
    fn skip_trivia(&mut self) -> Result<bool, ParseError> {
        let mut newline = false;
        while let Some(byte) = self.peek() {
            match byte {
                b'\n' | b'\r' => {
                    newline = true;
                    self.pos += 1;
                }
                b' ' | b'\t' => self.pos += 1,
                b'/' if self.peek_at(1) == Some(b'/') => {
                    while let Some(byte) = self.peek() {
                        if byte == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                b'/' if self.peek_at(1) == Some(b'*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        match self.peek() {
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(b'\n') => {
                                newline = true;
                                self.pos += 1;
                            }
                            Some(_) => self.pos += 1,
                            None => {
                                return Err(ParseError::new(
                                    "unterminated block comment",
                                    self.base + start,
                                ))
                            }
                        }
                    }
                }
                _ if byte.is_ascii() => break,
                _ => {
                    // Non-ASCII whitespace (e.g. NBSP) is trivia as well.
                    let ch = self.source[self.pos..].chars().next().unwrap_or(' ');
                    if ch.is_whitespace() {
                        self.pos += ch.len_utf8();
                    } else {
                        break;
                    }
                }
            }
        }
        Ok(newline)
    }

    fn next_kind(&mut self) -> Result<Option<TokenKind>, ParseError> {
        let Some(byte) = self.peek() else {
            return Ok(None);
        };
        if byte.is_ascii_digit()
            || (byte == b'.' && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()))
        {
            return self.number().map(Some);
        }
        if byte == b'"' || byte == b'\'' {
            return self.string(byte).map(|s| Some(TokenKind::Str(s)));
        }
        if byte == b'`' {
            return self.template().map(Some);
        }
        let rest = &self.source[self.pos..];
        let first = rest.chars().next().unwrap_or('\0');
        if first == '_' || first == '$' || first.is_alphabetic() {
            let len = rest
                .char_indices()
                .find(|(_, ch)| !(*ch == '_' || *ch == '$' || ch.is_alphanumeric()))
                .map(|(index, _)| index)
                .unwrap_or(rest.len());
            self.pos += len;
            return Ok(Some(TokenKind::Ident(rest[..len].to_string())));
        }
        for punct in PUNCTUATORS {
            if rest.starts_with(punct) {
                // `?.5` is a conditional followed by a number, not optional access.
                if *punct == "?." && self.peek_at(2).is_some_and(|b| b.is_ascii_digit()) {
                    continue;
                }
                self.pos += punct.len();
                return Ok(Some(TokenKind::Punct(punct)));
            }
        }
        Err(self.error(format!("unexpected character '{first}'")))
    }

    fn number(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits = &self.source[digits_start..self.pos];
            return u64::from_str_radix(digits, 16)
                .map(|value| TokenKind::Number(value as f64))
                .map_err(|_| ParseError::new("invalid hex literal", self.base + start));
        }
        while self.peek().is_some_and(|b| b.is_ascii_digit() || b == b'_') {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_none_or(|b| b != b'.') {
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if self.peek().is_some_and(|b| b.is_ascii_digit()) {
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = mark;
            }
        }
        let text: String = self.source[start..self.pos]
            .chars()
            .filter(|ch| *ch != '_')
            .collect();
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| ParseError::new("invalid number literal", self.base + start))
    }

    fn escape(&mut self, out: &mut String) -> Result<(), ParseError> {
        // Positioned just after the backslash.
        let Some(ch) = self.source[self.pos..].chars().next() else {
            return Err(self.error("unterminated escape sequence"));
        };
        self.pos += ch.len_utf8();
        match ch {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            'u' => {
                let digits = self
                    .source
                    .get(self.pos..self.pos + 4)
                    .ok_or_else(|| self.error("truncated unicode escape"))?;
                let code = u32::from_str_radix(digits, 16)
                    .map_err(|_| self.error("invalid unicode escape"))?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                self.pos += 4;
            }
            '\n' => {}
            other => out.push(other),
        }
        Ok(())
    }

    fn string(&mut self, quote: u8) -> Result<String, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(ch) = self.source[self.pos..].chars().next() else {
                return Err(ParseError::new(
                    "unterminated string literal",
                    self.base + start,
                ));
            };
            self.pos += ch.len_utf8();
            match ch {
                '\\' => self.escape(&mut out)?,
                '\n' => {
                    return Err(ParseError::new(
                        "line break in string literal",
                        self.base + start,
                    ))
                }
                _ if ch as u32 == quote as u32 => return Ok(out),
                _ => out.push(ch),
            }
        }
    }

    fn template(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut chunks = Vec::new();
        let mut holes = Vec::new();
        let mut current = String::new();
        loop {
            let Some(ch) = self.source[self.pos..].chars().next() else {
                return Err(ParseError::new(
                    "unterminated template literal",
                    self.base + start,
                ));
            };
            match ch {
                '`' => {
                    self.pos += 1;
                    chunks.push(current);
                    return Ok(TokenKind::Template { chunks, holes });
                }
                '\\' => {
                    self.pos += 1;
                    self.escape(&mut current)?;
                }
                '$' if self.peek_at(1) == Some(b'{') => {
                    self.pos += 2;
                    let hole_start = self.pos;
                    let hole_end = scan_balanced(self.source, hole_start).ok_or_else(|| {
                        ParseError::new("unterminated template hole", self.base + hole_start)
                    })?;
                    chunks.push(std::mem::take(&mut current));
                    holes.push((
                        self.source[hole_start..hole_end].to_string(),
                        self.base + hole_start,
                    ));
                    self.pos = hole_end + 1;
                }
                _ => {
                    self.pos += ch.len_utf8();
                    current.push(ch);
                }
            }
        }
    }
}

/// Finds the `}` closing a brace group that starts at `start` (just after the
/// opening brace). Quoted strings and template literals inside the group may
/// contain braces of their own.
pub(crate) fn scan_balanced(source: &str, start: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut pos = start;
    while pos < bytes.len() {
        match bytes[pos] {
            b'{' => depth += 1,
            b'}' => {
                if depth == 0 {
                    return Some(pos);
                }
                depth -= 1;
            }
            quote @ (b'"' | b'\'' | b'`') => {
                pos += 1;
                while pos < bytes.len() && bytes[pos] != quote {
                    if bytes[pos] == b'\\' {
                        pos += 1;
                    }
                    pos += 1;
                }
                if pos >= bytes.len() {
                    return None;
                }
            }
            _ => {}
        }
        pos += 1;
    }
    None
}
