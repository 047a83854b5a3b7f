use crate::token::{SpannedToken, Token};
use luna_core::number::{str_to_number, Number};
use luna_core::LuaStr;

/// Lexer error, positioned at the line where scanning failed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{line}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: u32,
    /// Source text the error points at, already quoted (or `<eof>`).
    pub near: Option<String>,
}

/// Pull-based lexer for Lua 5.3 with one token of lookahead.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    current: SpannedToken,
    ahead: Option<SpannedToken>,
    /// Line of the last consumed token.
    pub lastline: u32,
}

impl<'a> Lexer<'a> {
    /// Create a lexer and scan the first token.
    pub fn new(source: &'a [u8]) -> Result<Self, LexError> {
        let mut lexer = Lexer {
            source,
            pos: 0,
            line: 1,
            current: SpannedToken {
                token: Token::Eof,
                line: 1,
                raw: 0..0,
            },
            ahead: None,
            lastline: 1,
        };
        lexer.skip_shebang();
        lexer.current = lexer.scan_token()?;
        Ok(lexer)
    }

    /// The token under the cursor.
    pub fn current(&self) -> &SpannedToken {
        &self.current
    }

    pub fn token(&self) -> &Token {
        &self.current.token
    }

    /// Line of the current token.
    pub fn line(&self) -> u32 {
        self.current.line
    }

    /// Consume the current token and advance, returning the consumed token.
    pub fn next(&mut self) -> Result<SpannedToken, LexError> {
        self.lastline = self.current.line;
        let following = match self.ahead.take() {
            Some(tok) => tok,
            None => self.scan_token()?,
        };
        Ok(std::mem::replace(&mut self.current, following))
    }

    /// Look at the token after the current one without consuming anything.
    pub fn peek(&mut self) -> Result<&Token, LexError> {
        if self.ahead.is_none() {
            self.ahead = Some(self.scan_token()?);
        }
        match &self.ahead {
            Some(tok) => Ok(&tok.token),
            None => unreachable!("lookahead was just filled"),
        }
    }

    /// Text for "near ..." in messages about the current token.
    pub fn near(&self) -> String {
        match &self.current.token {
            Token::Eof => "<eof>".to_string(),
            Token::Name(_) | Token::String(_) | Token::Integer(_) | Token::Float(_) => {
                quote(&self.source[self.current.raw.clone()])
            }
            other => format!("'{other}'"),
        }
    }

    // ---- Character level ----

    fn peek_char(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_char_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn is_newline(c: Option<u8>) -> bool {
        matches!(c, Some(b'\n') | Some(b'\r'))
    }

    /// Skip a newline sequence (`\n`, `\r`, `\n\r` or `\r\n`) and bump the line.
    fn inc_line(&mut self) {
        let first = self.source[self.pos];
        self.pos += 1;
        if let Some(c) = self.peek_char() {
            if (c == b'\n' || c == b'\r') && c != first {
                self.pos += 1;
            }
        }
        self.line += 1;
    }

    fn skip_shebang(&mut self) {
        if self.source.first() == Some(&b'#') {
            while !Self::is_newline(self.peek_char()) && self.peek_char().is_some() {
                self.pos += 1;
            }
        }
    }

    fn error(&self, message: &str, near: Option<String>) -> LexError {
        LexError {
            message: message.to_string(),
            line: self.line,
            near,
        }
    }

    fn error_near_text(&self, message: &str, start: usize) -> LexError {
        let end = self.pos.min(self.source.len());
        self.error(message, Some(quote(&self.source[start..end])))
    }

    fn error_near_eof(&self, message: &str) -> LexError {
        self.error(message, Some("<eof>".to_string()))
    }

    // ---- Token level ----

    fn scan_token(&mut self) -> Result<SpannedToken, LexError> {
        loop {
            let Some(c) = self.peek_char() else {
                return Ok(self.make(Token::Eof, self.pos));
            };
            let start = self.pos;
            match c {
                b'\n' | b'\r' => self.inc_line(),
                b' ' | b'\t' | 0x0b | 0x0c => self.pos += 1,
                b'-' => {
                    if self.peek_char_at(1) != Some(b'-') {
                        self.pos += 1;
                        return Ok(self.make(Token::Minus, start));
                    }
                    self.pos += 2;
                    self.skip_comment()?;
                }
                b'[' => {
                    match self.long_bracket_level() {
                        Some(level) => {
                            let bytes = self.read_long_string(level, "string")?;
                            return Ok(self.make(Token::String(LuaStr::from(bytes)), start));
                        }
                        None if self.peek_char_at(1) == Some(b'=') => {
                            self.pos += 1;
                            while self.peek_char() == Some(b'=') {
                                self.pos += 1;
                            }
                            return Err(self.error_near_text("invalid long string delimiter", start));
                        }
                        None => {
                            self.pos += 1;
                            return Ok(self.make(Token::LBracket, start));
                        }
                    }
                }
                b'"' | b'\'' => {
                    let bytes = self.read_string(c)?;
                    return Ok(self.make(Token::String(LuaStr::from(bytes)), start));
                }
                b'.' => {
                    if self.peek_char_at(1) == Some(b'.') {
                        if self.peek_char_at(2) == Some(b'.') {
                            self.pos += 3;
                            return Ok(self.make(Token::DotDotDot, start));
                        }
                        self.pos += 2;
                        return Ok(self.make(Token::DotDot, start));
                    }
                    if self.peek_char_at(1).is_some_and(|d| d.is_ascii_digit()) {
                        return self.read_numeral();
                    }
                    self.pos += 1;
                    return Ok(self.make(Token::Dot, start));
                }
                b'0'..=b'9' => return self.read_numeral(),
                c if is_ident_start(c) => {
                    while self.peek_char().is_some_and(is_ident_continue) {
                        self.pos += 1;
                    }
                    let word = &self.source[start..self.pos];
                    let token = Token::keyword(word).unwrap_or_else(|| Token::Name(LuaStr::new(word)));
                    return Ok(self.make(token, start));
                }
                _ => {
                    let token = self.read_operator(c)?;
                    return Ok(self.make(token, start));
                }
            }
        }
    }

    fn make(&self, token: Token, start: usize) -> SpannedToken {
        SpannedToken {
            token,
            line: self.line,
            raw: start..self.pos,
        }
    }

    fn read_operator(&mut self, c: u8) -> Result<Token, LexError> {
        let next = self.peek_char_at(1);
        let (token, width) = match (c, next) {
            (b'=', Some(b'=')) => (Token::Equal, 2),
            (b'<', Some(b'=')) => (Token::LessEq, 2),
            (b'<', Some(b'<')) => (Token::ShiftLeft, 2),
            (b'>', Some(b'=')) => (Token::GreaterEq, 2),
            (b'>', Some(b'>')) => (Token::ShiftRight, 2),
            (b'/', Some(b'/')) => (Token::FloorDiv, 2),
            (b'~', Some(b'=')) => (Token::NotEqual, 2),
            (b':', Some(b':')) => (Token::DoubleColon, 2),
            (b'=', _) => (Token::Assign, 1),
            (b'<', _) => (Token::Less, 1),
            (b'>', _) => (Token::Greater, 1),
            (b'/', _) => (Token::Slash, 1),
            (b'~', _) => (Token::Tilde, 1),
            (b':', _) => (Token::Colon, 1),
            (b'+', _) => (Token::Plus, 1),
            (b'*', _) => (Token::Star, 1),
            (b'%', _) => (Token::Percent, 1),
            (b'^', _) => (Token::Caret, 1),
            (b'#', _) => (Token::Hash, 1),
            (b'&', _) => (Token::Ampersand, 1),
            (b'|', _) => (Token::Pipe, 1),
            (b'(', _) => (Token::LParen, 1),
            (b')', _) => (Token::RParen, 1),
            (b'{', _) => (Token::LBrace, 1),
            (b'}', _) => (Token::RBrace, 1),
            (b']', _) => (Token::RBracket, 1),
            (b';', _) => (Token::Semi, 1),
            (b',', _) => (Token::Comma, 1),
            _ => {
                let near = if c.is_ascii_graphic() {
                    format!("'{}'", c as char)
                } else {
                    format!("'<\\{c}>'")
                };
                return Err(self.error("unexpected symbol", Some(near)));
            }
        };
        self.pos += width;
        Ok(token)
    }

    /// Called after `--`.
    fn skip_comment(&mut self) -> Result<(), LexError> {
        if self.peek_char() == Some(b'[') {
            if let Some(level) = self.long_bracket_level() {
                self.read_long_string(level, "comment")?;
                return Ok(());
            }
        }
        while self.peek_char().is_some() && !Self::is_newline(self.peek_char()) {
            self.pos += 1;
        }
        Ok(())
    }

    /// If the cursor is on `[` `=`* `[`, return the number of `=`.
    fn long_bracket_level(&self) -> Option<usize> {
        let mut level = 0;
        while self.peek_char_at(1 + level) == Some(b'=') {
            level += 1;
        }
        (self.peek_char_at(1 + level) == Some(b'[')).then_some(level)
    }

    fn read_long_string(&mut self, level: usize, what: &str) -> Result<Vec<u8>, LexError> {
        self.pos += level + 2;
        if Self::is_newline(self.peek_char()) {
            self.inc_line();
        }
        let mut buf = Vec::new();
        loop {
            match self.peek_char() {
                None => return Err(self.error_near_eof(&format!("unfinished long {what}"))),
                Some(b']') if self.closes_long_bracket(level) => {
                    self.pos += level + 2;
                    return Ok(buf);
                }
                Some(b'\n') | Some(b'\r') => {
                    self.inc_line();
                    buf.push(b'\n');
                }
                Some(c) => {
                    buf.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn closes_long_bracket(&self, level: usize) -> bool {
        (1..=level).all(|i| self.peek_char_at(i) == Some(b'='))
            && self.peek_char_at(level + 1) == Some(b']')
    }

    fn read_string(&mut self, delim: u8) -> Result<Vec<u8>, LexError> {
        let start = self.pos;
        self.pos += 1;
        let mut buf = Vec::new();
        loop {
            match self.peek_char() {
                None => return Err(self.error_near_eof("unfinished string")),
                Some(b'\n') | Some(b'\r') => {
                    return Err(self.error_near_text("unfinished string", start));
                }
                Some(c) if c == delim => {
                    self.pos += 1;
                    return Ok(buf);
                }
                Some(b'\\') => self.read_escape(start, &mut buf)?,
                Some(c) => {
                    buf.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn read_escape(&mut self, start: usize, buf: &mut Vec<u8>) -> Result<(), LexError> {
        self.pos += 1;
        let Some(c) = self.peek_char() else {
            return Err(self.error_near_eof("unfinished string"));
        };
        let simple = match c {
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'f' => Some(0x0c),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'v' => Some(0x0b),
            b'\\' | b'"' | b'\'' => Some(c),
            _ => None,
        };
        if let Some(byte) = simple {
            buf.push(byte);
            self.pos += 1;
            return Ok(());
        }
        match c {
            b'\n' | b'\r' => {
                self.inc_line();
                buf.push(b'\n');
            }
            b'x' => {
                self.pos += 1;
                let mut value = 0u8;
                for _ in 0..2 {
                    let d = self.peek_char().and_then(|d| (d as char).to_digit(16));
                    match d {
                        Some(d) => value = value * 16 + d as u8,
                        None => {
                            self.pos += usize::from(self.peek_char().is_some());
                            return Err(self.error_near_text("hexadecimal digit expected", start));
                        }
                    }
                    self.pos += 1;
                }
                buf.push(value);
            }
            b'u' => {
                self.pos += 1;
                let code = self.read_utf8_escape(start)?;
                utf8_encode(code, buf);
            }
            b'z' => {
                self.pos += 1;
                while let Some(w) = self.peek_char() {
                    match w {
                        b'\n' | b'\r' => self.inc_line(),
                        b' ' | b'\t' | 0x0b | 0x0c => self.pos += 1,
                        _ => break,
                    }
                }
            }
            b'0'..=b'9' => {
                let mut value: u32 = 0;
                for _ in 0..3 {
                    match self.peek_char() {
                        Some(d @ b'0'..=b'9') => {
                            value = value * 10 + (d - b'0') as u32;
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                if value > 255 {
                    self.pos += usize::from(self.peek_char().is_some());
                    return Err(self.error_near_text("decimal escape too large", start));
                }
                buf.push(value as u8);
            }
            _ => {
                self.pos += 1;
                return Err(self.error_near_text("invalid escape sequence", start));
            }
        }
        Ok(())
    }

    fn read_utf8_escape(&mut self, start: usize) -> Result<u32, LexError> {
        if self.peek_char() != Some(b'{') {
            self.pos += usize::from(self.peek_char().is_some());
            return Err(self.error_near_text("missing '{'", start));
        }
        self.pos += 1;
        let mut code: u32 = 0;
        let mut digits = 0;
        while let Some(d) = self.peek_char().and_then(|d| (d as char).to_digit(16)) {
            if code > 0x7FF_FFFF {
                self.pos += 1;
                return Err(self.error_near_text("UTF-8 value too large", start));
            }
            code = code * 16 + d;
            digits += 1;
            self.pos += 1;
        }
        if digits == 0 {
            self.pos += usize::from(self.peek_char().is_some());
            return Err(self.error_near_text("hexadecimal digit expected", start));
        }
        if self.peek_char() != Some(b'}') {
            self.pos += usize::from(self.peek_char().is_some());
            return Err(self.error_near_text("missing '}'", start));
        }
        self.pos += 1;
        Ok(code)
    }

    /// Read a numeral greedily and convert it with the shared Lua rules.
    fn read_numeral(&mut self) -> Result<SpannedToken, LexError> {
        let start = self.pos;
        let mut exponent = [b'e', b'E'];
        if self.peek_char() == Some(b'0') && matches!(self.peek_char_at(1), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            exponent = [b'p', b'P'];
        }
        while let Some(c) = self.peek_char() {
            if exponent.contains(&c) {
                self.pos += 1;
                if matches!(self.peek_char(), Some(b'+') | Some(b'-')) {
                    self.pos += 1;
                }
            } else if c.is_ascii_hexdigit() || c == b'.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = &self.source[start..self.pos];
        let token = match str_to_number(text) {
            Some(Number::Int(i)) => Token::Integer(i),
            Some(Number::Float(f)) => Token::Float(f),
            None => return Err(self.error_near_text("malformed number", start)),
        };
        Ok(self.make(token, start))
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn quote(bytes: &[u8]) -> String {
    format!("'{}'", String::from_utf8_lossy(bytes))
}

/// Encode a code point up to 0x7FFFFFFF with the extended (6-byte) UTF-8 scheme.
fn utf8_encode(code: u32, buf: &mut Vec<u8>) {
    if code < 0x80 {
        buf.push(code as u8);
        return;
    }
    let mut tail = [0u8; 6];
    let mut n = 0;
    let mut x = code;
    // largest value that still fits in the first byte
    let mut first_max: u32 = 0x3f;
    while x > first_max {
        tail[n] = 0x80 | (x & 0x3f) as u8;
        n += 1;
        x >>= 6;
        first_max >>= 1;
    }
    buf.push(((!first_max << 1) | x) as u8);
    buf.extend(tail[..n].iter().rev());
}
