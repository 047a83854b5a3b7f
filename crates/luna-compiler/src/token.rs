use luna_core::LuaStr;
use std::fmt;
use std::ops::Range;

/// A token with its line and the byte range of its source text.
#[derive(Clone, Debug, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    /// Line the scanner was on when the token ended.
    pub line: u32,
    pub raw: Range<usize>,
}

/// All Lua 5.3 tokens.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    // --- Keywords (22) ---
    And,
    Break,
    Do,
    Else,
    ElseIf,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // --- Literals ---
    Integer(i64),
    Float(f64),
    String(LuaStr),
    Name(LuaStr),

    // --- Single-char operators/punctuation ---
    Plus,       // +
    Minus,      // -
    Star,       // *
    Slash,      // /
    Percent,    // %
    Caret,      // ^
    Hash,       // #
    Ampersand,  // &
    Tilde,      // ~
    Pipe,       // |
    Less,       // <
    Greater,    // >
    Assign,     // =
    LParen,     // (
    RParen,     // )
    LBrace,     // {
    RBrace,     // }
    LBracket,   // [
    RBracket,   // ]
    Semi,       // ;
    Colon,      // :
    Comma,      // ,
    Dot,        // .

    // --- Multi-char operators ---
    DoubleColon, // ::
    ShiftLeft,   // <<
    ShiftRight,  // >>
    FloorDiv,    // //
    Equal,       // ==
    NotEqual,    // ~=
    LessEq,      // <=
    GreaterEq,   // >=
    DotDot,      // ..
    DotDotDot,   // ...

    Eof,
}

impl Token {
    /// Try to match a keyword from an identifier.
    pub fn keyword(s: &[u8]) -> Option<Token> {
        Some(match s {
            b"and" => Token::And,
            b"break" => Token::Break,
            b"do" => Token::Do,
            b"else" => Token::Else,
            b"elseif" => Token::ElseIf,
            b"end" => Token::End,
            b"false" => Token::False,
            b"for" => Token::For,
            b"function" => Token::Function,
            b"goto" => Token::Goto,
            b"if" => Token::If,
            b"in" => Token::In,
            b"local" => Token::Local,
            b"nil" => Token::Nil,
            b"not" => Token::Not,
            b"or" => Token::Or,
            b"repeat" => Token::Repeat,
            b"return" => Token::Return,
            b"then" => Token::Then,
            b"true" => Token::True,
            b"until" => Token::Until,
            b"while" => Token::While,
            _ => return None,
        })
    }

    /// True for tokens that end a block (`else`, `elseif`, `end`, `until`, EOF).
    pub fn is_block_follow(&self, with_until: bool) -> bool {
        match self {
            Token::Else | Token::ElseIf | Token::End | Token::Eof => true,
            Token::Until => with_until,
            _ => false,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::And => "and",
            Token::Break => "break",
            Token::Do => "do",
            Token::Else => "else",
            Token::ElseIf => "elseif",
            Token::End => "end",
            Token::False => "false",
            Token::For => "for",
            Token::Function => "function",
            Token::Goto => "goto",
            Token::If => "if",
            Token::In => "in",
            Token::Local => "local",
            Token::Nil => "nil",
            Token::Not => "not",
            Token::Or => "or",
            Token::Repeat => "repeat",
            Token::Return => "return",
            Token::Then => "then",
            Token::True => "true",
            Token::Until => "until",
            Token::While => "while",
            Token::Integer(i) => return write!(f, "{i}"),
            Token::Float(x) => return f.write_str(&luna_core::number::fmt_float(*x)),
            Token::String(s) | Token::Name(s) => return write!(f, "{s}"),
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Caret => "^",
            Token::Hash => "#",
            Token::Ampersand => "&",
            Token::Tilde => "~",
            Token::Pipe => "|",
            Token::Less => "<",
            Token::Greater => ">",
            Token::Assign => "=",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Semi => ";",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::DoubleColon => "::",
            Token::ShiftLeft => "<<",
            Token::ShiftRight => ">>",
            Token::FloorDiv => "//",
            Token::Equal => "==",
            Token::NotEqual => "~=",
            Token::LessEq => "<=",
            Token::GreaterEq => ">=",
            Token::DotDot => "..",
            Token::DotDotDot => "...",
            Token::Eof => "<eof>",
        };
        f.write_str(s)
    }
}
