use std::{collections::BTreeMap, str::Chars};

use itertools::{PeekNth, peek_nth};
use once_cell::sync::Lazy;
use strum::{EnumString, IntoStaticStr};

use crate::frontend::SourceFile;

#[derive(Debug)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    position: usize,
    chars: PeekNth<Chars<'source>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, TokenKind::Error(_))
    }

    pub fn is_identifier(&self) -> bool {
        self.kind == TokenKind::Identifier
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // fn
    Identifier,       // main
    Underscore,       // _

    /* Literals */
    BoolLiteral(bool),                 // true
    IntLiteral(i64, IntSuffix),        // 1u
    FloatLiteral(f64, FloatSuffix),    // 1.0f

    /* Delimiters */
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    Semicolon,    // ;
    Comma,        // ,

    /* Other */
    Colon,    // :
    Period,   // .
    Arrow,    // ->
    Attr,     // @

    /* Unary Ops */
    Bang,  // !
    Tilde, // ~

    /* Unary + Binary Ops */
    Asterisk,   // *
    Minus,      // -
    BitwiseAnd, // &

    /* Binary Ops */
    Plus,                 // +
    Divide,               // /
    Modulus,              // %
    LogicalAnd,           // &&
    LogicalOr,            // ||
    BitwiseXor,           // ^
    BitwiseOr,            // |
    ShiftLeft,            // <<
    ShiftRight,           // >>
    DoubleEquals,         // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=

    /* Assignment */
    Equals,           // =
    PlusEquals,       // +=
    MinusEquals,      // -=
    MultiplyEquals,   // *=
    DivideEquals,     // /=
    ModulusEquals,    // %=
    BitwiseXorEquals, // ^=
    BitwiseAndEquals, // &=
    BitwiseOrEquals,  // |=
    ShiftLeftEquals,  // <<=
    ShiftRightEquals, // >>=
    PlusPlus,         // ++
    MinusMinus,       // --

    Error(LexError),
    Eof,
}

impl TokenKind {
    pub fn is_compound_assignment_operator(&self) -> bool {
        matches!(
            self,
            Self::PlusEquals
                | Self::MinusEquals
                | Self::MultiplyEquals
                | Self::DivideEquals
                | Self::ModulusEquals
                | Self::BitwiseXorEquals
                | Self::BitwiseAndEquals
                | Self::BitwiseOrEquals
                | Self::ShiftLeftEquals
                | Self::ShiftRightEquals
        )
    }

    pub fn is_comparison_operator(&self) -> bool {
        matches!(
            self,
            Self::NotEquals
                | Self::DoubleEquals
                | Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
        )
    }

    pub fn is_bit_shift_operator(&self) -> bool {
        matches!(self, Self::ShiftLeft | Self::ShiftRight)
    }

    pub fn is_term_operator(&self) -> bool {
        matches!(self, Self::Plus | Self::Minus)
    }

    pub fn is_factor_operator(&self) -> bool {
        matches!(self, Self::Asterisk | Self::Divide | Self::Modulus)
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Self::BoolLiteral(_) | Self::IntLiteral(..) | Self::FloatLiteral(..)
        )
    }

    /// Opening and closing delimiters, used to skip balanced groups while
    /// resynchronizing the parser.
    pub fn delimiter_depth_change(&self) -> i32 {
        match self {
            Self::OpenParen | Self::OpenBracket | Self::OpenBrace => 1,
            Self::CloseParen | Self::CloseBracket | Self::CloseBrace => -1,
            _ => 0,
        }
    }
}

impl core::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Keyword(keyword) => return write!(f, "'{}'", keyword.as_str()),
            Self::Identifier => "identifier",
            Self::Underscore => "'_'",
            Self::BoolLiteral(_) => "bool literal",
            Self::IntLiteral(..) => "integer literal",
            Self::FloatLiteral(..) => "float literal",
            Self::OpenParen => "'('",
            Self::CloseParen => "')'",
            Self::OpenBracket => "'['",
            Self::CloseBracket => "']'",
            Self::OpenBrace => "'{'",
            Self::CloseBrace => "'}'",
            Self::Semicolon => "';'",
            Self::Comma => "','",
            Self::Colon => "':'",
            Self::Period => "'.'",
            Self::Arrow => "'->'",
            Self::Attr => "'@'",
            Self::Bang => "'!'",
            Self::Tilde => "'~'",
            Self::Asterisk => "'*'",
            Self::Minus => "'-'",
            Self::BitwiseAnd => "'&'",
            Self::Plus => "'+'",
            Self::Divide => "'/'",
            Self::Modulus => "'%'",
            Self::LogicalAnd => "'&&'",
            Self::LogicalOr => "'||'",
            Self::BitwiseXor => "'^'",
            Self::BitwiseOr => "'|'",
            Self::ShiftLeft => "'<<'",
            Self::ShiftRight => "'>>'",
            Self::DoubleEquals => "'=='",
            Self::NotEquals => "'!='",
            Self::LessThan => "'<'",
            Self::LessThanOrEqualTo => "'<='",
            Self::GreaterThan => "'>'",
            Self::GreaterThanOrEqualTo => "'>='",
            Self::Equals => "'='",
            Self::PlusEquals => "'+='",
            Self::MinusEquals => "'-='",
            Self::MultiplyEquals => "'*='",
            Self::DivideEquals => "'/='",
            Self::ModulusEquals => "'%='",
            Self::BitwiseXorEquals => "'^='",
            Self::BitwiseAndEquals => "'&='",
            Self::BitwiseOrEquals => "'|='",
            Self::ShiftLeftEquals => "'<<='",
            Self::ShiftRightEquals => "'>>='",
            Self::PlusPlus => "'++'",
            Self::MinusMinus => "'--'",
            Self::Error(_) => "invalid token",
            Self::Eof => "end of file",
        };

        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Alias,
    Break,
    Case,
    Const,
    ConstAssert,
    Continue,
    Continuing,
    Default,
    Discard,
    Else,
    Enable,
    Fn,
    For,
    If,
    Let,
    Loop,
    Override,
    Return,
    Struct,
    Switch,
    Var,
    While,
}

impl Keyword {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntSuffix {
    /// No suffix, an abstract integer
    None,
    I,
    U,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatSuffix {
    /// No suffix, an abstract float
    None,
    F,
    H,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexError {
    InvalidCharacter(char),
    UnterminatedComment,
    IntegerOverflow(IntSuffix),
    FloatOverflow(FloatSuffix),
    LeadingZero,
    MissingExponent,
    MissingHexDigits,
}

impl core::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCharacter(c) => write!(f, "invalid character found: {c:?}"),
            Self::UnterminatedComment => f.write_str("unterminated block comment"),
            Self::IntegerOverflow(IntSuffix::None) => {
                f.write_str("value cannot be represented as 'abstract-int'")
            }
            Self::IntegerOverflow(IntSuffix::I) => f.write_str("value cannot be represented as 'i32'"),
            Self::IntegerOverflow(IntSuffix::U) => f.write_str("value cannot be represented as 'u32'"),
            Self::FloatOverflow(FloatSuffix::None) => {
                f.write_str("value cannot be represented as 'abstract-float'")
            }
            Self::FloatOverflow(FloatSuffix::F) => f.write_str("value cannot be represented as 'f32'"),
            Self::FloatOverflow(FloatSuffix::H) => f.write_str("value cannot be represented as 'f16'"),
            Self::LeadingZero => f.write_str("integer literals must not have leading zeros"),
            Self::MissingExponent => f.write_str("expected an exponent value for float literal"),
            Self::MissingHexDigits => f.write_str("expected hex digits after '0x'"),
        }
    }
}

/// Table of single char tokens (matched after longer sequences are checked for)
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        ('[', TokenKind::OpenBracket),
        (']', TokenKind::CloseBracket),
        ('{', TokenKind::OpenBrace),
        ('}', TokenKind::CloseBrace),
        (';', TokenKind::Semicolon),
        (',', TokenKind::Comma),
        (':', TokenKind::Colon),
        ('.', TokenKind::Period),
        ('@', TokenKind::Attr),
        ('!', TokenKind::Bang),
        ('~', TokenKind::Tilde),
        ('*', TokenKind::Asterisk),
        ('-', TokenKind::Minus),
        ('=', TokenKind::Equals),
        ('+', TokenKind::Plus),
        ('/', TokenKind::Divide),
        ('%', TokenKind::Modulus),
        ('^', TokenKind::BitwiseXor),
        ('&', TokenKind::BitwiseAnd),
        ('|', TokenKind::BitwiseOr),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
    ])
});

/// Two char tokens, checked before [`SINGLE_TOKENS`]
static DOUBLE_TOKENS: Lazy<BTreeMap<[char; 2], TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        (['-', '>'], TokenKind::Arrow),
        (['&', '&'], TokenKind::LogicalAnd),
        (['|', '|'], TokenKind::LogicalOr),
        (['=', '='], TokenKind::DoubleEquals),
        (['!', '='], TokenKind::NotEquals),
        (['<', '='], TokenKind::LessThanOrEqualTo),
        (['>', '='], TokenKind::GreaterThanOrEqualTo),
        (['<', '<'], TokenKind::ShiftLeft),
        (['>', '>'], TokenKind::ShiftRight),
        (['+', '='], TokenKind::PlusEquals),
        (['-', '='], TokenKind::MinusEquals),
        (['*', '='], TokenKind::MultiplyEquals),
        (['/', '='], TokenKind::DivideEquals),
        (['%', '='], TokenKind::ModulusEquals),
        (['&', '='], TokenKind::BitwiseAndEquals),
        (['|', '='], TokenKind::BitwiseOrEquals),
        (['^', '='], TokenKind::BitwiseXorEquals),
        (['+', '+'], TokenKind::PlusPlus),
        (['-', '-'], TokenKind::MinusMinus),
    ])
});

/// Three char tokens, checked first so the longest operator always wins
static TRIPLE_TOKENS: Lazy<BTreeMap<[char; 3], TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        (['<', '<', '='], TokenKind::ShiftLeftEquals),
        (['>', '>', '='], TokenKind::ShiftRightEquals),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The smallest span covering both `self` and `other`
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            source,
            chars: peek_nth(source.contents.chars()),
            position: 0,
        }
    }

    pub fn source(&self) -> &'source SourceFile {
        self.source
    }

    fn peek_char(&mut self, n: usize) -> Option<char> {
        self.chars.peek_nth(n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();
        Some(c)
    }

    fn ignore_line(&mut self) {
        while let Some(c) = self.peek_char(0) {
            if c == '\n' {
                break;
            }

            self.bump();
        }
    }

    /// Skips a (possibly nested) block comment, returning false if the file
    /// ended before the comment was closed.
    fn ignore_block_comment(&mut self) -> bool {
        let mut depth = 0usize;

        while let Some(c) = self.peek_char(0) {
            match (c, self.peek_char(1)) {
                ('/', Some('*')) => {
                    self.bump();
                    self.bump();
                    depth += 1;
                }
                ('*', Some('/')) => {
                    self.bump();
                    self.bump();
                    depth -= 1;

                    if depth == 0 {
                        return true;
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }

        false
    }

    // Keyword, identifier, or boolean literal
    fn read_word(&mut self) -> Token {
        let start_position = self.position;

        while let Some(c) = self.peek_char(0) {
            if !(c.is_alphanumeric() || c == '_') {
                break;
            }

            self.bump();
        }

        let span = self.new_span(start_position);
        let value = self.source.value_of_span(span);

        let kind = if let Ok(keyword) = value.parse() {
            TokenKind::Keyword(keyword)
        } else {
            match value {
                "true" => TokenKind::BoolLiteral(true),
                "false" => TokenKind::BoolLiteral(false),
                "_" => TokenKind::Underscore,
                _ => TokenKind::Identifier,
            }
        };

        Token { kind, span }
    }

    fn read_digits(&mut self, radix: u32) -> usize {
        let mut count = 0;

        while let Some(c) = self.peek_char(0) {
            if !c.is_digit(radix) {
                break;
            }

            self.bump();
            count += 1;
        }

        count
    }

    /// Consumes an `[eE][+-]?[0-9]+` (or `[pP]...` for hex floats) exponent if
    /// one starts at the cursor. Returns `None` if there is no exponent,
    /// `Some(Err(..))` if the exponent has no digits.
    fn read_exponent(&mut self, markers: [char; 2]) -> Option<Result<(), LexError>> {
        let c = self.peek_char(0)?;
        if !markers.contains(&c) {
            return None;
        }

        self.bump();

        if matches!(self.peek_char(0), Some('+' | '-')) {
            self.bump();
        }

        if self.read_digits(10) == 0 {
            return Some(Err(LexError::MissingExponent));
        }

        Some(Ok(()))
    }

    fn read_int_suffix(&mut self) -> IntSuffix {
        match self.peek_char(0) {
            Some('i') => {
                self.bump();
                IntSuffix::I
            }
            Some('u') => {
                self.bump();
                IntSuffix::U
            }
            _ => IntSuffix::None,
        }
    }

    fn read_float_suffix(&mut self) -> FloatSuffix {
        match self.peek_char(0) {
            Some('f') => {
                self.bump();
                FloatSuffix::F
            }
            Some('h') => {
                self.bump();
                FloatSuffix::H
            }
            _ => FloatSuffix::None,
        }
    }

    fn read_number(&mut self) -> Token {
        let start_position = self.position;

        let is_hex = self.peek_char(0) == Some('0')
            && matches!(self.peek_char(1), Some('x' | 'X'));

        let kind = if is_hex {
            self.bump();
            self.bump();
            self.read_hex_number()
        } else {
            self.read_decimal_number(start_position)
        };

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn read_decimal_number(&mut self, start_position: usize) -> TokenKind {
        let integer_digits = self.read_digits(10);
        let mut is_float = false;

        if self.peek_char(0) == Some('.') {
            is_float = true;
            self.bump();
            self.read_digits(10);
        }

        match self.read_exponent(['e', 'E']) {
            Some(Err(error)) => return TokenKind::Error(error),
            Some(Ok(())) => is_float = true,
            None => {}
        }

        let digits_end = self.position;
        let text = &self.source.contents[start_position..digits_end];
        let has_leading_zero = integer_digits > 1 && text.starts_with('0');

        if is_float {
            let suffix = self.read_float_suffix();
            return float_literal(text.parse::<f64>().ok(), suffix);
        }

        match self.peek_char(0) {
            // `1f` and `1h` are floats without a fractional part
            Some('f' | 'h') => {
                let suffix = self.read_float_suffix();

                if has_leading_zero {
                    return TokenKind::Error(LexError::LeadingZero);
                }

                float_literal(text.parse::<f64>().ok(), suffix)
            }
            _ => {
                let suffix = self.read_int_suffix();

                if has_leading_zero {
                    return TokenKind::Error(LexError::LeadingZero);
                }

                int_literal(text.parse::<u64>().ok(), suffix)
            }
        }
    }

    fn read_hex_number(&mut self) -> TokenKind {
        let mantissa_start = self.position;
        let integer_digits = self.read_digits(16);
        let integer_end = self.position;

        let mut fraction = None;
        if self.peek_char(0) == Some('.') {
            self.bump();
            let fraction_start = self.position;
            self.read_digits(16);
            fraction = Some(fraction_start..self.position);
        }

        let fraction_digits = fraction.as_ref().map(|r| r.len()).unwrap_or(0);
        if integer_digits == 0 && fraction_digits == 0 {
            return TokenKind::Error(LexError::MissingHexDigits);
        }

        let exponent_start = self.position;
        let exponent = match self.read_exponent(['p', 'P']) {
            Some(Err(error)) => return TokenKind::Error(error),
            Some(Ok(())) => self.source.contents[exponent_start + 1..self.position]
                .parse::<i32>()
                .ok(),
            None => None,
        };

        if fraction.is_none() && exponent.is_none() {
            let suffix = self.read_int_suffix();
            let digits = &self.source.contents[mantissa_start..integer_end];

            return int_literal(u64::from_str_radix(digits, 16).ok(), suffix);
        }

        // The suffix only follows an exponent, otherwise `f` is a hex digit
        let suffix = if exponent.is_some() {
            self.read_float_suffix()
        } else {
            FloatSuffix::None
        };

        let integer = &self.source.contents[mantissa_start..integer_end];
        let fraction = fraction
            .map(|range| &self.source.contents[range])
            .unwrap_or_default();

        float_literal(hex_float_value(integer, fraction, exponent.unwrap_or(0)), suffix)
    }

    fn read_single(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;
        self.bump();

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn read_multiple(&mut self, count: usize, kind: TokenKind) -> Token {
        let start_position = self.position;

        for _ in 0..count {
            self.bump();
        }

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn new_span(&self, start: usize) -> Span {
        Span {
            start,
            end: self.position,
        }
    }

    /// Produces the next token. Once the end of the source is reached every
    /// call returns an [`TokenKind::Eof`] token.
    pub fn next_token(&mut self) -> Token {
        while let Some(c) = self.peek_char(0) {
            let token = match c {
                // Ignore whitespace
                c if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                // Ignore comments
                '/' if self.peek_char(1) == Some('/') => {
                    self.ignore_line();
                    continue;
                }
                '/' if self.peek_char(1) == Some('*') => {
                    let start_position = self.position;

                    if self.ignore_block_comment() {
                        continue;
                    }

                    Token {
                        kind: TokenKind::Error(LexError::UnterminatedComment),
                        span: self.new_span(start_position),
                    }
                }

                // Integer and float literals
                n if n.is_ascii_digit() => self.read_number(),
                '.' if self.peek_char(1).is_some_and(|c| c.is_ascii_digit()) => self.read_number(),

                // Identifiers, keywords, and boolean literals
                a if a.is_alphabetic() || a == '_' => self.read_word(),

                c => {
                    let second = self.peek_char(1);
                    let third = self.peek_char(2);

                    let triple = second
                        .zip(third)
                        .and_then(|(b, d)| TRIPLE_TOKENS.get(&[c, b, d]).copied());
                    let double = second.and_then(|b| DOUBLE_TOKENS.get(&[c, b]).copied());

                    if let Some(kind) = triple {
                        self.read_multiple(3, kind)
                    } else if let Some(kind) = double {
                        self.read_multiple(2, kind)
                    } else if let Some(kind) = SINGLE_TOKENS.get(&c).copied() {
                        self.read_single(kind)
                    } else {
                        self.read_single(TokenKind::Error(LexError::InvalidCharacter(c)))
                    }
                }
            };

            return token;
        }

        Token {
            kind: TokenKind::Eof,
            span: Span::new(self.position, self.position),
        }
    }
}

fn int_literal(value: Option<u64>, suffix: IntSuffix) -> TokenKind {
    let limit = match suffix {
        IntSuffix::None => i64::MAX as u64,
        IntSuffix::I => i32::MAX as u64,
        IntSuffix::U => u32::MAX as u64,
    };

    match value {
        Some(value) if value <= limit => TokenKind::IntLiteral(value as i64, suffix),
        _ => TokenKind::Error(LexError::IntegerOverflow(suffix)),
    }
}

fn float_literal(value: Option<f64>, suffix: FloatSuffix) -> TokenKind {
    let representable = value.is_some_and(|value| match suffix {
        FloatSuffix::None => value.is_finite(),
        FloatSuffix::F => (value as f32).is_finite(),
        FloatSuffix::H => half::f16::from_f64(value).is_finite(),
    });

    match value {
        Some(value) if representable => TokenKind::FloatLiteral(value, suffix),
        _ => TokenKind::Error(LexError::FloatOverflow(suffix)),
    }
}

fn hex_float_value(integer: &str, fraction: &str, exponent: i32) -> Option<f64> {
    let mut value = 0f64;

    for digit in integer.chars().chain(fraction.chars()) {
        value = value * 16.0 + f64::from(digit.to_digit(16)?);
    }

    let fraction_bits = i32::try_from(fraction.len()).ok()?.checked_mul(4)?;
    let scale = exponent.checked_sub(fraction_bits)?;

    Some(value * 2f64.powi(scale))
}

/// An indexable, lazily filled token buffer over a [`Lexer`]. The parser
/// peeks at arbitrary distances and can rewind to any earlier index.
#[derive(Debug)]
pub struct TokenStream<'source> {
    lexer: Lexer<'source>,
    tokens: Vec<Token>,
    finished: bool,
}

impl<'source> TokenStream<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            lexer: Lexer::new(source),
            tokens: Vec::new(),
            finished: false,
        }
    }

    pub fn source(&self) -> &'source SourceFile {
        self.lexer.source()
    }

    fn fill_to(&mut self, index: usize) {
        while !self.finished && self.tokens.len() <= index {
            let token = self.lexer.next_token();
            self.finished = token.is_eof();
            self.tokens.push(token);
        }
    }

    /// The token at `index`. Indices past the end yield the final EOF token.
    pub fn get(&mut self, index: usize) -> Token {
        self.fill_to(index);

        match self.tokens.get(index) {
            Some(token) => *token,
            None => self.tokens.last().copied().unwrap_or(Token {
                kind: TokenKind::Eof,
                span: Span::default(),
            }),
        }
    }

    /// Replaces the token at `index` with two tokens covering the same text
    pub fn split(&mut self, index: usize, first: TokenKind, second: TokenKind) {
        self.fill_to(index);

        if let Some(token) = self.tokens.get(index).copied() {
            let middle = token.span.start + 1;

            self.tokens[index] = Token {
                kind: first,
                span: Span::new(token.span.start, middle),
            };
            self.tokens.insert(
                index + 1,
                Token {
                    kind: second,
                    span: Span::new(middle, token.span.end),
                },
            );
        }
    }

    /// Lexes the whole source eagerly
    pub fn collect_all(mut self) -> Vec<Token> {
        while !self.finished {
            let index = self.tokens.len();
            self.fill_to(index);
        }

        self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let source = SourceFile::from_memory(source);

        TokenStream::new(&source)
            .collect_all()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn maximal_munch_operators() {
        assert_eq!(
            kinds("a >>= b >> c > d"),
            vec![
                TokenKind::Identifier,
                TokenKind::ShiftRightEquals,
                TokenKind::Identifier,
                TokenKind::ShiftRight,
                TokenKind::Identifier,
                TokenKind::GreaterThan,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("<<= <= -> -- &&"),
            vec![
                TokenKind::ShiftLeftEquals,
                TokenKind::LessThanOrEqualTo,
                TokenKind::Arrow,
                TokenKind::MinusMinus,
                TokenKind::LogicalAnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("fn main var _ const_assert true vec4"),
            vec![
                TokenKind::Keyword(Keyword::Fn),
                TokenKind::Identifier,
                TokenKind::Keyword(Keyword::Var),
                TokenKind::Underscore,
                TokenKind::Keyword(Keyword::ConstAssert),
                TokenKind::BoolLiteral(true),
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn integer_suffixes() {
        assert_eq!(
            kinds("1 2i 3u 0x10 0xFFu"),
            vec![
                TokenKind::IntLiteral(1, IntSuffix::None),
                TokenKind::IntLiteral(2, IntSuffix::I),
                TokenKind::IntLiteral(3, IntSuffix::U),
                TokenKind::IntLiteral(16, IntSuffix::None),
                TokenKind::IntLiteral(255, IntSuffix::U),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn float_forms() {
        assert_eq!(
            kinds("1.0 .5 2. 1e3 4f 1.5h 0x1p4 0x1.8p1f 0x.8"),
            vec![
                TokenKind::FloatLiteral(1.0, FloatSuffix::None),
                TokenKind::FloatLiteral(0.5, FloatSuffix::None),
                TokenKind::FloatLiteral(2.0, FloatSuffix::None),
                TokenKind::FloatLiteral(1000.0, FloatSuffix::None),
                TokenKind::FloatLiteral(4.0, FloatSuffix::F),
                TokenKind::FloatLiteral(1.5, FloatSuffix::H),
                TokenKind::FloatLiteral(16.0, FloatSuffix::None),
                TokenKind::FloatLiteral(3.0, FloatSuffix::F),
                TokenKind::FloatLiteral(0.5, FloatSuffix::None),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn overflowing_literals_are_error_tokens() {
        assert_eq!(
            kinds("2147483648i 4294967295u 4294967296u 1e39f 70000.0h"),
            vec![
                TokenKind::Error(LexError::IntegerOverflow(IntSuffix::I)),
                TokenKind::IntLiteral(4294967295, IntSuffix::U),
                TokenKind::Error(LexError::IntegerOverflow(IntSuffix::U)),
                TokenKind::Error(LexError::FloatOverflow(FloatSuffix::F)),
                TokenKind::Error(LexError::FloatOverflow(FloatSuffix::H)),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn leading_zeros_are_rejected() {
        assert_eq!(
            kinds("012 0 0.5"),
            vec![
                TokenKind::Error(LexError::LeadingZero),
                TokenKind::IntLiteral(0, IntSuffix::None),
                TokenKind::FloatLiteral(0.5, FloatSuffix::None),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("a // line\n /* block /* nested */ still */ b"),
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::Eof]
        );
        assert_eq!(
            kinds("a /* open"),
            vec![
                TokenKind::Identifier,
                TokenKind::Error(LexError::UnterminatedComment),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn invalid_characters_do_not_stop_lexing() {
        assert_eq!(
            kinds("a $ b"),
            vec![
                TokenKind::Identifier,
                TokenKind::Error(LexError::InvalidCharacter('$')),
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn token_stream_peeks_and_splits() {
        let source = SourceFile::from_memory("a>>b");
        let mut stream = TokenStream::new(&source);

        assert_eq!(stream.get(3).kind, TokenKind::Eof);
        assert_eq!(stream.get(10).kind, TokenKind::Eof);

        stream.split(1, TokenKind::GreaterThan, TokenKind::GreaterThan);

        assert_eq!(stream.get(1).kind, TokenKind::GreaterThan);
        assert_eq!(stream.get(1).span, Span::new(1, 2));
        assert_eq!(stream.get(2).kind, TokenKind::GreaterThan);
        assert_eq!(stream.get(3).kind, TokenKind::Identifier);
    }
}
