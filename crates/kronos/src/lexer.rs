//! Indentation-sensitive tokenizer for the Kronos surface syntax.
//!
//! Kronos is line-oriented: statements end at the newline and blocks are
//! delimited by indentation. The lexer keeps a stack of indent widths and
//! emits `Indent`/`Dedent` tokens when the width changes, the same
//! discipline as any off-side-rule language. Blank lines and comment-only
//! lines produce no tokens at all.
//!
//! Multi-word operators (`is greater than`, `divided by`, `is of type`) are
//! left as individual keyword tokens; the parser recognises the sequences.

use crate::error::{Error, Result};

/// One token with the 1-based source line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals and names. Identifiers may carry a single dot for module
    // member access (`util.square`).
    Number(f64),
    Str(String),
    Ident(String),

    // Punctuation
    LParen,
    RParen,
    Comma,
    Colon,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,

    // Keywords
    Set,
    Let,
    To,
    At,
    As,
    Plus,
    Minus,
    Times,
    Divided,
    By,
    Modulo,
    Is,
    Not,
    Greater,
    Less,
    Equal,
    Than,
    Or,
    And,
    Of,
    Type,
    Print,
    If,
    Else,
    While,
    For,
    In,
    Function,
    With,
    Return,
    Call,
    Try,
    Catch,
    Finally,
    End,
    Throw,
    Import,
    List,
    Map,
    Range,
    True,
    False,
    Nil,
    Delete,
}

impl TokenKind {
    /// Short description for parse error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::Str(s) => format!("string \"{}\"", s),
            TokenKind::Ident(name) => format!("'{}'", name),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("'{}'", keyword_text(other)),
        }
    }
}

fn keyword_text(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::Set => "set",
        TokenKind::Let => "let",
        TokenKind::To => "to",
        TokenKind::At => "at",
        TokenKind::As => "as",
        TokenKind::Plus => "plus",
        TokenKind::Minus => "minus",
        TokenKind::Times => "times",
        TokenKind::Divided => "divided",
        TokenKind::By => "by",
        TokenKind::Modulo => "modulo",
        TokenKind::Is => "is",
        TokenKind::Not => "not",
        TokenKind::Greater => "greater",
        TokenKind::Less => "less",
        TokenKind::Equal => "equal",
        TokenKind::Than => "than",
        TokenKind::Or => "or",
        TokenKind::And => "and",
        TokenKind::Of => "of",
        TokenKind::Type => "type",
        TokenKind::Print => "print",
        TokenKind::If => "if",
        TokenKind::Else => "else",
        TokenKind::While => "while",
        TokenKind::For => "for",
        TokenKind::In => "in",
        TokenKind::Function => "function",
        TokenKind::With => "with",
        TokenKind::Return => "return",
        TokenKind::Call => "call",
        TokenKind::Try => "try",
        TokenKind::Catch => "catch",
        TokenKind::Finally => "finally",
        TokenKind::End => "end",
        TokenKind::Throw => "throw",
        TokenKind::Import => "import",
        TokenKind::List => "list",
        TokenKind::Map => "map",
        TokenKind::Range => "range",
        TokenKind::True => "true",
        TokenKind::False => "false",
        TokenKind::Nil => "nil",
        TokenKind::Delete => "delete",
        _ => "?",
    }
}

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "set" => TokenKind::Set,
        "let" => TokenKind::Let,
        "to" => TokenKind::To,
        "at" => TokenKind::At,
        "as" => TokenKind::As,
        "plus" => TokenKind::Plus,
        "minus" => TokenKind::Minus,
        "times" => TokenKind::Times,
        "divided" => TokenKind::Divided,
        "by" => TokenKind::By,
        "modulo" => TokenKind::Modulo,
        "is" => TokenKind::Is,
        "not" => TokenKind::Not,
        "greater" => TokenKind::Greater,
        "less" => TokenKind::Less,
        "equal" => TokenKind::Equal,
        "than" => TokenKind::Than,
        "or" => TokenKind::Or,
        "and" => TokenKind::And,
        "of" => TokenKind::Of,
        "type" => TokenKind::Type,
        "print" => TokenKind::Print,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "function" => TokenKind::Function,
        "with" => TokenKind::With,
        "return" => TokenKind::Return,
        "call" => TokenKind::Call,
        "try" => TokenKind::Try,
        "catch" => TokenKind::Catch,
        "finally" => TokenKind::Finally,
        "end" => TokenKind::End,
        "throw" => TokenKind::Throw,
        "import" => TokenKind::Import,
        "list" => TokenKind::List,
        "map" => TokenKind::Map,
        "range" => TokenKind::Range,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "nil" => TokenKind::Nil,
        "delete" => TokenKind::Delete,
        _ => return None,
    })
}

/// Tokenize a whole source text.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    // Stack of active indentation widths; the base level is 0.
    let mut indents: Vec<usize> = vec![0];

    for (i, raw_line) in source.lines().enumerate() {
        let line_no = (i + 1) as u32;

        let (width, rest) = measure_indent(raw_line);
        if rest.is_empty() || rest.starts_with('#') {
            continue;
        }

        let current = *indents.last().expect("indent stack is never empty");
        if width > current {
            indents.push(width);
            tokens.push(Token {
                kind: TokenKind::Indent,
                line: line_no,
            });
        } else if width < current {
            while *indents.last().unwrap() > width {
                indents.pop();
                tokens.push(Token {
                    kind: TokenKind::Dedent,
                    line: line_no,
                });
            }
            if *indents.last().unwrap() != width {
                return Err(Error::tokenize(format!(
                    "line {}: inconsistent indentation",
                    line_no
                )));
            }
        }

        lex_line(rest, line_no, &mut tokens)?;
        tokens.push(Token {
            kind: TokenKind::Newline,
            line: line_no,
        });
    }

    let final_line = source.lines().count() as u32 + 1;
    while indents.len() > 1 {
        indents.pop();
        tokens.push(Token {
            kind: TokenKind::Dedent,
            line: final_line,
        });
    }
    tokens.push(Token {
        kind: TokenKind::Eof,
        line: final_line,
    });
    Ok(tokens)
}

/// Measure leading whitespace: a tab advances to the next multiple of 8.
/// Returns the width and the remainder of the line.
fn measure_indent(line: &str) -> (usize, &str) {
    let mut width = 0;
    for (i, ch) in line.char_indices() {
        match ch {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            _ => return (width, &line[i..]),
        }
    }
    (width, "")
}

fn lex_line(line: &str, line_no: u32, tokens: &mut Vec<Token>) -> Result<()> {
    let chars: Vec<char> = line.chars().collect();
    let mut pos = 0;

    let mut push = |kind: TokenKind| {
        tokens.push(Token { kind, line: line_no });
    };

    while pos < chars.len() {
        let ch = chars[pos];
        match ch {
            ' ' | '\t' => pos += 1,
            '#' => break,
            '(' => {
                push(TokenKind::LParen);
                pos += 1;
            }
            ')' => {
                push(TokenKind::RParen);
                pos += 1;
            }
            ',' => {
                push(TokenKind::Comma);
                pos += 1;
            }
            ':' => {
                push(TokenKind::Colon);
                pos += 1;
            }
            '"' => {
                let (s, next) = lex_string(&chars, pos, line_no)?;
                push(TokenKind::Str(s));
                pos = next;
            }
            c if c.is_ascii_digit() => {
                let (n, next) = lex_number(&chars, pos, line_no)?;
                push(TokenKind::Number(n));
                pos = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let (word, next) = lex_ident(&chars, pos);
                pos = next;
                match keyword(&word) {
                    Some(kind) => push(kind),
                    None => push(TokenKind::Ident(word)),
                }
            }
            other => {
                return Err(Error::tokenize(format!(
                    "line {}: unexpected character '{}'",
                    line_no, other
                )));
            }
        }
    }
    Ok(())
}

fn lex_string(chars: &[char], start: usize, line_no: u32) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut pos = start + 1;
    while pos < chars.len() {
        match chars[pos] {
            '"' => return Ok((out, pos + 1)),
            '\\' => {
                pos += 1;
                let escaped = chars.get(pos).ok_or_else(|| {
                    Error::tokenize(format!("line {}: unterminated string", line_no))
                })?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    '\\' => '\\',
                    '"' => '"',
                    other => {
                        return Err(Error::tokenize(format!(
                            "line {}: unknown escape '\\{}'",
                            line_no, other
                        )));
                    }
                });
                pos += 1;
            }
            c => {
                out.push(c);
                pos += 1;
            }
        }
    }
    Err(Error::tokenize(format!(
        "line {}: unterminated string",
        line_no
    )))
}

fn lex_number(chars: &[char], start: usize, line_no: u32) -> Result<(f64, usize)> {
    let mut pos = start;
    while pos < chars.len() && chars[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < chars.len()
        && chars[pos] == '.'
        && chars.get(pos + 1).is_some_and(|c| c.is_ascii_digit())
    {
        pos += 1;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
        let mut exp_end = pos + 1;
        if chars.get(exp_end) == Some(&'+') || chars.get(exp_end) == Some(&'-') {
            exp_end += 1;
        }
        if chars.get(exp_end).is_some_and(|c| c.is_ascii_digit()) {
            pos = exp_end;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }
    let text: String = chars[start..pos].iter().collect();
    let n = text
        .parse::<f64>()
        .map_err(|_| Error::tokenize(format!("line {}: invalid number '{}'", line_no, text)))?;
    Ok((n, pos))
}

/// Scan an identifier, allowing one embedded dot for module member access.
fn lex_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut pos = start;
    while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
        pos += 1;
    }
    // `util.square` lexes as a single dotted identifier.
    if pos < chars.len()
        && chars[pos] == '.'
        && chars
            .get(pos + 1)
            .is_some_and(|c| c.is_alphabetic() || *c == '_')
    {
        pos += 1;
        while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
            pos += 1;
        }
    }
    (chars[start..pos].iter().collect(), pos)
}
