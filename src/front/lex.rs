//! The lexer.

use derive_more::Display;
use regex::Regex;

use crate::error::{CompileError, Result};

/// Tokens in the program.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// 1-based source line, for diagnostics.
    pub line: usize,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("keyword")]
    Keyword,
    #[display("num")]
    Num,
    #[display("char")]
    CharLit,
    #[display("string")]
    StrLit,
    #[display("...")]
    Ellipsis,
    #[display("<<")]
    Shl,
    #[display(">>")]
    Shr,
    #[display("<=")]
    Le,
    #[display(">=")]
    Ge,
    #[display("==")]
    EqEq,
    #[display("!=")]
    Ne,
    #[display("&&")]
    AndAnd,
    #[display("||")]
    OrOr,
    #[display("->")]
    Arrow,
    #[display("=")]
    Assign,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
    #[display("%")]
    Percent,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("&")]
    Amp,
    #[display("|")]
    Pipe,
    #[display("^")]
    Caret,
    #[display("~")]
    Tilde,
    #[display("!")]
    Bang,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display(";")]
    Semi,
    #[display(",")]
    Comma,
    #[display(".")]
    Dot,
    #[display("#")]
    Hash,
}

const KEYWORDS: &[&str] = &[
    "int", "char", "void", "struct", "enum", "if", "else", "while", "for", "break", "continue",
    "return",
];

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    line: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;

        // Multi-character operators must come before their prefixes.
        let table: &[(&str, TokenKind)] = &[
            (r"\A[A-Za-z_][A-Za-z0-9_]*", Id),
            (r"\A(?:0x[0-9A-Fa-f]+|[0-9]+)", Num),
            (r"\A'(?:\\.|[^'\\])'", CharLit),
            (r#"\A"(?:\\.|[^"\\])*""#, StrLit),
            (r"\A\.\.\.", Ellipsis),
            (r"\A<<", Shl),
            (r"\A>>", Shr),
            (r"\A<=", Le),
            (r"\A>=", Ge),
            (r"\A==", EqEq),
            (r"\A!=", Ne),
            (r"\A&&", AndAnd),
            (r"\A\|\|", OrOr),
            (r"\A->", Arrow),
            (r"\A=", Assign),
            (r"\A\+", Plus),
            (r"\A-", Minus),
            (r"\A\*", Star),
            (r"\A/", Slash),
            (r"\A%", Percent),
            (r"\A<", Lt),
            (r"\A>", Gt),
            (r"\A&", Amp),
            (r"\A\|", Pipe),
            (r"\A\^", Caret),
            (r"\A~", Tilde),
            (r"\A!", Bang),
            (r"\A\(", LParen),
            (r"\A\)", RParen),
            (r"\A\{", LBrace),
            (r"\A\}", RBrace),
            (r"\A\[", LBracket),
            (r"\A\]", RBracket),
            (r"\A;", Semi),
            (r"\A,", Comma),
            (r"\A\.", Dot),
            (r"\A#", Hash),
        ];

        Lexer {
            input,
            pos: 0,
            line: 1,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|//.*|(?s:/\*.*?\*/))*").unwrap(),
            matchers: table
                .iter()
                .map(|(pattern, kind)| (Regex::new(pattern).unwrap(), *kind))
                .collect(),
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.line += self.input[self.pos..self.pos + m.end()]
                .matches('\n')
                .count();
            self.pos += m.end();
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }
        let rest = &self.input[self.pos..];
        for (matcher, kind) in &self.matchers {
            if let Some(m) = matcher.find(rest) {
                let text = &self.input[self.pos..self.pos + m.end()];
                let kind = if *kind == TokenKind::Id && KEYWORDS.contains(&text) {
                    TokenKind::Keyword
                } else {
                    *kind
                };
                let token = Token {
                    kind,
                    text,
                    line: self.line,
                };
                self.pos += m.end();
                self.line += text.matches('\n').count();
                return Ok(Some(token));
            }
        }
        Err(CompileError::Lex {
            line: self.line,
            found: rest.chars().next().unwrap_or('\0'),
        })
    }
}

/// Lex the whole input up front; the parser works over the token slice.
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next()? {
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("int main() { return x; }"),
            vec![Keyword, Id, LParen, RParen, LBrace, Keyword, Id, Semi, RBrace]
        );
    }

    #[test]
    fn multi_character_operators_win() {
        assert_eq!(kinds("a <= b << 2"), vec![Id, Le, Id, Shl, Num]);
        assert_eq!(kinds("p->q"), vec![Id, Arrow, Id]);
        assert_eq!(kinds("..."), vec![Ellipsis]);
    }

    #[test]
    fn literals() {
        let tokens = tokenize("0x2a 42 'a' '\\n' \"hi\\n\"").unwrap();
        assert_eq!(
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![Num, Num, CharLit, CharLit, StrLit]
        );
        assert_eq!(tokens[0].text, "0x2a");
    }

    #[test]
    fn comments_are_whitespace() {
        assert_eq!(kinds("a // line\n b /* block\n */ c"), vec![Id, Id, Id]);
    }

    #[test]
    fn line_numbers_advance() {
        let tokens = tokenize("a\nb\n\nc").unwrap();
        assert_eq!(
            tokens.iter().map(|t| t.line).collect::<Vec<_>>(),
            vec![1, 2, 4]
        );
    }

    #[test]
    fn unknown_character_is_an_error() {
        assert!(matches!(
            tokenize("a @ b"),
            Err(CompileError::Lex { line: 1, found: '@' })
        ));
    }
}
