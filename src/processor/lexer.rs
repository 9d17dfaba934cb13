//! Hand-written lexer for build scripts.
//!
//! Only breaks the source into `Token`s; keywords such as `let` or `if`
//! come out as `Ident` and the parser decides what they mean.
//
//  Lexical items (informal):
//
//      Ident    ::= [A-Za-z_$][A-Za-z0-9_$]*
//      Int      ::= [0-9]+
//      Float    ::= [0-9]+ '.' [0-9]+
//      Str      ::= '"' … '"' | '\'' … '\''   (backslash escapes)
//      Symbols  ::= ( ) [ ] { } , ; : . = == != ! + - | || &&
//      Whitespace and comments (`//` or `#` until end-of-line) are discarded.

use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Assign,
    EqEq,
    NotEq,
    Bang,
    Plus,
    Minus,
    Pipe,
    OrOr,
    AndAnd,
    Eof,
}

/// A token together with the 1-based line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

#[derive(Clone)]
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
            line: 1,
            finished: false,
        }
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn consume_while<F: Fn(char) -> bool>(&mut self, pred: F, buf: &mut String) {
        while let Some(c) = self.peek_char() {
            if pred(c) {
                buf.push(c);
                self.next_char();
            } else {
                break;
            }
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.next_char();
                }
                Some('#') => self.skip_line(),
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    if ahead.peek() == Some(&'/') {
                        self.skip_line();
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek_char() {
            if c == '\n' {
                break;
            }
            self.next_char();
        }
    }

    fn read_identifier(&mut self, first: char) -> String {
        let mut id = String::new();
        id.push(first);
        self.consume_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$', &mut id);
        id
    }

    fn read_number(&mut self, first: char) -> Result<Token, String> {
        let mut num = String::new();
        num.push(first);
        self.consume_while(|c| c.is_ascii_digit(), &mut num);

        // A dot only belongs to the number when a digit follows it.
        let mut ahead = self.chars.clone();
        if ahead.next() == Some('.') && ahead.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.next_char();
            num.push('.');
            self.consume_while(|c| c.is_ascii_digit(), &mut num);
            return num
                .parse()
                .map(Token::Float)
                .map_err(|e| format!("invalid number {num}: {e}"));
        }

        num.parse()
            .map(Token::Int)
            .map_err(|e| format!("invalid number {num}: {e}"))
    }

    fn read_string(&mut self, quote: char) -> Result<String, String> {
        let mut txt = String::new();
        while let Some(c) = self.next_char() {
            match c {
                c if c == quote => return Ok(txt),
                '\\' => {
                    let escaped = match self.next_char() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some(c @ ('\\' | '"' | '\'')) => c,
                        Some(c) => return Err(format!("unknown escape \\{c}")),
                        None => break,
                    };
                    txt.push(escaped);
                }
                c => txt.push(c),
            }
        }
        Err(format!("no closing {quote} found"))
    }

    /// Emits `two` when the next char is `second`, otherwise `one`.
    fn pick(&mut self, second: char, two: Token, one: Token) -> Token {
        if self.peek_char() == Some(second) {
            self.next_char();
            two
        } else {
            one
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Spanned, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        self.skip_trivia();
        let line = self.line;

        let ch = match self.next_char() {
            Some(c) => c,
            None => {
                self.finished = true;
                return Some(Ok(Spanned {
                    token: Token::Eof,
                    line,
                }));
            }
        };

        let tok_res = match ch {
            '(' => Ok(Token::LParen),
            ')' => Ok(Token::RParen),
            '[' => Ok(Token::LBracket),
            ']' => Ok(Token::RBracket),
            '{' => Ok(Token::LBrace),
            '}' => Ok(Token::RBrace),
            ',' => Ok(Token::Comma),
            ';' => Ok(Token::Semicolon),
            ':' => Ok(Token::Colon),
            '.' => Ok(Token::Dot),
            '+' => Ok(Token::Plus),
            '-' => Ok(Token::Minus),
            '=' => Ok(self.pick('=', Token::EqEq, Token::Assign)),
            '!' => Ok(self.pick('=', Token::NotEq, Token::Bang)),
            '|' => Ok(self.pick('|', Token::OrOr, Token::Pipe)),
            '&' => {
                if self.peek_char() == Some('&') {
                    self.next_char();
                    Ok(Token::AndAnd)
                } else {
                    Err("expected && after &".to_string())
                }
            }
            '"' | '\'' => self.read_string(ch).map(Token::Str),
            c if c.is_ascii_digit() => self.read_number(c),
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                Ok(Token::Ident(self.read_identifier(c)))
            }
            e => Err(format!("unexpected character {e}")),
        };

        if tok_res.is_err() {
            self.finished = true;
        }

        Some(tok_res.map(|token| Spanned { token, line }))
    }
}

#[cfg(test)]
mod tests {
    use super::{Lexer, Token};

    fn tokens(src: &str) -> Vec<Token> {
        let spanned: Result<Vec<_>, _> = Lexer::new(src).collect();
        spanned.unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_tokenisation() {
        let test_cases = vec![
            (
                r#"project("app", |p| { p.x = 1; });"#,
                vec![
                    Token::Ident("project".into()),
                    Token::LParen,
                    Token::Str("app".into()),
                    Token::Comma,
                    Token::Pipe,
                    Token::Ident("p".into()),
                    Token::Pipe,
                    Token::LBrace,
                    Token::Ident("p".into()),
                    Token::Dot,
                    Token::Ident("x".into()),
                    Token::Assign,
                    Token::Int(1),
                    Token::Semicolon,
                    Token::RBrace,
                    Token::RParen,
                    Token::Semicolon,
                    Token::Eof,
                ],
            ),
            (
                "$gen(['A', 'B']);",
                vec![
                    Token::Ident("$gen".into()),
                    Token::LParen,
                    Token::LBracket,
                    Token::Str("A".into()),
                    Token::Comma,
                    Token::Str("B".into()),
                    Token::RBracket,
                    Token::RParen,
                    Token::Semicolon,
                    Token::Eof,
                ],
            ),
            (
                "a == b != !c || d && e",
                vec![
                    Token::Ident("a".into()),
                    Token::EqEq,
                    Token::Ident("b".into()),
                    Token::NotEq,
                    Token::Bang,
                    Token::Ident("c".into()),
                    Token::OrOr,
                    Token::Ident("d".into()),
                    Token::AndAnd,
                    Token::Ident("e".into()),
                    Token::Eof,
                ],
            ),
        ];

        for (src, expected) in test_cases {
            assert_eq!(tokens(src), expected, "source: {src}");
        }
    }

    #[test]
    fn test_numbers_and_member_dots() {
        assert_eq!(
            tokens("1.5 42 x.y"),
            vec![
                Token::Float(1.5),
                Token::Int(42),
                Token::Ident("x".into()),
                Token::Dot,
                Token::Ident("y".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_and_lines() {
        let src = "# header\n// another\nlet a = 'x\\ty';\n\nb;";
        let spanned: Vec<_> = Lexer::new(src).collect::<Result<_, _>>().unwrap();
        assert_eq!(spanned[0].token, Token::Ident("let".into()));
        assert_eq!(spanned[0].line, 3);
        assert_eq!(spanned[3].token, Token::Str("x\ty".into()));
        let b = spanned.iter().find(|s| s.token == Token::Ident("b".into()));
        assert_eq!(b.map(|s| s.line), Some(5));
    }

    #[test]
    fn test_unterminated_string() {
        let result: Result<Vec<_>, _> = Lexer::new("'abc").collect();
        assert!(result.is_err());
    }
}
