//! Parser that consumes the lexer and builds a `Program` AST.

use super::ast::*;
use super::lexer::{Lexer, Spanned, Token};
use std::rc::Rc;

/// Expressions and blocks allowed to be open at once.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

/// Parses a whole script.
pub fn parse_script(src: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::new(src);
    parser.parse()
}

struct Parser<'a> {
    lex: std::iter::Peekable<Lexer<'a>>,
    line: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            lex: Lexer::new(src).peekable(),
            line: 1,
            depth: 0,
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            line: self.line,
            message: message.into(),
        })
    }

    fn peek(&mut self) -> Result<Spanned, ParseError> {
        match self.lex.peek() {
            Some(Ok(spanned)) => Ok(spanned.clone()),
            Some(Err(e)) => {
                let message = e.clone();
                self.error(message)
            }
            None => Ok(Spanned {
                token: Token::Eof,
                line: self.line,
            }),
        }
    }

    fn peek_token(&mut self) -> Result<Token, ParseError> {
        self.peek().map(|s| s.token)
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        match self.lex.next() {
            Some(Ok(spanned)) => {
                self.line = spanned.line;
                Ok(spanned.token)
            }
            Some(Err(e)) => self.error(e),
            None => Ok(Token::Eof),
        }
    }

    fn eat(&mut self, token: &Token) -> Result<bool, ParseError> {
        if self.peek_token()? == *token {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, token: Token, context: &str) -> Result<(), ParseError> {
        let found = self.advance()?;
        if found != token {
            return self.error(format!("expected {token:?} {context}, found {found:?}"));
        }
        Ok(())
    }

    fn expect_ident(&mut self, context: &str) -> Result<String, ParseError> {
        match self.advance()? {
            Token::Ident(name) if !is_keyword(&name) => Ok(name),
            other => self.error(format!("expected identifier {context}, found {other:?}")),
        }
    }

    fn parse(&mut self) -> Result<Program, ParseError> {
        let mut body = Vec::<Stmt>::new();
        while self.peek_token()? != Token::Eof {
            body.push(self.parse_stmt()?);
        }
        Ok(Program { body })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.peek()?.line;
        let kind = match self.peek_token()? {
            Token::Ident(kw) if kw == "let" => {
                self.advance()?;
                let name = self.expect_ident("after let")?;
                self.expect(Token::Assign, "after let binding")?;
                let value = self.parse_expr()?;
                self.expect(Token::Semicolon, "after let statement")?;
                StmtKind::Let(name, value)
            }
            Token::Ident(kw) if kw == "if" => {
                self.advance()?;
                self.parse_if()?
            }
            Token::Ident(kw) if kw == "for" => {
                self.advance()?;
                let var = self.expect_ident("after for")?;
                match self.advance()? {
                    Token::Ident(kw) if kw == "in" => {}
                    other => return self.error(format!("expected `in`, found {other:?}")),
                }
                let iterable = self.parse_expr()?;
                let body = self.parse_block()?;
                StmtKind::For {
                    var,
                    iterable,
                    body,
                }
            }
            _ => {
                let expr = self.parse_expr()?;
                let kind = if self.eat(&Token::Assign)? {
                    if !matches!(expr, Expr::Ident(_) | Expr::Member(..) | Expr::Index(..)) {
                        return self.error("invalid assignment target");
                    }
                    let value = self.parse_expr()?;
                    StmtKind::Assign(expr, value)
                } else {
                    StmtKind::Expr(expr)
                };
                self.expect(Token::Semicolon, "after statement")?;
                kind
            }
        };
        Ok(Stmt { line, kind })
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        let condition = self.parse_expr()?;
        let then_branch = self.parse_block()?;

        let else_branch = match self.peek_token()? {
            Token::Ident(kw) if kw == "else" => {
                self.advance()?;
                match self.peek_token()? {
                    Token::Ident(kw) if kw == "if" => {
                        let line = self.peek()?.line;
                        self.advance()?;
                        let kind = self.parse_if()?;
                        Some(vec![Stmt { line, kind }])
                    }
                    _ => Some(self.parse_block()?),
                }
            }
            _ => None,
        };

        Ok(StmtKind::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return self.error(format!("nesting deeper than {MAX_NESTING} levels"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.nested(Self::parse_block_body)
    }

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(Token::LBrace, "to open block")?;
        let mut stmts = Vec::new();
        while !self.eat(&Token::RBrace)? {
            if self.peek_token()? == Token::Eof {
                return self.error("unexpected end of script, missing }");
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_or)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr)? {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Token::AndAnd)? {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek_token()? {
                Token::EqEq => BinOp::Eq,
                Token::NotEq => BinOp::NotEq,
                _ => return Ok(lhs),
            };
            self.advance()?;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_token()? {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance()?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Bang)? {
            let operand = self.nested(Self::parse_unary)?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        if self.eat(&Token::Minus)? {
            let operand = self.nested(Self::parse_unary)?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_token()? {
                Token::Dot => {
                    self.advance()?;
                    // Keywords are fine as member names (`t.for`, `S.vars`).
                    let name = match self.advance()? {
                        Token::Ident(name) => name,
                        other => return self.error(format!("expected member name, found {other:?}")),
                    };
                    expr = Expr::Member(Box::new(expr), name);
                }
                Token::LBracket => {
                    self.advance()?;
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket, "to close index")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Token::LParen => {
                    self.advance()?;
                    let args = self.parse_list(Token::RParen, Self::parse_expr)?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Comma separated items up to `close`, trailing comma allowed.
    fn parse_list<T>(
        &mut self,
        close: Token,
        mut item: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        let mut items = Vec::new();
        loop {
            if self.eat(&close)? {
                return Ok(items);
            }
            items.push(item(self)?);
            if !self.eat(&Token::Comma)? {
                self.expect(close, "to close list")?;
                return Ok(items);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.advance()?;
        let expr = match token {
            Token::Int(n) => Expr::Int(n),
            Token::Float(f) => Expr::Float(f),
            Token::Str(s) => Expr::Str(s),
            Token::Ident(ident) => match ident.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" => Expr::Null,
                kw if is_keyword(kw) => return self.error(format!("unexpected keyword {kw}")),
                _ => Expr::Ident(ident),
            },
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "to close parenthesis")?;
                inner
            }
            Token::LBracket => Expr::Array(self.parse_list(Token::RBracket, Self::parse_expr)?),
            Token::LBrace => Expr::Object(self.parse_list(Token::RBrace, Self::parse_field)?),
            Token::OrOr => self.parse_lambda(Vec::new())?,
            Token::Pipe => {
                let params = self.parse_list(Token::Pipe, |p| p.expect_ident("as parameter"))?;
                self.parse_lambda(params)?
            }
            Token::Eof => return self.error("unexpected end of script"),
            t => return self.error(format!("invalid token: {t:?}")),
        };
        Ok(expr)
    }

    fn parse_field(&mut self) -> Result<(String, Expr), ParseError> {
        let key = match self.advance()? {
            Token::Ident(key) | Token::Str(key) => key,
            Token::Int(n) => n.to_string(),
            other => return self.error(format!("invalid object key {other:?}")),
        };
        self.expect(Token::Colon, "after object key")?;
        let value = self.parse_expr()?;
        Ok((key, value))
    }

    fn parse_lambda(&mut self, params: Vec<String>) -> Result<Expr, ParseError> {
        let body = if self.peek_token()? == Token::LBrace {
            LambdaBody::Block(self.parse_block()?)
        } else {
            LambdaBody::Expr(self.parse_expr()?)
        };
        Ok(Expr::Lambda(Rc::new(Lambda { params, body })))
    }
}

fn is_keyword(ident: &str) -> bool {
    matches!(
        ident,
        "let" | "if" | "else" | "for" | "in" | "true" | "false" | "null"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.into()))
    }

    fn single_stmt(src: &str) -> StmtKind {
        let program = parse_script(src).unwrap();
        assert_eq!(program.body.len(), 1, "source: {src}");
        program.body.into_iter().next().unwrap().kind
    }

    #[test]
    fn test_parse_statements() {
        let test_cases = vec![
            (
                "let a = 1;",
                StmtKind::Let("a".into(), Expr::Int(1)),
            ),
            (
                "t.sources = ['a.c'];",
                StmtKind::Assign(
                    Expr::Member(ident("t"), "sources".into()),
                    Expr::Array(vec![Expr::Str("a.c".into())]),
                ),
            ),
            (
                "global({ x: 1, 'y': null });",
                StmtKind::Expr(Expr::Call(
                    ident("global"),
                    vec![Expr::Object(vec![
                        ("x".into(), Expr::Int(1)),
                        ("y".into(), Expr::Null),
                    ])],
                )),
            ),
            (
                "a.b[0] = !c;",
                StmtKind::Assign(
                    Expr::Index(
                        Box::new(Expr::Member(ident("a"), "b".into())),
                        Box::new(Expr::Int(0)),
                    ),
                    Expr::Unary(UnaryOp::Not, ident("c")),
                ),
            ),
        ];

        for (input, expected) in test_cases {
            assert_eq!(single_stmt(input), expected, "source: {input}");
        }
    }

    #[test]
    fn test_parse_lambdas() {
        let stmt = single_stmt("project('app', |p| { p.x = 1; });");
        let StmtKind::Expr(Expr::Call(_, args)) = stmt else {
            panic!("expected call, got {stmt:?}");
        };
        let Expr::Lambda(lambda) = &args[1] else {
            panic!("expected lambda, got {:?}", args[1]);
        };
        assert_eq!(lambda.params, vec!["p".to_string()]);
        assert!(matches!(&lambda.body, LambdaBody::Block(stmts) if stmts.len() == 1));

        let stmt = single_stmt("let f = || 'x';");
        let StmtKind::Let(_, Expr::Lambda(lambda)) = stmt else {
            panic!("expected lambda binding, got {stmt:?}");
        };
        assert!(lambda.params.is_empty());
        assert_eq!(lambda.body, LambdaBody::Expr(Expr::Str("x".into())));
    }

    #[test]
    fn test_parse_precedence() {
        let stmt = single_stmt("a || b && c == d + e;");
        let expected = StmtKind::Expr(Expr::Binary(
            BinOp::Or,
            ident("a"),
            Box::new(Expr::Binary(
                BinOp::And,
                ident("b"),
                Box::new(Expr::Binary(
                    BinOp::Eq,
                    ident("c"),
                    Box::new(Expr::Binary(BinOp::Add, ident("d"), ident("e"))),
                )),
            )),
        ));
        assert_eq!(stmt, expected);
    }

    #[test]
    fn test_parse_control_flow() {
        let stmt = single_stmt("if G.debug { a; } else if b { c; } else { d; }");
        let StmtKind::If {
            condition,
            then_branch,
            else_branch,
        } = stmt
        else {
            panic!("expected if");
        };
        assert_eq!(condition, Expr::Member(ident("G"), "debug".into()));
        assert_eq!(then_branch.len(), 1);
        let else_branch = else_branch.unwrap();
        assert!(matches!(else_branch[0].kind, StmtKind::If { .. }));

        let stmt = single_stmt("for s in ['a', 'b'] { t.x = s; }");
        assert!(matches!(stmt, StmtKind::For { ref var, ref body, .. } if var == "s" && body.len() == 1));
    }

    #[test]
    fn test_parse_errors_carry_line() {
        let test_cases = vec![
            ("let a = 1;\nlet b = ;", 2),
            ("a = 1", 1),
            ("\n\n1 = 2;", 3),
            ("f(|x| {\n  x.y = 1;\n", 2),
        ];

        for (input, line) in test_cases {
            let err = parse_script(input).unwrap_err();
            assert_eq!(err.line, line, "source: {input:?} error: {}", err.message);
        }
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |open: &str, close: &str, depth: usize| {
            format!("let x = {}1{};", open.repeat(depth), close.repeat(depth))
        };
        let blocks = |depth: usize| {
            format!("{}{}", "if true {".repeat(depth), "}".repeat(depth))
        };

        let accepted = vec![nested("(", ")", 30), nested("!", "", 30), nested("[", "]", 30), blocks(30)];
        for source in accepted {
            assert!(parse_script(&source).is_ok(), "source: {source}");
        }

        let rejected = vec![
            nested("(", ")", 1000),
            nested("!", "", 1000),
            nested("-", "", 1000),
            nested("[", "]", 1000),
            blocks(1000),
        ];
        for source in rejected {
            let err = parse_script(&source).unwrap_err();
            assert_eq!(err.message, "nesting deeper than 64 levels", "source: {source}");
        }
    }
}
