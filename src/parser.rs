// ABOUTME: Recursive-descent parser turning a token stream into the
// `ast::Expr`/`ast::Stmt` trees the evaluator walks.

use crate::ast::{BinOp, Expr, Stmt, UnOp};
use crate::error::HplError;
use crate::lexer::{self, Token, TokenKind};
use crate::value::HplFunction;
use std::rc::Rc;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn current_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn position(&self) -> (u32, u32) {
        let t = self.current();
        (t.line, t.column)
    }

    fn is_block_terminator(&self) -> bool {
        match self.current_kind() {
            TokenKind::Dedent | TokenKind::RBrace | TokenKind::Eof => true,
            TokenKind::Keyword(k) if k == "else" || k == "catch" => true,
            _ => false,
        }
    }

    fn consume_indent(&mut self) {
        if matches!(self.current_kind(), TokenKind::Indent) {
            self.advance();
        }
    }

    fn parse_statements_until_end(&mut self) -> Result<Vec<Stmt>, HplError> {
        let mut statements = Vec::new();
        while !self.is_block_terminator() {
            self.consume_indent();
            if self.is_block_terminator() {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    pub fn parse_block(&mut self) -> Result<Vec<Stmt>, HplError> {
        if matches!(self.current_kind(), TokenKind::Indent) {
            self.advance();
            let statements = self.parse_statements_until_end()?;
            if matches!(self.current_kind(), TokenKind::Dedent) {
                self.advance();
            }
            Ok(statements)
        } else if matches!(self.current_kind(), TokenKind::LBrace) {
            self.advance();
            let mut statements = Vec::new();
            while !matches!(self.current_kind(), TokenKind::RBrace | TokenKind::Eof) {
                statements.push(self.parse_statement()?);
            }
            if matches!(self.current_kind(), TokenKind::RBrace) {
                self.advance();
            }
            Ok(statements)
        } else if matches!(self.current_kind(), TokenKind::Colon) {
            self.advance();
            if matches!(self.current_kind(), TokenKind::Indent) {
                self.advance();
                let statements = self.parse_statements_until_end()?;
                if matches!(self.current_kind(), TokenKind::Dedent) {
                    self.advance();
                }
                Ok(statements)
            } else {
                let mut statements = Vec::new();
                loop {
                    match self.current_kind() {
                        TokenKind::RBrace | TokenKind::Eof => break,
                        TokenKind::Keyword(k) if k == "else" || k == "catch" => break,
                        TokenKind::Keyword(_) => break,
                        _ => statements.push(self.parse_statement()?),
                    }
                }
                Ok(statements)
            }
        } else {
            self.parse_statements_until_end()
        }
    }

    pub fn parse_statement(&mut self) -> Result<Stmt, HplError> {
        let (line, _) = self.position();

        if let TokenKind::Keyword(kw) = self.current_kind().clone() {
            match kw.as_str() {
                "return" => {
                    self.advance();
                    let expr = if !matches!(
                        self.current_kind(),
                        TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
                    ) {
                        Some(self.parse_expression()?)
                    } else {
                        None
                    };
                    return Ok(Stmt::Return { expr, line });
                }
                "break" => {
                    self.advance();
                    return Ok(Stmt::Break { line });
                }
                "continue" => {
                    self.advance();
                    return Ok(Stmt::Continue { line });
                }
                "import" => return self.parse_import_statement(),
                "if" => return self.parse_if_statement(),
                "for" => return self.parse_for_statement(),
                "while" => return self.parse_while_statement(),
                "try" => return self.parse_try_catch_statement(),
                _ => {}
            }
        }

        if let TokenKind::Identifier(name) = self.current_kind().clone() {
            if name == "echo" {
                self.advance();
                let expr = self.parse_expression()?;
                return Ok(Stmt::Echo { expr, line });
            }

            let save = self.pos;
            self.advance();

            if matches!(self.current_kind(), TokenKind::LBracket) {
                self.advance();
                let index_expr = self.parse_expression()?;
                self.expect(&TokenKind::RBracket)?;

                if matches!(self.current_kind(), TokenKind::Assign) {
                    self.advance();
                    let value_expr = self.parse_expression()?;
                    return Ok(Stmt::ArrayAssignment {
                        array: Expr::Variable(name),
                        index: index_expr,
                        value: value_expr,
                        line,
                    });
                } else {
                    self.pos = save;
                    let expr = self.parse_expression()?;
                    return Ok(Stmt::ExprStmt { expr, line });
                }
            }

            if matches!(self.current_kind(), TokenKind::Increment) {
                self.advance();
                return Ok(Stmt::Increment { name, line });
            }

            if matches!(self.current_kind(), TokenKind::Assign) {
                self.advance();
                let expr = self.parse_expression()?;
                return Ok(Stmt::Assignment { name, expr, line });
            }

            self.pos = save;
            let expr = self.parse_expression()?;
            return Ok(Stmt::ExprStmt { expr, line });
        }

        let expr = self.parse_expression()?;
        Ok(Stmt::ExprStmt { expr, line })
    }

    fn parse_if_statement(&mut self) -> Result<Stmt, HplError> {
        let (line, _) = self.position();
        self.expect_keyword("if")?;
        self.expect(&TokenKind::LParen)?;
        let condition = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;

        let then_block = self.parse_block()?;

        let else_block = if matches!(self.current_kind(), TokenKind::Keyword(k) if k == "else") {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_block,
            else_block,
            line,
        })
    }

    fn parse_for_statement(&mut self) -> Result<Stmt, HplError> {
        let (line, _) = self.position();
        self.expect_keyword("for")?;
        self.expect(&TokenKind::LParen)?;

        let init = Some(Box::new(self.parse_statement()?));
        self.expect(&TokenKind::Semicolon)?;

        let condition = Some(self.parse_expression()?);
        self.expect(&TokenKind::Semicolon)?;

        let increment_expr = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;

        let body = self.parse_block()?;

        Ok(Stmt::For {
            init,
            condition,
            increment: Some(Box::new(Stmt::ExprStmt {
                expr: increment_expr,
                line,
            })),
            body,
            line,
        })
    }

    fn parse_while_statement(&mut self) -> Result<Stmt, HplError> {
        let (line, _) = self.position();
        self.expect_keyword("while")?;
        self.expect(&TokenKind::LParen)?;
        let condition = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::While {
            condition,
            body,
            line,
        })
    }

    fn parse_try_catch_statement(&mut self) -> Result<Stmt, HplError> {
        let (line, _) = self.position();
        self.expect_keyword("try")?;
        let try_block = self.parse_block()?;

        self.expect_keyword("catch")?;
        self.expect(&TokenKind::LParen)?;
        let catch_var = self.expect_identifier()?;
        self.expect(&TokenKind::RParen)?;

        let catch_block = self.parse_block()?;

        Ok(Stmt::TryCatch {
            try_block,
            catch_var,
            catch_block,
            line,
        })
    }

    fn parse_import_statement(&mut self) -> Result<Stmt, HplError> {
        let (line, _) = self.position();
        self.expect_keyword("import")?;

        let module = self.expect_identifier()?;

        let alias = if matches!(self.current_kind(), TokenKind::Keyword(k) if k == "as") {
            self.advance();
            Some(self.expect_identifier()?)
        } else {
            None
        };

        Ok(Stmt::Import {
            module,
            alias,
            line,
        })
    }

    pub fn parse_expression(&mut self) -> Result<Expr, HplError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, HplError> {
        let mut left = self.parse_and()?;
        while matches!(self.current_kind(), TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::BinaryOp {
                left: Box::new(left),
                op: BinOp::Or,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, HplError> {
        let mut left = self.parse_equality()?;
        while matches!(self.current_kind(), TokenKind::And) {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::BinaryOp {
                left: Box::new(left),
                op: BinOp::And,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, HplError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Eq => BinOp::Eq,
                TokenKind::Ne => BinOp::NotEq,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, HplError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::LtEq,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::GtEq,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, HplError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, HplError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Mul => BinOp::Mul,
                TokenKind::Div => BinOp::Div,
                TokenKind::Mod => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, HplError> {
        if matches!(self.current_kind(), TokenKind::Not) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::UnaryOp {
                op: UnOp::Not,
                operand: Box::new(operand),
            });
        }

        if matches!(self.current_kind(), TokenKind::Minus) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::BinaryOp {
                left: Box::new(Expr::IntLiteral(0)),
                op: BinOp::Sub,
                right: Box::new(operand),
            });
        }

        self.parse_primary()
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, HplError> {
        self.advance(); // consume '('
        let mut args = Vec::new();
        if !matches!(self.current_kind(), TokenKind::RParen) {
            args.push(self.parse_expression()?);
            while matches!(self.current_kind(), TokenKind::Comma) {
                self.advance();
                args.push(self.parse_expression()?);
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, HplError> {
        let (line, column) = self.position();

        match self.current_kind().clone() {
            TokenKind::Boolean(b) => {
                self.advance();
                Ok(Expr::BoolLiteral(b))
            }
            TokenKind::Int(n) => {
                self.advance();
                Ok(Expr::IntLiteral(n))
            }
            TokenKind::Float(n) => {
                self.advance();
                Ok(Expr::FloatLiteral(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::StringLiteral(s))
            }
            TokenKind::Identifier(name) => {
                self.advance();

                if matches!(self.current_kind(), TokenKind::LParen) {
                    let args = self.parse_call_args()?;
                    return Ok(Expr::FunctionCall { name, args });
                }

                if matches!(self.current_kind(), TokenKind::Dot) {
                    self.advance();
                    let member_name = self.expect_identifier()?;
                    if matches!(self.current_kind(), TokenKind::LParen) {
                        let args = self.parse_call_args()?;
                        return Ok(Expr::MethodCall {
                            receiver: Box::new(Expr::Variable(name)),
                            name: member_name,
                            args,
                        });
                    }
                    return Ok(Expr::MemberAccess {
                        receiver: Box::new(Expr::Variable(name)),
                        name: member_name,
                    });
                }

                if matches!(self.current_kind(), TokenKind::Increment) {
                    self.advance();
                    return Ok(Expr::PostfixIncrement(Box::new(Expr::Variable(name))));
                }

                if matches!(self.current_kind(), TokenKind::LBracket) {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&TokenKind::RBracket)?;
                    return Ok(Expr::ArrayAccess {
                        array: Box::new(Expr::Variable(name)),
                        index: Box::new(index),
                    });
                }

                Ok(Expr::Variable(name))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !matches!(self.current_kind(), TokenKind::RBracket) {
                    elements.push(self.parse_expression()?);
                    while matches!(self.current_kind(), TokenKind::Comma) {
                        self.advance();
                        elements.push(self.parse_expression()?);
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Expr::ArrayLiteral(elements))
            }
            other => Err(HplError::syntax(
                format!("unexpected token {:?}", other),
                line,
                column,
                "UNEXPECTED_TOKEN",
            )),
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), HplError> {
        if self.current_kind() != kind {
            let (line, column) = self.position();
            return Err(HplError::syntax(
                format!("expected {:?}, got {:?}", kind, self.current_kind()),
                line,
                column,
                "UNEXPECTED_TOKEN",
            ));
        }
        self.advance();
        Ok(())
    }

    fn expect_keyword(&mut self, value: &str) -> Result<(), HplError> {
        let matches = matches!(self.current_kind(), TokenKind::Keyword(k) if k == value);
        if !matches {
            let (line, column) = self.position();
            return Err(HplError::syntax(
                format!("expected keyword '{}', got {:?}", value, self.current_kind()),
                line,
                column,
                "UNEXPECTED_TOKEN",
            ));
        }
        self.advance();
        Ok(())
    }

    fn expect_identifier(&mut self) -> Result<String, HplError> {
        if let TokenKind::Identifier(name) = self.current_kind().clone() {
            self.advance();
            Ok(name)
        } else {
            let (line, column) = self.position();
            Err(HplError::syntax(
                format!("expected identifier, got {:?}", self.current_kind()),
                line,
                column,
                "UNEXPECTED_TOKEN",
            ))
        }
    }
}

/// Parses a raw `(params) => { body }` source fragment (as handed out
/// by the document loader) into an `HplFunction`.
pub fn parse_arrow_function(name: &str, source: &str) -> Result<Rc<HplFunction>, HplError> {
    let source = source.trim();
    let start = source.find('(').ok_or_else(|| {
        HplError::syntax(
            format!("function '{}': missing parameter list", name),
            1,
            1,
            "ARROW_SYNTAX_ERROR",
        )
    })?;
    let end = source.find(')').ok_or_else(|| {
        HplError::syntax(
            format!("function '{}': missing closing ')'", name),
            1,
            1,
            "ARROW_SYNTAX_ERROR",
        )
    })?;
    let params_str = source[start + 1..end].trim();
    let params: Vec<String> = if params_str.is_empty() {
        Vec::new()
    } else {
        params_str.split(',').map(|p| p.trim().to_string()).collect()
    };

    let arrow_pos = source[end..].find("=>").map(|p| p + end).ok_or_else(|| {
        HplError::syntax(
            format!("function '{}': => not found", name),
            1,
            1,
            "ARROW_SYNTAX_ERROR",
        )
    })?;

    let body_start = source[arrow_pos..].find('{').map(|p| p + arrow_pos);
    let body_end = source.rfind('}');
    let (body_start, body_end) = match (body_start, body_end) {
        (Some(s), Some(e)) if e > s => (s, e),
        _ => {
            return Err(HplError::syntax(
                format!("function '{}': braces not found", name),
                1,
                1,
                "ARROW_SYNTAX_ERROR",
            ))
        }
    };
    let body_str = source[body_start + 1..body_end].trim();

    let tokens = lexer::tokenize(body_str)?;
    let mut parser = Parser::new(tokens);
    let body = parser.parse_block()?;

    Ok(Rc::new(HplFunction {
        name: name.to_string(),
        params,
        body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_expr(src: &str) -> Expr {
        let tokens = lexer::tokenize(src).unwrap();
        Parser::new(tokens).parse_expression().unwrap()
    }

    #[test]
    fn precedence_multiplication_binds_tighter_than_addition() {
        let expr = parse_expr("1 + 2 * 3");
        match expr {
            Expr::BinaryOp { op: BinOp::Add, right, .. } => {
                assert!(matches!(*right, Expr::BinaryOp { op: BinOp::Mul, .. }));
            }
            _ => panic!("expected Add at top level"),
        }
    }

    #[test]
    fn unary_minus_desugars_to_zero_minus_operand() {
        let expr = parse_expr("-x");
        match expr {
            Expr::BinaryOp { left, op: BinOp::Sub, .. } => {
                assert!(matches!(*left, Expr::IntLiteral(0)));
            }
            _ => panic!("expected desugared subtraction"),
        }
    }

    #[test]
    fn parses_function_call_with_args() {
        let expr = parse_expr("len(x, 1)");
        match expr {
            Expr::FunctionCall { name, args } => {
                assert_eq!(name, "len");
                assert_eq!(args.len(), 2);
            }
            _ => panic!("expected FunctionCall"),
        }
    }

    #[test]
    fn dot_without_parens_is_member_access() {
        let expr = parse_expr("math.PI");
        assert!(matches!(expr, Expr::MemberAccess { .. }));
    }

    #[test]
    fn dot_with_parens_is_method_call() {
        let expr = parse_expr("obj.greet(1)");
        assert!(matches!(expr, Expr::MethodCall { .. }));
    }

    #[test]
    fn parses_arrow_function_source() {
        let func = parse_arrow_function("main", "(x) => { return x + 1 }").unwrap();
        assert_eq!(func.params, vec!["x".to_string()]);
        assert_eq!(func.body.len(), 1);
    }

    #[test]
    fn array_assignment_statement() {
        let tokens = lexer::tokenize("arr[0] = 5").unwrap();
        let stmt = Parser::new(tokens).parse_statement().unwrap();
        assert!(matches!(stmt, Stmt::ArrayAssignment { .. }));
    }

    #[test]
    fn array_access_without_assignment_is_expression() {
        let tokens = lexer::tokenize("arr[0]").unwrap();
        let stmt = Parser::new(tokens).parse_statement().unwrap();
        assert!(matches!(stmt, Stmt::ExprStmt { .. }));
    }
}
