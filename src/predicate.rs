//! Channel filter predicates.
//!
//! Channel definitions carry a filter written against `messages` columns,
//! e.g. `sender LIKE '%@github.com%' AND is_read = 0`. The text is parsed
//! into a small expression tree restricted to known columns and literal
//! values, then compiled back to SQL with every literal bound as a
//! parameter. Anything outside the grammar is rejected at parse time.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    Sender,
    Recipient,
    Subject,
    Snippet,
    Timestamp,
    Body,
    Summary,
    Importance,
    Deadline,
    IsRead,
}

impl Column {
    fn from_ident(ident: &str) -> Option<Self> {
        let column = match ident.to_ascii_lowercase().as_str() {
            "id" => Self::Id,
            "sender" => Self::Sender,
            "recipient" => Self::Recipient,
            "subject" => Self::Subject,
            "snippet" => Self::Snippet,
            "timestamp" => Self::Timestamp,
            "body" => Self::Body,
            "summary" => Self::Summary,
            "importance" => Self::Importance,
            "deadline" => Self::Deadline,
            "is_read" => Self::IsRead,
            _ => return None,
        };
        Some(column)
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Sender => "sender",
            Self::Recipient => "recipient",
            Self::Subject => "subject",
            Self::Snippet => "snippet",
            Self::Timestamp => "timestamp",
            Self::Body => "body",
            Self::Summary => "summary",
            Self::Importance => "importance",
            Self::Deadline => "deadline",
            Self::IsRead => "is_read",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Column(Column),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Bool(bool),
    Compare {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
    Like {
        column: Column,
        pattern: String,
        negated: bool,
    },
    IsNull {
        column: Column,
        negated: bool,
    },
    In {
        column: Column,
        values: Vec<Value>,
        negated: bool,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    expr: Expr,
}

impl Predicate {
    pub fn match_all() -> Self {
        Self {
            expr: Expr::Bool(true),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(Error::InvalidPredicate("empty predicate".to_string()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::InvalidPredicate(format!(
                "unexpected {:?} after end of expression",
                tok
            )));
        }
        Ok(Self { expr })
    }

    /// Parses `input`, degrading to [`Predicate::match_all`] when it is not
    /// a valid predicate.
    pub fn parse_or_match_all(input: &str) -> Self {
        match Self::parse(input) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Predicate {:?} rejected, matching everything: {}", input, e);
                Self::match_all()
            }
        }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// SQL fragment with `?` placeholders and the values to bind, in order.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        write_expr(&self.expr, &mut sql, &mut params);
        (sql, params)
    }
}

fn write_operand(operand: &Operand, sql: &mut String, params: &mut Vec<Value>) {
    match operand {
        Operand::Column(c) => sql.push_str(c.as_sql()),
        Operand::Literal(v) => {
            sql.push('?');
            params.push(v.clone());
        }
    }
}

fn write_expr(expr: &Expr, sql: &mut String, params: &mut Vec<Value>) {
    match expr {
        Expr::Bool(true) => sql.push_str("1"),
        Expr::Bool(false) => sql.push_str("0"),
        Expr::Compare { lhs, op, rhs } => {
            write_operand(lhs, sql, params);
            sql.push(' ');
            sql.push_str(op.as_sql());
            sql.push(' ');
            write_operand(rhs, sql, params);
        }
        Expr::Like {
            column,
            pattern,
            negated,
        } => {
            sql.push_str(column.as_sql());
            sql.push_str(if *negated { " NOT LIKE ?" } else { " LIKE ?" });
            params.push(Value::Text(pattern.clone()));
        }
        Expr::IsNull { column, negated } => {
            sql.push_str(column.as_sql());
            sql.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
        }
        Expr::In {
            column,
            values,
            negated,
        } => {
            sql.push_str(column.as_sql());
            sql.push_str(if *negated { " NOT IN (" } else { " IN (" });
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push('?');
                params.push(v.clone());
            }
            sql.push(')');
        }
        Expr::Not(inner) => {
            sql.push_str("(NOT ");
            write_expr(inner, sql, params);
            sql.push(')');
        }
        Expr::And(a, b) | Expr::Or(a, b) => {
            let joiner = if matches!(expr, Expr::And(..)) {
                " AND "
            } else {
                " OR "
            };
            sql.push('(');
            write_expr(a, sql, params);
            sql.push_str(joiner);
            write_expr(b, sql, params);
            sql.push(')');
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    Op(CmpOp),
    Minus,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let invalid = |msg: String| Error::InvalidPredicate(msg);
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '=' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                }
                tokens.push(Token::Op(CmpOp::Eq));
            }
            '!' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) => tokens.push(Token::Op(CmpOp::Ne)),
                    _ => return Err(invalid(format!("stray '!' at offset {}", start))),
                }
            }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some((_, '=')) => {
                        chars.next();
                        tokens.push(Token::Op(CmpOp::Le));
                    }
                    Some((_, '>')) => {
                        chars.next();
                        tokens.push(Token::Op(CmpOp::Ne));
                    }
                    _ => tokens.push(Token::Op(CmpOp::Lt)),
                }
            }
            '>' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push(Token::Op(CmpOp::Ge));
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                }
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\'')) => {
                            // '' is an escaped quote inside a literal
                            if matches!(chars.peek(), Some((_, '\''))) {
                                chars.next();
                                text.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some((_, ch)) => text.push(ch),
                        None => {
                            return Err(invalid(format!(
                                "unterminated string starting at offset {}",
                                start
                            )));
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let n = digits
                    .parse::<i64>()
                    .map_err(|_| invalid(format!("integer {} out of range", digits)))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if !(d.is_ascii_alphanumeric() || d == '_') {
                        break;
                    }
                    ident.push(d);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(invalid(format!(
                    "unexpected character {:?} at offset {}",
                    other, start
                )));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", keyword)))
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(&format!("{:?}", token)))
        }
    }

    fn unexpected(&self, wanted: &str) -> Error {
        match self.peek() {
            Some(tok) => Error::InvalidPredicate(format!("expected {}, found {:?}", wanted, tok)),
            None => Error::InvalidPredicate(format!("expected {}, found end of input", wanted)),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("OR") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not()?;
        while self.eat_keyword("AND") {
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_keyword("NOT") {
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        if self.eat_keyword("TRUE") {
            return Ok(Expr::Bool(true));
        }
        if self.eat_keyword("FALSE") {
            return Ok(Expr::Bool(false));
        }

        let lhs = self.parse_operand()?;

        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.parse_operand()?;
            return Ok(Expr::Compare { lhs, op, rhs });
        }

        let column = match lhs {
            Operand::Column(c) => c,
            Operand::Literal(_) => return Err(self.unexpected("comparison operator")),
        };

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Expr::IsNull { column, negated });
        }

        let negated = self.eat_keyword("NOT");
        if self.eat_keyword("LIKE") {
            return match self.next() {
                Some(Token::Str(pattern)) => Ok(Expr::Like {
                    column,
                    pattern,
                    negated,
                }),
                _ => Err(Error::InvalidPredicate(
                    "LIKE requires a string pattern".to_string(),
                )),
            };
        }
        if self.eat_keyword("IN") {
            self.expect(Token::LParen)?;
            let mut values = vec![self.parse_literal()?];
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                values.push(self.parse_literal()?);
            }
            self.expect(Token::RParen)?;
            return Ok(Expr::In {
                column,
                values,
                negated,
            });
        }

        Err(self.unexpected("comparison, LIKE, IN or IS"))
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        if let Some(Token::Ident(ident)) = self.peek() {
            let column = Column::from_ident(ident)
                .ok_or_else(|| Error::InvalidPredicate(format!("unknown column {:?}", ident)))?;
            self.pos += 1;
            return Ok(Operand::Column(column));
        }
        Ok(Operand::Literal(self.parse_literal()?))
    }

    fn parse_literal(&mut self) -> Result<Value> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Value::Int(n)),
            Some(Token::Str(s)) => Ok(Value::Text(s)),
            Some(Token::Minus) => match self.next() {
                Some(Token::Int(n)) => Ok(Value::Int(-n)),
                _ => Err(Error::InvalidPredicate(
                    "'-' must be followed by an integer".to_string(),
                )),
            },
            Some(tok) => Err(Error::InvalidPredicate(format!(
                "expected a value, found {:?}",
                tok
            ))),
            None => Err(Error::InvalidPredicate(
                "expected a value, found end of input".to_string(),
            )),
        }
    }
}
