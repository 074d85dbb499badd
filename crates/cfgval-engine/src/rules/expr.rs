//! XPath subset used by must and when expressions.
//!
//! Supported: `or`, `and`, `= != < <= > >=`, string and number literals,
//! `count()`, `not()`, `contains()`, `string-length()`, `true()`, `false()`,
//! `current()` with a trailing path, absolute `/.../T_LIST[pred]/field` paths,
//! relative `../field` paths and `/operation/operation`. Module prefixes
//! (`mod:`) are ignored.

use cfgval_core::{Operation, SchemaModel};

use crate::tree::{DataTree, EntryNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DotDot,
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Cmp(CmpOp),
    Name(String),
    Str(String),
    Num(f64),
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '.' if next == Some('.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += 1;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ne));
                i += 2;
            }
            '<' | '>' => {
                let op = match (c, next == Some('=')) {
                    ('<', true) => CmpOp::Le,
                    ('<', false) => CmpOp::Lt,
                    (_, true) => CmpOp::Ge,
                    (_, false) => CmpOp::Gt,
                };
                tokens.push(Token::Cmp(op));
                i += if next == Some('=') { 2 } else { 1 };
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| format!("unterminated string literal at offset {i}"))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{literal}'"))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-' | ':' | '@'))
                {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}' at offset {i}")),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Count,
    Not,
    Contains,
    StringLength,
    True,
    False,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize)> {
        match name {
            "count" => Some((Func::Count, 1)),
            "not" => Some((Func::Not, 1)),
            "contains" => Some((Func::Contains, 2)),
            "string-length" => Some((Func::StringLength, 1)),
            "true" => Some((Func::True, 0)),
            "false" => Some((Func::False, 0)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathStart {
    Root,
    Relative,
    Current,
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Parent,
    Current,
    Child { name: String, predicates: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
struct Path {
    start: PathStart,
    steps: Vec<Step>,
}

impl Path {
    fn last_child(steps: &[Step]) -> Option<&str> {
        steps.iter().rev().find_map(|step| match step {
            Step::Child { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Str(String),
    Num(f64),
    Call(FuncCall),
    Path(PathExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncCall {
    func: Func,
    args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr(Path);

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {expected:?}, found {token:?}")),
            None => Err(format!("expected {expected:?}, found end of expression")),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(name)) if name == keyword)
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.is_keyword("or") {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_compare()?;
        while self.is_keyword("and") {
            self.advance();
            let rhs = self.parse_compare()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_compare(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_primary()?;
        while let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.advance();
            let rhs = self.parse_primary()?;
            lhs = Expr::Compare(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.peek().cloned() {
            Some(Token::Str(value)) => {
                self.advance();
                Ok(Expr::Str(value))
            }
            Some(Token::Num(value)) => {
                self.advance();
                Ok(Expr::Num(value))
            }
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Slash) => {
                let mut steps = Vec::new();
                self.parse_trailing_steps(&mut steps)?;
                Ok(Expr::Path(PathExpr(Path {
                    start: PathStart::Root,
                    steps,
                })))
            }
            Some(Token::Name(name)) if self.peek_at(1) == Some(&Token::LParen) => {
                self.advance();
                self.parse_call(&name)
            }
            Some(Token::Name(_)) | Some(Token::Dot) | Some(Token::DotDot) => {
                let mut steps = vec![self.parse_step()?];
                self.parse_trailing_steps(&mut steps)?;
                Ok(Expr::Path(PathExpr(Path {
                    start: PathStart::Relative,
                    steps,
                })))
            }
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, String> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            args.push(self.parse_or()?);
            while self.peek() == Some(&Token::Comma) {
                self.advance();
                args.push(self.parse_or()?);
            }
        }
        self.expect(Token::RParen)?;

        if name == "current" {
            if !args.is_empty() {
                return Err("current() takes no arguments".to_string());
            }
            let mut steps = Vec::new();
            self.parse_trailing_steps(&mut steps)?;
            return Ok(Expr::Path(PathExpr(Path {
                start: PathStart::Current,
                steps,
            })));
        }

        let (func, arity) = Func::lookup(name).ok_or_else(|| format!("unknown function '{name}()'"))?;
        if args.len() != arity {
            return Err(format!(
                "{name}() takes {arity} argument(s), got {}",
                args.len()
            ));
        }
        Ok(Expr::Call(FuncCall { func, args }))
    }

    fn parse_trailing_steps(&mut self, steps: &mut Vec<Step>) -> Result<(), String> {
        while self.peek() == Some(&Token::Slash) {
            self.advance();
            steps.push(self.parse_step()?);
        }
        Ok(())
    }

    fn parse_step(&mut self) -> Result<Step, String> {
        match self.advance() {
            Some(Token::DotDot) => Ok(Step::Parent),
            Some(Token::Dot) => Ok(Step::Current),
            Some(Token::Name(name)) => {
                let mut predicates = Vec::new();
                while self.peek() == Some(&Token::LBracket) {
                    self.advance();
                    predicates.push(self.parse_or()?);
                    self.expect(Token::RBracket)?;
                }
                Ok(Step::Child {
                    name: strip_prefix(&name).to_string(),
                    predicates,
                })
            }
            Some(token) => Err(format!("expected path step, found {token:?}")),
            None => Err("expected path step, found end of expression".to_string()),
        }
    }
}

fn strip_prefix(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Compile an expression, rejecting unknown functions and malformed paths.
pub fn compile(text: &str) -> Result<Expr, String> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
    };
    let expr = parser.parse_or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(format!("trailing token {token:?}")),
    }
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Node-set, as the string values of its nodes.
    Nodes(Vec<String>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Str(value) => !value.is_empty(),
            Value::Num(value) => *value != 0.0 && !value.is_nan(),
            Value::Bool(value) => *value,
        }
    }

    pub fn number(&self) -> f64 {
        match self {
            Value::Nodes(nodes) => nodes
                .first()
                .map(|node| parse_number(node))
                .unwrap_or(f64::NAN),
            Value::Str(value) => parse_number(value),
            Value::Num(value) => *value,
            Value::Bool(value) => f64::from(u8::from(*value)),
        }
    }

    pub fn string(&self) -> String {
        match self {
            Value::Nodes(nodes) => nodes.first().cloned().unwrap_or_default(),
            Value::Str(value) => value.clone(),
            Value::Num(value) if value.is_finite() && value.fract() == 0.0 => {
                format!("{}", *value as i64)
            }
            Value::Num(value) => value.to_string(),
            Value::Bool(value) => value.to_string(),
        }
    }
}

fn parse_number(text: &str) -> f64 {
    text.trim().parse::<f64>().unwrap_or(f64::NAN)
}

fn compare_numbers(op: CmpOp, lhs: f64, rhs: f64) -> bool {
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        CmpOp::Lt => lhs < rhs,
        CmpOp::Le => lhs <= rhs,
        CmpOp::Gt => lhs > rhs,
        CmpOp::Ge => lhs >= rhs,
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Nodes(_), Value::Bool(_)) | (Value::Bool(_), Value::Nodes(_)) => {
            compare(op, &Value::Bool(lhs.truthy()), &Value::Bool(rhs.truthy()))
        }
        (Value::Nodes(nodes), _) => nodes
            .iter()
            .any(|node| compare(op, &Value::Str(node.clone()), rhs)),
        (_, Value::Nodes(nodes)) => nodes
            .iter()
            .any(|node| compare(op, lhs, &Value::Str(node.clone()))),
        _ => match op {
            CmpOp::Eq | CmpOp::Ne => {
                let equal = if matches!(lhs, Value::Bool(_)) || matches!(rhs, Value::Bool(_)) {
                    lhs.truthy() == rhs.truthy()
                } else if matches!(lhs, Value::Num(_)) || matches!(rhs, Value::Num(_)) {
                    lhs.number() == rhs.number()
                } else {
                    lhs.string() == rhs.string()
                };
                if op == CmpOp::Eq { equal } else { !equal }
            }
            _ => compare_numbers(op, lhs.number(), rhs.number()),
        },
    }
}

/// Evaluation context: the entry the expression hangs off and the data view.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub schema: &'a SchemaModel,
    pub view: &'a DataTree,
    pub table: &'a str,
    pub entry: &'a EntryNode,
    /// Field the expression is attached to, `None` at list level.
    pub node: Option<&'a str>,
    pub op: Operation,
}

/// List entry a predicate is being tested against.
#[derive(Clone, Copy)]
struct Focus<'a> {
    table: &'a str,
    entry: &'a EntryNode,
}

/// Field values, falling back to the schema default when absent.
fn field_values(schema: &SchemaModel, table: &str, entry: &EntryNode, field: &str) -> Vec<String> {
    if entry.contains(field) {
        return entry.values(field).to_vec();
    }
    schema
        .table(table)
        .and_then(|info| info.default_value(field))
        .map(|default| vec![default.to_string()])
        .unwrap_or_default()
}

impl Expr {
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Value, String> {
        self.eval(ctx, None)
    }

    pub fn is_true(&self, ctx: &EvalContext<'_>) -> Result<bool, String> {
        Ok(self.evaluate(ctx)?.truthy())
    }

    fn eval(&self, ctx: &EvalContext<'_>, focus: Option<Focus<'_>>) -> Result<Value, String> {
        match self {
            Expr::Or(lhs, rhs) => Ok(Value::Bool(
                lhs.eval(ctx, focus)?.truthy() || rhs.eval(ctx, focus)?.truthy(),
            )),
            Expr::And(lhs, rhs) => Ok(Value::Bool(
                lhs.eval(ctx, focus)?.truthy() && rhs.eval(ctx, focus)?.truthy(),
            )),
            Expr::Compare(op, lhs, rhs) => {
                let lhs = lhs.eval(ctx, focus)?;
                let rhs = rhs.eval(ctx, focus)?;
                Ok(Value::Bool(compare(*op, &lhs, &rhs)))
            }
            Expr::Str(value) => Ok(Value::Str(value.clone())),
            Expr::Num(value) => Ok(Value::Num(*value)),
            Expr::Call(call) => call.eval(ctx, focus),
            Expr::Path(PathExpr(path)) => eval_path(path, ctx, focus),
        }
    }
}

impl FuncCall {
    fn eval(&self, ctx: &EvalContext<'_>, focus: Option<Focus<'_>>) -> Result<Value, String> {
        let arg = |index: usize| -> Result<Value, String> {
            self.args
                .get(index)
                .ok_or_else(|| format!("missing argument {index}"))?
                .eval(ctx, focus)
        };
        match self.func {
            Func::Count => match arg(0)? {
                Value::Nodes(nodes) => Ok(Value::Num(nodes.len() as f64)),
                other => Err(format!("count() expects a node-set, got {other:?}")),
            },
            Func::Not => Ok(Value::Bool(!arg(0)?.truthy())),
            Func::Contains => Ok(Value::Bool(arg(0)?.string().contains(&arg(1)?.string()))),
            Func::StringLength => Ok(Value::Num(arg(0)?.string().chars().count() as f64)),
            Func::True => Ok(Value::Bool(true)),
            Func::False => Ok(Value::Bool(false)),
        }
    }
}

fn list_table<'a>(schema: &'a SchemaModel, step: &str) -> Option<&'a str> {
    let table = step.strip_suffix("_LIST")?;
    schema.table(table).map(|info| info.name.as_str())
}

fn eval_path(path: &Path, ctx: &EvalContext<'_>, focus: Option<Focus<'_>>) -> Result<Value, String> {
    if path.start != PathStart::Current {
        let list_step = path.steps.iter().enumerate().find_map(|(index, step)| match step {
            Step::Child { name, predicates } => {
                list_table(ctx.schema, name).map(|table| (index, table, predicates))
            }
            _ => None,
        });

        if let Some((index, table, predicates)) = list_step {
            let mut selected = Vec::new();
            for (key, entry) in ctx.view.entries(table) {
                let candidate = Focus { table, entry };
                let mut keep = true;
                for predicate in predicates {
                    if !predicate.eval(ctx, Some(candidate))?.truthy() {
                        keep = false;
                        break;
                    }
                }
                if keep {
                    selected.push((key, entry));
                }
            }

            return Ok(Value::Nodes(match Path::last_child(&path.steps[index + 1..]) {
                None => selected.into_iter().map(|(key, _)| key.clone()).collect(),
                Some(field) => selected
                    .into_iter()
                    .flat_map(|(_, entry)| field_values(ctx.schema, table, entry, field))
                    .collect(),
            }));
        }
    }

    let node_values = || {
        ctx.node
            .map(|node| field_values(ctx.schema, ctx.table, ctx.entry, node))
            .unwrap_or_default()
    };

    match path.start {
        PathStart::Root => {
            let names: Vec<&str> = path
                .steps
                .iter()
                .filter_map(|step| match step {
                    Step::Child { name, .. } => Some(name.as_str()),
                    _ => None,
                })
                .collect();
            if names == ["operation", "operation"] {
                Ok(Value::Str(ctx.op.as_str().to_string()))
            } else {
                Ok(Value::Nodes(Vec::new()))
            }
        }
        PathStart::Current => Ok(Value::Nodes(match Path::last_child(&path.steps) {
            Some(field) => field_values(ctx.schema, ctx.table, ctx.entry, field),
            None => node_values(),
        })),
        PathStart::Relative => {
            let (table, entry) = match focus {
                Some(focus) => (focus.table, focus.entry),
                None => (ctx.table, ctx.entry),
            };
            Ok(Value::Nodes(match Path::last_child(&path.steps) {
                Some(field) => field_values(ctx.schema, table, entry, field),
                None if focus.is_none() => node_values(),
                None => Vec::new(),
            }))
        }
    }
}
