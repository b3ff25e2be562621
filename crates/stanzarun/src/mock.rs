//! # Tally
//!
//! A tiny scripting language used as a reference backend. It has integers,
//! strings, variables, one-line functions and a handful of statements for
//! poking at memory views:
//!
//! ```text
//! # comments run to the end of the line
//! let x = 1 + 2; let y = x  # statements end at a newline or `;`
//! def add(a, b) = a + b
//! add(x, $0)               # `$N` is the N-th argument
//! incr counter             # read, yield, write
//! fill $0 7                # set every byte of a memory view argument
//! bump $0                  # add one to every byte
//! checksum $0              # sum of the bytes
//! sleep 20                 # milliseconds
//! fail "boom"
//! ```
//!
//! A script evaluates to its last statement. The configuration may preload
//! variables: `{"vars": {"x": 1}}`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use anyhow::bail;

use stanzapack::Value;
use stanzarpc::Failure;
use stanzarpc::Outcome;

use crate::backend::Backend;
use crate::backend::BackendRegistry;
use crate::backend::ForeignFn;
use crate::engine::Engine;
use crate::memview::MemoryView;

pub const LANGUAGE: &str = "tally";

const MAX_DEPTH: usize = 64;

/// Registers the tally backend under [`LANGUAGE`].
pub fn register(registry: &BackendRegistry) {
    registry.register(LANGUAGE, |engine, config| {
        let backend: Box<dyn Backend> = Box::new(TallyBackend::new(engine, config)?);
        Ok(backend)
    });
}

// ============================================================================
//  Syntax
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Arg(usize),
    Plus,
    Open,
    Close,
    Comma,
    Assign,
    End,
}

fn tokenize(source: &str) -> anyhow::Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\r' => {}
            '\n' | ';' => tokens.push(Token::End),
            '#' => {
                while chars.next_if(|&c| c != '\n').is_some() {}
            }
            '+' => tokens.push(Token::Plus),
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            ',' => tokens.push(Token::Comma),
            '=' => tokens.push(Token::Assign),
            '"' => {
                let mut text = String::new();
                loop {
                    match chars.next() {
                        None => bail!("unterminated string"),
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some(c @ ('"' | '\\')) => text.push(c),
                            other => bail!("bad escape {:?}", other),
                        },
                        Some(c) => text.push(c),
                    }
                }
                tokens.push(Token::Str(text));
            }
            '$' => {
                let mut digits = String::new();
                while let Some(d) = chars.next_if(char::is_ascii_digit) {
                    digits.push(d);
                }
                let index = digits.parse().with_context(|| format!("bad argument reference ${}", digits))?;
                tokens.push(Token::Arg(index));
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::from(c);
                while let Some(d) = chars.next_if(char::is_ascii_digit) {
                    digits.push(d);
                }
                tokens.push(Token::Int(digits.parse().with_context(|| format!("number {} is too large", digits))?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut name = String::from(c);
                while let Some(d) = chars.next_if(|&c| c.is_alphanumeric() || c == '_') {
                    name.push(d);
                }
                tokens.push(Token::Ident(name));
            }
            other => bail!("unexpected character {:?}", other),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Lit(Value),
    Var(String),
    Arg(usize),
    Call(String, Vec<Expr>),
    Add(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
enum Stmt {
    Let(String, Expr),
    Incr(String),
    Def(String, Vec<String>, Expr),
    Fail(Expr),
    Fill(usize, Expr),
    Bump(usize),
    Checksum(usize),
    Sleep(Expr),
    Expr(Expr),
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> anyhow::Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => bail!("expected {:?}, found {:?}", expected, other),
        }
    }

    fn ident(&mut self) -> anyhow::Result<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name.clone()),
            other => bail!("expected a name, found {:?}", other),
        }
    }

    fn arg(&mut self) -> anyhow::Result<usize> {
        match self.next() {
            Some(Token::Arg(index)) => Ok(*index),
            other => bail!("expected an argument reference, found {:?}", other),
        }
    }

    fn statement(&mut self) -> anyhow::Result<Stmt> {
        let keyword = match self.peek() {
            Some(Token::Ident(word)) => word.as_str(),
            _ => "",
        };
        let stmt = match keyword {
            "let" => {
                self.pos += 1;
                let name = self.ident()?;
                self.expect(&Token::Assign)?;
                Stmt::Let(name, self.expr()?)
            }
            "incr" => {
                self.pos += 1;
                Stmt::Incr(self.ident()?)
            }
            "def" => {
                self.pos += 1;
                let name = self.ident()?;
                self.expect(&Token::Open)?;
                let mut params = Vec::new();
                if self.peek() != Some(&Token::Close) {
                    params.push(self.ident()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                        params.push(self.ident()?);
                    }
                }
                self.expect(&Token::Close)?;
                self.expect(&Token::Assign)?;
                Stmt::Def(name, params, self.expr()?)
            }
            "fail" => {
                self.pos += 1;
                Stmt::Fail(self.expr()?)
            }
            "fill" => {
                self.pos += 1;
                let index = self.arg()?;
                Stmt::Fill(index, self.expr()?)
            }
            "bump" => {
                self.pos += 1;
                Stmt::Bump(self.arg()?)
            }
            "checksum" => {
                self.pos += 1;
                Stmt::Checksum(self.arg()?)
            }
            "sleep" => {
                self.pos += 1;
                Stmt::Sleep(self.expr()?)
            }
            _ => Stmt::Expr(self.expr()?),
        };

        if let Some(token) = self.peek() {
            bail!("unexpected {:?}", token);
        }
        Ok(stmt)
    }

    fn expr(&mut self) -> anyhow::Result<Expr> {
        let mut lhs = self.term()?;
        while self.peek() == Some(&Token::Plus) {
            self.pos += 1;
            lhs = Expr::Add(Box::new(lhs), Box::new(self.term()?));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> anyhow::Result<Expr> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Lit(Value::Int(*n))),
            Some(Token::Str(s)) => Ok(Expr::Lit(Value::String(s.clone()))),
            Some(Token::Arg(index)) => Ok(Expr::Arg(*index)),
            Some(Token::Open) => {
                let inner = self.expr()?;
                self.expect(&Token::Close)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if self.peek() == Some(&Token::Open) => {
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::Close) {
                    args.push(self.expr()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                        args.push(self.expr()?);
                    }
                }
                self.expect(&Token::Close)?;
                Ok(Expr::Call(name.clone(), args))
            }
            Some(Token::Ident(name)) => Ok(Expr::Var(name.clone())),
            other => bail!("expected an expression, found {:?}", other),
        }
    }
}

/// Parses a whole script up front, so a syntax error runs nothing.
fn parse(source: &str) -> anyhow::Result<Vec<Stmt>> {
    let tokens = tokenize(source)?;
    tokens
        .split(|t| *t == Token::End)
        .filter(|line| !line.is_empty())
        .map(|line| Parser { tokens: line, pos: 0 }.statement())
        .collect()
}

// ============================================================================
//  Evaluation
// ============================================================================

enum Function {
    Defined { params: Vec<String>, body: Expr },
    Native { function: ForeignFn, arity: usize },
}

struct Frame<'a> {
    locals: Option<&'a HashMap<String, Value>>,
    args: &'a [Value],
}

/// An interpreter instance; one per session.
pub struct TallyBackend {
    engine: Engine,
    config: Value,
    vars: HashMap<String, Value>,
    functions: HashMap<String, Function>,
    destroyed: bool,
}

impl TallyBackend {
    pub fn new(engine: &Engine, config: &Value) -> anyhow::Result<Self> {
        let mut vars = HashMap::new();
        let config = match config {
            Value::Null => Value::object(),
            Value::Object(map) => {
                match map.get("vars") {
                    None => {}
                    Some(Value::Object(preset)) => {
                        for (name, value) in preset.iter() {
                            vars.insert(name.to_string(), value.clone());
                        }
                    }
                    Some(other) => bail!("\"vars\" must be an object, found {}", other.kind()),
                }
                config.clone()
            }
            other => bail!("configuration must be an object, found {}", other.kind()),
        };

        Ok(Self { engine: engine.clone(), config, vars, functions: HashMap::new(), destroyed: false })
    }

    async fn run(&mut self, source: &str, args: &[Value]) -> anyhow::Result<Value> {
        let mut last = Value::Null;
        for stmt in parse(source)? {
            last = self.exec(stmt, args).await?;
        }
        Ok(last)
    }

    async fn exec(&mut self, stmt: Stmt, args: &[Value]) -> anyhow::Result<Value> {
        let top = Frame { locals: None, args };
        match stmt {
            Stmt::Let(name, expr) => {
                let value = self.eval(&expr, &top, 0)?;
                self.vars.insert(name, value);
                Ok(Value::Null)
            }
            Stmt::Incr(name) => {
                let current = match self.vars.get(&name) {
                    None => 0,
                    Some(value) => number(value).with_context(|| format!("{} is not a number", name))?,
                };
                tokio::task::yield_now().await;
                let next = Value::Int(current.checked_add(1).with_context(|| format!("integer overflow incrementing {}", name))?);
                self.vars.insert(name, next.clone());
                Ok(next)
            }
            Stmt::Def(name, params, body) => {
                self.functions.insert(name, Function::Defined { params, body });
                Ok(Value::Null)
            }
            Stmt::Fail(expr) => {
                let message = self.eval(&expr, &top, 0)?;
                bail!("{}", display(&message))
            }
            Stmt::Fill(index, expr) => {
                let byte = self.eval(&expr, &top, 0)?;
                let byte = number(&byte)
                    .and_then(|n| u8::try_from(n).ok())
                    .with_context(|| format!("{} is not a byte", display(&byte)))?;
                let view = self.view(args, index)?;
                let data = view.data().await?;
                data.with_mut(|bytes| bytes.fill(byte));
                view.release().await?;
                Ok(Value::UInt(data.len() as u64))
            }
            Stmt::Bump(index) => {
                let view = self.view(args, index)?;
                let data = view.data().await?;
                data.with_mut(|bytes| bytes.iter_mut().for_each(|b| *b = b.wrapping_add(1)));
                view.release().await?;
                Ok(Value::UInt(data.len() as u64))
            }
            Stmt::Checksum(index) => {
                let view = self.view(args, index)?;
                let data = view.data().await?;
                let sum = data.with(|bytes| bytes.iter().map(|&b| b as u64).sum::<u64>());
                view.release().await?;
                Ok(Value::UInt(sum))
            }
            Stmt::Sleep(expr) => {
                let ms = self.eval(&expr, &top, 0)?;
                let ms = number(&ms)
                    .and_then(|n| u64::try_from(n).ok())
                    .with_context(|| format!("cannot sleep for {}", display(&ms)))?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Value::Null)
            }
            Stmt::Expr(expr) => self.eval(&expr, &top, 0),
        }
    }

    fn view(&self, args: &[Value], index: usize) -> anyhow::Result<MemoryView> {
        let arg = args.get(index).with_context(|| format!("missing argument ${}", index))?;
        let view = MemoryView::from_value(&self.engine, arg).with_context(|| format!("${} is not a memory view", index))?;
        Ok(view)
    }

    fn eval(&self, expr: &Expr, frame: &Frame<'_>, depth: usize) -> anyhow::Result<Value> {
        match expr {
            Expr::Lit(value) => Ok(value.clone()),
            Expr::Var(name) => frame
                .locals
                .and_then(|locals| locals.get(name))
                .or_else(|| self.vars.get(name))
                .cloned()
                .with_context(|| format!("undefined variable {}", name)),
            Expr::Arg(index) => frame.args.get(*index).cloned().with_context(|| format!("missing argument ${}", index)),
            Expr::Add(lhs, rhs) => add(self.eval(lhs, frame, depth)?, self.eval(rhs, frame, depth)?),
            Expr::Call(name, args) => {
                let args = args.iter().map(|arg| self.eval(arg, frame, depth)).collect::<anyhow::Result<Vec<_>>>()?;
                self.apply(name, &args, depth + 1)
            }
        }
    }

    fn apply(&self, name: &str, args: &[Value], depth: usize) -> anyhow::Result<Value> {
        if depth > MAX_DEPTH {
            bail!("recursion limit reached in {}", name);
        }
        let function = self.functions.get(name).with_context(|| format!("undefined function {}", name))?;
        match function {
            Function::Defined { params, body } => {
                check_arity(name, params.len(), args.len())?;
                let locals: HashMap<String, Value> = params.iter().cloned().zip(args.iter().cloned()).collect();
                self.eval(body, &Frame { locals: Some(&locals), args: &[] }, depth)
            }
            Function::Native { function, arity } => {
                check_arity(name, *arity, args.len())?;
                function(args)
            }
        }
    }

    fn ensure_live<T>(&self) -> Option<Outcome<T>> {
        self.destroyed.then(|| Outcome::Failure(Failure::code("Session has been destroyed")))
    }
}

fn check_arity(name: &str, expected: usize, got: usize) -> anyhow::Result<()> {
    if expected != got {
        bail!("{} takes {} arguments, got {}", name, expected, got);
    }
    Ok(())
}

fn number(value: &Value) -> Option<i64> {
    match value {
        Value::Int(_) | Value::UInt(_) => value.as_i64(),
        _ => None,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_json_string(),
    }
}

fn add(lhs: Value, rhs: Value) -> anyhow::Result<Value> {
    if let (Some(a), Some(b)) = (number(&lhs), number(&rhs)) {
        return a.checked_add(b).map(Value::Int).context("integer overflow");
    }
    match (&lhs, &rhs) {
        (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(display(&lhs) + &display(&rhs))),
        _ => bail!("cannot add {} and {}", lhs.kind(), rhs.kind()),
    }
}

#[async_trait::async_trait]
impl Backend for TallyBackend {
    fn language(&self) -> &str {
        LANGUAGE
    }

    fn get_config(&self) -> String {
        self.config.to_json_string()
    }

    async fn execute(&mut self, code: &str, args: &[Value]) -> Outcome<Value> {
        if let Some(dead) = self.ensure_live() {
            return dead;
        }
        self.run(code, args).await.map_err(|e| Failure::code(format!("Error executing code: {:#}", e))).into()
    }

    async fn load(&mut self, path: &str, args: &[Value]) -> Outcome<Value> {
        if let Some(dead) = self.ensure_live() {
            return dead;
        }
        let source = match tokio::fs::read_to_string(path).await {
            Ok(source) => source,
            Err(e) => return Outcome::Failure(Failure::code(format!("Could not read file {}: {}", path, e))),
        };
        self.run(&source, args).await.map_err(|e| Failure::code(format!("Error loading {}: {:#}", path, e))).into()
    }

    async fn call(&mut self, function: &str, target: &str, args: &[Value]) -> Outcome<Value> {
        if let Some(dead) = self.ensure_live() {
            return dead;
        }
        if !target.is_empty() {
            return Outcome::Failure(Failure::code(format!("Could not find target {}", target)));
        }
        if !self.functions.contains_key(function) {
            return Outcome::Failure(Failure::code(format!("Could not find function {}", function)));
        }
        self.apply(function, args, 1).map_err(|e| Failure::code(format!("Error calling {}: {:#}", function, e))).into()
    }

    fn install(&mut self, name: &str, function: ForeignFn, arity: usize) -> Outcome<bool> {
        if let Some(dead) = self.ensure_live() {
            return dead;
        }
        let replaced = self.functions.insert(name.to_string(), Function::Native { function, arity });
        Outcome::Success(replaced.is_none())
    }

    async fn destroy(&mut self) -> Outcome<bool> {
        if let Some(dead) = self.ensure_live() {
            return dead;
        }
        self.vars.clear();
        self.functions.clear();
        self.destroyed = true;
        Outcome::Success(true)
    }
}
