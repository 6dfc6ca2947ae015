//! # Expression Evaluation
//!
//! A small C-like expression language evaluated against a frozen thread.
//!
//! ## Grammar
//!
//! ```text
//! expr     := unary (('+' | '-') unary)*
//! unary    := ('*' | '&' | '-') unary | postfix
//! postfix  := primary ('[' expr ']')*
//! primary  := INTEGER | CHAR | '$' NAME | NAME | '(' expr ')'
//! ```
//!
//! Integers are decimal or `0x` hex, characters are `'a'`-style literals
//! with the usual escapes. `$rax` reads a register, a bare name asks the
//! [`Symbolizer`](crate::target::Symbolizer) for a variable in the selected
//! frame.
//!
//! Evaluation only reads registers and memory; it never resumes, steps, or
//! writes to the inferior, so evaluating the same expression twice at one
//! stop yields the same [`Value`].

use std::fmt;

use crate::config::SessionConfig;
use crate::error::{MortemError, MortemResult};
use crate::snapshot::ThreadSnapshot;
use crate::target::read_le_word;
use crate::types::{Address, Frame, ValueType, VariableLocation};

/// Upper bound on elements loaded for one array value.
const MAX_ARRAY_ELEMENTS: usize = 1024;
/// Bytes requested per read while scanning a C string.
const CSTRING_CHUNK: usize = 64;
/// Deepest nesting of unary operators, parentheses and subscripts the
/// parser accepts.
const MAX_NESTING: usize = 256;

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value
{
    /// Integer; `raw` holds the bits truncated to the type's width.
    Int
    {
        /// Raw bits.
        raw: u64,
        /// Integer type.
        ty: ValueType,
    },
    /// A `char`.
    Char(u8),
    /// A pointer. `char *` values carry the string they point at.
    Pointer
    {
        /// Pointer value.
        address: Address,
        /// Pointer type.
        ty: ValueType,
        /// C string summary for `char *`, if readable.
        summary: Option<String>,
    },
    /// A fixed-size array.
    Array
    {
        /// Array type.
        ty: ValueType,
        /// Loaded elements.
        elements: Vec<Value>,
    },
}

impl Value
{
    /// Type of the value.
    pub fn ty(&self) -> ValueType
    {
        match self {
            Value::Int { ty, .. } | Value::Pointer { ty, .. } | Value::Array { ty, .. } => ty.clone(),
            Value::Char(_) => ValueType::Char,
        }
    }

    /// Integer interpretation, sign-extended for signed types.
    pub fn as_i64(&self) -> Option<i64>
    {
        match self {
            Value::Int {
                raw,
                ty: ValueType::Int { size, signed },
            } => Some(if *signed {
                sign_extend(*raw, *size)
            } else {
                i64::from_ne_bytes(raw.to_ne_bytes())
            }),
            Value::Int { raw, .. } => Some(i64::from_ne_bytes(raw.to_ne_bytes())),
            Value::Char(byte) => Some(i64::from(*byte)),
            _ => None,
        }
    }

    /// Pointer value, for pointers.
    pub fn as_address(&self) -> Option<Address>
    {
        match self {
            Value::Pointer { address, .. } => Some(*address),
            _ => None,
        }
    }

    /// String summary: the pointed-to text of a `char *`, or the contents of
    /// a `char` array up to the first NUL.
    pub fn summary(&self) -> Option<String>
    {
        match self {
            Value::Pointer { summary, .. } => summary.clone(),
            Value::Array { elements, .. } if elements.iter().all(|e| matches!(e, Value::Char(_))) => {
                let bytes: Vec<u8> = elements
                    .iter()
                    .filter_map(|e| match e {
                        Value::Char(byte) => Some(*byte),
                        _ => None,
                    })
                    .take_while(|byte| *byte != 0)
                    .collect();
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Value::Int {
                raw,
                ty: ValueType::Int { signed: false, .. },
            } => write!(f, "{raw}"),
            Value::Int { .. } => write!(f, "{}", self.as_i64().unwrap_or_default()),
            Value::Char(byte) => write!(f, "'{}'", char::from(*byte).escape_default()),
            Value::Pointer { address, summary, .. } => {
                write!(f, "0x{:016x}", address.value())?;
                if let Some(summary) = summary {
                    write!(f, " {summary:?}")?;
                }
                Ok(())
            }
            Value::Array { .. } if self.summary().is_some() => write!(f, "{:?}", self.summary().unwrap_or_default()),
            Value::Array { elements, .. } => {
                f.write_str("{")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn sign_extend(raw: u64, size: u8) -> i64
{
    let bits = u32::from(size) * 8;
    let value = i64::from_ne_bytes(raw.to_ne_bytes());
    if bits == 0 || bits >= 64 {
        value
    } else {
        let shift = 64 - bits;
        (value << shift) >> shift
    }
}

fn truncate(raw: u64, size: usize) -> u64
{
    if size >= 8 {
        raw
    } else {
        raw & ((1u64 << (size * 8)) - 1)
    }
}

fn eval_error(message: impl Into<String>) -> MortemError
{
    MortemError::EvaluationError(message.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token
{
    Int(u64),
    Char(u8),
    Register(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Amp,
    LBracket,
    RBracket,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> MortemResult<Vec<Token>>
{
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '&' | '[' | ']' | '(' | ')' => {
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '&' => Token::Amp,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '(' => Token::LParen,
                    _ => Token::RParen,
                });
                i += 1;
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Int(parse_integer(&text)?));
            }
            '\'' => {
                let (byte, next) = parse_char(&chars, i)?;
                tokens.push(Token::Char(byte));
                i = next;
            }
            '$' => {
                let start = i + 1;
                i = start;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if i == start {
                    return Err(eval_error("expected register name after '$'"));
                }
                tokens.push(Token::Register(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(eval_error(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

fn parse_integer(text: &str) -> MortemResult<u64>
{
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|_| eval_error(format!("invalid integer literal '{text}'")))
}

fn parse_char(chars: &[char], open: usize) -> MortemResult<(u8, usize)>
{
    let body = chars.get(open + 1).copied();
    let (value, close) = match body {
        Some('\\') => {
            let escaped = chars
                .get(open + 2)
                .copied()
                .ok_or_else(|| eval_error("unterminated character literal"))?;
            let value = match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                '\\' => '\\',
                '\'' => '\'',
                '"' => '"',
                other => return Err(eval_error(format!("unknown escape '\\{other}'"))),
            };
            (value, open + 3)
        }
        Some('\'') | None => return Err(eval_error("empty character literal")),
        Some(c) => (c, open + 2),
    };

    if chars.get(close) != Some(&'\'') {
        return Err(eval_error("unterminated character literal"));
    }
    if !value.is_ascii() {
        return Err(eval_error("character literal is not a single byte"));
    }
    let byte = u8::try_from(u32::from(value)).map_err(|_| eval_error("character literal is not a single byte"))?;
    Ok((byte, close + 1))
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr
{
    /// Integer literal.
    Int(u64),
    /// Character literal.
    Char(u8),
    /// `$name`
    Register(String),
    /// Variable name.
    Variable(String),
    /// `base[index]`
    Index(Box<Expr>, Box<Expr>),
    /// `*expr`
    Deref(Box<Expr>),
    /// `&expr`
    AddressOf(Box<Expr>),
    /// `-expr`
    Neg(Box<Expr>),
    /// `lhs + rhs`
    Add(Box<Expr>, Box<Expr>),
    /// `lhs - rhs`
    Sub(Box<Expr>, Box<Expr>),
}

/// Parse an expression.
///
/// ```rust
/// use mortem_core::eval::{parse, Expr};
///
/// let expr = parse("argv[0]")?;
/// assert_eq!(
///     expr,
///     Expr::Index(Box::new(Expr::Variable("argv".into())), Box::new(Expr::Int(0)))
/// );
/// assert!(parse("argv[").is_err());
/// # Ok::<(), mortem_core::error::MortemError>(())
/// ```
pub fn parse(input: &str) -> MortemResult<Expr>
{
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(eval_error("empty expression"));
    }
    let mut parser = Parser {
        tokens,
        position: 0,
        depth: 0,
    };
    let expr = parser.additive()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(eval_error(format!("unexpected token {token:?}"))),
    }
}

struct Parser
{
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser
{
    fn peek(&self) -> Option<&Token>
    {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token>
    {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> MortemResult<()>
    {
        match self.advance() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(eval_error(format!("expected {expected:?}, found {token:?}"))),
            None => Err(eval_error(format!("expected {expected:?} at end of expression"))),
        }
    }

    fn additive(&mut self) -> MortemResult<Expr>
    {
        let mut lhs = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.position += 1;
                    lhs = Expr::Add(Box::new(lhs), Box::new(self.unary()?));
                }
                Some(Token::Minus) => {
                    self.position += 1;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(self.unary()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    /// Every nested production passes through here, so the depth check
    /// bounds the recursion.
    fn unary(&mut self) -> MortemResult<Expr>
    {
        if self.depth >= MAX_NESTING {
            return Err(eval_error("expression nested too deeply"));
        }
        self.depth += 1;
        let expr = self.unary_operand();
        self.depth -= 1;
        expr
    }

    fn unary_operand(&mut self) -> MortemResult<Expr>
    {
        match self.peek() {
            Some(Token::Star) => {
                self.position += 1;
                Ok(Expr::Deref(Box::new(self.unary()?)))
            }
            Some(Token::Amp) => {
                self.position += 1;
                Ok(Expr::AddressOf(Box::new(self.unary()?)))
            }
            Some(Token::Minus) => {
                self.position += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> MortemResult<Expr>
    {
        let mut expr = self.primary()?;
        while self.peek() == Some(&Token::LBracket) {
            self.position += 1;
            let index = self.additive()?;
            self.expect(&Token::RBracket)?;
            expr = Expr::Index(Box::new(expr), Box::new(index));
        }
        Ok(expr)
    }

    fn primary(&mut self) -> MortemResult<Expr>
    {
        match self.advance() {
            Some(Token::Int(value)) => Ok(Expr::Int(value)),
            Some(Token::Char(value)) => Ok(Expr::Char(value)),
            Some(Token::Register(name)) => Ok(Expr::Register(name)),
            Some(Token::Ident(name)) => Ok(Expr::Variable(name)),
            Some(Token::LParen) => {
                let expr = self.additive()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(token) => Err(eval_error(format!("unexpected token {token:?}"))),
            None => Err(eval_error("unexpected end of expression")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Storage
{
    Memory(Address),
    Immediate(u64),
}

#[derive(Debug, Clone)]
struct Operand
{
    ty: ValueType,
    storage: Storage,
}

impl Operand
{
    fn immediate(ty: ValueType, raw: u64) -> Self
    {
        Self {
            ty,
            storage: Storage::Immediate(raw),
        }
    }
}

/// Evaluate `expression` in `frame` of `snapshot`.
///
/// ## Errors
///
/// - `EvaluationError`: parse error, unknown variable or register, type
///   mismatch, unreadable memory
/// - `StaleSnapshot`: the session left the stop the snapshot belongs to
pub fn evaluate(snapshot: &ThreadSnapshot, frame: &Frame, expression: &str, config: &SessionConfig) -> MortemResult<Value>
{
    let expr = parse(expression)?;
    let evaluator = Evaluator {
        snapshot,
        frame,
        pointer_size: snapshot.architecture().pointer_size_bytes(),
        cstring_limit: config.cstring_limit,
    };
    let operand = evaluator.eval(&expr)?;
    evaluator.load(&operand)
}

struct Evaluator<'a>
{
    snapshot: &'a ThreadSnapshot,
    frame: &'a Frame,
    pointer_size: u8,
    cstring_limit: usize,
}

impl Evaluator<'_>
{
    fn eval(&self, expr: &Expr) -> MortemResult<Operand>
    {
        match expr {
            Expr::Int(value) => {
                let ty = if i32::try_from(*value).is_ok() {
                    ValueType::INT
                } else {
                    ValueType::LONG
                };
                Ok(Operand::immediate(ty, *value))
            }
            Expr::Char(byte) => Ok(Operand::immediate(ValueType::Char, u64::from(*byte))),
            Expr::Register(name) => {
                let value = self.register(name)?;
                Ok(Operand::immediate(ValueType::Int { size: 8, signed: false }, value))
            }
            Expr::Variable(name) => self.variable(name),
            Expr::Index(base, index) => {
                let base = self.decay(self.eval(base)?)?;
                let index = self.integer(&self.eval(index)?)?;
                let ValueType::Pointer(element) = base.ty.clone() else {
                    return Err(eval_error(format!("subscripted value of type '{}' is not an array or pointer", base.ty)));
                };
                let address = self.offset_pointer(&base, &element, index)?;
                Ok(Operand {
                    ty: *element,
                    storage: Storage::Memory(address),
                })
            }
            Expr::Deref(inner) => {
                let pointer = self.decay(self.eval(inner)?)?;
                match pointer.ty.clone() {
                    ValueType::Pointer(pointee) if *pointee == ValueType::Void => {
                        Err(eval_error("cannot dereference a 'void *'"))
                    }
                    ValueType::Pointer(pointee) => Ok(Operand {
                        ty: *pointee,
                        storage: Storage::Memory(Address::from(self.raw(&pointer)?)),
                    }),
                    other => Err(eval_error(format!("indirection requires pointer operand ('{other}' invalid)"))),
                }
            }
            Expr::AddressOf(inner) => {
                let operand = self.eval(inner)?;
                match operand.storage {
                    Storage::Memory(address) => Ok(Operand::immediate(operand.ty.pointer_to(), address.value())),
                    Storage::Immediate(_) => Err(eval_error("cannot take the address of an rvalue")),
                }
            }
            Expr::Neg(inner) => {
                let operand = self.eval(inner)?;
                let value = self.integer(&operand)?;
                Ok(Operand::immediate(
                    integer_type(&operand.ty),
                    u64::from_ne_bytes(value.wrapping_neg().to_ne_bytes()),
                ))
            }
            Expr::Add(lhs, rhs) => self.additive(lhs, rhs, false),
            Expr::Sub(lhs, rhs) => self.additive(lhs, rhs, true),
        }
    }

    fn additive(&self, lhs: &Expr, rhs: &Expr, subtract: bool) -> MortemResult<Operand>
    {
        let lhs = self.decay(self.eval(lhs)?)?;
        let rhs = self.decay(self.eval(rhs)?)?;

        match (&lhs.ty, &rhs.ty) {
            (ValueType::Pointer(lp), ValueType::Pointer(rp)) if subtract => {
                if lp != rp {
                    return Err(eval_error(format!("'{}' and '{}' are not pointers to compatible types", lhs.ty, rhs.ty)));
                }
                let size = i64::try_from(self.stride(lp)).map_err(|_| eval_error("element size overflow"))?;
                let difference = i64::from_ne_bytes(self.raw(&lhs)?.wrapping_sub(self.raw(&rhs)?).to_ne_bytes());
                Ok(Operand::immediate(
                    ValueType::LONG,
                    u64::from_ne_bytes((difference / size).to_ne_bytes()),
                ))
            }
            (ValueType::Pointer(pointee), _) => {
                let index = self.integer(&rhs)?;
                let index = if subtract { index.wrapping_neg() } else { index };
                let address = self.offset_pointer(&lhs, pointee, index)?;
                Ok(Operand::immediate(lhs.ty.clone(), address.value()))
            }
            (_, ValueType::Pointer(pointee)) if !subtract => {
                let index = self.integer(&lhs)?;
                let address = self.offset_pointer(&rhs, pointee, index)?;
                Ok(Operand::immediate(rhs.ty.clone(), address.value()))
            }
            _ => {
                let a = self.integer(&lhs)?;
                let b = self.integer(&rhs)?;
                let result = if subtract { a.wrapping_sub(b) } else { a.wrapping_add(b) };
                let ty = wider_integer(&lhs.ty, &rhs.ty);
                Ok(Operand::immediate(ty, u64::from_ne_bytes(result.to_ne_bytes())))
            }
        }
    }

    fn register(&self, name: &str) -> MortemResult<u64>
    {
        self.snapshot.read_register(name).map_err(|err| match err {
            MortemError::RegisterUnavailable { register, .. } => {
                eval_error(format!("register ${register} is not available"))
            }
            other => other,
        })
    }

    fn variable(&self, name: &str) -> MortemResult<Operand>
    {
        self.snapshot.ensure_fresh()?;
        let info = self
            .snapshot
            .symbolizer()
            .variable(self.frame, name)
            .ok_or_else(|| eval_error(format!("use of undeclared identifier '{name}'")))?;

        let storage = match info.location {
            VariableLocation::Address(address) => Storage::Memory(address),
            VariableLocation::FrameOffset(offset) => {
                let fp = self
                    .frame
                    .fp
                    .ok_or_else(|| eval_error(format!("'{name}' is frame-relative but the frame has no frame pointer")))?;
                let address = fp
                    .checked_offset(offset)
                    .ok_or_else(|| eval_error(format!("'{name}' lies outside the address space")))?;
                Storage::Memory(address)
            }
            VariableLocation::Register(register) => Storage::Immediate(truncate(
                self.register(register.as_str())?,
                info.ty.size(self.pointer_size),
            )),
            VariableLocation::Value(value) => Storage::Immediate(value),
        };

        Ok(Operand { ty: info.ty, storage })
    }

    /// Arrays in memory turn into a pointer to their first element.
    fn decay(&self, operand: Operand) -> MortemResult<Operand>
    {
        match (&operand.ty, operand.storage) {
            (ValueType::Array { element, .. }, Storage::Memory(address)) => {
                Ok(Operand::immediate(ValueType::Pointer(element.clone()), address.value()))
            }
            (ValueType::Array { .. }, Storage::Immediate(_)) => Err(eval_error("array value has no address")),
            _ => Ok(operand),
        }
    }

    fn stride(&self, pointee: &ValueType) -> usize
    {
        match pointee.size(self.pointer_size) {
            0 => 1,
            size => size,
        }
    }

    fn offset_pointer(&self, pointer: &Operand, pointee: &ValueType, index: i64) -> MortemResult<Address>
    {
        let base = Address::from(self.raw(pointer)?);
        let stride = i64::try_from(self.stride(pointee)).map_err(|_| eval_error("element size overflow"))?;
        index
            .checked_mul(stride)
            .and_then(|displacement| base.checked_offset(displacement))
            .ok_or_else(|| eval_error("pointer arithmetic overflow"))
    }

    fn integer(&self, operand: &Operand) -> MortemResult<i64>
    {
        match operand.ty {
            ValueType::Int { size, signed } => {
                let raw = self.raw(operand)?;
                Ok(if signed {
                    sign_extend(raw, size)
                } else {
                    i64::from_ne_bytes(raw.to_ne_bytes())
                })
            }
            ValueType::Char => Ok(i64::from(self.raw(operand)?.to_le_bytes()[0])),
            ref other => Err(eval_error(format!("expected an integer, found '{other}'"))),
        }
    }

    /// Raw bits of a scalar operand, loading it from memory if needed.
    fn raw(&self, operand: &Operand) -> MortemResult<u64>
    {
        match operand.storage {
            Storage::Immediate(raw) => Ok(raw),
            Storage::Memory(address) => {
                let size = operand.ty.size(self.pointer_size);
                let bytes = self.read(address, size)?;
                read_le_word(&bytes).ok_or_else(|| eval_error(format!("cannot load a '{}' as a scalar", operand.ty)))
            }
        }
    }

    fn read(&self, address: Address, len: usize) -> MortemResult<Vec<u8>>
    {
        match self.snapshot.read_memory(address, len) {
            Ok(bytes) if bytes.len() == len => Ok(bytes),
            Ok(_) => Err(eval_error(format!("short read at 0x{:x}", address.value()))),
            Err(err @ MortemError::StaleSnapshot { .. }) => Err(err),
            Err(_) => Err(eval_error(format!("couldn't read memory at address 0x{:x}", address.value()))),
        }
    }

    fn load(&self, operand: &Operand) -> MortemResult<Value>
    {
        match &operand.ty {
            ValueType::Int { size, .. } => Ok(Value::Int {
                raw: truncate(self.raw(operand)?, usize::from(*size)),
                ty: operand.ty.clone(),
            }),
            ValueType::Char => Ok(Value::Char(self.raw(operand)?.to_le_bytes()[0])),
            ValueType::Pointer(_) => {
                let address = Address::from(self.raw(operand)?);
                let summary = if operand.ty.is_c_string() {
                    self.c_string(address)?
                } else {
                    None
                };
                Ok(Value::Pointer {
                    address,
                    ty: operand.ty.clone(),
                    summary,
                })
            }
            ValueType::Array { element, len } => {
                let Storage::Memory(base) = operand.storage else {
                    return Err(eval_error("array value has no address"));
                };
                let stride = u64::try_from(self.stride(element)).map_err(|_| eval_error("element size overflow"))?;
                let mut elements = Vec::with_capacity((*len).min(MAX_ARRAY_ELEMENTS));
                let mut address = base;
                for _ in 0..(*len).min(MAX_ARRAY_ELEMENTS) {
                    elements.push(self.load(&Operand {
                        ty: (**element).clone(),
                        storage: Storage::Memory(address),
                    })?);
                    address = address
                        .checked_add(stride)
                        .ok_or_else(|| eval_error("array extends past the address space"))?;
                }
                Ok(Value::Array {
                    ty: operand.ty.clone(),
                    elements,
                })
            }
            ValueType::Void => Err(eval_error("expression has type 'void'")),
        }
    }

    /// Text at `address` up to NUL or the summary limit. `None` if nothing
    /// is readable there.
    fn c_string(&self, address: Address) -> MortemResult<Option<String>>
    {
        if address.is_null() {
            return Ok(None);
        }

        let mut bytes = Vec::new();
        let mut cursor = address;
        'scan: while bytes.len() < self.cstring_limit {
            let want = CSTRING_CHUNK.min(self.cstring_limit - bytes.len());
            let chunk = match self.read(cursor, want) {
                Ok(chunk) => chunk,
                Err(err @ MortemError::StaleSnapshot { .. }) => return Err(err),
                // The string may end just before an unmapped page.
                Err(_) if want > 1 => match self.read(cursor, 1) {
                    Ok(byte) => byte,
                    Err(err @ MortemError::StaleSnapshot { .. }) => return Err(err),
                    Err(_) => break 'scan,
                },
                Err(_) => break 'scan,
            };

            for byte in &chunk {
                if *byte == 0 {
                    break 'scan;
                }
                bytes.push(*byte);
            }
            let Some(next) = cursor.checked_add(chunk.len() as u64) else {
                break;
            };
            cursor = next;
        }

        if bytes.is_empty() && self.read(address, 1).is_err() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

fn integer_type(ty: &ValueType) -> ValueType
{
    match ty {
        ValueType::Int { .. } => ty.clone(),
        _ => ValueType::INT,
    }
}

fn wider_integer(a: &ValueType, b: &ValueType) -> ValueType
{
    match (integer_type(a), integer_type(b)) {
        (ValueType::Int { size: sa, signed: ga }, ValueType::Int { size: sb, signed: gb }) => ValueType::Int {
            size: sa.max(sb).max(4),
            signed: ga && gb,
        },
        _ => ValueType::INT,
    }
}
