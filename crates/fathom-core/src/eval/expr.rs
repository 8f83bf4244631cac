//! Member-access expression parsing.
//!
//! Expressions are single-rooted chains of accesses, so they are parsed
//! straight into a root variable name plus the steps to apply to it in
//! evaluation order:
//!
//! ```text
//! n->foo.d            root n, [->foo, .d]
//! *(type_z *)pz       root pz, [(type_z *), *]
//! (*p).x              root p, [*, .x]
//! ```

use std::fmt;

use smallvec::SmallVec;

use crate::error::{FathomError, FathomResult};

/// Target type of a C cast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastTarget
{
    /// Type spelling without pointer stars (`type_z`, `struct point`)
    pub type_name: String,
    /// Number of `*` after the type name
    pub pointer_depth: u8,
}

impl fmt::Display for CastTarget
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.type_name)?;
        if self.pointer_depth > 0 {
            write!(f, " {}", "*".repeat(usize::from(self.pointer_depth)))?;
        }
        Ok(())
    }
}

/// One access applied to the current value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessStep
{
    /// `.name`: member of the current struct/union value
    Member(String),
    /// `->name`: dereference the current pointer, then member access
    Arrow(String),
    /// `[n]`: element of the current array or pointer
    Index(u64),
    /// `*`: dereference the current pointer
    Deref,
    /// `(type *)`: reinterpret the current value
    Cast(CastTarget),
}

impl AccessStep
{
    /// Render the expression text after applying this step to `base`
    #[must_use]
    pub fn apply_to_path(&self, base: &str) -> String
    {
        match self {
            AccessStep::Member(name) => format!("{base}.{name}"),
            AccessStep::Arrow(name) => format!("{base}->{name}"),
            AccessStep::Index(index) => format!("{base}[{index}]"),
            AccessStep::Deref => {
                if is_simple(base) {
                    format!("*{base}")
                } else {
                    format!("*({base})")
                }
            }
            AccessStep::Cast(target) => format!("({target}){base}"),
        }
    }
}

fn is_simple(path: &str) -> bool
{
    path.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A parsed expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression
{
    text: String,
    root: String,
    steps: SmallVec<[AccessStep; 4]>,
}

impl Expression
{
    /// Parse an expression
    ///
    /// ## Errors
    ///
    /// `InvalidExpression` with the reason the parser stopped.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use fathom_core::eval::{AccessStep, Expression};
    ///
    /// let expr = Expression::parse("n->foo.d").unwrap();
    /// assert_eq!(expr.root(), "n");
    /// assert_eq!(
    ///     expr.steps(),
    ///     &[AccessStep::Arrow("foo".into()), AccessStep::Member("d".into())]
    /// );
    /// ```
    pub fn parse(text: &str) -> FathomResult<Self>
    {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            text,
            tokens: &tokens,
            position: 0,
        };
        let (root, steps) = parser.unary()?;
        if let Some(token) = parser.peek() {
            return Err(parser.error(format!("unexpected {token} after end of expression")));
        }
        Ok(Self {
            text: text.trim().to_string(),
            root,
            steps,
        })
    }

    /// Build an expression from parts without parsing
    pub fn from_steps(root: impl Into<String>, steps: impl IntoIterator<Item = AccessStep>) -> Self
    {
        let root = root.into();
        let steps: SmallVec<[AccessStep; 4]> = steps.into_iter().collect();
        let text = steps.iter().fold(root.clone(), |path, step| step.apply_to_path(&path));
        Self { text, root, steps }
    }

    /// The expression as written
    #[must_use]
    pub fn text(&self) -> &str
    {
        &self.text
    }

    /// Name of the root variable
    #[must_use]
    pub fn root(&self) -> &str
    {
        &self.root
    }

    /// Accesses in evaluation order
    #[must_use]
    pub fn steps(&self) -> &[AccessStep]
    {
        &self.steps
    }
}

impl fmt::Display for Expression
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token
{
    Ident(String),
    Number(u64),
    Dot,
    Arrow,
    Star,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

impl fmt::Display for Token
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Token::Ident(name) => write!(f, "'{name}'"),
            Token::Number(value) => write!(f, "'{value}'"),
            Token::Dot => write!(f, "'.'"),
            Token::Arrow => write!(f, "'->'"),
            Token::Star => write!(f, "'*'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
        }
    }
}

fn tokenize(text: &str) -> FathomResult<Vec<Token>>
{
    let invalid = |reason: String| FathomError::InvalidExpression {
        expression: text.trim().to_string(),
        reason,
    };

    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '.' => tokens.push(Token::Dot),
            '*' => tokens.push(Token::Star),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '[' => tokens.push(Token::LBracket),
            ']' => tokens.push(Token::RBracket),
            '-' => match chars.next() {
                Some((_, '>')) => tokens.push(Token::Arrow),
                _ => return Err(invalid("expected '->'".to_string())),
            },
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let mut end = start + c.len_utf8();
                while let Some((index, next)) = chars.peek().copied() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        end = index + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(text[start..end].to_string()));
            }
            c if c.is_ascii_digit() => {
                let mut end = start + 1;
                while let Some((index, next)) = chars.peek().copied() {
                    if next.is_ascii_alphanumeric() {
                        end = index + 1;
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &text[start..end];
                let parsed = match literal.strip_prefix("0x").or_else(|| literal.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => literal.parse::<u64>(),
                };
                let value = parsed.map_err(|_| invalid(format!("invalid integer literal '{literal}'")))?;
                tokens.push(Token::Number(value));
            }
            other => return Err(invalid(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

type Steps = SmallVec<[AccessStep; 4]>;

struct Parser<'a>
{
    text: &'a str,
    tokens: &'a [Token],
    position: usize,
}

impl<'a> Parser<'a>
{
    fn peek(&self) -> Option<&'a Token>
    {
        self.tokens.get(self.position)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token>
    {
        self.tokens.get(self.position + offset)
    }

    fn advance(&mut self) -> Option<&'a Token>
    {
        let token = self.tokens.get(self.position);
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn error(&self, reason: String) -> FathomError
    {
        FathomError::InvalidExpression {
            expression: self.text.trim().to_string(),
            reason,
        }
    }

    fn expect(&mut self, wanted: &Token) -> FathomResult<()>
    {
        match self.advance() {
            Some(token) if token == wanted => Ok(()),
            Some(token) => Err(self.error(format!("expected {wanted}, found {token}"))),
            None => Err(self.error(format!("expected {wanted} at end of expression"))),
        }
    }

    fn ident(&mut self) -> FathomResult<String>
    {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name.clone()),
            Some(token) => Err(self.error(format!("expected identifier, found {token}"))),
            None => Err(self.error("expected identifier at end of expression".to_string())),
        }
    }

    fn unary(&mut self) -> FathomResult<(String, Steps)>
    {
        if self.peek() == Some(&Token::Star) {
            self.advance();
            let (root, mut steps) = self.unary()?;
            steps.push(AccessStep::Deref);
            return Ok((root, steps));
        }

        if let Some(target) = self.cast_target()? {
            let (root, mut steps) = self.unary()?;
            steps.push(AccessStep::Cast(target));
            return Ok((root, steps));
        }

        self.postfix()
    }

    /// Recognise `(type *)` ahead of a unary operand.
    ///
    /// Without a symbol table `(x)` is ambiguous; it is a cast only when
    /// followed by something that can start an operand.
    fn cast_target(&mut self) -> FathomResult<Option<CastTarget>>
    {
        if self.peek() != Some(&Token::LParen) {
            return Ok(None);
        }

        let mut offset = 1;
        let type_name = match self.peek_at(offset) {
            Some(Token::Ident(keyword)) if keyword == "struct" || keyword == "union" => {
                offset += 1;
                match self.peek_at(offset) {
                    Some(Token::Ident(name)) => format!("{keyword} {name}"),
                    _ => return Err(self.error(format!("expected a name after '{keyword}'"))),
                }
            }
            Some(Token::Ident(name)) => name.clone(),
            _ => return Ok(None),
        };
        offset += 1;

        let mut pointer_depth = 0u8;
        while self.peek_at(offset) == Some(&Token::Star) {
            pointer_depth = pointer_depth.saturating_add(1);
            offset += 1;
        }
        if self.peek_at(offset) != Some(&Token::RParen) {
            return Ok(None);
        }

        let starts_operand = matches!(
            self.peek_at(offset + 1),
            Some(Token::Ident(_) | Token::LParen | Token::Star)
        );
        let keyword = type_name.starts_with("struct ") || type_name.starts_with("union ");
        if !starts_operand && !(keyword || pointer_depth > 0) {
            return Ok(None);
        }
        if !starts_operand {
            return Err(self.error(format!("expected an operand after cast to '{type_name}'")));
        }

        self.position += offset + 1;
        Ok(Some(CastTarget {
            type_name,
            pointer_depth,
        }))
    }

    fn postfix(&mut self) -> FathomResult<(String, Steps)>
    {
        let (root, mut steps) = match self.advance() {
            Some(Token::Ident(name)) => (name.clone(), Steps::new()),
            Some(Token::LParen) => {
                let inner = self.unary()?;
                self.expect(&Token::RParen)?;
                inner
            }
            Some(token) => return Err(self.error(format!("expected a variable name, found {token}"))),
            None => return Err(self.error("empty expression".to_string())),
        };

        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    steps.push(AccessStep::Member(self.ident()?));
                }
                Some(Token::Arrow) => {
                    self.advance();
                    steps.push(AccessStep::Arrow(self.ident()?));
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = match self.advance() {
                        Some(Token::Number(value)) => *value,
                        _ => return Err(self.error("expected an integer index".to_string())),
                    };
                    self.expect(&Token::RBracket)?;
                    steps.push(AccessStep::Index(index));
                }
                _ => return Ok((root, steps)),
            }
        }
    }
}
