//! CS-011: Lightweight TypeScript outline scanner.
//!
//! Not a full parser. It tokenizes (skipping comments, string and regular
//! expression literals, but lexing template substitutions)
//! and tracks brace frames to recover what the engine queries: function and
//! method declarations with their scope chain and access level, call
//! expressions with their innermost enclosing function, and named imports.
//! Arrow functions assigned to variables are not declarations here.

use crate::core::types::{AccessLevel, ScopeKind};
use std::collections::HashMap;
use std::iter::Peekable;
use std::ops::Range;
use std::str::CharIndices;

/// A function or method declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    /// Enclosing classes/namespaces, outermost first: (kind, name, exported).
    pub scope: Vec<(ScopeKind, String, bool)>,
    pub access: AccessLevel,
    /// From the `function` keyword (or method name) through the closing brace.
    pub span: Range<usize>,
    /// Text between the parameter parentheses.
    pub params: Range<usize>,
}

/// A call expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub callee: String,
    /// From the callee identifier through the closing parenthesis.
    pub span: Range<usize>,
    /// Text between the argument parentheses.
    pub args: Range<usize>,
    /// Index into [`Outline::functions`] of the innermost enclosing function.
    pub enclosing: Option<usize>,
}

/// `import { a, b } from "location";`
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub names: Vec<String>,
    /// Text between the braces.
    pub names_span: Range<usize>,
    pub location: String,
    pub span: Range<usize>,
}

/// Everything the scanner recovered from one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outline {
    pub functions: Vec<FunctionDecl>,
    pub calls: Vec<CallSite>,
    pub imports: Vec<ImportDecl>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Literal,
    Punct(char),
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone)]
enum Frame {
    Scope(ScopeKind, String, bool),
    Function(usize),
    Block,
}

const NOT_CALLABLE: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "typeof", "function", "super", "import",
    "with", "void", "delete", "in", "of", "instanceof", "yield", "await", "throw", "case", "do",
    "else", "new", "this", "constructor",
];

const METHOD_MODIFIERS: &[&str] = &[
    "public", "private", "protected", "static", "async", "readonly", "get", "set", "override",
    "abstract",
];

/// Scan `source` into an [`Outline`]. Unbalanced brackets are an error.
pub fn scan(source: &str) -> Result<Outline, String> {
    let tokens = tokenize(source)?;
    Scanner {
        tokens: &tokens,
        outline: Outline::default(),
        stack: Vec::new(),
        designated: HashMap::new(),
    }
    .run()
}

struct Scanner<'a> {
    tokens: &'a [Spanned],
    outline: Outline,
    stack: Vec<Frame>,
    /// Opening braces already known to start a scope or function body.
    designated: HashMap<usize, Frame>,
}

impl Scanner<'_> {
    fn run(mut self) -> Result<Outline, String> {
        let tokens = self.tokens;
        let mut parens = 0i64;
        let mut i = 0;
        while i < tokens.len() {
            match &tokens[i].token {
                Token::Punct('{') => {
                    let frame = self.designated.remove(&i).unwrap_or(Frame::Block);
                    self.stack.push(frame);
                }
                Token::Punct('}') => {
                    let frame = self
                        .stack
                        .pop()
                        .ok_or_else(|| format!("unbalanced '}}' at byte {}", tokens[i].start))?;
                    if let Frame::Function(index) = frame {
                        self.outline.functions[index].span.end = tokens[i].end;
                    }
                }
                Token::Punct('(') => parens += 1,
                Token::Punct(')') => {
                    parens -= 1;
                    if parens < 0 {
                        return Err(format!("unbalanced ')' at byte {}", tokens[i].start));
                    }
                }
                Token::Ident(word) => {
                    if let Some(next) = self.keyword(i, word.as_str())? {
                        i = next;
                        continue;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        if parens != 0 {
            return Err("unclosed '('".to_string());
        }
        if !self.stack.is_empty() {
            return Err("unclosed '{'".to_string());
        }
        Ok(self.outline)
    }

    /// Handle an identifier at `i`. Returns the next token index when the
    /// identifier consumed tokens, `None` to continue with `i + 1`.
    fn keyword(&mut self, i: usize, word: &str) -> Result<Option<usize>, String> {
        match word {
            "import" if self.at_module_level() => Ok(self.import(i)),
            "namespace" | "module" => Ok(self.scope_block(i, ScopeKind::Namespace)),
            "class" => Ok(self.scope_block(i, ScopeKind::Class)),
            "function" => Ok(self.function(i)),
            _ if self.in_class_body() && self.punct_at(i + 1, '(') => {
                if let Some(next) = self.method(i) {
                    return Ok(Some(next));
                }
                self.call(i, word);
                Ok(None)
            }
            _ if self.punct_at(i + 1, '(') && !NOT_CALLABLE.contains(&word) => {
                if !self.ident_at(i.wrapping_sub(1), "function") {
                    self.call(i, word);
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn import(&mut self, i: usize) -> Option<usize> {
        let mut j = i + 1;
        if self.ident_at(j, "type") {
            j += 1;
        }
        if !self.punct_at(j, '{') {
            return None;
        }
        let open = j;
        let close = (open..self.tokens.len()).find(|&k| self.punct_at(k, '}'))?;
        let mut names = Vec::new();
        let mut k = open + 1;
        while k < close {
            if let Token::Ident(name) = &self.tokens[k].token {
                if name != "type" {
                    names.push(name.clone());
                }
                // `a as b` imports `a`
                if self.ident_at(k + 1, "as") {
                    k += 2;
                }
            }
            k += 1;
        }
        if !self.ident_at(close + 1, "from") {
            return None;
        }
        let Token::Str(location) = &self.tokens.get(close + 2)?.token else {
            return None;
        };
        let mut end = close + 2;
        if self.punct_at(end + 1, ';') {
            end += 1;
        }
        self.outline.imports.push(ImportDecl {
            names,
            names_span: self.tokens[open].end..self.tokens[close].start,
            location: location.clone(),
            span: self.tokens[i].start..self.tokens[end].end,
        });
        Some(end + 1)
    }

    fn scope_block(&mut self, i: usize, kind: ScopeKind) -> Option<usize> {
        let Token::Ident(name) = &self.tokens.get(i + 1)?.token else {
            return None;
        };
        let open = match kind {
            // `namespace A.B {` is treated as one scope named `A.B`
            ScopeKind::Namespace => {
                let mut j = i + 2;
                let mut full = name.clone();
                while self.punct_at(j, '.') {
                    if let Some(Token::Ident(part)) = self.tokens.get(j + 1).map(|t| &t.token) {
                        full.push('.');
                        full.push_str(part);
                    }
                    j += 2;
                }
                if !self.punct_at(j, '{') {
                    return None;
                }
                let exported = self.exported(i);
                self.designated
                    .insert(j, Frame::Scope(kind, full, exported));
                return Some(j);
            }
            ScopeKind::Class => self.next_open_brace(i + 2)?,
        };
        let exported = self.exported(i);
        self.designated
            .insert(open, Frame::Scope(kind, name.clone(), exported));
        Some(open)
    }

    fn function(&mut self, i: usize) -> Option<usize> {
        let mut j = i + 1;
        if self.punct_at(j, '*') {
            j += 1;
        }
        let Token::Ident(name) = &self.tokens.get(j)?.token else {
            return None;
        };
        let name = name.clone();
        let mut open = j + 1;
        if self.punct_at(open, '<') {
            open = self.matching(open, '<', '>')? + 1;
        }
        if !self.punct_at(open, '(') {
            return None;
        }
        let access = if self.exported(i) {
            AccessLevel::PublicFunction
        } else {
            AccessLevel::PrivateFunction
        };
        self.declare(i, name, open, access)
    }

    fn method(&mut self, i: usize) -> Option<usize> {
        let Token::Ident(name) = &self.tokens[i].token else {
            return None;
        };
        let name = name.clone();
        let mut private = false;
        let mut k = i;
        while k > 0 {
            match &self.tokens[k - 1].token {
                Token::Ident(m) if METHOD_MODIFIERS.contains(&m.as_str()) => {
                    private |= m == "private" || m == "protected";
                    k -= 1;
                }
                _ => break,
            }
        }
        let access = if private {
            AccessLevel::PrivateMethod
        } else {
            AccessLevel::PublicMethod
        };
        self.declare(i, name, i + 1, access)
    }

    /// Record a declaration whose parameters open at `open`. Returns the
    /// index of the body's opening brace, or `None` for bodiless signatures.
    fn declare(
        &mut self,
        start: usize,
        name: String,
        open: usize,
        access: AccessLevel,
    ) -> Option<usize> {
        let close = self.matching(open, '(', ')')?;
        let body = self.body_brace(close + 1)?;
        let scope = self
            .stack
            .iter()
            .filter_map(|f| match f {
                Frame::Scope(kind, name, exported) => Some((*kind, name.clone(), *exported)),
                _ => None,
            })
            .collect();
        self.outline.functions.push(FunctionDecl {
            name,
            scope,
            access,
            span: self.tokens[start].start..self.tokens[body].end,
            params: self.tokens[open].end..self.tokens[close].start,
        });
        let index = self.outline.functions.len() - 1;
        self.designated.insert(body, Frame::Function(index));
        Some(body)
    }

    fn call(&mut self, i: usize, callee: &str) {
        let open = i + 1;
        let Some(close) = self.matching(open, '(', ')') else {
            return;
        };
        let enclosing = self.stack.iter().rev().find_map(|f| match f {
            Frame::Function(index) => Some(*index),
            _ => None,
        });
        self.outline.calls.push(CallSite {
            callee: callee.to_string(),
            span: self.tokens[i].start..self.tokens[close].end,
            args: self.tokens[open].end..self.tokens[close].start,
            enclosing,
        });
    }

    /// After a parameter list: skip an optional return type and find `{`.
    fn body_brace(&self, from: usize) -> Option<usize> {
        if self.punct_at(from, '{') {
            return Some(from);
        }
        if !self.punct_at(from, ':') {
            return None;
        }
        let mut depth = 0i32;
        for k in from + 1..self.tokens.len() {
            match self.tokens[k].token {
                Token::Punct('(') | Token::Punct('[') | Token::Punct('<') => depth += 1,
                Token::Punct(')') | Token::Punct(']') => depth -= 1,
                Token::Punct('>') if depth > 0 && !self.punct_at(k - 1, '=') => depth -= 1,
                Token::Punct('{') if depth == 0 => return Some(k),
                Token::Punct(';') if depth == 0 => return None,
                _ => {}
            }
        }
        None
    }

    fn next_open_brace(&self, from: usize) -> Option<usize> {
        (from..self.tokens.len())
            .take_while(|&k| !self.punct_at(k, ';'))
            .find(|&k| self.punct_at(k, '{'))
    }

    fn matching(&self, open: usize, left: char, right: char) -> Option<usize> {
        let mut depth = 0i32;
        for k in open..self.tokens.len() {
            if self.punct_at(k, left) {
                depth += 1;
            } else if self.punct_at(k, right) {
                depth -= 1;
                if depth == 0 {
                    return Some(k);
                }
            }
        }
        None
    }

    fn exported(&self, i: usize) -> bool {
        let mut k = i;
        while k > 0 {
            match &self.tokens[k - 1].token {
                Token::Ident(w) if w == "export" => return true,
                Token::Ident(w) if w == "async" || w == "default" || w == "declare" || w == "abstract" => {
                    k -= 1
                }
                _ => return false,
            }
        }
        false
    }

    fn at_module_level(&self) -> bool {
        self.stack.iter().all(|f| matches!(f, Frame::Scope(ScopeKind::Namespace, ..)))
    }

    fn in_class_body(&self) -> bool {
        matches!(self.stack.last(), Some(Frame::Scope(ScopeKind::Class, ..)))
    }

    fn punct_at(&self, k: usize, c: char) -> bool {
        matches!(self.tokens.get(k), Some(Spanned { token: Token::Punct(p), .. }) if *p == c)
    }

    fn ident_at(&self, k: usize, word: &str) -> bool {
        matches!(self.tokens.get(k), Some(Spanned { token: Token::Ident(w), .. }) if w == word)
    }
}

type Chars<'s> = Peekable<CharIndices<'s>>;

/// Keywords after which `/` starts a regular expression.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "yield", "await", "instanceof",
];

fn tokenize(source: &str) -> Result<Vec<Spanned>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    lex(source, &mut chars, &mut tokens, None)?;
    Ok(tokens)
}

/// Whether a `/` after the last token opens a regular expression rather
/// than dividing. `floor` is where the current expression context began.
fn regex_allowed(tokens: &[Spanned], floor: usize) -> bool {
    if tokens.len() <= floor {
        return true;
    }
    match &tokens[tokens.len() - 1].token {
        Token::Punct(p) => "(,=:[!&|?{};+-*%<>~^".contains(*p),
        Token::Ident(word) => EXPRESSION_KEYWORDS.contains(&word.as_str()),
        Token::Str(_) | Token::Literal => false,
    }
}

/// Lex until input ends. Inside a template substitution (`substitution`
/// holds its `${` offset), stop at the `}` that closes it.
fn lex(
    source: &str,
    chars: &mut Chars<'_>,
    tokens: &mut Vec<Spanned>,
    substitution: Option<usize>,
) -> Result<(), String> {
    let floor = tokens.len();
    let mut depth = 0usize;

    while let Some((start, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        if c == '/' {
            match chars.peek().map(|&(_, n)| n) {
                Some('/') => {
                    for (_, n) in chars.by_ref() {
                        if n == '\n' {
                            break;
                        }
                    }
                    continue;
                }
                Some('*') => {
                    chars.next();
                    let mut prev = '\0';
                    let mut closed = false;
                    for (_, n) in chars.by_ref() {
                        if prev == '*' && n == '/' {
                            closed = true;
                            break;
                        }
                        prev = n;
                    }
                    if !closed {
                        return Err(format!("unterminated comment at byte {}", start));
                    }
                    continue;
                }
                _ if regex_allowed(tokens, floor) => {
                    let end = lex_regex(chars, start)?;
                    tokens.push(Spanned {
                        token: Token::Literal,
                        start,
                        end,
                    });
                    continue;
                }
                _ => {}
            }
        }
        if c == '"' || c == '\'' {
            let mut escaped = false;
            let mut end = None;
            for (k, n) in chars.by_ref() {
                if escaped {
                    escaped = false;
                } else if n == '\\' {
                    escaped = true;
                } else if n == c {
                    end = Some(k + n.len_utf8());
                    break;
                } else if n == '\n' {
                    break;
                }
            }
            let end = end.ok_or_else(|| format!("unterminated string at byte {}", start))?;
            tokens.push(Spanned {
                token: Token::Str(source[start + 1..end - 1].to_string()),
                start,
                end,
            });
            continue;
        }
        if c == '`' {
            tokens.push(Spanned {
                token: Token::Literal,
                start,
                end: start + 1,
            });
            lex_template(source, chars, tokens, start)?;
            continue;
        }
        if substitution.is_some() {
            if c == '{' {
                depth += 1;
            } else if c == '}' {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            let mut end = start + c.len_utf8();
            while let Some(&(k, n)) = chars.peek() {
                if n.is_alphanumeric() || n == '_' || n == '$' {
                    end = k + n.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Spanned {
                token: Token::Ident(source[start..end].to_string()),
                start,
                end,
            });
            continue;
        }
        if c.is_ascii_digit() {
            let mut end = start + 1;
            while let Some(&(k, n)) = chars.peek() {
                if n.is_alphanumeric() || n == '.' || n == '_' {
                    end = k + n.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Spanned {
                token: Token::Literal,
                start,
                end,
            });
            continue;
        }
        tokens.push(Spanned {
            token: Token::Punct(c),
            start,
            end: start + c.len_utf8(),
        });
    }

    match substitution {
        Some(at) => Err(format!("unterminated template substitution at byte {}", at)),
        None => Ok(()),
    }
}

/// Consume a regular expression body and its flags. Returns the end offset.
fn lex_regex(chars: &mut Chars<'_>, start: usize) -> Result<usize, String> {
    let mut escaped = false;
    let mut in_class = false;
    loop {
        let Some((k, n)) = chars.next() else {
            return Err(format!("unterminated regular expression at byte {}", start));
        };
        match n {
            '\n' => return Err(format!("unterminated regular expression at byte {}", start)),
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => {
                let mut end = k + 1;
                while let Some(&(f, flag)) = chars.peek() {
                    if !flag.is_ascii_alphabetic() {
                        break;
                    }
                    end = f + 1;
                    chars.next();
                }
                return Ok(end);
            }
            _ => {}
        }
    }
}

/// Consume a template literal after its opening backtick, lexing each
/// `${...}` substitution into `tokens`.
fn lex_template(
    source: &str,
    chars: &mut Chars<'_>,
    tokens: &mut Vec<Spanned>,
    start: usize,
) -> Result<(), String> {
    let mut escaped = false;
    while let Some((k, n)) = chars.next() {
        if escaped {
            escaped = false;
            continue;
        }
        match n {
            '\\' => escaped = true,
            '`' => return Ok(()),
            '$' if chars.peek().map(|&(_, c)| c) == Some('{') => {
                chars.next();
                lex(source, chars, tokens, Some(k))?;
            }
            _ => {}
        }
    }
    Err(format!("unterminated template literal at byte {}", start))
}
