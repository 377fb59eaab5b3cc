//! Shallow recognition of AMD module wrapper calls.
//!
//! This is not a JavaScript parser. It finds the first top-level call of the
//! wrapper identifier (`define` by default) and splits its arguments into an
//! optional id literal, an optional dependency list of string literals and the
//! factory expression, which is kept verbatim. Strings, template literals,
//! comments and regular expression literals are skipped while scanning. A `/`
//! starts a regular expression only where an operand is expected.
//!
//! Parsing happens in two stages: locating the call, then reading its
//! arguments. Either stage failing yields [`ParsedSource::NotAModule`].

use std::fmt::Write as _;

use log::debug;

/// Dependencies provided by the loader itself; never resolved to files
pub const PSEUDO_DEPENDENCIES: [&str; 3] = ["require", "exports", "module"];

pub const DEFAULT_WRAPPER: &str = "define";

/// Keywords after which a `/` starts a regular expression literal
const OPERAND_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedSource {
    /// The source holds no well-formed wrapper call
    NotAModule,
    Module(ModuleDefinition),
}

impl ParsedSource {
    pub fn into_module(self) -> Option<ModuleDefinition> {
        match self {
            Self::NotAModule => None,
            Self::Module(definition) => Some(definition),
        }
    }

    pub fn is_module(&self) -> bool {
        matches!(self, Self::Module(_))
    }
}

/// A recognised wrapper call and the text surrounding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDefinition {
    /// Id literal given as first argument
    pub id: Option<String>,
    /// Dependency list literal, `None` when the call omits it
    pub declared_dependencies: Option<Vec<String>>,
    /// Ids of `require('...')` calls in the factory, distinct, in source order
    pub body_references: Vec<String>,
    /// Number of formal parameters when the factory is a function
    pub factory_arity: usize,
    /// Factory expression, verbatim
    pub factory: String,
    /// Source text before the call
    pub prefix: String,
    /// Source text after the call and its optional semicolon
    pub suffix: String,
}

impl ModuleDefinition {
    /// Ids to walk when combining: declared dependencies left to right, then
    /// body references, without loader pseudo dependencies
    pub fn dependency_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        let declared = self.declared_dependencies.iter().flatten();
        for id in declared.chain(&self.body_references) {
            if !is_pseudo_dependency(id) && !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// Dependency list written into the output.
    ///
    /// A missing list is synthesized the way AMD loaders do for the CommonJS
    /// sugar form: one pseudo dependency per factory parameter (at most three),
    /// followed by the body references.
    pub fn emitted_dependencies(&self) -> Vec<String> {
        if let Some(declared) = &self.declared_dependencies {
            return declared.clone();
        }

        let mut deps: Vec<String> = PSEUDO_DEPENDENCIES
            .iter()
            .take(self.factory_arity.min(PSEUDO_DEPENDENCIES.len()))
            .map(|&pseudo| pseudo.to_owned())
            .collect();
        for reference in &self.body_references {
            if !deps.contains(reference) {
                deps.push(reference.clone());
            }
        }
        deps
    }

    /// Render the call with an id argument, keeping surrounding text.
    ///
    /// `fallback_id` is used only when the call has no id literal of its own.
    pub fn render(&self, fallback_id: &str, wrapper: &str) -> String {
        let id = self.id.as_deref().unwrap_or(fallback_id);
        let mut out = String::with_capacity(
            self.prefix.len() + self.factory.len() + self.suffix.len() + 64,
        );
        out.push_str(&self.prefix);
        let _ = write!(
            out,
            "{wrapper}({}, {}, {});",
            quote(id),
            render_dependency_list(&self.emitted_dependencies()),
            self.factory
        );
        out.push_str(&self.suffix);
        out.trim().to_owned()
    }
}

pub fn is_pseudo_dependency(id: &str) -> bool {
    PSEUDO_DEPENDENCIES.contains(&id)
}

/// Single-quoted JavaScript string literal
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// `['a']` for a single entry, one entry per line with four spaces of indent otherwise
pub fn render_dependency_list(deps: &[String]) -> String {
    match deps {
        [] => "[]".to_owned(),
        [single] => format!("[{}]", quote(single)),
        many => {
            let entries: Vec<String> = many.iter().map(|dep| format!("    {}", quote(dep))).collect();
            format!("[\n{}\n]", entries.join(",\n"))
        }
    }
}

/// Recognise the first top-level `wrapper(...)` call in `source`
pub fn parse_module(source: &str, wrapper: &str) -> ParsedSource {
    let Some(call) = find_wrapper_call(source, wrapper) else {
        return ParsedSource::NotAModule;
    };

    match parse_call(source, &call) {
        Ok(definition) => ParsedSource::Module(definition),
        Err(reason) => {
            debug!("Malformed {wrapper}() call at byte {}: {reason}", call.start);
            ParsedSource::NotAModule
        }
    }
}

/// Location of a wrapper call: start of the identifier and first byte after `(`
#[derive(Debug, Clone, Copy)]
struct CallSite {
    start: usize,
    args_start: usize,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_continue(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

#[derive(Debug, Clone)]
struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos + offset).copied()
    }

    fn at_comment(&self) -> bool {
        self.peek() == Some(b'/') && matches!(self.peek_at(1), Some(b'/' | b'*'))
    }

    fn skip_comment(&mut self) {
        let rest = &self.src[self.pos..];
        if rest.starts_with("//") {
            self.pos += rest.find('\n').unwrap_or(rest.len());
        } else if rest.starts_with("/*") {
            self.pos += rest[2..].find("*/").map_or(rest.len(), |end| end + 4);
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.at_comment() => self.skip_comment(),
                _ => return,
            }
        }
    }

    fn read_identifier(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    /// Skip a string or template literal starting at the current quote
    fn skip_string(&mut self) -> Result<(), &'static str> {
        let quote = self.peek().ok_or("unexpected end of input")?;
        self.pos += 1;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'\\' => self.pos += 1,
                b'\n' if quote != b'`' => return Err("unterminated string literal"),
                _ if b == quote => return Ok(()),
                _ => {}
            }
        }
        Err("unterminated string literal")
    }

    /// Skip a regular expression literal starting at the current `/`.
    ///
    /// Leaves the position untouched and returns `false` when no closing `/`
    /// follows on the same line.
    fn skip_regex(&mut self) -> bool {
        let bytes = self.src.as_bytes();
        let mut pos = self.pos + 1;
        let mut in_class = false;
        while let Some(&b) = bytes.get(pos) {
            pos += 1;
            match b {
                b'\\' => pos += 1,
                b'\n' => return false,
                b'[' => in_class = true,
                b']' => in_class = false,
                b'/' if !in_class => {
                    while bytes.get(pos).copied().is_some_and(is_ident_continue) {
                        pos += 1;
                    }
                    self.pos = pos;
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    /// Skip a string, template, comment or regular expression starting at the
    /// current position; `false` when the current byte starts none of them
    fn skip_non_code(&mut self) -> Result<bool, &'static str> {
        match self.peek() {
            Some(b'\'' | b'"' | b'`') => self.skip_string().map(|()| true),
            Some(b'/') if self.at_comment() => {
                self.skip_comment();
                Ok(true)
            }
            Some(b'/') if regex_allowed(self.src, self.pos) => Ok(self.skip_regex()),
            _ => Ok(false),
        }
    }

    /// Read the `('id')` argument of a `require` call
    fn read_require_argument(&mut self) -> Result<String, &'static str> {
        self.skip_trivia();
        self.expect(b'(')?;
        self.skip_trivia();
        let id = self.read_string()?;
        self.skip_trivia();
        self.expect(b')')?;
        Ok(id)
    }

    /// Read a `'` or `"` string literal, resolving escapes
    fn read_string(&mut self) -> Result<String, &'static str> {
        let quote = match self.peek() {
            Some(q @ (b'\'' | b'"')) => q as char,
            _ => return Err("expected a string literal"),
        };
        self.pos += 1;

        let mut value = String::new();
        let mut chars = self.src[self.pos..].char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        value.push(escaped);
                    }
                }
                '\n' => break,
                c if c == quote => {
                    self.pos += offset + 1;
                    return Ok(value);
                }
                c => value.push(c),
            }
        }
        Err("unterminated string literal")
    }

    fn expect(&mut self, expected: u8) -> Result<(), &'static str> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err("unexpected token in wrapper arguments")
        }
    }

    /// Read `['a', "b", ]` into a list of ids
    fn read_string_array(&mut self) -> Result<Vec<String>, &'static str> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                Some(b']') => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(b'\'' | b'"') => {
                    items.push(self.read_string()?);
                    self.skip_trivia();
                    match self.peek() {
                        Some(b',') => self.pos += 1,
                        Some(b']') => {
                            self.pos += 1;
                            return Ok(items);
                        }
                        _ => return Err("expected ',' or ']' in dependency list"),
                    }
                }
                None => return Err("unterminated dependency list"),
                Some(_) => return Err("dependency list entry is not a string literal"),
            }
        }
    }

    /// Advance to the `)` closing the call, skipping nested groups
    fn skip_to_call_end(&mut self) -> Result<(), &'static str> {
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            if self.skip_non_code()? {
                continue;
            }
            match b {
                b'(' | b'[' | b'{' => {
                    depth += 1;
                    self.pos += 1;
                }
                b')' if depth == 0 => return Ok(()),
                b')' | b']' | b'}' => {
                    depth = depth.checked_sub(1).ok_or("unbalanced brackets")?;
                    self.pos += 1;
                }
                b',' if depth == 0 => return Err("unexpected extra argument"),
                _ => self.pos += 1,
            }
        }
        Err("unterminated wrapper call")
    }
}

fn preceded_by_member_access(source: &str, start: usize) -> bool {
    source[..start].trim_end().ends_with('.')
}

/// Whether a `/` at `pos` begins a regular expression rather than a division
fn regex_allowed(source: &str, pos: usize) -> bool {
    let before = source[..pos].trim_end();
    match before.bytes().last() {
        None => true,
        Some(
            b'(' | b',' | b'=' | b':' | b'[' | b'!' | b'&' | b'|' | b'?' | b'{' | b'}' | b';' | b'+'
            | b'-' | b'*' | b'%' | b'<' | b'>' | b'~' | b'^',
        ) => true,
        Some(b) if is_ident_continue(b) => {
            let word_start = before
                .bytes()
                .rposition(|c| !is_ident_continue(c))
                .map_or(0, |i| i + 1);
            OPERAND_KEYWORDS.contains(&&before[word_start..])
        }
        Some(_) => false,
    }
}

fn find_wrapper_call(source: &str, wrapper: &str) -> Option<CallSite> {
    let mut scanner = Scanner::new(source, 0);
    let mut depth = 0isize;

    while let Some(b) = scanner.peek() {
        if scanner.skip_non_code().ok()? {
            continue;
        }
        match b {
            b'(' | b'[' | b'{' => {
                depth += 1;
                scanner.pos += 1;
            }
            b')' | b']' | b'}' => {
                depth -= 1;
                scanner.pos += 1;
            }
            b if is_ident_start(b) => {
                let start = scanner.pos;
                let word = scanner.read_identifier();
                if depth == 0 && word == wrapper && !preceded_by_member_access(source, start) {
                    let mut lookahead = scanner.clone();
                    lookahead.skip_trivia();
                    if lookahead.peek() == Some(b'(') {
                        return Some(CallSite {
                            start,
                            args_start: lookahead.pos + 1,
                        });
                    }
                }
            }
            _ => scanner.pos += 1,
        }
    }
    None
}

fn parse_call(source: &str, call: &CallSite) -> Result<ModuleDefinition, &'static str> {
    let mut scanner = Scanner::new(source, call.args_start);
    scanner.skip_trivia();

    let mut id = None;
    if matches!(scanner.peek(), Some(b'\'' | b'"')) {
        id = Some(scanner.read_string()?);
        scanner.skip_trivia();
        scanner.expect(b',')?;
        scanner.skip_trivia();
    }

    let mut declared_dependencies = None;
    if scanner.peek() == Some(b'[') {
        declared_dependencies = Some(scanner.read_string_array()?);
        scanner.skip_trivia();
        scanner.expect(b',')?;
        scanner.skip_trivia();
    }

    let factory_start = scanner.pos;
    scanner.skip_to_call_end()?;
    let factory = source[factory_start..scanner.pos].trim_end();
    if factory.is_empty() {
        return Err("missing factory argument");
    }

    // past ')' and an optional ';' on the same line
    scanner.pos += 1;
    let mut call_end = scanner.pos;
    let after = &source[call_end..];
    let padding = after.len() - after.trim_start_matches([' ', '\t']).len();
    if after[padding..].starts_with(';') {
        call_end += padding + 1;
    }

    Ok(ModuleDefinition {
        id,
        declared_dependencies,
        body_references: body_references(factory),
        factory_arity: factory_arity(factory),
        factory: factory.to_owned(),
        prefix: source[..call.start].to_owned(),
        suffix: source[call_end..].to_owned(),
    })
}

/// Ids of `require('id')` calls in code positions of `factory`
fn body_references(factory: &str) -> Vec<String> {
    let mut references: Vec<String> = Vec::new();
    let mut scanner = Scanner::new(factory, 0);

    while let Some(b) = scanner.peek() {
        match scanner.skip_non_code() {
            Ok(true) => continue,
            Ok(false) => {}
            Err(_) => break,
        }
        if !is_ident_start(b) {
            scanner.pos += 1;
            continue;
        }

        let start = scanner.pos;
        if scanner.read_identifier() != "require" || preceded_by_member_access(factory, start) {
            continue;
        }
        let Ok(id) = scanner.clone().read_require_argument() else {
            continue;
        };
        let id = id.trim();
        if !id.is_empty() && !references.iter().any(|r| r == id) {
            references.push(id.to_owned());
        }
    }
    references
}

/// Parameter count of `function (a, b) {}`, `(a, b) => ...` or `a => ...`
fn factory_arity(factory: &str) -> usize {
    let params = if let Some(rest) = factory.strip_prefix("function") {
        rest.find('(').and_then(|open| {
            rest[open + 1..]
                .find(')')
                .map(|close| &rest[open + 1..open + 1 + close])
        })
    } else if let Some(rest) = factory.strip_prefix('(') {
        rest.find(')')
            .filter(|&close| rest[close + 1..].trim_start().starts_with("=>"))
            .map(|close| &rest[..close])
    } else {
        factory
            .split_once("=>")
            .map(|(param, _)| param.trim())
            .filter(|param| !param.is_empty() && param.bytes().all(is_ident_continue))
    };

    params.map_or(0, |params| {
        params.split(',').filter(|p| !p.trim().is_empty()).count()
    })
}
