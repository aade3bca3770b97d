//! Statement-level view of Python source.
//!
//! Proposed strategies arrive as Python text. Synthesis and discovery only
//! ever need the module's top-level statements (imports, function and class
//! definitions, everything else), so this parser tokenizes just enough
//! (strings, brackets, comments, line continuations) to split a module into
//! those statements without touching their bodies. Serializing a parsed
//! module reproduces the input text line for line.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(async\s+)?def\s+([A-Za-z_]\w*)\s*(?:\[.*\])?\s*\(").expect("def pattern"));
static CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^class\s+([A-Za-z_]\w*)\s*(?:\[.*?\])?\s*(?:\(([^)]*)\))?\s*:").expect("class pattern"));
static FROM_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^from\s+(\.*[\w.]*)\s+import\s+(.*)$").expect("from-import pattern"));

/// Keywords that start a compound statement at module level.
const COMPOUND_KEYWORDS: &[&str] = &["def", "async", "class", "if", "for", "while", "try", "with"];
/// Clauses that continue the compound statement above them.
const CONTINUATION_CLAUSES: &[&str] = &["elif", "else", "except", "finally"];
/// Clause headers that must end in a block colon.
const COLON_KEYWORDS: &[&str] = &[
    "def", "async", "class", "if", "elif", "else", "for", "while", "try", "except", "finally", "with",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyntaxError: {} (line {})", self.message, self.line)
    }
}

impl std::error::Error for SyntaxError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 1-based line number in the original text.
    pub number: usize,
    pub text: String,
    /// The line begins inside a string literal opened on an earlier line.
    pub starts_in_string: bool,
    /// The line continues a logical line (open string, bracket, or backslash).
    pub continuation: bool,
    /// Byte offset of the first `:` outside strings and brackets.
    pub first_top_colon: Option<usize>,
}

impl SourceLine {
    /// Synthesized line with no special lexical state.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            number: 0,
            text: text.into(),
            starts_in_string: false,
            continuation: false,
            first_top_colon: None,
        }
    }

    pub fn is_trivia(&self) -> bool {
        if self.continuation {
            return false;
        }
        let trimmed = self.text.trim();
        trimmed.is_empty() || trimmed.starts_with('#')
    }

    pub fn indent(&self) -> &str {
        let trimmed = self.text.trim_start();
        &self.text[..self.text.len() - trimmed.len()]
    }

    /// `match` is a soft keyword: `match x:` opens a block, `match = 1` does not.
    fn is_match_head(&self) -> bool {
        if self.first_word() != "match" {
            return false;
        }
        let subject = self.text.trim_start()["match".len()..].trim_start();
        !subject.is_empty() && !subject.starts_with([':', '=', '.', ',', ';', ')'])
    }

    fn first_word(&self) -> &str {
        let trimmed = self.text.trim_start();
        let end = trimmed
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(trimmed.len());
        &trimmed[..end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedName {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportedName {
    /// The name this import binds in the module namespace.
    pub fn bound_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Import,
    FromImport {
        module: String,
        names: Vec<ImportedName>,
    },
    FunctionDef {
        name: String,
    },
    ClassDef {
        name: String,
        bases: Vec<String>,
    },
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Blank and comment lines directly above the statement.
    pub leading: Vec<String>,
    pub lines: Vec<SourceLine>,
    pub kind: StatementKind,
    pub compound: bool,
}

impl Statement {
    /// Index of the first line that is not a decorator.
    pub fn head_index(&self) -> usize {
        self.lines
            .iter()
            .position(|l| !l.continuation && !l.is_trivia() && !l.text.starts_with('@'))
            .unwrap_or(0)
    }

    /// Index of the line holding the header's block colon, if any.
    pub fn header_end(&self) -> Option<usize> {
        let head = self.head_index();
        self.lines
            .iter()
            .enumerate()
            .skip(head)
            .take_while(|(i, l)| *i == head || l.continuation)
            .find(|(_, l)| l.first_top_colon.is_some())
            .map(|(i, _)| i)
    }

    /// Value of a `name = "literal"` assignment directly in a class body.
    pub fn class_attribute(&self, attr: &str) -> Option<String> {
        if !matches!(self.kind, StatementKind::ClassDef { .. }) {
            return None;
        }
        let pattern = Regex::new(&format!(
            r#"^{}\s*(?::[^=]*)?=\s*(?:"([^"]*)"|'([^']*)')"#,
            regex::escape(attr)
        ))
        .ok()?;
        let body_start = self.header_end()? + 1;
        let body_indent = self.lines[body_start..]
            .iter()
            .find(|l| !l.is_trivia() && !l.continuation)
            .map(|l| l.indent().to_string())?;

        self.lines[body_start..]
            .iter()
            .filter(|l| !l.continuation && l.indent() == body_indent)
            .find_map(|l| {
                pattern.captures(l.text.trim_start()).and_then(|c| {
                    c.get(1)
                        .or_else(|| c.get(2))
                        .map(|m| m.as_str().to_string())
                })
            })
    }

    pub fn function_name(&self) -> Option<&str> {
        match &self.kind {
            StatementKind::FunctionDef { name } => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    /// Comments and blank lines before the first statement.
    pub header: Vec<String>,
    pub body: Vec<Statement>,
    /// Comments and blank lines after the last statement.
    pub footer: Vec<String>,
}

impl Module {
    pub fn functions(&self) -> impl Iterator<Item = (usize, &Statement)> {
        self.body
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.kind, StatementKind::FunctionDef { .. }))
    }

    pub fn classes(&self) -> impl Iterator<Item = &Statement> {
        self.body
            .iter()
            .filter(|s| matches!(s.kind, StatementKind::ClassDef { .. }))
    }

    pub fn to_source(&self) -> String {
        let mut out: Vec<&str> = self.header.iter().map(String::as_str).collect();
        for statement in &self.body {
            out.extend(statement.leading.iter().map(String::as_str));
            out.extend(statement.lines.iter().map(|l| l.text.as_str()));
        }
        out.extend(self.footer.iter().map(String::as_str));
        let mut source = out.join("\n");
        source.push('\n');
        source
    }
}

#[derive(Clone, Copy)]
struct OpenString {
    quote: char,
    triple: bool,
    line: usize,
}

fn is_triple(chars: &[(usize, char)], i: usize, quote: char) -> bool {
    i + 2 < chars.len() && chars[i + 1].1 == quote && chars[i + 2].1 == quote
}

/// Split source into physical lines annotated with their lexical state.
pub fn scan(source: &str) -> Result<Vec<SourceLine>, SyntaxError> {
    let mut string: Option<OpenString> = None;
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut backslash = false;
    let mut out = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let number = idx + 1;
        let starts_in_string = string.is_some();
        let continuation = starts_in_string || !brackets.is_empty() || backslash;
        backslash = false;
        let mut first_top_colon = None;
        let mut escaped_eol = false;

        let chars: Vec<(usize, char)> = raw.char_indices().collect();
        let mut i = 0;
        while i < chars.len() {
            let (pos, c) = chars[i];
            if let Some(open) = string {
                if c == '\\' {
                    escaped_eol = i + 1 == chars.len();
                    i += 2;
                    continue;
                }
                if c == open.quote {
                    if !open.triple {
                        string = None;
                        i += 1;
                        continue;
                    }
                    if is_triple(&chars, i, c) {
                        string = None;
                        i += 3;
                        continue;
                    }
                }
                i += 1;
                continue;
            }

            match c {
                '#' => break,
                '"' | '\'' => {
                    let triple = is_triple(&chars, i, c);
                    string = Some(OpenString {
                        quote: c,
                        triple,
                        line: number,
                    });
                    i += if triple { 3 } else { 1 };
                    continue;
                }
                '(' | '[' | '{' => brackets.push((c, number)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match brackets.pop() {
                        None => return Err(SyntaxError::new(number, format!("unmatched '{c}'"))),
                        Some((open, _)) if open != expected => {
                            return Err(SyntaxError::new(
                                number,
                                format!(
                                    "closing parenthesis '{c}' does not match opening parenthesis '{open}'"
                                ),
                            ))
                        }
                        Some(_) => {}
                    }
                }
                ':' if brackets.is_empty() && first_top_colon.is_none() => {
                    first_top_colon = Some(pos);
                }
                '\\' => {
                    if i + 1 != chars.len() {
                        return Err(SyntaxError::new(
                            number,
                            "unexpected character after line continuation character",
                        ));
                    }
                    backslash = true;
                }
                _ => {}
            }
            i += 1;
        }

        if let Some(open) = string {
            if !open.triple && !escaped_eol {
                return Err(SyntaxError::new(open.line, "unterminated string literal"));
            }
        }

        out.push(SourceLine {
            number,
            text: raw.to_string(),
            starts_in_string,
            continuation,
            first_top_colon,
        });
    }

    if let Some(open) = string {
        return Err(SyntaxError::new(
            open.line,
            "unterminated triple-quoted string literal",
        ));
    }
    if let Some((open, line)) = brackets.first() {
        return Err(SyntaxError::new(*line, format!("'{open}' was never closed")));
    }
    if backslash {
        return Err(SyntaxError::new(out.len(), "unexpected EOF while parsing"));
    }
    Ok(out)
}

struct Pending {
    leading: Vec<String>,
    lines: Vec<SourceLine>,
    /// Index of the most recent top-level clause header in `lines`.
    clause_start: usize,
    clause_closed: bool,
    opens_block: bool,
    has_block: bool,
}

impl Pending {
    fn new(leading: Vec<String>, line: SourceLine) -> Self {
        Self {
            leading,
            lines: vec![line],
            clause_start: 0,
            clause_closed: false,
            opens_block: false,
            has_block: false,
        }
    }

    fn is_decorator_only(&self) -> bool {
        self.lines
            .iter()
            .filter(|l| !l.continuation && !l.is_trivia())
            .all(|l| l.text.starts_with('@'))
    }

    /// Validate the current clause header once its logical line is complete.
    fn close_clause(&mut self) -> Result<(), SyntaxError> {
        if self.clause_closed {
            return Ok(());
        }
        self.clause_closed = true;
        let header = &self.lines[self.clause_start];
        if header.text.starts_with('@') {
            return Ok(());
        }
        let keyword = header.first_word().to_string();
        let logical: Vec<&SourceLine> = self.lines[self.clause_start..]
            .iter()
            .enumerate()
            .take_while(|(i, l)| *i == 0 || l.continuation)
            .map(|(_, l)| l)
            .collect();

        let colon = logical
            .iter()
            .find_map(|l| l.first_top_colon.map(|p| (*l, p)));
        match colon {
            Some((line, pos)) => {
                let rest = line.text[pos + 1..].trim();
                let is_compound = COLON_KEYWORDS.contains(&keyword.as_str())
                    || CONTINUATION_CLAUSES.contains(&keyword.as_str())
                    || header.is_match_head();
                self.opens_block = is_compound && (rest.is_empty() || rest.starts_with('#'));
            }
            None if COLON_KEYWORDS.contains(&keyword.as_str()) => {
                return Err(SyntaxError::new(header.number, "expected ':'"));
            }
            None => self.opens_block = false,
        }
        Ok(())
    }

    fn start_clause(&mut self, leading: Vec<SourceLine>, line: SourceLine) -> Result<(), SyntaxError> {
        if self.opens_block && !self.has_block {
            let header = self.lines[self.clause_start].number;
            return Err(SyntaxError::new(
                line.number,
                format!("expected an indented block after line {header}"),
            ));
        }
        self.lines.extend(leading);
        self.clause_start = self.lines.len();
        self.lines.push(line);
        self.clause_closed = false;
        self.opens_block = false;
        self.has_block = false;
        Ok(())
    }

    fn finish(mut self) -> Result<Statement, SyntaxError> {
        self.close_clause()?;
        let head_line = self.lines[self.clause_start].number;
        if self.is_decorator_only() {
            return Err(SyntaxError::new(head_line, "decorator is not followed by a definition"));
        }
        if self.opens_block && !self.has_block {
            return Err(SyntaxError::new(
                head_line,
                format!("expected an indented block after line {head_line}"),
            ));
        }

        let mut statement = Statement {
            leading: self.leading,
            lines: self.lines,
            kind: StatementKind::Other,
            compound: false,
        };
        let head = statement.head_index();
        let head_line = &statement.lines[head];
        statement.compound = statement.lines[0].text.starts_with('@')
            || COMPOUND_KEYWORDS.contains(&head_line.first_word())
            || (head_line.is_match_head() && self.has_block);
        statement.kind = classify(&statement, head)?;
        Ok(statement)
    }
}

fn classify(statement: &Statement, head: usize) -> Result<StatementKind, SyntaxError> {
    let head_line = &statement.lines[head];
    let keyword = head_line.first_word();
    let text = head_line.text.as_str();

    match keyword {
        "import" => Ok(StatementKind::Import),
        "from" => {
            // join the logical line, dropping comments inside parenthesized imports
            let joined = statement.lines[head..]
                .iter()
                .enumerate()
                .take_while(|(i, l)| *i == 0 || l.continuation)
                .map(|(_, l)| l.text.split('#').next().unwrap_or("").trim().to_string())
                .collect::<Vec<_>>()
                .join(" ");
            let caps = FROM_IMPORT_RE
                .captures(joined.trim())
                .ok_or_else(|| SyntaxError::new(head_line.number, "invalid syntax"))?;
            let module = caps[1].to_string();
            let names = caps[2]
                .trim()
                .trim_start_matches('(')
                .trim_end_matches('\\')
                .trim_end_matches(')')
                .split(',')
                .filter_map(|part| {
                    let mut words = part.split_whitespace();
                    let name = words.next()?.to_string();
                    let alias = match (words.next(), words.next()) {
                        (Some("as"), Some(alias)) => Some(alias.to_string()),
                        _ => None,
                    };
                    Some(ImportedName { name, alias })
                })
                .collect();
            Ok(StatementKind::FromImport { module, names })
        }
        "def" | "async" => match DEF_RE.captures(text) {
            Some(caps) => Ok(StatementKind::FunctionDef {
                name: caps[2].to_string(),
            }),
            None if keyword == "def" => Err(SyntaxError::new(head_line.number, "invalid syntax")),
            None => Ok(StatementKind::Other),
        },
        "class" => {
            let end = statement.header_end().unwrap_or(head);
            let joined = statement.lines[head..=end]
                .iter()
                .map(|l| l.text.trim())
                .collect::<Vec<_>>()
                .join(" ");
            let caps = CLASS_RE
                .captures(&joined)
                .ok_or_else(|| SyntaxError::new(head_line.number, "invalid syntax"))?;
            let bases = caps
                .get(2)
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(str::trim)
                        .filter(|b| !b.is_empty() && !b.contains('='))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Ok(StatementKind::ClassDef {
                name: caps[1].to_string(),
                bases,
            })
        }
        _ => Ok(StatementKind::Other),
    }
}

/// Parse a module into top-level statements.
pub fn parse_module(source: &str) -> Result<Module, SyntaxError> {
    let lines = scan(source)?;
    let mut module = Module::default();
    let mut trivia: Vec<SourceLine> = Vec::new();
    let mut current: Option<Pending> = None;

    for line in lines {
        if line.continuation {
            if let Some(pending) = current.as_mut() {
                pending.lines.push(line);
            }
            continue;
        }
        if line.is_trivia() {
            trivia.push(line);
            continue;
        }
        if let Some(pending) = current.as_mut() {
            pending.close_clause()?;
        }

        if !line.indent().is_empty() {
            match current.as_mut() {
                Some(pending) if pending.opens_block => {
                    pending.lines.append(&mut trivia);
                    pending.lines.push(line);
                    pending.has_block = true;
                }
                _ => return Err(SyntaxError::new(line.number, "unexpected indent")),
            }
            continue;
        }

        let keyword = line.first_word().to_string();
        if CONTINUATION_CLAUSES.contains(&keyword.as_str()) {
            match current.as_mut() {
                Some(pending) if is_compound_head(&pending.lines[pending.clause_start]) => {
                    let leading = std::mem::take(&mut trivia);
                    pending.start_clause(leading, line)?;
                }
                _ => return Err(SyntaxError::new(line.number, "invalid syntax")),
            }
            continue;
        }

        if let Some(pending) = current.as_mut() {
            if pending.is_decorator_only() {
                let leading = std::mem::take(&mut trivia);
                pending.start_clause(leading, line)?;
                continue;
            }
        }

        if let Some(done) = current.take() {
            module.body.push(done.finish()?);
        }
        let leading: Vec<String> = trivia.drain(..).map(|l| l.text).collect();
        if module.body.is_empty() && module.header.is_empty() {
            module.header = leading;
            current = Some(Pending::new(Vec::new(), line));
        } else {
            current = Some(Pending::new(leading, line));
        }
    }

    if let Some(done) = current.take() {
        module.body.push(done.finish()?);
    }
    module.footer = trivia.into_iter().map(|l| l.text).collect();
    Ok(module)
}

fn is_compound_head(line: &SourceLine) -> bool {
    let word = line.first_word();
    COMPOUND_KEYWORDS.contains(&word) || CONTINUATION_CLAUSES.contains(&word)
}
