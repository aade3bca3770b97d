use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::shared::models::StrategySpec;

use super::error::{Result, StrategyError};
use super::pysource::{self, ImportedName, Module, SourceLine, Statement, StatementKind};
use super::script::{ensure_package, BASE_CLASS};

/// Name of the free function a proposal must define.
pub const ENTRY_POINT: &str = "get_committee_agendas";
/// Name the entry point takes once it becomes a method.
pub const METHOD_NAME: &str = "fetch";

const PROVENANCE: [&str; 2] = [
    "# Generated by agenda-scout from a proposed fetching strategy.",
    "# The proposed function was wrapped into a FetchingStrategy subclass; edit freely.",
];

static STRATEGY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("strategy name pattern"));
static DEF_HEAD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(async\s+)?def\s+[A-Za-z_]\w*\s*(\[.*\])?\s*\(").expect("def head pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedStrategy {
    pub name: String,
    pub class_name: String,
    pub path: PathBuf,
}

/// Rewrites proposed strategy code into a class module inside the
/// strategies package.
#[derive(Debug, Clone)]
pub struct StrategySynthesizer {
    dir: PathBuf,
}

impl StrategySynthesizer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The import name of the strategies package.
    pub fn package_name(&self) -> String {
        package_name(&self.dir)
    }

    /// Produce the module text for `spec` without touching the disk.
    pub fn render(&self, spec: &StrategySpec) -> Result<(String, String)> {
        validate_strategy_name(&spec.strategy_name)?;
        let mut module = pysource::parse_module(&spec.code)?;

        let entry = find_entry(&module)?;
        let function = module.body.remove(entry);
        let base = ensure_base_import(&mut module, &self.package_name());

        let class_name = class_name_for(&spec.strategy_name);
        let class = build_class(&class_name, &base, &function, spec)?;
        let position = module
            .body
            .iter()
            .position(|statement| statement.compound)
            .unwrap_or(module.body.len());
        if let Some(next) = module.body.get_mut(position) {
            if !next.leading.iter().any(|line| line.trim().is_empty()) {
                next.leading.splice(0..0, [String::new(), String::new()]);
            }
        }
        module.body.insert(position, class);

        let mut header: Vec<String> = PROVENANCE.iter().map(|line| line.to_string()).collect();
        header.push(String::new());
        header.append(&mut module.header);
        module.header = header;

        Ok((class_name, module.to_source()))
    }

    /// Render `spec` and write it to `<dir>/<strategy_name>.py`.
    ///
    /// Nothing is written unless rendering succeeds.
    pub fn synthesize(&self, spec: &StrategySpec) -> Result<SynthesizedStrategy> {
        let (class_name, source) = self.render(spec)?;
        ensure_package(&self.dir)?;

        let path = self.dir.join(format!("{}.py", spec.strategy_name));
        let tmp = self.dir.join(format!(".{}.py.tmp", spec.strategy_name));
        std::fs::write(&tmp, source)?;
        std::fs::rename(&tmp, &path)?;
        info!(
            "Synthesized strategy {} as {} in {}",
            spec.strategy_name,
            class_name,
            path.display()
        );

        Ok(SynthesizedStrategy {
            name: spec.strategy_name.clone(),
            class_name,
            path,
        })
    }
}

pub(crate) fn package_name(dir: &Path) -> String {
    dir.file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("strategies")
        .to_string()
}

fn validate_strategy_name(name: &str) -> Result<()> {
    if STRATEGY_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(StrategyError::Synthesis(format!(
            "strategy name '{}' must be snake_case (lower-case letters, digits, underscores)",
            name
        )))
    }
}

/// `yearly_meeting_pages` -> `YearlyMeetingPages`
pub fn class_name_for(strategy_name: &str) -> String {
    strategy_name
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect()
}

/// Locate the function to wrap. Exactly one candidate must exist.
fn find_entry(module: &Module) -> Result<usize> {
    let functions: Vec<(usize, &str)> = module
        .functions()
        .filter_map(|(index, statement)| statement.function_name().map(|name| (index, name)))
        .collect();
    let named: Vec<usize> = functions
        .iter()
        .filter(|(_, name)| *name == ENTRY_POINT)
        .map(|(index, _)| *index)
        .collect();

    match (named.as_slice(), functions.as_slice()) {
        ([only], _) => Ok(*only),
        ([], [(only, _)]) => Ok(*only),
        ([], []) => Err(StrategyError::Synthesis(
            "proposed code defines no top-level function".to_string(),
        )),
        ([], many) => Err(StrategyError::Synthesis(format!(
            "expected a function named {} or a single function, found {}: {}",
            ENTRY_POINT,
            many.len(),
            many.iter().map(|(_, name)| *name).collect::<Vec<_>>().join(", ")
        ))),
        (many, _) => Err(StrategyError::Synthesis(format!(
            "{} is defined {} times",
            ENTRY_POINT,
            many.len()
        ))),
    }
}

/// Make sure the base class is importable and return the name it is bound to.
fn ensure_base_import(module: &mut Module, package: &str) -> String {
    for statement in &module.body {
        if let StatementKind::FromImport { module: from, names } = &statement.kind {
            let last = from.trim_start_matches('.').rsplit('.').next().unwrap_or("");
            if last != package {
                continue;
            }
            if let Some(found) = names.iter().find(|n| n.name == BASE_CLASS) {
                return found.bound_name().to_string();
            }
        }
    }

    // a docstring and __future__ imports must stay ahead of every other statement
    let mut position = 0;
    if module.body.first().is_some_and(is_docstring) {
        position = 1;
    }
    while module.body.get(position).is_some_and(is_future_import) {
        position += 1;
    }
    let leading = if position == 1 && !is_future_import(&module.body[0]) {
        vec![String::new()]
    } else {
        Vec::new()
    };

    module.body.insert(
        position,
        Statement {
            leading,
            lines: vec![SourceLine::plain(format!("from {package} import {BASE_CLASS}"))],
            kind: StatementKind::FromImport {
                module: package.to_string(),
                names: vec![ImportedName {
                    name: BASE_CLASS.to_string(),
                    alias: None,
                }],
            },
            compound: false,
        },
    );
    BASE_CLASS.to_string()
}

fn is_docstring(statement: &Statement) -> bool {
    if statement.kind != StatementKind::Other {
        return false;
    }
    let text = statement.lines[0].text.trim_start();
    let unprefixed = text.trim_start_matches(['r', 'R', 'u', 'U']);
    text.len() - unprefixed.len() <= 1 && unprefixed.starts_with(['"', '\''])
}

fn is_future_import(statement: &Statement) -> bool {
    matches!(&statement.kind, StatementKind::FromImport { module, .. } if module == "__future__")
}

fn build_class(class_name: &str, base: &str, function: &Statement, spec: &StrategySpec) -> Result<Statement> {
    let header_end = function
        .header_end()
        .ok_or_else(|| StrategyError::Synthesis("function header has no ':'".to_string()))?;
    let body = &function.lines[header_end + 1..];
    let first_body = body.iter().find(|l| !l.is_trivia() && !l.continuation);
    let unit = match first_body.map(|l| l.indent()) {
        Some(indent) if indent.starts_with('\t') => "\t",
        _ => "    ",
    };

    let mut lines = vec![format!("class {class_name}({base}):")];
    let notes = spec
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Agenda fetching strategy {}.", spec.strategy_name));
    push_docstring(&mut lines, unit, &notes);
    lines.push(format!("{unit}name = \"{}\"", spec.strategy_name));
    lines.push(String::new());

    // comments written above the proposed function stay above the method
    let comments = function.leading.iter().skip_while(|line| line.trim().is_empty());
    for comment in comments {
        if comment.trim().is_empty() {
            lines.push(String::new());
        } else {
            lines.push(format!("{unit}{}", comment.trim_start()));
        }
    }

    for decorator in &function.lines[..function.head_index()] {
        lines.push(shift(decorator, unit));
    }

    let mut header: Vec<String> = function.lines[function.head_index()..=header_end]
        .iter()
        .map(|l| l.text.clone())
        .collect();
    let mut inline_body = None;
    let colon_line = &function.lines[header_end];
    if let (Some(colon), Some(last)) = (colon_line.first_top_colon, header.last_mut()) {
        let rest = last[colon + 1..].trim().to_string();
        if !rest.is_empty() && !rest.starts_with('#') {
            inline_body = Some(rest);
            last.truncate(colon + 1);
        }
    }
    header[0] = rewrite_def(&header[0])?;
    let header_lines = &function.lines[function.head_index()..=header_end];
    for (text, original) in header.iter().zip(header_lines) {
        if original.starts_in_string {
            lines.push(text.clone());
        } else {
            lines.push(format!("{unit}{text}"));
        }
    }

    let body_indent = match (&inline_body, first_body) {
        (None, Some(line)) => line.indent().to_string(),
        _ => unit.to_string(),
    };
    let method_doc = method_docstring(spec);
    push_docstring(&mut lines, &format!("{unit}{body_indent}"), &method_doc);

    if let Some(inline) = inline_body {
        lines.push(format!("{unit}{body_indent}{inline}"));
    }
    for line in body {
        lines.push(shift(line, unit));
    }

    Ok(Statement {
        leading: vec![String::new(), String::new()],
        lines: lines.into_iter().map(SourceLine::plain).collect(),
        kind: StatementKind::ClassDef {
            name: class_name.to_string(),
            bases: vec![base.to_string()],
        },
        compound: true,
    })
}

/// Indent a line by one level unless it sits inside a string literal.
fn shift(line: &SourceLine, unit: &str) -> String {
    if line.starts_in_string {
        line.text.clone()
    } else if line.text.trim().is_empty() {
        String::new()
    } else {
        format!("{unit}{}", line.text)
    }
}

/// `def get_committee_agendas(a, b):` -> `def fetch(self, a, b):`
fn rewrite_def(head: &str) -> Result<String> {
    let found = DEF_HEAD_RE
        .captures(head)
        .ok_or_else(|| StrategyError::Synthesis(format!("cannot rewrite '{}'", head.trim())))?;
    let prefix = found.get(1).map(|m| m.as_str()).unwrap_or("");
    let type_params = found.get(2).map(|m| m.as_str()).unwrap_or("");
    let rest = &head[found.get(0).map(|m| m.end()).unwrap_or(0)..];

    let params = if rest.trim_start().starts_with(')') {
        format!("self{}", rest.trim_start())
    } else if rest.trim().is_empty() {
        "self,".to_string()
    } else {
        format!("self, {}", rest.trim_start())
    };
    Ok(format!("{prefix}def {METHOD_NAME}{type_params}({params}"))
}

fn method_docstring(spec: &StrategySpec) -> String {
    let mut doc = String::new();
    if !spec.schema.is_empty() {
        doc.push_str("Args:\n");
        for (field, description) in &spec.schema {
            let flat = description.split_whitespace().collect::<Vec<_>>().join(" ");
            doc.push_str(&format!("    {field}: {flat}\n"));
        }
        doc.push('\n');
    }
    doc.push_str("Returns:\n    List of {date, agenda}");
    doc
}

fn push_docstring(lines: &mut Vec<String>, indent: &str, text: &str) {
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
    if !escaped.contains('\n') {
        lines.push(format!("{indent}\"\"\"{escaped}\"\"\""));
        return;
    }
    lines.push(format!("{indent}\"\"\""));
    for line in escaped.lines() {
        if line.trim().is_empty() {
            lines.push(String::new());
        } else {
            lines.push(format!("{indent}{}", line.trim_end()));
        }
    }
    lines.push(format!("{indent}\"\"\""));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::collections::BTreeMap;

    fn spec(name: &str, code: &str) -> StrategySpec {
        let mut schema = BTreeMap::new();
        schema.insert("page_url".to_string(), "Committee page".to_string());
        schema.insert("link_pattern".to_string(), "Regex for\n agenda links".to_string());
        StrategySpec {
            committee_name: Some("Planning Commission".into()),
            strategy_name: name.to_string(),
            schema,
            values: Map::new(),
            code: code.to_string(),
            notes: Some("Links matched on one page.".into()),
        }
    }

    const PROPOSAL: &str = r#"import re
import requests

PATTERN = re.compile("agenda", re.I)


def get_committee_agendas(page_url, link_pattern):
    html = requests.get(page_url).text
    return [
        {"date": m, "agenda": page_url}
        for m in re.findall(link_pattern, html)
    ]


if __name__ == "__main__":
    print("manual run")
"#;

    const EXPECTED: &str = r#"# Generated by agenda-scout from a proposed fetching strategy.
# The proposed function was wrapped into a FetchingStrategy subclass; edit freely.

from strategies import FetchingStrategy
import re
import requests

PATTERN = re.compile("agenda", re.I)


class MatchLinks(FetchingStrategy):
    """Links matched on one page."""
    name = "match_links"

    def fetch(self, page_url, link_pattern):
        """
        Args:
            link_pattern: Regex for agenda links
            page_url: Committee page

        Returns:
            List of {date, agenda}
        """
        html = requests.get(page_url).text
        return [
            {"date": m, "agenda": page_url}
            for m in re.findall(link_pattern, html)
        ]


if __name__ == "__main__":
    print("manual run")
"#;

    #[test]
    fn wraps_entry_point_into_class() {
        let synthesizer = StrategySynthesizer::new("strategies");
        let (class_name, source) = synthesizer.render(&spec("match_links", PROPOSAL)).unwrap();
        assert_eq!(class_name, "MatchLinks");
        assert_eq!(source, EXPECTED);
    }

    #[test]
    fn rendered_module_parses_and_declares_the_strategy() {
        let synthesizer = StrategySynthesizer::new("strategies");
        let (_, source) = synthesizer.render(&spec("match_links", PROPOSAL)).unwrap();
        let module = pysource::parse_module(&source).unwrap();
        let class = module.classes().next().unwrap();
        assert_eq!(class.class_attribute("name").as_deref(), Some("match_links"));
        assert!(module.functions().next().is_none());
    }

    #[test]
    fn existing_base_import_is_reused() {
        let code = "from strategies import FetchingStrategy as Base\n\ndef get_committee_agendas(url): return []\n";
        let synthesizer = StrategySynthesizer::new("/srv/scout/strategies");
        let (_, source) = synthesizer.render(&spec("inline_body", code)).unwrap();
        assert_eq!(source.matches("import FetchingStrategy").count(), 1);
        assert!(source.contains("class InlineBody(Base):"));
        assert!(source.contains("    def fetch(self, url):\n        \"\"\"\n"));
        assert!(source.contains("        \"\"\"\n        return []\n"));
    }

    #[test]
    fn base_import_follows_docstring_and_future_imports() {
        let code = "\"\"\"Planning agendas.\"\"\"\nfrom __future__ import annotations\n\nimport re\n\n\n# Dated PDF links only.\n# Minutes are skipped.\ndef get_committee_agendas(page_url: str) -> list[dict]:\n    return []\n";
        let (_, source) = StrategySynthesizer::new("strategies")
            .render(&spec("planning_pdfs", code))
            .unwrap();

        let lines: Vec<&str> = source.lines().collect();
        assert_eq!(lines[3], "\"\"\"Planning agendas.\"\"\"");
        assert_eq!(lines[4], "from __future__ import annotations");
        assert_eq!(lines[5], "from strategies import FetchingStrategy");
        assert!(source.contains(
            "    name = \"planning_pdfs\"\n\n    # Dated PDF links only.\n    # Minutes are skipped.\n    def fetch(self, page_url: str) -> list[dict]:\n"
        ));
        pysource::parse_module(&source).unwrap();
    }

    #[test]
    fn base_import_after_a_lone_docstring_is_spaced() {
        let code = "'''Board agendas.'''\n\ndef get_committee_agendas(url):\n    return []\n";
        let (_, source) = StrategySynthesizer::new("strategies")
            .render(&spec("board", code))
            .unwrap();
        assert!(source.contains("'''Board agendas.'''\n\nfrom strategies import FetchingStrategy\n"));
    }

    #[test]
    fn top_level_match_stays_below_the_class() {
        let code = "MODE = 'pdf'\n\nmatch MODE:\n    case 'pdf':\n        SUFFIX = '.pdf'\n    case _:\n        SUFFIX = ''\n\n\ndef get_committee_agendas(url):\n    return [url + SUFFIX]\n";
        let (_, source) = StrategySynthesizer::new("strategies")
            .render(&spec("modal", code))
            .unwrap();
        let module = pysource::parse_module(&source).unwrap();
        let compound: Vec<bool> = module.body.iter().map(|s| s.compound).collect();
        assert_eq!(compound, vec![false, false, true, true]);
        assert!(source.contains("    case 'pdf':\n        SUFFIX = '.pdf'\n"));
    }

    #[test]
    fn single_differently_named_function_is_accepted() {
        let code = "def scrape(url):\n    return []\n";
        let (_, source) = StrategySynthesizer::new("strategies")
            .render(&spec("renamed", code))
            .unwrap();
        assert!(source.contains("    def fetch(self, url):"));
    }

    #[test]
    fn ambiguous_entry_points_fail_loudly() {
        let synthesizer = StrategySynthesizer::new("strategies");
        let two_helpers = "def a():\n    pass\n\ndef b():\n    pass\n";
        let err = synthesizer.render(&spec("two", two_helpers)).unwrap_err();
        assert!(err.to_string().contains("found 2: a, b"), "{err}");

        let twice = "def get_committee_agendas():\n    pass\n\ndef get_committee_agendas():\n    pass\n";
        let err = synthesizer.render(&spec("twice", twice)).unwrap_err();
        assert!(err.to_string().contains("defined 2 times"), "{err}");

        let none = "x = 1\n";
        assert!(synthesizer.render(&spec("none", none)).is_err());
    }

    #[test]
    fn parameterless_and_multiline_headers() {
        assert_eq!(rewrite_def("def get_committee_agendas():").unwrap(), "def fetch(self):");
        assert_eq!(rewrite_def("async def go(a, *, b=1):").unwrap(), "async def fetch(self, a, *, b=1):");
        assert_eq!(rewrite_def("def go(").unwrap(), "def fetch(self,");
        assert_eq!(
            rewrite_def("def go[T: list[int]](items: list[T]) -> T:").unwrap(),
            "def fetch[T: list[int]](self, items: list[T]) -> T:"
        );
    }

    #[test]
    fn class_names_are_title_cased() {
        assert_eq!(class_name_for("yearly_meeting_pages_with_pdf_links"), "YearlyMeetingPagesWithPdfLinks");
        assert_eq!(class_name_for("html_v2__table"), "HtmlV2Table");
    }

    #[test]
    fn invalid_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let synthesizer = StrategySynthesizer::new(dir.path().join("strategies"));

        let err = synthesizer
            .synthesize(&spec("broken", "def get_committee_agendas(:\n    pass\n"))
            .unwrap_err();
        assert!(matches!(err, StrategyError::Syntax(_)));
        let err = synthesizer.synthesize(&spec("Bad-Name", PROPOSAL)).unwrap_err();
        assert!(matches!(err, StrategyError::Synthesis(_)));
        assert!(!dir.path().join("strategies").exists());
    }

    #[test]
    fn synthesize_writes_module_into_package() {
        let dir = tempfile::tempdir().unwrap();
        let strategies = dir.path().join("strategies");
        let synthesizer = StrategySynthesizer::new(&strategies);

        let written = synthesizer.synthesize(&spec("match_links", PROPOSAL)).unwrap();

        assert_eq!(written.path, strategies.join("match_links.py"));
        assert_eq!(std::fs::read_to_string(&written.path).unwrap(), EXPECTED);
        assert!(strategies.join("__init__.py").exists());
        assert!(!strategies.join(".match_links.py.tmp").exists());
    }
}
