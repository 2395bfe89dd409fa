use super::{CallSite, ClassHeritage, ImportStatement, ParseResult, ParsedSymbol, Parser, TypeAnnotation};
use crate::model::NodeLabel;
use anyhow::Result;
use regex::Regex;

const SKIP_CALLS: &[&str] = &[
    "def", "class", "if", "elif", "for", "while", "with", "except", "return", "print", "len",
    "range", "isinstance", "super", "str", "int", "float", "list", "dict", "set", "tuple",
];

/// Line-oriented Python parser.
///
/// Tracks the enclosing class by indentation so `def` lines inside a
/// class body become methods, collects decorators, splits class bases
/// into extends/implements (`*Mixin`/`*Protocol` count as interfaces),
/// and extracts imports, call sites and type annotations.
pub struct PythonParser {
    function_re: Regex,
    class_re: Regex,
    import_re: Regex,
    call_re: Regex,
}

impl PythonParser {
    pub fn new() -> Self {
        PythonParser {
            function_re: Regex::new(
                r"^(?:async\s+)?def\s+(?P<name>\w+)\s*\((?P<params>[^)]*)\)\s*(?:->\s*(?P<ret>[^:]+))?:",
            )
            .unwrap(),
            class_re: Regex::new(r"^class\s+(\w+)(?:\(([^)]*)\))?\s*:").unwrap(),
            import_re: Regex::new(r"^(?:from\s+([\w.]+)\s+)?import\s+(.+)").unwrap(),
            call_re: Regex::new(r"(\w+)\s*\(").unwrap(),
        }
    }

    fn extract_calls(&self, line: &str, line_num: i64, out: &mut Vec<CallSite>) {
        for caps in self.call_re.captures_iter(line) {
            let m = caps.get(1).unwrap();
            let name = m.as_str();
            if SKIP_CALLS.contains(&name) {
                continue;
            }
            let mut call = CallSite {
                name: name.to_string(),
                start_line: line_num,
                end_line: line_num,
                ..CallSite::default()
            };
            // obj.method() keeps the text before the dot as receiver; the
            // downstream intra-file pass compensates when this is a
            // variable rather than a class name.
            let before = &line[..m.start()];
            if let Some(stripped) = before.strip_suffix('.') {
                if let Some(recv) = stripped
                    .rsplit(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .next()
                {
                    if !recv.is_empty() {
                        call.receiver = recv.to_string();
                    }
                }
            }
            out.push(call);
        }
    }

    fn extract_type_annotations(line: &str, line_num: i64, out: &mut Vec<TypeAnnotation>) {
        if let Some(idx) = line.find("->") {
            let mut ret = line[idx + 2..].trim();
            if let Some(colon) = ret.find(':') {
                ret = ret[..colon].trim();
            }
            if !ret.is_empty() {
                out.push(TypeAnnotation {
                    name: ret.to_string(),
                    role: "return".to_string(),
                    start_line: line_num,
                });
            }
        }
        if let (Some(open), Some(close)) = (line.find('('), line.rfind(')')) {
            if close > open {
                for param in line[open + 1..close].split(',') {
                    if let Some(colon) = param.find(':') {
                        let mut type_name = param[colon + 1..].trim();
                        if let Some(eq) = type_name.find('=') {
                            type_name = type_name[..eq].trim();
                        }
                        if !type_name.is_empty() {
                            out.push(TypeAnnotation {
                                name: type_name.to_string(),
                                role: "param".to_string(),
                                start_line: line_num,
                            });
                        }
                    }
                }
            }
        }
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for PythonParser {
    fn language(&self) -> &'static str {
        "python"
    }

    fn parse(&self, _rel_path: &str, content: &[u8]) -> Result<ParseResult> {
        let source = String::from_utf8_lossy(content);
        let mut result = ParseResult::default();
        let mut current_class = String::new();
        let mut decorators: Vec<String> = Vec::new();

        for (idx, line) in source.lines().enumerate() {
            let line_num = idx as i64 + 1;
            let trimmed = line.trim();
            let indented = line.starts_with(' ') || line.starts_with('\t');

            if let Some(dec) = trimmed.strip_prefix('@') {
                let dec = match dec.find('(') {
                    Some(paren) => &dec[..paren],
                    None => dec,
                };
                decorators.push(dec.to_string());
                continue;
            }

            if let Some(caps) = self.function_re.captures(trimmed) {
                let name = caps["name"].to_string();
                let params = caps.name("params").map(|m| m.as_str()).unwrap_or_default();
                let ret = caps.name("ret").map(|m| m.as_str().trim());

                let (kind, class_name) = if !current_class.is_empty() && indented {
                    (NodeLabel::Method, current_class.clone())
                } else {
                    (NodeLabel::Function, String::new())
                };

                let mut sym = ParsedSymbol::new(&name, kind);
                sym.class_name = class_name;
                sym.start_line = line_num;
                sym.end_line = line_num;
                sym.content = trimmed.to_string();
                sym.signature = match ret {
                    Some(ret) => format!("{name}({params}) -> {ret}"),
                    None => format!("{name}({params})"),
                };
                sym.is_exported = !name.starts_with('_');
                sym.decorators = std::mem::take(&mut decorators);
                result.symbols.push(sym);

                Self::extract_type_annotations(trimmed, line_num, &mut result.type_refs);
                continue;
            }

            if let Some(caps) = self.class_re.captures(trimmed) {
                let class_name = caps[1].to_string();
                let mut sym = ParsedSymbol::new(&class_name, NodeLabel::Class);
                sym.start_line = line_num;
                sym.end_line = line_num;
                sym.content = trimmed.to_string();
                sym.signature = trimmed.trim_end_matches(':').to_string();
                sym.is_exported = !class_name.starts_with('_');
                sym.decorators = std::mem::take(&mut decorators);
                result.symbols.push(sym);

                if let Some(bases) = caps.get(2) {
                    let mut heritage = ClassHeritage {
                        class_name: class_name.clone(),
                        ..ClassHeritage::default()
                    };
                    for base in bases.as_str().split(',') {
                        let base = base.trim();
                        if base.is_empty() {
                            continue;
                        }
                        if base.ends_with("Mixin") || base.ends_with("Protocol") {
                            heritage.implements.push(base.to_string());
                        } else {
                            heritage.extends.push(base.to_string());
                        }
                    }
                    if !heritage.extends.is_empty() || !heritage.implements.is_empty() {
                        result.heritage.push(heritage);
                    }
                }

                current_class = class_name;
                continue;
            }

            // A non-empty top-level statement ends the class body.
            if !trimmed.is_empty() && !indented {
                current_class.clear();
            }

            if let Some(caps) = self.import_re.captures(trimmed) {
                let mut imp = ImportStatement {
                    start_line: line_num,
                    ..ImportStatement::default()
                };
                match caps.get(1) {
                    Some(module) => {
                        // from X import a, b as c
                        imp.module_path = module.as_str().to_string();
                        imp.is_relative = imp.module_path.starts_with('.');
                        for sym in caps[2].split(',') {
                            let sym = sym.trim();
                            let sym = sym.split(" as ").next().unwrap_or(sym).trim();
                            if !sym.is_empty() {
                                imp.symbols.push(sym.to_string());
                            }
                        }
                    }
                    None => {
                        // import X [as Y]
                        for part in caps[2].split(',') {
                            let part = part.trim();
                            let module = part.split(" as ").next().unwrap_or(part).trim();
                            imp.module_path = module.to_string();
                        }
                    }
                }
                if !imp.module_path.is_empty() {
                    result.imports.push(imp);
                }
                continue;
            }

            if trimmed.contains('(')
                && !trimmed.starts_with("def ")
                && !trimmed.starts_with("class ")
            {
                self.extract_calls(trimmed, line_num, &mut result.calls);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"import os
from .utils import helper, clean as scrub

@app.route("/users")
def list_users(limit: int = 10) -> Response:
    rows = fetch(limit)
    return render(rows)

class BaseService:
    def start(self):
        self.configure()

    def configure(self):
        pass

class UserService(BaseService, LoggingMixin):
    def get_user(self, user_id: int) -> User:
        return self.lookup(user_id)

def _private_helper():
    pass
"#;

    fn parse() -> ParseResult {
        PythonParser::new().parse("svc.py", SAMPLE.as_bytes()).unwrap()
    }

    #[test]
    fn functions_and_methods() {
        let result = parse();
        let list_users = result.symbols.iter().find(|s| s.name == "list_users").unwrap();
        assert_eq!(list_users.kind, NodeLabel::Function);
        assert_eq!(list_users.decorators, vec!["app.route".to_string()]);

        let start = result.symbols.iter().find(|s| s.name == "start").unwrap();
        assert_eq!(start.kind, NodeLabel::Method);
        assert_eq!(start.class_name, "BaseService");

        let get_user = result.symbols.iter().find(|s| s.name == "get_user").unwrap();
        assert_eq!(get_user.class_name, "UserService");
    }

    #[test]
    fn class_context_survives_method_bodies() {
        // `configure` is declared after a statement inside `start`; the
        // indentation tracking must still attribute it to BaseService.
        let result = parse();
        let configure = result.symbols.iter().find(|s| s.name == "configure").unwrap();
        assert_eq!(configure.kind, NodeLabel::Method);
        assert_eq!(configure.class_name, "BaseService");
    }

    #[test]
    fn heritage_splits_mixins() {
        let result = parse();
        let heritage = result
            .heritage
            .iter()
            .find(|h| h.class_name == "UserService")
            .unwrap();
        assert_eq!(heritage.extends, vec!["BaseService".to_string()]);
        assert_eq!(heritage.implements, vec!["LoggingMixin".to_string()]);
    }

    #[test]
    fn imports_with_symbols() {
        let result = parse();
        assert!(result.imports.iter().any(|i| i.module_path == "os"));
        let utils = result
            .imports
            .iter()
            .find(|i| i.module_path == ".utils")
            .unwrap();
        assert!(utils.is_relative);
        assert_eq!(utils.symbols, vec!["helper".to_string(), "clean".to_string()]);
    }

    #[test]
    fn calls_capture_receiver_text() {
        let result = parse();
        let lookup = result.calls.iter().find(|c| c.name == "lookup").unwrap();
        assert_eq!(lookup.receiver, "self");
        assert!(result.calls.iter().any(|c| c.name == "fetch"));
    }

    #[test]
    fn type_annotations_extracted() {
        let result = parse();
        assert!(result
            .type_refs
            .iter()
            .any(|t| t.name == "Response" && t.role == "return"));
        assert!(result
            .type_refs
            .iter()
            .any(|t| t.name == "User" && t.role == "return"));
        assert!(result
            .type_refs
            .iter()
            .any(|t| t.name == "int" && t.role == "param"));
    }

    #[test]
    fn underscore_names_are_private() {
        let result = parse();
        let private = result
            .symbols
            .iter()
            .find(|s| s.name == "_private_helper")
            .unwrap();
        assert!(!private.is_exported);
    }
}
