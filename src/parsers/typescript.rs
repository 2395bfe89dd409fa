use super::{CallSite, ClassHeritage, ImportStatement, ParseResult, ParsedSymbol, Parser, TypeAnnotation};
use crate::model::NodeLabel;
use anyhow::Result;
use regex::Regex;

const SKIP_CALLS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "function", "return", "constructor", "super",
    "require", "console", "typeof", "new",
];

const METHOD_SKIP: &[&str] = &["constructor", "if", "for", "while", "switch", "catch", "return"];

/// Regex-based TypeScript parser.
///
/// Handles declared and arrow functions, classes with single
/// extends/implements clauses, class methods, interfaces, type aliases,
/// ES imports, call sites and parameter/return type references.
pub struct TypeScriptParser {
    function_re: Regex,
    arrow_re: Regex,
    class_re: Regex,
    method_re: Regex,
    interface_re: Regex,
    type_re: Regex,
    import_re: Regex,
    call_re: Regex,
}

impl TypeScriptParser {
    pub fn new() -> Self {
        TypeScriptParser {
            function_re: Regex::new(
                r"(?m)^(?:export\s+)?(?:async\s+)?function\s+(\w+)\s*\(([^)]*)\)(?:\s*:\s*([^\{\n]+))?",
            )
            .unwrap(),
            arrow_re: Regex::new(
                r"(?m)^(?:export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?(?:\(([^)]*)\)|(\w+))\s*(?::\s*[^=\n]+)?=>",
            )
            .unwrap(),
            class_re: Regex::new(
                r"(?m)^(?:export\s+)?(?:abstract\s+)?class\s+(\w+)(?:\s+extends\s+(\w+))?(?:\s+implements\s+([\w,\s]+))?",
            )
            .unwrap(),
            method_re: Regex::new(
                r"(?m)^\s+(?:public\s+|private\s+|protected\s+|static\s+)*(?:async\s+)?(?:get\s+|set\s+)?(\w+)\s*\(([^)]*)\)(?:\s*:\s*([^\{\n]+))?\s*\{",
            )
            .unwrap(),
            interface_re: Regex::new(r"(?m)^(?:export\s+)?interface\s+(\w+)").unwrap(),
            type_re: Regex::new(r"(?m)^(?:export\s+)?type\s+(\w+)\s*=").unwrap(),
            import_re: Regex::new(
                r#"(?m)^import\s+(?:\{([^}]+)\}|\*\s+as\s+(\w+)|(\w+))\s+from\s+['"]([^'"]+)['"]"#,
            )
            .unwrap(),
            call_re: Regex::new(r"(?:(\w+)\.)?(\w+)\s*\(").unwrap(),
        }
    }

    fn line_of(source: &str, byte_offset: usize) -> i64 {
        source[..byte_offset].bytes().filter(|b| *b == b'\n').count() as i64 + 1
    }

    fn line_is_exported(source: &str, byte_offset: usize) -> bool {
        let line_start = source[..byte_offset]
            .rfind('\n')
            .map(|idx| idx + 1)
            .unwrap_or(0);
        source[line_start..byte_offset].contains("export")
            || source[byte_offset..]
                .lines()
                .next()
                .is_some_and(|line| line.starts_with("export"))
    }

    /// Body of `class <name> { ... }` located by brace counting.
    fn class_body<'a>(source: &'a str, class_name: &str) -> Option<(&'a str, usize)> {
        let marker = format!("class {class_name}");
        let start = source.find(&marker)?;
        let open = start + source[start..].find('{')?;
        let mut depth = 0usize;
        for (offset, ch) in source[open..].char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some((&source[open + 1..open + offset], open + 1));
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn extract_type_refs(
        params: &str,
        return_type: &str,
        line_num: i64,
        out: &mut Vec<TypeAnnotation>,
    ) {
        for param in params.split(',') {
            if let Some(colon) = param.find(':') {
                let mut type_name = param[colon + 1..].trim();
                if let Some(eq) = type_name.find('=') {
                    type_name = type_name[..eq].trim();
                }
                let type_name = type_name.trim_end_matches("[]");
                if !type_name.is_empty() {
                    out.push(TypeAnnotation {
                        name: type_name.to_string(),
                        role: "param".to_string(),
                        start_line: line_num,
                    });
                }
            }
        }
        let return_type = return_type.trim().trim_end_matches("[]");
        if !return_type.is_empty() {
            out.push(TypeAnnotation {
                name: return_type.to_string(),
                role: "return".to_string(),
                start_line: line_num,
            });
        }
    }
}

impl Default for TypeScriptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for TypeScriptParser {
    fn language(&self) -> &'static str {
        "typescript"
    }

    fn parse(&self, _rel_path: &str, content: &[u8]) -> Result<ParseResult> {
        let source = String::from_utf8_lossy(content).into_owned();
        let mut result = ParseResult::default();

        for caps in self.function_re.captures_iter(&source) {
            let whole = caps.get(0).unwrap();
            let name = caps[1].to_string();
            let params = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            let return_type = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
            let line_num = Self::line_of(&source, whole.start());

            let mut sym = ParsedSymbol::new(&name, NodeLabel::Function);
            sym.start_line = line_num;
            sym.end_line = line_num;
            sym.signature = if return_type.is_empty() {
                format!("function {name}({params})")
            } else {
                format!("function {name}({params}): {return_type}")
            };
            sym.content = whole.as_str().to_string();
            sym.is_exported = Self::line_is_exported(&source, whole.start());
            result.symbols.push(sym);

            Self::extract_type_refs(params, return_type, line_num, &mut result.type_refs);
        }

        for caps in self.arrow_re.captures_iter(&source) {
            let whole = caps.get(0).unwrap();
            let name = caps[1].to_string();
            let params = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().trim())
                .unwrap_or_default();
            let line_num = Self::line_of(&source, whole.start());

            let mut sym = ParsedSymbol::new(&name, NodeLabel::Function);
            sym.start_line = line_num;
            sym.end_line = line_num;
            sym.signature = format!("const {name} = ({params}) => ...");
            sym.content = whole.as_str().to_string();
            sym.is_exported = Self::line_is_exported(&source, whole.start());
            result.symbols.push(sym);
        }

        for caps in self.class_re.captures_iter(&source) {
            let whole = caps.get(0).unwrap();
            let name = caps[1].to_string();
            let line_num = Self::line_of(&source, whole.start());

            let mut sym = ParsedSymbol::new(&name, NodeLabel::Class);
            sym.start_line = line_num;
            sym.end_line = line_num;
            sym.signature = format!("class {name}");
            sym.content = whole.as_str().to_string();
            sym.is_exported = Self::line_is_exported(&source, whole.start());
            result.symbols.push(sym);

            let mut heritage = ClassHeritage {
                class_name: name.clone(),
                ..ClassHeritage::default()
            };
            if let Some(base) = caps.get(2) {
                heritage.extends.push(base.as_str().to_string());
            }
            if let Some(ifaces) = caps.get(3) {
                for iface in ifaces.as_str().split(',') {
                    let iface = iface.trim();
                    if !iface.is_empty() {
                        heritage.implements.push(iface.to_string());
                    }
                }
            }
            if !heritage.extends.is_empty() || !heritage.implements.is_empty() {
                result.heritage.push(heritage);
            }

            // Methods inside the class body.
            if let Some((body, body_offset)) = Self::class_body(&source, &name) {
                for method_caps in self.method_re.captures_iter(body) {
                    let method_name = method_caps[1].to_string();
                    if METHOD_SKIP.contains(&method_name.as_str()) {
                        continue;
                    }
                    let params = method_caps
                        .get(2)
                        .map(|m| m.as_str().trim())
                        .unwrap_or_default();
                    let return_type = method_caps
                        .get(3)
                        .map(|m| m.as_str().trim())
                        .unwrap_or_default();
                    let method_line =
                        Self::line_of(&source, body_offset + method_caps.get(0).unwrap().start());

                    let mut sym = ParsedSymbol::new(&method_name, NodeLabel::Method);
                    sym.class_name = name.clone();
                    sym.start_line = method_line;
                    sym.end_line = method_line;
                    sym.signature = if return_type.is_empty() {
                        format!("{method_name}({params})")
                    } else {
                        format!("{method_name}({params}): {return_type}")
                    };
                    sym.is_exported = false;
                    result.symbols.push(sym);

                    Self::extract_type_refs(params, return_type, method_line, &mut result.type_refs);
                }
            }
        }

        for caps in self.interface_re.captures_iter(&source) {
            let whole = caps.get(0).unwrap();
            let name = caps[1].to_string();
            let line_num = Self::line_of(&source, whole.start());

            let mut sym = ParsedSymbol::new(&name, NodeLabel::Interface);
            sym.start_line = line_num;
            sym.end_line = line_num;
            sym.signature = format!("interface {name}");
            sym.content = whole.as_str().to_string();
            sym.is_exported = Self::line_is_exported(&source, whole.start());
            result.symbols.push(sym);
        }

        for caps in self.type_re.captures_iter(&source) {
            let whole = caps.get(0).unwrap();
            let name = caps[1].to_string();
            let line_num = Self::line_of(&source, whole.start());

            let mut sym = ParsedSymbol::new(&name, NodeLabel::TypeAlias);
            sym.start_line = line_num;
            sym.end_line = line_num;
            sym.signature = format!("type {name}");
            sym.content = whole.as_str().to_string();
            sym.is_exported = Self::line_is_exported(&source, whole.start());
            result.symbols.push(sym);
        }

        for caps in self.import_re.captures_iter(&source) {
            let whole = caps.get(0).unwrap();
            let module_path = caps[4].to_string();
            let mut imp = ImportStatement {
                is_relative: module_path.starts_with('.'),
                module_path,
                start_line: Self::line_of(&source, whole.start()),
                ..ImportStatement::default()
            };
            if let Some(named) = caps.get(1) {
                for sym in named.as_str().split(',') {
                    let sym = sym.trim();
                    let sym = sym.split(" as ").next().unwrap_or(sym).trim();
                    if !sym.is_empty() {
                        imp.symbols.push(sym.to_string());
                    }
                }
            } else if let Some(ns) = caps.get(2) {
                imp.alias = ns.as_str().to_string();
                result
                    .package_imports
                    .insert(imp.alias.clone(), imp.module_path.clone());
            } else if let Some(default) = caps.get(3) {
                imp.alias = default.as_str().to_string();
                imp.symbols.push(default.as_str().to_string());
            }
            result.imports.push(imp);
        }

        for (idx, line) in source.lines().enumerate() {
            let trimmed = line.trim();
            // Declaration and block-opening lines are not call sites.
            if trimmed.starts_with("import")
                || trimmed.starts_with("//")
                || trimmed.contains("function ")
                || trimmed.ends_with('{')
            {
                continue;
            }
            for caps in self.call_re.captures_iter(trimmed) {
                let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                if name.is_empty() || SKIP_CALLS.contains(&name) {
                    continue;
                }
                let mut call = CallSite {
                    name: name.to_string(),
                    start_line: idx as i64 + 1,
                    end_line: idx as i64 + 1,
                    ..CallSite::default()
                };
                if let Some(qualifier) = caps.get(1).map(|m| m.as_str()) {
                    if qualifier == "console" {
                        continue;
                    }
                    call.receiver = qualifier.to_string();
                }
                result.calls.push(call);
            }
        }

        Ok(result)
    }
}
