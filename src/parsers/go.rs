use super::{CallSite, ImportStatement, ParseResult, ParsedSymbol, Parser, TypeAnnotation};
use crate::model::NodeLabel;
use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;

/// Go keywords and builtins that look like calls to the line scanner.
const SKIP_CALLS: &[&str] = &[
    "if", "for", "switch", "select", "func", "return", "go", "defer", "range", "make", "new",
    "len", "cap", "append", "copy", "delete", "panic", "recover", "print", "println", "string",
    "int", "int32", "int64", "float64", "byte", "error",
];

/// Line-oriented Go parser.
///
/// Extracts package/import structure, top-level functions and methods
/// (with the receiver canonicalised to its type name), struct/interface/
/// type declarations, call sites and field/parameter type references.
pub struct GoParser {
    package_re: Regex,
    import_single_re: Regex,
    import_line_re: Regex,
    func_re: Regex,
    type_re: Regex,
    call_re: Regex,
    field_re: Regex,
}

impl GoParser {
    pub fn new() -> Self {
        GoParser {
            package_re: Regex::new(r"^package\s+(\w+)").unwrap(),
            import_single_re: Regex::new(r#"^import\s+(?:(\w+)\s+)?"([^"]+)""#).unwrap(),
            import_line_re: Regex::new(r#"^\s*(?:(\w+)\s+)?"([^"]+)"\s*$"#).unwrap(),
            func_re: Regex::new(
                r"^func\s+(?:\((\w+)\s+\*?(\w+)\)\s+)?(\w+)\s*\(([^)]*)\)\s*(.*?)\s*\{?\s*$",
            )
            .unwrap(),
            type_re: Regex::new(r"^type\s+(\w+)\s+(.+)$").unwrap(),
            call_re: Regex::new(r"(?:(\w+)\.)?(\w+)\s*\(").unwrap(),
            field_re: Regex::new(r"^\s*(\w+)\s+(?:\[\])?\*?([\w./]+)").unwrap(),
        }
    }

    fn is_exported(name: &str) -> bool {
        name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
    }

    /// Maps receiver variable names to their type names, e.g. `s` ->
    /// `Server` from `func (s *Server) ...`. Built in a first pass so
    /// call receivers can be canonicalised to class names.
    fn build_receiver_map(&self, lines: &[&str]) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for line in lines {
            if let Some(caps) = self.func_re.captures(line.trim_end()) {
                if let (Some(var), Some(ty)) = (caps.get(1), caps.get(2)) {
                    map.insert(var.as_str().to_string(), ty.as_str().to_string());
                }
            }
        }
        map
    }

    /// Finds the end line of a brace-delimited block starting at
    /// `start`. Returns `start` when the line has no opening brace.
    fn block_end(lines: &[&str], start: usize) -> usize {
        let mut depth = 0i32;
        let mut opened = false;
        for (offset, line) in lines[start..].iter().enumerate() {
            for ch in line.chars() {
                match ch {
                    '{' => {
                        depth += 1;
                        opened = true;
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            if opened && depth <= 0 {
                return start + offset;
            }
        }
        if opened {
            lines.len().saturating_sub(1)
        } else {
            start
        }
    }

    fn extract_calls(
        &self,
        line: &str,
        line_num: i64,
        package_imports: &HashMap<String, String>,
        receiver_map: &HashMap<String, String>,
        out: &mut Vec<CallSite>,
    ) {
        let trimmed = line.trim();
        if trimmed.starts_with("func ") || trimmed.starts_with("//") {
            return;
        }
        for caps in self.call_re.captures_iter(trimmed) {
            let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            if name.is_empty() || SKIP_CALLS.contains(&name) {
                continue;
            }
            let mut call = CallSite {
                name: name.to_string(),
                start_line: line_num,
                end_line: line_num,
                ..CallSite::default()
            };
            if let Some(qualifier) = caps.get(1).map(|m| m.as_str()) {
                if let Some(pkg_path) = package_imports.get(qualifier) {
                    // Package-qualified call: pkg.Function().
                    call.package = pkg_path.clone();
                } else if let Some(type_name) = receiver_map.get(qualifier) {
                    // Method call through a known receiver variable.
                    call.receiver = type_name.clone();
                } else {
                    call.receiver = qualifier.to_string();
                }
            }
            out.push(call);
        }
    }

    fn parse_type_decl(
        &self,
        lines: &[&str],
        line_idx: usize,
        name: &str,
        rest: &str,
        result: &mut ParseResult,
    ) {
        let mut sym = ParsedSymbol::new(name, NodeLabel::TypeAlias);
        sym.start_line = line_idx as i64 + 1;
        sym.is_exported = Self::is_exported(name);

        if rest.starts_with("struct") {
            sym.kind = NodeLabel::Class;
            sym.signature = format!("type {name} struct");
            let end = Self::block_end(lines, line_idx);
            sym.end_line = end as i64 + 1;
            sym.content = lines[line_idx..=end].join("\n");
            // Struct fields become field-role type references.
            for (offset, line) in lines[line_idx + 1..end.max(line_idx + 1)].iter().enumerate() {
                if let Some(caps) = self.field_re.captures(line) {
                    let type_text = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                    let type_name = type_text.rsplit('.').next().unwrap_or(type_text);
                    if !type_name.is_empty() {
                        result.type_refs.push(TypeAnnotation {
                            name: type_name.to_string(),
                            role: "field".to_string(),
                            start_line: (line_idx + 1 + offset) as i64 + 1,
                        });
                    }
                }
            }
        } else if rest.starts_with("interface") {
            sym.kind = NodeLabel::Interface;
            sym.signature = format!("type {name} interface");
            let end = Self::block_end(lines, line_idx);
            sym.end_line = end as i64 + 1;
            sym.content = lines[line_idx..=end].join("\n");
            for (offset, line) in lines[line_idx + 1..end.max(line_idx + 1)].iter().enumerate() {
                let trimmed = line.trim();
                if let Some(method) = trimmed.split('(').next() {
                    let method = method.trim();
                    if !method.is_empty() && method.chars().all(|c| c.is_alphanumeric() || c == '_')
                    {
                        result.type_refs.push(TypeAnnotation {
                            name: method.to_string(),
                            role: "method".to_string(),
                            start_line: (line_idx + 1 + offset) as i64 + 1,
                        });
                    }
                }
            }
        } else {
            sym.signature = format!("type {name} {rest}");
            sym.end_line = sym.start_line;
            sym.content = lines[line_idx].to_string();
        }
        result.symbols.push(sym);
    }
}

impl Default for GoParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for GoParser {
    fn language(&self) -> &'static str {
        "go"
    }

    fn parse(&self, _rel_path: &str, content: &[u8]) -> Result<ParseResult> {
        let source = String::from_utf8_lossy(content);
        let lines: Vec<&str> = source.lines().collect();
        let mut result = ParseResult::default();
        let receiver_map = self.build_receiver_map(&lines);

        let mut in_import_block = false;
        let mut idx = 0;
        while idx < lines.len() {
            let line = lines[idx];
            let trimmed = line.trim();
            let line_num = idx as i64 + 1;

            if let Some(caps) = self.package_re.captures(trimmed) {
                result.package = caps[1].to_string();
                idx += 1;
                continue;
            }

            if trimmed.starts_with("import (") {
                in_import_block = true;
                idx += 1;
                continue;
            }
            if in_import_block {
                if trimmed == ")" {
                    in_import_block = false;
                } else if let Some(caps) = self.import_line_re.captures(line) {
                    push_import(&mut result, &caps, line_num);
                }
                idx += 1;
                continue;
            }
            if let Some(caps) = self.import_single_re.captures(trimmed) {
                push_import(&mut result, &caps, line_num);
                idx += 1;
                continue;
            }

            if let Some(caps) = self.func_re.captures(trimmed) {
                let name = caps[3].to_string();
                let params = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
                let returns = caps.get(5).map(|m| m.as_str().trim()).unwrap_or_default();
                let receiver_type = caps.get(2).map(|m| m.as_str().to_string());

                let mut sym = ParsedSymbol::new(
                    &name,
                    if receiver_type.is_some() {
                        NodeLabel::Method
                    } else {
                        NodeLabel::Function
                    },
                );
                sym.class_name = receiver_type.unwrap_or_default();
                sym.is_exported = Self::is_exported(&name);
                sym.start_line = line_num;
                let end = Self::block_end(&lines, idx);
                sym.end_line = end as i64 + 1;
                sym.content = lines[idx..=end].join("\n");
                sym.signature = if returns.is_empty() {
                    format!("{name}({params})")
                } else {
                    format!("{name}({params}) {returns}")
                };
                result.symbols.push(sym);

                // Parameter type references.
                for param in params.split(',') {
                    let mut words = param.trim().split_whitespace();
                    let _ = words.next();
                    if let Some(type_text) = words.next() {
                        let cleaned = type_text.trim_start_matches(['*', '[', ']']);
                        let type_name = cleaned.rsplit('.').next().unwrap_or(cleaned);
                        if !type_name.is_empty() {
                            result.type_refs.push(TypeAnnotation {
                                name: type_name.to_string(),
                                role: "param".to_string(),
                                start_line: line_num,
                            });
                        }
                    }
                }

                // Calls inside the function body.
                for (offset, body_line) in lines[idx + 1..=end.max(idx)].iter().enumerate() {
                    self.extract_calls(
                        body_line,
                        (idx + 1 + offset) as i64 + 1,
                        &result.package_imports,
                        &receiver_map,
                        &mut result.calls,
                    );
                }
                idx = end.max(idx) + 1;
                continue;
            }

            if let Some(caps) = self.type_re.captures(trimmed) {
                let name = caps[1].to_string();
                let rest = caps[2].to_string();
                let before = result.symbols.len();
                self.parse_type_decl(&lines, idx, &name, &rest, &mut result);
                let end = result.symbols[before].end_line as usize;
                idx = end.max(idx + 1);
                continue;
            }

            idx += 1;
        }

        Ok(result)
    }
}

fn push_import(result: &mut ParseResult, caps: &regex::Captures<'_>, line_num: i64) {
    let module_path = caps[2].to_string();
    let alias = match caps.get(1) {
        Some(m) => m.as_str().to_string(),
        None => module_path
            .rsplit('/')
            .next()
            .unwrap_or(&module_path)
            .to_string(),
    };
    result
        .package_imports
        .insert(alias.clone(), module_path.clone());
    result.imports.push(ImportStatement {
        module_path,
        alias,
        is_relative: false,
        symbols: Vec::new(),
        start_line: line_num,
    });
}
