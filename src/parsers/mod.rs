use crate::model::NodeLabel;
use anyhow::Result;
use std::collections::HashMap;

pub mod go;
pub mod python;
pub mod typescript;

/// A code entity extracted from a source file.
#[derive(Debug, Clone)]
pub struct ParsedSymbol {
    pub name: String,
    pub kind: NodeLabel,
    /// 1-based line numbers.
    pub start_line: i64,
    pub end_line: i64,
    pub content: String,
    pub signature: String,
    /// Parent class name, set for methods only.
    pub class_name: String,
    pub is_exported: bool,
    pub decorators: Vec<String>,
}

impl ParsedSymbol {
    pub fn new(name: &str, kind: NodeLabel) -> Self {
        ParsedSymbol {
            name: name.to_string(),
            kind,
            start_line: 0,
            end_line: 0,
            content: String::new(),
            signature: String::new(),
            class_name: String::new(),
            is_exported: false,
            decorators: Vec::new(),
        }
    }
}

/// An import statement.
#[derive(Debug, Clone, Default)]
pub struct ImportStatement {
    pub module_path: String,
    pub symbols: Vec<String>,
    pub alias: String,
    pub is_relative: bool,
    pub start_line: i64,
}

/// A function or method call site.
#[derive(Debug, Clone, Default)]
pub struct CallSite {
    pub name: String,
    /// Receiver canonicalised to a class name where the parser can tell;
    /// empty otherwise.
    pub receiver: String,
    /// Package path for package-qualified calls.
    pub package: String,
    pub start_line: i64,
    pub end_line: i64,
}

/// A type reference inside a symbol.
#[derive(Debug, Clone)]
pub struct TypeAnnotation {
    pub name: String,
    /// One of param, return, field, variable, method.
    pub role: String,
    pub start_line: i64,
}

/// Inheritance information for one class.
#[derive(Debug, Clone, Default)]
pub struct ClassHeritage {
    pub class_name: String,
    pub extends: Vec<String>,
    pub implements: Vec<String>,
}

/// Everything a parser extracts from one source file.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub package: String,
    /// Import alias -> package path.
    pub package_imports: HashMap<String, String>,
    pub symbols: Vec<ParsedSymbol>,
    pub imports: Vec<ImportStatement>,
    pub calls: Vec<CallSite>,
    pub type_refs: Vec<TypeAnnotation>,
    pub heritage: Vec<ClassHeritage>,
}

/// A language-specific source parser.
///
/// Parsers must canonicalise method receivers to class names (not
/// variable names) where they can; when that is impossible the receiver
/// is left empty and the intra-file rescue pass downstream compensates.
pub trait Parser: Send + Sync {
    fn language(&self) -> &'static str;
    fn parse(&self, rel_path: &str, content: &[u8]) -> Result<ParseResult>;
}

/// Returns the parser for a language tag, if one exists. Languages
/// without a parser (e.g. javascript) still get file and folder nodes
/// from the structure phase; their symbols are simply absent.
pub fn parser_for_language(language: &str) -> Option<Box<dyn Parser>> {
    match language {
        "go" => Some(Box::new(go::GoParser::new())),
        "python" => Some(Box::new(python::PythonParser::new())),
        "typescript" => Some(Box::new(typescript::TypeScriptParser::new())),
        _ => None,
    }
}
