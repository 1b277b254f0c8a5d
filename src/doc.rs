// ABOUTME: Top-level document loader: YAML structure parsing, include
// resolution, and the brace-balanced rewrite that turns arrow-function
// bodies into opaque YAML literal-block scalars before parsing.

use crate::error::HplError;
use crate::value::HplFunction;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use regex::Regex;
use serde_yaml::Value as Yaml;

pub struct ImportDecl {
    pub module: String,
    pub alias: Option<String>,
}

pub struct ObjectDecl {
    pub class_name: String,
    pub init_args: Vec<String>,
}

/// The fully loaded and merged top-level document: raw class/function
/// text plus already-parsed metadata. Function and method bodies are
/// parsed into `ast::Stmt` elsewhere (`src/parser.rs`); this module only
/// resolves document structure and hands back source fragments.
pub struct Document {
    pub classes: HashMap<String, ClassDecl>,
    pub objects: HashMap<String, ObjectDecl>,
    pub main_func_source: Option<String>,
    pub call_target: Option<String>,
    pub imports: Vec<ImportDecl>,
}

pub struct ClassDecl {
    pub parent: Option<String>,
    /// method name -> raw `(params) => { body }` source text
    pub methods: HashMap<String, String>,
}

/// Rewrites every `key: (params) => { body }` arrow-function definition
/// into a YAML literal block scalar (`key: |`) so the YAML parser treats
/// the body as an opaque string instead of trying to parse HPL syntax as
/// YAML. Mirrors `preprocess_functions` in the original implementation's
/// top-level parser, brace-counting line by line to find the end of a
/// (possibly multi-line) function body.
fn preprocess_functions(content: &str) -> String {
    let func_pattern = Regex::new(r"^(\s*)(\w+):\s*\(.*\)\s*=>.*\{").unwrap();
    let lines: Vec<&str> = content.lines().collect();
    let mut result = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if let Some(caps) = func_pattern.captures(line) {
            let indent = caps.get(1).unwrap().as_str().to_string();

            let mut func_lines = vec![line.to_string()];
            let mut brace_count = brace_delta(line);
            let mut j = i + 1;
            while brace_count > 0 && j < lines.len() {
                func_lines.push(lines[j].to_string());
                brace_count += brace_delta(lines[j]);
                j += 1;
            }

            let full_func = func_lines.join("\n");
            let colon_pos = full_func.find(':').unwrap();
            let key_part = full_func[..colon_pos].trim_end();
            let value_part = full_func[colon_pos + 1..].trim();

            result.push(format!("{}: |", key_part));
            for func_line in value_part.lines() {
                result.push(format!("{}  {}", indent, func_line));
            }

            i = j;
        } else {
            result.push(line.to_string());
            i += 1;
        }
    }

    result.join("\n")
}

fn brace_delta(line: &str) -> i32 {
    line.matches('{').count() as i32 - line.matches('}').count() as i32
}

fn load_and_preprocess(path: &Path) -> Result<Yaml, HplError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        HplError::import(
            format!("cannot read document '{}': {}", path.display(), e),
            "DOCUMENT_NOT_FOUND",
        )
    })?;
    let preprocessed = preprocess_functions(&content);
    serde_yaml::from_str(&preprocessed).map_err(|e| {
        HplError::syntax(
            format!("invalid document structure: {}", e),
            1,
            1,
            "INVALID_DOCUMENT",
        )
    })
}

fn merge_maps(main: &mut serde_yaml::Mapping, include: &serde_yaml::Mapping) {
    for key in ["classes", "objects"] {
        let key_val = Yaml::String(key.to_string());
        if let Some(Yaml::Mapping(include_map)) = include.get(&key_val) {
            let entry = main
                .entry(key_val.clone())
                .or_insert_with(|| Yaml::Mapping(serde_yaml::Mapping::new()));
            if let Yaml::Mapping(main_map) = entry {
                for (k, v) in include_map {
                    main_map.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

pub fn load_document(hpl_file: &Path) -> Result<Document, HplError> {
    let root = load_and_preprocess(hpl_file)?;
    let mut root_map = match root {
        Yaml::Mapping(m) => m,
        _ => {
            return Err(HplError::syntax(
                "document root must be a mapping",
                1,
                1,
                "INVALID_DOCUMENT",
            ))
        }
    };

    if let Some(Yaml::Sequence(includes)) = root_map.get(&Yaml::String("includes".into())).cloned() {
        let base_dir = hpl_file.parent().unwrap_or_else(|| Path::new("."));
        for include in includes {
            if let Yaml::String(include_file) = include {
                let include_path = resolve_include_path(base_dir, &include_file);
                if include_path.exists() {
                    let include_doc = load_and_preprocess(&include_path)?;
                    if let Yaml::Mapping(include_map) = include_doc {
                        merge_maps(&mut root_map, &include_map);
                    }
                }
            }
        }
    }

    parse_document(&root_map)
}

/// Include search order: current source file's directory first, then
/// the process's current working directory. See Open Question
/// resolution #2 in DESIGN.md.
fn resolve_include_path(base_dir: &Path, include_file: &str) -> PathBuf {
    let candidate = base_dir.join(include_file);
    if candidate.exists() {
        return candidate;
    }
    PathBuf::from(include_file)
}

fn parse_document(root: &serde_yaml::Mapping) -> Result<Document, HplError> {
    let mut imports = Vec::new();
    if let Some(Yaml::Sequence(items)) = root.get(&Yaml::String("imports".into())) {
        for item in items {
            match item {
                Yaml::String(module) => imports.push(ImportDecl {
                    module: module.clone(),
                    alias: None,
                }),
                Yaml::Mapping(m) => {
                    for (k, v) in m {
                        if let (Yaml::String(module), Yaml::String(alias)) = (k, v) {
                            imports.push(ImportDecl {
                                module: module.clone(),
                                alias: Some(alias.clone()),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut classes = HashMap::new();
    if let Some(Yaml::Mapping(class_map)) = root.get(&Yaml::String("classes".into())) {
        for (name, def) in class_map {
            let name = yaml_str(name)?;
            if let Yaml::Mapping(def_map) = def {
                let mut parent = None;
                let mut methods = HashMap::new();
                for (key, value) in def_map {
                    let key_str = yaml_str(key)?;
                    if key_str == "parent" {
                        parent = Some(yaml_str(value)?);
                    } else {
                        methods.insert(key_str, yaml_str(value)?);
                    }
                }
                classes.insert(name, ClassDecl { parent, methods });
            }
        }
    }

    let mut objects = HashMap::new();
    if let Some(Yaml::Mapping(obj_map)) = root.get(&Yaml::String("objects".into())) {
        for (name, def) in obj_map {
            let name = yaml_str(name)?;
            let def_str = yaml_str(def)?;
            let (class_name, init_args) = parse_object_decl(&def_str);
            objects.insert(
                name,
                ObjectDecl {
                    class_name,
                    init_args,
                },
            );
        }
    }

    let main_func_source = match root.get(&Yaml::String("main".into())) {
        Some(v) => Some(yaml_str(v)?),
        None => None,
    };

    let call_target = match root.get(&Yaml::String("call".into())) {
        Some(v) => {
            let raw = yaml_str(v)?;
            Some(raw.trim_end_matches("()").trim().to_string())
        }
        None => None,
    };

    Ok(Document {
        classes,
        objects,
        main_func_source,
        call_target,
        imports,
    })
}

fn parse_object_decl(def: &str) -> (String, Vec<String>) {
    if let (Some(open), Some(close)) = (def.find('('), def.find(')')) {
        let class_name = def[..open].trim().to_string();
        let args_str = def[open + 1..close].trim();
        let args = if args_str.is_empty() {
            Vec::new()
        } else {
            args_str.split(',').map(|a| a.trim().to_string()).collect()
        };
        (class_name, args)
    } else {
        (def.trim_end_matches("()").to_string(), Vec::new())
    }
}

fn yaml_str(v: &Yaml) -> Result<String, HplError> {
    match v {
        Yaml::String(s) => Ok(s.clone()),
        other => Err(HplError::syntax(
            format!("expected a string value, got {:?}", other),
            1,
            1,
            "INVALID_DOCUMENT",
        )),
    }
}

/// Parses a raw `(params) => { body }` source fragment into an
/// `HplFunction`. Thin wrapper kept here (rather than in `parser.rs`)
/// since the document loader is what hands out these fragments.
pub fn parse_function_source(name: &str, source: &str) -> Result<Rc<HplFunction>, HplError> {
    crate::parser::parse_arrow_function(name, source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_wraps_single_line_function_body() {
        let content = "main: (x) => { echo x }\n";
        let out = preprocess_functions(content);
        assert!(out.contains("main: |"));
        assert!(out.contains("(x) => { echo x }"));
    }

    #[test]
    fn preprocess_wraps_multiline_function_body() {
        let content = "main: (x) => {\n  echo x\n  echo x\n}\n";
        let out = preprocess_functions(content);
        assert!(out.contains("main: |"));
        assert!(out.lines().count() >= 4);
    }

    #[test]
    fn parse_object_decl_splits_class_and_args() {
        let (class, args) = parse_object_decl("Counter(0, \"start\")");
        assert_eq!(class, "Counter");
        assert_eq!(args, vec!["0", "\"start\""]);
    }

    #[test]
    fn parse_object_decl_handles_no_args() {
        let (class, args) = parse_object_decl("Counter()");
        assert_eq!(class, "Counter");
        assert!(args.is_empty());
    }

    #[test]
    fn call_target_strips_parens() {
        let mut root = serde_yaml::Mapping::new();
        root.insert(Yaml::String("call".into()), Yaml::String("main()".into()));
        let doc = parse_document(&root).unwrap();
        assert_eq!(doc.call_target.as_deref(), Some("main"));
    }
}
