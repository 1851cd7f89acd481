//! Best-effort C header reader: enough to pull function prototypes, `#define` macros, and `enum`
//! constants out of a system header for `@import "math.h"`-style native imports.
//!
//! This is not a C parser. Anything it doesn't recognize — structs, typedefs, macro functions,
//! conditional compilation — is skipped rather than treated as an error, the same way the
//! original header reader this is modeled on only ever extracts what it understands and leaves
//! the rest alone.

use crate::native::ctype::CType;

#[derive(Debug, Clone)]
pub struct ParsedFunction {
    pub name: String,
    pub return_type: CType,
    pub param_types: Vec<CType>,
    pub is_variadic: bool,
}

#[derive(Debug, Clone)]
pub enum MacroValue {
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone)]
pub struct ParsedMacro {
    pub name: String,
    pub value: MacroValue,
}

#[derive(Debug, Clone)]
pub struct ParsedEnumConstant {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedHeader {
    pub functions: Vec<ParsedFunction>,
    pub macros: Vec<ParsedMacro>,
    pub enum_constants: Vec<ParsedEnumConstant>,
}

/// Splits `source` into semicolon/brace-terminated declaration chunks and feeds each to the
/// appropriate best-effort extractor, skipping chunks that match none of them.
#[must_use]
pub fn parse_header(source: &str) -> ParsedHeader {
    let mut out = ParsedHeader::default();
    let stripped = strip_comments(source);

    for line in stripped.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("#define ") {
            if let Some(m) = parse_macro(rest) {
                out.macros.push(m);
            }
        }
    }

    for chunk in split_declarations(&stripped) {
        let chunk = chunk.trim();
        if chunk.is_empty() || chunk.starts_with('#') || chunk.starts_with("typedef") || chunk.starts_with("struct") {
            continue;
        }
        if let Some(constants) = parse_enum(chunk) {
            out.enum_constants.extend(constants);
            continue;
        }
        if let Some(function) = parse_function(chunk) {
            out.functions.push(function);
        }
    }

    tracing::debug!(
        functions = out.functions.len(),
        macros = out.macros.len(),
        enum_constants = out.enum_constants.len(),
        "parsed header"
    );
    out
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    break;
                }
            }
            continue;
        }
        if c == '/' && chars.peek() == Some(&'/') {
            for c in chars.by_ref() {
                if c == '\n' {
                    break;
                }
            }
            out.push('\n');
            continue;
        }
        out.push(c);
    }
    out
}

/// Splits on `;`, keeping brace-delimited bodies (enum blocks) together with their terminator.
fn split_declarations(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for c in source.chars() {
        current.push(c);
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ';' if depth == 0 => {
                out.push(std::mem::take(&mut current));
            }
            _ => {}
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

fn parse_macro(rest: &str) -> Option<ParsedMacro> {
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next()?.trim().to_string();
    if name.is_empty() || name.contains('(') {
        return None; // function-like macro, not supported
    }
    let value = parts.next().unwrap_or("").trim();
    if value.is_empty() {
        return None;
    }
    let parsed = if let Ok(i) = value.parse::<i64>() {
        MacroValue::Int(i)
    } else if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        MacroValue::Int(i64::from_str_radix(hex, 16).ok()?)
    } else if let Ok(f) = value.parse::<f64>() {
        MacroValue::Float(f)
    } else if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        MacroValue::Str(value[1..value.len() - 1].to_string())
    } else {
        return None;
    };
    Some(ParsedMacro { name, value: parsed })
}

fn parse_enum(chunk: &str) -> Option<Vec<ParsedEnumConstant>> {
    let chunk = chunk.trim();
    if !chunk.starts_with("enum") {
        return None;
    }
    let open = chunk.find('{')?;
    let close = chunk.rfind('}')?;
    let body = &chunk[open + 1..close];

    let mut constants = Vec::new();
    let mut next_value = 0i64;
    for member in body.split(',') {
        let member = member.trim();
        if member.is_empty() {
            continue;
        }
        let (name, value) = if let Some((n, v)) = member.split_once('=') {
            let n = n.trim().to_string();
            let v = v.trim().parse::<i64>().unwrap_or(next_value);
            (n, v)
        } else {
            (member.to_string(), next_value)
        };
        next_value = value + 1;
        constants.push(ParsedEnumConstant { name, value });
    }
    Some(constants)
}

fn parse_function(chunk: &str) -> Option<ParsedFunction> {
    let chunk = chunk.trim().trim_end_matches(';').trim();
    let open = chunk.find('(')?;
    let close = chunk.rfind(')')?;
    if close < open {
        return None;
    }

    let head = chunk[..open].trim();
    let mut head_words: Vec<&str> = head.split_whitespace().collect();
    let raw_name = head_words.pop()?;
    let is_pointer_return = raw_name.starts_with('*') || head_words.last().is_some_and(|w| w.ends_with('*'));
    let name = raw_name.trim_start_matches('*').to_string();
    if name.is_empty() || !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
        return None;
    }
    let return_type_str = head_words.join(" ").replace('*', "");
    let return_type = if is_pointer_return && CType::from_name(return_type_str.trim()) == Some(CType::Char) {
        CType::StringPtr
    } else if is_pointer_return {
        CType::Pointer
    } else {
        CType::from_name(return_type_str.trim())?
    };

    let args_str = chunk[open + 1..close].trim();
    let mut param_types = Vec::new();
    let mut is_variadic = false;
    if !args_str.is_empty() && args_str != "void" {
        for arg in args_str.split(',') {
            let arg = arg.trim();
            if arg == "..." {
                is_variadic = true;
                continue;
            }
            param_types.push(parse_param_type(arg)?);
        }
    }

    Some(ParsedFunction { name, return_type, param_types, is_variadic })
}

fn parse_param_type(arg: &str) -> Option<CType> {
    let is_pointer = arg.contains('*');
    let mut words: Vec<&str> = arg.split_whitespace().collect();
    if words.last().is_some_and(|w| !w.starts_with('*') && w.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')) {
        // drop the parameter name, keep only the type words
        if words.len() > 1 {
            words.pop();
        }
    }
    let type_str = words.join(" ").replace('*', "");
    if is_pointer {
        return Some(if CType::from_name(type_str.trim()) == Some(CType::Char) { CType::StringPtr } else { CType::Pointer });
    }
    CType::from_name(type_str.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_prototype() {
        let header = parse_header("double sqrt(double x);\n");
        assert_eq!(header.functions.len(), 1);
        assert_eq!(header.functions[0].name, "sqrt");
        assert_eq!(header.functions[0].return_type, CType::Double);
        assert_eq!(header.functions[0].param_types, vec![CType::Double]);
    }

    #[test]
    fn parses_variadic_and_string_pointer() {
        let header = parse_header("int printf(const char* fmt, ...);\n");
        let f = &header.functions[0];
        assert!(f.is_variadic);
        assert_eq!(f.param_types, vec![CType::StringPtr]);
    }

    #[test]
    fn parses_define_macros() {
        let header = parse_header("#define PI 3.14159\n#define MAX_LEN 256\n");
        assert_eq!(header.macros.len(), 2);
        assert!(matches!(header.macros[0].value, MacroValue::Float(_)));
        assert!(matches!(header.macros[1].value, MacroValue::Int(256)));
    }

    #[test]
    fn parses_enum_with_explicit_and_implicit_values() {
        let header = parse_header("enum { RED, GREEN = 5, BLUE };\n");
        assert_eq!(header.enum_constants.len(), 3);
        assert_eq!(header.enum_constants[0].value, 0);
        assert_eq!(header.enum_constants[1].value, 5);
        assert_eq!(header.enum_constants[2].value, 6);
    }

    #[test]
    fn skips_struct_and_typedef_declarations() {
        let header = parse_header("typedef struct { int x; } Point;\nint abs(int n);\n");
        assert_eq!(header.functions.len(), 1);
        assert_eq!(header.functions[0].name, "abs");
    }
}
