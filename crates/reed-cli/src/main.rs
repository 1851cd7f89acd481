use std::io::Write as _;
use std::process::ExitCode;
use std::time::Instant;
use std::{env, fs};

use reed_core::{Arity, Diagnostic, ErrorKind, Evaluator, Value};

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let (script_path, include_dirs) = match parse_args(env::args().skip(1)) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let source = match fs::read_to_string(&script_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error reading {script_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut ev = Evaluator::new();
    for dir in include_dirs {
        ev.add_include_dir(dir);
    }
    if let Err(err) = register_builtins(&mut ev) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    let program = match Evaluator::parse(&source, &script_path) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match ev.execute(&program) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Splits `args` into a script path and any `--include <dir>` flags, in the order given.
fn parse_args(args: impl Iterator<Item = String>) -> Result<(String, Vec<String>), String> {
    let mut script_path = None;
    let mut include_dirs = Vec::new();
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        if arg == "--include" {
            let dir = args.next().ok_or("--include requires a directory argument")?;
            include_dirs.push(dir);
        } else if script_path.is_none() {
            script_path = Some(arg);
        } else {
            return Err(format!("unexpected argument: {arg}"));
        }
    }
    let script_path = script_path.ok_or("usage: reed [--include <dir>]... <script.reed>")?;
    Ok((script_path, include_dirs))
}

fn type_error(name: &str, args: &[Value]) -> Diagnostic {
    Diagnostic::at_line(ErrorKind::Type, format!("{name}: wrong argument type or count ({} given)", args.len()), 0)
}

/// Registers the standard library the original interpreter wires up in `builtins.c` — everything
/// except the `math.h` shims already handled by `@import`'s header reader.
fn register_builtins(ev: &mut Evaluator) -> reed_core::error::Result<()> {
    ev.register_native("print", Arity::Variadic, |ev, args| {
        let mut out = String::new();
        for arg in args {
            out.push_str(&ev.display(*arg));
        }
        print!("{out}");
        let _ = std::io::stdout().flush();
        Ok(Value::Nil)
    })?;

    ev.register_native("println", Arity::Variadic, |ev, args| {
        let parts: Vec<String> = args.iter().map(|a| ev.display(*a)).collect();
        println!("{}", parts.join(" "));
        Ok(Value::Nil)
    })?;

    ev.register_native("input", Arity::Variadic, |ev, args| {
        if let Some(prompt) = args.first().and_then(|a| ev.as_str(*a)) {
            print!("{prompt}");
            let _ = std::io::stdout().flush();
        }
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
            return Ok(Value::Nil);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(ev.new_string(line))
    })?;

    ev.register_native("type", Arity::Fixed(1), |ev, args| Ok(ev.new_string(ev.type_name(args[0]))))?;

    ev.register_native("int", Arity::Fixed(1), |ev, args| {
        Ok(match args[0] {
            Value::Int(n) => Value::Int(n),
            Value::Float(f) => Value::Int(f as i64),
            Value::Bool(b) => Value::Int(i64::from(b)),
            v => ev.as_str(v).and_then(|s| s.trim().parse::<i64>().ok()).map_or(Value::Nil, Value::Int),
        })
    })?;

    ev.register_native("float", Arity::Fixed(1), |ev, args| {
        Ok(match args[0] {
            Value::Float(f) => Value::Float(f),
            Value::Int(n) => Value::Float(n as f64),
            v => ev.as_str(v).and_then(|s| s.trim().parse::<f64>().ok()).map_or(Value::Nil, Value::Float),
        })
    })?;

    ev.register_native("str", Arity::Fixed(1), |ev, args| {
        let s = ev.display(args[0]);
        Ok(ev.new_string(s))
    })?;

    ev.register_native("bool", Arity::Fixed(1), |_ev, args| Ok(Value::Bool(args[0].is_truthy())))?;

    ev.register_native("len", Arity::Fixed(1), |ev, args| Ok(ev.len_of(args[0]).map_or(Value::Nil, Value::Int)))?;

    ev.register_native("push", Arity::Fixed(2), |ev, args| {
        ev.push(args[0], args[1]);
        Ok(Value::Nil)
    })?;

    ev.register_native("pop", Arity::Fixed(1), |ev, args| Ok(ev.pop(args[0]).unwrap_or(Value::Nil)))?;

    ev.register_native("first", Arity::Fixed(1), |ev, args| Ok(ev.first(args[0]).unwrap_or(Value::Nil)))?;

    ev.register_native("last", Arity::Fixed(1), |ev, args| Ok(ev.last(args[0]).unwrap_or(Value::Nil)))?;

    ev.register_native("insert", Arity::Fixed(3), |ev, args| {
        let Value::Int(index) = args[1] else { return Err(type_error("insert", args)) };
        ev.insert(args[0], index, args[2]);
        Ok(Value::Nil)
    })?;

    ev.register_native("remove", Arity::Fixed(2), |ev, args| {
        let Value::Int(index) = args[1] else { return Err(type_error("remove", args)) };
        Ok(ev.remove(args[0], index).unwrap_or(Value::Nil))
    })?;

    ev.register_native("substr", Arity::Variadic, |ev, args| {
        let (Some(s), Some(Value::Int(start))) = (args.first().and_then(|a| ev.as_str(*a)), args.get(1).copied()) else {
            return Err(type_error("substr", args));
        };
        let chars: Vec<char> = s.chars().collect();
        let start = start.max(0) as usize;
        if start >= chars.len() {
            return Ok(ev.new_string(String::new()));
        }
        let count = match args.get(2) {
            Some(Value::Int(n)) => (*n).max(0) as usize,
            _ => chars.len() - start,
        };
        let end = (start + count).min(chars.len());
        Ok(ev.new_string(chars[start..end].iter().collect::<String>()))
    })?;

    ev.register_native("find", Arity::Fixed(2), |ev, args| {
        let (Some(haystack), Some(needle)) = (ev.as_str(args[0]), ev.as_str(args[1])) else {
            return Err(type_error("find", args));
        };
        let chars: Vec<char> = haystack.chars().collect();
        let needle_chars: Vec<char> = needle.chars().collect();
        let index = chars.windows(needle_chars.len().max(1)).position(|w| w == needle_chars.as_slice());
        Ok(Value::Int(index.map_or(-1, |i| i as i64)))
    })?;

    ev.register_native("replace", Arity::Fixed(3), |ev, args| {
        let (Some(s), Some(old), Some(new)) = (ev.as_str(args[0]), ev.as_str(args[1]), ev.as_str(args[2])) else {
            return Err(type_error("replace", args));
        };
        Ok(ev.new_string(s.replace(&old, &new)))
    })?;

    ev.register_native("split", Arity::Fixed(2), |ev, args| {
        let (Some(s), Some(delim)) = (ev.as_str(args[0]), ev.as_str(args[1])) else {
            return Err(type_error("split", args));
        };
        let pieces: Vec<String> = if delim.is_empty() {
            s.chars().map(String::from).collect()
        } else {
            s.split(delim.as_str()).map(String::from).collect()
        };
        let items = pieces.into_iter().map(|p| ev.new_string(p)).collect();
        Ok(ev.new_array(items))
    })?;

    ev.register_native("join", Arity::Fixed(2), |ev, args| {
        let (Some(items), Some(delim)) = (ev.items(args[0]), ev.as_str(args[1])) else {
            return Err(type_error("join", args));
        };
        let parts: Vec<String> = items.into_iter().filter_map(|v| ev.as_str(v)).collect();
        Ok(ev.new_string(parts.join(&delim)))
    })?;

    ev.register_native("upper", Arity::Fixed(1), |ev, args| {
        ev.as_str(args[0]).map(|s| ev.new_string(s.to_uppercase())).ok_or_else(|| type_error("upper", args))
    })?;

    ev.register_native("lower", Arity::Fixed(1), |ev, args| {
        ev.as_str(args[0]).map(|s| ev.new_string(s.to_lowercase())).ok_or_else(|| type_error("lower", args))
    })?;

    ev.register_native("trim", Arity::Fixed(1), |ev, args| {
        ev.as_str(args[0]).map(|s| ev.new_string(s.trim().to_string())).ok_or_else(|| type_error("trim", args))
    })?;

    ev.register_native("abs", Arity::Fixed(1), |_ev, args| {
        Ok(match args[0] {
            Value::Int(n) => Value::Int(n.abs()),
            Value::Float(f) => Value::Float(f.abs()),
            _ => Value::Nil,
        })
    })?;

    ev.register_native("min", Arity::Variadic, |_ev, args| Ok(fold_numbers(args, |a, b| a < b)))?;
    ev.register_native("max", Arity::Variadic, |_ev, args| Ok(fold_numbers(args, |a, b| a > b)))?;

    ev.register_native("floor", Arity::Fixed(1), |_ev, args| {
        Ok(match args[0] {
            Value::Int(n) => Value::Int(n),
            Value::Float(f) => Value::Int(f.floor() as i64),
            _ => Value::Nil,
        })
    })?;

    ev.register_native("ceil", Arity::Fixed(1), |_ev, args| {
        Ok(match args[0] {
            Value::Int(n) => Value::Int(n),
            Value::Float(f) => Value::Int(f.ceil() as i64),
            _ => Value::Nil,
        })
    })?;

    ev.register_native("round", Arity::Fixed(1), |_ev, args| {
        Ok(match args[0] {
            Value::Int(n) => Value::Int(n),
            Value::Float(f) => Value::Int(f.round() as i64),
            _ => Value::Nil,
        })
    })?;

    ev.register_native("keys", Arity::Fixed(1), |ev, args| Ok(ev.keys(args[0]).unwrap_or(Value::Nil)))?;
    ev.register_native("values", Arity::Fixed(1), |ev, args| Ok(ev.values(args[0]).unwrap_or(Value::Nil)))?;

    ev.register_native("has", Arity::Fixed(2), |ev, args| {
        ev.as_str(args[1]).map(|key| Value::Bool(ev.has(args[0], &key))).ok_or_else(|| type_error("has", args))
    })?;

    ev.register_native("assert", Arity::Variadic, |ev, args| {
        if args.first().is_some_and(Value::is_truthy) {
            return Ok(Value::Nil);
        }
        match args.get(1).and_then(|m| ev.as_str(*m)) {
            Some(message) => eprintln!("assertion failed: {message}"),
            None => eprintln!("assertion failed"),
        }
        std::process::exit(1);
    })?;

    ev.register_native("error", Arity::Variadic, |ev, args| {
        match args.first().and_then(|m| ev.as_str(*m)) {
            Some(message) => eprintln!("error: {message}"),
            None => eprintln!("error"),
        }
        std::process::exit(1);
    })?;

    ev.register_native("clock", Arity::Fixed(0), {
        let start = Instant::now();
        move |_ev, _args| Ok(Value::Float(start.elapsed().as_secs_f64()))
    })?;

    ev.register_native("exit", Arity::Variadic, |_ev, args| {
        let code = match args.first() {
            Some(Value::Int(n)) => *n as i32,
            _ => 0,
        };
        std::process::exit(code);
    })?;

    Ok(())
}

fn fold_numbers(args: &[Value], prefer: impl Fn(f64, f64) -> bool) -> Value {
    let as_f64 = |v: Value| match v {
        Value::Int(n) => Some(n as f64),
        Value::Float(f) => Some(f),
        _ => None,
    };
    let Some(mut best) = args.first().copied() else { return Value::Nil };
    for &candidate in &args[1..] {
        if let (Some(c), Some(b)) = (as_f64(candidate), as_f64(best))
            && prefer(c, b)
        {
            best = candidate;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args_splits_script_path_and_includes() {
        let (path, includes) =
            parse_args(["--include".to_string(), "/opt/headers".to_string(), "main.reed".to_string()].into_iter()).unwrap();
        assert_eq!(path, "main.reed");
        assert_eq!(includes, vec!["/opt/headers".to_string()]);
    }

    #[test]
    fn parse_args_requires_a_script_path() {
        assert!(parse_args(std::iter::empty()).is_err());
    }

    #[test]
    fn fold_numbers_picks_the_smaller_or_larger_argument() {
        let args = [Value::Int(3), Value::Int(1), Value::Int(2)];
        assert_eq!(fold_numbers(&args, |a, b| a < b), Value::Int(1));
        assert_eq!(fold_numbers(&args, |a, b| a > b), Value::Int(3));
    }
}
