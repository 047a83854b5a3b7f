use std::io::{IsTerminal, Read};

use luna_compiler::disasm::Listing;
use luna_compiler::proto::Proto;
use luna_core::LuaStr;
use luna_vm::binary_chunk::{self, LUA_SIGNATURE};
use luna_vm::{LuaError, Table, Value, Vm};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const PROGNAME: &str = "luna";
const VERSION: &str = concat!("Luna ", env!("CARGO_PKG_VERSION"), " -- Lua 5.3 compatible");

#[derive(Debug, Default, PartialEq)]
struct Options {
    /// `-e` chunks, run in order before the script.
    exec: Vec<String>,
    /// Number of `-l` flags; two or more include the constant tables.
    list: u32,
    parse_only: bool,
    strip: bool,
    output: Option<String>,
    version: bool,
    /// Script path, or `-` for stdin.
    script: Option<String>,
    script_args: Vec<String>,
}

impl Options {
    /// Listing, parse-only and `-o` compile without running anything.
    fn compile_only(&self) -> bool {
        self.list > 0 || self.parse_only || self.output.is_some()
    }
}

fn usage() -> String {
    format!(
        "usage: {PROGNAME} [options] [script [args]]\n\
         Available options are:\n  \
         -e stat   execute string 'stat'\n  \
         -l        list bytecode (twice for constants, locals and upvalues)\n  \
         -p        parse only\n  \
         -s        strip debug information from -o output\n  \
         -o file   write the compiled chunk to 'file'\n  \
         -v        show version information\n  \
         --        stop handling options\n  \
         -         execute stdin and stop handling options"
    )
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options::default();
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--" => {
                if let Some(script) = args.get(i + 1) {
                    opts.script = Some(script.clone());
                    opts.script_args = args[i + 2..].to_vec();
                }
                break;
            }
            "-" => {
                opts.script = Some("-".to_string());
                opts.script_args = args[i + 1..].to_vec();
                break;
            }
            "-l" => opts.list += 1,
            "-p" => opts.parse_only = true,
            "-s" => opts.strip = true,
            "-v" => opts.version = true,
            "-e" | "-o" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| format!("'{arg}' needs argument"))?
                    .clone();
                if arg == "-e" {
                    opts.exec.push(value);
                } else {
                    opts.output = Some(value);
                }
                i += 1;
            }
            _ if arg.starts_with("-e") => opts.exec.push(arg[2..].to_string()),
            _ if arg.starts_with('-') => return Err(format!("unrecognized option '{arg}'")),
            _ => {
                opts.script = Some(arg.to_string());
                opts.script_args = args[i + 1..].to_vec();
                break;
            }
        }
        i += 1;
    }
    if opts.output.is_some() && opts.script.is_none() {
        return Err("'-o' needs a script to compile".to_string());
    }
    Ok(opts)
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("LUNA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fatal(msg: impl std::fmt::Display) -> ! {
    eprintln!("{PROGNAME}: {msg}");
    std::process::exit(1);
}

/// Read a script and pick its chunk name: `=stdin` or `@path`.
fn read_script(path: &str) -> Result<(Vec<u8>, String), String> {
    if path == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .map_err(|e| format!("cannot read stdin: {e}"))?;
        return Ok((buf, "=stdin".to_string()));
    }
    let data = std::fs::read(path).map_err(|e| format!("cannot open {path}: {e}"))?;
    Ok((data, format!("@{path}")))
}

/// Skip a `#` first line in front of a binary chunk; text chunks keep it
/// so the lexer can count the line.
fn skip_comment_before_binary(data: &[u8]) -> &[u8] {
    if data.first() == Some(&b'#') {
        if let Some(nl) = data.iter().position(|&b| b == b'\n') {
            let rest = &data[nl + 1..];
            if rest.starts_with(LUA_SIGNATURE) {
                return rest;
            }
        }
    }
    data
}

fn to_proto(data: &[u8], chunkname: &str) -> Result<Proto, LuaError> {
    if data.starts_with(LUA_SIGNATURE) {
        Ok(binary_chunk::undump(data, chunkname)?)
    } else {
        Ok(luna_compiler::compile(data, chunkname)?)
    }
}

/// `arg[0]` is the script, `arg[1..]` its arguments, negative indices the
/// interpreter and the options before the script.
fn build_arg_table(argv: &[String], opts: &Options) -> Table {
    let mut table = Table::new();
    let script_pos = argv.len() - opts.script_args.len() - 1;
    for (i, a) in argv.iter().enumerate() {
        let index = i as i64 - script_pos as i64;
        table.set_int(index, Value::from(LuaStr::from(a.as_str())));
    }
    table
}

fn compile_only(opts: &Options, chunks: &[(Vec<u8>, String)]) -> Result<(), String> {
    for (data, chunkname) in chunks {
        let proto = to_proto(data, chunkname).map_err(|e| e.to_string())?;
        debug!(chunk = %chunkname, functions = proto.protos.len() + 1, "compiled for listing");
        if opts.list > 0 {
            print!("{}", Listing { proto: &proto, full: opts.list > 1 });
        }
        if let Some(path) = &opts.output {
            let bytes = binary_chunk::dump(&proto, opts.strip);
            std::fs::write(path, bytes).map_err(|e| format!("cannot write {path}: {e}"))?;
        }
    }
    Ok(())
}

fn run(vm: &mut Vm, data: &[u8], chunkname: &str) -> Result<(), LuaError> {
    let f = vm.load(data, chunkname)?;
    vm.call(&f, &[], 0)?;
    Ok(())
}

fn main() {
    init_logging();
    let argv: Vec<String> = std::env::args().collect();
    let mut opts = match parse_args(&argv[1..]) {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("{PROGNAME}: {msg}");
            eprintln!("{}", usage());
            std::process::exit(1);
        }
    };

    if opts.version {
        println!("{VERSION}");
    }
    if opts.script.is_none() && opts.exec.is_empty() {
        if opts.version {
            return;
        }
        if std::io::stdin().is_terminal() {
            fatal(format!("no script given\n{}", usage()));
        }
        opts.script = Some("-".to_string());
    }

    let mut chunks: Vec<(Vec<u8>, String)> = opts
        .exec
        .iter()
        .map(|stat| (stat.clone().into_bytes(), "=(command line)".to_string()))
        .collect();
    if let Some(path) = &opts.script {
        let (data, chunkname) = read_script(path).unwrap_or_else(|e| fatal(e));
        let data = skip_comment_before_binary(&data).to_vec();
        chunks.push((data, chunkname));
    }

    if opts.compile_only() {
        // -o writes the script, not the -e chunks.
        if opts.output.is_some() {
            chunks.drain(..chunks.len() - 1);
        }
        if let Err(msg) = compile_only(&opts, &chunks) {
            fatal(msg);
        }
        return;
    }

    let mut vm = Vm::new();
    if opts.script.is_some() {
        vm.set_global("arg", Value::from(build_arg_table(&argv, &opts)));
    }
    let script_args: Vec<Value> = opts
        .script_args
        .iter()
        .map(|a| Value::from(LuaStr::from(a.as_str())))
        .collect();
    let last = chunks.len().saturating_sub(1);
    for (i, (data, chunkname)) in chunks.iter().enumerate() {
        let result = if i == last && opts.script.is_some() {
            vm.load(data, chunkname)
                .and_then(|f| vm.call(&f, &script_args, 0))
                .map(|_| ())
        } else {
            run(&mut vm, data, chunkname)
        };
        if let Err(e) = result {
            fatal(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_script_and_args() {
        let opts = parse_args(&args(&["x.lua", "a", "-e", "b"])).unwrap();
        assert_eq!(opts.script.as_deref(), Some("x.lua"));
        assert_eq!(opts.script_args, args(&["a", "-e", "b"]));
        assert!(opts.exec.is_empty());
    }

    #[test]
    fn test_exec_chunks_in_order() {
        let opts = parse_args(&args(&["-e", "x = 1", "-eprint(x)"])).unwrap();
        assert_eq!(opts.exec, args(&["x = 1", "print(x)"]));
        assert!(opts.script.is_none());
    }

    #[test]
    fn test_compile_flags() {
        let opts = parse_args(&args(&["-l", "-l", "-s", "-o", "out.luac", "in.lua"])).unwrap();
        assert_eq!(opts.list, 2);
        assert!(opts.strip);
        assert_eq!(opts.output.as_deref(), Some("out.luac"));
        assert!(opts.compile_only());
        assert!(!parse_args(&args(&["in.lua"])).unwrap().compile_only());
    }

    #[test]
    fn test_stdin_and_double_dash() {
        let opts = parse_args(&args(&["-", "1"])).unwrap();
        assert_eq!(opts.script.as_deref(), Some("-"));
        assert_eq!(opts.script_args, args(&["1"]));
        let opts = parse_args(&args(&["--", "-weird.lua"])).unwrap();
        assert_eq!(opts.script.as_deref(), Some("-weird.lua"));
    }

    #[test]
    fn test_bad_options() {
        assert_eq!(parse_args(&args(&["-e"])).unwrap_err(), "'-e' needs argument");
        assert_eq!(parse_args(&args(&["-x"])).unwrap_err(), "unrecognized option '-x'");
        assert!(parse_args(&args(&["-o", "out"])).is_err());
    }

    #[test]
    fn test_arg_table_layout() {
        let argv = args(&["luna", "-s", "x.lua", "a", "b"]);
        let opts = parse_args(&argv[1..]).unwrap();
        let t = build_arg_table(&argv, &opts);
        assert_eq!(t.get_int(0), Value::from("x.lua"));
        assert_eq!(t.get_int(1), Value::from("a"));
        assert_eq!(t.get_int(2), Value::from("b"));
        assert_eq!(t.get_int(-1), Value::from("-s"));
        assert_eq!(t.get_int(-2), Value::from("luna"));
        assert_eq!(t.length(), 2);
    }

    #[test]
    fn test_binary_chunk_after_comment_line() {
        let proto = luna_compiler::compile(b"return 7", "=t").unwrap();
        let mut data = b"#!/usr/bin/env luna\n".to_vec();
        data.extend(binary_chunk::dump(&proto, true));
        let rest = skip_comment_before_binary(&data);
        assert!(rest.starts_with(LUA_SIGNATURE));
        let text = b"#!/usr/bin/env luna\nreturn 1";
        assert_eq!(skip_comment_before_binary(text), &text[..]);
    }

    #[test]
    fn test_to_proto_accepts_both_forms() {
        let proto = to_proto(b"return 1", "=t").unwrap();
        let bytes = binary_chunk::dump(&proto, false);
        assert_eq!(to_proto(&bytes, "=t").unwrap().code, proto.code);
        assert!(matches!(to_proto(b"return +", "=t"), Err(LuaError::Compile(_))));
    }
}
