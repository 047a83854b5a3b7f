//! Luna compiler: lexer, parser and bytecode generator for Lua 5.3.

pub mod compiler;
pub mod disasm;
pub mod lexer;
pub mod opcode;
pub mod proto;
pub mod token;

pub use compiler::{compile, CompileError};
pub use proto::{Constant, LocalVar, Proto, UpvalDesc};

use std::path::Path;
use tracing::debug;

/// Maximum length of a chunk id in messages, terminator included.
const ID_SIZE: usize = 60;

/// Shorten a chunk name for messages: `=name` is used verbatim, `@file`
/// names a file (keeping its tail), anything else is source text shown as
/// `[string "..."]`.
pub fn chunk_id(source: &str) -> String {
    let avail = ID_SIZE - 1;
    if let Some(rest) = source.strip_prefix('=') {
        return truncate_chars(rest, avail).to_string();
    }
    if let Some(rest) = source.strip_prefix('@') {
        if rest.len() <= avail {
            return rest.to_string();
        }
        let keep = avail - 3;
        let mut start = rest.len() - keep;
        while !rest.is_char_boundary(start) {
            start += 1;
        }
        return format!("...{}", &rest[start..]);
    }
    const PRE: &str = "[string \"";
    const POS: &str = "\"]";
    const DOTS: &str = "...";
    let avail = avail - PRE.len() - DOTS.len() - POS.len();
    let newline = source.find('\n');
    if source.len() < avail && newline.is_none() {
        return format!("{PRE}{source}{POS}");
    }
    let first_line = match newline {
        Some(nl) => &source[..nl],
        None => source,
    };
    format!("{PRE}{}{DOTS}{POS}", truncate_chars(first_line, avail))
}

fn truncate_chars(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Compile a source file; the chunk is named `@path`.
pub fn compile_file(path: impl AsRef<Path>) -> Result<Proto, CompileError> {
    let path = path.as_ref();
    let chunkname = format!("@{}", path.display());
    let source = std::fs::read(path).map_err(|e| CompileError {
        message: format!("cannot open {}: {e}", path.display()),
        chunk: chunk_id(&chunkname),
        line: 0,
        near: None,
    })?;
    let proto = compile(&source, &chunkname)?;
    debug!(
        chunk = %chunkname,
        instructions = proto.code.len(),
        constants = proto.constants.len(),
        "compiled chunk"
    );
    Ok(proto)
}
