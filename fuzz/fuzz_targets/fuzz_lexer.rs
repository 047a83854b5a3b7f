#![no_main]

use libfuzzer_sys::fuzz_target;
use luna_compiler::lexer::Lexer;
use luna_compiler::token::Token;

fuzz_target!(|data: &[u8]| {
    // Lexical errors are expected; panics are not.
    let Ok(mut lexer) = Lexer::new(data) else {
        return;
    };
    while *lexer.token() != Token::Eof {
        if lexer.next().is_err() {
            break;
        }
    }
});
