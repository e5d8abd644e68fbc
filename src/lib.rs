pub mod ast;
pub mod bytecode;
pub mod lexer;
pub mod parser;
pub mod token;
pub mod vm;
