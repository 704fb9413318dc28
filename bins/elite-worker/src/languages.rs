// Built-in toolchains for the supported languages
use crate::config::{InputChannel, Toolchain};
use elite_common::types::Language;
use std::time::Duration;

/// Upper bound on one compiler invocation
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-stream cap on captured stdout / stderr
pub const OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Default toolchain for each language. Adding a `Language` variant fails
/// to compile here until it gets one.
pub fn default_toolchain(language: Language) -> Toolchain {
    match language {
        Language::Cpp => Toolchain {
            source_file: "main.cpp".to_string(),
            compile: Some(args(&["g++", "-std=c++17", "-O2", "-o", "{bin}", "{src}"])),
            run: args(&["{bin}"]),
            input: InputChannel::Stdin,
        },
        Language::Java => Toolchain {
            source_file: "Main.java".to_string(),
            compile: Some(args(&["javac", "-d", "{dir}", "{src}"])),
            run: args(&["java", "-cp", "{dir}", "Main"]),
            input: InputChannel::Stdin,
        },
        Language::Python => Toolchain {
            source_file: "main.py".to_string(),
            compile: None,
            run: args(&["python3", "{src}"]),
            input: InputChannel::Args,
        },
        Language::Rust => Toolchain {
            source_file: "main.rs".to_string(),
            compile: Some(args(&["rustc", "-O", "-o", "{bin}", "{src}"])),
            run: args(&["{bin}"]),
            input: InputChannel::Stdin,
        },
    }
}
