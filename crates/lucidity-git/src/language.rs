//! Language tags for changed files.

use std::path::Path;

/// Tag used when nothing matches.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

fn language_for_extension(ext: &str) -> Option<&'static str> {
    let lang = match ext {
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "mts" | "cts" => "typescript",
        "jsx" => "jsx",
        "tsx" => "tsx",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "cs" => "csharp",
        "go" => "go",
        "rs" => "rust",
        "php" => "php",
        "rb" => "ruby",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "sh" | "bash" | "zsh" => "bash",
        "pl" | "pm" => "perl",
        "lua" => "lua",
        "sql" => "sql",
        "md" | "markdown" => "markdown",
        "json" => "json",
        "xml" => "xml",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "vue" => "vue",
        "svelte" => "svelte",
        "ex" | "exs" => "elixir",
        "hs" => "haskell",
        "dart" => "dart",
        "proto" => "protobuf",
        _ => return None,
    };
    Some(lang)
}

fn language_for_file_name(name: &str) -> Option<&'static str> {
    match name {
        "Dockerfile" | "Containerfile" => Some("dockerfile"),
        "Makefile" | "GNUmakefile" | "makefile" => Some("makefile"),
        "Rakefile" | "Gemfile" => Some("ruby"),
        "CMakeLists.txt" => Some("cmake"),
        _ => None,
    }
}

fn language_for_interpreter(interpreter: &str) -> Option<&'static str> {
    // Versioned interpreters: python3, python3.12, ruby3.2
    let base = interpreter.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
    match base {
        "python" => Some("python"),
        "node" | "nodejs" | "deno" | "bun" => Some("javascript"),
        "bash" | "sh" | "zsh" | "dash" | "ksh" => Some("bash"),
        "ruby" => Some("ruby"),
        "perl" => Some("perl"),
        "php" => Some("php"),
        "lua" => Some("lua"),
        _ => None,
    }
}

/// Map a `#!` line to a language.
fn sniff_shebang(content: &str) -> Option<&'static str> {
    let first = content.lines().next()?.strip_prefix("#!")?;
    let mut words = first.split_whitespace();
    let program = words.next()?;
    let program = program.rsplit('/').next().unwrap_or(program);

    if program == "env" {
        // `env -S python3 -u` and plain `env python3`
        let interpreter = words.find(|w| !w.starts_with('-'))?;
        return language_for_interpreter(interpreter);
    }
    language_for_interpreter(program)
}

/// Detect the language of a file from its path, falling back to a shebang
/// when the file has no extension and content is available.
pub fn detect_language(path: &str, content: Option<&str>) -> &'static str {
    let path = Path::new(path);
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if let Some(lang) = language_for_file_name(file_name) {
        return lang;
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => language_for_extension(&ext.to_ascii_lowercase()).unwrap_or(UNKNOWN_LANGUAGE),
        None => content
            .and_then(sniff_shebang)
            .unwrap_or(UNKNOWN_LANGUAGE),
    }
}
