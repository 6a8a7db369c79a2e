//! Code-request detection and prompt augmentation.
//!
//! Detection is a case-insensitive substring check against two fixed word
//! lists. It misfires on purpose-agnostic text ("classic" contains "class")
//! and misses unusual phrasings; both are accepted.

/// Phrases that signal a coding task.
const CODE_ACTION_PHRASES: &[&str] = &[
    "write code",
    "write a function",
    "write a program",
    "write a script",
    "write a class",
    "create a function",
    "create a class",
    "create a program",
    "create a script",
    "create a component",
    "build a function",
    "generate code",
    "code for",
    "code to",
    "code that",
    "implement",
    "function",
    "algorithm",
    "program",
    "script",
    "snippet",
    "refactor",
    "debug",
    "class",
    "method",
    "api endpoint",
    "regex",
    "sql query",
];

/// Language and framework names.
const CODE_LANGUAGE_TERMS: &[&str] = &[
    "python",
    "javascript",
    "typescript",
    "java",
    "c++",
    "c#",
    "csharp",
    "golang",
    "rust",
    "ruby",
    "php",
    "swift",
    "kotlin",
    "scala",
    "html",
    "css",
    "sql",
    "bash",
    "react",
    "node.js",
    "nodejs",
    "express",
    "django",
    "flask",
    "vue",
    "angular",
    "jquery",
];

/// Instruction appended to code requests.
pub const CODE_FORMAT_INSTRUCTION: &str = "\n\nPlease provide clean, properly indented code. \
Wrap the complete code in a single fenced code block (```language ... ```). \
Do not add explanations before or after the code block.";

/// Whether a user message looks like a request for code.
pub fn is_code_request(message: &str) -> bool {
    let lower = message.to_lowercase();

    CODE_ACTION_PHRASES
        .iter()
        .chain(CODE_LANGUAGE_TERMS)
        .any(|term| lower.contains(term))
}

/// Build the outbound prompt for a message.
pub fn augment_prompt(message: &str, is_code: bool) -> String {
    if is_code {
        format!("{message}{CODE_FORMAT_INSTRUCTION}")
    } else {
        message.to_string()
    }
}
