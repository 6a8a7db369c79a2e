//! File extension selection for extracted code.
//!
//! Rules are evaluated in a fixed order. Language names mentioned in the user
//! message are checked across all rules before any code-shape heuristic, so an
//! explicit request beats a guess from the code.

use regex::Regex;
use std::sync::LazyLock;

/// Extension used when nothing matches.
pub const DEFAULT_EXTENSION: &str = ".txt";

struct LanguageRule {
    extension: &'static str,
    /// Whole-word hints looked for in the lowercased user message.
    hints: &'static [&'static str],
    /// Content patterns looked for in the code.
    markers: Vec<Regex>,
}

impl LanguageRule {
    fn new(extension: &'static str, hints: &'static [&'static str], markers: &[&str]) -> Self {
        Self {
            extension,
            hints,
            markers: markers.iter().map(|m| Regex::new(m).unwrap()).collect(),
        }
    }

    fn named_in(&self, message: &str) -> bool {
        self.hints.iter().any(|hint| mentions(message, hint))
    }

    fn shaped_like(&self, code: &str) -> bool {
        self.markers.iter().any(|marker| marker.is_match(code))
    }
}

static RULES: LazyLock<Vec<LanguageRule>> = LazyLock::new(|| {
    vec![
        LanguageRule::new(
            ".js",
            &["javascript", "js", "node", "nodejs", "node.js"],
            &[
                r"console\.log\(",
                r"\bdocument\.",
                r"\brequire\(",
                r"module\.exports",
                r"\bfunction\s*\w*\s*\([^)$]*\)\s*\{",
            ],
        ),
        LanguageRule::new(
            ".py",
            &["python", "py", "django", "flask"],
            &[
                r"(?m)^\s*def \w+\s*\(",
                r"(?m)^\s*import [\w., ]+\s*$",
                r"(?m)^\s*from [\w.]+ import ",
                r"\bprint\(",
            ],
        ),
        LanguageRule::new(
            ".html",
            &["html", "webpage", "web page"],
            &[r"(?i)<!doctype html", r"(?i)<html[\s>]", r"(?i)<body[\s>]", r"(?i)<head>"],
        ),
        LanguageRule::new(
            ".css",
            &["css", "stylesheet"],
            &[
                r"\b(?:color|margin|padding|display|font-size|font-family|background(?:-color)?|border|width|height)\s*:\s*[^;{}\n]+;",
            ],
        ),
        LanguageRule::new(
            ".java",
            &["java", "spring"],
            &[
                r"System\.out\.print",
                r"public\s+static\s+void\s+main\s*\(\s*String",
                r"(?m)^\s*import\s+java\.",
            ],
        ),
        LanguageRule::new(
            ".cpp",
            &["c++", "cpp"],
            &[r"#include\s*[<\x22]", r"\bstd::", r"\bcout\s*<<"],
        ),
        LanguageRule::new(
            ".cs",
            &["c#", "csharp", ".net", "dotnet"],
            &[r"\busing\s+System", r"\bConsole\.Write", r"(?m)^\s*namespace\s+[\w.]+"],
        ),
        LanguageRule::new(".php", &["php", "laravel"], &[r"<\?php", r#"\becho\s+["$]"#]),
        LanguageRule::new(
            ".ts",
            &["typescript", "ts"],
            &[
                r":\s*(?:string|number|boolean)\b",
                r"\binterface\s+\w+\s*\{",
                r"\btype\s+\w+\s*=",
            ],
        ),
        LanguageRule::new(
            ".jsx",
            &["jsx", "react"],
            &[r"className=", r"return\s*\(\s*<", r"import\s+React"],
        ),
    ]
});

/// Whether `needle` occurs in `haystack` with no alphanumeric neighbour.
///
/// Keeps "java" from matching inside "javascript" and "ts" inside "its".
fn mentions(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Pick a file extension (with leading dot) for a code fragment.
pub fn resolve_extension(code: &str, user_message: &str) -> &'static str {
    let message = user_message.to_lowercase();

    if let Some(rule) = RULES.iter().find(|rule| rule.named_in(&message)) {
        return rule.extension;
    }

    RULES
        .iter()
        .find(|rule| rule.shaped_like(code))
        .map_or(DEFAULT_EXTENSION, |rule| rule.extension)
}
