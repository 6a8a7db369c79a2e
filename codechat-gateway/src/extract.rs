//! Code extraction from model output.
//!
//! A fenced block wins. Without one, a fixed list of code shapes is tried in
//! order and the first full match of the first matching shape is returned.
//! An unterminated fence is not an error; it falls through to the shapes.

use regex::Regex;
use std::sync::LazyLock;

/// Opening fence, optional language tag, newline, body, closing fence.
static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[\w+#.-]*[ \t]*\r?\n(.*?)```").unwrap());

/// Fallback shapes, highest priority first.
static CODE_SHAPES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // named function with a brace body
        r"(?s)\bfunction\s+\w+\s*\([^)]*\)\s*\{.*?\}",
        // class with a brace body
        r"(?s)\bclass\s+\w+[^{]*\{.*?\}",
        // element pair
        r"(?s)<([a-zA-Z][a-zA-Z0-9]*)\b[^>]*>.*?</[a-zA-Z][a-zA-Z0-9]*\s*>",
        // function expression or arrow function assigned to a name
        r"(?s)\b(?:const|let|var)\s+\w+\s*=\s*(?:async\s+)?(?:function\s*\w*\s*\([^)]*\)|\([^)]*\)\s*=>|\w+\s*=>)\s*\{.*?\}",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// Extract a code fragment from model output.
pub fn extract_code(text: &str) -> Option<String> {
    if let Some(caps) = FENCED_BLOCK.captures(text) {
        let code = caps.get(1).map_or("", |m| m.as_str()).trim();
        if !code.is_empty() {
            return Some(code.to_string());
        }
    }

    CODE_SHAPES
        .iter()
        .find_map(|shape| shape.find(text))
        .map(|m| m.as_str().trim().to_string())
        .filter(|code| !code.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_with_tag() {
        let text = "Here you go:\n```js\nfunction f(){return 1;}\n```";
        assert_eq!(extract_code(text).as_deref(), Some("function f(){return 1;}"));
    }

    #[test]
    fn test_fenced_block_without_tag() {
        let text = "```\nprint('hi')\n```\nDone.";
        assert_eq!(extract_code(text).as_deref(), Some("print('hi')"));
    }

    #[test]
    fn test_first_fenced_block_wins() {
        let text = "```python\na = 1\n```\nand\n```python\nb = 2\n```";
        assert_eq!(extract_code(text).as_deref(), Some("a = 1"));
    }

    #[test]
    fn test_fence_tag_with_symbols() {
        let text = "```c++\nint main() { return 0; }\n```";
        assert_eq!(extract_code(text).as_deref(), Some("int main() { return 0; }"));
    }

    #[test]
    fn test_no_code() {
        assert_eq!(extract_code("no code here"), None);
        assert_eq!(extract_code(""), None);
    }

    #[test]
    fn test_unterminated_fence_falls_through() {
        let text = "```js\nfunction add(a, b) { return a + b; }\n";
        assert_eq!(
            extract_code(text).as_deref(),
            Some("function add(a, b) { return a + b; }")
        );
    }

    #[test]
    fn test_unterminated_fence_without_shape() {
        assert_eq!(extract_code("```python\nprint('hi')"), None);
    }

    #[test]
    fn test_bare_function() {
        let text = "Try this: function greet(name) { return 'hi ' + name; } and call it.";
        assert_eq!(
            extract_code(text).as_deref(),
            Some("function greet(name) { return 'hi ' + name; }")
        );
    }

    #[test]
    fn test_bare_class() {
        let text = "class Point extends Base { x = 0; }";
        assert_eq!(extract_code(text).as_deref(), Some("class Point extends Base { x = 0; }"));
    }

    #[test]
    fn test_html_pair() {
        let text = "Use <div class=\"box\">Hello</div> for that.";
        assert_eq!(extract_code(text).as_deref(), Some("<div class=\"box\">Hello</div>"));
    }

    #[test]
    fn test_function_expression() {
        let text = "const double = (x) => { return x * 2; };";
        assert_eq!(extract_code(text).as_deref(), Some("const double = (x) => { return x * 2; }"));
    }

    #[test]
    fn test_shape_priority_not_position() {
        // The element pair appears first in the text, but the function shape
        // has higher priority.
        let text = "<p>see below</p>\nfunction run() { go(); }";
        assert_eq!(extract_code(text).as_deref(), Some("function run() { go(); }"));
    }

    #[test]
    fn test_empty_fence_falls_through() {
        let text = "```\n```\nfunction x() { y(); }";
        assert_eq!(extract_code(text).as_deref(), Some("function x() { y(); }"));
    }
}
