//! Pulls the code out of a model reply.

const FENCE: &str = "```";
const SCRIPT_TAGS: [&str; 6] = ["javascript", "js", "jsx", "typescript", "ts", "tsx"];
const PROSE_PREFIXES: [&str; 6] = ["To ", "This ", "Here", "Note", "Explanation", "I "];

/// Returns the interior of the first fenced block, or failing that the reply
/// with blank lines, fence markers and obvious prose removed.
///
/// Never fails; code that survives extraction but does not run is left to
/// the correction loop.
pub fn extract_code(raw: &str) -> String {
    fenced_block(raw).unwrap_or_else(|| strip_prose(raw))
}

fn fenced_block(raw: &str) -> Option<String> {
    let open = raw.find(FENCE)?;
    let after_open = &raw[open + FENCE.len()..];
    let body = skip_language_tag(after_open);
    let close = body.find(FENCE)?;
    Some(body[..close].trim().to_string())
}

/// Drops the language tag after an opening fence: a known script language
/// followed by whitespace, or any single word alone on the fence line.
fn skip_language_tag(text: &str) -> &str {
    let word_end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '_' | '#' | '.')))
        .unwrap_or(text.len());
    let (word, rest) = text.split_at(word_end);
    if word.is_empty() {
        return text;
    }
    let alone_on_line = rest.trim_start_matches([' ', '\t', '\r']).starts_with('\n');
    let known = SCRIPT_TAGS.contains(&word.to_ascii_lowercase().as_str())
        && rest.starts_with(char::is_whitespace);
    if alone_on_line || known { rest } else { text }
}

fn strip_prose(raw: &str) -> String {
    raw.lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty()
                && !line.contains(FENCE)
                && !PROSE_PREFIXES
                    .iter()
                    .any(|prefix| trimmed.starts_with(prefix))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::extract_code;

    #[test]
    fn returns_fenced_interior() {
        let raw = "Here is your model:\n```javascript\nconst mesh = new Mesh(new BoxGeometry(1, 1, 1));\n```\nEnjoy!";
        let code = extract_code(raw);
        assert_eq!(code, "const mesh = new Mesh(new BoxGeometry(1, 1, 1));");
        assert!(!code.contains("```"));
    }

    #[test]
    fn untagged_and_inline_fences_work() {
        assert_eq!(extract_code("```\nconst a = 1;\n```"), "const a = 1;");
        assert_eq!(extract_code("```js const a = 1; ```"), "const a = 1;");
        assert_eq!(extract_code("```const a = 1;```"), "const a = 1;");
    }

    #[test]
    fn first_block_wins() {
        let raw = "```js\nconst mesh = a;\n```\ntext\n```js\nconst mesh = b;\n```";
        assert_eq!(extract_code(raw), "const mesh = a;");
    }

    #[test]
    fn falls_back_to_dropping_prose() {
        let raw = "To build this we use a box.\n\nconst geometry = new BoxGeometry(2, 2, 2);\nThis creates the mesh.\nconst mesh = new Mesh(geometry);\n```";
        assert_eq!(
            extract_code(raw),
            "const geometry = new BoxGeometry(2, 2, 2);\nconst mesh = new Mesh(geometry);"
        );
    }

    #[test]
    fn plain_code_passes_through() {
        let raw = "const mesh = new Mesh(new SphereGeometry(5));";
        assert_eq!(extract_code(raw), raw);
    }
}
