//! Greedy word wrapping for rendered messages.

fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n')
}

/// Split off the first word, skipping separators on both sides.
fn next_word(text: &str) -> (&str, &str) {
    let text = text.trim_start_matches(is_separator);
    let end = text.find(is_separator).unwrap_or(text.len());
    let (word, rest) = text.split_at(end);
    (word, rest.trim_start_matches(is_separator))
}

/// Wrap `text` so that no line, `prefix` included, is wider than `width`
/// columns. Every line starts with `prefix`. Words are never split, so a
/// word longer than the available room gets a line of its own. The result
/// has no trailing newline.
pub fn wrap(text: &str, prefix: &str, width: usize) -> String {
    let prefix_width = prefix.chars().count();
    let mut out = String::with_capacity(text.len() + prefix.len());

    let (word, mut rest) = next_word(text);
    out.push_str(prefix);
    out.push_str(word);
    let mut column = prefix_width + word.chars().count();

    while !rest.is_empty() {
        let (word, remaining) = next_word(rest);
        rest = remaining;
        let word_width = word.chars().count();
        if column + 1 + word_width <= width {
            out.push(' ');
            out.push_str(word);
            column += 1 + word_width;
        } else {
            out.push('\n');
            out.push_str(prefix);
            out.push_str(word);
            column = prefix_width + word_width;
        }
    }
    out
}
