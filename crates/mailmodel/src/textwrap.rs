pub(crate) fn wrap(value: &str) -> String {
    const SOFT_WIDTH: usize = 75;
    const HARD_WIDTH: usize = 900;
    wrap_impl(value, SOFT_WIDTH, HARD_WIDTH)
}

/// textwrap::fill prefers to break a line rather than finding stuff
/// that fits, so we use a simple greedy fill instead: take words up to
/// the soft width, allow a long word to overflow, but break it once it
/// passes the hard limit. Continuation lines are indented with a tab as
/// required for folded header values.
pub(crate) fn wrap_impl(value: &str, soft_width: usize, hard_width: usize) -> String {
    let mut result = String::new();
    let mut line = String::new();

    for word in value.split_ascii_whitespace() {
        if line.len() + word.len() < soft_width {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
            continue;
        }

        // Need to wrap. Accumulate the line so far, if any.
        if !line.is_empty() {
            if !result.is_empty() {
                result.push('\t');
            }
            result.push_str(&line);
            result.push_str("\r\n");
            line.clear();
        }

        if word.len() <= hard_width {
            line.push_str(word);
        } else {
            for c in word.chars() {
                line.push(c);
                if line.len() >= hard_width {
                    if !result.is_empty() {
                        result.push('\t');
                    }
                    result.push_str(&line);
                    result.push_str("\r\n");
                    line.clear();
                    continue;
                }
            }
        }
    }

    if !line.is_empty() {
        if !result.is_empty() {
            result.push('\t');
        }
        result.push_str(&line);
    }

    result
}
