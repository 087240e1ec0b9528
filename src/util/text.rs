use std::borrow::Cow;

fn is_stripped(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r')
}

/// Strips control characters from text extracted out of a feed and trims it.
///
/// Feeds in the wild carry stray NULs, form feeds and ANSI escapes pasted in
/// from show notes. None of that is meaningful in the JSON snapshot, so it is
/// dropped. Tab, newline and carriage return are kept.
///
/// Returns `Cow::Borrowed` when nothing needs to change.
pub fn clean_text(s: &str) -> Cow<'_, str> {
    let trimmed = s.trim();
    if !trimmed.chars().any(is_stripped) {
        return Cow::Borrowed(trimmed);
    }

    let mut out = String::with_capacity(trimmed.len());
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            // CSI sequence: ESC [ params final-byte
            if chars.peek() == Some(&'[') {
                chars.next();
                for n in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&n) {
                        break;
                    }
                }
            }
            continue;
        }
        if !is_stripped(c) {
            out.push(c);
        }
    }

    match out.trim() {
        t if t.len() == out.len() => Cow::Owned(out),
        t => Cow::Owned(t.to_owned()),
    }
}
