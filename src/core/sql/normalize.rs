const BOM: char = '\u{feff}';

/// Zero-width and bidi format characters that show up in copy-pasted or
/// re-encoded scripts and make SQL Server reject otherwise valid batches.
fn is_format_char(c: char) -> bool {
    matches!(
        c,
        '\u{00ad}'
            | '\u{061c}'
            | '\u{180e}'
            | '\u{200b}'..='\u{200f}'
            | '\u{202a}'..='\u{202e}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206f}'
            | '\u{feff}'
    )
}

fn is_stray_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r')
}

/// Strip a leading BOM, control and zero-width characters, then trim the
/// outer whitespace. Line structure inside the script is kept as is.
pub fn normalize(text: &str) -> String {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    let cleaned: String = text
        .chars()
        .filter(|&c| !is_stray_control(c) && !is_format_char(c))
        .collect();
    cleaned.trim().to_string()
}
