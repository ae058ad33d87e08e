//! Heuristic repair of trigger definitions.
//!
//! Only two malformations are recognized:
//! - the body after `AS` starts with `SET`, `DECLARE` or `IF` but has no `BEGIN`;
//! - a `GO` separator is reached while `BEGIN` tokens outnumber `END` tokens.
//!
//! Tokens are counted with plain word matching, so `BEGIN`/`END` inside string
//! literals or comments are counted too. This is not a SQL parser.

use regex::Regex;
use std::sync::LazyLock;

use super::batches::is_separator;

static CREATE_TRIGGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCREATE\s+TRIGGER\b").expect("valid pattern"));
static AS_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bAS\b").expect("valid pattern"));
static BEGIN_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bBEGIN\b").expect("valid pattern"));
static END_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bEND\b").expect("valid pattern"));
static BODY_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(SET|DECLARE|IF)\b").expect("valid pattern"));
static SET_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^SET\b").expect("valid pattern"));

const INDENT: &str = "    ";

/// Repair a script containing `CREATE TRIGGER`; any other script is returned
/// unchanged. Applying it twice gives the same result as applying it once.
pub fn repair_trigger(script: &str) -> String {
    if !CREATE_TRIGGER.is_match(script) {
        return script.to_string();
    }

    let mut out: Vec<String> = Vec::new();
    let mut segment: Vec<&str> = Vec::new();
    for line in script.split('\n') {
        if is_separator(line) {
            out.extend(repair_segment(&segment, true));
            out.push(line.to_string());
            segment.clear();
        } else {
            segment.push(line);
        }
    }
    out.extend(repair_segment(&segment, false));
    out.join("\n")
}

fn repair_segment(lines: &[&str], closed_by_separator: bool) -> Vec<String> {
    let text = lines.join("\n");
    let Some(trigger) = CREATE_TRIGGER.find(&text) else {
        return lines.iter().map(|l| l.to_string()).collect();
    };

    let text = insert_missing_begin(&text, trigger.start());
    let mut repaired: Vec<String> = text.split('\n').map(str::to_string).collect();

    if closed_by_separator {
        let body = &text[trigger.start()..];
        let open = BEGIN_TOKEN.find_iter(body).count();
        let close = END_TOKEN.find_iter(body).count();
        if open > close {
            let anchor = repaired
                .iter()
                .rposition(|l| !l.trim().is_empty())
                .map(|i| i + 1)
                .unwrap_or(repaired.len());
            for _ in close..open {
                repaired.insert(anchor, "END".to_string());
            }
        }
    }
    repaired
}

fn insert_missing_begin(text: &str, trigger_start: usize) -> String {
    let header = &text[trigger_start..];
    let Some(as_kw) = AS_KEYWORD.find(header) else {
        return text.to_string();
    };
    if BEGIN_TOKEN
        .find(header)
        .is_some_and(|begin| begin.start() < as_kw.start())
    {
        return text.to_string();
    }

    let as_end = trigger_start + as_kw.end();
    let body = text[as_end..].trim_start();
    if !BODY_START.is_match(body) {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len() + 16);
    out.push_str(&text[..as_end]);
    out.push_str("\nBEGIN\n");

    let mut remaining = body;
    while SET_START.is_match(remaining) {
        let (statement, tail) = split_statement(remaining);
        out.push_str(INDENT);
        out.push_str(statement.trim());
        out.push('\n');
        remaining = tail.trim_start();
    }
    if remaining.is_empty() {
        out.truncate(out.trim_end().len());
    } else {
        out.push_str(remaining);
    }
    out
}

/// Split off the leading statement: up to and including the first `;`, or up
/// to the end of the line when the line ends first.
fn split_statement(text: &str) -> (&str, &str) {
    let semicolon = text.find(';').map(|i| i + 1);
    let newline = text.find('\n');
    let cut = match (semicolon, newline) {
        (Some(s), Some(n)) => s.min(n),
        (Some(s), None) => s,
        (None, Some(n)) => n,
        (None, None) => text.len(),
    };
    text.split_at(cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_trigger_scripts_are_untouched() {
        let script = "SELECT 1\nGO\nUPDATE t SET a = 1 WHERE b IN (SELECT 1)\nGO";
        assert_eq!(repair_trigger(script), script);
    }

    #[test]
    fn inserts_begin_and_end_around_inline_body() {
        let script =
            "CREATE TRIGGER t ON tbl AFTER INSERT AS SET NOCOUNT ON; IF 1=1 BEGIN PRINT 'x' END\nGO";
        let repaired = repair_trigger(script);
        assert!(repaired.contains("AS\nBEGIN\n    SET NOCOUNT ON;\nIF 1=1 BEGIN PRINT 'x' END"));
        assert!(repaired.ends_with("IF 1=1 BEGIN PRINT 'x' END\nEND\nGO"));
    }

    #[test]
    fn moves_several_set_statements_onto_their_own_lines() {
        let script = "CREATE TRIGGER t ON tbl AFTER UPDATE AS\nSET NOCOUNT ON; SET XACT_ABORT ON;\nDECLARE @n INT;\nSELECT @n = COUNT(*) FROM inserted;\nGO";
        let repaired = repair_trigger(script);
        assert_eq!(
            repaired,
            "CREATE TRIGGER t ON tbl AFTER UPDATE AS\nBEGIN\n    SET NOCOUNT ON;\n    SET XACT_ABORT ON;\nDECLARE @n INT;\nSELECT @n = COUNT(*) FROM inserted;\nEND\nGO"
        );
    }

    #[test]
    fn set_without_semicolon_stops_at_line_end() {
        let script = "CREATE TRIGGER t ON tbl AFTER INSERT AS\nSET NOCOUNT ON\nIF 1=1 PRINT 'x'\nGO";
        assert_eq!(
            repair_trigger(script),
            "CREATE TRIGGER t ON tbl AFTER INSERT AS\nBEGIN\n    SET NOCOUNT ON\nIF 1=1 PRINT 'x'\nEND\nGO"
        );
    }

    #[test]
    fn body_of_only_set_statements_leaves_no_blank_line() {
        let script = "CREATE TRIGGER t ON x AFTER INSERT AS SET NOCOUNT ON;\nGO";
        assert_eq!(
            repair_trigger(script),
            "CREATE TRIGGER t ON x AFTER INSERT AS\nBEGIN\n    SET NOCOUNT ON;\nEND\nGO"
        );
    }

    #[test]
    fn end_goes_after_last_non_blank_line() {
        let script = "CREATE TRIGGER t ON tbl AFTER INSERT AS\nBEGIN\n    PRINT 'x'\n\n\nGO\nSELECT 1";
        assert_eq!(
            repair_trigger(script),
            "CREATE TRIGGER t ON tbl AFTER INSERT AS\nBEGIN\n    PRINT 'x'\nEND\n\n\nGO\nSELECT 1"
        );
    }

    #[test]
    fn correct_trigger_is_left_alone() {
        let script = "CREATE TRIGGER t ON tbl AFTER INSERT AS\nBEGIN\n    SET NOCOUNT ON;\nEND\nGO";
        assert_eq!(repair_trigger(script), script);
    }

    #[test]
    fn body_already_wrapped_before_as_is_left_alone() {
        let script = "CREATE TRIGGER audit AFTER INSERT ON orders\nBEGIN\n    INSERT INTO log SELECT NEW.id AS id;\nEND;\nGO";
        assert_eq!(repair_trigger(script), script);
    }

    #[test]
    fn unterminated_last_segment_gets_no_end() {
        let script = "CREATE TRIGGER t ON tbl AFTER INSERT AS\nDECLARE @x INT;";
        assert_eq!(
            repair_trigger(script),
            "CREATE TRIGGER t ON tbl AFTER INSERT AS\nBEGIN\nDECLARE @x INT;"
        );
    }

    #[test]
    fn only_trigger_segments_are_repaired() {
        let script = "DROP TRIGGER IF EXISTS t\nGO\nCREATE TRIGGER t ON tbl AFTER INSERT AS IF 1=1 PRINT 'x'\nGO\nSELECT 1";
        assert_eq!(
            repair_trigger(script),
            "DROP TRIGGER IF EXISTS t\nGO\nCREATE TRIGGER t ON tbl AFTER INSERT AS\nBEGIN\nIF 1=1 PRINT 'x'\nEND\nGO\nSELECT 1"
        );
    }

    #[test]
    fn repair_is_idempotent() {
        let inputs = [
            "CREATE TRIGGER t ON tbl AFTER INSERT AS SET NOCOUNT ON; IF 1=1 BEGIN PRINT 'x' END\nGO",
            "CREATE TRIGGER t ON tbl AFTER INSERT AS\nBEGIN\nBEGIN\nPRINT 1\n\nGO\nGO",
            "CREATE TRIGGER t ON tbl AFTER INSERT AS\nSET A ON;\nSET B ON;",
            "create trigger t on tbl after insert as set nocount on;\ngo;\ncreate trigger u on tbl after delete as declare @x int\ngo",
            "SELECT 1\nGO",
            "",
            "GO\nGO\n",
        ];
        for input in inputs {
            let once = repair_trigger(input);
            let twice = repair_trigger(&once);
            assert_eq!(once, twice, "repair not idempotent for {:?}", input);
        }
    }
}
