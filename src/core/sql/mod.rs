//! Text-level preparation of decrypted scripts: normalize, repair, split.

mod batches;
mod normalize;
mod repair;

pub use batches::split_batches;
pub use normalize::normalize;
pub use repair::repair_trigger;

/// A script ready for execution: the repaired text plus its batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedScript {
    pub sql: String,
    pub batches: Vec<String>,
}

/// Normalize, repair and split. Repair runs on the whole text because it
/// needs the `GO` lines to place synthesized `END`s.
pub fn prepare_script(raw: &str) -> PreparedScript {
    let normalized = normalize(raw);
    let sql = repair_trigger(&normalized);
    let batches = split_batches(&sql);
    PreparedScript { sql, batches }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepares_the_reference_trigger() {
        let raw = "\u{feff}CREATE TRIGGER t ON tbl AFTER INSERT AS SET NOCOUNT ON; IF 1=1 BEGIN PRINT 'x' END\nGO\n";
        let prepared = prepare_script(raw);
        assert!(prepared.sql.contains("AS\nBEGIN\n    SET NOCOUNT ON;\nIF 1=1"));
        assert_eq!(prepared.batches.len(), 1);
        assert!(prepared.batches[0].ends_with("PRINT 'x' END\nEND"));
    }

    #[test]
    fn batches_match_the_prepared_text() {
        let prepared = prepare_script("SELECT 1\nGO\nSELECT 2\n");
        assert_eq!(prepared.sql, "SELECT 1\nGO\nSELECT 2");
        assert_eq!(prepared.batches, split_batches(&prepared.sql));
    }
}
