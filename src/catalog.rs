use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One reference workbook: its topic units in teaching order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbookEntry {
    pub grade: String,
    pub publish: String,
    pub workbook: String,
    pub work: Vec<String>,
}

/// The three-part key a student uses to name a workbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbookRef {
    pub grade: String,
    pub publish: String,
    pub workbook: String,
}

impl WorkbookEntry {
    pub fn matches(&self, req: &WorkbookRef) -> bool {
        self.grade == req.grade && self.publish == req.publish && self.workbook == req.workbook
    }
}

/// Static workbook reference data, loaded once at startup and shared
/// read-only across handlers.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<WorkbookEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<WorkbookEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read workbook catalog at {}", path.display()))?;
        let entries: Vec<WorkbookEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid workbook catalog at {}", path.display()))?;
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[WorkbookEntry] {
        &self.entries
    }

    /// For each requested workbook, the first catalog entry matching on all
    /// three of (grade, publish, workbook). Requests with no match are
    /// dropped; the result may be shorter than the input, and an empty
    /// result must be surfaced by the caller before any LLM call.
    pub fn find_relevant(&self, requested: &[WorkbookRef]) -> Vec<WorkbookEntry> {
        let mut relevant = Vec::new();
        for req in requested {
            if let Some(entry) = self.entries.iter().find(|e| e.matches(req)) {
                relevant.push(entry.clone());
            }
        }
        relevant
    }

    /// Grade-wide slice of the catalog, used as the fallback reference set
    /// when a revision request carries no discoverable workbook keys.
    pub fn entries_for_grade(&self, grade: &str) -> Vec<WorkbookEntry> {
        self.entries
            .iter()
            .filter(|e| e.grade == grade)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn entry(grade: &str, publish: &str, workbook: &str, work: &[&str]) -> WorkbookEntry {
        WorkbookEntry {
            grade: grade.into(),
            publish: publish.into(),
            workbook: workbook.into(),
            work: work.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn req(grade: &str, publish: &str, workbook: &str) -> WorkbookRef {
        WorkbookRef {
            grade: grade.into(),
            publish: publish.into(),
            workbook: workbook.into(),
        }
    }

    #[test]
    fn matches_require_all_three_keys() {
        let catalog = Catalog::new(vec![entry("ms1", "A", "Math", &["Ch1", "Ch2"])]);

        assert_eq!(
            catalog.find_relevant(&[req("ms1", "A", "Math")]).len(),
            1,
            "exact triple should match"
        );
        assert!(catalog.find_relevant(&[req("ms2", "A", "Math")]).is_empty());
        assert!(catalog.find_relevant(&[req("ms1", "B", "Math")]).is_empty());
        assert!(catalog
            .find_relevant(&[req("ms1", "A", "Korean")])
            .is_empty());
    }

    #[test]
    fn first_catalog_entry_wins_on_duplicates() {
        let catalog = Catalog::new(vec![
            entry("ms1", "A", "Math", &["first"]),
            entry("ms1", "A", "Math", &["second"]),
        ]);
        let relevant = catalog.find_relevant(&[req("ms1", "A", "Math")]);
        assert_eq!(relevant.len(), 1);
        assert_eq!(relevant[0].work, vec!["first".to_string()]);
    }

    #[test]
    fn no_match_yields_empty_list_not_error() {
        let catalog = Catalog::new(vec![entry("ms1", "A", "Math", &["Ch1"])]);
        let relevant = catalog.find_relevant(&[
            req("ms3", "Z", "History"),
            req("ms3", "Z", "Geography"),
        ]);
        assert!(relevant.is_empty());
    }

    #[test]
    fn result_preserves_request_order() {
        let catalog = Catalog::new(vec![
            entry("ms1", "A", "Math", &["m"]),
            entry("ms1", "B", "Korean", &["k"]),
        ]);
        let relevant =
            catalog.find_relevant(&[req("ms1", "B", "Korean"), req("ms1", "A", "Math")]);
        assert_eq!(relevant[0].workbook, "Korean");
        assert_eq!(relevant[1].workbook, "Math");
    }

    #[test]
    fn entries_for_grade_filters() {
        let catalog = Catalog::new(vec![
            entry("ms1", "A", "Math", &["m"]),
            entry("ms2", "A", "Math", &["m2"]),
        ]);
        let ms2 = catalog.entries_for_grade("ms2");
        assert_eq!(ms2.len(), 1);
        assert_eq!(ms2[0].work, vec!["m2".to_string()]);
    }

    #[test]
    fn loads_catalog_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"grade":"ms1","publish":"A","workbook":"Math","work":["Ch1","Ch2"]}}]"#
        )
        .unwrap();

        let catalog = Catalog::load(file.path()).unwrap();
        assert_eq!(catalog.entries().len(), 1);
        assert_eq!(catalog.entries()[0].work, vec!["Ch1", "Ch2"]);
    }
}
