//! Static journal-name to impact-value lookup.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;

use crate::errors::Result;

static BUILTIN: Lazy<HashMap<String, f64>> = Lazy::new(|| {
    serde_json::from_str(include_str!("../data/impacts.json"))
        .expect("compiled-in impact table is valid JSON")
});

/// Upper-cased journal name to numeric impact value. Absent entries are 0,
/// never an error.
#[derive(Debug, Clone, Default)]
pub struct JournalImpacts {
    table: HashMap<String, f64>,
}

impl JournalImpacts {
    /// The compiled-in table.
    pub fn builtin() -> Self {
        Self {
            table: BUILTIN.clone(),
        }
    }

    /// Loads a table from a JSON object file, upper-casing the keys.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let table: HashMap<String, f64> = serde_json::from_str(&raw)?;
        Ok(Self::from_map(table))
    }

    pub fn from_map(table: HashMap<String, f64>) -> Self {
        Self {
            table: table
                .into_iter()
                .map(|(journal, impact)| (journal.to_uppercase(), impact))
                .collect(),
        }
    }

    /// The impact value for a journal, 0 for blank or unknown names.
    pub fn lookup(&self, journal: &str) -> f64 {
        if journal.is_empty() {
            return 0.0;
        }
        self.table
            .get(&journal.to_uppercase())
            .copied()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let impacts = JournalImpacts::from_map(HashMap::from([(
            "Nucleic Acids Research".to_string(),
            19.16,
        )]));
        assert_eq!(impacts.lookup("nucleic acids research"), 19.16);
        assert_eq!(impacts.lookup("NUCLEIC ACIDS RESEARCH"), 19.16);
    }

    #[test]
    fn unknown_and_blank_journals_are_zero() {
        let impacts = JournalImpacts::builtin();
        assert_eq!(impacts.lookup("Journal Of Made Up Results"), 0.0);
        assert_eq!(impacts.lookup(""), 0.0);
    }

    #[test]
    fn builtin_table_parses() {
        let impacts = JournalImpacts::builtin();
        assert!(impacts.lookup("Bioinformatics") > 0.0);
    }
}
