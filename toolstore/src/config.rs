use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    /// Optional JSON file overriding the compiled-in journal impact table.
    pub impacts_path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            db_path: base_path.join("registry.sqlite"),
            impacts_path: None,
        }
    }
}
