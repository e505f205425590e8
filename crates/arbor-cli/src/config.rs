use std::fs;
use std::path::Path;

use anyhow::Context;
use arbor_store::StoreConfig;
use arbor_tree::TreeConfig;
use serde::{Deserialize, Serialize};

/// Name of the optional configuration file inside a store directory.
pub const CONFIG_FILE: &str = "arbor.toml";

/// Contents of `arbor.toml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArborToml {
    pub tree: TreeConfig,
    pub store: StoreConfig,
}

impl ArborToml {
    /// Load `<dir>/arbor.toml`, falling back to defaults when it is absent.
    ///
    /// The store root always becomes `dir`, whatever the file says.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let mut config = if path.is_file() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::parse(&text).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };
        config.store.root = dir.to_path_buf();
        Ok(config)
    }

    /// Parse and validate a configuration document.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.tree.validate()?;
        config.store.validate()?;
        Ok(config)
    }

    /// Render as TOML, omitting the store root.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        let mut value = toml::Value::try_from(self)?;
        if let Some(store) = value.get_mut("store").and_then(toml::Value::as_table_mut) {
            store.remove("root");
        }
        Ok(toml::to_string_pretty(&value)?)
    }
}
