//! `keel --diagnostic`: what the control plane would start with

use serde::Serialize;
use serde_json::Value;

use crate::storage::inventory::JsonInventory;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::{version_info, VersionInfo};

#[derive(Debug, Serialize)]
pub struct Diagnostic {
    pub version: VersionInfo,
    pub base_dir: String,
    pub settings_file: String,
    /// `None` when the settings file is missing and defaults apply
    pub settings_error: Option<String>,
    pub inventory_file: String,
    pub inventory_error: Option<String>,
    pub servers: usize,
    pub applications: usize,
}

fn count(document: &Value, collection: &str) -> usize {
    document
        .get(collection)
        .and_then(|v| v.as_array())
        .map_or(0, |items| items.len())
}

pub async fn run_diagnostic(layout: &StorageLayout) -> Diagnostic {
    let settings_file = layout.settings_file();
    let (settings, settings_error) = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => (settings, None),
            Err(e) => (Settings::default(), Some(e.to_string())),
        }
    } else {
        (Settings::default(), None)
    };

    let inventory_file = layout.inventory_file(&settings.inventory_file);
    let inventory_path = inventory_file.path().display().to_string();
    let (servers, applications, inventory_error) = match JsonInventory::load(inventory_file).await {
        Ok(inventory) => {
            let document = inventory.document().await;
            (count(&document, "servers"), count(&document, "applications"), None)
        }
        Err(e) => (0, 0, Some(e.to_string())),
    };

    Diagnostic {
        version: version_info(),
        base_dir: layout.base_dir.display().to_string(),
        settings_file: settings_file.path().display().to_string(),
        settings_error,
        inventory_file: inventory_path,
        inventory_error,
        servers,
        applications,
    }
}
