//! Tile catalog: which services the launcher offers and how to start them.
//!
//! Loaded once at startup and treated as read-only afterwards.

use crate::model::LaunchRequest;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CATALOG_FILE: &str = "tiles.json";
const APP_DIR: &str = "streaming-launcher";

/// Linux reports at most 15 bytes of a process name.
const MAX_PROCESS_NAME: usize = 15;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid catalog: {0}")]
    Invalid(String),
    #[error("unknown tile '{0}'")]
    UnknownTile(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TileTarget {
    /// Opened in the catalog's browser in kiosk mode.
    Url { url: String },
    /// Run as-is.
    App { command: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(flatten)]
    pub target: TileTarget,
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub process_match_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Command prefix for URL tiles; the URL is appended.
    #[serde(default = "default_browser")]
    pub browser: Vec<String>,
    pub tiles: Vec<Tile>,
}

fn default_browser() -> Vec<String> {
    vec!["firefox".into(), "--kiosk".into()]
}

fn url_tile(id: &str, name: &str, icon: &str, url: &str) -> Tile {
    Tile {
        id: id.into(),
        name: name.into(),
        icon: icon.into(),
        target: TileTarget::Url { url: url.into() },
        process_match_name: None,
    }
}

fn app_tile(id: &str, name: &str, icon: &str, command: &[&str]) -> Tile {
    Tile {
        id: id.into(),
        name: name.into(),
        icon: icon.into(),
        target: TileTarget::App {
            command: command.iter().map(|s| s.to_string()).collect(),
        },
        process_match_name: None,
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            browser: default_browser(),
            tiles: vec![
                url_tile("netflix", "Netflix", "N", "https://www.netflix.com"),
                url_tile("youtube", "YouTube", "▶", "https://www.youtube.com/tv"),
                url_tile("prime", "Prime Video", "P", "https://www.primevideo.com"),
                url_tile("disney", "Disney+", "D", "https://www.disneyplus.com"),
                url_tile("twitch", "Twitch", "T", "https://www.twitch.tv"),
                app_tile("stremio", "Stremio", "S", &["stremio"]),
                app_tile("kodi", "Kodi", "K", &["kodi"]),
            ],
        }
    }
}

/// `$XDG_CONFIG_HOME/streaming-launcher/tiles.json` or the platform equivalent.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CATALOG_FILE))
}

/// Load the catalog. An explicit path must exist; without one the default
/// location is tried and the built-in catalog is used if nothing is there.
pub fn load(path: Option<&Path>) -> Result<Catalog> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match default_path().filter(|p| p.exists()) {
            Some(p) => p,
            None => {
                tracing::info!("no catalog file found, using built-in tiles");
                return Ok(Catalog::default());
            }
        },
    };
    let catalog = read_file(&path)?;
    tracing::info!(path = %path.display(), tiles = catalog.tiles.len(), "loaded catalog");
    Ok(catalog)
}

pub fn read_file(path: &Path) -> Result<Catalog, CatalogError> {
    let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let catalog: Catalog = serde_json::from_str(&text).map_err(|source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    catalog.validate()?;
    Ok(catalog)
}

/// Cut a name to what the process table shows, on a char boundary.
fn truncate_process_name(name: &str) -> String {
    let mut end = name.len().min(MAX_PROCESS_NAME);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// File name of a program path, cut to what the process table shows.
fn process_name_of(program: &str) -> String {
    let name = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string());
    truncate_process_name(&name)
}

impl Catalog {
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.browser.first().map_or(true, |b| b.trim().is_empty()) {
            return Err(CatalogError::Invalid("browser command is empty".into()));
        }
        let mut seen = HashSet::new();
        for tile in &self.tiles {
            if tile.id.trim().is_empty() {
                return Err(CatalogError::Invalid(format!(
                    "tile '{}' has an empty id",
                    tile.name
                )));
            }
            if !seen.insert(tile.id.as_str()) {
                return Err(CatalogError::Invalid(format!("duplicate tile id '{}'", tile.id)));
            }
            match &tile.target {
                TileTarget::Url { url } if url.trim().is_empty() => {
                    return Err(CatalogError::Invalid(format!("tile '{}' has an empty url", tile.id)));
                }
                TileTarget::App { command }
                    if command.first().map_or(true, |c| c.trim().is_empty()) =>
                {
                    return Err(CatalogError::Invalid(format!(
                        "tile '{}' has an empty command",
                        tile.id
                    )));
                }
                _ => {}
            }
            if matches!(&tile.process_match_name, Some(m) if m.trim().is_empty()) {
                return Err(CatalogError::Invalid(format!(
                    "tile '{}' has an empty match name",
                    tile.id
                )));
            }
            if let Some(m) = tile.process_match_name.as_deref() {
                if m.len() > MAX_PROCESS_NAME {
                    tracing::warn!(
                        tile = %tile.id,
                        match_name = m,
                        "match name longer than {MAX_PROCESS_NAME} bytes, using '{}'",
                        truncate_process_name(m)
                    );
                }
            }
        }
        Ok(())
    }

    pub fn tile(&self, id: &str) -> Option<&Tile> {
        self.tiles.iter().find(|t| t.id == id)
    }

    /// Build the launch request for a tile.
    pub fn request_for(&self, id: &str) -> Result<LaunchRequest, CatalogError> {
        let tile = self
            .tile(id)
            .ok_or_else(|| CatalogError::UnknownTile(id.to_string()))?;
        let (command, program) = match &tile.target {
            TileTarget::Url { url } => {
                let mut cmd = self.browser.clone();
                cmd.push(url.clone());
                let program = self.browser.first().cloned().unwrap_or_default();
                (cmd, program)
            }
            TileTarget::App { command } => {
                let program = command.first().cloned().unwrap_or_default();
                (command.clone(), program)
            }
        };
        let process_match_name = match tile.process_match_name.as_deref() {
            Some(m) => truncate_process_name(m),
            None => process_name_of(&program),
        };
        Ok(LaunchRequest {
            target_id: tile.id.clone(),
            display_name: tile.name.clone(),
            command,
            process_match_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let c = Catalog::default();
        c.validate().unwrap();
        assert!(c.tile("netflix").is_some());
    }

    #[test]
    fn url_tiles_open_in_kiosk_browser() {
        let c = Catalog::default();
        let r = c.request_for("netflix").unwrap();
        assert_eq!(
            r.command,
            vec!["firefox", "--kiosk", "https://www.netflix.com"]
        );
        assert_eq!(r.process_match_name, "firefox");
        assert_eq!(r.display_name, "Netflix");
    }

    #[test]
    fn app_match_name_defaults_to_program_file_name() {
        let json = r#"{
            "browser": ["/usr/bin/chromium-browser", "--kiosk"],
            "tiles": [
                {"id": "plex", "name": "Plex", "type": "app", "command": ["/opt/plex/plex-media-player", "--fullscreen"]},
                {"id": "yt", "name": "YouTube", "type": "url", "url": "https://youtube.com/tv"},
                {"id": "vlc", "name": "VLC", "type": "app", "command": ["flatpak", "run", "org.videolan.VLC"], "match": "vlc"}
            ]
        }"#;
        let c: Catalog = serde_json::from_str(json).unwrap();
        c.validate().unwrap();
        assert_eq!(c.request_for("plex").unwrap().process_match_name, "plex-media-play");
        assert_eq!(c.request_for("yt").unwrap().process_match_name, "chromium-browse");
        assert_eq!(c.request_for("vlc").unwrap().process_match_name, "vlc");
    }

    #[test]
    fn long_explicit_match_name_is_cut_to_process_name_length() {
        let json = r#"{"tiles": [
            {"id": "jf", "name": "Jellyfin", "type": "app",
             "command": ["flatpak", "run", "com.github.iwalton3.jellyfin-media-player"],
             "match": "jellyfinmediaplayer"}
        ]}"#;
        let c: Catalog = serde_json::from_str(json).unwrap();
        c.validate().unwrap();
        let name = c.request_for("jf").unwrap().process_match_name;
        assert_eq!(name, "jellyfinmediapl");
        assert_eq!(name.len(), MAX_PROCESS_NAME);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_process_name("short"), "short");
        let cut = truncate_process_name("ééééééééé");
        assert!(cut.len() <= MAX_PROCESS_NAME);
        assert_eq!(cut, "ééééééé");
    }

    #[test]
    fn browser_defaults_when_omitted() {
        let json = r#"{"tiles": [{"id": "a", "name": "A", "type": "url", "url": "https://a"}]}"#;
        let c: Catalog = serde_json::from_str(json).unwrap();
        assert_eq!(c.browser, default_browser());
    }

    #[test]
    fn rejects_duplicates_and_empty_commands() {
        let mut c = Catalog::default();
        c.tiles.push(c.tiles[0].clone());
        assert!(matches!(c.validate(), Err(CatalogError::Invalid(_))));

        let mut c = Catalog::default();
        c.tiles.push(app_tile("broken", "Broken", "", &[]));
        assert!(matches!(c.validate(), Err(CatalogError::Invalid(_))));

        let mut c = Catalog::default();
        c.tiles[0].process_match_name = Some(String::new());
        assert!(matches!(c.validate(), Err(CatalogError::Invalid(_))));
    }

    #[test]
    fn unknown_tile_is_an_error() {
        assert!(matches!(
            Catalog::default().request_for("nope"),
            Err(CatalogError::UnknownTile(_))
        ));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("streaming-launcher-missing-catalog.json");
        assert!(load(Some(&path)).is_err());
    }

    #[test]
    fn reads_catalog_from_disk() {
        let path = std::env::temp_dir().join(format!(
            "streaming-launcher-catalog-{}.json",
            std::process::id()
        ));
        let json = serde_json::to_string_pretty(&Catalog::default()).unwrap();
        std::fs::write(&path, json).unwrap();
        let c = read_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(c, Catalog::default());
    }
}
