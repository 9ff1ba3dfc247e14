//! JSON playlists.
//!
//! ```json
//! {"name": "evening", "repeat": false, "entries": [{"sequence": "intro.mseq"}]}
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::PlaybackError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    /// Sequence file name, relative to the sequences directory.
    pub sequence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub name: String,
    #[serde(default)]
    pub repeat: bool,
    pub entries: Vec<PlaylistEntry>,
}

impl Playlist {
    /// File a playlist named `name` is read from.
    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        if name.ends_with(".json") {
            dir.join(name)
        } else {
            dir.join(format!("{}.json", name))
        }
    }

    pub fn load(dir: &Path, name: &str) -> Result<Self, PlaybackError> {
        let path = Self::path_for(dir, name);
        let contents = std::fs::read_to_string(&path).map_err(|source| {
            PlaybackError::PlaylistRead {
                path: path.clone(),
                source,
            }
        })?;
        Self::from_json(&contents).map_err(|source| PlaybackError::PlaylistParse { path, source })
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
