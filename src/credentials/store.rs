//! On-disk layout of a platform's credentials
//!
//! ```text
//! <credentials-dir>/<platform>/active/*.txt
//! <credentials-dir>/<platform>/burnt/*.txt
//! <credentials-dir>/<platform>/failures.json
//! ```

use crate::platform::Platform;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const ACTIVE_DIR: &str = "active";
const BURNT_DIR: &str = "burnt";
const LEDGER_FILE: &str = "failures.json";
const CREDENTIAL_EXTENSION: &str = "txt";

/// File-system store for one platform's credential files and failure ledger
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    /// Opens the store for a platform, creating its directories if needed
    pub fn open(base_dir: &Path, platform: Platform) -> io::Result<Self> {
        let store = Self {
            root: base_dir.join(platform.as_str()),
        };
        fs::create_dir_all(store.active_dir())?;
        fs::create_dir_all(store.burnt_dir())?;
        Ok(store)
    }

    pub fn active_dir(&self) -> PathBuf {
        self.root.join(ACTIVE_DIR)
    }

    pub fn burnt_dir(&self) -> PathBuf {
        self.root.join(BURNT_DIR)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }

    /// Lists active credential file names, sorted
    pub fn list_active(&self) -> io::Result<Vec<String>> {
        list_credentials(&self.active_dir())
    }

    /// Lists burnt credential file names, sorted
    pub fn list_burnt(&self) -> io::Result<Vec<String>> {
        list_credentials(&self.burnt_dir())
    }

    /// Loads consecutive-failure counts keyed by file name
    ///
    /// A missing ledger is empty. An unreadable ledger is logged and treated as empty
    /// so that a corrupt file never takes the pool down.
    pub fn load_ledger(&self) -> HashMap<String, u32> {
        let path = self.ledger_path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                tracing::warn!("Could not read failure ledger {}: {}", path.display(), e);
                return HashMap::new();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(ledger) => ledger,
            Err(e) => {
                tracing::warn!("Could not parse failure ledger {}: {}", path.display(), e);
                HashMap::new()
            }
        }
    }

    /// Rewrites the failure ledger atomically and durably
    ///
    /// The temp file is synced before the rename and the directory after it.
    pub fn save_ledger(&self, ledger: &BTreeMap<String, u32>) -> Result<(), super::CredentialError> {
        let json = serde_json::to_string_pretty(ledger)?;
        let tmp = self.root.join(format!("{}.tmp", LEDGER_FILE));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.ledger_path())?;
        sync_dir(&self.root)?;
        Ok(())
    }

    /// Moves a credential file from `active/` to `burnt/`, syncing both directories
    pub fn burn(&self, name: &str) -> io::Result<PathBuf> {
        let target = self.burnt_dir().join(name);
        fs::rename(self.active_dir().join(name), &target)?;
        sync_dir(&self.burnt_dir())?;
        sync_dir(&self.active_dir())?;
        Ok(target)
    }
}

/// Flushes directory entries (renames) to disk
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn list_credentials(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(CREDENTIAL_EXTENSION) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}
