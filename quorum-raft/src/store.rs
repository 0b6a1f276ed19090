use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use quorum_core::error::Result;

use crate::raft::{Entry, NodeId, Term};

/// Everything a server must not lose across a crash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub entries: Vec<Entry>,
}

/// Durable storage for a single server, one JSON file under `var_dir` named
/// after the sanitized server id.
///
/// Every save rewrites the whole file through a temp-then-rename so a crash
/// mid-write leaves the previous state intact. Callers flush before sending
/// any reply that reveals the new state; a failed save is fatal.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn open(var_dir: &Path, id: &str) -> Result<Store> {
        fs::create_dir_all(var_dir)?;
        let path = var_dir.join(format!("{}.raft", sanitized(id)));
        Ok(Store { path })
    }

    pub fn load_or_default(&self) -> Result<PersistedState> {
        if !self.path.exists() {
            return Ok(PersistedState::default());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(&file);
        serde_json::to_writer(&mut writer, state)?;
        writer.flush()?;
        drop(writer);
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn sanitized(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
