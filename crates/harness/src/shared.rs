use std::path::{Path, PathBuf};

use tempfile::TempDir;
use undolog_engine::{Engine, EngineError, UndoPolicy};

use crate::TestHost;
use crate::schema::kanban_guard;

/// A database file several hosts open through their own connections, the
/// way separate request handlers of one deployment would.
pub struct SharedDb {
    _dir: TempDir,
    path: PathBuf,
}

impl SharedDb {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("undolog.db");
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open_host(&self, actor: &str) -> Result<TestHost, EngineError> {
        self.open_host_with(actor, UndoPolicy::default())
    }

    pub fn open_host_with(&self, actor: &str, policy: UndoPolicy) -> Result<TestHost, EngineError> {
        let engine = Engine::open(&self.path, kanban_guard()?, policy)?;
        Ok(TestHost::with_engine(engine, actor))
    }
}
