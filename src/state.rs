use crate::engine::validate_target_fps;
use crate::packer::{StreamAdjustments, UnselectedTreatment};
use crate::preset::{PresetStore, ORIGINAL_PRESET_ID};
use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

const SCHEMA_VERSION: i32 = 1;

pub const PRESET_FILE: &str = "presets.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    pub last_preset: String,
    pub log_retention_count: usize,

    #[serde(default = "default_target_fps")]
    pub target_fps: Option<f32>,
    #[serde(default)]
    pub treatment: UnselectedTreatment,
    #[serde(default)]
    pub adjustments: StreamAdjustments,
}

fn default_target_fps() -> Option<f32> {
    Some(30.0)
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            last_preset: ORIGINAL_PRESET_ID.to_string(),
            log_retention_count: 10,
            target_fps: default_target_fps(),
            treatment: UnselectedTreatment::default(),
            adjustments: StreamAdjustments::default(),
        }
    }
}

enum WriteCommand {
    Update(AppState),
    Shutdown,
}

/// Resolve the application data directory.
///
/// `CHROMASIFT_HOME` wins, then `%APPDATA%\ChromaSift`, then
/// `$HOME/.config/chromasift`.
pub fn default_app_data_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("CHROMASIFT_HOME") {
        return Ok(PathBuf::from(home));
    }
    if let Ok(app_data) = std::env::var("APPDATA") {
        return Ok(PathBuf::from(app_data).join("ChromaSift"));
    }
    let home = std::env::var("HOME").context("Neither APPDATA nor HOME is set")?;
    Ok(PathBuf::from(home).join(".config").join("chromasift"))
}

pub struct StateManager {
    app_data_dir: PathBuf,
    state: Arc<RwLock<AppState>>,
    write_sender: Sender<WriteCommand>,
    write_thread: Option<thread::JoinHandle<()>>,
}

impl StateManager {
    pub fn new() -> Result<Self> {
        Self::open(default_app_data_dir()?)
    }

    pub fn open<P: AsRef<Path>>(app_data_dir: P) -> Result<Self> {
        let app_data_dir = app_data_dir.as_ref().to_path_buf();
        let db_path = app_data_dir.join("state.db");

        std::fs::create_dir_all(&app_data_dir)
            .context("Failed to create app data directory")?;
        std::fs::create_dir_all(app_data_dir.join("assets").join("luts"))
            .context("Failed to create LUT directory")?;
        std::fs::create_dir_all(app_data_dir.join("logs"))
            .context("Failed to create logs directory")?;

        let conn = Connection::open(&db_path).context("Failed to open database")?;
        Self::init_database(&conn)?;

        let initial_state = Self::load_state(&conn)?;
        let state = Arc::new(RwLock::new(initial_state));

        let (write_sender, write_receiver): (Sender<WriteCommand>, Receiver<WriteCommand>) = unbounded();

        let write_thread = thread::spawn(move || {
            Self::write_worker(db_path, write_receiver);
        });

        Ok(Self {
            app_data_dir,
            state,
            write_sender,
            write_thread: Some(write_thread),
        })
    }

    fn init_database(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .ok();

        if current_version.is_none() {
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])?;
        }

        Ok(())
    }

    fn load_state(conn: &Connection) -> Result<AppState> {
        let json_str: Option<String> = conn
            .query_row("SELECT value FROM state WHERE key = 'app_state'", [], |row| row.get(0))
            .ok();

        let mut state: AppState = match json_str {
            Some(json) => serde_json::from_str(&json).context("Failed to parse state JSON")?,
            None => return Ok(AppState::default()),
        };

        // Stored values may predate range changes; fall back per field
        if let Err(e) = state.adjustments.validate() {
            crate::log_warn!("Stored stream adjustments rejected: {}", e);
            state.adjustments = StreamAdjustments::default();
        }
        if let Some(Err(e)) = state.target_fps.map(validate_target_fps) {
            crate::log_warn!("Stored target fps rejected: {}", e);
            state.target_fps = default_target_fps();
        }
        if let Err(e) = state.treatment.validate() {
            crate::log_warn!("Stored treatment rejected: {}", e);
            state.treatment = UnselectedTreatment::default();
        }
        Ok(state)
    }

    fn write_worker(db_path: PathBuf, receiver: Receiver<WriteCommand>) {
        let conn = match Connection::open(&db_path) {
            Ok(c) => c,
            Err(e) => {
                crate::log_error!("Failed to open database in write worker: {}", e);
                return;
            }
        };

        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");

        while let Ok(cmd) = receiver.recv() {
            match cmd {
                WriteCommand::Update(state) => {
                    if let Ok(json) = serde_json::to_string(&state) {
                        if let Err(e) = conn.execute(
                            "INSERT OR REPLACE INTO state (key, value) VALUES ('app_state', ?1)",
                            params![json],
                        ) {
                            crate::log_error!("Failed to write state: {}", e);
                        }
                    }
                }
                WriteCommand::Shutdown => {
                    break;
                }
            }
        }

        let _ = conn.pragma_update(None, "wal_checkpoint", "TRUNCATE");
    }

    pub fn app_data_dir(&self) -> &PathBuf {
        &self.app_data_dir
    }

    pub fn luts_dir(&self) -> PathBuf {
        self.app_data_dir.join("assets").join("luts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.app_data_dir.join("logs")
    }

    pub fn preset_file(&self) -> PathBuf {
        self.app_data_dir.join(PRESET_FILE)
    }

    /// Built-in presets merged with `presets.json` when it exists. A broken
    /// file is logged and ignored.
    pub fn load_presets(&self) -> PresetStore {
        let path = self.preset_file();
        if !path.exists() {
            return PresetStore::builtin();
        }

        match PresetStore::load_from_file(&path) {
            Ok(store) => {
                crate::log_info!("Loaded presets from {}", path.display());
                store
            }
            Err(e) => {
                crate::log_error!("Failed to load presets from {}: {:#}", path.display(), e);
                PresetStore::builtin()
            }
        }
    }

    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        f(&self.state.read())
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut AppState),
    {
        let mut state = self.state.write();
        f(&mut state);
        let _ = self.write_sender.send(WriteCommand::Update(state.clone()));
    }

    pub fn list_lut_files(&self) -> Vec<String> {
        let mut files = Vec::new();

        if let Ok(entries) = std::fs::read_dir(self.luts_dir()) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("png") {
                    if let Some(name) = path.file_name() {
                        files.push(name.to_string_lossy().to_string());
                    }
                }
            }
        }

        files.sort();
        files
    }
}

impl Drop for StateManager {
    fn drop(&mut self) {
        let _ = self.write_sender.send(WriteCommand::Shutdown);
        if let Some(handle) = self.write_thread.take() {
            let _ = handle.join();
        }
    }
}
