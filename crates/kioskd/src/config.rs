use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Listen address for the HTTP API (default: 127.0.0.1:5001).
    pub listen_addr: String,
    /// Directory holding both SQLite databases.
    pub data_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Advisory embedding target per enrollment; below-target enrollments
    /// still succeed as long as at least one embedding persists.
    pub min_embeddings: usize,
    /// Frame cap applied when a recognition request asks for fast mode.
    pub fast_mode_frames: usize,
    /// Fixed department set, seeded into the queue table at first run.
    pub departments: Vec<String>,
    /// Bearer token for privileged endpoints; `None` leaves them open
    /// (development mode).
    pub admin_token: Option<String>,
}

impl Config {
    /// Load configuration from `KIOSK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("KIOSK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("patient-kiosk")
            });

        let departments = std::env::var("KIOSK_DEPARTMENTS")
            .unwrap_or_else(|_| "Poli Umum,Poli Gigi,IGD".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            listen_addr: std::env::var("KIOSK_LISTEN")
                .unwrap_or_else(|_| "127.0.0.1:5001".to_string()),
            data_dir,
            similarity_threshold: env_f32("KIOSK_SIMILARITY_THRESHOLD", 0.40),
            min_embeddings: env_usize("KIOSK_MIN_EMBEDDINGS", 5),
            fast_mode_frames: env_usize("KIOSK_FAST_MODE_FRAMES", 2),
            departments,
            admin_token: std::env::var("KIOSK_ADMIN_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        }
    }

    /// Path to the patient/queue database.
    pub fn patient_db_path(&self) -> PathBuf {
        self.data_dir.join("clinic.db")
    }

    /// Path to the embedding gallery database.
    pub fn embedding_db_path(&self) -> PathBuf {
        self.data_dir.join("embeddings.db")
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
