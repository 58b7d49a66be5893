use std::path::PathBuf;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. In
/// production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Root directory for uploaded frames and finished videos
    /// (default: `data`).
    pub data_dir: PathBuf,
    /// Maximum request body size in bytes, sized for image batches
    /// (default: 100 MiB).
    pub max_upload_bytes: usize,
    /// Frame rate used when a request does not specify one
    /// (default: `15`).
    pub default_fps: u32,
    /// TTF font used for overlay text. When the file is missing the
    /// overlay degrades to boxes only.
    pub overlay_font: PathBuf,
    /// The ffmpeg binary to invoke (default: `ffmpeg`, resolved on PATH).
    pub ffmpeg_bin: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                                                |
    /// |------------------------|--------------------------------------------------------|
    /// | `HOST`                 | `0.0.0.0`                                              |
    /// | `PORT`                 | `8000`                                                 |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`                                |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                                                   |
    /// | `DATA_DIR`             | `data`                                                 |
    /// | `MAX_UPLOAD_BYTES`     | `104857600`                                            |
    /// | `DEFAULT_FPS`          | `15`                                                   |
    /// | `OVERLAY_FONT`         | `/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf`      |
    /// | `FFMPEG_BIN`           | `ffmpeg`                                               |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".into()));

        let max_upload_bytes: usize = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| "104857600".into())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid usize");

        let default_fps: u32 = std::env::var("DEFAULT_FPS")
            .unwrap_or_else(|_| "15".into())
            .parse()
            .expect("DEFAULT_FPS must be a valid u32");

        let overlay_font = PathBuf::from(
            std::env::var("OVERLAY_FONT")
                .unwrap_or_else(|_| "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".into()),
        );

        let ffmpeg_bin = std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".into());

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            data_dir,
            max_upload_bytes,
            default_fps,
            overlay_font,
            ffmpeg_bin,
        }
    }

    /// Directory holding uploaded frames, one subdirectory per session.
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Directory holding finished videos.
    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }
}
