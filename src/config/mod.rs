use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
};

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Default for Config {
    /// Built-in defaults only; no rc file, no environment.
    fn default() -> Self {
        Self { inner: default_map(), config_path: default_config_path() }
    }
}

impl Config {
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        // Read .plainmarkrc if exists
        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(Result::ok) {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((k, v)) = line.split_once('=') {
                        map.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn storage_path(&self) -> PathBuf {
        self.get("STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir().join("storage"))
    }
}

fn is_config_key(k: &str) -> bool {
    // Accept known keys or PLAINMARK_* for forward-compat
    const KEYS: &[&str] = &[
        "STORAGE_PATH",
        "FS_DELAY_MS",
        "RESERVED_FILE",
        "BLOCK_HEADERS",
        "PRETTIFY_MARKDOWN",
        "AUTORUN_DEBOUNCE_MS",
        "DEFERRED_BUDGET_MS",
    ];

    KEYS.contains(&k) || k.starts_with("PLAINMARK_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("plainmark").join(".plainmarkrc")
}

fn default_data_dir() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.data_dir().to_path_buf())
        .unwrap_or_else(|| env::temp_dir())
        .join("plainmark")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    // Paths
    m.insert(
        "STORAGE_PATH".into(),
        default_data_dir().join("storage").to_string_lossy().into_owned(),
    );

    // Numbers
    m.insert("FS_DELAY_MS".into(), "100".into());
    m.insert("AUTORUN_DEBOUNCE_MS".into(), "1000".into());
    m.insert("DEFERRED_BUDGET_MS".into(), "2000".into());

    // Strings
    m.insert("RESERVED_FILE".into(), "testfile.txt".into());

    // Bools as strings
    m.insert("BLOCK_HEADERS".into(), "false".into());
    m.insert("PRETTIFY_MARKDOWN".into(), "true".into());

    m
}
