//! Config file discovery, loading, and environment variable overlay.

use crate::{AutopatchConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided it replaces the local override. A missing CLI
/// path is still returned so that loading reports it instead of silently
/// falling back.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/autopatch/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("autopatch/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("autopatch.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file and overlay the keys it sets onto `config`.
pub fn apply_file(config: &mut AutopatchConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Overlay keys present in `contents`; absent keys keep their current value.
fn apply_toml(config: &mut AutopatchConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| parse_err(e.to_string()))?;

    if let Some(session) = table.get("session").and_then(|v| v.as_table()) {
        if let Some(v) = session.get("client_name").and_then(|v| v.as_str()) {
            config.session.client_name = v.to_string();
        }
        if let Some(v) = session.get("connect_interval") {
            let secs = v
                .as_float()
                .or_else(|| v.as_integer().map(|i| i as f64))
                .ok_or_else(|| parse_err("session.connect_interval must be a number".into()))?;
            if secs < 0.0 {
                return Err(parse_err("session.connect_interval must not be negative".into()));
            }
            config.session.connect_interval = secs;
        }
        if let Some(v) = session.get("max_attempts").and_then(|v| v.as_integer()) {
            config.session.max_attempts = u32::try_from(v)
                .map_err(|_| parse_err(format!("session.max_attempts out of range: {v}")))?;
        }
        if let Some(v) = session.get("poll_interval_ms").and_then(|v| v.as_integer()) {
            config.session.poll_interval_ms = u64::try_from(v)
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| parse_err(format!("session.poll_interval_ms out of range: {v}")))?;
        }
    }

    if let Some(matching) = table.get("matching").and_then(|v| v.as_table()) {
        if let Some(v) = matching.get("pattern_file").and_then(|v| v.as_str()) {
            config.matching.pattern_file = Some(expand_path(v));
        }
        if let Some(v) = matching.get("exact").and_then(|v| v.as_bool()) {
            config.matching.exact = v;
        }
    }

    if let Some(logging) = table.get("logging").and_then(|v| v.as_table()) {
        if let Some(v) = logging.get("level").and_then(|v| v.as_str()) {
            config.logging.level = v.to_string();
        }
    }

    Ok(())
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut AutopatchConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

fn apply_overrides_from(
    config: &mut AutopatchConfig,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(v) = lookup("AUTOPATCH_CLIENT_NAME") {
        config.session.client_name = v;
        sources.env_overrides.push("AUTOPATCH_CLIENT_NAME".to_string());
    }
    if let Some(v) = lookup("AUTOPATCH_CONNECT_INTERVAL") {
        if let Ok(secs) = v.parse::<f64>() {
            if secs >= 0.0 {
                config.session.connect_interval = secs;
                sources.env_overrides.push("AUTOPATCH_CONNECT_INTERVAL".to_string());
            }
        }
    }
    if let Some(v) = lookup("AUTOPATCH_MAX_ATTEMPTS") {
        if let Ok(n) = v.parse() {
            config.session.max_attempts = n;
            sources.env_overrides.push("AUTOPATCH_MAX_ATTEMPTS".to_string());
        }
    }
    if let Some(v) = lookup("AUTOPATCH_PATTERN_FILE") {
        config.matching.pattern_file = Some(expand_path(&v));
        sources.env_overrides.push("AUTOPATCH_PATTERN_FILE".to_string());
    }
    if let Some(v) = lookup("AUTOPATCH_EXACT_MATCHING") {
        config.matching.exact = matches!(v.as_str(), "1" | "true" | "yes" | "on");
        sources.env_overrides.push("AUTOPATCH_EXACT_MATCHING".to_string());
    }
    if let Some(v) = lookup("AUTOPATCH_LOG_LEVEL") {
        config.logging.level = v;
        sources.env_overrides.push("AUTOPATCH_LOG_LEVEL".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_cli_override_is_always_listed() {
        let files = discover_config_files_with_override(Some(Path::new("/nonexistent/ap.toml")));
        assert_eq!(files.last(), Some(&PathBuf::from("/nonexistent/ap.toml")));
    }

    #[test]
    fn test_parse_partial_toml_keeps_other_values() {
        let mut config = AutopatchConfig::default();
        config.session.max_attempts = 7;

        let toml = r#"
[session]
client_name = "rig"
"#;
        apply_toml(&mut config, toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.session.client_name, "rig");
        assert_eq!(config.session.max_attempts, 7);
        assert_eq!(config.session.connect_interval, 3.0);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[session]
client_name = "studio"
connect_interval = 1
max_attempts = 5
poll_interval_ms = 250

[matching]
pattern_file = "/etc/autopatch/patterns"
exact = true

[logging]
level = "debug"
"#;
        let mut config = AutopatchConfig::default();
        apply_toml(&mut config, toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.session.client_name, "studio");
        assert_eq!(config.session.connect_interval, 1.0);
        assert_eq!(config.session.max_attempts, 5);
        assert_eq!(config.session.poll_interval_ms, 250);
        assert_eq!(
            config.matching.pattern_file,
            Some(PathBuf::from("/etc/autopatch/patterns"))
        );
        assert!(config.matching.exact);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_rejects_negative_interval() {
        let mut config = AutopatchConfig::default();
        let err = apply_toml(
            &mut config,
            "[session]\nconnect_interval = -2.5\n",
            Path::new("bad.toml"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let mut config = AutopatchConfig::default();
        let err = apply_toml(
            &mut config,
            "[session]\npoll_interval_ms = 0\n",
            Path::new("zero.toml"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
        assert_eq!(config.session.poll_interval_ms, 1000);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let mut config = AutopatchConfig::default();
        let err = apply_toml(&mut config, "[session", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let mut config = AutopatchConfig::default();
        let err = apply_file(&mut config, Path::new("/nonexistent/autopatch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_env_overrides_are_recorded() {
        let env: HashMap<&str, &str> = [
            ("AUTOPATCH_CLIENT_NAME", "from-env"),
            ("AUTOPATCH_MAX_ATTEMPTS", "3"),
            ("AUTOPATCH_CONNECT_INTERVAL", "not-a-number"),
            ("AUTOPATCH_EXACT_MATCHING", "yes"),
        ]
        .into_iter()
        .collect();

        let mut config = AutopatchConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_from(&mut config, &mut sources, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.session.client_name, "from-env");
        assert_eq!(config.session.max_attempts, 3);
        assert_eq!(config.session.connect_interval, 3.0);
        assert!(config.matching.exact);
        assert_eq!(
            sources.env_overrides,
            vec![
                "AUTOPATCH_CLIENT_NAME",
                "AUTOPATCH_MAX_ATTEMPTS",
                "AUTOPATCH_EXACT_MATCHING"
            ]
        );
    }
}
