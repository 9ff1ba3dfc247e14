//! Finding config files, merging them, and the `MARQUEE_*` overlay.

use std::env;
use std::path::{Path, PathBuf};

use crate::{ConfigError, MarqueeConfig};

const SYSTEM_CONFIG: &str = "/etc/marquee/config.toml";
const USER_CONFIG: &str = "marquee/config.toml";
const LOCAL_CONFIG: &str = "marquee.toml";

/// What went into a loaded config, for the startup log.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Files merged, lowest precedence first.
    pub files: Vec<PathBuf>,
    /// `MARQUEE_*` (and `RUST_LOG`) variables that were applied.
    pub env_overrides: Vec<String>,
}

/// Existing config files in merge order: system, user, then either
/// `explicit` or `./marquee.toml`.
pub fn config_search_path(explicit: Option<&Path>) -> Vec<PathBuf> {
    let user = directories::BaseDirs::new().map(|dirs| dirs.config_dir().join(USER_CONFIG));
    let last = match explicit {
        Some(path) if path.exists() => path.to_path_buf(),
        _ => PathBuf::from(LOCAL_CONFIG),
    };

    [Some(PathBuf::from(SYSTEM_CONFIG)), user, Some(last)]
        .into_iter()
        .flatten()
        .filter(|path| path.exists())
        .collect()
}

fn parse_error(path: &Path, err: toml::de::Error) -> ConfigError {
    ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// One config file as an untyped table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    text.parse().map_err(|e| parse_error(path, e))
}

/// Fold `overlay` into `base`. Tables merge key by key; everything else,
/// arrays of tables such as `[[outputs]]` included, is replaced whole.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) =
            (base.get_mut(&key), &value)
        {
            merge_tables(existing, incoming.clone());
            continue;
        }
        base.insert(key, value);
    }
}

/// Type the merged table, filling gaps from the compiled defaults.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<MarqueeConfig, ConfigError> {
    let mut config: MarqueeConfig = toml::Value::Table(table)
        .try_into()
        .map_err(|e| parse_error(origin, e))?;

    let paths = &mut config.infra.paths;
    paths.media_dir = expand_path(&paths.media_dir.to_string_lossy());
    paths.command_socket = expand_path(&paths.command_socket.to_string_lossy());
    paths.log_file = paths
        .log_file
        .as_ref()
        .map(|file| expand_path(&file.to_string_lossy()));
    Ok(config)
}

/// Apply `MARQUEE_*` overrides from the process environment. Returns the
/// names of the variables that took effect.
pub fn apply_env_overrides(config: &mut MarqueeConfig) -> Vec<String> {
    overlay_env(config, |key| env::var(key).ok())
}

fn overlay_env(config: &mut MarqueeConfig, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut applied = Vec::new();
    let mut take = |key: &'static str| {
        let value = lookup(key)?;
        applied.push(key.to_string());
        Some(value)
    };

    if let Some(v) = take("MARQUEE_MEDIA_DIR") {
        config.infra.paths.media_dir = expand_path(&v);
    }
    if let Some(v) = take("MARQUEE_COMMAND_SOCKET") {
        config.infra.paths.command_socket = expand_path(&v);
    }
    if let Some(v) = take("MARQUEE_MODE") {
        config.show.settings.mode = v;
    }
    if let Some(v) = take("MARQUEE_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
    }
    // RUST_LOG wins over the config file and MARQUEE_LOG_LEVEL.
    if let Some(v) = take("RUST_LOG") {
        config.infra.telemetry.log_level = v;
    }
    drop(take);

    // Typed values only count as applied when they parse.
    if let Some(ms) = lookup("MARQUEE_BRIDGING_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        config.show.settings.bridging_interval_ms = Some(ms);
        applied.push("MARQUEE_BRIDGING_INTERVAL_MS".to_string());
    }
    if let Some(flag) = lookup("MARQUEE_ALWAYS_TRANSMIT").and_then(|v| parse_bool(&v)) {
        config.show.settings.always_transmit = flag;
        applied.push("MARQUEE_ALWAYS_TRANSMIT".to_string());
    }
    if let Some(flag) = lookup("MARQUEE_DAEMONIZE").and_then(|v| parse_bool(&v)) {
        config.infra.daemon.daemonize = flag;
        applied.push("MARQUEE_DAEMONIZE".to_string());
    }
    if let Some(priority) = lookup("MARQUEE_REALTIME_PRIORITY").and_then(|v| v.parse().ok()) {
        config.infra.daemon.realtime_priority = priority;
        applied.push("MARQUEE_REALTIME_PRIORITY".to_string());
    }

    applied
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Resolve a leading `~/` against the home directory and a leading `$VAR`
/// against the environment. Anything unresolvable is kept as written.
pub fn expand_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        return match directories::BaseDirs::new() {
            Some(dirs) => dirs.home_dir().join(rest),
            None => PathBuf::from(raw),
        };
    }

    if let Some(var) = raw.strip_prefix('$') {
        let (name, rest) = var.split_once('/').unwrap_or((var, ""));
        if let Ok(value) = env::var(name) {
            let base = PathBuf::from(value);
            return if rest.is_empty() { base } else { base.join(rest) };
        }
    }

    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(text: &str) -> MarqueeConfig {
        let table: toml::Table = text.parse().unwrap();
        from_table(table, Path::new("test.toml")).unwrap()
    }

    #[test]
    fn test_home_relative_paths_expand() {
        let path = expand_path("~/shows/intro");
        assert!(!path.starts_with("~"));
        assert!(path.ends_with("shows/intro"));
    }

    #[test]
    fn test_plain_paths_untouched() {
        assert_eq!(expand_path("/srv/show"), PathBuf::from("/srv/show"));
        assert_eq!(
            expand_path("$MARQUEE_SURELY_UNSET_VAR/x"),
            PathBuf::from("$MARQUEE_SURELY_UNSET_VAR/x")
        );
    }

    #[test]
    fn test_explicit_path_replaces_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("bench.toml");
        std::fs::write(&explicit, "").unwrap();

        let found = config_search_path(Some(&explicit));
        assert_eq!(found.last(), Some(&explicit));
        assert!(!found.contains(&PathBuf::from(LOCAL_CONFIG)));
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = parse("");
        assert_eq!(config.show.settings.mode, "player");
        assert_eq!(config.show.settings.bridging_interval_ms, None);
        assert!(!config.show.settings.always_transmit);
        assert_eq!(config.infra.daemon.realtime_priority, 99);
        assert_eq!(config.infra.bind.bridge, "0.0.0.0:5568");
        assert!(config.show.outputs.is_empty());
    }

    #[test]
    fn test_every_section_parses() {
        let config = parse(
            r#"
[paths]
media_dir = "/srv/show"
command_socket = "/run/marquee.sock"
log_file = "/var/log/marquee.log"

[bind]
bridge = "127.0.0.1:5568"

[telemetry]
log_level = "marquee=debug"

[daemon]
daemonize = true
realtime_priority = 0

[show]
mode = "bridge"
channel_count = 1024
bridging_interval_ms = 20
always_transmit = true

[[outputs]]
kind = "udp"
target = "10.0.0.5:9000"
start_channel = 513
channel_count = 512

[[bridge.universes]]
universe = 1
start_channel = 1

[[schedule]]
playlist = "evening"
start = "18:00"
end = "23:30"
days = ["weekdays"]
stop = "now"

[[gpio]]
pin = 17
rising = { command = "start", playlist = "doorbell" }
"#,
        );

        let infra = &config.infra;
        assert_eq!(infra.paths.media_dir, PathBuf::from("/srv/show"));
        assert_eq!(infra.paths.log_file, Some(PathBuf::from("/var/log/marquee.log")));
        assert_eq!(infra.bind.bridge, "127.0.0.1:5568");
        assert_eq!(infra.bind.control, "0.0.0.0:32320");
        assert_eq!(infra.telemetry.log_level, "marquee=debug");
        assert!(infra.daemon.daemonize);
        assert_eq!(infra.daemon.realtime_priority, 0);

        let show = &config.show;
        assert_eq!(show.settings.mode, "bridge");
        assert_eq!(show.settings.channel_count, 1024);
        assert_eq!(show.settings.bridging_interval_ms, Some(20));
        assert!(show.settings.always_transmit);
        assert_eq!(show.outputs[0].start_channel, 513);
        assert_eq!(show.bridge.universes[0].size, 512);
        assert_eq!(show.schedule[0].stop, "now");
        assert!(show.schedule[0].enabled);
        assert!(!show.schedule[0].repeat);

        let rising = show.gpio[0].rising.as_ref().unwrap();
        assert_eq!(rising.get("playlist").and_then(|v| v.as_str()), Some("doorbell"));
        assert!(show.gpio[0].falling.is_none());
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[show\nmode = ").unwrap();
        assert!(matches!(load_table(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            load_table(&dir.path().join("absent.toml")),
            Err(ConfigError::FileRead { .. })
        ));
    }

    #[test]
    fn test_later_file_overrides_single_keys() {
        let mut base: toml::Table = "[show]\nmode = \"player\"\nalways_transmit = true\n"
            .parse()
            .unwrap();
        let overlay: toml::Table = "[show]\nmode = \"master\"\n".parse().unwrap();

        merge_tables(&mut base, overlay);
        let config = from_table(base, Path::new("merged")).unwrap();
        assert_eq!(config.show.settings.mode, "master");
        assert!(config.show.settings.always_transmit);
    }

    #[test]
    fn test_output_arrays_replace_wholesale() {
        let mut base: toml::Table =
            "[[outputs]]\nkind = \"log\"\n[[outputs]]\nkind = \"log\"\n".parse().unwrap();
        let overlay: toml::Table = "[[outputs]]\nkind = \"udp\"\ntarget = \"127.0.0.1:9\"\n"
            .parse()
            .unwrap();

        merge_tables(&mut base, overlay);
        let config = from_table(base, Path::new("merged")).unwrap();
        assert_eq!(config.show.outputs.len(), 1);
        assert_eq!(config.show.outputs[0].kind, "udp");
    }

    #[test]
    fn test_env_overlay_skips_unparsable_values() {
        let vars: HashMap<&str, &str> = [
            ("MARQUEE_MODE", "remote"),
            ("MARQUEE_BRIDGING_INTERVAL_MS", "25"),
            ("MARQUEE_ALWAYS_TRANSMIT", "yes"),
            ("MARQUEE_DAEMONIZE", "not-a-bool"),
        ]
        .into_iter()
        .collect();

        let mut config = MarqueeConfig::default();
        let applied = overlay_env(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.show.settings.mode, "remote");
        assert_eq!(config.show.settings.bridging_interval_ms, Some(25));
        assert!(config.show.settings.always_transmit);
        assert!(!config.infra.daemon.daemonize);
        assert_eq!(
            applied,
            vec![
                "MARQUEE_MODE",
                "MARQUEE_BRIDGING_INTERVAL_MS",
                "MARQUEE_ALWAYS_TRANSMIT"
            ]
        );
    }

    #[test]
    fn test_rust_log_beats_marquee_log_level() {
        let vars: HashMap<&str, &str> =
            [("MARQUEE_LOG_LEVEL", "warn"), ("RUST_LOG", "debug")].into_iter().collect();
        let mut config = MarqueeConfig::default();
        overlay_env(&mut config, |key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.infra.telemetry.log_level, "debug");
    }
}
