//! Config schema for `mcvisor.json`: plain `#[derive(Deserialize, Serialize)]`
//! structs with `#[serde(default)]` for every optional field, rather than a
//! hand-rolled parser.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root document for `mcvisor.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McvisorConfig {
    pub minecraft: MinecraftConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinecraftConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub java: JavaConfig,
    /// Whether the initial controller target is `Start` (default) or `Stop`.
    #[serde(default = "default_true")]
    pub autostart: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default, rename = "workingDir")]
    pub working_dir: PathBuf,
    #[serde(default = "default_jar")]
    pub jar: PathBuf,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JavaConfig {
    /// Resolves the child executable to `<home>/bin/java[.exe]`. Falls back
    /// to `JAVA_HOME` at default-filling time, then to a bare `java` found
    /// on `PATH`.
    #[serde(default)]
    pub home: Option<PathBuf>,
    #[serde(default = "default_java_options")]
    pub options: Vec<String>,
}

impl Default for JavaConfig {
    fn default() -> Self {
        Self {
            home: None,
            options: default_java_options(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(
        default = "default_ping_period",
        with = "duration_millis",
        rename = "pingPeriod"
    )]
    pub ping_period: Duration,
    #[serde(
        default = "default_connection_timeout",
        with = "duration_millis",
        rename = "connectionTimeout"
    )]
    pub connection_timeout: Duration,
    #[serde(
        default = "default_response_timeout",
        with = "duration_millis",
        rename = "responseTimeout"
    )]
    pub response_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ping_period: default_ping_period(),
            connection_timeout: default_connection_timeout(),
            response_timeout: default_response_timeout(),
        }
    }
}

/// A string that never prints its value in `Debug`/logs.
#[derive(Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn reveal(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<secret>")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: Secret,
    #[serde(default, rename = "serverId")]
    pub server_id: Option<String>,
    #[serde(default, rename = "channelIds")]
    pub channel_ids: Vec<String>,
    #[serde(default = "default_command_prefix", rename = "commandPrefix")]
    pub command_prefix: String,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub notifications: std::collections::BTreeMap<String, Vec<String>>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: Secret::default(),
            server_id: None,
            channel_ids: Vec::new(),
            command_prefix: default_command_prefix(),
            permissions: PermissionsConfig::default(),
            notifications: std::collections::BTreeMap::new(),
        }
    }
}

/// Allow-lists of opaque Discord snowflakes (`userId`/`roleId`/`channelId`),
/// one list per [`crate::chat::PermissionCategory`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub admin: Vec<String>,
    #[serde(default)]
    pub control: Vec<String>,
    #[serde(default)]
    pub query: Vec<String>,
    #[serde(default)]
    pub public: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_console_level")]
    pub console: String,
    #[serde(default)]
    pub file: Option<FileLoggingConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console: default_console_level(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLoggingConfig {
    pub path: PathBuf,
    #[serde(default = "default_console_level")]
    pub level: String,
    #[serde(default)]
    pub disabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_jar() -> PathBuf {
    PathBuf::from("server.jar")
}

fn default_java_options() -> Vec<String> {
    vec![
        "-XX:+UnlockExperimentalVMOptions".to_string(),
        "-XX:+UseG1GC".to_string(),
        "-XX:G1NewSizePercent=20".to_string(),
        "-XX:G1ReservePercent=20".to_string(),
        "-XX:MaxGCPauseMillis=50".to_string(),
        "-XX:G1HeapRegionSize=32M".to_string(),
    ]
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    25565
}

fn default_ping_period() -> Duration {
    Duration::from_secs(15)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_console_level() -> String {
    "warn".to_string()
}

/// (De)serializes a [`Duration`] as a JSON integer of milliseconds.
mod duration_millis {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl McvisorConfig {
    /// Fills in defaults that depend on the environment or on other already
    /// resolved fields: `JAVA_HOME` fallback, and relative-path resolution
    /// of `workingDir`/`java.home`/`server.jar` against `config_dir`.
    pub fn apply_defaults(&mut self, config_dir: &std::path::Path) {
        let server = &mut self.minecraft.server;
        if server.working_dir.as_os_str().is_empty() {
            server.working_dir = config_dir.to_path_buf();
        } else if server.working_dir.is_relative() {
            server.working_dir = config_dir.join(&server.working_dir);
        }

        if server.jar.is_relative() {
            server.jar = server.working_dir.join(&server.jar);
        }

        let java = &mut self.minecraft.java;
        if java.home.is_none() {
            if let Ok(from_env) = std::env::var("JAVA_HOME") {
                if !from_env.is_empty() {
                    java.home = Some(PathBuf::from(from_env));
                }
            }
        }
    }

    /// `<home>/bin/java[.exe]`, or a bare `java` to be resolved via `PATH`
    /// when no `java.home` was configured.
    pub fn java_executable(&self) -> PathBuf {
        match &self.minecraft.java.home {
            Some(home) => {
                #[cfg(windows)]
                let bin = "java.exe";
                #[cfg(not(windows))]
                let bin = "java";
                home.join("bin").join(bin)
            }
            None => PathBuf::from("java"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{"minecraft":{"server":{"jar":"server.jar"}}}"#
    }

    #[test]
    fn minimal_document_parses_with_defaults() {
        let config: McvisorConfig = serde_json::from_str(minimal_json()).unwrap();
        assert_eq!(config.minecraft.server.network.port, 25565);
        assert!(config.minecraft.autostart);
        assert_eq!(config.discord.command_prefix, "!");
        assert_eq!(config.logging.console, "warn");
    }

    #[test]
    fn ping_period_is_parsed_from_milliseconds() {
        let json = r#"{
            "minecraft": {"server": {"jar": "server.jar", "network": {"pingPeriod": 2500}}}
        }"#;
        let config: McvisorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.minecraft.server.network.ping_period, Duration::from_millis(2500));
    }

    #[test]
    fn secret_debug_never_prints_the_token() {
        let secret = Secret("hunter2".to_string());
        assert_eq!(format!("{secret:?}"), "<secret>");
        assert_eq!(secret.reveal(), "hunter2");
    }

    #[test]
    fn apply_defaults_resolves_relative_paths_against_config_dir() {
        let mut config: McvisorConfig = serde_json::from_str(minimal_json()).unwrap();
        config.apply_defaults(std::path::Path::new("/srv/mc"));
        assert_eq!(config.minecraft.server.working_dir, PathBuf::from("/srv/mc"));
        assert_eq!(config.minecraft.server.jar, PathBuf::from("/srv/mc/server.jar"));
    }

    #[test]
    fn permissions_and_notifications_round_trip() {
        let json = r#"{
            "minecraft": {"server": {"jar": "server.jar"}},
            "discord": {
                "token": "abc",
                "permissions": {"admin": ["42"]},
                "notifications": {"status": ["111"]}
            }
        }"#;
        let config: McvisorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.discord.permissions.admin, vec!["42".to_string()]);
        assert_eq!(
            config.discord.notifications.get("status"),
            Some(&vec!["111".to_string()])
        );
    }
}
