use std::io::ErrorKind;
use std::net::SocketAddr;
use std::str::FromStr;

use concread::cowcell::asynch::{CowCell, CowCellReadTxn};
use config::{Config, File};
use flexi_logger::filter::{LogLineFilter, LogLineWriter};
use flexi_logger::{DeferredNow, LoggerHandle};
use gethostname::gethostname;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::JausBridgeError;

#[derive(Debug, Deserialize, Eq, PartialEq, Clone, Serialize)]
/// The main config blob for the bridge, write this as a JSON file and load
/// it and it'll make things go. Everything here can also come from the CLI.
pub struct ConfigFile {
    /// The server's hostname as announced in transport endpoints, defaults
    /// to the results of gethostname()
    pub hostname: String,
    /// WebSocket listener port; the UDP socket binds one port above
    pub ws_port: u16,
    /// The IOP node manager, `udp://host:port` or plain `host:port`
    pub iop_uri: String,
    /// Interface to bind the UDP socket to, empty for all interfaces
    pub udp_interface: String,
    /// Directory holding the JSON message schemas
    pub schema_dir: String,
    /// Default is "INFO"
    pub log_level: String,
    /// Restrict per-message traffic logging to these message ids; empty logs
    /// everything once the level is debug
    #[serde(default)]
    pub log_messages: Vec<String>,
    /// Bound of the UDP send queue, zero for unbounded
    pub queue_length: usize,
}

impl ConfigFile {
    /// JSONify the configfile in a pretty way using serde
    pub fn as_json_pretty(&self) -> Result<String, JausBridgeError> {
        serde_json::to_string_pretty(self).map_err(JausBridgeError::from)
    }

    /// The port the UDP transport binds, always one above the WebSocket port
    pub fn udp_port(&self) -> u16 {
        self.ws_port + 1
    }

    /// Get a bindable SocketAddr for the WebSocket listener
    pub fn ws_listener_address(&self) -> Result<SocketAddr, JausBridgeError> {
        format!("0.0.0.0:{}", self.ws_port)
            .parse::<SocketAddr>()
            .map_err(|error| JausBridgeError::StartupError(error.to_string()))
    }

    /// Host and port of the IOP node manager from the configured URI
    pub fn iop_endpoint(&self) -> Result<(String, u16), JausBridgeError> {
        let (_scheme, host, port) = split_uri(&self.iop_uri);
        if host.is_empty() || port < 0 {
            return Err(JausBridgeError::StartupError(format!(
                "can't make sense of IOP URI {:?}",
                self.iop_uri
            )));
        }
        let port = u16::try_from(port).map_err(|_| {
            JausBridgeError::StartupError(format!("IOP port {port} out of range"))
        })?;
        Ok((host, port))
    }

    /// Uses [Self::try_from] and wraps it in a CowCell (moo)
    ///
    /// The default locations are `~/.config/jausbridge.json` and
    /// `./jausbridge.json`.
    pub fn try_as_cowcell(
        config_path: Option<&String>,
    ) -> Result<CowCell<ConfigFile>, std::io::Error> {
        Ok(CowCell::new(ConfigFile::try_from(config_path)?))
    }

    /// Loads the configuration from a given file or from some default
    /// locations; a missing file just means defaults.
    pub fn try_from(config_path: Option<&String>) -> Result<ConfigFile, std::io::Error> {
        let file_locations = match config_path {
            Some(value) => vec![value.to_owned()],
            None => CONFIG_LOCATIONS.iter().map(|x| x.to_string()).collect(),
        };

        // clean up the file paths and filter them by the ones that exist
        let found_files: Vec<String> = file_locations
            .iter()
            .filter_map(|f| {
                let path = shellexpand::tilde(&f).into_owned();
                let filepath = std::path::Path::new(&path);
                match filepath.exists() {
                    false => None,
                    true => Some(path),
                }
            })
            .collect();

        if found_files.is_empty() {
            if config_path.is_some() {
                return Err(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("Configuration file not found, tried: {file_locations:?}"),
                ));
            }
            return Ok(ConfigFile::default());
        }

        for filepath in found_files {
            let builder = Config::builder()
                .add_source(File::new(&filepath, config::FileFormat::Json))
                .add_source(config::Environment::with_prefix("jausbridge"));

            match builder.build() {
                Ok(config) => {
                    eprintln!("Successfully loaded config from: {filepath}");
                    return Ok(ConfigFile::from(config));
                }
                Err(error) => {
                    eprintln!("Couldn't load config from {filepath}: {error:?}");
                }
            }
        }

        Ok(ConfigFile::default())
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        let hostname = gethostname()
            .into_string()
            .unwrap_or_else(|_| "localhost".to_string());
        Self {
            hostname,
            ws_port: 8765,
            // 3794 is the IANA port for JAUS
            iop_uri: "udp://localhost:3794".to_string(),
            udp_interface: String::new(),
            schema_dir: "./schemes".to_string(),
            log_level: "INFO".to_string(),
            log_messages: vec![],
            queue_length: 0,
        }
    }
}

impl std::fmt::Display for ConfigFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "hostname=\"{}\" ws_port={} udp_port={} iop_uri=\"{}\" schema_dir=\"{}\" log_level={}",
            self.hostname,
            self.ws_port,
            self.udp_port(),
            self.iop_uri,
            self.schema_dir,
            self.log_level,
        ))
    }
}

impl From<Config> for ConfigFile {
    fn from(config: Config) -> Self {
        ConfigFile {
            hostname: config.get("hostname").unwrap_or(Self::default().hostname),
            ws_port: config.get("ws_port").unwrap_or(Self::default().ws_port),
            iop_uri: config.get("iop_uri").unwrap_or(Self::default().iop_uri),
            udp_interface: config
                .get("udp_interface")
                .unwrap_or(Self::default().udp_interface),
            schema_dir: config
                .get("schema_dir")
                .unwrap_or(Self::default().schema_dir),
            log_level: config.get("log_level").unwrap_or(Self::default().log_level),
            log_messages: config
                .get("log_messages")
                .unwrap_or(Self::default().log_messages),
            queue_length: config
                .get("queue_length")
                .unwrap_or(Self::default().queue_length),
        }
    }
}

impl FromStr for ConfigFile {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let configfile = File::from_str(input, config::FileFormat::Json);

        let res = Config::builder()
            .add_source(configfile)
            .build()
            .map_err(|e| format!("{e:?}"))?;

        Ok(res.into())
    }
}

lazy_static! {
    static ref CONFIG_LOCATIONS: Vec<&'static str> =
        ["./jausbridge.json", "~/.config/jausbridge.json",].to_vec();
}

/// Split a URI or a bare address into scheme, host and port.
///
/// Accepts `udp://host:port`, `host:port`, bracketed IPv6 forms and the
/// node manager's `SHM` address notation; missing parts come back empty or
/// as port -1.
pub fn split_uri(uri: &str) -> (String, String, i32) {
    if uri.is_empty() {
        return (String::new(), String::new(), -1);
    }
    // the scheme survives into the manual-split fallback, only hostname and
    // port get reassigned there
    let mut scheme = String::new();
    if let Ok(parsed) = Url::parse(uri) {
        scheme = parsed.scheme().to_string();
        if let Some(host) = parsed.host_str() {
            let port = parsed.port().map(i32::from).unwrap_or(-1);
            return (scheme, host.to_string(), port);
        }
    }
    let fields: Vec<&str> = uri.split(':').collect();
    let (hostname, port) = match fields.len() {
        2 => (fields[0].to_string(), fields[1]),
        3 => match fields[0] {
            "SHM" => ("localhost".to_string(), fields[2]),
            _ => (
                fields[1].trim_matches(['[', ']']).to_string(),
                fields[2],
            ),
        },
        4 if fields[1] == "SHM" => ("localhost".to_string(), fields[3]),
        _ => (uri.to_string(), ""),
    };
    let port = port.parse::<i32>().unwrap_or(-1);
    (scheme, hostname, port)
}

/// Fire up flexi_logger the way the bridge likes it
pub async fn setup_logging(
    config: CowCellReadTxn<ConfigFile>,
    debug: bool,
) -> Result<LoggerHandle, std::io::Error> {
    let log_level = match debug {
        true => "debug".to_string(),
        false => config.log_level.to_ascii_lowercase(),
    };

    let logger = flexi_logger::Logger::try_with_str(log_level)
        .map_err(|e| std::io::Error::other(format!("Failed to start logger! {e:?}")))?;

    logger
        .write_mode(flexi_logger::WriteMode::Async)
        .filter(Box::new(LogFilter {
            filters: vec!["tungstenite", "tokio_tungstenite"],
        }))
        .set_palette("b1;3;2;6;5".to_string())
        .start()
        .map_err(|e| std::io::Error::other(format!("Failed to start logger! {e:?}")))
}

pub struct LogFilter {
    filters: Vec<&'static str>,
}

impl LogLineFilter for LogFilter {
    fn write(
        &self,
        now: &mut DeferredNow,
        record: &log::Record,
        log_line_writer: &dyn LogLineWriter,
    ) -> std::io::Result<()> {
        if self
            .filters
            .iter()
            .any(|r| record.metadata().target().starts_with(r))
        {
            return Ok(());
        }
        log_line_writer.write(now, record)?;
        Ok(())
    }
}
