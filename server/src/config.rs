//! Server configuration
//!
//! Settings come from two places:
//! - Letter-keyed command-line options with the value attached (`-c16`,
//!   `-j28785`), parsed with clap. Arguments that are not server options are
//!   handed back to the caller untouched.
//! - An init script of `name value` lines, `server-init.cfg` in the home
//!   directory unless `-x` names another one.
//!
//! Every variable is clamped to its legal range when set.

use crate::error::ConfigError;
use clap::{ArgAction, Parser};
use log::{debug, info, warn};
use shared::{DEFAULT_CLIENTS, MAX_CLIENTS, SERVER_PORT};
use std::path::{Path, PathBuf};

/// Highest port the game may use; the discovery port sits one above it.
pub const MAX_SERVER_PORT: u16 = u16::MAX - 1;

/// File name of the default init script.
pub const INIT_SCRIPT: &str = "server-init.cfg";

const OPTION_LETTERS: &[char] = &['u', 'c', 'i', 'j', 'q', 'k', 'x'];

/// Command-line options understood by the server.
#[derive(Parser, Debug, Clone, Default, PartialEq)]
#[command(name = "server", about = "Dedicated game server")]
pub struct ServerOptions {
    /// Upstream bandwidth per client in bytes per second (0 = unlimited)
    #[arg(short = 'u', value_name = "RATE")]
    pub uprate: Option<u32>,

    /// Maximum number of clients
    #[arg(short = 'c', value_name = "N")]
    pub max_clients: Option<usize>,

    /// Address or host name to bind to
    #[arg(short = 'i', value_name = "IP")]
    pub server_ip: Option<String>,

    /// Game port; discovery uses the next one
    #[arg(short = 'j', value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Home directory, where the default init script is looked up
    #[arg(short = 'q', value_name = "DIR")]
    pub home_dir: Option<PathBuf>,

    /// Additional package directory, may be repeated
    #[arg(short = 'k', value_name = "DIR", action = ArgAction::Append)]
    pub package_dirs: Vec<PathBuf>,

    /// Init script to run instead of the default one
    #[arg(short = 'x', value_name = "FILE")]
    pub init_script: Option<PathBuf>,
}

/// Letters whose value is a number; given bare they read as 0.
const NUMERIC_LETTERS: &[char] = &['u', 'c', 'j'];

/// Result of splitting the command line.
#[derive(Debug, Default)]
pub struct ParsedArgs {
    /// Every server option that parsed
    pub options: ServerOptions,
    /// Arguments that are not server options, in order
    pub unknown: Vec<String>,
    /// Server options whose value was rejected; these keep their defaults
    pub rejected: Vec<ConfigError>,
}

fn option_letter(arg: &str) -> Option<char> {
    let mut chars = arg.chars();
    match (chars.next(), chars.next()) {
        (Some('-'), Some(c)) if OPTION_LETTERS.contains(&c) => Some(c),
        _ => None,
    }
}

/// Splits `args` (without the program name) into server options and the
/// arguments the server does not know.
///
/// Each option is checked on its own, so a bad value (`-cmany`, or `-i`
/// with nothing attached) is reported in `rejected` while the remaining
/// options still apply. A numeric letter with no value (`-c`) reads as 0,
/// which selects that variable's default.
pub fn parse_args<I>(args: I) -> ParsedArgs
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = ParsedArgs::default();
    let mut accepted = Vec::new();

    for arg in args {
        let Some(letter) = option_letter(&arg) else {
            parsed.unknown.push(arg);
            continue;
        };
        let arg = if arg.len() == 2 && NUMERIC_LETTERS.contains(&letter) {
            format!("{}0", arg)
        } else {
            arg
        };
        match ServerOptions::try_parse_from(["server", arg.as_str()]) {
            Ok(_) => accepted.push(arg),
            Err(e) => parsed.rejected.push(e.into()),
        }
    }

    match ServerOptions::try_parse_from(std::iter::once("server".to_string()).chain(accepted)) {
        Ok(options) => parsed.options = options,
        Err(e) => parsed.rejected.push(e.into()),
    }
    parsed
}

/// Clamped server variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    max_clients: usize,
    max_dup_clients: usize,
    uprate: u32,
    server_ip: String,
    server_port: u16,
    pub home_dir: Option<PathBuf>,
    pub package_dirs: Vec<PathBuf>,
    pub init_script: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_CLIENTS,
            max_dup_clients: 0,
            uprate: 0,
            server_ip: String::new(),
            server_port: SERVER_PORT,
            home_dir: None,
            package_dirs: Vec::new(),
            init_script: None,
        }
    }
}

impl ServerConfig {
    /// Creates a config holding the default of every variable
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a config from parsed command-line options
    ///
    /// Options that were not given keep their defaults, and every value
    /// given goes through the same clamping setter an init script uses.
    pub fn from_options(options: &ServerOptions) -> Self {
        let mut config = Self::new();
        if let Some(rate) = options.uprate {
            config.set_uprate(rate);
        }
        if let Some(n) = options.max_clients {
            config.set_max_clients(n);
        }
        if let Some(ip) = &options.server_ip {
            config.set_server_ip(ip);
        }
        if let Some(port) = options.server_port {
            config.set_server_port(port);
        }
        config.home_dir = options.home_dir.clone();
        config.package_dirs = options.package_dirs.clone();
        config.init_script = options.init_script.clone();
        config
    }

    /// Client slots offered to players (`maxclients`)
    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// 0 selects the default; anything above the hard ceiling is capped.
    pub fn set_max_clients(&mut self, n: usize) {
        self.max_clients = match n {
            0 => DEFAULT_CLIENTS,
            n => n.min(MAX_CLIENTS),
        };
    }

    /// Configured `maxdupclients`; 0 means no per-address limit of its own
    pub fn max_dup_clients(&self) -> usize {
        self.max_dup_clients
    }

    /// Sets `maxdupclients`, capped at the hard client ceiling
    pub fn set_max_dup_clients(&mut self, n: usize) {
        self.max_dup_clients = n.min(MAX_CLIENTS);
    }

    /// Peers allowed per address; 0 means only the hard ceiling applies.
    pub fn duplicate_peers(&self) -> usize {
        match self.max_dup_clients {
            0 => MAX_CLIENTS,
            n => n,
        }
    }

    /// Listener capacity including slots the game reserves.
    pub fn peer_limit(&self, reserved: usize) -> usize {
        (self.max_clients + reserved).min(MAX_CLIENTS)
    }

    /// Upstream bytes per second per peer, 0 for unlimited
    pub fn uprate(&self) -> u32 {
        self.uprate
    }

    /// Sets `serveruprate`; it applies to peers connecting afterwards
    pub fn set_uprate(&mut self, rate: u32) {
        self.uprate = rate;
    }

    /// Address or host name to bind, empty for every interface
    pub fn server_ip(&self) -> &str {
        &self.server_ip
    }

    /// Sets `serverip`; it is resolved when the listener starts
    pub fn set_server_ip(&mut self, ip: &str) {
        self.server_ip = ip.to_string();
    }

    /// Game port; discovery listens on the port above it
    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// 0 selects the default port.
    pub fn set_server_port(&mut self, port: u16) {
        self.server_port = match port {
            0 => SERVER_PORT,
            port => port.min(MAX_SERVER_PORT),
        };
    }

    /// Sets one variable by name, as an init script line does.
    pub fn apply_var(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        };

        match name {
            "maxclients" => self.set_max_clients(value.parse().map_err(|_| invalid())?),
            "maxdupclients" => self.set_max_dup_clients(value.parse().map_err(|_| invalid())?),
            "serveruprate" => self.set_uprate(value.parse().map_err(|_| invalid())?),
            "serverport" => self.set_server_port(value.parse().map_err(|_| invalid())?),
            "serverip" => self.set_server_ip(value),
            _ => return Err(ConfigError::UnknownVariable(name.to_string())),
        }
        Ok(())
    }

    /// Applies every `name value` line of `script`. Blank lines and `//`
    /// comments are skipped; a bad line is logged and skipped.
    pub fn apply_script(&mut self, script: &str) -> usize {
        let mut applied = 0;
        for (number, line) in script.lines().enumerate() {
            let line = match line.find("//") {
                Some(pos) => &line[..pos],
                None => line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let (name, value) = match line.split_once(char::is_whitespace) {
                Some((name, value)) => (name, value.trim().trim_matches('"')),
                None => (line, ""),
            };
            match self.apply_var(name, value) {
                Ok(()) => applied += 1,
                Err(e) => warn!("init script line {}: {}", number + 1, e),
            }
        }
        applied
    }

    /// Path of the init script that `load_init_script` reads
    pub fn init_script_path(&self) -> PathBuf {
        match (&self.init_script, &self.home_dir) {
            (Some(path), _) => path.clone(),
            (None, Some(home)) => home.join(INIT_SCRIPT),
            (None, None) => PathBuf::from(INIT_SCRIPT),
        }
    }

    /// Runs the init script. A missing default script is skipped, a missing
    /// script given with `-x` is an error.
    pub fn load_init_script(&mut self) -> Result<usize, ConfigError> {
        let path = self.init_script_path();
        match std::fs::read_to_string(&path) {
            Ok(script) => {
                let applied = self.apply_script(&script);
                info!("Executed init script {} ({} settings)", path.display(), applied);
                Ok(applied)
            }
            Err(e) if self.init_script.is_none() && e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No init script at {}", path.display());
                Ok(0)
            }
            Err(source) => Err(ConfigError::InitScript { path, source }),
        }
    }

    pub fn package_dirs(&self) -> impl Iterator<Item = &Path> {
        self.package_dirs.iter().map(PathBuf::as_path)
    }
}
