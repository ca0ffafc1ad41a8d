//! Provides the CLI option parser.
//!
//! Used to parse argv (and, optionally, a TOML overlay file) into an
//! `Args` struct the binary entry point turns into a `CoordinatorConfig`.
//! CLI flags take precedence over the config file, which takes precedence
//! over the built-in defaults.

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{Arg, Command};

use crate::constants::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_PORT, DEFAULT_SHARE, DEFAULT_SOCK_NUM,
};

const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

/// Fully resolved startup configuration.
#[derive(Debug, Clone)]
pub struct Args {
    pub peer_ip: IpAddr,
    pub port: u16,
    pub share: PathBuf,
    pub sock_num: u32,
    pub poll_interval_ms: u64,
    pub verbose: u64,
}

/// The subset of `Args` a config file may override. Every field is
/// optional; an absent key keeps whatever the CLI/default layer already
/// set.
#[derive(Debug, Default, serde::Deserialize)]
struct FileOverlay {
    #[serde(rename = "port")]
    port: Option<u16>,
    #[serde(rename = "share")]
    share: Option<String>,
    #[serde(rename = "sock-num")]
    sock_num: Option<u32>,
    #[serde(rename = "poll-interval-ms")]
    poll_interval_ms: Option<u64>,
}

/// Parse `argv`, apply an optional `--config` TOML overlay, and return the
/// fully resolved `Args`. Panics on malformed input -- startup errors are
/// fatal to the process (see `error.rs`).
pub fn parse_args() -> Args {
    let matches = Command::new("peersyncd")
        .version(VERSION.unwrap_or("unknown"))
        .about("A peer-to-peer folder synchronizer.")
        .arg(
            Arg::new("ip")
                .long("ip")
                .value_name("peer-ip")
                .help("The peer endpoint's IP address.")
                .required(true),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("port")
                .help("The TCP port both endpoints listen on."),
        )
        .arg(
            Arg::new("share")
                .long("share")
                .value_name("dir")
                .help("The folder to synchronize."),
        )
        .arg(
            Arg::new("sock-num")
                .long("sock-num")
                .value_name("n")
                .help("Worker connections this endpoint announces to the peer."),
        )
        .arg(
            Arg::new("poll-interval-ms")
                .long("poll-interval-ms")
                .value_name("ms")
                .help("Scanner polling interval, in milliseconds."),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('C')
                .value_name("path")
                .help("A TOML file overriding the tunables above."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(clap::ArgAction::Count)
                .help("Turn on verbose logging. May be repeated."),
        )
        .get_matches();

    let overlay = match matches.get_one::<String>("config") {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .unwrap_or_else(|e| panic!("could not read config file {}: {}", path, e));
            toml::from_str(&text)
                .unwrap_or_else(|e| panic!("could not parse config file {}: {}", path, e))
        }
        None => FileOverlay::default(),
    };

    let peer_ip = IpAddr::from_str(
        matches
            .get_one::<String>("ip")
            .expect("--ip is required"),
    )
    .expect("--ip must be a valid IP address");

    let port = matches
        .get_one::<String>("port")
        .map(|p| u16::from_str(p).expect("--port must be a valid u16"))
        .or(overlay.port)
        .unwrap_or(DEFAULT_PORT);

    let share = matches
        .get_one::<String>("share")
        .cloned()
        .or(overlay.share)
        .unwrap_or_else(|| DEFAULT_SHARE.to_string());

    let sock_num = matches
        .get_one::<String>("sock-num")
        .map(|n| u32::from_str(n).expect("--sock-num must be a valid u32"))
        .or(overlay.sock_num)
        .unwrap_or(DEFAULT_SOCK_NUM);

    let poll_interval_ms = matches
        .get_one::<String>("poll-interval-ms")
        .map(|ms| u64::from_str(ms).expect("--poll-interval-ms must be a valid u64"))
        .or(overlay.poll_interval_ms)
        .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

    Args {
        peer_ip,
        port,
        share: PathBuf::from(share),
        sock_num,
        poll_interval_ms,
        verbose: matches.get_count("verbose") as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_parses_known_keys_only() {
        let toml_text = r#"
port = 9000
share = "/tmp/share"
sock-num = 8
poll-interval-ms = 250
"#;
        let overlay: FileOverlay = toml::from_str(toml_text).unwrap();
        assert_eq!(overlay.port, Some(9000));
        assert_eq!(overlay.share, Some("/tmp/share".to_string()));
        assert_eq!(overlay.sock_num, Some(8));
        assert_eq!(overlay.poll_interval_ms, Some(250));
    }

    #[test]
    fn overlay_defaults_to_all_none_when_empty() {
        let overlay: FileOverlay = toml::from_str("").unwrap();
        assert!(overlay.port.is_none());
        assert!(overlay.share.is_none());
        assert!(overlay.sock_num.is_none());
        assert!(overlay.poll_interval_ms.is_none());
    }
}
