extern crate peersync;
extern crate fern;

#[macro_use]
extern crate log;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use peersync::config;
use peersync::coordinator::{Coordinator, CoordinatorConfig};
use peersync::fingerprint::SeahashFingerprint;

fn main() {
    let args = config::parse_args();

    let level = match args.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                record.target(),
                record.level(),
                unix_timestamp(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()
        .expect("could not set up logging");

    info!("peersyncd - {}", env!("CARGO_PKG_VERSION"));

    let config = CoordinatorConfig {
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.port),
        peer_addr: SocketAddr::new(args.peer_ip, args.port),
        share_root: args.share,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        sock_num: args.sock_num,
    };

    let coordinator = Coordinator::new(config, SeahashFingerprint)
        .expect("could not bind receiver socket");

    coordinator.bootstrap();
}

/// Seconds-since-epoch stamp for log lines.
fn unix_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
