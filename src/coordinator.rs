//! The Coordinator: the single-consumer broker that owns the
//! `ReceiveRegistry` and routes commands between the Scanner, Sender pool
//! and Receiver pool.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::constants::DEFAULT_INIT_SOCK_NUM;
use crate::fingerprint::FingerprintSource;
use crate::receiver::ReceiverPool;
use crate::registry::ReceiveRegistry;
use crate::scanner::Scanner;
use crate::sender::SenderPool;

/// Messages that flow into the Coordinator's main queue from the Scanner
/// and the Receiver pool.
pub enum CoordinatorCommand {
    /// A `CONT` handshake packet arrived on the Receiver pool.
    RecvCont { sock_num: u32, is_echo: bool },
    /// A `SEND` opened a new inbound transfer for `path`.
    RecvSend { path: PathBuf, block_count: u32 },
    /// A `VRFY` settled `block_index` of `path`.
    RecvVrfy { path: PathBuf, block_index: u32 },
    /// The Scanner observed a local change at `path` that should be
    /// transmitted to the peer.
    SendFile { path: PathBuf },
}

/// Tunables the Coordinator needs at startup; CLI/config resolve into
/// this (see `config.rs`). `bind_addr` and `peer_addr` are independent
/// socket addresses -- in production both sides conventionally use the
/// same port number, but nothing below assumes that; a same-host test
/// harness binds each side to its own port.
pub struct CoordinatorConfig {
    pub bind_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub share_root: PathBuf,
    pub poll_interval: Duration,
    pub sock_num: u32,
}

/// Owns the `ReceiveRegistry` and runs the main command loop on the
/// calling thread. `bootstrap` spawns Receiver, Sender and Scanner (in
/// that order, so both pools have at least one worker running before
/// local changes can be detected) and then blocks forever driving the
/// main queue.
pub struct Coordinator<F> {
    config: CoordinatorConfig,
    registry: Arc<ReceiveRegistry>,
    fingerprint_source: F,
    receiver_pool: Arc<ReceiverPool>,
    sender_pool: Arc<SenderPool>,
    main_rx: std::sync::mpsc::Receiver<CoordinatorCommand>,
    main_tx: Sender<CoordinatorCommand>,
}

impl<F> Coordinator<F>
where
    F: FingerprintSource + Clone + Send + 'static,
{
    /// Bind the Receiver pool's listening socket and build a Coordinator
    /// ready to `bootstrap`. Does not yet spawn any threads.
    pub fn new(config: CoordinatorConfig, fingerprint_source: F) -> std::io::Result<Self> {
        let (main_tx, main_rx) = mpsc::channel();
        let registry = Arc::new(ReceiveRegistry::new());

        let receiver_pool = ReceiverPool::bind(
            config.bind_addr,
            config.share_root.clone(),
            Arc::clone(&registry),
            main_tx.clone(),
        )?;

        let sender_pool = SenderPool::new(config.peer_addr, config.share_root.clone());

        Ok(Coordinator {
            config,
            registry,
            fingerprint_source,
            receiver_pool,
            sender_pool,
            main_rx,
            main_tx,
        })
    }

    /// Spawn Receiver, Sender and Scanner workers (Scanner last, after the
    /// other two pools have at least their initial workers running),
    /// negotiate the handshake, then run the main loop. Never returns in
    /// steady state.
    pub fn bootstrap(self) -> ! {
        log::info!(
            "coordinator: bound {}, peer {}, share {}",
            self.config.bind_addr,
            self.config.peer_addr,
            self.config.share_root.display()
        );

        ReceiverPool::grow_to(&self.receiver_pool, DEFAULT_INIT_SOCK_NUM);
        SenderPool::grow_to(&self.sender_pool, DEFAULT_INIT_SOCK_NUM);

        let scanner = Scanner::new(
            self.config.share_root.clone(),
            self.config.poll_interval,
            Arc::clone(&self.registry),
            self.fingerprint_source.clone(),
            self.main_tx.clone(),
        );
        scanner.spawn();

        log::debug!(
            "coordinator: announcing sock_num={} to peer",
            self.config.sock_num
        );
        self.sender_pool.enqueue_cont(self.config.sock_num, false);

        self.run()
    }

    fn run(self) -> ! {
        loop {
            match self.main_rx.recv() {
                Ok(CoordinatorCommand::RecvCont { sock_num, is_echo }) => {
                    self.handle_recv_cont(sock_num, is_echo)
                }
                Ok(CoordinatorCommand::RecvSend { path, block_count }) => {
                    self.handle_recv_send(path, block_count)
                }
                Ok(CoordinatorCommand::RecvVrfy { path, block_index }) => {
                    self.handle_recv_vrfy(path, block_index)
                }
                Ok(CoordinatorCommand::SendFile { path }) => self.handle_send_file(path),
                Err(_) => {
                    // Every sender end (scanner, receiver workers, our own
                    // clone) would have to be dropped for this to fire;
                    // it never happens while this thread is alive, since
                    // `self.main_tx` stays in scope for the loop's
                    // lifetime.
                    unreachable!("coordinator main queue has no remaining senders");
                }
            }
        }
    }

    /// Grow both pools to (at least) `sock_num` workers, idempotently.
    /// Reply with a non-echo ack unless this was itself an echo,
    /// completing the handshake in at most one round trip.
    fn handle_recv_cont(&self, sock_num: u32, is_echo: bool) {
        log::debug!("coordinator: recv_cont(sock_num={}, is_echo={})", sock_num, is_echo);
        ReceiverPool::grow_to(&self.receiver_pool, sock_num);
        SenderPool::grow_to(&self.sender_pool, sock_num);

        if !is_echo {
            self.sender_pool.enqueue_cont(self.config.sock_num, true);
        }
    }

    /// The registry entry is installed by the receiver worker itself (it
    /// must exist before any `PAKG` can be routed to a `FileWriter`), so
    /// the Coordinator's role here is purely observational logging.
    fn handle_recv_send(&self, path: PathBuf, block_count: u32) {
        log::debug!(
            "coordinator: recv_send({}, block_count={})",
            path.display(),
            block_count
        );
    }

    /// Record the settled block; once every block of `path` has settled,
    /// fingerprint the finished file and transition the registry entry to
    /// `Settled` outside the registry lock -- registry operations never
    /// hold the lock during I/O.
    fn handle_recv_vrfy(&self, path: PathBuf, block_index: u32) {
        let settled = self.registry.recv_vrfy(&path, block_index);
        if !settled {
            return;
        }

        let abs_path = self.config.share_root.join(&path);
        match self.fingerprint_source.fingerprint(&abs_path) {
            Ok(fp) => {
                log::info!("coordinator: {} settled", path.display());
                self.registry.settle(&path, fp);
            }
            Err(e) => {
                log::warn!(
                    "coordinator: could not fingerprint {} after settle: {}",
                    path.display(),
                    e
                );
                self.registry.remove(&path);
            }
        }
    }

    /// Forward to the Sender pool's work queue.
    fn handle_send_file(&self, path: PathBuf) {
        log::debug!("coordinator: send_file({})", path.display());
        if let Err(e) = self.sender_pool.enqueue_file(path.clone()) {
            log::warn!("coordinator: could not enqueue {}: {}", path.display(), e);
        }
    }
}
