//! The Receiver pool: binds the listening port and runs a fixed-then-grown
//! number of worker threads, each looping `accept -> serve one connection
//! -> accept`.

use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::mpsc::Sender as MpscSender;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::coordinator::CoordinatorCommand;
use crate::error::{PeerSyncError, ProtocolViolation, Result};
use crate::protocol::{self, Code, Value};
use crate::registry::ReceiveRegistry;
use crate::writer::FileWriter;

/// A fixed listening socket served by a grow-only pool of worker threads.
pub struct ReceiverPool {
    listener: TcpListener,
    share_root: PathBuf,
    registry: Arc<ReceiveRegistry>,
    main_tx: MpscSender<CoordinatorCommand>,
    target: Mutex<u32>,
    violations: Mutex<ViolationCounts>,
}

/// Observability counters for steady-state protocol errors, one per
/// `ProtocolViolation` kind.
#[derive(Default, Debug, Clone, Copy)]
pub struct ViolationCounts {
    pub unknown_code: u64,
    pub truncated: u64,
    pub bad_format_char: u64,
}

impl ReceiverPool {
    /// Bind `bind_addr` and return a pool with no worker threads running
    /// yet.
    pub fn bind(
        bind_addr: SocketAddr,
        share_root: PathBuf,
        registry: Arc<ReceiveRegistry>,
        main_tx: MpscSender<CoordinatorCommand>,
    ) -> std::io::Result<Arc<ReceiverPool>> {
        let listener = TcpListener::bind(bind_addr)?;
        Ok(Arc::new(ReceiverPool {
            listener,
            share_root,
            registry,
            main_tx,
            target: Mutex::new(0),
            violations: Mutex::new(ViolationCounts::default()),
        }))
    }

    /// Grow the pool's worker-thread count to at least `target`,
    /// idempotently.
    pub fn grow_to(pool: &Arc<ReceiverPool>, target: u32) {
        let mut current = pool.target.lock().expect("receiver pool mutex poisoned");
        if target <= *current {
            return;
        }
        let additional = target - *current;
        *current = target;
        drop(current);

        for _ in 0..additional {
            let worker = Arc::clone(pool);
            thread::spawn(move || worker.accept_loop());
        }
    }

    /// A snapshot of protocol-violation counters, for observability.
    pub fn violation_counts(&self) -> ViolationCounts {
        *self.violations.lock().expect("receiver pool mutex poisoned")
    }

    fn accept_loop(self: Arc<Self>) {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) => {
                    log::warn!("receiver: accept failed: {}", e);
                    continue;
                }
            };
            log::trace!("receiver: accepted connection from {}", peer);
            if let Err(e) = self.serve_connection(stream) {
                log::debug!("receiver: connection from {} ended: {}", peer, e);
            }
        }
    }

    /// Serve packets on one connection until it closes. A connection
    /// carries either exactly one `CONT`, or one `SEND` followed by zero
    /// or more `PAKG`s and a closing `VRFY`.
    fn serve_connection(&self, stream: TcpStream) -> Result<()> {
        let mut reader = BufReader::new(stream);
        let mut writer: Option<FileWriter> = None;
        // The wire protocol carries no block_index (VRFY is argument-less):
        // a block's connection is identified by the absolute offset of its
        // first PAKG, which falls in exactly one
        // `[i * BLOCK_BYTES, (i+1) * BLOCK_BYTES)` range. A zero-byte file
        // never gets a PAKG, so it defaults to block 0, its only block.
        let mut block_index: u32 = 0;

        loop {
            let packet = match protocol::read_packet(&mut reader) {
                Ok(Some(p)) => p,
                Ok(None) => return Ok(()), // peer closed cleanly
                Err(e) => return self.abort(e, writer),
            };

            match self.dispatch(packet, &mut writer, &mut block_index) {
                Ok(true) => return Ok(()),
                Ok(false) => continue,
                Err(e) => return self.abort(e, writer),
            }
        }
    }

    /// Handle one decoded packet. Returns `Ok(true)` when the connection
    /// is done (CONT and VRFY are each the last packet of their
    /// connection), `Ok(false)` to keep reading.
    fn dispatch(
        &self,
        packet: protocol::Packet,
        writer: &mut Option<FileWriter>,
        block_index: &mut u32,
    ) -> Result<bool> {
        match packet.code {
            Code::Cont => {
                let (sock_num, is_echo) = parse_cont(&packet.args)?;
                let _ = self.main_tx.send(CoordinatorCommand::RecvCont { sock_num, is_echo });
                Ok(true)
            }
            Code::Send => {
                let (path, count, file_size) = parse_send(&packet.args)?;
                let abs_path = self.share_root.join(&path);

                // Install the registry entry only after the writer opens
                // successfully -- otherwise a LocalFilesystem error here
                // would leave the path stuck InFlight with no writer for
                // `abort` to unwind, and the Scanner would never see it
                // again.
                let file_writer = FileWriter::create(&abs_path, file_size)?;
                self.registry.recv_send(&path, count);
                let _ = self
                    .main_tx
                    .send(CoordinatorCommand::RecvSend { path: path.clone(), block_count: count });

                *writer = Some(file_writer);
                *block_index = 0;
                Ok(false)
            }
            Code::Pakg => {
                let (position, data) = parse_pakg(&packet.args)?;
                *block_index = (position / crate::constants::BLOCK_BYTES) as u32;
                match writer.as_mut() {
                    Some(w) => {
                        w.write_at(position, &data)?;
                        Ok(false)
                    }
                    None => Err(PeerSyncError::Protocol(ProtocolViolation::Truncated)),
                }
            }
            Code::Vrfy => {
                if let Some(w) = writer.take() {
                    let path = w.path().to_path_buf();
                    let rel_path = path
                        .strip_prefix(&self.share_root)
                        .unwrap_or(&path)
                        .to_path_buf();
                    w.close()?;
                    let _ = self.main_tx.send(CoordinatorCommand::RecvVrfy {
                        path: rel_path,
                        block_index: *block_index,
                    });
                }
                Ok(true)
            }
        }
    }

    /// Count the violation (if any), tear down a half-written file so the
    /// scanner can re-detect it once the path stabilizes, and propagate
    /// the error.
    fn abort(&self, err: PeerSyncError, writer: Option<FileWriter>) -> Result<()> {
        self.count_violation(&err);
        if let Some(w) = writer {
            let rel_path = w
                .path()
                .strip_prefix(&self.share_root)
                .unwrap_or_else(|_| w.path())
                .to_path_buf();
            drop(w);
            self.registry.remove(&rel_path);
        }
        Err(err)
    }

    fn count_violation(&self, err: &PeerSyncError) {
        if let PeerSyncError::Protocol(violation) = err {
            let mut counts = self.violations.lock().expect("receiver pool mutex poisoned");
            match violation {
                ProtocolViolation::UnknownCode(_) => counts.unknown_code += 1,
                ProtocolViolation::Truncated => counts.truncated += 1,
                ProtocolViolation::BadFormatChar(_) => counts.bad_format_char += 1,
            }
        }
    }
}

fn parse_cont(args: &[Value]) -> Result<(u32, bool)> {
    match args {
        [Value::U32(sock_num), Value::Bool(is_echo)] => Ok((*sock_num, *is_echo)),
        _ => Err(PeerSyncError::Protocol(ProtocolViolation::Truncated)),
    }
}

fn parse_send(args: &[Value]) -> Result<(PathBuf, u32, u64)> {
    match args {
        [Value::Str(path), Value::U32(block_count), Value::U64(file_size)] => {
            Ok((PathBuf::from(path), *block_count, *file_size))
        }
        _ => Err(PeerSyncError::Protocol(ProtocolViolation::Truncated)),
    }
}

fn parse_pakg(args: &[Value]) -> Result<(u64, Vec<u8>)> {
    match args {
        [Value::U64(position), Value::Bytes(data)] => Ok((*position, data.clone())),
        _ => Err(PeerSyncError::Protocol(ProtocolViolation::Truncated)),
    }
}
