//! The Sender pool: a dynamically sized group of worker connections that
//! drain a shared work queue, each opening its own short-lived TCP
//! connection to the peer.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::constants::{CONNECT_BACKOFF_INITIAL_MS, CONNECT_BACKOFF_MAX_MS, PACKET_BYTES};
use crate::error::Result;
use crate::protocol::{self, Code, Value};

/// One unit of work a sender worker picks off the queue.
#[derive(Clone)]
enum WorkItem {
    Cont {
        sock_num: u32,
        is_echo: bool,
    },
    Block {
        path: PathBuf,
        block_index: u32,
        block_count: u32,
        file_size: u64,
    },
}

/// A dynamically sized pool of worker threads, each handing one work item
/// at a time to the peer over its own TCP connection.
pub struct SenderPool {
    peer_addr: SocketAddr,
    share_root: PathBuf,
    work_tx: Sender<WorkItem>,
    work_rx: Mutex<Receiver<WorkItem>>,
    target: Mutex<u32>,
}

impl SenderPool {
    /// Build a pool that will connect to `peer_addr` to transmit files
    /// rooted at `share_root`. No worker threads exist until `grow_to` is
    /// called.
    pub fn new(peer_addr: SocketAddr, share_root: PathBuf) -> Arc<SenderPool> {
        let (work_tx, work_rx) = mpsc::channel();
        Arc::new(SenderPool {
            peer_addr,
            share_root,
            work_tx,
            work_rx: Mutex::new(work_rx),
            target: Mutex::new(0),
        })
    }

    /// Grow the pool's worker count to at least `target`, idempotently --
    /// calling this twice with the same or a smaller value spawns nothing
    /// new.
    pub fn grow_to(pool: &Arc<SenderPool>, target: u32) {
        let mut current = pool.target.lock().expect("sender pool mutex poisoned");
        if target <= *current {
            return;
        }
        let additional = target - *current;
        *current = target;
        drop(current);

        for _ in 0..additional {
            let worker = Arc::clone(pool);
            thread::spawn(move || worker.worker_loop());
        }
    }

    /// Enqueue a single `CONT` handshake packet to be sent on the next
    /// available worker.
    pub fn enqueue_cont(&self, sock_num: u32, is_echo: bool) {
        let _ = self.work_tx.send(WorkItem::Cont { sock_num, is_echo });
    }

    /// Enqueue every block of `rel_path` (relative to the share root) as
    /// an independent work item; blocks of the same file may be dispatched
    /// to different workers in parallel.
    ///
    /// A zero-byte file still gets exactly one block, so the receiver
    /// performs a real `SEND`/`VRFY` round trip instead of silently never
    /// creating the file.
    pub fn enqueue_file(&self, rel_path: PathBuf) -> Result<()> {
        let abs_path = self.share_root.join(&rel_path);
        let file_size = std::fs::metadata(&abs_path)
            .map_err(crate::error::PeerSyncError::LocalFilesystem)?
            .len();

        let block_count = block_count_for(file_size);
        for block_index in 0..block_count {
            let _ = self.work_tx.send(WorkItem::Block {
                path: rel_path.clone(),
                block_index,
                block_count,
                file_size,
            });
        }
        Ok(())
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            let item = {
                let rx = self.work_rx.lock().expect("sender pool mutex poisoned");
                rx.recv()
            };
            let item = match item {
                Ok(item) => item,
                Err(_) => return, // all senders dropped; pool is shutting down
            };

            if let Err(e) = self.handle_item(item.clone()) {
                log::warn!("sender: work item failed, re-queuing: {}", e);
                let _ = self.work_tx.send(item);
            }
        }
    }

    fn handle_item(&self, item: WorkItem) -> Result<()> {
        match item {
            WorkItem::Cont { sock_num, is_echo } => {
                let mut stream = connect_with_backoff(self.peer_addr);
                protocol::write_packet(
                    &mut stream,
                    Code::Cont,
                    &[Value::U32(sock_num), Value::Bool(is_echo)],
                )
            }
            WorkItem::Block {
                path,
                block_index,
                block_count,
                file_size,
            } => self.send_block(&path, block_index, block_count, file_size),
        }
    }

    fn send_block(
        &self,
        rel_path: &PathBuf,
        block_index: u32,
        block_count: u32,
        file_size: u64,
    ) -> Result<()> {
        let block_bytes = crate::constants::BLOCK_BYTES;
        let start = block_index as u64 * block_bytes;
        let end = std::cmp::min(start + block_bytes, file_size);

        let abs_path = self.share_root.join(rel_path);
        let wire_path = rel_path.to_string_lossy().replace('\\', "/");

        let mut stream = connect_with_backoff(self.peer_addr);
        protocol::write_packet(
            &mut stream,
            Code::Send,
            &[
                Value::Str(wire_path),
                Value::U32(block_count),
                Value::U64(file_size),
            ],
        )?;

        let file = File::open(&abs_path).map_err(crate::error::PeerSyncError::LocalFilesystem)?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(start))
            .map_err(crate::error::PeerSyncError::LocalFilesystem)?;

        let mut position = start;
        let mut buf = vec![0u8; PACKET_BYTES];
        while position < end {
            let want = std::cmp::min(PACKET_BYTES as u64, end - position) as usize;
            reader
                .read_exact(&mut buf[..want])
                .map_err(crate::error::PeerSyncError::LocalFilesystem)?;
            protocol::write_packet(
                &mut stream,
                Code::Pakg,
                &[Value::U64(position), Value::Bytes(buf[..want].to_vec())],
            )?;
            position += want as u64;
        }

        protocol::write_packet(&mut stream, Code::Vrfy, &[])
    }
}

fn block_count_for(file_size: u64) -> u32 {
    if file_size == 0 {
        return 1;
    }
    let block_bytes = crate::constants::BLOCK_BYTES;
    ((file_size + block_bytes - 1) / block_bytes) as u32
}

/// Retry `connect` with bounded exponential backoff and jitter. Never
/// gives up; callers suspend here until a connection succeeds.
fn connect_with_backoff(addr: SocketAddr) -> TcpStream {
    let mut backoff = CONNECT_BACKOFF_INITIAL_MS;
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return stream,
            Err(e) => {
                log::debug!("sender: connect to {} failed: {}; retrying in {}ms", addr, e, backoff);
                thread::sleep(Duration::from_millis(jitter(backoff)));
                backoff = std::cmp::min(backoff * 2, CONNECT_BACKOFF_MAX_MS);
            }
        }
    }
}

fn jitter(base_ms: u64) -> u64 {
    use rand::Rng;
    let spread = (base_ms / 5).max(1) as i64; // +/-20%
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    (base_ms as i64 + offset).max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_count_for_empty_file_is_one() {
        assert_eq!(block_count_for(0), 1);
    }

    #[test]
    fn block_count_for_exact_block_boundary() {
        assert_eq!(block_count_for(crate::constants::BLOCK_BYTES), 1);
    }

    #[test]
    fn block_count_for_one_byte_past_boundary() {
        assert_eq!(block_count_for(crate::constants::BLOCK_BYTES + 1), 2);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..10 {
            let j = jitter(1000);
            assert!(j >= 800 && j <= 1200);
        }
    }
}
