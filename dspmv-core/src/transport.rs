//! The halo exchange engine (`spec.md` §4.3): pack -> post-recv -> post-send ->
//! wait, as a [`HaloTransport`] capability with two implementations.
//!
//! The split into four methods (rather than one `exchange()` call) exists so
//! the driver can run the internal kernel between `post_send` and `wait_recv`,
//! overlapping communication with local computation as required by
//! `spec.md` §1 and §4.5.
use std::collections::{HashMap, HashSet};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use polling::{Event, Poller};

use crate::cluster::ClusterConfig;
use crate::error::{ResultExt, SystemError, TypedResult};
use crate::sparse::SparseMatrix;

/// Non-blocking pack/post-recv/post-send/wait halo exchange, against the send
/// and receive schedules of a [`SparseMatrix`].
///
/// Implementors own the send/receive buffers and any in-flight connection
/// state; `x` is only ever touched to read the owned block (`pack`) or to
/// scatter received values into the halo block (`wait_recv`).
pub trait HaloTransport {
    /// Gathers values from `x`'s owned block into a send buffer per neighbor.
    fn pack(&mut self, sparse: &SparseMatrix, x: &[f64]) -> TypedResult<()>;
    /// Non-suspending: records which neighbors this exchange still expects to
    /// hear from.
    fn post_recv(&mut self, sparse: &SparseMatrix) -> TypedResult<()>;
    /// Non-suspending: hands the packed buffers off to the transport.
    fn post_send(&mut self, sparse: &SparseMatrix) -> TypedResult<()>;
    /// Blocks until every receive posted by `post_recv` has completed, then
    /// scatters the received values into `x`'s halo block.
    fn wait_recv(&mut self, sparse: &SparseMatrix, x: &mut [f64]) -> TypedResult<()>;
    /// Blocks until every other rank this transport is connected to has also
    /// called `barrier`. One of the two legal suspension points of
    /// `spec.md` §5; used by the synchronous measurement path and by
    /// startup/shutdown, never by the production `SpMV` path.
    fn barrier(&mut self) -> TypedResult<()>;
}

/// In-process transport over `std::sync::mpsc`, used to simulate several
/// ranks' worth of halo exchange inside one test binary. Grounded on the
/// teacher's `core::ipc::channel_pair`, generalized from a single pair to a
/// full mesh of P ranks.
pub struct ThreadHaloTransport {
    rank: usize,
    senders: HashMap<usize, mpsc::Sender<(usize, Vec<f64>)>>,
    receiver: mpsc::Receiver<(usize, Vec<f64>)>,
    send_buffers: HashMap<usize, Vec<f64>>,
    pending_from: HashSet<usize>,
    barrier_senders: HashMap<usize, mpsc::Sender<usize>>,
    barrier_receiver: mpsc::Receiver<usize>,
}

/// Builds a full mesh of `ThreadHaloTransport`s, one per rank. The barrier
/// rendezvous uses its own channel set so a barrier marker can never be
/// mistaken for a halo payload.
pub fn thread_cluster(world_size: usize) -> Vec<ThreadHaloTransport> {
    let (txs, rxs): (Vec<_>, Vec<_>) = (0..world_size).map(|_| mpsc::channel()).unzip();
    let (btxs, brxs): (Vec<_>, Vec<_>) = (0..world_size).map(|_| mpsc::channel()).unzip();
    rxs.into_iter()
        .zip(brxs)
        .enumerate()
        .map(|(rank, (receiver, barrier_receiver))| ThreadHaloTransport {
            rank,
            senders: txs
                .iter()
                .enumerate()
                .filter(|(r, _)| *r != rank)
                .map(|(r, tx)| (r, tx.clone()))
                .collect(),
            receiver,
            send_buffers: HashMap::new(),
            pending_from: HashSet::new(),
            barrier_senders: btxs
                .iter()
                .enumerate()
                .filter(|(r, _)| *r != rank)
                .map(|(r, tx)| (r, tx.clone()))
                .collect(),
            barrier_receiver,
        })
        .collect()
}

impl HaloTransport for ThreadHaloTransport {
    fn pack(&mut self, sparse: &SparseMatrix, x: &[f64]) -> TypedResult<()> {
        self.send_buffers.clear();
        for entry in &sparse.send_schedule {
            let buf = entry.local_indices.iter().map(|&i| x[i]).collect();
            self.send_buffers.insert(entry.neighbor, buf);
        }
        Ok(())
    }

    fn post_recv(&mut self, sparse: &SparseMatrix) -> TypedResult<()> {
        self.pending_from = sparse.recv_schedule.iter().map(|e| e.neighbor).collect();
        Ok(())
    }

    fn post_send(&mut self, sparse: &SparseMatrix) -> TypedResult<()> {
        for entry in &sparse.send_schedule {
            let buf = self.send_buffers.remove(&entry.neighbor).unwrap_or_default();
            let sender = self
                .senders
                .get(&entry.neighbor)
                .ok_or_else(|| anyhow!("no channel to rank {}", entry.neighbor))
                .typ(SystemError::Communication)?;
            sender
                .send((self.rank, buf))
                .map_err(|e| anyhow!("send to rank {} failed: {e}", entry.neighbor))
                .typ(SystemError::Communication)?;
        }
        Ok(())
    }

    fn wait_recv(&mut self, sparse: &SparseMatrix, x: &mut [f64]) -> TypedResult<()> {
        while !self.pending_from.is_empty() {
            let (src, values) = self
                .receiver
                .recv()
                .map_err(|e| anyhow!("receive failed: {e}"))
                .typ(SystemError::Communication)?;
            if !self.pending_from.remove(&src) {
                continue;
            }
            let entry = sparse
                .recv_schedule
                .iter()
                .find(|e| e.neighbor == src)
                .ok_or_else(|| anyhow!("unexpected message from rank {src}"))
                .typ(SystemError::Communication)?;
            for (&idx, &v) in entry.local_indices.iter().zip(&values) {
                x[idx] = v;
            }
        }
        Ok(())
    }

    fn barrier(&mut self) -> TypedResult<()> {
        for sender in self.barrier_senders.values() {
            sender
                .send(self.rank)
                .map_err(|e| anyhow!("barrier send failed: {e}"))
                .typ(SystemError::Communication)?;
        }
        let mut pending: HashSet<usize> = self.barrier_senders.keys().copied().collect();
        while !pending.is_empty() {
            let src = self
                .barrier_receiver
                .recv()
                .map_err(|e| anyhow!("barrier receive failed: {e}"))
                .typ(SystemError::Communication)?;
            pending.remove(&src);
        }
        Ok(())
    }
}

/// Real inter-process transport over TCP. Connections are established once,
/// at construction, and reused for every SpMV iteration; messages are framed
/// with a little-endian `u64` length prefix followed by that many
/// little-endian `f64`s.
///
/// `barrier` only rendezvouses with the ranks this transport is connected
/// to (its `neighbors` at construction), not the full cluster; callers that
/// need a whole-cluster barrier must connect every rank to every other rank.
pub struct TcpHaloTransport {
    streams: HashMap<usize, TcpStream>,
    send_buffers: HashMap<usize, Vec<f64>>,
    pending_from: HashSet<usize>,
}

impl TcpHaloTransport {
    /// Establishes a connection to every rank in `neighbors`: this rank
    /// connects out to higher-numbered neighbors and accepts connections from
    /// lower-numbered ones, which avoids both sides racing to connect to each
    /// other.
    pub fn connect(
        rank: usize,
        cluster: &ClusterConfig,
        neighbors: impl IntoIterator<Item = usize>,
    ) -> TypedResult<Self> {
        let neighbors: HashSet<usize> = neighbors.into_iter().collect();
        let my_addr = cluster.addr_of(rank)?;
        let listener = TcpListener::bind(my_addr)
            .with_context(|| format!("binding {my_addr}"))
            .typ(SystemError::Communication)?;

        let mut streams = HashMap::new();
        for &n in neighbors.iter().filter(|&&n| n > rank) {
            let addr = cluster.addr_of(n)?;
            let mut stream = TcpStream::connect(addr)
                .with_context(|| format!("connecting to rank {n} at {addr}"))
                .typ(SystemError::Communication)?;
            stream.write_all(&(rank as u64).to_le_bytes()).typ(SystemError::Communication)?;
            stream.set_nodelay(true).typ(SystemError::Communication)?;
            streams.insert(n, stream);
        }
        let num_lower = neighbors.iter().filter(|&&n| n < rank).count();
        for _ in 0..num_lower {
            let (mut stream, _) = listener
                .accept()
                .context("accepting neighbor connection")
                .typ(SystemError::Communication)?;
            let mut rank_bytes = [0u8; 8];
            stream.read_exact(&mut rank_bytes).typ(SystemError::Communication)?;
            let peer_rank = u64::from_le_bytes(rank_bytes) as usize;
            stream.set_nodelay(true).typ(SystemError::Communication)?;
            streams.insert(peer_rank, stream);
        }
        for stream in streams.values() {
            stream.set_nonblocking(true).typ(SystemError::Communication)?;
        }

        Ok(Self {
            streams,
            send_buffers: HashMap::new(),
            pending_from: HashSet::new(),
        })
    }

    fn stream_for(&mut self, neighbor: usize) -> TypedResult<&mut TcpStream> {
        self.streams
            .get_mut(&neighbor)
            .ok_or_else(|| anyhow!("no connection to rank {neighbor}"))
            .typ(SystemError::Communication)
    }
}

impl HaloTransport for TcpHaloTransport {
    fn pack(&mut self, sparse: &SparseMatrix, x: &[f64]) -> TypedResult<()> {
        self.send_buffers.clear();
        for entry in &sparse.send_schedule {
            let buf = entry.local_indices.iter().map(|&i| x[i]).collect();
            self.send_buffers.insert(entry.neighbor, buf);
        }
        Ok(())
    }

    fn post_recv(&mut self, sparse: &SparseMatrix) -> TypedResult<()> {
        self.pending_from = sparse.recv_schedule.iter().map(|e| e.neighbor).collect();
        Ok(())
    }

    fn post_send(&mut self, sparse: &SparseMatrix) -> TypedResult<()> {
        for entry in &sparse.send_schedule {
            let values = self.send_buffers.remove(&entry.neighbor).unwrap_or_default();
            let body = bincode::serialize(&values).typ(SystemError::Communication)?;
            let mut frame = (body.len() as u64).to_le_bytes().to_vec();
            frame.extend(body);
            let neighbor = entry.neighbor;
            let stream = self.stream_for(neighbor)?;
            write_all_nonblocking(stream, &frame)?;
        }
        Ok(())
    }

    fn wait_recv(&mut self, sparse: &SparseMatrix, x: &mut [f64]) -> TypedResult<()> {
        while !self.pending_from.is_empty() {
            let pending: Vec<usize> = self.pending_from.iter().copied().collect();
            for src in pending {
                let entry = sparse
                    .recv_schedule
                    .iter()
                    .find(|e| e.neighbor == src)
                    .ok_or_else(|| anyhow!("no schedule entry for rank {src}"))
                    .typ(SystemError::Communication)?;
                let stream = self.stream_for(src)?;
                let mut len_bytes = [0u8; 8];
                if !read_exact_nonblocking(stream, &mut len_bytes)? {
                    continue;
                }
                let len = u64::from_le_bytes(len_bytes) as usize;
                let mut body = vec![0u8; len];
                read_exact_blocking(stream, &mut body)?;
                let values: Vec<f64> = bincode::deserialize(&body).typ(SystemError::Communication)?;
                for (&idx, &v) in entry.local_indices.iter().zip(&values) {
                    x[idx] = v;
                }
                self.pending_from.remove(&src);
            }
        }
        Ok(())
    }

    fn barrier(&mut self) -> TypedResult<()> {
        let neighbors: Vec<usize> = self.streams.keys().copied().collect();
        for &n in &neighbors {
            let stream = self.stream_for(n)?;
            write_all_nonblocking(stream, &[0u8])?;
        }
        for &n in &neighbors {
            let stream = self.stream_for(n)?;
            let mut marker = [0u8; 1];
            read_exact_blocking(stream, &mut marker)?;
        }
        Ok(())
    }
}

fn write_all_nonblocking(stream: &mut TcpStream, mut buf: &[u8]) -> TypedResult<()> {
    let poller = Poller::new().typ(SystemError::Communication)?;
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(anyhow!("connection closed mid-write")).typ(SystemError::Communication),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                wait_ready(&poller, stream, false)?;
            }
            Err(e) => return Err(e).typ(SystemError::Communication),
        }
    }
    Ok(())
}

/// Attempts one non-blocking read of `buf.len()` bytes. Returns `Ok(false)`
/// without blocking if no data is available yet (used to poll whether a
/// neighbor's length prefix has arrived), `Ok(true)` once the read completed.
fn read_exact_nonblocking(stream: &mut TcpStream, buf: &mut [u8]) -> TypedResult<bool> {
    match stream.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e).typ(SystemError::Communication),
    }
}

/// Blocks (via readiness polling, never a blocking syscall) until `buf` is
/// fully read. Used once a message's length prefix is known to have arrived,
/// so the payload is expected imminently.
fn read_exact_blocking(stream: &mut TcpStream, buf: &mut [u8]) -> TypedResult<()> {
    let poller = Poller::new().typ(SystemError::Communication)?;
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(anyhow!("connection closed mid-read")).typ(SystemError::Communication),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                wait_ready(&poller, stream, true)?;
            }
            Err(e) => return Err(e).typ(SystemError::Communication),
        }
    }
    Ok(())
}

fn wait_ready(poller: &Poller, stream: &TcpStream, readable: bool) -> TypedResult<()> {
    let event = if readable {
        Event::readable(0)
    } else {
        Event::writable(0)
    };
    poller
        .add(stream.as_raw_fd(), event)
        .typ(SystemError::Communication)?;
    let mut events = Vec::new();
    poller
        .wait(&mut events, Some(Duration::from_secs(30)))
        .typ(SystemError::Communication)?;
    poller
        .delete(stream.as_raw_fd())
        .typ(SystemError::Communication)?;
    Ok(())
}
