//! Rank-to-rank communication.
//!
//! [`Communicator`] is the only view the render path has of other ranks:
//! `rank`, `size`, ordered point-to-point byte messages, and collectives
//! built on top of them. Every collective is blocking and must be entered
//! by every rank, in the same order.
//!
//! Two implementations:
//! - [`SerialCommunicator`]: a single rank talking to itself.
//! - [`ThreadCommunicator`]: `n` ranks in one process, one crossbeam channel
//!   per ordered rank pair. [`LocalCluster`] builds and runs them.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::types::Extents;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// How long a receive may block before the run is declared wedged
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(60);

pub trait Communicator: Send {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Queue `data` for `dest`. Never blocks.
    fn send(&self, dest: usize, data: Vec<u8>) -> PipelineResult<()>;

    /// Next message from `src`, in send order.
    fn recv(&self, src: usize) -> PipelineResult<Vec<u8>>;

    /// Personalized exchange: `outgoing[r]` goes to rank `r`; result `[r]`
    /// came from rank `r`. Sizes travel first, then payloads.
    fn all_to_all(&self, outgoing: Vec<Vec<u8>>) -> PipelineResult<Vec<Vec<u8>>> {
        let size = self.size();
        if outgoing.len() != size {
            return Err(PipelineError::Communication(format!(
                "all_to_all given {} buffers for {} ranks",
                outgoing.len(),
                size
            )));
        }

        for (dest, buf) in outgoing.iter().enumerate() {
            self.send(dest, encode_u64s(&[buf.len() as u64]))?;
        }
        let mut sizes = Vec::with_capacity(size);
        for src in 0..size {
            sizes.push(decode_single_u64(&self.recv(src)?)? as usize);
        }

        for (dest, buf) in outgoing.into_iter().enumerate() {
            self.send(dest, buf)?;
        }
        let mut incoming = Vec::with_capacity(size);
        for (src, expected) in sizes.into_iter().enumerate() {
            let buf = self.recv(src)?;
            if buf.len() != expected {
                return Err(PipelineError::Communication(format!(
                    "rank {} announced {} bytes, sent {}",
                    src,
                    expected,
                    buf.len()
                )));
            }
            incoming.push(buf);
        }
        Ok(incoming)
    }

    /// Everyone's `data`, indexed by rank.
    fn all_gather(&self, data: Vec<u8>) -> PipelineResult<Vec<Vec<u8>>> {
        self.all_to_all(vec![data; self.size()])
    }

    /// Variable-size gather into one buffer at `root`.
    ///
    /// `counts[r]` is the byte count rank `r` contributes; blocks land at
    /// prefix-sum displacements, in rank order. Non-root ranks get `None`.
    fn gatherv(&self, root: usize, data: &[u8], counts: &[usize]) -> PipelineResult<Option<Vec<u8>>> {
        let size = self.size();
        if root >= size || counts.len() != size {
            return Err(PipelineError::Communication(format!(
                "gatherv to root {} with {} counts over {} ranks",
                root,
                counts.len(),
                size
            )));
        }
        if data.len() != counts[self.rank()] {
            return Err(PipelineError::Communication(format!(
                "rank {} contributes {} bytes, {} expected",
                self.rank(),
                data.len(),
                counts[self.rank()]
            )));
        }

        self.send(root, data.to_vec())?;
        if self.rank() != root {
            return Ok(None);
        }

        let displacements = prefix_sum(counts);
        let mut out = vec![0u8; displacements[size]];
        for src in 0..size {
            let block = self.recv(src)?;
            if block.len() != counts[src] {
                return Err(PipelineError::Communication(format!(
                    "rank {} sent {} bytes to gather, {} expected",
                    src,
                    block.len(),
                    counts[src]
                )));
            }
            out[displacements[src]..displacements[src + 1]].copy_from_slice(&block);
        }
        Ok(Some(out))
    }

    /// `root` supplies `data`; every rank returns it.
    fn broadcast(&self, root: usize, data: Option<Vec<u8>>) -> PipelineResult<Vec<u8>> {
        if self.rank() == root {
            let data = data.ok_or_else(|| {
                PipelineError::Communication("broadcast root has no data".to_string())
            })?;
            for dest in (0..self.size()).filter(|&d| d != root) {
                self.send(dest, data.clone())?;
            }
            Ok(data)
        } else {
            self.recv(root)
        }
    }

    /// Element-wise sum across ranks.
    fn all_reduce_sum(&self, values: &[u64]) -> PipelineResult<Vec<u64>> {
        let mut total = vec![0u64; values.len()];
        for buf in self.all_gather(encode_u64s(values))? {
            let theirs = decode_u64s(&buf)?;
            if theirs.len() != total.len() {
                return Err(PipelineError::Communication(format!(
                    "sum over {} values met {}",
                    total.len(),
                    theirs.len()
                )));
            }
            for (t, v) in total.iter_mut().zip(theirs) {
                *t += v;
            }
        }
        Ok(total)
    }

    /// True on every rank when any rank passes true.
    fn all_reduce_any(&self, flag: bool) -> PipelineResult<bool> {
        let flags = self.all_gather(vec![flag as u8])?;
        Ok(flags.iter().any(|f| f.first().copied().unwrap_or(0) != 0))
    }

    /// Union of every rank's extents. Empty extents contribute nothing.
    fn all_reduce_extents(&self, extents: Extents) -> PipelineResult<Extents> {
        let mut merged = Extents::empty();
        for buf in self.all_gather(encode_f64s(&[extents.min, extents.max]))? {
            if buf.len() != 16 {
                return Err(PipelineError::Communication("malformed extents".to_string()));
            }
            let min: f64 = bytemuck::pod_read_unaligned(&buf[0..8]);
            let max: f64 = bytemuck::pod_read_unaligned(&buf[8..16]);
            merged.merge(&Extents { min, max });
        }
        Ok(merged)
    }

    fn barrier(&self) -> PipelineResult<()> {
        self.all_to_all(vec![Vec::new(); self.size()]).map(|_| ())
    }
}

/// `[0, c0, c0+c1, ...]`, length `counts.len() + 1`.
pub fn prefix_sum(counts: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(counts.len() + 1);
    out.push(0);
    for c in counts {
        out.push(out[out.len() - 1] + c);
    }
    out
}

fn encode_u64s(values: &[u64]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

fn encode_f64s(values: &[f64]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

fn decode_u64s(bytes: &[u8]) -> PipelineResult<Vec<u64>> {
    if bytes.len() % 8 != 0 {
        return Err(PipelineError::Communication(format!(
            "{} bytes is not a u64 array",
            bytes.len()
        )));
    }
    Ok(bytes.chunks_exact(8).map(bytemuck::pod_read_unaligned).collect())
}

fn decode_single_u64(bytes: &[u8]) -> PipelineResult<u64> {
    match decode_u64s(bytes)?.as_slice() {
        [v] => Ok(*v),
        other => Err(PipelineError::Communication(format!(
            "expected one size, got {}",
            other.len()
        ))),
    }
}

// ── Single rank ──

/// One rank; sends loop back to itself.
#[derive(Debug)]
pub struct SerialCommunicator {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl SerialCommunicator {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }
}

impl Default for SerialCommunicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dest: usize, data: Vec<u8>) -> PipelineResult<()> {
        if dest != 0 {
            return Err(PipelineError::Communication(format!(
                "serial run has no rank {}",
                dest
            )));
        }
        self.tx
            .send(data)
            .map_err(|e| PipelineError::Communication(e.to_string()))
    }

    fn recv(&self, src: usize) -> PipelineResult<Vec<u8>> {
        if src != 0 {
            return Err(PipelineError::Communication(format!(
                "serial run has no rank {}",
                src
            )));
        }
        // a serial receive with nothing queued can never be satisfied
        self.rx
            .try_recv()
            .map_err(|_| PipelineError::Communication("receive with no pending message".to_string()))
    }
}

// ── In-process cluster ──

/// One rank of a [`LocalCluster`].
#[derive(Debug)]
pub struct ThreadCommunicator {
    rank: usize,
    /// `to[d]` carries this rank's messages to rank `d`
    to: Vec<Sender<Vec<u8>>>,
    /// `from[s]` carries rank `s`'s messages to this rank
    from: Vec<Receiver<Vec<u8>>>,
    timeout: Duration,
}

impl ThreadCommunicator {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.to.len()
    }

    fn send(&self, dest: usize, data: Vec<u8>) -> PipelineResult<()> {
        let tx = self.to.get(dest).ok_or_else(|| {
            PipelineError::Communication(format!("no rank {} in a cluster of {}", dest, self.size()))
        })?;
        tx.send(data).map_err(|_| {
            PipelineError::Communication(format!("rank {} hung up on rank {}", dest, self.rank))
        })
    }

    fn recv(&self, src: usize) -> PipelineResult<Vec<u8>> {
        let rx = self.from.get(src).ok_or_else(|| {
            PipelineError::Communication(format!("no rank {} in a cluster of {}", src, self.size()))
        })?;
        rx.recv_timeout(self.timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => PipelineError::Communication(format!(
                "rank {} waited {:?} for rank {}; not every rank entered the collective",
                self.rank, self.timeout, src
            )),
            RecvTimeoutError::Disconnected => PipelineError::Communication(format!(
                "rank {} left before sending to rank {}",
                src, self.rank
            )),
        })
    }
}

/// Builds `n` connected [`ThreadCommunicator`]s.
pub struct LocalCluster;

impl LocalCluster {
    /// Communicators for ranks `0..n`, in rank order.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(n: usize) -> Vec<ThreadCommunicator> {
        let n = n.max(1);
        // channels[s][d] carries s -> d
        let mut senders: Vec<Vec<Option<Sender<Vec<u8>>>>> = Vec::with_capacity(n);
        let mut receivers: Vec<Vec<Option<Receiver<Vec<u8>>>>> = (0..n).map(|_| vec![None; n]).collect();
        for s in 0..n {
            let mut row = Vec::with_capacity(n);
            for recv_row in receivers.iter_mut() {
                let (tx, rx) = unbounded();
                row.push(Some(tx));
                recv_row[s] = Some(rx);
            }
            senders.push(row);
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (to, from))| ThreadCommunicator {
                rank,
                to: to.into_iter().flatten().collect(),
                from: from.into_iter().flatten().collect(),
                timeout: DEFAULT_RECV_TIMEOUT,
            })
            .collect()
    }

    /// Run `f` on `n` ranks, one thread each; results in rank order.
    pub fn run<T, F>(n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(ThreadCommunicator) -> T + Sync,
    {
        let comms = Self::new(n);
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let f = &f;
                    scope.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(v) => v,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_sum() {
        assert_eq!(prefix_sum(&[3, 0, 2]), vec![0, 3, 3, 5]);
        assert_eq!(prefix_sum(&[]), vec![0]);
    }

    #[test]
    fn test_serial_collectives() {
        let comm = SerialCommunicator::new();
        assert_eq!(comm.all_to_all(vec![vec![1, 2]]).unwrap(), vec![vec![1, 2]]);
        assert_eq!(comm.gatherv(0, &[9], &[1]).unwrap(), Some(vec![9]));
        assert_eq!(comm.all_reduce_sum(&[4, 5]).unwrap(), vec![4, 5]);
        assert!(comm.all_reduce_any(true).unwrap());
        assert_eq!(comm.broadcast(0, Some(vec![7])).unwrap(), vec![7]);
        assert!(comm.recv(0).is_err());
        assert!(comm.send(1, vec![]).is_err());
    }

    #[test]
    fn test_cluster_all_to_all() {
        let results = LocalCluster::run(3, |comm| {
            let me = comm.rank() as u8;
            let out = (0..comm.size()).map(|d| vec![me, d as u8]).collect();
            comm.all_to_all(out).unwrap()
        });
        for (rank, incoming) in results.iter().enumerate() {
            for (src, msg) in incoming.iter().enumerate() {
                assert_eq!(msg, &vec![src as u8, rank as u8]);
            }
        }
    }

    #[test]
    fn test_cluster_gatherv_keeps_rank_order() {
        let results = LocalCluster::run(4, |comm| {
            let counts = [1, 0, 3, 2];
            let data = vec![comm.rank() as u8; counts[comm.rank()]];
            comm.gatherv(2, &data, &counts).unwrap()
        });
        assert_eq!(results[2], Some(vec![0, 2, 2, 2, 3, 3]));
        assert!(results[0].is_none() && results[1].is_none() && results[3].is_none());
    }

    #[test]
    fn test_cluster_reductions() {
        let results = LocalCluster::run(4, |comm| {
            let r = comm.rank() as u64;
            let sum = comm.all_reduce_sum(&[r, 1]).unwrap();
            let any = comm.all_reduce_any(r == 3).unwrap();
            let ext = if r == 1 {
                Extents::empty()
            } else {
                Extents { min: r as f64, max: r as f64 * 2.0 }
            };
            let ext = comm.all_reduce_extents(ext).unwrap();
            let b = comm.broadcast(1, (r == 1).then(|| vec![42])).unwrap();
            comm.barrier().unwrap();
            (sum, any, ext, b)
        });
        for (sum, any, ext, b) in results {
            assert_eq!(sum, vec![6, 4]);
            assert!(any);
            assert_eq!((ext.min, ext.max), (0.0, 6.0));
            assert_eq!(b, vec![42]);
        }
    }

    #[test]
    fn test_missing_participant_times_out() {
        let results = LocalCluster::run(2, |comm| {
            let comm = comm.with_timeout(Duration::from_millis(50));
            if comm.rank() == 0 {
                comm.barrier().map_err(|e| e.to_string())
            } else {
                Ok(())
            }
        });
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }
}
