use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::error_handling::types::ProxyError;

const DEFAULT_LINGER: Duration = Duration::from_secs(2);

/// Byte counts of one session, per direction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub attacker_to_backend: u64,
    pub backend_to_attacker: u64,
    /// Completed request/response exchanges, HTTP mode only.
    pub exchanges: u64,
}

/// Live counters shared between relay tasks and the session owner.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    pub attacker_to_backend: AtomicU64,
    pub backend_to_attacker: AtomicU64,
    pub exchanges: AtomicU64,
}

impl TrafficCounters {
    pub fn snapshot(&self) -> RelayStats {
        RelayStats {
            attacker_to_backend: self.attacker_to_backend.load(Ordering::Relaxed),
            backend_to_attacker: self.backend_to_attacker.load(Ordering::Relaxed),
            exchanges: self.exchanges.load(Ordering::Relaxed),
        }
    }
}

/// Raw duplex relay: one task per direction.
///
/// The session ends as soon as one direction ends. A direction that hit
/// end-of-stream half-closes its peer, and the other direction then gets
/// `linger` to drain before it is cut off.
pub struct RawRelay {
    session_id: Uuid,
    counters: Arc<TrafficCounters>,
    linger: Duration,
}

impl RawRelay {
    pub fn new(session_id: Uuid, counters: Arc<TrafficCounters>) -> Self {
        RawRelay {
            session_id,
            counters,
            linger: DEFAULT_LINGER,
        }
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub async fn run<A, B>(&self, attacker: A, backend: B) -> Result<RelayStats, ProxyError>
    where
        A: AsyncRead + AsyncWrite + Send + 'static,
        B: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (attacker_read, attacker_write) = tokio::io::split(attacker);
        let (backend_read, backend_write) = tokio::io::split(backend);

        trace!("[{}] starting raw relay", self.session_id);

        let mut set = JoinSet::new();
        set.spawn(pump(
            self.session_id,
            "A->B",
            attacker_read,
            backend_write,
            Arc::clone(&self.counters),
            true,
        ));
        set.spawn(pump(
            self.session_id,
            "B->A",
            backend_read,
            attacker_write,
            Arc::clone(&self.counters),
            false,
        ));

        let first = set.join_next().await;
        let mut outcome = flatten(first);

        if outcome.is_ok() {
            match tokio::time::timeout(self.linger, set.join_next()).await {
                Ok(second) => {
                    if let Err(e) = flatten(second) {
                        outcome = Err(e);
                    }
                }
                Err(_) => debug!("[{}] peer still open after linger, closing", self.session_id),
            }
        }
        set.shutdown().await;

        trace!("[{}] raw relay completed", self.session_id);
        outcome.map(|_| self.counters.snapshot())
    }
}

fn flatten(joined: Option<Result<Result<(), ProxyError>, tokio::task::JoinError>>) -> Result<(), ProxyError> {
    match joined {
        None => Ok(()),
        Some(Ok(res)) => res,
        Some(Err(e)) if e.is_cancelled() => Ok(()),
        Some(Err(e)) => Err(ProxyError::Io(std::io::Error::other(e))),
    }
}

async fn pump<R, W>(
    session_id: Uuid,
    direction: &'static str,
    mut src: R,
    mut dst: W,
    counters: Arc<TrafficCounters>,
    inbound: bool,
) -> Result<(), ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let counter = if inbound {
        &counters.attacker_to_backend
    } else {
        &counters.backend_to_attacker
    };

    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            trace!("[{}] {} EOF; shutting down writer", session_id, direction);
            // The peer may already be gone.
            let _ = dst.shutdown().await;
            return Ok(());
        }
        dst.write_all(&buf[..n]).await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);

        let preview = &buf[..std::cmp::min(n, 64)];
        trace!(
            "[{}] relayed {} {} bytes: {}{}",
            session_id,
            direction,
            n,
            String::from_utf8_lossy(preview),
            if n > 64 { " ..." } else { "" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[tokio::test]
    async fn bytes_arrive_unmodified_in_both_directions() {
        let (mut attacker, attacker_side) = duplex(1024);
        let (backend_side, mut backend) = duplex(1024);

        let up = payload(100_000, 7);
        let down = payload(70_000, 99);

        let counters = Arc::new(TrafficCounters::default());
        let relay = RawRelay::new(Uuid::new_v4(), Arc::clone(&counters));
        let session = tokio::spawn(async move { relay.run(attacker_side, backend_side).await });

        let up_sent = up.clone();
        let attacker_task = tokio::spawn(async move {
            attacker.write_all(&up_sent).await.unwrap();
            attacker.shutdown().await.unwrap();
            let mut received = Vec::new();
            attacker.read_to_end(&mut received).await.unwrap();
            received
        });

        let down_sent = down.clone();
        let backend_task = tokio::spawn(async move {
            let mut received = Vec::new();
            backend.read_to_end(&mut received).await.unwrap();
            backend.write_all(&down_sent).await.unwrap();
            backend.shutdown().await.unwrap();
            received
        });

        assert_eq!(backend_task.await.unwrap(), up);
        assert_eq!(attacker_task.await.unwrap(), down);

        let stats = session.await.unwrap().unwrap();
        assert_eq!(stats.attacker_to_backend, up.len() as u64);
        assert_eq!(stats.backend_to_attacker, down.len() as u64);
    }

    #[tokio::test]
    async fn session_ends_when_backend_closes() {
        let (mut attacker, attacker_side) = duplex(64);
        let (backend_side, mut backend) = duplex(64);

        let relay = RawRelay::new(Uuid::new_v4(), Arc::new(TrafficCounters::default()))
            .with_linger(Duration::from_millis(50));
        let session = tokio::spawn(async move { relay.run(attacker_side, backend_side).await });

        backend.write_all(b"220 ready\r\n").await.unwrap();
        drop(backend);

        let mut received = Vec::new();
        attacker.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"220 ready\r\n");

        // The attacker never closed, the relay still finishes.
        let stats = session.await.unwrap().unwrap();
        assert_eq!(stats.backend_to_attacker, 11);
        assert_eq!(stats.attacker_to_backend, 0);
    }
}
