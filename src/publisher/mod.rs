//! Publisher (spec §4.G; SPEC_FULL §10.1.2) — a single process-wide worker
//! task that drains a bounded queue of transfer jobs and executes each as a
//! CoAP PUT with bounded retries.

mod coap;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Notify, OnceCell};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::transfer::{not_implemented, TransferDriver, TransferJob};

/// The remote CoAP resource a `Publisher` sends to.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub host: String,
    pub port: u16,
    pub path: String,
}

struct WorkerJob {
    descriptor: ResourceDescriptor,
    retry_cnt: u32,
    block_size_exp: u8,
    job: TransferJob,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

static WORKER: OnceCell<mpsc::Sender<WorkerJob>> = OnceCell::const_new();

async fn worker_sender(queue_bound: usize) -> mpsc::Sender<WorkerJob> {
    WORKER
        .get_or_init(|| async move {
            let (tx, rx) = mpsc::channel(queue_bound);
            tokio::spawn(worker_loop(rx));
            tx
        })
        .await
        .clone()
}

async fn worker_loop(mut rx: mpsc::Receiver<WorkerJob>) {
    while let Some(wj) = rx.recv().await {
        let payload = wj.job.file.as_bytes();
        let result = send_with_retry(&wj.descriptor, &payload, wj.retry_cnt, wj.block_size_exp).await;

        if result.is_err() {
            warn!(error = ?result, host = wj.descriptor.host, "publish failed after retries");
        } else {
            debug!(bytes = payload.len(), host = wj.descriptor.host, "pack published");
        }

        let remaining = wj.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            wj.notify.notify_waiters();
        }
        wj.job.complete(result);
    }
}

async fn send_with_retry(
    descriptor: &ResourceDescriptor,
    payload: &[u8],
    retry_cnt: u32,
    block_size_exp: u8,
) -> Result<usize> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(PipelineError::FsFail)?;
    let addr: SocketAddr = format!("{}:{}", descriptor.host, descriptor.port)
        .parse()
        .map_err(|_| PipelineError::InvalidArgument("invalid publisher address".into()))?;

    let mut attempts_left = retry_cnt + 1;
    let mut last_err = None;
    while attempts_left > 0 {
        match coap::put_blockwise(&socket, addr, &descriptor.path, payload, block_size_exp).await {
            Ok(n) => return Ok(n),
            Err(e) => {
                last_err = Some(e);
                attempts_left -= 1;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| PipelineError::TransportFail("no attempts were made".into())))
}

/// Front object clients create one of per remote resource; all instances
/// share the single process-wide worker task (spec §4.G: "a single shared
/// worker thread").
pub struct Publisher {
    descriptor: ResourceDescriptor,
    retry_cnt: u32,
    block_size_exp: u8,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
    worker_tx: mpsc::Sender<WorkerJob>,
}

impl Publisher {
    /// `queue_bound` only takes effect the first time any `Publisher` in
    /// the process is constructed — later calls reuse the already-spawned
    /// worker's queue.
    pub async fn new(
        descriptor: ResourceDescriptor,
        retry_cnt: u32,
        queue_bound: usize,
        block_size_exp: u8,
    ) -> Self {
        Self {
            descriptor,
            retry_cnt,
            block_size_exp,
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
            worker_tx: worker_sender(queue_bound).await,
        }
    }
}

#[async_trait]
impl TransferDriver for Publisher {
    /// Increments the in-flight counter, then posts to the worker queue;
    /// on queue-full, decrements back and returns `would-block` (spec
    /// §4.G).
    fn try_send(&self, job: TransferJob) -> Result<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let wj = WorkerJob {
            descriptor: self.descriptor.clone(),
            retry_cnt: self.retry_cnt,
            block_size_exp: self.block_size_exp,
            job,
            in_flight: self.in_flight.clone(),
            notify: self.notify.clone(),
        };
        if self.worker_tx.try_send(wj).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(PipelineError::WouldBlock);
        }
        Ok(())
    }

    /// Enqueue and wait for the worker's terminal result. The sync path
    /// conveys outcome entirely through the return value, so no
    /// completion callback fires (spec §4.H).
    async fn send(&self, mut job: TransferJob) -> Result<usize> {
        job.on_complete = None;
        let (done_tx, done_rx) = oneshot::channel();
        let file = std::mem::replace(&mut job.file, crate::transfer::VFile::new_empty());
        let wrapped = TransferJob::with_callback(file, move |res| {
            let _ = done_tx.send(res);
        });
        self.try_send(wrapped)?;
        done_rx
            .await
            .map_err(|_| PipelineError::TransportFail("publisher worker dropped".into()))?
    }

    fn try_recv(&self) -> Result<TransferJob> {
        Err(not_implemented("Publisher::try_recv"))
    }

    async fn recv(&self) -> Result<TransferJob> {
        Err(not_implemented("Publisher::recv"))
    }

    /// Wait until every in-flight job has completed, then release.
    async fn delete(self: Arc<Self>) {
        loop {
            let notified = self.notify.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
