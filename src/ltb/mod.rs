//! Long-term buffering subsystem (spec §4.F; SPEC_FULL §10.1.1).
//!
//! One Tokio task owns every piece of global state — the instance list, the
//! file counter, and the publishing-in-progress flag — exactly as spec.md
//! requires ("no other thread ever touches..."). Callers never see that
//! state directly; they talk to it over a [`LtbHandle`], which dispatches
//! commands through a bounded `mpsc` channel. "Async dispatch" is a plain
//! `try_send`; "sync dispatch" is a `try_send` paired with a `oneshot`
//! receiver the caller awaits — the realization spec.md §9 asks for.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::transfer::{not_implemented, TransferDriver, TransferJob, VFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u64);

/// The external predicate ANDed into the publish-threshold check. Supplied
/// programmatically — TOML can't express a closure (SPEC_FULL §10.3).
pub type ExtCond = Box<dyn Fn() -> bool + Send + Sync>;

struct Instance {
    pool_path: PathBuf,
    name: String,
    sender: Option<Arc<dyn TransferDriver>>,
}

enum Command {
    AddInstance {
        pool_path: PathBuf,
        name: Option<String>,
        sender: Option<Arc<dyn TransferDriver>>,
        reply: oneshot::Sender<Result<InstanceId>>,
    },
    RemoveInstance {
        id: InstanceId,
        reply: oneshot::Sender<Result<()>>,
    },
    IngestJob {
        id: InstanceId,
        job: TransferJob,
    },
    Publish {
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    ForcePublish {
        reply: oneshot::Sender<Result<()>>,
    },
}

struct State {
    instances: HashMap<InstanceId, Instance>,
    next_id: u64,
    counter: u64,
    publishing: bool,
    threshold: u64,
    ext_cond: Option<ExtCond>,
}

impl State {
    fn should_publish(&self) -> bool {
        if self.publishing {
            return false;
        }
        let ext_ok = self.ext_cond.as_ref().map(|f| f()).unwrap_or(true);
        ext_ok && self.counter >= self.threshold
    }
}

/// A handle to the running LTB worker task. Cheap to clone; every clone
/// talks to the same worker.
#[derive(Clone)]
pub struct LtbHandle {
    tx: mpsc::Sender<Command>,
}

impl LtbHandle {
    /// Spawn the worker task and return a handle to it.
    pub fn spawn(queue_bound: usize, threshold: u64, ext_cond: Option<ExtCond>) -> Self {
        let (tx, rx) = mpsc::channel(queue_bound);
        let self_tx = tx.clone();
        tokio::spawn(async move {
            run(rx, self_tx, threshold, ext_cond).await;
        });
        Self { tx }
    }

    /// Instance create (spec §4.F): synchronously dispatched so the caller
    /// observes the counter update as committed.
    pub async fn create_instance(
        &self,
        pool_path: PathBuf,
        name: Option<String>,
        sender: Option<Arc<dyn TransferDriver>>,
    ) -> Result<InstanceId> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(Command::AddInstance { pool_path, name, sender, reply })
            .map_err(|_| PipelineError::WouldBlock)?;
        rx.await.map_err(|_| PipelineError::TransportFail("ltb worker gone".into()))?
    }

    /// Instance delete (spec §4.F): synchronously dispatched.
    pub async fn delete_instance(&self, id: InstanceId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(Command::RemoveInstance { id, reply })
            .map_err(|_| PipelineError::WouldBlock)?;
        rx.await.map_err(|_| PipelineError::TransportFail("ltb worker gone".into()))?
    }

    /// Per-instance try-send (spec §4.F): asynchronously dispatched, never
    /// blocks the caller.
    pub fn instance_try_send(&self, id: InstanceId, job: TransferJob) -> Result<()> {
        self.tx
            .try_send(Command::IngestJob { id, job })
            .map_err(|_| PipelineError::WouldBlock)
    }

    /// Force-publish (spec §4.F): if a pass is already running, the request
    /// is dropped without invoking the callback (spec.md §9 open question —
    /// not resolved here, just not silently guessed at either).
    pub async fn force_publish(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(Command::ForcePublish { reply })
            .map_err(|_| PipelineError::WouldBlock)?;
        rx.await.map_err(|_| PipelineError::TransportFail("ltb worker gone".into()))?
    }
}

/// A `TransferDriver` backed by one LTB instance — its role as the sender
/// side of the pool (spec §4.F "per-instance try-send ... the instance's
/// role as a transfer driver").
pub struct LtbInstanceSender {
    handle: LtbHandle,
    id: InstanceId,
}

impl LtbInstanceSender {
    pub fn new(handle: LtbHandle, id: InstanceId) -> Self {
        Self { handle, id }
    }
}

#[async_trait::async_trait]
impl TransferDriver for LtbInstanceSender {
    fn try_send(&self, job: TransferJob) -> Result<()> {
        self.handle.instance_try_send(self.id, job)
    }

    async fn send(&self, _job: TransferJob) -> Result<usize> {
        Err(not_implemented("LtbInstanceSender::send"))
    }

    fn try_recv(&self) -> Result<TransferJob> {
        Err(not_implemented("LtbInstanceSender::try_recv"))
    }

    async fn recv(&self) -> Result<TransferJob> {
        Err(not_implemented("LtbInstanceSender::recv"))
    }

    async fn delete(self: Arc<Self>) {
        if let Err(e) = self.handle.delete_instance(self.id).await {
            warn!(error = %e, "failed to remove LTB instance on delete");
        }
    }
}

async fn run(mut rx: mpsc::Receiver<Command>, self_tx: mpsc::Sender<Command>, threshold: u64, ext_cond: Option<ExtCond>) {
    let mut state = State {
        instances: HashMap::new(),
        next_id: 1,
        counter: 0,
        publishing: false,
        threshold,
        ext_cond,
    };

    info!(threshold, "LTB worker started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::AddInstance { pool_path, name, sender, reply } => {
                let result = add_instance(&mut state, pool_path, name, sender);
                let _ = reply.send(result);
            }
            Command::RemoveInstance { id, reply } => {
                let result = remove_instance(&mut state, id);
                let _ = reply.send(result);
            }
            Command::IngestJob { id, job } => {
                ingest_job(&mut state, id, job);
                if state.should_publish() {
                    state.publishing = true;
                    publish_step(&mut state, self_tx.clone(), None).await;
                }
            }
            Command::Publish { reply } => {
                publish_step(&mut state, self_tx.clone(), reply).await;
            }
            Command::ForcePublish { reply } => {
                if state.publishing {
                    // Dropped, per spec.md §9: callback not invoked in this race.
                    drop(reply);
                } else {
                    state.publishing = true;
                    publish_step(&mut state, self_tx.clone(), Some(reply)).await;
                }
            }
        }
    }

    info!("LTB worker shutting down (channel closed)");
}

fn add_instance(
    state: &mut State,
    pool_path: PathBuf,
    name: Option<String>,
    sender: Option<Arc<dyn TransferDriver>>,
) -> Result<InstanceId> {
    if state.instances.values().any(|i| i.pool_path == pool_path) {
        return Err(PipelineError::InvalidArgument("pool path must be unique per instance".into()));
    }
    std::fs::create_dir_all(&pool_path)?;
    let initial = crate::pool::size(&pool_path)? as u64;

    let id = InstanceId(state.next_id);
    state.next_id += 1;
    // Truncated to 8 chars (spec §6) — the name becomes a literal component
    // of the hidden temp filename `.{name}` each ingest writes through.
    let name = crate::config::truncate_name(&name.unwrap_or_else(|| format!("ltb{}", id.0)));
    state.instances.insert(id, Instance { pool_path, name, sender });
    state.counter += initial;
    debug!(instance = id.0, initial, counter = state.counter, "LTB instance added");
    Ok(id)
}

fn remove_instance(state: &mut State, id: InstanceId) -> Result<()> {
    let Some(inst) = state.instances.remove(&id) else {
        return Err(PipelineError::NotFound);
    };
    let current = crate::pool::size(&inst.pool_path).unwrap_or(0) as u64;
    state.counter = state.counter.saturating_sub(current);
    debug!(instance = id.0, counter = state.counter, "LTB instance removed");
    Ok(())
}

/// Open a hidden temp file under the instance's pool dir, copy the source
/// through in small chunks, then commit it via `move_file` (spec §4.F
/// per-instance try-send step).
fn ingest_one(pool_path: &Path, instance_name: &str, mut src: VFile) -> Result<PathBuf> {
    let hidden = pool_path.join(format!(".{instance_name}"));
    {
        let mut dst = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&hidden)?;
        src.seek(SeekFrom::Start(0)).map_err(PipelineError::FsFail)?;
        let mut buf = [0u8; 4096];
        loop {
            let n = src.read(&mut buf).map_err(PipelineError::FsFail)?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n])?;
        }
    }
    crate::pool::move_file(pool_path, &hidden)
}

fn ingest_job(state: &mut State, id: InstanceId, job: TransferJob) {
    let TransferJob { file, on_complete } = job;
    let result = match state.instances.get(&id) {
        None => Err(PipelineError::NotFound),
        Some(inst) => match ingest_one(&inst.pool_path, &inst.name, file) {
            Ok(path) => {
                state.counter += 1;
                debug!(instance = id.0, path = %path.display(), counter = state.counter, "file ingested into pool");
                Ok(path.metadata().map(|m| m.len() as usize).unwrap_or(0))
            }
            Err(e) => {
                warn!(instance = id.0, error = %e, "failed to ingest file into pool");
                Err(e)
            }
        },
    };
    if let Some(cb) = on_complete {
        cb(result);
    }
}

/// One step of the publish-pass state machine (spec §4.F `publish`): send
/// at most one file, then tail-dispatch another `Publish` command so other
/// work can interleave between files.
async fn publish_step(state: &mut State, self_tx: mpsc::Sender<Command>, reply: Option<oneshot::Sender<Result<()>>>) {
    let candidate = state.instances.iter().find_map(|(id, inst)| {
        let sender = inst.sender.clone()?;
        match crate::pool::size(&inst.pool_path) {
            Ok(n) if n > 0 => Some((*id, inst.pool_path.clone(), sender)),
            _ => None,
        }
    });

    let Some((id, pool_path, sender)) = candidate else {
        state.publishing = false;
        if let Some(r) = reply {
            let _ = r.send(Ok(()));
        }
        return;
    };

    let finish_with_error = |state: &mut State, reply: Option<oneshot::Sender<Result<()>>>, e: PipelineError| {
        state.publishing = false;
        if let Some(r) = reply {
            let _ = r.send(Err(e));
        }
    };

    let oldest = match crate::pool::get_oldest(&pool_path) {
        Ok(p) => p,
        Err(e) => return finish_with_error(state, reply, e),
    };
    let data = match std::fs::read(&oldest) {
        Ok(d) => d,
        Err(e) => return finish_with_error(state, reply, e.into()),
    };

    let job = TransferJob::new(VFile::from_filled(data));
    match sender.send(job).await {
        Ok(_) => {
            if let Err(e) = std::fs::remove_file(&oldest) {
                warn!(instance = id.0, error = %e, "failed to unlink published pool file");
            }
            state.counter = state.counter.saturating_sub(1);
            debug!(instance = id.0, counter = state.counter, "file published from pool");
            // Tail-dispatch: let other commands interleave between files.
            if self_tx.try_send(Command::Publish { reply }).is_err() {
                state.publishing = false;
            }
        }
        Err(e) => finish_with_error(state, reply, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingDriver;

    #[tokio::test]
    async fn instance_create_counts_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("00000001"), b"x").unwrap();

        let handle = LtbHandle::spawn(8, 1000, None);
        let id = handle.create_instance(dir.path().to_path_buf(), None, None).await.unwrap();
        // No public counter getter; exercised indirectly via publish below.
        handle.delete_instance(id).await.unwrap();
    }

    #[tokio::test]
    async fn ingest_moves_file_into_pool_and_crosses_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(RecordingDriver::new());
        let handle = LtbHandle::spawn(8, 1, None);
        let id = handle
            .create_instance(dir.path().to_path_buf(), Some("inst".into()), Some(driver.clone()))
            .await
            .unwrap();

        let job = TransferJob::new(VFile::from_filled(b"pack-bytes".to_vec()));
        handle.instance_try_send(id, job).unwrap();

        // Let the worker process the ingest + auto-triggered publish pass.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(crate::pool::size(dir.path()).unwrap(), 0);
        assert_eq!(driver.sent_count(), 1);
    }

    #[tokio::test]
    async fn force_publish_with_no_files_succeeds_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let handle = LtbHandle::spawn(8, 1000, None);
        handle
            .create_instance(dir.path().to_path_buf(), None, None)
            .await
            .unwrap();
        handle.force_publish().await.unwrap();
    }
}
