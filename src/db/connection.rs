use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const WORKER_THREAD_NAME: &str = "wiith-db";

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

/// Owns the worker thread; stopping it on drop lets queued jobs finish first.
struct Worker {
    jobs: mpsc::Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };

        if self.jobs.send(Message::Stop).is_err() {
            warn!("database worker already gone at shutdown");
        }

        // Inside a runtime the join must not hold up an async worker thread.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || join_worker(handle));
            }
            Err(_) => join_worker(handle),
        }
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("database worker panicked");
    }
}

/// SQLite store with a single connection living on its own thread. Async
/// callers hand closures to [`Database::execute`] and await the reply.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Opens (or creates) the database and brings its schema up to date
    /// before returning.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create database directory {}", dir.display()))?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Message>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let worker_path = path.clone();

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || {
                let mut conn = match open_connection(&worker_path) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                serve_jobs(&mut conn, jobs_rx);
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("database worker exited during startup"))??;
        info!("Database ready at {}", path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: jobs_tx,
                thread: Mutex::new(Some(thread)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `job` on the worker thread.
    pub async fn execute<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let wrapped: Job = Box::new(move |conn| {
            // Caller may have been cancelled; the job's effects still stand.
            let _ = reply_tx.send(job(conn));
        });

        self.worker
            .jobs
            .send(Message::Run(wrapped))
            .map_err(|_| anyhow!("database worker is not running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the job"))?
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;

    // WAL is best effort; some filesystems refuse it.
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("could not enable WAL journal: {err}");
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    run_migrations(&mut conn).context("failed to run database migrations")?;

    Ok(conn)
}

fn serve_jobs(conn: &mut Connection, jobs: mpsc::Receiver<Message>) {
    let mut served: u64 = 0;
    for message in jobs {
        match message {
            Message::Run(job) => {
                job(conn);
                served += 1;
            }
            Message::Stop => break,
        }
    }
    debug!("database worker stopping after {served} jobs");
}
