//! The Weft node
//!
//! Owns the datastore, the object-store handle, the loaded threads, the
//! delivery queues, and the background flush worker. Collaborators that live
//! outside the crate (the embedded object-store network node and the cafe
//! HTTP client) are injected at open time behind their traits.

use std::collections::HashMap;
use std::sync::Arc;

use rand::RngCore;
use rusqlite::Connection;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::data::{self, Contact, Notification, ThreadRow};
use crate::files::{self, AddFileConfig, Keys, Mill};
use crate::object::{ObjectNode, ObjectStore};
use crate::queue::{CafeInbox, CafeOutbox, CafeTransport, ThreadsOutbox};
use crate::security::{keypair_from_secret, Account};
use crate::tasks;
use crate::thread::{invite, Thread, ThreadContext, ThreadRegistry, WireEnvelope};

use super::config::NodeConfig;
use super::error::NodeError;
use super::events::{NodeChannels, Update, UpdateType};

/// Node lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Uninitialised,
    Initialised,
    Starting,
    Started,
    Stopping,
    Stopped,
}

/// A Weft node
pub struct Node {
    config: Arc<NodeConfig>,
    account: Arc<Account>,
    db: Arc<Mutex<Connection>>,
    object: Arc<dyn ObjectStore>,
    transport: Arc<dyn CafeTransport>,
    threads: ThreadRegistry,
    channels: NodeChannels,
    state: Arc<RwLock<NodeState>>,
    running: Arc<RwLock<bool>>,
    tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
    online_tx: watch::Sender<bool>,
    online_rx: watch::Receiver<bool>,
    threads_outbox: Arc<ThreadsOutbox>,
    cafe_outbox: Arc<CafeOutbox>,
    cafe_inbox: Arc<CafeInbox>,
}

impl Node {
    /// Initialise a new repo: directory layout, datastore, account record.
    ///
    /// Fails with `Conflict` if the repo is already initialised.
    pub fn init_repo(config: &NodeConfig, account: &Account) -> Result<(), NodeError> {
        let db_file = data::datastore_dir(&config.repo_path).join(data::start::DB_FILE);
        if db_file.exists() {
            return Err(NodeError::Conflict("repo already initialised".to_string()));
        }
        std::fs::create_dir_all(config.repo_path.join("logs"))
            .map_err(|e| NodeError::Store(e.to_string()))?;

        data::remove_stale_lock(&config.repo_path).map_err(|e| NodeError::Store(e.to_string()))?;
        let conn = data::start_db(&config.repo_path).map_err(|e| NodeError::Store(e.to_string()))?;
        data::configure_account(&conn, account, data::current_timestamp())?;
        drop(conn);
        data::remove_lock(&config.repo_path);

        info!(repo = %config.repo_path.display(), peer = %account.peer_id(), "repo initialised");
        Ok(())
    }

    /// Run all repo migrations, including schema-breaking ones.
    ///
    /// Minor migrations run on every open; major ones only through this
    /// explicit entry point.
    pub fn migrate_repo(config: &NodeConfig) -> Result<(), NodeError> {
        data::remove_stale_lock(&config.repo_path).map_err(|e| NodeError::Store(e.to_string()))?;
        let conn = data::start_db(&config.repo_path).map_err(|e| NodeError::Store(e.to_string()))?;
        data::schema::run_major_migrations(&conn)?;
        drop(conn);
        data::remove_lock(&config.repo_path);
        Ok(())
    }

    /// Open an initialised repo.
    ///
    /// Stale lockfiles left by an unclean stop are removed first; a lock held
    /// by a live process refuses the open.
    pub fn open(
        config: NodeConfig,
        object: Arc<dyn ObjectStore>,
        transport: Arc<dyn CafeTransport>,
    ) -> Result<Self, NodeError> {
        data::remove_stale_lock(&config.repo_path).map_err(|e| NodeError::Store(e.to_string()))?;
        let conn = data::start_db(&config.repo_path).map_err(|e| NodeError::Store(e.to_string()))?;

        let account = data::get_account(&conn)?
            .ok_or_else(|| NodeError::InvalidInput("repo has no account".to_string()))?;
        let account = Arc::new(account);
        let config = Arc::new(config);
        let db = Arc::new(Mutex::new(conn));
        let threads: ThreadRegistry = Arc::new(RwLock::new(HashMap::new()));
        let channels = NodeChannels::default();
        let (online_tx, online_rx) = watch::channel(false);

        let threads_outbox = Arc::new(ThreadsOutbox::new(
            db.clone(),
            object.clone(),
            config.clone(),
        ));
        let cafe_outbox = Arc::new(CafeOutbox::new(
            db.clone(),
            object.clone(),
            account.clone(),
            transport.clone(),
            config.clone(),
        ));
        let cafe_inbox = Arc::new(CafeInbox::new(db.clone(), transport.clone(), threads.clone()));

        Ok(Self {
            config,
            account,
            db,
            object,
            transport,
            threads,
            channels,
            state: Arc::new(RwLock::new(NodeState::Initialised)),
            running: Arc::new(RwLock::new(false)),
            tasks: Arc::new(RwLock::new(Vec::new())),
            online_tx,
            online_rx,
            threads_outbox,
            cafe_outbox,
            cafe_inbox,
        })
    }

    // ============ Lifecycle ============

    /// Start the node: load threads, wire the engine, go online, spawn the
    /// periodic flush. Restarting a stopped node is allowed.
    pub async fn start(&self) -> Result<(), NodeError> {
        {
            let mut state = self.state.write().await;
            match *state {
                NodeState::Initialised | NodeState::Stopped => {}
                NodeState::Started | NodeState::Starting => return Err(NodeError::Started),
                NodeState::Stopping | NodeState::Uninitialised => return Err(NodeError::Stopped),
            }
            *state = NodeState::Starting;
        }
        info!(peer = %self.account.peer_id(), "starting node");

        *self.running.write().await = true;
        self.load_threads().await?;

        // The object-store node comes up offline; the transition to online
        // (and everything wired behind it) completes asynchronously
        let state = self.state.clone();
        let running = self.running.clone();
        let online_tx = self.online_tx.clone();
        let object = self.object.clone();
        let threads = self.threads.clone();
        let peer_id = self.account.peer_id();
        let flush_period = self.config.effective_flush_interval();
        let threads_outbox = self.threads_outbox.clone();
        let cafe_outbox = self.cafe_outbox.clone();
        let cafe_inbox = self.cafe_inbox.clone();
        let tasks = self.tasks.clone();

        let starter = tokio::spawn(async move {
            // Inbound envelope worker on our own topic
            let rx = object.subscribe(&peer_id);
            let inbound = tokio::spawn(run_inbound_worker(rx, threads));

            // Periodic queue flush
            let flush = tokio::spawn(tasks::run_flush_task(
                threads_outbox,
                cafe_outbox,
                cafe_inbox,
                running,
                flush_period,
            ));

            {
                let mut tasks = tasks.write().await;
                tasks.push(inbound);
                tasks.push(flush);
            }

            *state.write().await = NodeState::Started;
            let _ = online_tx.send(true);
            info!(peer = %peer_id, "node is online");
        });
        self.tasks.write().await.push(starter);

        Ok(())
    }

    /// Stop the node: tear down workers, go offline, drop the lockfile.
    pub async fn stop(&self) -> Result<(), NodeError> {
        {
            let mut state = self.state.write().await;
            match *state {
                NodeState::Started | NodeState::Starting => {}
                _ => return Err(NodeError::Stopped),
            }
            *state = NodeState::Stopping;
        }
        info!(peer = %self.account.peer_id(), "stopping node");

        *self.running.write().await = false;
        {
            let mut tasks = self.tasks.write().await;
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        let _ = self.online_tx.send(false);

        data::remove_lock(&self.config.repo_path);
        *self.state.write().await = NodeState::Stopped;
        info!("node is stopped");
        Ok(())
    }

    /// Current lifecycle state
    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    /// Whether the node has gone online
    pub fn online(&self) -> bool {
        *self.online_rx.borrow()
    }

    /// A watch channel that flips true once the node is online
    pub fn online_ch(&self) -> watch::Receiver<bool> {
        self.online_rx.clone()
    }

    fn require_online(&self) -> Result<(), NodeError> {
        if self.online() {
            Ok(())
        } else {
            Err(NodeError::Offline)
        }
    }

    // ============ Accessors ============

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn peer_id(&self) -> String {
        self.account.peer_id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn channels(&self) -> &NodeChannels {
        &self.channels
    }

    /// Drain all queues immediately (tests and foreground syncs)
    pub async fn flush(&self) {
        self.threads_outbox.flush().await;
        self.cafe_outbox.flush().await;
        self.cafe_inbox.check_messages().await;
    }

    // ============ Threads ============

    /// Create (or adopt) a thread. `sk` is generated when absent; `join`
    /// commits the initial JOIN block.
    pub async fn add_thread(
        &self,
        name: &str,
        sk: Option<[u8; 32]>,
        join: bool,
    ) -> Result<Arc<Thread>, NodeError> {
        let sk = sk.unwrap_or_else(|| {
            let mut secret = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut secret);
            secret
        });
        let (_, id) = keypair_from_secret(&sk);

        let row = ThreadRow {
            id: id.clone(),
            name: name.to_string(),
            sk: sk.to_vec(),
            head: String::new(),
        };
        {
            let db = self.db.lock().await;
            data::add_thread(&db, &row)?;
        }

        let thread = Arc::new(Thread::new(&row, self.thread_context()));
        self.threads.write().await.insert(id.clone(), thread.clone());

        if join {
            thread.join_initial().await?;
        }

        self.channels.updates.send(Update {
            id: id.clone(),
            name: name.to_string(),
            update_type: UpdateType::ThreadAdded,
        });
        debug!(thread = %id, name = %name, "thread added");
        Ok(thread)
    }

    /// Leave and delete a thread: emits LEAVE, then removes all local
    /// blocks, peers, and notifications for it. Returns the LEAVE hash.
    pub async fn remove_thread(&self, id: &str) -> Result<String, NodeError> {
        self.require_online()?;

        let thread = self
            .thread(id)
            .await
            .ok_or_else(|| NodeError::NotFound(format!("thread {}", id)))?;
        let leave_hash = thread.leave().await?;

        {
            let db = self.db.lock().await;
            // Drop file references held by this thread's blocks; files with
            // no remaining references are garbage-collected
            let blocks = data::list_blocks(&db, id, &[data::BlockType::File], 0, i64::MAX)?;
            for block in &blocks {
                for hash in data::files::list_files_by_target(&db, &block.id)? {
                    if data::remove_file_target(&db, &hash, &block.id)? == 0 {
                        data::delete_file(&db, &hash)?;
                        if let Err(e) = self.object.unpin_path(&hash) {
                            debug!(file = %hash, error = %e, "file unpin failed");
                        }
                    }
                }
            }
            data::delete_blocks_by_thread(&db, id)?;
            data::delete_thread_peers_by_thread(&db, id)?;
            data::delete_notifications_by_subject(&db, id)?;
            data::delete_thread(&db, id)?;
        }
        self.threads.write().await.remove(id);

        self.channels.updates.send(Update {
            id: id.to_string(),
            name: thread.name.clone(),
            update_type: UpdateType::ThreadRemoved,
        });
        info!(thread = %id, "thread removed");
        Ok(leave_hash)
    }

    /// All loaded threads
    pub async fn threads(&self) -> Vec<Arc<Thread>> {
        self.threads.read().await.values().cloned().collect()
    }

    /// A loaded thread by id
    pub async fn thread(&self, id: &str) -> Option<Arc<Thread>> {
        self.threads.read().await.get(id).cloned()
    }

    /// Accept an invite: fetch the sealed envelope, open it, adopt the
    /// thread, replay the inviter's DAG, and emit our JOIN.
    ///
    /// Returns `None` when the thread already exists locally.
    pub async fn accept_invite(
        &self,
        invite_id: &str,
        key: Option<&[u8]>,
    ) -> Result<Option<String>, NodeError> {
        self.require_online()?;

        let sealed = self.object.data_at_path(invite_id)?;
        if let Err(e) = self.object.unpin_path(invite_id) {
            warn!(invite = %invite_id, error = %e, "invite unpin failed");
        }

        let block = invite::open_invite(&self.account, &sealed, key)?;
        let (name, sk) = match &block.payload {
            crate::thread::BlockPayload::Invite { name, sk } => (name.clone(), sk.clone()),
            _ => unreachable!("open_invite checks the type"),
        };
        let sk: [u8; 32] = sk
            .try_into()
            .map_err(|_| NodeError::InvalidThreadBlock("invite carries a bad secret".to_string()))?;

        let (_, thread_id) = keypair_from_secret(&sk);
        if self.thread(&thread_id).await.is_some() {
            debug!(thread = %thread_id, "invite for existing thread, nothing to do");
            return Ok(None);
        }

        let thread = self.add_thread(&name, Some(sk), false).await?;

        // Replay the inviter's view of the DAG behind the invite block
        let invite_hash = crate::object::multihash(&sealed);
        let ancestors = thread.resolve_ancestors(&invite_hash, &block).await?;
        for resolved in ancestors {
            thread.apply_block(&resolved.hash, &resolved.block).await?;
        }
        crate::thread::merge::evaluate_heads(&thread).await?;

        // Everyone already in the thread is about to see our JOIN; no
        // separate welcomes needed
        {
            let db = self.db.lock().await;
            data::welcome_thread_peers(&db, &thread.id)?;
        }

        let hash = thread.join().await?;
        info!(thread = %thread.id, block = %hash, "invite accepted");
        Ok(Some(hash))
    }

    fn thread_context(&self) -> ThreadContext {
        ThreadContext {
            db: self.db.clone(),
            object: self.object.clone(),
            account: self.account.clone(),
            config: self.config.clone(),
            channels: self.channels.clone(),
        }
    }

    async fn load_threads(&self) -> Result<(), NodeError> {
        let rows = {
            let db = self.db.lock().await;
            data::list_threads(&db)?
        };
        let mut threads = self.threads.write().await;
        for row in rows {
            if threads.contains_key(&row.id) {
                continue;
            }
            threads.insert(row.id.clone(), Arc::new(Thread::new(&row, self.thread_context())));
        }
        debug!(count = threads.len(), "threads loaded");
        Ok(())
    }

    // ============ Files ============

    /// Run a payload through a mill and index the result
    pub async fn add_file(
        &self,
        mill: &dyn Mill,
        cfg: &AddFileConfig,
    ) -> Result<data::File, NodeError> {
        let db = self.db.lock().await;
        files::add_file(&db, self.object.as_ref(), mill, cfg)
    }

    /// Compose indexed files into a shareable directory node
    pub async fn add_node_from_files(
        &self,
        items: &[data::File],
    ) -> Result<(ObjectNode, Keys), NodeError> {
        let db = self.db.lock().await;
        files::add_node_from_files(&db, self.object.as_ref(), items)
    }

    /// Fetch and decrypt a file's content
    pub async fn file_data(&self, hash: &str) -> Result<(Vec<u8>, data::File), NodeError> {
        let db = self.db.lock().await;
        files::file_data(&db, self.object.as_ref(), hash)
    }

    // ============ Cafes ============

    /// Register with a cafe, persisting the session
    pub async fn register_cafe(&self, cafe_id: &str) -> Result<data::CafeSession, NodeError> {
        self.require_online()?;
        let session = self
            .transport
            .register(cafe_id, &self.account.peer_id(), self.account.address())
            .map_err(|e| NodeError::Transient(e.to_string()))?;
        {
            let db = self.db.lock().await;
            data::add_or_update_cafe_session(&db, &session)?;
        }
        info!(cafe = %cafe_id, "registered with cafe");
        Ok(session)
    }

    /// Drop a cafe session and its queued requests
    pub async fn deregister_cafe(&self, cafe_id: &str) -> Result<(), NodeError> {
        let db = self.db.lock().await;
        data::delete_cafe_session(&db, cafe_id)?;
        data::delete_cafe_requests_by_cafe(&db, cafe_id)?;
        Ok(())
    }

    // ============ Queries ============

    /// An indexed block by id
    pub async fn block(&self, id: &str) -> Result<Option<data::Block>, NodeError> {
        let db = self.db.lock().await;
        Ok(data::get_block(&db, id)?)
    }

    /// A thread's blocks, newest first, tombstoned rows excluded
    pub async fn blocks(
        &self,
        thread_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<data::Block>, NodeError> {
        let db = self.db.lock().await;
        Ok(data::list_blocks(&db, thread_id, &[], offset, limit)?)
    }

    // ============ Contacts, notifications, profile ============

    pub async fn contact(&self, peer_id: &str) -> Result<Option<Contact>, NodeError> {
        let db = self.db.lock().await;
        Ok(data::get_contact(&db, peer_id)?)
    }

    pub async fn contacts(&self) -> Result<Vec<Contact>, NodeError> {
        let db = self.db.lock().await;
        Ok(data::list_contacts(&db)?)
    }

    pub async fn notifications(&self, offset: i64, limit: i64) -> Result<Vec<Notification>, NodeError> {
        let db = self.db.lock().await;
        Ok(data::list_notifications(&db, offset, limit)?)
    }

    pub async fn set_username(&self, username: &str) -> Result<(), NodeError> {
        let db = self.db.lock().await;
        Ok(data::set_username(&db, username)?)
    }

    pub async fn username(&self) -> Result<Option<String>, NodeError> {
        let db = self.db.lock().await;
        Ok(data::get_username(&db)?)
    }
}

/// Inbound envelope worker: decodes wire envelopes off our topic and hands
/// them to the owning thread. Non-EOF decode failures are surfaced in the
/// log, not swallowed.
async fn run_inbound_worker(
    mut rx: tokio::sync::mpsc::Receiver<Vec<u8>>,
    threads: ThreadRegistry,
) {
    info!("inbound envelope worker started");
    while let Some(bytes) = rx.recv().await {
        let wire = match WireEnvelope::decode(&bytes) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(error = %e, "undecodable inbound envelope");
                continue;
            }
        };

        let thread = {
            let threads = threads.read().await;
            threads.get(&wire.thread_id).cloned()
        };
        let Some(thread) = thread else {
            debug!(thread = %wire.thread_id, "envelope for unknown thread dropped");
            continue;
        };

        match thread.handle_envelope(&wire.ciphertext).await {
            Ok(Some(hash)) => {
                debug!(thread = %thread.id, block = %hash, "inbound block indexed")
            }
            Ok(None) => {}
            Err(NodeError::InvalidThreadBlock(reason)) => {
                debug!(thread = %thread.id, reason = %reason, "invalid inbound block dropped")
            }
            Err(e) => {
                warn!(thread = %thread.id, error = %e, "inbound processing failed")
            }
        }
    }
    info!("inbound envelope worker stopped");
}
