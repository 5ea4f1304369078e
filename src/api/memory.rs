//! Simulated remote API
//!
//! An in-process server with changeset capacity limits, server-side
//! deletions, optimistic versioning, scripted failures and a call log.
//! Latency is simulated with an abort hook so cancellation interrupts a
//! request that is "on the wire".

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use super::{ApiError, Capabilities, ClosedSource, RemoteApi};
use crate::cancel::CancelToken;
use crate::data::{Changeset, EditObject, ObjectId, ProcessedObject, Tags, UploadOp};

/// One request received by the simulated server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ApiCall {
    Open { changeset_id: u64 },
    Upload { changeset_id: u64, objects: Vec<ObjectId> },
    Close { changeset_id: u64 },
}

#[derive(Debug, Clone)]
struct ServerChangeset {
    open: bool,
    size: usize,
    tags: Tags,
}

#[derive(Debug, Clone, Copy)]
struct ServerObject {
    version: u64,
    deleted: bool,
}

#[derive(Debug)]
struct ServerState {
    next_changeset_id: u64,
    next_object_id: i64,
    changesets: BTreeMap<u64, ServerChangeset>,
    objects: HashMap<ObjectId, ServerObject>,
    failing_uploads: VecDeque<ApiError>,
    failing_closes: VecDeque<ApiError>,
    calls: Vec<ApiCall>,
}

impl ServerState {
    fn new() -> Self {
        Self {
            next_changeset_id: 1,
            next_object_id: 1,
            changesets: BTreeMap::new(),
            objects: HashMap::new(),
            failing_uploads: VecDeque::new(),
            failing_closes: VecDeque::new(),
            calls: Vec::new(),
        }
    }

    fn insert_object(&mut self, id: ObjectId, object: ServerObject) {
        self.next_object_id = self.next_object_id.max(id.id + 1);
        self.objects.insert(id, object);
    }

    /// Server view of an object; unknown existing objects match the client version.
    fn lookup(&self, object: &EditObject) -> ServerObject {
        self.objects.get(&object.id).copied().unwrap_or(ServerObject {
            version: object.version,
            deleted: false,
        })
    }

    fn validate(&self, object: &EditObject) -> Result<(), ApiError> {
        let op = match object.upload_op() {
            Some(UploadOp::Create) | None => return Ok(()),
            Some(op) => op,
        };
        let current = self.lookup(object);
        if current.deleted {
            return Err(ApiError::ObjectGone {
                object: Some(object.id),
            });
        }
        if current.version != object.version {
            return Err(ApiError::VersionConflict {
                object: object.id,
                local_version: object.version,
                server_version: current.version,
            });
        }
        debug_assert!(matches!(op, UploadOp::Modify | UploadOp::Delete));
        Ok(())
    }

    fn apply(&mut self, object: &EditObject) -> ProcessedObject {
        match object.upload_op() {
            Some(UploadOp::Create) => {
                let new_id = ObjectId::new(object.id.kind, self.next_object_id);
                self.insert_object(
                    new_id,
                    ServerObject {
                        version: 1,
                        deleted: false,
                    },
                );
                ProcessedObject::new(object.id, new_id, 1)
            }
            Some(op) => {
                let version = self.lookup(object).version + 1;
                self.insert_object(
                    object.id,
                    ServerObject {
                        version,
                        deleted: op == UploadOp::Delete,
                    },
                );
                ProcessedObject::new(object.id, object.id, version)
            }
            None => ProcessedObject::skipped(object.id, object.version),
        }
    }
}

/// Simulated transactional server
#[derive(Debug)]
pub struct InMemoryServer {
    capacity: Option<usize>,
    latency: Duration,
    state: Mutex<ServerState>,
}

impl Default for InMemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryServer {
    /// Create a server without capacity limit or latency
    pub fn new() -> Self {
        Self {
            capacity: None,
            latency: Duration::ZERO,
            state: Mutex::new(ServerState::new()),
        }
    }

    /// Limit the number of objects per changeset.
    ///
    /// A batch is accepted while the changeset holds fewer than `capacity`
    /// objects; the server closes the changeset once it reaches the limit.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Delay every request by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Register an object the server knows at `version`
    pub fn with_object(mut self, id: ObjectId, version: u64) -> Self {
        if let Ok(state) = self.state.get_mut() {
            state.insert_object(
                id,
                ServerObject {
                    version,
                    deleted: false,
                },
            );
        }
        self
    }

    /// Register an object already deleted on the server
    pub fn with_deleted(mut self, id: ObjectId, version: u64) -> Self {
        if let Ok(state) = self.state.get_mut() {
            state.insert_object(
                id,
                ServerObject {
                    version,
                    deleted: true,
                },
            );
        }
        self
    }

    /// Make the next upload request fail with `error`
    pub fn fail_next_upload(&self, error: ApiError) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_uploads.push_back(error);
        }
    }

    /// Make the next close request fail with `error`
    pub fn fail_next_close(&self, error: ApiError) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_closes.push_back(error);
        }
    }

    /// Every request received so far, in order
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    pub fn open_calls(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Open { changeset_id } => Some(changeset_id),
                _ => None,
            })
            .collect()
    }

    pub fn upload_calls(&self) -> Vec<(u64, Vec<ObjectId>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Upload {
                    changeset_id,
                    objects,
                } => Some((changeset_id, objects)),
                _ => None,
            })
            .collect()
    }

    pub fn close_calls(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Close { changeset_id } => Some(changeset_id),
                _ => None,
            })
            .collect()
    }

    /// Number of objects stored in a changeset
    pub fn changeset_size(&self, changeset_id: u64) -> Option<usize> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.changesets.get(&changeset_id).map(|cs| cs.size))
    }

    pub fn is_changeset_open(&self, changeset_id: u64) -> Option<bool> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.changesets.get(&changeset_id).map(|cs| cs.open))
    }

    pub fn changeset_tags(&self, changeset_id: u64) -> Option<Tags> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.changesets.get(&changeset_id).map(|cs| cs.tags.clone()))
    }

    /// Server version of an object and whether it is deleted
    pub fn object_state(&self, id: ObjectId) -> Option<(u64, bool)> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.objects.get(&id).map(|o| (o.version, o.deleted)))
    }

    fn state(&self) -> Result<MutexGuard<'_, ServerState>, ApiError> {
        self.state
            .lock()
            .map_err(|_| ApiError::transport("server state poisoned"))
    }

    fn simulate_latency(&self, cancel: &CancelToken) -> Result<(), ApiError> {
        if cancel.is_canceled() {
            return Err(ApiError::Canceled);
        }
        if self.latency.is_zero() {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel::<()>();
        let _registration = cancel.on_cancel(move || {
            let _ = tx.send(());
        });
        match rx.recv_timeout(self.latency) {
            Ok(()) => Err(ApiError::Canceled),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(()),
        }
    }
}

impl RemoteApi for InMemoryServer {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_changeset_size: self.capacity,
        }
    }

    fn open_changeset(&self, tags: &Tags, cancel: &CancelToken) -> Result<Changeset, ApiError> {
        self.simulate_latency(cancel)?;
        let mut state = self.state()?;
        let changeset_id = state.next_changeset_id;
        state.next_changeset_id += 1;
        state.changesets.insert(
            changeset_id,
            ServerChangeset {
                open: true,
                size: 0,
                tags: tags.clone(),
            },
        );
        state.calls.push(ApiCall::Open { changeset_id });
        Ok(Changeset::opened(changeset_id, tags.clone(), Utc::now()))
    }

    fn upload_batch(
        &self,
        changeset: &Changeset,
        objects: &[EditObject],
        cancel: &CancelToken,
    ) -> Result<Vec<ProcessedObject>, ApiError> {
        self.simulate_latency(cancel)?;
        let mut guard = self.state()?;
        let state = &mut *guard;
        state.calls.push(ApiCall::Upload {
            changeset_id: changeset.id,
            objects: objects.iter().map(|o| o.id).collect(),
        });
        if let Some(error) = state.failing_uploads.pop_front() {
            return Err(error);
        }

        let full = ApiError::ChangesetClosed {
            changeset_id: changeset.id,
            origin: ClosedSource::UploadData,
        };
        let stored = state
            .changesets
            .get_mut(&changeset.id)
            .ok_or_else(|| ApiError::transport(format!("unknown changeset {}", changeset.id)))?;
        if !stored.open {
            return Err(full);
        }
        if let Some(capacity) = self.capacity {
            if stored.size >= capacity {
                stored.open = false;
                return Err(full);
            }
        }

        // All or nothing: validate the whole batch before applying any of it.
        for object in objects {
            state.validate(object)?;
        }
        let processed: Vec<ProcessedObject> = objects.iter().map(|o| state.apply(o)).collect();

        if let Some(stored) = state.changesets.get_mut(&changeset.id) {
            stored.size += objects.len();
            if self.capacity.is_some_and(|capacity| stored.size >= capacity) {
                stored.open = false;
            }
        }
        Ok(processed)
    }

    fn close_changeset(&self, changeset: &Changeset, cancel: &CancelToken) -> Result<(), ApiError> {
        self.simulate_latency(cancel)?;
        let mut state = self.state()?;
        state.calls.push(ApiCall::Close {
            changeset_id: changeset.id,
        });
        if let Some(error) = state.failing_closes.pop_front() {
            return Err(error);
        }
        // Closing an already closed changeset is accepted.
        match state.changesets.get_mut(&changeset.id) {
            Some(stored) => {
                stored.open = false;
                Ok(())
            }
            None => Err(ApiError::transport(format!(
                "unknown changeset {}",
                changeset.id
            ))),
        }
    }
}
