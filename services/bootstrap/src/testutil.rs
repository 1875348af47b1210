//! Scripted doubles for the executor and controller seams.
//!
//! Tests drive components against these the same way the node-agent
//! tests drive a mock runtime: outcomes are queued per command (or per
//! node), and every call is recorded for order and absence assertions.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use plinth_remote::{RemoteError, RemoteExec};

use crate::controller::{ControllerError, StatusApi};
use crate::layout::{NodeAddress, NodeRoleInfo};

/// Queued outcome for one remote call.
#[derive(Clone)]
pub enum Outcome {
    Ok(String),
    Fail { status: i32, stderr: String },
    Timeout,
    Transport,
}

/// [`RemoteExec`] double with per-command outcome queues.
///
/// Commands without a queued outcome succeed with empty output, so
/// tests only script the calls they care about.
#[derive(Default)]
pub struct ScriptedExec {
    rules: Mutex<HashMap<String, VecDeque<Outcome>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for a command (for `run`/`run_as`/`spawn`) or
    /// a remote destination path (for `copy`).
    pub fn on(&self, key: &str, outcome: Outcome) {
        self.rules
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    fn resolve(&self, node: &str, key: &str) -> Result<String, RemoteError> {
        let outcome = self
            .rules
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Outcome::Ok(String::new()));

        match outcome {
            Outcome::Ok(stdout) => Ok(stdout),
            Outcome::Fail { status, stderr } => Err(RemoteError::CommandFailed {
                node: node.to_string(),
                status,
                stderr,
            }),
            Outcome::Timeout => Err(RemoteError::Timeout {
                node: node.to_string(),
                timeout: Duration::from_secs(5),
            }),
            Outcome::Transport => Err(RemoteError::Transport {
                node: node.to_string(),
                message: "scripted transport failure".to_string(),
            }),
        }
    }
}

#[async_trait]
impl RemoteExec for ScriptedExec {
    async fn run(
        &self,
        node: &str,
        command: &str,
        _timeout: Duration,
        _stdin: Option<&str>,
    ) -> Result<String, RemoteError> {
        self.record(format!("run {node}: {command}"));
        self.resolve(node, command)
    }

    async fn run_as(
        &self,
        user: &str,
        node: &str,
        command: &str,
        _timeout: Duration,
        _stdin: Option<&str>,
    ) -> Result<String, RemoteError> {
        self.record(format!("run_as {user}@{node}: {command}"));
        self.resolve(node, command)
    }

    async fn spawn(&self, node: &str, command: &str) -> Result<(), RemoteError> {
        self.record(format!("spawn {node}: {command}"));
        self.resolve(node, command).map(|_| ())
    }

    async fn copy(
        &self,
        node: &str,
        local_path: &Path,
        remote_path: &str,
        _timeout: Duration,
    ) -> Result<(), RemoteError> {
        self.record(format!(
            "copy {node}: {} -> {remote_path}",
            local_path.display()
        ));
        self.resolve(node, remote_path).map(|_| ())
    }
}

/// [`StatusApi`] double: fixed cluster view plus per-node scripted
/// `is_done_initializing` answers.
pub struct ScriptedStatus {
    public_ips: Vec<NodeAddress>,
    role_info: Vec<NodeRoleInfo>,
    /// Failures to inject before the cluster view becomes available.
    view_failures: Mutex<u32>,
    /// Queued readiness answers per node; when a queue runs dry the
    /// node reports `done_when_exhausted`.
    done: Mutex<HashMap<NodeAddress, VecDeque<Result<bool, ()>>>>,
    done_when_exhausted: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedStatus {
    pub fn new(public_ips: Vec<NodeAddress>, role_info: Vec<NodeRoleInfo>) -> Self {
        Self {
            public_ips,
            role_info,
            view_failures: Mutex::new(0),
            done: Mutex::new(HashMap::new()),
            done_when_exhausted: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Nodes whose readiness queues run dry keep reporting false.
    pub fn never_done_by_default(mut self) -> Self {
        self.done_when_exhausted = false;
        self
    }

    /// Make the first `n` cluster-view fetches fail transport-level.
    pub fn fail_view_times(self, n: u32) -> Self {
        *self.view_failures.lock().unwrap() = n;
        self
    }

    /// Queue a readiness answer for `node`; `Err(())` means an RPC
    /// transport failure.
    pub fn queue_done(&self, node: &NodeAddress, answer: Result<bool, ()>) {
        self.done
            .lock()
            .unwrap()
            .entry(node.clone())
            .or_default()
            .push_back(answer);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn unavailable(node: &NodeAddress) -> ControllerError {
        ControllerError::Status {
            node: node.to_string(),
            status: 503,
            body: "scripted failure".to_string(),
        }
    }
}

#[async_trait]
impl StatusApi for ScriptedStatus {
    async fn get_all_public_ips(
        &self,
        node: &NodeAddress,
    ) -> Result<Vec<NodeAddress>, ControllerError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("get_all_public_ips {node}"));
        let mut failures = self.view_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(Self::unavailable(node));
        }
        Ok(self.public_ips.clone())
    }

    async fn get_role_info(
        &self,
        node: &NodeAddress,
    ) -> Result<Vec<NodeRoleInfo>, ControllerError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("get_role_info {node}"));
        Ok(self.role_info.clone())
    }

    async fn is_done_initializing(&self, node: &NodeAddress) -> Result<bool, ControllerError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("is_done_initializing {node}"));
        let answer = self
            .done
            .lock()
            .unwrap()
            .get_mut(node)
            .and_then(|queue| queue.pop_front());
        match answer {
            Some(Ok(done)) => Ok(done),
            Some(Err(())) => Err(Self::unavailable(node)),
            None => Ok(self.done_when_exhausted),
        }
    }

    async fn commit_new_user(
        &self,
        node: &NodeAddress,
        email: &str,
        _password_hash: &str,
        role: &str,
    ) -> Result<bool, ControllerError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("commit_new_user {node}: {email} ({role})"));
        Ok(true)
    }
}
