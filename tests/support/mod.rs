//! Fake workers for driving the transport and database layers in tests.
//!
//! [`channel`] hands the test both ends of a worker channel so it can answer
//! requests by hand. [`ScriptedHost`] spawns workers that answer on their
//! own, following a [`Responder`], and records every envelope they receive.

#![allow(dead_code)]

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use opfs_sql::worker::{Capabilities, Host, WorkerChannel, WorkerHandle};
use serde_json::{json, Value as Json};
use tokio::sync::mpsc;

#[derive(Debug)]
struct FakeHandle(Arc<AtomicBool>);

impl WorkerHandle for FakeHandle {
    fn terminate(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// The worker's side of a hand-driven channel.
#[derive(Debug)]
pub struct WorkerEnd {
    pub inbox: mpsc::UnboundedReceiver<Json>,
    pub outbox: mpsc::UnboundedSender<Json>,
    terminated: Arc<AtomicBool>,
}

impl WorkerEnd {
    /// Next envelope from the caller.
    pub async fn recv(&mut self) -> Json {
        self.inbox.recv().await.expect("caller hung up")
    }

    /// Answer the start signal.
    pub fn ready(&self) {
        let _ = self.outbox.send(ready_signal());
    }

    /// Answer `request` successfully.
    pub fn reply(&self, request: &Json, result: Json) {
        let _ = self.outbox.send(success(request, result));
    }

    /// Answer `request` with an engine error.
    pub fn fail(&self, request: &Json, message: &str) {
        let _ = self.outbox.send(failure(request, message));
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// A worker channel whose far end the test drives by hand.
pub fn channel() -> (WorkerChannel, WorkerEnd) {
    let (to_worker, inbox) = mpsc::unbounded_channel();
    let (outbox, from_worker) = mpsc::unbounded_channel();
    let terminated = Arc::new(AtomicBool::new(false));

    let channel = WorkerChannel {
        outbound: to_worker,
        inbound: from_worker,
        handle: Box::new(FakeHandle(Arc::clone(&terminated))),
    };
    let end = WorkerEnd {
        inbox,
        outbox,
        terminated,
    };
    (channel, end)
}

pub fn ready_signal() -> Json {
    json!({"type": "sqlite3-api", "result": "worker1-ready"})
}

pub fn success(request: &Json, result: Json) -> Json {
    json!({
        "type": request["type"],
        "messageId": request["messageId"],
        "result": result,
    })
}

pub fn failure(request: &Json, message: &str) -> Json {
    json!({
        "type": "error",
        "messageId": request["messageId"],
        "error": {"message": message, "operation": request["type"]},
    })
}

/// How a scripted worker answers one correlated request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Succeed with this result.
    Result(Json),
    /// Fail with an engine error carrying this message.
    Error(String),
    /// Succeed with no `result` field at all.
    Empty,
    /// Never answer.
    Silent,
}

/// How a scripted worker answers the start signal.
#[derive(Debug, Clone)]
pub enum Startup {
    Ready,
    Fail(String),
    Silent,
    /// Hang up without answering.
    Exit,
}

/// Decides the reply to each correlated request.
pub type Responder = Arc<dyn Fn(&Json) -> Reply + Send + Sync>;

/// Replies the way a healthy engine would for any request.
pub fn healthy(request: &Json) -> Reply {
    match request["type"].as_str() {
        Some("open") => Reply::Result(json!({
            "filename": request["args"]["filename"],
            "vfs": "opfs",
            "persistent": true,
        })),
        Some("close") => Reply::Result(json!({"filename": "scripted.db"})),
        Some("exec") if request["args"]["resultRows"].is_array() => {
            Reply::Result(json!({"resultRows": []}))
        }
        Some("exec") => Reply::Result(json!({"changeCount": 0})),
        _ => Reply::Error(format!("unexpected request {request}")),
    }
}

/// SQL carried by an exec request, if it is one.
pub fn exec_sql(request: &Json) -> Option<&str> {
    (request["type"] == "exec")
        .then(|| request["args"]["sql"].as_str())
        .flatten()
}

/// Host spawning scripted workers.
#[derive(Clone)]
pub struct ScriptedHost {
    pub capabilities: Capabilities,
    pub startup: Startup,
    responder: Responder,
    received: Arc<Mutex<Vec<Json>>>,
    terminated: Arc<AtomicBool>,
}

impl fmt::Debug for ScriptedHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedHost")
            .field("capabilities", &self.capabilities)
            .field("startup", &self.startup)
            .finish_non_exhaustive()
    }
}

impl ScriptedHost {
    /// A host whose workers behave like a healthy engine.
    pub fn new() -> Self {
        Self::with_responder(healthy)
    }

    pub fn with_responder(responder: impl Fn(&Json) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            capabilities: Capabilities {
                workers: true,
                durable_storage: true,
            },
            startup: Startup::Ready,
            responder: Arc::new(responder),
            received: Arc::new(Mutex::new(Vec::new())),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn startup(mut self, startup: Startup) -> Self {
        self.startup = startup;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Every envelope the workers received, in arrival order.
    pub fn received(&self) -> Vec<Json> {
        self.received.lock().unwrap().clone()
    }

    /// SQL of every exec request received, in arrival order.
    pub fn exec_log(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|request| exec_sql(request).map(str::to_string))
            .collect()
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Host for ScriptedHost {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn spawn(&self) -> opfs_sql::Result<WorkerChannel> {
        let (mut channel, mut end) = channel();
        channel.handle = Box::new(FakeHandle(Arc::clone(&self.terminated)));

        let startup = self.startup.clone();
        let responder = Arc::clone(&self.responder);
        let received = Arc::clone(&self.received);

        tokio::spawn(async move {
            while let Some(request) = end.inbox.recv().await {
                received.lock().unwrap().push(request.clone());

                if request["type"] == "start" {
                    match &startup {
                        Startup::Ready => end.ready(),
                        Startup::Fail(message) => {
                            let _ = end.outbox.send(json!({
                                "type": "sqlite3-api",
                                "error": {"message": message},
                            }));
                        }
                        Startup::Silent => {}
                        Startup::Exit => return,
                    }
                    continue;
                }

                match responder(&request) {
                    Reply::Result(result) => end.reply(&request, result),
                    Reply::Error(message) => end.fail(&request, &message),
                    Reply::Empty => {
                        let _ = end.outbox.send(json!({
                            "type": request["type"],
                            "messageId": request["messageId"],
                        }));
                    }
                    Reply::Silent => {}
                }
            }
        });

        Ok(channel)
    }
}
