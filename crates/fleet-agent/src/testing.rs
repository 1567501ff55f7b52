//! In-memory coordinator used by unit tests.

use async_trait::async_trait;
use fleet_core::agent::WorkChannel;
use fleet_core::ports::CoordinatorTransport;
use fleet_core::protocol::{LivenessSignal, RegistrationAck, RegistrationRequest};
use fleet_core::{Error, Result};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::time::Instant;
use url::Url;

/// Scripted answer to one registration request.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Ack {
        agent_name: String,
        token: String,
        interval_secs: Option<u64>,
    },
    Unreachable,
    Rejected,
    Timeout,
}

impl Reply {
    pub(crate) fn ack(agent_name: &str) -> Self {
        Reply::Ack {
            agent_name: agent_name.to_string(),
            token: format!("tok-{agent_name}"),
            interval_secs: None,
        }
    }

    fn into_result(self) -> Result<RegistrationAck> {
        match self {
            Reply::Ack {
                agent_name,
                token,
                interval_secs,
            } => Ok(RegistrationAck {
                agent_name,
                work_channel: token,
                heartbeat_interval_secs: interval_secs,
            }),
            Reply::Unreachable => Err(Error::Unreachable("connection refused".to_string())),
            Reply::Rejected => Err(Error::Rejected {
                reason: "agent not allowed".to_string(),
            }),
            Reply::Timeout => Err(Error::Timeout { seconds: 10 }),
        }
    }
}

/// Answers registrations from a script; once the script runs out every
/// further registration is `Unreachable`.
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    register_calls: Mutex<Vec<(Url, Instant)>>,
    signals: Mutex<Vec<LivenessSignal>>,
    liveness_attempts: AtomicU32,
    deregistered: AtomicU32,
    fail_liveness: AtomicBool,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            register_calls: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            liveness_attempts: AtomicU32::new(0),
            deregistered: AtomicU32::new(0),
            fail_liveness: AtomicBool::new(false),
        }
    }

    pub(crate) fn failing_liveness(self) -> Self {
        self.fail_liveness.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn register_calls(&self) -> Vec<Url> {
        self.register_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub(crate) fn register_times(&self) -> Vec<Instant> {
        self.register_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }

    pub(crate) fn signals(&self) -> Vec<LivenessSignal> {
        self.signals.lock().unwrap().clone()
    }

    pub(crate) fn liveness_attempts(&self) -> u32 {
        self.liveness_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn deregistered(&self) -> u32 {
        self.deregistered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinatorTransport for ScriptedTransport {
    async fn register(
        &self,
        address: &Url,
        _request: &RegistrationRequest,
    ) -> Result<RegistrationAck> {
        self.register_calls
            .lock()
            .unwrap()
            .push((address.clone(), Instant::now()));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Unreachable);
        reply.into_result()
    }

    async fn send_liveness(&self, _channel: &WorkChannel, signal: &LivenessSignal) -> Result<()> {
        self.liveness_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_liveness.load(Ordering::SeqCst) {
            return Err(Error::Unreachable("connection reset".to_string()));
        }
        self.signals.lock().unwrap().push(signal.clone());
        Ok(())
    }

    async fn deregister(&self, _channel: &WorkChannel) -> Result<()> {
        self.deregistered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
