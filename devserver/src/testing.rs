//! In-memory doubles for the transport and resolver seams

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::http::transport::{Transport, TransportError};
use crate::net::resolver::Resolver;

type Reply = Result<String, TransportError>;

#[derive(Default)]
struct Script {
    queues: HashMap<String, VecDeque<(Duration, Reply)>>,
    defaults: HashMap<String, Reply>,
    calls: Vec<String>,
}

/// Transport that answers from per-endpoint queues.
///
/// Replies are keyed by the URL up to (not including) `?`. Queued replies
/// are consumed in order, each after its optional delay; once a queue is
/// empty the key's default reply is returned; with neither, the call fails
/// as a refused connection. Delays ignore the caller's timeout, like a
/// devserver that hangs.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

fn key_of(url: &str) -> &str {
    url.split_once('?').map(|(k, _)| k).unwrap_or(url)
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn push_ok(&self, key: &str, body: &str) {
        self.push(key, Ok(body.to_string()));
    }

    pub fn push_error(&self, key: &str, error: TransportError) {
        self.push(key, Err(error));
    }

    pub fn push(&self, key: &str, reply: Reply) {
        self.push_delayed(key, Duration::ZERO, reply);
    }

    /// Queue `reply`, handed out only after `delay`
    pub fn push_delayed(&self, key: &str, delay: Duration, reply: Reply) {
        self.lock()
            .queues
            .entry(key.to_string())
            .or_default()
            .push_back((delay, reply));
    }

    pub fn set_default_ok(&self, key: &str, body: &str) {
        self.set_default(key, Ok(body.to_string()));
    }

    pub fn set_default(&self, key: &str, reply: Reply) {
        self.lock().defaults.insert(key.to_string(), reply);
    }

    /// Every URL requested so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// URLs requested whose key is `key`
    pub fn calls_to(&self, key: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| key_of(c) == key).collect()
    }

    fn next_reply(&self, url: &str) -> (Duration, Reply) {
        let mut script = self.lock();
        script.calls.push(url.to_string());
        let key = key_of(url).to_string();
        if let Some(queued) = script.queues.get_mut(&key).and_then(|q| q.pop_front()) {
            return queued;
        }
        let reply = script
            .defaults
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(TransportError::Connection(format!("no scripted reply for {}", url))));
        (Duration::ZERO, reply)
    }

    async fn reply(&self, url: &str) -> Reply {
        let (delay, reply) = self.next_reply(url);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<String, TransportError> {
        self.reply(url).await
    }

    async fn post_file(
        &self,
        url: &str,
        _field: &str,
        _file_name: &str,
        _contents: Vec<u8>,
        _timeout: Duration,
    ) -> Result<String, TransportError> {
        self.reply(url).await
    }
}

/// Resolver backed by a fixed map; literal IPv4 addresses resolve to themselves
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    addrs: BTreeMap<String, Ipv4Addr>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hostname: &str, ip: Ipv4Addr) -> Self {
        self.addrs.insert(hostname.to_string(), ip);
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, hostname: &str) -> Option<Ipv4Addr> {
        self.addrs
            .get(hostname)
            .copied()
            .or_else(|| hostname.parse().ok())
    }
}
