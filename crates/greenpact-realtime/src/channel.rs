use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use greenpact_core::{ChannelRequest, Contract, ContractId, InboundMessage};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crate::reconnect::ReconnectPolicy;

type Connection = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_BUFFER: usize = 64;
const FETCH_ACTION: &str = "fetch_contracts";
const APPROVE_ACTION: &str = "approve_contracts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub url: String,
    pub reconnect: ReconnectPolicy,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn contracts(base_url: &str) -> Self {
        Self::new(format!("{}/ws/contract/", base_url.trim_end_matches('/')))
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContractSnapshot {
    pub contracts: Arc<Vec<Contract>>,
    pub loading: bool,
    pub sequence: u64,
    pub version: Option<u64>,
}

impl ContractSnapshot {
    fn initial() -> Self {
        Self {
            contracts: Arc::new(Vec::new()),
            loading: true,
            sequence: 0,
            version: None,
        }
    }

    pub fn find(&self, id: &greenpact_core::ContractId) -> Option<&Contract> {
        self.contracts.iter().find(|contract| &contract.id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Snapshot {
        sequence: u64,
        contracts: Arc<Vec<Contract>>,
    },
    /// `reply_to` is the oldest request still awaiting a reply on this
    /// connection, if any.
    Acknowledged {
        reply_to: Option<ReplyTo>,
    },
    Rejected {
        reply_to: Option<ReplyTo>,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTo {
    pub action: &'static str,
    pub contract_id: Option<ContractId>,
}

impl ReplyTo {
    fn of(request: &ChannelRequest) -> Self {
        Self {
            action: request.action(),
            contract_id: request.contract_id().cloned(),
        }
    }

    pub fn is_approval(&self) -> bool {
        self.action == APPROVE_ACTION
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("could not encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait RealtimeLink: Send + Sync {
    /// Queues `request` if the channel is open. Returns whether it was queued;
    /// delivery is never confirmed.
    fn send(&self, request: ChannelRequest) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;
}

struct Session {
    token: String,
    outbound: mpsc::UnboundedSender<String>,
}

struct Shared {
    session: watch::Sender<Option<Session>>,
    state: watch::Sender<ChannelState>,
    snapshot: watch::Sender<ContractSnapshot>,
    events: broadcast::Sender<ChannelEvent>,
    awaiting_reply: Mutex<VecDeque<ReplyTo>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            session: watch::channel(None).0,
            state: watch::channel(ChannelState::Disconnected).0,
            snapshot: watch::channel(ContractSnapshot::initial()).0,
            events: broadcast::channel(EVENT_BUFFER).0,
            awaiting_reply: Mutex::new(VecDeque::new()),
        }
    }

    fn awaiting_reply(&self) -> MutexGuard<'_, VecDeque<ReplyTo>> {
        self.awaiting_reply
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, request: ChannelRequest) -> bool {
        if *self.state.borrow() != ChannelState::Open {
            trace!(action = request.action(), "channel not open, dropping request");
            return false;
        }
        let session = self.session.borrow();
        let Some(session) = session.as_ref() else {
            return false;
        };
        match request.to_envelope(&session.token) {
            Ok(text) => {
                debug!(action = request.action(), "sending channel request");
                // Held across the send so queue order matches wire order.
                let mut awaiting = self.awaiting_reply();
                let queued = session.outbound.send(text).is_ok();
                if queued {
                    awaiting.push_back(ReplyTo::of(&request));
                }
                queued
            }
            Err(err) => {
                warn!(action = request.action(), "could not encode channel request: {err}");
                false
            }
        }
    }

    fn apply(&self, text: &str) {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                warn!("ignoring unparseable channel message: {err}");
                return;
            }
        };

        match message {
            InboundMessage::Snapshot { contracts, version } => {
                {
                    let mut awaiting = self.awaiting_reply();
                    if awaiting
                        .front()
                        .is_some_and(|request| request.action == FETCH_ACTION)
                    {
                        awaiting.pop_front();
                    }
                }
                self.apply_snapshot(contracts, version)
            }
            InboundMessage::Acknowledged => {
                let reply_to = self.awaiting_reply().pop_front();
                let _ = self.events.send(ChannelEvent::Acknowledged { reply_to });
            }
            InboundMessage::Rejected { message } => {
                let reply_to = self.awaiting_reply().pop_front();
                warn!(?reply_to, %message, "server rejected a channel request");
                let _ = self
                    .events
                    .send(ChannelEvent::Rejected { reply_to, message });
            }
            InboundMessage::Unknown => {}
        }
    }

    fn apply_snapshot(&self, contracts: Vec<Contract>, version: Option<u64>) {
        let mut applied = None;
        self.snapshot.send_if_modified(|snapshot| {
            if let (Some(incoming), Some(current)) = (version, snapshot.version) {
                if incoming <= current {
                    debug!(incoming, current, "dropping stale contract snapshot");
                    return false;
                }
            }
            snapshot.contracts = Arc::new(contracts);
            snapshot.loading = false;
            snapshot.sequence += 1;
            snapshot.version = version.or(snapshot.version);
            applied = Some((snapshot.sequence, snapshot.contracts.clone()));
            true
        });

        if let Some((sequence, contracts)) = applied {
            debug!(sequence, count = contracts.len(), "contract snapshot applied");
            let _ = self.events.send(ChannelEvent::Snapshot {
                sequence,
                contracts,
            });
        }
    }

    fn reset(&self) {
        self.session.send_replace(None);
        self.awaiting_reply().clear();
        self.snapshot.send_replace(ContractSnapshot::initial());
    }
}

#[derive(Clone)]
pub struct ChannelHandle {
    shared: Arc<Shared>,
}

impl ChannelHandle {
    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn snapshot(&self) -> watch::Receiver<ContractSnapshot> {
        self.shared.snapshot.subscribe()
    }
}

impl RealtimeLink for ChannelHandle {
    fn send(&self, request: ChannelRequest) -> bool {
        self.shared.send(request)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }
}

struct Worker {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Worker {
    fn spawn(shared: Arc<Shared>, config: ChannelConfig, token: String) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_connection(shared, config, token, shutdown_rx));
        Self { shutdown, task }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!("contract channel task ended abnormally: {err}");
        }
    }
}

pub struct ContractChannel {
    config: ChannelConfig,
    token: Option<String>,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl ContractChannel {
    pub fn connect(config: ChannelConfig, token: Option<String>) -> Self {
        let shared = Arc::new(Shared::new());
        let worker = token
            .clone()
            .map(|token| Worker::spawn(shared.clone(), config.clone(), token));
        if worker.is_none() {
            debug!("no access token, contract channel stays disconnected");
        }
        Self {
            config,
            token,
            shared,
            worker,
        }
    }

    pub async fn set_token(&mut self, token: Option<String>) {
        if token == self.token {
            return;
        }
        if let Some(worker) = self.worker.take() {
            worker.stop().await;
        }
        self.shared.reset();
        self.shared.state.send_replace(ChannelState::Disconnected);
        self.worker = token
            .clone()
            .map(|token| Worker::spawn(self.shared.clone(), self.config.clone(), token));
        self.token = token;
    }

    pub async fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop().await;
        }
        self.shared.session.send_replace(None);
        self.shared.state.send_replace(ChannelState::Closed);
    }

    pub fn handle(&self) -> ChannelHandle {
        ChannelHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn send(&self, request: ChannelRequest) -> bool {
        self.shared.send(request)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }

    pub fn snapshot(&self) -> watch::Receiver<ContractSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn contracts(&self) -> Arc<Vec<Contract>> {
        self.shared.snapshot.borrow().contracts.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.snapshot.borrow().loading
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }
}

impl Drop for ContractChannel {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(true);
        }
    }
}

enum Exit {
    Shutdown,
    ClosedByPeer,
}

async fn run_connection(
    shared: Arc<Shared>,
    config: ChannelConfig,
    token: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt = 0;
    loop {
        shared.state.send_replace(ChannelState::Connecting);
        let connected = tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            result = connect_async(config.url.as_str()) => result,
        };

        match connected {
            Ok((connection, _)) => {
                attempt = 0;
                info!(url = %config.url, "contract channel connected");
                match drive(&shared, connection, &token, &mut shutdown).await {
                    Ok(Exit::Shutdown) => break,
                    Ok(Exit::ClosedByPeer) => info!("contract channel closed by server"),
                    Err(err) => warn!("contract channel failed: {err}"),
                }
            }
            Err(err) => warn!(url = %config.url, "contract channel connect failed: {err}"),
        }

        shared.session.send_replace(None);
        shared.state.send_replace(ChannelState::Disconnected);

        let Some(delay) = config.reconnect.delay(attempt) else {
            if config.reconnect.max_attempts > 0 {
                warn!(attempts = attempt, "contract channel reconnect attempts exhausted");
            }
            break;
        };
        attempt += 1;
        debug!(attempt, ?delay, "reconnecting contract channel");
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.session.send_replace(None);
    shared.state.send_replace(ChannelState::Closed);
    info!("contract channel closed");
}

async fn drive(
    shared: &Shared,
    connection: Connection,
    token: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Exit, ChannelError> {
    let (mut sink, mut source) = connection.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    {
        let mut awaiting = shared.awaiting_reply();
        awaiting.clear();
        awaiting.push_back(ReplyTo::of(&ChannelRequest::FetchContracts));
    }
    sink.send(Message::text(
        ChannelRequest::FetchContracts.to_envelope(token)?,
    ))
    .await?;
    shared.session.send_replace(Some(Session {
        token: token.to_string(),
        outbound,
    }));
    shared.state.send_replace(ChannelState::Open);

    loop {
        tokio::select! {
            _ = shutdown_requested(shutdown) => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(Exit::Shutdown);
            }
            Some(text) = outbound_rx.recv() => {
                sink.send(Message::text(text)).await?;
            }
            frame = source.next() => {
                let Some(frame) = frame else {
                    return Ok(Exit::ClosedByPeer);
                };
                match frame? {
                    Message::Text(text) => shared.apply(text.as_str()),
                    Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => shared.apply(text),
                        Err(_) => debug!("ignoring non-utf8 binary frame"),
                    },
                    Message::Close(_) => return Ok(Exit::ClosedByPeer),
                    _ => {}
                }
            }
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
