//! Sync runtime
//!
//! Runs a [`SyncEngine`] inside a tokio task. The task is the only place
//! engine operations run; sockets and REST calls are spawned off and report
//! back over an internal channel, so a slow request never blocks inbound
//! frames or typing expiry.

use std::collections::HashMap;
use std::future;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use super::engine::{ChannelId, Effect, SyncEngine, SyncEvent, SyncSnapshot, Ticket};
use super::message::{channel_url, ClientMessage};
use crate::api::ApiClient;
use crate::config::Config;
use crate::error::{ApiResult, SyncError};
use crate::models::{Conversation, ConversationId, MessageRecord};
use crate::session::Session;

/// Commands sent to the sync task
#[derive(Debug, Clone, PartialEq)]
pub enum SyncCommand {
    /// Open (or switch to) a conversation
    Connect(ConversationId),
    /// Leave the active conversation
    Disconnect,
    /// Send a chat message in the active conversation
    SendMessage(String),
    /// The local user started typing
    TypingStart,
    /// The local user stopped typing
    TypingStop,
    /// Reload the conversation list
    RefreshConversations,
    /// Mark a conversation read
    MarkRead(ConversationId),
    /// Close everything and stop the task
    Shutdown,
}

/// Handle to control the sync task
pub struct SyncHandle {
    /// Send commands to the sync task
    pub command_tx: mpsc::Sender<SyncCommand>,
    /// Receive events from the sync task
    pub event_rx: mpsc::Receiver<SyncEvent>,
    /// Watch the current state
    pub snapshot_rx: watch::Receiver<SyncSnapshot>,
}

impl SyncHandle {
    /// Queue a command; fails once the task has stopped
    pub async fn send(&self, command: SyncCommand) -> Result<(), SyncError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SyncError::Stopped)
    }

    /// Latest published state
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot_rx.borrow().clone()
    }
}

/// Results reported back to the sync task by spawned I/O
#[derive(Debug)]
enum IoEvent {
    Opened(ChannelId),
    Frame { channel: ChannelId, text: String },
    Closed(ChannelId),
    History {
        ticket: Ticket,
        result: ApiResult<Vec<MessageRecord>>,
    },
    Conversation {
        ticket: Ticket,
        result: ApiResult<Conversation>,
    },
    Conversations(ApiResult<Vec<Conversation>>),
    MarkedRead {
        conversation: ConversationId,
        result: ApiResult<()>,
    },
}

/// Spawn the sync task for a session
///
/// Returns a handle to control and monitor the task. Nothing connects until
/// a [`SyncCommand::Connect`] arrives.
pub fn spawn_sync_task(config: &Config, session: Session) -> Result<SyncHandle, SyncError> {
    let api = ApiClient::new(config, session.token().map(str::to_string))?;
    let engine = SyncEngine::new(session, config.typing_timeout());

    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(64);
    let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());

    let (io_tx, io_rx) = mpsc::unbounded_channel();

    let executor = Executor::new(api, config.ws_url.clone(), event_tx, io_tx);
    tokio::spawn(sync_task_loop(engine, executor, command_rx, io_rx, snapshot_tx));

    Ok(SyncHandle {
        command_tx,
        event_rx,
        snapshot_rx,
    })
}

/// Main loop: commands, I/O results, and typing expiry
async fn sync_task_loop(
    mut engine: SyncEngine,
    mut executor: Executor,
    mut command_rx: mpsc::Receiver<SyncCommand>,
    mut io_rx: mpsc::UnboundedReceiver<IoEvent>,
    snapshot_tx: watch::Sender<SyncSnapshot>,
) {
    loop {
        let deadline = engine.next_typing_deadline();
        let typing_expiry = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
        };

        let effects = tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(SyncCommand::Shutdown) | None => break,
                    Some(cmd) => handle_command(&mut engine, cmd),
                }
            }
            Some(io) = io_rx.recv() => handle_io(&mut engine, io),
            _ = typing_expiry => engine.expire_typing(Instant::now()),
        };

        executor.run(effects);
        snapshot_tx.send_replace(engine.snapshot());
    }

    info!("Sync task shutting down");
    let effects = engine.disconnect();
    executor.run(effects);
    snapshot_tx.send_replace(engine.snapshot());
}

fn handle_command(engine: &mut SyncEngine, cmd: SyncCommand) -> Vec<Effect> {
    debug!("Sync command: {:?}", cmd);
    match cmd {
        SyncCommand::Connect(conversation) => engine.connect(conversation),
        SyncCommand::Disconnect => engine.disconnect(),
        SyncCommand::SendMessage(text) => match engine.send_message(&text) {
            Ok(effects) => effects,
            Err(e) => vec![Effect::Notify(SyncEvent::Error(e.to_string()))],
        },
        SyncCommand::TypingStart => engine.typing_start(),
        SyncCommand::TypingStop => engine.typing_stop(),
        SyncCommand::RefreshConversations => engine.refresh_conversations(),
        SyncCommand::MarkRead(conversation) => engine.mark_as_read(conversation),
        // Handled by the loop
        SyncCommand::Shutdown => Vec::new(),
    }
}

fn handle_io(engine: &mut SyncEngine, io: IoEvent) -> Vec<Effect> {
    match io {
        IoEvent::Opened(channel) => engine.channel_opened(channel),
        IoEvent::Frame { channel, text } => engine.handle_frame(channel, &text, Instant::now()),
        IoEvent::Closed(channel) => engine.channel_closed(channel),
        IoEvent::History { ticket, result } => engine.history_loaded(ticket, result),
        IoEvent::Conversation { ticket, result } => engine.conversation_loaded(ticket, result),
        IoEvent::Conversations(result) => engine.conversations_loaded(result),
        IoEvent::MarkedRead {
            conversation,
            result,
        } => engine.mark_read_completed(conversation, result),
    }
}

/// Carries out engine effects
struct Executor {
    api: ApiClient,
    ws_url: String,
    event_tx: mpsc::Sender<SyncEvent>,
    io_tx: mpsc::UnboundedSender<IoEvent>,
    /// Outbound queues of live sockets; dropping one closes its socket
    channels: HashMap<ChannelId, mpsc::UnboundedSender<ClientMessage>>,
}

impl Executor {
    fn new(
        api: ApiClient,
        ws_url: String,
        event_tx: mpsc::Sender<SyncEvent>,
        io_tx: mpsc::UnboundedSender<IoEvent>,
    ) -> Self {
        Self {
            api,
            ws_url,
            event_tx,
            io_tx,
            channels: HashMap::new(),
        }
    }

    fn run(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: Effect) {
        let io_tx = self.io_tx.clone();
        match effect {
            Effect::OpenChannel {
                channel,
                conversation,
                token,
            } => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                self.channels.insert(channel, outbound_tx);
                let url = channel_url(&self.ws_url, conversation, &token);
                debug!("Opening channel {} for conversation {}", channel, conversation);
                tokio::spawn(run_channel(channel, url, outbound_rx, io_tx));
            }
            Effect::CloseChannel { channel } => {
                if self.channels.remove(&channel).is_some() {
                    debug!("Closing channel {}", channel);
                }
            }
            Effect::Send { channel, message } => match self.channels.get(&channel) {
                Some(outbound) => {
                    if outbound.send(message).is_err() {
                        debug!("Channel {} already gone, frame dropped", channel);
                    }
                }
                None => debug!("No socket for channel {}, frame dropped", channel),
            },
            Effect::FetchHistory { ticket } => {
                let api = self.api.clone();
                tokio::spawn(async move {
                    let result = api.fetch_messages(ticket.conversation).await;
                    let _ = io_tx.send(IoEvent::History { ticket, result });
                });
            }
            Effect::FetchConversation { ticket } => {
                let api = self.api.clone();
                tokio::spawn(async move {
                    let result = api.fetch_conversation(ticket.conversation).await;
                    let _ = io_tx.send(IoEvent::Conversation { ticket, result });
                });
            }
            Effect::FetchConversations => {
                let api = self.api.clone();
                tokio::spawn(async move {
                    let result = api.fetch_conversations().await;
                    let _ = io_tx.send(IoEvent::Conversations(result));
                });
            }
            Effect::MarkRead { conversation } => {
                let api = self.api.clone();
                tokio::spawn(async move {
                    let result = api.mark_read(conversation).await;
                    let _ = io_tx.send(IoEvent::MarkedRead {
                        conversation,
                        result,
                    });
                });
            }
            // The snapshot carries the full state, so a lagging reader only
            // loses the notification, never the data
            Effect::Notify(event) => match self.event_tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    debug!("Event queue full, dropping {:?}", event);
                }
                Err(TrySendError::Closed(_)) => {}
            },
        }
    }
}

/// Drive one socket until it closes or its outbound queue is dropped
async fn run_channel(
    channel: ChannelId,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    io_tx: mpsc::UnboundedSender<IoEvent>,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!("Channel {} failed to connect: {}", channel, e);
            let _ = io_tx.send(IoEvent::Closed(channel));
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();
    let _ = io_tx.send(IoEvent::Opened(channel));

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                match msg {
                    Some(msg) => {
                        let text = match msg.encode() {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to encode frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(WsMessage::Text(text)).await {
                            warn!("Channel {} send failed: {}", channel, e);
                            break;
                        }
                    }
                    None => {
                        // Closed by the engine; no need to report back
                        let _ = write.send(WsMessage::Close(None)).await;
                        return;
                    }
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let _ = io_tx.send(IoEvent::Frame { channel, text });
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = write.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!("Channel {} closed by server", channel);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Channel {} read failed: {}", channel, e);
                        break;
                    }
                }
            }
        }
    }

    let _ = io_tx.send(IoEvent::Closed(channel));
}
