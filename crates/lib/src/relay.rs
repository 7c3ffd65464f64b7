//! Message relay: one inbound direct message in, exactly one reply out.
//!
//! For each message the relay finds or creates the user's backend session, forwards the text
//! to the agent and turns the outcome into reply text. A transport failure while sending
//! clears every stored session, not only the sender's: the backend drops all of its sessions
//! when it times out, so every stored id is assumed stale at once.

use crate::backend::{AgentBackend, AgentError};
use crate::channels::{ChannelHandle, InboundMessage};
use crate::session::{AgentSession, SessionRegistry, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const GREETING_TEXT: &str = "Hello! How can I help you today?";
pub const SESSION_UNAVAILABLE_TEXT: &str =
    "Sorry, I couldn't create a new support session. Please try again later.";
pub const SESSIONS_RESET_TEXT: &str = "Oops. There was an error. Re-sending your question usually fixes it. (It's a session management bug).";
pub const UNEXPECTED_RESPONSE_TEXT: &str =
    "Sorry, I received an unexpected response from the support agent.";
pub const NO_MODEL_REPLY_TEXT: &str = "Sorry, I couldn't understand the response from the agent.";

/// Typing indicators expire after ~10s on Discord.
const TYPING_REFRESH: Duration = Duration::from_secs(8);

/// The single reply produced for a handled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Empty message text; no backend call was made.
    Greeting,
    /// The agent's answer.
    Agent(String),
    /// Session creation failed; nothing was recorded.
    SessionUnavailable,
    /// Sending failed at the transport level; all sessions were cleared.
    SessionsReset,
    /// The run response was not a list of turns.
    UnexpectedResponse,
    /// The run response had no model text.
    NoModelReply,
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Greeting => GREETING_TEXT,
            Reply::Agent(text) => text,
            Reply::SessionUnavailable => SESSION_UNAVAILABLE_TEXT,
            Reply::SessionsReset => SESSIONS_RESET_TEXT,
            Reply::UnexpectedResponse => UNEXPECTED_RESPONSE_TEXT,
            Reply::NoModelReply => NO_MODEL_REPLY_TEXT,
        }
    }
}

/// Relays messages to the agent backend, tracking one session per user.
#[derive(Clone)]
pub struct Relay {
    backend: Arc<dyn AgentBackend>,
    sessions: Arc<SessionRegistry>,
}

impl Relay {
    pub fn new(backend: Arc<dyn AgentBackend>, sessions: Arc<SessionRegistry>) -> Self {
        Self { backend, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Handle one inbound message and deliver the reply on `channel`.
    /// Returns the reply, or `None` when the message is ignored (own message or not a DM).
    pub async fn handle(&self, msg: &InboundMessage, channel: &Arc<dyn ChannelHandle>) -> Option<Reply> {
        if msg.from_self || !msg.is_direct {
            return None;
        }
        let user = UserId::new(msg.author_id.as_str());
        let reply = if msg.text.is_empty() {
            Reply::Greeting
        } else {
            let _typing = TypingGuard::start(channel.clone(), msg.conversation_id.clone()).await;
            self.respond(&user, &msg.text).await
        };
        if let Err(e) = channel.send_message(&msg.conversation_id, reply.text()).await {
            log::warn!("relay: failed to deliver reply to {}: {}", user, e);
        }
        Some(reply)
    }

    /// Produce the reply for `text` from `user`, creating a backend session on first contact.
    pub async fn respond(&self, user: &UserId, text: &str) -> Reply {
        if text.is_empty() {
            return Reply::Greeting;
        }
        let session = match self.ensure_session(user).await {
            Ok(session) => session,
            Err(e) => {
                log::warn!("relay: could not create session for {}: {}", user.agent_user_id(), e);
                return Reply::SessionUnavailable;
            }
        };
        match self.backend.send_message(&session, text).await {
            Ok(reply) => Reply::Agent(reply),
            Err(e) if e.is_transport() => {
                let cleared = self.sessions.clear().await;
                log::warn!(
                    "relay: send failed for {} in session {}: {}; cleared {} session(s)",
                    session.agent_user_id,
                    session.session_id,
                    e,
                    cleared
                );
                Reply::SessionsReset
            }
            Err(AgentError::NoModelReply) => {
                log::warn!("relay: no model text in response for session {}", session.session_id);
                Reply::NoModelReply
            }
            Err(e) => {
                log::warn!("relay: unreadable response for session {}: {}", session.session_id, e);
                Reply::UnexpectedResponse
            }
        }
    }

    async fn ensure_session(&self, user: &UserId) -> Result<AgentSession, AgentError> {
        if let Some(session_id) = self.sessions.get(user).await {
            log::debug!("relay: using existing session {} for {}", session_id, user);
            return Ok(AgentSession::for_user(user, session_id));
        }
        log::info!("relay: no active session for {}, creating one", user);
        let session = self.backend.create_session(user).await?;
        self.sessions
            .insert(user.clone(), session.session_id.clone())
            .await;
        Ok(session)
    }
}

/// Keeps the typing indicator alive until dropped.
struct TypingGuard {
    task: JoinHandle<()>,
}

impl TypingGuard {
    /// Show typing now, then refresh it in the background.
    async fn start(channel: Arc<dyn ChannelHandle>, conversation_id: String) -> Self {
        send_typing(channel.as_ref(), &conversation_id).await;
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(TYPING_REFRESH).await;
                send_typing(channel.as_ref(), &conversation_id).await;
            }
        });
        Self { task }
    }
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn send_typing(channel: &dyn ChannelHandle, conversation_id: &str) {
    if let Err(e) = channel.send_typing(conversation_id).await {
        log::debug!("relay: typing indicator failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Barrier, Mutex};

    /// Backend double: counts calls and returns scripted send results.
    struct FakeBackend {
        creates: AtomicUsize,
        sends: Mutex<Vec<(AgentSession, String)>>,
        fail_create: bool,
        send_result: fn() -> Result<String, AgentError>,
        create_barrier: Option<Barrier>,
        send_delay: Duration,
    }

    impl FakeBackend {
        fn replying(send_result: fn() -> Result<String, AgentError>) -> Self {
            Self {
                creates: AtomicUsize::new(0),
                sends: Mutex::new(Vec::new()),
                fail_create: false,
                send_result,
                create_barrier: None,
                send_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl AgentBackend for FakeBackend {
        async fn create_session(&self, user: &UserId) -> Result<AgentSession, AgentError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if let Some(ref barrier) = self.create_barrier {
                barrier.wait().await;
            }
            if self.fail_create {
                return Err(AgentError::Api("503 Service Unavailable".into()));
            }
            Ok(AgentSession::for_user(user, SessionId::generate()))
        }

        async fn send_message(
            &self,
            session: &AgentSession,
            text: &str,
        ) -> Result<String, AgentError> {
            self.sends
                .lock()
                .await
                .push((session.clone(), text.to_string()));
            if !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }
            (self.send_result)()
        }
    }

    /// Channel double: records sent messages and typing calls.
    #[derive(Default)]
    struct RecordingChannel {
        sent: std::sync::Mutex<Vec<(String, String)>>,
        typing: AtomicUsize,
    }

    #[async_trait]
    impl ChannelHandle for RecordingChannel {
        fn id(&self) -> &str {
            "test"
        }

        fn stop(&self) {}

        async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
            self.sent
                .lock()
                .unwrap()
                .push((conversation_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn send_typing(&self, _conversation_id: &str) -> Result<(), String> {
            self.typing.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dm(author: &str, text: &str) -> InboundMessage {
        InboundMessage {
            channel_id: "test".into(),
            conversation_id: format!("dm-{}", author),
            author_id: author.into(),
            is_direct: true,
            from_self: false,
            text: text.into(),
        }
    }

    fn relay_with(backend: Arc<FakeBackend>) -> Relay {
        Relay::new(backend, Arc::new(SessionRegistry::new()))
    }

    #[tokio::test]
    async fn first_message_creates_then_sends() {
        let backend = Arc::new(FakeBackend::replying(|| Ok("Hi there!".into())));
        let relay = relay_with(backend.clone());
        let user = UserId::new("A");

        let reply = relay.respond(&user, "hello").await;
        assert_eq!(reply, Reply::Agent("Hi there!".into()));
        assert_eq!(backend.creates.load(Ordering::SeqCst), 1);

        let sends = backend.sends.lock().await;
        let stored = relay.sessions().get(&user).await.unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0.session_id, stored);
        assert_eq!(sends[0].0.agent_user_id, "discord_A");
    }

    #[tokio::test]
    async fn existing_session_is_reused() {
        let backend = Arc::new(FakeBackend::replying(|| Ok("ok".into())));
        let relay = relay_with(backend.clone());
        let user = UserId::new("A");
        relay
            .sessions()
            .insert(user.clone(), SessionId::from("S"))
            .await;

        relay.respond(&user, "how are you").await;
        assert_eq!(backend.creates.load(Ordering::SeqCst), 0);
        assert_eq!(
            backend.sends.lock().await[0].0.session_id,
            SessionId::from("S")
        );
    }

    #[tokio::test]
    async fn empty_text_never_reaches_backend() {
        let backend = Arc::new(FakeBackend::replying(|| Ok("unused".into())));
        let relay = relay_with(backend.clone());

        assert_eq!(relay.respond(&UserId::new("A"), "").await, Reply::Greeting);
        assert_eq!(backend.creates.load(Ordering::SeqCst), 0);
        assert!(backend.sends.lock().await.is_empty());
    }

    #[tokio::test]
    async fn create_failure_leaves_registry_untouched() {
        let mut fake = FakeBackend::replying(|| Ok("unused".into()));
        fake.fail_create = true;
        let backend = Arc::new(fake);
        let relay = relay_with(backend.clone());

        let reply = relay.respond(&UserId::new("A"), "hello").await;
        assert_eq!(reply, Reply::SessionUnavailable);
        assert_eq!(reply.text(), SESSION_UNAVAILABLE_TEXT);
        assert!(relay.sessions().is_empty().await);
        assert!(backend.sends.lock().await.is_empty());
    }

    #[tokio::test]
    async fn transport_failure_clears_every_user() {
        let backend = Arc::new(FakeBackend::replying(|| {
            Err(AgentError::Api("500 Internal Server Error".into()))
        }));
        let relay = relay_with(backend);
        relay
            .sessions()
            .insert(UserId::new("A"), SessionId::from("SA"))
            .await;
        relay
            .sessions()
            .insert(UserId::new("B"), SessionId::from("SB"))
            .await;

        let reply = relay.respond(&UserId::new("A"), "hello").await;
        assert_eq!(reply, Reply::SessionsReset);
        assert!(relay.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn no_model_reply_keeps_sessions() {
        let backend = Arc::new(FakeBackend::replying(|| Err(AgentError::NoModelReply)));
        let relay = relay_with(backend);

        let reply = relay.respond(&UserId::new("A"), "hello").await;
        assert_eq!(reply.text(), NO_MODEL_REPLY_TEXT);
        assert_eq!(relay.sessions().len().await, 1);
    }

    #[tokio::test]
    async fn parse_failure_keeps_sessions() {
        let backend = Arc::new(FakeBackend::replying(|| {
            Err(serde_json::from_str::<Vec<u8>>("{").unwrap_err().into())
        }));
        let relay = relay_with(backend);

        let reply = relay.respond(&UserId::new("A"), "hello").await;
        assert_eq!(reply, Reply::UnexpectedResponse);
        assert_eq!(relay.sessions().len().await, 1);
    }

    #[tokio::test]
    async fn handle_sends_exactly_one_reply_with_typing() {
        let backend = Arc::new(FakeBackend::replying(|| Ok("Hi there!".into())));
        let relay = relay_with(backend);
        let recorder = Arc::new(RecordingChannel::default());
        let channel: Arc<dyn ChannelHandle> = recorder.clone();

        let reply = relay.handle(&dm("A", "hello"), &channel).await;
        assert_eq!(reply, Some(Reply::Agent("Hi there!".into())));
        let sent = recorder.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("dm-A".to_string(), "Hi there!".to_string())]);
        assert_eq!(recorder.typing.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_is_refreshed_while_backend_is_slow() {
        let mut fake = FakeBackend::replying(|| Ok("done".into()));
        fake.send_delay = TYPING_REFRESH * 2 + Duration::from_secs(4);
        let relay = relay_with(Arc::new(fake));
        let recorder = Arc::new(RecordingChannel::default());
        let channel: Arc<dyn ChannelHandle> = recorder.clone();

        let reply = relay.handle(&dm("A", "slow question"), &channel).await;
        assert_eq!(reply, Some(Reply::Agent("done".into())));
        // Once up front, then at 8s and 16s.
        assert_eq!(recorder.typing.load(Ordering::SeqCst), 3);

        tokio::time::sleep(TYPING_REFRESH * 3).await;
        assert_eq!(recorder.typing.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn handle_greets_on_empty_text() {
        let backend = Arc::new(FakeBackend::replying(|| Ok("unused".into())));
        let relay = relay_with(backend.clone());
        let recorder = Arc::new(RecordingChannel::default());
        let channel: Arc<dyn ChannelHandle> = recorder.clone();

        assert_eq!(relay.handle(&dm("A", ""), &channel).await, Some(Reply::Greeting));
        let sent = recorder.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("dm-A".to_string(), GREETING_TEXT.to_string())]);
        assert_eq!(recorder.typing.load(Ordering::SeqCst), 0);
        assert_eq!(backend.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handle_ignores_own_and_guild_messages() {
        let backend = Arc::new(FakeBackend::replying(|| Ok("unused".into())));
        let relay = relay_with(backend.clone());
        let recorder = Arc::new(RecordingChannel::default());
        let channel: Arc<dyn ChannelHandle> = recorder.clone();

        let mut own = dm("bot", "echo");
        own.from_self = true;
        let mut guild = dm("A", "hello");
        guild.is_direct = false;

        assert_eq!(relay.handle(&own, &channel).await, None);
        assert_eq!(relay.handle(&guild, &channel).await, None);
        assert!(recorder.sent.lock().unwrap().is_empty());
        assert_eq!(backend.creates.load(Ordering::SeqCst), 0);
    }

    /// Same-user messages are not serialized: two first messages in flight both miss the
    /// registry and both create a session; the later insert wins.
    #[tokio::test]
    async fn concurrent_first_messages_from_one_user_race() {
        let mut fake = FakeBackend::replying(|| Ok("ok".into()));
        fake.create_barrier = Some(Barrier::new(2));
        let backend = Arc::new(fake);
        let relay = relay_with(backend.clone());
        let user = UserId::new("A");

        let (a, b) = tokio::join!(relay.respond(&user, "one"), relay.respond(&user, "two"));
        assert_eq!(a, Reply::Agent("ok".into()));
        assert_eq!(b, Reply::Agent("ok".into()));
        assert_eq!(backend.creates.load(Ordering::SeqCst), 2);
        assert_eq!(relay.sessions().len().await, 1);
    }
}
