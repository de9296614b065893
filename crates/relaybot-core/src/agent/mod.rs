pub mod completion;
pub mod context;

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channel::Notifier;
use crate::config::BotConfig;
use crate::error::Result;
use crate::service::usage::UsageCounter;
use crate::session::ContextStore;
use crate::types::{InboundEvent, InboundKind, OutboundMessage, QuickReply, Role};
use crate::util::truncate_string;

pub use completion::{Completion, CompletionClient};
pub use context::ContextBuilder;

/// Quick-reply payload that asks for a human.
pub const HUMAN_SUPPORT_PAYLOAD: &str = "HUMAN_SUPPORT";
/// Quick-reply payload that asks for service information.
pub const SERVICE_INFO_PAYLOAD: &str = "SERVICE_INFO";

/// Which branch handled an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A known quick-reply payload was answered with its canned text.
    QuickReply(String),
    /// Unknown quick-reply payload; nothing was sent.
    Ignored,
    /// Free text asked for a human; the support notice was sent.
    HumanSupport,
    /// The model (or its fallback) answered.
    Answered { fallback: bool },
}

/// Routes inbound Messenger events to canned replies or the model.
pub struct Dispatcher {
    contexts: Arc<dyn ContextStore>,
    completion: CompletionClient,
    notifier: Arc<dyn Notifier>,
    usage: Arc<dyn UsageCounter>,
    bot: BotConfig,
    /// Lowercased copies of `bot.support_triggers`.
    support_triggers: Vec<String>,
}

impl Dispatcher {
    pub fn new(
        contexts: Arc<dyn ContextStore>,
        completion: CompletionClient,
        notifier: Arc<dyn Notifier>,
        usage: Arc<dyn UsageCounter>,
        bot: BotConfig,
    ) -> Self {
        let support_triggers = bot
            .support_triggers
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            contexts,
            completion,
            notifier,
            usage,
            bot,
            support_triggers,
        }
    }

    /// Handle one inbound event.
    ///
    /// Send failures are logged and dropped. Only a usage counter failure is
    /// returned as an error.
    pub async fn dispatch(&self, event: &InboundEvent) -> Result<DispatchOutcome> {
        match &event.kind {
            InboundKind::QuickReply(payload) => Ok(self.handle_quick_reply(&event.user_id, payload).await),
            InboundKind::Text(text) => self.handle_text(&event.user_id, text).await,
        }
    }

    /// Case-insensitive substring match against the support trigger phrases.
    pub fn is_support_request(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.support_triggers.iter().any(|t| lowered.contains(t.as_str()))
    }

    /// Buttons attached to every model reply.
    pub fn reply_quick_replies(&self) -> Vec<QuickReply> {
        vec![
            QuickReply::text(&self.bot.human_support_title, HUMAN_SUPPORT_PAYLOAD),
            QuickReply::text(&self.bot.service_info_title, SERVICE_INFO_PAYLOAD),
        ]
    }

    async fn handle_quick_reply(&self, user_id: &str, payload: &str) -> DispatchOutcome {
        let reply = match payload {
            HUMAN_SUPPORT_PAYLOAD => &self.bot.human_support_reply,
            SERVICE_INFO_PAYLOAD => &self.bot.service_info_reply,
            other => {
                debug!("Ignoring unknown quick reply payload {:?} from {}", other, user_id);
                return DispatchOutcome::Ignored;
            }
        };
        self.notify(OutboundMessage::new(user_id, reply)).await;
        DispatchOutcome::QuickReply(payload.to_string())
    }

    async fn handle_text(&self, user_id: &str, text: &str) -> Result<DispatchOutcome> {
        if self.is_support_request(text) {
            info!("Human support requested by {}", user_id);
            self.notify(OutboundMessage::new(user_id, &self.bot.human_support_reply))
                .await;
            return Ok(DispatchOutcome::HumanSupport);
        }

        debug!("Message from {}: {}", user_id, truncate_string(text, 80, "..."));

        self.contexts.append_turn(user_id, Role::User, text);
        let history = self.contexts.get_context(user_id);

        let completion = self.completion.complete(&history).await;
        if let Completion::Fallback { error, .. } = &completion {
            warn!("Completion failed for {} (model {}): {}", user_id, self.completion.model(), error);
        }
        let fallback = completion.is_fallback();
        let reply = completion.into_text();

        self.contexts.append_turn(user_id, Role::Assistant, &reply);
        let count = self.usage.increment(user_id).await?;
        debug!("User {} message count is now {}", user_id, count);

        let msg = OutboundMessage::new(user_id, reply).with_quick_replies(self.reply_quick_replies());
        self.notify(msg).await;

        Ok(DispatchOutcome::Answered { fallback })
    }

    async fn notify(&self, msg: OutboundMessage) {
        if let Err(e) = self.notifier.send(&msg).await {
            error!("Error sending to {} via {}: {}", msg.recipient_id, self.notifier.name(), e);
        }
    }
}
