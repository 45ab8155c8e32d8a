use anyhow::Result;
use async_trait::async_trait;
use cadence_core::{AudioReply, ChatTransport, ConversationKey, PresenceTransport};

/// Prints outbound traffic to stdout instead of talking to a chat network.
pub struct ConsoleTransport;

#[async_trait]
impl PresenceTransport for ConsoleTransport {
    async fn send_typing(&self, conversation: &ConversationKey) -> Result<()> {
        tracing::debug!("[{}] typing…", conversation);
        Ok(())
    }

    async fn send_recording(&self, conversation: &ConversationKey) -> Result<()> {
        tracing::debug!("[{}] recording…", conversation);
        Ok(())
    }

    async fn clear_presence(&self, conversation: &ConversationKey) -> Result<()> {
        tracing::debug!("[{}] presence cleared", conversation);
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn mark_seen(&self, conversation: &ConversationKey, message_id: &str) -> Result<()> {
        println!("[{}] ✓✓ seen {}", conversation, short_id(message_id));
        Ok(())
    }

    async fn react(
        &self,
        conversation: &ConversationKey,
        message_id: &str,
        emoji: &str,
    ) -> Result<()> {
        println!("[{}] {} on {}", conversation, emoji, short_id(message_id));
        Ok(())
    }

    async fn send_text(
        &self,
        conversation: &ConversationKey,
        text: &str,
        quote: Option<&str>,
    ) -> Result<()> {
        match quote {
            Some(id) => println!("[{}] ↪ {} > {}", conversation, short_id(id), text),
            None => println!("[{}] > {}", conversation, text),
        }
        Ok(())
    }

    async fn send_audio(&self, conversation: &ConversationKey, audio: &AudioReply) -> Result<()> {
        println!(
            "[{}] 🎤 voice note {} ({}, {} bytes encoded)",
            conversation,
            audio.filename,
            audio.mimetype,
            audio.data.len()
        );
        Ok(())
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
