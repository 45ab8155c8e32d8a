use anyhow::Result;
use async_trait::async_trait;
use cadence_core::{DispatchTask, ReplyBackend, ReplyBatch};
use std::time::Duration;

/// Stand-in response backend: echoes the batch back after a fixed latency.
pub struct EchoBackend {
    latency: Duration,
}

impl EchoBackend {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl ReplyBackend for EchoBackend {
    async fn process(&self, task: &DispatchTask) -> Result<Option<ReplyBatch>> {
        tokio::time::sleep(self.latency).await;

        let text = task.combined_text();
        let media: Vec<String> = task.media().map(|m| m.kind.to_string()).collect();
        if text.is_empty() && media.is_empty() {
            return Ok(None);
        }

        let mut replies = Vec::new();
        if !text.is_empty() {
            replies.push(format!("You said: {}", text.replace('\n', " / ")));
        }
        if !media.is_empty() {
            replies.push(format!("Got your {}.", media.join(" + ")));
        }
        Ok(Some(ReplyBatch::text(replies)))
    }
}
