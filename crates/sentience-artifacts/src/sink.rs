use crate::buffer::ArtifactBuffer;
use sentience_core::FailureArtifactSink;

#[async_trait::async_trait]
impl FailureArtifactSink for ArtifactBuffer {
    async fn persist_failure(&self, reason: &str) {
        self.persist(reason, "failure", None, None, None).await;
    }
}
