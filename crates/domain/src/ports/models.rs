use super::BoxFuture;
use crate::DomainResult;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatReply {
    pub content: String,
    pub finish_reason: Option<String>,
}

pub trait TextModel: Send + Sync {
    fn complete(&self, system: &str, user: &str) -> BoxFuture<'_, DomainResult<ChatReply>>;
}

pub trait VisionModel: Send + Sync {
    fn complete_with_images(
        &self,
        system: &str,
        prompt: &str,
        image_urls: &[String],
    ) -> BoxFuture<'_, DomainResult<ChatReply>>;
}

pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> BoxFuture<'_, DomainResult<Vec<f32>>>;
}

/// Probe and transcoder. Implementations must stop their subprocesses when
/// the returned future is dropped.
pub trait MediaToolkit: Send + Sync {
    /// Duration in seconds.
    fn probe_duration(&self, url: &str) -> BoxFuture<'_, DomainResult<f64>>;
    /// Roughly `count` evenly spaced jpeg frames scaled to `width` pixels.
    fn extract_frames(
        &self,
        url: &str,
        duration: f64,
        count: u32,
        width: u32,
    ) -> BoxFuture<'_, DomainResult<Vec<Vec<u8>>>>;
    /// 16 kHz mono PCM wav.
    fn extract_audio(&self, url: &str) -> BoxFuture<'_, DomainResult<Vec<u8>>>;
}

pub trait TempStorage: Send + Sync {
    /// Returns a short-lived URL readable by the model providers.
    fn upload(
        &self,
        object_key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'_, DomainResult<String>>;
}

pub trait Transcriber: Send + Sync {
    fn transcribe(&self, url: &str) -> BoxFuture<'_, DomainResult<String>>;
}
