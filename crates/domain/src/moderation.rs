use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{try_join, try_join_all};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::DomainResult;
use crate::content::{MediaItem, MediaKind};
use crate::error::DomainError;
use crate::ports::models::{
    ChatReply, EmbeddingModel, MediaToolkit, TempStorage, TextModel, Transcriber, VisionModel,
};
use crate::util::uuid_v7_without_dashes;

const SENSITIVE_FINISH_REASON: &str = "sensitive";
const MAX_AI_TAGS: usize = 5;

/// Ordered audit outcome; values compose by max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Warn,
    Deny,
}

impl Verdict {
    pub fn code(self) -> u8 {
        match self {
            Verdict::Pass => 1,
            Verdict::Warn => 2,
            Verdict::Deny => 3,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            3 => Verdict::Deny,
            2 => Verdict::Warn,
            _ => Verdict::Pass,
        }
    }

    /// Model status field. Anything unrecognised needs a human.
    pub fn from_status(status: &str) -> Self {
        match status.trim() {
            "1" => Verdict::Pass,
            "3" => Verdict::Deny,
            _ => Verdict::Warn,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Warn => "warn",
            Verdict::Deny => "deny",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelVerdict {
    pub verdict: Verdict,
    pub main_tag: Option<String>,
    pub tags: Vec<String>,
    pub summary: Option<String>,
}

impl ModelVerdict {
    fn deny() -> Self {
        Self {
            verdict: Verdict::Deny,
            main_tag: None,
            tags: Vec::new(),
            summary: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReplyPayload {
    #[serde(default)]
    status: Value,
    #[serde(default)]
    main_tag: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AggregatePayload {
    #[serde(default)]
    main_tag: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Removes a surrounding markdown code fence, if any.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches("json").trim_start_matches("JSON");
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_json<T>(content: &str) -> DomainResult<T>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_str(strip_code_fence(content))
        .map_err(|err| DomainError::Upstream(format!("unparseable model reply: {err}")))
}

pub fn parse_reply(reply: &ChatReply, categories: &[String]) -> DomainResult<ModelVerdict> {
    if reply.finish_reason.as_deref() == Some(SENSITIVE_FINISH_REASON) {
        return Ok(ModelVerdict::deny());
    }
    let payload: ReplyPayload = parse_json(&reply.content)?;
    let status = match &payload.status {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        _ => String::new(),
    };
    let main_tag = payload
        .main_tag
        .map(|tag| tag.trim().to_string())
        .filter(|tag| categories.iter().any(|category| category == tag));
    Ok(ModelVerdict {
        verdict: Verdict::from_status(&status),
        main_tag,
        tags: clean_tags(payload.tags.unwrap_or_default()),
        summary: payload.summary.filter(|summary| !summary.trim().is_empty()),
    })
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().trim_start_matches('#').to_string();
        if !tag.is_empty() && !cleaned.contains(&tag) {
            cleaned.push(tag);
        }
    }
    cleaned
}

/// Bounded concurrency for one model family.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
}

impl RateLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn acquire(&self, cancel: &CancellationToken) -> DomainResult<SemaphorePermit<'_>> {
        tokio::select! {
            _ = cancel.cancelled() => Err(DomainError::Cancelled),
            permit = self.semaphore.acquire() => permit
                .map_err(|_| DomainError::Unavailable("rate limiter closed".to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelLimits {
    pub text: RateLimiter,
    pub vision: RateLimiter,
    pub embedding: RateLimiter,
}

impl ModelLimits {
    pub fn new(text: usize, vision: usize, embedding: usize) -> Self {
        Self {
            text: RateLimiter::new(text),
            vision: RateLimiter::new(vision),
            embedding: RateLimiter::new(embedding),
        }
    }
}

impl Default for ModelLimits {
    fn default() -> Self {
        Self::new(5, 10, 50)
    }
}

#[derive(Debug, Clone)]
pub struct ModerationConfig {
    pub categories: Vec<String>,
    pub frame_count: u32,
    pub frame_width: u32,
    pub image_batch_size: usize,
    pub max_images_per_call: usize,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            categories: [
                "technology",
                "programming",
                "food",
                "travel",
                "fashion",
                "beauty",
                "fitness",
                "gaming",
                "anime",
                "music",
                "film",
                "pets",
                "photography",
                "career",
                "education",
                "finance",
                "daily_life",
                "other",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            frame_count: 5,
            frame_width: 768,
            image_batch_size: 5,
            max_images_per_call: 9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuditRequest {
    pub title: String,
    pub content: String,
    pub media: Vec<MediaItem>,
    /// Comments only need the safety decision, not classification.
    pub audit_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationResult {
    pub verdict: Verdict,
    pub main_tags: Vec<String>,
    pub tags: Vec<String>,
    pub summaries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregatedTags {
    pub main_tag: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
struct Collected {
    main_tags: Vec<String>,
    tags: Vec<String>,
    summaries: Vec<String>,
    pending_images: Vec<String>,
}

/// Shared by every branch of one `process` call.
struct AuditState {
    max: AtomicU8,
    collected: Mutex<Collected>,
    scope: CancellationToken,
}

impl AuditState {
    fn new(scope: CancellationToken) -> Self {
        Self {
            max: AtomicU8::new(Verdict::Pass.code()),
            collected: Mutex::new(Collected::default()),
            scope,
        }
    }

    fn verdict(&self) -> Verdict {
        Verdict::from_code(self.max.load(Ordering::SeqCst))
    }

    /// Deny is terminal and cancels the scope; lower values never overwrite.
    fn raise(&self, verdict: Verdict) {
        let previous = self.max.fetch_max(verdict.code(), Ordering::SeqCst);
        if verdict == Verdict::Deny && previous != Verdict::Deny.code() {
            self.scope.cancel();
        }
    }

    fn record(&self, outcome: ModelVerdict) {
        self.raise(outcome.verdict);
        let mut collected = self
            .collected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(main_tag) = outcome.main_tag {
            collected.main_tags.push(main_tag);
        }
        collected.tags.extend(outcome.tags);
        if let Some(summary) = outcome.summary {
            collected.summaries.push(summary);
        }
    }

    fn enqueue_image(&self, url: String) {
        self.collected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pending_images
            .push(url);
    }

    fn take_pending_images(&self) -> Vec<String> {
        std::mem::take(
            &mut self
                .collected
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .pending_images,
        )
    }

    fn into_result(self) -> ModerationResult {
        let verdict = self.verdict();
        let collected = self
            .collected
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ModerationResult {
            verdict,
            main_tags: collected.main_tags,
            tags: collected.tags,
            summaries: collected.summaries,
        }
    }
}

async fn guarded<T, Fut>(scope: &CancellationToken, work: Fut) -> DomainResult<T>
where
    Fut: Future<Output = DomainResult<T>>,
{
    tokio::select! {
        biased;
        _ = scope.cancelled() => Err(DomainError::Cancelled),
        outcome = work => outcome,
    }
}

#[derive(Clone)]
pub struct ContentModerator {
    text: Arc<dyn TextModel>,
    vision: Arc<dyn VisionModel>,
    embedding: Arc<dyn EmbeddingModel>,
    media: Arc<dyn MediaToolkit>,
    storage: Arc<dyn TempStorage>,
    transcriber: Arc<dyn Transcriber>,
    limits: ModelLimits,
    config: ModerationConfig,
}

pub struct ModelSuite {
    pub text: Arc<dyn TextModel>,
    pub vision: Arc<dyn VisionModel>,
    pub embedding: Arc<dyn EmbeddingModel>,
    pub media: Arc<dyn MediaToolkit>,
    pub storage: Arc<dyn TempStorage>,
    pub transcriber: Arc<dyn Transcriber>,
}

impl ContentModerator {
    pub fn new(models: ModelSuite, limits: ModelLimits, config: ModerationConfig) -> Self {
        Self {
            text: models.text,
            vision: models.vision,
            embedding: models.embedding,
            media: models.media,
            storage: models.storage,
            transcriber: models.transcriber,
            limits,
            config,
        }
    }

    pub fn limits(&self) -> &ModelLimits {
        &self.limits
    }

    /// Audits text and media concurrently. A deny from any branch stops the
    /// rest and is returned as a successful result.
    pub async fn process(
        &self,
        request: &AuditRequest,
        cancel: &CancellationToken,
    ) -> DomainResult<ModerationResult> {
        let scope = cancel.child_token();
        let state = AuditState::new(scope.clone());

        let text_branch = async {
            if request.title.trim().is_empty() && request.content.trim().is_empty() {
                return Ok(());
            }
            self.audit_text(&state, &request.title, &request.content, request.audit_only)
                .await
        };
        let media_branch = self.audit_media(&state, &request.media, request.audit_only);
        let outcome = try_join(text_branch, media_branch).await;
        scope.cancel();

        let verdict = state.verdict();
        if verdict == Verdict::Deny {
            info!(audit_only = request.audit_only, "moderation denied content");
            return Ok(state.into_result());
        }
        outcome?;
        debug!(verdict = verdict.as_str(), "moderation finished");
        Ok(state.into_result())
    }

    async fn audit_text(
        &self,
        state: &AuditState,
        title: &str,
        content: &str,
        audit_only: bool,
    ) -> DomainResult<()> {
        let outcome = guarded(&state.scope, async {
            let _permit = self.limits.text.acquire(&state.scope).await?;
            let system = text_system_prompt(audit_only, &self.config.categories);
            let user = format!("Title: {title}\nContent: {content}");
            let reply = self.text.complete(&system, &user).await?;
            parse_reply(&reply, &self.config.categories)
        })
        .await?;
        state.record(outcome);
        Ok(())
    }

    async fn audit_media(
        &self,
        state: &AuditState,
        media: &[MediaItem],
        audit_only: bool,
    ) -> DomainResult<()> {
        if media.is_empty() {
            return Ok(());
        }
        try_join_all(
            media
                .iter()
                .map(|item| self.collect_features(state, item, audit_only)),
        )
        .await?;
        if state.verdict() == Verdict::Deny {
            return Ok(());
        }

        let pending = state.take_pending_images();
        let batch_size = self.config.image_batch_size.max(1);
        try_join_all(
            pending
                .chunks(batch_size)
                .map(|batch| self.audit_images(state, batch, audit_only)),
        )
        .await?;
        Ok(())
    }

    async fn collect_features(
        &self,
        state: &AuditState,
        item: &MediaItem,
        audit_only: bool,
    ) -> DomainResult<()> {
        match item.kind() {
            MediaKind::Image => {
                state.enqueue_image(item.url.clone());
                Ok(())
            }
            MediaKind::Video => {
                if let Some(cover) = item.cover_url.as_ref().filter(|url| !url.is_empty()) {
                    state.enqueue_image(cover.clone());
                }
                try_join(
                    self.sample_frames(state, item),
                    self.audit_soundtrack(state, item, audit_only),
                )
                .await?;
                Ok(())
            }
            MediaKind::Audio => {
                let transcript =
                    guarded(&state.scope, self.transcriber.transcribe(&item.url)).await?;
                self.audit_transcript(state, &transcript, audit_only).await
            }
            MediaKind::Other => Ok(()),
        }
    }

    async fn sample_frames(&self, state: &AuditState, item: &MediaItem) -> DomainResult<()> {
        let duration = if item.duration > 0.0 {
            item.duration
        } else {
            guarded(&state.scope, self.media.probe_duration(&item.url)).await?
        };
        let frames = guarded(
            &state.scope,
            self.media.extract_frames(
                &item.url,
                duration,
                self.config.frame_count,
                self.config.frame_width,
            ),
        )
        .await?;
        let uploads = frames.into_iter().map(|frame| {
            let key = format!("audit/frames/{}.jpg", uuid_v7_without_dashes());
            async move {
                let url = guarded(&state.scope, self.storage.upload(&key, "image/jpeg", frame))
                    .await?;
                state.enqueue_image(url);
                Ok::<(), DomainError>(())
            }
        });
        try_join_all(uploads).await?;
        Ok(())
    }

    async fn audit_soundtrack(
        &self,
        state: &AuditState,
        item: &MediaItem,
        audit_only: bool,
    ) -> DomainResult<()> {
        let audio = guarded(&state.scope, self.media.extract_audio(&item.url)).await?;
        let key = format!("audit/audio/{}.wav", uuid_v7_without_dashes());
        let url = guarded(&state.scope, self.storage.upload(&key, "audio/wav", audio)).await?;
        let transcript = guarded(&state.scope, self.transcriber.transcribe(&url)).await?;
        self.audit_transcript(state, &transcript, audit_only).await
    }

    async fn audit_transcript(
        &self,
        state: &AuditState,
        transcript: &str,
        audit_only: bool,
    ) -> DomainResult<()> {
        if transcript.trim().is_empty() {
            return Ok(());
        }
        self.audit_text(state, "", transcript, audit_only).await
    }

    async fn audit_images(
        &self,
        state: &AuditState,
        urls: &[String],
        audit_only: bool,
    ) -> DomainResult<()> {
        if urls.is_empty() {
            return Ok(());
        }
        if urls.len() > self.config.max_images_per_call {
            state.raise(Verdict::Warn);
            return Ok(());
        }
        let outcome = guarded(&state.scope, async {
            let _permit = self.limits.vision.acquire(&state.scope).await?;
            let system = image_system_prompt(audit_only, &self.config.categories);
            let reply = self
                .vision
                .complete_with_images(&system, IMAGE_USER_PROMPT, urls)
                .await?;
            parse_reply(&reply, &self.config.categories)
        })
        .await?;
        state.record(outcome);
        Ok(())
    }

    /// Condenses the per-branch tags into one main tag and a short tag list.
    pub async fn aggregate_tags(
        &self,
        result: &ModerationResult,
        cancel: &CancellationToken,
    ) -> DomainResult<AggregatedTags> {
        if result.main_tags.is_empty() && result.tags.is_empty() {
            return Ok(AggregatedTags::default());
        }
        let user = serde_json::json!({
            "main_tags": result.main_tags,
            "tags": result.tags,
        })
        .to_string();
        let reply = guarded(cancel, async {
            let _permit = self.limits.text.acquire(cancel).await?;
            self.text
                .complete(&aggregate_system_prompt(&self.config.categories), &user)
                .await
        })
        .await?;
        let payload: AggregatePayload = parse_json(&reply.content)?;
        let main_tag = payload
            .main_tag
            .map(|tag| tag.trim().to_string())
            .filter(|tag| self.config.categories.iter().any(|category| category == tag));
        let mut tags = clean_tags(payload.tags.unwrap_or_default());
        tags.truncate(MAX_AI_TAGS);
        Ok(AggregatedTags { main_tag, tags })
    }

    pub async fn embed(&self, text: &str, cancel: &CancellationToken) -> DomainResult<Vec<f32>> {
        guarded(cancel, async {
            let _permit = self.limits.embedding.acquire(cancel).await?;
            self.embedding.embed(text).await
        })
        .await
    }
}

const IMAGE_USER_PROMPT: &str = "Review the attached images.";

fn text_system_prompt(audit_only: bool, categories: &[String]) -> String {
    if audit_only {
        return concat!(
            "You are a content safety reviewer for a social platform. ",
            "Decide whether the text is safe to publish. ",
            "Reply with JSON only: {\"status\":\"1|2|3\"} where 1 is safe, ",
            "2 needs human review and 3 must be rejected."
        )
        .to_string();
    }
    format!(
        "You are a content safety reviewer and classifier for a social platform. \
         Reply with JSON only: {{\"status\":\"1|2|3\",\"main_tag\":\"<category>\",\
         \"tags\":[\"...\"],\"summary\":\"...\"}}. Status 1 is safe, 2 needs human \
         review, 3 must be rejected. main_tag must be one of: {}. Give at most five \
         short tags and a one sentence summary.",
        categories.join(", ")
    )
}

fn image_system_prompt(audit_only: bool, categories: &[String]) -> String {
    if audit_only {
        return concat!(
            "You are an image safety reviewer for a social platform. ",
            "Reply with JSON only: {\"status\":\"1|2|3\"} where 1 is safe, ",
            "2 needs human review and 3 must be rejected."
        )
        .to_string();
    }
    format!(
        "You are an image safety reviewer and classifier for a social platform. \
         Judge all images together. Reply with JSON only: {{\"status\":\"1|2|3\",\
         \"main_tag\":\"<category>\",\"tags\":[\"...\"],\"summary\":\"...\"}}. Status 1 \
         is safe, 2 needs human review, 3 must be rejected. main_tag must be one of: {}.",
        categories.join(", ")
    )
}

fn aggregate_system_prompt(categories: &[String]) -> String {
    format!(
        "Merge the candidate tags of one post. Reply with JSON only: \
         {{\"main_tag\":\"<category>\",\"tags\":[\"...\"]}}. main_tag must be one of: {}. \
         Keep at most five distinct tags, most representative first.",
        categories.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> Vec<String> {
        ModerationConfig::default().categories
    }

    fn reply(content: &str) -> ChatReply {
        ChatReply {
            content: content.to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    #[test]
    fn verdicts_compose_by_max() {
        let state = AuditState::new(CancellationToken::new());
        state.raise(Verdict::Warn);
        state.raise(Verdict::Pass);
        assert_eq!(state.verdict(), Verdict::Warn);
        assert!(!state.scope.is_cancelled());
        state.raise(Verdict::Deny);
        state.raise(Verdict::Warn);
        assert_eq!(state.verdict(), Verdict::Deny);
        assert!(state.scope.is_cancelled());
    }

    #[test]
    fn fenced_json_reply_is_parsed() {
        let parsed = parse_reply(
            &reply("```json\n{\"status\":\"1\",\"main_tag\":\"food\",\"tags\":[\"#ramen\",\"ramen\"],\"summary\":\"bowl\"}\n```"),
            &categories(),
        )
        .unwrap();
        assert_eq!(parsed.verdict, Verdict::Pass);
        assert_eq!(parsed.main_tag.as_deref(), Some("food"));
        assert_eq!(parsed.tags, vec!["ramen".to_string()]);
        assert_eq!(parsed.summary.as_deref(), Some("bowl"));
    }

    #[test]
    fn unknown_status_and_category_degrade_safely() {
        let parsed = parse_reply(
            &reply("{\"status\":\"7\",\"main_tag\":\"astrology\"}"),
            &categories(),
        )
        .unwrap();
        assert_eq!(parsed.verdict, Verdict::Warn);
        assert!(parsed.main_tag.is_none());

        let numeric = parse_reply(&reply("{\"status\":3}"), &categories()).unwrap();
        assert_eq!(numeric.verdict, Verdict::Deny);
    }

    #[test]
    fn sensitive_finish_reason_is_deny() {
        let parsed = parse_reply(
            &ChatReply {
                content: String::new(),
                finish_reason: Some("sensitive".to_string()),
            },
            &categories(),
        )
        .unwrap();
        assert_eq!(parsed.verdict, Verdict::Deny);
    }

    #[test]
    fn garbage_reply_is_an_upstream_error() {
        assert!(matches!(
            parse_reply(&reply("I cannot help with that"), &categories()),
            Err(DomainError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn limiter_acquire_respects_cancellation() {
        let limiter = RateLimiter::new(1);
        let cancel = CancellationToken::new();
        let held = limiter.acquire(&cancel).await.unwrap();
        cancel.cancel();
        assert!(matches!(
            limiter.acquire(&cancel).await,
            Err(DomainError::Cancelled)
        ));
        drop(held);
        assert_eq!(limiter.available(), 1);
    }
}
