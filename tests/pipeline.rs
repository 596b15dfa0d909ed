//! End-to-end tests for the ingestion and query pipeline over the
//! in-memory index, with deterministic fake embedding and chat backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use docrag::config::Config;
use docrag::conversation::ConversationStore;
use docrag::embedding::{EmbeddingBackend, EmbeddingClient, EmbeddingProvider};
use docrag::error::{Cause, ExtractionError, IndexError, RemoteError};
use docrag::generate::{AnswerGenerator, ChatBackend, ChatCompletion};
use docrag::models::{
    CollectionStats, ConversationTurn, DocumentStatus, FileType, Metadata, QueryHit, Role, Usage,
};
use docrag::{CollectionHandle, InMemoryIndex, RagPipeline, Stage, VectorIndex};

const DIMS: usize = 256;

/// Bag-of-words vectors: each lowercase word hashed (FNV-1a) into a bucket,
/// then L2-normalised. Texts sharing vocabulary land close together.
fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
    {
        let mut hash: u32 = 0x811c_9dc5;
        for b in word.to_lowercase().bytes() {
            hash ^= b as u32;
            hash = hash.wrapping_mul(0x0100_0193);
        }
        v[hash as usize % DIMS] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[derive(Default)]
struct HashingEmbedder {
    calls: AtomicUsize,
    /// Fail this many calls with a rate limit before succeeding.
    rate_limited_calls: usize,
    /// Fail every call with this error.
    always_fail: Option<RemoteError>,
    delay: Option<Duration>,
}

impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }
    fn dims(&self) -> usize {
        DIMS
    }
}

#[async_trait]
impl EmbeddingBackend for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RemoteError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.always_fail {
            return Err(err.clone());
        }
        if call < self.rate_limited_calls {
            return Err(RemoteError::RateLimited("slow down".into()));
        }
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

/// Answers with a fixed string and records every prompt it receives.
#[derive(Default)]
struct RecordingChat {
    prompts: Mutex<Vec<Vec<ConversationTurn>>>,
}

#[async_trait]
impl ChatBackend for RecordingChat {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(
        &self,
        messages: &[ConversationTurn],
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<ChatCompletion, RemoteError> {
        self.prompts.lock().push(messages.to_vec());
        Ok(ChatCompletion {
            content: "The eruption destroyed the harbor.".into(),
            usage: Usage {
                prompt_tokens: 100,
                completion_tokens: 7,
                total_tokens: 107,
            },
            finish_reason: Some("stop".into()),
        })
    }
}

struct Harness {
    pipeline: RagPipeline,
    index: Arc<InMemoryIndex>,
    embedder: Arc<HashingEmbedder>,
    chat: Arc<RecordingChat>,
}

fn test_config() -> Config {
    let mut config = Config::minimal("unused.sqlite");
    config.embedding.dims = DIMS;
    config.embedding.backoff_base_ms = 5;
    config.embedding.backoff_max_ms = 20;
    config
}

/// Delegates to an in-memory index but fails every upsert.
#[derive(Default)]
struct FailingWrites {
    inner: InMemoryIndex,
}

#[async_trait]
impl VectorIndex for FailingWrites {
    async fn create_or_open(
        &self,
        owner: &str,
        scope: &str,
    ) -> Result<CollectionHandle, IndexError> {
        self.inner.create_or_open(owner, scope).await
    }

    async fn upsert(
        &self,
        _handle: &CollectionHandle,
        _vectors: &[Vec<f32>],
        _texts: &[String],
        _metadata: &[Metadata],
        _ids: &[String],
    ) -> Result<usize, IndexError> {
        Err(IndexError::Backend("disk full".into()))
    }

    async fn query(
        &self,
        handle: &CollectionHandle,
        query_vector: &[f32],
        top_k: usize,
        owner: &str,
    ) -> Result<Vec<QueryHit>, IndexError> {
        self.inner.query(handle, query_vector, top_k, owner).await
    }

    async fn delete(&self, handle: &CollectionHandle) -> Result<bool, IndexError> {
        self.inner.delete(handle).await
    }

    async fn stats(&self, handle: &CollectionHandle) -> Result<CollectionStats, IndexError> {
        self.inner.stats(handle).await
    }

    async fn list_scopes(&self, owner: &str) -> Result<Vec<String>, IndexError> {
        self.inner.list_scopes(owner).await
    }
}

fn pipeline_over(index: Arc<dyn VectorIndex>, config: &Config) -> RagPipeline {
    RagPipeline::new(
        index,
        Arc::new(EmbeddingClient::new(
            Arc::new(HashingEmbedder::default()),
            &config.embedding,
        )),
        Arc::new(AnswerGenerator::new(
            Arc::new(RecordingChat::default()),
            &config.generation,
        )),
        config,
    )
    .unwrap()
}

fn harness_with(embedder: HashingEmbedder, config: Config) -> Harness {
    let index = Arc::new(InMemoryIndex::default());
    let embedder = Arc::new(embedder);
    let chat = Arc::new(RecordingChat::default());
    let pipeline = RagPipeline::new(
        index.clone(),
        Arc::new(EmbeddingClient::new(embedder.clone(), &config.embedding)),
        Arc::new(AnswerGenerator::new(chat.clone(), &config.generation)),
        &config,
    )
    .unwrap();
    Harness {
        pipeline,
        index,
        embedder,
        chat,
    }
}

fn harness() -> Harness {
    harness_with(HashingEmbedder::default(), test_config())
}

fn paragraph(topic: &str, words: &[&str]) -> String {
    let mut out = format!("This section covers {topic}.");
    while out.len() < 700 {
        for w in words {
            out.push(' ');
            out.push_str(w);
        }
        out.push('.');
    }
    out
}

/// Four 700-760 character paragraphs on unrelated topics.
fn four_topic_document() -> String {
    [
        paragraph(
            "accounting",
            &["invoices", "ledger", "balance", "auditors", "quarterly", "revenue"],
        ),
        paragraph(
            "geology",
            &["volcano", "eruption", "magma", "harbor", "ashfall", "lava"],
        ),
        paragraph(
            "gardening",
            &["tomatoes", "compost", "seedlings", "watering", "mulch", "trellis"],
        ),
        paragraph(
            "astronomy",
            &["telescope", "galaxy", "nebula", "orbits", "comets", "parallax"],
        ),
    ]
    .join("\n\n")
}

#[tokio::test]
async fn ingest_then_query_answers_from_the_matching_chunk() {
    let h = harness();
    let doc = four_topic_document();

    let report = h
        .pipeline
        .ingest("42", doc.as_bytes(), FileType::Txt, Some("topics.txt"), Some("doc-1"))
        .await
        .unwrap();
    assert_eq!(report.document_id, "doc-1");
    assert_eq!(report.status, DocumentStatus::Processed);
    // Paragraphs fit a chunk each but no two fit together.
    assert_eq!(report.chunk_count, 4);
    assert_eq!(report.embedding_count, report.chunk_count);
    assert_eq!(report.file.filename, "topics.txt");
    assert_eq!(report.file.text_length, doc.chars().count());

    let stats = h.pipeline.stats("42", "doc-1").await.unwrap();
    assert!(stats.indexed);
    assert_eq!(stats.chunk_count, report.chunk_count);

    let outcome = h
        .pipeline
        .query("42", "doc-1", "What did the volcano eruption and magma do?", &[])
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(
        outcome.answer.as_deref(),
        Some("The eruption destroyed the harbor.")
    );
    assert!(outcome.found_chunks >= 1);
    assert_eq!(outcome.found_chunks, outcome.chunks.len());

    let top = &outcome.chunks[0];
    assert!(top.text.contains("volcano"), "top hit: {}", top.text);
    assert_eq!(top.metadata["chunk_index"], 1);
    assert_eq!(top.metadata["total_chunks"], 4);
    assert_eq!(top.metadata["document_id"], "doc-1");
    assert_eq!(top.metadata["owner"], "42");
    assert_eq!(top.metadata["source"], "upload");
    assert_eq!(top.metadata["file_type"], "txt");
    assert!((0.0..=1.0).contains(&top.similarity));
    for pair in outcome.chunks.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }

    let generation = outcome.generation.unwrap();
    assert_eq!(generation.model, "recording");
    assert_eq!(generation.usage.total_tokens, 107);

    let prompts = h.chat.prompts.lock();
    let prompt = &prompts[0];
    assert_eq!(prompt[0].role, Role::System);
    assert!(prompt[0].content.contains("CONTEXT FROM DOCUMENTS"));
    assert!(prompt[0].content.contains("volcano"));
    assert_eq!(prompt.last().unwrap().role, Role::User);
    assert!(prompt.last().unwrap().content.contains("volcano eruption"));
}

#[tokio::test]
async fn generated_document_ids_are_unique() {
    let h = harness();
    let a = h
        .pipeline
        .ingest("42", b"first document body", FileType::Txt, None, None)
        .await
        .unwrap();
    let b = h
        .pipeline
        .ingest("42", b"second document body", FileType::Txt, None, None)
        .await
        .unwrap();
    assert_ne!(a.document_id, b.document_id);
    assert_eq!(a.file.filename, format!("{}.txt", a.document_id));

    let mut listed = h.pipeline.list_documents("42").await.unwrap();
    listed.sort();
    let mut expected = vec![a.document_id, b.document_id];
    expected.sort();
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn unrelated_question_finds_nothing() {
    let h = harness();
    h.pipeline
        .ingest("42", four_topic_document().as_bytes(), FileType::Txt, None, Some("doc"))
        .await
        .unwrap();

    let outcome = h
        .pipeline
        .query("42", "doc", "Which submarine sandwich franchise sells pickles?", &[])
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.answer.is_none());
    assert_eq!(outcome.found_chunks, 0);
    assert!(outcome.generation.is_none());
    assert!(h.chat.prompts.lock().is_empty());
}

#[tokio::test]
async fn owners_cannot_see_each_others_documents() {
    let h = harness();
    h.pipeline
        .ingest("1", four_topic_document().as_bytes(), FileType::Txt, None, Some("shared-id"))
        .await
        .unwrap();

    let outcome = h
        .pipeline
        .query("2", "shared-id", "volcano eruption magma", &[])
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(h.pipeline.list_documents("2").await.unwrap().is_empty());
    assert!(!h.pipeline.stats("2", "shared-id").await.unwrap().indexed);
    assert!(!h.pipeline.delete("2", "shared-id").await.unwrap());
    assert!(h.pipeline.stats("1", "shared-id").await.unwrap().indexed);
}

#[tokio::test]
async fn invalid_owner_is_rejected_at_validation() {
    let h = harness();
    let err = h
        .pipeline
        .ingest("../etc", b"text", FileType::Txt, None, Some("doc"))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Validate);

    let err = h.pipeline.query("", "doc", "question", &[]).await.unwrap_err();
    assert_eq!(err.stage, Stage::Validate);
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let h = harness();
    let err = h.pipeline.query("42", "doc", "   ", &[]).await.unwrap_err();
    assert_eq!(err.stage, Stage::Validate);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn delete_removes_the_index() {
    let h = harness();
    h.pipeline
        .ingest("42", four_topic_document().as_bytes(), FileType::Txt, None, Some("doc"))
        .await
        .unwrap();

    assert!(h.pipeline.delete("42", "doc").await.unwrap());
    let stats = h.pipeline.stats("42", "doc").await.unwrap();
    assert!(!stats.indexed);
    assert_eq!(stats.chunk_count, 0);
    assert!(!h.pipeline.delete("42", "doc").await.unwrap());

    let outcome = h
        .pipeline
        .query("42", "doc", "volcano eruption magma", &[])
        .await
        .unwrap();
    assert!(!outcome.success);
}

#[tokio::test]
async fn reingesting_replaces_previous_chunks() {
    let h = harness();
    let first = h
        .pipeline
        .ingest("42", four_topic_document().as_bytes(), FileType::Txt, None, Some("doc"))
        .await
        .unwrap();
    assert!(first.chunk_count > 1);

    let second = h
        .pipeline
        .ingest("42", b"A short replacement about compost.", FileType::Txt, None, Some("doc"))
        .await
        .unwrap();
    assert_eq!(second.chunk_count, 1);
    assert_eq!(h.pipeline.stats("42", "doc").await.unwrap().chunk_count, 1);
}

#[tokio::test]
async fn failed_reingest_keeps_previous_index() {
    let h = harness();
    let first = h
        .pipeline
        .ingest("42", four_topic_document().as_bytes(), FileType::Txt, None, Some("doc"))
        .await
        .unwrap();

    let err = h
        .pipeline
        .ingest("42", b"   ", FileType::Txt, None, Some("doc"))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Extract);

    let stats = h.pipeline.stats("42", "doc").await.unwrap();
    assert!(stats.indexed);
    assert_eq!(stats.chunk_count, first.chunk_count);
    let outcome = h
        .pipeline
        .query("42", "doc", "What did the volcano eruption and magma do?", &[])
        .await
        .unwrap();
    assert!(outcome.found_chunks > 0);
}

#[tokio::test]
async fn failed_index_write_removes_the_collection() {
    let index = Arc::new(FailingWrites::default());
    let pipeline = pipeline_over(index.clone(), &test_config());

    let err = pipeline
        .ingest("42", four_topic_document().as_bytes(), FileType::Txt, None, Some("doc"))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Index);
    assert!(matches!(err.cause, Cause::Index(IndexError::Backend(_))));
    assert!(index.inner.list_scopes("42").await.unwrap().is_empty());
}

#[tokio::test]
async fn document_ids_outside_the_safe_alphabet_are_rejected() {
    let h = harness();
    let err = h
        .pipeline
        .ingest("42", b"some text", FileType::Txt, None, Some("a.b"))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Validate);
    assert!(matches!(err.cause, Cause::Index(IndexError::InvalidScope(_))));
    assert!(h.pipeline.list_documents("42").await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_embedding_leaves_no_index() {
    let h = harness_with(
        HashingEmbedder {
            always_fail: Some(RemoteError::Unauthorized("bad key".into())),
            ..Default::default()
        },
        test_config(),
    );
    let err = h
        .pipeline
        .ingest("42", four_topic_document().as_bytes(), FileType::Txt, None, Some("doc"))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Embed);
    assert!(matches!(err.cause, Cause::Remote(RemoteError::Unauthorized(_))));
    assert!(err.to_string().starts_with("processing failed at stage embed"));
    // Credentials errors are not retried.
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 1);

    assert!(!h.pipeline.stats("42", "doc").await.unwrap().indexed);
    assert!(h.index.list_scopes("42").await.unwrap().is_empty());
}

#[tokio::test]
async fn blank_document_fails_at_extraction() {
    let h = harness();
    let err = h
        .pipeline
        .ingest("42", b" \n\t\n ", FileType::Txt, None, Some("doc"))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Extract);
    assert!(matches!(err.cause, Cause::Extraction(ExtractionError::NoText(_))));
    assert!(h.pipeline.list_documents("42").await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let mut config = test_config();
    config.upload.max_file_size_mb = 1;
    let h = harness_with(HashingEmbedder::default(), config);
    let big = vec![b'a'; 1024 * 1024 + 1];
    let err = h
        .pipeline
        .ingest("42", &big, FileType::Txt, None, Some("doc"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.cause,
        Cause::Extraction(ExtractionError::TooLarge { .. })
    ));
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rate_limited_embedding_is_retried() {
    let h = harness_with(
        HashingEmbedder {
            rate_limited_calls: 2,
            ..Default::default()
        },
        test_config(),
    );
    let report = h
        .pipeline
        .ingest("42", b"Retry this small document.", FileType::Txt, None, Some("doc"))
        .await
        .unwrap();
    assert_eq!(report.chunk_count, 1);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn concurrent_ingest_of_same_document_is_rejected() {
    let h = harness_with(
        HashingEmbedder {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        },
        test_config(),
    );
    let body = four_topic_document();
    let (a, b) = tokio::join!(
        h.pipeline
            .ingest("42", body.as_bytes(), FileType::Txt, None, Some("doc")),
        h.pipeline
            .ingest("42", body.as_bytes(), FileType::Txt, None, Some("doc")),
    );
    let (ok, err) = match (a, b) {
        (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
        other => panic!("expected exactly one success, got {other:?}"),
    };
    assert_eq!(ok.document_id, "doc");
    assert_eq!(err.stage, Stage::Validate);

    // The slot is released afterwards.
    h.pipeline
        .ingest("42", body.as_bytes(), FileType::Txt, None, Some("doc"))
        .await
        .unwrap();
}

#[tokio::test]
async fn history_is_trimmed_before_generation() {
    let mut config = test_config();
    config.retrieval.history_turns = 2;
    let h = harness_with(HashingEmbedder::default(), config);
    h.pipeline
        .ingest("42", four_topic_document().as_bytes(), FileType::Txt, None, Some("doc"))
        .await
        .unwrap();

    let history = vec![
        ConversationTurn::user("oldest question"),
        ConversationTurn::assistant("oldest answer"),
        ConversationTurn::user("recent question"),
        ConversationTurn::assistant("recent answer"),
    ];
    h.pipeline
        .query("42", "doc", "Tell me about the volcano magma", &history)
        .await
        .unwrap();

    let prompts = h.chat.prompts.lock();
    let contents: Vec<&str> = prompts[0][1..].iter().map(|t| t.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["recent question", "recent answer", "Tell me about the volcano magma"]
    );
}

#[tokio::test]
async fn conversation_store_carries_history_between_questions() {
    let h = harness();
    let conversations = ConversationStore::new(10);
    h.pipeline
        .ingest("42", four_topic_document().as_bytes(), FileType::Txt, None, Some("doc"))
        .await
        .unwrap();

    let err = h
        .pipeline
        .ask(&conversations, "42", "volcano?")
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Validate);

    conversations.select_document("42", "doc");
    h.pipeline
        .ask(&conversations, "42", "What about the volcano eruption?")
        .await
        .unwrap();
    h.pipeline
        .ask(&conversations, "42", "And the magma and lava?")
        .await
        .unwrap();

    assert_eq!(conversations.history("42").len(), 4);
    let prompts = h.chat.prompts.lock();
    assert_eq!(prompts.len(), 2);
    // system + previous exchange + new question
    assert_eq!(prompts[1].len(), 4);
    assert_eq!(prompts[1][1].content, "What about the volcano eruption?");
}

#[tokio::test]
async fn ingest_file_infers_type_from_extension() {
    let h = harness();
    let dir = tempfile::TempDir::new().unwrap();

    let path = dir.path().join("notes.txt");
    std::fs::write(&path, four_topic_document()).unwrap();
    let report = h.pipeline.ingest_file("42", &path, None).await.unwrap();
    assert_eq!(report.file.filename, "notes.txt");
    assert_eq!(report.file.file_type, FileType::Txt);

    let bad = dir.path().join("notes.odt");
    std::fs::write(&bad, "text").unwrap();
    let err = h.pipeline.ingest_file("42", &bad, None).await.unwrap_err();
    assert_eq!(err.stage, Stage::Validate);
    assert!(matches!(
        err.cause,
        Cause::Extraction(ExtractionError::UnsupportedType(_))
    ));
}
