use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;
use tokio_stream::StreamExt;

use super::*;
use crate::runtime::TokenId;

struct FakeCompletionBackend {
    pieces: Vec<String>,
    position: usize,
    fail_begin: bool,
}

impl FakeCompletionBackend {
    fn new(pieces: Vec<String>) -> Self {
        Self {
            pieces,
            position: 0,
            fail_begin: false,
        }
    }
}

impl CompletionBackend for FakeCompletionBackend {
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        if text.trim().is_empty() {
            return Err(RagError::Tokenization("empty prompt".to_string()));
        }
        Ok((0..text.split_whitespace().count() as TokenId).collect())
    }

    fn begin(&mut self, prompt: &[TokenId]) -> Result<()> {
        if self.fail_begin {
            return Err(RagError::Generation("scripted priming failure".to_string()));
        }
        if prompt.is_empty() {
            return Err(RagError::Tokenization("empty prompt".to_string()));
        }
        self.position = 0;
        Ok(())
    }

    fn next_token(&mut self) -> Result<Option<TokenId>> {
        if self.position >= self.pieces.len() {
            return Ok(None);
        }
        let token = self.position as TokenId;
        self.position += 1;
        Ok(Some(token))
    }

    fn piece(&mut self, token: TokenId) -> Result<String> {
        Ok(self.pieces[token as usize].clone())
    }
}

fn scripted_engine(pieces: &[&str]) -> (CompletionEngine, Arc<AtomicUsize>) {
    scripted_engine_with(pieces, false)
}

fn scripted_engine_with(pieces: &[&str], fail_begin: bool) -> (CompletionEngine, Arc<AtomicUsize>) {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let pieces: Vec<String> = pieces.iter().map(|piece| (*piece).to_string()).collect();

    let engine = CompletionEngine::with_loader(Arc::new(move |_path, _max_output_tokens| {
        counter.fetch_add(1, Ordering::SeqCst);
        let mut backend = FakeCompletionBackend::new(pieces.clone());
        backend.fail_begin = fail_begin;
        Ok(Box::new(backend) as Box<dyn CompletionBackend>)
    }));

    (engine, loads)
}

fn model_file(temp_dir: &TempDir) -> PathBuf {
    let path = temp_dir.path().join("model.onnx");
    std::fs::write(&path, b"model bytes").expect("should write placeholder model file");
    path
}

#[test]
fn shared_returns_the_same_engine() {
    let first = CompletionEngine::shared();
    let second = CompletionEngine::shared();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn generation_phase_serialization() {
    assert_eq!(GenerationPhase::Idle.to_string(), "Idle");
    assert_eq!(GenerationPhase::Loading.to_string(), "Loading");
    assert_eq!(GenerationPhase::Generating.to_string(), "Generating");
    assert_eq!(GenerationPhase::Finished.to_string(), "Finished");
    assert_eq!(GenerationPhase::Cancelled.to_string(), "Cancelled");
    assert_eq!(GenerationPhase::Failed.to_string(), "Failed");
}

#[tokio::test]
async fn streams_pieces_then_finished() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = model_file(&temp_dir);
    let (engine, _loads) = scripted_engine(&["The capital", " of France", " is Paris."]);

    let events: Vec<CompletionEvent> = engine
        .generate(
            "What is the capital of France?".to_string(),
            &path,
            64,
            CancellationToken::new(),
        )
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            CompletionEvent::Waiting,
            CompletionEvent::Progressing("The capital".to_string()),
            CompletionEvent::Progressing(" of France".to_string()),
            CompletionEvent::Progressing(" is Paris.".to_string()),
            CompletionEvent::Finished("The capital of France is Paris.".to_string()),
        ]
    );
}

#[tokio::test]
async fn missing_model_fails_before_waiting() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let (engine, loads) = scripted_engine(&["unused"]);

    let events: Vec<CompletionEvent> = engine
        .generate(
            "question".to_string(),
            &temp_dir.path().join("missing.onnx"),
            64,
            CancellationToken::new(),
        )
        .collect()
        .await;

    assert_eq!(events.len(), 1);
    assert!(
        matches!(&events[0], CompletionEvent::Failed(message) if message.contains("not found"))
    );
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn loader_failure_emits_failed() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = model_file(&temp_dir);
    let engine = CompletionEngine::with_loader(Arc::new(|_path, _max_output_tokens| {
        Err(RagError::ModelLoad("incompatible model".to_string()))
    }));

    let events: Vec<CompletionEvent> = engine
        .generate(
            "question".to_string(),
            &path,
            64,
            CancellationToken::new(),
        )
        .collect()
        .await;

    assert_eq!(events[0], CompletionEvent::Waiting);
    assert!(
        matches!(&events[1], CompletionEvent::Failed(message) if message.contains("incompatible"))
    );
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, CompletionEvent::Finished(_)))
    );
}

#[tokio::test]
async fn priming_failure_emits_failed_without_finished() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = model_file(&temp_dir);
    let (engine, _loads) = scripted_engine_with(&["unused"], true);

    let events: Vec<CompletionEvent> = engine
        .generate(
            "question".to_string(),
            &path,
            64,
            CancellationToken::new(),
        )
        .collect()
        .await;

    assert_eq!(events[0], CompletionEvent::Waiting);
    assert!(matches!(&events[1], CompletionEvent::Failed(_)));
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn cancellation_before_first_step_finishes_empty() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = model_file(&temp_dir);
    let (engine, _loads) = scripted_engine(&["never", " emitted"]);

    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let events: Vec<CompletionEvent> = engine
        .generate("question".to_string(), &path, 64, cancellation)
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            CompletionEvent::Waiting,
            CompletionEvent::Finished(String::new()),
        ]
    );
}

#[tokio::test]
async fn cancellation_mid_stream_keeps_accumulated_output() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = model_file(&temp_dir);

    let script: Vec<String> = (0..500).map(|_| "x ".to_string()).collect();
    let script_refs: Vec<&str> = script.iter().map(String::as_str).collect();
    let (engine, _loads) = scripted_engine(&script_refs);

    let cancellation = CancellationToken::new();
    let mut stream = engine.generate(
        "question".to_string(),
        &path,
        1024,
        cancellation.clone(),
    );

    let mut received = String::new();
    let mut finished = None;
    while let Some(event) = stream.next().await {
        match event {
            CompletionEvent::Waiting => {}
            CompletionEvent::Progressing(piece) => {
                received.push_str(&piece);
                cancellation.cancel();
            }
            CompletionEvent::Finished(text) => finished = Some(text),
            CompletionEvent::Failed(message) => panic!("unexpected failure: {message}"),
        }
    }

    let finished = finished.expect("should finish after cancellation");
    assert_eq!(finished, received);
    assert!(finished.len() < script.len() * 2);
}

#[tokio::test]
async fn shutdown_stops_live_sessions_with_accumulated_output() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = model_file(&temp_dir);

    let script: Vec<String> = (0..500).map(|_| "x ".to_string()).collect();
    let script_refs: Vec<&str> = script.iter().map(String::as_str).collect();
    let (engine, _loads) = scripted_engine(&script_refs);

    let mut stream = engine.generate(
        "question".to_string(),
        &path,
        1024,
        CancellationToken::new(),
    );

    let mut received = String::new();
    let mut finished = None;
    while let Some(event) = stream.next().await {
        match event {
            CompletionEvent::Waiting => {}
            CompletionEvent::Progressing(piece) => {
                received.push_str(&piece);
                engine.shutdown();
            }
            CompletionEvent::Finished(text) => finished = Some(text),
            CompletionEvent::Failed(message) => panic!("unexpected failure: {message}"),
        }
    }

    let finished = finished.expect("should finish after shutdown");
    assert_eq!(finished, received);
    assert!(finished.len() < script.len() * 2);

    // The engine stays shut down; a later request finishes immediately.
    let events: Vec<CompletionEvent> = engine
        .generate(
            "question".to_string(),
            &path,
            64,
            CancellationToken::new(),
        )
        .collect()
        .await;
    assert_eq!(
        events,
        vec![
            CompletionEvent::Waiting,
            CompletionEvent::Finished(String::new()),
        ]
    );
}

#[tokio::test]
async fn concurrent_sessions_do_not_interleave_decode_state() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = model_file(&temp_dir);
    let (engine, loads) = scripted_engine(&["alpha ", "beta ", "gamma"]);

    let first_stream = engine.generate(
        "first question".to_string(),
        &path,
        64,
        CancellationToken::new(),
    );
    let second_stream = engine.generate(
        "second question".to_string(),
        &path,
        64,
        CancellationToken::new(),
    );

    let (first, second) = tokio::join!(
        first_stream.collect::<Vec<CompletionEvent>>(),
        second_stream.collect::<Vec<CompletionEvent>>(),
    );

    let expected = CompletionEvent::Finished("alpha beta gamma".to_string());
    assert_eq!(first.last(), Some(&expected));
    assert_eq!(second.last(), Some(&expected));
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn model_is_loaded_once_across_requests() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = model_file(&temp_dir);
    let (engine, loads) = scripted_engine(&["once"]);

    for _ in 0..2 {
        let _events: Vec<CompletionEvent> = engine
            .generate(
                "question".to_string(),
                &path,
                64,
                CancellationToken::new(),
            )
            .collect()
            .await;
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unload_forces_reload() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = model_file(&temp_dir);
    let (engine, loads) = scripted_engine(&["again"]);

    let _first: Vec<CompletionEvent> = engine
        .generate(
            "question".to_string(),
            &path,
            64,
            CancellationToken::new(),
        )
        .collect()
        .await;

    engine.unload().await;

    let _second: Vec<CompletionEvent> = engine
        .generate(
            "question".to_string(),
            &path,
            64,
            CancellationToken::new(),
        )
        .collect()
        .await;

    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn empty_pieces_are_skipped() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = model_file(&temp_dir);
    let (engine, _loads) = scripted_engine(&["a", "", "b"]);

    let events: Vec<CompletionEvent> = engine
        .generate(
            "question".to_string(),
            &path,
            64,
            CancellationToken::new(),
        )
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            CompletionEvent::Waiting,
            CompletionEvent::Progressing("a".to_string()),
            CompletionEvent::Progressing("b".to_string()),
            CompletionEvent::Finished("ab".to_string()),
        ]
    );
}
