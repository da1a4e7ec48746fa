use async_trait::async_trait;
use segment_digest::pipeline::{
    Pipeline, PipelineError, PipelineSettings, RunStatus, SegmentError, SegmentStatus, Stage,
};
use segment_digest::store::{Segment, SegmentStore, StoreError};
use segment_digest::stt::{
    JobFailure, JobId, SubmissionError, TranscriptionClient, TranscriptionError,
    TranscriptionResult,
};
use segment_digest::summary::{GenerationError, SummaryClient};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Behavior {
    Complete { delay_ms: u64 },
    TimeOut,
    Incomplete,
    RejectSubmit(u16),
    RateLimitedOnce,
    ReturnJobId(&'static str),
}

struct FakeTranscriber {
    behaviors: HashMap<String, Behavior>,
    submits: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, usize>>,
    jobs: Mutex<HashMap<String, String>>,
    cancel_on_poll: Option<CancellationToken>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeTranscriber {
    fn new(behaviors: &[(&str, Behavior)]) -> Arc<Self> {
        Self::build(behaviors, None)
    }

    /// Cancels `token` as soon as the first job starts polling
    fn cancelling(behaviors: &[(&str, Behavior)], token: CancellationToken) -> Arc<Self> {
        Self::build(behaviors, Some(token))
    }

    fn build(behaviors: &[(&str, Behavior)], cancel_on_poll: Option<CancellationToken>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors
                .iter()
                .map(|(id, b)| (id.to_string(), b.clone()))
                .collect(),
            submits: Mutex::new(Vec::new()),
            attempts: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            cancel_on_poll,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    fn behavior(&self, segment_id: &str) -> Behavior {
        self.behaviors
            .get(segment_id)
            .cloned()
            .unwrap_or(Behavior::Complete { delay_ms: 0 })
    }

    fn submitted(&self) -> Vec<String> {
        let mut submits = self.submits.lock().unwrap().clone();
        submits.sort();
        submits
    }
}

fn complete_result(segment_id: &str) -> TranscriptionResult {
    let mut result = TranscriptionResult {
        transcript: Some(format!("{} transcript", segment_id)),
        summary: Some(format!("{} summary", segment_id)),
        sentiment: Some(serde_json::json!({ "label": "neutral" })),
        ..Default::default()
    };
    result
        .translations
        .insert("en".to_string(), format!("{} translation", segment_id));
    result
}

#[async_trait]
impl TranscriptionClient for FakeTranscriber {
    async fn submit(&self, segment: &Segment) -> Result<JobId, SubmissionError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(segment.id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        match self.behavior(&segment.id) {
            Behavior::RejectSubmit(status) => {
                return Err(SubmissionError::Rejected {
                    status,
                    body: "rejected".to_string(),
                })
            }
            Behavior::RateLimitedOnce if attempt == 1 => return Err(SubmissionError::RateLimited),
            _ => {}
        }

        let job_id = match self.behavior(&segment.id) {
            Behavior::ReturnJobId(id) => id.to_string(),
            _ => format!("job-{}", segment.id),
        };
        self.jobs
            .lock()
            .unwrap()
            .insert(job_id.clone(), segment.id.clone());
        self.submits.lock().unwrap().push(segment.id.clone());
        Ok(JobId::new(job_id))
    }

    async fn await_completion(
        &self,
        job_id: &JobId,
    ) -> Result<TranscriptionResult, TranscriptionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_poll {
            token.cancel();
        }

        let segment_id = self.jobs.lock().unwrap()[job_id.as_str()].clone();
        let outcome = match self.behavior(&segment_id) {
            Behavior::Complete { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(complete_result(&segment_id))
            }
            Behavior::TimeOut => Err(TranscriptionError::new(
                job_id.clone(),
                JobFailure::TimedOut(Duration::from_secs(900)),
            )),
            Behavior::Incomplete => Ok(TranscriptionResult {
                transcript: Some("only a transcript".to_string()),
                ..Default::default()
            }),
            _ => Ok(complete_result(&segment_id)),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn name(&self) -> &str {
        "fake-stt"
    }
}

struct FakeSummarizer {
    fail: bool,
    staging_dir: PathBuf,
    prompts: Mutex<Vec<String>>,
    staged_at_call: Mutex<Vec<Vec<String>>>,
}

impl FakeSummarizer {
    fn new(staging_dir: &Path, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            staging_dir: staging_dir.to_path_buf(),
            prompts: Mutex::new(Vec::new()),
            staged_at_call: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn staged_at_call(&self) -> Vec<Vec<String>> {
        self.staged_at_call.lock().unwrap().clone()
    }
}

#[async_trait]
impl SummaryClient for FakeSummarizer {
    async fn generate_composite(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.staged_at_call
            .lock()
            .unwrap()
            .push(list_dir(&self.staging_dir));

        if self.fail {
            return Err(GenerationError::RateLimited);
        }
        Ok(format!("composite of {} chars", prompt.len()))
    }

    fn name(&self) -> &str {
        "fake-llm"
    }
}

struct Fixture {
    root: TempDir,
}

impl Fixture {
    fn new(segments: &[&str]) -> Self {
        let root = TempDir::new().unwrap();
        let input = root.path().join("audio_chunks");
        std::fs::create_dir_all(&input).unwrap();
        for id in segments {
            std::fs::write(input.join(format!("{}.mp3", id)), b"ID3 fake audio").unwrap();
        }
        Self { root }
    }

    fn input_dir(&self) -> PathBuf {
        self.root.path().join("audio_chunks")
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.path().join("tmp")
    }

    fn output_path(&self) -> PathBuf {
        self.root.path().join("composite_summary.txt")
    }

    fn store(&self) -> SegmentStore {
        SegmentStore::new(self.input_dir(), self.staging_dir(), self.output_path(), "mp3")
    }

    fn pipeline(
        &self,
        transcriber: Arc<FakeTranscriber>,
        summarizer: Arc<FakeSummarizer>,
        settings: PipelineSettings,
    ) -> Pipeline {
        Pipeline::new(self.store(), transcriber, summarizer, settings)
    }
}

fn settings(max_in_flight: usize) -> PipelineSettings {
    PipelineSettings {
        max_in_flight,
        submit_retry_base_delay: Duration::from_millis(1),
        ..PipelineSettings::default()
    }
}

fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

#[tokio::test]
async fn test_all_segments_succeed() {
    let fx = Fixture::new(&["a", "b", "c"]);
    let stt = FakeTranscriber::new(&[]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);
    let pipeline = fx.pipeline(stt.clone(), llm.clone(), settings(4));

    let report = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.succeeded, vec!["a", "b", "c"]);
    assert!(report.failures.is_empty());
    assert_eq!(stt.submitted(), vec!["a", "b", "c"]);
    assert_eq!(
        std::fs::read_to_string(fx.output_path()).unwrap(),
        report.composite
    );
    assert!(list_dir(&fx.input_dir()).is_empty());
    assert!(list_dir(&fx.staging_dir()).is_empty());
    assert_eq!(report.metrics.get_success_count(Stage::Persist), 3);
}

#[tokio::test]
async fn test_timed_out_segment_degrades_run() {
    let fx = Fixture::new(&["a", "b", "c"]);
    let stt = FakeTranscriber::new(&[("b", Behavior::TimeOut)]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);
    let pipeline = fx.pipeline(stt, llm.clone(), settings(4));

    let report = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(
        report.status,
        RunStatus::Degraded {
            failed: vec!["b".to_string()]
        }
    );
    assert_eq!(report.failed_ids(), vec!["b"]);
    assert!(matches!(
        report.failures[0].error,
        SegmentError::Transcription(ref e) if e.is_timeout()
    ));

    // Only a and c were staged when the composite was requested.
    assert_eq!(
        llm.staged_at_call(),
        vec![vec!["job-a.json".to_string(), "job-c.json".to_string()]]
    );

    let prompt = &llm.prompts()[0];
    assert!(prompt.contains("Transcriptions:\na transcript\nc transcript\n\n"));
    assert!(prompt.contains("Translations:\na translation\nc translation\n\n"));
    assert!(prompt.ends_with("Summaries:\na summary\nc summary"));
    assert!(!prompt.contains("b transcript"));

    // The failed segment's source is never deleted.
    assert_eq!(list_dir(&fx.input_dir()), vec!["b.mp3"]);
}

#[tokio::test]
async fn test_prompt_is_independent_of_completion_order() {
    let ids = ["a", "b", "c", "d"];

    let mut prompts = Vec::new();
    for delays in [[5u64, 40, 80, 120], [120, 80, 40, 5]] {
        let fx = Fixture::new(&ids);
        let behaviors: Vec<(&str, Behavior)> = ids
            .iter()
            .zip(delays)
            .map(|(id, delay_ms)| (*id, Behavior::Complete { delay_ms }))
            .collect();
        let stt = FakeTranscriber::new(&behaviors);
        let llm = FakeSummarizer::new(&fx.staging_dir(), false);

        fx.pipeline(stt, llm.clone(), settings(4))
            .run(&CancellationToken::new())
            .await
            .unwrap();

        prompts.push(llm.prompts().remove(0));
    }

    assert_eq!(prompts[0], prompts[1]);
}

#[tokio::test]
async fn test_zero_successes_is_fatal_without_generation() {
    let fx = Fixture::new(&["a", "b"]);
    let stt = FakeTranscriber::new(&[("a", Behavior::TimeOut), ("b", Behavior::Incomplete)]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);
    let pipeline = fx.pipeline(stt, llm.clone(), settings(2));

    let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();

    match err {
        PipelineError::AllSegmentsFailed { failures } => {
            let ids: Vec<&str> = failures.iter().map(|f| f.segment_id.as_str()).collect();
            assert_eq!(ids, vec!["a", "b"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(llm.prompts().is_empty());
    assert!(!fx.output_path().exists());
    assert_eq!(list_dir(&fx.input_dir()), vec!["a.mp3", "b.mp3"]);
}

#[tokio::test]
async fn test_incomplete_result_is_a_failure() {
    let fx = Fixture::new(&["a", "b"]);
    let stt = FakeTranscriber::new(&[("a", Behavior::Incomplete)]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);
    let pipeline = fx.pipeline(stt, llm.clone(), settings(2));

    let report = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.succeeded, vec!["b"]);
    match &report.failures[0].error {
        SegmentError::IncompleteResult { job_id, missing } => {
            assert_eq!(job_id.as_str(), "job-a");
            assert_eq!(missing, &vec!["translation.en".to_string(), "summary".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!llm.prompts()[0].contains("only a transcript"));
    assert_eq!(list_dir(&fx.input_dir()), vec!["a.mp3"]);
}

#[tokio::test]
async fn test_generation_failure_keeps_staged_results() {
    let fx = Fixture::new(&["a", "b"]);
    let stt = FakeTranscriber::new(&[]);
    let failing = FakeSummarizer::new(&fx.staging_dir(), true);
    let pipeline = fx.pipeline(stt.clone(), failing, settings(2));

    let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Generation { staged: 2, .. }));
    assert_eq!(
        list_dir(&fx.staging_dir()),
        vec!["job-a.json", "job-b.json"]
    );
    assert!(!fx.output_path().exists());

    // Aggregation alone can be retried without transcribing again.
    let working = FakeSummarizer::new(&fx.staging_dir(), false);
    let retry = fx.pipeline(stt.clone(), working.clone(), settings(2));
    let report = retry.aggregate_staged().await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.succeeded, vec!["a", "b"]);
    assert_eq!(stt.submitted(), vec!["a", "b"]);
    assert!(list_dir(&fx.staging_dir()).is_empty());
    assert!(fx.output_path().exists());
}

#[tokio::test]
async fn test_stale_staged_results_are_not_aggregated() {
    let fx = Fixture::new(&["a"]);
    fx.store()
        .persist_result(&JobId::new("old-job"), "zz-previous", &complete_result("stale"))
        .await
        .unwrap();

    let stt = FakeTranscriber::new(&[]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);
    let report = fx
        .pipeline(stt, llm.clone(), settings(2))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec!["a"]);
    assert!(!llm.prompts()[0].contains("stale"));
}

#[tokio::test]
async fn test_in_flight_work_is_bounded() {
    let ids: Vec<String> = (0..12).map(|i| format!("seg{:02}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let fx = Fixture::new(&id_refs);

    let behaviors: Vec<(&str, Behavior)> = id_refs
        .iter()
        .map(|id| (*id, Behavior::Complete { delay_ms: 25 }))
        .collect();
    let stt = FakeTranscriber::new(&behaviors);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);

    let report = fx
        .pipeline(stt.clone(), llm, settings(3))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded.len(), 12);
    assert_eq!(stt.submitted().len(), 12);
    assert!(stt.peak_in_flight.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_retryable_submission_is_retried() {
    let fx = Fixture::new(&["a"]);
    let stt = FakeTranscriber::new(&[("a", Behavior::RateLimitedOnce)]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);

    let report = fx
        .pipeline(stt, llm, settings(1))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.metrics.submit_retries(), 1);
}

#[tokio::test]
async fn test_open_circuit_stops_further_submissions() {
    let fx = Fixture::new(&["a", "b", "c"]);
    let stt = FakeTranscriber::new(&[
        ("a", Behavior::RejectSubmit(502)),
        ("b", Behavior::RejectSubmit(502)),
    ]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);
    let settings = PipelineSettings {
        max_in_flight: 1,
        submit_max_retries: 0,
        breaker_threshold: 1,
        ..PipelineSettings::default()
    };

    let err = fx
        .pipeline(stt.clone(), llm.clone(), settings)
        .run(&CancellationToken::new())
        .await
        .unwrap_err();

    let PipelineError::AllSegmentsFailed { failures } = err else {
        panic!("expected every segment to fail");
    };
    assert!(failures
        .iter()
        .any(|f| matches!(f.error, SegmentError::Submission(SubmissionError::CircuitOpen))));
    assert!(stt.submitted().is_empty());
    assert!(llm.prompts().is_empty());
}

#[tokio::test]
async fn test_cancelled_run_submits_nothing() {
    let fx = Fixture::new(&["a", "b"]);
    let stt = FakeTranscriber::new(&[]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = fx
        .pipeline(stt.clone(), llm.clone(), settings(2))
        .run(&cancel)
        .await
        .unwrap_err();

    match err {
        PipelineError::Cancelled { staged, failures } => {
            assert_eq!(staged, 0);
            assert!(failures
                .iter()
                .all(|f| matches!(f.error, SegmentError::Cancelled)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(stt.submitted().is_empty());
    assert_eq!(list_dir(&fx.input_dir()), vec!["a.mp3", "b.mp3"]);
}

#[tokio::test]
async fn test_progress_reaches_a_terminal_state_for_every_segment() {
    let fx = Fixture::new(&["a", "b"]);
    let stt = FakeTranscriber::new(&[("b", Behavior::TimeOut)]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let pipeline = fx.pipeline(stt, llm, settings(2)).with_progress(tx);
    pipeline.run(&CancellationToken::new()).await.unwrap();
    drop(pipeline);

    let mut last: HashMap<String, SegmentStatus> = HashMap::new();
    let mut seen_polling = false;
    while let Some(update) = rx.recv().await {
        seen_polling |= update.status == SegmentStatus::Polling;
        last.insert(update.segment_id, update.status);
    }

    assert!(seen_polling);
    assert_eq!(last["a"], SegmentStatus::Done);
    assert!(matches!(last["b"], SegmentStatus::Failed(_)));
}

#[tokio::test]
async fn test_empty_input_is_reported() {
    let fx = Fixture::new(&[]);
    let stt = FakeTranscriber::new(&[]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);

    let err = fx
        .pipeline(stt, llm, settings(2))
        .run(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoPendingSegments(_)));
}

#[tokio::test]
async fn test_foreign_files_in_staging_do_not_break_the_run() {
    let fx = Fixture::new(&["a", "b"]);
    std::fs::create_dir_all(fx.staging_dir()).unwrap();
    std::fs::write(fx.staging_dir().join("notes.json"), br#"{"unrelated":true}"#).unwrap();

    let stt = FakeTranscriber::new(&[]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);
    let report = fx
        .pipeline(stt, llm.clone(), settings(2))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.succeeded, vec!["a", "b"]);
    assert_eq!(llm.prompts().len(), 1);
    assert_eq!(list_dir(&fx.staging_dir()), vec!["notes.json"]);
}

#[tokio::test]
async fn test_recovery_skips_foreign_files_in_staging() {
    let fx = Fixture::new(&[]);
    let store = fx.store();
    store
        .persist_result(&JobId::new("job-a"), "a", &complete_result("a"))
        .await
        .unwrap();
    std::fs::write(fx.staging_dir().join("notes.json"), br#"{"unrelated":true}"#).unwrap();

    let stt = FakeTranscriber::new(&[]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);
    let report = fx
        .pipeline(stt, llm.clone(), settings(2))
        .aggregate_staged()
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec!["a"]);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("notes.json"));
    assert!(llm.prompts()[0].contains("a transcript"));
}

#[tokio::test]
async fn test_unsafe_job_id_keeps_the_segment_source() {
    let fx = Fixture::new(&["a", "b"]);
    let stt = FakeTranscriber::new(&[("a", Behavior::ReturnJobId("../escaped-a"))]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);

    let report = fx
        .pipeline(stt, llm, settings(2))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed_ids(), vec!["a"]);
    assert!(matches!(
        report.failures[0].error,
        SegmentError::Persistence(StoreError::InvalidJobId { .. })
    ));
    assert_eq!(list_dir(&fx.input_dir()), vec!["a.mp3"]);
    assert_eq!(
        list_dir(fx.root.path()),
        vec!["audio_chunks", "composite_summary.txt", "tmp"]
    );
}

#[tokio::test]
async fn test_persistence_failure_only_fails_that_segment() {
    let fx = Fixture::new(&["a", "b", "c"]);
    // A directory squatting on b's staged file name makes the final rename fail.
    std::fs::create_dir_all(fx.staging_dir().join("job-b.json")).unwrap();

    let stt = FakeTranscriber::new(&[]);
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);
    let report = fx
        .pipeline(stt, llm.clone(), settings(3))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.status,
        RunStatus::Degraded {
            failed: vec!["b".to_string()]
        }
    );
    assert!(matches!(
        report.failures[0].error,
        SegmentError::Persistence(StoreError::Io { .. })
    ));
    assert_eq!(report.succeeded, vec!["a", "c"]);
    assert!(llm.prompts()[0].contains("Transcriptions:\na transcript\nc transcript\n\n"));
    assert_eq!(list_dir(&fx.input_dir()), vec!["b.mp3"]);
}

#[tokio::test]
async fn test_cancel_lets_polling_jobs_finish_staging() {
    let fx = Fixture::new(&["a", "b"]);
    let cancel = CancellationToken::new();
    let stt = FakeTranscriber::cancelling(
        &[("a", Behavior::Complete { delay_ms: 50 })],
        cancel.clone(),
    );
    let llm = FakeSummarizer::new(&fx.staging_dir(), false);

    let err = fx
        .pipeline(stt.clone(), llm.clone(), settings(1))
        .run(&cancel)
        .await
        .unwrap_err();

    match err {
        PipelineError::Cancelled { staged, failures } => {
            assert_eq!(staged, 1);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].segment_id, "b");
            assert!(matches!(failures[0].error, SegmentError::Cancelled));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // a was already polling: it is staged and its source is gone.
    assert_eq!(list_dir(&fx.staging_dir()), vec!["job-a.json"]);
    assert_eq!(list_dir(&fx.input_dir()), vec!["b.mp3"]);
    assert_eq!(stt.submitted(), vec!["a"]);
    assert!(llm.prompts().is_empty());
}
