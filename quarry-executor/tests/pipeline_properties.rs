//! Integration tests: end-to-end properties of the snippet pipeline.
//!
//! Every test drives `Pipeline::run` with real source text through the
//! analyzer, the worker-thread backend and the serializer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use quarry_core::{FailureKind, Outcome, RenderedValue};
use quarry_executor::{
    ExecutionBackend, ExecutionJob, ExecutionLimits, ExecutionOutput, ExecutorError, Pipeline, ThreadBackend,
};
use serde_json::json;

/// Counts jobs before delegating to a worker thread.
#[derive(Clone, Default)]
struct CountingBackend {
    jobs: Arc<AtomicUsize>,
}

impl CountingBackend {
    fn count(&self) -> usize {
        self.jobs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionBackend for CountingBackend {
    async fn execute(&self, job: ExecutionJob) -> Result<ExecutionOutput, ExecutorError> {
        self.jobs.fetch_add(1, Ordering::SeqCst);
        ThreadBackend::new().execute(job).await
    }

    async fn health_check(&self) -> Result<(), ExecutorError> {
        Ok(())
    }
}

fn pipeline() -> Pipeline<ThreadBackend> {
    Pipeline::new(ThreadBackend::new())
}

fn wire(outcome: &Outcome) -> serde_json::Value {
    match serde_json::to_value(outcome) {
        Ok(v) => v,
        Err(e) => panic!("outcome must serialize: {e}"),
    }
}

#[tokio::test]
async fn unsafe_source_never_reaches_the_backend() {
    let backend = CountingBackend::default();
    let pipeline = Pipeline::new(backend.clone());
    for source in [
        "import os",
        "import subprocess\nsubprocess.run(['ls'])",
        "open('/etc/passwd')",
        "f = eval\nf('1')",
        "().__class__.__bases__",
        "x = getattr(1, 'real')",
    ] {
        let outcome = pipeline.run(source).await;
        assert_eq!(
            outcome.failure_kind(),
            Some(FailureKind::UnsafeCode),
            "{source:?} must be rejected"
        );
    }
    assert_eq!(backend.count(), 0, "rejected sources must not be executed");

    assert!(pipeline.run("x = 1").await.is_success());
    assert_eq!(backend.count(), 1);
}

#[tokio::test]
async fn runs_do_not_share_names() {
    let pipeline = pipeline();
    assert!(pipeline.run("leak = 41").await.is_success());
    let second = pipeline.run("y = leak + 1").await;
    assert_eq!(second.failure_kind(), Some(FailureKind::ExecutionError));
    assert!(second.message().is_some_and(|m| m.contains("NameError")));
}

#[tokio::test]
async fn only_a_trailing_bare_name_is_reported() {
    let pipeline = pipeline();
    let shown = pipeline.run("x = 6 * 7\nx").await;
    assert_eq!(
        shown.value(),
        Some(&RenderedValue::Scalar {
            type_name: "int".to_owned(),
            value: "42".to_owned()
        })
    );
    assert_eq!(pipeline.run("x = 6 * 7").await, Outcome::success(None));
    assert_eq!(pipeline.run("x = 6 * 7\nprint(x)").await, Outcome::success(None));
}

#[tokio::test]
async fn disallowed_imports_and_calls_are_named() {
    let pipeline = pipeline();
    let import = pipeline.run("import os").await;
    assert!(import.message().is_some_and(|m| m.contains("ProhibitedImport")));
    let call = pipeline.run("open(\"/etc/passwd\")").await;
    assert!(call.message().is_some_and(|m| m.contains("ProhibitedCall")));
    assert_eq!(wire(&call)["status"], "error");
    assert!(wire(&call)["message"]
        .as_str()
        .is_some_and(|m| m.starts_with("UnsafeCode: ")));
}

#[tokio::test]
async fn tables_serialize_with_type_data_and_shape() {
    let outcome = pipeline()
        .run("import polars as pl\nt = pl.DataFrame({\"a\": [1, 2, 3]})\nt")
        .await;
    assert_eq!(
        wire(&outcome),
        json!({
            "status": "success",
            "result": {"type": "polars.DataFrame", "data": {"a": [1, 2, 3]}, "shape": [3, 1]}
        })
    );
}

#[tokio::test]
async fn runtime_faults_are_contained() {
    let pipeline = pipeline();
    let outcome = pipeline.run("1/0").await;
    assert_eq!(outcome.failure_kind(), Some(FailureKind::ExecutionError));
    assert_eq!(
        wire(&outcome)["message"],
        "ExecutionError: ZeroDivisionError: division by zero"
    );
    assert!(pipeline.run("ok = True").await.is_success());
}

#[tokio::test]
async fn infinite_loops_time_out_and_the_next_run_succeeds() {
    let pipeline = pipeline().with_limits(ExecutionLimits::with_timeout(Duration::from_millis(200)));
    let started = Instant::now();
    let outcome = pipeline.run("while True:\n    pass").await;
    assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "timeout must fire near its bound, took {:?}",
        started.elapsed()
    );

    let next = pipeline.run("x = 1\nx").await;
    assert!(next.is_success(), "a later run must be unaffected: {next:?}");
}

#[tokio::test]
async fn oversized_results_are_refused_before_they_exist() {
    let pipeline = pipeline();
    for source in [
        "s = 'a' * 100000\nr = 'y' * 100000\nx = s.replace('', r)",
        "x = f'{1:>9000000000}'",
        "import polars as pl\na = pl.DataFrame({'k': [1] * 60000})\nx = a.join(a, on='k')",
    ] {
        let outcome = pipeline.run(source).await;
        assert!(
            outcome.message().is_some_and(|m| m.contains("allocation limit")),
            "{source:?} returned {outcome:?}"
        );
    }
    assert!(pipeline.run("ok = 1").await.is_success());
}

#[tokio::test]
async fn repeating_an_empty_sequence_is_immediate() {
    let pipeline = pipeline().with_limits(ExecutionLimits::with_timeout(Duration::from_millis(300)));
    let outcome = pipeline.run("x = [] * 10**18\ny = () * 10**18\nx").await;
    assert_eq!(
        outcome.value(),
        Some(&RenderedValue::Scalar {
            type_name: "list".to_owned(),
            value: "[]".to_owned()
        })
    );
}

#[tokio::test]
async fn syntax_errors_have_their_own_kind() {
    let outcome = pipeline().run("def f():\n    return 1").await;
    assert_eq!(outcome.failure_kind(), Some(FailureKind::SyntaxError));
}

#[tokio::test]
async fn concurrent_runs_are_independent() {
    let pipeline = Arc::new(pipeline());
    let mut handles = Vec::new();
    for i in 0..8i64 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            pipeline.run(&format!("v = {i} * 10\nv")).await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let outcome = match handle.await {
            Ok(o) => o,
            Err(e) => panic!("task {i} failed: {e}"),
        };
        let expected = (i * 10).to_string();
        assert!(
            matches!(outcome.value(), Some(RenderedValue::Scalar { value, .. }) if *value == expected),
            "run {i} returned {outcome:?}"
        );
    }
}
