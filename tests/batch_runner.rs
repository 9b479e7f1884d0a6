mod common;

use common::{Behavior, FakeTool, ladder, page_files, test_config, write_pdf};
use pdf_rasterize::{
    batch::{self, CancelToken, JobRunner, discover_inputs, partition, plan_documents},
    document::DocumentStatus,
    pipeline::Pipeline,
    report::{MemorySink, NullSink, Reporter},
};
use std::path::Path;
use std::sync::atomic::Ordering;

#[test]
fn discovery_is_sorted_and_case_insensitive() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["b.PDF", "a.pdf", "c.Pdf", "notes.txt", "scan.pdf.bak"] {
        std::fs::write(tmp.path().join(name), b"%PDF-1.4\n").unwrap();
    }
    std::fs::create_dir(tmp.path().join("nested.pdf")).unwrap();

    let found: Vec<String> = discover_inputs(tmp.path())
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(found, ["a.pdf", "b.PDF", "c.Pdf"]);
}

#[test]
fn missing_input_dir_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(discover_inputs(&tmp.path().join("nope")).is_err());
}

#[test]
fn stem_collision_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let one = tmp.path().join("one");
    let two = tmp.path().join("two");
    std::fs::create_dir_all(&one).unwrap();
    std::fs::create_dir_all(&two).unwrap();
    let a = write_pdf(&one, "report.pdf", 0);
    let b = write_pdf(&two, "report.pdf", 0);

    let err = plan_documents(&[a, b], &tmp.path().join("out")).unwrap_err();
    assert!(err.to_string().contains("report"));
}

#[test]
fn planned_documents_start_pending_under_out_root() {
    let tmp = tempfile::tempdir().unwrap();
    let pdf = write_pdf(tmp.path(), "deck.pdf", 0);
    let docs = plan_documents(&[pdf], &tmp.path().join("out")).unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].status, DocumentStatus::Pending);
    assert!(docs[0].attempts.is_empty());
    assert!(docs[0].output_dir.is_absolute());
    assert!(docs[0].output_dir.ends_with("out/deck"));
}

#[test]
fn partitions_are_disjoint_and_cover_everything() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs: Vec<_> = (0..7)
        .map(|i| write_pdf(tmp.path(), &format!("d{i}.pdf"), 0))
        .collect();
    let docs = plan_documents(&inputs, &tmp.path().join("out")).unwrap();

    let parts = partition(docs, 3);
    assert_eq!(parts.len(), 3);
    let mut files: Vec<_> = parts.iter().flatten().map(|d| d.file.clone()).collect();
    assert_eq!(files.len(), 7);
    files.sort();
    files.dedup();
    assert_eq!(files.len(), 7);

    let docs = plan_documents(&inputs[..2], &tmp.path().join("out")).unwrap();
    assert_eq!(partition(docs, 8).len(), 2);
}

#[test]
fn runner_processes_documents_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let inputs: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|n| write_pdf(tmp.path(), &format!("{n}.pdf"), 0))
        .collect();

    let pipeline =
        Pipeline::with_tools(&cfg, ladder(vec![FakeTool::new("only", Behavior::Pages(1))])).unwrap();
    let sink = MemorySink::default();
    let reporter = Reporter::new(Box::new(sink.clone()));
    let docs = plan_documents(&inputs, Path::new(&cfg.paths.out_dir)).unwrap();

    let outcome = JobRunner::new(&pipeline, &reporter).run(docs).unwrap();
    assert_eq!(outcome.processed, 3);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.skipped, 0);

    let done: Vec<String> = sink
        .lines()
        .into_iter()
        .filter(|l| l.starts_with("DONE | "))
        .collect();
    assert_eq!(done.len(), 3);
    assert!(done[0].contains("a.pdf"));
    assert!(done[2].contains("c.pdf"));
}

#[test]
fn one_failing_document_does_not_stop_the_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let inputs: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|n| write_pdf(tmp.path(), &format!("{n}.pdf"), 0))
        .collect();

    let tool = FakeTool::new("only", Behavior::Pages(1)).failing_on("b.pdf");
    let calls = tool.calls();
    let pipeline = Pipeline::with_tools(&cfg, ladder(vec![tool])).unwrap();
    let reporter = Reporter::new(Box::new(NullSink));
    let docs = plan_documents(&inputs, Path::new(&cfg.paths.out_dir)).unwrap();

    let outcome = JobRunner::new(&pipeline, &reporter).run(docs).unwrap();

    assert_eq!(outcome.processed, 3);
    assert_eq!(outcome.failed, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let report = reporter.report();
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 2);
    assert!(report.failures[0].contains("b.pdf"));
    assert!(!Path::new(&cfg.paths.out_dir).join("b").exists());
}

#[test]
fn cancellation_leaves_remaining_documents_pending() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let inputs: Vec<_> = (1..=4)
        .map(|i| write_pdf(tmp.path(), &format!("doc{i}.pdf"), 0))
        .collect();

    let cancel = CancelToken::default();
    let trigger = cancel.clone();
    // Request a stop while the first document is mid-attempt.
    let tool = FakeTool::new("only", Behavior::Pages(2)).on_attempt(move || trigger.cancel());
    let calls = tool.calls();
    let pipeline = Pipeline::with_tools(&cfg, ladder(vec![tool])).unwrap();
    let sink = MemorySink::default();
    let reporter = Reporter::new(Box::new(sink.clone()));
    let docs = plan_documents(&inputs, Path::new(&cfg.paths.out_dir)).unwrap();

    let outcome = JobRunner::new(&pipeline, &reporter)
        .with_cancel(cancel)
        .run(docs)
        .unwrap();

    // The in-flight attempt completes; nothing new starts.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.skipped, 3);

    let report = reporter.report();
    assert_eq!(report.total_documents, 4);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.pending, 3);
    assert!(!report.is_clean());
    for doc in report.documents.iter().filter(|d| d.status == DocumentStatus::Pending) {
        assert!(doc.attempts.is_empty());
        assert!(!doc.output_dir.exists());
    }
    assert_eq!(
        sink.lines().iter().filter(|l| l.starts_with("SKIPPED | ")).count(),
        3
    );
}

#[test]
fn forced_cancel_abandons_the_document_in_flight() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let inputs: Vec<_> = (1..=3)
        .map(|i| write_pdf(tmp.path(), &format!("doc{i}.pdf"), 0))
        .collect();

    let cancel = CancelToken::default();
    let trigger = cancel.clone();
    let first = FakeTool::new("first", Behavior::Pages(2)).on_attempt(move || trigger.force());
    let second = FakeTool::new("second", Behavior::Pages(2));
    let second_calls = second.calls();
    let pipeline = Pipeline::with_tools(&cfg, ladder(vec![first, second])).unwrap();
    let sink = MemorySink::default();
    let reporter = Reporter::new(Box::new(sink.clone()));
    let docs = plan_documents(&inputs, Path::new(&cfg.paths.out_dir)).unwrap();

    let outcome = JobRunner::new(&pipeline, &reporter)
        .with_cancel(cancel)
        .run(docs)
        .unwrap();

    assert_eq!(outcome.processed, 0);
    assert_eq!(outcome.skipped, 3);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);

    let report = reporter.report();
    assert_eq!(report.pending, 3);
    assert!(!report.is_clean());
    let interrupted = &report.documents[0];
    assert!(interrupted.file.ends_with("doc1.pdf"));
    assert_eq!(interrupted.attempts.len(), 1);
    assert!(interrupted.pages.is_empty());
    assert!(!interrupted.output_dir.exists());
    assert!(report.documents[1..].iter().all(|d| d.attempts.is_empty()));
    // The killed attempt's pages are gone with its work directory.
    assert_eq!(std::fs::read_dir(pipeline.work_root()).map_or(0, |d| d.count()), 0);
    assert_eq!(
        sink.lines().iter().filter(|l| l.starts_with("SKIPPED | ")).count(),
        3
    );
}

#[test]
fn repeated_interrupts_escalate_to_forced() {
    let cancel = CancelToken::default();
    assert!(!cancel.is_cancelled());

    assert!(!cancel.escalate());
    assert!(cancel.is_cancelled());
    assert!(!cancel.is_forced());

    assert!(cancel.escalate());
    assert!(cancel.is_forced());
    // A later graceful request never downgrades.
    cancel.cancel();
    assert!(cancel.is_forced());
    assert!(cancel.escalate());
}

#[test]
fn partitioned_run_converts_every_document_once() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let inputs: Vec<_> = (0..6)
        .map(|i| write_pdf(tmp.path(), &format!("p{i}.pdf"), 0))
        .collect();

    let tool = FakeTool::new("only", Behavior::Pages(2));
    let calls = tool.calls();
    let pipeline = Pipeline::with_tools(&cfg, ladder(vec![tool])).unwrap();
    let reporter = Reporter::new(Box::new(NullSink));
    let docs = plan_documents(&inputs, Path::new(&cfg.paths.out_dir)).unwrap();

    let outcome = JobRunner::new(&pipeline, &reporter)
        .run_partitioned(docs, 3)
        .unwrap();

    assert_eq!(outcome.processed, 6);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    let report = reporter.report();
    assert_eq!(report.succeeded, 6);
    for doc in &report.documents {
        assert_eq!(page_files(&doc.output_dir).len(), 2);
    }
}

#[test]
fn run_batch_writes_pages_and_cleans_work_root() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let input_dir = tmp.path().join("in");
    std::fs::create_dir_all(&input_dir).unwrap();
    write_pdf(&input_dir, "first.pdf", 2);
    write_pdf(&input_dir, "second.pdf", 2);

    let pipeline = Pipeline::with_tools(
        &cfg,
        ladder(vec![
            FakeTool::new("primary", Behavior::Timeout),
            FakeTool::new("secondary", Behavior::Pages(2)),
        ]),
    )
    .unwrap();
    let reporter = Reporter::new(Box::new(NullSink));
    let out_root = Path::new(&cfg.paths.out_dir);

    let outcome = batch::run_batch(
        &cfg,
        &pipeline,
        &reporter,
        &input_dir,
        out_root,
        CancelToken::default(),
    )
    .unwrap();

    assert_eq!(outcome.processed, 2);
    assert_eq!(page_files(&out_root.join("first")).len(), 2);
    assert_eq!(page_files(&out_root.join("second")).len(), 2);
    assert!(!pipeline.work_root().exists());
    assert_eq!(reporter.report().method_successes.get("secondary"), Some(&2));
}

#[test]
fn empty_input_dir_is_a_clean_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let input_dir = tmp.path().join("in");
    std::fs::create_dir_all(&input_dir).unwrap();

    let pipeline =
        Pipeline::with_tools(&cfg, ladder(vec![FakeTool::new("only", Behavior::Pages(1))])).unwrap();
    let reporter = Reporter::new(Box::new(NullSink));
    let outcome = batch::run_batch(
        &cfg,
        &pipeline,
        &reporter,
        &input_dir,
        Path::new(&cfg.paths.out_dir),
        CancelToken::default(),
    )
    .unwrap();

    assert_eq!(outcome.processed, 0);
    assert!(reporter.report().is_clean());
}
