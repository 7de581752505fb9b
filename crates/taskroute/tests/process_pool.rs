//! Process affinity against the real `taskroute-worker` binary.

use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::FuturesUnordered;

use serde_json::json;
use taskroute::prelude::*;

fn worker_pool(size: usize) -> ProcessPoolConfig {
    ProcessPoolConfig::new(env!("CARGO_BIN_EXE_taskroute-worker")).pool(PoolConfig::new(size))
}

fn dispatcher(size: usize) -> Dispatcher {
    Dispatcher::builder()
        .thread_pool_size(1)
        .process_pool(worker_pool(size))
        .build()
        .unwrap()
}

#[tokio::test]
async fn jobs_round_trip_through_worker_processes() {
    let dispatcher = dispatcher(1);
    assert!(dispatcher.supports(Affinity::Process));

    let echo = dispatcher
        .submit(Task::process("echo", json!({"lines": [1, 2, 3]})))
        .unwrap();
    assert_eq!(echo.await.unwrap(), json!({"lines": [1, 2, 3]}));

    let length = dispatcher
        .submit(Task::process(
            "name_length",
            json!({"name": "quarterly-report.pdf", "delay_ms": 10}),
        ))
        .unwrap();
    assert_eq!(length.await.unwrap(), json!(20));

    let stats = dispatcher.stats();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.process_pool.unwrap().size, 1);
    dispatcher.shutdown();
}

#[tokio::test]
async fn process_jobs_run_in_parallel() {
    let dispatcher = dispatcher(3);
    let mut group = TaskGroup::new();
    for _ in 0..3 {
        group
            .submit(&dispatcher, Task::process("sleep", json!({"ms": 300})))
            .unwrap();
    }

    let report = group.join_all().await;
    assert!(report.elapsed >= Duration::from_millis(300));
    assert!(report.elapsed < Duration::from_millis(850), "took {:?}", report.elapsed);
    assert_eq!(report.into_outputs().unwrap(), vec![json!({"slept_ms": 300}); 3]);
    dispatcher.shutdown();
}

#[tokio::test]
async fn process_work_does_not_stall_the_scheduler() {
    let dispatcher = dispatcher(1);
    let job = dispatcher
        .submit(Task::process("sleep", json!({"ms": 300})))
        .unwrap();

    let submitted = Instant::now();
    let marker = dispatcher
        .submit(Task::cooperative(move || async move {
            Ok(json!(submitted.elapsed().as_millis() as u64))
        }))
        .unwrap();
    assert!(marker.await.unwrap().as_u64().unwrap() < 100);
    assert!(job.await.is_ok());
    dispatcher.shutdown();
}

#[tokio::test]
async fn job_errors_and_panics_fail_only_their_task() {
    let dispatcher = dispatcher(1);

    let failed = dispatcher
        .submit(Task::process("fail", json!({"message": "corrupt upload"})))
        .unwrap();
    let panicked = dispatcher.submit(Task::process("panic", json!(null))).unwrap();
    let unknown = dispatcher.submit(Task::process("transcode", json!({}))).unwrap();
    let healthy = dispatcher.submit(Task::process("echo", json!("still here"))).unwrap();

    assert_eq!(
        failed.await,
        Err(DispatchError::TaskFailure("corrupt upload".to_string()))
    );
    assert_eq!(
        panicked.await,
        Err(DispatchError::TaskFailure(
            "panicked: job panicked on request".to_string()
        ))
    );
    assert!(matches!(
        unknown.await,
        Err(DispatchError::TaskFailure(msg)) if msg.contains("unknown job 'transcode'")
    ));
    assert_eq!(healthy.await.unwrap(), json!("still here"));
    dispatcher.shutdown();
}

#[tokio::test]
async fn dead_worker_is_replaced() {
    let dispatcher = dispatcher(1);

    let crashed = dispatcher
        .submit(Task::process("exit", json!({"code": 3})))
        .unwrap();
    assert!(matches!(
        crashed.await,
        Err(DispatchError::TaskFailure(msg)) if msg.starts_with("worker process failed")
    ));

    let next = dispatcher.submit(Task::process("echo", json!(42))).unwrap();
    assert_eq!(next.await.unwrap(), json!(42));
    dispatcher.shutdown();
}

#[tokio::test]
async fn single_worker_completes_jobs_in_submission_order() {
    let dispatcher = dispatcher(1);

    // Later jobs are shorter, so any overtaking would reorder completions.
    let mut pending = FuturesUnordered::new();
    for index in 0..5u64 {
        let handle = dispatcher
            .submit(Task::process("sleep", json!({"ms": (5 - index) * 20})))
            .unwrap();
        pending.push(async move { (index, handle.await) });
    }

    let mut completed = Vec::new();
    while let Some((index, result)) = pending.next().await {
        assert!(result.is_ok(), "job {index}: {result:?}");
        completed.push(index);
    }
    assert_eq!(completed, vec![0, 1, 2, 3, 4]);
    dispatcher.shutdown();
}

#[tokio::test]
async fn overrunning_job_is_killed_and_worker_replaced() {
    let dispatcher = Dispatcher::builder()
        .thread_pool_size(1)
        .process_pool(worker_pool(1).job_timeout(Duration::from_millis(200)))
        .build()
        .unwrap();

    let started = Instant::now();
    let stuck = dispatcher
        .submit(Task::process("sleep", json!({"ms": 5000})))
        .unwrap();
    assert!(matches!(
        stuck.await,
        Err(DispatchError::TaskFailure(msg)) if msg.contains("timed out")
    ));
    assert!(started.elapsed() < Duration::from_secs(2));

    let next = dispatcher.submit(Task::process("echo", json!("fresh"))).unwrap();
    assert_eq!(next.await.unwrap(), json!("fresh"));

    // Nothing is left running, so shutdown returns promptly.
    let stopping = Instant::now();
    dispatcher.shutdown();
    assert!(stopping.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn pending_job_can_be_cancelled() {
    let dispatcher = dispatcher(1);
    let busy = dispatcher
        .submit(Task::process("sleep", json!({"ms": 150})))
        .unwrap();
    assert_eq!(busy.started().await, TaskState::Running);

    let queued = dispatcher.submit(Task::process("echo", json!(1))).unwrap();
    assert!(queued.cancel());
    assert!(matches!(queued.await, Err(DispatchError::Cancelled(_))));
    assert!(busy.await.is_ok());
    dispatcher.shutdown();
}

#[tokio::test]
async fn rejecting_process_pool_reports_exhaustion() {
    let dispatcher = Dispatcher::builder()
        .thread_pool_size(1)
        .process_pool(
            worker_pool(1).pool(
                PoolConfig::new(1)
                    .queue_depth(0)
                    .saturation(SaturationPolicy::Reject),
            ),
        )
        .build()
        .unwrap();

    let busy = dispatcher
        .submit(Task::process("sleep", json!({"ms": 200})))
        .unwrap();
    let err = dispatcher
        .submit(Task::process("echo", json!(null)))
        .unwrap_err();
    assert_eq!(
        err,
        DispatchError::ResourceExhausted {
            pool: "process",
            capacity: 1
        }
    );
    assert!(busy.await.is_ok());
    dispatcher.shutdown();
}

#[test]
fn unstartable_worker_program_fails_build() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let err = Dispatcher::builder()
        .thread_pool_size(1)
        .runtime(runtime.handle().clone())
        .process_pool(ProcessPoolConfig::new("/nonexistent/taskroute-worker"))
        .build()
        .unwrap_err();
    assert!(matches!(err, DispatchError::Configuration(_)));
}
