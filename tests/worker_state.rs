//! Worker lifecycle integration tests.
//!
//! The property that matters most: a Stop issued while the job is Paused
//! still terminates tracked child processes and lands in Stopped.

use bookshot::worker::{WorkerHandle, WorkerState};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn stop_while_paused_terminates_tracked_child() {
    let handle = WorkerHandle::new();
    let worker = handle.clone();
    let thread = std::thread::spawn(move || {
        worker.run_job(|w| {
            // a long-running external process, as tesseract would be
            let output = w.run_tracked(Command::new("sleep").arg("30"))?;
            eprintln!("[TEST] child exited: {}", output.status);
            w.checkpoint()?;
            anyhow::ensure!(output.status.success(), "sleep was not stopped cleanly");
            Ok(())
        })
    });

    // let the job spawn and register the child
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(handle.state(), WorkerState::Running);

    handle.pause();
    assert_eq!(handle.state(), WorkerState::Paused);

    let stop_at = Instant::now();
    handle.stop();
    thread.join().unwrap().unwrap();

    assert!(
        stop_at.elapsed() < Duration::from_secs(10),
        "stop took {:?} — the child was not terminated",
        stop_at.elapsed()
    );
    assert_eq!(handle.state(), WorkerState::Stopped);
}

#[test]
fn pause_blocks_checkpoints_until_resume_or_stop() {
    let progress = Arc::new(AtomicUsize::new(0));
    let handle = WorkerHandle::new();
    let worker = handle.clone();
    let counter = Arc::clone(&progress);
    let thread = std::thread::spawn(move || {
        worker.run_job(|w| loop {
            w.checkpoint()?;
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
        })
    });

    std::thread::sleep(Duration::from_millis(100));
    assert!(progress.load(Ordering::SeqCst) > 0, "job never made progress");

    handle.pause();
    // let the loop settle into the blocked checkpoint
    std::thread::sleep(Duration::from_millis(200));
    let frozen = progress.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(
        progress.load(Ordering::SeqCst),
        frozen,
        "checkpoint did not block while paused"
    );

    handle.stop();
    thread.join().unwrap().unwrap();
    assert_eq!(handle.state(), WorkerState::Stopped);
}

#[test]
fn tracked_child_output_is_captured() {
    let handle = WorkerHandle::new();
    handle
        .run_job(|w| {
            let output = w.run_tracked(Command::new("echo").arg("hello"))?;
            anyhow::ensure!(output.status.success());
            anyhow::ensure!(
                String::from_utf8_lossy(&output.stdout).trim() == "hello",
                "unexpected stdout"
            );
            Ok(())
        })
        .unwrap();
    assert_eq!(handle.state(), WorkerState::Finished);
}
