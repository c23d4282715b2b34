//! Build progress reporting for interactive and CI environments.

use std::borrow::Cow;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use derive_more::Deref;
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};

/// Tracks how many of a pipeline's artifacts have finished building.
///
/// - In interactive terminals, displays a normal progress bar.
/// - In non-interactive environments (CI logs, piped output) emits a log
///   line every 5 seconds instead, since a redrawn bar is unreadable there.
#[derive(Deref)]
pub struct BuildProgress {
    #[deref]
    bar: ProgressBar,
    start: Instant,
    handle: Option<JoinHandle<()>>,
    signal: Option<Arc<StopSignal>>,
}

impl BuildProgress {
    /// Creates a tracker for `artifact_count` builds, labelled `message`
    /// (e.g. the pipeline name).
    pub fn new(artifact_count: u64, message: impl Into<Cow<'static, str>>) -> Self {
        let bar = ProgressBar::new(artifact_count);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} artifacts {msg}")
            .expect("invalid progress bar template")
            .progress_chars("=> ");
        bar.set_style(style);
        bar.set_message(message);

        let start = Instant::now();
        if is_interactive() {
            Self {
                bar,
                start,
                handle: None,
                signal: None,
            }
        } else {
            let signal = StopSignal::new();
            let handle = thread::spawn({
                let bar = bar.clone();
                let signal = signal.clone();
                move || {
                    log_status(&bar, start);

                    let interval = Duration::from_secs(5);
                    loop {
                        if signal.wait_timeout(interval) {
                            break;
                        }
                        if bar.is_finished() {
                            break;
                        }
                        log_status(&bar, start);
                    }
                }
            });
            Self {
                bar,
                start,
                handle: Some(handle),
                signal: Some(signal),
            }
        }
    }
}

fn log_status(bar: &ProgressBar, start: Instant) {
    let elapsed = HumanDuration(start.elapsed());
    let pos = bar.position();
    let len = bar.length().unwrap_or(0);
    let msg = bar.message();
    bar.suspend(|| {
        println!("[{elapsed}] [{pos}/{len} artifacts] {msg}");
    });
}

impl Drop for BuildProgress {
    fn drop(&mut self) {
        // Signal the logging thread to stop and wake it up
        if let Some(signal) = &self.signal {
            signal.stop();
        }

        // Wait for the logging thread to complete if it exists
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }

        // In non-interactive mode, log the final state immediately
        if !is_interactive() {
            log_status(&self.bar, self.start);
        }
    }
}

/// A simple signal for stopping a thread using a condition variable.
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stopped: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    /// Wait for the signal or timeout. Returns true if signaled to stop.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let stopped = self.stopped.lock().expect("mutex is poisoned");
        let (stop, _) = self
            .condvar
            .wait_timeout(stopped, timeout)
            .expect("mutex is poisoned");
        *stop
    }

    /// Signal the thread to stop.
    fn stop(&self) {
        let mut stopped = self.stopped.lock().unwrap();
        *stopped = true;
        self.condvar.notify_one();
    }
}

/// Detects if running in an interactive terminal environment.
fn is_interactive() -> bool {
    console::Term::stderr().is_term()
}
