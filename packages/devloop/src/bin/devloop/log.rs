use std::io::BufWriter;
use std::sync::Mutex;
use std::time::Instant;

use clap::ValueEnum;
use color_eyre::Result;
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{Layer as _, layer::SubscriberExt as _};
use tracing_tree::time::FormatTime;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum WhenColor {
    Always,
    Never,
    Auto,
}

pub fn make_logger<W>(writer: W, color: WhenColor) -> Result<impl tracing::Subscriber>
where
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    let ansi = match color {
        WhenColor::Always => true,
        WhenColor::Never => false,
        WhenColor::Auto => console::Term::stderr().is_term(),
    };

    let logger = tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_indent_lines(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_verbose_exit(false)
                .with_verbose_entry(false)
                .with_bracketed_fields(true)
                .with_timer(Uptime::default())
                .with_targets(true)
                .with_writer(writer)
                .with_ansi(ansi),
        )
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_env_var("DEVLOOP_LOG")
                .from_env_lossy(),
        );

    Ok(logger)
}

/// Keeps a `BufWriter<std::fs::File>` type around in case a future file
/// sink is added; unused for the stderr-only path today.
#[allow(dead_code)]
type FileWriter = BufWriter<std::fs::File>;

/// Prints time elapsed since the last tracing event, matching the grounding
/// codebase's `Uptime` timer.
struct Uptime {
    start: Instant,
    prior: Mutex<Instant>,
}

impl Default for Uptime {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            prior: Mutex::new(now),
        }
    }
}

impl FormatTime for Uptime {
    fn format_time(&self, w: &mut impl std::fmt::Write) -> std::fmt::Result {
        write!(w, "{:.03}s", self.start.elapsed().as_secs_f64())
    }

    fn style_timestamp(
        &self,
        _ansi: bool,
        _elapsed: std::time::Duration,
        w: &mut impl std::fmt::Write,
    ) -> std::fmt::Result {
        let mut prior = self.prior.lock().expect("uptime mutex poisoned");
        let elapsed = prior.elapsed().as_millis();
        *prior = Instant::now();
        write!(w, "{elapsed: >3}ms")
    }
}
