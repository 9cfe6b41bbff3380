//! Spinners and wait tickers

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

#[derive(Clone, Copy)]
enum Outcome {
    Done,
    Failed,
    Warned,
}

/// Spinner around one blocking step. Without a terminal it prints a start
/// line and a tagged result line.
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if !self.interactive {
            eprintln!("{} {}", style("...").dim(), message);
            return;
        }
        let spinner = cliclack::spinner();
        spinner.start(message);
        self.spinner = Some(spinner);
    }

    pub fn stop(&mut self, message: &str) {
        self.finish(Outcome::Done, message);
    }

    pub fn stop_error(&mut self, message: &str) {
        self.finish(Outcome::Failed, message);
    }

    /// Stop without marking failure, e.g. when the job is left waiting
    pub fn stop_warn(&mut self, message: &str) {
        self.finish(Outcome::Warned, message);
    }

    fn finish(&mut self, outcome: Outcome, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            match outcome {
                Outcome::Failed => spinner.error(message),
                Outcome::Done | Outcome::Warned => spinner.stop(message),
            }
            return;
        }

        let mark = match (outcome, self.interactive) {
            (Outcome::Done, true) => style("✓").green(),
            (Outcome::Done, false) => style("[OK]").green(),
            (Outcome::Failed, true) => style("✗").red(),
            (Outcome::Failed, false) => style("[FAIL]").red(),
            (Outcome::Warned, true) => style("!").yellow(),
            (Outcome::Warned, false) => style("[WARN]").yellow(),
        };
        eprintln!("{} {}", mark, message);
    }
}

/// Elapsed-time ticker shown while a job waits on someone else's build.
///
/// In CI it prints one line when waiting starts and nothing after that.
pub struct WaitProgress {
    bar: Option<ProgressBar>,
}

impl WaitProgress {
    pub fn new(ctx: &UiContext, label: &str) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new_spinner();
            if let Ok(template) = ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} Waiting for {prefix}  {elapsed:.dim}")
            {
                bar.set_style(template.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
            }
            bar.set_prefix(label.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            eprintln!("Waiting for {}...", label);
            None
        };
        Self { bar }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}
