//! Terminal output for the `sws` CLI
//!
//! Uses `cliclack` for steps, spinners and prompts in interactive terminals,
//! falling back to plain `[OK]`/`[FAIL]` lines in CI and pipes.
//!
//! ```rust,ignore
//! use sws::ui::{self, TaskSpinner, UiContext};
//!
//! let ctx = UiContext::detect();
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Compiling model.stan...");
//! // ... run the job ...
//! spinner.stop("Compiled model.stan");
//! ui::step_ok_detail(&ctx, "Wrote artifacts", "out/");
//! ```

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    diagnostic, intro, key_value, outro_error, outro_success, step_info, step_ok,
    step_ok_detail, step_warn_hint,
};
pub use progress::{TaskSpinner, WaitProgress};
pub use prompts::confirm;
