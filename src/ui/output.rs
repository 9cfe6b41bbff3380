//! Step and banner output
//!
//! Everything here writes to stderr. Stdout is reserved for command results
//! (job JSON, artifact bytes, tables) so it stays machine-readable.

use super::context::UiContext;
use console::{style, StyledObject};

#[derive(Clone, Copy)]
enum Mark {
    Ok,
    Warn,
    Info,
    Error,
}

impl Mark {
    fn tag(self) -> StyledObject<&'static str> {
        match self {
            Mark::Ok => style("[OK]").green(),
            Mark::Warn => style("[WARN]").yellow(),
            Mark::Info => style("[INFO]").cyan(),
            Mark::Error => style("[ERROR]").red(),
        }
    }
}

/// One indented step line. cliclack draws its own gutter, the plain
/// fallback prefixes a bracketed tag.
fn step(ctx: &UiContext, mark: Mark, text: String) {
    if !ctx.use_fancy_output() {
        eprintln!("  {} {}", mark.tag(), console::strip_ansi_codes(&text));
        return;
    }
    let drawn = match mark {
        Mark::Ok => cliclack::log::success(text),
        Mark::Warn => cliclack::log::warning(text),
        Mark::Info => cliclack::log::info(text),
        Mark::Error => cliclack::log::error(text),
    };
    drawn.ok();
}

pub fn intro(ctx: &UiContext, title: &str) {
    let title = style(title).cyan().bold();
    if ctx.use_fancy_output() {
        cliclack::intro(title).ok();
    } else {
        eprintln!("{}", title);
    }
}

/// Closing line for a command that shows a banner
pub fn outro_success(ctx: &UiContext, message: &str) {
    outro(ctx, Mark::Ok, style(message).green().bold());
}

pub fn outro_error(ctx: &UiContext, message: &str) {
    outro(ctx, Mark::Error, style(message).red().bold());
}

fn outro(ctx: &UiContext, mark: Mark, message: StyledObject<&str>) {
    if ctx.use_fancy_output() {
        cliclack::outro(message).ok();
    } else {
        eprintln!("{} {}", mark.tag(), message);
    }
}

pub fn step_ok(ctx: &UiContext, message: &str) {
    step(ctx, Mark::Ok, message.to_string());
}

/// Success step with a dimmed detail, usually a path
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    step(ctx, Mark::Ok, format!("{} ({})", message, style(detail).dim()));
}

pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    step(ctx, Mark::Warn, format!("{} - {}", message, style(hint).dim()));
}

pub fn step_info(ctx: &UiContext, message: &str) {
    step(ctx, Mark::Info, message.to_string());
}

/// Multi-line block such as the tail of a failed toolchain run
pub fn diagnostic(ctx: &UiContext, title: &str, body: &str) {
    let body = body.trim_end();
    if ctx.use_fancy_output() {
        cliclack::note(title, body).ok();
        return;
    }
    eprintln!("{}:", style(title).bold());
    body.lines().for_each(|line| eprintln!("  {}", line));
}

/// `key: value` row on stdout, used by `cache show` and `config path`
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    let key = if ctx.use_fancy_output() {
        style(key).dim().to_string()
    } else {
        key.to_string()
    };
    println!("  {}: {}", key, value);
}
