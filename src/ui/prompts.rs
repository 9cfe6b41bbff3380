//! Yes/no prompts

use super::context::UiContext;
use crate::error::{SwsError, SwsResult};

/// Ask a yes/no question. `--yes` answers yes; without a terminal the
/// default is taken silently.
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> SwsResult<bool> {
    if ctx.auto_yes() {
        eprintln!("  {} (--yes)", message);
        return Ok(true);
    }
    if !ctx.use_fancy_output() {
        return Ok(default);
    }

    let question = message.to_string();
    // cliclack reads stdin synchronously
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(question).initial_value(default).interact()
    })
    .await
    .map_err(|e| SwsError::User(format!("Prompt task failed: {}", e)))?
    .map_err(|e| SwsError::io("reading confirmation", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn yes_flag_overrides_default() {
        let ctx = UiContext::non_interactive().with_auto_yes(true);
        assert!(confirm(&ctx, "Delete 3 jobs?", false).await.unwrap());
    }

    #[tokio::test]
    async fn pipe_takes_default() {
        let ctx = UiContext::non_interactive();
        assert!(confirm(&ctx, "Delete?", true).await.unwrap());
        assert!(!confirm(&ctx, "Delete?", false).await.unwrap());
    }
}
