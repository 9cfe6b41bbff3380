//! Terminal detection

use std::io::IsTerminal;

/// Set by the CI systems we have seen `sws build` run under
const CI_VARS: [&str; 9] = [
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "TRAVIS",
    "JENKINS_URL",
    "BUILDKITE",
    "TEAMCITY_VERSION",
    "TF_BUILD",
];

/// Whether output gets spinners and prompts or plain tagged lines
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    terminal: bool,
    assume_yes: bool,
}

impl UiContext {
    /// Only stderr and stdin need to be terminals: job commands print JSON on
    /// stdout and are routinely piped.
    pub fn detect() -> Self {
        let terminal = std::io::stderr().is_terminal()
            && std::io::stdin().is_terminal()
            && !running_in_ci(|var| std::env::var_os(var).is_some());
        Self {
            terminal,
            assume_yes: false,
        }
    }

    pub fn non_interactive() -> Self {
        Self {
            terminal: false,
            assume_yes: false,
        }
    }

    /// Answer every confirmation with yes (`--yes`)
    pub fn with_auto_yes(self, yes: bool) -> Self {
        Self {
            assume_yes: yes,
            ..self
        }
    }

    pub fn auto_yes(&self) -> bool {
        self.assume_yes
    }

    pub fn use_fancy_output(&self) -> bool {
        self.terminal
    }
}

fn running_in_ci(is_set: impl Fn(&str) -> bool) -> bool {
    CI_VARS.iter().any(|var| is_set(var))
}
