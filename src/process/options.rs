//! Run options and command-line assembly.

/// Flags recognized by [`ProcessSupervisor::run`](super::ProcessSupervisor::run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Suppress the command echo and exit-status diagnostics.
    pub quiet: bool,
    /// Use the coarse progress interval.
    pub slow_tick: bool,
}

impl RunOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    #[must_use]
    pub fn slow_tick(mut self) -> Self {
        self.slow_tick = true;
        self
    }

    /// Build options from flag names (`quiet`, `slowtick`). Unknown names are ignored.
    #[must_use]
    pub fn from_flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::default();
        for flag in flags {
            match flag.as_ref() {
                "quiet" => options.quiet = true,
                "slowtick" => options.slow_tick = true,
                other => tracing::trace!(flag = other, "Ignoring unknown run option"),
            }
        }
        options
    }
}

/// Join command words into one shell command string.
///
/// A single word is taken verbatim as a complete shell command; several words
/// are escaped individually so they reach the shell as separate arguments.
#[must_use]
pub fn join_command(words: &[String]) -> String {
    match words {
        [single] => single.clone(),
        _ => words
            .iter()
            .map(|w| shell_escape::escape(w.as_str().into()).into_owned())
            .collect::<Vec<_>>()
            .join(" "),
    }
}
