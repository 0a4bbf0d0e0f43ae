//! POSIX shell string helpers.

/// Separator between chained commands; a failing step aborts the rest.
pub const AND: &str = " && ";

/// Escape every single quote for embedding inside a single-quoted string.
///
/// Each `'` becomes `'\''`: close the quote, emit an escaped quote, reopen.
pub fn escape_single_quotes(s: &str) -> String {
    s.replace('\'', r"'\''")
}

/// Wrap `s` in single quotes, escaping embedded quotes.
pub fn quote(s: &str) -> String {
    format!("'{}'", escape_single_quotes(s))
}

/// Privilege prefix for one command.
pub fn sudo_prefix(use_sudo: bool) -> &'static str {
    if use_sudo { "sudo " } else { "" }
}

/// Join commands with `&&`, prefixing each one with `sudo` when requested.
///
/// Blank fragments are dropped.
pub fn chain<S: AsRef<str>>(commands: &[S], use_sudo: bool) -> String {
    commands
        .iter()
        .map(|c| c.as_ref().trim())
        .filter(|c| !c.is_empty())
        .map(|c| format!("{}{c}", sudo_prefix(use_sudo)))
        .collect::<Vec<_>>()
        .join(AND)
}
