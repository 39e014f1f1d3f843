//! webtime daemon - tracks per-site browsing time and enforces limits.
//!
//! See [`webtimed::cli`] for the commands and signal handling.

fn main() -> anyhow::Result<()> {
    webtimed::cli::main()
}
