//! Command-line entry point

pub mod commands;

pub fn run() -> anyhow::Result<()> {
    commands::run()
}
