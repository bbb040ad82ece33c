use anyhow::Result;
use enum_dispatch::enum_dispatch;

/// Trait implemented by every subcommand. The subcommand enum in main dispatches to it.
#[enum_dispatch]
pub trait Command {
    fn execute(&self) -> Result<()>;
}
