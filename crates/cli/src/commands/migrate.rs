use procura_core::config::AppConfig;

use crate::commands::{connect_migrated, execute, CommandFailure, CommandResult, GlobalOptions};

pub fn run(options: &GlobalOptions) -> CommandResult {
    execute("migrate", options, migrate)
}

async fn migrate(config: AppConfig) -> Result<CommandResult, CommandFailure> {
    let pool = connect_migrated(&config).await?;
    pool.close().await;
    Ok(CommandResult::success("migrate", "applied pending migrations"))
}
