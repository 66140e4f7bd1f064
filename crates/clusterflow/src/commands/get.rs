use crate::utils::{self, LoadedCluster};
use colored::Colorize;

pub async fn handle(loaded: &LoadedCluster) -> anyhow::Result<()> {
    let key = loaded.file.key();
    let manager = utils::build_manager(loaded)?;
    let state = manager.get_cluster(&key).await?;

    let completed = if state.completed {
        "completed".green()
    } else {
        "incomplete".yellow()
    };
    println!("フェーズ: {} ({})", state.meta.phase.to_string().cyan(), completed);
    println!(
        "更新日時: {}",
        state.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(owner) = &state.meta.owner {
        println!("オーナー: {}", owner);
    }
    println!();
    utils::print_snapshot(&state.resource_snapshot());
    Ok(())
}
