use crate::utils::{self, LoadedCluster};
use colored::Colorize;

pub async fn handle(loaded: &LoadedCluster) -> anyhow::Result<()> {
    let spec = loaded.file.to_spec()?;
    println!("{}", format!("クラスタ {} を作成中...", spec.key).blue().bold());

    let manager = utils::build_manager(loaded)?;
    let snapshot = manager.create_cluster(&spec).await?;

    println!();
    println!("{}", "✓ クラスタを作成しました！".green().bold());
    utils::print_snapshot(&snapshot);
    Ok(())
}
