use crate::utils::{self, LoadedCluster};
use colored::Colorize;

pub async fn handle(loaded: &LoadedCluster, yes: bool) -> anyhow::Result<()> {
    let key = loaded.file.key();
    let manager = utils::build_manager(loaded)?;

    let plan = manager.plan_delete(&key).await?;
    println!("{}", format!("削除対象 ({} 個):", plan.actions.len()).bold());
    for action in &plan.actions {
        println!("  • {} {}", action.resource, action.name.cyan());
    }
    println!();

    let confirmation = utils::confirmation(yes);
    if !manager.delete_cluster(&key, confirmation.as_ref()).await? {
        println!("{}", "削除をキャンセルしました。".yellow());
        return Ok(());
    }

    println!("{}", format!("✓ クラスタ {} を削除しました", key).green().bold());
    Ok(())
}
