use crate::utils::{self, LoadedCluster};
use clusterflow_cloud::ActionType;
use colored::Colorize;

pub async fn handle(loaded: &LoadedCluster, delete: bool) -> anyhow::Result<()> {
    let manager = utils::build_manager(loaded)?;
    let plan = if delete {
        manager.plan_delete(&loaded.file.key()).await?
    } else {
        manager.plan_create(&loaded.file.to_spec()?).await?
    };

    println!("{}", format!("プラン: {}", plan.cluster).bold());
    for action in &plan.actions {
        let marker = match action.action_type {
            ActionType::Create => "+".green(),
            ActionType::Delete => "-".red(),
            ActionType::NoOp => "=".dimmed(),
        };
        let id = action.id.as_deref().unwrap_or("");
        println!("  {} {} {} {}", marker, action.resource, action.name.cyan(), id.dimmed());
    }

    println!();
    if plan.has_changes {
        println!("{}", plan.summary());
    } else {
        println!("{}", "変更はありません".green());
    }
    Ok(())
}
