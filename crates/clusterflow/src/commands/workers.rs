use crate::WorkersCommands;
use crate::utils::{self, LoadedCluster};
use clusterflow_cloud::ScaleDown;
use colored::Colorize;

pub async fn handle(loaded: &LoadedCluster, cmd: WorkersCommands) -> anyhow::Result<()> {
    let key = loaded.file.key();
    let manager = utils::build_manager(loaded)?;

    match cmd {
        WorkersCommands::Add { count, vm_type } => {
            let vm_type = match vm_type {
                Some(vm_type) => vm_type,
                None => loaded
                    .file
                    .nodes
                    .as_ref()
                    .map(|nodes| nodes.worker_plane.vm_type.clone())
                    .ok_or_else(|| anyhow::anyhow!("--vm-type を指定してください"))?,
            };

            println!("{}", format!("ワーカーを {} 台に増やしています...", count).blue());
            let up = manager.add_workers(&key, count, &vm_type).await?;
            let added = &up.snapshot.worker_hostnames[up.first_new_index..];
            if added.is_empty() {
                println!("{}", "変更はありません".green());
            } else {
                println!("{}", format!("✓ {} 台追加しました", added.len()).green().bold());
                for hostname in added {
                    println!("  • {}", hostname.cyan());
                }
            }
        }
        WorkersCommands::Remove { count, yes } => {
            let confirmation = utils::confirmation(yes);
            match manager
                .remove_workers(&key, count, confirmation.as_ref())
                .await?
            {
                ScaleDown::Declined => {
                    println!("{}", "削除をキャンセルしました。".yellow());
                }
                ScaleDown::Removed { hostnames, .. } if hostnames.is_empty() => {
                    println!("{}", "変更はありません".green());
                }
                ScaleDown::Removed { hostnames, .. } => {
                    println!(
                        "{}",
                        format!("✓ {} 台削除しました", hostnames.len()).green().bold()
                    );
                    for hostname in &hostnames {
                        println!("  • {}", hostname.dimmed());
                    }
                }
            }
        }
    }
    Ok(())
}
