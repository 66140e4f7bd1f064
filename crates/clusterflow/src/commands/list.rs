use crate::utils;
use clusterflow_cloud::{ClusterFilter, ClusterType, ProviderKind, StateStore};
use colored::Colorize;

pub async fn handle(provider: Option<&str>, cluster_type: Option<&str>) -> anyhow::Result<()> {
    let filter = ClusterFilter {
        provider: provider.map(str::parse::<ProviderKind>).transpose()?,
        cluster_type: cluster_type.map(str::parse::<ClusterType>).transpose()?,
    };

    let store = utils::state_store()?;
    let clusters = store.list(&filter).await?;

    if clusters.is_empty() {
        println!("{}", "管理中のクラスタはありません".dimmed());
        return Ok(());
    }

    println!("{}", format!("クラスタ一覧 ({} 個):", clusters.len()).bold());
    for state in &clusters {
        let status = if state.completed {
            state.meta.phase.to_string().green()
        } else {
            state.meta.phase.to_string().yellow()
        };
        println!("  • {} [{}]", state.key().to_string().cyan(), status);
    }
    Ok(())
}
