use clusterflow_cloud::{
    AutoConfirm, ClusterManager, ClusterResourceSnapshot, Confirmation, FileStateStore,
    NoopBootstrap, ProviderAdapter, ProviderKind, StateStore,
};
use clusterflow_cloud_local::LocalProvider;
use clusterflow_config::ClusterFile;
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// 読み込んだクラスタファイル
pub struct LoadedCluster {
    pub path: PathBuf,
    pub file: ClusterFile,
}

/// クラスタファイルを読み込む。`file` が無ければ自動検出する
pub fn load_cluster(file: Option<PathBuf>) -> anyhow::Result<LoadedCluster> {
    let path = match file {
        Some(path) => path,
        None => clusterflow_config::find_cluster_file()?,
    };
    let file = clusterflow_config::load_cluster_file(&path)?;
    println!("📄 クラスタファイル: {}", path.display().to_string().cyan());
    Ok(LoadedCluster { path, file })
}

/// 状態ファイルのストア
pub fn state_store() -> anyhow::Result<Arc<dyn StateStore>> {
    let root = clusterflow_config::state_root()?;
    tracing::debug!("State root: {}", root.display());
    Ok(Arc::new(FileStateStore::new(root)))
}

/// プロバイダ種別に対応するアダプタ
pub fn adapter_for(kind: ProviderKind) -> anyhow::Result<Arc<dyn ProviderAdapter>> {
    match kind {
        ProviderKind::Local => Ok(Arc::new(LocalProvider::new())),
        other => Err(anyhow::anyhow!(
            "プロバイダ '{}' のアダプタはこのビルドに含まれていません",
            other
        )),
    }
}

/// クラスタファイルの設定で ClusterManager を組み立てる
///
/// Ctrl-C で実行中の操作をキャンセルし、エンジンの状態遷移を表示する。
pub fn build_manager(loaded: &LoadedCluster) -> anyhow::Result<ClusterManager> {
    tracing::debug!("Using cluster file {}", loaded.path.display());
    let manager = ClusterManager::new(
        state_store()?,
        adapter_for(loaded.file.cluster.provider)?,
        Arc::new(NoopBootstrap),
        loaded.file.settings(),
    );

    let token = manager.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                "中断しています... 再実行すると途中から再開します".yellow()
            );
            token.cancel();
        }
    });

    let mut status = manager.subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            println!("  {} {}", "▸".blue(), current.to_string().dimmed());
        }
    });

    Ok(manager)
}

/// 標準入力で [y/N] を尋ねる
pub struct StdinConfirm;

impl Confirmation for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{} [y/N]: ", prompt.yellow());
        if std::io::stdout().flush().is_err() {
            return false;
        }

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_err() {
            return false;
        }
        input.trim().eq_ignore_ascii_case("y")
    }
}

/// `--yes` なら自動承認、それ以外は対話で確認
pub fn confirmation(yes: bool) -> Box<dyn Confirmation> {
    if yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(StdinConfirm)
    }
}

/// ノードのアドレス一覧を表示
pub fn print_snapshot(snapshot: &ClusterResourceSnapshot) {
    println!(
        "{}",
        format!(
            "クラスタ {} ({}, {})",
            snapshot.cluster_name, snapshot.provider, snapshot.region
        )
        .bold()
    );
    if !snapshot.ipv4_load_balancer.is_empty() {
        println!(
            "  Load balancer: {} ({})",
            snapshot.ipv4_load_balancer.cyan(),
            snapshot.private_ipv4_load_balancer
        );
    }
    print_ips(
        "Control plane",
        &snapshot.ipv4_control_planes,
        &snapshot.private_ipv4_control_planes,
    );
    print_ips(
        "Data store",
        &snapshot.ipv4_data_stores,
        &snapshot.private_ipv4_data_stores,
    );
    print_ips(
        "Workers",
        &snapshot.ipv4_worker_planes,
        &snapshot.private_ipv4_worker_planes,
    );
    if !snapshot.ssh_user.is_empty() {
        println!("  SSH user: {}", snapshot.ssh_user);
    }
}

fn print_ips(label: &str, public: &[String], private: &[String]) {
    if private.is_empty() {
        return;
    }
    println!("  {} ({}):", label, private.len());
    for (i, private_ip) in private.iter().enumerate() {
        let public_ip = public.get(i).map(String::as_str).unwrap_or("");
        if public_ip.is_empty() {
            println!("    • {}", private_ip);
        } else {
            println!("    • {} ({})", public_ip.cyan(), private_ip);
        }
    }
}
