mod commands;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cflow")]
#[command(about = "Kubernetes クラスタのインフラを、何度でもやり直せる形で構築する", long_about = None)]
struct Cli {
    /// クラスタファイル (省略時は自動検出)
    #[arg(short, long, global = true, env = "CLUSTERFLOW_CONFIG_PATH")]
    file: Option<PathBuf>,

    /// デバッグログを出力
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// クラスタを作成 (途中で失敗した場合は再実行で再開)
    Create,
    /// クラスタと全リソースを削除
    Delete {
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// クラスタの状態を表示
    Get,
    /// 管理中のクラスタ一覧
    List {
        /// プロバイダで絞り込み (aws, azure, local)
        #[arg(long)]
        provider: Option<String>,
        /// クラスタ種別で絞り込み (self-managed, managed)
        #[arg(long = "type")]
        cluster_type: Option<String>,
    },
    /// 実行せずに変更内容を表示
    Plan {
        /// 削除の計画を表示
        #[arg(long)]
        delete: bool,
    },
    /// ワーカーノードの増減
    #[command(subcommand)]
    Workers(WorkersCommands),
    /// バージョン情報を表示
    Version,
}

#[derive(Subcommand)]
pub enum WorkersCommands {
    /// ワーカーを指定数まで増やす
    Add {
        /// 変更後のワーカー数
        count: usize,
        /// 新しいワーカーのマシンサイズ (省略時はクラスタファイルの値)
        #[arg(long)]
        vm_type: Option<String>,
    },
    /// ワーカーを指定数まで減らす (末尾のノードから削除)
    Remove {
        /// 変更後のワーカー数
        count: usize,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Version => {
            println!("clusterflow {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::List {
            provider,
            cluster_type,
        } => {
            commands::list::handle(provider.as_deref(), cluster_type.as_deref()).await?;
        }
        Commands::Create => {
            let loaded = utils::load_cluster(cli.file)?;
            commands::create::handle(&loaded).await?;
        }
        Commands::Delete { yes } => {
            let loaded = utils::load_cluster(cli.file)?;
            commands::delete::handle(&loaded, yes).await?;
        }
        Commands::Get => {
            let loaded = utils::load_cluster(cli.file)?;
            commands::get::handle(&loaded).await?;
        }
        Commands::Plan { delete } => {
            let loaded = utils::load_cluster(cli.file)?;
            commands::plan::handle(&loaded, delete).await?;
        }
        Commands::Workers(cmd) => {
            let loaded = utils::load_cluster(cli.file)?;
            commands::workers::handle(&loaded, cmd).await?;
        }
    }

    Ok(())
}
