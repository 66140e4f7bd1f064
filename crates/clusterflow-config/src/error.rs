use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error("ホームディレクトリが見つかりません。CLUSTERFLOW_STATE_DIR で状態の保存先を指定してください")]
    HomeDirNotFound,

    #[error(
        "クラスタファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: cluster.local.yaml, .cluster.local.yaml, cluster.yaml, .cluster.yaml\n\
        - ./.clusterflow/ ディレクトリ\n\
        - ~/.config/clusterflow/cluster.yaml\n\
        または CLUSTERFLOW_CONFIG_PATH 環境変数で直接指定できます"
    )]
    ClusterFileNotFound,

    #[error("クラスタファイルの解析に失敗しました ({}): {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("クラスタファイルが不正です: {0}")]
    Invalid(String),

    #[error(transparent)]
    Cloud(#[from] clusterflow_cloud::CloudError),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
