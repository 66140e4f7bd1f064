pub mod cluster_file;
pub mod error;

pub use cluster_file::{
    ClusterFile, ClusterSection, LoadBalancerSection, ManagedSection, NodeSection, NodesSection,
    SettingsSection, load_cluster_file,
};
pub use error::*;

use std::path::PathBuf;

/// クラスタファイルのパスを指定する環境変数
pub const CONFIG_PATH_ENV: &str = "CLUSTERFLOW_CONFIG_PATH";

/// 状態ファイルの保存先ルートを指定する環境変数
pub const STATE_DIR_ENV: &str = "CLUSTERFLOW_STATE_DIR";

const CANDIDATES: [&str; 4] = [
    "cluster.local.yaml",
    ".cluster.local.yaml",
    "cluster.yaml",
    ".cluster.yaml",
];

/// ClusterFlowの設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("clusterflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// プロジェクトのクラスタファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 CLUSTERFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: cluster.local.yaml, .cluster.local.yaml, cluster.yaml, .cluster.yaml
/// 3. ./.clusterflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/clusterflow/cluster.yaml (グローバル設定)
pub fn find_cluster_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points to a missing file: {}", CONFIG_PATH_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let project_dir = current_dir.join(".clusterflow");
    if project_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = project_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("clusterflow").join("cluster.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ClusterFileNotFound)
}

/// 状態ファイルの保存先ルート
///
/// CLUSTERFLOW_STATE_DIR が設定されていればそれを、なければホームディレクトリを返す。
/// 実際の状態は `<root>/.clusterflow/state/` 以下に置かれる。
pub fn state_root() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(STATE_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    /// カレントディレクトリを一時的に移動して `f` を実行
    fn in_dir<T>(dir: &std::path::Path, f: impl FnOnce() -> T) -> T {
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, f);
        std::env::set_current_dir(original_dir).unwrap();
        result
    }

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("clusterflow"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_cluster_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("cluster.yaml"), "# test").unwrap();

        let found = in_dir(temp_dir.path(), find_cluster_file).unwrap();
        assert!(found.ends_with("cluster.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_cluster_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("cluster.yaml"), "# shared").unwrap();
        fs::write(temp_dir.path().join("cluster.local.yaml"), "# local").unwrap();

        let found = in_dir(temp_dir.path(), find_cluster_file).unwrap();
        assert!(found.ends_with("cluster.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_hidden_local_beats_visible_shared() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join(".cluster.local.yaml"), "# hidden").unwrap();
        fs::write(temp_dir.path().join("cluster.yaml"), "# visible").unwrap();

        let found = in_dir(temp_dir.path(), find_cluster_file).unwrap();
        assert!(found.ends_with(".cluster.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_cluster_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let project_dir = temp_dir.path().join(".clusterflow");
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join("cluster.yaml"), "# project").unwrap();

        let found = in_dir(temp_dir.path(), find_cluster_file).unwrap();
        assert!(found.ends_with(".clusterflow/cluster.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_cluster_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "# custom").unwrap();

        let found = temp_env::with_var(CONFIG_PATH_ENV, Some(&config_path), find_cluster_file);
        assert_eq!(found.unwrap(), config_path);
    }

    #[test]
    #[serial]
    fn test_find_cluster_file_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();

        let result = in_dir(temp_dir.path(), find_cluster_file);
        // グローバル設定がある環境ではそちらが見つかる
        if let Err(e) = result {
            assert!(matches!(e, ConfigError::ClusterFileNotFound));
        }
    }

    #[test]
    #[serial]
    fn test_state_root_env_override() {
        let root = temp_env::with_var(STATE_DIR_ENV, Some("/tmp/cf-state"), state_root).unwrap();
        assert_eq!(root, PathBuf::from("/tmp/cf-state"));
    }

    #[test]
    #[serial]
    fn test_state_root_defaults_to_home() {
        let root = temp_env::with_var_unset(STATE_DIR_ENV, state_root).unwrap();
        assert_eq!(Some(root), dirs::home_dir());
    }
}
