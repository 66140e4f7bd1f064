//! クラスタファイル (YAML) のモデル
//!
//! ```yaml
//! cluster:
//!   name: demo
//!   provider: local
//!   region: local-1
//!   type: self-managed
//! nodes:
//!   control_plane: { count: 3, vm_type: small }
//!   worker_plane: { count: 2, vm_type: small }
//!   data_store: { count: 3, vm_type: small }
//!   load_balancer: { vm_type: small }
//! settings:
//!   cooldown_secs: 20
//! ```

use crate::error::{ConfigError, Result};
use clusterflow_cloud::params::names;
use clusterflow_cloud::{
    ClusterKey, ClusterShape, ClusterSpec, ClusterType, ManagedClusterParams, NodePool,
    OrchestratorSettings, ProviderKind, Topology,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterFile {
    pub cluster: ClusterSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodesSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed: Option<ManagedSection>,
    #[serde(default)]
    pub settings: SettingsSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSection {
    pub name: String,
    pub provider: ProviderKind,
    pub region: String,
    #[serde(rename = "type", default = "default_cluster_type")]
    pub cluster_type: ClusterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

fn default_cluster_type() -> ClusterType {
    ClusterType::SelfManaged
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default)]
    pub count: usize,
    pub vm_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerSection {
    pub vm_type: String,
}

/// セルフマネージドクラスタのノード構成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodesSection {
    pub control_plane: NodeSection,
    pub worker_plane: NodeSection,
    pub data_store: NodeSection,
    pub load_balancer: LoadBalancerSection,
}

/// マネージドクラスタの構成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedSection {
    pub node_count: usize,
    pub node_size: String,
    #[serde(default)]
    pub kubernetes_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsSection {
    /// VM 削除後、ファイアウォール削除までの待機秒数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<u64>,
    /// VM 一括操作のタイムアウト秒数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,
}

fn pool(section: &NodeSection) -> NodePool {
    NodePool {
        count: section.count,
        vm_type: section.vm_type.clone(),
    }
}

impl ClusterFile {
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn key(&self) -> ClusterKey {
        ClusterKey::new(
            self.cluster.provider,
            self.cluster.region.clone(),
            self.cluster.name.clone(),
            self.cluster.cluster_type,
        )
    }

    /// エンジンに渡すクラスタ定義へ変換
    pub fn to_spec(&self) -> Result<ClusterSpec> {
        let shape = match self.cluster.cluster_type {
            ClusterType::SelfManaged => {
                let nodes = self.nodes.as_ref().ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "セルフマネージドクラスタ {} には nodes セクションが必要です",
                        self.cluster.name
                    ))
                })?;
                ClusterShape::SelfManaged(Topology {
                    control_plane: pool(&nodes.control_plane),
                    worker_plane: pool(&nodes.worker_plane),
                    data_store: pool(&nodes.data_store),
                    load_balancer_vm_type: nodes.load_balancer.vm_type.clone(),
                })
            }
            ClusterType::Managed => {
                let managed = self.managed.as_ref().ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "マネージドクラスタ {} には managed セクションが必要です",
                        self.cluster.name
                    ))
                })?;
                ClusterShape::Managed(ManagedClusterParams {
                    name: names::managed_cluster(&self.cluster.name),
                    node_count: managed.node_count,
                    node_size: managed.node_size.clone(),
                    kubernetes_version: managed.kubernetes_version.clone(),
                })
            }
        };

        let spec = ClusterSpec {
            key: self.key(),
            owner: self.cluster.owner.clone(),
            shape,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// 未指定の項目はエンジンの既定値を使う
    pub fn settings(&self) -> OrchestratorSettings {
        let mut settings = OrchestratorSettings::default();
        if let Some(secs) = self.settings.cooldown_secs {
            settings.cooldown = Duration::from_secs(secs);
        }
        settings.deadline = self.settings.deadline_secs.map(Duration::from_secs);
        if let Some(user) = &self.settings.ssh_user {
            settings.ssh_user = user.clone();
        }
        settings
    }
}

/// クラスタファイルを読み込む
pub fn load_cluster_file(path: &Path) -> Result<ClusterFile> {
    tracing::debug!("Loading cluster file: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    ClusterFile::from_yaml(&content, path)
}
