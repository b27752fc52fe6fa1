//! 集群配置模块
//!
//! 该模块负责加载本地集群与对端集群的配置，支持 YAML/JSON 文件以及
//! 在 `config.yaml` 键下携带配置的 Kubernetes ConfigMap。

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use config::{Config, File, FileFormat};
use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use meshlink_common::{ClusterInfo, UNKNOWN_CLUSTER_IP, UNKNOWN_CLUSTER_PORT};

/// ConfigMap 中保存集群配置的键
pub const CONFIG_MAP_KEY: &str = "config.yaml";

/// 允许任意集群访问的信任通配符
pub const TRUST_ANY: &str = "*";

/// 对端连接模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// 绑定变化时立即调和
    #[default]
    Live,
    /// 只记录绑定，切换为 live 后才生成网格配置
    Potential,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Live => write!(f, "live"),
            ConnectionMode::Potential => write!(f, "potential"),
        }
    }
}

impl FromStr for ConnectionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "live" => Ok(ConnectionMode::Live),
            "potential" => Ok(ConnectionMode::Potential),
            other => Err(anyhow!("无效的连接模式: {}", other)),
        }
    }
}

/// 集群配置
///
/// 描述本地集群的网关与代理地址，以及关注的对端集群和受信任的对端。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// 集群标识
    #[serde(alias = "ID")]
    pub id: String,
    /// 入口网关地址
    #[serde(rename = "gatewayIP", alias = "gatewayip", default)]
    pub gateway_ip: String,
    /// 入口网关端口
    #[serde(rename = "gatewayPort", alias = "gatewayport", default)]
    pub gateway_port: u16,
    /// 代理地址
    #[serde(rename = "agentIP", alias = "agentip", default)]
    pub agent_ip: String,
    /// 代理端口
    #[serde(rename = "agentPort", alias = "agentport", default)]
    pub agent_port: u16,
    /// 连接模式
    #[serde(rename = "connectionMode", alias = "connectionmode", default)]
    pub connection_mode: ConnectionMode,
    /// 关注的对端集群
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<ClusterConfig>,
    /// 受信任的对端集群标识
    #[serde(rename = "trustedPeers", alias = "trustedpeers", default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_peers: Vec<String>,
}

impl ClusterConfig {
    /// 从 YAML 或 JSON 文件加载配置，格式由扩展名决定
    pub fn load(path: &Path) -> Result<Self> {
        let file = path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;

        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
        };

        let config = Config::builder()
            .add_source(File::with_name(file).format(format))
            .build()
            .with_context(|| format!("无法加载配置文件: {:?}", path))?;

        config.try_deserialize::<ClusterConfig>().context("配置格式错误")
    }

    /// 从 YAML 文本解析配置
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Yaml))
            .build()
            .context("构建配置失败")?;

        config.try_deserialize::<ClusterConfig>().context("配置格式错误")
    }

    /// 从 ConfigMap 的 `config.yaml` 键读取配置
    pub fn from_config_map(config_map: &ConfigMap) -> Result<Self> {
        let content = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIG_MAP_KEY))
            .ok_or_else(|| anyhow!("ConfigMap 中缺少 '{}'", CONFIG_MAP_KEY))?;

        Self::from_yaml(content).context("无法解析 ConfigMap 中的 config.yaml")
    }

    /// 从 ConfigMap 清单文件读取配置
    pub fn from_config_map_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("无法读取 {:?}", path))?;
        let config_map: ConfigMap =
            serde_yaml::from_str(&content).with_context(|| format!("{:?} 不是有效的 ConfigMap", path))?;

        Self::from_config_map(&config_map)
    }

    /// 按标识查找对端配置
    pub fn peer(&self, id: &str) -> Option<&ClusterConfig> {
        self.peers.iter().find(|p| p.id == id)
    }

    /// 集群是否受信任
    pub fn is_trusted(&self, cluster: &str) -> bool {
        self.trusted_peers.iter().any(|t| t == cluster || t == TRUST_ANY)
    }

    fn gateway_of(&self, cluster: &str) -> Option<&ClusterConfig> {
        if cluster == self.id {
            Some(self)
        } else {
            self.peer(cluster)
        }
    }
}

impl ClusterInfo for ClusterConfig {
    fn ip(&self, cluster: &str) -> String {
        match self.gateway_of(cluster) {
            Some(config) => config.gateway_ip.clone(),
            None => {
                debug!("未知集群 {}，使用占位网关地址", cluster);
                UNKNOWN_CLUSTER_IP.to_string()
            }
        }
    }

    fn port(&self, cluster: &str) -> u32 {
        match self.gateway_of(cluster) {
            Some(config) => u32::from(config.gateway_port),
            None => {
                debug!("未知集群 {}，使用占位网关端口", cluster);
                UNKNOWN_CLUSTER_PORT
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    const CONFIG_YAML: &str = r#"
id: cluster1
gatewayIP: 169.62.129.93
gatewayPort: 31380
agentIP: 169.62.129.93
agentPort: 31000
trustedPeers:
- cluster2
peers:
- id: Cluster2
  gatewayIP: 169.62.129.94
  gatewayPort: 31380
  agentIP: 169.62.129.94
  agentPort: 31000
  connectionMode: potential
"#;

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(CONFIG_YAML.as_bytes()).unwrap();

        let config = ClusterConfig::load(file.path()).unwrap();
        assert_eq!(config.id, "cluster1");
        assert_eq!(config.gateway_port, 31380);
        assert_eq!(config.connection_mode, ConnectionMode::Live);
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].connection_mode, ConnectionMode::Potential);
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"id": "c9", "gatewayIP": "10.0.0.9", "gatewayPort": 443}"#)
            .unwrap();

        let config = ClusterConfig::load(file.path()).unwrap();
        assert_eq!(config.ip("c9"), "10.0.0.9");
        assert_eq!(config.port("c9"), 443);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(ClusterConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_from_config_map_file() {
        let mut manifest = String::from(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: mc-configuration\n  namespace: istio-system\ndata:\n  config.yaml: |\n",
        );
        for line in CONFIG_YAML.lines() {
            manifest.push_str("    ");
            manifest.push_str(line);
            manifest.push('\n');
        }
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(manifest.as_bytes()).unwrap();

        let config = ClusterConfig::from_config_map_file(file.path()).unwrap();
        assert_eq!(config.id, "cluster1");
        assert_eq!(config.peer("Cluster2").map(|p| p.agent_port), Some(31000));
    }

    #[test]
    fn test_config_map_without_key() {
        let config_map = ConfigMap::default();
        assert!(ClusterConfig::from_config_map(&config_map).is_err());
    }

    #[rstest]
    #[case("cluster1", "169.62.129.93", 31380)]
    #[case("Cluster2", "169.62.129.94", 31380)]
    #[case("cluster3", UNKNOWN_CLUSTER_IP, UNKNOWN_CLUSTER_PORT)]
    fn test_cluster_info(#[case] cluster: &str, #[case] ip: &str, #[case] port: u32) {
        let config = ClusterConfig::from_yaml(CONFIG_YAML).unwrap();
        assert_eq!(config.ip(cluster), ip);
        assert_eq!(config.port(cluster), port);
    }

    #[rstest]
    #[case(vec!["cluster2"], "cluster2", true)]
    #[case(vec!["cluster2"], "cluster3", false)]
    #[case(vec!["*"], "anything", true)]
    #[case(vec![], "cluster2", false)]
    fn test_is_trusted(#[case] trusted: Vec<&str>, #[case] cluster: &str, #[case] expected: bool) {
        let config = ClusterConfig {
            trusted_peers: trusted.into_iter().map(String::from).collect(),
            ..Default::default()
        };
        assert_eq!(config.is_trusted(cluster), expected);
    }

    #[test]
    fn test_connection_mode_parsing() {
        assert_eq!("".parse::<ConnectionMode>().unwrap(), ConnectionMode::Live);
        assert_eq!("Potential".parse::<ConnectionMode>().unwrap(), ConnectionMode::Potential);
        assert!("dormant".parse::<ConnectionMode>().is_err());
    }
}
