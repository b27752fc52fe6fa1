//! meshlink-tool
//!
//! 读取多集群策略清单与集群配置，输出派生的网格配置 YAML。
//! 日志写入标准错误，标准输出只包含 YAML。

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use meshlink_agent::ClusterConfig;
use meshlink_controller::manifest::{self, ManifestSet};
use meshlink_controller::{convert, ConversionStyle, MemoryStore, MeshStore};

/// 未指定 `--mc-style` 时读取的环境变量
const STYLE_ENV: &str = "MC_STYLE";

#[derive(Parser, Debug)]
#[command(author, version, about = "将多集群策略转换为网格配置", long_about = None)]
struct Args {
    /// 包含服务暴露策略与远程服务绑定的 YAML 文件
    #[arg(long)]
    filename: PathBuf,

    /// 包含多集群 ConfigMap 的 YAML 文件
    #[arg(long)]
    mc_conf_filename: PathBuf,

    /// 包含已有网格配置的 YAML 文件
    #[arg(long)]
    initial_conf_filename: Option<PathBuf>,

    /// 拓扑风格: DIRECT_INGRESS | EGRESS_INGRESS | SNI
    #[arg(long)]
    mc_style: Option<ConversionStyle>,
}

fn style(args: &Args) -> Result<ConversionStyle> {
    if let Some(style) = args.mc_style {
        return Ok(style);
    }
    match std::env::var(STYLE_ENV) {
        Ok(value) if !value.trim().is_empty() => value
            .parse()
            .with_context(|| format!("环境变量 {} 无效", STYLE_ENV)),
        _ => Ok(ConversionStyle::default()),
    }
}

fn baseline(args: &Args) -> Result<ManifestSet> {
    match &args.initial_conf_filename {
        Some(path) => manifest::read_manifests(path)
            .with_context(|| format!("无法从 {:?} 初始化网格配置", path)),
        None => Ok(ManifestSet::default()),
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let style = style(&args)?;
    debug!("命令行参数: {:?}", args);

    let cluster_config = ClusterConfig::from_config_map_file(&args.mc_conf_filename)
        .with_context(|| format!("无法读取集群配置 {:?}", args.mc_conf_filename))?;

    let baseline = baseline(&args)?;
    for skipped in &baseline.skipped {
        warn!("初始配置中不支持的对象: {}", skipped);
    }
    let store = MemoryStore::with_objects(baseline.mesh, baseline.services)
        .context("无法加载初始网格配置")?;

    let input = manifest::read_manifests(&args.filename)
        .with_context(|| format!("无法读取 {:?}", args.filename))?;
    for skipped in &input.skipped {
        warn!("跳过非多集群策略对象: {}", skipped);
    }
    info!(
        "以 {} 风格转换 {} 个策略，集群 {}",
        style,
        input.policies.len(),
        cluster_config.id
    );

    let namespaces: BTreeSet<&str> = input.policies.iter().map(|p| p.namespace()).collect();
    let namespace_services: Vec<_> = namespaces
        .into_iter()
        .flat_map(|namespace| store.services(namespace))
        .collect();
    let conversion = convert(style, &input.policies, &cluster_config, &store, &namespace_services)
        .context("转换失败")?;

    let yaml = manifest::to_yaml(&conversion.mesh, &conversion.services).context("无法输出 YAML")?;
    print!("{}", yaml);

    Ok(())
}
