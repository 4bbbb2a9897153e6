//! 代理配置标志
//!
//! 可以直接构造，也可以从 TOML 加载：
//!
//! ```toml
//! [aop]
//! proxy-target-class = true
//! expose-proxy = true
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// 代理配置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProxyConfig {
    /// 代理目标类型本身，而不仅是它实现的接口
    pub proxy_target_class: bool,

    /// 激进优化：允许使用子类代理
    pub optimize: bool,

    /// 隐藏 Advised 接口，代理不能被转换为配置
    pub opaque: bool,

    /// 调用期间将代理暴露到 [`AopContext`](crate::context::AopContext)
    pub expose_proxy: bool,

    /// 冻结后配置不可再修改
    pub frozen: bool,
}

#[derive(Deserialize)]
struct AopSection {
    aop: ProxyConfig,
}

impl ProxyConfig {
    /// 从 TOML 字符串解析，支持顶层键或 `[aop]` 段
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let value: toml::Value =
            toml::from_str(content).context("Failed to parse proxy configuration TOML")?;

        let has_section = value
            .as_table()
            .is_some_and(|table| table.get("aop").is_some_and(|v| v.is_table()));

        if has_section {
            let section: AopSection = value
                .try_into()
                .context("Invalid [aop] section in proxy configuration")?;
            Ok(section.aop)
        } else {
            value
                .try_into()
                .context("Invalid proxy configuration")
        }
    }

    /// 从文件加载
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load proxy configuration from {:?}", path))
    }

    /// 复制另一个配置的所有标志
    pub fn copy_from(&mut self, other: &ProxyConfig) {
        *self = *other;
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proxy_target_class={}; optimize={}; opaque={}; expose_proxy={}; frozen={}",
            self.proxy_target_class, self.optimize, self.opaque, self.expose_proxy, self.frozen
        )
    }
}
