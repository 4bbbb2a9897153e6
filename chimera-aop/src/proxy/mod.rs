//! 代理对象
//!
//! 两种生成策略共用的部分：
//! - [`ProxyInstance`]：代理句柄，所有调用都经由它分发
//! - [`AopProxy`]：代理生成策略
//! - 通用分发流程：暴露代理、延迟获取目标、执行拦截器链、返回值后处理

pub mod interface;
pub mod subclass;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::advised::{advised_type, Advised, AdvisedSupport};
use crate::context::ExposedProxyGuard;
use crate::error::{AopConfigError, InvocationError, InvocationResult};
use crate::joinpoint::{
    adapt_arguments, process_return_value, translate_failure, MethodInvocation,
    ReflectiveMethodInvocation,
};
use crate::metadata::{markers, MethodRef, TypeInfo, TypeToken, Value};
use crate::target::{TargetObject, TargetSource};

pub use interface::InterfaceProxy;
pub use subclass::{ProxyCallbackFilter, ProxyClass, SubclassProxy, Tactic};

/// 接口代理的哈希种子
pub const INTERFACE_PROXY_HASH_SEED: u64 = 0x4a44_4b50;

/// 子类代理的哈希种子
pub const SUBCLASS_PROXY_HASH_SEED: u64 = 0x4347_4c42;

/// 代理生成策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyStrategy {
    /// 实现声明的接口，转发到目标
    Interface,
    /// 包装目标的具体类型
    Subclass,
}

/// 代理生成策略
pub trait AopProxy {
    /// 创建新的代理实例
    fn get_proxy(&self) -> Result<Arc<ProxyInstance>, AopConfigError>;

    /// 代理实例的类型
    fn get_proxy_class(&self) -> Result<Arc<TypeInfo>, AopConfigError>;
}

/// 代理的调用分发
pub trait ProxyDispatcher: Send + Sync {
    fn dispatch(
        &self,
        proxy: &Arc<ProxyInstance>,
        method: &MethodRef,
        arguments: Vec<Value>,
    ) -> InvocationResult;

    fn advised(&self) -> &Arc<AdvisedSupport>;

    fn strategy(&self) -> ProxyStrategy;
}

/// 代理实例
pub struct ProxyInstance {
    proxy_class: Arc<TypeInfo>,
    dispatcher: Arc<dyn ProxyDispatcher>,
}

impl ProxyInstance {
    pub(crate) fn new(proxy_class: Arc<TypeInfo>, dispatcher: Arc<dyn ProxyDispatcher>) -> Arc<Self> {
        Arc::new(Self {
            proxy_class,
            dispatcher,
        })
    }

    /// 通过代理调用方法
    pub fn invoke(self: &Arc<Self>, method: &MethodRef, arguments: Vec<Value>) -> InvocationResult {
        self.dispatcher.dispatch(self, method, arguments)
    }

    /// 按名称调用代理类型上的方法
    pub fn call(self: &Arc<Self>, name: &str, arguments: Vec<Value>) -> InvocationResult {
        let method = self.find_method(name).ok_or_else(|| InvocationError::NoSuchMethod {
            method: name.to_string(),
            surface: self.proxy_class.name().to_string(),
        })?;
        self.invoke(&method, arguments)
    }

    /// 在代理类型（及根类型）上按名称查找方法
    pub fn find_method(&self, name: &str) -> Option<MethodRef> {
        self.proxy_class
            .find_method(name)
            .or_else(|| crate::metadata::object_method(name))
    }

    pub fn proxy_class(&self) -> &Arc<TypeInfo> {
        &self.proxy_class
    }

    pub fn strategy(&self) -> ProxyStrategy {
        self.dispatcher.strategy()
    }

    /// 代理是否可以赋值给该类型
    pub fn implements(&self, token: &TypeToken) -> bool {
        self.proxy_class.is_assignable_to(token)
    }

    /// 代理的配置，opaque 代理返回 `None`
    pub fn advised(&self) -> Option<Arc<AdvisedSupport>> {
        let advised = self.dispatcher.advised();
        if advised.is_opaque() {
            None
        } else {
            Some(advised.clone())
        }
    }

    pub fn as_value(self: &Arc<Self>) -> Value {
        self.clone()
    }

    /// 从类型擦除的值中取出代理
    pub fn from_value(value: &Value) -> Option<Arc<ProxyInstance>> {
        value.clone().downcast::<ProxyInstance>().ok()
    }

    /// 结构相等：同一策略且配置结构相等
    pub fn equals(&self, other: &ProxyInstance) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.strategy() == other.strategy()
            && AdvisedSupport::equals_in_proxy(self.dispatcher.advised(), other.dispatcher.advised())
    }

    /// 与值比较，值不是代理时不相等
    pub(crate) fn equals_value(&self, other: Option<&Value>) -> bool {
        other
            .and_then(ProxyInstance::from_value)
            .is_some_and(|other| self.equals(&other))
    }

    /// 种子与目标来源哈希的组合，通知器变化不影响哈希值
    pub fn hash_code(&self) -> u64 {
        let seed = match self.strategy() {
            ProxyStrategy::Interface => INTERFACE_PROXY_HASH_SEED,
            ProxyStrategy::Subclass => SUBCLASS_PROXY_HASH_SEED,
        };
        seed.wrapping_mul(13)
            .wrapping_add(self.dispatcher.advised().target_source_hash())
    }
}

impl PartialEq for ProxyInstance {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for ProxyInstance {}

impl Hash for ProxyInstance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code());
    }
}

impl fmt::Debug for ProxyInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyInstance")
            .field("class", &self.proxy_class.name())
            .field("strategy", &self.strategy())
            .finish()
    }
}

/// 补全代理接口：加入托管代理标记，非 opaque 时加入 Advised 接口
pub(crate) fn complete_proxied_interfaces(advised: &AdvisedSupport) -> Vec<Arc<TypeInfo>> {
    let mut interfaces = advised.proxied_interfaces();
    let managed = markers::managed_proxy();
    if !interfaces.iter().any(|i| i.token() == managed.token()) {
        interfaces.push(managed);
    }
    if !advised.is_opaque() {
        let advised_iface = advised_type();
        if !interfaces.iter().any(|i| i.token() == advised_iface.token()) {
            interfaces.push(advised_iface);
        }
    }
    interfaces
}

/// 代理是否声明了用户接口（托管代理标记不算）
pub(crate) fn has_user_interfaces(advised: &AdvisedSupport) -> bool {
    let managed = markers::managed_proxy();
    advised
        .proxied_interfaces()
        .iter()
        .any(|i| i.token() != managed.token())
}

/// 一次调用期间持有的目标
///
/// 非静态来源的目标在离开作用域时归还，失败路径同样如此
pub(crate) struct TargetLease {
    source: Arc<dyn TargetSource>,
    target: Option<Arc<dyn TargetObject>>,
}

impl TargetLease {
    pub(crate) fn acquire(source: Arc<dyn TargetSource>) -> Result<Self, InvocationError> {
        let target = source.get_target()?;
        Ok(Self { source, target })
    }

    pub(crate) fn target(&self) -> Option<&Arc<dyn TargetObject>> {
        self.target.as_ref()
    }

    /// 用于匹配的目标类型：目标实例的类型，其次是来源声明的类型
    pub(crate) fn target_class(&self) -> Option<Arc<TypeInfo>> {
        self.target
            .as_ref()
            .and_then(|t| t.type_info())
            .or_else(|| self.source.target_class())
    }
}

impl Drop for TargetLease {
    fn drop(&mut self) {
        if self.source.is_static() {
            return;
        }
        if let Some(target) = self.target.take() {
            if let Err(e) = self.source.release_target(target) {
                tracing::error!(
                    "Failed to release target to {}: {}",
                    self.source.describe(),
                    e
                );
            }
        }
    }
}

/// 直接调用目标
pub(crate) fn invoke_target(
    target: Option<&Arc<dyn TargetObject>>,
    method: &MethodRef,
    arguments: &[Value],
) -> InvocationResult {
    let target = target
        .cloned()
        .ok_or_else(|| InvocationError::MissingTarget(method.signature()))?;
    let arguments = adapt_arguments(method, arguments);
    target.invoke(method, &arguments)
}

/// 代理边界上的结果处理：失败转换与返回值后处理
pub(crate) fn complete_invocation(
    proxy: &Arc<ProxyInstance>,
    method: &MethodRef,
    target: Option<&Arc<dyn TargetObject>>,
    target_class: Option<&TypeInfo>,
    result: InvocationResult,
) -> InvocationResult {
    match result {
        Ok(value) => process_return_value(
            &proxy.as_value(),
            proxy.proxy_class(),
            target,
            target_class,
            method,
            value,
        ),
        Err(e) => Err(translate_failure(method, target_class, e)),
    }
}

/// 通用分发流程
///
/// 每次调用都重新获取（缓存的）拦截器链，支持配置修改、代理暴露与非静态目标
pub(crate) fn invoke_with_advice(
    proxy: &Arc<ProxyInstance>,
    advised: &AdvisedSupport,
    method: &MethodRef,
    arguments: Vec<Value>,
) -> InvocationResult {
    let _exposed = advised
        .is_expose_proxy()
        .then(|| ExposedProxyGuard::set(Some(proxy.as_value())));

    let lease = TargetLease::acquire(advised.target_source())?;
    let target_class = lease.target_class();
    let chain = advised.interceptors_and_dynamic_advice(method, target_class.as_deref())?;

    let result = if chain.is_empty() {
        invoke_target(lease.target(), method, &arguments)
    } else {
        let mut invocation = ReflectiveMethodInvocation::new(
            proxy.as_value(),
            lease.target().cloned(),
            method.clone(),
            arguments,
            target_class.clone(),
            chain,
        );
        invocation.proceed()
    };

    complete_invocation(proxy, method, lease.target(), target_class.as_deref(), result)
}
