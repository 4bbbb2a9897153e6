//! 子类代理
//!
//! Rust 无法在运行时生成子类，这里以组合方式近似：生成的代理类型继承目标的具体类型，
//! 实例持有目标并按方法转发。每个方法的分发策略在生成代理类型时一次性确定。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;

use super::{
    complete_invocation, complete_proxied_interfaces, invoke_target, invoke_with_advice,
    AopProxy, ProxyDispatcher, ProxyInstance, ProxyStrategy, TargetLease,
};
use crate::advised::{advised_type, invoke_advised, Advised, AdvisedKey, AdvisedSupport};
use crate::chain::ChainEntry;
use crate::context::ExposedProxyGuard;
use crate::error::{AopConfigError, InvocationError, InvocationResult};
use crate::joinpoint::{MethodInvocation, ReflectiveMethodInvocation};
use crate::metadata::{Method, MethodRef, SignatureKey, TypeInfo, TypeKind, TypeToken, Value};
use crate::support::pack;
use crate::target::TargetObject;

/// 方法的分发策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tactic {
    /// 通用流程，每次调用解析拦截器链
    AopProxy,
    /// 直接调用目标并处理返回值
    InvokeTarget,
    /// 不覆盖，原样转发
    NoOverride,
    /// 直接转发到静态目标，返回值不可能是目标自身
    DispatchTarget,
    /// 由配置回答
    DispatchAdvised,
    InvokeEquals,
    InvokeHashCode,
    /// 使用生成时固定下来的拦截器链
    FixedChain,
    /// 不可覆盖的方法，绕过通知直接转发
    NotOverridable,
}

/// 按方法选择分发策略
pub struct ProxyCallbackFilter<'a> {
    advised: &'a AdvisedSupport,
}

impl<'a> ProxyCallbackFilter<'a> {
    pub fn new(advised: &'a AdvisedSupport) -> Self {
        Self { advised }
    }

    pub fn accept(&self, method: &Method) -> Result<Tactic, AopConfigError> {
        if method.is_final() {
            return Ok(Tactic::NotOverridable);
        }
        if method.is_finalize() {
            tracing::trace!("Found finalize() method - using NO_OVERRIDE");
            return Ok(Tactic::NoOverride);
        }
        if !self.advised.is_opaque() && method.declaring_token() == advised_type().token() {
            return Ok(Tactic::DispatchAdvised);
        }
        if method.declaring_token().is_object() {
            if method.is_equals() {
                return Ok(Tactic::InvokeEquals);
            }
            if method.is_hash_code() {
                return Ok(Tactic::InvokeHashCode);
            }
        }

        let target_class = self.advised.target_class();
        let chain = self
            .advised
            .interceptors_and_dynamic_advice(method, target_class.as_deref())?;
        let have_advice = !chain.is_empty();
        let is_static = self.advised.target_source().is_static();
        let is_frozen = self.advised.is_frozen();
        let expose_proxy = self.advised.is_expose_proxy();

        if have_advice || !is_frozen {
            if expose_proxy {
                return Ok(Tactic::AopProxy);
            }
            if have_advice && is_static && is_frozen {
                return Ok(Tactic::FixedChain);
            }
            return Ok(Tactic::AopProxy);
        }

        if expose_proxy || !is_static {
            return Ok(Tactic::InvokeTarget);
        }
        let may_return_target = target_class
            .as_deref()
            .is_some_and(|class| method.return_type().is_assignable_from(class));
        if may_return_target {
            Ok(Tactic::InvokeTarget)
        } else {
            Ok(Tactic::DispatchTarget)
        }
    }
}

/// 生成的代理类型
pub struct ProxyClass {
    type_info: Arc<TypeInfo>,
    tactics: HashMap<SignatureKey, Tactic>,
}

impl ProxyClass {
    pub fn type_info(&self) -> &Arc<TypeInfo> {
        &self.type_info
    }

    pub fn tactic(&self, method: &Method) -> Option<Tactic> {
        self.tactics.get(&method.signature_key()).copied()
    }

    pub fn tactic_count(&self) -> usize {
        self.tactics.len()
    }
}

impl fmt::Debug for ProxyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyClass")
            .field("name", &self.type_info.name())
            .field("tactics", &self.tactics.len())
            .finish()
    }
}

/// 按配置键缓存的代理类型
static PROXY_CLASS_CACHE: Lazy<RwLock<HashMap<AdvisedKey, Arc<ProxyClass>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

static NEXT_CLASS_ID: AtomicUsize = AtomicUsize::new(0);

/// 基于子类（组合包装）的代理策略
pub struct SubclassProxy {
    advised: Arc<AdvisedSupport>,
}

impl SubclassProxy {
    pub fn new(advised: Arc<AdvisedSupport>) -> Self {
        Self { advised }
    }

    fn root_class(&self) -> Result<Arc<TypeInfo>, AopConfigError> {
        let class = self
            .advised
            .target_class()
            .ok_or(AopConfigError::NoTargetClass)?;
        if class.is_final() {
            return Err(AopConfigError::CannotSubclass {
                class: class.name().to_string(),
                reason: "final type".to_string(),
            });
        }
        if class.is_interface() {
            return Err(AopConfigError::CannotSubclass {
                class: class.name().to_string(),
                reason: "interfaces have no implementation to extend".to_string(),
            });
        }
        Ok(class)
    }

    fn proxy_class(&self) -> Result<Arc<ProxyClass>, AopConfigError> {
        let key = self.advised.key_only_snapshot();
        if let Some(class) = PROXY_CLASS_CACHE.read().get(&key) {
            tracing::trace!("Reusing generated proxy class [{}]", class.type_info.name());
            return Ok(class.clone());
        }

        let generated = Arc::new(self.generate()?);
        let mut cache = PROXY_CLASS_CACHE.write();
        Ok(cache.entry(key).or_insert(generated).clone())
    }

    fn generate(&self) -> Result<ProxyClass, AopConfigError> {
        let root = self.root_class()?;
        let id = NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed);
        let token = TypeToken::synthetic(format!("{}$$ChimeraProxy${}", root.name(), id));
        let type_info = complete_proxied_interfaces(&self.advised)
            .into_iter()
            .fold(
                TypeInfo::builder(token, TypeKind::Proxy).extends(root.clone()),
                |builder, iface| builder.implements(iface),
            )
            .build();

        let filter = ProxyCallbackFilter::new(&self.advised);
        let mut tactics = HashMap::new();
        let object = TypeInfo::object();
        let methods = type_info
            .all_methods()
            .into_iter()
            .chain(object.declared_methods().iter().cloned());
        for method in methods {
            let key = method.signature_key();
            if tactics.contains_key(&key) {
                continue;
            }
            if method.is_final() {
                tracing::warn!(
                    "Unable to proxy method [{}] because it is final: \
                     calls to this method will bypass the advice chain",
                    method.signature()
                );
            }
            tactics.insert(key, filter.accept(&method)?);
        }

        tracing::debug!(
            "Generated proxy class [{}] with {} method tactic(s)",
            type_info.name(),
            tactics.len()
        );
        Ok(ProxyClass { type_info, tactics })
    }

    /// 冻结且目标静态时，为每个有通知的方法固定拦截器链
    fn fixed_chains(
        &self,
        class: &ProxyClass,
    ) -> Result<HashMap<SignatureKey, Arc<Vec<ChainEntry>>>, AopConfigError> {
        let mut fixed = HashMap::new();
        if !(self.advised.is_frozen() && self.advised.target_source().is_static()) {
            return Ok(fixed);
        }
        let target_class = self.advised.target_class();
        for method in class.type_info.all_methods() {
            if class.tactic(&method) != Some(Tactic::FixedChain) {
                continue;
            }
            let chain = self
                .advised
                .interceptors_and_dynamic_advice(&method, target_class.as_deref())?;
            fixed.insert(method.signature_key(), chain);
        }
        Ok(fixed)
    }
}

impl AopProxy for SubclassProxy {
    fn get_proxy(&self) -> Result<Arc<ProxyInstance>, AopConfigError> {
        let class = self.proxy_class()?;
        tracing::debug!(
            "Creating subclass proxy [{}]: {}",
            class.type_info.name(),
            self.advised
        );

        let expose = self.advised.is_expose_proxy();
        let unadvised = if self.advised.target_source().is_static() {
            if expose {
                UnadvisedCallback::StaticExposed
            } else {
                UnadvisedCallback::Static
            }
        } else if expose {
            UnadvisedCallback::DynamicExposed
        } else {
            UnadvisedCallback::Dynamic
        };

        let dispatcher = Arc::new(SubclassDispatcher {
            advised: self.advised.clone(),
            fixed_chains: self.fixed_chains(&class)?,
            class: class.clone(),
            unadvised,
            static_target: OnceCell::new(),
        });
        Ok(ProxyInstance::new(class.type_info.clone(), dispatcher))
    }

    fn get_proxy_class(&self) -> Result<Arc<TypeInfo>, AopConfigError> {
        Ok(self.proxy_class()?.type_info.clone())
    }
}

/// 没有通知时直接调用目标的回调
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnadvisedCallback {
    Static,
    StaticExposed,
    Dynamic,
    DynamicExposed,
}

impl UnadvisedCallback {
    fn exposes_proxy(self) -> bool {
        matches!(self, Self::StaticExposed | Self::DynamicExposed)
    }
}

struct SubclassDispatcher {
    advised: Arc<AdvisedSupport>,
    class: Arc<ProxyClass>,
    unadvised: UnadvisedCallback,
    fixed_chains: HashMap<SignatureKey, Arc<Vec<ChainEntry>>>,
    static_target: OnceCell<Option<Arc<dyn TargetObject>>>,
}

impl SubclassDispatcher {
    /// 静态目标只获取一次
    fn static_target(&self) -> Result<Option<Arc<dyn TargetObject>>, InvocationError> {
        self.static_target
            .get_or_try_init(|| self.advised.target_source().get_target())
            .cloned()
    }

    fn target_class(&self, target: Option<&Arc<dyn TargetObject>>) -> Option<Arc<TypeInfo>> {
        target
            .and_then(|t| t.type_info())
            .or_else(|| self.advised.target_class())
    }

    fn invoke_unadvised(
        &self,
        proxy: &Arc<ProxyInstance>,
        method: &MethodRef,
        arguments: Vec<Value>,
    ) -> InvocationResult {
        let _exposed = self
            .unadvised
            .exposes_proxy()
            .then(|| ExposedProxyGuard::set(Some(proxy.as_value())));

        match self.unadvised {
            UnadvisedCallback::Static | UnadvisedCallback::StaticExposed => {
                let target = self.static_target()?;
                let target_class = self.target_class(target.as_ref());
                let result = invoke_target(target.as_ref(), method, &arguments);
                complete_invocation(proxy, method, target.as_ref(), target_class.as_deref(), result)
            }
            UnadvisedCallback::Dynamic | UnadvisedCallback::DynamicExposed => {
                let lease = TargetLease::acquire(self.advised.target_source())?;
                let target_class = lease.target_class();
                let result = invoke_target(lease.target(), method, &arguments);
                complete_invocation(proxy, method, lease.target(), target_class.as_deref(), result)
            }
        }
    }

    fn invoke_fixed_chain(
        &self,
        proxy: &Arc<ProxyInstance>,
        method: &MethodRef,
        arguments: Vec<Value>,
        chain: &Arc<Vec<ChainEntry>>,
    ) -> InvocationResult {
        let target = self.static_target()?;
        let target_class = self.target_class(target.as_ref());
        let mut invocation = ReflectiveMethodInvocation::new(
            proxy.as_value(),
            target.clone(),
            method.clone(),
            arguments,
            target_class.clone(),
            chain.clone(),
        );
        let result = invocation.proceed();
        complete_invocation(proxy, method, target.as_ref(), target_class.as_deref(), result)
    }

    fn passthrough(&self, method: &MethodRef, arguments: Vec<Value>) -> InvocationResult {
        let lease = TargetLease::acquire(self.advised.target_source())?;
        invoke_target(lease.target(), method, &arguments)
    }
}

impl ProxyDispatcher for SubclassDispatcher {
    fn dispatch(
        &self,
        proxy: &Arc<ProxyInstance>,
        method: &MethodRef,
        arguments: Vec<Value>,
    ) -> InvocationResult {
        let tactic = self.class.tactic(method).ok_or_else(|| {
            InvocationError::no_such_method(method, self.class.type_info.name())
        })?;

        match tactic {
            Tactic::InvokeEquals => Ok(pack(proxy.equals_value(arguments.first()))),
            Tactic::InvokeHashCode => Ok(pack(proxy.hash_code())),
            Tactic::DispatchAdvised => invoke_advised(self.advised.as_ref(), method, &arguments),
            Tactic::NoOverride | Tactic::NotOverridable => self.passthrough(method, arguments),
            Tactic::DispatchTarget => {
                let target = self.static_target()?;
                let target_class = self.target_class(target.as_ref());
                invoke_target(target.as_ref(), method, &arguments).map_err(|e| {
                    crate::joinpoint::translate_failure(method, target_class.as_deref(), e)
                })
            }
            Tactic::InvokeTarget => self.invoke_unadvised(proxy, method, arguments),
            Tactic::FixedChain => match self.fixed_chains.get(&method.signature_key()) {
                Some(chain) => self.invoke_fixed_chain(proxy, method, arguments, chain),
                None => invoke_with_advice(proxy, &self.advised, method, arguments),
            },
            Tactic::AopProxy => invoke_with_advice(proxy, &self.advised, method, arguments),
        }
    }

    fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.advised
    }

    fn strategy(&self) -> ProxyStrategy {
        ProxyStrategy::Subclass
    }
}
