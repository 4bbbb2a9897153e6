//! 代理工厂
//!
//! [`DefaultAopProxyFactory`] 根据配置选择代理策略，
//! [`ProxyFactory`] 是组装配置并创建代理的便捷入口

use std::ops::Deref;
use std::sync::Arc;

use crate::advised::{Advised, AdvisedSupport};
use crate::config::ProxyConfig;
use crate::error::AopConfigError;
use crate::metadata::TypeInfo;
use crate::proxy::{
    has_user_interfaces, AopProxy, InterfaceProxy, ProxyInstance, ProxyStrategy, SubclassProxy,
};
use crate::target::{TargetObject, TargetSource};

/// 代理策略工厂
pub trait AopProxyFactory: Send + Sync {
    fn create_aop_proxy(
        &self,
        advised: Arc<AdvisedSupport>,
    ) -> Result<Box<dyn AopProxy>, AopConfigError>;
}

/// 默认的代理策略工厂
///
/// 以下任一条件成立时使用子类代理：
/// - 开启了 `optimize`
/// - 开启了 `proxy_target_class`
/// - 没有声明用户接口
///
/// 目标类型本身是接口或已生成的代理类型时回退到接口代理
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAopProxyFactory;

impl DefaultAopProxyFactory {
    pub fn new() -> Self {
        Self
    }

    /// 为配置选择代理策略
    pub fn select_strategy(advised: &AdvisedSupport) -> Result<ProxyStrategy, AopConfigError> {
        let config = advised.config();
        if !(config.optimize || config.proxy_target_class || !has_user_interfaces(advised)) {
            return Ok(ProxyStrategy::Interface);
        }
        let target_class = advised.target_class().ok_or(AopConfigError::NoTargetClass)?;
        if target_class.is_interface() || target_class.is_proxy() {
            return Ok(ProxyStrategy::Interface);
        }
        Ok(ProxyStrategy::Subclass)
    }
}

impl AopProxyFactory for DefaultAopProxyFactory {
    fn create_aop_proxy(
        &self,
        advised: Arc<AdvisedSupport>,
    ) -> Result<Box<dyn AopProxy>, AopConfigError> {
        match Self::select_strategy(&advised)? {
            ProxyStrategy::Interface => Ok(Box::new(InterfaceProxy::new(advised)?)),
            ProxyStrategy::Subclass => Ok(Box::new(SubclassProxy::new(advised))),
        }
    }
}

/// 代理工厂
///
/// 解引用为 [`AdvisedSupport`]，可以直接调用配置方法。
/// 由同一个工厂创建的代理共享配置。
///
/// ```ignore
/// let factory = ProxyFactory::with_target(Arc::new(UserServiceImpl::new()));
/// factory.add_advice(Advice::around(TracingInterceptor::new()))?;
/// let proxy = factory.get_proxy()?;
/// ```
pub struct ProxyFactory {
    advised: Arc<AdvisedSupport>,
    aop_proxy_factory: Arc<dyn AopProxyFactory>,
}

impl ProxyFactory {
    pub fn new() -> Self {
        Self {
            advised: Arc::new(AdvisedSupport::new()),
            aop_proxy_factory: Arc::new(DefaultAopProxyFactory),
        }
    }

    /// 代理目标对象，并代理目标类型实现的全部接口
    pub fn with_target(target: Arc<dyn TargetObject>) -> Self {
        let factory = Self::new();
        if let Some(class) = target.type_info() {
            for interface in class.all_interfaces() {
                if let Err(e) = factory.add_interface(interface) {
                    tracing::debug!("Skipping interface of target type [{}]: {}", class.name(), e);
                }
            }
        }
        if let Err(e) = factory.set_target(target) {
            tracing::warn!("Failed to set proxy target: {}", e);
        }
        factory
    }

    /// 为接口与目标来源创建工厂
    pub fn with_target_source(
        interface: Arc<TypeInfo>,
        target_source: Arc<dyn TargetSource>,
    ) -> Result<Self, AopConfigError> {
        let factory = Self::new();
        factory.add_interface(interface)?;
        factory.set_target_source(target_source)?;
        Ok(factory)
    }

    /// 使用配置文件中的标志
    pub fn with_config(self, config: ProxyConfig) -> Self {
        self.advised.set_config(config);
        self
    }

    pub fn set_aop_proxy_factory(&mut self, factory: Arc<dyn AopProxyFactory>) {
        self.aop_proxy_factory = factory;
    }

    pub fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.advised
    }

    fn create_aop_proxy(&self) -> Result<Box<dyn AopProxy>, AopConfigError> {
        self.advised.activate();
        self.aop_proxy_factory.create_aop_proxy(self.advised.clone())
    }

    /// 按当前配置创建代理
    pub fn get_proxy(&self) -> Result<Arc<ProxyInstance>, AopConfigError> {
        let proxy = self.create_aop_proxy()?.get_proxy()?;
        tracing::debug!(
            "Created {:?} proxy with {} advisor(s)",
            proxy.strategy(),
            self.advised.advisor_count()
        );
        Ok(proxy)
    }

    pub fn get_proxy_class(&self) -> Result<Arc<TypeInfo>, AopConfigError> {
        self.create_aop_proxy()?.get_proxy_class()
    }
}

impl Default for ProxyFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for ProxyFactory {
    type Target = AdvisedSupport;

    fn deref(&self) -> &AdvisedSupport {
        &self.advised
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::Advice;
    use crate::error::InvocationResult;
    use crate::joinpoint::MethodInvocation;
    use crate::advice::MethodInterceptor;
    use crate::metadata::{markers, Method, MethodSpec, ReturnType, TypeKind, TypeToken, Value};
    use std::any::Any;

    trait Mailer {}
    struct SmtpMailer;

    fn mailer() -> Arc<TypeInfo> {
        TypeInfo::interface::<dyn Mailer>("Mailer")
            .method(MethodSpec::new("send").param("String").returns(ReturnType::Primitive("bool")))
            .build()
    }

    fn smtp_class() -> Arc<TypeInfo> {
        TypeInfo::class::<SmtpMailer>("SmtpMailer").implements(mailer()).build()
    }

    struct SmtpTarget;

    impl TargetObject for SmtpTarget {
        fn invoke(self: Arc<Self>, _method: &Method, _args: &[Value]) -> InvocationResult {
            Ok(crate::support::pack(true))
        }

        fn type_info(&self) -> Option<Arc<TypeInfo>> {
            Some(smtp_class())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Passthrough;

    impl MethodInterceptor for Passthrough {
        fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
            invocation.proceed()
        }
    }

    #[test]
    fn test_interfaces_select_interface_strategy() {
        let factory = ProxyFactory::with_target(Arc::new(SmtpTarget));
        assert_eq!(
            DefaultAopProxyFactory::select_strategy(&factory).unwrap(),
            ProxyStrategy::Interface
        );

        factory.set_proxy_target_class(true);
        assert_eq!(
            DefaultAopProxyFactory::select_strategy(&factory).unwrap(),
            ProxyStrategy::Subclass
        );

        factory.set_proxy_target_class(false);
        factory.set_optimize(true);
        assert_eq!(
            DefaultAopProxyFactory::select_strategy(&factory).unwrap(),
            ProxyStrategy::Subclass
        );
    }

    #[test]
    fn test_marker_only_counts_as_no_interfaces() {
        let factory = ProxyFactory::new();
        factory.add_interface(markers::managed_proxy()).unwrap();
        factory.set_target(Arc::new(SmtpTarget)).unwrap();
        assert_eq!(
            DefaultAopProxyFactory::select_strategy(&factory).unwrap(),
            ProxyStrategy::Subclass
        );
    }

    #[test]
    fn test_subclass_requires_target_class() {
        let factory = ProxyFactory::new();
        factory.add_advice(Advice::around(Passthrough)).unwrap();
        assert!(matches!(
            factory.get_proxy(),
            Err(AopConfigError::NoTargetClass)
        ));
    }

    #[test]
    fn test_interface_or_proxy_target_falls_back() {
        let factory = ProxyFactory::new();
        factory.set_target_class(mailer()).unwrap();
        factory.set_proxy_target_class(true);
        assert_eq!(
            DefaultAopProxyFactory::select_strategy(&factory).unwrap(),
            ProxyStrategy::Interface
        );

        let generated = TypeInfo::builder(TypeToken::synthetic("$Proxy"), TypeKind::Proxy).build();
        factory.set_target_class(generated).unwrap();
        assert_eq!(
            DefaultAopProxyFactory::select_strategy(&factory).unwrap(),
            ProxyStrategy::Interface
        );
    }

    #[test]
    fn test_get_proxy_activates_configuration() {
        let factory = ProxyFactory::with_target(Arc::new(SmtpTarget));
        assert!(!factory.is_active());
        let proxy = factory.get_proxy().unwrap();
        assert!(factory.is_active());
        assert_eq!(proxy.strategy(), ProxyStrategy::Interface);
        assert!(proxy.implements(&TypeToken::of::<dyn Mailer>()));

        let sent = proxy.call("send", vec![crate::support::value(String::from("hi"))]).unwrap();
        assert_eq!(sent.unwrap().downcast_ref::<bool>(), Some(&true));
    }
}
