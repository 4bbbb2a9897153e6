//! 接口代理
//!
//! 代理实现配置中声明的接口（外加框架标记接口），所有调用转发到拦截器链

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::{
    complete_proxied_interfaces, invoke_with_advice, AopProxy, ProxyDispatcher, ProxyInstance,
    ProxyStrategy,
};
use crate::advised::{advised_type, invoke_advised, Advised, AdvisedSupport};
use crate::error::{AopConfigError, InvocationError, InvocationResult};
use crate::metadata::{MethodRef, TypeInfo, TypeKind, TypeToken, Value};
use crate::support::pack;
use crate::target::EmptyTargetSource;

/// 按接口列表缓存的代理类型
static INTERFACE_PROXY_CLASSES: Lazy<RwLock<HashMap<Vec<TypeToken>, Arc<TypeInfo>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

static NEXT_PROXY_ID: AtomicUsize = AtomicUsize::new(0);

fn proxy_class_for(interfaces: Vec<Arc<TypeInfo>>) -> Arc<TypeInfo> {
    let key: Vec<TypeToken> = interfaces.iter().map(|i| i.token().clone()).collect();
    if let Some(class) = INTERFACE_PROXY_CLASSES.read().get(&key) {
        return class.clone();
    }

    let mut cache = INTERFACE_PROXY_CLASSES.write();
    cache
        .entry(key)
        .or_insert_with(|| {
            let id = NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed);
            let token = TypeToken::synthetic(format!("$Proxy{}", id));
            let builder = interfaces
                .into_iter()
                .fold(TypeInfo::builder(token, TypeKind::Proxy), |b, i| {
                    b.implements(i)
                });
            builder.build()
        })
        .clone()
}

/// 基于接口的代理策略
pub struct InterfaceProxy {
    advised: Arc<AdvisedSupport>,
    proxied_interfaces: Vec<Arc<TypeInfo>>,
}

impl InterfaceProxy {
    pub fn new(advised: Arc<AdvisedSupport>) -> Result<Self, AopConfigError> {
        let no_target = advised
            .target_source()
            .as_any()
            .downcast_ref::<EmptyTargetSource>()
            .is_some();
        if advised.advisor_count() == 0 && no_target {
            return Err(AopConfigError::NoAdvisorsAndNoTarget);
        }
        let proxied_interfaces = complete_proxied_interfaces(&advised);
        Ok(Self {
            advised,
            proxied_interfaces,
        })
    }
}

impl AopProxy for InterfaceProxy {
    fn get_proxy(&self) -> Result<Arc<ProxyInstance>, AopConfigError> {
        let proxy_class = self.get_proxy_class()?;
        tracing::debug!(
            "Creating interface proxy [{}]: {}",
            proxy_class.name(),
            self.advised
        );
        let dispatcher = Arc::new(InterfaceDispatcher {
            advised: self.advised.clone(),
        });
        Ok(ProxyInstance::new(proxy_class, dispatcher))
    }

    fn get_proxy_class(&self) -> Result<Arc<TypeInfo>, AopConfigError> {
        Ok(proxy_class_for(self.proxied_interfaces.clone()))
    }
}

struct InterfaceDispatcher {
    advised: Arc<AdvisedSupport>,
}

impl ProxyDispatcher for InterfaceDispatcher {
    fn dispatch(
        &self,
        proxy: &Arc<ProxyInstance>,
        method: &MethodRef,
        arguments: Vec<Value>,
    ) -> InvocationResult {
        let declaring = method.declaring_token();

        if declaring.is_object() {
            if method.is_equals() {
                return Ok(pack(proxy.equals_value(arguments.first())));
            }
            if method.is_hash_code() {
                return Ok(pack(proxy.hash_code()));
            }
        }

        if !proxy.implements(declaring) {
            return Err(InvocationError::no_such_method(
                method,
                proxy.proxy_class().name(),
            ));
        }

        if !self.advised.is_opaque() && declaring == advised_type().token() {
            return invoke_advised(self.advised.as_ref(), method, &arguments);
        }

        invoke_with_advice(proxy, &self.advised, method, arguments)
    }

    fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.advised
    }

    fn strategy(&self) -> ProxyStrategy {
        ProxyStrategy::Interface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{Advice, MethodInterceptor};
    use crate::joinpoint::MethodInvocation;
    use crate::metadata::{markers, Method, MethodSpec, ReturnType};
    use crate::support::{unpack, value};
    use crate::target::TargetObject;
    use std::any::Any;
    use std::sync::atomic::AtomicUsize;

    trait Counter {}
    trait Unrelated {}

    fn counter_type() -> Arc<TypeInfo> {
        TypeInfo::interface::<dyn Counter>("Counter")
            .method(
                MethodSpec::new("add")
                    .param("u32")
                    .returns(ReturnType::Primitive("u32")),
            )
            .build()
    }

    struct CounterTarget {
        calls: AtomicUsize,
    }

    impl TargetObject for CounterTarget {
        fn invoke(self: Arc<Self>, method: &Method, args: &[Value]) -> InvocationResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n: u32 = crate::support::arg(method, args, 0)?;
            Ok(pack(n + 1))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Doubler;

    impl MethodInterceptor for Doubler {
        fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
            let result = invocation.proceed()?;
            let n = unpack::<u32>(invocation.method(), result)?;
            Ok(pack(n * 2))
        }
    }

    fn configured() -> (Arc<AdvisedSupport>, Arc<CounterTarget>) {
        let target = Arc::new(CounterTarget {
            calls: AtomicUsize::new(0),
        });
        let advised = Arc::new(AdvisedSupport::with_interfaces(vec![counter_type()]).unwrap());
        advised.set_target(target.clone()).unwrap();
        (advised, target)
    }

    #[test]
    fn test_requires_advisors_or_target() {
        let advised = Arc::new(AdvisedSupport::with_interfaces(vec![counter_type()]).unwrap());
        assert!(matches!(
            InterfaceProxy::new(advised),
            Err(AopConfigError::NoAdvisorsAndNoTarget)
        ));
    }

    #[test]
    fn test_proxy_implements_markers() {
        let (advised, _) = configured();
        let proxy = InterfaceProxy::new(advised.clone()).unwrap().get_proxy().unwrap();
        assert!(proxy.implements(&TypeToken::of::<dyn Counter>()));
        assert!(proxy.implements(markers::managed_proxy().token()));
        assert!(proxy.implements(advised_type().token()));

        advised.set_opaque(true);
        let opaque = InterfaceProxy::new(advised).unwrap().get_proxy().unwrap();
        assert!(!opaque.implements(advised_type().token()));
        assert!(opaque.advised().is_none());
    }

    #[test]
    fn test_advice_applies_through_proxy() {
        let (advised, target) = configured();
        advised.add_advice(Advice::around(Doubler)).unwrap();
        let proxy = InterfaceProxy::new(advised).unwrap().get_proxy().unwrap();

        let result = proxy.call("add", vec![value(4u32)]).unwrap();
        assert_eq!(result.unwrap().downcast_ref::<u32>(), Some(&10));
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_calls_outside_surface_rejected() {
        let (advised, _) = configured();
        let proxy = InterfaceProxy::new(advised).unwrap().get_proxy().unwrap();
        let foreign = TypeInfo::interface::<dyn Unrelated>("Unrelated")
            .method(MethodSpec::new("poke"))
            .build();
        let poke = foreign.find_method("poke").unwrap();

        assert!(matches!(
            proxy.invoke(&poke, vec![]),
            Err(InvocationError::NoSuchMethod { .. })
        ));
    }

    #[test]
    fn test_advised_methods_answered_from_configuration() {
        let (advised, target) = configured();
        advised.add_advice(Advice::around(Doubler)).unwrap();
        let proxy = InterfaceProxy::new(advised).unwrap().get_proxy().unwrap();

        let count = proxy.call("advisor_count", vec![]).unwrap().unwrap();
        assert_eq!(count.downcast_ref::<usize>(), Some(&1));
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_proxy_class_shared_for_same_interfaces() {
        let (advised, _) = configured();
        let a = InterfaceProxy::new(advised.clone()).unwrap();
        let b = InterfaceProxy::new(advised).unwrap();
        assert!(Arc::ptr_eq(
            &a.get_proxy_class().unwrap(),
            &b.get_proxy_class().unwrap()
        ));
    }
}
