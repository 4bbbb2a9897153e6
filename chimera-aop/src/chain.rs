//! 拦截器链解析
//!
//! 按通知器顺序为某个方法解析出拦截器链，结果由配置按方法缓存

use std::fmt;
use std::sync::Arc;

use crate::adapter::AdvisorAdapterRegistry;
use crate::advice::{Advice, MethodInterceptor};
use crate::advisor::Advisor;
use crate::error::AopConfigError;
use crate::metadata::{Method, TypeInfo};
use crate::pointcut::MethodMatcher;

/// 链中的一项
#[derive(Clone)]
pub enum ChainEntry {
    /// 静态匹配的拦截器
    Interceptor(Arc<dyn MethodInterceptor>),
    /// 每次调用都需要检查参数的拦截器
    Dynamic {
        interceptor: Arc<dyn MethodInterceptor>,
        matcher: Arc<dyn MethodMatcher>,
    },
}

impl ChainEntry {
    pub fn interceptor(&self) -> &Arc<dyn MethodInterceptor> {
        match self {
            ChainEntry::Interceptor(interceptor) => interceptor,
            ChainEntry::Dynamic { interceptor, .. } => interceptor,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, ChainEntry::Dynamic { .. })
    }
}

impl fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainEntry::Interceptor(i) => write!(f, "Interceptor({})", i.name()),
            ChainEntry::Dynamic { interceptor, .. } => {
                write!(f, "Dynamic({})", interceptor.name())
            }
        }
    }
}

/// 拦截器链工厂
pub trait AdvisorChainFactory: Send + Sync {
    /// 解析方法的拦截器链
    ///
    /// `target_class` 缺失时以方法的声明类型代替
    fn interceptors_and_dynamic_advice(
        &self,
        advisors: &[Advisor],
        pre_filtered: bool,
        method: &Method,
        target_class: Option<&TypeInfo>,
    ) -> Result<Vec<ChainEntry>, AopConfigError>;

    /// 检查通知能否被展开，在加入配置时调用
    fn validate(&self, _advice: &Advice) -> Result<(), AopConfigError> {
        Ok(())
    }
}

/// 默认的拦截器链工厂
///
/// 通过 [`AdvisorAdapterRegistry`] 展开通知
pub struct DefaultAdvisorChainFactory {
    registry: Arc<AdvisorAdapterRegistry>,
}

impl DefaultAdvisorChainFactory {
    pub fn new() -> Self {
        Self {
            registry: crate::adapter::global_adapter_registry().clone(),
        }
    }

    pub fn with_registry(registry: Arc<AdvisorAdapterRegistry>) -> Self {
        Self { registry }
    }

    fn has_matching_introductions(advisors: &[Advisor], class: &TypeInfo) -> bool {
        advisors.iter().any(|advisor| match advisor {
            Advisor::Introduction(ia) => ia.class_filter().matches(class),
            _ => false,
        })
    }
}

impl Default for DefaultAdvisorChainFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisorChainFactory for DefaultAdvisorChainFactory {
    fn validate(&self, advice: &Advice) -> Result<(), AopConfigError> {
        self.registry.validate(advice)
    }

    fn interceptors_and_dynamic_advice(
        &self,
        advisors: &[Advisor],
        pre_filtered: bool,
        method: &Method,
        target_class: Option<&TypeInfo>,
    ) -> Result<Vec<ChainEntry>, AopConfigError> {
        let fallback;
        let actual_class = match target_class {
            Some(class) => class,
            None => {
                fallback = method.declaring_type();
                fallback.as_ref()
            }
        };

        let mut chain = Vec::with_capacity(advisors.len());
        let mut has_introductions = None;

        for advisor in advisors {
            match advisor {
                Advisor::Pointcut(pa) => {
                    let pointcut = pa.pointcut();
                    if !pre_filtered && !pointcut.class_filter().matches(actual_class) {
                        continue;
                    }
                    let matcher = pointcut.method_matcher();
                    let matches = if matcher.is_introduction_aware() {
                        let introductions = *has_introductions.get_or_insert_with(|| {
                            Self::has_matching_introductions(advisors, actual_class)
                        });
                        matcher.matches_with_introductions(method, actual_class, introductions)
                    } else {
                        matcher.matches(method, actual_class)
                    };
                    if !matches {
                        continue;
                    }

                    let interceptors = self.registry.interceptors(advisor)?;
                    if matcher.is_runtime() {
                        chain.extend(interceptors.into_iter().map(|interceptor| {
                            ChainEntry::Dynamic {
                                interceptor,
                                matcher: matcher.clone(),
                            }
                        }));
                    } else {
                        chain.extend(interceptors.into_iter().map(ChainEntry::Interceptor));
                    }
                }
                Advisor::Introduction(ia) => {
                    if pre_filtered || ia.class_filter().matches(actual_class) {
                        let interceptors = self.registry.interceptors(advisor)?;
                        chain.extend(interceptors.into_iter().map(ChainEntry::Interceptor));
                    }
                }
                Advisor::Always(_) => {
                    let interceptors = self.registry.interceptors(advisor)?;
                    chain.extend(interceptors.into_iter().map(ChainEntry::Interceptor));
                }
            }
        }

        tracing::trace!(
            "Resolved {} interceptor(s) for {}",
            chain.len(),
            method.signature()
        );
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::IntroductionInterceptor;
    use crate::error::InvocationResult;
    use crate::joinpoint::MethodInvocation;
    use crate::metadata::{MethodSpec, ReturnType, TypeToken};
    use crate::pointcut::{DynamicPointcut, PointcutExpression};

    trait Account {}
    trait Audited {}
    struct AccountImpl;

    struct Named(&'static str);

    impl MethodInterceptor for Named {
        fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
            invocation.proceed()
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    struct AuditMixin;

    impl MethodInterceptor for AuditMixin {
        fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
            invocation.proceed()
        }
    }

    impl IntroductionInterceptor for AuditMixin {
        fn implements_interface(&self, interface: &TypeToken) -> bool {
            interface == &TypeToken::of::<dyn Audited>()
        }
    }

    fn account_class() -> Arc<TypeInfo> {
        let iface = TypeInfo::interface::<dyn Account>("Account")
            .method(MethodSpec::new("balance").returns(ReturnType::Primitive("i64")))
            .method(MethodSpec::new("deposit").param("i64"))
            .build();
        TypeInfo::class::<AccountImpl>("AccountImpl")
            .implements(iface)
            .build()
    }

    fn around(name: &'static str) -> Advice {
        Advice::around(Named(name))
    }

    fn names(chain: &[ChainEntry]) -> Vec<String> {
        chain
            .iter()
            .map(|e| e.interceptor().name().to_string())
            .collect()
    }

    #[test]
    fn test_chain_preserves_advisor_order() {
        let class = account_class();
        let balance = class.find_method("balance").unwrap();
        let advisors = vec![
            Advisor::always(around("a1")),
            Advisor::with_pointcut(PointcutExpression::MethodPattern("*".into()), around("a2")),
            Advisor::always(around("a3")),
        ];

        let chain = DefaultAdvisorChainFactory::new()
            .interceptors_and_dynamic_advice(&advisors, false, &balance, Some(&class))
            .unwrap();
        assert_eq!(names(&chain), vec!["a1", "a2", "a3"]);
    }

    #[test]
    fn test_non_matching_advisors_skipped() {
        let class = account_class();
        let balance = class.find_method("balance").unwrap();
        let advisors = vec![
            Advisor::with_pointcut(
                PointcutExpression::MethodPattern("deposit".into()),
                around("d"),
            ),
            Advisor::with_pointcut(
                PointcutExpression::TypePattern("Order*".into()),
                around("o"),
            ),
        ];

        let chain = DefaultAdvisorChainFactory::new()
            .interceptors_and_dynamic_advice(&advisors, false, &balance, Some(&class))
            .unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_pre_filtered_skips_class_filter() {
        let class = account_class();
        let balance = class.find_method("balance").unwrap();
        let advisors = vec![Advisor::with_pointcut(
            PointcutExpression::TypePattern("Order*".into())
                .or(PointcutExpression::MethodPattern("balance".into())),
            around("x"),
        )];

        let chain = DefaultAdvisorChainFactory::new()
            .interceptors_and_dynamic_advice(&advisors, true, &balance, Some(&class))
            .unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_dynamic_matchers_produce_dynamic_entries() {
        let class = account_class();
        let deposit = class.find_method("deposit").unwrap();
        let advisors = vec![Advisor::with_pointcut(
            DynamicPointcut::new(PointcutExpression::All, |_, _| true),
            around("dyn"),
        )];

        let chain = DefaultAdvisorChainFactory::new()
            .interceptors_and_dynamic_advice(&advisors, false, &deposit, Some(&class))
            .unwrap();
        assert_eq!(chain.len(), 1);
        assert!(chain[0].is_dynamic());
    }

    #[test]
    fn test_introduction_awareness_and_fallback_class() {
        let class = account_class();
        let balance = class.find_method("balance").unwrap();
        let audited = TypeInfo::interface::<dyn Audited>("Audited").build();
        let advisors = vec![
            Advisor::with_pointcut(PointcutExpression::HasIntroductions, around("intro-aware")),
            Advisor::introduction(Arc::new(AuditMixin), vec![audited]),
        ];

        // 没有目标类型时使用方法的声明类型
        let chain = DefaultAdvisorChainFactory::new()
            .interceptors_and_dynamic_advice(&advisors, false, &balance, None)
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].interceptor().name(), "intro-aware");
    }

    #[test]
    fn test_unknown_advice_fails() {
        struct Unknown;
        impl crate::advice::CustomAdvice for Unknown {
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        let class = account_class();
        let balance = class.find_method("balance").unwrap();
        let advisors = vec![Advisor::always(Advice::Custom(Arc::new(Unknown)))];
        let factory =
            DefaultAdvisorChainFactory::with_registry(Arc::new(AdvisorAdapterRegistry::new()));
        let result =
            factory.interceptors_and_dynamic_advice(&advisors, false, &balance, Some(&class));
        assert!(matches!(result, Err(AopConfigError::UnknownAdviceType(_))));
    }
}
