//! 通知适配器注册表
//!
//! 将 [`Advice`] 展开为可以放入拦截器链的 [`MethodInterceptor`]

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::advice::{
    Advice, AfterAdvice, AfterReturningAdvice, AfterThrowingAdvice, BeforeAdvice,
    IntroductionInterceptor, MethodInterceptor,
};
use crate::advisor::Advisor;
use crate::error::{AopConfigError, InvocationResult};
use crate::joinpoint::MethodInvocation;

/// 全局适配器注册表
///
/// 首次访问时初始化，内置前置、返回后、异常与后置通知的适配器
static GLOBAL_ADAPTER_REGISTRY: Lazy<Arc<AdvisorAdapterRegistry>> =
    Lazy::new(|| Arc::new(AdvisorAdapterRegistry::new()));

/// 获取全局适配器注册表
pub fn global_adapter_registry() -> &'static Arc<AdvisorAdapterRegistry> {
    &GLOBAL_ADAPTER_REGISTRY
}

/// 通知适配器
///
/// 为特定类型的通知提供拦截器
pub trait AdvisorAdapter: Send + Sync {
    fn supports_advice(&self, advice: &Advice) -> bool;

    fn interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>>;
}

struct BeforeAdviceAdapter;

impl AdvisorAdapter for BeforeAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::Before(_))
    }

    fn interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>> {
        match advice {
            Advice::Before(a) => Some(Arc::new(MethodBeforeAdviceInterceptor(a.clone()))),
            _ => None,
        }
    }
}

struct AfterReturningAdviceAdapter;

impl AdvisorAdapter for AfterReturningAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::AfterReturning(_))
    }

    fn interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>> {
        match advice {
            Advice::AfterReturning(a) => {
                Some(Arc::new(AfterReturningAdviceInterceptor(a.clone())))
            }
            _ => None,
        }
    }
}

struct ThrowsAdviceAdapter;

impl AdvisorAdapter for ThrowsAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::AfterThrowing(_))
    }

    fn interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>> {
        match advice {
            Advice::AfterThrowing(a) => Some(Arc::new(ThrowsAdviceInterceptor(a.clone()))),
            _ => None,
        }
    }
}

struct AfterAdviceAdapter;

impl AdvisorAdapter for AfterAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::After(_))
    }

    fn interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>> {
        match advice {
            Advice::After(a) => Some(Arc::new(AfterAdviceInterceptor(a.clone()))),
            _ => None,
        }
    }
}

/// 适配器注册表
pub struct AdvisorAdapterRegistry {
    adapters: RwLock<Vec<Arc<dyn AdvisorAdapter>>>,
}

impl AdvisorAdapterRegistry {
    /// 创建带内置适配器的注册表
    pub fn new() -> Self {
        let adapters: Vec<Arc<dyn AdvisorAdapter>> = vec![
            Arc::new(BeforeAdviceAdapter),
            Arc::new(AfterReturningAdviceAdapter),
            Arc::new(ThrowsAdviceAdapter),
            Arc::new(AfterAdviceAdapter),
        ];
        Self {
            adapters: RwLock::new(adapters),
        }
    }

    /// 注册自定义适配器
    pub fn register(&self, adapter: Arc<dyn AdvisorAdapter>) {
        tracing::debug!("Registering advisor adapter");
        self.adapters.write().push(adapter);
    }

    /// 检查通知是否可以被展开
    pub fn validate(&self, advice: &Advice) -> Result<(), AopConfigError> {
        match advice {
            Advice::Around(_) | Advice::Introduction(_) => Ok(()),
            _ if self.adapters.read().iter().any(|a| a.supports_advice(advice)) => Ok(()),
            _ => Err(AopConfigError::UnknownAdviceType(advice.name().to_string())),
        }
    }

    /// 将通知器展开为拦截器
    pub fn interceptors(
        &self,
        advisor: &Advisor,
    ) -> Result<Vec<Arc<dyn MethodInterceptor>>, AopConfigError> {
        let advice = advisor.advice();
        let mut interceptors: Vec<Arc<dyn MethodInterceptor>> = Vec::with_capacity(1);

        match &advice {
            Advice::Around(interceptor) => interceptors.push(interceptor.clone()),
            Advice::Introduction(interceptor) => {
                interceptors.push(Arc::new(IntroductionAsInterceptor(interceptor.clone())))
            }
            _ => {}
        }

        for adapter in self.adapters.read().iter() {
            if adapter.supports_advice(&advice) {
                if let Some(interceptor) = adapter.interceptor(&advice) {
                    interceptors.push(interceptor);
                }
            }
        }

        if interceptors.is_empty() {
            return Err(AopConfigError::UnknownAdviceType(advice.name().to_string()));
        }
        Ok(interceptors)
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }
}

impl Default for AdvisorAdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AdvisorAdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisorAdapterRegistry")
            .field("adapters", &self.len())
            .finish()
    }
}

// ============================================================================
// 内置拦截器
// ============================================================================

/// 前置通知拦截器
pub struct MethodBeforeAdviceInterceptor(Arc<dyn BeforeAdvice>);

impl MethodInterceptor for MethodBeforeAdviceInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        self.0.before(
            invocation.method(),
            invocation.arguments(),
            invocation.this(),
        )?;
        invocation.proceed()
    }

    fn name(&self) -> &str {
        self.0.name()
    }
}

/// 返回后通知拦截器
pub struct AfterReturningAdviceInterceptor(Arc<dyn AfterReturningAdvice>);

impl MethodInterceptor for AfterReturningAdviceInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        let result = invocation.proceed()?;
        self.0.after_returning(
            result.as_ref(),
            invocation.method(),
            invocation.arguments(),
            invocation.this(),
        )?;
        Ok(result)
    }

    fn name(&self) -> &str {
        self.0.name()
    }
}

/// 异常通知拦截器
pub struct ThrowsAdviceInterceptor(Arc<dyn AfterThrowingAdvice>);

impl MethodInterceptor for ThrowsAdviceInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        match invocation.proceed() {
            Err(error) if self.0.handles(&error) => {
                self.0.after_throwing(
                    &error,
                    invocation.method(),
                    invocation.arguments(),
                    invocation.this(),
                )?;
                Err(error)
            }
            other => other,
        }
    }

    fn name(&self) -> &str {
        self.0.name()
    }
}

/// 后置通知拦截器（finally 语义）
pub struct AfterAdviceInterceptor(Arc<dyn AfterAdvice>);

impl MethodInterceptor for AfterAdviceInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        let result = invocation.proceed();
        self.0.after(
            invocation.method(),
            invocation.arguments(),
            invocation.this(),
        )?;
        result
    }

    fn name(&self) -> &str {
        self.0.name()
    }
}

struct IntroductionAsInterceptor(Arc<dyn IntroductionInterceptor>);

impl MethodInterceptor for IntroductionAsInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        self.0.invoke(invocation)
    }

    fn name(&self) -> &str {
        self.0.name()
    }
}
