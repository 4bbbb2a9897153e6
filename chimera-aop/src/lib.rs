//! Chimera AOP - 运行时方法拦截引擎
//!
//! 为目标对象生成代理，按配置的通知器链拦截方法调用：
//! - 多种通知类型（Before、After、Around、AfterReturning、AfterThrowing、Introduction）
//! - 切点表达式与运行时参数匹配
//! - 接口代理与子类（组合包装）代理两种策略
//! - 按方法缓存拦截器链，冻结配置后使用固定链
//! - 单例、原型、池化、热替换等目标来源
//! - 可选地在线程内暴露当前代理

pub mod adapter;
pub mod advice;
pub mod advised;
pub mod advisor;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod interceptor;
pub mod joinpoint;
pub mod metadata;
pub mod pointcut;
pub mod proxy;
pub mod support;
pub mod target;

// 重新导出核心类型
pub use adapter::{global_adapter_registry, AdvisorAdapter, AdvisorAdapterRegistry};
pub use advice::{
    Advice, AdviceType, AfterAdvice, AfterReturningAdvice, AfterThrowingAdvice, BeforeAdvice,
    CustomAdvice, IntroductionInterceptor, MethodInterceptor,
};
pub use advised::{advised_type, Advised, AdvisedKey, AdvisedSupport};
pub use advisor::{Advisor, AdvisorKey, IntroductionAdvisor, PointcutAdvisor};
pub use chain::{AdvisorChainFactory, ChainEntry, DefaultAdvisorChainFactory};
pub use config::ProxyConfig;
pub use context::{AopContext, ExposedProxyGuard};
pub use error::{AopConfigError, FailureType, InvocationError, InvocationResult, Throwable};
pub use factory::{AopProxyFactory, DefaultAopProxyFactory, ProxyFactory};
pub use interceptor::{FailureLoggingInterceptor, PerformanceMonitorInterceptor, TracingInterceptor};
pub use joinpoint::{MethodInvocation, ReflectiveMethodInvocation};
pub use metadata::{
    Method, MethodRef, MethodSpec, ReturnType, TypeInfo, TypeKind, TypeToken, Value, VarArgs,
};
pub use pointcut::{ClassFilter, DynamicPointcut, MethodMatcher, Pointcut, PointcutExpression};
pub use proxy::{AopProxy, InterfaceProxy, ProxyInstance, ProxyStrategy, SubclassProxy};
pub use target::{
    EmptyTargetSource, HotSwappableTargetSource, PooledTargetSource, PrototypeTargetSource,
    SingletonTargetSource, TargetObject, TargetSource,
};

/// 预导入模块
pub mod prelude {
    pub use crate::advice::*;
    pub use crate::advised::{Advised, AdvisedSupport};
    pub use crate::advisor::Advisor;
    pub use crate::context::AopContext;
    pub use crate::error::{AopConfigError, InvocationError, InvocationResult};
    pub use crate::factory::ProxyFactory;
    pub use crate::joinpoint::MethodInvocation;
    pub use crate::metadata::{Method, MethodSpec, ReturnType, TypeInfo, TypeToken, Value};
    pub use crate::pointcut::{DynamicPointcut, PointcutExpression};
    pub use crate::proxy::ProxyInstance;
    pub use crate::target::{TargetObject, TargetSource};
}
