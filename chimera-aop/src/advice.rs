//! 通知（Advice）定义
//!
//! 定义了在连接点执行的各种动作。[`Advice`] 是一个带标签的句柄，
//! 由 [`AdvisorAdapterRegistry`](crate::adapter::AdvisorAdapterRegistry)
//! 展开为具体的 [`MethodInterceptor`]

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{InvocationError, InvocationResult};
use crate::joinpoint::MethodInvocation;
use crate::metadata::{Method, TypeToken, Value};
use crate::target::TargetObject;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceType {
    /// 前置通知
    Before,
    /// 后置通知（无论成功还是失败都执行）
    After,
    /// 返回后通知（成功返回时执行）
    AfterReturning,
    /// 异常通知（抛出异常时执行）
    AfterThrowing,
    /// 环绕通知（可以控制方法执行）
    Around,
    /// 引入通知（为目标添加新的能力）
    Introduction,
    /// 需要自定义适配器的通知
    Custom,
}

/// 环绕通知
///
/// 拦截器可以调用 `proceed()` 零次或多次
pub trait MethodInterceptor: Send + Sync {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult;

    /// 通知的类型标识
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 前置通知
pub trait BeforeAdvice: Send + Sync {
    fn before(
        &self,
        method: &Method,
        args: &[Value],
        target: Option<&Arc<dyn TargetObject>>,
    ) -> Result<(), InvocationError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 后置通知（类似 finally）
pub trait AfterAdvice: Send + Sync {
    fn after(
        &self,
        method: &Method,
        args: &[Value],
        target: Option<&Arc<dyn TargetObject>>,
    ) -> Result<(), InvocationError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 返回后通知
pub trait AfterReturningAdvice: Send + Sync {
    fn after_returning(
        &self,
        return_value: Option<&Value>,
        method: &Method,
        args: &[Value],
        target: Option<&Arc<dyn TargetObject>>,
    ) -> Result<(), InvocationError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 异常通知
///
/// 返回 `Ok(())` 时原始错误继续传播，返回 `Err` 时以新错误替换
pub trait AfterThrowingAdvice: Send + Sync {
    fn after_throwing(
        &self,
        error: &InvocationError,
        method: &Method,
        args: &[Value],
        target: Option<&Arc<dyn TargetObject>>,
    ) -> Result<(), InvocationError>;

    /// 是否处理该错误
    fn handles(&self, _error: &InvocationError) -> bool {
        true
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 引入拦截器
///
/// 为代理添加目标本身不具备的接口
pub trait IntroductionInterceptor: MethodInterceptor {
    fn implements_interface(&self, interface: &TypeToken) -> bool;
}

/// 自定义通知，需要注册对应的 [`AdvisorAdapter`](crate::adapter::AdvisorAdapter)
pub trait CustomAdvice: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 通知句柄
#[derive(Clone)]
pub enum Advice {
    Around(Arc<dyn MethodInterceptor>),
    Before(Arc<dyn BeforeAdvice>),
    After(Arc<dyn AfterAdvice>),
    AfterReturning(Arc<dyn AfterReturningAdvice>),
    AfterThrowing(Arc<dyn AfterThrowingAdvice>),
    Introduction(Arc<dyn IntroductionInterceptor>),
    Custom(Arc<dyn CustomAdvice>),
}

impl Advice {
    pub fn around(interceptor: impl MethodInterceptor + 'static) -> Self {
        Advice::Around(Arc::new(interceptor))
    }

    pub fn before(advice: impl BeforeAdvice + 'static) -> Self {
        Advice::Before(Arc::new(advice))
    }

    pub fn after(advice: impl AfterAdvice + 'static) -> Self {
        Advice::After(Arc::new(advice))
    }

    pub fn after_returning(advice: impl AfterReturningAdvice + 'static) -> Self {
        Advice::AfterReturning(Arc::new(advice))
    }

    pub fn after_throwing(advice: impl AfterThrowingAdvice + 'static) -> Self {
        Advice::AfterThrowing(Arc::new(advice))
    }

    pub fn advice_type(&self) -> AdviceType {
        match self {
            Advice::Around(_) => AdviceType::Around,
            Advice::Before(_) => AdviceType::Before,
            Advice::After(_) => AdviceType::After,
            Advice::AfterReturning(_) => AdviceType::AfterReturning,
            Advice::AfterThrowing(_) => AdviceType::AfterThrowing,
            Advice::Introduction(_) => AdviceType::Introduction,
            Advice::Custom(_) => AdviceType::Custom,
        }
    }

    /// 具体实现的类型名称
    pub fn name(&self) -> &str {
        match self {
            Advice::Around(a) => a.name(),
            Advice::Before(a) => a.name(),
            Advice::After(a) => a.name(),
            Advice::AfterReturning(a) => a.name(),
            Advice::AfterThrowing(a) => a.name(),
            Advice::Introduction(a) => a.name(),
            Advice::Custom(a) => a.name(),
        }
    }

    fn data_ptr(&self) -> *const () {
        match self {
            Advice::Around(a) => Arc::as_ptr(a) as *const (),
            Advice::Before(a) => Arc::as_ptr(a) as *const (),
            Advice::After(a) => Arc::as_ptr(a) as *const (),
            Advice::AfterReturning(a) => Arc::as_ptr(a) as *const (),
            Advice::AfterThrowing(a) => Arc::as_ptr(a) as *const (),
            Advice::Introduction(a) => Arc::as_ptr(a) as *const (),
            Advice::Custom(a) => Arc::as_ptr(a) as *const (),
        }
    }

    /// 是否为同一个通知实例
    pub fn same_as(&self, other: &Advice) -> bool {
        self.advice_type() == other.advice_type() && self.data_ptr() == other.data_ptr()
    }
}

impl PartialEq for Advice {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.advice_type(), self.name())
    }
}
