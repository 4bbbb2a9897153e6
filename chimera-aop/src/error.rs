//! 错误类型定义
//!
//! - [`AopConfigError`]：配置阶段的致命错误，在构建/生成代理时立即返回
//! - [`InvocationError`]：通过代理调用方法时产生的错误
//! - [`Throwable`]：目标方法或通知抛出的"异常"，区分受检与非受检

use std::error::Error;
use std::fmt;

use crate::metadata::Method;

/// 配置错误
///
/// 在组装配置或生成代理时立即失败
#[derive(Debug, thiserror::Error)]
pub enum AopConfigError {
    #[error("Cannot modify a frozen configuration: {0}")]
    Frozen(String),

    #[error("[{0}] is not an interface")]
    NotAnInterface(String),

    #[error("Interface [{0}] is sealed and cannot be proxied")]
    SealedInterface(String),

    #[error("Cannot generate subclass of [{class}]: {reason}")]
    CannotSubclass { class: String, reason: String },

    #[error(
        "TargetSource cannot determine target class: \
         either an interface or a target is required for proxy creation"
    )]
    NoTargetClass,

    #[error("No advisors and no TargetSource specified")]
    NoAdvisorsAndNoTarget,

    #[error("Advice type [{0}] is not supported by any registered adapter")]
    UnknownAdviceType(String),

    #[error("Introduction advice [{0}] may only be added as part of an IntroductionAdvisor")]
    IntroductionWithoutAdvisor(String),

    #[error("Advisor index {index} is out of bounds: only {count} advisors defined")]
    AdvisorIndexOutOfRange { index: usize, count: usize },

    #[error("Proxy is opaque and does not expose its configuration")]
    Opaque,

    #[error(
        "Cannot find current proxy: set 'expose_proxy' to true \
         to make it available, and ensure the call runs on the invoking thread"
    )]
    NoCurrentProxy,

    #[error("Proxy does not implement capability [{0}]")]
    CapabilityNotImplemented(String),
}

/// 调用结果
///
/// `None` 表示空值（void 或 null）
pub type InvocationResult = Result<Option<crate::metadata::Value>, InvocationError>;

/// 调用错误
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// 目标方法或通知抛出的失败，原样传播
    #[error(transparent)]
    Failure(Throwable),

    /// 未在方法签名上声明的受检失败
    #[error("Undeclared checked failure thrown from {method}: {source}")]
    UndeclaredThrowable {
        method: String,
        #[source]
        source: Throwable,
    },

    #[error("Null return value from advice does not match primitive return type for: {0}")]
    NullPrimitiveReturn(String),

    #[error("No target instance available to invoke {0}")]
    MissingTarget(String),

    #[error("Method {method} is not part of the surface of [{surface}]")]
    NoSuchMethod { method: String, surface: String },

    #[error("Argument {index} of {method} is not of type {expected}")]
    ArgumentMismatch {
        method: String,
        index: usize,
        expected: &'static str,
    },

    #[error("Return value of {method} is not of type {expected}")]
    ReturnMismatch {
        method: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Config(#[from] AopConfigError),
}

impl InvocationError {
    /// 抛出受检失败
    pub fn checked<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        InvocationError::Failure(Throwable::checked(error))
    }

    /// 抛出非受检失败
    pub fn unchecked<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        InvocationError::Failure(Throwable::unchecked(error))
    }

    pub fn no_such_method(method: &Method, surface: impl Into<String>) -> Self {
        InvocationError::NoSuchMethod {
            method: method.signature(),
            surface: surface.into(),
        }
    }

    /// 获取被抛出的失败（包括被包装的未声明失败）
    pub fn throwable(&self) -> Option<&Throwable> {
        match self {
            InvocationError::Failure(t) => Some(t),
            InvocationError::UndeclaredThrowable { source, .. } => Some(source),
            _ => None,
        }
    }

    /// 是否为受检失败（只有受检失败会被包装）
    pub fn is_checked(&self) -> bool {
        matches!(self, InvocationError::Failure(t) if t.is_checked())
    }

    /// 尝试将失败向下转型为具体错误类型
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.throwable().and_then(|t| t.downcast_ref::<E>())
    }
}

/// 被抛出的失败
///
/// Rust 没有受检异常的概念，这里显式标记：
/// 受检失败必须出现在方法的声明列表中，否则在代理边界被包装
pub struct Throwable {
    error: Box<dyn Error + Send + Sync + 'static>,
    checked: bool,
}

impl Throwable {
    pub fn checked<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            error: Box::new(error),
            checked: true,
        }
    }

    pub fn unchecked<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            error: Box::new(error),
            checked: false,
        }
    }

    pub fn is_checked(&self) -> bool {
        self.checked
    }

    pub fn is<E: Error + 'static>(&self) -> bool {
        self.error.is::<E>()
    }

    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }

    /// 取回原始错误
    pub fn downcast<E: Error + 'static>(self) -> Result<E, Self> {
        let checked = self.checked;
        match self.error.downcast::<E>() {
            Ok(error) => Ok(*error),
            Err(error) => Err(Self { error, checked }),
        }
    }

    pub fn as_error(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// 错误源链（cause chain）
    pub fn source_chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.error.source();
        while let Some(source) = current {
            chain.push(source.to_string());
            current = source.source();
        }
        chain
    }

    /// 获取完整的错误描述（包含源链）
    pub fn full_description(&self) -> String {
        let chain = self.source_chain();
        if chain.is_empty() {
            self.error.to_string()
        } else {
            format!("{}\nCaused by:\n  {}", self.error, chain.join("\n  "))
        }
    }
}

impl fmt::Debug for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throwable")
            .field("error", &self.error)
            .field("checked", &self.checked)
            .finish()
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl Error for Throwable {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.error.source()
    }
}

/// 方法可以声明的失败类型
#[derive(Clone, Copy)]
pub struct FailureType {
    name: &'static str,
    matches: fn(&(dyn Error + Send + Sync + 'static)) -> bool,
}

fn is_failure_of<E: Error + 'static>(error: &(dyn Error + Send + Sync + 'static)) -> bool {
    error.is::<E>()
}

impl FailureType {
    pub fn of<E: Error + 'static>() -> Self {
        Self {
            name: std::any::type_name::<E>(),
            matches: is_failure_of::<E>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn matches(&self, throwable: &Throwable) -> bool {
        (self.matches)(throwable.as_error())
    }
}

impl fmt::Debug for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FailureType({})", self.name)
    }
}
