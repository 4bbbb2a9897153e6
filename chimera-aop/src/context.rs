//! 当前代理的线程内暴露
//!
//! 配置了 `expose_proxy` 时，代理在分发调用期间把自身放入线程局部存储，
//! 目标对象可以借此通过代理调用自身方法，使通知对自调用同样生效

use std::cell::RefCell;

use crate::error::AopConfigError;
use crate::metadata::Value;

thread_local! {
    static CURRENT_PROXY: RefCell<Option<Value>> = const { RefCell::new(None) };
}

/// 访问当前线程暴露的代理
pub struct AopContext;

impl AopContext {
    /// 当前代理
    ///
    /// 没有暴露代理时返回 [`AopConfigError::NoCurrentProxy`]
    pub fn current_proxy() -> Result<Value, AopConfigError> {
        Self::current_proxy_value().ok_or(AopConfigError::NoCurrentProxy)
    }

    /// 当前代理，按具体类型取出
    pub fn current_proxy_instance<T: Send + Sync + 'static>(
    ) -> Result<std::sync::Arc<T>, AopConfigError> {
        Self::current_proxy()?
            .downcast::<T>()
            .map_err(|_| AopConfigError::NoCurrentProxy)
    }

    fn current_proxy_value() -> Option<Value> {
        CURRENT_PROXY.with(|cell| cell.borrow().clone())
    }
}

/// 暴露代理的作用域守卫
///
/// 创建时设置当前代理，析构时恢复之前的值，嵌套调用与失败路径都能正确还原
#[must_use]
pub struct ExposedProxyGuard {
    previous: Option<Value>,
}

impl ExposedProxyGuard {
    pub fn set(proxy: Option<Value>) -> Self {
        let previous = CURRENT_PROXY.with(|cell| cell.replace(proxy));
        Self { previous }
    }
}

impl Drop for ExposedProxyGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_PROXY.with(|cell| {
            cell.replace(previous);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_no_proxy_outside_dispatch() {
        assert!(matches!(
            AopContext::current_proxy(),
            Err(AopConfigError::NoCurrentProxy)
        ));
    }

    #[test]
    fn test_guard_restores_previous_value() {
        let outer: Value = Arc::new(String::from("outer"));
        let inner: Value = Arc::new(String::from("inner"));

        let _outer_guard = ExposedProxyGuard::set(Some(outer));
        {
            let _inner_guard = ExposedProxyGuard::set(Some(inner));
            let current = AopContext::current_proxy_instance::<String>().unwrap();
            assert_eq!(current.as_str(), "inner");
        }
        let current = AopContext::current_proxy_instance::<String>().unwrap();
        assert_eq!(current.as_str(), "outer");
    }

    #[test]
    fn test_guard_restores_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _guard = ExposedProxyGuard::set(Some(Arc::new(1u8) as Value));
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(AopContext::current_proxy().is_err());
    }

    #[test]
    fn test_exposure_is_per_thread() {
        let _guard = ExposedProxyGuard::set(Some(Arc::new(1u8) as Value));
        let seen = std::thread::spawn(|| AopContext::current_proxy().is_ok())
            .join()
            .unwrap();
        assert!(!seen);
        assert!(AopContext::current_proxy().is_ok());
    }
}
