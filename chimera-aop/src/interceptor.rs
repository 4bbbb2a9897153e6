//! 常用拦截器
//!
//! 日志、性能监控与失败日志，可以直接作为环绕通知加入配置

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::advice::MethodInterceptor;
use crate::error::InvocationResult;
use crate::joinpoint::MethodInvocation;

/// 日志拦截器 - 记录方法调用
pub struct TracingInterceptor {
    log_args: bool,
    log_result: bool,
}

impl TracingInterceptor {
    pub fn new() -> Self {
        Self {
            log_args: false,
            log_result: true,
        }
    }

    pub fn with_args(mut self) -> Self {
        self.log_args = true;
        self
    }

    pub fn without_result(mut self) -> Self {
        self.log_result = false;
        self
    }
}

impl Default for TracingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodInterceptor for TracingInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        let signature = invocation.method().signature();
        if self.log_args {
            tracing::info!(
                "→ Entering: {} with {} argument(s)",
                signature,
                invocation.arguments().len()
            );
        } else {
            tracing::info!("→ Entering: {}", signature);
        }

        let start = Instant::now();
        let result = invocation.proceed();
        let elapsed = start.elapsed();

        match &result {
            Ok(value) if self.log_result => tracing::info!(
                "← Exiting: {} (took {:?}, returned {})",
                signature,
                elapsed,
                if value.is_some() { "a value" } else { "nothing" }
            ),
            _ => tracing::info!("← Exiting: {} (took {:?})", signature, elapsed),
        }
        result
    }

    fn name(&self) -> &str {
        "TracingInterceptor"
    }
}

/// 性能监控拦截器
///
/// 调用耗时超过阈值时记录警告
pub struct PerformanceMonitorInterceptor {
    threshold: Duration,
    slow_calls: AtomicUsize,
}

impl PerformanceMonitorInterceptor {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            slow_calls: AtomicUsize::new(0),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// 超过阈值的调用次数
    pub fn slow_calls(&self) -> usize {
        self.slow_calls.load(Ordering::Relaxed)
    }
}

impl MethodInterceptor for PerformanceMonitorInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        let start = Instant::now();
        let result = invocation.proceed();
        let elapsed = start.elapsed();
        if elapsed >= self.threshold {
            self.slow_calls.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "⚠️ Slow method detected: {} took {}ms (threshold: {}ms)",
                invocation.method().signature(),
                elapsed.as_millis(),
                self.threshold.as_millis()
            );
        }
        result
    }

    fn name(&self) -> &str {
        "PerformanceMonitorInterceptor"
    }
}

/// 失败日志拦截器
///
/// 记录失败后原样返回
#[derive(Default)]
pub struct FailureLoggingInterceptor {
    failures: AtomicUsize,
}

impl FailureLoggingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

impl MethodInterceptor for FailureLoggingInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        let result = invocation.proceed();
        if let Err(e) = &result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            let description = match e.throwable() {
                Some(throwable) => throwable.full_description(),
                None => e.to_string(),
            };
            tracing::error!(
                "❌ Exception in {}: {}",
                invocation.method().signature(),
                description
            );
        }
        result
    }

    fn name(&self) -> &str {
        "FailureLoggingInterceptor"
    }
}
