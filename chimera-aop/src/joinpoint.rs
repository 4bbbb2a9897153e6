//! 连接点（JoinPoint）与拦截器链的执行
//!
//! [`ReflectiveMethodInvocation`] 是每次调用创建的游标对象：
//! 依次执行拦截器，链走完后反射调用目标方法

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::chain::ChainEntry;
use crate::error::{InvocationError, InvocationResult};
use crate::metadata::{Method, MethodRef, TypeInfo, Value, VarArgs};
use crate::target::TargetObject;

type Attributes = Arc<Mutex<HashMap<String, Value>>>;

/// 方法调用（环绕通知看到的连接点）
pub trait MethodInvocation {
    fn method(&self) -> &MethodRef;

    fn arguments(&self) -> &[Value];

    /// 替换参数，后续拦截器与目标方法都会看到新参数
    fn set_arguments(&mut self, arguments: Vec<Value>);

    /// 目标对象（没有目标时为 `None`）
    fn this(&self) -> Option<&Arc<dyn TargetObject>>;

    /// 代理对象
    fn proxy(&self) -> &Value;

    /// 用于匹配的目标类型
    fn target_class(&self) -> Option<&Arc<TypeInfo>>;

    /// 执行链中的下一个拦截器，链走完后调用目标方法
    fn proceed(&mut self) -> InvocationResult;

    /// 复制当前调用，游标重置，共享拦截器链与用户属性
    fn invocable_clone(&self) -> Box<dyn MethodInvocation>;

    /// 同 [`invocable_clone`](Self::invocable_clone)，但使用新参数
    fn invocable_clone_with(&self, arguments: Vec<Value>) -> Box<dyn MethodInvocation>;

    fn user_attribute(&self, key: &str) -> Option<Value>;

    /// 设置用户属性，`None` 表示删除
    fn set_user_attribute(&mut self, key: &str, value: Option<Value>);
}

/// 基于拦截器链的方法调用
pub struct ReflectiveMethodInvocation {
    proxy: Value,
    target: Option<Arc<dyn TargetObject>>,
    method: MethodRef,
    arguments: Vec<Value>,
    target_class: Option<Arc<TypeInfo>>,
    chain: Arc<Vec<ChainEntry>>,
    /// `None` 表示还没有执行任何拦截器
    current: Option<usize>,
    attributes: OnceCell<Attributes>,
}

impl ReflectiveMethodInvocation {
    pub fn new(
        proxy: Value,
        target: Option<Arc<dyn TargetObject>>,
        method: MethodRef,
        arguments: Vec<Value>,
        target_class: Option<Arc<TypeInfo>>,
        chain: Arc<Vec<ChainEntry>>,
    ) -> Self {
        Self {
            proxy,
            target,
            method,
            arguments,
            target_class,
            chain,
            current: None,
            attributes: OnceCell::new(),
        }
    }

    /// 当前游标位置
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn chain(&self) -> &Arc<Vec<ChainEntry>> {
        &self.chain
    }

    fn invoke_joinpoint(&self) -> InvocationResult {
        let target = self
            .target
            .clone()
            .ok_or_else(|| InvocationError::MissingTarget(self.method.signature()))?;
        let arguments = adapt_arguments(&self.method, &self.arguments);
        target.invoke(&self.method, &arguments)
    }

    fn shared_attributes(&self) -> Attributes {
        self.attributes.get_or_init(Attributes::default).clone()
    }

    fn clone_with(&self, arguments: Vec<Value>) -> Self {
        Self {
            proxy: self.proxy.clone(),
            target: self.target.clone(),
            method: self.method.clone(),
            arguments,
            target_class: self.target_class.clone(),
            chain: self.chain.clone(),
            current: None,
            attributes: OnceCell::with_value(self.shared_attributes()),
        }
    }
}

impl MethodInvocation for ReflectiveMethodInvocation {
    fn method(&self) -> &MethodRef {
        &self.method
    }

    fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    fn set_arguments(&mut self, arguments: Vec<Value>) {
        self.arguments = arguments;
    }

    fn this(&self) -> Option<&Arc<dyn TargetObject>> {
        self.target.as_ref()
    }

    fn proxy(&self) -> &Value {
        &self.proxy
    }

    fn target_class(&self) -> Option<&Arc<TypeInfo>> {
        self.target_class.as_ref()
    }

    fn proceed(&mut self) -> InvocationResult {
        let index = self.current.map_or(0, |i| i + 1);
        if index >= self.chain.len() {
            return self.invoke_joinpoint();
        }

        let previous = self.current.replace(index);
        let chain = self.chain.clone();
        let result = match &chain[index] {
            ChainEntry::Interceptor(interceptor) => interceptor.invoke(self),
            ChainEntry::Dynamic {
                interceptor,
                matcher,
            } => {
                let class = self
                    .target_class
                    .clone()
                    .unwrap_or_else(|| self.method.declaring_type());
                if matcher.matches_args(&self.method, &class, &self.arguments) {
                    interceptor.invoke(self)
                } else {
                    // 动态匹配失败，跳过该拦截器
                    self.proceed()
                }
            }
        };
        // 恢复游标，拦截器可以再次调用 proceed()
        self.current = previous;
        result
    }

    fn invocable_clone(&self) -> Box<dyn MethodInvocation> {
        Box::new(self.clone_with(self.arguments.clone()))
    }

    fn invocable_clone_with(&self, arguments: Vec<Value>) -> Box<dyn MethodInvocation> {
        Box::new(self.clone_with(arguments))
    }

    fn user_attribute(&self, key: &str) -> Option<Value> {
        self.attributes.get()?.lock().get(key).cloned()
    }

    fn set_user_attribute(&mut self, key: &str, value: Option<Value>) {
        match value {
            Some(value) => {
                self.shared_attributes().lock().insert(key.to_string(), value);
            }
            None => {
                if let Some(attributes) = self.attributes.get() {
                    attributes.lock().remove(key);
                }
            }
        }
    }
}

impl fmt::Debug for ReflectiveMethodInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflectiveMethodInvocation")
            .field("method", &self.method.signature())
            .field("arguments", &self.arguments.len())
            .field("has_target", &self.target.is_some())
            .field("chain", &self.chain.len())
            .field("current", &self.current)
            .finish()
    }
}

/// 调整可变参数
///
/// 可变参数方法的尾部参数会被打包为一个 [`VarArgs`]
pub fn adapt_arguments<'a>(method: &Method, arguments: &'a [Value]) -> Cow<'a, [Value]> {
    if !method.is_varargs() || method.param_count() == 0 {
        return Cow::Borrowed(arguments);
    }
    let fixed = method.param_count() - 1;
    if arguments.len() < fixed {
        return Cow::Borrowed(arguments);
    }
    if arguments.len() == method.param_count() && arguments[fixed].is::<VarArgs>() {
        return Cow::Borrowed(arguments);
    }

    let mut adapted = arguments[..fixed].to_vec();
    adapted.push(Arc::new(VarArgs(arguments[fixed..].to_vec())));
    Cow::Owned(adapted)
}

/// 两个引用是否指向同一个对象
pub fn is_same_object(value: &Value, target: &Arc<dyn TargetObject>) -> bool {
    Arc::as_ptr(value) as *const () == Arc::as_ptr(target) as *const ()
}

/// 返回值后处理
///
/// - 目标返回自身且返回类型可以容纳代理时，替换为代理（目标类型标记为原始访问时除外）
/// - 基本类型返回值为空时报错
pub fn process_return_value(
    proxy: &Value,
    proxy_class: &TypeInfo,
    target: Option<&Arc<dyn TargetObject>>,
    target_class: Option<&TypeInfo>,
    method: &Method,
    value: Option<Value>,
) -> InvocationResult {
    if let (Some(returned), Some(target)) = (&value, target) {
        if is_same_object(returned, target)
            && method.return_type().is_assignable_from(proxy_class)
            && !target_class.is_some_and(|c| c.is_raw_target_access())
            && !method.declaring_type().is_raw_target_access()
        {
            return Ok(Some(proxy.clone()));
        }
    }

    if value.is_none() && method.return_type().is_primitive() {
        return Err(InvocationError::NullPrimitiveReturn(method.signature()));
    }
    Ok(value)
}

/// 失败转换
///
/// 未在方法签名上声明的受检失败被包装为 [`InvocationError::UndeclaredThrowable`]，
/// 非受检失败与已声明的失败原样传播
pub fn translate_failure(
    method: &Method,
    target_class: Option<&TypeInfo>,
    error: InvocationError,
) -> InvocationError {
    match error {
        InvocationError::Failure(throwable)
            if throwable.is_checked()
                && !method.declares(&throwable)
                && !target_class.is_some_and(|c| c.has_lenient_failures())
                && !method.declaring_type().has_lenient_failures() =>
        {
            tracing::debug!(
                "Wrapping undeclared checked failure thrown from {}",
                method.signature()
            );
            InvocationError::UndeclaredThrowable {
                method: method.signature(),
                source: throwable,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::MethodInterceptor;
    use crate::metadata::{MethodSpec, ReturnType};
    use crate::pointcut::{DynamicPointcut, MethodMatcher, PointcutExpression};
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Echo {}

    #[derive(Debug, thiserror::Error)]
    #[error("declared")]
    struct Declared;

    #[derive(Debug, thiserror::Error)]
    #[error("other")]
    struct Other;

    fn echo_type() -> Arc<TypeInfo> {
        TypeInfo::interface::<dyn Echo>("Echo")
            .method(
                MethodSpec::new("echo")
                    .param("u32")
                    .returns(ReturnType::Primitive("u32"))
                    .declares::<Declared>(),
            )
            .method(
                MethodSpec::new("join")
                    .param("String")
                    .param("u32...")
                    .varargs()
                    .returns(ReturnType::reference::<String>()),
            )
            .build()
    }

    struct EchoTarget {
        calls: AtomicUsize,
    }

    impl TargetObject for EchoTarget {
        fn invoke(self: Arc<Self>, method: &Method, args: &[Value]) -> InvocationResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match method.name() {
                "echo" => Ok(Some(args[0].clone())),
                "join" => {
                    let rest = args[1].downcast_ref::<VarArgs>().map_or(0, |v| v.0.len());
                    Ok(Some(Arc::new(format!("{}+{}", args.len(), rest))))
                }
                _ => Ok(None),
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl MethodInterceptor for Recording {
        fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
            self.log.lock().push(self.label);
            invocation.proceed()
        }
    }

    struct Retry;

    impl MethodInterceptor for Retry {
        fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
            invocation.proceed()?;
            invocation.proceed()
        }
    }

    fn invocation(
        target: Arc<EchoTarget>,
        method: &str,
        args: Vec<Value>,
        chain: Vec<ChainEntry>,
    ) -> ReflectiveMethodInvocation {
        let info = echo_type();
        let method = info.find_method(method).unwrap();
        let target: Arc<dyn TargetObject> = target;
        let proxy: Value = Arc::new(());
        ReflectiveMethodInvocation::new(proxy, Some(target), method, args, None, Arc::new(chain))
    }

    fn target() -> Arc<EchoTarget> {
        Arc::new(EchoTarget {
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_interceptors_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![
            ChainEntry::Interceptor(Arc::new(Recording { label: "a", log: log.clone() })),
            ChainEntry::Interceptor(Arc::new(Recording { label: "b", log: log.clone() })),
        ];
        let target = target();
        let mut mi = invocation(target.clone(), "echo", vec![Arc::new(5u32)], chain);

        let result = mi.proceed().unwrap().unwrap();
        assert_eq!(result.downcast_ref::<u32>(), Some(&5));
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
        assert_eq!(mi.current_index(), None);
    }

    #[test]
    fn test_dynamic_entry_skipped_on_mismatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let matcher: Arc<dyn MethodMatcher> = Arc::new(DynamicPointcut::new(
            PointcutExpression::All,
            |_, args| args[0].downcast_ref::<u32>() == Some(&1),
        ));
        let chain = vec![ChainEntry::Dynamic {
            interceptor: Arc::new(Recording { label: "dyn", log: log.clone() }),
            matcher,
        }];

        let mut skipped = invocation(target(), "echo", vec![Arc::new(2u32)], chain.clone());
        skipped.proceed().unwrap();
        assert!(log.lock().is_empty());

        let mut matched = invocation(target(), "echo", vec![Arc::new(1u32)], chain);
        matched.proceed().unwrap();
        assert_eq!(*log.lock(), vec!["dyn"]);
    }

    #[test]
    fn test_retry_reinvokes_rest_of_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![
            ChainEntry::Interceptor(Arc::new(Retry)),
            ChainEntry::Interceptor(Arc::new(Recording { label: "inner", log: log.clone() })),
        ];
        let target = target();
        let mut mi = invocation(target.clone(), "echo", vec![Arc::new(3u32)], chain);

        mi.proceed().unwrap();
        assert_eq!(*log.lock(), vec!["inner", "inner"]);
        assert_eq!(target.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invocable_clone_shares_attributes() {
        let target = target();
        let mut mi = invocation(target.clone(), "echo", vec![Arc::new(3u32)], Vec::new());
        assert!(mi.user_attribute("k").is_none());

        let mut clone = mi.invocable_clone_with(vec![Arc::new(9u32)]);
        clone.set_user_attribute("k", Some(Arc::new(String::from("v"))));
        assert_eq!(
            mi.user_attribute("k").unwrap().downcast_ref::<String>().unwrap(),
            "v"
        );

        let result = clone.proceed().unwrap().unwrap();
        assert_eq!(result.downcast_ref::<u32>(), Some(&9));
        assert_eq!(mi.arguments()[0].downcast_ref::<u32>(), Some(&3));

        mi.set_user_attribute("k", None);
        assert!(clone.user_attribute("k").is_none());
    }

    #[test]
    fn test_varargs_are_packed() {
        let info = echo_type();
        let join = info.find_method("join").unwrap();
        let args: Vec<Value> = vec![Arc::new(String::from("x")), Arc::new(1u32), Arc::new(2u32)];

        let adapted = adapt_arguments(&join, &args);
        assert_eq!(adapted.len(), 2);
        assert_eq!(adapted[1].downcast_ref::<VarArgs>().unwrap().0.len(), 2);

        let again = adapt_arguments(&join, &adapted);
        assert!(matches!(again, Cow::Borrowed(_)));

        let mut mi = invocation(target(), "join", args, Vec::new());
        let out = mi.proceed().unwrap().unwrap();
        assert_eq!(out.downcast_ref::<String>().unwrap(), "2+2");
    }

    #[test]
    fn test_missing_target() {
        let info = echo_type();
        let method = info.find_method("echo").unwrap();
        let mut mi = ReflectiveMethodInvocation::new(
            Arc::new(()),
            None,
            method,
            vec![Arc::new(1u32)],
            None,
            Arc::new(Vec::new()),
        );
        assert!(matches!(mi.proceed(), Err(InvocationError::MissingTarget(_))));
    }

    #[test]
    fn test_translate_failure() {
        let info = echo_type();
        let echo = info.find_method("echo").unwrap();

        let declared = translate_failure(&echo, None, InvocationError::checked(Declared));
        assert!(matches!(declared, InvocationError::Failure(_)));

        let unchecked = translate_failure(&echo, None, InvocationError::unchecked(Other));
        assert!(matches!(unchecked, InvocationError::Failure(_)));

        let wrapped = translate_failure(&echo, None, InvocationError::checked(Other));
        assert!(matches!(wrapped, InvocationError::UndeclaredThrowable { .. }));
        assert!(wrapped.downcast_ref::<Other>().is_some());

        struct Guest;
        let lenient = TypeInfo::class::<Guest>("Guest").lenient_failures().build();
        let passed = translate_failure(&echo, Some(&lenient), InvocationError::checked(Other));
        assert!(matches!(passed, InvocationError::Failure(_)));
    }

    #[test]
    fn test_null_for_primitive_is_an_error() {
        let info = echo_type();
        let echo = info.find_method("echo").unwrap();
        let proxy: Value = Arc::new(());
        let result = process_return_value(&proxy, &info, None, None, &echo, None);
        assert!(matches!(result, Err(InvocationError::NullPrimitiveReturn(_))));
    }
}
