//! 目标对象与目标来源（TargetSource）
//!
//! 代理在每次调用时通过 [`TargetSource`] 获取目标实例：
//! - [`SingletonTargetSource`]：始终返回同一个实例
//! - [`EmptyTargetSource`]：没有目标（纯通知代理）
//! - [`PrototypeTargetSource`]：每次调用新建实例
//! - [`PooledTargetSource`]：从对象池借出，调用后归还
//! - [`HotSwappableTargetSource`]：运行时可替换目标

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{InvocationError, InvocationResult};
use crate::metadata::{Method, TypeInfo, Value};

/// 可被代理调用的目标对象
///
/// 由于没有反射，目标需要自己按方法描述分派调用
pub trait TargetObject: Any + Send + Sync {
    fn invoke(self: Arc<Self>, method: &Method, args: &[Value]) -> InvocationResult;

    /// 目标的运行时类型描述
    fn type_info(&self) -> Option<Arc<TypeInfo>> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// 目标来源
pub trait TargetSource: Send + Sync {
    /// 目标类型，未知时为 `None`
    fn target_class(&self) -> Option<Arc<TypeInfo>>;

    /// 是否每次都返回同一个目标
    fn is_static(&self) -> bool;

    /// 获取目标实例
    fn get_target(&self) -> Result<Option<Arc<dyn TargetObject>>, InvocationError>;

    /// 归还目标实例
    fn release_target(&self, _target: Arc<dyn TargetObject>) -> Result<(), InvocationError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;

    /// 结构相等
    fn equals(&self, other: &dyn TargetSource) -> bool;

    fn hash_code(&self) -> u64;

    fn describe(&self) -> String {
        match self.target_class() {
            Some(class) => format!("{} for target class [{}]", self.kind(), class.name()),
            None => self.kind().to_string(),
        }
    }

    fn kind(&self) -> &'static str;
}

impl fmt::Debug for dyn TargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn identity_of<T: ?Sized>(ptr: &Arc<T>) -> usize {
    Arc::as_ptr(ptr) as *const () as usize
}

/// 单例目标来源
pub struct SingletonTargetSource {
    target: Arc<dyn TargetObject>,
    target_class: Option<Arc<TypeInfo>>,
}

impl SingletonTargetSource {
    pub fn new(target: Arc<dyn TargetObject>) -> Self {
        let target_class = target.type_info();
        Self {
            target,
            target_class,
        }
    }

    pub fn with_class(target: Arc<dyn TargetObject>, target_class: Arc<TypeInfo>) -> Self {
        Self {
            target,
            target_class: Some(target_class),
        }
    }

    pub fn target(&self) -> &Arc<dyn TargetObject> {
        &self.target
    }
}

impl TargetSource for SingletonTargetSource {
    fn target_class(&self) -> Option<Arc<TypeInfo>> {
        self.target_class.clone()
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> Result<Option<Arc<dyn TargetObject>>, InvocationError> {
        Ok(Some(self.target.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn TargetSource) -> bool {
        other
            .as_any()
            .downcast_ref::<SingletonTargetSource>()
            .is_some_and(|o| identity_of(&o.target) == identity_of(&self.target))
    }

    fn hash_code(&self) -> u64 {
        hash_of(&identity_of(&self.target))
    }

    fn kind(&self) -> &'static str {
        "SingletonTargetSource"
    }
}

/// 空目标来源
///
/// 可以携带目标类型，但没有目标实例
#[derive(Clone, Default)]
pub struct EmptyTargetSource {
    target_class: Option<Arc<TypeInfo>>,
}

impl EmptyTargetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_class(target_class: Arc<TypeInfo>) -> Self {
        Self {
            target_class: Some(target_class),
        }
    }
}

impl TargetSource for EmptyTargetSource {
    fn target_class(&self) -> Option<Arc<TypeInfo>> {
        self.target_class.clone()
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> Result<Option<Arc<dyn TargetObject>>, InvocationError> {
        Ok(None)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn TargetSource) -> bool {
        other
            .as_any()
            .downcast_ref::<EmptyTargetSource>()
            .is_some_and(|o| {
                let theirs = o.target_class.as_ref().map(|c| c.token());
                theirs == self.target_class.as_ref().map(|c| c.token())
            })
    }

    fn hash_code(&self) -> u64 {
        hash_of(&self.target_class.as_ref().map(|c| c.token().clone()))
    }

    fn kind(&self) -> &'static str {
        "EmptyTargetSource"
    }
}

type TargetFactory =
    Arc<dyn Fn() -> Result<Arc<dyn TargetObject>, InvocationError> + Send + Sync>;

/// 原型目标来源：每次调用创建新实例
pub struct PrototypeTargetSource {
    factory: TargetFactory,
    target_class: Arc<TypeInfo>,
}

impl PrototypeTargetSource {
    pub fn new<F>(target_class: Arc<TypeInfo>, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn TargetObject>, InvocationError> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            target_class,
        }
    }
}

impl TargetSource for PrototypeTargetSource {
    fn target_class(&self) -> Option<Arc<TypeInfo>> {
        Some(self.target_class.clone())
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> Result<Option<Arc<dyn TargetObject>>, InvocationError> {
        let target = (self.factory)()?;
        tracing::trace!("Created prototype target of class [{}]", self.target_class.name());
        Ok(Some(target))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn TargetSource) -> bool {
        other
            .as_any()
            .downcast_ref::<PrototypeTargetSource>()
            .is_some_and(|o| identity_of(&o.factory) == identity_of(&self.factory))
    }

    fn hash_code(&self) -> u64 {
        hash_of(&identity_of(&self.factory))
    }

    fn kind(&self) -> &'static str {
        "PrototypeTargetSource"
    }
}

struct PoolState {
    idle: Vec<Arc<dyn TargetObject>>,
    active: usize,
}

/// 对象池目标来源
///
/// 池满时获取目标会阻塞，直到有实例被归还
pub struct PooledTargetSource {
    factory: TargetFactory,
    target_class: Arc<TypeInfo>,
    max_size: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PooledTargetSource {
    pub fn new<F>(target_class: Arc<TypeInfo>, max_size: usize, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn TargetObject>, InvocationError> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            target_class,
            max_size: max_size.max(1),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                active: 0,
            }),
            available: Condvar::new(),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// 已借出的实例数
    pub fn active_count(&self) -> usize {
        self.state.lock().active
    }

    /// 池中空闲的实例数
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }
}

impl TargetSource for PooledTargetSource {
    fn target_class(&self) -> Option<Arc<TypeInfo>> {
        Some(self.target_class.clone())
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> Result<Option<Arc<dyn TargetObject>>, InvocationError> {
        let mut state = self.state.lock();
        loop {
            if let Some(target) = state.idle.pop() {
                state.active += 1;
                return Ok(Some(target));
            }
            if state.active + state.idle.len() < self.max_size {
                state.active += 1;
                drop(state);
                return match (self.factory)() {
                    Ok(target) => Ok(Some(target)),
                    Err(e) => {
                        self.state.lock().active -= 1;
                        self.available.notify_one();
                        Err(e)
                    }
                };
            }
            tracing::trace!(
                "Target pool for [{}] exhausted, waiting for a release",
                self.target_class.name()
            );
            self.available.wait(&mut state);
        }
    }

    fn release_target(&self, target: Arc<dyn TargetObject>) -> Result<(), InvocationError> {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        state.idle.push(target);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn TargetSource) -> bool {
        std::ptr::eq(
            self as *const Self as *const (),
            other.as_any() as *const dyn Any as *const (),
        )
    }

    fn hash_code(&self) -> u64 {
        hash_of(&(self as *const Self as usize))
    }

    fn kind(&self) -> &'static str {
        "PooledTargetSource"
    }
}

/// 可热替换的目标来源
pub struct HotSwappableTargetSource {
    target: RwLock<Arc<dyn TargetObject>>,
    target_class: Option<Arc<TypeInfo>>,
}

impl HotSwappableTargetSource {
    pub fn new(target: Arc<dyn TargetObject>) -> Self {
        let target_class = target.type_info();
        Self {
            target: RwLock::new(target),
            target_class,
        }
    }

    /// 替换目标，返回旧目标
    ///
    /// 之后开始的调用会看到新目标
    pub fn swap(&self, new_target: Arc<dyn TargetObject>) -> Arc<dyn TargetObject> {
        let old = std::mem::replace(&mut *self.target.write(), new_target);
        tracing::debug!("Swapped target of HotSwappableTargetSource");
        old
    }

    pub fn current(&self) -> Arc<dyn TargetObject> {
        self.target.read().clone()
    }
}

impl TargetSource for HotSwappableTargetSource {
    fn target_class(&self) -> Option<Arc<TypeInfo>> {
        self.target_class
            .clone()
            .or_else(|| self.target.read().type_info())
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> Result<Option<Arc<dyn TargetObject>>, InvocationError> {
        Ok(Some(self.target.read().clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn TargetSource) -> bool {
        other
            .as_any()
            .downcast_ref::<HotSwappableTargetSource>()
            .is_some_and(|o| identity_of(&o.current()) == identity_of(&self.current()))
    }

    fn hash_code(&self) -> u64 {
        hash_of(&"HotSwappableTargetSource")
    }

    fn kind(&self) -> &'static str {
        "HotSwappableTargetSource"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    struct Counter(usize);

    impl TargetObject for Counter {
        fn invoke(self: Arc<Self>, _method: &Method, _args: &[Value]) -> InvocationResult {
            Ok(Some(Arc::new(self.0)))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Worker;

    fn worker_class() -> Arc<TypeInfo> {
        TypeInfo::class::<Worker>("Worker").build()
    }

    #[test]
    fn test_singleton_equality_by_target_identity() {
        let target: Arc<dyn TargetObject> = Arc::new(Counter(1));
        let a = SingletonTargetSource::new(target.clone());
        let b = SingletonTargetSource::new(target);
        let c = SingletonTargetSource::new(Arc::new(Counter(1)));

        assert!(a.equals(&b));
        assert_eq!(a.hash_code(), b.hash_code());
        assert!(!a.equals(&c));
        assert!(a.is_static());
    }

    #[test]
    fn test_empty_target_source() {
        let empty = EmptyTargetSource::for_class(worker_class());
        assert!(empty.get_target().unwrap().is_none());
        assert_eq!(empty.target_class().unwrap().name(), "Worker");
        assert!(empty.equals(&EmptyTargetSource::for_class(worker_class())));
        assert!(!empty.equals(&EmptyTargetSource::new()));
    }

    #[test]
    fn test_prototype_creates_fresh_instances() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let source = PrototypeTargetSource::new(worker_class(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Counter(n)) as Arc<dyn TargetObject>)
        });

        let a = source.get_target().unwrap().unwrap();
        let b = source.get_target().unwrap().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert!(!source.is_static());
    }

    #[test]
    fn test_pool_reuses_released_instances() {
        let source = PooledTargetSource::new(worker_class(), 2, || {
            Ok(Arc::new(Counter(0)) as Arc<dyn TargetObject>)
        });

        let a = source.get_target().unwrap().unwrap();
        assert_eq!(source.active_count(), 1);
        source.release_target(a.clone()).unwrap();
        assert_eq!(source.active_count(), 0);
        assert_eq!(source.idle_count(), 1);

        let again = source.get_target().unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &again));
    }

    #[test]
    fn test_pool_blocks_when_exhausted() {
        let source = Arc::new(PooledTargetSource::new(worker_class(), 1, || {
            Ok(Arc::new(Counter(0)) as Arc<dyn TargetObject>)
        }));

        let held = source.get_target().unwrap().unwrap();
        let waiter = {
            let source = source.clone();
            thread::spawn(move || source.get_target().unwrap().unwrap())
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(source.active_count(), 1);
        source.release_target(held.clone()).unwrap();

        let got = waiter.join().unwrap();
        assert!(Arc::ptr_eq(&held, &got));
    }

    #[test]
    fn test_hot_swap_returns_old_target() {
        let first: Arc<dyn TargetObject> = Arc::new(Counter(1));
        let second: Arc<dyn TargetObject> = Arc::new(Counter(2));
        let source = HotSwappableTargetSource::new(first.clone());

        let old = source.swap(second.clone());
        assert!(Arc::ptr_eq(&old, &first));
        assert!(Arc::ptr_eq(&source.get_target().unwrap().unwrap(), &second));
    }
}
