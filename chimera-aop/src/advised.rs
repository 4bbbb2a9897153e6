//! 代理配置持有者
//!
//! [`AdvisedSupport`] 保存代理的接口、通知器、目标来源与配置标志，
//! 并按方法缓存解析好的拦截器链。任何修改都会使缓存失效，冻结后拒绝修改。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::advice::{Advice, AdviceType};
use crate::advisor::{Advisor, AdvisorKey};
use crate::chain::{AdvisorChainFactory, ChainEntry, DefaultAdvisorChainFactory};
use crate::config::ProxyConfig;
use crate::error::{AopConfigError, InvocationError, InvocationResult};
use crate::metadata::{Method, MethodKey, MethodSpec, ReturnType, TypeInfo, TypeToken, Value};
use crate::support::{arg, pack};
use crate::target::{EmptyTargetSource, SingletonTargetSource, TargetObject, TargetSource};

/// 配置查询接口
///
/// 代理在非 opaque 模式下会实现此接口
pub trait Advised: Send + Sync {
    fn is_frozen(&self) -> bool;

    fn is_proxy_target_class(&self) -> bool;

    fn is_expose_proxy(&self) -> bool;

    fn is_pre_filtered(&self) -> bool;

    fn proxied_interfaces(&self) -> Vec<Arc<TypeInfo>>;

    fn is_interface_proxied(&self, interface: &TypeToken) -> bool;

    fn target_source(&self) -> Arc<dyn TargetSource>;

    fn advisors(&self) -> Vec<Advisor>;

    fn advisor_count(&self) -> usize;

    fn index_of(&self, advisor: &Advisor) -> Option<usize>;

    fn index_of_advice(&self, advice: &Advice) -> Option<usize>;

    /// 可读的配置摘要
    fn to_proxy_config_string(&self) -> String;
}

static ADVISED_TYPE: Lazy<Arc<TypeInfo>> = Lazy::new(|| {
    TypeInfo::interface::<dyn Advised>("Advised")
        .method(MethodSpec::new("is_frozen").returns(ReturnType::Primitive("bool")))
        .method(MethodSpec::new("is_proxy_target_class").returns(ReturnType::Primitive("bool")))
        .method(MethodSpec::new("is_expose_proxy").returns(ReturnType::Primitive("bool")))
        .method(MethodSpec::new("is_pre_filtered").returns(ReturnType::Primitive("bool")))
        .method(
            MethodSpec::new("proxied_interfaces")
                .returns(ReturnType::reference::<Vec<Arc<TypeInfo>>>()),
        )
        .method(
            MethodSpec::new("is_interface_proxied")
                .param("TypeToken")
                .returns(ReturnType::Primitive("bool")),
        )
        .method(
            MethodSpec::new("target_source")
                .returns(ReturnType::reference::<Arc<dyn TargetSource>>()),
        )
        .method(MethodSpec::new("advisors").returns(ReturnType::reference::<Vec<Advisor>>()))
        .method(MethodSpec::new("advisor_count").returns(ReturnType::Primitive("usize")))
        .method(
            MethodSpec::new("index_of")
                .param("Advisor")
                .returns(ReturnType::reference::<Option<usize>>()),
        )
        .method(
            MethodSpec::new("index_of_advice")
                .param("Advice")
                .returns(ReturnType::reference::<Option<usize>>()),
        )
        .method(MethodSpec::new("to_proxy_config_string").returns(ReturnType::reference::<String>()))
        .build()
});

/// Advised 接口的类型描述
pub fn advised_type() -> Arc<TypeInfo> {
    ADVISED_TYPE.clone()
}

/// 在配置上反射调用 Advised 接口的方法
pub fn invoke_advised(advised: &dyn Advised, method: &Method, args: &[Value]) -> InvocationResult {
    let result = match method.name() {
        "is_frozen" => pack(advised.is_frozen()),
        "is_proxy_target_class" => pack(advised.is_proxy_target_class()),
        "is_expose_proxy" => pack(advised.is_expose_proxy()),
        "is_pre_filtered" => pack(advised.is_pre_filtered()),
        "proxied_interfaces" => pack(advised.proxied_interfaces()),
        "is_interface_proxied" => {
            let token: TypeToken = arg(method, args, 0)?;
            pack(advised.is_interface_proxied(&token))
        }
        "target_source" => pack(advised.target_source()),
        "advisors" => pack(advised.advisors()),
        "advisor_count" => pack(advised.advisor_count()),
        "index_of" => {
            let advisor: Advisor = arg(method, args, 0)?;
            pack(advised.index_of(&advisor))
        }
        "index_of_advice" => {
            let advice: Advice = arg(method, args, 0)?;
            pack(advised.index_of_advice(&advice))
        }
        "to_proxy_config_string" => pack(advised.to_proxy_config_string()),
        _ => return Err(InvocationError::no_such_method(method, "Advised")),
    };
    Ok(result)
}

struct AdvisedState {
    config: ProxyConfig,
    pre_filtered: bool,
    target_source: Arc<dyn TargetSource>,
    interfaces: Vec<Arc<TypeInfo>>,
    advisors: Vec<Advisor>,
    chain_factory: Arc<dyn AdvisorChainFactory>,
}

/// 代理配置
pub struct AdvisedSupport {
    state: RwLock<AdvisedState>,
    method_cache: RwLock<HashMap<MethodKey, Arc<Vec<ChainEntry>>>>,
    /// 每次修改递增，防止过期的解析结果写回缓存
    generation: AtomicU64,
    active: AtomicBool,
}

impl AdvisedSupport {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(AdvisedState {
                config: ProxyConfig::default(),
                pre_filtered: false,
                target_source: Arc::new(EmptyTargetSource::new()),
                interfaces: Vec::new(),
                advisors: Vec::new(),
                chain_factory: Arc::new(DefaultAdvisorChainFactory::new()),
            }),
            method_cache: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            active: AtomicBool::new(false),
        }
    }

    /// 创建代理指定接口的配置
    ///
    /// 任一类型不是接口或是密封接口时返回错误
    pub fn with_interfaces(interfaces: Vec<Arc<TypeInfo>>) -> Result<Self, AopConfigError> {
        let support = Self::new();
        for interface in interfaces {
            support.add_interface(interface)?;
        }
        Ok(support)
    }

    fn check_not_frozen(&self, action: &str) -> Result<(), AopConfigError> {
        if self.state.read().config.frozen {
            return Err(AopConfigError::Frozen(action.to_string()));
        }
        Ok(())
    }

    /// 配置发生变化，清空方法缓存
    fn advice_changed(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.method_cache.write().clear();
    }

    // ------------------------------------------------------------------
    // 配置标志
    // ------------------------------------------------------------------

    pub fn config(&self) -> ProxyConfig {
        self.state.read().config
    }

    pub fn set_config(&self, config: ProxyConfig) {
        self.state.write().config = config;
    }

    pub fn set_proxy_target_class(&self, value: bool) {
        self.state.write().config.proxy_target_class = value;
    }

    pub fn set_optimize(&self, value: bool) {
        self.state.write().config.optimize = value;
    }

    pub fn is_optimize(&self) -> bool {
        self.state.read().config.optimize
    }

    pub fn set_opaque(&self, value: bool) {
        self.state.write().config.opaque = value;
    }

    pub fn is_opaque(&self) -> bool {
        self.state.read().config.opaque
    }

    pub fn set_expose_proxy(&self, value: bool) {
        self.state.write().config.expose_proxy = value;
    }

    pub fn set_frozen(&self, value: bool) {
        self.state.write().config.frozen = value;
    }

    /// 通知器已确认适用于目标类型，解析时跳过类型过滤
    pub fn set_pre_filtered(&self, value: bool) {
        self.state.write().pre_filtered = value;
        self.advice_changed();
    }

    pub fn set_chain_factory(&self, factory: Arc<dyn AdvisorChainFactory>) {
        self.state.write().chain_factory = factory;
        self.advice_changed();
    }

    pub fn chain_factory(&self) -> Arc<dyn AdvisorChainFactory> {
        self.state.read().chain_factory.clone()
    }

    /// 标记配置已被用于创建代理
    pub fn activate(&self) {
        if !self.active.swap(true, Ordering::AcqRel) {
            tracing::debug!("Proxy configuration activated: {}", self);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // 目标来源
    // ------------------------------------------------------------------

    /// 以单例目标来源包装目标对象
    pub fn set_target(&self, target: Arc<dyn TargetObject>) -> Result<(), AopConfigError> {
        self.set_target_source(Arc::new(SingletonTargetSource::new(target)))
    }

    pub fn set_target_source(&self, source: Arc<dyn TargetSource>) -> Result<(), AopConfigError> {
        self.check_not_frozen("set target source")?;
        self.state.write().target_source = source;
        self.advice_changed();
        Ok(())
    }

    /// 只指定目标类型，没有目标实例
    pub fn set_target_class(&self, class: Arc<TypeInfo>) -> Result<(), AopConfigError> {
        self.set_target_source(Arc::new(EmptyTargetSource::for_class(class)))
    }

    pub fn target_class(&self) -> Option<Arc<TypeInfo>> {
        self.state.read().target_source.target_class()
    }

    // ------------------------------------------------------------------
    // 接口
    // ------------------------------------------------------------------

    pub fn set_interfaces(&self, interfaces: Vec<Arc<TypeInfo>>) -> Result<(), AopConfigError> {
        self.check_not_frozen("set interfaces")?;
        for interface in &interfaces {
            Self::validate_interface(interface)?;
        }
        {
            let mut state = self.state.write();
            state.interfaces.clear();
            for interface in interfaces {
                if !state.interfaces.iter().any(|i| i.token() == interface.token()) {
                    state.interfaces.push(interface);
                }
            }
        }
        self.advice_changed();
        Ok(())
    }

    fn validate_interface(interface: &TypeInfo) -> Result<(), AopConfigError> {
        if !interface.is_interface() {
            return Err(AopConfigError::NotAnInterface(interface.name().to_string()));
        }
        if interface.is_final() {
            return Err(AopConfigError::SealedInterface(interface.name().to_string()));
        }
        Ok(())
    }

    /// 添加要代理的接口，重复添加时忽略
    pub fn add_interface(&self, interface: Arc<TypeInfo>) -> Result<(), AopConfigError> {
        self.check_not_frozen("add interface")?;
        Self::validate_interface(&interface)?;
        {
            let mut state = self.state.write();
            if state.interfaces.iter().any(|i| i.token() == interface.token()) {
                return Ok(());
            }
            tracing::debug!("Adding proxied interface [{}]", interface.name());
            state.interfaces.push(interface);
        }
        self.advice_changed();
        Ok(())
    }

    /// 移除接口，返回接口是否存在
    pub fn remove_interface(&self, interface: &TypeToken) -> Result<bool, AopConfigError> {
        self.check_not_frozen("remove interface")?;
        let removed = {
            let mut state = self.state.write();
            let before = state.interfaces.len();
            state.interfaces.retain(|i| i.token() != interface);
            state.interfaces.len() != before
        };
        if removed {
            self.advice_changed();
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // 通知器
    // ------------------------------------------------------------------

    pub fn add_advisor(&self, advisor: Advisor) -> Result<(), AopConfigError> {
        let pos = self.state.read().advisors.len();
        self.add_advisor_at(pos, advisor)
    }

    pub fn add_advisors(
        &self,
        advisors: impl IntoIterator<Item = Advisor>,
    ) -> Result<(), AopConfigError> {
        for advisor in advisors {
            self.add_advisor(advisor)?;
        }
        Ok(())
    }

    pub fn add_advisor_at(&self, pos: usize, advisor: Advisor) -> Result<(), AopConfigError> {
        self.check_not_frozen("add advisor")?;
        self.validate_advisor(&advisor)?;
        {
            let mut state = self.state.write();
            if pos > state.advisors.len() {
                return Err(AopConfigError::AdvisorIndexOutOfRange {
                    index: pos,
                    count: state.advisors.len(),
                });
            }
            if let Advisor::Introduction(ia) = &advisor {
                for interface in ia.interfaces() {
                    if !state.interfaces.iter().any(|i| i.token() == interface.token()) {
                        state.interfaces.push(interface.clone());
                    }
                }
            }
            tracing::debug!("Adding advisor at position {}: {:?}", pos, advisor);
            state.advisors.insert(pos, advisor);
        }
        self.advice_changed();
        Ok(())
    }

    fn validate_advisor(&self, advisor: &Advisor) -> Result<(), AopConfigError> {
        if let Advisor::Introduction(ia) = advisor {
            for interface in ia.interfaces() {
                if !interface.is_interface() {
                    return Err(AopConfigError::NotAnInterface(interface.name().to_string()));
                }
                if !ia.interceptor().implements_interface(interface.token()) {
                    return Err(AopConfigError::CapabilityNotImplemented(
                        interface.name().to_string(),
                    ));
                }
            }
            return Ok(());
        }
        self.chain_factory().validate(&advisor.advice())
    }

    /// 按内容移除通知器
    pub fn remove_advisor(&self, advisor: &Advisor) -> Result<bool, AopConfigError> {
        match self.index_of(advisor) {
            Some(index) => self.remove_advisor_at(index).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn remove_advisor_at(&self, index: usize) -> Result<Advisor, AopConfigError> {
        self.check_not_frozen("remove advisor")?;
        let removed = {
            let mut state = self.state.write();
            if index >= state.advisors.len() {
                return Err(AopConfigError::AdvisorIndexOutOfRange {
                    index,
                    count: state.advisors.len(),
                });
            }
            let removed = state.advisors.remove(index);
            // 引入的接口随通知器一起移除
            if let Advisor::Introduction(ia) = &removed {
                for interface in ia.interfaces() {
                    state.interfaces.retain(|i| i.token() != interface.token());
                }
            }
            removed
        };
        self.advice_changed();
        Ok(removed)
    }

    /// 替换通知器，返回旧通知器是否存在
    ///
    /// 引入通知器的接口会被重新计算
    pub fn replace_advisor(&self, old: &Advisor, new: Advisor) -> Result<bool, AopConfigError> {
        self.check_not_frozen("replace advisor")?;
        let Some(index) = self.index_of(old) else {
            return Ok(false);
        };
        self.validate_advisor(&new)?;
        if old.is_introduction() || new.is_introduction() {
            self.remove_advisor_at(index)?;
            self.add_advisor_at(index, new)?;
        } else {
            self.state.write().advisors[index] = new;
            self.advice_changed();
        }
        Ok(true)
    }

    /// 以始终生效的通知器添加通知
    pub fn add_advice(&self, advice: Advice) -> Result<(), AopConfigError> {
        let pos = self.state.read().advisors.len();
        self.add_advice_at(pos, advice)
    }

    pub fn add_advice_at(&self, pos: usize, advice: Advice) -> Result<(), AopConfigError> {
        if let Advice::Introduction(_) = &advice {
            return Err(AopConfigError::IntroductionWithoutAdvisor(advice.name().to_string()));
        }
        self.add_advisor_at(pos, Advisor::always(advice))
    }

    pub fn remove_advice(&self, advice: &Advice) -> Result<bool, AopConfigError> {
        match self.index_of_advice(advice) {
            Some(index) => self.remove_advisor_at(index).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn advice_included(&self, advice: &Advice) -> bool {
        self.index_of_advice(advice).is_some()
    }

    pub fn count_advices_of_type(&self, advice_type: AdviceType) -> usize {
        self.state
            .read()
            .advisors
            .iter()
            .filter(|a| a.advice().advice_type() == advice_type)
            .count()
    }

    pub fn advisor(&self, index: usize) -> Option<Advisor> {
        self.state.read().advisors.get(index).cloned()
    }

    // ------------------------------------------------------------------
    // 拦截器链缓存
    // ------------------------------------------------------------------

    /// 获取方法的拦截器链
    ///
    /// 结果按方法缓存，未修改配置时重复调用返回同一个实例
    pub fn interceptors_and_dynamic_advice(
        &self,
        method: &Method,
        target_class: Option<&TypeInfo>,
    ) -> Result<Arc<Vec<ChainEntry>>, AopConfigError> {
        let key = method.key();
        if let Some(cached) = self.method_cache.read().get(&key) {
            return Ok(cached.clone());
        }

        let generation = self.generation.load(Ordering::Acquire);
        let (advisors, pre_filtered, factory) = {
            let state = self.state.read();
            (
                state.advisors.clone(),
                state.pre_filtered,
                state.chain_factory.clone(),
            )
        };
        tracing::trace!("Method cache miss for {}", method.signature());
        let chain = Arc::new(factory.interceptors_and_dynamic_advice(
            &advisors,
            pre_filtered,
            method,
            target_class,
        )?);

        let mut cache = self.method_cache.write();
        if self.generation.load(Ordering::Acquire) != generation {
            return Ok(chain);
        }
        Ok(cache.entry(key).or_insert(chain).clone())
    }

    /// 缓存中的方法数量
    pub fn cached_method_count(&self) -> usize {
        self.method_cache.read().len()
    }

    // ------------------------------------------------------------------
    // 复制与比较
    // ------------------------------------------------------------------

    /// 复制另一个配置的标志、目标来源、接口与通知器
    pub fn copy_configuration_from(&self, other: &AdvisedSupport) -> Result<(), AopConfigError> {
        let (target_source, advisors) = {
            let state = other.state.read();
            (state.target_source.clone(), state.advisors.clone())
        };
        self.copy_configuration_with(other, target_source, advisors)
    }

    /// 复制另一个配置的标志与接口，使用指定的目标来源与通知器
    pub fn copy_configuration_with(
        &self,
        other: &AdvisedSupport,
        target_source: Arc<dyn TargetSource>,
        advisors: Vec<Advisor>,
    ) -> Result<(), AopConfigError> {
        self.check_not_frozen("copy configuration")?;
        let (config, pre_filtered, interfaces, chain_factory) = {
            let state = other.state.read();
            (
                state.config,
                state.pre_filtered,
                state.interfaces.clone(),
                state.chain_factory.clone(),
            )
        };
        for advisor in &advisors {
            self.validate_advisor(advisor)?;
        }
        {
            let mut state = self.state.write();
            state.config.copy_from(&config);
            state.pre_filtered = pre_filtered;
            state.target_source = target_source;
            state.interfaces = interfaces;
            state.chain_factory = chain_factory;
            state.advisors.clear();
            for advisor in advisors {
                if let Advisor::Introduction(ia) = &advisor {
                    for interface in ia.interfaces() {
                        if !state.interfaces.iter().any(|i| i.token() == interface.token()) {
                            state.interfaces.push(interface.clone());
                        }
                    }
                }
                state.advisors.push(advisor);
            }
        }
        self.advice_changed();
        Ok(())
    }

    /// 只复制配置本身（不共享缓存）
    pub fn configuration_only_copy(&self) -> AdvisedSupport {
        let state = self.state.read();
        AdvisedSupport {
            state: RwLock::new(AdvisedState {
                config: state.config,
                pre_filtered: state.pre_filtered,
                target_source: state.target_source.clone(),
                interfaces: state.interfaces.clone(),
                advisors: state.advisors.clone(),
                chain_factory: state.chain_factory.clone(),
            }),
            method_cache: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            active: AtomicBool::new(false),
        }
    }

    /// 只保留键信息的快照，用于判断两个配置能否共用同一个代理类
    pub fn key_only_snapshot(&self) -> AdvisedKey {
        let state = self.state.read();
        AdvisedKey {
            interfaces: state.interfaces.iter().map(|i| i.token().clone()).collect(),
            target_class: state.target_source.target_class().map(|c| c.token().clone()),
            frozen: state.config.frozen,
            static_target: state.target_source.is_static(),
            expose_proxy: state.config.expose_proxy,
            opaque: state.config.opaque,
            advisors: state.advisors.iter().map(Advisor::key).collect(),
        }
    }

    /// 结构相等：接口、通知器内容与目标来源都相等
    pub fn equals_in_proxy(a: &AdvisedSupport, b: &AdvisedSupport) -> bool {
        if std::ptr::eq(a, b) {
            return true;
        }
        // 同一时刻只持有一把读锁
        let (interfaces, advisors, target_source) = {
            let sa = a.state.read();
            let interfaces: Vec<TypeToken> =
                sa.interfaces.iter().map(|i| i.token().clone()).collect();
            (interfaces, sa.advisors.clone(), sa.target_source.clone())
        };
        let sb = b.state.read();
        interfaces.len() == sb.interfaces.len()
            && interfaces
                .iter()
                .zip(&sb.interfaces)
                .all(|(x, y)| x == y.token())
            && advisors == sb.advisors
            && target_source.equals(sb.target_source.as_ref())
    }

    pub fn target_source_hash(&self) -> u64 {
        self.state.read().target_source.hash_code()
    }
}

impl Advised for AdvisedSupport {
    fn is_frozen(&self) -> bool {
        self.state.read().config.frozen
    }

    fn is_proxy_target_class(&self) -> bool {
        self.state.read().config.proxy_target_class
    }

    fn is_expose_proxy(&self) -> bool {
        self.state.read().config.expose_proxy
    }

    fn is_pre_filtered(&self) -> bool {
        self.state.read().pre_filtered
    }

    fn proxied_interfaces(&self) -> Vec<Arc<TypeInfo>> {
        self.state.read().interfaces.clone()
    }

    fn is_interface_proxied(&self, interface: &TypeToken) -> bool {
        self.state
            .read()
            .interfaces
            .iter()
            .any(|i| i.is_assignable_to(interface))
    }

    fn target_source(&self) -> Arc<dyn TargetSource> {
        self.state.read().target_source.clone()
    }

    fn advisors(&self) -> Vec<Advisor> {
        self.state.read().advisors.clone()
    }

    fn advisor_count(&self) -> usize {
        self.state.read().advisors.len()
    }

    fn index_of(&self, advisor: &Advisor) -> Option<usize> {
        self.state.read().advisors.iter().position(|a| a == advisor)
    }

    fn index_of_advice(&self, advice: &Advice) -> Option<usize> {
        self.state
            .read()
            .advisors
            .iter()
            .position(|a| a.advice().same_as(advice))
    }

    fn to_proxy_config_string(&self) -> String {
        self.to_string()
    }
}

impl Default for AdvisedSupport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AdvisedSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        let interfaces: Vec<&str> = state.interfaces.iter().map(|i| i.name()).collect();
        write!(
            f,
            "{} interfaces [{}]; {} advisors {:?}; targetSource [{}]; {}",
            interfaces.len(),
            interfaces.join(", "),
            state.advisors.len(),
            state.advisors,
            state.target_source.describe(),
            state.config
        )
    }
}

impl fmt::Debug for AdvisedSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdvisedSupport: {}", self)
    }
}

/// 配置的键快照
///
/// 不持有通知对象，只保留判断代理类能否复用所需的信息。
/// 不包含 `pre_filtered` 与引入通知器的类过滤器：只在这两处不同的配置会共用同一张策略表
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AdvisedKey {
    interfaces: Vec<TypeToken>,
    target_class: Option<TypeToken>,
    frozen: bool,
    static_target: bool,
    expose_proxy: bool,
    opaque: bool,
    advisors: Vec<AdvisorKey>,
}

impl AdvisedKey {
    pub fn advisors(&self) -> &[AdvisorKey] {
        &self.advisors
    }

    pub fn target_class(&self) -> Option<&TypeToken> {
        self.target_class.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{BeforeAdvice, IntroductionInterceptor, MethodInterceptor};
    use crate::joinpoint::MethodInvocation;
    use crate::pointcut::PointcutExpression;
    use std::any::Any;

    trait Ledger {}
    trait Closeable {}
    struct LedgerImpl;

    fn ledger() -> Arc<TypeInfo> {
        TypeInfo::interface::<dyn Ledger>("Ledger")
            .method(MethodSpec::new("total").returns(ReturnType::Primitive("i64")))
            .build()
    }

    fn closeable() -> Arc<TypeInfo> {
        TypeInfo::interface::<dyn Closeable>("Closeable")
            .method(MethodSpec::new("close"))
            .build()
    }

    struct Passthrough;

    impl MethodInterceptor for Passthrough {
        fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
            invocation.proceed()
        }
    }

    struct Audit;

    impl BeforeAdvice for Audit {
        fn before(
            &self,
            _method: &Method,
            _args: &[Value],
            _target: Option<&Arc<dyn TargetObject>>,
        ) -> Result<(), InvocationError> {
            Ok(())
        }
    }

    struct CloseMixin;

    impl MethodInterceptor for CloseMixin {
        fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
            invocation.proceed()
        }
    }

    impl IntroductionInterceptor for CloseMixin {
        fn implements_interface(&self, interface: &TypeToken) -> bool {
            interface == &TypeToken::of::<dyn Closeable>()
        }
    }

    struct LedgerTarget;

    impl TargetObject for LedgerTarget {
        fn invoke(self: Arc<Self>, _method: &Method, _args: &[Value]) -> InvocationResult {
            Ok(Some(Arc::new(0i64)))
        }

        fn type_info(&self) -> Option<Arc<TypeInfo>> {
            Some(TypeInfo::class::<LedgerImpl>("LedgerImpl").implements(ledger()).build())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_cache_returns_same_chain_until_mutation() {
        let iface = ledger();
        let total = iface.find_method("total").unwrap();
        let support = AdvisedSupport::with_interfaces(vec![iface]).unwrap();
        support.add_advice(Advice::around(Passthrough)).unwrap();

        let first = support.interceptors_and_dynamic_advice(&total, None).unwrap();
        let second = support.interceptors_and_dynamic_advice(&total, None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(support.cached_method_count(), 1);

        support.add_advice(Advice::before(Audit)).unwrap();
        assert_eq!(support.cached_method_count(), 0);
        let third = support.interceptors_and_dynamic_advice(&total, None).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.len(), 2);
    }

    #[test]
    fn test_interface_mutation_invalidates_cache() {
        let iface = ledger();
        let total = iface.find_method("total").unwrap();
        let support = AdvisedSupport::with_interfaces(vec![iface]).unwrap();
        support.interceptors_and_dynamic_advice(&total, None).unwrap();
        assert_eq!(support.cached_method_count(), 1);

        support.add_interface(closeable()).unwrap();
        assert_eq!(support.cached_method_count(), 0);
    }

    #[test]
    fn test_frozen_rejects_mutation() {
        let support = AdvisedSupport::new();
        let advice = Advice::around(Passthrough);
        support.add_advice(advice.clone()).unwrap();
        support.set_frozen(true);

        assert!(matches!(
            support.add_advice(Advice::before(Audit)),
            Err(AopConfigError::Frozen(_))
        ));
        assert!(matches!(support.remove_advice(&advice), Err(AopConfigError::Frozen(_))));
        assert!(matches!(
            support.replace_advisor(&Advisor::always(advice.clone()), Advisor::always(advice)),
            Err(AopConfigError::Frozen(_))
        ));
        assert!(support.add_interface(ledger()).is_err());
        assert_eq!(support.advisor_count(), 1);
    }

    #[test]
    fn test_advisor_positions() {
        let support = AdvisedSupport::new();
        let a = Advice::around(Passthrough);
        let b = Advice::before(Audit);
        let c = Advice::around(Passthrough);
        support.add_advice(a.clone()).unwrap();
        support.add_advice(c.clone()).unwrap();
        support.add_advice_at(1, b.clone()).unwrap();

        assert_eq!(support.index_of_advice(&a), Some(0));
        assert_eq!(support.index_of_advice(&b), Some(1));
        assert_eq!(support.index_of_advice(&c), Some(2));
        assert_eq!(support.count_advices_of_type(AdviceType::Around), 2);

        assert!(matches!(
            support.add_advice_at(7, Advice::around(Passthrough)),
            Err(AopConfigError::AdvisorIndexOutOfRange { index: 7, count: 3 })
        ));

        let removed = support.remove_advisor_at(1).unwrap();
        assert_eq!(removed, Advisor::always(b.clone()));
        assert!(!support.advice_included(&b));

        let replacement = Advisor::with_pointcut(PointcutExpression::All, b.clone());
        assert!(support.replace_advisor(&Advisor::always(c), replacement.clone()).unwrap());
        assert_eq!(support.index_of(&replacement), Some(1));
    }

    #[test]
    fn test_invalid_interfaces_rejected() {
        struct Concrete;
        let class = TypeInfo::class::<Concrete>("Concrete").build();
        let sealed = TypeInfo::interface::<dyn Closeable>("Closeable").final_type().build();
        let support = AdvisedSupport::new();

        assert!(matches!(
            support.add_interface(class),
            Err(AopConfigError::NotAnInterface(_))
        ));
        assert!(matches!(
            support.add_interface(sealed),
            Err(AopConfigError::SealedInterface(_))
        ));
    }

    #[test]
    fn test_with_interfaces_fails_on_invalid_type() {
        struct Concrete;
        let class = TypeInfo::class::<Concrete>("Concrete").build();
        let sealed = TypeInfo::interface::<dyn Closeable>("Closeable").final_type().build();

        assert!(matches!(
            AdvisedSupport::with_interfaces(vec![ledger(), class]),
            Err(AopConfigError::NotAnInterface(name)) if name == "Concrete"
        ));
        assert!(matches!(
            AdvisedSupport::with_interfaces(vec![sealed]),
            Err(AopConfigError::SealedInterface(_))
        ));
    }

    #[test]
    fn test_introduction_adds_and_removes_interfaces() {
        let support = AdvisedSupport::with_interfaces(vec![ledger()]).unwrap();
        let advisor = Advisor::introduction(Arc::new(CloseMixin), vec![closeable()]);
        support.add_advisor(advisor.clone()).unwrap();
        assert!(support.is_interface_proxied(&TypeToken::of::<dyn Closeable>()));
        assert_eq!(support.proxied_interfaces().len(), 2);

        assert!(matches!(
            support.add_advice(Advice::Introduction(Arc::new(CloseMixin))),
            Err(AopConfigError::IntroductionWithoutAdvisor(_))
        ));

        assert!(support.remove_advisor(&advisor).unwrap());
        assert!(!support.is_interface_proxied(&TypeToken::of::<dyn Closeable>()));
    }

    #[test]
    fn test_equals_in_proxy_and_key_snapshot() {
        let target: Arc<dyn TargetObject> = Arc::new(LedgerTarget);
        let advice = Advice::around(Passthrough);

        let a = AdvisedSupport::with_interfaces(vec![ledger()]).unwrap();
        a.set_target(target.clone()).unwrap();
        a.add_advice(advice.clone()).unwrap();

        let b = a.configuration_only_copy();
        assert!(AdvisedSupport::equals_in_proxy(&a, &b));
        assert_eq!(a.key_only_snapshot(), b.key_only_snapshot());

        b.add_advice(Advice::around(Passthrough)).unwrap();
        assert!(!AdvisedSupport::equals_in_proxy(&a, &b));

        let c = AdvisedSupport::new();
        c.copy_configuration_from(&a).unwrap();
        assert!(AdvisedSupport::equals_in_proxy(&a, &c));
        assert_eq!(c.target_class().unwrap().name(), "LedgerImpl");
    }

    #[test]
    fn test_equals_in_proxy_with_concurrent_mutation() {
        let target: Arc<dyn TargetObject> = Arc::new(LedgerTarget);
        let a = AdvisedSupport::with_interfaces(vec![ledger()]).unwrap();
        a.set_target(target).unwrap();
        let b = a.configuration_only_copy();

        std::thread::scope(|scope| {
            for (x, y) in [(&a, &b), (&b, &a), (&a, &b), (&b, &a)] {
                scope.spawn(move || {
                    for _ in 0..20_000 {
                        AdvisedSupport::equals_in_proxy(x, y);
                    }
                });
            }
            for support in [&a, &b] {
                scope.spawn(move || {
                    for _ in 0..2_000 {
                        let advice = Advice::around(Passthrough);
                        support.add_advice(advice.clone()).unwrap();
                        support.remove_advice(&advice).unwrap();
                    }
                });
            }
        });

        assert!(AdvisedSupport::equals_in_proxy(&a, &b));
    }

    #[test]
    fn test_invoke_advised_answers_queries() {
        let support = AdvisedSupport::with_interfaces(vec![ledger()]).unwrap();
        support.add_advice(Advice::around(Passthrough)).unwrap();
        let advised = advised_type();

        let count = advised.find_method("advisor_count").unwrap();
        let result = invoke_advised(&support, &count, &[]).unwrap().unwrap();
        assert_eq!(result.downcast_ref::<usize>(), Some(&1));

        let proxied = advised.find_method("is_interface_proxied").unwrap();
        let token: Value = Arc::new(TypeToken::of::<dyn Ledger>());
        let result = invoke_advised(&support, &proxied, &[token]).unwrap().unwrap();
        assert_eq!(result.downcast_ref::<bool>(), Some(&true));

        let summary = support.to_proxy_config_string();
        assert!(summary.starts_with("1 interfaces [Ledger]; 1 advisors"));
    }
}
