//! 类型与方法元数据
//!
//! Rust 没有运行时反射，代理引擎依赖这里的描述信息：
//! - [`TypeInfo`]：类型描述（接口、类或生成的代理类型）
//! - [`Method`]：方法签名（调用点）
//! - [`Value`]：类型擦除后的参数与返回值

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;

use crate::error::{FailureType, Throwable};

/// 类型擦除后的值
///
/// 空值（void / null）用 `Option::None` 表示
pub type Value = Arc<dyn Any + Send + Sync>;

/// 方法引用
pub type MethodRef = Arc<Method>;

/// 可变参数方法的尾部参数
#[derive(Clone)]
pub struct VarArgs(pub Vec<Value>);

impl fmt::Debug for VarArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarArgs({} values)", self.0.len())
    }
}

/// 根类型，所有类型都可以赋值给它
pub enum ObjectRoot {}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum TypeIdentity {
    Rust(TypeId),
    Synthetic(u64),
}

static NEXT_SYNTHETIC_ID: AtomicU64 = AtomicU64::new(1);

/// 类型标识
///
/// 相等性只取决于标识，与名称无关
#[derive(Clone)]
pub struct TypeToken {
    identity: TypeIdentity,
    name: Cow<'static, str>,
}

impl TypeToken {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::named::<T>(std::any::type_name::<T>())
    }

    pub fn named<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self {
            identity: TypeIdentity::Rust(TypeId::of::<T>()),
            name: Cow::Borrowed(name),
        }
    }

    /// 运行时生成的类型（没有对应的 Rust 类型）
    pub fn synthetic(name: impl Into<String>) -> Self {
        Self {
            identity: TypeIdentity::Synthetic(NEXT_SYNTHETIC_ID.fetch_add(1, Ordering::Relaxed)),
            name: Cow::Owned(name.into()),
        }
    }

    pub fn object() -> Self {
        Self::named::<ObjectRoot>("Object")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_object(&self) -> bool {
        self.identity == TypeIdentity::Rust(TypeId::of::<ObjectRoot>())
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.identity, TypeIdentity::Synthetic(_))
    }
}

impl PartialEq for TypeToken {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for TypeToken {}

impl Hash for TypeToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeToken({})", self.name)
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// 方法的返回类型
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReturnType {
    /// 无返回值
    Unit,
    /// 不可为空的基本类型
    Primitive(&'static str),
    /// 引用类型（可为空）
    Reference(TypeToken),
}

impl ReturnType {
    pub fn reference<T: ?Sized + 'static>() -> Self {
        ReturnType::Reference(TypeToken::of::<T>())
    }

    pub fn object() -> Self {
        ReturnType::Reference(TypeToken::object())
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, ReturnType::Primitive(_))
    }

    /// 返回类型能否接收 `ty` 类型的实例
    pub fn is_assignable_from(&self, ty: &TypeInfo) -> bool {
        match self {
            ReturnType::Reference(token) => ty.is_assignable_to(token),
            _ => false,
        }
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnType::Unit => f.write_str("()"),
            ReturnType::Primitive(name) => f.write_str(name),
            ReturnType::Reference(token) => write!(f, "{}", token),
        }
    }
}

/// 方法缓存键：声明类型 + 名称 + 参数类型
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodKey {
    declaring: TypeToken,
    signature: SignatureKey,
}

/// 签名键：名称 + 参数类型（不含声明类型）
///
/// 用于在类层次中查找被覆盖的方法
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct SignatureKey {
    name: &'static str,
    params: Vec<&'static str>,
}

impl SignatureKey {
    pub fn new(name: &'static str, params: Vec<&'static str>) -> Self {
        Self { name, params }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// 方法描述（调用签名）
pub struct Method {
    name: &'static str,
    declaring: Weak<TypeInfo>,
    declaring_token: TypeToken,
    param_types: Vec<&'static str>,
    return_type: ReturnType,
    declared_failures: Vec<FailureType>,
    varargs: bool,
    is_final: bool,
}

impl Method {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn declaring_token(&self) -> &TypeToken {
        &self.declaring_token
    }

    /// 声明该方法的类型
    ///
    /// 描述信息已被释放时退化为根类型
    pub fn declaring_type(&self) -> Arc<TypeInfo> {
        self.declaring.upgrade().unwrap_or_else(TypeInfo::object)
    }

    pub fn param_types(&self) -> &[&'static str] {
        &self.param_types
    }

    pub fn param_count(&self) -> usize {
        self.param_types.len()
    }

    pub fn return_type(&self) -> &ReturnType {
        &self.return_type
    }

    pub fn declared_failures(&self) -> &[FailureType] {
        &self.declared_failures
    }

    /// 方法是否声明了该失败类型
    pub fn declares(&self, throwable: &Throwable) -> bool {
        self.declared_failures.iter().any(|f| f.matches(throwable))
    }

    pub fn is_varargs(&self) -> bool {
        self.varargs
    }

    /// 不可覆盖的方法（子类代理无法拦截）
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn key(&self) -> MethodKey {
        MethodKey {
            declaring: self.declaring_token.clone(),
            signature: self.signature_key(),
        }
    }

    pub fn signature_key(&self) -> SignatureKey {
        SignatureKey::new(self.name, self.param_types.clone())
    }

    pub fn is_equals(&self) -> bool {
        self.name == "equals" && self.param_types.len() == 1
    }

    pub fn is_hash_code(&self) -> bool {
        self.name == "hash_code" && self.param_types.is_empty()
    }

    pub fn is_to_string(&self) -> bool {
        self.name == "to_string" && self.param_types.is_empty()
    }

    pub fn is_finalize(&self) -> bool {
        self.name == "finalize" && self.param_types.is_empty()
    }

    /// 完整签名，例如 `UserService::find(u64)`
    pub fn signature(&self) -> String {
        format!(
            "{}::{}({})",
            self.declaring_token,
            self.name,
            self.param_types.join(", ")
        )
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("signature", &self.signature())
            .field("return_type", &self.return_type)
            .field("varargs", &self.varargs)
            .field("final", &self.is_final)
            .finish()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// 方法定义（在构建 [`TypeInfo`] 时使用）
#[derive(Clone, Debug)]
pub struct MethodSpec {
    name: &'static str,
    param_types: Vec<&'static str>,
    return_type: ReturnType,
    declared_failures: Vec<FailureType>,
    varargs: bool,
    is_final: bool,
}

impl MethodSpec {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            param_types: Vec::new(),
            return_type: ReturnType::Unit,
            declared_failures: Vec::new(),
            varargs: false,
            is_final: false,
        }
    }

    pub fn param(mut self, type_name: &'static str) -> Self {
        self.param_types.push(type_name);
        self
    }

    pub fn returns(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    pub fn declares<E: Error + 'static>(self) -> Self {
        self.declares_failure(FailureType::of::<E>())
    }

    pub fn declares_failure(mut self, failure: FailureType) -> Self {
        self.declared_failures.push(failure);
        self
    }

    /// 最后一个参数为可变参数
    pub fn varargs(mut self) -> Self {
        self.varargs = true;
        self
    }

    pub fn non_overridable(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// 类型种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// 接口（能力描述）
    Interface,
    /// 具体类型
    Class,
    /// 运行时生成的代理类型
    Proxy,
}

/// 类型描述
pub struct TypeInfo {
    token: TypeToken,
    kind: TypeKind,
    is_final: bool,
    lenient_failures: bool,
    superclass: Option<Arc<TypeInfo>>,
    interfaces: Vec<Arc<TypeInfo>>,
    methods: Vec<MethodRef>,
}

static OBJECT_TYPE: Lazy<Arc<TypeInfo>> = Lazy::new(|| {
    TypeInfo::builder(TypeToken::object(), TypeKind::Class)
        .method(
            MethodSpec::new("equals")
                .param("Object")
                .returns(ReturnType::Primitive("bool")),
        )
        .method(MethodSpec::new("hash_code").returns(ReturnType::Primitive("u64")))
        .method(MethodSpec::new("to_string").returns(ReturnType::reference::<String>()))
        .method(MethodSpec::new("finalize"))
        .build()
});

impl TypeInfo {
    pub fn builder(token: TypeToken, kind: TypeKind) -> TypeInfoBuilder {
        TypeInfoBuilder {
            token,
            kind,
            is_final: false,
            lenient_failures: false,
            superclass: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// 定义接口（能力描述）
    pub fn interface<T: ?Sized + 'static>(name: &'static str) -> TypeInfoBuilder {
        Self::builder(TypeToken::named::<T>(name), TypeKind::Interface)
    }

    /// 定义具体类型
    pub fn class<T: ?Sized + 'static>(name: &'static str) -> TypeInfoBuilder {
        Self::builder(TypeToken::named::<T>(name), TypeKind::Class)
    }

    /// 根类型，声明了 `equals`、`hash_code`、`to_string`、`finalize`
    pub fn object() -> Arc<TypeInfo> {
        OBJECT_TYPE.clone()
    }

    pub fn token(&self) -> &TypeToken {
        &self.token
    }

    pub fn name(&self) -> &str {
        self.token.name()
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    pub fn is_proxy(&self) -> bool {
        self.kind == TypeKind::Proxy
    }

    /// 对类而言表示不可继承，对接口而言表示密封（不可被代理实现）
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// 不声明受检失败的类型（例如外部语言互操作类型）
    pub fn has_lenient_failures(&self) -> bool {
        self.lenient_failures
    }

    pub fn superclass(&self) -> Option<&Arc<TypeInfo>> {
        self.superclass.as_ref()
    }

    pub fn interfaces(&self) -> &[Arc<TypeInfo>] {
        &self.interfaces
    }

    pub fn declared_methods(&self) -> &[MethodRef] {
        &self.methods
    }

    /// 是否可以赋值给 `token` 表示的类型
    pub fn is_assignable_to(&self, token: &TypeToken) -> bool {
        if token.is_object() || &self.token == token {
            return true;
        }
        if let Some(superclass) = &self.superclass {
            if superclass.is_assignable_to(token) {
                return true;
            }
        }
        self.interfaces.iter().any(|i| i.is_assignable_to(token))
    }

    /// 是否实现了“暴露原始目标”标记
    pub fn is_raw_target_access(&self) -> bool {
        self.is_assignable_to(markers::raw_target_access().token())
    }

    /// 所有实现的接口（含父接口与父类实现的接口），按声明顺序去重
    pub fn all_interfaces(&self) -> Vec<Arc<TypeInfo>> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        self.collect_interfaces(&mut seen, &mut result);
        result
    }

    fn collect_interfaces(&self, seen: &mut HashSet<TypeToken>, out: &mut Vec<Arc<TypeInfo>>) {
        for iface in &self.interfaces {
            if seen.insert(iface.token.clone()) {
                out.push(iface.clone());
            }
            iface.collect_interfaces(seen, out);
        }
        if let Some(superclass) = &self.superclass {
            superclass.collect_interfaces(seen, out);
        }
    }

    /// 所有可调用的方法：自身、父类、接口，按签名去重（先声明者优先）
    pub fn all_methods(&self) -> Vec<MethodRef> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        self.collect_methods(&mut seen, &mut result);
        result
    }

    fn collect_methods(&self, seen: &mut HashSet<SignatureKey>, out: &mut Vec<MethodRef>) {
        for method in &self.methods {
            if seen.insert(method.signature_key()) {
                out.push(method.clone());
            }
        }
        if let Some(superclass) = &self.superclass {
            superclass.collect_methods(seen, out);
        }
        for iface in &self.interfaces {
            iface.collect_methods(seen, out);
        }
    }

    /// 按名称查找方法
    pub fn find_method(&self, name: &str) -> Option<MethodRef> {
        self.all_methods().into_iter().find(|m| m.name() == name)
    }

    pub fn find_by_signature(&self, key: &SignatureKey) -> Option<MethodRef> {
        self.all_methods()
            .into_iter()
            .find(|m| &m.signature_key() == key)
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.token.name())
            .field("kind", &self.kind)
            .field("final", &self.is_final)
            .field(
                "interfaces",
                &self.interfaces.iter().map(|i| i.name()).collect::<Vec<_>>(),
            )
            .field("methods", &self.methods.len())
            .finish()
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// [`TypeInfo`] 构建器
pub struct TypeInfoBuilder {
    token: TypeToken,
    kind: TypeKind,
    is_final: bool,
    lenient_failures: bool,
    superclass: Option<Arc<TypeInfo>>,
    interfaces: Vec<Arc<TypeInfo>>,
    methods: Vec<MethodSpec>,
}

impl TypeInfoBuilder {
    pub fn final_type(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn lenient_failures(mut self) -> Self {
        self.lenient_failures = true;
        self
    }

    pub fn extends(mut self, superclass: Arc<TypeInfo>) -> Self {
        self.superclass = Some(superclass);
        self
    }

    pub fn implements(mut self, interface: Arc<TypeInfo>) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn method(mut self, spec: MethodSpec) -> Self {
        self.methods.push(spec);
        self
    }

    pub fn build(self) -> Arc<TypeInfo> {
        let TypeInfoBuilder {
            token,
            kind,
            is_final,
            lenient_failures,
            superclass,
            interfaces,
            methods,
        } = self;

        Arc::new_cyclic(|weak: &Weak<TypeInfo>| {
            let methods = methods
                .into_iter()
                .map(|spec| {
                    Arc::new(Method {
                        name: spec.name,
                        declaring: weak.clone(),
                        declaring_token: token.clone(),
                        param_types: spec.param_types,
                        return_type: spec.return_type,
                        declared_failures: spec.declared_failures,
                        varargs: spec.varargs,
                        is_final: spec.is_final,
                    })
                })
                .collect();

            TypeInfo {
                token,
                kind,
                is_final,
                lenient_failures,
                superclass,
                interfaces,
                methods,
            }
        })
    }
}

/// 框架标记接口
pub mod markers {
    use super::*;

    /// “这是框架管理的代理”标记
    pub enum ManagedProxy {}

    /// 实现此标记的类型有意暴露自身引用，返回 `this` 时不替换为代理
    pub enum RawTargetAccess {}

    static MANAGED_PROXY: Lazy<Arc<TypeInfo>> =
        Lazy::new(|| TypeInfo::interface::<ManagedProxy>("ManagedProxy").build());

    static RAW_TARGET_ACCESS: Lazy<Arc<TypeInfo>> =
        Lazy::new(|| TypeInfo::interface::<RawTargetAccess>("RawTargetAccess").build());

    pub fn managed_proxy() -> Arc<TypeInfo> {
        MANAGED_PROXY.clone()
    }

    pub fn raw_target_access() -> Arc<TypeInfo> {
        RAW_TARGET_ACCESS.clone()
    }
}

/// 根类型上的方法
pub fn object_method(name: &str) -> Option<MethodRef> {
    OBJECT_TYPE
        .declared_methods()
        .iter()
        .find(|m| m.name() == name)
        .cloned()
}
