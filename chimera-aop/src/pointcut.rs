//! 切点（Pointcut）表达式系统
//!
//! 切点由两部分组成：
//! - [`ClassFilter`]：目标类型是否可能被匹配
//! - [`MethodMatcher`]：具体方法是否被匹配，可选地在运行时检查参数

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::metadata::{Method, TypeInfo, Value};

/// 类型过滤器
pub trait ClassFilter: Send + Sync {
    fn matches(&self, class: &TypeInfo) -> bool;
}

/// 方法匹配器
pub trait MethodMatcher: Send + Sync {
    /// 静态匹配（结果可以被缓存）
    fn matches(&self, method: &Method, target_class: &TypeInfo) -> bool;

    /// 是否需要在每次调用时检查参数
    fn is_runtime(&self) -> bool {
        false
    }

    /// 运行时匹配，仅在静态匹配通过且 `is_runtime()` 为 true 时调用
    fn matches_args(&self, _method: &Method, _target_class: &TypeInfo, _args: &[Value]) -> bool {
        true
    }

    /// 匹配结果是否依赖于引入通知
    fn is_introduction_aware(&self) -> bool {
        false
    }

    /// 考虑引入通知的静态匹配
    ///
    /// `has_introductions` 表示当前配置中是否存在适用于目标类型的引入
    fn matches_with_introductions(
        &self,
        method: &Method,
        target_class: &TypeInfo,
        _has_introductions: bool,
    ) -> bool {
        self.matches(method, target_class)
    }
}

/// 切点 Trait
pub trait Pointcut: Send + Sync {
    fn class_filter(&self) -> Arc<dyn ClassFilter>;

    fn method_matcher(&self) -> Arc<dyn MethodMatcher>;

    /// 切点的结构描述，用于判断两个配置是否等价
    fn describe(&self) -> String;
}

/// 匹配所有类型
pub struct AnyClass;

impl ClassFilter for AnyClass {
    fn matches(&self, _class: &TypeInfo) -> bool {
        true
    }
}

/// 基于闭包的类型过滤器
pub struct FnClassFilter<F>(pub F);

impl<F> ClassFilter for FnClassFilter<F>
where
    F: Fn(&TypeInfo) -> bool + Send + Sync,
{
    fn matches(&self, class: &TypeInfo) -> bool {
        (self.0)(class)
    }
}

type MethodPredicate = Arc<dyn Fn(&Method, &TypeInfo) -> bool + Send + Sync>;

/// 切点表达式
///
/// 类型模式会与目标类型、父类型以及实现的接口名称逐一比较
#[derive(Clone)]
pub enum PointcutExpression {
    /// 匹配所有方法
    All,

    /// 匹配特定类型的所有方法
    /// 例如：TypePattern("UserService")
    TypePattern(String),

    /// 匹配特定方法名
    /// 例如：MethodPattern("get_user")
    MethodPattern(String),

    /// 匹配特定类型的特定方法
    /// 例如：execution(* UserService.get_user(..))
    Execution {
        type_pattern: String,
        method_pattern: String,
    },

    /// 使用正则表达式匹配类型
    TypeRegex(Regex),

    /// 使用正则表达式匹配方法
    MethodRegex(Regex),

    /// 配置中存在适用于目标类型的引入时匹配
    HasIntroductions,

    /// 自定义匹配函数
    Custom(MethodPredicate),

    /// 与运算（AND）
    And(Box<PointcutExpression>, Box<PointcutExpression>),

    /// 或运算（OR）
    Or(Box<PointcutExpression>, Box<PointcutExpression>),

    /// 非运算（NOT）
    Not(Box<PointcutExpression>),
}

impl PointcutExpression {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Method, &TypeInfo) -> bool + Send + Sync + 'static,
    {
        PointcutExpression::Custom(Arc::new(predicate))
    }

    /// 检查方法是否匹配
    pub fn matches(&self, method: &Method, class: &TypeInfo, has_introductions: bool) -> bool {
        match self {
            PointcutExpression::All => true,

            PointcutExpression::TypePattern(pattern) => Self::type_matches(class, |name| {
                Self::pattern_matches(pattern, name)
            }),

            PointcutExpression::MethodPattern(pattern) => {
                Self::pattern_matches(pattern, method.name())
            }

            PointcutExpression::Execution {
                type_pattern,
                method_pattern,
            } => {
                Self::type_matches(class, |name| Self::pattern_matches(type_pattern, name))
                    && Self::pattern_matches(method_pattern, method.name())
            }

            PointcutExpression::TypeRegex(regex) => {
                Self::type_matches(class, |name| regex.is_match(name))
            }

            PointcutExpression::MethodRegex(regex) => regex.is_match(method.name()),

            PointcutExpression::HasIntroductions => has_introductions,

            PointcutExpression::Custom(func) => func(method, class),

            PointcutExpression::And(left, right) => {
                left.matches(method, class, has_introductions)
                    && right.matches(method, class, has_introductions)
            }

            PointcutExpression::Or(left, right) => {
                left.matches(method, class, has_introductions)
                    || right.matches(method, class, has_introductions)
            }

            PointcutExpression::Not(expr) => !expr.matches(method, class, has_introductions),
        }
    }

    /// 只看类型时的匹配结果
    ///
    /// `None` 表示结果取决于具体方法
    fn class_verdict(&self, class: &TypeInfo) -> Option<bool> {
        match self {
            PointcutExpression::All => Some(true),
            PointcutExpression::TypePattern(pattern) => Some(Self::type_matches(class, |name| {
                Self::pattern_matches(pattern, name)
            })),
            PointcutExpression::TypeRegex(regex) => {
                Some(Self::type_matches(class, |name| regex.is_match(name)))
            }
            PointcutExpression::Execution { type_pattern, .. } => {
                if Self::type_matches(class, |name| Self::pattern_matches(type_pattern, name)) {
                    None
                } else {
                    Some(false)
                }
            }
            PointcutExpression::MethodPattern(_)
            | PointcutExpression::MethodRegex(_)
            | PointcutExpression::HasIntroductions
            | PointcutExpression::Custom(_) => None,
            PointcutExpression::And(left, right) => {
                match (left.class_verdict(class), right.class_verdict(class)) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }
            }
            PointcutExpression::Or(left, right) => {
                match (left.class_verdict(class), right.class_verdict(class)) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }
            }
            PointcutExpression::Not(expr) => expr.class_verdict(class).map(|v| !v),
        }
    }

    fn mentions_introductions(&self) -> bool {
        match self {
            PointcutExpression::HasIntroductions => true,
            PointcutExpression::And(left, right) | PointcutExpression::Or(left, right) => {
                left.mentions_introductions() || right.mentions_introductions()
            }
            PointcutExpression::Not(expr) => expr.mentions_introductions(),
            _ => false,
        }
    }

    fn type_matches(class: &TypeInfo, pred: impl Fn(&str) -> bool) -> bool {
        if pred(class.name()) {
            return true;
        }
        let mut current = class.superclass();
        while let Some(superclass) = current {
            if pred(superclass.name()) {
                return true;
            }
            current = superclass.superclass();
        }
        class.all_interfaces().iter().any(|i| pred(i.name()))
    }

    /// 简单的模式匹配（支持 * 通配符）
    ///
    /// 支持的模式：
    /// - `*` - 匹配任意字符串
    /// - `User*` - 以 User 开头
    /// - `*Service` - 以 Service 结尾
    /// - `*Service*` - 包含 Service
    fn pattern_matches(pattern: &str, target: &str) -> bool {
        if pattern == "*" {
            return true;
        }

        if !pattern.contains('*') {
            return pattern == target;
        }

        let regex_pattern = regex::escape(pattern).replace(r"\*", ".*");
        let regex_pattern = format!("^{}$", regex_pattern);

        match Regex::new(&regex_pattern) {
            Ok(regex) => regex.is_match(target),
            Err(_) => false,
        }
    }

    /// 创建 execution 表达式
    ///
    /// 例如：execution("* UserService.get_user(..)")
    /// 格式：返回类型 类型名.方法名(参数)
    ///
    /// 只支持类型和方法名匹配
    pub fn execution(expression: &str) -> Self {
        let parts: Vec<&str> = expression.split_whitespace().collect();

        if parts.len() < 2 {
            return PointcutExpression::All;
        }

        let method_part = parts[1].trim_end_matches("(..)").trim_end_matches("()");
        match method_part.rsplit_once('.') {
            Some((type_pattern, method_pattern)) => PointcutExpression::Execution {
                type_pattern: type_pattern.to_string(),
                method_pattern: method_pattern.to_string(),
            },
            None => PointcutExpression::MethodPattern(method_part.to_string()),
        }
    }

    /// 与运算
    pub fn and(self, other: PointcutExpression) -> Self {
        PointcutExpression::And(Box::new(self), Box::new(other))
    }

    /// 或运算
    pub fn or(self, other: PointcutExpression) -> Self {
        PointcutExpression::Or(Box::new(self), Box::new(other))
    }

    /// 非运算
    pub fn not(self) -> Self {
        PointcutExpression::Not(Box::new(self))
    }
}

impl fmt::Debug for PointcutExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointcutExpression::All => write!(f, "All"),
            PointcutExpression::TypePattern(p) => write!(f, "TypePattern({})", p),
            PointcutExpression::MethodPattern(p) => write!(f, "MethodPattern({})", p),
            PointcutExpression::Execution {
                type_pattern,
                method_pattern,
            } => write!(f, "Execution({}.{})", type_pattern, method_pattern),
            PointcutExpression::TypeRegex(r) => write!(f, "TypeRegex({})", r.as_str()),
            PointcutExpression::MethodRegex(r) => write!(f, "MethodRegex({})", r.as_str()),
            PointcutExpression::HasIntroductions => write!(f, "HasIntroductions"),
            PointcutExpression::Custom(func) => {
                write!(f, "Custom({:p})", Arc::as_ptr(func) as *const ())
            }
            PointcutExpression::And(l, r) => write!(f, "And({:?}, {:?})", l, r),
            PointcutExpression::Or(l, r) => write!(f, "Or({:?}, {:?})", l, r),
            PointcutExpression::Not(e) => write!(f, "Not({:?})", e),
        }
    }
}

impl ClassFilter for PointcutExpression {
    fn matches(&self, class: &TypeInfo) -> bool {
        self.class_verdict(class) != Some(false)
    }
}

impl MethodMatcher for PointcutExpression {
    fn matches(&self, method: &Method, target_class: &TypeInfo) -> bool {
        PointcutExpression::matches(self, method, target_class, false)
    }

    fn is_introduction_aware(&self) -> bool {
        self.mentions_introductions()
    }

    fn matches_with_introductions(
        &self,
        method: &Method,
        target_class: &TypeInfo,
        has_introductions: bool,
    ) -> bool {
        PointcutExpression::matches(self, method, target_class, has_introductions)
    }
}

impl Pointcut for PointcutExpression {
    fn class_filter(&self) -> Arc<dyn ClassFilter> {
        Arc::new(self.clone())
    }

    fn method_matcher(&self) -> Arc<dyn MethodMatcher> {
        Arc::new(self.clone())
    }

    fn describe(&self) -> String {
        format!("{:?}", self)
    }
}

type ArgsPredicate = Arc<dyn Fn(&Method, &[Value]) -> bool + Send + Sync>;

/// 动态切点
///
/// 静态部分由表达式决定，运行时再根据实际参数判断
#[derive(Clone)]
pub struct DynamicPointcut {
    expression: PointcutExpression,
    args: ArgsPredicate,
}

impl DynamicPointcut {
    pub fn new<F>(expression: PointcutExpression, args: F) -> Self
    where
        F: Fn(&Method, &[Value]) -> bool + Send + Sync + 'static,
    {
        Self {
            expression,
            args: Arc::new(args),
        }
    }
}

impl MethodMatcher for DynamicPointcut {
    fn matches(&self, method: &Method, target_class: &TypeInfo) -> bool {
        self.expression.matches(method, target_class, false)
    }

    fn is_runtime(&self) -> bool {
        true
    }

    fn matches_args(&self, method: &Method, _target_class: &TypeInfo, args: &[Value]) -> bool {
        (self.args)(method, args)
    }

    fn is_introduction_aware(&self) -> bool {
        self.expression.mentions_introductions()
    }

    fn matches_with_introductions(
        &self,
        method: &Method,
        target_class: &TypeInfo,
        has_introductions: bool,
    ) -> bool {
        self.expression
            .matches(method, target_class, has_introductions)
    }
}

impl Pointcut for DynamicPointcut {
    fn class_filter(&self) -> Arc<dyn ClassFilter> {
        Arc::new(self.expression.clone())
    }

    fn method_matcher(&self) -> Arc<dyn MethodMatcher> {
        Arc::new(self.clone())
    }

    fn describe(&self) -> String {
        format!(
            "Dynamic({:?}, {:p})",
            self.expression,
            Arc::as_ptr(&self.args) as *const ()
        )
    }
}

impl fmt::Debug for DynamicPointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MethodSpec, ReturnType};

    trait UserService {}
    trait Repository {}
    struct UserServiceImpl;

    fn user_service_impl() -> Arc<TypeInfo> {
        let repo = TypeInfo::interface::<dyn Repository>("Repository")
            .method(MethodSpec::new("save").param("User"))
            .build();
        let iface = TypeInfo::interface::<dyn UserService>("UserService")
            .implements(repo)
            .method(
                MethodSpec::new("get_user")
                    .param("u64")
                    .returns(ReturnType::reference::<String>()),
            )
            .method(MethodSpec::new("delete_user").param("u64"))
            .build();
        TypeInfo::class::<UserServiceImpl>("UserServiceImpl")
            .implements(iface)
            .build()
    }

    #[test]
    fn test_pattern_matching() {
        assert!(PointcutExpression::pattern_matches("*", "anything"));
        assert!(PointcutExpression::pattern_matches("User*", "UserService"));
        assert!(PointcutExpression::pattern_matches("*Service", "UserService"));
        assert!(PointcutExpression::pattern_matches("*Serv*", "UserService"));
        assert!(!PointcutExpression::pattern_matches("Order*", "UserService"));
        assert!(PointcutExpression::pattern_matches("get.*", "get.user"));
        assert!(!PointcutExpression::pattern_matches("get.*", "getXuser"));
    }

    #[test]
    fn test_type_pattern_sees_interfaces() {
        let class = user_service_impl();
        let get_user = class.find_method("get_user").unwrap();
        let save = class.find_method("save").unwrap();

        let by_iface = PointcutExpression::TypePattern("UserService".into());
        let by_parent = PointcutExpression::TypePattern("Repository".into());
        assert!(by_iface.matches(&get_user, &class, false));
        assert!(by_parent.matches(&save, &class, false));
    }

    #[test]
    fn test_execution_expression() {
        let class = user_service_impl();
        let get_user = class.find_method("get_user").unwrap();
        let delete = class.find_method("delete_user").unwrap();

        let expr = PointcutExpression::execution("* UserService.get_*(..)");
        assert!(expr.matches(&get_user, &class, false));
        assert!(!expr.matches(&delete, &class, false));

        let by_name = PointcutExpression::execution("* delete_user(..)");
        assert!(by_name.matches(&delete, &class, false));
    }

    #[test]
    fn test_combinators() {
        let class = user_service_impl();
        let get_user = class.find_method("get_user").unwrap();
        let delete = class.find_method("delete_user").unwrap();

        let expr = PointcutExpression::TypePattern("*Service".into())
            .and(PointcutExpression::MethodPattern("delete_*".into()).not());
        assert!(expr.matches(&get_user, &class, false));
        assert!(!expr.matches(&delete, &class, false));

        let either = PointcutExpression::MethodPattern("delete_user".into())
            .or(PointcutExpression::HasIntroductions);
        assert!(!either.matches(&get_user, &class, false));
        assert!(either.matches(&get_user, &class, true));
    }

    #[test]
    fn test_class_filter_is_conservative() {
        let class = user_service_impl();

        let wrong_type = PointcutExpression::execution("* OrderService.get_*(..)");
        assert!(!ClassFilter::matches(&wrong_type, &class));

        let method_only = PointcutExpression::MethodPattern("nothing".into());
        assert!(ClassFilter::matches(&method_only, &class));

        let negated_method = PointcutExpression::MethodPattern("x".into()).not();
        assert!(ClassFilter::matches(&negated_method, &class));

        let negated_type = PointcutExpression::TypePattern("UserService".into()).not();
        assert!(!ClassFilter::matches(&negated_type, &class));
    }

    #[test]
    fn test_dynamic_pointcut_checks_arguments() {
        let class = user_service_impl();
        let get_user = class.find_method("get_user").unwrap();

        let pointcut = DynamicPointcut::new(
            PointcutExpression::MethodPattern("get_user".into()),
            |_, args| args.first().and_then(|a| a.downcast_ref::<u64>()) == Some(&7),
        );
        let matcher = pointcut.method_matcher();
        assert!(matcher.is_runtime());
        assert!(matcher.matches(&get_user, &class));

        let seven: Value = Arc::new(7u64);
        let eight: Value = Arc::new(8u64);
        assert!(matcher.matches_args(&get_user, &class, &[seven]));
        assert!(!matcher.matches_args(&get_user, &class, &[eight]));
    }

    #[test]
    fn test_describe_is_structural() {
        let a = PointcutExpression::execution("* UserService.get_user(..)");
        let b = PointcutExpression::execution("* UserService.get_user(..)");
        assert_eq!(a.describe(), b.describe());

        let c1 = PointcutExpression::custom(|_, _| true);
        let c2 = PointcutExpression::custom(|_, _| true);
        assert_eq!(c1.describe(), c1.clone().describe());
        assert_ne!(c1.describe(), c2.describe());
    }
}
