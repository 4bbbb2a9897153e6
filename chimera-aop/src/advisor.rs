//! 通知器（Advisor）
//!
//! 通知器把切点与通知组合在一起，是配置中的基本单元

use std::fmt;
use std::sync::Arc;

use crate::advice::{Advice, AdviceType, IntroductionInterceptor};
use crate::metadata::{TypeInfo, TypeToken};
use crate::pointcut::{AnyClass, ClassFilter, Pointcut};

/// 切点通知器
#[derive(Clone)]
pub struct PointcutAdvisor {
    pointcut: Arc<dyn Pointcut>,
    advice: Advice,
}

impl PointcutAdvisor {
    pub fn new(pointcut: impl Pointcut + 'static, advice: Advice) -> Self {
        Self {
            pointcut: Arc::new(pointcut),
            advice,
        }
    }

    pub fn from_arc(pointcut: Arc<dyn Pointcut>, advice: Advice) -> Self {
        Self { pointcut, advice }
    }

    pub fn pointcut(&self) -> &Arc<dyn Pointcut> {
        &self.pointcut
    }

    pub fn advice(&self) -> &Advice {
        &self.advice
    }
}

/// 引入通知器
///
/// 为匹配的目标类型引入额外的接口
#[derive(Clone)]
pub struct IntroductionAdvisor {
    interceptor: Arc<dyn IntroductionInterceptor>,
    interfaces: Vec<Arc<TypeInfo>>,
    class_filter: Arc<dyn ClassFilter>,
}

impl IntroductionAdvisor {
    pub fn new(
        interceptor: Arc<dyn IntroductionInterceptor>,
        interfaces: Vec<Arc<TypeInfo>>,
    ) -> Self {
        Self {
            interceptor,
            interfaces,
            class_filter: Arc::new(AnyClass),
        }
    }

    /// 限制引入生效的目标类型
    pub fn with_class_filter(mut self, filter: impl ClassFilter + 'static) -> Self {
        self.class_filter = Arc::new(filter);
        self
    }

    pub fn interceptor(&self) -> &Arc<dyn IntroductionInterceptor> {
        &self.interceptor
    }

    pub fn interfaces(&self) -> &[Arc<TypeInfo>] {
        &self.interfaces
    }

    pub fn class_filter(&self) -> &Arc<dyn ClassFilter> {
        &self.class_filter
    }

    pub fn advice(&self) -> Advice {
        Advice::Introduction(self.interceptor.clone())
    }
}

/// 通知器
#[derive(Clone)]
pub enum Advisor {
    /// 由切点决定是否生效
    Pointcut(PointcutAdvisor),
    /// 引入新接口
    Introduction(IntroductionAdvisor),
    /// 始终生效
    Always(Advice),
}

impl Advisor {
    pub fn with_pointcut(pointcut: impl Pointcut + 'static, advice: Advice) -> Self {
        Advisor::Pointcut(PointcutAdvisor::new(pointcut, advice))
    }

    pub fn always(advice: Advice) -> Self {
        Advisor::Always(advice)
    }

    pub fn introduction(
        interceptor: Arc<dyn IntroductionInterceptor>,
        interfaces: Vec<Arc<TypeInfo>>,
    ) -> Self {
        Advisor::Introduction(IntroductionAdvisor::new(interceptor, interfaces))
    }

    pub fn advice(&self) -> Advice {
        match self {
            Advisor::Pointcut(a) => a.advice.clone(),
            Advisor::Introduction(a) => a.advice(),
            Advisor::Always(advice) => advice.clone(),
        }
    }

    pub fn is_introduction(&self) -> bool {
        matches!(self, Advisor::Introduction(_))
    }

    /// 是否引入了该接口
    pub fn introduces(&self, interface: &TypeToken) -> bool {
        match self {
            Advisor::Introduction(a) => a.interfaces.iter().any(|i| i.token() == interface),
            _ => false,
        }
    }

    /// 只保留通知类型与切点描述的轻量键
    pub fn key(&self) -> AdvisorKey {
        let advice = self.advice();
        let pointcut = match self {
            Advisor::Pointcut(a) => Some(a.pointcut.describe()),
            Advisor::Introduction(a) => Some(
                a.interfaces
                    .iter()
                    .map(|i| i.name().to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            Advisor::Always(_) => None,
        };
        AdvisorKey {
            advice_type: advice.advice_type(),
            advice_name: advice.name().to_string(),
            pointcut,
        }
    }
}

impl PartialEq for Advisor {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Advisor::Pointcut(a), Advisor::Pointcut(b)) => {
                a.advice == b.advice && a.pointcut.describe() == b.pointcut.describe()
            }
            (Advisor::Introduction(a), Advisor::Introduction(b)) => {
                a.advice() == b.advice()
                    && a.interfaces.len() == b.interfaces.len()
                    && a.interfaces
                        .iter()
                        .zip(&b.interfaces)
                        .all(|(x, y)| x.token() == y.token())
            }
            (Advisor::Always(a), Advisor::Always(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Advisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisor::Pointcut(a) => write!(
                f,
                "PointcutAdvisor: pointcut [{}]; advice [{:?}]",
                a.pointcut.describe(),
                a.advice
            ),
            Advisor::Introduction(a) => write!(
                f,
                "IntroductionAdvisor: interfaces [{}]; advice [{}]",
                a.interfaces
                    .iter()
                    .map(|i| i.name())
                    .collect::<Vec<_>>()
                    .join(", "),
                a.interceptor.name()
            ),
            Advisor::Always(advice) => write!(f, "DefaultAdvisor: advice [{:?}]", advice),
        }
    }
}

/// 通知器的轻量键
///
/// 只比较通知实现类型与切点描述，不持有通知对象本身
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AdvisorKey {
    advice_type: AdviceType,
    advice_name: String,
    pointcut: Option<String>,
}

impl AdvisorKey {
    pub fn advice_type(&self) -> AdviceType {
        self.advice_type
    }

    pub fn advice_name(&self) -> &str {
        &self.advice_name
    }

    pub fn pointcut(&self) -> Option<&str> {
        self.pointcut.as_deref()
    }
}
