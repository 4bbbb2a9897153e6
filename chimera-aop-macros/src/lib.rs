//! Chimera AOP 过程宏
//!
//! 提供 `#[capability]` 属性宏，把 trait 声明为可代理的接口

extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemTrait};

mod capability;
mod utils;

/// `#[capability]` 宏
///
/// 为 trait 生成 `<Trait>Proxy`：
/// - `capability()`：接口描述，用于配置代理
/// - `from_proxy(proxy)`：包装代理对象，调用 trait 方法时经由拦截器链
/// - `dispatch_to(target, method, args)`：实现者在 `TargetObject::invoke` 中使用的反射适配
///
/// 方法必须接收 `&self` 并返回 `Result<T, InvocationError>`，
/// 可以用 `#[declares(ErrorType, ...)]` 声明受检失败类型。
///
/// 使用示例：
/// ```ignore
/// use chimera_aop::prelude::*;
/// use chimera_aop_macros::capability;
///
/// #[capability]
/// pub trait UserService: Send + Sync {
///     #[declares(UserNotFound)]
///     fn find(&self, id: u64) -> Result<Option<String>, InvocationError>;
///
///     fn count(&self) -> Result<u32, InvocationError>;
/// }
///
/// let factory = ProxyFactory::new();
/// factory.add_interface(UserServiceProxy::capability())?;
/// factory.set_target(Arc::new(UserServiceImpl::new()))?;
/// let users = UserServiceProxy::from_proxy(factory.get_proxy()?)?;
/// users.find(42)?;
/// ```
#[proc_macro_attribute]
pub fn capability(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[capability] does not take arguments",
        )
        .to_compile_error()
        .into();
    }

    let item_trait = parse_macro_input!(item as ItemTrait);
    capability::impl_capability(item_trait)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
