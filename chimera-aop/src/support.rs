//! 参数与返回值的装箱/拆箱辅助函数
//!
//! 供 `#[capability]` 生成的代码以及手写的 [`TargetObject`](crate::target::TargetObject) 使用

use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use crate::error::InvocationError;
use crate::metadata::{Method, Value};

pub use once_cell::sync::Lazy;

/// 包装为 [`Value`]
pub fn value<T: Any + Send + Sync>(value: T) -> Value {
    Arc::new(value)
}

/// 取出第 `index` 个参数
pub fn arg<T: Any + Clone>(method: &Method, args: &[Value], index: usize) -> Result<T, InvocationError> {
    args.get(index)
        .and_then(|v| v.downcast_ref::<T>())
        .cloned()
        .ok_or_else(|| InvocationError::ArgumentMismatch {
            method: method.signature(),
            index,
            expected: type_name::<T>(),
        })
}

/// 打包返回值，`()` 视为空值
pub fn pack<R: Any + Send + Sync>(result: R) -> Option<Value> {
    if TypeId::of::<R>() == TypeId::of::<()>() {
        None
    } else {
        Some(Arc::new(result))
    }
}

/// 打包可为空的返回值
pub fn pack_optional<R: Any + Send + Sync>(result: Option<R>) -> Option<Value> {
    result.map(|r| Arc::new(r) as Value)
}

/// 拆出返回值
pub fn unpack<R: Any + Clone>(method: &Method, result: Option<Value>) -> Result<R, InvocationError> {
    match result {
        Some(v) => v
            .downcast_ref::<R>()
            .cloned()
            .ok_or_else(|| InvocationError::ReturnMismatch {
                method: method.signature(),
                expected: type_name::<R>(),
            }),
        None => {
            let unit: Box<dyn Any> = Box::new(());
            match unit.downcast::<R>() {
                Ok(unit) => Ok(*unit),
                Err(_) if method.return_type().is_primitive() => {
                    Err(InvocationError::NullPrimitiveReturn(method.signature()))
                }
                Err(_) => Err(InvocationError::ReturnMismatch {
                    method: method.signature(),
                    expected: type_name::<R>(),
                }),
            }
        }
    }
}

/// 拆出可为空的返回值
pub fn unpack_optional<R: Any + Clone>(
    method: &Method,
    result: Option<Value>,
) -> Result<Option<R>, InvocationError> {
    match result {
        Some(v) => unpack(method, Some(v)).map(Some),
        None => Ok(None),
    }
}
