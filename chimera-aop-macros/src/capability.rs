//! #[capability] 宏实现
//!
//! 为 trait 生成接口描述与代理句柄

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{
    punctuated::Punctuated, Error, FnArg, Ident, ItemTrait, Pat, Path, Result, ReturnType,
    Token, TraitItem, TraitItemFn, Type,
};

use crate::utils::{generic_arg, is_primitive, is_unit, type_name};

/// 返回值的装箱方式
enum ReturnShape {
    Unit,
    Primitive(Type),
    Optional(Type),
    Reference(Type),
}

impl ReturnShape {
    fn from_type(ty: &Type) -> Self {
        if is_unit(ty) {
            ReturnShape::Unit
        } else if is_primitive(ty) {
            ReturnShape::Primitive(ty.clone())
        } else if let Some(inner) = generic_arg(ty, "Option", 0) {
            ReturnShape::Optional(inner)
        } else {
            ReturnShape::Reference(ty.clone())
        }
    }

    fn return_type(&self) -> TokenStream {
        match self {
            ReturnShape::Unit => quote!(::chimera_aop::ReturnType::Unit),
            ReturnShape::Primitive(ty) => {
                let name = type_name(ty);
                quote!(::chimera_aop::ReturnType::Primitive(#name))
            }
            ReturnShape::Optional(ty) | ReturnShape::Reference(ty) => {
                quote!(::chimera_aop::ReturnType::reference::<#ty>())
            }
        }
    }

    fn pack(&self, value: TokenStream) -> TokenStream {
        match self {
            ReturnShape::Optional(_) => quote!(::chimera_aop::support::pack_optional(#value)),
            _ => quote!(::chimera_aop::support::pack(#value)),
        }
    }

    fn unpack(&self, method: &Ident, result: &Ident) -> TokenStream {
        match self {
            ReturnShape::Unit => {
                quote!(::chimera_aop::support::unpack::<()>(&#method, #result))
            }
            ReturnShape::Primitive(ty) | ReturnShape::Reference(ty) => {
                quote!(::chimera_aop::support::unpack::<#ty>(&#method, #result))
            }
            ReturnShape::Optional(ty) => {
                quote!(::chimera_aop::support::unpack_optional::<#ty>(&#method, #result))
            }
        }
    }
}

struct CapabilityMethod {
    ident: Ident,
    params: Vec<(Ident, Type)>,
    shape: ReturnShape,
    declares: Vec<Path>,
}

impl CapabilityMethod {
    fn parse(method: &mut TraitItemFn) -> Result<Self> {
        let sig = &method.sig;
        match sig.inputs.first() {
            Some(FnArg::Receiver(receiver))
                if receiver.reference.is_some() && receiver.mutability.is_none() => {}
            _ => {
                return Err(Error::new_spanned(
                    sig,
                    "#[capability] methods must take `&self`",
                ))
            }
        }
        if !sig.generics.params.is_empty() || sig.asyncness.is_some() {
            return Err(Error::new_spanned(
                sig,
                "#[capability] methods cannot be generic or async",
            ));
        }

        let mut params = Vec::new();
        for input in sig.inputs.iter().skip(1) {
            let FnArg::Typed(pat_type) = input else {
                continue;
            };
            let Pat::Ident(pat_ident) = &*pat_type.pat else {
                return Err(Error::new_spanned(
                    &pat_type.pat,
                    "#[capability] parameters must be plain identifiers",
                ));
            };
            params.push((pat_ident.ident.clone(), (*pat_type.ty).clone()));
        }

        let ok_type = match &sig.output {
            ReturnType::Type(_, ty) => generic_arg(ty, "Result", 0),
            ReturnType::Default => None,
        }
        .ok_or_else(|| {
            Error::new_spanned(
                &sig.output,
                "#[capability] methods must return Result<T, InvocationError>",
            )
        })?;

        let mut declares = Vec::new();
        let mut kept = Vec::new();
        for attr in method.attrs.drain(..) {
            if attr.path().is_ident("declares") {
                let failures =
                    attr.parse_args_with(Punctuated::<Path, Token![,]>::parse_terminated)?;
                declares.extend(failures);
            } else {
                kept.push(attr);
            }
        }
        method.attrs = kept;

        Ok(Self {
            ident: method.sig.ident.clone(),
            params,
            shape: ReturnShape::from_type(&ok_type),
            declares,
        })
    }

    fn spec(&self) -> TokenStream {
        let name = self.ident.to_string();
        let params = self.params.iter().map(|(_, ty)| {
            let ty_name = type_name(ty);
            quote!(.param(#ty_name))
        });
        let returns = self.shape.return_type();
        let declares = self.declares.iter().map(|path| quote!(.declares::<#path>()));
        quote! {
            ::chimera_aop::MethodSpec::new(#name)
                #(#params)*
                .returns(#returns)
                #(#declares)*
        }
    }
}

pub fn impl_capability(mut item: ItemTrait) -> Result<TokenStream> {
    if !item.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &item.generics,
            "#[capability] does not support generic traits",
        ));
    }

    let mut methods = Vec::new();
    for trait_item in item.items.iter_mut() {
        if let TraitItem::Fn(method) = trait_item {
            methods.push(CapabilityMethod::parse(method)?);
        }
    }

    let trait_ident = &item.ident;
    let trait_name = trait_ident.to_string();
    let vis = &item.vis;
    let proxy_ident = format_ident!("{}Proxy", trait_ident);

    let specs = methods.iter().map(CapabilityMethod::spec);

    let dispatch_arms = methods.iter().map(|m| {
        let name = m.ident.to_string();
        let ident = &m.ident;
        let bindings = m.params.iter().enumerate().map(|(index, (param, ty))| {
            quote! {
                let #param: #ty = ::chimera_aop::support::arg(method, args, #index)?;
            }
        });
        let call_args = m.params.iter().map(|(param, _)| param);
        let packed = m.shape.pack(quote!(target.#ident(#(#call_args),*)?));
        quote! {
            #name => {
                let call = || -> ::chimera_aop::InvocationResult {
                    #(#bindings)*
                    Ok(#packed)
                };
                Some(call())
            }
        }
    });

    let forwarders = methods.iter().enumerate().map(|(index, m)| {
        let ident = &m.ident;
        let params = m.params.iter().map(|(param, ty)| quote!(#param: #ty));
        let values = m
            .params
            .iter()
            .map(|(param, _)| quote!(::chimera_aop::support::value(#param)));
        let method_var = format_ident!("method");
        let result_var = format_ident!("result");
        let unpack = m.shape.unpack(&method_var, &result_var);
        let output = match &m.shape {
            ReturnShape::Unit => quote!(()),
            ReturnShape::Primitive(ty) | ReturnShape::Reference(ty) => quote!(#ty),
            ReturnShape::Optional(ty) => quote!(::std::option::Option<#ty>),
        };
        quote! {
            fn #ident(&self, #(#params),*)
                -> ::std::result::Result<#output, ::chimera_aop::InvocationError>
            {
                let capability = Self::capability();
                let method = capability.declared_methods()[#index].clone();
                let result = self.proxy.invoke(&method, vec![#(#values),*])?;
                #unpack
            }
        }
    });

    Ok(quote! {
        #item

        /// 代理句柄，通过代理调用
        #[derive(Clone)]
        #vis struct #proxy_ident {
            proxy: ::std::sync::Arc<::chimera_aop::ProxyInstance>,
        }

        impl #proxy_ident {
            /// 接口描述
            pub fn capability() -> ::std::sync::Arc<::chimera_aop::TypeInfo> {
                static CAPABILITY: ::chimera_aop::support::Lazy<
                    ::std::sync::Arc<::chimera_aop::TypeInfo>,
                > = ::chimera_aop::support::Lazy::new(|| {
                    ::chimera_aop::TypeInfo::interface::<dyn #trait_ident>(#trait_name)
                        #(.method(#specs))*
                        .build()
                });
                CAPABILITY.clone()
            }

            pub fn method(name: &str) -> ::std::option::Option<::chimera_aop::MethodRef> {
                Self::capability()
                    .declared_methods()
                    .iter()
                    .find(|m| m.name() == name)
                    .cloned()
            }

            /// 包装代理，代理必须实现该接口
            pub fn from_proxy(
                proxy: ::std::sync::Arc<::chimera_aop::ProxyInstance>,
            ) -> ::std::result::Result<Self, ::chimera_aop::AopConfigError> {
                if proxy.implements(Self::capability().token()) {
                    Ok(Self { proxy })
                } else {
                    Err(::chimera_aop::AopConfigError::CapabilityNotImplemented(
                        #trait_name.to_string(),
                    ))
                }
            }

            pub fn proxy(&self) -> &::std::sync::Arc<::chimera_aop::ProxyInstance> {
                &self.proxy
            }

            /// 反射调用实现者的方法，方法不属于该接口时返回 `None`
            pub fn dispatch_to<T: #trait_ident + ?Sized>(
                target: &T,
                method: &::chimera_aop::Method,
                args: &[::chimera_aop::Value],
            ) -> ::std::option::Option<::chimera_aop::InvocationResult> {
                match method.name() {
                    #(#dispatch_arms)*
                    _ => None,
                }
            }
        }

        impl #trait_ident for #proxy_ident {
            #(#forwarders)*
        }
    })
}
