//! Declarative definition of remote interfaces.

/// Defines a remote interface.
///
/// Generates the trait itself, a proxy type implementing it, and an
/// implementation of [`RemoteInterface`](crate::RemoteInterface) for
/// `dyn Trait` that describes its methods, creates proxies and dispatches
/// incoming calls to a subject.
///
/// Every method takes `&self` and returns either `CallResult<T>` (the
/// caller blocks until the result arrives) or `Task<T>`. Argument and
/// result types must implement `Serialize` and `DeserializeOwned`; wrap a
/// remote interface in [`ByRef`](crate::ByRef) to pass it by reference.
///
/// ```ignore
/// remote_interface! {
///     /// A shared counter.
///     pub trait Counter as "example.Counter" {
///         #[dispatch(SerializePerObject)]
///         fn increment(&self, by: u64) -> CallResult<u64>;
///
///         #[dispatch(Async)]
///         fn reset(&self) -> CallResult<()>;
///     }
/// }
/// ```
///
/// `#[dispatch(..)]` takes a [`Dispatch`](crate::Dispatch) variant and
/// defaults to `Unordered`.
#[macro_export]
macro_rules! remote_interface {
    (
        $(#[$attr:meta])*
        $vis:vis trait $name:ident as $wire:literal {
            $(
                $(#[doc = $doc:literal])*
                $(#[dispatch($policy:ident)])?
                fn $method:ident(&self $(, $arg:ident : $arg_ty:ty)* $(,)?) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$attr])*
        $vis trait $name: ::std::marker::Send + ::std::marker::Sync + 'static {
            $(
                $(#[doc = $doc])*
                fn $method(&self $(, $arg: $arg_ty)*) -> $ret;
            )*
        }

        const _: () = {
            struct Proxy {
                handle: $crate::ProxyHandle,
            }

            impl $name for Proxy {
                $(
                    fn $method(&self $(, $arg: $arg_ty)*) -> $ret {
                        self.handle.call::<$ret>(
                            ::std::stringify!($method),
                            &|_args: &mut $crate::ArgumentWriter| -> $crate::CallResult<()> {
                                $( _args.push(&$arg)?; )*
                                ::std::result::Result::Ok(())
                            },
                        )
                    }
                )*
            }

            impl $crate::RemoteInterface for dyn $name {
                fn descriptor() -> &'static $crate::InterfaceDescriptor {
                    static METHODS: &[$crate::MethodDescriptor] = &[
                        $(
                            $crate::MethodDescriptor::new(
                                ::std::stringify!($method),
                                $crate::__dispatch_policy!($($policy)?),
                            ),
                        )*
                    ];
                    static DESCRIPTOR: $crate::InterfaceDescriptor =
                        $crate::InterfaceDescriptor::new($wire, METHODS);
                    &DESCRIPTOR
                }

                fn create_proxy(handle: $crate::ProxyHandle) -> ::std::sync::Arc<Self> {
                    ::std::sync::Arc::new(Proxy { handle })
                }

                fn invoke(
                    subject: &Self,
                    call: &mut $crate::IncomingCall,
                ) -> $crate::CallResult<$crate::__private::Value> {
                    let method = ::std::string::ToString::to_string(call.method());
                    match method.as_str() {
                        $(
                            ::std::stringify!($method) => {
                                $( let $arg: $arg_ty = call.arg()?; )*
                                let ret = subject.$method($($arg),*);
                                <$ret as $crate::RemoteReturn>::into_reply(ret, call.site())
                            }
                        )*
                        other => ::std::result::Result::Err(call.unknown_method(other)),
                    }
                }
            }
        };
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __dispatch_policy {
    () => {
        $crate::Dispatch::Unordered
    };
    ($policy:ident) => {
        $crate::Dispatch::$policy
    };
}
